//! Portfolio pipeline.
//!
//! A run derives the portfolio document, drives it through
//! optimize → select → apply → persist → backtest, then repeats the same
//! stages for one single-symbol document per symbol. Symbol documents are
//! seeded from the portfolio's realized parameters, and each finished symbol
//! is linked back into the portfolio's live config.
//!
//! Everything is sequential. Any stage failure aborts the run; only the
//! analyzer's choice is allowed to be missing.

use std::fs;
use std::io;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use chrono::{NaiveDate, Utc};
use thiserror::Error;
use tracing::{debug, info, warn};
use tunelab_core::artifact::{find_newest, has_extension, EntryKind};
use tunelab_core::{fsutil, CancelToken, ConfigBody, ConfigDocument, Range, RunLock};

use crate::config::{ApplyMode, ConfigError, RunConfig, SnapshotMode};
use crate::meta::{format_duration, DocumentReport, DocumentState, RunMeta};
use crate::paths::{DocumentPaths, ToolRoot, META_FILE, PARETO_DIR};
use crate::progress::{LogProgress, PipelineProgress};
use crate::selection::extract_ideal_config_path;
use crate::stage::Stage;
use crate::tools::{ExternalTools, ProcessTools};

/// Name of the portfolio document inside the portfolio directory.
pub const PORTFOLIO_DOCUMENT: &str = "config";

/// Archive label format for [`SnapshotMode::Timestamp`], in UTC.
pub const TIMESTAMP_LABEL_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

const SETTLE_POLL: Duration = Duration::from_millis(100);

/// Errors from a pipeline run.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Core(#[from] tunelab_core::Error),
    #[error("{document}: {stage} failed: {source}")]
    Stage {
        document: String,
        stage: Stage,
        #[source]
        source: tunelab_core::Error,
    },
}

impl RunError {
    fn stage(document: &str, stage: Stage, source: tunelab_core::Error) -> Self {
        RunError::Stage {
            document: document.to_string(),
            stage,
            source,
        }
    }

    /// The underlying core error, if any.
    pub fn core(&self) -> Option<&tunelab_core::Error> {
        match self {
            RunError::Config(_) => None,
            RunError::Core(e) | RunError::Stage { source: e, .. } => Some(e),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.core(), Some(tunelab_core::Error::Cancelled))
    }
}

/// Which document a pipeline pass is for.
enum Role<'a> {
    Portfolio,
    Symbol {
        symbol: &'a str,
        portfolio: &'a ConfigBody,
    },
}

impl Role<'_> {
    fn document_name(&self) -> &str {
        match self {
            Role::Portfolio => PORTFOLIO_DOCUMENT,
            Role::Symbol { symbol, .. } => symbol,
        }
    }
}

/// Mutable state of one document while its stages run.
struct DocumentRun {
    doc: ConfigDocument,
    paths: DocumentPaths,
    /// Newest candidate written by this run's optimizer, after the merge.
    newest_candidate: Option<PathBuf>,
    /// `ideal_config.json`, when the analyzer picked something.
    selected: Option<PathBuf>,
    applied: Option<PathBuf>,
    archive: Option<PathBuf>,
}

impl DocumentRun {
    fn new(doc: ConfigDocument) -> Self {
        let paths = DocumentPaths::new(doc.directory(), doc.name());
        Self {
            doc,
            paths,
            newest_candidate: None,
            selected: None,
            applied: None,
            archive: None,
        }
    }
}

/// Newest `*.json` in `produced/pareto`, else in `produced`, relative to
/// `produced`.
fn newest_candidate(produced: &std::path::Path) -> Option<PathBuf> {
    let json = has_extension("json");
    find_newest(&produced.join(PARETO_DIR), &json, EntryKind::File)
        .or_else(|_| find_newest(produced, &json, EntryKind::File))
        .ok()
        .and_then(|p| p.strip_prefix(produced).ok().map(PathBuf::from))
}

fn remove_file_if_exists(path: &std::path::Path) -> tunelab_core::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(tunelab_core::Error::io(path, e)),
    }
}

/// Drives a portfolio run.
pub struct Pipeline<T> {
    config: RunConfig,
    root: ToolRoot,
    tools: T,
    cancel: CancelToken,
    progress: Box<dyn PipelineProgress>,
}

impl Pipeline<ProcessTools> {
    /// Pipeline running the configured external commands.
    pub fn with_process_tools(config: RunConfig) -> Self {
        let tools = ProcessTools::new(ToolRoot::new(&config.root), config.tools.clone());
        Self::new(config, tools)
    }
}

impl<T: ExternalTools> Pipeline<T> {
    pub fn new(config: RunConfig, tools: T) -> Self {
        Self {
            root: ToolRoot::new(&config.root),
            config,
            tools,
            cancel: CancelToken::new(),
            progress: Box::new(LogProgress),
        }
    }

    pub fn with_progress(mut self, progress: Box<dyn PipelineProgress>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that cancels this pipeline when set.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn portfolio_dir(&self) -> PathBuf {
        self.root.portfolio_dir(&self.config.name)
    }

    fn end_date(&self) -> NaiveDate {
        self.config
            .dates
            .end_date
            .unwrap_or_else(|| Utc::now().date_naive())
    }

    /// Derive and save every document without running any tool.
    ///
    /// Returns the paths written, portfolio first.
    pub fn derive_only(&self) -> Result<Vec<PathBuf>, RunError> {
        let _lock = RunLock::acquire(self.root.root())?;
        let end = self.end_date();
        let portfolio = self
            .derive(&Role::Portfolio, end)
            .map_err(|e| RunError::stage(PORTFOLIO_DOCUMENT, Stage::Derive, e))?;
        let mut written = vec![portfolio.path()];
        if self.config.stages.fan_out {
            for symbol in &self.config.symbols {
                self.cancel.check()?;
                let role = Role::Symbol {
                    symbol,
                    portfolio: portfolio.body(),
                };
                let doc = self
                    .derive(&role, end)
                    .map_err(|e| RunError::stage(symbol, Stage::Derive, e))?;
                written.push(doc.path());
            }
        }
        Ok(written)
    }

    /// Run the whole pipeline and return the run summary.
    ///
    /// `meta.json` is written after every document, and once more when the
    /// run ends, whether it succeeded or not.
    pub fn run(&self) -> Result<RunMeta, RunError> {
        let run_id = self.config.run_id()?;
        let _lock = RunLock::acquire(self.root.root())?;
        let started = Instant::now();
        let end = self.end_date();

        let mut meta = RunMeta::begin(&self.config, run_id, PORTFOLIO_DOCUMENT, Utc::now());
        let start = chrono::Duration::try_days(self.config.dates.days)
            .and_then(|d| end.checked_sub_signed(d));
        meta.start_date = start.map(|d| d.format("%Y-%m-%d").to_string());
        meta.end_date = Some(end.format("%Y-%m-%d").to_string());
        let meta_path = self.portfolio_dir().join(META_FILE);

        info!(
            run_id = %meta.run_id,
            portfolio = %self.config.name,
            symbols = ?self.config.symbols,
            root = %self.root.root().display(),
            "starting run"
        );

        let outcome = self.execute(&mut meta, &meta_path, started, end);
        meta.elapsed = format_duration(started.elapsed());
        let written = meta.write(&meta_path);
        self.progress.on_run_complete(&meta);

        outcome?;
        written?;
        Ok(meta)
    }

    fn execute(
        &self,
        meta: &mut RunMeta,
        meta_path: &std::path::Path,
        started: Instant,
        end: NaiveDate,
    ) -> Result<(), RunError> {
        let fan_out = self.config.stages.fan_out;
        let total = 1 + if fan_out { self.config.symbols.len() } else { 0 };

        self.progress.on_document_start(PORTFOLIO_DOCUMENT, 0, total);
        let mut portfolio = self.run_document(&Role::Portfolio, end, &mut meta.portfolio)?;
        checkpoint(meta, meta_path, started)?;

        if !fan_out {
            return Ok(());
        }
        for (i, symbol) in self.config.symbols.iter().enumerate() {
            self.progress.on_document_start(symbol, i + 1, total);
            let role = Role::Symbol {
                symbol,
                portfolio: portfolio.body(),
            };
            self.run_document(&role, end, &mut meta.symbol_reports[i])?;

            portfolio.link_symbol_instrument(symbol);
            portfolio.save()?;
            info!(symbol = %symbol, "linked symbol config into portfolio");
            checkpoint(meta, meta_path, started)?;
        }
        Ok(())
    }

    /// Run every stage for one document, keeping `report` current.
    fn run_document(
        &self,
        role: &Role<'_>,
        end: NaiveDate,
        report: &mut DocumentReport,
    ) -> Result<ConfigDocument, RunError> {
        report.state = DocumentState::Running;
        let result = self.drive(role, end, report);
        match &result {
            Ok(_) => report.state = DocumentState::Completed,
            Err(e) => {
                report.state = DocumentState::Failed;
                report.error = Some(e.to_string());
            }
        }
        self.progress.on_document_complete(report);
        result
    }

    fn drive(
        &self,
        role: &Role<'_>,
        end: NaiveDate,
        report: &mut DocumentReport,
    ) -> Result<ConfigDocument, RunError> {
        let name = role.document_name();
        let select_ideal = self.config.stages.select_ideal;

        self.cancel
            .check()
            .map_err(|e| RunError::stage(name, Stage::Derive, e))?;
        self.progress.on_stage(name, Stage::Derive);
        let doc = self
            .derive(role, end)
            .map_err(|e| RunError::stage(name, Stage::Derive, e))?;
        report.completed_stage = Some(Stage::Derive);

        let mut run = DocumentRun::new(doc);
        let mut next = Stage::Derive.next(select_ideal);
        while let Some(stage) = next {
            self.cancel
                .check()
                .map_err(|e| RunError::stage(name, stage, e))?;
            self.progress.on_stage(name, stage);
            self.execute_stage(stage, &mut run)
                .map_err(|e| RunError::stage(name, stage, e))?;
            report.completed_stage = Some(stage);
            report.applied_result.clone_from(&run.applied);
            report.backtest_archive.clone_from(&run.archive);
            next = stage.next(select_ideal);
        }
        Ok(run.doc)
    }

    /// Build a document for `role` from the template (or load it when
    /// resuming), apply the run's settings and save it.
    fn derive(&self, role: &Role<'_>, end: NaiveDate) -> tunelab_core::Result<ConfigDocument> {
        let name = role.document_name();
        let dir = self.portfolio_dir();
        let mut doc = if self.config.resume {
            ConfigDocument::load(name, &dir)?
        } else {
            ConfigDocument::create_from_template(
                name,
                &dir,
                &self.config.template_path(),
                self.config.starting_config_path().as_deref(),
            )?
        };

        let bounds = &self.config.bounds;
        let [n_lo, n_hi] = bounds.position_count(self.config.symbols.len());
        match role {
            Role::Portfolio => {
                doc.set_symbols(&self.config.symbols);
                doc.set_date_range_ending(self.config.dates.days, end)?;
                doc.set_optimization_bounds_position_count(n_lo, Some(n_hi))?;
                if let Some([lo, hi]) = bounds.total_wallet_exposure_limit {
                    let key = "total_wallet_exposure_limit";
                    doc.set_optimization_bounds(key, Range::checked(key, lo, hi)?);
                }
            }
            Role::Symbol { symbol, portfolio } => {
                doc.set_symbols(&[symbol.to_string()]);
                doc.set_date_range_ending(self.config.symbol_days(), end)?;
                let written = match &bounds.widen {
                    Some(widen) => doc.apply_global_bounds_widened(portfolio, widen),
                    None => doc.apply_global_bounds(portfolio),
                };
                debug!(symbol = %symbol, written, "seeded bounds from portfolio");
                doc.set_optimization_bounds_position_count(n_lo, Some(n_hi))?;
            }
        }
        for side in &bounds.disable {
            doc.disable_optimization(*side);
        }
        doc.save()?;
        Ok(doc)
    }

    fn execute_stage(&self, stage: Stage, run: &mut DocumentRun) -> tunelab_core::Result<()> {
        match stage {
            // Runs before the loop; it produces the document the loop works on.
            Stage::Derive => Ok(()),
            Stage::Optimize => self.optimize(run),
            Stage::Select => self.select(run),
            Stage::Apply => self.apply(run),
            Stage::Persist => run.doc.save(),
            Stage::Backtest => self.backtest(run),
        }
    }

    fn optimize(&self, run: &mut DocumentRun) -> tunelab_core::Result<()> {
        let produced = self
            .tools
            .optimize(&run.doc.path(), &run.paths.optimization_log(), &self.cancel)?;
        let candidate = newest_candidate(&produced);
        let destination = run.paths.optimization_dir();
        fsutil::merge_dir(&produced, &destination)?;
        info!(
            document = %run.doc.name(),
            from = %produced.display(),
            to = %destination.display(),
            "stored optimization results"
        );
        run.newest_candidate = candidate.map(|rel| destination.join(rel));
        Ok(())
    }

    fn select(&self, run: &mut DocumentRun) -> tunelab_core::Result<()> {
        let log = run.paths.analyzation_log();
        // The marker must come from this analysis, not an earlier one.
        remove_file_if_exists(&log)?;
        self.tools
            .analyze(&run.paths.pareto_dir(), &log, &self.cancel)?;

        match extract_ideal_config_path(&log, self.root.root())? {
            Some(chosen) if chosen.is_file() => {
                let ideal = run.paths.ideal_config();
                fsutil::copy_file(&chosen, &ideal)?;
                info!(document = %run.doc.name(), chosen = %chosen.display(), "selected ideal config");
                run.selected = Some(ideal);
            }
            Some(chosen) => {
                warn!(
                    document = %run.doc.name(),
                    chosen = %chosen.display(),
                    "analyzer named a file that does not exist, falling back to newest result"
                );
            }
            None => {
                warn!(document = %run.doc.name(), "no ideal config selected, falling back to newest result");
            }
        }
        Ok(())
    }

    fn apply(&self, run: &mut DocumentRun) -> tunelab_core::Result<()> {
        let source = run
            .selected
            .clone()
            .or_else(|| run.newest_candidate.clone())
            .ok_or_else(|| {
                tunelab_core::Error::not_found("optimized result", run.paths.optimization_dir())
            })?;
        let record = match self.config.stages.apply {
            ApplyMode::Merge => run.doc.apply_optimized_result(&source)?,
            ApplyMode::Adopt => Some(run.doc.adopt_optimized_config(&source)?),
        };
        if let Some(record) = record {
            self.progress.on_patch_applied(run.doc.name(), &record);
        }
        run.applied = Some(source);
        Ok(())
    }

    fn backtest(&self, run: &mut DocumentRun) -> tunelab_core::Result<()> {
        let produced = self
            .tools
            .backtest(&run.doc.path(), &run.paths.backtest_log(), &self.cancel)?;
        let archive = run.paths.backtest_archive(&self.snapshot_label());
        fsutil::move_dir(&produced, &archive)?;
        info!(document = %run.doc.name(), archive = %archive.display(), "archived backtest");
        run.archive = Some(archive);
        self.settle()
    }

    fn snapshot_label(&self) -> String {
        match self.config.stages.snapshot {
            SnapshotMode::Fixed => self.config.stages.snapshot_label.clone(),
            SnapshotMode::Timestamp => Utc::now().format(TIMESTAMP_LABEL_FORMAT).to_string(),
        }
    }

    /// Wait out the settle delay, waking early on cancellation.
    fn settle(&self) -> tunelab_core::Result<()> {
        let delay = self.config.stages.settle_delay();
        if delay.is_zero() {
            return Ok(());
        }
        debug!(secs = delay.as_secs(), "settling");
        let deadline = Instant::now() + delay;
        loop {
            self.cancel.check()?;
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            thread::sleep((deadline - now).min(SETTLE_POLL));
        }
    }
}

fn checkpoint(meta: &mut RunMeta, path: &std::path::Path, started: Instant) -> Result<(), RunError> {
    meta.elapsed = format_duration(started.elapsed());
    meta.write(path)?;
    Ok(())
}
