//! TuneLab CLI: run the tuning pipeline and its building blocks by hand.
//!
//! Commands:
//! - `run`: full pipeline from a TOML run config (`--dry-run` derives only)
//! - `derive`: create a config document from a template
//! - `propagate`: pin (or widen) a document's bounds to another's realized parameters
//! - `newest`: print the most recently modified artifact in a directory
//! - `select`: print the ideal config named in an analyzer log

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use tunelab_core::artifact::{any_name, has_extension, EntryKind};
use tunelab_core::{find_newest, ConfigDocument, Widen};
use tunelab_runner::{
    extract_ideal_config_path, DocumentState, Pipeline, RunConfig, RunMeta,
};

#[derive(Parser)]
#[command(
    name = "tunelab",
    about = "TuneLab CLI: optimize, select, apply and backtest trading configs"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline from a TOML run config.
    Run {
        /// Path to the run config.
        #[arg(long)]
        config: PathBuf,

        /// Derive and save documents without running any tool.
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },
    /// Create a config document from a template.
    Derive {
        /// Template config file.
        #[arg(long)]
        template: PathBuf,

        /// Document name; the file is `{dir}/{name}.json`.
        #[arg(long)]
        name: String,

        /// Directory the document is written to.
        #[arg(long)]
        dir: PathBuf,

        /// Approved symbols (e.g., FARTCOIN HYPE OP).
        #[arg(long, num_args = 1..)]
        symbols: Vec<String>,

        /// Backtest window length in days.
        #[arg(long)]
        days: Option<i64>,

        /// Window end date (YYYY-MM-DD). Defaults to today.
        #[arg(long)]
        end: Option<String>,

        /// Position-count bounds for both sides. Defaults to the symbol count.
        #[arg(long)]
        n_positions: Option<f64>,
    },
    /// Copy realized parameters from one document into another's bounds.
    Propagate {
        /// Document holding realized parameters in `bot`.
        #[arg(long)]
        source: PathBuf,

        /// Document whose `optimize.bounds` are rewritten and saved.
        #[arg(long)]
        dest: PathBuf,

        /// Widen each range by this fraction around the source value.
        #[arg(long, requires_all = ["widen_min", "widen_max"])]
        widen_pct: Option<f64>,

        /// Lower clamp for widened ranges.
        #[arg(long)]
        widen_min: Option<f64>,

        /// Upper clamp for widened ranges.
        #[arg(long)]
        widen_max: Option<f64>,
    },
    /// Print the most recently modified entry in a directory.
    Newest {
        #[arg(long)]
        dir: PathBuf,

        /// Look for directories instead of files.
        #[arg(long, default_value_t = false)]
        dirs: bool,

        /// Only consider names with this extension (e.g., json).
        #[arg(long)]
        ext: Option<String>,
    },
    /// Print the ideal config path named in an analyzer log.
    Select {
        #[arg(long)]
        log: PathBuf,

        /// Directory relative paths in the log are resolved against.
        #[arg(long, default_value = ".")]
        root: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("tunelab=info".parse()?))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config, dry_run } => run_pipeline(&config, dry_run),
        Commands::Derive {
            template,
            name,
            dir,
            symbols,
            days,
            end,
            n_positions,
        } => run_derive(&template, name, dir, &symbols, days, end.as_deref(), n_positions),
        Commands::Propagate {
            source,
            dest,
            widen_pct,
            widen_min,
            widen_max,
        } => run_propagate(&source, &dest, widen_pct, widen_min, widen_max),
        Commands::Newest { dir, dirs, ext } => run_newest(&dir, dirs, ext.as_deref()),
        Commands::Select { log, root } => run_select(&log, &root),
    }
}

fn run_pipeline(config_path: &Path, dry_run: bool) -> Result<()> {
    let config = RunConfig::from_file(config_path)
        .with_context(|| format!("loading run config {}", config_path.display()))?;
    tracing::info!(config = %config_path.display(), dry_run, "starting run");
    let pipeline = Pipeline::with_process_tools(config);

    // Ctrl-C cancels the run so tools are killed and the lock is released.
    let token = pipeline.cancel_token();
    ctrlc::set_handler(move || {
        eprintln!("\nReceived Ctrl+C, cancelling run...");
        token.cancel();
    })
    .context("installing Ctrl-C handler")?;

    if dry_run {
        let written = pipeline.derive_only()?;
        println!("Derived {} document(s):", written.len());
        for path in written {
            println!("  {}", path.display());
        }
        return Ok(());
    }

    let meta = pipeline.run()?;
    print_summary(&meta);
    Ok(())
}

fn run_derive(
    template: &Path,
    name: String,
    dir: PathBuf,
    symbols: &[String],
    days: Option<i64>,
    end: Option<&str>,
    n_positions: Option<f64>,
) -> Result<()> {
    let mut doc = ConfigDocument::create_from_template(name, dir, template, None)?;
    if !symbols.is_empty() {
        doc.set_symbols(symbols);
    }
    if let Some(days) = days {
        let end = end
            .map(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d"))
            .transpose()
            .context("--end must be YYYY-MM-DD")?;
        doc.set_date_range(days, end)?;
    } else if end.is_some() {
        bail!("--end requires --days");
    }
    let count = n_positions.or((!symbols.is_empty()).then_some(symbols.len() as f64));
    if let Some(count) = count {
        doc.set_optimization_bounds_position_count(count, None)?;
    }
    doc.save()?;
    println!("Saved {}", doc.path().display());
    Ok(())
}

/// Load the document stored at `path`, named by its file stem.
fn document_at(path: &Path) -> Result<ConfigDocument> {
    let name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .with_context(|| format!("{} has no usable file name", path.display()))?;
    let dir = path.parent().unwrap_or(Path::new("."));
    Ok(ConfigDocument::load(name, dir)?)
}

fn run_propagate(
    source: &Path,
    dest: &Path,
    widen_pct: Option<f64>,
    widen_min: Option<f64>,
    widen_max: Option<f64>,
) -> Result<()> {
    let source = document_at(source)?;
    let mut dest = document_at(dest)?;

    let written = match (widen_pct, widen_min, widen_max) {
        (Some(pct), Some(min), Some(max)) => {
            dest.apply_global_bounds_widened(source.body(), &Widen { pct, min, max })
        }
        (None, _, _) => dest.apply_global_bounds(source.body()),
        _ => bail!("--widen-pct needs both --widen-min and --widen-max"),
    };
    if written == 0 {
        println!("Nothing propagated: source has no bot section or destination has no optimize section.");
        return Ok(());
    }
    dest.save()?;
    println!("Wrote {written} bound(s) to {}", dest.path().display());
    Ok(())
}

fn run_newest(dir: &Path, dirs: bool, ext: Option<&str>) -> Result<()> {
    let kind = if dirs { EntryKind::Directory } else { EntryKind::File };
    let newest = match ext {
        Some(ext) => find_newest(dir, has_extension(ext), kind)?,
        None => find_newest(dir, any_name, kind)?,
    };
    println!("{}", newest.display());
    Ok(())
}

fn run_select(log: &Path, root: &Path) -> Result<()> {
    match extract_ideal_config_path(log, root)? {
        Some(path) => {
            println!("{}", path.display());
            Ok(())
        }
        None => bail!("no ideal config named in {}", log.display()),
    }
}

fn print_summary(meta: &RunMeta) {
    println!();
    println!("=== Run Summary ===");
    println!("Run id:         {}", meta.run_id);
    if let Some(version) = &meta.version {
        println!("Version:        {version}");
    }
    println!(
        "Window:         {} .. {}",
        meta.start_date.as_deref().unwrap_or("?"),
        meta.end_date.as_deref().unwrap_or("?")
    );
    println!("Positions:      [{}, {}]", meta.n_positions[0], meta.n_positions[1]);
    println!("Elapsed:        {}", meta.elapsed);
    println!();
    println!("{:<12} {:<10} {}", "Document", "State", "Backtest");
    println!("{}", "-".repeat(58));
    for report in std::iter::once(&meta.portfolio).chain(&meta.symbol_reports) {
        let state = match report.state {
            DocumentState::Pending => "pending",
            DocumentState::Running => "running",
            DocumentState::Completed => "done",
            DocumentState::Failed => "failed",
        };
        let archive = report
            .backtest_archive
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        println!("{:<12} {:<10} {}", report.name, state, archive);
    }
}
