//! The external tool seam.
//!
//! The pipeline talks to the optimizer, analyzer and backtester only through
//! [`ExternalTools`]. [`ProcessTools`] spawns the configured commands in the
//! tool root and finds what they wrote via output snapshots; tests substitute
//! fakes that write fixtures directly.

use std::path::{Path, PathBuf};

use tracing::info;
use tunelab_core::artifact::{any_name, EntryKind, OutputSnapshot};
use tunelab_core::{CancelToken, LogSink, Result, ToolInvocation, ToolRunner};

use crate::config::{ToolCommand, ToolSettings};
use crate::paths::ToolRoot;

pub trait ExternalTools {
    /// Optimize the config at `config`; returns the result directory the
    /// optimizer produced.
    fn optimize(&self, config: &Path, log: &Path, cancel: &CancelToken) -> Result<PathBuf>;

    /// Analyze the candidates in `pareto_dir`. The choice is read from `log`
    /// afterwards.
    fn analyze(&self, pareto_dir: &Path, log: &Path, cancel: &CancelToken) -> Result<()>;

    /// Backtest the config at `config`; returns the output directory the
    /// backtester produced.
    fn backtest(&self, config: &Path, log: &Path, cancel: &CancelToken) -> Result<PathBuf>;
}

impl<T: ExternalTools + ?Sized> ExternalTools for &T {
    fn optimize(&self, config: &Path, log: &Path, cancel: &CancelToken) -> Result<PathBuf> {
        (**self).optimize(config, log, cancel)
    }

    fn analyze(&self, pareto_dir: &Path, log: &Path, cancel: &CancelToken) -> Result<()> {
        (**self).analyze(pareto_dir, log, cancel)
    }

    fn backtest(&self, config: &Path, log: &Path, cancel: &CancelToken) -> Result<PathBuf> {
        (**self).backtest(config, log, cancel)
    }
}

/// Runs the real tools as child processes.
#[derive(Debug, Clone)]
pub struct ProcessTools {
    root: ToolRoot,
    settings: ToolSettings,
    runner: ToolRunner,
}

impl ProcessTools {
    pub fn new(root: ToolRoot, settings: ToolSettings) -> Self {
        Self {
            root,
            settings,
            runner: ToolRunner::new(),
        }
    }

    pub fn with_runner(mut self, runner: ToolRunner) -> Self {
        self.runner = runner;
        self
    }

    fn invocation(&self, tool: &str, command: &ToolCommand, input: &Path, log: &Path) -> ToolInvocation {
        ToolInvocation::new(tool, &command.program, self.root.root())
            .args(command.expand_args(input))
            .log_to(LogSink::File(log.to_path_buf()))
            .timeout(command.timeout())
    }

    /// Run `command` and return the newest directory that appeared in
    /// `output_dir` while it ran.
    fn run_for_output(
        &self,
        tool: &str,
        command: &ToolCommand,
        input: &Path,
        log: &Path,
        output_dir: &Path,
        cancel: &CancelToken,
    ) -> Result<PathBuf> {
        let snapshot = OutputSnapshot::capture(output_dir)?;
        self.runner
            .run(&self.invocation(tool, command, input, log), cancel)?;
        let produced = snapshot.find_newest_since(any_name, EntryKind::Directory)?;
        info!(tool, output = %produced.display(), "located tool output");
        Ok(produced)
    }
}

impl ExternalTools for ProcessTools {
    fn optimize(&self, config: &Path, log: &Path, cancel: &CancelToken) -> Result<PathBuf> {
        self.run_for_output(
            "optimizer",
            &self.settings.optimizer,
            config,
            log,
            &self.root.optimize_results(),
            cancel,
        )
    }

    fn analyze(&self, pareto_dir: &Path, log: &Path, cancel: &CancelToken) -> Result<()> {
        self.runner
            .run(&self.invocation("analyzer", &self.settings.analyzer, pareto_dir, log), cancel)?;
        Ok(())
    }

    fn backtest(&self, config: &Path, log: &Path, cancel: &CancelToken) -> Result<PathBuf> {
        self.run_for_output(
            "backtester",
            &self.settings.backtester,
            config,
            log,
            &self.root.backtest_results(),
            cancel,
        )
    }
}
