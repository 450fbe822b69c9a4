//! Filesystem layout of a tool root and the documents derived under it.
//!
//! ```text
//! {root}/
//!   optimize_results/            optimizer output (tool-owned)
//!   backtests/combined/          backtester output (tool-owned)
//!   configs/{portfolio}/
//!     {config}.json
//!     meta.json
//!     optimization/{config}/     optimization_log.txt, analyzation_log.txt,
//!                                ideal_config.json, pareto/, ...
//!     backtest/{config}/         backtest_log.txt, {label}/
//! ```

use std::path::{Path, PathBuf};

pub const OPTIMIZATION_LOG: &str = "optimization_log.txt";
pub const ANALYZATION_LOG: &str = "analyzation_log.txt";
pub const BACKTEST_LOG: &str = "backtest_log.txt";
pub const IDEAL_CONFIG: &str = "ideal_config.json";
pub const PARETO_DIR: &str = "pareto";
pub const META_FILE: &str = "meta.json";

/// Paths under the tool root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolRoot {
    root: PathBuf,
}

impl ToolRoot {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn configs(&self) -> PathBuf {
        self.root.join("configs")
    }

    /// Where the optimizer writes one directory per run.
    pub fn optimize_results(&self) -> PathBuf {
        self.root.join("optimize_results")
    }

    /// Where the backtester writes one directory per run.
    pub fn backtest_results(&self) -> PathBuf {
        self.root.join("backtests").join("combined")
    }

    pub fn portfolio_dir(&self, portfolio: &str) -> PathBuf {
        self.configs().join(portfolio)
    }
}

/// Per-document artifact locations inside a portfolio directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentPaths {
    directory: PathBuf,
    name: String,
}

impl DocumentPaths {
    pub fn new(directory: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            directory: directory.into(),
            name: name.into(),
        }
    }

    /// `optimization/{name}`
    pub fn optimization_dir(&self) -> PathBuf {
        self.directory.join("optimization").join(&self.name)
    }

    pub fn optimization_log(&self) -> PathBuf {
        self.optimization_dir().join(OPTIMIZATION_LOG)
    }

    pub fn analyzation_log(&self) -> PathBuf {
        self.optimization_dir().join(ANALYZATION_LOG)
    }

    pub fn pareto_dir(&self) -> PathBuf {
        self.optimization_dir().join(PARETO_DIR)
    }

    pub fn ideal_config(&self) -> PathBuf {
        self.optimization_dir().join(IDEAL_CONFIG)
    }

    /// `backtest/{name}`
    pub fn backtest_dir(&self) -> PathBuf {
        self.directory.join("backtest").join(&self.name)
    }

    pub fn backtest_log(&self) -> PathBuf {
        self.backtest_dir().join(BACKTEST_LOG)
    }

    pub fn backtest_archive(&self, label: &str) -> PathBuf {
        self.backtest_dir().join(label)
    }
}
