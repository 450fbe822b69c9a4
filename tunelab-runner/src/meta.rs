//! Run summary written next to the portfolio config as `meta.json`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tunelab_core::fsutil;

use crate::config::{RunConfig, RunId};
use crate::stage::Stage;

/// `HH:MM:SS`, hours unbounded, sub-second part dropped.
pub fn format_duration(elapsed: Duration) -> String {
    let total = elapsed.as_secs();
    format!("{:02}:{:02}:{:02}", total / 3600, (total % 3600) / 60, total % 60)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentState {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Progress of one document through its stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentReport {
    pub name: String,
    pub state: DocumentState,
    /// Last stage that finished.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_stage: Option<Stage>,
    /// Result file the realized parameters were taken from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied_result: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backtest_archive: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DocumentReport {
    pub fn pending(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: DocumentState::Pending,
            completed_stage: None,
            applied_result: None,
            backtest_archive: None,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub run_id: RunId,
    pub template: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub starting_config: Option<PathBuf>,
    pub symbols: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
    pub n_positions: [f64; 2],
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_wallet_exposure_limit: Option<[f64; 2]>,
    pub started_at: DateTime<Utc>,
    /// `HH:MM:SS`
    pub elapsed: String,
    pub portfolio: DocumentReport,
    pub symbol_reports: Vec<DocumentReport>,
}

impl RunMeta {
    pub fn begin(config: &RunConfig, run_id: RunId, portfolio: &str, started_at: DateTime<Utc>) -> Self {
        Self {
            version: config.version.clone(),
            run_id,
            template: config.template_path(),
            starting_config: config.starting_config_path(),
            symbols: config.symbols.clone(),
            start_date: None,
            end_date: None,
            n_positions: config.bounds.position_count(config.symbols.len()),
            total_wallet_exposure_limit: config.bounds.total_wallet_exposure_limit,
            started_at,
            elapsed: format_duration(Duration::ZERO),
            portfolio: DocumentReport::pending(portfolio),
            symbol_reports: if config.stages.fan_out {
                config.symbols.iter().map(DocumentReport::pending).collect()
            } else {
                Vec::new()
            },
        }
    }

    /// True when every document completed.
    pub fn is_complete(&self) -> bool {
        std::iter::once(&self.portfolio)
            .chain(&self.symbol_reports)
            .all(|r| r.state == DocumentState::Completed)
    }

    pub fn write(&self, path: &Path) -> tunelab_core::Result<()> {
        let json = serde_json::to_vec_pretty(self).map_err(|source| tunelab_core::Error::MalformedDocument {
            path: path.to_path_buf(),
            source,
        })?;
        fsutil::atomic_write(path, &json)
    }

    pub fn read(path: &Path) -> tunelab_core::Result<Self> {
        let raw = std::fs::read(path).map_err(|e| tunelab_core::Error::io(path, e))?;
        serde_json::from_slice(&raw).map_err(|source| tunelab_core::Error::MalformedDocument {
            path: path.to_path_buf(),
            source,
        })
    }
}
