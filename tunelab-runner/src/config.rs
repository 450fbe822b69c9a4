//! TOML run configuration.
//!
//! One file describes a whole portfolio run: where the tool root is, which
//! template to derive from, the symbols to fan out over, bounds overrides,
//! which optional stages run, and how each external tool is invoked.

use std::collections::HashSet;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tunelab_core::{Side, Widen};

/// Content hash identifying a run configuration.
pub type RunId = String;

/// Placeholder substituted with the stage's input path in tool arguments.
pub const INPUT_PLACEHOLDER: &str = "{input}";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse run config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to fingerprint run config: {0}")]
    Fingerprint(#[from] serde_json::Error),
    #[error("invalid run config: {0}")]
    Invalid(String),
}

/// Top-level run configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    /// Portfolio directory under `{root}/configs/`.
    pub name: String,
    /// Tool root: the working directory of every external tool.
    pub root: PathBuf,
    /// Template the portfolio and symbol documents are derived from.
    pub template: PathBuf,
    /// Previous config this run descends from. Recorded, never read.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub starting_config: Option<PathBuf>,
    /// Free-form version tag written to `meta.json`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Load existing documents instead of deriving them from the template.
    #[serde(default)]
    pub resume: bool,
    pub symbols: Vec<String>,
    #[serde(default)]
    pub dates: DateSettings,
    #[serde(default)]
    pub bounds: BoundSettings,
    #[serde(default)]
    pub stages: StageSettings,
    #[serde(default)]
    pub tools: ToolSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DateSettings {
    #[serde(default = "default_days")]
    pub days: i64,
    /// Defaults to today (UTC).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,
    /// Symbol documents backtest over `days * symbol_days_multiplier`.
    #[serde(default = "default_multiplier")]
    pub symbol_days_multiplier: i64,
}

impl Default for DateSettings {
    fn default() -> Self {
        Self {
            days: default_days(),
            end_date: None,
            symbol_days_multiplier: default_multiplier(),
        }
    }
}

fn default_days() -> i64 {
    30
}

fn default_multiplier() -> i64 {
    1
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BoundSettings {
    /// `[min, max]` position count for both sides. Defaults to the symbol
    /// count, pinned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n_positions: Option<[f64; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_wallet_exposure_limit: Option<[f64; 2]>,
    /// Sides excluded from the search.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub disable: Vec<Side>,
    /// Widen symbol bounds around the portfolio's realized values instead of
    /// pinning them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub widen: Option<Widen>,
}

impl BoundSettings {
    /// Position-count range for a run over `symbol_count` symbols.
    pub fn position_count(&self, symbol_count: usize) -> [f64; 2] {
        self.n_positions
            .unwrap_or([symbol_count as f64, symbol_count as f64])
    }
}

/// How a backtest archive directory is named.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotMode {
    /// `YYYY-MM-DD_HH-MM-SS`, one directory per run.
    #[default]
    Timestamp,
    /// `snapshot_label`, overwritten by each run.
    Fixed,
}

/// How the Apply stage brings an optimized result into the working document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplyMode {
    /// Replace only `bot.long` and `bot.short`.
    #[default]
    Merge,
    /// Replace the whole document with the result file.
    Adopt,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StageSettings {
    /// Run the analyzer to pick the ideal candidate.
    #[serde(default = "default_true")]
    pub select_ideal: bool,
    /// Run the per-symbol pipelines after the portfolio.
    #[serde(default = "default_true")]
    pub fan_out: bool,
    #[serde(default)]
    pub apply: ApplyMode,
    #[serde(default)]
    pub snapshot: SnapshotMode,
    #[serde(default = "default_label")]
    pub snapshot_label: String,
    /// Pause after each backtest.
    #[serde(default)]
    pub settle_delay_secs: u64,
}

impl Default for StageSettings {
    fn default() -> Self {
        Self {
            select_ideal: true,
            fan_out: true,
            apply: ApplyMode::default(),
            snapshot: SnapshotMode::default(),
            snapshot_label: default_label(),
            settle_delay_secs: 0,
        }
    }
}

impl StageSettings {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.settle_delay_secs)
    }
}

fn default_true() -> bool {
    true
}

fn default_label() -> String {
    "latest".to_string()
}

/// How to invoke one external tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolCommand {
    pub program: String,
    /// `{input}` is replaced with the stage's input path.
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl ToolCommand {
    pub fn new(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            timeout_secs: None,
        }
    }

    /// Arguments with every `{input}` replaced by `input`.
    pub fn expand_args(&self, input: &Path) -> Vec<OsString> {
        self.args
            .iter()
            .map(|arg| {
                if arg == INPUT_PLACEHOLDER {
                    input.as_os_str().to_os_string()
                } else if arg.contains(INPUT_PLACEHOLDER) {
                    OsString::from(arg.replace(INPUT_PLACEHOLDER, &input.to_string_lossy()))
                } else {
                    OsString::from(arg)
                }
            })
            .collect()
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolSettings {
    #[serde(default = "default_optimizer")]
    pub optimizer: ToolCommand,
    #[serde(default = "default_analyzer")]
    pub analyzer: ToolCommand,
    #[serde(default = "default_backtester")]
    pub backtester: ToolCommand,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            optimizer: default_optimizer(),
            analyzer: default_analyzer(),
            backtester: default_backtester(),
        }
    }
}

fn default_optimizer() -> ToolCommand {
    ToolCommand::new("python", &["src/optimize.py", INPUT_PLACEHOLDER])
}

fn default_analyzer() -> ToolCommand {
    ToolCommand::new("python", &["src/pareto_store.py", INPUT_PLACEHOLDER])
}

fn default_backtester() -> ToolCommand {
    ToolCommand::new(
        "python",
        &["src/backtest.py", INPUT_PLACEHOLDER, "--disable_plotting"],
    )
}

impl RunConfig {
    /// Parse and validate a TOML string.
    pub fn from_toml(s: &str) -> Result<Self, ConfigError> {
        let config: RunConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML file. Relative `root` is resolved against the file's
    /// directory.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml(&content)?;
        if config.root.is_relative() {
            if let Some(parent) = path.parent() {
                config.root = parent.join(&config.root);
            }
        }
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if !is_plain_name(&self.name) {
            return invalid(format!("name '{}' must be a single path component", self.name));
        }
        if self.symbols.is_empty() {
            return invalid("symbols must not be empty".into());
        }
        let mut seen = HashSet::new();
        for symbol in &self.symbols {
            if !is_plain_name(symbol) {
                return invalid(format!("symbol '{symbol}' must be a single path component"));
            }
            if symbol == &self.name {
                return invalid(format!("symbol '{symbol}' collides with the portfolio name"));
            }
            if !seen.insert(symbol.as_str()) {
                return invalid(format!("duplicate symbol '{symbol}'"));
            }
        }
        if self.dates.days <= 0 {
            return invalid(format!("dates.days must be positive, got {}", self.dates.days));
        }
        if self.dates.symbol_days_multiplier <= 0 {
            return invalid(format!(
                "dates.symbol_days_multiplier must be positive, got {}",
                self.dates.symbol_days_multiplier
            ));
        }
        for (key, range) in [
            ("n_positions", self.bounds.n_positions),
            ("total_wallet_exposure_limit", self.bounds.total_wallet_exposure_limit),
        ] {
            if let Some([lo, hi]) = range {
                if !(lo <= hi) {
                    return invalid(format!("bounds.{key} [{lo}, {hi}] has min above max"));
                }
            }
        }
        if let Some(w) = &self.bounds.widen {
            if !(w.pct >= 0.0) || !(w.min <= w.max) {
                return invalid(format!(
                    "bounds.widen needs pct >= 0 and min <= max, got pct={} min={} max={}",
                    w.pct, w.min, w.max
                ));
            }
        }
        if self.stages.snapshot == SnapshotMode::Fixed && !is_plain_name(&self.stages.snapshot_label) {
            return invalid(format!(
                "stages.snapshot_label '{}' must be a single path component",
                self.stages.snapshot_label
            ));
        }
        for (tool, cmd) in [
            ("optimizer", &self.tools.optimizer),
            ("analyzer", &self.tools.analyzer),
            ("backtester", &self.tools.backtester),
        ] {
            if cmd.program.trim().is_empty() {
                return invalid(format!("tools.{tool}.program must not be empty"));
            }
            if cmd.timeout_secs == Some(0) {
                return invalid(format!("tools.{tool}.timeout_secs must be positive"));
            }
        }
        Ok(())
    }

    /// Deterministic hash of the configuration.
    pub fn run_id(&self) -> Result<RunId, ConfigError> {
        let json = serde_json::to_vec(self)?;
        Ok(blake3::hash(&json).to_hex().to_string())
    }

    /// `path` resolved against the tool root when relative.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    pub fn template_path(&self) -> PathBuf {
        self.resolve(&self.template)
    }

    pub fn starting_config_path(&self) -> Option<PathBuf> {
        self.starting_config.as_deref().map(|p| self.resolve(p))
    }

    /// Backtest window length for a symbol document.
    pub fn symbol_days(&self) -> i64 {
        self.dates.days.saturating_mul(self.dates.symbol_days_multiplier)
    }
}

fn is_plain_name(s: &str) -> bool {
    !s.is_empty()
        && s != "."
        && s != ".."
        && !s.contains(['/', '\\'])
        && s.trim() == s
}
