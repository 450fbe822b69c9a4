//! Typed view over the four document sections.
//!
//! Only the fields the pipeline reads or writes are typed. Every other key is
//! kept in the section's `extra` map and written back unchanged.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::bounds::Range;

/// Flat mapping of named numeric parameters for one trade side.
pub type SideParams = BTreeMap<String, f64>;

/// Search bounds keyed by `{side}_{parameter}`.
pub type Bounds = BTreeMap<String, Range>;

/// The whole configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backtest: Option<BacktestSection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot: Option<BotSection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub live: Option<LiveSection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optimize: Option<OptimizeSection>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Backtest window and account settings.
///
/// Dates are kept as strings: templates may say `"now"` instead of a date.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BacktestSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub starting_balance: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exchanges: Option<Vec<String>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl BacktestSection {
    pub const DATE_FORMAT: &'static str = "%Y-%m-%d";

    /// `(start_date, end_date)` when both are `YYYY-MM-DD` dates.
    pub fn date_range(&self) -> Option<(NaiveDate, NaiveDate)> {
        let parse = |s: &Option<String>| {
            s.as_deref()
                .and_then(|d| NaiveDate::parse_from_str(d, Self::DATE_FORMAT).ok())
        };
        Some((parse(&self.start_date)?, parse(&self.end_date)?))
    }
}

/// Realized parameters, one set per side.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BotSection {
    #[serde(default)]
    pub long: SideParams,
    #[serde(default)]
    pub short: SideParams,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl BotSection {
    pub fn side(&self, side: Side) -> &SideParams {
        match side {
            Side::Long => &self.long,
            Side::Short => &self.short,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LiveSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_coins: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coin_flags: Option<BTreeMap<String, String>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptimizeSection {
    #[serde(default)]
    pub bounds: Bounds,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iters: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub population_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mutation_probability: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crossover_probability: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scoring: Option<Vec<String>>,
    /// Acceptability limits. Values may be the string `"inf"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limits: Option<Map<String, Value>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Trade side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub const ALL: [Side; 2] = [Side::Long, Side::Short];

    pub fn as_str(self) -> &'static str {
        match self {
            Side::Long => "long",
            Side::Short => "short",
        }
    }

    /// Bounds key for a parameter on this side: `long_n_positions`.
    pub fn bound_key(self, param: &str) -> String {
        format!("{}_{param}", self.as_str())
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "long" => Ok(Side::Long),
            "short" => Ok(Side::Short),
            other => Err(format!("unknown side '{other}' (expected long or short)")),
        }
    }
}
