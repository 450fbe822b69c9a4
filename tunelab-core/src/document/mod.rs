//! Configuration documents: identity, load/save, and typed mutations.
//!
//! A document is identified by `(name, directory)` and lives at
//! `{directory}/{name}.json`. Mutations only touch the in-memory body;
//! nothing reaches disk until [`ConfigDocument::save`].

pub mod fixup;
pub mod patch;
pub mod schema;

use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use tracing::{debug, info};

use crate::bounds::{self, Range, Widen};
use crate::error::{Error, Result};
use crate::fsutil;

pub use fixup::fix_json;
pub use patch::{DocumentPatch, PatchRecord, SectionKind, SectionPatch};
pub use schema::{
    BacktestSection, BotSection, Bounds, ConfigBody, LiveSection, OptimizeSection, Side,
    SideParams,
};

/// Flag string linking a portfolio's live config to a per-symbol config file.
pub fn symbol_flags(symbol: &str) -> String {
    format!("-lm n -sm n -lc {symbol}.json")
}

/// Read and parse a configuration file, repairing bare `inf` tokens first.
pub fn read_body(path: &Path) -> Result<ConfigBody> {
    debug!(path = %path.display(), "loading config");
    let raw = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    serde_json::from_str(&fix_json(&raw)).map_err(|source| Error::MalformedDocument {
        path: path.to_path_buf(),
        source,
    })
}

/// Serialize `body` as 2-space indented JSON destined for `path`.
pub fn render_body(path: &Path, body: &ConfigBody) -> Result<String> {
    serde_json::to_string_pretty(body).map_err(|source| Error::MalformedDocument {
        path: path.to_path_buf(),
        source,
    })
}

/// A named configuration document.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigDocument {
    name: String,
    directory: PathBuf,
    body: ConfigBody,
    /// Document this one was derived from. Informational only.
    starting_path: Option<PathBuf>,
}

impl ConfigDocument {
    /// In-memory document; nothing is read from or written to disk.
    pub fn new(name: impl Into<String>, directory: impl Into<PathBuf>, body: ConfigBody) -> Self {
        Self {
            name: name.into(),
            directory: directory.into(),
            body,
            starting_path: None,
        }
    }

    /// Derive a document from a template file.
    ///
    /// `starting_path` is recorded as lineage and does not change the content.
    pub fn create_from_template(
        name: impl Into<String>,
        directory: impl Into<PathBuf>,
        template_path: &Path,
        starting_path: Option<&Path>,
    ) -> Result<Self> {
        let body = read_body(template_path)?;
        let mut doc = Self::new(name, directory, body);
        doc.starting_path = starting_path.map(Path::to_path_buf);
        info!(name = %doc.name, template = %template_path.display(), "derived config from template");
        Ok(doc)
    }

    /// Load an existing document from its canonical path.
    pub fn load(name: impl Into<String>, directory: impl Into<PathBuf>) -> Result<Self> {
        let mut doc = Self::new(name, directory, ConfigBody::default());
        doc.reload()?;
        Ok(doc)
    }

    /// Re-read the canonical path into memory.
    pub fn reload(&mut self) -> Result<()> {
        self.body = read_body(&self.path())?;
        Ok(())
    }

    /// Write the document to its canonical path, replacing any previous file.
    pub fn save(&self) -> Result<()> {
        let path = self.path();
        fsutil::atomic_write(&path, render_body(&path, &self.body)?.as_bytes())?;
        info!(path = %path.display(), "saved config");
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// `{directory}/{name}.json`
    pub fn path(&self) -> PathBuf {
        self.directory.join(format!("{}.json", self.name))
    }

    pub fn starting_path(&self) -> Option<&Path> {
        self.starting_path.as_deref()
    }

    pub fn body(&self) -> &ConfigBody {
        &self.body
    }

    /// Bounds for `key`, if the document has an `optimize` section holding it.
    pub fn bound(&self, key: &str) -> Option<Range> {
        self.body.optimize.as_ref()?.bounds.get(key).copied()
    }

    pub fn set_symbols(&mut self, symbols: &[String]) {
        if let Some(live) = self.body.live.as_mut() {
            live.approved_coins = Some(symbols.to_vec());
        }
    }

    /// Point the live config at the per-symbol document `{symbol}.json`.
    pub fn link_symbol_instrument(&mut self, symbol: &str) {
        if let Some(live) = self.body.live.as_mut() {
            live.coin_flags
                .get_or_insert_with(Default::default)
                .insert(symbol.to_string(), symbol_flags(symbol));
        }
    }

    /// Set the backtest window to the `days` days ending today (UTC).
    pub fn set_date_range(&mut self, days: i64, end_override: Option<NaiveDate>) -> Result<()> {
        let end = end_override.unwrap_or_else(|| chrono::Utc::now().date_naive());
        self.set_date_range_ending(days, end)
    }

    /// Set `end_date = end` and `start_date = end − days`.
    pub fn set_date_range_ending(&mut self, days: i64, end: NaiveDate) -> Result<()> {
        let Some(backtest) = self.body.backtest.as_mut() else {
            return Ok(());
        };
        let start = chrono::Duration::try_days(days)
            .and_then(|d| end.checked_sub_signed(d))
            .ok_or(Error::InvalidDateRange { days, end })?;
        backtest.start_date = Some(start.format(BacktestSection::DATE_FORMAT).to_string());
        backtest.end_date = Some(end.format(BacktestSection::DATE_FORMAT).to_string());
        Ok(())
    }

    /// Set the position-count bounds of both sides to `[min, max.unwrap_or(min)]`.
    pub fn set_optimization_bounds_position_count(&mut self, min: f64, max: Option<f64>) -> Result<()> {
        let range = Range::checked("n_positions", min, max.unwrap_or(min))?;
        self.set_optimization_bounds("n_positions", range);
        Ok(())
    }

    /// Set `long_{param}` and `short_{param}` to `range`.
    pub fn set_optimization_bounds(&mut self, param: &str, range: Range) {
        if let Some(optimize) = self.body.optimize.as_mut() {
            for side in Side::ALL {
                optimize.bounds.insert(side.bound_key(param), range);
            }
        }
    }

    /// Exclude `side` from the search by pinning its position count and
    /// exposure limit to `[0, 0]`.
    pub fn disable_optimization(&mut self, side: Side) {
        if let Some(optimize) = self.body.optimize.as_mut() {
            optimize
                .bounds
                .insert(side.bound_key("n_positions"), Range::DISABLED);
            optimize
                .bounds
                .insert(side.bound_key("total_wallet_exposure_limit"), Range::DISABLED);
        }
    }

    /// Pin this document's bounds to `source`'s realized parameters.
    pub fn apply_global_bounds(&mut self, source: &ConfigBody) -> usize {
        bounds::propagate(source, &mut self.body)
    }

    /// Like [`ConfigDocument::apply_global_bounds`], widened around each value.
    pub fn apply_global_bounds_widened(&mut self, source: &ConfigBody, widen: &Widen) -> usize {
        bounds::propagate_with(source, &mut self.body, Some(widen))
    }

    /// Apply a typed patch and report what it changed.
    pub fn apply_patch(&mut self, patch: DocumentPatch) -> PatchRecord {
        patch.apply_to(&mut self.body)
    }

    /// Replace `bot.long` / `bot.short` with those of the document at
    /// `result_path`. Returns `None` (and changes nothing) when the result has
    /// no `bot` section.
    pub fn apply_optimized_result(&mut self, result_path: &Path) -> Result<Option<PatchRecord>> {
        let result = read_body(result_path)?;
        let Some(patch) = DocumentPatch::realized_parameters(result_path, &result) else {
            info!(result = %result_path.display(), "optimized result has no bot section, nothing applied");
            return Ok(None);
        };
        let record = self.apply_patch(patch);
        info!(name = %self.name, result = %result_path.display(), "applied optimized parameters");
        Ok(Some(record))
    }

    /// Replace the whole document with the file at `result_path`: copy it over
    /// the canonical path and reload. The record lists the sections that
    /// changed.
    pub fn adopt_optimized_config(&mut self, result_path: &Path) -> Result<PatchRecord> {
        // Parse first so a malformed result never lands on the canonical path.
        read_body(result_path)?;
        let before = self.body.clone();
        fsutil::copy_file(result_path, &self.path())?;
        self.reload()?;
        info!(name = %self.name, result = %result_path.display(), "adopted optimized config");
        Ok(PatchRecord {
            source: result_path.to_path_buf(),
            changed: SectionKind::changed_between(&before, &self.body),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn template() -> ConfigBody {
        serde_json::from_value(json!({
            "backtest": {"exchanges": ["bybit"], "starting_balance": 1000},
            "bot": {
                "long": {"n_positions": 3.0, "total_wallet_exposure_limit": 1.5},
                "short": {"n_positions": 1.0, "total_wallet_exposure_limit": 0.5}
            },
            "live": {"approved_coins": [], "coin_flags": {}},
            "optimize": {"bounds": {
                "long_n_positions": [1, 5],
                "short_n_positions": [1, 5],
                "long_total_wallet_exposure_limit": [0, 2],
                "short_total_wallet_exposure_limit": [0, 2]
            }}
        }))
        .unwrap()
    }

    fn doc() -> ConfigDocument {
        ConfigDocument::new("config", "/tmp/unused", template())
    }

    #[test]
    fn canonical_path() {
        assert_eq!(doc().path(), PathBuf::from("/tmp/unused/config.json"));
    }

    #[test]
    fn set_symbols_replaces_list() {
        let mut d = doc();
        d.set_symbols(&["HYPE".into(), "OP".into()]);
        assert_eq!(
            d.body().live.as_ref().unwrap().approved_coins.as_deref(),
            Some(&["HYPE".to_string(), "OP".to_string()][..])
        );
    }

    #[test]
    fn mutations_without_section_are_noops() {
        let mut d = ConfigDocument::new("bare", "/tmp", ConfigBody::default());
        d.set_symbols(&["OP".into()]);
        d.link_symbol_instrument("OP");
        d.set_date_range(30, None).unwrap();
        d.set_optimization_bounds_position_count(2.0, None).unwrap();
        d.disable_optimization(Side::Long);
        assert_eq!(d.body(), &ConfigBody::default());
    }

    #[test]
    fn link_symbol_writes_flag_string() {
        let mut d = doc();
        d.link_symbol_instrument("HYPE");
        let flags = d.body().live.as_ref().unwrap().coin_flags.as_ref().unwrap();
        assert_eq!(flags["HYPE"], "-lm n -sm n -lc HYPE.json");
    }

    #[test]
    fn date_range_counts_back_from_end() {
        let mut d = doc();
        let end = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        d.set_date_range(30, Some(end)).unwrap();
        let bt = d.body().backtest.as_ref().unwrap();
        assert_eq!(bt.end_date.as_deref(), Some("2025-03-01"));
        assert_eq!(bt.start_date.as_deref(), Some("2025-01-30"));
    }

    #[test]
    fn position_count_defaults_max_to_min() {
        let mut d = doc();
        d.set_optimization_bounds_position_count(3.0, None).unwrap();
        assert_eq!(d.bound("long_n_positions"), Some(Range::pinned(3.0)));
        assert_eq!(d.bound("short_n_positions"), Some(Range::pinned(3.0)));
    }

    #[test]
    fn position_count_rejects_inverted_range() {
        let mut d = doc();
        let err = d.set_optimization_bounds_position_count(4.0, Some(2.0)).unwrap_err();
        assert!(matches!(err, Error::InvalidBounds { .. }));
        assert_eq!(d.bound("long_n_positions"), Range::new(1.0, 5.0));
    }

    #[test]
    fn disable_leaves_other_side() {
        let mut d = doc();
        d.disable_optimization(Side::Short);
        assert_eq!(d.bound("short_n_positions"), Some(Range::DISABLED));
        assert_eq!(d.bound("short_total_wallet_exposure_limit"), Some(Range::DISABLED));
        assert_eq!(d.bound("long_n_positions"), Range::new(1.0, 5.0));
        assert_eq!(d.bound("long_total_wallet_exposure_limit"), Range::new(0.0, 2.0));
    }

    #[test]
    fn global_bounds_from_portfolio() {
        let portfolio = template();
        let mut d = doc();
        d.apply_global_bounds(&portfolio);
        assert_eq!(d.bound("long_n_positions"), Some(Range::pinned(3.0)));
        assert_eq!(
            d.bound("short_total_wallet_exposure_limit"),
            Some(Range::pinned(0.5))
        );
    }

    #[test]
    fn widened_global_bounds() {
        let portfolio = template();
        let mut d = doc();
        let widen = Widen {
            pct: 0.2,
            min: 0.0,
            max: 1.6,
        };
        d.apply_global_bounds_widened(&portfolio, &widen);
        let twel = d.bound("long_total_wallet_exposure_limit").unwrap();
        assert!((twel.lo() - 1.2).abs() < 1e-9);
        assert_eq!(twel.hi(), 1.6);
    }
}
