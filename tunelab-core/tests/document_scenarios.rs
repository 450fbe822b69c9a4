//! BDD scenarios for config documents on disk.
//!
//! These tests verify:
//! - Deriving from a template and persisting bounds
//! - Propagating a portfolio's realized parameters into bounds
//! - Loading the optimizer's `inf` output
//! - Merging optimized results into a working document

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::json;
use tunelab_core::document::{ConfigDocument, SectionKind};
use tunelab_core::{Error, Range};

fn write_json(path: &Path, value: &serde_json::Value) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, serde_json::to_string_pretty(value).unwrap()).unwrap();
}

fn template_at(dir: &Path) -> PathBuf {
    let path = dir.join("templates/bybit.json");
    write_json(
        &path,
        &json!({
            "backtest": {"exchanges": ["bybit"], "starting_balance": 1000, "start_date": "2021-01-01", "end_date": "now"},
            "bot": {
                "long": {"n_positions": 1.0, "total_wallet_exposure_limit": 1.0},
                "short": {"n_positions": 1.0, "total_wallet_exposure_limit": 1.0}
            },
            "live": {"approved_coins": [], "coin_flags": {}, "user": "bybit_01"},
            "optimize": {
                "bounds": {"long_n_positions": [1, 5], "short_n_positions": [1, 5]},
                "iters": 1000,
                "scoring": ["mdg", "sharpe_ratio"]
            }
        }),
    );
    path
}

#[test]
fn bdd_scenario_position_count_bounds_survive_save_and_load() {
    // GIVEN a template with long_n_positions = [1, 5]
    let dir = tempfile::tempdir().unwrap();
    let template = template_at(dir.path());

    let configs = dir.path().join("configs/bybit");
    let mut doc = ConfigDocument::create_from_template("config", &configs, &template, None).unwrap();

    // WHEN the position count is bounded to [2, 4] and the document is saved and reloaded
    doc.set_optimization_bounds_position_count(2.0, Some(4.0)).unwrap();
    doc.save().unwrap();
    let loaded = ConfigDocument::load("config", &configs).unwrap();

    // THEN both sides carry [2, 4]
    assert_eq!(loaded.bound("long_n_positions"), Range::new(2.0, 4.0));
    assert_eq!(loaded.bound("short_n_positions"), Range::new(2.0, 4.0));
    assert_eq!(loaded.path(), configs.join("config.json"));
}

#[test]
fn bdd_scenario_date_range_replaces_now() {
    // GIVEN a template whose end_date is "now"
    let dir = tempfile::tempdir().unwrap();
    let template = template_at(dir.path());
    let mut doc = ConfigDocument::create_from_template("config", dir.path(), &template, None).unwrap();

    // WHEN a 30 day range ending 2025-01-31 is set
    let end = chrono::NaiveDate::from_ymd_opt(2025, 1, 31).unwrap();
    doc.set_date_range(30, Some(end)).unwrap();

    // THEN both dates are concrete
    let bt = doc.body().backtest.as_ref().unwrap();
    assert_eq!(bt.start_date.as_deref(), Some("2025-01-01"));
    assert_eq!(bt.end_date.as_deref(), Some("2025-01-31"));
}

#[test]
fn bdd_scenario_global_bounds_pin_to_portfolio_values() {
    // GIVEN a portfolio whose realized long n_positions is 3
    let dir = tempfile::tempdir().unwrap();
    let portfolio_path = dir.path().join("config.json");
    write_json(
        &portfolio_path,
        &json!({"bot": {"long": {"n_positions": 3}, "short": {"n_positions": 1}}}),
    );
    let portfolio = ConfigDocument::load("config", dir.path()).unwrap();

    // AND a symbol document with an optimize section
    let symbol_path = dir.path().join("HYPE.json");
    write_json(
        &symbol_path,
        &json!({"optimize": {"bounds": {"long_n_positions": [1, 10]}}}),
    );
    let mut symbol = ConfigDocument::load("HYPE", dir.path()).unwrap();

    // WHEN global bounds are applied
    symbol.apply_global_bounds(portfolio.body());

    // THEN the symbol's bounds are pinned to the portfolio's values
    assert_eq!(symbol.bound("long_n_positions"), Some(Range::pinned(3.0)));
    assert_eq!(symbol.bound("short_n_positions"), Some(Range::pinned(1.0)));
}

#[test]
fn bdd_scenario_load_optimizer_output_with_inf() {
    // GIVEN a file written by the optimizer with bare inf limits
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("result.json"),
        "{\n  \"optimize\": {\n    \"bounds\": {},\n    \"limits\": {\"lower_bound_drawdown_worst\": inf, \"lower_bound_loss_profit_ratio\": 0.5}\n  }\n}\n",
    )
    .unwrap();

    // WHEN it is loaded
    let doc = ConfigDocument::load("result", dir.path()).unwrap();

    // THEN the infinite limit is the string "inf"
    let limits = doc.body().optimize.as_ref().unwrap().limits.as_ref().unwrap();
    assert_eq!(limits["lower_bound_drawdown_worst"], json!("inf"));
    assert_eq!(limits["lower_bound_loss_profit_ratio"], json!(0.5));
}

#[test]
fn bdd_scenario_missing_and_malformed_documents() {
    let dir = tempfile::tempdir().unwrap();

    let err = ConfigDocument::load("absent", dir.path()).unwrap_err();
    assert!(matches!(err, Error::NotFound { .. }));

    fs::write(dir.path().join("broken.json"), "{\"bot\": ").unwrap();
    let err = ConfigDocument::load("broken", dir.path()).unwrap_err();
    assert!(matches!(err, Error::MalformedDocument { .. }));
}

#[test]
fn bdd_scenario_apply_optimized_result_replaces_only_bot_sides() {
    // GIVEN a working document and an optimizer result with different live settings
    let dir = tempfile::tempdir().unwrap();
    write_json(
        &dir.path().join("config.json"),
        &json!({
            "bot": {"long": {"n_positions": 1, "ema_span_0": 100}, "short": {"n_positions": 1}},
            "live": {"approved_coins": ["OP"]}
        }),
    );
    let result_path = dir.path().join("optimization/config/ideal_config.json");
    write_json(
        &result_path,
        &json!({
            "bot": {"long": {"n_positions": 4}, "short": {"n_positions": 2}},
            "live": {"approved_coins": ["BTC", "ETH"]}
        }),
    );
    let mut doc = ConfigDocument::load("config", dir.path()).unwrap();

    // WHEN the result is applied
    let record = doc.apply_optimized_result(&result_path).unwrap().unwrap();

    // THEN bot sides are replaced wholesale and live is untouched
    assert_eq!(record.changed, vec![SectionKind::Bot]);
    assert_eq!(record.source, result_path);
    let bot = doc.body().bot.as_ref().unwrap();
    assert_eq!(bot.long.get("n_positions"), Some(&4.0));
    assert!(!bot.long.contains_key("ema_span_0"));
    assert_eq!(
        doc.body().live.as_ref().unwrap().approved_coins.as_deref(),
        Some(&["OP".to_string()][..])
    );

    // AND nothing was written to disk yet
    let on_disk = ConfigDocument::load("config", dir.path()).unwrap();
    assert_eq!(on_disk.body().bot.as_ref().unwrap().long.get("n_positions"), Some(&1.0));
}

#[test]
fn bdd_scenario_result_without_bot_is_ignored() {
    let dir = tempfile::tempdir().unwrap();
    write_json(&dir.path().join("config.json"), &json!({"bot": {"long": {"n_positions": 1}}}));
    write_json(&dir.path().join("result.json"), &json!({"live": {}}));
    let mut doc = ConfigDocument::load("config", dir.path()).unwrap();
    let before = doc.clone();

    let record = doc.apply_optimized_result(&dir.path().join("result.json")).unwrap();
    assert!(record.is_none());
    assert_eq!(doc, before);
}

#[test]
fn bdd_scenario_adopt_optimized_config_replaces_document() {
    let dir = tempfile::tempdir().unwrap();
    write_json(&dir.path().join("config.json"), &json!({"live": {"approved_coins": ["OP"]}}));
    let ideal = dir.path().join("ideal_config.json");
    write_json(&ideal, &json!({"bot": {"long": {"n_positions": 2}, "short": {}}}));

    let mut doc = ConfigDocument::load("config", dir.path()).unwrap();
    let record = doc.adopt_optimized_config(&ideal).unwrap();

    assert_eq!(record.source, ideal);
    assert_eq!(record.changed, vec![SectionKind::Bot, SectionKind::Live]);
    assert!(doc.body().live.is_none());
    assert_eq!(doc.body().bot.as_ref().unwrap().long.get("n_positions"), Some(&2.0));
    let on_disk = ConfigDocument::load("config", dir.path()).unwrap();
    assert_eq!(on_disk, doc);
}

#[test]
fn bdd_scenario_starting_path_is_lineage_only() {
    let dir = tempfile::tempdir().unwrap();
    let template = dir.path().join("template.json");
    write_json(&template, &json!({"live": {"approved_coins": []}}));
    let starting = dir.path().join("previous.json");
    write_json(&starting, &json!({"live": {"approved_coins": ["SHOULD_NOT_APPEAR"]}}));

    let doc = ConfigDocument::create_from_template("config", dir.path(), &template, Some(&starting)).unwrap();
    assert_eq!(doc.starting_path(), Some(starting.as_path()));
    assert_eq!(
        doc.body().live.as_ref().unwrap().approved_coins.as_deref(),
        Some(&[][..])
    );
}
