//! TuneLab Runner: run configuration and the optimize/backtest pipeline.
//!
//! This crate builds on `tunelab-core` to provide:
//! - TOML run configuration with validation and a content-hash run id
//! - The tool-root and per-document filesystem layout
//! - The `ExternalTools` seam and its child-process implementation
//! - Ideal-candidate extraction from analyzer logs
//! - The per-document stage machine and the portfolio pipeline with fan-out
//! - `meta.json` run summaries and progress callbacks

pub mod config;
pub mod meta;
pub mod paths;
pub mod pipeline;
pub mod progress;
pub mod selection;
pub mod stage;
pub mod tools;

pub use config::{
    ApplyMode, BoundSettings, ConfigError, DateSettings, RunConfig, RunId, SnapshotMode, StageSettings,
    ToolCommand, ToolSettings,
};
pub use meta::{format_duration, DocumentReport, DocumentState, RunMeta};
pub use paths::{DocumentPaths, ToolRoot};
pub use pipeline::{Pipeline, RunError, PORTFOLIO_DOCUMENT};
pub use progress::{LogProgress, PipelineProgress};
pub use selection::{extract_ideal_config_path, parse_ideal_line};
pub use stage::Stage;
pub use tools::{ExternalTools, ProcessTools};

#[cfg(test)]
mod send_sync_checks {
    use super::*;

    fn assert_send<T: Send>() {}
    fn assert_sync<T: Sync>() {}

    #[test]
    fn config_types_are_send_sync() {
        assert_send::<RunConfig>();
        assert_sync::<RunConfig>();
        assert_send::<ToolSettings>();
        assert_sync::<ToolSettings>();
    }

    #[test]
    fn run_error_is_send_sync() {
        assert_send::<RunError>();
        assert_sync::<RunError>();
    }

    #[test]
    fn summaries_are_send_sync() {
        assert_send::<RunMeta>();
        assert_sync::<RunMeta>();
        assert_send::<Stage>();
    }

    #[test]
    fn process_tools_are_send() {
        assert_send::<ProcessTools>();
        assert_send::<Pipeline<ProcessTools>>();
    }
}
