//! TuneLab Core: configuration documents, bounds propagation, artifact
//! discovery, and the external tool runner.
//!
//! This crate holds everything a pipeline stage touches directly:
//! - Config documents with typed mutations and `inf`-tolerant loading
//! - Typed section patches for merging optimizer results
//! - Bounds propagation from realized parameters into search bounds
//! - Newest-artifact discovery with pre-invocation snapshots
//! - External process runner with log sinks, timeouts, and cancellation
//! - Run lock over a shared tool root

pub mod artifact;
pub mod bounds;
pub mod cancel;
pub mod document;
pub mod error;
pub mod fsutil;
pub mod lock;
pub mod tool;

pub use artifact::{find_newest, EntryKind, OutputSnapshot};
pub use bounds::{compute_range, propagate, propagate_with, Range, Widen, PROPAGATED_KEYS};
pub use cancel::CancelToken;
pub use document::{ConfigBody, ConfigDocument, DocumentPatch, PatchRecord, SectionKind, Side};
pub use error::{Error, Result};
pub use lock::{LockHolder, RunLock};
pub use tool::{LogSink, ToolInvocation, ToolRunner};

#[cfg(test)]
mod send_sync_checks {
    use super::*;

    fn assert_send<T: Send>() {}
    fn assert_sync<T: Sync>() {}

    #[test]
    fn document_is_send_sync() {
        assert_send::<ConfigDocument>();
        assert_sync::<ConfigDocument>();
    }

    #[test]
    fn cancel_token_is_send_sync() {
        assert_send::<CancelToken>();
        assert_sync::<CancelToken>();
    }

    #[test]
    fn error_is_send_sync() {
        assert_send::<Error>();
        assert_sync::<Error>();
    }

    #[test]
    fn tool_runner_is_send_sync() {
        assert_send::<ToolRunner>();
        assert_sync::<ToolRunner>();
        assert_send::<ToolInvocation>();
        assert_sync::<ToolInvocation>();
    }
}
