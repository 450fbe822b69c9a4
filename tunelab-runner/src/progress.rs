//! Pipeline progress callbacks.

use tracing::{info, warn};
use tunelab_core::PatchRecord;

use crate::meta::{DocumentReport, DocumentState, RunMeta};
use crate::stage::Stage;

/// Receives stage and document events as a run advances.
pub trait PipelineProgress: Send {
    /// Called before a document's first stage. `index` counts from 0 with the
    /// portfolio first.
    fn on_document_start(&self, document: &str, index: usize, total: usize);

    /// Called when `stage` starts on `document`.
    fn on_stage(&self, document: &str, stage: Stage);

    /// Called after optimized parameters were merged into `document`.
    fn on_patch_applied(&self, document: &str, record: &PatchRecord) {
        let _ = (document, record);
    }

    /// Called when a document completes or fails.
    fn on_document_complete(&self, report: &DocumentReport);

    /// Called once when the run ends, successfully or not.
    fn on_run_complete(&self, meta: &RunMeta);
}

/// Reports through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogProgress;

impl PipelineProgress for LogProgress {
    fn on_document_start(&self, document: &str, index: usize, total: usize) {
        info!(document, "[{}/{}] starting pipeline", index + 1, total);
    }

    fn on_stage(&self, document: &str, stage: Stage) {
        info!(document, %stage, "stage started");
    }

    fn on_patch_applied(&self, document: &str, record: &PatchRecord) {
        info!(
            document,
            source = %record.source.display(),
            sections = ?record.changed,
            "optimized parameters applied"
        );
    }

    fn on_document_complete(&self, report: &DocumentReport) {
        match report.state {
            DocumentState::Completed => info!(document = %report.name, "pipeline complete"),
            _ => warn!(
                document = %report.name,
                state = ?report.state,
                error = report.error.as_deref().unwrap_or(""),
                "pipeline did not complete"
            ),
        }
    }

    fn on_run_complete(&self, meta: &RunMeta) {
        info!(
            run_id = %meta.run_id,
            elapsed = %meta.elapsed,
            complete = meta.is_complete(),
            "run finished"
        );
    }
}
