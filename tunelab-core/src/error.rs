//! Error taxonomy shared by every pipeline stage.

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

/// Errors from documents, artifact discovery, and external tools.
#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {what} ({})", path.display())]
    NotFound { what: String, path: PathBuf },

    #[error("malformed document {}: {source}", path.display())]
    MalformedDocument {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("{tool} exited with {}", exit_code.map_or_else(|| "a signal".to_string(), |c| format!("code {c}")))]
    ToolFailure { tool: String, exit_code: Option<i32> },

    #[error("{tool} timed out after {}s", after.as_secs())]
    Timeout { tool: String, after: Duration },

    #[error("run cancelled")]
    Cancelled,

    #[error("another run holds the lock at {}", path.display())]
    Locked { path: PathBuf },

    #[error("date range of {days} days before {end} is out of range")]
    InvalidDateRange { days: i64, end: chrono::NaiveDate },

    #[error("invalid bounds for {key}: [{lo}, {hi}]")]
    InvalidBounds { key: String, lo: f64, hi: f64 },

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn not_found(what: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Error::NotFound {
            what: what.into(),
            path: path.into(),
        }
    }

    /// Wrap an I/O error, mapping `ErrorKind::NotFound` onto [`Error::NotFound`].
    pub fn io(path: &Path, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            return Error::not_found("path", path);
        }
        Error::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_not_found_becomes_not_found() {
        let err = Error::io(
            Path::new("/missing"),
            std::io::Error::from(std::io::ErrorKind::NotFound),
        );
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[test]
    fn tool_failure_message_names_the_code() {
        let err = Error::ToolFailure {
            tool: "backtester".into(),
            exit_code: Some(2),
        };
        assert_eq!(err.to_string(), "backtester exited with code 2");

        let killed = Error::ToolFailure {
            tool: "optimizer".into(),
            exit_code: None,
        };
        assert_eq!(killed.to_string(), "optimizer exited with a signal");
    }
}
