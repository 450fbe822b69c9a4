//! Reading the analyzer's choice out of its log.
//!
//! The analyzer prints one line of the form
//! `Closest to ideal: <path> | <metrics...>`; the path is everything between
//! the first `": "` and the first `" | "`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::warn;
use tunelab_core::{Error, Result};

pub const IDEAL_MARKER: &str = "Closest to ideal:";

/// Path named on the first `Closest to ideal:` line, if any.
pub fn parse_ideal_line(log: &str) -> Option<&str> {
    log.lines()
        .find(|line| line.starts_with(IDEAL_MARKER))
        .and_then(|line| line.split(": ").nth(1))
        .and_then(|rest| rest.split(" | ").next())
        .map(str::trim)
        .filter(|p| !p.is_empty())
}

/// Ideal candidate named in the analyzer log at `log_path`.
///
/// A missing log or a log without the marker is `Ok(None)`. Relative paths
/// are resolved against `tool_root`, the analyzer's working directory.
pub fn extract_ideal_config_path(log_path: &Path, tool_root: &Path) -> Result<Option<PathBuf>> {
    let content = match fs::read_to_string(log_path) {
        Ok(c) => c,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            warn!(log = %log_path.display(), "analysis log not found");
            return Ok(None);
        }
        Err(e) => return Err(Error::io(log_path, e)),
    };
    let Some(found) = parse_ideal_line(&content) else {
        warn!(log = %log_path.display(), "no '{IDEAL_MARKER}' line in analysis log");
        return Ok(None);
    };
    let path = Path::new(found);
    Ok(Some(if path.is_absolute() {
        path.to_path_buf()
    } else {
        tool_root.join(path)
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_first_marker_line() {
        let log = "loading...\n\
                   Closest to ideal: optimize_results/x/pareto/abc.json | w_0=0.1 w_1=2\n\
                   Closest to ideal: other.json | ignored\n";
        assert_eq!(parse_ideal_line(log), Some("optimize_results/x/pareto/abc.json"));
    }

    #[test]
    fn marker_must_start_the_line() {
        assert_eq!(parse_ideal_line("  Closest to ideal: a.json | x"), None);
        assert_eq!(parse_ideal_line("nothing here"), None);
        assert_eq!(parse_ideal_line("Closest to ideal: | x"), None);
    }

    #[test]
    fn path_without_metrics() {
        assert_eq!(parse_ideal_line("Closest to ideal: /abs/c.json\r\n"), Some("/abs/c.json"));
    }

    #[test]
    fn extraction_resolves_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("analyzation_log.txt");
        fs::write(&log, "Closest to ideal: pareto/a.json | mdg=1\n").unwrap();
        let found = extract_ideal_config_path(&log, Path::new("/root/tools")).unwrap();
        assert_eq!(found, Some(PathBuf::from("/root/tools/pareto/a.json")));
    }

    #[test]
    fn missing_log_is_no_selection() {
        let dir = tempfile::tempdir().unwrap();
        let found = extract_ideal_config_path(&dir.path().join("absent.txt"), dir.path()).unwrap();
        assert_eq!(found, None);
    }
}
