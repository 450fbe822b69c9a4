//! Artifact discovery in tool output directories.
//!
//! External tools report success only through their exit code. What they
//! produced is found by looking at the directory they write into and picking
//! the most recently modified matching entry.
//!
//! [`OutputSnapshot`] narrows that choice to entries created or touched after
//! the snapshot was taken, so an older artifact with a skewed mtime can never
//! be mistaken for the one the current invocation wrote.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::error::{Error, Result};

/// Entry type an artifact must have.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

impl EntryKind {
    fn matches(self, file_type: fs::FileType) -> bool {
        match self {
            EntryKind::File => file_type.is_file(),
            EntryKind::Directory => file_type.is_dir(),
        }
    }

    fn describe(self) -> &'static str {
        match self {
            EntryKind::File => "file",
            EntryKind::Directory => "directory",
        }
    }
}

/// A directory entry with its modification time.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Candidate {
    path: PathBuf,
    name: String,
    modified: SystemTime,
}

fn list_candidates<P>(directory: &Path, predicate: P, kind: EntryKind) -> Result<Vec<Candidate>>
where
    P: Fn(&str) -> bool,
{
    let entries = fs::read_dir(directory).map_err(|e| Error::io(directory, e))?;
    let mut out = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| Error::io(directory, e))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if !predicate(&name) {
            continue;
        }
        let path = entry.path();
        // Follow symlinks the way `stat` does.
        let meta = match fs::metadata(&path) {
            Ok(m) => m,
            Err(_) => continue,
        };
        if !kind.matches(meta.file_type()) {
            continue;
        }
        let modified = meta.modified().map_err(|e| Error::io(&path, e))?;
        out.push(Candidate {
            path,
            name,
            modified,
        });
    }
    Ok(out)
}

/// Newest by mtime; equal mtimes fall back to the lexically greatest name.
fn newest(candidates: Vec<Candidate>) -> Option<Candidate> {
    candidates
        .into_iter()
        .max_by(|a, b| a.modified.cmp(&b.modified).then_with(|| a.name.cmp(&b.name)))
}

/// Most recently modified entry of `kind` in `directory` whose name satisfies
/// `predicate`.
///
/// Fails with [`Error::NotFound`] when nothing qualifies.
pub fn find_newest<P>(directory: &Path, predicate: P, kind: EntryKind) -> Result<PathBuf>
where
    P: Fn(&str) -> bool,
{
    newest(list_candidates(directory, predicate, kind)?)
        .map(|c| c.path)
        .ok_or_else(|| Error::not_found(format!("matching {}", kind.describe()), directory))
}

/// Predicate matching names with the given extension (`"json"`).
pub fn has_extension(ext: &str) -> impl Fn(&str) -> bool + '_ {
    move |name: &str| {
        Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case(ext))
    }
}

/// Predicate accepting every entry.
pub fn any_name(_: &str) -> bool {
    true
}

/// Entries of a directory as they were before a tool ran.
#[derive(Debug, Clone)]
pub struct OutputSnapshot {
    directory: PathBuf,
    seen: HashMap<PathBuf, SystemTime>,
}

impl OutputSnapshot {
    /// Record the current entries of `directory`. A missing directory is an
    /// empty snapshot.
    pub fn capture(directory: &Path) -> Result<Self> {
        let mut seen = HashMap::new();
        if directory.exists() {
            for kind in [EntryKind::File, EntryKind::Directory] {
                for c in list_candidates(directory, any_name, kind)? {
                    seen.insert(c.path, c.modified);
                }
            }
        }
        Ok(Self {
            directory: directory.to_path_buf(),
            seen,
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Newest matching entry that is new, or modified, since the snapshot.
    pub fn find_newest_since<P>(&self, predicate: P, kind: EntryKind) -> Result<PathBuf>
    where
        P: Fn(&str) -> bool,
    {
        if !self.directory.exists() {
            return Err(Error::not_found("output directory", &self.directory));
        }
        let fresh: Vec<Candidate> = list_candidates(&self.directory, predicate, kind)?
            .into_iter()
            .filter(|c| self.seen.get(&c.path).map_or(true, |&before| c.modified > before))
            .collect();
        newest(fresh).map(|c| c.path).ok_or_else(|| {
            Error::not_found(
                format!("{} written since the tool started", kind.describe()),
                &self.directory,
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn set_mtime(path: &Path, secs_ago: u64) {
        let t = SystemTime::now() - Duration::from_secs(secs_ago);
        let file = fs::File::options()
            .write(true)
            .open(path)
            .or_else(|_| fs::File::open(path))
            .unwrap();
        file.set_modified(t).unwrap();
    }

    #[test]
    fn empty_directory_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = find_newest(dir.path(), any_name, EntryKind::File).unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[test]
    fn missing_directory_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = find_newest(&dir.path().join("nope"), any_name, EntryKind::File).unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[test]
    fn picks_newer_file() {
        let dir = tempfile::tempdir().unwrap();
        let old = dir.path().join("old.json");
        let new = dir.path().join("new.json");
        fs::write(&old, "{}").unwrap();
        fs::write(&new, "{}").unwrap();
        set_mtime(&old, 120);
        set_mtime(&new, 10);

        assert_eq!(find_newest(dir.path(), any_name, EntryKind::File).unwrap(), new);
    }

    #[test]
    fn kind_and_predicate_filter() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("run_dir")).unwrap();
        fs::write(dir.path().join("notes.txt"), "x").unwrap();
        fs::write(dir.path().join("cfg.json"), "{}").unwrap();

        let found = find_newest(dir.path(), has_extension("json"), EntryKind::File).unwrap();
        assert_eq!(found, dir.path().join("cfg.json"));

        let found = find_newest(dir.path(), any_name, EntryKind::Directory).unwrap();
        assert_eq!(found, dir.path().join("run_dir"));

        let err = find_newest(dir.path(), has_extension("bin"), EntryKind::File).unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[test]
    fn snapshot_ignores_preexisting_entries() {
        let dir = tempfile::tempdir().unwrap();
        let stale = dir.path().join("stale.json");
        fs::write(&stale, "{}").unwrap();

        let snapshot = OutputSnapshot::capture(dir.path()).unwrap();
        let err = snapshot
            .find_newest_since(any_name, EntryKind::File)
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));

        // A fresh file wins even if its mtime is older than the stale one.
        let fresh = dir.path().join("fresh.json");
        fs::write(&fresh, "{}").unwrap();
        set_mtime(&fresh, 3600);
        assert_eq!(
            snapshot.find_newest_since(any_name, EntryKind::File).unwrap(),
            fresh
        );
    }

    #[test]
    fn snapshot_of_missing_directory_accepts_everything_later() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("optimize_results");
        let snapshot = OutputSnapshot::capture(&out).unwrap();

        fs::create_dir_all(out.join("2025-01-01T00_00_00_bybit")).unwrap();
        assert_eq!(
            snapshot
                .find_newest_since(any_name, EntryKind::Directory)
                .unwrap(),
            out.join("2025-01-01T00_00_00_bybit")
        );
    }

    #[test]
    fn extension_predicate() {
        let p = has_extension("json");
        assert!(p("a.json"));
        assert!(p("A.JSON"));
        assert!(!p("a.json.bak"));
        assert!(!p("json"));
    }
}
