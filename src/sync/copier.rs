//! Per-item diff-and-copy.
//!
//! Work here is synchronous on purpose: one queued unit runs to completion
//! inside a single tick, so nothing in this module yields.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

use super::checksum::{digest_if_exists, file_digest};
use super::resolver::{relative_path, SIDECAR_SUFFIX};
use crate::error::{Result, SyncError};

/// Result of syncing one single-file item.
#[derive(Debug, Clone, PartialEq)]
pub struct FileReport {
    pub copied: bool,
    pub bytes: u64,
    /// Digest of the source as it was copied (or found unchanged).
    pub digest: String,
}

/// Result of syncing one directory item.
#[derive(Debug, Default)]
pub struct DirectoryReport {
    pub copied: usize,
    pub unchanged: usize,
    pub bytes: u64,
    /// Per-file failures. They never abort the rest of the directory.
    pub failures: Vec<SyncError>,
}

impl DirectoryReport {
    pub fn changed(&self) -> bool {
        self.copied > 0
    }
}

/// Mirrors project-relative paths from `project_root` into `destination`.
#[derive(Debug, Clone)]
pub struct Copier {
    project_root: PathBuf,
    destination: PathBuf,
}

impl Copier {
    pub fn new(project_root: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
            destination: destination.into(),
        }
    }

    pub fn source_path(&self, relative: &str) -> PathBuf {
        self.project_root.join(relative)
    }

    pub fn destination_path(&self, relative: &str) -> PathBuf {
        self.destination.join(relative)
    }

    /// Copies one file unless `cached` matches the source and a destination copy exists.
    pub fn sync_file(&self, relative: &str, cached: Option<&str>, force: bool) -> Result<FileReport> {
        let source = self.source_path(relative);
        let target = self.destination_path(relative);

        let digest = file_digest(&source).map_err(|e| copy_error(&source, e))?;

        if !force && cached == Some(digest.as_str()) && target.is_file() {
            debug!("Unchanged: {}", relative);
            return Ok(FileReport {
                copied: false,
                bytes: 0,
                digest,
            });
        }

        let bytes = copy_file(&source, &target)?;
        debug!("Copied {} ({} bytes)", relative, bytes);

        Ok(FileReport {
            copied: true,
            bytes,
            digest,
        })
    }

    /// Copies every member of a directory whose bytes differ from the destination copy.
    pub fn sync_directory(&self, relative: &str, force: bool) -> Result<DirectoryReport> {
        let source_root = self.source_path(relative);
        if !source_root.is_dir() {
            return Err(copy_error(
                &source_root,
                std::io::Error::new(std::io::ErrorKind::NotFound, "directory not found"),
            ));
        }

        let mut report = DirectoryReport::default();

        for entry in WalkDir::new(&source_root) {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!("Skipping unreadable entry under {}: {}", source_root.display(), e);
                    continue;
                }
            };
            if !entry.file_type().is_file() || is_sidecar(entry.path()) {
                continue;
            }

            let Some(member) = relative_path(entry.path(), &self.project_root) else {
                continue;
            };

            match self.sync_member(entry.path(), &member, force) {
                Ok(Some(bytes)) => {
                    report.copied += 1;
                    report.bytes += bytes;
                }
                Ok(None) => report.unchanged += 1,
                Err(e) => {
                    warn!("{}", e);
                    report.failures.push(e);
                }
            }
        }

        Ok(report)
    }

    /// Directory members carry no cached digest: both sides are rehashed.
    fn sync_member(&self, source: &Path, member: &str, force: bool) -> Result<Option<u64>> {
        let target = self.destination_path(member);

        if !force {
            let source_digest = file_digest(source).map_err(|e| copy_error(source, e))?;
            let target_digest = digest_if_exists(&target).map_err(|e| copy_error(&target, e))?;
            if target_digest.as_deref() == Some(source_digest.as_str()) {
                return Ok(None);
            }
        }

        copy_file(source, &target).map(Some)
    }
}

fn copy_file(source: &Path, target: &Path) -> Result<u64> {
    if target.exists() && same_file(source, target) {
        return Err(copy_error(
            target,
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "source and destination are the same file",
            ),
        ));
    }
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(|e| copy_error(parent, e))?;
    }
    fs::copy(source, target).map_err(|e| copy_error(source, e))
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn copy_error(path: &Path, source: std::io::Error) -> SyncError {
    SyncError::Copy {
        path: path.to_path_buf(),
        source,
    }
}

fn is_sidecar(path: &Path) -> bool {
    path.to_str().map(|p| p.ends_with(SIDECAR_SUFFIX)).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct Fixture {
        _project: TempDir,
        _dest: TempDir,
        copier: Copier,
    }

    impl Fixture {
        fn new() -> Self {
            let project = TempDir::new().unwrap();
            let dest = TempDir::new().unwrap();
            let copier = Copier::new(project.path(), dest.path());
            Self {
                _project: project,
                _dest: dest,
                copier,
            }
        }

        fn write(&self, rel: &str, data: &[u8]) {
            let path = self.copier.source_path(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, data).unwrap();
        }
    }

    #[test]
    fn test_file_copied_then_skipped() {
        let fx = Fixture::new();
        fx.write("Assets/a.txt", b"hello");

        let first = fx.copier.sync_file("Assets/a.txt", None, false).unwrap();
        assert!(first.copied);
        assert_eq!(fs::read(fx.copier.destination_path("Assets/a.txt")).unwrap(), b"hello");

        let second = fx.copier.sync_file("Assets/a.txt", Some(&first.digest), false).unwrap();
        assert!(!second.copied);
    }

    #[test]
    fn test_file_recopied_when_destination_missing() {
        let fx = Fixture::new();
        fx.write("Assets/a.txt", b"hello");
        let first = fx.copier.sync_file("Assets/a.txt", None, false).unwrap();
        fs::remove_file(fx.copier.destination_path("Assets/a.txt")).unwrap();

        let again = fx.copier.sync_file("Assets/a.txt", Some(&first.digest), false).unwrap();
        assert!(again.copied);
    }

    #[test]
    fn test_force_copies_unchanged_file() {
        let fx = Fixture::new();
        fx.write("Assets/a.txt", b"hello");
        let first = fx.copier.sync_file("Assets/a.txt", None, false).unwrap();

        let forced = fx.copier.sync_file("Assets/a.txt", Some(&first.digest), true).unwrap();
        assert!(forced.copied);
    }

    #[test]
    fn test_copy_onto_itself_is_refused() {
        let project = TempDir::new().unwrap();
        let copier = Copier::new(project.path(), project.path());
        let source = copier.source_path("Assets/a.txt");
        fs::create_dir_all(source.parent().unwrap()).unwrap();
        fs::write(&source, b"precious").unwrap();

        let err = copier.sync_file("Assets/a.txt", None, true).unwrap_err();
        assert!(matches!(err, SyncError::Copy { .. }));
        assert_eq!(fs::read(&source).unwrap(), b"precious");

        let report = copier.sync_directory("Assets", true).unwrap();
        assert_eq!(report.copied, 0);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(fs::read(&source).unwrap(), b"precious");
    }

    #[test]
    fn test_missing_source_file_is_copy_error() {
        let fx = Fixture::new();
        let err = fx.copier.sync_file("Assets/none.txt", None, false).unwrap_err();
        assert!(matches!(err, SyncError::Copy { .. }));
    }

    #[test]
    fn test_directory_copies_only_differing_members() {
        let fx = Fixture::new();
        fx.write("Assets/Tex/a.png", b"a");
        fx.write("Assets/Tex/b.png", b"b");
        fx.write("Assets/Tex/Sub/c.png", b"c");
        fx.write("Assets/Tex/a.png.meta", b"guid: 1");

        let first = fx.copier.sync_directory("Assets/Tex", false).unwrap();
        assert_eq!((first.copied, first.unchanged), (3, 0));
        assert!(!fx.copier.destination_path("Assets/Tex/a.png.meta").exists());
        assert!(fx.copier.destination_path("Assets/Tex/Sub/c.png").exists());

        fx.write("Assets/Tex/b.png", b"b2");
        let second = fx.copier.sync_directory("Assets/Tex", false).unwrap();
        assert_eq!((second.copied, second.unchanged), (1, 2));
        assert!(second.changed());

        let third = fx.copier.sync_directory("Assets/Tex", false).unwrap();
        assert!(!third.changed());
    }

    #[test]
    fn test_directory_force_copies_everything() {
        let fx = Fixture::new();
        fx.write("Assets/Tex/a.png", b"a");
        fx.write("Assets/Tex/b.png", b"b");
        fx.copier.sync_directory("Assets/Tex", false).unwrap();

        let forced = fx.copier.sync_directory("Assets/Tex", true).unwrap();
        assert_eq!(forced.copied, 2);
    }

    #[test]
    fn test_missing_directory_is_copy_error() {
        let fx = Fixture::new();
        assert!(matches!(
            fx.copier.sync_directory("Assets/Gone", false),
            Err(SyncError::Copy { .. })
        ));
    }
}
