//! Staged file writes
//!
//! Content is written to a temporary sibling of the target and renamed over
//! it once complete, so readers never observe a half-written store file.
//! The temporary file is removed if the write is abandoned.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Guard for a temporary file that is removed on drop unless committed
#[derive(Debug)]
pub(crate) struct StagedFile {
    staging: PathBuf,
    target: PathBuf,
    committed: bool,
}

impl StagedFile {
    /// Path of the temporary file
    pub(crate) fn staging_path(&self) -> &Path {
        &self.staging
    }

    /// Renames the staged file over the target.
    pub(crate) fn commit(mut self) -> io::Result<()> {
        fs::rename(&self.staging, &self.target)?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if !self.committed {
            // Silently ignore errors during cleanup
            let _ = fs::remove_file(&self.staging);
        }
    }
}

/// Writes `content` to a temporary file next to `target`.
///
/// The staging file name is unique (ULID based) and lives in the target's
/// directory so the final rename stays on one filesystem.
pub(crate) fn stage(target: &Path, content: &[u8]) -> io::Result<StagedFile> {
    let directory = target.parent().unwrap_or_else(|| Path::new("."));
    let file_name = target
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("store");

    let ulid = ulid::Ulid::new();
    let staging = directory.join(format!(".{}.{}.tmp", file_name, ulid));

    let guard = StagedFile {
        staging,
        target: target.to_path_buf(),
        committed: false,
    };

    let mut file = File::create(guard.staging_path())?;
    file.write_all(content)?;
    file.sync_all()?;

    Ok(guard)
}

/// Stages `content` and commits it over `target` in one step.
pub(crate) fn write_atomically(target: &Path, content: &[u8]) -> io::Result<()> {
    stage(target, content)?.commit()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_replaces_target() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("dating_episodes.json");
        fs::write(&target, "old").unwrap();

        write_atomically(&target, b"new").unwrap();

        assert_eq!(fs::read_to_string(&target).unwrap(), "new");
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_uncommitted_stage_is_cleaned_up() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("dating_episodes.json");

        let staging = {
            let staged = stage(&target, b"content").unwrap();
            let staging = staged.staging_path().to_path_buf();
            assert!(staging.exists());
            staging
            // staged is dropped here
        };

        assert!(!staging.exists());
        assert!(!target.exists());
    }

    #[test]
    fn test_staging_names_unique() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("a.json");

        let first = stage(&target, b"1").unwrap();
        let second = stage(&target, b"2").unwrap();
        assert_ne!(first.staging_path(), second.staging_path());
    }

    #[test]
    fn test_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("missing").join("a.json");
        assert!(write_atomically(&target, b"x").is_err());
    }
}
