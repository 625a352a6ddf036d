// src/staging.rs
//! Staged writer: every artifact of a run lands beside its final name first,
//! and only once all of them are on disk are they renamed into place.
//!
//! Renames within one directory are atomic, so a loader running in another
//! process sees either the previous file or the new one, never a torn write.
//! Dropping a writer without committing removes whatever it staged.

use std::{
    fs::{
        self,
        File
    },
    io::{
        ErrorKind,
        Write
    },
    path::{
        Path,
        PathBuf
    }
};
use tracing::{
    debug,
    warn
};

use crate::error::EngineError;

pub const DEFAULT_STAGING_SUFFIX: &str = ".staging";

/// Serialized text for one output file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedArtifact {
    pub target: PathBuf,
    pub contents: String,
}

impl GeneratedArtifact {
    pub fn new(target: impl Into<PathBuf>, contents: impl Into<String>) -> Self {
        Self { target: target.into(), contents: contents.into() }
    }

    /// Final file name, for log fields.
    pub fn file_name(&self) -> String {
        self.target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

#[derive(Debug)]
pub struct StagedWriter {
    suffix: String,
    /// (staged path, final path), in staging order.
    staged: Vec<(PathBuf, PathBuf)>,
}

impl StagedWriter {
    /// An empty suffix falls back to [`DEFAULT_STAGING_SUFFIX`].
    pub fn new(suffix: &str) -> Self {
        let suffix = if suffix.is_empty() { DEFAULT_STAGING_SUFFIX } else { suffix };
        Self { suffix: suffix.to_string(), staged: Vec::new() }
    }

    fn staging_path(&self, target: &Path) -> PathBuf {
        let mut name = target.as_os_str().to_os_string();
        name.push(&self.suffix);
        PathBuf::from(name)
    }

    /// Write `artifact` under its staging name and flush it to disk.
    pub fn stage(&mut self, artifact: &GeneratedArtifact) -> Result<(), EngineError> {
        let staged = self.staging_path(&artifact.target);
        if let Some(parent) = staged.parent() {
            fs::create_dir_all(parent).map_err(|source| EngineError::Io { path: parent.to_path_buf(), source })?;
        }

        let write = || -> std::io::Result<()> {
            let mut file = File::create(&staged)?;
            file.write_all(artifact.contents.as_bytes())?;
            file.sync_all()
        };
        if let Err(source) = write() {
            let _ = fs::remove_file(&staged);
            return Err(EngineError::Io { path: staged, source });
        }

        debug!(file = %staged.display(), bytes = artifact.contents.len(), "staged");
        self.staged.push((staged, artifact.target.clone()));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.staged.len()
    }

    pub fn is_empty(&self) -> bool {
        self.staged.is_empty()
    }

    /// Rename every staged file over its final name. Returns how many were
    /// published.
    ///
    /// A rename failure stops publishing; files renamed before it stay
    /// published and the rest are removed.
    pub fn commit(mut self) -> Result<usize, EngineError> {
        let staged = std::mem::take(&mut self.staged);
        let total = staged.len();
        let mut pending = staged.into_iter();

        while let Some((from, to)) = pending.next() {
            if let Err(source) = fs::rename(&from, &to) {
                let _ = fs::remove_file(&from);
                self.staged = pending.collect();
                return Err(EngineError::Io { path: to, source });
            }
        }
        debug!(files = total, "published staged artifacts");
        Ok(total)
    }

    /// Remove everything staged so far. Final names are left untouched.
    pub fn abort(mut self) {
        self.discard();
    }

    fn discard(&mut self) {
        for (staged, _) in self.staged.drain(..) {
            match fs::remove_file(&staged) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => warn!(file = %staged.display(), error = %e, "could not remove staged file"),
            }
        }
    }
}

impl Drop for StagedWriter {
    fn drop(&mut self) {
        self.discard();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn names(dir: &Path) -> Vec<String> {
        let mut v: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        v.sort();
        v
    }

    #[test]
    fn commit_publishes_every_artifact() {
        let tmp = TempDir::new().unwrap();
        let mut w = StagedWriter::new("");
        w.stage(&GeneratedArtifact::new(tmp.path().join("a.php"), "<?php // a\n")).unwrap();
        w.stage(&GeneratedArtifact::new(tmp.path().join("b.php"), "<?php // b\n")).unwrap();
        assert_eq!(names(tmp.path()), vec!["a.php.staging", "b.php.staging"]);

        assert_eq!(w.commit().unwrap(), 2);
        assert_eq!(names(tmp.path()), vec!["a.php", "b.php"]);
        assert_eq!(fs::read_to_string(tmp.path().join("b.php")).unwrap(), "<?php // b\n");
    }

    #[test]
    fn dropping_uncommitted_writer_keeps_published_files() {
        let tmp = TempDir::new().unwrap();
        let target = tmp.path().join("autoload_classmap.php");
        fs::write(&target, "old").unwrap();

        let mut w = StagedWriter::new(".tmp-run");
        w.stage(&GeneratedArtifact::new(&target, "new")).unwrap();
        assert!(tmp.path().join("autoload_classmap.php.tmp-run").exists());
        drop(w);

        assert_eq!(names(tmp.path()), vec!["autoload_classmap.php"]);
        assert_eq!(fs::read_to_string(&target).unwrap(), "old");
    }

    #[test]
    fn abort_removes_staged_files() {
        let tmp = TempDir::new().unwrap();
        let mut w = StagedWriter::new(".staging");
        w.stage(&GeneratedArtifact::new(tmp.path().join("x.php"), "x")).unwrap();
        assert_eq!(w.len(), 1);
        w.abort();
        assert!(names(tmp.path()).is_empty());
    }

    #[test]
    fn staging_creates_the_target_directory() {
        let tmp = TempDir::new().unwrap();
        let target = tmp.path().join("vendor/composer/autoload_psr4.php");
        let mut w = StagedWriter::new(".staging");
        w.stage(&GeneratedArtifact::new(&target, "psr4")).unwrap();
        w.commit().unwrap();
        assert_eq!(fs::read_to_string(target).unwrap(), "psr4");
    }

    #[test]
    fn artifact_file_name() {
        let a = GeneratedArtifact::new("/p/vendor/composer/autoload_real.php", "");
        assert_eq!(a.file_name(), "autoload_real.php");
    }
}
