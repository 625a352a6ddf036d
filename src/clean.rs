// src/clean.rs
//! `clean`: remove package directories in parallel.

use rayon::prelude::*;
use serde::{
    Deserialize,
    Serialize
};
use std::{
    fs,
    io::ErrorKind,
    path::PathBuf,
    time::Instant
};
use tracing::{
    debug,
    info
};

use crate::util;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanTarget {
    pub path: PathBuf,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedTarget {
    pub name: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanReport {
    pub cleaned: usize,
    pub failed: Vec<FailedTarget>,
    pub elapsed_ms: u64,
}

/// A path that is already gone counts as cleaned.
pub fn run(targets: &[CleanTarget]) -> CleanReport {
    let start = Instant::now();
    let results: Vec<Result<(), FailedTarget>> = targets
        .par_iter()
        .map(|t| {
            remove_tree(t).map_err(|e| FailedTarget { name: t.name.clone(), error: e.to_string() })
        })
        .collect();

    let mut report = CleanReport::default();
    for r in results {
        match r {
            Ok(()) => report.cleaned += 1,
            Err(f) => report.failed.push(f),
        }
    }
    report.elapsed_ms = util::elapsed_ms(start);
    info!(cleaned = report.cleaned, failed = report.failed.len(), elapsed_ms = report.elapsed_ms, "clean finished");
    report
}

fn remove_tree(target: &CleanTarget) -> std::io::Result<()> {
    let meta = match fs::symlink_metadata(&target.path) {
        Ok(m) => m,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    let res = if meta.is_dir() { fs::remove_dir_all(&target.path) } else { fs::remove_file(&target.path) };
    match res {
        Ok(()) => {
            debug!(name = %target.name, path = %target.path.display(), "removed");
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn target(path: PathBuf, name: &str) -> CleanTarget {
        CleanTarget { path, name: name.to_string() }
    }

    #[test]
    fn removes_trees_and_counts_absent_paths() {
        let tmp = TempDir::new().unwrap();
        let pkg = tmp.path().join("acme/util");
        fs::create_dir_all(pkg.join("src/deep")).unwrap();
        fs::write(pkg.join("src/deep/Foo.php"), "<?php class Foo {}").unwrap();
        let stray = tmp.path().join("stray.lock");
        fs::write(&stray, "x").unwrap();

        let report = run(&[
            target(pkg.clone(), "acme/util"),
            target(tmp.path().join("never/there"), "ghost/pkg"),
            target(stray.clone(), "stray"),
        ]);

        assert_eq!(report.cleaned, 3);
        assert!(report.failed.is_empty());
        assert!(!pkg.exists());
        assert!(!stray.exists());
    }

    #[test]
    fn empty_input() {
        let report = run(&[]);
        assert_eq!(report.cleaned, 0);
        assert!(report.failed.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn unremovable_target_is_reported_by_name() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = TempDir::new().unwrap();
        let parent = tmp.path().join("locked");
        let pkg = parent.join("pkg");
        fs::create_dir_all(&pkg).unwrap();
        fs::set_permissions(&parent, fs::Permissions::from_mode(0o555)).unwrap();

        let report = run(&[target(pkg.clone(), "locked/pkg")]);
        fs::set_permissions(&parent, fs::Permissions::from_mode(0o755)).unwrap();

        // Running as root bypasses directory permissions.
        if pkg.exists() {
            assert_eq!(report.cleaned, 0);
            assert_eq!(report.failed[0].name, "locked/pkg");
            assert!(!report.failed[0].error.is_empty());
        } else {
            assert_eq!(report.cleaned, 1);
        }
    }

    #[test]
    fn report_serializes_with_protocol_keys() {
        let report = CleanReport {
            cleaned: 1,
            failed: vec![FailedTarget { name: "a/b".into(), error: "denied".into() }],
            elapsed_ms: 3,
        };
        let v = serde_json::to_value(report).unwrap();
        assert_eq!(
            v,
            serde_json::json!({"cleaned": 1, "failed": [{"name": "a/b", "error": "denied"}], "elapsed_ms": 3})
        );
    }
}
