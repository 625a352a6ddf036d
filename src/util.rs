// src/util.rs

use std::{
    collections::HashSet,
    fs::Metadata,
    hash::Hash,
    path::{
        Component,
        Path,
        PathBuf
    },
    time::{
        Instant,
        SystemTime,
        UNIX_EPOCH
    }
};

/// Modified time → UNIX nanoseconds. Falls back to created(), then 0.
pub fn mtime_nanos(meta: &Metadata) -> u64 {
    fn nanos(t: SystemTime) -> Option<u64> {
        t.duration_since(UNIX_EPOCH)
            .ok()
            .and_then(|d| u64::try_from(d.as_nanos()).ok())
    }
    meta.modified()
        .ok()
        .and_then(nanos)
        .or_else(|| meta.created().ok().and_then(nanos))
        .unwrap_or(0)
}

/// Path as a forward-slash string; the form used in cache keys and tables.
pub fn slash_path(p: &Path) -> String {
    p.to_string_lossy().replace('\\', "/")
}

/// `path` relative to `root`, slash-normalized. Falls back to the full path.
pub fn rel_slash(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    slash_path(rel)
}

/// Resolve a configured root against the project directory.
///
/// Absolute paths without `..` are taken as-is (no syscall). Anything else is
/// joined onto `base` and canonicalized when it exists.
pub fn resolve_root(base: &Path, raw: &str) -> PathBuf {
    let p = Path::new(raw);
    let has_parent_ref = p.components().any(|c| matches!(c, Component::ParentDir));
    if p.is_absolute() && !has_parent_ref {
        return p.to_path_buf();
    }
    let joined = if p.is_absolute() { p.to_path_buf() } else { base.join(p) };
    joined.canonicalize().unwrap_or(joined)
}

/// Is `path` equal to or below `dir`? Component-wise, so `/a/bc` is not under `/a/b`.
pub fn is_under(path: &Path, dir: &Path) -> bool {
    path.starts_with(dir)
}

pub fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

pub fn dedup_preserve_order<T: Eq + Hash + Clone>(mut v: Vec<T>) -> Vec<T> {
    let mut seen = HashSet::with_capacity(v.len());
    v.retain(|s| seen.insert(s.clone()));
    v
}
