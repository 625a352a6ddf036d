// src/walker.rs
//! Path enumerator: turns configured roots into scanned candidate files.
//!
//! Roots are classified first. A directory root whose cached signature is
//! still current is not walked at all; its files come from the cache
//! (vendor files trusted as-is, project files re-stat'd). Every other
//! directory root is walked by one parallel `ignore` walker, whose output is
//! streamed over a channel straight into the scanning pool, so enumeration
//! and scanning overlap.

use ignore::{
    WalkBuilder,
    WalkState
};
use rayon::prelude::*;
use regex::RegexSet;
use serde::Serialize;
use sha1::{
    Digest,
    Sha1
};
use std::{
    collections::{
        BTreeMap,
        HashMap,
        HashSet
    },
    fs,
    io::ErrorKind,
    path::{
        Path,
        PathBuf
    },
    sync::{
        mpsc,
        Mutex
    },
    thread
};
use tracing::{
    debug,
    warn
};

use crate::{
    cache::{
        DirectorySignature,
        FileStamp,
        IncrementalCache
    },
    scanner,
    symbol::{
        Declaration,
        Symbol
    },
    util
};

/// File extensions considered for scanning.
pub const SCAN_EXTENSIONS: &[&str] = &["php"];

/* ----------------------------- excludes ----------------------------- */

/// Compiled `exclude_from_classmap` patterns.
///
/// A pattern is matched against both the absolute slash-separated path and
/// the path relative to the project directory. Invalid patterns are dropped
/// with a warning.
#[derive(Debug, Clone)]
pub struct ExcludeSet {
    patterns: Vec<String>,
    set: RegexSet,
}

impl ExcludeSet {
    pub fn new(patterns: &[String]) -> Self {
        let valid: Vec<String> = patterns
            .iter()
            .filter(|p| match regex::Regex::new(p) {
                Ok(_) => true,
                Err(e) => {
                    warn!(pattern = %p, error = %e, "ignoring invalid exclude pattern");
                    false
                }
            })
            .cloned()
            .collect();
        let set = RegexSet::new(&valid).unwrap_or_else(|e| {
            warn!(error = %e, "exclude patterns too large to compile, excluding nothing");
            RegexSet::empty()
        });
        Self { patterns: valid, set }
    }

    pub fn empty() -> Self {
        Self::new(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn is_excluded(&self, path: &Path, project_dir: &Path) -> bool {
        if self.is_empty() {
            return false;
        }
        self.set.is_match(&util::slash_path(path)) || self.set.is_match(&util::rel_slash(project_dir, path))
    }

    /// Digest of everything that decides which files a walk yields.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha1::new();
        for p in &self.patterns {
            hasher.update(p.as_bytes());
            hasher.update(b"\n");
        }
        hasher.update(b"|");
        hasher.update(SCAN_EXTENSIONS.join(",").as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

fn has_scan_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| SCAN_EXTENSIONS.iter().any(|x| e.eq_ignore_ascii_case(x)))
}

/* ----------------------------- plan & outcome ----------------------------- */

/// Everything one enumeration needs.
#[derive(Debug)]
pub struct WalkPlan<'a> {
    /// Resolved roots, in rule declaration order, without duplicates.
    pub roots: &'a [PathBuf],
    pub excludes: &'a ExcludeSet,
    pub project_dir: &'a Path,
    pub vendor_dir: &'a Path,
    pub max_file_bytes: u64,
    /// Walker threads; 0 lets `ignore` pick.
    pub threads: usize,
}

/// One candidate file with the declarations found in it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedFile {
    pub path: PathBuf,
    /// Index of the root that yielded the file, in declaration order.
    pub root_order: usize,
    pub declarations: Vec<Declaration>,
}

impl ScannedFile {
    /// Declarations bound to this file's path, in source order.
    pub fn symbols(&self) -> impl Iterator<Item = Symbol> + '_ {
        self.declarations
            .iter()
            .map(|d| Symbol::from_declaration(d, &self.path))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WalkStats {
    pub walk_skipped: bool,
    pub files_found: usize,
    pub files_scanned: usize,
    pub cache_hits: usize,
    pub scan_failures: usize,
    pub directories_walked: usize,
}

#[derive(Debug, Default)]
pub struct WalkOutcome {
    /// Sorted by (root order, path); each path appears once.
    pub files: Vec<ScannedFile>,
    pub stats: WalkStats,
}

enum Candidate {
    File { path: PathBuf, order: usize },
    Dir { path: PathBuf, order: usize, mtime_ns: u64 },
    WalkError,
}

enum Outcome {
    Scanned { file: ScannedFile, stamp: FileStamp, fresh: bool },
    Dir { path: PathBuf, order: usize, mtime_ns: u64 },
    Failed,
    Gone,
    WalkError,
}

/* ----------------------------- enumeration ----------------------------- */

/// Enumerate and scan every root of `plan`, refreshing `cache` in place.
pub fn enumerate(plan: &WalkPlan<'_>, cache: &mut IncrementalCache) -> WalkOutcome {
    let fingerprint = plan.excludes.fingerprint();
    let mut stats = WalkStats::default();

    let mut direct: Vec<(PathBuf, usize)> = Vec::new();
    let mut trusted: Vec<ScannedFile> = Vec::new();
    let mut walk_roots: Vec<(PathBuf, usize)> = Vec::new();
    let mut dir_roots = 0usize;

    for (order, root) in plan.roots.iter().enumerate() {
        let meta = match fs::metadata(root) {
            Ok(m) => m,
            Err(e) => {
                debug!(root = %root.display(), error = %e, "autoload root not found, skipping");
                continue;
            }
        };
        if meta.is_file() {
            if has_scan_extension(root) && !plan.excludes.is_excluded(root, plan.project_dir) {
                direct.push((root.clone(), order));
            }
            continue;
        }
        if !meta.is_dir() {
            continue;
        }
        dir_roots += 1;

        let expected = cache
            .directory_signature(root)
            .filter(|sig| sig.rules_fingerprint == fingerprint && sig.is_current())
            .map(|sig| sig.file_count);
        let entries = cache.entries_under(root);
        if expected != Some(entries.len() as u64) {
            walk_roots.push((root.clone(), order));
            continue;
        }

        debug!(root = %root.display(), files = entries.len(), "directory signature current, skipping walk");
        for entry in entries {
            if plan.excludes.is_excluded(&entry.path, plan.project_dir) {
                continue;
            }
            if util::is_under(&entry.path, plan.vendor_dir) {
                stats.cache_hits += 1;
                trusted.push(ScannedFile {
                    path: entry.path,
                    root_order: order,
                    declarations: entry.declarations,
                });
            } else {
                direct.push((entry.path, order));
            }
        }
    }

    stats.walk_skipped = dir_roots > 0 && walk_roots.is_empty();
    stats.directories_walked = walk_roots.len();
    for (root, _) in &walk_roots {
        cache.forget_under(root);
    }

    let outcomes = run_pipeline(plan, &*cache, direct, &walk_roots);

    let mut dirs_by_root: HashMap<usize, BTreeMap<String, u64>> = HashMap::new();
    let mut walk_errors = 0usize;
    let mut scanned: Vec<ScannedFile> = trusted;

    for outcome in outcomes {
        match outcome {
            Outcome::Scanned { file, stamp, fresh } => {
                if fresh {
                    stats.files_scanned += 1;
                } else {
                    stats.cache_hits += 1;
                }
                cache.record(&file.path, stamp, file.declarations.clone());
                scanned.push(file);
            }
            Outcome::Dir { path, order, mtime_ns } => {
                dirs_by_root
                    .entry(order)
                    .or_default()
                    .insert(path.to_string_lossy().into_owned(), mtime_ns);
            }
            Outcome::Failed => stats.scan_failures += 1,
            Outcome::Gone => {}
            Outcome::WalkError => walk_errors += 1,
        }
    }

    if walk_errors == 0 {
        for (root, order) in &walk_roots {
            let dirs = dirs_by_root.remove(order).unwrap_or_default();
            let count = cache.entries_under(root).len() as u64;
            cache.record_directory_signature(DirectorySignature::new(
                root.clone(),
                fingerprint.clone(),
                dirs,
                count,
            ));
        }
    } else {
        warn!(errors = walk_errors, "walk incomplete, directory signatures not recorded");
    }

    let files = dedup_by_path(scanned);
    stats.files_found = files.len() + stats.scan_failures;
    debug!(?stats, "enumeration finished");
    WalkOutcome { files, stats }
}

/// Keep the first root's copy of each path, then order by (root, path).
fn dedup_by_path(scanned: Vec<ScannedFile>) -> Vec<ScannedFile> {
    let mut best: HashMap<PathBuf, ScannedFile> = HashMap::with_capacity(scanned.len());
    for file in scanned {
        match best.get(&file.path) {
            Some(existing) if existing.root_order <= file.root_order => {}
            _ => {
                best.insert(file.path.clone(), file);
            }
        }
    }
    let mut files: Vec<ScannedFile> = best.into_values().collect();
    files.sort_by(|a, b| a.root_order.cmp(&b.root_order).then_with(|| a.path.cmp(&b.path)));
    files
}

/// Producer thread walks and feeds candidates; the rayon pool scans them
/// as they arrive.
fn run_pipeline(
    plan: &WalkPlan<'_>,
    cache: &IncrementalCache,
    direct: Vec<(PathBuf, usize)>,
    walk_roots: &[(PathBuf, usize)],
) -> Vec<Outcome> {
    thread::scope(|scope| {
        let (tx, rx) = mpsc::channel::<Candidate>();
        scope.spawn(move || {
            for (path, order) in direct {
                if tx.send(Candidate::File { path, order }).is_err() {
                    return;
                }
            }
            if !walk_roots.is_empty() {
                walk(plan, walk_roots, &tx);
            }
        });

        rx.into_iter()
            .par_bridge()
            .map(|candidate| match candidate {
                Candidate::File { path, order } => scan_one(path, order, cache, plan.max_file_bytes),
                Candidate::Dir { path, order, mtime_ns } => Outcome::Dir { path, order, mtime_ns },
                Candidate::WalkError => Outcome::WalkError,
            })
            .collect()
    })
}

fn walk(plan: &WalkPlan<'_>, roots: &[(PathBuf, usize)], tx: &mpsc::Sender<Candidate>) {
    let root_orders: HashMap<&Path, usize> = roots.iter().map(|(p, o)| (p.as_path(), *o)).collect();
    let canonical_roots: Vec<PathBuf> = roots
        .iter()
        .map(|(p, _)| p.canonicalize().unwrap_or_else(|_| p.clone()))
        .collect();
    let visited_links: Mutex<HashSet<PathBuf>> = Mutex::new(HashSet::new());

    let mut builder = WalkBuilder::new(&roots[0].0);
    for (root, _) in &roots[1..] {
        builder.add(root);
    }
    builder.standard_filters(false).follow_links(true).threads(plan.threads);

    builder.build_parallel().run(|| {
        let tx = tx.clone();
        let root_orders = &root_orders;
        let canonical_roots = &canonical_roots;
        let visited_links = &visited_links;
        Box::new(move |result| {
            let entry = match result {
                Ok(e) => e,
                // Loops are reported without an I/O error; they are the cycle guard at work.
                Err(err) if err.io_error().is_none() => {
                    debug!(error = %err, "not following path");
                    return WalkState::Continue;
                }
                Err(err) => {
                    warn!(error = %err, "skipping unreadable path");
                    let _ = tx.send(Candidate::WalkError);
                    return WalkState::Continue;
                }
            };
            let path = entry.path();
            let Some(order) = path
                .ancestors()
                .nth(entry.depth())
                .and_then(|root| root_orders.get(root))
                .copied()
            else {
                return WalkState::Continue;
            };
            let Some(ft) = entry.file_type() else {
                return WalkState::Continue;
            };

            if ft.is_dir() {
                if entry.depth() > 0 && entry.path_is_symlink() {
                    let Ok(target) = path.canonicalize() else {
                        return WalkState::Skip;
                    };
                    let inside_root = canonical_roots.iter().any(|r| util::is_under(&target, r));
                    let first_visit = visited_links.lock().map(|mut v| v.insert(target)).unwrap_or(false);
                    if inside_root || !first_visit {
                        debug!(link = %path.display(), "symlinked directory already covered, not descending");
                        return WalkState::Skip;
                    }
                }
                let mtime_ns = entry.metadata().map(|m| util::mtime_nanos(&m)).unwrap_or(0);
                let _ = tx.send(Candidate::Dir { path: path.to_path_buf(), order, mtime_ns });
                return WalkState::Continue;
            }

            if ft.is_file() && has_scan_extension(path) && !plan.excludes.is_excluded(path, plan.project_dir) {
                let _ = tx.send(Candidate::File { path: path.to_path_buf(), order });
            }
            WalkState::Continue
        })
    });
}

/// Stat, consult the cache, and scan one file. Never propagates errors.
fn scan_one(path: PathBuf, order: usize, cache: &IncrementalCache, max_file_bytes: u64) -> Outcome {
    let meta = match fs::metadata(&path) {
        Ok(m) => m,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!(path = %path.display(), "cached file no longer exists");
            return Outcome::Gone;
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cannot stat file");
            return Outcome::Failed;
        }
    };
    let stamp = FileStamp::from_metadata(&meta);

    if let Some(hit) = cache.lookup(&path, stamp) {
        return Outcome::Scanned {
            file: ScannedFile { path, root_order: order, declarations: hit.declarations },
            stamp,
            fresh: false,
        };
    }

    if stamp.size > max_file_bytes {
        warn!(path = %path.display(), size = stamp.size, budget = max_file_bytes, "file exceeds scan budget, skipping");
        return Outcome::Failed;
    }

    let bytes = match fs::read(&path) {
        Ok(b) => b,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cannot read file");
            return Outcome::Failed;
        }
    };
    let declarations = if scanner::may_declare_types(&bytes) {
        scanner::scan_source(&bytes)
    } else {
        Vec::new()
    };

    Outcome::Scanned {
        file: ScannedFile { path, root_order: order, declarations },
        stamp,
        fresh: true,
    }
}
