// src/cache.rs
//! Incremental cache: per-file declarations keyed by (mtime, size), plus
//! per-root directory signatures that let a repeat run skip enumeration.
//!
//! The cache is loaded once when a run starts and flushed once when it ends,
//! through an injected [`CacheStore`]. Anything wrong with the stored bytes
//! (missing, unreadable, corrupt, other schema) yields a cold cache; it is
//! never an error. Concurrent writers are not coordinated: two engines
//! flushing the same cache file race, and the last rename wins.

use anyhow::{
    Context,
    Result
};
use rayon::prelude::*;
use serde::{
    Deserialize,
    Serialize
};
use std::{
    collections::BTreeMap,
    fs::{
        self,
        Metadata
    },
    io::{
        ErrorKind,
        Write
    },
    path::{
        Path,
        PathBuf
    },
    sync::Mutex
};
use tracing::{
    debug,
    warn
};

use crate::{
    symbol::Declaration,
    util
};

/// Bump whenever the stored layout or the scanner's output changes meaning.
pub const CACHE_SCHEMA: u32 = 4;

/* ----------------------------- stores ----------------------------- */

/// Backing storage for the serialized cache.
pub trait CacheStore: Send + Sync {
    /// Stored bytes, or `None` when nothing has been stored yet.
    fn load(&self) -> Result<Option<Vec<u8>>>;
    /// Replace the stored bytes in one step.
    fn persist(&self, bytes: &[u8]) -> Result<()>;
    /// Human-readable location, for diagnostics.
    fn describe(&self) -> String;
}

/// Cache file on disk, replaced atomically via a sibling temp file.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CacheStore for FileStore {
    fn load(&self) -> Result<Option<Vec<u8>>> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("reading cache {}", self.path.display())),
        }
    }

    fn persist(&self, bytes: &[u8]) -> Result<()> {
        let parent = self.path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;

        let mut tmp = tempfile::NamedTempFile::new_in(parent)
            .with_context(|| format!("creating temp file in {}", parent.display()))?;
        tmp.write_all(bytes).context("writing cache temp file")?;
        tmp.persist(&self.path)
            .with_context(|| format!("replacing {}", self.path.display()))?;
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// In-memory store; used when there is no target directory, and in tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    bytes: Mutex<Option<Vec<u8>>>,
}

impl MemoryStore {
    pub fn with_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes: Mutex::new(Some(bytes)) }
    }

    #[cfg(test)]
    pub fn contents(&self) -> Option<Vec<u8>> {
        self.bytes.lock().ok().and_then(|b| b.clone())
    }
}

impl CacheStore for MemoryStore {
    fn load(&self) -> Result<Option<Vec<u8>>> {
        let guard = self
            .bytes
            .lock()
            .map_err(|_| anyhow::anyhow!("memory cache store poisoned"))?;
        Ok(guard.clone())
    }

    fn persist(&self, bytes: &[u8]) -> Result<()> {
        let mut guard = self
            .bytes
            .lock()
            .map_err(|_| anyhow::anyhow!("memory cache store poisoned"))?;
        *guard = Some(bytes.to_vec());
        Ok(())
    }

    fn describe(&self) -> String {
        "<memory>".to_string()
    }
}

impl<S: CacheStore + ?Sized> CacheStore for std::sync::Arc<S> {
    fn load(&self) -> Result<Option<Vec<u8>>> {
        (**self).load()
    }

    fn persist(&self, bytes: &[u8]) -> Result<()> {
        (**self).persist(bytes)
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/* ----------------------------- records ----------------------------- */

/// The change-detection key for one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStamp {
    pub mtime_ns: u64,
    pub size: u64,
}

impl FileStamp {
    pub fn from_metadata(meta: &Metadata) -> Self {
        Self {
            mtime_ns: util::mtime_nanos(meta),
            size: meta.len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct FileRecord {
    #[serde(flatten)]
    stamp: FileStamp,
    #[serde(default)]
    declarations: Vec<Declaration>,
}

/// One cached file and the declarations it contained when last scanned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub path: PathBuf,
    pub stamp: FileStamp,
    pub declarations: Vec<Declaration>,
}

impl CacheEntry {
    fn from_record(key: &str, rec: &FileRecord) -> Self {
        Self {
            path: PathBuf::from(key),
            stamp: rec.stamp,
            declarations: rec.declarations.clone(),
        }
    }
}

/// Conservative fingerprint of one enumerated root: the mtime of every
/// directory seen under it, plus how many candidate files it held and the
/// rules it was enumerated with. The file count is checked against the
/// cached entries before the walk is skipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectorySignature {
    pub root: PathBuf,
    pub file_count: u64,
    /// Digest of the exclusion patterns and extensions used for the walk.
    pub rules_fingerprint: String,
    pub directories: BTreeMap<String, u64>,
}

impl DirectorySignature {
    pub fn new(
        root: PathBuf,
        rules_fingerprint: String,
        directories: BTreeMap<String, u64>,
        file_count: u64,
    ) -> Self {
        Self {
            root,
            file_count,
            rules_fingerprint,
            directories,
        }
    }

    /// True when every recorded directory still exists with the same mtime.
    /// A zero mtime never matches.
    pub fn is_current(&self) -> bool {
        if self.directories.is_empty() {
            return false;
        }
        self.directories.par_iter().all(|(dir, &recorded)| {
            recorded != 0
                && fs::metadata(dir)
                    .ok()
                    .filter(Metadata::is_dir)
                    .map(|m| util::mtime_nanos(&m))
                    == Some(recorded)
        })
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheData {
    schema: u32,
    #[serde(default)]
    files: BTreeMap<String, FileRecord>,
    #[serde(default)]
    directories: BTreeMap<String, DirectorySignature>,
}

/* ----------------------------- cache ----------------------------- */

pub struct IncrementalCache {
    store: Box<dyn CacheStore>,
    data: CacheData,
    cold: bool,
    dirty: bool,
}

fn key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

impl IncrementalCache {
    /// Load from `store`. Never fails; an unusable store starts a cold cache.
    pub fn open(store: Box<dyn CacheStore>) -> Self {
        let loaded = match store.load() {
            Ok(Some(bytes)) => match serde_json::from_slice::<CacheData>(&bytes) {
                Ok(data) if data.schema == CACHE_SCHEMA => Some(data),
                Ok(data) => {
                    warn!(
                        store = %store.describe(),
                        found = data.schema,
                        expected = CACHE_SCHEMA,
                        "cache schema mismatch, starting cold"
                    );
                    None
                }
                Err(e) => {
                    warn!(store = %store.describe(), error = %e, "cache unreadable, starting cold");
                    None
                }
            },
            Ok(None) => {
                debug!(store = %store.describe(), "no cache yet");
                None
            }
            Err(e) => {
                warn!(store = %store.describe(), error = %format!("{e:#}"), "cache load failed, starting cold");
                None
            }
        };

        let cold = loaded.is_none();
        let data = loaded.unwrap_or_else(|| CacheData {
            schema: CACHE_SCHEMA,
            ..CacheData::default()
        });
        debug!(files = data.files.len(), roots = data.directories.len(), cold, "cache opened");
        Self { store, data, cold, dirty: cold }
    }

    pub fn in_memory() -> Self {
        Self::open(Box::new(MemoryStore::default()))
    }

    pub fn is_cold(&self) -> bool {
        self.cold
    }

    pub fn len(&self) -> usize {
        self.data.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.files.is_empty()
    }

    /// Cached entry for `path`, only if both mtime and size still match.
    pub fn lookup(&self, path: &Path, stamp: FileStamp) -> Option<CacheEntry> {
        let k = key(path);
        self.data
            .files
            .get(&k)
            .filter(|rec| rec.stamp == stamp)
            .map(|rec| CacheEntry::from_record(&k, rec))
    }

    pub fn record(&mut self, path: &Path, stamp: FileStamp, declarations: Vec<Declaration>) {
        let rec = FileRecord { stamp, declarations };
        let k = key(path);
        if self.data.files.get(&k) != Some(&rec) {
            self.data.files.insert(k, rec);
            self.dirty = true;
        }
    }

    /// Every cached file at or below `root`, in path order.
    pub fn entries_under(&self, root: &Path) -> Vec<CacheEntry> {
        let prefix = key(root);
        self.data
            .files
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .filter(|(k, _)| util::is_under(Path::new(k.as_str()), root))
            .map(|(k, rec)| CacheEntry::from_record(k, rec))
            .collect()
    }

    /// Drop every file entry at or below `root`; a fresh walk replaces them.
    pub fn forget_under(&mut self, root: &Path) {
        let doomed: Vec<String> = self
            .entries_under(root)
            .into_iter()
            .map(|e| key(&e.path))
            .collect();
        if !doomed.is_empty() {
            self.dirty = true;
        }
        for k in doomed {
            self.data.files.remove(&k);
        }
    }

    pub fn directory_signature(&self, root: &Path) -> Option<&DirectorySignature> {
        self.data.directories.get(&key(root))
    }

    pub fn record_directory_signature(&mut self, signature: DirectorySignature) {
        let k = key(&signature.root);
        if self.data.directories.get(&k) != Some(&signature) {
            self.data.directories.insert(k, signature);
            self.dirty = true;
        }
    }

    /// Persist through the store if anything changed since load.
    pub fn flush(&mut self) -> Result<()> {
        if !self.dirty {
            debug!(store = %self.store.describe(), "cache unchanged, not flushing");
            return Ok(());
        }
        self.data.schema = CACHE_SCHEMA;
        let bytes = serde_json::to_vec(&self.data).context("serializing cache")?;
        self.store
            .persist(&bytes)
            .with_context(|| format!("persisting cache to {}", self.store.describe()))?;
        self.dirty = false;
        debug!(store = %self.store.describe(), files = self.data.files.len(), bytes = bytes.len(), "cache flushed");
        Ok(())
    }
}
