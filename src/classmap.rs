// src/classmap.rs
//! The `classmap` command: enumerate, scan, build, render, publish.

use serde::{
    Deserialize,
    Serialize
};
use std::{
    fs,
    io::ErrorKind,
    path::{
        Path,
        PathBuf
    },
    time::Instant
};
use tracing::{
    debug,
    info,
    warn
};

use crate::{
    builder::AutoloadTables,
    cache::{
        FileStore,
        IncrementalCache
    },
    codegen::{
        self,
        LoaderLayout
    },
    config::EngineConfig,
    error::EngineError,
    rules::AutoloadMappings,
    staging::{
        GeneratedArtifact,
        StagedWriter
    },
    util,
    walker::{
        self,
        ExcludeSet,
        WalkPlan,
        WalkStats
    }
};

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassmapRequest {
    pub project_dir: PathBuf,
    /// Defaults to `<project_dir>/vendor`.
    #[serde(default)]
    pub vendor_dir: Option<PathBuf>,
    /// Defaults to `<vendor_dir>/composer`.
    #[serde(default)]
    pub target_dir: Option<PathBuf>,
    #[serde(default)]
    pub autoload: AutoloadMappings,
    #[serde(default)]
    pub exclude_from_classmap: Vec<String>,
    /// Loader class suffix. Reused from the existing bootstrap when absent.
    #[serde(default)]
    pub suffix: Option<String>,
    #[serde(default)]
    pub staging_suffix: Option<String>,
    #[serde(default)]
    pub has_platform_check: bool,
    #[serde(default)]
    pub has_files_autoload: bool,
    /// When false nothing is written; rendered tables come back inline.
    #[serde(default = "default_true")]
    pub write_files: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClassmapStats {
    #[serde(flatten)]
    pub walk: WalkStats,
    pub walk_ms: u64,
    pub generate_ms: u64,
    pub artifacts_published: usize,
    pub elapsed_ms: u64,
}

/// Rendered tables, returned instead of written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InlineTables {
    pub classmap_file_content: String,
    pub psr4_file_content: String,
    pub namespaces_file_content: String,
    pub files_file_content: String,
    pub static_file_content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassmapResponse {
    pub classmap_count: usize,
    pub files_written: bool,
    pub suffix: String,
    #[serde(flatten)]
    pub contents: Option<InlineTables>,
    pub stats: ClassmapStats,
}

/// Directories resolved once per run.
struct Dirs {
    project: PathBuf,
    vendor: PathBuf,
    target: PathBuf,
}

impl Dirs {
    fn resolve(req: &ClassmapRequest) -> Self {
        let real = |p: &Path| p.canonicalize().unwrap_or_else(|_| p.to_path_buf());
        let project = real(&req.project_dir);
        let vendor = match &req.vendor_dir {
            Some(v) => real(&project.join(v)),
            None => real(&project.join("vendor")),
        };
        let target = match &req.target_dir {
            Some(t) => real(&project.join(t)),
            None => real(&vendor.join("composer")),
        };
        Self { project, vendor, target }
    }
}

/// Run with the on-disk cache in the target directory. Inline runs keep the
/// cache in memory so nothing on disk changes.
pub fn run(req: &ClassmapRequest, config: &EngineConfig) -> Result<ClassmapResponse, EngineError> {
    let dirs = Dirs::resolve(req);
    let mut cache = if req.write_files {
        IncrementalCache::open(Box::new(FileStore::new(dirs.target.join(&config.cache_file_name))))
    } else {
        IncrementalCache::in_memory()
    };

    let response = run_with_cache(req, config, &mut cache)?;
    if let Err(e) = cache.flush() {
        warn!(error = %format!("{e:#}"), "could not persist classmap cache");
    }
    Ok(response)
}

/// Run against a caller-owned cache. The cache is refreshed but not flushed.
pub fn run_with_cache(
    req: &ClassmapRequest,
    config: &EngineConfig,
    cache: &mut IncrementalCache,
) -> Result<ClassmapResponse, EngineError> {
    let start = Instant::now();
    let dirs = Dirs::resolve(req);

    let walk_start = Instant::now();
    let roots = req.autoload.resolved_roots(&dirs.project);
    let excludes = ExcludeSet::new(&req.exclude_from_classmap);
    let plan = WalkPlan {
        roots: &roots,
        excludes: &excludes,
        project_dir: &dirs.project,
        vendor_dir: &dirs.vendor,
        max_file_bytes: config.max_file_bytes,
        threads: config.threads,
    };
    let outcome = walker::enumerate(&plan, cache);
    let walk_ms = util::elapsed_ms(walk_start);

    let generate_start = Instant::now();
    let tables = AutoloadTables::build(&outcome.files, &req.autoload, &dirs.project)?;
    let bootstrap_path = dirs.vendor.join("autoload.php");
    let existing_bootstrap = read_optional(&bootstrap_path)?;
    let suffix = resolve_suffix(req.suffix.as_deref(), existing_bootstrap.as_deref(), &dirs.project);

    let layout = LoaderLayout::new(&dirs.vendor, &dirs.project, &dirs.target);
    let classmap_text = codegen::classmap_file(&tables, &layout);
    let psr4_text = codegen::psr4_file(&tables, &layout);
    let namespaces_text = codegen::namespaces_file(&tables, &layout);
    let files_text = codegen::files_file(&tables, &layout);
    let load_files = req.has_files_autoload || files_text.is_some();
    let static_text = codegen::static_file(&suffix, &tables, &layout, load_files);
    let generate_ms = util::elapsed_ms(generate_start);

    let mut stats = ClassmapStats { walk: outcome.stats, walk_ms, generate_ms, ..ClassmapStats::default() };

    if !req.write_files {
        stats.elapsed_ms = util::elapsed_ms(start);
        info!(classes = tables.classmap.len(), walk_ms, generate_ms, "classmap generated (inline)");
        return Ok(ClassmapResponse {
            classmap_count: tables.classmap.len(),
            files_written: false,
            suffix,
            contents: Some(InlineTables {
                classmap_file_content: classmap_text,
                psr4_file_content: psr4_text,
                namespaces_file_content: namespaces_text,
                files_file_content: files_text.unwrap_or_default(),
                static_file_content: static_text,
            }),
            stats,
        });
    }

    let mut artifacts = vec![
        GeneratedArtifact::new(dirs.target.join("autoload_classmap.php"), classmap_text),
        GeneratedArtifact::new(dirs.target.join("autoload_psr4.php"), psr4_text),
        GeneratedArtifact::new(dirs.target.join("autoload_namespaces.php"), namespaces_text),
    ];
    if let Some(text) = files_text.as_ref() {
        artifacts.push(GeneratedArtifact::new(dirs.target.join("autoload_files.php"), text.clone()));
    }
    artifacts.push(GeneratedArtifact::new(dirs.target.join("autoload_static.php"), static_text));
    artifacts.push(GeneratedArtifact::new(
        dirs.target.join("autoload_real.php"),
        codegen::real_file(&suffix, req.has_platform_check, load_files),
    ));
    if codegen::bootstrap_needs_update(existing_bootstrap.as_deref(), &suffix) {
        artifacts.push(GeneratedArtifact::new(&bootstrap_path, codegen::bootstrap_file(&suffix, &layout)));
    }

    stats.artifacts_published = publish(&artifacts, req.staging_suffix.as_deref().unwrap_or(""))?;
    if files_text.is_none() {
        remove_stale(&dirs.target.join("autoload_files.php"));
    }

    stats.elapsed_ms = util::elapsed_ms(start);
    info!(
        classes = tables.classmap.len(),
        published = stats.artifacts_published,
        walk_skipped = stats.walk.walk_skipped,
        walk_ms,
        generate_ms,
        elapsed_ms = stats.elapsed_ms,
        "classmap published"
    );
    Ok(ClassmapResponse {
        classmap_count: tables.classmap.len(),
        files_written: true,
        suffix,
        contents: None,
        stats,
    })
}

/// Stage everything, then rename into place. Any staging failure discards
/// the whole set before a single final name is touched.
fn publish(artifacts: &[GeneratedArtifact], staging_suffix: &str) -> Result<usize, EngineError> {
    let mut writer = StagedWriter::new(staging_suffix);
    for artifact in artifacts {
        if let Err(e) = writer.stage(artifact) {
            warn!(file = %artifact.file_name(), staged = writer.len(), "staging failed, discarding staged set");
            writer.abort();
            return Err(e);
        }
    }
    if writer.is_empty() {
        return Ok(0);
    }
    writer.commit()
}

fn read_optional(path: &Path) -> Result<Option<String>, EngineError> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(source) => Err(EngineError::Io { path: path.to_path_buf(), source }),
    }
}

fn remove_stale(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!(file = %path.display(), "removed stale table"),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!(file = %path.display(), error = %e, "could not remove stale table"),
    }
}

/// Requested suffix, else the one the current bootstrap uses, else a stable
/// digest of the project directory.
fn resolve_suffix(requested: Option<&str>, bootstrap: Option<&str>, project: &Path) -> String {
    if let Some(s) = requested.filter(|s| !s.is_empty()) {
        return s.to_string();
    }
    if let Some(s) = bootstrap.and_then(codegen::extract_suffix) {
        return s;
    }
    format!("{:x}", md5::compute(util::slash_path(project)))
}
