// src/builder.rs
//! Autoload table builder: merges scan results with the declared rules into
//! the lookup tables the generated loader files are rendered from.

use std::{
    collections::{
        btree_map::Entry,
        BTreeMap,
        HashSet
    },
    path::{
        Path,
        PathBuf
    }
};
use tracing::debug;

use crate::{
    error::EngineError,
    rules::{
        AutoloadMappings,
        NamespaceMapping,
        NamespaceRules
    },
    util,
    walker::ScannedFile
};

/// Prefix → base directories, in declaration order within a prefix.
pub type PrefixTable = Vec<(String, Vec<PathBuf>)>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AutoloadTables {
    /// Fully-qualified name → file, sorted by name.
    pub classmap: BTreeMap<String, PathBuf>,
    /// Sorted by prefix, descending, so longer prefixes are tried first.
    pub psr4: PrefixTable,
    pub psr0: PrefixTable,
    /// Identifier → file, in declaration order.
    pub files: Vec<(String, PathBuf)>,
}

impl AutoloadTables {
    pub fn build(
        scanned: &[ScannedFile],
        mappings: &AutoloadMappings,
        project_dir: &Path,
    ) -> Result<Self, EngineError> {
        for m in &mappings.psr4 {
            if !m.namespace.is_empty() && !m.namespace.ends_with('\\') {
                return Err(EngineError::generation(format!(
                    "psr-4 prefix {:?} must end with a namespace separator",
                    m.namespace
                )));
            }
        }

        let rules = NamespaceRules::resolve(mappings, project_dir);
        let classmap = collect_classmap(scanned, &rules);
        let psr4 = group_prefixes(&mappings.psr4, project_dir);
        let psr0 = group_prefixes(&mappings.psr0, project_dir);

        let mut seen = HashSet::new();
        let files = mappings
            .files
            .iter()
            .map(|f| (f.identifier(), util::resolve_root(project_dir, &f.path)))
            .filter(|(id, _)| seen.insert(id.clone()))
            .collect();

        Ok(Self { classmap, psr4, psr0, files })
    }
}

/// First declaration of a name wins; later duplicates are dropped silently.
fn collect_classmap(scanned: &[ScannedFile], rules: &NamespaceRules) -> BTreeMap<String, PathBuf> {
    let mut classmap = BTreeMap::new();
    let mut rejected = 0usize;
    let mut duplicates = 0usize;

    for file in scanned {
        for symbol in file.symbols() {
            if !rules.admits(&symbol.name, &symbol.path) {
                rejected += 1;
                continue;
            }
            match classmap.entry(symbol.name) {
                Entry::Vacant(slot) => {
                    slot.insert(symbol.path);
                }
                Entry::Occupied(_) => duplicates += 1,
            }
        }
    }

    debug!(entries = classmap.len(), rejected, duplicates, "classmap collected");
    classmap
}

fn group_prefixes(mappings: &[NamespaceMapping], project_dir: &Path) -> PrefixTable {
    let mut table: PrefixTable = Vec::new();
    for m in mappings {
        let dir = util::resolve_root(project_dir, &m.path);
        match table.iter_mut().find(|(prefix, _)| *prefix == m.namespace) {
            Some((_, dirs)) => {
                if !dirs.contains(&dir) {
                    dirs.push(dir);
                }
            }
            None => table.push((m.namespace.clone(), vec![dir])),
        }
    }
    table.sort_by(|a, b| b.0.cmp(&a.0));
    table
}
