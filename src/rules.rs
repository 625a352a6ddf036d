// src/rules.rs
//! Autoload rules as declared by packages and the project, and the
//! namespace-compliance filter applied to discovered symbols.

use serde::{
    Deserialize,
    Serialize
};
use std::path::{
    Path,
    PathBuf
};

use crate::util;

/// The `autoload` section of a classmap request, already merged across
/// packages (package order first, then the project).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoloadMappings {
    #[serde(default, rename = "psr-4")]
    pub psr4: Vec<NamespaceMapping>,
    #[serde(default, rename = "psr-0")]
    pub psr0: Vec<NamespaceMapping>,
    #[serde(default)]
    pub classmap: Vec<String>,
    #[serde(default)]
    pub files: Vec<FileAutoload>,
}

/// One prefix → base directory entry. A prefix mapped to several
/// directories appears once per directory, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceMapping {
    pub namespace: String,
    pub path: String,
}

/// A file required unconditionally at bootstrap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAutoload {
    /// Precomputed identifier; derived from package + relative path when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package: Option<String>,
    /// Path relative to the package root, as declared.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relative_path: Option<String>,
    pub path: String,
}

impl FileAutoload {
    /// md5 of `"<package>:<relative path>"`; the root package is `__root__`.
    pub fn identifier(&self) -> String {
        if let Some(id) = &self.identifier {
            return id.clone();
        }
        let package = self.package.as_deref().unwrap_or("__root__");
        let relative = self.relative_path.as_deref().unwrap_or(&self.path);
        format!("{:x}", md5::compute(format!("{package}:{relative}")))
    }
}

impl AutoloadMappings {
    /// Every enumeration root, psr-4 then psr-0 then classmap, as declared.
    pub fn roots(&self) -> impl Iterator<Item = &str> {
        self.psr4
            .iter()
            .map(|m| m.path.as_str())
            .chain(self.psr0.iter().map(|m| m.path.as_str()))
            .chain(self.classmap.iter().map(String::as_str))
    }

    /// Roots resolved against `project_dir`, first occurrence kept.
    pub fn resolved_roots(&self, project_dir: &Path) -> Vec<PathBuf> {
        let resolved = self.roots().map(|r| util::resolve_root(project_dir, r)).collect();
        util::dedup_preserve_order(resolved)
    }
}

/* ----------------------------- compliance ----------------------------- */

/// Resolved rule bases used to decide whether a discovered symbol belongs in
/// the classmap. Paths are kept as slash strings so prefix tests are plain
/// string comparisons.
#[derive(Debug, Clone, Default)]
pub struct NamespaceRules {
    psr4: Vec<(String, String)>,
    psr0: Vec<(String, String)>,
    classmap: Vec<String>,
}

impl NamespaceRules {
    pub fn resolve(mappings: &AutoloadMappings, project_dir: &Path) -> Self {
        let base = |raw: &str| util::slash_path(&util::resolve_root(project_dir, raw));
        Self {
            psr4: mappings.psr4.iter().map(|m| (m.namespace.clone(), base(&m.path))).collect(),
            psr0: mappings.psr0.iter().map(|m| (m.namespace.clone(), base(&m.path))).collect(),
            classmap: mappings.classmap.iter().map(|c| base(c)).collect(),
        }
    }

    /// Should `class`, found in `file`, be published?
    ///
    /// Classmap roots admit everything. Otherwise the longest matching psr-4
    /// base decides, then the longest psr-0 base. Files under no rule are
    /// admitted.
    pub fn admits(&self, class: &str, file: &Path) -> bool {
        let file = util::slash_path(file);

        for dir in &self.classmap {
            if file == *dir || file.starts_with(&dir_prefix(dir)) {
                return true;
            }
        }

        if let Some((ns, base)) = longest_base(&self.psr4, &file) {
            return psr4_compliant(class, ns, base, &file);
        }
        if let Some((_, base)) = longest_base(&self.psr0, &file) {
            return psr0_compliant(class, base, &file);
        }
        true
    }
}

fn dir_prefix(dir: &str) -> String {
    if dir.ends_with('/') {
        dir.to_string()
    } else {
        format!("{dir}/")
    }
}

fn longest_base<'a>(rules: &'a [(String, String)], file: &str) -> Option<(&'a str, &'a str)> {
    rules
        .iter()
        .filter(|(_, base)| file.starts_with(&dir_prefix(base)))
        .max_by_key(|(_, base)| base.len())
        .map(|(ns, base)| (ns.as_str(), base.as_str()))
}

/// `file` relative to `base`, without the `.php` suffix.
fn relative_stem<'a>(base: &str, file: &'a str) -> Option<&'a str> {
    let rel = file.get(dir_prefix(base).len()..).filter(|r| !r.is_empty())?;
    Some(rel.strip_suffix(".php").unwrap_or(rel))
}

/// The prefix is stripped by length, not by match: a class whose first
/// `prefix.len()` bytes differ from the prefix can still be admitted when
/// the remainder lines up with the path.
fn psr4_compliant(class: &str, prefix: &str, base: &str, file: &str) -> bool {
    let Some(relative) = relative_stem(base, file) else {
        return false;
    };
    let rest = if prefix.is_empty() {
        class
    } else {
        match class.get(prefix.len()..) {
            Some(r) if !r.is_empty() => r,
            _ => return false,
        }
    };
    rest.replace('\\', "/") == relative
}

/// Namespace separators become directories; so do underscores in the
/// class name itself.
fn psr0_compliant(class: &str, base: &str, file: &str) -> bool {
    let Some(relative) = relative_stem(base, file) else {
        return false;
    };
    let expected = match class.rfind('\\') {
        Some(at) => {
            let (ns, name) = class.split_at(at + 1);
            format!("{}{}", ns.replace('\\', "/"), name.replace('_', "/"))
        }
        None => class.replace('_', "/"),
    };
    expected == relative
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules(psr4: &[(&str, &str)], psr0: &[(&str, &str)], classmap: &[&str]) -> NamespaceRules {
        let owned = |v: &[(&str, &str)]| v.iter().map(|(a, b)| (a.to_string(), b.to_string())).collect();
        NamespaceRules {
            psr4: owned(psr4),
            psr0: owned(psr0),
            classmap: classmap.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn psr4_class_matches_filename() {
        assert!(psr4_compliant("App\\Models\\User", "App\\", "/project/src", "/project/src/Models/User.php"));
        assert!(psr4_compliant(
            "Symfony\\Component\\Cache\\Adapter\\PhpFilesAdapter",
            "Symfony\\Component\\Cache\\",
            "/vendor/symfony/cache",
            "/vendor/symfony/cache/Adapter/PhpFilesAdapter.php",
        ));
    }

    #[test]
    fn psr4_rejects_class_in_wrong_file() {
        assert!(!psr4_compliant(
            "Symfony\\Component\\Cache\\Adapter\\LazyValue",
            "Symfony\\Component\\Cache\\",
            "/vendor/symfony/cache",
            "/vendor/symfony/cache/Adapter/PhpFilesAdapter.php",
        ));
    }

    #[test]
    fn psr4_empty_prefix() {
        assert!(psr4_compliant("GlobalClass", "", "/project/lib", "/project/lib/GlobalClass.php"));
    }

    #[test]
    fn psr4_strips_by_length() {
        // "Src\" and "App\" are both four bytes long.
        assert!(psr4_compliant("Src\\TestClass1", "App\\", "/project/src", "/project/src/TestClass1.php"));
        assert!(!psr4_compliant("Other\\Foo", "App\\", "/project/src", "/project/src/Foo.php"));
    }

    #[test]
    fn psr4_never_panics_on_short_or_multibyte_names() {
        assert!(!psr4_compliant("Ap", "App\\", "/p", "/p/Ap.php"));
        assert!(!psr4_compliant("Äx", "A", "/p", "/p/x.php"));
    }

    #[test]
    fn psr0_paths() {
        assert!(psr0_compliant("Psr\\Log\\LoggerInterface", "/vendor/psr/log", "/vendor/psr/log/Psr/Log/LoggerInterface.php"));
        assert!(psr0_compliant("Twig_Extension_Core", "/vendor/twig/twig/lib", "/vendor/twig/twig/lib/Twig/Extension/Core.php"));
        assert!(!psr0_compliant("Psr\\Log\\ExtraClass", "/vendor/psr/log", "/vendor/psr/log/Psr/Log/LoggerInterface.php"));
    }

    #[test]
    fn classmap_roots_admit_everything() {
        let r = rules(&[("App\\", "/project/src")], &[], &["/project/src"]);
        assert!(r.admits("App\\SecondaryClass", Path::new("/project/src/MainClass.php")));
    }

    #[test]
    fn psr4_filters_secondary_classes() {
        let r = rules(&[("App\\", "/project/src")], &[], &[]);
        assert!(r.admits("App\\MainClass", Path::new("/project/src/MainClass.php")));
        assert!(!r.admits("App\\SecondaryClass", Path::new("/project/src/MainClass.php")));
    }

    #[test]
    fn longest_base_wins() {
        let r = rules(&[("App\\", "/project/src"), ("App\\Legacy\\", "/project/src/Legacy")], &[], &[]);
        assert!(r.admits("App\\Legacy\\Old", Path::new("/project/src/Legacy/Old.php")));
    }

    #[test]
    fn unmapped_files_are_admitted() {
        let r = rules(&[("App\\", "/project/src")], &[("Lib_", "/project/lib")], &[]);
        assert!(r.admits("Anything", Path::new("/elsewhere/Thing.php")));
        assert!(!r.admits("Lib_Wrong", Path::new("/project/lib/Lib/Right.php")));
        assert!(r.admits("Lib_Right", Path::new("/project/lib/Lib/Right.php")));
    }

    #[test]
    fn file_identifiers_follow_package_and_relative_path() {
        let explicit = FileAutoload {
            identifier: Some("abc".into()),
            package: None,
            relative_path: None,
            path: "/p/f.php".into(),
        };
        assert_eq!(explicit.identifier(), "abc");

        let derived = FileAutoload {
            identifier: None,
            package: Some("acme/util".into()),
            relative_path: Some("src/functions.php".into()),
            path: "/p/vendor/acme/util/src/functions.php".into(),
        };
        let expected = format!("{:x}", md5::compute("acme/util:src/functions.php"));
        assert_eq!(derived.identifier(), expected);
        assert_eq!(derived.identifier().len(), 32);
    }

    #[test]
    fn mappings_deserialize_with_dashed_keys() {
        let json = r#"{"psr-4":[{"namespace":"A\\","path":"src"}],"classmap":["lib"],"files":[{"path":"f.php"}]}"#;
        let m: AutoloadMappings = serde_json::from_str(json).unwrap();
        assert_eq!(m.psr4[0].namespace, "A\\");
        assert!(m.psr0.is_empty());
        assert_eq!(m.roots().collect::<Vec<_>>(), vec!["src", "lib"]);
    }

    #[test]
    fn resolved_roots_are_deduplicated() {
        let m = AutoloadMappings {
            psr4: vec![
                NamespaceMapping { namespace: "A\\".into(), path: "/p/src".into() },
                NamespaceMapping { namespace: "B\\".into(), path: "/p/src".into() },
            ],
            classmap: vec!["/p/lib".into()],
            ..AutoloadMappings::default()
        };
        assert_eq!(m.resolved_roots(Path::new("/p")), vec![PathBuf::from("/p/src"), PathBuf::from("/p/lib")]);
    }
}
