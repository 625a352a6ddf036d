// src/codegen.rs
//! Renders autoload tables as Composer loader files.
//!
//! Paths are never written absolute when they can be expressed relative to
//! the vendor or project directory: the plain tables use `$vendorDir` /
//! `$baseDir` variables, the static table uses `__DIR__`-relative code. The
//! static table is written in `var_export` layout, re-indented the way the
//! dependency manager's own generator does it, so a regenerated file is
//! byte-identical to one the manager would have produced.

use regex::Regex;
use std::path::Path;

use crate::{
    builder::AutoloadTables,
    util
};

/* ----------------------------- path codes ----------------------------- */

/// Single-quoted PHP literal, `var_export` style.
pub fn var_export(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for ch in s.chars() {
        if ch == '\\' || ch == '\'' {
            out.push('\\');
        }
        out.push(ch);
    }
    out.push('\'');
    out
}

fn is_absolute(p: &str) -> bool {
    p.starts_with('/') || p.as_bytes().get(1) == Some(&b':') || p.contains("://")
}

/// Lexical normalization: slashes only, no `.` segments, `..` folded where
/// a parent is known, no trailing slash.
fn normalize(path: &str) -> String {
    let path = path.replace('\\', "/");
    let (absolute, rest) = match path.strip_prefix('/') {
        Some(rest) => (true, rest),
        None => (false, path.as_str()),
    };
    let mut parts: Vec<&str> = Vec::new();
    let mut up = false;
    for chunk in rest.split('/') {
        if chunk == ".." && (absolute || up) {
            parts.pop();
            up = !(parts.is_empty() || parts.last() == Some(&".."));
        } else if chunk != "." && !chunk.is_empty() {
            parts.push(chunk);
            up = chunk != "..";
        }
    }
    let joined = parts.join("/");
    if absolute {
        format!("/{joined}")
    } else {
        joined
    }
}

fn dirname(p: &str) -> String {
    let t = p.trim_end_matches('/');
    if t.is_empty() {
        return "/".to_string();
    }
    match t.rfind('/') {
        Some(0) => "/".to_string(),
        Some(i) => t[..i].to_string(),
        None => ".".to_string(),
    }
}

fn basename(p: &str) -> &str {
    p.trim_end_matches('/').rsplit('/').next().unwrap_or("")
}

/// Longest common ancestor of `from` and `to`, walking up from `to`.
/// `None` when the only shared ancestor is the filesystem root.
fn common_ancestor(from: &str, to: &str) -> Option<String> {
    let from_slash = format!("{from}/");
    let mut common = to.to_string();
    while !from_slash.starts_with(&format!("{common}/")) && common != "/" && common != "." {
        common = dirname(&common);
    }
    if common == "/" || common == "." || !from.starts_with(&common) {
        return None;
    }
    Some(format!("{}/", common.trim_end_matches('/')))
}

/// Relative path from directory `from` to `to`, or `to` itself when they
/// share nothing but the root.
fn shortest_path(from: &str, to: &str) -> String {
    let from = format!("{}/dummy_file", from.trim_end_matches('/'));
    if dirname(&from) == dirname(to) {
        return format!("./{}", basename(to));
    }
    let Some(common) = common_ancestor(&from, to) else {
        return to.to_string();
    };
    let depth = from.get(common.len()..).unwrap_or("").matches('/').count();
    let result = format!("{}{}", "../".repeat(depth), to.get(common.len()..).unwrap_or(""));
    if result.is_empty() {
        "./".to_string()
    } else {
        result
    }
}

/// PHP expression for directory `to`, relative to the directory of the
/// file being generated (`from`).
fn shortest_path_code(from: &str, to: &str, static_code: bool) -> String {
    if from == to {
        return "__DIR__".to_string();
    }
    let Some(common) = common_ancestor(from, to) else {
        return var_export(to);
    };
    if to.starts_with(&format!("{from}/")) {
        return format!("__DIR__ . {}", var_export(&to[from.len()..]));
    }
    let depth = from.get(common.len()..).unwrap_or("").matches('/').count() + 1;
    let code = if static_code {
        format!("__DIR__ . '{}'", "/..".repeat(depth))
    } else {
        format!("{}__DIR__{}", "dirname(".repeat(depth), ")".repeat(depth))
    };
    let rel = to.get(common.len()..).unwrap_or("");
    if rel.is_empty() {
        code
    } else {
        format!("{code}.{}", var_export(&format!("/{rel}")))
    }
}

/// Where the generated files live relative to each other.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoaderLayout {
    vendor: String,
    base: String,
    target: String,
}

impl LoaderLayout {
    pub fn new(vendor_dir: &Path, base_dir: &Path, target_dir: &Path) -> Self {
        Self {
            vendor: normalize(&util::slash_path(vendor_dir)),
            base: normalize(&util::slash_path(base_dir)),
            target: normalize(&util::slash_path(target_dir)),
        }
    }

    fn vendor_dir_code(&self) -> String {
        shortest_path_code(&self.target, &self.vendor, false)
    }

    fn base_dir_code(&self) -> String {
        shortest_path_code(&self.vendor, &self.base, false).replace("__DIR__", "$vendorDir")
    }

    /// Split `path` into the variable it hangs off and the literal remainder.
    fn anchor(&self, path: &Path) -> (Anchor, String) {
        let path = normalize(&util::slash_path(path));
        if path == self.vendor || path.starts_with(&format!("{}/", self.vendor)) {
            return (Anchor::Vendor, path[self.vendor.len()..].to_string());
        }
        let rel = normalize(&shortest_path(&self.base, &path));
        if is_absolute(&rel) {
            (Anchor::Absolute, rel)
        } else {
            (Anchor::Base, format!("/{rel}"))
        }
    }

    /// Path expression for the plain table files.
    pub fn path_code(&self, path: &Path) -> String {
        let (anchor, rest) = self.anchor(path);
        let var = match anchor {
            Anchor::Vendor => "$vendorDir . ",
            Anchor::Base => "$baseDir . ",
            Anchor::Absolute => "",
        };
        let phar = if rest.contains(".phar") { "'phar://' . " } else { "" };
        format!("{phar}{var}{}", var_export(&rest))
    }

    /// Path expression for the static table: what the plain expression
    /// evaluates to, re-anchored on `__DIR__`.
    pub fn static_path_code(&self, path: &Path) -> String {
        let (anchor, rest) = self.anchor(path);
        let evaluated = match anchor {
            Anchor::Vendor => format!("{}{rest}", self.vendor),
            Anchor::Base => format!("{}{rest}", self.base),
            Anchor::Absolute => rest,
        };
        let phar = if evaluated.contains(".phar") { "'phar://' . " } else { "" };
        let plain = evaluated;

        let vendor_prefix = format!("{}/", self.vendor.trim_end_matches('/'));
        let base_prefix = format!("{}/", self.base.trim_end_matches('/'));
        let mut candidates = [(vendor_prefix, &self.vendor), (base_prefix, &self.base)];
        candidates.sort_by_key(|(prefix, _)| std::cmp::Reverse(prefix.len()));

        for (prefix, dir) in &candidates {
            if let Some(rest) = plain.strip_prefix(prefix.as_str()) {
                let code = shortest_path_code(&self.target, dir, true);
                return format!("{phar}{code} . {}", var_export(&format!("/{rest}")));
            }
        }
        format!("{phar}{}", var_export(&plain))
    }
}

enum Anchor {
    Vendor,
    Base,
    Absolute,
}

/* ----------------------------- plain tables ----------------------------- */

fn table_file(name: &str, layout: &LoaderLayout, entries: &str) -> String {
    format!(
        "<?php\n\n// {name} @generated by Composer\n\n$vendorDir = {};\n$baseDir = {};\n\nreturn array(\n{entries});\n",
        layout.vendor_dir_code(),
        layout.base_dir_code(),
    )
}

pub fn classmap_file(tables: &AutoloadTables, layout: &LoaderLayout) -> String {
    let mut entries = String::new();
    for (class, path) in &tables.classmap {
        entries.push_str(&format!("    {} => {},\n", var_export(class), layout.path_code(path)));
    }
    table_file("autoload_classmap.php", layout, &entries)
}

fn prefix_entries(table: &[(String, Vec<std::path::PathBuf>)], layout: &LoaderLayout) -> String {
    let mut entries = String::new();
    for (prefix, dirs) in table {
        let codes: Vec<String> = dirs.iter().map(|d| layout.path_code(d)).collect();
        entries.push_str(&format!("    {} => array({}),\n", var_export(prefix), codes.join(", ")));
    }
    entries
}

pub fn psr4_file(tables: &AutoloadTables, layout: &LoaderLayout) -> String {
    table_file("autoload_psr4.php", layout, &prefix_entries(&tables.psr4, layout))
}

pub fn namespaces_file(tables: &AutoloadTables, layout: &LoaderLayout) -> String {
    table_file("autoload_namespaces.php", layout, &prefix_entries(&tables.psr0, layout))
}

/// `None` when there are no side-effect files; the file is then not written.
pub fn files_file(tables: &AutoloadTables, layout: &LoaderLayout) -> Option<String> {
    if tables.files.is_empty() {
        return None;
    }
    let mut entries = String::new();
    for (id, path) in &tables.files {
        entries.push_str(&format!("    {} => {},\n", var_export(id), layout.path_code(path)));
    }
    Some(table_file("autoload_files.php", layout, &entries))
}

/* ----------------------------- static table ----------------------------- */

enum Key {
    Str(String),
    Index(usize),
}

enum Export {
    Code(String),
    Int(usize),
    Array(Vec<(Key, Export)>),
}

fn list(codes: Vec<String>) -> Export {
    Export::Array(
        codes
            .into_iter()
            .enumerate()
            .map(|(i, c)| (Key::Index(i), Export::Code(c)))
            .collect(),
    )
}

/// `var_export` array layout: two spaces per level, nested arrays start on
/// the line after their key.
fn render(value: &Export, indent: usize, out: &mut String) {
    match value {
        Export::Code(code) => out.push_str(code),
        Export::Int(n) => out.push_str(&n.to_string()),
        Export::Array(entries) => {
            out.push_str("array (\n");
            for (key, v) in entries {
                out.push_str(&" ".repeat(indent + 2));
                match key {
                    Key::Str(s) => out.push_str(&var_export(s)),
                    Key::Index(i) => out.push_str(&i.to_string()),
                }
                out.push_str(" => ");
                if matches!(v, Export::Array(_)) {
                    out.push('\n');
                    out.push_str(&" ".repeat(indent + 2));
                }
                render(v, indent + 2, out);
                out.push_str(",\n");
            }
            out.push_str(&" ".repeat(indent));
            out.push(')');
        }
    }
}

/// Every line's indent doubled plus four, then the first line left-trimmed.
fn reindent(exported: &str) -> String {
    let lines: Vec<String> = exported
        .lines()
        .map(|line| {
            let body = line.trim_start_matches(' ');
            let n = line.len() - body.len();
            format!("{}{}", " ".repeat(4 + 2 * n), body)
        })
        .collect();
    lines.join("\n").trim_start().to_string()
}

/// Group prefixes under their first character, keeping table order.
fn by_first_char<T>(items: Vec<(String, T)>) -> Vec<(Key, Export)>
where
    T: Into<Export>,
{
    let mut groups: Vec<(String, Vec<(Key, Export)>)> = Vec::new();
    for (prefix, value) in items {
        let first = prefix.chars().next().map(String::from).unwrap_or_default();
        let entry = (Key::Str(prefix), value.into());
        match groups.iter_mut().find(|(c, _)| *c == first) {
            Some((_, members)) => members.push(entry),
            None => groups.push((first, vec![entry])),
        }
    }
    groups
        .into_iter()
        .map(|(c, members)| (Key::Str(c), Export::Array(members)))
        .collect()
}

impl From<usize> for Export {
    fn from(n: usize) -> Self {
        Export::Int(n)
    }
}

impl From<Vec<String>> for Export {
    fn from(codes: Vec<String>) -> Self {
        list(codes)
    }
}

pub fn static_file(suffix: &str, tables: &AutoloadTables, layout: &LoaderLayout, with_files: bool) -> String {
    let dirs = |ds: &[std::path::PathBuf]| -> Vec<String> { ds.iter().map(|d| layout.static_path_code(d)).collect() };
    let mut props: Vec<(&str, Export)> = Vec::new();

    if with_files || !tables.files.is_empty() {
        props.push((
            "files",
            Export::Array(
                tables
                    .files
                    .iter()
                    .map(|(id, p)| (Key::Str(id.clone()), Export::Code(layout.static_path_code(p))))
                    .collect(),
            ),
        ));
    }

    let (psr4_fallback, psr4): (Vec<_>, Vec<_>) = tables.psr4.iter().partition(|(p, _)| p.is_empty());
    if !psr4.is_empty() {
        let lengths: Vec<(String, usize)> = psr4.iter().map(|(p, _)| (p.clone(), p.len())).collect();
        props.push(("prefixLengthsPsr4", Export::Array(by_first_char(lengths))));
        props.push((
            "prefixDirsPsr4",
            Export::Array(psr4.iter().map(|(p, ds)| (Key::Str(p.clone()), list(dirs(ds)))).collect()),
        ));
    }
    if let Some((_, ds)) = psr4_fallback.first() {
        props.push(("fallbackDirsPsr4", list(dirs(ds))));
    }

    let (psr0_fallback, psr0): (Vec<_>, Vec<_>) = tables.psr0.iter().partition(|(p, _)| p.is_empty());
    if !psr0.is_empty() {
        let prefixes: Vec<(String, Vec<String>)> = psr0.iter().map(|(p, ds)| (p.clone(), dirs(ds))).collect();
        props.push(("prefixesPsr0", Export::Array(by_first_char(prefixes))));
    }
    if let Some((_, ds)) = psr0_fallback.first() {
        props.push(("fallbackDirsPsr0", list(dirs(ds))));
    }

    if !tables.classmap.is_empty() {
        props.push((
            "classMap",
            Export::Array(
                tables
                    .classmap
                    .iter()
                    .map(|(name, p)| (Key::Str(name.clone()), Export::Code(layout.static_path_code(p))))
                    .collect(),
            ),
        ));
    }

    let mut out = format!(
        "<?php\n\n// autoload_static.php @generated by Composer\n\nnamespace Composer\\Autoload;\n\nclass ComposerStaticInit{suffix}\n{{\n"
    );
    let mut initializer = String::new();
    for (prop, value) in &props {
        let mut exported = String::new();
        render(value, 0, &mut exported);
        out.push_str(&format!("    public static ${prop} = {};\n\n", reindent(&exported)));
        if *prop != "files" {
            initializer.push_str(&format!(
                "            $loader->{prop} = ComposerStaticInit{suffix}::${prop};\n"
            ));
        }
    }
    out.push_str(&format!(
        "    public static function getInitializer(ClassLoader $loader)\n    {{\n        return \\Closure::bind(function () use ($loader) {{\n{initializer}\n        }}, null, ClassLoader::class);\n    }}\n}}\n"
    ));
    out
}

/* ----------------------------- bootstrap ----------------------------- */

const REAL_HEAD: &str = r"<?php

// autoload_real.php @generated by Composer

class ComposerAutoloaderInit{SUFFIX}
{
    private static $loader;

    public static function loadClassLoader($class)
    {
        if ('Composer\Autoload\ClassLoader' === $class) {
            require __DIR__ . '/ClassLoader.php';
        }
    }

    /**
     * @return \Composer\Autoload\ClassLoader
     */
    public static function getLoader()
    {
        if (null !== self::$loader) {
            return self::$loader;
        }

";

const REAL_PLATFORM_CHECK: &str = "        require __DIR__ . '/platform_check.php';\n\n";

const REAL_REGISTER: &str = r"        spl_autoload_register(array('ComposerAutoloaderInit{SUFFIX}', 'loadClassLoader'), true, true);
        self::$loader = $loader = new \Composer\Autoload\ClassLoader(\dirname(__DIR__));
        spl_autoload_unregister(array('ComposerAutoloaderInit{SUFFIX}', 'loadClassLoader'));

        require __DIR__ . '/autoload_static.php';
        call_user_func(\Composer\Autoload\ComposerStaticInit{SUFFIX}::getInitializer($loader));

        $loader->register(true);

";

const REAL_FILES: &str = r"        $filesToLoad = \Composer\Autoload\ComposerStaticInit{SUFFIX}::$files;
        $requireFile = \Closure::bind(static function ($fileIdentifier, $file) {
            if (empty($GLOBALS['__composer_autoload_files'][$fileIdentifier])) {
                $GLOBALS['__composer_autoload_files'][$fileIdentifier] = true;

                require $file;
            }
        }, null, null);
        foreach ($filesToLoad as $fileIdentifier => $file) {
            $requireFile($fileIdentifier, $file);
        }

";

const REAL_TAIL: &str = "        return $loader;\n    }\n}\n";

pub fn real_file(suffix: &str, platform_check: bool, load_files: bool) -> String {
    let mut out = String::from(REAL_HEAD);
    if platform_check {
        out.push_str(REAL_PLATFORM_CHECK);
    }
    out.push_str(REAL_REGISTER);
    if load_files {
        out.push_str(REAL_FILES);
    }
    out.push_str(REAL_TAIL);
    out.replace("{SUFFIX}", suffix)
}

const BOOTSTRAP: &str = r#"<?php

// autoload.php @generated by Composer

if (PHP_VERSION_ID < 50600) {
    if (!headers_sent()) {
        header('HTTP/1.1 500 Internal Server Error');
    }
    $err = 'Composer 2.3.0 dropped support for autoloading on PHP <5.6 and you are running '.PHP_VERSION.', please upgrade PHP or use Composer 2.2 LTS via "composer self-update --2.2". Aborting.'.PHP_EOL;
    if (!ini_get('display_errors')) {
        if (PHP_SAPI === 'cli' || PHP_SAPI === 'phpdbg') {
            fwrite(STDERR, $err);
        } elseif (!headers_sent()) {
            echo $err;
        }
    }
    trigger_error(
        $err,
        E_USER_ERROR
    );
}

require_once {REAL_PATH};

return ComposerAutoloaderInit{SUFFIX}::getLoader();
"#;

/// `<vendor>/autoload.php`, requiring the real loader in the target directory.
pub fn bootstrap_file(suffix: &str, layout: &LoaderLayout) -> String {
    let target_code = shortest_path_code(&layout.vendor, &layout.target, false);
    let real_path = match target_code.chars().last() {
        Some(q @ ('\'' | '"')) => format!("{}/autoload_real.php{q}", &target_code[..target_code.len() - 1]),
        _ => format!("{target_code} . '/autoload_real.php'"),
    };
    BOOTSTRAP.replace("{REAL_PATH}", &real_path).replace("{SUFFIX}", suffix)
}

/// Suffix token of an existing bootstrap file.
pub fn extract_suffix(bootstrap: &str) -> Option<String> {
    let re = Regex::new(r"ComposerAutoloaderInit([^:\s]+)::").ok()?;
    re.captures(bootstrap).map(|c| c[1].to_string())
}

/// The bootstrap is rewritten only when missing or bound to another suffix.
pub fn bootstrap_needs_update(existing: Option<&str>, suffix: &str) -> bool {
    existing.map_or(true, |text| !text.contains(&format!("ComposerAutoloaderInit{suffix}")))
}
