// src/symbol.rs
//! Declared types as the scanner and the autoload tables see them.

use serde::{
    Deserialize,
    Serialize
};
use std::{
    fmt,
    path::PathBuf
};

/// What kind of type a declaration introduces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolKind {
    Class,
    Interface,
    Trait,
    Enum,
}

impl SymbolKind {
    /// Keyword lookup, case-insensitive like the language itself.
    pub fn from_keyword(word: &[u8]) -> Option<Self> {
        if word.eq_ignore_ascii_case(b"class") {
            Some(SymbolKind::Class)
        } else if word.eq_ignore_ascii_case(b"interface") {
            Some(SymbolKind::Interface)
        } else if word.eq_ignore_ascii_case(b"trait") {
            Some(SymbolKind::Trait)
        } else if word.eq_ignore_ascii_case(b"enum") {
            Some(SymbolKind::Enum)
        } else {
            None
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SymbolKind::Class => "class",
            SymbolKind::Interface => "interface",
            SymbolKind::Trait => "trait",
            SymbolKind::Enum => "enum",
        }
    }
}

impl fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One declaration found in a file: fully-qualified name plus kind.
/// This is what the cache stores per file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Declaration {
    pub name: String,
    pub kind: SymbolKind,
}

impl Declaration {
    pub fn new(name: impl Into<String>, kind: SymbolKind) -> Self {
        Self { name: name.into(), kind }
    }
}

/// A declaration bound to the absolute path of the file declaring it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
    pub path: PathBuf,
}

impl Symbol {
    pub fn from_declaration(decl: &Declaration, path: impl Into<PathBuf>) -> Self {
        Self {
            name: decl.name.clone(),
            kind: decl.kind,
            path: path.into(),
        }
    }
}
