// src/scanner.rs
//! Declaration scanner: one forward pass over the raw bytes of a PHP file.
//!
//! The lexer only knows enough of the language to stay out of places where
//! keywords are not code: inline HTML, comments, quoted strings, heredocs and
//! nowdocs. Within code it tracks `namespace` statements (statement and braced
//! forms) and records every `class` / `interface` / `trait` / `enum` followed
//! by an identifier. Declarations nested in function bodies or conditionals
//! are still recorded.

use memchr::{
    memchr,
    memchr2,
    memmem
};

use crate::symbol::{
    Declaration,
    SymbolKind
};

/// Words that can never be the name of a declared type.
const RESERVED: &[&str] = &[
    "abstract", "and", "array", "as", "break", "callable", "case", "catch", "class", "clone",
    "const", "continue", "declare", "default", "do", "echo", "else", "elseif", "empty",
    "enddeclare", "endfor", "endforeach", "endif", "endswitch", "endwhile", "enum", "eval",
    "exit", "extends", "false", "final", "finally", "fn", "for", "foreach", "function", "global",
    "goto", "if", "implements", "include", "include_once", "instanceof", "insteadof",
    "interface", "isset", "list", "match", "namespace", "new", "null", "or", "print", "private",
    "protected", "public", "readonly", "require", "require_once", "return", "self", "static",
    "switch", "throw", "trait", "true", "try", "unset", "use", "var", "while", "xor", "yield",
];

const TYPE_KEYWORDS: [&[u8]; 4] = [b"class", b"interface", b"trait", b"enum"];

/// Cheap pre-check: can this file declare any type at all?
///
/// A `false` answer is exact. Files that fail it are cached with an empty
/// declaration list without running the lexer.
pub fn may_declare_types(src: &[u8]) -> bool {
    if TYPE_KEYWORDS.iter().any(|kw| memmem::find(src, kw).is_some()) {
        return true;
    }
    TYPE_KEYWORDS
        .iter()
        .any(|kw| src.windows(kw.len()).any(|w| w.eq_ignore_ascii_case(kw)))
}

/// Extract every type declaration from `src`, in source order.
pub fn scan_source(src: &[u8]) -> Vec<Declaration> {
    Lexer::new(src).run()
}

#[inline]
fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_' || b >= 0x80
}

#[inline]
fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b >= 0x80
}

struct Lexer<'a> {
    src: &'a [u8],
    pos: usize,
    namespace: Option<String>,
    /// Brace depth at which a braced namespace block closes.
    ns_close_depth: Option<usize>,
    depth: usize,
    after_new: bool,
    member_access: bool,
    /// The next word names a function or constant.
    name_follows: bool,
    out: Vec<Declaration>,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a [u8]) -> Self {
        Self {
            src,
            pos: 0,
            namespace: None,
            ns_close_depth: None,
            depth: 0,
            after_new: false,
            member_access: false,
            name_follows: false,
            out: Vec::new(),
        }
    }

    fn run(mut self) -> Vec<Declaration> {
        while self.pos < self.src.len() {
            self.skip_inline_html();
            self.lex_code();
        }
        self.out
    }

    #[inline]
    fn peek(&self, ahead: usize) -> Option<u8> {
        self.src.get(self.pos + ahead).copied()
    }

    #[inline]
    fn rest(&self) -> &'a [u8] {
        let src = self.src;
        &src[self.pos.min(src.len())..]
    }

    fn reset_flags(&mut self) {
        self.after_new = false;
        self.member_access = false;
        self.name_follows = false;
    }

    /// Advance past text outside `<?php ... ?>`.
    fn skip_inline_html(&mut self) {
        let Some(at) = memmem::find(self.rest(), b"<?") else {
            self.pos = self.src.len();
            return;
        };
        self.pos += at + 2;
        let rest = self.rest();
        if rest.len() >= 3 && rest[..3].eq_ignore_ascii_case(b"php") {
            self.pos += 3;
        } else if rest.first() == Some(&b'=') {
            self.pos += 1;
        }
        self.reset_flags();
    }

    /// Lex code until a closing tag or end of input.
    fn lex_code(&mut self) {
        while let Some(b) = self.peek(0) {
            match b {
                b'?' if self.peek(1) == Some(b'>') => {
                    self.pos += 2;
                    return;
                }
                b'?' if self.rest().starts_with(b"?->") => {
                    self.pos += 3;
                    self.member_access = true;
                    self.after_new = false;
                }
                b'/' if self.peek(1) == Some(b'/') => {
                    if self.line_comment() {
                        return;
                    }
                }
                b'#' if self.peek(1) != Some(b'[') => {
                    if self.line_comment() {
                        return;
                    }
                }
                b'/' if self.peek(1) == Some(b'*') => self.block_comment(),
                b'\'' | b'"' | b'`' => {
                    self.quoted(b);
                    self.reset_flags();
                }
                b'<' if self.rest().starts_with(b"<<<") => {
                    self.heredoc();
                    self.reset_flags();
                }
                b'$' => {
                    self.pos += 1;
                    self.skip_ident();
                    self.reset_flags();
                }
                b'{' => {
                    self.depth += 1;
                    self.pos += 1;
                    self.reset_flags();
                }
                b'}' => {
                    self.close_brace();
                    self.reset_flags();
                }
                b':' if self.peek(1) == Some(b':') => {
                    self.pos += 2;
                    self.member_access = true;
                    self.after_new = false;
                }
                b'-' if self.peek(1) == Some(b'>') => {
                    self.pos += 2;
                    self.member_access = true;
                    self.after_new = false;
                }
                _ if is_ident_start(b) => self.word(),
                b'0'..=b'9' => {
                    self.skip_ident();
                    self.reset_flags();
                }
                _ if b.is_ascii_whitespace() => self.pos += 1,
                _ => {
                    self.pos += 1;
                    self.reset_flags();
                }
            }
        }
    }

    /// Consume a `//` or `#` comment. Returns true when it ended at `?>`.
    fn line_comment(&mut self) -> bool {
        let rest = self.rest();
        let line_end = memchr(b'\n', rest).unwrap_or(rest.len());
        if let Some(close) = memmem::find(&rest[..line_end], b"?>") {
            self.pos += close + 2;
            return true;
        }
        self.pos += line_end;
        false
    }

    fn block_comment(&mut self) {
        self.pos += 2;
        match memmem::find(self.rest(), b"*/") {
            Some(end) => self.pos += end + 2,
            None => self.pos = self.src.len(),
        }
    }

    fn quoted(&mut self, quote: u8) {
        self.pos += 1;
        while let Some(at) = memchr2(quote, b'\\', self.rest()) {
            if self.src[self.pos + at] == b'\\' {
                self.pos += at + 2;
            } else {
                self.pos += at + 1;
                return;
            }
        }
        self.pos = self.src.len();
    }

    /// `<<<LABEL`, `<<<"LABEL"` or `<<<'LABEL'`, closed by the label at the
    /// start of a line, optionally indented.
    fn heredoc(&mut self) {
        let src = self.src;
        let mut p = self.pos + 3;
        while p < src.len() && matches!(src[p], b' ' | b'\t') {
            p += 1;
        }
        let quote = match src.get(p) {
            Some(&q) if q == b'\'' || q == b'"' => {
                p += 1;
                Some(q)
            }
            _ => None,
        };
        let start = p;
        while p < src.len() && is_ident_byte(src[p]) {
            p += 1;
        }
        if p == start || src[start].is_ascii_digit() {
            self.pos += 3;
            return;
        }
        let label = &src[start..p];
        if let Some(q) = quote {
            if src.get(p) == Some(&q) {
                p += 1;
            }
        }

        let Some(nl) = memchr(b'\n', &src[p..]) else {
            self.pos = src.len();
            return;
        };
        let mut line = p + nl + 1;
        loop {
            let mut q = line;
            while q < src.len() && matches!(src[q], b' ' | b'\t') {
                q += 1;
            }
            let closes = src[q..].starts_with(label)
                && src.get(q + label.len()).map_or(true, |&c| !is_ident_byte(c));
            if closes {
                self.pos = q + label.len();
                return;
            }
            match memchr(b'\n', &src[line..]) {
                Some(nl) => line += nl + 1,
                None => {
                    self.pos = src.len();
                    return;
                }
            }
        }
    }

    fn skip_ident(&mut self) {
        while self.peek(0).is_some_and(is_ident_byte) {
            self.pos += 1;
        }
    }

    /// Skip whitespace and comments between a keyword and its name. A line
    /// comment is left at its `?>` so the closing tag still ends the code.
    fn skip_trivia(&mut self) {
        loop {
            match self.peek(0) {
                Some(b) if b.is_ascii_whitespace() => self.pos += 1,
                Some(b'/') if self.peek(1) == Some(b'*') => self.block_comment(),
                Some(b'/') if self.peek(1) == Some(b'/') => self.trailing_comment(),
                Some(b'#') if self.peek(1) != Some(b'[') => self.trailing_comment(),
                _ => return,
            }
        }
    }

    fn trailing_comment(&mut self) {
        let rest = self.rest();
        let line_end = memchr(b'\n', rest).unwrap_or(rest.len());
        self.pos += memmem::find(&rest[..line_end], b"?>").unwrap_or(line_end);
    }

    fn close_brace(&mut self) {
        self.pos += 1;
        self.depth = self.depth.saturating_sub(1);
        if self.ns_close_depth == Some(self.depth) {
            self.namespace = None;
            self.ns_close_depth = None;
        }
    }

    fn word(&mut self) {
        let src = self.src;
        let start = self.pos;
        self.skip_ident();
        let word = &src[start..self.pos];

        let was_new = self.after_new;
        let is_member_name = self.member_access || self.name_follows;
        self.reset_flags();
        if is_member_name {
            return;
        }

        if word.eq_ignore_ascii_case(b"namespace") {
            self.namespace_decl();
        } else if let Some(kind) = SymbolKind::from_keyword(word) {
            if !was_new {
                self.declaration(kind);
            }
        } else if word.eq_ignore_ascii_case(b"new") {
            self.after_new = true;
        } else if word.eq_ignore_ascii_case(b"abstract")
            || word.eq_ignore_ascii_case(b"final")
            || word.eq_ignore_ascii_case(b"readonly")
        {
            self.after_new = was_new;
        } else if word.eq_ignore_ascii_case(b"function") || word.eq_ignore_ascii_case(b"const") {
            self.name_follows = true;
        }
    }

    fn namespace_decl(&mut self) {
        self.skip_trivia();
        // `namespace\foo()` is a relative name, not a declaration.
        if self.peek(0) == Some(b'\\') {
            return;
        }
        let start = self.pos;
        while self.peek(0).is_some_and(|b| is_ident_byte(b) || b == b'\\') {
            self.pos += 1;
        }
        let name = String::from_utf8_lossy(&self.src[start..self.pos]).into_owned();
        self.skip_trivia();

        if self.peek(0) == Some(b'{') {
            self.ns_close_depth = Some(self.depth);
            self.depth += 1;
            self.pos += 1;
            self.namespace = (!name.is_empty()).then_some(name);
        } else if !name.is_empty() {
            self.namespace = Some(name);
        }
    }

    fn declaration(&mut self, kind: SymbolKind) {
        self.skip_trivia();
        let start = self.pos;
        if !self.peek(0).is_some_and(is_ident_start) {
            return;
        }
        self.skip_ident();
        let src = self.src;
        let name = String::from_utf8_lossy(&src[start..self.pos]);
        if RESERVED.contains(&name.as_ref()) {
            return;
        }
        let fqn = match &self.namespace {
            Some(ns) => format!("{ns}\\{name}"),
            None => name.into_owned(),
        };
        self.out.push(Declaration::new(fqn, kind));
    }
}
