//! Makefile-style dependency file parsing.
//!
//! Compilers emit depfiles (`-MD -MF`) of the form:
//!
//! ```text
//! build/obj/a.cpp.o: src/a.cpp include/a.h \
//!   include/path\ with\ space.h
//! ```
//!
//! Escaping rules handled here:
//! - `\` followed by a newline joins the next line.
//! - `\ ` is a space inside a path.
//! - `\#` is a literal `#`; `$$` is a literal `$`.
//! - Any other backslash is kept (Windows separators).
//!
//! The target separator is the first `:` followed by whitespace or end of
//! line, so drive-letter colons (`C:\x`, `C:/x`) are never mistaken for it.
//! Several rules in one file are merged.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use rustc_hash::FxHashSet;

use crate::metadata::AuxFile;

/// Parsed contents of a depfile.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Depfile {
    pub targets: Vec<PathBuf>,
    pub dependencies: Vec<PathBuf>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DepfileError {
    /// A non-empty line has no target separator.
    MissingSeparator { line: usize },
    /// A rule has a separator but nothing before it.
    EmptyTarget { line: usize },
}

impl fmt::Display for DepfileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DepfileError::MissingSeparator { line } => {
                write!(f, "line {line}: no ':' target separator")
            }
            DepfileError::EmptyTarget { line } => write!(f, "line {line}: rule has no target"),
        }
    }
}

impl std::error::Error for DepfileError {}

impl Depfile {
    /// Parse depfile text. Whitespace-only input is an empty depfile.
    pub fn parse(text: &str) -> Result<Self, DepfileError> {
        let mut depfile = Depfile::default();
        let mut seen_targets = FxHashSet::default();
        let mut seen_deps = FxHashSet::default();

        for (line_no, line) in logical_lines(text) {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let Some(sep) = find_separator(&line) else {
                return Err(DepfileError::MissingSeparator { line: line_no });
            };
            let targets = tokenize(&line[..sep]);
            if targets.is_empty() {
                return Err(DepfileError::EmptyTarget { line: line_no });
            }
            for target in targets {
                if seen_targets.insert(target.clone()) {
                    depfile.targets.push(PathBuf::from(target));
                }
            }
            for dep in tokenize(&line[sep + 1..]) {
                if seen_deps.insert(dep.clone()) {
                    depfile.dependencies.push(PathBuf::from(dep));
                }
            }
        }

        Ok(depfile)
    }

    /// Load and parse the depfile at `path`.
    pub fn read(path: &Path) -> AuxFile<Depfile> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return AuxFile::Missing,
            Err(e) => return AuxFile::Malformed(e.to_string()),
        };
        match Depfile::parse(&text) {
            Ok(depfile) => AuxFile::Present(depfile),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "unparsable depfile");
                AuxFile::Malformed(e.to_string())
            }
        }
    }

    /// Dependencies that still exist on disk.
    pub fn existing_dependencies(&self) -> impl Iterator<Item = &Path> {
        self.dependencies
            .iter()
            .map(PathBuf::as_path)
            .filter(|p| p.exists())
    }
}

/// Join backslash-newline continuations, keeping the line number each
/// logical line started on.
fn logical_lines(text: &str) -> Vec<(usize, String)> {
    let mut lines = Vec::new();
    let mut current = String::new();
    let mut start = 1;

    for (idx, raw) in text.lines().enumerate() {
        let raw = raw.strip_suffix('\r').unwrap_or(raw);
        if current.is_empty() {
            start = idx + 1;
        }
        if let Some(body) = continued(raw) {
            current.push_str(body);
            current.push(' ');
        } else {
            current.push_str(raw);
            lines.push((start, std::mem::take(&mut current)));
        }
    }
    if !current.is_empty() {
        lines.push((start, current));
    }
    lines
}

/// If `line` ends in an unescaped continuation backslash, the line without it.
fn continued(line: &str) -> Option<&str> {
    let trailing = line.bytes().rev().take_while(|&b| b == b'\\').count();
    (trailing % 2 == 1).then(|| &line[..line.len() - 1])
}

fn find_separator(line: &str) -> Option<usize> {
    let bytes = line.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b':' => {
                let at_end = i + 1 == bytes.len();
                if at_end || bytes[i + 1].is_ascii_whitespace() {
                    return Some(i);
                }
                i += 1;
            }
            _ => i += 1,
        }
    }
    None
}

fn tokenize(s: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.peek() {
                Some(&next @ (' ' | '#')) => {
                    current.push(next);
                    chars.next();
                }
                _ => current.push('\\'),
            },
            '$' if chars.peek() == Some(&'$') => {
                current.push('$');
                chars.next();
            }
            c if c.is_whitespace() => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}
