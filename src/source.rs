//! Source text access for both revisions.
//!
//! The current revision reads straight from disk; the baseline view is
//! reconstructed from the current text through the diff map, so baseline
//! line predicates can be answered without a baseline checkout.

use std::path::Path;

use crate::diag::{Diag, DiagKind};
use crate::diffmap::{DiffKind, DiffMap, Side};
use crate::error::Result;

/// Text of one source file at the current revision.
#[derive(Debug, Clone)]
pub struct SourceText {
    pub lines: Vec<String>,
    /// Content was synthesized because the file was unreadable.
    pub synthesized: bool,
}

impl SourceText {
    /// Read a file, synthesizing `min_lines` empty lines on failure so
    /// every trace-referenced line still has a row in the report.
    pub fn load(path: &Path, min_lines: u32, diag: &Diag) -> Result<SourceText> {
        match std::fs::read_to_string(path) {
            Ok(text) => Ok(SourceText {
                lines: text.lines().map(str::to_string).collect(),
                synthesized: false,
            }),
            Err(err) => {
                diag.emit(
                    DiagKind::Source,
                    &format!("cannot read '{}': {err}", path.display()),
                )?;
                Ok(SourceText::synthesize(min_lines))
            }
        }
    }

    #[must_use]
    pub fn synthesize(min_lines: u32) -> SourceText {
        SourceText {
            lines: vec![String::new(); min_lines as usize],
            synthesized: true,
        }
    }

    /// 1-based line access.
    #[must_use]
    pub fn line(&self, no: u32) -> Option<&str> {
        if no == 0 {
            return None;
        }
        self.lines.get(no as usize - 1).map(String::as_str)
    }

    #[must_use]
    pub fn line_count(&self) -> u32 {
        self.lines.len() as u32
    }
}

/// Baseline view over a current source, answered through the diff map.
pub struct BaselineView<'a> {
    pub current: &'a SourceText,
    pub diff: &'a DiffMap,
    pub path: &'a str,
}

impl<'a> BaselineView<'a> {
    #[must_use]
    pub fn new(current: &'a SourceText, diff: &'a DiffMap, path: &'a str) -> Self {
        Self {
            current,
            diff,
            path,
        }
    }

    /// Text of a baseline line; `None` when the line no longer exists.
    #[must_use]
    pub fn line(&self, bline: u32) -> Option<&str> {
        if self.diff.kind(self.path, Side::Old, bline) == DiffKind::Delete {
            return None;
        }
        let cline = self.diff.lookup(self.path, Side::Old, bline)?;
        self.current.line(cline)
    }

    #[must_use]
    pub fn is_blank(&self, bline: u32) -> bool {
        self.line(bline).is_some_and(is_blank)
    }

    #[must_use]
    pub fn is_close_brace(&self, bline: u32) -> bool {
        self.line(bline).is_some_and(is_close_brace)
    }

    #[must_use]
    pub fn contains_conditional(&self, bline: u32) -> bool {
        self.line(bline).is_some_and(contains_conditional)
    }

    #[must_use]
    pub fn is_character(&self, bline: u32) -> bool {
        self.line(bline).is_some_and(is_character)
    }
}

/// Whitespace-only line.
#[must_use]
pub fn is_blank(line: &str) -> bool {
    line.trim().is_empty()
}

/// A line holding nothing but a closing brace (optionally terminated).
#[must_use]
pub fn is_close_brace(line: &str) -> bool {
    matches!(line.trim(), "}" | "};" | "})" | "});")
}

/// A line holding a single punctuation character, e.g. a lone brace or
/// semicolon continuation.
#[must_use]
pub fn is_character(line: &str) -> bool {
    let t = line.trim();
    t.len() == 1 && !t.chars().next().unwrap().is_alphanumeric()
}

/// Whether a line plausibly contains a conditional, used by the
/// branch-on-unconditional-line filter.
#[must_use]
pub fn contains_conditional(line: &str) -> bool {
    let code = line.split("//").next().unwrap_or(line);
    if code.contains('?') || code.contains("&&") || code.contains("||") {
        return true;
    }
    for keyword in ["if", "while", "for", "switch", "case", "catch"] {
        let mut rest = code;
        while let Some(pos) = rest.find(keyword) {
            let before_ok = pos == 0
                || !rest[..pos]
                    .chars()
                    .last()
                    .unwrap()
                    .is_alphanumeric();
            let after = &rest[pos + keyword.len()..];
            let after_ok = after
                .chars()
                .next()
                .map_or(true, |c| !c.is_alphanumeric() && c != '_');
            if before_ok && after_ok {
                return true;
            }
            rest = after;
        }
    }
    false
}
