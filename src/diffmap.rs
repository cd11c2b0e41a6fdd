//! Unified-diff ingestion (`diff -u` output).
//!
//! For every file named in the diff this builds an ordered, non-overlapping
//! partition of line numbers into equal/insert/delete chunks, plus the
//! bijection between baseline and current line numbers on equal chunks.
//! A line starting with `=== path` marks a file identical in both
//! revisions.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::config::Policy;
use crate::diag::{Diag, DiagKind};

/// Which revision a line number refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Old,
    New,
}

/// Change classification of a chunk or a single line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffKind {
    Equal,
    Insert,
    Delete,
}

/// One chunk of the partition. `old_count == 0` iff insert,
/// `new_count == 0` iff delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub kind: DiffKind,
    pub old_start: u32,
    pub old_count: u32,
    pub new_start: u32,
    pub new_count: u32,
}

impl Chunk {
    fn start(&self, side: Side) -> u32 {
        match side {
            Side::Old => self.old_start,
            Side::New => self.new_start,
        }
    }

    fn count(&self, side: Side) -> u32 {
        match side {
            Side::Old => self.old_count,
            Side::New => self.new_count,
        }
    }

    fn contains(&self, side: Side, line: u32) -> bool {
        let count = self.count(side);
        count > 0 && line >= self.start(side) && line < self.start(side) + count
    }
}

/// Chunk partition for one file.
#[derive(Debug, Clone, Default)]
pub struct FileDiff {
    /// Baseline path; `None` when the file was added or deleted.
    pub baseline_path: Option<String>,
    pub chunks: Vec<Chunk>,
    /// First baseline line past the last chunk.
    tail_old: u32,
    /// First current line past the last chunk.
    tail_new: u32,
}

impl FileDiff {
    fn identical() -> Self {
        Self {
            baseline_path: None,
            chunks: Vec::new(),
            tail_old: 1,
            tail_new: 1,
        }
    }
}

/// Per-file diff partitions with line-number mapping.
#[derive(Debug, Clone)]
pub struct DiffMap {
    files: BTreeMap<String, FileDiff>,
    loaded: bool,
    /// Kind reported when no diff is loaded: equal in differential mode,
    /// insert otherwise.
    default_kind: DiffKind,
}

impl DiffMap {
    /// An empty map, for runs without a diff file.
    #[must_use]
    pub fn empty(differential: bool) -> Self {
        Self {
            files: BTreeMap::new(),
            loaded: false,
            default_kind: if differential {
                DiffKind::Equal
            } else {
                DiffKind::Insert
            },
        }
    }

    /// Parse unified-diff text. `strip` leading path components are removed
    /// from every diff path after the conventional `a/`/`b/` prefixes.
    pub fn parse(text: &str, strip: usize, diag: &Diag) -> Result<Self> {
        let mut map = Self::empty(true);
        map.loaded = true;

        let mut builder: Option<FileBuilder> = None;
        let mut pending_old: Option<Option<String>> = None;
        // Lines remaining in the current hunk, per side.
        let mut old_rem: u32 = 0;
        let mut new_rem: u32 = 0;

        for raw in text.lines() {
            // Hunk content first: an added line whose text begins with "++ "
            // would otherwise be mistaken for a file header.
            if old_rem > 0 || new_rem > 0 {
                let Some(b) = builder.as_mut() else {
                    old_rem = 0;
                    new_rem = 0;
                    continue;
                };
                if raw.starts_with('\\') {
                    // "\ No newline at end of file"
                    continue;
                }
                if raw.starts_with('+') {
                    b.push(DiffKind::Insert);
                    new_rem = new_rem.saturating_sub(1);
                } else if raw.starts_with('-') {
                    b.push(DiffKind::Delete);
                    old_rem = old_rem.saturating_sub(1);
                } else {
                    // Context line; unified context lines start with a space
                    // but an empty context line may arrive fully trimmed.
                    b.push(DiffKind::Equal);
                    old_rem = old_rem.saturating_sub(1);
                    new_rem = new_rem.saturating_sub(1);
                }
                continue;
            }

            if let Some(rest) = raw.strip_prefix("=== ") {
                if let Some(b) = builder.take() {
                    b.finish(&mut map.files);
                }
                pending_old = None;
                old_rem = 0;
                new_rem = 0;
                let path = clean_path(rest.trim(), strip);
                let mut fd = FileDiff::identical();
                fd.baseline_path = Some(path.clone());
                map.files.insert(path, fd);
                continue;
            }
            if let Some(rest) = raw.strip_prefix("--- ") {
                if let Some(b) = builder.take() {
                    b.finish(&mut map.files);
                }
                old_rem = 0;
                new_rem = 0;
                let path = rest.split('\t').next().unwrap_or(rest).trim();
                pending_old = Some(if path == "/dev/null" {
                    None
                } else {
                    Some(clean_path(path, strip))
                });
                continue;
            }
            if let Some(rest) = raw.strip_prefix("+++ ") {
                let path = rest.split('\t').next().unwrap_or(rest).trim();
                let new_path = if path == "/dev/null" {
                    None
                } else {
                    Some(clean_path(path, strip))
                };
                let old_path = pending_old.take().unwrap_or(None);
                builder = Some(FileBuilder::new(old_path, new_path));
                continue;
            }
            if let Some(rest) = raw.strip_prefix("@@ ") {
                let Some(b) = builder.as_mut() else {
                    diag.emit(DiagKind::Format, &format!("hunk header outside file: '{raw}'"))?;
                    continue;
                };
                match parse_hunk_header(rest) {
                    Some((old_start, old_count, new_start, new_count)) => {
                        // A zero-count range names the line before the edit
                        // point, not the first edited line.
                        let old_start = if old_count == 0 { old_start + 1 } else { old_start };
                        let new_start = if new_count == 0 { new_start + 1 } else { new_start };
                        b.begin_hunk(old_start, new_start);
                        old_rem = old_count;
                        new_rem = new_count;
                    }
                    None => {
                        diag.emit(DiagKind::Format, &format!("malformed hunk header: '{raw}'"))?;
                        old_rem = 0;
                        new_rem = 0;
                    }
                }
                continue;
            }

            // Between files or hunks: `diff`/`index`/mode lines etc.
        }

        if let Some(b) = builder.take() {
            b.finish(&mut map.files);
        }

        if map.files.is_empty() || map.files.values().all(|f| f.chunks.is_empty()) {
            diag.emit(DiagKind::Empty, "diff contains no differences")?;
        }

        Ok(map)
    }

    /// Read and parse a diff file.
    pub fn load(path: &std::path::Path, strip: usize, diag: &Diag) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::parse(&text, strip, diag)
    }

    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Change classification of a line.
    #[must_use]
    pub fn kind(&self, file: &str, side: Side, line: u32) -> DiffKind {
        if !self.loaded {
            return self.default_kind;
        }
        let Some(fd) = self.files.get(file) else {
            return DiffKind::Equal;
        };
        for chunk in &fd.chunks {
            if chunk.contains(side, line) {
                return chunk.kind;
            }
        }
        DiffKind::Equal
    }

    /// Map a line number to the opposite revision. Defined on equal chunks
    /// and on the identical regions around them; `None` inside one-sided
    /// chunks.
    #[must_use]
    pub fn lookup(&self, file: &str, side: Side, line: u32) -> Option<u32> {
        if !self.loaded {
            return match self.default_kind {
                DiffKind::Equal => Some(line),
                _ => None,
            };
        }
        let Some(fd) = self.files.get(file) else {
            return Some(line);
        };
        let (tail_self, tail_other) = match side {
            Side::Old => (fd.tail_old, fd.tail_new),
            Side::New => (fd.tail_new, fd.tail_old),
        };
        let other = match side {
            Side::Old => Side::New,
            Side::New => Side::Old,
        };
        for chunk in &fd.chunks {
            if chunk.contains(side, line) {
                return match chunk.kind {
                    DiffKind::Equal => Some(chunk.start(other) + (line - chunk.start(side))),
                    // The sibling range is empty; clamp to its end.
                    DiffKind::Insert | DiffKind::Delete => None,
                };
            }
        }
        if line >= tail_self {
            // Past the last chunk both revisions are identical.
            return Some(line - tail_self + tail_other);
        }
        // Inside a leading identical region not covered by any chunk.
        Some(line)
    }

    /// Current paths named by the diff.
    pub fn files(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    /// Baseline path for a current path, when the file existed in baseline.
    #[must_use]
    pub fn baseline_path(&self, curr: &str) -> Option<&str> {
        self.files
            .get(curr)
            .and_then(|f| f.baseline_path.as_deref())
    }

    #[must_use]
    pub fn file(&self, path: &str) -> Option<&FileDiff> {
        self.files.get(path)
    }

    /// Path consistency check: a diff entry whose full path matches no
    /// trace path but whose basename does is reported, and with
    /// `elide_path_mismatch` a single unambiguous candidate is adopted.
    pub fn check_paths(
        &mut self,
        trace_paths: &BTreeSet<String>,
        policy: &Policy,
        diag: &Diag,
    ) -> crate::error::Result<()> {
        let diff_paths: Vec<String> = self.files.keys().cloned().collect();
        for diff_path in diff_paths {
            if trace_paths.contains(&diff_path) {
                continue;
            }
            let base = basename(&diff_path);
            let candidates: Vec<&String> = trace_paths
                .iter()
                .filter(|p| basename(p) == base)
                .collect();
            if candidates.is_empty() {
                continue;
            }
            let listed = candidates
                .iter()
                .map(|p| p.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            diag.emit(
                DiagKind::Path,
                &format!(
                    "diff entry '{diff_path}' matches trace path(s) by basename only: {listed}"
                ),
            )?;
            if policy.elide_path_mismatch && candidates.len() == 1 {
                let target = candidates[0].clone();
                if let Some(fd) = self.files.remove(&diff_path) {
                    self.files.insert(target, fd);
                }
            }
        }
        Ok(())
    }
}

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Strip the conventional `a/`/`b/` prefix and then `strip` leading
/// components.
fn clean_path(path: &str, strip: usize) -> String {
    let path = path
        .strip_prefix("a/")
        .or_else(|| path.strip_prefix("b/"))
        .unwrap_or(path);
    if strip == 0 {
        return path.to_string();
    }
    let mut parts = path.split('/');
    for _ in 0..strip {
        if parts.next().is_none() {
            break;
        }
    }
    let rest: Vec<&str> = parts.collect();
    if rest.is_empty() {
        path.to_string()
    } else {
        rest.join("/")
    }
}

/// Parse `-o[,c] +n[,c] @@` (the leading `@@ ` is already stripped).
fn parse_hunk_header(rest: &str) -> Option<(u32, u32, u32, u32)> {
    let mut parts = rest.split(' ');
    let old = parts.next()?.strip_prefix('-')?;
    let new = parts.next()?.strip_prefix('+')?;

    let parse_range = |s: &str| -> Option<(u32, u32)> {
        match s.split_once(',') {
            Some((start, count)) => Some((start.parse().ok()?, count.parse().ok()?)),
            None => Some((s.parse().ok()?, 1)),
        }
    };

    let (old_start, old_count) = parse_range(old)?;
    let (new_start, new_count) = parse_range(new)?;
    Some((old_start, old_count, new_start, new_count))
}

/// Accumulates chunk runs for one diff file.
struct FileBuilder {
    old_path: Option<String>,
    new_path: Option<String>,
    chunks: Vec<Chunk>,
    old_pos: u32,
    new_pos: u32,
    run_kind: Option<DiffKind>,
    run_old_start: u32,
    run_new_start: u32,
    run_old_count: u32,
    run_new_count: u32,
}

impl FileBuilder {
    fn new(old_path: Option<String>, new_path: Option<String>) -> Self {
        Self {
            old_path,
            new_path,
            chunks: Vec::new(),
            old_pos: 1,
            new_pos: 1,
            run_kind: None,
            run_old_start: 1,
            run_new_start: 1,
            run_old_count: 0,
            run_new_count: 0,
        }
    }

    fn begin_hunk(&mut self, old_start: u32, new_start: u32) {
        self.flush_run();
        // A zero start means the side is empty (new or deleted file).
        let old_start = old_start.max(1);
        let new_start = new_start.max(1);
        // The identical region between the previous hunk (or file start)
        // and this one becomes an explicit equal chunk so the line-number
        // mapping stays exact across accumulated inserts/deletes.
        if old_start > self.old_pos || new_start > self.new_pos {
            self.chunks.push(Chunk {
                kind: DiffKind::Equal,
                old_start: self.old_pos,
                old_count: old_start - self.old_pos,
                new_start: self.new_pos,
                new_count: new_start - self.new_pos,
            });
        }
        self.old_pos = old_start;
        self.new_pos = new_start;
    }

    fn push(&mut self, kind: DiffKind) {
        if self.run_kind != Some(kind) {
            self.flush_run();
            self.run_kind = Some(kind);
            self.run_old_start = self.old_pos;
            self.run_new_start = self.new_pos;
        }
        match kind {
            DiffKind::Equal => {
                self.run_old_count += 1;
                self.run_new_count += 1;
                self.old_pos += 1;
                self.new_pos += 1;
            }
            DiffKind::Insert => {
                self.run_new_count += 1;
                self.new_pos += 1;
            }
            DiffKind::Delete => {
                self.run_old_count += 1;
                self.old_pos += 1;
            }
        }
    }

    fn flush_run(&mut self) {
        if let Some(kind) = self.run_kind.take() {
            self.chunks.push(Chunk {
                kind,
                old_start: self.run_old_start,
                old_count: self.run_old_count,
                new_start: self.run_new_start,
                new_count: self.run_new_count,
            });
            self.run_old_count = 0;
            self.run_new_count = 0;
        }
    }

    fn finish(mut self, files: &mut BTreeMap<String, FileDiff>) {
        self.flush_run();
        // Equal-context chunks carry no information beyond the mapping the
        // tail positions provide, but they keep the partition explicit.
        let (key, baseline_path) = match (&self.new_path, &self.old_path) {
            (Some(new), Some(old)) => (new.clone(), Some(old.clone())),
            // Added file.
            (Some(new), None) => (new.clone(), None),
            // Deleted file is keyed under its baseline name.
            (None, Some(old)) => (old.clone(), None),
            (None, None) => return,
        };
        files.insert(
            key,
            FileDiff {
                baseline_path,
                chunks: self.chunks,
                tail_old: self.old_pos,
                tail_new: self.new_pos,
            },
        );
    }
}
