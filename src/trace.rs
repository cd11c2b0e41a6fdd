//! Parser for the line-oriented coverage trace format.
//!
//! Key records:
//!   TN:<test name>
//!   SF:<absolute path to source file>
//!   FN:<line>,<function name>
//!   FNDA:<execution count>,<function name>
//!   FNF:<number of functions found>
//!   FNH:<number of functions hit>
//!   DA:<line number>,<execution count>[,<checksum>]
//!   BRDA:<line>,<block>,<branch>,<taken>   ("-" means 0)
//!   BRF:<branches found>
//!   BRH:<branches hit>
//!   LF:<lines found>
//!   LH:<lines hit>
//!   end_of_record
//!
//! The `FNF`/`FNH`/`LF`/`LH`/`BRF`/`BRH` totals are derived from the data
//! and ignored on input.

use std::collections::BTreeMap;
use std::io::BufRead;
use std::path::Path;

use anyhow::{Context, Result};

use crate::diag::{Diag, DiagKind};

/// Coverage data for one source file, summed across test cases.
#[derive(Debug, Clone, Default)]
pub struct FileTrace {
    pub path: String,
    /// Line number -> execution count.
    pub lines: BTreeMap<u32, u64>,
    /// Line number -> checksum, when the trace carries one.
    pub checksums: BTreeMap<u32, String>,
    /// Test name -> per-line counts, for per-testcase breakdowns.
    pub testcases: BTreeMap<String, BTreeMap<u32, u64>>,
    /// Line -> block id -> taken counts in branch order.
    pub branches: BTreeMap<u32, BTreeMap<u32, Vec<u64>>>,
    /// Function name -> declaration line.
    pub fn_lines: BTreeMap<String, u32>,
    /// Function name -> hit count.
    pub fn_hits: BTreeMap<String, u64>,
}

impl FileTrace {
    pub fn new(path: String) -> Self {
        Self {
            path,
            ..Default::default()
        }
    }

    /// Merge another block for the same source file. Counts are additive;
    /// branch vectors extend to the longer side.
    pub fn merge(&mut self, other: FileTrace) {
        for (line, count) in other.lines {
            *self.lines.entry(line).or_insert(0) += count;
        }
        for (line, sum) in other.checksums {
            self.checksums.entry(line).or_insert(sum);
        }
        for (test, lines) in other.testcases {
            let entry = self.testcases.entry(test).or_default();
            for (line, count) in lines {
                *entry.entry(line).or_insert(0) += count;
            }
        }
        for (line, blocks) in other.branches {
            let entry = self.branches.entry(line).or_default();
            for (block, taken) in blocks {
                let slot = entry.entry(block).or_default();
                if slot.len() < taken.len() {
                    slot.resize(taken.len(), 0);
                }
                for (i, t) in taken.iter().enumerate() {
                    slot[i] += t;
                }
            }
        }
        for (name, line) in other.fn_lines {
            self.fn_lines.entry(name).or_insert(line);
        }
        for (name, hits) in other.fn_hits {
            *self.fn_hits.entry(name).or_insert(0) += hits;
        }
    }
}

/// A fully parsed trace: path -> per-file data.
#[derive(Debug, Clone, Default)]
pub struct TraceFile {
    pub files: BTreeMap<String, FileTrace>,
}

impl TraceFile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a file block, merging with a previous block for the same path.
    pub fn insert(&mut self, file: FileTrace) {
        match self.files.get_mut(&file.path) {
            Some(existing) => existing.merge(file),
            None => {
                self.files.insert(file.path.clone(), file);
            }
        }
    }

    pub fn get(&self, path: &str) -> Option<&FileTrace> {
        self.files.get(path)
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }
}

/// Parse a trace file from disk.
pub fn parse_file(path: &Path, diag: &Diag) -> Result<TraceFile> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let mut reader = std::io::BufReader::new(file);
    parse_reader(&mut reader, diag)
}

/// Streaming trace parser. Emits into a [`TraceFile`] once per
/// `end_of_record`; repeated `SF:` blocks for the same path merge.
pub fn parse_reader(reader: &mut dyn BufRead, diag: &Diag) -> Result<TraceFile> {
    let mut trace = TraceFile::new();
    let mut current: Option<FileTrace> = None;
    let mut test_name = String::new();

    let mut raw_line = String::new();
    loop {
        raw_line.clear();
        let n = reader
            .read_line(&mut raw_line)
            .context("Invalid UTF-8 in trace data")?;
        if n == 0 {
            break; // EOF
        }

        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }

        if line == "end_of_record" {
            if let Some(file) = current.take() {
                trace.insert(file);
            }
            continue;
        }

        let (tag, value) = match line.split_once(':') {
            Some(pair) => pair,
            None => {
                diag.emit(DiagKind::Format, &format!("unrecognized trace line: '{line}'"))?;
                continue;
            }
        };

        match tag {
            "TN" => {
                test_name = value.to_string();
            }
            "SF" => {
                if let Some(file) = current.take() {
                    // Missing end_of_record before the next block.
                    diag.emit(
                        DiagKind::Format,
                        &format!("'{}' not terminated by end_of_record", file.path),
                    )?;
                    trace.insert(file);
                }
                current = Some(FileTrace::new(value.to_string()));
            }
            "DA" => {
                let Some(file) = current.as_mut() else {
                    diag.emit(DiagKind::Format, "DA record outside SF block")?;
                    continue;
                };
                let parts: Vec<&str> = value.splitn(3, ',').collect();
                if parts.len() < 2 {
                    diag.emit(DiagKind::Format, &format!("malformed DA record: '{line}'"))?;
                    continue;
                }
                let Ok(lineno) = parts[0].parse::<u32>() else {
                    diag.emit(DiagKind::Format, &format!("malformed DA record: '{line}'"))?;
                    continue;
                };
                match parts[1].parse::<i64>() {
                    Ok(count) if count >= 0 => {
                        *file.lines.entry(lineno).or_insert(0) += count as u64;
                        *file
                            .testcases
                            .entry(test_name.clone())
                            .or_default()
                            .entry(lineno)
                            .or_insert(0) += count as u64;
                        if let Some(sum) = parts.get(2) {
                            file.checksums.entry(lineno).or_insert_with(|| sum.to_string());
                        }
                    }
                    Ok(count) => {
                        diag.emit(
                            DiagKind::Negative,
                            &format!("{}: negative count {count} on line {lineno}", file.path),
                        )?;
                    }
                    Err(_) => {
                        diag.emit(DiagKind::Format, &format!("malformed DA record: '{line}'"))?;
                    }
                }
            }
            "BRDA" => {
                let Some(file) = current.as_mut() else {
                    diag.emit(DiagKind::Format, "BRDA record outside SF block")?;
                    continue;
                };
                let parts: Vec<&str> = value.splitn(4, ',').collect();
                if parts.len() != 4 {
                    diag.emit(DiagKind::Branch, &format!("malformed BRDA record: '{line}'"))?;
                    continue;
                }
                let (Ok(lineno), Ok(block), Ok(branch)) = (
                    parts[0].parse::<u32>(),
                    parts[1].parse::<u32>(),
                    parts[2].parse::<u32>(),
                ) else {
                    diag.emit(DiagKind::Branch, &format!("malformed BRDA record: '{line}'"))?;
                    continue;
                };
                let taken = if parts[3] == "-" {
                    0
                } else {
                    match parts[3].parse::<i64>() {
                        Ok(t) if t >= 0 => t as u64,
                        Ok(t) => {
                            diag.emit(
                                DiagKind::Negative,
                                &format!(
                                    "{}: negative branch count {t} on line {lineno}",
                                    file.path
                                ),
                            )?;
                            continue;
                        }
                        Err(_) => {
                            diag.emit(
                                DiagKind::Branch,
                                &format!("malformed BRDA record: '{line}'"),
                            )?;
                            continue;
                        }
                    }
                };
                let slot = file
                    .branches
                    .entry(lineno)
                    .or_default()
                    .entry(block)
                    .or_default();
                let idx = branch as usize;
                if slot.len() <= idx {
                    slot.resize(idx + 1, 0);
                }
                slot[idx] += taken;
            }
            "FN" => {
                let Some(file) = current.as_mut() else {
                    diag.emit(DiagKind::Format, "FN record outside SF block")?;
                    continue;
                };
                if let Some((line_str, name)) = value.split_once(',') {
                    if let Ok(start_line) = line_str.parse::<u32>() {
                        file.fn_lines.entry(name.to_string()).or_insert(start_line);
                    } else {
                        diag.emit(DiagKind::Format, &format!("malformed FN record: '{line}'"))?;
                    }
                } else {
                    diag.emit(DiagKind::Format, &format!("malformed FN record: '{line}'"))?;
                }
            }
            "FNDA" => {
                let Some(file) = current.as_mut() else {
                    diag.emit(DiagKind::Format, "FNDA record outside SF block")?;
                    continue;
                };
                if let Some((count_str, name)) = value.split_once(',') {
                    match count_str.parse::<i64>() {
                        Ok(count) if count >= 0 => {
                            *file.fn_hits.entry(name.to_string()).or_insert(0) += count as u64;
                        }
                        Ok(count) => {
                            diag.emit(
                                DiagKind::Negative,
                                &format!("{}: negative hit count {count} for '{name}'", file.path),
                            )?;
                        }
                        Err(_) => {
                            diag.emit(
                                DiagKind::Format,
                                &format!("malformed FNDA record: '{line}'"),
                            )?;
                        }
                    }
                }
            }
            // Summary totals are derived from the data.
            "LF" | "LH" | "FNF" | "FNH" | "BRF" | "BRH" => {}
            _ => {
                diag.emit(
                    DiagKind::Unsupported,
                    &format!("unrecognized trace record: '{tag}'"),
                )?;
            }
        }
    }

    // Trace ended without a final end_of_record.
    if let Some(file) = current.take() {
        trace.insert(file);
    }

    Ok(trace)
}
