//! Report output.
//!
//! The aggregation engine hands `(Summary, SourceFile)` records to a
//! [`ReportSink`]. A sink is addressed through [`SliceRef`] values naming
//! which cut of a file it should render: the whole file, one owner's
//! lines, one age bin's lines, or the summary-level owner/date tables.
//! Shipped sinks render plain text and markdown; richer emitters plug in
//! behind the same trait.

use std::collections::BTreeMap;
use std::fmt::Write;

use crate::category::Tla;
use crate::config::Policy;
use crate::sourcefile::SourceFile;
use crate::summary::{CoverCounts, Summary};

/// Which cut of the data a sink call addresses.
#[derive(Debug, Clone, Copy)]
pub enum SliceRef<'a> {
    /// Every line of one file.
    WholeFile { file: &'a SourceFile },
    /// One owner's rows of the summary-level owner table.
    OwnerSlice { owner: &'a str },
    /// One age bin's rows of the summary-level date table.
    DateSlice { bin: usize },
    /// One owner's lines within one file.
    FileOwnerSlice { file: &'a SourceFile, owner: &'a str },
    /// One age bin's lines within one file.
    FileDateSlice { file: &'a SourceFile, bin: usize },
}

impl<'a> SliceRef<'a> {
    /// Line numbers this slice selects, strictly increasing. Summary-level
    /// slices select no source lines.
    #[must_use]
    pub fn lines(&self) -> Vec<u32> {
        match self {
            SliceRef::WholeFile { file } => file.lines.iter().map(|l| l.no).collect(),
            SliceRef::FileOwnerSlice { file, owner } => file
                .line_owners
                .get(*owner)
                .map(|s| s.lines.clone())
                .unwrap_or_default(),
            SliceRef::FileDateSlice { file, bin } => file
                .line_bins
                .get(*bin)
                .map(|s| s.lines.clone())
                .unwrap_or_default(),
            SliceRef::OwnerSlice { .. } | SliceRef::DateSlice { .. } => Vec::new(),
        }
    }
}

/// Consumer of aggregated report data.
pub trait ReportSink {
    /// Called once with the rolled-up top summary before any node.
    fn begin(&mut self, top: &Summary) -> std::fmt::Result;

    /// Called once per directory node, children already merged.
    fn directory(&mut self, summary: &Summary) -> std::fmt::Result;

    /// Called per data cut: once per file with the whole-file slice, and
    /// again for each owner and age-bin cut that has content.
    fn slice(&mut self, summary: &Summary, slice: SliceRef<'_>) -> std::fmt::Result;

    /// Final rendered output.
    fn finish(&mut self) -> String;
}

fn percent(hit: u64, found: u64) -> f64 {
    if found == 0 {
        0.0
    } else {
        hit as f64 / found as f64 * 100.0
    }
}

fn cover_cell(counts: &CoverCounts) -> String {
    if counts.found == 0 {
        "-".to_string()
    } else {
        format!(
            "{}/{} ({:.1}%)",
            counts.hit,
            counts.found,
            percent(counts.hit, counts.found)
        )
    }
}

fn tla_breakdown(counts: &CoverCounts) -> String {
    let parts: Vec<String> = counts
        .per_tla
        .iter()
        .map(|(tla, n)| format!("{tla}:{n}"))
        .collect();
    parts.join(" ")
}

/// Plain text sink.
pub struct TextSink {
    out: String,
    bin_labels: Vec<String>,
}

impl TextSink {
    #[must_use]
    pub fn new(policy: &Policy) -> Self {
        Self {
            out: String::new(),
            bin_labels: (0..policy.date_bins.len())
                .map(|b| policy.date_bins.label(b))
                .collect(),
        }
    }

    fn age_rows(&mut self, label: &str, bins: &[CoverCounts]) -> std::fmt::Result {
        for (i, counts) in bins.iter().enumerate() {
            if counts.found == 0 {
                continue;
            }
            writeln!(
                self.out,
                "    {label} [{}]: {}",
                self.bin_labels
                    .get(i)
                    .map_or("?", String::as_str),
                cover_cell(counts)
            )?;
        }
        Ok(())
    }
}

impl ReportSink for TextSink {
    fn begin(&mut self, top: &Summary) -> std::fmt::Result {
        writeln!(self.out, "Coverage summary")?;
        writeln!(self.out, "{}", "-".repeat(70))?;
        writeln!(self.out, "  lines:     {}", cover_cell(&top.line))?;
        writeln!(self.out, "  branches:  {}", cover_cell(&top.branch))?;
        writeln!(self.out, "  functions: {}", cover_cell(&top.function))?;
        let breakdown = tla_breakdown(&top.line);
        if !breakdown.is_empty() {
            writeln!(self.out, "  categories: {breakdown}")?;
        }
        let bins = top.line_age.to_vec();
        self.age_rows("lines", &bins)?;
        if !top.owners_line.is_empty() {
            writeln!(self.out, "  owners:")?;
            let owners: BTreeMap<_, _> = top.owners_line.iter().collect();
            for (owner, counts) in owners {
                let total = counts.total();
                if total == 0 {
                    continue;
                }
                writeln!(self.out, "    {owner}: {total} lines")?;
            }
        }
        writeln!(self.out)?;
        Ok(())
    }

    fn directory(&mut self, summary: &Summary) -> std::fmt::Result {
        writeln!(
            self.out,
            "{:<50} {:>18} {:>18}",
            summary.name,
            cover_cell(&summary.line),
            cover_cell(&summary.branch)
        )
    }

    fn slice(&mut self, summary: &Summary, slice: SliceRef<'_>) -> std::fmt::Result {
        match slice {
            SliceRef::WholeFile { file } => {
                writeln!(
                    self.out,
                    "  {:<48} {:>18} {:>18}",
                    file.path,
                    cover_cell(&summary.line),
                    cover_cell(&summary.branch)
                )?;
                let breakdown = tla_breakdown(&summary.line);
                if !breakdown.is_empty() {
                    writeln!(self.out, "    {breakdown}")?;
                }
                Ok(())
            }
            SliceRef::FileOwnerSlice { file, owner } => {
                let lines = slice.lines();
                writeln!(
                    self.out,
                    "    {}: {} ({} lines)",
                    owner,
                    file.path,
                    lines.len()
                )
            }
            SliceRef::FileDateSlice { file, bin } => {
                let lines = slice.lines();
                writeln!(
                    self.out,
                    "    [{}] {}: {} lines",
                    self.bin_labels.get(bin).map_or("?", String::as_str),
                    file.path,
                    lines.len()
                )
            }
            SliceRef::OwnerSlice { owner } => {
                let (found, hit) = summary
                    .owners_line
                    .get(owner)
                    .map_or((0, 0), |counts| {
                        counts.iter().fold((0, 0), |(found, hit), (tla, n)| {
                            (
                                found + if tla.counts_found() { n } else { 0 },
                                hit + if tla.is_hit() { n } else { 0 },
                            )
                        })
                    });
                writeln!(
                    self.out,
                    "  owner {owner}: {}",
                    cover_cell(&CoverCounts {
                        found,
                        hit,
                        per_tla: Default::default()
                    })
                )
            }
            SliceRef::DateSlice { bin } => {
                writeln!(
                    self.out,
                    "  bin [{}]: {}",
                    self.bin_labels.get(bin).map_or("?", String::as_str),
                    summary
                        .line_age
                        .get(bin)
                        .map_or_else(|| "-".to_string(), cover_cell)
                )
            }
        }
    }

    fn finish(&mut self) -> String {
        std::mem::take(&mut self.out)
    }
}

/// Markdown sink.
pub struct MarkdownSink {
    out: String,
    rows: Vec<(String, CoverCounts, CoverCounts)>,
}

impl MarkdownSink {
    #[must_use]
    pub fn new(_policy: &Policy) -> Self {
        Self {
            out: String::new(),
            rows: Vec::new(),
        }
    }
}

impl ReportSink for MarkdownSink {
    fn begin(&mut self, top: &Summary) -> std::fmt::Result {
        writeln!(
            self.out,
            "### Coverage: {:.1}%\n",
            percent(top.line.hit, top.line.found)
        )?;
        writeln!(
            self.out,
            "**{}** of **{}** lines covered",
            top.line.hit, top.line.found
        )?;
        let gained = top.line.per_tla.get(Tla::Gnc) + top.line.per_tla.get(Tla::Gbc)
            + top.line.per_tla.get(Tla::Gic);
        let lost = top.line.per_tla.get(Tla::Lbc);
        if gained > 0 || lost > 0 {
            writeln!(self.out, " (+{gained} gained, -{lost} lost)")?;
        }
        writeln!(self.out)?;
        writeln!(self.out, "| File | Lines | Branches |")?;
        writeln!(self.out, "|:-----|------:|---------:|")?;
        Ok(())
    }

    fn directory(&mut self, summary: &Summary) -> std::fmt::Result {
        self.rows.push((
            format!("**{}/**", summary.name),
            summary.line.clone(),
            summary.branch.clone(),
        ));
        Ok(())
    }

    fn slice(&mut self, summary: &Summary, slice: SliceRef<'_>) -> std::fmt::Result {
        if let SliceRef::WholeFile { file } = slice {
            self.rows.push((
                format!("`{}`", file.path),
                summary.line.clone(),
                summary.branch.clone(),
            ));
        }
        Ok(())
    }

    fn finish(&mut self) -> String {
        let mut out = std::mem::take(&mut self.out);
        for (name, line, branch) in &self.rows {
            let _ = writeln!(
                out,
                "| {} | {} | {} |",
                name,
                cover_cell(line),
                cover_cell(branch)
            );
        }
        self.rows.clear();
        out
    }
}
