//! Post-ingest coverage filters.
//!
//! Filters remove coverpoints the instrumentation emitted but the report
//! should not judge: lone close braces, blank lines, explicitly excluded
//! ranges, and branch data on lines with no conditional. They run on the
//! trace counts before categorization, against either revision of the
//! source through the [`LineClass`] seam.

use std::collections::BTreeSet;

use crate::config::Policy;
use crate::diag::{Diag, DiagKind};
use crate::error::Result;
use crate::source::{self, BaselineView, SourceText};
use crate::trace::FileTrace;

/// Start of an explicitly excluded region.
const EXCL_START: &str = "LCOV_EXCL_START";
/// End of an explicitly excluded region.
const EXCL_STOP: &str = "LCOV_EXCL_STOP";
/// Exclude a single line.
const EXCL_LINE: &str = "LCOV_EXCL_LINE";
/// Exclude only branch data on a single line.
const EXCL_BR_LINE: &str = "LCOV_EXCL_BR_LINE";

/// Revision-independent line classification.
pub trait LineClass {
    fn text(&self, no: u32) -> Option<&str>;

    fn blank(&self, no: u32) -> bool {
        self.text(no).is_some_and(source::is_blank)
    }

    fn close_brace(&self, no: u32) -> bool {
        self.text(no).is_some_and(source::is_close_brace)
    }

    fn conditional(&self, no: u32) -> bool {
        self.text(no).is_some_and(source::contains_conditional)
    }
}

/// Classifier over the current revision.
pub struct CurrentClass<'a>(pub &'a SourceText);

impl LineClass for CurrentClass<'_> {
    fn text(&self, no: u32) -> Option<&str> {
        self.0.line(no)
    }
}

impl LineClass for BaselineView<'_> {
    fn text(&self, no: u32) -> Option<&str> {
        BaselineView::line(self, no)
    }
}

/// What a filter pass removed, plus which `omit_lines` patterns fired.
#[derive(Debug, Clone, Default)]
pub struct FilterOutcome {
    pub lines_removed: u64,
    pub branches_removed: u64,
    pub omit_used: Vec<bool>,
}

/// Apply the policy's enabled filters to one file's counts in place.
pub fn apply(
    trace: &mut FileTrace,
    class: &dyn LineClass,
    policy: &Policy,
    diag: &Diag,
) -> Result<FilterOutcome> {
    let mut outcome = FilterOutcome {
        omit_used: vec![false; policy.omit_lines.len()],
        ..FilterOutcome::default()
    };
    let filters = policy.filters;

    let mut drop_lines: BTreeSet<u32> = BTreeSet::new();
    let mut drop_branches: BTreeSet<u32> = BTreeSet::new();

    if filters.range {
        collect_exclusions(
            trace,
            class,
            policy,
            &mut drop_lines,
            &mut drop_branches,
            &mut outcome.omit_used,
        );
    }

    for &no in trace.lines.keys() {
        if filters.blank && class.blank(no) {
            drop_lines.insert(no);
        }
        if filters.brace && class.close_brace(no) {
            drop_lines.insert(no);
        }
    }

    if filters.branch {
        for &no in trace.branches.keys() {
            if !class.conditional(no) {
                drop_branches.insert(no);
            }
        }
    }

    for no in &drop_lines {
        if trace.lines.remove(no).is_some() {
            outcome.lines_removed += 1;
        }
        trace.checksums.remove(no);
        for per_test in trace.testcases.values_mut() {
            per_test.remove(no);
        }
        if trace.branches.remove(no).is_some() {
            outcome.branches_removed += 1;
        }
    }
    for no in &drop_branches {
        if trace.branches.remove(no).is_some() {
            outcome.branches_removed += 1;
        }
    }

    // A count on a line past the end of real source cannot be categorized
    // against text; report it but keep the count.
    let eof = class_line_count(class);
    if let Some(eof) = eof {
        for &no in trace.lines.keys() {
            if no > eof {
                diag.emit(
                    DiagKind::Unmapped,
                    &format!("{}:{no}: count past end of source ({eof} lines)", trace.path),
                )?;
            }
        }
    }

    Ok(outcome)
}

/// Walk the visible text once, collecting marker ranges, marked lines,
/// and `omit_lines` matches.
fn collect_exclusions(
    trace: &FileTrace,
    class: &dyn LineClass,
    policy: &Policy,
    drop_lines: &mut BTreeSet<u32>,
    drop_branches: &mut BTreeSet<u32>,
    omit_used: &mut [bool],
) {
    let max = trace
        .lines
        .keys()
        .chain(trace.branches.keys())
        .copied()
        .max()
        .unwrap_or(0);
    let mut excluding = false;
    let mut no = 1;
    while class.text(no).is_some() || no <= max {
        if let Some(text) = class.text(no) {
            if text.contains(EXCL_START) {
                excluding = true;
            }
            if excluding {
                drop_lines.insert(no);
            } else if text.contains(EXCL_LINE) {
                drop_lines.insert(no);
            } else if text.contains(EXCL_BR_LINE) {
                drop_branches.insert(no);
            }
            for (i, pattern) in policy.omit_lines.iter().enumerate() {
                if pattern.is_match(text) {
                    drop_lines.insert(no);
                    omit_used[i] = true;
                }
            }
            if text.contains(EXCL_STOP) {
                excluding = false;
            }
        }
        no += 1;
    }
}

fn class_line_count(class: &dyn LineClass) -> Option<u32> {
    let mut no = 1;
    while class.text(no).is_some() {
        no += 1;
    }
    if no == 1 {
        None
    } else {
        Some(no - 1)
    }
}
