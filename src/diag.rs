//! Diagnostic reporting with a closed set of message kinds.
//!
//! Every anomaly the engine can detect maps to one [`DiagKind`]. Each kind
//! is configurable as fatal, warning, or ignored, and warnings are subject
//! to a per-kind maximum-count suppressor. Messages print to stderr with a
//! stable prefix naming the kind so they can be grepped and asserted on.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::error::{DiffcovError, Result};

/// The closed set of diagnostic kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagKind {
    /// Source file unreadable; content was synthesized.
    Source,
    /// Coverage count references a line with no annotation or no source.
    Unmapped,
    /// Coverpoint fell outside the closed category set or onto a non-code line.
    Category,
    /// Diff entry matches a trace path by basename only.
    Path,
    /// Baseline and current traces disagree structurally.
    Inconsistent,
    /// Checksum disagreement between trace and current source.
    Mismatch,
    /// Branch count structure malformed.
    Branch,
    /// Version script disagrees with the trace.
    Version,
    /// Diff contains no differences.
    Empty,
    /// Include/exclude/substitute pattern matched nothing.
    Unused,
    /// Worker exited non-zero or returned a garbled result.
    Parallel,
    /// Optional external helper unavailable (annotator only).
    Package,
    /// Negative count in input data.
    Negative,
    /// Count arithmetic anomaly.
    Count,
    /// Malformed input record.
    Format,
    /// Corrupt intermediate data.
    Corrupt,
    /// Input uses a feature this engine does not support.
    Unsupported,
}

impl DiagKind {
    pub const ALL: [DiagKind; 17] = [
        DiagKind::Source,
        DiagKind::Unmapped,
        DiagKind::Category,
        DiagKind::Path,
        DiagKind::Inconsistent,
        DiagKind::Mismatch,
        DiagKind::Branch,
        DiagKind::Version,
        DiagKind::Empty,
        DiagKind::Unused,
        DiagKind::Parallel,
        DiagKind::Package,
        DiagKind::Negative,
        DiagKind::Count,
        DiagKind::Format,
        DiagKind::Corrupt,
        DiagKind::Unsupported,
    ];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            DiagKind::Source => "source",
            DiagKind::Unmapped => "unmapped",
            DiagKind::Category => "category",
            DiagKind::Path => "path",
            DiagKind::Inconsistent => "inconsistent",
            DiagKind::Mismatch => "mismatch",
            DiagKind::Branch => "branch",
            DiagKind::Version => "version",
            DiagKind::Empty => "empty",
            DiagKind::Unused => "unused",
            DiagKind::Parallel => "parallel",
            DiagKind::Package => "package",
            DiagKind::Negative => "negative",
            DiagKind::Count => "count",
            DiagKind::Format => "format",
            DiagKind::Corrupt => "corrupt",
            DiagKind::Unsupported => "unsupported",
        }
    }
}

impl fmt::Display for DiagKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DiagKind {
    type Err = DiffcovError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        DiagKind::ALL
            .iter()
            .copied()
            .find(|k| k.name() == s.to_lowercase())
            .ok_or_else(|| DiffcovError::Parse(format!("Unknown message kind: '{s}'")))
    }
}

/// How a diagnostic kind is handled when raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Fatal,
    Warn,
    Ignore,
}

#[derive(Debug, Default)]
struct DiagInner {
    severity: BTreeMap<DiagKind, Severity>,
    counts: BTreeMap<DiagKind, u64>,
    suppressed: BTreeMap<DiagKind, bool>,
    captured: Option<String>,
}

/// Diagnostic reporter.
///
/// The parent reporter writes to stderr. Worker threads switch on capture
/// mode so their messages land in the per-task `.err` file and are replayed
/// by the parent at reap time, in reap order.
pub struct Diag {
    max_message_count: u64,
    stop_on_error: bool,
    inner: Mutex<DiagInner>,
}

impl Diag {
    #[must_use]
    pub fn new(max_message_count: u64, stop_on_error: bool) -> Self {
        Self {
            max_message_count,
            stop_on_error,
            inner: Mutex::new(DiagInner::default()),
        }
    }

    /// Mark a set of kinds as ignored (from `ignore_errors`).
    pub fn ignore(&self, kinds: &[DiagKind]) {
        let mut inner = self.inner.lock().unwrap();
        for k in kinds {
            inner.severity.insert(*k, Severity::Ignore);
        }
    }

    /// Override the severity of one kind.
    pub fn set_severity(&self, kind: DiagKind, severity: Severity) {
        self.inner.lock().unwrap().severity.insert(kind, severity);
    }

    /// Begin capturing messages into a buffer instead of stderr.
    pub fn start_capture(&self) {
        self.inner.lock().unwrap().captured = Some(String::new());
    }

    /// Stop capturing and return the buffered messages.
    pub fn take_captured(&self) -> String {
        self.inner
            .lock()
            .unwrap()
            .captured
            .take()
            .unwrap_or_default()
    }

    /// Number of messages raised for a kind, including suppressed ones.
    #[must_use]
    pub fn count(&self, kind: DiagKind) -> u64 {
        self.inner
            .lock()
            .unwrap()
            .counts
            .get(&kind)
            .copied()
            .unwrap_or(0)
    }

    /// Raise a diagnostic. Returns `Err` only when the kind is fatal
    /// (either configured so or `stop_on_error` is set).
    pub fn emit(&self, kind: DiagKind, message: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        *inner.counts.entry(kind).or_insert(0) += 1;

        let severity = if self.stop_on_error {
            Severity::Fatal
        } else {
            inner
                .severity
                .get(&kind)
                .copied()
                .unwrap_or(Severity::Warn)
        };

        match severity {
            Severity::Ignore => Ok(()),
            Severity::Fatal => {
                let line = format!("diffcov: error: ({kind}) {message}");
                match inner.captured.as_mut() {
                    Some(buf) => {
                        buf.push_str(&line);
                        buf.push('\n');
                    }
                    None => eprintln!("{line}"),
                }
                Err(DiffcovError::Fatal {
                    kind,
                    message: message.to_string(),
                })
            }
            Severity::Warn => {
                let n = inner.counts[&kind];
                if self.max_message_count > 0 && n > self.max_message_count {
                    if !inner.suppressed.get(&kind).copied().unwrap_or(false) {
                        inner.suppressed.insert(kind, true);
                        let line = format!(
                            "diffcov: warning: ({kind}) suppressing further messages after {} occurrences",
                            self.max_message_count
                        );
                        match inner.captured.as_mut() {
                            Some(buf) => {
                                buf.push_str(&line);
                                buf.push('\n');
                            }
                            None => eprintln!("{line}"),
                        }
                    }
                    return Ok(());
                }
                let line = format!("diffcov: warning: ({kind}) {message}");
                match inner.captured.as_mut() {
                    Some(buf) => {
                        buf.push_str(&line);
                        buf.push('\n');
                    }
                    None => eprintln!("{line}"),
                }
                Ok(())
            }
        }
    }

    /// Fold a worker's diagnostic counts into this reporter so the post-run
    /// summary reflects the whole run.
    pub fn absorb_counts(&self, counts: &BTreeMap<DiagKind, u64>) {
        let mut inner = self.inner.lock().unwrap();
        for (k, n) in counts {
            *inner.counts.entry(*k).or_insert(0) += n;
        }
    }

    /// Snapshot of all nonzero counts, for worker dumps.
    #[must_use]
    pub fn counts(&self) -> BTreeMap<DiagKind, u64> {
        self.inner.lock().unwrap().counts.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_roundtrip() {
        for kind in DiagKind::ALL {
            assert_eq!(kind.name().parse::<DiagKind>().unwrap(), kind);
        }
        assert!("bogus".parse::<DiagKind>().is_err());
    }

    #[test]
    fn test_warn_is_recoverable() {
        let diag = Diag::new(0, false);
        diag.start_capture();
        assert!(diag.emit(DiagKind::Branch, "odd block").is_ok());
        assert_eq!(diag.count(DiagKind::Branch), 1);
        let captured = diag.take_captured();
        assert!(captured.contains("(branch) odd block"));
    }

    #[test]
    fn test_fatal_propagates() {
        let diag = Diag::new(0, false);
        diag.set_severity(DiagKind::Corrupt, Severity::Fatal);
        diag.start_capture();
        assert!(diag.emit(DiagKind::Corrupt, "bad dump").is_err());
    }

    #[test]
    fn test_stop_on_error_promotes_everything() {
        let diag = Diag::new(0, true);
        diag.start_capture();
        assert!(diag.emit(DiagKind::Empty, "no changes").is_err());
    }

    #[test]
    fn test_ignored_kind_is_silent() {
        let diag = Diag::new(0, false);
        diag.ignore(&[DiagKind::Empty]);
        diag.start_capture();
        assert!(diag.emit(DiagKind::Empty, "no changes").is_ok());
        assert_eq!(diag.take_captured(), "");
        // Still counted.
        assert_eq!(diag.count(DiagKind::Empty), 1);
    }

    #[test]
    fn test_max_count_suppression() {
        let diag = Diag::new(2, false);
        diag.start_capture();
        for _ in 0..5 {
            diag.emit(DiagKind::Unmapped, "line 3 has no source").unwrap();
        }
        let captured = diag.take_captured();
        assert_eq!(captured.matches("line 3 has no source").count(), 2);
        assert_eq!(captured.matches("suppressing").count(), 1);
        assert_eq!(diag.count(DiagKind::Unmapped), 5);
    }
}
