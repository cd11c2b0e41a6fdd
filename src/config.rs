//! Run-wide configuration.
//!
//! Everything the original tool kept as process-global mutable state
//! (category tables, cutpoints, filter flags) is collected here into a
//! single immutable [`Policy`] built once in `main` and passed by
//! reference to every component.

use std::path::PathBuf;

use anyhow::{Context, Result};
use regex::Regex;

/// Age-bin cutpoints, in days, strictly increasing.
///
/// Cutpoints `c1 < c2 < ... < cn` define `n + 1` half-open bins
/// `[..c1], (c1,c2], ..., (cn,..)`.
#[derive(Debug, Clone)]
pub struct AgeBins {
    cutpoints: Vec<u64>,
}

impl AgeBins {
    /// Parse a comma-separated cutpoint list, e.g. `"7,30,180"`.
    pub fn parse(spec: &str) -> Result<Self> {
        let mut cutpoints = Vec::new();
        for part in spec.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let days: u64 = part
                .parse()
                .with_context(|| format!("Invalid date bin cutpoint: '{part}'"))?;
            cutpoints.push(days);
        }
        if cutpoints.windows(2).any(|w| w[0] >= w[1]) {
            anyhow::bail!("Date bin cutpoints must be strictly increasing: '{spec}'");
        }
        Ok(Self { cutpoints })
    }

    /// Number of bins (`cutpoints + 1`).
    #[must_use]
    pub fn len(&self) -> usize {
        self.cutpoints.len() + 1
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// The bin index holding an age. Bin `i` is `(c_i-1, c_i]`; the last
    /// bin is unbounded above.
    #[must_use]
    pub fn bin_of(&self, age_days: u64) -> usize {
        self.cutpoints.partition_point(|&c| c < age_days)
    }

    /// Human-readable label for a bin, used by the report sinks.
    #[must_use]
    pub fn label(&self, bin: usize) -> String {
        if self.cutpoints.is_empty() {
            return "all".to_string();
        }
        if bin == 0 {
            format!("..{} days", self.cutpoints[0])
        } else if bin < self.cutpoints.len() {
            format!("{}..{} days", self.cutpoints[bin - 1], self.cutpoints[bin])
        } else {
            format!("{}.. days", self.cutpoints[self.cutpoints.len() - 1])
        }
    }
}

impl Default for AgeBins {
    fn default() -> Self {
        Self {
            cutpoints: vec![7, 30, 180],
        }
    }
}

/// Post-ingest filters enabled via the `--filter` option.
#[derive(Debug, Clone, Copy, Default)]
pub struct FilterSet {
    /// Drop line coverpoints on lone close-brace lines.
    pub brace: bool,
    /// Drop line coverpoints on blank lines.
    pub blank: bool,
    /// Honor exclusion markers and `omit_lines` ranges.
    pub range: bool,
    /// Drop branch data on lines with no conditional.
    pub branch: bool,
    /// Merge function aliases into their leader before categorization.
    pub function_alias: bool,
}

impl FilterSet {
    /// Parse a comma-separated filter list, e.g. `"brace,blank,branch"`.
    pub fn parse(spec: &str) -> Result<Self> {
        let mut set = Self::default();
        for part in spec.split(',') {
            let part = part.trim();
            match part {
                "" => {}
                "brace" => set.brace = true,
                "blank" => set.blank = true,
                "range" => set.range = true,
                "branch" => set.branch = true,
                "function" | "function-alias" => set.function_alias = true,
                "all" => {
                    set.brace = true;
                    set.blank = true;
                    set.range = true;
                    set.branch = true;
                    set.function_alias = true;
                }
                _ => anyhow::bail!(
                    "Unknown filter: '{part}'. Supported: brace, blank, range, branch, function"
                ),
            }
        }
        Ok(set)
    }
}

/// A `s/pattern/replacement/` path rewrite applied during ingest.
#[derive(Debug, Clone)]
pub struct Substitution {
    pub pattern: Regex,
    pub replacement: String,
}

impl Substitution {
    /// Parse `s/pattern/replacement/` (any single-character delimiter
    /// after the leading `s`).
    pub fn parse(spec: &str) -> Result<Self> {
        let rest = spec
            .strip_prefix('s')
            .with_context(|| format!("Substitution must start with 's': '{spec}'"))?;
        let delim = rest
            .chars()
            .next()
            .with_context(|| format!("Empty substitution: '{spec}'"))?;
        let parts: Vec<&str> = rest[delim.len_utf8()..].split(delim).collect();
        if parts.len() < 2 {
            anyhow::bail!("Malformed substitution: '{spec}'");
        }
        let pattern = Regex::new(parts[0])
            .with_context(|| format!("Invalid substitution pattern: '{}'", parts[0]))?;
        Ok(Self {
            pattern,
            replacement: parts[1].to_string(),
        })
    }

    #[must_use]
    pub fn apply(&self, path: &str) -> Option<String> {
        if self.pattern.is_match(path) {
            Some(
                self.pattern
                    .replace(path, self.replacement.as_str())
                    .into_owned(),
            )
        } else {
            None
        }
    }
}

/// Immutable run configuration.
#[derive(Debug, Clone, Default)]
pub struct Policy {
    /// Current-revision trace files.
    pub tracefiles: Vec<PathBuf>,
    /// Baseline trace; enables differential mode.
    pub baseline_file: Option<PathBuf>,
    /// Unified diff between the baseline and current snapshots.
    pub diff_file: Option<PathBuf>,
    /// Command line for the per-file annotator.
    pub annotate_script: Option<String>,
    /// Command line for the per-node coverage criteria predicate.
    pub criteria_script: Option<String>,
    /// Command line for the per-file version check.
    pub version_script: Option<String>,
    /// Age-bin cutpoints.
    pub date_bins: AgeBins,
    pub function_coverage: bool,
    pub branch_coverage: bool,
    /// Multi-level directory tree versus two-level view.
    pub hierarchical: bool,
    /// Accept a single unambiguous basename match between diff and trace.
    pub elide_path_mismatch: bool,
    /// Remap UIC -> UBC and GIC -> CBC for files that predate the baseline.
    pub new_file_as_baseline: bool,
    /// Worker ceiling; 0 means host concurrency.
    pub parallel: usize,
    /// Soft RSS cap in MB; 0 means uncapped.
    pub memory_mb: u64,
    /// Leading path components stripped from diff paths.
    pub strip: usize,
    /// Keep the scratch directory after the run.
    pub preserve: bool,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub substitute: Vec<Substitution>,
    pub omit_lines: Vec<Regex>,
    pub filters: FilterSet,
    pub stop_on_error: bool,
    /// Diagnostic kinds demoted to silence.
    pub ignore_errors: Vec<crate::diag::DiagKind>,
    pub max_message_count: u64,
}

impl Policy {
    /// Resolved worker count.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        if self.parallel == 0 {
            num_cpus::get()
        } else {
            self.parallel
        }
    }

    /// Whether a baseline trace is configured (differential mode).
    #[must_use]
    pub fn differential(&self) -> bool {
        self.baseline_file.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_age_bins_default() {
        let bins = AgeBins::default();
        assert_eq!(bins.len(), 4);
        assert_eq!(bins.bin_of(0), 0);
        assert_eq!(bins.bin_of(7), 0);
        assert_eq!(bins.bin_of(8), 1);
        assert_eq!(bins.bin_of(30), 1);
        assert_eq!(bins.bin_of(31), 2);
        assert_eq!(bins.bin_of(180), 2);
        assert_eq!(bins.bin_of(181), 3);
        assert_eq!(bins.bin_of(100_000), 3);
    }

    #[test]
    fn test_age_bins_parse() {
        let bins = AgeBins::parse("1,10").unwrap();
        assert_eq!(bins.len(), 3);
        assert_eq!(bins.bin_of(1), 0);
        assert_eq!(bins.bin_of(2), 1);
        assert_eq!(bins.bin_of(11), 2);
    }

    #[test]
    fn test_age_bins_must_increase() {
        assert!(AgeBins::parse("30,7").is_err());
        assert!(AgeBins::parse("7,7").is_err());
    }

    #[test]
    fn test_age_bins_labels() {
        let bins = AgeBins::default();
        assert_eq!(bins.label(0), "..7 days");
        assert_eq!(bins.label(1), "7..30 days");
        assert_eq!(bins.label(3), "180.. days");
    }

    #[test]
    fn test_filter_set_parse() {
        let set = FilterSet::parse("brace,blank").unwrap();
        assert!(set.brace);
        assert!(set.blank);
        assert!(!set.branch);
        assert!(FilterSet::parse("bogus").is_err());

        let all = FilterSet::parse("all").unwrap();
        assert!(all.brace && all.blank && all.range && all.branch && all.function_alias);
    }

    #[test]
    fn test_substitution() {
        let sub = Substitution::parse("s/^build\\///").unwrap();
        assert_eq!(sub.apply("build/src/a.c").as_deref(), Some("src/a.c"));
        assert_eq!(sub.apply("src/a.c"), None);
    }

    #[test]
    fn test_substitution_alternate_delimiter() {
        let sub = Substitution::parse("s#/tmp/work#src#").unwrap();
        assert_eq!(sub.apply("/tmp/work/a.c").as_deref(), Some("src/a.c"));
    }
}
