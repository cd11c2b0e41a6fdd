//! Command-line surface.
//!
//! All options funnel into one immutable [`Policy`]; `to_policy` is kept
//! separate from argument parsing so it can be tested without a process
//! boundary.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use regex::Regex;

use crate::config::{AgeBins, FilterSet, Policy, Substitution};
use crate::diag::DiagKind;
use crate::emit::{MarkdownSink, ReportSink, TextSink};

/// Output style for the rendered report.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum Style {
    Text,
    Markdown,
}

impl Style {
    /// Get the sink for this style.
    #[must_use]
    pub fn sink(&self, policy: &Policy) -> Box<dyn ReportSink> {
        match self {
            Style::Text => Box::new(TextSink::new(policy)),
            Style::Markdown => Box::new(MarkdownSink::new(policy)),
        }
    }
}

/// diffcov: differential code-coverage categorization and reporting.
#[derive(Parser, Debug)]
#[command(name = "diffcov", version, about)]
pub struct Options {
    /// Coverage trace files for the current revision.
    #[arg(required = true)]
    pub tracefiles: Vec<PathBuf>,

    /// Baseline trace; enables differential mode.
    #[arg(long)]
    pub baseline_file: Option<PathBuf>,

    /// Unified diff between the baseline and current source snapshots.
    #[arg(long)]
    pub diff_file: Option<PathBuf>,

    /// Command producing `commit|author|when|text` per source line.
    #[arg(long)]
    pub annotate_script: Option<String>,

    /// Command evaluating `<name> <kind> <json>` per summary node.
    #[arg(long)]
    pub criteria_script: Option<String>,

    /// Command checking each source file against the trace revision.
    #[arg(long)]
    pub version_script: Option<String>,

    /// Comma-separated age-bin cutpoints in days.
    #[arg(long, default_value = "7,30,180")]
    pub date_bins: String,

    /// Disable function coverage.
    #[arg(long)]
    pub no_function_coverage: bool,

    /// Enable branch coverage.
    #[arg(long)]
    pub branch_coverage: bool,

    /// Multi-level directory tree instead of the two-level view.
    #[arg(long)]
    pub hierarchical: bool,

    /// Accept a single unambiguous basename match between diff and trace.
    #[arg(long)]
    pub elide_path_mismatch: bool,

    /// Treat files that predate the baseline as baseline code.
    #[arg(long)]
    pub new_file_as_baseline: bool,

    /// Worker ceiling; 0 means host concurrency.
    #[arg(long, default_value_t = 0)]
    pub parallel: usize,

    /// Soft worker memory cap in MB; 0 means uncapped.
    #[arg(long, default_value_t = 0)]
    pub memory: u64,

    /// Leading path components stripped from diff paths.
    #[arg(long, default_value_t = 0)]
    pub strip: usize,

    /// Keep the scratch directory after the run.
    #[arg(long)]
    pub preserve: bool,

    /// Only report files matching a pattern (may repeat).
    #[arg(long)]
    pub include: Vec<String>,

    /// Skip files matching a pattern (may repeat).
    #[arg(long)]
    pub exclude: Vec<String>,

    /// Path rewrite `s/pattern/replacement/` (may repeat).
    #[arg(long)]
    pub substitute: Vec<String>,

    /// Drop coverage on lines matching a regex (may repeat).
    #[arg(long)]
    pub omit_lines: Vec<String>,

    /// Post-ingest filters: brace, blank, range, branch, function, all.
    #[arg(long, default_value = "")]
    pub filter: String,

    /// Promote every diagnostic to fatal.
    #[arg(long)]
    pub stop_on_error: bool,

    /// Silence a diagnostic kind (may repeat).
    #[arg(long)]
    pub ignore_errors: Vec<String>,

    /// Per-kind message ceiling before suppression; 0 means unlimited.
    #[arg(long, default_value_t = 100)]
    pub max_message_count: u64,

    /// Report output style.
    #[arg(long, value_enum, default_value_t = Style::Text)]
    pub style: Style,

    /// Write the report here instead of stdout.
    #[arg(long)]
    pub output: Option<PathBuf>,
}

impl Options {
    /// Resolve every option into the run policy.
    pub fn to_policy(&self) -> Result<Policy> {
        if self.baseline_file.is_some() && self.diff_file.is_none() {
            anyhow::bail!("--baseline-file requires --diff-file");
        }
        let substitute = self
            .substitute
            .iter()
            .map(|s| Substitution::parse(s))
            .collect::<Result<Vec<_>>>()?;
        let omit_lines = self
            .omit_lines
            .iter()
            .map(|p| Regex::new(p).with_context(|| format!("Invalid omit pattern: '{p}'")))
            .collect::<Result<Vec<_>>>()?;
        let ignore_errors = self
            .ignore_errors
            .iter()
            .map(|k| {
                k.parse::<DiagKind>()
                    .map_err(|e| anyhow::anyhow!(e.to_string()))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Policy {
            tracefiles: self.tracefiles.clone(),
            baseline_file: self.baseline_file.clone(),
            diff_file: self.diff_file.clone(),
            annotate_script: self.annotate_script.clone(),
            criteria_script: self.criteria_script.clone(),
            version_script: self.version_script.clone(),
            date_bins: AgeBins::parse(&self.date_bins)?,
            function_coverage: !self.no_function_coverage,
            branch_coverage: self.branch_coverage,
            hierarchical: self.hierarchical,
            elide_path_mismatch: self.elide_path_mismatch,
            new_file_as_baseline: self.new_file_as_baseline,
            parallel: self.parallel,
            memory_mb: self.memory,
            strip: self.strip,
            preserve: self.preserve,
            include: self.include.clone(),
            exclude: self.exclude.clone(),
            substitute,
            omit_lines,
            filters: FilterSet::parse(&self.filter)?,
            stop_on_error: self.stop_on_error,
            ignore_errors,
            max_message_count: self.max_message_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Options {
        Options::try_parse_from(std::iter::once("diffcov").chain(args.iter().copied()))
            .unwrap()
    }

    #[test]
    fn test_minimal_invocation() {
        let opts = parse(&["cov.info"]);
        let policy = opts.to_policy().unwrap();
        assert_eq!(policy.tracefiles.len(), 1);
        assert!(policy.function_coverage);
        assert!(!policy.branch_coverage);
        assert!(!policy.differential());
        assert_eq!(policy.date_bins.len(), 4);
    }

    #[test]
    fn test_differential_requires_diff() {
        let opts = parse(&["cov.info", "--baseline-file", "base.info"]);
        assert!(opts.to_policy().is_err());
        let opts = parse(&[
            "cov.info",
            "--baseline-file",
            "base.info",
            "--diff-file",
            "changes.diff",
        ]);
        assert!(opts.to_policy().unwrap().differential());
    }

    #[test]
    fn test_filters_and_patterns() {
        let opts = parse(&[
            "cov.info",
            "--filter",
            "brace,branch",
            "--omit-lines",
            "^assert",
            "--substitute",
            "s/^build\\///",
            "--ignore-errors",
            "unused",
            "--ignore-errors",
            "empty",
        ]);
        let policy = opts.to_policy().unwrap();
        assert!(policy.filters.brace);
        assert!(policy.filters.branch);
        assert!(!policy.filters.blank);
        assert_eq!(policy.omit_lines.len(), 1);
        assert_eq!(policy.substitute.len(), 1);
        assert_eq!(
            policy.ignore_errors,
            vec![DiagKind::Unused, DiagKind::Empty]
        );
    }

    #[test]
    fn test_bad_inputs_rejected() {
        assert!(parse(&["cov.info", "--date-bins", "30,7"])
            .to_policy()
            .is_err());
        assert!(parse(&["cov.info", "--filter", "bogus"]).to_policy().is_err());
        assert!(parse(&["cov.info", "--ignore-errors", "bogus"])
            .to_policy()
            .is_err());
    }
}
