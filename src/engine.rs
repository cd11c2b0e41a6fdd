//! Whole-run orchestration.
//!
//! Ingest traces, load the diff, process every file through the task
//! scheduler, roll summaries up to the top, evaluate the coverage
//! criteria, and hand the aggregated model to the report sink.

use std::collections::BTreeSet;
use std::path::Path;
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use log::debug;

use crate::annotate;
use crate::category::Categorizer;
use crate::config::Policy;
use crate::diag::{Diag, DiagKind};
use crate::diffmap::DiffMap;
use crate::emit::{ReportSink, SliceRef};
use crate::error::Result;
use crate::filters::{self, CurrentClass};
use crate::sched::{self, Forest, Task, TaskWork};
use crate::source::{BaselineView, SourceText};
use crate::sourcefile::SourceFile;
use crate::summary::{NodeKind, Summary};
use crate::trace::{self, TraceFile};
use crate::{criteria, sourcefile};

/// Result of one engine invocation.
pub struct EngineOutcome {
    pub exit_code: i32,
    pub report: String,
}

/// Ties the policy and diagnostics to one run.
pub struct Engine<'a> {
    pub policy: &'a Policy,
    pub diag: &'a Diag,
}

impl<'a> Engine<'a> {
    pub fn new(policy: &'a Policy, diag: &'a Diag) -> Self {
        Self { policy, diag }
    }

    /// Process one input set to completion.
    pub fn run(&self, sink: &mut dyn ReportSink) -> Result<EngineOutcome> {
        let policy = self.policy;
        let diag = self.diag;

        let mut usage = PatternUsage::new(policy);

        let mut curr = TraceFile::new();
        for tracefile in &policy.tracefiles {
            debug!("reading trace {}", tracefile.display());
            let parsed = trace::parse_file(tracefile, diag)
                .map_err(|e| crate::error::DiffcovError::Other(e.to_string()))?;
            for file in parsed.files.into_values() {
                curr.insert(file);
            }
        }
        let curr = apply_path_rules(curr, policy, &mut usage);

        let base = match &policy.baseline_file {
            Some(path) => {
                debug!("reading baseline trace {}", path.display());
                let parsed = trace::parse_file(path, diag)
                    .map_err(|e| crate::error::DiffcovError::Other(e.to_string()))?;
                Some(apply_path_rules(parsed, policy, &mut usage))
            }
            None => None,
        };

        let mut diff = match &policy.diff_file {
            Some(path) => DiffMap::load(path, policy.strip, diag)
                .map_err(|e| crate::error::DiffcovError::Other(e.to_string()))?,
            None => DiffMap::empty(policy.differential()),
        };

        let mut trace_paths: BTreeSet<String> =
            curr.paths().map(str::to_string).collect();
        if let Some(base) = &base {
            trace_paths.extend(base.paths().map(str::to_string));
        }
        diff.check_paths(&trace_paths, policy, diag)?;

        // Files only present in the baseline keep their baseline name in
        // the report: deleted files summarize as ghosts, unmeasured files
        // as excluded baseline code.
        let paths: Vec<String> = trace_paths.into_iter().collect();
        if paths.is_empty() {
            diag.emit(DiagKind::Empty, "no source files in any trace")?;
        }

        let baseline_trace_age = policy
            .baseline_file
            .as_ref()
            .and_then(|p| std::fs::metadata(p).ok())
            .and_then(|m| m.modified().ok())
            .map(|t| {
                let modified: DateTime<Utc> = t.into();
                (Utc::now() - modified).num_days().max(0) as u64
            });

        let scratch = tempfile::Builder::new()
            .prefix("diffcov_")
            .tempdir()
            .map_err(crate::error::DiffcovError::Io)?;
        debug!("scratch directory {}", scratch.path().display());

        let forest = Forest::build(&paths, policy.hierarchical);
        let nodes: Vec<(String, NodeKind)> = forest
            .tasks
            .iter()
            .map(|t| (t.name.clone(), t.kind))
            .collect();

        let work = FileWork {
            policy,
            curr: &curr,
            base: base.as_ref(),
            diff: &diff,
            now: Utc::now(),
            baseline_trace_age,
            omit_used: (0..policy.omit_lines.len())
                .map(|_| AtomicBool::new(false))
                .collect(),
        };
        let outcome = sched::run(forest, policy, diag, scratch.path(), &work)?;

        for (i, used) in work.omit_used.iter().enumerate() {
            if !used.load(Ordering::Relaxed) {
                diag.emit(
                    DiagKind::Unused,
                    &format!(
                        "omit_lines pattern '{}' matched nothing",
                        policy.omit_lines[i].as_str()
                    ),
                )?;
            }
        }
        usage.report(policy, diag)?;

        let report = match &policy.criteria_script {
            Some(script) => {
                let nodes_iter = nodes.iter().enumerate().filter_map(|(id, (name, kind))| {
                    outcome.summaries[id]
                        .as_ref()
                        .map(|s| (name.as_str(), *kind, s))
                });
                let report = criteria::run_criteria(script, nodes_iter, diag)?;
                report.print();
                Some(report)
            }
            None => None,
        };

        self.render(sink, &nodes, &outcome)?;
        let rendered = sink.finish();

        if policy.preserve {
            let kept = scratch.into_path();
            eprintln!("diffcov: scratch directory preserved at {}", kept.display());
        }

        let criteria_failed = report.as_ref().map_or(false, |r| r.any_failed());
        let exit_code = i32::from(criteria_failed || outcome.failed);
        Ok(EngineOutcome {
            exit_code,
            report: rendered,
        })
    }

    fn render(
        &self,
        sink: &mut dyn ReportSink,
        nodes: &[(String, NodeKind)],
        outcome: &sched::SchedOutcome,
    ) -> Result<()> {
        let fmt_err =
            |_| crate::error::DiffcovError::Other("report rendering failed".to_string());

        if let Some(top) = outcome.summaries.first().and_then(Option::as_ref) {
            sink.begin(top).map_err(fmt_err)?;
            for owner in top.owners_line.keys() {
                sink.slice(top, SliceRef::OwnerSlice { owner })
                    .map_err(fmt_err)?;
            }
            for (bin, counts) in top.line_age.iter().enumerate() {
                if counts.found > 0 {
                    sink.slice(top, SliceRef::DateSlice { bin }).map_err(fmt_err)?;
                }
            }
        }
        for (id, (name, kind)) in nodes.iter().enumerate() {
            let Some(summary) = outcome.summaries[id].as_ref() else {
                continue;
            };
            match kind {
                NodeKind::Top => {}
                NodeKind::Directory => sink.directory(summary).map_err(fmt_err)?,
                NodeKind::File => {
                    let Some(file) = outcome.sources.iter().find(|s| &s.path == name) else {
                        continue;
                    };
                    sink.slice(summary, SliceRef::WholeFile { file })
                        .map_err(fmt_err)?;
                    for owner in file.line_owners.keys() {
                        sink.slice(summary, SliceRef::FileOwnerSlice { file, owner })
                            .map_err(fmt_err)?;
                    }
                    for (bin, slice) in file.line_bins.iter().enumerate() {
                        if !slice.lines.is_empty() {
                            sink.slice(summary, SliceRef::FileDateSlice { file, bin })
                                .map_err(fmt_err)?;
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// Tracks which ingest-time path patterns ever matched.
struct PatternUsage {
    include: Vec<bool>,
    exclude: Vec<bool>,
    substitute: Vec<bool>,
}

impl PatternUsage {
    fn new(policy: &Policy) -> Self {
        Self {
            include: vec![false; policy.include.len()],
            exclude: vec![false; policy.exclude.len()],
            substitute: vec![false; policy.substitute.len()],
        }
    }

    fn report(&self, policy: &Policy, diag: &Diag) -> Result<()> {
        for (i, used) in self.include.iter().enumerate() {
            if !used {
                diag.emit(
                    DiagKind::Unused,
                    &format!("include pattern '{}' matched nothing", policy.include[i]),
                )?;
            }
        }
        for (i, used) in self.exclude.iter().enumerate() {
            if !used {
                diag.emit(
                    DiagKind::Unused,
                    &format!("exclude pattern '{}' matched nothing", policy.exclude[i]),
                )?;
            }
        }
        for (i, used) in self.substitute.iter().enumerate() {
            if !used {
                diag.emit(
                    DiagKind::Unused,
                    &format!(
                        "substitute pattern '{}' matched nothing",
                        policy.substitute[i].pattern.as_str()
                    ),
                )?;
            }
        }
        Ok(())
    }
}

/// Shell-style wildcard match: `*` spans components, `?` one character.
#[must_use]
pub fn glob_match(pattern: &str, path: &str) -> bool {
    let mut regex = String::with_capacity(pattern.len() + 8);
    regex.push('^');
    for ch in pattern.chars() {
        match ch {
            '*' => regex.push_str(".*"),
            '?' => regex.push('.'),
            c => regex.push_str(&regex::escape(&c.to_string())),
        }
    }
    regex.push('$');
    regex::Regex::new(&regex).map(|r| r.is_match(path)).unwrap_or(false)
}

/// Apply substitute/include/exclude path rules to a parsed trace.
fn apply_path_rules(trace: TraceFile, policy: &Policy, usage: &mut PatternUsage) -> TraceFile {
    let mut out = TraceFile::new();
    for (path, mut file) in trace.files {
        let mut path = path;
        for (i, sub) in policy.substitute.iter().enumerate() {
            if let Some(rewritten) = sub.apply(&path) {
                usage.substitute[i] = true;
                path = rewritten;
            }
        }
        if !policy.include.is_empty() {
            let mut matched = false;
            for (i, pattern) in policy.include.iter().enumerate() {
                if glob_match(pattern, &path) {
                    usage.include[i] = true;
                    matched = true;
                }
            }
            if !matched {
                continue;
            }
        }
        let mut excluded = false;
        for (i, pattern) in policy.exclude.iter().enumerate() {
            if glob_match(pattern, &path) {
                usage.exclude[i] = true;
                excluded = true;
            }
        }
        if excluded {
            continue;
        }
        file.path = path;
        out.insert(file);
    }
    out
}

/// Per-task computation: the full per-file pipeline for leaves, identity
/// aggregation for directories and the top.
struct FileWork<'a> {
    policy: &'a Policy,
    curr: &'a TraceFile,
    base: Option<&'a TraceFile>,
    diff: &'a DiffMap,
    now: DateTime<Utc>,
    baseline_trace_age: Option<u64>,
    omit_used: Vec<AtomicBool>,
}

impl TaskWork for FileWork<'_> {
    fn run(
        &self,
        task: &Task,
        accumulated: Summary,
        diag: &Diag,
    ) -> Result<(Summary, Option<SourceFile>)> {
        match task.kind {
            NodeKind::File => self.process_file(&task.name, diag),
            // Children are already merged into the accumulated summary.
            NodeKind::Directory | NodeKind::Top => Ok((accumulated, None)),
        }
    }
}

impl FileWork<'_> {
    fn process_file(&self, path: &str, diag: &Diag) -> Result<(Summary, Option<SourceFile>)> {
        let policy = self.policy;
        let curr = self.curr.get(path);
        let base_path = self.diff.baseline_path(path).unwrap_or(path);
        let base = self.base.and_then(|b| b.get(base_path));

        let max_line = [curr, base]
            .iter()
            .flatten()
            .flat_map(|f| {
                f.lines
                    .keys()
                    .chain(f.branches.keys())
                    .chain(f.fn_lines.values())
            })
            .copied()
            .max()
            .unwrap_or(0);

        let fs_path = Path::new(path);
        let text = SourceText::load(fs_path, max_line, diag)?;

        let mut curr = curr.cloned();
        if let Some(file) = curr.as_mut() {
            if !policy.branch_coverage {
                file.branches.clear();
            }
            if !policy.function_coverage {
                file.fn_lines.clear();
                file.fn_hits.clear();
            }
            let outcome = filters::apply(file, &CurrentClass(&text), policy, diag)?;
            for (i, used) in outcome.omit_used.iter().enumerate() {
                if *used {
                    self.omit_used[i].store(true, Ordering::Relaxed);
                }
            }
        }
        let mut base = base.cloned();
        if let Some(file) = base.as_mut() {
            if !policy.branch_coverage {
                file.branches.clear();
            }
            if !policy.function_coverage {
                file.fn_lines.clear();
                file.fn_hits.clear();
            }
            let view = BaselineView::new(&text, self.diff, path);
            let outcome = filters::apply(file, &view, policy, diag)?;
            for (i, used) in outcome.omit_used.iter().enumerate() {
                if *used {
                    self.omit_used[i].store(true, Ordering::Relaxed);
                }
            }
        }

        let origins = match &policy.annotate_script {
            Some(script) if !text.synthesized => {
                annotate::run_annotator(script, fs_path, self.now, diag)?
            }
            _ => None,
        };

        let treat_as_baseline = policy.new_file_as_baseline
            && base.is_none()
            && match (&origins, self.baseline_trace_age) {
                (Some(origins), Some(base_age)) => origins
                    .iter()
                    .filter_map(|o| o.age_days)
                    .min()
                    .map_or(false, |newest| newest > base_age),
                _ => false,
            };

        let categorizer = Categorizer::new(self.diff, diag, policy.filters.function_alias);
        let table =
            categorizer.categorize_file(path, curr.as_ref(), base.as_ref(), treat_as_baseline)?;
        let (source, summary) =
            sourcefile::SourceFile::build(path, table, &text, origins.as_deref(), policy);

        if let Some(script) = &policy.version_script {
            version_check(script, fs_path, diag)?;
        }

        Ok((summary, Some(source)))
    }
}

/// Informational per-file version check: a non-zero exit means the
/// working tree no longer matches what the trace was captured against.
fn version_check(script: &str, path: &Path, diag: &Diag) -> Result<()> {
    let mut words = script.split_whitespace();
    let program = words.next().unwrap_or(script);
    match Command::new(program).args(words).arg(path).output() {
        Ok(output) if output.status.success() => Ok(()),
        Ok(output) => {
            let stderr = String::from_utf8_lossy(&output.stderr);
            diag.emit(
                DiagKind::Version,
                &format!(
                    "version mismatch for '{}': {}",
                    path.display(),
                    stderr.trim()
                ),
            )
        }
        Err(err) => diag.emit(
            DiagKind::Version,
            &format!("version script failed for '{}': {err}", path.display()),
        ),
    }
}
