//! Task scheduling over the report tree.
//!
//! The full set of current-revision files becomes a dependency forest:
//! leaves are file tasks, inner nodes are directory tasks, and the root
//! is the top task. The forest is built completely before anything is
//! enqueued. Ready tasks run on a bounded worker pool; each worker
//! communicates one way, by serializing its result to a uniquely named
//! dump file under the scratch directory, so a faulty worker cannot
//! corrupt the parent. The parent merges child summaries at reap time;
//! `Summary::append` is commutative and associative, so any interleaving
//! yields the same totals.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::mpsc;

use log::debug;

use crate::config::Policy;
use crate::diag::{Diag, DiagKind};
use crate::error::{DiffcovError, Result};
use crate::sourcefile::SourceFile;
use crate::summary::{NodeKind, Summary};

/// One node of the dependency forest.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: usize,
    /// Report name: file path, directory path, or "" for the top node.
    pub name: String,
    pub kind: NodeKind,
    pub parent: Option<usize>,
    /// Outstanding dependencies; a task is eligible when empty.
    pub deps: BTreeSet<usize>,
}

/// The complete dependency forest, built in one pass before scheduling.
#[derive(Debug)]
pub struct Forest {
    pub tasks: Vec<Task>,
    pub top: usize,
}

impl Forest {
    /// Build the forest for a set of file paths. In flat mode every file
    /// hangs off a single directory level below the top; in hierarchical
    /// mode each path component gets its own directory task.
    #[must_use]
    pub fn build(paths: &[String], hierarchical: bool) -> Forest {
        let mut tasks = vec![Task {
            id: 0,
            name: String::new(),
            kind: NodeKind::Top,
            parent: None,
            deps: BTreeSet::new(),
        }];
        let top = 0;
        let mut dirs: BTreeMap<String, usize> = BTreeMap::new();

        let ensure_dir = |tasks: &mut Vec<Task>,
                              dirs: &mut BTreeMap<String, usize>,
                              name: &str,
                              parent: usize|
         -> usize {
            if let Some(&id) = dirs.get(name) {
                return id;
            }
            let id = tasks.len();
            tasks.push(Task {
                id,
                name: name.to_string(),
                kind: NodeKind::Directory,
                parent: Some(parent),
                deps: BTreeSet::new(),
            });
            tasks[parent].deps.insert(id);
            dirs.insert(name.to_string(), id);
            id
        };

        for path in paths {
            let dir_id = if hierarchical {
                let mut parent = top;
                let mut prefix = String::new();
                let components: Vec<&str> = path.split('/').collect();
                for part in &components[..components.len().saturating_sub(1)] {
                    // A leading slash produces an empty first component.
                    if part.is_empty() {
                        continue;
                    }
                    if !prefix.is_empty() {
                        prefix.push('/');
                    }
                    prefix.push_str(part);
                    parent = ensure_dir(&mut tasks, &mut dirs, &prefix.clone(), parent);
                }
                parent
            } else {
                let dir = dirname(path);
                ensure_dir(&mut tasks, &mut dirs, &dir, top)
            };
            let id = tasks.len();
            tasks.push(Task {
                id,
                name: path.clone(),
                kind: NodeKind::File,
                parent: Some(dir_id),
                deps: BTreeSet::new(),
            });
            tasks[dir_id].deps.insert(id);
        }

        Forest { tasks, top }
    }
}

fn dirname(path: &str) -> String {
    match path.rsplit_once('/') {
        Some((dir, _)) => dir.to_string(),
        None => ".".to_string(),
    }
}

/// What a worker persists for the parent.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct TaskDump {
    pub task_id: usize,
    pub summary: Summary,
    pub source: Option<SourceFile>,
    pub diag_counts: BTreeMap<DiagKind, u64>,
}

/// Per-task computation. File tasks compute their summary from scratch;
/// directory and top tasks receive the merged summaries of their
/// children.
pub trait TaskWork: Sync {
    fn run(
        &self,
        task: &Task,
        accumulated: Summary,
        diag: &Diag,
    ) -> Result<(Summary, Option<SourceFile>)>;
}

/// Scheduler results, indexed by task id.
pub struct SchedOutcome {
    pub summaries: Vec<Option<Summary>>,
    pub sources: Vec<SourceFile>,
    /// A worker exited non-zero or returned a garbled result.
    pub failed: bool,
}

/// Run every task of the forest, bounded by the policy's worker ceiling
/// and soft memory cap. Workers keep draining after a failure so the
/// report is as complete as possible.
pub fn run<W: TaskWork>(
    mut forest: Forest,
    policy: &Policy,
    diag: &Diag,
    tmpdir: &Path,
    work: &W,
) -> Result<SchedOutcome> {
    let n = forest.tasks.len();
    let bins = policy.date_bins.len();
    let mut acc: Vec<Summary> = forest
        .tasks
        .iter()
        .map(|t| {
            let mut s = Summary::new(t.kind, t.name.clone(), bins);
            s.parent = t.parent;
            s
        })
        .collect();
    let mut outcome = SchedOutcome {
        summaries: vec![None; n],
        sources: Vec::new(),
        failed: false,
    };

    let mut ready: VecDeque<usize> = forest
        .tasks
        .iter()
        .filter(|t| t.deps.is_empty())
        .map(|t| t.id)
        .collect();
    let mut pending = n;

    if policy.worker_count() <= 1 {
        // Depth-first in-process execution with the same merge semantics.
        while let Some(id) = ready.pop_front() {
            let task = forest.tasks[id].clone();
            let accumulated = std::mem::replace(
                &mut acc[id],
                Summary::new(task.kind, task.name.clone(), bins),
            );
            let dump = run_one(&task, accumulated, work, tmpdir);
            reap(
                dump,
                id,
                &mut forest,
                &mut acc,
                &mut outcome,
                &mut ready,
                diag,
                tmpdir,
            )?;
            pending -= 1;
        }
        debug_assert_eq!(pending, 0);
        return Ok(outcome);
    }

    let limit = policy.worker_count();
    std::thread::scope(|scope| -> Result<()> {
        let (tx, rx) = mpsc::channel::<usize>();
        let mut active: usize = 0;

        while pending > 0 {
            while active < limit && !ready.is_empty() && memory_allows(policy, active) {
                let id = ready.pop_front().unwrap();
                let task = forest.tasks[id].clone();
                let accumulated = std::mem::replace(
                    &mut acc[id],
                    Summary::new(task.kind, task.name.clone(), bins),
                );
                let tx = tx.clone();
                let tmpdir = tmpdir.to_path_buf();
                debug!("spawning worker for task {} '{}'", id, task.name);
                scope.spawn(move || {
                    run_one(&task, accumulated, work, &tmpdir);
                    // The parent only consumes the dump file; a send
                    // failure means the parent already gave up.
                    let _ = tx.send(id);
                });
                active += 1;
            }

            if active == 0 {
                // No eligible task can start; with pending work left this
                // is a dependency error.
                return Err(DiffcovError::Other(
                    "scheduler stalled with pending tasks".to_string(),
                ));
            }

            let id = rx
                .recv()
                .map_err(|e| DiffcovError::Worker(e.to_string()))?;
            active -= 1;
            pending -= 1;
            let dump = read_dump(id, tmpdir);
            reap(
                dump,
                id,
                &mut forest,
                &mut acc,
                &mut outcome,
                &mut ready,
                diag,
                tmpdir,
            )?;
        }
        Ok(())
    })?;

    Ok(outcome)
}

/// Execute one task and persist its result; never panics across the
/// channel. Returns the dump when running in-process.
fn run_one<W: TaskWork>(
    task: &Task,
    accumulated: Summary,
    work: &W,
    tmpdir: &Path,
) -> Option<TaskDump> {
    let worker_diag = Diag::new(0, false);
    worker_diag.start_capture();

    let result = work.run(task, accumulated, &worker_diag);
    let err_path = log_path(tmpdir, task.id, "err");
    let out_path = log_path(tmpdir, task.id, "log");
    let captured = worker_diag.take_captured();
    let _ = std::fs::write(&out_path, "");

    match result {
        Ok((summary, source)) => {
            let dump = TaskDump {
                task_id: task.id,
                summary,
                source,
                diag_counts: worker_diag.counts(),
            };
            let _ = std::fs::write(&err_path, captured);
            match serde_json::to_vec(&dump) {
                Ok(bytes) => {
                    let _ = std::fs::write(dump_path(tmpdir, task.id), bytes);
                    Some(dump)
                }
                Err(_) => None,
            }
        }
        Err(err) => {
            let mut text = captured;
            text.push_str(&format!("diffcov: error: task '{}': {err}\n", task.name));
            let _ = std::fs::write(&err_path, text);
            None
        }
    }
}

fn read_dump(id: usize, tmpdir: &Path) -> Option<TaskDump> {
    let bytes = std::fs::read(dump_path(tmpdir, id)).ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// Adopt one finished task: replay its captured diagnostics in reap
/// order, fold its summary into the parent, and release the parent when
/// its dependency set empties.
#[allow(clippy::too_many_arguments)]
fn reap(
    dump: Option<TaskDump>,
    id: usize,
    forest: &mut Forest,
    acc: &mut [Summary],
    outcome: &mut SchedOutcome,
    ready: &mut VecDeque<usize>,
    diag: &Diag,
    tmpdir: &Path,
) -> Result<()> {
    let err_text =
        std::fs::read_to_string(log_path(tmpdir, id, "err")).unwrap_or_default();
    if !err_text.is_empty() {
        eprint!("{err_text}");
    }

    let name = forest.tasks[id].name.clone();
    match dump {
        Some(dump) => {
            diag.absorb_counts(&dump.diag_counts);
            if let Some(parent) = forest.tasks[id].parent {
                acc[parent].append(&dump.summary);
            }
            if let Some(source) = dump.source {
                outcome.sources.push(source);
            }
            outcome.summaries[id] = Some(dump.summary);
        }
        None => {
            outcome.failed = true;
            diag.emit(
                DiagKind::Parallel,
                &format!("worker for '{name}' failed or returned a garbled result"),
            )?;
        }
    }

    if let Some(parent) = forest.tasks[id].parent {
        let deps = &mut forest.tasks[parent].deps;
        deps.remove(&id);
        if deps.is_empty() {
            ready.push_back(parent);
        }
    }
    Ok(())
}

fn dump_path(tmpdir: &Path, id: usize) -> PathBuf {
    tmpdir.join(format!("dumper_{id}"))
}

fn log_path(tmpdir: &Path, id: usize, ext: &str) -> PathBuf {
    tmpdir.join(format!("diffcov_{id}.{ext}"))
}

/// Soft RSS cap: refuse another worker when the projected total exceeds
/// the configured memory ceiling. The probe is process-wide; the
/// per-worker estimate divides by the active count.
fn memory_allows(policy: &Policy, active: usize) -> bool {
    if policy.memory_mb == 0 {
        return true;
    }
    let Some(rss) = current_rss_mb() else {
        return true;
    };
    if active == 0 {
        // Always admit one worker or nothing ever runs.
        return true;
    }
    let per_worker = rss / active as u64;
    (active as u64 + 1) * per_worker.max(1) <= policy.memory_mb
}

/// Resident set size of this process in MB, when the platform exposes it.
#[must_use]
pub fn current_rss_mb() -> Option<u64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    for line in status.lines() {
        if let Some(rest) = line.strip_prefix("VmRSS:") {
            let kb: u64 = rest
                .trim()
                .trim_end_matches("kB")
                .trim()
                .parse()
                .ok()?;
            return Some(kb / 1024);
        }
    }
    None
}
