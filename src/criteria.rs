//! Coverage criteria predicate.
//!
//! After rollup, every node's summary is serialized to JSON and handed to
//! an external program as `<name> <kind> <json>`. Whatever the program
//! prints is collected; a non-zero exit marks the node failed. The
//! overall process exit code is non-zero iff any node failed, regardless
//! of how the rest of the run went.

use std::process::Command;

use serde_json::json;

use crate::diag::{Diag, DiagKind};
use crate::error::Result;
use crate::summary::{CoverCounts, NodeKind, Summary};

/// Verdict for one node.
#[derive(Debug, Clone)]
pub struct CriteriaOutcome {
    pub name: String,
    pub kind: NodeKind,
    pub failed: bool,
    pub messages: Vec<String>,
}

/// All verdicts for a run.
#[derive(Debug, Clone, Default)]
pub struct CriteriaReport {
    pub outcomes: Vec<CriteriaOutcome>,
}

impl CriteriaReport {
    #[must_use]
    pub fn any_failed(&self) -> bool {
        self.outcomes.iter().any(|o| o.failed)
    }

    /// Passes and messages go to stdout; failures echo to stderr as well.
    pub fn print(&self) {
        for outcome in &self.outcomes {
            let name = display_name(&outcome.name);
            for message in &outcome.messages {
                println!("{name}: {message}");
            }
            if outcome.failed {
                println!("{name}: coverage criteria not met");
                eprintln!("{name}: coverage criteria not met");
            }
        }
    }
}

fn display_name(name: &str) -> &str {
    if name.is_empty() {
        "top"
    } else {
        name
    }
}

fn cover_json(counts: &CoverCounts) -> serde_json::Value {
    let mut obj = json!({
        "found": counts.found,
        "hit": counts.hit,
    });
    let map = obj.as_object_mut().unwrap();
    for (tla, n) in counts.per_tla.iter() {
        map.insert(tla.name().to_string(), json!(n));
    }
    obj
}

/// The JSON payload the predicate receives.
#[must_use]
pub fn summary_json(summary: &Summary) -> serde_json::Value {
    json!({
        "line": cover_json(&summary.line),
        "branch": cover_json(&summary.branch),
        "function": cover_json(&summary.function),
    })
}

/// Evaluate one node. Failure to start the program is a `parallel`
/// diagnostic and counts as a failed node so it cannot pass silently.
pub fn check_node(
    script: &str,
    name: &str,
    kind: NodeKind,
    summary: &Summary,
    diag: &Diag,
) -> Result<CriteriaOutcome> {
    let payload = summary_json(summary).to_string();
    let mut words = script.split_whitespace();
    let program = words.next().unwrap_or(script);

    let output = Command::new(program)
        .args(words)
        .arg(display_name(name))
        .arg(kind.to_string())
        .arg(&payload)
        .output();

    match output {
        Ok(output) => {
            let stdout = String::from_utf8_lossy(&output.stdout);
            let messages: Vec<String> = stdout
                .lines()
                .filter(|l| !l.trim().is_empty())
                .map(str::to_string)
                .collect();
            Ok(CriteriaOutcome {
                name: name.to_string(),
                kind,
                failed: !output.status.success(),
                messages,
            })
        }
        Err(err) => {
            diag.emit(
                DiagKind::Parallel,
                &format!("criteria script '{program}' failed to start: {err}"),
            )?;
            Ok(CriteriaOutcome {
                name: name.to_string(),
                kind,
                failed: true,
                messages: Vec::new(),
            })
        }
    }
}

/// Evaluate every node in order.
pub fn run_criteria<'a>(
    script: &str,
    nodes: impl Iterator<Item = (&'a str, NodeKind, &'a Summary)>,
    diag: &Diag,
) -> Result<CriteriaReport> {
    let mut report = CriteriaReport::default();
    for (name, kind, summary) in nodes {
        report
            .outcomes
            .push(check_node(script, name, kind, summary, diag)?);
    }
    Ok(report)
}
