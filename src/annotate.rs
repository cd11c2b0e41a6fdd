//! Revision-control origin for source lines.
//!
//! The annotator is an external program invoked once per file with the
//! absolute path. Each stdout line is `commit|author|when|text`; `when`
//! is either a timestamp or, for reproducible inputs, a literal age in
//! days. A commit of `NONE` marks a line that does not belong to the
//! project.

use std::path::Path;
use std::process::Command;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

use crate::diag::{Diag, DiagKind};
use crate::error::Result;

/// Annotation for one source line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineOrigin {
    pub commit: Option<String>,
    pub author: Option<String>,
    pub age_days: Option<u64>,
    pub text: String,
}

/// Run the annotator over one file. Returns `None` when the program is
/// unavailable or fails; the caller falls back to unannotated lines.
pub fn run_annotator(
    script: &str,
    path: &Path,
    now: DateTime<Utc>,
    diag: &Diag,
) -> Result<Option<Vec<LineOrigin>>> {
    let mut words = script.split_whitespace();
    let Some(program) = words.next() else {
        diag.emit(DiagKind::Package, "empty annotate script")?;
        return Ok(None);
    };
    let abs = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());

    let output = match Command::new(program).args(words).arg(&abs).output() {
        Ok(output) => output,
        Err(err) => {
            diag.emit(
                DiagKind::Package,
                &format!("annotate script '{program}' failed to start: {err}"),
            )?;
            return Ok(None);
        }
    };
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        diag.emit(
            DiagKind::Package,
            &format!(
                "annotate script failed for '{}': {}",
                path.display(),
                stderr.trim()
            ),
        )?;
        return Ok(None);
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let mut origins = Vec::new();
    for raw in stdout.lines() {
        origins.push(parse_line(raw, now, path, diag)?);
    }

    // Within one file either every line is annotated with a real commit
    // or none are.
    let annotated = origins.iter().filter(|o| o.commit.is_some()).count();
    if annotated != 0 && annotated != origins.len() {
        diag.emit(
            DiagKind::Inconsistent,
            &format!(
                "'{}': {annotated} of {} lines carry annotations",
                path.display(),
                origins.len()
            ),
        )?;
    }

    Ok(Some(origins))
}

fn parse_line(raw: &str, now: DateTime<Utc>, path: &Path, diag: &Diag) -> Result<LineOrigin> {
    let parts: Vec<&str> = raw.splitn(4, '|').collect();
    if parts.len() < 4 {
        diag.emit(
            DiagKind::Format,
            &format!("'{}': malformed annotation '{raw}'", path.display()),
        )?;
        return Ok(LineOrigin {
            commit: None,
            author: None,
            age_days: None,
            text: raw.to_string(),
        });
    }
    let (commit, author, when, text) = (parts[0], parts[1], parts[2], parts[3]);
    if commit == "NONE" || commit.is_empty() {
        return Ok(LineOrigin {
            commit: None,
            author: None,
            age_days: None,
            text: text.to_string(),
        });
    }
    let age_days = parse_age(when, now);
    if age_days.is_none() && !when.is_empty() {
        diag.emit(
            DiagKind::Format,
            &format!("'{}': unparsable annotation time '{when}'", path.display()),
        )?;
    }
    Ok(LineOrigin {
        commit: Some(commit.to_string()),
        author: if author.is_empty() {
            None
        } else {
            Some(author.to_string())
        },
        age_days,
        text: text.to_string(),
    })
}

/// Age in whole days. A bare integer passes through unchanged, which
/// keeps generated example inputs reproducible.
#[must_use]
pub fn parse_age(when: &str, now: DateTime<Utc>) -> Option<u64> {
    let when = when.trim();
    if !when.is_empty() && when.bytes().all(|b| b.is_ascii_digit()) {
        return when.parse().ok();
    }
    let timestamp = DateTime::parse_from_rfc3339(when)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            NaiveDateTime::parse_from_str(when, "%Y-%m-%d %H:%M:%S").map(|dt| dt.and_utc())
        })
        .or_else(|_| {
            NaiveDate::parse_from_str(when, "%Y-%m-%d")
                .map(|d| d.and_hms_opt(0, 0, 0).unwrap().and_utc())
        })
        .ok()?;
    let days = (now - timestamp).num_days();
    Some(days.max(0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_parse_age_passthrough() {
        assert_eq!(parse_age("42", now()), Some(42));
        assert_eq!(parse_age("0", now()), Some(0));
    }

    #[test]
    fn test_parse_age_dates() {
        assert_eq!(parse_age("2024-06-14", now()), Some(1));
        assert_eq!(parse_age("2024-06-15 11:00:00", now()), Some(0));
        assert_eq!(parse_age("2024-05-16T12:00:00+00:00", now()), Some(30));
        // Future timestamps clamp to zero.
        assert_eq!(parse_age("2025-01-01", now()), Some(0));
        assert_eq!(parse_age("not-a-date", now()), None);
    }

    #[test]
    fn test_parse_line_none_commit() {
        let diag = Diag::new(0, false);
        diag.start_capture();
        let origin =
            parse_line("NONE|||#include <a.h>", now(), Path::new("x.c"), &diag).unwrap();
        assert_eq!(origin.commit, None);
        assert_eq!(origin.age_days, None);
        assert_eq!(origin.text, "#include <a.h>");
    }

    #[test]
    fn test_parse_line_full() {
        let diag = Diag::new(0, false);
        diag.start_capture();
        let origin = parse_line(
            "abc123|alice|10|int main() {",
            now(),
            Path::new("x.c"),
            &diag,
        )
        .unwrap();
        assert_eq!(origin.commit.as_deref(), Some("abc123"));
        assert_eq!(origin.author.as_deref(), Some("alice"));
        assert_eq!(origin.age_days, Some(10));
        assert_eq!(origin.text, "int main() {");
    }

    #[test]
    fn test_text_may_contain_separator() {
        let diag = Diag::new(0, false);
        diag.start_capture();
        let origin = parse_line(
            "abc123|alice|10|x = a | b;",
            now(),
            Path::new("x.c"),
            &diag,
        )
        .unwrap();
        assert_eq!(origin.text, "x = a | b;");
    }

    #[test]
    fn test_failing_annotator_is_recoverable() {
        let diag = Diag::new(0, false);
        diag.start_capture();
        let result = run_annotator("/nonexistent/annotator", Path::new("x.c"), now(), &diag)
            .unwrap();
        assert!(result.is_none());
        assert_eq!(diag.count(DiagKind::Package), 1);
    }
}
