//! Literal input scenarios with expected categories end to end through
//! the categorizer, the per-file model, and the rollup.

mod common;

use common::capture_diag;
use diffcov::annotate::LineOrigin;
use diffcov::category::{Categorizer, LineKey, Tla};
use diffcov::config::Policy;
use diffcov::diffmap::{DiffKind, DiffMap};
use diffcov::nav;
use diffcov::source::SourceText;
use diffcov::sourcefile::SourceFile;
use diffcov::trace::FileTrace;

fn text(n: usize) -> SourceText {
    SourceText {
        lines: (1..=n).map(|i| format!("line {i}")).collect(),
        synthesized: false,
    }
}

/// Simple insertion: one new line at current line 5, executed 3 times.
#[test]
fn simple_insertion() {
    let diag = capture_diag();
    let diff_text = "\
--- a/a.c
+++ b/a.c
@@ -4,0 +5,1 @@
+new line
";
    let diff = DiffMap::parse(diff_text, 0, &diag).unwrap();
    let mut curr = FileTrace::new("a.c".into());
    curr.lines.insert(5, 3);
    let base = FileTrace::new("a.c".into());

    let cat = Categorizer::new(&diff, &diag, false);
    let table = cat
        .categorize_file("a.c", Some(&curr), Some(&base), false)
        .unwrap();

    let record = &table.records[&LineKey::Current(5)];
    assert_eq!(record.kind, DiffKind::Insert);
    assert_eq!(record.curr_lineno, Some(5));
    assert_eq!(record.base_lineno, None);
    assert_eq!(record.base_count, None);
    assert_eq!(record.curr_count, Some(3));
    assert_eq!(record.tla, Some(Tla::Gnc));

    let (_, summary) = SourceFile::build("a.c", table, &text(5), None, &Policy::default());
    assert_eq!(summary.line.found, 1);
    assert_eq!(summary.line.hit, 1);
    assert_eq!(summary.line.per_tla.get(Tla::Gnc), 1);
}

/// Regression: an unchanged line went from 7 executions to none.
#[test]
fn regression_loses_baseline_coverage() {
    let diag = capture_diag();
    let diff = DiffMap::empty(true);
    let mut curr = FileTrace::new("a.c".into());
    curr.lines.insert(9, 0);
    let mut base = FileTrace::new("a.c".into());
    base.lines.insert(9, 7);

    let cat = Categorizer::new(&diff, &diag, false);
    let table = cat
        .categorize_file("a.c", Some(&curr), Some(&base), false)
        .unwrap();
    assert_eq!(table.records[&LineKey::Current(9)].tla, Some(Tla::Lbc));

    let (_, summary) = SourceFile::build("a.c", table, &text(9), None, &Policy::default());
    assert_eq!(summary.line.found, 1);
    assert_eq!(summary.line.hit, 0);
    assert_eq!(summary.line.per_tla.get(Tla::Lbc), 1);
}

/// Branch split: block 0 was [5,0] and became [5,2].
#[test]
fn branch_split() {
    let diag = capture_diag();
    let diff = DiffMap::empty(true);
    let mut curr = FileTrace::new("a.c".into());
    curr.branches.entry(10).or_default().insert(0, vec![5, 2]);
    let mut base = FileTrace::new("a.c".into());
    base.branches.entry(10).or_default().insert(0, vec![5, 0]);

    let cat = Categorizer::new(&diff, &diag, false);
    let table = cat
        .categorize_file("a.c", Some(&curr), Some(&base), false)
        .unwrap();
    let branches = &table.records[&LineKey::Current(10)].branches;
    assert_eq!(branches.len(), 2);
    assert_eq!(branches[0].tla, Tla::Cbc);
    assert_eq!(branches[0].base_count, Some(5));
    assert_eq!(branches[0].curr_count, Some(5));
    assert_eq!(branches[1].tla, Tla::Gbc);
    assert_eq!(branches[1].base_count, Some(0));
    assert_eq!(branches[1].curr_count, Some(2));
}

/// Deletion only: baseline line 42 with no executions disappears.
#[test]
fn deletion_becomes_ghost() {
    let diag = capture_diag();
    let diff_text = "\
--- a/a.c
+++ b/a.c
@@ -42,1 +41,0 @@
-gone
";
    let diff = DiffMap::parse(diff_text, 0, &diag).unwrap();
    let mut base = FileTrace::new("a.c".into());
    base.lines.insert(42, 0);

    let cat = Categorizer::new(&diff, &diag, false);
    let table = cat
        .categorize_file("a.c", None, Some(&base), false)
        .unwrap();
    let record = &table.records[&LineKey::Ghost(42)];
    assert_eq!(record.kind, DiffKind::Delete);
    assert_eq!(record.tla, Some(Tla::Dub));
    assert_eq!(record.curr_lineno, None);

    let (sf, summary) = SourceFile::build("a.c", table, &text(0), None, &Policy::default());
    assert_eq!(summary.line.per_tla.get(Tla::Dub), 1);
    assert_eq!(summary.line.found, 0);
    // The ghost never reaches the current-revision indices.
    for tla in Tla::ALL {
        assert!(!sf.category_lines(tla).contains(&42));
    }
    assert!(sf.lines.is_empty());
}

/// Age bins with cutpoints 7,30,180: ages 3, 20, 200 land in bins 0, 1,
/// and the unbounded tail.
#[test]
fn age_bins() {
    let diag = capture_diag();
    let diff = DiffMap::empty(true);
    let mut curr = FileTrace::new("a.c".into());
    curr.lines.insert(1, 1);
    curr.lines.insert(2, 1);
    curr.lines.insert(3, 0);

    let cat = Categorizer::new(&diff, &diag, false);
    let table = cat
        .categorize_file("a.c", Some(&curr), None, false)
        .unwrap();

    let origin = |age: u64| LineOrigin {
        commit: Some("c1".into()),
        author: Some("alice".into()),
        age_days: Some(age),
        text: String::new(),
    };
    let origins = vec![origin(3), origin(20), origin(200)];
    let policy = Policy::default();
    let (sf, summary) = SourceFile::build("a.c", table, &text(3), Some(&origins), &policy);

    let found: Vec<u64> = summary.line_age.iter().map(|b| b.found).collect();
    assert_eq!(found, vec![1, 1, 0, 1]);
    assert_eq!(summary.line_age[0].per_tla.get(Tla::Gic), 1);
    assert_eq!(summary.line_age[1].per_tla.get(Tla::Gic), 1);
    assert_eq!(summary.line_age[3].per_tla.get(Tla::Uic), 1);

    // Date-bin navigation agrees with the binning.
    assert_eq!(nav::next_in_date_bin(&sf, 0, Tla::Gic, None), Some(1));
    assert_eq!(nav::next_in_date_bin(&sf, 1, Tla::Gic, None), Some(2));
    assert_eq!(nav::next_in_date_bin(&sf, 3, Tla::Uic, None), Some(3));
    assert_eq!(nav::next_in_date_bin(&sf, 2, Tla::Gic, None), None);
    assert_eq!(
        nav::next_in_owner_bin(&sf, "alice", Tla::Gic, Some(1)),
        Some(2)
    );
}

/// Excluded baseline code: measured before, not measured now, line still
/// present.
#[test]
fn excluded_baseline() {
    let diag = capture_diag();
    let diff = DiffMap::empty(true);
    let curr = FileTrace::new("a.c".into());
    let mut base = FileTrace::new("a.c".into());
    base.lines.insert(1, 4);
    base.lines.insert(2, 0);

    let cat = Categorizer::new(&diff, &diag, false);
    let table = cat
        .categorize_file("a.c", Some(&curr), Some(&base), false)
        .unwrap();
    assert_eq!(table.records[&LineKey::Current(1)].tla, Some(Tla::Ecb));
    assert_eq!(table.records[&LineKey::Current(2)].tla, Some(Tla::Eub));

    let (_, summary) = SourceFile::build("a.c", table, &text(2), None, &Policy::default());
    // Excluded categories never contribute to found.
    assert_eq!(summary.line.found, 0);
    assert_eq!(summary.line.per_tla.get(Tla::Ecb), 1);
    assert_eq!(summary.line.per_tla.get(Tla::Eub), 1);
}
