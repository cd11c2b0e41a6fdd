//! Partition and bijection properties of the diff map over a multi-hunk
//! diff.

mod common;

use common::capture_diag;
use diffcov::diffmap::{DiffKind, DiffMap, Side};

const MULTI_HUNK: &str = "\
--- a/src/engine.c
+++ b/src/engine.c
@@ -10,7 +10,8 @@
 context a
 context b
-removed one
+added one
+added two
 context c
 context d
 context e
 context f
@@ -40,4 +41,3 @@
 context g
-removed two
-removed three
+added three
 context h
";

#[test]
fn every_line_has_exactly_one_kind() {
    let diag = capture_diag();
    let map = DiffMap::parse(MULTI_HUNK, 0, &diag).unwrap();
    for line in 1..200u32 {
        // kind() is total; it must answer for every line on both sides.
        let new_kind = map.kind("src/engine.c", Side::New, line);
        let old_kind = map.kind("src/engine.c", Side::Old, line);
        assert!(matches!(
            new_kind,
            DiffKind::Equal | DiffKind::Insert | DiffKind::Delete
        ));
        assert!(matches!(
            old_kind,
            DiffKind::Equal | DiffKind::Insert | DiffKind::Delete
        ));
        // A current line is never a delete and a baseline line never an
        // insert.
        assert_ne!(new_kind, DiffKind::Delete);
        assert_ne!(old_kind, DiffKind::Insert);
    }
}

#[test]
fn equal_lines_map_bijectively() {
    let diag = capture_diag();
    let map = DiffMap::parse(MULTI_HUNK, 0, &diag).unwrap();
    for line in 1..200u32 {
        if map.kind("src/engine.c", Side::New, line) != DiffKind::Equal {
            continue;
        }
        let old = map
            .lookup("src/engine.c", Side::New, line)
            .expect("equal line must map");
        let back = map
            .lookup("src/engine.c", Side::Old, old)
            .expect("mapped line must map back");
        assert_eq!(back, line, "bijection broken at current line {line}");
    }
}

#[test]
fn expected_kinds_at_hunk_lines() {
    let diag = capture_diag();
    let map = DiffMap::parse(MULTI_HUNK, 0, &diag).unwrap();
    // First hunk: old line 12 removed, new lines 12-13 added.
    assert_eq!(map.kind("src/engine.c", Side::Old, 12), DiffKind::Delete);
    assert_eq!(map.kind("src/engine.c", Side::New, 12), DiffKind::Insert);
    assert_eq!(map.kind("src/engine.c", Side::New, 13), DiffKind::Insert);
    assert_eq!(map.kind("src/engine.c", Side::New, 14), DiffKind::Equal);
    // Second hunk: old lines 41-42 removed, new line 42 added.
    assert_eq!(map.kind("src/engine.c", Side::Old, 41), DiffKind::Delete);
    assert_eq!(map.kind("src/engine.c", Side::Old, 42), DiffKind::Delete);
    assert_eq!(map.kind("src/engine.c", Side::New, 42), DiffKind::Insert);
    // The two hunks' shifts cancel, so the tail maps identically.
    assert_eq!(map.lookup("src/engine.c", Side::New, 50), Some(50));
}

#[test]
fn offsets_accumulate_between_hunks() {
    let diag = capture_diag();
    let map = DiffMap::parse(MULTI_HUNK, 0, &diag).unwrap();
    // Between the hunks the first hunk's net +1 shift applies.
    assert_eq!(map.lookup("src/engine.c", Side::New, 30), Some(29));
    assert_eq!(map.lookup("src/engine.c", Side::Old, 29), Some(30));
    // Before the first hunk the mapping is the identity.
    assert_eq!(map.lookup("src/engine.c", Side::New, 5), Some(5));
}
