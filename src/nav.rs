//! Navigation queries over a built [`SourceFile`].
//!
//! Every query answers "smallest line after L" against a strictly
//! increasing index via a standard lower-bound binary search. Line
//! queries coalesce runs of the same category into one block: a block is
//! terminated by a line whose category is defined and differs, while
//! non-code lines (no category) never break a block. Branch queries treat
//! every line independently.

use crate::category::Tla;
use crate::sourcefile::{SliceIndex, SourceFile};

/// Next start-of-block line for a line category, strictly after `after`
/// (`None` starts from the top of the file). Returns `None` when no
/// further block exists, which the report renders as a link to the top.
#[must_use]
pub fn next_tla_group(sf: &SourceFile, tla: Tla, after: Option<u32>) -> Option<u32> {
    let after = after.unwrap_or(0);
    let lines = sf.category_lines(tla);
    let from = lines.partition_point(|&n| n <= after);
    lines[from..]
        .iter()
        .copied()
        .find(|&no| starts_group(sf, tla, no))
}

/// Next line with a branch of the given category. Branches never
/// coalesce.
#[must_use]
pub fn next_branch_group(sf: &SourceFile, tla: Tla, after: Option<u32>) -> Option<u32> {
    next_in(sf.branch_lines(tla), after)
}

/// Next line of the category whose age falls in `bin`.
#[must_use]
pub fn next_in_date_bin(sf: &SourceFile, bin: usize, tla: Tla, after: Option<u32>) -> Option<u32> {
    next_in(slice_lines(sf.line_bins.get(bin), tla), after)
}

/// Branch variant of [`next_in_date_bin`].
#[must_use]
pub fn next_branch_in_date_bin(
    sf: &SourceFile,
    bin: usize,
    tla: Tla,
    after: Option<u32>,
) -> Option<u32> {
    next_in(slice_lines(sf.branch_bins.get(bin), tla), after)
}

/// Next line of the category owned by `owner`.
#[must_use]
pub fn next_in_owner_bin(
    sf: &SourceFile,
    owner: &str,
    tla: Tla,
    after: Option<u32>,
) -> Option<u32> {
    next_in(slice_lines(sf.line_owners.get(owner), tla), after)
}

/// Branch variant of [`next_in_owner_bin`].
#[must_use]
pub fn next_branch_in_owner_bin(
    sf: &SourceFile,
    owner: &str,
    tla: Tla,
    after: Option<u32>,
) -> Option<u32> {
    next_in(slice_lines(sf.branch_owners.get(owner), tla), after)
}

fn slice_lines(slice: Option<&SliceIndex>, tla: Tla) -> &[u32] {
    slice
        .and_then(|s| s.by_tla.get(&tla))
        .map_or(&[], Vec::as_slice)
}

fn next_in(lines: &[u32], after: Option<u32>) -> Option<u32> {
    let after = after.unwrap_or(0);
    let from = lines.partition_point(|&n| n <= after);
    lines.get(from).copied()
}

/// A line starts a block when the nearest preceding line with a defined
/// category carries a different one.
fn starts_group(sf: &SourceFile, tla: Tla, no: u32) -> bool {
    let mut prev = no - 1;
    while prev >= 1 {
        match sf.lines.get(prev as usize - 1).and_then(|l| l.tla) {
            Some(t) => return t != tla,
            None => prev -= 1,
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::category::{CategorizedFile, Categorizer};
    use crate::config::Policy;
    use crate::diag::Diag;
    use crate::diffmap::DiffMap;
    use crate::source::SourceText;
    use crate::trace::FileTrace;

    /// Build a file from a line layout: `Some(count)` is an instrumented
    /// line with that count, `None` a non-code line.
    fn file_with_counts(layout: &[Option<u64>]) -> SourceFile {
        let diag = Diag::new(0, false);
        diag.start_capture();
        let diff = DiffMap::empty(false); // every line is an insert
        let mut curr = FileTrace::new("t.c".into());
        for (i, entry) in layout.iter().enumerate() {
            if let Some(count) = entry {
                curr.lines.insert(i as u32 + 1, *count);
            }
        }
        let cat = Categorizer::new(&diff, &diag, false);
        let table: CategorizedFile = cat
            .categorize_file("t.c", Some(&curr), None, false)
            .unwrap();
        let text = SourceText {
            lines: vec![String::from("x"); layout.len()],
            synthesized: false,
        };
        let policy = Policy::default();
        SourceFile::build("t.c", table, &text, None, &policy).0
    }

    #[test]
    fn test_next_group_coalesces_runs() {
        // Lines: 1 GNC, 2 GNC, 3 non-code, 4 GNC, 5 UNC, 6 GNC.
        let sf = file_with_counts(&[Some(1), Some(2), None, Some(3), Some(0), Some(4)]);
        // 1..4 form one block (the non-code line does not break it).
        assert_eq!(next_tla_group(&sf, Tla::Gnc, None), Some(1));
        assert_eq!(next_tla_group(&sf, Tla::Gnc, Some(1)), Some(6));
        assert_eq!(next_tla_group(&sf, Tla::Gnc, Some(6)), None);
        assert_eq!(next_tla_group(&sf, Tla::Unc, None), Some(5));
    }

    #[test]
    fn test_next_group_block_boundaries() {
        // GNC UNC GNC: every line starts its own block.
        let sf = file_with_counts(&[Some(1), Some(0), Some(1)]);
        assert_eq!(next_tla_group(&sf, Tla::Gnc, None), Some(1));
        assert_eq!(next_tla_group(&sf, Tla::Gnc, Some(1)), Some(3));
    }

    #[test]
    fn test_branches_never_coalesce() {
        let diag = Diag::new(0, false);
        diag.start_capture();
        let diff = DiffMap::empty(false);
        let mut curr = FileTrace::new("t.c".into());
        curr.branches.entry(1).or_default().insert(0, vec![1, 1]);
        curr.branches.entry(2).or_default().insert(0, vec![1]);
        let cat = Categorizer::new(&diff, &diag, false);
        let table = cat
            .categorize_file("t.c", Some(&curr), None, false)
            .unwrap();
        let text = SourceText {
            lines: vec!["a".into(), "b".into()],
            synthesized: false,
        };
        let sf = SourceFile::build("t.c", table, &text, None, &Policy::default()).0;
        assert_eq!(next_branch_group(&sf, Tla::Gnc, None), Some(1));
        // Adjacent same-category branch lines stay separate stops.
        assert_eq!(next_branch_group(&sf, Tla::Gnc, Some(1)), Some(2));
        assert_eq!(next_branch_group(&sf, Tla::Gnc, Some(2)), None);
    }

    #[test]
    fn test_wraps_to_none_at_end() {
        let sf = file_with_counts(&[Some(1)]);
        assert_eq!(next_tla_group(&sf, Tla::Gnc, Some(9)), None);
        assert_eq!(next_tla_group(&sf, Tla::Lbc, None), None);
    }
}
