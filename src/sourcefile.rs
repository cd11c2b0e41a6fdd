//! Per-file model joining source text, annotation, and categorization.
//!
//! A [`SourceFile`] is constructed once all per-line categories are known
//! and is read-only afterwards. The constructor walks the record table in
//! ascending line order (deleted-line ghosts come last) and builds the
//! category, owner, and age-bin indices consumed by the navigation
//! queries, keeping every index strictly increasing so lookups are plain
//! lower-bound binary searches.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::annotate::LineOrigin;
use crate::category::{CategorizedFile, LineKey, Tla};
use crate::config::Policy;
use crate::source::SourceText;
use crate::summary::{NodeKind, Summary};

/// One displayed source line.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceLine {
    pub no: u32,
    pub text: String,
    pub owner: Option<String>,
    pub age_days: Option<u64>,
    pub tla: Option<Tla>,
}

/// Sorted line lists for one owner or one age bin.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SliceIndex {
    pub lines: Vec<u32>,
    pub by_tla: BTreeMap<Tla, Vec<u32>>,
}

impl SliceIndex {
    fn push(&mut self, tla: Tla, no: u32) {
        push_sorted(&mut self.lines, no);
        push_sorted(self.by_tla.entry(tla).or_default(), no);
    }
}

/// The per-file report model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceFile {
    pub path: String,
    pub lines: Vec<SourceLine>,
    pub table: CategorizedFile,
    /// Line category -> strictly increasing current line numbers.
    pub line_category: BTreeMap<Tla, Vec<u32>>,
    /// Branch category -> strictly increasing current line numbers.
    pub branch_category: BTreeMap<Tla, Vec<u32>>,
    pub line_owners: BTreeMap<String, SliceIndex>,
    pub branch_owners: BTreeMap<String, SliceIndex>,
    /// One slice per age bin.
    pub line_bins: Vec<SliceIndex>,
    pub branch_bins: Vec<SliceIndex>,
}

impl SourceFile {
    /// Join everything known about one file and compute its summary.
    #[must_use]
    pub fn build(
        path: &str,
        table: CategorizedFile,
        text: &SourceText,
        origins: Option<&[LineOrigin]>,
        policy: &Policy,
    ) -> (SourceFile, Summary) {
        let bins = policy.date_bins.len();
        let mut summary = Summary::new(NodeKind::File, path, bins);

        let max_line = table
            .records
            .keys()
            .filter_map(|k| match k {
                LineKey::Current(n) => Some(*n),
                LineKey::Ghost(_) => None,
            })
            .max()
            .unwrap_or(0)
            .max(text.line_count());

        let origin_of = |no: u32| -> (Option<&str>, Option<u64>) {
            match origins.and_then(|o| o.get(no as usize - 1)) {
                Some(origin) => (origin.author.as_deref(), origin.age_days),
                None => (None, None),
            }
        };

        let mut sf = SourceFile {
            path: path.to_string(),
            lines: Vec::with_capacity(max_line as usize),
            table: CategorizedFile::default(),
            line_category: BTreeMap::new(),
            branch_category: BTreeMap::new(),
            line_owners: BTreeMap::new(),
            branch_owners: BTreeMap::new(),
            line_bins: vec![SliceIndex::default(); bins],
            branch_bins: vec![SliceIndex::default(); bins],
        };

        for no in 1..=max_line {
            let (owner, age_days) = origin_of(no);
            sf.lines.push(SourceLine {
                no,
                text: text.line(no).unwrap_or("").to_string(),
                owner: owner.map(str::to_string),
                age_days,
                tla: table
                    .records
                    .get(&LineKey::Current(no))
                    .and_then(|r| r.tla),
            });
        }

        // Ascending walk; the derived LineKey order places ghosts last so
        // they never perturb the visual indices.
        for (key, record) in &table.records {
            let current = match key {
                LineKey::Current(no) => Some(*no),
                LineKey::Ghost(_) => None,
            };
            let (owner, age_days) = match current {
                Some(no) => origin_of(no),
                None => (None, None),
            };
            let bin = age_days.map(|a| policy.date_bins.bin_of(a));

            if let Some(tla) = record.tla {
                summary.record_line(tla, owner, bin);
                if let Some(no) = current {
                    debug_assert!(tla.in_view());
                    push_sorted(sf.line_category.entry(tla).or_default(), no);
                    if let Some(owner) = owner {
                        sf.line_owners
                            .entry(owner.to_string())
                            .or_default()
                            .push(tla, no);
                    }
                    if let Some(bin) = bin {
                        sf.line_bins[bin].push(tla, no);
                    }
                }
            }

            for branch in &record.branches {
                summary.record_branch(branch.tla, owner, bin);
                if let Some(no) = current {
                    push_sorted(sf.branch_category.entry(branch.tla).or_default(), no);
                    if let Some(owner) = owner {
                        sf.branch_owners
                            .entry(owner.to_string())
                            .or_default()
                            .push(branch.tla, no);
                    }
                    if let Some(bin) = bin {
                        sf.branch_bins[bin].push(branch.tla, no);
                    }
                }
            }

            for func in &record.functions {
                if func.aliases.is_empty() {
                    summary.record_function(func.tla, bin);
                } else {
                    for alias in func.aliases.values() {
                        summary.record_function(alias.tla, bin);
                    }
                }
            }
        }

        for func in &table.unanchored_functions {
            if func.aliases.is_empty() {
                summary.record_function(func.tla, None);
            } else {
                for alias in func.aliases.values() {
                    summary.record_function(alias.tla, None);
                }
            }
        }

        sf.table = table;
        (sf, summary)
    }

    /// Lines carrying a given line category, strictly increasing.
    #[must_use]
    pub fn category_lines(&self, tla: Tla) -> &[u32] {
        self.line_category.get(&tla).map_or(&[], Vec::as_slice)
    }

    /// Lines carrying a given branch category, strictly increasing.
    #[must_use]
    pub fn branch_lines(&self, tla: Tla) -> &[u32] {
        self.branch_category.get(&tla).map_or(&[], Vec::as_slice)
    }
}

/// Append keeping the list strictly increasing; the builder walks line
/// numbers in ascending order so a tail check suffices.
fn push_sorted(vec: &mut Vec<u32>, no: u32) {
    if vec.last() != Some(&no) {
        debug_assert!(vec.last().map_or(true, |&last| last < no));
        vec.push(no);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::category::Categorizer;
    use crate::diag::Diag;
    use crate::diffmap::DiffMap;
    use crate::trace::FileTrace;

    fn build_simple() -> (SourceFile, Summary) {
        let diag = Diag::new(0, false);
        diag.start_capture();
        let diff = DiffMap::empty(true);
        let mut curr = FileTrace::new("a.c".into());
        curr.lines.insert(1, 3);
        curr.lines.insert(2, 0);
        curr.lines.insert(4, 1);
        curr.branches.entry(2).or_default().insert(0, vec![1, 0]);

        let cat = Categorizer::new(&diff, &diag, false);
        let table = cat
            .categorize_file("a.c", Some(&curr), None, false)
            .unwrap();

        let text = SourceText {
            lines: vec![
                "int a = f();".into(),
                "if (a) {".into(),
                "  // nothing".into(),
                "}".into(),
            ],
            synthesized: false,
        };
        let origins: Vec<LineOrigin> = vec![
            LineOrigin {
                commit: Some("c1".into()),
                author: Some("alice".into()),
                age_days: Some(3),
                text: String::new(),
            },
            LineOrigin {
                commit: Some("c1".into()),
                author: Some("alice".into()),
                age_days: Some(3),
                text: String::new(),
            },
            LineOrigin {
                commit: Some("c2".into()),
                author: Some("bob".into()),
                age_days: Some(40),
                text: String::new(),
            },
            LineOrigin {
                commit: Some("c2".into()),
                author: Some("bob".into()),
                age_days: Some(40),
                text: String::new(),
            },
        ];
        let policy = Policy::default();
        SourceFile::build("a.c", table, &text, Some(&origins), &policy)
    }

    #[test]
    fn test_indices_strictly_increasing() {
        let (sf, _) = build_simple();
        for lines in sf.line_category.values().chain(sf.branch_category.values()) {
            assert!(lines.windows(2).all(|w| w[0] < w[1]));
        }
    }

    #[test]
    fn test_category_index_matches_records() {
        let (sf, _) = build_simple();
        assert_eq!(sf.category_lines(Tla::Gic), &[1, 4]);
        assert_eq!(sf.category_lines(Tla::Uic), &[2]);
        assert_eq!(sf.branch_lines(Tla::Gic), &[2]);
        assert_eq!(sf.branch_lines(Tla::Uic), &[2]);
    }

    #[test]
    fn test_owner_and_bin_indices() {
        let (sf, summary) = build_simple();
        assert_eq!(sf.line_owners["alice"].lines, vec![1, 2]);
        assert_eq!(sf.line_owners["bob"].lines, vec![4]);
        assert_eq!(sf.line_owners["alice"].by_tla[&Tla::Uic], vec![2]);
        // Ages 3,3 -> bin 0; 40 -> bin 2 with default cutpoints 7,30,180.
        assert_eq!(sf.line_bins[0].lines, vec![1, 2]);
        assert_eq!(sf.line_bins[2].lines, vec![4]);
        assert_eq!(summary.line_age[0].found, 2);
        assert_eq!(summary.line_age[2].found, 1);
        assert_eq!(summary.owners_line["alice"].get(Tla::Gic), 1);
    }

    #[test]
    fn test_file_summary_totals() {
        let (_, summary) = build_simple();
        assert_eq!(summary.line.found, 3);
        assert_eq!(summary.line.hit, 2);
        assert_eq!(summary.branch.found, 2);
        assert_eq!(summary.branch.hit, 1);
    }

    #[test]
    fn test_source_lines_annotated() {
        let (sf, _) = build_simple();
        assert_eq!(sf.lines.len(), 4);
        assert_eq!(sf.lines[0].owner.as_deref(), Some("alice"));
        assert_eq!(sf.lines[2].tla, None);
        assert_eq!(sf.lines[3].age_days, Some(40));
    }
}
