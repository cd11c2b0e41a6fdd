//! Differential coverage categorization.
//!
//! Every coverpoint (line, branch, function) receives a category from a
//! closed twelve-element set based on where it sits relative to the code
//! change (insert/equal/delete) and how its execution count moved between
//! the baseline and current traces.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::diag::{Diag, DiagKind};
use crate::diffmap::{DiffKind, DiffMap, Side};
use crate::error::Result;
use crate::trace::FileTrace;

/// Coverage category.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Tla {
    /// Gained New Coverage: inserted line, executed.
    Gnc,
    /// Uncovered New Code: inserted line, not executed.
    Unc,
    /// Gained Included Coverage: unchanged line newly measured, executed.
    Gic,
    /// Uncovered Included Code: unchanged line newly measured, not executed.
    Uic,
    /// Covered Baseline Code: executed in both revisions.
    Cbc,
    /// Gain Baseline Coverage: newly executed unchanged line.
    Gbc,
    /// Lost Baseline Coverage: no longer executed unchanged line.
    Lbc,
    /// Uncovered Baseline Code: executed in neither revision.
    Ubc,
    /// Excluded Covered Baseline: was executed, no longer measured.
    Ecb,
    /// Excluded Uncovered Baseline: was not executed, no longer measured.
    Eub,
    /// Deleted Covered Baseline: removed line that was executed.
    Dcb,
    /// Deleted Uncovered Baseline: removed line that was not executed.
    Dub,
}

impl Tla {
    pub const ALL: [Tla; 12] = [
        Tla::Gnc,
        Tla::Unc,
        Tla::Gic,
        Tla::Uic,
        Tla::Cbc,
        Tla::Gbc,
        Tla::Lbc,
        Tla::Ubc,
        Tla::Ecb,
        Tla::Eub,
        Tla::Dcb,
        Tla::Dub,
    ];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Tla::Gnc => "GNC",
            Tla::Unc => "UNC",
            Tla::Gic => "GIC",
            Tla::Uic => "UIC",
            Tla::Cbc => "CBC",
            Tla::Gbc => "GBC",
            Tla::Lbc => "LBC",
            Tla::Ubc => "UBC",
            Tla::Ecb => "ECB",
            Tla::Eub => "EUB",
            Tla::Dcb => "DCB",
            Tla::Dub => "DUB",
        }
    }

    /// Dense index into per-TLA count arrays.
    #[must_use]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Location bit: the coverpoint has a line number in the current
    /// revision and appears in the source-detail view. Only deleted
    /// categories lack it.
    #[must_use]
    pub fn in_view(self) -> bool {
        !matches!(self, Tla::Dcb | Tla::Dub)
    }

    /// Whether this category contributes to `found` (measurable in the
    /// current revision; excluded and deleted baseline categories do not).
    #[must_use]
    pub fn counts_found(self) -> bool {
        !matches!(self, Tla::Ecb | Tla::Eub | Tla::Dcb | Tla::Dub)
    }

    /// Whether this category contributes to `hit`.
    #[must_use]
    pub fn is_hit(self) -> bool {
        matches!(self, Tla::Cbc | Tla::Gbc | Tla::Gic | Tla::Gnc)
    }
}

impl fmt::Display for Tla {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Category assignment for one coverpoint.
///
/// `base`/`curr` are `None` when the coverpoint is not measured in that
/// revision. Returns `None` when neither side is measured.
#[must_use]
pub fn categorize(kind: DiffKind, base: Option<u64>, curr: Option<u64>) -> Option<Tla> {
    match kind {
        DiffKind::Insert => curr.map(|c| if c > 0 { Tla::Gnc } else { Tla::Unc }),
        DiffKind::Delete => base.map(|b| if b > 0 { Tla::Dcb } else { Tla::Dub }),
        DiffKind::Equal => match (base, curr) {
            (Some(b), Some(c)) => Some(match (b > 0, c > 0) {
                (true, true) => Tla::Cbc,
                (false, true) => Tla::Gbc,
                (true, false) => Tla::Lbc,
                (false, false) => Tla::Ubc,
            }),
            (Some(b), None) => Some(if b > 0 { Tla::Ecb } else { Tla::Eub }),
            (None, Some(c)) => Some(if c > 0 { Tla::Gic } else { Tla::Uic }),
            (None, None) => None,
        },
    }
}

/// The `new_file_as_baseline` rewrite: code that merely started being
/// measured is treated as baseline code so ratcheting criteria do not
/// penalize it.
#[must_use]
pub fn remap_as_baseline(tla: Tla) -> Tla {
    match tla {
        Tla::Uic => Tla::Ubc,
        Tla::Gic => Tla::Cbc,
        other => other,
    }
}

/// Table key for the per-file line map. Deleted baseline lines are keyed
/// as ghosts so they are summarized but never shown; the derived ordering
/// places every ghost after every current line.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum LineKey {
    Current(u32),
    Ghost(u32),
}

/// One categorized branch arm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchRecord {
    pub block: u32,
    pub branch: u32,
    pub base_count: Option<u64>,
    pub curr_count: Option<u64>,
    pub tla: Tla,
}

/// Per-alias hit and category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionAlias {
    pub hit: u64,
    pub tla: Tla,
}

/// A categorized function. `name` is the leader when aliases share the
/// declaration line; the leader's category always derives from the merged
/// hit count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionRecord {
    pub name: String,
    pub line: Option<u32>,
    pub hit: u64,
    pub tla: Tla,
    pub aliases: BTreeMap<String, FunctionAlias>,
}

/// One row of the per-file table: everything known about a line number in
/// either revision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineRecord {
    pub kind: DiffKind,
    pub base_lineno: Option<u32>,
    pub curr_lineno: Option<u32>,
    pub base_count: Option<u64>,
    pub curr_count: Option<u64>,
    pub tla: Option<Tla>,
    pub branches: Vec<BranchRecord>,
    pub functions: Vec<FunctionRecord>,
}

impl LineRecord {
    fn new(kind: DiffKind) -> Self {
        Self {
            kind,
            base_lineno: None,
            curr_lineno: None,
            base_count: None,
            curr_count: None,
            tla: None,
            branches: Vec::new(),
            functions: Vec::new(),
        }
    }
}

/// Categorizer output for one source file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CategorizedFile {
    #[serde(with = "record_map")]
    pub records: BTreeMap<LineKey, LineRecord>,
    /// Functions the trace never gave a declaration line.
    pub unanchored_functions: Vec<FunctionRecord>,
}

/// JSON maps need string keys; the record table serializes as a sequence
/// of `(key, record)` pairs instead.
mod record_map {
    use super::{LineKey, LineRecord};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::BTreeMap;

    pub fn serialize<S: Serializer>(
        map: &BTreeMap<LineKey, LineRecord>,
        ser: S,
    ) -> Result<S::Ok, S::Error> {
        let pairs: Vec<(&LineKey, &LineRecord)> = map.iter().collect();
        pairs.serialize(ser)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        de: D,
    ) -> Result<BTreeMap<LineKey, LineRecord>, D::Error> {
        let pairs: Vec<(LineKey, LineRecord)> = Vec::deserialize(de)?;
        Ok(pairs.into_iter().collect())
    }
}

/// Assigns categories to every coverpoint of one file.
pub struct Categorizer<'a> {
    pub diff: &'a DiffMap,
    pub diag: &'a Diag,
    /// Merge aliases into the leader instead of categorizing individually.
    pub merge_aliases: bool,
}

impl<'a> Categorizer<'a> {
    pub fn new(diff: &'a DiffMap, diag: &'a Diag, merge_aliases: bool) -> Self {
        Self {
            diff,
            diag,
            merge_aliases,
        }
    }

    /// Build the categorized table for `path`. `treat_as_baseline` applies
    /// the `new_file_as_baseline` remap after categorization.
    pub fn categorize_file(
        &self,
        path: &str,
        curr: Option<&FileTrace>,
        base: Option<&FileTrace>,
        treat_as_baseline: bool,
    ) -> Result<CategorizedFile> {
        let mut out = CategorizedFile::default();

        self.categorize_lines(path, curr, base, &mut out.records)?;
        self.categorize_branches(path, curr, base, &mut out.records)?;
        self.categorize_functions(path, curr, base, &mut out)?;

        if treat_as_baseline {
            for record in out.records.values_mut() {
                record.tla = record.tla.map(remap_as_baseline);
                for branch in &mut record.branches {
                    branch.tla = remap_as_baseline(branch.tla);
                }
                for func in &mut record.functions {
                    func.tla = remap_as_baseline(func.tla);
                    for alias in func.aliases.values_mut() {
                        alias.tla = remap_as_baseline(alias.tla);
                    }
                }
            }
            for func in &mut out.unanchored_functions {
                func.tla = remap_as_baseline(func.tla);
                for alias in func.aliases.values_mut() {
                    alias.tla = remap_as_baseline(alias.tla);
                }
            }
        }

        Ok(out)
    }

    fn categorize_lines(
        &self,
        path: &str,
        curr: Option<&FileTrace>,
        base: Option<&FileTrace>,
        records: &mut BTreeMap<LineKey, LineRecord>,
    ) -> Result<()> {
        if let Some(curr) = curr {
            for (&cline, &count) in &curr.lines {
                let kind = match self.diff.kind(path, Side::New, cline) {
                    DiffKind::Delete => {
                        self.diag.emit(
                            DiagKind::Inconsistent,
                            &format!("{path}:{cline}: current count on a deleted line"),
                        )?;
                        DiffKind::Equal
                    }
                    k => k,
                };
                let record = records
                    .entry(LineKey::Current(cline))
                    .or_insert_with(|| LineRecord::new(kind));
                record.curr_lineno = Some(cline);
                record.curr_count = Some(count);
            }
        }

        if let Some(base) = base {
            for (&bline, &count) in &base.lines {
                match self.diff.kind(path, Side::Old, bline) {
                    DiffKind::Delete => {
                        let record = records
                            .entry(LineKey::Ghost(bline))
                            .or_insert_with(|| LineRecord::new(DiffKind::Delete));
                        record.base_lineno = Some(bline);
                        record.base_count = Some(count);
                    }
                    DiffKind::Insert => {
                        self.diag.emit(
                            DiagKind::Inconsistent,
                            &format!("{path}:{bline}: baseline count on an inserted line"),
                        )?;
                    }
                    DiffKind::Equal => {
                        let Some(cline) = self.diff.lookup(path, Side::Old, bline) else {
                            self.diag.emit(
                                DiagKind::Unmapped,
                                &format!("{path}:{bline}: baseline line has no current mapping"),
                            )?;
                            continue;
                        };
                        let record = records
                            .entry(LineKey::Current(cline))
                            .or_insert_with(|| LineRecord::new(DiffKind::Equal));
                        if record.kind == DiffKind::Insert {
                            self.diag.emit(
                                DiagKind::Inconsistent,
                                &format!("{path}:{cline}: baseline count on an inserted line"),
                            )?;
                            continue;
                        }
                        record.base_lineno = Some(bline);
                        record.base_count = Some(count);

                        // Checksum disagreement between the two traces on a
                        // line the diff says did not change.
                        if let (Some(curr), Some(bsum)) = (curr, base.checksums.get(&bline)) {
                            if let Some(csum) = curr.checksums.get(&cline) {
                                if bsum != csum {
                                    self.diag.emit(
                                        DiagKind::Mismatch,
                                        &format!(
                                            "{path}:{cline}: checksum '{csum}' does not match baseline '{bsum}'"
                                        ),
                                    )?;
                                }
                            }
                        }
                    }
                }
            }
        }

        for record in records.values_mut() {
            record.tla = categorize(record.kind, record.base_count, record.curr_count);
        }
        Ok(())
    }

    fn categorize_branches(
        &self,
        path: &str,
        curr: Option<&FileTrace>,
        base: Option<&FileTrace>,
        records: &mut BTreeMap<LineKey, LineRecord>,
    ) -> Result<()> {
        // Current-side blocks keyed by their own line, baseline blocks
        // remapped to the table key they belong to.
        let mut curr_blocks: BTreeMap<LineKey, &BTreeMap<u32, Vec<u64>>> = BTreeMap::new();
        let mut base_blocks: BTreeMap<LineKey, &BTreeMap<u32, Vec<u64>>> = BTreeMap::new();

        if let Some(curr) = curr {
            for (&cline, blocks) in &curr.branches {
                curr_blocks.insert(LineKey::Current(cline), blocks);
            }
        }
        if let Some(base) = base {
            for (&bline, blocks) in &base.branches {
                match self.diff.kind(path, Side::Old, bline) {
                    DiffKind::Delete => {
                        base_blocks.insert(LineKey::Ghost(bline), blocks);
                    }
                    DiffKind::Insert => {
                        self.diag.emit(
                            DiagKind::Inconsistent,
                            &format!("{path}:{bline}: baseline branch data on an inserted line"),
                        )?;
                    }
                    DiffKind::Equal => {
                        if let Some(cline) = self.diff.lookup(path, Side::Old, bline) {
                            base_blocks.insert(LineKey::Current(cline), blocks);
                        } else {
                            self.diag.emit(
                                DiagKind::Unmapped,
                                &format!(
                                    "{path}:{bline}: baseline branches have no current mapping"
                                ),
                            )?;
                        }
                    }
                }
            }
        }

        let keys: Vec<LineKey> = curr_blocks
            .keys()
            .chain(base_blocks.keys())
            .copied()
            .collect::<std::collections::BTreeSet<_>>()
            .into_iter()
            .collect();

        for key in keys {
            let kind = match key {
                LineKey::Ghost(_) => DiffKind::Delete,
                LineKey::Current(cline) => match self.diff.kind(path, Side::New, cline) {
                    DiffKind::Delete => DiffKind::Equal,
                    k => k,
                },
            };
            // Baseline data zipped onto an inserted line is inconsistent;
            // categorize the current side alone.
            let base_side = if kind == DiffKind::Insert && base_blocks.contains_key(&key) {
                self.diag.emit(
                    DiagKind::Inconsistent,
                    &format!("{path}: baseline branch block on inserted line {key:?}"),
                )?;
                None
            } else {
                base_blocks.get(&key).copied()
            };
            let curr_side = if kind == DiffKind::Delete && curr_blocks.contains_key(&key) {
                self.diag.emit(
                    DiagKind::Inconsistent,
                    &format!("{path}: current branch block on deleted line {key:?}"),
                )?;
                None
            } else {
                curr_blocks.get(&key).copied()
            };

            let mut branches = Vec::new();
            let block_ids: std::collections::BTreeSet<u32> = base_side
                .iter()
                .flat_map(|m| m.keys())
                .chain(curr_side.iter().flat_map(|m| m.keys()))
                .copied()
                .collect();
            for block in block_ids {
                let base_taken = base_side.and_then(|m| m.get(&block));
                let curr_taken = curr_side.and_then(|m| m.get(&block));
                let len = base_taken
                    .map_or(0, |v| v.len())
                    .max(curr_taken.map_or(0, |v| v.len()));
                for idx in 0..len {
                    let b = base_taken.and_then(|v| v.get(idx)).copied();
                    let c = curr_taken.and_then(|v| v.get(idx)).copied();
                    let Some(tla) = categorize(kind, b, c) else {
                        continue;
                    };
                    branches.push(BranchRecord {
                        block,
                        branch: idx as u32,
                        base_count: b,
                        curr_count: c,
                        tla,
                    });
                }
            }
            if branches.is_empty() {
                continue;
            }
            let record = records.entry(key).or_insert_with(|| {
                let mut r = LineRecord::new(kind);
                match key {
                    LineKey::Current(cline) => r.curr_lineno = Some(cline),
                    LineKey::Ghost(bline) => r.base_lineno = Some(bline),
                }
                r
            });
            record.branches = branches;
        }
        Ok(())
    }

    fn categorize_functions(
        &self,
        path: &str,
        curr: Option<&FileTrace>,
        base: Option<&FileTrace>,
        out: &mut CategorizedFile,
    ) -> Result<()> {
        // Group current functions by declaration line; names the trace
        // never declared become their own anchorless leaders.
        let mut groups: BTreeMap<Option<u32>, BTreeMap<&str, u64>> = BTreeMap::new();
        if let Some(curr) = curr {
            for (name, &hit) in &curr.fn_hits {
                let line = curr.fn_lines.get(name).copied();
                groups.entry(line).or_default().insert(name.as_str(), hit);
            }
            for (name, &line) in &curr.fn_lines {
                groups
                    .entry(Some(line))
                    .or_default()
                    .entry(name.as_str())
                    .or_insert(0);
            }
        }

        let mut seen_base: std::collections::BTreeSet<&str> = std::collections::BTreeSet::new();

        for (line, members) in &groups {
            let kind = match line {
                Some(l) => match self.diff.kind(path, Side::New, *l) {
                    DiffKind::Delete => {
                        self.diag.emit(
                            DiagKind::Inconsistent,
                            &format!("{path}:{l}: current function on a deleted line"),
                        )?;
                        DiffKind::Equal
                    }
                    k => k,
                },
                None => DiffKind::Equal,
            };

            let merged_curr: u64 = members.values().sum();
            let mut merged_base: u64 = 0;
            let mut base_measured = false;
            for name in members.keys() {
                seen_base.insert(*name);
                if let Some(&hit) = base.and_then(|b| b.fn_hits.get(*name)) {
                    merged_base += hit;
                    base_measured = true;
                }
            }
            let merged_base = base_measured.then_some(merged_base);

            let leader = members
                .keys()
                .next()
                .copied()
                .unwrap_or_default()
                .to_string();
            let tla = self.function_tla(path, kind, merged_base, Some(merged_curr))?;

            let aliases = if self.merge_aliases || members.len() <= 1 {
                BTreeMap::new()
            } else {
                let mut aliases = BTreeMap::new();
                for (name, &hit) in members {
                    let alias_base = base.and_then(|b| b.fn_hits.get(*name).copied());
                    let alias_tla = self.function_tla(path, kind, alias_base, Some(hit))?;
                    aliases.insert(
                        (*name).to_string(),
                        FunctionAlias {
                            hit,
                            tla: alias_tla,
                        },
                    );
                }
                aliases
            };

            let record = FunctionRecord {
                name: leader,
                line: *line,
                hit: merged_curr,
                tla,
                aliases,
            };
            match line {
                Some(l) => {
                    let key = LineKey::Current(*l);
                    let entry = out.records.entry(key).or_insert_with(|| {
                        let mut r = LineRecord::new(kind);
                        r.curr_lineno = Some(*l);
                        r
                    });
                    entry.functions.push(record);
                }
                None => out.unanchored_functions.push(record),
            }
        }

        // Baseline-only functions: deleted or excluded.
        if let Some(base) = base {
            let mut base_groups: BTreeMap<Option<u32>, BTreeMap<&str, u64>> = BTreeMap::new();
            for (name, &hit) in &base.fn_hits {
                if seen_base.contains(name.as_str()) {
                    continue;
                }
                let line = base.fn_lines.get(name).copied();
                base_groups
                    .entry(line)
                    .or_default()
                    .insert(name.as_str(), hit);
            }
            for (bline, members) in &base_groups {
                let merged: u64 = members.values().sum();
                let leader = members
                    .keys()
                    .next()
                    .copied()
                    .unwrap_or_default()
                    .to_string();
                let (key, kind) = match bline {
                    Some(l) => match self.diff.kind(path, Side::Old, *l) {
                        DiffKind::Delete => (Some(LineKey::Ghost(*l)), DiffKind::Delete),
                        _ => {
                            let mapped = self.diff.lookup(path, Side::Old, *l);
                            match mapped {
                                Some(cline) => (Some(LineKey::Current(cline)), DiffKind::Equal),
                                None => {
                                    self.diag.emit(
                                        DiagKind::Unmapped,
                                        &format!(
                                            "{path}:{l}: baseline function has no current mapping"
                                        ),
                                    )?;
                                    (None, DiffKind::Equal)
                                }
                            }
                        }
                    },
                    None => (None, DiffKind::Equal),
                };
                let tla = self.function_tla(path, kind, Some(merged), None)?;
                let record = FunctionRecord {
                    name: leader,
                    line: match key {
                        Some(LineKey::Current(l)) => Some(l),
                        _ => None,
                    },
                    hit: 0,
                    tla,
                    aliases: BTreeMap::new(),
                };
                match key {
                    Some(k) => {
                        let entry = out.records.entry(k).or_insert_with(|| {
                            let mut r = LineRecord::new(kind);
                            match k {
                                LineKey::Current(l) => r.curr_lineno = Some(l),
                                LineKey::Ghost(l) => r.base_lineno = Some(l),
                            }
                            r
                        });
                        entry.functions.push(record);
                    }
                    None => out.unanchored_functions.push(record),
                }
            }
        }
        Ok(())
    }

    /// A function hit count that cannot be categorized is a structural
    /// inconsistency, not a silent default.
    fn function_tla(
        &self,
        path: &str,
        kind: DiffKind,
        base: Option<u64>,
        curr: Option<u64>,
    ) -> Result<Tla> {
        match categorize(kind, base, curr) {
            Some(tla) => Ok(tla),
            None => {
                self.diag.emit(
                    DiagKind::Inconsistent,
                    &format!("{path}: function hit count without a category"),
                )?;
                Ok(if curr.unwrap_or(0) > 0 {
                    Tla::Gnc
                } else {
                    Tla::Unc
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diffmap::DiffMap;

    fn diag() -> Diag {
        let d = Diag::new(0, false);
        d.start_capture();
        d
    }

    #[test]
    fn test_categorize_table() {
        use DiffKind::*;
        assert_eq!(categorize(Insert, None, Some(3)), Some(Tla::Gnc));
        assert_eq!(categorize(Insert, None, Some(0)), Some(Tla::Unc));
        assert_eq!(categorize(Delete, Some(3), None), Some(Tla::Dcb));
        assert_eq!(categorize(Delete, Some(0), None), Some(Tla::Dub));
        assert_eq!(categorize(Equal, Some(7), Some(2)), Some(Tla::Cbc));
        assert_eq!(categorize(Equal, Some(0), Some(2)), Some(Tla::Gbc));
        assert_eq!(categorize(Equal, Some(7), Some(0)), Some(Tla::Lbc));
        assert_eq!(categorize(Equal, Some(0), Some(0)), Some(Tla::Ubc));
        assert_eq!(categorize(Equal, Some(7), None), Some(Tla::Ecb));
        assert_eq!(categorize(Equal, Some(0), None), Some(Tla::Eub));
        assert_eq!(categorize(Equal, None, Some(2)), Some(Tla::Gic));
        assert_eq!(categorize(Equal, None, Some(0)), Some(Tla::Uic));
        assert_eq!(categorize(Equal, None, None), None);
    }

    #[test]
    fn test_tla_closure() {
        // Every reachable input yields a member of the closed set.
        for kind in [DiffKind::Equal, DiffKind::Insert, DiffKind::Delete] {
            for base in [None, Some(0), Some(5)] {
                for curr in [None, Some(0), Some(5)] {
                    if let Some(tla) = categorize(kind, base, curr) {
                        assert!(Tla::ALL.contains(&tla));
                    }
                }
            }
        }
    }

    #[test]
    fn test_ghost_keys_sort_last() {
        let mut keys = vec![
            LineKey::Ghost(1),
            LineKey::Current(900),
            LineKey::Ghost(500),
            LineKey::Current(2),
        ];
        keys.sort();
        assert_eq!(
            keys,
            vec![
                LineKey::Current(2),
                LineKey::Current(900),
                LineKey::Ghost(1),
                LineKey::Ghost(500),
            ]
        );
    }

    #[test]
    fn test_idempotence() {
        let d = diag();
        let diff = DiffMap::empty(true);
        let mut curr = FileTrace::new("a.c".into());
        curr.lines.insert(1, 4);
        curr.lines.insert(2, 0);
        curr.branches.entry(1).or_default().insert(0, vec![4, 0]);
        let cat = Categorizer::new(&diff, &d, false);
        let first = cat
            .categorize_file("a.c", Some(&curr), None, false)
            .unwrap();
        let second = cat
            .categorize_file("a.c", Some(&curr), None, false)
            .unwrap();
        assert_eq!(first.records, second.records);
    }

    #[test]
    fn test_remap_round_trip() {
        let d = diag();
        let diff = DiffMap::empty(true);
        let mut curr = FileTrace::new("a.c".into());
        curr.lines.insert(1, 4); // GIC without remap
        curr.lines.insert(2, 0); // UIC without remap
        let cat = Categorizer::new(&diff, &d, false);

        let plain = cat
            .categorize_file("a.c", Some(&curr), None, false)
            .unwrap();
        let remapped = cat
            .categorize_file("a.c", Some(&curr), None, true)
            .unwrap();

        let count = |cf: &CategorizedFile, tla: Tla| {
            cf.records
                .values()
                .filter(|r| r.tla == Some(tla))
                .count()
        };
        assert_eq!(count(&remapped, Tla::Uic), 0);
        assert_eq!(count(&remapped, Tla::Gic), 0);
        assert_eq!(
            count(&remapped, Tla::Ubc) + count(&remapped, Tla::Cbc),
            count(&plain, Tla::Uic)
                + count(&plain, Tla::Ubc)
                + count(&plain, Tla::Gic)
                + count(&plain, Tla::Cbc)
        );
    }

    #[test]
    fn test_branch_zip_by_block_and_index() {
        let d = diag();
        let diff = DiffMap::empty(true);
        let mut curr = FileTrace::new("a.c".into());
        curr.branches.entry(10).or_default().insert(0, vec![5, 2]);
        let mut base = FileTrace::new("a.c".into());
        base.branches.entry(10).or_default().insert(0, vec![5, 0]);

        let cat = Categorizer::new(&diff, &d, false);
        let out = cat
            .categorize_file("a.c", Some(&curr), Some(&base), false)
            .unwrap();
        let record = &out.records[&LineKey::Current(10)];
        let tlas: Vec<Tla> = record.branches.iter().map(|b| b.tla).collect();
        assert_eq!(tlas, vec![Tla::Cbc, Tla::Gbc]);
    }

    #[test]
    fn test_function_alias_leader() {
        let d = diag();
        let diff = DiffMap::empty(false);
        let mut curr = FileTrace::new("a.c".into());
        curr.fn_lines.insert("f<int>".into(), 3);
        curr.fn_lines.insert("f<bool>".into(), 3);
        curr.fn_hits.insert("f<int>".into(), 2);
        curr.fn_hits.insert("f<bool>".into(), 0);

        let cat = Categorizer::new(&diff, &d, false);
        let out = cat
            .categorize_file("a.c", Some(&curr), None, false)
            .unwrap();
        let record = &out.records[&LineKey::Current(3)];
        assert_eq!(record.functions.len(), 1);
        let func = &record.functions[0];
        // Lexicographically smallest alias leads; merged hits drive its TLA.
        assert_eq!(func.name, "f<bool>");
        assert_eq!(func.hit, 2);
        assert_eq!(func.tla, Tla::Gnc);
        assert_eq!(func.aliases.len(), 2);
        assert_eq!(func.aliases["f<bool>"].tla, Tla::Unc);
        assert_eq!(func.aliases["f<int>"].tla, Tla::Gnc);
    }

    #[test]
    fn test_function_alias_merge_filter() {
        let d = diag();
        let diff = DiffMap::empty(false);
        let mut curr = FileTrace::new("a.c".into());
        curr.fn_lines.insert("g<int>".into(), 9);
        curr.fn_lines.insert("g<bool>".into(), 9);
        curr.fn_hits.insert("g<int>".into(), 1);
        curr.fn_hits.insert("g<bool>".into(), 0);

        let cat = Categorizer::new(&diff, &d, true);
        let out = cat
            .categorize_file("a.c", Some(&curr), None, false)
            .unwrap();
        let func = &out.records[&LineKey::Current(9)].functions[0];
        assert!(func.aliases.is_empty());
        assert_eq!(func.hit, 1);
    }
}
