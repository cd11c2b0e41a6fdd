//! Additive coverage summaries and their rollup.
//!
//! One [`Summary`] exists per node of the report tree (file, directory,
//! top). `append` is strictly additive across every field, so rollup is
//! commutative and associative and any scheduling interleaving produces
//! the same totals.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::category::Tla;

/// Report-tree node kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    File,
    Directory,
    Top,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKind::File => f.write_str("file"),
            NodeKind::Directory => f.write_str("directory"),
            NodeKind::Top => f.write_str("top"),
        }
    }
}

/// Per-category counters, densely indexed by [`Tla::index`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TlaCounts([u64; 12]);

impl TlaCounts {
    #[must_use]
    pub fn get(&self, tla: Tla) -> u64 {
        self.0[tla.index()]
    }

    pub fn inc(&mut self, tla: Tla) {
        self.0[tla.index()] += 1;
    }

    pub fn add(&mut self, other: &TlaCounts) {
        for (slot, v) in self.0.iter_mut().zip(other.0.iter()) {
            *slot += v;
        }
    }

    /// Nonzero entries in TLA order.
    pub fn iter(&self) -> impl Iterator<Item = (Tla, u64)> + '_ {
        Tla::ALL
            .iter()
            .map(|&t| (t, self.get(t)))
            .filter(|(_, n)| *n > 0)
    }

    #[must_use]
    pub fn total(&self) -> u64 {
        self.0.iter().sum()
    }
}

// The external JSON boundary speaks category names, not indices.
impl Serialize for TlaCounts {
    fn serialize<S: Serializer>(&self, ser: S) -> Result<S::Ok, S::Error> {
        let map: BTreeMap<&'static str, u64> =
            self.iter().map(|(t, n)| (t.name(), n)).collect();
        map.serialize(ser)
    }
}

impl<'de> Deserialize<'de> for TlaCounts {
    fn deserialize<D: Deserializer<'de>>(de: D) -> Result<Self, D::Error> {
        let map: BTreeMap<String, u64> = BTreeMap::deserialize(de)?;
        let mut counts = TlaCounts::default();
        for (name, n) in map {
            let tla = Tla::ALL
                .iter()
                .copied()
                .find(|t| t.name() == name)
                .ok_or_else(|| D::Error::custom(format!("unknown category '{name}'")))?;
            counts.0[tla.index()] = n;
        }
        Ok(counts)
    }
}

/// found/hit plus the per-category breakdown for one coverage kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverCounts {
    pub found: u64,
    pub hit: u64,
    pub per_tla: TlaCounts,
}

impl CoverCounts {
    /// Account one coverpoint. `found` counts categories measurable in the
    /// current revision; `hit` the gained/covered subset.
    pub fn record(&mut self, tla: Tla) {
        self.per_tla.inc(tla);
        if tla.counts_found() {
            self.found += 1;
        }
        if tla.is_hit() {
            self.hit += 1;
        }
    }

    pub fn add(&mut self, other: &CoverCounts) {
        self.found += other.found;
        self.hit += other.hit;
        self.per_tla.add(&other.per_tla);
    }

    #[must_use]
    pub fn rate(&self) -> u64 {
        rate(self.hit, self.found)
    }
}

/// Sort rate. Ties at equal percentage collapse by total size so larger
/// files sort above smaller ones; zero `found` returns the sentinel 1000.
#[must_use]
pub fn rate(hit: u64, found: u64) -> u64 {
    if found == 0 {
        return 1000;
    }
    hit * 1000 / found * 10 + 2 - 1 / found
}

/// Per-owner category counts for one coverage kind.
pub type OwnerCounts = BTreeMap<String, TlaCounts>;

/// Summary of one report-tree node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    pub kind: NodeKind,
    pub name: String,
    /// Back-reference into the task arena; never serialized across workers.
    #[serde(skip)]
    pub parent: Option<usize>,
    pub line: CoverCounts,
    pub branch: CoverCounts,
    pub function: CoverCounts,
    /// One entry per age bin, per coverage kind.
    pub line_age: Vec<CoverCounts>,
    pub branch_age: Vec<CoverCounts>,
    pub function_age: Vec<CoverCounts>,
    pub owners_line: OwnerCounts,
    pub owners_branch: OwnerCounts,
}

impl Summary {
    #[must_use]
    pub fn new(kind: NodeKind, name: impl Into<String>, age_bins: usize) -> Self {
        Self {
            kind,
            name: name.into(),
            parent: None,
            line: CoverCounts::default(),
            branch: CoverCounts::default(),
            function: CoverCounts::default(),
            line_age: vec![CoverCounts::default(); age_bins],
            branch_age: vec![CoverCounts::default(); age_bins],
            function_age: vec![CoverCounts::default(); age_bins],
            owners_line: OwnerCounts::new(),
            owners_branch: OwnerCounts::new(),
        }
    }

    /// Account one line coverpoint with its optional origin.
    pub fn record_line(&mut self, tla: Tla, owner: Option<&str>, bin: Option<usize>) {
        self.line.record(tla);
        if let Some(bin) = bin {
            if let Some(slot) = self.line_age.get_mut(bin) {
                slot.record(tla);
            }
        }
        if let Some(owner) = owner {
            self.owners_line
                .entry(owner.to_string())
                .or_default()
                .inc(tla);
        }
    }

    pub fn record_branch(&mut self, tla: Tla, owner: Option<&str>, bin: Option<usize>) {
        self.branch.record(tla);
        if let Some(bin) = bin {
            if let Some(slot) = self.branch_age.get_mut(bin) {
                slot.record(tla);
            }
        }
        if let Some(owner) = owner {
            self.owners_branch
                .entry(owner.to_string())
                .or_default()
                .inc(tla);
        }
    }

    /// Functions carry age bins but no owner table.
    pub fn record_function(&mut self, tla: Tla, bin: Option<usize>) {
        self.function.record(tla);
        if let Some(bin) = bin {
            if let Some(slot) = self.function_age.get_mut(bin) {
                slot.record(tla);
            }
        }
    }

    /// Adopt a child's totals. Strictly additive on every field; owner
    /// tables merge by outer union.
    pub fn append(&mut self, child: &Summary) {
        self.line.add(&child.line);
        self.branch.add(&child.branch);
        self.function.add(&child.function);

        merge_age(&mut self.line_age, &child.line_age);
        merge_age(&mut self.branch_age, &child.branch_age);
        merge_age(&mut self.function_age, &child.function_age);

        for (owner, counts) in &child.owners_line {
            self.owners_line
                .entry(owner.clone())
                .or_default()
                .add(counts);
        }
        for (owner, counts) in &child.owners_branch {
            self.owners_branch
                .entry(owner.clone())
                .or_default()
                .add(counts);
        }
    }
}

fn merge_age(into: &mut Vec<CoverCounts>, from: &[CoverCounts]) {
    if into.len() < from.len() {
        into.resize(from.len(), CoverCounts::default());
    }
    for (slot, v) in into.iter_mut().zip(from.iter()) {
        slot.add(v);
    }
}
