//! # Catalog Interface
//!
//! The catalog provides the optimizer with the metadata of each scannable collection:
//! its index definitions, the set of field paths statically known to be array-free
//! (non-multikey), and table-level statistics for cardinality estimation.
//!
//! ## Trait Design
//!
//! The `Catalog` trait is intentionally minimal and behind a trait object (`dyn Catalog`)
//! so that different backends can provide metadata. For testing and development, the
//! `InMemoryCatalog` provides a simple HashMap-based implementation that can be
//! populated programmatically.
//!
//! ## Index Definitions
//!
//! An index is an ordered list of collation entries, each a field path plus a direction.
//! Index paths usually end in a `Traverse` step (the index stores one key per array
//! element); the requirement simplifier erases that step for paths declared
//! non-multikey so requirements line up with the index entries.

use crate::error::{violation, ContractViolation};
use crate::path::FieldPath;
use crate::stats::Statistics;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

/// Direction of a collation (sort) entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CollationOp {
    Ascending,
    Descending,
    /// Grouped but in no particular order.
    Clustered,
}

impl fmt::Display for CollationOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollationOp::Ascending => write!(f, "Asc"),
            CollationOp::Descending => write!(f, "Desc"),
            CollationOp::Clustered => write!(f, "Clustered"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexCollationEntry {
    pub path: FieldPath,
    pub op: CollationOp,
}

impl IndexCollationEntry {
    pub fn new(path: FieldPath, op: CollationOp) -> Self {
        Self { path, op }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDefinition {
    pub collation_spec: Vec<IndexCollationEntry>,
}

impl IndexDefinition {
    pub fn new(collation_spec: Vec<IndexCollationEntry>) -> Self {
        Self { collation_spec }
    }

    /// Ascending index over the given dotted paths (see [`FieldPath::parse`]).
    pub fn ascending(paths: &[&str]) -> Self {
        Self::new(
            paths
                .iter()
                .map(|p| IndexCollationEntry::new(FieldPath::parse(p), CollationOp::Ascending))
                .collect(),
        )
    }
}

/// Everything the optimizer knows about one scannable collection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanDefinition {
    /// Indexes keyed by name; iteration order is the name order.
    pub indexes: BTreeMap<String, IndexDefinition>,
    /// Paths statically known to never traverse an array.
    pub non_multikey_paths: BTreeSet<FieldPath>,
}

impl ScanDefinition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_index(mut self, name: impl Into<String>, index: IndexDefinition) -> Self {
        self.indexes.insert(name.into(), index);
        self
    }

    pub fn with_non_multikey_path(mut self, path: FieldPath) -> Self {
        self.non_multikey_paths.insert(path);
        self
    }

    pub fn is_non_multikey(&self, path: &FieldPath) -> bool {
        self.non_multikey_paths.contains(path)
    }

    /// Check the metadata for internal consistency. Inconsistent metadata is a
    /// contract violation: the matcher would otherwise produce unsound bounds.
    pub fn validate(&self) {
        for path in &self.non_multikey_paths {
            if path.contains_traverse() {
                violation(ContractViolation::InconsistentMultikeyPath(path.to_string()));
            }
        }
        for (name, index) in &self.indexes {
            if index.collation_spec.is_empty() || index.collation_spec.iter().any(|e| e.path.is_identity()) {
                violation(ContractViolation::EmptyIndexPath(name.clone()));
            }
        }
    }
}

/// Catalog provides index metadata and statistics for scannable collections.
pub trait Catalog: Send + Sync {
    fn get_scan_definition(&self, name: &str) -> Option<ScanDefinition>;
    fn get_table_stats(&self, name: &str) -> Option<Statistics>;
}

/// In-memory catalog for testing and development.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    pub scan_definitions: HashMap<String, ScanDefinition>,
    pub table_stats: HashMap<String, Statistics>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a collection. The scan definition is validated on the way in.
    pub fn add_scan(&mut self, name: impl Into<String>, scan_def: ScanDefinition, stats: Statistics) {
        scan_def.validate();
        let name = name.into();
        self.scan_definitions.insert(name.clone(), scan_def);
        self.table_stats.insert(name, stats);
    }
}

impl Catalog for InMemoryCatalog {
    fn get_scan_definition(&self, name: &str) -> Option<ScanDefinition> {
        self.scan_definitions.get(name).cloned()
    }

    fn get_table_stats(&self, name: &str) -> Option<Statistics> {
        self.table_stats.get(name).cloned()
    }
}
