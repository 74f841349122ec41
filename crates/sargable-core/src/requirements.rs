//! # Partial Schema Requirements
//!
//! A requirement set describes, per `(binding, field path)` key, which values a document
//! must have at that path to satisfy a predicate, and optionally under which projection
//! name the value should be exposed to later stages.
//!
//! ## Multimap semantics
//!
//! [`PartialSchemaRequirements`] is an ordered association list, not a map. Keys over
//! multikey (array-traversing) paths may carry several requirements that cannot be
//! merged, since each may be satisfied by a different array element. Entries are kept
//! sorted by key; entries with equal keys keep their insertion order.

use crate::error::{violation, ContractViolation};
use crate::interval::IntervalReqExpr;
use crate::path::FieldPath;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range;

/// Name of a projection (a binding visible to later plan stages).
pub type ProjectionName = String;

/// What is constrained: the path `path` read from the binding `projection_name`.
///
/// An empty `projection_name` means the value produced by the enclosing conversion,
/// not yet anchored to a binding.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PartialSchemaKey {
    pub projection_name: ProjectionName,
    pub path: FieldPath,
}

impl PartialSchemaKey {
    pub fn new(projection_name: impl Into<ProjectionName>, path: FieldPath) -> Self {
        Self {
            projection_name: projection_name.into(),
            path,
        }
    }

    /// A key relative to the enclosing value.
    pub fn unbound(path: FieldPath) -> Self {
        Self::new(String::new(), path)
    }

    pub fn is_unbound(&self) -> bool {
        self.projection_name.is_empty()
    }
}

impl fmt::Display for PartialSchemaKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.projection_name.is_empty() {
            write!(f, "<{}>", self.path)
        } else {
            write!(f, "{}: {}", self.projection_name, self.path)
        }
    }
}

/// The constraint attached to a key plus an optional output binding.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartialSchemaRequirement {
    bound_projection_name: Option<ProjectionName>,
    intervals: IntervalReqExpr,
}

impl PartialSchemaRequirement {
    pub fn new(bound_projection_name: Option<ProjectionName>, intervals: IntervalReqExpr) -> Self {
        Self {
            bound_projection_name,
            intervals,
        }
    }

    pub fn unbound(intervals: IntervalReqExpr) -> Self {
        Self::new(None, intervals)
    }

    /// No constraint, no binding.
    pub fn fully_open() -> Self {
        Self::new(None, IntervalReqExpr::fully_open_dnf())
    }

    pub fn bound_projection_name(&self) -> Option<&ProjectionName> {
        self.bound_projection_name.as_ref()
    }

    pub fn has_bound_projection_name(&self) -> bool {
        self.bound_projection_name.is_some()
    }

    pub fn set_bound_projection_name(&mut self, name: Option<ProjectionName>) {
        self.bound_projection_name = name;
    }

    pub fn intervals(&self) -> &IntervalReqExpr {
        &self.intervals
    }

    pub fn set_intervals(&mut self, intervals: IntervalReqExpr) {
        self.intervals = intervals;
    }

    /// Whether the interval admits every value (the requirement only serves its binding).
    pub fn is_fully_open(&self) -> bool {
        self.intervals.is_fully_open()
    }
}

impl fmt::Display for PartialSchemaRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(name) = &self.bound_projection_name {
            write!(f, "{} <- ", name)?;
        }
        write!(f, "{}", self.intervals)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialSchemaRequirements {
    entries: Vec<(PartialSchemaKey, PartialSchemaRequirement)>,
}

impl PartialSchemaRequirements {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn singleton(key: PartialSchemaKey, req: PartialSchemaRequirement) -> Self {
        let mut reqs = Self::new();
        reqs.insert(key, req);
        reqs
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert after any entries with an equal key.
    pub fn insert(&mut self, key: PartialSchemaKey, req: PartialSchemaRequirement) {
        let pos = self.entries.partition_point(|(k, _)| k <= &key);
        self.entries.insert(pos, (key, req));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PartialSchemaKey, &PartialSchemaRequirement)> {
        self.entries.iter().map(|(k, r)| (k, r))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&PartialSchemaKey, &mut PartialSchemaRequirement)> {
        self.entries.iter_mut().map(|(k, r)| (&*k, r))
    }

    pub fn entries(&self) -> &[(PartialSchemaKey, PartialSchemaRequirement)] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<(PartialSchemaKey, PartialSchemaRequirement)> {
        self.entries
    }

    /// Index range of entries with key equal to `key`.
    pub fn equal_range(&self, key: &PartialSchemaKey) -> Range<usize> {
        let start = self.entries.partition_point(|(k, _)| k < key);
        let end = self.entries.partition_point(|(k, _)| k <= key);
        start..end
    }

    pub fn count(&self, key: &PartialSchemaKey) -> usize {
        self.equal_range(key).len()
    }

    /// The single requirement for `key`, if there is exactly one.
    pub fn find_unique(&self, key: &PartialSchemaKey) -> Option<&PartialSchemaRequirement> {
        let range = self.equal_range(key);
        if range.len() == 1 {
            Some(&self.entries[range.start].1)
        } else {
            None
        }
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut PartialSchemaRequirement> {
        self.entries.get_mut(index).map(|(_, r)| r)
    }

    pub fn remove(&mut self, index: usize) -> (PartialSchemaKey, PartialSchemaRequirement) {
        self.entries.remove(index)
    }

    /// The entry whose requirement exposes `projection` as its output binding.
    pub fn find_by_binding(&self, projection: &str) -> Option<(&PartialSchemaKey, &PartialSchemaRequirement)> {
        self.iter()
            .find(|(_, r)| r.bound_projection_name().map(|n| n.as_str()) == Some(projection))
    }

    /// Whether any requirement has been reduced to the empty interval.
    pub fn is_unsatisfiable(&self) -> bool {
        self.entries.iter().any(|(_, r)| r.intervals().is_empty())
    }

    /// A set of only vacuous or binding-only requirements needs no filtering.
    pub fn is_fully_open(&self) -> bool {
        self.entries.iter().all(|(_, r)| r.is_fully_open())
    }
}

impl FromIterator<(PartialSchemaKey, PartialSchemaRequirement)> for PartialSchemaRequirements {
    fn from_iter<I: IntoIterator<Item = (PartialSchemaKey, PartialSchemaRequirement)>>(iter: I) -> Self {
        let mut reqs = Self::new();
        for (k, r) in iter {
            reqs.insert(k, r);
        }
        reqs
    }
}

impl fmt::Display for PartialSchemaRequirements {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (k, r)) in self.entries.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{{{} => {}}}", k, r)?;
        }
        Ok(())
    }
}

/// Projection renames produced when two requirements with different output bindings are
/// merged: `new name -> existing name`. Downstream stages materialize them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectionRenames {
    renames: BTreeMap<ProjectionName, ProjectionName>,
}

impl ProjectionRenames {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.renames.is_empty()
    }

    pub fn len(&self) -> usize {
        self.renames.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ProjectionName, &ProjectionName)> {
        self.renames.iter()
    }

    pub fn get(&self, name: &str) -> Option<&ProjectionName> {
        self.renames.get(name)
    }

    /// Record `new_name` as an alias of `existing`. A chain of renames that loops
    /// back onto `new_name` is a contract violation.
    pub fn record(&mut self, new_name: ProjectionName, existing: ProjectionName) {
        if new_name == existing {
            return;
        }
        let mut cursor = existing.as_str();
        let mut steps = 0;
        while let Some(next) = self.renames.get(cursor) {
            if next == &new_name || steps > self.renames.len() {
                violation(ContractViolation::CyclicRename(new_name));
            }
            cursor = next;
            steps += 1;
        }
        self.renames.insert(new_name, existing);
    }

    /// Follow the rename chain to its final target.
    pub fn resolve<'a>(&'a self, name: &'a str) -> &'a str {
        let mut cursor = name;
        while let Some(next) = self.renames.get(cursor) {
            cursor = next;
        }
        cursor
    }
}

/// A requirement that could not be encoded in an index bound and must be applied as a
/// filter after the scan, together with the estimated cardinality of the original
/// requirement it was derived from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResidualRequirement {
    pub key: PartialSchemaKey,
    pub req: PartialSchemaRequirement,
    pub ce: f64,
}

impl ResidualRequirement {
    pub fn new(key: PartialSchemaKey, req: PartialSchemaRequirement, ce: f64) -> Self {
        Self { key, req, ce }
    }
}
