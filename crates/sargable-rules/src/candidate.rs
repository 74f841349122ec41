//! # Index Candidate Matching
//!
//! For one scan and its simplified requirement set, decides which indexes can serve
//! the requirements and how. Each index yields at most one [`CandidateIndexEntry`].
//!
//! ## Matching Algorithm
//!
//! The index fields are walked in collation order. At each field:
//!
//! - **Exact match**: one requirement sits on exactly the field's path. While the
//!   fields seen so far form an equality prefix, its interval is appended to the
//!   compound bound and the field counts towards the *interval prefix*. After a range
//!   field the index cannot narrow further, so the field is scanned fully open and the
//!   requirement becomes a residual over the index key.
//! - **Fusion**: a requirement on a longer path (`a.b` against index field `a`) is
//!   evaluated over the index key: the field is scanned open, the key is exposed as a
//!   temporary projection and the remaining path becomes a residual over it.
//! - **No match**: the field is scanned fully open and the prefix is broken; later
//!   fields can still be fused but never narrow the bound.
//!
//! Only indexes with at least one exact match become candidates. Requirements that no
//! field touches become residuals over the scan projection, which requires fetching the
//! document (a `Seek`).
//!
//! ## Null Safety
//!
//! Index keys conflate a null value and a missing field. Unless the storage layer can
//! tell them apart (`fast_null_handling`), an output binding whose interval may admit
//! null could observe a wrong value, so such requirement sets get no index candidates.

use sargable_core::catalog::{CollationOp, ScanDefinition};
use sargable_core::error::{violation, ContractViolation};
use sargable_core::ids::IdGenerator;
use sargable_core::interval::{combine_compound_intervals, CompoundIntervalReqExpr, IntervalReqExpr};
use sargable_core::path::FieldPath;
use sargable_core::plan::FieldProjectionMap;
use sargable_core::properties::ProjectionSet;
use sargable_core::requirements::{
    PartialSchemaKey, PartialSchemaRequirement, PartialSchemaRequirements, ProjectionName,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Field name prefix of compound index keys in a scan's field projection map.
pub const INDEX_KEY_PREFIX: &str = "<indexKey>";

/// Name under which index key `field_index` is exposed in a field projection map.
pub fn encode_index_key_name(field_index: usize) -> String {
    format!("{} {}", INDEX_KEY_PREFIX, field_index)
}

/// Inverse of [`encode_index_key_name`]. Malformed names are a contract violation.
pub fn decode_index_key_name(name: &str) -> usize {
    name.strip_prefix(INDEX_KEY_PREFIX)
        .and_then(|rest| rest.strip_prefix(' '))
        .and_then(|digits| digits.parse().ok())
        .unwrap_or_else(|| violation(ContractViolation::InvalidIndexKeyName(name.to_string())))
}

/// How one index can serve a requirement set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateIndexEntry {
    /// Index keys exposed by the scan, under encoded field names.
    pub field_projection_map: FieldProjectionMap,
    /// The compound bound: one interval per index field.
    pub intervals: CompoundIntervalReqExpr,
    /// Requirements to apply after the scan.
    pub residual_requirements: PartialSchemaRequirements,
    /// Projections introduced only to evaluate residuals.
    pub residual_temp_projections: ProjectionSet,
    /// Residual key to the original requirement key it was derived from.
    #[serde(with = "key_pairs")]
    pub residual_key_map: BTreeMap<PartialSchemaKey, PartialSchemaKey>,
    /// Original keys fully answered by the compound bound.
    pub satisfied_keys: BTreeSet<PartialSchemaKey>,
    /// Index fields whose bound is not a single equality: output order over them
    /// depends on the scan direction.
    pub fields_to_collate: BTreeSet<usize>,
    /// Number of leading index fields that narrow the scan.
    pub interval_prefix_size: usize,
}

impl CandidateIndexEntry {
    fn new() -> Self {
        Self {
            field_projection_map: FieldProjectionMap::new(),
            intervals: CompoundIntervalReqExpr::unit(),
            residual_requirements: PartialSchemaRequirements::new(),
            residual_temp_projections: ProjectionSet::new(),
            residual_key_map: BTreeMap::new(),
            satisfied_keys: BTreeSet::new(),
            fields_to_collate: BTreeSet::new(),
            interval_prefix_size: 0,
        }
    }

    /// Whether some residual reads the document itself rather than an index key.
    pub fn needs_fetch(&self, scan_projection: &str) -> bool {
        self.residual_requirements
            .iter()
            .any(|(key, _)| key.projection_name == scan_projection)
    }

    fn add_residual(&mut self, residual_key: PartialSchemaKey, req: PartialSchemaRequirement, original: &PartialSchemaKey) {
        self.residual_key_map
            .entry(residual_key.clone())
            .or_insert_with(|| original.clone());
        self.residual_requirements.insert(residual_key, req);
    }

    fn expose_index_key(&mut self, field_index: usize, projection: &str) {
        if !self.field_projection_map.insert_field(encode_index_key_name(field_index), projection) {
            violation(ContractViolation::DuplicateFieldProjection {
                field: encode_index_key_name(field_index),
                projection: projection.to_string(),
            });
        }
    }

    fn scan_open(&mut self, reverse: bool) {
        if !combine_compound_intervals(&mut self.intervals, &IntervalReqExpr::fully_open_dnf(), reverse) {
            violation(ContractViolation::OpenIntervalCombine);
        }
    }
}

/// Struct-keyed maps as a sequence of pairs, so they survive formats with string keys.
mod key_pairs {
    use sargable_core::requirements::PartialSchemaKey;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::collections::BTreeMap;

    pub fn serialize<S: Serializer>(
        map: &BTreeMap<PartialSchemaKey, PartialSchemaKey>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(map.iter())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<PartialSchemaKey, PartialSchemaKey>, D::Error> {
        Ok(Vec::<(PartialSchemaKey, PartialSchemaKey)>::deserialize(deserializer)?
            .into_iter()
            .collect())
    }
}

/// Candidate entries keyed by index name.
pub type CandidateIndexMap = BTreeMap<String, CandidateIndexEntry>;

/// Whether an output-bound requirement could observe a null that the index cannot
/// distinguish from a missing field.
fn has_unsafe_null_binding(reqs: &PartialSchemaRequirements) -> bool {
    reqs.iter()
        .any(|(_, req)| req.has_bound_projection_name() && req.intervals().may_contain_null())
}

/// Match `reqs` (on `scan_projection`) against every index of `scan_def`.
pub fn compute_candidate_index_map(
    ids: &mut IdGenerator,
    scan_projection: &str,
    reqs: &PartialSchemaRequirements,
    scan_def: &ScanDefinition,
    fast_null_handling: bool,
) -> CandidateIndexMap {
    let mut result = CandidateIndexMap::new();
    if !fast_null_handling && has_unsafe_null_binding(reqs) {
        debug!("Skipping index matching: an output binding may observe null");
        return result;
    }

    let all_keys: BTreeSet<PartialSchemaKey> = reqs.iter().map(|(k, _)| k.clone()).collect();

    for (index_name, index_def) in &scan_def.indexes {
        let mut entry = CandidateIndexEntry::new();
        let mut unsatisfied = all_keys.clone();
        let mut is_prefix = true;
        let mut has_exact_match = false;

        for (field_index, collation) in index_def.collation_spec.iter().enumerate() {
            let reverse = collation.op == CollationOp::Descending;
            let index_key = PartialSchemaKey::new(scan_projection, collation.path.clone());

            let exact = if is_prefix { reqs.find_unique(&index_key) } else { None };
            if let Some(req) = exact {
                has_exact_match = true;
                unsatisfied.remove(&index_key);
                match_exact(ids, &mut entry, field_index, reverse, &index_key, req);
                continue;
            }

            let fused = unsatisfied.iter().find_map(|query_key| {
                if query_key.projection_name != scan_projection {
                    return None;
                }
                // Separate requirements under a traversal may hold on different
                // elements; one index key row cannot check them together.
                if query_key.path.contains_traverse() && reqs.count(query_key) > 1 {
                    return None;
                }
                fuse_index_path(&query_key.path, &collation.path).map(|suffix| (query_key.clone(), suffix))
            });
            match fused {
                Some((query_key, suffix)) => {
                    unsatisfied.remove(&query_key);
                    let temp = ids.next_name("evalTemp");
                    let residual_key = PartialSchemaKey::new(temp.clone(), suffix);
                    for index in reqs.equal_range(&query_key) {
                        let (_, req) = &reqs.entries()[index];
                        entry.add_residual(residual_key.clone(), req.clone(), &query_key);
                    }
                    entry.residual_temp_projections.insert(temp.clone());
                    entry.expose_index_key(field_index, &temp);
                    entry.scan_open(reverse);
                }
                None => {
                    is_prefix = false;
                    entry.scan_open(reverse);
                }
            }
        }

        if !has_exact_match {
            debug!("Index {} has no exact match for the requirements", index_name);
            continue;
        }

        for query_key in &unsatisfied {
            for index in reqs.equal_range(query_key) {
                let (_, req) = &reqs.entries()[index];
                entry.add_residual(query_key.clone(), req.clone(), query_key);
            }
        }

        debug!(
            "Index {} is a candidate: prefix={}, residuals={}",
            index_name,
            entry.interval_prefix_size,
            entry.residual_requirements.len()
        );
        result.insert(index_name.clone(), entry);
    }

    result
}

fn match_exact(
    ids: &mut IdGenerator,
    entry: &mut CandidateIndexEntry,
    field_index: usize,
    reverse: bool,
    index_key: &PartialSchemaKey,
    req: &PartialSchemaRequirement,
) {
    // A binding another index field already exposes is served from a fresh temporary.
    let exposed: Option<ProjectionName> = req.bound_projection_name().map(|bound| {
        let taken = entry.field_projection_map.field_projections.values().any(|p| p == bound);
        if taken {
            ids.next_name("evalTemp")
        } else {
            bound.clone()
        }
    });

    let required = req.intervals();
    if required.is_fully_open() {
        entry.scan_open(reverse);
    } else if combine_compound_intervals(&mut entry.intervals, required, reverse) {
        entry.interval_prefix_size += 1;
        entry.satisfied_keys.insert(index_key.clone());
    } else {
        entry.scan_open(reverse);
        match &exposed {
            Some(projection) => {
                let residual_key = PartialSchemaKey::new(projection.clone(), FieldPath::identity());
                entry.add_residual(residual_key, PartialSchemaRequirement::unbound(required.clone()), index_key);
                entry.residual_temp_projections.insert(projection.clone());
            }
            None => {
                let temp = ids.next_name("evalTemp");
                let residual_key = PartialSchemaKey::new(temp.clone(), FieldPath::identity());
                entry.add_residual(residual_key, req.clone(), index_key);
                entry.residual_temp_projections.insert(temp.clone());
                entry.expose_index_key(field_index, &temp);
            }
        }
    }

    if let Some(projection) = &exposed {
        entry.expose_index_key(field_index, projection);
    }

    if required.singular_equality().is_none() {
        entry.fields_to_collate.insert(field_index);
    }
}

/// Remaining path of a requirement evaluated over an index key: `Some(suffix)` when
/// `index_path` is a prefix of (or equal to) `query_path`.
///
/// Any step-wise prefix qualifies, traversals included: `a.[].b` fuses over an index
/// on `a.[]` with suffix `b`.
pub fn fuse_index_path(query_path: &FieldPath, index_path: &FieldPath) -> Option<FieldPath> {
    query_path.strip_prefix(index_path)
}
