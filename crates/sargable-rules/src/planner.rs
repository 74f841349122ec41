//! # Sargable Planner
//!
//! Runs the sargable stages for one scan and returns every access path that can
//! answer a filter, each as a physical plan fragment with per-node cardinality
//! estimates. Picking among them is left to the cost-based enumerator that calls this.
//!
//! ## Flow
//!
//! 1. **Split**: the filter is split into conjuncts (`And` operands and the operands of
//!    a top-level `ComposeM` filter path).
//! 2. **Convert**: each conjunct is converted to a requirement set. Conjuncts that do
//!    not convert, or that the conversion over-approximates (`retain_predicate`), are
//!    kept as residual filters over the fetched document.
//! 3. **Intersect and simplify**: the requirement sets are intersected and their paths
//!    simplified against the scan's multikey metadata. An empty result means no
//!    document can match and the plan is `AlwaysFalse`.
//! 4. **Match**: index candidates are computed for the simplified set.
//! 5. **Lower**: the full scan, every index candidate, and every pair of candidates
//!    (through each applicable RID intersection strategy) are lowered to plans.
//!
//! Every alternative delivers the rid of the matching documents under
//! [`PlanAlternative::rid_projection`], each rid at most once. A single index scan over a
//! multikey path can meet one document through several keys, so it is followed by a
//! `GroupBy` on the rid. Disjunctions and conjunctions of scans already group by rid.

use crate::builder::convert_expr_to_partial_schema_req;
use crate::candidate::{compute_candidate_index_map, CandidateIndexEntry};
use crate::lower_intervals::{lower_intervals, IntervalLowering};
use crate::residual::{apply_projection_renames, lower_partial_schema_requirements};
use crate::rid_intersect::{
    default_rid_intersect_strategies, rid_ascending, RidIntersectContext, RidIntersectInput, RidIntersectStrategy,
};
use crate::scan_params::compute_physical_scan_params;
use crate::simplify::{intersect_partial_schema_req, simplify_partial_schema_req_paths};
use sargable_core::catalog::{Catalog, IndexDefinition, ScanDefinition};
use sargable_core::config::PlannerConfig;
use sargable_core::error::PlanningError;
use sargable_core::expr::{Expr, Operation};
use sargable_core::ids::IdGenerator;
use sargable_core::interval::IntervalReqExpr;
use sargable_core::plan::{FieldProjectionMap, NodeCeMap, PhysicalOp, PhysicalOpKind, PlanNode};
use sargable_core::properties::{PhysProps, ProjectionSet};
use sargable_core::requirements::{
    PartialSchemaKey, PartialSchemaRequirement, PartialSchemaRequirements, ProjectionName, ProjectionRenames,
    ResidualRequirement,
};
use sargable_core::stats::{conj_exponential_backoff, CardinalityEstimator, DEFAULT_FILTER_SELECTIVITY};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

/// The access path an alternative reads the collection through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessPath {
    FullScan,
    Index {
        index_name: String,
    },
    RidIntersect {
        left_index: String,
        right_index: String,
        strategy: String,
    },
}

impl fmt::Display for AccessPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessPath::FullScan => write!(f, "FullScan"),
            AccessPath::Index { index_name } => write!(f, "Index({})", index_name),
            AccessPath::RidIntersect {
                left_index,
                right_index,
                strategy,
            } => write!(f, "{}({}, {})", strategy, left_index, right_index),
        }
    }
}

/// One lowered way of answering the filter.
#[derive(Debug, Clone)]
pub struct PlanAlternative {
    pub access_path: AccessPath,
    pub root: PlanNode,
    pub ce_map: NodeCeMap,
    /// Projection holding the rid of each matching document.
    pub rid_projection: ProjectionName,
    /// The index candidate behind an `Index` alternative.
    pub candidate: Option<CandidateIndexEntry>,
}

impl PlanAlternative {
    /// Estimated rows produced by the alternative.
    pub fn root_ce(&self) -> f64 {
        self.ce_map.get(self.root.id).unwrap_or(0.0)
    }
}

/// Result of planning a filter over one scan.
#[derive(Debug, Clone)]
pub enum SargablePlan {
    /// The requirements contradict each other; no document matches.
    AlwaysFalse,
    Alternatives(Vec<PlanAlternative>),
}

impl SargablePlan {
    pub fn is_always_false(&self) -> bool {
        matches!(self, SargablePlan::AlwaysFalse)
    }

    /// The alternatives, empty for `AlwaysFalse`.
    pub fn alternatives(&self) -> &[PlanAlternative] {
        match self {
            SargablePlan::AlwaysFalse => &[],
            SargablePlan::Alternatives(alternatives) => alternatives,
        }
    }
}

/// The requirements of one filter, ready for lowering.
struct PreparedScan<'a> {
    scan_def_name: &'a str,
    scan_projection: &'a str,
    scan_def: ScanDefinition,
    reqs: PartialSchemaRequirements,
    renames: ProjectionRenames,
    residual_filters: Vec<Expr>,
    /// Estimate of each entry of `reqs`, in entry order.
    entry_ces: Vec<f64>,
    scan_ce: f64,
}

impl PreparedScan<'_> {
    fn key_ces(&self, key: &PartialSchemaKey) -> Vec<f64> {
        self.reqs
            .equal_range(key)
            .filter_map(|index| self.entry_ces.get(index).copied())
            .collect()
    }

    /// Combined selectivity of the requirements on `keys`.
    fn selectivity<'k>(&self, keys: impl Iterator<Item = &'k PartialSchemaKey>) -> f64 {
        if self.scan_ce <= 0.0 {
            return 0.0;
        }
        let selectivities: Vec<f64> = keys
            .flat_map(|key| self.key_ces(key))
            .map(|ce| ce / self.scan_ce)
            .collect();
        conj_exponential_backoff(&selectivities)
    }

    fn requirement_ce(&self, key: &PartialSchemaKey) -> f64 {
        self.key_ces(key).into_iter().fold(self.scan_ce, f64::min)
    }

    fn bound_projections(&self) -> ProjectionSet {
        self.reqs
            .iter()
            .filter_map(|(_, req)| req.bound_projection_name().cloned())
            .collect()
    }

    /// Whether anything above the access path reads the document itself.
    fn needs_root(&self) -> bool {
        !self.residual_filters.is_empty()
    }
}

/// Plans sargable filters over the scans of a catalog.
pub struct SargablePlanner {
    catalog: Arc<dyn Catalog>,
    estimator: Arc<dyn CardinalityEstimator>,
    config: PlannerConfig,
    rid_strategies: Vec<Box<dyn RidIntersectStrategy>>,
}

impl SargablePlanner {
    pub fn new(
        catalog: Arc<dyn Catalog>,
        estimator: Arc<dyn CardinalityEstimator>,
        config: PlannerConfig,
    ) -> Result<Self, PlanningError> {
        config.validate()?;
        Ok(Self {
            catalog,
            estimator,
            config,
            rid_strategies: default_rid_intersect_strategies(),
        })
    }

    /// Replace the RID intersection strategies tried for pairs of index candidates.
    pub fn with_rid_intersect_strategies(mut self, strategies: Vec<Box<dyn RidIntersectStrategy>>) -> Self {
        self.rid_strategies = strategies;
        self
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    /// Plan `filter` over the scan `scan_def_name`, whose documents are bound to
    /// `scan_projection`.
    pub fn plan_filter(
        &self,
        ids: &mut IdGenerator,
        scan_def_name: &str,
        scan_projection: &str,
        filter: &Expr,
    ) -> Result<SargablePlan, PlanningError> {
        let scan_def = self
            .catalog
            .get_scan_definition(scan_def_name)
            .ok_or_else(|| PlanningError::UnknownScanDefinition(scan_def_name.to_string()))?;
        scan_def.validate();

        let Some(prepared) = self.prepare(scan_def_name, scan_projection, scan_def, filter) else {
            debug!("Filter over {} is unsatisfiable", scan_def_name);
            return Ok(SargablePlan::AlwaysFalse);
        };
        debug!(
            "Planning {}: {} requirements, {} residual filters, scan_ce={:.1}",
            scan_def_name,
            prepared.reqs.len(),
            prepared.residual_filters.len(),
            prepared.scan_ce
        );

        let mut alternatives = Vec::new();
        if !self.config.disable_scan {
            alternatives.push(self.lower_full_scan(ids, &prepared));
        }
        if !self.config.disable_indexes && !prepared.reqs.is_empty() {
            let candidates: Vec<(String, CandidateIndexEntry)> = compute_candidate_index_map(
                ids,
                scan_projection,
                &prepared.reqs,
                &prepared.scan_def,
                self.config.fast_null_handling,
            )
            .into_iter()
            .take(self.config.max_index_candidates)
            .collect();

            for (index_name, candidate) in &candidates {
                alternatives.push(self.lower_index(ids, &prepared, index_name, candidate));
            }
            for (i, (left_name, left)) in candidates.iter().enumerate() {
                for (right_name, right) in &candidates[i + 1..] {
                    if left.interval_prefix_size == 0 || right.interval_prefix_size == 0 {
                        continue;
                    }
                    alternatives.extend(self.lower_rid_intersections(
                        ids,
                        &prepared,
                        (left_name.as_str(), left),
                        (right_name.as_str(), right),
                    ));
                }
            }
        }

        debug!("Produced {} alternatives for {}", alternatives.len(), scan_def_name);
        Ok(SargablePlan::Alternatives(alternatives))
    }

    /// Split, convert, intersect and simplify. `None` when unsatisfiable.
    fn prepare<'a>(
        &self,
        scan_def_name: &'a str,
        scan_projection: &'a str,
        scan_def: ScanDefinition,
        filter: &Expr,
    ) -> Option<PreparedScan<'a>> {
        let mut reqs = PartialSchemaRequirements::new();
        let mut renames = ProjectionRenames::new();
        let mut residual_filters = Vec::new();

        for conjunct in split_conjuncts(filter) {
            let conversion = convert_expr_to_partial_schema_req(&conjunct, true)
                .filter(|c| c.reqs.iter().all(|(key, _)| key.projection_name == scan_projection));
            let Some(conversion) = conversion else {
                trace!("Conjunct {} is not sargable", conjunct);
                residual_filters.push(conjunct);
                continue;
            };

            let mut merged = reqs.clone();
            let mut merged_renames = renames.clone();
            if !intersect_partial_schema_req(&mut merged, &conversion.reqs, &mut merged_renames) {
                trace!("Conjunct {} does not intersect with {}", conjunct, reqs);
                residual_filters.push(conjunct);
                continue;
            }
            trace!("Conjunct {} converted to {}", conjunct, conversion.reqs);
            reqs = merged;
            renames = merged_renames;
            if conversion.retain_predicate {
                residual_filters.push(conjunct);
            }
        }

        if reqs.is_unsatisfiable() {
            return None;
        }
        let simplified = simplify_partial_schema_req_paths(scan_projection, &scan_def.non_multikey_paths, reqs)?;
        let reqs: PartialSchemaRequirements = simplified
            .into_entries()
            .into_iter()
            .filter(|(_, req)| req.has_bound_projection_name() || !req.is_fully_open())
            .collect();

        let scan_ce = self.estimator.scan_cardinality(scan_def_name);
        let entry_ces = reqs
            .iter()
            .map(|(key, req)| self.estimator.requirement_cardinality(scan_def_name, key, req))
            .collect();

        Some(PreparedScan {
            scan_def_name,
            scan_projection,
            scan_def,
            reqs,
            renames,
            residual_filters,
            entry_ces,
            scan_ce,
        })
    }

    fn lower_full_scan(&self, ids: &mut IdGenerator, prepared: &PreparedScan<'_>) -> PlanAlternative {
        let mut ce_map = NodeCeMap::new();
        let rid = ids.next_name("rid");
        let params = compute_physical_scan_params(ids, &prepared.reqs, &prepared.entry_ces, &prepared.bound_projections());

        let mut fpm = params.field_projection_map;
        fpm.rid_projection = Some(rid.clone());
        if params.requires_root_projection || prepared.needs_root() {
            fpm.root_projection = Some(prepared.scan_projection.to_string());
        }
        let scan = PlanNode::leaf(
            ids,
            PhysicalOp::PhysicalScan {
                field_projection_map: fpm,
                scan_def_name: prepared.scan_def_name.to_string(),
            },
        );
        ce_map.insert(scan.id, prepared.scan_ce);

        let node = lower_partial_schema_requirements(
            ids,
            prepared.scan_ce,
            prepared.scan_ce,
            params.residual_requirements,
            scan,
            &mut ce_map,
        );
        let ce = prepared.scan_ce * prepared.selectivity(prepared.reqs.iter().map(|(key, _)| key));
        let node = apply_projection_renames(ids, &params.projection_renames, node, ce, &mut ce_map);
        let root = self.finish(ids, prepared, node, ce, &mut ce_map);

        PlanAlternative {
            access_path: AccessPath::FullScan,
            root,
            ce_map,
            rid_projection: rid,
            candidate: None,
        }
    }

    fn lower_index(
        &self,
        ids: &mut IdGenerator,
        prepared: &PreparedScan<'_>,
        index_name: &str,
        candidate: &CandidateIndexEntry,
    ) -> PlanAlternative {
        let mut ce_map = NodeCeMap::new();
        let rid = ids.next_name("rid");
        let index_ce = prepared.scan_ce * prepared.selectivity(candidate.satisfied_keys.iter());

        let index_def = &prepared.scan_def.indexes[index_name];
        let lowering = IntervalLowering {
            scan_def_name: prepared.scan_def_name,
            index_def_name: index_name,
            index_def,
            rid_projection: &rid,
            reverse_order: false,
            index_ce,
            scan_ce: prepared.scan_ce,
        };
        let mut fpm = candidate.field_projection_map.clone();
        fpm.rid_projection = Some(rid.clone());
        let mut node = lower_intervals(ids, &lowering, &fpm, &candidate.intervals, &mut ce_map);
        // Residuals over exposed keys must see every key of the document, so the scan
        // is grouped by rid above them.
        let dedup = is_multikey_index(&prepared.scan_def, index_def) && node.kind() == PhysicalOpKind::IndexScan;

        let fetched = candidate.needs_fetch(prepared.scan_projection) || prepared.needs_root();
        if fetched {
            node = self.seek(ids, prepared, &rid, node, index_ce, &mut ce_map);
        }

        let residuals = candidate
            .residual_requirements
            .iter()
            .map(|(key, req)| {
                let original = candidate.residual_key_map.get(key).unwrap_or(key);
                ResidualRequirement::new(key.clone(), req.clone(), prepared.requirement_ce(original))
            })
            .collect();
        let mut node = lower_partial_schema_requirements(ids, index_ce, prepared.scan_ce, residuals, node, &mut ce_map);

        let ce = prepared.scan_ce * prepared.selectivity(prepared.reqs.iter().map(|(key, _)| key));
        if dedup {
            let mut carried: ProjectionSet = fpm.field_projections.values().cloned().collect();
            if fetched {
                carried.insert(prepared.scan_projection);
            }
            for projection in prepared.bound_projections().iter() {
                carried.insert(projection.clone());
            }
            node = group_by_rid(ids, &rid, carried.to_vec(), node, ce, &mut ce_map);
        }
        let root = self.finish(ids, prepared, node, ce, &mut ce_map);
        debug!("Lowered index {} (prefix={}, ce={:.1})", index_name, candidate.interval_prefix_size, index_ce);

        PlanAlternative {
            access_path: AccessPath::Index {
                index_name: index_name.to_string(),
            },
            root,
            ce_map,
            rid_projection: rid,
            candidate: Some(candidate.clone()),
        }
    }

    /// Intersect the rids of two candidates through every applicable strategy.
    ///
    /// Each side scans its compound bound for the rid alone; the requirements neither
    /// bound answers are applied after fetching the document.
    fn lower_rid_intersections(
        &self,
        ids: &mut IdGenerator,
        prepared: &PreparedScan<'_>,
        (left_name, left): (&str, &CandidateIndexEntry),
        (right_name, right): (&str, &CandidateIndexEntry),
    ) -> Vec<PlanAlternative> {
        let satisfied: BTreeSet<&PartialSchemaKey> = left.satisfied_keys.union(&right.satisfied_keys).collect();
        let intersect_ce = prepared.scan_ce * prepared.selectivity(satisfied.iter().copied());

        let mut residuals = Vec::new();
        for (key, req) in prepared.reqs.iter() {
            let ce = prepared.requirement_ce(key);
            if !satisfied.contains(key) {
                residuals.push(ResidualRequirement::new(key.clone(), req.clone(), ce));
            } else if let Some(bound) = req.bound_projection_name() {
                let binding_only = PartialSchemaRequirement::new(Some(bound.clone()), IntervalReqExpr::fully_open_dnf());
                residuals.push(ResidualRequirement::new(key.clone(), binding_only, ce));
            }
        }

        let mut alternatives = Vec::new();
        for strategy in &self.rid_strategies {
            let mut ce_map = NodeCeMap::new();
            let rid = ids.next_name("rid");
            let left_input = self.rid_only_input(ids, prepared, &rid, left_name, left, &mut ce_map);
            let right_input = self.rid_only_input(ids, prepared, &rid, right_name, right, &mut ce_map);
            let ctx = RidIntersectContext {
                rid_projection: &rid,
                ce: intersect_ce,
            };
            if !strategy.is_applicable(&ctx, &left_input.props, &right_input.props) {
                trace!("{} is not applicable to {} and {}", strategy.name(), left_name, right_name);
                continue;
            }

            let node = strategy.implement(ids, &ctx, left_input, right_input, &mut ce_map);
            let node = self.seek(ids, prepared, &rid, node, intersect_ce, &mut ce_map);
            let node =
                lower_partial_schema_requirements(ids, intersect_ce, prepared.scan_ce, residuals.clone(), node, &mut ce_map);
            let ce = prepared.scan_ce * prepared.selectivity(prepared.reqs.iter().map(|(key, _)| key));
            let root = self.finish(ids, prepared, node, ce, &mut ce_map);
            debug!(
                "Lowered {} over {} and {} (ce={:.1})",
                strategy.name(),
                left_name,
                right_name,
                intersect_ce
            );

            alternatives.push(PlanAlternative {
                access_path: AccessPath::RidIntersect {
                    left_index: left_name.to_string(),
                    right_index: right_name.to_string(),
                    strategy: strategy.name().to_string(),
                },
                root,
                ce_map,
                rid_projection: rid,
                candidate: None,
            });
        }
        alternatives
    }

    /// Scan a candidate's bound for the rid only. A single equality bound over a
    /// non-multikey index delivers rids in ascending order.
    fn rid_only_input(
        &self,
        ids: &mut IdGenerator,
        prepared: &PreparedScan<'_>,
        rid: &str,
        index_name: &str,
        candidate: &CandidateIndexEntry,
        ce_map: &mut NodeCeMap,
    ) -> RidIntersectInput {
        let ce = prepared.scan_ce * prepared.selectivity(candidate.satisfied_keys.iter());
        let index_def = &prepared.scan_def.indexes[index_name];
        let lowering = IntervalLowering {
            scan_def_name: prepared.scan_def_name,
            index_def_name: index_name,
            index_def,
            rid_projection: rid,
            reverse_order: false,
            index_ce: ce,
            scan_ce: prepared.scan_ce,
        };
        let mut fpm = FieldProjectionMap::new();
        fpm.rid_projection = Some(rid.to_string());
        let mut node = lower_intervals(ids, &lowering, &fpm, &candidate.intervals, ce_map);
        let multikey = is_multikey_index(&prepared.scan_def, index_def);
        if multikey && node.kind() == PhysicalOpKind::IndexScan {
            node = group_by_rid(ids, rid, Vec::new(), node, ce, ce_map);
        }

        let projections: ProjectionSet = [rid].into_iter().collect();
        let mut props = PhysProps::with_projections(projections);
        if !multikey && candidate.intervals.singular_atom().is_some_and(|atom| atom.is_equality()) {
            props.collation = rid_ascending(rid).collation;
        }
        RidIntersectInput { node, props, ce }
    }

    fn seek(
        &self,
        ids: &mut IdGenerator,
        prepared: &PreparedScan<'_>,
        rid: &str,
        child: PlanNode,
        ce: f64,
        ce_map: &mut NodeCeMap,
    ) -> PlanNode {
        let mut fpm = FieldProjectionMap::new();
        fpm.root_projection = Some(prepared.scan_projection.to_string());
        let node = PlanNode::new(
            ids,
            PhysicalOp::Seek {
                rid_projection: rid.to_string(),
                field_projection_map: fpm,
                scan_def_name: prepared.scan_def_name.to_string(),
            },
            vec![child],
        );
        ce_map.insert(node.id, ce);
        node
    }

    /// Apply the query-level renames and the residual filters on top of an access path.
    fn finish(
        &self,
        ids: &mut IdGenerator,
        prepared: &PreparedScan<'_>,
        node: PlanNode,
        ce: f64,
        ce_map: &mut NodeCeMap,
    ) -> PlanNode {
        let mut node = apply_projection_renames(ids, &prepared.renames, node, ce, ce_map);
        let mut ce = ce;
        for filter in &prepared.residual_filters {
            ce *= DEFAULT_FILTER_SELECTIVITY;
            node = PlanNode::filter(ids, filter.clone(), node);
            ce_map.insert(node.id, ce);
        }
        node
    }
}

/// Whether some key of the index reads a path that may hold several values per document.
fn is_multikey_index(scan_def: &ScanDefinition, index_def: &IndexDefinition) -> bool {
    index_def.collation_spec.iter().any(|entry| {
        entry.path.contains_traverse()
            && !entry
                .path
                .without_trailing_traverse()
                .is_some_and(|path| scan_def.is_non_multikey(&path))
    })
}

/// Keep one row per rid, with the first value of each of `agg_projections`.
fn group_by_rid(
    ids: &mut IdGenerator,
    rid: &str,
    agg_projections: Vec<ProjectionName>,
    node: PlanNode,
    ce: f64,
    ce_map: &mut NodeCeMap,
) -> PlanNode {
    let agg_exprs = agg_projections
        .iter()
        .map(|projection| Expr::function("$first", vec![Expr::var(projection.clone())]))
        .collect();
    let group_by = PlanNode::new(
        ids,
        PhysicalOp::GroupBy {
            group_keys: vec![rid.to_string()],
            agg_projections,
            agg_exprs,
        },
        vec![node],
    );
    ce_map.insert(group_by.id, ce);
    group_by
}

/// Split a filter into independently convertible conjuncts.
fn split_conjuncts(filter: &Expr) -> Vec<Expr> {
    match filter {
        Expr::BinaryOp {
            op: Operation::And,
            left,
            right,
        } => {
            let mut out = split_conjuncts(left);
            out.extend(split_conjuncts(right));
            out
        }
        Expr::EvalFilter { path, input } => path
            .collect_composed()
            .into_iter()
            .map(|p| Expr::eval_filter(p.clone(), input.as_ref().clone()))
            .collect(),
        other => vec![other.clone()],
    }
}
