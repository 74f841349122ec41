//! # Residual Lowering
//!
//! Requirements that the access path does not answer become `Filter` and `Evaluation`
//! nodes on top of it.
//!
//! An interval expression is turned back into a predicate path: an equality becomes
//! `Cmp[=]`, a range becomes `Cmp[>=]`/`Cmp[>]` and `Cmp[<=]`/`Cmp[<]` on its finite
//! ends, conjunctions compose with `ComposeM` and disjunctions with `ComposeA`. The
//! equality on null is spelled `Default[true] || Cmp[=] null` so that a missing field
//! matches too.
//!
//! Residuals are applied most selective first. Each filter is estimated by exponential
//! backoff over the selectivities of the filters already applied below it.

use sargable_core::error::{violation, ContractViolation};
use sargable_core::expr::{Expr, Operation, Path, Value};
use sargable_core::ids::IdGenerator;
use sargable_core::interval::{BoolExprTransport, IntervalReqExpr, IntervalRequirement};
use sargable_core::plan::{NodeCeMap, PlanNode};
use sargable_core::requirements::{PartialSchemaKey, PartialSchemaRequirement, ProjectionRenames, ResidualRequirement};
use sargable_core::stats::conj_exponential_backoff;
use std::cmp::Ordering;
use tracing::trace;

struct IntervalToPath {
    has_bound_projection: bool,
}

impl BoolExprTransport<IntervalRequirement> for IntervalToPath {
    type Output = Path;

    fn atom(&mut self, interval: &IntervalRequirement) -> Path {
        if interval.is_inverted() {
            violation(ContractViolation::MalformedInterval(interval.to_string()));
        }

        if interval.is_equality() {
            let bound = interval.low_bound().bound();
            return match bound.as_constant() {
                Some(Value::Null) => Path::compose_a(
                    Path::default_value(Expr::boolean(true)),
                    Path::compare(Operation::Eq, Expr::null()),
                ),
                Some(_) => Path::compare(Operation::Eq, bound.clone()),
                None if self.has_bound_projection => violation(ContractViolation::VariableBoundWithBinding),
                None => Path::compare(Operation::Eq, bound.clone()),
            };
        }

        let mut path = Path::Identity;
        let low = interval.low_bound();
        if !low.is_minus_inf() {
            let op = if low.is_inclusive() { Operation::Gte } else { Operation::Gt };
            path = path.maybe_compose_m(Path::compare(op, low.bound().clone()));
        }
        let high = interval.high_bound();
        if !high.is_plus_inf() {
            let op = if high.is_inclusive() { Operation::Lte } else { Operation::Lt };
            path = path.maybe_compose_m(Path::compare(op, high.bound().clone()));
        }
        path
    }

    fn conjunction(&mut self, children: Vec<Path>) -> Path {
        children.into_iter().fold(Path::Identity, Path::maybe_compose_m)
    }

    fn disjunction(&mut self, children: Vec<Path>) -> Path {
        // An always-true branch makes the disjunction always true.
        if children.iter().any(Path::is_identity) {
            return Path::Identity;
        }
        children
            .into_iter()
            .reduce(Path::compose_a)
            .unwrap_or_else(|| violation(ContractViolation::MalformedInterval("empty interval expression".into())))
    }
}

/// Predicate path equivalent to `intervals`. `Identity` when they admit everything.
pub fn lower_interval_path(intervals: &IntervalReqExpr, has_bound_projection: bool) -> Path {
    intervals.transport(&mut IntervalToPath { has_bound_projection })
}

/// Apply one requirement on top of `node`.
///
/// A bound requirement evaluates its path into the binding and filters the binding
/// unless its interval is fully open. An unbound one becomes a single filter over the
/// key's projection. `on_node` sees every node created, bottom-up.
pub fn lower_partial_schema_requirement(
    ids: &mut IdGenerator,
    key: &PartialSchemaKey,
    req: &PartialSchemaRequirement,
    node: PlanNode,
    on_node: &mut dyn FnMut(&PlanNode),
) -> PlanNode {
    let path = lower_interval_path(req.intervals(), req.has_bound_projection_name());
    let input = Expr::var(key.projection_name.clone());

    match req.bound_projection_name() {
        Some(bound) => {
            let evaluated = PlanNode::evaluation(ids, bound.clone(), Expr::eval_path(key.path.to_path(Path::Identity), input), node);
            on_node(&evaluated);
            if path.is_identity() {
                return evaluated;
            }
            let filtered = PlanNode::filter(ids, Expr::eval_filter(path, Expr::var(bound.clone())), evaluated);
            on_node(&filtered);
            filtered
        }
        None => {
            if path.is_identity() {
                violation(ContractViolation::TautologicalResidual(key.to_string()));
            }
            let filtered = PlanNode::filter(ids, Expr::eval_filter(key.path.to_path(path), input), node);
            on_node(&filtered);
            filtered
        }
    }
}

/// Order residuals so the most selective (lowest estimate) is applied first.
pub fn sort_residual_requirements(residuals: &mut [ResidualRequirement]) {
    residuals.sort_by(|a, b| a.ce.partial_cmp(&b.ce).unwrap_or(Ordering::Equal));
}

/// Apply `residuals` on top of `node`, recording an estimate for every node created.
///
/// `base_ce` is the estimate of `node` itself and `scan_ce` the collection size each
/// residual's estimate is relative to.
pub fn lower_partial_schema_requirements(
    ids: &mut IdGenerator,
    base_ce: f64,
    scan_ce: f64,
    mut residuals: Vec<ResidualRequirement>,
    mut node: PlanNode,
    ce_map: &mut NodeCeMap,
) -> PlanNode {
    sort_residual_requirements(&mut residuals);

    let mut selectivities = Vec::with_capacity(residuals.len());
    for residual in &residuals {
        let ce = base_ce * conj_exponential_backoff(&selectivities);
        node = lower_partial_schema_requirement(ids, &residual.key, &residual.req, node, &mut |created: &PlanNode| {
            ce_map.insert(created.id, ce)
        });
        trace!("Applied residual {} => {} (ce={:.2})", residual.key, residual.req, ce);

        let selectivity = if scan_ce > 0.0 { residual.ce / scan_ce } else { 0.0 };
        selectivities.push(selectivity);
    }
    node
}

/// Materialize projection renames (`new -> existing`) as evaluations.
pub fn apply_projection_renames(
    ids: &mut IdGenerator,
    renames: &ProjectionRenames,
    mut node: PlanNode,
    ce: f64,
    ce_map: &mut NodeCeMap,
) -> PlanNode {
    for (target, source) in renames.iter() {
        node = PlanNode::evaluation(ids, target.clone(), Expr::var(renames.resolve(source).to_string()), node);
        ce_map.insert(node.id, ce);
    }
    node
}
