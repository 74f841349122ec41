//! # Requirement Builder
//!
//! Converts a predicate (an `EvalFilter`) or a projection (an `EvalPath`) into a set of
//! partial schema requirements: "the value at path P of binding B lies in interval
//! set I", optionally exposing that value under an output binding.
//!
//! ## How It Works
//!
//! The conversion is a bottom-up fold over the path tree. Every node yields either a
//! *bound* (an opaque expression that a `Compare` can use as an interval endpoint) or a
//! requirement set whose keys are relative to the node:
//!
//! - `Identity` yields `{Id => (-inf, +inf)}`.
//! - `Compare` turns its bound into an interval: `=` gives `[b, b]`, `<` gives
//!   `[MinKey, b)`, `>=` gives `[b, MaxKey]` and so on.
//! - `Get` and `Traverse` prepend a step to every key.
//! - `ComposeM` intersects its sides; `ComposeA` unions them when both sides constrain
//!   the same single key.
//! - `EvalPath`/`EvalFilter` re-key the result onto the input variable.
//!
//! ## Array Equality Folding
//!
//! `a = [1, 2]` matches both a document whose `a` is that array and, because traversal
//! reaches array elements, one whose elements match the first element. The two resulting
//! requirements (on `a` and on `a.[]`) cannot be represented exactly, so the builder
//! keeps the traversing key with the element interval added and flags the conversion as
//! *retain predicate*: the index narrows the candidates and the original predicate still
//! runs as a residual filter.
//!
//! Anything the fold does not recognize (`Default` outside the null pattern, `Neq`,
//! compositions in projection context, bound names on both sides...) makes the whole
//! conversion fail; the caller then keeps the predicate as an opaque filter.

use crate::simplify::intersect_partial_schema_req;
use sargable_core::expr::{Expr, Operation, Path, Value};
use sargable_core::interval::{BoundRequirement, IntervalReqExpr, IntervalRequirement};
use sargable_core::path::PathStep;
use sargable_core::requirements::{
    PartialSchemaKey, PartialSchemaRequirement, PartialSchemaRequirements, ProjectionRenames,
};
use tracing::trace;

/// Result of converting an expression or path into requirements.
#[derive(Debug, Clone, PartialEq)]
pub struct RequirementConversion {
    /// Set when the subtree is an opaque bound rather than a requirement set.
    pub bound: Option<Expr>,
    pub reqs: PartialSchemaRequirements,
    /// Some `ComposeM` was folded into the set.
    pub has_intersected: bool,
    /// Some key went through an array traversal.
    pub has_traversed: bool,
    /// The requirements over-approximate the predicate, which must still be applied.
    pub retain_predicate: bool,
}

impl RequirementConversion {
    fn from_reqs(reqs: PartialSchemaRequirements) -> Self {
        Self {
            bound: None,
            reqs,
            has_intersected: false,
            has_traversed: false,
            retain_predicate: false,
        }
    }

    fn from_bound(bound: Expr) -> Self {
        Self {
            bound: Some(bound),
            reqs: PartialSchemaRequirements::new(),
            has_intersected: false,
            has_traversed: false,
            retain_predicate: false,
        }
    }

    fn is_bound(&self) -> bool {
        self.bound.is_some()
    }

    fn absorb_flags(&mut self, other: &RequirementConversion) {
        self.has_intersected |= other.has_intersected;
        self.has_traversed |= other.has_traversed;
        self.retain_predicate |= other.retain_predicate;
    }
}

/// Convert `expr` into a requirement set.
///
/// `is_filter_context` is true for predicates and false for projections; compositions
/// are only meaningful as predicates. Returns `None` when the expression is not
/// sargable, and also when it converts to nothing but a vacuous requirement (an
/// unbound, fully open interval on the identity path).
pub fn convert_expr_to_partial_schema_req(expr: &Expr, is_filter_context: bool) -> Option<RequirementConversion> {
    let converter = RequirementConverter { is_filter_context };
    let Some(result) = converter.convert_expr(expr) else {
        trace!("Expression is not sargable: {}", expr);
        return None;
    };

    if result.reqs.is_empty() {
        trace!("Expression converted to a bound only: {}", expr);
        return None;
    }
    for (key, req) in result.reqs.iter() {
        if key.path.is_identity() && req.is_fully_open() && !req.has_bound_projection_name() {
            trace!("Expression converted to a vacuous requirement: {}", expr);
            return None;
        }
    }

    trace!("Converted {} into {}", expr, result.reqs);
    Some(result)
}

struct RequirementConverter {
    is_filter_context: bool,
}

impl RequirementConverter {
    fn convert_expr(&self, expr: &Expr) -> Option<RequirementConversion> {
        match expr {
            Expr::Constant(Value::Null) => None,
            Expr::Constant(_) | Expr::Variable(_) | Expr::BinaryOp { .. } | Expr::FunctionCall { .. } => {
                Some(RequirementConversion::from_bound(expr.clone()))
            }
            Expr::EvalPath { path, input } | Expr::EvalFilter { path, input } => {
                let path_result = self.convert_path(path);
                let input_result = self.convert_expr(input);
                handle_eval(path_result?, input_result?)
            }
        }
    }

    fn convert_path(&self, path: &Path) -> Option<RequirementConversion> {
        match path {
            Path::Identity => Some(RequirementConversion::from_reqs(PartialSchemaRequirements::singleton(
                PartialSchemaKey::default(),
                PartialSchemaRequirement::fully_open(),
            ))),
            Path::Get { name, path } => {
                let input = self.convert_path(path)?;
                prepend_step(input, PathStep::Field(name.clone()))
            }
            Path::Traverse { path } => {
                let input = self.convert_path(path)?;
                if input.reqs.len() > 1 {
                    return None;
                }
                let mut result = prepend_step(input, PathStep::Traverse)?;
                result.has_traversed = true;
                Some(result)
            }
            Path::Compare { op, value } => {
                let input = self.convert_expr(value)?;
                handle_compare(*op, input)
            }
            Path::Default(_) => None,
            Path::ComposeM(left, right) => {
                if !self.is_filter_context {
                    return None;
                }
                let left = self.convert_path(left)?;
                let right = self.convert_path(right)?;
                handle_compose_m(left, right)
            }
            Path::ComposeA(left, right) => {
                if !self.is_filter_context {
                    return None;
                }
                if is_null_or_missing_check(left, right) {
                    let null = IntervalReqExpr::singular_dnf(IntervalRequirement::equality(Expr::null()));
                    return Some(RequirementConversion::from_reqs(PartialSchemaRequirements::singleton(
                        PartialSchemaKey::default(),
                        PartialSchemaRequirement::unbound(null),
                    )));
                }
                let left = self.convert_path(left)?;
                let right = self.convert_path(right)?;
                handle_compose_a(left, right)
            }
        }
    }
}

fn handle_eval(path_result: RequirementConversion, input_result: RequirementConversion) -> Option<RequirementConversion> {
    if path_result.is_bound() || !input_result.reqs.is_empty() {
        return None;
    }
    let projection = input_result.bound.as_ref()?.as_variable()?;

    let mut reqs = PartialSchemaRequirements::new();
    for (key, req) in path_result.reqs.iter() {
        if !key.is_unbound() {
            return None;
        }
        reqs.insert(PartialSchemaKey::new(projection, key.path.clone()), req.clone());
    }

    // Intersection and traversal are facts about the path; only the need to keep the
    // predicate survives the evaluation.
    let mut result = RequirementConversion::from_reqs(reqs);
    result.retain_predicate = path_result.retain_predicate;
    Some(result)
}

fn prepend_step(input: RequirementConversion, step: PathStep) -> Option<RequirementConversion> {
    if input.is_bound() {
        return None;
    }
    let mut reqs = PartialSchemaRequirements::new();
    for (key, req) in input.reqs.iter() {
        if !key.is_unbound() {
            return None;
        }
        let mut path = key.path.clone();
        path.prepend(step.clone());
        reqs.insert(PartialSchemaKey::unbound(path), req.clone());
    }
    let mut result = RequirementConversion::from_reqs(reqs);
    result.absorb_flags(&input);
    Some(result)
}

fn handle_compare(op: Operation, input: RequirementConversion) -> Option<RequirementConversion> {
    if !input.reqs.is_empty() {
        return None;
    }
    let bound = input.bound?;

    let interval = match op {
        Operation::Eq => IntervalRequirement::equality(bound),
        Operation::Lt => IntervalRequirement::new(BoundRequirement::minus_inf(), BoundRequirement::new(false, bound)),
        Operation::Lte => IntervalRequirement::new(BoundRequirement::minus_inf(), BoundRequirement::new(true, bound)),
        Operation::Gt => IntervalRequirement::new(BoundRequirement::new(false, bound), BoundRequirement::plus_inf()),
        Operation::Gte => IntervalRequirement::new(BoundRequirement::new(true, bound), BoundRequirement::plus_inf()),
        _ => return None,
    };

    Some(RequirementConversion::from_reqs(PartialSchemaRequirements::singleton(
        PartialSchemaKey::default(),
        PartialSchemaRequirement::unbound(IntervalReqExpr::singular_dnf(interval)),
    )))
}

fn handle_compose_m(mut left: RequirementConversion, right: RequirementConversion) -> Option<RequirementConversion> {
    if left.is_bound() || right.is_bound() {
        return None;
    }

    let mut merged = left.reqs.clone();
    let mut renames = ProjectionRenames::new();
    if intersect_partial_schema_req(&mut merged, &right.reqs, &mut renames) && renames.is_empty() {
        left.reqs = merged;
        left.absorb_flags(&right);
        left.has_intersected = true;
        return Some(left);
    }

    fold_array_equality(left, right)
}

fn handle_compose_a(mut left: RequirementConversion, right: RequirementConversion) -> Option<RequirementConversion> {
    if left.is_bound() || right.is_bound() {
        return None;
    }
    let first_key = left.reqs.entries().first()?.0.clone();
    if right.reqs.is_empty() {
        return None;
    }

    let single_key = left.reqs.count(&first_key) == left.reqs.len() && right.reqs.count(&first_key) == right.reqs.len();
    if single_key {
        // Every left requirement is widened by every right one.
        let mut reqs = PartialSchemaRequirements::new();
        for (_, right_req) in right.reqs.iter() {
            for (left_key, left_req) in left.reqs.iter() {
                let mut widened = left_req.clone();
                widened.set_intervals(left_req.intervals().union(right_req.intervals()));
                reqs.insert(left_key.clone(), widened);
            }
        }
        left.reqs = reqs;
        left.absorb_flags(&right);
        return Some(left);
    }

    fold_array_equality(left, right)
}

/// `(Cmp[=] null || Default[true])` in either order: the value is null or missing.
fn is_null_or_missing_check(left: &Path, right: &Path) -> bool {
    let is_null_eq = |p: &Path| {
        matches!(p, Path::Compare { op: Operation::Eq, value } if matches!(value.as_constant(), Some(Value::Null)))
    };
    let is_default_true = |p: &Path| matches!(p, Path::Default(e) if matches!(e.as_constant(), Some(Value::Bool(true))));
    (is_null_eq(left) && is_default_true(right)) || (is_default_true(left) && is_null_eq(right))
}

/// Combine a whole-array equality with the same equality seen through a traversal.
///
/// Both sides must be single unbound requirements on keys that differ by one trailing
/// traversal, carrying the same equality on a non-empty array constant. The traversing
/// key is kept with the first array element added to its interval.
fn fold_array_equality(left: RequirementConversion, right: RequirementConversion) -> Option<RequirementConversion> {
    if left.reqs.len() != 1 || right.reqs.len() != 1 {
        return None;
    }
    let (left_key, left_req) = &left.reqs.entries()[0];
    let (right_key, right_req) = &right.reqs.entries()[0];
    if left_key.projection_name != right_key.projection_name {
        return None;
    }
    if left_req.has_bound_projection_name() || right_req.has_bound_projection_name() {
        return None;
    }

    let left_interval = left_req.intervals().singular_atom()?;
    if !left_interval.is_equality() || Some(left_interval) != right_req.intervals().singular_atom() {
        return None;
    }
    let first = left_interval.low_bound().bound().as_constant()?.as_array()?.first()?.clone();
    let element = IntervalReqExpr::singular_dnf(IntervalRequirement::equality(Expr::Constant(first)));

    // The traversing side may sit under any common field path, not just the root.
    let left_traverses = left_key.path.is_traverse_of(&right_key.path);
    let right_traverses = right_key.path.is_traverse_of(&left_key.path);
    let (mut result, other) = if left_traverses {
        (left, right)
    } else if right_traverses {
        (right, left)
    } else {
        return None;
    };

    for (_, req) in result.reqs.iter_mut() {
        let widened = req.intervals().union(&element);
        req.set_intervals(widened);
    }
    result.absorb_flags(&other);
    result.retain_predicate = true;
    trace!("Folded array equality into {}", result.reqs);
    Some(result)
}
