//! # Compound Interval Lowering
//!
//! Turns the compound bound of an index candidate into index scans.
//!
//! A bound in DNF is lowered structurally:
//!
//! - **Atom**: one `IndexScan` over that compound interval.
//! - **Disjunction** of n > 1 branches: the branches are scanned into fresh
//!   `disjunction_N` projections, concatenated with a `Union`, and de-duplicated by a
//!   `GroupBy` on the rid that takes `$first` of every index key.
//! - **Conjunction** of n > 1 branches: each branch is tagged with a constant side id,
//!   the branches are concatenated, grouped by rid collecting the set of side ids, and a
//!   `Filter` keeps the rids seen by all n branches. Both the side id and the set get
//!   fresh `sideId_N` / `sides_N` names per conjunction.
//!
//! A single-branch conjunction or disjunction adds no operator. Every scan produces
//! the rid: the caller's map is given the rid projection if it lacks one.
//!
//! ## Cardinality
//!
//! The selectivity of the whole bound (`index_ce / scan_ce`) is split top-down: each of
//! the n branches of a disjunction gets `s / n`, each branch of a conjunction `s^(1/n)`.
//! Scans are estimated at `scan_ce * s`; the tagging evaluations are not estimated
//! meaningfully and get 0.

use sargable_core::catalog::{CollationOp, IndexDefinition};
use sargable_core::error::{violation, ContractViolation};
use sargable_core::expr::{Expr, Operation, Path};
use sargable_core::ids::IdGenerator;
use sargable_core::interval::{BoolExpr, CompoundIntervalReqExpr, CompoundIntervalRequirement};
use sargable_core::plan::{FieldProjectionMap, IndexSpecification, NodeCeMap, PhysicalOp, PlanNode};
use sargable_core::requirements::ProjectionName;
use tracing::trace;

/// Everything needed to lower one candidate's compound bound.
pub struct IntervalLowering<'a> {
    pub scan_def_name: &'a str,
    pub index_def_name: &'a str,
    pub index_def: &'a IndexDefinition,
    pub rid_projection: &'a str,
    pub reverse_order: bool,
    /// Estimated rows produced by the whole bound.
    pub index_ce: f64,
    /// Estimated rows of the scanned collection.
    pub scan_ce: f64,
}

/// Lower `intervals` into a plan producing the rid and the index keys named in `fpm`.
pub fn lower_intervals(
    ids: &mut IdGenerator,
    lowering: &IntervalLowering<'_>,
    fpm: &FieldProjectionMap,
    intervals: &CompoundIntervalReqExpr,
    ce_map: &mut NodeCeMap,
) -> PlanNode {
    let selectivity = if lowering.scan_ce > 0.0 {
        lowering.index_ce / lowering.scan_ce
    } else {
        0.0
    };
    let mut lowerer = Lowerer {
        ids,
        lowering,
        ce_map,
    };
    lowerer.lower(intervals, fpm, selectivity)
}

#[derive(Clone, Copy)]
enum Composition {
    Conjunction,
    Disjunction,
}

impl Composition {
    fn alias_prefix(self) -> &'static str {
        match self {
            Composition::Conjunction => "conjunction",
            Composition::Disjunction => "disjunction",
        }
    }
}

struct Lowerer<'a, 'b> {
    ids: &'a mut IdGenerator,
    lowering: &'a IntervalLowering<'b>,
    ce_map: &'a mut NodeCeMap,
}

impl Lowerer<'_, '_> {
    fn lower(&mut self, node: &CompoundIntervalReqExpr, fpm: &FieldProjectionMap, selectivity: f64) -> PlanNode {
        match node {
            BoolExpr::Atom(interval) => self.lower_atom(interval, fpm, selectivity),
            BoolExpr::Conjunction(children) => {
                self.lower_composition(Composition::Conjunction, children, fpm, selectivity)
            }
            BoolExpr::Disjunction(children) => {
                self.lower_composition(Composition::Disjunction, children, fpm, selectivity)
            }
        }
    }

    fn lower_atom(&mut self, interval: &CompoundIntervalRequirement, fpm: &FieldProjectionMap, selectivity: f64) -> PlanNode {
        let spec = &self.lowering.index_def.collation_spec;
        if interval.len() != spec.len() {
            violation(ContractViolation::MalformedInterval(format!(
                "compound interval {} has {} fields, index {} has {}",
                interval,
                interval.len(),
                self.lowering.index_def_name,
                spec.len()
            )));
        }
        for (field, entry) in interval.intervals().iter().zip(spec.iter()) {
            let ascending = if entry.op == CollationOp::Descending {
                field.reverse()
            } else {
                field.clone()
            };
            if ascending.is_inverted() {
                violation(ContractViolation::MalformedInterval(interval.to_string()));
            }
        }

        let node = PlanNode::leaf(
            self.ids,
            PhysicalOp::IndexScan {
                field_projection_map: fpm.clone(),
                spec: IndexSpecification {
                    scan_def_name: self.lowering.scan_def_name.to_string(),
                    index_def_name: self.lowering.index_def_name.to_string(),
                    interval: interval.clone(),
                    reverse_order: self.lowering.reverse_order,
                },
            },
        );
        let ce = self.lowering.scan_ce * selectivity;
        trace!("Lowered interval {} to scan {} (ce={:.2})", interval, node.id, ce);
        self.ce_map.insert(node.id, ce);
        node
    }

    fn lower_composition(
        &mut self,
        composition: Composition,
        children: &[CompoundIntervalReqExpr],
        fpm: &FieldProjectionMap,
        selectivity: f64,
    ) -> PlanNode {
        let count = children.len();
        let child_selectivity = match composition {
            Composition::Conjunction => selectivity.powf(1.0 / count.max(1) as f64),
            Composition::Disjunction => selectivity / count.max(1) as f64,
        };

        let mut child_fpm = fpm.clone();
        if child_fpm.rid_projection.is_none() {
            child_fpm.rid_projection = Some(self.lowering.rid_projection.to_string());
        }
        if count > 1 {
            for projection in child_fpm.field_projections.values_mut() {
                *projection = self.ids.next_name(composition.alias_prefix());
            }
        }

        let mut inputs: Vec<PlanNode> = children
            .iter()
            .map(|child| self.lower(child, &child_fpm, child_selectivity))
            .collect();

        if inputs.len() > 1 {
            return self.combine(composition, inputs, fpm, &child_fpm, selectivity);
        }
        inputs
            .pop()
            .unwrap_or_else(|| violation(ContractViolation::MalformedInterval("empty compound interval expression".into())))
    }

    /// Union the branches and group them back by rid.
    fn combine(
        &mut self,
        composition: Composition,
        inputs: Vec<PlanNode>,
        outer_fpm: &FieldProjectionMap,
        inner_fpm: &FieldProjectionMap,
        selectivity: f64,
    ) -> PlanNode {
        let count = inputs.len();
        let ce = self.lowering.scan_ce * selectivity;
        let rid = inner_fpm
            .rid_projection
            .clone()
            .unwrap_or_else(|| self.lowering.rid_projection.to_string());

        let mut union_projections: Vec<ProjectionName> = vec![rid.clone()];
        union_projections.extend(inner_fpm.field_projections.values().cloned());

        let mut agg_projections = Vec::new();
        let mut agg_exprs = Vec::new();
        for (field, inner) in &inner_fpm.field_projections {
            if let Some(outer) = outer_fpm.field_projections.get(field) {
                agg_projections.push(outer.clone());
                agg_exprs.push(Expr::function("$first", vec![Expr::var(inner.clone())]));
            }
        }

        // Side id and collected sides of a conjunction.
        let side_names = match composition {
            Composition::Disjunction => None,
            Composition::Conjunction => Some((self.ids.next_name("sideId"), self.ids.next_name("sides"))),
        };

        let inputs = match &side_names {
            None => inputs,
            Some((side_id, sides)) => {
                union_projections.push(side_id.clone());
                agg_projections.push(sides.clone());
                agg_exprs.push(Expr::function("$addToSet", vec![Expr::var(side_id.clone())]));
                let mut tagged_inputs = Vec::with_capacity(count);
                for (side, input) in inputs.into_iter().enumerate() {
                    let tagged = PlanNode::evaluation(self.ids, side_id.clone(), Expr::int64(side as i64), input);
                    self.ce_map.insert(tagged.id, 0.0);
                    tagged_inputs.push(tagged);
                }
                tagged_inputs
            }
        };

        let union = PlanNode::new(
            self.ids,
            PhysicalOp::Union {
                projections: union_projections,
            },
            inputs,
        );
        self.ce_map.insert(union.id, ce);

        let group_by = PlanNode::new(
            self.ids,
            PhysicalOp::GroupBy {
                group_keys: vec![rid],
                agg_projections,
                agg_exprs,
            },
            vec![union],
        );
        self.ce_map.insert(group_by.id, ce);

        match side_names {
            None => group_by,
            Some((_, sides)) => {
                let all_sides = Expr::eval_filter(
                    Path::compare(Operation::Eq, Expr::int64(count as i64)),
                    Expr::function("getArraySize", vec![Expr::var(sides)]),
                );
                let filter = PlanNode::filter(self.ids, all_sides, group_by);
                self.ce_map.insert(filter.id, ce);
                filter
            }
        }
    }
}
