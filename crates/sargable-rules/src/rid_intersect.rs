//! # RID Intersection Implementations
//!
//! Two access paths over the same collection (for example two index scans) each
//! produce a set of rids; their intersection is the set of documents satisfying both.
//! This module provides three physical implementations with different applicability
//! and cost characteristics:
//!
//! ## Group By (`GroupByRidIntersect`)
//!
//! Tags each side with a constant side id, unions them, groups by rid and keeps the
//! rids seen by both sides. The side id and the collected set of sides get fresh names
//! so they never shadow a projection an input already delivers. Projections delivered by only one side are carried through
//! the union as a temporary filled with `Nothing` on the other side and recovered with
//! `$max`. Always applicable.
//!
//! **Cost**: O(left_rows + right_rows) CPU, memory proportional to distinct rids.
//!
//! ## Hash Join (`HashJoinRidIntersect`)
//!
//! Builds a hash table on the left rids and probes it with the right ones. The right
//! rid is renamed first so the two sides do not collide. Always applicable.
//!
//! **Cost**: O(left_rows) memory + O(left_rows + right_rows) CPU.
//!
//! ## Merge Join (`MergeJoinRidIntersect`)
//!
//! Merges two rid-ordered streams. Only applicable when both sides already deliver
//! rids in ascending order, which index scans over a single equality bound do.
//!
//! **Cost**: O(left_rows + right_rows) CPU, minimal memory.

use sargable_core::catalog::CollationOp;
use sargable_core::expr::{Expr, Operation, Path};
use sargable_core::ids::IdGenerator;
use sargable_core::plan::{NodeCeMap, PhysicalOp, PlanNode};
use sargable_core::properties::PhysProps;
use sargable_core::requirements::ProjectionName;

/// One side of a RID intersection: the lowered plan and what it delivers.
pub struct RidIntersectInput {
    pub node: PlanNode,
    pub props: PhysProps,
    pub ce: f64,
}

/// Shared context of a RID intersection.
pub struct RidIntersectContext<'a> {
    pub rid_projection: &'a str,
    /// Estimated rows surviving the intersection.
    pub ce: f64,
}

/// A physical implementation of RID intersection.
pub trait RidIntersectStrategy: Send + Sync {
    fn name(&self) -> &str;

    /// Whether this strategy can combine the two sides.
    fn is_applicable(&self, ctx: &RidIntersectContext<'_>, left: &PhysProps, right: &PhysProps) -> bool;

    /// Build the intersection plan, recording estimates for every node it creates.
    fn implement(
        &self,
        ids: &mut IdGenerator,
        ctx: &RidIntersectContext<'_>,
        left: RidIntersectInput,
        right: RidIntersectInput,
        ce_map: &mut NodeCeMap,
    ) -> PlanNode;
}

/// Intersect by grouping a tagged union on the rid.
pub struct GroupByRidIntersect;

impl RidIntersectStrategy for GroupByRidIntersect {
    fn name(&self) -> &str {
        "GroupByRidIntersect"
    }

    fn is_applicable(&self, _ctx: &RidIntersectContext<'_>, _left: &PhysProps, _right: &PhysProps) -> bool {
        true
    }

    fn implement(
        &self,
        ids: &mut IdGenerator,
        ctx: &RidIntersectContext<'_>,
        left: RidIntersectInput,
        right: RidIntersectInput,
        ce_map: &mut NodeCeMap,
    ) -> PlanNode {
        let rid = ctx.rid_projection.to_string();
        let side_id = ids.next_name("sideId");
        let sides = ids.next_name("sides");

        // Projections besides the rid, from either side.
        let mut carried: Vec<ProjectionName> = Vec::new();
        for name in left.props.projections.iter().chain(right.props.projections.iter()) {
            if name != &rid && !carried.contains(name) {
                carried.push(name.clone());
            }
        }
        let temps: Vec<ProjectionName> = carried.iter().map(|_| ids.next_name("unionTemp")).collect();

        let mut tagged = Vec::with_capacity(2);
        for (side, input) in [left, right].into_iter().enumerate() {
            let mut node = PlanNode::evaluation(ids, side_id.clone(), Expr::int64(side as i64), input.node);
            ce_map.insert(node.id, input.ce);
            for (name, temp) in carried.iter().zip(temps.iter()) {
                let value = if input.props.projections.contains(name) {
                    Expr::var(name.clone())
                } else {
                    Expr::nothing()
                };
                node = PlanNode::evaluation(ids, temp.clone(), value, node);
                ce_map.insert(node.id, input.ce);
            }
            tagged.push(node);
        }

        let mut union_projections = vec![rid.clone(), side_id.clone()];
        union_projections.extend(temps.iter().cloned());
        let union = PlanNode::new(
            ids,
            PhysicalOp::Union {
                projections: union_projections,
            },
            tagged,
        );
        ce_map.insert(union.id, ctx.ce);

        let mut agg_projections = vec![sides.clone()];
        let mut agg_exprs = vec![Expr::function("$addToSet", vec![Expr::var(side_id)])];
        for (name, temp) in carried.iter().zip(temps.iter()) {
            agg_projections.push(name.clone());
            agg_exprs.push(Expr::function("$max", vec![Expr::var(temp.clone())]));
        }
        let group_by = PlanNode::new(
            ids,
            PhysicalOp::GroupBy {
                group_keys: vec![rid],
                agg_projections,
                agg_exprs,
            },
            vec![union],
        );
        ce_map.insert(group_by.id, ctx.ce);

        let both_sides = Expr::eval_filter(
            Path::compare(Operation::Eq, Expr::int64(2)),
            Expr::function("getArraySize", vec![Expr::var(sides)]),
        );
        let filter = PlanNode::filter(ids, both_sides, group_by);
        ce_map.insert(filter.id, ctx.ce);
        filter
    }
}

/// Intersect with a hash join on the rid.
pub struct HashJoinRidIntersect;

impl RidIntersectStrategy for HashJoinRidIntersect {
    fn name(&self) -> &str {
        "HashJoinRidIntersect"
    }

    fn is_applicable(&self, _ctx: &RidIntersectContext<'_>, _left: &PhysProps, _right: &PhysProps) -> bool {
        true
    }

    fn implement(
        &self,
        ids: &mut IdGenerator,
        ctx: &RidIntersectContext<'_>,
        left: RidIntersectInput,
        right: RidIntersectInput,
        ce_map: &mut NodeCeMap,
    ) -> PlanNode {
        let (right_node, right_rid) = rename_right_rid(ids, ctx.rid_projection, right, ce_map);
        let join = PlanNode::new(
            ids,
            PhysicalOp::HashJoin {
                left_keys: vec![ctx.rid_projection.to_string()],
                right_keys: vec![right_rid],
            },
            vec![left.node, right_node],
        );
        ce_map.insert(join.id, ctx.ce);
        join
    }
}

/// Intersect with a merge join over rid-ordered inputs.
pub struct MergeJoinRidIntersect;

impl RidIntersectStrategy for MergeJoinRidIntersect {
    fn name(&self) -> &str {
        "MergeJoinRidIntersect"
    }

    fn is_applicable(&self, ctx: &RidIntersectContext<'_>, left: &PhysProps, right: &PhysProps) -> bool {
        let rid_sorted = rid_ascending(ctx.rid_projection);
        rid_sorted.satisfied_by(left) && rid_sorted.satisfied_by(right)
    }

    fn implement(
        &self,
        ids: &mut IdGenerator,
        ctx: &RidIntersectContext<'_>,
        left: RidIntersectInput,
        right: RidIntersectInput,
        ce_map: &mut NodeCeMap,
    ) -> PlanNode {
        let (right_node, right_rid) = rename_right_rid(ids, ctx.rid_projection, right, ce_map);
        let join = PlanNode::new(
            ids,
            PhysicalOp::MergeJoin {
                left_keys: vec![ctx.rid_projection.to_string()],
                right_keys: vec![right_rid],
                collation: vec![CollationOp::Ascending],
            },
            vec![left.node, right_node],
        );
        ce_map.insert(join.id, ctx.ce);
        join
    }
}

/// Required properties of an input ordered by rid.
pub fn rid_ascending(rid_projection: &str) -> PhysProps {
    PhysProps::any().with_collation(vec![(rid_projection.to_string(), CollationOp::Ascending)])
}

/// Rename the right side's rid to a fresh projection. The original rid is dropped from
/// the right side so only the left one reaches the join output; every other right-side
/// projection is kept.
fn rename_right_rid(
    ids: &mut IdGenerator,
    rid_projection: &str,
    right: RidIntersectInput,
    ce_map: &mut NodeCeMap,
) -> (PlanNode, ProjectionName) {
    let renamed = ids.next_name("rid");
    let evaluation = PlanNode::evaluation(ids, renamed.clone(), Expr::var(rid_projection), right.node);
    ce_map.insert(evaluation.id, right.ce);
    let mut projections: Vec<ProjectionName> = right
        .props
        .projections
        .iter()
        .filter(|name| name.as_str() != rid_projection)
        .cloned()
        .collect();
    projections.push(renamed.clone());
    projections.sort();
    let restricted = PlanNode::new(ids, PhysicalOp::Union { projections }, vec![evaluation]);
    ce_map.insert(restricted.id, right.ce);
    (restricted, renamed)
}

/// The built-in RID intersection strategies.
pub fn default_rid_intersect_strategies() -> Vec<Box<dyn RidIntersectStrategy>> {
    vec![
        Box::new(GroupByRidIntersect),
        Box::new(HashJoinRidIntersect),
        Box::new(MergeJoinRidIntersect),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use sargable_core::plan::{FieldProjectionMap, PhysicalOpKind};

    fn input(ids: &mut IdGenerator, props: PhysProps) -> RidIntersectInput {
        let mut fpm = FieldProjectionMap::new();
        fpm.rid_projection = Some("rid_0".into());
        let node = PlanNode::leaf(
            ids,
            PhysicalOp::PhysicalScan {
                field_projection_map: fpm,
                scan_def_name: "coll".into(),
            },
        );
        RidIntersectInput { node, props, ce: 10.0 }
    }

    fn rid_only() -> PhysProps {
        PhysProps::with_projections(["rid_0"].into_iter().collect())
    }

    fn ctx() -> RidIntersectContext<'static> {
        RidIntersectContext {
            rid_projection: "rid_0",
            ce: 5.0,
        }
    }

    #[test]
    fn test_merge_join_requires_sorted_sides() {
        let sorted = rid_only().with_collation(vec![("rid_0".into(), CollationOp::Ascending)]);
        assert!(MergeJoinRidIntersect.is_applicable(&ctx(), &sorted, &sorted));
        assert!(!MergeJoinRidIntersect.is_applicable(&ctx(), &sorted, &rid_only()));
        assert!(HashJoinRidIntersect.is_applicable(&ctx(), &rid_only(), &rid_only()));
    }

    #[test]
    fn test_hash_join_renames_right_rid() {
        let mut ids = IdGenerator::new();
        assert_eq!(ids.next_name("rid"), "rid_0");
        let left = input(&mut ids, rid_only());
        let right = input(&mut ids, rid_only());
        let mut ce_map = NodeCeMap::new();
        let plan = HashJoinRidIntersect.implement(&mut ids, &ctx(), left, right, &mut ce_map);

        let PhysicalOp::HashJoin { left_keys, right_keys } = &plan.op else {
            panic!("expected a hash join");
        };
        assert_eq!(left_keys, &vec!["rid_0".to_string()]);
        assert_eq!(right_keys, &vec!["rid_1".to_string()]);
        let restricted = &plan.children[1];
        assert_eq!(
            restricted.op,
            PhysicalOp::Union {
                projections: vec!["rid_1".into()]
            }
        );
        assert_eq!(restricted.children[0].kind(), PhysicalOpKind::Evaluation);
    }

    #[test]
    fn test_group_by_carries_one_sided_projection() {
        let mut ids = IdGenerator::new();
        let left_props = PhysProps::with_projections(["rid_0", "pa"].into_iter().collect());
        let left = input(&mut ids, left_props);
        let right = input(&mut ids, rid_only());
        let mut ce_map = NodeCeMap::new();
        let plan = GroupByRidIntersect.implement(&mut ids, &ctx(), left, right, &mut ce_map);

        assert_eq!(plan.kind(), PhysicalOpKind::Filter);
        let group_by = &plan.children[0];
        let PhysicalOp::GroupBy { agg_projections, agg_exprs, .. } = &group_by.op else {
            panic!("expected a group by");
        };
        assert_eq!(agg_projections, &vec!["sides_0".to_string(), "pa".to_string()]);
        assert_eq!(agg_exprs[1], Expr::function("$max", vec![Expr::var("unionTemp_0")]));

        // The right side fills the temporary with Nothing.
        let union = &group_by.children[0];
        let right_top = &union.children[1];
        assert_eq!(
            right_top.op,
            PhysicalOp::Evaluation {
                projection: "unionTemp_0".into(),
                expr: Expr::nothing(),
            }
        );
        // Every node above the two inputs is estimated.
        assert_eq!(ce_map.len(), plan.nodes().len() - 2);
    }

    #[test]
    fn test_joins_keep_right_side_projections() {
        let strategies: [&dyn RidIntersectStrategy; 2] = [&HashJoinRidIntersect, &MergeJoinRidIntersect];
        for strategy in strategies {
            let mut ids = IdGenerator::new();
            assert_eq!(ids.next_name("rid"), "rid_0");
            let left = input(&mut ids, PhysProps::with_projections(["rid_0", "pa"].into_iter().collect()));
            let right = input(&mut ids, PhysProps::with_projections(["rid_0", "pb"].into_iter().collect()));
            let mut ce_map = NodeCeMap::new();
            let plan = strategy.implement(&mut ids, &ctx(), left, right, &mut ce_map);

            assert_eq!(
                plan.children[1].op,
                PhysicalOp::Union {
                    projections: vec!["pb".into(), "rid_1".into()]
                },
                "{}",
                strategy.name()
            );
        }
    }

    #[test]
    fn test_group_by_side_names_do_not_shadow_inputs() {
        let mut ids = IdGenerator::new();
        let left = input(&mut ids, PhysProps::with_projections(["rid_0", "sides"].into_iter().collect()));
        let right = input(&mut ids, rid_only());
        let mut ce_map = NodeCeMap::new();
        let plan = GroupByRidIntersect.implement(&mut ids, &ctx(), left, right, &mut ce_map);

        let PhysicalOp::Filter { filter } = &plan.op else {
            panic!("expected a filter");
        };
        assert_eq!(
            filter,
            &Expr::eval_filter(
                Path::compare(Operation::Eq, Expr::int64(2)),
                Expr::function("getArraySize", vec![Expr::var("sides_0")]),
            )
        );
        let PhysicalOp::GroupBy { agg_projections, agg_exprs, .. } = &plan.children[0].op else {
            panic!("expected a group by");
        };
        assert_eq!(agg_projections, &vec!["sides_0".to_string(), "sides".to_string()]);
        assert_eq!(agg_exprs[0], Expr::function("$addToSet", vec![Expr::var("sideId_0")]));
    }
}
