//! # Physical Plan Fragments
//!
//! The lowering stages produce trees of [`PlanNode`]s. Every node carries a [`NodeId`]
//! drawn from the session's [`IdGenerator`] so cardinality estimates can be reported in
//! a parallel [`NodeCeMap`] without storing them in the tree.
//!
//! ## Operators
//!
//! - **PhysicalScan**: full scan of a collection, projecting the rid, the whole document
//!   (root) and/or top-level fields.
//! - **IndexScan**: range scan of one compound index over one compound interval.
//! - **Seek**: fetch the document for each rid produced by its child.
//! - **Evaluation** / **Filter**: bind a computed value / drop rows failing a predicate.
//! - **Union**: concatenate children that all produce the same projections.
//! - **GroupBy**: group on key projections computing aggregates (`$first`, `$max`,
//!   `$addToSet`).
//! - **HashJoin** / **MergeJoin**: inner equi-join on rid projections.

use crate::catalog::CollationOp;
use crate::error::{violation, ContractViolation};
use crate::expr::Expr;
use crate::ids::IdGenerator;
use crate::interval::CompoundIntervalRequirement;
use crate::requirements::ProjectionName;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Which projections a scan delivers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldProjectionMap {
    pub rid_projection: Option<ProjectionName>,
    pub root_projection: Option<ProjectionName>,
    /// Field name (top-level field, or encoded index key) to projection.
    pub field_projections: BTreeMap<String, ProjectionName>,
}

impl FieldProjectionMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if the field already had a projection.
    pub fn insert_field(&mut self, field: impl Into<String>, projection: impl Into<ProjectionName>) -> bool {
        match self.field_projections.entry(field.into()) {
            std::collections::btree_map::Entry::Occupied(_) => false,
            std::collections::btree_map::Entry::Vacant(v) => {
                v.insert(projection.into());
                true
            }
        }
    }

    /// All projections delivered: rid, root, then fields in field order.
    pub fn projections(&self) -> Vec<ProjectionName> {
        let mut out = Vec::new();
        out.extend(self.rid_projection.iter().cloned());
        out.extend(self.root_projection.iter().cloned());
        out.extend(self.field_projections.values().cloned());
        out
    }
}

impl fmt::Display for FieldProjectionMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(rid) = &self.rid_projection {
            parts.push(format!("<rid>: {}", rid));
        }
        if let Some(root) = &self.root_projection {
            parts.push(format!("<root>: {}", root));
        }
        for (field, proj) in &self.field_projections {
            parts.push(format!("'{}': {}", field, proj));
        }
        write!(f, "{{{}}}", parts.join(", "))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexSpecification {
    pub scan_def_name: String,
    pub index_def_name: String,
    pub interval: CompoundIntervalRequirement,
    pub reverse_order: bool,
}

/// Physical operators produced by the lowering stages.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PhysicalOp {
    /// Full collection scan. O(n).
    PhysicalScan {
        field_projection_map: FieldProjectionMap,
        scan_def_name: String,
    },
    /// Compound-range scan of one index. Produces index keys and the rid only.
    IndexScan {
        field_projection_map: FieldProjectionMap,
        spec: IndexSpecification,
    },
    /// Fetch by rid. Unary: its child produces `rid_projection`.
    Seek {
        rid_projection: ProjectionName,
        field_projection_map: FieldProjectionMap,
        scan_def_name: String,
    },
    Evaluation {
        projection: ProjectionName,
        expr: Expr,
    },
    Filter {
        filter: Expr,
    },
    /// All children must produce `projections`.
    Union {
        projections: Vec<ProjectionName>,
    },
    GroupBy {
        group_keys: Vec<ProjectionName>,
        agg_projections: Vec<ProjectionName>,
        agg_exprs: Vec<Expr>,
    },
    /// Inner hash join; the left child is the build side.
    HashJoin {
        left_keys: Vec<ProjectionName>,
        right_keys: Vec<ProjectionName>,
    },
    /// Inner merge join over inputs sorted on the keys.
    MergeJoin {
        left_keys: Vec<ProjectionName>,
        right_keys: Vec<ProjectionName>,
        collation: Vec<CollationOp>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PhysicalOpKind {
    PhysicalScan,
    IndexScan,
    Seek,
    Evaluation,
    Filter,
    Union,
    GroupBy,
    HashJoin,
    MergeJoin,
}

impl PhysicalOp {
    pub fn kind(&self) -> PhysicalOpKind {
        match self {
            PhysicalOp::PhysicalScan { .. } => PhysicalOpKind::PhysicalScan,
            PhysicalOp::IndexScan { .. } => PhysicalOpKind::IndexScan,
            PhysicalOp::Seek { .. } => PhysicalOpKind::Seek,
            PhysicalOp::Evaluation { .. } => PhysicalOpKind::Evaluation,
            PhysicalOp::Filter { .. } => PhysicalOpKind::Filter,
            PhysicalOp::Union { .. } => PhysicalOpKind::Union,
            PhysicalOp::GroupBy { .. } => PhysicalOpKind::GroupBy,
            PhysicalOp::HashJoin { .. } => PhysicalOpKind::HashJoin,
            PhysicalOp::MergeJoin { .. } => PhysicalOpKind::MergeJoin,
        }
    }
}

impl fmt::Display for PhysicalOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PhysicalOp::PhysicalScan {
                field_projection_map,
                scan_def_name,
            } => write!(f, "PhysicalScan [{}] {}", scan_def_name, field_projection_map),
            PhysicalOp::IndexScan {
                field_projection_map,
                spec,
            } => write!(
                f,
                "IndexScan [{}.{}{}] {} {}",
                spec.scan_def_name,
                spec.index_def_name,
                if spec.reverse_order { ", reverse" } else { "" },
                spec.interval,
                field_projection_map
            ),
            PhysicalOp::Seek {
                rid_projection,
                field_projection_map,
                scan_def_name,
            } => write!(f, "Seek [{}] rid={} {}", scan_def_name, rid_projection, field_projection_map),
            PhysicalOp::Evaluation { projection, expr } => write!(f, "Evaluation [{}] {}", projection, expr),
            PhysicalOp::Filter { filter } => write!(f, "Filter {}", filter),
            PhysicalOp::Union { projections } => write!(f, "Union [{}]", projections.join(", ")),
            PhysicalOp::GroupBy {
                group_keys,
                agg_projections,
                agg_exprs,
            } => {
                let aggs: Vec<String> = agg_projections
                    .iter()
                    .zip(agg_exprs.iter())
                    .map(|(p, e)| format!("{} = {}", p, e))
                    .collect();
                write!(f, "GroupBy [{}] {{{}}}", group_keys.join(", "), aggs.join(", "))
            }
            PhysicalOp::HashJoin { left_keys, right_keys } => {
                write!(f, "HashJoin [{}] = [{}]", left_keys.join(", "), right_keys.join(", "))
            }
            PhysicalOp::MergeJoin {
                left_keys, right_keys, ..
            } => write!(f, "MergeJoin [{}] = [{}]", left_keys.join(", "), right_keys.join(", ")),
        }
    }
}

/// A node of a physical plan fragment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlanNode {
    pub id: NodeId,
    pub op: PhysicalOp,
    pub children: Vec<PlanNode>,
}

impl PlanNode {
    pub fn new(ids: &mut IdGenerator, op: PhysicalOp, children: Vec<PlanNode>) -> Self {
        Self {
            id: ids.next_node_id(),
            op,
            children,
        }
    }

    pub fn leaf(ids: &mut IdGenerator, op: PhysicalOp) -> Self {
        Self::new(ids, op, Vec::new())
    }

    pub fn filter(ids: &mut IdGenerator, filter: Expr, child: PlanNode) -> Self {
        Self::new(ids, PhysicalOp::Filter { filter }, vec![child])
    }

    pub fn evaluation(ids: &mut IdGenerator, projection: impl Into<ProjectionName>, expr: Expr, child: PlanNode) -> Self {
        Self::new(
            ids,
            PhysicalOp::Evaluation {
                projection: projection.into(),
                expr,
            },
            vec![child],
        )
    }

    pub fn kind(&self) -> PhysicalOpKind {
        self.op.kind()
    }

    /// Pre-order walk over the tree.
    pub fn nodes(&self) -> Vec<&PlanNode> {
        let mut out = Vec::new();
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            out.push(node);
            for child in node.children.iter().rev() {
                stack.push(child);
            }
        }
        out
    }

    /// Number of nodes of the given kind in the tree.
    pub fn count_kind(&self, kind: PhysicalOpKind) -> usize {
        self.nodes().iter().filter(|n| n.kind() == kind).count()
    }

    fn fmt_indent(&self, f: &mut fmt::Formatter<'_>, indent: usize) -> fmt::Result {
        writeln!(f, "{}{} {}", "  ".repeat(indent), self.id, self.op)?;
        for child in &self.children {
            child.fmt_indent(f, indent + 1)?;
        }
        Ok(())
    }
}

impl fmt::Display for PlanNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_indent(f, 0)
    }
}

/// Estimated output cardinality per plan node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeCeMap {
    estimates: BTreeMap<NodeId, f64>,
}

impl NodeCeMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the estimate for a node. Each node is estimated exactly once.
    pub fn insert(&mut self, id: NodeId, ce: f64) {
        if self.estimates.insert(id, ce).is_some() {
            violation(ContractViolation::DuplicateNodeEstimate(id.0));
        }
    }

    pub fn get(&self, id: NodeId) -> Option<f64> {
        self.estimates.get(&id).copied()
    }

    pub fn len(&self) -> usize {
        self.estimates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.estimates.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NodeId, &f64)> {
        self.estimates.iter()
    }
}
