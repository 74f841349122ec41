//! Property tests for requirement intersection and plan equivalence.
//!
//! - Intersecting a requirement set with itself changes nothing.
//! - Every alternative the planner produces for a random filter selects exactly the
//!   documents the filter selects when evaluated directly, none of them twice, and an
//!   `AlwaysFalse` plan is only produced for filters no document satisfies.

mod common;

use common::{doc, int, ints, TestCollection};
use proptest::prelude::*;
use sargable_core::catalog::{Catalog, IndexDefinition, ScanDefinition};
use sargable_core::config::PlannerConfig;
use sargable_core::expr::{Expr, Operation, Path};
use sargable_core::ids::IdGenerator;
use sargable_core::interval::{BoundRequirement, IntervalReqExpr, IntervalRequirement};
use sargable_core::path::FieldPath;
use sargable_core::requirements::{
    PartialSchemaKey, PartialSchemaRequirement, PartialSchemaRequirements, ProjectionRenames,
};
use sargable_core::stats::HeuristicEstimator;
use sargable_rules::simplify::intersect_partial_schema_req;
use sargable_rules::{SargablePlan, SargablePlanner};
use std::collections::BTreeMap;
use std::sync::Arc;

const FIELDS: [&str; 3] = ["a", "b.[]", "c"];

fn interval_strategy() -> impl Strategy<Value = IntervalReqExpr> {
    (-5i64..5, 0i64..4, any::<bool>(), any::<bool>()).prop_map(|(low, width, low_inc, high_inc)| {
        let interval = if width == 0 {
            IntervalRequirement::equality(Expr::int64(low))
        } else {
            IntervalRequirement::new(
                BoundRequirement::new(low_inc, Expr::int64(low)),
                BoundRequirement::new(high_inc, Expr::int64(low + width)),
            )
        };
        IntervalReqExpr::singular_dnf(interval)
    })
}

fn requirements_strategy() -> impl Strategy<Value = PartialSchemaRequirements> {
    prop::collection::btree_map(prop::sample::select(FIELDS.to_vec()), interval_strategy(), 1..=3).prop_map(
        |by_field: BTreeMap<&str, IntervalReqExpr>| {
            by_field
                .into_iter()
                .map(|(field, intervals)| {
                    (
                        PartialSchemaKey::new("root", FieldPath::parse(field)),
                        PartialSchemaRequirement::unbound(intervals),
                    )
                })
                .collect()
        },
    )
}

#[derive(Debug, Clone)]
enum Atom {
    Compare(&'static str, Operation, i64),
    EitherEquals(&'static str, i64, i64),
}

impl Atom {
    fn to_filter(&self) -> Expr {
        let (field, leaf) = match self {
            Atom::Compare(field, op, v) => (*field, Path::compare(*op, Expr::int64(*v))),
            Atom::EitherEquals(field, x, y) => (
                *field,
                Path::compose_a(
                    Path::compare(Operation::Eq, Expr::int64(*x)),
                    Path::compare(Operation::Eq, Expr::int64(*y)),
                ),
            ),
        };
        Expr::eval_filter(FieldPath::parse(field).to_path(leaf), Expr::var("root"))
    }
}

fn atom_strategy() -> impl Strategy<Value = Atom> {
    let field = prop::sample::select(FIELDS.to_vec());
    let op = prop::sample::select(vec![
        Operation::Eq,
        Operation::Neq,
        Operation::Lt,
        Operation::Lte,
        Operation::Gt,
        Operation::Gte,
    ]);
    prop_oneof![
        (field.clone(), op, 0i64..5).prop_map(|(f, op, v)| Atom::Compare(f, op, v)),
        (field, 0i64..5, 0i64..5).prop_map(|(f, x, y)| Atom::EitherEquals(f, x, y)),
    ]
}

fn collection_strategy() -> impl Strategy<Value = TestCollection> {
    let document = (0i64..5, prop::collection::vec(0i64..5, 1..=3), 0i64..5)
        .prop_map(|(a, b, c)| doc(&[("a", int(a)), ("b", ints(&b)), ("c", int(c))]));
    prop::collection::vec(document, 1..30).prop_map(|docs| {
        let scan_def = ScanDefinition::new()
            .with_index("idx_a", IndexDefinition::ascending(&["a"]))
            .with_index("idx_ac", IndexDefinition::ascending(&["a", "c"]))
            .with_index("idx_ca", IndexDefinition::ascending(&["c", "a"]))
            .with_index("idx_b", IndexDefinition::ascending(&["b.[]"]))
            .with_non_multikey_path(FieldPath::parse("a"))
            .with_non_multikey_path(FieldPath::parse("c"));
        TestCollection::new("coll", scan_def, docs)
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_intersection_with_itself_is_identity(reqs in requirements_strategy()) {
        let mut target = reqs.clone();
        let mut renames = ProjectionRenames::new();
        prop_assert!(intersect_partial_schema_req(&mut target, &reqs, &mut renames));
        prop_assert_eq!(target, reqs);
        prop_assert!(renames.is_empty());
    }

    #[test]
    fn prop_alternatives_match_direct_evaluation(
        coll in collection_strategy(),
        atoms in prop::collection::vec(atom_strategy(), 1..=4),
    ) {
        let filter = atoms
            .iter()
            .map(Atom::to_filter)
            .reduce(|l, r| Expr::binary(Operation::And, l, r))
            .unwrap();

        let catalog: Arc<dyn Catalog> = Arc::new(coll.catalog());
        let estimator = Arc::new(HeuristicEstimator::new(catalog.clone()));
        let planner = SargablePlanner::new(catalog, estimator, PlannerConfig::default()).unwrap();
        let mut ids = IdGenerator::new();
        let plan = planner.plan_filter(&mut ids, "coll", "root", &filter).unwrap();

        let expected = coll.reference_rids("root", &filter);
        match &plan {
            SargablePlan::AlwaysFalse => prop_assert!(expected.is_empty()),
            SargablePlan::Alternatives(alternatives) => {
                prop_assert!(!alternatives.is_empty());
                for alternative in alternatives {
                    let rids = coll.alternative_rid_list(alternative);
                    prop_assert_eq!(rids.len(), coll.alternative_rids(alternative).len());
                    prop_assert_eq!(
                        coll.alternative_rids(alternative),
                        expected.clone(),
                        "{} disagrees for {}",
                        alternative.access_path,
                        filter
                    );
                }
            }
        }
    }
}
