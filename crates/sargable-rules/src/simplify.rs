//! # Requirement Simplification and Intersection
//!
//! Two operations keep requirement sets small and canonical:
//!
//! ## Intersection (`intersect_partial_schema_req`)
//!
//! Merges a source set into a target set as a conjunction. For each incoming entry:
//!
//! 1. **Same key**: a non-multikey key has at most one entry, and the incoming interval
//!    is intersected into it. Under a traversal different array elements may satisfy
//!    different intervals, so the incoming entry is only absorbed when the existing
//!    interval already implies it; otherwise it is kept as a separate entry.
//! 2. **Chaining**: an incoming key rooted at a projection that an existing requirement
//!    binds (`p1 = root.a`, then `p1.b > 3`) is re-rooted onto the binding's source
//!    (`root.a.b > 3`) and retried.
//! 3. Otherwise the entry is inserted.
//!
//! When both sides bind the same key under different names, the incoming name is
//! recorded as a rename of the existing one.
//!
//! ## Path Simplification (`simplify_partial_schema_req_paths`)
//!
//! A trailing traversal over a path the catalog knows is never an array is a no-op:
//! `a.[] = 5` on a non-multikey `a` is just `a = 5`. Such keys are rewritten, merged
//! with any requirement already on the shorter key, and every interval is normalized.
//! An interval that normalizes to empty proves the whole set unsatisfiable.

use sargable_core::error::{violation, ContractViolation};
use sargable_core::interval::IntervalReqExpr;
use sargable_core::path::FieldPath;
use sargable_core::requirements::{
    PartialSchemaKey, PartialSchemaRequirement, PartialSchemaRequirements, ProjectionRenames,
};
use std::collections::BTreeSet;
use tracing::trace;

/// Intersect `source` into `target`.
///
/// Returns `false` when some entry cannot be merged (a chained key whose incoming
/// requirement carries its own binding); `target` may then hold a partial result and
/// should be discarded. An intersection that becomes empty is stored as an empty
/// interval, so `target.is_unsatisfiable()` reports it.
pub fn intersect_partial_schema_req(
    target: &mut PartialSchemaRequirements,
    source: &PartialSchemaRequirements,
    renames: &mut ProjectionRenames,
) -> bool {
    for (key, req) in source.iter() {
        if !intersect_one(target, key.clone(), req.clone(), renames) {
            return false;
        }
    }
    true
}

fn intersect_one(
    target: &mut PartialSchemaRequirements,
    mut key: PartialSchemaKey,
    req: PartialSchemaRequirement,
    renames: &mut ProjectionRenames,
) -> bool {
    let mut visited = BTreeSet::new();
    loop {
        if !visited.insert(key.clone()) {
            violation(ContractViolation::RequirementChainLoop(key.to_string()));
        }

        let multikey = key.path.contains_traverse();
        let range = target.equal_range(&key);
        if !multikey && range.len() > 1 {
            violation(ContractViolation::MultipleNonMultikeyMatches(key.to_string()));
        }

        for index in range {
            let Some(existing) = target.get_mut(index) else {
                continue;
            };
            let merged = if multikey {
                existing.intervals().intersect(req.intervals()).as_ref() == Some(existing.intervals())
            } else {
                let combined = existing
                    .intervals()
                    .intersect(req.intervals())
                    .unwrap_or_else(IntervalReqExpr::empty);
                existing.set_intervals(combined);
                true
            };
            if !merged {
                continue;
            }

            if let Some(incoming) = req.bound_projection_name() {
                match existing.bound_projection_name() {
                    Some(current) => renames.record(incoming.clone(), current.clone()),
                    None => existing.set_bound_projection_name(Some(incoming.clone())),
                }
            }
            return true;
        }

        let mut chained = None;
        for (existing_key, existing_req) in target.iter() {
            if let Some(incoming) = req.bound_projection_name() {
                if &existing_key.projection_name == incoming {
                    violation(ContractViolation::SelfReferentialBinding(incoming.clone()));
                }
            }
            if existing_req.bound_projection_name() == Some(&key.projection_name) {
                if req.has_bound_projection_name() {
                    return false;
                }
                chained = Some(PartialSchemaKey::new(
                    existing_key.projection_name.clone(),
                    existing_key.path.concat(&key.path),
                ));
                break;
            }
        }

        match chained {
            Some(next) => {
                trace!("Chained requirement key {} onto {}", key, next);
                key = next;
            }
            None => {
                target.insert(key, req);
                return true;
            }
        }
    }
}

/// Rewrite keys on `scan_projection` whose trailing traversal is a no-op, merge the
/// resulting duplicates and normalize every interval.
///
/// Returns `None` when the requirements cannot all hold.
pub fn simplify_partial_schema_req_paths(
    scan_projection: &str,
    non_multikey_paths: &BTreeSet<FieldPath>,
    reqs: PartialSchemaRequirements,
) -> Option<PartialSchemaRequirements> {
    let mut result = PartialSchemaRequirements::new();

    for (key, req) in reqs.into_entries() {
        let mut key = key;
        let mut erased = false;
        if key.projection_name == scan_projection {
            if let Some(stripped) = key.path.without_trailing_traverse() {
                if non_multikey_paths.contains(&stripped) {
                    key.path = stripped;
                    erased = true;
                }
            }
        }

        if erased {
            let range = result.equal_range(&key);
            if let Some(existing) = result.get_mut(range.start).filter(|_| !range.is_empty()) {
                merge_requirement(&key, existing, req)?;
                continue;
            }
        }
        result.insert(key, req);
    }

    for (key, req) in result.iter_mut() {
        match req.intervals().normalize() {
            Some(normalized) => req.set_intervals(normalized),
            None => {
                trace!("Requirement on {} is unsatisfiable", key);
                return None;
            }
        }
    }
    Some(result)
}

fn merge_requirement(
    key: &PartialSchemaKey,
    existing: &mut PartialSchemaRequirement,
    incoming: PartialSchemaRequirement,
) -> Option<()> {
    if let Some(incoming_name) = incoming.bound_projection_name() {
        match existing.bound_projection_name() {
            Some(existing_name) if existing_name != incoming_name => {
                violation(ContractViolation::ConflictingBindings {
                    key: key.to_string(),
                    existing: existing_name.clone(),
                    incoming: incoming_name.clone(),
                });
            }
            Some(_) => {}
            None => existing.set_bound_projection_name(Some(incoming_name.clone())),
        }
    }

    let Some(combined) = existing.intervals().intersect(incoming.intervals()) else {
        trace!("Merged requirement on {} is unsatisfiable", key);
        return None;
    };
    existing.set_intervals(combined);
    Some(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sargable_core::expr::Expr;
    use sargable_core::interval::{BoundRequirement, IntervalRequirement};

    fn key(dotted: &str) -> PartialSchemaKey {
        PartialSchemaKey::new("root", FieldPath::parse(dotted))
    }

    fn closed(lo: i64, hi: i64) -> IntervalReqExpr {
        IntervalReqExpr::singular_dnf(IntervalRequirement::new(
            BoundRequirement::new(true, Expr::int64(lo)),
            BoundRequirement::new(true, Expr::int64(hi)),
        ))
    }

    fn eq(v: i64) -> IntervalReqExpr {
        IntervalReqExpr::singular_dnf(IntervalRequirement::equality(Expr::int64(v)))
    }

    fn unbound(intervals: IntervalReqExpr) -> PartialSchemaRequirement {
        PartialSchemaRequirement::unbound(intervals)
    }

    #[test]
    fn test_intersect_same_key_narrows() {
        let mut target = PartialSchemaRequirements::singleton(key("a"), unbound(closed(1, 10)));
        let source = PartialSchemaRequirements::singleton(key("a"), unbound(closed(5, 20)));
        let mut renames = ProjectionRenames::new();
        assert!(intersect_partial_schema_req(&mut target, &source, &mut renames));
        assert_eq!(target.len(), 1);
        assert_eq!(target.find_unique(&key("a")).unwrap().intervals(), &closed(5, 10));
    }

    #[test]
    fn test_intersect_disjoint_marks_unsatisfiable() {
        let mut target = PartialSchemaRequirements::singleton(key("a"), unbound(closed(5, 10)));
        let source = PartialSchemaRequirements::singleton(key("a"), unbound(closed(20, 30)));
        let mut renames = ProjectionRenames::new();
        assert!(intersect_partial_schema_req(&mut target, &source, &mut renames));
        assert!(target.is_unsatisfiable());
    }

    #[test]
    fn test_intersect_multikey_keeps_separate_entries() {
        let mut target = PartialSchemaRequirements::singleton(key("a.[]"), unbound(eq(1)));
        let source = PartialSchemaRequirements::singleton(key("a.[]"), unbound(eq(2)));
        let mut renames = ProjectionRenames::new();
        assert!(intersect_partial_schema_req(&mut target, &source, &mut renames));
        assert_eq!(target.count(&key("a.[]")), 2);
    }

    #[test]
    fn test_intersect_multikey_absorbs_implied() {
        let mut target = PartialSchemaRequirements::singleton(key("a.[]"), unbound(eq(3)));
        let source = PartialSchemaRequirements::singleton(key("a.[]"), unbound(closed(1, 5)));
        let mut renames = ProjectionRenames::new();
        assert!(intersect_partial_schema_req(&mut target, &source, &mut renames));
        assert_eq!(target.count(&key("a.[]")), 1);
    }

    #[test]
    fn test_intersect_records_rename() {
        let mut target = PartialSchemaRequirements::singleton(
            key("a"),
            PartialSchemaRequirement::new(Some("p1".into()), IntervalReqExpr::fully_open_dnf()),
        );
        let source = PartialSchemaRequirements::singleton(
            key("a"),
            PartialSchemaRequirement::new(Some("p2".into()), IntervalReqExpr::fully_open_dnf()),
        );
        let mut renames = ProjectionRenames::new();
        assert!(intersect_partial_schema_req(&mut target, &source, &mut renames));
        assert_eq!(renames.get("p2").map(String::as_str), Some("p1"));
    }

    #[test]
    fn test_intersect_chains_through_binding() {
        let mut target = PartialSchemaRequirements::singleton(
            key("a"),
            PartialSchemaRequirement::new(Some("p1".into()), IntervalReqExpr::fully_open_dnf()),
        );
        let source = PartialSchemaRequirements::singleton(
            PartialSchemaKey::new("p1", FieldPath::parse("b")),
            unbound(eq(3)),
        );
        let mut renames = ProjectionRenames::new();
        assert!(intersect_partial_schema_req(&mut target, &source, &mut renames));
        assert_eq!(target.find_unique(&key("a.b")).unwrap().intervals(), &eq(3));
    }

    #[test]
    fn test_intersect_chain_with_binding_fails() {
        let mut target = PartialSchemaRequirements::singleton(
            key("a"),
            PartialSchemaRequirement::new(Some("p1".into()), IntervalReqExpr::fully_open_dnf()),
        );
        let source = PartialSchemaRequirements::singleton(
            PartialSchemaKey::new("p1", FieldPath::parse("b")),
            PartialSchemaRequirement::new(Some("p2".into()), eq(3)),
        );
        let mut renames = ProjectionRenames::new();
        assert!(!intersect_partial_schema_req(&mut target, &source, &mut renames));
    }

    #[test]
    #[should_panic(expected = "optimizer contract violation")]
    fn test_intersect_self_referential_binding() {
        let mut target = PartialSchemaRequirements::singleton(
            PartialSchemaKey::new("p1", FieldPath::parse("a")),
            unbound(eq(1)),
        );
        let source = PartialSchemaRequirements::singleton(
            key("b"),
            PartialSchemaRequirement::new(Some("p1".into()), IntervalReqExpr::fully_open_dnf()),
        );
        let mut renames = ProjectionRenames::new();
        intersect_partial_schema_req(&mut target, &source, &mut renames);
    }

    #[test]
    fn test_intersect_with_self_is_idempotent() {
        let reqs: PartialSchemaRequirements = vec![
            (key("a"), unbound(closed(1, 5))),
            (key("b.[]"), unbound(eq(2))),
            (key("c"), PartialSchemaRequirement::new(Some("pc".into()), eq(7))),
        ]
        .into_iter()
        .collect();
        let mut target = reqs.clone();
        let mut renames = ProjectionRenames::new();
        assert!(intersect_partial_schema_req(&mut target, &reqs, &mut renames));
        assert_eq!(target, reqs);
        assert!(renames.is_empty());
    }

    #[test]
    fn test_simplify_erases_non_multikey_traverse() {
        let non_multikey = BTreeSet::from([FieldPath::parse("a")]);
        let reqs = PartialSchemaRequirements::singleton(key("a.[]"), unbound(eq(5)));
        let simplified = simplify_partial_schema_req_paths("root", &non_multikey, reqs).unwrap();
        assert_eq!(simplified.find_unique(&key("a")).unwrap().intervals(), &eq(5));
    }

    #[test]
    fn test_simplify_keeps_multikey_traverse() {
        let reqs = PartialSchemaRequirements::singleton(key("a.[]"), unbound(eq(5)));
        let simplified = simplify_partial_schema_req_paths("root", &BTreeSet::new(), reqs).unwrap();
        assert_eq!(simplified.count(&key("a.[]")), 1);
    }

    #[test]
    fn test_simplify_merges_and_detects_contradiction() {
        let non_multikey = BTreeSet::from([FieldPath::parse("a")]);
        let reqs: PartialSchemaRequirements = vec![(key("a"), unbound(closed(1, 5))), (key("a.[]"), unbound(closed(3, 9)))]
            .into_iter()
            .collect();
        let simplified = simplify_partial_schema_req_paths("root", &non_multikey, reqs).unwrap();
        assert_eq!(simplified.len(), 1);
        assert_eq!(simplified.find_unique(&key("a")).unwrap().intervals(), &closed(3, 5));

        let contradictory: PartialSchemaRequirements = vec![(key("a"), unbound(eq(1))), (key("a.[]"), unbound(eq(2)))]
            .into_iter()
            .collect();
        assert!(simplify_partial_schema_req_paths("root", &non_multikey, contradictory).is_none());
    }

    #[test]
    fn test_simplify_rejects_empty_interval() {
        let reqs = PartialSchemaRequirements::singleton(key("a"), unbound(IntervalReqExpr::empty()));
        assert!(simplify_partial_schema_req_paths("root", &BTreeSet::new(), reqs).is_none());
    }

    #[test]
    #[should_panic(expected = "optimizer contract violation")]
    fn test_simplify_conflicting_bindings() {
        let non_multikey = BTreeSet::from([FieldPath::parse("a")]);
        let reqs: PartialSchemaRequirements = vec![
            (key("a"), PartialSchemaRequirement::new(Some("p1".into()), IntervalReqExpr::fully_open_dnf())),
            (key("a.[]"), PartialSchemaRequirement::new(Some("p2".into()), IntervalReqExpr::fully_open_dnf())),
        ]
        .into_iter()
        .collect();
        simplify_partial_schema_req_paths("root", &non_multikey, reqs);
    }
}
