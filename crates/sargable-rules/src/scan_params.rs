//! # Full Scan Implementation
//!
//! Maps a requirement set onto a physical (full) collection scan.
//!
//! A collection scan can deliver top-level fields directly, so a bound requirement on
//! a plain top-level field (`root.a` bound to `pa`) is answered by projecting field `a`
//! as `pa`. Everything else is evaluated after the scan:
//!
//! - A requirement under a top-level field (`root.a.b`) reads field `a` into a
//!   temporary projection and becomes a residual over it.
//! - Any other requirement needs the whole document (the root projection).
//!
//! Unbound, fully open requirements constrain nothing and are skipped, as are bound
//! requirements whose binding nobody asked for.

use sargable_core::ids::IdGenerator;
use sargable_core::path::FieldPath;
use sargable_core::plan::FieldProjectionMap;
use sargable_core::properties::ProjectionSet;
use sargable_core::requirements::{
    PartialSchemaKey, PartialSchemaRequirement, PartialSchemaRequirements, ProjectionRenames, ResidualRequirement,
};
use std::collections::BTreeMap;
use tracing::trace;

/// How a physical scan serves a requirement set.
#[derive(Debug, Clone, PartialEq)]
pub struct PhysicalScanParams {
    pub field_projection_map: FieldProjectionMap,
    pub residual_requirements: Vec<ResidualRequirement>,
    /// Required bindings that coincide with a field projected under another name.
    pub projection_renames: ProjectionRenames,
    /// The document itself must be delivered for the residuals.
    pub requires_root_projection: bool,
}

/// Compute the scan's field projections and residuals.
///
/// `entry_ces` holds the estimate of each entry of `reqs`, in entry order.
pub fn compute_physical_scan_params(
    ids: &mut IdGenerator,
    reqs: &PartialSchemaRequirements,
    entry_ces: &[f64],
    required_projections: &ProjectionSet,
) -> PhysicalScanParams {
    let mut params = PhysicalScanParams {
        field_projection_map: FieldProjectionMap::new(),
        residual_requirements: Vec::new(),
        projection_renames: ProjectionRenames::new(),
        requires_root_projection: false,
    };
    // Temporary projection already reading each top-level field.
    let mut field_temps: BTreeMap<String, String> = BTreeMap::new();

    for (index, (key, req)) in reqs.iter().enumerate() {
        let ce = entry_ces.get(index).copied().unwrap_or(0.0);

        let mut req = req.clone();
        if let Some(bound) = req.bound_projection_name() {
            if !required_projections.contains(bound) {
                req.set_bound_projection_name(None);
            }
        }
        if !req.has_bound_projection_name() && req.is_fully_open() {
            continue;
        }

        let Some((field, rest)) = key.path.split_first_field() else {
            params.requires_root_projection = true;
            params.residual_requirements.push(ResidualRequirement::new(key.clone(), req, ce));
            continue;
        };

        if rest.is_identity() {
            if let Some(bound) = req.bound_projection_name().cloned() {
                let projected = match params.field_projection_map.field_projections.get(field) {
                    Some(existing) => {
                        params.projection_renames.record(bound.clone(), existing.clone());
                        existing.clone()
                    }
                    None => {
                        params.field_projection_map.insert_field(field, bound.clone());
                        bound.clone()
                    }
                };
                if !req.is_fully_open() {
                    let residual_key = PartialSchemaKey::new(projected, FieldPath::identity());
                    let residual_req = PartialSchemaRequirement::unbound(req.intervals().clone());
                    params
                        .residual_requirements
                        .push(ResidualRequirement::new(residual_key, residual_req, ce));
                }
                continue;
            }
        }

        let temp = match params.field_projection_map.field_projections.get(field) {
            Some(existing) => existing.clone(),
            None => field_temps
                .entry(field.to_string())
                .or_insert_with(|| ids.next_name("evalTemp"))
                .clone(),
        };
        params.field_projection_map.insert_field(field, temp.clone());
        params
            .residual_requirements
            .push(ResidualRequirement::new(PartialSchemaKey::new(temp, rest), req, ce));
    }

    if params.requires_root_projection {
        trace!("Scan needs the root projection for {} residuals", params.residual_requirements.len());
    }
    params
}

#[cfg(test)]
mod tests {
    use super::*;
    use sargable_core::expr::Expr;
    use sargable_core::interval::{IntervalReqExpr, IntervalRequirement};

    fn key(dotted: &str) -> PartialSchemaKey {
        PartialSchemaKey::new("root", FieldPath::parse(dotted))
    }

    fn eq(v: i64) -> IntervalReqExpr {
        IntervalReqExpr::singular_dnf(IntervalRequirement::equality(Expr::int64(v)))
    }

    #[test]
    fn test_top_level_binding_is_projected() {
        let reqs = PartialSchemaRequirements::singleton(
            key("a"),
            PartialSchemaRequirement::new(Some("pa".into()), IntervalReqExpr::fully_open_dnf()),
        );
        let required: ProjectionSet = ["pa"].into_iter().collect();
        let mut ids = IdGenerator::new();
        let params = compute_physical_scan_params(&mut ids, &reqs, &[1000.0], &required);
        assert_eq!(params.field_projection_map.field_projections["a"], "pa");
        assert!(params.residual_requirements.is_empty());
        assert!(!params.requires_root_projection);
    }

    #[test]
    fn test_top_level_filter_binding_adds_residual() {
        let reqs = PartialSchemaRequirements::singleton(key("a"), PartialSchemaRequirement::new(Some("pa".into()), eq(3)));
        let required: ProjectionSet = ["pa"].into_iter().collect();
        let mut ids = IdGenerator::new();
        let params = compute_physical_scan_params(&mut ids, &reqs, &[100.0], &required);
        assert_eq!(params.residual_requirements.len(), 1);
        let residual = &params.residual_requirements[0];
        assert_eq!(residual.key, PartialSchemaKey::new("pa", FieldPath::identity()));
        assert!(!residual.req.has_bound_projection_name());
        assert_eq!(residual.ce, 100.0);
    }

    #[test]
    fn test_nested_paths_share_field_temp() {
        let reqs: PartialSchemaRequirements = vec![
            (key("a.b"), PartialSchemaRequirement::unbound(eq(1))),
            (key("a.c"), PartialSchemaRequirement::unbound(eq(2))),
        ]
        .into_iter()
        .collect();
        let mut ids = IdGenerator::new();
        let params = compute_physical_scan_params(&mut ids, &reqs, &[10.0, 20.0], &ProjectionSet::new());
        assert_eq!(params.field_projection_map.field_projections.len(), 1);
        let temp = &params.field_projection_map.field_projections["a"];
        assert!(params.residual_requirements.iter().all(|r| &r.key.projection_name == temp));
        assert!(!params.requires_root_projection);
    }

    #[test]
    fn test_unrequired_open_binding_is_skipped() {
        let reqs = PartialSchemaRequirements::singleton(
            key("a"),
            PartialSchemaRequirement::new(Some("pa".into()), IntervalReqExpr::fully_open_dnf()),
        );
        let mut ids = IdGenerator::new();
        let params = compute_physical_scan_params(&mut ids, &reqs, &[1000.0], &ProjectionSet::new());
        assert!(params.field_projection_map.field_projections.is_empty());
        assert!(params.residual_requirements.is_empty());
    }

    #[test]
    fn test_second_binding_of_same_field_is_renamed() {
        let reqs: PartialSchemaRequirements = vec![
            (key("a"), PartialSchemaRequirement::new(Some("p1".into()), IntervalReqExpr::fully_open_dnf())),
            (key("a"), PartialSchemaRequirement::new(Some("p2".into()), IntervalReqExpr::fully_open_dnf())),
        ]
        .into_iter()
        .collect();
        let required: ProjectionSet = ["p1", "p2"].into_iter().collect();
        let mut ids = IdGenerator::new();
        let params = compute_physical_scan_params(&mut ids, &reqs, &[1.0, 1.0], &required);
        assert_eq!(params.projection_renames.get("p2").map(String::as_str), Some("p1"));
    }

    #[test]
    fn test_traverse_first_path_needs_root() {
        let reqs = PartialSchemaRequirements::singleton(
            PartialSchemaKey::new("root", FieldPath::parse("[].a")),
            PartialSchemaRequirement::unbound(eq(1)),
        );
        let mut ids = IdGenerator::new();
        let params = compute_physical_scan_params(&mut ids, &reqs, &[5.0], &ProjectionSet::new());
        assert!(params.requires_root_projection);
        assert_eq!(params.residual_requirements[0].key, reqs.entries()[0].0);
    }
}
