//! # Statistics and Cardinality Estimation
//!
//! Estimates are consumed for ordering residual filters and for the node→CE map handed
//! to the cost model; they never influence correctness.
//!
//! ## Statistics Hierarchy
//!
//! - **Table-level**: row count and total size in bytes.
//! - **Field-level**: number of distinct values (NDV) and null fraction, keyed by the
//!   dotted field name (array traversals are not part of the name).
//!
//! ## Selectivity Estimation
//!
//! - **Equality**: 1 / NDV (uniform distribution assumption), or 0.1 without stats.
//! - **Range**: fixed 1/3 heuristic.
//! - **Disjunction**: inclusion–exclusion under independence, `1 - Π(1 - sᵢ)`.
//! - **Conjunction**: product of the branch selectivities.
//!
//! Combining several independent filters uses [`conj_exponential_backoff`] instead of a
//! naive product, since real predicates are rarely independent.

use crate::catalog::Catalog;
use crate::interval::{BoolExprTransport, IntervalRequirement};
use crate::path::{FieldPath, PathStep};
use crate::requirements::{PartialSchemaKey, PartialSchemaRequirement};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Statistics for a collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Statistics {
    pub row_count: f64,
    pub total_size_bytes: f64,
    pub column_stats: HashMap<String, ColumnStatistics>,
}

impl Statistics {
    pub fn new(row_count: f64, total_size_bytes: f64) -> Self {
        Self {
            row_count,
            total_size_bytes,
            column_stats: HashMap::new(),
        }
    }

    pub fn with_column(mut self, name: impl Into<String>, stats: ColumnStatistics) -> Self {
        self.column_stats.insert(name.into(), stats);
        self
    }
}

/// Per-field statistics used for selectivity estimation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnStatistics {
    /// Number of distinct values (NDV). Used for equality selectivity: sel = 1/NDV.
    pub distinct_count: f64,
    /// Fraction of rows where the field is null or missing [0.0, 1.0].
    pub null_fraction: f64,
}

impl ColumnStatistics {
    pub fn new(distinct_count: f64, null_fraction: f64) -> Self {
        Self {
            distinct_count,
            null_fraction,
        }
    }
}

/// Default filter selectivity when we can't determine it.
pub const DEFAULT_FILTER_SELECTIVITY: f64 = 0.1;

/// Selectivity of a one- or two-sided range predicate.
pub const RANGE_SELECTIVITY: f64 = 0.33;

/// Estimate selectivity for an equality predicate: `sel = 1 / NDV`.
///
/// This assumes a uniform distribution of values. If column statistics are
/// unavailable, falls back to the default selectivity of 0.1 (10%).
pub fn equality_selectivity(stats: &Statistics, col_name: &str) -> f64 {
    stats
        .column_stats
        .get(col_name)
        .map(|cs| 1.0 / cs.distinct_count.max(1.0))
        .unwrap_or(DEFAULT_FILTER_SELECTIVITY)
}

/// Combine the selectivities of conjunctive filters with exponential backoff.
///
/// Selectivities are sorted ascending and at most four are used:
///
/// ```text
/// s0 * s1^(1/2) * s2^(1/4) * s3^(1/8)
/// ```
pub fn conj_exponential_backoff(selectivities: &[f64]) -> f64 {
    let mut sorted: Vec<f64> = selectivities.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mut result = 1.0_f64;
    let mut exponent = 1.0_f64;
    for s in sorted.into_iter().take(4) {
        result *= s.powf(exponent);
        exponent /= 2.0;
    }
    result
}

/// The name under which field statistics are stored for a path: its field steps
/// joined by dots, traversals omitted.
pub fn stats_field_name(path: &FieldPath) -> String {
    path.steps()
        .iter()
        .filter_map(|s| match s {
            PathStep::Field(name) => Some(name.as_str()),
            PathStep::Traverse => None,
        })
        .collect::<Vec<_>>()
        .join(".")
}

/// Source of cardinality estimates for the lowering stages.
pub trait CardinalityEstimator: Send + Sync {
    /// Rows in the collection.
    fn scan_cardinality(&self, scan_def_name: &str) -> f64;

    /// Rows of the collection matching one requirement in isolation.
    fn requirement_cardinality(
        &self,
        scan_def_name: &str,
        key: &PartialSchemaKey,
        req: &PartialSchemaRequirement,
    ) -> f64;
}

/// Heuristic estimator driven by catalog statistics.
pub struct HeuristicEstimator {
    catalog: Arc<dyn Catalog>,
}

impl HeuristicEstimator {
    pub fn new(catalog: Arc<dyn Catalog>) -> Self {
        Self { catalog }
    }
}

struct IntervalSelectivity<'a> {
    stats: Option<&'a Statistics>,
    field: String,
}

impl BoolExprTransport<IntervalRequirement> for IntervalSelectivity<'_> {
    type Output = f64;

    fn atom(&mut self, atom: &IntervalRequirement) -> f64 {
        if atom.is_fully_open() {
            1.0
        } else if atom.is_equality() {
            self.stats
                .map(|s| equality_selectivity(s, &self.field))
                .unwrap_or(DEFAULT_FILTER_SELECTIVITY)
        } else {
            RANGE_SELECTIVITY
        }
    }

    fn conjunction(&mut self, children: Vec<f64>) -> f64 {
        children.into_iter().product()
    }

    fn disjunction(&mut self, children: Vec<f64>) -> f64 {
        1.0 - children.into_iter().map(|s| 1.0 - s).product::<f64>()
    }
}

impl CardinalityEstimator for HeuristicEstimator {
    fn scan_cardinality(&self, scan_def_name: &str) -> f64 {
        self.catalog
            .get_table_stats(scan_def_name)
            .map(|s| s.row_count)
            .unwrap_or(1000.0)
    }

    fn requirement_cardinality(
        &self,
        scan_def_name: &str,
        key: &PartialSchemaKey,
        req: &PartialSchemaRequirement,
    ) -> f64 {
        let stats = self.catalog.get_table_stats(scan_def_name);
        let row_count = stats.as_ref().map(|s| s.row_count).unwrap_or(1000.0);
        let mut visitor = IntervalSelectivity {
            stats: stats.as_ref(),
            field: stats_field_name(&key.path),
        };
        let selectivity = req.intervals().transport(&mut visitor).clamp(0.0, 1.0);
        row_count * selectivity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{InMemoryCatalog, ScanDefinition};
    use crate::expr::Expr;
    use crate::interval::{BoundRequirement, IntervalReqExpr};

    fn estimator() -> HeuristicEstimator {
        let mut catalog = InMemoryCatalog::new();
        catalog.add_scan(
            "coll",
            ScanDefinition::new(),
            Statistics::new(1000.0, 1e5).with_column("a", ColumnStatistics::new(50.0, 0.0)),
        );
        HeuristicEstimator::new(Arc::new(catalog))
    }

    #[test]
    fn test_backoff() {
        assert_eq!(conj_exponential_backoff(&[]), 1.0);
        assert!((conj_exponential_backoff(&[0.5]) - 0.5).abs() < 1e-12);
        let expected = 0.01 * 0.25_f64.sqrt() * 0.81_f64.powf(0.25);
        assert!((conj_exponential_backoff(&[0.81, 0.01, 0.25]) - expected).abs() < 1e-12);
    }

    #[test]
    fn test_backoff_uses_four_most_selective() {
        let four = conj_exponential_backoff(&[0.1, 0.2, 0.3, 0.4]);
        let five = conj_exponential_backoff(&[0.1, 0.2, 0.3, 0.4, 0.9]);
        assert!((four - five).abs() < 1e-12);
    }

    #[test]
    fn test_stats_field_name_skips_traverse() {
        assert_eq!(stats_field_name(&FieldPath::parse("a.[].b.[]")), "a.b");
    }

    #[test]
    fn test_equality_uses_ndv() {
        let est = estimator();
        let key = PartialSchemaKey::new("root", FieldPath::parse("a.[]"));
        let req = PartialSchemaRequirement::unbound(IntervalReqExpr::singular_dnf(IntervalRequirement::equality(
            Expr::int64(3),
        )));
        assert!((est.requirement_cardinality("coll", &key, &req) - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_disjunction_inclusion_exclusion() {
        let est = estimator();
        let key = PartialSchemaKey::new("root", FieldPath::parse("b"));
        let range = IntervalRequirement::new(BoundRequirement::new(false, Expr::int64(5)), BoundRequirement::plus_inf());
        let eq = IntervalRequirement::equality(Expr::int64(1));
        let intervals = IntervalReqExpr::singular_dnf(range).union(&IntervalReqExpr::singular_dnf(eq));
        let ce = est.requirement_cardinality("coll", &key, &PartialSchemaRequirement::unbound(intervals));
        let expected = 1000.0 * (1.0 - (1.0 - RANGE_SELECTIVITY) * (1.0 - DEFAULT_FILTER_SELECTIVITY));
        assert!((ce - expected).abs() < 1e-9);
    }
}
