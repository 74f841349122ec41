//! # Sargable Planning Stages
//!
//! This crate turns filter predicates over a single collection into index-aware
//! physical plan fragments. The stages run in order:
//!
//! ## Analysis
//!
//! - **`builder`**: Converts a filter or projection expression into a partial schema
//!   requirement set (per-path intervals plus optional output bindings). Predicates the
//!   interval algebra cannot express are reported as not convertible.
//! - **`simplify`**: Intersects requirement sets, chaining keys through output bindings,
//!   and simplifies paths using the scan's multikey metadata. Detects contradictions.
//! - **`candidate`**: Matches a requirement set against each compound index of the scan,
//!   producing the compound bound, the index keys to expose and the residuals.
//!
//! ## Lowering
//!
//! - **`lower_intervals`**: Lowers a candidate's compound bound to index scans, with
//!   union/group-by plumbing for disjunctions and conjunctions.
//! - **`rid_intersect`**: Physical strategies intersecting two rid streams (group-by,
//!   hash join, merge join).
//! - **`residual`**: Re-applies the requirements an access path does not answer as
//!   filters and evaluations, most selective first.
//! - **`scan_params`**: Maps a requirement set onto a full collection scan.
//!
//! ## Entry Point
//!
//! - **`planner`**: `SargablePlanner` wires the stages together for one scan and returns
//!   every alternative with its cardinality estimates.

pub mod builder;
pub mod candidate;
pub mod lower_intervals;
pub mod planner;
pub mod residual;
pub mod rid_intersect;
pub mod scan_params;
pub mod simplify;

pub use planner::{AccessPath, PlanAlternative, SargablePlan, SargablePlanner};
pub use rid_intersect::default_rid_intersect_strategies;
