//! # sargable-core: Predicate and Index Data Model
//!
//! This crate holds the data structures shared by the sargable planning stages: the
//! expression substrate the predicates arrive in, the interval and requirement algebra
//! they are converted to, index metadata, and the physical plan fragments that come out
//! the other end.
//!
//! ## Module Overview
//!
//! - **`expr`**: Values, scalar expressions and path expressions (the input substrate).
//! - **`path`**: Navigation-only field paths used as requirement keys and index keys.
//! - **`interval`**: Bounds, simple and compound intervals, DNF interval expressions.
//! - **`requirements`**: Partial schema keys, requirements, the ordered requirement
//!   multimap and projection renames.
//! - **`catalog`**: Index/scan metadata and the `Catalog` trait.
//! - **`stats`**: Statistics, selectivity heuristics and the `CardinalityEstimator` trait.
//! - **`properties`**: Required projections and collation.
//! - **`plan`**: Physical plan nodes, node ids and the node→CE map.
//! - **`ids`**: Per-session fresh name and node id generator.
//! - **`config`**: Planner configuration.
//! - **`error`**: Planning errors and contract violations.

pub mod catalog;
pub mod config;
pub mod error;
pub mod expr;
pub mod ids;
pub mod interval;
pub mod path;
pub mod plan;
pub mod properties;
pub mod requirements;
pub mod stats;
