//! # Error Types
//!
//! Two very different kinds of failure exist in the sargable pipeline:
//!
//! - **Expected non-convertibility** is not an error at all. A predicate shape, path shape
//!   or index mismatch that the algebra does not support is reported as `None` and the
//!   caller keeps the original predicate as a residual filter.
//! - **Contract violations** mean the optimizer itself is defective (a duplicate synthetic
//!   slot, a cyclic rename chain, an inverted interval handed to lowering...). These are
//!   never recovered from. [`violation`] logs the violation and panics.
//!
//! [`PlanningError`] covers the few recoverable conditions at the planner's outer edge,
//! such as asking for a scan definition the catalog does not know.

use thiserror::Error;

/// Recoverable errors surfaced by the planner entry point and configuration validation.
#[derive(Debug, Error)]
pub enum PlanningError {
    #[error("unknown scan definition: {0}")]
    UnknownScanDefinition(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Internal invariants of the optimizer. Hitting one of these is a bug.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContractViolation {
    #[error("duplicate projection for index field {field}: {projection}")]
    DuplicateFieldProjection { field: String, projection: String },

    #[error("duplicate cardinality estimate for plan node {0}")]
    DuplicateNodeEstimate(u32),

    #[error("projection rename chain is cyclic at {0}")]
    CyclicRename(String),

    #[error("requirement chaining revisited key {0}")]
    RequirementChainLoop(String),

    #[error("multiple requirements for non-multikey key {0}")]
    MultipleNonMultikeyMatches(String),

    #[error("existing key {0} refers to the binding of the requirement being added")]
    SelfReferentialBinding(String),

    #[error("conflicting output bindings {existing} and {incoming} while merging {key}")]
    ConflictingBindings {
        key: String,
        existing: String,
        incoming: String,
    },

    #[error("non-multikey path {0} contains an array traversal")]
    InconsistentMultikeyPath(String),

    #[error("index {0} has an empty collation path")]
    EmptyIndexPath(String),

    #[error("malformed interval: {0}")]
    MalformedInterval(String),

    #[error("cannot lower variable index bound with bound projection")]
    VariableBoundWithBinding,

    #[error("residual requirement on {0} has neither a binding nor a proper path")]
    TautologicalResidual(String),

    #[error("cannot combine compound interval with an open interval")]
    OpenIntervalCombine,

    #[error("invalid index key name: {0}")]
    InvalidIndexKeyName(String),
}

/// Report a contract violation and abort the current planning attempt.
///
/// Never returns. The violation is logged at `error` level before the panic so the
/// message survives in environments where the panic payload is swallowed.
#[track_caller]
pub fn violation(v: ContractViolation) -> ! {
    tracing::error!(violation = %v, "optimizer contract violation");
    panic!("optimizer contract violation: {v}");
}
