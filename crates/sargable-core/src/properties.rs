//! # Physical Properties
//!
//! Properties describe what a parent plan requires from the fragment the sargable
//! stages produce:
//!
//! - **Projections**: the bindings the fragment must deliver, in a stable order.
//! - **Collation**: an optional required output ordering over projections.
//!
//! Merge-join RID intersection requires both inputs to provide ascending rid order;
//! [`PhysProps::satisfied_by`] checks what an input delivers against that requirement.

use crate::catalog::CollationOp;
use crate::requirements::ProjectionName;
use serde::{Deserialize, Serialize};

/// Insertion-ordered set of projection names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProjectionSet {
    names: Vec<ProjectionName>,
}

impl ProjectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if the name was already present.
    pub fn insert(&mut self, name: impl Into<ProjectionName>) -> bool {
        let name = name.into();
        if self.contains(&name) {
            return false;
        }
        self.names.push(name);
        true
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    pub fn erase(&mut self, name: &str) -> bool {
        let before = self.names.len();
        self.names.retain(|n| n != name);
        before != self.names.len()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProjectionName> {
        self.names.iter()
    }

    pub fn to_vec(&self) -> Vec<ProjectionName> {
        self.names.clone()
    }
}

impl<S: Into<ProjectionName>> FromIterator<S> for ProjectionSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = Self::new();
        for name in iter {
            set.insert(name);
        }
        set
    }
}

pub type CollationSpec = Vec<(ProjectionName, CollationOp)>;

/// Physical properties required of (or provided by) a plan fragment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PhysProps {
    pub projections: ProjectionSet,
    pub collation: Option<CollationSpec>,
}

impl PhysProps {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn with_projections(projections: ProjectionSet) -> Self {
        Self {
            projections,
            collation: None,
        }
    }

    pub fn with_collation(mut self, collation: CollationSpec) -> Self {
        self.collation = Some(collation);
        self
    }

    /// Check if this requirement is satisfied by what `provided` delivers.
    ///
    /// - **Collation**: the required order must be a prefix of (or equal to) the provided
    ///   order. `None` is always satisfied.
    /// - **Projections**: every required projection must be provided.
    pub fn satisfied_by(&self, provided: &PhysProps) -> bool {
        let collation_ok = match (&self.collation, &provided.collation) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(required), Some(provided)) => {
                required.len() <= provided.len() && required.iter().zip(provided.iter()).all(|(r, p)| r == p)
            }
        };
        collation_ok && self.projections.iter().all(|p| provided.projections.contains(p))
    }
}
