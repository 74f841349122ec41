//! # Field Paths
//!
//! A [`FieldPath`] is the navigation-only subset of [`Path`]: a sequence of field
//! descents and array traversals with no predicates attached. Requirement keys, index
//! collation entries and non-multikey declarations are all expressed as field paths.
//!
//! The empty field path is the identity: it addresses the input value itself.
//!
//! Field paths are ordered step by step, with `Field` steps sorting before `Traverse`
//! and a proper prefix sorting before its extensions. Requirement sets rely on this
//! order being total and deterministic.

use crate::expr::Path;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PathStep {
    Field(String),
    Traverse,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FieldPath {
    steps: Vec<PathStep>,
}

impl FieldPath {
    pub fn identity() -> Self {
        Self { steps: Vec::new() }
    }

    pub fn from_steps(steps: Vec<PathStep>) -> Self {
        Self { steps }
    }

    /// Parse a dotted notation where `[]` segments denote array traversal,
    /// e.g. `"a.[].b"`. The empty string is the identity path.
    pub fn parse(dotted: &str) -> Self {
        if dotted.is_empty() {
            return Self::identity();
        }
        let steps = dotted
            .split('.')
            .map(|seg| {
                if seg == "[]" {
                    PathStep::Traverse
                } else {
                    PathStep::Field(seg.to_string())
                }
            })
            .collect();
        Self { steps }
    }

    pub fn then_field(mut self, name: impl Into<String>) -> Self {
        self.steps.push(PathStep::Field(name.into()));
        self
    }

    pub fn then_traverse(mut self) -> Self {
        self.steps.push(PathStep::Traverse);
        self
    }

    pub fn steps(&self) -> &[PathStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_identity(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn prepend(&mut self, step: PathStep) {
        self.steps.insert(0, step);
    }

    /// `self` followed by `suffix`.
    pub fn concat(&self, suffix: &FieldPath) -> FieldPath {
        let mut steps = self.steps.clone();
        steps.extend(suffix.steps.iter().cloned());
        FieldPath { steps }
    }

    pub fn contains_traverse(&self) -> bool {
        self.steps.iter().any(|s| matches!(s, PathStep::Traverse))
    }

    pub fn ends_with_traverse(&self) -> bool {
        matches!(self.steps.last(), Some(PathStep::Traverse))
    }

    /// The path with its single trailing `Traverse` removed, if it has one.
    pub fn without_trailing_traverse(&self) -> Option<FieldPath> {
        if !self.ends_with_traverse() {
            return None;
        }
        Some(FieldPath {
            steps: self.steps[..self.steps.len() - 1].to_vec(),
        })
    }

    /// If `prefix` is a prefix of (or equal to) `self`, return the remaining suffix.
    pub fn strip_prefix(&self, prefix: &FieldPath) -> Option<FieldPath> {
        if prefix.steps.len() > self.steps.len() || self.steps[..prefix.steps.len()] != prefix.steps[..] {
            return None;
        }
        Some(FieldPath {
            steps: self.steps[prefix.steps.len()..].to_vec(),
        })
    }

    /// True when `self` is exactly `other` followed by one trailing `Traverse`.
    ///
    /// Holds for any `other`, not only the identity path, so `a.b.[]` against `a.b`
    /// qualifies as well as `[]` against the identity.
    pub fn is_traverse_of(&self, other: &FieldPath) -> bool {
        self.steps.len() == other.steps.len() + 1
            && self.ends_with_traverse()
            && self.steps[..other.steps.len()] == other.steps[..]
    }

    /// Split off the leading field step: `a.[].b` becomes `("a", [].b)`.
    pub fn split_first_field(&self) -> Option<(&str, FieldPath)> {
        match self.steps.first() {
            Some(PathStep::Field(name)) => Some((
                name.as_str(),
                FieldPath {
                    steps: self.steps[1..].to_vec(),
                },
            )),
            _ => None,
        }
    }

    /// Build the equivalent [`Path`] ending in `leaf`.
    pub fn to_path(&self, leaf: Path) -> Path {
        self.steps.iter().rev().fold(leaf, |acc, step| match step {
            PathStep::Field(name) => Path::get(name.clone(), acc),
            PathStep::Traverse => Path::traverse(acc),
        })
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.steps.is_empty() {
            return write!(f, "Id");
        }
        for (i, step) in self.steps.iter().enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            match step {
                PathStep::Field(name) => write!(f, "{}", name)?,
                PathStep::Traverse => write!(f, "[]")?,
            }
        }
        Ok(())
    }
}
