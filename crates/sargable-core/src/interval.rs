//! # Bounds and Intervals
//!
//! An [`IntervalRequirement`] is a range `(low, high)` where each end is a
//! [`BoundRequirement`]: an expression plus an inclusiveness flag. The sentinels
//! `MinKey` and `MaxKey` stand for −∞ and +∞.
//!
//! Interval expressions are kept in disjunctive normal form using the generic
//! [`BoolExpr`] tree: a `Disjunction` of `Conjunction`s of atoms. Two aliases are used
//! throughout:
//!
//! - [`IntervalReqExpr`]: atoms are simple intervals over a single value.
//! - [`CompoundIntervalReqExpr`]: atoms are tuples of intervals, one per compound index
//!   field, built up positionally by [`combine_compound_intervals`].
//!
//! ## Folding
//!
//! Intersection is the cross product of conjunctions. After it, each conjunction is
//! normalized: atoms with comparable bounds (both constants, structurally identical
//! expressions, or one side a sentinel) are folded into one interval, conjunctions whose
//! folded interval is empty are dropped, and identical disjuncts are de-duplicated.
//! Atoms whose bounds cannot be compared (e.g. two different runtime variables) are kept
//! side by side in the conjunction.

use crate::error::{violation, ContractViolation};
use crate::expr::{Expr, Operation, Value};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoundRequirement {
    inclusive: bool,
    bound: Expr,
}

impl BoundRequirement {
    pub fn new(inclusive: bool, bound: Expr) -> Self {
        Self { inclusive, bound }
    }

    pub fn minus_inf() -> Self {
        Self::new(true, Expr::min_key())
    }

    pub fn plus_inf() -> Self {
        Self::new(true, Expr::max_key())
    }

    pub fn is_minus_inf(&self) -> bool {
        self.bound.as_constant() == Some(&Value::MinKey)
    }

    pub fn is_plus_inf(&self) -> bool {
        self.bound.as_constant() == Some(&Value::MaxKey)
    }

    pub fn is_inclusive(&self) -> bool {
        self.inclusive
    }

    pub fn bound(&self) -> &Expr {
        &self.bound
    }

    pub fn is_constant(&self) -> bool {
        self.bound.fold().is_some()
    }
}

/// Compare two bound expressions. `None` when the order cannot be decided statically.
fn compare_bound_exprs(a: &Expr, b: &Expr) -> Option<Ordering> {
    if a == b {
        return Some(Ordering::Equal);
    }
    match (a.fold(), b.fold()) {
        (Some(x), Some(y)) => Some(x.compare(&y)),
        (Some(Value::MinKey), None) => Some(Ordering::Less),
        (Some(Value::MaxKey), None) => Some(Ordering::Greater),
        (None, Some(Value::MinKey)) => Some(Ordering::Greater),
        (None, Some(Value::MaxKey)) => Some(Ordering::Less),
        _ => None,
    }
}

/// Outcome of intersecting two simple intervals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntervalFold {
    Interval(IntervalRequirement),
    Empty,
    /// Bounds could not be compared; both intervals must be kept.
    Incomparable,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IntervalRequirement {
    low_bound: BoundRequirement,
    high_bound: BoundRequirement,
}

impl IntervalRequirement {
    pub fn new(low_bound: BoundRequirement, high_bound: BoundRequirement) -> Self {
        Self { low_bound, high_bound }
    }

    pub fn fully_open() -> Self {
        Self::new(BoundRequirement::minus_inf(), BoundRequirement::plus_inf())
    }

    /// `[bound, bound]`.
    pub fn equality(bound: Expr) -> Self {
        Self::new(BoundRequirement::new(true, bound.clone()), BoundRequirement::new(true, bound))
    }

    pub fn low_bound(&self) -> &BoundRequirement {
        &self.low_bound
    }

    pub fn high_bound(&self) -> &BoundRequirement {
        &self.high_bound
    }

    pub fn is_fully_open(&self) -> bool {
        self.low_bound.is_minus_inf()
            && self.low_bound.is_inclusive()
            && self.high_bound.is_plus_inf()
            && self.high_bound.is_inclusive()
    }

    pub fn is_equality(&self) -> bool {
        self.low_bound.is_inclusive() && self.high_bound.is_inclusive() && self.low_bound.bound == self.high_bound.bound
    }

    /// Swap the ends, for scanning a descending index field.
    pub fn reverse(&self) -> Self {
        Self::new(self.high_bound.clone(), self.low_bound.clone())
    }

    /// Whether the interval is provably empty from constant bounds. Sentinel-only
    /// intervals such as `[MaxKey, MinKey]` (a reversed open interval) count too.
    pub fn is_inverted(&self) -> bool {
        match compare_bound_exprs(&self.low_bound.bound, &self.high_bound.bound) {
            Some(Ordering::Greater) => true,
            Some(Ordering::Equal) => !(self.low_bound.is_inclusive() && self.high_bound.is_inclusive()),
            _ => false,
        }
    }

    /// Intersect two intervals over the same value.
    pub fn intersect(&self, other: &IntervalRequirement) -> IntervalFold {
        let low = match compare_bound_exprs(&self.low_bound.bound, &other.low_bound.bound) {
            Some(Ordering::Less) => other.low_bound.clone(),
            Some(Ordering::Greater) => self.low_bound.clone(),
            Some(Ordering::Equal) => BoundRequirement::new(
                self.low_bound.inclusive && other.low_bound.inclusive,
                self.low_bound.bound.clone(),
            ),
            None => return IntervalFold::Incomparable,
        };
        let high = match compare_bound_exprs(&self.high_bound.bound, &other.high_bound.bound) {
            Some(Ordering::Less) => self.high_bound.clone(),
            Some(Ordering::Greater) => other.high_bound.clone(),
            Some(Ordering::Equal) => BoundRequirement::new(
                self.high_bound.inclusive && other.high_bound.inclusive,
                self.high_bound.bound.clone(),
            ),
            None => return IntervalFold::Incomparable,
        };
        let result = IntervalRequirement::new(low, high);
        if result.is_inverted() {
            IntervalFold::Empty
        } else {
            IntervalFold::Interval(result)
        }
    }

    /// True when the interval is provably disjoint from `null`: the low end sits above
    /// null or the high end sits below it.
    pub fn excludes_null(&self) -> bool {
        let low_op = if self.low_bound.is_inclusive() {
            Operation::Gt
        } else {
            Operation::Gte
        };
        let high_op = if self.high_bound.is_inclusive() {
            Operation::Lt
        } else {
            Operation::Lte
        };
        let folds_true = |op, bound: &Expr| {
            Expr::binary(op, bound.clone(), Expr::null()).fold() == Some(Value::Bool(true))
        };
        folds_true(low_op, &self.low_bound.bound) || folds_true(high_op, &self.high_bound.bound)
    }
}

impl fmt::Display for IntervalRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let open = if self.low_bound.inclusive { "[" } else { "(" };
        let close = if self.high_bound.inclusive { "]" } else { ")" };
        let low = if self.low_bound.is_minus_inf() {
            "-inf".to_string()
        } else if self.low_bound.is_plus_inf() {
            "+inf".to_string()
        } else {
            self.low_bound.bound.to_string()
        };
        let high = if self.high_bound.is_plus_inf() {
            "+inf".to_string()
        } else if self.high_bound.is_minus_inf() {
            "-inf".to_string()
        } else {
            self.high_bound.bound.to_string()
        };
        write!(f, "{}{}, {}{}", open, low, high, close)
    }
}

/// A boolean tree over atoms. Interval expressions are kept in the two-level DNF shape
/// `Disjunction[Conjunction[Atom..]..]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BoolExpr<T> {
    Atom(T),
    Conjunction(Vec<BoolExpr<T>>),
    Disjunction(Vec<BoolExpr<T>>),
}

/// Bottom-up fold over a [`BoolExpr`], one hook per node kind.
pub trait BoolExprTransport<T> {
    type Output;

    fn atom(&mut self, atom: &T) -> Self::Output;
    fn conjunction(&mut self, children: Vec<Self::Output>) -> Self::Output;
    fn disjunction(&mut self, children: Vec<Self::Output>) -> Self::Output;
}

impl<T: Clone + PartialEq> BoolExpr<T> {
    /// `Disjunction[Conjunction[Atom(atom)]]`.
    pub fn singular_dnf(atom: T) -> Self {
        BoolExpr::Disjunction(vec![BoolExpr::Conjunction(vec![BoolExpr::Atom(atom)])])
    }

    /// The unsatisfiable expression: a disjunction with no branches.
    pub fn empty() -> Self {
        BoolExpr::Disjunction(Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, BoolExpr::Disjunction(children) if children.is_empty())
    }

    /// The single atom of a singular DNF, if that is the shape.
    pub fn singular_atom(&self) -> Option<&T> {
        match self {
            BoolExpr::Disjunction(disjuncts) if disjuncts.len() == 1 => match &disjuncts[0] {
                BoolExpr::Conjunction(atoms) if atoms.len() == 1 => match &atoms[0] {
                    BoolExpr::Atom(a) => Some(a),
                    _ => None,
                },
                _ => None,
            },
            _ => None,
        }
    }

    pub fn is_dnf(&self) -> bool {
        match self {
            BoolExpr::Disjunction(disjuncts) => disjuncts.iter().all(|d| match d {
                BoolExpr::Conjunction(atoms) => atoms.iter().all(|a| matches!(a, BoolExpr::Atom(_))),
                _ => false,
            }),
            _ => false,
        }
    }

    /// The conjunctions of a DNF expression, each as its list of atoms.
    pub fn dnf_conjunctions(&self) -> Vec<Vec<&T>> {
        let mut out = Vec::new();
        if let BoolExpr::Disjunction(disjuncts) = self {
            for d in disjuncts {
                if let BoolExpr::Conjunction(atoms) = d {
                    out.push(
                        atoms
                            .iter()
                            .filter_map(|a| match a {
                                BoolExpr::Atom(x) => Some(x),
                                _ => None,
                            })
                            .collect(),
                    );
                }
            }
        }
        out
    }

    /// Build a DNF expression from atom lists, dropping duplicate conjunctions.
    pub fn from_conjunctions(conjunctions: Vec<Vec<T>>) -> Self {
        let mut disjuncts: Vec<BoolExpr<T>> = Vec::new();
        for atoms in conjunctions {
            let conj = BoolExpr::Conjunction(atoms.into_iter().map(BoolExpr::Atom).collect());
            if !disjuncts.contains(&conj) {
                disjuncts.push(conj);
            }
        }
        BoolExpr::Disjunction(disjuncts)
    }

    pub fn transport<X: BoolExprTransport<T>>(&self, t: &mut X) -> X::Output {
        match self {
            BoolExpr::Atom(a) => t.atom(a),
            BoolExpr::Conjunction(children) => {
                let out = children.iter().map(|c| c.transport(t)).collect();
                t.conjunction(out)
            }
            BoolExpr::Disjunction(children) => {
                let out = children.iter().map(|c| c.transport(t)).collect();
                t.disjunction(out)
            }
        }
    }
}

pub type IntervalReqExpr = BoolExpr<IntervalRequirement>;

impl IntervalReqExpr {
    pub fn fully_open_dnf() -> Self {
        Self::singular_dnf(IntervalRequirement::fully_open())
    }

    pub fn is_fully_open(&self) -> bool {
        self.singular_atom().map_or(false, |i| i.is_fully_open())
    }

    /// The single equality interval of a singular DNF.
    pub fn singular_equality(&self) -> Option<&Expr> {
        self.singular_atom()
            .filter(|i| i.is_equality())
            .map(|i| i.low_bound().bound())
    }

    /// OR of two DNF interval expressions.
    pub fn union(&self, other: &IntervalReqExpr) -> IntervalReqExpr {
        let mut conjunctions: Vec<Vec<IntervalRequirement>> = Vec::new();
        for conj in self.dnf_conjunctions().into_iter().chain(other.dnf_conjunctions()) {
            conjunctions.push(conj.into_iter().cloned().collect());
        }
        Self::from_conjunctions(conjunctions)
    }

    /// AND of two DNF interval expressions. Returns `None` when the result is empty.
    pub fn intersect(&self, other: &IntervalReqExpr) -> Option<IntervalReqExpr> {
        let mut conjunctions = Vec::new();
        for left in self.dnf_conjunctions() {
            for right in other.dnf_conjunctions() {
                let atoms: Vec<IntervalRequirement> = left.iter().chain(right.iter()).map(|a| (*a).clone()).collect();
                conjunctions.push(atoms);
            }
        }
        Self::from_conjunctions(conjunctions).normalize()
    }

    /// Fold each conjunction, drop empty ones, de-duplicate. `None` when nothing remains.
    pub fn normalize(&self) -> Option<IntervalReqExpr> {
        let mut conjunctions = Vec::new();
        for conj in self.dnf_conjunctions() {
            if let Some(folded) = fold_conjunction(conj.into_iter().cloned().collect()) {
                conjunctions.push(folded);
            }
        }
        let result = Self::from_conjunctions(conjunctions);
        if result.is_empty() {
            None
        } else {
            Some(result)
        }
    }

    /// Whether some branch may admit `null`. A conjunction is null-free as soon as one of
    /// its atoms is; the expression is null-free when every conjunction is.
    pub fn may_contain_null(&self) -> bool {
        self.transport(&mut NullCheck)
    }
}

struct NullCheck;

impl BoolExprTransport<IntervalRequirement> for NullCheck {
    type Output = bool;

    fn atom(&mut self, atom: &IntervalRequirement) -> bool {
        !atom.excludes_null()
    }

    fn conjunction(&mut self, children: Vec<bool>) -> bool {
        children.into_iter().all(|c| c)
    }

    fn disjunction(&mut self, children: Vec<bool>) -> bool {
        children.into_iter().any(|c| c)
    }
}

/// Fold the atoms of one conjunction. `None` if the conjunction is empty.
fn fold_conjunction(atoms: Vec<IntervalRequirement>) -> Option<Vec<IntervalRequirement>> {
    let mut acc: Vec<IntervalRequirement> = Vec::new();
    'next: for atom in atoms {
        for existing in acc.iter_mut() {
            match existing.intersect(&atom) {
                IntervalFold::Interval(folded) => {
                    *existing = folded;
                    continue 'next;
                }
                IntervalFold::Empty => return None,
                IntervalFold::Incomparable => {}
            }
        }
        if atom.is_inverted() {
            return None;
        }
        acc.push(atom);
    }
    if acc.len() > 1 {
        acc.retain(|i| !i.is_fully_open());
        if acc.is_empty() {
            acc.push(IntervalRequirement::fully_open());
        }
    }
    Some(acc)
}

impl fmt::Display for IntervalReqExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoolExpr::Atom(i) => write!(f, "{}", i),
            BoolExpr::Conjunction(children) => {
                write!(f, "{{")?;
                for (i, c) in children.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ^ ")?;
                    }
                    write!(f, "{}", c)?;
                }
                write!(f, "}}")
            }
            BoolExpr::Disjunction(children) => {
                write!(f, "{{")?;
                for (i, c) in children.iter().enumerate() {
                    if i > 0 {
                        write!(f, " U ")?;
                    }
                    write!(f, "{}", c)?;
                }
                write!(f, "}}")
            }
        }
    }
}

/// One interval per compound index field, in index order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompoundIntervalRequirement {
    intervals: Vec<IntervalRequirement>,
}

impl CompoundIntervalRequirement {
    pub fn new(intervals: Vec<IntervalRequirement>) -> Self {
        Self { intervals }
    }

    pub fn intervals(&self) -> &[IntervalRequirement] {
        &self.intervals
    }

    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    pub fn push(&mut self, interval: IntervalRequirement) {
        self.intervals.push(interval);
    }

    pub fn is_equality(&self) -> bool {
        self.intervals.iter().all(|i| i.is_equality())
    }
}

impl fmt::Display for CompoundIntervalRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, interval) in self.intervals.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", interval)?;
        }
        write!(f, "}}")
    }
}

pub type CompoundIntervalReqExpr = BoolExpr<CompoundIntervalRequirement>;

impl CompoundIntervalReqExpr {
    /// A compound expression with zero fields: one conjunction holding one empty tuple.
    pub fn unit() -> Self {
        Self::singular_dnf(CompoundIntervalRequirement::default())
    }

    /// Number of fields in the tuples (all atoms must agree).
    pub fn arity(&self) -> usize {
        let conjunctions = self.dnf_conjunctions();
        let arity = conjunctions
            .first()
            .and_then(|c| c.first())
            .map_or(0, |a| a.len());
        for conj in &conjunctions {
            for atom in conj {
                if atom.len() != arity {
                    violation(ContractViolation::MalformedInterval(format!(
                        "compound atom of arity {} in expression of arity {}",
                        atom.len(),
                        arity
                    )));
                }
            }
        }
        arity
    }
}

/// Extend every compound atom in `target` by one field constrained by `source`.
///
/// The result is the cross product of `target` and `source` conjunctions, with the
/// source interval appended to each target tuple (reversed for descending fields).
/// Returns `false` and leaves `target` untouched when the field cannot narrow the scan:
/// a constrained field after a range (non-equality) prefix does not yield a contiguous
/// index range.
pub fn combine_compound_intervals(
    target: &mut CompoundIntervalReqExpr,
    source: &IntervalReqExpr,
    reverse: bool,
) -> bool {
    let adjust = |i: &IntervalRequirement| if reverse { i.reverse() } else { i.clone() };

    if source.is_fully_open() {
        let open = adjust(&IntervalRequirement::fully_open());
        extend_all(target, &[vec![open]]);
        return true;
    }

    let prefix_is_equality = target
        .dnf_conjunctions()
        .iter()
        .all(|conj| conj.iter().all(|a| a.is_equality()));
    if !prefix_is_equality {
        return false;
    }

    let source_conjunctions: Vec<Vec<IntervalRequirement>> = source
        .dnf_conjunctions()
        .into_iter()
        .map(|conj| conj.into_iter().map(&adjust).collect())
        .collect();
    if source_conjunctions.is_empty() {
        return false;
    }
    extend_all(target, &source_conjunctions);
    true
}

fn extend_all(target: &mut CompoundIntervalReqExpr, source: &[Vec<IntervalRequirement>]) {
    let mut conjunctions = Vec::new();
    for target_conj in target.dnf_conjunctions() {
        for source_conj in source {
            let mut atoms = Vec::new();
            for t in &target_conj {
                for s in source_conj {
                    let mut extended = (*t).clone();
                    extended.push(s.clone());
                    atoms.push(extended);
                }
            }
            conjunctions.push(atoms);
        }
    }
    *target = CompoundIntervalReqExpr::from_conjunctions(conjunctions);
}
