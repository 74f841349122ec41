//! # Expression and Path Types
//!
//! This module defines the scalar expression language the sargable algebra operates on.
//! It is organized into three layers:
//!
//! ## Values (`Value`)
//! Constants appearing in predicates and the documents they are evaluated against.
//! Values of different types are totally ordered by a
//! canonical type rank so that interval bounds can be compared across types, with the
//! two sentinels `MinKey` and `MaxKey` standing for −∞ and +∞.
//!
//! ## Scalar Expressions (`Expr`)
//! Constants, variable references, binary operations and function calls, plus the two
//! path evaluation forms: `EvalPath` (extract a value) and `EvalFilter` (test a predicate
//! against a document). Filters reaching the optimizer are `EvalFilter` trees.
//!
//! ## Paths (`Path`)
//! Paths navigate into documents. `Get` descends into a named field, `Traverse` fans out
//! over array elements, `Compare` tests the current value, and the two compositions combine
//! subpaths conjunctively (`ComposeM`) or disjunctively (`ComposeA`). `Identity` marks the
//! end of a navigation chain.

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// A constant value.
///
/// Uses `OrderedFloat` for `f64` so that values can participate in Eq/Hash (interval and
/// requirement equality relies on it). Structural equality distinguishes `Int64(3)` from
/// `Float64(3.0)`; use [`Value::compare`] for the semantic order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Value {
    /// Sentinel below every other value.
    MinKey,
    /// Absence of a value (a missing field).
    Nothing,
    Null,
    Int64(i64),
    /// 64-bit floating point, wrapped in OrderedFloat for Eq/Hash support.
    Float64(OrderedFloat<f64>),
    Utf8(String),
    /// A document: named fields in name order.
    Object(BTreeMap<String, Value>),
    Array(Vec<Value>),
    Bool(bool),
    /// Sentinel above every other value.
    MaxKey,
}

impl Value {
    /// Rank of the value's type in the canonical cross-type order.
    pub fn canonical_rank(&self) -> u8 {
        match self {
            Value::MinKey => 0,
            Value::Nothing => 1,
            Value::Null => 2,
            Value::Int64(_) | Value::Float64(_) => 3,
            Value::Utf8(_) => 4,
            Value::Object(_) => 5,
            Value::Array(_) => 6,
            Value::Bool(_) => 7,
            Value::MaxKey => 8,
        }
    }

    /// Total order over values: first by canonical type rank, then within the type.
    /// Integers and floats compare numerically with each other.
    pub fn compare(&self, other: &Value) -> Ordering {
        let rank = self.canonical_rank().cmp(&other.canonical_rank());
        if rank != Ordering::Equal {
            return rank;
        }
        match (self, other) {
            (Value::Int64(a), Value::Int64(b)) => a.cmp(b),
            (Value::Int64(a), Value::Float64(b)) => OrderedFloat(*a as f64).cmp(b),
            (Value::Float64(a), Value::Int64(b)) => a.cmp(&OrderedFloat(*b as f64)),
            (Value::Float64(a), Value::Float64(b)) => a.cmp(b),
            (Value::Utf8(a), Value::Utf8(b)) => a.cmp(b),
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Array(a), Value::Array(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    let ord = x.compare(y);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                a.len().cmp(&b.len())
            }
            (Value::Object(a), Value::Object(b)) => {
                for ((ka, va), (kb, vb)) in a.iter().zip(b.iter()) {
                    let ord = ka.cmp(kb).then_with(|| va.compare(vb));
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                a.len().cmp(&b.len())
            }
            _ => Ordering::Equal,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(elems) => Some(elems),
            _ => None,
        }
    }

    /// Field `name` of an object; `None` for non-objects and missing fields.
    pub fn get_field(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Object(fields) => fields.get(name),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::MinKey => write!(f, "MinKey"),
            Value::Nothing => write!(f, "Nothing"),
            Value::Null => write!(f, "null"),
            Value::Int64(v) => write!(f, "{}", v),
            Value::Float64(v) => write!(f, "{}", v),
            Value::Utf8(s) => write!(f, "\"{}\"", s),
            Value::Bool(b) => write!(f, "{}", b),
            Value::MaxKey => write!(f, "MaxKey"),
            Value::Object(fields) => {
                write!(f, "{{")?;
                for (i, (k, v)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                write!(f, "}}")
            }
            Value::Array(elems) => {
                write!(f, "[")?;
                for (i, e) in elems.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", e)?;
                }
                write!(f, "]")
            }
        }
    }
}

/// Binary operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    Add,
    Sub,
    Mult,
    Div,
    And,
    Or,
}

impl Operation {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            Operation::Eq | Operation::Neq | Operation::Lt | Operation::Lte | Operation::Gt | Operation::Gte
        )
    }

    /// Evaluate a comparison between two constants.
    ///
    /// Returns `None` for non-comparison operations and when either side is `Nothing`
    /// (comparing against a missing value has no boolean outcome).
    pub fn compare_values(self, left: &Value, right: &Value) -> Option<bool> {
        if matches!(left, Value::Nothing) || matches!(right, Value::Nothing) {
            return None;
        }
        let ord = left.compare(right);
        match self {
            Operation::Eq => Some(ord == Ordering::Equal),
            Operation::Neq => Some(ord != Ordering::Equal),
            Operation::Lt => Some(ord == Ordering::Less),
            Operation::Lte => Some(ord != Ordering::Greater),
            Operation::Gt => Some(ord == Ordering::Greater),
            Operation::Gte => Some(ord != Ordering::Less),
            _ => None,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Operation::Eq => "=",
            Operation::Neq => "!=",
            Operation::Lt => "<",
            Operation::Lte => "<=",
            Operation::Gt => ">",
            Operation::Gte => ">=",
            Operation::Add => "+",
            Operation::Sub => "-",
            Operation::Mult => "*",
            Operation::Div => "/",
            Operation::And => "AND",
            Operation::Or => "OR",
        };
        write!(f, "{}", s)
    }
}

/// Scalar expressions.
///
/// Filters handed to the requirement builder are `EvalFilter` nodes; interval bounds are
/// arbitrary expressions (usually constants, sometimes variables bound at runtime).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Expr {
    Constant(Value),
    /// Reference to a named projection (binding).
    Variable(String),
    BinaryOp {
        op: Operation,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    FunctionCall {
        name: String,
        args: Vec<Expr>,
    },
    /// Evaluate `path` against `input`, producing a value.
    EvalPath { path: Box<Path>, input: Box<Expr> },
    /// Evaluate `path` against `input` as a predicate.
    EvalFilter { path: Box<Path>, input: Box<Expr> },
}

impl Expr {
    pub fn constant(v: Value) -> Self {
        Expr::Constant(v)
    }

    pub fn int64(v: i64) -> Self {
        Expr::Constant(Value::Int64(v))
    }

    pub fn utf8(s: impl Into<String>) -> Self {
        Expr::Constant(Value::Utf8(s.into()))
    }

    pub fn boolean(b: bool) -> Self {
        Expr::Constant(Value::Bool(b))
    }

    pub fn null() -> Self {
        Expr::Constant(Value::Null)
    }

    pub fn nothing() -> Self {
        Expr::Constant(Value::Nothing)
    }

    pub fn min_key() -> Self {
        Expr::Constant(Value::MinKey)
    }

    pub fn max_key() -> Self {
        Expr::Constant(Value::MaxKey)
    }

    pub fn var(name: impl Into<String>) -> Self {
        Expr::Variable(name.into())
    }

    pub fn binary(op: Operation, left: Expr, right: Expr) -> Self {
        Expr::BinaryOp {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn function(name: impl Into<String>, args: Vec<Expr>) -> Self {
        Expr::FunctionCall {
            name: name.into(),
            args,
        }
    }

    pub fn eval_path(path: Path, input: Expr) -> Self {
        Expr::EvalPath {
            path: Box::new(path),
            input: Box::new(input),
        }
    }

    pub fn eval_filter(path: Path, input: Expr) -> Self {
        Expr::EvalFilter {
            path: Box::new(path),
            input: Box::new(input),
        }
    }

    pub fn as_constant(&self) -> Option<&Value> {
        match self {
            Expr::Constant(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_variable(&self) -> Option<&str> {
        match self {
            Expr::Variable(name) => Some(name),
            _ => None,
        }
    }

    /// Fold the expression to a constant when it is a constant or a comparison of
    /// foldable operands.
    pub fn fold(&self) -> Option<Value> {
        match self {
            Expr::Constant(v) => Some(v.clone()),
            Expr::BinaryOp { op, left, right } if op.is_comparison() => {
                let l = left.fold()?;
                let r = right.fold()?;
                op.compare_values(&l, &r).map(Value::Bool)
            }
            _ => None,
        }
    }

    /// Collect the names of all variables referenced by the expression.
    pub fn variables(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_variables(&mut out);
        out
    }

    fn collect_variables<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expr::Constant(_) => {}
            Expr::Variable(name) => out.push(name),
            Expr::BinaryOp { left, right, .. } => {
                left.collect_variables(out);
                right.collect_variables(out);
            }
            Expr::FunctionCall { args, .. } => {
                for a in args {
                    a.collect_variables(out);
                }
            }
            Expr::EvalPath { path, input } | Expr::EvalFilter { path, input } => {
                path.collect_variables(out);
                input.collect_variables(out);
            }
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Constant(v) => write!(f, "{}", v),
            Expr::Variable(name) => write!(f, "{}", name),
            Expr::BinaryOp { op, left, right } => write!(f, "({} {} {})", left, op, right),
            Expr::FunctionCall { name, args } => {
                write!(f, "{}(", name)?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", a)?;
                }
                write!(f, ")")
            }
            Expr::EvalPath { path, input } => write!(f, "EvalPath({}, {})", path, input),
            Expr::EvalFilter { path, input } => write!(f, "EvalFilter({}, {})", path, input),
        }
    }
}

/// Path expressions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Path {
    Identity,
    /// Descend into field `name`, then continue with `path`.
    Get { name: String, path: Box<Path> },
    /// Apply `path` to every element of an array (or to a non-array value itself).
    Traverse { path: Box<Path> },
    /// Compare the current value against `value`.
    Compare { op: Operation, value: Box<Expr> },
    /// Substitute `Default` when the input is missing.
    Default(Box<Expr>),
    /// Both subpaths must hold.
    ComposeM(Box<Path>, Box<Path>),
    /// Either subpath may hold.
    ComposeA(Box<Path>, Box<Path>),
}

impl Path {
    pub fn get(name: impl Into<String>, path: Path) -> Self {
        Path::Get {
            name: name.into(),
            path: Box::new(path),
        }
    }

    pub fn traverse(path: Path) -> Self {
        Path::Traverse { path: Box::new(path) }
    }

    pub fn compare(op: Operation, value: Expr) -> Self {
        Path::Compare {
            op,
            value: Box::new(value),
        }
    }

    pub fn default_value(value: Expr) -> Self {
        Path::Default(Box::new(value))
    }

    pub fn compose_m(left: Path, right: Path) -> Self {
        Path::ComposeM(Box::new(left), Box::new(right))
    }

    pub fn compose_a(left: Path, right: Path) -> Self {
        Path::ComposeA(Box::new(left), Box::new(right))
    }

    pub fn is_identity(&self) -> bool {
        matches!(self, Path::Identity)
    }

    /// Compose two paths conjunctively, dropping `Identity` operands.
    pub fn maybe_compose_m(self, other: Path) -> Path {
        match (self, other) {
            (Path::Identity, p) | (p, Path::Identity) => p,
            (l, r) => Path::compose_m(l, r),
        }
    }

    /// Flatten a tree of conjunctive compositions into its operands, left to right.
    /// A path that is not a `ComposeM` yields itself.
    pub fn collect_composed(&self) -> Vec<&Path> {
        let mut out = Vec::new();
        self.collect_composed_into(&mut out);
        out
    }

    fn collect_composed_into<'a>(&'a self, out: &mut Vec<&'a Path>) {
        match self {
            Path::ComposeM(l, r) => {
                l.collect_composed_into(out);
                r.collect_composed_into(out);
            }
            other => out.push(other),
        }
    }

    /// Replace every `Identity` leaf of the navigation chain with `suffix`.
    pub fn append(self, suffix: Path) -> Path {
        match self {
            Path::Identity => suffix,
            Path::Get { name, path } => Path::get(name, path.append(suffix)),
            Path::Traverse { path } => Path::traverse(path.append(suffix)),
            Path::ComposeM(l, r) => Path::compose_m(l.append(suffix.clone()), r.append(suffix)),
            Path::ComposeA(l, r) => Path::compose_a(l.append(suffix.clone()), r.append(suffix)),
            other @ (Path::Compare { .. } | Path::Default(_)) => other,
        }
    }

    fn collect_variables<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Path::Identity => {}
            Path::Get { path, .. } | Path::Traverse { path } => path.collect_variables(out),
            Path::Compare { value, .. } => value.collect_variables(out),
            Path::Default(e) => e.collect_variables(out),
            Path::ComposeM(l, r) | Path::ComposeA(l, r) => {
                l.collect_variables(out);
                r.collect_variables(out);
            }
        }
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Path::Identity => write!(f, "Id"),
            Path::Get { name, path } => write!(f, "Get[{}] {}", name, path),
            Path::Traverse { path } => write!(f, "Traverse {}", path),
            Path::Compare { op, value } => write!(f, "Cmp[{}] {}", op, value),
            Path::Default(e) => write!(f, "Default[{}]", e),
            Path::ComposeM(l, r) => write!(f, "({} && {})", l, r),
            Path::ComposeA(l, r) => write!(f, "({} || {})", l, r),
        }
    }
}
