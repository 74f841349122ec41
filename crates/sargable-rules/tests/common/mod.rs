//! Test-only interpreter for lowered plan fragments.
//!
//! Executes a `PlanNode` tree over an in-memory collection of documents so that the
//! alternatives produced by the planner can be compared against a direct evaluation of
//! the original filter.
//!
//! ## Semantics
//!
//! - Rows are maps from projection name to `Value`; a projection a row lacks reads as
//!   `Nothing`.
//! - The rid of document `i` is `Int64(i)`.
//! - Index keys are generated per index field by following the field path: a missing
//!   field yields `Null` (index keys conflate null and missing), a traversal over an
//!   array yields one key per element, and a traversal over a non-array yields the value
//!   itself. A document contributes one index entry per combination of field keys.
//! - Path filters follow the expression substrate: `Get` on a missing field yields
//!   `Nothing`, comparisons against `Nothing` are false, `Traverse` over an array holds
//!   when some element satisfies the inner path.
//!
//! Test data keeps to documents without empty arrays; an empty array has no index key
//! that every interval treats the same way as the filters do.

#![allow(dead_code)]

use sargable_core::catalog::{CollationOp, InMemoryCatalog, ScanDefinition};
use sargable_core::expr::{Expr, Operation, Path, Value};
use sargable_core::interval::IntervalRequirement;
use sargable_core::path::{FieldPath, PathStep};
use sargable_core::plan::{PhysicalOp, PlanNode};
use sargable_core::stats::Statistics;
use sargable_rules::candidate::decode_index_key_name;
use sargable_rules::PlanAlternative;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

pub type Row = BTreeMap<String, Value>;

/// A named collection with its index metadata.
#[derive(Debug, Clone)]
pub struct TestCollection {
    pub name: String,
    pub docs: Vec<Value>,
    pub scan_def: ScanDefinition,
}

impl TestCollection {
    pub fn new(name: &str, scan_def: ScanDefinition, docs: Vec<Value>) -> Self {
        Self {
            name: name.to_string(),
            docs,
            scan_def,
        }
    }

    pub fn catalog(&self) -> InMemoryCatalog {
        let mut catalog = InMemoryCatalog::new();
        catalog.add_scan(
            self.name.clone(),
            self.scan_def.clone(),
            Statistics::new(self.docs.len().max(1) as f64, 1000.0),
        );
        catalog
    }

    /// Rids of the documents satisfying `filter` when it is evaluated directly.
    pub fn reference_rids(&self, scan_projection: &str, filter: &Expr) -> BTreeSet<i64> {
        self.docs
            .iter()
            .enumerate()
            .filter(|(_, doc)| {
                let mut row = Row::new();
                row.insert(scan_projection.to_string(), (*doc).clone());
                is_true(&eval_expr(filter, &row))
            })
            .map(|(rid, _)| rid as i64)
            .collect()
    }

    /// Distinct rids delivered by a plan alternative.
    pub fn alternative_rids(&self, alternative: &PlanAlternative) -> BTreeSet<i64> {
        self.alternative_rid_list(alternative).into_iter().collect()
    }

    /// Rids delivered by a plan alternative, one per output row.
    pub fn alternative_rid_list(&self, alternative: &PlanAlternative) -> Vec<i64> {
        execute(&alternative.root, self)
            .iter()
            .map(|row| match row.get(&alternative.rid_projection) {
                Some(Value::Int64(rid)) => *rid,
                other => panic!("row without rid {}: {:?}", alternative.rid_projection, other),
            })
            .collect()
    }
}

/// Build a document from field/value pairs.
pub fn doc(fields: &[(&str, Value)]) -> Value {
    Value::Object(fields.iter().map(|(k, v)| (k.to_string(), v.clone())).collect())
}

pub fn int(v: i64) -> Value {
    Value::Int64(v)
}

pub fn ints(vs: &[i64]) -> Value {
    Value::Array(vs.iter().copied().map(Value::Int64).collect())
}

fn is_true(v: &Value) -> bool {
    matches!(v, Value::Bool(true))
}

fn values_equal(a: &Value, b: &Value) -> bool {
    a.compare(b) == Ordering::Equal
}

pub fn eval_expr(expr: &Expr, row: &Row) -> Value {
    match expr {
        Expr::Constant(v) => v.clone(),
        Expr::Variable(name) => row.get(name).cloned().unwrap_or(Value::Nothing),
        Expr::BinaryOp { op, left, right } => {
            let l = eval_expr(left, row);
            let r = eval_expr(right, row);
            match op {
                Operation::And => Value::Bool(is_true(&l) && is_true(&r)),
                Operation::Or => Value::Bool(is_true(&l) || is_true(&r)),
                op if op.is_comparison() => op.compare_values(&l, &r).map(Value::Bool).unwrap_or(Value::Nothing),
                _ => Value::Nothing,
            }
        }
        Expr::FunctionCall { name, args } => match (name.as_str(), args.as_slice()) {
            ("getArraySize", [arg]) => match eval_expr(arg, row) {
                Value::Array(elems) => Value::Int64(elems.len() as i64),
                _ => Value::Nothing,
            },
            _ => panic!("unsupported function {}", name),
        },
        Expr::EvalPath { path, input } => eval_path(path, eval_expr(input, row), row),
        Expr::EvalFilter { path, input } => Value::Bool(eval_filter(path, &eval_expr(input, row), row)),
    }
}

fn eval_path(path: &Path, input: Value, row: &Row) -> Value {
    match path {
        Path::Identity => input,
        Path::Get { name, path } => {
            let field = input.get_field(name).cloned().unwrap_or(Value::Nothing);
            eval_path(path, field, row)
        }
        Path::Traverse { path } => match input {
            Value::Array(elems) => Value::Array(elems.into_iter().map(|e| eval_path(path, e, row)).collect()),
            other => eval_path(path, other, row),
        },
        other => Value::Bool(eval_filter(other, &input, row)),
    }
}

fn eval_filter(path: &Path, input: &Value, row: &Row) -> bool {
    match path {
        Path::Identity => true,
        Path::Get { name, path } => {
            let field = input.get_field(name).cloned().unwrap_or(Value::Nothing);
            eval_filter(path, &field, row)
        }
        Path::Traverse { path } => match input {
            Value::Array(elems) => elems.iter().any(|e| eval_filter(path, e, row)),
            other => eval_filter(path, other, row),
        },
        Path::Compare { op, value } => op.compare_values(input, &eval_expr(value, row)) == Some(true),
        Path::Default(default) => matches!(input, Value::Nothing) && is_true(&eval_expr(default, row)),
        Path::ComposeM(l, r) => eval_filter(l, input, row) && eval_filter(r, input, row),
        Path::ComposeA(l, r) => eval_filter(l, input, row) || eval_filter(r, input, row),
    }
}

/// Index keys of one field path within a document.
fn field_keys(path: &FieldPath, doc: &Value) -> Vec<Value> {
    let mut current = vec![doc.clone()];
    for step in path.steps() {
        current = current
            .into_iter()
            .flat_map(|v| match step {
                PathStep::Field(name) => vec![v.get_field(name).cloned().unwrap_or(Value::Null)],
                PathStep::Traverse => match v {
                    Value::Array(elems) => elems,
                    other => vec![other],
                },
            })
            .collect();
    }
    current
}

fn interval_contains(interval: &IntervalRequirement, v: &Value) -> bool {
    let constant = |e: &Expr| e.as_constant().cloned().expect("index bounds must be constants");
    let low = interval.low_bound();
    let high = interval.high_bound();
    let above_low = match v.compare(&constant(low.bound())) {
        Ordering::Less => false,
        Ordering::Equal => low.is_inclusive(),
        Ordering::Greater => true,
    };
    let below_high = match v.compare(&constant(high.bound())) {
        Ordering::Less => true,
        Ordering::Equal => high.is_inclusive(),
        Ordering::Greater => false,
    };
    above_low && below_high
}

fn project(row: &Row, projections: &[String]) -> Row {
    projections
        .iter()
        .map(|p| (p.clone(), row.get(p).cloned().unwrap_or(Value::Nothing)))
        .collect()
}

fn join_rows(left: Vec<Row>, right: Vec<Row>, left_keys: &[String], right_keys: &[String]) -> Vec<Row> {
    let mut out = Vec::new();
    for l in &left {
        for r in &right {
            let matches = left_keys.iter().zip(right_keys.iter()).all(|(lk, rk)| {
                let lv = l.get(lk).cloned().unwrap_or(Value::Nothing);
                let rv = r.get(rk).cloned().unwrap_or(Value::Nothing);
                values_equal(&lv, &rv)
            });
            if matches {
                let mut merged = l.clone();
                merged.extend(r.iter().map(|(k, v)| (k.clone(), v.clone())));
                out.push(merged);
            }
        }
    }
    out
}

fn assert_sorted(rows: &[Row], keys: &[String]) {
    let key_of = |row: &Row| -> Vec<Value> { keys.iter().map(|k| row.get(k).cloned().unwrap_or(Value::Nothing)).collect() };
    for pair in rows.windows(2) {
        let (a, b) = (key_of(&pair[0]), key_of(&pair[1]));
        let ord = a
            .iter()
            .zip(b.iter())
            .map(|(x, y)| x.compare(y))
            .find(|o| *o != Ordering::Equal)
            .unwrap_or(Ordering::Equal);
        assert_ne!(ord, Ordering::Greater, "merge join input is not sorted on {:?}", keys);
    }
}

fn aggregate(function: &str, values: Vec<Value>) -> Value {
    match function {
        "$first" => values.into_iter().next().unwrap_or(Value::Nothing),
        "$max" => values
            .into_iter()
            .filter(|v| !matches!(v, Value::Nothing))
            .max_by(|a, b| a.compare(b))
            .unwrap_or(Value::Nothing),
        "$addToSet" => {
            let mut set: Vec<Value> = Vec::new();
            for v in values {
                if !set.iter().any(|s| values_equal(s, &v)) {
                    set.push(v);
                }
            }
            Value::Array(set)
        }
        other => panic!("unsupported aggregate {}", other),
    }
}

/// Execute a plan fragment over `coll`.
pub fn execute(node: &PlanNode, coll: &TestCollection) -> Vec<Row> {
    match &node.op {
        PhysicalOp::PhysicalScan { field_projection_map, .. } => coll
            .docs
            .iter()
            .enumerate()
            .map(|(rid, doc)| {
                let mut row = Row::new();
                if let Some(rid_projection) = &field_projection_map.rid_projection {
                    row.insert(rid_projection.clone(), Value::Int64(rid as i64));
                }
                if let Some(root) = &field_projection_map.root_projection {
                    row.insert(root.clone(), doc.clone());
                }
                for (field, projection) in &field_projection_map.field_projections {
                    row.insert(projection.clone(), doc.get_field(field).cloned().unwrap_or(Value::Nothing));
                }
                row
            })
            .collect(),

        PhysicalOp::IndexScan { field_projection_map, spec } => {
            let index_def = &coll.scan_def.indexes[&spec.index_def_name];
            let mut entries: Vec<(Vec<Value>, i64)> = Vec::new();
            for (rid, doc) in coll.docs.iter().enumerate() {
                let mut tuples: Vec<Vec<Value>> = vec![Vec::new()];
                for entry in &index_def.collation_spec {
                    let keys = field_keys(&entry.path, doc);
                    tuples = tuples
                        .into_iter()
                        .flat_map(|prefix| {
                            keys.iter().map(move |k| {
                                let mut t = prefix.clone();
                                t.push(k.clone());
                                t
                            })
                        })
                        .collect();
                }
                for tuple in tuples {
                    let inside = tuple.iter().enumerate().all(|(i, key)| {
                        let interval = &spec.interval.intervals()[i];
                        match index_def.collation_spec[i].op {
                            CollationOp::Descending => interval_contains(&interval.reverse(), key),
                            _ => interval_contains(interval, key),
                        }
                    });
                    if inside {
                        entries.push((tuple, rid as i64));
                    }
                }
            }
            entries.sort_by(|(a, rid_a), (b, rid_b)| {
                for (i, (x, y)) in a.iter().zip(b.iter()).enumerate() {
                    let mut ord = x.compare(y);
                    if index_def.collation_spec[i].op == CollationOp::Descending {
                        ord = ord.reverse();
                    }
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                rid_a.cmp(rid_b)
            });
            if spec.reverse_order {
                entries.reverse();
            }
            entries
                .into_iter()
                .map(|(tuple, rid)| {
                    let mut row = Row::new();
                    if let Some(rid_projection) = &field_projection_map.rid_projection {
                        row.insert(rid_projection.clone(), Value::Int64(rid));
                    }
                    for (field, projection) in &field_projection_map.field_projections {
                        row.insert(projection.clone(), tuple[decode_index_key_name(field)].clone());
                    }
                    row
                })
                .collect()
        }

        PhysicalOp::Seek {
            rid_projection,
            field_projection_map,
            ..
        } => execute(&node.children[0], coll)
            .into_iter()
            .map(|mut row| {
                let rid = match row.get(rid_projection) {
                    Some(Value::Int64(rid)) => *rid as usize,
                    other => panic!("seek without rid: {:?}", other),
                };
                let doc = &coll.docs[rid];
                if let Some(root) = &field_projection_map.root_projection {
                    row.insert(root.clone(), doc.clone());
                }
                for (field, projection) in &field_projection_map.field_projections {
                    row.insert(projection.clone(), doc.get_field(field).cloned().unwrap_or(Value::Nothing));
                }
                row
            })
            .collect(),

        PhysicalOp::Evaluation { projection, expr } => execute(&node.children[0], coll)
            .into_iter()
            .map(|mut row| {
                let value = eval_expr(expr, &row);
                row.insert(projection.clone(), value);
                row
            })
            .collect(),

        PhysicalOp::Filter { filter } => execute(&node.children[0], coll)
            .into_iter()
            .filter(|row| is_true(&eval_expr(filter, row)))
            .collect(),

        PhysicalOp::Union { projections } => node
            .children
            .iter()
            .flat_map(|child| execute(child, coll))
            .map(|row| project(&row, projections))
            .collect(),

        PhysicalOp::GroupBy {
            group_keys,
            agg_projections,
            agg_exprs,
        } => {
            let rows = execute(&node.children[0], coll);
            let mut groups: Vec<(Vec<Value>, Vec<Row>)> = Vec::new();
            for row in rows {
                let key: Vec<Value> = group_keys
                    .iter()
                    .map(|k| row.get(k).cloned().unwrap_or(Value::Nothing))
                    .collect();
                match groups
                    .iter_mut()
                    .find(|(existing, _)| existing.iter().zip(key.iter()).all(|(a, b)| values_equal(a, b)))
                {
                    Some((_, members)) => members.push(row),
                    None => groups.push((key, vec![row])),
                }
            }
            groups
                .into_iter()
                .map(|(key, members)| {
                    let mut out: Row = group_keys.iter().cloned().zip(key).collect();
                    for (projection, agg) in agg_projections.iter().zip(agg_exprs.iter()) {
                        let Expr::FunctionCall { name, args } = agg else {
                            panic!("aggregate must be a function call: {}", agg);
                        };
                        let values = members.iter().map(|m| eval_expr(&args[0], m)).collect();
                        out.insert(projection.clone(), aggregate(name, values));
                    }
                    out
                })
                .collect()
        }

        PhysicalOp::HashJoin { left_keys, right_keys } => {
            let left = execute(&node.children[0], coll);
            let right = execute(&node.children[1], coll);
            join_rows(left, right, left_keys, right_keys)
        }

        PhysicalOp::MergeJoin {
            left_keys, right_keys, ..
        } => {
            let left = execute(&node.children[0], coll);
            let right = execute(&node.children[1], coll);
            assert_sorted(&left, left_keys);
            assert_sorted(&right, right_keys);
            join_rows(left, right, left_keys, right_keys)
        }
    }
}
