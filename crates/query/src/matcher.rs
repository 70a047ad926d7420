//! Selector compiler.
//!
//! Compiles a JSON selector into a predicate tree that can be evaluated
//! against documents without re-parsing. Supported forms:
//!
//! - implicit equality `{field: value}` (array fields match on any element)
//! - comparison `$eq` `$ne` `$gt` `$gte` `$lt` `$lte`
//! - membership `$in` `$nin`
//! - `$exists`, `$regex` (with `$options: "i"`)
//! - logical `$and` `$or` `$nor`
//! - dotted paths into sub-documents and arrays

use crate::selector::Selector;
use core::cmp::Ordering;
use regex::{Regex, RegexBuilder};
use rejoin_core::document::lookup_path;
use rejoin_core::{Document, Error, Result};
use serde_json::{Map, Value};

/// Evaluation type for field operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EvalType {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Clone, Debug)]
enum FieldOp {
    Compare(EvalType, Value),
    In(Vec<Value>),
    Nin(Vec<Value>),
    Exists(bool),
    Regex(Regex),
}

#[derive(Clone, Debug)]
enum Clause {
    And(Vec<Clause>),
    Or(Vec<Clause>),
    Nor(Vec<Clause>),
    Field { path: String, ops: Vec<FieldOp> },
}

/// A compiled selector.
#[derive(Clone, Debug)]
pub struct Matcher {
    root: Clause,
}

impl Matcher {
    /// Compiles a selector. `null` and `{}` match every document.
    pub fn compile(selector: &Selector) -> Result<Self> {
        let root = match selector {
            Value::Null => Clause::And(Vec::new()),
            Value::Object(map) => compile_document(map)?,
            other => {
                return Err(Error::invalid_selector(format!(
                    "selector must be an object, got {}",
                    other
                )))
            }
        };
        Ok(Self { root })
    }

    /// Evaluates the selector against a document.
    pub fn matches(&self, doc: &Document) -> bool {
        eval_clause(&self.root, doc)
    }
}

fn compile_document(map: &Map<String, Value>) -> Result<Clause> {
    let mut clauses = Vec::with_capacity(map.len());
    for (key, value) in map {
        match key.as_str() {
            "$and" => clauses.push(Clause::And(compile_list(key, value)?)),
            "$or" => clauses.push(Clause::Or(compile_list(key, value)?)),
            "$nor" => clauses.push(Clause::Nor(compile_list(key, value)?)),
            op if op.starts_with('$') => {
                return Err(Error::invalid_selector(format!(
                    "unknown top-level operator {}",
                    op
                )))
            }
            path => clauses.push(Clause::Field {
                path: path.to_string(),
                ops: compile_field(path, value)?,
            }),
        }
    }
    Ok(if clauses.len() == 1 {
        clauses.remove(0)
    } else {
        Clause::And(clauses)
    })
}

fn compile_list(op: &str, value: &Value) -> Result<Vec<Clause>> {
    let items = value
        .as_array()
        .ok_or_else(|| Error::invalid_selector(format!("{} expects an array", op)))?;
    items
        .iter()
        .map(|item| match item {
            Value::Object(map) => compile_document(map),
            other => Err(Error::invalid_selector(format!(
                "{} expects selector objects, got {}",
                op, other
            ))),
        })
        .collect()
}

fn is_operator_object(map: &Map<String, Value>) -> bool {
    !map.is_empty() && map.keys().all(|k| k.starts_with('$'))
}

fn compile_field(path: &str, value: &Value) -> Result<Vec<FieldOp>> {
    let map = match value {
        Value::Object(map) if is_operator_object(map) => map,
        literal => return Ok(vec![FieldOp::Compare(EvalType::Eq, literal.clone())]),
    };

    let options = map.get("$options").and_then(Value::as_str).unwrap_or("");
    let mut ops = Vec::with_capacity(map.len());
    for (op, operand) in map {
        let compiled = match op.as_str() {
            "$eq" => FieldOp::Compare(EvalType::Eq, operand.clone()),
            "$ne" => FieldOp::Compare(EvalType::Ne, operand.clone()),
            "$gt" => FieldOp::Compare(EvalType::Gt, operand.clone()),
            "$gte" => FieldOp::Compare(EvalType::Ge, operand.clone()),
            "$lt" => FieldOp::Compare(EvalType::Lt, operand.clone()),
            "$lte" => FieldOp::Compare(EvalType::Le, operand.clone()),
            "$in" => FieldOp::In(operand_list(path, op, operand)?),
            "$nin" => FieldOp::Nin(operand_list(path, op, operand)?),
            "$exists" => FieldOp::Exists(truthy(operand)),
            "$regex" => FieldOp::Regex(compile_regex(path, operand, options)?),
            "$options" => continue,
            other => {
                return Err(Error::invalid_selector(format!(
                    "unknown operator {} on field {}",
                    other, path
                )))
            }
        };
        ops.push(compiled);
    }
    Ok(ops)
}

fn operand_list(path: &str, op: &str, operand: &Value) -> Result<Vec<Value>> {
    operand.as_array().cloned().ok_or_else(|| {
        Error::invalid_selector(format!("{} on field {} expects an array", op, path))
    })
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        _ => true,
    }
}

fn compile_regex(path: &str, pattern: &Value, options: &str) -> Result<Regex> {
    let pattern = pattern.as_str().ok_or_else(|| {
        Error::invalid_selector(format!("$regex on field {} expects a string", path))
    })?;
    RegexBuilder::new(pattern)
        .case_insensitive(options.contains('i'))
        .multi_line(options.contains('m'))
        .build()
        .map_err(|e| Error::invalid_selector(format!("bad $regex on field {}: {}", path, e)))
}

fn eval_clause(clause: &Clause, doc: &Document) -> bool {
    match clause {
        Clause::And(clauses) => clauses.iter().all(|c| eval_clause(c, doc)),
        Clause::Or(clauses) => clauses.iter().any(|c| eval_clause(c, doc)),
        Clause::Nor(clauses) => !clauses.iter().any(|c| eval_clause(c, doc)),
        Clause::Field { path, ops } => {
            let values = lookup_path(doc, path);
            ops.iter().all(|op| eval_op(op, &values))
        }
    }
}

fn eval_op(op: &FieldOp, values: &[&Value]) -> bool {
    match op {
        FieldOp::Compare(EvalType::Eq, target) => equals_any(values, target),
        FieldOp::Compare(EvalType::Ne, target) => !equals_any(values, target),
        FieldOp::Compare(eval_type, target) => any_candidate(values, |v| {
            match compare_values(v, target) {
                Some(ord) => match eval_type {
                    EvalType::Lt => ord == Ordering::Less,
                    EvalType::Le => ord != Ordering::Greater,
                    EvalType::Gt => ord == Ordering::Greater,
                    EvalType::Ge => ord != Ordering::Less,
                    EvalType::Eq | EvalType::Ne => false,
                },
                None => false,
            }
        }),
        FieldOp::In(targets) => targets.iter().any(|t| equals_any(values, t)),
        FieldOp::Nin(targets) => !targets.iter().any(|t| equals_any(values, t)),
        FieldOp::Exists(expected) => !values.is_empty() == *expected,
        FieldOp::Regex(re) => any_candidate(values, |v| v.as_str().map(|s| re.is_match(s)).unwrap_or(false)),
    }
}

/// A missing field equals `null`; an array equals a target if it is equal as
/// a whole or contains an equal element.
fn equals_any(values: &[&Value], target: &Value) -> bool {
    if values.is_empty() {
        return target.is_null();
    }
    values.iter().any(|v| {
        values_equal(v, target)
            || matches!(v, Value::Array(items) if items.iter().any(|i| values_equal(i, target)))
    })
}

fn any_candidate<F>(values: &[&Value], mut pred: F) -> bool
where
    F: FnMut(&Value) -> bool,
{
    values.iter().any(|v| match v {
        Value::Array(items) => items.iter().any(&mut pred),
        other => pred(other),
    })
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}
