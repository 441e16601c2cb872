// src/query.rs
use serde_json::Value;
use std::borrow::Cow;
use std::cmp::Ordering;

use crate::config::DEFAULT_MAX_EXPRESSION_DEPTH;
use crate::document::{compare_values, get_path, type_rank, values_equal, Document};
use crate::error::{DocLiteError, Result};

/// Field-level operators
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOperator {
    Eq(Value),           // $eq or literal
    Ne(Value),           // $ne
    Gt(Value),           // $gt
    Gte(Value),          // $gte
    Lt(Value),           // $lt
    Lte(Value),          // $lte
    In(Vec<Value>),      // $in
    Nin(Vec<Value>),     // $nin
    Exists(bool),        // $exists
}

impl QueryOperator {
    pub fn is_lower_bound(&self) -> bool {
        matches!(self, QueryOperator::Gt(_) | QueryOperator::Gte(_))
    }

    pub fn is_upper_bound(&self) -> bool {
        matches!(self, QueryOperator::Lt(_) | QueryOperator::Lte(_))
    }

    /// Does a (possibly absent) field value satisfy this operator
    pub fn matches(&self, value: Option<&Value>) -> bool {
        let actual = value.unwrap_or(&Value::Null);
        match self {
            QueryOperator::Eq(target) => values_equal(actual, target),
            QueryOperator::Ne(target) => !values_equal(actual, target),
            QueryOperator::Gt(target) => {
                bracketed_cmp(actual, target) == Some(Ordering::Greater)
            }
            QueryOperator::Gte(target) => {
                matches!(bracketed_cmp(actual, target), Some(Ordering::Greater | Ordering::Equal))
            }
            QueryOperator::Lt(target) => {
                bracketed_cmp(actual, target) == Some(Ordering::Less)
            }
            QueryOperator::Lte(target) => {
                matches!(bracketed_cmp(actual, target), Some(Ordering::Less | Ordering::Equal))
            }
            QueryOperator::In(targets) => targets.iter().any(|t| values_equal(actual, t)),
            QueryOperator::Nin(targets) => !targets.iter().any(|t| values_equal(actual, t)),
            QueryOperator::Exists(should_exist) => value.is_some() == *should_exist,
        }
    }
}

/// Range comparisons only match within the operand's type class
fn bracketed_cmp(actual: &Value, target: &Value) -> Option<Ordering> {
    if type_rank(actual) == type_rank(target) {
        Some(compare_values(actual, target))
    } else {
        None
    }
}

/// One top-level filter condition
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// All operators must hold for the value at `path`
    Field { path: String, operators: Vec<QueryOperator> },
    And(Vec<Query>),
    Or(Vec<Query>),
    Nor(Vec<Query>),
}

/// Parsed filter; conditions are AND-ed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub conditions: Vec<Condition>,
}

impl Query {
    /// Empty query (matches everything)
    pub fn new() -> Self {
        Query { conditions: Vec::new() }
    }

    pub fn from_json(json: &Value) -> Result<Self> {
        Self::from_json_with_depth(json, DEFAULT_MAX_EXPRESSION_DEPTH)
    }

    /// Parse with an explicit bound on `$and`/`$or`/`$nor` nesting
    pub fn from_json_with_depth(json: &Value, max_depth: usize) -> Result<Self> {
        Self::parse(json, max_depth, 0)
    }

    fn parse(json: &Value, max_depth: usize, depth: usize) -> Result<Self> {
        if depth > max_depth {
            return Err(DocLiteError::InvalidFilter(format!(
                "Filter nesting exceeds maximum depth of {}",
                max_depth
            )));
        }

        let map = match json {
            Value::Object(map) => map,
            Value::Null => return Ok(Query::new()),
            other => {
                return Err(DocLiteError::InvalidFilter(format!(
                    "Filter must be an object, got {}",
                    other
                )))
            }
        };

        let mut conditions = Vec::with_capacity(map.len());
        for (field, condition) in map {
            if field.starts_with('$') {
                let branches = Self::parse_branches(field, condition, max_depth, depth)?;
                conditions.push(match field.as_str() {
                    "$and" => Condition::And(branches),
                    "$or" => Condition::Or(branches),
                    _ => Condition::Nor(branches),
                });
            } else {
                validate_path(field)?;
                conditions.push(Condition::Field {
                    path: field.clone(),
                    operators: Self::parse_operators(field, condition)?,
                });
            }
        }

        Ok(Query { conditions })
    }

    /// Parse logical operators ($and, $or, $nor)
    fn parse_branches(op: &str, value: &Value, max_depth: usize, depth: usize) -> Result<Vec<Query>> {
        if !matches!(op, "$and" | "$or" | "$nor") {
            return Err(DocLiteError::InvalidFilter(format!("Unknown logical operator: {}", op)));
        }
        match value {
            Value::Array(arr) if !arr.is_empty() => arr
                .iter()
                .map(|item| Self::parse(item, max_depth, depth + 1))
                .collect(),
            _ => Err(DocLiteError::InvalidFilter(format!("{} requires a non-empty array", op))),
        }
    }

    fn parse_operators(field: &str, value: &Value) -> Result<Vec<QueryOperator>> {
        let map = match value {
            Value::Object(map) if map.keys().any(|k| k.starts_with('$')) => map,
            // literal (including embedded documents) means equality
            _ => return Ok(vec![QueryOperator::Eq(value.clone())]),
        };

        if map.keys().any(|k| !k.starts_with('$')) {
            return Err(DocLiteError::InvalidFilter(format!(
                "Cannot mix operators and literal fields for '{}'",
                field
            )));
        }

        map.iter()
            .map(|(op, operand)| match op.as_str() {
                "$eq" => Ok(QueryOperator::Eq(operand.clone())),
                "$ne" => Ok(QueryOperator::Ne(operand.clone())),
                "$gt" => Ok(QueryOperator::Gt(operand.clone())),
                "$gte" => Ok(QueryOperator::Gte(operand.clone())),
                "$lt" => Ok(QueryOperator::Lt(operand.clone())),
                "$lte" => Ok(QueryOperator::Lte(operand.clone())),
                "$in" => match operand {
                    Value::Array(arr) => Ok(QueryOperator::In(arr.clone())),
                    _ => Err(DocLiteError::InvalidFilter("$in requires array".into())),
                },
                "$nin" => match operand {
                    Value::Array(arr) => Ok(QueryOperator::Nin(arr.clone())),
                    _ => Err(DocLiteError::InvalidFilter("$nin requires array".into())),
                },
                "$exists" => match operand {
                    Value::Bool(b) => Ok(QueryOperator::Exists(*b)),
                    _ => Err(DocLiteError::InvalidFilter("$exists requires bool".into())),
                },
                _ => Err(DocLiteError::InvalidFilter(format!("Unknown operator: {}", op))),
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// True if the query contains `$and`/`$or`/`$nor`
    pub fn has_logical_operators(&self) -> bool {
        self.conditions
            .iter()
            .any(|c| !matches!(c, Condition::Field { .. }))
    }

    /// Field conditions in declaration order
    pub fn field_conditions(&self) -> impl Iterator<Item = (&str, &[QueryOperator])> {
        self.conditions.iter().filter_map(|c| match c {
            Condition::Field { path, operators } => Some((path.as_str(), operators.as_slice())),
            _ => None,
        })
    }

    pub fn matches(&self, document: &Document) -> bool {
        self.matches_by(&|path| document.lookup(path))
    }

    /// Match a rendered record (pipeline output), where `_id` is an ordinary field
    pub fn matches_record(&self, record: &Value) -> bool {
        self.matches_by(&|path| get_path(record, path).map(Cow::Borrowed))
    }

    fn matches_by<'a>(&self, lookup: &dyn Fn(&str) -> Option<Cow<'a, Value>>) -> bool {
        self.conditions.iter().all(|condition| match condition {
            Condition::Field { path, operators } => {
                let value = lookup(path);
                let value = value.as_deref();
                operators.iter().all(|op| op.matches(value))
            }
            Condition::And(queries) => queries.iter().all(|q| q.matches_by(lookup)),
            Condition::Or(queries) => queries.iter().any(|q| q.matches_by(lookup)),
            Condition::Nor(queries) => !queries.iter().any(|q| q.matches_by(lookup)),
        })
    }
}

/// Reject empty paths and empty segments ("a..b")
pub(crate) fn validate_path(path: &str) -> Result<()> {
    if path.is_empty() || path.split('.').any(|part| part.is_empty()) {
        return Err(DocLiteError::InvalidFilter(format!("Invalid field path: '{}'", path)));
    }
    Ok(())
}
