// src/update.rs
// Update documents: $set / $unset / $inc and bare field maps

use serde_json::{Number, Value};

use crate::document::{paths_overlap, Document, ID_FIELD};
use crate::error::{DocLiteError, Result};

/// Single field-level change
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOp {
    Set { path: String, value: Value },
    Unset { path: String },
    Inc { path: String, amount: Number },
}

impl UpdateOp {
    pub fn path(&self) -> &str {
        match self {
            UpdateOp::Set { path, .. } | UpdateOp::Unset { path } | UpdateOp::Inc { path, .. } => path,
        }
    }
}

/// Parsed update document
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateSpec {
    pub ops: Vec<UpdateOp>,
}

impl UpdateSpec {
    /// `{"$set": {...}}`, `{"$unset": {...}}`, `{"$inc": {...}}` or a bare map (= `$set`)
    pub fn from_json(json: &Value) -> Result<Self> {
        let map = match json {
            Value::Object(map) if !map.is_empty() => map,
            Value::Object(_) => {
                return Err(DocLiteError::InvalidUpdate("Update document must not be empty".into()))
            }
            other => {
                return Err(DocLiteError::InvalidUpdate(format!(
                    "Update must be an object, got {}",
                    other
                )))
            }
        };

        let operators = map.keys().filter(|k| k.starts_with('$')).count();
        if operators > 0 && operators < map.len() {
            return Err(DocLiteError::InvalidUpdate(
                "Cannot mix update operators and plain fields".into(),
            ));
        }

        let mut ops = Vec::new();
        if operators == 0 {
            for (path, value) in map {
                ops.push(UpdateOp::Set { path: path.clone(), value: value.clone() });
            }
        } else {
            for (op, fields) in map {
                let fields = fields.as_object().ok_or_else(|| {
                    DocLiteError::InvalidUpdate(format!("{} requires an object", op))
                })?;
                for (path, operand) in fields {
                    ops.push(match op.as_str() {
                        "$set" => UpdateOp::Set { path: path.clone(), value: operand.clone() },
                        "$unset" => UpdateOp::Unset { path: path.clone() },
                        "$inc" => match operand {
                            Value::Number(n) => UpdateOp::Inc { path: path.clone(), amount: n.clone() },
                            other => {
                                return Err(DocLiteError::InvalidUpdate(format!(
                                    "$inc amount for '{}' must be a number, got {}",
                                    path, other
                                )))
                            }
                        },
                        _ => {
                            return Err(DocLiteError::InvalidUpdate(format!(
                                "Unsupported update operator: {}",
                                op
                            )))
                        }
                    });
                }
            }
        }

        for (i, op) in ops.iter().enumerate() {
            let path = op.path();
            if path.is_empty() || path.split('.').any(|part| part.is_empty()) {
                return Err(DocLiteError::InvalidUpdate(format!("Invalid field path: '{}'", path)));
            }
            if paths_overlap(path, ID_FIELD) {
                return Err(DocLiteError::InvalidUpdate("Cannot modify _id".into()));
            }
            if let Some(other) = ops[..i].iter().find(|o| paths_overlap(o.path(), path)) {
                return Err(DocLiteError::InvalidUpdate(format!(
                    "Conflicting updates to '{}' and '{}'",
                    other.path(),
                    path
                )));
            }
        }

        Ok(UpdateSpec { ops })
    }

    /// Paths touched by this update
    pub fn modified_paths(&self) -> Vec<String> {
        self.ops.iter().map(|op| op.path().to_string()).collect()
    }

    /// Apply to a document; returns whether it changed.
    /// On error the document may be partially updated, so callers apply to a copy.
    pub fn apply(&self, document: &mut Document) -> Result<bool> {
        let mut modified = false;

        for op in &self.ops {
            match op {
                UpdateOp::Set { path, value } => {
                    if document.lookup(path).as_deref() == Some(value) {
                        continue;
                    }
                    if !document.set_path(path, value.clone()) {
                        return Err(DocLiteError::InvalidUpdate(format!(
                            "Cannot set '{}': parent is not a document",
                            path
                        )));
                    }
                    modified = true;
                }
                UpdateOp::Unset { path } => {
                    modified |= document.remove_path(path).is_some();
                }
                UpdateOp::Inc { path, amount } => {
                    let current = document.lookup(path).map(|v| v.into_owned());
                    let next = match &current {
                        None => Value::Number(amount.clone()),
                        Some(Value::Number(current)) => add_numbers(current, amount),
                        Some(other) => {
                            return Err(DocLiteError::InvalidUpdate(format!(
                                "Cannot $inc non-numeric field '{}' ({})",
                                path, other
                            )))
                        }
                    };
                    if current.as_ref() == Some(&next) {
                        continue;
                    }
                    if !document.set_path(path, next) {
                        return Err(DocLiteError::InvalidUpdate(format!(
                            "Cannot set '{}': parent is not a document",
                            path
                        )));
                    }
                    modified = true;
                }
            }
        }

        Ok(modified)
    }
}

/// Integers stay integers unless the sum overflows
fn add_numbers(a: &Number, b: &Number) -> Value {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        if let Some(sum) = x.checked_add(y) {
            return Value::from(sum);
        }
    }
    let sum = a.as_f64().unwrap_or(0.0) + b.as_f64().unwrap_or(0.0);
    Number::from_f64(sum).map(Value::Number).unwrap_or(Value::Null)
}
