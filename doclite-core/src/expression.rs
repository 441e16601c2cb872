// src/expression.rs
// Aggregation expressions: field references, literals, arithmetic and string operators

use serde_json::{Map, Number, Value};

use crate::document::get_path;
use crate::error::{DocLiteError, Result};

/// Parsed expression tree
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// `"$path"`
    FieldRef(String),
    Literal(Value),
    /// Document whose values are expressions
    Object(Vec<(String, Expression)>),
    Array(Vec<Expression>),
    Add(Vec<Expression>),
    Subtract(Box<Expression>, Box<Expression>),
    Multiply(Vec<Expression>),
    Divide(Box<Expression>, Box<Expression>),
    Mod(Box<Expression>, Box<Expression>),
    Concat(Vec<Expression>),
    Substr(Box<Expression>, Box<Expression>, Box<Expression>),
}

fn invalid(msg: impl Into<String>) -> DocLiteError {
    DocLiteError::InvalidPipelineStage(msg.into())
}

impl Expression {
    pub fn parse(value: &Value, max_depth: usize) -> Result<Self> {
        Self::parse_at(value, max_depth, 0)
    }

    fn parse_at(value: &Value, max_depth: usize, depth: usize) -> Result<Self> {
        if depth > max_depth {
            return Err(invalid(format!(
                "Expression nesting exceeds maximum depth of {}",
                max_depth
            )));
        }

        match value {
            Value::String(s) if s.starts_with('$') => {
                let path = &s[1..];
                if path.is_empty() || path.starts_with('$') || path.split('.').any(|p| p.is_empty()) {
                    return Err(invalid(format!("Invalid field reference: '{}'", s)));
                }
                Ok(Expression::FieldRef(path.to_string()))
            }
            Value::Array(items) => Ok(Expression::Array(
                items
                    .iter()
                    .map(|item| Self::parse_at(item, max_depth, depth + 1))
                    .collect::<Result<_>>()?,
            )),
            Value::Object(map) if map.keys().any(|k| k.starts_with('$')) => {
                if map.len() != 1 {
                    return Err(invalid("An operator expression must have exactly one key"));
                }
                let (op, arg) = map
                    .iter()
                    .next()
                    .ok_or_else(|| invalid("Empty operator expression"))?;
                Self::parse_operator(op, arg, max_depth, depth)
            }
            Value::Object(map) => Ok(Expression::Object(
                map.iter()
                    .map(|(k, v)| Ok((k.clone(), Self::parse_at(v, max_depth, depth + 1)?)))
                    .collect::<Result<_>>()?,
            )),
            other => Ok(Expression::Literal(other.clone())),
        }
    }

    fn parse_operator(op: &str, arg: &Value, max_depth: usize, depth: usize) -> Result<Self> {
        if op == "$literal" {
            return Ok(Expression::Literal(arg.clone()));
        }

        let args: Vec<Expression> = match arg {
            Value::Array(items) => items
                .iter()
                .map(|item| Self::parse_at(item, max_depth, depth + 1))
                .collect::<Result<_>>()?,
            single => vec![Self::parse_at(single, max_depth, depth + 1)?],
        };

        let arity = |n: usize| -> Result<()> {
            if args.len() == n {
                Ok(())
            } else {
                Err(invalid(format!("{} requires exactly {} arguments, got {}", op, n, args.len())))
            }
        };

        match op {
            "$add" => Ok(Expression::Add(args)),
            "$multiply" => Ok(Expression::Multiply(args)),
            "$concat" => Ok(Expression::Concat(args)),
            "$subtract" | "$divide" | "$mod" => {
                arity(2)?;
                let mut it = args.into_iter();
                match (it.next(), it.next()) {
                    (Some(a), Some(b)) => {
                        let (a, b) = (Box::new(a), Box::new(b));
                        Ok(match op {
                            "$subtract" => Expression::Subtract(a, b),
                            "$divide" => Expression::Divide(a, b),
                            _ => Expression::Mod(a, b),
                        })
                    }
                    _ => Err(invalid(format!("{} requires exactly 2 arguments", op))),
                }
            }
            "$substr" => {
                arity(3)?;
                let mut it = args.into_iter();
                match (it.next(), it.next(), it.next()) {
                    (Some(s), Some(start), Some(len)) => {
                        Ok(Expression::Substr(Box::new(s), Box::new(start), Box::new(len)))
                    }
                    _ => Err(invalid("$substr requires exactly 3 arguments")),
                }
            }
            _ => Err(invalid(format!("Unknown expression operator: {}", op))),
        }
    }

    /// Evaluate against a record; missing fields evaluate to null
    pub fn evaluate(&self, record: &Value) -> Result<Value> {
        match self {
            Expression::FieldRef(path) => Ok(get_path(record, path).cloned().unwrap_or(Value::Null)),
            Expression::Literal(v) => Ok(v.clone()),
            Expression::Object(fields) => {
                let mut map = Map::with_capacity(fields.len());
                for (key, expr) in fields {
                    map.insert(key.clone(), expr.evaluate(record)?);
                }
                Ok(Value::Object(map))
            }
            Expression::Array(items) => Ok(Value::Array(
                items.iter().map(|e| e.evaluate(record)).collect::<Result<_>>()?,
            )),
            Expression::Add(args) => fold_numbers("$add", args, record, Num::Int(0), Num::add),
            Expression::Multiply(args) => fold_numbers("$multiply", args, record, Num::Int(1), Num::mul),
            Expression::Subtract(a, b) => {
                binary_numbers("$subtract", a, b, record, |x, y| Ok(x.sub(y)))
            }
            Expression::Divide(a, b) => binary_numbers("$divide", a, b, record, |x, y| {
                let divisor = y.as_f64();
                if divisor == 0.0 {
                    log::warn!("$divide by zero");
                    return Err(DocLiteError::ArithmeticError("Division by zero".into()));
                }
                Ok(Num::Float(x.as_f64() / divisor))
            }),
            Expression::Mod(a, b) => binary_numbers("$mod", a, b, record, |x, y| {
                if y.as_f64() == 0.0 {
                    log::warn!("$mod by zero");
                    return Err(DocLiteError::ArithmeticError("Modulo by zero".into()));
                }
                Ok(match (x, y) {
                    (Num::Int(x), Num::Int(y)) => x.checked_rem(y).map(Num::Int).unwrap_or(Num::Int(0)),
                    _ => Num::Float(x.as_f64() % y.as_f64()),
                })
            }),
            Expression::Concat(args) => {
                let mut out = String::new();
                for arg in args {
                    match arg.evaluate(record)? {
                        Value::Null => return Ok(Value::Null),
                        Value::String(s) => out.push_str(&s),
                        other => {
                            return Err(invalid(format!("$concat only supports strings, got {}", other)))
                        }
                    }
                }
                Ok(Value::String(out))
            }
            Expression::Substr(s, start, len) => {
                let text = match s.evaluate(record)? {
                    Value::Null => String::new(),
                    Value::String(s) => s,
                    Value::Number(n) => n.to_string(),
                    Value::Bool(b) => b.to_string(),
                    other => {
                        return Err(invalid(format!("$substr cannot convert {} to a string", other)))
                    }
                };
                let start = substr_index("start", &start.evaluate(record)?)?;
                let len = substr_length(&len.evaluate(record)?)?;
                let taken: String = match len {
                    Some(len) => text.chars().skip(start).take(len).collect(),
                    None => text.chars().skip(start).collect(),
                };
                Ok(Value::String(taken))
            }
        }
    }
}

fn substr_index(what: &str, value: &Value) -> Result<usize> {
    value
        .as_f64()
        .filter(|f| *f >= 0.0 && f.fract() == 0.0)
        .map(|f| f as usize)
        .ok_or_else(|| invalid(format!("$substr {} must be a non-negative integer, got {}", what, value)))
}

/// Negative length means "to the end"
fn substr_length(value: &Value) -> Result<Option<usize>> {
    match value.as_f64() {
        Some(f) if f < 0.0 => Ok(None),
        _ => substr_index("length", value).map(Some),
    }
}

/// Numeric operand; integers stay exact until a float is involved
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    pub(crate) fn from_number(n: &Number) -> Self {
        match n.as_i64() {
            Some(i) => Num::Int(i),
            None => Num::Float(n.as_f64().unwrap_or(0.0)),
        }
    }

    pub(crate) fn as_f64(self) -> f64 {
        match self {
            Num::Int(i) => i as f64,
            Num::Float(f) => f,
        }
    }

    pub(crate) fn add(self, other: Num) -> Num {
        match (self, other) {
            (Num::Int(a), Num::Int(b)) => match a.checked_add(b) {
                Some(n) => Num::Int(n),
                None => Num::Float(a as f64 + b as f64),
            },
            _ => Num::Float(self.as_f64() + other.as_f64()),
        }
    }

    fn sub(self, other: Num) -> Num {
        match (self, other) {
            (Num::Int(a), Num::Int(b)) => match a.checked_sub(b) {
                Some(n) => Num::Int(n),
                None => Num::Float(a as f64 - b as f64),
            },
            _ => Num::Float(self.as_f64() - other.as_f64()),
        }
    }

    fn mul(self, other: Num) -> Num {
        match (self, other) {
            (Num::Int(a), Num::Int(b)) => match a.checked_mul(b) {
                Some(n) => Num::Int(n),
                None => Num::Float(a as f64 * b as f64),
            },
            _ => Num::Float(self.as_f64() * other.as_f64()),
        }
    }

    pub(crate) fn into_value(self) -> Value {
        match self {
            Num::Int(i) => Value::from(i),
            Num::Float(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        }
    }
}

/// `None` for null/missing operands
fn operand(op: &str, value: Value) -> Result<Option<Num>> {
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => Ok(Some(Num::from_number(&n))),
        other => Err(invalid(format!("{} only supports numeric types, got {}", op, other))),
    }
}

fn fold_numbers(
    op: &str,
    args: &[Expression],
    record: &Value,
    init: Num,
    f: fn(Num, Num) -> Num,
) -> Result<Value> {
    let mut acc = init;
    let mut saw_null = false;
    for arg in args {
        match operand(op, arg.evaluate(record)?)? {
            Some(n) => acc = f(acc, n),
            None => saw_null = true,
        }
    }
    Ok(if saw_null { Value::Null } else { acc.into_value() })
}

fn binary_numbers(
    op: &str,
    a: &Expression,
    b: &Expression,
    record: &Value,
    f: impl Fn(Num, Num) -> Result<Num>,
) -> Result<Value> {
    let x = operand(op, a.evaluate(record)?)?;
    let y = operand(op, b.evaluate(record)?)?;
    match (x, y) {
        (Some(x), Some(y)) => Ok(f(x, y)?.into_value()),
        _ => Ok(Value::Null),
    }
}
