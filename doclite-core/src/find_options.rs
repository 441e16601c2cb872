// src/find_options.rs
// Find query options: projection, sort, limit, skip

use serde_json::{Map, Value};
use std::cmp::Ordering;

use crate::document::{compare_values, copy_path, get_path, paths_overlap, Document, ID_FIELD};
use crate::error::{DocLiteError, Result};
use crate::query::validate_path;

/// Options for find queries
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    /// Projection: field → 1 (include) or 0 (exclude)
    /// Special case: _id can be excluded in include mode
    pub projection: Option<Value>,

    /// Sort: ordered {field: 1 | -1}
    pub sort: Option<Value>,

    /// Limit: maximum number of documents to return
    pub limit: Option<usize>,

    /// Skip: number of documents to skip (for pagination)
    pub skip: Option<usize>,
}

impl FindOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_projection(mut self, projection: Value) -> Self {
        self.projection = Some(projection);
        self
    }

    pub fn with_sort(mut self, sort: Value) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_skip(mut self, skip: usize) -> Self {
        self.skip = Some(skip);
        self
    }
}

// ===== Sort =====

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SortDirection {
    Ascending,
    Descending,
}

impl SortDirection {
    /// `1` / `-1` (integral floats accepted)
    pub fn from_json(value: &Value) -> Option<Self> {
        let n = value.as_f64()?;
        if n == 1.0 {
            Some(SortDirection::Ascending)
        } else if n == -1.0 {
            Some(SortDirection::Descending)
        } else {
            None
        }
    }

    pub fn as_i32(&self) -> i32 {
        match self {
            SortDirection::Ascending => 1,
            SortDirection::Descending => -1,
        }
    }

    /// Orient an ascending comparison
    pub fn apply(&self, ordering: Ordering) -> Ordering {
        match self {
            SortDirection::Ascending => ordering,
            SortDirection::Descending => ordering.reverse(),
        }
    }
}

/// Parsed sort specification; ties always fall back to ascending `_id`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SortSpec {
    pub keys: Vec<(String, SortDirection)>,
}

impl SortSpec {
    pub fn from_json(spec: &Value) -> Result<Self> {
        let map = match spec {
            Value::Object(map) => map,
            other => {
                return Err(DocLiteError::InvalidSort(format!(
                    "Sort specification must be an object, got {}",
                    other
                )))
            }
        };

        let mut keys = Vec::with_capacity(map.len());
        for (path, direction) in map {
            validate_path(path)
                .map_err(|_| DocLiteError::InvalidSort(format!("Invalid sort path: '{}'", path)))?;
            let direction = SortDirection::from_json(direction).ok_or_else(|| {
                DocLiteError::InvalidSort(format!(
                    "Sort direction for '{}' must be 1 or -1, got {}",
                    path, direction
                ))
            })?;
            keys.push((path.clone(), direction));
        }

        Ok(SortSpec { keys })
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Compare stored documents; missing values sort as null
    pub fn compare_documents(&self, a: &Document, b: &Document) -> Ordering {
        for (path, direction) in &self.keys {
            let va = a.lookup(path);
            let vb = b.lookup(path);
            let ord = compare_values(
                va.as_deref().unwrap_or(&Value::Null),
                vb.as_deref().unwrap_or(&Value::Null),
            );
            if ord != Ordering::Equal {
                return direction.apply(ord);
            }
        }
        a.id.cmp(&b.id)
    }

    /// Compare rendered records (pipeline output)
    pub fn compare_records(&self, a: &Value, b: &Value) -> Ordering {
        for (path, direction) in &self.keys {
            let ord = compare_values(
                get_path(a, path).unwrap_or(&Value::Null),
                get_path(b, path).unwrap_or(&Value::Null),
            );
            if ord != Ordering::Equal {
                return direction.apply(ord);
            }
        }
        compare_values(
            a.get(ID_FIELD).unwrap_or(&Value::Null),
            b.get(ID_FIELD).unwrap_or(&Value::Null),
        )
    }
}

// ===== Projection =====

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectionMode {
    Include,
    Exclude,
}

/// Field projection for find results
#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    pub mode: ProjectionMode,
    pub fields: Vec<String>,
    pub include_id: bool,
}

impl Default for Projection {
    /// Identity projection
    fn default() -> Self {
        Projection {
            mode: ProjectionMode::Exclude,
            fields: Vec::new(),
            include_id: true,
        }
    }
}

impl Projection {
    pub fn from_json(spec: &Value) -> Result<Self> {
        let map = match spec {
            Value::Object(map) => map,
            other => {
                return Err(DocLiteError::InvalidProjection(format!(
                    "Projection must be an object, got {}",
                    other
                )))
            }
        };

        let mut include_id = true;
        let mut id_directive = None;
        let mut mode = None;
        let mut fields: Vec<String> = Vec::with_capacity(map.len());

        for (path, flag) in map {
            let included = projection_flag(path, flag)?;
            if path == ID_FIELD {
                include_id = included;
                id_directive = Some(included);
                continue;
            }
            validate_path(path).map_err(|_| {
                DocLiteError::InvalidProjection(format!("Invalid projection path: '{}'", path))
            })?;

            let field_mode = if included {
                ProjectionMode::Include
            } else {
                ProjectionMode::Exclude
            };
            match mode {
                None => mode = Some(field_mode),
                Some(existing) if existing != field_mode => {
                    return Err(DocLiteError::InvalidProjection(
                        "Cannot mix inclusion and exclusion".to_string(),
                    ))
                }
                Some(_) => {}
            }

            if let Some(other) = fields.iter().find(|f| paths_overlap(f, path)) {
                return Err(DocLiteError::InvalidProjection(format!(
                    "Path collision between '{}' and '{}'",
                    other, path
                )));
            }
            fields.push(path.clone());
        }

        // `{_id: 1}` alone is an inclusion projection of nothing else
        let mode = match (mode, id_directive) {
            (Some(mode), _) => mode,
            (None, Some(true)) => ProjectionMode::Include,
            (None, _) => ProjectionMode::Exclude,
        };

        Ok(Projection {
            mode,
            fields,
            include_id,
        })
    }

    pub fn is_identity(&self) -> bool {
        self.mode == ProjectionMode::Exclude && self.fields.is_empty() && self.include_id
    }

    /// Render a document through the projection
    pub fn apply(&self, doc: &Document) -> Value {
        match self.mode {
            ProjectionMode::Include => {
                let mut result = Map::new();
                if self.include_id {
                    result.insert(ID_FIELD.to_string(), Value::from(doc.id));
                }
                for path in &self.fields {
                    copy_path(&doc.fields, path, &mut result);
                }
                Value::Object(result)
            }
            ProjectionMode::Exclude => {
                let mut result = match doc.to_value() {
                    Value::Object(map) => map,
                    _ => Map::new(),
                };
                if !self.include_id {
                    result.shift_remove(ID_FIELD);
                }
                for path in &self.fields {
                    crate::document::remove_path(&mut result, path);
                }
                Value::Object(result)
            }
        }
    }
}

fn projection_flag(path: &str, flag: &Value) -> Result<bool> {
    match flag {
        Value::Bool(b) => Ok(*b),
        Value::Number(n) => Ok(n.as_f64().map(|f| f != 0.0).unwrap_or(true)),
        other => Err(DocLiteError::InvalidProjection(format!(
            "Projection value for '{}' must be 0/1 or a boolean, got {}",
            path, other
        ))),
    }
}
