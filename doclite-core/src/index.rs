// src/index.rs
// Ordered compound index implementation

use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;

use crate::document::{compare_values, paths_overlap, type_rank, Document, DocumentId, OrderedValue};
use crate::error::{DocLiteError, Result};
use crate::find_options::SortDirection;
use crate::query::validate_path;

/// One (field path, direction) pair of an index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexField {
    pub path: String,
    pub direction: SortDirection,
}

/// Index definition: name plus ordered key fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDefinition {
    pub name: String,
    pub fields: Vec<IndexField>,
}

impl IndexDefinition {
    /// Parse `{"author": 1, "published_year": -1}`; the name is generated from the keys
    pub fn from_spec(spec: &Value, separator: &str) -> Result<Self> {
        let map = match spec {
            Value::Object(map) if !map.is_empty() => map,
            _ => {
                return Err(DocLiteError::InvalidIndexSpec(
                    "Index specification must be a non-empty object".to_string(),
                ))
            }
        };

        let mut fields = Vec::with_capacity(map.len());
        for (path, direction) in map {
            validate_path(path).map_err(|_| {
                DocLiteError::InvalidIndexSpec(format!("Invalid field path: '{}'", path))
            })?;
            let direction = SortDirection::from_json(direction).ok_or_else(|| {
                DocLiteError::InvalidIndexSpec(format!(
                    "Index direction for '{}' must be 1 or -1, got {}",
                    path, direction
                ))
            })?;
            fields.push(IndexField { path: path.clone(), direction });
        }

        let name = fields
            .iter()
            .map(|f| format!("{}{}{}", f.path, separator, f.direction.as_i32()))
            .collect::<Vec<_>>()
            .join(separator);

        Ok(IndexDefinition { name, fields })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn same_keys(&self, other: &IndexDefinition) -> bool {
        self.fields == other.fields
    }

    /// Key pattern rendered as `{author: 1, published_year: -1}`
    pub fn key_pattern(&self) -> String {
        let parts: Vec<String> = self
            .fields
            .iter()
            .map(|f| format!("{}: {}", f.path, f.direction.as_i32()))
            .collect();
        format!("{{{}}}", parts.join(", "))
    }

    pub fn field_paths(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.path.as_str())
    }
}

/// One component of an index key; descending components invert the order
#[derive(Debug, Clone)]
pub struct KeyPart {
    pub value: OrderedValue,
    pub direction: SortDirection,
}

impl KeyPart {
    pub fn new(value: Value, direction: SortDirection) -> Self {
        KeyPart { value: OrderedValue(value), direction }
    }
}

impl PartialEq for KeyPart {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for KeyPart {}

impl PartialOrd for KeyPart {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for KeyPart {
    fn cmp(&self, other: &Self) -> Ordering {
        self.direction.apply(self.value.cmp(&other.value))
    }
}

/// Index key tuple; a shorter tuple sorts before its extensions
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct IndexKey(pub Vec<KeyPart>);

impl IndexKey {
    fn has_prefix(&self, prefix: &[Value]) -> bool {
        self.0.len() >= prefix.len()
            && self
                .0
                .iter()
                .zip(prefix)
                .all(|(part, value)| compare_values(&part.value.0, value) == Ordering::Equal)
    }

    pub fn values(&self) -> Vec<Value> {
        self.0.iter().map(|p| p.value.0.clone()).collect()
    }
}

/// One end of a key range
#[derive(Debug, Clone, PartialEq)]
pub struct RangeBound {
    pub value: Value,
    pub inclusive: bool,
}

/// Range on the trailing index field, in value order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeyRange {
    pub lower: Option<RangeBound>,
    pub upper: Option<RangeBound>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RangePosition {
    Before,
    Inside,
    After,
}

impl KeyRange {
    /// Where a value falls relative to the range (type-bracketed like the range operators)
    fn position(&self, value: &Value) -> RangePosition {
        let mut before = false;

        if let Some(lower) = &self.lower {
            match type_rank(value).cmp(&type_rank(&lower.value)) {
                Ordering::Less => before = true,
                Ordering::Greater => return RangePosition::After,
                Ordering::Equal => match compare_values(value, &lower.value) {
                    Ordering::Less => before = true,
                    Ordering::Equal if !lower.inclusive => before = true,
                    _ => {}
                },
            }
        }

        if let Some(upper) = &self.upper {
            match type_rank(value).cmp(&type_rank(&upper.value)) {
                Ordering::Less => before = true,
                Ordering::Greater => return RangePosition::After,
                Ordering::Equal => match compare_values(value, &upper.value) {
                    Ordering::Greater => return RangePosition::After,
                    Ordering::Equal if !upper.inclusive => return RangePosition::After,
                    _ => {}
                },
            }
        }

        if before {
            RangePosition::Before
        } else {
            RangePosition::Inside
        }
    }

    /// Explain-friendly rendering, e.g. `(1950, MaxKey]`
    pub fn describe(&self) -> String {
        let lower = match &self.lower {
            Some(b) => format!("{}{}", if b.inclusive { "[" } else { "(" }, b.value),
            None => "[MinKey".to_string(),
        };
        let upper = match &self.upper {
            Some(b) => format!("{}{}", b.value, if b.inclusive { "]" } else { ")" }),
            None => "MaxKey]".to_string(),
        };
        format!("{}, {}", lower, upper)
    }
}

/// Result of an index scan
#[derive(Debug, Clone, Default)]
pub struct ScanResult {
    /// Matching ids in index key order
    pub ids: Vec<DocumentId>,
    pub keys_examined: usize,
}

/// Ordered index: key tuple -> ids sharing it
#[derive(Debug, Clone)]
pub struct Index {
    pub definition: IndexDefinition,
    entries: BTreeMap<IndexKey, BTreeSet<DocumentId>>,
    num_entries: usize,
}

impl Index {
    pub fn new(definition: IndexDefinition) -> Self {
        Index {
            definition,
            entries: BTreeMap::new(),
            num_entries: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    /// Key of a document; missing fields are indexed as null
    pub fn key_for(&self, doc: &Document) -> IndexKey {
        IndexKey(
            self.definition
                .fields
                .iter()
                .map(|field| {
                    let value = doc
                        .lookup(&field.path)
                        .map(|v| v.into_owned())
                        .unwrap_or(Value::Null);
                    KeyPart::new(value, field.direction)
                })
                .collect(),
        )
    }

    pub fn insert(&mut self, doc: &Document) {
        let key = self.key_for(doc);
        if self.entries.entry(key).or_default().insert(doc.id) {
            self.num_entries += 1;
        }
    }

    /// Remove the entry for `doc` as it is currently keyed
    pub fn remove(&mut self, doc: &Document) {
        let key = self.key_for(doc);
        self.remove_key(&key, doc.id);
    }

    fn remove_key(&mut self, key: &IndexKey, id: DocumentId) {
        if let Some(ids) = self.entries.get_mut(key) {
            if ids.remove(&id) {
                self.num_entries -= 1;
            }
            if ids.is_empty() {
                self.entries.remove(key);
            }
        }
    }

    /// Re-key a document after an update if its key changed
    pub fn update(&mut self, old: &Document, new: &Document) {
        let old_key = self.key_for(old);
        let new_key = self.key_for(new);
        if old_key != new_key {
            self.remove_key(&old_key, old.id);
            if self.entries.entry(new_key).or_default().insert(new.id) {
                self.num_entries += 1;
            }
        }
    }

    /// True if any index field overlaps one of `paths`
    pub fn covers_any(&self, paths: &[String]) -> bool {
        self.definition
            .field_paths()
            .any(|field| paths.iter().any(|p| paths_overlap(field, p)))
    }

    /// Scan keys equal to `prefix` on the leading fields, optionally bounded
    /// by `range` on the next field.
    pub fn scan(&self, prefix: &[Value], range: Option<&KeyRange>) -> ScanResult {
        let fields = &self.definition.fields;
        let mut start: Vec<KeyPart> = prefix
            .iter()
            .zip(fields)
            .map(|(value, field)| KeyPart::new(value.clone(), field.direction))
            .collect();

        let trailing = range.and_then(|r| fields.get(prefix.len()).map(|f| (r, f.direction)));
        if let Some((range, direction)) = trailing {
            let first = match direction {
                SortDirection::Ascending => range.lower.as_ref(),
                SortDirection::Descending => range.upper.as_ref(),
            };
            if let Some(bound) = first {
                start.push(KeyPart::new(bound.value.clone(), direction));
            }
        }

        let mut result = ScanResult::default();
        let bounds = (Bound::Included(IndexKey(start)), Bound::Unbounded);
        for (key, ids) in self.entries.range(bounds) {
            result.keys_examined += 1;
            if !key.has_prefix(prefix) {
                break;
            }
            if let Some((range, direction)) = trailing {
                match (range.position(&key.0[prefix.len()].value.0), direction) {
                    (RangePosition::Inside, _) => {}
                    (RangePosition::Before, SortDirection::Ascending)
                    | (RangePosition::After, SortDirection::Descending) => continue,
                    _ => break,
                }
            }
            result.ids.extend(ids.iter().copied());
        }

        result
    }

    /// Number of (key, id) entries
    pub fn len(&self) -> usize {
        self.num_entries
    }

    pub fn is_empty(&self) -> bool {
        self.num_entries == 0
    }

    pub fn distinct_keys(&self) -> usize {
        self.entries.len()
    }

    /// All entries in key order
    pub fn entries(&self) -> impl Iterator<Item = (&IndexKey, &BTreeSet<DocumentId>)> {
        self.entries.iter()
    }
}

/// Index Manager - all indexes of a collection, in declaration order
#[derive(Debug, Clone, Default)]
pub struct IndexManager {
    indexes: Vec<Index>,
}

/// Outcome of `IndexManager::create_index`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexCreation {
    Created(String),
    Existing(String),
}

impl IndexCreation {
    pub fn name(&self) -> &str {
        match self {
            IndexCreation::Created(name) | IndexCreation::Existing(name) => name,
        }
    }
}

impl IndexManager {
    pub fn new() -> Self {
        IndexManager { indexes: Vec::new() }
    }

    /// Create an index and build it from `docs`.
    /// An index with identical keys is reused; a name clash with different keys fails.
    pub fn create_index<'a>(
        &mut self,
        definition: IndexDefinition,
        docs: impl Iterator<Item = &'a Document>,
    ) -> Result<IndexCreation> {
        if let Some(existing) = self.indexes.iter().find(|i| i.definition.same_keys(&definition)) {
            return Ok(IndexCreation::Existing(existing.name().to_string()));
        }

        if let Some(existing) = self.get(&definition.name) {
            return Err(DocLiteError::IndexAlreadyExists {
                name: definition.name.clone(),
                existing: existing.definition.key_pattern(),
                requested: definition.key_pattern(),
            });
        }

        let mut index = Index::new(definition);
        for doc in docs {
            index.insert(doc);
        }
        let name = index.name().to_string();
        self.indexes.push(index);
        Ok(IndexCreation::Created(name))
    }

    pub fn drop_index(&mut self, name: &str) -> Result<()> {
        let position = self
            .indexes
            .iter()
            .position(|i| i.name() == name)
            .ok_or_else(|| DocLiteError::IndexNotFound(name.to_string()))?;
        self.indexes.remove(position);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Index> {
        self.indexes.iter().find(|i| i.name() == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Index> {
        self.indexes.iter()
    }

    /// Index names in declaration order
    pub fn list_indexes(&self) -> Vec<String> {
        self.indexes.iter().map(|i| i.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.indexes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indexes.is_empty()
    }

    pub fn on_insert(&mut self, doc: &Document) {
        for index in &mut self.indexes {
            index.insert(doc);
        }
    }

    pub fn on_remove(&mut self, doc: &Document) {
        for index in &mut self.indexes {
            index.remove(doc);
        }
    }

    /// Update only indexes whose fields overlap the modified paths
    pub fn on_update(&mut self, old: &Document, new: &Document, modified: &[String]) {
        for index in self.indexes.iter_mut().filter(|i| i.covers_any(modified)) {
            index.update(old, new);
        }
    }
}
