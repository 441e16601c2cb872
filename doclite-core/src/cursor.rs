// src/cursor.rs
// Lazy, restartable find cursor: filter → sort → skip → limit → projection

use serde_json::Value;
use std::sync::Arc;

use crate::collection_core::CollectionCore;
use crate::document::Document;
use crate::error::Result;
use crate::find_options::{Projection, SortSpec};
use crate::query::Query;

/// Description of a find; nothing runs until iteration
#[derive(Debug, Clone)]
pub struct Cursor {
    collection: CollectionCore,
    query: Query,
    projection: Projection,
    sort: SortSpec,
    skip: usize,
    limit: Option<usize>,
}

impl Cursor {
    pub(crate) fn new(collection: CollectionCore, query: Query) -> Self {
        Cursor {
            collection,
            query,
            projection: Projection::default(),
            sort: SortSpec::default(),
            skip: 0,
            limit: None,
        }
    }

    pub fn projection(mut self, spec: &Value) -> Result<Self> {
        self.projection = Projection::from_json(spec)?;
        Ok(self)
    }

    pub fn sort(mut self, spec: &Value) -> Result<Self> {
        self.sort = SortSpec::from_json(spec)?;
        Ok(self)
    }

    pub fn skip(mut self, n: usize) -> Self {
        self.skip = n;
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    pub(crate) fn with_projection(mut self, projection: Projection) -> Self {
        self.projection = projection;
        self
    }

    pub(crate) fn with_sort(mut self, sort: SortSpec) -> Self {
        self.sort = sort;
        self
    }

    /// Start an iteration over the collection's current state
    pub fn iter(&self) -> CursorIter {
        CursorIter {
            inner: self.documents(),
            projection: self.projection.clone(),
        }
    }

    pub fn to_vec(&self) -> Vec<Value> {
        self.iter().collect()
    }

    /// Number of matching documents, ignoring skip and limit
    pub fn count(&self) -> usize {
        let snapshot = self.collection.snapshot(&self.query);
        snapshot.documents.iter().filter(|d| self.query.matches(d)).count()
    }

    /// Matching documents after sort/skip/limit, before projection
    fn documents(&self) -> Box<dyn Iterator<Item = Arc<Document>> + Send> {
        let snapshot = self.collection.snapshot(&self.query);
        let query = self.query.clone();
        let take = self.limit.unwrap_or(usize::MAX);

        if self.sort.is_empty() {
            return Box::new(
                snapshot
                    .documents
                    .into_iter()
                    .filter(move |d| query.matches(d))
                    .skip(self.skip)
                    .take(take),
            );
        }

        let mut matched: Vec<Arc<Document>> = snapshot
            .documents
            .into_iter()
            .filter(|d| query.matches(d))
            .collect();
        matched.sort_by(|a, b| self.sort.compare_documents(a, b));
        Box::new(matched.into_iter().skip(self.skip).take(take))
    }
}

impl<'a> IntoIterator for &'a Cursor {
    type Item = Value;
    type IntoIter = CursorIter;

    fn into_iter(self) -> CursorIter {
        self.iter()
    }
}

/// One pass over a cursor; holds document handles, never the collection lock
pub struct CursorIter {
    inner: Box<dyn Iterator<Item = Arc<Document>> + Send>,
    projection: Projection,
}

impl Iterator for CursorIter {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        self.inner.next().map(|doc| self.projection.apply(&doc))
    }
}

#[cfg(test)]
mod tests {
    use crate::collection_core::CollectionCore;
    use crate::config::EngineConfig;
    use serde_json::{json, Value};
    use std::sync::Arc;

    fn books() -> CollectionCore {
        let coll = CollectionCore::new("books", Arc::new(EngineConfig::default()));
        for (title, price) in [("A", 30), ("B", 10), ("C", 20), ("D", 10), ("E", 50)] {
            coll.insert_one(json!({"title": title, "price": price})).unwrap();
        }
        coll
    }

    fn titles(values: Vec<Value>) -> Vec<String> {
        values
            .iter()
            .map(|v| v["title"].as_str().unwrap().to_string())
            .collect()
    }

    #[test]
    fn test_default_order_is_insertion_order() {
        let cursor = books().find(&json!({})).unwrap();
        assert_eq!(titles(cursor.to_vec()), vec!["A", "B", "C", "D", "E"]);
    }

    #[test]
    fn test_sort_skip_limit_projection() {
        let cursor = books()
            .find(&json!({"price": {"$lt": 50}}))
            .unwrap()
            .sort(&json!({"price": 1}))
            .unwrap()
            .skip(1)
            .limit(2)
            .projection(&json!({"title": 1, "_id": 0}))
            .unwrap();

        // B and D tie on price; ascending id breaks the tie
        assert_eq!(cursor.to_vec(), vec![json!({"title": "D"}), json!({"title": "C"})]);
    }

    #[test]
    fn test_cursor_is_restartable_and_sees_live_state() {
        let coll = books();
        let cursor = coll.find(&json!({"price": 10})).unwrap();
        assert_eq!(cursor.iter().count(), 2);

        coll.insert_one(json!({"title": "F", "price": 10})).unwrap();
        assert_eq!(cursor.iter().count(), 3);
        assert_eq!(cursor.count(), 3);
    }

    #[test]
    fn test_iteration_is_a_snapshot() {
        let coll = books();
        let cursor = coll.find(&json!({})).unwrap();
        let mut iter = cursor.iter();
        assert!(iter.next().is_some());

        // writes do not block on, or leak into, a running iteration
        coll.delete_many(&json!({})).unwrap();
        assert_eq!(iter.count(), 4);
        assert_eq!(cursor.iter().count(), 0);
    }

    #[test]
    fn test_count_ignores_skip_and_limit() {
        let cursor = books().find(&json!({})).unwrap().skip(2).limit(1);
        assert_eq!(cursor.count(), 5);
        assert_eq!(cursor.to_vec().len(), 1);
    }

    #[test]
    fn test_invalid_builder_specs() {
        let coll = books();
        assert!(coll.find(&json!({})).unwrap().sort(&json!({"price": 0})).is_err());
        assert!(coll.find(&json!({})).unwrap().projection(&json!({"a": 1, "b": 0})).is_err());
    }

    #[test]
    fn test_for_loop_over_cursor() {
        let cursor = books().find(&json!({"price": 10})).unwrap();
        let mut seen = 0;
        for record in &cursor {
            assert_eq!(record["price"], 10);
            seen += 1;
        }
        assert_eq!(seen, 2);
    }
}
