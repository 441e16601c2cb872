// src/collection_core.rs
// Collection store: documents, indexes and the id counter behind one lock

use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::aggregation::Pipeline;
use crate::config::EngineConfig;
use crate::cursor::Cursor;
use crate::document::{Document, DocumentId, OrderedValue, ID_FIELD};
use crate::error::{DocLiteError, Result};
use crate::find_options::{FindOptions, Projection, SortSpec};
use crate::index::{Index, IndexCreation, IndexDefinition, IndexManager};
use crate::query::Query;
use crate::query_planner::{ExplainOutput, QueryPlan, QueryPlanner};
use crate::update::UpdateSpec;

/// State guarded by the collection lock
#[derive(Debug, Default)]
pub(crate) struct CollectionData {
    documents: BTreeMap<DocumentId, Arc<Document>>,
    indexes: IndexManager,
    last_id: u64,
}

/// Documents a read will examine, captured under the read lock
#[derive(Debug)]
pub(crate) struct Snapshot {
    pub plan: QueryPlan,
    /// Candidate documents in id order
    pub documents: Vec<Arc<Document>>,
    pub keys_examined: usize,
    pub collection_size: usize,
}

impl CollectionData {
    fn snapshot(&self, query: &Query) -> Snapshot {
        let plan = QueryPlanner::plan(query, &self.indexes);
        let collection_size = self.documents.len();

        match QueryPlanner::scan(&plan, &self.indexes) {
            Some(mut scan) => {
                scan.ids.sort_unstable();
                let documents = scan
                    .ids
                    .iter()
                    .filter_map(|id| self.documents.get(id).cloned())
                    .collect();
                Snapshot {
                    plan,
                    documents,
                    keys_examined: scan.keys_examined,
                    collection_size,
                }
            }
            None => Snapshot {
                plan: QueryPlan::CollectionScan,
                documents: self.documents.values().cloned().collect(),
                keys_examined: 0,
                collection_size,
            },
        }
    }

    /// Matching documents in id order, at most `limit`
    fn matching(&self, query: &Query, limit: Option<usize>) -> Vec<Arc<Document>> {
        self.snapshot(query)
            .documents
            .into_iter()
            .filter(|d| query.matches(d))
            .take(limit.unwrap_or(usize::MAX))
            .collect()
    }
}

/// Cloneable handle to one named collection
#[derive(Debug, Clone)]
pub struct CollectionCore {
    name: Arc<str>,
    config: Arc<EngineConfig>,
    data: Arc<RwLock<CollectionData>>,
}

impl CollectionCore {
    pub fn new(name: &str, config: Arc<EngineConfig>) -> Self {
        CollectionCore {
            name: Arc::from(name),
            config,
            data: Arc::new(RwLock::new(CollectionData::default())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.data.read().documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn parse_filter(&self, filter: &Value) -> Result<Query> {
        Query::from_json_with_depth(filter, self.config.max_expression_depth)
    }

    pub(crate) fn snapshot(&self, query: &Query) -> Snapshot {
        self.data.read().snapshot(query)
    }

    // ========== INSERT ==========

    /// Insert one document - returns the assigned DocumentId
    pub fn insert_one(&self, document: Value) -> Result<DocumentId> {
        let fields = Self::validate_new_document(document)?;

        let mut data = self.data.write();
        Ok(Self::insert_fields(&mut data, fields))
    }

    /// Insert several documents; nothing is inserted if any is invalid
    pub fn insert_many(&self, documents: Vec<Value>) -> Result<Vec<DocumentId>> {
        let validated = documents
            .into_iter()
            .map(Self::validate_new_document)
            .collect::<Result<Vec<_>>>()?;

        let mut data = self.data.write();
        let ids = validated
            .into_iter()
            .map(|fields| Self::insert_fields(&mut data, fields))
            .collect();
        Ok(ids)
    }

    fn validate_new_document(document: Value) -> Result<serde_json::Map<String, Value>> {
        match document {
            Value::Object(fields) if fields.contains_key(ID_FIELD) => Err(DocLiteError::InvalidDocument(
                "_id is assigned by the engine and cannot be supplied".to_string(),
            )),
            Value::Object(fields) => Ok(fields),
            other => Err(DocLiteError::InvalidDocument(format!(
                "Document must be an object, got {}",
                other
            ))),
        }
    }

    fn insert_fields(data: &mut CollectionData, fields: serde_json::Map<String, Value>) -> DocumentId {
        let id = DocumentId::new_auto(data.last_id);
        data.last_id = id.as_u64();

        let doc = Document::new(id, fields);
        data.indexes.on_insert(&doc);
        data.documents.insert(id, Arc::new(doc));
        id
    }

    // ========== READ ==========

    /// Lazy cursor over documents matching `filter`
    pub fn find(&self, filter: &Value) -> Result<Cursor> {
        Ok(Cursor::new(self.clone(), self.parse_filter(filter)?))
    }

    /// One-shot find with options; every option is validated before running
    pub fn find_with_options(&self, filter: &Value, options: &FindOptions) -> Result<Vec<Value>> {
        let mut cursor = Cursor::new(self.clone(), self.parse_filter(filter)?);
        if let Some(projection) = &options.projection {
            cursor = cursor.with_projection(Projection::from_json(projection)?);
        }
        if let Some(sort) = &options.sort {
            cursor = cursor.with_sort(SortSpec::from_json(sort)?);
        }
        if let Some(skip) = options.skip {
            cursor = cursor.skip(skip);
        }
        if let Some(limit) = options.limit {
            cursor = cursor.limit(limit);
        }
        Ok(cursor.to_vec())
    }

    /// First matching document in id order
    pub fn find_one(&self, filter: &Value) -> Result<Option<Value>> {
        Ok(self.find(filter)?.limit(1).iter().next())
    }

    pub fn count_documents(&self, filter: &Value) -> Result<u64> {
        Ok(self.find(filter)?.count() as u64)
    }

    /// Distinct values of `field` among matching documents, in first-seen order
    pub fn distinct(&self, field: &str, filter: &Value) -> Result<Vec<Value>> {
        let query = self.parse_filter(filter)?;
        let documents = self.data.read().matching(&query, None);

        let mut seen = BTreeSet::new();
        let mut values = Vec::new();
        for doc in &documents {
            if let Some(value) = doc.lookup(field) {
                let value = value.into_owned();
                if seen.insert(OrderedValue(value.clone())) {
                    values.push(value);
                }
            }
        }
        Ok(values)
    }

    // ========== UPDATE / DELETE ==========

    /// Update the first matching document - returns the modified count (0 or 1)
    pub fn update_one(&self, filter: &Value, update: &Value) -> Result<u64> {
        self.update_matching(filter, update, Some(1))
    }

    /// Update every matching document - returns the modified count
    pub fn update_many(&self, filter: &Value, update: &Value) -> Result<u64> {
        self.update_matching(filter, update, None)
    }

    fn update_matching(&self, filter: &Value, update: &Value, limit: Option<usize>) -> Result<u64> {
        let query = self.parse_filter(filter)?;
        let spec = UpdateSpec::from_json(update)?;
        let modified_paths = spec.modified_paths();

        let mut data = self.data.write();
        let targets = data.matching(&query, limit);

        // apply to copies first so a failure leaves the collection untouched
        let mut changed = Vec::with_capacity(targets.len());
        for old in &targets {
            let mut new = Document::clone(old);
            if spec.apply(&mut new)? {
                changed.push((Arc::clone(old), new));
            }
        }

        let modified = changed.len();
        for (old, new) in changed {
            data.indexes.on_update(&old, &new, &modified_paths);
            data.documents.insert(new.id, Arc::new(new));
        }

        log::debug!("{}: matched {}, modified {} document(s)", self.name, targets.len(), modified);
        Ok(modified as u64)
    }

    /// Delete the first matching document - returns the deleted count (0 or 1)
    pub fn delete_one(&self, filter: &Value) -> Result<u64> {
        self.delete_matching(filter, Some(1))
    }

    pub fn delete_many(&self, filter: &Value) -> Result<u64> {
        self.delete_matching(filter, None)
    }

    fn delete_matching(&self, filter: &Value, limit: Option<usize>) -> Result<u64> {
        let query = self.parse_filter(filter)?;

        let mut data = self.data.write();
        let targets = data.matching(&query, limit);
        for doc in &targets {
            data.indexes.on_remove(doc);
            data.documents.remove(&doc.id);
        }

        log::debug!("{}: deleted {} document(s)", self.name, targets.len());
        Ok(targets.len() as u64)
    }

    // ========== AGGREGATION ==========

    /// Execute aggregation pipeline
    ///
    /// # Example
    /// ```
    /// use doclite_core::Database;
    /// use serde_json::json;
    ///
    /// let db = Database::new();
    /// let books = db.create_collection("books").unwrap();
    /// books.insert_one(json!({"genre": "Drama", "price": 30})).unwrap();
    ///
    /// let results = books.aggregate(&json!([
    ///     {"$group": {"_id": "$genre", "avg": {"$avg": "$price"}}},
    ///     {"$sort": {"avg": -1}}
    /// ])).unwrap();
    /// assert_eq!(results[0]["_id"], "Drama");
    /// ```
    pub fn aggregate(&self, pipeline_json: &Value) -> Result<Vec<Value>> {
        let pipeline = Pipeline::from_json_with_depth(pipeline_json, self.config.max_expression_depth)?;

        // a leading $match goes through the planner
        let (query, start) = match pipeline.leading_match() {
            Some(query) => (query.clone(), 1),
            None => (Query::new(), 0),
        };
        let snapshot = self.snapshot(&query);

        let records = snapshot
            .documents
            .iter()
            .filter(|d| query.matches(d))
            .map(|d| d.to_value())
            .collect();

        pipeline.execute_from(start, records)
    }

    // ========== INDEX OPERATIONS ==========

    /// Create an index from a key spec like `{"author": 1, "published_year": -1}`
    pub fn create_index(&self, spec: &Value) -> Result<String> {
        let definition = IndexDefinition::from_spec(spec, &self.config.index_name_separator)?;
        self.install_index(definition)
    }

    /// Same as `create_index`, with options such as `{"name": "by_author"}`
    pub fn create_index_with_options(&self, spec: &Value, options: &Value) -> Result<String> {
        let mut definition = IndexDefinition::from_spec(spec, &self.config.index_name_separator)?;
        match options.get("name") {
            None | Some(Value::Null) => {}
            Some(Value::String(name)) if !name.is_empty() => definition = definition.with_name(name.clone()),
            Some(other) => {
                return Err(DocLiteError::InvalidIndexSpec(format!(
                    "Index name must be a non-empty string, got {}",
                    other
                )))
            }
        }
        self.install_index(definition)
    }

    fn install_index(&self, definition: IndexDefinition) -> Result<String> {
        let mut data = self.data.write();
        let CollectionData { documents, indexes, .. } = &mut *data;

        let creation = indexes.create_index(definition, documents.values().map(|d| d.as_ref()))?;
        match &creation {
            IndexCreation::Created(name) => {
                log::info!("{}: created index {} over {} documents", self.name, name, documents.len())
            }
            IndexCreation::Existing(name) => log::debug!("{}: index {} already exists", self.name, name),
        }
        Ok(creation.name().to_string())
    }

    pub fn drop_index(&self, name: &str) -> Result<()> {
        self.data.write().indexes.drop_index(name)?;
        log::info!("{}: dropped index {}", self.name, name);
        Ok(())
    }

    /// Index names in declaration order
    pub fn list_indexes(&self) -> Vec<String> {
        self.data.read().indexes.list_indexes()
    }

    /// True if every index equals one rebuilt from the current documents
    pub fn indexes_consistent(&self) -> bool {
        let data = self.data.read();
        let consistent = data.indexes.iter().all(|index| {
            let mut rebuilt = Index::new(index.definition.clone());
            for doc in data.documents.values() {
                rebuilt.insert(doc);
            }
            rebuilt.len() == index.len() && rebuilt.entries().eq(index.entries())
        });
        consistent
    }

    // ========== QUERY OPTIMIZATION OPERATIONS ==========

    /// Run `filter` and report the chosen plan with execution statistics
    pub fn explain(&self, filter: &Value) -> Result<ExplainOutput> {
        let query = self.parse_filter(filter)?;

        let data = self.data.read();
        let snapshot = data.snapshot(&query);
        let index_bounds = snapshot
            .plan
            .index_name()
            .and_then(|name| data.indexes.get(name))
            .map(|index| snapshot.plan.index_bounds(index))
            .unwrap_or(Value::Null);
        drop(data);

        let n_returned = snapshot.documents.iter().filter(|d| query.matches(d)).count();
        let estimated_cost = match snapshot.plan {
            QueryPlan::CollectionScan => snapshot.collection_size,
            QueryPlan::IndexScan { .. } => snapshot.documents.len(),
        };

        Ok(ExplainOutput {
            plan: snapshot.plan,
            index_bounds,
            estimated_cost,
            keys_examined: snapshot.keys_examined,
            docs_examined: snapshot.documents.len(),
            n_returned,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn collection() -> CollectionCore {
        CollectionCore::new("books", Arc::new(EngineConfig::default()))
    }

    #[test]
    fn test_insert_assigns_monotonic_ids() {
        let coll = collection();
        let a = coll.insert_one(json!({"title": "A"})).unwrap();
        let b = coll.insert_one(json!({"title": "B"})).unwrap();
        coll.delete_one(&json!({"title": "B"})).unwrap();
        let c = coll.insert_one(json!({"title": "C"})).unwrap();

        assert_eq!((a.0, b.0, c.0), (1, 2, 3));
        assert_eq!(coll.len(), 2);
    }

    #[test]
    fn test_insert_rejects_id_and_non_objects() {
        let coll = collection();
        assert!(matches!(
            coll.insert_one(json!({"_id": 5, "title": "A"})),
            Err(DocLiteError::InvalidDocument(_))
        ));
        assert!(coll.insert_one(json!("text")).is_err());

        // all or nothing
        assert!(coll.insert_many(vec![json!({"a": 1}), json!(3)]).is_err());
        assert!(coll.is_empty());
    }

    #[test]
    fn test_update_one_affects_first_match_only() {
        let coll = collection();
        coll.insert_many(vec![
            json!({"title": "A", "genre": "Drama", "price": 10}),
            json!({"title": "B", "genre": "Drama", "price": 20}),
        ])
        .unwrap();

        let n = coll.update_one(&json!({"genre": "Drama"}), &json!({"$set": {"price": 99}})).unwrap();
        assert_eq!(n, 1);
        assert_eq!(coll.find_one(&json!({"title": "A"})).unwrap().unwrap()["price"], 99);
        assert_eq!(coll.find_one(&json!({"title": "B"})).unwrap().unwrap()["price"], 20);

        let none = coll.update_one(&json!({"genre": "Poetry"}), &json!({"price": 1})).unwrap();
        assert_eq!(none, 0);
    }

    #[test]
    fn test_update_counts_only_modified_documents() {
        let coll = collection();
        coll.insert_many(vec![
            json!({"title": "A", "price": 17}),
            json!({"title": "B", "price": 17}),
            json!({"title": "C", "price": 20}),
        ])
        .unwrap();

        assert_eq!(coll.update_one(&json!({"title": "A"}), &json!({"$set": {"price": 17}})).unwrap(), 0);
        assert_eq!(coll.update_many(&json!({}), &json!({"$set": {"price": 17}})).unwrap(), 1);
        assert_eq!(coll.update_many(&json!({}), &json!({"$unset": {"isbn": ""}})).unwrap(), 0);
        assert_eq!(coll.update_many(&json!({}), &json!({"$inc": {"price": 0}})).unwrap(), 0);
        assert_eq!(coll.count_documents(&json!({"price": 17})).unwrap(), 3);

        assert_eq!(coll.update_many(&json!({}), &json!({"$inc": {"price": 1}})).unwrap(), 3);
    }

    #[test]
    fn test_failed_update_leaves_collection_untouched() {
        let coll = collection();
        coll.create_index(&json!({"price": 1})).unwrap();
        coll.insert_many(vec![
            json!({"title": "A", "price": 10}),
            json!({"title": "B", "price": "free"}),
        ])
        .unwrap();

        let err = coll.update_many(&json!({}), &json!({"$inc": {"price": 1}})).unwrap_err();
        assert!(matches!(err, DocLiteError::InvalidUpdate(_)));
        assert_eq!(coll.count_documents(&json!({"price": 10})).unwrap(), 1);
        assert!(coll.indexes_consistent());
    }

    #[test]
    fn test_update_maintains_indexes() {
        let coll = collection();
        coll.create_index(&json!({"price": 1})).unwrap();
        coll.insert_one(json!({"title": "A", "price": 10})).unwrap();

        coll.update_one(&json!({"title": "A"}), &json!({"$set": {"price": 17}})).unwrap();

        assert_eq!(coll.explain(&json!({"price": 10})).unwrap().n_returned, 0);
        let explain = coll.explain(&json!({"price": 17})).unwrap();
        assert_eq!(explain.stage(), "IXSCAN");
        assert_eq!(explain.n_returned, 1);
        assert!(coll.indexes_consistent());
    }

    #[test]
    fn test_delete_many_and_distinct() {
        let coll = collection();
        coll.insert_many(vec![
            json!({"genre": "Drama"}),
            json!({"genre": "Fiction"}),
            json!({"genre": "Drama"}),
            json!({"title": "untagged"}),
        ])
        .unwrap();

        assert_eq!(
            coll.distinct("genre", &json!({})).unwrap(),
            vec![json!("Drama"), json!("Fiction")]
        );
        assert_eq!(coll.delete_many(&json!({"genre": "Drama"})).unwrap(), 2);
        assert_eq!(coll.len(), 2);
    }

    #[test]
    fn test_create_index_backfills_and_is_idempotent() {
        let coll = collection();
        coll.insert_many(vec![json!({"genre": "Drama"}), json!({"genre": "Fiction"})]).unwrap();

        let name = coll.create_index(&json!({"genre": 1})).unwrap();
        assert_eq!(name, "genre_1");
        assert_eq!(coll.create_index(&json!({"genre": 1})).unwrap(), "genre_1");
        assert_eq!(coll.list_indexes(), vec!["genre_1".to_string()]);

        let explain = coll.explain(&json!({"genre": "Drama"})).unwrap();
        assert_eq!(explain.index_name(), Some("genre_1"));
        assert_eq!(explain.docs_examined, 1);
    }

    #[test]
    fn test_create_index_with_custom_name() {
        let coll = collection();
        let name = coll
            .create_index_with_options(&json!({"author": 1}), &json!({"name": "by_author"}))
            .unwrap();
        assert_eq!(name, "by_author");

        let clash = coll.create_index_with_options(&json!({"title": 1}), &json!({"name": "by_author"}));
        assert!(matches!(clash, Err(DocLiteError::IndexAlreadyExists { .. })));

        assert!(coll.create_index_with_options(&json!({"title": 1}), &json!({"name": 3})).is_err());
        coll.drop_index("by_author").unwrap();
        assert!(matches!(coll.drop_index("by_author"), Err(DocLiteError::IndexNotFound(_))));
    }

    #[test]
    fn test_find_with_options() {
        let coll = collection();
        for price in [5, 3, 9, 1] {
            coll.insert_one(json!({"price": price})).unwrap();
        }

        let options = FindOptions::new()
            .with_sort(json!({"price": -1}))
            .with_limit(2)
            .with_projection(json!({"_id": 0}));
        let results = coll.find_with_options(&json!({}), &options).unwrap();
        assert_eq!(results, vec![json!({"price": 9}), json!({"price": 5})]);

        let bad = FindOptions::new().with_sort(json!({"price": "desc"}));
        assert!(matches!(
            coll.find_with_options(&json!({}), &bad),
            Err(DocLiteError::InvalidSort(_))
        ));
    }

    #[test]
    fn test_aggregate_uses_leading_match() {
        let coll = collection();
        coll.create_index(&json!({"genre": 1})).unwrap();
        coll.insert_many(vec![
            json!({"genre": "Drama", "price": 20}),
            json!({"genre": "Fiction", "price": 10}),
            json!({"genre": "Drama", "price": 40}),
        ])
        .unwrap();

        let results = coll
            .aggregate(&json!([
                {"$match": {"genre": "Drama"}},
                {"$group": {"_id": null, "total": {"$sum": "$price"}}}
            ]))
            .unwrap();
        assert_eq!(results, vec![json!({"_id": null, "total": 60})]);
    }

    #[test]
    fn test_explain_collection_scan() {
        let coll = collection();
        coll.insert_many(vec![json!({"a": 1}), json!({"a": 2}), json!({"a": 1})]).unwrap();

        let explain = coll.explain(&json!({"a": 1})).unwrap();
        assert_eq!(explain.stage(), "COLLSCAN");
        assert_eq!(explain.docs_examined, 3);
        assert_eq!(explain.estimated_cost, 3);
        assert_eq!(explain.n_returned, 2);
        assert_eq!(explain.keys_examined, 0);
    }
}
