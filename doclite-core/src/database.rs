// src/database.rs
// Database: registry of named collections

use ahash::RandomState;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;

use crate::collection_core::CollectionCore;
use crate::config::EngineConfig;
use crate::document::DocumentId;
use crate::error::{DocLiteError, Result};
use crate::find_options::FindOptions;
use crate::query_planner::ExplainOutput;

/// In-memory database - collections are created and dropped explicitly
#[derive(Debug)]
pub struct Database {
    collections: DashMap<String, CollectionCore, RandomState>,
    config: Arc<EngineConfig>,
}

impl Default for Database {
    fn default() -> Self {
        Self::new()
    }
}

impl Database {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Database {
            collections: DashMap::with_hasher(RandomState::new()),
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Create an empty collection
    pub fn create_collection(&self, name: &str) -> Result<CollectionCore> {
        match self.collections.entry(name.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(DocLiteError::CollectionAlreadyExists(name.to_string()))
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                let collection = CollectionCore::new(name, Arc::clone(&self.config));
                entry.insert(collection.clone());
                log::info!("created collection {}", name);
                Ok(collection)
            }
        }
    }

    /// Drop collection with all its documents and indexes
    pub fn drop_collection(&self, name: &str) -> Result<()> {
        self.collections
            .remove(name)
            .map(|_| log::info!("dropped collection {}", name))
            .ok_or_else(|| DocLiteError::CollectionNotFound(name.to_string()))
    }

    /// Handle to an existing collection
    pub fn collection(&self, name: &str) -> Result<CollectionCore> {
        self.collections
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| DocLiteError::CollectionNotFound(name.to_string()))
    }

    /// Collection names, sorted
    pub fn list_collections(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    // ========== CONVENIENCE OPERATIONS ==========

    pub fn insert(&self, name: &str, document: Value) -> Result<DocumentId> {
        self.collection(name)?.insert_one(document)
    }

    pub fn find(&self, name: &str, filter: &Value, options: &FindOptions) -> Result<Vec<Value>> {
        self.collection(name)?.find_with_options(filter, options)
    }

    pub fn update_one(&self, name: &str, filter: &Value, update: &Value) -> Result<u64> {
        self.collection(name)?.update_one(filter, update)
    }

    pub fn delete_one(&self, name: &str, filter: &Value) -> Result<u64> {
        self.collection(name)?.delete_one(filter)
    }

    pub fn aggregate(&self, name: &str, pipeline: &Value) -> Result<Vec<Value>> {
        self.collection(name)?.aggregate(pipeline)
    }

    pub fn create_index(&self, name: &str, spec: &Value) -> Result<String> {
        self.collection(name)?.create_index(spec)
    }

    pub fn create_index_with_options(&self, name: &str, spec: &Value, options: &Value) -> Result<String> {
        self.collection(name)?.create_index_with_options(spec, options)
    }

    pub fn explain(&self, name: &str, filter: &Value) -> Result<ExplainOutput> {
        self.collection(name)?.explain(filter)
    }
}
