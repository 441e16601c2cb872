// doclite-core/src/lib.rs
// Embeddable in-memory document query and aggregation engine

pub mod error;
pub mod config;
pub mod document;
pub mod query;
pub mod index;
pub mod query_planner;
pub mod find_options;
pub mod cursor;
pub mod update;
pub mod expression;
pub mod aggregation;
pub mod collection_core;
pub mod database;

// Public exports
pub use error::{DocLiteError, Result};
pub use config::EngineConfig;
pub use document::{Document, DocumentId};
pub use query::Query;
pub use index::{IndexDefinition, IndexManager};
pub use query_planner::{ExplainOutput, QueryPlan, QueryPlanner};
pub use find_options::{FindOptions, Projection, SortDirection, SortSpec};
pub use cursor::{Cursor, CursorIter};
pub use update::UpdateSpec;
pub use aggregation::Pipeline;
pub use collection_core::CollectionCore;
pub use database::Database;
