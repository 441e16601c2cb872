// src/error.rs
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DocLiteError {
    #[error("Collection '{0}' not found")]
    CollectionNotFound(String),

    #[error("Collection '{0}' already exists")]
    CollectionAlreadyExists(String),

    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    #[error("Invalid projection: {0}")]
    InvalidProjection(String),

    #[error("Invalid sort: {0}")]
    InvalidSort(String),

    #[error("Invalid update: {0}")]
    InvalidUpdate(String),

    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    #[error("Invalid pipeline stage: {0}")]
    InvalidPipelineStage(String),

    #[error("Arithmetic error: {0}")]
    ArithmeticError(String),

    #[error("Index '{name}' already exists with keys {existing}, requested {requested}")]
    IndexAlreadyExists {
        name: String,
        existing: String,
        requested: String,
    },

    #[error("Invalid index specification: {0}")]
    InvalidIndexSpec(String),

    #[error("Index '{0}' not found")]
    IndexNotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, DocLiteError>;
