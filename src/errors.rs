//! Typed error taxonomy for the form-builder API.
//!
//! One enum covers every failure a request can surface: missing entities,
//! write-locked forms, slug collisions, bad input, and upstream generation
//! failures. The HTTP status mapping lives with the handlers in `api.rs`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Form {id} not found")]
    FormNotFound { id: String },

    #[error("Field {id} not found")]
    FieldNotFound { id: String },

    #[error("Slug already exists")]
    SlugTaken,

    #[error("Form already published")]
    AlreadyPublished,

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    BadGateway(String),

    #[error("Database lock poisoned")]
    LockPoisoned,

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}
