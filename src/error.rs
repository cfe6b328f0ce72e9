//! Engine error taxonomy.
//!
//! Retrieval callers need to distinguish "there is no knowledge" from "the
//! engine could not answer". Every failure mode therefore gets its own
//! variant; nothing is collapsed into an empty result set.

use thiserror::Error;

/// Errors produced by the knowledge engine.
#[derive(Error, Debug)]
pub enum Error {
    /// No embedding configuration could be resolved for the request.
    /// Raised instead of returning an empty retrieval result so the caller
    /// can fall back to ungrounded reasoning deliberately.
    #[error("no active embedding configuration")]
    NoActiveConfiguration,

    /// The embedding API answered with a non-2xx status.
    #[error("embedding provider error {status}: {body}")]
    Provider { status: u16, body: String },

    /// The embedding API answered 2xx but the payload did not contain the
    /// expected vector field(s).
    #[error("unexpected embedding response shape: {0}")]
    Format(String),

    /// Embedding failed mid-ingestion. The whole document was rolled back;
    /// no staged chunk reached the store.
    #[error("ingestion aborted, no chunks persisted: {source}")]
    Ingestion {
        #[source]
        source: Box<Error>,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("embedding configuration not found: {0}")]
    ConfigNotFound(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("toml parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
