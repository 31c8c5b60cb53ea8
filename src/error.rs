use crate::bank::WriteStep;
use crate::record::PoolKind;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TnuError {
    #[error("Invalid encoding: {0}")]
    InvalidEncoding(String),

    #[error("Invalid {kind} alias '{alias}'{}", suggestion_hint(.suggestion))]
    InvalidAlias {
        kind: &'static str,
        alias: String,
        suggestion: Option<String>,
    },

    #[error("Encoding error: {0}")]
    EncodingError(String),

    #[error("Empty query: at least one search predicate is required")]
    EmptyQuery,

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Backing store error: {0}")]
    BackingStore(String),

    #[error("Could not resolve {pool} '{id}': {reason}")]
    PartialResolutionFailure {
        pool: PoolKind,
        id: String,
        reason: String,
    },

    #[error("Write failed at {step} step: {reason}")]
    PoolWrite { step: WriteStep, reason: String },

    #[error("Pool error: {0}")]
    Pool(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn suggestion_hint(suggestion: &Option<String>) -> String {
    match suggestion {
        Some(s) => format!(" (did you mean '{}'?)", s),
        None => String::new(),
    }
}

impl From<rusqlite::Error> for TnuError {
    fn from(e: rusqlite::Error) -> Self {
        TnuError::BackingStore(e.to_string())
    }
}

impl From<sqlx::Error> for TnuError {
    fn from(e: sqlx::Error) -> Self {
        TnuError::BackingStore(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TnuError>;
