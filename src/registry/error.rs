//! Catalog loading errors

use std::io;
use thiserror::Error;

/// A single catalog entry that could not be used
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CatalogParseError {
    /// Entry is not an object, misses a required field, or has a field of the wrong type
    #[error("catalog entry {index} is invalid: {reason}")]
    InvalidEntry { index: usize, reason: String },
    /// Entry has no broadcast identifier and can never be matched
    #[error("catalog entry {index} (id {id}) has no beaconUid")]
    MissingUid { index: usize, id: i64 },
}

impl CatalogParseError {
    pub fn index(&self) -> usize {
        match self {
            CatalogParseError::InvalidEntry { index, .. } => *index,
            CatalogParseError::MissingUid { index, .. } => *index,
        }
    }
}

/// The catalog as a whole could not be read
#[derive(Debug, Error)]
pub enum CatalogLoadError {
    #[error("failed to read catalog '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("catalog is not valid JSON: {0}")]
    InvalidDocument(#[from] serde_json::Error),
    #[error("catalog has no top-level 'items' array")]
    MissingItems,
}
