//! Exchange-format errors.

use thiserror::Error;

/// Failure to read an entity data document. Per-record import problems are
/// not errors; they are collected as strings so the rest of the document
/// still imports.
#[derive(Debug, Error)]
pub enum DataError {
    /// The document is not well-formed JSON, or a record does not match
    /// the expected shape.
    #[error("invalid entity data at byte {offset}: {source}")]
    Parse {
        offset: usize,
        #[source]
        source: serde_json::Error,
    },

    /// The document parsed but its top level is not an array.
    #[error("entity data must be a JSON array of records")]
    NotAnArray,
}
