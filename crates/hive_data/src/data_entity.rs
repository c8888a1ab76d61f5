//! The on-disk record shape.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One exported entity. Component payloads stay as raw JSON values keyed
/// by registered component name, so a document can round-trip through
/// stores built against the same schema registry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataEntity {
    /// Document-local identifier. Child references in `children` point at
    /// these values; they do not survive import.
    #[serde(rename = "id", default, skip_serializing_if = "pid_is_unset")]
    pub pid: i64,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub components: Map<String, Value>,

    /// `id` values of this record's children within the same document.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<i64>,
}

fn pid_is_unset(pid: &i64) -> bool {
    *pid == 0
}
