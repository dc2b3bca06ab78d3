//! Wire types for listing and removing the objects a container holds

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
pub struct ObjectSummary {
    pub key: String,
    #[serde(default)]
    pub size: Option<u64>,
}

/// One page of a container listing
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ObjectPage {
    #[serde(default)]
    pub objects: Vec<ObjectSummary>,
    #[serde(default)]
    pub is_truncated: bool,
    #[serde(default)]
    pub next_continuation_token: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeleteObjectsRequest {
    pub keys: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeleteObjectsResponse {
    /// Absent when the service only reports failures
    #[serde(default)]
    pub deleted: Option<usize>,
    #[serde(default)]
    pub errors: Vec<String>,
}
