use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Resource labels
pub type Labels = BTreeMap<String, String>;

/// Pagination block of list responses
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Pagination {
    pub page: u32,
    pub per_page: u32,
    #[serde(default)]
    pub previous_page: Option<u32>,
    #[serde(default)]
    pub next_page: Option<u32>,
    #[serde(default)]
    pub last_page: Option<u32>,
    #[serde(default)]
    pub total_entries: Option<u32>,
}

/// Metadata attached to list responses
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Meta {
    #[serde(default)]
    pub pagination: Pagination,
}

/// Action returned by mutating endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub id: u64,
    pub command: String,
    pub status: String,
    #[serde(default)]
    pub progress: u8,
    #[serde(default)]
    pub error: Option<ApiError>,
}

impl Action {
    pub const RUNNING: &'static str = "running";
    pub const SUCCESS: &'static str = "success";
    pub const ERROR: &'static str = "error";
}

/// Action wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResponse {
    pub action: Action,
}

/// Error body of a failed request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
    #[serde(default)]
    pub details: Option<serde_json::Value>,
}

/// Error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ApiError,
}
