use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request body for the generation endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    pub prompt_title: String,
    pub prompt_body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partial_output: Option<String>,
}

impl GenerateRequest {
    pub fn new(prompt_title: impl Into<String>, prompt_body: impl Into<String>) -> Self {
        Self {
            prompt_title: prompt_title.into(),
            prompt_body: prompt_body.into(),
            partial_output: None,
        }
    }

    pub fn with_partial_output(mut self, partial_output: impl Into<String>) -> Self {
        self.partial_output = Some(partial_output.into());
        self
    }
}

/// Query string for the items endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageQuery {
    pub page: u32,
    pub per_page: u32,
}

/// Response body of the items endpoint. `next_page: None` signals end of data.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageResponse {
    pub items: Vec<Value>,
    pub next_page: Option<u32>,
    pub current_page: u32,
    pub per_page: u32,
}
