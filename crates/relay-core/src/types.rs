//! Wire types exchanged between the LLM side, the server, and the client.
//!
//! All JSON is `camelCase`. Tool parameters and results are opaque
//! [`serde_json::Value`]s; the only structure the relay enforces is that
//! `params` is an object (or absent).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::{API_VERSION, MAX_TOOL_NAME_LEN};
use crate::errors::{ExecutionError, ParseError};
use crate::ids::{BatchId, RequestId, SessionCode};

// ─────────────────────────────────────────────────────────────────────────────
// ToolRequest
// ─────────────────────────────────────────────────────────────────────────────

/// One unit of work issued by the LLM side.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolRequest {
    /// Unique request ID; the dedup key.
    pub id: RequestId,
    /// Name of the tool to run.
    pub tool_name: String,
    /// Tool arguments (JSON object or null).
    #[serde(default)]
    pub params: Value,
    /// Session the request belongs to.
    pub session_code: SessionCode,
    /// When the request was produced.
    pub timestamp: DateTime<Utc>,
}

impl ToolRequest {
    /// Build a request stamped with the current time.
    pub fn new(
        id: RequestId,
        tool_name: impl Into<String>,
        params: Value,
        session_code: SessionCode,
    ) -> Self {
        Self {
            id,
            tool_name: tool_name.into(),
            params,
            session_code,
            timestamp: Utc::now(),
        }
    }

    /// Check structural constraints that serde alone cannot express.
    pub fn validate(&self) -> Result<(), ParseError> {
        if self.id.is_empty() {
            return Err(ParseError::new("request id must not be empty"));
        }
        validate_tool_name(&self.tool_name)?;
        if !(self.params.is_object() || self.params.is_null()) {
            return Err(ParseError::new("params must be a JSON object"));
        }
        Ok(())
    }
}

/// Validate a tool name: 1..=128 chars of `[A-Za-z0-9_.-]`.
pub fn validate_tool_name(name: &str) -> Result<(), ParseError> {
    if name.is_empty() {
        return Err(ParseError::new("tool name must not be empty"));
    }
    if name.len() > MAX_TOOL_NAME_LEN {
        return Err(ParseError::new(format!(
            "tool name exceeds {MAX_TOOL_NAME_LEN} characters"
        )));
    }
    if let Some(bad) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')))
    {
        return Err(ParseError::new(format!(
            "tool name contains invalid character '{bad}'"
        )));
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// ToolResponse
// ─────────────────────────────────────────────────────────────────────────────

/// Result of executing a tool.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum ToolOutcome {
    /// The tool ran and produced a result.
    Success {
        /// Opaque tool result.
        result: Value,
    },
    /// The tool failed; delivered like any other response.
    Error {
        /// Failure details.
        error: ExecutionError,
    },
}

impl ToolOutcome {
    /// Whether the tool succeeded.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

impl From<Result<Value, ExecutionError>> for ToolOutcome {
    fn from(result: Result<Value, ExecutionError>) -> Self {
        match result {
            Ok(result) => Self::Success { result },
            Err(error) => Self::Error { error },
        }
    }
}

/// A completed tool call, addressed by request ID.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponse {
    /// The request this answers.
    pub request_id: RequestId,
    /// Success or failure payload.
    #[serde(flatten)]
    pub outcome: ToolOutcome,
    /// When execution completed.
    pub timestamp: DateTime<Utc>,
}

impl ToolResponse {
    /// Successful response stamped now.
    pub fn success(request_id: RequestId, result: Value) -> Self {
        Self::from_result(request_id, Ok(result))
    }

    /// Failed response stamped now.
    pub fn failure(request_id: RequestId, error: ExecutionError) -> Self {
        Self::from_result(request_id, Err(error))
    }

    /// Response from an executor result, stamped now.
    pub fn from_result(request_id: RequestId, result: Result<Value, ExecutionError>) -> Self {
        Self {
            request_id,
            outcome: result.into(),
            timestamp: Utc::now(),
        }
    }

    /// Whether the tool succeeded.
    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }

    /// Approximate serialized size, used for batch byte accounting.
    pub fn estimated_size(&self) -> usize {
        serde_json::to_vec(self).map_or(0, |bytes| bytes.len())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ResponseBatch
// ─────────────────────────────────────────────────────────────────────────────

/// Responses delivered together in one outbound call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseBatch {
    /// Batch ID.
    pub id: BatchId,
    /// Responses in delivery order.
    pub responses: Vec<ToolResponse>,
    /// When the batch was sealed.
    pub created_at: DateTime<Utc>,
    /// Sum of the responses' serialized sizes.
    pub estimated_size_bytes: usize,
}

impl ResponseBatch {
    /// Seal a batch from the given responses.
    pub fn new(responses: Vec<ToolResponse>) -> Self {
        let estimated_size_bytes = responses.iter().map(ToolResponse::estimated_size).sum();
        Self {
            id: BatchId::new(),
            responses,
            created_at: Utc::now(),
            estimated_size_bytes,
        }
    }

    /// Number of responses.
    pub fn len(&self) -> usize {
        self.responses.len()
    }

    /// Whether the batch carries no responses.
    pub fn is_empty(&self) -> bool {
        self.responses.is_empty()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tool manifest
// ─────────────────────────────────────────────────────────────────────────────

/// One tool the client can execute.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    /// Tool name.
    pub name: String,
    /// What the tool does.
    #[serde(default)]
    pub description: String,
    /// JSON Schema of the params object.
    #[serde(default = "empty_object_schema")]
    pub input_schema: Value,
}

fn empty_object_schema() -> Value {
    serde_json::json!({ "type": "object" })
}

impl ToolDescriptor {
    /// Descriptor with an open object schema.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: empty_object_schema(),
        }
    }

    /// Replace the input schema.
    #[must_use]
    pub fn with_schema(mut self, schema: Value) -> Self {
        self.input_schema = schema;
        self
    }
}

/// The set of tools a session's client currently offers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolManifest {
    /// Metadata API version this manifest conforms to.
    #[serde(default = "default_api_version")]
    pub api_version: String,
    /// Client-chosen version of the tool set.
    #[serde(default = "default_manifest_version")]
    pub tool_manifest_version: String,
    /// Tools on offer.
    #[serde(default)]
    pub tools: Vec<ToolDescriptor>,
}

fn default_api_version() -> String {
    API_VERSION.to_owned()
}

fn default_manifest_version() -> String {
    "0.0.0".to_owned()
}

impl ToolManifest {
    /// Manifest over the given tools.
    pub fn new(tool_manifest_version: impl Into<String>, tools: Vec<ToolDescriptor>) -> Self {
        Self {
            api_version: default_api_version(),
            tool_manifest_version: tool_manifest_version.into(),
            tools,
        }
    }

    /// Validate every tool name.
    pub fn validate(&self) -> Result<(), ParseError> {
        for tool in &self.tools {
            validate_tool_name(&tool.name)?;
        }
        Ok(())
    }
}

impl Default for ToolManifest {
    fn default() -> Self {
        Self::new(default_manifest_version(), Vec::new())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
