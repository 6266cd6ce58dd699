//! MCP protocol types
//!
//! Based on the Model Context Protocol specification.

use serde::{Deserialize, Serialize};

/// JSON-RPC request
///
/// A request without an `id` is a notification and gets no response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<JsonRpcId>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcRequest {
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// JSON-RPC response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: JsonRpcId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: JsonRpcId, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: JsonRpcId, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }
}

/// JSON-RPC ID (can be string, number, or null)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum JsonRpcId {
    String(String),
    Number(i64),
    Null,
}

/// JSON-RPC error
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

// Standard JSON-RPC error codes
pub const PARSE_ERROR: i32 = -32700;
pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;

/// MCP Initialize result
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: String,
    pub capabilities: ServerCapabilities,
    pub server_info: ServerInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

/// MCP Server capabilities
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerCapabilities {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<ToolsCapability>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolsCapability {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

/// MCP Server info
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

/// MCP Tool definition
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// MCP tools/list result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsListResult {
    pub tools: Vec<Tool>,
}

/// MCP tools/call params
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallParams {
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

/// MCP tools/call result
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallResult {
    pub content: Vec<ToolContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

/// MCP tool content
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ToolContent {
    Text { text: String },
}

impl ToolContent {
    pub fn text(text: impl Into<String>) -> Self {
        ToolContent::Text { text: text.into() }
    }
}

// Switchboard tool arguments

/// Arguments for list_tokens tool
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListTokensArgs {
    /// Optional glob pattern over token names
    pub pattern: Option<String>,
}

/// Arguments for add_token tool
#[derive(Debug, Clone, Deserialize)]
pub struct AddTokenArgs {
    pub name: String,
    pub token: String,
    /// GitLab host; the public instance when omitted
    #[serde(default)]
    pub host: String,
}

/// Arguments for update_token tool
#[derive(Debug, Clone, Deserialize)]
pub struct UpdateTokenArgs {
    pub name: String,
    /// New token value; the stored one is revalidated when omitted
    pub token: Option<String>,
}

/// Arguments for validate_token tool
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ValidateTokenArgs {
    /// Token to validate; all tokens when omitted
    pub name: Option<String>,
}

/// Arguments for tools addressing one token by name
#[derive(Debug, Clone, Deserialize)]
pub struct TokenNameArgs {
    pub name: String,
}

/// Arguments for get_notifications tool
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GetNotificationsArgs {
    /// Only return the newest `limit` entries
    pub limit: Option<usize>,
}

/// Arguments for set_project_context tool
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SetProjectContextArgs {
    /// Project path; detected from the git remote when omitted
    pub project_id: Option<String>,
    pub host: Option<String>,
    pub credential_name: Option<String>,
    /// Directory to write into; the server's working directory when omitted
    pub directory: Option<String>,
}

/// Arguments for whoami tool
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WhoAmIArgs {
    pub project_id: Option<String>,
}
