//! MCP Server implementation
//!
//! Exposes token administration and project context through the Model
//! Context Protocol.

use super::types::*;
use crate::context::{detect_from_git, write_project_context, ProjectContext};
use crate::server::Switchboard;
use crate::{CredentialSummary, Secret};
use glob::Pattern;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, error, info, warn};

type ToolOutput = Result<Vec<ToolContent>, String>;

/// MCP Server for Switchboard
pub struct McpServer {
    switchboard: Arc<Switchboard>,
    /// Directory project context is written to by default
    work_dir: PathBuf,
    /// Whether initialized
    initialized: bool,
}

impl McpServer {
    pub fn new(switchboard: Arc<Switchboard>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            switchboard,
            work_dir: work_dir.into(),
            initialized: false,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Run the MCP server over stdio
    pub async fn run_stdio(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        let reader = BufReader::new(tokio::io::stdin());
        let writer = tokio::io::stdout();
        self.serve(reader, writer).await
    }

    /// Serve newline-delimited JSON-RPC until `reader` reaches EOF
    pub async fn serve<R, W>(
        &mut self,
        mut reader: R,
        mut writer: W,
    ) -> Result<(), Box<dyn std::error::Error>>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut line = String::new();

        info!("MCP server starting");

        loop {
            line.clear();
            let bytes_read = reader.read_line(&mut line).await?;

            if bytes_read == 0 {
                break;
            }

            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            debug!(request = %line, "Received MCP request");

            if let Some(response) = self.handle_message(line).await {
                let response_str = serde_json::to_string(&response)?;
                debug!(response = %response_str, "Sending MCP response");
                writer.write_all(response_str.as_bytes()).await?;
                writer.write_all(b"\n").await?;
                writer.flush().await?;
            }
        }

        info!("MCP server shutting down");
        Ok(())
    }

    /// Handle a single JSON-RPC message
    pub async fn handle_message(&mut self, message: &str) -> Option<JsonRpcResponse> {
        let request: JsonRpcRequest = match serde_json::from_str(message) {
            Ok(req) => req,
            Err(e) => {
                error!(error = %e, "Failed to parse JSON-RPC request");
                return Some(JsonRpcResponse::error(
                    JsonRpcId::Null,
                    PARSE_ERROR,
                    format!("Parse error: {}", e),
                ));
            }
        };

        if request.is_notification() {
            match request.method.as_str() {
                "initialized" | "notifications/initialized" => {
                    self.initialized = true;
                    info!("MCP client initialized");
                }
                method => debug!(method = %method, "Ignoring notification"),
            }
            return None;
        }

        let id = request.id.clone().unwrap_or(JsonRpcId::Null);
        if request.jsonrpc != "2.0" {
            return Some(JsonRpcResponse::error(
                id,
                INVALID_REQUEST,
                "Only JSON-RPC 2.0 is supported",
            ));
        }

        let result = match request.method.as_str() {
            "initialize" => self.handle_initialize(),
            "initialized" => {
                self.initialized = true;
                Ok(json!({}))
            }
            "tools/list" => self.handle_tools_list(),
            "tools/call" => self.handle_tools_call(&request).await,
            "ping" => Ok(json!({})),
            method => {
                warn!(method = %method, "Unknown MCP method");
                Err((METHOD_NOT_FOUND, format!("Method not found: {}", method)))
            }
        };

        Some(match result {
            Ok(value) => JsonRpcResponse::success(id, value),
            Err((code, message)) => JsonRpcResponse::error(id, code, message),
        })
    }

    fn handle_initialize(&self) -> Result<serde_json::Value, (i32, String)> {
        let result = InitializeResult {
            protocol_version: "2024-11-05".to_string(),
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability {
                    list_changed: Some(false),
                }),
            },
            server_info: ServerInfo {
                name: "switchboard".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            instructions: Some(
                "Switchboard routes GitLab work to the right account. Use the tools to:\n\
                 - List, add, update, validate and remove GitLab tokens (values are never shown)\n\
                 - Read recent token notifications\n\
                 - Read or write the project context that selects a token per project"
                    .to_string(),
            ),
        };

        serde_json::to_value(result).map_err(|e| (INTERNAL_ERROR, e.to_string()))
    }

    fn handle_tools_list(&self) -> Result<serde_json::Value, (i32, String)> {
        let result = ToolsListResult { tools: tools() };
        serde_json::to_value(result).map_err(|e| (INTERNAL_ERROR, e.to_string()))
    }

    async fn handle_tools_call(
        &self,
        request: &JsonRpcRequest,
    ) -> Result<serde_json::Value, (i32, String)> {
        let params: ToolCallParams = request
            .params
            .as_ref()
            .and_then(|p| serde_json::from_value(p.clone()).ok())
            .ok_or_else(|| (INVALID_PARAMS, "Missing or invalid params".to_string()))?;

        debug!(tool = %params.name, "Calling tool");

        let args = params.arguments;
        let result = match params.name.as_str() {
            "list_tokens" => self.tool_list_tokens(args),
            "add_token" => self.tool_add_token(args).await,
            "update_token" => self.tool_update_token(args).await,
            "validate_token" => self.tool_validate_token(args).await,
            "remove_token" => self.tool_remove_token(args),
            "get_notifications" => self.tool_get_notifications(args),
            "clear_notifications" => self.tool_clear_notifications(),
            "get_project_context" => self.tool_get_project_context().await,
            "set_project_context" => self.tool_set_project_context(args).await,
            "whoami" => self.tool_whoami(args).await,
            tool => return Err((INVALID_PARAMS, format!("Unknown tool: {}", tool))),
        };

        let result = match result {
            Ok(content) => ToolCallResult {
                content,
                is_error: None,
            },
            Err(e) => ToolCallResult {
                content: vec![ToolContent::text(e)],
                is_error: Some(true),
            },
        };
        serde_json::to_value(result).map_err(|e| (INTERNAL_ERROR, e.to_string()))
    }

    fn tool_list_tokens(&self, args: serde_json::Value) -> ToolOutput {
        let args: ListTokensArgs = parse_optional_args(args)?;
        let tokens = self.switchboard.list_tokens();

        let filtered: Vec<CredentialSummary> = match &args.pattern {
            Some(pattern) => {
                let glob = Pattern::new(pattern).map_err(|e| format!("Invalid pattern: {}", e))?;
                tokens.into_iter().filter(|t| glob.matches(&t.name)).collect()
            }
            None => tokens,
        };

        if filtered.is_empty() {
            return Ok(vec![ToolContent::text("No tokens configured.")]);
        }
        json_content(&filtered)
    }

    async fn tool_add_token(&self, args: serde_json::Value) -> ToolOutput {
        let args: AddTokenArgs = parse_args(args)?;
        let summary = self
            .switchboard
            .add_token(&args.name, Secret::new(args.token), &args.host)
            .await
            .map_err(|e| format!("Failed to add token '{}': {}", args.name, e))?;

        json_content(&summary)
    }

    async fn tool_update_token(&self, args: serde_json::Value) -> ToolOutput {
        let args: UpdateTokenArgs = parse_args(args)?;
        let summary = self
            .switchboard
            .update_token(&args.name, args.token.map(Secret::new))
            .await
            .map_err(|e| format!("Failed to update token '{}': {}", args.name, e))?;

        json_content(&summary)
    }

    async fn tool_validate_token(&self, args: serde_json::Value) -> ToolOutput {
        let args: ValidateTokenArgs = parse_optional_args(args)?;
        match args.name {
            Some(name) => {
                let result = self
                    .switchboard
                    .validate_token(&name)
                    .await
                    .map_err(|e| e.to_string())?;
                json_content(&result)
            }
            None => json_content(&self.switchboard.validate_all().await),
        }
    }

    fn tool_remove_token(&self, args: serde_json::Value) -> ToolOutput {
        let args: TokenNameArgs = parse_args(args)?;
        self.switchboard
            .remove_token(&args.name)
            .map_err(|e| e.to_string())?;

        Ok(vec![ToolContent::text(format!(
            "Token '{}' removed.",
            args.name
        ))])
    }

    fn tool_get_notifications(&self, args: serde_json::Value) -> ToolOutput {
        let args: GetNotificationsArgs = parse_optional_args(args)?;
        let mut notifications = self.switchboard.notifications();

        if let Some(limit) = args.limit {
            let skip = notifications.len().saturating_sub(limit);
            notifications.drain(..skip);
        }

        if notifications.is_empty() {
            return Ok(vec![ToolContent::text("No notifications.")]);
        }
        json_content(&notifications)
    }

    fn tool_clear_notifications(&self) -> ToolOutput {
        self.switchboard.clear_notifications();
        Ok(vec![ToolContent::text("Notifications cleared.")])
    }

    async fn tool_get_project_context(&self) -> ToolOutput {
        let found = self
            .switchboard
            .project_context()
            .await
            .map_err(|e| format!("Failed to read project context: {}", e))?;

        if let Some(found) = found {
            return json_content(&json!({
                "context": found.context,
                "source": found.source,
            }));
        }

        // No file yet: report what the git remote suggests
        match detect_from_git(&self.work_dir).await {
            Ok(detected) => json_content(&json!({
                "context": null,
                "detected": detected,
            })),
            Err(e) => Ok(vec![ToolContent::text(format!(
                "No project context found ({}).",
                e
            ))]),
        }
    }

    async fn tool_set_project_context(&self, args: serde_json::Value) -> ToolOutput {
        let args: SetProjectContextArgs = parse_optional_args(args)?;
        let dir = args
            .directory
            .map(PathBuf::from)
            .unwrap_or_else(|| self.work_dir.clone());

        let mut context = match args.project_id {
            Some(project_id) => ProjectContext::new(project_id),
            None => detect_from_git(&dir)
                .await
                .map_err(|e| format!("project_id not given and not detectable: {}", e))?,
        };
        if let Some(host) = args.host {
            context.host = Some(host);
        }
        if let Some(name) = args.credential_name {
            context.credential_name = Some(name);
        }

        let path = write_project_context(&dir, &context)
            .await
            .map_err(|e| format!("Failed to write project context: {}", e))?;

        Ok(vec![ToolContent::text(format!(
            "Project context for '{}' written to {}",
            context.project_id,
            path.display()
        ))])
    }

    async fn tool_whoami(&self, args: serde_json::Value) -> ToolOutput {
        let args: WhoAmIArgs = parse_optional_args(args)?;
        let me = self
            .switchboard
            .whoami(args.project_id.as_deref())
            .await
            .map_err(|e| e.to_string())?;

        json_content(&me)
    }
}

/// Definitions of every tool this server answers
fn tools() -> Vec<Tool> {
    let name_property = json!({
        "type": "string",
        "description": "Token name (e.g. 'work', 'personal')"
    });

    vec![
        Tool {
            name: "list_tokens".to_string(),
            description: "List configured GitLab tokens with their host, user, validation \
                          time and expiry. Token values are never returned."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "pattern": {
                        "type": "string",
                        "description": "Optional glob pattern over token names (e.g. 'work-*')"
                    }
                }
            }),
        },
        Tool {
            name: "add_token".to_string(),
            description: "Validate a GitLab personal access token and register it under a name."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "name": name_property,
                    "token": { "type": "string", "description": "Personal access token" },
                    "host": {
                        "type": "string",
                        "description": "GitLab URL (defaults to https://gitlab.com)"
                    }
                },
                "required": ["name", "token"]
            }),
        },
        Tool {
            name: "update_token".to_string(),
            description: "Replace a token's value, or revalidate the stored value when no new \
                          token is given."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "name": name_property,
                    "token": { "type": "string", "description": "New personal access token" }
                },
                "required": ["name"]
            }),
        },
        Tool {
            name: "validate_token".to_string(),
            description: "Check one token, or all tokens when no name is given, against GitLab."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": { "name": name_property }
            }),
        },
        Tool {
            name: "remove_token".to_string(),
            description: "Forget a token and drop its connection.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": { "name": name_property },
                "required": ["name"]
            }),
        },
        Tool {
            name: "get_notifications".to_string(),
            description: "Recent token notifications (validation results, expiry warnings)."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "limit": {
                        "type": "integer",
                        "minimum": 1,
                        "description": "Newest entries to return"
                    }
                }
            }),
        },
        Tool {
            name: "clear_notifications".to_string(),
            description: "Clear the notification log.".to_string(),
            input_schema: json!({ "type": "object", "properties": {} }),
        },
        Tool {
            name: "get_project_context".to_string(),
            description: "Show the project context (.switchboard.json) used to pick a token."
                .to_string(),
            input_schema: json!({ "type": "object", "properties": {} }),
        },
        Tool {
            name: "set_project_context".to_string(),
            description: "Write a .switchboard.json selecting the token or host for a project."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "project_id": {
                        "type": "string",
                        "description": "Project path, e.g. 'group/repo'"
                    },
                    "host": { "type": "string", "description": "GitLab URL for this project" },
                    "credential_name": { "type": "string", "description": "Token name to use" },
                    "directory": { "type": "string", "description": "Where to write the file" }
                }
            }),
        },
        Tool {
            name: "whoami".to_string(),
            description: "Show which token and GitLab user would serve the current project."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "project_id": {
                        "type": "string",
                        "description": "Project path, e.g. 'group/repo'"
                    }
                }
            }),
        },
    ]
}

fn parse_args<T: DeserializeOwned>(args: serde_json::Value) -> Result<T, String> {
    serde_json::from_value(args).map_err(|e| format!("Invalid arguments: {}", e))
}

/// Like [`parse_args`], but a missing argument object means all defaults
fn parse_optional_args<T: DeserializeOwned + Default>(
    args: serde_json::Value,
) -> Result<T, String> {
    if args.is_null() {
        return Ok(T::default());
    }
    parse_args(args)
}

fn json_content<T: Serialize + ?Sized>(value: &T) -> ToolOutput {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| format!("Failed to serialize result: {}", e))?;
    Ok(vec![ToolContent::text(text)])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_definitions() {
        let tools = tools();
        let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "list_tokens",
                "add_token",
                "update_token",
                "validate_token",
                "remove_token",
                "get_notifications",
                "clear_notifications",
                "get_project_context",
                "set_project_context",
                "whoami",
            ]
        );
        for tool in tools {
            assert_eq!(tool.input_schema["type"], "object");
        }
    }

    #[test]
    fn test_optional_args_accept_null() {
        let args: ListTokensArgs = parse_optional_args(serde_json::Value::Null).unwrap();
        assert!(args.pattern.is_none());

        let err = parse_args::<TokenNameArgs>(json!({})).unwrap_err();
        assert!(err.starts_with("Invalid arguments"));
    }
}
