//! MCP tool-executor client.
//!
//! Connects to the servers named in the local descriptor file, aggregates
//! their tool lists, and routes calls by tool name. Tool results pass
//! back verbatim; the executor owns their meaning.

use async_trait::async_trait;
use rmcp::model::{CallToolRequestParam, PaginatedRequestParam};
use rmcp::service::{serve_client, RoleClient, RunningService};
use rmcp::transport::child_process::TokioChildProcess;
use rmcp::transport::StreamableHttpClientTransport;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum McpError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid tool server descriptor: {0}")]
    Descriptor(#[from] serde_json::Error),

    #[error("failed to connect to tool server '{name}': {message}")]
    Connect { name: String, message: String },

    #[error("unknown tool '{0}'")]
    UnknownTool(String),

    #[error("tool call '{name}' failed: {message}")]
    ToolCall { name: String, message: String },
}

/// Connection descriptors, keyed by server name. Mirrors the common
/// `mcpServers` layout of MCP client configuration files.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpSettings {
    pub mcp_servers: HashMap<String, McpServerConfig>,
}

impl McpSettings {
    /// Read the descriptor file once at startup.
    pub fn load(path: &Path) -> Result<Self, McpError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}

/// One server entry: an HTTP streaming endpoint or a stdio child process.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum McpServerConfig {
    Http {
        url: String,
    },
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
    },
}

/// A tool as declared by its executor. The schema is kept opaque and
/// only reshaped when declared to the model.
#[derive(Debug, Clone)]
pub struct ToolDef {
    pub name: String,
    pub description: Option<String>,
    pub input_schema: Value,
}

/// Call seam between the streaming bridge and the executor.
#[async_trait]
pub trait ToolDispatch: Send + Sync {
    async fn call(&self, name: &str, args: serde_json::Map<String, Value>)
        -> Result<Value, McpError>;
}

#[derive(Clone, Default)]
struct Handler;

impl rmcp::handler::client::ClientHandler for Handler {}

type Service = RunningService<RoleClient, Handler>;

/// Aggregated view over every connected tool server.
pub struct McpExecutor {
    services: Vec<Service>,
    /// Tool name -> index into `services`.
    routes: HashMap<String, usize>,
    tools: Vec<ToolDef>,
}

impl McpExecutor {
    /// Executor with no servers; every call fails with `UnknownTool`.
    pub fn empty() -> Self {
        Self {
            services: Vec::new(),
            routes: HashMap::new(),
            tools: Vec::new(),
        }
    }

    /// Connect to every configured server. A server that fails to come
    /// up is skipped with a warning, so the session can still run with
    /// a degraded tool set.
    pub async fn connect(settings: &McpSettings) -> Self {
        let mut executor = Self::empty();
        for (name, config) in &settings.mcp_servers {
            match executor.connect_one(name, config).await {
                Ok(count) => info!(server = %name, tools = count, "connected to tool server"),
                Err(e) => warn!(server = %name, error = %e, "skipping unreachable tool server"),
            }
        }
        executor
    }

    async fn connect_one(
        &mut self,
        name: &str,
        config: &McpServerConfig,
    ) -> Result<usize, McpError> {
        let service = match config {
            McpServerConfig::Http { url } => {
                let transport = StreamableHttpClientTransport::from_uri(url.clone());
                serve_client(Handler, transport)
                    .await
                    .map_err(|e| McpError::Connect {
                        name: name.to_string(),
                        message: e.to_string(),
                    })?
            }
            McpServerConfig::Stdio { command, args } => {
                let mut cmd = Command::new(command);
                cmd.kill_on_drop(true)
                    .stdin(Stdio::piped())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::piped())
                    .args(args);
                let (transport, _stderr) = TokioChildProcess::builder(cmd)
                    .stderr(Stdio::piped())
                    .spawn()
                    .map_err(|e| McpError::Connect {
                        name: name.to_string(),
                        message: e.to_string(),
                    })?;
                serve_client(Handler, transport)
                    .await
                    .map_err(|e| McpError::Connect {
                        name: name.to_string(),
                        message: e.to_string(),
                    })?
            }
        };

        let listed = service
            .list_tools(None::<PaginatedRequestParam>)
            .await
            .map_err(|e| McpError::Connect {
                name: name.to_string(),
                message: format!("failed to list tools: {e}"),
            })?;

        let index = self.services.len();
        let mut count = 0;
        for tool in listed.tools {
            let def = ToolDef {
                name: tool.name.to_string(),
                description: tool.description.as_ref().map(|d| d.to_string()),
                input_schema: serde_json::to_value(&tool.input_schema)
                    .unwrap_or_else(|_| serde_json::json!({ "type": "object" })),
            };
            debug!(tool = %def.name, server = %name, "registered tool");
            if self.routes.insert(def.name.clone(), index).is_some() {
                warn!(tool = %def.name, "tool name declared by more than one server, keeping the last");
            }
            self.tools.push(def);
            count += 1;
        }
        self.services.push(service);
        Ok(count)
    }

    /// Every tool across every connected server.
    pub fn tools(&self) -> &[ToolDef] {
        &self.tools
    }

    /// Invoke a tool and return its result as one opaque JSON value.
    pub async fn call_tool(
        &self,
        name: &str,
        args: serde_json::Map<String, Value>,
    ) -> Result<Value, McpError> {
        let index = *self
            .routes
            .get(name)
            .ok_or_else(|| McpError::UnknownTool(name.to_string()))?;

        let params = CallToolRequestParam {
            name: name.to_string().into(),
            arguments: if args.is_empty() { None } else { Some(args) },
        };
        let result = self.services[index]
            .call_tool(params)
            .await
            .map_err(|e| McpError::ToolCall {
                name: name.to_string(),
                message: e.to_string(),
            })?;

        serde_json::to_value(&result).map_err(|e| McpError::ToolCall {
            name: name.to_string(),
            message: e.to_string(),
        })
    }
}

#[async_trait]
impl ToolDispatch for McpExecutor {
    async fn call(
        &self,
        name: &str,
        args: serde_json::Map<String, Value>,
    ) -> Result<Value, McpError> {
        self.call_tool(name, args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_parse_http_and_stdio_entries() {
        let raw = r#"{
            "mcpServers": {
                "search": { "url": "http://localhost:8000/mcp/" },
                "files": { "command": "mcp-files", "args": ["--root", "/tmp"] }
            }
        }"#;
        let settings: McpSettings = serde_json::from_str(raw).unwrap();
        assert_eq!(settings.mcp_servers.len(), 2);
        assert!(matches!(
            &settings.mcp_servers["search"],
            McpServerConfig::Http { url } if url == "http://localhost:8000/mcp/"
        ));
        assert!(matches!(
            &settings.mcp_servers["files"],
            McpServerConfig::Stdio { command, args } if command == "mcp-files" && args.len() == 2
        ));
    }

    #[tokio::test]
    async fn empty_executor_rejects_every_call() {
        let executor = McpExecutor::empty();
        assert!(executor.tools().is_empty());
        let err = executor
            .call_tool("lookup", serde_json::Map::new())
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::UnknownTool(name) if name == "lookup"));
    }
}
