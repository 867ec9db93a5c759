//! Stdio bridge to MCP tool servers.
//!
//! Each configured server runs as a child process speaking JSON-RPC over
//! stdin/stdout, one message per line. A reader task resolves responses
//! against a pending-request map; the subprocess lives for as long as the
//! client handle does.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use rust_mcp_schema::schema_utils::{
    ClientMessage, FromMessage, MessageFromClient, NotificationFromClient, RequestFromClient,
    ServerMessage,
};
use rust_mcp_schema::{
    CallToolRequestParams, CallToolResult, ClientCapabilities, Implementation,
    InitializeRequestParams, InitializeResult, ListToolsResult, PaginatedRequestParams, RequestId,
    RpcError, LATEST_PROTOCOL_VERSION,
};
use serde_json::{Map, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, Command};
use tokio::sync::{oneshot, Mutex};
use tracing::debug;

use crate::core::config::data::McpServerConfig;
use crate::tools::{Tool, ToolInvocation, ToolRegistry, ToolSpec};

const REQUEST_TIMEOUT_SECONDS: u64 = 60;
const MAX_TOOL_LIST: usize = 100;

pub struct StdioClient {
    stdin: Mutex<ChildStdin>,
    pending: Arc<Mutex<HashMap<RequestId, oneshot::Sender<ServerMessage>>>>,
    next_request_id: AtomicI64,
    server_name: String,
}

impl StdioClient {
    /// Spawn the configured server process and wire up its stdio.
    pub async fn connect(config: &McpServerConfig) -> Result<Arc<Self>, String> {
        debug!(command = %config.command, args = ?config.args, "Starting MCP stdio server");
        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args)
            .envs(&config.env)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());

        let mut child = cmd
            .spawn()
            .map_err(|err| format!("cannot start {}: {}", config.command, err))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| "Unable to retrieve stdin.".to_string())?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| "Unable to retrieve stdout.".to_string())?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| "Unable to retrieve stderr.".to_string())?;

        let pending: Arc<Mutex<HashMap<RequestId, oneshot::Sender<ServerMessage>>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let client = Arc::new(Self {
            stdin: Mutex::new(stdin),
            pending: pending.clone(),
            next_request_id: AtomicI64::new(0),
            server_name: config.name.clone(),
        });

        Self::spawn_stdout_reader(pending.clone(), stdout, client.server_name.clone());
        Self::spawn_stderr_drain(stderr);

        // Once the subprocess exits, every pending request is unanswerable.
        tokio::spawn(async move {
            let _ = child.wait().await;
            pending.lock().await.clear();
        });

        Ok(client)
    }

    fn spawn_stdout_reader(
        pending: Arc<Mutex<HashMap<RequestId, oneshot::Sender<ServerMessage>>>>,
        stdout: tokio::process::ChildStdout,
        server_name: String,
    ) {
        tokio::spawn(async move {
            let mut reader = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = reader.next_line().await {
                let Ok(message) = serde_json::from_str::<ServerMessage>(&line) else {
                    continue;
                };
                Self::dispatch_message(&pending, message, &server_name).await;
            }
        });
    }

    fn spawn_stderr_drain(stderr: tokio::process::ChildStderr) {
        tokio::spawn(async move {
            let mut reader = BufReader::new(stderr).lines();
            while let Ok(Some(_)) = reader.next_line().await {}
        });
    }

    async fn dispatch_message(
        pending: &Arc<Mutex<HashMap<RequestId, oneshot::Sender<ServerMessage>>>>,
        message: ServerMessage,
        server_name: &str,
    ) {
        match &message {
            ServerMessage::Response(response) => {
                debug!(server = %server_name, response_id = ?response.id, "MCP response");
                if let Some(tx) = pending.lock().await.remove(&response.id) {
                    let _ = tx.send(message);
                }
            }
            ServerMessage::Error(error) => {
                debug!(server = %server_name, error_code = error.error.code, "MCP error");
                if let Some(id) = error.id.as_ref() {
                    if let Some(tx) = pending.lock().await.remove(id) {
                        let _ = tx.send(message);
                    }
                }
            }
            ServerMessage::Request(_) | ServerMessage::Notification(_) => {
                debug!(server = %server_name, "Ignoring server-initiated MCP message");
            }
        }
    }

    fn next_request_id(&self) -> RequestId {
        RequestId::Integer(self.next_request_id.fetch_add(1, Ordering::SeqCst))
    }

    async fn write_line(&self, payload: &str) -> Result<(), String> {
        let mut stdin = self.stdin.lock().await;
        stdin
            .write_all(payload.as_bytes())
            .await
            .map_err(|err| err.to_string())?;
        stdin.write_all(b"\n").await.map_err(|err| err.to_string())?;
        stdin.flush().await.map_err(|err| err.to_string())
    }

    async fn send_request(&self, request: RequestFromClient) -> Result<ServerMessage, String> {
        let request_id = self.next_request_id();
        let message = ClientMessage::from_message(
            MessageFromClient::RequestFromClient(request),
            Some(request_id.clone()),
        )
        .map_err(|err| err.to_string())?;
        let payload = serde_json::to_string(&message).map_err(|err| err.to_string())?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(request_id.clone(), tx);
        debug!(server = %self.server_name, request_id = ?request_id, "Sending MCP request");
        if let Err(err) = self.write_line(&payload).await {
            self.pending.lock().await.remove(&request_id);
            return Err(err);
        }

        let timeout = tokio::time::Duration::from_secs(REQUEST_TIMEOUT_SECONDS);
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(message)) => Ok(message),
            Ok(Err(_)) => Err("MCP stdio response channel closed.".to_string()),
            Err(_) => {
                self.pending.lock().await.remove(&request_id);
                Err("MCP stdio request timed out.".to_string())
            }
        }
    }

    async fn send_notification(&self, notification: NotificationFromClient) -> Result<(), String> {
        let message =
            ClientMessage::from_message(MessageFromClient::NotificationFromClient(notification), None)
                .map_err(|err| err.to_string())?;
        let payload = serde_json::to_string(&message).map_err(|err| err.to_string())?;
        self.write_line(&payload).await
    }

    /// Run the initialize handshake and acknowledge it.
    pub async fn initialize(&self) -> Result<InitializeResult, String> {
        let response = self
            .send_request(RequestFromClient::InitializeRequest(client_details()))
            .await?;
        let result = parse_initialize_result(response)?;
        self.send_notification(NotificationFromClient::InitializedNotification(None))
            .await?;
        Ok(result)
    }

    /// Fetch the server's tool list, following pagination cursors.
    pub async fn list_tools(&self) -> Result<Vec<rust_mcp_schema::Tool>, String> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let params = cursor.take().map(|cursor| PaginatedRequestParams {
                cursor: Some(cursor),
                meta: None,
            });
            let response = self
                .send_request(RequestFromClient::ListToolsRequest(params))
                .await?;
            let page: ListToolsResult = parse_response(response)?;
            tools.extend(page.tools);
            if tools.len() >= MAX_TOOL_LIST {
                tools.truncate(MAX_TOOL_LIST);
                return Ok(tools);
            }
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => return Ok(tools),
            }
        }
    }

    /// Invoke a server tool and flatten the result to text for the model.
    pub async fn call_tool(
        &self,
        tool_name: &str,
        arguments: Map<String, Value>,
    ) -> Result<String, String> {
        let mut params = CallToolRequestParams::new(tool_name);
        if !arguments.is_empty() {
            params = params.with_arguments(arguments);
        }
        let response = self
            .send_request(RequestFromClient::CallToolRequest(params))
            .await?;
        let result: CallToolResult = parse_response(response)?;
        let value = serde_json::to_value(&result).map_err(|err| err.to_string())?;
        if result.is_error.unwrap_or(false) {
            return Err(call_result_text(&value));
        }
        Ok(call_result_text(&value))
    }
}

fn client_details() -> InitializeRequestParams {
    InitializeRequestParams {
        capabilities: ClientCapabilities::default(),
        client_info: Implementation {
            name: "clai".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            title: Some("clai MCP client".to_string()),
            description: None,
            icons: Vec::new(),
            website_url: None,
        },
        meta: None,
        protocol_version: LATEST_PROTOCOL_VERSION.to_string(),
    }
}

fn parse_initialize_result(message: ServerMessage) -> Result<InitializeResult, String> {
    let result: InitializeResult = parse_response(message)?;
    if result.protocol_version.trim().is_empty() {
        return Err("Unexpected initialize response.".to_string());
    }
    Ok(result)
}

fn parse_response<T: serde::de::DeserializeOwned>(message: ServerMessage) -> Result<T, String> {
    let value = match message {
        ServerMessage::Response(response) => {
            serde_json::to_value(&response.result).map_err(|err| err.to_string())?
        }
        ServerMessage::Error(error) => return Err(format_rpc_error(&error.error)),
        other => return Err(format!("Unexpected MCP server message: {other:?}")),
    };
    serde_json::from_value(value).map_err(|err| err.to_string())
}

fn format_rpc_error(error: &RpcError) -> String {
    format!("MCP error {}: {}", error.code, error.message)
}

/// Flatten a serialized `CallToolResult` to the text the model sees: the
/// concatenated `text` fields of its content blocks, or the pretty-printed
/// JSON when no text block exists.
fn call_result_text(result: &Value) -> String {
    let texts: Vec<&str> = result
        .get("content")
        .and_then(Value::as_array)
        .map(|blocks| {
            blocks
                .iter()
                .filter_map(|block| block.get("text").and_then(Value::as_str))
                .collect()
        })
        .unwrap_or_default();
    if texts.is_empty() {
        serde_json::to_string_pretty(result).unwrap_or_else(|_| result.to_string())
    } else {
        texts.join("\n")
    }
}

/// A server tool exposed through the registry as `mcp_<server>_<tool>`.
pub struct McpTool {
    server_name: String,
    client: Arc<StdioClient>,
    tool: rust_mcp_schema::Tool,
}

impl McpTool {
    pub fn registry_name(server_name: &str, tool_name: &str) -> String {
        format!("mcp_{}_{}", server_name, tool_name)
    }
}

#[async_trait]
impl Tool for McpTool {
    fn spec(&self) -> ToolSpec {
        let mut spec = ToolSpec::new(
            &Self::registry_name(&self.server_name, &self.tool.name),
            self.tool.description.as_deref().unwrap_or(""),
            Vec::new(),
            "server-defined output",
        );
        spec.raw_schema = serde_json::to_value(&self.tool.input_schema).ok();
        spec
    }

    async fn invoke(&self, invocation: ToolInvocation) -> Result<String, String> {
        tokio::select! {
            result = self.client.call_tool(&self.tool.name, invocation.args) => result,
            _ = invocation.cancel.cancelled() => Err("cancelled".to_string()),
        }
    }
}

/// Connect, initialize and register every configured server's tools.
///
/// The returned handles keep the subprocesses alive; drop them when the
/// query is done.
pub async fn connect_servers(
    registry: &mut ToolRegistry,
    servers: &[McpServerConfig],
) -> Result<Vec<Arc<StdioClient>>, String> {
    let mut clients = Vec::with_capacity(servers.len());
    for config in servers {
        let client = StdioClient::connect(config).await?;
        let init = client.initialize().await?;
        debug!(
            server = %config.name,
            protocol = %init.protocol_version,
            "MCP server initialized"
        );
        for tool in client.list_tools().await? {
            registry.register(Arc::new(McpTool {
                server_name: config.name.clone(),
                client: client.clone(),
                tool,
            }));
        }
        clients.push(client);
    }
    Ok(clients)
}
