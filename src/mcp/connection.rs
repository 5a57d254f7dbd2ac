use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::{ConfabError, Result};
use crate::mcp::transport::ProviderTransport;
use crate::util::with_timeout;

/// Lifecycle of a single tool provider connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Uninitialized,
    Handshaking,
    Ready,
    Closing,
    Failed,
    Closed,
}

/// A tool advertised by a provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// JSON Schema for the tool's arguments.
    #[serde(rename = "inputSchema", default = "empty_schema")]
    pub input_schema: Value,
}

fn empty_schema() -> Value {
    json!({"type": "object", "properties": {}})
}

/// Outcome of a single tool invocation. Tool-level failures (provider error,
/// timeout, transport fault) are reported here, not as `Err`.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocationResult {
    pub correlation_id: u64,
    pub success: bool,
    pub payload: Option<String>,
    pub error: Option<String>,
}

impl ToolInvocationResult {
    fn ok(correlation_id: u64, payload: String) -> Self {
        Self {
            correlation_id,
            success: true,
            payload: Some(payload),
            error: None,
        }
    }

    fn failed(correlation_id: u64, error: impl Into<String>) -> Self {
        Self {
            correlation_id,
            success: false,
            payload: None,
            error: Some(error.into()),
        }
    }
}

/// Handshake and per-step timeouts for a provider connection.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionTimeouts {
    pub handshake: Duration,
    pub discovery: Duration,
    pub teardown: Duration,
}

impl Default for ConnectionTimeouts {
    fn default() -> Self {
        Self {
            handshake: Duration::from_secs(15),
            discovery: Duration::from_secs(5),
            teardown: Duration::from_secs(2),
        }
    }
}

/// One JSON-RPC connection to a spawned tool provider.
///
/// All requests are correlated by a monotonically increasing id; server
/// notifications (messages without a matching id) are skipped while waiting
/// for a response.
pub struct ToolProviderConnection {
    id: String,
    transport: Box<dyn ProviderTransport>,
    timeouts: ConnectionTimeouts,
    state: ConnectionState,
    tools: Vec<ToolDescriptor>,
    next_request_id: u64,
}

impl ToolProviderConnection {
    pub fn new(
        id: impl Into<String>,
        transport: Box<dyn ProviderTransport>,
        timeouts: ConnectionTimeouts,
    ) -> Self {
        Self {
            id: id.into(),
            transport,
            timeouts,
            state: ConnectionState::Uninitialized,
            tools: Vec::new(),
            next_request_id: 0,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Tools cached by the last successful handshake.
    pub fn tools(&self) -> &[ToolDescriptor] {
        &self.tools
    }

    /// Run the full handshake: `initialize`, the `initialized` notification,
    /// then `tools/list`. On any failure the connection transitions to
    /// `Failed` and stays unusable.
    pub async fn initialize(&mut self) -> Result<()> {
        if self.state != ConnectionState::Uninitialized {
            return Err(ConfabError::InvalidState(format!(
                "provider '{}' already initialized",
                self.id
            )));
        }
        self.state = ConnectionState::Handshaking;

        match self.handshake().await {
            Ok(tools) => {
                debug!(provider = %self.id, tool_count = tools.len(), "provider ready");
                self.tools = tools;
                self.state = ConnectionState::Ready;
                Ok(())
            }
            Err(e) => {
                warn!(provider = %self.id, error = %e, "provider handshake failed");
                self.state = ConnectionState::Failed;
                Err(e)
            }
        }
    }

    async fn handshake(&mut self) -> Result<Vec<ToolDescriptor>> {
        let init_params = json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {},
            "clientInfo": {"name": "confab", "version": env!("CARGO_PKG_VERSION")},
        });
        let init = self
            .request("initialize", init_params, self.timeouts.handshake)
            .await?;
        if let Some(error) = init.get("error") {
            return Err(ConfabError::Transport(format!(
                "initialize rejected: {error}"
            )));
        }

        self.transport
            .send(json!({
                "jsonrpc": "2.0",
                "method": "notifications/initialized",
            }))
            .await?;

        let listing = self
            .request("tools/list", json!({}), self.timeouts.discovery)
            .await?;
        if let Some(error) = listing.get("error") {
            return Err(ConfabError::Transport(format!(
                "tools/list rejected: {error}"
            )));
        }
        let tools = listing
            .pointer("/result/tools")
            .cloned()
            .ok_or_else(|| ConfabError::Transport("tools/list result missing tools".into()))?;
        Ok(serde_json::from_value(tools)?)
    }

    /// Invoke a tool by name. Failures of any kind come back as an
    /// unsuccessful result so one misbehaving tool never aborts a turn.
    pub async fn invoke(
        &mut self,
        name: &str,
        arguments: Value,
        timeout: Duration,
    ) -> ToolInvocationResult {
        let correlation_id = self.next_request_id + 1;
        if self.state != ConnectionState::Ready {
            return ToolInvocationResult::failed(
                correlation_id,
                format!("provider '{}' is not ready", self.id),
            );
        }

        let params = json!({"name": name, "arguments": arguments});
        match self.request("tools/call", params, timeout).await {
            Ok(response) => Self::map_call_response(correlation_id, &response),
            Err(e) => {
                warn!(provider = %self.id, tool = name, error = %e, "tool invocation failed");
                ToolInvocationResult::failed(correlation_id, e.to_string())
            }
        }
    }

    fn map_call_response(correlation_id: u64, response: &Value) -> ToolInvocationResult {
        if let Some(error) = response.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_owned)
                .unwrap_or_else(|| error.to_string());
            return ToolInvocationResult::failed(correlation_id, message);
        }

        let result = response.get("result").cloned().unwrap_or(Value::Null);
        let text = result
            .get("content")
            .and_then(Value::as_array)
            .map(|parts| {
                parts
                    .iter()
                    .filter_map(|part| part.get("text").and_then(Value::as_str))
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .unwrap_or_else(|| result.to_string());

        if result
            .get("isError")
            .and_then(Value::as_bool)
            .unwrap_or(false)
        {
            ToolInvocationResult::failed(correlation_id, text)
        } else {
            ToolInvocationResult::ok(correlation_id, text)
        }
    }

    /// Send a request and wait for the response with the matching id,
    /// skipping any interleaved notifications.
    async fn request(&mut self, method: &str, params: Value, timeout: Duration) -> Result<Value> {
        self.next_request_id += 1;
        let id = self.next_request_id;
        self.transport
            .send(json!({
                "jsonrpc": "2.0",
                "id": id,
                "method": method,
                "params": params,
            }))
            .await?;

        with_timeout(timeout, async {
            loop {
                let message = self.transport.receive().await?;
                match message.get("id").and_then(Value::as_u64) {
                    Some(got) if got == id => return Ok(message),
                    Some(other) => {
                        debug!(expected = id, got = other, "skipping stale response")
                    }
                    None => debug!(method = ?message.get("method"), "skipping notification"),
                }
            }
        })
        .await
    }

    /// Tear down the connection. Safe to call repeatedly; every failure is
    /// swallowed and logged so shutdown never propagates errors.
    pub async fn close(&mut self) {
        if matches!(self.state, ConnectionState::Closed | ConnectionState::Closing) {
            return;
        }
        let was_ready = self.state == ConnectionState::Ready;
        self.state = ConnectionState::Closing;
        if was_ready {
            let notice = json!({"jsonrpc": "2.0", "method": "notifications/shutdown"});
            if let Err(e) = with_timeout(self.timeouts.teardown, self.transport.send(notice)).await
            {
                debug!(provider = %self.id, error = %e, "shutdown notice not delivered");
            }
        }
        if let Err(e) = with_timeout(self.timeouts.teardown, self.transport.close()).await {
            warn!(provider = %self.id, error = %e, "provider teardown failed");
        }
        self.state = ConnectionState::Closed;
    }
}
