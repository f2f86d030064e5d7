//! Per-peer protocol state machine and method routing.
//!
//! Every transport owns one [`Dispatcher`] per logical peer and feeds it
//! validated envelopes. Only `initialize`, `tools/list` and `tools/call`
//! produce results; `notifications/initialized` is accepted and ignored.
//! The handshake is advisory: tool methods are served before `initialize`
//! too, with a warning.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::context::RequestContext;
use crate::jsonrpc::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
use crate::mcp::{CallToolParams, CallToolResult, InitializeParams, ListToolsResult, ToolDescriptor};
use crate::negotiate::negotiate;

pub const METHOD_INITIALIZE: &str = "initialize";
pub const METHOD_INITIALIZED: &str = "notifications/initialized";
pub const METHOD_PING: &str = "ping";
pub const METHOD_TOOLS_LIST: &str = "tools/list";
pub const METHOD_TOOLS_CALL: &str = "tools/call";

/// Produces the tool catalog for a caller.
#[async_trait]
pub trait ToolListHandler: Send + Sync {
	async fn list_tools(&self, ctx: &RequestContext) -> anyhow::Result<Vec<ToolDescriptor>>;
}

/// Executes one tool call for a caller.
#[async_trait]
pub trait ToolCallHandler: Send + Sync {
	async fn call_tool(&self, params: CallToolParams, ctx: RequestContext) -> anyhow::Result<CallToolResult>;
}

/// Handler set registered on a transport.
#[derive(Clone, Default)]
pub struct Handlers {
	pub list: Option<Arc<dyn ToolListHandler>>,
	pub call: Option<Arc<dyn ToolCallHandler>>,
}

impl Handlers {
	pub fn new(list: Arc<dyn ToolListHandler>, call: Arc<dyn ToolCallHandler>) -> Self {
		Self {
			list: Some(list),
			call: Some(call),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolState {
	Uninitialized,
	Ready,
	Closed,
}

struct Session {
	state: ProtocolState,
	protocol_version: Option<String>,
}

/// Handshake state and method routing for one peer.
pub struct Dispatcher {
	transport: String,
	handlers: Handlers,
	session: Mutex<Session>,
}

impl Dispatcher {
	pub fn new(transport: impl Into<String>, handlers: Handlers) -> Self {
		Self {
			transport: transport.into(),
			handlers,
			session: Mutex::new(Session {
				state: ProtocolState::Uninitialized,
				protocol_version: None,
			}),
		}
	}

	pub fn transport(&self) -> &str {
		&self.transport
	}

	pub fn state(&self) -> ProtocolState {
		self.session.lock().state
	}

	/// Version agreed by the last successful `initialize`.
	pub fn protocol_version(&self) -> Option<String> {
		self.session.lock().protocol_version.clone()
	}

	pub fn close(&self) {
		self.session.lock().state = ProtocolState::Closed;
	}

	/// Handles one validated request.
	///
	/// Returns `None` for notifications, which never get a response.
	pub async fn handle(&self, request: JsonRpcRequest, ctx: RequestContext) -> Option<JsonRpcResponse> {
		let JsonRpcRequest { id, method, params, .. } = request;
		debug!(
			target = "pw.mcp.protocol",
			transport = %self.transport,
			method = %method,
			correlation_id = %ctx.correlation_id(),
			notification = id.is_none(),
			"dispatching"
		);

		if self.state() == ProtocolState::Closed {
			return id.map(|id| JsonRpcResponse::err(Some(id), JsonRpcError::invalid_request("session closed")));
		}

		let outcome = match method.as_str() {
			METHOD_INITIALIZE => self.initialize(params),
			METHOD_INITIALIZED => return None,
			METHOD_PING => Ok(json!({})),
			METHOD_TOOLS_LIST => {
				self.note_ordering(&method);
				self.list_tools(&ctx).await
			}
			METHOD_TOOLS_CALL => {
				self.note_ordering(&method);
				self.call_tool(params, ctx).await
			}
			other => {
				if id.is_none() {
					debug!(target = "pw.mcp.protocol", method = other, "dropping unknown notification");
					return None;
				}
				Err(JsonRpcError::method_not_found(other))
			}
		};

		let id = id?;
		Some(match outcome {
			Ok(result) => JsonRpcResponse::ok(Some(id), result),
			Err(error) => JsonRpcResponse::err(Some(id), error),
		})
	}

	fn initialize(&self, params: Option<Value>) -> Result<Value, JsonRpcError> {
		let params: InitializeParams = match params {
			None | Some(Value::Null) => InitializeParams::default(),
			Some(raw) => serde_json::from_value(raw).map_err(JsonRpcError::invalid_params)?,
		};

		let payload = negotiate(params.protocol_version.as_deref()).into_result()?;

		let mut session = self.session.lock();
		session.state = ProtocolState::Ready;
		session.protocol_version = Some(payload.protocol_version.clone());
		drop(session);

		debug!(
			target = "pw.mcp.protocol",
			transport = %self.transport,
			version = %payload.protocol_version,
			client = ?params.client_info.as_ref().map(|c| c.name.as_str()),
			"handshake complete"
		);
		serde_json::to_value(payload).map_err(JsonRpcError::internal)
	}

	async fn list_tools(&self, ctx: &RequestContext) -> Result<Value, JsonRpcError> {
		let Some(handler) = self.handlers.list.as_ref() else {
			return Err(JsonRpcError::internal("no tool handler registered"));
		};
		let tools = handler.list_tools(ctx).await.map_err(JsonRpcError::internal)?;
		serde_json::to_value(ListToolsResult { tools }).map_err(JsonRpcError::internal)
	}

	async fn call_tool(&self, params: Option<Value>, ctx: RequestContext) -> Result<Value, JsonRpcError> {
		let Some(handler) = self.handlers.call.as_ref() else {
			return Err(JsonRpcError::internal("no tool handler registered"));
		};
		let Some(raw) = params else {
			return Err(JsonRpcError::invalid_params("missing params"));
		};
		let params: CallToolParams = serde_json::from_value(raw).map_err(JsonRpcError::invalid_params)?;
		let result = handler.call_tool(params, ctx).await.map_err(JsonRpcError::internal)?;
		serde_json::to_value(result).map_err(JsonRpcError::internal)
	}

	fn note_ordering(&self, method: &str) {
		if self.state() == ProtocolState::Uninitialized {
			warn!(
				target = "pw.mcp.protocol",
				transport = %self.transport,
				method,
				"tool request received before initialize"
			);
		}
	}
}
