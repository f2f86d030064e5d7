//! HTTP transport: one JSON-RPC endpoint plus plain-JSON status routes.
//!
//! `POST {path}` carries the envelope. Envelope failures are HTTP 400 with a
//! flat `{"success":false,"error":..}` body; method-level failures stay
//! inside a 200 JSON-RPC response; notifications get 204. Other verbs on the
//! endpoint are 400.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use axum::{Json, Router};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use parking_lot::Mutex;
use pw_mcp_protocol::{CallerIdentity, Dispatcher, Handlers, ToolCallHandler, ToolListHandler, parse_envelope};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use super::{Lifecycle, Transport};
use crate::error::{Result, ServerError};

pub const DEFAULT_PATH: &str = "/mcp";

const TEAM_HEADER: &str = "x-team-id";
const USER_HEADER: &str = "x-user-id";
const PERMISSIONS_HEADER: &str = "x-permissions";

/// Source of the `/metrics` payload.
#[async_trait]
pub trait StatusProvider: Send + Sync {
	async fn metrics(&self) -> Value;
}

#[derive(Clone)]
struct HttpState {
	dispatcher: Arc<Dispatcher>,
	handlers: Handlers,
	identity: CallerIdentity,
	trust_identity_headers: bool,
	status: Option<Arc<dyn StatusProvider>>,
	started: Instant,
}

impl HttpState {
	/// Configured identity, replaced field-by-field by trusted upstream
	/// headers when enabled. Never derived from the JSON-RPC body.
	fn identity(&self, headers: &HeaderMap) -> CallerIdentity {
		let mut identity = self.identity.clone();
		if !self.trust_identity_headers {
			return identity;
		}
		let header = |name: &str| {
			headers
				.get(name)
				.and_then(|v| v.to_str().ok())
				.map(str::trim)
				.filter(|v| !v.is_empty())
		};
		if let Some(team) = header(TEAM_HEADER) {
			identity.team_id = team.to_string();
		}
		if let Some(user) = header(USER_HEADER) {
			identity.user_id = user.to_string();
		}
		if let Some(permissions) = header(PERMISSIONS_HEADER) {
			identity.permissions = permissions
				.split(',')
				.map(str::trim)
				.filter(|p| !p.is_empty())
				.map(str::to_string)
				.collect();
		}
		identity
	}
}

pub struct HttpTransport {
	addr: SocketAddr,
	path: String,
	identity: CallerIdentity,
	trust_identity_headers: bool,
	status: Mutex<Option<Arc<dyn StatusProvider>>>,
	lifecycle: Arc<Lifecycle>,
	listener: Mutex<Option<TcpListener>>,
	local_addr: Mutex<Option<SocketAddr>>,
	dispatcher: Mutex<Option<Arc<Dispatcher>>>,
}

impl HttpTransport {
	pub fn new(addr: SocketAddr, path: impl Into<String>, identity: CallerIdentity) -> Self {
		let mut path = path.into();
		if !path.starts_with('/') {
			path.insert(0, '/');
		}
		Self {
			addr,
			path,
			identity,
			trust_identity_headers: false,
			status: Mutex::new(None),
			lifecycle: Lifecycle::new("http"),
			listener: Mutex::new(None),
			local_addr: Mutex::new(None),
			dispatcher: Mutex::new(None),
		}
	}

	pub fn trust_identity_headers(mut self, trust: bool) -> Self {
		self.trust_identity_headers = trust;
		self
	}

	pub fn set_status_provider(&self, provider: Arc<dyn StatusProvider>) {
		*self.status.lock() = Some(provider);
	}

	/// Bound address; resolves a port-0 bind after initialize.
	pub fn local_addr(&self) -> Option<SocketAddr> {
		*self.local_addr.lock()
	}

	/// Builds the axum app around this endpoint's dispatcher.
	pub fn app(&self) -> Router {
		let handlers = self.lifecycle.handlers();
		let dispatcher = {
			let mut slot = self.dispatcher.lock();
			Arc::clone(slot.get_or_insert_with(|| Arc::new(Dispatcher::new("http", handlers.clone()))))
		};
		let state = HttpState {
			dispatcher,
			handlers,
			identity: self.identity.clone(),
			trust_identity_headers: self.trust_identity_headers,
			status: self.status.lock().clone(),
			started: Instant::now(),
		};

		Router::new()
			.route(&self.path, post(rpc).fallback(reject_method))
			.route("/health", get(health))
			.route("/metrics", get(metrics))
			.route("/tools", get(tools))
			.layer(TraceLayer::new_for_http())
			.with_state(state)
	}
}

#[async_trait]
impl Transport for HttpTransport {
	fn name(&self) -> &'static str {
		"http"
	}

	fn set_tool_list_handler(&self, handler: Arc<dyn ToolListHandler>) {
		self.lifecycle.set_list(handler);
	}

	fn set_tool_call_handler(&self, handler: Arc<dyn ToolCallHandler>) {
		self.lifecycle.set_call(handler);
	}

	async fn initialize(&self) -> Result<()> {
		if self.listener.lock().is_some() {
			return Ok(());
		}
		let listener = TcpListener::bind(self.addr).await.map_err(|source| ServerError::Bind {
			target: self.addr.to_string(),
			source,
		})?;
		let local = listener.local_addr()?;
		*self.local_addr.lock() = Some(local);
		*self.listener.lock() = Some(listener);
		self.lifecycle.mark_initialized();
		Ok(())
	}

	async fn start(&self) -> Result<()> {
		self.lifecycle.begin()?;
		let taken = self.listener.lock().take();
		let Some(listener) = taken else {
			self.lifecycle.finished();
			return Err(ServerError::NotInitialized("http"));
		};

		let app = self.app();
		let mut shutdown = self.lifecycle.shutdown_signal();
		let lifecycle = Arc::clone(&self.lifecycle);
		let task = tokio::spawn(async move {
			let served = axum::serve(listener, app)
				.with_graceful_shutdown(async move {
					let _ = shutdown.wait_for(|stop| *stop).await;
				})
				.await;
			if let Err(err) = served {
				warn!(target = "pw.mcp.transport", transport = "http", error = %err, "HTTP server failed");
			}
			lifecycle.finished();
		});
		self.lifecycle.attach(task);

		info!(
			target = "pw.mcp.transport",
			addr = ?self.local_addr(),
			path = %self.path,
			team = %self.identity.team_id,
			"serving JSON-RPC over HTTP"
		);
		Ok(())
	}

	async fn stop(&self) -> Result<()> {
		self.lifecycle.halt().await;
		self.listener.lock().take();
		if let Some(dispatcher) = self.dispatcher.lock().take() {
			dispatcher.close();
		}
		Ok(())
	}

	fn is_running(&self) -> bool {
		self.lifecycle.is_running()
	}

	async fn wait(&self) {
		self.lifecycle.wait().await;
	}
}

fn flat_error(status: StatusCode, message: impl Into<String>) -> Response {
	let body = json!({ "success": false, "error": message.into() });
	(status, Json(body)).into_response()
}

async fn rpc(State(state): State<HttpState>, headers: HeaderMap, body: Bytes) -> Response {
	let value: Value = match serde_json::from_slice(&body) {
		Ok(value) => value,
		Err(err) => return flat_error(StatusCode::BAD_REQUEST, format!("invalid JSON: {err}")),
	};
	let request = match parse_envelope(&value) {
		Ok(request) => request,
		Err(err) => return flat_error(StatusCode::BAD_REQUEST, err.to_string()),
	};

	let ctx = state.identity(&headers).context(state.dispatcher.transport());
	match state.dispatcher.handle(request, ctx).await {
		Some(response) => (StatusCode::OK, Json(response)).into_response(),
		None => StatusCode::NO_CONTENT.into_response(),
	}
}

async fn reject_method(method: Method) -> Response {
	flat_error(
		StatusCode::BAD_REQUEST,
		format!("method {method} not allowed on the JSON-RPC endpoint; use POST"),
	)
}

async fn health(State(state): State<HttpState>) -> Json<Value> {
	Json(json!({
		"status": "ok",
		"transport": state.dispatcher.transport(),
		"protocolState": state.dispatcher.state(),
		"uptimeMs": state.started.elapsed().as_millis() as u64,
	}))
}

async fn metrics(State(state): State<HttpState>) -> Json<Value> {
	match &state.status {
		Some(provider) => Json(provider.metrics().await),
		None => Json(json!({})),
	}
}

async fn tools(State(state): State<HttpState>, headers: HeaderMap) -> Response {
	let Some(list) = state.handlers.list.as_ref() else {
		return flat_error(StatusCode::SERVICE_UNAVAILABLE, "no tool handler registered");
	};
	let ctx = state.identity(&headers).context(state.dispatcher.transport());
	match list.list_tools(&ctx).await {
		Ok(tools) => Json(json!({ "tools": tools })).into_response(),
		Err(err) => flat_error(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
	}
}
