//! Team-scoped tool routing over the browser pool.
//!
//! Every handle-bound call passes through [`SessionRegistry::authorize`]
//! before the pool is touched. [`Router::route`] always returns a
//! [`RouteResponse`]; failures and panics become structured errors.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use std::time::Instant;

use futures_util::FutureExt;
use pw_mcp_protocol::RequestContext;
use pw_mcp_runtime::{AllocationRequest, PoolError, PoolEvent, PoolManager};
use serde::Serialize;
use serde_json::{Value, json};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{Result, RouteError, RouterError};
use crate::registry::{RegistryStatistics, SessionRecord, SessionRegistry};
use crate::tools::{CreateArgs, ToolCall};

/// A decoded tool call bound to its caller.
#[derive(Debug, Clone)]
pub struct RouteRequest {
	pub tool: String,
	pub params: Value,
	pub context: RequestContext,
}

impl RouteRequest {
	pub fn new(tool: impl Into<String>, params: Value, context: RequestContext) -> Self {
		Self {
			tool: tool.into(),
			params,
			context,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteMetadata {
	/// Milliseconds spent inside `route`.
	pub execution_time: u64,
	pub team_id: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub browser_id: Option<String>,
	pub correlation_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteResponse {
	pub success: bool,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub result: Option<Value>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<RouteError>,
	pub metadata: RouteMetadata,
}

/// Value of a successful call plus the instance it touched.
struct Routed {
	value: Value,
	browser_id: Option<String>,
}

impl Routed {
	fn new(value: Value, browser_id: Option<String>) -> Self {
		Self { value, browser_id }
	}
}

pub struct Router {
	pool: Arc<PoolManager>,
	registry: Arc<SessionRegistry>,
}

impl Router {
	pub fn new(pool: Arc<PoolManager>) -> Self {
		Self {
			pool,
			registry: Arc::new(SessionRegistry::new()),
		}
	}

	pub fn pool(&self) -> &Arc<PoolManager> {
		&self.pool
	}

	pub fn registry(&self) -> &SessionRegistry {
		&self.registry
	}

	pub fn statistics(&self) -> RegistryStatistics {
		self.registry.statistics()
	}

	/// Spawns a task that drops sessions whose browser the pool removed,
	/// whether explicitly, for idleness, or after failing health checks.
	///
	/// The task ends when the pool goes away.
	pub fn track_removals(&self) -> JoinHandle<()> {
		let events = self.pool.subscribe();
		let pool = Arc::downgrade(&self.pool);
		let registry = Arc::clone(&self.registry);
		tokio::spawn(prune_removed(events, pool, registry))
	}

	/// Executes one tool call for `request.context`'s team.
	pub async fn route(&self, request: RouteRequest) -> RouteResponse {
		let started = Instant::now();
		let RouteRequest { tool, params, context } = request;

		let outcome = AssertUnwindSafe(self.dispatch(&tool, params, &context))
			.catch_unwind()
			.await
			.unwrap_or_else(|panic| Err(RouterError::Internal(panic_message(panic.as_ref()))));

		let execution_time = started.elapsed().as_millis() as u64;
		let metadata = |browser_id| RouteMetadata {
			execution_time,
			team_id: context.team_id().to_string(),
			browser_id,
			correlation_id: context.correlation_id().to_string(),
		};

		match outcome {
			Ok(routed) => {
				info!(
					target = "pw.mcp.router",
					tool = %tool,
					team = %context.team_id(),
					correlation_id = %context.correlation_id(),
					elapsed_ms = execution_time,
					"tool call succeeded"
				);
				RouteResponse {
					success: true,
					result: Some(routed.value),
					error: None,
					metadata: metadata(routed.browser_id),
				}
			}
			Err(err) => {
				let error = err.to_route_error();
				warn!(
					target = "pw.mcp.router",
					tool = %tool,
					team = %context.team_id(),
					correlation_id = %context.correlation_id(),
					code = %error.code,
					error = %error.message,
					"tool call failed"
				);
				RouteResponse {
					success: false,
					result: None,
					error: Some(error),
					metadata: metadata(None),
				}
			}
		}
	}

	async fn dispatch(&self, tool: &str, params: Value, context: &RequestContext) -> Result<Routed> {
		let team = context.team_id();
		match ToolCall::parse(tool, params)? {
			ToolCall::Create(args) => self.create(args, team).await,
			ToolCall::Close { session_id } => self.close(&session_id, team).await,
			ToolCall::Action { session_id, action, args } => self.act(&session_id, team, action, args).await,
			ToolCall::ListSessions => Ok(Routed::new(self.list_sessions(team), None)),
		}
	}

	async fn create(&self, args: CreateArgs, team: &str) -> Result<Routed> {
		let request = AllocationRequest {
			team_id: Some(team.to_string()),
			browser_type: args.browser_type,
			priority: args.priority,
			metadata: args.metadata,
		};
		let allocation = self.pool.allocate(request).await?;
		let browser_id = allocation.instance.id().to_string();
		self.registry
			.insert(allocation.handle.clone(), SessionRecord::new(team, browser_id.clone()));

		debug!(
			target = "pw.mcp.router",
			session = %allocation.handle,
			instance = %browser_id,
			team = %team,
			created = allocation.created,
			"session registered"
		);
		let value = json!({
			"sessionId": allocation.handle,
			"browserId": browser_id,
			"browserType": allocation.instance.kind(),
			"created": allocation.created,
			"allocationTimeMs": allocation.allocation_time.as_millis() as u64,
		});
		Ok(Routed::new(value, Some(browser_id)))
	}

	/// Drops the session; the instance goes with it unless another session
	/// still holds it.
	async fn close(&self, session_id: &str, team: &str) -> Result<Routed> {
		let record = self.registry.authorize(session_id, team)?;
		self.registry.remove(session_id);

		let browser_closed = if self.registry.references(&record.browser_id) == 0 {
			self.pool.remove(&record.browser_id, true).await?;
			true
		} else {
			match self.pool.release(&record.browser_id).await {
				Ok(()) | Err(PoolError::NotFound(_)) => {}
				Err(err) => return Err(err.into()),
			}
			false
		};

		let value = json!({
			"sessionId": session_id,
			"closed": true,
			"browserClosed": browser_closed,
		});
		Ok(Routed::new(value, Some(record.browser_id)))
	}

	async fn act(&self, session_id: &str, team: &str, action: &str, args: Value) -> Result<Routed> {
		let record = self.registry.authorize(session_id, team)?;
		let Some(instance) = self.pool.get(&record.browser_id).await else {
			// Evicted underneath the session.
			self.registry.remove(session_id);
			return Err(RouterError::SessionNotFound(session_id.to_string()));
		};

		let result = instance.invoke(action, args).await;
		if let Err(err) = self.pool.release(&record.browser_id).await {
			debug!(target = "pw.mcp.router", instance = %record.browser_id, error = %err, "release after call failed");
		}

		let mut value = result?;
		match value.as_object_mut() {
			Some(object) => {
				object.insert("sessionId".into(), json!(session_id));
			}
			None => value = json!({ "sessionId": session_id, "value": value }),
		}
		Ok(Routed::new(value, Some(record.browser_id)))
	}

	fn list_sessions(&self, team: &str) -> Value {
		let sessions: Vec<Value> = self
			.registry
			.for_team(team)
			.into_iter()
			.map(|(handle, record)| {
				json!({
					"sessionId": handle,
					"browserId": record.browser_id,
					"createdAt": record.created_at,
				})
			})
			.collect();
		json!({ "teamId": team, "sessions": sessions })
	}
}

async fn prune_removed(mut events: broadcast::Receiver<PoolEvent>, pool: Weak<PoolManager>, registry: Arc<SessionRegistry>) {
	loop {
		match events.recv().await {
			Ok(PoolEvent::Removed { instance_id, reason }) => {
				let dropped = registry.forget_browser(&instance_id);
				if dropped > 0 {
					info!(target = "pw.mcp.router", browser = %instance_id, ?reason, dropped, "sessions dropped with their browser");
				}
			}
			Ok(_) => {}
			Err(broadcast::error::RecvError::Lagged(skipped)) => {
				warn!(target = "pw.mcp.router", skipped, "removal events lagged, reconciling sessions");
				let Some(pool) = pool.upgrade() else { break };
				for browser_id in registry.browser_ids() {
					if pool.get(&browser_id).await.is_none() {
						registry.forget_browser(&browser_id);
					}
				}
			}
			Err(broadcast::error::RecvError::Closed) => break,
		}
	}
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
	let detail = panic
		.downcast_ref::<&str>()
		.map(|s| s.to_string())
		.or_else(|| panic.downcast_ref::<String>().cloned())
		.unwrap_or_else(|| "unknown panic".to_string());
	format!("tool call panicked: {detail}")
}
