use std::sync::Arc;

use async_trait::async_trait;
use pw_mcp_protocol::{CallToolParams, CallToolResult, Handlers, RequestContext, ToolCallHandler, ToolDescriptor, ToolListHandler};
use serde_json::Value;

use crate::router::{RouteRequest, Router};
use crate::tools;

/// Serves the tool catalog and forwards `tools/call` to a [`Router`].
#[derive(Clone)]
pub struct McpToolHandler {
	router: Arc<Router>,
}

impl McpToolHandler {
	pub fn new(router: Arc<Router>) -> Self {
		Self { router }
	}

	pub fn router(&self) -> &Arc<Router> {
		&self.router
	}

	/// Registers this handler for both seams.
	pub fn handlers(self: &Arc<Self>) -> Handlers {
		Handlers::new(
			Arc::clone(self) as Arc<dyn ToolListHandler>,
			Arc::clone(self) as Arc<dyn ToolCallHandler>,
		)
	}
}

#[async_trait]
impl ToolListHandler for McpToolHandler {
	async fn list_tools(&self, _ctx: &RequestContext) -> anyhow::Result<Vec<ToolDescriptor>> {
		Ok(tools::catalog())
	}
}

#[async_trait]
impl ToolCallHandler for McpToolHandler {
	async fn call_tool(&self, params: CallToolParams, ctx: RequestContext) -> anyhow::Result<CallToolResult> {
		let request = RouteRequest::new(params.name, params.arguments.unwrap_or(Value::Null), ctx);
		let response = self.router.route(request).await;
		let is_error = !response.success;
		Ok(CallToolResult::structured(serde_json::to_value(&response)?, is_error))
	}
}
