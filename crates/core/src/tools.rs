//! Tool catalog: names, input schemas, and typed argument parsing.
//!
//! Arguments carrying a `teamId` are accepted and the field ignored. Team
//! scope always comes from the request context.

use pw_mcp_protocol::ToolDescriptor;
use pw_mcp_runtime::BrowserKind;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::error::{Result, RouterError};

pub const BROWSER_CREATE: &str = "browser_create";
pub const BROWSER_CLOSE: &str = "browser_close";
pub const BROWSER_NAVIGATE: &str = "browser_navigate";
pub const BROWSER_CLICK: &str = "browser_click";
pub const BROWSER_EVALUATE: &str = "browser_evaluate";
pub const BROWSER_QUERY: &str = "browser_query";
pub const BROWSER_SCREENSHOT: &str = "browser_screenshot";
pub const BROWSER_LIST_SESSIONS: &str = "browser_list_sessions";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateArgs {
	#[serde(default)]
	pub browser_type: Option<BrowserKind>,
	#[serde(default)]
	pub priority: Option<i32>,
	#[serde(default)]
	pub metadata: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionArgs {
	session_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NavigateArgs {
	session_id: String,
	url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SelectorArgs {
	session_id: String,
	selector: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EvaluateArgs {
	session_id: String,
	expression: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScreenshotArgs {
	session_id: String,
	#[serde(default)]
	full_page: bool,
}

/// A decoded tool call.
#[derive(Debug, Clone)]
pub enum ToolCall {
	Create(CreateArgs),
	Close {
		session_id: String,
	},
	/// Handle-bound browser action forwarded to [`BrowserInstance::invoke`].
	///
	/// [`BrowserInstance::invoke`]: pw_mcp_runtime::BrowserInstance::invoke
	Action {
		session_id: String,
		action: &'static str,
		args: Value,
	},
	ListSessions,
}

impl ToolCall {
	pub fn parse(tool: &str, params: Value) -> Result<Self> {
		let params = if params.is_null() { json!({}) } else { params };
		match tool {
			BROWSER_CREATE => Ok(Self::Create(decode(tool, params)?)),
			BROWSER_CLOSE => {
				let args: SessionArgs = decode(tool, params)?;
				Ok(Self::Close {
					session_id: args.session_id,
				})
			}
			BROWSER_NAVIGATE => {
				let args: NavigateArgs = decode(tool, params)?;
				Ok(Self::action(args.session_id, "navigate", json!({ "url": args.url })))
			}
			BROWSER_CLICK => {
				let args: SelectorArgs = decode(tool, params)?;
				Ok(Self::action(args.session_id, "click", json!({ "selector": args.selector })))
			}
			BROWSER_EVALUATE => {
				let args: EvaluateArgs = decode(tool, params)?;
				Ok(Self::action(
					args.session_id,
					"evaluate",
					json!({ "expression": args.expression }),
				))
			}
			BROWSER_QUERY => {
				let args: SelectorArgs = decode(tool, params)?;
				Ok(Self::action(args.session_id, "query", json!({ "selector": args.selector })))
			}
			BROWSER_SCREENSHOT => {
				let args: ScreenshotArgs = decode(tool, params)?;
				Ok(Self::action(
					args.session_id,
					"screenshot",
					json!({ "fullPage": args.full_page }),
				))
			}
			BROWSER_LIST_SESSIONS => Ok(Self::ListSessions),
			other => Err(RouterError::UnknownTool(other.to_string())),
		}
	}

	fn action(session_id: String, action: &'static str, args: Value) -> Self {
		Self::Action {
			session_id,
			action,
			args,
		}
	}

	/// Handle the call refers to, if any.
	pub fn session_id(&self) -> Option<&str> {
		match self {
			Self::Close { session_id } | Self::Action { session_id, .. } => Some(session_id),
			Self::Create(_) | Self::ListSessions => None,
		}
	}
}

fn decode<T: DeserializeOwned>(tool: &str, params: Value) -> Result<T> {
	serde_json::from_value(params).map_err(|e| RouterError::InvalidInput {
		tool: tool.to_string(),
		message: e.to_string(),
	})
}

fn session_schema(extra: Value, required: &[&str]) -> Value {
	let mut properties = json!({
		"sessionId": { "type": "string", "description": "Handle returned by browser_create" }
	});
	if let (Some(props), Value::Object(extra)) = (properties.as_object_mut(), extra) {
		props.extend(extra);
	}
	let mut names = vec!["sessionId"];
	names.extend_from_slice(required);
	json!({
		"type": "object",
		"properties": properties,
		"required": names,
	})
}

/// Every tool the server exposes, in listing order.
pub fn catalog() -> Vec<ToolDescriptor> {
	vec![
		ToolDescriptor::new(
			BROWSER_CREATE,
			"Allocate a browser session for the calling team",
			json!({
				"type": "object",
				"properties": {
					"browserType": { "type": "string", "enum": ["chromium", "firefox", "webkit"] },
					"priority": { "type": "integer" },
					"metadata": { "type": "object" }
				}
			}),
		),
		ToolDescriptor::new(BROWSER_CLOSE, "Close a browser session", session_schema(json!({}), &[])),
		ToolDescriptor::new(
			BROWSER_NAVIGATE,
			"Navigate the session's page to a URL",
			session_schema(json!({ "url": { "type": "string" } }), &["url"]),
		),
		ToolDescriptor::new(
			BROWSER_CLICK,
			"Click the first element matching a CSS selector",
			session_schema(json!({ "selector": { "type": "string" } }), &["selector"]),
		),
		ToolDescriptor::new(
			BROWSER_EVALUATE,
			"Evaluate a JavaScript expression in the page",
			session_schema(json!({ "expression": { "type": "string" } }), &["expression"]),
		),
		ToolDescriptor::new(
			BROWSER_QUERY,
			"Return text and attributes of elements matching a CSS selector",
			session_schema(json!({ "selector": { "type": "string" } }), &["selector"]),
		),
		ToolDescriptor::new(
			BROWSER_SCREENSHOT,
			"Capture a PNG screenshot (base64)",
			session_schema(json!({ "fullPage": { "type": "boolean" } }), &[]),
		),
		ToolDescriptor::new(
			BROWSER_LIST_SESSIONS,
			"List the calling team's open sessions",
			json!({ "type": "object", "properties": {} }),
		),
	]
}
