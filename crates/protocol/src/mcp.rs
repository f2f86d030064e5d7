//! MCP payload types carried inside JSON-RPC envelopes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
	pub name: String,
	pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
	pub name: String,
	pub version: String,
}

/// `initialize` request parameters. Every field is optional so that
/// minimal clients can still negotiate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub protocol_version: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub capabilities: Option<Value>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub client_info: Option<ClientInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolsCapability {
	pub list_changed: bool,
}

/// Capability descriptor advertised on a successful handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerCapabilities {
	pub tools: ToolsCapability,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
	pub protocol_version: String,
	pub server_info: ServerInfo,
	pub capabilities: ServerCapabilities,
}

/// Tool advertised through `tools/list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
	pub name: String,
	pub description: String,
	pub input_schema: Value,
}

impl ToolDescriptor {
	pub fn new(name: impl Into<String>, description: impl Into<String>, input_schema: Value) -> Self {
		Self {
			name: name.into(),
			description: description.into(),
			input_schema,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListToolsResult {
	pub tools: Vec<ToolDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolParams {
	pub name: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub arguments: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
	Text { text: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResult {
	pub content: Vec<ContentBlock>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub structured_content: Option<Value>,
	#[serde(default)]
	pub is_error: bool,
}

impl CallToolResult {
	/// Builds a result whose text content mirrors the structured payload.
	pub fn structured(payload: Value, is_error: bool) -> Self {
		let text = serde_json::to_string_pretty(&payload).unwrap_or_else(|_| payload.to_string());
		Self {
			content: vec![ContentBlock::Text { text }],
			structured_content: Some(payload),
			is_error,
		}
	}
}
