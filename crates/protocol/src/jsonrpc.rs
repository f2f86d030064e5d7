//! JSON-RPC 2.0 envelope types and validation.
//!
//! Requests are validated from a raw [`Value`] rather than deserialized
//! directly so that transports can tell envelope-level problems (wrong
//! `jsonrpc` marker, non-string `method`) apart from method-level failures.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Required value of the `jsonrpc` member.
pub const JSONRPC_VERSION: &str = "2.0";

/// Invalid JSON was received.
pub const PARSE_ERROR: i64 = -32700;
/// The JSON sent is not a valid request object.
pub const INVALID_REQUEST: i64 = -32600;
/// The method does not exist or is not available.
pub const METHOD_NOT_FOUND: i64 = -32601;
/// Invalid method parameters (also used for unsupported protocol versions).
pub const INVALID_PARAMS: i64 = -32602;
/// Internal server error.
pub const INTERNAL_ERROR: i64 = -32603;

/// Request identifier. An absent or `null` id marks a notification.
///
/// Numbers are kept as received, so fractional and out-of-`i64` ids echo
/// back unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcId {
	Number(serde_json::Number),
	String(String),
}

impl From<i64> for JsonRpcId {
	fn from(n: i64) -> Self {
		JsonRpcId::Number(n.into())
	}
}

impl From<&str> for JsonRpcId {
	fn from(s: &str) -> Self {
		JsonRpcId::String(s.to_string())
	}
}

impl fmt::Display for JsonRpcId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			JsonRpcId::Number(n) => write!(f, "{n}"),
			JsonRpcId::String(s) => write!(f, "{s}"),
		}
	}
}

/// Inbound request or notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
	pub jsonrpc: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub id: Option<JsonRpcId>,
	pub method: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub params: Option<Value>,
}

impl JsonRpcRequest {
	pub fn new(id: Option<JsonRpcId>, method: impl Into<String>, params: Option<Value>) -> Self {
		Self {
			jsonrpc: JSONRPC_VERSION.to_string(),
			id,
			method: method.into(),
			params,
		}
	}

	/// Returns `true` when no response is expected.
	pub fn is_notification(&self) -> bool {
		self.id.is_none()
	}
}

/// Error object carried inside a response envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
	pub code: i64,
	pub message: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub data: Option<Value>,
}

impl JsonRpcError {
	pub fn new(code: i64, message: impl Into<String>) -> Self {
		Self {
			code,
			message: message.into(),
			data: None,
		}
	}

	pub fn with_data(mut self, data: Value) -> Self {
		self.data = Some(data);
		self
	}

	pub fn parse_error(detail: impl fmt::Display) -> Self {
		Self::new(PARSE_ERROR, "Parse error").with_data(serde_json::json!({ "detail": detail.to_string() }))
	}

	pub fn invalid_request(detail: impl fmt::Display) -> Self {
		Self::new(INVALID_REQUEST, format!("Invalid Request: {detail}"))
	}

	pub fn method_not_found(method: &str) -> Self {
		Self::new(METHOD_NOT_FOUND, format!("Method not found: {method}"))
	}

	pub fn invalid_params(detail: impl fmt::Display) -> Self {
		Self::new(INVALID_PARAMS, format!("Invalid params: {detail}"))
	}

	pub fn internal(detail: impl fmt::Display) -> Self {
		Self::new(INTERNAL_ERROR, format!("Internal error: {detail}"))
	}
}

/// Outbound response envelope. Exactly one of `result`/`error` is set.
///
/// `id` serializes as `null` when the request id could not be recovered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
	pub jsonrpc: String,
	pub id: Option<JsonRpcId>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub result: Option<Value>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
	pub fn ok(id: Option<JsonRpcId>, result: Value) -> Self {
		Self {
			jsonrpc: JSONRPC_VERSION.to_string(),
			id,
			result: Some(result),
			error: None,
		}
	}

	pub fn err(id: Option<JsonRpcId>, error: JsonRpcError) -> Self {
		Self {
			jsonrpc: JSONRPC_VERSION.to_string(),
			id,
			result: None,
			error: Some(error),
		}
	}

	pub fn is_error(&self) -> bool {
		self.error.is_some()
	}
}

/// Envelope-level validation failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvelopeError {
	#[error("request must be a JSON object")]
	NotAnObject,

	#[error("batch requests are not supported")]
	Batch,

	#[error("jsonrpc must be \"2.0\", got {0}")]
	InvalidVersion(String),

	#[error("method must be a string")]
	InvalidMethod,

	#[error("id must be a string, a number, or null")]
	InvalidId,
}

impl EnvelopeError {
	/// Converts into the JSON-RPC error object for stream transports.
	pub fn to_rpc_error(&self) -> JsonRpcError {
		JsonRpcError::invalid_request(self)
	}
}

/// Validates a decoded JSON value as a request envelope.
pub fn parse_envelope(value: &Value) -> Result<JsonRpcRequest, EnvelopeError> {
	let obj = match value {
		Value::Object(obj) => obj,
		Value::Array(_) => return Err(EnvelopeError::Batch),
		_ => return Err(EnvelopeError::NotAnObject),
	};

	match obj.get("jsonrpc") {
		Some(Value::String(v)) if v == JSONRPC_VERSION => {}
		Some(other) => return Err(EnvelopeError::InvalidVersion(other.to_string())),
		None => return Err(EnvelopeError::InvalidVersion("nothing".to_string())),
	}

	let id = match obj.get("id") {
		None | Some(Value::Null) => None,
		Some(Value::String(s)) => Some(JsonRpcId::String(s.clone())),
		Some(Value::Number(n)) => Some(JsonRpcId::Number(n.clone())),
		Some(_) => return Err(EnvelopeError::InvalidId),
	};

	let method = match obj.get("method") {
		Some(Value::String(m)) => m.clone(),
		_ => return Err(EnvelopeError::InvalidMethod),
	};

	Ok(JsonRpcRequest {
		jsonrpc: JSONRPC_VERSION.to_string(),
		id,
		method,
		params: obj.get("params").cloned(),
	})
}

/// Best-effort id extraction from an envelope that failed validation.
pub fn recover_id(value: &Value) -> Option<JsonRpcId> {
	match value.get("id")? {
		Value::String(s) => Some(JsonRpcId::String(s.clone())),
		Value::Number(n) => Some(JsonRpcId::Number(n.clone())),
		_ => None,
	}
}
