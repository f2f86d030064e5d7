//! Handshake negotiation shared by every transport.
//!
//! [`negotiate`] is pure: identical input always yields an identical
//! [`Negotiation`], so the `initialize` answer does not depend on which
//! channel a client arrived on.

use serde::{Serialize, Serializer};
use serde_json::json;

use crate::jsonrpc::{INVALID_PARAMS, JsonRpcError};
use crate::mcp::{InitializeResult, ServerCapabilities, ServerInfo, ToolsCapability};

/// Supported protocol versions, most preferred first.
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2025-06-18", "2025-03-26", "2024-11-05"];

/// Name reported in `serverInfo`.
pub const SERVER_NAME: &str = "pw-mcp";

/// Version reported in `serverInfo`.
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Outcome of a handshake.
#[derive(Debug, Clone, PartialEq)]
pub enum Negotiation {
	Accepted(InitializeResult),
	Rejected(JsonRpcError),
}

impl Negotiation {
	pub fn is_ok(&self) -> bool {
		matches!(self, Negotiation::Accepted(_))
	}

	pub fn into_result(self) -> Result<InitializeResult, JsonRpcError> {
		match self {
			Negotiation::Accepted(payload) => Ok(payload),
			Negotiation::Rejected(error) => Err(error),
		}
	}
}

// `{ok: true, payload}` / `{ok: false, error}`; serde cannot tag on a bool.
impl Serialize for Negotiation {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		#[derive(Serialize)]
		struct View<'a> {
			ok: bool,
			#[serde(skip_serializing_if = "Option::is_none")]
			payload: Option<&'a InitializeResult>,
			#[serde(skip_serializing_if = "Option::is_none")]
			error: Option<&'a JsonRpcError>,
		}

		let view = match self {
			Negotiation::Accepted(payload) => View {
				ok: true,
				payload: Some(payload),
				error: None,
			},
			Negotiation::Rejected(error) => View {
				ok: false,
				payload: None,
				error: Some(error),
			},
		};
		view.serialize(serializer)
	}
}

/// Agrees on a protocol version with the client.
///
/// No proposal selects the most preferred version. An unsupported proposal
/// is rejected with an error that names it and lists what is supported.
pub fn negotiate(proposed: Option<&str>) -> Negotiation {
	let version = match proposed {
		None => SUPPORTED_PROTOCOL_VERSIONS[0],
		Some(v) => match SUPPORTED_PROTOCOL_VERSIONS.iter().find(|s| **s == v) {
			Some(found) => *found,
			None => {
				let message = format!(
					"Unsupported protocol version: {v}. Supported versions: {}",
					SUPPORTED_PROTOCOL_VERSIONS.join(", ")
				);
				return Negotiation::Rejected(JsonRpcError::new(INVALID_PARAMS, message).with_data(json!({
					"requested": v,
					"supportedVersions": SUPPORTED_PROTOCOL_VERSIONS,
				})));
			}
		},
	};

	Negotiation::Accepted(InitializeResult {
		protocol_version: version.to_string(),
		server_info: ServerInfo {
			name: SERVER_NAME.to_string(),
			version: SERVER_VERSION.to_string(),
		},
		capabilities: ServerCapabilities {
			tools: ToolsCapability { list_changed: false },
		},
	})
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn omitted_version_selects_most_preferred() {
		let payload = negotiate(None).into_result().unwrap();
		assert_eq!(payload.protocol_version, SUPPORTED_PROTOCOL_VERSIONS[0]);
		assert_eq!(payload.server_info.name, SERVER_NAME);
	}

	#[test]
	fn supported_version_is_echoed() {
		let payload = negotiate(Some("2024-11-05")).into_result().unwrap();
		assert_eq!(payload.protocol_version, "2024-11-05");
	}

	#[test]
	fn unsupported_version_lists_alternatives() {
		let err = negotiate(Some("1999-01-01")).into_result().unwrap_err();
		assert_eq!(err.code, INVALID_PARAMS);
		assert!(err.message.contains("1999-01-01"));
		for v in SUPPORTED_PROTOCOL_VERSIONS {
			assert!(err.message.contains(v), "missing {v} in {}", err.message);
		}
	}

	#[test]
	fn negotiation_is_idempotent() {
		for input in [None, Some("2025-03-26"), Some("bogus")] {
			let first = serde_json::to_string(&negotiate(input)).unwrap();
			for _ in 0..5 {
				assert_eq!(serde_json::to_string(&negotiate(input)).unwrap(), first);
			}
		}
	}

	#[test]
	fn serializes_ok_flag() {
		let accepted = serde_json::to_value(negotiate(None)).unwrap();
		assert_eq!(accepted["ok"], true);
		assert!(accepted["payload"]["capabilities"]["tools"].is_object());

		let rejected = serde_json::to_value(negotiate(Some("x"))).unwrap();
		assert_eq!(rejected["ok"], false);
		assert_eq!(rejected["error"]["code"], INVALID_PARAMS);
	}
}
