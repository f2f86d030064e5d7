use pw_mcp_runtime::{InstanceError, PoolError};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RouterError>;

/// Stable error codes for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
	/// Session belongs to another team
	AccessDenied,
	/// No session with that handle
	SessionNotFound,
	/// Pool has no eligible instance and no headroom
	PoolExhausted,
	/// Request incompatible with the allocation strategy
	AllocationConfigError,
	/// Tool name not in the catalog
	UnknownTool,
	/// Tool arguments failed validation
	InvalidInput,
	/// The browser failed to carry out an action
	BrowserError,
	/// Unknown/internal error
	InternalError,
}

impl std::fmt::Display for ErrorCode {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			ErrorCode::AccessDenied => write!(f, "ACCESS_DENIED"),
			ErrorCode::SessionNotFound => write!(f, "SESSION_NOT_FOUND"),
			ErrorCode::PoolExhausted => write!(f, "POOL_EXHAUSTED"),
			ErrorCode::AllocationConfigError => write!(f, "ALLOCATION_CONFIG_ERROR"),
			ErrorCode::UnknownTool => write!(f, "UNKNOWN_TOOL"),
			ErrorCode::InvalidInput => write!(f, "INVALID_INPUT"),
			ErrorCode::BrowserError => write!(f, "BROWSER_ERROR"),
			ErrorCode::InternalError => write!(f, "INTERNAL_ERROR"),
		}
	}
}

/// Error payload of a failed route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteError {
	pub code: ErrorCode,
	pub message: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub details: Option<Value>,
}

#[derive(Debug, Error)]
pub enum RouterError {
	#[error("Access denied: session {session_id} belongs to team '{owner}'")]
	AccessDenied { session_id: String, owner: String },

	#[error("Session not found: {0}")]
	SessionNotFound(String),

	#[error("Unknown tool: {0}")]
	UnknownTool(String),

	#[error("Invalid input for {tool}: {message}")]
	InvalidInput { tool: String, message: String },

	#[error(transparent)]
	Pool(#[from] PoolError),

	#[error("browser action failed: {0}")]
	Browser(#[from] InstanceError),

	#[error("internal error: {0}")]
	Internal(String),
}

impl RouterError {
	pub fn code(&self) -> ErrorCode {
		match self {
			RouterError::AccessDenied { .. } => ErrorCode::AccessDenied,
			RouterError::SessionNotFound(_) => ErrorCode::SessionNotFound,
			RouterError::UnknownTool(_) => ErrorCode::UnknownTool,
			RouterError::InvalidInput { .. } => ErrorCode::InvalidInput,
			RouterError::Pool(PoolError::Exhausted { .. }) => ErrorCode::PoolExhausted,
			RouterError::Pool(PoolError::AllocationConfig(_)) => ErrorCode::AllocationConfigError,
			RouterError::Pool(PoolError::NotFound(_)) => ErrorCode::SessionNotFound,
			RouterError::Pool(PoolError::Factory(_) | PoolError::Close { .. }) => ErrorCode::BrowserError,
			RouterError::Pool(PoolError::InvalidConfig(_) | PoolError::Shutdown) => ErrorCode::InternalError,
			RouterError::Browser(InstanceError::InvalidArguments { .. }) => ErrorCode::InvalidInput,
			RouterError::Browser(_) => ErrorCode::BrowserError,
			RouterError::Internal(_) => ErrorCode::InternalError,
		}
	}

	/// Converts this error to a [`RouteError`] for structured output.
	pub fn to_route_error(&self) -> RouteError {
		let details = match self {
			RouterError::AccessDenied { session_id, owner } => Some(json!({
				"sessionId": session_id,
				"ownerTeamId": owner,
			})),
			RouterError::SessionNotFound(session_id) => Some(json!({ "sessionId": session_id })),
			RouterError::UnknownTool(tool) => Some(json!({ "tool": tool })),
			RouterError::Pool(PoolError::Exhausted { size, max_size }) => Some(json!({
				"size": size,
				"maxSize": max_size,
			})),
			_ => None,
		};
		RouteError {
			code: self.code(),
			message: self.to_string(),
			details,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn pool_errors_map_to_stable_codes() {
		let exhausted = RouterError::from(PoolError::Exhausted { size: 2, max_size: 2 });
		assert_eq!(exhausted.code(), ErrorCode::PoolExhausted);
		assert_eq!(exhausted.to_route_error().details.unwrap()["maxSize"], 2);

		let config = RouterError::from(PoolError::AllocationConfig("needs team".into()));
		assert_eq!(config.code(), ErrorCode::AllocationConfigError);
	}

	#[test]
	fn codes_serialize_screaming_snake() {
		assert_eq!(serde_json::to_value(ErrorCode::AccessDenied).unwrap(), "ACCESS_DENIED");
		assert_eq!(ErrorCode::AllocationConfigError.to_string(), "ALLOCATION_CONFIG_ERROR");
	}

	#[test]
	fn access_denied_names_owner() {
		let err = RouterError::AccessDenied {
			session_id: "s1".into(),
			owner: "alpha".into(),
		};
		let route = err.to_route_error();
		assert!(route.message.contains("alpha"));
		assert_eq!(route.details.unwrap()["ownerTeamId"], "alpha");
	}
}
