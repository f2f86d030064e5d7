//! Authenticated caller context attached to every inbound call.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Already-authenticated principal a transport serves calls for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CallerIdentity {
	pub team_id: String,
	pub user_id: String,
	pub permissions: BTreeSet<String>,
}

impl Default for CallerIdentity {
	fn default() -> Self {
		Self {
			team_id: "default".to_string(),
			user_id: "local".to_string(),
			permissions: BTreeSet::new(),
		}
	}
}

impl CallerIdentity {
	pub fn new(team_id: impl Into<String>, user_id: impl Into<String>) -> Self {
		Self {
			team_id: team_id.into(),
			user_id: user_id.into(),
			permissions: BTreeSet::new(),
		}
	}

	pub fn with_permissions<I, S>(mut self, permissions: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.permissions = permissions.into_iter().map(Into::into).collect();
		self
	}

	/// Builds a fresh context for one inbound call on `transport`.
	pub fn context(&self, transport: &str) -> RequestContext {
		RequestContext {
			team_id: self.team_id.clone(),
			user_id: self.user_id.clone(),
			correlation_id: uuid::Uuid::new_v4().to_string(),
			permissions: self.permissions.clone(),
			transport: transport.to_string(),
		}
	}
}

/// Per-call context. Team scoping is decided from this, never from call
/// parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestContext {
	team_id: String,
	user_id: String,
	correlation_id: String,
	permissions: BTreeSet<String>,
	transport: String,
}

impl RequestContext {
	pub fn team_id(&self) -> &str {
		&self.team_id
	}

	pub fn user_id(&self) -> &str {
		&self.user_id
	}

	pub fn correlation_id(&self) -> &str {
		&self.correlation_id
	}

	pub fn permissions(&self) -> &BTreeSet<String> {
		&self.permissions
	}

	pub fn has_permission(&self, permission: &str) -> bool {
		self.permissions.contains(permission)
	}

	pub fn transport(&self) -> &str {
		&self.transport
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn each_context_gets_its_own_correlation_id() {
		let identity = CallerIdentity::new("alpha", "u1").with_permissions(["browser:use"]);
		let a = identity.context("stdio");
		let b = identity.context("stdio");
		assert_ne!(a.correlation_id(), b.correlation_id());
		assert_eq!(a.team_id(), "alpha");
		assert_eq!(a.transport(), "stdio");
		assert!(a.has_permission("browser:use"));
	}
}
