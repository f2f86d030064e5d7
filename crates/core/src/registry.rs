//! Handle → owning-team map consulted on every session-bound call.
//!
//! Uses [`DashMap`] so lookups from concurrent calls never serialise on a
//! single lock. The owning team of a record never changes.

use std::collections::BTreeMap;

use dashmap::DashMap;
use serde::Serialize;

use crate::error::{Result, RouterError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
	pub team_id: String,
	pub browser_id: String,
	/// Milliseconds since the Unix epoch.
	pub created_at: u64,
}

impl SessionRecord {
	pub fn new(team_id: impl Into<String>, browser_id: impl Into<String>) -> Self {
		Self {
			team_id: team_id.into(),
			browser_id: browser_id.into(),
			created_at: now_ms(),
		}
	}
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryStatistics {
	pub active_sessions: usize,
	pub sessions_by_team: BTreeMap<String, usize>,
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
	sessions: DashMap<String, SessionRecord>,
}

impl SessionRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn insert(&self, handle: impl Into<String>, record: SessionRecord) {
		self.sessions.insert(handle.into(), record);
	}

	pub fn get(&self, handle: &str) -> Option<SessionRecord> {
		self.sessions.get(handle).map(|r| r.value().clone())
	}

	pub fn remove(&self, handle: &str) -> Option<SessionRecord> {
		self.sessions.remove(handle).map(|(_, record)| record)
	}

	/// Looks up `handle` on behalf of `team_id`.
	///
	/// This is the only team check; nothing in call parameters can widen it.
	pub fn authorize(&self, handle: &str, team_id: &str) -> Result<SessionRecord> {
		let record = self.get(handle).ok_or_else(|| RouterError::SessionNotFound(handle.to_string()))?;
		if record.team_id != team_id {
			return Err(RouterError::AccessDenied {
				session_id: handle.to_string(),
				owner: record.team_id,
			});
		}
		Ok(record)
	}

	/// Number of sessions bound to `browser_id`.
	pub fn references(&self, browser_id: &str) -> usize {
		self.sessions.iter().filter(|r| r.value().browser_id == browser_id).count()
	}

	/// Sessions owned by `team_id`, oldest first.
	pub fn for_team(&self, team_id: &str) -> Vec<(String, SessionRecord)> {
		let mut owned: Vec<_> = self
			.sessions
			.iter()
			.filter(|r| r.value().team_id == team_id)
			.map(|r| (r.key().clone(), r.value().clone()))
			.collect();
		owned.sort_by(|a, b| a.1.created_at.cmp(&b.1.created_at).then_with(|| a.0.cmp(&b.0)));
		owned
	}

	/// Drops every session bound to `browser_id`. Returns how many went.
	pub fn forget_browser(&self, browser_id: &str) -> usize {
		let before = self.sessions.len();
		self.sessions.retain(|_, record| record.browser_id != browser_id);
		before.saturating_sub(self.sessions.len())
	}

	/// Distinct browsers that at least one session is bound to.
	pub fn browser_ids(&self) -> Vec<String> {
		let mut ids: Vec<String> = self.sessions.iter().map(|r| r.value().browser_id.clone()).collect();
		ids.sort();
		ids.dedup();
		ids
	}

	pub fn len(&self) -> usize {
		self.sessions.len()
	}

	pub fn is_empty(&self) -> bool {
		self.sessions.is_empty()
	}

	pub fn statistics(&self) -> RegistryStatistics {
		let mut sessions_by_team = BTreeMap::new();
		for entry in self.sessions.iter() {
			*sessions_by_team.entry(entry.value().team_id.clone()).or_insert(0) += 1;
		}
		RegistryStatistics {
			active_sessions: self.sessions.len(),
			sessions_by_team,
		}
	}
}

fn now_ms() -> u64 {
	std::time::SystemTime::now()
		.duration_since(std::time::UNIX_EPOCH)
		.unwrap_or_default()
		.as_millis() as u64
}
