//! Pluggable allocation policies.
//!
//! Strategies are pure with respect to the pool: they look at a snapshot of
//! tracked instances and either pick one or say whether a new one should be
//! created. The pool holds its instance lock while consulting them.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::AllocationStrategyKind;
use crate::error::Result;
use crate::instance::{BrowserInstance, BrowserKind, HealthStatus};

mod least_used;
mod round_robin;
mod team_isolated;

pub use least_used::{LeastUsed, PAGE_COUNT_THRESHOLD};
pub use round_robin::RoundRobin;
pub use team_isolated::TeamIsolated;

/// What a caller asks the pool for.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationRequest {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub team_id: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub browser_type: Option<BrowserKind>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub priority: Option<i32>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub metadata: Option<Value>,
}

impl AllocationRequest {
	pub fn for_team(team_id: impl Into<String>) -> Self {
		Self {
			team_id: Some(team_id.into()),
			..Self::default()
		}
	}

	pub fn with_browser(mut self, kind: BrowserKind) -> Self {
		self.browser_type = Some(kind);
		self
	}
}

pub trait AllocationStrategy: Send + Sync {
	fn kind(&self) -> AllocationStrategyKind;

	/// Picks an existing instance for `request`, if any is eligible.
	fn select(&self, instances: &[Arc<dyn BrowserInstance>], request: &AllocationRequest) -> Result<Option<Arc<dyn BrowserInstance>>>;

	/// Whether the pool should create a new instance for `request`.
	///
	/// `max_size` is the capacity left for tracked instances, i.e. the
	/// configured maximum minus creations already in flight.
	fn should_create_new(&self, instances: &[Arc<dyn BrowserInstance>], request: &AllocationRequest, max_size: usize) -> Result<bool>;
}

/// Builds the strategy for `kind`.
pub fn for_kind(kind: AllocationStrategyKind) -> Arc<dyn AllocationStrategy> {
	match kind {
		AllocationStrategyKind::RoundRobin => Arc::new(RoundRobin::default()),
		AllocationStrategyKind::LeastUsed => Arc::new(LeastUsed),
		AllocationStrategyKind::TeamIsolated => Arc::new(TeamIsolated),
	}
}

/// Active, healthy, and of the requested kind when one is given.
pub(crate) fn is_eligible(instance: &dyn BrowserInstance, request: &AllocationRequest) -> bool {
	instance.is_active()
		&& instance.health_status() == HealthStatus::Healthy
		&& request.browser_type.is_none_or(|kind| instance.kind() == kind)
}

pub(crate) fn has_headroom(instances: &[Arc<dyn BrowserInstance>], max_size: usize) -> bool {
	instances.len() < max_size
}
