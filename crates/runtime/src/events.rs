//! Pool lifecycle events, published on a broadcast channel.

use serde::Serialize;

use crate::instance::BrowserKind;

/// Buffered events per subscriber before the slowest one starts lagging.
pub const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovalReason {
	Explicit,
	Idle,
	Unhealthy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PoolEvent {
	Created {
		instance_id: String,
		team_id: Option<String>,
		kind: BrowserKind,
	},
	Allocated {
		instance_id: String,
		handle: String,
		team_id: Option<String>,
	},
	Released {
		instance_id: String,
	},
	MarkedUnhealthy {
		instance_id: String,
	},
	Removed {
		instance_id: String,
		reason: RemovalReason,
	},
	WarmupCompleted {
		created: usize,
		failed: usize,
	},
	Shutdown {
		closed: usize,
		failed: usize,
	},
}
