//! The browser instance seam between the pool and an automation backend.
//!
//! The pool only ever talks to [`BrowserInstance`] and [`BrowserFactory`].
//! Implementations keep their bookkeeping in an [`InstanceState`] and get
//! the activity, health and page-count accessors for free.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;

use crate::error::InstanceError;

/// Browser engine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrowserKind {
	/// Chromium-based browser (Chrome, Edge, Brave)
	#[default]
	Chromium,
	/// Mozilla Firefox
	Firefox,
	/// WebKit (Safari)
	Webkit,
}

impl fmt::Display for BrowserKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			BrowserKind::Chromium => write!(f, "chromium"),
			BrowserKind::Firefox => write!(f, "firefox"),
			BrowserKind::Webkit => write!(f, "webkit"),
		}
	}
}

impl FromStr for BrowserKind {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_ascii_lowercase().as_str() {
			"chromium" | "chrome" => Ok(BrowserKind::Chromium),
			"firefox" => Ok(BrowserKind::Firefox),
			"webkit" => Ok(BrowserKind::Webkit),
			other => Err(format!("unknown browser kind '{other}'")),
		}
	}
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
	#[default]
	Healthy,
	Degraded,
	Unhealthy,
}

impl fmt::Display for HealthStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			HealthStatus::Healthy => write!(f, "healthy"),
			HealthStatus::Degraded => write!(f, "degraded"),
			HealthStatus::Unhealthy => write!(f, "unhealthy"),
		}
	}
}

/// Interior-mutable bookkeeping shared by instance implementations.
///
/// Activity is measured on the tokio clock so paused-time tests can drive
/// idle eviction deterministically.
#[derive(Debug)]
pub struct InstanceState {
	created_at: SystemTime,
	started: Instant,
	last_activity: Mutex<Instant>,
	health: Mutex<HealthStatus>,
	page_count: AtomicUsize,
	active: AtomicBool,
}

impl Default for InstanceState {
	fn default() -> Self {
		Self::new()
	}
}

impl InstanceState {
	pub fn new() -> Self {
		let now = Instant::now();
		Self {
			created_at: SystemTime::now(),
			started: now,
			last_activity: Mutex::new(now),
			health: Mutex::new(HealthStatus::Healthy),
			page_count: AtomicUsize::new(0),
			active: AtomicBool::new(true),
		}
	}

	pub fn created_at(&self) -> SystemTime {
		self.created_at
	}

	pub fn age(&self) -> Duration {
		self.started.elapsed()
	}

	pub fn touch(&self) {
		*self.last_activity.lock() = Instant::now();
	}

	pub fn idle_for(&self) -> Duration {
		self.last_activity.lock().elapsed()
	}

	pub fn health(&self) -> HealthStatus {
		*self.health.lock()
	}

	pub fn set_health(&self, status: HealthStatus) {
		*self.health.lock() = status;
	}

	pub fn page_count(&self) -> usize {
		self.page_count.load(Ordering::Relaxed)
	}

	pub fn set_page_count(&self, count: usize) {
		self.page_count.store(count, Ordering::Relaxed);
	}

	pub fn is_active(&self) -> bool {
		self.active.load(Ordering::Acquire)
	}

	/// Marks the instance inactive. Returns `true` only for the call that
	/// performed the transition.
	pub fn deactivate(&self) -> bool {
		self.active.swap(false, Ordering::AcqRel)
	}
}

/// A pooled browser.
#[async_trait]
pub trait BrowserInstance: Send + Sync {
	fn id(&self) -> &str;

	/// Team the instance was created for, if any.
	fn team_id(&self) -> Option<&str>;

	fn kind(&self) -> BrowserKind;

	fn state(&self) -> &InstanceState;

	/// Probes the underlying browser. `false` means unreachable or broken.
	async fn check_health(&self) -> bool;

	/// Closes the underlying browser. With `force`, an already-closed
	/// instance is not an error.
	async fn close(&self, force: bool) -> Result<(), InstanceError>;

	/// Runs one automation action (`navigate`, `click`, ...).
	async fn invoke(&self, action: &str, args: Value) -> Result<Value, InstanceError>;

	fn is_active(&self) -> bool {
		self.state().is_active()
	}

	fn health_status(&self) -> HealthStatus {
		self.state().health()
	}

	fn set_health_status(&self, status: HealthStatus) {
		self.state().set_health(status);
	}

	fn page_count(&self) -> usize {
		self.state().page_count()
	}

	fn created_at(&self) -> SystemTime {
		self.state().created_at()
	}

	fn touch(&self) {
		self.state().touch();
	}

	fn is_idle(&self, max_idle: Duration) -> bool {
		self.state().idle_for() >= max_idle
	}
}

impl fmt::Debug for dyn BrowserInstance {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("BrowserInstance")
			.field("id", &self.id())
			.field("team_id", &self.team_id())
			.field("kind", &self.kind())
			.field("health", &self.health_status())
			.finish()
	}
}

/// Creates browser instances on demand.
#[async_trait]
pub trait BrowserFactory: Send + Sync {
	async fn create(&self, team_id: Option<&str>, kind: Option<BrowserKind>) -> Result<Arc<dyn BrowserInstance>, InstanceError>;
}
