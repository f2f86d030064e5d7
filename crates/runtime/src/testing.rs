//! Scriptable in-memory instances and factory.
//!
//! Compiled for this crate's tests and for downstream crates through the
//! `testing` feature.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};

use crate::error::InstanceError;
use crate::instance::{BrowserFactory, BrowserInstance, BrowserKind, InstanceState};

/// In-memory browser with scriptable probe, close, and action behavior.
pub struct MockInstance {
	id: String,
	team_id: Option<String>,
	kind: BrowserKind,
	state: InstanceState,
	probe_healthy: AtomicBool,
	fail_close: AtomicBool,
	closed: AtomicBool,
	close_calls: AtomicUsize,
	failing_actions: Mutex<HashSet<String>>,
	panicking_actions: Mutex<HashSet<String>>,
	invocations: Mutex<Vec<(String, Value)>>,
}

impl MockInstance {
	pub fn new(id: impl Into<String>, team_id: Option<&str>, kind: BrowserKind) -> Self {
		Self {
			id: id.into(),
			team_id: team_id.map(str::to_string),
			kind,
			state: InstanceState::new(),
			probe_healthy: AtomicBool::new(true),
			fail_close: AtomicBool::new(false),
			closed: AtomicBool::new(false),
			close_calls: AtomicUsize::new(0),
			failing_actions: Mutex::new(HashSet::new()),
			panicking_actions: Mutex::new(HashSet::new()),
			invocations: Mutex::new(Vec::new()),
		}
	}

	pub fn with_pages(self, pages: usize) -> Self {
		self.state.set_page_count(pages);
		self
	}

	/// Result of the next health probes.
	pub fn set_probe_healthy(&self, healthy: bool) {
		self.probe_healthy.store(healthy, Ordering::Relaxed);
	}

	pub fn set_fail_close(&self, fail: bool) {
		self.fail_close.store(fail, Ordering::Relaxed);
	}

	pub fn fail_action(&self, action: &str) {
		self.failing_actions.lock().insert(action.to_string());
	}

	pub fn panic_on(&self, action: &str) {
		self.panicking_actions.lock().insert(action.to_string());
	}

	pub fn set_pages(&self, pages: usize) {
		self.state.set_page_count(pages);
	}

	pub fn is_closed(&self) -> bool {
		self.closed.load(Ordering::Acquire)
	}

	pub fn close_calls(&self) -> usize {
		self.close_calls.load(Ordering::Relaxed)
	}

	pub fn invocations(&self) -> Vec<(String, Value)> {
		self.invocations.lock().clone()
	}
}

#[async_trait]
impl BrowserInstance for MockInstance {
	fn id(&self) -> &str {
		&self.id
	}

	fn team_id(&self) -> Option<&str> {
		self.team_id.as_deref()
	}

	fn kind(&self) -> BrowserKind {
		self.kind
	}

	fn state(&self) -> &InstanceState {
		&self.state
	}

	async fn check_health(&self) -> bool {
		!self.is_closed() && self.probe_healthy.load(Ordering::Relaxed)
	}

	async fn close(&self, force: bool) -> Result<(), InstanceError> {
		self.close_calls.fetch_add(1, Ordering::Relaxed);
		if self.fail_close.load(Ordering::Relaxed) {
			return Err(InstanceError::Cdp(format!("scripted close failure for {}", self.id)));
		}
		if self.closed.swap(true, Ordering::AcqRel) && !force {
			return Err(InstanceError::Closed(self.id.clone()));
		}
		self.state.deactivate();
		Ok(())
	}

	async fn invoke(&self, action: &str, args: Value) -> Result<Value, InstanceError> {
		if self.is_closed() {
			return Err(InstanceError::Closed(self.id.clone()));
		}
		if self.panicking_actions.lock().contains(action) {
			panic!("scripted panic in {action}");
		}
		self.invocations.lock().push((action.to_string(), args.clone()));
		if self.failing_actions.lock().contains(action) {
			return Err(InstanceError::Cdp(format!("scripted failure in {action}")));
		}
		self.touch();
		Ok(json!({
			"instance": self.id,
			"action": action,
			"args": args,
		}))
	}
}

/// Factory handing out [`MockInstance`]s with ids `mock-0`, `mock-1`, ...
#[derive(Default)]
pub struct MockFactory {
	created: Mutex<Vec<Arc<MockInstance>>>,
	counter: AtomicUsize,
	failures_pending: AtomicUsize,
	delay: Mutex<Duration>,
}

impl MockFactory {
	pub fn new() -> Self {
		Self::default()
	}

	/// Makes the next `count` creations fail.
	pub fn fail_next(&self, count: usize) {
		self.failures_pending.store(count, Ordering::SeqCst);
	}

	/// Makes every creation take `delay` before completing.
	pub fn set_delay(&self, delay: Duration) {
		*self.delay.lock() = delay;
	}

	pub fn created(&self) -> Vec<Arc<MockInstance>> {
		self.created.lock().clone()
	}

	pub fn created_count(&self) -> usize {
		self.created.lock().len()
	}

	pub fn instance(&self, id: &str) -> Option<Arc<MockInstance>> {
		self.created.lock().iter().find(|i| i.id == id).cloned()
	}
}

#[async_trait]
impl BrowserFactory for MockFactory {
	async fn create(&self, team_id: Option<&str>, kind: Option<BrowserKind>) -> Result<Arc<dyn BrowserInstance>, InstanceError> {
		let delay = *self.delay.lock();
		if !delay.is_zero() {
			tokio::time::sleep(delay).await;
		}

		let scripted_failure = self
			.failures_pending
			.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
			.is_ok();
		if scripted_failure {
			return Err(InstanceError::LaunchFailed("scripted creation failure".into()));
		}

		let n = self.counter.fetch_add(1, Ordering::SeqCst);
		let instance = Arc::new(MockInstance::new(format!("mock-{n}"), team_id, kind.unwrap_or_default()));
		self.created.lock().push(Arc::clone(&instance));
		Ok(instance)
	}
}

/// Team-less Chromium mocks with the given page counts, ids `m0`, `m1`, ...
pub fn mock_instances(page_counts: &[usize]) -> Vec<Arc<dyn BrowserInstance>> {
	page_counts
		.iter()
		.enumerate()
		.map(|(i, pages)| Arc::new(MockInstance::new(format!("m{i}"), None, BrowserKind::Chromium).with_pages(*pages)) as Arc<dyn BrowserInstance>)
		.collect()
}
