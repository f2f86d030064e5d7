//! Browser pool manager.
//!
//! The pool owns an insertion-ordered list of instances behind one async
//! mutex. Every membership change (insert on create, delete on remove or
//! eviction) happens under that lock; factory calls and instance closes
//! run outside it. In-flight creations hold a reservation that counts
//! toward `max_size`, so concurrent allocations can never overshoot.
//!
//! Two maintenance tasks run once [`PoolManager::initialize`] is called:
//! health probing every `health_check_interval` and idle cleanup every
//! `idle_cleanup_interval`. Both stop on [`PoolManager::shutdown`].

use std::cmp::Reverse;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use futures_util::future::join_all;
use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard, broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::{AllocationStrategyKind, PoolConfig};
use crate::error::{PoolError, Result};
use crate::events::{EVENT_CAPACITY, PoolEvent, RemovalReason};
use crate::instance::{BrowserFactory, BrowserInstance, BrowserKind, HealthStatus};
use crate::metrics::{MetricsRecorder, PoolMetrics};
use crate::strategy::{self, AllocationRequest, AllocationStrategy};

#[cfg(test)]
mod tests;

/// Result of a successful [`PoolManager::allocate`].
#[derive(Debug, Clone)]
pub struct Allocation {
	pub instance: Arc<dyn BrowserInstance>,
	/// Opaque handle for this allocation, distinct from the instance id.
	pub handle: String,
	pub allocation_time: Duration,
	/// Whether a new instance was created to satisfy the request.
	pub created: bool,
}

/// Per-instance view in a [`PoolStatus`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceSnapshot {
	pub id: String,
	pub team_id: Option<String>,
	pub kind: BrowserKind,
	pub health: HealthStatus,
	pub active: bool,
	pub page_count: usize,
	pub idle_ms: u64,
	pub age_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStatus {
	pub running: bool,
	pub strategy: AllocationStrategyKind,
	pub config: PoolConfig,
	pub pending_creations: usize,
	pub instances: Vec<InstanceSnapshot>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShutdownSummary {
	pub closed: usize,
	pub failed: Vec<String>,
}

#[derive(Debug, Clone, Copy)]
enum Maintenance {
	Health,
	IdleCleanup,
}

/// Held while one team's allocation runs. On drop the team's lock entry is
/// discarded unless another allocation still holds or awaits it.
struct TeamSlot<'a> {
	locks: &'a DashMap<String, Arc<Mutex<()>>>,
	team: String,
	guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for TeamSlot<'_> {
	fn drop(&mut self) {
		self.guard.take();
		self.locks.remove_if(&self.team, |_, lock| Arc::strong_count(lock) == 1);
	}
}

/// Capacity held for one in-flight creation; released on drop.
struct Reservation<'a>(&'a AtomicUsize);

impl<'a> Reservation<'a> {
	fn take(pending: &'a AtomicUsize) -> Self {
		pending.fetch_add(1, Ordering::AcqRel);
		Self(pending)
	}
}

impl Drop for Reservation<'_> {
	fn drop(&mut self) {
		self.0.fetch_sub(1, Ordering::AcqRel);
	}
}

pub struct PoolManager {
	config: PoolConfig,
	factory: Arc<dyn BrowserFactory>,
	strategy: Arc<dyn AllocationStrategy>,
	instances: Mutex<Vec<Arc<dyn BrowserInstance>>>,
	/// Only mutated while `instances` is locked.
	pending: AtomicUsize,
	team_locks: DashMap<String, Arc<Mutex<()>>>,
	metrics: MetricsRecorder,
	events: broadcast::Sender<PoolEvent>,
	running: AtomicBool,
	closed: AtomicBool,
	shutdown_tx: watch::Sender<bool>,
	tasks: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl PoolManager {
	/// Builds a pool using the strategy named in `config`.
	pub fn new(config: PoolConfig, factory: Arc<dyn BrowserFactory>) -> Result<Arc<Self>> {
		let strategy = strategy::for_kind(config.allocation_strategy);
		Self::with_strategy(config, factory, strategy)
	}

	pub fn with_strategy(config: PoolConfig, factory: Arc<dyn BrowserFactory>, strategy: Arc<dyn AllocationStrategy>) -> Result<Arc<Self>> {
		config.validate()?;
		let (events, _) = broadcast::channel(EVENT_CAPACITY);
		let (shutdown_tx, _) = watch::channel(false);
		Ok(Arc::new(Self {
			config,
			factory,
			strategy,
			instances: Mutex::new(Vec::new()),
			pending: AtomicUsize::new(0),
			team_locks: DashMap::new(),
			metrics: MetricsRecorder::default(),
			events,
			running: AtomicBool::new(false),
			closed: AtomicBool::new(false),
			shutdown_tx,
			tasks: parking_lot::Mutex::new(Vec::new()),
		}))
	}

	pub fn config(&self) -> &PoolConfig {
		&self.config
	}

	pub fn strategy_kind(&self) -> AllocationStrategyKind {
		self.strategy.kind()
	}

	pub fn is_running(&self) -> bool {
		self.running.load(Ordering::Acquire)
	}

	pub fn subscribe(&self) -> broadcast::Receiver<PoolEvent> {
		self.events.subscribe()
	}

	/// Starts maintenance tasks and runs warmup. Calling it again is a no-op.
	pub async fn initialize(self: &Arc<Self>) -> Result<()> {
		if self.closed.load(Ordering::Acquire) {
			return Err(PoolError::Shutdown);
		}
		if self.running.swap(true, Ordering::AcqRel) {
			return Ok(());
		}

		{
			let mut tasks = self.tasks.lock();
			tasks.push(self.spawn_maintenance(Maintenance::Health, self.config.health_check_interval));
			tasks.push(self.spawn_maintenance(Maintenance::IdleCleanup, self.config.idle_cleanup_interval));
		}
		info!(
			target = "pw.mcp.pool",
			strategy = %self.strategy.kind(),
			max_size = self.config.max_size,
			min_size = self.config.min_size,
			"pool started"
		);

		if self.config.warmup_size > 0 {
			self.warmup(self.config.warmup_size).await;
		}
		Ok(())
	}

	fn spawn_maintenance(self: &Arc<Self>, job: Maintenance, period: Duration) -> JoinHandle<()> {
		let pool: Weak<Self> = Arc::downgrade(self);
		let mut shutdown_rx = self.shutdown_tx.subscribe();
		tokio::spawn(async move {
			let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
			ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
			loop {
				tokio::select! {
					_ = ticker.tick() => {}
					changed = shutdown_rx.changed() => {
						if changed.is_err() || *shutdown_rx.borrow() {
							break;
						}
						continue;
					}
				}
				let Some(pool) = pool.upgrade() else {
					break;
				};
				match job {
					Maintenance::Health => pool.run_health_checks().await,
					Maintenance::IdleCleanup => {
						pool.evict_idle().await;
					}
				}
			}
			debug!(target = "pw.mcp.pool", ?job, "maintenance task stopped");
		})
	}

	/// Pre-creates up to `count` team-less instances concurrently. Individual
	/// failures are logged and skipped.
	async fn warmup(&self, count: usize) {
		let reservations: Vec<Reservation<'_>> = {
			let instances = self.instances.lock().await;
			let free = self
				.config
				.max_size
				.saturating_sub(instances.len() + self.pending.load(Ordering::Acquire));
			(0..count.min(free)).map(|_| Reservation::take(&self.pending)).collect()
		};
		let attempted = reservations.len();

		let results = join_all((0..attempted).map(|_| self.factory.create(None, None))).await;

		let mut instances = self.instances.lock().await;
		let mut created = 0;
		let mut failed = 0;
		for result in results {
			match result {
				Ok(instance) => {
					self.emit(PoolEvent::Created {
						instance_id: instance.id().to_string(),
						team_id: None,
						kind: instance.kind(),
					});
					instances.push(instance);
					created += 1;
				}
				Err(err) => {
					warn!(target = "pw.mcp.pool", error = %err, "warmup creation failed");
					failed += 1;
				}
			}
		}
		drop(reservations);
		drop(instances);

		info!(target = "pw.mcp.pool", created, failed, "warmup complete");
		self.emit(PoolEvent::WarmupCompleted { created, failed });
	}

	/// Hands out an instance for `request`, creating one if the strategy
	/// allows it.
	pub async fn allocate(&self, request: AllocationRequest) -> Result<Allocation> {
		let started = Instant::now();
		self.metrics.record_request();

		let result = self.allocate_inner(&request, started).await;
		match &result {
			Ok(allocation) => {
				self.metrics.record_wait(allocation.allocation_time);
				debug!(
					target = "pw.mcp.pool",
					instance = allocation.instance.id(),
					handle = %allocation.handle,
					created = allocation.created,
					team = ?request.team_id,
					elapsed_ms = allocation.allocation_time.as_millis() as u64,
					"allocated"
				);
			}
			Err(err) => {
				self.metrics.record_failure();
				warn!(target = "pw.mcp.pool", team = ?request.team_id, error = %err, "allocation failed");
			}
		}
		result
	}

	async fn allocate_inner(&self, request: &AllocationRequest, started: Instant) -> Result<Allocation> {
		if self.closed.load(Ordering::Acquire) {
			return Err(PoolError::Shutdown);
		}

		// First-use creation for a team is check-then-act; serialise it per team.
		let _team_slot = match (self.strategy.kind(), request.team_id.as_deref()) {
			(AllocationStrategyKind::TeamIsolated, Some(team)) => Some(self.lock_team(team).await),
			_ => None,
		};

		let reservation = {
			let instances = self.instances.lock().await;
			if let Some(instance) = self.strategy.select(&instances, request)? {
				instance.touch();
				return Ok(self.allocated(instance, request, started, false));
			}

			let pending = self.pending.load(Ordering::Acquire);
			let capacity = self.config.max_size.saturating_sub(pending);
			if !self.strategy.should_create_new(&instances, request, capacity)? {
				return Err(PoolError::Exhausted {
					size: instances.len() + pending,
					max_size: self.config.max_size,
				});
			}
			Reservation::take(&self.pending)
		};

		let instance = self
			.factory
			.create(request.team_id.as_deref(), request.browser_type)
			.await
			.map_err(PoolError::Factory)?;

		let mut instances = self.instances.lock().await;
		if self.closed.load(Ordering::Acquire) {
			drop(reservation);
			drop(instances);
			if let Err(err) = instance.close(true).await {
				warn!(target = "pw.mcp.pool", instance = instance.id(), error = %err, "close after shutdown failed");
			}
			return Err(PoolError::Shutdown);
		}
		instances.push(Arc::clone(&instance));
		drop(reservation);
		drop(instances);

		info!(
			target = "pw.mcp.pool",
			instance = instance.id(),
			team = ?instance.team_id(),
			kind = %instance.kind(),
			"instance created"
		);
		self.emit(PoolEvent::Created {
			instance_id: instance.id().to_string(),
			team_id: instance.team_id().map(str::to_string),
			kind: instance.kind(),
		});
		Ok(self.allocated(instance, request, started, true))
	}

	fn allocated(&self, instance: Arc<dyn BrowserInstance>, request: &AllocationRequest, started: Instant, created: bool) -> Allocation {
		let handle = uuid::Uuid::new_v4().to_string();
		self.emit(PoolEvent::Allocated {
			instance_id: instance.id().to_string(),
			handle: handle.clone(),
			team_id: request.team_id.clone(),
		});
		Allocation {
			instance,
			handle,
			allocation_time: started.elapsed(),
			created,
		}
	}

	async fn lock_team(&self, team: &str) -> TeamSlot<'_> {
		let lock = self.team_locks.entry(team.to_string()).or_default().clone();
		TeamSlot {
			locks: &self.team_locks,
			team: team.to_string(),
			guard: Some(lock.lock_owned().await),
		}
	}

	/// Resets the idle clock of an instance. Does not close it.
	pub async fn release(&self, id: &str) -> Result<()> {
		let instance = self.get(id).await.ok_or_else(|| PoolError::NotFound(id.to_string()))?;
		instance.touch();
		self.emit(PoolEvent::Released {
			instance_id: id.to_string(),
		});
		Ok(())
	}

	/// Removes an instance from the pool and closes it.
	///
	/// With `force`, a missing or already-closed instance is not an error and
	/// close failures are logged instead of returned.
	pub async fn remove(&self, id: &str, force: bool) -> Result<()> {
		let taken = {
			let mut instances = self.instances.lock().await;
			instances
				.iter()
				.position(|i| i.id() == id)
				.map(|index| instances.remove(index))
		};
		match taken {
			Some(instance) => self.close_removed(instance, force, RemovalReason::Explicit).await,
			None if force => Ok(()),
			None => Err(PoolError::NotFound(id.to_string())),
		}
	}

	async fn close_removed(&self, instance: Arc<dyn BrowserInstance>, force: bool, reason: RemovalReason) -> Result<()> {
		let id = instance.id().to_string();
		self.emit(PoolEvent::Removed {
			instance_id: id.clone(),
			reason,
		});
		match instance.close(force).await {
			Ok(()) => {
				info!(target = "pw.mcp.pool", instance = %id, ?reason, "instance removed");
				Ok(())
			}
			Err(err) if force => {
				warn!(target = "pw.mcp.pool", instance = %id, ?reason, error = %err, "close failed during forced removal");
				Ok(())
			}
			Err(source) => Err(PoolError::Close { id, source }),
		}
	}

	pub async fn get(&self, id: &str) -> Option<Arc<dyn BrowserInstance>> {
		self.instances.lock().await.iter().find(|i| i.id() == id).cloned()
	}

	pub async fn len(&self) -> usize {
		self.instances.lock().await.len()
	}

	pub async fn is_empty(&self) -> bool {
		self.instances.lock().await.is_empty()
	}

	/// Probes every active instance concurrently. Failing probes mark the
	/// instance unhealthy; it stays tracked until idle cleanup evicts it.
	pub async fn run_health_checks(&self) {
		let snapshot: Vec<_> = self.instances.lock().await.iter().filter(|i| i.is_active()).cloned().collect();
		if snapshot.is_empty() {
			return;
		}

		let probes = join_all(snapshot.iter().map(|instance| instance.check_health())).await;
		let mut unhealthy = 0;
		for (instance, healthy) in snapshot.iter().zip(probes) {
			let previous = instance.health_status();
			if healthy {
				if previous == HealthStatus::Degraded {
					instance.set_health_status(HealthStatus::Healthy);
				}
				continue;
			}
			unhealthy += 1;
			if previous != HealthStatus::Unhealthy {
				instance.set_health_status(HealthStatus::Unhealthy);
				warn!(target = "pw.mcp.pool", instance = instance.id(), "health probe failed");
				self.emit(PoolEvent::MarkedUnhealthy {
					instance_id: instance.id().to_string(),
				});
			}
		}
		debug!(target = "pw.mcp.pool", checked = snapshot.len(), unhealthy, "health checks complete");
	}

	/// Evicts unhealthy and inactive instances unconditionally, then idle
	/// ones (longest idle first) while the pool stays above `min_size`.
	/// Returns the evicted instance ids.
	pub async fn evict_idle(&self) -> Vec<String> {
		let victims: Vec<(Arc<dyn BrowserInstance>, RemovalReason)> = {
			let mut instances = self.instances.lock().await;
			let mut victims = Vec::new();

			instances.retain(|instance| {
				let broken = !instance.is_active() || instance.health_status() == HealthStatus::Unhealthy;
				if broken {
					victims.push((Arc::clone(instance), RemovalReason::Unhealthy));
				}
				!broken
			});

			let mut idle: Vec<_> = instances
				.iter()
				.filter(|i| i.is_idle(self.config.max_idle_time))
				.map(|i| (i.id().to_string(), i.state().idle_for()))
				.collect();
			idle.sort_by_key(|(_, idle_for)| Reverse(*idle_for));

			for (id, _) in idle {
				if instances.len() <= self.config.min_size {
					break;
				}
				if let Some(index) = instances.iter().position(|i| i.id() == id) {
					victims.push((instances.remove(index), RemovalReason::Idle));
				}
			}
			victims
		};

		if victims.is_empty() {
			return Vec::new();
		}

		let ids: Vec<String> = victims.iter().map(|(i, _)| i.id().to_string()).collect();
		join_all(
			victims
				.into_iter()
				.map(|(instance, reason)| self.close_removed(instance, true, reason)),
		)
		.await;
		info!(target = "pw.mcp.pool", evicted = ids.len(), "idle cleanup evicted instances");
		ids
	}

	pub async fn metrics(&self) -> PoolMetrics {
		let instances = self.instances.lock().await;
		self.metrics.snapshot(&instances, self.config.max_idle_time)
	}

	pub async fn status(&self) -> PoolStatus {
		let instances = self.instances.lock().await;
		PoolStatus {
			running: self.is_running(),
			strategy: self.strategy.kind(),
			config: self.config.clone(),
			pending_creations: self.pending.load(Ordering::Acquire),
			instances: instances
				.iter()
				.map(|i| InstanceSnapshot {
					id: i.id().to_string(),
					team_id: i.team_id().map(str::to_string),
					kind: i.kind(),
					health: i.health_status(),
					active: i.is_active(),
					page_count: i.page_count(),
					idle_ms: i.state().idle_for().as_millis() as u64,
					age_ms: i.state().age().as_millis() as u64,
				})
				.collect(),
		}
	}

	/// Stops maintenance, then closes every instance in parallel. One failed
	/// close never prevents the others. Idempotent.
	pub async fn shutdown(&self) -> ShutdownSummary {
		if self.closed.swap(true, Ordering::AcqRel) {
			return ShutdownSummary::default();
		}
		self.running.store(false, Ordering::Release);
		self.shutdown_tx.send_replace(true);

		let tasks: Vec<_> = std::mem::take(&mut *self.tasks.lock());
		for task in tasks {
			if let Err(err) = task.await {
				warn!(target = "pw.mcp.pool", error = %err, "maintenance task ended abnormally");
			}
		}

		let instances = std::mem::take(&mut *self.instances.lock().await);
		let results = join_all(instances.iter().map(|instance| async move {
			(instance.id().to_string(), instance.close(true).await)
		}))
		.await;

		let mut summary = ShutdownSummary::default();
		for (id, result) in results {
			match result {
				Ok(()) => summary.closed += 1,
				Err(err) => {
					warn!(target = "pw.mcp.pool", instance = %id, error = %err, "close failed during shutdown");
					summary.failed.push(id);
				}
			}
		}

		info!(
			target = "pw.mcp.pool",
			closed = summary.closed,
			failed = summary.failed.len(),
			"pool shut down"
		);
		self.emit(PoolEvent::Shutdown {
			closed: summary.closed,
			failed: summary.failed.len(),
		});
		summary
	}

	fn emit(&self, event: PoolEvent) {
		// No subscribers is fine.
		let _ = self.events.send(event);
	}
}
