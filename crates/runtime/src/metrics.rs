//! Pool metrics.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;

use crate::instance::{BrowserInstance, HealthStatus};

/// Smoothing factor of the wait-time moving average.
pub const WAIT_TIME_ALPHA: f64 = 0.1;

/// Read-only snapshot of pool counters and instance census.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolMetrics {
	pub total_instances: usize,
	pub active_instances: usize,
	pub idle_instances: usize,
	pub healthy_instances: usize,
	pub degraded_instances: usize,
	pub unhealthy_instances: usize,
	pub total_requests: u64,
	pub failed_requests: u64,
	pub avg_wait_time_ms: f64,
}

#[derive(Debug, Default)]
pub(crate) struct MetricsRecorder {
	total_requests: AtomicU64,
	failed_requests: AtomicU64,
	avg_wait_ms: Mutex<f64>,
}

impl MetricsRecorder {
	pub(crate) fn record_request(&self) {
		self.total_requests.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_failure(&self) {
		self.failed_requests.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_wait(&self, wait: Duration) {
		let sample = wait.as_secs_f64() * 1000.0;
		let mut avg = self.avg_wait_ms.lock();
		*avg = *avg * (1.0 - WAIT_TIME_ALPHA) + sample * WAIT_TIME_ALPHA;
	}

	/// Combines counters with a census of `instances`. An instance counts
	/// as idle once it has been untouched for `max_idle`.
	pub(crate) fn snapshot(&self, instances: &[Arc<dyn BrowserInstance>], max_idle: Duration) -> PoolMetrics {
		let mut metrics = PoolMetrics {
			total_instances: instances.len(),
			total_requests: self.total_requests.load(Ordering::Relaxed),
			failed_requests: self.failed_requests.load(Ordering::Relaxed),
			avg_wait_time_ms: *self.avg_wait_ms.lock(),
			..PoolMetrics::default()
		};
		for instance in instances {
			if instance.is_idle(max_idle) {
				metrics.idle_instances += 1;
			} else if instance.is_active() {
				metrics.active_instances += 1;
			}
			match instance.health_status() {
				HealthStatus::Healthy => metrics.healthy_instances += 1,
				HealthStatus::Degraded => metrics.degraded_instances += 1,
				HealthStatus::Unhealthy => metrics.unhealthy_instances += 1,
			}
		}
		metrics
	}
}
