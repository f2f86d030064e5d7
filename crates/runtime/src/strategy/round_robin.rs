use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::{AllocationRequest, AllocationStrategy, has_headroom, is_eligible};
use crate::config::AllocationStrategyKind;
use crate::error::Result;
use crate::instance::BrowserInstance;

/// Cycles through eligible instances so that N candidates are each visited
/// once within N consecutive allocations.
#[derive(Debug, Default)]
pub struct RoundRobin {
	next: AtomicUsize,
}

impl AllocationStrategy for RoundRobin {
	fn kind(&self) -> AllocationStrategyKind {
		AllocationStrategyKind::RoundRobin
	}

	fn select(&self, instances: &[Arc<dyn BrowserInstance>], request: &AllocationRequest) -> Result<Option<Arc<dyn BrowserInstance>>> {
		let candidates: Vec<_> = instances.iter().filter(|i| is_eligible(i.as_ref(), request)).collect();
		if candidates.is_empty() {
			return Ok(None);
		}
		let index = self.next.fetch_add(1, Ordering::Relaxed) % candidates.len();
		Ok(Some(Arc::clone(candidates[index])))
	}

	fn should_create_new(&self, instances: &[Arc<dyn BrowserInstance>], request: &AllocationRequest, max_size: usize) -> Result<bool> {
		let any_candidate = instances.iter().any(|i| is_eligible(i.as_ref(), request));
		Ok(!any_candidate && has_headroom(instances, max_size))
	}
}

#[cfg(test)]
mod tests {
	use std::collections::HashSet;

	use super::*;
	use crate::instance::{BrowserKind, HealthStatus};
	use crate::testing::mock_instances;

	#[test]
	fn visits_every_candidate_within_n_allocations() {
		let instances = mock_instances(&[0, 0, 0, 0]);
		let strategy = RoundRobin::default();
		let request = AllocationRequest::default();

		let seen: HashSet<String> = (0..instances.len())
			.map(|_| strategy.select(&instances, &request).unwrap().unwrap().id().to_string())
			.collect();
		assert_eq!(seen.len(), instances.len());
	}

	#[test]
	fn skips_unhealthy_and_mismatched_kinds() {
		let instances = mock_instances(&[0, 0, 0]);
		instances[0].set_health_status(HealthStatus::Unhealthy);
		let strategy = RoundRobin::default();

		for _ in 0..6 {
			let picked = strategy.select(&instances, &AllocationRequest::default()).unwrap().unwrap();
			assert_ne!(picked.id(), instances[0].id());
		}

		let request = AllocationRequest::default().with_browser(BrowserKind::Firefox);
		assert!(strategy.select(&instances, &request).unwrap().is_none());
	}

	#[test]
	fn creates_only_without_candidates_and_with_headroom() {
		let strategy = RoundRobin::default();
		let request = AllocationRequest::default();
		assert!(strategy.should_create_new(&[], &request, 1).unwrap());
		assert!(!strategy.should_create_new(&[], &request, 0).unwrap());

		let instances = mock_instances(&[0]);
		assert!(!strategy.should_create_new(&instances, &request, 5).unwrap());

		instances[0].set_health_status(HealthStatus::Unhealthy);
		assert!(strategy.should_create_new(&instances, &request, 5).unwrap());
		assert!(!strategy.should_create_new(&instances, &request, 1).unwrap());
	}
}
