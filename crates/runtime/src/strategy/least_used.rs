use std::sync::Arc;

use super::{AllocationRequest, AllocationStrategy, has_headroom, is_eligible};
use crate::config::AllocationStrategyKind;
use crate::error::Result;
use crate::instance::BrowserInstance;

/// Mean page count above which a new instance is preferred over reuse.
pub const PAGE_COUNT_THRESHOLD: f64 = 3.0;

/// Picks the eligible instance with the fewest open pages. Ties go to the
/// earliest instance in pool order.
#[derive(Debug, Default)]
pub struct LeastUsed;

impl AllocationStrategy for LeastUsed {
	fn kind(&self) -> AllocationStrategyKind {
		AllocationStrategyKind::LeastUsed
	}

	fn select(&self, instances: &[Arc<dyn BrowserInstance>], request: &AllocationRequest) -> Result<Option<Arc<dyn BrowserInstance>>> {
		Ok(least_used(instances.iter().filter(|i| is_eligible(i.as_ref(), request))))
	}

	fn should_create_new(&self, instances: &[Arc<dyn BrowserInstance>], request: &AllocationRequest, max_size: usize) -> Result<bool> {
		if !has_headroom(instances, max_size) {
			return Ok(false);
		}
		if !instances.iter().any(|i| is_eligible(i.as_ref(), request)) {
			return Ok(true);
		}
		Ok(mean_page_count(instances) > PAGE_COUNT_THRESHOLD)
	}
}

/// `min_by_key` keeps the first of equal minima.
pub(crate) fn least_used<'a, I>(candidates: I) -> Option<Arc<dyn BrowserInstance>>
where
	I: Iterator<Item = &'a Arc<dyn BrowserInstance>>,
{
	candidates.min_by_key(|i| i.page_count()).cloned()
}

fn mean_page_count(instances: &[Arc<dyn BrowserInstance>]) -> f64 {
	if instances.is_empty() {
		return 0.0;
	}
	let total: usize = instances.iter().map(|i| i.page_count()).sum();
	total as f64 / instances.len() as f64
}
