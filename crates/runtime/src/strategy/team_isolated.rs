use std::sync::Arc;

use super::least_used::least_used;
use super::{AllocationRequest, AllocationStrategy, has_headroom, is_eligible};
use crate::config::AllocationStrategyKind;
use crate::error::{PoolError, Result};
use crate::instance::BrowserInstance;

/// Restricts every team to instances created for it.
///
/// A request without `teamId` is a configuration error.
#[derive(Debug, Default)]
pub struct TeamIsolated;

fn required_team(request: &AllocationRequest) -> Result<&str> {
	request
		.team_id
		.as_deref()
		.ok_or_else(|| PoolError::AllocationConfig("team-isolated allocation requires a teamId".into()))
}

fn owned_by(instance: &Arc<dyn BrowserInstance>, team: &str) -> bool {
	instance.team_id() == Some(team)
}

impl AllocationStrategy for TeamIsolated {
	fn kind(&self) -> AllocationStrategyKind {
		AllocationStrategyKind::TeamIsolated
	}

	fn select(&self, instances: &[Arc<dyn BrowserInstance>], request: &AllocationRequest) -> Result<Option<Arc<dyn BrowserInstance>>> {
		let team = required_team(request)?;
		Ok(least_used(
			instances.iter().filter(|i| owned_by(i, team) && is_eligible(i.as_ref(), request)),
		))
	}

	/// Only instances the team could actually be given count as owned, so a
	/// team whose sole instance went unhealthy gets a replacement.
	fn should_create_new(&self, instances: &[Arc<dyn BrowserInstance>], request: &AllocationRequest, max_size: usize) -> Result<bool> {
		let team = required_team(request)?;
		let owned = instances
			.iter()
			.filter(|i| owned_by(i, team) && is_eligible(i.as_ref(), request))
			.count();
		Ok(owned == 0 && has_headroom(instances, max_size))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::instance::BrowserKind;
	use crate::testing::MockInstance;

	fn team_instance(id: &str, team: &str, pages: usize) -> Arc<dyn BrowserInstance> {
		Arc::new(MockInstance::new(id, Some(team), BrowserKind::Chromium).with_pages(pages))
	}

	#[test]
	fn missing_team_is_a_configuration_error() {
		let err = TeamIsolated.select(&[], &AllocationRequest::default()).unwrap_err();
		assert!(matches!(err, PoolError::AllocationConfig(_)));

		let err = TeamIsolated.should_create_new(&[], &AllocationRequest::default(), 4).unwrap_err();
		assert!(matches!(err, PoolError::AllocationConfig(_)));
	}

	#[test]
	fn never_selects_another_teams_instance() {
		let instances = vec![team_instance("a1", "alpha", 0), team_instance("b1", "beta", 5)];
		let picked = TeamIsolated
			.select(&instances, &AllocationRequest::for_team("beta"))
			.unwrap()
			.unwrap();
		assert_eq!(picked.id(), "b1");
		assert!(TeamIsolated.select(&instances, &AllocationRequest::for_team("gamma")).unwrap().is_none());
	}

	#[test]
	fn least_used_within_team() {
		let instances = vec![
			team_instance("a1", "alpha", 4),
			team_instance("b1", "beta", 0),
			team_instance("a2", "alpha", 1),
		];
		let picked = TeamIsolated
			.select(&instances, &AllocationRequest::for_team("alpha"))
			.unwrap()
			.unwrap();
		assert_eq!(picked.id(), "a2");
	}

	#[test]
	fn first_use_creates_when_room() {
		let instances = vec![team_instance("a1", "alpha", 0)];
		assert!(TeamIsolated.should_create_new(&instances, &AllocationRequest::for_team("beta"), 2).unwrap());
		assert!(!TeamIsolated.should_create_new(&instances, &AllocationRequest::for_team("beta"), 1).unwrap());
		assert!(!TeamIsolated.should_create_new(&instances, &AllocationRequest::for_team("alpha"), 2).unwrap());
	}
}
