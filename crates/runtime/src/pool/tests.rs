use std::sync::Arc;
use std::time::Duration;

use super::*;
use crate::config::{AllocationStrategyKind, PoolConfig};
use crate::testing::MockFactory;

fn config(strategy: AllocationStrategyKind) -> PoolConfig {
	PoolConfig {
		max_size: 5,
		min_size: 0,
		allocation_strategy: strategy,
		..PoolConfig::default()
	}
}

fn pool_with(config: PoolConfig) -> (Arc<PoolManager>, Arc<MockFactory>) {
	let factory = Arc::new(MockFactory::new());
	let pool = PoolManager::new(config, factory.clone()).unwrap();
	(pool, factory)
}

#[tokio::test(start_paused = true)]
async fn concurrent_allocations_never_exceed_max_size() {
	let (pool, factory) = pool_with(PoolConfig {
		max_size: 1,
		..config(AllocationStrategyKind::RoundRobin)
	});
	factory.set_delay(Duration::from_millis(50));

	let (a, b) = tokio::join!(pool.allocate(AllocationRequest::default()), pool.allocate(AllocationRequest::default()));

	assert_eq!(factory.created_count(), 1);
	assert_eq!(pool.len().await, 1);
	let outcomes = [a, b];
	assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
	assert!(
		outcomes
			.iter()
			.any(|r| matches!(r, Err(PoolError::Exhausted { max_size: 1, .. })))
	);
}

#[tokio::test]
async fn healthy_instance_is_reused_at_capacity() {
	let (pool, factory) = pool_with(PoolConfig {
		max_size: 1,
		..config(AllocationStrategyKind::RoundRobin)
	});

	let first = pool.allocate(AllocationRequest::default()).await.unwrap();
	let second = pool.allocate(AllocationRequest::default()).await.unwrap();

	assert!(first.created);
	assert!(!second.created);
	assert_eq!(first.instance.id(), second.instance.id());
	assert_ne!(first.handle, second.handle);
	assert_eq!(factory.created_count(), 1);
}

#[tokio::test]
async fn exhausted_when_only_candidate_is_unhealthy() {
	let (pool, _factory) = pool_with(PoolConfig {
		max_size: 1,
		..config(AllocationStrategyKind::RoundRobin)
	});
	let first = pool.allocate(AllocationRequest::default()).await.unwrap();
	first.instance.set_health_status(HealthStatus::Unhealthy);

	let err = pool.allocate(AllocationRequest::default()).await.unwrap_err();
	assert!(matches!(err, PoolError::Exhausted { size: 1, max_size: 1 }));

	let metrics = pool.metrics().await;
	assert_eq!(metrics.total_requests, 2);
	assert_eq!(metrics.failed_requests, 1);
	assert_eq!(metrics.unhealthy_instances, 1);
}

#[tokio::test(start_paused = true)]
async fn same_team_first_use_creates_once() {
	let (pool, factory) = pool_with(config(AllocationStrategyKind::TeamIsolated));
	factory.set_delay(Duration::from_millis(20));

	let results = futures_util::future::join_all((0..4).map(|_| pool.allocate(AllocationRequest::for_team("alpha")))).await;

	assert_eq!(factory.created_count(), 1);
	let ids: Vec<_> = results.into_iter().map(|r| r.unwrap().instance.id().to_string()).collect();
	assert!(ids.iter().all(|id| id == &ids[0]));
	assert!(pool.team_locks.is_empty());
}

#[tokio::test]
async fn team_isolated_without_team_fails_typed() {
	let (pool, factory) = pool_with(config(AllocationStrategyKind::TeamIsolated));
	let err = pool.allocate(AllocationRequest::default()).await.unwrap_err();
	assert!(matches!(err, PoolError::AllocationConfig(_)));
	assert_eq!(factory.created_count(), 0);
}

#[tokio::test]
async fn teams_get_separate_instances() {
	let (pool, _factory) = pool_with(config(AllocationStrategyKind::TeamIsolated));
	let alpha = pool.allocate(AllocationRequest::for_team("alpha")).await.unwrap();
	let beta = pool.allocate(AllocationRequest::for_team("beta")).await.unwrap();
	assert_ne!(alpha.instance.id(), beta.instance.id());
	assert_eq!(beta.instance.team_id(), Some("beta"));
}

#[tokio::test]
async fn team_locks_are_dropped_after_allocation() {
	let (pool, factory) = pool_with(config(AllocationStrategyKind::TeamIsolated));
	for team in ["alpha", "beta", "gamma"] {
		pool.allocate(AllocationRequest::for_team(team)).await.unwrap();
	}
	assert!(pool.team_locks.is_empty());

	// Failed creations release the entry as well.
	factory.fail_next(1);
	assert!(pool.allocate(AllocationRequest::for_team("delta")).await.is_err());
	assert!(pool.team_locks.is_empty());
}

#[tokio::test]
async fn factory_failure_releases_reservation() {
	let (pool, factory) = pool_with(PoolConfig {
		max_size: 1,
		..config(AllocationStrategyKind::RoundRobin)
	});
	factory.fail_next(1);

	let err = pool.allocate(AllocationRequest::default()).await.unwrap_err();
	assert!(matches!(err, PoolError::Factory(_)));
	assert_eq!(pool.status().await.pending_creations, 0);

	pool.allocate(AllocationRequest::default()).await.unwrap();
	assert_eq!(pool.len().await, 1);
}

#[tokio::test(start_paused = true)]
async fn idle_eviction_respects_min_size() {
	let (pool, _factory) = pool_with(PoolConfig {
		min_size: 1,
		max_idle_time: Duration::from_secs(10),
		..config(AllocationStrategyKind::RoundRobin)
	});
	pool.allocate(AllocationRequest::default()).await.unwrap();

	tokio::time::advance(Duration::from_secs(60)).await;
	assert!(pool.evict_idle().await.is_empty());
	assert_eq!(pool.len().await, 1);
}

#[tokio::test(start_paused = true)]
async fn idle_eviction_takes_longest_idle_first() {
	let (pool, _factory) = pool_with(PoolConfig {
		min_size: 1,
		max_idle_time: Duration::from_secs(10),
		..config(AllocationStrategyKind::TeamIsolated)
	});
	let a = pool.allocate(AllocationRequest::for_team("a")).await.unwrap();
	let b = pool.allocate(AllocationRequest::for_team("b")).await.unwrap();
	let c = pool.allocate(AllocationRequest::for_team("c")).await.unwrap();

	tokio::time::advance(Duration::from_secs(5)).await;
	pool.release(b.instance.id()).await.unwrap();
	tokio::time::advance(Duration::from_secs(6)).await;

	let mut evicted = pool.evict_idle().await;
	evicted.sort();
	let mut expected = vec![a.instance.id().to_string(), c.instance.id().to_string()];
	expected.sort();
	assert_eq!(evicted, expected);
	assert!(pool.get(b.instance.id()).await.is_some());
}

#[tokio::test]
async fn unhealthy_instances_are_evicted_below_min_size() {
	let (pool, factory) = pool_with(PoolConfig {
		min_size: 1,
		..config(AllocationStrategyKind::RoundRobin)
	});
	let allocation = pool.allocate(AllocationRequest::default()).await.unwrap();
	let mock = factory.instance(allocation.instance.id()).unwrap();
	mock.set_probe_healthy(false);

	pool.run_health_checks().await;
	assert_eq!(allocation.instance.health_status(), HealthStatus::Unhealthy);
	assert_eq!(pool.len().await, 1, "health checks mark, they do not remove");

	assert_eq!(pool.evict_idle().await, vec![allocation.instance.id().to_string()]);
	assert!(pool.is_empty().await);
	assert!(mock.is_closed());
}

#[tokio::test]
async fn forced_remove_tolerates_missing_and_closed() {
	let (pool, factory) = pool_with(config(AllocationStrategyKind::RoundRobin));
	assert!(matches!(pool.remove("nope", false).await, Err(PoolError::NotFound(_))));
	pool.remove("nope", true).await.unwrap();

	let allocation = pool.allocate(AllocationRequest::default()).await.unwrap();
	allocation.instance.close(false).await.unwrap();
	pool.remove(allocation.instance.id(), true).await.unwrap();
	assert!(pool.is_empty().await);

	let allocation = pool.allocate(AllocationRequest::default()).await.unwrap();
	factory.instance(allocation.instance.id()).unwrap().set_fail_close(true);
	let err = pool.remove(allocation.instance.id(), false).await.unwrap_err();
	assert!(matches!(err, PoolError::Close { .. }));
	assert!(pool.is_empty().await);
}

#[tokio::test]
async fn warmup_tolerates_creation_failures() {
	let (pool, factory) = pool_with(PoolConfig {
		warmup_size: 3,
		..config(AllocationStrategyKind::RoundRobin)
	});
	factory.fail_next(1);
	let mut events = pool.subscribe();

	pool.initialize().await.unwrap();
	assert!(pool.is_running());
	assert_eq!(pool.len().await, 2);

	let mut warmup = None;
	while let Ok(event) = events.try_recv() {
		if let PoolEvent::WarmupCompleted { created, failed } = event {
			warmup = Some((created, failed));
		}
	}
	assert_eq!(warmup, Some((2, 1)));
	pool.shutdown().await;
}

#[tokio::test]
async fn shutdown_isolates_close_failures() {
	let (pool, factory) = pool_with(config(AllocationStrategyKind::TeamIsolated));
	pool.initialize().await.unwrap();
	for team in ["a", "b", "c"] {
		pool.allocate(AllocationRequest::for_team(team)).await.unwrap();
	}
	let created = factory.created();
	created[1].set_fail_close(true);

	let summary = pool.shutdown().await;
	assert_eq!(summary.closed, 2);
	assert_eq!(summary.failed, vec![created[1].id().to_string()]);
	assert!(created.iter().all(|m| m.close_calls() == 1));
	assert!(pool.is_empty().await);
	assert!(!pool.is_running());

	assert!(matches!(
		pool.allocate(AllocationRequest::for_team("a")).await,
		Err(PoolError::Shutdown)
	));
	assert_eq!(pool.shutdown().await, ShutdownSummary::default());
}

#[tokio::test]
async fn allocation_publishes_events() {
	let (pool, _factory) = pool_with(config(AllocationStrategyKind::LeastUsed));
	let mut events = pool.subscribe();

	let allocation = pool.allocate(AllocationRequest::default()).await.unwrap();

	assert!(matches!(events.recv().await.unwrap(), PoolEvent::Created { .. }));
	match events.recv().await.unwrap() {
		PoolEvent::Allocated { handle, instance_id, .. } => {
			assert_eq!(handle, allocation.handle);
			assert_eq!(instance_id, allocation.instance.id());
		}
		other => panic!("unexpected event {other:?}"),
	}
}

#[tokio::test(start_paused = true)]
async fn maintenance_tasks_probe_and_evict() {
	let (pool, factory) = pool_with(PoolConfig {
		health_check_interval: Duration::from_secs(1),
		idle_cleanup_interval: Duration::from_secs(3),
		..config(AllocationStrategyKind::RoundRobin)
	});
	pool.initialize().await.unwrap();
	let allocation = pool.allocate(AllocationRequest::default()).await.unwrap();
	factory.instance(allocation.instance.id()).unwrap().set_probe_healthy(false);

	tokio::time::sleep(Duration::from_millis(1500)).await;
	assert_eq!(allocation.instance.health_status(), HealthStatus::Unhealthy);

	tokio::time::sleep(Duration::from_secs(2)).await;
	assert!(pool.is_empty().await);

	pool.shutdown().await;
}

#[tokio::test]
async fn invalid_config_is_rejected() {
	let factory = Arc::new(MockFactory::new());
	let err = PoolManager::new(
		PoolConfig {
			max_size: 0,
			min_size: 0,
			..PoolConfig::default()
		},
		factory,
	)
	.err()
	.unwrap();
	assert!(matches!(err, PoolError::InvalidConfig(_)));
}
