//! Pool configuration.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PoolError, Result};

/// Allocation policy applied by the pool.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AllocationStrategyKind {
	#[default]
	RoundRobin,
	LeastUsed,
	TeamIsolated,
}

impl fmt::Display for AllocationStrategyKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			AllocationStrategyKind::RoundRobin => write!(f, "round-robin"),
			AllocationStrategyKind::LeastUsed => write!(f, "least-used"),
			AllocationStrategyKind::TeamIsolated => write!(f, "team-isolated"),
		}
	}
}

impl FromStr for AllocationStrategyKind {
	type Err = String;

	fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
		match s {
			"round-robin" => Ok(Self::RoundRobin),
			"least-used" => Ok(Self::LeastUsed),
			"team-isolated" => Ok(Self::TeamIsolated),
			other => Err(format!("unknown allocation strategy '{other}'")),
		}
	}
}

/// Sizing, maintenance cadence, and allocation policy of a pool.
///
/// Durations (de)serialize as integer milliseconds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PoolConfig {
	pub max_size: usize,
	/// Floor preserved by idle eviction.
	pub min_size: usize,
	#[serde(rename = "maxIdleTimeMs", with = "duration_ms")]
	pub max_idle_time: Duration,
	#[serde(rename = "healthCheckIntervalMs", with = "duration_ms")]
	pub health_check_interval: Duration,
	#[serde(rename = "idleCleanupIntervalMs", with = "duration_ms")]
	pub idle_cleanup_interval: Duration,
	pub warmup_size: usize,
	pub allocation_strategy: AllocationStrategyKind,
}

impl Default for PoolConfig {
	fn default() -> Self {
		Self {
			max_size: 10,
			min_size: 1,
			max_idle_time: Duration::from_secs(300),
			health_check_interval: Duration::from_secs(30),
			idle_cleanup_interval: Duration::from_secs(60),
			warmup_size: 0,
			allocation_strategy: AllocationStrategyKind::RoundRobin,
		}
	}
}

impl PoolConfig {
	pub fn validate(&self) -> Result<()> {
		if self.max_size == 0 {
			return Err(PoolError::InvalidConfig("maxSize must be at least 1".into()));
		}
		if self.min_size > self.max_size {
			return Err(PoolError::InvalidConfig(format!(
				"minSize ({}) exceeds maxSize ({})",
				self.min_size, self.max_size
			)));
		}
		if self.warmup_size > self.max_size {
			return Err(PoolError::InvalidConfig(format!(
				"warmupSize ({}) exceeds maxSize ({})",
				self.warmup_size, self.max_size
			)));
		}
		for (name, value) in [
			("healthCheckIntervalMs", self.health_check_interval),
			("idleCleanupIntervalMs", self.idle_cleanup_interval),
		] {
			if value.is_zero() {
				return Err(PoolError::InvalidConfig(format!("{name} must be non-zero")));
			}
		}
		Ok(())
	}
}

mod duration_ms {
	use std::time::Duration;

	use serde::{Deserialize, Deserializer, Serializer};

	pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
		u64::deserialize(deserializer).map(Duration::from_millis)
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn defaults_are_valid() {
		PoolConfig::default().validate().unwrap();
	}

	#[test]
	fn rejects_min_above_max() {
		let config = PoolConfig {
			max_size: 2,
			min_size: 3,
			..PoolConfig::default()
		};
		assert!(matches!(config.validate(), Err(PoolError::InvalidConfig(_))));
	}

	#[test]
	fn rejects_zero_max_and_zero_intervals() {
		let config = PoolConfig {
			max_size: 0,
			min_size: 0,
			..PoolConfig::default()
		};
		assert!(config.validate().is_err());

		let config = PoolConfig {
			health_check_interval: Duration::ZERO,
			..PoolConfig::default()
		};
		assert!(config.validate().unwrap_err().to_string().contains("healthCheckIntervalMs"));
	}

	#[test]
	fn partial_json_fills_defaults() {
		let config: PoolConfig = serde_json::from_value(json!({
			"maxSize": 4,
			"maxIdleTimeMs": 1500,
			"allocationStrategy": "team-isolated"
		}))
		.unwrap();
		assert_eq!(config.max_size, 4);
		assert_eq!(config.max_idle_time, Duration::from_millis(1500));
		assert_eq!(config.allocation_strategy, AllocationStrategyKind::TeamIsolated);
		assert_eq!(config.min_size, PoolConfig::default().min_size);

		let back = serde_json::to_value(&config).unwrap();
		assert_eq!(back["healthCheckIntervalMs"], 30_000);
	}
}
