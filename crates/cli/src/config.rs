//! Server configuration: JSON file plus command-line overrides.

use std::path::{Path, PathBuf};

use pw_mcp_protocol::CallerIdentity;
use pw_mcp_runtime::{BrowserSettings, PoolConfig};
use serde::{Deserialize, Serialize};

use crate::cli::Overrides;
use crate::error::{Result, ServerError};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfig {
	pub pool: PoolConfig,
	pub identity: CallerIdentity,
	pub browser: BrowserSettings,
}

impl ServerConfig {
	pub fn from_file(path: &Path) -> Result<Self> {
		let raw = std::fs::read_to_string(path).map_err(|source| ServerError::ConfigFile {
			path: path.to_path_buf(),
			source,
		})?;
		serde_json::from_str(&raw).map_err(|e| ServerError::Config(format!("{}: {e}", path.display())))
	}

	/// Reads `path` when given, applies `overrides`, then validates.
	pub fn load(path: Option<&Path>, overrides: &Overrides) -> Result<Self> {
		let mut config = match path {
			Some(path) => Self::from_file(path)?,
			None => Self::default(),
		};
		config.apply(overrides);
		config.pool.validate()?;
		Ok(config)
	}

	pub fn apply(&mut self, overrides: &Overrides) {
		if let Some(team_id) = &overrides.team_id {
			self.identity.team_id = team_id.clone();
		}
		if let Some(user_id) = &overrides.user_id {
			self.identity.user_id = user_id.clone();
		}
		if !overrides.permissions.is_empty() {
			self.identity.permissions = overrides.permissions.iter().cloned().collect();
		}
		if let Some(strategy) = overrides.strategy {
			self.pool.allocation_strategy = strategy;
		}
		if let Some(max_size) = overrides.max_size {
			self.pool.max_size = max_size;
		}
		if let Some(min_size) = overrides.min_size {
			self.pool.min_size = min_size;
		}
		if let Some(warmup_size) = overrides.warmup_size {
			self.pool.warmup_size = warmup_size;
		}
		if let Some(executable) = &overrides.browser_executable {
			self.browser.executable = Some(executable.clone());
		}
		if overrides.headful {
			self.browser.headless = false;
		}
	}
}

/// Default socket location.
///
/// Uses `$XDG_RUNTIME_DIR/pw-mcp.sock` if available (already user-permissioned),
/// otherwise falls back to `/tmp/pw-mcp-{uid}.sock`.
pub fn default_socket_path() -> PathBuf {
	if let Ok(xdg_runtime) = std::env::var("XDG_RUNTIME_DIR") {
		return PathBuf::from(xdg_runtime).join("pw-mcp.sock");
	}

	let uid = unsafe { libc::getuid() };
	PathBuf::from(format!("/tmp/pw-mcp-{uid}.sock"))
}

#[cfg(test)]
mod tests {
	use std::io::Write;

	use pw_mcp_runtime::AllocationStrategyKind;

	use super::*;

	#[test]
	fn file_values_are_overridden_by_flags() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		write!(
			file,
			r#"{{
				"pool": {{ "maxSize": 3, "minSize": 0, "allocationStrategy": "least-used", "maxIdleTimeMs": 1000 }},
				"identity": {{ "teamId": "alpha", "permissions": ["browser:use"] }},
				"browser": {{ "headless": true, "launchTimeoutMs": 2500 }}
			}}"#
		)
		.unwrap();

		let overrides = Overrides {
			max_size: Some(5),
			team_id: Some("beta".into()),
			..Overrides::default()
		};
		let config = ServerConfig::load(Some(file.path()), &overrides).unwrap();

		assert_eq!(config.pool.max_size, 5);
		assert_eq!(config.pool.min_size, 0);
		assert_eq!(config.pool.allocation_strategy, AllocationStrategyKind::LeastUsed);
		assert_eq!(config.pool.max_idle_time.as_millis(), 1000);
		assert_eq!(config.identity.team_id, "beta");
		assert_eq!(config.identity.user_id, "local");
		assert!(config.identity.permissions.contains("browser:use"));
		assert_eq!(config.browser.launch_timeout.as_millis(), 2500);
	}

	#[test]
	fn invalid_pool_is_rejected() {
		let overrides = Overrides {
			max_size: Some(1),
			min_size: Some(2),
			..Overrides::default()
		};
		let err = ServerConfig::load(None, &overrides).unwrap_err();
		assert!(matches!(err, ServerError::Pool(_)));
	}

	#[test]
	fn malformed_file_names_path() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		write!(file, "{{ not json").unwrap();
		let err = ServerConfig::from_file(file.path()).unwrap_err();
		assert!(err.to_string().contains(&file.path().display().to_string()));
	}
}
