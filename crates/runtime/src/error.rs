//! Error types for the browser pool and its instances.

use thiserror::Error;

use crate::instance::BrowserKind;

/// Result type alias for pool operations.
pub type Result<T> = std::result::Result<T, PoolError>;

/// Failures raised by a single browser instance or its factory.
#[derive(Debug, Error)]
pub enum InstanceError {
	/// No Chromium-family executable could be located.
	#[error("Could not find a Chrome/Chromium executable. Install one or set PW_MCP_CHROME.")]
	ExecutableNotFound,

	/// The requested engine cannot be launched by this factory.
	#[error("Browser kind '{0}' is not supported by this factory; only chromium can be launched")]
	Unsupported(BrowserKind),

	/// Every port in the debugging range is taken.
	#[error("No free remote-debugging port in {start}-{end}")]
	NoFreePort { start: u16, end: u16 },

	/// The browser process could not be started or never became reachable.
	#[error("Failed to launch browser: {0}")]
	LaunchFailed(String),

	/// A DevTools protocol exchange failed.
	#[error("CDP error: {0}")]
	Cdp(String),

	/// Operation attempted on a closed instance.
	#[error("Browser instance {0} is closed")]
	Closed(String),

	#[error("Unknown browser action: {0}")]
	UnknownAction(String),

	#[error("Invalid arguments for '{action}': {message}")]
	InvalidArguments { action: String, message: String },

	#[error("Timeout: {0}")]
	Timeout(String),

	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),
}

/// Failures raised by the pool manager and allocation strategies.
#[derive(Debug, Error)]
pub enum PoolError {
	/// No eligible instance and no headroom to create one.
	#[error("Browser pool exhausted: {size} of {max_size} instances in use")]
	Exhausted { size: usize, max_size: usize },

	/// The request does not satisfy what the configured strategy needs.
	#[error("Allocation configuration error: {0}")]
	AllocationConfig(String),

	#[error("Invalid pool configuration: {0}")]
	InvalidConfig(String),

	#[error("Browser instance not found: {0}")]
	NotFound(String),

	#[error("Failed to create browser instance: {0}")]
	Factory(#[source] InstanceError),

	#[error("Failed to close browser instance {id}: {source}")]
	Close {
		id: String,
		#[source]
		source: InstanceError,
	},

	#[error("Browser pool is shut down")]
	Shutdown,
}
