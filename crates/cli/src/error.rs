use std::io;
use std::path::PathBuf;

use pw_mcp_runtime::{InstanceError, PoolError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
	#[error("{0} transport used before initialize()")]
	NotInitialized(&'static str),

	#[error("{0} transport is already running")]
	AlreadyRunning(&'static str),

	#[error("{0} streams were already served")]
	StreamConsumed(&'static str),

	#[error("failed to bind {target}: {source}")]
	Bind {
		target: String,
		#[source]
		source: io::Error,
	},

	#[error("failed to create FIFO {}: {source}", path.display())]
	Mkfifo {
		path: PathBuf,
		#[source]
		source: io::Error,
	},

	#[error("{} exists and is not a FIFO", .0.display())]
	NotAFifo(PathBuf),

	#[error("failed to open FIFO {}: {source}", path.display())]
	FifoOpen {
		path: PathBuf,
		#[source]
		source: io::Error,
	},

	#[error("timed out after {waited_ms}ms waiting for a reader on {}", path.display())]
	FifoOpenTimeout { path: PathBuf, waited_ms: u64 },

	#[error("invalid configuration: {0}")]
	Config(String),

	#[error("failed to read config file {}: {source}", path.display())]
	ConfigFile {
		path: PathBuf,
		#[source]
		source: io::Error,
	},

	#[error(transparent)]
	Pool(#[from] PoolError),

	#[error(transparent)]
	Browser(#[from] InstanceError),

	#[error(transparent)]
	Io(#[from] io::Error),

	#[error(transparent)]
	Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ServerError>;
