use std::os::unix::fs::{FileTypeExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use pw_mcp_protocol::{CallerIdentity, Dispatcher, Handlers, ToolCallHandler, ToolListHandler};
use tokio::io::BufReader;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::stream::serve_lines;
use super::{Lifecycle, Transport};
use crate::error::{Result, ServerError};

/// Serves each connection on a Unix domain socket as its own peer.
///
/// The socket file is created with mode 0600, a stale file at the same path
/// is replaced on initialize, and the file is removed on stop. Only a file
/// this transport bound is ever removed.
pub struct UnixSocketTransport {
	path: PathBuf,
	identity: CallerIdentity,
	lifecycle: Arc<Lifecycle>,
	listener: Mutex<Option<UnixListener>>,
	bound: AtomicBool,
}

impl UnixSocketTransport {
	pub fn new(path: impl Into<PathBuf>, identity: CallerIdentity) -> Self {
		Self {
			path: path.into(),
			identity,
			lifecycle: Lifecycle::new("socket"),
			listener: Mutex::new(None),
			bound: AtomicBool::new(false),
		}
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	fn remove_socket_file(&self) {
		match std::fs::remove_file(&self.path) {
			Ok(()) => debug!(target = "pw.mcp.transport", socket = %self.path.display(), "socket file removed"),
			Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
			Err(err) => warn!(target = "pw.mcp.transport", socket = %self.path.display(), error = %err, "failed to remove socket file"),
		}
	}
}

#[async_trait]
impl Transport for UnixSocketTransport {
	fn name(&self) -> &'static str {
		"socket"
	}

	fn set_tool_list_handler(&self, handler: Arc<dyn ToolListHandler>) {
		self.lifecycle.set_list(handler);
	}

	fn set_tool_call_handler(&self, handler: Arc<dyn ToolCallHandler>) {
		self.lifecycle.set_call(handler);
	}

	async fn initialize(&self) -> Result<()> {
		if self.listener.lock().is_some() {
			return Ok(());
		}

		let bind_error = |source| ServerError::Bind {
			target: self.path.display().to_string(),
			source,
		};

		match std::fs::symlink_metadata(&self.path) {
			Ok(meta) if meta.file_type().is_socket() => {
				debug!(target = "pw.mcp.transport", socket = %self.path.display(), "removing stale socket");
				std::fs::remove_file(&self.path).map_err(bind_error)?;
			}
			Ok(_) => {
				return Err(bind_error(std::io::Error::new(
					std::io::ErrorKind::AlreadyExists,
					"path exists and is not a socket",
				)));
			}
			Err(_) => {}
		}
		if let Some(parent) = self.path.parent() {
			if !parent.as_os_str().is_empty() && !parent.exists() {
				std::fs::create_dir_all(parent).map_err(bind_error)?;
			}
		}

		let listener = UnixListener::bind(&self.path).map_err(bind_error)?;
		self.bound.store(true, Ordering::SeqCst);
		std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600)).map_err(bind_error)?;

		info!(target = "pw.mcp.transport", socket = %self.path.display(), "socket bound");
		*self.listener.lock() = Some(listener);
		self.lifecycle.mark_initialized();
		Ok(())
	}

	async fn start(&self) -> Result<()> {
		self.lifecycle.begin()?;
		let taken = self.listener.lock().take();
		let Some(listener) = taken else {
			self.lifecycle.finished();
			return Err(ServerError::NotInitialized("socket"));
		};

		let handlers = self.lifecycle.handlers();
		let identity = self.identity.clone();
		let shutdown = self.lifecycle.shutdown_signal();
		let task = tokio::spawn(accept_loop(listener, handlers, identity, shutdown));
		self.lifecycle.attach(task);

		info!(target = "pw.mcp.transport", socket = %self.path.display(), team = %self.identity.team_id, "accepting connections");
		Ok(())
	}

	async fn stop(&self) -> Result<()> {
		self.lifecycle.halt().await;
		// Drop a listener that was bound but never started.
		self.listener.lock().take();
		if self.bound.swap(false, Ordering::SeqCst) {
			self.remove_socket_file();
		}
		Ok(())
	}

	fn is_running(&self) -> bool {
		self.lifecycle.is_running()
	}

	async fn wait(&self) {
		self.lifecycle.wait().await;
	}
}

async fn accept_loop(listener: UnixListener, handlers: Handlers, identity: CallerIdentity, mut shutdown: watch::Receiver<bool>) {
	let mut connections = JoinSet::new();
	let connection_shutdown = shutdown.clone();
	loop {
		tokio::select! {
			_ = async { let _ = shutdown.wait_for(|stop| *stop).await; } => break,
			accepted = listener.accept() => match accepted {
				Ok((stream, _)) => {
					let handlers = handlers.clone();
					let identity = identity.clone();
					let shutdown = connection_shutdown.clone();
					connections.spawn(serve_connection(stream, handlers, identity, shutdown));
				}
				Err(err) => warn!(target = "pw.mcp.transport", error = %err, "socket accept failed"),
			},
			Some(joined) = connections.join_next(), if !connections.is_empty() => {
				if let Err(err) = joined {
					warn!(target = "pw.mcp.transport", error = %err, "connection task failed");
				}
			}
		}
	}
	// Connections observe the same shutdown signal.
	while connections.join_next().await.is_some() {}
}

async fn serve_connection(stream: UnixStream, handlers: Handlers, identity: CallerIdentity, shutdown: watch::Receiver<bool>) {
	let dispatcher = Dispatcher::new("socket", handlers);
	debug!(target = "pw.mcp.transport", transport = "socket", "client connected");
	let (reader, writer) = stream.into_split();
	if let Err(err) = serve_lines(BufReader::new(reader), writer, &dispatcher, &identity, shutdown).await {
		warn!(target = "pw.mcp.transport", transport = "socket", error = %err, "connection error");
	}
	dispatcher.close();
	debug!(target = "pw.mcp.transport", transport = "socket", "client disconnected");
}
