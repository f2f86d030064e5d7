//! Transport adapters carrying JSON-RPC to the shared [`Dispatcher`].
//!
//! | Transport | Framing | Peer | Dispatcher scope |
//! |-----------|---------|------|------------------|
//! | stdio     | NDJSON  | parent process | process |
//! | socket    | NDJSON  | each connection | connection |
//! | fifo      | NDJSON  | the pipe pair | pair |
//! | http      | POST body | any client | endpoint |
//!
//! Every adapter answers `initialize` through the same
//! [`pw_mcp_protocol::negotiate`], so handshake results are identical across
//! channels.
//!
//! [`Dispatcher`]: pw_mcp_protocol::Dispatcher

pub mod fifo;
pub mod http;
pub mod stdio;
pub(crate) mod stream;
pub mod unix;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use pw_mcp_protocol::{Handlers, ToolCallHandler, ToolListHandler};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub use fifo::{FifoMode, FifoOptions, FifoTransport};
pub use http::{HttpTransport, StatusProvider};
pub use stdio::StdioTransport;
pub use unix::UnixSocketTransport;

use crate::error::{Result, ServerError};

/// Common contract of every transport adapter.
///
/// Handlers are registered before [`start`](Transport::start). OS resources
/// are acquired in [`initialize`](Transport::initialize) so that bind and
/// open failures surface as startup errors.
#[async_trait]
pub trait Transport: Send + Sync {
	fn name(&self) -> &'static str;

	fn set_tool_list_handler(&self, handler: Arc<dyn ToolListHandler>);

	fn set_tool_call_handler(&self, handler: Arc<dyn ToolCallHandler>);

	async fn initialize(&self) -> Result<()>;

	async fn start(&self) -> Result<()>;

	/// Stops serving and releases OS resources. Idempotent.
	async fn stop(&self) -> Result<()>;

	fn is_running(&self) -> bool;

	/// Resolves once the transport has stopped serving.
	async fn wait(&self);

	fn set_handlers(&self, handlers: Handlers) {
		if let Some(list) = handlers.list {
			self.set_tool_list_handler(list);
		}
		if let Some(call) = handlers.call {
			self.set_tool_call_handler(call);
		}
	}
}

/// Run-state bookkeeping shared by the adapters.
pub(crate) struct Lifecycle {
	name: &'static str,
	handlers: Mutex<Handlers>,
	initialized: AtomicBool,
	running: AtomicBool,
	shutdown: watch::Sender<bool>,
	done: watch::Sender<bool>,
	task: Mutex<Option<JoinHandle<()>>>,
}

impl Lifecycle {
	pub(crate) fn new(name: &'static str) -> Arc<Self> {
		Arc::new(Self {
			name,
			handlers: Mutex::new(Handlers::default()),
			initialized: AtomicBool::new(false),
			running: AtomicBool::new(false),
			shutdown: watch::Sender::new(false),
			done: watch::Sender::new(false),
			task: Mutex::new(None),
		})
	}

	pub(crate) fn set_list(&self, handler: Arc<dyn ToolListHandler>) {
		self.handlers.lock().list = Some(handler);
	}

	pub(crate) fn set_call(&self, handler: Arc<dyn ToolCallHandler>) {
		self.handlers.lock().call = Some(handler);
	}

	pub(crate) fn handlers(&self) -> Handlers {
		self.handlers.lock().clone()
	}

	pub(crate) fn mark_initialized(&self) {
		self.initialized.store(true, Ordering::Release);
	}

	pub(crate) fn is_initialized(&self) -> bool {
		self.initialized.load(Ordering::Acquire)
	}

	/// Flips to running; fails when not initialized or already running.
	pub(crate) fn begin(&self) -> Result<()> {
		if !self.is_initialized() {
			return Err(ServerError::NotInitialized(self.name));
		}
		if self.running.swap(true, Ordering::AcqRel) {
			return Err(ServerError::AlreadyRunning(self.name));
		}
		self.shutdown.send_replace(false);
		self.done.send_replace(false);
		Ok(())
	}

	pub(crate) fn attach(&self, task: JoinHandle<()>) {
		*self.task.lock() = Some(task);
	}

	pub(crate) fn shutdown_signal(&self) -> watch::Receiver<bool> {
		self.shutdown.subscribe()
	}

	/// Called by the serving task when it exits on its own (EOF).
	pub(crate) fn finished(&self) {
		self.running.store(false, Ordering::Release);
		self.done.send_replace(true);
	}

	/// Signals the serving task and waits for it to exit.
	pub(crate) async fn halt(&self) {
		self.shutdown.send_replace(true);
		let task = self.task.lock().take();
		if let Some(task) = task {
			if let Err(err) = task.await {
				if !err.is_cancelled() {
					warn!(target = "pw.mcp.transport", transport = self.name, error = %err, "serving task failed");
				}
			}
			info!(target = "pw.mcp.transport", transport = self.name, "transport stopped");
		}
		self.running.store(false, Ordering::Release);
		self.done.send_replace(true);
	}

	pub(crate) fn is_running(&self) -> bool {
		self.running.load(Ordering::Acquire)
	}

	pub(crate) async fn wait(&self) {
		let mut done = self.done.subscribe();
		let _ = done.wait_for(|finished| *finished).await;
	}
}
