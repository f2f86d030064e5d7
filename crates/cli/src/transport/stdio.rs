use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use pw_mcp_protocol::{CallerIdentity, Dispatcher, ToolCallHandler, ToolListHandler};
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tracing::{info, warn};

use super::stream::serve_lines;
use super::{Lifecycle, Transport};
use crate::error::{Result, ServerError};

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Serves the parent process over its stdin/stdout. EOF on stdin ends the
/// transport.
pub struct StdioTransport {
	identity: CallerIdentity,
	lifecycle: Arc<Lifecycle>,
	io: Mutex<Option<(BoxedReader, BoxedWriter)>>,
}

impl StdioTransport {
	pub fn new(identity: CallerIdentity) -> Self {
		Self::with_io(identity, tokio::io::stdin(), tokio::io::stdout())
	}

	/// Serves an arbitrary reader/writer pair instead of the process streams.
	pub fn with_io<R, W>(identity: CallerIdentity, reader: R, writer: W) -> Self
	where
		R: AsyncRead + Send + Unpin + 'static,
		W: AsyncWrite + Send + Unpin + 'static,
	{
		Self {
			identity,
			lifecycle: Lifecycle::new("stdio"),
			io: Mutex::new(Some((Box::new(reader), Box::new(writer)))),
		}
	}
}

#[async_trait]
impl Transport for StdioTransport {
	fn name(&self) -> &'static str {
		"stdio"
	}

	fn set_tool_list_handler(&self, handler: Arc<dyn ToolListHandler>) {
		self.lifecycle.set_list(handler);
	}

	fn set_tool_call_handler(&self, handler: Arc<dyn ToolCallHandler>) {
		self.lifecycle.set_call(handler);
	}

	async fn initialize(&self) -> Result<()> {
		self.lifecycle.mark_initialized();
		Ok(())
	}

	async fn start(&self) -> Result<()> {
		self.lifecycle.begin()?;
		let taken = self.io.lock().take();
		let Some((reader, writer)) = taken else {
			self.lifecycle.finished();
			return Err(ServerError::StreamConsumed("stdio"));
		};

		let dispatcher = Dispatcher::new("stdio", self.lifecycle.handlers());
		let identity = self.identity.clone();
		let shutdown = self.lifecycle.shutdown_signal();
		let lifecycle = Arc::clone(&self.lifecycle);

		let task = tokio::spawn(async move {
			if let Err(err) = serve_lines(BufReader::new(reader), writer, &dispatcher, &identity, shutdown).await {
				warn!(target = "pw.mcp.transport", transport = "stdio", error = %err, "stdio stream failed");
			}
			dispatcher.close();
			lifecycle.finished();
		});
		self.lifecycle.attach(task);

		info!(target = "pw.mcp.transport", transport = "stdio", team = %self.identity.team_id, "serving on stdin/stdout");
		Ok(())
	}

	async fn stop(&self) -> Result<()> {
		self.lifecycle.halt().await;
		Ok(())
	}

	fn is_running(&self) -> bool {
		self.lifecycle.is_running()
	}

	async fn wait(&self) {
		self.lifecycle.wait().await;
	}
}
