//! Process wiring: config → pool → router → handler → transport.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use pw_mcp_core::{McpToolHandler, Router};
use pw_mcp_protocol::{CallerIdentity, Handlers};
use pw_mcp_runtime::{BrowserFactory, ChromeFactory, PoolConfig, PoolEvent, PoolManager, ShutdownSummary};
use serde_json::{Value, json};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cli::{Cli, TransportCommand};
use crate::config::{ServerConfig, default_socket_path};
use crate::error::Result;
use crate::transport::{FifoOptions, FifoTransport, HttpTransport, StatusProvider, StdioTransport, Transport, UnixSocketTransport};

/// Pool, router, and handler for one server process.
pub struct App {
	pool: Arc<PoolManager>,
	router: Arc<Router>,
	handler: Arc<McpToolHandler>,
	event_log: JoinHandle<()>,
	removals: JoinHandle<()>,
}

impl App {
	/// Builds the pool and runs its warmup.
	pub async fn start(config: PoolConfig, factory: Arc<dyn BrowserFactory>) -> Result<Self> {
		let pool = PoolManager::new(config, factory)?;
		let event_log = tokio::spawn(log_events(pool.subscribe()));
		pool.initialize().await?;

		let router = Arc::new(Router::new(Arc::clone(&pool)));
		let removals = router.track_removals();
		let handler = Arc::new(McpToolHandler::new(Arc::clone(&router)));
		Ok(Self {
			pool,
			router,
			handler,
			event_log,
			removals,
		})
	}

	pub fn pool(&self) -> &Arc<PoolManager> {
		&self.pool
	}

	pub fn router(&self) -> &Arc<Router> {
		&self.router
	}

	pub fn handlers(&self) -> Handlers {
		self.handler.handlers()
	}

	pub fn status_provider(&self) -> Arc<dyn StatusProvider> {
		Arc::new(PoolStatusProvider {
			pool: Arc::clone(&self.pool),
			router: Arc::clone(&self.router),
		})
	}

	/// Stops periodic pool tasks, then closes every instance.
	pub async fn shutdown(self) -> ShutdownSummary {
		let summary = self.pool.shutdown().await;
		self.event_log.abort();
		self.removals.abort();
		summary
	}
}

struct PoolStatusProvider {
	pool: Arc<PoolManager>,
	router: Arc<Router>,
}

#[async_trait]
impl StatusProvider for PoolStatusProvider {
	async fn metrics(&self) -> Value {
		json!({
			"strategy": self.pool.strategy_kind(),
			"pool": self.pool.metrics().await,
			"sessions": self.router.statistics(),
		})
	}
}

async fn log_events(mut events: broadcast::Receiver<PoolEvent>) {
	loop {
		match events.recv().await {
			Ok(event) => debug!(target = "pw.mcp.pool", ?event, "pool event"),
			Err(broadcast::error::RecvError::Lagged(skipped)) => {
				warn!(target = "pw.mcp.pool", skipped, "pool event log lagged");
			}
			Err(broadcast::error::RecvError::Closed) => break,
		}
	}
}

/// Instantiates the transport selected on the command line.
pub fn build_transport(command: &TransportCommand, identity: &CallerIdentity, app: &App) -> Arc<dyn Transport> {
	match command {
		TransportCommand::Stdio => Arc::new(StdioTransport::new(identity.clone())),
		TransportCommand::Socket(args) => {
			let path = args.path.clone().unwrap_or_else(default_socket_path);
			Arc::new(UnixSocketTransport::new(path, identity.clone()))
		}
		TransportCommand::Fifo(args) => {
			let options = FifoOptions {
				open_timeout: std::time::Duration::from_millis(args.open_timeout_ms),
				force_polling: args.polling,
				..FifoOptions::default()
			};
			Arc::new(FifoTransport::new(&args.input, &args.output, identity.clone(), options))
		}
		TransportCommand::Http(args) => {
			let http = HttpTransport::new(args.addr, args.path.clone(), identity.clone()).trust_identity_headers(args.trust_identity_headers);
			http.set_status_provider(app.status_provider());
			Arc::new(http)
		}
	}
}

/// Runs the server until the transport finishes or a signal arrives.
pub async fn run(cli: Cli) -> anyhow::Result<()> {
	let config = ServerConfig::load(cli.config.as_deref(), &cli.overrides).context("failed to load configuration")?;
	let factory = ChromeFactory::new(config.browser.clone()).context("invalid browser settings")?;
	info!(
		target = "pw.mcp.pool",
		executable = ?factory.executable(),
		strategy = %config.pool.allocation_strategy,
		max_size = config.pool.max_size,
		"browser pool configured"
	);
	let app = App::start(config.pool.clone(), Arc::new(factory))
		.await
		.context("failed to start browser pool")?;

	let transport = build_transport(&cli.transport, &config.identity, &app);
	transport.set_handlers(app.handlers());
	let started = async {
		transport.initialize().await?;
		transport.start().await
	}
	.await;
	if let Err(err) = started {
		app.shutdown().await;
		transport.stop().await.ok();
		return Err(err).with_context(|| format!("failed to start {} transport", transport.name()));
	}

	tokio::select! {
		_ = transport.wait() => info!(target = "pw.mcp.transport", transport = transport.name(), "transport finished"),
		signal = shutdown_signal() => {
			let signal = signal?;
			info!(target = "pw.mcp.transport", signal, "received signal, shutting down");
		}
	}

	let summary = app.shutdown().await;
	if !summary.failed.is_empty() {
		warn!(target = "pw.mcp.pool", failed = ?summary.failed, "some instances failed to close");
	}
	transport.stop().await.context("failed to stop transport")?;
	Ok(())
}

async fn shutdown_signal() -> anyhow::Result<&'static str> {
	use tokio::signal::unix::{SignalKind, signal};

	let mut sigterm = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
	let mut sigint = signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;
	Ok(tokio::select! {
		_ = sigterm.recv() => "SIGTERM",
		_ = sigint.recv() => "SIGINT",
	})
}
