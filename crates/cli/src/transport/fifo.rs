//! Named-pipe transport: requests arrive on one FIFO, responses leave on
//! another.
//!
//! Opening the output FIFO for writing fails with `ENXIO` until a client
//! opens it for reading, so [`FifoTransport::start`] retries with
//! exponential backoff inside a fixed budget and then fails with
//! [`ServerError::FifoOpenTimeout`].

use std::ffi::CString;
use std::fs::File;
use std::io::{ErrorKind, Read, Write};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{FileTypeExt, OpenOptionsExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use pw_mcp_protocol::{CallerIdentity, Dispatcher, JsonRpcResponse, ToolCallHandler, ToolListHandler};
use serde::Serialize;
use tokio::io::BufReader;
use tokio::net::unix::pipe;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::stream::{Frame, MAX_FRAME_BYTES, handle_frame, oversized_response, read_frame, write_message};
use super::{Lifecycle, Transport};
use crate::error::{Result, ServerError};

/// How the input FIFO is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FifoMode {
	/// Readiness-driven reads through the async reactor.
	NonBlockingStream,
	/// Non-blocking reads retried on a fixed interval.
	PollingFallback,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FifoOptions {
	/// Total time to wait for a reader on the output FIFO.
	pub open_timeout: Duration,
	pub retry_base: Duration,
	pub retry_multiplier: f64,
	/// Cap on a single backoff delay.
	pub retry_max_delay: Duration,
	pub poll_interval: Duration,
	/// Skip the stream reader and poll from the start.
	pub force_polling: bool,
}

impl Default for FifoOptions {
	fn default() -> Self {
		Self {
			open_timeout: Duration::from_secs(5),
			retry_base: Duration::from_millis(50),
			retry_multiplier: 1.5,
			retry_max_delay: Duration::from_secs(1),
			poll_interval: Duration::from_millis(100),
			force_polling: false,
		}
	}
}

pub struct FifoTransport {
	input: PathBuf,
	output: PathBuf,
	identity: CallerIdentity,
	options: FifoOptions,
	lifecycle: Arc<Lifecycle>,
	mode: Mutex<Option<FifoMode>>,
	/// FIFOs this transport created; removed again on stop.
	created: Mutex<Vec<PathBuf>>,
}

impl FifoTransport {
	pub fn new(input: impl Into<PathBuf>, output: impl Into<PathBuf>, identity: CallerIdentity, options: FifoOptions) -> Self {
		Self {
			input: input.into(),
			output: output.into(),
			identity,
			options,
			lifecycle: Lifecycle::new("fifo"),
			mode: Mutex::new(None),
			created: Mutex::new(Vec::new()),
		}
	}

	/// Read mode in use; `None` until started.
	pub fn mode(&self) -> Option<FifoMode> {
		*self.mode.lock()
	}

	fn open_input(&self) -> Result<FifoReader> {
		if !self.options.force_polling {
			match receiver_options().open_receiver(&self.input) {
				Ok(receiver) => return Ok(FifoReader::Stream(receiver)),
				Err(err) => warn!(
					target = "pw.mcp.transport",
					fifo = %self.input.display(),
					error = %err,
					"stream reader unavailable, falling back to polling"
				),
			}
		}
		let file = std::fs::OpenOptions::new()
			.read(true)
			.custom_flags(libc::O_NONBLOCK)
			.open(&self.input)
			.map_err(|source| ServerError::FifoOpen {
				path: self.input.clone(),
				source,
			})?;
		Ok(FifoReader::Polling(file))
	}

	async fn open_output(&self, mode: FifoMode) -> Result<FifoWriter> {
		let path = self.output.as_path();
		match mode {
			FifoMode::NonBlockingStream => open_with_backoff(path, &self.options, || pipe::OpenOptions::new().open_sender(path))
				.await
				.map(FifoWriter::Stream),
			FifoMode::PollingFallback => open_with_backoff(path, &self.options, || {
				std::fs::OpenOptions::new()
					.write(true)
					.custom_flags(libc::O_NONBLOCK)
					.open(path)
			})
			.await
			.map(|file| FifoWriter::Polling {
				file,
				retry: self.options.poll_interval,
			}),
		}
	}
}

#[async_trait]
impl Transport for FifoTransport {
	fn name(&self) -> &'static str {
		"fifo"
	}

	fn set_tool_list_handler(&self, handler: Arc<dyn ToolListHandler>) {
		self.lifecycle.set_list(handler);
	}

	fn set_tool_call_handler(&self, handler: Arc<dyn ToolCallHandler>) {
		self.lifecycle.set_call(handler);
	}

	async fn initialize(&self) -> Result<()> {
		for path in [&self.input, &self.output] {
			if ensure_fifo(path)? {
				self.created.lock().push(path.clone());
			}
		}
		self.lifecycle.mark_initialized();
		Ok(())
	}

	async fn start(&self) -> Result<()> {
		self.lifecycle.begin()?;

		let opened = async {
			let reader = self.open_input()?;
			let writer = self.open_output(reader.mode()).await?;
			Ok::<_, ServerError>((reader, writer))
		}
		.await;
		let (reader, writer) = match opened {
			Ok(pair) => pair,
			Err(err) => {
				self.lifecycle.finished();
				return Err(err);
			}
		};

		let mode = reader.mode();
		*self.mode.lock() = Some(mode);

		let dispatcher = Dispatcher::new("fifo", self.lifecycle.handlers());
		let peer = FifoPeer {
			dispatcher,
			identity: self.identity.clone(),
			writer,
			poll_interval: self.options.poll_interval,
		};
		let shutdown = self.lifecycle.shutdown_signal();
		let lifecycle = Arc::clone(&self.lifecycle);
		let task = tokio::spawn(async move {
			match reader {
				FifoReader::Stream(receiver) => peer.serve_stream(receiver, shutdown).await,
				FifoReader::Polling(file) => peer.serve_polling(file, shutdown).await,
			}
			lifecycle.finished();
		});
		self.lifecycle.attach(task);

		info!(
			target = "pw.mcp.transport",
			input = %self.input.display(),
			output = %self.output.display(),
			?mode,
			"serving on FIFO pair"
		);
		Ok(())
	}

	async fn stop(&self) -> Result<()> {
		self.lifecycle.halt().await;
		let created = std::mem::take(&mut *self.created.lock());
		for path in created {
			if let Err(err) = std::fs::remove_file(&path) {
				if err.kind() != ErrorKind::NotFound {
					warn!(target = "pw.mcp.transport", fifo = %path.display(), error = %err, "failed to remove FIFO");
				}
			}
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

enum FifoReader {
	Stream(pipe::Receiver),
	Polling(File),
}

impl FifoReader {
	fn mode(&self) -> FifoMode {
		match self {
			FifoReader::Stream(_) => FifoMode::NonBlockingStream,
			FifoReader::Polling(_) => FifoMode::PollingFallback,
		}
	}
}

enum FifoWriter {
	Stream(pipe::Sender),
	Polling { file: File, retry: Duration },
}

impl FifoWriter {
	async fn write_message(&mut self, response: &JsonRpcResponse) -> std::io::Result<()> {
		match self {
			FifoWriter::Stream(sender) => write_message(sender, response).await,
			FifoWriter::Polling { file, retry } => {
				let mut payload = serde_json::to_vec(response)?;
				payload.push(b'\n');
				let mut written = 0;
				while written < payload.len() {
					match file.write(&payload[written..]) {
						Ok(0) => return Err(ErrorKind::WriteZero.into()),
						Ok(n) => written += n,
						Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => {
							tokio::time::sleep(*retry).await;
						}
						Err(err) => return Err(err),
					}
				}
				Ok(())
			}
		}
	}
}

struct FifoPeer {
	dispatcher: Dispatcher,
	identity: CallerIdentity,
	writer: FifoWriter,
	poll_interval: Duration,
}

impl FifoPeer {
	async fn respond(&mut self, frame: &[u8]) {
		let Some(response) = handle_frame(frame, &self.dispatcher, &self.identity).await else {
			return;
		};
		self.send(&response).await;
	}

	async fn send(&mut self, response: &JsonRpcResponse) {
		if let Err(err) = self.writer.write_message(response).await {
			warn!(target = "pw.mcp.transport", transport = "fifo", error = %err, "response dropped");
		}
	}

	async fn serve_stream(mut self, receiver: pipe::Receiver, mut shutdown: watch::Receiver<bool>) {
		let mut reader = BufReader::new(receiver);
		let mut frame = Vec::new();
		loop {
			let read = tokio::select! {
				read = read_frame(&mut reader, &mut frame, MAX_FRAME_BYTES) => read,
				_ = shutdown.wait_for(|stop| *stop) => break,
			};
			match read {
				Ok(Frame::Eof) => {
					// All writers gone; wait for the next one.
					tokio::select! {
						_ = tokio::time::sleep(self.poll_interval) => continue,
						_ = shutdown.wait_for(|stop| *stop) => break,
					}
				}
				Ok(Frame::Line) => self.respond(&frame).await,
				Ok(Frame::Oversized) => {
					let response = oversized_response(&self.dispatcher, MAX_FRAME_BYTES);
					self.send(&response).await;
				}
				Err(err) => {
					warn!(target = "pw.mcp.transport", transport = "fifo", error = %err, "input FIFO read failed");
					break;
				}
			}
		}
		self.dispatcher.close();
	}

	async fn serve_polling(mut self, mut file: File, mut shutdown: watch::Receiver<bool>) {
		let mut frames = PendingFrames::new(MAX_FRAME_BYTES);
		let mut chunk = [0u8; 8192];
		loop {
			match file.read(&mut chunk) {
				Ok(0) => {}
				Ok(n) => {
					for (frame, read) in frames.push(&chunk[..n]) {
						match read {
							Frame::Oversized => {
								let response = oversized_response(&self.dispatcher, MAX_FRAME_BYTES);
								self.send(&response).await;
							}
							_ => self.respond(&frame).await,
						}
					}
					continue;
				}
				Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => {}
				Err(err) => {
					warn!(target = "pw.mcp.transport", transport = "fifo", error = %err, "input FIFO read failed");
					break;
				}
			}
			tokio::select! {
				_ = tokio::time::sleep(self.poll_interval) => {}
				_ = shutdown.wait_for(|stop| *stop) => break,
			}
		}
		self.dispatcher.close();
	}
}

/// Splits polled chunks into newline-terminated frames, dropping any frame
/// that grows past `limit`.
struct PendingFrames {
	buf: Vec<u8>,
	limit: usize,
	discarding: bool,
}

impl PendingFrames {
	fn new(limit: usize) -> Self {
		Self {
			buf: Vec::new(),
			limit,
			discarding: false,
		}
	}

	/// Returns every frame completed by `chunk`.
	fn push(&mut self, mut chunk: &[u8]) -> Vec<(Vec<u8>, Frame)> {
		let mut complete = Vec::new();
		while !chunk.is_empty() {
			let newline = chunk.iter().position(|b| *b == b'\n');
			let take = newline.map_or(chunk.len(), |at| at + 1);
			if !self.discarding {
				if self.buf.len() + take > self.limit {
					self.discarding = true;
					self.buf.clear();
				} else {
					self.buf.extend_from_slice(&chunk[..take]);
				}
			}
			chunk = &chunk[take..];
			if newline.is_some() {
				if std::mem::take(&mut self.discarding) {
					complete.push((Vec::new(), Frame::Oversized));
				} else {
					complete.push((std::mem::take(&mut self.buf), Frame::Line));
				}
			}
		}
		complete
	}
}

fn receiver_options() -> pipe::OpenOptions {
	#[allow(unused_mut)]
	let mut options = pipe::OpenOptions::new();
	// Holding a write end keeps reads from reporting EOF between clients.
	#[cfg(target_os = "linux")]
	options.read_write(true);
	options
}

/// Creates `path` as a 0600 FIFO when missing. Returns whether it was created.
pub(crate) fn ensure_fifo(path: &Path) -> Result<bool> {
	match std::fs::metadata(path) {
		Ok(meta) if meta.file_type().is_fifo() => Ok(false),
		Ok(_) => Err(ServerError::NotAFifo(path.to_path_buf())),
		Err(err) if err.kind() == ErrorKind::NotFound => {
			let mkfifo_error = |source| ServerError::Mkfifo {
				path: path.to_path_buf(),
				source,
			};
			let c_path = CString::new(path.as_os_str().as_bytes())
				.map_err(|e| mkfifo_error(std::io::Error::new(ErrorKind::InvalidInput, e)))?;
			let rc = unsafe { libc::mkfifo(c_path.as_ptr(), 0o600) };
			if rc != 0 {
				return Err(mkfifo_error(std::io::Error::last_os_error()));
			}
			debug!(target = "pw.mcp.transport", fifo = %path.display(), "created FIFO");
			Ok(true)
		}
		Err(source) => Err(ServerError::FifoOpen {
			path: path.to_path_buf(),
			source,
		}),
	}
}

fn is_retryable(err: &std::io::Error) -> bool {
	err.raw_os_error() == Some(libc::ENXIO) || matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted)
}

/// Retries `attempt` while no reader is present, backing off from
/// `retry_base` by `retry_multiplier` up to `retry_max_delay`, until
/// `open_timeout` is spent.
pub(crate) async fn open_with_backoff<T, F>(path: &Path, options: &FifoOptions, mut attempt: F) -> Result<T>
where
	F: FnMut() -> std::io::Result<T>,
{
	let started = Instant::now();
	let mut delay = options.retry_base;
	let mut attempts = 0u32;
	loop {
		attempts += 1;
		match attempt() {
			Ok(value) => {
				if attempts > 1 {
					debug!(target = "pw.mcp.transport", fifo = %path.display(), attempts, "FIFO opened after retries");
				}
				return Ok(value);
			}
			Err(err) if is_retryable(&err) => {}
			Err(source) => {
				return Err(ServerError::FifoOpen {
					path: path.to_path_buf(),
					source,
				});
			}
		}

		let elapsed = started.elapsed();
		if elapsed >= options.open_timeout {
			return Err(ServerError::FifoOpenTimeout {
				path: path.to_path_buf(),
				waited_ms: elapsed.as_millis() as u64,
			});
		}
		tokio::time::sleep(delay.min(options.open_timeout - elapsed)).await;
		delay = delay.mul_f64(options.retry_multiplier).min(options.retry_max_delay);
	}
}

#[cfg(test)]
mod tests {
	use std::cell::Cell;

	use super::*;

	fn enxio() -> std::io::Error {
		std::io::Error::from_raw_os_error(libc::ENXIO)
	}

	#[tokio::test(start_paused = true)]
	async fn backoff_gives_up_after_budget() {
		let options = FifoOptions::default();
		let calls = Cell::new(0u32);
		let started = Instant::now();

		let err = open_with_backoff(Path::new("/tmp/out"), &options, || {
			calls.set(calls.get() + 1);
			Err::<(), _>(enxio())
		})
		.await
		.unwrap_err();

		match err {
			ServerError::FifoOpenTimeout { waited_ms, .. } => assert!((5000..5020).contains(&waited_ms)),
			other => panic!("unexpected error: {other}"),
		}
		assert!(started.elapsed() >= Duration::from_secs(5));
		// 50, 75, 112.5, ... capped at 1000ms: eleven sleeps fill 5s.
		assert_eq!(calls.get(), 12);
	}

	#[tokio::test(start_paused = true)]
	async fn backoff_grows_until_reader_appears() {
		let options = FifoOptions::default();
		let calls = Cell::new(0u32);
		let started = Instant::now();

		let opened = open_with_backoff(Path::new("/tmp/out"), &options, || {
			calls.set(calls.get() + 1);
			if calls.get() < 4 { Err(enxio()) } else { Ok("open") }
		})
		.await
		.unwrap();

		assert_eq!(opened, "open");
		// 50 + 75 + 112.5
		let elapsed = started.elapsed();
		assert!(elapsed >= Duration::from_micros(237_500));
		assert!(elapsed < Duration::from_millis(245));
	}

	#[tokio::test(start_paused = true)]
	async fn other_errors_fail_immediately() {
		let err = open_with_backoff(Path::new("/tmp/out"), &FifoOptions::default(), || {
			Err::<(), _>(std::io::Error::from(ErrorKind::PermissionDenied))
		})
		.await
		.unwrap_err();
		assert!(matches!(err, ServerError::FifoOpen { .. }));
	}

	#[test]
	fn polled_chunks_reassemble_and_drop_oversized_frames() {
		let mut frames = PendingFrames::new(8);
		assert!(frames.push(b"ab").is_empty());

		let done = frames.push(b"c\n0123456789");
		assert_eq!(done, vec![(b"abc\n".to_vec(), Frame::Line)]);

		let done = frames.push(b"abc\n\xff\n");
		assert_eq!(done, vec![(Vec::new(), Frame::Oversized), (b"\xff\n".to_vec(), Frame::Line)]);
	}

	#[test]
	fn ensure_fifo_creates_once_and_rejects_regular_files() {
		let dir = tempfile::tempdir().unwrap();
		let fifo = dir.path().join("in");
		assert!(ensure_fifo(&fifo).unwrap());
		assert!(!ensure_fifo(&fifo).unwrap());

		use std::os::unix::fs::PermissionsExt;
		let mode = std::fs::metadata(&fifo).unwrap().permissions().mode() & 0o777;
		assert_eq!(mode & 0o077, 0);

		let regular = dir.path().join("plain");
		std::fs::write(&regular, b"").unwrap();
		assert!(matches!(ensure_fifo(&regular), Err(ServerError::NotAFifo(_))));
	}
}
