mod common;

use std::os::unix::fs::{FileTypeExt, PermissionsExt};
use std::time::Duration;

use pw_mcp::ServerError;
use pw_mcp::transport::{FifoMode, FifoOptions, FifoTransport, StdioTransport, Transport, UnixSocketTransport};
use serde_json::{Value, json};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::net::unix::pipe;

use common::{call, identity, initialize, mock_app, request};

const READ_TIMEOUT: Duration = Duration::from_secs(5);

async fn send<W: AsyncWrite + Unpin>(writer: &mut W, message: &Value) {
	let mut line = message.to_string();
	line.push('\n');
	writer.write_all(line.as_bytes()).await.unwrap();
	writer.flush().await.unwrap();
}

async fn send_raw<W: AsyncWrite + Unpin>(writer: &mut W, raw: &str) {
	writer.write_all(raw.as_bytes()).await.unwrap();
	writer.flush().await.unwrap();
}

async fn recv<R: AsyncBufRead + Unpin>(reader: &mut R) -> Value {
	let mut line = String::new();
	let read = tokio::time::timeout(READ_TIMEOUT, reader.read_line(&mut line))
		.await
		.expect("timed out waiting for a response")
		.unwrap();
	assert!(read > 0, "stream closed before a response arrived");
	serde_json::from_str(&line).unwrap()
}

#[tokio::test]
async fn stdio_serves_until_eof() {
	let app = mock_app().await;
	let (client, server) = tokio::io::duplex(64 * 1024);
	let (server_read, server_write) = tokio::io::split(server);
	let transport = StdioTransport::with_io(identity("alpha"), server_read, server_write);
	transport.set_handlers(app.handlers());
	transport.initialize().await.unwrap();
	transport.start().await.unwrap();
	assert!(transport.is_running());

	let (client_read, mut client_write) = tokio::io::split(client);
	let mut client_read = BufReader::new(client_read);

	send(&mut client_write, &initialize(1)).await;
	let response = recv(&mut client_read).await;
	assert_eq!(response["id"], 1);
	assert_eq!(response["result"]["serverInfo"]["name"], "pw-mcp");

	// Blank lines and notifications produce nothing; the next reply is the parse error.
	send_raw(&mut client_write, "\n   \n").await;
	send(&mut client_write, &json!({ "jsonrpc": "2.0", "method": "notifications/initialized" })).await;
	send_raw(&mut client_write, "{not json\n").await;
	let response = recv(&mut client_read).await;
	assert_eq!(response["error"]["code"], -32700);
	assert!(response["id"].is_null());

	send(&mut client_write, &json!({ "jsonrpc": "2.0", "id": 2, "method": 5 })).await;
	let response = recv(&mut client_read).await;
	assert_eq!(response["id"], 2);
	assert_eq!(response["error"]["code"], -32600);

	send(&mut client_write, &call(3, "browser_create", json!({}))).await;
	let response = recv(&mut client_read).await;
	assert_eq!(response["result"]["isError"], false);
	assert_eq!(response["result"]["structuredContent"]["metadata"]["teamId"], "alpha");

	client_write.shutdown().await.unwrap();
	tokio::time::timeout(READ_TIMEOUT, transport.wait()).await.unwrap();
	assert!(!transport.is_running());

	// The process streams can only be served once.
	assert!(matches!(transport.start().await, Err(ServerError::StreamConsumed(_))));
	transport.stop().await.unwrap();
}

#[tokio::test]
async fn stdio_survives_non_utf8_input() {
	let app = mock_app().await;
	let (client, server) = tokio::io::duplex(16 * 1024);
	let (server_read, server_write) = tokio::io::split(server);
	let transport = StdioTransport::with_io(identity("alpha"), server_read, server_write);
	transport.set_handlers(app.handlers());
	transport.initialize().await.unwrap();
	transport.start().await.unwrap();

	let (client_read, mut client_write) = tokio::io::split(client);
	let mut client_read = BufReader::new(client_read);

	client_write.write_all(b"\xff\xfe garbage\n").await.unwrap();
	send(&mut client_write, &initialize(1)).await;

	let response = recv(&mut client_read).await;
	assert_eq!(response["error"]["code"], -32700);
	assert!(response["id"].is_null());
	let response = recv(&mut client_read).await;
	assert_eq!(response["id"], 1);
	assert_eq!(response["result"]["serverInfo"]["name"], "pw-mcp");
	assert!(transport.is_running());

	transport.stop().await.unwrap();
}

#[tokio::test]
async fn stdio_requires_initialize() {
	let (_client, server) = tokio::io::duplex(1024);
	let (server_read, server_write) = tokio::io::split(server);
	let transport = StdioTransport::with_io(identity("alpha"), server_read, server_write);
	assert!(matches!(transport.start().await, Err(ServerError::NotInitialized(_))));
	assert!(!transport.is_running());
}

#[tokio::test]
async fn socket_serves_clients_independently() {
	let app = mock_app().await;
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("mcp.sock");
	let transport = UnixSocketTransport::new(&path, identity("alpha"));
	transport.set_handlers(app.handlers());
	transport.initialize().await.unwrap();

	let mode = std::fs::metadata(&path).unwrap().permissions().mode();
	assert_eq!(mode & 0o777, 0o600);

	transport.start().await.unwrap();

	let first = UnixStream::connect(&path).await.unwrap();
	let second = UnixStream::connect(&path).await.unwrap();
	let (first_read, mut first_write) = first.into_split();
	let (second_read, mut second_write) = second.into_split();
	let mut first_read = BufReader::new(first_read);
	let mut second_read = BufReader::new(second_read);

	// tools/list is accepted before the handshake.
	send(&mut first_write, &request(1, "tools/list", json!({}))).await;
	send(&mut second_write, &initialize(1)).await;

	let listed = recv(&mut first_read).await;
	assert_eq!(listed["result"]["tools"].as_array().unwrap().len(), 8);
	let initialized = recv(&mut second_read).await;
	assert_eq!(initialized["result"]["protocolVersion"], "2025-03-26");

	drop(first_write);
	drop(first_read);
	send(&mut second_write, &request(2, "ping", json!({}))).await;
	assert_eq!(recv(&mut second_read).await["result"], json!({}));

	transport.stop().await.unwrap();
	assert!(!transport.is_running());
	assert!(!path.exists());
}

#[tokio::test]
async fn socket_stop_closes_connected_clients() {
	let app = mock_app().await;
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("mcp.sock");
	let transport = UnixSocketTransport::new(&path, identity("alpha"));
	transport.set_handlers(app.handlers());
	transport.initialize().await.unwrap();
	transport.start().await.unwrap();

	let (read, mut write) = UnixStream::connect(&path).await.unwrap().into_split();
	let mut read = BufReader::new(read);
	send(&mut write, &request(1, "ping", json!({}))).await;
	assert_eq!(recv(&mut read).await["id"], 1);

	// The client stays connected while the transport stops.
	tokio::time::timeout(READ_TIMEOUT, transport.stop()).await.unwrap().unwrap();
	assert!(!transport.is_running());

	let mut rest = String::new();
	let read = tokio::time::timeout(READ_TIMEOUT, read.read_line(&mut rest)).await.unwrap().unwrap();
	assert_eq!(read, 0);
	assert!(!path.exists());
}

#[tokio::test]
async fn socket_replaces_stale_file() {
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("stale.sock");
	drop(std::os::unix::net::UnixListener::bind(&path).unwrap());
	assert!(std::fs::symlink_metadata(&path).unwrap().file_type().is_socket());

	let app = mock_app().await;
	let transport = UnixSocketTransport::new(&path, identity("alpha"));
	transport.set_handlers(app.handlers());
	transport.initialize().await.unwrap();
	transport.start().await.unwrap();

	let stream = UnixStream::connect(&path).await.unwrap();
	let (read, mut write) = stream.into_split();
	let mut read = BufReader::new(read);
	send(&mut write, &request(7, "ping", json!({}))).await;
	assert_eq!(recv(&mut read).await["id"], 7);

	transport.stop().await.unwrap();
}

#[tokio::test]
async fn socket_refuses_regular_file() {
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("not-a-socket");
	std::fs::write(&path, b"data").unwrap();

	let transport = UnixSocketTransport::new(&path, identity("alpha"));
	assert!(matches!(transport.initialize().await, Err(ServerError::Bind { .. })));
	assert!(path.is_file());

	// Stopping after a refused bind leaves the foreign file alone.
	transport.stop().await.unwrap();
	assert_eq!(std::fs::read(&path).unwrap(), b"data");
}

fn fifo_options(force_polling: bool) -> FifoOptions {
	FifoOptions {
		open_timeout: Duration::from_secs(2),
		poll_interval: Duration::from_millis(20),
		force_polling,
		..FifoOptions::default()
	}
}

async fn fifo_round_trip(force_polling: bool, expected: FifoMode) {
	let app = mock_app().await;
	let dir = tempfile::tempdir().unwrap();
	let input = dir.path().join("in");
	let output = dir.path().join("out");
	let transport = FifoTransport::new(&input, &output, identity("alpha"), fifo_options(force_polling));
	transport.set_handlers(app.handlers());
	transport.initialize().await.unwrap();
	assert!(std::fs::metadata(&input).unwrap().file_type().is_fifo());
	assert!(std::fs::metadata(&output).unwrap().file_type().is_fifo());
	assert_eq!(transport.mode(), None);

	// The server cannot open its write end until a reader exists.
	let responses = pipe::OpenOptions::new().open_receiver(&output).unwrap();
	transport.start().await.unwrap();
	assert_eq!(transport.mode(), Some(expected));

	let mut requests = pipe::OpenOptions::new().open_sender(&input).unwrap();
	let mut responses = BufReader::new(responses);

	send(&mut requests, &initialize(1)).await;
	let response = recv(&mut responses).await;
	assert_eq!(response["result"]["serverInfo"]["name"], "pw-mcp");

	send(&mut requests, &call(2, "browser_list_sessions", json!({}))).await;
	let response = recv(&mut responses).await;
	assert_eq!(response["id"], 2);
	assert_eq!(response["result"]["structuredContent"]["result"]["teamId"], "alpha");

	drop(requests);
	transport.stop().await.unwrap();
	assert!(!transport.is_running());
	assert!(!input.exists());
	assert!(!output.exists());
}

#[tokio::test]
async fn fifo_stream_mode_round_trip() {
	fifo_round_trip(false, FifoMode::NonBlockingStream).await;
}

#[tokio::test]
async fn fifo_polling_mode_round_trip() {
	fifo_round_trip(true, FifoMode::PollingFallback).await;
}

#[tokio::test]
async fn fifo_start_times_out_without_reader() {
	let app = mock_app().await;
	let dir = tempfile::tempdir().unwrap();
	let input = dir.path().join("in");
	let output = dir.path().join("out");
	let options = FifoOptions {
		open_timeout: Duration::from_millis(200),
		..FifoOptions::default()
	};
	let transport = FifoTransport::new(&input, &output, identity("alpha"), options);
	transport.set_handlers(app.handlers());
	transport.initialize().await.unwrap();

	match transport.start().await {
		Err(ServerError::FifoOpenTimeout { path, waited_ms }) => {
			assert_eq!(path, output);
			assert!(waited_ms >= 200);
		}
		other => panic!("expected open timeout, got {other:?}"),
	}
	assert!(!transport.is_running());

	transport.stop().await.unwrap();
	assert!(!output.exists());
}

#[tokio::test]
async fn fifo_keeps_preexisting_pipes() {
	let dir = tempfile::tempdir().unwrap();
	let input = dir.path().join("in");
	let output = dir.path().join("out");
	for path in [&input, &output] {
		let c_path = std::ffi::CString::new(path.as_os_str().as_encoded_bytes()).unwrap();
		assert_eq!(unsafe { libc::mkfifo(c_path.as_ptr(), 0o600) }, 0);
	}

	let transport = FifoTransport::new(&input, &output, identity("alpha"), fifo_options(false));
	transport.initialize().await.unwrap();
	transport.stop().await.unwrap();
	assert!(input.exists());
	assert!(output.exists());
}

#[tokio::test]
async fn initialize_result_matches_across_streams() {
	let app = mock_app().await;

	let (client, server) = tokio::io::duplex(16 * 1024);
	let (server_read, server_write) = tokio::io::split(server);
	let stdio = StdioTransport::with_io(identity("alpha"), server_read, server_write);
	stdio.set_handlers(app.handlers());
	stdio.initialize().await.unwrap();
	stdio.start().await.unwrap();
	let (client_read, mut client_write) = tokio::io::split(client);
	let mut client_read = BufReader::new(client_read);
	send(&mut client_write, &initialize(1)).await;
	let over_stdio = recv(&mut client_read).await;

	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("mcp.sock");
	let socket = UnixSocketTransport::new(&path, identity("beta"));
	socket.set_handlers(app.handlers());
	socket.initialize().await.unwrap();
	socket.start().await.unwrap();
	let (read, mut write) = UnixStream::connect(&path).await.unwrap().into_split();
	let mut read = BufReader::new(read);
	send(&mut write, &initialize(1)).await;
	let over_socket = recv(&mut read).await;

	assert_eq!(over_stdio, over_socket);

	stdio.stop().await.unwrap();
	socket.stop().await.unwrap();
}
