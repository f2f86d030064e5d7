//! Newline-delimited JSON-RPC framing shared by the stream transports.

use pw_mcp_protocol::{
	CallerIdentity, Dispatcher, JsonRpcError, JsonRpcResponse, parse_envelope, recover_id,
};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tracing::{debug, warn};

/// Longest accepted message, newline included.
pub(crate) const MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

/// Outcome of reading one newline-delimited frame.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Frame {
	Line,
	/// The frame exceeded the limit and was discarded up to its newline.
	Oversized,
	Eof,
}

/// Reads bytes up to and including the next newline into `buf`.
///
/// A frame longer than `limit` is skipped rather than buffered. Bytes left
/// before EOF without a newline still count as a line.
pub(crate) async fn read_frame<R>(reader: &mut R, buf: &mut Vec<u8>, limit: usize) -> std::io::Result<Frame>
where
	R: AsyncBufRead + Unpin,
{
	buf.clear();
	let mut oversized = false;
	loop {
		let available = reader.fill_buf().await?;
		if available.is_empty() {
			return Ok(match (oversized, buf.is_empty()) {
				(true, _) => Frame::Oversized,
				(false, true) => Frame::Eof,
				(false, false) => Frame::Line,
			});
		}
		let newline = available.iter().position(|b| *b == b'\n');
		let take = newline.map_or(available.len(), |at| at + 1);
		if !oversized {
			if buf.len() + take > limit {
				oversized = true;
				buf.clear();
			} else {
				buf.extend_from_slice(&available[..take]);
			}
		}
		reader.consume(take);
		if newline.is_some() {
			return Ok(if oversized { Frame::Oversized } else { Frame::Line });
		}
	}
}

/// Decodes and dispatches one raw frame. Bytes that are not UTF-8 get a
/// parse error.
pub(crate) async fn handle_frame(frame: &[u8], dispatcher: &Dispatcher, identity: &CallerIdentity) -> Option<JsonRpcResponse> {
	match std::str::from_utf8(frame) {
		Ok(line) => handle_line(line, dispatcher, identity).await,
		Err(err) => {
			warn!(target = "pw.mcp.transport", transport = dispatcher.transport(), error = %err, "message is not UTF-8");
			Some(JsonRpcResponse::err(None, JsonRpcError::parse_error(err)))
		}
	}
}

/// Reply for a frame that was dropped for exceeding `limit`.
pub(crate) fn oversized_response(dispatcher: &Dispatcher, limit: usize) -> JsonRpcResponse {
	warn!(target = "pw.mcp.transport", transport = dispatcher.transport(), limit, "oversized message dropped");
	JsonRpcResponse::err(None, JsonRpcError::invalid_request(format!("message exceeds {limit} bytes")))
}

/// Decodes and dispatches one line. `None` means nothing is written back.
pub(crate) async fn handle_line(line: &str, dispatcher: &Dispatcher, identity: &CallerIdentity) -> Option<JsonRpcResponse> {
	let line = line.trim();
	if line.is_empty() {
		return None;
	}

	let value: Value = match serde_json::from_str(line) {
		Ok(value) => value,
		Err(err) => {
			warn!(target = "pw.mcp.transport", transport = dispatcher.transport(), error = %err, "unparseable message");
			return Some(JsonRpcResponse::err(None, JsonRpcError::parse_error(err)));
		}
	};

	let request = match parse_envelope(&value) {
		Ok(request) => request,
		Err(err) => {
			warn!(target = "pw.mcp.transport", transport = dispatcher.transport(), error = %err, "invalid envelope");
			return Some(JsonRpcResponse::err(recover_id(&value), err.to_rpc_error()));
		}
	};

	dispatcher.handle(request, identity.context(dispatcher.transport())).await
}

/// Writes one response line and flushes it.
pub(crate) async fn write_message<W>(writer: &mut W, response: &JsonRpcResponse) -> std::io::Result<()>
where
	W: AsyncWrite + Unpin,
{
	let mut payload = serde_json::to_vec(response)?;
	payload.push(b'\n');
	writer.write_all(&payload).await?;
	writer.flush().await
}

/// Serves requests from `reader` until EOF or shutdown.
///
/// Per-message failures are answered or logged; only I/O errors on the
/// stream itself end the loop.
pub(crate) async fn serve_lines<R, W>(
	mut reader: R,
	mut writer: W,
	dispatcher: &Dispatcher,
	identity: &CallerIdentity,
	mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()>
where
	R: AsyncBufRead + Unpin,
	W: AsyncWrite + Unpin,
{
	let mut frame = Vec::new();
	loop {
		let read = tokio::select! {
			read = read_frame(&mut reader, &mut frame, MAX_FRAME_BYTES) => read?,
			_ = shutdown.wait_for(|stop| *stop) => {
				debug!(target = "pw.mcp.transport", transport = dispatcher.transport(), "stream shutdown requested");
				break;
			}
		};
		let response = match read {
			Frame::Eof => {
				debug!(target = "pw.mcp.transport", transport = dispatcher.transport(), "peer closed stream");
				break;
			}
			Frame::Oversized => Some(oversized_response(dispatcher, MAX_FRAME_BYTES)),
			Frame::Line => handle_frame(&frame, dispatcher, identity).await,
		};
		if let Some(response) = response {
			write_message(&mut writer, &response).await?;
		}
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use pw_mcp_protocol::{Handlers, INVALID_REQUEST, PARSE_ERROR};
	use serde_json::json;

	use super::*;

	fn dispatcher() -> Dispatcher {
		Dispatcher::new("test", Handlers::default())
	}

	#[tokio::test]
	async fn blank_lines_produce_nothing() {
		assert!(handle_line("   \n", &dispatcher(), &CallerIdentity::default()).await.is_none());
	}

	#[tokio::test]
	async fn garbage_is_a_parse_error_with_null_id() {
		let response = handle_line("{not json", &dispatcher(), &CallerIdentity::default()).await.unwrap();
		assert_eq!(response.error.unwrap().code, PARSE_ERROR);
		assert!(response.id.is_none());
	}

	#[tokio::test]
	async fn bad_version_keeps_request_id() {
		let line = json!({ "jsonrpc": "1.0", "id": 9, "method": "ping" }).to_string();
		let response = handle_line(&line, &dispatcher(), &CallerIdentity::default()).await.unwrap();
		assert_eq!(response.error.unwrap().code, INVALID_REQUEST);
		assert_eq!(serde_json::to_value(&response.id).unwrap(), json!(9));
	}

	#[tokio::test]
	async fn invalid_utf8_is_a_parse_error() {
		let response = handle_frame(b"\xff\xfe garbage\n", &dispatcher(), &CallerIdentity::default()).await.unwrap();
		assert_eq!(response.error.unwrap().code, PARSE_ERROR);
		assert!(response.id.is_none());
	}

	#[tokio::test]
	async fn frames_split_on_newlines_and_skip_oversized() {
		let input: &[u8] = b"short\nthis line is far too long\nok\ntail";
		let mut reader = tokio::io::BufReader::with_capacity(4, input);
		let mut buf = Vec::new();

		assert_eq!(read_frame(&mut reader, &mut buf, 10).await.unwrap(), Frame::Line);
		assert_eq!(buf, b"short\n");
		assert_eq!(read_frame(&mut reader, &mut buf, 10).await.unwrap(), Frame::Oversized);
		assert!(buf.is_empty());
		assert_eq!(read_frame(&mut reader, &mut buf, 10).await.unwrap(), Frame::Line);
		assert_eq!(buf, b"ok\n");
		assert_eq!(read_frame(&mut reader, &mut buf, 10).await.unwrap(), Frame::Line);
		assert_eq!(buf, b"tail");
		assert_eq!(read_frame(&mut reader, &mut buf, 10).await.unwrap(), Frame::Eof);
	}

	#[tokio::test]
	async fn oversized_frame_gets_invalid_request_and_stream_continues() {
		let dispatcher = dispatcher();
		let mut input = vec![b'x'; MAX_FRAME_BYTES + 1];
		input.push(b'\n');
		input.extend_from_slice(json!({ "jsonrpc": "2.0", "id": 4, "method": "ping" }).to_string().as_bytes());
		input.push(b'\n');
		let mut output = Vec::new();
		let (_stop, shutdown) = watch::channel(false);

		serve_lines(&input[..], &mut output, &dispatcher, &CallerIdentity::default(), shutdown).await.unwrap();

		let replies: Vec<serde_json::Value> = output
			.split(|b| *b == b'\n')
			.filter(|line| !line.is_empty())
			.map(|line| serde_json::from_slice(line).unwrap())
			.collect();
		assert_eq!(replies.len(), 2);
		assert_eq!(replies[0]["error"]["code"], INVALID_REQUEST);
		assert!(replies[0]["id"].is_null());
		assert_eq!(replies[1]["id"], 4);
		assert_eq!(replies[1]["result"], json!({}));
	}
}
