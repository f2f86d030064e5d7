//! Minimal Chrome DevTools Protocol client over WebSocket.
//!
//! A writer task owns the sink and a reader task routes responses back to
//! their callers by command id. Events are ignored.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

use crate::error::InstanceError;

const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>>;

pub struct CdpClient {
	outbound: mpsc::Sender<String>,
	pending: Pending,
	next_id: AtomicU64,
	reader: JoinHandle<()>,
	writer: JoinHandle<()>,
}

impl CdpClient {
	pub async fn connect(ws_url: &str) -> Result<Self, InstanceError> {
		let (stream, _) = connect_async(ws_url)
			.await
			.map_err(|e| InstanceError::Cdp(format!("failed to connect to {ws_url}: {e}")))?;
		let (mut sink, mut source) = stream.split();

		let (outbound, mut outbound_rx) = mpsc::channel::<String>(64);
		let pending: Pending = Arc::new(Mutex::new(HashMap::new()));

		let writer = tokio::spawn(async move {
			while let Some(text) = outbound_rx.recv().await {
				if let Err(e) = sink.send(Message::text(text)).await {
					debug!(target = "pw.mcp.pool", error = %e, "CDP write failed");
					break;
				}
			}
		});

		let routes = Arc::clone(&pending);
		let reader = tokio::spawn(async move {
			while let Some(frame) = source.next().await {
				match frame {
					Ok(Message::Text(text)) => {
						let Ok(value) = serde_json::from_str::<Value>(&text) else {
							continue;
						};
						let Some(id) = value.get("id").and_then(Value::as_u64) else {
							continue;
						};
						if let Some(reply) = routes.lock().remove(&id) {
							let _ = reply.send(value);
						}
					}
					Ok(Message::Close(_)) => break,
					Ok(_) => {}
					Err(e) => {
						debug!(target = "pw.mcp.pool", error = %e, "CDP read failed");
						break;
					}
				}
			}
			// Wake every waiter; their senders drop here.
			routes.lock().clear();
		});

		Ok(Self {
			outbound,
			pending,
			next_id: AtomicU64::new(1),
			reader,
			writer,
		})
	}

	/// Sends one command and waits for its result.
	pub async fn send(&self, method: &str, params: Value) -> Result<Value, InstanceError> {
		let id = self.next_id.fetch_add(1, Ordering::Relaxed);
		let (tx, rx) = oneshot::channel();
		self.pending.lock().insert(id, tx);

		let message = json!({ "id": id, "method": method, "params": params }).to_string();
		if self.outbound.send(message).await.is_err() {
			self.pending.lock().remove(&id);
			return Err(InstanceError::Cdp("connection closed".into()));
		}

		let response = match tokio::time::timeout(COMMAND_TIMEOUT, rx).await {
			Ok(Ok(response)) => response,
			Ok(Err(_)) => return Err(InstanceError::Cdp("connection closed".into())),
			Err(_) => {
				self.pending.lock().remove(&id);
				return Err(InstanceError::Timeout(format!(
					"CDP command '{method}' after {}s",
					COMMAND_TIMEOUT.as_secs()
				)));
			}
		};

		if let Some(error) = response.get("error") {
			let message = error.get("message").and_then(Value::as_str).unwrap_or("unknown error");
			return Err(InstanceError::Cdp(format!("{method}: {message}")));
		}
		Ok(response.get("result").cloned().unwrap_or(Value::Null))
	}

	/// Evaluates `expression` in the page and returns its value.
	pub async fn evaluate(&self, expression: &str) -> Result<Value, InstanceError> {
		let result = self
			.send(
				"Runtime.evaluate",
				json!({
					"expression": expression,
					"returnByValue": true,
					"awaitPromise": true,
				}),
			)
			.await?;
		if let Some(details) = result.get("exceptionDetails") {
			let text = details
				.pointer("/exception/description")
				.or_else(|| details.get("text"))
				.and_then(Value::as_str)
				.unwrap_or("evaluation threw");
			return Err(InstanceError::Cdp(text.to_string()));
		}
		Ok(result.pointer("/result/value").cloned().unwrap_or(Value::Null))
	}
}

impl Drop for CdpClient {
	fn drop(&mut self) {
		self.reader.abort();
		self.writer.abort();
	}
}
