//! Chromium-backed [`BrowserFactory`].
//!
//! Each instance is a headless Chromium process with its own throwaway
//! profile and remote-debugging port. Health and page counts come from the
//! DevTools HTTP endpoints; tool actions run over a CDP WebSocket attached
//! to the first page target.

use std::net::TcpListener as StdTcpListener;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::cdp::CdpClient;
use crate::error::InstanceError;
use crate::inspect::ProcessInspector;
use crate::instance::{BrowserFactory, BrowserInstance, BrowserKind, InstanceState};

/// Overrides executable discovery.
pub const CHROME_ENV: &str = "PW_MCP_CHROME";

const PORT_RANGE_START: u16 = 9222;
const PORT_RANGE_END: u16 = 10221;
const POLL_INTERVAL: Duration = Duration::from_millis(200);
const READY_STATE_POLL: Duration = Duration::from_millis(100);
const NAVIGATION_TIMEOUT: Duration = Duration::from_secs(30);
const QUERY_LIMIT: usize = 50;

/// How browsers are launched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BrowserSettings {
	/// Explicit executable; discovered when absent.
	pub executable: Option<PathBuf>,
	pub headless: bool,
	pub port_range_start: u16,
	pub port_range_end: u16,
	#[serde(rename = "launchTimeoutMs", with = "launch_timeout_ms")]
	pub launch_timeout: Duration,
	pub extra_args: Vec<String>,
}

impl Default for BrowserSettings {
	fn default() -> Self {
		Self {
			executable: None,
			headless: true,
			port_range_start: PORT_RANGE_START,
			port_range_end: PORT_RANGE_END,
			launch_timeout: Duration::from_secs(10),
			extra_args: Vec::new(),
		}
	}
}

mod launch_timeout_ms {
	use std::time::Duration;

	use serde::{Deserialize, Deserializer, Serializer};

	pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
		u64::deserialize(deserializer).map(Duration::from_millis)
	}
}

/// `/json/version` response subset.
#[derive(Debug, Deserialize)]
pub struct CdpVersionInfo {
	#[serde(rename = "webSocketDebuggerUrl")]
	pub web_socket_debugger_url: String,
	#[serde(rename = "Browser")]
	pub browser: Option<String>,
}

/// `/json/list` entry subset.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TargetInfo {
	#[serde(rename = "type")]
	kind: String,
	web_socket_debugger_url: Option<String>,
}

pub struct ChromeFactory {
	settings: BrowserSettings,
	executable: Option<PathBuf>,
	http: reqwest::Client,
	inspector: ProcessInspector,
	port_cursor: AtomicUsize,
}

impl ChromeFactory {
	pub fn new(settings: BrowserSettings) -> Result<Self, InstanceError> {
		if settings.port_range_start > settings.port_range_end {
			return Err(InstanceError::LaunchFailed(format!(
				"invalid port range {}-{}",
				settings.port_range_start, settings.port_range_end
			)));
		}
		let http = reqwest::Client::builder()
			.timeout(Duration::from_millis(400))
			.build()
			.map_err(|e| InstanceError::LaunchFailed(format!("failed to create HTTP client: {e}")))?;
		let executable = settings.executable.clone().or_else(find_chrome_executable);
		let inspector = ProcessInspector::detect();
		debug!(
			target = "pw.mcp.pool",
			executable = ?executable,
			inspector = inspector.is_available(),
			"chrome factory ready"
		);
		Ok(Self {
			settings,
			executable,
			http,
			inspector,
			port_cursor: AtomicUsize::new(0),
		})
	}

	pub fn executable(&self) -> Option<&Path> {
		self.executable.as_deref()
	}

	/// Next free port, scanning the range from a rotating start so that
	/// concurrent launches do not race for the same port.
	fn next_free_port(&self) -> Result<u16, InstanceError> {
		let start = self.settings.port_range_start;
		let end = self.settings.port_range_end;
		let span = usize::from(end - start) + 1;
		let offset = self.port_cursor.fetch_add(1, Ordering::Relaxed);
		(0..span)
			.map(|i| start + (offset.wrapping_add(i) % span) as u16)
			.find(|port| port_available(*port))
			.ok_or(InstanceError::NoFreePort { start, end })
	}

	async fn launch(&self, executable: &Path, port: u16, profile: &TempDir) -> Result<Child, InstanceError> {
		let mut args = vec![
			format!("--remote-debugging-port={port}"),
			format!("--user-data-dir={}", profile.path().display()),
			"--no-first-run".to_string(),
			"--no-default-browser-check".to_string(),
			"--disable-background-networking".to_string(),
		];
		if self.settings.headless {
			args.push("--headless=new".to_string());
		}
		args.extend(self.settings.extra_args.iter().cloned());
		args.push("about:blank".to_string());

		let mut cmd = Command::new(executable);
		cmd.args(&args)
			.stdin(Stdio::null())
			.stdout(Stdio::null())
			.stderr(Stdio::null())
			.kill_on_drop(true);
		#[cfg(unix)]
		cmd.process_group(0);

		let mut child = cmd
			.spawn()
			.map_err(|e| InstanceError::LaunchFailed(format!("failed to launch {}: {e}", executable.display())))?;

		let attempts = (self.settings.launch_timeout.as_millis() / POLL_INTERVAL.as_millis()).max(1);
		let mut last_error = "endpoint not reachable".to_string();
		for _ in 0..attempts {
			tokio::time::sleep(POLL_INTERVAL).await;

			if let Ok(Some(status)) = child.try_wait() {
				return Err(InstanceError::LaunchFailed(format!(
					"browser exited before the debugging endpoint became available (status: {status})"
				)));
			}

			match fetch_cdp_version(&self.http, port).await {
				Ok(info) => {
					debug!(target = "pw.mcp.pool", port, browser = ?info.browser, "debugging endpoint up");
					return Ok(child);
				}
				Err(e) => last_error = e.to_string(),
			}
		}

		abandon(child, port).await;
		Err(InstanceError::LaunchFailed(format!(
			"debugging endpoint not available on port {port} after {}ms: {last_error}",
			self.settings.launch_timeout.as_millis()
		)))
	}
}

#[async_trait]
impl BrowserFactory for ChromeFactory {
	async fn create(&self, team_id: Option<&str>, kind: Option<BrowserKind>) -> Result<Arc<dyn BrowserInstance>, InstanceError> {
		let kind = kind.unwrap_or_default();
		if kind != BrowserKind::Chromium {
			return Err(InstanceError::Unsupported(kind));
		}
		let executable = self.executable.as_deref().ok_or(InstanceError::ExecutableNotFound)?;

		let profile = tempfile::Builder::new().prefix("pw-mcp-profile-").tempdir()?;
		let port = self.next_free_port()?;
		let child = self.launch(executable, port, &profile).await?;

		let instance = ChromeInstance {
			id: uuid::Uuid::new_v4().to_string(),
			team_id: team_id.map(str::to_string),
			port,
			state: InstanceState::new(),
			child: Mutex::new(Some(child)),
			profile: Mutex::new(Some(profile)),
			cdp: Mutex::new(None),
			http: self.http.clone(),
			inspector: self.inspector.clone(),
		};
		instance.refresh_page_count().await;
		info!(target = "pw.mcp.pool", instance = %instance.id, port, team = ?team_id, "chromium launched");
		Ok(Arc::new(instance))
	}
}

pub struct ChromeInstance {
	id: String,
	team_id: Option<String>,
	port: u16,
	state: InstanceState,
	child: Mutex<Option<Child>>,
	profile: Mutex<Option<TempDir>>,
	cdp: Mutex<Option<Arc<CdpClient>>>,
	http: reqwest::Client,
	inspector: ProcessInspector,
}

impl ChromeInstance {
	pub fn port(&self) -> u16 {
		self.port
	}

	async fn page_targets(&self) -> Result<Vec<TargetInfo>, InstanceError> {
		let targets: Vec<TargetInfo> = self
			.http
			.get(format!("http://127.0.0.1:{}/json/list", self.port))
			.send()
			.await
			.map_err(|e| InstanceError::Cdp(e.to_string()))?
			.json()
			.await
			.map_err(|e| InstanceError::Cdp(format!("failed to parse target list: {e}")))?;
		Ok(targets.into_iter().filter(|t| t.kind == "page").collect())
	}

	async fn refresh_page_count(&self) {
		match self.page_targets().await {
			Ok(pages) => self.state.set_page_count(pages.len()),
			Err(e) => debug!(target = "pw.mcp.pool", instance = %self.id, error = %e, "page count refresh failed"),
		}
	}

	/// CDP session on the first page target, opening one if needed.
	async fn session(&self) -> Result<Arc<CdpClient>, InstanceError> {
		let mut slot = self.cdp.lock().await;
		if let Some(client) = slot.as_ref() {
			return Ok(Arc::clone(client));
		}

		let mut ws_url = self
			.page_targets()
			.await?
			.into_iter()
			.find_map(|t| t.web_socket_debugger_url);
		if ws_url.is_none() {
			let created: TargetInfo = self
				.http
				.put(format!("http://127.0.0.1:{}/json/new?about:blank", self.port))
				.send()
				.await
				.map_err(|e| InstanceError::Cdp(e.to_string()))?
				.json()
				.await
				.map_err(|e| InstanceError::Cdp(format!("failed to parse new target: {e}")))?;
			ws_url = created.web_socket_debugger_url;
		}
		let ws_url = ws_url.ok_or_else(|| InstanceError::Cdp("no page target exposes a WebSocket URL".into()))?;

		let client = Arc::new(CdpClient::connect(&ws_url).await?);
		client.send("Page.enable", json!({})).await?;
		*slot = Some(Arc::clone(&client));
		Ok(client)
	}

	async fn navigate(&self, cdp: &CdpClient, args: &Value) -> Result<Value, InstanceError> {
		let url = required_str(args, "url", "navigate")?;
		let result = cdp.send("Page.navigate", json!({ "url": url })).await?;
		if let Some(error) = result.get("errorText").and_then(Value::as_str) {
			return Err(InstanceError::Cdp(format!("navigation to {url} failed: {error}")));
		}

		let deadline = tokio::time::Instant::now() + NAVIGATION_TIMEOUT;
		loop {
			if cdp.evaluate("document.readyState").await?.as_str() == Some("complete") {
				break;
			}
			if tokio::time::Instant::now() >= deadline {
				return Err(InstanceError::Timeout(format!("navigation to {url}")));
			}
			tokio::time::sleep(READY_STATE_POLL).await;
		}

		let page = cdp.evaluate("({ url: location.href, title: document.title })").await?;
		Ok(json!({
			"url": page.get("url").cloned().unwrap_or_else(|| json!(url)),
			"title": page.get("title").cloned().unwrap_or(Value::Null),
		}))
	}

	async fn click(&self, cdp: &CdpClient, args: &Value) -> Result<Value, InstanceError> {
		let selector = required_str(args, "selector", "click")?;
		let script = format!(
			"(() => {{ const el = document.querySelector({}); if (!el) return false; el.click(); return true; }})()",
			js_string(selector)
		);
		if cdp.evaluate(&script).await?.as_bool() != Some(true) {
			return Err(InstanceError::Cdp(format!("no element matches selector '{selector}'")));
		}
		Ok(json!({ "clicked": selector }))
	}

	async fn query(&self, cdp: &CdpClient, args: &Value) -> Result<Value, InstanceError> {
		let selector = required_str(args, "selector", "query")?;
		let script = format!(
			"Array.from(document.querySelectorAll({})).slice(0, {QUERY_LIMIT}).map(el => ({{ \
			 tag: el.tagName.toLowerCase(), text: (el.innerText || '').trim().slice(0, 200), \
			 id: el.id || null, href: el.getAttribute('href') }}))",
			js_string(selector)
		);
		let elements = cdp.evaluate(&script).await?;
		let count = elements.as_array().map_or(0, Vec::len);
		Ok(json!({ "selector": selector, "count": count, "elements": elements }))
	}

	async fn screenshot(&self, cdp: &CdpClient, args: &Value) -> Result<Value, InstanceError> {
		let full_page = args.get("fullPage").and_then(Value::as_bool).unwrap_or(false);
		let mut params = json!({ "format": "png" });
		if full_page {
			params["captureBeyondViewport"] = json!(true);
		}
		let result = cdp.send("Page.captureScreenshot", params).await?;
		let data = result
			.get("data")
			.and_then(Value::as_str)
			.ok_or_else(|| InstanceError::Cdp("no screenshot data returned".into()))?;
		Ok(json!({ "format": "png", "encoding": "base64", "fullPage": full_page, "data": data }))
	}

	async fn new_page(&self, cdp: &CdpClient, args: &Value) -> Result<Value, InstanceError> {
		let url = args.get("url").and_then(Value::as_str).unwrap_or("about:blank");
		let result = cdp.send("Target.createTarget", json!({ "url": url })).await?;
		self.refresh_page_count().await;
		Ok(json!({
			"targetId": result.get("targetId").cloned().unwrap_or(Value::Null),
			"pageCount": self.state.page_count(),
		}))
	}

	async fn reap_orphans(&self) {
		match self.inspector.terminate_listeners(self.port).await {
			Some(pids) if !pids.is_empty() => {
				warn!(target = "pw.mcp.pool", instance = %self.id, port = self.port, ?pids, "terminated orphaned browser processes");
			}
			Some(_) => {}
			None => debug!(target = "pw.mcp.pool", port = self.port, "process inspection unavailable; skipping orphan check"),
		}
	}
}

#[async_trait]
impl BrowserInstance for ChromeInstance {
	fn id(&self) -> &str {
		&self.id
	}

	fn team_id(&self) -> Option<&str> {
		self.team_id.as_deref()
	}

	fn kind(&self) -> BrowserKind {
		BrowserKind::Chromium
	}

	fn state(&self) -> &InstanceState {
		&self.state
	}

	async fn check_health(&self) -> bool {
		if !self.state.is_active() {
			return false;
		}
		if let Some(child) = self.child.lock().await.as_mut() {
			if let Ok(Some(status)) = child.try_wait() {
				debug!(target = "pw.mcp.pool", instance = %self.id, %status, "browser process exited");
				return false;
			}
		}
		if fetch_cdp_version(&self.http, self.port).await.is_err() {
			return false;
		}
		self.refresh_page_count().await;
		true
	}

	async fn close(&self, force: bool) -> Result<(), InstanceError> {
		if !self.state.deactivate() {
			return if force { Ok(()) } else { Err(InstanceError::Closed(self.id.clone())) };
		}

		self.cdp.lock().await.take();
		if let Some(mut child) = self.child.lock().await.take() {
			if let Err(e) = child.start_kill() {
				debug!(target = "pw.mcp.pool", instance = %self.id, error = %e, "kill failed");
			}
			if tokio::time::timeout(Duration::from_secs(5), child.wait()).await.is_err() {
				warn!(target = "pw.mcp.pool", instance = %self.id, "browser did not exit within 5s");
			}
		}
		self.reap_orphans().await;
		self.profile.lock().await.take();
		Ok(())
	}

	async fn invoke(&self, action: &str, args: Value) -> Result<Value, InstanceError> {
		if !self.state.is_active() {
			return Err(InstanceError::Closed(self.id.clone()));
		}
		let cdp = self.session().await?;
		self.state.touch();
		let result = match action {
			"navigate" => self.navigate(&cdp, &args).await,
			"click" => self.click(&cdp, &args).await,
			"evaluate" => {
				let expression = required_str(&args, "expression", "evaluate")?;
				cdp.evaluate(expression).await.map(|value| json!({ "value": value }))
			}
			"query" => self.query(&cdp, &args).await,
			"screenshot" => self.screenshot(&cdp, &args).await,
			"new_page" => self.new_page(&cdp, &args).await,
			other => Err(InstanceError::UnknownAction(other.to_string())),
		};
		if matches!(result, Err(InstanceError::Cdp(ref m)) if m.contains("connection closed")) {
			self.cdp.lock().await.take();
		}
		result
	}
}

/// Kills and reaps a browser whose debugging endpoint never came up.
async fn abandon(mut child: Child, port: u16) {
	if let Err(e) = child.start_kill() {
		debug!(target = "pw.mcp.pool", port, error = %e, "kill after failed launch failed");
	}
	if tokio::time::timeout(Duration::from_secs(5), child.wait()).await.is_err() {
		warn!(target = "pw.mcp.pool", port, "abandoned browser did not exit within 5s");
	}
}

/// Resolves CDP version metadata from `/json/version` on `port`.
pub async fn fetch_cdp_version(client: &reqwest::Client, port: u16) -> Result<CdpVersionInfo, InstanceError> {
	let mut last_error = "no response".to_string();
	for url in [
		format!("http://127.0.0.1:{port}/json/version"),
		format!("http://localhost:{port}/json/version"),
	] {
		let response = match client.get(&url).send().await {
			Ok(r) => r,
			Err(e) => {
				last_error = e.to_string();
				continue;
			}
		};
		if !response.status().is_success() {
			last_error = format!("unexpected status {}", response.status());
			continue;
		}
		return response
			.json()
			.await
			.map_err(|e| InstanceError::Cdp(format!("failed to parse CDP response: {e}")));
	}
	Err(InstanceError::Cdp(format!("failed to reach port {port}: {last_error}")))
}

/// Locates a Chromium-family executable. `PW_MCP_CHROME` wins when set.
pub fn find_chrome_executable() -> Option<PathBuf> {
	if let Some(path) = std::env::var_os(CHROME_ENV) {
		return Some(PathBuf::from(path));
	}

	let candidates: &[&str] = if cfg!(target_os = "macos") {
		&[
			"/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
			"/Applications/Chromium.app/Contents/MacOS/Chromium",
			"/Applications/Brave Browser.app/Contents/MacOS/Brave Browser",
		]
	} else {
		&[
			"google-chrome-stable",
			"google-chrome",
			"chromium-browser",
			"chromium",
			"brave-browser",
			"/usr/bin/google-chrome-stable",
			"/usr/bin/google-chrome",
			"/usr/bin/chromium-browser",
			"/usr/bin/chromium",
			"/snap/bin/chromium",
		]
	};

	candidates.iter().find_map(|candidate| {
		if candidate.starts_with('/') {
			let path = Path::new(candidate);
			path.exists().then(|| path.to_path_buf())
		} else {
			which::which(candidate).ok()
		}
	})
}

fn port_available(port: u16) -> bool {
	StdTcpListener::bind(("127.0.0.1", port)).is_ok()
}

fn required_str<'a>(args: &'a Value, key: &str, action: &str) -> Result<&'a str, InstanceError> {
	args.get(key)
		.and_then(Value::as_str)
		.ok_or_else(|| InstanceError::InvalidArguments {
			action: action.to_string(),
			message: format!("missing string '{key}'"),
		})
}

/// JSON string literals are valid JavaScript string literals.
fn js_string(value: &str) -> String {
	Value::String(value.to_string()).to_string()
}
