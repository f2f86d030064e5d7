//! Optional native process probing.
//!
//! Used to find browser processes that outlive their instance and keep a
//! debugging port bound. Availability depends on the host, so every caller
//! must handle [`ProcessInspector::Unavailable`].

use std::path::PathBuf;

use tokio::process::Command;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessInspector {
	/// `lsof` found at this path.
	Lsof(PathBuf),
	Unavailable,
}

impl ProcessInspector {
	pub fn detect() -> Self {
		match which::which("lsof") {
			Ok(path) => ProcessInspector::Lsof(path),
			Err(_) => ProcessInspector::Unavailable,
		}
	}

	pub fn is_available(&self) -> bool {
		matches!(self, ProcessInspector::Lsof(_))
	}

	/// Pids with a TCP listener on `port`. `None` when probing is
	/// unavailable or failed.
	pub async fn listeners(&self, port: u16) -> Option<Vec<u32>> {
		let ProcessInspector::Lsof(lsof) = self else {
			return None;
		};
		let output = Command::new(lsof)
			.args(["-t", "-i", &format!("tcp:{port}"), "-sTCP:LISTEN"])
			.output()
			.await;
		match output {
			Ok(output) => Some(parse_pids(&output.stdout)),
			Err(err) => {
				debug!(target = "pw.mcp.pool", port, error = %err, "lsof failed");
				None
			}
		}
	}

	/// Sends SIGTERM to every listener on `port`. Returns the pids signalled,
	/// or `None` when probing is unavailable.
	pub async fn terminate_listeners(&self, port: u16) -> Option<Vec<u32>> {
		let pids = self.listeners(port).await?;
		let mut killed = Vec::new();
		for pid in pids {
			match Command::new("kill").args(["-TERM", &pid.to_string()]).status().await {
				Ok(status) if status.success() => killed.push(pid),
				Ok(_) => debug!(target = "pw.mcp.pool", pid, "kill -TERM returned non-zero"),
				Err(err) => debug!(target = "pw.mcp.pool", pid, error = %err, "failed to run kill"),
			}
		}
		Some(killed)
	}
}

fn parse_pids(stdout: &[u8]) -> Vec<u32> {
	String::from_utf8_lossy(stdout)
		.lines()
		.filter_map(|line| line.trim().parse().ok())
		.collect()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_one_pid_per_line() {
		assert_eq!(parse_pids(b"123\n456\n\nnot-a-pid\n"), vec![123, 456]);
		assert!(parse_pids(b"").is_empty());
	}

	#[tokio::test]
	async fn unavailable_inspector_reports_none() {
		let inspector = ProcessInspector::Unavailable;
		assert!(!inspector.is_available());
		assert_eq!(inspector.listeners(9222).await, None);
		assert_eq!(inspector.terminate_listeners(9222).await, None);
	}
}
