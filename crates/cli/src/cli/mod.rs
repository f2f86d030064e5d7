
use std::net::SocketAddr;
use std::path::PathBuf;

use clap::builder::Styles;
use clap::builder::styling::AnsiColor;
use clap::{Args, Parser, Subcommand};
use pw_mcp_runtime::AllocationStrategyKind;

/// Root CLI for the pw-mcp server.
#[derive(Parser, Debug)]
#[command(name = "pw-mcp")]
#[command(about = "MCP server exposing team-scoped pooled browsers")]
#[command(version)]
#[command(styles = styles())]
pub struct Cli {
	/// Increase verbosity (-v info, -vv debug)
	#[arg(short, long, global = true, action = clap::ArgAction::Count)]
	pub verbose: u8,

	/// JSON config file; flags override its values
	#[arg(short, long, global = true, value_name = "FILE", env = "PW_MCP_CONFIG")]
	pub config: Option<PathBuf>,

	#[command(flatten)]
	pub overrides: Overrides,

	#[command(subcommand)]
	pub transport: TransportCommand,
}

/// Per-invocation overrides of config file values.
#[derive(Args, Debug, Clone, Default)]
pub struct Overrides {
	/// Team every call on this transport is scoped to
	#[arg(long, global = true, value_name = "TEAM", env = "PW_MCP_TEAM_ID")]
	pub team_id: Option<String>,

	/// User recorded on every call
	#[arg(long, global = true, value_name = "USER", env = "PW_MCP_USER_ID")]
	pub user_id: Option<String>,

	/// Permission granted to the caller (repeatable)
	#[arg(long = "permission", global = true, value_name = "PERM", env = "PW_MCP_PERMISSIONS", value_delimiter = ',')]
	pub permissions: Vec<String>,

	/// Allocation strategy: round-robin, least-used, or team-isolated
	#[arg(long, global = true, value_name = "STRATEGY", env = "PW_MCP_STRATEGY")]
	pub strategy: Option<AllocationStrategyKind>,

	/// Maximum number of browser instances
	#[arg(long, global = true, value_name = "N", env = "PW_MCP_MAX_SIZE")]
	pub max_size: Option<usize>,

	/// Instances kept through idle eviction
	#[arg(long, global = true, value_name = "N", env = "PW_MCP_MIN_SIZE")]
	pub min_size: Option<usize>,

	/// Instances launched at startup
	#[arg(long, global = true, value_name = "N", env = "PW_MCP_WARMUP_SIZE")]
	pub warmup_size: Option<usize>,

	/// Browser executable; discovered from PATH when absent
	#[arg(long, global = true, value_name = "PATH", env = "PW_MCP_CHROME")]
	pub browser_executable: Option<PathBuf>,

	/// Launch browsers with a visible window
	#[arg(long, global = true)]
	pub headful: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum TransportCommand {
	/// Serve newline-delimited JSON-RPC on stdin/stdout
	Stdio,
	/// Serve on a Unix domain socket
	Socket(SocketArgs),
	/// Serve over a pair of named pipes
	Fifo(FifoArgs),
	/// Serve JSON-RPC over HTTP POST
	Http(HttpArgs),
}

#[derive(Args, Debug, Clone)]
pub struct SocketArgs {
	/// Socket path [default: $XDG_RUNTIME_DIR/pw-mcp.sock]
	#[arg(long, value_name = "PATH", env = "PW_MCP_SOCKET")]
	pub path: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct FifoArgs {
	/// FIFO the server reads requests from
	#[arg(long, value_name = "PATH")]
	pub input: PathBuf,

	/// FIFO the server writes responses to
	#[arg(long, value_name = "PATH")]
	pub output: PathBuf,

	/// Give up waiting for a reader on the output FIFO after this long
	#[arg(long, value_name = "MS", default_value_t = 5000)]
	pub open_timeout_ms: u64,

	/// Read the input FIFO by polling instead of readiness events
	#[arg(long)]
	pub polling: bool,
}

#[derive(Args, Debug, Clone)]
pub struct HttpArgs {
	/// Address to listen on
	#[arg(long, value_name = "ADDR", default_value = "127.0.0.1:8931", env = "PW_MCP_HTTP_ADDR")]
	pub addr: SocketAddr,

	/// Path of the JSON-RPC endpoint
	#[arg(long, value_name = "PATH", default_value = "/mcp")]
	pub path: String,

	/// Take caller identity from x-team-id / x-user-id / x-permissions headers
	#[arg(long)]
	pub trust_identity_headers: bool,
}

fn styles() -> Styles {
	Styles::styled()
		.header(AnsiColor::Green.on_default().bold())
		.usage(AnsiColor::Green.on_default().bold())
		.literal(AnsiColor::Cyan.on_default())
		.placeholder(AnsiColor::Cyan.on_default())
		.valid(AnsiColor::Cyan.on_default())
}
