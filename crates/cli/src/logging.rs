use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::MakeWriterExt;

/// Directive used when `RUST_LOG` is unset.
///
/// Every server target lives under `pw.mcp.*`, so `pw=info` lifts the
/// server's own lifecycle logs without opening up axum, hyper, or tungstenite.
fn default_directive(verbosity: u8) -> &'static str {
	match verbosity {
		0 => "warn",
		1 => "warn,pw=info",
		_ => "debug",
	}
}

/// Installs the global subscriber on stderr. Stdout belongs to the stdio
/// transport and must never carry log lines.
pub fn init_logging(verbosity: u8) {
	let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive(verbosity)));

	tracing_subscriber::fmt()
		.with_env_filter(env_filter)
		.with_writer(std::io::stderr.with_max_level(tracing::Level::TRACE))
		.with_target(true)
		.with_ansi(false)
		.compact()
		.init();
}
