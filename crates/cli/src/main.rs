use clap::Parser;
use pw_mcp::{app, cli::Cli, logging};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let cli = Cli::parse();
	logging::init_logging(cli.verbose);

	app::run(cli).await?;

	// A pending stdin read would otherwise hold up runtime shutdown.
	std::process::exit(0);
}
