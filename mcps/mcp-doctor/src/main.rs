//! mcp-doctor binary entry point

mod cli;

use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();
    mcp_doctor::telemetry::init_tracing("mcp_doctor", cli.verbose)?;

    cli::run(cli).await
}
