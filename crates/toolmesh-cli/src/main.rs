//! CLI entry point.

use clap::Parser;

use toolmesh_cli::bootstrap::init_logging;
use toolmesh_cli::{Cli, CliConfig, Commands, bootstrap, handlers};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug);

    let config = CliConfig::from_cli(&cli);
    let ctx = bootstrap(&config)?;

    match cli.command {
        Commands::Servers { json } => handlers::servers::execute(&ctx, json).await,
        Commands::Tools { server, json } => handlers::tools::execute(&ctx, server, json).await,
        Commands::Call { server, tool, args } => {
            handlers::call::execute(&ctx, &server, &tool, args.as_deref()).await
        }
    }
}
