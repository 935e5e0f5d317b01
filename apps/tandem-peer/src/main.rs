mod app;
mod cli;
mod commands;
mod logging;

use clap::Parser;

use crate::cli::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    logging::init(&cli.logging.to_config())?;
    app::run(cli).await
}
