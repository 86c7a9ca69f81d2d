//! HTTP interception server binary

use anyhow::Result;
use clap::Parser;
use snare_http::{Server, ServerConfig};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "snare-http", about = "HTTP interception server/proxy")]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listen address
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => ServerConfig::load_from_file(path).await?,
        None => ServerConfig::default(),
    };
    if let Some(bind) = args.bind {
        config.bind = bind;
    }

    let server = Server::new(config)?;
    server.run().await?;
    Ok(())
}
