use anyhow::Result;
use clap::Parser;
use std::io::BufRead;
use std::path::PathBuf;

use rango::config;
use rango::search::{self, BingClient};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Read search terms from stdin, query the search provider once and print the results"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Override the credential file from the config
    #[arg(long)]
    key_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mut cfg = config::load(Some(&args.config))?;
    if let Some(key_file) = args.key_file {
        cfg.search.key_file = key_file.to_string_lossy().to_string();
    }

    let mut terms = String::new();
    std::io::stdin().lock().read_line(&mut terms)?;

    let client = BingClient::from_config(&cfg.search)?;
    let results = search::run_query(&client, &terms).await?;
    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(())
}
