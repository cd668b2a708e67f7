use std::io::{self, Write};

use clap::Parser;
use cli::Cli;
use client::QueryClient;
use config::Config;
use tracing_subscriber::EnvFilter;

mod cli;
mod client;
mod config;
mod model;
mod report;

#[tokio::main(flavor = "current_thread")]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let args = Cli::parse_from(cli::normalize_args(std::env::args_os()));
    let config = match Config::try_from(args) {
        Ok(config) => config,
        Err(e) => exit_with(&e.to_string()),
    };

    if let Err(e) = print_capacity(&config).await {
        exit_with(&format!("failed to query thanos: {e}"));
    }
    Ok(())
}

async fn print_capacity(config: &Config) -> Result<(), report::Error> {
    let client = QueryClient::new(&config.thanos)?;
    report::run(config, &client, &mut io::stdout()).await
}

/// Prints `message` without a trailing newline and exits with status 1.
fn exit_with(message: &str) -> ! {
    let mut stdout = io::stdout();
    // nowhere left to report a broken stdout
    let _ = write!(stdout, "{message}");
    let _ = stdout.flush();
    std::process::exit(1)
}
