// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;
use tracing::error;

use tether::config::SessionConfig;
use tether::WatchOptions;

/// Watch session notifications and print them as JSON lines.
#[derive(Debug, Parser)]
#[command(name = "tether", version, about)]
struct Cli {
    #[command(flatten)]
    session: SessionConfig,

    /// Topic to subscribe to. Repeatable.
    #[arg(long = "topic", required = true)]
    topics: Vec<String>,

    /// Bearer credential to start with. Without it the session is restored
    /// with a renewal exchange.
    #[arg(long, env = "TETHER_TOKEN", hide_env_values = true)]
    token: Option<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let options = WatchOptions { topics: cli.topics, token: cli.token };
    if let Err(e) = tether::run(cli.session, options).await {
        error!("fatal: {e:#}");
        std::process::exit(1);
    }
}
