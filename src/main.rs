// Copyright (C) 2025 Matías Salinas (support@fenden.com)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use clap::Parser;
use std::process::exit;
use tracing::error;
use tracing_subscriber::EnvFilter;

use heroku_agent::command::{self, Command};
use heroku_agent::config::{Config, CONFIG};
use heroku_agent::server;

/// CLI arguments. Without a command the binary runs as the daemon; with one
/// it acts as a control-plane client against a running daemon.
#[derive(Parser, Debug)]
#[command(
    name = "heroku-agent",
    version,
    about = "Local accelerating proxy for the Heroku API",
    long_about = Some(
        "heroku-agent speeds up the Heroku CLI by serving conditional-request \
        cache hits from a local daemon and by transparently reusing \
        two-factor credentials.\n\n\
        Runs as the daemon unless a command is specified."
    )
)]
struct Args {
    /// Verbose mode
    #[arg(short, long)]
    verbose: bool,

    /// Path to the YAML configuration file
    #[arg(long, default_value = "heroku-agent.yaml")]
    config: String,

    #[command(subcommand)]
    command: Option<Command>,
}

/// Initializes structured logging. `--verbose` selects debug-level output,
/// which includes the per-request lines; otherwise the `LOG_LEVEL`
/// environment variable applies, defaulting to lifecycle events only.
fn init_logging(verbose: bool) {
    let level = if verbose {
        "debug".to_string()
    } else {
        std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into())
    };
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

#[tokio::main(flavor = "multi_thread", worker_threads = 4)]
async fn main() {
    let args = Args::parse();

    init_logging(args.verbose);

    let config = match Config::load_or_default(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("failed to load config from '{}': {e}", args.config);
            exit(1);
        }
    };
    CONFIG.set(config).expect("CONFIG was already initialized");

    match args.command {
        None => server::serve().await,
        Some(command) => exit(command::run(command).await),
    }
}
