//! Hands-on agent runtime CLI: the main entry point.
//!
//! Commands:
//! - `serve`   Start the HTTP runtime (`/ping`, `/invocations`)
//! - `run`     Run one invocation in-process and print the answer
//! - `invoke`  Call a deployed runtime by ARN
//! - `status`  Show the effective configuration

use anyhow::Context;
use clap::{Parser, Subcommand};
use handson_config::AppConfig;

mod commands;

#[derive(Parser)]
#[command(
    name = "handson",
    about = "Agent runtime with code interpreter, browser and web research tools",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP runtime
    Serve {
        /// Override the bind address
        #[arg(long)]
        host: Option<String>,

        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Run a single invocation without the HTTP layer
    Run {
        /// Prompt to send
        #[arg(short, long, conflicts_with = "payload")]
        prompt: Option<String>,

        /// Raw invocation payload as JSON
        #[arg(long)]
        payload: Option<String>,

        /// Session to continue (memory only)
        #[arg(long)]
        session_id: Option<String>,

        /// Actor the turns are recorded for
        #[arg(long)]
        actor_id: Option<String>,
    },

    /// Invoke a deployed agent runtime
    Invoke {
        /// ARN of the agent runtime
        #[arg(long, env = "AGENT_RUNTIME_ARN")]
        runtime_arn: String,

        /// Prompt to send
        #[arg(short, long)]
        prompt: String,

        /// Override the AWS region
        #[arg(long)]
        region: Option<String>,
    },

    /// Show the effective configuration
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load().context("Failed to load config")?;
    init_tracing(cli.verbose, config.logging.json);

    match cli.command {
        Commands::Serve { host, port } => commands::serve::run(config, host, port).await?,
        Commands::Run {
            prompt,
            payload,
            session_id,
            actor_id,
        } => commands::run::run(config, prompt, payload, session_id, actor_id).await?,
        Commands::Invoke {
            runtime_arn,
            prompt,
            region,
        } => commands::invoke::run(config, runtime_arn, prompt, region).await?,
        Commands::Status => commands::status::run(&config),
    }

    Ok(())
}

fn init_tracing(verbose: bool, json: bool) {
    let filter = if verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
