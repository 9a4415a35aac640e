//! opsmend command line
//!
//! Inspect how errors are classified and what a client would see, using the
//! same configuration an embedding service would load.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::classifier::{Classify, ErrorContext, ErrorInfo};
use crate::config::Config;
use crate::engine::Engine;
use crate::observability::telemetry::init_tracing;

#[derive(Parser)]
#[command(name = "opsmend")]
#[command(about = "Error classification and automatic recovery toolkit")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log filter, e.g. `opsmend=debug` (RUST_LOG takes precedence)
    #[arg(long, value_name = "FILTER", global = true)]
    log: Option<String>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(clap::Args, Debug, Clone)]
struct ErrorArgs {
    /// Error message to classify
    message: String,

    /// HTTP-like status carried by the error
    #[arg(long)]
    status: Option<u16>,

    /// Error code (e.g. ECONNREFUSED)
    #[arg(long)]
    code: Option<String>,

    /// Error kind name
    #[arg(long)]
    name: Option<String>,

    /// Seconds the upstream asked to wait
    #[arg(long, value_name = "SECS")]
    retry_after: Option<u64>,

    /// Service the error came from
    #[arg(long)]
    service: Option<String>,

    /// Endpoint being served
    #[arg(long)]
    endpoint: Option<String>,
}

impl ErrorArgs {
    fn info(&self) -> ErrorInfo {
        let mut info = ErrorInfo::new(self.message.clone());
        if let Some(status) = self.status {
            info = info.with_status(status);
        }
        if let Some(code) = &self.code {
            info = info.with_code(code.clone());
        }
        if let Some(name) = &self.name {
            info = info.with_name(name.clone());
        }
        if let Some(secs) = self.retry_after {
            info = info.with_retry_after_secs(secs);
        }
        info
    }

    fn context(&self) -> ErrorContext {
        ErrorContext {
            service: self.service.clone(),
            endpoint: self.endpoint.clone(),
            ..ErrorContext::default()
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Classify an error message and print the result as JSON
    Classify(ErrorArgs),

    /// List the registered detection patterns
    Patterns {
        /// Only patterns carrying this tag
        #[arg(long)]
        tag: Option<String>,
    },

    /// Print the effective configuration
    Config {
        /// Print only the file the configuration was loaded from
        #[arg(long)]
        path: bool,
    },

    /// Render the boundary response a client would receive for an error
    Respond(ErrorArgs),
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{}", text);
    Ok(())
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref())?;
    let filter = cli.log.clone().unwrap_or_else(|| config.logging.filter.clone());
    init_tracing(&filter, cli.log_json || config.logging.json);

    match cli.command {
        Commands::Config { path } => {
            if path {
                match &config.source {
                    Some(p) => println!("{}", p.display()),
                    None => println!("(defaults)"),
                }
            } else {
                print!("{}", config.to_toml()?);
            }
        }

        Commands::Patterns { tag } => {
            let engine = Engine::new(config)?;
            let patterns: Vec<_> = engine
                .classifier()
                .patterns()
                .into_iter()
                .filter(|p| tag.as_ref().map(|t| p.tags.contains(t)).unwrap_or(true))
                .collect();
            print_json(&patterns)?;
        }

        Commands::Classify(args) => {
            let engine = Engine::new(config)?;
            let classification = engine.classifier().classify(&args.info(), &args.context());
            print_json(&classification)?;
        }

        Commands::Respond(args) => {
            let engine = Engine::new(config)?;
            let response = engine
                .middleware()
                .respond_to(&args.info(), &args.context())
                .await;
            print_json(&response)?;
        }
    }

    Ok(())
}
