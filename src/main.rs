//! llm-dispatch command line.
//!
//! ```text
//!   CLI args / env ──▶ config (TOML + overrides) ──▶ logging
//!                                                      │
//!                                                      ▼
//!   stdout ◀── payload / raw stream ◀── Dispatcher ◀── subcommand
//!                                           │
//!                                           └──▶ auth refresh channel ──▶ log
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;

use llm_dispatch::auth::AuthNotifier;
use llm_dispatch::config::{load_config, validate_config, ConfigError, DispatchConfig};
use llm_dispatch::observability::logging;
use llm_dispatch::{DispatchOutcome, Dispatcher};

#[derive(Parser)]
#[command(name = "llm-dispatch")]
#[command(about = "Resilient client for an LLM gateway", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Overrides gateway.base_url
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Bearer credential for the gateway
    #[arg(long, env = "GATEWAY_API_KEY", global = true, hide_env_values = true)]
    api_key: Option<String>,

    /// Overrides observability.log_level
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a chat completion
    Chat {
        /// Model identity, e.g. "openai/gpt-4o"
        #[arg(short, long)]
        model: String,

        /// User message
        message: String,

        /// Optional system prompt
        #[arg(long)]
        system: Option<String>,

        /// Forward the raw event stream to stdout
        #[arg(long)]
        stream: bool,

        /// Per-attempt timeout in milliseconds, replacing the computed one
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
    /// GET a read-only endpoint (404 prints null, or [] with --list)
    Get {
        path: String,

        /// Treat the endpoint as a collection
        #[arg(long)]
        list: bool,
    },
    /// Print the effective per-attempt timeout for a model
    Timeout {
        #[arg(short, long)]
        model: String,

        #[arg(long)]
        stream: bool,
    },
    /// Print the configuration after defaults and overrides
    Config,
}

fn build_config(cli: &Cli) -> Result<DispatchConfig, ConfigError> {
    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => DispatchConfig::default(),
    };
    if let Some(base_url) = &cli.base_url {
        config.gateway.base_url = base_url.clone();
    }
    if let Some(key) = &cli.api_key {
        config.gateway.api_key = Some(key.clone());
    }
    if let Some(level) = &cli.log_level {
        config.observability.log_level = level.clone();
    }
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = build_config(&cli)?;
    logging::init(&config.observability);

    tracing::debug!(
        base_url = %config.gateway.base_url,
        max_retries = config.retries.max_retries,
        headless = config.environment.is_none(),
        "Configuration loaded"
    );

    if let Commands::Config = cli.command {
        let mut shown = config.clone();
        if shown.gateway.api_key.is_some() {
            shown.gateway.api_key = Some("***".to_string());
        }
        println!("{}", toml::to_string_pretty(&shown)?);
        return Ok(());
    }

    let (notifier, mut refresh_rx) = AuthNotifier::channel();
    tokio::spawn(async move {
        while let Some(event) = refresh_rx.recv().await {
            tracing::warn!(
                endpoint = %event.endpoint,
                target = %event.target,
                correlation_id = %event.correlation_id,
                reason = %event.reason,
                "Gateway rejected the credential; refresh it"
            );
        }
    });

    let dispatcher = Dispatcher::new(config)?.with_auth_notifier(notifier);

    match cli.command {
        Commands::Chat {
            model,
            message,
            system,
            stream,
            timeout_ms,
        } => {
            let mut messages = Vec::new();
            if let Some(system) = system {
                messages.push(json!({"role": "system", "content": system}));
            }
            messages.push(json!({"role": "user", "content": message}));

            let mut request = dispatcher.chat_request(&model, json!({ "messages": messages }));
            if stream {
                request = request.streaming();
            }
            if let Some(ms) = timeout_ms {
                request = request.with_timeout(std::time::Duration::from_millis(ms));
            }

            match dispatcher.dispatch(request).await? {
                DispatchOutcome::Payload(payload) => print_json(&payload)?,
                DispatchOutcome::Stream(mut handle) => {
                    let mut stdout = tokio::io::stdout();
                    while let Some(chunk) = handle.next().await {
                        stdout.write_all(&chunk?).await?;
                        stdout.flush().await?;
                    }
                }
            }
        }
        Commands::Get { path, list } => {
            if list {
                let items = dispatcher.fetch_list(&path).await?;
                print_json(&Value::Array(items))?;
            } else {
                let payload = dispatcher.fetch_optional(&path).await?;
                print_json(&payload.unwrap_or(Value::Null))?;
            }
        }
        Commands::Timeout { model, stream } => {
            let timeout = dispatcher.timeout_for(&model, stream);
            println!("{}", timeout.as_millis());
        }
        Commands::Config => {}
    }

    Ok(())
}

fn print_json(value: &Value) -> Result<(), serde_json::Error> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
