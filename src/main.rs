//! model-relay CLI entry point

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use model_relay::config::{ModelConfig, ProviderKind};
use model_relay::message::Message;
use model_relay::models::{BackendContext, ProviderRegistry};
use model_relay::stats::GlobalStats;
use model_relay::{ui, Error};

#[derive(Parser)]
#[command(name = "model-relay")]
#[command(about = "Send one prompt to a model provider and report its cost")]
#[command(version)]
struct Cli {
    /// Provider: gateway, gateway-responses, router or agent
    #[arg(short, long, default_value = "gateway")]
    provider: String,

    /// Model name (agent id for the agent provider)
    #[arg(short, long)]
    model: String,

    /// Optional system prompt
    #[arg(short, long)]
    system: Option<String>,

    /// Cost tracking mode: strict or ignore_errors
    #[arg(long)]
    cost_tracking: Option<String>,

    /// Prompt to send
    prompt: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    // First Ctrl+C cancels the in-flight query, second one exits
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    ctrlc::set_handler(move || {
        if trigger.is_cancelled() {
            println!("\n👋 Bye!");
            std::process::exit(130);
        }
        println!("\n⚠️  Cancelling query (press Ctrl+C again to exit)");
        trigger.cancel();
    })
    .ok();

    let provider: ProviderKind = cli.provider.parse()?;
    let mut config = ModelConfig::new(provider, &cli.model).apply_env()?;
    if let Some(mode) = cli.cost_tracking.as_deref() {
        config.cost_tracking = mode.parse()?;
    }

    let stats = Arc::new(GlobalStats::new());
    let ctx = BackendContext::new(stats.clone()).with_cancel(cancel);
    let mut backend = ProviderRegistry::create(config, &ctx)?;

    ui::print_header(&cli.model, provider.as_str());

    let mut messages = Vec::new();
    if let Some(system) = cli.system {
        messages.push(Message::system(system));
    }
    messages.push(Message::user(cli.prompt));

    ui::print_thinking("Querying");
    match backend.query(&messages).await {
        Ok(result) => {
            ui::print_answer(&result.content);
            ui::print_cost(result.cost, &backend.stats(), &stats.snapshot());
        }
        Err(Error::Cancelled) => ui::print_warning("Query cancelled"),
        Err(e) => {
            ui::print_error(&e.to_string());
            return Err(e.into());
        }
    }

    Ok(())
}
