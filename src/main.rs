//! Defiant Client CLI
//!
//! Runs the payment runtime as a long-lived process: restores persisted
//! state, starts the live event stream, and logs reconciled events until
//! interrupted.

use std::sync::Arc;

use clap::Parser;

use defiant_client::model::EventType;
use defiant_client::store::FileStateStore;
use defiant_client::{ClientConfig, DefiantClient};

/// Defiant payment runtime
#[derive(Parser, Debug)]
#[command(name = "defiant-cli")]
#[command(version)]
#[command(about = "Client runtime for the Defiant payment platform")]
struct Args {
    /// Base URL of the payment API
    #[arg(long, default_value = "https://api.defiant.sh")]
    api_url: String,

    /// API key (dk_live_... or dk_test_...)
    #[arg(long, env = "DEFIANT_API_KEY")]
    api_key: String,

    /// Webhook signing secret
    #[arg(long, env = "DEFIANT_WEBHOOK_SECRET", default_value = "")]
    webhook_secret: String,

    /// Directory for the persisted state file
    #[arg(long, default_value = "./state")]
    state_dir: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let filter = if args.verbose { "debug" } else { "info" };

    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!(api_url = %args.api_url, state_dir = %args.state_dir, "Defiant client starting");

    let config = ClientConfig::new(args.api_url, args.api_key, args.webhook_secret);
    let store = Arc::new(FileStateStore::new(&args.state_dir));
    let client = DefiantClient::new(config, store);

    let snapshot = client.snapshot();
    tracing::info!(
        payments = snapshot.payments.len(),
        customers = snapshot.customers.len(),
        "Restored persisted state"
    );
    if !snapshot.initialized {
        client.initialize()?;
    }

    for event_type in [
        EventType::PaymentCreated,
        EventType::PaymentUpdated,
        EventType::PaymentRefunded,
        EventType::InvoicePaid,
        EventType::CustomerCreated,
        EventType::CustomerUpdated,
    ] {
        client.subscribe(event_type, |event| {
            tracing::info!(
                event_id = %event.id,
                event_type = %event.event_type,
                source = ?event.source,
                "Event reconciled"
            );
            Ok(())
        });
    }
    for event_type in [
        EventType::StreamError,
        EventType::WebhookError,
        EventType::ListenerError,
        EventType::StorageError,
    ] {
        client.subscribe(event_type, |event| {
            tracing::warn!(event_id = %event.id, event_type = %event.event_type, "Diagnostic event");
            Ok(())
        });
    }

    client.start_stream()?;
    tracing::info!("Event stream started; press Ctrl+C to stop");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    client.shutdown().await;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn args_definition_is_consistent() {
        Args::command().debug_assert();
    }
}
