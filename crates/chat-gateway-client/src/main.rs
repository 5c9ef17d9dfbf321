//! Gateway client entry point
//!
//! Connects with `GATEWAY_TOKEN` and logs every dispatch until Ctrl-C.
//!
//! Run with:
//! ```bash
//! GATEWAY_TOKEN=... cargo run -p chat-gateway-client
//! ```
//!
//! Configuration is loaded from environment variables.

use anyhow::Context;
use chat_common::{try_init_tracing_with_config, ClientConfig, ConfigError, TracingConfig};
use chat_gateway_client::{DispatchEvent, GatewaySession};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    let config = match ClientConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = try_init_tracing_with_config(TracingConfig::for_environment(config.app.env)) {
        eprintln!("Warning: Failed to initialize tracing: {e}");
    }

    if let Err(e) = run(config).await {
        error!(error = %e, "Gateway client failed");
        std::process::exit(1);
    }
}

async fn run(config: ClientConfig) -> anyhow::Result<()> {
    let token = std::env::var("GATEWAY_TOKEN")
        .map_err(|_| ConfigError::MissingVar("GATEWAY_TOKEN"))?;

    info!(
        app = %config.app.name,
        env = ?config.app.env,
        api = %config.api.base_url,
        "Starting gateway client"
    );

    let session = GatewaySession::builder(config)
        .sink(|event: &DispatchEvent| {
            info!(event_type = %event.event_type, sequence = event.sequence, "Dispatch");
            Ok(())
        })
        .build()
        .context("failed to build gateway session")?;

    let mut states = session.subscribe_state();
    session.open(&token)?;

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("failed to listen for Ctrl-C")?;
                info!("Shutting down");
                break;
            }
            changed = states.changed() => {
                changed.context("session state channel closed")?;
                let state = *states.borrow_and_update();
                info!(state = %state, "Session state changed");

                if let Some(err) = session.last_error() {
                    if err.is_fatal() {
                        session.close();
                        return Err(err).context("gateway session failed");
                    }
                    warn!(error = %err, "Gateway session error");
                }
            }
        }
    }

    session.close();
    Ok(())
}
