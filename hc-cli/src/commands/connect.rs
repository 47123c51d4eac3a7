//! Connect command - open a live session and print traffic.

use std::path::Path;
use std::sync::Arc;

use console::style;
use dialoguer::{Input, Password};
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tracing::error;

use hc_core::auth::StaticAuth;
use hc_core::config::{AppConfig, ConfigHandle};
use hc_core::error::{HcError, HcResult};
use hc_socket::{ChatClient, WsTransport};

use crate::OutputFormat;

/// Run the connect command.
pub async fn run(
    config: ConfigHandle,
    config_path: &Path,
    address: Option<String>,
    token: Option<String>,
    save_config: bool,
    format: OutputFormat,
) -> HcResult<()> {
    // Determine address: arg > config > interactive prompt
    let addr = match address {
        Some(a) => a,
        None => {
            let current = config.read().await.server.address.clone();
            if current.is_empty() {
                Input::new()
                    .with_prompt("Server address")
                    .interact_text()
                    .map_err(|e| HcError::Internal(e.to_string()))?
            } else {
                current
            }
        }
    };

    // Determine token: arg > config > interactive prompt
    let token = match token {
        Some(t) => t,
        None => {
            let current = config.read().await.server.auth_token.clone();
            if current.is_empty() {
                Password::new()
                    .with_prompt("Auth token")
                    .interact()
                    .map_err(|e| HcError::Internal(e.to_string()))?
            } else {
                current
            }
        }
    };

    {
        let mut cfg = config.write().await;
        cfg.server.address = AppConfig::sanitize_server_address(&addr);
    }
    let cfg = config.snapshot().await;
    if !cfg.is_server_configured() {
        error!("no server address configured. Use --address or set it in config.");
        return Err(HcError::MissingConfig("server address".into()));
    }

    if save_config {
        cfg.save_to_file(config_path)?;
        println!("  {} Config saved to {}", style("OK").green(), config_path.display());
    }

    let store = super::open_key_store(&config).await?;
    let client = ChatClient::new(
        cfg.clone(),
        Arc::new(StaticAuth::new(token)),
        Arc::new(WsTransport::new()),
        store,
    );

    let mut status = client.manager().subscribe_status();
    let mut messages = client.manager().subscribe_messages();
    let mut users = client.manager().subscribe_users();
    let mut channels = client.manager().subscribe_channels();
    let mut events = client.dispatcher().subscribe();

    if matches!(format, OutputFormat::Text) {
        println!("Connecting to {}...", style(&cfg.server.address).bold());
    }
    if !client.start().await {
        println!("  {} Not authorized to connect.", style("FAIL").red().bold());
        return Err(HcError::Unauthenticated("no usable auth token".into()));
    }

    let info = client.encryption_info().await;
    if matches!(format, OutputFormat::Text) {
        let method = if info.hipaa_compliant {
            style(info.method.clone()).green()
        } else {
            style(info.method.clone()).yellow()
        };
        println!("  Encryption: {method}");
        println!("  Listening... (Ctrl+C to stop)");
        println!();
    }

    loop {
        tokio::select! {
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *status.borrow_and_update();
                emit(format, "status", json!(state), || {
                    format!("{} {}", style("[status]").bold().dim(), state)
                });
            }
            message = messages.recv() => match message {
                Ok(message) => emit(format, "message", message.clone(), || {
                    format!("{} {}", style("[message]").cyan(), message)
                }),
                Err(RecvError::Lagged(n)) => {
                    println!("  {} Missed {n} messages (slow consumer)", style("WARN").yellow());
                }
                Err(RecvError::Closed) => break,
            },
            event = events.recv() => match event {
                Ok(event) => emit(format, event.event_type.as_str(), event.data.clone(), || {
                    format!("{} {}", style(format!("[{}]", event.event_type.as_str())).magenta(), event.data)
                }),
                Err(RecvError::Lagged(n)) => {
                    println!("  {} Missed {n} events (slow consumer)", style("WARN").yellow());
                }
                Err(RecvError::Closed) => break,
            },
            Ok(()) = users.changed() => {
                let count = users.borrow_and_update().len();
                emit(format, "users", json!({"count": count}), || {
                    format!("{} {count} user(s)", style("[users]").bold().dim())
                });
            }
            Ok(()) = channels.changed() => {
                let count = channels.borrow_and_update().len();
                emit(format, "channels", json!({"count": count}), || {
                    format!("{} {count} channel(s)", style("[channels]").bold().dim())
                });
            }
            _ = tokio::signal::ctrl_c() => {
                if matches!(format, OutputFormat::Text) {
                    println!("\n  Disconnecting...");
                }
                client.manager().disconnect("client exit").await;
                break;
            }
        }
    }

    Ok(())
}

/// Print one line of live output in the requested format.
fn emit(format: OutputFormat, kind: &str, data: serde_json::Value, text: impl FnOnce() -> String) {
    match format {
        OutputFormat::Json => println!("{}", json!({"type": kind, "data": data})),
        OutputFormat::Text => println!("  {}", text()),
    }
}
