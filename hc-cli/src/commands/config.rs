//! Config commands.

use std::path::Path;

use clap::Subcommand;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, ContentArrangement, Table};

use hc_core::config::{AppConfig, ConfigHandle};
use hc_core::error::HcResult;

use crate::OutputFormat;

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Show the effective configuration (token redacted).
    Show,
    /// Print the configuration file path.
    Path,
}

/// Run a config subcommand.
pub async fn run(
    config: ConfigHandle,
    config_path: &Path,
    action: ConfigAction,
    format: OutputFormat,
) -> HcResult<()> {
    match action {
        ConfigAction::Path => match format {
            OutputFormat::Json => super::print_json(&serde_json::json!({
                "path": config_path.display().to_string(),
                "exists": config_path.exists(),
            })),
            OutputFormat::Text => println!("{}", config_path.display()),
        },
        ConfigAction::Show => {
            let mut cfg = config.snapshot().await;
            cfg.server.auth_token = super::redact(&cfg.server.auth_token);

            match format {
                OutputFormat::Json => super::print_json(&cfg),
                OutputFormat::Text => {
                    let mut table = Table::new();
                    table
                        .load_preset(UTF8_FULL)
                        .apply_modifier(UTF8_ROUND_CORNERS)
                        .set_content_arrangement(ContentArrangement::Dynamic);
                    table.set_header(vec!["Key", "Value"]);
                    for (key, value) in settings_rows(&cfg) {
                        table.add_row(vec![key.to_string(), value]);
                    }
                    println!("{table}");
                }
            }
        }
    }
    Ok(())
}

/// Flatten the config into (key path, display value) rows.
fn settings_rows(cfg: &AppConfig) -> Vec<(&'static str, String)> {
    let or_default = |s: &str| if s.is_empty() { "(default)".to_string() } else { s.to_string() };
    vec![
        ("server.address", cfg.server.address.clone()),
        ("server.connect_timeout_ms", cfg.server.connect_timeout_ms.to_string()),
        ("server.auth_token", cfg.server.auth_token.clone()),
        ("reconnect.max_attempts", cfg.reconnect.max_attempts.to_string()),
        ("reconnect.base_delay_ms", cfg.reconnect.base_delay_ms.to_string()),
        ("reconnect.exponential_backoff", cfg.reconnect.exponential_backoff.to_string()),
        ("heartbeat.interval_ms", cfg.heartbeat.interval_ms.to_string()),
        ("encryption.enabled", cfg.encryption.enabled.to_string()),
        ("encryption.legacy_mode", cfg.encryption.legacy_mode.to_string()),
        ("encryption.key_rotation_interval_ms", cfg.encryption.key_rotation_interval_ms.to_string()),
        ("encryption.storage_path", or_default(&cfg.encryption.storage_path)),
        ("logging.level", cfg.logging.level.clone()),
        ("logging.directory", or_default(&cfg.logging.directory)),
        ("logging.json_output", cfg.logging.json_output.to_string()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_rows_cover_every_section() {
        let rows = settings_rows(&AppConfig::default());
        for section in ["server.", "reconnect.", "heartbeat.", "encryption.", "logging."] {
            assert!(rows.iter().any(|(k, _)| k.starts_with(section)), "{section}");
        }
        let storage = rows.iter().find(|(k, _)| *k == "encryption.storage_path").unwrap();
        assert_eq!(storage.1, "(default)");
    }
}
