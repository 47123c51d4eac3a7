//! Key management commands.

use clap::Subcommand;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, ContentArrangement, Table};
use console::style;
use serde_json::json;

use hc_core::config::ConfigHandle;
use hc_core::constants::storage_keys;
use hc_core::error::{HcError, HcResult};
use hc_core::storage::KeyStore;

use crate::OutputFormat;

#[derive(Subcommand)]
pub enum KeysAction {
    /// Load existing keys, generating and persisting them if absent.
    Init,
    /// Discard current keys and generate new ones.
    Rotate,
    /// Delete all key material from memory and storage.
    Clear,
    /// Show encryption status and which keys are stored.
    Info,
}

/// Run a keys subcommand.
pub async fn run(config: ConfigHandle, action: KeysAction, format: OutputFormat) -> HcResult<()> {
    let (keys, service) = super::create_encryption(&config).await?;

    match action {
        KeysAction::Init => {
            if !keys.is_enabled() {
                return Err(HcError::Config("encryption is disabled in config".into()));
            }
            let ok = keys.init_keys().await;
            report(format, "init", ok, "Keys ready.", "Key initialization failed.");
            if !ok {
                return Err(HcError::MissingKeys);
            }
        }
        KeysAction::Rotate => {
            let ok = keys.rotate_keys().await;
            report(
                format,
                "rotate",
                ok,
                "Keys rotated. Messages encrypted with the old keys can no longer be read.",
                "Key rotation failed.",
            );
            if !ok {
                return Err(HcError::MissingKeys);
            }
        }
        KeysAction::Clear => {
            keys.clear_keys().await;
            report(format, "clear", true, "All key material removed.", "");
        }
        KeysAction::Info => {
            let store = super::open_key_store(&config).await?;
            let info = service.encryption_info().await;

            let mut stored = Vec::new();
            for key in storage_keys::ALL {
                stored.push((*key, store.get(key)?.is_some()));
            }
            let present = stored.iter().any(|(_, present)| *present);

            match format {
                OutputFormat::Json => {
                    let stored_json: serde_json::Map<String, serde_json::Value> = stored
                        .iter()
                        .map(|(k, present)| (k.to_string(), json!(present)))
                        .collect();
                    super::print_json(&json!({
                        "enabled": keys.is_enabled(),
                        "keysStored": present,
                        "method": info.method,
                        "hipaaCompliant": info.hipaa_compliant,
                        "capability": info.capability,
                        "storePath": store.path().display().to_string(),
                        "stored": stored_json,
                    }));
                }
                OutputFormat::Text => {
                    let mut table = Table::new();
                    table
                        .load_preset(UTF8_FULL)
                        .apply_modifier(UTF8_ROUND_CORNERS)
                        .set_content_arrangement(ContentArrangement::Dynamic);
                    table.set_header(vec!["Property", "Value"]);
                    table.add_row(vec!["Method".to_string(), info.method.clone()]);
                    table.add_row(vec!["Capability".to_string(), info.capability.clone()]);
                    table.add_row(vec!["HIPAA compliant".to_string(), yes_no(info.hipaa_compliant)]);
                    table.add_row(vec!["Enabled".to_string(), yes_no(keys.is_enabled())]);
                    table.add_row(vec!["Keys stored".to_string(), yes_no(present)]);
                    table.add_row(vec!["Key store".to_string(), store.path().display().to_string()]);
                    for (key, present) in &stored {
                        table.add_row(vec![key.to_string(), yes_no(*present)]);
                    }
                    println!("{table}");
                }
            }
        }
    }

    Ok(())
}

fn report(format: OutputFormat, action: &str, ok: bool, success: &str, failure: &str) {
    match format {
        OutputFormat::Json => super::print_json(&json!({"action": action, "success": ok})),
        OutputFormat::Text if ok => println!("  {} {success}", style("OK").green().bold()),
        OutputFormat::Text => println!("  {} {failure}", style("FAIL").red().bold()),
    }
}

fn yes_no(value: bool) -> String {
    let text = if value { "yes" } else { "no" };
    text.to_string()
}
