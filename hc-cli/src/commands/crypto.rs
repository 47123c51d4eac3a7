//! Encrypt/decrypt commands - run the message encryption service by hand.

use console::style;

use hc_core::config::ConfigHandle;
use hc_core::error::HcResult;

use crate::OutputFormat;

/// Encrypt a message object and print the envelope.
pub async fn encrypt(config: ConfigHandle, input: &str, format: OutputFormat) -> HcResult<()> {
    let message = super::read_json_arg(input)?;
    let (_keys, service) = super::create_encryption(&config).await?;

    let sealed = service.encrypt_message(&message).await;
    if !sealed.is_encrypted() && matches!(format, OutputFormat::Text) {
        eprintln!("  {} Message was NOT encrypted.", style("WARN").yellow().bold());
    }
    super::print_json(&sealed);
    Ok(())
}

/// Decrypt a message envelope and print the result.
pub async fn decrypt(config: ConfigHandle, input: &str, format: OutputFormat) -> HcResult<()> {
    let message = super::read_json_arg(input)?;
    let (_keys, service) = super::create_encryption(&config).await?;

    let plain = service.decrypt_message(&message).await;
    let failed = plain
        .get("decryptionFailed")
        .and_then(serde_json::Value::as_bool)
        .unwrap_or(false);
    if failed && matches!(format, OutputFormat::Text) {
        eprintln!("  {} Unable to decrypt with the local keys.", style("WARN").yellow().bold());
    }
    super::print_json(&plain);
    Ok(())
}
