//! Encrypted message envelope types.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use hc_core::error::{HcError, HcResult};

/// Text shown in place of a message that could not be decrypted.
pub const UNDECRYPTABLE_TEXT: &str = "[Encrypted message - unable to decrypt]";

/// Method recorded on an encrypted message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EncryptionMethod {
    /// AES-256-GCM with a 128-bit tag.
    #[serde(rename = "AES-GCM")]
    AesGcm,
    /// Legacy repeating-key XOR.
    #[serde(rename = "XOR")]
    Xor,
}

impl EncryptionMethod {
    /// Parse the wire label.
    pub fn parse(label: &str) -> HcResult<Self> {
        match label {
            "AES-GCM" => Ok(Self::AesGcm),
            "XOR" => Ok(Self::Xor),
            other => Err(HcError::UnsupportedMethod(other.to_string())),
        }
    }

    /// The wire label.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AesGcm => "AES-GCM",
            Self::Xor => "XOR",
        }
    }
}

impl std::fmt::Display for EncryptionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A chat message whose body has been encrypted.
///
/// Routing metadata stays in the clear; the full original message,
/// metadata included, is inside `encrypted_data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedMessage {
    #[serde(default)]
    pub id: Value,
    #[serde(default)]
    pub sender: Value,
    #[serde(default)]
    pub recipient: Value,
    #[serde(default)]
    pub channel: Value,
    /// Always true for this type. Any truthy JSON value is accepted.
    #[serde(default, deserialize_with = "deserialize_truthy")]
    pub encrypted: bool,
    /// Kept as a string so unknown methods still parse and can be reported.
    pub encryption_method: String,
    /// Base64 ciphertext.
    pub encrypted_data: String,
    /// Base64 nonce, AES-GCM only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iv: Option<String>,
    #[serde(default)]
    pub timestamp: Value,
    #[serde(rename = "type", default)]
    pub kind: Value,
}

impl EncryptedMessage {
    /// Build an envelope around `encrypted_data`, copying routing metadata
    /// from the plaintext `message`.
    pub fn wrap(
        message: &Value,
        method: EncryptionMethod,
        encrypted_data: String,
        iv: Option<String>,
    ) -> Self {
        let field = |name: &str| message.get(name).cloned().unwrap_or(Value::Null);
        let timestamp = match message.get("timestamp") {
            Some(ts) if !ts.is_null() => ts.clone(),
            _ => Value::String(chrono::Utc::now().to_rfc3339()),
        };
        Self {
            id: field("id"),
            sender: field("sender"),
            recipient: field("recipient"),
            channel: field("channel"),
            encrypted: true,
            encryption_method: method.as_str().to_string(),
            encrypted_data,
            iv,
            timestamp,
            kind: field("type"),
        }
    }

    /// The recorded method, if it is one this client knows.
    pub fn method(&self) -> HcResult<EncryptionMethod> {
        EncryptionMethod::parse(&self.encryption_method)
    }
}

/// Result of `EncryptionService::encrypt_message`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SealedMessage {
    /// Fully wrapped in an encrypted envelope.
    Encrypted(EncryptedMessage),
    /// The original message tagged `encrypted: false`.
    Plain(Value),
}

impl SealedMessage {
    /// Tag a message as plaintext.
    pub fn plain(message: &Value) -> Self {
        let mut message = message.clone();
        if let Value::Object(map) = &mut message {
            map.insert("encrypted".into(), Value::Bool(false));
        }
        Self::Plain(message)
    }

    /// Whether the message is wrapped in an encrypted envelope.
    pub fn is_encrypted(&self) -> bool {
        matches!(self, Self::Encrypted(_))
    }

    /// Convert to a JSON value for sending or storage.
    pub fn to_value(&self) -> Value {
        match self {
            Self::Encrypted(m) => serde_json::to_value(m).unwrap_or(Value::Null),
            Self::Plain(v) => v.clone(),
        }
    }
}

/// Placeholder for a message that could not be decrypted.
pub(crate) fn undecryptable(message: &Value) -> Value {
    let field = |name: &str| message.get(name).cloned().unwrap_or(Value::Null);
    serde_json::json!({
        "id": field("id"),
        "sender": field("sender"),
        "recipient": field("recipient"),
        "channel": field("channel"),
        "timestamp": field("timestamp"),
        "text": UNDECRYPTABLE_TEXT,
        "decryptionFailed": true,
    })
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
        Value::Null => false,
    }
}

fn deserialize_truthy<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    Value::deserialize(deserializer).map(|v| truthy(&v))
}

/// JSON truthiness of the `encrypted` flag.
pub(crate) fn is_encrypted_flag(message: &Value) -> bool {
    message.get("encrypted").is_some_and(truthy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_method_labels() {
        assert_eq!(EncryptionMethod::parse("AES-GCM").unwrap(), EncryptionMethod::AesGcm);
        assert_eq!(EncryptionMethod::parse("XOR").unwrap(), EncryptionMethod::Xor);
        assert!(matches!(
            EncryptionMethod::parse("RSA"),
            Err(HcError::UnsupportedMethod(m)) if m == "RSA"
        ));
    }

    #[test]
    fn test_wrap_copies_metadata() {
        let msg = json!({
            "id": 42,
            "sender": "dr.house",
            "channel": "cardiology",
            "type": "text",
            "text": "hello",
            "timestamp": "2024-03-01T10:00:00Z"
        });
        let env = EncryptedMessage::wrap(&msg, EncryptionMethod::AesGcm, "ZGF0YQ==".into(), Some("aXY=".into()));
        let value = serde_json::to_value(&env).unwrap();

        assert_eq!(value["id"], 42);
        assert_eq!(value["recipient"], Value::Null);
        assert_eq!(value["encryptionMethod"], "AES-GCM");
        assert_eq!(value["encryptedData"], "ZGF0YQ==");
        assert_eq!(value["iv"], "aXY=");
        assert_eq!(value["type"], "text");
        assert_eq!(value["encrypted"], true);
        assert!(value.get("text").is_none());
    }

    #[test]
    fn test_wrap_without_iv_omits_field() {
        let env = EncryptedMessage::wrap(&json!({"id": 1}), EncryptionMethod::Xor, "AA==".into(), None);
        let value = serde_json::to_value(&env).unwrap();
        assert!(value.get("iv").is_none());
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn test_plain_tags_unencrypted() {
        let sealed = SealedMessage::plain(&json!({"id": 1, "text": "hi"}));
        assert!(!sealed.is_encrypted());
        assert_eq!(sealed.to_value()["encrypted"], false);
    }

    #[test]
    fn test_encrypted_flag_truthiness() {
        assert!(is_encrypted_flag(&json!({"encrypted": true})));
        assert!(is_encrypted_flag(&json!({"encrypted": 1})));
        assert!(!is_encrypted_flag(&json!({"encrypted": false})));
        assert!(!is_encrypted_flag(&json!({"encrypted": 0})));
        assert!(!is_encrypted_flag(&json!({"encrypted": ""})));
        assert!(!is_encrypted_flag(&json!({"text": "hi"})));
    }

    #[test]
    fn test_undecryptable_placeholder() {
        let placeholder = undecryptable(&json!({
            "id": "m1",
            "sender": "u1",
            "channel": "c1",
            "timestamp": "t",
            "encryptedData": "xx"
        }));
        assert_eq!(placeholder["id"], "m1");
        assert_eq!(placeholder["recipient"], Value::Null);
        assert_eq!(placeholder["text"], UNDECRYPTABLE_TEXT);
        assert_eq!(placeholder["decryptionFailed"], true);
        assert!(placeholder.get("encryptedData").is_none());
    }
}
