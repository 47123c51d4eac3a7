//! User and channel lists maintained from `user_status` and
//! `channel_update` frames.
//!
//! A frame carrying an array (bare, or under `users` / `channels`) is a
//! snapshot and replaces the list. Anything else is a delta for a single
//! record, matched by `id` and shallow-merged; channel deltas flagged
//! `deleted: true` remove the record.

use serde_json::{Map, Value};
use tokio::sync::watch;
use tracing::{debug, warn};

/// Watch-backed user and channel lists.
pub struct Directory {
    users: watch::Sender<Vec<Value>>,
    channels: watch::Sender<Vec<Value>>,
}

impl Default for Directory {
    fn default() -> Self {
        Self::new()
    }
}

impl Directory {
    pub fn new() -> Self {
        let (users, _) = watch::channel(Vec::new());
        let (channels, _) = watch::channel(Vec::new());
        Self { users, channels }
    }

    pub fn subscribe_users(&self) -> watch::Receiver<Vec<Value>> {
        self.users.subscribe()
    }

    pub fn subscribe_channels(&self) -> watch::Receiver<Vec<Value>> {
        self.channels.subscribe()
    }

    pub fn users(&self) -> Vec<Value> {
        self.users.borrow().clone()
    }

    pub fn channels(&self) -> Vec<Value> {
        self.channels.borrow().clone()
    }

    /// Apply a `user_status` payload.
    pub fn apply_user_status(&self, payload: &Value) {
        apply(&self.users, payload, "users", false);
    }

    /// Apply a `channel_update` payload.
    pub fn apply_channel_update(&self, payload: &Value) {
        apply(&self.channels, payload, "channels", true);
    }

    pub fn clear(&self) {
        self.users.send_replace(Vec::new());
        self.channels.send_replace(Vec::new());
    }
}

fn apply(list: &watch::Sender<Vec<Value>>, payload: &Value, field: &str, allow_delete: bool) {
    if let Some(snapshot) = snapshot_of(payload, field) {
        debug!(category = "directory", field, count = snapshot.len(), "snapshot received");
        list.send_replace(snapshot.clone());
        return;
    }

    let Some(delta) = payload.as_object() else {
        warn!(category = "directory", field, "ignoring update that is neither a list nor an object");
        return;
    };
    let Some(id) = record_id(payload) else {
        warn!(category = "directory", field, "ignoring update without id");
        return;
    };

    let deleted = allow_delete && delta.get("deleted").and_then(Value::as_bool).unwrap_or(false);
    list.send_modify(|records| {
        let position = records.iter().position(|r| record_id(r).as_deref() == Some(id.as_str()));
        match (position, deleted) {
            (Some(i), true) => {
                records.remove(i);
            }
            (None, true) => {}
            (Some(i), false) => merge_into(&mut records[i], delta),
            (None, false) => records.push(payload.clone()),
        }
    });
}

fn snapshot_of<'a>(payload: &'a Value, field: &str) -> Option<&'a Vec<Value>> {
    payload
        .as_array()
        .or_else(|| payload.get(field).and_then(Value::as_array))
}

fn merge_into(record: &mut Value, delta: &Map<String, Value>) {
    match record.as_object_mut() {
        Some(existing) => {
            for (k, v) in delta {
                existing.insert(k.clone(), v.clone());
            }
        }
        None => *record = Value::Object(delta.clone()),
    }
}

/// Record id as a string; numeric ids compare equal to their string form.
fn record_id(record: &Value) -> Option<String> {
    match record.get("id")? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
