//! Normalization of inbound stream frames.

use serde_json::{Value, json};

/// What one inbound frame turns into.
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    /// Always broadcast on `realtime:update`.
    pub realtime: Value,
    /// Set when the record is a media packet carrying a status.
    pub media: Option<MediaUpdate>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MediaUpdate {
    pub record: Value,
    pub status: String,
}

/// Parse a text frame. Non-JSON text is wrapped as `{"type":"raw","data":...}`.
pub fn normalize_text(text: &str) -> Normalized {
    match serde_json::from_str::<Value>(text) {
        Ok(record) => normalize_record(record),
        Err(_) => Normalized {
            realtime: json!({ "type": "raw", "data": text }),
            media: None,
        },
    }
}

/// Binary frames are decoded lossily and treated like text.
pub fn normalize_binary(bytes: &[u8]) -> Normalized {
    normalize_text(&String::from_utf8_lossy(bytes))
}

fn normalize_record(record: Value) -> Normalized {
    let media = is_media_packet(&record)
        .then(|| media_status(&record))
        .flatten()
        .map(|status| MediaUpdate {
            record: record.clone(),
            status,
        });
    Normalized {
        realtime: record,
        media,
    }
}

/// `type == "media"`, `kind == "media"`, or a `mediaStatus` key.
pub fn is_media_packet(record: &Value) -> bool {
    record.get("type").and_then(Value::as_str) == Some("media")
        || record.get("kind").and_then(Value::as_str) == Some("media")
        || record.get("mediaStatus").is_some()
}

/// First truthy of `mediaStatus`, `status`, `state`, rendered as a string.
/// Null, `false`, zero and the empty string count as absent.
pub fn media_status(record: &Value) -> Option<String> {
    ["mediaStatus", "status", "state"]
        .into_iter()
        .filter_map(|key| record.get(key))
        .find_map(|value| match value {
            Value::Null | Value::Bool(false) => None,
            Value::Number(n) if n.as_f64() == Some(0.0) => None,
            Value::String(s) if s.is_empty() => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        })
}
