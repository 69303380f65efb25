//! IPC protocol types for client ↔ model service communication.
//!
//! Uses JSON Lines (one JSON object per line) over stdin/stdout pipes.
//! Any line that does not start with `{` is diagnostic noise.

use explainer_types::SimilarArtifact;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub type JsonObject = serde_json::Map<String, Value>;

/// Requests the client sends to the model service.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum ServiceRequest {
    /// Compare two catalog artifacts.
    Compare {
        artifact1_id: String,
        artifact2_id: String,
    },
    /// Nearest neighbours of one artifact.
    Similar { artifact_id: String, top_k: usize },
    /// Model status.
    Status,
}

/// First meaningful line printed by the model service.
#[derive(Debug, Clone, PartialEq)]
pub enum Handshake {
    Ready { artifacts: u64 },
    Error(String),
}

/// Parse a protocol line. Returns `None` for noise: anything not starting
/// with `{` or not decoding to a JSON object.
pub fn parse_json_line(line: &str) -> Option<JsonObject> {
    let trimmed = line.trim();
    if !trimmed.starts_with('{') {
        return None;
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// Interpret a startup object. Objects that are neither a ready signal nor an
/// error are not part of the handshake.
pub fn classify_handshake(object: &JsonObject) -> Option<Handshake> {
    if object.get("status").and_then(Value::as_str) == Some("ready") {
        let artifacts = object.get("artifacts").and_then(Value::as_u64).unwrap_or(0);
        return Some(Handshake::Ready { artifacts });
    }
    object.get("error").map(|err| {
        Handshake::Error(match err {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    })
}

// ─── Replies written by the model service ─────────────────────────────

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ReadyLine {
    pub status: String,
    pub artifacts: usize,
}

impl ReadyLine {
    pub fn new(artifacts: usize) -> Self {
        Self {
            status: "ready".to_string(),
            artifacts,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ErrorReply {
    pub error: String,
}

impl ErrorReply {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CompareReply {
    pub comparison: String,
    pub similarities: Vec<String>,
    pub differences: Vec<String>,
    pub similarity_score: f64,
    pub relationship_type: String,
    pub same_cluster: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SimilarReply {
    pub artifact_id: String,
    pub similar: Vec<SimilarArtifact>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct StatusReply {
    pub model_trained: bool,
    pub artifacts: usize,
    pub model_name: String,
    pub clusters: usize,
}
