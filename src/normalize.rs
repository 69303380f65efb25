//! Mapping from each tier's raw output to the common result types.
//!
//! Omitted optional fields get fixed defaults: `similarity_score` 0,
//! `relationship_type` "unknown", `same_cluster` false, and missing
//! similarity/difference lists are derived from the records themselves.

use explainer_types::{
    Artifact, ComparisonResult, ExplanationResult, ModelStatus, ResultSource, SimilarArtifact,
    VisualComparisonResult,
};
use serde_json::Value;

use crate::error::TierError;
use crate::remote::remove_markdown;
use crate::service::ipc_types::JsonObject;
use crate::template::{extract_differences, extract_similarities, TemplateEngine};

pub const UNKNOWN_RELATIONSHIP: &str = "unknown";

fn service_error(reply: &JsonObject) -> Option<TierError> {
    reply.get("error").map(|err| {
        TierError::Service(match err {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    })
}

fn string_list(value: Option<&Value>) -> Option<Vec<String>> {
    let items = value?.as_array()?;
    Some(
        items
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
    )
}

fn non_empty(text: &str) -> Result<String, TierError> {
    let text = text.trim();
    if text.is_empty() {
        Err(TierError::Degenerate(0))
    } else {
        Ok(text.to_string())
    }
}

/// Trained-model reply to a `compare` request. An `error` field or empty
/// comparison text rejects the reply.
pub fn comparison_from_service(
    reply: &JsonObject,
    first: &Artifact,
    second: &Artifact,
) -> Result<ComparisonResult, TierError> {
    if let Some(err) = service_error(reply) {
        return Err(err);
    }
    let comparison = non_empty(reply.get("comparison").and_then(Value::as_str).unwrap_or(""))?;

    Ok(ComparisonResult {
        artifact1: first.clone(),
        artifact2: second.clone(),
        comparison,
        similarities: string_list(reply.get("similarities")).unwrap_or_default(),
        differences: string_list(reply.get("differences")).unwrap_or_default(),
        similarity_score: reply.get("similarity_score").and_then(Value::as_f64).unwrap_or(0.0),
        relationship_type: reply
            .get("relationship_type")
            .and_then(Value::as_str)
            .unwrap_or(UNKNOWN_RELATIONSHIP)
            .to_string(),
        same_cluster: reply.get("same_cluster").and_then(Value::as_bool).unwrap_or(false),
        source: ResultSource::TrainedModel,
    })
}

/// Remote structured reply `{comparison, similarities?, differences?}`.
pub fn comparison_from_remote(
    reply: &Value,
    first: &Artifact,
    second: &Artifact,
) -> Result<ComparisonResult, TierError> {
    let text = reply.get("comparison").and_then(Value::as_str).unwrap_or("");
    let comparison = non_empty(&remove_markdown(text))?;

    Ok(ComparisonResult {
        artifact1: first.clone(),
        artifact2: second.clone(),
        comparison,
        similarities: string_list(reply.get("similarities"))
            .filter(|l| !l.is_empty())
            .unwrap_or_else(|| extract_similarities(first, second)),
        differences: string_list(reply.get("differences"))
            .filter(|l| !l.is_empty())
            .unwrap_or_else(|| extract_differences(first, second)),
        similarity_score: 0.0,
        relationship_type: UNKNOWN_RELATIONSHIP.to_string(),
        same_cluster: false,
        source: ResultSource::OpenAi,
    })
}

pub fn comparison_from_template(
    engine: &TemplateEngine,
    first: &Artifact,
    second: &Artifact,
) -> ComparisonResult {
    ComparisonResult {
        artifact1: first.clone(),
        artifact2: second.clone(),
        comparison: engine.compare(first, second),
        similarities: extract_similarities(first, second),
        differences: extract_differences(first, second),
        similarity_score: 0.0,
        relationship_type: UNKNOWN_RELATIONSHIP.to_string(),
        same_cluster: false,
        source: ResultSource::Template,
    }
}

/// Local generations must be longer than `min_chars` to count.
pub fn explanation_from_local(text: &str, min_chars: usize) -> Result<ExplanationResult, TierError> {
    let text = text.trim();
    let chars = text.chars().count();
    if chars <= min_chars {
        return Err(TierError::Degenerate(chars));
    }
    Ok(ExplanationResult {
        text: text.to_string(),
        source: ResultSource::TrainedModel,
    })
}

pub fn explanation_from_remote(text: &str) -> Result<ExplanationResult, TierError> {
    Ok(ExplanationResult {
        text: non_empty(&remove_markdown(text))?,
        source: ResultSource::OpenAi,
    })
}

pub fn explanation_from_template(engine: &TemplateEngine, artifact: &Artifact) -> ExplanationResult {
    ExplanationResult {
        text: engine.explain(artifact),
        source: ResultSource::Template,
    }
}

/// Status reply to the tagged status type; anything unusable is Untrained.
pub fn model_status_from_reply(reply: &JsonObject) -> ModelStatus {
    if service_error(reply).is_some() {
        return ModelStatus::Untrained;
    }
    if reply.get("model_trained").and_then(Value::as_bool) != Some(true) {
        return ModelStatus::Untrained;
    }
    ModelStatus::Trained {
        artifact_count: reply.get("artifacts").and_then(Value::as_u64).unwrap_or(0),
        model_name: reply
            .get("model_name")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string(),
    }
}

pub fn similar_from_reply(reply: &JsonObject) -> Result<Vec<SimilarArtifact>, TierError> {
    if let Some(err) = service_error(reply) {
        return Err(err);
    }
    let similar = reply.get("similar").cloned().unwrap_or(Value::Array(Vec::new()));
    serde_json::from_value(similar).map_err(|e| TierError::Service(format!("malformed similar list: {e}")))
}

// ─── Visual comparison ────────────────────────────────────────────────

pub fn visual_success(first: &Artifact, second: &Artifact, analysis: Value) -> VisualComparisonResult {
    VisualComparisonResult::Success {
        artifact1: first.clone(),
        artifact2: second.clone(),
        visual_comparison: analysis,
        source: ResultSource::OpenAiVision,
        success: true,
    }
}

/// No remote vision capability configured.
pub fn visual_unavailable() -> VisualComparisonResult {
    VisualComparisonResult::Failure {
        error: "OpenAI API not available".to_string(),
        message: Some("Visual comparison requires OpenAI API key".to_string()),
        raw_response: None,
        source: ResultSource::Error,
    }
}

/// Map a failed vision call. An unparseable reply keeps the raw text.
pub fn visual_failure(error: TierError) -> VisualComparisonResult {
    match error {
        TierError::MalformedJson { raw } => VisualComparisonResult::Failure {
            error: "Failed to parse vision response".to_string(),
            message: None,
            raw_response: Some(raw),
            source: ResultSource::OpenAiVision,
        },
        other => VisualComparisonResult::Failure {
            error: format!("Visual comparison failed: {other}"),
            message: None,
            raw_response: None,
            source: ResultSource::Error,
        },
    }
}
