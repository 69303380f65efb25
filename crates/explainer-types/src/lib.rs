//! Shared value types for the artifact explainer.
//!
//! Everything here is plain data: artifact records, the normalized result
//! shapes every tier maps into, and the lifecycle states of the model
//! service and the warmed local model.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Placeholder rendered wherever an artifact field is missing or blank.
pub const UNKNOWN: &str = "Unknown";

// ─── Artifact record ──────────────────────────────────────────────────

/// Museum object metadata as stored in the artifact catalog.
///
/// Only `id` is mandatory; every descriptive field may be absent.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub era: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub materials: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbolism: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// Relative or absolute path of the artifact's primary image.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

/// Descriptive fields of an [`Artifact`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ArtifactField {
    Name,
    Category,
    Origin,
    Era,
    Materials,
    Function,
    Symbolism,
    Notes,
}

impl ArtifactField {
    pub const ALL: [ArtifactField; 8] = [
        ArtifactField::Name,
        ArtifactField::Category,
        ArtifactField::Origin,
        ArtifactField::Era,
        ArtifactField::Materials,
        ArtifactField::Function,
        ArtifactField::Symbolism,
        ArtifactField::Notes,
    ];
}

impl Artifact {
    /// Field value, treating blank strings as missing.
    pub fn field(&self, field: ArtifactField) -> Option<&str> {
        let value = match field {
            ArtifactField::Name => &self.name,
            ArtifactField::Category => &self.category,
            ArtifactField::Origin => &self.origin,
            ArtifactField::Era => &self.era,
            ArtifactField::Materials => &self.materials,
            ArtifactField::Function => &self.function,
            ArtifactField::Symbolism => &self.symbolism,
            ArtifactField::Notes => &self.notes,
        };
        value.as_deref().map(str::trim).filter(|v| !v.is_empty())
    }

    /// Field value or [`UNKNOWN`].
    pub fn field_or_unknown(&self, field: ArtifactField) -> &str {
        self.field(field).unwrap_or(UNKNOWN)
    }

    pub fn display_name(&self) -> &str {
        self.field_or_unknown(ArtifactField::Name)
    }
}

// ─── Normalized results ───────────────────────────────────────────────

/// Which tier produced a result.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResultSource {
    #[serde(rename = "trained_model")]
    TrainedModel,
    #[serde(rename = "openai")]
    OpenAi,
    #[serde(rename = "openai_vision")]
    OpenAiVision,
    #[serde(rename = "template")]
    Template,
    #[serde(rename = "error")]
    Error,
}

impl ResultSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultSource::TrainedModel => "trained_model",
            ResultSource::OpenAi => "openai",
            ResultSource::OpenAiVision => "openai_vision",
            ResultSource::Template => "template",
            ResultSource::Error => "error",
        }
    }
}

impl std::fmt::Display for ResultSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExplanationResult {
    pub text: String,
    pub source: ResultSource,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ComparisonResult {
    pub artifact1: Artifact,
    pub artifact2: Artifact,
    pub comparison: String,
    pub similarities: Vec<String>,
    pub differences: Vec<String>,
    /// Cosine similarity reported by the trained model, 0 for other tiers.
    pub similarity_score: f64,
    pub relationship_type: String,
    pub same_cluster: bool,
    pub source: ResultSource,
}

/// Outcome of a visual comparison.
///
/// Serialized untagged so callers see either the analysis or an
/// `{error, ..., source}` object.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VisualComparisonResult {
    Success {
        artifact1: Artifact,
        artifact2: Artifact,
        visual_comparison: Value,
        source: ResultSource,
        success: bool,
    },
    Failure {
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        raw_response: Option<String>,
        source: ResultSource,
    },
}

impl VisualComparisonResult {
    pub fn is_success(&self) -> bool {
        matches!(self, VisualComparisonResult::Success { .. })
    }

    pub fn source(&self) -> ResultSource {
        match self {
            VisualComparisonResult::Success { source, .. }
            | VisualComparisonResult::Failure { source, .. } => *source,
        }
    }
}

/// One neighbour returned by the model service's `similar` action.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimilarArtifact {
    pub artifact_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub similarity: f64,
}

// ─── Lifecycle states ─────────────────────────────────────────────────

/// Lifecycle of the model service subprocess.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    Starting,
    Ready,
    Failed,
    Terminated,
}

impl ServiceState {
    /// Whether moving from `self` to `next` respects the monotonic lifecycle:
    /// Starting→Ready|Failed, any→Terminated.
    pub fn can_transition_to(self, next: ServiceState) -> bool {
        match (self, next) {
            (ServiceState::Terminated, _) => false,
            (_, ServiceState::Terminated) => true,
            (ServiceState::Starting, ServiceState::Ready | ServiceState::Failed) => true,
            _ => false,
        }
    }
}

/// Lifecycle of the in-process local model.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarmupState {
    NotStarted,
    Loading,
    Ready,
    Failed,
}

/// What the model service reports about its trained model.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ModelStatus {
    Untrained,
    Trained {
        artifact_count: u64,
        model_name: String,
    },
}

impl ModelStatus {
    pub fn is_trained(&self) -> bool {
        matches!(self, ModelStatus::Trained { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_fields_render_unknown() {
        let artifact = Artifact {
            id: "a1".into(),
            name: Some("  ".into()),
            origin: Some("Kandy".into()),
            ..Default::default()
        };
        assert_eq!(artifact.display_name(), UNKNOWN);
        assert_eq!(artifact.field_or_unknown(ArtifactField::Origin), "Kandy");
        assert_eq!(artifact.field(ArtifactField::Era), None);
    }

    #[test]
    fn test_service_state_is_monotonic() {
        use ServiceState::*;
        assert!(Starting.can_transition_to(Ready));
        assert!(Starting.can_transition_to(Failed));
        assert!(Ready.can_transition_to(Terminated));
        assert!(Failed.can_transition_to(Terminated));
        assert!(!Failed.can_transition_to(Ready));
        assert!(!Ready.can_transition_to(Starting));
        assert!(!Terminated.can_transition_to(Terminated));
    }

    #[test]
    fn test_source_serializes_to_wire_names() {
        let json = serde_json::to_string(&ResultSource::TrainedModel).unwrap();
        assert_eq!(json, "\"trained_model\"");
        let json = serde_json::to_string(&ResultSource::OpenAi).unwrap();
        assert_eq!(json, "\"openai\"");
    }

    #[test]
    fn test_visual_failure_serializes_flat() {
        let result = VisualComparisonResult::Failure {
            error: "OpenAI API not available".into(),
            message: Some("Visual comparison requires OpenAI API key".into()),
            raw_response: None,
            source: ResultSource::Error,
        };
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["source"], "error");
        assert!(value.get("raw_response").is_none());
        assert!(!result.is_success());
    }

    #[test]
    fn test_model_status_tagging() {
        let status = ModelStatus::Trained {
            artifact_count: 12,
            model_name: "tfidf-lexical".into(),
        };
        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(value["state"], "trained");
        assert_eq!(value["artifact_count"], 12);
        assert!(status.is_trained());
    }
}
