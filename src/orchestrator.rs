//! Tiered routing of explain/compare requests.
//!
//! Tiers are tried strictly in order (offline model, remote API, template).
//! A tier is skipped when its backing state is not available and abandoned
//! on any error or degenerate output; the template tier always answers.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use explainer_config::{ExplainerConfig, LocalModelConfig};
use explainer_types::{
    Artifact, ComparisonResult, ExplanationResult, ModelStatus, SimilarArtifact, VisualComparisonResult,
};
use log::{info, warn};

use crate::error::TierError;
use crate::images::{encode_image, resolve_image_path};
use crate::local_model::{LocalExplainer, NeighborhoodExplainer};
use crate::normalize::{
    comparison_from_remote, comparison_from_service, comparison_from_template, explanation_from_local,
    explanation_from_remote, explanation_from_template, model_status_from_reply, similar_from_reply,
    visual_failure, visual_success, visual_unavailable,
};
use crate::remote::{
    comparison_prompt, explanation_prompt, visual_prompt, OpenAiClient, RemoteInference,
    COMPARE_MAX_TOKENS, COMPARE_SYSTEM_PROMPT, EXPLAIN_MAX_TOKENS, EXPLAIN_SYSTEM_PROMPT,
    VISUAL_MAX_TOKENS,
};
use crate::service::ipc_types::ServiceRequest;
use crate::service::process_supervisor::{ProcessSupervisor, ServiceCommand, ServiceTimeouts};
use crate::template::TemplateEngine;
use crate::warmup::BackgroundWarmupController;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tier {
    OfflineModel,
    RemoteApi,
    Template,
}

pub const TIER_ORDER: [Tier; 3] = [Tier::OfflineModel, Tier::RemoteApi, Tier::Template];

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Tier::OfflineModel => "offline model",
            Tier::RemoteApi => "remote API",
            Tier::Template => "template",
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FallbackPolicy {
    /// Longest `explain` waits for a still-loading local model.
    pub warmup_wait: Duration,
    /// Local explanations must be longer than this many characters.
    pub min_explanation_chars: usize,
}

impl Default for FallbackPolicy {
    fn default() -> Self {
        Self::from(&LocalModelConfig::default())
    }
}

impl From<&LocalModelConfig> for FallbackPolicy {
    fn from(config: &LocalModelConfig) -> Self {
        Self {
            warmup_wait: config.warmup_wait(),
            min_explanation_chars: config.min_explanation_chars,
        }
    }
}

/// Explicit handle over every backend. Owns the model service; dropping the
/// orchestrator shuts it down.
pub struct FallbackOrchestrator {
    service: Option<ProcessSupervisor>,
    warmup: BackgroundWarmupController,
    remote: Option<Box<dyn RemoteInference>>,
    template: TemplateEngine,
    image_roots: Vec<PathBuf>,
    policy: FallbackPolicy,
}

impl Default for FallbackOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl FallbackOrchestrator {
    /// Template-only orchestrator; attach backends with the `with_*` methods.
    pub fn new() -> Self {
        Self {
            service: None,
            warmup: BackgroundWarmupController::disabled(),
            remote: None,
            template: TemplateEngine::new(),
            image_roots: vec![PathBuf::from(".")],
            policy: FallbackPolicy::default(),
        }
    }

    pub fn with_service(mut self, service: ProcessSupervisor) -> Self {
        self.service = Some(service);
        self
    }

    pub fn with_warmup(mut self, warmup: BackgroundWarmupController) -> Self {
        self.warmup = warmup;
        self
    }

    pub fn with_remote(mut self, remote: impl RemoteInference + 'static) -> Self {
        self.remote = Some(Box::new(remote));
        self
    }

    pub fn with_image_roots(mut self, roots: Vec<PathBuf>) -> Self {
        self.image_roots = roots;
        self
    }

    pub fn with_policy(mut self, policy: FallbackPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Start every configured backend. The model service and the local
    /// model warm up in the background; this returns immediately.
    pub fn from_config(config: &ExplainerConfig) -> Self {
        let mut orchestrator = Self::new()
            .with_image_roots(config.image_roots.clone())
            .with_policy(FallbackPolicy::from(&config.local_model));

        if config.model_service.enabled {
            match ServiceCommand::from_config(&config.model_service, &config.catalog_path) {
                Ok(command) => {
                    let timeouts = ServiceTimeouts::from(&config.model_service);
                    orchestrator = orchestrator.with_service(ProcessSupervisor::spawn(&command, timeouts));
                }
                Err(e) => warn!("[ORCHESTRATOR] Cannot build model service command: {e}"),
            }
        }

        if config.local_model.enabled {
            let catalog = config.catalog_path.clone();
            orchestrator = orchestrator.with_warmup(BackgroundWarmupController::start(move || {
                NeighborhoodExplainer::load(&catalog).map(|m| Arc::new(m) as Arc<dyn LocalExplainer>)
            }));
        }

        if let Some(client) = OpenAiClient::from_config(&config.remote) {
            orchestrator = orchestrator.with_remote(client);
        }
        orchestrator
    }

    pub fn service(&self) -> Option<&ProcessSupervisor> {
        self.service.as_ref()
    }

    pub fn warmup(&self) -> &BackgroundWarmupController {
        &self.warmup
    }

    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }

    /// Stop the model service. Also runs on drop.
    pub fn shutdown(&self) {
        if let Some(service) = &self.service {
            service.shutdown();
        }
    }

    // ─── Operations ───────────────────────────────────────────────────

    pub fn explain(&self, artifact: &Artifact) -> ExplanationResult {
        info!("[ORCHESTRATOR] Explaining {}", artifact.display_name());
        self.run_tiers(
            "explain",
            |tier| match tier {
                Tier::OfflineModel => self.explain_offline(artifact),
                Tier::RemoteApi => self.explain_remote(artifact),
                Tier::Template => Ok(explanation_from_template(&self.template, artifact)),
            },
        )
        .unwrap_or_else(|| explanation_from_template(&self.template, artifact))
    }

    pub fn compare(&self, first: &Artifact, second: &Artifact) -> ComparisonResult {
        info!(
            "[ORCHESTRATOR] Comparing {} with {}",
            first.display_name(),
            second.display_name()
        );
        self.run_tiers(
            "compare",
            |tier| match tier {
                Tier::OfflineModel => self.compare_offline(first, second),
                Tier::RemoteApi => self.compare_remote(first, second),
                Tier::Template => Ok(comparison_from_template(&self.template, first, second)),
            },
        )
        .unwrap_or_else(|| comparison_from_template(&self.template, first, second))
    }

    /// Visual comparison has no offline or template equivalent: without a
    /// remote backend the caller gets a structured error.
    pub fn compare_visual(
        &self,
        first: &Artifact,
        second: &Artifact,
        image1: &str,
        image2: &str,
    ) -> VisualComparisonResult {
        let Some(remote) = self.remote.as_deref() else {
            warn!("[ORCHESTRATOR] Visual comparison requested without a remote backend");
            return visual_unavailable();
        };

        let encoded = [image1, image2]
            .iter()
            .map(|image| resolve_image_path(image, &self.image_roots).and_then(|path| encode_image(&path)))
            .collect::<Result<Vec<_>, _>>();
        let images = match encoded {
            Ok(images) => images,
            Err(e) => {
                warn!("[ORCHESTRATOR] Visual comparison: {e}");
                return visual_failure(e);
            }
        };

        match remote.analyze_images(&visual_prompt(first, second), &images, VISUAL_MAX_TOKENS) {
            Ok(analysis) => visual_success(first, second, analysis),
            Err(e) => {
                warn!("[ORCHESTRATOR] Visual comparison failed: {e}");
                visual_failure(e)
            }
        }
    }

    /// Nearest catalog neighbours from the trained model; empty when the
    /// model service cannot answer.
    pub fn similar(&self, artifact: &Artifact, top_k: usize) -> Vec<SimilarArtifact> {
        let result = self.ready_service().and_then(|service| {
            let reply = service.send(&ServiceRequest::Similar {
                artifact_id: artifact.id.clone(),
                top_k,
            })?;
            similar_from_reply(&reply)
        });
        result.unwrap_or_else(|e| {
            info!("[ORCHESTRATOR] similar unavailable: {e}");
            Vec::new()
        })
    }

    pub fn model_status(&self) -> ModelStatus {
        match self
            .ready_service()
            .and_then(|service| service.send(&ServiceRequest::Status).map_err(TierError::from))
        {
            Ok(reply) => model_status_from_reply(&reply),
            Err(e) => {
                info!("[ORCHESTRATOR] status unavailable: {e}");
                ModelStatus::Untrained
            }
        }
    }

    // ─── Tier attempts ────────────────────────────────────────────────

    /// First successful tier in [`TIER_ORDER`].
    fn run_tiers<T>(
        &self,
        operation: &str,
        mut attempt: impl FnMut(Tier) -> Result<T, TierError>,
    ) -> Option<T> {
        for tier in TIER_ORDER {
            match attempt(tier) {
                Ok(result) => {
                    info!("[ORCHESTRATOR] {operation} answered by {tier}");
                    return Some(result);
                }
                Err(TierError::Unavailable(why)) => {
                    info!("[ORCHESTRATOR] {operation}: skipping {tier} ({why})");
                }
                Err(e) => warn!("[ORCHESTRATOR] {operation}: {tier} failed, falling through: {e}"),
            }
        }
        None
    }

    fn ready_service(&self) -> Result<&ProcessSupervisor, TierError> {
        self.service
            .as_ref()
            .filter(|service| service.is_ready())
            .ok_or(TierError::Unavailable("model service not ready"))
    }

    fn remote(&self) -> Result<&dyn RemoteInference, TierError> {
        self.remote
            .as_deref()
            .ok_or(TierError::Unavailable("no remote credential configured"))
    }

    fn explain_offline(&self, artifact: &Artifact) -> Result<ExplanationResult, TierError> {
        let model = self
            .warmup
            .wait_ready(self.policy.warmup_wait)
            .ok_or(TierError::Unavailable("local model not ready"))?;
        let text = panic::catch_unwind(AssertUnwindSafe(|| model.explain(artifact)))
            .map_err(|_| TierError::LocalModel("local model panicked".to_string()))??;
        explanation_from_local(&text, self.policy.min_explanation_chars)
    }

    fn explain_remote(&self, artifact: &Artifact) -> Result<ExplanationResult, TierError> {
        let text = self.remote()?.generate_text(
            EXPLAIN_SYSTEM_PROMPT,
            &explanation_prompt(artifact),
            EXPLAIN_MAX_TOKENS,
        )?;
        explanation_from_remote(&text)
    }

    fn compare_offline(&self, first: &Artifact, second: &Artifact) -> Result<ComparisonResult, TierError> {
        let reply = self.ready_service()?.send(&ServiceRequest::Compare {
            artifact1_id: first.id.clone(),
            artifact2_id: second.id.clone(),
        })?;
        comparison_from_service(&reply, first, second)
    }

    fn compare_remote(&self, first: &Artifact, second: &Artifact) -> Result<ComparisonResult, TierError> {
        let reply = self.remote()?.generate_structured(
            COMPARE_SYSTEM_PROMPT,
            &comparison_prompt(first, second),
            COMPARE_MAX_TOKENS,
        )?;
        comparison_from_remote(&reply, first, second)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::images::EncodedImage;
    use crate::service::testing::{fast_timeouts, scripted_service};
    use explainer_types::{ResultSource, ServiceState};
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Instant;

    const READY: &str = r#"{"status":"ready","artifacts":2}"#;

    fn kris() -> Artifact {
        Artifact {
            id: "kris".into(),
            name: Some("Kris Dagger".into()),
            category: Some("Weapon".into()),
            origin: Some("Java".into()),
            era: Some("14th century".into()),
            materials: Some("Iron and gold".into()),
            ..Default::default()
        }
    }

    fn kastane() -> Artifact {
        Artifact {
            id: "kastane".into(),
            name: Some("Kastane Sword".into()),
            category: Some("Weapon".into()),
            origin: Some("Sri Lanka".into()),
            materials: Some("Steel and gold".into()),
            ..Default::default()
        }
    }

    #[derive(Default)]
    struct MockRemote {
        fail: bool,
        vision_raw: Option<String>,
        calls: Arc<AtomicUsize>,
    }

    impl RemoteInference for MockRemote {
        fn generate_text(&self, _system: &str, _prompt: &str, _max: u32) -> Result<String, TierError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(TierError::Remote("HTTP 429: quota exceeded".into()));
            }
            Ok("## Kris\nThe **kris** is a remote explanation.".into())
        }

        fn generate_structured(&self, _system: &str, _prompt: &str, _max: u32) -> Result<Value, TierError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(TierError::Remote("connection refused".into()));
            }
            Ok(json!({"comparison": "Remote comparison.", "similarities": ["Both are blades"]}))
        }

        fn analyze_images(&self, _prompt: &str, images: &[EncodedImage], _max: u32) -> Result<Value, TierError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert_eq!(images.len(), 2);
            match &self.vision_raw {
                Some(raw) => Err(TierError::MalformedJson { raw: raw.clone() }),
                None => Ok(json!({"shape_form": {"artifact_a": "wavy", "artifact_b": "straight"}})),
            }
        }
    }

    struct FixedModel(String);

    impl LocalExplainer for FixedModel {
        fn explain(&self, _artifact: &Artifact) -> Result<String, TierError> {
            Ok(self.0.clone())
        }
    }

    fn warm_model(delay: Duration, text: &str) -> BackgroundWarmupController {
        let text = text.to_string();
        BackgroundWarmupController::start(move || {
            thread::sleep(delay);
            Ok(Arc::new(FixedModel(text)) as Arc<dyn LocalExplainer>)
        })
    }

    fn compare_responder(req: &str) -> Vec<String> {
        if req.contains(r#""action":"compare""#) {
            vec![
                "Batches: 100%".to_string(),
                json!({
                    "comparison": "Trained comparison.",
                    "similarities": ["Both are weapons"],
                    "differences": [],
                    "similarity_score": 0.72,
                    "relationship_type": "closely_related",
                    "same_cluster": true
                })
                .to_string(),
            ]
        } else if req.contains(r#""action":"status""#) {
            vec![r#"{"model_trained":true,"artifacts":2,"model_name":"tfidf-lexical-v1","clusters":1}"#.into()]
        } else {
            vec![r#"{"artifact_id":"kris","similar":[{"artifact_id":"kastane","name":"Kastane Sword","similarity":0.72}]}"#.into()]
        }
    }

    #[test]
    fn test_compare_uses_trained_model_when_ready() {
        let (service, _peer) = scripted_service(&[READY], compare_responder, fast_timeouts());
        let orchestrator = FallbackOrchestrator::new().with_service(service);

        let result = orchestrator.compare(&kris(), &kastane());

        assert_eq!(result.source, ResultSource::TrainedModel);
        assert_eq!(result.comparison, "Trained comparison.");
        assert_eq!(result.similarity_score, 0.72);
        assert!(result.same_cluster);
        assert_eq!(result.relationship_type, "closely_related");
    }

    #[test]
    fn test_failed_service_is_never_attempted() {
        let (service, peer) = scripted_service(&["loading model..."], compare_responder, fast_timeouts());
        assert_eq!(service.state(), ServiceState::Failed);
        let orchestrator = FallbackOrchestrator::new().with_service(service);

        let started = Instant::now();
        let result = orchestrator.compare(&kris(), &kastane());

        assert_eq!(result.source, ResultSource::Template);
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(orchestrator.service().map(ProcessSupervisor::requests_sent), Some(0));
        assert!(peer.requests().is_empty());
    }

    #[test]
    fn test_failed_service_falls_to_remote_when_configured() {
        let (service, _peer) = scripted_service(&[r#"{"error":"no model"}"#], compare_responder, fast_timeouts());
        let orchestrator = FallbackOrchestrator::new()
            .with_service(service)
            .with_remote(MockRemote::default());

        let result = orchestrator.compare(&kris(), &kastane());

        assert_eq!(result.source, ResultSource::OpenAi);
        assert_eq!(result.comparison, "Remote comparison.");
        assert_eq!(result.similarities, vec!["Both are blades".to_string()]);
        assert!(!result.differences.is_empty());
    }

    #[test]
    fn test_starting_service_does_not_block_compare() {
        let (_tx, rx) = crossbeam_channel::unbounded::<String>();
        let service = ProcessSupervisor::from_streams(std::io::sink(), rx, ServiceTimeouts::default());
        let orchestrator = FallbackOrchestrator::new().with_service(service);

        let started = Instant::now();
        let result = orchestrator.compare(&kris(), &kastane());

        assert_eq!(result.source, ResultSource::Template);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_service_error_reply_falls_through() {
        let (service, _peer) = scripted_service(
            &[READY],
            |_req: &str| vec![r#"{"error":"Artifact not found"}"#.to_string()],
            fast_timeouts(),
        );
        let orchestrator = FallbackOrchestrator::new().with_service(service);

        let result = orchestrator.compare(&kris(), &kastane());

        assert_eq!(result.source, ResultSource::Template);
        assert_eq!(orchestrator.service().map(|s| s.state()), Some(ServiceState::Ready));
    }

    #[test]
    fn test_remote_failure_falls_to_template() {
        let calls = Arc::new(AtomicUsize::new(0));
        let orchestrator = FallbackOrchestrator::new().with_remote(MockRemote {
            fail: true,
            calls: Arc::clone(&calls),
            ..Default::default()
        });

        let comparison = orchestrator.compare(&kris(), &kastane());
        let explanation = orchestrator.explain(&kris());

        assert_eq!(comparison.source, ResultSource::Template);
        assert_eq!(explanation.source, ResultSource::Template);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_template_compare_is_deterministic() {
        let orchestrator = FallbackOrchestrator::new();
        let first = orchestrator.compare(&kris(), &kastane());
        let second = orchestrator.compare(&kris(), &kastane());

        assert_eq!(first.source, ResultSource::Template);
        assert!(!first.comparison.is_empty());
        assert_eq!(first.comparison, second.comparison);
        assert_eq!(first.similarities, second.similarities);
        assert_eq!(first.differences, second.differences);
    }

    #[test]
    fn test_explain_waits_for_warmup() {
        let text = "A long and detailed explanation produced by the warmed local model.";
        let warmup = warm_model(Duration::from_secs(2), text);
        let orchestrator = FallbackOrchestrator::new()
            .with_warmup(warmup)
            .with_remote(MockRemote::default());

        thread::sleep(Duration::from_millis(500));
        let result = orchestrator.explain(&kris());

        assert_eq!(result.source, ResultSource::TrainedModel);
        assert_eq!(result.text, text);
    }

    #[test]
    fn test_explain_gives_up_after_bounded_wait() {
        let warmup = warm_model(Duration::from_secs(5), &"x".repeat(100));
        let orchestrator = FallbackOrchestrator::new().with_warmup(warmup).with_policy(FallbackPolicy {
            warmup_wait: Duration::from_millis(200),
            min_explanation_chars: 50,
        });

        let started = Instant::now();
        let result = orchestrator.explain(&kris());

        assert_eq!(result.source, ResultSource::Template);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_degenerate_local_output_falls_to_remote() {
        let orchestrator = FallbackOrchestrator::new()
            .with_warmup(warm_model(Duration::ZERO, "too short"))
            .with_remote(MockRemote::default());

        let result = orchestrator.explain(&kris());

        assert_eq!(result.source, ResultSource::OpenAi);
        assert_eq!(result.text, "Kris\nThe kris is a remote explanation.");
    }

    #[test]
    fn test_visual_without_remote_is_structured_error() {
        let result = FallbackOrchestrator::new().compare_visual(&kris(), &kastane(), "a.jpg", "b.jpg");

        assert!(!result.is_success());
        assert_eq!(result.source(), ResultSource::Error);
    }

    #[test]
    fn test_visual_comparison_paths() {
        let root = std::env::temp_dir().join(format!("visual-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(root.join("images")).unwrap();
        std::fs::write(root.join("images").join("kris.jpg"), b"jpg").unwrap();
        std::fs::write(root.join("kastane.png"), b"png").unwrap();

        let ok = FallbackOrchestrator::new()
            .with_image_roots(vec![root.clone()])
            .with_remote(MockRemote::default())
            .compare_visual(&kris(), &kastane(), "/static/kris.jpg", "kastane.png");
        assert!(ok.is_success());
        assert_eq!(ok.source(), ResultSource::OpenAiVision);

        let unparsed = FallbackOrchestrator::new()
            .with_image_roots(vec![root.clone()])
            .with_remote(MockRemote { vision_raw: Some("I see two blades".into()), ..Default::default() })
            .compare_visual(&kris(), &kastane(), "kris.jpg", "kastane.png");
        assert_eq!(
            serde_json::to_value(&unparsed).unwrap()["raw_response"],
            "I see two blades"
        );

        let missing = FallbackOrchestrator::new()
            .with_image_roots(vec![root.clone()])
            .with_remote(MockRemote::default())
            .compare_visual(&kris(), &kastane(), "kris.jpg", "nope.png");
        assert_eq!(missing.source(), ResultSource::Error);

        std::fs::remove_dir_all(root).ok();
    }

    #[test]
    fn test_status_and_similar_via_service() {
        let (service, _peer) = scripted_service(&[READY], compare_responder, fast_timeouts());
        let orchestrator = FallbackOrchestrator::new().with_service(service);

        assert_eq!(
            orchestrator.model_status(),
            ModelStatus::Trained { artifact_count: 2, model_name: "tfidf-lexical-v1".into() }
        );
        let similar = orchestrator.similar(&kris(), 3);
        assert_eq!(similar.len(), 1);
        assert_eq!(similar[0].artifact_id, "kastane");

        orchestrator.shutdown();
        assert_eq!(orchestrator.model_status(), ModelStatus::Untrained);
        assert!(orchestrator.similar(&kris(), 3).is_empty());
    }
}
