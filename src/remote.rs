//! Remote inference tier: an OpenAI-compatible chat completions API.
//!
//! Every call is a single attempt. Failures are returned as [`TierError`] and
//! the orchestrator decides what happens next.

use explainer_config::RemoteConfig;
use explainer_types::{Artifact, ArtifactField};
use lazy_static::lazy_static;
use log::{debug, info};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::TierError;
use crate::images::EncodedImage;

pub const EXPLAIN_SYSTEM_PROMPT: &str = "You are a museum curator providing detailed explanations of cultural artifacts. Do not use markdown formatting like # or ** in your response. Use plain text only.";
pub const COMPARE_SYSTEM_PROMPT: &str = "You are a museum curator providing detailed cross-cultural comparisons of artifacts. Do not use markdown formatting like # or ** in your response. Use plain text only.";

pub const EXPLAIN_MAX_TOKENS: u32 = 500;
pub const COMPARE_MAX_TOKENS: u32 = 800;
pub const VISUAL_MAX_TOKENS: u32 = 1500;

/// Remote text, JSON and vision generation.
pub trait RemoteInference: Send + Sync {
    fn generate_text(&self, system: &str, prompt: &str, max_tokens: u32) -> Result<String, TierError>;

    /// Generate a JSON value. Replies that do not decode yield
    /// [`TierError::MalformedJson`].
    fn generate_structured(&self, system: &str, prompt: &str, max_tokens: u32) -> Result<Value, TierError>;

    fn analyze_images(
        &self,
        prompt: &str,
        images: &[EncodedImage],
        max_tokens: u32,
    ) -> Result<Value, TierError>;
}

// ─── Wire types ───────────────────────────────────────────────────────

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Value>,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<Value>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

// ─── Client ───────────────────────────────────────────────────────────

pub struct OpenAiClient {
    agent: ureq::Agent,
    api_key: String,
    base_url: String,
    text_model: String,
    structured_model: String,
    vision_model: String,
    temperature: f32,
}

impl OpenAiClient {
    /// `None` when no credential is configured.
    pub fn from_config(config: &RemoteConfig) -> Option<Self> {
        let api_key = config.api_key.as_deref().map(str::trim).filter(|k| !k.is_empty())?;
        let agent = ureq::AgentBuilder::new().timeout(config.timeout()).build();
        info!("[REMOTE] Remote tier enabled ({})", config.base_url);
        Some(Self {
            agent,
            api_key: api_key.to_string(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            text_model: config.text_model.clone(),
            structured_model: config.structured_model.clone(),
            vision_model: config.vision_model.clone(),
            temperature: config.temperature,
        })
    }

    fn complete(&self, request: &ChatRequest<'_>) -> Result<String, TierError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = serde_json::to_string(request)
            .map_err(|e| TierError::Remote(format!("failed to encode request: {e}")))?;
        debug!("[REMOTE] POST {url} model={}", request.model);

        let resp = self
            .agent
            .post(&url)
            .set("Authorization", &format!("Bearer {}", self.api_key))
            .set("Content-Type", "application/json")
            .send_string(&body)
            .map_err(|e| match e {
                ureq::Error::Status(code, resp) => {
                    let detail = resp.into_string().unwrap_or_default();
                    TierError::Remote(format!("HTTP {code}: {}", truncate(&detail, 300)))
                }
                other => TierError::Remote(format!("request failed: {other}")),
            })?;

        let text = resp
            .into_string()
            .map_err(|e| TierError::Remote(format!("failed to read response: {e}")))?;
        let parsed: ChatResponse = serde_json::from_str(&text)
            .map_err(|e| TierError::Remote(format!("failed to parse response: {e}")))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| TierError::Remote("response has no content".to_string()))
    }
}

impl RemoteInference for OpenAiClient {
    fn generate_text(&self, system: &str, prompt: &str, max_tokens: u32) -> Result<String, TierError> {
        self.complete(&ChatRequest {
            model: &self.text_model,
            messages: vec![
                json!({"role": "system", "content": system}),
                json!({"role": "user", "content": prompt}),
            ],
            max_tokens,
            temperature: self.temperature,
            response_format: None,
        })
    }

    fn generate_structured(&self, system: &str, prompt: &str, max_tokens: u32) -> Result<Value, TierError> {
        let reply = self.complete(&ChatRequest {
            model: &self.structured_model,
            messages: vec![
                json!({"role": "system", "content": system}),
                json!({"role": "user", "content": prompt}),
            ],
            max_tokens,
            temperature: self.temperature,
            response_format: Some(json!({"type": "json_object"})),
        })?;
        extract_json_object(&reply).ok_or(TierError::MalformedJson { raw: reply })
    }

    fn analyze_images(
        &self,
        prompt: &str,
        images: &[EncodedImage],
        max_tokens: u32,
    ) -> Result<Value, TierError> {
        let mut content = vec![json!({"type": "text", "text": prompt})];
        content.extend(images.iter().map(|image| {
            json!({
                "type": "image_url",
                "image_url": {"url": image.data_uri(), "detail": "high"}
            })
        }));

        let reply = self.complete(&ChatRequest {
            model: &self.vision_model,
            messages: vec![json!({"role": "user", "content": content})],
            max_tokens,
            temperature: self.temperature,
            response_format: None,
        })?;
        extract_json_object(&reply).ok_or(TierError::MalformedJson { raw: reply })
    }
}

// ─── Text helpers ─────────────────────────────────────────────────────

lazy_static! {
    static ref MD_HEADER: Regex = Regex::new(r"(?m)^#+\s+").unwrap();
    static ref MD_BOLD: Regex = Regex::new(r"\*\*(.+?)\*\*").unwrap();
    static ref MD_ITALIC: Regex = Regex::new(r"\*(.+?)\*").unwrap();
    static ref MD_LINK: Regex = Regex::new(r"\[(.+?)\]\(.+?\)").unwrap();
}

/// Strip headers, bold, italics and links, keeping the inner text.
pub fn remove_markdown(text: &str) -> String {
    let text = MD_HEADER.replace_all(text, "");
    let text = MD_BOLD.replace_all(&text, "$1");
    let text = MD_ITALIC.replace_all(&text, "$1");
    MD_LINK.replace_all(&text, "$1").into_owned()
}

/// Decode the span from the first `{` to the last `}`, or the whole reply
/// when it has no braces.
pub fn extract_json_object(text: &str) -> Option<Value> {
    let candidate = match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if end > start => &text[start..=end],
        _ => text.trim(),
    };
    serde_json::from_str(candidate).ok()
}

fn truncate(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

// ─── Prompts ──────────────────────────────────────────────────────────

fn field(artifact: &Artifact, f: ArtifactField) -> &str {
    artifact.field_or_unknown(f)
}

pub fn explanation_prompt(artifact: &Artifact) -> String {
    format!(
        "Provide a detailed, engaging explanation of this artifact in English:\n\n\
         Name: {}\nCategory: {}\nOrigin: {}\nEra: {}\nMaterials: {}\nFunction: {}\nSymbolism: {}\nSpecial Features: {}\n\n\
         Write a comprehensive explanation covering:\n\
         1. Historical context and significance\n\
         2. Materials and craftsmanship\n\
         3. Function and use\n\
         4. Cultural and symbolic meaning\n\
         5. Notable features\n\n\
         Make it engaging and educational for museum visitors.",
        field(artifact, ArtifactField::Name),
        field(artifact, ArtifactField::Category),
        field(artifact, ArtifactField::Origin),
        field(artifact, ArtifactField::Era),
        field(artifact, ArtifactField::Materials),
        field(artifact, ArtifactField::Function),
        field(artifact, ArtifactField::Symbolism),
        field(artifact, ArtifactField::Notes),
    )
}

fn artifact_block(label: &str, artifact: &Artifact) -> String {
    format!(
        "{label}: {}\n- Origin: {}\n- Era: {}\n- Category: {}\n- Materials: {}\n- Function: {}\n- Symbolism: {}",
        field(artifact, ArtifactField::Name),
        field(artifact, ArtifactField::Origin),
        field(artifact, ArtifactField::Era),
        field(artifact, ArtifactField::Category),
        field(artifact, ArtifactField::Materials),
        field(artifact, ArtifactField::Function),
        field(artifact, ArtifactField::Symbolism),
    )
}

/// Comparison prompt asking for a JSON object with `comparison`,
/// `similarities` and `differences`.
pub fn comparison_prompt(first: &Artifact, second: &Artifact) -> String {
    format!(
        "Compare these two artifacts in English, highlighting similarities and differences:\n\n\
         {}\n\n{}\n\n\
         Provide a detailed comparison covering:\n\
         1. Design similarities and differences\n\
         2. Material and craftsmanship comparison\n\
         3. Functional purposes\n\
         4. Ceremonial/ritual use\n\
         5. Historical context\n\
         6. Cultural symbolism\n\
         7. Cross-cultural connections\n\n\
         Make it insightful and educational.\n\n\
         Respond with a JSON object with the keys \"comparison\" (plain text), \
         \"similarities\" (array of short strings) and \"differences\" (array of short strings).",
        artifact_block("Artifact 1", first),
        artifact_block("Artifact 2", second),
    )
}

pub fn visual_prompt(first: &Artifact, second: &Artifact) -> String {
    let dimension = |key: &str, a: &str, b: &str| {
        format!("  \"{key}\": {{\n    \"artifact_a\": \"{a}\",\n    \"artifact_b\": \"{b}\"\n  }}")
    };
    let structure = [
        dimension(
            "shape_form",
            "Description of Artifact A's shape, silhouette, and proportions",
            "Description of Artifact B's shape, silhouette, and proportions",
        ),
        dimension(
            "color_texture",
            "Description of Artifact A's color palette, finish, and aging",
            "Description of Artifact B's color palette, finish, and aging",
        ),
        dimension(
            "design_motifs",
            "Description of Artifact A's patterns, decorations, and iconography",
            "Description of Artifact B's patterns, decorations, and iconography",
        ),
        dimension(
            "craftsmanship",
            "Description of Artifact A's technique and manufacturing quality",
            "Description of Artifact B's technique and manufacturing quality",
        ),
        dimension(
            "overall_impression",
            "Overall visual impression and aesthetic of Artifact A",
            "Overall visual impression and aesthetic of Artifact B",
        ),
    ]
    .join(",\n");

    format!(
        "You are an expert art historian analyzing cultural artifacts. Compare these two artifacts visually across specific dimensions.\n\n\
         Artifact A: {} ({}, {})\nArtifact B: {} ({}, {})\n\n\
         Analyze and compare these artifacts across the following dimensions. For each dimension, provide separate descriptions for Artifact A and Artifact B.\n\n\
         Return your analysis as a JSON object with this exact structure:\n{{\n{structure}\n}}\n\n\
         Provide detailed, specific observations based on what you see in the images.",
        field(first, ArtifactField::Name),
        field(first, ArtifactField::Origin),
        field(first, ArtifactField::Era),
        field(second, ArtifactField::Name),
        field(second, ArtifactField::Origin),
        field(second, ArtifactField::Era),
    )
}
