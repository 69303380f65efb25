//! Deterministic template tier.
//!
//! Always available and total: missing fields render as "Unknown" and a
//! template failure degrades to a plain-text rendering instead of an error.

use explainer_types::{Artifact, ArtifactField};
use log::error;
use minijinja::{context, Environment};
use serde::Serialize;

/// Materials checked when listing what two artifacts have in common.
pub const MATERIAL_KEYWORDS: [&str; 8] =
    ["gold", "silver", "bronze", "brass", "wood", "stone", "iron", "steel"];

const NO_SIMILARITIES: &str = "These artifacts represent distinct cultural traditions";
const NO_DIFFERENCES: &str = "These artifacts share remarkable similarities";

const EXPLANATION_TEMPLATE: &str = "\
{{ a.name }}

Overview
This {{ a.category|lower }} originates from {{ a.origin }} and dates to {{ a.era }}.

Materials and Craftsmanship
{{ a.materials }}

Function and Use
{{ a.function }}

Cultural Significance
{{ a.symbolism }}

Special Features
{{ a.notes }}

This artifact represents an important piece of cultural heritage, showcasing the craftsmanship, beliefs, and practices of its time and place.
";

const COMPARISON_TEMPLATE: &str = "\
Comparison: {{ a.name }} vs {{ b.name }}

Design Comparison
Both artifacts share similar functions as {{ a.category|lower }}s, though they originate from different cultural contexts: {{ a.origin }} and {{ b.origin }}.

Materials
{{ a.name }}: {{ a.materials }}
{{ b.name }}: {{ b.materials }}

Functional Purposes
{{ a.name }}: {{ a.function|clip(200) }}...
{{ b.name }}: {{ b.function|clip(200) }}...

Cultural Significance
{{ a.name }}: {{ a.symbolism|clip(200) }}...
{{ b.name }}: {{ b.symbolism|clip(200) }}...

Historical Context
These artifacts represent different cultural approaches to similar needs, showcasing both unique regional characteristics and universal human practices.
";

/// Template-facing view of an artifact with every field filled.
#[derive(Serialize)]
struct ArtifactView<'a> {
    name: &'a str,
    category: &'a str,
    origin: &'a str,
    era: &'a str,
    materials: &'a str,
    function: &'a str,
    symbolism: &'a str,
    notes: &'a str,
}

impl<'a> From<&'a Artifact> for ArtifactView<'a> {
    fn from(artifact: &'a Artifact) -> Self {
        Self {
            name: artifact.field_or_unknown(ArtifactField::Name),
            category: artifact.field_or_unknown(ArtifactField::Category),
            origin: artifact.field_or_unknown(ArtifactField::Origin),
            era: artifact.field_or_unknown(ArtifactField::Era),
            materials: artifact.field_or_unknown(ArtifactField::Materials),
            function: artifact.field_or_unknown(ArtifactField::Function),
            symbolism: artifact.field_or_unknown(ArtifactField::Symbolism),
            notes: artifact.field_or_unknown(ArtifactField::Notes),
        }
    }
}

fn clip(value: String, max_chars: usize) -> String {
    value.chars().take(max_chars).collect()
}

pub struct TemplateEngine {
    env: Environment<'static>,
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateEngine {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.add_filter("clip", clip);
        for (name, source) in [
            ("explanation.txt", EXPLANATION_TEMPLATE),
            ("comparison.txt", COMPARISON_TEMPLATE),
        ] {
            if let Err(e) = env.add_template(name, source) {
                error!("[TEMPLATE] Failed to parse {name}: {e}");
            }
        }
        Self { env }
    }

    pub fn explain(&self, artifact: &Artifact) -> String {
        let view = ArtifactView::from(artifact);
        self.render("explanation.txt", context! { a => &view })
            .unwrap_or_else(|| plain_explanation(&view))
    }

    pub fn compare(&self, first: &Artifact, second: &Artifact) -> String {
        let a = ArtifactView::from(first);
        let b = ArtifactView::from(second);
        self.render("comparison.txt", context! { a => &a, b => &b })
            .unwrap_or_else(|| plain_comparison(&a, &b))
    }

    fn render(&self, name: &str, ctx: minijinja::Value) -> Option<String> {
        let rendered = self
            .env
            .get_template(name)
            .and_then(|template| template.render(ctx));
        match rendered {
            Ok(text) => Some(text.trim().to_string()),
            Err(e) => {
                error!("[TEMPLATE] Failed to render {name}: {e}");
                None
            }
        }
    }
}

fn plain_explanation(a: &ArtifactView<'_>) -> String {
    format!(
        "{}\n\nThis {} originates from {} and dates to {}.\n\n{}\n\n{}",
        a.name,
        a.category.to_lowercase(),
        a.origin,
        a.era,
        a.function,
        a.symbolism
    )
}

fn plain_comparison(a: &ArtifactView<'_>, b: &ArtifactView<'_>) -> String {
    format!(
        "Comparison: {} vs {}\n\n{} comes from {}; {} comes from {}.",
        a.name, b.name, a.name, a.origin, b.name, b.origin
    )
}

/// Field-equality and shared-material observations. Equality needs the
/// field present on both sides.
pub fn extract_similarities(first: &Artifact, second: &Artifact) -> Vec<String> {
    let mut similarities = Vec::new();

    if let Some(category) = both_equal(first, second, ArtifactField::Category) {
        similarities.push(format!("Both are {category}s"));
    }
    if let Some(origin) = both_equal(first, second, ArtifactField::Origin) {
        similarities.push(format!("Both originate from {origin}"));
    }
    if first.field(ArtifactField::Era).is_some() && second.field(ArtifactField::Era).is_some() {
        similarities.push("Similar historical periods".to_string());
    }

    let materials1 = first.field(ArtifactField::Materials).unwrap_or("").to_lowercase();
    let materials2 = second.field(ArtifactField::Materials).unwrap_or("").to_lowercase();
    let common: Vec<&str> = MATERIAL_KEYWORDS
        .iter()
        .copied()
        .filter(|m| materials1.contains(m) && materials2.contains(m))
        .collect();
    if !common.is_empty() {
        similarities.push(format!("Share common materials: {}", common.join(", ")));
    }

    if similarities.is_empty() {
        similarities.push(NO_SIMILARITIES.to_string());
    }
    similarities
}

/// Fields whose values differ, a missing value counting as different from a
/// present one.
pub fn extract_differences(first: &Artifact, second: &Artifact) -> Vec<String> {
    let mut differences = Vec::new();
    let differs = |field| first.field(field) != second.field(field);

    if differs(ArtifactField::Origin) {
        differences.push(format!(
            "Different origins: {} vs {}",
            first.field_or_unknown(ArtifactField::Origin),
            second.field_or_unknown(ArtifactField::Origin)
        ));
    }
    if differs(ArtifactField::Category) {
        differences.push(format!(
            "Different types: {} vs {}",
            first.field_or_unknown(ArtifactField::Category),
            second.field_or_unknown(ArtifactField::Category)
        ));
    }
    if differs(ArtifactField::Materials) {
        differences.push("Different primary materials used".to_string());
    }
    if differs(ArtifactField::Era) {
        differences.push(format!(
            "Different time periods: {} vs {}",
            first.field_or_unknown(ArtifactField::Era),
            second.field_or_unknown(ArtifactField::Era)
        ));
    }

    if differences.is_empty() {
        differences.push(NO_DIFFERENCES.to_string());
    }
    differences
}

fn both_equal<'a>(first: &'a Artifact, second: &Artifact, field: ArtifactField) -> Option<&'a str> {
    match (first.field(field), second.field(field)) {
        (Some(a), Some(b)) if a == b => Some(a),
        _ => None,
    }
}
