//! In-process explanation model for the first explanation tier.

use std::path::Path;

use explainer_types::{Artifact, ArtifactField};

use crate::catalog::JsonArtifactCatalog;
use crate::error::TierError;
use crate::similarity::SimilarityIndex;

/// A model loaded into this process that turns an artifact into prose.
pub trait LocalExplainer: Send + Sync {
    fn explain(&self, artifact: &Artifact) -> Result<String, TierError>;
}

/// Describes an artifact from its own fields and relates it to the closest
/// catalog entries.
pub struct NeighborhoodExplainer {
    index: SimilarityIndex,
    neighbours: usize,
}

impl NeighborhoodExplainer {
    pub fn new(index: SimilarityIndex) -> Self {
        Self { index, neighbours: 2 }
    }

    pub fn load(catalog: &Path) -> Result<Self, TierError> {
        let catalog = JsonArtifactCatalog::load(catalog).map_err(|e| TierError::LocalModel(e.to_string()))?;
        Ok(Self::new(SimilarityIndex::build(catalog.into_artifacts())))
    }
}

impl LocalExplainer for NeighborhoodExplainer {
    fn explain(&self, artifact: &Artifact) -> Result<String, TierError> {
        let mut paragraphs = Vec::new();

        let name = artifact.display_name();
        let mut opening = match artifact.field(ArtifactField::Category) {
            Some(category) => format!("{name} is a {}", category.to_lowercase()),
            None => name.to_string(),
        };
        match (artifact.field(ArtifactField::Origin), artifact.field(ArtifactField::Era)) {
            (Some(origin), Some(era)) => opening.push_str(&format!(" from {origin}, dating to {era}.")),
            (Some(origin), None) => opening.push_str(&format!(" from {origin}.")),
            (None, Some(era)) => opening.push_str(&format!(" dating to {era}.")),
            (None, None) => opening.push('.'),
        }
        paragraphs.push(opening);

        if let Some(materials) = artifact.field(ArtifactField::Materials) {
            paragraphs.push(format!("It is made of {}.", materials.trim_end_matches('.')));
        }
        if let Some(function) = artifact.field(ArtifactField::Function) {
            paragraphs.push(format!("In use: {}", sentence(function)));
        }
        if let Some(symbolism) = artifact.field(ArtifactField::Symbolism) {
            paragraphs.push(format!("Symbolically, {}", sentence(&lowercase_first(symbolism))));
        }
        if let Some(notes) = artifact.field(ArtifactField::Notes) {
            paragraphs.push(format!("Notable: {}", sentence(notes)));
        }

        let related: Vec<String> = self
            .index
            .nearest_to(artifact, self.neighbours)
            .into_iter()
            .map(|(neighbour, score)| {
                let origin = neighbour
                    .field(ArtifactField::Origin)
                    .map(|o| format!(" from {o}"))
                    .unwrap_or_default();
                format!("{}{origin} ({:.0}% similar)", neighbour.display_name(), score * 100.0)
            })
            .collect();
        if !related.is_empty() {
            paragraphs.push(format!(
                "Within the collection it is most closely related to {}.",
                related.join(" and ")
            ));
        }

        Ok(paragraphs.join("\n\n"))
    }
}

fn sentence(text: &str) -> String {
    let text = text.trim();
    if text.ends_with(['.', '!', '?']) {
        text.to_string()
    } else {
        format!("{text}.")
    }
}

fn lowercase_first(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}
