//! Lexical similarity model over artifact descriptions.
//!
//! Each artifact becomes an L2-normalized TF-IDF vector over the words of its
//! descriptive fields. Artifacts are grouped by single-pass leader
//! clustering: an artifact joins the first cluster whose leader it resembles
//! closely enough, or starts a new one.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};

use explainer_types::{Artifact, ArtifactField, SimilarArtifact};
use lazy_static::lazy_static;
use regex::Regex;

pub const MODEL_NAME: &str = "tfidf-lexical-v1";

/// Minimum cosine similarity to a cluster leader for membership.
pub const CLUSTER_THRESHOLD: f64 = 0.3;

lazy_static! {
    static ref WORD: Regex = Regex::new(r"\p{L}[\p{L}\p{N}]*").unwrap();
    static ref STOPWORDS: HashSet<&'static str> = [
        "the", "and", "for", "with", "from", "that", "this", "was", "were", "are", "its",
        "his", "her", "their", "which", "into", "used", "use", "has", "have", "had", "but",
        "not", "also", "been", "during", "such", "other", "often", "made", "these", "those",
        "unknown",
    ]
    .into_iter()
    .collect();
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    WORD.find_iter(text)
        .map(|m| m.as_str().to_lowercase())
        .filter(|w| w.chars().count() >= 3 && !STOPWORDS.contains(w.as_str()))
}

fn document_text(artifact: &Artifact) -> String {
    ArtifactField::ALL
        .iter()
        .filter_map(|f| artifact.field(*f))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Sorted-index sparse vector, unit length unless empty.
#[derive(Clone, Debug, Default)]
struct TermVector {
    indices: Vec<u32>,
    values: Vec<f64>,
}

impl TermVector {
    fn from_weights(weights: BTreeMap<u32, f64>) -> Self {
        let norm = weights.values().map(|v| v * v).sum::<f64>().sqrt();
        if norm == 0.0 {
            return Self::default();
        }
        let (indices, values) = weights.into_iter().map(|(i, w)| (i, w / norm)).unzip();
        Self { indices, values }
    }

    /// Cosine similarity; both sides are already normalized.
    fn dot(&self, other: &Self) -> f64 {
        let mut result = 0.0;
        let (mut i, mut j) = (0, 0);
        while i < self.indices.len() && j < other.indices.len() {
            match self.indices[i].cmp(&other.indices[j]) {
                Ordering::Less => i += 1,
                Ordering::Greater => j += 1,
                Ordering::Equal => {
                    result += self.values[i] * other.values[j];
                    i += 1;
                    j += 1;
                }
            }
        }
        result.clamp(0.0, 1.0)
    }

    /// Term indices present in both vectors, heaviest shared weight first.
    fn overlap(&self, other: &Self) -> Vec<(u32, f64)> {
        let mut shared = Vec::new();
        let (mut i, mut j) = (0, 0);
        while i < self.indices.len() && j < other.indices.len() {
            match self.indices[i].cmp(&other.indices[j]) {
                Ordering::Less => i += 1,
                Ordering::Greater => j += 1,
                Ordering::Equal => {
                    shared.push((self.indices[i], self.values[i] * other.values[j]));
                    i += 1;
                    j += 1;
                }
            }
        }
        shared.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
        shared
    }
}

/// Relationship label for a similarity score.
pub fn relationship_type(score: f64) -> &'static str {
    if score >= 0.6 {
        "closely_related"
    } else if score >= 0.35 {
        "related"
    } else if score >= 0.15 {
        "loosely_related"
    } else {
        "distinct"
    }
}

pub struct SimilarityIndex {
    artifacts: Vec<Artifact>,
    by_id: HashMap<String, usize>,
    vocabulary: HashMap<String, u32>,
    terms: Vec<String>,
    idf: Vec<f64>,
    vectors: Vec<TermVector>,
    clusters: Vec<usize>,
    cluster_count: usize,
}

impl SimilarityIndex {
    pub fn build(artifacts: Vec<Artifact>) -> Self {
        let documents: Vec<Vec<String>> = artifacts
            .iter()
            .map(|a| tokenize(&document_text(a)).collect())
            .collect();

        let mut vocabulary: HashMap<String, u32> = HashMap::new();
        let mut terms: Vec<String> = Vec::new();
        let mut document_frequency: Vec<usize> = Vec::new();
        for document in &documents {
            let unique: HashSet<&String> = document.iter().collect();
            for term in unique {
                let index = *vocabulary.entry(term.clone()).or_insert_with(|| {
                    terms.push(term.clone());
                    document_frequency.push(0);
                    (terms.len() - 1) as u32
                });
                document_frequency[index as usize] += 1;
            }
        }

        // Smoothed idf: ln((1 + n) / (1 + df)) + 1
        let n = documents.len() as f64;
        let idf: Vec<f64> = document_frequency
            .iter()
            .map(|&df| ((1.0 + n) / (1.0 + df as f64)).ln() + 1.0)
            .collect();

        let vectors: Vec<TermVector> = documents
            .iter()
            .map(|document| {
                let mut weights: BTreeMap<u32, f64> = BTreeMap::new();
                for term in document {
                    if let Some(&index) = vocabulary.get(term) {
                        *weights.entry(index).or_insert(0.0) += idf[index as usize];
                    }
                }
                TermVector::from_weights(weights)
            })
            .collect();

        let (clusters, cluster_count) = leader_clusters(&vectors);
        let by_id = artifacts
            .iter()
            .enumerate()
            .map(|(i, a)| (a.id.clone(), i))
            .collect();

        Self {
            artifacts,
            by_id,
            vocabulary,
            terms,
            idf,
            vectors,
            clusters,
            cluster_count,
        }
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    pub fn cluster_count(&self) -> usize {
        self.cluster_count
    }

    pub fn get(&self, id: &str) -> Option<&Artifact> {
        self.by_id.get(id).map(|&i| &self.artifacts[i])
    }

    /// Cosine similarity of two indexed artifacts, `None` if either is unknown.
    pub fn similarity(&self, a: &str, b: &str) -> Option<f64> {
        let (i, j) = (*self.by_id.get(a)?, *self.by_id.get(b)?);
        Some(self.vectors[i].dot(&self.vectors[j]))
    }

    pub fn same_cluster(&self, a: &str, b: &str) -> Option<bool> {
        let (i, j) = (*self.by_id.get(a)?, *self.by_id.get(b)?);
        Some(self.clusters[i] == self.clusters[j])
    }

    /// Up to `top_k` indexed neighbours of `id`, most similar first.
    pub fn most_similar(&self, id: &str, top_k: usize) -> Option<Vec<SimilarArtifact>> {
        let origin = *self.by_id.get(id)?;
        let ranked = self.rank(&self.vectors[origin], |i| i != origin, top_k);
        Some(
            ranked
                .into_iter()
                .map(|(i, score)| SimilarArtifact {
                    artifact_id: self.artifacts[i].id.clone(),
                    name: self.artifacts[i].name.clone(),
                    similarity: score,
                })
                .collect(),
        )
    }

    /// Nearest indexed artifacts to an arbitrary record, which need not be in
    /// the index. Entries sharing its id are skipped; zero scores are dropped.
    pub fn nearest_to(&self, artifact: &Artifact, top_k: usize) -> Vec<(&Artifact, f64)> {
        let query = self.vectorize(artifact);
        self.rank(&query, |i| self.artifacts[i].id != artifact.id, top_k)
            .into_iter()
            .filter(|(_, score)| *score > 0.0)
            .map(|(i, score)| (&self.artifacts[i], score))
            .collect()
    }

    /// Terms both artifacts' descriptions lean on, strongest first.
    pub fn shared_terms(&self, a: &str, b: &str, limit: usize) -> Vec<String> {
        let (Some(&i), Some(&j)) = (self.by_id.get(a), self.by_id.get(b)) else {
            return Vec::new();
        };
        self.vectors[i]
            .overlap(&self.vectors[j])
            .into_iter()
            .take(limit)
            .map(|(index, _)| self.terms[index as usize].clone())
            .collect()
    }

    fn vectorize(&self, artifact: &Artifact) -> TermVector {
        let mut weights: BTreeMap<u32, f64> = BTreeMap::new();
        for term in tokenize(&document_text(artifact)) {
            if let Some(&index) = self.vocabulary.get(&term) {
                *weights.entry(index).or_insert(0.0) += self.idf[index as usize];
            }
        }
        TermVector::from_weights(weights)
    }

    fn rank(
        &self,
        query: &TermVector,
        keep: impl Fn(usize) -> bool,
        top_k: usize,
    ) -> Vec<(usize, f64)> {
        let mut scored: Vec<(usize, f64)> = (0..self.vectors.len())
            .filter(|&i| keep(i))
            .map(|i| (i, query.dot(&self.vectors[i])))
            .collect();
        // Stable sort keeps catalog order among ties.
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
        scored.truncate(top_k);
        scored
    }
}

fn leader_clusters(vectors: &[TermVector]) -> (Vec<usize>, usize) {
    let mut leaders: Vec<usize> = Vec::new();
    let mut assignment = Vec::with_capacity(vectors.len());
    for (i, vector) in vectors.iter().enumerate() {
        let cluster = leaders
            .iter()
            .position(|&leader| vector.dot(&vectors[leader]) >= CLUSTER_THRESHOLD);
        match cluster {
            Some(c) => assignment.push(c),
            None => {
                leaders.push(i);
                assignment.push(leaders.len() - 1);
            }
        }
    }
    (assignment, leaders.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact(id: &str, name: &str, materials: &str, function: &str) -> Artifact {
        Artifact {
            id: id.into(),
            name: Some(name.into()),
            materials: Some(materials.into()),
            function: Some(function.into()),
            ..Default::default()
        }
    }

    fn sample_index() -> SimilarityIndex {
        SimilarityIndex::build(vec![
            artifact("k1", "Bronze ceremonial dagger", "bronze blade, gold hilt", "ritual dagger for ceremonies"),
            artifact("k2", "Gold ceremonial dagger", "gold blade, bronze hilt", "ritual dagger worn at ceremonies"),
            artifact("m1", "Wooden mask", "carved wood, pigment", "dance performance mask"),
        ])
    }

    #[test]
    fn test_related_artifacts_score_higher() {
        let index = sample_index();
        let close = index.similarity("k1", "k2").unwrap();
        let far = index.similarity("k1", "m1").unwrap();

        assert!(close > far, "{close} <= {far}");
        assert!((index.similarity("k1", "k1").unwrap() - 1.0).abs() < 1e-9);
        assert!(index.similarity("k1", "nope").is_none());
    }

    #[test]
    fn test_clusters_group_daggers() {
        let index = sample_index();
        assert_eq!(index.same_cluster("k1", "k2"), Some(true));
        assert_eq!(index.same_cluster("k1", "m1"), Some(false));
        assert_eq!(index.cluster_count(), 2);
    }

    #[test]
    fn test_most_similar_excludes_self() {
        let index = sample_index();
        let similar = index.most_similar("k1", 5).unwrap();

        assert_eq!(similar.len(), 2);
        assert_eq!(similar[0].artifact_id, "k2");
        assert!(similar.iter().all(|s| s.artifact_id != "k1"));
    }

    #[test]
    fn test_nearest_to_unindexed_record() {
        let index = sample_index();
        let query = artifact("new", "Mask", "painted wood", "festival dance");
        let nearest = index.nearest_to(&query, 3);

        assert_eq!(nearest.len(), 1);
        assert_eq!(nearest[0].0.id, "m1");
    }

    #[test]
    fn test_shared_terms_and_labels() {
        let index = sample_index();
        let shared = index.shared_terms("k1", "k2", 10);

        assert!(shared.contains(&"dagger".to_string()));
        assert!(!shared.contains(&"wood".to_string()));
        assert_eq!(relationship_type(0.7), "closely_related");
        assert_eq!(relationship_type(0.4), "related");
        assert_eq!(relationship_type(0.2), "loosely_related");
        assert_eq!(relationship_type(0.01), "distinct");
    }
}
