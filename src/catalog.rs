//! Artifact catalog backed by a JSON file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use explainer_types::Artifact;
use serde::Deserialize;

/// Read-only artifact lookup.
pub trait ArtifactStore: Send + Sync {
    fn get(&self, id: &str) -> Option<Artifact>;
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("failed to read catalog {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse catalog {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("duplicate artifact id: {0}")]
    DuplicateId(String),
}

/// Accepts both a bare array and `{"artifacts": [...]}`.
#[derive(Deserialize)]
#[serde(untagged)]
enum CatalogFile {
    List(Vec<Artifact>),
    Wrapped { artifacts: Vec<Artifact> },
}

/// In-memory catalog preserving file order.
#[derive(Clone, Debug, Default)]
pub struct JsonArtifactCatalog {
    artifacts: Vec<Artifact>,
    by_id: HashMap<String, usize>,
}

impl JsonArtifactCatalog {
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let raw = std::fs::read_to_string(path).map_err(|source| CatalogError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let file: CatalogFile = serde_json::from_str(&raw).map_err(|source| CatalogError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        let artifacts = match file {
            CatalogFile::List(list) | CatalogFile::Wrapped { artifacts: list } => list,
        };
        Self::from_artifacts(artifacts)
    }

    pub fn from_artifacts(artifacts: Vec<Artifact>) -> Result<Self, CatalogError> {
        let mut by_id = HashMap::with_capacity(artifacts.len());
        for (index, artifact) in artifacts.iter().enumerate() {
            if by_id.insert(artifact.id.clone(), index).is_some() {
                return Err(CatalogError::DuplicateId(artifact.id.clone()));
            }
        }
        Ok(Self { artifacts, by_id })
    }

    pub fn artifacts(&self) -> &[Artifact] {
        &self.artifacts
    }

    pub fn into_artifacts(self) -> Vec<Artifact> {
        self.artifacts
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }
}

impl ArtifactStore for JsonArtifactCatalog {
    fn get(&self, id: &str) -> Option<Artifact> {
        self.by_id.get(id).map(|&i| self.artifacts[i].clone())
    }
}
