//! Model service process entry point.
//!
//! Runs as a child process spawned by the supervisor. Loads the artifact
//! catalog, builds the similarity model, prints the handshake, then answers
//! one JSON request per stdin line with one JSON reply on stdout. All log
//! output goes to stderr.

use std::io::{self, BufRead, Write};
use std::path::Path;
use std::time::Instant;

use log::{error, info, warn};
use serde::Serialize;
use serde_json::Value;

use super::ipc_types::*;
use crate::catalog::JsonArtifactCatalog;
use crate::similarity::{relationship_type, SimilarityIndex, MODEL_NAME};
use crate::template::{extract_differences, extract_similarities};

const SHARED_TERMS: usize = 5;

/// Run the model service on stdin/stdout. Returns the process exit code.
pub fn run_model_service(catalog_path: &Path) -> i32 {
    info!(
        "[MODEL_SERVICE] Starting model service (pid={})",
        std::process::id()
    );
    let stdout = io::stdout();
    let mut stdout = stdout.lock();

    let started = Instant::now();
    let index = match JsonArtifactCatalog::load(catalog_path) {
        Ok(catalog) => SimilarityIndex::build(catalog.into_artifacts()),
        Err(e) => {
            error!("[MODEL_SERVICE] {e}");
            let _ = write_reply(&mut stdout, &ErrorReply::new(e.to_string()));
            return 1;
        }
    };
    info!(
        "[MODEL_SERVICE] Indexed {} artifacts into {} clusters in {:.2}s",
        index.len(),
        index.cluster_count(),
        started.elapsed().as_secs_f64()
    );

    let stdin = io::stdin();
    match serve(&index, stdin.lock(), &mut stdout) {
        Ok(()) => {
            info!("[MODEL_SERVICE] Stdin closed, shutting down");
            0
        }
        Err(e) => {
            warn!("[MODEL_SERVICE] Output closed: {e}");
            0
        }
    }
}

/// Handshake, then the request loop until `input` reaches EOF.
pub fn serve<R, W>(index: &SimilarityIndex, input: R, output: &mut W) -> io::Result<()>
where
    R: BufRead,
    W: Write,
{
    write_reply(output, &ReadyLine::new(index.len()))?;

    for line in input.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let reply = match serde_json::from_str::<ServiceRequest>(&line) {
            Ok(request) => handle_request(index, &request),
            Err(e) => {
                warn!("[MODEL_SERVICE] Failed to parse request: {e}");
                to_value(&ErrorReply::new(format!("Invalid request: {e}")))
            }
        };
        write_reply(output, &reply)?;
    }
    Ok(())
}

pub fn handle_request(index: &SimilarityIndex, request: &ServiceRequest) -> Value {
    match request {
        ServiceRequest::Compare {
            artifact1_id,
            artifact2_id,
        } => match compare(index, artifact1_id, artifact2_id) {
            Some(reply) => to_value(&reply),
            None => to_value(&ErrorReply::new("Artifact not found")),
        },

        ServiceRequest::Similar {
            artifact_id,
            top_k,
        } => match index.most_similar(artifact_id, *top_k) {
            Some(similar) => to_value(&SimilarReply {
                artifact_id: artifact_id.clone(),
                similar,
            }),
            None => to_value(&ErrorReply::new(format!("Artifact not found: {artifact_id}"))),
        },

        ServiceRequest::Status => to_value(&StatusReply {
            model_trained: !index.is_empty(),
            artifacts: index.len(),
            model_name: MODEL_NAME.to_string(),
            clusters: index.cluster_count(),
        }),
    }
}

fn compare(index: &SimilarityIndex, id1: &str, id2: &str) -> Option<CompareReply> {
    let first = index.get(id1)?;
    let second = index.get(id2)?;
    let score = index.similarity(id1, id2)?;
    let same_cluster = index.same_cluster(id1, id2)?;
    let relationship = relationship_type(score);
    let shared = index.shared_terms(id1, id2, SHARED_TERMS);

    let mut comparison = format!(
        "{} and {} have a similarity score of {score:.2}, which makes them {}.",
        first.display_name(),
        second.display_name(),
        relationship.replace('_', " ")
    );
    comparison.push_str(if same_cluster {
        " They fall in the same group of related artifacts in the collection."
    } else {
        " They belong to different groups within the collection."
    });
    if shared.is_empty() {
        comparison.push_str(" Their descriptions share no distinctive terms.");
    } else {
        comparison.push_str(&format!(" Shared themes: {}.", shared.join(", ")));
    }

    Some(CompareReply {
        comparison,
        similarities: extract_similarities(first, second),
        differences: extract_differences(first, second),
        similarity_score: (score * 10_000.0).round() / 10_000.0,
        relationship_type: relationship.to_string(),
        same_cluster,
    })
}

fn to_value<T: Serialize>(reply: &T) -> Value {
    serde_json::to_value(reply).unwrap_or_else(|e| {
        serde_json::json!({ "error": format!("failed to encode reply: {e}") })
    })
}

fn write_reply<W: Write, T: Serialize>(output: &mut W, reply: &T) -> io::Result<()> {
    let json = serde_json::to_string(reply).map_err(io::Error::other)?;
    writeln!(output, "{json}")?;
    output.flush()
}
