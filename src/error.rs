//! Tier-local failures.
//!
//! None of these ever reach a caller of the orchestrator: every variant is
//! recovered by falling through to the next tier.

use crate::service::line_channel::NoResponse;

#[derive(Debug, thiserror::Error)]
pub enum TierError {
    #[error("tier unavailable: {0}")]
    Unavailable(&'static str),
    #[error("model service gave no response: {0}")]
    NoResponse(#[from] NoResponse),
    #[error("model service reported an error: {0}")]
    Service(String),
    #[error("remote API error: {0}")]
    Remote(String),
    #[error("remote API returned unparseable JSON")]
    MalformedJson { raw: String },
    #[error("local model error: {0}")]
    LocalModel(String),
    #[error("degenerate output ({0} chars)")]
    Degenerate(usize),
    #[error("image error: {0}")]
    Image(String),
}
