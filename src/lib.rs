//! Tiered inference for explaining and comparing museum artifacts.
//!
//! Requests go through [`orchestrator::FallbackOrchestrator`], which tries an
//! out-of-process trained model (or a warmed in-process model for
//! explanations), then a remote API, then a deterministic template.

pub mod catalog;
pub mod error;
pub mod images;
pub mod local_model;
pub mod logger;
pub mod normalize;
pub mod orchestrator;
pub mod remote;
pub mod service;
pub mod similarity;
pub mod template;
pub mod warmup;

pub use catalog::{ArtifactStore, JsonArtifactCatalog};
pub use error::TierError;
pub use orchestrator::{FallbackOrchestrator, FallbackPolicy, Tier, TIER_ORDER};
pub use service::line_channel::{LineProtocolChannel, NoResponse};
pub use service::process_supervisor::{ProcessSupervisor, ServiceCommand, ServiceTimeouts};
pub use warmup::BackgroundWarmupController;
