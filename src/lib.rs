//! # xrai
//!
//! An X-ray ensemble diagnosis and explainability engine. Submitted
//! images run through six independently trained classifier architectures
//! under a hard device-memory budget; their votes are aggregated into a
//! clinically reviewable report, and per-model decision regions can be
//! visualized on demand as class-activation heatmaps (dual-branch for the
//! hybrid convolution + attention architecture).
//!
//! The engine exposes exactly two operations:
//!
//! - [`DiagnosisEngine::run`]: image bytes in, [`EnsembleReport`] out
//! - [`DiagnosisEngine::explain`]: image bytes + architecture in,
//!   [`ExplainabilityArtifact`] out
//!
//! Surrounding collaborators (HTTP transport, persistence, notification)
//! consume these as plain structured data; the engine performs none of
//! that itself.

pub mod config;
pub mod device;
pub mod engine;
pub mod ensemble;
pub mod error;
pub mod explain;
pub mod model;
pub mod preprocess;
pub mod weights;

pub use config::Settings;
pub use device::Device;
pub use engine::DiagnosisEngine;
pub use ensemble::{EnsembleReport, ModelFailure, ModelVerdict};
pub use error::EngineError;
pub use explain::{ExplainabilityArtifact, HeatMap};
pub use model::{Architecture, ModelRegistry, ModelSpec};
pub use preprocess::{PreprocessedImage, Preprocessor};
