//! # Ensemble orchestration
//!
//! Runs every registered model against one preprocessed image under the
//! device memory ceiling and folds the per-model verdicts into a single
//! aggregated report. Models execute strictly sequentially
//! (load -> infer -> release) because the ensemble's combined weight
//! footprint does not fit on the device; a model that fails to load or
//! run is recorded and skipped, and the ensemble only fails as a whole
//! when no model produced a verdict.

pub mod aggregate;
pub mod runner;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::model::Architecture;

pub use runner::EnsembleRunner;

/// One model's prediction for one image.
///
/// Immutable after creation; the raw pre-softmax scores are retained so a
/// later explainability pass can be checked against the same decision.
#[derive(Debug, Clone, Serialize)]
pub struct ModelVerdict {
    /// Which architecture produced this verdict
    pub architecture: Architecture,
    /// Predicted class label
    pub label: String,
    /// Index of the predicted label in the report's label list
    pub label_index: usize,
    /// Softmax probabilities, aligned with the report's label list
    pub probabilities: Vec<f32>,
    /// Raw pre-softmax scores
    pub logits: Vec<f32>,
    /// Wall-clock inference duration in milliseconds
    pub duration_ms: u64,
}

/// A model that failed to produce a verdict, with the reason retained.
#[derive(Debug, Clone, Serialize)]
pub struct ModelFailure {
    /// Which architecture failed
    pub architecture: Architecture,
    /// Human-readable failure reason
    pub reason: String,
}

/// The aggregated outcome of one ensemble run.
///
/// Verdicts appear in registry order regardless of individual model
/// timing. Read-only once created.
#[derive(Debug, Clone, Serialize)]
pub struct EnsembleReport {
    /// Prediction identifier for downstream collaborators
    pub id: Uuid,
    /// When the report was created
    pub created_at: DateTime<Utc>,
    /// Ordered class labels shared by every verdict
    pub labels: Vec<String>,
    /// Per-model verdicts, in registry order
    pub verdicts: Vec<ModelVerdict>,
    /// Models that failed, with reasons
    pub failures: Vec<ModelFailure>,
    /// Aggregated predicted label
    pub label: String,
    /// Mean probability the voting models assigned to the winning label
    pub confidence: f32,
    /// Fraction of successful models that voted for the winning label
    pub agreement_ratio: f32,
}
