//! The ensemble scheduler: sequential load -> infer -> release cycles
//! under the device memory ceiling.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use ndarray::Array2;
use tracing::{info, warn};
use uuid::Uuid;

use super::aggregate::aggregate;
use super::{EnsembleReport, ModelFailure, ModelVerdict};
use crate::device::Device;
use crate::error::EngineError;
use crate::model::{ActivationMode, ModelRegistry};
use crate::preprocess::Preprocessor;

/// Runs the full ensemble against one image.
///
/// Stateless across invocations: the preprocessed-tensor cache lives and
/// dies inside a single `run` call.
pub struct EnsembleRunner<'a> {
    registry: &'a ModelRegistry,
    device: &'a Arc<Device>,
    preprocessor: &'a Preprocessor,
}

impl<'a> EnsembleRunner<'a> {
    pub fn new(
        registry: &'a ModelRegistry,
        device: &'a Arc<Device>,
        preprocessor: &'a Preprocessor,
    ) -> Self {
        Self {
            registry,
            device,
            preprocessor,
        }
    }

    /// Executes the ensemble and aggregates the verdicts.
    ///
    /// # Errors
    ///
    /// * `InvalidImageError` - the image bytes could not be decoded
    /// * `EnsembleExhaustedError` - no model produced a verdict; the
    ///   per-model failure reasons travel inside the error
    pub fn run(&self, image_bytes: &[u8]) -> Result<EnsembleReport, EngineError> {
        let equalized = self.preprocessor.decode_and_equalize(image_bytes)?;
        let specs = self.registry.list_specs();

        // Architectures share input resolutions; resize once per distinct
        // resolution and normalize per architecture on top of that.
        let mut resized_cache: HashMap<usize, Array2<f32>> = HashMap::new();

        let mut verdicts: Vec<ModelVerdict> = Vec::new();
        let mut failures: Vec<ModelFailure> = Vec::new();
        let mut labels: Option<Vec<String>> = None;

        for spec in &specs {
            let resolution = spec.input_resolution;
            let resized = resized_cache
                .entry(resolution)
                .or_insert_with(|| equalized.resized(resolution));
            let (mean, std) = spec.architecture.normalization();
            let input = equalized.normalized(resized, mean, std);

            // One load -> infer -> release bracket per model, serialized
            // against every other engine caller.
            let _exec = self.device.begin_exclusive();
            let outcome = (|| {
                let mut model = self.registry.load(spec, self.device)?;
                let prediction = model.forward(&input.tensor, ActivationMode::Discard)?;
                Ok::<_, EngineError>((model.labels.clone(), prediction))
                // `model` drops here: device memory is released before the
                // next spec is dequeued.
            })();

            match outcome {
                Ok((model_labels, prediction)) => {
                    match &labels {
                        Some(expected) if *expected != model_labels => {
                            warn!(
                                architecture = %spec.architecture,
                                "label set disagrees with the rest of the ensemble"
                            );
                            failures.push(ModelFailure {
                                architecture: spec.architecture,
                                reason: format!(
                                    "label set {:?} disagrees with ensemble {:?}",
                                    model_labels, expected
                                ),
                            });
                            continue;
                        }
                        Some(_) => {}
                        None => labels = Some(model_labels.clone()),
                    }

                    verdicts.push(ModelVerdict {
                        architecture: spec.architecture,
                        label: model_labels[prediction.class_index].clone(),
                        label_index: prediction.class_index,
                        probabilities: prediction.probabilities.to_vec(),
                        logits: prediction.logits.to_vec(),
                        duration_ms: prediction.duration.as_millis() as u64,
                    });
                }
                Err(e) => {
                    warn!(architecture = %spec.architecture, error = %e, "model failed, continuing");
                    failures.push(ModelFailure {
                        architecture: spec.architecture,
                        reason: e.to_string(),
                    });
                }
            }
        }

        if verdicts.is_empty() {
            return Err(EngineError::EnsembleExhausted {
                failures: failures
                    .into_iter()
                    .map(|f| (f.architecture, f.reason))
                    .collect(),
            });
        }

        let labels = labels.expect("verdicts imply a label set");
        let agg = aggregate(&verdicts, labels.len());
        let label = labels[agg.label_index].clone();

        info!(
            %label,
            confidence = agg.confidence,
            agreement = agg.agreement_ratio,
            verdicts = verdicts.len(),
            failures = failures.len(),
            "ensemble run complete"
        );

        Ok(EnsembleReport {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            labels,
            verdicts,
            failures,
            label,
            confidence: agg.confidence,
            agreement_ratio: agg.agreement_ratio,
        })
    }
}
