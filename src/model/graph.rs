//! Forward execution of a loaded model.
//!
//! Every artifact describes the same family of graphs: a stack of
//! convolution blocks (same-padding conv, ReLU, 2x2 average pool), global
//! average pooling, and a dense classifier head. The hybrid architecture
//! adds an attention branch over the final feature map's spatial tokens;
//! its attention-pooled feature is averaged with the pooled convolutional
//! feature before classification.

use std::time::Instant;

use ndarray::{Array1, Array2, Array3, Array4, Axis};
use tracing::debug;

use super::ops;
use super::ModelSpec;
use crate::device::MemoryLease;
use crate::error::EngineError;

/// Whether a forward pass keeps the intermediate state attribution needs.
///
/// The ensemble path discards everything to conserve device memory; the
/// explainability path retains the trace and pays for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationMode {
    Discard,
    Retain,
}

/// Intermediate state retained by a `Retain`-mode forward pass.
pub struct ForwardTrace {
    /// Final convolutional feature map, shape `[channels, h, w]`
    pub features: Array3<f32>,
    /// Attention weights over the `h x w` token grid (hybrid only)
    pub attention: Option<Array2<f32>>,
    /// Raw pre-softmax scores
    pub logits: Array1<f32>,
}

/// One convolution block's parameters.
pub struct ConvBlock {
    pub weight: Array4<f32>,
    pub bias: Array1<f32>,
}

/// The outcome of a single forward pass.
#[derive(Debug, Clone)]
pub struct Prediction {
    /// Raw pre-softmax scores, one per class
    pub logits: Array1<f32>,
    /// Softmax probabilities, one per class
    pub probabilities: Array1<f32>,
    /// Index of the winning class
    pub class_index: usize,
    /// Wall-clock duration of the pass
    pub duration: std::time::Duration,
}

/// A model materialized on the device.
///
/// Holds its memory lease; dropping the model releases the device bytes
/// before the next load in the schedule.
pub struct LoadedModel {
    /// The spec this model was loaded from
    pub spec: ModelSpec,
    /// Ordered class labels emitted by the classifier head
    pub labels: Vec<String>,
    blocks: Vec<ConvBlock>,
    classifier_weight: Array2<f32>,
    classifier_bias: Array1<f32>,
    attention_query: Option<Array1<f32>>,
    trace: Option<ForwardTrace>,
    _lease: MemoryLease,
}

impl LoadedModel {
    pub(crate) fn new(
        spec: ModelSpec,
        labels: Vec<String>,
        blocks: Vec<ConvBlock>,
        classifier_weight: Array2<f32>,
        classifier_bias: Array1<f32>,
        attention_query: Option<Array1<f32>>,
        lease: MemoryLease,
    ) -> Self {
        Self {
            spec,
            labels,
            blocks,
            classifier_weight,
            classifier_bias,
            attention_query,
            trace: None,
            _lease: lease,
        }
    }

    /// Runs one forward pass over a preprocessed input plane.
    ///
    /// # Errors
    ///
    /// `IncompatibleArchitectureError` if the input resolution does not
    /// match the spec. Any prior trace is cleared at entry so a retained
    /// trace always belongs to the most recent pass.
    pub fn forward(
        &mut self,
        input: &Array2<f32>,
        mode: ActivationMode,
    ) -> Result<Prediction, EngineError> {
        let started = Instant::now();
        self.trace = None;

        let (h, w) = input.dim();
        let res = self.spec.input_resolution;
        if h != res || w != res {
            return Err(EngineError::IncompatibleArchitecture {
                architecture: self.spec.architecture,
                reason: format!("input is {}x{}, model expects {}x{}", h, w, res, res),
            });
        }

        // Single intensity channel in, feature volume out.
        let mut x = input
            .to_owned()
            .insert_axis(Axis(0));
        for block in &self.blocks {
            x = ops::conv2d_same(&x, &block.weight, &block.bias);
            ops::relu_inplace(&mut x);
            x = ops::avg_pool2(&x);
        }
        let features = x;

        let gap = ops::global_avg_pool(&features);
        let (feature_vec, attention) = match &self.attention_query {
            Some(query) => {
                let (attention, pooled) = attention_branch(&features, query);
                ((&gap + &pooled) / 2.0, Some(attention))
            }
            None => (gap, None),
        };

        let logits = self.classifier_weight.dot(&feature_vec) + &self.classifier_bias;
        let probabilities = ops::softmax(&logits);
        let class_index = argmax(&probabilities);

        if mode == ActivationMode::Retain {
            self.trace = Some(ForwardTrace {
                features,
                attention,
                logits: logits.clone(),
            });
        }

        let duration = started.elapsed();
        debug!(
            architecture = %self.spec.architecture,
            class_index,
            ms = duration.as_millis() as u64,
            "forward pass complete"
        );

        Ok(Prediction {
            logits,
            probabilities,
            class_index,
            duration,
        })
    }

    /// The trace retained by the last `Retain`-mode forward pass.
    ///
    /// # Errors
    ///
    /// `GradientUnavailableError` when no trace exists, i.e. the last pass
    /// ran in discard mode or no pass has run at all.
    pub fn trace(&self) -> Result<&ForwardTrace, EngineError> {
        self.trace.as_ref().ok_or_else(|| {
            EngineError::GradientUnavailable(format!(
                "{} has no retained computation graph; run a forward pass in retain mode",
                self.spec.architecture
            ))
        })
    }

    /// Classifier head weights, shape `[classes, feature_channels]`.
    ///
    /// For a global-average-pool + linear head these rows are exactly the
    /// class gradients at the feature map, which is what the attribution
    /// computation consumes.
    pub fn classifier_weights(&self) -> &Array2<f32> {
        &self.classifier_weight
    }
}

/// Scores each spatial token of the feature map against the learned query
/// and pools the tokens by the resulting attention distribution.
fn attention_branch(features: &Array3<f32>, query: &Array1<f32>) -> (Array2<f32>, Array1<f32>) {
    let (channels, height, width) = features.dim();
    let tokens = height * width;
    let scale = (channels as f32).sqrt();

    let mut scores = Array1::<f32>::zeros(tokens);
    for t in 0..tokens {
        let (y, x) = (t / width, t % width);
        let mut dot = 0.0;
        for c in 0..channels {
            dot += query[c] * features[[c, y, x]];
        }
        scores[t] = dot / scale;
    }
    let weights = ops::softmax(&scores);

    let mut pooled = Array1::<f32>::zeros(channels);
    for t in 0..tokens {
        let (y, x) = (t / width, t % width);
        for c in 0..channels {
            pooled[c] += weights[t] * features[[c, y, x]];
        }
    }

    let attention = Array2::from_shape_fn((height, width), |(y, x)| weights[y * width + x]);
    (attention, pooled)
}

fn argmax(values: &Array1<f32>) -> usize {
    let mut best = 0;
    for (i, &v) in values.iter().enumerate() {
        if v > values[best] {
            best = i;
        }
    }
    best
}
