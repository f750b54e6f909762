//! # Explainability engine
//!
//! Gradient-weighted class activation mapping over the retained forward
//! trace. For a global-average-pool + linear classifier head the gradient
//! of a class logit at the final feature map is constant per channel and
//! equals that class's classifier row (up to the pooling constant), so
//! channel weighting reduces to the classifier weights of the predicted
//! class. The weighted channel sum is rectified (only positive-evidence
//! regions are visualized), min-max normalized, and resampled to the
//! source image geometry.
//!
//! Dual-branch architectures get a second map from the attention branch,
//! token attention modulated by the class evidence at each token, plus a
//! fused map combining the two with a configurable blend weight. Clinicians
//! see all three: the convolutional and attention pathways attend to
//! different evidence.

use std::sync::Arc;

use ndarray::{Array2, Array3, ArrayView1};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::device::Device;
use crate::error::EngineError;
use crate::model::{ActivationMode, Architecture, ModelRegistry};
use crate::preprocess::{resize, Preprocessor};

/// A spatial importance map in source-image geometry, values in [0, 1].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeatMap {
    pub width: u32,
    pub height: u32,
    /// Row-major values, `width * height` entries
    pub values: Vec<f32>,
}

impl HeatMap {
    /// Packages a map array as a heatmap (rows = height).
    pub fn from_array(map: &Array2<f32>) -> Self {
        let (height, width) = map.dim();
        Self {
            width: width as u32,
            height: height as u32,
            values: map.iter().cloned().collect(),
        }
    }

    /// Reconstructs the array form.
    pub fn to_array(&self) -> Array2<f32> {
        Array2::from_shape_vec(
            (self.height as usize, self.width as usize),
            self.values.clone(),
        )
        .expect("heatmap dimensions match value count")
    }
}

/// The artifact set produced for one `explain` call.
///
/// Independent lifetime from any ensemble report; it can be regenerated
/// or discarded without affecting stored reports.
#[derive(Debug, Clone, Serialize)]
pub struct ExplainabilityArtifact {
    /// Architecture the maps were computed against
    pub architecture: Architecture,
    /// The class the maps explain (the model's predicted label)
    pub predicted_label: String,
    /// Gradient-weighted class activation map, source geometry
    pub class_activation: HeatMap,
    /// Attention-branch map; present only for dual-branch architectures
    pub attention: Option<HeatMap>,
    /// Fusion of the two maps; present only for dual-branch architectures
    pub fused: Option<HeatMap>,
    /// Blend weight used for the fusion (convolutional share)
    pub blend_weight: Option<f32>,
}

/// Computes explainability artifacts by reloading a single model.
pub struct Explainer<'a> {
    registry: &'a ModelRegistry,
    device: &'a Arc<Device>,
    preprocessor: &'a Preprocessor,
    blend_weight: f32,
}

impl<'a> Explainer<'a> {
    pub fn new(
        registry: &'a ModelRegistry,
        device: &'a Arc<Device>,
        preprocessor: &'a Preprocessor,
        blend_weight: f32,
    ) -> Self {
        Self {
            registry,
            device,
            preprocessor,
            blend_weight,
        }
    }

    /// Produces the attribution maps for one architecture and image.
    ///
    /// The model is reloaded and a fresh forward pass runs in retain mode;
    /// nothing is reused from any earlier ensemble run, which discards its
    /// intermediate state to conserve device memory.
    ///
    /// # Errors
    ///
    /// * `InvalidImageError` - undecodable input
    /// * `WeightArtifactMissingError` / `IncompatibleArchitectureError` -
    ///   the requested model cannot be loaded
    /// * `GradientUnavailableError` - the forward pass retained no trace
    pub fn explain(
        &self,
        image_bytes: &[u8],
        architecture: Architecture,
    ) -> Result<ExplainabilityArtifact, EngineError> {
        let equalized = self.preprocessor.decode_and_equalize(image_bytes)?;

        let spec = self
            .registry
            .list_specs()
            .into_iter()
            .find(|s| s.architecture == architecture)
            .expect("every architecture has a spec");

        let resized = equalized.resized(spec.input_resolution);
        let (mean, std) = architecture.normalization();
        let input = equalized.normalized(&resized, mean, std);

        let src_h = input.source_height as usize;
        let src_w = input.source_width as usize;

        let _exec = self.device.begin_exclusive();
        let mut model = self.registry.load(&spec, self.device)?;
        let prediction = model.forward(&input.tensor, ActivationMode::Retain)?;
        let trace = model.trace()?;

        let class_weights = model.classifier_weights().row(prediction.class_index);
        let predicted_label = model.labels[prediction.class_index].clone();

        let cam = grad_cam(&trace.features, class_weights);
        let class_activation = HeatMap::from_array(&resize::bilinear(&cam, src_h, src_w));

        let (attention, fused, blend_weight) = if spec.supports_dual_branch {
            let weights = trace.attention.as_ref().ok_or_else(|| {
                EngineError::GradientUnavailable(format!(
                    "{} retained no attention weights",
                    architecture
                ))
            })?;
            let attn = attention_cam(&trace.features, weights, class_weights);
            let fused_map = fuse(&cam, &attn, self.blend_weight);
            (
                Some(HeatMap::from_array(&resize::bilinear(&attn, src_h, src_w))),
                Some(HeatMap::from_array(&resize::bilinear(&fused_map, src_h, src_w))),
                Some(self.blend_weight),
            )
        } else {
            (None, None, None)
        };

        info!(
            %architecture,
            label = %predicted_label,
            dual_branch = spec.supports_dual_branch,
            "explainability artifact computed"
        );

        Ok(ExplainabilityArtifact {
            architecture,
            predicted_label,
            class_activation,
            attention,
            fused,
            blend_weight,
        })
        // model (and its lease) drop here, restoring the memory baseline.
    }
}

/// Gradient-weighted class activation map at feature resolution.
///
/// `class_weights` is the classifier row of the predicted class; for a
/// GAP + linear head it equals the pooled gradient per channel. Negative
/// contributions are zeroed, the map is min-max normalized.
pub fn grad_cam(features: &Array3<f32>, class_weights: ArrayView1<f32>) -> Array2<f32> {
    normalize_map(&class_evidence(features, class_weights).mapv(|v| v.max(0.0)))
}

/// Attention-branch map: token attention weights modulated by the class
/// evidence each token carries, rectified and normalized like the
/// convolutional map.
pub fn attention_cam(
    features: &Array3<f32>,
    attention: &Array2<f32>,
    class_weights: ArrayView1<f32>,
) -> Array2<f32> {
    let evidence = class_evidence(features, class_weights);
    normalize_map(&(attention * &evidence).mapv(|v| v.max(0.0)))
}

/// Fuses two normalized maps; `blend` is the first map's share.
pub fn fuse(primary: &Array2<f32>, secondary: &Array2<f32>, blend: f32) -> Array2<f32> {
    normalize_map(&(primary * blend + secondary * (1.0 - blend)))
}

/// Per-pixel class evidence: the channel sum of the feature map weighted
/// by the class's classifier weights.
fn class_evidence(features: &Array3<f32>, class_weights: ArrayView1<f32>) -> Array2<f32> {
    let (channels, height, width) = features.dim();
    Array2::from_shape_fn((height, width), |(y, x)| {
        (0..channels)
            .map(|c| class_weights[c] * features[[c, y, x]])
            .sum()
    })
}

/// Min-max normalization to [0, 1]; a flat map becomes all zeros instead
/// of dividing by zero.
fn normalize_map(map: &Array2<f32>) -> Array2<f32> {
    let min = map.iter().cloned().fold(f32::INFINITY, f32::min);
    let max = map.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    if !(max - min).is_normal() {
        return Array2::zeros(map.dim());
    }
    map.mapv(|v| (v - min) / (max - min))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, Array3};

    #[test]
    fn grad_cam_highlights_positive_evidence_only() {
        // Channel 0 pushes the class, channel 1 pushes against it.
        let mut features = Array3::<f32>::zeros((2, 2, 2));
        features[[0, 0, 0]] = 3.0;
        features[[1, 1, 1]] = 5.0;
        let weights = arr1(&[1.0, -1.0]);

        let cam = grad_cam(&features, weights.view());
        assert!((cam[[0, 0]] - 1.0).abs() < 1e-6);
        // The negatively-weighted region is rectified away.
        assert!(cam[[1, 1]] < cam[[0, 0]]);
        assert!(cam.iter().all(|&v| (0.0..=1.0).contains(&v)));
    }

    #[test]
    fn flat_evidence_normalizes_to_zeros() {
        let features = Array3::<f32>::from_elem((3, 4, 4), 1.0);
        let weights = arr1(&[0.2, 0.2, 0.2]);
        let cam = grad_cam(&features, weights.view());
        assert!(cam.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn attention_cam_masks_evidence_by_attention() {
        let mut features = Array3::<f32>::zeros((1, 2, 2));
        features[[0, 0, 0]] = 2.0;
        features[[0, 1, 1]] = 2.0;
        // All attention on the (0,0) token.
        let mut attention = Array2::<f32>::zeros((2, 2));
        attention[[0, 0]] = 1.0;
        let weights = arr1(&[1.0]);

        let cam = attention_cam(&features, &attention, weights.view());
        assert!((cam[[0, 0]] - 1.0).abs() < 1e-6);
        assert_eq!(cam[[1, 1]], 0.0);
    }

    #[test]
    fn fuse_respects_blend_extremes() {
        let a = Array2::from_shape_fn((2, 2), |(y, x)| (y * 2 + x) as f32 / 3.0);
        let b = Array2::from_shape_fn((2, 2), |(y, x)| 1.0 - (y * 2 + x) as f32 / 3.0);
        assert_eq!(fuse(&a, &b, 1.0), a);
        assert_eq!(fuse(&a, &b, 0.0), b);
    }

    #[test]
    fn heatmap_roundtrips_through_array_form() {
        let map = Array2::from_shape_fn((3, 5), |(y, x)| (y * 5 + x) as f32);
        let heat = HeatMap::from_array(&map);
        assert_eq!(heat.width, 5);
        assert_eq!(heat.height, 3);
        assert_eq!(heat.to_array(), map);
    }
}
