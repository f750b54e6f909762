//! Manages the model registry: spec listing, artifact lookup, and loading
//! models onto the device.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use indicatif::{ProgressBar, ProgressStyle};
use ndarray::{Array1, Array2};
use tracing::{info, warn};

use super::graph::{ConvBlock, LoadedModel};
use super::{Architecture, ModelSpec};
use crate::device::Device;
use crate::error::EngineError;
use crate::weights::{is_artifact_file, ArtifactReader};

/// Path-addressable registry over the read-only weight store.
///
/// Specs are derived from the fixed architecture set plus the store
/// directory; the registry holds no mutable state, so listing is
/// deterministic and cheap.
pub struct ModelRegistry {
    /// Directory where weight artifacts are stored
    models_dir: PathBuf,
}

impl ModelRegistry {
    /// Creates a registry over the given store directory.
    pub fn new(models_dir: PathBuf) -> Self {
        Self { models_dir }
    }

    /// The store directory backing this registry.
    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    /// Store path for one architecture's artifact.
    pub fn weight_path(&self, architecture: Architecture) -> PathBuf {
        self.models_dir.join(format!("{}.xwa", architecture.slug()))
    }

    /// Returns one spec per supported architecture, in registry order.
    ///
    /// The footprint is read from the artifact header when the file is
    /// present and falls back to the architecture's nominal figure when it
    /// is not; `load` recomputes the real footprint either way.
    pub fn list_specs(&self) -> Vec<ModelSpec> {
        Architecture::ALL
            .iter()
            .map(|&architecture| self.spec_for(architecture))
            .collect()
    }

    fn spec_for(&self, architecture: Architecture) -> ModelSpec {
        let weight_path = self.weight_path(architecture);
        let resolution = architecture.input_resolution();
        let memory_footprint = match ArtifactReader::open(&weight_path) {
            Ok(reader) => reader.payload_bytes() + activation_bytes(&reader, resolution),
            Err(_) => architecture.nominal_footprint(),
        };
        ModelSpec {
            architecture,
            weight_path,
            input_resolution: resolution,
            memory_footprint,
            supports_dual_branch: architecture.supports_dual_branch(),
        }
    }

    /// Scans the store and reports which architectures have a readable
    /// artifact behind them. Used by operational tooling; the runner never
    /// needs this because per-model load failures are tolerated.
    pub fn scan_store(&self) -> Vec<(ModelSpec, bool)> {
        let pb = ProgressBar::new(Architecture::ALL.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{prefix:.bold.dim} {bar:24} {pos}/{len} {wide_msg}")
                .unwrap(),
        );
        pb.set_prefix("scan");

        let mut out = Vec::with_capacity(Architecture::ALL.len());
        for spec in self.list_specs() {
            pb.set_message(spec.architecture.to_string());
            let available = is_artifact_file(&spec.weight_path);
            if available {
                info!(architecture = %spec.architecture, path = %spec.weight_path.display(), "artifact present");
            } else {
                warn!(architecture = %spec.architecture, path = %spec.weight_path.display(), "artifact missing");
            }
            out.push((spec, available));
            pb.inc(1);
        }
        pb.finish_and_clear();
        out
    }

    /// Loads a model onto the device.
    ///
    /// Leases the model's footprint from the device accountant before
    /// materializing any tensor; the lease travels with the returned
    /// `LoadedModel` and is released when it drops.
    ///
    /// # Errors
    ///
    /// * `WeightArtifactMissingError` - the backing file is absent
    /// * `IncompatibleArchitectureError` - the artifact does not match the
    ///   spec (slug mismatch, broken tensor chain, label/classifier
    ///   disagreement, missing attention tensors on a dual-branch spec)
    /// * `InsufficientDeviceMemoryError` - the lease was refused
    pub fn load(&self, spec: &ModelSpec, device: &Arc<Device>) -> Result<LoadedModel, EngineError> {
        let arch = spec.architecture;
        let path = &spec.weight_path;

        let reader = ArtifactReader::open(path)
            .map_err(|e| EngineError::from_weight_error(arch, path, e))?;

        if reader.architecture != arch.slug() {
            return Err(incompatible(
                arch,
                format!(
                    "artifact was packaged for '{}', spec expects '{}'",
                    reader.architecture,
                    arch.slug()
                ),
            ));
        }

        let footprint = reader.payload_bytes() + activation_bytes(&reader, spec.input_resolution);
        let lease = device.lease(footprint)?;
        info!(
            architecture = %arch,
            footprint,
            "loading model onto device"
        );

        let tensor = |name: &str| {
            reader
                .tensor_f32(name)
                .map_err(|e| EngineError::from_weight_error(arch, path, e))
        };

        // Convolution blocks are numbered consecutively from conv0; the
        // chain ends at the first missing index.
        let mut blocks = Vec::new();
        let mut in_channels = 1usize;
        for index in 0.. {
            let weight_name = format!("conv{}.weight", index);
            if !reader.has_tensor(&weight_name) {
                break;
            }
            let weight = tensor(&weight_name)?
                .into_dimensionality::<ndarray::Ix4>()
                .map_err(|_| incompatible(arch, format!("{} is not rank 4", weight_name)))?;
            if weight.dim().1 != in_channels {
                return Err(incompatible(
                    arch,
                    format!(
                        "{} expects {} input channels, previous block provides {}",
                        weight_name,
                        weight.dim().1,
                        in_channels
                    ),
                ));
            }
            let bias = tensor(&format!("conv{}.bias", index))?
                .into_dimensionality::<ndarray::Ix1>()
                .map_err(|_| incompatible(arch, format!("conv{}.bias is not rank 1", index)))?;
            if bias.len() != weight.dim().0 {
                return Err(incompatible(
                    arch,
                    format!("conv{}.bias length does not match output channels", index),
                ));
            }
            in_channels = weight.dim().0;
            blocks.push(ConvBlock { weight, bias });
        }
        if blocks.is_empty() {
            return Err(incompatible(arch, "artifact has no convolution blocks".to_string()));
        }

        let classifier_weight: Array2<f32> = tensor("classifier.weight")?
            .into_dimensionality::<ndarray::Ix2>()
            .map_err(|_| incompatible(arch, "classifier.weight is not rank 2".to_string()))?;
        let classifier_bias: Array1<f32> = tensor("classifier.bias")?
            .into_dimensionality::<ndarray::Ix1>()
            .map_err(|_| incompatible(arch, "classifier.bias is not rank 1".to_string()))?;

        let labels = reader.labels.clone();
        if classifier_weight.dim().0 != labels.len() {
            return Err(incompatible(
                arch,
                format!(
                    "classifier emits {} classes but artifact lists {} labels",
                    classifier_weight.dim().0,
                    labels.len()
                ),
            ));
        }
        if classifier_weight.dim().1 != in_channels {
            return Err(incompatible(
                arch,
                format!(
                    "classifier expects {} features, backbone provides {}",
                    classifier_weight.dim().1,
                    in_channels
                ),
            ));
        }
        if classifier_bias.len() != labels.len() {
            return Err(incompatible(
                arch,
                "classifier.bias length does not match label count".to_string(),
            ));
        }

        let attention_query: Option<Array1<f32>> = if spec.supports_dual_branch {
            let query = tensor("attn.query")?
                .into_dimensionality::<ndarray::Ix1>()
                .map_err(|_| incompatible(arch, "attn.query is not rank 1".to_string()))?;
            if query.len() != in_channels {
                return Err(incompatible(
                    arch,
                    format!(
                        "attn.query has {} channels, feature map has {}",
                        query.len(),
                        in_channels
                    ),
                ));
            }
            Some(query)
        } else {
            if reader.has_tensor("attn.query") {
                return Err(incompatible(
                    arch,
                    "artifact carries attention tensors but the architecture is not dual-branch"
                        .to_string(),
                ));
            }
            None
        };

        Ok(LoadedModel::new(
            spec.clone(),
            labels,
            blocks,
            classifier_weight,
            classifier_bias,
            attention_query,
            lease,
        ))
    }
}

/// Estimates the largest activation allocation for one forward pass:
/// the input plane plus the widest feature volume at input resolution.
fn activation_bytes(reader: &ArtifactReader, resolution: usize) -> usize {
    let max_channels = reader
        .tensors
        .iter()
        .filter(|t| t.name.starts_with("conv") && t.name.ends_with(".weight") && t.dims.len() == 4)
        .map(|t| t.dims[0] as usize)
        .max()
        .unwrap_or(1);
    (1 + max_channels) * resolution * resolution * std::mem::size_of::<f32>()
}

fn incompatible(architecture: Architecture, reason: String) -> EngineError {
    EngineError::IncompatibleArchitecture {
        architecture,
        reason,
    }
}
