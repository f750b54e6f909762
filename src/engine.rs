//! The engine facade: the two operations collaborators consume.

use std::sync::Arc;

use tracing::info;

use crate::config::Settings;
use crate::device::Device;
use crate::ensemble::{EnsembleReport, EnsembleRunner};
use crate::error::EngineError;
use crate::explain::{ExplainabilityArtifact, Explainer};
use crate::model::{Architecture, ModelRegistry};
use crate::preprocess::Preprocessor;

/// The diagnosis engine.
///
/// Owns the model registry, the device memory accountant, and the
/// preprocessor. Stateless across calls apart from device accounting:
/// every `run` and `explain` returns the device to its baseline.
pub struct DiagnosisEngine {
    settings: Settings,
    registry: ModelRegistry,
    device: Arc<Device>,
    preprocessor: Preprocessor,
}

impl DiagnosisEngine {
    /// Builds an engine from settings.
    pub fn new(settings: Settings) -> Self {
        let device = Device::new(settings.memory_budget_bytes());
        Self::with_device(settings, device)
    }

    /// Builds an engine against an existing device accountant. Lets a
    /// deployment partition one physical budget between engines, and lets
    /// tests observe the accountant directly.
    pub fn with_device(settings: Settings, device: Arc<Device>) -> Self {
        let registry = ModelRegistry::new(settings.models.directory.clone());
        let preprocessor = Preprocessor::new(&settings.preprocess);
        info!(
            models_dir = %settings.models.directory.display(),
            budget_bytes = device.capacity(),
            "diagnosis engine ready"
        );
        Self {
            settings,
            registry,
            device,
            preprocessor,
        }
    }

    /// Runs the full ensemble against one image and aggregates the
    /// verdicts into a report.
    pub fn run(&self, image_bytes: &[u8]) -> Result<EnsembleReport, EngineError> {
        EnsembleRunner::new(&self.registry, &self.device, &self.preprocessor).run(image_bytes)
    }

    /// Computes the explainability artifact set for one architecture.
    pub fn explain(
        &self,
        image_bytes: &[u8],
        architecture: Architecture,
    ) -> Result<ExplainabilityArtifact, EngineError> {
        Explainer::new(
            &self.registry,
            &self.device,
            &self.preprocessor,
            self.settings.explain.blend_weight,
        )
        .explain(image_bytes, architecture)
    }

    /// The registry backing this engine.
    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    /// The device accountant backing this engine.
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }
}
