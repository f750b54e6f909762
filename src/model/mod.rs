//! # Model architectures and registry
//!
//! The ensemble is a closed set of six independently trained classifier
//! architectures. Adding a new architecture means adding an enum variant
//! here (resolution, normalization statistics, capabilities) and shipping
//! an artifact for it; nothing in the runner branches on concrete types.

pub mod graph;
pub mod ops;
pub mod registry;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use graph::{ActivationMode, ForwardTrace, LoadedModel, Prediction};
pub use registry::ModelRegistry;

/// The supported classifier architectures, in registry order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Architecture {
    #[serde(rename = "resnet50")]
    ResNet50,
    #[serde(rename = "densenet121")]
    DenseNet121,
    #[serde(rename = "efficientnet_b0")]
    EfficientNetB0,
    #[serde(rename = "vgg16")]
    Vgg16,
    #[serde(rename = "inception_v3")]
    InceptionV3,
    #[serde(rename = "coatnet_hybrid")]
    CoAtNetHybrid,
}

impl Architecture {
    /// All supported architectures; this order is the registry order and
    /// therefore the verdict order in every report.
    pub const ALL: [Architecture; 6] = [
        Architecture::ResNet50,
        Architecture::DenseNet121,
        Architecture::EfficientNetB0,
        Architecture::Vgg16,
        Architecture::InceptionV3,
        Architecture::CoAtNetHybrid,
    ];

    /// Stable identifier used for artifact file names and serialization.
    pub fn slug(&self) -> &'static str {
        match self {
            Architecture::ResNet50 => "resnet50",
            Architecture::DenseNet121 => "densenet121",
            Architecture::EfficientNetB0 => "efficientnet_b0",
            Architecture::Vgg16 => "vgg16",
            Architecture::InceptionV3 => "inception_v3",
            Architecture::CoAtNetHybrid => "coatnet_hybrid",
        }
    }

    /// Square input resolution the architecture was trained at.
    pub fn input_resolution(&self) -> usize {
        match self {
            Architecture::InceptionV3 => 299,
            _ => 224,
        }
    }

    /// Intensity statistics `(mean, std)` the input plane is normalized
    /// with. Inception-style models expect inputs centered on 0.5; the
    /// rest were calibrated against grayscale ImageNet statistics.
    pub fn normalization(&self) -> (f32, f32) {
        match self {
            Architecture::InceptionV3 => (0.5, 0.5),
            _ => (0.449, 0.226),
        }
    }

    /// Whether the architecture has both a convolutional and an attention
    /// pathway, yielding two complementary attribution maps.
    pub fn supports_dual_branch(&self) -> bool {
        matches!(self, Architecture::CoAtNetHybrid)
    }

    /// Rough device footprint used when the backing artifact cannot be
    /// inspected (e.g. listing a spec whose file is missing). Loads always
    /// recompute the footprint from the actual artifact.
    pub fn nominal_footprint(&self) -> usize {
        const MB: usize = 1024 * 1024;
        match self {
            Architecture::ResNet50 => 98 * MB,
            Architecture::DenseNet121 => 31 * MB,
            Architecture::EfficientNetB0 => 20 * MB,
            Architecture::Vgg16 => 528 * MB,
            Architecture::InceptionV3 => 92 * MB,
            Architecture::CoAtNetHybrid => 110 * MB,
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Architecture::ResNet50 => "ResNet50",
            Architecture::DenseNet121 => "DenseNet121",
            Architecture::EfficientNetB0 => "EfficientNetB0",
            Architecture::Vgg16 => "VGG16",
            Architecture::InceptionV3 => "InceptionV3",
            Architecture::CoAtNetHybrid => "CoAtNetHybrid",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for Architecture {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase();
        Architecture::ALL
            .iter()
            .find(|a| a.slug() == normalized || a.to_string().to_lowercase() == normalized)
            .copied()
            .ok_or_else(|| {
                format!(
                    "unknown architecture '{}', expected one of: {}",
                    s,
                    Architecture::ALL
                        .iter()
                        .map(|a| a.slug())
                        .collect::<Vec<_>>()
                        .join(", ")
                )
            })
    }
}

/// Immutable metadata for one registered model.
#[derive(Debug, Clone, Serialize)]
pub struct ModelSpec {
    /// Which architecture this spec describes
    pub architecture: Architecture,
    /// Location of the weight artifact in the store
    pub weight_path: PathBuf,
    /// Square input resolution
    pub input_resolution: usize,
    /// Approximate peak device memory footprint in bytes
    /// (weights + largest activation plane)
    pub memory_footprint: usize,
    /// Whether dual-branch attribution is available
    pub supports_dual_branch: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_order_is_stable() {
        let slugs: Vec<&str> = Architecture::ALL.iter().map(|a| a.slug()).collect();
        assert_eq!(
            slugs,
            vec![
                "resnet50",
                "densenet121",
                "efficientnet_b0",
                "vgg16",
                "inception_v3",
                "coatnet_hybrid"
            ]
        );
    }

    #[test]
    fn only_the_hybrid_is_dual_branch() {
        let dual: Vec<_> = Architecture::ALL
            .iter()
            .filter(|a| a.supports_dual_branch())
            .collect();
        assert_eq!(dual, vec![&Architecture::CoAtNetHybrid]);
    }

    #[test]
    fn parses_slugs_and_display_names() {
        assert_eq!(
            "inception_v3".parse::<Architecture>().unwrap(),
            Architecture::InceptionV3
        );
        assert_eq!(
            "VGG16".parse::<Architecture>().unwrap(),
            Architecture::Vgg16
        );
        assert!("alexnet".parse::<Architecture>().is_err());
    }
}
