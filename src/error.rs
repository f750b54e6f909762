//! Error types for the diagnosis engine

use std::fmt;
use std::path::PathBuf;

use crate::model::Architecture;
use crate::weights::WeightError;

/// Errors that can surface from `run` or `explain`
#[derive(Debug)]
pub enum EngineError {
    /// The submitted bytes could not be decoded into a usable image,
    /// or the decoded image has degenerate (zero) dimensions
    InvalidImage(String),
    /// The weight artifact backing an architecture is absent from the store
    WeightArtifactMissing {
        architecture: Architecture,
        path: PathBuf,
    },
    /// The weight artifact exists but does not match the architecture spec
    /// (bad container, slug mismatch, tensor shape chain broken, ...)
    IncompatibleArchitecture {
        architecture: Architecture,
        reason: String,
    },
    /// The device accountant refused a memory lease
    InsufficientDeviceMemory {
        requested: usize,
        available: usize,
    },
    /// Every model in the ensemble failed; the per-model reasons are retained
    EnsembleExhausted {
        failures: Vec<(Architecture, String)>,
    },
    /// Attribution was requested against a model handle that has no
    /// retained forward trace (e.g. inference ran in discard mode)
    GradientUnavailable(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::InvalidImage(msg) => write!(f, "Invalid image: {}", msg),
            EngineError::WeightArtifactMissing { architecture, path } => {
                write!(
                    f,
                    "Weight artifact for {} missing at {}",
                    architecture,
                    path.display()
                )
            }
            EngineError::IncompatibleArchitecture {
                architecture,
                reason,
            } => {
                write!(f, "Incompatible artifact for {}: {}", architecture, reason)
            }
            EngineError::InsufficientDeviceMemory {
                requested,
                available,
            } => {
                write!(
                    f,
                    "Insufficient device memory: requested {} bytes, {} available",
                    requested, available
                )
            }
            EngineError::EnsembleExhausted { failures } => {
                write!(f, "All {} ensemble models failed:", failures.len())?;
                for (arch, reason) in failures {
                    write!(f, " [{}: {}]", arch, reason)?;
                }
                Ok(())
            }
            EngineError::GradientUnavailable(msg) => {
                write!(f, "Gradient unavailable: {}", msg)
            }
        }
    }
}

impl std::error::Error for EngineError {}

impl EngineError {
    /// Maps a weight-container error onto the engine taxonomy for one
    /// architecture: a missing file is a deployment fault for that model,
    /// everything else means the artifact does not fit the spec.
    pub fn from_weight_error(architecture: Architecture, path: &std::path::Path, err: WeightError) -> Self {
        match err {
            WeightError::Io(ref io) if io.kind() == std::io::ErrorKind::NotFound => {
                EngineError::WeightArtifactMissing {
                    architecture,
                    path: path.to_path_buf(),
                }
            }
            other => EngineError::IncompatibleArchitecture {
                architecture,
                reason: other.to_string(),
            },
        }
    }
}
