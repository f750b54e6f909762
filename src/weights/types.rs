use std::fmt;

/// Describes one tensor inside a weight artifact.
///
/// Offsets are relative to the start of the artifact's payload section,
/// not to the start of the file.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorInfo {
    /// Tensor name (e.g. "conv0.weight", "classifier.bias")
    pub name: String,
    /// Tensor dimensions, outermost first
    pub dims: Vec<u64>,
    /// Byte offset of the first element within the payload section
    pub offset: u64,
}

impl TensorInfo {
    /// Total number of f32 elements in the tensor.
    ///
    /// Saturates on overflow; the reader rejects implausible element
    /// counts when the header is parsed, so a saturated value only ever
    /// feeds a bounds check that then fails.
    pub fn num_elements(&self) -> usize {
        self.dims.iter().fold(1usize, |acc, &d| {
            acc.saturating_mul(usize::try_from(d).unwrap_or(usize::MAX))
        })
    }

    /// Size of the tensor payload in bytes.
    pub fn num_bytes(&self) -> usize {
        self.num_elements()
            .saturating_mul(std::mem::size_of::<f32>())
    }
}

/// Custom error types for weight artifact operations
#[derive(Debug)]
pub enum WeightError {
    /// Wraps std::io::Error for file operations
    Io(std::io::Error),
    /// Invalid container format with a message
    InvalidFormat(String),
    /// A tensor required by the architecture is absent from the artifact
    TensorNotFound(String),
}

impl fmt::Display for WeightError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WeightError::Io(e) => write!(f, "IO error: {}", e),
            WeightError::InvalidFormat(msg) => write!(f, "Invalid artifact format: {}", msg),
            WeightError::TensorNotFound(name) => write!(f, "Tensor not found: {}", name),
        }
    }
}

impl std::error::Error for WeightError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WeightError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for WeightError {
    fn from(e: std::io::Error) -> Self {
        WeightError::Io(e)
    }
}
