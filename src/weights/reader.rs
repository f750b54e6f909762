use std::fs::File;
use std::io::{Cursor, Read};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt};
use memmap2::Mmap;
use ndarray::ArrayD;

use super::types::{TensorInfo, WeightError};

/// Magic bytes identifying an XWA weight artifact.
pub const ARTIFACT_MAGIC: &[u8; 4] = b"XWA1";

/// Container format version this reader understands.
pub const ARTIFACT_VERSION: u32 = 1;

/// Upper bound on strings and table sizes inside a header, to reject
/// corrupt files before attempting large allocations.
const MAX_HEADER_ITEMS: u32 = 4096;

/// Upper bound on a single tensor's element count. Far above any real
/// layer in the store, far below anything that could overflow byte
/// arithmetic.
const MAX_TENSOR_ELEMENTS: u64 = 1 << 31;

/// Reads an XWA weight artifact.
///
/// The file is memory-mapped; the header (architecture slug, class labels,
/// tensor table) is parsed eagerly, tensor payloads are materialized on
/// demand as f32 arrays.
pub struct ArtifactReader {
    /// Memory-mapped artifact contents
    data: Mmap,
    /// Architecture slug recorded by the packaging step
    pub architecture: String,
    /// Ordered class labels the classifier head was trained against
    pub labels: Vec<String>,
    /// Tensor table in file order
    pub tensors: Vec<TensorInfo>,
    /// Byte offset of the payload section within the file
    payload_start: usize,
}

impl ArtifactReader {
    /// Opens and parses an artifact header.
    ///
    /// # Errors
    ///
    /// Returns `WeightError::Io` if the file cannot be opened or mapped,
    /// and `WeightError::InvalidFormat` for a bad magic, unsupported
    /// version, or a truncated/corrupt header.
    pub fn open(path: &Path) -> Result<Self, WeightError> {
        let file = File::open(path)?;
        let data = unsafe { Mmap::map(&file)? };

        let mut cursor = Cursor::new(&data[..]);

        let mut magic = [0u8; 4];
        cursor.read_exact(&mut magic).map_err(|_| {
            WeightError::InvalidFormat("file too short for magic".to_string())
        })?;
        if &magic != ARTIFACT_MAGIC {
            return Err(WeightError::InvalidFormat(format!(
                "bad magic {:?}, expected {:?}",
                magic, ARTIFACT_MAGIC
            )));
        }

        let version = cursor.read_u32::<LittleEndian>().map_err(truncated)?;
        if version != ARTIFACT_VERSION {
            return Err(WeightError::InvalidFormat(format!(
                "unsupported artifact version {}",
                version
            )));
        }

        let architecture = read_string(&mut cursor)?;

        let label_count = cursor.read_u32::<LittleEndian>().map_err(truncated)?;
        if label_count == 0 || label_count > MAX_HEADER_ITEMS {
            return Err(WeightError::InvalidFormat(format!(
                "implausible label count {}",
                label_count
            )));
        }
        let mut labels = Vec::with_capacity(label_count as usize);
        for _ in 0..label_count {
            labels.push(read_string(&mut cursor)?);
        }

        let tensor_count = cursor.read_u32::<LittleEndian>().map_err(truncated)?;
        if tensor_count == 0 || tensor_count > MAX_HEADER_ITEMS {
            return Err(WeightError::InvalidFormat(format!(
                "implausible tensor count {}",
                tensor_count
            )));
        }
        let mut tensors = Vec::with_capacity(tensor_count as usize);
        for _ in 0..tensor_count {
            let name = read_string(&mut cursor)?;
            let n_dims = cursor.read_u32::<LittleEndian>().map_err(truncated)?;
            if n_dims == 0 || n_dims > 8 {
                return Err(WeightError::InvalidFormat(format!(
                    "tensor '{}' has implausible rank {}",
                    name, n_dims
                )));
            }
            let mut dims = Vec::with_capacity(n_dims as usize);
            for _ in 0..n_dims {
                dims.push(cursor.read_u64::<LittleEndian>().map_err(truncated)?);
            }
            dims.iter()
                .try_fold(1u64, |acc, &d| acc.checked_mul(d))
                .filter(|&n| n > 0 && n <= MAX_TENSOR_ELEMENTS)
                .ok_or_else(|| {
                    WeightError::InvalidFormat(format!(
                        "tensor '{}' has implausible element count for dims {:?}",
                        name, dims
                    ))
                })?;
            let offset = cursor.read_u64::<LittleEndian>().map_err(truncated)?;
            tensors.push(TensorInfo { name, dims, offset });
        }

        let payload_start = cursor.position() as usize;

        let reader = Self {
            data,
            architecture,
            labels,
            tensors,
            payload_start,
        };
        reader.validate_bounds()?;
        Ok(reader)
    }

    /// Checks that every tensor's payload lies within the mapped file.
    /// Offsets come straight from the file, so the arithmetic is checked.
    fn validate_bounds(&self) -> Result<(), WeightError> {
        for tensor in &self.tensors {
            let end = (self.payload_start as u64)
                .checked_add(tensor.offset)
                .and_then(|v| v.checked_add(tensor.num_bytes() as u64));
            match end {
                Some(end) if end <= self.data.len() as u64 => {}
                _ => {
                    return Err(WeightError::InvalidFormat(format!(
                        "tensor '{}' extends beyond file bounds (file has {} bytes)",
                        tensor.name,
                        self.data.len()
                    )));
                }
            }
        }
        Ok(())
    }

    /// Total payload size in bytes; the dominant term of a model's
    /// device-memory footprint.
    pub fn payload_bytes(&self) -> usize {
        self.tensors.iter().map(TensorInfo::num_bytes).sum()
    }

    /// Looks up a tensor entry by name.
    pub fn tensor_info(&self, name: &str) -> Option<&TensorInfo> {
        self.tensors.iter().find(|t| t.name == name)
    }

    /// Returns true when the artifact contains a tensor with the given name.
    pub fn has_tensor(&self, name: &str) -> bool {
        self.tensor_info(name).is_some()
    }

    /// Materializes a named tensor as an f32 array with the recorded shape.
    ///
    /// # Errors
    ///
    /// `WeightError::TensorNotFound` if the name is absent from the table.
    pub fn tensor_f32(&self, name: &str) -> Result<ArrayD<f32>, WeightError> {
        let info = self
            .tensor_info(name)
            .ok_or_else(|| WeightError::TensorNotFound(name.to_string()))?;

        let start = self.payload_start + info.offset as usize;
        let bytes = &self.data[start..start + info.num_bytes()];

        let mut values = Vec::with_capacity(info.num_elements());
        for chunk in bytes.chunks_exact(4) {
            values.push(f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
        }

        let shape: Vec<usize> = info.dims.iter().map(|&d| d as usize).collect();
        ArrayD::from_shape_vec(shape, values).map_err(|e| {
            WeightError::InvalidFormat(format!("tensor '{}' shape mismatch: {}", name, e))
        })
    }
}

/// Quick probe: does the file start with the XWA magic?
///
/// Used when scanning a store directory so that stray files are skipped
/// without a full header parse.
pub fn is_artifact_file(path: &Path) -> bool {
    let mut magic = [0u8; 4];
    match File::open(path) {
        Ok(mut file) => file.read_exact(&mut magic).is_ok() && &magic == ARTIFACT_MAGIC,
        Err(_) => false,
    }
}

fn read_string(cursor: &mut Cursor<&[u8]>) -> Result<String, WeightError> {
    let len = cursor.read_u32::<LittleEndian>().map_err(truncated)?;
    if len > 4096 {
        return Err(WeightError::InvalidFormat(format!(
            "implausible string length {}",
            len
        )));
    }
    let mut buf = vec![0u8; len as usize];
    cursor.read_exact(&mut buf).map_err(truncated)?;
    String::from_utf8(buf)
        .map_err(|_| WeightError::InvalidFormat("string is not valid UTF-8".to_string()))
}

fn truncated(_: std::io::Error) -> WeightError {
    WeightError::InvalidFormat("truncated header".to_string())
}
