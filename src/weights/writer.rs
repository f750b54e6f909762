use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use byteorder::{LittleEndian, WriteBytesExt};
use ndarray::ArrayD;

use super::reader::{ARTIFACT_MAGIC, ARTIFACT_VERSION};
use super::types::WeightError;

/// Serializes a tensor set into an XWA artifact.
///
/// Used by the packaging tooling that converts exported checkpoints into
/// the store format, and by the test suite to build fixture models.
/// Tensors are written in the given order; payload offsets are assigned
/// sequentially.
pub fn write_artifact(
    path: &Path,
    architecture: &str,
    labels: &[String],
    tensors: &[(String, ArrayD<f32>)],
) -> Result<(), WeightError> {
    if tensors.is_empty() {
        return Err(WeightError::InvalidFormat(
            "artifact must contain at least one tensor".to_string(),
        ));
    }
    if labels.is_empty() {
        return Err(WeightError::InvalidFormat(
            "artifact must carry at least one class label".to_string(),
        ));
    }

    let file = File::create(path)?;
    let mut out = BufWriter::new(file);

    out.write_all(ARTIFACT_MAGIC)?;
    out.write_u32::<LittleEndian>(ARTIFACT_VERSION)?;
    write_string(&mut out, architecture)?;

    out.write_u32::<LittleEndian>(labels.len() as u32)?;
    for label in labels {
        write_string(&mut out, label)?;
    }

    out.write_u32::<LittleEndian>(tensors.len() as u32)?;
    let mut offset = 0u64;
    for (name, tensor) in tensors {
        write_string(&mut out, name)?;
        out.write_u32::<LittleEndian>(tensor.ndim() as u32)?;
        for &dim in tensor.shape() {
            out.write_u64::<LittleEndian>(dim as u64)?;
        }
        out.write_u64::<LittleEndian>(offset)?;
        offset += (tensor.len() * std::mem::size_of::<f32>()) as u64;
    }

    for (_, tensor) in tensors {
        // Iterate in standard (row-major) order regardless of the array's
        // internal layout, matching how the reader reconstructs shapes.
        for &value in tensor.iter() {
            out.write_f32::<LittleEndian>(value)?;
        }
    }

    out.flush()?;
    Ok(())
}

fn write_string<W: Write>(out: &mut W, s: &str) -> Result<(), WeightError> {
    out.write_u32::<LittleEndian>(s.len() as u32)?;
    out.write_all(s.as_bytes())?;
    Ok(())
}
