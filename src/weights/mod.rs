//! # Weight artifact container (XWA)
//!
//! Trained models are consumed as opaque weight artifacts from a
//! path-addressable, read-only store. This module defines the on-disk
//! container the engine reads:
//!
//! - magic `XWA1` and a format version,
//! - the architecture slug the artifact was packaged for,
//! - the ordered class-label list the classifier head emits,
//! - a tensor table (name, dims, payload offset),
//! - a little-endian f32 payload section.
//!
//! Artifacts are memory-mapped; tensors are materialized on demand so that
//! loading cost is paid only for the layers an architecture actually uses.

mod reader;
mod types;
mod writer;

pub use reader::{is_artifact_file, ArtifactReader, ARTIFACT_MAGIC, ARTIFACT_VERSION};
pub use types::{TensorInfo, WeightError};
pub use writer::write_artifact;

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::ArrayD;
    use std::path::PathBuf;

    fn temp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("xwa-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir.join(name)
    }

    #[test]
    fn writes_and_reads_back_header_and_tensors() {
        let path = temp_path("model.xwa");
        let weight = ArrayD::from_shape_vec(vec![2, 1, 3, 3], (0..18).map(|v| v as f32).collect())
            .unwrap();
        let bias = ArrayD::from_shape_vec(vec![2], vec![0.5, -0.5]).unwrap();
        let labels = vec!["COVID".to_string(), "Normal".to_string()];

        write_artifact(
            &path,
            "resnet50",
            &labels,
            &[("conv0.weight".to_string(), weight.clone()), ("conv0.bias".to_string(), bias)],
        )
        .unwrap();

        assert!(is_artifact_file(&path));

        let reader = ArtifactReader::open(&path).unwrap();
        assert_eq!(reader.architecture, "resnet50");
        assert_eq!(reader.labels, labels);
        assert_eq!(reader.tensors.len(), 2);
        assert_eq!(reader.payload_bytes(), (18 + 2) * 4);

        let read_back = reader.tensor_f32("conv0.weight").unwrap();
        assert_eq!(read_back.shape(), &[2, 1, 3, 3]);
        assert_eq!(read_back[[1, 0, 2, 2]], 17.0);
    }

    #[test]
    fn rejects_bad_magic() {
        let path = temp_path("junk.bin");
        std::fs::write(&path, b"NOPE and some trailing garbage").unwrap();

        assert!(!is_artifact_file(&path));
        match ArtifactReader::open(&path) {
            Err(WeightError::InvalidFormat(msg)) => assert!(msg.contains("bad magic")),
            other => panic!("expected InvalidFormat, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn rejects_truncated_tensor_payload() {
        let path = temp_path("model.xwa");
        let weight =
            ArrayD::from_shape_vec(vec![4, 4], vec![1.0; 16]).unwrap();
        write_artifact(&path, "vgg16", &["Normal".to_string()], &[("w".to_string(), weight)])
            .unwrap();

        // Chop off half of the payload section.
        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 32]).unwrap();

        match ArtifactReader::open(&path) {
            Err(WeightError::InvalidFormat(msg)) => {
                assert!(msg.contains("beyond file bounds"))
            }
            other => panic!("expected InvalidFormat, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn rejects_implausible_tensor_dims_without_panicking() {
        // Hand-built header: plausible rank, dims whose product overflows
        // u64. Must come back as a typed format error, not an arithmetic
        // panic, so the ensemble can treat the artifact as one bad model.
        let path = temp_path("huge.xwa");
        let mut bytes = Vec::new();
        bytes.extend_from_slice(ARTIFACT_MAGIC);
        bytes.extend_from_slice(&ARTIFACT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&8u32.to_le_bytes());
        bytes.extend_from_slice(b"resnet50");
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&6u32.to_le_bytes());
        bytes.extend_from_slice(b"Normal");
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(b"w");
        bytes.extend_from_slice(&4u32.to_le_bytes());
        for _ in 0..4 {
            bytes.extend_from_slice(&(u64::MAX / 4).to_le_bytes());
        }
        bytes.extend_from_slice(&0u64.to_le_bytes());
        std::fs::write(&path, &bytes).unwrap();

        match ArtifactReader::open(&path) {
            Err(WeightError::InvalidFormat(msg)) => {
                assert!(msg.contains("implausible element count"))
            }
            other => panic!("expected InvalidFormat, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn rejects_oversized_but_representable_tensor_dims() {
        // The product fits in u64 but no real layer is this large; the
        // element cap rejects it before any allocation is attempted.
        let path = temp_path("big.xwa");
        let mut bytes = Vec::new();
        bytes.extend_from_slice(ARTIFACT_MAGIC);
        bytes.extend_from_slice(&ARTIFACT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&5u32.to_le_bytes());
        bytes.extend_from_slice(b"vgg16");
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&6u32.to_le_bytes());
        bytes.extend_from_slice(b"Normal");
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(b"w");
        bytes.extend_from_slice(&2u32.to_le_bytes());
        bytes.extend_from_slice(&(1u64 << 20).to_le_bytes());
        bytes.extend_from_slice(&(1u64 << 20).to_le_bytes());
        bytes.extend_from_slice(&0u64.to_le_bytes());
        std::fs::write(&path, &bytes).unwrap();

        match ArtifactReader::open(&path) {
            Err(WeightError::InvalidFormat(msg)) => {
                assert!(msg.contains("implausible element count"))
            }
            other => panic!("expected InvalidFormat, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn missing_tensor_lookup_is_typed() {
        let path = temp_path("model.xwa");
        let weight = ArrayD::from_shape_vec(vec![1], vec![1.0]).unwrap();
        write_artifact(&path, "vgg16", &["Normal".to_string()], &[("w".to_string(), weight)])
            .unwrap();

        let reader = ArtifactReader::open(&path).unwrap();
        match reader.tensor_f32("absent") {
            Err(WeightError::TensorNotFound(name)) => assert_eq!(name, "absent"),
            other => panic!("expected TensorNotFound, got {:?}", other.map(|_| ())),
        }
    }
}
