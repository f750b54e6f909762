//! End-to-end tests for the diagnosis engine: ensemble scheduling under a
//! memory budget, aggregation, failure tolerance, and explainability.
//!
//! Fixture models are tiny but real: each artifact carries a one-block
//! convolutional backbone and a classifier head whose bias is tilted
//! toward a chosen class, so each model's vote is controllable while the
//! full load -> preprocess -> forward -> aggregate path still executes.

use std::path::PathBuf;
use std::sync::Arc;

use ndarray::ArrayD;
use once_cell::sync::Lazy;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use xrai::weights::write_artifact;
use xrai::{Architecture, Device, DiagnosisEngine, EngineError, Settings};

const COVID: usize = 0;
const NORMAL: usize = 2;

fn labels() -> Vec<String> {
    ["COVID", "Lung_Opacity", "Normal", "Viral_Pneumonia"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// A 160x120 gradient radiograph stand-in, encoded once.
static TEST_IMAGE: Lazy<Vec<u8>> = Lazy::new(|| {
    let img = image::GrayImage::from_fn(160, 120, |x, y| {
        image::Luma([(60 + (x / 2 + y / 3) % 120) as u8])
    });
    let mut bytes = Vec::new();
    img.write_to(
        &mut std::io::Cursor::new(&mut bytes),
        image::ImageFormat::Png,
    )
    .unwrap();
    bytes
});

fn fresh_store() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("xrai-it-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// Writes a fixture artifact whose classifier bias tilts hard toward
/// `favored` so the model votes for it on any input.
fn write_model(store: &PathBuf, architecture: Architecture, favored: usize, seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    let channels = 4usize;

    let conv_weight = ArrayD::from_shape_fn(vec![channels, 1, 3, 3], |_| {
        rng.random_range(-0.1..0.1f32)
    });
    let conv_bias = ArrayD::from_shape_fn(vec![channels], |_| rng.random_range(-0.05..0.05f32));
    let classifier_weight =
        ArrayD::from_shape_fn(vec![4, channels], |_| rng.random_range(-0.05..0.05f32));
    let mut classifier_bias = ArrayD::from_elem(vec![4], 0.0f32);
    classifier_bias[favored] = 4.0;

    let mut tensors = vec![
        ("conv0.weight".to_string(), conv_weight),
        ("conv0.bias".to_string(), conv_bias),
        ("classifier.weight".to_string(), classifier_weight),
        ("classifier.bias".to_string(), classifier_bias),
    ];
    if architecture.supports_dual_branch() {
        tensors.push((
            "attn.query".to_string(),
            ArrayD::from_shape_fn(vec![channels], |_| rng.random_range(-0.5..0.5f32)),
        ));
    }

    let path = store.join(format!("{}.xwa", architecture.slug()));
    write_artifact(&path, architecture.slug(), &labels(), &tensors).unwrap();
}

/// Populates a store with all six models, each voting for the class at
/// its position in `favors`.
fn build_store(favors: [usize; 6]) -> PathBuf {
    let store = fresh_store();
    for (i, (&architecture, &favored)) in Architecture::ALL.iter().zip(favors.iter()).enumerate() {
        write_model(&store, architecture, favored, 42 + i as u64);
    }
    store
}

fn engine_for(store: &PathBuf) -> (DiagnosisEngine, Arc<Device>) {
    let mut settings = Settings::default();
    settings.models.directory = store.clone();
    let device = Device::new(settings.memory_budget_bytes());
    let engine = DiagnosisEngine::with_device(settings, Arc::clone(&device));
    (engine, device)
}

#[test]
fn unanimous_ensemble_agrees_completely() {
    let store = build_store([NORMAL; 6]);
    let (engine, device) = engine_for(&store);

    let report = engine.run(&TEST_IMAGE).unwrap();
    assert_eq!(report.label, "Normal");
    assert_eq!(report.verdicts.len(), 6);
    assert!(report.failures.is_empty());
    assert!((report.agreement_ratio - 1.0).abs() < 1e-6);
    assert!(report.confidence > 0.5);
    assert_eq!(device.in_use(), 0);
}

#[test]
fn split_vote_resolves_by_plurality() {
    // Four models vote COVID, two vote Normal.
    let store = build_store([COVID, COVID, COVID, COVID, NORMAL, NORMAL]);
    let (engine, _) = engine_for(&store);

    let report = engine.run(&TEST_IMAGE).unwrap();
    assert_eq!(report.label, "COVID");
    assert!((report.agreement_ratio - 4.0 / 6.0).abs() < 1e-6);
}

#[test]
fn verdicts_follow_registry_order() {
    let store = build_store([NORMAL; 6]);
    let (engine, _) = engine_for(&store);

    let report = engine.run(&TEST_IMAGE).unwrap();
    let order: Vec<Architecture> = report.verdicts.iter().map(|v| v.architecture).collect();
    assert_eq!(order, Architecture::ALL.to_vec());
}

#[test]
fn probability_vectors_sum_to_one() {
    let store = build_store([COVID, NORMAL, COVID, NORMAL, COVID, NORMAL]);
    let (engine, _) = engine_for(&store);

    let report = engine.run(&TEST_IMAGE).unwrap();
    for verdict in &report.verdicts {
        let sum: f32 = verdict.probabilities.iter().sum();
        assert!(
            (sum - 1.0).abs() < 1e-4,
            "{} probabilities sum to {}",
            verdict.architecture,
            sum
        );
    }
}

#[test]
fn repeated_runs_are_deterministic() {
    let store = build_store([NORMAL; 6]);
    let (engine, _) = engine_for(&store);

    let first = engine.run(&TEST_IMAGE).unwrap();
    let second = engine.run(&TEST_IMAGE).unwrap();
    assert_eq!(first.label, second.label);
    for (a, b) in first.verdicts.iter().zip(second.verdicts.iter()) {
        assert_eq!(a.label, b.label);
        assert_eq!(a.probabilities, b.probabilities);
    }
}

#[test]
fn missing_artifact_drops_one_model_but_run_succeeds() {
    let store = build_store([NORMAL; 6]);
    // Delete a middle architecture's artifact.
    std::fs::remove_file(store.join("vgg16.xwa")).unwrap();
    let (engine, device) = engine_for(&store);

    let report = engine.run(&TEST_IMAGE).unwrap();
    assert_eq!(report.verdicts.len(), 5);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].architecture, Architecture::Vgg16);
    assert!(!report
        .verdicts
        .iter()
        .any(|v| v.architecture == Architecture::Vgg16));
    // Order of the survivors is still registry order.
    let order: Vec<Architecture> = report.verdicts.iter().map(|v| v.architecture).collect();
    assert_eq!(
        order,
        vec![
            Architecture::ResNet50,
            Architecture::DenseNet121,
            Architecture::EfficientNetB0,
            Architecture::InceptionV3,
            Architecture::CoAtNetHybrid,
        ]
    );
    assert_eq!(device.in_use(), 0);
}

#[test]
fn empty_store_exhausts_the_ensemble() {
    let store = fresh_store();
    let (engine, device) = engine_for(&store);

    match engine.run(&TEST_IMAGE) {
        Err(EngineError::EnsembleExhausted { failures }) => {
            assert_eq!(failures.len(), 6);
        }
        other => panic!("expected EnsembleExhausted, got {:?}", other.map(|r| r.label)),
    }
    assert_eq!(device.in_use(), 0);
}

#[test]
fn starved_device_exhausts_the_ensemble_cleanly() {
    let store = build_store([NORMAL; 6]);
    let mut settings = Settings::default();
    settings.models.directory = store;
    // Too small for even one model's activations.
    let device = Device::new(1024);
    let engine = DiagnosisEngine::with_device(settings, Arc::clone(&device));

    match engine.run(&TEST_IMAGE) {
        Err(EngineError::EnsembleExhausted { failures }) => {
            assert_eq!(failures.len(), 6);
            assert!(failures
                .iter()
                .all(|(_, reason)| reason.contains("Insufficient device memory")));
        }
        other => panic!("expected EnsembleExhausted, got {:?}", other.map(|r| r.label)),
    }
    assert_eq!(device.in_use(), 0);
}

#[test]
fn undecodable_bytes_are_rejected_up_front() {
    let store = build_store([NORMAL; 6]);
    let (engine, device) = engine_for(&store);

    match engine.run(b"definitely not an image") {
        Err(EngineError::InvalidImage(_)) => {}
        other => panic!("expected InvalidImage, got {:?}", other.map(|r| r.label)),
    }
    assert_eq!(device.in_use(), 0);
}

#[test]
fn all_black_image_still_produces_a_report() {
    let store = build_store([NORMAL; 6]);
    let (engine, _) = engine_for(&store);

    let img = image::GrayImage::from_pixel(96, 96, image::Luma([0]));
    let mut bytes = Vec::new();
    img.write_to(
        &mut std::io::Cursor::new(&mut bytes),
        image::ImageFormat::Png,
    )
    .unwrap();

    let report = engine.run(&bytes).unwrap();
    assert_eq!(report.verdicts.len(), 6);
    assert!(report
        .verdicts
        .iter()
        .all(|v| v.probabilities.iter().all(|p| p.is_finite())));
}

#[test]
fn explain_non_dual_architecture_yields_exactly_one_map() {
    let store = build_store([NORMAL; 6]);
    let (engine, device) = engine_for(&store);

    let artifact = engine.explain(&TEST_IMAGE, Architecture::ResNet50).unwrap();
    assert_eq!(artifact.architecture, Architecture::ResNet50);
    assert!(artifact.attention.is_none());
    assert!(artifact.fused.is_none());
    assert!(artifact.blend_weight.is_none());
    // Map is in source geometry, not model geometry.
    assert_eq!(artifact.class_activation.width, 160);
    assert_eq!(artifact.class_activation.height, 120);
    assert!(artifact
        .class_activation
        .values
        .iter()
        .all(|&v| (0.0..=1.0).contains(&v)));
    assert_eq!(device.in_use(), 0);
}

#[test]
fn explain_dual_branch_yields_three_maps_and_blend() {
    let store = build_store([NORMAL; 6]);
    let (engine, device) = engine_for(&store);

    let artifact = engine
        .explain(&TEST_IMAGE, Architecture::CoAtNetHybrid)
        .unwrap();
    assert_eq!(artifact.blend_weight, Some(0.5));

    let attention = artifact.attention.expect("attention map");
    let fused = artifact.fused.expect("fused map");
    for map in [&artifact.class_activation, &attention, &fused] {
        assert_eq!(map.width, 160);
        assert_eq!(map.height, 120);
        assert!(map.values.iter().all(|v| v.is_finite()));
    }
    assert_eq!(device.in_use(), 0);
}

#[test]
fn explain_missing_artifact_is_typed() {
    let store = fresh_store();
    let (engine, device) = engine_for(&store);

    match engine.explain(&TEST_IMAGE, Architecture::DenseNet121) {
        Err(EngineError::WeightArtifactMissing { architecture, .. }) => {
            assert_eq!(architecture, Architecture::DenseNet121)
        }
        other => panic!(
            "expected WeightArtifactMissing, got {:?}",
            other.map(|a| a.predicted_label)
        ),
    }
    assert_eq!(device.in_use(), 0);
}

#[test]
fn explain_agrees_with_the_model_verdict() {
    let store = build_store([COVID; 6]);
    let (engine, _) = engine_for(&store);

    let report = engine.run(&TEST_IMAGE).unwrap();
    let artifact = engine
        .explain(&TEST_IMAGE, Architecture::EfficientNetB0)
        .unwrap();
    assert_eq!(artifact.predicted_label, report.label);
}

#[test]
fn reports_serialize_for_downstream_collaborators() {
    let store = build_store([NORMAL; 6]);
    let (engine, _) = engine_for(&store);

    let report = engine.run(&TEST_IMAGE).unwrap();
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["label"], "Normal");
    assert_eq!(json["verdicts"].as_array().unwrap().len(), 6);
    assert!(json["id"].as_str().is_some());
}
