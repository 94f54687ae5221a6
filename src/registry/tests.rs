//! Tests for artifact persistence, scanning, and integrity checks.

use super::*;
use crate::config::Config;
use crate::training::models::{DECISION_TREE, RANDOM_FOREST, XGBOOST};
use std::io::Write as _;

fn test_config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.model_dir = dir.join("models").to_string_lossy().into_owned();
    config.dataset_path = dir.join("sales.csv").to_string_lossy().into_owned();
    config
}

fn write_metadata(model_dir: &Path, name: &str, r2: f64) {
    let dir = model_dir.join(name);
    fs::create_dir_all(&dir).unwrap();
    let metadata = ArtifactMetadata {
        name: name.to_string(),
        r2_score: r2,
        mse: 100.0,
        mae: 10.0,
        generated_at: Utc::now(),
    };
    fs::write(
        dir.join(METADATA_FILE),
        serde_json::to_string(&metadata).unwrap(),
    )
    .unwrap();
}

fn write_dataset(path: &Path) {
    let header = "property_type;price;location;city;province_name;latitude;longitude;baths;area;purpose;bedrooms;date_added;area_marla;area_category\n";
    let mut file = fs::File::create(path).unwrap();
    file.write_all(header.as_bytes()).unwrap();
    for i in 0..30 {
        let price = 4_000_000 + i * 120_000;
        let marla = 3 + (i % 5);
        writeln!(
            file,
            "House;{price};Gulshan-e-Iqbal;Karachi;Sindh;24.86;67.00;2;{marla} Marla;For Sale;3;06-15-2019;{marla};5-10 Marla"
        )
        .unwrap();
    }
}

#[test]
fn metadata_round_trips_with_camel_case_fields() {
    let metadata = ArtifactMetadata {
        name: "linear_regression".to_string(),
        r2_score: 0.87,
        mse: 123.0,
        mae: 9.5,
        generated_at: Utc::now(),
    };
    let json = serde_json::to_string(&metadata).unwrap();
    assert!(json.contains("\"r2Score\""));
    assert!(json.contains("\"generatedAt\""));
    let restored: ArtifactMetadata = serde_json::from_str(&json).unwrap();
    assert_eq!(restored.name, metadata.name);
    assert_eq!(restored.r2_score, metadata.r2_score);
}

#[test]
fn scan_picks_the_highest_r2_artifact() {
    let tmp = tempfile::tempdir().unwrap();
    let config = test_config(tmp.path());
    let registry = ModelRegistry::new(&config);
    write_metadata(&registry.model_dir, DECISION_TREE, 0.70);
    write_metadata(&registry.model_dir, RANDOM_FOREST, 0.91);
    write_metadata(&registry.model_dir, XGBOOST, 0.85);

    let best = registry.best_model().unwrap();
    assert_eq!(best.metadata.name, RANDOM_FOREST);
    assert!((best.metadata.r2_score - 0.91).abs() < 1e-12);
}

#[test]
fn table_driven_artifact_reloads_as_stub_that_errors() {
    let tmp = tempfile::tempdir().unwrap();
    let config = test_config(tmp.path());
    let registry = ModelRegistry::new(&config);
    write_metadata(&registry.model_dir, DECISION_TREE, 0.80);

    let best = registry.best_model().unwrap();
    let result = best
        .predictor
        .predict(&vec![0.0; crate::data::FEATURE_COUNT]);
    assert!(result.is_err(), "stub must error so the service falls back");
}

#[test]
fn lfs_pointer_file_is_treated_as_absent() {
    let tmp = tempfile::tempdir().unwrap();
    let pointer = tmp.path().join("model.json");
    fs::write(
        &pointer,
        "version https://git-lfs.github.com/spec/v1\noid sha256:abc\nsize 12345\n",
    )
    .unwrap();
    assert!(!params_usable(&pointer));
}

#[test]
fn tiny_file_is_treated_as_absent() {
    let tmp = tempfile::tempdir().unwrap();
    let stub = tmp.path().join("model.json");
    fs::write(&stub, "{}").unwrap();
    assert!(!params_usable(&stub));
    assert!(!params_usable(&tmp.path().join("missing.json")));
}

#[test]
fn corrupt_metadata_without_params_is_not_usable() {
    let tmp = tempfile::tempdir().unwrap();
    let config = test_config(tmp.path());
    let registry = ModelRegistry::new(&config);
    let dir = registry.model_dir.join(DECISION_TREE);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join(METADATA_FILE), "not json at all").unwrap();

    assert!(!registry.artifact_usable(DECISION_TREE));
    assert!(registry.best_model().is_err());
}

#[test]
fn missing_models_reports_the_full_roster_on_empty_dir() {
    let tmp = tempfile::tempdir().unwrap();
    let config = test_config(tmp.path());
    let registry = ModelRegistry::new(&config);
    assert_eq!(registry.missing_models().len(), 6);

    write_metadata(&registry.model_dir, DECISION_TREE, 0.5);
    let missing = registry.missing_models();
    assert_eq!(missing.len(), 5);
    assert!(!missing.contains(&DECISION_TREE));
}

#[test]
fn train_persists_every_roster_member_and_selects_a_best() {
    let tmp = tempfile::tempdir().unwrap();
    let config = test_config(tmp.path());
    write_dataset(Path::new(&config.dataset_path));
    let registry = ModelRegistry::new(&config);

    let summaries = registry.train(false).unwrap();
    assert_eq!(summaries.len(), 6);
    assert!(summaries.iter().all(|s| s.trained));
    assert!(registry.has_model());
    assert!(registry.missing_models().is_empty());

    // preprocessor state persisted alongside
    assert!(registry.model_dir.join(PREPROCESSOR_FILE).exists());
    // parameterized families carry params, table families metadata only
    assert!(registry
        .model_dir
        .join(LINEAR_REGRESSION)
        .join(PARAMS_FILE)
        .exists());
    assert!(!registry
        .model_dir
        .join(DECISION_TREE)
        .join(PARAMS_FILE)
        .exists());
}

#[test]
fn training_without_dataset_is_a_dataset_missing_error() {
    let tmp = tempfile::tempdir().unwrap();
    let config = test_config(tmp.path());
    let registry = ModelRegistry::new(&config);
    let err = registry.train(false).unwrap_err();
    assert!(matches!(err, Error::DatasetMissing { .. }));
    // the guard must have been released
    assert!(!registry.is_training());
}

#[test]
fn concurrent_training_is_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let config = test_config(tmp.path());
    let registry = ModelRegistry::new(&config);
    registry.training_active.store(true, Ordering::SeqCst);
    let err = registry.train(false).unwrap_err();
    assert!(matches!(err, Error::TrainingInProgress));
}

#[test]
fn preprocessor_state_self_heals_from_the_dataset() {
    let tmp = tempfile::tempdir().unwrap();
    let config = test_config(tmp.path());
    write_dataset(Path::new(&config.dataset_path));
    let registry = ModelRegistry::new(&config);

    // No preprocessor.json on disk: must rebuild by replaying the processor.
    let state = registry.ensure_preprocessor().unwrap();
    assert!(!state.encodings.city.is_empty());
    assert_eq!(state.scaling.mean.len(), crate::data::FEATURE_COUNT);
    // and persist the rebuilt copy for the next process
    assert!(registry.model_dir.join(PREPROCESSOR_FILE).exists());
}

#[test]
fn missing_only_training_keeps_a_better_existing_artifact_as_best() {
    let tmp = tempfile::tempdir().unwrap();
    let config = test_config(tmp.path());
    write_dataset(Path::new(&config.dataset_path));
    let registry = ModelRegistry::new(&config);

    // Pretend a previous run left a near-perfect linear model's metadata
    // plus usable params behind.
    let summaries = registry.train(false).unwrap();
    assert_eq!(summaries.len(), 6);
    write_metadata(&registry.model_dir, LINEAR_REGRESSION, 0.999_9);

    // Nothing is missing, so a missing-only run trains nothing new.
    let summaries = registry.train(true).unwrap();
    assert!(summaries.is_empty());
    let best = registry.best_model().unwrap();
    assert_eq!(best.metadata.name, LINEAR_REGRESSION);
}
