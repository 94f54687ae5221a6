//! Tests for the valuation service: request validation, the confidence
//! band, growth projections, and the fallback guarantee.

use super::*;
use crate::config::Config;
use crate::data::{EncodingMaps, ScalingParams, FEATURE_COUNT};
use crate::error::Error;
use crate::registry::{ArtifactMetadata, LoadedModel, ModelRegistry, PreprocessorState};
use crate::training::models::{Predictor, UntrainedStub};
use chrono::Utc;

/// Always returns the same price, standing in for any trained family.
struct FixedPrice(f64);

impl Predictor for FixedPrice {
    fn name(&self) -> &'static str {
        "linear_regression"
    }

    fn predict(&self, _features: &[f64]) -> crate::error::Result<f64> {
        Ok(self.0)
    }
}

fn sample_state() -> PreprocessorState {
    let mut encodings = EncodingMaps::default();
    encodings.property_type.insert("House".to_string(), 1);
    encodings.location.insert("Gulshan-e-Iqbal".to_string(), 1);
    encodings.city.insert("Karachi".to_string(), 1);
    encodings.province.insert("Sindh".to_string(), 1);
    encodings.purpose.insert("For Sale".to_string(), 1);
    encodings.area_category.insert("5-10 Marla".to_string(), 1);
    encodings
        .location_premium
        .insert("Gulshan-e-Iqbal".to_string(), 900_000.0);
    PreprocessorState {
        encodings,
        scaling: ScalingParams {
            mean: vec![0.0; FEATURE_COUNT],
            std: vec![1.0; FEATURE_COUNT],
        },
    }
}

fn service_with(
    predictor: Box<dyn Predictor>,
    r2: f64,
) -> (PredictionService, tempfile::TempDir) {
    service_with_growth(predictor, r2, HistoricalGrowthStore::empty())
}

fn service_with_growth(
    predictor: Box<dyn Predictor>,
    r2: f64,
    growth: HistoricalGrowthStore,
) -> (PredictionService, tempfile::TempDir) {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.model_dir = tmp.path().join("models").to_string_lossy().into_owned();
    config.dataset_path = tmp.path().join("sales.csv").to_string_lossy().into_owned();
    let registry = ModelRegistry::new(&config);
    registry.install_model(LoadedModel {
        metadata: ArtifactMetadata {
            name: predictor.name().to_string(),
            r2_score: r2,
            mse: 100.0,
            mae: 10.0,
            generated_at: Utc::now(),
        },
        predictor,
    });
    registry.install_preprocessor(sample_state());
    let service = PredictionService::new(
        std::sync::Arc::new(registry),
        std::sync::Arc::new(growth),
    );
    (service, tmp)
}

fn sample_request() -> ValuationRequest {
    ValuationRequest {
        city: "Karachi".to_string(),
        location: "Gulshan-e-Iqbal".to_string(),
        neighbourhood: None,
        property_type: "House".to_string(),
        year_built: 2015,
        area_marla: 7.0,
        bedrooms: 3.0,
        bathrooms: 2.0,
        province: Some("Sindh".to_string()),
    }
}

#[test]
fn invalid_requests_are_rejected_before_the_model_runs() {
    let (service, _tmp) = service_with(Box::new(FixedPrice(10_000_000.0)), 0.85);

    let mut request = sample_request();
    request.city = " ".to_string();
    assert!(matches!(
        service.predict_price(&request),
        Err(Error::InvalidRequest(_))
    ));

    let mut request = sample_request();
    request.area_marla = 0.0;
    assert!(matches!(
        service.predict_price(&request),
        Err(Error::InvalidRequest(_))
    ));

    let mut request = sample_request();
    request.year_built = 1700;
    assert!(matches!(
        service.predict_price(&request),
        Err(Error::InvalidRequest(_))
    ));
}

#[test]
fn missing_model_is_surfaced_not_masked() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.model_dir = tmp.path().join("models").to_string_lossy().into_owned();
    config.dataset_path = tmp.path().join("sales.csv").to_string_lossy().into_owned();
    let service = PredictionService::new(
        std::sync::Arc::new(ModelRegistry::new(&config)),
        std::sync::Arc::new(HistoricalGrowthStore::empty()),
    );
    let err = service.predict_price(&sample_request()).unwrap_err();
    assert!(err.is_model_unavailable());
}

#[test]
fn confidence_band_and_projections_follow_the_contract() {
    let price = 10_000_000.0;
    let (service, _tmp) = service_with(Box::new(FixedPrice(price)), 0.85);

    let response = service.predict_price(&sample_request()).unwrap();
    assert_eq!(response.model_used, "trained");
    assert!((response.predicted_price - price).abs() < 1e-6);
    assert!((response.confidence - 85.0).abs() < 1e-9);

    // spread = (1 - 0.85) * 0.3 = 0.045 on each side
    assert!((response.price_range.min - price * 0.955).abs() < 1.0);
    assert!((response.price_range.max - price * 1.045).abs() < 1.0);

    // Karachi grows 8% per year, compounded
    assert!((response.predictions.current_year - price).abs() < 1e-6);
    assert!((response.predictions.one_year - price * 1.08).abs() < 1.0);
    assert!((response.predictions.two_year - price * 1.08_f64.powi(2)).abs() < 1.0);
    assert!((response.predictions.three_year - price * 1.08_f64.powi(3)).abs() < 1.0);
    assert_eq!(response.market_trend, "Growing");
    assert_eq!(response.comparable_properties.len(), 3);
}

#[test]
fn confidence_is_floored_and_capped() {
    let (service, _tmp) = service_with(Box::new(FixedPrice(8_000_000.0)), 0.2);
    let response = service.predict_price(&sample_request()).unwrap();
    assert!((response.confidence - 60.0).abs() < 1e-9);

    let (service, _tmp) = service_with(Box::new(FixedPrice(8_000_000.0)), 0.99);
    let response = service.predict_price(&sample_request()).unwrap();
    assert!((response.confidence - 95.0).abs() < 1e-9);
}

#[test]
fn failing_model_degrades_to_the_rule_based_estimate() {
    let (service, _tmp) = service_with(
        Box::new(UntrainedStub {
            model_name: "decision_tree",
        }),
        0.75,
    );

    let response = service.predict_price(&sample_request()).unwrap();
    assert_eq!(response.model_used, "fallback");
    assert!(response.predicted_price >= 1_000_000.0);
    assert!(response.price_range.min <= response.predicted_price);
    assert!(response.predicted_price <= response.price_range.max);
    assert!((response.confidence - 75.0).abs() < 1e-9);
    assert_eq!(response.comparable_properties.len(), 3);
}

#[test]
fn unseen_categorical_values_never_fail_a_prediction() {
    let (service, _tmp) = service_with(Box::new(FixedPrice(5_000_000.0)), 0.8);
    let mut request = sample_request();
    request.city = "Multan".to_string();
    request.location = "Some New Colony".to_string();
    request.property_type = "Penthouse".to_string();

    let response = service.predict_price(&request).unwrap();
    assert_eq!(response.model_used, "trained");
    // unknown city: generic 6.5% growth
    assert!((response.predictions.one_year - 5_000_000.0 * 1.065).abs() < 1.0);
    assert_eq!(response.market_trend, "Stable");
}

#[test]
fn premium_locations_get_the_growth_bonus() {
    let price = 10_000_000.0;
    let (service, _tmp) = service_with(Box::new(FixedPrice(price)), 0.85);
    let mut request = sample_request();
    request.location = "DHA Phase 5".to_string();

    let response = service.predict_price(&request).unwrap();
    // Karachi 8% plus the 2% premium-area bonus
    assert!((response.predictions.one_year - price * 1.10).abs() < 1.0);
    assert!(response
        .insights
        .iter()
        .any(|note| note.contains("high-demand")));
}

#[test]
fn plausible_historical_growth_drives_projections() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("growth.json");
    std::fs::write(
        &path,
        r#"{"Karachi":{"Gulshan-e-Iqbal":{"House":{
            "property_appreciation_rate": 12.5,
            "rent_growth_rate": 8.0,
            "years_analyzed": 2,
            "data_points": 80,
            "confidence": 0.85
        }}}}"#,
    )
    .unwrap();
    let growth = HistoricalGrowthStore::load(path.to_str().unwrap());

    let price = 10_000_000.0;
    let (service, _tmp) = service_with_growth(Box::new(FixedPrice(price)), 0.85, growth);
    let response = service.predict_price(&sample_request()).unwrap();
    // 12.5% historical rate replaces the 8% Karachi default
    assert!((response.predictions.one_year - price * 1.125).abs() < 1.0);
}

#[test]
fn fallback_estimate_is_deterministic_and_ordered() {
    let request = sample_request();
    let a = fallback_estimate(&request, Some(0.8));
    let b = fallback_estimate(&request, Some(0.8));
    assert_eq!(a, b);

    let mut bigger = sample_request();
    bigger.area_marla = 14.0;
    assert!(fallback_estimate(&bigger, Some(0.8)) > a);

    let mut premium = sample_request();
    premium.location = "DHA Phase 5".to_string();
    assert!(fallback_estimate(&premium, Some(0.8)) > a);
}

#[test]
fn non_finite_model_output_routes_to_the_fallback() {
    struct NanModel;
    impl Predictor for NanModel {
        fn name(&self) -> &'static str {
            "xgboost"
        }
        fn predict(&self, _features: &[f64]) -> crate::error::Result<f64> {
            Ok(f64::NAN)
        }
    }

    let (service, _tmp) = service_with(Box::new(NanModel), 0.9);
    let response = service.predict_price(&sample_request()).unwrap();
    assert_eq!(response.model_used, "fallback");
    assert!(response.predicted_price.is_finite());
}
