//! Valuation service.
//!
//! Maps a valuation request into the encoded/scaled feature space, invokes
//! the registry's best model, and wraps the point estimate in a
//! confidence-weighted band with multi-year projections. Any failure
//! during feature construction or model invocation is recovered by a
//! deterministic rule-based estimate; the caller always receives a
//! well-formed response. The one condition surfaced instead of recovered
//! is "no model trained yet", so the caller can prompt training.

#[cfg(test)]
mod tests;

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::data::{area_category_of, scale_new_feature, EncodingMaps};
use crate::error::{Error, Result};
use crate::growth::HistoricalGrowthStore;
use crate::registry::{ModelRegistry, PreprocessorState};

/// High-demand location keywords that command a price premium and a
/// growth-rate bonus.
const PREMIUM_KEYWORDS: [&str; 7] = [
    "dha",
    "bahria",
    "gulberg",
    "clifton",
    "defence",
    "cantonment",
    "cantt",
];

/// Growth-rate bonus for recognized premium areas.
const PREMIUM_GROWTH_BONUS: f64 = 0.02;

/// Floor applied to model output; the market has no six-figure houses.
const MIN_PREDICTED_PRICE: f64 = 1_000_000.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValuationRequest {
    pub city: String,
    pub location: String,
    #[serde(default)]
    pub neighbourhood: Option<String>,
    pub property_type: String,
    pub year_built: i32,
    pub area_marla: f64,
    pub bedrooms: f64,
    pub bathrooms: f64,
    #[serde(default)]
    pub province: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceRange {
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct YearlyPredictions {
    pub current_year: f64,
    pub one_year: f64,
    pub two_year: f64,
    pub three_year: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparableProperty {
    pub location: String,
    pub area_marla: f64,
    pub bedrooms: f64,
    pub bathrooms: f64,
    pub estimated_value: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValuationResponse {
    pub predicted_price: f64,
    pub price_range: PriceRange,
    /// Percent, e.g. 85.0 for an R² of 0.85.
    pub confidence: f64,
    pub market_trend: String,
    pub predictions: YearlyPredictions,
    pub comparable_properties: Vec<ComparableProperty>,
    pub insights: Vec<String>,
    /// "trained" when the model produced the estimate, "fallback" when the
    /// rule-based estimator did.
    pub model_used: String,
}

pub struct PredictionService {
    registry: Arc<ModelRegistry>,
    growth: Arc<HistoricalGrowthStore>,
}

impl PredictionService {
    pub fn new(registry: Arc<ModelRegistry>, growth: Arc<HistoricalGrowthStore>) -> Self {
        Self { registry, growth }
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn growth_store(&self) -> &HistoricalGrowthStore {
        &self.growth
    }

    /// Produce a valuation. Fails only on an invalid request or when no
    /// model has ever been trained; computation failures degrade to the
    /// rule-based estimate.
    pub fn predict_price(&self, request: &ValuationRequest) -> Result<ValuationResponse> {
        validate(request)?;
        let best = self.registry.best_model()?;
        let r2 = best.metadata.r2_score;

        let (price, model_used) = match self.model_estimate(request, best.predictor.as_ref()) {
            Ok(price) => (price, "trained"),
            Err(e) => {
                tracing::warn!(
                    model = %best.metadata.name,
                    "model prediction failed, using rule-based fallback: {e}"
                );
                (fallback_estimate(request, Some(r2)), "fallback")
            }
        };

        Ok(self.build_response(request, price, r2, model_used))
    }

    /// Feature construction mirroring the training pipeline, then a model
    /// call in the scaled space.
    fn model_estimate(
        &self,
        request: &ValuationRequest,
        predictor: &dyn crate::training::models::Predictor,
    ) -> Result<f64> {
        let state = self.registry.ensure_preprocessor()?;
        let features = build_request_features(request, &state, self.registry.processor().current_year());
        let scaled = scale_new_feature(&features, &state.scaling);
        let raw = predictor.predict(&scaled)?;
        if !raw.is_finite() {
            return Err(Error::Prediction("model returned a non-finite price".into()));
        }
        Ok(raw.max(MIN_PREDICTED_PRICE))
    }

    /// Annual growth as a fraction: guardrailed historical rates when the
    /// store has plausible data, per-city defaults otherwise, plus the
    /// premium-area bonus.
    fn growth_rate_for(&self, request: &ValuationRequest) -> f64 {
        let resolved =
            self.growth
                .resolve(&request.city, &request.location, &request.property_type);
        let mut rate = resolved.appreciation_rate / 100.0;
        if is_premium_area(request) {
            rate += PREMIUM_GROWTH_BONUS;
        }
        rate
    }

    fn build_response(
        &self,
        request: &ValuationRequest,
        price: f64,
        r2: f64,
        model_used: &str,
    ) -> ValuationResponse {
        let confidence = confidence_fraction(r2);
        let spread = (1.0 - confidence) * 0.3;
        let growth = self.growth_rate_for(request);

        ValuationResponse {
            predicted_price: price,
            price_range: PriceRange {
                min: price * (1.0 - spread),
                max: price * (1.0 + spread),
            },
            confidence: confidence * 100.0,
            market_trend: market_trend(growth),
            predictions: YearlyPredictions {
                current_year: price,
                one_year: price * (1.0 + growth),
                two_year: price * (1.0 + growth).powi(2),
                three_year: price * (1.0 + growth).powi(3),
            },
            comparable_properties: comparables(request, price),
            insights: insights(request, price),
            model_used: model_used.to_string(),
        }
    }
}

fn validate(request: &ValuationRequest) -> Result<()> {
    if request.city.trim().is_empty() {
        return Err(Error::InvalidRequest("city is required".into()));
    }
    if request.location.trim().is_empty() {
        return Err(Error::InvalidRequest("location is required".into()));
    }
    if request.property_type.trim().is_empty() {
        return Err(Error::InvalidRequest("propertyType is required".into()));
    }
    if request.area_marla <= 0.0 {
        return Err(Error::InvalidRequest("areaMarla must be positive".into()));
    }
    if request.year_built <= 1800 {
        return Err(Error::InvalidRequest("yearBuilt is implausible".into()));
    }
    if request.bedrooms < 0.0 || request.bathrooms < 0.0 {
        return Err(Error::InvalidRequest("room counts cannot be negative".into()));
    }
    Ok(())
}

/// Confidence as a fraction: floored at 0.6, capped at 0.95.
pub fn confidence_fraction(r2: f64) -> f64 {
    r2.max(0.6).min(0.95)
}

fn is_premium_area(request: &ValuationRequest) -> bool {
    let haystacks = [
        request.location.to_lowercase(),
        request
            .neighbourhood
            .as_deref()
            .unwrap_or_default()
            .to_lowercase(),
    ];
    PREMIUM_KEYWORDS
        .iter()
        .any(|kw| haystacks.iter().any(|h| h.contains(kw)))
}

fn market_trend(growth: f64) -> String {
    if growth >= 0.08 {
        "Growing".to_string()
    } else if growth >= 0.05 {
        "Stable".to_string()
    } else {
        "Moderate".to_string()
    }
}

/// Known city centroids; unknown cities borrow Karachi's, matching the
/// training-side default.
fn city_coordinates(city: &str) -> (f64, f64) {
    match city {
        "Karachi" => (24.8607, 67.0011),
        "Lahore" => (31.5204, 74.3587),
        "Islamabad" => (33.6844, 73.0479),
        "Faisalabad" => (31.4504, 73.1350),
        "Rawalpindi" => (33.5651, 73.0169),
        _ => (24.8607, 67.0011),
    }
}

/// Build the unscaled 15-slot feature vector for a request. Unseen
/// categorical values resolve to the default bucket 0; the neighbourhood
/// is preferred over the broader location for encoding and premium lookup.
fn build_request_features(
    request: &ValuationRequest,
    state: &PreprocessorState,
    current_year: i32,
) -> Vec<f64> {
    let encodings: &EncodingMaps = &state.encodings;
    let neighbourhood = request.neighbourhood.as_deref().unwrap_or_default();

    let location_code = {
        let by_neighbourhood = EncodingMaps::encode(&encodings.location, neighbourhood);
        if by_neighbourhood > 0.0 {
            by_neighbourhood
        } else {
            EncodingMaps::encode(&encodings.location, &request.location)
        }
    };
    let premium = {
        let by_neighbourhood = encodings.premium_for(neighbourhood);
        if by_neighbourhood > 0.0 {
            by_neighbourhood
        } else {
            encodings.premium_for(&request.location)
        }
    };

    let (latitude, longitude) = city_coordinates(&request.city);
    let age = (current_year - request.year_built).max(0) as f64;
    let ratio = if request.bedrooms > 0.0 {
        request.bathrooms / request.bedrooms
    } else {
        0.0
    };

    vec![
        EncodingMaps::encode(&encodings.property_type, &request.property_type),
        location_code,
        EncodingMaps::encode(&encodings.city, &request.city),
        EncodingMaps::encode(
            &encodings.province,
            request.province.as_deref().unwrap_or_default(),
        ),
        EncodingMaps::encode(&encodings.purpose, "For Sale"),
        EncodingMaps::encode(&encodings.area_category, area_category_of(request.area_marla)),
        latitude,
        longitude,
        request.bathrooms,
        request.bedrooms,
        request.area_marla,
        premium,
        age,
        ratio,
        (request.area_marla / 50.0).clamp(0.0, 1.0),
    ]
}

/// Deterministic rule-based estimate used when the model path fails:
/// city base price per marla, adjusted for type, rooms, age, premium
/// location, and the accuracy of whatever model we last trusted.
pub fn fallback_estimate(request: &ValuationRequest, last_known_r2: Option<f64>) -> f64 {
    let base_per_marla = match request.city.as_str() {
        "Islamabad" => 800_000.0,
        "Lahore" => 700_000.0,
        "Karachi" => 600_000.0,
        "Rawalpindi" => 500_000.0,
        "Faisalabad" => 400_000.0,
        _ => 600_000.0,
    };
    let type_multiplier = match request.property_type.as_str() {
        "House" => 1.0,
        "Flat" => 0.85,
        "Upper Portion" | "Lower Portion" => 0.7,
        "Farm House" => 1.3,
        "Penthouse" => 1.2,
        "Room" => 0.4,
        _ => 0.9,
    };
    let bedroom_adj = (1.0 + 0.05 * (request.bedrooms - 3.0)).clamp(0.8, 1.4);
    let bath_adj = (1.0 + 0.03 * (request.bathrooms - 2.0)).clamp(0.9, 1.3);
    let age = (chrono::Datelike::year(&chrono::Utc::now()) - request.year_built).max(0) as f64;
    let age_decay = (1.0 - 0.008 * age).max(0.7);
    let premium_multiplier = if is_premium_area(request) { 1.15 } else { 1.0 };
    let accuracy_multiplier = last_known_r2.map_or(1.0, |r2| 0.9 + 0.2 * r2.clamp(0.0, 1.0));

    (base_per_marla
        * request.area_marla
        * type_multiplier
        * bedroom_adj
        * bath_adj
        * age_decay
        * premium_multiplier
        * accuracy_multiplier)
        .max(MIN_PREDICTED_PRICE)
}

/// Synthetic nearby listings for market comparison.
fn comparables(request: &ValuationRequest, price: f64) -> Vec<ComparableProperty> {
    vec![
        ComparableProperty {
            location: format!("{} (nearby)", request.location),
            area_marla: request.area_marla + 1.0,
            bedrooms: request.bedrooms,
            bathrooms: request.bathrooms,
            estimated_value: price * 1.05,
        },
        ComparableProperty {
            location: format!("{} (nearby)", request.location),
            area_marla: (request.area_marla - 1.0).max(1.0),
            bedrooms: (request.bedrooms - 1.0).max(1.0),
            bathrooms: request.bathrooms,
            estimated_value: price * 0.95,
        },
        ComparableProperty {
            location: format!("{} center", request.city),
            area_marla: request.area_marla,
            bedrooms: request.bedrooms + 1.0,
            bathrooms: request.bathrooms + 1.0,
            estimated_value: price * 1.1,
        },
    ]
}

/// Advisory narrative generated from simple thresholds; not part of the
/// numeric contract.
fn insights(request: &ValuationRequest, price: f64) -> Vec<String> {
    let mut notes = Vec::new();
    let per_marla = price / request.area_marla.max(1.0);
    if per_marla > 1_500_000.0 {
        notes.push("Premium price per marla for this market".to_string());
    } else if per_marla < 400_000.0 {
        notes.push("Priced below the typical market rate per marla".to_string());
    }
    if request.area_marla >= 20.0 {
        notes.push("Large property suitable for rental income".to_string());
    }
    let age = (chrono::Datelike::year(&chrono::Utc::now()) - request.year_built).max(0);
    if age <= 5 {
        notes.push("Recently built; low near-term maintenance expected".to_string());
    } else if age > 30 {
        notes.push("Older construction; budget for renovation".to_string());
    }
    if request.bedrooms > 0.0 && request.bathrooms / request.bedrooms >= 1.0 {
        notes.push("Bathroom-to-bedroom ratio above market norm".to_string());
    }
    if is_premium_area(request) {
        notes.push("Located in a recognized high-demand area".to_string());
    }
    notes
}
