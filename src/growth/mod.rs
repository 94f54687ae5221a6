//! Historical growth-rate store.
//!
//! An auxiliary table of per-city/location/property-type appreciation and
//! rent-growth rates, derived offline from historical listings. Consumers
//! combine it with hard-coded per-city defaults: historical data is used
//! only when it passes a reasonableness filter, and a fallback always
//! records why it was taken.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Rates are percentages (8.5 = 8.5% per year), matching the offline
/// analysis output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrowthRates {
    pub property_appreciation_rate: f64,
    pub rent_growth_rate: f64,
    #[serde(default)]
    pub years_analyzed: u32,
    #[serde(default)]
    pub data_points: u32,
    #[serde(default)]
    pub confidence: f64,
}

/// Why a resolution fell back to the per-city defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    NoHistoricalData,
    ImplausibleAppreciation,
    ImplausibleRentGrowth,
    LowConfidence,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedGrowth {
    pub appreciation_rate: f64,
    pub rent_growth_rate: f64,
    pub confidence: f64,
    pub using_fallback: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<FallbackReason>,
}

/// Historical data is distrusted below these floors; markets do correct,
/// but a measured crash this deep is far more likely thin or bad data.
const MIN_PLAUSIBLE_APPRECIATION: f64 = -20.0;
const MIN_PLAUSIBLE_RENT_GROWTH: f64 = -10.0;
const MIN_CONFIDENCE: f64 = 0.6;

type GrowthTable = HashMap<String, HashMap<String, HashMap<String, GrowthRates>>>;

#[derive(Debug, Default)]
pub struct HistoricalGrowthStore {
    table: GrowthTable,
}

impl HistoricalGrowthStore {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load the persisted table. A missing or unreadable file yields an
    /// empty store; every lookup then resolves to defaults.
    pub fn load(path: &str) -> Self {
        if !Path::new(path).exists() {
            tracing::info!("growth-rate table {} not found, using city defaults", path);
            return Self::default();
        }
        match std::fs::read_to_string(path)
            .map_err(|e| e.to_string())
            .and_then(|raw| serde_json::from_str::<GrowthTable>(&raw).map_err(|e| e.to_string()))
        {
            Ok(table) => {
                tracing::info!(cities = table.len(), "loaded growth-rate table");
                Self { table }
            }
            Err(e) => {
                tracing::warn!("growth-rate table unreadable ({e}); using city defaults");
                Self::default()
            }
        }
    }

    pub fn get_growth_rates(
        &self,
        city: &str,
        location: &str,
        property_type: &str,
    ) -> Option<&GrowthRates> {
        self.table.get(city)?.get(location)?.get(property_type)
    }

    /// Combine historical data with the per-city defaults. Historical data
    /// is used only when appreciation and rent growth are plausible and
    /// confidence clears the floor; otherwise the result is flagged as a
    /// fallback with the reason.
    pub fn resolve(&self, city: &str, location: &str, property_type: &str) -> ResolvedGrowth {
        let (default_appreciation, default_rent) = default_city_rates(city);
        let fallback = |reason: FallbackReason| ResolvedGrowth {
            appreciation_rate: default_appreciation,
            rent_growth_rate: default_rent,
            confidence: 0.5,
            using_fallback: true,
            fallback_reason: Some(reason),
        };

        let Some(rates) = self.get_growth_rates(city, location, property_type) else {
            return fallback(FallbackReason::NoHistoricalData);
        };
        if rates.property_appreciation_rate < MIN_PLAUSIBLE_APPRECIATION {
            return fallback(FallbackReason::ImplausibleAppreciation);
        }
        if rates.rent_growth_rate < MIN_PLAUSIBLE_RENT_GROWTH {
            return fallback(FallbackReason::ImplausibleRentGrowth);
        }
        if rates.confidence <= MIN_CONFIDENCE {
            return fallback(FallbackReason::LowConfidence);
        }
        ResolvedGrowth {
            appreciation_rate: rates.property_appreciation_rate,
            rent_growth_rate: rates.rent_growth_rate,
            confidence: rates.confidence,
            using_fallback: false,
            fallback_reason: None,
        }
    }
}

/// Hard-coded per-city (appreciation %, rent growth %) defaults.
pub fn default_city_rates(city: &str) -> (f64, f64) {
    match city {
        "Islamabad" => (10.0, 7.0),
        "Lahore" => (9.0, 6.5),
        "Karachi" => (8.0, 6.0),
        "Rawalpindi" => (7.0, 5.5),
        "Faisalabad" => (6.0, 5.0),
        _ => (6.5, 5.5),
    }
}

/// Annual appreciation as a fraction, for price projections.
pub fn annual_growth_fraction(city: &str) -> f64 {
    default_city_rates(city).0 / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(city: &str, location: &str, ptype: &str, rates: GrowthRates) -> HistoricalGrowthStore {
        let mut table: GrowthTable = HashMap::new();
        table
            .entry(city.to_string())
            .or_default()
            .entry(location.to_string())
            .or_default()
            .insert(ptype.to_string(), rates);
        HistoricalGrowthStore { table }
    }

    fn good_rates() -> GrowthRates {
        GrowthRates {
            property_appreciation_rate: 12.5,
            rent_growth_rate: 8.0,
            years_analyzed: 2,
            data_points: 80,
            confidence: 0.85,
        }
    }

    #[test]
    fn miss_returns_none_and_resolves_to_fallback() {
        let store = HistoricalGrowthStore::empty();
        assert!(store.get_growth_rates("Karachi", "DHA", "House").is_none());
        let resolved = store.resolve("Karachi", "DHA", "House");
        assert!(resolved.using_fallback);
        assert_eq!(
            resolved.fallback_reason,
            Some(FallbackReason::NoHistoricalData)
        );
        assert_eq!(resolved.appreciation_rate, 8.0); // Karachi default
    }

    #[test]
    fn plausible_historical_data_is_used() {
        let store = store_with("Karachi", "DHA", "House", good_rates());
        let resolved = store.resolve("Karachi", "DHA", "House");
        assert!(!resolved.using_fallback);
        assert_eq!(resolved.fallback_reason, None);
        assert_eq!(resolved.appreciation_rate, 12.5);
        assert_eq!(resolved.rent_growth_rate, 8.0);
    }

    #[test]
    fn implausible_appreciation_never_surfaces_as_used() {
        let mut rates = good_rates();
        rates.property_appreciation_rate = -35.0;
        let store = store_with("Karachi", "DHA", "House", rates);
        let resolved = store.resolve("Karachi", "DHA", "House");
        assert!(resolved.using_fallback);
        assert_eq!(
            resolved.fallback_reason,
            Some(FallbackReason::ImplausibleAppreciation)
        );
        assert!(resolved.appreciation_rate >= -20.0);
    }

    #[test]
    fn implausible_rent_growth_falls_back() {
        let mut rates = good_rates();
        rates.rent_growth_rate = -15.0;
        let store = store_with("Karachi", "DHA", "House", rates);
        let resolved = store.resolve("Karachi", "DHA", "House");
        assert!(resolved.using_fallback);
        assert_eq!(
            resolved.fallback_reason,
            Some(FallbackReason::ImplausibleRentGrowth)
        );
        assert!(resolved.rent_growth_rate >= -10.0);
    }

    #[test]
    fn low_confidence_falls_back() {
        let mut rates = good_rates();
        rates.confidence = 0.4;
        let store = store_with("Karachi", "DHA", "House", rates);
        let resolved = store.resolve("Karachi", "DHA", "House");
        assert!(resolved.using_fallback);
        assert_eq!(resolved.fallback_reason, Some(FallbackReason::LowConfidence));
    }

    #[test]
    fn boundary_confidence_is_not_enough() {
        let mut rates = good_rates();
        rates.confidence = 0.6; // strictly-greater required
        let store = store_with("Karachi", "DHA", "House", rates);
        assert!(store.resolve("Karachi", "DHA", "House").using_fallback);
    }

    #[test]
    fn table_parses_the_offline_analysis_layout() {
        let raw = r#"{
            "Karachi": {
                "DHA Phase 5": {
                    "House": {
                        "property_appreciation_rate": 11.2,
                        "rent_growth_rate": 6.9,
                        "years_analyzed": 2,
                        "data_points": 41,
                        "confidence": 0.68
                    }
                }
            }
        }"#;
        let table: GrowthTable = serde_json::from_str(raw).unwrap();
        let store = HistoricalGrowthStore { table };
        let rates = store
            .get_growth_rates("Karachi", "DHA Phase 5", "House")
            .unwrap();
        assert_eq!(rates.data_points, 41);
        let resolved = store.resolve("Karachi", "DHA Phase 5", "House");
        assert!(!resolved.using_fallback);
    }

    #[test]
    fn unknown_city_gets_the_generic_default() {
        assert_eq!(default_city_rates("Multan"), (6.5, 5.5));
        assert!((annual_growth_fraction("Karachi") - 0.08).abs() < 1e-12);
    }
}
