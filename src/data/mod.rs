//! Dataset ingestion and preprocessing.
//!
//! Turns the raw historical sales CSV into a scaled feature matrix plus the
//! encoding/scaling state every later prediction depends on. The feature
//! vector layout is positional and part of the persistence contract:
//! scaling parameters and trained models index into it by slot, not by name.


use chrono::Datelike;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::error::{Error, Result};

/// Fixed feature-vector width. Order:
/// `[ptype, location, city, province, purpose, area_cat,
///   lat, lon, baths, bedrooms, area_marla,
///   location_premium, property_age, bath_bedroom_ratio, area_normalized]`
pub const FEATURE_COUNT: usize = 15;
/// Slot of the raw size (marla) feature, used by similarity models.
pub const SIZE_FEATURE: usize = 10;
/// Slot of the encoded location feature.
pub const LOCATION_FEATURE: usize = 1;

/// Sizes at or above this many marla are treated as data errors.
const MAX_PLAUSIBLE_MARLA: f64 = 50.0;
const MAX_ROOM_COUNT: f64 = 15.0;

/// One historical sale after cleaning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertyRecord {
    pub property_type: String,
    pub location: String,
    pub city: String,
    pub province: String,
    pub latitude: f64,
    pub longitude: f64,
    pub baths: f64,
    pub bedrooms: f64,
    pub area_marla: f64,
    pub price: f64,
    pub year_listed: i32,
}

/// Raw CSV row; everything is a string so one junk cell skips a row
/// instead of failing the load.
#[derive(Debug, Deserialize)]
struct RawRow {
    #[serde(default)]
    property_type: String,
    #[serde(default)]
    price: String,
    #[serde(default)]
    location: String,
    #[serde(default)]
    city: String,
    #[serde(default)]
    province_name: String,
    #[serde(default)]
    latitude: String,
    #[serde(default)]
    longitude: String,
    #[serde(default)]
    baths: String,
    #[serde(default)]
    area: String,
    #[serde(default)]
    purpose: String,
    #[serde(default)]
    bedrooms: String,
    #[serde(default)]
    date_added: String,
    #[serde(default)]
    area_marla: String,
}

/// Label and target encodings built once per training run from the
/// cleaned dataset. Immutable afterward; unseen values map to bucket 0.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EncodingMaps {
    pub property_type: HashMap<String, usize>,
    pub location: HashMap<String, usize>,
    pub city: HashMap<String, usize>,
    pub province: HashMap<String, usize>,
    pub purpose: HashMap<String, usize>,
    pub area_category: HashMap<String, usize>,
    /// Location → price per marla over the cleaned set.
    pub location_premium: HashMap<String, f64>,
    /// City → mean sale price over the cleaned set.
    pub city_mean_price: HashMap<String, f64>,
}

impl EncodingMaps {
    fn insert_first_seen(map: &mut HashMap<String, usize>, value: &str) {
        if !value.is_empty() && !map.contains_key(value) {
            let next = map.len() + 1;
            map.insert(value.to_string(), next);
        }
    }

    /// Encode a categorical value; unseen or empty values resolve to the
    /// default bucket 0 rather than erroring (open-world policy).
    pub fn encode(map: &HashMap<String, usize>, value: &str) -> f64 {
        map.get(value).copied().unwrap_or(0) as f64
    }

    pub fn premium_for(&self, location: &str) -> f64 {
        self.location_premium.get(location).copied().unwrap_or(0.0)
    }

    pub fn mean_price_for(&self, city: &str) -> Option<f64> {
        self.city_mean_price.get(city).copied()
    }
}

/// Size bucket label for a marla value, mirroring the training dataset's
/// area-category column.
pub fn area_category_of(marla: f64) -> &'static str {
    if marla > 20.0 {
        "20+ Marla"
    } else if marla >= 15.0 {
        "15-20 Marla"
    } else if marla >= 10.0 {
        "10-15 Marla"
    } else if marla >= 5.0 {
        "5-10 Marla"
    } else {
        "0-5 Marla"
    }
}

/// Per-feature z-score parameters. Std is floored above zero so scaling
/// never divides by zero on constant features.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalingParams {
    pub mean: Vec<f64>,
    pub std: Vec<f64>,
}

const STD_FLOOR: f64 = 1e-9;

impl ScalingParams {
    pub fn fit(rows: &[Vec<f64>]) -> Self {
        let width = rows.first().map_or(FEATURE_COUNT, Vec::len);
        let n = rows.len().max(1) as f64;
        let mut mean = vec![0.0; width];
        for row in rows {
            for (m, v) in mean.iter_mut().zip(row) {
                *m += v / n;
            }
        }
        let mut std = vec![0.0; width];
        for row in rows {
            for ((s, v), m) in std.iter_mut().zip(row).zip(&mean) {
                *s += (v - m).powi(2) / n;
            }
        }
        for s in &mut std {
            *s = s.sqrt().max(STD_FLOOR);
        }
        Self { mean, std }
    }

    pub fn scale_vector(&self, features: &[f64]) -> Vec<f64> {
        features
            .iter()
            .zip(self.mean.iter().zip(&self.std))
            .map(|(v, (m, s))| (v - m) / s)
            .collect()
    }

    /// Inverse of `scale_vector`.
    pub fn unscale_vector(&self, scaled: &[f64]) -> Vec<f64> {
        scaled
            .iter()
            .zip(self.mean.iter().zip(&self.std))
            .map(|(v, (m, s))| v * s + m)
            .collect()
    }
}

/// Apply previously fitted scaling parameters to a single inference-time
/// vector. Usable without reloading any dataset.
pub fn scale_new_feature(features: &[f64], params: &ScalingParams) -> Vec<f64> {
    params.scale_vector(features)
}

/// Everything a training run needs, plus the state later predictions reuse.
#[derive(Debug, Clone)]
pub struct ProcessedDataset {
    /// Scaled feature matrix, row-per-record.
    pub features: Vec<Vec<f64>>,
    pub targets: Vec<f64>,
    pub records: Vec<PropertyRecord>,
    pub encodings: EncodingMaps,
    pub scaling: ScalingParams,
    pub rows_skipped: usize,
    pub outliers_removed: usize,
}

#[derive(Debug, Clone)]
pub struct DataProcessor {
    current_year: i32,
}

impl Default for DataProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl DataProcessor {
    pub fn new() -> Self {
        Self {
            current_year: chrono::Utc::now().year(),
        }
    }

    #[cfg(test)]
    pub fn with_year(current_year: i32) -> Self {
        Self { current_year }
    }

    pub fn current_year(&self) -> i32 {
        self.current_year
    }

    /// Full preprocessing pass: parse, filter, de-outlier, encode, scale.
    pub fn load_and_preprocess(&self, path: &str) -> Result<ProcessedDataset> {
        if !Path::new(path).exists() {
            return Err(Error::DatasetMissing {
                path: path.to_string(),
            });
        }
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b';')
            .flexible(true)
            .from_path(path)?;

        let mut records = Vec::new();
        let mut skipped = 0usize;
        for row in reader.deserialize::<RawRow>() {
            let raw = match row {
                Ok(raw) => raw,
                Err(_) => {
                    skipped += 1;
                    continue;
                }
            };
            match self.clean_row(&raw) {
                Some(record) => records.push(record),
                None => skipped += 1,
            }
        }
        tracing::info!(
            kept = records.len(),
            skipped,
            "parsed historical sales dataset"
        );
        if records.is_empty() {
            return Err(Error::EmptyDataset);
        }

        let (records, outliers_removed) = remove_outliers(records);
        tracing::info!(
            kept = records.len(),
            removed = outliers_removed,
            "removed price outliers and implausible rows"
        );
        if records.is_empty() {
            return Err(Error::EmptyDataset);
        }

        let encodings = build_encodings(&records);
        let raw_features: Vec<Vec<f64>> = records
            .iter()
            .map(|r| self.feature_vector(r, &encodings))
            .collect();
        let scaling = ScalingParams::fit(&raw_features);
        let features: Vec<Vec<f64>> = raw_features
            .iter()
            .map(|row| scaling.scale_vector(row))
            .collect();
        let targets: Vec<f64> = records.iter().map(|r| r.price).collect();

        Ok(ProcessedDataset {
            features,
            targets,
            records,
            encodings,
            scaling,
            rows_skipped: skipped,
            outliers_removed,
        })
    }

    /// Validity predicate from the training pipeline: sale listings only,
    /// with positive price/size and complete categorical fields.
    fn clean_row(&self, raw: &RawRow) -> Option<PropertyRecord> {
        if !raw.purpose.trim().eq_ignore_ascii_case("for sale") {
            return None;
        }
        let price = parse_price(&raw.price)?;
        let area_marla = parse_area(&raw.area_marla, &raw.area)?;
        let latitude = raw.latitude.trim().parse::<f64>().ok()?;
        let longitude = raw.longitude.trim().parse::<f64>().ok()?;
        let baths = parse_count(&raw.baths)?;
        let bedrooms = parse_count(&raw.bedrooms)?;

        let property_type = raw.property_type.trim();
        let location = raw.location.trim();
        let city = raw.city.trim();
        if price <= 0.0
            || area_marla <= 0.0
            || property_type.is_empty()
            || location.is_empty()
            || city.is_empty()
        {
            return None;
        }

        Some(PropertyRecord {
            property_type: property_type.to_string(),
            location: location.to_string(),
            city: city.to_string(),
            province: raw.province_name.trim().to_string(),
            latitude,
            longitude,
            baths,
            bedrooms,
            area_marla,
            price,
            year_listed: parse_listing_year(&raw.date_added, self.current_year),
        })
    }

    /// Build the unscaled 15-slot feature vector for a cleaned record.
    pub fn feature_vector(&self, record: &PropertyRecord, encodings: &EncodingMaps) -> Vec<f64> {
        let age = (self.current_year - record.year_listed).max(0) as f64;
        let bath_bedroom_ratio = if record.bedrooms > 0.0 {
            record.baths / record.bedrooms
        } else {
            0.0
        };
        vec![
            EncodingMaps::encode(&encodings.property_type, &record.property_type),
            EncodingMaps::encode(&encodings.location, &record.location),
            EncodingMaps::encode(&encodings.city, &record.city),
            EncodingMaps::encode(&encodings.province, &record.province),
            EncodingMaps::encode(&encodings.purpose, "For Sale"),
            EncodingMaps::encode(&encodings.area_category, area_category_of(record.area_marla)),
            record.latitude,
            record.longitude,
            record.baths,
            record.bedrooms,
            record.area_marla,
            encodings.premium_for(&record.location),
            age,
            bath_bedroom_ratio,
            (record.area_marla / MAX_PLAUSIBLE_MARLA).clamp(0.0, 1.0),
        ]
    }
}

fn parse_price(raw: &str) -> Option<f64> {
    let cleaned: String = raw.trim().chars().filter(|c| *c != ',').collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|p| p.is_finite())
}

/// Prefer the numeric marla column; fall back to parsing the display area
/// string ("8 Marla", "1.5 Kanal"; 1 kanal = 20 marla).
fn parse_area(marla_col: &str, area_col: &str) -> Option<f64> {
    if let Ok(v) = marla_col.trim().parse::<f64>() {
        if v.is_finite() && v > 0.0 {
            return Some(v);
        }
    }
    let area = area_col.trim();
    let number: String = area
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    let value = number.parse::<f64>().ok()?;
    if area.to_ascii_lowercase().contains("kanal") {
        Some(value * 20.0)
    } else if area.to_ascii_lowercase().contains("marla") {
        Some(value)
    } else {
        None
    }
}

fn parse_count(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|v| *v >= 0.0)
}

/// Listing year from an `MM-DD-YYYY` date string; unparsable dates count
/// as the current year (age 0).
fn parse_listing_year(raw: &str, current_year: i32) -> i32 {
    raw.trim()
        .rsplit('-')
        .next()
        .and_then(|part| part.parse::<i32>().ok())
        .filter(|y| (1900..=current_year).contains(y))
        .unwrap_or(current_year)
}

/// IQR outlier rule on price, plus the implausible-size and room-count
/// drops. Runs once per training pass.
fn remove_outliers(records: Vec<PropertyRecord>) -> (Vec<PropertyRecord>, usize) {
    let mut prices: Vec<f64> = records.iter().map(|r| r.price).collect();
    prices.sort_by(|a, b| a.partial_cmp(b).expect("prices are finite"));
    let q1 = percentile(&prices, 0.25);
    let q3 = percentile(&prices, 0.75);
    let iqr = q3 - q1;
    let low = q1 - 1.5 * iqr;
    let high = q3 + 1.5 * iqr;

    let before = records.len();
    let kept: Vec<PropertyRecord> = records
        .into_iter()
        .filter(|r| {
            r.price >= low
                && r.price <= high
                && r.area_marla > 0.0
                && r.area_marla < MAX_PLAUSIBLE_MARLA
                && (0.0..=MAX_ROOM_COUNT).contains(&r.baths)
                && (0.0..=MAX_ROOM_COUNT).contains(&r.bedrooms)
        })
        .collect();
    let removed = before - kept.len();
    (kept, removed)
}

/// Linear-interpolation percentile over a sorted slice.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = p * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if lower == upper {
        return sorted[lower];
    }
    let weight = rank - lower as f64;
    sorted[lower] * (1.0 - weight) + sorted[upper] * weight
}

/// Build all categorical and target encodings in first-seen order.
fn build_encodings(records: &[PropertyRecord]) -> EncodingMaps {
    let mut encodings = EncodingMaps::default();
    let mut location_price: HashMap<String, (f64, f64)> = HashMap::new();
    let mut city_price: HashMap<String, (f64, usize)> = HashMap::new();

    for record in records {
        EncodingMaps::insert_first_seen(&mut encodings.property_type, &record.property_type);
        EncodingMaps::insert_first_seen(&mut encodings.location, &record.location);
        EncodingMaps::insert_first_seen(&mut encodings.city, &record.city);
        EncodingMaps::insert_first_seen(&mut encodings.province, &record.province);
        EncodingMaps::insert_first_seen(&mut encodings.purpose, "For Sale");
        EncodingMaps::insert_first_seen(
            &mut encodings.area_category,
            area_category_of(record.area_marla),
        );

        let entry = location_price
            .entry(record.location.clone())
            .or_insert((0.0, 0.0));
        entry.0 += record.price;
        entry.1 += record.area_marla;

        let entry = city_price.entry(record.city.clone()).or_insert((0.0, 0));
        entry.0 += record.price;
        entry.1 += 1;
    }

    for (location, (price_sum, marla_sum)) in location_price {
        if marla_sum > 0.0 {
            encodings
                .location_premium
                .insert(location, price_sum / marla_sum);
        }
    }
    for (city, (price_sum, count)) in city_price {
        if count > 0 {
            encodings
                .city_mean_price
                .insert(city, price_sum / count as f64);
        }
    }
    encodings
}
