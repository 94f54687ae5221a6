//! Engine configuration.
//!
//! Loaded from a TOML file; every field has a default so an empty or
//! missing file yields a usable configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Semicolon-delimited historical sales dataset.
    #[serde(default = "default_dataset_path")]
    pub dataset_path: String,
    /// Directory holding one subdirectory per trained model.
    #[serde(default = "default_model_dir")]
    pub model_dir: String,
    /// Historical growth-rate table (JSON). Optional; defaults apply on miss.
    #[serde(default = "default_growth_rates_path")]
    pub growth_rates_path: String,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub training: TrainingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Epochs for the gradient-descent models (linear and network).
    #[serde(default = "default_epochs")]
    pub epochs: usize,
    /// Learning rate for the boosting and network models.
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    /// Bootstrap sample count for the forest model.
    #[serde(default = "default_forest_trees")]
    pub forest_trees: usize,
    /// Boosting rounds.
    #[serde(default = "default_boost_rounds")]
    pub boost_rounds: usize,
}

fn default_dataset_path() -> String {
    "data/property_sales.csv".to_string()
}

fn default_model_dir() -> String {
    "trained_models".to_string()
}

fn default_growth_rates_path() -> String {
    "data/growth_rates.json".to_string()
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_epochs() -> usize {
    60
}

fn default_learning_rate() -> f64 {
    0.1
}

fn default_forest_trees() -> usize {
    30
}

fn default_boost_rounds() -> usize {
    20
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: default_epochs(),
            learning_rate: default_learning_rate(),
            forest_trees: default_forest_trees(),
            boost_rounds: default_boost_rounds(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        toml::from_str("").expect("empty config must deserialize")
    }
}

impl Config {
    /// Load configuration from a TOML file. A missing file is not an
    /// error: defaults are used and a note is logged.
    pub fn load(path: &str) -> Result<Self> {
        let expanded = shellexpand::tilde(path).into_owned();
        if !Path::new(&expanded).exists() {
            tracing::info!("config file {} not found, using defaults", path);
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(&expanded)?;
        let mut config: Config =
            toml::from_str(&raw).map_err(|e| Error::Config(e.to_string()))?;
        config.dataset_path = shellexpand::tilde(&config.dataset_path).into_owned();
        config.model_dir = shellexpand::tilde(&config.model_dir).into_owned();
        config.growth_rates_path =
            shellexpand::tilde(&config.growth_rates_path).into_owned();
        Ok(config)
    }

    pub fn model_dir_path(&self) -> PathBuf {
        PathBuf::from(&self.model_dir)
    }
}
