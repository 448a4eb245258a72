//! Cascade configuration
//!
//! Engine priorities, acceptance thresholds and emergency quota, stored as
//! TOML. Read once when a controller is built; changing it means building a
//! new controller.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{CascadeError, CascadeResult};
use crate::model::Modality;

/// Acceptance thresholds per modality.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub text_confidence: f64,
    pub formula_confidence: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            text_confidence: 0.8,
            formula_confidence: 0.7,
        }
    }
}

impl Thresholds {
    pub fn for_modality(&self, modality: Modality) -> f64 {
        match modality {
            Modality::Text => self.text_confidence,
            Modality::Formula => self.formula_confidence,
        }
    }
}

/// Emergency engine ceilings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaConfig {
    pub daily_limit: u64,
    pub account_limit: u64,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            daily_limit: 100,
            account_limit: 1000,
        }
    }
}

/// Ordered engine names for one modality.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModalityPriority {
    pub primary: String,
    #[serde(default)]
    pub fallback: Vec<String>,
    /// Metered engine of last resort (formula cascade only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emergency: Option<String>,
}

impl ModalityPriority {
    /// Every engine name this priority list mentions, in cascade order.
    pub fn engine_names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.primary.as_str())
            .chain(self.fallback.iter().map(String::as_str))
            .chain(self.emergency.as_deref())
    }
}

/// Engine priority lists for both modalities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnginePriorities {
    pub text: ModalityPriority,
    pub formula: ModalityPriority,
}

impl Default for EnginePriorities {
    fn default() -> Self {
        Self {
            text: ModalityPriority {
                primary: "paddleocr".to_string(),
                fallback: vec!["tesseract".to_string(), "doctr".to_string()],
                emergency: None,
            },
            formula: ModalityPriority {
                primary: "pix2tex".to_string(),
                fallback: vec!["trocr".to_string()],
                emergency: Some("mathpix".to_string()),
            },
        }
    }
}

impl EnginePriorities {
    pub fn for_modality(&self, modality: Modality) -> &ModalityPriority {
        match modality {
            Modality::Text => &self.text,
            Modality::Formula => &self.formula,
        }
    }
}

/// Top-level cascade configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CascadeConfig {
    #[serde(default)]
    pub thresholds: Thresholds,
    #[serde(default)]
    pub quota: QuotaConfig,
    #[serde(default)]
    pub engines: EnginePriorities,
}

impl CascadeConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read cascade config {}", path.display()))?;
        let config: CascadeConfig = toml::from_str(&content)
            .with_context(|| format!("Invalid cascade config {}", path.display()))?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize cascade config")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write cascade config {}", path.display()))?;
        Ok(())
    }

    /// Override thresholds and quota from `OCR_*` environment variables.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(v) = env_parse::<f64>("OCR_TEXT_CONFIDENCE_THRESHOLD")? {
            self.thresholds.text_confidence = v;
        }
        if let Some(v) = env_parse::<f64>("OCR_FORMULA_CONFIDENCE_THRESHOLD")? {
            self.thresholds.formula_confidence = v;
        }
        if let Some(v) = env_parse::<u64>("OCR_EMERGENCY_DAILY_LIMIT")? {
            self.quota.daily_limit = v;
        }
        if let Some(v) = env_parse::<u64>("OCR_EMERGENCY_ACCOUNT_LIMIT")? {
            self.quota.account_limit = v;
        }
        Ok(())
    }

    /// Reject thresholds outside [0, 1], blank primary engines and an
    /// emergency engine on the text cascade.
    pub fn validate(&self) -> CascadeResult<()> {
        for (name, value) in [
            ("text_confidence", self.thresholds.text_confidence),
            ("formula_confidence", self.thresholds.formula_confidence),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(CascadeError::InvalidThreshold { name, value });
            }
        }
        for modality in Modality::all() {
            if self.engines.for_modality(*modality).primary.trim().is_empty() {
                return Err(CascadeError::Config(format!(
                    "primary {} engine must not be empty",
                    modality
                )));
            }
        }
        if let Some(engine) = &self.engines.text.emergency {
            return Err(CascadeError::Config(format!(
                "emergency engine {} is only supported for formula blocks",
                engine
            )));
        }
        Ok(())
    }
}

fn env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => {
            let value = raw
                .trim()
                .parse::<T>()
                .with_context(|| format!("Invalid value for {}: {:?}", key, raw))?;
            Ok(Some(value))
        }
        Err(_) => Ok(None),
    }
}
