//! Mathpix adapter — the metered emergency formula engine
//!
//! Only formulas are recognized; text blocks fall through to the trait's
//! stub result. Reported confidence is scaled down because the service is
//! consistently optimistic.

use async_trait::async_trait;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use super::OcrEngine;
use crate::error::EngineError;
use crate::model::{Modality, RawRecognition};

const TEXT_ENDPOINT: &str = "/v3/text";

fn default_name() -> String {
    "mathpix".to_string()
}

fn default_base_url() -> String {
    "https://api.mathpix.com".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

/// Connection settings for the Mathpix API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MathpixConfig {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default, skip_serializing)]
    pub app_id: Option<String>,
    #[serde(default, skip_serializing)]
    pub app_key: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// No credentials; callers supply `app_id`/`app_key` themselves.
impl Default for MathpixConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            base_url: default_base_url(),
            app_id: None,
            app_key: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TextResponse {
    #[serde(default)]
    latex_simplified: Option<String>,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    request_id: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Scale the service's confidence to a conservative estimate.
pub fn adjust_confidence(reported: f64) -> f64 {
    (reported * 0.9).min(0.95)
}

fn image_mime(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        _ => "image/jpeg",
    }
}

/// HTTP client for the Mathpix text endpoint.
pub struct MathpixEngine {
    config: MathpixConfig,
    client: reqwest::Client,
}

impl std::fmt::Debug for MathpixEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MathpixEngine")
            .field("name", &self.config.name)
            .field("base_url", &self.config.base_url)
            .finish()
    }
}

impl MathpixEngine {
    pub fn new(config: MathpixConfig) -> Result<Self, EngineError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EngineError::Initialization(format!("HTTP client: {}", e)))?;
        Ok(Self { config, client })
    }

    fn credentials(&self) -> Result<(&str, &str), EngineError> {
        match (self.config.app_id.as_deref(), self.config.app_key.as_deref()) {
            (Some(id), Some(key)) if !id.is_empty() && !key.is_empty() => Ok((id, key)),
            _ => Err(EngineError::Unavailable(format!(
                "{}: app_id/app_key not configured",
                self.config.name
            ))),
        }
    }
}

#[async_trait]
impl OcrEngine for MathpixEngine {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn modalities(&self) -> &[Modality] {
        &[Modality::Formula]
    }

    async fn initialize(&self) -> Result<(), EngineError> {
        self.credentials()
            .map(|_| ())
            .map_err(|e| EngineError::Initialization(e.to_string()))
    }

    async fn recognize_formula(&self, image_path: &Path) -> Result<RawRecognition, EngineError> {
        let (app_id, app_key) = self.credentials()?;

        let bytes = tokio::fs::read(image_path).await?;
        let encoded = base64::engine::general_purpose::STANDARD.encode(&bytes);

        let body = serde_json::json!({
            "src": format!("data:{};base64,{}", image_mime(image_path), encoded),
            "formats": ["latex_simplified"],
            "data_options": {
                "include_asciimath": false,
                "include_mathml": false,
                "include_tsv": false
            }
        });

        let url = format!("{}{}", self.config.base_url.trim_end_matches('/'), TEXT_ENDPOINT);
        let response = self
            .client
            .post(&url)
            .header("app_id", app_id)
            .header("app_key", app_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(EngineError::Http(format!("Mathpix returned {}: {}", status, text)));
        }

        let parsed: TextResponse = response
            .json()
            .await
            .map_err(|e| EngineError::Parse(format!("Mathpix response: {}", e)))?;

        if let Some(error) = parsed.error {
            return Err(EngineError::Http(format!("Mathpix error: {}", error)));
        }

        let reported = parsed.confidence.unwrap_or(0.0);
        let latex = parsed.latex_simplified.unwrap_or_default();
        debug!(engine = %self.config.name, reported, request_id = ?parsed.request_id, "Mathpix responded");

        let mut raw = RawRecognition::new(latex.trim(), adjust_confidence(reported))
            .with_metadata("engine", self.config.name.as_str())
            .with_metadata("original_confidence", reported);
        if let Some(request_id) = parsed.request_id {
            raw = raw.with_metadata("request_id", request_id);
        }
        Ok(raw)
    }
}
