//! Worker configuration
//!
//! Extends the cascade configuration with the list of engine adapters to
//! build at startup and the batch concurrency limit.

use anyhow::{Context, Result};
use ocr_cascade::engine::OutputFormat;
use ocr_cascade::{
    CascadeConfig, CascadeController, CommandEngine, CommandEngineConfig, EngineRegistry,
    MathpixConfig, MathpixEngine, Modality, OcrEngine, QuotaGuard, UsageStats,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

fn default_max_concurrent_blocks() -> usize {
    10
}

fn default_mathpix_name() -> String {
    "mathpix".to_string()
}

fn default_mathpix_base_url() -> String {
    "https://api.mathpix.com".to_string()
}

fn default_app_id_env() -> String {
    "MATHPIX_APP_ID".to_string()
}

fn default_app_key_env() -> String {
    "MATHPIX_APP_KEY".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

/// Mathpix adapter settings. Credentials are read from the named
/// environment variables, never from the file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MathpixSpec {
    #[serde(default = "default_mathpix_name")]
    pub name: String,
    #[serde(default = "default_mathpix_base_url")]
    pub base_url: String,
    #[serde(default = "default_app_id_env")]
    pub app_id_env: String,
    #[serde(default = "default_app_key_env")]
    pub app_key_env: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for MathpixSpec {
    fn default() -> Self {
        Self {
            name: default_mathpix_name(),
            base_url: default_mathpix_base_url(),
            app_id_env: default_app_id_env(),
            app_key_env: default_app_key_env(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl MathpixSpec {
    fn to_config(&self) -> MathpixConfig {
        MathpixConfig {
            name: self.name.clone(),
            base_url: self.base_url.clone(),
            app_id: std::env::var(&self.app_id_env).ok(),
            app_key: std::env::var(&self.app_key_env).ok(),
            timeout_secs: self.timeout_secs,
        }
    }
}

/// One engine adapter to build at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AdapterSpec {
    Command(CommandEngineConfig),
    Mathpix(MathpixSpec),
}

impl AdapterSpec {
    pub fn name(&self) -> &str {
        match self {
            Self::Command(c) => &c.name,
            Self::Mathpix(m) => &m.name,
        }
    }

    pub fn build(&self) -> Result<Arc<dyn OcrEngine>> {
        let engine: Arc<dyn OcrEngine> = match self {
            Self::Command(c) => Arc::new(
                CommandEngine::new(c.clone())
                    .with_context(|| format!("Invalid command adapter {}", c.name))?,
            ),
            Self::Mathpix(m) => Arc::new(
                MathpixEngine::new(m.to_config())
                    .with_context(|| format!("Invalid Mathpix adapter {}", m.name))?,
            ),
        };
        Ok(engine)
    }
}

fn command(name: &str, program: &str, args: &str, modality: Modality, output: OutputFormat) -> AdapterSpec {
    AdapterSpec::Command(CommandEngineConfig {
        name: name.to_string(),
        program: program.to_string(),
        args: args.to_string(),
        modalities: vec![modality],
        output,
        timeout_secs: default_timeout_secs(),
        text_confidence: 0.75,
        probe_args: vec!["--version".to_string()],
    })
}

/// Adapters for the engines named in the default priority lists.
pub fn default_adapters() -> Vec<AdapterSpec> {
    vec![
        command(
            "paddleocr",
            "paddleocr-cli",
            "--image {image} --lang chinese_cht --json",
            Modality::Text,
            OutputFormat::Json,
        ),
        command(
            "tesseract",
            "tesseract",
            "{image} stdout -l eng+chi_tra --psm 6",
            Modality::Text,
            OutputFormat::Plain,
        ),
        command("doctr", "doctr-cli", "{image} --json", Modality::Text, OutputFormat::Json),
        command("pix2tex", "pix2tex", "{image}", Modality::Formula, OutputFormat::Plain),
        command("trocr", "trocr-cli", "{image} --json", Modality::Formula, OutputFormat::Json),
        AdapterSpec::Mathpix(MathpixSpec::default()),
    ]
}

/// Worker configuration: the cascade plus the adapters that feed it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default)]
    pub cascade: CascadeConfig,
    #[serde(default = "default_adapters")]
    pub adapters: Vec<AdapterSpec>,
    #[serde(default = "default_max_concurrent_blocks")]
    pub max_concurrent_blocks: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            cascade: CascadeConfig::default(),
            adapters: default_adapters(),
            max_concurrent_blocks: default_max_concurrent_blocks(),
        }
    }
}

impl WorkerConfig {
    /// Load from a TOML file, or defaults when no path is given. Environment
    /// overrides are applied in both cases.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read worker config {}", path.display()))?;
                toml::from_str::<WorkerConfig>(&content)
                    .with_context(|| format!("Invalid worker config {}", path.display()))?
            }
            None => WorkerConfig::default(),
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.cascade.apply_env_overrides()?;
        if let Ok(raw) = std::env::var("OCR_MAX_CONCURRENT_BLOCKS") {
            self.max_concurrent_blocks = raw
                .trim()
                .parse()
                .with_context(|| format!("Invalid value for OCR_MAX_CONCURRENT_BLOCKS: {:?}", raw))?;
        }
        if self.max_concurrent_blocks == 0 {
            warn!("max_concurrent_blocks is 0, using 1");
            self.max_concurrent_blocks = 1;
        }
        Ok(())
    }

    /// Build and initialize every configured adapter. Adapters that fail to
    /// initialize are left out of the registry.
    pub async fn build_registry(&self) -> Result<EngineRegistry> {
        let candidates = self
            .adapters
            .iter()
            .map(AdapterSpec::build)
            .collect::<Result<Vec<_>>>()?;

        let (registry, failures) = EngineRegistry::initialize_all(candidates).await;
        if !failures.is_empty() {
            let names: Vec<&str> = failures.iter().map(|(name, _)| name.as_str()).collect();
            warn!(?names, "Some OCR engines are unavailable");
        }
        Ok(registry)
    }

    /// Build the cascade controller over an already-built registry.
    pub fn controller(&self, registry: EngineRegistry) -> Result<CascadeController> {
        let quota = Arc::new(QuotaGuard::from_config(&self.cascade.quota));
        let controller = CascadeController::new(registry, &self.cascade, quota, Arc::new(UsageStats::new()))
            .context("Cannot start the OCR cascade")?;
        info!(max_concurrent_blocks = self.max_concurrent_blocks, "OCR worker configured");
        Ok(controller)
    }
}
