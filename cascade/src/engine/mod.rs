//! Engine adapters and the name → adapter registry
//!
//! Every recognizer is wrapped in an [`OcrEngine`]. The trait carries
//! default bodies for both recognition methods, so an adapter only overrides
//! the modalities it is built for; the other one answers with a stub
//! low-confidence result and the cascade treats it like any weak attempt.

pub mod command;
pub mod mathpix;

pub use command::{CommandEngine, CommandEngineConfig, OutputFormat};
pub use mathpix::{MathpixConfig, MathpixEngine};

use async_trait::async_trait;
use futures::future::join_all;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::EngineError;
use crate::model::{Modality, RawRecognition};

/// Capability contract for one concrete recognizer.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Registry key, e.g. "pix2tex"
    fn name(&self) -> &str;

    /// Modalities this engine actually recognizes.
    fn modalities(&self) -> &[Modality];

    fn supports(&self, modality: Modality) -> bool {
        self.modalities().contains(&modality)
    }

    /// Load models, probe binaries, check credentials.
    async fn initialize(&self) -> Result<(), EngineError> {
        Ok(())
    }

    /// Release resources held since `initialize`.
    async fn cleanup(&self) -> Result<(), EngineError> {
        Ok(())
    }

    async fn recognize_text(&self, _image_path: &Path) -> Result<RawRecognition, EngineError> {
        Ok(RawRecognition::unsupported(self.name()))
    }

    async fn recognize_formula(&self, _image_path: &Path) -> Result<RawRecognition, EngineError> {
        Ok(RawRecognition::unsupported(self.name()))
    }

    /// Dispatch to the method matching `modality`.
    async fn recognize(
        &self,
        modality: Modality,
        image_path: &Path,
    ) -> Result<RawRecognition, EngineError> {
        match modality {
            Modality::Text => self.recognize_text(image_path).await,
            Modality::Formula => self.recognize_formula(image_path).await,
        }
    }
}

/// Name → adapter mapping built at startup.
///
/// Engines missing from the registry are simply unavailable; the cascade
/// skips fallbacks it cannot find and records an "unavailable" attempt for
/// a missing primary.
#[derive(Clone, Default)]
pub struct EngineRegistry {
    engines: HashMap<String, Arc<dyn OcrEngine>>,
}

impl std::fmt::Debug for EngineRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineRegistry")
            .field("engines", &self.names())
            .finish()
    }
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an already-initialized engine. Returns the engine it replaced.
    pub fn register(&mut self, engine: Arc<dyn OcrEngine>) -> Option<Arc<dyn OcrEngine>> {
        self.engines.insert(engine.name().to_string(), engine)
    }

    /// Initialize every candidate and keep the ones that came up.
    ///
    /// Failures are logged and returned alongside the registry; they never
    /// abort startup.
    pub async fn initialize_all(
        candidates: Vec<Arc<dyn OcrEngine>>,
    ) -> (Self, Vec<(String, EngineError)>) {
        let outcomes = join_all(candidates.into_iter().map(|engine| async move {
            let outcome = engine.initialize().await;
            (engine, outcome)
        }))
        .await;

        let mut registry = Self::new();
        let mut failures = Vec::new();
        for (engine, outcome) in outcomes {
            match outcome {
                Ok(()) => {
                    info!(engine = engine.name(), modalities = ?engine.modalities(), "OCR engine ready");
                    if registry.register(Arc::clone(&engine)).is_some() {
                        warn!(engine = engine.name(), "Duplicate engine name, keeping the last one");
                    }
                }
                Err(e) => {
                    warn!(engine = engine.name(), error = %e, "OCR engine failed to initialize, skipping");
                    failures.push((engine.name().to_string(), e));
                }
            }
        }

        info!(count = registry.len(), "OCR engine registry initialized");
        (registry, failures)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn OcrEngine>> {
        self.engines.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.engines.contains_key(name)
    }

    /// Registered engine names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.engines.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.engines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }

    /// Run `cleanup` on every engine; errors are logged only.
    pub async fn cleanup_all(&self) {
        info!("Cleaning up OCR engine resources");
        for (name, engine) in &self.engines {
            if let Err(e) = engine.cleanup().await {
                warn!(engine = %name, error = %e, "Engine cleanup failed");
            }
        }
    }
}
