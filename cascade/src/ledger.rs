//! Attempt Ledger — timing and error capture around one adapter call
//!
//! An attempt is opened before the adapter runs and sealed when it returns.
//! Sealing is the only way to obtain an [`OcrAttempt`], and a sealed
//! attempt exposes read-only accessors. Adapter failures, timeouts, panics
//! and unknown engine names all seal as zero-confidence attempts; nothing
//! here returns an error to the cascade.

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, warn, Instrument};

use crate::engine::EngineRegistry;
use crate::error::EngineError;
use crate::latex;
use crate::model::{CascadeStage, Modality, QualityTier, RawRecognition};
use crate::otel;

/// Sealed record of one recognition attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrAttempt {
    engine: String,
    attempt_number: u32,
    quality: QualityTier,
    stage: CascadeStage,
    started_at: DateTime<Utc>,
    ended_at: DateTime<Utc>,
    duration_ms: f64,
    confidence: f64,
    text: Option<String>,
    is_compilable: bool,
    error: Option<String>,
}

impl OcrAttempt {
    pub fn engine(&self) -> &str {
        &self.engine
    }

    /// 1-based, strictly increasing within one resolution.
    pub fn attempt_number(&self) -> u32 {
        self.attempt_number
    }

    pub fn quality(&self) -> QualityTier {
        self.quality
    }

    pub fn stage(&self) -> CascadeStage {
        self.stage
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn ended_at(&self) -> DateTime<Utc> {
        self.ended_at
    }

    pub fn duration_ms(&self) -> f64 {
        self.duration_ms
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    /// Always false for text attempts.
    pub fn is_compilable(&self) -> bool {
        self.is_compilable
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_failure(&self) -> bool {
        self.error.is_some()
    }

    #[cfg(test)]
    pub(crate) fn sealed_for_test(
        attempt_number: u32,
        engine: &str,
        stage: CascadeStage,
        confidence: f64,
        text: Option<&str>,
        is_compilable: bool,
    ) -> Self {
        let now = Utc::now();
        Self {
            engine: engine.to_string(),
            attempt_number,
            quality: QualityTier::B,
            stage,
            started_at: now,
            ended_at: now,
            duration_ms: 0.0,
            confidence,
            text: text.map(str::to_string),
            is_compilable,
            error: text.is_none().then(|| "no output".to_string()),
        }
    }
}

/// An attempt that has started but not yet been sealed.
#[derive(Debug)]
struct OpenAttempt {
    engine: String,
    attempt_number: u32,
    quality: QualityTier,
    stage: CascadeStage,
    modality: Modality,
    started_at: DateTime<Utc>,
    clock: Instant,
}

impl OpenAttempt {
    fn open(
        engine: &str,
        attempt_number: u32,
        quality: QualityTier,
        stage: CascadeStage,
        modality: Modality,
    ) -> Self {
        Self {
            engine: engine.to_string(),
            attempt_number,
            quality,
            stage,
            modality,
            started_at: Utc::now(),
            clock: Instant::now(),
        }
    }

    fn seal(self, outcome: Result<RawRecognition, EngineError>) -> OcrAttempt {
        let duration_ms = self.clock.elapsed().as_secs_f64() * 1000.0;
        let ended_at = Utc::now();

        let (confidence, text, error) = match outcome {
            Ok(raw) => (raw.confidence.clamp(0.0, 1.0), Some(raw.text), None),
            Err(e) => (0.0, None, Some(e.to_string())),
        };

        let is_compilable = self.modality == Modality::Formula
            && text.as_deref().is_some_and(latex::is_compilable);

        OcrAttempt {
            engine: self.engine,
            attempt_number: self.attempt_number,
            quality: self.quality,
            stage: self.stage,
            started_at: self.started_at,
            ended_at,
            duration_ms,
            // NaN from a misbehaving adapter counts as no confidence
            confidence: if confidence.is_nan() { 0.0 } else { confidence },
            text,
            is_compilable,
            error,
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Runs adapters from a registry and seals their outcomes.
#[derive(Debug, Clone)]
pub struct AttemptLedger {
    registry: EngineRegistry,
}

impl AttemptLedger {
    pub fn new(registry: EngineRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &EngineRegistry {
        &self.registry
    }

    /// Run one attempt and return its sealed record. Never fails.
    pub async fn attempt(
        &self,
        engine_name: &str,
        image_path: &Path,
        modality: Modality,
        quality: QualityTier,
        attempt_number: u32,
        stage: CascadeStage,
    ) -> OcrAttempt {
        let span = otel::attempt_span(engine_name, attempt_number, stage, quality);
        let open = OpenAttempt::open(engine_name, attempt_number, quality, stage, modality);

        let outcome = match self.registry.get(engine_name) {
            Some(engine) => AssertUnwindSafe(engine.recognize(modality, image_path))
                .catch_unwind()
                .instrument(span.clone())
                .await
                .unwrap_or_else(|payload| {
                    Err(EngineError::Panicked {
                        engine: engine_name.to_string(),
                        message: panic_message(payload.as_ref()),
                    })
                }),
            None => Err(EngineError::Unavailable(engine_name.to_string())),
        };

        let sealed = open.seal(outcome);
        otel::record_attempt_result(
            &span,
            sealed.confidence,
            sealed.is_compilable,
            !sealed.is_failure(),
            sealed.duration_ms,
        );

        match &sealed.error {
            None => debug!(
                engine = engine_name,
                attempt = attempt_number,
                stage = %stage,
                quality = %quality,
                confidence = sealed.confidence,
                compilable = sealed.is_compilable,
                "OCR attempt finished"
            ),
            Some(error) => warn!(
                engine = engine_name,
                attempt = attempt_number,
                stage = %stage,
                error = %error,
                "OCR attempt failed"
            ),
        }

        sealed
    }
}
