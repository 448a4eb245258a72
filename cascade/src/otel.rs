//! OpenTelemetry-Compatible Span Helpers
//!
//! Structured `tracing` span builders for the OCR cascade. Field names use
//! dot notation so an OTLP exporter can forward them unchanged.
//!
//! # Span Hierarchy
//!
//! ```text
//! ocr.resolve_block        (root — one per image block)
//!   └─ ocr.attempt         (one per engine invocation)
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use ocr_cascade::otel;
//!
//! let span = otel::resolve_block_span(id, Modality::Formula, QualityTier::B);
//! let guard = span.enter();
//! // ... walk the cascade ...
//! otel::record_resolution(&span, &result);
//! drop(guard);
//! ```

use tracing::Span;
use uuid::Uuid;

use crate::model::{CascadeStage, Modality, OcrResult, QualityTier};

// ── Span Name Constants ──────────────────────────────────────────────

/// Root span for resolving one image block.
pub const SPAN_RESOLVE_BLOCK: &str = "ocr.resolve_block";

/// One engine invocation inside a resolution.
pub const SPAN_ATTEMPT: &str = "ocr.attempt";

// ── Field Name Constants ─────────────────────────────────────────────

pub const FIELD_RESOLUTION_ID: &str = "ocr.resolution.id";
pub const FIELD_MODALITY: &str = "ocr.modality";
pub const FIELD_QUALITY: &str = "ocr.quality";
pub const FIELD_ENGINE: &str = "ocr.engine";
pub const FIELD_STAGE: &str = "ocr.stage";
pub const FIELD_ATTEMPT: &str = "ocr.attempt.number";
pub const FIELD_ATTEMPT_COUNT: &str = "ocr.attempt.count";
pub const FIELD_CONFIDENCE: &str = "ocr.confidence";
pub const FIELD_COMPILABLE: &str = "ocr.compilable";
pub const FIELD_SUCCESS: &str = "ocr.success";
pub const FIELD_DURATION_MS: &str = "ocr.duration_ms";

// ── Span Builders ────────────────────────────────────────────────────

/// Create the root span for one block resolution.
///
/// Fields filled later via [`record_resolution`]: engine, stage, attempt
/// count, confidence, success, duration.
pub fn resolve_block_span(resolution_id: Uuid, modality: Modality, quality: QualityTier) -> Span {
    tracing::info_span!(
        "ocr.resolve_block",
        "ocr.resolution.id" = %resolution_id,
        "ocr.modality" = %modality,
        "ocr.quality" = %quality,
        "ocr.engine" = tracing::field::Empty,
        "ocr.stage" = tracing::field::Empty,
        "ocr.attempt.count" = tracing::field::Empty,
        "ocr.confidence" = tracing::field::Empty,
        "ocr.success" = tracing::field::Empty,
        "ocr.duration_ms" = tracing::field::Empty,
    )
}

/// Record the final result on a resolve_block span.
pub fn record_resolution(span: &Span, result: &OcrResult) {
    span.record("ocr.engine", result.engine_used.as_str());
    span.record("ocr.stage", tracing::field::display(result.stage));
    span.record("ocr.attempt.count", result.attempts.len() as u64);
    span.record("ocr.confidence", result.confidence);
    span.record("ocr.success", result.is_successful);
    span.record("ocr.duration_ms", result.processing_time_ms);
}

/// Create a span for a single engine attempt.
///
/// Fields filled later via [`record_attempt_result`]: confidence,
/// compilability, success, duration.
pub fn attempt_span(engine: &str, attempt: u32, stage: CascadeStage, quality: QualityTier) -> Span {
    tracing::debug_span!(
        "ocr.attempt",
        "ocr.engine" = %engine,
        "ocr.attempt.number" = attempt,
        "ocr.stage" = %stage,
        "ocr.quality" = %quality,
        "ocr.confidence" = tracing::field::Empty,
        "ocr.compilable" = tracing::field::Empty,
        "ocr.success" = tracing::field::Empty,
        "ocr.duration_ms" = tracing::field::Empty,
    )
}

/// Record the outcome of an attempt. `success` means the adapter returned
/// without error, not that the cascade accepted it.
pub fn record_attempt_result(
    span: &Span,
    confidence: f64,
    compilable: bool,
    success: bool,
    duration_ms: f64,
) {
    span.record("ocr.confidence", confidence);
    span.record("ocr.compilable", compilable);
    span.record("ocr.success", success);
    span.record("ocr.duration_ms", duration_ms);
}
