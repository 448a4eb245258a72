//! OCR Cascade Library
//!
//! Multi-engine escalation core for photographed math and physics problems.
//! Each classified image block is resolved by walking a ladder of
//! recognition engines until one produces an acceptable result:
//!
//! - [`engine`]: adapter contract and the name → adapter registry
//! - [`ledger`]: timed, sealed record of every engine call
//! - [`latex`]: compilability check and confidence heuristic for formulas
//! - [`quota`]: daily ceiling on the metered emergency engine
//! - [`escalation`]: the cascade controller itself
//! - [`stats`]: process-wide usage counters
//!
//! # Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use ocr_cascade::{CascadeConfig, CascadeController, EngineRegistry, QualityTier, QuotaGuard, UsageStats};
//!
//! let config = CascadeConfig::default();
//! let (registry, _failures) = EngineRegistry::initialize_all(engines).await;
//! let controller = CascadeController::new(
//!     registry,
//!     &config,
//!     Arc::new(QuotaGuard::from_config(&config.quota)),
//!     Arc::new(UsageStats::new()),
//! )?;
//! let result = controller.resolve_formula_block(path, QualityTier::B).await;
//! ```

#![allow(clippy::uninlined_format_args)]

pub mod config;
pub mod engine;
pub mod error;
pub mod escalation;
pub mod latex;
pub mod ledger;
pub mod model;
pub mod otel;
pub mod quota;
pub mod stats;

pub use config::{CascadeConfig, EnginePriorities, ModalityPriority, QuotaConfig, Thresholds};
pub use engine::{
    CommandEngine, CommandEngineConfig, EngineRegistry, MathpixConfig, MathpixEngine, OcrEngine,
};
pub use error::{CascadeError, CascadeResult, EngineError};
pub use escalation::CascadeController;
pub use ledger::{AttemptLedger, OcrAttempt};
pub use model::{
    CascadeStage, ConfidenceLevel, Modality, OcrResult, QualityProfile, QualityTier,
    RawRecognition, UNSUPPORTED_MODALITY_CONFIDENCE,
};
pub use quota::{QuotaGuard, QuotaStatus};
pub use stats::{UsageSnapshot, UsageStats};
