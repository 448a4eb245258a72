//! Result model: modalities, quality tiers, raw recognitions and final results

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use uuid::Uuid;

use crate::ledger::OcrAttempt;

/// Confidence an adapter reports for a modality it is not built for.
pub const UNSUPPORTED_MODALITY_CONFIDENCE: f64 = 0.1;

/// Which recognition path a block goes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    /// Problem stems, options, solutions
    Text,
    /// LaTeX formula regions
    Formula,
}

impl Modality {
    pub fn all() -> &'static [Modality] {
        &[Modality::Text, Modality::Formula]
    }
}

impl std::fmt::Display for Modality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Formula => write!(f, "formula"),
        }
    }
}

/// Image-fidelity preset handed over by the preprocessing pipeline.
///
/// Strictly ordered: `A > B > C`. `A` is the original, largest image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum QualityTier {
    A,
    #[default]
    B,
    C,
}

/// Preprocessing targets associated with a quality tier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct QualityProfile {
    /// Minimum long-edge resolution in pixels
    pub min_resolution: u32,
    /// Minimum normalized contrast
    pub min_contrast: f64,
    /// Expected noise level ("low", "medium", "high")
    pub noise_level: &'static str,
}

impl QualityTier {
    /// The highest-fidelity tier, target of the quality retry.
    pub const HIGHEST: QualityTier = QualityTier::A;

    fn rank(self) -> u8 {
        match self {
            Self::A => 3,
            Self::B => 2,
            Self::C => 1,
        }
    }

    pub fn is_highest(self) -> bool {
        self == Self::HIGHEST
    }

    pub fn profile(self) -> QualityProfile {
        match self {
            Self::A => QualityProfile {
                min_resolution: 2000,
                min_contrast: 0.8,
                noise_level: "low",
            },
            Self::B => QualityProfile {
                min_resolution: 1200,
                min_contrast: 0.6,
                noise_level: "medium",
            },
            Self::C => QualityProfile {
                min_resolution: 800,
                min_contrast: 0.4,
                noise_level: "high",
            },
        }
    }
}

impl PartialOrd for QualityTier {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QualityTier {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl std::fmt::Display for QualityTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::A => write!(f, "A"),
            Self::B => write!(f, "B"),
            Self::C => write!(f, "C"),
        }
    }
}

impl FromStr for QualityTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "A" => Ok(Self::A),
            "B" => Ok(Self::B),
            "C" => Ok(Self::C),
            other => Err(format!("unknown quality tier '{}' (expected A, B or C)", other)),
        }
    }
}

/// Coarse confidence bucket shown to reviewers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceLevel {
    /// >= 0.9
    High,
    /// [0.7, 0.9)
    Medium,
    /// < 0.7
    Low,
}

impl ConfidenceLevel {
    pub fn from_confidence(confidence: f64) -> Self {
        if confidence >= 0.9 {
            Self::High
        } else if confidence >= 0.7 {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

/// Tier of the cascade that issued an attempt or produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CascadeStage {
    Primary,
    Fallback,
    QualityRetry,
    Emergency,
    BestEffort,
}

impl std::fmt::Display for CascadeStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Primary => write!(f, "primary"),
            Self::Fallback => write!(f, "fallback"),
            Self::QualityRetry => write!(f, "quality_retry"),
            Self::Emergency => write!(f, "emergency"),
            Self::BestEffort => write!(f, "best_effort"),
        }
    }
}

/// What one adapter call returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecognition {
    pub text: String,
    /// Engine-reported confidence in [0, 1]
    pub confidence: f64,
    /// Engine-specific extras (request ids, raw scores, ...)
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl RawRecognition {
    pub fn new(text: impl Into<String>, confidence: f64) -> Self {
        Self {
            text: text.into(),
            confidence,
            metadata: HashMap::new(),
        }
    }

    /// Stub result for a modality the engine does not handle.
    pub fn unsupported(engine: &str) -> Self {
        Self::new(String::new(), UNSUPPORTED_MODALITY_CONFIDENCE)
            .with_metadata("engine", engine)
            .with_metadata("unsupported_modality", true)
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

/// Final outcome of one block resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrResult {
    /// Correlates log lines of one resolution
    pub resolution_id: Uuid,
    pub modality: Modality,
    pub text: String,
    pub confidence: f64,
    pub confidence_level: ConfidenceLevel,
    /// Engine of the attempt that determined `text`
    pub engine_used: String,
    /// Sequence number of the attempt that determined the result
    pub chosen_attempt: u32,
    /// Tier that produced the result (`BestEffort` when nothing was accepted)
    pub stage: CascadeStage,
    pub attempts: Vec<OcrAttempt>,
    pub is_successful: bool,
    /// Always false for text blocks
    pub is_compilable: bool,
    pub processing_time_ms: f64,
    pub completed_at: DateTime<Utc>,
    /// Suggested follow-up for reviewers when unsuccessful
    pub remediation: Option<String>,
}

impl OcrResult {
    /// The attempt whose output was returned.
    pub fn determining_attempt(&self) -> Option<&OcrAttempt> {
        self.attempts
            .iter()
            .find(|a| a.attempt_number() == self.chosen_attempt)
    }

    /// Whether any attempt went to the emergency engine.
    pub fn used_emergency(&self) -> bool {
        self.attempts
            .iter()
            .any(|a| a.stage() == CascadeStage::Emergency)
    }

    /// Whether the result should be routed to human review.
    pub fn needs_review(&self) -> bool {
        !self.is_successful || self.confidence_level == ConfidenceLevel::Low
    }
}
