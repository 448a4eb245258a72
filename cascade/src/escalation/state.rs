//! Resolution state — the attempt trail of one block and how it becomes a result

use chrono::Utc;
use std::time::Instant;
use uuid::Uuid;

use crate::ledger::OcrAttempt;
use crate::model::{CascadeStage, ConfidenceLevel, Modality, OcrResult};

const TEXT_REMEDIATION: &str =
    "low confidence: retake the photo at higher resolution or correct the text manually";
const FORMULA_REMEDIATION: &str =
    "formula did not pass the compilability check: review the LaTeX manually";

/// Attempts gathered while walking one cascade.
#[derive(Debug)]
pub struct ResolutionTrail {
    resolution_id: Uuid,
    modality: Modality,
    attempts: Vec<OcrAttempt>,
    emergency_used: bool,
    clock: Instant,
}

impl ResolutionTrail {
    pub fn new(resolution_id: Uuid, modality: Modality) -> Self {
        Self {
            resolution_id,
            modality,
            attempts: Vec::new(),
            emergency_used: false,
            clock: Instant::now(),
        }
    }

    pub fn modality(&self) -> Modality {
        self.modality
    }

    /// Sequence number for the next attempt.
    pub fn next_attempt_number(&self) -> u32 {
        self.attempts.len() as u32 + 1
    }

    pub fn push(&mut self, attempt: OcrAttempt) -> &OcrAttempt {
        if attempt.stage() == CascadeStage::Emergency {
            self.emergency_used = true;
        }
        self.attempts.push(attempt);
        &self.attempts[self.attempts.len() - 1]
    }

    pub fn attempts(&self) -> &[OcrAttempt] {
        &self.attempts
    }

    pub fn emergency_used(&self) -> bool {
        self.emergency_used
    }

    /// Close the trail with the most recent attempt as the accepted one.
    pub fn accept_last(self) -> OcrResult {
        let index = self.attempts.len().saturating_sub(1);
        let stage = self.attempts[index].stage();
        self.finish(index, stage, true)
    }

    /// Close the trail without an accepted attempt.
    ///
    /// Text: highest confidence wins and the result is unsuccessful.
    /// Formula: highest-confidence compilable attempt if any, otherwise the
    /// highest overall; successful only when the pick is compilable.
    /// Ties go to the earliest attempt.
    pub fn best_effort(self) -> OcrResult {
        let index = match self.modality {
            Modality::Text => first_max(self.attempts.iter().enumerate()),
            Modality::Formula => first_max(
                self.attempts
                    .iter()
                    .enumerate()
                    .filter(|(_, a)| a.is_compilable()),
            )
            .or_else(|| first_max(self.attempts.iter().enumerate())),
        }
        .unwrap_or(0);

        let successful = self.modality == Modality::Formula && self.attempts[index].is_compilable();
        self.finish(index, CascadeStage::BestEffort, successful)
    }

    fn finish(self, index: usize, stage: CascadeStage, is_successful: bool) -> OcrResult {
        let chosen = &self.attempts[index];
        let confidence = chosen.confidence();
        let text = chosen.text().unwrap_or_default().to_string();
        let engine_used = chosen.engine().to_string();
        let chosen_attempt = chosen.attempt_number();
        let is_compilable = self.modality == Modality::Formula && chosen.is_compilable();

        let remediation = if is_successful {
            None
        } else {
            Some(
                match self.modality {
                    Modality::Text => TEXT_REMEDIATION,
                    Modality::Formula => FORMULA_REMEDIATION,
                }
                .to_string(),
            )
        };

        OcrResult {
            resolution_id: self.resolution_id,
            modality: self.modality,
            text,
            confidence,
            confidence_level: ConfidenceLevel::from_confidence(confidence),
            engine_used,
            chosen_attempt,
            stage,
            attempts: self.attempts,
            is_successful,
            is_compilable,
            processing_time_ms: self.clock.elapsed().as_secs_f64() * 1000.0,
            completed_at: Utc::now(),
            remediation,
        }
    }
}

/// Index of the first attempt with the maximum confidence.
fn first_max<'a>(attempts: impl Iterator<Item = (usize, &'a OcrAttempt)>) -> Option<usize> {
    attempts
        .fold(None::<(usize, f64)>, |best, (i, a)| match best {
            Some((_, c)) if c >= a.confidence() => best,
            _ => Some((i, a.confidence())),
        })
        .map(|(i, _)| i)
}
