//! Cascade Controller — deterministic tier walk for one image block
//!
//! Consumes a block path and a quality tier and produces an [`OcrResult`].
//! Every engine call goes through the attempt ledger, so adapter failures
//! arrive here as zero-confidence attempts and never as errors.

use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn, Instrument};
use uuid::Uuid;

use crate::config::{CascadeConfig, EnginePriorities, Thresholds};
use crate::engine::EngineRegistry;
use crate::error::{CascadeError, CascadeResult};
use crate::escalation::state::ResolutionTrail;
use crate::ledger::{AttemptLedger, OcrAttempt};
use crate::model::{CascadeStage, Modality, OcrResult, QualityTier};
use crate::otel;
use crate::quota::QuotaGuard;
use crate::stats::{UsageSnapshot, UsageStats};

/// The escalation policy. Shared across concurrent resolutions via `Arc`.
#[derive(Debug)]
pub struct CascadeController {
    ledger: AttemptLedger,
    priorities: EnginePriorities,
    thresholds: Thresholds,
    quota: Arc<QuotaGuard>,
    stats: Arc<UsageStats>,
}

impl CascadeController {
    /// Build a controller over an initialized registry.
    ///
    /// Fails when the configuration is invalid or when a modality has none
    /// of its configured engines registered.
    pub fn new(
        registry: EngineRegistry,
        config: &CascadeConfig,
        quota: Arc<QuotaGuard>,
        stats: Arc<UsageStats>,
    ) -> CascadeResult<Self> {
        config.validate()?;

        for modality in Modality::all() {
            let priority = config.engines.for_modality(*modality);
            let missing: Vec<&str> = priority
                .engine_names()
                .filter(|name| !registry.contains(name))
                .collect();

            if priority.engine_names().all(|name| !registry.contains(name)) {
                return Err(CascadeError::NoEngines(*modality));
            }
            if !missing.is_empty() {
                warn!(%modality, ?missing, "Configured engines are not registered and will be skipped");
            }
        }

        info!(
            engines = ?registry.names(),
            text_threshold = config.thresholds.text_confidence,
            formula_threshold = config.thresholds.formula_confidence,
            "Cascade controller ready"
        );

        Ok(Self {
            ledger: AttemptLedger::new(registry),
            priorities: config.engines.clone(),
            thresholds: config.thresholds.clone(),
            quota,
            stats,
        })
    }

    pub async fn resolve_text_block(&self, image_path: &Path, quality: QualityTier) -> OcrResult {
        self.resolve_block(Modality::Text, image_path, quality).await
    }

    pub async fn resolve_formula_block(&self, image_path: &Path, quality: QualityTier) -> OcrResult {
        self.resolve_block(Modality::Formula, image_path, quality).await
    }

    /// Walk the cascade for `modality`. Always returns a result.
    pub async fn resolve_block(
        &self,
        modality: Modality,
        image_path: &Path,
        quality: QualityTier,
    ) -> OcrResult {
        let resolution_id = Uuid::new_v4();
        let span = otel::resolve_block_span(resolution_id, modality, quality);

        let result = self
            .walk(ResolutionTrail::new(resolution_id, modality), image_path, quality)
            .instrument(span.clone())
            .await;

        self.stats.record_request(
            result.is_successful,
            result.is_successful && result.stage == CascadeStage::Fallback,
            result.used_emergency(),
        );
        otel::record_resolution(&span, &result);

        if result.is_successful {
            info!(
                %modality,
                engine = %result.engine_used,
                stage = %result.stage,
                confidence = result.confidence,
                attempts = result.attempts.len(),
                "Block resolved"
            );
        } else {
            warn!(
                %modality,
                engine = %result.engine_used,
                confidence = result.confidence,
                attempts = result.attempts.len(),
                path = %image_path.display(),
                "No tier accepted the block, returning best effort"
            );
        }

        result
    }

    async fn walk(&self, mut trail: ResolutionTrail, image_path: &Path, quality: QualityTier) -> OcrResult {
        let modality = trail.modality();
        let priority = self.priorities.for_modality(modality);

        // Primary is always attempted so the trail is never empty
        if self
            .step(&mut trail, &priority.primary, image_path, quality, CascadeStage::Primary)
            .await
        {
            return trail.accept_last();
        }

        for fallback in &priority.fallback {
            if !self.ledger.registry().contains(fallback) {
                continue;
            }
            if self
                .step(&mut trail, fallback, image_path, quality, CascadeStage::Fallback)
                .await
            {
                return trail.accept_last();
            }
        }

        if !quality.is_highest()
            && self
                .step(
                    &mut trail,
                    &priority.primary,
                    image_path,
                    QualityTier::HIGHEST,
                    CascadeStage::QualityRetry,
                )
                .await
        {
            return trail.accept_last();
        }

        if modality == Modality::Formula {
            if let Some(emergency) = priority.emergency.as_deref() {
                if self.ledger.registry().contains(emergency) && self.quota.try_consume_emergency_quota() {
                    if self
                        .step(
                            &mut trail,
                            emergency,
                            image_path,
                            QualityTier::HIGHEST,
                            CascadeStage::Emergency,
                        )
                        .await
                    {
                        return trail.accept_last();
                    }
                }
            }
        }

        trail.best_effort()
    }

    /// Run one attempt, append it to the trail and report whether it is accepted.
    async fn step(
        &self,
        trail: &mut ResolutionTrail,
        engine: &str,
        image_path: &Path,
        quality: QualityTier,
        stage: CascadeStage,
    ) -> bool {
        let modality = trail.modality();
        let attempt = self
            .ledger
            .attempt(engine, image_path, modality, quality, trail.next_attempt_number(), stage)
            .await;
        let attempt = trail.push(attempt);
        self.accepts(modality, stage, attempt)
    }

    /// Text needs the confidence threshold; formulas also need to compile,
    /// except at the emergency tier where compiling is enough. A failed text
    /// attempt is never accepted, which only matters for a zero threshold
    /// since failures seal at confidence 0.
    fn accepts(&self, modality: Modality, stage: CascadeStage, attempt: &OcrAttempt) -> bool {
        let threshold = self.thresholds.for_modality(modality);
        match (modality, stage) {
            (Modality::Text, _) => !attempt.is_failure() && attempt.confidence() >= threshold,
            // Emergency acceptance only needs a compilable formula
            (Modality::Formula, CascadeStage::Emergency) => attempt.is_compilable(),
            (Modality::Formula, _) => attempt.is_compilable() && attempt.confidence() >= threshold,
        }
    }

    pub fn registry(&self) -> &EngineRegistry {
        self.ledger.registry()
    }

    pub fn quota(&self) -> &Arc<QuotaGuard> {
        &self.quota
    }

    pub fn stats(&self) -> &Arc<UsageStats> {
        &self.stats
    }

    pub fn stats_snapshot(&self) -> UsageSnapshot {
        self.stats.snapshot(&self.quota)
    }
}
