//! Batch runner: resolves every block of a manifest through the cascade
//!
//! Blocks run concurrently, bounded by a semaphore; each block still walks
//! its own cascade sequentially. Results come back in manifest order.

use chrono::{DateTime, Utc};
use ocr_cascade::{CascadeController, OcrResult, QuotaStatus, UsageSnapshot};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info};

use crate::manifest::{Block, BlockKind, Manifest};

/// Outcome for one manifest block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockOutcome {
    pub id: String,
    pub kind: BlockKind,
    /// `None` for blocks that are not recognized (figures) and for blocks
    /// whose resolution task died
    pub result: Option<OcrResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BlockOutcome {
    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }
}

/// A block's place in the report, filled in when its task reports back.
enum Slot {
    Pending { id: String, kind: BlockKind },
    Done(BlockOutcome),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSummary {
    pub blocks: usize,
    pub recognized: usize,
    pub successful: usize,
    pub needs_review: usize,
    pub skipped: usize,
    pub failed: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub stats: UsageSnapshot,
    pub quota: QuotaStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub outcomes: Vec<BlockOutcome>,
    pub summary: BatchSummary,
}

pub struct BatchRunner {
    controller: Arc<CascadeController>,
    max_concurrent: usize,
}

impl BatchRunner {
    pub fn new(controller: Arc<CascadeController>, max_concurrent: usize) -> Self {
        Self {
            controller,
            max_concurrent: max_concurrent.max(1),
        }
    }

    pub fn controller(&self) -> &Arc<CascadeController> {
        &self.controller
    }

    pub async fn run(&self, manifest: Manifest) -> BatchReport {
        let started_at = Utc::now();
        let total = manifest.blocks.len();
        info!(blocks = total, max_concurrent = self.max_concurrent, "Starting OCR batch");

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut tasks = JoinSet::new();
        let mut slots = Vec::with_capacity(total);

        for (index, block) in manifest.blocks.into_iter().enumerate() {
            let Some(modality) = block.kind.modality() else {
                slots.push(Slot::Done(BlockOutcome {
                    id: block.id,
                    kind: block.kind,
                    result: None,
                    error: None,
                }));
                continue;
            };
            slots.push(Slot::Pending {
                id: block.id.clone(),
                kind: block.kind,
            });

            let controller = Arc::clone(&self.controller);
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                // The semaphore is never closed
                let _permit = semaphore.acquire_owned().await.ok();
                let Block {
                    id,
                    kind,
                    image_path,
                    quality,
                } = block;
                let result = controller.resolve_block(modality, &image_path, quality).await;
                (
                    index,
                    BlockOutcome {
                        id,
                        kind,
                        result: Some(result),
                        error: None,
                    },
                )
            });
        }

        let outcomes = collect_outcomes(tasks, slots).await;
        let summary = self.summarize(&outcomes, total, started_at);
        info!(
            blocks = summary.blocks,
            successful = summary.successful,
            needs_review = summary.needs_review,
            failed = summary.failed,
            "OCR batch finished"
        );

        BatchReport { outcomes, summary }
    }

    fn summarize(&self, outcomes: &[BlockOutcome], total: usize, started_at: DateTime<Utc>) -> BatchSummary {
        let results: Vec<&OcrResult> = outcomes.iter().filter_map(|o| o.result.as_ref()).collect();
        BatchSummary {
            blocks: total,
            recognized: results.len(),
            successful: results.iter().filter(|r| r.is_successful).count(),
            needs_review: results.iter().filter(|r| r.needs_review()).count(),
            skipped: outcomes
                .iter()
                .filter(|o| o.result.is_none() && !o.is_failed())
                .count(),
            failed: outcomes.iter().filter(|o| o.is_failed()).count(),
            started_at,
            finished_at: Utc::now(),
            stats: self.controller.stats_snapshot(),
            quota: self.controller.quota().status(),
        }
    }
}

/// Drain the task set into the slots. A block whose task never reported
/// back is kept in the report as failed rather than dropped.
async fn collect_outcomes(mut tasks: JoinSet<(usize, BlockOutcome)>, mut slots: Vec<Slot>) -> Vec<BlockOutcome> {
    let mut last_error = None;
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((index, outcome)) => slots[index] = Slot::Done(outcome),
            Err(e) => {
                error!(error = %e, "Block resolution task failed");
                last_error = Some(e.to_string());
            }
        }
    }

    slots
        .into_iter()
        .map(|slot| match slot {
            Slot::Done(outcome) => outcome,
            Slot::Pending { id, kind } => {
                let reason = last_error
                    .clone()
                    .unwrap_or_else(|| "resolution task did not report back".to_string());
                error!(block = %id, "No result for block, reporting it as failed");
                BlockOutcome {
                    id,
                    kind,
                    result: None,
                    error: Some(format!("resolution task failed: {}", reason)),
                }
            }
        })
        .collect()
}
