//! Integration tests for the Cascade Controller
//!
//! Scripted in-memory engines stand in for recognizers so every tier
//! transition can be driven deterministically.

use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use ocr_cascade::{
    CascadeConfig, CascadeController, CascadeError, CascadeStage, EngineError, EngineRegistry,
    Modality, OcrEngine, OcrResult, QualityTier, QuotaGuard, RawRecognition, UsageStats,
};

/// One scripted reply. The last reply repeats once the script runs out.
#[derive(Clone)]
enum Reply {
    Ok(&'static str, f64),
    Fail(&'static str),
    Panic(&'static str),
}

struct ScriptedEngine {
    name: &'static str,
    script: Vec<Reply>,
    calls: AtomicUsize,
}

impl ScriptedEngine {
    fn new(name: &'static str, script: Vec<Reply>) -> Arc<Self> {
        Arc::new(Self {
            name,
            script,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next(&self) -> Result<RawRecognition, EngineError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let reply = self.script[call.min(self.script.len() - 1)].clone();
        match reply {
            Reply::Ok(text, confidence) => Ok(RawRecognition::new(text, confidence)),
            Reply::Fail(reason) => Err(EngineError::Process(reason.to_string())),
            Reply::Panic(message) => panic!("{}", message),
        }
    }
}

#[async_trait]
impl OcrEngine for ScriptedEngine {
    fn name(&self) -> &str {
        self.name
    }

    fn modalities(&self) -> &[Modality] {
        &[Modality::Text, Modality::Formula]
    }

    async fn recognize_text(&self, _image_path: &Path) -> Result<RawRecognition, EngineError> {
        self.next()
    }

    async fn recognize_formula(&self, _image_path: &Path) -> Result<RawRecognition, EngineError> {
        self.next()
    }
}

fn build(engines: &[Arc<ScriptedEngine>], daily_limit: u64) -> CascadeController {
    let mut registry = EngineRegistry::new();
    for engine in engines {
        registry.register(engine.clone());
    }
    CascadeController::new(
        registry,
        &CascadeConfig::default(),
        Arc::new(QuotaGuard::new(daily_limit, 1000)),
        Arc::new(UsageStats::new()),
    )
    .expect("controller should build")
}

/// Properties every result must satisfy.
fn assert_well_formed(result: &OcrResult) {
    assert!(!result.attempts.is_empty(), "attempt trail must never be empty");
    for pair in result.attempts.windows(2) {
        assert!(pair[0].attempt_number() < pair[1].attempt_number());
    }
    let chosen = result
        .determining_attempt()
        .expect("chosen attempt must be in the trail");
    assert_eq!(result.engine_used, chosen.engine());
    assert_eq!(result.text, chosen.text().unwrap_or_default());
    assert_eq!(result.confidence, chosen.confidence());
    if result.modality == Modality::Formula && result.is_successful {
        assert!(result.is_compilable);
    }
    assert_eq!(result.is_successful, result.remediation.is_none());
}

const IMAGE: &str = "block.png";

/// Scenario A: confident primary text engine halts at PRIMARY.
#[tokio::test]
async fn test_confident_primary_halts_immediately() {
    let paddle = ScriptedEngine::new("paddleocr", vec![Reply::Ok("Find the velocity v", 0.95)]);
    let tesseract = ScriptedEngine::new("tesseract", vec![Reply::Ok("unused", 0.99)]);
    let doctr = ScriptedEngine::new("doctr", vec![Reply::Ok("unused", 0.99)]);
    let pix2tex = ScriptedEngine::new("pix2tex", vec![Reply::Ok("x", 0.9)]);
    let controller = build(&[paddle.clone(), tesseract.clone(), doctr.clone(), pix2tex], 10);

    let result = controller.resolve_text_block(Path::new(IMAGE), QualityTier::B).await;

    assert_well_formed(&result);
    assert!(result.is_successful);
    assert_eq!(result.stage, CascadeStage::Primary);
    assert_eq!(result.attempts.len(), 1);
    assert_eq!(result.engine_used, "paddleocr");
    assert_eq!(paddle.calls(), 1);
    assert_eq!(tesseract.calls(), 0, "no calls after an accepting tier");
    assert_eq!(doctr.calls(), 0);
}

/// Scenario B: high confidence does not rescue an uncompilable formula.
#[tokio::test]
async fn test_uncompilable_primary_formula_falls_back() {
    let paddle = ScriptedEngine::new("paddleocr", vec![Reply::Ok("a", 0.9)]);
    let pix2tex = ScriptedEngine::new("pix2tex", vec![Reply::Ok("\\frac{a}{b", 0.9)]);
    let trocr = ScriptedEngine::new("trocr", vec![Reply::Ok("\\frac{a}{b}", 0.8)]);
    let mathpix = ScriptedEngine::new("mathpix", vec![Reply::Ok("unused", 0.99)]);
    let controller = build(&[paddle, pix2tex.clone(), trocr.clone(), mathpix.clone()], 10);

    let result = controller.resolve_formula_block(Path::new(IMAGE), QualityTier::B).await;

    assert_well_formed(&result);
    assert_eq!(result.attempts.len(), 2);
    assert!(!result.attempts[0].is_compilable());
    assert_eq!(result.attempts[0].confidence(), 0.9);
    assert!(result.is_successful);
    assert!(result.is_compilable);
    assert_eq!(result.stage, CascadeStage::Fallback);
    assert_eq!(result.engine_used, "trocr");
    assert_eq!(result.text, "\\frac{a}{b}");
    assert_eq!(mathpix.calls(), 0);
    assert_eq!(controller.quota().daily_used(), 0);
}

/// Scenario C: every tier below threshold and quota exhausted.
#[tokio::test]
async fn test_exhausted_quota_skips_emergency_and_returns_best_effort() {
    let paddle = ScriptedEngine::new("paddleocr", vec![Reply::Ok("a", 0.9)]);
    let pix2tex = ScriptedEngine::new(
        "pix2tex",
        vec![Reply::Ok("x^{2", 0.3), Reply::Ok("\\sqrt{x", 0.5)],
    );
    let trocr = ScriptedEngine::new("trocr", vec![Reply::Ok("50% of x", 0.4)]);
    let mathpix = ScriptedEngine::new("mathpix", vec![Reply::Ok("x^2", 0.99)]);
    let controller = build(&[paddle, pix2tex.clone(), trocr, mathpix.clone()], 0);

    let result = controller.resolve_formula_block(Path::new(IMAGE), QualityTier::B).await;

    assert_well_formed(&result);
    let confidences: Vec<f64> = result.attempts.iter().map(|a| a.confidence()).collect();
    assert_eq!(confidences, vec![0.3, 0.4, 0.5]);
    assert!(!result.used_emergency());
    assert_eq!(mathpix.calls(), 0);
    assert_eq!(result.stage, CascadeStage::BestEffort);
    assert_eq!(result.confidence, 0.5);
    assert_eq!(result.attempts[2].stage(), CascadeStage::QualityRetry);
    assert!(!result.is_successful);
    assert!(result.remediation.is_some());
}

/// Scenario C on the text ladder, which has no emergency tier.
#[tokio::test]
async fn test_text_best_effort_returns_highest_confidence() {
    let paddle = ScriptedEngine::new("paddleocr", vec![Reply::Ok("F = ma", 0.3), Reply::Ok("F = ma.", 0.5)]);
    let tesseract = ScriptedEngine::new("tesseract", vec![Reply::Ok("F = rna", 0.4)]);
    let doctr = ScriptedEngine::new("doctr", vec![Reply::Fail("model crashed")]);
    let pix2tex = ScriptedEngine::new("pix2tex", vec![Reply::Ok("x", 0.9)]);
    let controller = build(&[paddle, tesseract, doctr, pix2tex], 10);

    let result = controller.resolve_text_block(Path::new(IMAGE), QualityTier::C).await;

    assert_well_formed(&result);
    assert_eq!(result.attempts.len(), 4);
    assert!(result.attempts[2].is_failure());
    assert_eq!(result.attempts[2].confidence(), 0.0);
    assert_eq!(result.text, "F = ma.");
    assert_eq!(result.confidence, 0.5);
    assert!(!result.is_successful);
    assert!(!result.is_compilable);
}

/// Scenario D: already at tier A, so QUALITY_RETRY never runs.
#[tokio::test]
async fn test_highest_tier_skips_quality_retry() {
    let paddle = ScriptedEngine::new("paddleocr", vec![Reply::Ok("blurry", 0.5)]);
    let tesseract = ScriptedEngine::new("tesseract", vec![Reply::Ok("blurry", 0.4)]);
    let pix2tex = ScriptedEngine::new("pix2tex", vec![Reply::Ok("x", 0.9)]);
    let controller = build(&[paddle.clone(), tesseract, pix2tex], 10);

    let result = controller.resolve_text_block(Path::new(IMAGE), QualityTier::A).await;

    assert_well_formed(&result);
    assert_eq!(paddle.calls(), 1, "no duplicate primary-at-A attempt");
    assert!(result
        .attempts
        .iter()
        .all(|a| a.stage() != CascadeStage::QualityRetry));
}

#[tokio::test]
async fn test_quality_retry_accepts_at_highest_tier() {
    let paddle = ScriptedEngine::new("paddleocr", vec![Reply::Ok("blurry", 0.5), Reply::Ok("sharp", 0.92)]);
    let pix2tex = ScriptedEngine::new("pix2tex", vec![Reply::Ok("x", 0.9)]);
    let controller = build(&[paddle.clone(), pix2tex], 10);

    let result = controller.resolve_text_block(Path::new(IMAGE), QualityTier::B).await;

    assert_well_formed(&result);
    assert!(result.is_successful);
    assert_eq!(result.stage, CascadeStage::QualityRetry);
    assert_eq!(result.text, "sharp");
    assert_eq!(result.attempts.len(), 2);
    assert_eq!(result.attempts[1].quality(), QualityTier::A);
    assert_eq!(controller.stats_snapshot().fallback_usage, 0);
}

#[tokio::test]
async fn test_unregistered_primary_records_unavailable_attempt() {
    let tesseract = ScriptedEngine::new("tesseract", vec![Reply::Ok("Find x", 0.88)]);
    let pix2tex = ScriptedEngine::new("pix2tex", vec![Reply::Ok("x", 0.9)]);
    let controller = build(&[tesseract, pix2tex], 10);

    let result = controller.resolve_text_block(Path::new(IMAGE), QualityTier::B).await;

    assert_well_formed(&result);
    assert_eq!(result.attempts.len(), 2);
    assert_eq!(result.attempts[0].engine(), "paddleocr");
    assert!(result.attempts[0].is_failure());
    assert_eq!(result.attempts[0].confidence(), 0.0);
    assert!(result.is_successful);
    assert_eq!(result.engine_used, "tesseract");
}

#[tokio::test]
async fn test_failed_emergency_still_consumes_quota() {
    let paddle = ScriptedEngine::new("paddleocr", vec![Reply::Ok("a", 0.9)]);
    let pix2tex = ScriptedEngine::new("pix2tex", vec![Reply::Ok("\\frac{1}{", 0.6)]);
    let mathpix = ScriptedEngine::new("mathpix", vec![Reply::Fail("HTTP 503")]);
    let controller = build(&[paddle, pix2tex, mathpix.clone()], 5);

    let result = controller.resolve_formula_block(Path::new(IMAGE), QualityTier::B).await;

    assert_well_formed(&result);
    assert_eq!(mathpix.calls(), 1);
    assert!(result.used_emergency());
    assert!(!result.is_successful);
    assert_eq!(result.stage, CascadeStage::BestEffort);
    assert_eq!(controller.quota().daily_used(), 1);

    let snapshot = controller.stats_snapshot();
    assert_eq!(snapshot.emergency_usage, 1);
    assert_eq!(snapshot.emergency_remaining, 4);
    assert_eq!(snapshot.successful_requests, 0);
}

#[tokio::test]
async fn test_compilable_low_confidence_formula_wins_best_effort() {
    let paddle = ScriptedEngine::new("paddleocr", vec![Reply::Ok("a", 0.9)]);
    let pix2tex = ScriptedEngine::new(
        "pix2tex",
        vec![Reply::Ok("\\int_0^1 x\\,dx", 0.35), Reply::Ok("\\int_0^1 x dx}", 0.65)],
    );
    let trocr = ScriptedEngine::new("trocr", vec![Reply::Ok("\\int_0^1 {x dx", 0.6)]);
    let controller = build(&[paddle, pix2tex, trocr], 0);

    let result = controller.resolve_formula_block(Path::new(IMAGE), QualityTier::B).await;

    assert_well_formed(&result);
    assert_eq!(result.attempts.len(), 3);
    assert_eq!(result.stage, CascadeStage::BestEffort);
    assert_eq!(result.chosen_attempt, 1);
    assert_eq!(result.confidence, 0.35);
    assert!(result.is_successful);
    assert!(result.is_compilable);
}

#[tokio::test]
async fn test_every_adapter_failing_still_yields_a_result() {
    let paddle = ScriptedEngine::new("paddleocr", vec![Reply::Fail("timeout")]);
    let tesseract = ScriptedEngine::new("tesseract", vec![Reply::Fail("missing binary")]);
    let doctr = ScriptedEngine::new("doctr", vec![Reply::Fail("OOM")]);
    let pix2tex = ScriptedEngine::new("pix2tex", vec![Reply::Ok("x", 0.9)]);
    let controller = build(&[paddle, tesseract, doctr, pix2tex], 10);

    let result = controller.resolve_text_block(Path::new(IMAGE), QualityTier::B).await;

    assert_well_formed(&result);
    assert_eq!(result.attempts.len(), 4);
    assert!(result.attempts.iter().all(|a| a.is_failure()));
    assert_eq!(result.chosen_attempt, 1);
    assert_eq!(result.confidence, 0.0);
    assert!(!result.is_successful);
}

#[tokio::test]
async fn test_panicking_primary_falls_through_to_fallback() {
    let paddle = ScriptedEngine::new("paddleocr", vec![Reply::Panic("index out of bounds")]);
    let tesseract = ScriptedEngine::new("tesseract", vec![Reply::Ok("Find the velocity v", 0.95)]);
    let pix2tex = ScriptedEngine::new("pix2tex", vec![Reply::Ok("x", 0.9)]);
    let controller = build(&[paddle.clone(), tesseract.clone(), pix2tex], 10);

    let result = controller.resolve_text_block(Path::new(IMAGE), QualityTier::B).await;

    assert_well_formed(&result);
    assert!(result.is_successful);
    assert_eq!(result.stage, CascadeStage::Fallback);
    assert_eq!(result.engine_used, "tesseract");
    assert_eq!(result.attempts.len(), 2);
    assert!(result.attempts[0].is_failure());
    assert_eq!(result.attempts[0].confidence(), 0.0);
    assert!(result.attempts[0].error().unwrap().contains("index out of bounds"));
    assert_eq!(paddle.calls(), 1);
    assert_eq!(tesseract.calls(), 1);

    let snapshot = controller.stats_snapshot();
    assert_eq!(snapshot.total_requests, 1);
    assert_eq!(snapshot.fallback_usage, 1);
}

#[tokio::test]
async fn test_stats_accumulate_across_resolutions() {
    let paddle = ScriptedEngine::new("paddleocr", vec![Reply::Ok("ok", 0.95)]);
    let pix2tex = ScriptedEngine::new("pix2tex", vec![Reply::Ok("x^{2}", 0.9)]);
    let controller = build(&[paddle, pix2tex], 10);

    for _ in 0..3 {
        controller.resolve_text_block(Path::new(IMAGE), QualityTier::B).await;
    }
    controller
        .resolve_block(Modality::Formula, Path::new(IMAGE), QualityTier::B)
        .await;

    let snapshot = controller.stats_snapshot();
    assert_eq!(snapshot.total_requests, 4);
    assert_eq!(snapshot.successful_requests, 4);
    assert_eq!(snapshot.success_rate, 100.0);
    assert_eq!(snapshot.fallback_rate, 0.0);
}

#[test]
fn test_missing_modality_engines_is_fatal() {
    let mut registry = EngineRegistry::new();
    registry.register(ScriptedEngine::new("paddleocr", vec![Reply::Ok("a", 0.9)]));

    let err = CascadeController::new(
        registry,
        &CascadeConfig::default(),
        Arc::new(QuotaGuard::default()),
        Arc::new(UsageStats::new()),
    )
    .unwrap_err();

    assert!(matches!(err, CascadeError::NoEngines(Modality::Formula)));
}
