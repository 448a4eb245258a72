//! Engines backed by an external recognizer binary
//!
//! Covers the local recognizers (tesseract, pix2tex, doctr wrappers, ...)
//! that can be driven from the command line. The argument template is split
//! with shell-word rules and every `{image}` token is replaced by the block
//! path. Output is either bare text or a JSON object
//! `{"text": ..., "confidence": ...}`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use super::OcrEngine;
use crate::error::EngineError;
use crate::latex;
use crate::model::{Modality, RawRecognition};

const IMAGE_PLACEHOLDER: &str = "{image}";

/// How the recognizer prints its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    /// Recognized text on stdout
    #[default]
    Plain,
    /// `{"text": "...", "confidence": 0.87}` on stdout
    Json,
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_text_confidence() -> f64 {
    0.75
}

fn default_probe_args() -> Vec<String> {
    vec!["--version".to_string()]
}

/// Declarative description of a command-backed engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandEngineConfig {
    pub name: String,
    pub program: String,
    /// Argument template, e.g. `"{image} stdout -l eng+chi_tra --psm 6"`
    #[serde(default)]
    pub args: String,
    pub modalities: Vec<Modality>,
    #[serde(default)]
    pub output: OutputFormat,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Confidence assigned to plain-text output that carries no score
    #[serde(default = "default_text_confidence")]
    pub text_confidence: f64,
    /// Arguments used to check the program is installed
    #[serde(default = "default_probe_args")]
    pub probe_args: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct JsonOutput {
    text: String,
    #[serde(default)]
    confidence: Option<f64>,
}

/// Recognizer invoked as a child process per attempt.
#[derive(Debug)]
pub struct CommandEngine {
    config: CommandEngineConfig,
    args: Vec<String>,
}

impl CommandEngine {
    pub fn new(config: CommandEngineConfig) -> Result<Self, EngineError> {
        let args = shlex::split(&config.args).ok_or_else(|| {
            EngineError::Initialization(format!(
                "{}: unbalanced quotes in argument template {:?}",
                config.name, config.args
            ))
        })?;
        Ok(Self { config, args })
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.timeout_secs)
    }

    fn render_args(&self, image_path: &Path) -> Vec<String> {
        let image = image_path.to_string_lossy();
        self.args
            .iter()
            .map(|arg| arg.replace(IMAGE_PLACEHOLDER, &image))
            .collect()
    }

    async fn run(&self, modality: Modality, image_path: &Path) -> Result<RawRecognition, EngineError> {
        tokio::fs::metadata(image_path).await?;

        let args = self.render_args(image_path);
        debug!(engine = %self.config.name, program = %self.config.program, ?args, "Running recognizer");

        let child = Command::new(&self.config.program)
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout(), child)
            .await
            .map_err(|_| EngineError::Timeout {
                engine: self.config.name.clone(),
                after: self.timeout(),
            })??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EngineError::Process(format!(
                "{} exited with {}: {}",
                self.config.program,
                output.status,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        self.parse_output(modality, stdout.trim())
    }

    fn parse_output(&self, modality: Modality, stdout: &str) -> Result<RawRecognition, EngineError> {
        let (text, reported) = match self.config.output {
            OutputFormat::Plain => (stdout.to_string(), None),
            OutputFormat::Json => {
                let parsed: JsonOutput = serde_json::from_str(stdout)
                    .map_err(|e| EngineError::Parse(format!("{}: {}", self.config.name, e)))?;
                (parsed.text.trim().to_string(), parsed.confidence)
            }
        };

        let confidence = match reported {
            Some(c) => c,
            None if text.is_empty() => 0.0,
            None => match modality {
                Modality::Formula => latex::estimate_confidence(&text),
                Modality::Text => self.config.text_confidence,
            },
        };

        Ok(RawRecognition::new(text, confidence)
            .with_metadata("engine", self.config.name.as_str())
            .with_metadata("confidence_reported", reported.is_some()))
    }
}

#[async_trait]
impl OcrEngine for CommandEngine {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn modalities(&self) -> &[Modality] {
        &self.config.modalities
    }

    async fn initialize(&self) -> Result<(), EngineError> {
        let probe = Command::new(&self.config.program)
            .args(&self.config.probe_args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status();

        match tokio::time::timeout(self.timeout(), probe).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(EngineError::Initialization(format!(
                "{}: cannot run {}: {}",
                self.config.name, self.config.program, e
            ))),
            Err(_) => Err(EngineError::Initialization(format!(
                "{}: probe of {} timed out",
                self.config.name, self.config.program
            ))),
        }
    }

    async fn recognize_text(&self, image_path: &Path) -> Result<RawRecognition, EngineError> {
        if !self.supports(Modality::Text) {
            return Ok(RawRecognition::unsupported(self.name()));
        }
        self.run(Modality::Text, image_path).await
    }

    async fn recognize_formula(&self, image_path: &Path) -> Result<RawRecognition, EngineError> {
        if !self.supports(Modality::Formula) {
            return Ok(RawRecognition::unsupported(self.name()));
        }
        self.run(Modality::Formula, image_path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn config(program: &str, args: &str, modalities: Vec<Modality>) -> CommandEngineConfig {
        CommandEngineConfig {
            name: "test-engine".to_string(),
            program: program.to_string(),
            args: args.to_string(),
            modalities,
            output: OutputFormat::Plain,
            timeout_secs: 5,
            text_confidence: 0.75,
            probe_args: vec![],
        }
    }

    #[test]
    fn test_unbalanced_template_rejected() {
        let result = CommandEngine::new(config("echo", "\"{image}", vec![Modality::Text]));
        assert!(matches!(result, Err(EngineError::Initialization(_))));
    }

    #[test]
    fn test_render_args_keeps_paths_with_spaces_whole() {
        let engine = CommandEngine::new(config("tesseract", "{image} stdout --psm 6", vec![Modality::Text])).unwrap();
        let args = engine.render_args(Path::new("/tmp/my blocks/b1.png"));
        assert_eq!(args, vec!["/tmp/my blocks/b1.png", "stdout", "--psm", "6"]);
    }

    #[test]
    fn test_parse_plain_formula_estimates_confidence() {
        let engine = CommandEngine::new(config("pix2tex", "{image}", vec![Modality::Formula])).unwrap();
        let raw = engine.parse_output(Modality::Formula, "\\frac{a}{b}").unwrap();
        assert_eq!(raw.text, "\\frac{a}{b}");
        assert!((raw.confidence - latex::estimate_confidence("\\frac{a}{b}")).abs() < 1e-9);
    }

    #[test]
    fn test_parse_plain_text_uses_fixed_confidence() {
        let engine = CommandEngine::new(config("tesseract", "{image}", vec![Modality::Text])).unwrap();
        let raw = engine.parse_output(Modality::Text, "Find x.").unwrap();
        assert!((raw.confidence - 0.75).abs() < 1e-9);

        let empty = engine.parse_output(Modality::Text, "").unwrap();
        assert_eq!(empty.confidence, 0.0);
    }

    #[test]
    fn test_parse_json_output() {
        let mut cfg = config("doctr", "{image}", vec![Modality::Text]);
        cfg.output = OutputFormat::Json;
        let engine = CommandEngine::new(cfg).unwrap();

        let raw = engine
            .parse_output(Modality::Text, r#"{"text": " 2x + 3 = 7 ", "confidence": 0.91}"#)
            .unwrap();
        assert_eq!(raw.text, "2x + 3 = 7");
        assert!((raw.confidence - 0.91).abs() < 1e-9);

        let err = engine.parse_output(Modality::Text, "not json").unwrap_err();
        assert!(matches!(err, EngineError::Parse(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_runs_program_and_reads_stdout() {
        let image = NamedTempFile::new().unwrap();
        let engine = CommandEngine::new(config("echo", "x^2 {image}", vec![Modality::Formula])).unwrap();

        let raw = engine.recognize_formula(image.path()).await.unwrap();
        assert!(raw.text.starts_with("x^2 "));
        assert!(raw.text.ends_with(&*image.path().to_string_lossy()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unsupported_modality_does_not_spawn() {
        let engine = CommandEngine::new(config("/nonexistent/recognizer", "{image}", vec![Modality::Formula])).unwrap();
        let raw = engine.recognize_text(Path::new("/nonexistent.png")).await.unwrap();
        assert!(raw.text.is_empty());
        assert!((raw.confidence - 0.1).abs() < f64::EPSILON);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_is_process_error() {
        let image = NamedTempFile::new().unwrap();
        let engine = CommandEngine::new(config("false", "", vec![Modality::Text])).unwrap();
        let err = engine.recognize_text(image.path()).await.unwrap_err();
        assert!(matches!(err, EngineError::Process(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_slow_program_times_out() {
        let image = NamedTempFile::new().unwrap();
        let mut cfg = config("sleep", "5", vec![Modality::Text]);
        cfg.timeout_secs = 1;
        let engine = CommandEngine::new(cfg).unwrap();
        let err = engine.recognize_text(image.path()).await.unwrap_err();
        assert!(matches!(err, EngineError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_missing_image_is_io_error() {
        let engine = CommandEngine::new(config("echo", "{image}", vec![Modality::Text])).unwrap();
        let err = engine
            .recognize_text(Path::new("/nonexistent/block.png"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Io(_)));
    }

    #[tokio::test]
    async fn test_initialize_fails_for_missing_program() {
        let engine = CommandEngine::new(config("/nonexistent/recognizer", "", vec![Modality::Text])).unwrap();
        assert!(matches!(
            engine.initialize().await,
            Err(EngineError::Initialization(_))
        ));
    }
}
