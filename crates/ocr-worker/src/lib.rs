//! OCR worker: adapter construction, batch manifests and concurrent block
//! resolution on top of the `ocr_cascade` core.

#![allow(clippy::uninlined_format_args)]

pub mod config;
pub mod manifest;
pub mod runner;

pub use config::{AdapterSpec, MathpixSpec, WorkerConfig};
pub use manifest::{Block, BlockKind, Manifest, ManifestError};
pub use runner::{BatchReport, BatchRunner, BatchSummary, BlockOutcome};
