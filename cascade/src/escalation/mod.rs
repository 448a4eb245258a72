//! Escalation — deterministic cascade over OCR engines
//!
//! Each block walks its modality's ladder in strict order and stops at the
//! first tier whose acceptance predicate holds. No tier runs in parallel
//! with another; later tiers depend on the outcome and cost of earlier ones.
//!
//! # Escalation Ladder
//!
//! ```text
//! PRIMARY (caller's quality tier)
//!     │  text: confidence ≥ text threshold
//!     │  formula: compilable AND confidence ≥ formula threshold
//!     ▼
//! FALLBACKS (configured order, unregistered engines skipped)
//!     │  same predicate, acceptance counts as fallback usage
//!     ▼
//! QUALITY_RETRY (primary engine at tier A, skipped when already at A)
//!     │  same predicate
//!     ▼
//! EMERGENCY (formula only, metered, one quota unit per entry)
//!     │  compilable is enough
//!     ▼
//! BEST_EFFORT
//!        text: highest confidence, unsuccessful
//!        formula: highest-confidence compilable attempt, else highest overall
//! ```

pub mod controller;
pub mod state;

pub use controller::CascadeController;
pub use state::ResolutionTrail;
