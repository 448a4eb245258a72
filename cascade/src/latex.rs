//! LaTeX pre-flight checks
//!
//! A cheap structural filter run on every formula attempt before the text is
//! trusted as compilable. Balanced-but-wrong LaTeX passes; semantic review
//! happens downstream.

/// Characters the downstream markup pipeline reserves.
const RESERVED_CHARS: [char; 5] = ['<', '>', '&', '%', '#'];

/// Constructs that raise the estimated confidence of bare LaTeX output.
const COMMON_CONSTRUCTS: [&str; 6] = ["\\frac", "\\sqrt", "\\sum", "\\int", "^", "_"];

/// Characters that usually mean the recognizer guessed.
const SUSPICIOUS_CHARS: [char; 4] = ['?', '|', '@', '#'];

/// Whether `text` passes the structural compilability check.
///
/// Rules, in order: non-blank, `{`/`}` counts equal, no reserved characters.
pub fn is_compilable(text: &str) -> bool {
    if text.trim().is_empty() {
        return false;
    }

    let open = text.matches('{').count();
    let close = text.matches('}').count();
    if open != close {
        return false;
    }

    !text.contains(&RESERVED_CHARS[..])
}

/// Heuristic confidence for recognizers that print LaTeX without a score.
pub fn estimate_confidence(latex: &str) -> f64 {
    if latex.trim().is_empty() {
        return 0.0;
    }

    let mut confidence = 0.5;

    if latex.chars().count() > 10 {
        confidence += 0.1;
    }

    confidence += 0.1 * COMMON_CONSTRUCTS
        .iter()
        .filter(|c| latex.contains(*c))
        .count() as f64;

    if latex.matches('{').count() == latex.matches('}').count() {
        confidence += 0.1;
    }

    if !latex.contains(&SUSPICIOUS_CHARS[..]) {
        confidence += 0.1;
    }

    confidence.min(0.95)
}
