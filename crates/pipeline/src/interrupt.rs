//! Interruption classification
//!
//! Pattern-based, no model call. A user message arriving while the
//! orchestrator is streaming is classified and acted on within one
//! emission boundary.

use once_cell::sync::Lazy;
use regex::Regex;

/// What the user wants from the running generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptKind {
    /// Cease output, acknowledge briefly
    Stop,
    /// Abandon this topic, start on the new message
    Redirect,
    /// Pause and answer a question about what was said so far
    Clarify,
    /// Regenerate with the refinement applied
    Refine,
}

static STOP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(stop|enough|ok stop|that's enough|quiet|shut up|cancel|never ?mind)[!. ]*$")
        .unwrap()
});

static CLARIFY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(wait[, ]|what do you mean|what does that mean|can you explain that|huh\b|sorry[, ]? what)")
        .unwrap()
});

static REFINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(make it |shorter|longer|simpler|more detail|in simpler terms|but |actually[, ]|instead[, ]|no[, ] (make|use|do))")
        .unwrap()
});

/// Classify a mid-generation user message
pub fn classify_interruption(message: &str) -> InterruptKind {
    let trimmed = message.trim();
    if STOP.is_match(trimmed) {
        InterruptKind::Stop
    } else if CLARIFY.is_match(trimmed) {
        InterruptKind::Clarify
    } else if REFINE.is_match(trimmed) {
        InterruptKind::Refine
    } else {
        InterruptKind::Redirect
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_words() {
        assert_eq!(classify_interruption("stop"), InterruptKind::Stop);
        assert_eq!(classify_interruption("ok stop."), InterruptKind::Stop);
        assert_eq!(classify_interruption("never mind"), InterruptKind::Stop);
    }

    #[test]
    fn clarification_questions() {
        assert_eq!(classify_interruption("wait, what do you mean by tunnelling?"), InterruptKind::Clarify);
        assert_eq!(classify_interruption("huh?"), InterruptKind::Clarify);
    }

    #[test]
    fn refinements() {
        assert_eq!(classify_interruption("shorter please"), InterruptKind::Refine);
        assert_eq!(classify_interruption("actually, use an analogy"), InterruptKind::Refine);
    }

    #[test]
    fn anything_else_redirects() {
        assert_eq!(
            classify_interruption("what's the weather tomorrow"),
            InterruptKind::Redirect
        );
    }
}
