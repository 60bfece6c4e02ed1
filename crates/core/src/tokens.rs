//! Token estimation
//!
//! Grapheme-based heuristic shared by all budget math. Roughly four
//! graphemes per token for English-like text; never returns zero for a
//! non-empty input.

use unicode_segmentation::UnicodeSegmentation;

/// Estimate the token count of a text
pub fn estimate_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    let graphemes = text.graphemes(true).count();
    (graphemes / 4).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_is_zero() {
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn nonempty_is_at_least_one() {
        assert_eq!(estimate_tokens("a"), 1);
    }

    #[test]
    fn scales_with_length() {
        let short = estimate_tokens("hello world");
        let long = estimate_tokens(&"hello world ".repeat(50));
        assert!(long > short * 10);
    }
}
