//! PII redaction
//!
//! Masks emails, phone numbers, SSN-like identifiers, and card numbers
//! before anything reaches the index or the journal. Idempotent on its own
//! output: the mask tokens never match the patterns.

use once_cell::sync::Lazy;
use regex::Regex;

static EMAIL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap());

static PHONE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\+?\d{1,3}[-.\s]?\(?\d{3}\)?[-.\s]?\d{3}[-.\s]?\d{4}\b").unwrap()
});

static SSN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").unwrap());

static CARD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b\d{4}[-\s]?\d{4}[-\s]?\d{4}[-\s]?\d{4}\b").unwrap());

/// Redaction report
#[derive(Debug, Clone, Default)]
pub struct Redaction {
    pub text: String,
    pub masked: usize,
}

/// Pattern-based PII redactor
#[derive(Debug, Clone, Default)]
pub struct PiiRedactor;

impl PiiRedactor {
    pub fn new() -> Self {
        Self
    }

    /// Mask all matched spans. Order matters: cards before phones so a
    /// 16-digit run is not half-eaten by the phone pattern.
    pub fn redact(&self, text: &str) -> Redaction {
        let mut masked = 0usize;
        let mut out = text.to_string();

        for (regex, mask) in [
            (&*EMAIL, "[email]"),
            (&*CARD, "[card]"),
            (&*SSN, "[ssn]"),
            (&*PHONE, "[phone]"),
        ] {
            let count = regex.find_iter(&out).count();
            if count > 0 {
                masked += count;
                out = regex.replace_all(&out, mask).to_string();
            }
        }

        Redaction { text: out, masked }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_emails_and_phones() {
        let r = PiiRedactor::new().redact("mail me at jo@example.com or call 555-123-4567");
        assert!(r.text.contains("[email]"));
        assert!(r.text.contains("[phone]"));
        assert_eq!(r.masked, 2);
        assert!(!r.text.contains("jo@example.com"));
    }

    #[test]
    fn masks_ssn_and_cards() {
        let r = PiiRedactor::new().redact("ssn 123-45-6789 card 4111 1111 1111 1111");
        assert!(r.text.contains("[ssn]"));
        assert!(r.text.contains("[card]"));
    }

    #[test]
    fn redaction_is_idempotent() {
        let redactor = PiiRedactor::new();
        let once = redactor.redact("reach me at jo@example.com");
        let twice = redactor.redact(&once.text);
        assert_eq!(once.text, twice.text);
        assert_eq!(twice.masked, 0);
    }

    #[test]
    fn clean_text_is_untouched() {
        let r = PiiRedactor::new().redact("I prefer the lights at 40% in the evening.");
        assert_eq!(r.text, "I prefer the lights at 40% in the evening.");
        assert_eq!(r.masked, 0);
    }
}
