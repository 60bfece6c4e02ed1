//! Incremental sentence boundary detection
//!
//! Fed token by token; yields complete sentences as they close.
//! Abbreviation- and decimal-safe: "Dr. Smith" and "3.14" do not split.

const ABBREVIATIONS: &[&str] = &[
    "dr", "mr", "mrs", "ms", "prof", "sr", "jr", "st", "vs", "etc", "e.g", "i.e", "approx",
];

/// Streaming sentence splitter
#[derive(Debug, Default)]
pub struct SentenceSplitter {
    buffer: String,
}

impl SentenceSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a token; returns any sentences completed by it
    pub fn push(&mut self, token: &str) -> Vec<String> {
        self.buffer.push_str(token);
        let mut sentences = Vec::new();

        loop {
            match self.find_boundary() {
                Some(end) => {
                    let sentence: String = self.buffer.drain(..end).collect();
                    let trimmed = sentence.trim().to_string();
                    if !trimmed.is_empty() {
                        sentences.push(trimmed);
                    }
                }
                None => break,
            }
        }

        sentences
    }

    /// Flush whatever remains as a final sentence
    pub fn flush(&mut self) -> Option<String> {
        let rest = self.buffer.trim().to_string();
        self.buffer.clear();
        (!rest.is_empty()).then_some(rest)
    }

    /// Byte offset just past a confirmed sentence end, if one exists
    fn find_boundary(&self) -> Option<usize> {
        let bytes = self.buffer.as_bytes();
        for (i, c) in self.buffer.char_indices() {
            if !matches!(c, '.' | '!' | '?') {
                continue;
            }
            let after = i + c.len_utf8();

            // Need a following space or end-of-buffer plus more content to
            // be sure the sentence is closed.
            let Some(&next) = bytes.get(after) else { continue };
            if !next.is_ascii_whitespace() {
                continue;
            }

            if c == '.' {
                // Decimal point: digit on both sides.
                let prev_digit =
                    i > 0 && bytes[i - 1].is_ascii_digit();
                let next_digit = bytes.get(after + 1).map(|b| b.is_ascii_digit()).unwrap_or(false);
                if prev_digit && next_digit {
                    continue;
                }
                // Abbreviation before the period.
                if self.ends_with_abbreviation(i) {
                    continue;
                }
            }

            return Some(after);
        }
        None
    }

    fn ends_with_abbreviation(&self, period_index: usize) -> bool {
        let before = &self.buffer[..period_index];
        let last_word: String = before
            .chars()
            .rev()
            .take_while(|c| c.is_alphanumeric() || *c == '.')
            .collect::<String>()
            .chars()
            .rev()
            .collect();
        ABBREVIATIONS.contains(&last_word.to_lowercase().trim_end_matches('.').trim())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn split_all(text: &str) -> Vec<String> {
        let mut splitter = SentenceSplitter::new();
        let mut sentences = Vec::new();
        // Feed in small chunks to exercise the incremental path.
        for chunk in text.as_bytes().chunks(3) {
            sentences.extend(splitter.push(std::str::from_utf8(chunk).unwrap()));
        }
        if let Some(rest) = splitter.flush() {
            sentences.push(rest);
        }
        sentences
    }

    #[test]
    fn splits_on_terminators() {
        let sentences = split_all("Hello there. How are you? Great!");
        assert_eq!(sentences, vec!["Hello there.", "How are you?", "Great!"]);
    }

    #[test]
    fn abbreviations_do_not_split() {
        let sentences = split_all("Dr. Smith arrived. He sat down.");
        assert_eq!(sentences, vec!["Dr. Smith arrived.", "He sat down."]);
    }

    #[test]
    fn decimals_do_not_split() {
        let sentences = split_all("Pi is about 3. 14 no wait, 3.14 exactly. Neat.");
        assert!(sentences.iter().any(|s| s.contains("3.14 exactly.")));
    }

    #[test]
    fn flush_returns_the_tail() {
        let mut splitter = SentenceSplitter::new();
        assert!(splitter.push("an unterminated thought").is_empty());
        assert_eq!(splitter.flush().unwrap(), "an unterminated thought");
        assert!(splitter.flush().is_none());
    }
}
