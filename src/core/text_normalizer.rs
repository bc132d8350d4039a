//! Text Normalization
//!
//! Cleans raw recognition text before it reaches the command matcher:
//! punctuation runs collapse to a single space, a repeated leading phrase
//! is cut down to its last occurrence, and overlong results are truncated.

use lazy_static::lazy_static;
use regex::Regex;
use tracing::{debug, warn};

lazy_static! {
    static ref SEPARATORS: Regex = Regex::new(r"[。，、；：！？\s]+").expect("valid separator regex");
}

/// Normalizes streaming recognition text
#[derive(Debug, Clone)]
pub struct TextNormalizer {
    max_chars: usize,
}

impl Default for TextNormalizer {
    fn default() -> Self {
        Self::new(50)
    }
}

impl TextNormalizer {
    pub fn new(max_chars: usize) -> Self {
        Self { max_chars }
    }

    pub fn normalize(&self, text: &str) -> String {
        let cleaned = SEPARATORS.replace_all(text, " ");
        let mut result = cleaned.trim().to_string();

        if let Some(collapsed) = collapse_repeated_phrase(&result) {
            debug!("🧹 Collapsed repetition: '{}' -> '{}'", result, collapsed);
            result = collapsed;
        }

        let length = result.chars().count();
        if length > self.max_chars {
            warn!(
                "✂️ Recognized text too long ({} chars), truncated to {}",
                length, self.max_chars
            );
            result = result.chars().take(self.max_chars).collect::<String>();
            result = result.trim_end().to_string();
        }

        result
    }
}

/// Streaming results often re-emit the start of an utterance; when a phrase of
/// two or more words recurs later in a longer tail, keep the tail from that
/// recurrence on. The first phrase found wins.
fn collapse_repeated_phrase(text: &str) -> Option<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() < 3 {
        return None;
    }

    for i in 0..words.len() - 1 {
        for j in (i + 2)..=words.len() {
            let phrase = words[i..j].join(" ");
            let remaining = words[j..].join(" ");

            if remaining.len() > phrase.len() {
                if let Some(start) = remaining.find(&phrase) {
                    let tail = remaining[start..].trim();
                    if !tail.is_empty() {
                        return Some(tail.to_string());
                    }
                }
            }
        }
    }

    None
}
