//! Word extraction and statistics for post bodies.
//!
//! A body is split on single spaces and any token that is exactly one of the
//! [`EXCLUDED_CHARACTERS`] is discarded. Everything else counts as a word as-is:
//! punctuation inside a token is kept, and consecutive spaces yield empty words.

/// Punctuation, symbols and the space character that never count as a word on their own.
pub const EXCLUDED_CHARACTERS: [char; 33] = [
    '.', ',', '!', '?', ';', ':', '"', '\'', '(', ')', '[', ']', '{', '}', '<', '>', '/', '\\',
    '|', '-', '_', '=', '+', '*', '&', '^', '%', '$', '#', '@', '~', '`', ' ',
];

pub fn is_excluded(ch: char) -> bool {
    EXCLUDED_CHARACTERS.contains(&ch)
}

fn is_excluded_token(token: &str) -> bool {
    let mut chars = token.chars();
    match (chars.next(), chars.next()) {
        (Some(ch), None) => is_excluded(ch),
        _ => false,
    }
}

/// Split `body` into the words that survive the excluded-token filter.
pub fn extract_words(body: &str) -> Vec<&str> {
    body.split(' ')
        .filter(|token| !is_excluded_token(token))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WordStats {
    pub word_count: usize,
    pub avg_word_length: f64,
}

impl WordStats {
    /// Word length is measured in characters. With no words the average is NaN;
    /// post validation keeps that case out of the pipeline.
    pub fn from_words(words: &[&str]) -> Self {
        let total: usize = words.iter().map(|word| word.chars().count()).sum();
        let word_count = words.len();
        Self {
            word_count,
            avg_word_length: total as f64 / word_count as f64,
        }
    }

    pub fn of_body(body: &str) -> Self {
        Self::from_words(&extract_words(body))
    }
}
