//! Text measurements shared by validation rules.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    /// Terminal punctuation that ends a sentence: one or more of `.`, `!`, `?`
    /// followed by whitespace or the end of the text. Decimal values such as
    /// `1.5 mg/dL` do not match.
    static ref SENTENCE_BOUNDARY: Regex = Regex::new(r"[.!?]+(?:\s+|$)").unwrap();

    /// Word token for overlap comparison.
    static ref WORD: Regex = Regex::new(r"[\p{L}\p{N}]+").unwrap();
}

/// Count whitespace-separated words.
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Count sentences, treating any trailing fragment without terminal
/// punctuation as a sentence of its own.
pub fn sentence_count(text: &str) -> usize {
    SENTENCE_BOUNDARY
        .split(text)
        .filter(|s| !s.trim().is_empty())
        .count()
}

/// Whether text spans more than one line.
pub fn has_line_break(text: &str) -> bool {
    text.trim().contains(['\n', '\r'])
}

/// Lowercase word tokens, punctuation stripped.
pub fn normalized_words(text: &str) -> Vec<String> {
    WORD.find_iter(text)
        .map(|m| m.as_str().to_lowercase())
        .collect()
}

/// Length of the longest run of consecutive words shared by `a` and `b`.
pub fn longest_shared_run(a: &[String], b: &[String]) -> usize {
    if a.is_empty() || b.is_empty() {
        return 0;
    }

    // Rolling single-row DP over b.
    let mut prev = vec![0usize; b.len() + 1];
    let mut best = 0;
    for word_a in a {
        let mut current = vec![0usize; b.len() + 1];
        for (j, word_b) in b.iter().enumerate() {
            if word_a == word_b {
                current[j + 1] = prev[j] + 1;
                best = best.max(current[j + 1]);
            }
        }
        prev = current;
    }
    best
}
