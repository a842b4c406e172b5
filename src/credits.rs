//! Text-based credit scoring for messages that are not priced by a report.

use serde::Serialize;
use std::collections::HashSet;

pub const BASE_COST: f64 = 1.0;
pub const PER_CHARACTER: f64 = 0.05;
pub const SHORT_WORD: f64 = 0.1;
pub const MEDIUM_WORD: f64 = 0.2;
pub const LONG_WORD: f64 = 0.3;
pub const THIRD_VOWEL: f64 = 0.3;
pub const LENGTH_LIMIT: usize = 100;
pub const LENGTH_PENALTY: f64 = 5.0;
pub const UNIQUE_WORD_BONUS: f64 = -2.0;
pub const MIN_CREDITS: f64 = 1.0;

/// Per-rule contributions for one message. `total` is the final, rounded
/// credit cost.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreditBreakdown {
    pub base: f64,
    pub characters: f64,
    pub words: f64,
    pub third_vowels: f64,
    pub length_penalty: f64,
    pub unique_word_bonus: f64,
    /// Total after the unique-word bonus and the first floor.
    pub floored: f64,
    pub palindrome: bool,
    pub total: f64,
}

pub fn calculate_message_credits(text: &str) -> f64 {
    credit_breakdown(text).total
}

pub fn credit_breakdown(text: &str) -> CreditBreakdown {
    let chars: Vec<char> = text.chars().collect();
    let words = tokenize(text);

    let characters = chars.len() as f64 * PER_CHARACTER;
    let word_cost = words.iter().map(|w| word_cost(w)).sum::<f64>();
    let third_vowels = chars
        .iter()
        .skip(2)
        .step_by(3)
        .filter(|c| matches!(c.to_ascii_lowercase(), 'a' | 'e' | 'i' | 'o' | 'u'))
        .map(|_| THIRD_VOWEL)
        .sum::<f64>();
    let length_penalty = if chars.len() > LENGTH_LIMIT {
        LENGTH_PENALTY
    } else {
        0.0
    };
    let unique_word_bonus = if all_distinct(&words) {
        UNIQUE_WORD_BONUS
    } else {
        0.0
    };

    // Accumulate in rule order so the floating point result is stable.
    let mut total = BASE_COST;
    total += characters;
    total += word_cost;
    total += third_vowels;
    total += length_penalty;
    let floored = (total + unique_word_bonus).max(MIN_CREDITS);

    let palindrome = is_palindrome(text);
    let doubled = if palindrome { floored * 2.0 } else { floored };

    CreditBreakdown {
        base: BASE_COST,
        characters,
        words: word_cost,
        third_vowels,
        length_penalty,
        unique_word_bonus,
        floored,
        palindrome,
        total: round_credits(doubled.max(MIN_CREDITS)),
    }
}

/// Maximal runs of ASCII letters, apostrophes and hyphens.
pub fn tokenize(text: &str) -> Vec<&str> {
    text.split(|c: char| !(c.is_ascii_alphabetic() || c == '\'' || c == '-'))
        .filter(|w| !w.is_empty())
        .collect()
}

fn word_cost(word: &str) -> f64 {
    // Words only contain ASCII, so byte length is the character count.
    match word.len() {
        0..=3 => SHORT_WORD,
        4..=7 => MEDIUM_WORD,
        _ => LONG_WORD,
    }
}

fn all_distinct(words: &[&str]) -> bool {
    if words.len() < 2 {
        return false;
    }
    let unique: HashSet<&str> = words.iter().copied().collect();
    unique.len() == words.len()
}

/// Case-insensitive palindrome over alphanumeric characters only. A single
/// character does not count.
pub fn is_palindrome(text: &str) -> bool {
    let cleaned: Vec<char> = text
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect();
    cleaned.len() > 1 && cleaned.iter().eq(cleaned.iter().rev())
}

/// Rounds to two decimals, ties away from zero.
pub fn round_credits(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
