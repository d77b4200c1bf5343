//! Text-similarity and derived speech scores
//!
//! Pure functions, no I/O. All scores fall in [0.0, 1.0].

use crate::models::ScoreSet;

/// Score returned when there is not enough input to judge fluency
pub const NEUTRAL_FLUENCY: f64 = 0.5;

/// Whitespace-delimited token count
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Levenshtein edit distance over Unicode scalar values
pub fn edit_distance(a: &str, b: &str) -> usize {
    strsim::levenshtein(a, b)
}

/// Similarity of a transcript to the expected text
///
/// Both strings are lowercased and trimmed first. Equal strings (including two
/// empty strings) score 1.0 without computing the distance.
pub fn accuracy_score(transcribed: &str, expected: &str) -> f64 {
    let a = transcribed.trim().to_lowercase();
    let b = expected.trim().to_lowercase();

    if a == b {
        return 1.0;
    }

    let longest = a.chars().count().max(b.chars().count());
    1.0 - edit_distance(&a, &b) as f64 / longest as f64
}

/// Heuristic confidence in a transcript
///
/// Mean of a length score (`min(1, words / 10)`) and a clarity score
/// (`max(0, 1 - special / total_chars)`), where a special character is neither
/// alphanumeric nor whitespace. Missing or blank text scores 0.0.
pub fn confidence_score(text: Option<&str>) -> f64 {
    let Some(text) = text.filter(|t| !t.trim().is_empty()) else {
        return 0.0;
    };

    let length_score = (word_count(text) as f64 / 10.0).min(1.0);

    let total_chars = text.chars().count();
    let special_chars = text
        .chars()
        .filter(|c| !c.is_alphanumeric() && !c.is_whitespace())
        .count();
    let clarity_score = (1.0 - special_chars as f64 / total_chars as f64).max(0.0);

    (length_score + clarity_score) / 2.0
}

pub fn pronunciation_score(accuracy: f64, confidence: f64) -> f64 {
    (accuracy + confidence) / 2.0
}

/// Speaking-rate score
///
/// | words per minute | score |
/// |------------------|-------|
/// | 150..=200        | 1.0   |
/// | 100..=250        | 0.8   |
/// | otherwise        | 0.6   |
///
/// Missing text, missing duration, or a zero duration give the neutral 0.5.
pub fn fluency_score(text: Option<&str>, duration_ms: Option<i64>) -> f64 {
    let (Some(text), Some(duration_ms)) = (text, duration_ms) else {
        return NEUTRAL_FLUENCY;
    };
    if duration_ms <= 0 {
        return NEUTRAL_FLUENCY;
    }

    // words / (ms / 1000) * 60, with the division last so band edges stay exact
    let words_per_minute = word_count(text) as f64 * 60_000.0 / duration_ms as f64;

    if (150.0..=200.0).contains(&words_per_minute) {
        1.0
    } else if (100.0..=250.0).contains(&words_per_minute) {
        0.8
    } else {
        0.6
    }
}

/// Compute all four scores, accuracy → confidence → pronunciation → fluency
pub fn compute_scores(transcribed: &str, expected: &str, duration_ms: Option<i64>) -> ScoreSet {
    let accuracy = accuracy_score(transcribed, expected);
    let confidence = confidence_score(Some(transcribed));
    let pronunciation = pronunciation_score(accuracy, confidence);
    let fluency = fluency_score(Some(transcribed), duration_ms);

    ScoreSet {
        accuracy,
        confidence,
        pronunciation,
        fluency,
    }
}
