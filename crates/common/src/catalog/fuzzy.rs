//! Fuzzy company-name scoring
//!
//! Score = 0.7 * edit-distance similarity + 0.3 * token-set overlap,
//! plus a 0.10 bonus when both names share a Soundex code, capped at 1.0.

use super::normalize::{name_tokens, normalize_name};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

const EDIT_WEIGHT: f64 = 0.7;
const TOKEN_WEIGHT: f64 = 0.3;
const PHONETIC_BONUS: f64 = 0.10;

/// Score at or above which a match is treated as certain
pub const VERY_HIGH_THRESHOLD: f64 = 0.95;
/// Default acceptance threshold
pub const ACCEPT_THRESHOLD: f64 = 0.85;
/// Score at or above which a match is worth a human look
pub const REVIEW_THRESHOLD: f64 = 0.70;

/// Confidence tier of a fuzzy score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchTier {
    VeryHigh,
    Accepted,
    Review,
    Rejected,
}

impl MatchTier {
    pub fn from_score(score: f64) -> Self {
        if score >= VERY_HIGH_THRESHOLD {
            MatchTier::VeryHigh
        } else if score >= ACCEPT_THRESHOLD {
            MatchTier::Accepted
        } else if score >= REVIEW_THRESHOLD {
            MatchTier::Review
        } else {
            MatchTier::Rejected
        }
    }
}

/// Score two names in [0, 1]
pub fn fuzzy_score(a: &str, b: &str) -> f64 {
    let a = normalize_name(a);
    let b = normalize_name(b);

    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b {
        return 1.0;
    }

    let a_text = a.replace('_', " ");
    let b_text = b.replace('_', " ");

    let max_len = a_text.chars().count().max(b_text.chars().count());
    let edit = 1.0 - levenshtein(&a_text, &b_text) as f64 / max_len as f64;

    let tokens = token_set_overlap(&a, &b);

    let mut score = EDIT_WEIGHT * edit + TOKEN_WEIGHT * tokens;

    let a_code = soundex(&a);
    if !a_code.is_empty() && a_code == soundex(&b) {
        score += PHONETIC_BONUS;
    }

    score.min(1.0)
}

/// Character-level edit distance
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = if ca == cb { 0 } else { 1 };
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

/// Jaccard overlap of the token sets of two normalized names
pub fn token_set_overlap(a: &str, b: &str) -> f64 {
    let a: HashSet<&str> = name_tokens(a).collect();
    let b: HashSet<&str> = name_tokens(b).collect();

    let union = a.union(&b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(&b).count() as f64 / union as f64
}

/// American Soundex code over the ASCII letters of `name`
pub fn soundex(name: &str) -> String {
    fn code(c: char) -> Option<char> {
        match c {
            'b' | 'f' | 'p' | 'v' => Some('1'),
            'c' | 'g' | 'j' | 'k' | 'q' | 's' | 'x' | 'z' => Some('2'),
            'd' | 't' => Some('3'),
            'l' => Some('4'),
            'm' | 'n' => Some('5'),
            'r' => Some('6'),
            _ => None,
        }
    }

    let mut letters = name
        .chars()
        .filter(|c| c.is_ascii_alphabetic())
        .map(|c| c.to_ascii_lowercase());

    let first = match letters.next() {
        Some(c) => c,
        None => return String::new(),
    };

    let mut out = String::with_capacity(4);
    out.push(first.to_ascii_uppercase());

    let mut last = code(first);
    for c in letters {
        if out.len() == 4 {
            break;
        }
        let current = code(c);
        match current {
            Some(digit) if current != last => out.push(digit),
            _ => {}
        }
        // h and w do not separate letters with the same code
        if c != 'h' && c != 'w' {
            last = current;
        }
    }

    while out.len() < 4 {
        out.push('0');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levenshtein() {
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("same", "same"), 0);
    }

    #[test]
    fn test_soundex() {
        assert_eq!(soundex("robert"), "R163");
        assert_eq!(soundex("rupert"), "R163");
        assert_eq!(soundex("ashcraft"), "A261");
        assert_eq!(soundex("tymczak"), "T522");
        assert_eq!(soundex("123"), "");
    }

    #[test]
    fn test_suffix_variants_score_perfectly() {
        assert_eq!(fuzzy_score("Acme Corp", "ACME Corporation"), 1.0);
        assert_eq!(MatchTier::from_score(1.0), MatchTier::VeryHigh);
    }

    #[test]
    fn test_near_miss_is_accepted() {
        let score = fuzzy_score("Global Logistics Partners", "Global Logistic Partners");
        assert!(score >= ACCEPT_THRESHOLD && score < VERY_HIGH_THRESHOLD, "score {score}");
        assert_eq!(MatchTier::from_score(score), MatchTier::Accepted);
    }

    #[test]
    fn test_unrelated_names_are_rejected() {
        let score = fuzzy_score("Acme", "Zenith Aerospace");
        assert_eq!(MatchTier::from_score(score), MatchTier::Rejected);
    }

    #[test]
    fn test_tiers() {
        assert_eq!(MatchTier::from_score(0.96), MatchTier::VeryHigh);
        assert_eq!(MatchTier::from_score(0.85), MatchTier::Accepted);
        assert_eq!(MatchTier::from_score(0.70), MatchTier::Review);
        assert_eq!(MatchTier::from_score(0.69), MatchTier::Rejected);
    }
}
