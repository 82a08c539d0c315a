//! Weighted-ratio string similarity on a 0-100 scale.
//!
//! `rapidfuzz` supplies the indel ratio (edit distance counting insertions
//! and deletions only). Token-sorted, token-set and best-window variants are
//! layered on top so word reordering and partial overlaps still score high.

use rapidfuzz::fuzz;
use std::collections::BTreeSet;

const UNBASE_SCALE: f64 = 0.95;

/// Similarity of two strings, tolerant of token order and partial overlap.
/// Returns 0 when either side is empty.
pub fn weighted_ratio(a: &str, b: &str) -> f64 {
    let a_len = a.chars().count();
    let b_len = b.chars().count();
    if a_len == 0 || b_len == 0 {
        return 0.0;
    }

    let len_ratio = a_len.max(b_len) as f64 / a_len.min(b_len) as f64;
    let direct = ratio(a, b);

    if len_ratio < 1.5 {
        return direct.max(token_ratio(a, b) * UNBASE_SCALE);
    }

    let partial_scale = if len_ratio < 8.0 { 0.9 } else { 0.6 };
    direct
        .max(partial_ratio(a, b) * partial_scale)
        .max(partial_token_ratio(a, b) * UNBASE_SCALE * partial_scale)
}

/// Normalized indel similarity.
pub fn ratio(a: &str, b: &str) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 100.0;
    }
    100.0 * fuzz::ratio(a.chars(), b.chars())
}

fn char_ratio(a: &[char], b: &[char]) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 100.0;
    }
    100.0 * fuzz::ratio(a.iter().copied(), b.iter().copied())
}

/// Best ratio of the shorter string against any equally long window of the
/// longer one, including windows hanging off either end.
pub fn partial_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let (short, long) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    if short.is_empty() {
        return if long.is_empty() { 100.0 } else { 0.0 };
    }

    let n = short.len() as isize;
    let mut best: f64 = 0.0;
    for start in (1 - n)..(long.len() as isize) {
        let from = start.max(0) as usize;
        let to = ((start + n) as usize).min(long.len());
        best = best.max(char_ratio(&short, &long[from..to]));
        if best >= 100.0 {
            break;
        }
    }
    best
}

fn sorted_tokens(s: &str) -> Vec<&str> {
    let mut tokens: Vec<&str> = s.split_whitespace().collect();
    tokens.sort_unstable();
    tokens
}

pub fn token_sort_ratio(a: &str, b: &str) -> f64 {
    ratio(&sorted_tokens(a).join(" "), &sorted_tokens(b).join(" "))
}

pub fn token_set_ratio(a: &str, b: &str) -> f64 {
    let set_a: BTreeSet<&str> = a.split_whitespace().collect();
    let set_b: BTreeSet<&str> = b.split_whitespace().collect();
    if set_a.is_empty() || set_b.is_empty() {
        return 0.0;
    }

    let common: Vec<&str> = set_a.intersection(&set_b).copied().collect();
    let only_a: Vec<&str> = set_a.difference(&set_b).copied().collect();
    let only_b: Vec<&str> = set_b.difference(&set_a).copied().collect();

    if !common.is_empty() && (only_a.is_empty() || only_b.is_empty()) {
        return 100.0;
    }

    let common = common.join(" ");
    let only_a = only_a.join(" ");
    let only_b = only_b.join(" ");
    let mut best = ratio(&only_a, &only_b);
    if common.is_empty() {
        return best;
    }

    let with_a = format!("{} {}", common, only_a);
    let with_b = format!("{} {}", common, only_b);
    best = best.max(ratio(&common, &with_a));
    best = best.max(ratio(&common, &with_b));
    best
}

fn token_ratio(a: &str, b: &str) -> f64 {
    token_sort_ratio(a, b).max(token_set_ratio(a, b))
}

fn partial_token_ratio(a: &str, b: &str) -> f64 {
    let set_a: BTreeSet<&str> = a.split_whitespace().collect();
    let set_b: BTreeSet<&str> = b.split_whitespace().collect();
    if set_a.is_empty() || set_b.is_empty() {
        return 0.0;
    }
    if set_a.intersection(&set_b).next().is_some() {
        return 100.0;
    }

    let sorted_a = sorted_tokens(a).join(" ");
    let sorted_b = sorted_tokens(b).join(" ");
    let best = partial_ratio(&sorted_a, &sorted_b);

    let diff_a = set_a.difference(&set_b).copied().collect::<Vec<_>>().join(" ");
    let diff_b = set_b.difference(&set_a).copied().collect::<Vec<_>>().join(" ");
    if diff_a == sorted_a && diff_b == sorted_b {
        return best;
    }
    best.max(partial_ratio(&diff_a, &diff_b))
}
