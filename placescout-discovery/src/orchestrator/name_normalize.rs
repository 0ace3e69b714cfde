//! Venue name normalisation and fuzzy comparison.
//!
//! Canonicalises names so that the same place spelled slightly differently
//! by two providers ("The Coffee-House", "coffee house") compares as equal,
//! and scores near-misses with a bigram Dice coefficient.

use std::collections::HashMap;

/// Article dropped from the front of a normalised name.
const LEADING_ARTICLE: &str = "the ";

/// Normalise a venue name for comparison.
///
/// 1. Lowercase.
/// 2. Fold punctuation and symbols to spaces.
/// 3. Collapse runs of whitespace and trim.
/// 4. Remove a leading "the ".
///
/// # Examples
///
/// ```
/// use placescout_discovery::orchestrator::name_normalize::normalize_name;
///
/// assert_eq!(normalize_name("The Coffee-House!"), "coffee house");
/// ```
pub fn normalize_name(raw: &str) -> String {
    let folded: String = raw
        .chars()
        .flat_map(char::to_lowercase)
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    let collapsed = folded.split_whitespace().collect::<Vec<_>>().join(" ");
    match collapsed.strip_prefix(LEADING_ARTICLE) {
        Some(rest) if !rest.is_empty() => rest.to_owned(),
        _ => collapsed,
    }
}

/// Dice coefficient over character bigrams of two normalised names.
///
/// Returns a value in `[0, 1]`; identical strings score 1.0. Strings too
/// short to form a bigram only match when they are equal.
pub fn bigram_similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    let left = bigrams(a);
    let right = bigrams(b);
    let total: usize = left.values().sum::<usize>() + right.values().sum::<usize>();
    if total == 0 {
        return 0.0;
    }
    let shared: usize = left
        .iter()
        .map(|(pair, count)| right.get(pair).map_or(0, |other| (*count).min(*other)))
        .sum();
    (2 * shared) as f64 / total as f64
}

fn bigrams(s: &str) -> HashMap<(char, char), usize> {
    let chars: Vec<char> = s.chars().collect();
    let mut counts = HashMap::new();
    for pair in chars.windows(2) {
        *counts.entry((pair[0], pair[1])).or_insert(0) += 1;
    }
    counts
}
