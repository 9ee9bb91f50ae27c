//! Keyword frequency summary

use std::collections::HashMap;

/// Tokens must be longer than this many characters to count
pub const MIN_TOKEN_CHARS: usize = 3;
/// How many keywords to report
pub const MAX_KEYWORDS: usize = 10;

/// Most frequent long tokens, by descending count. Ties keep the order in
/// which tokens first appeared in the text.
pub fn top_keywords(text: &str, limit: usize) -> Vec<String> {
    let lowered = text.to_lowercase();

    // (token, count) in first-occurrence order
    let mut counts: Vec<(&str, usize)> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();

    for token in lowered.split_whitespace() {
        if token.chars().count() <= MIN_TOKEN_CHARS {
            continue;
        }
        match index.get(token) {
            Some(&i) => counts[i].1 += 1,
            None => {
                index.insert(token, counts.len());
                counts.push((token, 1));
            }
        }
    }

    // stable sort keeps first-occurrence order among equal counts
    counts.sort_by(|a, b| b.1.cmp(&a.1));
    counts
        .into_iter()
        .take(limit)
        .map(|(token, _)| token.to_string())
        .collect()
}
