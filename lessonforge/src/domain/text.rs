//! Text helpers for cache keys and upstream input limits.

/// Normalize a free-text query so equivalent queries share a cache entry.
///
/// Trims, lower-cases and collapses internal whitespace.
pub fn normalize_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Keep at most `max_words` whitespace-separated words of `text`.
///
/// Returns the input unchanged (modulo whitespace) when it is already short
/// enough. A limit of zero yields an empty string.
pub fn truncate_words(text: &str, max_words: usize) -> String {
    text.split_whitespace()
        .take(max_words)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Number of whitespace-separated words in `text`.
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_query() {
        assert_eq!(
            normalize_query("  Binary   Search\tTrees \n"),
            "binary search trees"
        );
        assert_eq!(normalize_query(""), "");
    }

    #[test]
    fn test_truncate_words() {
        let text = "one two  three four five";
        assert_eq!(truncate_words(text, 3), "one two three");
        assert_eq!(truncate_words(text, 10), "one two three four five");
        assert_eq!(truncate_words(text, 0), "");
        assert_eq!(word_count(text), 5);
    }
}
