//! Keyword search support
//!
//! FTS5 MATCH queries are built from a small, deliberately naive tokeniser:
//! lowercase, drop stopwords and very short tokens, take the first ten
//! remaining terms, OR-join them. Good enough recall for the short key/value
//! pairs memories are made of, and it sidesteps FTS5's query-syntax
//! characters (`"`, `*`, `:`) that raw user text would otherwise trip over.

use crate::memory::STOPWORDS;

const MAX_QUERY_TERMS: usize = 10;
const MIN_TOKEN_LEN: usize = 3;

/// Build an FTS5 `MATCH` expression from free text. Returns `None` if every
/// token was filtered out (pure-stopword or punctuation-only queries).
pub fn build_fts_query(text: &str) -> Option<String> {
    let terms: Vec<&str> = text
        .split(|c: char| !c.is_alphanumeric())
        .map(|w| w.trim())
        .filter(|w| w.len() >= MIN_TOKEN_LEN)
        .filter(|w| !STOPWORDS.contains(&w.to_lowercase().as_str()))
        .take(MAX_QUERY_TERMS)
        .collect();

    if terms.is_empty() {
        return None;
    }

    Some(
        terms
            .iter()
            .map(|t| sanitize_fts5_token(t))
            .collect::<Vec<_>>()
            .join(" OR "),
    )
}

/// Quote a single token so FTS5 treats it as a literal string, regardless of
/// any FTS5 query-syntax characters it happens to contain.
fn sanitize_fts5_token(token: &str) -> String {
    format!("\"{}\"", token.to_lowercase().replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_or_joined_query_from_meaningful_terms() {
        let query = build_fts_query("What language does the user prefer?").unwrap();
        assert!(query.contains("OR"));
        assert!(query.to_lowercase().contains("language"));
        assert!(!query.to_lowercase().contains("\"the\""));
    }

    #[test]
    fn caps_at_ten_terms() {
        let text = (0..20).map(|i| format!("term{}", i)).collect::<Vec<_>>().join(" ");
        let query = build_fts_query(&text).unwrap();
        assert_eq!(query.matches("OR").count(), MAX_QUERY_TERMS - 1);
    }

    #[test]
    fn pure_stopword_query_returns_none() {
        assert!(build_fts_query("the a an is").is_none());
    }
}
