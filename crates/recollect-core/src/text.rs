//! Lexical helpers
//!
//! Tokenization, word-overlap similarity and BM25 scoring used by the
//! storage adapters for `text_search` and by consolidation for cheap
//! similarity checks when no embedding is available.

use std::collections::{HashMap, HashSet};

/// BM25 term-frequency saturation.
const BM25_K1: f64 = 1.2;
/// BM25 length normalization.
const BM25_B: f64 = 0.75;

/// Split text into lowercase alphanumeric tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect()
}

/// Distinct tokens of `text`.
pub fn word_set(text: &str) -> HashSet<String> {
    tokenize(text).into_iter().collect()
}

/// Jaccard similarity of the word sets of two texts.
pub fn jaccard_similarity(a: &str, b: &str) -> f64 {
    let words_a = word_set(a);
    let words_b = word_set(b);
    if words_a.is_empty() && words_b.is_empty() {
        return 1.0;
    }
    let intersection = words_a.intersection(&words_b).count();
    let union = words_a.union(&words_b).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

/// Score `documents` against `query` with BM25.
///
/// Document frequencies are computed over the supplied set. Only documents
/// sharing at least one term with the query are returned, sorted by score
/// descending and then by id.
pub fn bm25_rank<'a, I>(query: &str, documents: I) -> Vec<(String, f64)>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let query_terms: HashSet<String> = word_set(query);
    if query_terms.is_empty() {
        return Vec::new();
    }

    let docs: Vec<(&str, Vec<String>)> = documents
        .into_iter()
        .map(|(id, content)| (id, tokenize(content)))
        .collect();
    if docs.is_empty() {
        return Vec::new();
    }

    let total_len: usize = docs.iter().map(|(_, tokens)| tokens.len()).sum();
    let avg_len = (total_len as f64 / docs.len() as f64).max(1.0);
    let n = docs.len() as f64;

    let mut doc_freq: HashMap<&str, usize> = HashMap::new();
    for (_, tokens) in &docs {
        let unique: HashSet<&str> = tokens.iter().map(String::as_str).collect();
        for term in unique {
            if query_terms.contains(term) {
                *doc_freq.entry(term).or_insert(0) += 1;
            }
        }
    }

    let mut scored: Vec<(String, f64)> = docs
        .iter()
        .filter_map(|(id, tokens)| {
            let len = tokens.len() as f64;
            let mut score = 0.0;
            for term in &query_terms {
                let tf = tokens.iter().filter(|t| *t == term).count() as f64;
                if tf == 0.0 {
                    continue;
                }
                let df = doc_freq.get(term.as_str()).copied().unwrap_or(0) as f64;
                let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();
                score += idf * (tf * (BM25_K1 + 1.0))
                    / (tf + BM25_K1 * (1.0 - BM25_B + BM25_B * len / avg_len));
            }
            (score > 0.0).then(|| (id.to_string(), score))
        })
        .collect();

    scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    scored
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize() {
        assert_eq!(
            tokenize("User's favourite IDE: VS-Code!"),
            vec!["user", "s", "favourite", "ide", "vs", "code"]
        );
        assert!(tokenize("  ...  ").is_empty());
    }

    #[test]
    fn test_jaccard() {
        assert!((jaccard_similarity("the cat sat", "the cat sat") - 1.0).abs() < 1e-9);
        assert!((jaccard_similarity("a b", "c d")).abs() < 1e-9);
        let sim = jaccard_similarity("user likes dark mode", "user likes light mode");
        assert!(sim > 0.5 && sim < 1.0);
    }

    #[test]
    fn test_bm25_prefers_matching_documents() {
        let docs = vec![
            ("1", "User prefers dark mode in the editor"),
            ("2", "User lives in Berlin"),
            ("3", "Dark roast coffee is the user's favourite, dark dark"),
        ];
        let ranked = bm25_rank("dark mode", docs);

        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].0, "1");
        assert!(ranked.iter().all(|(id, _)| id != "2"));
    }

    #[test]
    fn test_bm25_empty_query() {
        assert!(bm25_rank("", vec![("1", "anything")]).is_empty());
    }
}
