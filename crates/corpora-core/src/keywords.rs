//! Query keyword extraction for lexical search.

/// Extract salient query terms: split on whitespace, strip surrounding
/// punctuation, drop tokens of length ≤ 4 characters, lowercase, and
/// deduplicate while preserving input order.
pub fn extract_keywords(query: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut keywords = Vec::new();

    for raw in query.split_whitespace() {
        let token: String = raw
            .trim_matches(|c: char| !c.is_alphanumeric())
            .to_lowercase();
        if token.chars().count() <= 4 {
            continue;
        }
        if seen.insert(token.clone()) {
            keywords.push(token);
        }
    }

    keywords
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drops_short_tokens() {
        let kw = extract_keywords("the neural networks are fast");
        assert_eq!(kw, vec!["neural", "networks"]);
    }

    #[test]
    fn test_strips_punctuation() {
        let kw = extract_keywords("\"embeddings,\" (retrieval)! engine?");
        assert_eq!(kw, vec!["embeddings", "retrieval", "engine"]);
    }

    #[test]
    fn test_preserves_order_and_dedupes() {
        let kw = extract_keywords("ranker combines RANKER signals combines");
        assert_eq!(kw, vec!["ranker", "combines", "signals"]);
    }

    #[test]
    fn test_empty_query() {
        assert!(extract_keywords("").is_empty());
        assert!(extract_keywords("a an the of").is_empty());
    }
}
