//! Field analysis for the FTS twin fields
//!
//! Every analyzed field gets its tokens from here, on both the write path
//! (populating a field's `_fts` twin) and the query path (FTS clauses), so
//! the two can never disagree on what a token is.
//!
//! Analysis is driven by the query AST's [`Analyzer`]:
//! - `Standard` walks characters, accumulating lowercased alphanumeric runs
//!   and dropping runs shorter than [`MIN_TOKEN_LEN`]
//! - `Keyword` keeps the whole trimmed value as one lowercased token

use chrondb_core::Analyzer;

/// Shortest token the standard analyzer emits, in characters.
///
/// Single-character runs ("a", "I", "x") carry no selectivity and would
/// dominate posting lists.
pub const MIN_TOKEN_LEN: usize = 2;

/// Analyze field text with the given analyzer.
pub fn analyze(text: &str, analyzer: Analyzer) -> Vec<String> {
    match analyzer {
        Analyzer::Standard => standard_tokens(text),
        Analyzer::Keyword => {
            let token = text.trim().to_lowercase();
            if token.is_empty() {
                vec![]
            } else {
                vec![token]
            }
        }
    }
}

/// Standard analysis: lowercased alphanumeric runs of at least
/// [`MIN_TOKEN_LEN`] characters, in input order.
pub fn standard_tokens(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut run = String::new();
    for c in text.chars() {
        if c.is_alphanumeric() {
            // Unicode lowercasing may expand one char into several.
            for lowered in c.to_lowercase() {
                run.push(lowered);
            }
        } else {
            flush_run(&mut run, &mut tokens);
        }
    }
    flush_run(&mut run, &mut tokens);
    tokens
}

fn flush_run(run: &mut String, tokens: &mut Vec<String>) {
    if run.chars().count() >= MIN_TOKEN_LEN {
        tokens.push(std::mem::take(run));
    } else {
        run.clear();
    }
}

/// Analyze query text, dropping repeated tokens so they cannot double-count
/// in scoring. First-occurrence order is kept; query strings are short
/// enough that the linear containment check beats a set allocation.
pub fn query_tokens(text: &str, analyzer: Analyzer) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for token in analyze(text, analyzer) {
        if !out.contains(&token) {
            out.push(token);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_basic() {
        let tokens = standard_tokens("The quick brown fox!");
        assert_eq!(tokens, vec!["the", "quick", "brown", "fox"]);
    }

    #[test]
    fn test_standard_drops_short_runs() {
        let tokens = standard_tokens("I am a test");
        assert_eq!(tokens, vec!["am", "test"]);
    }

    #[test]
    fn test_standard_keeps_digit_runs() {
        let tokens = standard_tokens("error 404 at line12");
        assert_eq!(tokens, vec!["error", "404", "at", "line12"]);
    }

    #[test]
    fn test_standard_empty_and_punctuation() {
        assert!(standard_tokens("").is_empty());
        assert!(standard_tokens("...---...").is_empty());
    }

    #[test]
    fn test_standard_trailing_run_flushed() {
        assert_eq!(standard_tokens("end"), vec!["end"]);
        assert_eq!(standard_tokens("...tail"), vec!["tail"]);
    }

    #[test]
    fn test_standard_unicode_lowercasing() {
        // 'É' lowercases to 'é'; accented runs tokenize like ASCII ones
        assert_eq!(standard_tokens("Été chaud"), vec!["été", "chaud"]);
    }

    #[test]
    fn test_query_tokens_dedup_preserves_order() {
        let tokens = query_tokens("apple banana apple cherry", Analyzer::Standard);
        assert_eq!(tokens, vec!["apple", "banana", "cherry"]);
        let tokens = query_tokens("test test TEST", Analyzer::Standard);
        assert_eq!(tokens, vec!["test"]);
    }

    #[test]
    fn test_keyword_single_token() {
        let tokens = analyze("  New York ", Analyzer::Keyword);
        assert_eq!(tokens, vec!["new york"]);
        assert!(analyze("   ", Analyzer::Keyword).is_empty());
    }

    #[test]
    fn test_analyze_standard_matches_standard_tokens() {
        assert_eq!(
            analyze("a b cd", Analyzer::Standard),
            standard_tokens("a b cd")
        );
    }
}
