//! Hybrid query planning: phrase parsing, lexical expressions and rank fusion.
//!
//! A hybrid search runs over one candidate set (the nearest vector
//! neighbours) ranked twice: once by embedding distance, once by full-text
//! relevance for the candidates matching the lexical expression. The two
//! dense rankings are fused as
//!
//! ```text
//! both streams:  BOOST + alpha / vector_rank + (1 - alpha) / lexical_rank
//! vector only:           alpha / vector_rank
//! ```
//!
//! `BOOST` exceeds any vector-only score, so every lexical hit outranks every
//! candidate that only matched by embedding.

use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;

/// Additive boost for candidates present in the lexical stream.
pub const EXACT_MATCH_BOOST: f64 = 10.0;

/// A query split into quoted phrases and loose terms.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ParsedQuery {
    pub phrases: Vec<String>,
    pub terms: Vec<String>,
}

impl ParsedQuery {
    pub fn is_empty(&self) -> bool {
        self.phrases.is_empty() && self.terms.is_empty()
    }
}

fn closing_quote(open: char) -> Option<char> {
    match open {
        '"' => Some('"'),
        '\'' => Some('\''),
        '\u{201C}' => Some('\u{201D}'),
        '\u{2018}' => Some('\u{2019}'),
        _ => None,
    }
}

/// Split `text` into quoted phrases and whitespace-delimited terms.
///
/// Straight and curly double or single quotes delimit phrases. Single
/// quotes only open a phrase at the start of a token, so apostrophes inside
/// words stay part of the word. A quote with no closing partner is dropped
/// and the text after it is read as ordinary terms.
pub fn parse_query(text: &str) -> ParsedQuery {
    let chars: Vec<char> = text.chars().collect();
    let mut phrases = Vec::new();
    let mut remainder = String::with_capacity(text.len());
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let at_token_start = i == 0 || chars[i - 1].is_whitespace();
        let is_single = c == '\'' || c == '\u{2018}';

        match closing_quote(c) {
            Some(closer) if at_token_start || !is_single => {
                let close_at = chars[i + 1..]
                    .iter()
                    .position(|&ch| ch == closer)
                    .map(|offset| i + 1 + offset);
                match close_at {
                    Some(end) => {
                        let phrase: String = chars[i + 1..end].iter().collect();
                        let phrase = phrase.trim();
                        if !phrase.is_empty() {
                            phrases.push(phrase.to_string());
                        }
                        remainder.push(' ');
                        i = end + 1;
                    }
                    None => {
                        remainder.push(' ');
                        i += 1;
                    }
                }
            }
            _ => {
                remainder.push(c);
                i += 1;
            }
        }
    }

    ParsedQuery {
        phrases,
        terms: remainder.split_whitespace().map(str::to_string).collect(),
    }
}

/// Full-text match expression: every phrase AND all terms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexicalQuery {
    pub phrases: Vec<String>,
    pub terms: Vec<String>,
}

fn has_searchable_text(s: &str) -> bool {
    s.chars().any(char::is_alphanumeric)
}

fn fts5_quote(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

impl LexicalQuery {
    /// Build the lexical side of `parsed`; `None` when nothing is searchable.
    pub fn from_parsed(parsed: &ParsedQuery) -> Option<Self> {
        let phrases: Vec<String> = parsed
            .phrases
            .iter()
            .filter(|p| has_searchable_text(p))
            .cloned()
            .collect();
        let terms: Vec<String> = parsed
            .terms
            .iter()
            .filter(|t| has_searchable_text(t))
            .cloned()
            .collect();
        if phrases.is_empty() && terms.is_empty() {
            None
        } else {
            Some(Self { phrases, terms })
        }
    }

    /// Render as an FTS5 `MATCH` argument.
    ///
    /// Every phrase and term is emitted as a quoted string, so operators and
    /// column filters typed by the user are matched as plain text.
    pub fn to_fts5(&self) -> String {
        let mut parts: Vec<String> = self.phrases.iter().map(|p| fts5_quote(p)).collect();
        match self.terms.len() {
            0 => {}
            1 => parts.push(fts5_quote(&self.terms[0])),
            _ => parts.push(format!(
                "({})",
                self.terms
                    .iter()
                    .map(|t| fts5_quote(t))
                    .collect::<Vec<_>>()
                    .join(" AND ")
            )),
        }
        parts.join(" AND ")
    }
}

/// Dense ranks (1 = best) for a stream already sorted best-first.
///
/// Adjacent equal keys share a rank and the next distinct key takes the
/// following integer.
pub fn dense_ranks<K: PartialEq>(ordered_keys: &[K]) -> Vec<usize> {
    let mut ranks = Vec::with_capacity(ordered_keys.len());
    let mut rank = 0;
    for (i, key) in ordered_keys.iter().enumerate() {
        if i == 0 || ordered_keys[i - 1] != *key {
            rank += 1;
        }
        ranks.push(rank);
    }
    ranks
}

/// A candidate's position in the vector stream and its fused score.
#[derive(Debug, Clone, PartialEq)]
pub struct FusedCandidate {
    /// Index into the vector stream
    pub position: usize,
    pub vector_rank: usize,
    pub lexical_rank: Option<usize>,
    pub combined: f64,
}

/// Plans and fuses hybrid rankings for one `alpha`.
#[derive(Debug, Clone, Copy)]
pub struct HybridQueryPlanner {
    alpha: f64,
}

/// Everything needed to execute one hybrid query.
#[derive(Debug, Clone)]
pub struct HybridPlan {
    pub parsed: ParsedQuery,
    pub lexical: Option<LexicalQuery>,
    /// Text sent to the embedding provider
    pub embedding_text: String,
}

impl HybridQueryPlanner {
    /// `alpha` weights the vector rank; values outside `[0, 1]` are clamped.
    pub fn new(alpha: f64) -> Self {
        let alpha = if alpha.is_nan() { 0.5 } else { alpha.clamp(0.0, 1.0) };
        Self { alpha }
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn plan(&self, query: &str) -> HybridPlan {
        let parsed = parse_query(query);
        let lexical = LexicalQuery::from_parsed(&parsed);
        let embedding_text = parsed
            .phrases
            .iter()
            .chain(parsed.terms.iter())
            .cloned()
            .collect::<Vec<_>>()
            .join(" ");
        HybridPlan {
            parsed,
            lexical,
            embedding_text,
        }
    }

    /// Fused score for one candidate.
    pub fn combined_score(&self, vector_rank: usize, lexical_rank: Option<usize>) -> f64 {
        let vector_part = self.alpha / vector_rank.max(1) as f64;
        match lexical_rank {
            Some(lexical_rank) => {
                EXACT_MATCH_BOOST + vector_part + (1.0 - self.alpha) / lexical_rank.max(1) as f64
            }
            None => vector_part,
        }
    }

    /// Fuse the vector stream with lexical ranks keyed by vector position.
    ///
    /// Output is sorted by descending combined score; the sort is stable, so
    /// ties keep vector-stream order.
    pub fn fuse(
        &self,
        vector_ranks: &[usize],
        lexical_ranks: &HashMap<usize, usize>,
    ) -> Vec<FusedCandidate> {
        let mut fused: Vec<FusedCandidate> = vector_ranks
            .iter()
            .enumerate()
            .map(|(position, &vector_rank)| {
                let lexical_rank = lexical_ranks.get(&position).copied();
                FusedCandidate {
                    position,
                    vector_rank,
                    lexical_rank,
                    combined: self.combined_score(vector_rank, lexical_rank),
                }
            })
            .collect();
        fused.sort_by(|a, b| b.combined.partial_cmp(&a.combined).unwrap_or(Ordering::Equal));
        fused
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phrase_and_terms() {
        let parsed = parse_query("Master Card \"Simplicity 9112\"");
        assert_eq!(parsed.phrases, vec!["Simplicity 9112"]);
        assert_eq!(parsed.terms, vec!["Master", "Card"]);
    }

    #[test]
    fn test_empty_query() {
        let parsed = parse_query("");
        assert!(parsed.phrases.is_empty());
        assert!(parsed.terms.is_empty());
        assert!(parse_query("   ").is_empty());
    }

    #[test]
    fn test_curly_and_single_quotes() {
        let parsed = parse_query("\u{201C} wood  stove \u{201D} 'rocket mass' heater");
        assert_eq!(parsed.phrases, vec!["wood  stove", "rocket mass"]);
        assert_eq!(parsed.terms, vec!["heater"]);

        let parsed = parse_query("\u{2018}root cellar\u{2019}");
        assert_eq!(parsed.phrases, vec!["root cellar"]);
    }

    #[test]
    fn test_apostrophes_inside_words_are_not_quotes() {
        let parsed = parse_query("don't panic");
        assert!(parsed.phrases.is_empty());
        assert_eq!(parsed.terms, vec!["don't", "panic"]);
    }

    #[test]
    fn test_unterminated_quote_is_plain_text() {
        let parsed = parse_query("solar \"panel angle");
        assert!(parsed.phrases.is_empty());
        assert_eq!(parsed.terms, vec!["solar", "panel", "angle"]);
    }

    #[test]
    fn test_lexical_expression_shapes() {
        let both = LexicalQuery::from_parsed(&parse_query("Master Card \"Simplicity 9112\""))
            .expect("searchable");
        assert_eq!(
            both.to_fts5(),
            "\"Simplicity 9112\" AND (\"Master\" AND \"Card\")"
        );

        let phrase_only =
            LexicalQuery::from_parsed(&parse_query("\"grey water\"")).expect("searchable");
        assert_eq!(phrase_only.to_fts5(), "\"grey water\"");

        let terms_only = LexicalQuery::from_parsed(&parse_query("compost")).expect("searchable");
        assert_eq!(terms_only.to_fts5(), "\"compost\"");

        assert!(LexicalQuery::from_parsed(&parse_query("-- !!")).is_none());
    }

    #[test]
    fn test_fts5_operators_are_quoted() {
        let query = LexicalQuery::from_parsed(&parse_query("NEAR OR text_content:x"))
            .expect("searchable");
        assert_eq!(
            query.to_fts5(),
            "(\"NEAR\" AND \"OR\" AND \"text_content:x\")"
        );
    }

    #[test]
    fn test_dense_ranks_share_ties() {
        assert_eq!(dense_ranks(&[0.1, 0.1, 0.3, 0.4, 0.4]), vec![1, 1, 2, 3, 3]);
        assert!(dense_ranks::<f32>(&[]).is_empty());
    }

    #[test]
    fn test_lexical_hit_outranks_vector_only() {
        let planner = HybridQueryPlanner::new(0.5);
        let lexical: HashMap<usize, usize> = [(3, 1)].into_iter().collect();
        let fused = planner.fuse(&[1, 2, 3, 4], &lexical);

        assert_eq!(fused[0].position, 3);
        assert!((fused[0].combined - (10.0 + 0.5 / 4.0 + 0.5)).abs() < 1e-12);
        assert_eq!(
            fused[1..].iter().map(|c| c.position).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert!((fused[1].combined - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_ties_keep_vector_order() {
        let planner = HybridQueryPlanner::new(1.0);
        let fused = planner.fuse(&[1, 1, 2], &HashMap::new());
        assert_eq!(
            fused.iter().map(|c| c.position).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
    }

    #[test]
    fn test_alpha_is_clamped() {
        assert_eq!(HybridQueryPlanner::new(3.0).alpha(), 1.0);
        assert_eq!(HybridQueryPlanner::new(-1.0).alpha(), 0.0);
        assert_eq!(HybridQueryPlanner::new(f64::NAN).alpha(), 0.5);
    }

    #[test]
    fn test_plan_embedding_text() {
        let plan = HybridQueryPlanner::new(0.5).plan("Master Card \"Simplicity 9112\"");
        assert_eq!(plan.embedding_text, "Simplicity 9112 Master Card");
        assert!(plan.lexical.is_some());
    }
}
