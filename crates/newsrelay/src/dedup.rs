use std::collections::BTreeSet;
use std::sync::Arc;

use newsrelay_db::{Database, DbResult};
use tracing::{debug, info, warn};

use crate::ai::SimilarityOracle;
use crate::feed::FeedArticle;

const LOG_TARGET: &str = "newsrelay::dedup";

/// Minimum Jaccard similarity for two titles to be considered duplicates
/// without asking the oracle.
pub const TITLE_SIMILARITY_THRESHOLD: f64 = 0.8;

/// Skip Jaccard comparison for titles with fewer tokens than this.
pub const MIN_TITLE_TOKENS: usize = 3;

/// Normalize a title for fuzzy comparison.
///
/// Lowercases, replaces non-alphanumeric/non-whitespace with space,
/// and collapses whitespace.
pub fn normalize_title(title: &str) -> String {
    let lowered = title.to_lowercase();
    let replaced: String = lowered
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c.is_whitespace() {
                c
            } else {
                ' '
            }
        })
        .collect();
    replaced.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Split a normalized title into a set of tokens.
pub fn title_tokens(normalized: &str) -> BTreeSet<&str> {
    normalized.split_whitespace().collect()
}

/// Compute Jaccard similarity between two token sets.
pub fn jaccard_similarity(a: &BTreeSet<&str>, b: &BTreeSet<&str>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    intersection as f64 / union as f64
}

/// Whether two titles are near-identical by token overlap alone
pub fn titles_overlap(a: &str, b: &str) -> bool {
    let (a, b) = (normalize_title(a), normalize_title(b));
    if a == b && !a.is_empty() {
        return true;
    }
    let (a, b) = (title_tokens(&a), title_tokens(&b));
    if a.len() < MIN_TITLE_TOKENS || b.len() < MIN_TITLE_TOKENS {
        return false;
    }
    TITLE_SIMILARITY_THRESHOLD <= jaccard_similarity(&a, &b)
}

/// Which check matched a candidate to a recent article
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateMatch {
    /// Near-identical titles, decided locally
    TitleOverlap,
    /// The similarity oracle said same story
    Oracle,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DuplicateVerdict {
    Unique,
    /// The link (in canonical form) was already recorded
    SeenLink,
    /// A recently recorded article covers the same story
    SimilarTitle {
        existing_title: String,
        matched_by: DuplicateMatch,
    },
}

impl DuplicateVerdict {
    pub fn is_duplicate(&self) -> bool {
        !matches!(self, DuplicateVerdict::Unique)
    }
}

/// Decides whether a candidate was, or is about the same story as, something
/// already published
pub struct DuplicateDetector {
    db: Arc<Database>,
    oracle: Arc<dyn SimilarityOracle>,
    window: usize,
}

impl DuplicateDetector {
    pub fn new(db: Arc<Database>, oracle: Arc<dyn SimilarityOracle>, window: usize) -> Self {
        Self { db, oracle, window }
    }

    pub async fn is_duplicate(&self, article: &FeedArticle) -> DbResult<bool> {
        Ok(self.check(article).await?.is_duplicate())
    }

    /// Exact link match first, then the most recent titles, newest first
    ///
    /// Oracle failures count as "not the same story" for that one pair.
    pub async fn check(&self, article: &FeedArticle) -> DbResult<DuplicateVerdict> {
        if self.db.exists(&article.link).await? {
            debug!(target: LOG_TARGET, link = %article.link, "Link already recorded");
            return Ok(DuplicateVerdict::SeenLink);
        }

        for recent in self.db.recent_titles(self.window).await? {
            if titles_overlap(&article.title, &recent.title) {
                info!(
                    target: LOG_TARGET,
                    title = %article.title,
                    existing = %recent.title,
                    "Title overlaps a recent article"
                );
                return Ok(DuplicateVerdict::SimilarTitle {
                    existing_title: recent.title,
                    matched_by: DuplicateMatch::TitleOverlap,
                });
            }

            match self.oracle.same_story(&article.title, &recent.title).await {
                Ok(true) => {
                    info!(
                        target: LOG_TARGET,
                        title = %article.title,
                        existing = %recent.title,
                        "Same story as a recent article"
                    );
                    return Ok(DuplicateVerdict::SimilarTitle {
                        existing_title: recent.title,
                        matched_by: DuplicateMatch::Oracle,
                    });
                }
                Ok(false) => {}
                Err(err) => {
                    warn!(
                        target: LOG_TARGET,
                        err = %err,
                        title = %article.title,
                        existing = %recent.title,
                        "Similarity check failed, assuming different stories"
                    );
                }
            }
        }

        Ok(DuplicateVerdict::Unique)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── normalize_title ─────────────────────────────────────────────

    #[test]
    fn normalize_title_lowercases_and_strips_punctuation() {
        assert_eq!(normalize_title("Hello, World!"), "hello world");
        assert_eq!(normalize_title("  Foo   Bar  "), "foo bar");
        assert_eq!(normalize_title("Rust 2.0 — Released"), "rust 2 0 released");
    }

    #[test]
    fn normalize_title_handles_empty() {
        assert_eq!(normalize_title(""), "");
        assert_eq!(normalize_title("!!!"), "");
    }

    // ── jaccard_similarity ──────────────────────────────────────────

    #[test]
    fn jaccard_identical_sets() {
        let a = title_tokens("foo bar baz");
        assert!((jaccard_similarity(&a, &a) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn jaccard_disjoint_sets() {
        let a = title_tokens("foo bar baz");
        let b = title_tokens("qux quux corge");
        assert!(jaccard_similarity(&a, &b).abs() < f64::EPSILON);
    }

    #[test]
    fn jaccard_partial_overlap() {
        // {a, b, c} vs {b, c, d}: intersection 2, union 4
        let a = title_tokens("a b c");
        let b = title_tokens("b c d");
        assert!((jaccard_similarity(&a, &b) - 0.5).abs() < f64::EPSILON);
    }

    // ── titles_overlap ──────────────────────────────────────────────

    #[test]
    fn overlap_ignores_case_and_punctuation() {
        assert!(titles_overlap(
            "Foo launches v2!",
            "foo launches v2"
        ));
        assert!(titles_overlap(
            "Apple announces the new M5 MacBook Pro today",
            "Apple announces new M5 MacBook Pro today"
        ));
    }

    #[test]
    fn overlap_needs_enough_tokens() {
        // Identical short titles still match exactly
        assert!(titles_overlap("Rust", "rust"));
        assert!(!titles_overlap("Rust news", "Rust release"));
    }

    #[test]
    fn different_stories_do_not_overlap() {
        assert!(!titles_overlap(
            "Foo launches v2",
            "Bar acquires Baz for $2B"
        ));
        assert!(!titles_overlap("", ""));
    }
}
