//! Accepted code patterns and their fingerprints.
//!
//! A [`Fingerprint`] is a bag of identifier tokens; two fragments are compared
//! by the cosine similarity of their token counts. The [`KnowledgeStore`]
//! holds fingerprints that were published without objection, per repository.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::RepoId;

/// Patterns kept per repository by [`InMemoryKnowledgeStore`] by default.
pub const DEFAULT_PATTERNS_PER_REPO: usize = 200;

/// Identifier token counts for a fragment of code.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint(BTreeMap<String, u32>);

impl Fingerprint {
    /// Tokenizes identifiers and keywords, lowercased. Single-character tokens
    /// are dropped.
    ///
    /// ```
    /// use neural_review::analysis::Fingerprint;
    ///
    /// let fp = Fingerprint::from_lines(["let total = compute(total);"]);
    /// assert_eq!(fp.count("total"), 2);
    /// assert_eq!(fp.token_count(), 4);
    /// ```
    pub fn from_lines<'a>(lines: impl IntoIterator<Item = &'a str>) -> Self {
        let mut counts = BTreeMap::new();
        for line in lines {
            let mut start = None;
            for (i, c) in line.char_indices().chain(std::iter::once((line.len(), ' '))) {
                let ident = c.is_alphanumeric() || c == '_';
                match (start, ident) {
                    (None, true) => start = Some(i),
                    (Some(s), false) => {
                        let token = &line[s..i];
                        let leading_digit = token.starts_with(|c: char| c.is_ascii_digit());
                        if token.chars().count() > 1 && !leading_digit {
                            *counts.entry(token.to_lowercase()).or_insert(0) += 1;
                        }
                        start = None;
                    }
                    _ => {}
                }
            }
        }
        Fingerprint(counts)
    }

    pub fn count(&self, token: &str) -> u32 {
        self.0.get(token).copied().unwrap_or(0)
    }

    /// Total number of tokens, counting repeats.
    pub fn token_count(&self) -> u32 {
        self.0.values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Cosine similarity in `0.0..=1.0`. Zero when either side is empty.
    pub fn cosine_similarity(&self, other: &Fingerprint) -> f64 {
        let norm = |fp: &Fingerprint| {
            fp.0.values()
                .map(|&c| f64::from(c) * f64::from(c))
                .sum::<f64>()
                .sqrt()
        };
        let (a, b) = (norm(self), norm(other));
        if a == 0.0 || b == 0.0 {
            return 0.0;
        }
        let dot: f64 = self
            .0
            .iter()
            .map(|(token, &c)| f64::from(c) * f64::from(other.count(token)))
            .sum();
        (dot / (a * b)).clamp(0.0, 1.0)
    }
}

/// A fingerprint accepted for a repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    /// Lowercase file extension the pattern was observed in, or empty.
    pub language: String,
    /// Path the pattern was learned from.
    pub source: String,
    pub fingerprint: Fingerprint,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("knowledge store unavailable: {0}")]
pub struct KnowledgeError(pub String);

/// Accepted patterns per repository.
///
/// Reads return everything accepted so far; writes only append.
pub trait KnowledgeStore: Send + Sync {
    fn accepted_patterns(
        &self,
        repo: &RepoId,
    ) -> impl Future<Output = Result<Vec<Pattern>, KnowledgeError>> + Send;

    fn record(
        &self,
        repo: &RepoId,
        patterns: Vec<Pattern>,
    ) -> impl Future<Output = Result<(), KnowledgeError>> + Send;
}

impl<T: KnowledgeStore> KnowledgeStore for Arc<T> {
    fn accepted_patterns(
        &self,
        repo: &RepoId,
    ) -> impl Future<Output = Result<Vec<Pattern>, KnowledgeError>> + Send {
        (**self).accepted_patterns(repo)
    }

    fn record(
        &self,
        repo: &RepoId,
        patterns: Vec<Pattern>,
    ) -> impl Future<Output = Result<(), KnowledgeError>> + Send {
        (**self).record(repo, patterns)
    }
}

/// Bounded in-process store. Past the per-repository limit the oldest
/// patterns are dropped.
#[derive(Debug)]
pub struct InMemoryKnowledgeStore {
    per_repo: usize,
    patterns: Mutex<HashMap<RepoId, VecDeque<Pattern>>>,
}

impl Default for InMemoryKnowledgeStore {
    fn default() -> Self {
        InMemoryKnowledgeStore::new(DEFAULT_PATTERNS_PER_REPO)
    }
}

impl InMemoryKnowledgeStore {
    pub fn new(per_repo: usize) -> Self {
        InMemoryKnowledgeStore {
            per_repo: per_repo.max(1),
            patterns: Mutex::new(HashMap::new()),
        }
    }

    pub fn pattern_count(&self, repo: &RepoId) -> usize {
        let patterns = self.patterns.lock().unwrap_or_else(|e| e.into_inner());
        patterns.get(repo).map_or(0, VecDeque::len)
    }
}

impl KnowledgeStore for InMemoryKnowledgeStore {
    fn accepted_patterns(
        &self,
        repo: &RepoId,
    ) -> impl Future<Output = Result<Vec<Pattern>, KnowledgeError>> + Send {
        let patterns = self.patterns.lock().unwrap_or_else(|e| e.into_inner());
        let found = patterns
            .get(repo)
            .map(|p| p.iter().cloned().collect())
            .unwrap_or_default();
        std::future::ready(Ok(found))
    }

    fn record(
        &self,
        repo: &RepoId,
        new: Vec<Pattern>,
    ) -> impl Future<Output = Result<(), KnowledgeError>> + Send {
        let mut patterns = self.patterns.lock().unwrap_or_else(|e| e.into_inner());
        let entry = patterns.entry(repo.clone()).or_default();
        entry.extend(new);
        while entry.len() > self.per_repo {
            entry.pop_front();
        }
        std::future::ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(source: &str, code: &str) -> Pattern {
        Pattern {
            language: "py".into(),
            source: source.into(),
            fingerprint: Fingerprint::from_lines([code]),
        }
    }

    #[test]
    fn tokenizer_skips_numbers_and_single_chars() {
        let fp = Fingerprint::from_lines(["x = 42 + foo_bar(x2, Y)"]);
        assert_eq!(fp.count("foo_bar"), 1);
        assert_eq!(fp.count("x2"), 1);
        assert_eq!(fp.count("42"), 0);
        assert_eq!(fp.count("x"), 0);
        assert_eq!(fp.token_count(), 2);
    }

    #[test]
    fn identical_fingerprints_are_fully_similar() {
        let a = Fingerprint::from_lines(["for item in items: total += item.price"]);
        assert!((a.cosine_similarity(&a) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn disjoint_fingerprints_have_zero_similarity() {
        let a = Fingerprint::from_lines(["alpha beta gamma"]);
        let b = Fingerprint::from_lines(["delta epsilon"]);
        assert_eq!(a.cosine_similarity(&b), 0.0);
        assert_eq!(a.cosine_similarity(&Fingerprint::default()), 0.0);
    }

    #[test]
    fn similarity_is_symmetric() {
        let a = Fingerprint::from_lines(["self.items.append(item)", "return self.items"]);
        let b = Fingerprint::from_lines(["self.items.clear()"]);
        let ab = a.cosine_similarity(&b);
        assert!((ab - b.cosine_similarity(&a)).abs() < 1e-12);
        assert!(ab > 0.0 && ab < 1.0);
    }

    #[tokio::test]
    async fn store_is_scoped_per_repo() {
        let store = InMemoryKnowledgeStore::default();
        let repo = RepoId::new("o", "a");
        store
            .record(&repo, vec![pattern("a.py", "import os")])
            .await
            .unwrap();

        assert_eq!(store.accepted_patterns(&repo).await.unwrap().len(), 1);
        let other = RepoId::new("o", "b");
        assert!(store.accepted_patterns(&other).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn store_drops_oldest_past_limit() {
        let store = InMemoryKnowledgeStore::new(2);
        let repo = RepoId::new("o", "a");
        for name in ["one.py", "two.py", "three.py"] {
            store
                .record(&repo, vec![pattern(name, "value = load()")])
                .await
                .unwrap();
        }

        let sources: Vec<String> = store
            .accepted_patterns(&repo)
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.source)
            .collect();
        assert_eq!(sources, vec!["two.py", "three.py"]);
        assert_eq!(store.pattern_count(&repo), 2);
    }
}
