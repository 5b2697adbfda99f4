//! Forbidden keyword registry.
//!
//! Keywords are stored in normalized form. Both writes and probes go through
//! the same [`Lemmatizer`], so membership does not depend on which inflection
//! was registered or which one appears in a message.

use crate::lemma::{EnglishLemmatizer, Lemmatizer};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

/// Characters stripped from both ends of a token before normalization.
const TOKEN_PUNCTUATION: &[char] = &['.', ',', '!', '?', ';', ':', '"', '\''];

/// A set of normalized forbidden terms guarded by a single lock.
pub struct KeywordRegistry {
    lemmatizer: Arc<dyn Lemmatizer>,
    keywords: Mutex<HashSet<String>>,
}

impl KeywordRegistry {
    /// Create an empty registry using the given normalizer.
    pub fn new(lemmatizer: Arc<dyn Lemmatizer>) -> Self {
        Self {
            lemmatizer,
            keywords: Mutex::new(HashSet::new()),
        }
    }

    /// Create an empty registry backed by [`EnglishLemmatizer`].
    pub fn english() -> Self {
        Self::new(Arc::new(EnglishLemmatizer::new()))
    }

    /// Lowercase and lemmatize a single word.
    pub fn normalize(&self, word: &str) -> String {
        self.lemmatizer.lemma(&word.to_lowercase())
    }

    /// Add words to the registry. Returns how many new lemmas were inserted.
    ///
    /// Words collapsing to an existing lemma are ignored, as are blank words.
    pub fn add<I, S>(&self, words: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let lemmas: Vec<String> = words
            .into_iter()
            .map(|w| w.as_ref().trim().to_string())
            .filter(|w| !w.is_empty())
            .map(|w| self.normalize(&w))
            .collect();

        if lemmas.is_empty() {
            return 0;
        }

        let mut keywords = self.keywords.lock();
        let inserted = lemmas
            .into_iter()
            .map(|lemma| keywords.insert(lemma))
            .filter(|&new| new)
            .count();
        tracing::debug!(inserted, total = keywords.len(), "keywords added");
        inserted
    }

    /// Whether any inflection of `word` is registered.
    pub fn contains(&self, word: &str) -> bool {
        let lemma = self.normalize(word.trim());
        if lemma.is_empty() {
            return false;
        }
        self.keywords.lock().contains(&lemma)
    }

    /// Return every token of `text` whose lemma is registered.
    ///
    /// Tokens are whitespace separated with surrounding punctuation removed.
    /// Matches keep the order they appear in and repeats are reported again.
    pub fn scan(&self, text: &str) -> Vec<String> {
        let lemmas: Vec<String> = text
            .split_whitespace()
            .map(|token| token.trim_matches(TOKEN_PUNCTUATION))
            .filter(|token| !token.is_empty())
            .map(|token| self.normalize(token))
            .collect();

        if lemmas.is_empty() {
            return Vec::new();
        }

        let keywords = self.keywords.lock();
        lemmas
            .into_iter()
            .filter(|lemma| keywords.contains(lemma))
            .collect()
    }

    /// Sorted snapshot of all registered lemmas.
    pub fn keywords(&self) -> Vec<String> {
        let mut all: Vec<String> = self.keywords.lock().iter().cloned().collect();
        all.sort();
        all
    }

    pub fn len(&self) -> usize {
        self.keywords.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.keywords.lock().is_empty()
    }

    /// Remove every keyword.
    pub fn clear(&self) {
        self.keywords.lock().clear();
    }
}

impl Default for KeywordRegistry {
    fn default() -> Self {
        Self::english()
    }
}

impl std::fmt::Debug for KeywordRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeywordRegistry")
            .field("len", &self.len())
            .finish()
    }
}
