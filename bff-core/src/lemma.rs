//! Word normalization for keyword matching.
//!
//! A [`Lemmatizer`] maps an inflected word to a canonical base form so that
//! "running", "runs" and "run" compare equal. The registry treats it as an
//! injected capability; [`EnglishLemmatizer`] is a small rule-based
//! implementation that favours predictability over linguistic accuracy.

use once_cell::sync::Lazy;
use std::collections::{HashMap, HashSet};

/// Maps a single lowercase word to its base form.
///
/// Implementations must be idempotent: `lemma(lemma(w)) == lemma(w)`.
pub trait Lemmatizer: Send + Sync {
    /// Return the canonical form of `word`.
    fn lemma(&self, word: &str) -> String;
}

/// Leaves every word as it is. Useful for exact-word matching and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityLemmatizer;

impl Lemmatizer for IdentityLemmatizer {
    fn lemma(&self, word: &str) -> String {
        word.to_string()
    }
}

/// Irregular forms that suffix rules cannot recover.
static IRREGULAR: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    [
        // be
        ("am", "be"),
        ("is", "be"),
        ("are", "be"),
        ("was", "be"),
        ("were", "be"),
        ("been", "be"),
        ("being", "be"),
        // have / do / go
        ("has", "have"),
        ("had", "have"),
        ("having", "have"),
        ("does", "do"),
        ("did", "do"),
        ("done", "do"),
        ("doing", "do"),
        ("goes", "go"),
        ("went", "go"),
        ("gone", "go"),
        ("going", "go"),
        // common strong verbs
        ("ran", "run"),
        ("swam", "swim"),
        ("swum", "swim"),
        ("ate", "eat"),
        ("eaten", "eat"),
        ("saw", "see"),
        ("seen", "see"),
        ("took", "take"),
        ("taken", "take"),
        ("gave", "give"),
        ("given", "give"),
        ("made", "make"),
        ("said", "say"),
        ("got", "get"),
        ("gotten", "get"),
        ("came", "come"),
        ("knew", "know"),
        ("known", "know"),
        ("thought", "think"),
        ("told", "tell"),
        ("killed", "kill"),
        ("fought", "fight"),
        ("stole", "steal"),
        ("stolen", "steal"),
        ("hid", "hide"),
        ("hidden", "hide"),
        ("bought", "buy"),
        ("sold", "sell"),
        ("wrote", "write"),
        ("written", "write"),
        ("drove", "drive"),
        ("driven", "drive"),
        ("spoke", "speak"),
        ("spoken", "speak"),
        ("broke", "break"),
        ("broken", "break"),
        ("lying", "lie"),
        ("dying", "die"),
        // irregular plurals
        ("children", "child"),
        ("men", "man"),
        ("women", "woman"),
        ("people", "person"),
        ("mice", "mouse"),
        ("feet", "foot"),
        ("teeth", "tooth"),
        ("geese", "goose"),
        ("knives", "knife"),
        ("wives", "wife"),
        ("lives", "life"),
        ("leaves", "leaf"),
        ("wolves", "wolf"),
        // comparatives
        ("better", "good"),
        ("best", "good"),
        ("worse", "bad"),
        ("worst", "bad"),
    ]
    .into_iter()
    .collect()
});

/// Base forms produced by the irregular table. These are never reduced further.
static BASE_FORMS: Lazy<HashSet<&'static str>> =
    Lazy::new(|| IRREGULAR.values().copied().collect());

/// Rule-based English lemmatizer.
///
/// Rules are applied until the word stops changing. Suffix rules always
/// shorten the word and irregular forms map straight to a base form, so the
/// loop terminates on a fixed point and the normalizer is idempotent.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnglishLemmatizer;

impl EnglishLemmatizer {
    pub fn new() -> Self {
        Self
    }

    /// One reduction step, or `None` when the word is already a base form.
    fn step(word: &str) -> Option<String> {
        if let Some(base) = IRREGULAR.get(word) {
            return Some((*base).to_string());
        }
        if BASE_FORMS.contains(word) || !word.is_ascii() {
            return None;
        }

        let len = word.len();

        if len > 4 && word.ends_with("ies") {
            return Some(format!("{}y", &word[..len - 3]));
        }
        if word.ends_with("sses") {
            return Some(word[..len - 2].to_string());
        }
        if len > 4 && ["ches", "shes", "xes", "zes"].iter().any(|s| word.ends_with(s)) {
            return Some(word[..len - 2].to_string());
        }
        if len > 3
            && word.ends_with('s')
            && !["ss", "us", "is"].iter().any(|s| word.ends_with(s))
        {
            return Some(word[..len - 1].to_string());
        }
        if len > 4 && word.ends_with("ied") {
            return Some(format!("{}y", &word[..len - 3]));
        }
        if word.ends_with("ed") && !word.ends_with("eed") {
            return Self::restore_stem(&word[..len - 2]);
        }
        if word.ends_with("ing") {
            return Self::restore_stem(&word[..len - 3]);
        }

        None
    }

    /// Tidy a stem left behind by stripping `-ed` or `-ing`.
    ///
    /// Doubled final consonants are undoubled ("runn" -> "run") and short
    /// consonant-vowel-consonant stems get their silent `e` back
    /// ("lov" -> "love").
    fn restore_stem(stem: &str) -> Option<String> {
        let bytes = stem.as_bytes();
        if bytes.len() < 2 || !has_vowel(stem) {
            return None;
        }

        let last = bytes[bytes.len() - 1];
        let prev = bytes[bytes.len() - 2];
        if last == prev
            && is_consonant(bytes, bytes.len() - 1)
            && !matches!(last, b'l' | b's' | b'z')
        {
            return Some(stem[..stem.len() - 1].to_string());
        }

        if bytes.len() == 3
            && is_consonant(bytes, 0)
            && !is_consonant(bytes, 1)
            && is_consonant(bytes, 2)
            && !matches!(last, b'w' | b'x' | b'y')
        {
            return Some(format!("{stem}e"));
        }

        Some(stem.to_string())
    }
}

impl Lemmatizer for EnglishLemmatizer {
    fn lemma(&self, word: &str) -> String {
        let mut current = word.to_string();
        while let Some(next) = Self::step(&current) {
            if next == current {
                break;
            }
            current = next;
        }
        current
    }
}

fn is_consonant(bytes: &[u8], i: usize) -> bool {
    match bytes[i] {
        b'a' | b'e' | b'i' | b'o' | b'u' => false,
        b'y' => i == 0 || !is_consonant(bytes, i - 1),
        b if b.is_ascii_alphabetic() => true,
        _ => false,
    }
}

fn has_vowel(stem: &str) -> bool {
    let bytes = stem.as_bytes();
    (0..bytes.len()).any(|i| bytes[i].is_ascii_alphabetic() && !is_consonant(bytes, i))
}
