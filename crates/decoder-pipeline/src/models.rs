//! Shared, immutable model handles a [`crate::Pipeline`] owns on behalf
//! of every stage it creates.
//!
//! The concrete acoustic, language-model, dictionary, and
//! phonetic-context formats are out of scope (per the core contract);
//! these traits and the context map are opaque seams a real front end
//! plugs concrete model loaders into. Because nothing mutates them
//! after construction, stages share them via a plain `Arc` with no
//! internal locking, matching the "immutable model data... no lock
//! required" resource policy.

use std::collections::HashMap;

/// Scores a word in a language-model context. A real implementation
/// looks up n-gram probabilities; this trait only fixes the seam.
pub trait LanguageModel: Send + Sync {
    fn score(&self, word_id: i32, context: &[i32]) -> i32;
}

/// Resolves between word text and the word ids a bptbl/arc buffer
/// actually carries.
pub trait Dictionary: Send + Sync {
    fn word_id(&self, word: &str) -> Option<i32>;
    fn word_text(&self, word_id: i32) -> Option<&str>;
}

/// Maps a word id to the phone sequence (or similar context key) a
/// search stage would cross-word-triphone against. Kept as a plain
/// data map rather than a trait since, unlike the LM/dictionary, a
/// pipeline always owns exactly one of these and never needs to swap
/// its implementation.
#[derive(Debug, Default, Clone)]
pub struct PhoneticContextMap {
    contexts: HashMap<i32, Vec<i32>>,
}

impl PhoneticContextMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, word_id: i32, phones: Vec<i32>) {
        self.contexts.insert(word_id, phones);
    }

    pub fn phones(&self, word_id: i32) -> Option<&[i32]> {
        self.contexts.get(&word_id).map(Vec::as_slice)
    }
}

/// A [`Dictionary`]/[`LanguageModel`] pair that does nothing, for
/// pipelines driven by [`decoder_search::ScriptedStage`] in tests and
/// demos where no real model lookups occur.
#[derive(Debug, Default)]
pub struct NullDictionary;

impl Dictionary for NullDictionary {
    fn word_id(&self, _word: &str) -> Option<i32> {
        None
    }

    fn word_text(&self, _word_id: i32) -> Option<&str> {
        None
    }
}

#[derive(Debug, Default)]
pub struct NullLanguageModel;

impl LanguageModel for NullLanguageModel {
    fn score(&self, _word_id: i32, _context: &[i32]) -> i32 {
        0
    }
}
