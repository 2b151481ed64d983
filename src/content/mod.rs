pub mod loader;
pub mod sanitize;
pub mod sheets;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

/// Number of sequential blocks in the course.
pub const BLOCK_COUNT: u8 = 4;

/// Telegram refuses messages longer than this (in UTF-16 code units).
pub const MAX_TEXT_LEN: usize = 4096;

/// Length of a string the way the chat transport counts it.
pub fn display_len(text: &str) -> usize {
    text.encode_utf16().count()
}

/// One of the four content + quiz units, numbered 1..=4.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(try_from = "u8", into = "u8")]
pub struct Block(u8);

impl Block {
    pub const FIRST: Block = Block(1);
    pub const ALL: [Block; BLOCK_COUNT as usize] = [Block(1), Block(2), Block(3), Block(4)];

    pub fn new(number: u8) -> Option<Self> {
        (1..=BLOCK_COUNT).contains(&number).then_some(Self(number))
    }

    pub fn next(self) -> Option<Self> {
        Self::new(self.0 + 1)
    }

    pub fn previous(self) -> Option<Self> {
        Self::new(self.0.checked_sub(1)?)
    }

    /// Key used for this block in every per-chapter map of the progress record.
    pub fn key(self) -> String {
        format!("chapter_{}", self.0)
    }
}

impl Default for Block {
    fn default() -> Self {
        Self::FIRST
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<u8> for Block {
    type Error = String;

    fn try_from(number: u8) -> Result<Self, Self::Error> {
        Self::new(number).ok_or_else(|| format!("block {} is outside 1..={}", number, BLOCK_COUNT))
    }
}

impl From<Block> for u8 {
    fn from(block: Block) -> Self {
        block.0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Question {
    pub text: String,
    pub options: Vec<String>,
    /// 0-based index into `options`. Not guaranteed to be in range.
    pub correct: usize,
    pub explanation: String,
}

impl Question {
    pub fn new(text: String, options: Vec<String>, correct: usize, explanation: String) -> Self {
        Self {
            text,
            options,
            correct,
            explanation,
        }
    }

    /// An out-of-range `correct` makes every answer wrong instead of panicking.
    pub fn is_correct(&self, answer: usize) -> bool {
        answer == self.correct && answer < self.options.len()
    }

    pub fn option(&self, index: usize) -> Option<&str> {
        self.options.get(index).map(String::as_str)
    }
}

/// Key/value reference table (menu, wine pairings, allergens).
///
/// Keys are stored trimmed and lower-cased. Entries keep table order, which
/// matters for the fuzzy [`Guide::lookup`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Guide {
    entries: Vec<(String, String)>,
}

impl Guide {
    /// Blank keys are ignored. A repeated key overwrites the value in place.
    pub fn insert(&mut self, key: &str, value: String) {
        let key = key.trim().to_lowercase();
        if key.is_empty() {
            return;
        }
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => *existing = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        let key = key.trim().to_lowercase();
        self.entries
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    /// First entry whose key contains the query or is contained in it.
    pub fn lookup(&self, query: &str) -> Option<&str> {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return None;
        }
        self.entries
            .iter()
            .find(|(k, _)| k.contains(&query) || query.contains(k.as_str()))
            .map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Everything the bot teaches, loaded in one go and never mutated afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentSnapshot {
    pub texts: BTreeMap<Block, Vec<String>>,
    pub questions: BTreeMap<Block, Vec<Question>>,
    pub menu: Guide,
    pub wine: Guide,
    pub allergens: Guide,
}

impl ContentSnapshot {
    pub fn texts(&self, block: Block) -> &[String] {
        self.texts.get(&block).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn questions(&self, block: Block) -> &[Question] {
        self.questions.get(&block).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn question(&self, block: Block, index: usize) -> Option<&Question> {
        self.questions(block).get(index)
    }
}

/// Process-wide holder of the current [`ContentSnapshot`].
///
/// Readers get their own `Arc` and never see a half-applied reload; a reload
/// swaps the pointer and leaves in-flight readers on the old snapshot.
#[derive(Debug, Default)]
pub struct ContentStore {
    current: RwLock<Arc<ContentSnapshot>>,
}

impl ContentStore {
    pub fn new(snapshot: ContentSnapshot) -> Self {
        Self {
            current: RwLock::new(Arc::new(snapshot)),
        }
    }

    pub fn snapshot(&self) -> Arc<ContentSnapshot> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn replace(&self, snapshot: ContentSnapshot) {
        let snapshot = Arc::new(snapshot);
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = snapshot;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_bounds_and_keys() {
        assert_eq!(Block::new(0), None);
        assert_eq!(Block::new(5), None);
        let third = Block::new(3).unwrap();
        assert_eq!(third.key(), "chapter_3");
        assert_eq!(third.next(), Block::new(4));
        assert_eq!(Block::new(4).unwrap().next(), None);
        assert_eq!(Block::FIRST.previous(), None);
        assert!(serde_json::from_str::<Block>("7").is_err());
        assert_eq!(serde_json::from_str::<Block>("2").unwrap(), Block::new(2).unwrap());
    }

    #[test]
    fn out_of_range_correct_index_is_never_correct() {
        let question = Question::new("Q".into(), vec!["a".into(), "b".into()], 5, String::new());
        assert!((0..10).all(|answer| !question.is_correct(answer)));

        let question = Question::new("Q".into(), vec!["a".into(), "b".into()], 1, String::new());
        assert!(question.is_correct(1));
        assert!(!question.is_correct(0));
    }

    #[test]
    fn guide_lookup_is_case_insensitive_and_ordered() {
        let mut guide = Guide::default();
        guide.insert("  Хінкалі ", "dumplings".into());
        guide.insert("хачапурі", "bread".into());
        guide.insert("", "ignored".into());
        guide.insert("ХІНКАЛІ", "better dumplings".into());

        assert_eq!(guide.len(), 2);
        assert_eq!(guide.get("хінкалі"), Some("better dumplings"));
        assert_eq!(guide.lookup("ХІНК"), Some("better dumplings"));
        assert_eq!(guide.lookup("хачапурі по-аджарськи"), Some("bread"));
        assert_eq!(guide.lookup("борщ"), None);
        assert_eq!(guide.lookup("   "), None);
    }

    #[test]
    fn replace_does_not_disturb_existing_readers() {
        let store = ContentStore::default();
        let before = store.snapshot();

        let mut next = ContentSnapshot::default();
        next.texts.insert(Block::FIRST, vec!["Hello".into()]);
        store.replace(next);

        assert!(before.texts(Block::FIRST).is_empty());
        assert_eq!(store.snapshot().texts(Block::FIRST), ["Hello".to_string()]);
    }
}
