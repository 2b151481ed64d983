pub mod locks;
pub mod machine;
pub mod migrate;
pub mod store;

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::content::Block;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    #[default]
    #[serde(rename = "t")]
    Reading,
    #[serde(rename = "x")]
    Testing,
}

/// Where the current question is rendered, so the next one can edit it in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRef {
    pub chat_id: i64,
    pub message_id: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerRecord {
    pub question_index: usize,
    pub selected_index: usize,
    #[serde(default)]
    pub selected_text: String,
    pub correct_index: usize,
    #[serde(rename = "correct", deserialize_with = "flag")]
    pub is_correct: bool,
    #[serde(with = "timestamp")]
    pub timestamp: DateTime<Utc>,
}

/// One finished quiz, kept forever in the history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attempt {
    #[serde(with = "timestamp")]
    pub timestamp: DateTime<Utc>,
    pub score: usize,
    pub total: usize,
    pub passed: bool,
    #[serde(default)]
    pub details: Vec<AnswerRecord>,
}

/// A quiz in progress. The next question to show is always `answers.len()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestSession {
    pub block: Block,
    #[serde(default)]
    pub answers: Vec<AnswerRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<MessageRef>,
    /// Unix seconds.
    #[serde(default)]
    pub start_ts: i64,
}

impl TestSession {
    pub fn new(block: Block, now: DateTime<Utc>) -> Self {
        Self {
            block,
            answers: Vec::new(),
            msg: None,
            start_ts: now.timestamp(),
        }
    }

    pub fn next_question(&self) -> usize {
        self.answers.len()
    }

    /// Correct answers among the first `total` questions. Answers to
    /// questions a reload dropped do not count.
    pub fn score(&self, total: usize) -> usize {
        self.answers
            .iter()
            .filter(|a| a.is_correct && a.question_index < total)
            .count()
    }
}

/// Per-user progress record, stored under compact keys.
///
/// Fields this version does not know about are kept in `extra` and written
/// back untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserProgress {
    #[serde(rename = "b")]
    pub current_block: Block,
    #[serde(rename = "s")]
    pub stage: Stage,
    #[serde(rename = "i")]
    pub text_index: usize,
    #[serde(rename = "ts")]
    pub last_scores: BTreeMap<String, usize>,
    #[serde(rename = "p")]
    pub passed_blocks: BTreeSet<String>,
    /// Unlock time (unix seconds) per chapter key.
    #[serde(rename = "l")]
    pub locks: BTreeMap<String, i64>,
    #[serde(rename = "h")]
    pub history: BTreeMap<String, Vec<Attempt>>,
    #[serde(rename = "ct", skip_serializing_if = "Option::is_none")]
    pub active_test: Option<TestSession>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl UserProgress {
    pub fn has_started(&self) -> bool {
        self.current_block != Block::FIRST || self.text_index > 0 || self.active_test.is_some()
    }

    pub fn has_passed(&self, block: Block) -> bool {
        self.passed_blocks.contains(&block.key())
    }

    pub fn is_complete(&self) -> bool {
        Block::ALL.iter().all(|block| self.has_passed(*block))
    }

    pub fn passed_count(&self) -> usize {
        Block::ALL.iter().filter(|block| self.has_passed(**block)).count()
    }

    /// Seconds until the chapter may be retried, if it is still locked.
    pub fn lock_remaining(&self, block: Block, now: DateTime<Utc>) -> Option<i64> {
        let unlock_at = *self.locks.get(&block.key())?;
        let remaining = unlock_at - now.timestamp();
        (remaining > 0).then_some(remaining)
    }

    pub fn last_attempt(&self, block: Block) -> Option<&Attempt> {
        self.history.get(&block.key())?.last()
    }

    /// Restores the stage/test pairing: a test exists exactly while testing.
    /// Returns whether anything had to change.
    pub fn repair(&mut self) -> bool {
        match (self.stage, &self.active_test) {
            (Stage::Reading, Some(_)) => {
                self.active_test = None;
                true
            }
            (Stage::Testing, None) => {
                self.stage = Stage::Reading;
                true
            }
            _ => false,
        }
    }
}

/// Older records stored `correct` as 0/1.
fn flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(i64),
    }
    Ok(match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => b,
        Flag::Int(n) => n != 0,
    })
}

/// RFC 3339 timestamps; naive ISO strings from older records are read as UTC.
pub(crate) mod timestamp {
    use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &DateTime<Utc>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::AutoSi, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        if let Ok(parsed) = DateTime::parse_from_rfc3339(&raw) {
            return Ok(parsed.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
            .map(|naive| naive.and_utc())
            .map_err(|e| D::Error::custom(format!("bad timestamp {:?}: {}", raw, e)))
    }
}
