//! Pure transitions over a single [`UserProgress`].
//!
//! Nothing here does I/O; the caller loads the record, applies one operation
//! and saves it back while holding the user's lock.

use chrono::{DateTime, Utc};

use super::{AnswerRecord, Attempt, Stage, TestSession, UserProgress};
use crate::content::sanitize::sanitize;
use crate::content::{display_len, Block, ContentSnapshot, MAX_TEXT_LEN};

/// How long a failed chapter stays closed for retries.
pub const RETRY_COOLDOWN_SECS: i64 = 2 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QuizError {
    #[error("chapter is locked for another {remaining_secs}s")]
    Locked { remaining_secs: i64 },
    #[error("block {0} has no questions")]
    NoQuestions(Block),
    #[error("no test in progress")]
    NoActiveTest,
    #[error("answer belongs to a test that is no longer running")]
    StaleTest,
    #[error("question {0} was already answered")]
    AlreadyAnswered(usize),
    #[error("question {0} does not exist")]
    UnknownQuestion(usize),
    #[error("block {0} is not available yet")]
    BlockUnavailable(Block),
}

/// What the user should see after moving through the reading material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextStep {
    Show {
        index: usize,
        text: String,
        is_last: bool,
    },
    /// The block has no more readable texts.
    StartTest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TestStart {
    pub block: Block,
    pub total: usize,
    pub min_pass: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerFeedback {
    pub correct: bool,
    /// Only present for wrong answers.
    pub explanation: Option<String>,
    pub next_question: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progression {
    NextBlock(Block),
    /// This pass completed the course.
    Completed,
    /// Passed again after the course had already been completed.
    AlreadyCompleted,
    Retry { unlock_at: i64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TestOutcome {
    pub block: Block,
    pub score: usize,
    pub total: usize,
    pub min_pass: usize,
    pub passed: bool,
    pub progression: Progression,
}

/// Correct answers needed to pass: 80% of `total`, rounded up.
pub fn min_pass(total: usize) -> usize {
    (total * 4).div_ceil(5)
}

fn displayable(text: &str) -> Option<String> {
    let cleaned = sanitize(text);
    if cleaned.is_empty() {
        return None;
    }
    if display_len(&cleaned) > MAX_TEXT_LEN {
        log::warn!("Text too long ({} units), skipping", display_len(&cleaned));
        return None;
    }
    Some(cleaned)
}

/// Shows the text at the current position, skipping anything unreadable.
///
/// The index is moved onto the text that is returned.
pub fn show_text(progress: &mut UserProgress, content: &ContentSnapshot) -> TextStep {
    let block = progress.current_block;
    let texts = content.texts(block);

    for (index, raw) in texts.iter().enumerate().skip(progress.text_index) {
        match displayable(raw) {
            Some(text) => {
                progress.text_index = index;
                return TextStep::Show {
                    index,
                    text,
                    is_last: index + 1 >= texts.len(),
                };
            }
            None => log::info!("Skipping unreadable text at block {} index {}", block, index),
        }
    }
    TextStep::StartTest
}

/// Moves past the current text and shows the next readable one.
pub fn advance_text(progress: &mut UserProgress, content: &ContentSnapshot) -> TextStep {
    let texts = content.texts(progress.current_block);
    if progress.text_index + 1 >= texts.len() {
        return TextStep::StartTest;
    }
    progress.text_index += 1;
    show_text(progress, content)
}

/// Opens the reading material of `block` from its first text.
pub fn start_chapter(progress: &mut UserProgress, block: Block) -> Result<(), QuizError> {
    let reachable = block == Block::FIRST
        || block <= progress.current_block
        || block.previous().is_some_and(|prev| progress.has_passed(prev));
    if !reachable {
        return Err(QuizError::BlockUnavailable(block));
    }

    progress.current_block = block;
    progress.text_index = 0;
    progress.stage = Stage::Reading;
    progress.active_test = None;
    Ok(())
}

pub fn start_test(
    progress: &mut UserProgress,
    content: &ContentSnapshot,
    block: Block,
    now: DateTime<Utc>,
) -> Result<TestStart, QuizError> {
    if let Some(remaining_secs) = progress.lock_remaining(block, now) {
        return Err(QuizError::Locked { remaining_secs });
    }
    let total = content.questions(block).len();
    if total == 0 {
        return Err(QuizError::NoQuestions(block));
    }

    progress.stage = Stage::Testing;
    progress.text_index = 0;
    progress.active_test = Some(TestSession::new(block, now));
    Ok(TestStart {
        block,
        total,
        min_pass: min_pass(total),
    })
}

pub fn submit_answer(
    progress: &mut UserProgress,
    content: &ContentSnapshot,
    block: Block,
    question_index: usize,
    answer_index: usize,
    now: DateTime<Utc>,
) -> Result<AnswerFeedback, QuizError> {
    let test = progress.active_test.as_mut().ok_or(QuizError::StaleTest)?;
    if test.block != block {
        return Err(QuizError::StaleTest);
    }
    let question = content
        .question(block, question_index)
        .ok_or(QuizError::UnknownQuestion(question_index))?;
    if test.answers.iter().any(|a| a.question_index == question_index) {
        return Err(QuizError::AlreadyAnswered(question_index));
    }

    let correct = question.is_correct(answer_index);
    test.answers.push(AnswerRecord {
        question_index,
        selected_index: answer_index,
        selected_text: question.option(answer_index).unwrap_or_default().to_string(),
        correct_index: question.correct,
        is_correct: correct,
        timestamp: now,
    });

    Ok(AnswerFeedback {
        correct,
        explanation: (!correct).then(|| question.explanation.clone()),
        next_question: test.next_question(),
    })
}

/// Index of the question to render next, if a test is running.
pub fn next_question_index(progress: &UserProgress) -> Option<usize> {
    progress.active_test.as_ref().map(TestSession::next_question)
}

/// Scores the running test and records the attempt.
pub fn finish_test(
    progress: &mut UserProgress,
    content: &ContentSnapshot,
    now: DateTime<Utc>,
) -> Result<TestOutcome, QuizError> {
    let block = progress
        .active_test
        .as_ref()
        .ok_or(QuizError::NoActiveTest)?
        .block;
    let total = content.questions(block).len();
    if total == 0 {
        return Err(QuizError::NoQuestions(block));
    }

    let test = progress.active_test.take().ok_or(QuizError::NoActiveTest)?;
    let key = block.key();
    let score = test.score(total);
    let min_pass = min_pass(total);
    let passed = score >= min_pass;

    progress.history.entry(key.clone()).or_default().push(Attempt {
        timestamp: now,
        score,
        total,
        passed,
        details: test.answers,
    });
    progress.last_scores.insert(key.clone(), score);
    progress.stage = Stage::Reading;
    progress.text_index = 0;

    let progression = if passed {
        let was_complete = progress.is_complete();
        progress.passed_blocks.insert(key.clone());
        progress.locks.remove(&key);

        if progress.is_complete() {
            if was_complete {
                Progression::AlreadyCompleted
            } else {
                Progression::Completed
            }
        } else {
            let next = next_unpassed(progress, block);
            progress.current_block = next;
            Progression::NextBlock(next)
        }
    } else {
        let unlock_at = now.timestamp() + RETRY_COOLDOWN_SECS;
        progress.locks.insert(key, unlock_at);
        progress.current_block = block;
        Progression::Retry { unlock_at }
    };

    Ok(TestOutcome {
        block,
        score,
        total,
        min_pass,
        passed,
        progression,
    })
}

// Only called while some block is still unpassed.
fn next_unpassed(progress: &UserProgress, after: Block) -> Block {
    Block::ALL
        .iter()
        .copied()
        .filter(|b| *b > after)
        .chain(Block::ALL.iter().copied())
        .find(|b| !progress.has_passed(*b))
        .unwrap_or(after)
}

/// Wipes progress. Fields unknown to this version are not progress and survive.
pub fn reset(progress: &mut UserProgress) {
    let extra = std::mem::take(&mut progress.extra);
    *progress = UserProgress {
        extra,
        ..UserProgress::default()
    };
}
