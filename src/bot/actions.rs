use std::fmt;
use std::str::FromStr;

use crate::content::Block;

/// Payload of an inline button.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    ContinueTraining,
    ResetTraining,
    CancelReset,
    NextText(Block),
    StartTest(Block),
    StartChapter(Block),
    Answer {
        block: Block,
        question: usize,
        option: usize,
    },
    ViewHistory(Block),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unrecognised callback data {0:?}")]
pub struct BadAction(String);

fn parse_block(raw: &str) -> Option<Block> {
    Block::new(raw.parse().ok()?)
}

// `{block}_{question}_{option}`
fn parse_answer(raw: &str) -> Option<Action> {
    let mut parts = raw.split('_');
    let action = Action::Answer {
        block: parse_block(parts.next()?)?,
        question: parts.next()?.parse().ok()?,
        option: parts.next()?.parse().ok()?,
    };
    parts.next().is_none().then_some(action)
}

impl FromStr for Action {
    type Err = BadAction;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let parsed = match data {
            "continue_training" => Some(Action::ContinueTraining),
            "reset_training" => Some(Action::ResetTraining),
            "cancel_reset" => Some(Action::CancelReset),
            _ => {
                if let Some(rest) = data.strip_prefix("next_text_") {
                    parse_block(rest).map(Action::NextText)
                } else if let Some(rest) = data.strip_prefix("start_test_") {
                    parse_block(rest).map(Action::StartTest)
                } else if let Some(rest) = data.strip_prefix("start_chapter_") {
                    parse_block(rest).map(Action::StartChapter)
                } else if let Some(rest) = data.strip_prefix("view_history_") {
                    parse_block(rest).map(Action::ViewHistory)
                } else if let Some(rest) = data.strip_prefix("answer_") {
                    parse_answer(rest)
                } else {
                    None
                }
            }
        };
        parsed.ok_or_else(|| BadAction(data.to_string()))
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::ContinueTraining => write!(f, "continue_training"),
            Action::ResetTraining => write!(f, "reset_training"),
            Action::CancelReset => write!(f, "cancel_reset"),
            Action::NextText(block) => write!(f, "next_text_{}", block),
            Action::StartTest(block) => write!(f, "start_test_{}", block),
            Action::StartChapter(block) => write!(f, "start_chapter_{}", block),
            Action::Answer {
                block,
                question,
                option,
            } => write!(f, "answer_{}_{}_{}", block, question, option),
            Action::ViewHistory(block) => write!(f, "view_history_{}", block),
        }
    }
}
