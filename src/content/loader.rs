use std::collections::BTreeMap;
use std::fmt;

use super::sanitize::sanitize;
use super::sheets::{ContentSource, Row, SourceError, Table};
use super::{Block, ContentSnapshot, Guide, Question};

const MAX_OPTIONS: usize = 20;
const LETTER_OPTIONS: [&str; 10] = ["A", "B", "C", "D", "E", "F", "G", "H", "I", "J"];

/// A table that could not be fetched or parsed. Its part of the snapshot stays empty.
#[derive(Debug)]
pub struct TableFailure {
    pub table: Table,
    pub error: SourceError,
}

impl fmt::Display for TableFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Failed to load {} table: {}", self.table, self.error)
    }
}

#[derive(Debug)]
pub struct LoadReport {
    pub snapshot: ContentSnapshot,
    pub failures: Vec<TableFailure>,
}

/// Structural problems found by [`validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationIssue {
    NoTexts(Block),
    NoQuestions(Block),
    NoOptions { block: Block, question: usize },
    SingleOption { block: Block, question: usize },
    CorrectOutOfRange { block: Block, question: usize, correct: usize },
    EmptyMenu,
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationIssue::NoTexts(block) => write!(f, "No texts for chapter {}", block),
            ValidationIssue::NoQuestions(block) => write!(f, "No questions for chapter {}", block),
            ValidationIssue::NoOptions { block, question } => {
                write!(f, "Question {} in chapter {} has no options", question, block)
            }
            ValidationIssue::SingleOption { block, question } => {
                write!(f, "Question {} in chapter {} has only one option", question, block)
            }
            ValidationIssue::CorrectOutOfRange {
                block,
                question,
                correct,
            } => write!(
                f,
                "Question {} in chapter {} marks option {} as correct, which does not exist",
                question, block, correct
            ),
            ValidationIssue::EmptyMenu => write!(f, "Menu empty"),
        }
    }
}

/// Fetches all five tables and builds a snapshot.
///
/// Never fails as a whole: a table that errors out is logged, reported in
/// [`LoadReport::failures`] and left empty in the snapshot.
pub async fn load(source: &dyn ContentSource, source_id: &str) -> LoadReport {
    let (texts, questions, menu, wine, allergens) = tokio::join!(
        source.fetch_table(source_id, Table::Texts),
        source.fetch_table(source_id, Table::Questions),
        source.fetch_table(source_id, Table::Menu),
        source.fetch_table(source_id, Table::Wine),
        source.fetch_table(source_id, Table::Allergens),
    );

    let mut failures = Vec::new();
    let mut take = |table: Table, fetched: Result<Vec<Row>, SourceError>| match fetched {
        Ok(rows) => rows,
        Err(error) => {
            log::error!("Failed to load {} table: {}", table, error);
            failures.push(TableFailure { table, error });
            Vec::new()
        }
    };

    let snapshot = ContentSnapshot {
        texts: parse_texts(&take(Table::Texts, texts)),
        questions: parse_questions(&take(Table::Questions, questions)),
        menu: parse_guide(&take(Table::Menu, menu)),
        wine: parse_guide(&take(Table::Wine, wine)),
        allergens: parse_guide(&take(Table::Allergens, allergens)),
    };

    log::info!(
        "Loaded content: texts {:?}, questions {:?}, menu {}, wine {}, allergens {}",
        Block::ALL.map(|b| snapshot.texts(b).len()),
        Block::ALL.map(|b| snapshot.questions(b).len()),
        snapshot.menu.len(),
        snapshot.wine.len(),
        snapshot.allergens.len(),
    );

    LoadReport { snapshot, failures }
}

/// Spreadsheets happily turn `2` into `2.0`, so accept float notation.
fn parse_number(raw: Option<&str>) -> Option<i64> {
    let value: f64 = raw?.trim().parse().ok()?;
    value.is_finite().then(|| value.trunc() as i64)
}

fn parse_block(row: &Row) -> Option<Block> {
    let number = parse_number(row.get("chapter"))?;
    Block::new(u8::try_from(number).ok()?)
}

/// Groups rows by block and orders each group by its index column.
fn group_sorted<T>(entries: Vec<(Block, i64, T)>) -> BTreeMap<Block, Vec<T>> {
    let mut grouped: BTreeMap<Block, Vec<(i64, T)>> = Block::ALL
        .iter()
        .map(|block| (*block, Vec::new()))
        .collect();
    for (block, index, item) in entries {
        grouped.entry(block).or_default().push((index, item));
    }
    grouped
        .into_iter()
        .map(|(block, mut items)| {
            // stable: equal indices keep sheet order
            items.sort_by_key(|(index, _)| *index);
            (block, items.into_iter().map(|(_, item)| item).collect())
        })
        .collect()
}

pub fn parse_texts(rows: &[Row]) -> BTreeMap<Block, Vec<String>> {
    let entries = rows
        .iter()
        .filter_map(|row| {
            let block = parse_block(row)?;
            let index = parse_number(row.get("index")).unwrap_or(0);
            let text = sanitize(row.get("text").unwrap_or_default());
            Some((block, index, text))
        })
        .collect();
    group_sorted(entries)
}

/// Accepts a 0-based number or a single letter (`A` → 0, `b` → 1, …).
fn parse_correct(raw: Option<&str>) -> Option<usize> {
    let raw = raw?.trim();
    if !raw.is_empty() && raw.chars().all(|c| c.is_ascii_digit()) {
        return raw.parse().ok();
    }
    let mut chars = raw.chars();
    match (chars.next(), chars.next()) {
        (Some(letter), None) if letter.is_ascii_alphabetic() => {
            Some((letter.to_ascii_uppercase() as u8 - b'A') as usize)
        }
        _ => None,
    }
}

fn collect_options(row: &Row) -> Vec<String> {
    let populated = |columns: Vec<String>| -> Vec<String> {
        columns
            .iter()
            .filter_map(|column| row.get(column))
            .map(sanitize)
            .filter(|option| !option.is_empty())
            .collect()
    };

    let numbered = populated((1..=MAX_OPTIONS).map(|n| format!("option_{}", n)).collect());
    if !numbered.is_empty() {
        return numbered;
    }
    populated(LETTER_OPTIONS.iter().map(|l| l.to_string()).collect())
}

pub fn parse_questions(rows: &[Row]) -> BTreeMap<Block, Vec<Question>> {
    let entries = rows
        .iter()
        .filter_map(|row| {
            let block = parse_block(row)?;
            let index = parse_number(row.first(&["q_index", "qindex", "index"])).unwrap_or(0);
            let question = Question::new(
                sanitize(row.get("question").unwrap_or_default()),
                collect_options(row),
                parse_correct(row.get("correct")).unwrap_or(0),
                sanitize(row.get("explanation").unwrap_or_default()),
            );
            Some((block, index, question))
        })
        .collect();
    group_sorted(entries)
}

pub fn parse_guide(rows: &[Row]) -> Guide {
    let mut guide = Guide::default();
    for row in rows {
        if let Some(key) = row.get("key") {
            guide.insert(key, sanitize(row.get("value").unwrap_or_default()));
        }
    }
    guide
}

/// Lists every structural problem of a snapshot; `Ok` when there are none.
pub fn validate(snapshot: &ContentSnapshot) -> Result<(), Vec<ValidationIssue>> {
    let mut issues = Vec::new();

    for block in Block::ALL {
        if snapshot.texts(block).is_empty() {
            issues.push(ValidationIssue::NoTexts(block));
        }
    }

    for block in Block::ALL {
        let questions = snapshot.questions(block);
        if questions.is_empty() {
            issues.push(ValidationIssue::NoQuestions(block));
        }
        for (question, q) in questions.iter().enumerate() {
            match q.options.len() {
                0 => issues.push(ValidationIssue::NoOptions { block, question }),
                1 => issues.push(ValidationIssue::SingleOption { block, question }),
                _ => {}
            }
            if !q.options.is_empty() && q.correct >= q.options.len() {
                issues.push(ValidationIssue::CorrectOutOfRange {
                    block,
                    question,
                    correct: q.correct,
                });
            }
        }
    }

    if snapshot.menu.is_empty() {
        issues.push(ValidationIssue::EmptyMenu);
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(issues)
    }
}
