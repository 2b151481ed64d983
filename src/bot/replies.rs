use chrono::{DateTime, Utc};

use crate::content::{Block, ContentSnapshot};
use crate::progress::machine::{Progression, QuizError, TestOutcome, TestStart, RETRY_COOLDOWN_SECS};
use crate::progress::{Attempt, Stage, UserProgress};

pub const GREETING_TEXT: &str = "👋 Привіт! Я — Дато, вчу офіціантів бути Южанами.

Пройдеш 4 блоки — будеш готовий до зміни.

📚 Блоки:
1. Легенди
2. Сервіс
3. Кухня
4. Бар і вино

Починаємо з легенди про 18+.";

pub const HELP_TEXT: &str = "📚 Команди:
/start — почати навчання
/reload_data — оновити дані з таблиці (лише адмін)
/menu [страва]
/wine [страва]
/allergens [алерген]
/stats — твій прогрес
/reset — скинути прогрес";

pub const ALREADY_STARTED: &str = "Ти вже починав навчання! Що хочеш зробити?";
pub const CONTINUE_BUTTON: &str = "📚 Продовжити з місця зупинки";
pub const RESTART_BUTTON: &str = "🔄 Почати спочатку";
pub const START_FIRST_BLOCK_BUTTON: &str = "🚀 Почати блок 1";
pub const NEXT_TEXT_BUTTON: &str = "Далі ➡️";
pub const READY_FOR_TEST_BUTTON: &str = "📋 Готовий до тесту";
pub const VIEW_ATTEMPT_BUTTON: &str = "📋 Переглянути деталі спроби";

pub const CONTINUING: &str = "Продовжуємо!";
pub const RESET_CONFIRM: &str = "Точно хочеш скинути весь прогрес?";
pub const RESET_YES_BUTTON: &str = "✅ Так, скинути все";
pub const RESET_NO_BUTTON: &str = "❌ Скасувати";
pub const RESET_DONE: &str = "Прогрес скинуто!";
pub const RESET_RESTART: &str = "Починаємо спочатку!";
pub const RESET_CANCELLED: &str = "Скидання скасовано";
pub const CANCELLED: &str = "Скасовано";

pub const NO_ACCESS: &str = "Немає доступу.";
pub const RELOAD_OK: &str = "Дані успішно оновлено з таблиці ✅";
pub const RELOAD_ISSUES: &str = "Помилки під час завантаження даних:";

pub const CORRECT: &str = "✅ Правильно!";
pub const WRONG: &str = "❌ Неправильно.";
pub const TEST_RUNNING: &str = "Тест уже триває, продовжуємо з поточного питання.";

/// Telegram refuses callback alerts longer than this.
pub const ALERT_LIMIT: usize = 200;
pub const COUNTING_RESULTS: &str = "✅ Усі питання поставлено. Підраховуємо результат...";
pub const COMPLETED: &str = "🎉 ВІТАЮ, ТИ СТАВ ЮЖАНИНОМ!";

pub const BAD_DATA: &str = "Невірний формат даних.";
pub const STALE_TEST: &str = "Тест застарів або вже завершений. Будь ласка, почни заново.";
pub const ALREADY_ANSWERED: &str =
    "Ти вже відповів на це питання. Повторна відповідь не приймається.";
pub const UNKNOWN_QUESTION: &str = "Питання не знайдено.";
pub const STALE_TEXT: &str = "Ця кнопка вже неактуальна.";
pub const READ_THEORY_FIRST: &str = "Спершу потрібно прочитати всю теорію!";
pub const BLOCK_UNAVAILABLE: &str = "Цей блок ще недоступний. Спершу пройди попередній.";
pub const NO_HISTORY: &str = "Історії для цього блоку немає.";
pub const GENERIC_FAILURE: &str = "Щось пішло не так. Спробуй ще раз трохи пізніше.";

pub fn no_questions(block: Block) -> String {
    format!("⚠️ Для блоку {} поки немає питань. Звернись до адміністратора.", block)
}

/// `7265` → `2год 1хв 5с`.
pub fn format_duration(secs: i64) -> String {
    if secs <= 0 {
        return "0с".to_string();
    }
    let (hours, minutes, seconds) = (secs / 3600, secs % 3600 / 60, secs % 60);
    let mut parts = Vec::new();
    if hours > 0 {
        parts.push(format!("{}год", hours));
    }
    if minutes > 0 {
        parts.push(format!("{}хв", minutes));
    }
    if seconds > 0 {
        parts.push(format!("{}с", seconds));
    }
    parts.join(" ")
}

pub fn locked(remaining_secs: i64) -> String {
    format!(
        "⚠️ Цей блок заблоковано для перескладання. Залишилось: {}",
        format_duration(remaining_secs)
    )
}

pub fn test_intro(start: &TestStart) -> String {
    format!(
        "📝 ТЕСТ: Блок {}\n\nПитань: {}\nМінімум для проходження: {} правильних\n\nПочинаємо!",
        start.block, start.total, start.min_pass
    )
}

pub fn question(index: usize, total: usize, text: &str) -> String {
    format!("❓ Питання {}/{}\n\n{}", index + 1, total, text)
}

/// `0` → `A`, `1` → `B`, …
pub fn option_letter(index: usize) -> char {
    u8::try_from(index)
        .ok()
        .filter(|i| *i < 26)
        .map(|i| (b'A' + i) as char)
        .unwrap_or('?')
}

pub fn option_label(index: usize, text: &str) -> String {
    format!("{}) {}", option_letter(index), text)
}

pub fn wrong_answer(explanation: Option<&str>) -> String {
    match explanation.filter(|e| !e.is_empty()) {
        Some(explanation) => format!("{} {}", WRONG, explanation),
        None => WRONG.to_string(),
    }
}

pub fn outcome(outcome: &TestOutcome) -> String {
    let mut text = format!(
        "✅ ТЕСТ ЗАВЕРШЕНО!\n\nРезультат: {}/{}\nМінімум для проходження: {}/{}\n",
        outcome.score, outcome.total, outcome.min_pass, outcome.total
    );
    match outcome.progression {
        Progression::Retry { .. } => {
            let deficit = outcome.min_pass.saturating_sub(outcome.score);
            text.push_str(&format!(
                "\n❌ Не вистачило {} балів.\n\nПерескладання буде доступне через {}.",
                deficit,
                format_duration(RETRY_COOLDOWN_SECS)
            ));
        }
        Progression::NextBlock(_) => text.push_str("\n🎉 Молодець! Ти готовий до наступного блоку."),
        Progression::Completed | Progression::AlreadyCompleted => {
            text.push_str("\n🎉 Молодець! Усі блоки пройдено.")
        }
    }
    text
}

/// Alert shown when a button press is refused.
pub fn rejection(err: &QuizError) -> String {
    match err {
        QuizError::Locked { remaining_secs } => locked(*remaining_secs),
        QuizError::NoQuestions(block) => no_questions(*block),
        QuizError::NoActiveTest | QuizError::StaleTest => STALE_TEST.to_string(),
        QuizError::AlreadyAnswered(_) => ALREADY_ANSWERED.to_string(),
        QuizError::UnknownQuestion(_) => UNKNOWN_QUESTION.to_string(),
        QuizError::BlockUnavailable(_) => BLOCK_UNAVAILABLE.to_string(),
    }
}

pub fn next_block_button(block: Block) -> String {
    format!("🚀 Блок {}", block)
}

pub fn certificate(progress: &UserProgress, content: &ContentSnapshot, name: &str) -> String {
    let mut text = format!("📜 СЕРТИФІКАТ\n\n{} успішно пройшов навчання.\n\n", name);
    for block in Block::ALL {
        let score = progress.last_scores.get(&block.key()).copied().unwrap_or(0);
        text.push_str(&format!(
            "• Блок {}: {}/{}\n",
            block,
            score,
            content.questions(block).len()
        ));
    }
    text
}

pub fn stats(progress: &UserProgress, content: &ContentSnapshot, now: DateTime<Utc>) -> String {
    let stage = match progress.stage {
        Stage::Reading => "📖 Читання",
        Stage::Testing => "📝 Тест",
    };
    let mut text = format!(
        "📊 ТВІЙ ПРОГРЕС\n\nПоточний блок: {}\nСтатус: {}\nПройдено блоків: {}/{}\n\nРезультати тестів:\n",
        progress.current_block,
        stage,
        progress.passed_count(),
        Block::ALL.len()
    );
    for block in Block::ALL {
        if let Some(score) = progress.last_scores.get(&block.key()) {
            text.push_str(&format!(
                "• Блок {}: {}/{}\n",
                block,
                score,
                content.questions(block).len()
            ));
        }
    }

    let locks: Vec<String> = Block::ALL
        .iter()
        .filter_map(|block| {
            let remaining = progress.lock_remaining(*block, now)?;
            Some(format!(
                "• Блок {}: розблокується через {}\n",
                block,
                format_duration(remaining)
            ))
        })
        .collect();
    if !locks.is_empty() {
        text.push_str("\nБлокування:\n");
        text.push_str(&locks.concat());
    }
    text
}

pub fn attempt_details(attempt: &Attempt) -> String {
    let lines: Vec<String> = attempt
        .details
        .iter()
        .map(|answer| {
            format!(
                "Q{}: {} — обрано {}: {}",
                answer.question_index + 1,
                if answer.is_correct { "OK" } else { "NO" },
                option_letter(answer.selected_index),
                answer.selected_text
            )
        })
        .collect();
    format!(
        "Остання спроба ({}): {}/{}\n\n{}",
        attempt.timestamp.format("%Y-%m-%d %H:%M"),
        attempt.score,
        attempt.total,
        lines.join("\n")
    )
}

pub fn guide_usage(command: &str, example: &str) -> String {
    format!("🔍 Введи: /{} запит\n\nПриклад: /{} {}", command, command, example)
}

pub fn guide_not_found(what: &str, query: &str) -> String {
    format!("❌ {} «{}» не знайдено.", what, query)
}

pub const WINE_TIP: &str = "💡 Подавати за правильної температури!";
