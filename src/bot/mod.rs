//! Turns commands and button presses into state-machine transitions and
//! chat messages.
//!
//! Every handler for a user runs under that user's lock: load the record,
//! apply the transition, render, save.

pub mod actions;
pub mod gateway;
pub mod replies;

use std::sync::Arc;

use chrono::Utc;
use teloxide::types::{ChatId, UserId};
use teloxide::utils::command::BotCommands;

use crate::config::Config;
use crate::content::loader::{self, validate};
use crate::content::sheets::ContentSource;
use crate::content::{display_len, ContentSnapshot, ContentStore};
use crate::progress::locks::UserLocks;
use crate::progress::machine::{self, Progression, QuizError, TextStep};
use crate::progress::store::ProgressStore;
use crate::progress::{MessageRef, Stage, UserProgress};
use actions::Action;
use gateway::{Button, Gateway};

pub type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

#[derive(BotCommands, Clone, Debug, PartialEq, Eq)]
#[command(rename_rule = "lowercase", description = "Команди:")]
pub enum Command {
    #[command(description = "почати навчання")]
    Start,
    #[command(description = "список команд")]
    Help,
    #[command(description = "твій прогрес")]
    Stats,
    #[command(description = "скинути прогрес")]
    Reset,
    #[command(rename = "reload_data", description = "оновити дані з таблиці")]
    ReloadData,
    #[command(description = "пошук у меню")]
    Menu(String),
    #[command(description = "яке вино подати")]
    Wine(String),
    #[command(description = "пошук алергенів")]
    Allergens(String),
}

/// Who pressed or typed something.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trainee {
    pub id: UserId,
    pub name: String,
}

/// A button press, stripped down to what the trainer uses.
#[derive(Debug, Clone)]
pub struct Callback {
    pub id: String,
    pub chat: ChatId,
    pub from: Trainee,
    pub data: String,
    pub message: Option<MessageRef>,
}

#[derive(Debug, Clone, Copy)]
enum GuideKind {
    Menu,
    Wine,
    Allergens,
}

impl GuideKind {
    fn command(self) -> &'static str {
        match self {
            GuideKind::Menu => "menu",
            GuideKind::Wine => "wine",
            GuideKind::Allergens => "allergens",
        }
    }

    fn example(self) -> &'static str {
        match self {
            GuideKind::Menu | GuideKind::Wine => "хінкалі",
            GuideKind::Allergens => "глютен",
        }
    }

    fn subject(self) -> &'static str {
        match self {
            GuideKind::Menu => "Страву",
            GuideKind::Wine => "Вино до",
            GuideKind::Allergens => "Алерген",
        }
    }
}

pub struct Trainer<G> {
    gateway: G,
    store: ProgressStore,
    content: ContentStore,
    source: Arc<dyn ContentSource>,
    config: Config,
    user_locks: UserLocks,
}

impl<G: Gateway> Trainer<G> {
    pub fn new(
        gateway: G,
        store: ProgressStore,
        content: ContentStore,
        source: Arc<dyn ContentSource>,
        config: Config,
    ) -> Self {
        Self {
            gateway,
            store,
            content,
            source,
            config,
            user_locks: UserLocks::default(),
        }
    }

    /// Fetches every table and swaps the new snapshot in, even when some
    /// tables failed or the result has gaps. Returns what went wrong.
    pub async fn reload_content(&self) -> Vec<String> {
        let report = loader::load(self.source.as_ref(), &self.config.sheet_id).await;
        let mut problems: Vec<String> = report.failures.iter().map(ToString::to_string).collect();
        if let Err(issues) = validate(&report.snapshot) {
            problems.extend(issues.iter().map(ToString::to_string));
        }
        for problem in &problems {
            log::warn!("Content: {}", problem);
        }
        self.content.replace(report.snapshot);
        problems
    }

    pub async fn on_command(&self, chat: ChatId, from: &Trainee, command: Command) {
        if let Err(err) = self.run_command(chat, from, command).await {
            log::error!("Command from user {} failed: {}", from.id.0, err);
            if let Err(err) = self.gateway.send_text(chat, replies::GENERIC_FAILURE, &[]).await {
                log::error!("Could not report failure to chat {}: {}", chat.0, err);
            }
        }
    }

    pub async fn on_callback(&self, callback: Callback) {
        if let Err(err) = self.run_callback(&callback).await {
            log::error!(
                "Callback {:?} from user {} failed: {}",
                callback.data,
                callback.from.id.0,
                err
            );
            if let Err(err) = self
                .gateway
                .send_text(callback.chat, replies::GENERIC_FAILURE, &[])
                .await
            {
                log::error!("Could not report failure to chat {}: {}", callback.chat.0, err);
            }
        }
    }

    async fn run_command(&self, chat: ChatId, from: &Trainee, command: Command) -> HandlerResult {
        match command {
            Command::Start => self.start(chat, from).await,
            Command::Help => self.send(chat, replies::HELP_TEXT, &[]).await,
            Command::Stats => {
                let _guard = self.user_locks.acquire(from.id).await;
                let progress = self.store.load(from.id).await?;
                let content = self.content.snapshot();
                let text = replies::stats(&progress, &content, Utc::now());
                self.send(chat, &text, &[]).await
            }
            Command::Reset => {
                let buttons = [
                    Button::new(replies::RESET_YES_BUTTON, Action::ResetTraining),
                    Button::new(replies::RESET_NO_BUTTON, Action::CancelReset),
                ];
                self.send(chat, replies::RESET_CONFIRM, &buttons).await
            }
            Command::ReloadData => self.reload(chat, from).await,
            Command::Menu(query) => self.guide(chat, GuideKind::Menu, &query).await,
            Command::Wine(query) => self.guide(chat, GuideKind::Wine, &query).await,
            Command::Allergens(query) => self.guide(chat, GuideKind::Allergens, &query).await,
        }
    }

    async fn start(&self, chat: ChatId, from: &Trainee) -> HandlerResult {
        let _guard = self.user_locks.acquire(from.id).await;
        let progress = self.store.load(from.id).await?;
        log::info!("User {} ({}) sent /start", from.id.0, from.name);

        if progress.has_started() {
            let buttons = [
                Button::new(replies::CONTINUE_BUTTON, Action::ContinueTraining),
                Button::new(replies::RESTART_BUTTON, Action::ResetTraining),
            ];
            self.send(chat, replies::ALREADY_STARTED, &buttons).await
        } else {
            let buttons = [Button::new(
                replies::START_FIRST_BLOCK_BUTTON,
                Action::StartChapter(crate::content::Block::FIRST),
            )];
            self.send(chat, replies::GREETING_TEXT, &buttons).await
        }
    }

    async fn reload(&self, chat: ChatId, from: &Trainee) -> HandlerResult {
        if !self.config.is_admin(from.id) {
            log::warn!("User {} tried to reload content", from.id.0);
            return self.send(chat, replies::NO_ACCESS, &[]).await;
        }

        let problems = self.reload_content().await;
        if problems.is_empty() {
            self.send(chat, replies::RELOAD_OK, &[]).await
        } else {
            let text = format!("{}\n{}", replies::RELOAD_ISSUES, problems.join("\n"));
            self.send(chat, &text, &[]).await
        }
    }

    async fn guide(&self, chat: ChatId, kind: GuideKind, query: &str) -> HandlerResult {
        let query = query.trim();
        if query.is_empty() {
            let text = replies::guide_usage(kind.command(), kind.example());
            return self.send(chat, &text, &[]).await;
        }

        let content = self.content.snapshot();
        let guide = match kind {
            GuideKind::Menu => &content.menu,
            GuideKind::Wine => &content.wine,
            GuideKind::Allergens => &content.allergens,
        };
        let text = match guide.lookup(query) {
            Some(found) => match kind {
                GuideKind::Wine => format!("🍷 {}\n\n{}", found, replies::WINE_TIP),
                _ => found.to_string(),
            },
            None => replies::guide_not_found(kind.subject(), query),
        };
        self.send(chat, &text, &[]).await
    }

    async fn run_callback(&self, callback: &Callback) -> HandlerResult {
        let action = match callback.data.parse::<Action>() {
            Ok(action) => action,
            Err(err) => {
                log::warn!("User {}: {}", callback.from.id.0, err);
                self.notify(callback, Some(replies::BAD_DATA), true).await;
                return Ok(());
            }
        };

        let user = callback.from.id;
        let _guard = self.user_locks.acquire(user).await;
        let mut progress = self.store.load(user).await?;
        let content = self.content.snapshot();

        let result = self.apply(callback, action, &mut progress, &content).await;
        self.store.save(user, &progress).await?;
        result
    }

    async fn apply(
        &self,
        callback: &Callback,
        action: Action,
        progress: &mut UserProgress,
        content: &ContentSnapshot,
    ) -> HandlerResult {
        let chat = callback.chat;
        match action {
            Action::ContinueTraining => {
                self.notify(callback, Some(replies::CONTINUING), false).await;
                match progress.stage {
                    Stage::Testing if progress.active_test.is_some() => {
                        self.render_question(chat, &callback.from, progress, content).await
                    }
                    _ => self.render_text(chat, &callback.from, progress, content).await,
                }
            }
            Action::ResetTraining => {
                machine::reset(progress);
                log::info!("User {} reset their progress", callback.from.id.0);
                self.notify(callback, Some(replies::RESET_DONE), true).await;
                self.send(chat, replies::RESET_RESTART, &[]).await?;
                self.render_text(chat, &callback.from, progress, content).await
            }
            Action::CancelReset => {
                self.notify(callback, Some(replies::CANCELLED), false).await;
                if let Some(message) = callback.message {
                    let edited = self
                        .gateway
                        .edit_text(message, replies::RESET_CANCELLED, &[])
                        .await;
                    if let Err(err) = edited {
                        log::debug!("Could not edit reset prompt: {}", err);
                    }
                }
                Ok(())
            }
            Action::NextText(block) => {
                if block != progress.current_block || progress.stage != Stage::Reading {
                    self.notify(callback, Some(replies::STALE_TEXT), true).await;
                    return Ok(());
                }
                self.notify(callback, None, false).await;
                let step = machine::advance_text(progress, content);
                self.render_step(chat, &callback.from, progress, content, step).await
            }
            Action::StartTest(block) => {
                if block != progress.current_block {
                    self.notify(callback, Some(replies::READ_THEORY_FIRST), true).await;
                    return Ok(());
                }
                if progress.active_test.is_some() {
                    // A running test is resumed, never restarted.
                    self.notify(callback, Some(replies::TEST_RUNNING), false).await;
                    return self.render_question(chat, &callback.from, progress, content).await;
                }
                self.notify(callback, None, false).await;
                self.begin_test(chat, &callback.from, progress, content).await
            }
            Action::StartChapter(block) => match machine::start_chapter(progress, block) {
                Ok(()) => {
                    self.notify(callback, None, false).await;
                    self.render_text(chat, &callback.from, progress, content).await
                }
                Err(err) => {
                    self.notify(callback, Some(&replies::rejection(&err)), true).await;
                    Ok(())
                }
            },
            Action::Answer {
                block,
                question,
                option,
            } => {
                let submitted =
                    machine::submit_answer(progress, content, block, question, option, Utc::now());
                match submitted {
                    Ok(feedback) if feedback.correct => {
                        self.notify(callback, Some(replies::CORRECT), false).await;
                    }
                    Ok(feedback) => {
                        let text = replies::wrong_answer(feedback.explanation.as_deref());
                        if display_len(&text) <= replies::ALERT_LIMIT {
                            self.notify(callback, Some(&text), true).await;
                        } else {
                            self.notify(callback, Some(replies::WRONG), true).await;
                            self.send(chat, &text, &[]).await?;
                        }
                    }
                    Err(err) => {
                        log::debug!("User {} answer refused: {}", callback.from.id.0, err);
                        self.notify(callback, Some(&replies::rejection(&err)), true).await;
                        return Ok(());
                    }
                }
                self.render_question(chat, &callback.from, progress, content).await
            }
            Action::ViewHistory(block) => match progress.last_attempt(block) {
                Some(attempt) => {
                    self.notify(callback, None, false).await;
                    self.send(chat, &replies::attempt_details(attempt), &[]).await
                }
                None => {
                    self.notify(callback, Some(replies::NO_HISTORY), true).await;
                    Ok(())
                }
            },
        }
    }

    async fn render_text(
        &self,
        chat: ChatId,
        from: &Trainee,
        progress: &mut UserProgress,
        content: &ContentSnapshot,
    ) -> HandlerResult {
        let step = machine::show_text(progress, content);
        self.render_step(chat, from, progress, content, step).await
    }

    /// Sends the text the machine picked. Texts the transport refuses are
    /// skipped; running out of texts starts the test.
    async fn render_step(
        &self,
        chat: ChatId,
        from: &Trainee,
        progress: &mut UserProgress,
        content: &ContentSnapshot,
        mut step: TextStep,
    ) -> HandlerResult {
        loop {
            let (index, text, is_last) = match step {
                TextStep::StartTest => return self.begin_test(chat, from, progress, content).await,
                TextStep::Show { index, text, is_last } => (index, text, is_last),
            };

            let block = progress.current_block;
            let button = if is_last {
                Button::new(replies::READY_FOR_TEST_BUTTON, Action::StartTest(block))
            } else {
                Button::new(replies::NEXT_TEXT_BUTTON, Action::NextText(block))
            };

            match self.gateway.send_text(chat, &text, &[button]).await {
                Ok(_) => return Ok(()),
                Err(err) => {
                    log::warn!(
                        "Text {} of block {} was not delivered, skipping: {}",
                        index,
                        block,
                        err
                    );
                    step = machine::advance_text(progress, content);
                }
            }
        }
    }

    async fn begin_test(
        &self,
        chat: ChatId,
        from: &Trainee,
        progress: &mut UserProgress,
        content: &ContentSnapshot,
    ) -> HandlerResult {
        let block = progress.current_block;
        match machine::start_test(progress, content, block, Utc::now()) {
            Ok(start) => {
                log::info!("User {} started the test of block {}", from.id.0, block);
                self.send(chat, &replies::test_intro(&start), &[]).await?;
                self.render_question(chat, from, progress, content).await
            }
            Err(err @ (QuizError::Locked { .. } | QuizError::NoQuestions(_))) => {
                self.send(chat, &replies::rejection(&err), &[]).await
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Shows the next unanswered question in place of the previous one, or
    /// scores the test once nothing is left.
    async fn render_question(
        &self,
        chat: ChatId,
        from: &Trainee,
        progress: &mut UserProgress,
        content: &ContentSnapshot,
    ) -> HandlerResult {
        let Some(test) = progress.active_test.as_ref() else {
            return self.send(chat, replies::STALE_TEST, &[]).await;
        };
        let block = test.block;
        let index = test.next_question();
        let previous = test.msg;
        let questions = content.questions(block);

        if questions.is_empty() {
            log::warn!("Block {} lost its questions during a running test", block);
            return self.send(chat, &replies::no_questions(block), &[]).await;
        }
        let Some(question) = questions.get(index) else {
            if let Some(message) = previous {
                let edited = self
                    .gateway
                    .edit_text(message, replies::COUNTING_RESULTS, &[])
                    .await;
                if let Err(err) = edited {
                    log::debug!("Could not edit the last question: {}", err);
                }
            }
            return self.finish(chat, from, progress, content).await;
        };

        let text = replies::question(index, questions.len(), &question.text);
        let buttons: Vec<Button> = question
            .options
            .iter()
            .enumerate()
            .map(|(option, label)| {
                Button::new(
                    replies::option_label(option, label),
                    Action::Answer {
                        block,
                        question: index,
                        option,
                    },
                )
            })
            .collect();

        if let Some(message) = previous {
            match self.gateway.edit_text(message, &text, &buttons).await {
                Ok(()) => return Ok(()),
                Err(err) => log::debug!("Editing question failed, sending a new one: {}", err),
            }
        }
        let sent = self.gateway.send_text(chat, &text, &buttons).await?;
        if let Some(test) = progress.active_test.as_mut() {
            test.msg = Some(sent);
        }
        Ok(())
    }

    async fn finish(
        &self,
        chat: ChatId,
        from: &Trainee,
        progress: &mut UserProgress,
        content: &ContentSnapshot,
    ) -> HandlerResult {
        let outcome = machine::finish_test(progress, content, Utc::now())?;
        log::info!(
            "User {} finished block {} with {}/{} (passed: {})",
            from.id.0,
            outcome.block,
            outcome.score,
            outcome.total,
            outcome.passed
        );

        let text = replies::outcome(&outcome);
        match outcome.progression {
            Progression::NextBlock(next) => {
                let button =
                    Button::new(replies::next_block_button(next), Action::StartChapter(next));
                self.send(chat, &text, &[button]).await
            }
            Progression::Completed => {
                self.send(chat, &text, &[]).await?;
                let certificate = replies::certificate(progress, content, &from.name);
                self.send(chat, &certificate, &[]).await?;
                self.send(chat, replies::COMPLETED, &[]).await
            }
            Progression::AlreadyCompleted => self.send(chat, &text, &[]).await,
            Progression::Retry { .. } => {
                let button = Button::new(
                    replies::VIEW_ATTEMPT_BUTTON,
                    Action::ViewHistory(outcome.block),
                );
                self.send(chat, &text, &[button]).await
            }
        }
    }

    async fn send(&self, chat: ChatId, text: &str, buttons: &[Button]) -> HandlerResult {
        self.gateway.send_text(chat, text, buttons).await?;
        Ok(())
    }

    /// Answers the button press. Telegram expires old callbacks, so a failure
    /// here is logged and the flow goes on.
    async fn notify(&self, callback: &Callback, text: Option<&str>, alert: bool) {
        if let Err(err) = self.gateway.answer_callback(&callback.id, text, alert).await {
            log::debug!("Could not answer callback {}: {}", callback.id, err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::loader::tests::{full_tables, StaticSource};
    use crate::content::sheets::{Row, Table};
    use crate::content::Block;
    use crate::progress::machine::RETRY_COOLDOWN_SECS;
    use async_trait::async_trait;
    use gateway::GatewayError;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::Mutex;

    const CHAT: ChatId = ChatId(100);

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        Sent { text: String, buttons: Vec<Button> },
        Edited { message_id: i32, text: String },
        Answered { text: Option<String>, alert: bool },
    }

    /// Records everything; refuses to send texts containing `refuse`.
    #[derive(Default)]
    struct RecordingGateway {
        events: Mutex<Vec<Event>>,
        next_id: AtomicI32,
        refuse: Option<&'static str>,
    }

    #[async_trait]
    impl Gateway for RecordingGateway {
        async fn send_text(
            &self,
            chat: ChatId,
            text: &str,
            buttons: &[Button],
        ) -> Result<MessageRef, GatewayError> {
            if self.refuse.is_some_and(|marker| text.contains(marker)) {
                return Err(GatewayError::Rejected("message is too long".into()));
            }
            self.events.lock().unwrap().push(Event::Sent {
                text: text.to_string(),
                buttons: buttons.to_vec(),
            });
            Ok(MessageRef {
                chat_id: chat.0,
                message_id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
            })
        }

        async fn edit_text(
            &self,
            message: MessageRef,
            text: &str,
            _buttons: &[Button],
        ) -> Result<(), GatewayError> {
            self.events.lock().unwrap().push(Event::Edited {
                message_id: message.message_id,
                text: text.to_string(),
            });
            Ok(())
        }

        async fn answer_callback(
            &self,
            _callback_id: &str,
            text: Option<&str>,
            alert: bool,
        ) -> Result<(), GatewayError> {
            self.events.lock().unwrap().push(Event::Answered {
                text: text.map(str::to_string),
                alert,
            });
            Ok(())
        }
    }

    impl RecordingGateway {
        fn take(&self) -> Vec<Event> {
            std::mem::take(&mut *self.events.lock().unwrap())
        }
    }

    fn config() -> Config {
        Config {
            sheet_id: "sheet".into(),
            admin_ids: vec![UserId(1)],
            database_path: ":memory:".into(),
            sheets_base_url: String::new(),
        }
    }

    async fn trainer_with(
        gateway: RecordingGateway,
        tables: HashMap<Table, Vec<Row>>,
    ) -> Trainer<RecordingGateway> {
        let trainer = Trainer::new(
            gateway,
            ProgressStore::in_memory(),
            ContentStore::default(),
            Arc::new(StaticSource { tables }),
            config(),
        );
        trainer.reload_content().await;
        trainer
    }

    async fn trainer() -> Trainer<RecordingGateway> {
        trainer_with(RecordingGateway::default(), full_tables()).await
    }

    fn trainee(id: u64) -> Trainee {
        Trainee {
            id: UserId(id),
            name: "Нана".into(),
        }
    }

    fn press(from: u64, data: impl ToString) -> Callback {
        Callback {
            id: "cb".into(),
            chat: CHAT,
            from: trainee(from),
            data: data.to_string(),
            message: None,
        }
    }

    fn block(n: u8) -> Block {
        Block::new(n).unwrap()
    }

    fn sent_texts(events: &[Event]) -> Vec<&str> {
        events
            .iter()
            .filter_map(|e| match e {
                Event::Sent { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    fn answers(events: &[Event]) -> Vec<(Option<&str>, bool)> {
        events
            .iter()
            .filter_map(|e| match e {
                Event::Answered { text, alert } => Some((text.as_deref(), *alert)),
                _ => None,
            })
            .collect()
    }

    /// Reads through the block and answers every question with `option`.
    async fn run_block(trainer: &Trainer<RecordingGateway>, user: u64, n: u8, option: usize) {
        trainer.on_callback(press(user, Action::StartChapter(block(n)))).await;
        trainer.on_callback(press(user, Action::NextText(block(n)))).await;
        trainer.on_callback(press(user, Action::StartTest(block(n)))).await;
        for question in 0..5 {
            let action = Action::Answer {
                block: block(n),
                question,
                option,
            };
            trainer.on_callback(press(user, action)).await;
        }
    }

    #[tokio::test]
    async fn start_greets_newcomers_and_offers_continue_later() {
        let trainer = trainer().await;
        trainer.on_command(CHAT, &trainee(7), Command::Start).await;

        let events = trainer.gateway.take();
        assert_eq!(
            events,
            [Event::Sent {
                text: replies::GREETING_TEXT.into(),
                buttons: vec![Button::new(replies::START_FIRST_BLOCK_BUTTON, "start_chapter_1")],
            }]
        );

        trainer.on_callback(press(7, "start_chapter_1")).await;
        trainer.on_callback(press(7, "next_text_1")).await;
        trainer.gateway.take();
        trainer.on_command(CHAT, &trainee(7), Command::Start).await;
        assert_eq!(sent_texts(&trainer.gateway.take()), [replies::ALREADY_STARTED]);
    }

    #[tokio::test]
    async fn reading_leads_into_the_test() {
        let trainer = trainer().await;
        trainer.on_callback(press(7, "start_chapter_1")).await;
        let events = trainer.gateway.take();
        assert_eq!(answers(&events), [(None, false)]);
        assert_eq!(
            events.last(),
            Some(&Event::Sent {
                text: "Intro 1".into(),
                buttons: vec![Button::new(replies::NEXT_TEXT_BUTTON, "next_text_1")],
            })
        );

        trainer.on_callback(press(7, "next_text_1")).await;
        let events = trainer.gateway.take();
        assert!(matches!(
            events.last(),
            Some(Event::Sent { text, buttons })
                if text == "Body 1" && buttons[0].data == "start_test_1"
        ));

        trainer.on_callback(press(7, "start_test_1")).await;
        let events = trainer.gateway.take();
        let texts = sent_texts(&events);
        assert!(texts[0].contains("Питань: 5"));
        assert!(texts[0].contains("Мінімум для проходження: 4"));
        assert_eq!(texts[1], "❓ Питання 1/5\n\nQ1.0");

        let progress = trainer.store.load(UserId(7)).await.unwrap();
        assert_eq!(progress.stage, Stage::Testing);
        assert_eq!(progress.active_test.unwrap().msg.map(|m| m.message_id), Some(4));
    }

    #[tokio::test]
    async fn passing_a_block_opens_the_next_one() {
        let trainer = trainer().await;
        run_block(&trainer, 7, 1, 0).await;
        let events = trainer.gateway.take();

        assert!(events.contains(&Event::Edited {
            message_id: 4,
            text: replies::COUNTING_RESULTS.into(),
        }));
        assert!(matches!(
            events.last(),
            Some(Event::Sent { text, buttons })
                if text.contains("Результат: 5/5") && buttons[0].data == "start_chapter_2"
        ));

        let progress = trainer.store.load(UserId(7)).await.unwrap();
        assert!(progress.has_passed(block(1)));
        assert_eq!(progress.current_block, block(2));
        assert_eq!(progress.stage, Stage::Reading);
        assert!(progress.active_test.is_none());
    }

    #[tokio::test]
    async fn second_answer_to_a_question_is_refused() {
        let trainer = trainer().await;
        trainer.on_callback(press(7, "start_chapter_1")).await;
        trainer.on_callback(press(7, "start_test_1")).await;
        trainer.gateway.take();

        trainer.on_callback(press(7, "answer_1_0_1")).await;
        trainer.on_callback(press(7, "answer_1_0_0")).await;
        let events = trainer.gateway.take();
        assert_eq!(
            answers(&events),
            [(Some(replies::WRONG), true), (Some(replies::ALREADY_ANSWERED), true)]
        );

        let progress = trainer.store.load(UserId(7)).await.unwrap();
        let test = progress.active_test.unwrap();
        assert_eq!(test.answers.len(), 1);
        assert!(!test.answers[0].is_correct);
    }

    #[tokio::test]
    async fn failing_locks_the_block_for_retries() {
        let trainer = trainer().await;
        run_block(&trainer, 7, 1, 1).await;
        let events = trainer.gateway.take();
        assert!(matches!(
            events.last(),
            Some(Event::Sent { text, buttons })
                if text.contains("Не вистачило 4 балів") && buttons[0].data == "view_history_1"
        ));

        let progress = trainer.store.load(UserId(7)).await.unwrap();
        let unlock_at = progress.locks[&block(1).key()];
        assert!(unlock_at - Utc::now().timestamp() <= RETRY_COOLDOWN_SECS);

        trainer.on_callback(press(7, "start_test_1")).await;
        let texts = sent_texts(&trainer.gateway.take()).join("\n");
        assert!(texts.contains("заблоковано"));

        trainer.on_callback(press(7, "view_history_1")).await;
        let texts = sent_texts(&trainer.gateway.take()).join("\n");
        assert!(texts.contains(": 0/5"));
        assert!(texts.contains("Q1: NO — обрано B: no"));
    }

    #[tokio::test]
    async fn finishing_every_block_announces_completion_once() {
        let trainer = trainer().await;
        for n in 1..=4 {
            run_block(&trainer, 7, n, 0).await;
        }
        let events = trainer.gateway.take();
        let texts = sent_texts(&events);
        assert_eq!(texts.iter().filter(|t| **t == replies::COMPLETED).count(), 1);
        assert!(texts.iter().any(|t| t.contains("СЕРТИФІКАТ") && t.contains("Нана")));

        run_block(&trainer, 7, 2, 0).await;
        let texts = sent_texts(&trainer.gateway.take()).join("\n");
        assert!(!texts.contains(replies::COMPLETED));
        assert!(texts.contains("Усі блоки пройдено"));
    }

    #[tokio::test]
    async fn locked_chapters_cannot_be_opened() {
        let trainer = trainer().await;
        trainer.on_callback(press(7, "start_chapter_3")).await;
        assert_eq!(
            answers(&trainer.gateway.take()),
            [(Some(replies::BLOCK_UNAVAILABLE), true)]
        );
    }

    #[tokio::test]
    async fn undeliverable_texts_are_skipped() {
        let mut tables = full_tables();
        tables.insert(
            Table::Texts,
            vec![
                Row::new([("chapter", "1"), ("index", "0"), ("text", "BROKEN intro")]),
                Row::new([("chapter", "1"), ("index", "1"), ("text", "Readable")]),
            ],
        );
        let gateway = RecordingGateway {
            refuse: Some("BROKEN"),
            ..RecordingGateway::default()
        };
        let trainer = trainer_with(gateway, tables).await;

        trainer.on_callback(press(7, "start_chapter_1")).await;
        let events = trainer.gateway.take();
        assert_eq!(sent_texts(&events), ["Readable"]);
        let progress = trainer.store.load(UserId(7)).await.unwrap();
        assert_eq!(progress.text_index, 1);
    }

    #[tokio::test]
    async fn stale_and_malformed_buttons_get_alerts() {
        let trainer = trainer().await;
        trainer.on_callback(press(7, "answer_1_0_0")).await;
        trainer.on_callback(press(7, "nonsense")).await;
        trainer.on_callback(press(7, "next_text_2")).await;
        trainer.on_callback(press(7, "start_test_2")).await;
        assert_eq!(
            answers(&trainer.gateway.take()),
            [
                (Some(replies::STALE_TEST), true),
                (Some(replies::BAD_DATA), true),
                (Some(replies::STALE_TEXT), true),
                (Some(replies::READ_THEORY_FIRST), true),
            ]
        );
    }

    #[tokio::test]
    async fn reset_keeps_nothing_but_unknown_fields() {
        let trainer = trainer().await;
        run_block(&trainer, 7, 1, 0).await;
        let mut record = trainer.store.raw(UserId(7)).await.unwrap().unwrap();
        record.insert("nickname".into(), "Нана".into());
        trainer.store.put_raw(UserId(7), record).await.unwrap();

        trainer.on_command(CHAT, &trainee(7), Command::Reset).await;
        trainer.on_callback(press(7, "reset_training")).await;
        let events = trainer.gateway.take();
        assert!(sent_texts(&events).contains(&replies::RESET_RESTART));
        assert!(sent_texts(&events).contains(&"Intro 1"));

        let progress = trainer.store.load(UserId(7)).await.unwrap();
        assert!(progress.passed_blocks.is_empty());
        assert!(progress.history.is_empty());
        assert_eq!(progress.extra.get("nickname"), Some(&serde_json::Value::from("Нана")));
    }

    #[tokio::test]
    async fn reload_is_admin_only_and_reports_gaps() {
        let mut tables = full_tables();
        tables.remove(&Table::Wine);
        let questions = tables.get_mut(&Table::Questions).unwrap();
        questions.retain(|row| row.get("chapter") != Some("2"));
        let trainer = trainer_with(RecordingGateway::default(), tables).await;

        trainer.on_command(CHAT, &trainee(7), Command::ReloadData).await;
        assert_eq!(sent_texts(&trainer.gateway.take()), [replies::NO_ACCESS]);

        trainer.on_command(CHAT, &trainee(1), Command::ReloadData).await;
        let events = trainer.gateway.take();
        let report = sent_texts(&events)[0];
        assert!(report.starts_with(replies::RELOAD_ISSUES));
        assert!(report.contains("Failed to load Wine table"));
        assert!(report.contains("No questions for chapter 2"));

        assert_eq!(trainer.content.snapshot().texts(block(3)), ["Intro 3", "Body 3"]);
    }

    #[tokio::test]
    async fn guide_lookups() {
        let trainer = trainer().await;
        let user = trainee(7);
        trainer.on_command(CHAT, &user, Command::Menu("ХІНКАЛІ".into())).await;
        trainer.on_command(CHAT, &user, Command::Wine("хінкалі з м'ясом".into())).await;
        trainer.on_command(CHAT, &user, Command::Allergens("  ".into())).await;
        trainer.on_command(CHAT, &user, Command::Menu("піца".into())).await;

        let events = trainer.gateway.take();
        let texts = sent_texts(&events);
        assert_eq!(texts[0], "18 складок");
        assert!(texts[1].starts_with("🍷 Сапераві"));
        assert!(texts[1].ends_with(replies::WINE_TIP));
        assert!(texts[2].contains("/allergens глютен"));
        assert_eq!(texts[3], "❌ Страву «піца» не знайдено.");
    }

    #[tokio::test]
    async fn stats_reflect_progress() {
        let trainer = trainer().await;
        run_block(&trainer, 7, 1, 0).await;
        trainer.gateway.take();

        trainer.on_command(CHAT, &trainee(7), Command::Stats).await;
        let events = trainer.gateway.take();
        let text = sent_texts(&events)[0];
        assert!(text.contains("Поточний блок: 2"));
        assert!(text.contains("Пройдено блоків: 1/4"));
        assert!(text.contains("• Блок 1: 5/5"));
    }

    #[tokio::test]
    async fn emptied_questions_never_pass_a_block() {
        let trainer = trainer().await;
        trainer.on_callback(press(7, "start_chapter_1")).await;
        trainer.on_callback(press(7, "start_test_1")).await;
        trainer.content.replace(ContentSnapshot::default());
        trainer.gateway.take();

        trainer.on_callback(press(7, Action::ContinueTraining)).await;
        let events = trainer.gateway.take();
        assert_eq!(sent_texts(&events), [replies::no_questions(block(1)).as_str()]);

        let progress = trainer.store.load(UserId(7)).await.unwrap();
        assert!(progress.passed_blocks.is_empty());
        assert!(progress.history.is_empty());
        assert_eq!(progress.current_block, block(1));
        assert!(progress.active_test.is_some());
    }

    #[tokio::test]
    async fn pressing_ready_again_resumes_the_running_test() {
        let trainer = trainer().await;
        trainer.on_callback(press(7, "start_chapter_1")).await;
        trainer.on_callback(press(7, "start_test_1")).await;
        for question in 0..4 {
            let action = Action::Answer {
                block: block(1),
                question,
                option: 1,
            };
            trainer.on_callback(press(7, action)).await;
        }
        trainer.gateway.take();

        trainer.on_callback(press(7, "start_test_1")).await;
        let events = trainer.gateway.take();
        assert_eq!(answers(&events), [(Some(replies::TEST_RUNNING), false)]);
        assert_eq!(
            events.last(),
            Some(&Event::Edited {
                message_id: 3,
                text: "❓ Питання 5/5\n\nQ1.4".into(),
            })
        );
        let progress = trainer.store.load(UserId(7)).await.unwrap();
        assert_eq!(progress.active_test.unwrap().answers.len(), 4);

        trainer.on_callback(press(7, "answer_1_4_1")).await;
        let progress = trainer.store.load(UserId(7)).await.unwrap();
        assert_eq!(progress.last_attempt(block(1)).map(|a| a.score), Some(0));
        assert!(progress.locks.contains_key(&block(1).key()));
    }

    #[tokio::test]
    async fn long_explanations_arrive_as_a_message() {
        let explanation = "Хінкалі їдять руками, тримаючи за хвостик. ".repeat(6);
        let mut tables = full_tables();
        let questions = tables.get_mut(&Table::Questions).unwrap();
        *questions = (0..5)
            .map(|index| {
                Row::new(vec![
                    ("chapter".to_string(), "1".to_string()),
                    ("q_index".to_string(), index.to_string()),
                    ("question".to_string(), format!("Q{}", index)),
                    ("option_1".to_string(), "yes".to_string()),
                    ("option_2".to_string(), "no".to_string()),
                    ("correct".to_string(), "A".to_string()),
                    ("explanation".to_string(), explanation.clone()),
                ])
            })
            .collect();
        let trainer = trainer_with(RecordingGateway::default(), tables).await;
        trainer.on_callback(press(7, "start_chapter_1")).await;
        trainer.on_callback(press(7, "start_test_1")).await;
        trainer.gateway.take();

        trainer.on_callback(press(7, "answer_1_0_1")).await;
        let events = trainer.gateway.take();
        assert_eq!(answers(&events), [(Some(replies::WRONG), true)]);
        let texts = sent_texts(&events);
        assert_eq!(texts.len(), 1);
        assert!(texts[0].starts_with(replies::WRONG));
        assert!(texts[0].contains("за хвостик"));
    }

    #[test]
    fn commands_parse() {
        let parse = |text: &str| Command::parse(text, "trainer_bot").ok();
        assert_eq!(parse("/start"), Some(Command::Start));
        assert_eq!(parse("/reload_data"), Some(Command::ReloadData));
        assert_eq!(parse("/menu хінкалі"), Some(Command::Menu("хінкалі".into())));
    }
}
