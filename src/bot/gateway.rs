use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup, MessageId};

use crate::progress::MessageRef;

/// Inline button: label plus callback payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    pub text: String,
    pub data: String,
}

impl Button {
    pub fn new(text: impl Into<String>, data: impl ToString) -> Self {
        Self {
            text: text.into(),
            data: data.to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error(transparent)]
    Telegram(#[from] teloxide::RequestError),
    #[error("message rejected: {0}")]
    Rejected(String),
}

/// The three things the trainer needs from a chat transport.
#[async_trait]
pub trait Gateway: Send + Sync {
    async fn send_text(
        &self,
        chat: ChatId,
        text: &str,
        buttons: &[Button],
    ) -> Result<MessageRef, GatewayError>;

    async fn edit_text(
        &self,
        message: MessageRef,
        text: &str,
        buttons: &[Button],
    ) -> Result<(), GatewayError>;

    async fn answer_callback(
        &self,
        callback_id: &str,
        text: Option<&str>,
        alert: bool,
    ) -> Result<(), GatewayError>;
}

/// One button per row, the way every keyboard of the bot looks.
fn keyboard(buttons: &[Button]) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(
        buttons
            .iter()
            .map(|b| vec![InlineKeyboardButton::callback(b.text.clone(), b.data.clone())]),
    )
}

pub struct TelegramGateway {
    bot: Bot,
}

impl TelegramGateway {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl Gateway for TelegramGateway {
    async fn send_text(
        &self,
        chat: ChatId,
        text: &str,
        buttons: &[Button],
    ) -> Result<MessageRef, GatewayError> {
        let request = self.bot.send_message(chat, text);
        let sent = if buttons.is_empty() {
            request.await?
        } else {
            request.reply_markup(keyboard(buttons)).await?
        };
        Ok(MessageRef {
            chat_id: sent.chat.id.0,
            message_id: sent.id.0,
        })
    }

    async fn edit_text(
        &self,
        message: MessageRef,
        text: &str,
        buttons: &[Button],
    ) -> Result<(), GatewayError> {
        self.bot
            .edit_message_text(ChatId(message.chat_id), MessageId(message.message_id), text)
            .reply_markup(keyboard(buttons))
            .await?;
        Ok(())
    }

    async fn answer_callback(
        &self,
        callback_id: &str,
        text: Option<&str>,
        alert: bool,
    ) -> Result<(), GatewayError> {
        let mut request = self.bot.answer_callback_query(callback_id).show_alert(alert);
        if let Some(text) = text {
            request = request.text(text);
        }
        request.await?;
        Ok(())
    }
}
