mod bot;
mod config;
mod content;
mod progress;

use std::sync::Arc;

use bot::gateway::TelegramGateway;
use bot::{Callback, Command, HandlerResult, Trainee, Trainer};
use config::Config;
use content::sheets::SheetsSource;
use content::ContentStore;
use dotenv::dotenv;
use progress::store::ProgressStore;
use progress::MessageRef;
use teloxide::{prelude::*, utils::command::BotCommands};

type SharedTrainer = Arc<Trainer<TelegramGateway>>;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    dotenv().ok();
    pretty_env_logger::init();
    log::info!("Starting trainer bot...");

    let config = Config::from_env()?;
    let bot = Bot::from_env();

    log::info!("Opening progress database {}", config.database_path);
    let store = ProgressStore::open_sqlite(&config.database_path).await?;
    let source = SheetsSource::new(config.sheets_base_url.clone())?;

    let trainer: SharedTrainer = Arc::new(Trainer::new(
        TelegramGateway::new(bot.clone()),
        store,
        ContentStore::default(),
        Arc::new(source),
        config,
    ));

    let problems = trainer.reload_content().await;
    if problems.is_empty() {
        log::info!("Content loaded");
    } else {
        log::warn!("Content loaded with {} problem(s), serving what is there", problems.len());
    }

    if let Err(err) = bot.set_my_commands(Command::bot_commands()).await {
        log::warn!("Could not register the command list: {}", err);
    }

    let handler = dptree::entry()
        .branch(
            Update::filter_message()
                .filter_command::<Command>()
                .endpoint(command_handler),
        )
        .branch(Update::filter_callback_query().endpoint(callback_handler));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![trainer])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}

async fn command_handler(trainer: SharedTrainer, msg: Message, cmd: Command) -> HandlerResult {
    let Some(user) = msg.from() else {
        return Ok(());
    };
    let from = Trainee {
        id: user.id,
        name: user.full_name(),
    };
    trainer.on_command(msg.chat.id, &from, cmd).await;
    Ok(())
}

async fn callback_handler(trainer: SharedTrainer, q: CallbackQuery) -> HandlerResult {
    // Buttons on inline messages carry no chat; those users are in a private chat with the bot.
    let chat = q
        .message
        .as_ref()
        .map_or(ChatId(q.from.id.0 as i64), |m| m.chat.id);
    let message = q.message.as_ref().map(|m| MessageRef {
        chat_id: m.chat.id.0,
        message_id: m.id.0,
    });

    trainer
        .on_callback(Callback {
            id: q.id.clone(),
            chat,
            from: Trainee {
                id: q.from.id,
                name: q.from.full_name(),
            },
            data: q.data.clone().unwrap_or_default(),
            message,
        })
        .await;
    Ok(())
}
