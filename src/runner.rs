//! Telegram runtime: collaborators, dptree tree and update listener.

use crate::bot::handlers::{Command, Engine, EngineOptions, Inbound};
use crate::bot::TelegramGateway;
use crate::config::Settings;
use crate::sheets::GoogleSheetsClient;
use crate::storage::JsonFileRegistry;
use std::sync::Arc;
use teloxide::dispatching::UpdateHandler;
use teloxide::prelude::*;
use teloxide::types::CallbackQuery;
use teloxide::update_listeners::webhooks;
use teloxide::utils::command::BotCommands;
use tracing::{error, info, warn};

/// Run the bot until interrupted.
///
/// Uses a webhook when `webhook_url` is configured, long polling otherwise.
pub async fn run_bot(settings: Arc<Settings>) {
    let registry = Arc::new(JsonFileRegistry::open(settings.data_file.clone()));
    let sheets = init_sheets(&settings);
    let bot = Bot::new(settings.telegram_token.clone());

    if let Err(e) = bot.set_my_commands(Command::bot_commands()).await {
        warn!("Failed to publish command list: {}", e);
    }

    let options = EngineOptions::from_settings(&settings, sheets.service_account_email());
    let engine = Arc::new(Engine::new(
        registry,
        sheets,
        Arc::new(TelegramGateway::new(bot.clone())),
        options,
    ));
    info!(
        "Engine initialized (session idle: {}s).",
        settings.session_idle().as_secs()
    );

    let mut dispatcher = Dispatcher::builder(bot.clone(), setup_handler())
        .dependencies(dptree::deps![engine])
        .enable_ctrlc_handler()
        .build();

    match settings.webhook_url.as_deref() {
        Some(url) => {
            let listener = match init_webhook(bot, &settings, url).await {
                Ok(listener) => listener,
                Err(e) => {
                    error!("Failed to start webhook listener: {}", e);
                    std::process::exit(1);
                }
            };
            info!("Bot is running (webhook)...");
            dispatcher
                .dispatch_with_listener(
                    listener,
                    LoggingErrorHandler::with_custom_text("An error from the update listener"),
                )
                .await;
        }
        None => {
            info!("Bot is running (long polling)...");
            dispatcher.dispatch().await;
        }
    }
}

fn init_sheets(settings: &Settings) -> Arc<GoogleSheetsClient> {
    match GoogleSheetsClient::from_key_file(&settings.credentials_file, settings.sheets_timeout()) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            error!(
                "Failed to load service account key from {}: {}",
                settings.credentials_file.display(),
                e
            );
            std::process::exit(1);
        }
    }
}

async fn init_webhook(
    bot: Bot,
    settings: &Settings,
    url: &str,
) -> anyhow::Result<impl teloxide::update_listeners::UpdateListener<Err = std::convert::Infallible>>
{
    let addr = settings.webhook_addr()?;
    let url = reqwest::Url::parse(url)?;
    info!("Binding webhook listener on {addr}");
    let listener = webhooks::axum(bot, webhooks::Options::new(addr, url)).await?;
    Ok(listener)
}

fn setup_handler() -> UpdateHandler<teloxide::RequestError> {
    dptree::entry()
        .branch(Update::filter_callback_query().endpoint(handle_callback))
        .branch(
            Update::filter_message()
                .branch(
                    dptree::entry()
                        .filter_command::<Command>()
                        .endpoint(handle_command),
                )
                .branch(
                    dptree::filter(|msg: Message| msg.text().is_some()).endpoint(handle_text),
                ),
        )
}

fn get_user_id_safe(msg: &Message) -> i64 {
    msg.from.as_ref().map_or(0, |u| u.id.0.cast_signed())
}

async fn handle_callback(
    q: CallbackQuery,
    engine: Arc<Engine>,
) -> Result<(), teloxide::RequestError> {
    let user_id = q.from.id.0.cast_signed();
    let inbound = Inbound::Callback {
        user_id,
        chat_id: q.message.as_ref().map_or(user_id, |m| m.chat().id.0),
        message_id: q
            .message
            .as_ref()
            .and_then(|m| m.regular_message())
            .map(|m| m.id.0),
        query_id: q.id.0.clone(),
        data: q.data.clone().unwrap_or_default(),
    };
    if let Err(e) = engine.dispatch(inbound).await {
        error!("Callback handler error: {}", e);
    }
    respond(())
}

async fn handle_command(
    msg: Message,
    cmd: Command,
    engine: Arc<Engine>,
) -> Result<(), teloxide::RequestError> {
    let inbound = Inbound::Command {
        user_id: get_user_id_safe(&msg),
        chat_id: msg.chat.id.0,
        command: cmd,
    };
    if let Err(e) = engine.dispatch(inbound).await {
        error!("Command error: {}", e);
    }
    respond(())
}

async fn handle_text(msg: Message, engine: Arc<Engine>) -> Result<(), teloxide::RequestError> {
    let inbound = Inbound::Text {
        user_id: get_user_id_safe(&msg),
        chat_id: msg.chat.id.0,
        text: msg.text().unwrap_or_default().to_string(),
    };
    if let Err(e) = engine.dispatch(inbound).await {
        error!("Text handler error: {}", e);
    }
    respond(())
}
