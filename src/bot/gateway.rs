//! Outbound messaging seam.
//!
//! Handlers describe what to show as a [`Screen`] and hand it to a
//! [`Gateway`]. [`TelegramGateway`] renders screens with inline keyboards and
//! retries transient network failures; [`render`] swallows conflicts such as
//! "message is not modified" so re-rendering is always safe.

use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{
    CallbackQueryId, ChatId, InlineKeyboardButton, InlineKeyboardMarkup, MessageId, ParseMode,
};
use teloxide::RequestError;
use thiserror::Error;
use tracing::{debug, warn};

/// Button on an inline keyboard
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Opens an external link
    Link {
        /// Button caption
        label: String,
        /// Target URL
        url: String,
    },
    /// Sends a callback tag back to the bot
    Callback {
        /// Button caption
        label: String,
        /// Callback tag
        data: String,
    },
}

impl Action {
    /// External link button
    #[must_use]
    pub fn link(label: impl Into<String>, url: impl Into<String>) -> Self {
        Self::Link {
            label: label.into(),
            url: url.into(),
        }
    }

    /// Callback button
    #[must_use]
    pub fn callback(label: impl Into<String>, data: impl Into<String>) -> Self {
        Self::Callback {
            label: label.into(),
            data: data.into(),
        }
    }

    /// Button caption
    #[must_use]
    pub fn label(&self) -> &str {
        match self {
            Self::Link { label, .. } | Self::Callback { label, .. } => label,
        }
    }
}

/// HTML text plus an optional grid of buttons
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Screen {
    /// Message text (Telegram HTML)
    pub text: String,
    /// Keyboard rows; empty means no keyboard
    pub keyboard: Vec<Vec<Action>>,
}

impl Screen {
    /// Screen without buttons
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            keyboard: Vec::new(),
        }
    }

    /// Screen with a keyboard
    #[must_use]
    pub fn with_keyboard(text: impl Into<String>, keyboard: Vec<Vec<Action>>) -> Self {
        Self {
            text: text.into(),
            keyboard,
        }
    }

    /// All buttons in row order
    pub fn actions(&self) -> impl Iterator<Item = &Action> {
        self.keyboard.iter().flatten()
    }
}

/// Where a screen is rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// New message in the chat
    Reply {
        /// Chat to send to
        chat_id: i64,
    },
    /// Replace an existing bot message
    Edit {
        /// Chat containing the message
        chat_id: i64,
        /// Message to edit
        message_id: i32,
    },
}

/// Errors returned by a gateway
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Content unchanged, message gone or no longer editable, stale query
    #[error("Render conflict: {0}")]
    RenderConflict(String),
    /// Any other delivery failure
    #[error("Transport error: {0}")]
    Transport(String),
}

/// Messaging capabilities the bot needs from the chat platform
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Send `screen` as a new message
    async fn send(&self, chat_id: i64, screen: &Screen) -> Result<(), GatewayError>;
    /// Replace the content of `message_id` with `screen`
    async fn edit(&self, chat_id: i64, message_id: i32, screen: &Screen)
        -> Result<(), GatewayError>;
    /// Acknowledge a button press
    async fn answer_callback(&self, query_id: &str) -> Result<(), GatewayError>;
}

/// Render `screen` at `target`, swallowing render conflicts.
///
/// # Errors
///
/// Returns `GatewayError::Transport` if delivery failed for any other reason.
pub async fn render(
    gateway: &dyn Gateway,
    target: Target,
    screen: &Screen,
) -> Result<(), GatewayError> {
    let result = match target {
        Target::Reply { chat_id } => gateway.send(chat_id, screen).await,
        Target::Edit {
            chat_id,
            message_id,
        } => gateway.edit(chat_id, message_id, screen).await,
    };
    match result {
        Err(GatewayError::RenderConflict(reason)) => {
            debug!("Render skipped: {reason}");
            Ok(())
        }
        other => other,
    }
}

/// Acknowledge a button press; failures are only logged.
pub async fn acknowledge(gateway: &dyn Gateway, query_id: &str) {
    if let Err(e) = gateway.answer_callback(query_id).await {
        debug!("Callback acknowledgement skipped: {e}");
    }
}

/// Error texts Telegram returns for edits and answers that cannot apply
const CONFLICT_MARKERS: &[&str] = &[
    "message is not modified",
    "message to edit not found",
    "message can't be edited",
    "query is too old",
    "query id is invalid",
];

fn classify(e: &RequestError) -> GatewayError {
    let err_msg = e.to_string();
    if CONFLICT_MARKERS.iter().any(|m| err_msg.contains(m)) {
        GatewayError::RenderConflict(err_msg)
    } else {
        GatewayError::Transport(err_msg)
    }
}

fn is_transient(e: &RequestError) -> bool {
    matches!(e, RequestError::Network(_))
}

fn inline_keyboard(rows: &[Vec<Action>]) -> InlineKeyboardMarkup {
    let rows = rows
        .iter()
        .map(|row| {
            row.iter()
                .filter_map(|action| match action {
                    Action::Link { label, url } => match reqwest::Url::parse(url) {
                        Ok(url) => Some(InlineKeyboardButton::url(label.clone(), url)),
                        Err(e) => {
                            warn!("Skipping link button '{label}' with invalid URL: {e}");
                            None
                        }
                    },
                    Action::Callback { label, data } => {
                        Some(InlineKeyboardButton::callback(label.clone(), data.clone()))
                    }
                })
                .collect::<Vec<_>>()
        })
        .filter(|row| !row.is_empty())
        .collect::<Vec<_>>();
    InlineKeyboardMarkup::new(rows)
}

/// [`Gateway`] backed by the Telegram Bot API
#[derive(Clone)]
pub struct TelegramGateway {
    bot: Bot,
}

impl TelegramGateway {
    /// Wrap a teloxide bot
    #[must_use]
    pub const fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl Gateway for TelegramGateway {
    async fn send(&self, chat_id: i64, screen: &Screen) -> Result<(), GatewayError> {
        let markup = (!screen.keyboard.is_empty()).then(|| inline_keyboard(&screen.keyboard));
        crate::utils::retry_transport_operation(
            || {
                let mut req = self
                    .bot
                    .send_message(ChatId(chat_id), screen.text.clone())
                    .parse_mode(ParseMode::Html);
                if let Some(markup) = markup.clone() {
                    req = req.reply_markup(markup);
                }
                async move { req.await.map(|_| ()) }
            },
            is_transient,
        )
        .await
        .map_err(|e| classify(&e))
    }

    async fn edit(
        &self,
        chat_id: i64,
        message_id: i32,
        screen: &Screen,
    ) -> Result<(), GatewayError> {
        let markup = (!screen.keyboard.is_empty()).then(|| inline_keyboard(&screen.keyboard));
        crate::utils::retry_transport_operation(
            || {
                let mut req = self
                    .bot
                    .edit_message_text(ChatId(chat_id), MessageId(message_id), screen.text.clone())
                    .parse_mode(ParseMode::Html);
                if let Some(markup) = markup.clone() {
                    req = req.reply_markup(markup);
                }
                async move { req.await.map(|_| ()) }
            },
            is_transient,
        )
        .await
        .map_err(|e| classify(&e))
    }

    async fn answer_callback(&self, query_id: &str) -> Result<(), GatewayError> {
        self.bot
            .answer_callback_query(CallbackQueryId(query_id.to_string()))
            .await
            .map(|_| ())
            .map_err(|e| classify(&e))
    }
}
