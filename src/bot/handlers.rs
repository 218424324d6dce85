//! Update engine
//!
//! [`Engine::dispatch`] receives one classified [`Inbound`] update, locks the
//! user's session slot for the whole handling and drives the conversation
//! state machine, the registry and the validation client.

use super::callbacks;
use super::gateway::{render, Gateway, Target};
use super::sessions::SessionTable;
use super::state::{DeletionGrant, Flow, StepOutcome, UserSlot};
use super::views;
use crate::config::{MenuLinks, Settings};
use crate::sheets::SheetResolver;
use crate::storage::RegistryStore;
use crate::utils::truncate_str;
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use teloxide::utils::command::BotCommands;
use tracing::{debug, info, warn};

/// How long a rendered deletion menu stays actionable
pub const DELETION_GRANT_TTL: Duration = Duration::from_secs(600);

/// Submitted links are cut to this length in logs
const LOGGED_URL_CHARS: usize = 200;

/// Supported commands
#[derive(BotCommands, Clone, Copy, Debug, PartialEq, Eq)]
#[command(rename_rule = "lowercase", description = "Поддерживаемые команды:")]
pub enum Command {
    /// Show the main menu
    #[command(description = "Главное меню.")]
    Start,
    /// Register a new score
    #[command(description = "Добавить партитуру.")]
    Addtab,
    /// Remove a registered score
    #[command(description = "Удалить партитуру.")]
    Deltab,
}

/// One update, already classified by the dispatcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Inline button press
    Callback {
        /// Telegram user id
        user_id: i64,
        /// Chat containing the pressed message
        chat_id: i64,
        /// Message carrying the keyboard, if still accessible
        message_id: Option<i32>,
        /// Query id to acknowledge
        query_id: String,
        /// Callback tag
        data: String,
    },
    /// Recognised bot command
    Command {
        /// Telegram user id
        user_id: i64,
        /// Chat the command was sent in
        chat_id: i64,
        /// Parsed command
        command: Command,
    },
    /// Plain text message
    Text {
        /// Telegram user id
        user_id: i64,
        /// Chat the text was sent in
        chat_id: i64,
        /// Raw message text
        text: String,
    },
}

impl Inbound {
    /// Sender of the update
    #[must_use]
    pub const fn user_id(&self) -> i64 {
        match self {
            Self::Callback { user_id, .. }
            | Self::Command { user_id, .. }
            | Self::Text { user_id, .. } => *user_id,
        }
    }
}

/// Static parameters of the engine
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Links of the main menu
    pub links: MenuLinks,
    /// Shared secret guarding both flows
    pub admin_password: String,
    /// Account users must share their spreadsheets with
    pub service_account_email: String,
    /// Idle time after which a user's session is forgotten
    pub session_idle: Duration,
    /// Lifetime of a deletion menu
    pub grant_ttl: Duration,
}

impl EngineOptions {
    /// Options derived from loaded settings
    #[must_use]
    pub fn from_settings(settings: &Settings, service_account_email: impl Into<String>) -> Self {
        Self {
            links: settings.menu_links(),
            admin_password: settings.admin_password.clone(),
            service_account_email: service_account_email.into(),
            session_idle: settings.session_idle(),
            grant_ttl: DELETION_GRANT_TTL,
        }
    }
}

/// Conversation engine shared by all dispatcher endpoints
pub struct Engine {
    pub(crate) registry: Arc<dyn RegistryStore>,
    pub(crate) resolver: Arc<dyn SheetResolver>,
    pub(crate) gateway: Arc<dyn Gateway>,
    pub(crate) sessions: SessionTable,
    pub(crate) options: EngineOptions,
}

impl Engine {
    /// Assemble an engine from its collaborators
    #[must_use]
    pub fn new(
        registry: Arc<dyn RegistryStore>,
        resolver: Arc<dyn SheetResolver>,
        gateway: Arc<dyn Gateway>,
        options: EngineOptions,
    ) -> Self {
        Self {
            registry,
            resolver,
            gateway,
            sessions: SessionTable::new(options.session_idle),
            options,
        }
    }

    /// Handle one update.
    ///
    /// The user's session slot stays locked until the update is fully
    /// handled, so updates of the same user never interleave.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry could not be written or a reply could
    /// not be delivered.
    pub async fn dispatch(&self, inbound: Inbound) -> Result<()> {
        let user_id = inbound.user_id();
        let mut slot = self.sessions.lock(user_id).await;

        match inbound {
            Inbound::Callback {
                chat_id,
                message_id,
                query_id,
                data,
                ..
            } => {
                callbacks::route(
                    self,
                    &mut slot,
                    callbacks::Press {
                        user_id,
                        chat_id,
                        message_id,
                        query_id,
                        data,
                    },
                )
                .await
            }
            Inbound::Command {
                chat_id, command, ..
            } => self.on_command(&mut slot, user_id, chat_id, command).await,
            Inbound::Text { chat_id, text, .. } => {
                self.on_text(&mut slot, user_id, chat_id, &text).await
            }
        }
    }

    async fn on_command(
        &self,
        slot: &mut UserSlot,
        user_id: i64,
        chat_id: i64,
        command: Command,
    ) -> Result<()> {
        info!("User {user_id} sent command {command:?}");
        let target = Target::Reply { chat_id };
        match command {
            Command::Start => {
                render(
                    self.gateway.as_ref(),
                    target,
                    &views::main_menu(&self.options.links),
                )
                .await?;
            }
            Command::Addtab => {
                slot.begin(Flow::AddEntry);
                render(
                    self.gateway.as_ref(),
                    target,
                    &views::notice(views::ENTER_PASSWORD),
                )
                .await?;
            }
            Command::Deltab => {
                slot.begin(Flow::DeleteEntry);
                render(
                    self.gateway.as_ref(),
                    target,
                    &views::notice(views::ENTER_PASSWORD),
                )
                .await?;
            }
        }
        Ok(())
    }

    async fn on_text(
        &self,
        slot: &mut UserSlot,
        user_id: i64,
        chat_id: i64,
        text: &str,
    ) -> Result<()> {
        if text.starts_with('/') {
            debug!("Ignoring unknown command from user {user_id}");
            return Ok(());
        }
        let Some(conversation) = slot.conversation.take() else {
            debug!("Ignoring text from user {user_id} without active flow");
            return Ok(());
        };

        let target = Target::Reply { chat_id };
        match conversation.on_text(text, &self.options.admin_password) {
            StepOutcome::PromptUrl(next) => {
                slot.conversation = Some(next);
                render(
                    self.gateway.as_ref(),
                    target,
                    &views::notice(views::SEND_SHEET_LINK),
                )
                .await?;
            }
            StepOutcome::ShowDeletionMenu => {
                let entries = self.registry.entries().await;
                if !entries.is_empty() {
                    slot.deletion_grant = Some(DeletionGrant::new(
                        entries.iter().map(|e| e.name.clone()).collect(),
                    ));
                }
                info!(
                    "User {user_id} opened the deletion menu with {} entries",
                    entries.len()
                );
                render(
                    self.gateway.as_ref(),
                    target,
                    &views::deletion_menu(&entries),
                )
                .await?;
            }
            StepOutcome::Rejected => {
                info!("User {user_id} entered a wrong password");
                render(
                    self.gateway.as_ref(),
                    target,
                    &views::notice(views::WRONG_PASSWORD),
                )
                .await?;
            }
            StepOutcome::Resolve(url) => self.validate(slot, user_id, url, target).await?,
        }
        Ok(())
    }

    /// Resolve `url` and register it under the spreadsheet title.
    ///
    /// On failure the link is kept as the user's pending retry.
    pub(crate) async fn validate(
        &self,
        slot: &mut UserSlot,
        user_id: i64,
        url: String,
        target: Target,
    ) -> Result<()> {
        match self.resolver.resolve(&url).await {
            Ok(title) => {
                self.registry.put(title.clone(), url).await?;
                slot.pending_retry = None;
                info!("User {user_id} added score '{title}'");
                render(self.gateway.as_ref(), target, &views::entry_added(&title)).await?;
            }
            Err(e) => {
                warn!(
                    "Validation of '{}' for user {user_id} failed: {e}",
                    truncate_str(&url, LOGGED_URL_CHARS)
                );
                slot.pending_retry = Some(url);
                render(
                    self.gateway.as_ref(),
                    target,
                    &views::validation_failed(&self.options.service_account_email),
                )
                .await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::gateway::{MockGateway, Screen};
    use crate::bot::testing::{engine, text, TempRegistry};
    use crate::sheets::{MockSheetResolver, SheetsError};

    fn expect_reply(gateway: &mut MockGateway, expected: &'static str) {
        gateway
            .expect_send()
            .withf(move |chat, screen: &Screen| *chat == 10 && screen.text.contains(expected))
            .times(1)
            .returning(|_, _| Ok(()));
    }

    #[tokio::test]
    async fn test_start_sends_main_menu() {
        let mut gateway = MockGateway::new();
        expect_reply(&mut gateway, "Выберите действие:");
        let registry = TempRegistry::new();
        let engine = engine(registry.store(), MockSheetResolver::new(), gateway);

        engine
            .dispatch(Inbound::Command {
                user_id: 1,
                chat_id: 10,
                command: Command::Start,
            })
            .await
            .expect("dispatch");
    }

    #[tokio::test]
    async fn test_text_without_flow_is_ignored() {
        let registry = TempRegistry::new();
        let engine = engine(registry.store(), MockSheetResolver::new(), MockGateway::new());

        engine.dispatch(text(1, "1452")).await.expect("dispatch");
    }

    #[tokio::test]
    async fn test_add_flow_registers_title() {
        let mut gateway = MockGateway::new();
        expect_reply(&mut gateway, "Введите пароль:");
        expect_reply(&mut gateway, "Отправьте ссылку");
        expect_reply(&mut gateway, "«Spring Concert» добавлена");

        let mut resolver = MockSheetResolver::new();
        resolver
            .expect_resolve()
            .withf(|url| url == "https://docs.google.com/spreadsheets/d/abc")
            .times(1)
            .returning(|_| Ok("Spring Concert".to_string()));

        let registry = TempRegistry::new();
        let engine = engine(registry.store(), resolver, gateway);

        engine
            .dispatch(Inbound::Command {
                user_id: 1,
                chat_id: 10,
                command: Command::Addtab,
            })
            .await
            .expect("addtab");
        engine.dispatch(text(1, "1452")).await.expect("password");
        engine
            .dispatch(text(1, " https://docs.google.com/spreadsheets/d/abc "))
            .await
            .expect("url");

        assert_eq!(
            registry.store().get("Spring Concert").await.as_deref(),
            Some("https://docs.google.com/spreadsheets/d/abc")
        );
    }

    #[tokio::test]
    async fn test_write_error_propagates_without_confirmation() {
        // The link prompt is the only message sent
        let mut gateway = MockGateway::new();
        expect_reply(&mut gateway, "Отправьте ссылку");

        let mut resolver = MockSheetResolver::new();
        resolver
            .expect_resolve()
            .times(1)
            .returning(|_| Ok("Spring Concert".to_string()));

        let registry = TempRegistry::blocked();
        let engine = engine(registry.store(), resolver, gateway);
        engine.sessions.lock(1).await.begin(Flow::AddEntry);
        engine.dispatch(text(1, "1452")).await.expect("password");

        let result = engine
            .dispatch(text(1, "https://docs.google.com/spreadsheets/d/abc"))
            .await;

        let err = result.expect_err("write error must surface");
        assert!(err.downcast_ref::<crate::storage::StorageError>().is_some());
        assert!(registry.store().entries().await.is_empty());
        assert!(engine.sessions.lock(1).await.conversation.is_none());
    }

    #[tokio::test]
    async fn test_failed_validation_keeps_pending_retry() {
        let mut gateway = MockGateway::new();
        expect_reply(&mut gateway, "Не удалось открыть таблицу");

        let mut resolver = MockSheetResolver::new();
        resolver
            .expect_resolve()
            .times(1)
            .returning(|_| Err(SheetsError::InvalidUrl("nope".to_string())));

        let registry = TempRegistry::new();
        let engine = engine(registry.store(), resolver, gateway);
        {
            let mut slot = engine.sessions.lock(1).await;
            slot.conversation = Some(crate::bot::state::Conversation {
                flow: Flow::AddEntry,
                step: crate::bot::state::Step::AwaitingUrl,
            });
        }

        engine.dispatch(text(1, "nope")).await.expect("dispatch");

        let slot = engine.sessions.lock(1).await;
        assert_eq!(slot.pending_retry.as_deref(), Some("nope"));
        assert!(slot.conversation.is_none());
        assert!(registry.store().entries().await.is_empty());
    }

    #[tokio::test]
    async fn test_slash_text_does_not_consume_step() {
        let registry = TempRegistry::new();
        let engine = engine(registry.store(), MockSheetResolver::new(), MockGateway::new());
        engine.sessions.lock(1).await.begin(Flow::DeleteEntry);

        engine.dispatch(text(1, "/help")).await.expect("dispatch");

        assert!(engine.sessions.lock(1).await.conversation.is_some());
    }

    #[tokio::test]
    async fn test_delete_flow_issues_grant() {
        let mut gateway = MockGateway::new();
        expect_reply(&mut gateway, "Выберите таблицу для удаления:");

        let registry = TempRegistry::with(&[("Aida", "https://a"), ("Carmen", "https://c")]);
        let engine = engine(registry.store(), MockSheetResolver::new(), gateway);
        engine.sessions.lock(1).await.begin(Flow::DeleteEntry);

        engine.dispatch(text(1, "1452")).await.expect("dispatch");

        let slot = engine.sessions.lock(1).await;
        let grant = slot.deletion_grant.as_ref().expect("grant issued");
        assert_eq!(grant.names, vec!["Aida".to_string(), "Carmen".to_string()]);
        assert!(slot.conversation.is_none());
    }

    #[tokio::test]
    async fn test_delete_flow_with_empty_registry() {
        let mut gateway = MockGateway::new();
        expect_reply(&mut gateway, "Партитур пока нет.");

        let registry = TempRegistry::new();
        let engine = engine(registry.store(), MockSheetResolver::new(), gateway);
        engine.sessions.lock(1).await.begin(Flow::DeleteEntry);

        engine.dispatch(text(1, "1452")).await.expect("dispatch");
        assert!(engine.sessions.lock(1).await.deletion_grant.is_none());
    }

    #[tokio::test]
    async fn test_wrong_password_ends_flow() {
        let mut gateway = MockGateway::new();
        expect_reply(&mut gateway, "Пароль неверный");

        let registry = TempRegistry::new();
        let engine = engine(registry.store(), MockSheetResolver::new(), gateway);
        engine.sessions.lock(1).await.begin(Flow::AddEntry);

        engine.dispatch(text(1, "0000")).await.expect("dispatch");
        assert!(engine.sessions.lock(1).await.conversation.is_none());
    }
}
