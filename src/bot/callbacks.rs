//! Inline button router.

use super::gateway::{acknowledge, render, Target};
use super::handlers::Engine;
use super::state::UserSlot;
use super::views::{self, CallbackAction};
use anyhow::Result;
use tracing::{debug, info};

/// A button press as seen by the router
#[derive(Debug, Clone)]
pub(crate) struct Press {
    pub user_id: i64,
    pub chat_id: i64,
    pub message_id: Option<i32>,
    pub query_id: String,
    pub data: String,
}

/// Acknowledge the press, then act on its tag.
///
/// Renders replace the pressed message when it is still accessible.
pub(crate) async fn route(engine: &Engine, slot: &mut UserSlot, press: Press) -> Result<()> {
    let gateway = engine.gateway.as_ref();
    acknowledge(gateway, &press.query_id).await;

    let target = press.message_id.map_or(
        Target::Reply {
            chat_id: press.chat_id,
        },
        |message_id| Target::Edit {
            chat_id: press.chat_id,
            message_id,
        },
    );
    let user_id = press.user_id;

    match CallbackAction::parse(&press.data) {
        CallbackAction::OpenRegistry => {
            let entries = engine.registry.entries().await;
            render(gateway, target, &views::registry_menu(&entries)).await?;
        }
        CallbackAction::NavigateBack => {
            render(gateway, target, &views::main_menu(&engine.options.links)).await?;
        }
        CallbackAction::RetryValidation => {
            let Some(url) = slot.pending_retry.clone() else {
                debug!("User {user_id} pressed retry without a pending link");
                return Ok(());
            };
            info!("User {user_id} retries validation");
            engine.validate(slot, user_id, url, target).await?;
        }
        CallbackAction::DeleteEntry(payload) => {
            let granted = slot
                .deletion_grant
                .as_ref()
                .filter(|grant| !grant.is_expired(engine.options.grant_ttl))
                .and_then(|grant| grant.resolve(&payload))
                .map(str::to_string);
            let Some(name) = granted else {
                info!("User {user_id} tried to delete '{payload}' without a valid grant");
                return Ok(());
            };
            if engine.registry.delete(&name).await? {
                info!("User {user_id} deleted score '{name}'");
                render(gateway, target, &views::entry_deleted(&name)).await?;
            } else {
                debug!("Score '{name}' was already gone");
            }
        }
        CallbackAction::Unknown(tag) => {
            debug!("Unknown callback tag from user {user_id}: {tag}");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::bot::gateway::{GatewayError, MockGateway, Screen};
    use crate::bot::handlers::{Engine, EngineOptions, Inbound};
    use crate::bot::state::DeletionGrant;
    use crate::bot::testing::{engine, options, TempRegistry};
    use crate::sheets::MockSheetResolver;
    use crate::storage::RegistryStore;
    use std::sync::Arc;
    use std::time::Duration;

    fn press(data: &str) -> Inbound {
        Inbound::Callback {
            user_id: 1,
            chat_id: 10,
            message_id: Some(99),
            query_id: "q".to_string(),
            data: data.to_string(),
        }
    }

    fn acknowledging() -> MockGateway {
        let mut gateway = MockGateway::new();
        gateway.expect_answer_callback().returning(|_| Ok(()));
        gateway
    }

    #[tokio::test]
    async fn test_open_registry_edits_message() {
        let mut gateway = acknowledging();
        gateway
            .expect_edit()
            .withf(|chat, message, screen: &Screen| {
                *chat == 10 && *message == 99 && screen.text == "🎼 Партитуры:"
            })
            .times(1)
            .returning(|_, _, _| Ok(()));

        let registry = TempRegistry::with(&[("Aida", "https://a")]);
        let engine = engine(registry.store(), MockSheetResolver::new(), gateway);
        engine.dispatch(press("open-registry")).await.expect("dispatch");
    }

    #[tokio::test]
    async fn test_rerender_conflict_is_not_an_error() {
        let mut gateway = acknowledging();
        gateway
            .expect_edit()
            .times(2)
            .returning(|_, _, _| Err(GatewayError::RenderConflict("message is not modified".into())));

        let registry = TempRegistry::new();
        let engine = engine(registry.store(), MockSheetResolver::new(), gateway);
        engine.dispatch(press("navigate-back")).await.expect("first");
        engine.dispatch(press("navigate-back")).await.expect("second");
    }

    #[tokio::test]
    async fn test_press_on_inaccessible_message_replies() {
        let mut gateway = acknowledging();
        gateway
            .expect_send()
            .withf(|chat, screen: &Screen| *chat == 10 && screen.text == "Выберите действие:")
            .times(1)
            .returning(|_, _| Ok(()));

        let registry = TempRegistry::new();
        let engine = engine(registry.store(), MockSheetResolver::new(), gateway);
        engine
            .dispatch(Inbound::Callback {
                user_id: 1,
                chat_id: 10,
                message_id: None,
                query_id: "q".to_string(),
                data: "navigate-back".to_string(),
            })
            .await
            .expect("dispatch");
    }

    #[tokio::test]
    async fn test_delete_requires_grant() {
        let registry = TempRegistry::with(&[("Aida", "https://a")]);
        let engine = engine(registry.store(), MockSheetResolver::new(), acknowledging());

        engine.dispatch(press("delete-entry:Aida")).await.expect("dispatch");
        assert_eq!(registry.store().entries().await.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_with_expired_grant_is_ignored() {
        let registry = TempRegistry::with(&[("Aida", "https://a")]);
        let engine = Engine::new(
            registry.store(),
            Arc::new(MockSheetResolver::new()),
            Arc::new(acknowledging()),
            EngineOptions {
                grant_ttl: Duration::from_millis(10),
                ..options()
            },
        );
        engine.sessions.lock(1).await.deletion_grant =
            Some(DeletionGrant::new(vec!["Aida".to_string()]));
        tokio::time::sleep(Duration::from_millis(40)).await;

        engine.dispatch(press("delete-entry:Aida")).await.expect("dispatch");
        assert_eq!(registry.store().entries().await.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_by_index_payload() {
        let mut gateway = acknowledging();
        gateway
            .expect_edit()
            .withf(|_, _, screen: &Screen| screen.text == "🗑 «Carmen» удалена")
            .times(1)
            .returning(|_, _, _| Ok(()));

        let registry = TempRegistry::with(&[("Aida", "https://a"), ("Carmen", "https://c")]);
        let engine = engine(registry.store(), MockSheetResolver::new(), gateway);
        engine.sessions.lock(1).await.deletion_grant =
            Some(DeletionGrant::new(vec!["Aida".to_string(), "Carmen".to_string()]));

        engine.dispatch(press("delete-entry:#1")).await.expect("dispatch");
        assert_eq!(registry.store().get("Carmen").await, None);
        assert!(registry.store().get("Aida").await.is_some());
    }

    #[tokio::test]
    async fn test_retry_write_error_keeps_pending_link() {
        let mut resolver = MockSheetResolver::new();
        resolver
            .expect_resolve()
            .times(1)
            .returning(|_| Ok("Requiem".to_string()));

        let registry = TempRegistry::blocked();
        let engine = engine(registry.store(), resolver, acknowledging());
        engine.sessions.lock(1).await.pending_retry = Some("https://r".to_string());

        assert!(engine.dispatch(press("retry-validation")).await.is_err());
        assert!(registry.store().entries().await.is_empty());
        assert_eq!(
            engine.sessions.lock(1).await.pending_retry.as_deref(),
            Some("https://r")
        );
    }

    #[tokio::test]
    async fn test_retry_without_pending_is_noop() {
        let registry = TempRegistry::new();
        let engine = engine(registry.store(), MockSheetResolver::new(), acknowledging());
        engine.dispatch(press("retry-validation")).await.expect("dispatch");
    }

    #[tokio::test]
    async fn test_unknown_tag_only_acknowledges() {
        let mut gateway = MockGateway::new();
        gateway
            .expect_answer_callback()
            .withf(|id| id == "q")
            .times(1)
            .returning(|_| Ok(()));

        let registry = TempRegistry::new();
        let engine = engine(registry.store(), MockSheetResolver::new(), gateway);
        engine.dispatch(press("partituras")).await.expect("dispatch");
    }
}
