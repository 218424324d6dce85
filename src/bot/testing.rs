//! Fixtures shared by the bot unit tests.

use super::gateway::MockGateway;
use super::handlers::{Engine, EngineOptions, Inbound, DELETION_GRANT_TTL};
use crate::config::MenuLinks;
use crate::sheets::MockSheetResolver;
use crate::storage::{save_document, JsonFileRegistry, Registry};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Registry persisted in a throwaway directory
pub struct TempRegistry {
    _dir: TempDir,
    store: Arc<JsonFileRegistry>,
}

impl TempRegistry {
    pub fn new() -> Self {
        Self::with(&[])
    }

    pub fn with(entries: &[(&str, &str)]) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("partituras.json");
        let registry: Registry = entries
            .iter()
            .map(|(name, url)| ((*name).to_string(), (*url).to_string()))
            .collect();
        save_document(&path, &registry).expect("seed registry");
        Self {
            store: Arc::new(JsonFileRegistry::open(path)),
            _dir: dir,
        }
    }

    /// Registry whose document path is a non-empty directory, so every
    /// write fails
    pub fn blocked() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("partituras.json");
        std::fs::create_dir(&path).expect("mkdir");
        std::fs::write(path.join("keep"), "x").expect("write");
        Self {
            store: Arc::new(JsonFileRegistry::open(path)),
            _dir: dir,
        }
    }

    pub fn store(&self) -> Arc<JsonFileRegistry> {
        self.store.clone()
    }
}

pub fn options() -> EngineOptions {
    EngineOptions {
        links: MenuLinks::default(),
        admin_password: "1452".to_string(),
        service_account_email: "reader@example.iam.gserviceaccount.com".to_string(),
        session_idle: Duration::from_secs(60),
        grant_ttl: DELETION_GRANT_TTL,
    }
}

pub fn engine(
    registry: Arc<JsonFileRegistry>,
    resolver: MockSheetResolver,
    gateway: MockGateway,
) -> Engine {
    Engine::new(registry, Arc::new(resolver), Arc::new(gateway), options())
}

pub fn text(user_id: i64, text: &str) -> Inbound {
    Inbound::Text {
        user_id,
        chat_id: 10,
        text: text.to_string(),
    }
}
