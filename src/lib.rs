// Lumi chat client: conversation store, responders and a terminal front-end.

// Declare the modules
pub mod commands;
pub mod config;
pub mod models;
pub mod repl;
pub mod responder;
pub mod reveal;
pub mod state;
pub mod storage;
pub mod store;

use crate::config::AppConfig;
use crate::responder::{ChatResponder, KeywordResponder, WebhookResponder};
use crate::state::AppState;
use crate::storage::{ChatPersistence, MemoryKeyValueStore, SqliteKeyValueStore};
use crate::store::ConversationStore;
use anyhow::Context;
use std::sync::Arc;

/// Builds the application state described by `config`.
pub async fn build_state(config: &AppConfig) -> Result<AppState, anyhow::Error> {
    let local = SqliteKeyValueStore::open(&config.db_path()).await?;
    // Session scope lives exactly as long as this process
    let session = MemoryKeyValueStore::new();
    let persistence = ChatPersistence::new(Arc::new(local), Arc::new(session));

    let store = ConversationStore::load(persistence, config.identity.clone()).await?;

    let responder: Arc<dyn ChatResponder> = match &config.webhook_url {
        Some(url) => {
            log::info!("Using chat webhook at {}", url);
            Arc::new(WebhookResponder::new(url.clone(), config.history_mode))
        }
        None => {
            log::info!("No webhook configured, using keyword responder");
            Arc::new(KeywordResponder::new())
        }
    };

    Ok(AppState::new(store, responder))
}

pub fn run() -> Result<(), anyhow::Error> {
    // Initialize logging
    env_logger::init();

    let config = AppConfig::from_env()?;
    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    runtime.block_on(async {
        let state = build_state(&config).await?;
        repl::run(state, config.reveal_step).await
    })
}
