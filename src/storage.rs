use anyhow::Context;
use async_trait::async_trait;
use dashmap::DashMap;
use sqlx::{migrate::MigrateDatabase, sqlite::SqlitePoolOptions, Row, Sqlite, SqlitePool};
use std::path::Path;
use std::sync::Arc;
use crate::models::Conversation;

// Key/value table backing the durable scope
const MIGRATIONS_SQL: &str = "
CREATE TABLE IF NOT EXISTS settings (
    key TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL
);
";

const GUEST_CONVERSATION_KEY: &str = "guestConversation";
const GUEST_COUNT_KEY: &str = "guestMessageCount";

/// A flat string key/value blob store.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, anyhow::Error>;
    async fn set(&self, key: &str, value: &str) -> Result<(), anyhow::Error>;
    async fn remove(&self, key: &str) -> Result<(), anyhow::Error>;
}

// --- Durable scope (SQLite) ---

#[derive(Debug)]
pub struct SqliteKeyValueStore {
    pool: SqlitePool,
}

impl SqliteKeyValueStore {
    /// Opens (creating if needed) the database at `db_path` and runs migrations.
    pub async fn open(db_path: &Path) -> Result<Self, anyhow::Error> {
        // Ensure the parent directory exists
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent).await.context("Failed to create database directory")?;
        }

        let db_url = format!("sqlite://{}?mode=rwc", db_path.to_string_lossy());
        log::info!("Connecting to database: {}", db_url);

        if !Sqlite::database_exists(&db_url).await.unwrap_or(false) {
            log::info!("Database file not found, creating...");
            Sqlite::create_database(&db_url).await.context("Failed to create database")?;
        }

        let pool = SqlitePoolOptions::new()
            .connect(&db_url)
            .await
            .context("Failed to connect to SQLite database")?;

        Self::run_migrations(&pool).await?;

        Ok(Self { pool })
    }

    async fn run_migrations(pool: &SqlitePool) -> Result<(), anyhow::Error> {
        log::info!("Running database migrations...");
        sqlx::query(MIGRATIONS_SQL)
            .execute(pool)
            .await
            .context("Failed to run database migrations")?;
        log::info!("Database migrations completed.");
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for SqliteKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>, anyhow::Error> {
        log::debug!("Reading key {} from database", key);
        let row = sqlx::query("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to read key from database")?;

        match row {
            Some(r) => Ok(Some(r.try_get::<String, _>("value").context("Invalid value column")?)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), anyhow::Error> {
        log::debug!("Writing key {} ({} bytes) to database", key, value.len());
        sqlx::query(
            r#"
            INSERT INTO settings (key, value) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .context("Failed to write key to database")?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), anyhow::Error> {
        log::debug!("Removing key {} from database", key);
        sqlx::query("DELETE FROM settings WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .context("Failed to remove key from database")?;
        Ok(())
    }
}

// --- Session scope (in memory, lives as long as the process) ---

#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    entries: DashMap<String, String>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops every entry, as when a browser session ends.
    pub fn clear(&self) {
        self.entries.clear();
    }
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>, anyhow::Error> {
        Ok(self.entries.get(key).map(|v| v.value().clone()))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), anyhow::Error> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), anyhow::Error> {
        self.entries.remove(key);
        Ok(())
    }
}

// --- Conversation persistence on top of the two scopes ---

/// Knows where and how conversation state is written. Signed-in users keep
/// their collection in the durable scope; guests keep the active conversation
/// and their message count in the session scope.
#[derive(Clone)]
pub struct ChatPersistence {
    local: Arc<dyn KeyValueStore>,
    session: Arc<dyn KeyValueStore>,
}

impl ChatPersistence {
    pub fn new(local: Arc<dyn KeyValueStore>, session: Arc<dyn KeyValueStore>) -> Self {
        Self { local, session }
    }

    fn collection_key(user_id: &str) -> String {
        format!("conversations-{}", user_id)
    }

    /// Loads a user's collection. Unreadable JSON is logged and treated as empty.
    pub async fn load_conversations(&self, user_id: &str) -> Result<Vec<Conversation>, anyhow::Error> {
        let Some(raw) = self.local.get(&Self::collection_key(user_id)).await? else {
            return Ok(Vec::new());
        };
        match serde_json::from_str::<Vec<Conversation>>(&raw) {
            Ok(conversations) => {
                log::info!("Loaded {} conversations for user {}", conversations.len(), user_id);
                Ok(conversations)
            }
            Err(e) => {
                log::error!("Failed to parse stored conversations for {}: {:?}", user_id, e);
                Ok(Vec::new())
            }
        }
    }

    pub async fn save_conversations(&self, user_id: &str, conversations: &[Conversation]) -> Result<(), anyhow::Error> {
        let json = serde_json::to_string(conversations).context("Failed to serialize conversations")?;
        self.local.set(&Self::collection_key(user_id), &json).await
    }

    pub async fn load_guest_conversation(&self) -> Result<Option<Conversation>, anyhow::Error> {
        let Some(raw) = self.session.get(GUEST_CONVERSATION_KEY).await? else {
            return Ok(None);
        };
        match serde_json::from_str::<Conversation>(&raw) {
            Ok(conv) => Ok(Some(conv)),
            Err(e) => {
                log::error!("Failed to parse guest conversation: {:?}", e);
                Ok(None)
            }
        }
    }

    pub async fn save_guest_conversation(&self, conversation: &Conversation) -> Result<(), anyhow::Error> {
        let json = serde_json::to_string(conversation).context("Failed to serialize guest conversation")?;
        self.session.set(GUEST_CONVERSATION_KEY, &json).await
    }

    pub async fn clear_guest_conversation(&self) -> Result<(), anyhow::Error> {
        self.session.remove(GUEST_CONVERSATION_KEY).await
    }

    pub async fn load_guest_count(&self) -> Result<u32, anyhow::Error> {
        match self.session.get(GUEST_COUNT_KEY).await? {
            Some(raw) => Ok(raw.trim().parse::<u32>().unwrap_or_else(|e| {
                log::error!("Invalid guest message count {:?}: {}", raw, e);
                0
            })),
            None => Ok(0),
        }
    }

    pub async fn save_guest_count(&self, count: u32) -> Result<(), anyhow::Error> {
        self.session.set(GUEST_COUNT_KEY, &count.to_string()).await
    }
}
