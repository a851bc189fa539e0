use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const DEFAULT_TITLE: &str = "New Conversation";

pub const GREETING: &str = "Hello! I'm Lumi, your caring companion for women's health and wellbeing. How can I support you today?";

const TITLE_MAX_CHARS: usize = 30;
const PREVIEW_MAX_CHARS: usize = 100;

// Who authored a message
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

// A single chat message. Never mutated after creation.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub text: String,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self { role: Role::User, text: text.into() }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self { role: Role::Assistant, text: text.into() }
    }
}

/// Whether the assistant is currently working on a reply for a conversation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReplyState {
    #[default]
    Idle,
    Pending,
}

// A titled, ordered sequence of messages
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub title: String,
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    // Transient; a reloaded conversation is never waiting on a reply
    #[serde(skip)]
    pub reply_state: ReplyState,
}

impl Conversation {
    /// Creates a conversation with a fresh id, the default title and the greeting.
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            title: DEFAULT_TITLE.to_string(),
            messages: vec![Message::assistant(GREETING)],
            created_at: now,
            updated_at: now,
            reply_state: ReplyState::Idle,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.reply_state == ReplyState::Pending
    }

    /// Bumps `updated_at`, never letting it fall behind `created_at`.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now().max(self.created_at);
    }

    pub fn summary(&self) -> ConversationSummary {
        let preview = self
            .messages
            .iter()
            .find(|m| m.role == Role::User)
            .map(|m| truncate_with_ellipsis(&m.text, PREVIEW_MAX_CHARS))
            .unwrap_or_else(|| "No messages yet".to_string());
        ConversationSummary {
            id: self.id.clone(),
            title: self.title.clone(),
            preview,
            updated_at: self.updated_at,
        }
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}

// Row shown in the conversation list
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub id: String,
    pub title: String,
    pub preview: String,
    pub updated_at: DateTime<Utc>,
}

// A signed-in user
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
}

/// Title for a conversation whose first user message is `text`: verbatim up to
/// 30 characters, otherwise the first 27 followed by `...`.
pub fn derive_title(text: &str) -> String {
    if text.chars().count() > TITLE_MAX_CHARS {
        let head: String = text.chars().take(TITLE_MAX_CHARS - 3).collect();
        format!("{}...", head)
    } else {
        text.to_string()
    }
}

fn truncate_with_ellipsis(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        let head: String = text.chars().take(max_chars).collect();
        format!("{}...", head)
    } else {
        text.to_string()
    }
}
