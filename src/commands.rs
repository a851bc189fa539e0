// Operations the front-end invokes. Each locks the store only for as long as
// it touches conversation state.

use crate::models::{Conversation, ConversationSummary, Message};
use crate::state::AppState;
use crate::store::Notice;

pub const APOLOGY: &str = "I'm sorry, I'm having trouble responding right now. Please try again in a moment.";

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("message is empty")]
    EmptyMessage,
    #[error("still waiting for a reply in this conversation")]
    ReplyPending,
    #[error("failed to save conversation: {0:#}")]
    Storage(anyhow::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Guest allowance used up; nothing was stored.
    SignInRequired,
    Replied {
        conversation_id: String,
        reply: String,
        notices: Vec<Notice>,
    },
}

pub async fn list_conversations(state: &AppState) -> Vec<ConversationSummary> {
    log::info!("Requested conversation list");
    state.store.lock().await.summaries()
}

pub async fn create_conversation(state: &AppState) -> Result<Conversation, String> {
    let mut store = state.store.lock().await;
    match store.start_new_conversation().await {
        Ok(conv) => Ok(conv),
        Err(e) => {
            log::error!("Failed to create conversation: {:?}", e);
            Err(format!("Failed to create conversation: {}", e))
        }
    }
}

/// Activates the conversation with `conversation_id`, or starts a new one when
/// the id is unknown.
pub async fn open_conversation(state: &AppState, conversation_id: &str) -> Result<Conversation, String> {
    log::info!("Requested conversation {}", conversation_id);
    let mut store = state.store.lock().await;
    if store.set_active(conversation_id) {
        if let Some(active) = store.active() {
            return Ok(active.clone());
        }
    }

    log::warn!("Conversation {} not found, starting a new one", conversation_id);
    store.start_new_conversation().await.map_err(|e| {
        log::error!("Failed to start replacement conversation: {:?}", e);
        format!("Failed to create conversation: {}", e)
    })
}

/// The conversation to show at startup: the active one, else the newest
/// stored one. Nothing is created; the first send starts a conversation.
pub async fn resume_conversation(state: &AppState) -> Option<Conversation> {
    let mut store = state.store.lock().await;
    if store.active().is_none() {
        let newest = store.conversations().first().map(|c| c.id.clone())?;
        log::info!("Resuming most recent conversation {}", newest);
        store.set_active(&newest);
    }
    store.active().cloned()
}

pub async fn rename_conversation(state: &AppState, conversation_id: &str, new_title: &str) -> Result<bool, String> {
    log::info!("Requested rename of conversation {} to: {}", conversation_id, new_title);
    let mut store = state.store.lock().await;
    store.rename_conversation(conversation_id, new_title).await.map_err(|e| {
        log::error!("Failed to rename conversation {}: {:?}", conversation_id, e);
        format!("Failed to rename conversation: {}", e)
    })
}

pub async fn delete_conversation(state: &AppState, conversation_id: &str) -> Result<Option<Notice>, String> {
    log::warn!("Requested deletion of conversation {}", conversation_id);
    let mut store = state.store.lock().await;
    store.delete_conversation(conversation_id).await.map_err(|e| {
        log::error!("Failed to delete conversation {}: {:?}", conversation_id, e);
        format!("Failed to delete conversation: {}", e)
    })
}

/// Sends a user message in the active conversation and waits for the reply.
///
/// Guests over their allowance get [`SendOutcome::SignInRequired`] and nothing
/// is stored. A conversation already waiting on a reply refuses further sends.
/// Responder failures are answered with [`APOLOGY`] and a
/// [`Notice::ReplyFailed`].
pub async fn send_message(state: &AppState, text: &str) -> Result<SendOutcome, SendError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(SendError::EmptyMessage);
    }

    // --- Store the user message and mark the conversation pending ---
    let (conversation_id, history, mut notices) = {
        let mut store = state.store.lock().await;
        if !store.can_send() {
            log::warn!("Guest message limit reached, asking the user to sign in");
            return Ok(SendOutcome::SignInRequired);
        }
        if store.is_typing() {
            log::warn!("Refusing send while a reply is pending");
            return Err(SendError::ReplyPending);
        }

        let notice = store.add_message(Message::user(text)).await.map_err(SendError::Storage)?;
        let Some(active) = store.active() else {
            return Err(SendError::Storage(anyhow::anyhow!("No active conversation after sending")));
        };
        let conversation_id = active.id.clone();
        let history = active.messages.clone();
        store.begin_reply(&conversation_id);
        (conversation_id, history, notice.into_iter().collect::<Vec<_>>())
        // Lock released here, before the responder call
    };

    // --- Ask the responder ---
    log::info!("Requesting reply for conversation {}", conversation_id);
    let reply = match state.responder.respond(&history).await {
        Ok(reply) => reply,
        Err(e) => {
            log::error!("Responder failed for conversation {}: {}", conversation_id, e);
            notices.push(Notice::ReplyFailed);
            APOLOGY.to_string()
        }
    };

    // --- Store the reply ---
    {
        let mut store = state.store.lock().await;
        store.finish_reply(&conversation_id);
        store
            .append_reply(&conversation_id, Message::assistant(reply.clone()))
            .await
            .map_err(SendError::Storage)?;
    }

    log::info!("Reply stored for conversation {}", conversation_id);
    Ok(SendOutcome::Replied { conversation_id, reply, notices })
}
