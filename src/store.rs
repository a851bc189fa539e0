// Conversation state for one client session. The store owns the collection,
// the active conversation and the guest message counter; every mutation is
// written through the injected persistence before the call returns.

use crate::models::{derive_title, Conversation, ConversationSummary, Identity, Message, ReplyState, Role, DEFAULT_TITLE};
use crate::storage::ChatPersistence;

/// Number of user messages a guest may send before signing in.
pub const GUEST_MESSAGE_LIMIT: u32 = 5;

/// Something the front-end should surface to the user.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Notice {
    GuestLimitReached,
    ConversationDeleted,
    ReplyFailed,
}

pub struct ConversationStore {
    persistence: ChatPersistence,
    identity: Option<Identity>,
    // Newest first. Only populated for signed-in users.
    conversations: Vec<Conversation>,
    active: Option<Conversation>,
    guest_message_count: u32,
}

impl ConversationStore {
    pub fn new(persistence: ChatPersistence, identity: Option<Identity>) -> Self {
        Self {
            persistence,
            identity,
            conversations: Vec::new(),
            active: None,
            guest_message_count: 0,
        }
    }

    /// Creates a store and restores whatever the persistence layer holds for
    /// this identity (or for the current guest session).
    pub async fn load(persistence: ChatPersistence, identity: Option<Identity>) -> Result<Self, anyhow::Error> {
        let mut store = Self::new(persistence, identity);
        match store.identity.clone() {
            Some(identity) => {
                store.conversations = store.persistence.load_conversations(&identity.user_id).await?;
            }
            None => {
                store.guest_message_count = store.persistence.load_guest_count().await?;
                store.active = store.persistence.load_guest_conversation().await?;
                log::info!(
                    "Guest session restored: {} messages sent, active conversation: {}",
                    store.guest_message_count,
                    store.active.is_some()
                );
            }
        }
        Ok(store)
    }

    pub fn is_guest(&self) -> bool {
        self.identity.is_none()
    }

    pub fn guest_message_count(&self) -> u32 {
        self.guest_message_count
    }

    /// False once a guest has used up their allowance.
    pub fn can_send(&self) -> bool {
        !self.is_guest() || self.guest_message_count < GUEST_MESSAGE_LIMIT
    }

    pub fn conversations(&self) -> &[Conversation] {
        &self.conversations
    }

    pub fn summaries(&self) -> Vec<ConversationSummary> {
        self.conversations.iter().map(Conversation::summary).collect()
    }

    pub fn active(&self) -> Option<&Conversation> {
        self.active.as_ref()
    }

    /// The typing indicator: the active conversation is waiting on a reply.
    pub fn is_typing(&self) -> bool {
        self.active.as_ref().is_some_and(Conversation::is_pending)
    }

    pub fn get_conversation(&self, id: &str) -> Option<&Conversation> {
        self.conversations.iter().find(|c| c.id == id)
    }

    pub async fn start_new_conversation(&mut self) -> Result<Conversation, anyhow::Error> {
        let conversation = Conversation::new();
        log::info!("Starting new conversation {}", conversation.id);
        if self.identity.is_some() {
            self.conversations.insert(0, conversation.clone());
        }
        self.active = Some(conversation.clone());
        self.persist().await?;
        Ok(conversation)
    }

    /// Makes a stored conversation active. Returns false if the id is unknown.
    pub fn set_active(&mut self, id: &str) -> bool {
        if self.active.as_ref().is_some_and(|c| c.id == id) {
            return true;
        }
        match self.get_conversation(id).cloned() {
            Some(conversation) => {
                log::debug!("Activating conversation {}", id);
                self.active = Some(conversation);
                true
            }
            None => false,
        }
    }

    /// Appends `message` to the active conversation, starting one if none is
    /// active. Guest user messages count against the allowance; the returned
    /// notice is advisory and the message is stored regardless.
    pub async fn add_message(&mut self, message: Message) -> Result<Option<Notice>, anyhow::Error> {
        let mut notice = None;
        if self.is_guest() && message.role == Role::User {
            self.guest_message_count += 1;
            if self.guest_message_count >= GUEST_MESSAGE_LIMIT {
                log::warn!("Guest message limit reached ({} messages)", self.guest_message_count);
                notice = Some(Notice::GuestLimitReached);
            }
        }

        if self.active.is_none() {
            self.start_new_conversation().await?;
        }
        let Some(active) = self.active.as_mut() else {
            return Ok(notice);
        };

        let is_first_user_message =
            message.role == Role::User && !active.messages.iter().any(|m| m.role == Role::User);
        if is_first_user_message && active.title == DEFAULT_TITLE {
            active.title = derive_title(&message.text);
        }
        active.messages.push(message);
        active.touch();
        log::debug!("Conversation {} now has {} messages", active.id, active.messages.len());

        self.sync_active();
        self.persist().await?;
        Ok(notice)
    }

    /// Appends an assistant reply to the conversation it was requested for,
    /// which may no longer be the active one. Replies for conversations that
    /// have since been deleted are dropped.
    pub async fn append_reply(&mut self, id: &str, message: Message) -> Result<bool, anyhow::Error> {
        if self.active.as_ref().is_some_and(|c| c.id == id) {
            self.add_message(message).await?;
            return Ok(true);
        }
        let Some(conv) = self.conversations.iter_mut().find(|c| c.id == id) else {
            log::warn!("Dropping reply for conversation {} which no longer exists", id);
            return Ok(false);
        };
        conv.messages.push(message);
        conv.touch();
        self.persist().await?;
        Ok(true)
    }

    pub async fn delete_conversation(&mut self, id: &str) -> Result<Option<Notice>, anyhow::Error> {
        let before = self.conversations.len();
        self.conversations.retain(|c| c.id != id);
        let was_active = self.active.as_ref().is_some_and(|c| c.id == id);
        if was_active {
            self.active = None;
        }
        if before == self.conversations.len() && !was_active {
            log::warn!("Attempted to delete non-existent conversation: {}", id);
            return Ok(None);
        }

        log::info!("Deleted conversation {}", id);
        self.persist().await?;
        Ok(Some(Notice::ConversationDeleted))
    }

    /// Renames a conversation. Blank titles and unknown ids are ignored;
    /// returns whether anything changed.
    pub async fn rename_conversation(&mut self, id: &str, new_title: &str) -> Result<bool, anyhow::Error> {
        let title = new_title.trim();
        if title.is_empty() {
            return Ok(false);
        }

        let mut renamed = false;
        for conv in self.conversations.iter_mut().filter(|c| c.id == id) {
            conv.title = title.to_string();
            conv.touch();
            renamed = true;
        }
        if let Some(active) = self.active.as_mut().filter(|c| c.id == id) {
            active.title = title.to_string();
            active.touch();
            renamed = true;
        }

        if renamed {
            log::info!("Renamed conversation {} to: {}", id, title);
            self.persist().await?;
        } else {
            log::warn!("Attempted to rename non-existent conversation: {}", id);
        }
        Ok(renamed)
    }

    /// Marks a conversation as waiting on a reply. Returns false if it is
    /// already pending or does not exist.
    pub fn begin_reply(&mut self, id: &str) -> bool {
        self.set_reply_state(id, ReplyState::Idle, ReplyState::Pending)
    }

    pub fn finish_reply(&mut self, id: &str) -> bool {
        self.set_reply_state(id, ReplyState::Pending, ReplyState::Idle)
    }

    fn set_reply_state(&mut self, id: &str, from: ReplyState, to: ReplyState) -> bool {
        let mut changed = false;
        let active = self.active.iter_mut();
        for conv in self.conversations.iter_mut().chain(active).filter(|c| c.id == id) {
            if conv.reply_state == from {
                conv.reply_state = to;
                changed = true;
            }
        }
        changed
    }

    // Mirror the active conversation into the collection
    fn sync_active(&mut self) {
        let Some(active) = self.active.as_ref() else { return };
        if let Some(slot) = self.conversations.iter_mut().find(|c| c.id == active.id) {
            *slot = active.clone();
        }
    }

    async fn persist(&self) -> Result<(), anyhow::Error> {
        match &self.identity {
            Some(identity) => {
                self.persistence
                    .save_conversations(&identity.user_id, &self.conversations)
                    .await
            }
            None => {
                match &self.active {
                    Some(active) => self.persistence.save_guest_conversation(active).await?,
                    None => self.persistence.clear_guest_conversation().await?,
                }
                self.persistence.save_guest_count(self.guest_message_count).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::GREETING;
    use crate::storage::{KeyValueStore, MemoryKeyValueStore};
    use std::sync::Arc;

    struct Scopes {
        local: Arc<MemoryKeyValueStore>,
        session: Arc<MemoryKeyValueStore>,
    }

    impl Scopes {
        fn new() -> Self {
            Self {
                local: Arc::new(MemoryKeyValueStore::new()),
                session: Arc::new(MemoryKeyValueStore::new()),
            }
        }

        fn persistence(&self) -> ChatPersistence {
            ChatPersistence::new(self.local.clone(), self.session.clone())
        }
    }

    fn alice() -> Option<Identity> {
        Some(Identity { user_id: "alice".to_string() })
    }

    #[tokio::test]
    async fn messages_are_appended_in_order_after_greeting() {
        let scopes = Scopes::new();
        let mut store = ConversationStore::new(scopes.persistence(), alice());
        store.start_new_conversation().await.unwrap();

        let sent: Vec<Message> = (0..7)
            .map(|i| if i % 2 == 0 { Message::user(format!("q{}", i)) } else { Message::assistant(format!("a{}", i)) })
            .collect();
        for m in &sent {
            store.add_message(m.clone()).await.unwrap();
        }

        let active = store.active().unwrap();
        assert_eq!(active.messages.len(), sent.len() + 1);
        assert_eq!(active.messages[0], Message::assistant(GREETING));
        assert_eq!(&active.messages[1..], &sent[..]);
        assert!(active.updated_at >= active.created_at);
        // Collection mirrors the active conversation
        assert_eq!(store.get_conversation(&active.id).unwrap().messages, active.messages);
    }

    #[tokio::test]
    async fn start_new_conversation_prepends_for_signed_in_users() {
        let scopes = Scopes::new();
        let mut store = ConversationStore::new(scopes.persistence(), alice());
        let first = store.start_new_conversation().await.unwrap();
        let second = store.start_new_conversation().await.unwrap();

        assert_eq!(second.messages.len(), 1);
        let ids: Vec<&str> = store.conversations().iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec![second.id.as_str(), first.id.as_str()]);
        assert_eq!(store.active().unwrap().id, second.id);
    }

    #[tokio::test]
    async fn guests_have_no_collection() {
        let scopes = Scopes::new();
        let mut store = ConversationStore::new(scopes.persistence(), None);
        let conv = store.start_new_conversation().await.unwrap();
        assert!(store.conversations().is_empty());
        assert_eq!(store.active().unwrap().id, conv.id);
    }

    #[tokio::test]
    async fn first_user_message_sets_title_once() {
        let scopes = Scopes::new();
        let mut store = ConversationStore::new(scopes.persistence(), alice());
        store.start_new_conversation().await.unwrap();

        store.add_message(Message::assistant("not a title")).await.unwrap();
        assert_eq!(store.active().unwrap().title, DEFAULT_TITLE);

        store.add_message(Message::user("I have a question about my period")).await.unwrap();
        assert_eq!(store.active().unwrap().title, "I have a question about my ...");

        store.add_message(Message::user("Short one")).await.unwrap();
        assert_eq!(store.active().unwrap().title, "I have a question about my ...");
    }

    #[tokio::test]
    async fn add_message_without_active_conversation_starts_one() {
        let scopes = Scopes::new();
        let mut store = ConversationStore::new(scopes.persistence(), alice());
        store.add_message(Message::user("hello")).await.unwrap();

        let active = store.active().unwrap();
        assert_eq!(active.messages.len(), 2);
        assert_eq!(active.title, "hello");
        assert_eq!(store.conversations().len(), 1);
    }

    #[tokio::test]
    async fn guest_counter_counts_only_guest_user_messages() {
        let scopes = Scopes::new();
        let mut store = ConversationStore::new(scopes.persistence(), None);
        store.start_new_conversation().await.unwrap();

        let mut last = 0;
        for i in 0..4 {
            store.add_message(Message::assistant("reply")).await.unwrap();
            assert_eq!(store.guest_message_count(), last);
            let notice = store.add_message(Message::user(format!("q{}", i))).await.unwrap();
            assert!(store.guest_message_count() > last);
            last = store.guest_message_count();
            assert_eq!(notice, None);
        }
        assert!(store.can_send());

        let notice = store.add_message(Message::user("fifth")).await.unwrap();
        assert_eq!(notice, Some(Notice::GuestLimitReached));
        assert_eq!(store.guest_message_count(), GUEST_MESSAGE_LIMIT);
        assert!(!store.can_send());

        let mut signed_in = ConversationStore::new(scopes.persistence(), alice());
        signed_in.add_message(Message::user("hi")).await.unwrap();
        assert_eq!(signed_in.guest_message_count(), 0);
        assert!(signed_in.can_send());
    }

    #[tokio::test]
    async fn guest_counter_resets_with_the_session() {
        let scopes = Scopes::new();
        let mut store = ConversationStore::new(scopes.persistence(), None);
        store.add_message(Message::user("one")).await.unwrap();
        store.add_message(Message::user("two")).await.unwrap();

        let restored = ConversationStore::load(scopes.persistence(), None).await.unwrap();
        assert_eq!(restored.guest_message_count(), 2);
        assert_eq!(restored.active().unwrap().messages.len(), 3);

        scopes.session.clear();
        let fresh = ConversationStore::load(scopes.persistence(), None).await.unwrap();
        assert_eq!(fresh.guest_message_count(), 0);
        assert!(fresh.active().is_none());
    }

    #[tokio::test]
    async fn delete_unknown_id_is_a_no_op() {
        let scopes = Scopes::new();
        let mut store = ConversationStore::new(scopes.persistence(), alice());
        store.start_new_conversation().await.unwrap();
        store.start_new_conversation().await.unwrap();
        let before: Vec<String> = store.conversations().iter().map(|c| c.id.clone()).collect();

        assert_eq!(store.delete_conversation("does-not-exist").await.unwrap(), None);
        assert_eq!(store.delete_conversation("does-not-exist").await.unwrap(), None);
        let after: Vec<String> = store.conversations().iter().map(|c| c.id.clone()).collect();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn deleting_active_conversation_clears_pointer() {
        let scopes = Scopes::new();
        let mut store = ConversationStore::new(scopes.persistence(), alice());
        let older = store.start_new_conversation().await.unwrap();
        let active = store.start_new_conversation().await.unwrap();

        let notice = store.delete_conversation(&active.id).await.unwrap();
        assert_eq!(notice, Some(Notice::ConversationDeleted));
        assert!(store.active().is_none());
        assert!(store.get_conversation(&active.id).is_none());
        assert!(store.get_conversation(&older.id).is_some());
    }

    #[tokio::test]
    async fn rename_updates_collection_and_active() {
        let scopes = Scopes::new();
        let mut store = ConversationStore::new(scopes.persistence(), alice());
        let conv = store.start_new_conversation().await.unwrap();

        assert!(store.rename_conversation(&conv.id, "  Sleep tips  ").await.unwrap());
        assert_eq!(store.active().unwrap().title, "Sleep tips");
        assert_eq!(store.get_conversation(&conv.id).unwrap().title, "Sleep tips");

        assert!(!store.rename_conversation(&conv.id, "   ").await.unwrap());
        assert!(!store.rename_conversation("missing", "Title").await.unwrap());
        assert_eq!(store.active().unwrap().title, "Sleep tips");
    }

    #[tokio::test]
    async fn collection_round_trips_through_persistence() {
        let scopes = Scopes::new();
        let mut store = ConversationStore::new(scopes.persistence(), alice());
        store.start_new_conversation().await.unwrap();
        store.add_message(Message::user("What helps with cramps?")).await.unwrap();
        store.add_message(Message::assistant("Heat and rest often help.")).await.unwrap();
        store.start_new_conversation().await.unwrap();

        let reloaded = ConversationStore::load(scopes.persistence(), alice()).await.unwrap();
        assert_eq!(reloaded.conversations().len(), 2);
        for (a, b) in store.conversations().iter().zip(reloaded.conversations()) {
            assert_eq!(a.id, b.id);
            assert_eq!(a.title, b.title);
            assert_eq!(a.messages, b.messages);
            assert_eq!(a.created_at, b.created_at);
            assert!(b.updated_at >= b.created_at);
        }
        assert!(reloaded.active().is_none());
        assert!(scopes.local.get("conversations-alice").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn reply_state_transitions_once() {
        let scopes = Scopes::new();
        let mut store = ConversationStore::new(scopes.persistence(), alice());
        let conv = store.start_new_conversation().await.unwrap();

        assert!(!store.is_typing());
        assert!(store.begin_reply(&conv.id));
        assert!(store.is_typing());
        assert!(store.get_conversation(&conv.id).unwrap().is_pending());
        assert!(!store.begin_reply(&conv.id));

        assert!(store.finish_reply(&conv.id));
        assert!(!store.is_typing());
        assert!(!store.finish_reply(&conv.id));
        assert!(!store.begin_reply("missing"));
    }

    #[tokio::test]
    async fn reply_lands_in_its_own_conversation() {
        let scopes = Scopes::new();
        let mut store = ConversationStore::new(scopes.persistence(), alice());
        let asked = store.start_new_conversation().await.unwrap();
        store.add_message(Message::user("question")).await.unwrap();
        let other = store.start_new_conversation().await.unwrap();

        assert!(store.append_reply(&asked.id, Message::assistant("answer")).await.unwrap());
        assert_eq!(store.active().unwrap().id, other.id);
        assert_eq!(store.active().unwrap().messages.len(), 1);
        let asked_now = store.get_conversation(&asked.id).unwrap();
        assert_eq!(asked_now.messages.last().unwrap(), &Message::assistant("answer"));

        store.delete_conversation(&asked.id).await.unwrap();
        assert!(!store.append_reply(&asked.id, Message::assistant("late")).await.unwrap());
    }

    #[tokio::test]
    async fn set_active_only_accepts_known_ids() {
        let scopes = Scopes::new();
        let mut store = ConversationStore::new(scopes.persistence(), alice());
        let first = store.start_new_conversation().await.unwrap();
        store.start_new_conversation().await.unwrap();

        assert!(store.set_active(&first.id));
        assert_eq!(store.active().unwrap().id, first.id);
        assert!(!store.set_active("missing"));
        assert_eq!(store.active().unwrap().id, first.id);

    }
}
