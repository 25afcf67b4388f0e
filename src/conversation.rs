//! Chat history: the conversation list, the active conversation, and their
//! persistence.
//!
//! State lives in a `watch` cell. Every mutation computes a complete new
//! [`ConversationState`], persists it, and swaps it in; observers see whole
//! values only.

use chrono::Utc;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};
use uuid::Uuid;

use crate::models::{title_from_question, Answer, Conversation, ConversationMessage, Question};
use crate::storage::LocalStorage;

pub const CONVERSATIONS_KEY: &str = "conversations";
pub const ACTIVE_CONVERSATION_KEY: &str = "activeConversationId";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversationState {
    /// Most recent first.
    pub conversations: Vec<Conversation>,
    pub active_id: Option<Uuid>,
}

impl ConversationState {
    pub fn active(&self) -> Option<&Conversation> {
        let id = self.active_id?;
        self.conversations.iter().find(|c| c.id == id)
    }

    fn position(&self, id: Uuid) -> Option<usize> {
        self.conversations.iter().position(|c| c.id == id)
    }

    /// A new conversation is allowed only when the most recent one has
    /// messages (or there is none at all).
    pub fn can_create_new(&self) -> bool {
        self.conversations.first().map_or(true, |c| !c.is_empty())
    }
}

pub struct ConversationStore {
    storage: Arc<LocalStorage>,
    state: watch::Sender<ConversationState>,
    max_messages: usize,
}

impl ConversationStore {
    /// Load persisted history; guarantees at least one conversation exists.
    pub fn new(storage: Arc<LocalStorage>, max_messages: usize) -> Self {
        let max_messages = max_messages.max(1);
        let initial = Self::load(&storage, max_messages);
        let (state, _) = watch::channel(initial);
        let store = Self {
            storage,
            state,
            max_messages,
        };
        if store.state.borrow().conversations.is_empty() {
            store.create_conversation();
        }
        store
    }

    fn load(storage: &LocalStorage, max_messages: usize) -> ConversationState {
        let mut conversations: Vec<Conversation> =
            storage.get(CONVERSATIONS_KEY).unwrap_or_default();
        for conversation in &mut conversations {
            evict_oldest(&mut conversation.messages, max_messages);
        }

        let persisted_active = storage
            .get::<String>(ACTIVE_CONVERSATION_KEY)
            .and_then(|raw| Uuid::parse_str(&raw).ok())
            .filter(|id| conversations.iter().any(|c| c.id == *id));
        let active_id = persisted_active.or_else(|| conversations.first().map(|c| c.id));

        debug!(
            conversations = conversations.len(),
            restored_active = persisted_active.is_some(),
            "loaded conversation history"
        );
        ConversationState {
            conversations,
            active_id,
        }
    }

    fn persist(&self, state: &ConversationState) {
        self.storage.set(CONVERSATIONS_KEY, &state.conversations);
        match state.active_id {
            Some(id) => self.storage.set(ACTIVE_CONVERSATION_KEY, &id.to_string()),
            None => self.storage.remove(ACTIVE_CONVERSATION_KEY),
        }
    }

    /// Apply `change` atomically. `None` leaves state (and storage) untouched.
    fn update<R>(
        &self,
        change: impl FnOnce(&ConversationState) -> Option<(ConversationState, R)>,
    ) -> Option<R> {
        let mut outcome = None;
        self.state.send_if_modified(|state| match change(state) {
            Some((next, result)) => {
                self.persist(&next);
                *state = next;
                outcome = Some(result);
                true
            }
            None => false,
        });
        outcome
    }

    // ── Mutations ──

    /// Start a new empty conversation and make it active.
    ///
    /// Returns `None` (and does nothing) while the most recent conversation
    /// is still empty.
    pub fn create_conversation(&self) -> Option<Conversation> {
        let created = self.update(|state| {
            if !state.can_create_new() {
                return None;
            }
            let conversation = Conversation::new();
            let mut conversations = Vec::with_capacity(state.conversations.len() + 1);
            conversations.push(conversation.clone());
            conversations.extend(state.conversations.iter().cloned());
            Some((
                ConversationState {
                    conversations,
                    active_id: Some(conversation.id),
                },
                conversation,
            ))
        });
        match &created {
            Some(c) => info!(id = %c.id, "created conversation"),
            None => debug!("most recent conversation is empty, not creating another"),
        }
        created
    }

    /// Make `id` active. Unknown ids are ignored and return `false`.
    pub fn switch_conversation(&self, id: Uuid) -> bool {
        let state = self.state.borrow().clone();
        if state.position(id).is_none() {
            debug!(%id, "switch to unknown conversation ignored");
            return false;
        }
        if state.active_id == Some(id) {
            return true;
        }
        self.update(|state| {
            state.position(id)?;
            Some((
                ConversationState {
                    conversations: state.conversations.clone(),
                    active_id: Some(id),
                },
                (),
            ))
        })
        .is_some()
    }

    /// Remove a conversation. Deleting the active one activates the most
    /// recent remaining conversation, or a fresh one when none remain.
    pub fn delete_conversation(&self, id: Uuid) -> bool {
        let deleted = self
            .update(|state| {
                state.position(id)?;
                let mut conversations: Vec<Conversation> = state
                    .conversations
                    .iter()
                    .filter(|c| c.id != id)
                    .cloned()
                    .collect();
                let mut active_id = state.active_id;
                if active_id == Some(id) || active_id.is_none() {
                    if conversations.is_empty() {
                        conversations.push(Conversation::new());
                    }
                    active_id = conversations.first().map(|c| c.id);
                }
                Some((
                    ConversationState {
                        conversations,
                        active_id,
                    },
                    (),
                ))
            })
            .is_some();
        if deleted {
            info!(%id, "deleted conversation");
        }
        deleted
    }

    /// Append a finished exchange to the active conversation.
    ///
    /// Creates a conversation first when none is active. The oldest messages
    /// are dropped beyond the per-conversation cap, and the first message of
    /// a conversation names it.
    pub fn add_message(&self, question: Question, answer: Answer) -> ConversationMessage {
        let message = ConversationMessage {
            id: Uuid::new_v4(),
            timestamp: question.timestamp,
            question,
            answer: Answer {
                is_streaming: false,
                ..answer
            },
        };
        let max_messages = self.max_messages;
        let stored = message.clone();

        self.update(move |state| {
            let mut conversations = state.conversations.clone();

            let index = match state.active_id.and_then(|id| state.position(id)) {
                Some(index) => index,
                None => {
                    // Reuse an empty head rather than stacking another empty one.
                    if state.can_create_new() {
                        conversations.insert(0, Conversation::new());
                    }
                    0
                }
            };
            let active_id = Some(conversations[index].id);

            let conversation = &mut conversations[index];
            if conversation.messages.is_empty() {
                conversation.title = title_from_question(&stored.question.text);
            }
            conversation.messages.push(stored);
            evict_oldest(&mut conversation.messages, max_messages);
            conversation.updated_at = Utc::now();

            Some((
                ConversationState {
                    conversations,
                    active_id,
                },
                (),
            ))
        });

        debug!(id = %message.id, "stored message");
        message
    }

    /// Explicitly retitle a conversation. Blank titles are ignored.
    pub fn rename_conversation(&self, id: Uuid, title: &str) -> bool {
        let title = title.trim();
        if title.is_empty() {
            return false;
        }
        self.update(|state| {
            let index = state.position(id)?;
            let mut conversations = state.conversations.clone();
            conversations[index].title = title.to_string();
            conversations[index].updated_at = Utc::now();
            Some((
                ConversationState {
                    conversations,
                    active_id: state.active_id,
                },
                (),
            ))
        })
        .is_some()
    }

    /// Forget every conversation, then start over with one empty conversation.
    pub fn clear_all_history(&self) {
        self.storage.remove(CONVERSATIONS_KEY);
        self.storage.remove(ACTIVE_CONVERSATION_KEY);
        let fresh = Conversation::new();
        let next = ConversationState {
            active_id: Some(fresh.id),
            conversations: vec![fresh],
        };
        self.persist(&next);
        self.state.send_replace(next);
        info!("cleared conversation history");
    }

    // ── Reads ──

    pub fn snapshot(&self) -> ConversationState {
        self.state.borrow().clone()
    }

    /// Observe every state replacement.
    pub fn subscribe(&self) -> watch::Receiver<ConversationState> {
        self.state.subscribe()
    }

    pub fn conversations(&self) -> Vec<Conversation> {
        self.state.borrow().conversations.clone()
    }

    pub fn active_conversation_id(&self) -> Option<Uuid> {
        self.state.borrow().active_id
    }

    pub fn active_conversation(&self) -> Option<Conversation> {
        self.state.borrow().active().cloned()
    }

    /// Messages of the active conversation.
    pub fn messages(&self) -> Vec<ConversationMessage> {
        self.state
            .borrow()
            .active()
            .map(|c| c.messages.clone())
            .unwrap_or_default()
    }

    pub fn message_count(&self) -> usize {
        self.state.borrow().active().map_or(0, |c| c.messages.len())
    }

    pub fn get_message_by_id(&self, id: Uuid) -> Option<ConversationMessage> {
        self.state
            .borrow()
            .active()
            .and_then(|c| c.messages.iter().find(|m| m.id == id).cloned())
    }

    pub fn can_create_new_conversation(&self) -> bool {
        self.state.borrow().can_create_new()
    }

    pub fn max_messages(&self) -> usize {
        self.max_messages
    }
}

/// FIFO: keep only the newest `max` messages, order preserved.
fn evict_oldest(messages: &mut Vec<ConversationMessage>, max: usize) {
    if messages.len() > max {
        let excess = messages.len() - max;
        messages.drain(..excess);
    }
}
