pub mod api;
pub mod commands;
pub mod config;
pub mod conversation;
pub mod doc_processor;
pub mod documents;
pub mod error;
pub mod models;
pub mod storage;
pub mod validation;

#[cfg(test)]
mod test_support;

use std::sync::Arc;
use tracing::info;

use api::ApiClient;
use commands::chat::ChatSession;
use config::AppConfig;
use conversation::ConversationStore;
use documents::{DocumentDirectory, ProgressDisplay};
use storage::LocalStorage;

/// The client's long-lived services, built once and shared.
pub struct App {
    pub config: AppConfig,
    pub api: Arc<ApiClient>,
    pub storage: Arc<LocalStorage>,
    pub conversations: Arc<ConversationStore>,
    pub documents: Arc<DocumentDirectory>,
    pub chat: ChatSession,
}

impl App {
    pub fn new(config: AppConfig) -> Self {
        let storage = Arc::new(LocalStorage::open(&config.data_dir, &config.storage_prefix));
        Self::with_storage(config, storage)
    }

    pub fn with_storage(config: AppConfig, storage: Arc<LocalStorage>) -> Self {
        let api = Arc::new(ApiClient::new(&config.api_url));
        let conversations = Arc::new(ConversationStore::new(
            storage.clone(),
            config.max_conversation_messages,
        ));
        let documents = Arc::new(DocumentDirectory::new(
            api.clone(),
            ProgressDisplay {
                after_complete: config.upload_complete_display,
                after_error: config.upload_error_display,
            },
        ));
        let chat = ChatSession::new(api.clone(), conversations.clone(), config.max_question_length);
        info!(api = %api.base_url(), "client ready");

        Self {
            config,
            api,
            storage,
            conversations,
            documents,
            chat,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_wires_shared_history() {
        let config = AppConfig::from_lookup(|_| None);
        let app = App::with_storage(config, Arc::new(LocalStorage::in_memory("test-")));
        assert_eq!(app.api.base_url(), config::DEFAULT_API_URL);
        assert_eq!(app.conversations.conversations().len(), 1);
        assert!(app.documents.documents().is_empty());
        assert!(!app.chat.is_loading());
    }
}
