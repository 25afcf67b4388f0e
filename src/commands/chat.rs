use futures::StreamExt;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::api::ApiClient;
use crate::conversation::ConversationStore;
use crate::error::AppError;
use crate::models::{Answer, ConversationMessage, Question};
use crate::validation::validate_question_with;

/// Starter questions offered on an empty conversation.
pub const SUGGESTED_QUESTIONS: [&str; 4] = [
    "How many days of paid leave am I entitled to?",
    "How do I request remote work?",
    "What employee benefits are available?",
    "How are business expenses reimbursed?",
];

/// What the chat view renders while an answer is being produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatViewState {
    pub streaming_content: String,
    pub pending_question: Option<String>,
    pub is_loading: bool,
    pub error: Option<String>,
}

pub struct ChatSession {
    api: Arc<ApiClient>,
    conversations: Arc<ConversationStore>,
    state: watch::Sender<ChatViewState>,
    max_question_length: usize,
}

/// Resets the loading state when a submission ends, however it ends.
struct InFlight<'a> {
    state: &'a watch::Sender<ChatViewState>,
    error: Option<String>,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let error = self.error.take();
        self.state.send_modify(|s| {
            *s = ChatViewState {
                error,
                ..ChatViewState::default()
            }
        });
    }
}

impl ChatSession {
    pub fn new(
        api: Arc<ApiClient>,
        conversations: Arc<ConversationStore>,
        max_question_length: usize,
    ) -> Self {
        let (state, _) = watch::channel(ChatViewState::default());
        Self {
            api,
            conversations,
            state,
            max_question_length,
        }
    }

    pub fn snapshot(&self) -> ChatViewState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ChatViewState> {
        self.state.subscribe()
    }

    pub fn is_loading(&self) -> bool {
        self.state.borrow().is_loading
    }

    pub fn suggested_questions(&self) -> &'static [&'static str] {
        &SUGGESTED_QUESTIONS
    }

    pub fn dismiss_error(&self) {
        self.state.send_if_modified(|s| s.error.take().is_some());
    }

    fn begin(&self, question: &str) -> Result<InFlight<'_>, AppError> {
        let claimed = self.state.send_if_modified(|s| {
            if s.is_loading {
                return false;
            }
            *s = ChatViewState {
                streaming_content: String::new(),
                pending_question: Some(question.to_string()),
                is_loading: true,
                error: None,
            };
            true
        });
        if !claimed {
            return Err(AppError::Busy);
        }
        Ok(InFlight {
            state: &self.state,
            error: None,
        })
    }

    /// Stream an answer, calling `on_fragment` for each piece as it arrives.
    ///
    /// The exchange is persisted only once the stream completes. Dropping
    /// the returned future cancels the request and persists nothing.
    pub async fn submit<F>(
        &self,
        text: &str,
        document_ids: &[String],
        mut on_fragment: F,
    ) -> Result<ConversationMessage, AppError>
    where
        F: FnMut(&str) + Send,
    {
        let text = validate_question_with(text, self.max_question_length)?;
        let mut in_flight = self.begin(&text)?;
        let question = Question::new(text.clone());

        match self.stream_answer(&text, document_ids, &mut on_fragment).await {
            Ok(content) => {
                let message = self
                    .conversations
                    .add_message(question, Answer::complete(content, Vec::new()));
                info!(message = %message.id, "answer received");
                Ok(message)
            }
            Err(e) => {
                warn!(error = %e, "streamed answer failed");
                in_flight.error = Some(e.to_string());
                Err(e)
            }
        }
    }

    async fn stream_answer(
        &self,
        question: &str,
        document_ids: &[String],
        on_fragment: &mut (dyn FnMut(&str) + Send),
    ) -> Result<String, AppError> {
        let mut fragments = self.api.chat_stream(question, document_ids).await?;
        let mut content = String::new();
        while let Some(fragment) = fragments.next().await {
            let fragment = fragment?;
            content.push_str(&fragment);
            on_fragment(&fragment);
            let streamed = content.clone();
            self.state.send_modify(|s| s.streaming_content = streamed);
        }
        debug!(chars = content.len(), "stream finished");
        Ok(content)
    }

    /// Ask without streaming; the answer carries its source documents.
    pub async fn ask(&self, text: &str) -> Result<ConversationMessage, AppError> {
        let text = validate_question_with(text, self.max_question_length)?;
        let mut in_flight = self.begin(&text)?;
        let question = Question::new(text.clone());

        match self.api.chat(&text).await {
            Ok(resp) => {
                let message = self
                    .conversations
                    .add_message(question, Answer::complete(resp.answer, resp.sources));
                info!(message = %message.id, sources = message.answer.sources.len(), "answer received");
                Ok(message)
            }
            Err(e) => {
                in_flight.error = Some(e.to_string());
                Err(e.into())
            }
        }
    }
}
