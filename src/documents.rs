//! Uploaded source documents as seen by the client.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::api::{ApiClient, ApiError, ProgressFn, UploadFile};
use crate::doc_processor;
use crate::models::{Document, DocumentStatus, UploadProgress};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentsState {
    pub documents: Vec<Document>,
    pub loading: bool,
    pub upload_progress: Option<UploadProgress>,
}

impl DocumentsState {
    pub fn document_count(&self) -> usize {
        self.documents.len()
    }

    pub fn count_with_status(&self, status: DocumentStatus) -> usize {
        self.documents.iter().filter(|d| d.status == status).count()
    }

    pub fn indexed_count(&self) -> usize {
        self.count_with_status(DocumentStatus::Indexed)
    }

    pub fn pending_count(&self) -> usize {
        self.count_with_status(DocumentStatus::Pending)
    }

    pub fn failed_count(&self) -> usize {
        self.count_with_status(DocumentStatus::Failed)
    }

    pub fn indexed_documents(&self) -> Vec<Document> {
        self.documents
            .iter()
            .filter(|d| d.status == DocumentStatus::Indexed)
            .cloned()
            .collect()
    }
}

/// How long upload progress stays visible once the upload has settled.
#[derive(Debug, Clone, Copy)]
pub struct ProgressDisplay {
    pub after_complete: Duration,
    pub after_error: Duration,
}

impl Default for ProgressDisplay {
    fn default() -> Self {
        Self {
            after_complete: Duration::from_secs(2),
            after_error: Duration::from_secs(5),
        }
    }
}

/// A text rendering of a document's original file.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentPreview {
    pub document_id: String,
    pub filename: String,
    pub url: String,
    pub text: String,
}

pub struct DocumentDirectory {
    api: Arc<ApiClient>,
    state: Arc<watch::Sender<DocumentsState>>,
    upload_seq: Arc<AtomicU64>,
    display: ProgressDisplay,
}

impl DocumentDirectory {
    pub fn new(api: Arc<ApiClient>, display: ProgressDisplay) -> Self {
        let (state, _) = watch::channel(DocumentsState::default());
        Self {
            api,
            state: Arc::new(state),
            upload_seq: Arc::new(AtomicU64::new(0)),
            display,
        }
    }

    pub fn snapshot(&self) -> DocumentsState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<DocumentsState> {
        self.state.subscribe()
    }

    pub fn documents(&self) -> Vec<Document> {
        self.state.borrow().documents.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.state.borrow().loading
    }

    pub fn upload_progress(&self) -> Option<UploadProgress> {
        self.state.borrow().upload_progress.clone()
    }

    pub fn get_document_by_id(&self, id: &str) -> Option<Document> {
        self.state
            .borrow()
            .documents
            .iter()
            .find(|d| d.id == id)
            .cloned()
    }

    fn set_loading(&self, loading: bool) {
        self.state.send_if_modified(|s| {
            if s.loading == loading {
                return false;
            }
            s.loading = loading;
            true
        });
    }

    fn replace_documents(&self, documents: Vec<Document>) {
        self.state.send_modify(|s| s.documents = documents);
    }

    // ── Backend round trips ──

    /// Refresh the list from the backend. The loading flag is cleared on
    /// every outcome; failures go back to the caller.
    pub async fn load_documents(&self) -> Result<Vec<Document>, ApiError> {
        self.set_loading(true);
        let result = self.api.list_documents().await;
        match &result {
            Ok(documents) => {
                debug!(count = documents.len(), "loaded documents");
                self.state.send_modify(|s| {
                    s.documents = documents.clone();
                    s.loading = false;
                });
            }
            Err(_) => self.set_loading(false),
        }
        result
    }

    /// Upload a file, driving the progress state through
    /// uploading -> processing -> complete | error.
    pub async fn upload_document(&self, file: UploadFile) -> Result<Document, ApiError> {
        let seq = self.upload_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let total = file.size();
        let filename = file.filename.clone();
        self.set_progress(Some(UploadProgress::started(&filename, total)));

        let state = self.state.clone();
        let sequence = self.upload_seq.clone();
        let reporting_name = filename.clone();
        let on_progress: ProgressFn = Arc::new(move |sent, total| {
            if sequence.load(Ordering::SeqCst) != seq {
                return;
            }
            let progress = UploadProgress::transferred(&reporting_name, sent, total);
            state.send_modify(|s| s.upload_progress = Some(progress));
        });

        match self.api.upload_document(&file, Some(on_progress)).await {
            Ok(document) => {
                info!(id = %document.id, filename = %document.filename, "document uploaded");
                let added = document.clone();
                self.state.send_modify(|s| {
                    let mut documents = s.documents.clone();
                    documents.push(added);
                    s.documents = documents;
                    s.upload_progress = Some(UploadProgress::complete(&filename, total));
                });
                self.schedule_progress_clear(seq, self.display.after_complete);
                Ok(document)
            }
            Err(e) => {
                warn!(filename = %filename, error = %e, "upload failed");
                let message = e.details.clone().unwrap_or_else(|| e.message.clone());
                self.set_progress(Some(UploadProgress::failed(&filename, total, message)));
                self.schedule_progress_clear(seq, self.display.after_error);
                Err(e)
            }
        }
    }

    fn set_progress(&self, progress: Option<UploadProgress>) {
        self.state.send_modify(|s| s.upload_progress = progress);
    }

    /// Clear the progress after `delay`, unless a newer upload took over.
    fn schedule_progress_clear(&self, seq: u64, delay: Duration) {
        let state = self.state.clone();
        let sequence = self.upload_seq.clone();
        let clear = move || {
            if sequence.load(Ordering::SeqCst) == seq {
                state.send_modify(|s| s.upload_progress = None);
            }
        };
        if delay.is_zero() {
            clear();
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    tokio::time::sleep(delay).await;
                    clear();
                });
            }
            Err(_) => clear(),
        }
    }

    /// Delete on the backend, then drop it from the local list.
    pub async fn delete_document(&self, id: &str) -> Result<(), ApiError> {
        self.api.delete_document(id).await?;
        let remaining: Vec<Document> = self
            .state
            .borrow()
            .documents
            .iter()
            .filter(|d| d.id != id)
            .cloned()
            .collect();
        self.replace_documents(remaining);
        info!(id, "document deleted");
        Ok(())
    }

    /// Rename on the backend. The local list is left as is; callers reload.
    pub async fn rename_document(&self, id: &str, new_name: &str) -> Result<Document, ApiError> {
        let document = self.api.rename_document(id, new_name).await?;
        info!(id, filename = %document.filename, "document renamed");
        Ok(document)
    }

    pub async fn categories(&self) -> Result<Vec<String>, ApiError> {
        self.api.list_categories().await
    }

    /// Fetch the original file and render it as text.
    pub async fn preview_document(&self, id: &str) -> Result<DocumentPreview, ApiError> {
        let document = match self.get_document_by_id(id) {
            Some(document) => document,
            None => {
                self.load_documents().await?;
                self.get_document_by_id(id)
                    .ok_or_else(|| ApiError::from_status(404, Some(format!("Document not found: {}", id))))?
            }
        };

        let bytes = self.api.fetch_document_file(id).await?;
        let text = doc_processor::preview_text(document.file_type, &bytes)
            .map_err(|e| ApiError::from_status(500, Some(e)))?;
        Ok(DocumentPreview {
            document_id: document.id.clone(),
            url: self.api.document_file_url(&document.id),
            filename: document.filename,
            text,
        })
    }
}
