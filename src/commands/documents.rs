use std::collections::BTreeSet;
use std::path::Path;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::doc_processor;
use crate::documents::{DocumentDirectory, DocumentsState};
use crate::error::AppError;
use crate::models::{Document, DocumentStatus, FileType, UploadProgress, UploadStatus};
use crate::validation::{format_bytes, validate_upload_with, ValidationError};

// ── Document selector ──

/// Which indexed documents a question should be answered from.
///
/// Selections are reported as document ids; an empty list means every
/// document, which is also what "all selected" collapses to.
#[derive(Debug, Default, Clone)]
pub struct DocumentSelector {
    indexed: Vec<String>,
    selected: BTreeSet<String>,
    initial_selection_done: bool,
}

impl DocumentSelector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a new document list. Returns the selection to report when it
    /// changed: on first load everything is selected.
    pub fn sync(&mut self, documents: &[Document]) -> Option<Vec<String>> {
        self.indexed = documents
            .iter()
            .filter(|d| d.status == DocumentStatus::Indexed)
            .map(|d| d.id.clone())
            .collect();

        if !self.initial_selection_done && !self.indexed.is_empty() {
            self.selected = self.indexed.iter().cloned().collect();
            self.initial_selection_done = true;
            debug!(count = self.indexed.len(), "selected all documents");
            return Some(self.selection());
        }

        let before = self.selected.len();
        let indexed = &self.indexed;
        self.selected.retain(|id| indexed.contains(id));
        (self.selected.len() != before).then(|| self.selection())
    }

    pub fn is_selected(&self, id: &str) -> bool {
        self.selected.contains(id)
    }

    pub fn selected_ids(&self) -> Vec<String> {
        self.selected.iter().cloned().collect()
    }

    pub fn all_selected(&self) -> bool {
        !self.indexed.is_empty() && self.selected.len() == self.indexed.len()
    }

    /// Ids to send with a question.
    pub fn selection(&self) -> Vec<String> {
        if self.selected.is_empty() || self.selected.len() == self.indexed.len() {
            Vec::new()
        } else {
            self.selected_ids()
        }
    }

    pub fn toggle(&mut self, id: &str) -> Vec<String> {
        if !self.selected.remove(id) && self.indexed.iter().any(|i| i == id) {
            self.selected.insert(id.to_string());
        }
        self.selection()
    }

    pub fn select_all(&mut self) -> Vec<String> {
        self.selected = self.indexed.iter().cloned().collect();
        self.selection()
    }

    pub fn clear_all(&mut self) -> Vec<String> {
        self.selected.clear();
        self.selection()
    }

    pub fn toggle_all(&mut self) -> Vec<String> {
        if self.all_selected() {
            self.clear_all()
        } else {
            self.select_all()
        }
    }

    pub fn summary(&self) -> String {
        let total = self.indexed.len();
        let selected = self.selected.len();
        if total == 0 {
            "No documents available".to_string()
        } else if selected == 0 || selected == total {
            format!("All documents ({})", total)
        } else {
            format!("{} of {} documents", selected, total)
        }
    }
}

// ── Upload form ──

/// Check a local file, then hand it to the directory.
///
/// Type and size are validated before the file is read or anything is sent.
pub async fn upload_path(
    directory: &DocumentDirectory,
    path: &Path,
    max_bytes: u64,
) -> Result<Document, AppError> {
    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| AppError::Upload(format!("Invalid file name: {}", path.display())))?;
    let size = tokio::fs::metadata(path).await?.len();
    check_upload(filename, size, max_bytes)?;

    let file = doc_processor::read_upload(path).map_err(AppError::Upload)?;
    info!(filename = %file.filename, size = file.size(), "uploading document");
    Ok(directory.upload_document(file).await?)
}

pub fn check_upload(filename: &str, size: u64, max_bytes: u64) -> Result<FileType, ValidationError> {
    validate_upload_with(filename, size, max_bytes)
}

/// Emit a line for each distinct progress step until the upload completes
/// or fails. The final step is always emitted.
pub async fn follow_upload(mut progress: watch::Receiver<DocumentsState>, mut emit: impl FnMut(String)) {
    let mut last = String::new();
    while progress.changed().await.is_ok() {
        let current = progress.borrow_and_update().upload_progress.clone();
        let Some(current) = current else { continue };
        let line = progress_line(&current);
        if line != last {
            emit(line.clone());
            last = line;
        }
        if matches!(current.status, UploadStatus::Complete | UploadStatus::Error) {
            break;
        }
    }
}

// ── Rendering ──

pub fn status_label(status: DocumentStatus) -> &'static str {
    match status {
        DocumentStatus::Pending => "Processing",
        DocumentStatus::Indexed => "Indexed",
        DocumentStatus::Failed => "Failed",
    }
}

/// One line of the document table.
pub fn document_row(document: &Document) -> String {
    let mut row = format!(
        "{:<38} {:<40} {:<4} {:>10}  {:<10} {}",
        document.id,
        document.filename,
        document.file_type.as_str(),
        format_bytes(document.file_size_bytes),
        status_label(document.status),
        document.upload_timestamp.format("%Y-%m-%d %H:%M"),
    );
    if let Some(category) = &document.category {
        row.push_str(&format!("  [{}]", category));
    }
    if let Some(reason) = &document.failure_reason {
        row.push_str(&format!("  ({})", reason));
    }
    row
}

pub fn progress_line(progress: &UploadProgress) -> String {
    match progress.status {
        UploadStatus::Uploading => format!(
            "Uploading {}: {}% ({} / {})",
            progress.filename,
            progress.percent_complete,
            format_bytes(progress.bytes_transferred),
            format_bytes(progress.total_bytes),
        ),
        UploadStatus::Processing => format!("Processing {}...", progress.filename),
        UploadStatus::Complete => format!("Uploaded {}", progress.filename),
        UploadStatus::Error => format!(
            "Upload of {} failed: {}",
            progress.filename,
            progress.error_message.as_deref().unwrap_or("unknown error"),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn doc(id: &str, status: DocumentStatus) -> Document {
        Document {
            id: id.to_string(),
            filename: format!("{}.pdf", id),
            file_type: FileType::Pdf,
            file_size_bytes: 2048,
            status,
            upload_timestamp: Utc::now(),
            failure_reason: None,
            category: None,
            chunk_count: None,
        }
    }

    fn three_indexed() -> Vec<Document> {
        vec![
            doc("a", DocumentStatus::Indexed),
            doc("b", DocumentStatus::Indexed),
            doc("c", DocumentStatus::Indexed),
            doc("p", DocumentStatus::Pending),
        ]
    }

    #[test]
    fn test_first_load_selects_everything_once() {
        let mut selector = DocumentSelector::new();
        assert_eq!(selector.sync(&[]), None);
        assert_eq!(selector.summary(), "No documents available");

        assert_eq!(selector.sync(&three_indexed()), Some(vec![]));
        assert!(selector.all_selected());
        assert_eq!(selector.summary(), "All documents (3)");

        selector.clear_all();
        assert_eq!(selector.sync(&three_indexed()), None);
        assert!(!selector.is_selected("a"));
    }

    #[test]
    fn test_all_or_none_selected_means_all_documents() {
        let mut selector = DocumentSelector::new();
        selector.sync(&three_indexed());

        assert_eq!(selector.toggle("b"), vec!["a".to_string(), "c".to_string()]);
        assert_eq!(selector.summary(), "2 of 3 documents");
        assert_eq!(selector.toggle("b"), Vec::<String>::new());

        assert_eq!(selector.clear_all(), Vec::<String>::new());
        assert_eq!(selector.summary(), "All documents (3)");
        assert_eq!(selector.toggle("c"), vec!["c".to_string()]);
        assert_eq!(selector.summary(), "1 of 3 documents");
    }

    #[test]
    fn test_toggle_all_flips_between_all_and_none() {
        let mut selector = DocumentSelector::new();
        selector.sync(&three_indexed());
        selector.toggle_all();
        assert!(selector.selected_ids().is_empty());
        selector.toggle_all();
        assert_eq!(selector.selected_ids().len(), 3);
    }

    #[test]
    fn test_non_indexed_documents_cannot_be_selected() {
        let mut selector = DocumentSelector::new();
        selector.sync(&three_indexed());
        selector.clear_all();
        assert_eq!(selector.toggle("p"), Vec::<String>::new());
        assert!(!selector.is_selected("p"));
    }

    #[test]
    fn test_removed_documents_leave_the_selection() {
        let mut selector = DocumentSelector::new();
        selector.sync(&three_indexed());
        selector.toggle("b");
        let remaining = vec![doc("b", DocumentStatus::Indexed), doc("c", DocumentStatus::Indexed)];
        assert_eq!(selector.sync(&remaining), Some(vec!["c".to_string()]));
        assert_eq!(selector.summary(), "1 of 2 documents");
    }

    #[test]
    fn test_check_upload_rejects_before_network() {
        assert_eq!(check_upload("a.pdf", 10_485_760, 10_485_760), Ok(FileType::Pdf));
        assert!(check_upload("a.pdf", 10_485_761, 10_485_760).is_err());
        assert_eq!(
            check_upload("a.docx", 1, 10_485_760),
            Err(ValidationError::UnsupportedFileType)
        );
    }

    #[tokio::test]
    async fn test_upload_path_validates_without_contacting_backend() {
        use crate::api::ApiClient;
        use crate::documents::ProgressDisplay;
        use std::sync::Arc;

        let dir = std::env::temp_dir().join(format!("hr-assistant-form-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let big = dir.join("big.txt");
        std::fs::write(&big, vec![b'x'; 2048]).unwrap();

        let directory = DocumentDirectory::new(
            Arc::new(ApiClient::new("http://127.0.0.1:9/api")),
            ProgressDisplay::default(),
        );
        let err = upload_path(&directory, &big, 1024).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(ValidationError::FileTooLarge { .. })));
        assert!(directory.upload_progress().is_none());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_follow_upload_ends_with_final_step() {
        use crate::api::{ApiClient, UploadFile};
        use crate::documents::ProgressDisplay;
        use crate::test_support::{document_json, spawn_backend};
        use axum::extract::Multipart;
        use axum::routing::post;
        use axum::{Json, Router};
        use std::sync::{Arc, Mutex};

        let app = Router::new().route(
            "/api/documents",
            post(|mut form: Multipart| async move {
                while form.next_field().await.unwrap().is_some() {}
                Json(document_json("d9", "leave.txt", "PENDING", 3))
            }),
        );
        let base = spawn_backend(app).await;
        let directory = DocumentDirectory::new(Arc::new(ApiClient::new(&base)), ProgressDisplay::default());

        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink = lines.clone();
        let reporter = tokio::spawn(follow_upload(directory.subscribe(), move |line| {
            sink.lock().unwrap().push(line)
        }));
        directory
            .upload_document(UploadFile {
                filename: "leave.txt".to_string(),
                file_type: FileType::Txt,
                bytes: b"25j".to_vec(),
            })
            .await
            .unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(5), reporter)
            .await
            .unwrap()
            .unwrap();

        let lines = lines.lock().unwrap();
        assert_eq!(lines.last().map(String::as_str), Some("Uploaded leave.txt"));
    }

    #[test]
    fn test_rendering() {
        let mut failed = doc("f", DocumentStatus::Failed);
        failed.failure_reason = Some("no text".to_string());
        let row = document_row(&failed);
        assert!(row.contains("f.pdf"));
        assert!(row.contains("2 KB"));
        assert!(row.contains("Failed"));
        assert!(row.ends_with("(no text)"));

        let progress = UploadProgress::transferred("a.pdf", 512, 1024);
        assert_eq!(progress_line(&progress), "Uploading a.pdf: 50% (512 B / 1 KB)");
        let failed = UploadProgress::failed("a.pdf", 1024, "too big".to_string());
        assert_eq!(progress_line(&failed), "Upload of a.pdf failed: too big");
    }
}
