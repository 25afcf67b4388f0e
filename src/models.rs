use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// Title given to a conversation until its first message arrives.
pub const DEFAULT_CONVERSATION_TITLE: &str = "New conversation";

/// Titles derived from the first question are cut to this many characters.
pub const TITLE_MAX_CHARS: usize = 50;

// ── Chat ──

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Question {
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl Question {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

/// A document the backend used to ground an answer.
///
/// The backend sends either `{documentName, excerpt}` objects or bare
/// document names; both forms deserialize.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase", from = "RawSource")]
pub struct SourceDocumentReference {
    pub document_name: String,
    pub excerpt: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawSource {
    Name(String),
    #[serde(rename_all = "camelCase")]
    Full {
        document_name: String,
        #[serde(default)]
        excerpt: String,
    },
}

impl From<RawSource> for SourceDocumentReference {
    fn from(raw: RawSource) -> Self {
        match raw {
            RawSource::Name(document_name) => Self {
                document_name,
                excerpt: String::new(),
            },
            RawSource::Full {
                document_name,
                excerpt,
            } => Self {
                document_name,
                excerpt,
            },
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Answer {
    pub content: String,
    #[serde(default)]
    pub sources: Vec<SourceDocumentReference>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub is_streaming: bool,
}

impl Answer {
    /// A finished answer, as stored in history.
    pub fn complete(content: impl Into<String>, sources: Vec<SourceDocumentReference>) -> Self {
        Self {
            content: content.into(),
            sources,
            timestamp: Utc::now(),
            is_streaming: false,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ConversationMessage {
    pub id: Uuid,
    pub question: Question,
    pub answer: Answer,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: Uuid,
    pub title: String,
    pub messages: Vec<ConversationMessage>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            title: DEFAULT_CONVERSATION_TITLE.to_string(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}

/// Derive a sidebar title from the first question of a conversation.
pub fn title_from_question(text: &str) -> String {
    let text = text.trim();
    if text.chars().count() > TITLE_MAX_CHARS {
        let head: String = text.chars().take(TITLE_MAX_CHARS).collect();
        format!("{}...", head)
    } else {
        text.to_string()
    }
}

// ── Documents ──

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    #[serde(rename = "PDF", alias = "pdf")]
    Pdf,
    #[serde(rename = "TXT", alias = "txt")]
    Txt,
}

impl FileType {
    /// Detect the type from a file name's extension (case-insensitive).
    pub fn from_filename(filename: &str) -> Option<Self> {
        let ext = std::path::Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();
        match ext.as_str() {
            "pdf" => Some(FileType::Pdf),
            "txt" => Some(FileType::Txt),
            _ => None,
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            FileType::Pdf => "application/pdf",
            FileType::Txt => "text/plain",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FileType::Pdf => "PDF",
            FileType::Txt => "TXT",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum DocumentStatus {
    #[serde(rename = "pending", alias = "PENDING")]
    Pending,
    #[serde(rename = "indexed", alias = "INDEXED")]
    Indexed,
    #[serde(rename = "failed", alias = "FAILED")]
    Failed,
}

impl DocumentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DocumentStatus::Pending => "pending",
            DocumentStatus::Indexed => "indexed",
            DocumentStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: String,
    pub filename: String,
    #[serde(alias = "type")]
    pub file_type: FileType,
    #[serde(alias = "size", default)]
    pub file_size_bytes: u64,
    pub status: DocumentStatus,
    #[serde(alias = "uploadedAt", deserialize_with = "lenient_timestamp")]
    pub upload_timestamp: DateTime<Utc>,
    #[serde(alias = "errorMessage", default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_count: Option<u32>,
}

/// Accepts RFC 3339 timestamps as well as zone-less local date-times,
/// which the backend emits for its `LocalDateTime` fields.
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    if let Ok(ts) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(serde::de::Error::custom)
}

// ── Uploads ──

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    Uploading,
    Processing,
    Complete,
    Error,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UploadProgress {
    pub filename: String,
    pub percent_complete: u8,
    pub status: UploadStatus,
    pub bytes_transferred: u64,
    pub total_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl UploadProgress {
    pub fn started(filename: &str, total_bytes: u64) -> Self {
        Self {
            filename: filename.to_string(),
            percent_complete: 0,
            status: UploadStatus::Uploading,
            bytes_transferred: 0,
            total_bytes,
            error_message: None,
        }
    }

    /// Progress after `sent` bytes went out; switches to processing once the
    /// whole body is on the wire.
    pub fn transferred(filename: &str, sent: u64, total_bytes: u64) -> Self {
        let percent = if total_bytes == 0 {
            100
        } else {
            ((sent.min(total_bytes) * 100) / total_bytes) as u8
        };
        Self {
            filename: filename.to_string(),
            percent_complete: percent,
            status: if sent >= total_bytes {
                UploadStatus::Processing
            } else {
                UploadStatus::Uploading
            },
            bytes_transferred: sent.min(total_bytes),
            total_bytes,
            error_message: None,
        }
    }

    pub fn complete(filename: &str, total_bytes: u64) -> Self {
        Self {
            filename: filename.to_string(),
            percent_complete: 100,
            status: UploadStatus::Complete,
            bytes_transferred: total_bytes,
            total_bytes,
            error_message: None,
        }
    }

    pub fn failed(filename: &str, total_bytes: u64, message: String) -> Self {
        Self {
            filename: filename.to_string(),
            percent_complete: 0,
            status: UploadStatus::Error,
            bytes_transferred: 0,
            total_bytes,
            error_message: Some(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_title_truncates_long_questions() {
        let long = "x".repeat(60);
        let title = title_from_question(&long);
        assert_eq!(title, format!("{}...", "x".repeat(50)));
        assert_eq!(title_from_question("  Short one  "), "Short one");
        assert_eq!(title_from_question(&"y".repeat(50)), "y".repeat(50));
    }

    #[test]
    fn test_document_accepts_backend_field_names() {
        let json = r#"{
            "id": "abc-123",
            "filename": "conges.pdf",
            "type": "PDF",
            "status": "INDEXED",
            "size": 45000,
            "chunkCount": 12,
            "uploadedAt": "2026-01-21T17:30:00"
        }"#;
        let doc: Document = serde_json::from_str(json).unwrap();
        assert_eq!(doc.file_type, FileType::Pdf);
        assert_eq!(doc.status, DocumentStatus::Indexed);
        assert_eq!(doc.file_size_bytes, 45000);
        assert_eq!(doc.chunk_count, Some(12));
        assert_eq!(doc.upload_timestamp.to_rfc3339(), "2026-01-21T17:30:00+00:00");
    }

    #[test]
    fn test_document_accepts_client_field_names() {
        let json = r#"{
            "id": "d1",
            "filename": "notes.txt",
            "fileType": "TXT",
            "fileSizeBytes": 12,
            "status": "failed",
            "uploadTimestamp": "2026-01-21T17:30:00Z",
            "failureReason": "empty file"
        }"#;
        let doc: Document = serde_json::from_str(json).unwrap();
        assert_eq!(doc.file_type, FileType::Txt);
        assert_eq!(doc.status, DocumentStatus::Failed);
        assert_eq!(doc.failure_reason.as_deref(), Some("empty file"));
    }

    #[test]
    fn test_sources_accept_names_and_objects() {
        let json = r#"["conges.pdf", {"documentName": "reglement.pdf", "excerpt": "Article 3"}]"#;
        let sources: Vec<SourceDocumentReference> = serde_json::from_str(json).unwrap();
        assert_eq!(sources[0].document_name, "conges.pdf");
        assert_eq!(sources[0].excerpt, "");
        assert_eq!(sources[1].excerpt, "Article 3");
    }

    #[test]
    fn test_file_type_from_filename() {
        assert_eq!(FileType::from_filename("Policy.PDF"), Some(FileType::Pdf));
        assert_eq!(FileType::from_filename("notes.txt"), Some(FileType::Txt));
        assert_eq!(FileType::from_filename("photo.jpg"), None);
        assert_eq!(FileType::from_filename("README"), None);
    }

    #[test]
    fn test_transferred_progress_switches_to_processing() {
        let p = UploadProgress::transferred("a.pdf", 50, 200);
        assert_eq!(p.status, UploadStatus::Uploading);
        assert_eq!(p.percent_complete, 25);
        let p = UploadProgress::transferred("a.pdf", 200, 200);
        assert_eq!(p.status, UploadStatus::Processing);
        assert_eq!(p.percent_complete, 100);
    }
}
