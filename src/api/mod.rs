pub mod error;
pub mod sse;

pub use error::ApiError;

use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client, Response};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::models::{Document, FileType, SourceDocumentReference};

const JSON: &str = "application/json";
const EVENT_STREAM: &str = "text/event-stream";
const UPLOAD_CHUNK_SIZE: usize = 64 * 1024;

/// Fragments of a streamed answer, in arrival order.
pub type FragmentStream = BoxStream<'static, Result<String, ApiError>>;

/// Called with (bytes sent, total bytes) while an upload body goes out.
pub type ProgressFn = Arc<dyn Fn(u64, u64) + Send + Sync>;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    question: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ChatStreamRequest<'a> {
    question: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    document_ids: Option<&'a [String]>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RenameRequest<'a> {
    new_filename: &'a str,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatResponse {
    pub answer: String,
    #[serde(default)]
    pub sources: Vec<SourceDocumentReference>,
}

/// A file ready to be sent to `POST /documents`.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub filename: String,
    pub file_type: FileType,
    pub bytes: Vec<u8>,
}

impl UploadFile {
    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// HTTP/SSE gateway to the assistant backend.
///
/// Every failure leaves this type as an [`ApiError`].
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// URL of the original file, for download or preview.
    pub fn document_file_url(&self, document_id: &str) -> String {
        self.url(&format!("/documents/{}/file", document_id))
    }

    /// Turn a response into `Ok` only for 2xx statuses.
    async fn check(resp: Response) -> Result<Response, ApiError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(ApiError::from_response_body(status.as_u16(), &body))
    }

    /// Log once at the boundary and hand the error on.
    fn report(operation: &str, err: ApiError) -> ApiError {
        error!(
            operation,
            status = err.status,
            message = %err.message,
            details = err.details.as_deref().unwrap_or(""),
            "HTTP error"
        );
        err
    }

    async fn send(&self, operation: &str, req: reqwest::RequestBuilder) -> Result<Response, ApiError> {
        let result = match req.send().await {
            Ok(resp) => Self::check(resp).await,
            Err(e) => Err(ApiError::from(e)),
        };
        result.map_err(|e| Self::report(operation, e))
    }

    async fn send_json<T: serde::de::DeserializeOwned>(
        &self,
        operation: &str,
        req: reqwest::RequestBuilder,
    ) -> Result<T, ApiError> {
        let resp = self.send(operation, req.header(ACCEPT, JSON)).await?;
        resp.json::<T>()
            .await
            .map_err(|e| Self::report(operation, ApiError::from(e)))
    }

    // ── Chat ──

    /// Ask a question and wait for the complete answer.
    pub async fn chat(&self, question: &str) -> Result<ChatResponse, ApiError> {
        let req = self
            .http
            .post(self.url("/chat"))
            .header(CONTENT_TYPE, JSON)
            .json(&ChatRequest { question });
        self.send_json("chat", req).await
    }

    /// Ask a question and receive the answer as it is generated.
    ///
    /// An empty `document_ids` searches every document.
    pub async fn chat_stream(
        &self,
        question: &str,
        document_ids: &[String],
    ) -> Result<FragmentStream, ApiError> {
        let req = self
            .http
            .post(self.url("/chat/stream"))
            .header(CONTENT_TYPE, JSON)
            .header(ACCEPT, EVENT_STREAM)
            .json(&ChatStreamRequest {
                question,
                document_ids: (!document_ids.is_empty()).then_some(document_ids),
            });
        let resp = self.send("chat_stream", req).await?;
        debug!(documents = document_ids.len(), "chat stream opened");

        let body = resp.bytes_stream();
        Ok(sse::fragments(body)
            .map_err(|e| Self::report("chat_stream", e))
            .boxed())
    }

    // ── Documents ──

    pub async fn list_documents(&self) -> Result<Vec<Document>, ApiError> {
        let req = self.http.get(self.url("/documents"));
        self.send_json("list_documents", req).await
    }

    pub async fn list_categories(&self) -> Result<Vec<String>, ApiError> {
        let req = self.http.get(self.url("/documents/categories"));
        self.send_json("list_categories", req).await
    }

    /// Upload as multipart field `file`, reporting bytes as they leave.
    pub async fn upload_document(
        &self,
        file: &UploadFile,
        on_progress: Option<ProgressFn>,
    ) -> Result<Document, ApiError> {
        let total = file.size();
        let chunks: Vec<Vec<u8>> = file
            .bytes
            .chunks(UPLOAD_CHUNK_SIZE)
            .map(<[u8]>::to_vec)
            .collect();

        let mut sent = 0u64;
        let body_stream = stream::iter(chunks).map(move |chunk| {
            sent += chunk.len() as u64;
            if let Some(report) = &on_progress {
                report(sent, total);
            }
            Ok::<_, std::io::Error>(chunk)
        });

        let part = Part::stream_with_length(Body::wrap_stream(body_stream), total)
            .file_name(file.filename.clone())
            .mime_str(file.file_type.mime_type())
            .map_err(|e| Self::report("upload_document", ApiError::from(e)))?;
        let form = Form::new().part("file", part);

        info!(filename = %file.filename, bytes = total, "uploading document");
        let req = self.http.post(self.url("/documents")).multipart(form);
        self.send_json("upload_document", req).await
    }

    pub async fn delete_document(&self, document_id: &str) -> Result<(), ApiError> {
        let req = self
            .http
            .delete(self.url(&format!("/documents/{}", document_id)));
        self.send("delete_document", req).await?;
        Ok(())
    }

    pub async fn rename_document(
        &self,
        document_id: &str,
        new_filename: &str,
    ) -> Result<Document, ApiError> {
        let req = self
            .http
            .patch(self.url(&format!("/documents/{}", document_id)))
            .header(CONTENT_TYPE, JSON)
            .json(&RenameRequest { new_filename });
        self.send_json("rename_document", req).await
    }

    /// Raw bytes of the original file.
    pub async fn fetch_document_file(&self, document_id: &str) -> Result<Vec<u8>, ApiError> {
        let req = self.http.get(self.document_file_url(document_id));
        let resp = self.send("fetch_document_file", req).await?;
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| Self::report("fetch_document_file", ApiError::from(e)))?;
        Ok(bytes.to_vec())
    }
}
