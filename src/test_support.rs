//! In-process backend used by the HTTP tests.

use axum::Router;
use serde_json::{json, Value};

/// Serve `app` on an ephemeral port and return its `/api` base URL.
pub async fn spawn_backend(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}/api", addr)
}

/// A document as the backend serializes it.
pub fn document_json(id: &str, filename: &str, status: &str, size: u64) -> Value {
    let kind = if filename.to_lowercase().ends_with(".pdf") {
        "PDF"
    } else {
        "TXT"
    };
    json!({
        "id": id,
        "filename": filename,
        "type": kind,
        "status": status,
        "size": size,
        "uploadedAt": "2026-01-21T17:30:00"
    })
}
