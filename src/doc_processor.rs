use std::fs;
use std::path::Path;

use crate::api::UploadFile;
use crate::models::FileType;

/// Read a local file into an upload, detecting its type from the extension.
pub fn read_upload(path: &Path) -> Result<UploadFile, String> {
    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unknown")
        .to_string();
    let file_type = FileType::from_filename(&filename).ok_or_else(|| {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        format!("Unsupported file type: .{}", ext)
    })?;
    let bytes = fs::read(path).map_err(|e| e.to_string())?;
    Ok(UploadFile {
        filename,
        file_type,
        bytes,
    })
}

/// Render a document's original bytes as plain text.
pub fn preview_text(file_type: FileType, bytes: &[u8]) -> Result<String, String> {
    match file_type {
        FileType::Txt => Ok(String::from_utf8_lossy(bytes).into_owned()),
        FileType::Pdf => pdf_extract::extract_text_from_mem(bytes)
            .map(|text| text.trim().to_string())
            .map_err(|e| format!("PDF parse error: {}", e)),
    }
}

/// First `max_chars` characters of `text`, marking the cut.
pub fn excerpt(text: &str, max_chars: usize) -> String {
    let text = text.trim();
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let head: String = text.chars().take(max_chars).collect();
    format!("{}\n[...]", head.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_preview_is_lossy() {
        let text = preview_text(FileType::Txt, b"caf\xC3\xA9 \xFF").unwrap();
        assert_eq!(text, "café \u{FFFD}");
    }

    #[test]
    fn test_invalid_pdf_is_an_error() {
        let err = preview_text(FileType::Pdf, b"not a pdf").unwrap_err();
        assert!(err.starts_with("PDF parse error"));
    }

    #[test]
    fn test_excerpt() {
        assert_eq!(excerpt("  short  ", 10), "short");
        assert_eq!(excerpt("abcdef ghij", 7), "abcdef\n[...]");
    }

    #[test]
    fn test_read_upload_detects_type() {
        let dir = std::env::temp_dir().join(format!("hr-assistant-upload-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        let txt = dir.join("Policy.TXT");
        fs::write(&txt, "hello").unwrap();
        let upload = read_upload(&txt).unwrap();
        assert_eq!(upload.file_type, FileType::Txt);
        assert_eq!(upload.filename, "Policy.TXT");
        assert_eq!(upload.size(), 5);

        let jpg = dir.join("photo.jpg");
        fs::write(&jpg, [0u8; 4]).unwrap();
        assert_eq!(read_upload(&jpg).unwrap_err(), "Unsupported file type: .jpg");
        let _ = fs::remove_dir_all(&dir);
    }
}
