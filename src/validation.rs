//! Client-side checks run before any network call.

use crate::config::MAX_QUESTION_LENGTH;
use crate::models::FileType;

pub const MAX_FILE_SIZE_BYTES: u64 = 10 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Please enter a question.")]
    EmptyQuestion,
    #[error("Your question is too long ({length} characters). Maximum: {max} characters.")]
    QuestionTooLong { length: usize, max: usize },
    #[error("Unsupported file type. Accepted formats: PDF, TXT")]
    UnsupportedFileType,
    #[error("File is too large. Maximum size: {}", format_bytes(*.max))]
    FileTooLarge { size: u64, max: u64 },
}

/// Trimmed question text, if it is non-empty and at most `max_len` chars.
pub fn validate_question_with(text: &str, max_len: usize) -> Result<String, ValidationError> {
    let text = text.trim();
    let length = text.chars().count();
    if length == 0 {
        return Err(ValidationError::EmptyQuestion);
    }
    if length > max_len {
        return Err(ValidationError::QuestionTooLong {
            length,
            max: max_len,
        });
    }
    Ok(text.to_string())
}

pub fn validate_question(text: &str) -> Result<String, ValidationError> {
    validate_question_with(text, MAX_QUESTION_LENGTH)
}

/// Accepts PDF and TXT files up to `max_bytes`; the type is checked first.
pub fn validate_upload_with(
    filename: &str,
    size: u64,
    max_bytes: u64,
) -> Result<FileType, ValidationError> {
    let file_type = FileType::from_filename(filename).ok_or(ValidationError::UnsupportedFileType)?;
    if size > max_bytes {
        return Err(ValidationError::FileTooLarge {
            size,
            max: max_bytes,
        });
    }
    Ok(file_type)
}

pub fn validate_upload(filename: &str, size: u64) -> Result<FileType, ValidationError> {
    validate_upload_with(filename, size, MAX_FILE_SIZE_BYTES)
}

/// Human-readable size: `0 B`, `1.5 KB`, `10 MB`.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    if bytes == 0 {
        return "0 B".to_string();
    }
    let mut unit = 0;
    let mut value = bytes as f64;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    let rounded = (value * 100.0).round() / 100.0;
    format!("{} {}", rounded, UNITS[unit])
}
