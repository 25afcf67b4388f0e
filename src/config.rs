use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

use crate::storage::DEFAULT_PREFIX;

pub const DEFAULT_API_URL: &str = "http://localhost:8080/api";
pub const DEFAULT_DATA_DIR: &str = ".hr-assistant";
pub const DEFAULT_MAX_MESSAGES: usize = 50;
pub const DEFAULT_MAX_FILE_SIZE_MB: u64 = 10;
pub const MAX_QUESTION_LENGTH: usize = 1000;

const BYTES_PER_MB: u64 = 1024 * 1024;

const ENV_API_URL: &str = "HR_ASSISTANT_API_URL";
const ENV_STORAGE_PREFIX: &str = "HR_ASSISTANT_STORAGE_PREFIX";
const ENV_DATA_DIR: &str = "HR_ASSISTANT_DATA_DIR";
const ENV_MAX_MESSAGES: &str = "HR_ASSISTANT_MAX_MESSAGES";
const ENV_MAX_FILE_SIZE_MB: &str = "HR_ASSISTANT_MAX_FILE_SIZE_MB";

/// Every environment key the client reads.
pub const ENV_KEYS: &[&str] = &[
    ENV_API_URL,
    ENV_STORAGE_PREFIX,
    ENV_DATA_DIR,
    ENV_MAX_MESSAGES,
    ENV_MAX_FILE_SIZE_MB,
];

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub api_url: String,
    pub storage_prefix: String,
    pub data_dir: PathBuf,
    pub max_conversation_messages: usize,
    pub max_file_size_mb: u64,
    pub max_question_length: usize,
    /// How long a finished upload stays visible.
    #[serde(with = "millis")]
    pub upload_complete_display: Duration,
    /// How long a failed upload stays visible.
    #[serde(with = "millis")]
    pub upload_error_display: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            storage_prefix: DEFAULT_PREFIX.to_string(),
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            max_conversation_messages: DEFAULT_MAX_MESSAGES,
            max_file_size_mb: DEFAULT_MAX_FILE_SIZE_MB,
            max_question_length: MAX_QUESTION_LENGTH,
            upload_complete_display: Duration::from_secs(2),
            upload_error_display: Duration::from_secs(5),
        }
    }
}

impl AppConfig {
    /// Defaults overridden by the process environment (and `.env`, if present).
    pub fn from_env() -> Self {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                warn!(error = %e, "ignoring unreadable .env file");
            }
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unparsable numbers keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(url) = lookup(ENV_API_URL).filter(|v| !v.trim().is_empty()) {
            config.api_url = url.trim().trim_end_matches('/').to_string();
        }
        if let Some(prefix) = lookup(ENV_STORAGE_PREFIX).filter(|v| !v.is_empty()) {
            config.storage_prefix = prefix;
        }
        if let Some(dir) = lookup(ENV_DATA_DIR).filter(|v| !v.trim().is_empty()) {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(max) = parse_positive(ENV_MAX_MESSAGES, lookup(ENV_MAX_MESSAGES)) {
            config.max_conversation_messages = max as usize;
        }
        if let Some(max) = parse_positive(ENV_MAX_FILE_SIZE_MB, lookup(ENV_MAX_FILE_SIZE_MB)) {
            if max <= u64::MAX / BYTES_PER_MB {
                config.max_file_size_mb = max;
            } else {
                warn!(key = ENV_MAX_FILE_SIZE_MB, value = max, "size limit out of range, using default");
            }
        }

        config
    }

    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb.saturating_mul(BYTES_PER_MB)
    }
}

fn parse_positive(key: &str, raw: Option<String>) -> Option<u64> {
    let raw = raw?;
    match raw.trim().parse::<u64>() {
        Ok(v) if v > 0 => Some(v),
        _ => {
            warn!(key, value = %raw, "invalid value, using default");
            None
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::from_lookup(|_| None);
        assert_eq!(config.api_url, DEFAULT_API_URL);
        assert_eq!(config.storage_prefix, "hr-assistant-");
        assert_eq!(config.max_conversation_messages, 50);
        assert_eq!(config.max_file_size_bytes(), 10_485_760);
    }

    #[test]
    fn test_overrides() {
        let config = AppConfig::from_lookup(lookup(&[
            ("HR_ASSISTANT_API_URL", "https://hr.example.com/api/"),
            ("HR_ASSISTANT_MAX_MESSAGES", "20"),
            ("HR_ASSISTANT_STORAGE_PREFIX", "test-"),
        ]));
        assert_eq!(config.api_url, "https://hr.example.com/api");
        assert_eq!(config.max_conversation_messages, 20);
        assert_eq!(config.storage_prefix, "test-");
    }

    #[test]
    fn test_invalid_numbers_keep_defaults() {
        let config = AppConfig::from_lookup(lookup(&[
            ("HR_ASSISTANT_MAX_MESSAGES", "0"),
            ("HR_ASSISTANT_MAX_FILE_SIZE_MB", "lots"),
        ]));
        assert_eq!(config.max_conversation_messages, DEFAULT_MAX_MESSAGES);
        assert_eq!(config.max_file_size_mb, DEFAULT_MAX_FILE_SIZE_MB);
    }

    #[test]
    fn test_oversized_file_limit_keeps_default() {
        let config = AppConfig::from_lookup(lookup(&[(
            "HR_ASSISTANT_MAX_FILE_SIZE_MB",
            "99999999999999",
        )]));
        assert_eq!(config.max_file_size_mb, DEFAULT_MAX_FILE_SIZE_MB);
        assert_eq!(config.max_file_size_bytes(), 10_485_760);

        let largest = (u64::MAX / (1024 * 1024)).to_string();
        let config = AppConfig::from_lookup(lookup(&[("HR_ASSISTANT_MAX_FILE_SIZE_MB", largest.as_str())]));
        assert_eq!(config.max_file_size_bytes(), (u64::MAX / (1024 * 1024)) * 1024 * 1024);

        let config = AppConfig {
            max_file_size_mb: u64::MAX,
            ..AppConfig::default()
        };
        assert_eq!(config.max_file_size_bytes(), u64::MAX);
    }
}
