// argo/crates/argo/src/config.rs

use anyhow::{Context, Result};
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct Config {
    pub api_host: String,
    pub api_port: u16,
    pub database_path: PathBuf,
    pub vector_db_path: PathBuf,
    pub chat_db_path: PathBuf,
    pub legacy_unread_state_path: PathBuf,
    pub openai_base_url: String,
    pub openai_api_key: Option<String>,
    pub chat_model: String,
    pub embedding_model: String,
    pub request_timeout_seconds: u64,
    pub import_batch_size: usize,
    pub unread_poll_interval_seconds: u64,
    pub analysis_max_messages: usize,
    pub contacts_page_size: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        if let Err(e) = dotenvy::dotenv() {
            warn!("Failed to load .env file: {}. Using system environment variables.", e);
        } else {
            info!("Loaded environment variables from .env file");
        }

        let import_batch_size: usize = parse_var("IMPORT_BATCH_SIZE", "128")?;
        if import_batch_size == 0 {
            return Err(anyhow::anyhow!("IMPORT_BATCH_SIZE must be greater than zero"));
        }

        let unread_poll_interval_seconds: u64 = parse_var("UNREAD_POLL_INTERVAL_SECONDS", "5")?;
        if unread_poll_interval_seconds == 0 {
            return Err(anyhow::anyhow!("UNREAD_POLL_INTERVAL_SECONDS must be greater than zero"));
        }

        Ok(Self {
            api_host: env::var("API_HOST").unwrap_or_else(|_| "127.0.0.1".into()),
            api_port: parse_var("API_PORT", "8000")?,
            database_path: PathBuf::from(
                env::var("DATABASE_PATH").unwrap_or_else(|_| "./data/argo.db".into()),
            ),
            vector_db_path: PathBuf::from(
                env::var("VECTOR_DB_PATH").unwrap_or_else(|_| "./data/vectors.db".into()),
            ),
            chat_db_path: env::var("CHAT_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| Self::default_chat_db_path()),
            legacy_unread_state_path: PathBuf::from(
                env::var("LEGACY_UNREAD_STATE_PATH")
                    .unwrap_or_else(|_| "./data/unread_state.json".into()),
            ),
            openai_base_url: env::var("OPENAI_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".into())
                .trim_end_matches('/')
                .to_string(),
            openai_api_key: env::var("OPENAI_API_KEY").ok().filter(|k| !k.trim().is_empty()),
            chat_model: env::var("CHAT_MODEL").unwrap_or_else(|_| "gpt-4o-mini".into()),
            embedding_model: env::var("EMBEDDING_MODEL")
                .unwrap_or_else(|_| "text-embedding-3-small".into()),
            request_timeout_seconds: parse_var("REQUEST_TIMEOUT_SECONDS", "90")?,
            import_batch_size,
            unread_poll_interval_seconds,
            analysis_max_messages: parse_var("ANALYSIS_MAX_MESSAGES", "80")?,
            contacts_page_size: parse_var("CONTACTS_PAGE_SIZE", "100")?,
        })
    }

    /// `~/Desktop/chat.db`, the location the message export is expected at.
    fn default_chat_db_path() -> PathBuf {
        env::var("HOME")
            .map(|home| PathBuf::from(home).join("Desktop").join("chat.db"))
            .unwrap_or_else(|_| PathBuf::from("chat.db"))
    }

    pub fn print_config(&self) {
        info!("Current Configuration:");
        info!("- API: {}:{}", self.api_host, self.api_port);
        info!("- Database: {}", self.database_path.display());
        info!("- Vector store: {}", self.vector_db_path.display());
        info!("- Message source: {}", self.chat_db_path.display());
        info!("- Provider URL: {}", self.openai_base_url);
        info!("- API key configured: {}", self.openai_api_key.is_some());
        info!("- Chat model: {}", self.chat_model);
        info!("- Embedding model: {}", self.embedding_model);
        info!("- Request timeout: {}s", self.request_timeout_seconds);
        info!("- Import batch size: {}", self.import_batch_size);
        info!("- Unread poll interval: {}s", self.unread_poll_interval_seconds);
    }

    pub fn api_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.api_host, self.api_port)
            .parse()
            .with_context(|| format!("invalid API address {}:{}", self.api_host, self.api_port))
    }
}

fn parse_var<T>(name: &str, default: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw = env::var(name).unwrap_or_else(|_| default.into());
    raw.trim()
        .parse()
        .with_context(|| format!("{} has an invalid value: {:?}", name, raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_config() -> Config {
        Config {
            api_host: "127.0.0.1".to_string(),
            api_port: 8000,
            database_path: PathBuf::from("./data/argo.db"),
            vector_db_path: PathBuf::from("./data/vectors.db"),
            chat_db_path: PathBuf::from("/tmp/chat.db"),
            legacy_unread_state_path: PathBuf::from("./data/unread_state.json"),
            openai_base_url: "http://127.0.0.1:9999/v1".to_string(),
            openai_api_key: None,
            chat_model: "gpt-4o-mini".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            request_timeout_seconds: 90,
            import_batch_size: 128,
            unread_poll_interval_seconds: 5,
            analysis_max_messages: 80,
            contacts_page_size: 100,
        }
    }

    #[test]
    fn test_api_addr_parsing() {
        let config = create_test_config();
        let addr = config.api_addr().unwrap();

        assert_eq!(addr.ip().to_string(), "127.0.0.1");
        assert_eq!(addr.port(), 8000);
    }

    #[test]
    fn test_api_addr_with_zero_address() {
        let mut config = create_test_config();
        config.api_host = "0.0.0.0".to_string();
        config.api_port = 5000;

        let addr = config.api_addr().unwrap();
        assert_eq!(addr.port(), 5000);
        assert_eq!(addr.ip().to_string(), "0.0.0.0");
    }

    #[test]
    fn test_api_addr_rejects_hostnames() {
        let mut config = create_test_config();
        config.api_host = "not an address".to_string();
        assert!(config.api_addr().is_err());
    }

    #[test]
    fn test_parse_var_uses_default() {
        let value: usize = parse_var("ARGO_TEST_UNSET_VARIABLE_XYZ", "42").unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn test_parse_var_rejects_garbage_default() {
        let value: anyhow::Result<u16> = parse_var("ARGO_TEST_UNSET_VARIABLE_XYZ", "eighty");
        assert!(value.is_err());
    }

    #[test]
    fn test_config_clone() {
        let config1 = create_test_config();
        let config2 = config1.clone();

        assert_eq!(config1.api_host, config2.api_host);
        assert_eq!(config1.import_batch_size, config2.import_batch_size);
        assert_eq!(config1.chat_db_path, config2.chat_db_path);
    }
}
