use std::{env, path::PathBuf};

use thiserror::Error;

use crate::model::OPENAI_API_BASE;

const DEFAULT_CHAT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
const DEFAULT_INDEX_NAME: &str = "agentic-rag-kb";
const DEFAULT_TRACKING_URI: &str = "http://localhost:5000";
const DEFAULT_KB_PATH: &str = "data/sample_kb.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("configuration issues:\n{0}")]
    Invalid(String),
}

/// Process configuration, read once at startup from the environment (with
/// `.env` support via dotenvy in the binary). Only the two API keys are
/// required; everything else has a default.
#[derive(Clone, Debug)]
pub struct Config {
    pub openai_api_key: String,
    pub openai_base_url: String,
    pub chat_model: String,
    pub embedding_model: String,
    pub pinecone_api_key: String,
    pub index_name: String,
    pub tracking_uri: String,
    pub kb_path: PathBuf,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup. Split out from `from_env`
    /// so tests can feed a map instead of mutating the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let required = |key: &'static str| lookup(key).ok_or(ConfigError::Missing(key));
        let or_default =
            |key: &'static str, default: &str| lookup(key).unwrap_or_else(|| default.to_owned());

        let config = Self {
            openai_api_key: required("OPENAI_API_KEY")?,
            openai_base_url: or_default("OPENAI_BASE_URL", OPENAI_API_BASE),
            chat_model: or_default("RAGLOOP_CHAT_MODEL", DEFAULT_CHAT_MODEL),
            embedding_model: or_default("RAGLOOP_EMBEDDING_MODEL", DEFAULT_EMBEDDING_MODEL),
            pinecone_api_key: required("PINECONE_API_KEY")?,
            index_name: or_default("RAGLOOP_INDEX_NAME", DEFAULT_INDEX_NAME),
            tracking_uri: or_default("MLFLOW_TRACKING_URI", DEFAULT_TRACKING_URI),
            kb_path: PathBuf::from(or_default("RAGLOOP_KB_PATH", DEFAULT_KB_PATH)),
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject placeholder or blank credentials before any network call, so
    /// a copy-pasted template fails with an itemized message instead of a
    /// string of 401s.
    fn validate(&self) -> Result<(), ConfigError> {
        let mut issues = Vec::new();
        if is_placeholder(&self.openai_api_key) {
            issues.push("OPENAI_API_KEY is blank or a placeholder");
        }
        if is_placeholder(&self.pinecone_api_key) {
            issues.push("PINECONE_API_KEY is blank or a placeholder");
        }
        if self.index_name.trim().is_empty() {
            issues.push("RAGLOOP_INDEX_NAME is blank");
        }
        if issues.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(
                issues
                    .iter()
                    .map(|issue| format!("  - {issue}"))
                    .collect::<Vec<_>>()
                    .join("\n"),
            ))
        }
    }
}

fn is_placeholder(value: &str) -> bool {
    let v = value.trim();
    v.is_empty() || v.contains("your_") || v.contains("changeme") || v == "..."
}
