mod openai;

pub use openai::{ApiTextModel, OPENAI_API_BASE};

use anyhow::Result;
use async_trait::async_trait;

use crate::value::{Embedding, Message};

/// The hosted-model capability the pipeline depends on: one chat-completion
/// operation and one embedding operation. Narrow on purpose, so tests can
/// substitute a scripted model.
#[async_trait]
pub trait TextModel: Send + Sync {
    /// Run a chat completion over role-tagged messages and return the raw
    /// completion text.
    async fn chat(&self, messages: &[Message], temperature: f64) -> Result<String>;

    /// Embed a single text into a fixed-length vector.
    async fn embed(&self, text: &str) -> Result<Embedding>;
}
