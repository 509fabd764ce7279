use anyhow::{Context, Result};
use async_trait::async_trait;

use super::TextModel;
use crate::value::{Embedding, Message};

pub const OPENAI_API_BASE: &str = "https://api.openai.com/v1";

/// OpenAI-compatible chat + embeddings client. Works against api.openai.com
/// or any endpoint speaking the same wire format (Azure OpenAI deployments,
/// local gateways) via `with_base_url`.
#[derive(Clone, Debug)]
pub struct ApiTextModel {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    chat_model: String,
    embedding_model: String,
}

impl ApiTextModel {
    pub fn new(
        api_key: impl Into<String>,
        chat_model: impl Into<String>,
        embedding_model: impl Into<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: OPENAI_API_BASE.to_owned(),
            chat_model: chat_model.into(),
            embedding_model: embedding_model.into(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn post(&self, path: &str, body: serde_json::Value) -> Result<serde_json::Value> {
        let resp = self
            .http
            .post(self.endpoint(path))
            .bearer_auth(&self.api_key)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .json(&body)
            .send()
            .await
            .with_context(|| format!("request to {path} failed"))?
            .error_for_status()
            .with_context(|| format!("{path} returned an error status"))?
            .json::<serde_json::Value>()
            .await
            .with_context(|| format!("{path} returned a malformed body"))?;
        Ok(resp)
    }
}

fn extract_chat_content(response: &serde_json::Value) -> Result<String> {
    let content = response
        .pointer("/choices/0/message/content")
        .and_then(|v| v.as_str())
        .context("chat completion response carries no message content")?;
    Ok(content.to_owned())
}

fn extract_embedding(response: &serde_json::Value) -> Result<Embedding> {
    let values = response
        .pointer("/data/0/embedding")
        .and_then(|v| v.as_array())
        .context("embeddings response carries no embedding vector")?;
    values
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .context("embedding vector contains a non-numeric component")
        })
        .collect()
}

#[async_trait]
impl TextModel for ApiTextModel {
    async fn chat(&self, messages: &[Message], temperature: f64) -> Result<String> {
        let body = serde_json::json!({
            "model": self.chat_model,
            "messages": messages,
            "temperature": temperature,
        });
        let response = self.post("chat/completions", body).await?;
        extract_chat_content(&response)
    }

    async fn embed(&self, text: &str) -> Result<Embedding> {
        let body = serde_json::json!({
            "model": self.embedding_model,
            "input": [text],
        });
        let response = self.post("embeddings", body).await?;
        extract_embedding(&response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Role;

    #[test]
    fn chat_content_is_extracted_from_first_choice() {
        let response = serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": "Use TTLs. [KB001]" } }]
        });
        assert_eq!(extract_chat_content(&response).unwrap(), "Use TTLs. [KB001]");
    }

    #[test]
    fn missing_content_is_an_error() {
        let response = serde_json::json!({ "choices": [] });
        assert!(extract_chat_content(&response).is_err());
    }

    #[test]
    fn embedding_vector_is_extracted() {
        let response = serde_json::json!({
            "data": [{ "embedding": [0.25, -0.5, 1.0] }]
        });
        assert_eq!(extract_embedding(&response).unwrap(), vec![0.25, -0.5, 1.0]);
    }

    #[test]
    fn non_numeric_embedding_component_is_an_error() {
        let response = serde_json::json!({
            "data": [{ "embedding": [0.25, "oops"] }]
        });
        assert!(extract_embedding(&response).is_err());
    }

    #[test]
    fn messages_serialize_with_lowercase_roles() {
        let body = serde_json::json!({
            "messages": [Message::new(Role::System, "be brief")],
        });
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][0]["content"], "be brief");
    }
}
