//! Ollama completion client
//!
//! Ollama runs models locally, typically at http://localhost:11434. Its chat
//! endpoint streams newline-delimited JSON objects:
//!
//! ```text
//! {"message":{"role":"assistant","content":"Según"},"done":false}
//! {"message":{"role":"assistant","content":" el"},"done":false}
//! {"done":true}
//! ```

use async_trait::async_trait;
use reqwest::Client;
use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{
    line_stream, token_stream, CompletionModel, Frame, LLMError, Message, Result, TokenStream,
};
use crate::config::OllamaConfig;

#[derive(Debug, Clone)]
pub struct OllamaModel {
    base_url: String,
    model: String,
    timeout: Duration,
    client: Client,
}

impl OllamaModel {
    pub fn new(config: &OllamaConfig, timeout_secs: u64) -> std::result::Result<Self, EngineError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| EngineError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            timeout: Duration::from_secs(timeout_secs),
            client,
        })
    }

    fn convert_messages(messages: &[Message]) -> Vec<OllamaMessage> {
        messages
            .iter()
            .map(|msg| OllamaMessage {
                role: msg.role.to_string(),
                content: msg.content.clone(),
            })
            .collect()
    }
}

#[async_trait]
impl CompletionModel for OllamaModel {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn stream(&self, messages: &[Message]) -> Result<TokenStream> {
        let request = OllamaRequest {
            model: &self.model,
            messages: Self::convert_messages(messages),
            stream: true,
        };

        tracing::debug!(
            model = %self.model,
            messages = request.messages.len(),
            "Ollama stream request"
        );

        let url = format!("{}/api/chat", self.base_url);
        let send = self.client.post(&url).json(&request).send();
        let response = tokio::time::timeout(self.timeout, send)
            .await
            .map_err(|_| LLMError::Timeout)?
            .map_err(|e| LLMError::from_request(e, "Ollama", &self.base_url))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(LLMError::from_status(status, body));
        }

        Ok(token_stream(line_stream(response.bytes_stream()), parse_line))
    }
}

fn parse_line(line: &str) -> Result<Frame> {
    if line.trim().is_empty() {
        return Ok(Frame::Skip);
    }

    let chunk: OllamaChunk = serde_json::from_str(line)
        .map_err(|e| LLMError::ParseError(format!("Bad Ollama chunk: {}", e)))?;

    if let Some(error) = chunk.error {
        return Err(LLMError::Stream(error));
    }

    let content = chunk.message.map(|m| m.content).unwrap_or_default();
    if chunk.done {
        // The closing object may still carry text
        if content.is_empty() {
            return Ok(Frame::End);
        }
        tracing::debug!("Ollama final chunk carried content");
    }
    Ok(Frame::Token(content))
}

/// Ollama API request format
#[derive(Debug, Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    messages: Vec<OllamaMessage>,
    stream: bool,
}

/// Ollama message format
#[derive(Debug, Serialize, Deserialize)]
struct OllamaMessage {
    role: String,
    content: String,
}

/// One streamed line
#[derive(Debug, Deserialize)]
struct OllamaChunk {
    #[serde(default)]
    message: Option<OllamaMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_conversion() {
        let converted = OllamaModel::convert_messages(&[
            Message::system("Eres un asistente jurídico"),
            Message::user("¿Qué dice el artículo 15?"),
        ]);
        assert_eq!(converted[0].role, "system");
        assert_eq!(converted[1].role, "user");
        assert_eq!(converted[1].content, "¿Qué dice el artículo 15?");
    }

    #[test]
    fn test_parse_line() {
        let frame = parse_line(r#"{"message":{"role":"assistant","content":"Hola"},"done":false}"#).unwrap();
        assert!(matches!(frame, Frame::Token(t) if t == "Hola"));

        assert!(matches!(parse_line(r#"{"done":true}"#).unwrap(), Frame::End));
        assert!(matches!(parse_line("").unwrap(), Frame::Skip));
        assert!(matches!(parse_line(r#"{"error":"model not found"}"#), Err(LLMError::Stream(_))));
        assert!(matches!(parse_line("not json"), Err(LLMError::ParseError(_))));
    }
}
