//! OpenAI-compatible completion client
//!
//! Streams `POST {base_url}/chat/completions` as server-sent events. Works
//! with any provider that speaks the same protocol. The API key is read
//! from the environment variable named in config at request time.

use async_trait::async_trait;
use reqwest::Client;
use sdk::errors::EngineError;
use serde_json::{json, Value};
use std::time::Duration;

use super::{
    line_stream, token_stream, CompletionModel, Frame, LLMError, Message, Result, TokenStream,
};
use crate::config::OpenAIConfig;

#[derive(Debug, Clone)]
pub struct OpenAIModel {
    base_url: String,
    model: String,
    api_key_env: String,
    timeout: Duration,
    client: Client,
}

impl OpenAIModel {
    pub fn new(config: &OpenAIConfig, timeout_secs: u64) -> std::result::Result<Self, EngineError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| EngineError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key_env: config.api_key_env.clone(),
            timeout: Duration::from_secs(timeout_secs),
            client,
        })
    }

    fn api_key(&self) -> Result<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                LLMError::AuthenticationFailed(format!("{} is not set", self.api_key_env))
            })
    }
}

#[async_trait]
impl CompletionModel for OpenAIModel {
    fn name(&self) -> &str {
        "openai"
    }

    async fn stream(&self, messages: &[Message]) -> Result<TokenStream> {
        let api_key = self.api_key()?;

        let api_messages: Vec<Value> = messages
            .iter()
            .map(|msg| {
                json!({
                    "role": msg.role.to_string(),
                    "content": msg.content
                })
            })
            .collect();

        let payload = json!({
            "model": self.model,
            "messages": api_messages,
            "stream": true,
        });

        let url = format!("{}/chat/completions", self.base_url);
        let send = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&payload)
            .send();

        let response = tokio::time::timeout(self.timeout, send)
            .await
            .map_err(|_| LLMError::Timeout)?
            .map_err(|e| LLMError::from_request(e, "OpenAI-compatible API", &self.base_url))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(LLMError::from_status(status, body));
        }

        Ok(token_stream(line_stream(response.bytes_stream()), parse_event_line))
    }
}

fn parse_event_line(line: &str) -> Result<Frame> {
    let Some(data) = line.strip_prefix("data:") else {
        // Blank separators, comments, and event names
        return Ok(Frame::Skip);
    };
    let data = data.trim();

    if data == "[DONE]" {
        return Ok(Frame::End);
    }

    let event: Value = serde_json::from_str(data)
        .map_err(|e| LLMError::ParseError(format!("Bad SSE payload: {}", e)))?;

    if let Some(error) = event.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("provider error")
            .to_string();
        return Err(LLMError::Stream(message));
    }

    let content = event
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .and_then(|choice| choice.get("delta"))
        .and_then(|delta| delta.get("content"))
        .and_then(Value::as_str)
        .unwrap_or_default();

    Ok(Frame::Token(content.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_event_line() {
        let frame =
            parse_event_line(r#"data: {"choices":[{"delta":{"content":"Según"}}]}"#).unwrap();
        assert!(matches!(frame, Frame::Token(t) if t == "Según"));

        assert!(matches!(parse_event_line("data: [DONE]").unwrap(), Frame::End));
        assert!(matches!(parse_event_line("").unwrap(), Frame::Skip));
        assert!(matches!(parse_event_line(": keep-alive").unwrap(), Frame::Skip));
        assert!(matches!(
            parse_event_line(r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#).unwrap(),
            Frame::Token(t) if t.is_empty()
        ));
        assert!(matches!(
            parse_event_line(r#"data: {"error":{"message":"overloaded"}}"#),
            Err(LLMError::Stream(m)) if m == "overloaded"
        ));
    }

    #[tokio::test]
    async fn test_missing_api_key_is_auth_failure() {
        let config = OpenAIConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            model: "m".to_string(),
            api_key_env: "LEXIS_TEST_UNSET_OPENAI_KEY".to_string(),
        };
        let model = OpenAIModel::new(&config, 1).unwrap();
        let result = model.stream(&[Message::user("hola")]).await;
        assert!(matches!(result, Err(LLMError::AuthenticationFailed(_))));
    }
}
