//! Downstream model abstraction
//!
//! The engine does not generate answers itself. It prepares a system
//! instruction plus the conversation and hands them to a `CompletionModel`,
//! which streams the answer back as text tokens. Two clients are provided:
//! Ollama (NDJSON streaming) and any OpenAI-compatible chat API (SSE).

use async_trait::async_trait;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;

use crate::config::LLMConfig;

pub mod ollama;
pub mod openai;

pub use ollama::OllamaModel;
pub use openai::OpenAIModel;

/// Result type for model operations
pub type Result<T> = std::result::Result<T, LLMError>;

/// Incremental answer text
pub type TokenStream = BoxStream<'static, Result<String>>;

/// Errors that can occur while talking to a model provider
#[derive(Debug, thiserror::Error)]
pub enum LLMError {
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Timeout")]
    Timeout,

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Stream interrupted: {0}")]
    Stream(String),
}

impl LLMError {
    /// Stable code reported to callers
    pub fn code(&self) -> &'static str {
        match self {
            LLMError::ProviderUnavailable(_) | LLMError::NetworkError(_) => "model_unreachable",
            LLMError::Timeout => "model_timeout",
            LLMError::AuthenticationFailed(_) => "model_auth",
            LLMError::RateLimitExceeded => "model_rate_limited",
            LLMError::InvalidRequest(_) | LLMError::ParseError(_) => "model_rejected",
            LLMError::Stream(_) => "model_stream_interrupted",
        }
    }

    /// Map a reqwest failure from the request phase
    pub(crate) fn from_request(e: reqwest::Error, provider: &str, base_url: &str) -> Self {
        if e.is_timeout() {
            LLMError::Timeout
        } else if e.is_connect() {
            LLMError::ProviderUnavailable(format!(
                "Cannot connect to {} at {}",
                provider, base_url
            ))
        } else {
            LLMError::NetworkError(e.to_string())
        }
    }

    /// Map a non-success HTTP status
    pub(crate) fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => LLMError::AuthenticationFailed(body),
            429 => LLMError::RateLimitExceeded,
            500..=599 => LLMError::ProviderUnavailable(format!("status {}: {}", status, body)),
            _ => LLMError::InvalidRequest(format!("status {}: {}", status, body)),
        }
    }
}

impl From<LLMError> for EngineError {
    fn from(e: LLMError) -> Self {
        match e {
            LLMError::Stream(message) => EngineError::ModelStream(message),
            other => EngineError::ModelUnavailable {
                code: other.code().to_string(),
                message: other.to_string(),
            },
        }
    }
}

/// Message sent to the model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::System => write!(f, "system"),
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
        }
    }
}

impl From<sdk::types::Role> for MessageRole {
    fn from(role: sdk::types::Role) -> Self {
        match role {
            sdk::types::Role::User => MessageRole::User,
            sdk::types::Role::Assistant => MessageRole::Assistant,
        }
    }
}

/// A streaming text-generation capability
#[async_trait]
pub trait CompletionModel: Send + Sync {
    /// Provider name (e.g. "ollama", "openai")
    fn name(&self) -> &str;

    /// Start a completion
    ///
    /// Errors returned here mean no answer can be produced at all. Errors
    /// inside the returned stream mean the answer broke off midway.
    async fn stream(&self, messages: &[Message]) -> Result<TokenStream>;
}

/// Build the configured model client
pub fn build_model(config: &LLMConfig) -> std::result::Result<Arc<dyn CompletionModel>, EngineError> {
    match config.provider.as_str() {
        "ollama" => Ok(Arc::new(OllamaModel::new(&config.ollama, config.timeout_secs)?)),
        "openai" => Ok(Arc::new(OpenAIModel::new(&config.openai, config.timeout_secs)?)),
        other => Err(EngineError::Config(format!("Unknown provider '{}'", other))),
    }
}

struct LineState<S> {
    inner: Pin<Box<S>>,
    buffer: Vec<u8>,
    done: bool,
}

/// Split a byte stream into lines, tolerating UTF-8 sequences cut across chunks
pub(crate) fn line_stream<S, B>(inner: S) -> BoxStream<'static, Result<String>>
where
    S: Stream<Item = reqwest::Result<B>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
{
    let state = LineState {
        inner: Box::pin(inner),
        buffer: Vec::new(),
        done: false,
    };

    stream::unfold(state, |mut st| async move {
        loop {
            if let Some(pos) = st.buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = st.buffer.drain(..=pos).collect();
                let text = String::from_utf8_lossy(&line)
                    .trim_end_matches(['\r', '\n'])
                    .to_string();
                return Some((Ok(text), st));
            }

            if st.done {
                if st.buffer.is_empty() {
                    return None;
                }
                let text = String::from_utf8_lossy(&st.buffer).trim().to_string();
                st.buffer.clear();
                return Some((Ok(text), st));
            }

            match st.inner.next().await {
                Some(Ok(chunk)) => st.buffer.extend_from_slice(chunk.as_ref()),
                Some(Err(e)) => {
                    st.done = true;
                    st.buffer.clear();
                    return Some((Err(LLMError::Stream(e.to_string())), st));
                }
                None => st.done = true,
            }
        }
    })
    .boxed()
}

/// What one protocol line carried
pub(crate) enum Frame {
    Token(String),
    Skip,
    End,
}

/// Turn a line stream into a token stream, stopping at the first `End`
pub(crate) fn token_stream<F>(lines: BoxStream<'static, Result<String>>, parse: F) -> TokenStream
where
    F: Fn(&str) -> Result<Frame> + Send + 'static,
{
    use futures::future::ready;
    use futures::TryStreamExt;

    lines
        .map(move |line| line.and_then(|l| parse(&l)))
        .take_while(|frame| ready(!matches!(frame, Ok(Frame::End))))
        .try_filter_map(|frame| {
            ready(Ok(match frame {
                Frame::Token(t) if !t.is_empty() => Some(t),
                _ => None,
            }))
        })
        .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use sdk::errors::LexisErrorExt;

    #[test]
    fn test_error_mapping_to_engine_error() {
        let err: EngineError = LLMError::ProviderUnavailable("down".into()).into();
        assert_eq!(err.code(), "model_unreachable");
        assert_eq!(err.status_code(), 503);

        let err: EngineError = LLMError::Timeout.into();
        assert_eq!(err.status_code(), 504);

        let err: EngineError = LLMError::AuthenticationFailed("bad key".into()).into();
        assert_eq!(err.code(), "model_auth");
        assert_eq!(err.status_code(), 502);

        let err: EngineError = LLMError::Stream("eof".into()).into();
        assert!(matches!(err, EngineError::ModelStream(_)));
    }

    #[test]
    fn test_status_mapping() {
        assert!(matches!(LLMError::from_status(401, String::new()), LLMError::AuthenticationFailed(_)));
        assert!(matches!(LLMError::from_status(429, String::new()), LLMError::RateLimitExceeded));
        assert!(matches!(LLMError::from_status(503, String::new()), LLMError::ProviderUnavailable(_)));
        assert!(matches!(LLMError::from_status(400, String::new()), LLMError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_line_stream_rejoins_split_chunks() {
        let chunks: Vec<reqwest::Result<Vec<u8>>> = vec![
            Ok(b"{\"a\":1}\n{\"b\"".to_vec()),
            Ok(b":2}\r\n\xc3".to_vec()),
            Ok(b"\xa1".to_vec()),
        ];
        let lines: Vec<String> = line_stream(stream::iter(chunks))
            .map(|l| l.unwrap())
            .collect()
            .await;
        assert_eq!(lines, vec!["{\"a\":1}", "{\"b\":2}", "á"]);
    }

    #[tokio::test]
    async fn test_token_stream_stops_at_end() {
        let lines = stream::iter(vec![
            Ok("a".to_string()),
            Ok("".to_string()),
            Ok("end".to_string()),
            Ok("b".to_string()),
        ])
        .boxed();
        let tokens: Vec<String> = token_stream(lines, |l| {
            Ok(match l {
                "" => Frame::Skip,
                "end" => Frame::End,
                other => Frame::Token(other.to_string()),
            })
        })
        .map(|t| t.unwrap())
        .collect()
        .await;
        assert_eq!(tokens, vec!["a"]);
    }
}
