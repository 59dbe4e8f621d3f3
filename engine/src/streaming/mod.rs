//! Response Streaming
//!
//! Forwards model tokens to the consumer through a bounded channel. A slow
//! consumer slows the model down instead of buffering without limit. The
//! turn is tied to a cancellation token: cancelling it, or dropping the
//! `ResponseStream`, stops forwarding and discards the turn.
//!
//! Only a stream that reaches its natural end is persisted. The user and
//! assistant messages are written with the research audit record, then the
//! conversation summary is refreshed, then `Done` is sent.

use futures::{Stream, StreamExt};
use sdk::errors::{EngineError, ErrorBody};
use sdk::types::{MessageMetadata, Role};
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};

use crate::config::StreamingConfig;
use crate::conductor::OutcomeSummary;
use crate::llm::TokenStream;
use crate::memory::{MemoryStore, SearchRecord};
use crate::search::truncate_chars;

const SUMMARY_MAX_CHARS: usize = 300;
const TOPIC_MAX_CHARS: usize = 160;
const SUMMARY_MAX_ENTITIES: usize = 5;

/// Event delivered to the consumer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Token {
        text: String,
    },
    Done {
        message_id: String,
        summary: OutcomeSummary,
    },
    Error {
        message: String,
        code: String,
        status: u16,
    },
}

impl StreamEvent {
    fn error(err: &EngineError) -> Self {
        let body = ErrorBody::from(err);
        StreamEvent::Error {
            message: body.message,
            code: body.code,
            status: body.status,
        }
    }
}

/// Everything needed to persist a completed turn
#[derive(Debug, Clone)]
pub struct TurnRecord {
    pub conversation_id: String,
    pub user_id: String,
    pub user_message_id: String,
    pub user_message: String,
    pub assistant_message_id: String,
    pub metadata: MessageMetadata,
    pub summary: OutcomeSummary,
    /// Entities the classifier extracted from the user message
    pub entities: Vec<String>,
    /// Audit record of the research behind the answer
    pub search: Option<SearchRecord>,
}

/// Answer gathered from a finished stream
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedAnswer {
    pub message_id: String,
    pub text: String,
    pub summary: OutcomeSummary,
}

/// Consumer side of a streamed turn
///
/// Dropping it cancels the turn.
pub struct ResponseStream {
    rx: mpsc::Receiver<StreamEvent>,
    cancel: CancellationToken,
    _guard: DropGuard,
}

impl ResponseStream {
    pub async fn recv(&mut self) -> Option<StreamEvent> {
        self.rx.recv().await
    }

    /// Abort the turn; nothing is persisted
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Drain the stream into a complete answer
    pub async fn collect_answer(mut self) -> Result<CompletedAnswer, ErrorBody> {
        let mut text = String::new();
        while let Some(event) = self.rx.recv().await {
            match event {
                StreamEvent::Token { text: token } => text.push_str(&token),
                StreamEvent::Done {
                    message_id,
                    summary,
                } => {
                    return Ok(CompletedAnswer {
                        message_id,
                        text,
                        summary,
                    })
                }
                StreamEvent::Error {
                    message,
                    code,
                    status,
                } => {
                    return Err(ErrorBody {
                        message,
                        code,
                        status,
                    })
                }
            }
        }
        Err(ErrorBody::from(&EngineError::Cancelled))
    }
}

impl Stream for ResponseStream {
    type Item = StreamEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

#[derive(Clone)]
pub struct ResponseStreamer {
    memory: MemoryStore,
    capacity: usize,
}

impl ResponseStreamer {
    pub fn new(memory: MemoryStore, config: &StreamingConfig) -> Self {
        Self {
            memory,
            capacity: config.channel_capacity.max(1),
        }
    }

    /// Start forwarding `tokens` on a background task
    pub fn spawn(
        &self,
        tokens: TokenStream,
        turn: TurnRecord,
        cancel: CancellationToken,
    ) -> ResponseStream {
        let (tx, rx) = mpsc::channel(self.capacity);
        let memory = self.memory.clone();
        let task_cancel = cancel.clone();

        tokio::spawn(async move {
            forward(tokens, turn, memory, tx, task_cancel).await;
        });

        ResponseStream {
            rx,
            _guard: cancel.clone().drop_guard(),
            cancel,
        }
    }
}

async fn forward(
    mut tokens: TokenStream,
    turn: TurnRecord,
    memory: MemoryStore,
    tx: mpsc::Sender<StreamEvent>,
    cancel: CancellationToken,
) {
    let mut answer = String::new();

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!(conversation_id = %turn.conversation_id, "Turn cancelled, discarding");
                return;
            }
            next = tokens.next() => next,
        };

        match next {
            Some(Ok(token)) => {
                answer.push_str(&token);
                let sent = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => false,
                    sent = tx.send(StreamEvent::Token { text: token }) => sent.is_ok(),
                };
                if !sent {
                    info!(conversation_id = %turn.conversation_id, "Consumer gone, discarding turn");
                    return;
                }
            }
            Some(Err(e)) => {
                let err = EngineError::from(e);
                warn!(conversation_id = %turn.conversation_id, error = %err, "Model stream failed");
                let _ = tx.send(StreamEvent::error(&err)).await;
                return;
            }
            None => break,
        }
    }

    persist_turn(&memory, &turn, &answer).await;
    debug!(
        conversation_id = %turn.conversation_id,
        chars = answer.chars().count(),
        "Turn persisted"
    );

    let _ = tx
        .send(StreamEvent::Done {
            message_id: turn.assistant_message_id.clone(),
            summary: turn.summary.clone(),
        })
        .await;
}

async fn persist_turn(memory: &MemoryStore, turn: &TurnRecord, answer: &str) {
    memory
        .save_message(
            &turn.conversation_id,
            &turn.user_id,
            &turn.user_message_id,
            &turn.user_message,
            Role::User,
            None,
        )
        .await;
    memory
        .save_message(
            &turn.conversation_id,
            &turn.user_id,
            &turn.assistant_message_id,
            answer,
            Role::Assistant,
            Some(turn.metadata.clone()),
        )
        .await;
    if let Some(record) = &turn.search {
        memory.record_search(record.clone()).await;
    }

    let summary = conversation_summary(&turn.user_message, &turn.entities);
    memory
        .update_summary(&turn.conversation_id, &turn.user_id, &summary)
        .await;
}

/// Last user topic plus extracted entities, bounded in length
pub fn conversation_summary(topic: &str, entities: &[String]) -> String {
    let topic = topic.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut summary = format!("Last topic: {}", truncate_chars(&topic, TOPIC_MAX_CHARS));

    let mut seen: Vec<&str> = Vec::new();
    for entity in entities {
        if seen.len() == SUMMARY_MAX_ENTITIES {
            break;
        }
        if !seen.contains(&entity.as_str()) {
            seen.push(entity);
        }
    }
    if !seen.is_empty() {
        summary.push_str(" | Entities: ");
        summary.push_str(&seen.join(", "));
    }

    truncate_chars(&summary, SUMMARY_MAX_CHARS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryConfig;
    use crate::llm::LLMError;
    use futures::stream;
    use std::time::Duration;

    fn summary() -> OutcomeSummary {
        OutcomeSummary {
            search_rounds: 1,
            total_searches: 1,
            total_results: 2,
            final_quality: 0.9,
            search_strategy: Some("code".to_string()),
            verification_passed: true,
        }
    }

    fn turn() -> TurnRecord {
        TurnRecord {
            conversation_id: "c1".to_string(),
            user_id: "u1".to_string(),
            user_message_id: "m-user".to_string(),
            user_message: "¿Qué dice el artículo 15?".to_string(),
            assistant_message_id: "m-assistant".to_string(),
            metadata: MessageMetadata::default(),
            summary: summary(),
            entities: vec!["articulo 15".to_string()],
            search: Some(SearchRecord::new("c1", "u1", "articulo 15", Vec::new(), 1, 120)),
        }
    }

    fn streamer(memory: &MemoryStore) -> ResponseStreamer {
        ResponseStreamer::new(memory.clone(), &StreamingConfig { channel_capacity: 2 })
    }

    #[tokio::test]
    async fn test_completed_stream_persists_turn() {
        let memory = MemoryStore::in_memory(MemoryConfig::default());
        let tokens: TokenStream =
            stream::iter(vec![Ok("Según ".to_string()), Ok("el artículo".to_string())]).boxed();

        let answer = streamer(&memory)
            .spawn(tokens, turn(), CancellationToken::new())
            .collect_answer()
            .await
            .unwrap();

        assert_eq!(answer.text, "Según el artículo");
        assert_eq!(answer.message_id, "m-assistant");
        assert_eq!(answer.summary, summary());

        let history = memory.get_relevant_history("c1", "u1", "", 10).await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[1].content, "Según el artículo");
        assert!(history[1].metadata.is_some());
        assert_eq!(memory.recent_searches("c1", "u1", 5).await.len(), 1);

        let context = memory.get_context("c1", "u1").await;
        assert!(context.summary.starts_with("Last topic:"));
        assert!(context.summary.contains("articulo 15"));
    }

    #[tokio::test]
    async fn test_dropped_consumer_discards_turn() {
        let memory = MemoryStore::in_memory(MemoryConfig::default());
        let tokens: TokenStream = stream::iter(vec![Ok("parcial".to_string())])
            .chain(stream::pending())
            .boxed();

        let mut response = streamer(&memory).spawn(tokens, turn(), CancellationToken::new());
        assert!(matches!(response.recv().await, Some(StreamEvent::Token { .. })));
        drop(response);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(memory.get_relevant_history("c1", "u1", "", 10).await.is_empty());
        assert!(memory.recent_searches("c1", "u1", 5).await.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_discards_turn() {
        let memory = MemoryStore::in_memory(MemoryConfig::default());
        let cancel = CancellationToken::new();
        let tokens: TokenStream = stream::pending().boxed();

        let response = streamer(&memory).spawn(tokens, turn(), cancel.clone());
        cancel.cancel();

        let result = response.collect_answer().await;
        assert_eq!(result.unwrap_err().code, "cancelled");
        assert!(memory.get_relevant_history("c1", "u1", "", 10).await.is_empty());
        assert!(memory.recent_searches("c1", "u1", 5).await.is_empty());
    }

    #[tokio::test]
    async fn test_model_error_mid_stream() {
        let memory = MemoryStore::in_memory(MemoryConfig::default());
        let tokens: TokenStream = stream::iter(vec![
            Ok("Según".to_string()),
            Err(LLMError::Stream("connection reset".to_string())),
        ])
        .boxed();

        let result = streamer(&memory)
            .spawn(tokens, turn(), CancellationToken::new())
            .collect_answer()
            .await;

        assert_eq!(result.unwrap_err().code, "model_stream_interrupted");
        assert!(memory.get_relevant_history("c1", "u1", "", 10).await.is_empty());
        assert!(memory.recent_searches("c1", "u1", 5).await.is_empty());
    }

    #[test]
    fn test_conversation_summary_bounds() {
        let long = "contrato ".repeat(100);
        let entities: Vec<String> = (0..10).map(|i| format!("articulo {}", i)).collect();
        let summary = conversation_summary(&long, &entities);
        assert!(summary.chars().count() <= SUMMARY_MAX_CHARS);

        let summary = conversation_summary("divorcio", &["ley 1".into(), "ley 1".into()]);
        assert_eq!(summary, "Last topic: divorcio | Entities: ley 1");
    }
}
