//! Process-scoped document retrieval
//!
//! The document indexing pipeline lives outside the engine. It is consumed
//! through `PassageRetriever`: given a process (case) id and a query, return
//! the best matching passages of that process's documents.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One ranked passage of a case document
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Passage {
    /// Document name or identifier
    pub source: String,
    pub content: String,
    /// Higher is more relevant
    pub score: f64,
}

#[async_trait]
pub trait PassageRetriever: Send + Sync {
    /// Up to `limit` passages, best first
    async fn retrieve(
        &self,
        process_id: &str,
        query: &str,
        limit: usize,
    ) -> anyhow::Result<Vec<Passage>>;
}

/// Keep the `limit` best passages, best first; ties keep input order
pub fn top_passages(mut passages: Vec<Passage>, limit: usize) -> Vec<Passage> {
    passages.sort_by(|a, b| b.score.total_cmp(&a.score));
    passages.truncate(limit);
    passages
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_top_passages_orders_and_bounds() {
        let passages = vec![
            Passage { source: "a".into(), content: "x".into(), score: 0.2 },
            Passage { source: "b".into(), content: "y".into(), score: 0.9 },
            Passage { source: "c".into(), content: "z".into(), score: 0.5 },
        ];
        let top = top_passages(passages, 2);
        let sources: Vec<&str> = top.iter().map(|p| p.source.as_str()).collect();
        assert_eq!(sources, vec!["b", "c"]);
    }
}
