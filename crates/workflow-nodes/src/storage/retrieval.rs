//! Retrieval Executor
//!
//! Ranks indexed documents against a query. Embeddings come from the
//! injected retrieval index; when embedding fails the executor scores by
//! keyword overlap instead.

use std::sync::Arc;

use async_trait::async_trait;
use node_engine::{
    ExecutorRegistration, FlowIO, IndexedDocument, NodeContext, NodeDescriptor, NodeExecutor, NodeInputs,
    NodeKind, NodeOutcome, Result,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::memory_index::{cosine_similarity, words};

/// Number of results returned when `topK` is not configured
pub const DEFAULT_TOP_K: usize = 5;

/// Longest snippet returned per document, in characters
pub const SNIPPET_CHARS: usize = 240;

/// How the ranking was computed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoringMethod {
    Embedding,
    Keyword,
}

/// One ranked document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredSnippet {
    pub id: String,
    pub snippet: String,
    pub score: f32,
    #[serde(default)]
    pub metadata: Value,
}

/// Retrieval executor
///
/// # Config
/// - `query` (optional) - Fixed query; otherwise taken from the input
/// - `topK` (optional) - Number of results (default 5)
/// - `collection` (optional) - Restrict to one index collection
///
/// # Inputs
/// - `in` - Query text, or a json object with a `query` field
///
/// # Outputs
/// - `out` - `{query, method, results: [{id, snippet, score, metadata}]}`
#[derive(Debug, Clone, Copy, Default)]
pub struct RetrievalExecutor;

impl RetrievalExecutor {
    /// Port ID for the query input
    pub const PORT_INPUT: &'static str = "in";
    /// Port ID for the ranked results
    pub const PORT_OUTPUT: &'static str = "out";

    pub fn descriptor() -> NodeDescriptor {
        NodeDescriptor::for_kind(
            NodeKind::Retrieval,
            "Retrieval",
            "Rank indexed documents against a query",
        )
    }

    fn query(ctx: &NodeContext<'_>, inputs: &NodeInputs) -> String {
        if let Some(query) = ctx.node.config_str("query") {
            return query.trim().to_string();
        }
        match inputs.primary_or(Self::PORT_INPUT) {
            Some(FlowIO::Json { content, .. }) => match content.get("query") {
                Some(Value::String(q)) => q.trim().to_string(),
                _ => content.as_str().unwrap_or_default().trim().to_string(),
            },
            Some(other) => other.as_text().trim().to_string(),
            None => String::new(),
        }
    }

    fn top_k(ctx: &NodeContext<'_>) -> usize {
        ctx.node
            .config
            .get("topK")
            .and_then(Value::as_u64)
            .map(|k| k as usize)
            .unwrap_or(DEFAULT_TOP_K)
    }
}

/// Keyword/phrase-overlap score
///
/// An exact (case-insensitive) substring match contributes 1.0; the
/// fraction of distinct query words present in the text is added on top,
/// so the result lies in `0.0..=2.0`.
pub fn keyword_score(query: &str, text: &str) -> f32 {
    let query = query.trim().to_lowercase();
    if query.is_empty() {
        return 0.0;
    }
    let text_lower = text.to_lowercase();

    let phrase = if text_lower.contains(&query) { 1.0 } else { 0.0 };

    let mut query_words: Vec<String> = words(&query).collect();
    query_words.sort();
    query_words.dedup();
    if query_words.is_empty() {
        return phrase;
    }
    let text_words: std::collections::HashSet<String> = words(&text_lower).collect();
    let hits = query_words.iter().filter(|w| text_words.contains(*w)).count();

    phrase + hits as f32 / query_words.len() as f32
}

fn snippet(text: &str) -> String {
    match text.char_indices().nth(SNIPPET_CHARS) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

fn rank(mut scored: Vec<(f32, &IndexedDocument)>, top_k: usize) -> Vec<ScoredSnippet> {
    scored.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.1.id.cmp(&b.1.id))
    });
    scored
        .into_iter()
        .take(top_k)
        .map(|(score, doc)| ScoredSnippet {
            id: doc.id.clone(),
            snippet: snippet(&doc.text),
            score,
            metadata: doc.metadata.clone(),
        })
        .collect()
}

async fn embedding_scores<'d>(
    ctx: &NodeContext<'_>,
    query: &str,
    documents: &'d [IndexedDocument],
) -> Result<Vec<(f32, &'d IndexedDocument)>> {
    let retrieval = &ctx.services.retrieval;
    let query_vector = retrieval.embed(query).await?;
    let mut scored = Vec::with_capacity(documents.len());
    for doc in documents {
        let score = match &doc.embedding {
            Some(vector) => cosine_similarity(&query_vector, vector),
            None => cosine_similarity(&query_vector, &retrieval.embed(&doc.text).await?),
        };
        scored.push((score, doc));
    }
    Ok(scored)
}

#[async_trait]
impl NodeExecutor for RetrievalExecutor {
    async fn execute(&self, ctx: &NodeContext<'_>, inputs: &NodeInputs) -> Result<NodeOutcome> {
        if let Some(failure) = crate::upstream_failure(&ctx.node.id, inputs) {
            return Ok(NodeOutcome::all(failure));
        }

        let query = Self::query(ctx, inputs);
        let top_k = Self::top_k(ctx);

        if query.is_empty() {
            log::debug!("RetrievalExecutor {}: empty query, returning no results", ctx.node.id);
            return Ok(NodeOutcome::all(FlowIO::json(json!({
                "query": "",
                "method": ScoringMethod::Keyword,
                "results": [],
            }))));
        }

        let collection = ctx.node.config_str("collection");
        let documents = match ctx.services.retrieval.documents(collection).await {
            Ok(documents) => documents,
            Err(e) => {
                log::warn!("RetrievalExecutor {}: document lookup failed: {}", ctx.node.id, e);
                return Ok(NodeOutcome::all(FlowIO::error(format!("document lookup failed: {}", e))));
            }
        };

        let mut meta = serde_json::Map::new();
        let (method, results) = match embedding_scores(ctx, &query, &documents).await {
            Ok(scored) => (ScoringMethod::Embedding, rank(scored, top_k)),
            Err(e) => {
                log::debug!(
                    "RetrievalExecutor {}: embedding unavailable ({}), using keyword scoring",
                    ctx.node.id,
                    e
                );
                meta.insert("embeddingError".into(), Value::String(e.to_string()));
                let scored = documents
                    .iter()
                    .map(|doc| (keyword_score(&query, &doc.text), doc))
                    .filter(|(score, _)| *score > 0.0)
                    .collect();
                (ScoringMethod::Keyword, rank(scored, top_k))
            }
        };

        log::debug!(
            "RetrievalExecutor {}: {} of {} documents returned ({:?})",
            ctx.node.id,
            results.len(),
            documents.len(),
            method
        );

        let mut output = FlowIO::json(json!({
            "query": query,
            "method": method,
            "results": results,
        }));
        output.meta_mut().extend(meta);
        output.meta_mut().insert("candidates".into(), json!(documents.len()));
        Ok(NodeOutcome::all(output))
    }
}

inventory::submit!(ExecutorRegistration {
    kind: NodeKind::Retrieval,
    subtype: None,
    descriptor: RetrievalExecutor::descriptor,
    executor: || Arc::new(RetrievalExecutor),
});

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryIndex;
    use crate::test_support::{run_node, services_with};
    use crate::providers::ScriptedModel;
    use node_engine::GraphNode;

    #[test]
    fn test_descriptor() {
        let descriptor = RetrievalExecutor::descriptor();
        assert_eq!(descriptor.kind, NodeKind::Retrieval);
        assert!(descriptor.inputs.iter().any(|p| p.id == RetrievalExecutor::PORT_INPUT));
        assert!(descriptor.outputs.iter().any(|p| p.id == RetrievalExecutor::PORT_OUTPUT));
    }

    #[test]
    fn test_keyword_score() {
        assert!(keyword_score("borrow checker", "The borrow checker rejects this") > 1.9);
        let partial = keyword_score("borrow checker", "checker of borrowed books");
        assert!(partial > 0.0 && partial < 1.0);
        assert_eq!(keyword_score("zebra", "nothing here"), 0.0);
        assert_eq!(keyword_score("   ", "anything"), 0.0);
    }

    #[test]
    fn test_snippet_respects_char_boundaries() {
        let long = "é".repeat(SNIPPET_CHARS + 10);
        let cut = snippet(&long);
        assert!(cut.ends_with("..."));
        assert_eq!(cut.chars().count(), SNIPPET_CHARS + 3);
    }

    fn corpus(index: &InMemoryIndex) {
        index.add_text("rust", "Rust uses ownership and borrowing to manage memory");
        index.add_text("go", "Go uses a garbage collector");
        index.add_text("cake", "Cake recipes need flour and sugar");
    }

    #[tokio::test]
    async fn test_embedding_ranking() {
        let index = Arc::new(InMemoryIndex::with_hashed_embeddings(64));
        corpus(&index);
        let services = services_with(Arc::new(ScriptedModel::new("")), index);

        let node = GraphNode::new("search", NodeKind::Retrieval);
        let mut inputs = NodeInputs::new();
        inputs.push("in", FlowIO::text("ownership and borrowing"));

        let outcome = run_node(&RetrievalExecutor, &node, &inputs, &services).await;
        let content = outcome.output.content_value();
        assert_eq!(content["method"], "embedding");
        assert_eq!(content["results"][0]["id"], "rust");
        assert_eq!(content["results"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_keyword_fallback_and_top_k() {
        let index = Arc::new(InMemoryIndex::new());
        corpus(&index);
        let services = services_with(Arc::new(ScriptedModel::new("")), index);

        let mut node = GraphNode::new("search", NodeKind::Retrieval);
        node.config = json!({"topK": 1});
        let mut inputs = NodeInputs::new();
        inputs.push("in", FlowIO::json(json!({"query": "garbage collector"})));

        let outcome = run_node(&RetrievalExecutor, &node, &inputs, &services).await;
        let content = outcome.output.content_value();
        assert_eq!(content["method"], "keyword");
        assert_eq!(content["results"].as_array().unwrap().len(), 1);
        assert_eq!(content["results"][0]["id"], "go");
        assert!(outcome.output.meta().contains_key("embeddingError"));
    }

    #[tokio::test]
    async fn test_empty_query_is_not_an_error() {
        let index = Arc::new(InMemoryIndex::new());
        corpus(&index);
        let services = services_with(Arc::new(ScriptedModel::new("")), index);

        let node = GraphNode::new("search", NodeKind::Retrieval);
        let outcome = run_node(&RetrievalExecutor, &node, &NodeInputs::new(), &services).await;
        assert!(!outcome.output.is_error());
        assert_eq!(outcome.output.content_value()["results"], json!([]));
    }

    #[tokio::test]
    async fn test_unknown_collection_is_error_value() {
        let services = services_with(Arc::new(ScriptedModel::new("")), Arc::new(InMemoryIndex::new()));

        let mut node = GraphNode::new("search", NodeKind::Retrieval);
        node.config = json!({"query": "anything", "collection": "nope"});
        let outcome = run_node(&RetrievalExecutor, &node, &NodeInputs::new(), &services).await;
        assert!(outcome.output.is_error());
    }
}
