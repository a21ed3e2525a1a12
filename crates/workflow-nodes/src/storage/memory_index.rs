//! In-memory retrieval index
//!
//! Holds documents grouped by collection and, when an embedder is set,
//! embeds them as they are added. Without an embedder `embed` fails, which
//! makes the retrieval executor fall back to keyword scoring.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use node_engine::{IndexedDocument, NodeEngineError, Result, RetrievalIndex};

/// Collection used when a document is added without one
pub const DEFAULT_COLLECTION: &str = "default";

/// Default dimensionality for [`hashed_embedding`]
pub const DEFAULT_HASHED_DIMENSIONS: usize = 64;

type Embedder = Arc<dyn Fn(&str) -> Vec<f32> + Send + Sync>;

/// Compute cosine similarity between two vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        0.0
    } else {
        dot / denom
    }
}

/// Deterministic bag-of-words embedding
///
/// Each lowercase word is hashed into one of `dims` buckets with a hashed
/// sign, and the result is L2-normalized. Texts sharing words end up with a
/// positive cosine similarity, which is enough for offline ranking.
pub fn hashed_embedding(text: &str, dims: usize) -> Vec<f32> {
    let mut vector = vec![0.0f32; dims.max(1)];
    for word in words(text) {
        let hash = crate::stable_hash(word.as_bytes());
        let bucket = (hash % vector.len() as u64) as usize;
        let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
        vector[bucket] += sign;
    }

    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut vector {
            *x /= norm;
        }
    }
    vector
}

/// Lowercase alphanumeric words of a text
pub(crate) fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
}

/// Vector index kept entirely in memory
#[derive(Default)]
pub struct InMemoryIndex {
    collections: RwLock<BTreeMap<String, Vec<IndexedDocument>>>,
    embedder: Option<Embedder>,
}

impl InMemoryIndex {
    /// Index without an embedder (keyword scoring only)
    pub fn new() -> Self {
        Self::default()
    }

    /// Index that embeds with [`hashed_embedding`]
    pub fn with_hashed_embeddings(dims: usize) -> Self {
        Self::with_embedder(move |text| hashed_embedding(text, dims))
    }

    /// Index with a custom embedding function
    pub fn with_embedder(embedder: impl Fn(&str) -> Vec<f32> + Send + Sync + 'static) -> Self {
        Self {
            collections: RwLock::new(BTreeMap::new()),
            embedder: Some(Arc::new(embedder)),
        }
    }

    /// Add a document to the default collection
    pub fn add(&self, document: IndexedDocument) {
        self.add_to(DEFAULT_COLLECTION, document);
    }

    /// Add a plain text document to the default collection
    pub fn add_text(&self, id: impl Into<String>, text: impl Into<String>) {
        self.add(IndexedDocument {
            id: id.into(),
            text: text.into(),
            embedding: None,
            metadata: serde_json::Value::Null,
        });
    }

    /// Add a document to a named collection, embedding it if needed
    pub fn add_to(&self, collection: &str, mut document: IndexedDocument) {
        if document.embedding.is_none() {
            if let Some(embedder) = &self.embedder {
                document.embedding = Some(embedder(&document.text));
            }
        }
        self.write()
            .entry(collection.to_string())
            .or_default()
            .push(document);
    }

    /// Number of documents across all collections
    pub fn len(&self) -> usize {
        self.read().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // Poisoning only means another thread panicked mid-push; the data is
    // still a valid list.
    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, Vec<IndexedDocument>>> {
        self.collections.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, Vec<IndexedDocument>>> {
        self.collections.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl RetrievalIndex for InMemoryIndex {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        match &self.embedder {
            Some(embedder) => Ok(embedder(text)),
            None => Err(NodeEngineError::Retrieval("index has no embedder configured".into())),
        }
    }

    async fn documents(&self, collection: Option<&str>) -> Result<Vec<IndexedDocument>> {
        let collections = self.read();
        match collection {
            Some(name) => collections
                .get(name)
                .cloned()
                .ok_or_else(|| NodeEngineError::Retrieval(format!("unknown collection '{}'", name))),
            None => Ok(collections.values().flatten().cloned().collect()),
        }
    }
}
