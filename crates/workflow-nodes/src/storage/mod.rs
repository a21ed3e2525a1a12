//! Storage nodes
//!
//! Retrieval over a vector index, plus the in-memory index used when the
//! host does not supply one.

mod memory_index;
mod retrieval;

pub use memory_index::{
    cosine_similarity, hashed_embedding, InMemoryIndex, DEFAULT_COLLECTION, DEFAULT_HASHED_DIMENSIONS,
};
pub use retrieval::{keyword_score, RetrievalExecutor, ScoredSnippet, ScoringMethod, DEFAULT_TOP_K};
