use crate::build_prompt::format_context;
use crate::embed_chunks::EmbeddingProvider;
use crate::error::Result;
use crate::vector_index::VectorIndex;

/// Number of chunks placed in front of the model for every question.
pub const RETRIEVAL_TOP_K: usize = 3;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Retrieval {
    pub chunks: Vec<String>,
    pub context: String,
}

/// Embeds `question` with the provider the index was built with and joins the top
/// chunks into one context block.
pub async fn retrieve_context(
    provider: &dyn EmbeddingProvider,
    index: &VectorIndex,
    question: &str,
) -> Result<Retrieval> {
    let chunks = index
        .search_as_text(provider, question, RETRIEVAL_TOP_K)
        .await?;
    tracing::debug!(hits = chunks.len(), "retrieved context");
    let context = format_context(&chunks);
    Ok(Retrieval { chunks, context })
}
