//! Answer synthesis over retrieved context.
//!
//! Formats retrieval hits as numbered context blocks, prompts the
//! generation collaborator, and returns the answer together with the
//! provenance it was grounded on. When retrieval finds nothing, the
//! generator is never called.

use crate::embedding::Embedder;
use crate::error::PipelineResult;
use crate::generation::Generator;
use crate::models::SearchHit;
use crate::retrieval;
use crate::store::VectorStore;

/// Reply when no candidate survives retrieval.
pub const NO_CONTEXT_ANSWER: &str = "No relevant context found for this question.";

/// A synthesized answer plus the chunks it was grounded on. An empty
/// `context` means the generator was never consulted.
#[derive(Debug, Clone)]
pub struct Answer {
    pub answer: String,
    pub context: Vec<SearchHit>,
}

/// Retrieve context for `query_text` and synthesize an answer from it.
pub async fn ask(
    store: &dyn VectorStore,
    embedder: &dyn Embedder,
    generator: &dyn Generator,
    query_text: &str,
    top_k: usize,
    similarity_threshold: Option<f64>,
) -> PipelineResult<Answer> {
    let context = retrieval::retrieve(store, embedder, query_text, top_k, similarity_threshold).await?;
    if context.is_empty() {
        return Ok(Answer {
            answer: NO_CONTEXT_ANSWER.to_string(),
            context,
        });
    }

    let prompt = build_prompt(query_text, &context);
    let answer = generator.generate(&prompt).await?.trim().to_string();
    Ok(Answer { answer, context })
}

/// `[Context N]` blocks (1-based, double-newline separated) followed by the
/// question.
pub fn build_prompt(query_text: &str, hits: &[SearchHit]) -> String {
    let context = hits
        .iter()
        .enumerate()
        .map(|(i, hit)| format!("[Context {}]: {}", i + 1, hit.content))
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "Answer the question based on the following context:\n\n\
         {context}\n\n\
         Question: {query_text}\n\n\
         Answer:"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChunkMetadata;

    fn hit(content: &str, distance: f64) -> SearchHit {
        SearchHit {
            id: 1,
            content: content.into(),
            metadata: ChunkMetadata::default(),
            distance,
        }
    }

    #[test]
    fn test_prompt_numbers_context_blocks() {
        let prompt = build_prompt("why?", &[hit("first", 0.1), hit("second", 0.2)]);
        assert!(prompt.contains("[Context 1]: first"));
        assert!(prompt.contains("[Context 2]: second"));
        assert!(prompt.ends_with("Question: why?\n\nAnswer:"));
    }
}
