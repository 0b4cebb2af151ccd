/// Entity-weighted article retrieval (stage 1)
///
/// Thin retrieval layer over the inverted-index client: per-query failures
/// are logged and yield an empty list so one bad query never aborts a run.

use std::sync::Arc;

use crate::entity::{Entity, EntityWeights};
use crate::index::{ArticleHit, ArticleSearch};

pub struct TextRetriever {
    index: Arc<dyn ArticleSearch>,
    weights: EntityWeights,
    top_k: usize,
}

impl TextRetriever {
    pub fn new(index: Arc<dyn ArticleSearch>, weights: EntityWeights, top_k: usize) -> Self {
        TextRetriever {
            index,
            weights,
            top_k,
        }
    }

    /// Top-k articles for a query's entities, best first.
    ///
    /// Empty entity lists and transport failures both produce an empty
    /// result; the failure is recorded via tracing only.
    pub async fn search(&self, query_id: &str, entities: &[Entity]) -> Vec<ArticleHit> {
        if entities.is_empty() {
            return Vec::new();
        }
        match self
            .index
            .search_articles(entities, &self.weights, self.top_k)
            .await
        {
            Ok(hits) => hits,
            Err(e) => {
                tracing::warn!(query_id, error = %e, "article search failed, continuing with empty result");
                Vec::new()
            }
        }
    }
}
