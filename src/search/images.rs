/// Article-conditioned image retrieval (stage 2)
///
/// For one query and one model family, every active query view is searched
/// concurrently against the family's image collection, then the views are
/// fused into the family's per-query list. Queries that produced stage-1
/// articles search only within their candidate images and get rank-aware
/// score boosting; queries without articles fall back to unfiltered search
/// over the summary/concise views only (the raw query view is too noisy
/// without the article filter).

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use futures::future::join_all;

use crate::config::{Config, ModelFamily, QueryView, ViewKind};
use crate::mapping::ArticleImageMap;
use crate::search::boost::{boosted_score, NO_ARTICLE_RANK};
use crate::search::{fuse_ranked_lists, FusionMethod};
use crate::vector::{ImageHit, VectorSearch};

/// A query with its stage-1 article list (possibly empty).
#[derive(Debug, Clone)]
pub struct QueryArticles {
    pub query_id: String,
    pub articles: Vec<String>,
}

impl QueryArticles {
    pub fn has_articles(&self) -> bool {
        !self.articles.is_empty()
    }
}

/// One family's fused per-query image lists, carried into cross-family
/// fusion.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct FamilyOutput {
    pub name: String,
    pub weight: f64,
    pub results: HashMap<String, Vec<String>>,
}

pub struct ImageSearcher {
    vector: Arc<dyn VectorSearch>,
    mapping: Arc<ArticleImageMap>,
    config: Arc<Config>,
}

impl ImageSearcher {
    pub fn new(
        vector: Arc<dyn VectorSearch>,
        mapping: Arc<ArticleImageMap>,
        config: Arc<Config>,
    ) -> Self {
        ImageSearcher {
            vector,
            mapping,
            config,
        }
    }

    fn view_fusion(&self) -> FusionMethod {
        if self.config.use_voting {
            FusionMethod::Voting
        } else {
            FusionMethod::Rrf { k: self.config.rrf_k }
        }
    }

    /// Search one view collection; any failure or missing embedding
    /// contributes an empty list and the query continues.
    async fn search_view(
        &self,
        view: &QueryView,
        search_collection: &str,
        query_id: &str,
        candidates: Option<&[String]>,
        top_k: usize,
    ) -> Vec<ImageHit> {
        let embedding = match self.vector.query_embedding(&view.collection, query_id).await {
            Ok(Some(v)) => v,
            Ok(None) => {
                tracing::debug!(query_id, collection = %view.collection, "no stored query embedding");
                return Vec::new();
            }
            Err(e) => {
                tracing::warn!(query_id, collection = %view.collection, error = %e, "embedding fetch failed");
                return Vec::new();
            }
        };

        match self
            .vector
            .search_images(search_collection, &embedding, candidates, top_k)
            .await
        {
            Ok(hits) => hits,
            Err(e) => {
                tracing::warn!(query_id, collection = search_collection, error = %e, "image search failed");
                Vec::new()
            }
        }
    }

    /// Run one query against one family and fuse its views into the
    /// family-level list (at most `per_family_top_k` images).
    pub async fn search_family_query(
        &self,
        query: &QueryArticles,
        family: &ModelFamily,
    ) -> Vec<String> {
        let per_view = if query.has_articles() {
            self.search_with_articles(query, family).await
        } else {
            self.search_without_articles(query, family).await
        };

        let lists: Vec<(f64, &[String])> = family
            .active_views()
            .filter_map(|view| {
                per_view
                    .get(&view.collection)
                    .map(|ids| (view.weight, ids.as_slice()))
            })
            .collect();

        fuse_ranked_lists(lists, self.view_fusion())
            .into_iter()
            .take(self.config.per_family_top_k)
            .map(|(id, _)| id)
            .collect()
    }

    /// Candidate-restricted search with rank-aware boosting, across all
    /// active views.
    async fn search_with_articles(
        &self,
        query: &QueryArticles,
        family: &ModelFamily,
    ) -> HashMap<String, Vec<String>> {
        let candidates = self.mapping.candidates(&query.articles);
        if candidates.images.is_empty() {
            tracing::debug!(query_id = %query.query_id, "stage-1 articles map to no images");
            return HashMap::new();
        }

        // Fetch deeper than the final cut so boosting has room to reorder.
        let fetch_k = self.config.final_top_k * 2;

        let searches = family.active_views().map(|view| {
            let view = view.clone();
            let images = candidates.images.clone();
            async move {
                let hits = self
                    .search_view(
                        &view,
                        &family.search_collection,
                        &query.query_id,
                        Some(images.as_slice()),
                        fetch_k,
                    )
                    .await;
                (view.collection, hits)
            }
        });

        let mut per_view = HashMap::new();
        for (collection, hits) in join_all(searches).await {
            let mut boosted: Vec<(String, f64)> = hits
                .into_iter()
                .map(|hit| {
                    let article_rank = candidates
                        .article_rank
                        .get(&hit.image_id)
                        .copied()
                        .unwrap_or(NO_ARTICLE_RANK);
                    let score = boosted_score(&self.config.boost, hit.similarity, article_rank);
                    (hit.image_id, score)
                })
                .collect();
            // Stable sort keeps the similarity order for equal final scores.
            boosted.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
            per_view.insert(collection, boosted.into_iter().map(|(id, _)| id).collect());
        }
        per_view
    }

    /// Unfiltered search over the non-raw views, no boosting.
    async fn search_without_articles(
        &self,
        query: &QueryArticles,
        family: &ModelFamily,
    ) -> HashMap<String, Vec<String>> {
        let searches = family
            .active_views()
            .filter(|view| view.kind != ViewKind::RawQuery)
            .map(|view| {
                let view = view.clone();
                async move {
                    let hits = self
                        .search_view(
                            &view,
                            &family.search_collection,
                            &query.query_id,
                            None,
                            self.config.direct_search_top_k,
                        )
                        .await;
                    (view.collection, hits)
                }
            });

        join_all(searches)
            .await
            .into_iter()
            .map(|(collection, hits)| {
                (
                    collection,
                    hits.into_iter().map(|h| h.image_id).collect::<Vec<_>>(),
                )
            })
            .collect()
    }
}

/// Cross-family fusion: weighted RRF (with its own k) or voting over the
/// first `final_top_k` entries of each family's list. Query set is the
/// union across families; output lists are capped at `final_top_k`.
pub fn fuse_families(
    outputs: &[FamilyOutput],
    final_top_k: usize,
    method: FusionMethod,
) -> HashMap<String, Vec<String>> {
    let query_ids: BTreeSet<&String> = outputs
        .iter()
        .flat_map(|o| o.results.keys())
        .collect();

    let mut fused = HashMap::new();
    for query_id in query_ids {
        let lists: Vec<(f64, &[String])> = outputs
            .iter()
            .filter_map(|o| {
                o.results.get(query_id.as_str()).map(|ids| {
                    let cut = ids.len().min(final_top_k);
                    (o.weight, &ids[..cut])
                })
            })
            .collect();
        let images: Vec<String> = fuse_ranked_lists(lists, method)
            .into_iter()
            .take(final_top_k)
            .map(|(id, _)| id)
            .collect();
        fused.insert(query_id.clone(), images);
    }
    fused
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::PipelineError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// In-memory vector store: embeddings per (collection, query), one
    /// ranked result list per search collection, and a log of searches.
    struct FakeVectorStore {
        embeddings: HashMap<(String, String), Vec<f32>>,
        results: HashMap<String, Vec<(String, f64)>>,
        calls: Mutex<Vec<(String, Option<Vec<String>>)>>,
    }

    impl FakeVectorStore {
        fn new() -> Self {
            FakeVectorStore {
                embeddings: HashMap::new(),
                results: HashMap::new(),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn with_embedding(mut self, collection: &str, query_id: &str) -> Self {
            self.embeddings
                .insert((collection.to_string(), query_id.to_string()), vec![0.1; 4]);
            self
        }

        fn with_results(mut self, collection: &str, hits: &[(&str, f64)]) -> Self {
            self.results.insert(
                collection.to_string(),
                hits.iter().map(|(id, s)| (id.to_string(), *s)).collect(),
            );
            self
        }

        fn searched_view_collections(&self) -> Vec<String> {
            // The call log records the embedding collection via a marker
            // entry pushed in query_embedding.
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|(c, _)| c.starts_with("embed:"))
                .map(|(c, _)| c.trim_start_matches("embed:").to_string())
                .collect()
        }
    }

    #[async_trait]
    impl VectorSearch for FakeVectorStore {
        async fn query_embedding(
            &self,
            collection: &str,
            query_id: &str,
        ) -> Result<Option<Vec<f32>>, PipelineError> {
            self.calls
                .lock()
                .unwrap()
                .push((format!("embed:{}", collection), None));
            Ok(self
                .embeddings
                .get(&(collection.to_string(), query_id.to_string()))
                .cloned())
        }

        async fn search_images(
            &self,
            collection: &str,
            _vector: &[f32],
            candidates: Option<&[String]>,
            top_k: usize,
        ) -> Result<Vec<ImageHit>, PipelineError> {
            self.calls
                .lock()
                .unwrap()
                .push((collection.to_string(), candidates.map(|c| c.to_vec())));
            let all = self.results.get(collection).cloned().unwrap_or_default();
            let hits = all
                .into_iter()
                .filter(|(id, _)| match candidates {
                    Some(set) => set.contains(id),
                    None => true,
                })
                .take(top_k)
                .enumerate()
                .map(|(i, (image_id, similarity))| ImageHit {
                    image_id,
                    similarity,
                    rank: i + 1,
                })
                .collect();
            Ok(hits)
        }
    }

    fn family() -> ModelFamily {
        ModelFamily {
            name: "Test-Large".to_string(),
            search_collection: "Database_Test_Large".to_string(),
            views: vec![
                QueryView {
                    collection: "Query_Test_Large".to_string(),
                    kind: ViewKind::RawQuery,
                    weight: 1.0,
                },
                QueryView {
                    collection: "Summary_Test_Large".to_string(),
                    kind: ViewKind::Summary,
                    weight: 0.8,
                },
            ],
            weight: 1.0,
        }
    }

    fn mapping() -> ArticleImageMap {
        let mut map = HashMap::new();
        map.insert("a1".to_string(), vec!["i1".to_string(), "i2".to_string()]);
        map.insert("a2".to_string(), vec!["i3".to_string()]);
        ArticleImageMap::new(map)
    }

    fn searcher(store: FakeVectorStore) -> (ImageSearcher, Arc<FakeVectorStore>) {
        let store = Arc::new(store);
        let searcher = ImageSearcher::new(
            store.clone(),
            Arc::new(mapping()),
            Arc::new(Config::default()),
        );
        (searcher, store)
    }

    fn query(id: &str, articles: &[&str]) -> QueryArticles {
        QueryArticles {
            query_id: id.to_string(),
            articles: articles.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn test_with_articles_restricts_to_candidates() {
        let store = FakeVectorStore::new()
            .with_embedding("Query_Test_Large", "q1")
            .with_embedding("Summary_Test_Large", "q1")
            .with_results(
                "Database_Test_Large",
                &[("i1", 0.9), ("outsider", 0.95), ("i3", 0.8)],
            );
        let (searcher, store) = searcher(store);

        let result = searcher
            .search_family_query(&query("q1", &["a1", "a2"]), &family())
            .await;

        assert!(result.contains(&"i1".to_string()));
        assert!(result.contains(&"i3".to_string()));
        assert!(!result.contains(&"outsider".to_string()));

        // Every search carried the candidate filter with the mapped images.
        let calls = store.calls.lock().unwrap();
        for (collection, candidates) in calls.iter().filter(|(c, _)| !c.starts_with("embed:")) {
            assert_eq!(collection, "Database_Test_Large");
            let candidates = candidates.as_ref().expect("candidate filter missing");
            assert_eq!(candidates, &vec!["i1".to_string(), "i2".to_string(), "i3".to_string()]);
        }
    }

    #[tokio::test]
    async fn test_without_articles_skips_raw_query_view() {
        let store = FakeVectorStore::new()
            .with_embedding("Query_Test_Large", "q1")
            .with_embedding("Summary_Test_Large", "q1")
            .with_results("Database_Test_Large", &[("i9", 0.7), ("i8", 0.6)]);
        let (searcher, store) = searcher(store);

        let result = searcher.search_family_query(&query("q1", &[]), &family()).await;

        assert_eq!(result, vec!["i9".to_string(), "i8".to_string()]);
        let embedded = store.searched_view_collections();
        assert_eq!(embedded, vec!["Summary_Test_Large".to_string()]);

        // And the searches were unfiltered.
        let calls = store.calls.lock().unwrap();
        for (collection, candidates) in calls.iter().filter(|(c, _)| !c.starts_with("embed:")) {
            assert_eq!(collection, "Database_Test_Large");
            assert!(candidates.is_none());
        }
    }

    #[tokio::test]
    async fn test_boost_reorders_by_article_rank() {
        // i3 has a slightly lower similarity but its article tops the
        // stage-1 list, while i1's article sits at rank 5; the sigmoid
        // boost must put i3 first.
        let store = FakeVectorStore::new()
            .with_embedding("Summary_Test_Large", "q1")
            .with_results("Database_Test_Large", &[("i1", 0.55), ("i3", 0.52)]);
        let (searcher, _) = searcher(store);

        let mut fam = family();
        fam.views.remove(0); // summary view only, for a single-list fusion

        // a2 (→ i3) ranked first, a1 (→ i1, i2) fifth.
        let q = query("q1", &["a2", "x", "x", "x", "a1"]);
        let result = searcher.search_family_query(&q, &fam).await;
        assert_eq!(result[0], "i3");
        assert_eq!(result[1], "i1");
    }

    #[tokio::test]
    async fn test_missing_embedding_contributes_empty_view() {
        // Only the summary view has a stored embedding; the raw view
        // silently drops out and fusion still produces results.
        let store = FakeVectorStore::new()
            .with_embedding("Summary_Test_Large", "q1")
            .with_results("Database_Test_Large", &[("i1", 0.9)]);
        let (searcher, _) = searcher(store);

        let result = searcher
            .search_family_query(&query("q1", &["a1"]), &family())
            .await;
        assert_eq!(result, vec!["i1".to_string()]);
    }

    #[tokio::test]
    async fn test_articles_without_images_yield_empty() {
        let store = FakeVectorStore::new()
            .with_embedding("Query_Test_Large", "q1")
            .with_results("Database_Test_Large", &[("i1", 0.9)]);
        let (searcher, store) = searcher(store);

        let result = searcher
            .search_family_query(&query("q1", &["unmapped"]), &family())
            .await;
        assert!(result.is_empty());
        // No vector search should have run at all.
        assert_eq!(
            store
                .calls
                .lock()
                .unwrap()
                .iter()
                .filter(|(c, _)| !c.starts_with("embed:"))
                .count(),
            0
        );
    }

    fn outputs() -> Vec<FamilyOutput> {
        let mut f1 = HashMap::new();
        f1.insert("q1".to_string(), vec!["a".to_string(), "b".to_string(), "c".to_string()]);
        let mut f2 = HashMap::new();
        f2.insert("q1".to_string(), vec!["b".to_string(), "d".to_string()]);
        vec![
            FamilyOutput {
                name: "F1".to_string(),
                weight: 1.0,
                results: f1,
            },
            FamilyOutput {
                name: "F2".to_string(),
                weight: 0.8,
                results: f2,
            },
        ]
    }

    #[test]
    fn test_fuse_families_weighted_rrf() {
        let fused = fuse_families(&outputs(), 10, FusionMethod::Rrf { k: 50.0 });
        let list = &fused["q1"];
        // b: 1.0/52 + 0.8/51 > a: 1.0/51
        assert_eq!(list[0], "b");
        assert_eq!(list[1], "a");
        assert!(list.contains(&"d".to_string()));
    }

    #[test]
    fn test_fuse_families_deterministic() {
        let first = fuse_families(&outputs(), 10, FusionMethod::Rrf { k: 50.0 });
        let second = fuse_families(&outputs(), 10, FusionMethod::Rrf { k: 50.0 });
        assert_eq!(first, second);
    }

    #[test]
    fn test_fuse_families_respects_final_top_k_cut() {
        // With final_top_k = 1, only each family's first entry may
        // contribute, and the output is one image long.
        let fused = fuse_families(&outputs(), 1, FusionMethod::Rrf { k: 50.0 });
        let list = &fused["q1"];
        assert_eq!(list.len(), 1);
        // a scores 1.0/51, b scores 0.8/51; c and d are cut.
        assert_eq!(list[0], "a");
    }

    #[test]
    fn test_fuse_families_zero_weight_family_ignored() {
        let mut outs = outputs();
        outs[1].weight = 0.0;
        let fused = fuse_families(&outs, 10, FusionMethod::Rrf { k: 50.0 });
        let list = &fused["q1"];
        assert_eq!(list, &vec!["a".to_string(), "b".to_string(), "c".to_string()]);
    }
}
