/// Inverted-index client
///
/// Talks to the article/query index over its JSON REST API: entity-scored
/// article search, and scroll-based enumeration of the query set (5-minute
/// keep-alive). Transport failures surface as errors here; retrieval-layer
/// callers decide whether they are fatal.

pub mod query;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::config::Config;
use crate::entity::{Entity, EntityWeights};
use crate::errors::PipelineError;

/// One stage-1 result: an article with its aggregated entity score.
#[derive(Debug, Clone)]
pub struct ArticleHit {
    pub article_id: String,
    pub score: f64,
    /// 1-based position in the result list.
    pub rank: usize,
}

/// A query document from the queries index.
#[derive(Debug, Clone, Deserialize)]
pub struct QueryRecord {
    pub query_id: String,
    #[serde(default)]
    pub query_text: String,
    #[serde(default)]
    pub entities: Vec<Entity>,
}

/// Seam for the article search operation so retrieval logic can be tested
/// against in-memory fakes.
#[async_trait]
pub trait ArticleSearch: Send + Sync {
    async fn search_articles(
        &self,
        entities: &[Entity],
        weights: &EntityWeights,
        top_k: usize,
    ) -> Result<Vec<ArticleHit>, PipelineError>;
}

/// REST client for the inverted index.
pub struct IndexClient {
    client: reqwest::Client,
    base_url: String,
    articles_index: &'static str,
    queries_index: &'static str,
    private_mode: bool,
}

// Response envelopes. Only the fields we consume are modeled.

#[derive(Deserialize)]
struct SearchResponse<T> {
    #[serde(rename = "_scroll_id")]
    scroll_id: Option<String>,
    hits: HitsEnvelope<T>,
}

#[derive(Deserialize)]
struct HitsEnvelope<T> {
    hits: Vec<Hit<T>>,
}

#[derive(Deserialize)]
struct Hit<T> {
    #[serde(rename = "_score")]
    score: Option<f64>,
    #[serde(rename = "_source")]
    source: T,
}

#[derive(Deserialize)]
struct ArticleSource {
    article_id: String,
}

impl IndexClient {
    pub fn new(config: &Config) -> Result<Self, PipelineError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| PipelineError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(IndexClient {
            client,
            base_url: config.index_url.trim_end_matches('/').to_string(),
            articles_index: config.articles_index(),
            queries_index: config.queries_index(),
            private_mode: config.private_mode,
        })
    }

    async fn post_search<T: for<'de> Deserialize<'de>>(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<SearchResponse<T>, PipelineError> {
        let response = self.client.post(url).json(body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(PipelineError::transport(
                "index",
                format!("{} returned {}: {}", url, status, text),
            ));
        }
        let parsed = response.json::<SearchResponse<T>>().await?;
        Ok(parsed)
    }

    /// Enumerate every query document, in query_id order, via the scroll
    /// API. Private deployments additionally filter on data_type.
    pub async fn fetch_all_queries(
        &self,
        batch_size: usize,
    ) -> Result<Vec<QueryRecord>, PipelineError> {
        let filter = if self.private_mode {
            json!({"term": {"data_type": "private"}})
        } else {
            json!({"match_all": {}})
        };
        let body = json!({
            "size": batch_size,
            "_source": ["query_id", "query_text", "entities"],
            "query": filter,
            "sort": [{"query_id": "asc"}]
        });

        let url = format!(
            "{}/{}/_search?scroll=5m",
            self.base_url, self.queries_index
        );
        let mut response: SearchResponse<QueryRecord> = self.post_search(&url, &body).await?;

        let mut queries: Vec<QueryRecord> = Vec::new();
        let scroll_url = format!("{}/_search/scroll", self.base_url);
        let mut scroll_id = response.scroll_id.take();

        loop {
            let batch = std::mem::take(&mut response.hits.hits);
            if batch.is_empty() {
                break;
            }
            queries.extend(batch.into_iter().map(|hit| hit.source));

            let id = match &scroll_id {
                Some(id) => id.clone(),
                None => break,
            };
            response = self
                .post_search(&scroll_url, &json!({"scroll": "5m", "scroll_id": id}))
                .await?;
            if response.scroll_id.is_some() {
                scroll_id = response.scroll_id.take();
            }
        }

        // Best-effort scroll cleanup; the context expires on its own.
        if let Some(id) = scroll_id {
            let _ = self
                .client
                .delete(&scroll_url)
                .json(&json!({"scroll_id": [id]}))
                .send()
                .await;
        }

        tracing::info!(count = queries.len(), index = self.queries_index, "loaded queries");
        Ok(queries)
    }
}

#[async_trait]
impl ArticleSearch for IndexClient {
    async fn search_articles(
        &self,
        entities: &[Entity],
        weights: &EntityWeights,
        top_k: usize,
    ) -> Result<Vec<ArticleHit>, PipelineError> {
        let body = match query::entity_search_body(entities, weights, top_k) {
            Some(body) => body,
            None => return Ok(Vec::new()),
        };

        let url = format!("{}/{}/_search", self.base_url, self.articles_index);
        let response: SearchResponse<ArticleSource> = self.post_search(&url, &body).await?;

        let hits = response
            .hits
            .hits
            .into_iter()
            .enumerate()
            .map(|(i, hit)| ArticleHit {
                article_id: hit.source.article_id,
                score: hit.score.unwrap_or(0.0),
                rank: i + 1,
            })
            .collect();
        Ok(hits)
    }
}
