/// Vector-store client
///
/// Collections hold points keyed by an external `image_id` payload field
/// with one dense vector each. Query-view collections store query
/// embeddings under the same payload key. Two operations are used: a
/// filtered scroll to fetch a stored embedding, and top-k nearest-neighbor
/// search with an optional image_id membership filter.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::config::Config;
use crate::errors::PipelineError;

/// A nearest-neighbor hit, sorted by descending similarity.
#[derive(Debug, Clone)]
pub struct ImageHit {
    pub image_id: String,
    pub similarity: f64,
    /// 1-based position in the raw search result.
    pub rank: usize,
}

/// Seam over the vector store so the image stage can run against
/// in-memory fakes in tests.
#[async_trait]
pub trait VectorSearch: Send + Sync {
    /// Stored embedding for a query under the given view collection.
    /// Not-found is a non-error (`Ok(None)`).
    async fn query_embedding(
        &self,
        collection: &str,
        query_id: &str,
    ) -> Result<Option<Vec<f32>>, PipelineError>;

    /// Top-k nearest neighbors, optionally restricted to a candidate
    /// image-ID set.
    async fn search_images(
        &self,
        collection: &str,
        vector: &[f32],
        candidates: Option<&[String]>,
        top_k: usize,
    ) -> Result<Vec<ImageHit>, PipelineError>;
}

/// REST client for the vector store.
pub struct VectorClient {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct ScrollResponse {
    result: ScrollResult,
}

#[derive(Deserialize)]
struct ScrollResult {
    #[serde(default)]
    points: Vec<ScrollPoint>,
}

#[derive(Deserialize)]
struct ScrollPoint {
    vector: Option<Vec<f32>>,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    result: Vec<SearchPoint>,
}

#[derive(Deserialize)]
struct SearchPoint {
    score: f64,
    #[serde(default)]
    payload: Option<HashMap<String, serde_json::Value>>,
}

impl VectorClient {
    pub fn new(config: &Config) -> Result<Self, PipelineError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| PipelineError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(VectorClient {
            client,
            base_url: config.vector_url.trim_end_matches('/').to_string(),
        })
    }

    async fn post<T: for<'de> Deserialize<'de>>(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<T, PipelineError> {
        let response = self.client.post(url).json(body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(PipelineError::transport(
                "vector-store",
                format!("{} returned {}: {}", url, status, text),
            ));
        }
        Ok(response.json::<T>().await?)
    }

    fn image_id_filter(ids: &[String]) -> serde_json::Value {
        json!({
            "must": [
                {
                    "key": "image_id",
                    "match": {"any": ids}
                }
            ]
        })
    }
}

#[async_trait]
impl VectorSearch for VectorClient {
    async fn query_embedding(
        &self,
        collection: &str,
        query_id: &str,
    ) -> Result<Option<Vec<f32>>, PipelineError> {
        let url = format!("{}/collections/{}/points/scroll", self.base_url, collection);
        let point_id = [query_id.to_string()];
        let body = json!({
            "filter": Self::image_id_filter(&point_id),
            "limit": 1,
            "with_payload": true,
            "with_vector": true
        });
        let response: ScrollResponse = self.post(&url, &body).await?;
        Ok(response
            .result
            .points
            .into_iter()
            .next()
            .and_then(|p| p.vector))
    }

    async fn search_images(
        &self,
        collection: &str,
        vector: &[f32],
        candidates: Option<&[String]>,
        top_k: usize,
    ) -> Result<Vec<ImageHit>, PipelineError> {
        let url = format!("{}/collections/{}/points/search", self.base_url, collection);
        let mut body = json!({
            "vector": vector,
            "limit": top_k,
            "with_payload": true,
            "score_threshold": 0.0
        });
        if let Some(ids) = candidates {
            body["filter"] = Self::image_id_filter(ids);
        }

        let response: SearchResponse = self.post(&url, &body).await?;
        let mut hits = Vec::with_capacity(response.result.len());
        for point in response.result {
            let image_id = point
                .payload
                .as_ref()
                .and_then(|p| p.get("image_id"))
                .and_then(|v| v.as_str())
                .map(|s| s.to_string());
            match image_id {
                Some(image_id) => hits.push(ImageHit {
                    image_id,
                    similarity: point.score,
                    rank: hits.len() + 1,
                }),
                None => {
                    tracing::debug!(collection, "search hit without image_id payload, skipping");
                }
            }
        }
        Ok(hits)
    }
}
