/// Article→images mapping
///
/// Loaded once at startup from a JSON document `{article_id: [image_id,..]}`
/// and shared immutably across the image stage. Every image belongs to
/// exactly one article; an article may have no images. A missing article
/// silently maps to the empty list.

use std::collections::HashMap;
use std::path::Path;

use crate::errors::PipelineError;

#[derive(Debug, Default, Clone)]
pub struct ArticleImageMap {
    map: HashMap<String, Vec<String>>,
}

/// Candidate images for one query, expanded from its stage-1 articles.
#[derive(Debug, Default)]
pub struct CandidateSet {
    /// Unique image IDs in first-seen order.
    pub images: Vec<String>,
    /// image_id → 1-based rank of its article in the stage-1 list.
    pub article_rank: HashMap<String, u32>,
}

impl ArticleImageMap {
    pub fn new(map: HashMap<String, Vec<String>>) -> Self {
        ArticleImageMap { map }
    }

    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        let raw = std::fs::read_to_string(path)?;
        let map: HashMap<String, Vec<String>> = serde_json::from_str(&raw)?;
        Ok(ArticleImageMap { map })
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn images_for(&self, article_id: &str) -> &[String] {
        self.map.get(article_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Expand ranked stage-1 articles into the candidate image set.
    pub fn candidates(&self, ranked_articles: &[String]) -> CandidateSet {
        let mut set = CandidateSet::default();
        let mut seen = HashMap::new();
        for (idx, article_id) in ranked_articles.iter().enumerate() {
            let rank = (idx + 1) as u32;
            for image_id in self.images_for(article_id) {
                set.article_rank.entry(image_id.clone()).or_insert(rank);
                if seen.insert(image_id.clone(), ()).is_none() {
                    set.images.push(image_id.clone());
                }
            }
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_map() -> ArticleImageMap {
        let mut map = HashMap::new();
        map.insert(
            "a1".to_string(),
            vec!["i1".to_string(), "i2".to_string()],
        );
        map.insert("a2".to_string(), vec!["i3".to_string()]);
        map.insert("a3".to_string(), Vec::new());
        ArticleImageMap::new(map)
    }

    #[test]
    fn test_missing_article_yields_empty() {
        let map = sample_map();
        assert!(map.images_for("nope").is_empty());
        assert!(map.images_for("a3").is_empty());
    }

    #[test]
    fn test_candidates_preserve_article_order() {
        let map = sample_map();
        let set = map.candidates(&["a2".to_string(), "a1".to_string()]);
        assert_eq!(set.images, vec!["i3", "i1", "i2"]);
        assert_eq!(set.article_rank["i3"], 1);
        assert_eq!(set.article_rank["i1"], 2);
        assert_eq!(set.article_rank["i2"], 2);
    }

    #[test]
    fn test_candidates_skip_unknown_articles() {
        let map = sample_map();
        let set = map.candidates(&["missing".to_string(), "a2".to_string()]);
        assert_eq!(set.images, vec!["i3"]);
        assert_eq!(set.article_rank["i3"], 2);
    }

    #[test]
    fn test_candidates_empty_input() {
        let map = sample_map();
        let set = map.candidates(&[]);
        assert!(set.images.is_empty());
        assert!(set.article_rank.is_empty());
    }
}
