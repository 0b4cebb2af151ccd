/// Configuration management using figment
///
/// Scalar/service settings load with this precedence (highest wins):
/// 1. Defaults (hardcoded)
/// 2. TOML file: eventlens.toml (in working directory)
/// 3. Environment variables: prefixed EVENTLENS_ (e.g. EVENTLENS_LOG_LEVEL=debug)
///
/// The per-run model-family layout (which vector collections to search and
/// with what weights) is a separate JSON document, parsed by `RunConfig`.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use figment::{
    Figment,
    providers::{Env, Format, Toml, Serialized},
};
use serde::{Deserialize, Serialize};

use crate::entity::EntityWeights;
use crate::errors::PipelineError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Inverted-index (article/query store) base URL.
    #[serde(default = "default_index_url")]
    pub index_url: String,

    /// Vector-store base URL.
    #[serde(default = "default_vector_url")]
    pub vector_url: String,

    /// Per-RPC timeout in seconds for both stores.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Search the deduplicated article index instead of the raw one.
    #[serde(default)]
    pub use_clean_articles: bool,

    /// Private-test deployment: private queries index, data_type filter,
    /// and a "Private_" prefix on query-view collections.
    #[serde(default)]
    pub private_mode: bool,

    /// Stage-1 articles retrieved per query.
    #[serde(default = "default_text_top_k")]
    pub text_top_k: usize,

    /// Cap on stage-1 articles expanded into image candidates.
    #[serde(default = "default_max_articles_per_query")]
    pub max_articles_per_query: usize,

    /// Top-k for unfiltered searches (queries without stage-1 articles).
    #[serde(default = "default_direct_search_top_k")]
    pub direct_search_top_k: usize,

    /// Width of a family's fused per-query list.
    #[serde(default = "default_per_family_top_k")]
    pub per_family_top_k: usize,

    /// Final stage-2 images per query after cross-family fusion.
    #[serde(default = "default_final_top_k")]
    pub final_top_k: usize,

    /// Columns in the stage-2 CSV (padded with the sentinel).
    #[serde(default = "default_image_csv_width")]
    pub image_csv_width: usize,

    /// RRF smoothing constant for view-level fusion and the standalone
    /// reranker.
    #[serde(default = "default_rrf_k")]
    pub rrf_k: f64,

    /// RRF smoothing constant for cross-family fusion.
    #[serde(default = "default_family_rrf_k")]
    pub family_rrf_k: f64,

    /// Rank-ignorant weighted voting instead of RRF at both fusion levels.
    #[serde(default)]
    pub use_voting: bool,

    /// In-flight queries per family during the image stage.
    #[serde(default = "default_query_concurrency")]
    pub query_concurrency: usize,

    #[serde(default)]
    pub boost: BoostSettings,

    #[serde(default)]
    pub entity_weights: EntityWeights,
}

/// Rank-aware boost parameters (§ image stage). Sigmoid mode combines
/// vector similarity with the stage-1 article rank; simple mode is a plain
/// factor/rank falloff.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoostSettings {
    #[serde(default = "default_true")]
    pub use_sigmoid: bool,

    /// Simple-mode constant: boost = simple_factor / article_rank.
    #[serde(default = "default_simple_factor")]
    pub simple_factor: f64,

    /// Sigmoid weight on the similarity axis.
    #[serde(default = "default_similarity_weight")]
    pub similarity_weight: f64,

    /// Sigmoid weight on ln(article_rank).
    #[serde(default = "default_rank_weight")]
    pub rank_weight: f64,

    #[serde(default)]
    pub bias: f64,

    /// Upper bound on the boost (sigmoid output is scaled by this).
    #[serde(default = "default_max_boost")]
    pub max_boost: f64,

    /// Hard floor: similarities below this receive zero boost.
    #[serde(default = "default_similarity_floor")]
    pub similarity_floor: f64,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_index_url() -> String {
    "http://localhost:9200".to_string()
}

fn default_vector_url() -> String {
    "http://localhost:6333".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_text_top_k() -> usize {
    10
}

fn default_max_articles_per_query() -> usize {
    15
}

fn default_direct_search_top_k() -> usize {
    20
}

fn default_per_family_top_k() -> usize {
    50
}

fn default_final_top_k() -> usize {
    15
}

fn default_image_csv_width() -> usize {
    50
}

fn default_rrf_k() -> f64 {
    60.0
}

fn default_family_rrf_k() -> f64 {
    50.0
}

fn default_query_concurrency() -> usize {
    8
}

fn default_true() -> bool {
    true
}

fn default_simple_factor() -> f64 {
    0.3
}

fn default_similarity_weight() -> f64 {
    10.0
}

fn default_rank_weight() -> f64 {
    2.5
}

fn default_max_boost() -> f64 {
    0.5
}

fn default_similarity_floor() -> f64 {
    0.5
}

impl Default for BoostSettings {
    fn default() -> Self {
        BoostSettings {
            use_sigmoid: true,
            simple_factor: default_simple_factor(),
            similarity_weight: default_similarity_weight(),
            rank_weight: default_rank_weight(),
            bias: 0.0,
            max_boost: default_max_boost(),
            similarity_floor: default_similarity_floor(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            log_level: default_log_level(),
            index_url: default_index_url(),
            vector_url: default_vector_url(),
            request_timeout_secs: default_request_timeout_secs(),
            use_clean_articles: false,
            private_mode: false,
            text_top_k: default_text_top_k(),
            max_articles_per_query: default_max_articles_per_query(),
            direct_search_top_k: default_direct_search_top_k(),
            per_family_top_k: default_per_family_top_k(),
            final_top_k: default_final_top_k(),
            image_csv_width: default_image_csv_width(),
            rrf_k: default_rrf_k(),
            family_rrf_k: default_family_rrf_k(),
            use_voting: false,
            query_concurrency: default_query_concurrency(),
            boost: BoostSettings::default(),
            entity_weights: EntityWeights::default(),
        }
    }
}

impl Config {
    /// Load configuration from defaults, TOML file, and environment
    /// variables. Environment variables override TOML file values.
    pub fn load() -> Result<Config, PipelineError> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file("eventlens.toml"))
            .merge(Env::prefixed("EVENTLENS_"))
            .extract()
            .map_err(|e| PipelineError::Config(format!("Failed to load config: {}", e)))?;

        config.entity_weights.validate()?;
        Ok(config)
    }

    /// Name of the articles index for this deployment.
    pub fn articles_index(&self) -> &'static str {
        if self.use_clean_articles {
            "articles_clean"
        } else {
            "articles"
        }
    }

    /// Name of the queries index for this deployment.
    pub fn queries_index(&self) -> &'static str {
        if self.private_mode {
            "private_queries_clean"
        } else {
            "queries"
        }
    }
}

// ---------------------------------------------------------------------------
// Run configuration: model families and view collections
// ---------------------------------------------------------------------------

/// Prefix applied to query-view collections in private-test deployments.
/// Search collections never get the prefix.
pub const PRIVATE_VIEW_PREFIX: &str = "Private_";

/// The textual rendering of a query that a view collection embeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViewKind {
    /// Raw query text. Skipped for queries without stage-1 articles.
    RawQuery,
    Summary,
    Concise,
    Other,
}

impl ViewKind {
    /// Classify a view collection by naming convention
    /// (Query_* / Summary_* / Concise_*), ignoring a private prefix.
    pub fn from_collection_name(name: &str) -> ViewKind {
        let base = name.strip_prefix(PRIVATE_VIEW_PREFIX).unwrap_or(name);
        if base.starts_with("Query") {
            ViewKind::RawQuery
        } else if base.starts_with("Summary") {
            ViewKind::Summary
        } else if base.starts_with("Concise") {
            ViewKind::Concise
        } else {
            ViewKind::Other
        }
    }
}

/// One query-view collection inside a family.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryView {
    pub collection: String,
    pub kind: ViewKind,
    pub weight: f64,
}

impl QueryView {
    pub fn is_active(&self) -> bool {
        self.weight > 0.0
    }
}

/// A model family: one image search collection plus the query-view
/// collections that share its embedding space.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelFamily {
    pub name: String,
    pub search_collection: String,
    pub views: Vec<QueryView>,
    pub weight: f64,
}

impl ModelFamily {
    pub fn is_active(&self) -> bool {
        self.weight > 0.0
    }

    /// Active views of this family, in declaration order.
    pub fn active_views(&self) -> impl Iterator<Item = &QueryView> {
        self.views.iter().filter(|v| v.is_active())
    }
}

/// Parsed run configuration: families in stable (name-sorted) order plus a
/// flat view→weight table.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub families: Vec<ModelFamily>,
    pub view_weights: HashMap<String, f64>,
}

/// On-disk shape of one database entry in the run-config JSON.
#[derive(Debug, Deserialize)]
struct DatabaseEntry {
    #[serde(default = "default_family_weight")]
    weight: f64,
    #[serde(default)]
    query_collections: Vec<BTreeMap<String, f64>>,
}

fn default_family_weight() -> f64 {
    1.0
}

impl RunConfig {
    /// Load the `{database: {weight, query_collections}}` JSON document.
    ///
    /// `private_mode` prefixes view-collection names with "Private_"
    /// without touching search-collection names.
    pub fn from_json_file(path: &Path, private_mode: bool) -> Result<RunConfig, PipelineError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!(
                "Failed to read run config {}: {}",
                path.display(),
                e
            ))
        })?;
        let doc: BTreeMap<String, DatabaseEntry> = serde_json::from_str(&raw)
            .map_err(|e| PipelineError::Config(format!("Invalid run config JSON: {}", e)))?;

        let mut families = Vec::new();
        let mut view_weights = HashMap::new();

        for (db_name, entry) in doc {
            let mut views = Vec::new();
            for view_map in &entry.query_collections {
                for (base_name, weight) in view_map {
                    let collection = if private_mode {
                        format!("{}{}", PRIVATE_VIEW_PREFIX, base_name)
                    } else {
                        base_name.clone()
                    };
                    view_weights.insert(collection.clone(), *weight);
                    views.push(QueryView {
                        kind: ViewKind::from_collection_name(&collection),
                        collection,
                        weight: *weight,
                    });
                }
            }

            let family_name = db_name
                .strip_prefix("Database_")
                .unwrap_or(&db_name)
                .to_string();
            families.push(ModelFamily {
                name: family_name,
                search_collection: db_name,
                views,
                weight: entry.weight,
            });
        }

        let config = RunConfig {
            families,
            view_weights,
        };
        config.validate()?;
        Ok(config)
    }

    /// Expand the legacy flat-parameter surface into the same structure.
    pub fn from_legacy(legacy: &LegacyRunConfig, private_mode: bool) -> Result<RunConfig, PipelineError> {
        let db = legacy.database_name();
        let mut families = Vec::new();
        let mut view_weights = HashMap::new();

        let large_views = [
            (format!("Query_{}_Large", legacy.checkpoint), legacy.query_large_weight),
            (format!("Summary_{}_Large", legacy.checkpoint), legacy.summary_large_weight),
            (format!("Concise_{}_Large", legacy.checkpoint), legacy.concise_large_weight),
        ];
        families.push(build_family(
            format!("{}-Large", legacy.checkpoint),
            format!("Database_{}_Large", db),
            &large_views,
            legacy.large_family_weight,
            private_mode,
            &mut view_weights,
        ));

        let base_views = [
            (format!("Query_{}_Base", legacy.checkpoint), legacy.query_base_weight),
            (format!("Summary_{}_Base", legacy.checkpoint), legacy.summary_base_weight),
            (format!("Concise_{}_Base", legacy.checkpoint), legacy.concise_base_weight),
        ];
        families.push(build_family(
            format!("{}-Base", legacy.checkpoint),
            format!("Database_{}_Base", db),
            &base_views,
            legacy.base_family_weight,
            private_mode,
            &mut view_weights,
        ));

        if legacy.enable_aux_family {
            let aux_views = [
                ("Query_Laion_H14".to_string(), legacy.aux_query_weight),
                ("Summary_Laion_H14".to_string(), legacy.aux_summary_weight),
                ("Concise_Laion_H14".to_string(), legacy.aux_concise_weight),
            ];
            families.push(build_family(
                "H14-Laion".to_string(),
                "Database_Laion_H14".to_string(),
                &aux_views,
                legacy.aux_family_weight,
                private_mode,
                &mut view_weights,
            ));
        }

        families.sort_by(|a, b| a.name.cmp(&b.name));
        let config = RunConfig {
            families,
            view_weights,
        };
        config.validate()?;
        Ok(config)
    }

    /// Families with weight > 0, in stable order.
    pub fn active_families(&self) -> Vec<&ModelFamily> {
        self.families.iter().filter(|f| f.is_active()).collect()
    }

    fn validate(&self) -> Result<(), PipelineError> {
        let active = self.active_families();
        if active.is_empty() {
            return Err(PipelineError::Config(
                "All model families have weight 0; at least one must be active".to_string(),
            ));
        }
        for family in &active {
            if family.active_views().next().is_none() {
                return Err(PipelineError::Config(format!(
                    "Family {} is active but has no active query views",
                    family.name
                )));
            }
        }
        Ok(())
    }
}

fn build_family(
    name: String,
    search_collection: String,
    view_specs: &[(String, f64)],
    weight: f64,
    private_mode: bool,
    view_weights: &mut HashMap<String, f64>,
) -> ModelFamily {
    let views = view_specs
        .iter()
        .map(|(base, w)| {
            let collection = if private_mode {
                format!("{}{}", PRIVATE_VIEW_PREFIX, base)
            } else {
                base.clone()
            };
            view_weights.insert(collection.clone(), *w);
            QueryView {
                kind: ViewKind::from_collection_name(&collection),
                collection,
                weight: *w,
            }
        })
        .collect();
    ModelFamily {
        name,
        search_collection,
        views,
        weight,
    }
}

/// Legacy scalar parameters, expanded by `RunConfig::from_legacy`.
#[derive(Debug, Clone)]
pub struct LegacyRunConfig {
    pub checkpoint: String,
    pub query_large_weight: f64,
    pub summary_large_weight: f64,
    pub concise_large_weight: f64,
    pub query_base_weight: f64,
    pub summary_base_weight: f64,
    pub concise_base_weight: f64,
    pub large_family_weight: f64,
    pub base_family_weight: f64,
    pub enable_aux_family: bool,
    pub aux_query_weight: f64,
    pub aux_summary_weight: f64,
    pub aux_concise_weight: f64,
    pub aux_family_weight: f64,
}

impl LegacyRunConfig {
    /// Checkpoints that embed into another checkpoint's database search on
    /// that database.
    fn database_name(&self) -> &str {
        if self.checkpoint == "OpenEvents_v1" {
            "Flickr30k"
        } else {
            &self.checkpoint
        }
    }
}

impl Default for LegacyRunConfig {
    fn default() -> Self {
        LegacyRunConfig {
            checkpoint: "Initialized".to_string(),
            query_large_weight: 1.0,
            summary_large_weight: 0.0,
            concise_large_weight: 0.0,
            query_base_weight: 1.0,
            summary_base_weight: 0.0,
            concise_base_weight: 0.0,
            large_family_weight: 1.0,
            base_family_weight: 1.0,
            enable_aux_family: true,
            aux_query_weight: 1.0,
            aux_summary_weight: 0.0,
            aux_concise_weight: 0.0,
            aux_family_weight: 1.0,
        }
    }
}
