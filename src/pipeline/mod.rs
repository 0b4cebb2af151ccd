/// End-to-end pipeline orchestration
///
/// Drives the full run: enumerate queries → stage-1 entity search (CSV +
/// diagnostic JSON) → optional fusion with auxiliary stage-1 files →
/// partition queries by has-articles → per-family image search with
/// per-query fan-out → cross-family fusion → stage-2 CSV. Per-family
/// intermediate results spill to temp files that are removed when the run
/// ends, on success or failure.
///
/// Per-query failures never abort a run; they are counted and summarized.
/// Failures that leave the run without output (no queries, unwritable
/// artifacts) are fatal.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use tempfile::NamedTempFile;

use crate::artifacts::{
    write_config_dump, write_ranked_csv, write_stage1_json, IdKind, Stage1Article, Stage1Entry,
};
use crate::config::{Config, RunConfig};
use crate::errors::PipelineError;
use crate::index::IndexClient;
use crate::mapping::ArticleImageMap;
use crate::rerank::{rerank_paths, RerankOptions};
use crate::search::images::{fuse_families, FamilyOutput, ImageSearcher, QueryArticles};
use crate::search::text::TextRetriever;
use crate::search::FusionMethod;
use crate::vector::VectorClient;

/// Per-run options from the CLI.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Label for the output directory and artifact suffixes; a timestamp
    /// is used when empty.
    pub label: Option<String>,
    pub output_root: PathBuf,
    /// Process only the first N queries (testing).
    pub max_queries: Option<usize>,
    /// Extra stage-1 CSVs fused with this run's stage-1 output before the
    /// image stage.
    pub aux_stage1_files: Vec<PathBuf>,
    /// Adaptive (vs normal) mode for that auxiliary fusion.
    pub adaptive_aux_rrf: bool,
}

/// Paths of the artifacts a completed run produced.
#[derive(Debug)]
pub struct RunArtifacts {
    pub output_dir: PathBuf,
    pub stage1_csv: PathBuf,
    pub stage1_json: PathBuf,
    pub track2_csv: PathBuf,
}

/// End-of-run accounting, logged and returned to the caller.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub total_queries: usize,
    pub with_articles: usize,
    pub without_articles: usize,
    pub queries_with_images: usize,
    /// Queries whose stage-1 search produced nothing (sample capped).
    pub failed_query_sample: Vec<String>,
    pub elapsed_secs: f64,
}

pub struct Pipeline {
    config: Arc<Config>,
    run_config: RunConfig,
    index: Arc<IndexClient>,
    retriever: TextRetriever,
    images: ImageSearcher,
}

impl Pipeline {
    pub fn new(
        config: Config,
        run_config: RunConfig,
        mapping: ArticleImageMap,
    ) -> Result<Self, PipelineError> {
        let config = Arc::new(config);
        let index = Arc::new(IndexClient::new(&config)?);
        let vector = Arc::new(VectorClient::new(&config)?);

        let retriever = TextRetriever::new(
            index.clone(),
            config.entity_weights.clone(),
            config.text_top_k,
        );
        let images = ImageSearcher::new(vector, Arc::new(mapping), config.clone());

        Ok(Pipeline {
            config,
            run_config,
            index,
            retriever,
            images,
        })
    }

    /// Run the integrated pipeline and return the artifact paths.
    pub async fn run(&self, opts: &RunOptions) -> Result<(RunArtifacts, RunSummary), PipelineError> {
        let start = Instant::now();
        let label = opts
            .label
            .clone()
            .unwrap_or_else(|| format!("pipeline_{}", Utc::now().format("%Y%m%d_%H%M%S")));
        let output_dir = opts.output_root.join(&label);
        std::fs::create_dir_all(&output_dir)?;
        tracing::info!(dir = %output_dir.display(), "run output directory");

        self.dump_config(&output_dir, opts)?;

        // Stage 1: entity-weighted article retrieval.
        let (stage1_csv, stage1_json, stage1_rows, mut summary) =
            self.text_stage(&output_dir, &label, opts.max_queries).await?;

        // Optional fusion with auxiliary stage-1 files.
        let effective_rows = if opts.aux_stage1_files.is_empty() {
            stage1_rows
        } else {
            self.fuse_aux_stage1(&output_dir, &stage1_csv, &opts.aux_stage1_files, opts.adaptive_aux_rrf)?
        };

        // Stage 2: article-conditioned image retrieval.
        let queries = classify_queries(&effective_rows, self.config.max_articles_per_query);
        summary.with_articles = queries.iter().filter(|q| q.has_articles()).count();
        summary.without_articles = queries.len() - summary.with_articles;
        tracing::info!(
            with_articles = summary.with_articles,
            without_articles = summary.without_articles,
            "classified queries for the image stage"
        );

        let final_results = self.image_stage(&queries).await?;
        summary.queries_with_images = final_results
            .values()
            .filter(|images| !images.is_empty())
            .count();

        // Every input query gets a row, sentinel-only when nothing fused.
        let mut track2_rows = final_results;
        for query in &queries {
            track2_rows.entry(query.query_id.clone()).or_default();
        }
        let track2_csv = output_dir.join(format!("track2_{}.csv", label));
        write_ranked_csv(
            &track2_csv,
            IdKind::Image,
            self.config.image_csv_width,
            &track2_rows,
        )?;
        tracing::info!(path = %track2_csv.display(), "wrote stage-2 results");

        summary.elapsed_secs = start.elapsed().as_secs_f64();
        log_summary(&summary);

        Ok((
            RunArtifacts {
                output_dir,
                stage1_csv,
                stage1_json,
                track2_csv,
            },
            summary,
        ))
    }

    /// Image stage from existing stage-1 CSVs (no text search). Multiple
    /// files are fused first; a single file is used as-is.
    pub async fn run_image_only(
        &self,
        opts: &RunOptions,
        stage1_files: &[PathBuf],
    ) -> Result<(PathBuf, RunSummary), PipelineError> {
        let start = Instant::now();
        if stage1_files.is_empty() {
            return Err(PipelineError::Config(
                "Image-only mode requires at least one stage-1 CSV".to_string(),
            ));
        }
        let label = opts
            .label
            .clone()
            .unwrap_or_else(|| format!("image_search_{}", Utc::now().format("%Y%m%d_%H%M%S")));
        let output_dir = opts.output_root.join(&label);
        std::fs::create_dir_all(&output_dir)?;
        self.dump_config(&output_dir, opts)?;

        let rows = if stage1_files.len() == 1 {
            let file = crate::artifacts::read_ranked_csv(&stage1_files[0])?;
            let mut rows = HashMap::new();
            for query_id in file.query_ids() {
                let valid: Vec<String> = file
                    .cells(query_id)
                    .unwrap_or(&[])
                    .iter()
                    .filter(|c| !crate::artifacts::is_sentinel(c))
                    .cloned()
                    .collect();
                rows.insert(query_id.clone(), valid);
            }
            rows
        } else {
            self.fuse_aux_stage1(
                &output_dir,
                &stage1_files[0],
                &stage1_files[1..],
                opts.adaptive_aux_rrf,
            )?
        };

        let queries = classify_queries(&rows, self.config.max_articles_per_query);
        let mut summary = RunSummary {
            total_queries: queries.len(),
            with_articles: queries.iter().filter(|q| q.has_articles()).count(),
            ..RunSummary::default()
        };
        summary.without_articles = queries.len() - summary.with_articles;

        let final_results = self.image_stage(&queries).await?;
        summary.queries_with_images = final_results
            .values()
            .filter(|images| !images.is_empty())
            .count();

        let mut track2_rows = final_results;
        for query in &queries {
            track2_rows.entry(query.query_id.clone()).or_default();
        }
        let track2_csv = output_dir.join(format!("track2_{}.csv", label));
        write_ranked_csv(
            &track2_csv,
            IdKind::Image,
            self.config.image_csv_width,
            &track2_rows,
        )?;

        summary.elapsed_secs = start.elapsed().as_secs_f64();
        log_summary(&summary);
        Ok((track2_csv, summary))
    }

    /// Stage-1 only: retrieve articles for every query and write the CSV
    /// and diagnostic JSON.
    pub async fn text_stage(
        &self,
        output_dir: &Path,
        label: &str,
        max_queries: Option<usize>,
    ) -> Result<(PathBuf, PathBuf, HashMap<String, Vec<String>>, RunSummary), PipelineError> {
        let mut queries = self.index.fetch_all_queries(100).await?;
        if queries.is_empty() {
            return Err(PipelineError::Config(
                "Query index returned no queries; nothing to search".to_string(),
            ));
        }
        if let Some(max) = max_queries {
            queries.truncate(max);
        }

        let pb = progress_bar(queries.len() as u64, "stage-1");
        let retriever = &self.retriever;
        let results: Vec<(String, Vec<Stage1Article>)> = stream::iter(queries.iter())
            .map(|query| {
                let pb = &pb;
                async move {
                    let hits = retriever.search(&query.query_id, &query.entities).await;
                    pb.inc(1);
                    let articles = hits
                        .into_iter()
                        .map(|h| Stage1Article {
                            rank: h.rank,
                            article_id: h.article_id,
                            score: h.score,
                        })
                        .collect();
                    (query.query_id.clone(), articles)
                }
            })
            .buffer_unordered(self.config.query_concurrency)
            .collect()
            .await;
        pb.finish_and_clear();

        let mut summary = RunSummary {
            total_queries: results.len(),
            ..RunSummary::default()
        };
        let mut rows: HashMap<String, Vec<String>> = HashMap::new();
        let mut entries = Vec::with_capacity(results.len());
        for (query_id, articles) in results {
            if articles.is_empty() && summary.failed_query_sample.len() < 10 {
                summary.failed_query_sample.push(query_id.clone());
            }
            rows.insert(
                query_id.clone(),
                articles.iter().map(|a| a.article_id.clone()).collect(),
            );
            entries.push(Stage1Entry { query_id, articles });
        }
        entries.sort_by(|a, b| a.query_id.cmp(&b.query_id));

        let stage1_csv = output_dir.join(format!("submission_{}.csv", label));
        write_ranked_csv(&stage1_csv, IdKind::Article, self.config.text_top_k, &rows)?;

        let stage1_json = output_dir.join(format!("stage_1_{}.json", label));
        let mut files = HashMap::new();
        files.insert(
            "submission_csv".to_string(),
            stage1_csv.display().to_string(),
        );
        write_stage1_json(&stage1_json, entries, files, self.config.text_top_k)?;

        let found = rows.values().filter(|r| !r.is_empty()).count();
        tracing::info!(
            total = rows.len(),
            with_results = found,
            csv = %stage1_csv.display(),
            "stage-1 complete"
        );
        Ok((stage1_csv, stage1_json, rows, summary))
    }

    /// Fuse this run's stage-1 CSV with auxiliary files and return the
    /// fused article rows.
    fn fuse_aux_stage1(
        &self,
        output_dir: &Path,
        stage1_csv: &Path,
        aux_files: &[PathBuf],
        adaptive: bool,
    ) -> Result<HashMap<String, Vec<String>>, PipelineError> {
        let mut inputs = vec![stage1_csv.to_path_buf()];
        inputs.extend(aux_files.iter().cloned());

        let mode = if adaptive { "adaptive" } else { "normal" };
        let fused_csv = output_dir.join(format!("submission_rrf_{}.csv", mode));
        let opts = RerankOptions {
            k: self.config.rrf_k,
            top_n: None,
            adaptive,
        };
        let outcome = rerank_paths(&inputs, &fused_csv, IdKind::Article, &opts)?;

        let mut rows = HashMap::new();
        for (query_id, cells) in &outcome.rows {
            let valid: Vec<String> = cells
                .iter()
                .filter(|c| !crate::artifacts::is_sentinel(c))
                .cloned()
                .collect();
            rows.insert(query_id.clone(), valid);
        }
        Ok(rows)
    }

    /// Stage 2 across all active families, with per-family spill files.
    async fn image_stage(
        &self,
        queries: &[QueryArticles],
    ) -> Result<HashMap<String, Vec<String>>, PipelineError> {
        // Spill handles live until the end of the function; the files are
        // unlinked when they drop, whether or not the run succeeded.
        let mut spills: Vec<(NamedTempFile, String)> = Vec::new();

        for family in self.run_config.active_families() {
            tracing::info!(
                family = %family.name,
                collection = %family.search_collection,
                weight = family.weight,
                "image search"
            );
            let pb = progress_bar(queries.len() as u64, &family.name);

            let images = &self.images;
            let results: HashMap<String, Vec<String>> = stream::iter(queries.iter())
                .map(|query| {
                    let pb = &pb;
                    async move {
                        let ids = images.search_family_query(query, family).await;
                        pb.inc(1);
                        (query.query_id.clone(), ids)
                    }
                })
                .buffer_unordered(self.config.query_concurrency)
                .collect()
                .await;
            pb.finish_and_clear();

            let output = FamilyOutput {
                name: family.name.clone(),
                weight: family.weight,
                results,
            };
            let mut spill = NamedTempFile::new()?;
            serde_json::to_writer(&mut spill, &output)?;
            spill.flush()?;
            tracing::debug!(family = %family.name, spill = %spill.path().display(), "family results spilled");
            spills.push((spill, family.name.clone()));
        }

        // Reload the spilled family outputs and fuse across families.
        let mut outputs = Vec::with_capacity(spills.len());
        for (spill, name) in &spills {
            let file = std::fs::File::open(spill.path())?;
            let output: FamilyOutput = serde_json::from_reader(file)?;
            tracing::debug!(family = %name, queries = output.results.len(), "family results reloaded");
            outputs.push(output);
        }

        let method = if self.config.use_voting {
            FusionMethod::Voting
        } else {
            FusionMethod::Rrf {
                k: self.config.family_rrf_k,
            }
        };
        Ok(fuse_families(&outputs, self.config.final_top_k, method))
    }

    fn dump_config(&self, output_dir: &Path, opts: &RunOptions) -> Result<(), PipelineError> {
        let c = &self.config;
        let mut entries = vec![
            ("index_url".to_string(), c.index_url.clone()),
            ("vector_url".to_string(), c.vector_url.clone()),
            ("articles_index".to_string(), c.articles_index().to_string()),
            ("queries_index".to_string(), c.queries_index().to_string()),
            ("private_mode".to_string(), c.private_mode.to_string()),
            ("text_top_k".to_string(), c.text_top_k.to_string()),
            (
                "max_articles_per_query".to_string(),
                c.max_articles_per_query.to_string(),
            ),
            (
                "direct_search_top_k".to_string(),
                c.direct_search_top_k.to_string(),
            ),
            ("per_family_top_k".to_string(), c.per_family_top_k.to_string()),
            ("final_top_k".to_string(), c.final_top_k.to_string()),
            ("rrf_k".to_string(), c.rrf_k.to_string()),
            ("family_rrf_k".to_string(), c.family_rrf_k.to_string()),
            ("use_voting".to_string(), c.use_voting.to_string()),
            ("use_sigmoid_boost".to_string(), c.boost.use_sigmoid.to_string()),
            (
                "similarity_weight".to_string(),
                c.boost.similarity_weight.to_string(),
            ),
            ("rank_weight".to_string(), c.boost.rank_weight.to_string()),
            ("max_boost".to_string(), c.boost.max_boost.to_string()),
            (
                "similarity_floor".to_string(),
                c.boost.similarity_floor.to_string(),
            ),
            (
                "aux_stage1_files".to_string(),
                format!("{:?}", opts.aux_stage1_files),
            ),
        ];
        for family in &self.run_config.families {
            entries.push((
                format!("family.{}", family.name),
                format!(
                    "search={} weight={} views={}",
                    family.search_collection,
                    family.weight,
                    family
                        .views
                        .iter()
                        .map(|v| format!("{}:{}", v.collection, v.weight))
                        .collect::<Vec<_>>()
                        .join(",")
                ),
            ));
        }
        write_config_dump(&output_dir.join("config.txt"), &entries)
    }
}

/// Split stage-1 rows into per-query article lists, capped at
/// `max_articles` valid entries.
pub fn classify_queries(
    rows: &HashMap<String, Vec<String>>,
    max_articles: usize,
) -> Vec<QueryArticles> {
    let mut queries: Vec<QueryArticles> = rows
        .iter()
        .map(|(query_id, articles)| QueryArticles {
            query_id: query_id.clone(),
            articles: articles.iter().take(max_articles).cloned().collect(),
        })
        .collect();
    queries.sort_by(|a, b| a.query_id.cmp(&b.query_id));
    queries
}

fn progress_bar(len: u64, label: &str) -> ProgressBar {
    let pb = ProgressBar::new(len);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{pos}/{len}] {msg} [{elapsed_precise} / {eta_precise}]")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    pb.set_message(label.to_string());
    pb
}

fn log_summary(summary: &RunSummary) {
    tracing::info!(
        total = summary.total_queries,
        with_articles = summary.with_articles,
        without_articles = summary.without_articles,
        with_images = summary.queries_with_images,
        elapsed_secs = format!("{:.1}", summary.elapsed_secs),
        "run complete"
    );
    if !summary.failed_query_sample.is_empty() {
        tracing::warn!(
            sample = ?summary.failed_query_sample,
            "queries with empty stage-1 results"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_queries_caps_and_sorts() {
        let mut rows = HashMap::new();
        rows.insert(
            "q2".to_string(),
            vec!["a1".to_string(), "a2".to_string(), "a3".to_string()],
        );
        rows.insert("q1".to_string(), Vec::new());

        let queries = classify_queries(&rows, 2);
        assert_eq!(queries.len(), 2);
        assert_eq!(queries[0].query_id, "q1");
        assert!(!queries[0].has_articles());
        assert_eq!(queries[1].query_id, "q2");
        assert_eq!(queries[1].articles, vec!["a1", "a2"]);
    }
}
