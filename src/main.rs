use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};

use eventlens::artifacts::IdKind;
use eventlens::config::{Config, LegacyRunConfig, RunConfig};
use eventlens::mapping::ArticleImageMap;
use eventlens::pipeline::{Pipeline, RunOptions};
use eventlens::rerank::{rerank_paths, RerankOptions};
use eventlens::{logging, PipelineError};

#[derive(Parser)]
#[command(name = "eventlens", about = "Two-stage multimodal retrieval pipeline")]
struct Cli {
    /// Private-test deployment (private queries index, prefixed view
    /// collections).
    #[arg(long, global = true)]
    private: bool,

    /// Search the deduplicated article index.
    #[arg(long, global = true)]
    clean_articles: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Full pipeline: text search, image search, final CSV.
    Run(RunArgs),
    /// Stage-1 text search only.
    TextSearch(TextSearchArgs),
    /// Stage-2 image search from existing stage-1 CSV files.
    ImageSearch(ImageSearchArgs),
    /// Standalone RRF rerank over ranked-list CSV files.
    Rerank(RerankArgs),
}

#[derive(Args)]
struct FamilyConfigArgs {
    /// Model-family JSON config; legacy checkpoint expansion is used when
    /// absent.
    #[arg(long)]
    run_config: Option<PathBuf>,

    /// Legacy mode: primary checkpoint name.
    #[arg(long, default_value = "Initialized")]
    checkpoint: String,

    /// Legacy mode: drop the auxiliary model family.
    #[arg(long)]
    disable_aux_family: bool,

    /// Article→images mapping JSON.
    #[arg(long, default_value = "article_to_images.json")]
    mapping: PathBuf,
}

#[derive(Args)]
struct RunArgs {
    #[command(flatten)]
    families: FamilyConfigArgs,

    /// Label for the output directory (timestamp when omitted).
    #[arg(long)]
    label: Option<String>,

    #[arg(long, default_value = "results")]
    output_root: PathBuf,

    /// Process only the first N queries.
    #[arg(long)]
    max_queries: Option<usize>,

    /// Extra stage-1 CSVs to fuse with this run's stage-1 output.
    #[arg(long, num_args = 1..)]
    aux_stage1: Vec<PathBuf>,

    /// Normal (anti-bias) instead of adaptive fusion for --aux-stage1.
    #[arg(long)]
    normal_rrf: bool,
}

#[derive(Args)]
struct TextSearchArgs {
    #[arg(long)]
    label: Option<String>,

    #[arg(long, default_value = "results")]
    output_root: PathBuf,

    #[arg(long)]
    max_queries: Option<usize>,
}

#[derive(Args)]
struct ImageSearchArgs {
    #[command(flatten)]
    families: FamilyConfigArgs,

    /// Stage-1 CSV files (fused first when more than one).
    #[arg(long, num_args = 1.., required = true)]
    csv_files: Vec<PathBuf>,

    #[arg(long)]
    label: Option<String>,

    #[arg(long, default_value = "results")]
    output_root: PathBuf,

    #[arg(long)]
    normal_rrf: bool,
}

#[derive(Args)]
struct RerankArgs {
    /// Ranked-list CSV files to fuse.
    #[arg(num_args = 1.., required = true)]
    inputs: Vec<PathBuf>,

    #[arg(long, default_value_t = 60.0)]
    k: f64,

    /// Output width (defaults to the widest input).
    #[arg(long)]
    top_n: Option<usize>,

    /// Adaptive width-capped mode.
    #[arg(long)]
    adaptive: bool,

    #[arg(long)]
    output: Option<PathBuf>,
}

fn load_run_config(args: &FamilyConfigArgs, config: &Config) -> Result<RunConfig, PipelineError> {
    match &args.run_config {
        Some(path) => RunConfig::from_json_file(path, config.private_mode),
        None => {
            let legacy = LegacyRunConfig {
                checkpoint: args.checkpoint.clone(),
                enable_aux_family: !args.disable_aux_family,
                ..LegacyRunConfig::default()
            };
            RunConfig::from_legacy(&legacy, config.private_mode)
        }
    }
}

fn load_mapping(path: &PathBuf) -> ArticleImageMap {
    match ArticleImageMap::load(path) {
        Ok(mapping) => {
            tracing::info!(articles = mapping.len(), path = %path.display(), "loaded article mapping");
            mapping
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "article mapping unavailable, using empty map");
            ArticleImageMap::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load()?;
    config.private_mode |= cli.private;
    config.use_clean_articles |= cli.clean_articles;
    logging::init_logging(&config);
    tracing::info!(
        index = config.index_url,
        vector = config.vector_url,
        private = config.private_mode,
        "eventlens starting"
    );

    match cli.command {
        Commands::Run(args) => {
            let run_config = load_run_config(&args.families, &config)?;
            let mapping = load_mapping(&args.families.mapping);
            let pipeline = Pipeline::new(config, run_config, mapping)?;
            let opts = RunOptions {
                label: args.label,
                output_root: args.output_root,
                max_queries: args.max_queries,
                aux_stage1_files: args.aux_stage1,
                adaptive_aux_rrf: !args.normal_rrf,
            };
            let (artifacts, _summary) = pipeline.run(&opts).await?;
            println!("stage-1 CSV: {}", artifacts.stage1_csv.display());
            println!("stage-1 JSON: {}", artifacts.stage1_json.display());
            println!("stage-2 CSV: {}", artifacts.track2_csv.display());
        }
        Commands::TextSearch(args) => {
            // The text stage needs no family config or mapping.
            let run_config = RunConfig::from_legacy(&LegacyRunConfig::default(), config.private_mode)?;
            let pipeline = Pipeline::new(config, run_config, ArticleImageMap::default())?;
            let label = args
                .label
                .unwrap_or_else(|| format!("cascade_{}", chrono::Utc::now().format("%Y%m%d_%H%M%S")));
            let output_dir = args.output_root.join(&label);
            std::fs::create_dir_all(&output_dir)?;
            let (csv, json, _, _) = pipeline
                .text_stage(&output_dir, &label, args.max_queries)
                .await?;
            println!("stage-1 CSV: {}", csv.display());
            println!("stage-1 JSON: {}", json.display());
        }
        Commands::ImageSearch(args) => {
            let run_config = load_run_config(&args.families, &config)?;
            let mapping = load_mapping(&args.families.mapping);
            let pipeline = Pipeline::new(config, run_config, mapping)?;
            let opts = RunOptions {
                label: args.label,
                output_root: args.output_root,
                max_queries: None,
                aux_stage1_files: Vec::new(),
                adaptive_aux_rrf: !args.normal_rrf,
            };
            let (track2, _summary) = pipeline.run_image_only(&opts, &args.csv_files).await?;
            println!("stage-2 CSV: {}", track2.display());
        }
        Commands::Rerank(args) => {
            let mode = if args.adaptive { "adaptive" } else { "normal" };
            let output = args.output.unwrap_or_else(|| {
                PathBuf::from(format!(
                    "rerank_{}_{}.csv",
                    mode,
                    chrono::Utc::now().format("%Y%m%d_%H%M%S")
                ))
            });
            let opts = RerankOptions {
                k: args.k,
                top_n: args.top_n,
                adaptive: args.adaptive,
            };
            let outcome = rerank_paths(&args.inputs, &output, IdKind::Article, &opts)?;
            println!(
                "fused {} queries ({} skipped) into {}",
                outcome.total_queries,
                outcome.skipped_queries,
                output.display()
            );
        }
    }

    Ok(())
}
