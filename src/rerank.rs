/// Standalone reciprocal-rank fusion over ranked-list files
///
/// Fuses N ranked-list CSVs sharing a query-ID column. Two modes:
///
/// * normal (anti-bias): a query that is missing or has no valid entries
///   in ANY input file is skipped with an all-sentinel row, so one strong
///   system cannot dominate merely because another was blank;
/// * adaptive: per query, contribution depth is capped at twice the
///   minimum leading-valid count across files (never past the maximum),
///   taming noisy long tails.
///
/// A single input file is copied through with sentinels normalized.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use crate::artifacts::{
    is_sentinel, leading_valid_count, read_ranked_csv, write_ranked_csv, IdKind, RankedFile,
    SENTINEL,
};
use crate::errors::PipelineError;
use crate::search::{fuse_rank_entries, FusionMethod};

#[derive(Debug, Clone)]
pub struct RerankOptions {
    pub k: f64,
    /// Output width; defaults to the widest input file.
    pub top_n: Option<usize>,
    pub adaptive: bool,
}

impl Default for RerankOptions {
    fn default() -> Self {
        RerankOptions {
            k: 60.0,
            top_n: None,
            adaptive: false,
        }
    }
}

#[derive(Debug)]
pub struct RerankOutcome {
    pub rows: HashMap<String, Vec<String>>,
    pub width: usize,
    pub total_queries: usize,
    pub skipped_queries: usize,
}

/// Fuse already-parsed ranked-list files.
pub fn rerank_files(files: &[RankedFile], opts: &RerankOptions) -> RerankOutcome {
    assert!(!files.is_empty(), "rerank requires at least one input file");

    let width = opts
        .top_n
        .unwrap_or_else(|| files.iter().map(|f| f.width).max().unwrap_or(0));

    if files.len() == 1 {
        return copy_through(&files[0], width);
    }

    let query_ids: BTreeSet<String> = files
        .iter()
        .flat_map(|f| f.query_ids().cloned())
        .collect();

    let mut rows = HashMap::new();
    let mut skipped = 0usize;

    for query_id in &query_ids {
        let fused = if opts.adaptive {
            fuse_adaptive(files, query_id, opts.k)
        } else {
            fuse_normal(files, query_id, opts.k)
        };

        match fused {
            Some(ids) => {
                let mut cells: Vec<String> = ids.into_iter().take(width).collect();
                cells.resize(width, SENTINEL.to_string());
                rows.insert(query_id.clone(), cells);
            }
            None => {
                skipped += 1;
                rows.insert(query_id.clone(), vec![SENTINEL.to_string(); width]);
            }
        }
    }

    RerankOutcome {
        rows,
        width,
        total_queries: query_ids.len(),
        skipped_queries: skipped,
    }
}

/// Read, fuse and write in one step. Returns the outcome for reporting.
pub fn rerank_paths(
    inputs: &[std::path::PathBuf],
    output: &Path,
    kind: IdKind,
    opts: &RerankOptions,
) -> Result<RerankOutcome, PipelineError> {
    let files = inputs
        .iter()
        .map(|p| read_ranked_csv(p))
        .collect::<Result<Vec<_>, _>>()?;
    let outcome = rerank_files(&files, opts);
    write_ranked_csv(output, kind, outcome.width, &outcome.rows)?;
    tracing::info!(
        inputs = inputs.len(),
        queries = outcome.total_queries,
        skipped = outcome.skipped_queries,
        output = %output.display(),
        "rerank complete"
    );
    Ok(outcome)
}

/// Single-file degenerate case: pass rows through, normalizing sentinels.
fn copy_through(file: &RankedFile, width: usize) -> RerankOutcome {
    let mut rows = HashMap::new();
    for query_id in file.query_ids() {
        let mut cells: Vec<String> = file
            .cells(query_id)
            .unwrap_or(&[])
            .iter()
            .take(width)
            .cloned()
            .collect();
        cells.resize(width, SENTINEL.to_string());
        rows.insert(query_id.clone(), cells);
    }
    RerankOutcome {
        total_queries: rows.len(),
        skipped_queries: 0,
        rows,
        width,
    }
}

/// Anti-bias fusion: None when the query is missing or blank in any file.
fn fuse_normal(files: &[RankedFile], query_id: &str, k: f64) -> Option<Vec<String>> {
    if !files.iter().all(|f| f.has_any_valid(query_id)) {
        return None;
    }

    let lists = files.iter().map(|f| {
        let entries: Vec<(&str, usize)> = f
            .cells(query_id)
            .unwrap_or(&[])
            .iter()
            .enumerate()
            .filter(|(_, cell)| !is_sentinel(cell))
            .map(|(idx, cell)| (cell.as_str(), idx + 1))
            .collect();
        (1.0, entries)
    });

    Some(
        fuse_rank_entries(lists, FusionMethod::Rrf { k })
            .into_iter()
            .map(|(id, _)| id)
            .collect(),
    )
}

/// Width-capped fusion: each file contributes at most
/// min(2 · min_count, max_count) entries for this query.
fn fuse_adaptive(files: &[RankedFile], query_id: &str, k: f64) -> Option<Vec<String>> {
    let counts: Vec<usize> = files
        .iter()
        .map(|f| leading_valid_count(f.cells(query_id).unwrap_or(&[])))
        .collect();

    if counts.iter().any(|&c| c == 0) {
        return None;
    }

    let min_count = *counts.iter().min().unwrap_or(&0);
    let max_count = *counts.iter().max().unwrap_or(&0);
    let cap = (min_count * 2).min(max_count);

    let lists = files.iter().map(|f| {
        let mut used = 0usize;
        let mut entries = Vec::new();
        for (idx, cell) in f.cells(query_id).unwrap_or(&[]).iter().enumerate() {
            if used >= cap {
                break;
            }
            if is_sentinel(cell) {
                continue;
            }
            entries.push((cell.as_str(), idx + 1));
            used += 1;
        }
        (1.0, entries)
    });

    Some(
        fuse_rank_entries(lists, FusionMethod::Rrf { k })
            .into_iter()
            .map(|(id, _)| id)
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(width: usize, rows: &[(&str, &[&str])]) -> RankedFile {
        let mut f = RankedFile::new(width);
        for (query_id, cells) in rows {
            f.insert(
                query_id.to_string(),
                cells.iter().map(|s| s.to_string()).collect(),
            );
        }
        f
    }

    fn row<'a>(outcome: &'a RerankOutcome, query_id: &str) -> &'a [String] {
        outcome.rows.get(query_id).map(Vec::as_slice).unwrap_or(&[])
    }

    #[test]
    fn test_normal_anti_bias_blanks_query_empty_in_one_file() {
        let a = file(3, &[("q1", &["a", "b", "c"])]);
        let b = file(3, &[("q1", &["#", "#", "#"])]);
        let outcome = rerank_files(&[a, b], &RerankOptions::default());
        assert_eq!(row(&outcome, "q1"), vec!["#", "#", "#"]);
        assert_eq!(outcome.skipped_queries, 1);
    }

    #[test]
    fn test_normal_anti_bias_blanks_query_missing_from_one_file() {
        let a = file(2, &[("q1", &["a", "b"]), ("q2", &["c", "d"])]);
        let b = file(2, &[("q1", &["b", "a"])]);
        let outcome = rerank_files(&[a, b], &RerankOptions::default());
        assert_eq!(row(&outcome, "q2"), vec!["#", "#"]);
        assert!(!row(&outcome, "q1").contains(&"#".to_string()));
        assert_eq!(outcome.total_queries, 2);
        assert_eq!(outcome.skipped_queries, 1);
    }

    #[test]
    fn test_normal_fusion_orders_by_summed_rrf() {
        // b appears at rank 2 and rank 1; a at rank 1 only.
        // b: 1/62 + 1/61 > a: 1/61.
        let a = file(2, &[("q1", &["a", "b"])]);
        let b = file(2, &[("q1", &["b", "c"])]);
        let outcome = rerank_files(&[a, b], &RerankOptions::default());
        assert_eq!(row(&outcome, "q1")[0], "b");
    }

    #[test]
    fn test_adaptive_cap_limits_contribution_depth() {
        // File A has 5 valid entries, file B has 2 → m = 2, cap = 4:
        // only {a,b,c,d} from A and {b,f} from B may contribute.
        let a = file(7, &[("q1", &["a", "b", "c", "d", "e", "#", "#"])]);
        let b = file(7, &[("q1", &["b", "f", "#", "#", "#", "#", "#"])]);
        let opts = RerankOptions {
            adaptive: true,
            ..RerankOptions::default()
        };
        let outcome = rerank_files(&[a, b], &opts);
        let ids = row(&outcome, "q1");
        assert!(!ids.contains(&"e".to_string()));
        for expected in ["a", "b", "c", "d", "f"] {
            assert!(ids.contains(&expected.to_string()), "missing {}", expected);
        }
        assert_eq!(ids[0], "b");
    }

    #[test]
    fn test_adaptive_skips_query_empty_in_any_file() {
        let a = file(3, &[("q1", &["a", "b", "c"])]);
        let b = file(3, &[("q1", &[])]);
        let opts = RerankOptions {
            adaptive: true,
            ..RerankOptions::default()
        };
        let outcome = rerank_files(&[a, b], &opts);
        assert_eq!(row(&outcome, "q1"), vec!["#", "#", "#"]);
        assert_eq!(outcome.skipped_queries, 1);
    }

    #[test]
    fn test_adaptive_cap_never_exceeds_max_available() {
        // Both files have 2 valid entries → cap = min(4, 2) = 2.
        let a = file(4, &[("q1", &["a", "b", "#", "z"])]);
        let b = file(4, &[("q1", &["b", "c", "#", "#"])]);
        let opts = RerankOptions {
            adaptive: true,
            ..RerankOptions::default()
        };
        let outcome = rerank_files(&[a, b], &opts);
        // z sits past the cap (and past a mid-row sentinel) in file A.
        assert!(!row(&outcome, "q1").contains(&"z".to_string()));
    }

    #[test]
    fn test_single_file_copy_through() {
        let a = file(3, &[("q1", &["a", "", "c"]), ("q2", &["x"])]);
        let outcome = rerank_files(&[a], &RerankOptions::default());
        assert_eq!(row(&outcome, "q1"), vec!["a", "#", "c"]);
        assert_eq!(row(&outcome, "q2"), vec!["x", "#", "#"]);
        assert_eq!(outcome.skipped_queries, 0);
    }

    #[test]
    fn test_output_width_defaults_to_widest_input() {
        let a = file(2, &[("q1", &["a", "b"])]);
        let b = file(5, &[("q1", &["b", "c", "d", "e", "f"])]);
        let outcome = rerank_files(&[a, b], &RerankOptions::default());
        assert_eq!(outcome.width, 5);
        assert_eq!(row(&outcome, "q1").len(), 5);
    }

    #[test]
    fn test_explicit_top_n_overrides_width() {
        let a = file(4, &[("q1", &["a", "b", "c", "d"])]);
        let b = file(4, &[("q1", &["a", "b", "c", "d"])]);
        let opts = RerankOptions {
            top_n: Some(2),
            ..RerankOptions::default()
        };
        let outcome = rerank_files(&[a, b], &opts);
        assert_eq!(outcome.width, 2);
        assert_eq!(row(&outcome, "q1"), vec!["a", "b"]);
    }

    #[test]
    fn test_fusing_identical_files_preserves_order() {
        let a = file(3, &[("q1", &["x", "y", "z"])]);
        let b = file(3, &[("q1", &["x", "y", "z"])]);
        let outcome = rerank_files(&[a, b], &RerankOptions::default());
        assert_eq!(row(&outcome, "q1"), vec!["x", "y", "z"]);
    }
}
