/// Ranked-list artifacts: CSV read/write, sentinel handling, diagnostics
///
/// Both pipeline stages and the standalone reranker speak one on-disk
/// dialect: a `query_id` column followed by `article_id_1..L` or
/// `image_id_1..L` columns, with `"#"` marking an absent rank slot.
/// Readers also accept the empty string as a sentinel; writers always emit
/// `"#"`. Output rows are sorted by query ID ascending.

use std::collections::HashMap;
use std::path::Path;

use chrono::Utc;
use regex::Regex;
use serde::Serialize;

use crate::errors::PipelineError;

/// Token marking "no result at this rank" in a CSV cell.
pub const SENTINEL: &str = "#";

/// True for cells that carry no result (`"#"` or blank).
pub fn is_sentinel(cell: &str) -> bool {
    let trimmed = cell.trim();
    trimmed.is_empty() || trimmed == SENTINEL
}

/// Which ID family a ranked-list file carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdKind {
    Article,
    Image,
}

impl IdKind {
    pub fn column_prefix(self) -> &'static str {
        match self {
            IdKind::Article => "article_id_",
            IdKind::Image => "image_id_",
        }
    }
}

/// An in-memory ranked-list file: per-query cells in column order, with
/// sentinels normalized to `"#"` and short rows padded out to `width`.
#[derive(Debug, Clone)]
pub struct RankedFile {
    pub width: usize,
    rows: HashMap<String, Vec<String>>,
}

impl RankedFile {
    pub fn new(width: usize) -> Self {
        RankedFile {
            width,
            rows: HashMap::new(),
        }
    }

    pub fn insert(&mut self, query_id: String, mut cells: Vec<String>) {
        cells.resize(self.width, SENTINEL.to_string());
        self.rows.insert(query_id, cells);
    }

    pub fn query_ids(&self) -> impl Iterator<Item = &String> {
        self.rows.keys()
    }

    pub fn cells(&self, query_id: &str) -> Option<&[String]> {
        self.rows.get(query_id).map(Vec::as_slice)
    }

    /// Valid IDs of a row: the cells left of the first sentinel.
    pub fn valid_prefix(&self, query_id: &str) -> &[String] {
        match self.cells(query_id) {
            Some(cells) => {
                let len = leading_valid_count(cells);
                &cells[..len]
            }
            None => &[],
        }
    }

    /// Whether the row exists and has at least one non-sentinel cell
    /// anywhere.
    pub fn has_any_valid(&self, query_id: &str) -> bool {
        self.cells(query_id)
            .map(|cells| cells.iter().any(|c| !is_sentinel(c)))
            .unwrap_or(false)
    }
}

/// Count of leading consecutive non-sentinel cells.
pub fn leading_valid_count(cells: &[String]) -> usize {
    cells.iter().take_while(|c| !is_sentinel(c)).count()
}

/// Parse a ranked-list CSV. ID columns are auto-detected by header
/// (`article_id_N` or `image_id_N`, in numeric order); other columns are
/// ignored. Missing trailing cells read as sentinels.
pub fn read_ranked_csv(path: &Path) -> Result<RankedFile, PipelineError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .map_err(|e| PipelineError::Artifact(format!("{}: {}", path.display(), e)))?;

    let headers = reader
        .headers()
        .map_err(|e| PipelineError::Artifact(format!("{}: {}", path.display(), e)))?
        .clone();

    let id_column = Regex::new(r"^(?:article|image)_id_(\d+)$")
        .map_err(|e| PipelineError::Internal(e.to_string()))?;

    let mut query_col = None;
    let mut id_cols: Vec<(usize, usize)> = Vec::new();
    for (idx, name) in headers.iter().enumerate() {
        if name == "query_id" {
            query_col = Some(idx);
        } else if let Some(caps) = id_column.captures(name) {
            let n: usize = caps[1].parse().unwrap_or(0);
            id_cols.push((n, idx));
        }
    }
    let query_col = query_col.ok_or_else(|| {
        PipelineError::Artifact(format!("{}: missing query_id column", path.display()))
    })?;
    if id_cols.is_empty() {
        return Err(PipelineError::Artifact(format!(
            "{}: no article_id_*/image_id_* columns",
            path.display()
        )));
    }
    id_cols.sort_by_key(|(n, _)| *n);

    let mut file = RankedFile::new(id_cols.len());
    for record in reader.records() {
        let record = record.map_err(|e| PipelineError::Artifact(format!("{}: {}", path.display(), e)))?;
        let query_id = match record.get(query_col) {
            Some(id) if !id.trim().is_empty() => id.trim().to_string(),
            _ => continue,
        };
        let cells = id_cols
            .iter()
            .map(|(_, idx)| {
                let cell = record.get(*idx).unwrap_or("");
                if is_sentinel(cell) {
                    SENTINEL.to_string()
                } else {
                    cell.trim().to_string()
                }
            })
            .collect();
        file.insert(query_id, cells);
    }
    Ok(file)
}

/// Write a ranked-list CSV with exactly `width` ID columns, rows sorted by
/// query ID, short rows padded with the sentinel.
pub fn write_ranked_csv(
    path: &Path,
    kind: IdKind,
    width: usize,
    rows: &HashMap<String, Vec<String>>,
) -> Result<(), PipelineError> {
    let mut writer = csv::Writer::from_path(path)
        .map_err(|e| PipelineError::Artifact(format!("{}: {}", path.display(), e)))?;

    let mut header = vec!["query_id".to_string()];
    for i in 1..=width {
        header.push(format!("{}{}", kind.column_prefix(), i));
    }
    writer
        .write_record(&header)
        .map_err(|e| PipelineError::Artifact(e.to_string()))?;

    let mut query_ids: Vec<&String> = rows.keys().collect();
    query_ids.sort();

    for query_id in query_ids {
        let ids = &rows[query_id];
        let mut record = Vec::with_capacity(width + 1);
        record.push(query_id.as_str());
        for i in 0..width {
            match ids.get(i) {
                Some(id) if !is_sentinel(id) => record.push(id.as_str()),
                _ => record.push(SENTINEL),
            }
        }
        writer
            .write_record(&record)
            .map_err(|e| PipelineError::Artifact(e.to_string()))?;
    }
    writer
        .flush()
        .map_err(|e| PipelineError::Artifact(e.to_string()))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Stage-1 diagnostic JSON
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct Stage1Article {
    pub rank: usize,
    pub article_id: String,
    pub score: f64,
}

#[derive(Debug, Serialize)]
pub struct Stage1Entry {
    pub query_id: String,
    pub articles: Vec<Stage1Article>,
}

#[derive(Debug, Serialize)]
pub struct Stage1Report {
    pub search_results: Vec<Stage1Entry>,
    pub files: HashMap<String, String>,
    pub pipeline_info: PipelineInfo,
}

#[derive(Debug, Serialize)]
pub struct PipelineInfo {
    pub search_type: String,
    pub top_k: usize,
    pub timestamp: String,
}

/// Write the stage-1 diagnostic JSON (not required by any downstream step).
pub fn write_stage1_json(
    path: &Path,
    entries: Vec<Stage1Entry>,
    files: HashMap<String, String>,
    top_k: usize,
) -> Result<(), PipelineError> {
    let report = Stage1Report {
        search_results: entries,
        files,
        pipeline_info: PipelineInfo {
            search_type: "entity_weighted_search".to_string(),
            top_k,
            timestamp: Utc::now().to_rfc3339(),
        },
    };
    let json = serde_json::to_string_pretty(&report)?;
    std::fs::write(path, json)?;
    Ok(())
}

/// Key–value dump of the effective run configuration.
pub fn write_config_dump(path: &Path, entries: &[(String, String)]) -> Result<(), PipelineError> {
    let mut out = String::new();
    out.push_str("=== SEARCH PIPELINE CONFIG ===\n");
    out.push_str(&format!("generated: {}\n\n", Utc::now().to_rfc3339()));
    for (key, value) in entries {
        out.push_str(&format!("{}: {}\n", key, value));
    }
    std::fs::write(path, out)?;
    Ok(())
}
