/// Search and fusion primitives
///
/// One fusion kernel serves every aggregation point in the system: fusing
/// query views inside a family, fusing families into the final list, and
/// the standalone file reranker. Both variants (reciprocal-rank fusion and
/// rank-ignorant weighted voting) share the accumulation loop; only the
/// per-occurrence contribution differs.

pub mod boost;
pub mod images;
pub mod text;

use std::collections::HashMap;

/// How ranked lists are combined.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FusionMethod {
    /// score(item) = Σ weight / (k + rank)
    Rrf { k: f64 },
    /// score(item) = Σ weight · [item ∈ list]
    Voting,
}

impl FusionMethod {
    fn contribution(self, weight: f64, rank: usize) -> f64 {
        match self {
            FusionMethod::Rrf { k } => weight / (k + rank as f64),
            FusionMethod::Voting => weight,
        }
    }
}

/// Fuse weighted ranked lists into a single descending-score list.
///
/// Lists with weight <= 0 are ignored entirely. Ties break by first-seen
/// insertion order across the input lists, which makes the output
/// deterministic for identical inputs.
pub fn fuse_ranked_lists<'a, I>(lists: I, method: FusionMethod) -> Vec<(String, f64)>
where
    I: IntoIterator<Item = (f64, &'a [String])>,
{
    fuse_rank_entries(
        lists.into_iter().map(|(weight, ids)| {
            let entries: Vec<(&str, usize)> = ids
                .iter()
                .enumerate()
                .map(|(idx, id)| (id.as_str(), idx + 1))
                .collect();
            (weight, entries)
        }),
        method,
    )
}

/// Rank-explicit variant of the fusion kernel, for sources where an item's
/// rank is not its position in a dense list (e.g. ranked-list files with
/// mid-row gaps).
pub fn fuse_rank_entries<'a, I>(lists: I, method: FusionMethod) -> Vec<(String, f64)>
where
    I: IntoIterator<Item = (f64, Vec<(&'a str, usize)>)>,
{
    let mut scores: HashMap<String, (f64, usize)> = HashMap::new();
    let mut next_seen = 0usize;

    for (weight, entries) in lists {
        if weight <= 0.0 {
            continue;
        }
        for (id, rank) in entries {
            let entry = scores.entry(id.to_string()).or_insert_with(|| {
                let seen = next_seen;
                next_seen += 1;
                (0.0, seen)
            });
            entry.0 += method.contribution(weight, rank);
        }
    }

    let mut fused: Vec<(String, f64, usize)> = scores
        .into_iter()
        .map(|(id, (score, seen))| (id, score, seen))
        .collect();
    fused.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.2.cmp(&b.2))
    });
    fused.into_iter().map(|(id, score, _)| (id, score)).collect()
}
