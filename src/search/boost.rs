/// Rank-aware score boosting for the image stage
///
/// An image's vector similarity is combined with the stage-1 rank of its
/// article. The sigmoid form gives a bounded, smooth interaction: strong
/// visual matches earn a boost even from poorly-ranked articles, while a
/// good article rank cannot rescue a weak match. A hard similarity floor
/// keeps near-random matches unboosted.
///
/// All functions are pure; parameters come from `BoostSettings`.

use crate::config::BoostSettings;

/// Article rank assigned to images whose article is absent from the
/// stage-1 list.
pub const NO_ARTICLE_RANK: u32 = 999;

/// Boost for one (similarity, article_rank) pair.
///
/// Sigmoid mode: σ(Ws·s − Wr·ln r + b) · M, zero below the similarity
/// floor. Simple mode: C / r.
pub fn rank_boost(settings: &BoostSettings, similarity: f64, article_rank: u32) -> f64 {
    let rank = article_rank.max(1) as f64;

    if !settings.use_sigmoid {
        return settings.simple_factor / rank;
    }

    if similarity < settings.similarity_floor {
        return 0.0;
    }

    let input = settings.similarity_weight * similarity
        - settings.rank_weight * rank.ln()
        + settings.bias;
    // exp() saturates to ±inf in f64, so extreme inputs settle at 0 or 1
    // without special-casing.
    let sigmoid = 1.0 / (1.0 + (-input).exp());
    sigmoid * settings.max_boost
}

/// Final per-image score: similarity plus its boost.
pub fn boosted_score(settings: &BoostSettings, similarity: f64, article_rank: u32) -> f64 {
    similarity + rank_boost(settings, similarity, article_rank)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sigmoid_settings() -> BoostSettings {
        BoostSettings::default()
    }

    #[test]
    fn test_floor_blocks_boost_entirely() {
        let settings = sigmoid_settings();
        for rank in [1, 2, 10, NO_ARTICLE_RANK] {
            assert_eq!(rank_boost(&settings, 0.40, rank), 0.0);
            assert_eq!(boosted_score(&settings, 0.40, rank), 0.40);
        }
        assert_eq!(rank_boost(&settings, 0.4999, 1), 0.0);
    }

    #[test]
    fn test_boost_is_bounded_by_max() {
        let settings = sigmoid_settings();
        let boost = rank_boost(&settings, 1.0, 1);
        assert!(boost > 0.0);
        assert!(boost <= settings.max_boost);
    }

    #[test]
    fn test_boost_decreases_with_article_rank() {
        let settings = sigmoid_settings();
        let top = rank_boost(&settings, 0.8, 1);
        let mid = rank_boost(&settings, 0.8, 5);
        let deep = rank_boost(&settings, 0.8, 100);
        assert!(top >= mid);
        assert!(mid >= deep);
    }

    #[test]
    fn test_boost_increases_with_similarity() {
        let settings = sigmoid_settings();
        let weak = rank_boost(&settings, 0.55, 3);
        let strong = rank_boost(&settings, 0.95, 3);
        assert!(strong >= weak);
    }

    #[test]
    fn test_extreme_inputs_saturate() {
        let settings = BoostSettings {
            similarity_weight: 1e6,
            ..sigmoid_settings()
        };
        let boost = rank_boost(&settings, 1.0, 1);
        assert!((boost - settings.max_boost).abs() < 1e-9);

        let settings = BoostSettings {
            rank_weight: 1e6,
            ..sigmoid_settings()
        };
        let boost = rank_boost(&settings, 0.9, NO_ARTICLE_RANK);
        assert!(boost >= 0.0);
        assert!(boost < 1e-9);
    }

    #[test]
    fn test_simple_mode_falls_off_with_rank() {
        let settings = BoostSettings {
            use_sigmoid: false,
            simple_factor: 0.3,
            ..BoostSettings::default()
        };
        assert!((rank_boost(&settings, 0.1, 1) - 0.3).abs() < 1e-12);
        assert!((rank_boost(&settings, 0.9, 3) - 0.1).abs() < 1e-12);
        // Simple mode has no similarity floor.
        assert!(rank_boost(&settings, 0.0, 2) > 0.0);
    }

    #[test]
    fn test_rank_zero_treated_as_top() {
        let settings = sigmoid_settings();
        assert_eq!(
            rank_boost(&settings, 0.8, 0),
            rank_boost(&settings, 0.8, 1)
        );
    }
}
