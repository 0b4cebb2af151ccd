/// Entity scoring query builder
///
/// Builds the nested function-score query that implements the stage-1
/// scoring model: per entity, the best of exact / fuzzy / prefix matching
/// scaled by the label weight, plus a same-label bonus clause at 1.3x.
/// Article score is the sum over entity clauses (bool should, at least one
/// required).

use serde_json::{json, Value};

use crate::entity::{Entity, EntityWeights};

/// Inner boost for an exact keyword match on the entity text.
const EXACT_BOOST: f64 = 5.0;
/// Inner boost for the fuzzy text match (automatic edit distance).
const FUZZY_BOOST: f64 = 2.0;
/// Inner boost for the lower-cased prefix match.
const PREFIX_BOOST: f64 = 1.5;
/// Multiplier applied to the label weight for the same-label bonus clause.
const SAME_LABEL_BONUS: f64 = 1.3;

/// Build the full search body for one query's entities.
///
/// Returns None when no entity has usable text (the caller treats that as
/// an empty result, not an error).
pub fn entity_search_body(
    entities: &[Entity],
    weights: &EntityWeights,
    top_k: usize,
) -> Option<Value> {
    let mut should = Vec::new();

    for entity in entities {
        let text = entity.text.trim();
        if text.is_empty() {
            continue;
        }
        let weight = weights.weight_for(&entity.label);

        should.push(weighted_clause(text_match_clause(text), weight));

        if !entity.label.is_empty() {
            should.push(weighted_clause(
                same_label_clause(text, &entity.label),
                weight * SAME_LABEL_BONUS,
            ));
        }
    }

    if should.is_empty() {
        return None;
    }

    Some(json!({
        "query": {
            "bool": {
                "should": should,
                "minimum_should_match": 1
            }
        },
        "size": top_k,
        "_source": ["article_id", "entities"]
    }))
}

/// Best-of exact / fuzzy / prefix match against the nested entity text.
fn text_match_clause(text: &str) -> Value {
    json!({
        "nested": {
            "path": "entities",
            "query": {
                "bool": {
                    "should": [
                        {
                            "term": {
                                "entities.text.keyword": {
                                    "value": text,
                                    "boost": EXACT_BOOST
                                }
                            }
                        },
                        {
                            "match": {
                                "entities.text": {
                                    "query": text,
                                    "boost": FUZZY_BOOST,
                                    "fuzziness": "AUTO"
                                }
                            }
                        },
                        {
                            "prefix": {
                                "entities.text.keyword": {
                                    "value": text.to_lowercase(),
                                    "boost": PREFIX_BOOST
                                }
                            }
                        }
                    ]
                }
            },
            "score_mode": "max"
        }
    })
}

/// Text match constrained to the same entity label.
fn same_label_clause(text: &str, label: &str) -> Value {
    json!({
        "nested": {
            "path": "entities",
            "query": {
                "bool": {
                    "must": [
                        {"match": {"entities.text": text}},
                        {"term": {"entities.label": label}}
                    ]
                }
            },
            "score_mode": "max"
        }
    })
}

/// Scale a clause by a label weight via function_score.
fn weighted_clause(query: Value, weight: f64) -> Value {
    json!({
        "function_score": {
            "query": query,
            "boost": weight,
            "boost_mode": "multiply"
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clause_boost(clause: &Value) -> f64 {
        clause["function_score"]["boost"].as_f64().unwrap()
    }

    #[test]
    fn test_empty_entities_yield_no_body() {
        let weights = EntityWeights::default();
        assert!(entity_search_body(&[], &weights, 10).is_none());
        let blank = vec![Entity::new("   ", "PERSON")];
        assert!(entity_search_body(&blank, &weights, 10).is_none());
    }

    #[test]
    fn test_clause_weights_follow_label_table() {
        // DATE outweighs PERSON under this table, so the DATE entity's
        // clause must carry the larger boost.
        let weights: EntityWeights =
            serde_json::from_str(r#"{"PERSON": 0.5, "DATE": 5.0, "DEFAULT": 1.0}"#).unwrap();
        let entities = vec![Entity::new("Messi", "PERSON"), Entity::new("2018", "DATE")];
        let body = entity_search_body(&entities, &weights, 10).unwrap();

        let should = body["query"]["bool"]["should"].as_array().unwrap();
        // Two clauses per labeled entity: text match + same-label bonus.
        assert_eq!(should.len(), 4);
        assert_eq!(clause_boost(&should[0]), 0.5);
        assert_eq!(clause_boost(&should[2]), 5.0);
        assert!(clause_boost(&should[2]) > clause_boost(&should[0]));
    }

    #[test]
    fn test_same_label_bonus_multiplier() {
        let weights: EntityWeights =
            serde_json::from_str(r#"{"PERSON": 1.0, "DEFAULT": 1.0}"#).unwrap();
        let entities = vec![Entity::new("Messi", "PERSON")];
        let body = entity_search_body(&entities, &weights, 10).unwrap();

        let should = body["query"]["bool"]["should"].as_array().unwrap();
        assert_eq!(should.len(), 2);
        assert_eq!(clause_boost(&should[0]), 1.0);
        assert!((clause_boost(&should[1]) - 1.3).abs() < 1e-12);

        // The bonus clause requires both the text and the exact label.
        let musts = should[1]["function_score"]["query"]["nested"]["query"]["bool"]["must"]
            .as_array()
            .unwrap();
        assert_eq!(musts.len(), 2);
        assert_eq!(musts[1]["term"]["entities.label"], "PERSON");
    }

    #[test]
    fn test_unlabeled_entity_gets_no_bonus_clause() {
        let weights = EntityWeights::default();
        let entities = vec![Entity::new("Messi", "")];
        let body = entity_search_body(&entities, &weights, 10).unwrap();
        let should = body["query"]["bool"]["should"].as_array().unwrap();
        assert_eq!(should.len(), 1);
    }

    #[test]
    fn test_inner_matcher_boosts() {
        let weights = EntityWeights::default();
        let entities = vec![Entity::new("Stadium", "FAC")];
        let body = entity_search_body(&entities, &weights, 5).unwrap();

        let inner = &body["query"]["bool"]["should"][0]["function_score"]["query"]["nested"];
        assert_eq!(inner["score_mode"], "max");
        let matchers = inner["query"]["bool"]["should"].as_array().unwrap();
        assert_eq!(
            matchers[0]["term"]["entities.text.keyword"]["boost"].as_f64(),
            Some(5.0)
        );
        assert_eq!(
            matchers[1]["match"]["entities.text"]["boost"].as_f64(),
            Some(2.0)
        );
        assert_eq!(
            matchers[2]["prefix"]["entities.text.keyword"]["value"],
            "stadium"
        );
        assert_eq!(
            matchers[2]["prefix"]["entities.text.keyword"]["boost"].as_f64(),
            Some(1.5)
        );
        assert_eq!(body["query"]["bool"]["minimum_should_match"], 1);
        assert_eq!(body["size"], 5);
    }
}
