//! Search request DSL builders.
//!
//! Pure functions producing the JSON bodies sent to the search store, so
//! the exact query shapes stay unit-testable without a live cluster.

use serde_json::{json, Value};

use pagoda_core::defaults::{
    LEXICAL_MIN_SCORE, RECALL_FACTOR, RESCORE_QUERY_WEIGHT, RESCORE_RESCORE_WEIGHT,
};

/// Permission filter: owner, public, or scope tag within the caller's
/// effective set. An empty effective set matches nothing on the scope
/// branch, leaving owner/public as the only ways in.
pub fn permission_filter(user_db_id: &str, effective_tags: &[String]) -> Value {
    let scope_clause = match effective_tags.len() {
        0 => json!({ "match_none": {} }),
        1 => json!({ "term": { "orgTag": effective_tags[0] } }),
        _ => {
            let shoulds: Vec<Value> = effective_tags
                .iter()
                .map(|tag| json!({ "term": { "orgTag": tag } }))
                .collect();
            json!({ "bool": { "should": shoulds } })
        }
    };

    json!({
        "bool": {
            "should": [
                { "term": { "userId": user_db_id } },
                { "term": { "public": true } },
                scope_clause
            ]
        }
    })
}

fn rescore_clause(query: &str, window: usize) -> Value {
    json!({
        "window_size": window,
        "query": {
            "query_weight": RESCORE_QUERY_WEIGHT,
            "rescore_query_weight": RESCORE_RESCORE_WEIGHT,
            "rescore_query": {
                "match": {
                    "textContent": {
                        "query": query,
                        "operator": "AND"
                    }
                }
            }
        }
    })
}

/// Full hybrid request: kNN recall plus lexical match under the permission
/// filter, rescored over the recall window.
pub fn hybrid_request(query: &str, vector: &[f32], top_k: usize, filter: Value) -> Value {
    let recall_k = RECALL_FACTOR * top_k;
    json!({
        "knn": {
            "field": "vector",
            "query_vector": vector,
            "k": recall_k,
            "num_candidates": recall_k
        },
        "query": {
            "bool": {
                "must": [
                    { "match": { "textContent": query } }
                ],
                "filter": [ filter ]
            }
        },
        "rescore": rescore_clause(query, recall_k),
        "size": top_k
    })
}

/// Lexical-only request used when the embedding is unavailable or the
/// hybrid query failed: the kNN branch is dropped, the permission filter
/// stays, and a minimum score keeps noise out.
pub fn lexical_request(query: &str, top_k: usize, filter: Value) -> Value {
    json!({
        "query": {
            "bool": {
                "must": [
                    { "match": { "textContent": query } }
                ],
                "filter": [ filter ]
            }
        },
        "min_score": LEXICAL_MIN_SCORE,
        "size": top_k
    })
}

/// Unpermissioned hybrid request (internal diagnostics only).
pub fn unfiltered_hybrid_request(query: &str, vector: &[f32], top_k: usize) -> Value {
    let recall_k = RECALL_FACTOR * top_k;
    json!({
        "knn": {
            "field": "vector",
            "query_vector": vector,
            "k": recall_k,
            "num_candidates": recall_k
        },
        "query": {
            "match": { "textContent": query }
        },
        "rescore": rescore_clause(query, recall_k),
        "size": top_k
    })
}

/// Unpermissioned lexical request (internal diagnostics only).
pub fn unfiltered_lexical_request(query: &str, top_k: usize) -> Value {
    json!({
        "query": {
            "match": { "textContent": query }
        },
        "size": top_k
    })
}

/// Index mapping: keyword identity fields, the analyzed text field, and the
/// cosine dense vector sized to the deployment's embedding dimension.
pub fn index_mapping(dimension: usize) -> Value {
    json!({
        "mappings": {
            "properties": {
                "id":           { "type": "keyword" },
                "fileMd5":      { "type": "keyword" },
                "chunkId":      { "type": "integer" },
                "textContent":  { "type": "text" },
                "vector": {
                    "type": "dense_vector",
                    "dims": dimension,
                    "index": true,
                    "similarity": "cosine"
                },
                "modelVersion": { "type": "keyword" },
                "userId":       { "type": "keyword" },
                "orgTag":       { "type": "keyword" },
                "public":       { "type": "boolean" }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_tags_produce_match_none_scope() {
        let filter = permission_filter("42", &[]);
        let shoulds = filter["bool"]["should"].as_array().unwrap();
        assert_eq!(shoulds.len(), 3);
        assert!(shoulds[2].get("match_none").is_some());
    }

    #[test]
    fn single_tag_produces_term_scope() {
        let filter = permission_filter("42", &["DEFAULT".to_string()]);
        let shoulds = filter["bool"]["should"].as_array().unwrap();
        assert_eq!(shoulds[2]["term"]["orgTag"], "DEFAULT");
    }

    #[test]
    fn multiple_tags_produce_should_of_terms() {
        let tags = vec!["leaf".to_string(), "mid".to_string(), "root".to_string()];
        let filter = permission_filter("42", &tags);
        let scope = &filter["bool"]["should"][2];
        let inner = scope["bool"]["should"].as_array().unwrap();
        assert_eq!(inner.len(), 3);
        assert_eq!(inner[0]["term"]["orgTag"], "leaf");
    }

    #[test]
    fn owner_and_public_branches_always_present() {
        let filter = permission_filter("7", &["DEFAULT".to_string()]);
        let shoulds = filter["bool"]["should"].as_array().unwrap();
        assert_eq!(shoulds[0]["term"]["userId"], "7");
        assert_eq!(shoulds[1]["term"]["public"], true);
    }

    #[test]
    fn hybrid_request_shape() {
        let filter = permission_filter("42", &["DEFAULT".to_string()]);
        let body = hybrid_request("alpha beta", &[0.1, 0.2], 5, filter);

        assert_eq!(body["knn"]["field"], "vector");
        assert_eq!(body["knn"]["k"], 150);
        assert_eq!(body["knn"]["num_candidates"], 150);
        assert_eq!(body["size"], 5);
        assert_eq!(
            body["query"]["bool"]["must"][0]["match"]["textContent"],
            "alpha beta"
        );
        assert_eq!(body["rescore"]["window_size"], 150);
        assert_eq!(body["rescore"]["query"]["query_weight"], 0.2);
        assert_eq!(body["rescore"]["query"]["rescore_query_weight"], 1.0);
        assert_eq!(
            body["rescore"]["query"]["rescore_query"]["match"]["textContent"]["operator"],
            "AND"
        );
    }

    #[test]
    fn lexical_request_has_min_score_and_no_knn() {
        let filter = permission_filter("42", &[]);
        let body = lexical_request("alpha", 5, filter);
        assert!(body.get("knn").is_none());
        assert_eq!(body["min_score"], 0.3);
        assert_eq!(body["size"], 5);
    }

    #[test]
    fn mapping_uses_cosine_dense_vector() {
        let mapping = index_mapping(1024);
        let vector = &mapping["mappings"]["properties"]["vector"];
        assert_eq!(vector["type"], "dense_vector");
        assert_eq!(vector["dims"], 1024);
        assert_eq!(vector["similarity"], "cosine");
    }
}
