use super::*;

#[test]
fn cosine_similarity_basics() {
    assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
    assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
    assert!((cosine_similarity(&[1.0, 0.0], &[-2.0, 0.0]) + 1.0).abs() < 1e-6);
    assert!((cosine_similarity(&[3.0, 4.0], &[6.0, 8.0]) - 1.0).abs() < 1e-6);
}

#[test]
fn degenerate_vectors_score_zero() {
    assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0, 0.0, 0.0]), 0.0);
    assert_eq!(cosine_similarity(&[], &[]), 0.0);
}

#[test]
fn most_relevant_candidate_comes_first() {
    let query = [1.0, 0.0];
    let candidates = vec![vec![0.0, 1.0], vec![1.0, 0.1], vec![0.7, 0.7]];

    let picked = maximal_marginal_relevance(&query, &candidates, DEFAULT_LAMBDA, 1);
    assert_eq!(picked, vec![1]);
}

#[test]
fn duplicates_are_pushed_down() {
    let query = [1.0, 0.0, 0.0];
    let candidates = vec![
        vec![0.9, 0.1, 0.0],
        vec![0.9, 0.1, 0.0],
        vec![0.9, -0.3, 0.0],
    ];

    // Pure relevance keeps the duplicate second
    let relevance_only = maximal_marginal_relevance(&query, &candidates, 1.0, 2);
    assert_eq!(relevance_only, vec![0, 1]);

    // Balanced selection prefers the distinct candidate over the exact duplicate
    let diverse = maximal_marginal_relevance(&query, &candidates, DEFAULT_LAMBDA, 2);
    assert_eq!(diverse, vec![0, 2]);
}

#[test]
fn k_is_capped_by_candidates() {
    let candidates = vec![vec![1.0, 0.0], vec![0.0, 1.0]];
    let picked = maximal_marginal_relevance(&[1.0, 1.0], &candidates, DEFAULT_LAMBDA, 10);

    assert_eq!(picked.len(), 2);
    assert!(picked.contains(&0) && picked.contains(&1));
    assert!(maximal_marginal_relevance(&[1.0], &[], DEFAULT_LAMBDA, 4).is_empty());
    assert!(maximal_marginal_relevance(&[1.0, 0.0], &candidates, DEFAULT_LAMBDA, 0).is_empty());
}
