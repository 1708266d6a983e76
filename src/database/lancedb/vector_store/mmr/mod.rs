// Maximal marginal relevance re-ranking

#[cfg(test)]
mod tests;

/// Weight of query relevance against diversity; 1.0 is pure similarity
pub const DEFAULT_LAMBDA: f32 = 0.5;

/// Candidates fetched from the index before re-ranking
pub const DEFAULT_FETCH_K: usize = 20;

/// Chunks returned after re-ranking
pub const DEFAULT_K: usize = 4;

/// Cosine similarity in `[-1, 1]`. Mismatched lengths and zero vectors score 0.
#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let (dot, norm_a, norm_b) = a
        .iter()
        .zip(b)
        .fold((0.0_f32, 0.0_f32, 0.0_f32), |(dot, na, nb), (x, y)| {
            (x.mul_add(*y, dot), x.mul_add(*x, na), y.mul_add(*y, nb))
        });

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < 1e-10 { 0.0 } else { dot / denom }
}

/// Pick up to `k` candidate indices, balancing similarity to `query` against
/// similarity to the candidates already picked.
///
/// The most similar candidate is always first. Ties keep the earlier index.
#[inline]
pub fn maximal_marginal_relevance(
    query: &[f32],
    candidates: &[Vec<f32>],
    lambda: f32,
    k: usize,
) -> Vec<usize> {
    let k = k.min(candidates.len());
    if k == 0 {
        return Vec::new();
    }

    let relevance: Vec<f32> = candidates
        .iter()
        .map(|candidate| cosine_similarity(query, candidate))
        .collect();

    let mut selected: Vec<usize> = Vec::with_capacity(k);
    while selected.len() < k {
        let mut best: Option<(usize, f32)> = None;

        for (index, candidate) in candidates.iter().enumerate() {
            if selected.contains(&index) {
                continue;
            }

            let redundancy = selected
                .iter()
                .map(|&chosen| cosine_similarity(candidate, &candidates[chosen]))
                .fold(f32::NEG_INFINITY, f32::max);
            let redundancy = if selected.is_empty() { 0.0 } else { redundancy };

            let score = lambda.mul_add(relevance[index], -(1.0 - lambda) * redundancy);
            if best.is_none_or(|(_, best_score)| score > best_score) {
                best = Some((index, score));
            }
        }

        match best {
            Some((index, _)) => selected.push(index),
            None => break,
        }
    }

    selected
}
