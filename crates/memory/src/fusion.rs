//! Reciprocal rank fusion
//!
//! score(c) = Σᵢ 1/(k + rankᵢ(c)) over the input lists; a candidate absent
//! from a list contributes nothing for that list. Commutative in the list
//! order, and fusing a single list reduces to 1/(k + rank).

use std::collections::HashMap;

/// Fuse ranked id lists into a single ranking, best first.
///
/// Ranks are 1-based. Returns (id, fused_score) sorted descending with a
/// stable id tiebreak.
pub fn rrf_fuse(lists: &[Vec<String>], k: f32) -> Vec<(String, f32)> {
    let mut scores: HashMap<String, f32> = HashMap::new();

    for list in lists {
        for (i, id) in list.iter().enumerate() {
            let rank = (i + 1) as f32;
            *scores.entry(id.clone()).or_insert(0.0) += 1.0 / (k + rank);
        }
    }

    let mut fused: Vec<(String, f32)> = scores.into_iter().collect();
    fused.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    fused
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn single_list_reduces_to_reciprocal_rank() {
        let fused = rrf_fuse(&[ids(&["a", "b", "c"])], 60.0);
        assert_eq!(fused[0].0, "a");
        assert!((fused[0].1 - 1.0 / 61.0).abs() < 1e-6);
        assert!((fused[1].1 - 1.0 / 62.0).abs() < 1e-6);
        assert!((fused[2].1 - 1.0 / 63.0).abs() < 1e-6);
    }

    #[test]
    fn fusion_is_commutative_in_list_order() {
        let dense = ids(&["a", "b", "c"]);
        let sparse = ids(&["c", "a", "d"]);
        let ab = rrf_fuse(&[dense.clone(), sparse.clone()], 60.0);
        let ba = rrf_fuse(&[sparse, dense], 60.0);
        assert_eq!(ab, ba);
    }

    #[test]
    fn candidate_in_both_lists_outranks_single_list() {
        let fused = rrf_fuse(&[ids(&["a", "b"]), ids(&["b", "c"])], 60.0);
        assert_eq!(fused[0].0, "b");
    }

    #[test]
    fn unlisted_rank_contributes_zero() {
        let fused = rrf_fuse(&[ids(&["a"]), ids(&[])], 60.0);
        assert_eq!(fused.len(), 1);
        assert!((fused[0].1 - 1.0 / 61.0).abs() < 1e-6);
    }
}
