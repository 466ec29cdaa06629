//! Near-duplicate collapsing for scored results
//!
//! Results whose embeddings are at least `threshold` cosine-similar are
//! grouped (transitively) and only the best-scoring member of each group
//! survives. Ties go to the most recently created memory.

use std::cmp::Ordering;

use crate::memory::scoring::{ScoredMemory, cosine_similarity};

/// Minimal union-find over result indices
struct DisjointSet {
    parent: Vec<usize>,
}

impl DisjointSet {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra != rb {
            self.parent[rb] = ra;
        }
    }
}

/// Descending by final score, then newest first, then by id
pub fn rank_order(a: &ScoredMemory, b: &ScoredMemory) -> Ordering {
    b.score
        .final_score
        .total_cmp(&a.score.final_score)
        .then_with(|| b.memory.created_at.cmp(&a.memory.created_at))
        .then_with(|| a.memory.id.cmp(&b.memory.id))
}

/// Keep one representative per group of near-duplicates
///
/// Output is sorted by [`rank_order`].
pub fn deduplicate(results: Vec<ScoredMemory>, threshold: f32) -> Vec<ScoredMemory> {
    let n = results.len();
    if n < 2 {
        return results;
    }

    let mut groups = DisjointSet::new(n);
    for i in 0..n {
        for j in (i + 1)..n {
            let sim = cosine_similarity(&results[i].memory.embedding, &results[j].memory.embedding);
            if sim >= threshold {
                groups.union(i, j);
            }
        }
    }

    let mut best: Vec<Option<usize>> = vec![None; n];
    for i in 0..n {
        let root = groups.find(i);
        best[root] = match best[root] {
            Some(current) if rank_order(&results[current], &results[i]) != Ordering::Greater => {
                Some(current)
            }
            _ => Some(i),
        };
    }

    let keep: Vec<bool> = {
        let mut keep = vec![false; n];
        for idx in best.into_iter().flatten() {
            keep[idx] = true;
        }
        keep
    };

    let mut kept: Vec<ScoredMemory> = results
        .into_iter()
        .zip(keep)
        .filter_map(|(r, k)| k.then_some(r))
        .collect();
    kept.sort_by(rank_order);

    let dropped = n - kept.len();
    if dropped > 0 {
        tracing::debug!(dropped, kept = kept.len(), "Collapsed near-duplicate memories");
    }
    kept
}
