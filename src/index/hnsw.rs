//! Hierarchical Navigable Small World graph over unit vectors.
//!
//! Higher layers hold exponentially fewer nodes; a search descends greedily
//! from the top layer and finishes with a beam search of width `ef` on
//! layer 0. Vectors are L2-normalized by the embedder, so similarity is the
//! plain dot product.
//!
//! Nodes are addressed by insertion slot. Deletion only sets a flag: deleted
//! nodes still route searches but never appear in results. The owner
//! rebuilds the graph once too many slots are dead.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashSet};

/// Max-heap entry ordered by score.
#[derive(Debug, Clone, Copy)]
struct Scored {
    score: f32,
    slot: usize,
}

impl PartialEq for Scored {
    fn eq(&self, other: &Self) -> bool {
        self.score == other.score
    }
}

impl Eq for Scored {}

impl PartialOrd for Scored {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scored {
    fn cmp(&self, other: &Self) -> Ordering {
        // NaN compares equal
        self.score
            .partial_cmp(&other.score)
            .unwrap_or(Ordering::Equal)
    }
}

struct Node {
    vector: Vec<f32>,
    /// One neighbor list per layer, `0..=level`.
    neighbors: Vec<Vec<usize>>,
    deleted: bool,
}

pub struct Hnsw {
    m: usize,
    m_max0: usize,
    ef_construction: usize,
    level_mult: f32,
    nodes: Vec<Node>,
    entry_point: Option<usize>,
    level_max: usize,
    deleted: usize,
    rng_state: u64,
}

impl Hnsw {
    /// `m` is the neighbor budget per layer (doubled on layer 0).
    pub fn new(m: usize, ef_construction: usize) -> Self {
        let m = m.max(2);
        Self {
            m,
            m_max0: m * 2,
            ef_construction: ef_construction.max(1),
            level_mult: 1.0 / (m as f32).ln(),
            nodes: Vec::new(),
            entry_point: None,
            level_max: 0,
            deleted: 0,
            // Fixed seed: identical insert order builds an identical graph.
            rng_state: 42,
        }
    }

    /// Slots ever inserted, deleted ones included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn deleted_count(&self) -> usize {
        self.deleted
    }

    /// Insert `vector` and return its slot.
    pub fn insert(&mut self, vector: Vec<f32>) -> usize {
        let slot = self.nodes.len();
        let level = self.select_level();
        self.nodes.push(Node {
            vector,
            neighbors: vec![Vec::new(); level + 1],
            deleted: false,
        });

        let Some(mut ep) = self.entry_point else {
            self.entry_point = Some(slot);
            self.level_max = level;
            return slot;
        };

        let query = self.nodes[slot].vector.clone();

        // Phase 1: greedy descent through layers above the node's own
        let mut layer = self.level_max;
        while layer > level {
            ep = self.greedy_closest(ep, &query, layer);
            layer -= 1;
        }

        // Phase 2: connect on every layer from min(level, level_max) down to 0
        for lc in (0..=level.min(self.level_max)).rev() {
            let candidates = self.search_layer(ep, &query, self.ef_construction, lc);
            let limit = if lc == 0 { self.m_max0 } else { self.m };
            let selected: Vec<usize> = candidates
                .iter()
                .filter(|(id, _)| *id != slot)
                .take(limit)
                .map(|(id, _)| *id)
                .collect();

            for &neighbor in &selected {
                self.add_neighbor(neighbor, slot, lc);
                self.add_neighbor(slot, neighbor, lc);
            }
            for &neighbor in &selected {
                self.prune_neighbors(neighbor, lc, limit);
            }

            if let Some((best, _)) = candidates.first() {
                ep = *best;
            }
        }

        if level > self.level_max {
            self.entry_point = Some(slot);
            self.level_max = level;
        }

        slot
    }

    pub fn delete(&mut self, slot: usize) {
        if let Some(node) = self.nodes.get_mut(slot) {
            if !node.deleted {
                node.deleted = true;
                self.deleted += 1;
            }
        }
    }

    /// Up to `k` live slots most similar to `query`, best first.
    pub fn search(&self, query: &[f32], k: usize, ef: usize) -> Vec<(usize, f32)> {
        let Some(mut ep) = self.entry_point else {
            return Vec::new();
        };
        if k == 0 {
            return Vec::new();
        }

        let mut layer = self.level_max;
        while layer > 0 {
            ep = self.greedy_closest(ep, query, layer);
            layer -= 1;
        }

        // Widen the beam by the number of dead slots it may have to skip.
        let ef = ef.max(k) + self.deleted.min(self.nodes.len());
        self.search_layer(ep, query, ef, 0)
            .into_iter()
            .filter(|(slot, _)| !self.nodes[*slot].deleted)
            .take(k)
            .collect()
    }

    /// Level for a new node: floor(-ln(U) / ln(m)), from a seeded LCG.
    fn select_level(&mut self) -> usize {
        self.rng_state = self
            .rng_state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1);
        let r = ((self.rng_state >> 33) as f32 / (u32::MAX >> 1) as f32).clamp(1e-7, 1.0);
        let level = (-r.ln() * self.level_mult).floor() as usize;
        level.min(16)
    }

    fn similarity(&self, slot: usize, query: &[f32]) -> f32 {
        self.nodes[slot]
            .vector
            .iter()
            .zip(query)
            .map(|(a, b)| a * b)
            .sum()
    }

    fn greedy_closest(&self, entry: usize, query: &[f32], layer: usize) -> usize {
        let mut current = entry;
        let mut current_sim = self.similarity(current, query);

        loop {
            let mut changed = false;
            if let Some(neighbors) = self.nodes[current].neighbors.get(layer) {
                for &n in neighbors {
                    let sim = self.similarity(n, query);
                    if sim > current_sim {
                        current = n;
                        current_sim = sim;
                        changed = true;
                    }
                }
            }
            if !changed {
                return current;
            }
        }
    }

    /// Beam search on one layer; returns up to `ef` slots sorted by
    /// similarity, descending. Deleted slots are included.
    fn search_layer(&self, entry: usize, query: &[f32], ef: usize, layer: usize) -> Vec<(usize, f32)> {
        let mut visited: HashSet<usize> = HashSet::new();
        let mut candidates: BinaryHeap<Scored> = BinaryHeap::new();
        let mut results: BinaryHeap<Reverse<Scored>> = BinaryHeap::new();

        let first = Scored {
            score: self.similarity(entry, query),
            slot: entry,
        };
        visited.insert(entry);
        candidates.push(first);
        results.push(Reverse(first));

        while let Some(current) = candidates.pop() {
            let worst = results.peek().map(|r| r.0.score).unwrap_or(f32::NEG_INFINITY);
            if current.score < worst && results.len() >= ef {
                break;
            }

            let Some(neighbors) = self.nodes[current.slot].neighbors.get(layer) else {
                continue;
            };
            for &n in neighbors {
                if !visited.insert(n) {
                    continue;
                }
                let scored = Scored {
                    score: self.similarity(n, query),
                    slot: n,
                };
                let worst = results.peek().map(|r| r.0.score).unwrap_or(f32::NEG_INFINITY);
                if scored.score > worst || results.len() < ef {
                    candidates.push(scored);
                    results.push(Reverse(scored));
                    if results.len() > ef {
                        results.pop();
                    }
                }
            }
        }

        let mut out: Vec<(usize, f32)> = results
            .into_iter()
            .map(|r| (r.0.slot, r.0.score))
            .collect();
        out.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
        out
    }

    fn add_neighbor(&mut self, from: usize, to: usize, layer: usize) {
        let node = &mut self.nodes[from];
        while node.neighbors.len() <= layer {
            node.neighbors.push(Vec::new());
        }
        if !node.neighbors[layer].contains(&to) {
            node.neighbors[layer].push(to);
        }
    }

    /// Keep only the `max` most similar neighbors of `slot` on `layer`.
    fn prune_neighbors(&mut self, slot: usize, layer: usize, max: usize) {
        let neighbors = match self.nodes[slot].neighbors.get(layer) {
            Some(n) if n.len() > max => n.clone(),
            _ => return,
        };
        let base = self.nodes[slot].vector.clone();
        let mut scored: Vec<(usize, f32)> = neighbors
            .into_iter()
            .map(|n| (n, self.similarity(n, &base)))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
        self.nodes[slot].neighbors[layer] = scored.into_iter().take(max).map(|(n, _)| n).collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::l2_normalize;

    /// Deterministic pseudo-random unit vectors.
    fn vectors(n: usize, dims: usize) -> Vec<Vec<f32>> {
        let mut state = 7u64;
        (0..n)
            .map(|_| {
                let mut v: Vec<f32> = (0..dims)
                    .map(|_| {
                        state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                        ((state >> 40) as f32 / (1u64 << 24) as f32) - 0.5
                    })
                    .collect();
                l2_normalize(&mut v);
                v
            })
            .collect()
    }

    fn brute_force(data: &[Vec<f32>], query: &[f32], k: usize) -> Vec<usize> {
        let mut scored: Vec<(usize, f32)> = data
            .iter()
            .enumerate()
            .map(|(i, v)| (i, v.iter().zip(query).map(|(a, b)| a * b).sum()))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap());
        scored.into_iter().take(k).map(|(i, _)| i).collect()
    }

    #[test]
    fn level_distribution_decays() {
        let mut hnsw = Hnsw::new(16, 100);
        let mut levels = [0u32; 17];
        for _ in 0..10_000 {
            levels[hnsw.select_level()] += 1;
        }
        assert!(levels[0] > 5000);
        assert!(levels[0] > levels[1]);
    }

    #[test]
    fn exact_match_ranks_first() {
        let data = vectors(300, 16);
        let mut hnsw = Hnsw::new(8, 64);
        for v in &data {
            hnsw.insert(v.clone());
        }
        for probe in [0, 57, 299] {
            let hits = hnsw.search(&data[probe], 1, 32);
            assert_eq!(hits[0].0, probe);
            assert!((hits[0].1 - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn recall_against_brute_force() {
        let data = vectors(500, 24);
        let mut hnsw = Hnsw::new(16, 100);
        for v in &data {
            hnsw.insert(v.clone());
        }
        let queries = vectors(20, 24);
        let mut found = 0;
        for q in &queries {
            let truth = brute_force(&data, q, 10);
            let hits: Vec<usize> = hnsw.search(q, 10, 100).into_iter().map(|(s, _)| s).collect();
            found += truth.iter().filter(|t| hits.contains(t)).count();
        }
        assert!(found as f32 / 200.0 > 0.9, "recall {}", found);
    }

    #[test]
    fn deleted_slots_never_returned() {
        let data = vectors(50, 8);
        let mut hnsw = Hnsw::new(4, 32);
        for v in &data {
            hnsw.insert(v.clone());
        }
        hnsw.delete(10);
        hnsw.delete(10);
        assert_eq!(hnsw.deleted_count(), 1);
        let hits = hnsw.search(&data[10], 50, 64);
        assert!(hits.iter().all(|(s, _)| *s != 10));
    }

    #[test]
    fn scores_descend() {
        let data = vectors(100, 8);
        let mut hnsw = Hnsw::new(8, 50);
        for v in &data {
            hnsw.insert(v.clone());
        }
        let hits = hnsw.search(&data[3], 10, 50);
        assert!(hits.windows(2).all(|w| w[0].1 >= w[1].1));
    }
}
