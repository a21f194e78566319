//! # Vector indexes
//!
//! The [`VectorIndex`] contract and two implementations:
//!
//! - [`FlatIndex`]: exact Euclidean scan. Small, deterministic, the default.
//! - [`HnswIndex`]: a [HNSW](https://arxiv.org/abs/1603.09320) graph from the
//!   `hora` crate, used to pick candidates that are then re-ranked exactly.
//!   Approximate: a true neighbor can be missed on large collections.
//!
//! Both rank by `(distance, id)`, so two records at the same distance from a
//! query always come back in insertion order.

use hora::core::ann_index::ANNIndex;
use hora::core::metrics::Metric;
use hora::index::hnsw_idx::HNSWIndex;
use hora::index::hnsw_params::HNSWParams;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::debug;

use crate::error::IndexError;

/// HNSW candidates fetched per requested neighbor before exact re-ranking.
const HNSW_OVERSAMPLE: usize = 4;

/// One search hit: record id plus its Euclidean distance to the query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub id: u64,
    pub distance: f32,
}

/// Nearest-neighbor index over `(id, vector)` pairs of one collection.
///
/// Ids are assigned by the caller and are increasing; indexes never mutate or
/// remove entries.
pub trait VectorIndex: Send + Sync {
    fn dimension(&self) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert(&mut self, id: u64, vector: &[f32]) -> Result<(), IndexError>;

    /// Up to `top_k` neighbors, closest first, ties broken by smaller id.
    fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<Neighbor>, IndexError>;
}

/// Which [`VectorIndex`] new collections are built with.
#[derive(Serialize, Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    #[default]
    Flat,
    Hnsw,
}

impl IndexKind {
    pub fn build(self, dimension: usize) -> Box<dyn VectorIndex> {
        match self {
            IndexKind::Flat => Box::new(FlatIndex::new(dimension)),
            IndexKind::Hnsw => Box::new(HnswIndex::new(dimension)),
        }
    }
}

/// Euclidean distance between two equal-length vectors.
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f32>()
        .sqrt()
}

fn by_distance_then_id(a: &Neighbor, b: &Neighbor) -> Ordering {
    a.distance
        .total_cmp(&b.distance)
        .then_with(|| a.id.cmp(&b.id))
}

/// Exact `(distance, id)` ranking of every entry.
fn exact_scan(entries: &[(u64, Vec<f32>)], query: &[f32], top_k: usize) -> Vec<Neighbor> {
    let mut hits: Vec<Neighbor> = entries
        .iter()
        .map(|(id, vector)| Neighbor {
            id: *id,
            distance: euclidean_distance(query, vector),
        })
        .collect();
    hits.sort_by(by_distance_then_id);
    hits.truncate(top_k);
    hits
}

fn check_dimension(expected: usize, vector: &[f32]) -> Result<(), IndexError> {
    if vector.len() != expected {
        return Err(IndexError::DimensionMismatch {
            expected,
            actual: vector.len(),
        });
    }
    Ok(())
}

/// Brute-force exact index.
#[derive(Debug, Clone)]
pub struct FlatIndex {
    dimension: usize,
    entries: Vec<(u64, Vec<f32>)>,
}

impl FlatIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            entries: Vec::new(),
        }
    }
}

impl VectorIndex for FlatIndex {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn insert(&mut self, id: u64, vector: &[f32]) -> Result<(), IndexError> {
        check_dimension(self.dimension, vector)?;
        self.entries.push((id, vector.to_vec()));
        Ok(())
    }

    fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<Neighbor>, IndexError> {
        check_dimension(self.dimension, query)?;
        Ok(exact_scan(&self.entries, query, top_k))
    }
}

/// HNSW candidate generation with exact re-ranking.
///
/// Inserts only invalidate the graph; it is rebuilt from all vectors on the
/// next search, so a burst of inserts (e.g. hydration) costs one build. When
/// the oversampled candidate count covers the whole index the graph is
/// skipped and every entry is ranked exactly.
pub struct HnswIndex {
    dimension: usize,
    entries: Vec<(u64, Vec<f32>)>,
    graph: RwLock<Option<HNSWIndex<f32, usize>>>,
}

impl HnswIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            entries: Vec::new(),
            graph: RwLock::new(None),
        }
    }

    /// Graph keyed by position in `entries`.
    fn build_graph(&self) -> Result<HNSWIndex<f32, usize>, IndexError> {
        let mut graph = HNSWIndex::new(self.dimension, &HNSWParams::default());
        for (position, (_, vector)) in self.entries.iter().enumerate() {
            graph
                .add(vector, position)
                .map_err(|e| IndexError::Backend(e.to_string()))?;
        }
        graph
            .build(Metric::Euclidean)
            .map_err(|e| IndexError::Backend(e.to_string()))?;
        debug!("Built HNSW graph over {} vectors", self.entries.len());
        Ok(graph)
    }
}

impl VectorIndex for HnswIndex {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn insert(&mut self, id: u64, vector: &[f32]) -> Result<(), IndexError> {
        check_dimension(self.dimension, vector)?;
        self.entries.push((id, vector.to_vec()));
        *self.graph.get_mut() = None;
        Ok(())
    }

    fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<Neighbor>, IndexError> {
        check_dimension(self.dimension, query)?;
        if self.entries.is_empty() {
            return Ok(Vec::new());
        }

        let fetch = top_k.saturating_mul(HNSW_OVERSAMPLE);
        if fetch >= self.entries.len() {
            return Ok(exact_scan(&self.entries, query, top_k));
        }

        if self.graph.read().is_none() {
            let mut graph = self.graph.write();
            if graph.is_none() {
                *graph = Some(self.build_graph()?);
            }
        }

        let candidates = match self.graph.read().as_ref() {
            Some(graph) => graph.search(query, fetch),
            None => Vec::new(),
        };

        let mut hits: Vec<Neighbor> = candidates
            .into_iter()
            .filter_map(|position| self.entries.get(position))
            .map(|(id, vector)| Neighbor {
                id: *id,
                distance: euclidean_distance(query, vector),
            })
            .collect();
        hits.sort_by(by_distance_then_id);
        hits.dedup_by_key(|hit| hit.id);
        hits.truncate(top_k);
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ids(hits: &[Neighbor]) -> Vec<u64> {
        hits.iter().map(|h| h.id).collect()
    }

    #[test]
    fn flat_index_ranks_by_distance() {
        let mut index = FlatIndex::new(2);
        index.insert(0, &[10.0, 10.0]).unwrap();
        index.insert(1, &[1.0, 0.0]).unwrap();
        index.insert(2, &[3.0, 0.0]).unwrap();

        let hits = index.search(&[0.0, 0.0], 2).unwrap();
        assert_eq!(ids(&hits), vec![1, 2]);
        assert_eq!(hits[0].distance, 1.0);
    }

    #[test]
    fn flat_index_breaks_ties_by_insertion_order() {
        let mut index = FlatIndex::new(2);
        index.insert(0, &[0.0, 1.0]).unwrap();
        index.insert(1, &[1.0, 0.0]).unwrap();
        index.insert(2, &[0.0, -1.0]).unwrap();

        let hits = index.search(&[0.0, 0.0], 3).unwrap();
        assert_eq!(ids(&hits), vec![0, 1, 2]);
    }

    #[test]
    fn flat_index_returns_everything_when_top_k_exceeds_len() {
        let mut index = FlatIndex::new(1);
        index.insert(0, &[2.0]).unwrap();
        index.insert(1, &[1.0]).unwrap();

        let hits = index.search(&[0.0], 10).unwrap();
        assert_eq!(ids(&hits), vec![1, 0]);
    }

    #[test]
    fn indexes_reject_wrong_dimension() {
        let mut index = FlatIndex::new(3);
        assert!(matches!(
            index.insert(0, &[1.0]),
            Err(IndexError::DimensionMismatch {
                expected: 3,
                actual: 1
            })
        ));
        assert!(index.search(&[1.0, 2.0], 1).is_err());
        assert!(index.is_empty());
    }

    #[test]
    fn empty_hnsw_index_returns_nothing() {
        let index = IndexKind::Hnsw.build(4);
        assert!(index.search(&[0.0; 4], 3).unwrap().is_empty());
    }

    #[test]
    fn hnsw_index_sees_records_inserted_after_a_search() {
        let mut index = HnswIndex::new(2);
        index.insert(0, &[5.0, 5.0]).unwrap();
        assert_eq!(ids(&index.search(&[0.0, 0.0], 1).unwrap()), vec![0]);

        index.insert(1, &[0.0, 0.5]).unwrap();
        assert_eq!(ids(&index.search(&[0.0, 0.0], 2).unwrap()), vec![1, 0]);
    }

    #[test]
    fn hnsw_index_returns_everything_in_tie_order_when_top_k_covers_it() {
        let mut index = HnswIndex::new(2);
        index.insert(0, &[0.0, 1.0]).unwrap();
        index.insert(1, &[1.0, 0.0]).unwrap();
        index.insert(2, &[0.0, -1.0]).unwrap();
        index.insert(3, &[3.0, 0.0]).unwrap();

        let hits = index.search(&[0.0, 0.0], 4).unwrap();
        assert_eq!(ids(&hits), vec![0, 1, 2, 3]);
        assert!(index.graph.read().is_none());
    }

    #[test]
    fn hnsw_index_uses_the_graph_for_large_collections() {
        let mut index = HnswIndex::new(2);
        for id in 0..20u64 {
            index.insert(id, &[id as f32, 0.0]).unwrap();
        }

        let hits = index.search(&[0.0, 0.0], 1).unwrap();
        assert_eq!(hits.len(), 1);
        assert!(index.graph.read().is_some());
    }

    #[test]
    fn hnsw_index_finds_exact_match() {
        let mut index = HnswIndex::new(3);
        index.insert(0, &[1.0, 0.0, 0.0]).unwrap();
        index.insert(1, &[0.0, 1.0, 0.0]).unwrap();
        index.insert(2, &[0.0, 0.0, 1.0]).unwrap();

        let hits = index.search(&[0.0, 1.0, 0.0], 1).unwrap();
        assert_eq!(ids(&hits), vec![1]);
        assert_eq!(hits[0].distance, 0.0);
    }
}
