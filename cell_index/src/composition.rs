//! Per-cell neighborhood composition vectors and the statistics derived from them.
//!
//! Row `i` of the table describes the spatial neighborhood of cell `i`: for phenotype `p` (in
//! first-appearance order of the phenotype column) slot `2p` is the neighbor count and slot
//! `2p + 1` the average weight.
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Instant;

use crate::error::{Error, Result};
use crate::npy;
use crate::tree::CellIndex;

/// Per-phenotype aggregate of a set of cells' composition vectors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NeighborhoodSummary {
    pub neighborhood_count: BTreeMap<String, f64>,
    pub avg_weight: BTreeMap<String, f64>,
    pub weighted_contribution: BTreeMap<String, f64>,
}

#[derive(Debug, Clone)]
pub struct CompositionTable {
    rows: usize,
    width: usize,
    data: Vec<f64>,
    norms: Vec<f64>,
}

fn norm(v: &[f64]) -> f64 {
    return v.iter().map(|x| x * x).sum::<f64>().sqrt();
}

impl CompositionTable {

    pub fn from_vec(rows: usize, width: usize, data: Vec<f64>) -> Result<Self> {

        if rows * width != data.len() {
            return Err(Error::Data(format!("composition table of {}x{} has {} values", rows, width, data.len())));
        }

        let norms = match width {
            0 => vec![0.0; rows],
            _ => data.chunks_exact(width).map(norm).collect(),
        };

        return Ok(Self { rows, width, data, norms });
    }

    pub fn from_npy(path: &Path) -> Result<Self> {

        let array = npy::read_npy(path)?;

        let rows = array.rows();
        let width = array.row_width();

        return Self::from_vec(rows, width, array.data);
    }

    pub fn len(&self) -> usize {
        return self.rows;
    }

    pub fn is_empty(&self) -> bool {
        return self.rows == 0;
    }

    pub fn width(&self) -> usize {
        return self.width;
    }

    pub fn row(&self, i: usize) -> &[f64] {
        return &self.data[i * self.width..(i + 1) * self.width];
    }

    /// Mean vector over `ids`; all zeros for an empty set.
    pub fn mean(&self, ids: &[CellIndex]) -> Result<Vec<f64>> {

        let mut sum = vec![0.0; self.width];

        if ids.is_empty() {
            return Ok(sum);
        }

        for id in ids.iter() {

            let i = *id as usize;
            if i >= self.rows {
                return Err(Error::Validation(format!("cell id {} is out of range for {} cells", id, self.rows)));
            }

            for (s, v) in sum.iter_mut().zip(self.row(i)) {
                *s += v;
            }
        }

        let n = ids.len() as f64;
        for s in sum.iter_mut() {
            *s /= n;
        }

        return Ok(sum);
    }

    ///Cosine similarity of a row to `reference`, clamped to [-1, 1]; zero vectors score 0
    fn similarity(&self, i: usize, reference: &[f64], reference_norm: f64) -> f64 {

        let denominator = self.norms[i] * reference_norm;
        if denominator == 0.0 {
            return 0.0;
        }

        let dot: f64 = self.row(i).iter().zip(reference).map(|(a, b)| a * b).sum();

        return (dot / denominator).clamp(-1.0, 1.0);
    }

    /// Ids of every cell whose composition is more similar to `reference` than `threshold`.
    pub fn find_similar(&self, reference: &[f64], threshold: f64) -> Result<Vec<CellIndex>> {

        if reference.len() != self.width {
            return Err(Error::Validation(format!("reference vector has {} values, expected {}", reference.len(), self.width)));
        }

        let start = Instant::now();
        let reference_norm = norm(reference);

        let hits: Vec<CellIndex> = (0..self.rows)
            .filter(|i| self.similarity(*i, reference, reference_norm) > threshold)
            .map(|i| i as CellIndex)
            .collect();

        debug!("similarity search over {} cells found {} in {:.3}s", self.rows, hits.len(), start.elapsed().as_secs_f64());

        return Ok(hits);
    }

    /// Expands a mean vector into per-phenotype statistics.
    pub fn summarize(&self, phenotypes: &[String], mean: &[f64]) -> NeighborhoodSummary {

        let mut summary = NeighborhoodSummary::default();

        for (i, phenotype) in phenotypes.iter().enumerate() {

            let count = mean.get(2 * i).copied().unwrap_or(0.0);
            let weight = mean.get(2 * i + 1).copied().unwrap_or(0.0);

            summary.neighborhood_count.insert(phenotype.clone(), count);
            summary.avg_weight.insert(phenotype.clone(), weight);
            summary.weighted_contribution.insert(phenotype.clone(), weight * count);
        }

        return summary;
    }

    pub fn summarize_ids(&self, phenotypes: &[String], ids: &[CellIndex]) -> Result<NeighborhoodSummary> {

        let mean = self.mean(ids)?;

        return Ok(self.summarize(phenotypes, &mean));
    }
}
