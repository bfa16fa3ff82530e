//! Spatial indexing and neighborhood queries over the cells of multiplexed tissue images.
//!
//! A dataset is a per-cell feature table (one row per segmented cell, with centroid coordinates,
//! a phenotype label and channel intensities), a 2-D embedding carrying a cluster label per cell,
//! and optionally a precomputed neighborhood composition table. Loading a dataset builds a
//! balanced kd-tree over the cell centroids, or restores it from its on-disk cache.
//!
//! Internal nodes of the tree do not contain points, only a split and pointers to their children.
//! Leaf pages contain cell ids with their coordinates. The tree answers nearest, k-nearest and
//! radius queries; polygon selections are answered by a radius query over the polygon's minimal
//! enclosing circle followed by an exact containment test.
//!
//! Named neighborhoods (one per cluster, plus user selections) and their composition statistics
//! are kept in a [`database::RecordStore`].
//!
//! Callers go through [`registry::DatasetRegistry::ensure_loaded`] to get a dataset handle and
//! pass it to the functions in [`query`], [`gating`] and [`describe`].
pub mod error;
pub mod geometry;
pub mod layout;
pub mod node;
pub mod page;
pub mod io;
pub mod tree;
pub mod npy;
pub mod data;
pub mod config;
pub mod composition;
pub mod database;
pub mod dataset;
pub mod neighborhood;
pub mod registry;
pub mod query;
pub mod gating;
pub mod describe;

#[cfg(test)]
mod test_utils;

pub use error::{Error, Result};
pub use registry::{DatasetHandle, DatasetRegistry};
