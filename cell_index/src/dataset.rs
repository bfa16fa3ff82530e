//! A fully loaded dataset: cell table, embedding, spatial index and composition table.
use log::{info, warn};
use std::collections::HashSet;
use std::path::Path;
use std::time::Instant;

use crate::composition::CompositionTable;
use crate::config::{AppConfig, DatasetConfig};
use crate::data::{CellTable, Column, CLUSTER_COLUMN, ID_COLUMN};
use crate::error::{Error, Result};
use crate::geometry::Point;
use crate::npy;
use crate::tree::{CellIndex, SpatialIndex};

/// 2-D projection of every cell plus its cluster label.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Embedding {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub clusters: Vec<i32>,
}

impl Embedding {

    pub fn from_npy(path: &Path) -> Result<Self> {

        let array = npy::read_npy(path)?;

        if array.shape.len() != 2 || array.row_width() < 3 {
            return Err(Error::Data(format!("embedding {} has shape {:?}, expected (cells, >= 3)", path.display(), array.shape)));
        }

        let mut embedding = Self::default();
        for i in 0..array.rows() {
            let row = array.row(i);
            embedding.x.push(row[0]);
            embedding.y.push(row[1]);
            embedding.clusters.push(row[2] as i32);
        }

        return Ok(embedding);
    }

    pub fn len(&self) -> usize {
        return self.x.len();
    }

    pub fn is_empty(&self) -> bool {
        return self.x.is_empty();
    }

    /// Distinct cluster labels, ascending.
    pub fn cluster_labels(&self) -> Vec<i32> {

        let mut labels = self.clusters.clone();
        labels.sort_unstable();
        labels.dedup();

        return labels;
    }
}

#[derive(Debug)]
pub struct Dataset {
    pub name: String,
    pub config: DatasetConfig,
    pub cells: CellTable,
    pub embedding: Embedding,
    pub index: SpatialIndex,
    pub composition: Option<CompositionTable>,
    phenotypes: Vec<String>,
}

fn require_file(name: &str, path: &Path) -> Result<()> {

    return match path.is_file() {
        true => Ok(()),
        false => Err(Error::DatasetNotFound { name: name.to_string(), path: path.to_path_buf() }),
    };
}

fn coordinates(cells: &CellTable, config: &DatasetConfig) -> Result<Vec<Point>> {

    let column_values = |field: &str| -> Result<Vec<f64>> {
        return cells.column(field)
            .and_then(|c| c.to_f64_vec())
            .ok_or_else(|| Error::Configuration(format!("dataset {:?} has no numeric coordinate column {:?}", config.name, field)));
    };

    let xs = column_values(&config.x_coordinate)?;
    let ys = column_values(&config.y_coordinate)?;

    return Ok(xs.into_iter().zip(ys).map(|(x, y)| Point::new(x, y)).collect());
}

///reuses the cached index unless it is stale in a way we can detect
fn load_or_build_index(name: &str, points: &[Point], app_config: &AppConfig, force_rebuild: bool) -> Result<SpatialIndex> {

    let filename = app_config.get_index_filename(name);

    if !force_rebuild && filename.is_file() {

        match SpatialIndex::from_file(&filename) {
            Ok(index) if index.len() == points.len() => return Ok(index),
            Ok(index) => warn!("cached index {} holds {} points, dataset has {}; rebuilding",
                               filename.display(), index.len(), points.len()),
            Err(Error::IndexVersion { found, expected }) => warn!("cached index {} has format version {}, expected {}; rebuilding",
                                                                  filename.display(), found, expected),
            Err(e) => return Err(e),
        }
    }

    let index = SpatialIndex::build(points, app_config.leaf_capacity)?;
    index.to_file(&filename)?;

    return Ok(index);
}

impl Dataset {

    /// Loads everything `config` points at. `force_rebuild` ignores any cached spatial index.
    pub fn load(config: &DatasetConfig, app_config: &AppConfig, force_rebuild: bool) -> Result<Self> {

        let start = Instant::now();
        let name = config.name.clone();

        require_file(&name, &config.feature_path)?;
        require_file(&name, &config.embedding_path)?;

        let mut cells = CellTable::from_path(&config.feature_path)?;
        let embedding = Embedding::from_npy(&config.embedding_path)?;

        if embedding.len() != cells.len() {
            return Err(Error::Data(format!("dataset {:?} has {} cells but {} embedding rows", name, cells.len(), embedding.len())));
        }

        cells.set_column(ID_COLUMN, Column::Integer((0..cells.len() as i64).collect()))?;
        cells.set_column(CLUSTER_COLUMN, Column::Integer(embedding.clusters.iter().map(|c| *c as i64).collect()))?;

        let points = coordinates(&cells, config)?;
        let index = load_or_build_index(&name, &points, app_config, force_rebuild)?;

        let phenotypes = first_appearance_labels(&cells, &config.phenotype_field);

        let composition = match &config.composition_path {
            Some(path) => {
                require_file(&name, path)?;
                let table = CompositionTable::from_npy(path)?;

                if table.len() != cells.len() {
                    return Err(Error::Data(format!("composition table has {} rows for {} cells", table.len(), cells.len())));
                }

                if table.width() < 2 * phenotypes.len() {
                    return Err(Error::Data(format!("composition table has {} columns for {} phenotypes", table.width(), phenotypes.len())));
                }

                Some(table)
            },
            None => None,
        };

        info!("loaded dataset {:?}: {} cells, {} phenotypes in {:.3}s",
              name, cells.len(), phenotypes.len(), start.elapsed().as_secs_f64());

        return Ok(Self {
            name,
            config: config.clone(),
            cells,
            embedding,
            index,
            composition,
            phenotypes,
        });
    }

    pub fn len(&self) -> usize {
        return self.cells.len();
    }

    pub fn is_empty(&self) -> bool {
        return self.cells.is_empty();
    }

    pub fn has_phenotypes(&self) -> bool {
        return self.cells.has_column(&self.config.phenotype_field);
    }

    /// Phenotype labels in the order they first appear; this is the composition vector order.
    pub fn phenotypes(&self) -> &[String] {
        &self.phenotypes
    }

    pub fn composition(&self) -> Result<&CompositionTable> {

        return self.composition.as_ref()
            .ok_or_else(|| Error::CompositionUnavailable(self.name.clone()));
    }

    pub fn cells_in_cluster(&self, cluster: i32) -> Vec<CellIndex> {

        return self.embedding.clusters.iter()
            .enumerate()
            .filter(|(_, c)| **c == cluster)
            .map(|(i, _)| i as CellIndex)
            .collect();
    }
}

fn first_appearance_labels(cells: &CellTable, field: &str) -> Vec<String> {

    let column = match cells.column(field) {
        Some(c) => c,
        None => return Vec::new(),
    };

    let mut seen: HashSet<String> = HashSet::new();
    let mut labels = Vec::new();

    for row in 0..column.len() {
        let label = column.label_at(row);
        if seen.insert(label.clone()) {
            labels.push(label);
        }
    }

    return labels;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::Fixture;

    #[test]
    fn load_derives_id_and_cluster() {

        let fixture = Fixture::new();
        let dataset = Dataset::load(&fixture.dataset_config(), &fixture.app_config, false).unwrap();

        assert_eq!(dataset.len(), 5);
        assert_eq!(dataset.cells.column("id"), Some(&Column::Integer(vec![0, 1, 2, 3, 4])));
        assert_eq!(dataset.cells.column("Cluster"), Some(&Column::Integer(vec![0, 0, 0, 1, 1])));
        assert_eq!(dataset.phenotypes(), &["T cell".to_string(), "B cell".to_string()]);
        assert_eq!(dataset.embedding.cluster_labels(), vec![0, 1]);
        assert_eq!(dataset.cells_in_cluster(1), vec![3, 4]);
        assert!(dataset.composition().is_ok());
    }

    #[test]
    fn index_cache_is_written_and_reused() {

        let fixture = Fixture::new();
        let config = fixture.dataset_config();
        let cache = fixture.app_config.get_index_filename(&config.name);

        Dataset::load(&config, &fixture.app_config, false).unwrap();
        assert!(cache.is_file());

        //a cache for a different point count is rebuilt, not trusted
        let other = SpatialIndex::build(&[Point::new(0.0, 0.0)], 4).unwrap();
        other.to_file(&cache).unwrap();

        let dataset = Dataset::load(&config, &fixture.app_config, false).unwrap();
        assert_eq!(dataset.index.len(), 5);
        assert_eq!(SpatialIndex::from_file(&cache).unwrap().len(), 5);
    }

    #[test]
    fn corrupt_cache_is_an_error_unless_forced() {

        let fixture = Fixture::new();
        let config = fixture.dataset_config();
        let cache = fixture.app_config.get_index_filename(&config.name);

        std::fs::create_dir_all(cache.parent().unwrap()).unwrap();
        std::fs::write(&cache, b"CIDX garbage").unwrap();

        assert!(matches!(Dataset::load(&config, &fixture.app_config, false), Err(Error::IndexFormat(_))));
        assert!(Dataset::load(&config, &fixture.app_config, true).is_ok());
    }

    #[test]
    fn missing_files_are_reported() {

        let fixture = Fixture::new();
        let mut config = fixture.dataset_config();
        config.embedding_path = fixture.dir.path().join("missing.npy");

        assert!(matches!(Dataset::load(&config, &fixture.app_config, false), Err(Error::DatasetNotFound { .. })));

        let mut config = fixture.dataset_config();
        config.x_coordinate = "nope".to_string();
        assert!(matches!(Dataset::load(&config, &fixture.app_config, false), Err(Error::Configuration(_))));
    }
}
