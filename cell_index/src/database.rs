//! Durable store for neighborhoods and their cached statistics.
//!
//! The store is a keyed record table, not a relational engine: the core only ever looks records up
//! by a handful of fields. `Database` keeps every record in memory and, when file backed, rewrites
//! a versioned JSON document atomically after each mutation.
use log::{debug, info};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::composition::NeighborhoodSummary;
use crate::error::{Error, Result};
use crate::io::write_atomic;
use crate::tree::CellIndex;

/// Bump whenever a persisted record changes shape.
pub const DATABASE_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Neighborhood {
    pub id: u64,
    pub datasource: String,
    pub cluster_id: Option<i64>,
    pub is_cluster: bool,
    pub name: String,
    pub is_deleted: bool,
    pub cells: Vec<CellIndex>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewNeighborhood {
    pub datasource: String,
    pub cluster_id: Option<i64>,
    pub is_cluster: bool,
    pub name: String,
    pub cells: Vec<CellIndex>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeighborhoodStats {
    pub id: u64,
    pub neighborhood_id: u64,
    pub datasource: String,
    pub is_cluster: bool,
    pub name: String,
    pub stats: NeighborhoodSummary,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewNeighborhoodStats {
    pub neighborhood_id: u64,
    pub datasource: String,
    pub is_cluster: bool,
    pub name: String,
    pub stats: NeighborhoodSummary,
}

/// The editable fields of a neighborhood.
#[derive(Debug, Clone, PartialEq)]
pub enum NeighborhoodField {
    Name(String),
    IsDeleted(bool),
}

/// Conjunction of field equalities. Deleted neighborhoods match only with `include_deleted`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NeighborhoodFilter {
    pub id: Option<u64>,
    pub datasource: Option<String>,
    pub cluster_id: Option<i64>,
    pub is_cluster: Option<bool>,
    pub name: Option<String>,
    pub include_deleted: bool,
}

impl NeighborhoodFilter {

    pub fn datasource(datasource: &str) -> Self {

        return Self {
            datasource: Some(datasource.to_string()),
            ..Self::default()
        };
    }

    pub fn matches(&self, neighborhood: &Neighborhood) -> bool {

        if neighborhood.is_deleted && !self.include_deleted {
            return false;
        }

        return self.id.map_or(true, |x| x == neighborhood.id)
            && self.datasource.as_ref().map_or(true, |x| *x == neighborhood.datasource)
            && self.cluster_id.map_or(true, |x| Some(x) == neighborhood.cluster_id)
            && self.is_cluster.map_or(true, |x| x == neighborhood.is_cluster)
            && self.name.as_ref().map_or(true, |x| *x == neighborhood.name);
    }
}

pub trait RecordStore: Send + Sync {

    /// First match in id order.
    fn get_neighborhood(&self, filter: &NeighborhoodFilter) -> Result<Option<Neighborhood>>;

    /// Every match in id order.
    fn get_all_neighborhoods(&self, filter: &NeighborhoodFilter) -> Result<Vec<Neighborhood>>;

    fn create_neighborhood(&self, new: NewNeighborhood) -> Result<Neighborhood>;

    fn edit_neighborhood(&self, id: u64, field: NeighborhoodField) -> Result<Neighborhood>;

    fn get_stats(&self, neighborhood_id: u64) -> Result<Option<NeighborhoodStats>>;

    fn create_stats(&self, new: NewNeighborhoodStats) -> Result<NeighborhoodStats>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DatabaseState {
    version: u32,
    next_neighborhood_id: u64,
    next_stats_id: u64,
    neighborhoods: Vec<Neighborhood>,
    stats: Vec<NeighborhoodStats>,
}

impl DatabaseState {

    fn new() -> Self {

        return Self {
            version: DATABASE_VERSION,
            next_neighborhood_id: 1,
            next_stats_id: 1,
            neighborhoods: Vec::new(),
            stats: Vec::new(),
        };
    }
}

#[derive(Debug)]
pub struct Database {
    filename: Option<PathBuf>,
    state: Mutex<DatabaseState>,
}

impl Database {

    pub fn in_memory() -> Self {

        return Self {
            filename: None,
            state: Mutex::new(DatabaseState::new()),
        };
    }

    /// Opens the store at `filename`, starting empty when the file does not exist yet.
    pub fn open(filename: &Path) -> Result<Self> {

        let state = match filename.exists() {
            true => {
                let data = fs::read(filename)?;
                let state: DatabaseState = serde_json::from_slice(&data)
                    .map_err(|e| Error::Record(format!("{}: {}", filename.display(), e)))?;

                if state.version != DATABASE_VERSION {
                    return Err(Error::Record(format!("{} has version {}, expected {}",
                                                     filename.display(), state.version, DATABASE_VERSION)));
                }

                info!("opened neighborhood store {} with {} neighborhoods", filename.display(), state.neighborhoods.len());
                state
            },
            false => DatabaseState::new(),
        };

        return Ok(Self {
            filename: Some(filename.to_path_buf()),
            state: Mutex::new(state),
        });
    }

    fn flush(&self, state: &DatabaseState) -> Result<()> {

        if let Some(filename) = &self.filename {
            write_atomic(filename, &serde_json::to_vec(state)?)?;
            debug!("flushed neighborhood store to {}", filename.display());
        }

        Ok(())
    }
}

impl RecordStore for Database {

    fn get_neighborhood(&self, filter: &NeighborhoodFilter) -> Result<Option<Neighborhood>> {

        let state = self.state.lock();

        return Ok(state.neighborhoods.iter().find(|n| filter.matches(n)).cloned());
    }

    fn get_all_neighborhoods(&self, filter: &NeighborhoodFilter) -> Result<Vec<Neighborhood>> {

        let state = self.state.lock();

        return Ok(state.neighborhoods.iter().filter(|n| filter.matches(n)).cloned().collect());
    }

    fn create_neighborhood(&self, new: NewNeighborhood) -> Result<Neighborhood> {

        let mut state = self.state.lock();

        let neighborhood = Neighborhood {
            id: state.next_neighborhood_id,
            datasource: new.datasource,
            cluster_id: new.cluster_id,
            is_cluster: new.is_cluster,
            name: new.name,
            is_deleted: false,
            cells: new.cells,
        };

        state.next_neighborhood_id += 1;
        state.neighborhoods.push(neighborhood.clone());
        self.flush(&state)?;

        return Ok(neighborhood);
    }

    fn edit_neighborhood(&self, id: u64, field: NeighborhoodField) -> Result<Neighborhood> {

        let mut state = self.state.lock();

        let neighborhood = state.neighborhoods.iter_mut()
            .find(|n| n.id == id)
            .ok_or(Error::NeighborhoodNotFound(id))?;

        match field {
            NeighborhoodField::Name(name) => neighborhood.name = name,
            NeighborhoodField::IsDeleted(is_deleted) => neighborhood.is_deleted = is_deleted,
        }

        let edited = neighborhood.clone();
        self.flush(&state)?;

        return Ok(edited);
    }

    fn get_stats(&self, neighborhood_id: u64) -> Result<Option<NeighborhoodStats>> {

        let state = self.state.lock();

        return Ok(state.stats.iter().find(|s| s.neighborhood_id == neighborhood_id).cloned());
    }

    fn create_stats(&self, new: NewNeighborhoodStats) -> Result<NeighborhoodStats> {

        let mut state = self.state.lock();

        let stats = NeighborhoodStats {
            id: state.next_stats_id,
            neighborhood_id: new.neighborhood_id,
            datasource: new.datasource,
            is_cluster: new.is_cluster,
            name: new.name,
            stats: new.stats,
        };

        state.next_stats_id += 1;
        state.stats.push(stats.clone());
        self.flush(&state)?;

        return Ok(stats);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_neighborhood(datasource: &str, cluster_id: i64, name: &str) -> NewNeighborhood {

        return NewNeighborhood {
            datasource: datasource.to_string(),
            cluster_id: Some(cluster_id),
            is_cluster: true,
            name: name.to_string(),
            cells: vec![1, 2, 3],
        };
    }

    #[test]
    fn filters_and_soft_delete() {

        let db = Database::in_memory();

        let a = db.create_neighborhood(new_neighborhood("melanoma", 0, "Cluster 0")).unwrap();
        let b = db.create_neighborhood(new_neighborhood("melanoma", 1, "Cluster 1")).unwrap();
        db.create_neighborhood(new_neighborhood("tonsil", 0, "Cluster 0")).unwrap();

        assert_eq!(db.get_all_neighborhoods(&NeighborhoodFilter::datasource("melanoma")).unwrap().len(), 2);

        db.edit_neighborhood(a.id, NeighborhoodField::IsDeleted(true)).unwrap();

        let listed = db.get_all_neighborhoods(&NeighborhoodFilter::datasource("melanoma")).unwrap();
        assert_eq!(listed, vec![b.clone()]);

        let filter = NeighborhoodFilter { id: Some(a.id), include_deleted: true, ..NeighborhoodFilter::default() };
        assert!(db.get_neighborhood(&filter).unwrap().unwrap().is_deleted);

        assert!(matches!(db.edit_neighborhood(99, NeighborhoodField::Name("x".to_string())), Err(Error::NeighborhoodNotFound(99))));
    }

    #[test]
    fn ids_are_never_reused_across_reopen() {

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("neighborhoods.json");

        let first = {
            let db = Database::open(&path).unwrap();
            let n = db.create_neighborhood(new_neighborhood("melanoma", 0, "Cluster 0")).unwrap();
            db.edit_neighborhood(n.id, NeighborhoodField::IsDeleted(true)).unwrap();
            db.create_stats(NewNeighborhoodStats {
                neighborhood_id: n.id,
                datasource: "melanoma".to_string(),
                is_cluster: true,
                name: "ClusterStats 0".to_string(),
                stats: NeighborhoodSummary::default(),
            }).unwrap();
            n
        };

        let db = Database::open(&path).unwrap();
        let second = db.create_neighborhood(new_neighborhood("melanoma", 1, "Cluster 1")).unwrap();

        assert!(second.id > first.id);
        assert_eq!(db.get_stats(first.id).unwrap().unwrap().name, "ClusterStats 0");
    }

    #[test]
    fn wrong_version_is_rejected() {

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("neighborhoods.json");

        let mut state = DatabaseState::new();
        state.version = DATABASE_VERSION + 1;
        fs::write(&path, serde_json::to_vec(&state).unwrap()).unwrap();

        assert!(matches!(Database::open(&path), Err(Error::Record(_))));

        fs::write(&path, b"{ garbage").unwrap();
        assert!(matches!(Database::open(&path), Err(Error::Record(_))));
    }
}
