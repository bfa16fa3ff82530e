//! Named neighborhoods over a dataset and their cached composition statistics.
use log::{debug, info};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::composition::NeighborhoodSummary;
use crate::database::{
    Neighborhood, NeighborhoodField, NeighborhoodFilter, NewNeighborhood, NewNeighborhoodStats, RecordStore,
};
use crate::dataset::Dataset;
use crate::error::{Error, Result};
use crate::tree::CellIndex;

/// One row of a neighborhood listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NeighborhoodEntry {
    pub id: u64,
    pub cluster_id: Option<i64>,
    pub name: String,
    pub is_cluster: bool,
}

impl From<&Neighborhood> for NeighborhoodEntry {

    fn from(neighborhood: &Neighborhood) -> Self {

        NeighborhoodEntry {
            id: neighborhood.id,
            cluster_id: neighborhood.cluster_id,
            name: neighborhood.name.clone(),
            is_cluster: neighborhood.is_cluster,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NeighborhoodStatsEntry {
    pub neighborhood_id: u64,
    pub name: String,
    #[serde(flatten)]
    pub stats: NeighborhoodSummary,
}

pub fn cluster_name(cluster: i32) -> String {
    return format!("Cluster {}", cluster);
}

pub struct NeighborhoodStore {
    records: Arc<dyn RecordStore>,
    //serializes statistics computation so concurrent first requests compute once
    stats_lock: Mutex<()>,
    //held from reading the highest cluster id until the new neighborhood is stored
    create_lock: Mutex<()>,
}

impl NeighborhoodStore {

    pub fn new(records: Arc<dyn RecordStore>) -> Self {

        return Self {
            records,
            stats_lock: Mutex::new(()),
            create_lock: Mutex::new(()),
        };
    }

    /// Cached statistics for `neighborhood`, computing and caching them on first request.
    pub fn get_statistics(&self, dataset: &Dataset, neighborhood: &Neighborhood) -> Result<NeighborhoodSummary> {

        let _guard = self.stats_lock.lock();

        if let Some(cached) = self.records.get_stats(neighborhood.id)? {
            return Ok(cached.stats);
        }

        let summary = dataset.composition()?.summarize_ids(dataset.phenotypes(), &neighborhood.cells)?;

        let name = match (neighborhood.is_cluster, neighborhood.cluster_id) {
            (true, Some(cluster)) => format!("ClusterStats {}", cluster),
            _ => neighborhood.name.clone(),
        };

        self.records.create_stats(NewNeighborhoodStats {
            neighborhood_id: neighborhood.id,
            datasource: dataset.name.clone(),
            is_cluster: neighborhood.is_cluster,
            name,
            stats: summary.clone(),
        })?;

        debug!("computed statistics for neighborhood {} over {} cells", neighborhood.id, neighborhood.cells.len());

        return Ok(summary);
    }

    pub fn find_similar(&self, dataset: &Dataset, reference: &[f64], threshold: f64) -> Result<Vec<CellIndex>> {
        return dataset.composition()?.find_similar(reference, threshold);
    }

    /// Records a new neighborhood with the next cluster id; statistics are computed lazily.
    pub fn create(&self, datasource: &str, name: &str, member_ids: Vec<CellIndex>, is_cluster: bool) -> Result<Neighborhood> {

        let _guard = self.create_lock.lock();

        let filter = NeighborhoodFilter {
            include_deleted: true,
            ..NeighborhoodFilter::datasource(datasource)
        };

        let next_cluster_id = self.records.get_all_neighborhoods(&filter)?
            .iter()
            .filter_map(|n| n.cluster_id)
            .max()
            .map_or(0, |x| x + 1);

        let neighborhood = self.records.create_neighborhood(NewNeighborhood {
            datasource: datasource.to_string(),
            cluster_id: Some(next_cluster_id),
            is_cluster,
            name: name.to_string(),
            cells: member_ids,
        })?;

        info!("created neighborhood {} ({:?}) with {} cells in {}", neighborhood.id, neighborhood.name, neighborhood.cells.len(), datasource);

        return Ok(neighborhood);
    }

    /// Any neighborhood of `datasource` by id, deleted ones included.
    pub fn get(&self, datasource: &str, id: u64) -> Result<Neighborhood> {

        let filter = NeighborhoodFilter {
            id: Some(id),
            include_deleted: true,
            ..NeighborhoodFilter::datasource(datasource)
        };

        return self.records.get_neighborhood(&filter)?
            .ok_or(Error::NeighborhoodNotFound(id));
    }

    pub fn edit(&self, datasource: &str, id: u64, field: &str, value: &Value) -> Result<Neighborhood> {

        let field = match (field, value) {
            ("name", Value::String(name)) => NeighborhoodField::Name(name.clone()),
            ("is_deleted", Value::Bool(flag)) => NeighborhoodField::IsDeleted(*flag),
            ("name", _) | ("is_deleted", _) => return Err(Error::Validation(format!("bad value {} for field {:?}", value, field))),
            _ => return Err(Error::Validation(format!("field {:?} can't be edited", field))),
        };

        //make sure the neighborhood belongs to this datasource
        self.get(datasource, id)?;

        return self.records.edit_neighborhood(id, field);
    }

    pub fn soft_delete(&self, datasource: &str, id: u64) -> Result<Neighborhood> {
        return self.edit(datasource, id, "is_deleted", &Value::Bool(true));
    }

    /// Non-deleted neighborhoods of `datasource` in creation order.
    pub fn list(&self, datasource: &str) -> Result<Vec<NeighborhoodEntry>> {

        let neighborhoods = self.records.get_all_neighborhoods(&NeighborhoodFilter::datasource(datasource))?;

        return Ok(neighborhoods.iter().map(NeighborhoodEntry::from).collect());
    }

    fn cluster_neighborhood(&self, datasource: &str, cluster: i32) -> Result<Option<Neighborhood>> {

        let filter = NeighborhoodFilter {
            is_cluster: Some(true),
            name: Some(cluster_name(cluster)),
            include_deleted: true,
            ..NeighborhoodFilter::datasource(datasource)
        };

        return self.records.get_neighborhood(&filter);
    }

    /// Makes sure every cluster label of `dataset` has a neighborhood, and statistics when the
    /// dataset has a composition table. Returns how many neighborhoods were created.
    pub fn seed_clusters(&self, dataset: &Dataset) -> Result<usize> {

        let mut created: usize = 0;

        for cluster in dataset.embedding.cluster_labels() {

            let neighborhood = match self.cluster_neighborhood(&dataset.name, cluster)? {
                Some(n) => n,
                None => {
                    created += 1;
                    let _guard = self.create_lock.lock();
                    self.records.create_neighborhood(NewNeighborhood {
                        datasource: dataset.name.clone(),
                        cluster_id: Some(cluster as i64),
                        is_cluster: true,
                        name: cluster_name(cluster),
                        cells: dataset.cells_in_cluster(cluster),
                    })?
                },
            };

            if dataset.composition.is_some() {
                self.get_statistics(dataset, &neighborhood)?;
            }
        }

        if created > 0 {
            info!("seeded {} cluster neighborhoods for {}", created, dataset.name);
        }

        return Ok(created);
    }

    /// Statistics per cluster label, keyed by the label.
    pub fn cluster_statistics(&self, dataset: &Dataset) -> Result<BTreeMap<String, NeighborhoodSummary>> {

        let mut all = BTreeMap::new();

        for cluster in dataset.embedding.cluster_labels() {

            let neighborhood = self.cluster_neighborhood(&dataset.name, cluster)?
                .ok_or_else(|| Error::Record(format!("cluster {} of {} has no neighborhood", cluster, dataset.name)))?;

            all.insert(cluster.to_string(), self.get_statistics(dataset, &neighborhood)?);
        }

        return Ok(all);
    }

    /// Statistics for every listed neighborhood.
    pub fn all_statistics(&self, dataset: &Dataset) -> Result<Vec<NeighborhoodStatsEntry>> {

        let neighborhoods = self.records.get_all_neighborhoods(&NeighborhoodFilter::datasource(&dataset.name))?;

        let mut all = Vec::with_capacity(neighborhoods.len());
        for neighborhood in neighborhoods.iter() {
            all.push(NeighborhoodStatsEntry {
                neighborhood_id: neighborhood.id,
                name: neighborhood.name.clone(),
                stats: self.get_statistics(dataset, neighborhood)?,
            });
        }

        return Ok(all);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use crate::test_utils::Fixture;
    use assert_approx_eq::assert_approx_eq;
    use std::collections::HashSet;
    use std::thread;

    fn store() -> NeighborhoodStore {
        return NeighborhoodStore::new(Arc::new(Database::in_memory()));
    }

    #[test]
    fn seeding_is_idempotent() {

        let fixture = Fixture::new();
        let dataset = fixture.dataset();
        let store = store();

        assert_eq!(store.seed_clusters(&dataset).unwrap(), 2);
        assert_eq!(store.seed_clusters(&dataset).unwrap(), 0);

        let listed = store.list(&dataset.name).unwrap();
        assert_eq!(listed.iter().map(|n| n.name.as_str()).collect::<Vec<_>>(), vec!["Cluster 0", "Cluster 1"]);

        let stats = store.cluster_statistics(&dataset).unwrap();
        assert_approx_eq!(stats["0"].neighborhood_count["T cell"], 5.0 / 3.0);
        assert_approx_eq!(stats["1"].avg_weight["B cell"], 1.0);
    }

    #[test]
    fn created_neighborhoods_take_next_cluster_id() {

        let fixture = Fixture::new();
        let dataset = fixture.dataset();
        let store = store();

        let first = store.create(&dataset.name, "mine", vec![0, 1], false).unwrap();
        assert_eq!(first.cluster_id, Some(0));

        store.seed_clusters(&dataset).unwrap();
        store.soft_delete(&dataset.name, first.id).unwrap();

        //deleted neighborhoods still count towards the max
        let second = store.create(&dataset.name, "again", vec![2], false).unwrap();
        assert_eq!(second.cluster_id, Some(2));
        assert!(second.id > first.id);

        let listed: Vec<u64> = store.list(&dataset.name).unwrap().iter().map(|n| n.id).collect();
        assert!(!listed.contains(&first.id));
        assert!(store.get(&dataset.name, first.id).unwrap().is_deleted);
    }

    #[test]
    fn concurrent_creates_get_distinct_cluster_ids() {

        let store = Arc::new(store());

        let handles: Vec<_> = (0..8).map(|_| {
            let store = store.clone();
            thread::spawn(move || {
                for _ in 0..50 {
                    store.create("ds", "", vec![0], false).unwrap();
                }
            })
        }).collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let all = store.list("ds").unwrap();
        let unique: HashSet<Option<i64>> = all.iter().map(|n| n.cluster_id).collect();

        assert_eq!(all.len(), 400);
        assert_eq!(unique.len(), all.len());
        assert_eq!(all.iter().filter_map(|n| n.cluster_id).max(), Some(399));
    }

    #[test]
    fn statistics_are_cached_per_identity() {

        let fixture = Fixture::new();
        let dataset = fixture.dataset();
        let records = Arc::new(Database::in_memory());
        let store = NeighborhoodStore::new(records.clone());

        let neighborhood = store.create(&dataset.name, "pair", vec![3, 4], false).unwrap();
        assert!(records.get_stats(neighborhood.id).unwrap().is_none());

        let first = store.get_statistics(&dataset, &neighborhood).unwrap();
        assert_approx_eq!(first.weighted_contribution["B cell"], 1.0);

        let cached = records.get_stats(neighborhood.id).unwrap().unwrap();
        assert_eq!(cached.stats, first);
        assert_eq!(cached.name, "pair");

        //a cached entry is returned as stored, not recomputed from the members
        let mut altered = neighborhood.clone();
        altered.cells = vec![0];
        assert_eq!(store.get_statistics(&dataset, &altered).unwrap(), first);

        let all = store.all_statistics(&dataset).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].stats, first);
        assert_eq!(all[0].neighborhood_id, neighborhood.id);
    }

    #[test]
    fn edits_are_validated() {

        let fixture = Fixture::new();
        let dataset = fixture.dataset();
        let store = store();

        let n = store.create(&dataset.name, "", vec![0], false).unwrap();

        let renamed = store.edit(&dataset.name, n.id, "name", &Value::from("tumor edge")).unwrap();
        assert_eq!(renamed.name, "tumor edge");
        assert_eq!(renamed.cells, vec![0]);

        assert!(matches!(store.edit(&dataset.name, n.id, "cells", &Value::from(1)), Err(Error::Validation(_))));
        assert!(matches!(store.edit(&dataset.name, n.id, "is_deleted", &Value::from("yes")), Err(Error::Validation(_))));
        assert!(matches!(store.edit("elsewhere", n.id, "name", &Value::from("x")), Err(Error::NeighborhoodNotFound(_))));
    }
}
