//! Tracks the active dataset and serializes loads.
//!
//! Queries never load anything themselves: callers get a [`DatasetHandle`] from
//! [`DatasetRegistry::ensure_loaded`] and pass it to the query functions. A handle stays valid
//! after another dataset becomes active, so in-flight queries never see a half-swapped state.
use log::{debug, info};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{AppConfig, ConfigProvider};
use crate::database::{Database, RecordStore};
use crate::dataset::Dataset;
use crate::error::Result;
use crate::neighborhood::NeighborhoodStore;

pub type DatasetHandle = Arc<Dataset>;

pub struct DatasetRegistry {
    config: Arc<dyn ConfigProvider>,
    app_config: AppConfig,
    active: RwLock<Option<DatasetHandle>>,
    load_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    neighborhoods: NeighborhoodStore,
}

impl DatasetRegistry {

    pub fn new(config: Arc<dyn ConfigProvider>, app_config: AppConfig, records: Arc<dyn RecordStore>) -> Self {

        return Self {
            config,
            app_config,
            active: RwLock::new(None),
            load_locks: Mutex::new(HashMap::new()),
            neighborhoods: NeighborhoodStore::new(records),
        };
    }

    /// Opens the record store named by `app_config`, or an in-memory one.
    pub fn open(config: Arc<dyn ConfigProvider>, app_config: AppConfig) -> Result<Self> {

        let records: Arc<dyn RecordStore> = match app_config.get_database_filename() {
            Some(filename) => Arc::new(Database::open(&filename)?),
            None => Arc::new(Database::in_memory()),
        };

        return Ok(Self::new(config, app_config, records));
    }

    pub fn app_config(&self) -> &AppConfig {
        &self.app_config
    }

    pub fn config(&self) -> &dyn ConfigProvider {
        self.config.as_ref()
    }

    pub fn neighborhoods(&self) -> &NeighborhoodStore {
        &self.neighborhoods
    }

    pub fn active(&self) -> Option<DatasetHandle> {
        return self.active.read().clone();
    }

    fn active_if(&self, dataset_name: &str) -> Option<DatasetHandle> {

        return self.active().filter(|handle| handle.name == dataset_name);
    }

    fn load_lock(&self, dataset_name: &str) -> Arc<Mutex<()>> {

        let mut locks = self.load_locks.lock();

        return locks.entry(dataset_name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
    }

    /// Returns the handle for `dataset_name`, loading it first unless it is already active.
    ///
    /// Only one load per dataset name runs at a time. A caller that waited on someone else's load
    /// of the same dataset reuses its result instead of loading again, unless it asked for
    /// `force_reload`, which also discards the cached spatial index.
    pub fn ensure_loaded(&self, dataset_name: &str, force_reload: bool) -> Result<DatasetHandle> {

        if !force_reload {
            if let Some(handle) = self.active_if(dataset_name) {
                return Ok(handle);
            }
        }

        let lock = self.load_lock(dataset_name);
        let _guard = lock.lock();

        if !force_reload {
            if let Some(handle) = self.active_if(dataset_name) {
                debug!("dataset {:?} was loaded while we waited", dataset_name);
                return Ok(handle);
            }
        }

        let config = self.config.dataset(dataset_name)?;
        let dataset = Dataset::load(&config, &self.app_config, force_reload)?;

        self.neighborhoods.seed_clusters(&dataset)?;

        let handle: DatasetHandle = Arc::new(dataset);
        *self.active.write() = Some(handle.clone());

        info!("dataset {:?} is now active", dataset_name);

        return Ok(handle);
    }
}
