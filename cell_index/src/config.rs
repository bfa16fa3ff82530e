//! Application settings (YAML) and per-dataset configuration (the viewer's `config.json`).
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::tree::DEFAULT_LEAF_CAPACITY;

pub const DEFAULT_PHENOTYPE_FIELD: &str = "phenotype";
pub const DEFAULT_ID_FIELD: &str = "CellID";

/// Process-level settings shared by the builder, server and query tester.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// Where index caches live, one subdirectory per dataset.
    pub data_directory: String,
    /// Dataset configuration file.
    pub config_path: String,
    /// Neighborhood record store; in-memory when unset.
    pub database_path: Option<String>,
    pub leaf_capacity: usize,
}

impl Default for AppConfig {

    fn default() -> Self {
        return Self {
            data_directory: "data".to_string(),
            config_path: "config.json".to_string(),
            database_path: Some("data/neighborhoods.json".to_string()),
            leaf_capacity: DEFAULT_LEAF_CAPACITY,
        }
    }
}

impl AppConfig {

    pub fn from_file(filename: &Path) -> Result<Self> {

        let serialized = fs::read_to_string(filename)?;

        let deserialized: Self = serde_yaml::from_str(&serialized)?;

        return Ok(deserialized);
    }

    pub fn to_file(&self, filename: &Path) -> Result<()> {

        let serialized = serde_yaml::to_string(&self)?;
        let mut file = File::create(filename)?;

        file.write_all(serialized.as_bytes())?;

        Ok(())
    }

    pub fn get_dataset_directory(&self, dataset_name: &str) -> PathBuf {

        return Path::new(&self.data_directory).join(dataset_name);
    }

    pub fn get_index_filename(&self, dataset_name: &str) -> PathBuf {

        return self.get_dataset_directory(dataset_name).join("spatial_index.bin");
    }

    pub fn get_database_filename(&self) -> Option<PathBuf> {

        return self.database_path.as_ref().map(PathBuf::from);
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChannelInfo {
    pub name: String,
    pub fullname: String,
}

/// Everything the core needs to know about one dataset, with paths resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetConfig {
    pub name: String,
    pub feature_path: PathBuf,
    pub x_coordinate: String,
    pub y_coordinate: String,
    pub phenotype_field: String,
    pub id_field: String,
    pub embedding_path: PathBuf,
    pub segmentation_path: Option<PathBuf>,
    pub channel_path: Option<PathBuf>,
    pub tile_width: u32,
    pub tile_height: u32,
    pub channels: Vec<ChannelInfo>,
    pub composition_path: Option<PathBuf>,
}

/// Source of dataset configuration.
pub trait ConfigProvider: Send + Sync {

    fn dataset(&self, name: &str) -> Result<DatasetConfig>;

    fn dataset_names(&self) -> Result<Vec<String>>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFeatureData {
    src: String,
    x_coordinate: String,
    y_coordinate: String,
    phenotype: Option<String>,
    id_field: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawImageData {
    name: String,
    fullname: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDataset {
    #[serde(default)]
    feature_data: Vec<RawFeatureData>,
    embedding: Option<String>,
    segmentation: Option<String>,
    channel_file: Option<String>,
    #[serde(default)]
    tile_width: u32,
    #[serde(default)]
    tile_height: u32,
    #[serde(default)]
    image_data: Vec<RawImageData>,
    neighborhood_array: Option<String>,
}

///viewer paths are written like URLs ("/data/x.csv") and resolve against the config root
fn resolve(base_dir: &Path, path: &str) -> PathBuf {

    return base_dir.join(path.trim_start_matches('/'));
}

impl RawDataset {

    fn resolve(self, name: &str, base_dir: &Path) -> Result<DatasetConfig> {

        let feature = self.feature_data.into_iter().next()
            .ok_or_else(|| Error::Configuration(format!("dataset {:?} has no featureData", name)))?;

        let embedding = self.embedding
            .ok_or_else(|| Error::Configuration(format!("dataset {:?} has no embedding", name)))?;

        //first image entry is the segmentation layer
        let channels = self.image_data.into_iter()
            .skip(1)
            .map(|c| ChannelInfo { fullname: c.fullname.unwrap_or_else(|| c.name.clone()), name: c.name })
            .collect();

        return Ok(DatasetConfig {
            name: name.to_string(),
            feature_path: resolve(base_dir, &feature.src),
            x_coordinate: feature.x_coordinate,
            y_coordinate: feature.y_coordinate,
            phenotype_field: feature.phenotype.unwrap_or_else(|| DEFAULT_PHENOTYPE_FIELD.to_string()),
            id_field: feature.id_field.unwrap_or_else(|| DEFAULT_ID_FIELD.to_string()),
            embedding_path: resolve(base_dir, &embedding),
            segmentation_path: self.segmentation.map(|p| resolve(base_dir, &p)),
            channel_path: self.channel_file.map(|p| resolve(base_dir, &p)),
            tile_width: self.tile_width,
            tile_height: self.tile_height,
            channels,
            composition_path: self.neighborhood_array.map(|p| resolve(base_dir, &p)),
        });
    }
}

fn parse_config(text: &str, base_dir: &Path) -> Result<HashMap<String, DatasetConfig>> {

    let raw: HashMap<String, RawDataset> = serde_json::from_str(text)
        .map_err(|e| Error::Configuration(format!("malformed dataset configuration: {}", e)))?;

    let mut datasets = HashMap::new();
    for (name, dataset) in raw.into_iter() {
        let resolved = dataset.resolve(&name, base_dir)?;
        datasets.insert(name, resolved);
    }

    return Ok(datasets);
}

/// Configuration held in memory.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub datasets: HashMap<String, DatasetConfig>,
}

impl Config {

    pub fn from_json_str(text: &str, base_dir: &Path) -> Result<Self> {

        return Ok(Self { datasets: parse_config(text, base_dir)? });
    }

    pub fn insert(&mut self, config: DatasetConfig) {
        self.datasets.insert(config.name.clone(), config);
    }
}

impl ConfigProvider for Config {

    fn dataset(&self, name: &str) -> Result<DatasetConfig> {

        return self.datasets.get(name)
            .cloned()
            .ok_or_else(|| Error::Configuration(format!("dataset {:?} is not configured", name)));
    }

    fn dataset_names(&self) -> Result<Vec<String>> {

        let mut names: Vec<String> = self.datasets.keys().cloned().collect();
        names.sort();

        return Ok(names);
    }
}

/// Configuration re-read from disk on every lookup, so edits apply to the next load.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub path: PathBuf,
}

impl ConfigFile {

    pub fn new(path: &Path) -> Self {
        return Self { path: path.to_path_buf() };
    }

    fn read(&self) -> Result<Config> {

        let text = fs::read_to_string(&self.path)
            .map_err(|e| Error::Configuration(format!("can't read {}: {}", self.path.display(), e)))?;

        let base_dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        debug!("read dataset configuration from {}", self.path.display());

        return Config::from_json_str(&text, base_dir);
    }
}

impl ConfigProvider for ConfigFile {

    fn dataset(&self, name: &str) -> Result<DatasetConfig> {
        return self.read()?.dataset(name);
    }

    fn dataset_names(&self) -> Result<Vec<String>> {
        return self.read()?.dataset_names();
    }
}
