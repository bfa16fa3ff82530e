//! On-disk five cell dataset shared by the tests.
//!
//! Cells sit at (0,0), (1,0), (0,1), (5,5), (5,6); the first three are cluster 0, the rest
//! cluster 1.
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

use crate::config::{AppConfig, ChannelInfo, Config, DatasetConfig};
use crate::dataset::Dataset;
use crate::npy::write_npy;

pub const DATASET_NAME: &str = "fixture";

const CELLS: &str = "CellID,X_centroid,Y_centroid,CD3,CD20,phenotype\n\
                     101,0,0,100,5,T cell\n\
                     102,1,0,200,50,T cell\n\
                     103,0,1,300,500,B cell\n\
                     104,5,5,400,5000,B cell\n\
                     105,5,6,500,50000,T cell\n";

const EMBEDDING: [f64; 15] = [
    0.1, 0.2, 0.0,
    0.3, 0.1, 0.0,
    0.2, 0.4, 0.0,
    2.0, 2.5, 1.0,
    2.2, 2.1, 1.0,
];

const COMPOSITION: [f64; 20] = [
    2.0, 0.5, 1.0, 0.25,
    2.0, 0.5, 1.0, 0.25,
    1.0, 0.25, 2.0, 0.5,
    0.0, 0.0, 1.0, 1.0,
    0.0, 0.0, 1.0, 1.0,
];

pub struct Fixture {
    pub dir: TempDir,
    pub app_config: AppConfig,
}

impl Fixture {

    pub fn new() -> Self {

        let dir = tempfile::tempdir().unwrap();

        fs::write(dir.path().join("cells.csv"), CELLS).unwrap();
        write_npy(&dir.path().join("embedding.npy"), &[5, 3], &EMBEDDING).unwrap();
        write_npy(&dir.path().join("composition.npy"), &[5, 4], &COMPOSITION).unwrap();

        let app_config = AppConfig {
            data_directory: dir.path().join("cache").to_string_lossy().to_string(),
            config_path: dir.path().join("config.json").to_string_lossy().to_string(),
            database_path: None,
            leaf_capacity: 2,
        };

        return Self { dir, app_config };
    }

    fn path(&self, name: &str) -> PathBuf {
        return self.dir.path().join(name);
    }

    pub fn dataset_config(&self) -> DatasetConfig {

        return DatasetConfig {
            name: DATASET_NAME.to_string(),
            feature_path: self.path("cells.csv"),
            x_coordinate: "X_centroid".to_string(),
            y_coordinate: "Y_centroid".to_string(),
            phenotype_field: "phenotype".to_string(),
            id_field: "CellID".to_string(),
            embedding_path: self.path("embedding.npy"),
            segmentation_path: None,
            channel_path: None,
            tile_width: 1024,
            tile_height: 1024,
            channels: vec![
                ChannelInfo { name: "CD3".to_string(), fullname: "CD3_FITC".to_string() },
                ChannelInfo { name: "CD20".to_string(), fullname: "CD20_PE".to_string() },
            ],
            composition_path: Some(self.path("composition.npy")),
        };
    }

    pub fn config(&self) -> Config {

        let mut config = Config::default();
        config.insert(self.dataset_config());

        return config;
    }

    pub fn dataset(&self) -> Dataset {
        return Dataset::load(&self.dataset_config(), &self.app_config, false).unwrap();
    }
}
