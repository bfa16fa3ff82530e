//! Queries against a loaded dataset: spatial, polygon, similarity and hydration.
//!
//! Every function takes the dataset explicitly; nothing here loads or reloads data. Finding
//! nothing is an empty result, never an error.
use log::debug;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeSet;

use crate::composition::NeighborhoodSummary;
use crate::data::{CellRecord, CLUSTER_COLUMN, ID_COLUMN};
use crate::dataset::Dataset;
use crate::error::{Error, Result};
use crate::geometry::{minimal_enclosing_circle, point_in_polygon, Point};
use crate::tree::CellIndex;

pub const PHENOTYPE_KEY: &str = "phenotype";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NearestCell {
    pub cell: CellRecord,
    pub distance: f64,
}

/// Cells of a selection plus the composition summary of the whole selection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelectionView {
    pub cells: Vec<CellRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_summary: Option<NeighborhoodSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimilarSelection {
    #[serde(flatten)]
    pub view: SelectionView,
    pub raw_summary: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScatterPoint {
    pub x: f64,
    pub y: f64,
    pub id: CellIndex,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScatterplotData {
    pub data: Vec<ScatterPoint>,
    pub x_min: f64,
    pub x_max: f64,
    pub y_min: f64,
    pub y_max: f64,
    pub clusters: Vec<i32>,
}

///every column, with an empty phenotype when the dataset has none
fn full_record(dataset: &Dataset, row: usize) -> Result<CellRecord> {

    let mut record = dataset.cells.record(row, None)?;
    record.entry(PHENOTYPE_KEY.to_string()).or_insert_with(|| Value::String(String::new()));

    return Ok(record);
}

/// Records for `ids`. Without a field list (or with an empty one) every column is returned;
/// `id` is always included.
pub fn hydrate(dataset: &Dataset, ids: &[CellIndex], fields: Option<&[String]>) -> Result<Vec<CellRecord>> {

    return match fields.filter(|f| !f.is_empty()) {
        Some(fields) => dataset.cells.records(ids, Some(fields)),
        None => ids.iter().map(|id| full_record(dataset, *id as usize)).collect(),
    };
}

fn check_finite(values: &[(&str, f64)]) -> Result<()> {

    for (name, value) in values.iter() {
        if !value.is_finite() {
            return Err(Error::Validation(format!("{} must be a finite number, got {}", name, value)));
        }
    }

    Ok(())
}

/// Closest cell to (x, y) with its distance.
pub fn nearest_cell(dataset: &Dataset, x: f64, y: f64) -> Result<Option<NearestCell>> {

    check_finite(&[("x", x), ("y", y)])?;

    let neighbor = match dataset.index.nearest(x, y)? {
        Some(n) => n,
        None => return Ok(None),
    };

    return Ok(Some(NearestCell {
        cell: full_record(dataset, neighbor.index as usize)?,
        distance: neighbor.distance,
    }));
}

pub fn cells_in_radius(dataset: &Dataset, x: f64, y: f64, r: f64, fields: Option<&[String]>) -> Result<Vec<CellRecord>> {

    check_finite(&[("x", x), ("y", y)])?;

    let ids = dataset.index.radius(x, y, r)?;
    debug!("radius query at ({}, {}) r={} matched {} cells", x, y, r, ids.len());

    return hydrate(dataset, &ids, fields);
}

pub fn count_in_radius(dataset: &Dataset, x: f64, y: f64, r: f64) -> Result<usize> {

    check_finite(&[("x", x), ("y", y)])?;

    return dataset.index.count_within(x, y, r);
}

fn cell_point(dataset: &Dataset, id: CellIndex) -> Result<Point> {

    let coordinate = |field: &str| -> Result<f64> {
        return dataset.cells.column(field)
            .and_then(|c| c.f64_at(id as usize))
            .ok_or_else(|| Error::Data(format!("cell {} has no {:?} coordinate", id, field)));
    };

    return Ok(Point::new(coordinate(&dataset.config.x_coordinate)?, coordinate(&dataset.config.y_coordinate)?));
}

/// Ids of cells inside `polygon`, ascending.
///
/// The minimal enclosing circle of the polygon is used as a radius query to get candidates, which
/// are then tested exactly. Boundary handling follows [`point_in_polygon`].
pub fn polygon_ids(dataset: &Dataset, polygon: &[Point]) -> Result<Vec<CellIndex>> {

    let circle = match minimal_enclosing_circle(polygon) {
        Some(c) => c,
        None => return Ok(Vec::new()),
    };

    let candidates = dataset.index.radius(circle.x, circle.y, circle.query_radius())?;

    let mut inside = Vec::new();
    for id in candidates.into_iter() {
        if point_in_polygon(&cell_point(dataset, id)?, polygon) {
            inside.push(id);
        }
    }
    inside.sort_unstable();

    debug!("polygon of {} vertices: circle r={:.3}, {} inside", polygon.len(), circle.r, inside.len());

    return Ok(inside);
}

pub fn cells_in_polygon(dataset: &Dataset, polygon: &[Point]) -> Result<SelectionView> {

    let ids = polygon_ids(dataset, polygon)?;

    return selection_view(dataset, &ids, None);
}

/// Cells whose neighborhood composition resembles the mean composition of `seed_ids`.
pub fn similar_to_selection(dataset: &Dataset, seed_ids: &[CellIndex], threshold: f64) -> Result<SimilarSelection> {

    if seed_ids.is_empty() {
        return Err(Error::Validation("similarity search needs at least one seed cell".to_string()));
    }

    let composition = dataset.composition()?;
    let raw_summary = composition.mean(seed_ids)?;
    let similar = composition.find_similar(&raw_summary, threshold)?;

    return Ok(SimilarSelection {
        view: selection_view(dataset, &similar, None)?,
        raw_summary,
    });
}

fn default_fields(dataset: &Dataset) -> Vec<String> {

    let mut fields = vec![ID_COLUMN.to_string(), CLUSTER_COLUMN.to_string()];

    if dataset.has_phenotypes() {
        fields.push(dataset.config.phenotype_field.clone());
    }

    for field in [&dataset.config.x_coordinate, &dataset.config.y_coordinate] {
        if !fields.contains(field) {
            fields.push(field.clone());
        }
    }

    return fields;
}

/// Hydrated cells with the default fields plus `extra_fields`, and the selection's summary when
/// the dataset has a composition table.
pub fn selection_view(dataset: &Dataset, ids: &[CellIndex], extra_fields: Option<&[String]>) -> Result<SelectionView> {

    let mut fields = default_fields(dataset);
    for field in extra_fields.unwrap_or(&[]).iter() {
        if !fields.contains(field) {
            fields.push(field.clone());
        }
    }

    let mut cells = dataset.cells.records(ids, Some(&fields))?;

    if !dataset.has_phenotypes() {
        for cell in cells.iter_mut() {
            cell.insert(PHENOTYPE_KEY.to_string(), Value::String(String::new()));
        }
    }

    let cluster_summary = match &dataset.composition {
        Some(composition) => Some(composition.summarize_ids(dataset.phenotypes(), ids)?),
        None => None,
    };

    return Ok(SelectionView { cells, cluster_summary });
}

/// Sorted distinct phenotype labels; `[""]` when the dataset has no phenotype column.
pub fn phenotypes(dataset: &Dataset) -> Vec<String> {

    if !dataset.has_phenotypes() {
        return vec![String::new()];
    }

    let sorted: BTreeSet<&String> = dataset.phenotypes().iter().collect();

    return sorted.into_iter().cloned().collect();
}

pub fn channel_names(dataset: &Dataset, short_names: bool) -> Vec<String> {

    return dataset.config.channels.iter()
        .map(|c| match short_names {
            true => c.name.clone(),
            false => c.fullname.clone(),
        })
        .collect();
}

pub fn cluster_labels(dataset: &Dataset) -> Vec<i32> {
    return dataset.embedding.cluster_labels();
}

pub fn scatterplot(dataset: &Dataset) -> ScatterplotData {

    let embedding = &dataset.embedding;

    let data: Vec<ScatterPoint> = embedding.x.iter()
        .zip(embedding.y.iter())
        .enumerate()
        .map(|(id, (x, y))| ScatterPoint { x: *x, y: *y, id: id as CellIndex })
        .collect();

    let min = |v: &[f64]| v.iter().copied().reduce(f64::min).unwrap_or(f64::NAN);
    let max = |v: &[f64]| v.iter().copied().reduce(f64::max).unwrap_or(f64::NAN);

    return ScatterplotData {
        data,
        x_min: min(&embedding.x),
        x_max: max(&embedding.x),
        y_min: min(&embedding.y),
        y_max: max(&embedding.y),
        clusters: embedding.cluster_labels(),
    };
}
