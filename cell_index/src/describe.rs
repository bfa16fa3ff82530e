//! Summary statistics and density histograms of the numeric columns of a dataset.
use serde::Serialize;
use std::collections::BTreeMap;

use crate::data::CellTable;

pub const HISTOGRAM_BINS: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HistogramBin {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnDescription {
    pub count: usize,
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    #[serde(rename = "25%")]
    pub q25: f64,
    #[serde(rename = "50%")]
    pub q50: f64,
    #[serde(rename = "75%")]
    pub q75: f64,
    pub max: f64,
    pub histogram: Vec<HistogramBin>,
}

///linear interpolation between closest ranks; `sorted` must be non-empty
fn quantile(sorted: &[f64], q: f64) -> f64 {

    let position = q * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let fraction = position - lower as f64;

    return sorted[lower] + (sorted[upper] - sorted[lower]) * fraction;
}

/// Density histogram of `sorted` over its range, as (bin midpoint, density) pairs.
pub fn histogram(sorted: &[f64], bins: usize) -> Vec<HistogramBin> {

    if sorted.is_empty() || bins == 0 {
        return Vec::new();
    }

    let (mut low, mut high) = (sorted[0], sorted[sorted.len() - 1]);
    if low == high {
        low -= 0.5;
        high += 0.5;
    }

    let width = (high - low) / bins as f64;
    let mut counts = vec![0usize; bins];

    for value in sorted.iter() {
        //the last bin is closed on the right
        let bin = (((value - low) / width) as usize).min(bins - 1);
        counts[bin] += 1;
    }

    let total = sorted.len() as f64;

    return counts.iter()
        .enumerate()
        .map(|(i, count)| HistogramBin {
            x: low + width * (i as f64 + 0.5),
            y: *count as f64 / (total * width),
        })
        .collect();
}

pub fn describe_values(values: &[f64]) -> ColumnDescription {

    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let count = sorted.len();

    if count == 0 {
        return ColumnDescription {
            count,
            mean: f64::NAN,
            std: f64::NAN,
            min: f64::NAN,
            q25: f64::NAN,
            q50: f64::NAN,
            q75: f64::NAN,
            max: f64::NAN,
            histogram: Vec::new(),
        };
    }

    let mean = sorted.iter().sum::<f64>() / count as f64;

    let std = match count {
        1 => f64::NAN,
        _ => (sorted.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (count - 1) as f64).sqrt(),
    };

    return ColumnDescription {
        count,
        mean,
        std,
        min: sorted[0],
        q25: quantile(&sorted, 0.25),
        q50: quantile(&sorted, 0.5),
        q75: quantile(&sorted, 0.75),
        max: sorted[count - 1],
        histogram: histogram(&sorted, HISTOGRAM_BINS),
    };
}

/// Description of every numeric column, keyed by column name.
pub fn describe(table: &CellTable) -> BTreeMap<String, ColumnDescription> {

    return table.columns()
        .filter_map(|(name, column)| column.to_f64_vec().map(|values| (name.clone(), describe_values(&values))))
        .collect();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::Fixture;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn statistics_match_known_values() {

        let description = describe_values(&[1.0, 2.0, 3.0, 4.0, f64::NAN]);

        assert_eq!(description.count, 4);
        assert_approx_eq!(description.mean, 2.5);
        assert_approx_eq!(description.std, (5.0f64 / 3.0).sqrt());
        assert_approx_eq!(description.q25, 1.75);
        assert_approx_eq!(description.q50, 2.5);
        assert_approx_eq!(description.q75, 3.25);
        assert_eq!(description.max, 4.0);
    }

    #[test]
    fn histogram_is_a_density() {

        let values: Vec<f64> = (0..1000).map(|x| x as f64 / 10.0).collect();
        let bins = histogram(&values, HISTOGRAM_BINS);

        assert_eq!(bins.len(), HISTOGRAM_BINS);

        let width = bins[1].x - bins[0].x;
        let area: f64 = bins.iter().map(|b| b.y * width).sum();
        assert_approx_eq!(area, 1.0);
        assert_approx_eq!(bins[0].x, 99.9 / 100.0);
    }

    #[test]
    fn constant_columns_get_a_unit_range() {

        let bins = histogram(&[3.0, 3.0, 3.0], 50);

        assert_approx_eq!(bins[0].x, 2.51);
        assert_eq!(bins.iter().filter(|b| b.y > 0.0).count(), 1);
        assert!(describe_values(&[3.0]).std.is_nan());
    }

    #[test]
    fn only_numeric_columns_are_described() {

        let dataset = Fixture::new().dataset();
        let description = describe(&dataset.cells);

        assert!(description.contains_key("CD3"));
        assert!(description.contains_key("id"));
        assert!(!description.contains_key("phenotype"));
        assert_eq!(description["CD3"].count, 5);

        let json = serde_json::to_value(&description["CD3"]).unwrap();
        assert_eq!(json["50%"], serde_json::Value::from(300.0));
    }
}
