//! In-memory cell table: one row per cell, one typed column per CSV header.
//!
//! A column is numeric when every value parses as a number (empty cells count as NaN). Numeric
//! columns whose values are all integers are kept as `i64` so ids and labels serialize exactly.
use log::info;
use serde_json::{Map, Number, Value};
use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use crate::error::{Error, Result};
use crate::tree::CellIndex;

/// One hydrated cell, keyed by column name.
pub type CellRecord = Map<String, Value>;

pub const ID_COLUMN: &str = "id";
pub const CLUSTER_COLUMN: &str = "Cluster";

#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    Integer(Vec<i64>),
    Float(Vec<f64>),
    Text(Vec<String>),
}

impl Column {

    ///Classifies raw CSV strings, normalizing -inf to 0 in float columns
    fn from_raw(raw: Vec<String>) -> Self {

        let mut integral = !raw.is_empty();
        let mut numeric = true;

        for value in raw.iter() {
            let value = value.trim();

            if integral && value.parse::<i64>().is_err() {
                integral = false;
            }

            if !value.is_empty() && value.parse::<f64>().is_err() {
                numeric = false;
                break;
            }
        }

        if integral {
            return Column::Integer(raw.iter().map(|v| v.trim().parse::<i64>().unwrap_or(0)).collect());
        }

        return match numeric {
            true => Column::Float(raw.iter().map(|v| parse_float(v)).collect()),
            false => Column::Text(raw),
        };
    }

    pub fn len(&self) -> usize {

        return match self {
            Column::Integer(v) => v.len(),
            Column::Float(v) => v.len(),
            Column::Text(v) => v.len(),
        };
    }

    pub fn is_empty(&self) -> bool {
        return self.len() == 0;
    }

    pub fn is_numeric(&self) -> bool {
        return !matches!(self, Column::Text(_));
    }

    pub fn f64_at(&self, row: usize) -> Option<f64> {

        return match self {
            Column::Integer(v) => v.get(row).map(|x| *x as f64),
            Column::Float(v) => v.get(row).copied(),
            Column::Text(_) => None,
        };
    }

    /// Numeric values as floats, `None` for text columns.
    pub fn to_f64_vec(&self) -> Option<Vec<f64>> {

        return match self {
            Column::Integer(v) => Some(v.iter().map(|x| *x as f64).collect()),
            Column::Float(v) => Some(v.clone()),
            Column::Text(_) => None,
        };
    }

    /// The value as a categorical label, as used for phenotypes.
    pub fn label_at(&self, row: usize) -> String {

        return match self {
            Column::Integer(v) => v[row].to_string(),
            Column::Float(v) => format_float(v[row]),
            Column::Text(v) => v[row].clone(),
        };
    }

    pub fn json_at(&self, row: usize) -> Value {

        return match self {
            Column::Integer(v) => Value::from(v[row]),
            Column::Float(v) => Number::from_f64(v[row]).map(Value::Number).unwrap_or(Value::Null),
            Column::Text(v) => Value::String(v[row].clone()),
        };
    }

    fn csv_at(&self, row: usize) -> String {

        return match self {
            Column::Integer(v) => v[row].to_string(),
            Column::Float(v) => format_float(v[row]),
            Column::Text(v) => v[row].clone(),
        };
    }
}

fn parse_float(value: &str) -> f64 {

    let value = value.trim();

    if value.is_empty() {
        return f64::NAN;
    }

    return match value.parse::<f64>() {
        Ok(x) if x == f64::NEG_INFINITY => 0.0,
        Ok(x) => x,
        Err(_) => f64::NAN,
    };
}

//NaN is written as an empty field
fn format_float(value: f64) -> String {

    return match value.is_nan() {
        true => String::new(),
        false => value.to_string(),
    };
}

#[derive(Debug, Clone, Default)]
pub struct CellTable {
    names: Vec<String>,
    columns: Vec<Column>,
    lookup: HashMap<String, usize>,
    num_rows: usize,
}

impl CellTable {

    pub fn from_path(path: &Path) -> Result<Self> {

        let file = File::open(path)?;
        let table = Self::from_reader(file)?;

        info!("read {} cells with {} columns from {}", table.len(), table.names.len(), path.display());

        return Ok(table);
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {

        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(reader);

        let headers: Vec<String> = csv_reader.headers()?.iter().map(|h| h.trim().to_string()).collect();

        let mut raw: Vec<Vec<String>> = vec![Vec::new(); headers.len()];

        for result in csv_reader.records() {
            let record = result?;

            for (i, column) in raw.iter_mut().enumerate() {
                column.push(record.get(i).unwrap_or("").to_string());
            }
        }

        let mut table = Self::default();
        table.num_rows = raw.first().map(|c| c.len()).unwrap_or(0);

        for (name, values) in headers.into_iter().zip(raw) {

            if table.lookup.contains_key(&name) {
                return Err(Error::Data(format!("duplicate column {:?}", name)));
            }

            table.push_column(name, Column::from_raw(values));
        }

        return Ok(table);
    }

    fn push_column(&mut self, name: String, column: Column) {

        self.lookup.insert(name.clone(), self.columns.len());
        self.names.push(name);
        self.columns.push(column);
    }

    pub fn len(&self) -> usize {
        return self.num_rows;
    }

    pub fn is_empty(&self) -> bool {
        return self.num_rows == 0;
    }

    pub fn column_names(&self) -> &[String] {
        &self.names
    }

    pub fn has_column(&self, name: &str) -> bool {
        return self.lookup.contains_key(name);
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        return self.lookup.get(name).map(|i| &self.columns[*i]);
    }

    /// Iterates (name, column) pairs in header order.
    pub fn columns(&self) -> impl Iterator<Item = (&String, &Column)> {
        return self.names.iter().zip(self.columns.iter());
    }

    /// Replaces a column in place or appends it as the last column.
    pub fn set_column(&mut self, name: &str, column: Column) -> Result<()> {

        if column.len() != self.num_rows {
            return Err(Error::Data(format!("column {:?} has {} values for {} cells", name, column.len(), self.num_rows)));
        }

        match self.lookup.get(name) {
            Some(i) => self.columns[*i] = column,
            None => self.push_column(name.to_string(), column),
        }

        Ok(())
    }

    /// Requested fields of one cell. `None` or an empty list returns every column; `id` is always included.
    pub fn record(&self, row: usize, fields: Option<&[String]>) -> Result<CellRecord> {

        if row >= self.num_rows {
            return Err(Error::Validation(format!("cell id {} is out of range for {} cells", row, self.num_rows)));
        }

        let mut record = CellRecord::new();

        match fields.filter(|f| !f.is_empty()) {
            None => {
                for (name, column) in self.columns() {
                    record.insert(name.clone(), column.json_at(row));
                }
            },
            Some(fields) => {
                for field in fields.iter() {
                    let column = self.column(field)
                        .ok_or_else(|| Error::Validation(format!("unknown field {:?}", field)))?;
                    record.insert(field.clone(), column.json_at(row));
                }

                if let Some(column) = self.column(ID_COLUMN) {
                    record.entry(ID_COLUMN.to_string()).or_insert_with(|| column.json_at(row));
                }
            },
        }

        return Ok(record);
    }

    pub fn records(&self, ids: &[CellIndex], fields: Option<&[String]>) -> Result<Vec<CellRecord>> {

        return ids.iter().map(|id| self.record(*id as usize, fields)).collect();
    }

    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {

        let mut csv_writer = csv::Writer::from_writer(writer);

        csv_writer.write_record(&self.names)?;

        for row in 0..self.num_rows {
            csv_writer.write_record(self.columns.iter().map(|c| c.csv_at(row)))?;
        }

        csv_writer.flush()?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CSV: &str = "CellID,X_centroid,Y_centroid,CD3,phenotype\n\
                       1,0.5,1.0,12,T cell\n\
                       2,1.5,,-inf,B cell\n\
                       3,2.5,3.0,7,T cell\n";

    #[test]
    fn columns_are_typed() {

        let table = CellTable::from_reader(CSV.as_bytes()).unwrap();

        assert_eq!(table.len(), 3);
        assert_eq!(table.column("CellID"), Some(&Column::Integer(vec![1, 2, 3])));
        assert!(matches!(table.column("phenotype"), Some(Column::Text(_))));

        //-inf is normalized, empty is NaN
        assert_eq!(table.column("CD3"), Some(&Column::Float(vec![12.0, 0.0, 7.0])));
        let y = table.column("Y_centroid").unwrap().to_f64_vec().unwrap();
        assert!(y[1].is_nan());
    }

    #[test]
    fn records_honor_field_lists() {

        let mut table = CellTable::from_reader(CSV.as_bytes()).unwrap();
        table.set_column(ID_COLUMN, Column::Integer(vec![0, 1, 2])).unwrap();

        let full = table.record(1, None).unwrap();
        assert_eq!(full.len(), 6);
        assert_eq!(full["Y_centroid"], Value::Null);

        let fields = vec!["phenotype".to_string()];
        let partial = table.record(2, Some(&fields)).unwrap();
        assert_eq!(partial.len(), 2);
        assert_eq!(partial["id"], Value::from(2));
        assert_eq!(partial["phenotype"], Value::from("T cell"));

        let bad = vec!["nope".to_string()];
        assert!(matches!(table.record(0, Some(&bad)), Err(Error::Validation(_))));
        assert!(matches!(table.record(3, None), Err(Error::Validation(_))));
    }

    #[test]
    fn set_column_checks_length() {

        let mut table = CellTable::from_reader(CSV.as_bytes()).unwrap();

        assert!(table.set_column("id", Column::Integer(vec![0, 1])).is_err());

        table.set_column("CellID", Column::Integer(vec![9, 9, 9])).unwrap();
        assert_eq!(table.column_names()[0], "CellID");
        assert_eq!(table.column("CellID"), Some(&Column::Integer(vec![9, 9, 9])));
    }

    #[test]
    fn csv_is_written_back() {

        let table = CellTable::from_reader(CSV.as_bytes()).unwrap();

        let mut out: Vec<u8> = Vec::new();
        table.write_csv(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();

        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("CellID,X_centroid,Y_centroid,CD3,phenotype"));
        assert_eq!(lines.next(), Some("1,0.5,1,12,T cell"));
        assert_eq!(lines.next(), Some("2,1.5,,0,B cell"));
    }
}
