//! Channel-intensity gating: selection by open intervals and CSV export of gate flags.
use log::debug;
use serde_json::Value;
use std::collections::BTreeMap;
use std::io::Write;

use crate::data::{Column, ID_COLUMN};
use crate::dataset::Dataset;
use crate::error::{Error, Result};
use crate::tree::CellIndex;

/// Bounds used when selecting cells by channel alone.
pub const CHANNEL_RANGE: Gate = Gate { low: 0.0, high: 65536.0 };

/// Open interval `low < value < high`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Gate {
    pub low: f64,
    pub high: f64,
}

impl Gate {

    pub fn contains(&self, value: f64) -> bool {
        return self.low < value && value < self.high;
    }
}

/// Gates keyed by channel name.
pub type Gates = BTreeMap<String, Gate>;

fn parse_bound(channel: &str, value: &Value) -> Result<f64> {

    let bound = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };

    return bound
        .filter(|b| !b.is_nan())
        .ok_or_else(|| Error::Validation(format!("gate bound {} for channel {:?} is not a number", value, channel)));
}

/// Parses `{"channel": [low, high], ...}` as sent by the viewer.
pub fn parse_gates(value: &Value) -> Result<Gates> {

    let object = value.as_object()
        .ok_or_else(|| Error::Validation("gates must be an object of channel to [low, high]".to_string()))?;

    let mut gates = Gates::new();

    for (channel, bounds) in object.iter() {

        let pair = match bounds.as_array() {
            Some(pair) if pair.len() == 2 => pair,
            _ => return Err(Error::Validation(format!("gate for channel {:?} must be [low, high]", channel))),
        };

        gates.insert(channel.clone(), Gate {
            low: parse_bound(channel, &pair[0])?,
            high: parse_bound(channel, &pair[1])?,
        });
    }

    return Ok(gates);
}

fn channel_values<'a>(dataset: &'a Dataset, channel: &str) -> Result<&'a Column> {

    return match dataset.cells.column(channel) {
        Some(column) if column.is_numeric() => Ok(column),
        _ => Err(Error::Validation(format!("unknown channel {:?}", channel))),
    };
}

/// Ids of cells inside every gate. No gates select nothing.
pub fn gated_ids(dataset: &Dataset, gates: &Gates) -> Result<Vec<CellIndex>> {

    if gates.is_empty() {
        return Ok(Vec::new());
    }

    let columns: Vec<(&Column, &Gate)> = gates.iter()
        .map(|(channel, gate)| -> Result<(&Column, &Gate)> { Ok((channel_values(dataset, channel)?, gate)) })
        .collect::<Result<_>>()?;

    let ids: Vec<CellIndex> = (0..dataset.len())
        .filter(|row| columns.iter().all(|(column, gate)| column.f64_at(*row).map_or(false, |v| gate.contains(v))))
        .map(|row| row as CellIndex)
        .collect();

    debug!("{} gates selected {} of {} cells", gates.len(), ids.len(), dataset.len());

    return Ok(ids);
}

/// Ids of cells with every channel in [`CHANNEL_RANGE`].
pub fn channel_ids(dataset: &Dataset, channels: &[String]) -> Result<Vec<CellIndex>> {

    let gates: Gates = channels.iter().map(|c| (c.clone(), CHANNEL_RANGE)).collect();

    return gated_ids(dataset, &gates);
}

/// Writes the full cell table with each listed channel replaced by a 0/1 flag.
///
/// A gated channel is flagged by its own gate only; listed channels without a gate are all 0.
/// The dataset's id field is set to the cell id.
pub fn gating_flags<W: Write>(dataset: &Dataset, gates: &Gates, channels: &[String], writer: W) -> Result<()> {

    let mut table = dataset.cells.clone();

    for channel in channels.iter() {

        let flags: Vec<i64> = match gates.get(channel) {
            Some(gate) => {
                let column = channel_values(dataset, channel)?;
                (0..dataset.len())
                    .map(|row| column.f64_at(row).map_or(0, |v| gate.contains(v) as i64))
                    .collect()
            },
            None => vec![0; dataset.len()],
        };

        table.set_column(channel, Column::Integer(flags))?;
    }

    let ids = dataset.cells.column(ID_COLUMN)
        .cloned()
        .unwrap_or_else(|| Column::Integer((0..dataset.len() as i64).collect()));
    table.set_column(&dataset.config.id_field, ids)?;

    return table.write_csv(writer);
}

/// Writes one row per channel: its gate (the active one if gated, else the given default range).
pub fn gate_table<W: Write>(gates: &Gates, channels: &[(String, Gate)], writer: W) -> Result<()> {

    let mut csv_writer = csv::Writer::from_writer(writer);

    csv_writer.write_record(["channel", "gate_start", "gate_end", "gate_active"])?;

    for (channel, default_gate) in channels.iter() {

        let (gate, active) = match gates.get(channel) {
            Some(gate) => (gate, true),
            None => (default_gate, false),
        };

        csv_writer.write_record([
            channel.clone(),
            gate.low.to_string(),
            gate.high.to_string(),
            active.to_string(),
        ])?;
    }

    csv_writer.flush()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::Fixture;
    use serde_json::json;

    fn gates(value: Value) -> Gates {
        return parse_gates(&value).unwrap();
    }

    #[test]
    fn gates_are_open_interval_conjunctions() {

        let dataset = Fixture::new().dataset();

        assert_eq!(gated_ids(&dataset, &gates(json!({"CD3": [100, 400]}))).unwrap(), vec![1, 2]);
        assert_eq!(gated_ids(&dataset, &gates(json!({"CD3": [100, 400], "CD20": ["40", 100]}))).unwrap(), vec![1]);
        assert!(gated_ids(&dataset, &gates(json!({"CD3": [1000, 2000]}))).unwrap().is_empty());
    }

    #[test]
    fn empty_gates_select_nothing() {

        let dataset = Fixture::new().dataset();

        assert!(gated_ids(&dataset, &Gates::new()).unwrap().is_empty());
        assert!(channel_ids(&dataset, &[]).unwrap().is_empty());
    }

    #[test]
    fn malformed_gates_are_rejected() {

        let dataset = Fixture::new().dataset();

        assert!(matches!(parse_gates(&json!({"CD3": ["low", 5]})), Err(Error::Validation(_))));
        assert!(matches!(parse_gates(&json!({"CD3": [1]})), Err(Error::Validation(_))));
        assert!(matches!(parse_gates(&json!([1, 2])), Err(Error::Validation(_))));
        assert!(matches!(gated_ids(&dataset, &gates(json!({"CD99": [0, 1]}))), Err(Error::Validation(_))));
        assert!(matches!(gated_ids(&dataset, &gates(json!({"phenotype": [0, 1]}))), Err(Error::Validation(_))));
    }

    #[test]
    fn channel_range_excludes_bounds() {

        let dataset = Fixture::new().dataset();

        //CD20 of the last cell is 50000, inside (0, 65536)
        assert_eq!(channel_ids(&dataset, &["CD20".to_string()]).unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn flags_are_independent_per_channel() {

        let dataset = Fixture::new().dataset();
        let gates = gates(json!({"CD3": [150, 450], "CD20": [1, 60]}));
        let channels = vec!["CD3".to_string(), "CD20".to_string(), "DNA".to_string()];

        let mut out: Vec<u8> = Vec::new();
        gating_flags(&dataset, &gates, &channels, &mut out).unwrap();

        let mut reader = csv::Reader::from_reader(out.as_slice());
        let headers = reader.headers().unwrap().clone();
        let position = |name: &str| headers.iter().position(|h| h == name).unwrap();

        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        let column = |name: &str| rows.iter().map(|r| r[position(name)].to_string()).collect::<Vec<_>>();

        assert_eq!(column("CD3"), vec!["0", "1", "1", "1", "0"]);
        assert_eq!(column("CD20"), vec!["1", "1", "0", "0", "0"]);
        assert_eq!(column("DNA"), vec!["0", "0", "0", "0", "0"]);
        assert_eq!(column("CellID"), vec!["0", "1", "2", "3", "4"]);
    }

    #[test]
    fn gate_table_marks_active_gates() {

        let gates = gates(json!({"CD3": [150, 450]}));
        let channels = vec![
            ("CD3".to_string(), Gate { low: 0.0, high: 1000.0 }),
            ("CD20".to_string(), Gate { low: 0.0, high: 65536.0 }),
        ];

        let mut out: Vec<u8> = Vec::new();
        gate_table(&gates, &channels, &mut out).unwrap();

        let text = String::from_utf8(out).unwrap();
        assert_eq!(text, "channel,gate_start,gate_end,gate_active\nCD3,150,450,true\nCD20,0,65536,false\n");
    }
}
