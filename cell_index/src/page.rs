//! A record page is a leaf of the kd tree: a bounded collection of cell records.
//!
//! Pages live in memory while the tree is queried and are flattened to bytes when the tree is
//! cached on disk.

use byteorder::{ByteOrder, BigEndian};

use crate::error::{Error, Result};
use crate::layout;
use crate::tree::TreeRecord;

#[derive(Debug, Clone, PartialEq)]
pub struct RecordPage {
    pub records: Vec<TreeRecord>,
    pub capacity: usize,
}

impl RecordPage {

    pub fn new(capacity: usize) -> Self {

        return Self {
            records: Vec::with_capacity(capacity),
            capacity,
        };
    }

    /// A page holding `records` regardless of capacity; the builder splits it afterwards.
    pub fn from_records(records: Vec<TreeRecord>, capacity: usize) -> Self {
        return Self { records, capacity };
    }

    pub fn add_record(&mut self, record: &TreeRecord) -> Result<()> {

        match self.is_full() {
            true => return Err(Error::Data("record page is full".to_string())),
            false => {},
        }

        self.records.push(record.clone());

        Ok(())
    }

    pub fn get_records(&self) -> &[TreeRecord] {
        &self.records
    }

    pub fn is_full(&self) -> bool {
        return self.records.len() >= self.capacity;
    }

    /// More records than a page may hold; only true mid-build.
    pub fn is_overfull(&self) -> bool {
        return self.records.len() > self.capacity;
    }

    pub fn len(&self) -> usize {
        return self.records.len();
    }

    pub fn is_empty(&self) -> bool {
        return self.records.is_empty();
    }

    pub fn byte_len(&self) -> usize {
        return layout::PAGE_DATA_START + self.records.len() * layout::RECORD_SIZE;
    }

    pub fn to_vec(&self) -> Vec<u8> {

        let mut vec: Vec<u8> = vec![0u8; self.byte_len()];

        BigEndian::write_u32(&mut vec[layout::PAGE_LENGTH_START..layout::PAGE_LENGTH_START + layout::PAGE_LENGTH_SIZE], self.records.len() as u32);

        for (i, record) in self.records.iter().enumerate() {
            let start = layout::PAGE_DATA_START + i * layout::RECORD_SIZE;
            vec[start..start + layout::RECORD_SIZE].copy_from_slice(&record.to_arr());
        }

        return vec;
    }

    /// Parses a page from the front of `data`, returning it with the number of bytes consumed.
    pub fn from_slice(data: &[u8], capacity: usize) -> Result<(Self, usize)> {

        if data.len() < layout::PAGE_DATA_START {
            return Err(Error::IndexFormat("record page header is truncated".to_string()));
        }

        let num_records = BigEndian::read_u32(&data[layout::PAGE_LENGTH_START..layout::PAGE_LENGTH_START + layout::PAGE_LENGTH_SIZE]) as usize;
        let byte_len = layout::PAGE_DATA_START + num_records * layout::RECORD_SIZE;

        if data.len() < byte_len {
            return Err(Error::IndexFormat(format!("record page of {} records is truncated", num_records)));
        }

        let mut records: Vec<TreeRecord> = Vec::with_capacity(num_records);
        for i in 0..num_records {
            let start = layout::PAGE_DATA_START + i * layout::RECORD_SIZE;
            records.push(TreeRecord::from_slice(&data[start..start + layout::RECORD_SIZE])?);
        }

        return Ok((Self { records, capacity }, byte_len));
    }
}
