//! Minimal reader for NumPy `.npy` arrays (embeddings and neighborhood composition tables).
//!
//! Supports format versions 1 to 3, C order, and little/big endian floats and integers. Every
//! array is widened to `f64`.
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use std::fs;
use std::path::Path;

use crate::error::{Error, Result};
use crate::io::write_atomic;

const NPY_MAGIC: &[u8; 6] = b"\x93NUMPY";

#[derive(Debug, Clone, PartialEq)]
pub struct NpyArray {
    pub shape: Vec<usize>,
    pub data: Vec<f64>,
}

impl NpyArray {

    pub fn rows(&self) -> usize {
        return self.shape.first().copied().unwrap_or(0);
    }

    /// Number of values per row, with any trailing dimensions flattened.
    pub fn row_width(&self) -> usize {
        return self.shape.iter().skip(1).product();
    }

    pub fn row(&self, i: usize) -> &[f64] {
        let width = self.row_width();
        return &self.data[i * width..(i + 1) * width];
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Endian {
    Little,
    Big,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Kind {
    Float,
    Int,
    Uint,
}

fn header_value<'a>(header: &'a str, key: &str) -> Result<&'a str> {

    let pattern = format!("'{}':", key);
    let start = header.find(&pattern)
        .ok_or_else(|| Error::Data(format!("npy header has no {:?} entry", key)))?;

    return Ok(header[start + pattern.len()..].trim_start());
}

fn parse_descr(header: &str) -> Result<(Endian, Kind, usize)> {

    let rest = header_value(header, "descr")?;
    let descr = rest.strip_prefix('\'')
        .and_then(|r| r.split('\'').next())
        .ok_or_else(|| Error::Data("npy descr is not a string".to_string()))?;

    let mut chars = descr.chars();
    let endian = match chars.next() {
        Some('<') | Some('|') | Some('=') => Endian::Little,
        Some('>') => Endian::Big,
        _ => return Err(Error::Data(format!("unsupported npy dtype {:?}", descr))),
    };

    let kind = match chars.next() {
        Some('f') => Kind::Float,
        Some('i') => Kind::Int,
        Some('u') => Kind::Uint,
        _ => return Err(Error::Data(format!("unsupported npy dtype {:?}", descr))),
    };

    let size: usize = chars.as_str().parse()
        .map_err(|_| Error::Data(format!("unsupported npy dtype {:?}", descr)))?;

    let supported = match kind {
        Kind::Float => size == 4 || size == 8,
        Kind::Int | Kind::Uint => size == 1 || size == 2 || size == 4 || size == 8,
    };

    match supported {
        true => Ok((endian, kind, size)),
        false => Err(Error::Data(format!("unsupported npy dtype {:?}", descr))),
    }
}

fn parse_shape(header: &str) -> Result<Vec<usize>> {

    let rest = header_value(header, "shape")?;
    let inner = rest.strip_prefix('(')
        .and_then(|r| r.split(')').next())
        .ok_or_else(|| Error::Data("npy shape is not a tuple".to_string()))?;

    let mut shape = Vec::new();
    for part in inner.split(',').map(|p| p.trim()).filter(|p| !p.is_empty()) {
        shape.push(part.parse::<usize>().map_err(|_| Error::Data(format!("bad npy dimension {:?}", part)))?);
    }

    return Ok(shape);
}

fn read_value(bytes: &[u8], endian: Endian, kind: Kind, size: usize) -> f64 {

    return match (kind, size, endian) {
        (Kind::Float, 8, Endian::Little) => LittleEndian::read_f64(bytes),
        (Kind::Float, 8, Endian::Big) => BigEndian::read_f64(bytes),
        (Kind::Float, _, Endian::Little) => LittleEndian::read_f32(bytes) as f64,
        (Kind::Float, _, Endian::Big) => BigEndian::read_f32(bytes) as f64,
        (Kind::Int, 1, _) => bytes[0] as i8 as f64,
        (Kind::Uint, 1, _) => bytes[0] as f64,
        (Kind::Int, _, Endian::Little) => LittleEndian::read_int(bytes, size) as f64,
        (Kind::Int, _, Endian::Big) => BigEndian::read_int(bytes, size) as f64,
        (Kind::Uint, _, Endian::Little) => LittleEndian::read_uint(bytes, size) as f64,
        (Kind::Uint, _, Endian::Big) => BigEndian::read_uint(bytes, size) as f64,
    };
}

pub fn from_slice(data: &[u8]) -> Result<NpyArray> {

    if data.len() < 10 || &data[..6] != NPY_MAGIC {
        return Err(Error::Data("not an npy file".to_string()));
    }

    let major = data[6];
    let (header_start, header_len) = match major {
        1 => (10, LittleEndian::read_u16(&data[8..10]) as usize),
        2 | 3 => {
            if data.len() < 12 {
                return Err(Error::Data("npy header is truncated".to_string()));
            }
            (12, LittleEndian::read_u32(&data[8..12]) as usize)
        },
        x => return Err(Error::Data(format!("unsupported npy version {}", x))),
    };

    let data_start = header_start + header_len;
    if data.len() < data_start {
        return Err(Error::Data("npy header is truncated".to_string()));
    }

    let header = String::from_utf8_lossy(&data[header_start..data_start]);

    if header_value(&header, "fortran_order")?.starts_with("True") {
        return Err(Error::Data("fortran-ordered npy arrays are not supported".to_string()));
    }

    let (endian, kind, size) = parse_descr(&header)?;
    let shape = parse_shape(&header)?;
    let count: usize = shape.iter().product();

    let body = &data[data_start..];
    if body.len() < count * size {
        return Err(Error::Data(format!("npy body holds {} bytes, expected {}", body.len(), count * size)));
    }

    let values: Vec<f64> = body[..count * size]
        .chunks_exact(size)
        .map(|chunk| read_value(chunk, endian, kind, size))
        .collect();

    return Ok(NpyArray { shape, data: values });
}

pub fn read_npy(path: &Path) -> Result<NpyArray> {

    let data = fs::read(path)?;

    return from_slice(&data);
}

/// Writes a little-endian `f8` array in format version 1.
pub fn to_vec(shape: &[usize], values: &[f64]) -> Result<Vec<u8>> {

    let count: usize = shape.iter().product();
    if count != values.len() {
        return Err(Error::Data(format!("shape {:?} needs {} values, got {}", shape, count, values.len())));
    }

    let shape_text = match shape.len() {
        1 => format!("({},)", shape[0]),
        _ => format!("({})", shape.iter().map(|d| d.to_string()).collect::<Vec<_>>().join(", ")),
    };

    let mut header = format!("{{'descr': '<f8', 'fortran_order': False, 'shape': {}, }}", shape_text);

    //header is padded so the data starts on a 64 byte boundary
    let unpadded = 10 + header.len() + 1;
    header.push_str(&" ".repeat((64 - unpadded % 64) % 64));
    header.push('\n');

    let mut out: Vec<u8> = Vec::with_capacity(10 + header.len() + values.len() * 8);
    out.extend_from_slice(NPY_MAGIC);
    out.extend_from_slice(&[1, 0]);

    let mut len_bytes = [0u8; 2];
    LittleEndian::write_u16(&mut len_bytes, header.len() as u16);
    out.extend_from_slice(&len_bytes);
    out.extend_from_slice(header.as_bytes());

    let mut value_bytes = [0u8; 8];
    for value in values.iter() {
        LittleEndian::write_f64(&mut value_bytes, *value);
        out.extend_from_slice(&value_bytes);
    }

    return Ok(out);
}

pub fn write_npy(path: &Path, shape: &[usize], values: &[f64]) -> Result<()> {
    return write_atomic(path, &to_vec(shape, values)?);
}
