//! Level 5 MAT-files (MATLAB v5, v6 and v7).
//!
//! Layout: a 128-byte header followed by tagged data elements. Each variable
//! is a `miMATRIX` element, possibly wrapped in a zlib `miCOMPRESSED`
//! element. Sub-elements inside a matrix are 8-byte aligned; elements of at
//! most four bytes may use the packed "small data element" tag.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;

use flate2::read::ZlibDecoder;

use super::{MatDecoder, MatNumeric, MatStruct, MatValue, MatVars, NumericData};
use crate::error::{Result, StoreError};

const HEADER_LEN: usize = 128;
const VERSION_5: u16 = 0x0100;
const VERSION_73: u16 = 0x0200;

// Data types
const MI_INT8: u32 = 1;
const MI_UINT8: u32 = 2;
const MI_INT16: u32 = 3;
const MI_UINT16: u32 = 4;
const MI_INT32: u32 = 5;
const MI_UINT32: u32 = 6;
const MI_SINGLE: u32 = 7;
const MI_DOUBLE: u32 = 9;
const MI_INT64: u32 = 12;
const MI_UINT64: u32 = 13;
const MI_MATRIX: u32 = 14;
const MI_COMPRESSED: u32 = 15;
const MI_UTF8: u32 = 16;
const MI_UTF16: u32 = 17;

// Array classes
const MX_CELL: u32 = 1;
const MX_STRUCT: u32 = 2;
const MX_OBJECT: u32 = 3;
const MX_CHAR: u32 = 4;
const MX_SPARSE: u32 = 5;
const MX_DOUBLE: u32 = 6;
const MX_SINGLE: u32 = 7;
const MX_UINT64: u32 = 15;

const FLAG_COMPLEX: u32 = 0x0800;

// ---------------------------------------------------------------------------
// Decoder
// ---------------------------------------------------------------------------

/// Reads MAT v5/v6/v7 files; answers `UnsupportedEncoding` for v7.3 and for
/// anything without a Level 5 header.
#[derive(Debug, Default, Clone, Copy)]
pub struct Level5Decoder;

impl MatDecoder for Level5Decoder {
    fn name(&self) -> &'static str {
        "level5"
    }

    fn decode(&self, path: &Path) -> Result<MatVars> {
        let mut file = File::open(path).map_err(|e| StoreError::io(path, e))?;
        let mut header = [0u8; HEADER_LEN];
        if file.read_exact(&mut header).is_err() {
            return Err(unsupported(path, "too short for a Level 5 MAT-file header"));
        }
        let endian = check_header(path, &header)?;

        let mut body = Vec::new();
        file.read_to_end(&mut body)
            .map_err(|e| StoreError::io(path, e))?;
        parse_body(path, &body, endian)
    }
}

fn unsupported(path: &Path, reason: impl Into<String>) -> StoreError {
    StoreError::UnsupportedEncoding {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Endian {
    Little,
    Big,
}

impl Endian {
    fn u16(self, b: [u8; 2]) -> u16 {
        match self {
            Endian::Little => u16::from_le_bytes(b),
            Endian::Big => u16::from_be_bytes(b),
        }
    }

    fn u32(self, b: [u8; 4]) -> u32 {
        match self {
            Endian::Little => u32::from_le_bytes(b),
            Endian::Big => u32::from_be_bytes(b),
        }
    }
}

fn check_header(path: &Path, header: &[u8; HEADER_LEN]) -> Result<Endian> {
    let endian = match &header[126..128] {
        b"IM" => Endian::Little,
        b"MI" => Endian::Big,
        _ => return Err(unsupported(path, "not a Level 5 MAT-file")),
    };
    match endian.u16([header[124], header[125]]) {
        VERSION_5 => Ok(endian),
        VERSION_73 => Err(unsupported(path, "MATLAB 7.3 files are HDF5 containers")),
        other => Err(unsupported(
            path,
            format!("unknown MAT-file version {other:#06x}"),
        )),
    }
}

// ---------------------------------------------------------------------------
// Element reader
// ---------------------------------------------------------------------------

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
    endian: Endian,
    path: &'a Path,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8], endian: Endian, path: &'a Path) -> Self {
        Self {
            buf,
            pos: 0,
            endian,
            path,
        }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn truncated(&self) -> StoreError {
        StoreError::malformed(self.path, "truncated MAT-file element")
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.remaining() {
            return Err(self.truncated());
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(self.endian.u32([b[0], b[1], b[2], b[3]]))
    }

    /// Next `(type, payload)` element, skipping its padding.
    fn element(&mut self) -> Result<(u32, &'a [u8])> {
        let tag = self.u32()?;
        let small_len = (tag >> 16) as usize;
        if small_len != 0 {
            let ty = tag & 0xFFFF;
            let packed = self.take(4)?;
            if small_len > 4 {
                return Err(StoreError::malformed(self.path, "bad small data element"));
            }
            return Ok((ty, &packed[..small_len]));
        }

        let len = self.u32()? as usize;
        let data = self.take(len)?;
        if tag != MI_COMPRESSED {
            let pad = (8 - len % 8) % 8;
            self.pos += pad.min(self.remaining());
        }
        Ok((tag, data))
    }
}

fn parse_body(path: &Path, body: &[u8], endian: Endian) -> Result<MatVars> {
    let mut reader = Reader::new(body, endian, path);
    let mut vars = BTreeMap::new();

    while reader.remaining() >= 8 {
        let (ty, data) = reader.element()?;
        let parsed = match ty {
            MI_MATRIX => parse_matrix(path, data, endian)?,
            MI_COMPRESSED => {
                let mut inflated = Vec::new();
                ZlibDecoder::new(data)
                    .read_to_end(&mut inflated)
                    .map_err(|e| {
                        StoreError::malformed(path, format!("corrupt compressed element: {e}"))
                    })?;
                let mut inner = Reader::new(&inflated, endian, path);
                match inner.element()? {
                    (MI_MATRIX, matrix) => parse_matrix(path, matrix, endian)?,
                    _ => None,
                }
            }
            _ => None,
        };
        if let Some((name, value)) = parsed {
            if !name.is_empty() {
                vars.insert(name, value);
            }
        }
    }
    Ok(vars)
}

// ---------------------------------------------------------------------------
// miMATRIX
// ---------------------------------------------------------------------------

/// Decode one `miMATRIX` payload into `(name, value)`. Returns `None` for
/// classes whose layout is not the standard one (opaque objects).
fn parse_matrix(path: &Path, data: &[u8], endian: Endian) -> Result<Option<(String, MatValue)>> {
    if data.is_empty() {
        return Ok(Some((String::new(), MatValue::Empty)));
    }
    let mut r = Reader::new(data, endian, path);

    let (_, flags) = r.element()?;
    if flags.len() < 4 {
        return Err(StoreError::malformed(path, "array flags too short"));
    }
    let flags = endian.u32([flags[0], flags[1], flags[2], flags[3]]);
    let class = flags & 0xFF;
    let complex = flags & FLAG_COMPLEX != 0;
    if class > MX_UINT64 {
        return Ok(None);
    }

    let (_, dims_raw) = r.element()?;
    let dims = decode_dims(path, dims_raw, endian)?;
    let numel = dims
        .iter()
        .try_fold(1usize, |n, &d| n.checked_mul(d))
        .ok_or_else(|| StoreError::malformed(path, format!("dimensions {dims:?} overflow")))?;
    // Every cell or field is an element of at least 8 bytes.
    let capacity = numel.min(r.remaining() / 8);

    let (_, name_raw) = r.element()?;
    let name = String::from_utf8_lossy(name_raw).into_owned();

    let value = match class {
        MX_DOUBLE..=MX_UINT64 => {
            let (ty, real) = r.element()?;
            let data = decode_numeric(path, ty, real, endian, class == MX_SINGLE)?;
            if data.len() != numel {
                return Err(StoreError::malformed(
                    path,
                    format!("'{name}' holds {} values for dimensions {dims:?}", data.len()),
                ));
            }
            // Imaginary parts are dropped.
            if complex {
                r.element()?;
            }
            MatValue::Numeric(MatNumeric { dims, data })
        }
        MX_CHAR => {
            let (ty, raw) = r.element()?;
            MatValue::Char(decode_chars(&dims, ty, raw, endian))
        }
        MX_CELL => {
            let mut items = Vec::with_capacity(capacity);
            for _ in 0..numel {
                let (_, cell) = r.element()?;
                items.push(nested(path, cell, endian)?);
            }
            MatValue::Cell(items)
        }
        MX_STRUCT | MX_OBJECT => {
            if class == MX_OBJECT {
                r.element()?; // class name
            }
            let (_, len_raw) = r.element()?;
            if len_raw.len() < 4 {
                return Err(StoreError::malformed(path, "bad struct field name length"));
            }
            let name_len = endian.u32([len_raw[0], len_raw[1], len_raw[2], len_raw[3]]) as usize;
            let (_, names_raw) = r.element()?;
            let fields: Vec<String> = if name_len == 0 {
                Vec::new()
            } else {
                names_raw
                    .chunks(name_len)
                    .map(|chunk| {
                        let end = chunk.iter().position(|&b| b == 0).unwrap_or(chunk.len());
                        String::from_utf8_lossy(&chunk[..end]).into_owned()
                    })
                    .collect()
            };

            let mut elements = Vec::with_capacity(capacity);
            for _ in 0..numel {
                let mut element = MatStruct::new();
                for field in &fields {
                    let (_, value) = r.element()?;
                    element.insert(field.clone(), nested(path, value, endian)?);
                }
                elements.push(element);
            }
            MatValue::Struct(elements)
        }
        MX_SPARSE => MatValue::Unsupported("sparse".to_string()),
        other => MatValue::Unsupported(format!("class {other}")),
    };

    Ok(Some((name, value)))
}

/// Dimensions are stored as `miINT32`; negative values mean a corrupt file.
fn decode_dims(path: &Path, raw: &[u8], endian: Endian) -> Result<Vec<usize>> {
    raw.chunks_exact(4)
        .map(|c| {
            let d = endian.u32([c[0], c[1], c[2], c[3]]) as i32;
            usize::try_from(d)
                .map_err(|_| StoreError::malformed(path, format!("negative array dimension {d}")))
        })
        .collect()
}

fn nested(path: &Path, data: &[u8], endian: Endian) -> Result<MatValue> {
    Ok(match parse_matrix(path, data, endian)? {
        Some((_, value)) => value,
        None => MatValue::Unsupported("opaque".to_string()),
    })
}

fn read_values<const N: usize, T>(raw: &[u8], convert: impl Fn([u8; N]) -> T) -> Vec<T> {
    raw.chunks_exact(N)
        .map(|c| {
            let mut bytes = [0u8; N];
            bytes.copy_from_slice(c);
            convert(bytes)
        })
        .collect()
}

/// Numeric storage types may be narrower than the array class (MATLAB
/// stores doubles as `miUINT8` when the values allow it).
fn decode_numeric(
    path: &Path,
    ty: u32,
    raw: &[u8],
    endian: Endian,
    single: bool,
) -> Result<NumericData> {
    let le = endian == Endian::Little;
    macro_rules! num {
        ($t:ty) => {
            read_values(raw, |b| {
                if le {
                    <$t>::from_le_bytes(b) as f64
                } else {
                    <$t>::from_be_bytes(b) as f64
                }
            })
        };
    }

    if single && ty == MI_SINGLE {
        return Ok(NumericData::Single(read_values(raw, |b| {
            if le {
                f32::from_le_bytes(b)
            } else {
                f32::from_be_bytes(b)
            }
        })));
    }

    let values: Vec<f64> = match ty {
        MI_DOUBLE => num!(f64),
        MI_SINGLE => num!(f32),
        MI_INT8 => num!(i8),
        MI_UINT8 => num!(u8),
        MI_INT16 => num!(i16),
        MI_UINT16 => num!(u16),
        MI_INT32 => num!(i32),
        MI_UINT32 => num!(u32),
        MI_INT64 => num!(i64),
        MI_UINT64 => num!(u64),
        other => {
            return Err(StoreError::malformed(
                path,
                format!("unexpected numeric storage type {other}"),
            ))
        }
    };
    Ok(if single {
        NumericData::Single(values.into_iter().map(|v| v as f32).collect())
    } else {
        NumericData::Double(values)
    })
}

/// Char arrays are column-major; multi-row arrays come back one row per line.
fn decode_chars(dims: &[usize], ty: u32, raw: &[u8], endian: Endian) -> String {
    let units: Vec<char> = match ty {
        MI_UINT16 | MI_UTF16 => {
            let units = read_values(raw, |b| endian.u16(b));
            char::decode_utf16(units)
                .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
                .collect()
        }
        _ => String::from_utf8_lossy(raw).chars().collect(),
    };

    let rows = dims.first().copied().unwrap_or(1);
    if rows <= 1 || units.len() % rows != 0 {
        return units.into_iter().collect();
    }
    let cols = units.len() / rows;
    (0..rows)
        .map(|r| (0..cols).map(|c| units[r + rows * c]).collect::<String>())
        .collect::<Vec<_>>()
        .join("\n")
}

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

/// Write `vars` as an uncompressed little-endian Level 5 MAT-file.
///
/// Numeric, char, cell and 1x1 struct values are supported.
pub fn write_mat(path: &Path, vars: &[(&str, &MatValue)]) -> Result<()> {
    let mut out = Vec::with_capacity(HEADER_LEN);
    let mut text = format!(
        "MATLAB 5.0 MAT-file, Platform: {}, Created by: subject-store",
        std::env::consts::OS
    )
    .into_bytes();
    text.resize(116, b' ');
    out.extend_from_slice(&text);
    out.extend_from_slice(&[0u8; 8]);
    out.extend_from_slice(&VERSION_5.to_le_bytes());
    out.extend_from_slice(b"IM");

    for (name, value) in vars {
        encode_matrix(path, name, value, &mut out)?;
    }

    let file = File::create(path).map_err(|e| StoreError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    writer
        .write_all(&out)
        .and_then(|()| writer.flush())
        .map_err(|e| StoreError::io(path, e))
}

fn push_element(out: &mut Vec<u8>, ty: u32, payload: &[u8]) {
    out.extend_from_slice(&ty.to_le_bytes());
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(payload);
    let pad = (8 - payload.len() % 8) % 8;
    out.extend(std::iter::repeat(0u8).take(pad));
}

fn push_matrix_header(body: &mut Vec<u8>, class: u32, dims: &[usize], name: &str) {
    let mut flags = Vec::with_capacity(8);
    flags.extend_from_slice(&class.to_le_bytes());
    flags.extend_from_slice(&0u32.to_le_bytes());
    push_element(body, MI_UINT32, &flags);

    let dims: Vec<u8> = dims
        .iter()
        .flat_map(|&d| (d as i32).to_le_bytes())
        .collect();
    push_element(body, MI_INT32, &dims);
    push_element(body, MI_INT8, name.as_bytes());
}

fn encode_matrix(path: &Path, name: &str, value: &MatValue, out: &mut Vec<u8>) -> Result<()> {
    let mut body = Vec::new();

    match value {
        MatValue::Numeric(numeric) => {
            let (class, ty, payload): (u32, u32, Vec<u8>) = match &numeric.data {
                NumericData::Single(v) => (
                    MX_SINGLE,
                    MI_SINGLE,
                    v.iter().flat_map(|x| x.to_le_bytes()).collect(),
                ),
                NumericData::Double(v) => (
                    MX_DOUBLE,
                    MI_DOUBLE,
                    v.iter().flat_map(|x| x.to_le_bytes()).collect(),
                ),
            };
            let dims = match numeric.dims.len() {
                0 => vec![0, 0],
                1 => vec![numeric.dims[0], 1],
                _ => numeric.dims.clone(),
            };
            push_matrix_header(&mut body, class, &dims, name);
            push_element(&mut body, ty, &payload);
        }
        MatValue::Empty => {
            push_matrix_header(&mut body, MX_DOUBLE, &[0, 0], name);
            push_element(&mut body, MI_DOUBLE, &[]);
        }
        MatValue::Char(text) => {
            let units: Vec<u16> = text.encode_utf16().collect();
            push_matrix_header(&mut body, MX_CHAR, &[1, units.len()], name);
            let payload: Vec<u8> = units.iter().flat_map(|u| u.to_le_bytes()).collect();
            push_element(&mut body, MI_UINT16, &payload);
        }
        MatValue::Cell(items) => {
            push_matrix_header(&mut body, MX_CELL, &[1, items.len()], name);
            for item in items {
                encode_matrix(path, "", item, &mut body)?;
            }
        }
        MatValue::Struct(elements) if elements.len() == 1 => {
            let fields = &elements[0];
            push_matrix_header(&mut body, MX_STRUCT, &[1, 1], name);
            let name_len = fields.keys().map(String::len).max().unwrap_or(0) + 1;
            push_element(&mut body, MI_INT32, &(name_len as i32).to_le_bytes());
            let mut names = Vec::with_capacity(name_len * fields.len());
            for field in fields.keys() {
                let start = names.len();
                names.extend_from_slice(field.as_bytes());
                names.resize(start + name_len, 0);
            }
            push_element(&mut body, MI_INT8, &names);
            for field_value in fields.values() {
                encode_matrix(path, "", field_value, &mut body)?;
            }
        }
        other => {
            return Err(StoreError::malformed(
                path,
                format!("cannot write a {} value as '{name}'", other.class_name()),
            ))
        }
    }

    push_element(out, MI_MATRIX, &body);
    Ok(())
}
