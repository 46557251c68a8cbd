//! SPM MEEG objects.
//!
//! SPM saves its `meeg` object as a struct `D` in a `.mat` file; the samples
//! live in a separate raw `.dat` file described by `D.data`:
//!
//! * `fname`     – path of the data file (often absolute, from another machine)
//! * `dim`       – `[channels, samples]` or `[channels, samples, trials]`
//! * `dtype`     – e.g. `float32-le`, `int16-be`
//! * `offset`    – bytes to skip at the start of the file (optional)
//! * `scl_slope` – scalar or per-channel scale for integer data (optional)
//!
//! The data file is column-major, so the result is `(channels, time)` with
//! trials laid end to end along time.

use std::path::{Path, PathBuf};

use ndarray::{Array2, ShapeBuilder};

use super::MatValue;
use crate::error::{Result, StoreError};

/// Top-level variable that marks a file as an SPM MEEG object.
pub const SPM_OBJECT_FIELD: &str = "D";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SampleKind {
    F32,
    F64,
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
}

impl SampleKind {
    fn size(self) -> usize {
        match self {
            SampleKind::I8 | SampleKind::U8 => 1,
            SampleKind::I16 | SampleKind::U16 => 2,
            SampleKind::F32 | SampleKind::I32 | SampleKind::U32 => 4,
            SampleKind::F64 => 8,
        }
    }
}

/// `float32-le` → (`F32`, little endian).
fn parse_dtype(dtype: &str) -> Option<(SampleKind, bool)> {
    let (kind, little) = match dtype.trim().to_ascii_lowercase().rsplit_once('-') {
        Some((kind, "le")) => (kind.to_string(), true),
        Some((kind, "be")) => (kind.to_string(), false),
        _ => (dtype.trim().to_ascii_lowercase(), true),
    };
    let kind = match kind.as_str() {
        "float32" | "float" => SampleKind::F32,
        "float64" | "double" => SampleKind::F64,
        "int8" => SampleKind::I8,
        "uint8" => SampleKind::U8,
        "int16" => SampleKind::I16,
        "uint16" => SampleKind::U16,
        "int32" => SampleKind::I32,
        "uint32" => SampleKind::U32,
        _ => return None,
    };
    Some((kind, little))
}

fn decode_samples(raw: &[u8], kind: SampleKind, little: bool) -> Vec<f32> {
    macro_rules! samples {
        ($t:ty, $n:literal) => {
            raw.chunks_exact($n)
                .map(|c| {
                    let mut b = [0u8; $n];
                    b.copy_from_slice(c);
                    if little {
                        <$t>::from_le_bytes(b) as f32
                    } else {
                        <$t>::from_be_bytes(b) as f32
                    }
                })
                .collect()
        };
    }
    match kind {
        SampleKind::F32 => samples!(f32, 4),
        SampleKind::F64 => samples!(f64, 8),
        SampleKind::I8 => samples!(i8, 1),
        SampleKind::U8 => samples!(u8, 1),
        SampleKind::I16 => samples!(i16, 2),
        SampleKind::U16 => samples!(u16, 2),
        SampleKind::I32 => samples!(i32, 4),
        SampleKind::U32 => samples!(u32, 4),
    }
}

/// SPM records the data file path from the machine that wrote it. When that
/// path does not exist here, look for the same file name next to the `.mat`.
fn resolve_data_file(mat_path: &Path, fname: &str) -> PathBuf {
    let recorded = PathBuf::from(fname);
    if !fname.is_empty() && recorded.is_file() {
        return recorded;
    }
    let dir = mat_path.parent().unwrap_or_else(|| Path::new("."));
    match fname.rsplit(['/', '\\']).next().filter(|n| !n.is_empty()) {
        Some(name) => dir.join(name),
        None => mat_path.with_extension("dat"),
    }
}

fn scalars(value: Option<&MatValue>) -> Option<Vec<f64>> {
    value
        .and_then(MatValue::as_numeric)
        .map(|n| n.data.to_f64())
}

/// A non-negative integral value that fits a `usize`.
fn whole(value: f64) -> Option<usize> {
    (value.is_finite() && value >= 0.0 && value.fract() == 0.0 && value < usize::MAX as f64)
        .then_some(value as usize)
}

/// Read the samples of the SPM object `object`, stored in `mat_path`.
pub fn read_spm(mat_path: &Path, object: &MatValue) -> Result<Array2<f32>> {
    let bad = |reason: &str| StoreError::malformed(mat_path, format!("SPM object: {reason}"));

    let data = object.field("data").ok_or_else(|| bad("no 'data' field"))?;
    let fname = data
        .field("fname")
        .and_then(MatValue::as_string)
        .unwrap_or_default();
    let raw_dims = scalars(data.field("dim")).ok_or_else(|| bad("no 'data.dim' field"))?;
    let dims: Vec<usize> = raw_dims
        .iter()
        .map(|&d| whole(d))
        .collect::<Option<_>>()
        .ok_or_else(|| bad(&format!("invalid dimensions {raw_dims:?}")))?;
    let dtype = data
        .field("dtype")
        .and_then(MatValue::as_string)
        .unwrap_or_else(|| "float32-le".to_string());
    let raw_offset = scalars(data.field("offset"))
        .and_then(|v| v.first().copied())
        .unwrap_or(0.0);
    let offset = whole(raw_offset).ok_or_else(|| bad(&format!("invalid offset {raw_offset}")))?;
    let slope = scalars(data.field("scl_slope")).unwrap_or_default();

    let (n_channels, n_time) = match dims.as_slice() {
        [c] => (*c, 1),
        [c, s] => (*c, *s),
        [c, s, t] => (
            *c,
            s.checked_mul(*t)
                .ok_or_else(|| bad(&format!("dimensions {dims:?} overflow")))?,
        ),
        other => return Err(bad(&format!("unexpected dimensions {other:?}"))),
    };
    let (kind, little) =
        parse_dtype(&dtype).ok_or_else(|| bad(&format!("unsupported dtype '{dtype}'")))?;

    let dat_path = resolve_data_file(mat_path, &fname);
    let bytes = std::fs::read(&dat_path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => StoreError::FileNotFound(dat_path.clone()),
        _ => StoreError::io(&dat_path, e),
    })?;
    let needed = n_channels
        .checked_mul(n_time)
        .and_then(|n| n.checked_mul(kind.size()))
        .and_then(|n| n.checked_add(offset))
        .ok_or_else(|| bad(&format!("dimensions {dims:?} at offset {offset} overflow")))?;
    if bytes.len() < needed {
        return Err(StoreError::malformed(
            &dat_path,
            format!("expected at least {needed} bytes, found {}", bytes.len()),
        ));
    }

    let mut values = decode_samples(&bytes[offset..needed], kind, little);
    match slope.len() {
        0 => {}
        1 => values.iter_mut().for_each(|v| *v *= slope[0] as f32),
        n if n == n_channels => {
            for (i, v) in values.iter_mut().enumerate() {
                *v *= slope[i % n_channels] as f32;
            }
        }
        n => return Err(bad(&format!("{n} scale factors for {n_channels} channels"))),
    }

    let array = Array2::from_shape_vec((n_channels, n_time).f(), values)
        .map_err(|e| bad(&e.to_string()))?;
    Ok(array.as_standard_layout().into_owned())
}
