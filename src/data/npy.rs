use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use ndarray::{Array2, ArrayView2, ShapeBuilder};
use npyz::{DType, NpyFile, Order, WriterBuilder};

use crate::error::{Result, StoreError};

/// The only dtype that can be mapped in place: little-endian `f32`.
pub const CANONICAL_DESCR: &str = "<f4";

// ---------------------------------------------------------------------------
// Header inspection
// ---------------------------------------------------------------------------

/// What the `.npy` header says about the array that follows it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NpyHeader {
    /// Type string such as `<f4` or `>f8`.
    pub descr: String,
    pub shape: Vec<u64>,
    pub fortran_order: bool,
}

impl NpyHeader {
    /// Whether the data can be viewed directly as a C-ordered 2-D `f32`
    /// array.
    pub fn is_mappable(&self) -> bool {
        self.descr == CANONICAL_DESCR && !self.fortran_order && self.shape.len() == 2
    }

    /// Number of elements described by the shape, saturating at
    /// `usize::MAX`.
    pub fn len(&self) -> usize {
        if self.shape.contains(&0) {
            return 0;
        }
        self.shape
            .iter()
            .try_fold(1u64, |n, &d| n.checked_mul(d))
            .and_then(|n| usize::try_from(n).ok())
            .unwrap_or(usize::MAX)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn open_npy(path: &Path) -> Result<NpyFile<BufReader<File>>> {
    let file = File::open(path).map_err(|e| StoreError::io(path, e))?;
    NpyFile::new(BufReader::new(file)).map_err(|e| StoreError::malformed(path, e.to_string()))
}

fn plain_descr(path: &Path, dtype: &DType) -> Result<String> {
    match dtype {
        DType::Plain(ts) => Ok(ts.to_string()),
        _ => Err(StoreError::malformed(
            path,
            "record and sub-array dtypes are not supported",
        )),
    }
}

/// Byte offset of the array data, read from the magic string, version and
/// header length at the start of a `.npy` file.
pub fn data_offset(bytes: &[u8]) -> Option<usize> {
    if !bytes.starts_with(b"\x93NUMPY") {
        return None;
    }
    match bytes.get(6)? {
        1 => {
            let len = u16::from_le_bytes(bytes.get(8..10)?.try_into().ok()?);
            Some(10 + len as usize)
        }
        2 | 3 => {
            let len = u32::from_le_bytes(bytes.get(8..12)?.try_into().ok()?);
            12usize.checked_add(len as usize)
        }
        _ => None,
    }
}

pub fn read_header(path: &Path) -> Result<NpyHeader> {
    let npy = open_npy(path)?;
    Ok(NpyHeader {
        descr: plain_descr(path, &npy.dtype())?,
        shape: npy.shape().to_vec(),
        fortran_order: matches!(npy.order(), Order::Fortran),
    })
}

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

fn cast<T: Copy + Into<f64>>(values: Vec<T>) -> Vec<f32> {
    values.into_iter().map(|v| v.into() as f32).collect()
}

/// Read a whole 2-D `.npy` file into memory as `f32`.
///
/// Floating point and the common integer dtypes of either endianness are
/// accepted; 64-bit integers go through `f64`.
pub fn read_npy(path: &Path) -> Result<Array2<f32>> {
    let npy = open_npy(path)?;
    let descr = plain_descr(path, &npy.dtype())?;
    let shape = npy.shape().to_vec();
    let fortran = matches!(npy.order(), Order::Fortran);

    let kind = descr.get(1..).unwrap_or("");
    let values = match kind {
        "f4" => npy.into_vec::<f32>(),
        "f8" => npy.into_vec::<f64>().map(cast),
        "i1" => npy.into_vec::<i8>().map(cast),
        "u1" => npy.into_vec::<u8>().map(cast),
        "i2" => npy.into_vec::<i16>().map(cast),
        "u2" => npy.into_vec::<u16>().map(cast),
        "i4" => npy.into_vec::<i32>().map(cast),
        "u4" => npy.into_vec::<u32>().map(cast),
        "i8" => npy
            .into_vec::<i64>()
            .map(|v| v.into_iter().map(|x| x as f32).collect()),
        _ => {
            return Err(StoreError::malformed(
                path,
                format!("unsupported dtype '{descr}'"),
            ))
        }
    }
    .map_err(|e| StoreError::malformed(path, e.to_string()))?;

    to_array2(path, &shape, values, fortran)
}

fn to_array2(path: &Path, shape: &[u64], values: Vec<f32>, fortran: bool) -> Result<Array2<f32>> {
    let (rows, cols) = match shape {
        [rows, cols] => (*rows as usize, *cols as usize),
        other => {
            return Err(StoreError::malformed(
                path,
                format!("expected a 2-D array, got shape {other:?}"),
            ))
        }
    };
    let array = if fortran {
        Array2::from_shape_vec((rows, cols).f(), values)
    } else {
        Array2::from_shape_vec((rows, cols), values)
    }
    .map_err(|e| StoreError::malformed(path, e.to_string()))?;
    Ok(array.as_standard_layout().into_owned())
}

// ---------------------------------------------------------------------------
// Writing
// ---------------------------------------------------------------------------

/// Write `data` as a C-ordered little-endian `f32` `.npy` file.
pub fn write_npy(path: &Path, data: ArrayView2<'_, f32>) -> Result<()> {
    let (rows, cols) = data.dim();
    let file = File::create(path).map_err(|e| StoreError::io(path, e))?;
    let mut writer = npyz::WriteOptions::new()
        .default_dtype()
        .shape(&[rows as u64, cols as u64])
        .writer(BufWriter::new(file))
        .begin_nd()
        .map_err(|e| StoreError::io(path, e))?;
    writer
        .extend(data.iter().copied())
        .map_err(|e| StoreError::io(path, e))?;
    writer.finish().map_err(|e| StoreError::io(path, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn written_files_are_mappable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.npy");
        let data = array![[1.0f32, 2.0], [3.0, 4.0], [5.0, 6.0]];
        write_npy(&path, data.view()).unwrap();

        let header = read_header(&path).unwrap();
        assert_eq!(header.shape, vec![3, 2]);
        assert!(header.is_mappable());
        assert_eq!(read_npy(&path).unwrap(), data);
    }

    #[test]
    fn transposed_views_are_written_in_logical_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.npy");
        let data = array![[1.0f32, 2.0, 3.0], [4.0, 5.0, 6.0]];
        write_npy(&path, data.t()).unwrap();

        assert_eq!(read_npy(&path).unwrap(), data.t().to_owned());
    }

    #[test]
    fn double_precision_is_cast_but_not_mappable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("d.npy");
        let file = File::create(&path).unwrap();
        let mut writer = npyz::WriteOptions::new()
            .default_dtype()
            .shape(&[2, 2])
            .writer(BufWriter::new(file))
            .begin_nd()
            .unwrap();
        writer.extend([0.5f64, 1.5, 2.5, 3.5]).unwrap();
        writer.finish().unwrap();

        let header = read_header(&path).unwrap();
        assert_eq!(header.descr, "<f8");
        assert!(!header.is_mappable());
        assert_eq!(read_npy(&path).unwrap(), array![[0.5f32, 1.5], [2.5, 3.5]]);
    }

    #[test]
    fn element_count_saturates() {
        let header = |shape: Vec<u64>| NpyHeader {
            descr: CANONICAL_DESCR.into(),
            shape,
            fortran_order: false,
        };
        assert_eq!(header(vec![3, 4]).len(), 12);
        assert_eq!(header(vec![u64::MAX, 2]).len(), usize::MAX);
        assert!(header(vec![u64::MAX, u64::MAX, 0]).is_empty());
    }

    #[test]
    fn data_offset_follows_the_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("o.npy");
        write_npy(&path, array![[1.0f32, 2.0]].view()).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        let offset = data_offset(&bytes).unwrap();
        assert_eq!(bytes.len() - offset, 8);
        assert_eq!(&bytes[offset..offset + 4], &1.0f32.to_le_bytes());
        assert_eq!(data_offset(b"not an npy file"), None);
    }

    #[test]
    fn one_dimensional_arrays_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("v.npy");
        let file = File::create(&path).unwrap();
        let mut writer = npyz::WriteOptions::new()
            .default_dtype()
            .shape(&[3])
            .writer(BufWriter::new(file))
            .begin_nd()
            .unwrap();
        writer.extend([1.0f32, 2.0, 3.0]).unwrap();
        writer.finish().unwrap();

        let err = read_npy(&path).unwrap_err();
        assert!(matches!(err, StoreError::Malformed { .. }), "{err}");
    }
}
