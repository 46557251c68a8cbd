//! MATLAB v7.3 files, which are HDF5 containers with a 512-byte user block.
//!
//! Datasets are read as `f64` with their HDF5 shape reversed into MATLAB
//! order (HDF5 stores the transpose of a column-major MATLAB array, so the
//! flat data is already column-major). Groups become 1x1 structs. Char
//! arrays arrive as numeric UTF-16 code units; see
//! [`MatValue::as_string`](super::MatValue::as_string).
//!
//! Without the `mat73` feature the decoder always answers
//! `UnsupportedEncoding`.

use std::path::Path;

#[cfg(feature = "mat73")]
use super::{MatNumeric, MatStruct, MatValue, NumericData};
use super::{MatDecoder, MatVars};
use crate::error::{Result, StoreError};

#[derive(Debug, Default, Clone, Copy)]
pub struct Mat73Decoder;

impl MatDecoder for Mat73Decoder {
    fn name(&self) -> &'static str {
        "mat73"
    }

    #[cfg(feature = "mat73")]
    fn decode(&self, path: &Path) -> Result<MatVars> {
        let file = hdf5::File::open(path).map_err(|e| StoreError::UnsupportedEncoding {
            path: path.to_path_buf(),
            reason: format!("not an HDF5 container: {e}"),
        })?;
        let names = file
            .member_names()
            .map_err(|e| StoreError::malformed(path, e.to_string()))?;

        let mut vars = MatVars::new();
        for name in names {
            // "#refs#" and "#subsystem#" hold MATLAB bookkeeping.
            if name.starts_with('#') {
                continue;
            }
            let value = read_member(&file, &name);
            vars.insert(name, value);
        }
        Ok(vars)
    }

    #[cfg(not(feature = "mat73"))]
    fn decode(&self, path: &Path) -> Result<MatVars> {
        Err(StoreError::UnsupportedEncoding {
            path: path.to_path_buf(),
            reason: "MATLAB 7.3 support requires the `mat73` feature".to_string(),
        })
    }
}

/// Members that cannot be read (object references, opaque types) come back
/// as `Unsupported` rather than failing the whole file.
#[cfg(feature = "mat73")]
fn read_member(group: &hdf5::Group, name: &str) -> MatValue {
    if let Ok(dataset) = group.dataset(name) {
        let dims: Vec<usize> = dataset.shape().into_iter().rev().collect();
        return match dataset.read_raw::<f64>() {
            Ok(data) => MatValue::Numeric(MatNumeric {
                dims,
                data: NumericData::Double(data),
            }),
            Err(e) => MatValue::Unsupported(format!("unreadable dataset: {e}")),
        };
    }

    match group.group(name) {
        Ok(sub) => {
            let mut fields = MatStruct::new();
            for child in sub.member_names().unwrap_or_default() {
                let value = read_member(&sub, &child);
                fields.insert(child, value);
            }
            MatValue::Struct(vec![fields])
        }
        Err(e) => MatValue::Unsupported(format!("unreadable member: {e}")),
    }
}
