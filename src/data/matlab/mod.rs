//! MATLAB containers.
//!
//! A `.mat` path is handed to an ordered list of decoders. A decoder that
//! does not recognise the on-disk encoding answers with
//! [`StoreError::UnsupportedEncoding`] and the next one is tried; any other
//! failure ends the attempt.
//!
//! | decoder  | encoding                          |
//! |----------|-----------------------------------|
//! | `level5` | MAT v5 / v7 (optionally zlib)     |
//! | `mat73`  | MAT v7.3 (HDF5, `mat73` feature)  |

use std::collections::BTreeMap;
use std::path::Path;

use ndarray::{Array2, ArrayView2, ShapeBuilder};

use crate::diag::Diagnostics;
use crate::error::{Result, StoreError};

pub mod level5;
pub mod mat73;
pub mod spm;

// ---------------------------------------------------------------------------
// Decoded values
// ---------------------------------------------------------------------------

/// Numeric payload, kept in the precision it was stored with.
#[derive(Debug, Clone, PartialEq)]
pub enum NumericData {
    Single(Vec<f32>),
    Double(Vec<f64>),
}

impl NumericData {
    pub fn len(&self) -> usize {
        match self {
            NumericData::Single(v) => v.len(),
            NumericData::Double(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_f32(&self) -> Vec<f32> {
        match self {
            NumericData::Single(v) => v.clone(),
            NumericData::Double(v) => v.iter().map(|&x| x as f32).collect(),
        }
    }

    pub fn to_f64(&self) -> Vec<f64> {
        match self {
            NumericData::Single(v) => v.iter().map(|&x| x as f64).collect(),
            NumericData::Double(v) => v.clone(),
        }
    }
}

/// A numeric MATLAB array: dimensions in MATLAB order, data column-major.
#[derive(Debug, Clone, PartialEq)]
pub struct MatNumeric {
    pub dims: Vec<usize>,
    pub data: NumericData,
}

impl MatNumeric {
    /// Row-major `f32` matrix, or `None` if the array has more than two
    /// non-singleton dimensions.
    pub fn to_array2(&self) -> Option<Array2<f32>> {
        let (rows, cols) = match self.dims.as_slice() {
            [] => (0, 0),
            [n] => (*n, 1),
            [rows, cols, rest @ ..] if rest.iter().all(|&d| d == 1) => (*rows, *cols),
            _ => return None,
        };
        let array = Array2::from_shape_vec((rows, cols).f(), self.data.to_f32()).ok()?;
        Some(array.as_standard_layout().into_owned())
    }
}

pub type MatStruct = BTreeMap<String, MatValue>;

/// Top-level variables of a MAT file, by name.
pub type MatVars = BTreeMap<String, MatValue>;

#[derive(Debug, Clone, PartialEq)]
pub enum MatValue {
    Numeric(MatNumeric),
    Char(String),
    /// One map per element of the struct array.
    Struct(Vec<MatStruct>),
    Cell(Vec<MatValue>),
    Empty,
    /// A class this reader does not decode (sparse, function handles, ...).
    Unsupported(String),
}

impl MatValue {
    /// Column-major numeric value holding `view`.
    pub fn from_array(view: ArrayView2<'_, f32>) -> Self {
        let (rows, cols) = view.dim();
        MatValue::Numeric(MatNumeric {
            dims: vec![rows, cols],
            data: NumericData::Single(view.t().iter().copied().collect()),
        })
    }

    /// Field of a 1x1 struct.
    pub fn field(&self, name: &str) -> Option<&MatValue> {
        match self {
            MatValue::Struct(elements) if elements.len() == 1 => elements[0].get(name),
            _ => None,
        }
    }

    pub fn as_numeric(&self) -> Option<&MatNumeric> {
        match self {
            MatValue::Numeric(n) => Some(n),
            _ => None,
        }
    }

    /// Text of a char array. Numeric arrays are read as UTF-16 code units,
    /// which is how v7.3 files store chars.
    pub fn as_string(&self) -> Option<String> {
        match self {
            MatValue::Char(s) => Some(s.clone()),
            MatValue::Numeric(n) => {
                let units: Vec<u16> = n.data.to_f64().iter().map(|&u| u as u16).collect();
                Some(String::from_utf16_lossy(&units))
            }
            _ => None,
        }
    }

    pub fn class_name(&self) -> &str {
        match self {
            MatValue::Numeric(_) => "numeric",
            MatValue::Char(_) => "char",
            MatValue::Struct(_) => "struct",
            MatValue::Cell(_) => "cell",
            MatValue::Empty => "empty",
            MatValue::Unsupported(class) => class,
        }
    }
}

// ---------------------------------------------------------------------------
// Decoder chain
// ---------------------------------------------------------------------------

pub trait MatDecoder {
    fn name(&self) -> &'static str;

    /// Decode every top-level variable, or report
    /// [`StoreError::UnsupportedEncoding`] for files in another encoding.
    fn decode(&self, path: &Path) -> Result<MatVars>;
}

/// The decoders tried for every `.mat` file, in order.
pub fn decoder_chain() -> Vec<Box<dyn MatDecoder>> {
    vec![Box::new(level5::Level5Decoder), Box::new(mat73::Mat73Decoder)]
}

/// Run `decoders` in order until one accepts the file.
pub fn decode_with(
    decoders: &[Box<dyn MatDecoder>],
    path: &Path,
    diagnostics: &dyn Diagnostics,
) -> Result<MatVars> {
    let mut last_unsupported = None;
    for decoder in decoders {
        match decoder.decode(path) {
            Ok(vars) => return Ok(vars),
            Err(e) if e.is_unsupported_encoding() => {
                diagnostics.debug(&format!("{} decoder skipped: {e}", decoder.name()));
                last_unsupported = Some(e);
            }
            Err(e) => return Err(e),
        }
    }
    Err(last_unsupported.unwrap_or_else(|| StoreError::UnsupportedEncoding {
        path: path.to_path_buf(),
        reason: "no MATLAB decoder available".to_string(),
    }))
}

pub fn read_mat(path: &Path, diagnostics: &dyn Diagnostics) -> Result<MatVars> {
    decode_with(&decoder_chain(), path, diagnostics)
}

/// Extract `field` from a MATLAB file as a 2-D array.
///
/// Files holding an SPM MEEG object (a top-level `D`) are read through the
/// object's data file instead, whatever `field` says.
pub fn load_matlab(path: &Path, field: &str, diagnostics: &dyn Diagnostics) -> Result<Array2<f32>> {
    let vars = read_mat(path, diagnostics)?;

    if let Some(object) = vars.get(spm::SPM_OBJECT_FIELD) {
        diagnostics.warn("Assuming that key 'D' corresponds to an SPM MEEG object.");
        return spm::read_spm(path, object);
    }

    let value = vars.get(field).ok_or_else(|| StoreError::MissingField {
        path: path.to_path_buf(),
        field: field.to_string(),
    })?;
    let numeric = value.as_numeric().ok_or_else(|| {
        StoreError::malformed(
            path,
            format!("field '{field}' is a {} array, not numeric", value.class_name()),
        )
    })?;
    numeric.to_array2().ok_or_else(|| {
        StoreError::malformed(
            path,
            format!("field '{field}' has dimensions {:?}, expected 2-D", numeric.dims),
        )
    })
}
