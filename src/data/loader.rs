use std::path::Path;

use ndarray::Array2;

use super::matlab;
use super::memmap::MappedArray;
use super::model::{MapMode, Source, SubjectArray};
use super::npy;
use crate::diag::Diagnostics;
use crate::error::{Result, StoreError};

/// File extensions picked up when a directory is given as input.
/// Matching is case-sensitive.
pub const RECOGNIZED_EXTENSIONS: [&str; 2] = [".npy", ".mat"];

// ---------------------------------------------------------------------------
// Public entry-point
// ---------------------------------------------------------------------------

/// Load one subject.  Dispatch by extension.
///
/// Supported sources:
/// * in-memory array – used as is
/// * `.npy` – little-endian C-ordered `f32` files are mapped in place; other
///   dtypes or Fortran order are converted
/// * `.mat` – field `data_field` (or an SPM MEEG object), see [`matlab`]
///
/// With a `backing` path the result is memory-mapped: converted data is
/// written there first. Without one everything stays in memory.
pub fn load(
    source: Source,
    data_field: &str,
    backing: Option<&Path>,
    mode: MapMode,
    diagnostics: &dyn Diagnostics,
) -> Result<SubjectArray> {
    let path = match source {
        Source::Array(array) => return persist(array, backing, mode),
        Source::File(path) => path,
    };

    if !path.exists() {
        return Err(StoreError::FileNotFound(path));
    }
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    if name.ends_with(".mat") {
        let array = matlab::load_matlab(&path, data_field, diagnostics)?;
        diagnostics.debug(&format!(
            "read {:?} from {} (field '{data_field}')",
            array.dim(),
            path.display()
        ));
        persist(array, backing, mode)
    } else if name.ends_with(".npy") {
        load_npy(&path, backing, mode, diagnostics)
    } else {
        let extension = name
            .rfind('.')
            .map(|i| name[i..].to_string())
            .unwrap_or_default();
        Err(StoreError::UnsupportedFormat { path, extension })
    }
}

// ---------------------------------------------------------------------------
// NumPy
// ---------------------------------------------------------------------------

fn load_npy(
    path: &Path,
    backing: Option<&Path>,
    mode: MapMode,
    diagnostics: &dyn Diagnostics,
) -> Result<SubjectArray> {
    let Some(backing) = backing else {
        return Ok(SubjectArray::in_memory(npy::read_npy(path)?));
    };

    let header = npy::read_header(path)?;
    if header.is_mappable() {
        return MappedArray::open(path, mode).map(SubjectArray::mapped);
    }

    diagnostics.info(&format!(
        "converting {} (dtype '{}', fortran order: {}) to {}",
        path.display(),
        header.descr,
        header.fortran_order,
        npy::CANONICAL_DESCR
    ));
    persist(npy::read_npy(path)?, Some(backing), mode)
}

// -- helpers --

/// Write `array` to `backing` and map it, or keep it in memory.
fn persist(array: Array2<f32>, backing: Option<&Path>, mode: MapMode) -> Result<SubjectArray> {
    match backing {
        None => Ok(SubjectArray::in_memory(array)),
        Some(path) => {
            npy::write_npy(path, array.view())?;
            MappedArray::open(path, mode).map(SubjectArray::mapped)
        }
    }
}
