use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use super::listing::list_dir;
use crate::error::{Result, StoreError};

/// Fixed name of the record inside a store or output directory.
pub const PREPARATION_FILE: &str = "preparation.json";

// ---------------------------------------------------------------------------
// PreparationRecord
// ---------------------------------------------------------------------------

/// Pre-processing applied to the raw data by an external step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PreparationRecord {
    /// Width of the time-delay embedding window.
    pub n_embeddings: usize,
    /// PCA components, `(input channels, reduced channels)`.
    pub pca_components: Option<Array2<f32>>,
}

impl PreparationRecord {
    pub fn new(n_embeddings: usize, pca_components: Option<Array2<f32>>) -> Self {
        Self {
            n_embeddings,
            pca_components,
        }
    }

    /// Channel count after dimensionality reduction.
    pub fn n_pca_components(&self) -> Option<usize> {
        self.pca_components.as_ref().map(|c| c.ncols())
    }
}

// ---------------------------------------------------------------------------
// Ledger operations
// ---------------------------------------------------------------------------

/// Serialise a record built from its parts into `dir`.
pub fn save(
    dir: &Path,
    n_embeddings: usize,
    pca_components: Option<&Array2<f32>>,
) -> Result<PathBuf> {
    save_record(
        dir,
        &PreparationRecord::new(n_embeddings, pca_components.cloned()),
    )
}

/// Write `record` to `dir/preparation.json`, replacing any previous record.
pub fn save_record(dir: &Path, record: &PreparationRecord) -> Result<PathBuf> {
    fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))?;
    let final_path = dir.join(PREPARATION_FILE);
    let tmp_path = final_path.with_extension("json.tmp");

    let file = File::create(&tmp_path).map_err(|e| StoreError::io(&tmp_path, e))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, record).map_err(|e| StoreError::Preparation {
        path: tmp_path.clone(),
        source: e,
    })?;
    writer.flush().map_err(|e| StoreError::io(&tmp_path, e))?;
    drop(writer);

    fs::rename(&tmp_path, &final_path).map_err(|e| StoreError::io(&final_path, e))?;
    Ok(final_path)
}

/// Look for a record in `dir`. `Ok(None)` means the data was never prepared;
/// a record that exists but does not parse is an error.
pub fn load(dir: &Path) -> Result<Option<PreparationRecord>> {
    let found = list_dir(dir, None)?
        .into_iter()
        .find(|p| p.file_name().is_some_and(|n| n == PREPARATION_FILE));
    let Some(path) = found else {
        return Ok(None);
    };

    let file = File::open(&path).map_err(|e| StoreError::io(&path, e))?;
    let record = serde_json::from_reader(BufReader::new(file))
        .map_err(|e| StoreError::Preparation { path, source: e })?;
    Ok(Some(record))
}
