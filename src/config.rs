use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::data::model::MapMode;
use crate::error::{Result, StoreError};

/// Field read from MATLAB files unless told otherwise.
pub const DEFAULT_DATA_FIELD: &str = "X";

// ---------------------------------------------------------------------------
// StoreOptions
// ---------------------------------------------------------------------------

/// Settings used when opening a [`Store`](crate::Store).
///
/// Every field has a default, so a JSON config file only needs the keys it
/// wants to change:
///
/// ```json
/// { "store_dir": "/scratch/store", "time_axis_first": false }
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct StoreOptions {
    /// MATLAB field holding the data.
    pub data_field: String,
    /// Sampling frequency in Hz, if known.
    pub sampling_frequency: Option<f64>,
    /// Directory for the backing files created during ingestion.
    pub store_dir: PathBuf,
    /// Inputs are `(samples, channels)`; when false they are transposed.
    pub time_axis_first: bool,
    /// Leave the backing files on disk when the store is closed.
    pub keep_backing_on_close: bool,
    /// How ingested backing files are mapped.
    pub map_mode: MapMode,
    /// Draw progress bars while loading and saving.
    pub progress: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            data_field: DEFAULT_DATA_FIELD.to_string(),
            sampling_frequency: None,
            store_dir: std::env::temp_dir().join("subject-store"),
            time_axis_first: true,
            keep_backing_on_close: false,
            map_mode: MapMode::ReadOnly,
            progress: false,
        }
    }
}

impl StoreOptions {
    /// Defaults with the backing files placed in `store_dir`.
    pub fn in_dir(store_dir: impl Into<PathBuf>) -> Self {
        Self {
            store_dir: store_dir.into(),
            ..Self::default()
        }
    }

    /// Read options from a JSON file.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| StoreError::io(path, e))?;
        serde_json::from_str(&text).map_err(|e| StoreError::malformed(path, e.to_string()))
    }
}
