use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ndarray::{s, ArrayD, ArrayView2, ArrayViewMut2, Ix2, Ix3};

use crate::config::StoreOptions;
use crate::data::listing::list_dir;
use crate::data::loader::RECOGNIZED_EXTENSIONS;
use crate::data::matlab::level5::write_mat;
use crate::data::matlab::MatValue;
use crate::data::memmap::MemmapStore;
use crate::data::model::{Input, Source, SubjectArray};
use crate::data::npy::write_npy;
use crate::data::preparation::{self, PreparationRecord};
use crate::data::validate::validate;
use crate::data::windows::{Batches, WindowOptions};
use crate::diag::{self, Diagnostics, LogDiagnostics};
use crate::error::{Result, StoreError};

// ---------------------------------------------------------------------------
// Store state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreState {
    /// Ingested data, no preparation record.
    Raw,
    /// A preparation record is attached.
    Prepared,
}

/// A validated set of subjects, each a `(time, channel)` array backed by a
/// memory-mapped file in the store directory.
///
/// Dropping the store closes it.
pub struct Store {
    memmap: MemmapStore,
    options: StoreOptions,
    diagnostics: Arc<dyn Diagnostics>,
    n_channels: usize,
    preparation: Option<PreparationRecord>,
    limits: (Option<usize>, Option<usize>),
    closed: bool,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("store_dir", &self.memmap.dir())
            .field("n_subjects", &self.n_subjects())
            .field("n_channels", &self.n_channels)
            .field("state", &self.state())
            .field("closed", &self.closed)
            .finish()
    }
}

impl Store {
    /// Open a store, reporting through the `log` facade.
    pub fn open(input: impl Into<Input>, options: StoreOptions) -> Result<Self> {
        Self::open_with(input, options, Arc::new(LogDiagnostics))
    }

    /// Resolve `input` into subjects, ingest them into backing files under
    /// `options.store_dir` and check their channel counts.
    ///
    /// When `input` is a single directory that holds a preparation record,
    /// the store opens in the [`StoreState::Prepared`] state.
    ///
    /// A failure leaves backing files already written for earlier subjects
    /// on disk.
    pub fn open_with(
        input: impl Into<Input>,
        options: StoreOptions,
        diagnostics: Arc<dyn Diagnostics>,
    ) -> Result<Self> {
        let input = input.into();
        let prepared_dir = match &input {
            Input::Path(path) if path.is_dir() => Some(path.clone()),
            _ => None,
        };

        let sources = resolve(input)?;
        diagnostics.info(&format!("opening store with {} inputs", sources.len()));

        let mut memmap = MemmapStore::create(&options.store_dir, options.map_mode)?;
        memmap.ingest(
            sources,
            &options.data_field,
            options.time_axis_first,
            diagnostics.as_ref(),
            options.progress,
        )?;
        validate(memmap.subjects())?;
        let n_channels = memmap.subjects().first().map_or(0, SubjectArray::n_channels);

        let preparation = match prepared_dir {
            Some(dir) => preparation::load(&dir)?,
            None => None,
        };
        if let Some(record) = &preparation {
            diagnostics.info(&format!(
                "restored preparation: n_embeddings={}, n_pca_components={:?}",
                record.n_embeddings,
                record.n_pca_components()
            ));
        }

        Ok(Self {
            memmap,
            options,
            diagnostics,
            n_channels,
            preparation,
            limits: (None, None),
            closed: false,
        })
    }

    // -- attributes --

    pub fn n_subjects(&self) -> usize {
        self.memmap.subjects().len()
    }

    pub fn n_channels(&self) -> usize {
        self.n_channels
    }

    pub fn sampling_frequency(&self) -> Option<f64> {
        self.options.sampling_frequency
    }

    pub fn store_dir(&self) -> &Path {
        self.memmap.dir()
    }

    pub fn state(&self) -> StoreState {
        match self.preparation {
            Some(_) => StoreState::Prepared,
            None => StoreState::Raw,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn preparation(&self) -> Option<&PreparationRecord> {
        self.preparation.as_ref()
    }

    pub fn n_embeddings(&self) -> Option<usize> {
        self.preparation.as_ref().map(|p| p.n_embeddings)
    }

    pub fn n_pca_components(&self) -> Option<usize> {
        self.preparation
            .as_ref()
            .and_then(PreparationRecord::n_pca_components)
    }

    /// Backing files created by this store.
    pub fn backing_files(&self) -> &[PathBuf] {
        self.memmap.created_files()
    }

    // -- views --

    /// Restrict every subject view to samples `start..end`. Bounds are
    /// clamped to each subject's length; `None` means unbounded.
    pub fn set_time_limits(&mut self, start: Option<usize>, end: Option<usize>) {
        self.limits = (start, end);
    }

    pub fn time_limits(&self) -> (Option<usize>, Option<usize>) {
        self.limits
    }

    fn bounds(&self, len: usize) -> (usize, usize) {
        let end = self.limits.1.map_or(len, |e| e.min(len));
        let start = self.limits.0.map_or(0, |s| s.min(end));
        (start, end)
    }

    /// Time-limited `(time, channel)` view of subject `index`.
    pub fn subject(&self, index: usize) -> Option<ArrayView2<'_, f32>> {
        let subject = self.memmap.subjects().get(index)?;
        let (start, end) = self.bounds(subject.n_samples());
        Some(subject.view().slice_move(s![start..end, ..]))
    }

    /// Mutable time-limited view; `None` for read-only mappings.
    pub fn subject_mut(&mut self, index: usize) -> Option<ArrayViewMut2<'_, f32>> {
        let len = self.memmap.subjects().get(index)?.n_samples();
        let (start, end) = self.bounds(len);
        let view = self.memmap.subjects_mut()[index].view_mut()?;
        Some(view.slice_move(s![start..end, ..]))
    }

    pub fn subjects(&self) -> impl Iterator<Item = ArrayView2<'_, f32>> + '_ {
        (0..self.n_subjects()).filter_map(|i| self.subject(i))
    }

    /// Fixed-length windows over the time-limited subjects, in batches.
    pub fn windows(&self, options: &WindowOptions) -> Result<Batches<'_>> {
        self.ensure_open()?;
        Batches::new(self.subjects().collect(), options)
    }

    // -- preparation --

    /// Attach the record of an external preparation step and save it to the
    /// store directory. A prepared store refuses a new record unless `force`
    /// is set.
    pub fn prepare(&mut self, record: PreparationRecord, force: bool) -> Result<()> {
        self.ensure_open()?;
        if self.preparation.is_some() && !force {
            return Err(StoreError::AlreadyPrepared);
        }
        let path = preparation::save_record(self.memmap.dir(), &record)?;
        self.diagnostics
            .info(&format!("saved preparation to {}", path.display()));
        self.preparation = Some(record);
        Ok(())
    }

    // -- persistence --

    /// Write `subject<i>.npy` per subject into `dir`, plus the preparation
    /// record when prepared. The full recordings are written, ignoring time
    /// limits.
    pub fn save(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        self.ensure_open()?;
        fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))?;

        let subjects = self.memmap.subjects();
        let bar = diag::progress_bar(subjects.len(), "Saving data", self.options.progress);
        let mut written = Vec::with_capacity(subjects.len() + 1);
        for (i, subject) in subjects.iter().enumerate() {
            let path = dir.join(format!("{}.npy", subject_name(i, subjects.len())));
            write_npy(&path, subject.view())?;
            written.push(path);
            bar.inc(1);
        }
        bar.finish_and_clear();

        if let Some(record) = &self.preparation {
            written.push(preparation::save_record(dir, record)?);
        }
        self.diagnostics
            .info(&format!("saved {} subjects to {}", subjects.len(), dir.display()));
        Ok(written)
    }

    /// Write `subject<i>.mat` per subject into `dir`, each holding the
    /// `(time, channel)` data under `field`.
    pub fn save_mat(&self, dir: &Path, field: &str) -> Result<Vec<PathBuf>> {
        self.ensure_open()?;
        fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))?;

        let subjects = self.memmap.subjects();
        let bar = diag::progress_bar(subjects.len(), "Saving data", self.options.progress);
        let mut written = Vec::with_capacity(subjects.len());
        for (i, subject) in subjects.iter().enumerate() {
            let path = dir.join(format!("{}.mat", subject_name(i, subjects.len())));
            write_mat(&path, &[(field, &MatValue::from_array(subject.view()))])?;
            written.push(path);
            bar.inc(1);
        }
        bar.finish_and_clear();
        Ok(written)
    }

    // -- teardown --

    /// Delete the backing files this store created, and the store directory
    /// if nothing else is left in it. With `keep_backing_on_close` the files
    /// stay and only the mappings are released. Closing twice is a no-op.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if self.options.keep_backing_on_close {
            self.memmap.release();
            self.diagnostics.debug("closed store, backing files kept");
            Ok(())
        } else {
            self.memmap.teardown(self.diagnostics.as_ref())
        }
    }

    /// Delete the backing files regardless of `keep_backing_on_close`.
    pub fn delete_backing_files(&mut self) -> Result<()> {
        self.closed = true;
        self.memmap.teardown(self.diagnostics.as_ref())
    }

    /// Remove the whole store directory, preparation record included.
    pub fn delete_dir(&mut self) -> Result<()> {
        self.closed = true;
        self.diagnostics
            .info(&format!("removing {}", self.memmap.dir().display()));
        self.memmap.delete_dir()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            Err(StoreError::Closed)
        } else {
            Ok(())
        }
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            self.diagnostics.warn(&format!("failed to close store: {e}"));
        }
    }
}

/// `subject<i>`, zero-padded so that name order is index order.
fn subject_name(index: usize, total: usize) -> String {
    let width = total.to_string().len();
    format!("subject{index:0width$}")
}

// ---------------------------------------------------------------------------
// Input resolution
// ---------------------------------------------------------------------------

/// Flatten an input descriptor into one source per subject.
///
/// Directories contribute their `.npy`/`.mat` files in lexicographic order.
/// Lists may not contain lists.
pub fn resolve(input: Input) -> Result<Vec<Source>> {
    let mut sources = Vec::new();
    match input {
        Input::List(items) => {
            for item in items {
                resolve_one(item, &mut sources)?;
            }
        }
        other => resolve_one(other, &mut sources)?,
    }
    if sources.is_empty() {
        return Err(StoreError::EmptyInput);
    }
    Ok(sources)
}

fn resolve_one(input: Input, sources: &mut Vec<Source>) -> Result<()> {
    match input {
        Input::Array(array) => split_array(array, sources),
        Input::Path(path) if path.is_dir() => {
            let files = list_dir(&path, Some(&RECOGNIZED_EXTENSIONS[..]))?;
            sources.extend(files.into_iter().map(Source::File));
            Ok(())
        }
        Input::Path(path) => {
            sources.push(Source::File(path));
            Ok(())
        }
        Input::List(_) => Err(StoreError::InvalidInput(
            "lists of inputs cannot be nested".into(),
        )),
    }
}

/// 2-D arrays are one subject; 3-D arrays one subject per leading index.
fn split_array(array: ArrayD<f32>, sources: &mut Vec<Source>) -> Result<()> {
    let invalid = |ndim: usize| {
        StoreError::InvalidInput(format!("arrays must be 2-D or 3-D, got {ndim}-D"))
    };
    match array.ndim() {
        2 => {
            let array = array.into_dimensionality::<Ix2>().map_err(|_| invalid(2))?;
            sources.push(Source::Array(array));
        }
        3 => {
            let array = array.into_dimensionality::<Ix3>().map_err(|_| invalid(3))?;
            sources.extend(array.outer_iter().map(|a| Source::Array(a.to_owned())));
        }
        n => return Err(invalid(n)),
    }
    Ok(())
}
