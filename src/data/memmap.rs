use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::ops::Deref;
use std::path::{Path, PathBuf};

use memmap2::{Mmap, MmapMut, MmapOptions};
use ndarray::{ArrayView2, ArrayViewMut2};

use super::loader;
use super::model::{MapMode, Source, SubjectArray};
use super::npy;
use crate::diag::{self, Diagnostics};
use crate::error::{Result, StoreError};

// ---------------------------------------------------------------------------
// MappedArray – a 2-D `f32` view over a `.npy` file
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum Mapping {
    ReadOnly(Mmap),
    Writable(MmapMut),
}

impl Deref for Mapping {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            Mapping::ReadOnly(m) => m,
            Mapping::Writable(m) => m,
        }
    }
}

/// A C-ordered little-endian `f32` `.npy` file, mapped into memory.
///
/// Pages are faulted in by the OS on access; nothing is prefetched.
#[derive(Debug)]
pub struct MappedArray {
    path: PathBuf,
    mapping: Mapping,
    mode: MapMode,
    offset: usize,
    shape: (usize, usize),
}

impl MappedArray {
    pub fn open(path: &Path, mode: MapMode) -> Result<Self> {
        if cfg!(target_endian = "big") {
            return Err(StoreError::malformed(
                path,
                "memory-mapped little-endian data needs a little-endian host",
            ));
        }

        let header = npy::read_header(path)?;
        if !header.is_mappable() {
            return Err(StoreError::malformed(
                path,
                format!(
                    "cannot map dtype '{}' with shape {:?} (fortran order: {})",
                    header.descr, header.shape, header.fortran_order
                ),
            ));
        }
        let shape = (header.shape[0] as usize, header.shape[1] as usize);
        let data_len = header
            .len()
            .checked_mul(std::mem::size_of::<f32>())
            .ok_or_else(|| {
                StoreError::malformed(path, format!("shape {:?} is too large", header.shape))
            })?;

        let file = match mode {
            MapMode::ReadWrite => OpenOptions::new().read(true).write(true).open(path),
            MapMode::ReadOnly | MapMode::CopyOnWrite => File::open(path),
        }
        .map_err(|e| StoreError::io(path, e))?;

        // SAFETY: the store owns its backing files for as long as they are
        // mapped; concurrent truncation by another process is unsupported.
        let mapping = unsafe {
            match mode {
                MapMode::ReadOnly => Mmap::map(&file).map(Mapping::ReadOnly),
                MapMode::ReadWrite => MmapMut::map_mut(&file).map(Mapping::Writable),
                MapMode::CopyOnWrite => MmapOptions::new().map_copy(&file).map(Mapping::Writable),
            }
        }
        .map_err(|e| StoreError::io(path, e))?;

        let offset = npy::data_offset(&mapping)
            .ok_or_else(|| StoreError::malformed(path, "unreadable .npy preamble"))?;
        let end = offset
            .checked_add(data_len)
            .filter(|&end| end <= mapping.len())
            .ok_or_else(|| {
                StoreError::malformed(path, "file is shorter than its header declares")
            })?;
        // `view` relies on this: the data is f32-aligned and holds exactly
        // rows * cols values.
        bytemuck::try_cast_slice::<u8, f32>(&mapping[offset..end])
            .map_err(|e| StoreError::malformed(path, format!("misaligned data: {e}")))?;

        Ok(Self {
            path: path.to_path_buf(),
            mapping,
            mode,
            offset,
            shape,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> MapMode {
        self.mode
    }

    pub fn view(&self) -> ArrayView2<'_, f32> {
        let ptr = self.mapping[self.offset..].as_ptr().cast::<f32>();
        // SAFETY: `open` checked that the region at `offset` is f32-aligned
        // and holds exactly `shape.0 * shape.1` values; the borrow of `self`
        // keeps the mapping alive.
        unsafe { ArrayView2::from_shape_ptr(self.shape, ptr) }
    }

    /// `None` for read-only mappings.
    pub fn view_mut(&mut self) -> Option<ArrayViewMut2<'_, f32>> {
        let shape = self.shape;
        match &mut self.mapping {
            Mapping::ReadOnly(_) => None,
            Mapping::Writable(m) => {
                let ptr = m[self.offset..].as_mut_ptr().cast::<f32>();
                // SAFETY: as in `view`, and the mutable borrow of `self`
                // makes this the only view of the mapping.
                Some(unsafe { ArrayViewMut2::from_shape_ptr(shape, ptr) })
            }
        }
    }

    /// Push writes made through a read-write mapping back to disk.
    pub fn flush(&self) -> Result<()> {
        match (&self.mapping, self.mode) {
            (Mapping::Writable(m), MapMode::ReadWrite) => {
                m.flush().map_err(|e| StoreError::io(&self.path, e))
            }
            _ => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// MemmapStore – the backing files of one store
// ---------------------------------------------------------------------------

/// Materialises each subject as a backing file in `dir` and owns those files
/// until teardown.
#[derive(Debug)]
pub struct MemmapStore {
    dir: PathBuf,
    identifier: String,
    mode: MapMode,
    subjects: Vec<SubjectArray>,
    created: Vec<PathBuf>,
}

impl MemmapStore {
    /// Create `dir` if needed and pick a fresh identifier for this store's
    /// backing file names.
    pub fn create(dir: &Path, mode: MapMode) -> Result<Self> {
        fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))?;
        let mut identifier = uuid::Uuid::new_v4().simple().to_string();
        identifier.truncate(12);
        Ok(Self {
            dir: dir.to_path_buf(),
            identifier,
            mode,
            subjects: Vec::new(),
            created: Vec::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// `raw_data_<index>_<identifier>.npy`, with the index zero-padded to the
    /// number of digits in `total`.
    pub fn backing_path(&self, index: usize, total: usize) -> PathBuf {
        let width = total.to_string().len();
        self.dir
            .join(format!("raw_data_{index:0width$}_{}.npy", self.identifier))
    }

    /// Load every source in order, appending to the subject list.
    ///
    /// Backing paths are assigned before any loading starts. A failure stops
    /// ingestion; files created for earlier sources stay on disk and remain
    /// owned by this store.
    pub fn ingest(
        &mut self,
        sources: Vec<Source>,
        data_field: &str,
        time_axis_first: bool,
        diagnostics: &dyn Diagnostics,
        progress: bool,
    ) -> Result<()> {
        let total = sources.len();
        let backing: Vec<PathBuf> = (0..total).map(|i| self.backing_path(i, total)).collect();

        let bar = diag::progress_bar(total, "Loading files", progress);
        for (source, path) in sources.into_iter().zip(backing) {
            let subject = ingest_subject(
                source,
                data_field,
                &path,
                time_axis_first,
                self.mode,
                diagnostics,
            )?;
            if subject.backing_path() == Some(path.as_path()) {
                self.created.push(path);
            }
            self.subjects.push(subject);
            bar.inc(1);
        }
        bar.finish_and_clear();

        diagnostics.debug(&format!(
            "ingested {total} inputs into {} ({} backing files)",
            self.dir.display(),
            self.created.len()
        ));
        Ok(())
    }

    pub fn subjects(&self) -> &[SubjectArray] {
        &self.subjects
    }

    pub fn subjects_mut(&mut self) -> &mut [SubjectArray] {
        &mut self.subjects
    }

    /// Backing files created by this store (caller-supplied `.npy` files
    /// mapped in place are not listed).
    pub fn created_files(&self) -> &[PathBuf] {
        &self.created
    }

    /// Drop the in-memory subjects without touching any file.
    pub fn release(&mut self) {
        self.subjects.clear();
    }

    /// Delete the owned backing files, then the directory if it is left
    /// empty. Missing files are ignored, so calling this twice is harmless.
    pub fn teardown(&mut self, diagnostics: &dyn Diagnostics) -> Result<()> {
        // Unmap before unlinking.
        self.subjects.clear();
        for path in self.created.drain(..) {
            match fs::remove_file(&path) {
                Ok(()) => diagnostics.debug(&format!("removed {}", path.display())),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(StoreError::io(path, e)),
            }
        }
        remove_dir_if_empty(&self.dir)
    }

    /// Remove the whole store directory, including files this store did not
    /// create.
    pub fn delete_dir(&mut self) -> Result<()> {
        self.subjects.clear();
        self.created.clear();
        match fs::remove_dir_all(&self.dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io(&self.dir, e)),
        }
    }
}

/// Load one source against its pre-assigned backing path and put it in
/// `(time, channel)` order. Touches no state shared with other subjects.
pub fn ingest_subject(
    source: Source,
    data_field: &str,
    backing: &Path,
    time_axis_first: bool,
    mode: MapMode,
    diagnostics: &dyn Diagnostics,
) -> Result<SubjectArray> {
    let subject = loader::load(source, data_field, Some(backing), mode, diagnostics)?;
    Ok(if time_axis_first {
        subject
    } else {
        subject.transposed()
    })
}

fn remove_dir_if_empty(dir: &Path) -> Result<()> {
    let mut entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(StoreError::io(dir, e)),
    };
    if entries.next().is_none() {
        match fs::remove_dir(dir) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(StoreError::io(dir, e)),
        }
    }
    Ok(())
}
