use std::path::{Path, PathBuf};

use ndarray::{Array2, Array3, ArrayD, ArrayView2, ArrayViewMut2};
use serde::{Deserialize, Serialize};

use super::memmap::MappedArray;

// ---------------------------------------------------------------------------
// MapMode – how a backing file is mapped
// ---------------------------------------------------------------------------

/// Access mode for memory-mapped arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MapMode {
    /// Shared read-only mapping.
    ReadOnly,
    /// Writes go straight to the file.
    #[default]
    ReadWrite,
    /// Writes stay private to this mapping.
    CopyOnWrite,
}

// ---------------------------------------------------------------------------
// Input – what the caller hands to `Store::open`
// ---------------------------------------------------------------------------

/// An input descriptor, before resolution into individual subjects.
///
/// * `Array` – 2-D is one subject, 3-D is one subject per leading index.
/// * `Path`  – a `.npy`/`.mat` file, or a directory whose recognised files
///   become subjects in lexicographic order.
/// * `List`  – any mix of the above (one level deep).
#[derive(Debug, Clone)]
pub enum Input {
    Array(ArrayD<f32>),
    Path(PathBuf),
    List(Vec<Input>),
}

impl From<ArrayD<f32>> for Input {
    fn from(array: ArrayD<f32>) -> Self {
        Input::Array(array)
    }
}

impl From<ArrayD<f64>> for Input {
    fn from(array: ArrayD<f64>) -> Self {
        Input::Array(array.mapv(|v| v as f32))
    }
}

impl From<Array2<f32>> for Input {
    fn from(array: Array2<f32>) -> Self {
        Input::Array(array.into_dyn())
    }
}

impl From<Array2<f64>> for Input {
    fn from(array: Array2<f64>) -> Self {
        Input::Array(array.mapv(|v| v as f32).into_dyn())
    }
}

impl From<Array3<f32>> for Input {
    fn from(array: Array3<f32>) -> Self {
        Input::Array(array.into_dyn())
    }
}

impl From<Array3<f64>> for Input {
    fn from(array: Array3<f64>) -> Self {
        Input::Array(array.mapv(|v| v as f32).into_dyn())
    }
}

impl From<PathBuf> for Input {
    fn from(path: PathBuf) -> Self {
        Input::Path(path)
    }
}

impl From<&Path> for Input {
    fn from(path: &Path) -> Self {
        Input::Path(path.to_path_buf())
    }
}

impl From<&str> for Input {
    fn from(path: &str) -> Self {
        Input::Path(PathBuf::from(path))
    }
}

impl From<String> for Input {
    fn from(path: String) -> Self {
        Input::Path(PathBuf::from(path))
    }
}

impl<T: Into<Input>> From<Vec<T>> for Input {
    fn from(items: Vec<T>) -> Self {
        Input::List(items.into_iter().map(Into::into).collect())
    }
}

/// One resolved subject input: either data already in memory or a file.
#[derive(Debug, Clone)]
pub enum Source {
    Array(Array2<f32>),
    File(PathBuf),
}

// ---------------------------------------------------------------------------
// SubjectArray – one subject's (time, channel) data
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum Storage {
    Memory(Array2<f32>),
    Mapped(MappedArray),
}

/// A single subject's data, either held in memory or mapped from a backing
/// `.npy` file. Transposition is applied lazily to the view.
#[derive(Debug)]
pub struct SubjectArray {
    storage: Storage,
    transposed: bool,
}

impl SubjectArray {
    pub fn in_memory(array: Array2<f32>) -> Self {
        Self {
            storage: Storage::Memory(array),
            transposed: false,
        }
    }

    pub fn mapped(array: MappedArray) -> Self {
        Self {
            storage: Storage::Mapped(array),
            transposed: false,
        }
    }

    /// Swap the axes of every subsequent view.
    pub fn transposed(mut self) -> Self {
        self.transposed = !self.transposed;
        self
    }

    /// Read-only `(time, channel)` view.
    pub fn view(&self) -> ArrayView2<'_, f32> {
        let view = match &self.storage {
            Storage::Memory(a) => a.view(),
            Storage::Mapped(m) => m.view(),
        };
        if self.transposed {
            view.reversed_axes()
        } else {
            view
        }
    }

    /// Mutable view; `None` for read-only mappings.
    pub fn view_mut(&mut self) -> Option<ArrayViewMut2<'_, f32>> {
        let view = match &mut self.storage {
            Storage::Memory(a) => Some(a.view_mut()),
            Storage::Mapped(m) => m.view_mut(),
        }?;
        Some(if self.transposed {
            view.reversed_axes()
        } else {
            view
        })
    }

    /// `(samples, channels)`.
    pub fn dim(&self) -> (usize, usize) {
        self.view().dim()
    }

    pub fn n_samples(&self) -> usize {
        self.dim().0
    }

    pub fn n_channels(&self) -> usize {
        self.dim().1
    }

    pub fn is_mapped(&self) -> bool {
        matches!(self.storage, Storage::Mapped(_))
    }

    /// File backing this array, if it is memory-mapped.
    pub fn backing_path(&self) -> Option<&Path> {
        match &self.storage {
            Storage::Memory(_) => None,
            Storage::Mapped(m) => Some(m.path()),
        }
    }

    /// Copy into a standard-layout owned array.
    pub fn to_owned_array(&self) -> Array2<f32> {
        self.view().as_standard_layout().into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn transposed_view_swaps_axes() {
        let subject = SubjectArray::in_memory(array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]);
        assert_eq!(subject.dim(), (2, 3));

        let subject = subject.transposed();
        assert_eq!(subject.dim(), (3, 2));
        assert_eq!(subject.view()[[2, 1]], 6.0);
        assert!(!subject.is_mapped());
        assert!(subject.backing_path().is_none());
    }

    #[test]
    fn nested_vectors_become_lists() {
        let input: Input = vec!["a.npy", "b.mat"].into();
        match input {
            Input::List(items) => assert_eq!(items.len(), 2),
            other => panic!("expected a list, got {other:?}"),
        }
    }

    #[test]
    fn double_arrays_are_cast() {
        let input: Input = Array2::<f64>::ones((4, 2)).into();
        match input {
            Input::Array(a) => assert_eq!(a.shape(), &[4, 2]),
            other => panic!("expected an array, got {other:?}"),
        }
    }
}
