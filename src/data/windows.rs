//! Fixed-length windows over the subjects, grouped into batches.
//!
//! Windows never span two subjects. Each subject contributes
//! `len / sequence_length` windows starting at multiples of
//! `sequence_length`; the trailing remainder is dropped.

use ndarray::{s, Array3, ArrayView2};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::error::{Result, StoreError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowOptions {
    pub sequence_length: usize,
    pub batch_size: usize,
    pub shuffle: bool,
    /// Seed for shuffling; a random seed is drawn when `None`.
    pub seed: Option<u64>,
    /// Restrict to these subject indices (in this order); all when `None`.
    pub subjects: Option<Vec<usize>>,
}

impl WindowOptions {
    pub fn new(sequence_length: usize, batch_size: usize) -> Self {
        Self {
            sequence_length,
            batch_size,
            shuffle: false,
            seed: None,
            subjects: None,
        }
    }

    pub fn shuffled(mut self, seed: Option<u64>) -> Self {
        self.shuffle = true;
        self.seed = seed;
        self
    }

    pub fn subjects(mut self, subjects: Vec<usize>) -> Self {
        self.subjects = Some(subjects);
        self
    }
}

/// Start of one window inside one subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub subject: usize,
    pub start: usize,
}

/// Every window of `sequence_length` samples in the chosen subjects, in
/// subject then time order.
pub fn plan_windows(
    lengths: &[usize],
    subjects: Option<&[usize]>,
    sequence_length: usize,
) -> Result<Vec<Window>> {
    if sequence_length == 0 {
        return Err(StoreError::InvalidWindow(
            "sequence length must be positive".into(),
        ));
    }
    let all: Vec<usize> = (0..lengths.len()).collect();
    let chosen = subjects.unwrap_or(&all);

    let mut windows = Vec::new();
    for &subject in chosen {
        let len = *lengths.get(subject).ok_or_else(|| {
            StoreError::InvalidWindow(format!(
                "subject {subject} out of range for {} subjects",
                lengths.len()
            ))
        })?;
        windows.extend(
            (0..len / sequence_length).map(|k| Window {
                subject,
                start: k * sequence_length,
            }),
        );
    }
    Ok(windows)
}

// ---------------------------------------------------------------------------
// Batches
// ---------------------------------------------------------------------------

/// Iterator of `(batch, sequence_length, channels)` arrays. The last batch
/// may hold fewer than `batch_size` windows.
#[derive(Debug)]
pub struct Batches<'a> {
    views: Vec<ArrayView2<'a, f32>>,
    windows: Vec<Window>,
    sequence_length: usize,
    batch_size: usize,
    cursor: usize,
}

impl<'a> Batches<'a> {
    /// `views` are the `(time, channel)` subject views, indexed by subject.
    pub fn new(views: Vec<ArrayView2<'a, f32>>, options: &WindowOptions) -> Result<Self> {
        if options.batch_size == 0 {
            return Err(StoreError::InvalidWindow("batch size must be positive".into()));
        }
        let lengths: Vec<usize> = views.iter().map(|v| v.nrows()).collect();
        let mut windows = plan_windows(
            &lengths,
            options.subjects.as_deref(),
            options.sequence_length,
        )?;

        if options.shuffle {
            let seed = options.seed.unwrap_or_else(rand::random);
            windows.shuffle(&mut StdRng::seed_from_u64(seed));
        }

        Ok(Self {
            views,
            windows,
            sequence_length: options.sequence_length,
            batch_size: options.batch_size,
            cursor: 0,
        })
    }

    pub fn n_windows(&self) -> usize {
        self.windows.len()
    }

    pub fn n_batches(&self) -> usize {
        self.windows.len().div_ceil(self.batch_size)
    }

    pub fn windows(&self) -> &[Window] {
        &self.windows
    }
}

impl Iterator for Batches<'_> {
    type Item = Array3<f32>;

    fn next(&mut self) -> Option<Array3<f32>> {
        if self.cursor >= self.windows.len() {
            return None;
        }
        let end = (self.cursor + self.batch_size).min(self.windows.len());
        let chunk = &self.windows[self.cursor..end];
        self.cursor = end;

        let n_channels = self.views.first().map_or(0, |v| v.ncols());
        let mut batch = Array3::zeros((chunk.len(), self.sequence_length, n_channels));
        for (i, window) in chunk.iter().enumerate() {
            let view = &self.views[window.subject];
            batch
                .slice_mut(s![i, .., ..])
                .assign(&view.slice(s![window.start..window.start + self.sequence_length, ..]));
        }
        Some(batch)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = (self.windows.len() - self.cursor).div_ceil(self.batch_size);
        (left, Some(left))
    }
}

impl ExactSizeIterator for Batches<'_> {}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn ramp(len: usize, channels: usize, offset: f32) -> Array2<f32> {
        Array2::from_shape_fn((len, channels), |(t, _)| offset + t as f32)
    }

    #[test]
    fn remainders_are_dropped_per_subject() {
        let windows = plan_windows(&[25, 10, 9], None, 10).unwrap();
        assert_eq!(
            windows,
            vec![
                Window { subject: 0, start: 0 },
                Window { subject: 0, start: 10 },
                Window { subject: 1, start: 0 },
            ]
        );
    }

    #[test]
    fn batches_cover_every_window_once() {
        let a = ramp(35, 2, 0.0);
        let b = ramp(20, 2, 1000.0);
        let options = WindowOptions::new(10, 2);
        let batches = Batches::new(vec![a.view(), b.view()], &options).unwrap();
        assert_eq!(batches.n_windows(), 5);
        assert_eq!(batches.n_batches(), 3);

        let out: Vec<Array3<f32>> = batches.collect();
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].dim(), (2, 10, 2));
        assert_eq!(out[2].dim(), (1, 10, 2));
        // Third window is subject 0 at t=20; fourth is subject 1 at t=0.
        assert_eq!(out[1][[0, 0, 0]], 20.0);
        assert_eq!(out[1][[1, 0, 0]], 1000.0);
    }

    #[test]
    fn windows_never_span_subjects() {
        let a = ramp(15, 1, 0.0);
        let b = ramp(15, 1, 500.0);
        let options = WindowOptions::new(5, 1).shuffled(Some(7));
        for batch in Batches::new(vec![a.view(), b.view()], &options).unwrap() {
            let first = batch[[0, 0, 0]];
            let last = batch[[0, 4, 0]];
            assert_eq!(last - first, 4.0);
        }
    }

    #[test]
    fn seeded_shuffles_repeat() {
        let a = ramp(100, 1, 0.0);
        let options = WindowOptions::new(5, 4).shuffled(Some(42));
        let first = Batches::new(vec![a.view()], &options).unwrap();
        let second = Batches::new(vec![a.view()], &options).unwrap();
        assert_eq!(first.windows(), second.windows());
        assert_eq!(first.n_windows(), 20);
    }

    #[test]
    fn subject_selection_and_bounds() {
        let a = ramp(10, 1, 0.0);
        let b = ramp(10, 1, 0.0);
        let options = WindowOptions::new(5, 8).subjects(vec![1]);
        let batches = Batches::new(vec![a.view(), b.view()], &options).unwrap();
        assert!(batches.windows().iter().all(|w| w.subject == 1));

        let options = WindowOptions::new(5, 8).subjects(vec![2]);
        assert!(matches!(
            Batches::new(vec![a.view(), b.view()], &options),
            Err(StoreError::InvalidWindow(_))
        ));
    }

    #[test]
    fn zero_sizes_are_rejected() {
        let a = ramp(10, 1, 0.0);
        assert!(Batches::new(vec![a.view()], &WindowOptions::new(0, 1)).is_err());
        assert!(Batches::new(vec![a.view()], &WindowOptions::new(1, 0)).is_err());
    }
}
