//! Multi-subject time-series store.
//!
//! Recordings arrive as in-memory arrays, `.npy` files or MATLAB files
//! (v5/v7, v7.3 behind the `mat73` feature, and SPM MEEG objects). Each one
//! becomes a memory-mapped `(time, channel)` array in a store directory; the
//! set is checked for a common channel count and can carry a preparation
//! record describing upstream pre-processing.
//!
//! ```no_run
//! use subject_store::{Store, StoreOptions, WindowOptions};
//!
//! let store = Store::open("recordings/", StoreOptions::in_dir("/scratch/store"))?;
//! println!("{} subjects, {} channels", store.n_subjects(), store.n_channels());
//! for batch in store.windows(&WindowOptions::new(200, 32).shuffled(Some(0)))? {
//!     assert_eq!(batch.dim().1, 200);
//! }
//! # Ok::<(), subject_store::StoreError>(())
//! ```

pub mod config;
pub mod data;
pub mod diag;
pub mod error;
pub mod store;

pub use config::StoreOptions;
pub use data::model::{Input, MapMode, SubjectArray};
pub use data::preparation::PreparationRecord;
pub use data::windows::WindowOptions;
pub use diag::{Diagnostics, LogDiagnostics, RecordingDiagnostics};
pub use error::{Result, StoreError};
pub use store::{Store, StoreState};
