//! Data layer: input formats, memory-mapped backing files, validation and
//! the preparation ledger.
//!
//! Architecture:
//! ```text
//!  ndarray / .npy / .mat (Level 5, v7.3, SPM)
//!        │
//!        ▼
//!   ┌──────────┐
//!   │  loader   │  decode → Array2<f32>, persist to a backing .npy
//!   └──────────┘
//!        │
//!        ▼
//!   ┌──────────┐
//!   │  memmap   │  raw_data_<i>_<id>.npy → SubjectArray (mapped view)
//!   └──────────┘
//!        │
//!        ▼
//!   ┌──────────┐
//!   │ validate  │  same channel count across subjects
//!   └──────────┘
//!        │
//!        ▼
//!   ┌──────────┐
//!   │  windows  │  fixed-length windows → (batch, time, channel) batches
//!   └──────────┘
//! ```
//!
//! `preparation` persists the pre-processing record next to the data and
//! `listing` gives the deterministic directory order used for subject
//! indices.

pub mod listing;
pub mod loader;
pub mod matlab;
pub mod memmap;
pub mod model;
pub mod npy;
pub mod preparation;
pub mod validate;
pub mod windows;
