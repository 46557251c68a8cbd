use super::model::SubjectArray;
use crate::error::{Result, StoreError};

/// Check that every subject has the same number of channels as the first.
pub fn validate(subjects: &[SubjectArray]) -> Result<()> {
    let counts: Vec<usize> = subjects.iter().map(SubjectArray::n_channels).collect();
    match counts.first() {
        Some(first) if counts.iter().any(|c| c != first) => {
            Err(StoreError::ChannelMismatch { counts })
        }
        _ => Ok(()),
    }
}
