use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Result, StoreError};

/// List the entries of `dir` in lexicographic order.
///
/// With `extensions`, only names ending in one of the given suffixes
/// (e.g. `".npy"`, matched case-sensitively) are kept; without it every entry
/// is returned. Subject indices follow this order, so it must not depend on
/// the filesystem's iteration order.
pub fn list_dir(dir: &Path, extensions: Option<&[&str]>) -> Result<Vec<PathBuf>> {
    let mut names: Vec<OsString> = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| StoreError::io(dir, e))? {
        let entry = entry.map_err(|e| StoreError::io(dir, e))?;
        names.push(entry.file_name());
    }
    names.sort();

    Ok(names
        .into_iter()
        .filter(|name| match extensions {
            None => true,
            Some(exts) => name
                .to_str()
                .is_some_and(|n| exts.iter().any(|ext| n.ends_with(ext))),
        })
        .map(|name| dir.join(name))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(dir: &Path, names: &[&str]) {
        for name in names {
            fs::write(dir.join(name), b"").unwrap();
        }
    }

    fn file_names(paths: &[PathBuf]) -> Vec<String> {
        paths
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn entries_are_sorted() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), &["b.npy", "a10.npy", "a2.npy", "C.mat"]);

        let listed = list_dir(dir.path(), None).unwrap();
        assert_eq!(file_names(&listed), ["C.mat", "a10.npy", "a2.npy", "b.npy"]);
        assert!(listed.iter().all(|p| p.starts_with(dir.path())));
    }

    #[test]
    fn filter_keeps_matching_suffixes_only() {
        let dir = tempfile::tempdir().unwrap();
        touch(
            dir.path(),
            &["s1.mat", "s0.npy", "notes.txt", "upper.NPY", "preparation.json"],
        );
        fs::create_dir(dir.path().join("nested")).unwrap();

        let listed = list_dir(dir.path(), Some(&[".npy", ".mat"])).unwrap();
        assert_eq!(file_names(&listed), ["s0.npy", "s1.mat"]);

        let everything = list_dir(dir.path(), None).unwrap();
        assert_eq!(everything.len(), 6);
    }

    #[test]
    fn missing_directory_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = list_dir(&dir.path().join("nope"), None).unwrap_err();
        assert!(matches!(err, StoreError::Io { .. }));
    }
}
