use std::path::Path;
use std::sync::Arc;

use ndarray::{Array2, Array3};
use subject_store::data::matlab::level5::write_mat;
use subject_store::data::matlab::MatValue;
use subject_store::data::npy::{read_npy, write_npy};
use subject_store::{
    Input, PreparationRecord, RecordingDiagnostics, Store, StoreError, StoreOptions, StoreState,
    WindowOptions,
};

fn quiet(input: impl Into<Input>, options: StoreOptions) -> Result<Store, StoreError> {
    Store::open_with(input, options, Arc::new(RecordingDiagnostics::new()))
}

/// `(channels, samples)` recording in MATLAB convention.
fn write_recording(path: &Path, channels: usize, samples: usize) {
    let data = Array2::from_shape_fn((channels, samples), |(c, t)| (c * 1000 + t) as f32);
    write_mat(path, &[("X", &MatValue::from_array(data.view()))]).unwrap();
}

fn channels_first(store_dir: &Path) -> StoreOptions {
    StoreOptions {
        time_axis_first: false,
        ..StoreOptions::in_dir(store_dir)
    }
}

#[test]
fn matlab_directory_with_common_channels() {
    let data = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    for name in ["s1.mat", "s2.mat", "s3.mat"] {
        write_recording(&data.path().join(name), 64, 300);
    }

    let store = quiet(data.path(), channels_first(scratch.path())).unwrap();
    assert_eq!(store.n_subjects(), 3);
    assert_eq!(store.n_channels(), 64);
    assert_eq!(store.state(), StoreState::Raw);
    assert_eq!(store.subject(0).unwrap().dim(), (300, 64));
    assert_eq!(store.backing_files().len(), 3);
}

#[test]
fn channel_mismatch_names_every_count() {
    let data = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    write_recording(&data.path().join("s1.mat"), 64, 100);
    write_recording(&data.path().join("s2.mat"), 64, 100);
    write_recording(&data.path().join("s3.mat"), 32, 100);

    let err = quiet(data.path(), channels_first(scratch.path())).unwrap_err();
    assert!(err.to_string().contains("[64, 64, 32]"), "{err}");
    match err {
        StoreError::ChannelMismatch { counts } => assert_eq!(counts, vec![64, 64, 32]),
        other => panic!("expected a channel mismatch, got {other}"),
    }
}

#[test]
fn failed_open_leaves_earlier_backing_files() {
    let data = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    write_recording(&data.path().join("a.mat"), 8, 50);
    write_recording(&data.path().join("b.mat"), 4, 50);

    assert!(quiet(data.path(), channels_first(scratch.path())).is_err());
    let left = std::fs::read_dir(scratch.path()).unwrap().count();
    assert_eq!(left, 2);
}

#[test]
fn three_dimensional_arrays_split_by_subject() {
    let scratch = tempfile::tempdir().unwrap();
    let data = Array3::from_shape_fn((5, 1000, 10), |(s, t, _)| (s * 10_000 + t) as f32);

    let store = quiet(data, StoreOptions::in_dir(scratch.path())).unwrap();
    assert_eq!(store.n_subjects(), 5);
    for (i, subject) in store.subjects().enumerate() {
        assert_eq!(subject.dim(), (1000, 10));
        assert_eq!(subject[[7, 0]], (i * 10_000 + 7) as f32);
    }
}

#[test]
fn channel_first_data_is_transposed() {
    let scratch = tempfile::tempdir().unwrap();
    let data = Array2::from_shape_fn((4, 250), |(c, t)| (c * 1000 + t) as f32);

    let store = quiet(data, channels_first(scratch.path())).unwrap();
    let subject = store.subject(0).unwrap();
    assert_eq!(subject.dim(), (250, 4));
    assert_eq!(subject[[10, 3]], 3010.0);
}

#[test]
fn save_and_reopen_round_trip_with_preparation() {
    let scratch = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let data: Vec<Array2<f32>> = (0..3)
        .map(|i| Array2::from_elem((120 + i * 10, 6), i as f32))
        .collect();

    let mut store = quiet(data, StoreOptions::in_dir(scratch.path().join("a"))).unwrap();
    let components = Array2::from_shape_fn((6 * 13, 80), |(i, j)| (i + j) as f32);
    store
        .prepare(PreparationRecord::new(13, Some(components)), false)
        .unwrap();
    store.save(out.path()).unwrap();
    store.close().unwrap();

    let reopened = quiet(out.path(), StoreOptions::in_dir(scratch.path().join("b"))).unwrap();
    assert_eq!(reopened.n_subjects(), 3);
    assert_eq!(reopened.n_channels(), 6);
    assert_eq!(reopened.state(), StoreState::Prepared);
    assert_eq!(reopened.n_embeddings(), Some(13));
    assert_eq!(reopened.n_pca_components(), Some(80));
    assert_eq!(reopened.subject(2).unwrap().dim(), (140, 6));
    // Saved .npy files are mapped where they are.
    assert!(reopened.backing_files().is_empty());
}

#[test]
fn saved_subjects_keep_index_order() {
    let scratch = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let data: Vec<Array2<f32>> = (0..11)
        .map(|i| Array2::from_elem((4, 2), i as f32))
        .collect();

    let store = quiet(data, StoreOptions::in_dir(scratch.path())).unwrap();
    store.save(out.path()).unwrap();

    assert!(out.path().join("subject00.npy").exists());
    assert_eq!(read_npy(&out.path().join("subject10.npy")).unwrap()[[0, 0]], 10.0);

    let reopened = quiet(out.path(), StoreOptions::in_dir(scratch.path())).unwrap();
    assert_eq!(reopened.state(), StoreState::Raw);
    for i in 0..11 {
        assert_eq!(reopened.subject(i).unwrap()[[0, 0]], i as f32);
    }
}

#[test]
fn save_mat_output_reopens() {
    let scratch = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let data = Array2::from_shape_fn((30, 5), |(t, c)| (t * 5 + c) as f32);

    let store = quiet(data.clone(), StoreOptions::in_dir(scratch.path())).unwrap();
    store.save_mat(out.path(), "data").unwrap();

    let options = StoreOptions {
        data_field: "data".into(),
        ..StoreOptions::in_dir(scratch.path())
    };
    let reopened = quiet(out.path().join("subject0.mat"), options).unwrap();
    assert_eq!(reopened.subject(0).unwrap(), data);
}

#[test]
fn close_is_idempotent_and_cleans_up() {
    let scratch = tempfile::tempdir().unwrap();
    let store_dir = scratch.path().join("store");
    let mut store = quiet(
        Array3::<f32>::zeros((2, 10, 3)),
        StoreOptions::in_dir(&store_dir),
    )
    .unwrap();
    let files = store.backing_files().to_vec();
    assert_eq!(files.len(), 2);

    store.close().unwrap();
    store.close().unwrap();
    assert!(files.iter().all(|f| !f.exists()));
    assert!(!store_dir.exists());
}

#[test]
fn keep_backing_on_close_leaves_files() {
    let scratch = tempfile::tempdir().unwrap();
    let options = StoreOptions {
        keep_backing_on_close: true,
        ..StoreOptions::in_dir(scratch.path())
    };
    let mut store = quiet(Array2::<f32>::zeros((10, 3)), options).unwrap();
    let files = store.backing_files().to_vec();
    store.close().unwrap();
    assert!(files.iter().all(|f| f.exists()));

    store.delete_backing_files().unwrap();
    assert!(files.iter().all(|f| !f.exists()));
}

#[test]
fn delete_dir_removes_everything() {
    let scratch = tempfile::tempdir().unwrap();
    let store_dir = scratch.path().join("store");
    let mut store = quiet(Array2::<f32>::zeros((10, 3)), StoreOptions::in_dir(&store_dir)).unwrap();
    store.prepare(PreparationRecord::new(1, None), false).unwrap();

    store.delete_dir().unwrap();
    assert!(!store_dir.exists());
}

#[test]
fn dropping_a_store_closes_it() {
    let scratch = tempfile::tempdir().unwrap();
    let store_dir = scratch.path().join("store");
    {
        let _store = quiet(Array2::<f32>::zeros((10, 3)), StoreOptions::in_dir(&store_dir)).unwrap();
        assert!(store_dir.exists());
    }
    assert!(!store_dir.exists());
}

#[test]
fn directory_inputs_ignore_other_files() {
    let data = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    write_npy(&data.path().join("b.npy"), Array2::from_elem((5, 2), 2.0).view()).unwrap();
    write_npy(&data.path().join("a.npy"), Array2::from_elem((5, 2), 1.0).view()).unwrap();
    std::fs::write(data.path().join("readme.txt"), "notes").unwrap();
    std::fs::write(data.path().join("c.NPY"), "not picked up").unwrap();

    let store = quiet(data.path(), StoreOptions::in_dir(scratch.path())).unwrap();
    assert_eq!(store.n_subjects(), 2);
    assert_eq!(store.subject(0).unwrap()[[0, 0]], 1.0);
    assert_eq!(store.subject(1).unwrap()[[0, 0]], 2.0);
}

#[test]
fn mixed_lists_resolve_in_order() {
    let data = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let file = data.path().join("s.npy");
    write_npy(&file, Array2::from_elem((8, 3), 9.0).view()).unwrap();

    let input = Input::List(vec![
        Input::from(Array2::<f32>::zeros((4, 3))),
        Input::from(file.as_path()),
    ]);
    let store = quiet(input, StoreOptions::in_dir(scratch.path())).unwrap();
    assert_eq!(store.n_subjects(), 2);
    assert_eq!(store.subject(1).unwrap().dim(), (8, 3));
    assert_eq!(store.state(), StoreState::Raw);
}

#[test]
fn unsupported_inputs_fail_open() {
    let data = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let csv = data.path().join("s.csv");
    std::fs::write(&csv, "1,2").unwrap();

    assert!(matches!(
        quiet(csv.as_path(), StoreOptions::in_dir(scratch.path())),
        Err(StoreError::UnsupportedFormat { .. })
    ));
    assert!(matches!(
        quiet(data.path().join("gone.mat"), StoreOptions::in_dir(scratch.path())),
        Err(StoreError::FileNotFound(_))
    ));
    assert!(matches!(
        quiet(Input::List(vec![]), StoreOptions::in_dir(scratch.path())),
        Err(StoreError::EmptyInput)
    ));
}

#[test]
fn windows_stay_within_subjects_and_limits() {
    let scratch = tempfile::tempdir().unwrap();
    let data: Vec<Array2<f32>> = (0..3)
        .map(|s| Array2::from_shape_fn((105, 2), |(t, _)| (s * 1000 + t) as f32))
        .collect();
    let mut store = quiet(data, StoreOptions::in_dir(scratch.path())).unwrap();

    let batches = store.windows(&WindowOptions::new(10, 4).shuffled(Some(1))).unwrap();
    assert_eq!(batches.n_windows(), 30);
    let mut seen = 0;
    for batch in batches {
        for w in 0..batch.dim().0 {
            let first = batch[[w, 0, 0]];
            assert_eq!(batch[[w, 9, 0]] - first, 9.0);
            assert_eq!((first as usize % 1000) % 10, 0);
            seen += 1;
        }
    }
    assert_eq!(seen, 30);

    store.set_time_limits(Some(5), Some(55));
    let batches = store.windows(&WindowOptions::new(10, 4)).unwrap();
    assert_eq!(batches.n_windows(), 15);
    let first = batches.into_iter().next().unwrap();
    assert_eq!(first[[0, 0, 0]], 5.0);
}

#[test]
fn spm_objects_are_read_through_their_data_file() {
    use std::collections::BTreeMap;
    use subject_store::data::matlab::{MatNumeric, NumericData};

    let data = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();

    // 3 channels x 4 samples, float32-le, column-major.
    let samples: Vec<u8> = (0..12)
        .map(|i| (i % 3 * 100 + i / 3) as f32)
        .flat_map(|v| v.to_le_bytes())
        .collect();
    std::fs::write(data.path().join("meeg.dat"), samples).unwrap();

    let mut fields = BTreeMap::new();
    fields.insert("fname".to_string(), MatValue::Char("/lab/old/meeg.dat".into()));
    fields.insert(
        "dim".to_string(),
        MatValue::Numeric(MatNumeric {
            dims: vec![1, 2],
            data: NumericData::Double(vec![3.0, 4.0]),
        }),
    );
    fields.insert("dtype".to_string(), MatValue::Char("float32-le".into()));
    let mut object = BTreeMap::new();
    object.insert("data".to_string(), MatValue::Struct(vec![fields]));
    write_mat(
        &data.path().join("meeg.mat"),
        &[("D", &MatValue::Struct(vec![object]))],
    )
    .unwrap();

    let diagnostics = Arc::new(RecordingDiagnostics::new());
    let store = Store::open_with(
        data.path().join("meeg.mat"),
        channels_first(scratch.path()),
        diagnostics.clone(),
    )
    .unwrap();
    assert_eq!(store.n_channels(), 3);
    let subject = store.subject(0).unwrap();
    assert_eq!(subject.dim(), (4, 3));
    assert_eq!(subject[[3, 2]], 203.0);
    assert!(diagnostics
        .warnings()
        .iter()
        .any(|w| w.contains("SPM MEEG object")));
}

#[test]
fn corrupt_cell_dimensions_fail_open() {
    let data = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();

    let mut body = Vec::new();
    // Array flags: class 1 (cell).
    push_le(&mut body, 6, &[1, 0, 0, 0, 0, 0, 0, 0]);
    let dims: Vec<u8> = [-1i32, 1].iter().flat_map(|d| d.to_le_bytes()).collect();
    push_le(&mut body, 5, &dims);
    push_le(&mut body, 1, b"X");

    let mut file = vec![b' '; 124];
    file.extend_from_slice(&0x0100u16.to_le_bytes());
    file.extend_from_slice(b"IM");
    push_le(&mut file, 14, &body);
    let path = data.path().join("corrupt.mat");
    std::fs::write(&path, file).unwrap();

    let err = quiet(path.as_path(), channels_first(scratch.path())).unwrap_err();
    assert!(matches!(err, StoreError::Malformed { .. }), "{err}");
}

/// Little-endian MAT element with its 8-byte padding.
fn push_le(out: &mut Vec<u8>, ty: u32, payload: &[u8]) {
    out.extend_from_slice(&ty.to_le_bytes());
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(payload);
    out.resize(out.len() + (8 - payload.len() % 8) % 8, 0);
}
