use std::fs::OpenOptions;
use std::io::Write;

use approx::assert_abs_diff_eq;
use nalgebra::Point2;
use stereo_calib_core::{BoardGeometry, CornerObservation, CorpusSet};
use stereo_calib_select::{CorpusIoError, CorpusJournal};

fn board() -> BoardGeometry {
    BoardGeometry::new(3, 2, 0.025).expect("board")
}

fn observation(frame_index: u64) -> CornerObservation {
    let left: Vec<_> = (0..6)
        .map(|k| Point2::new(10.0 + k as f64 * 1.1, 20.0 + frame_index as f64 / 3.0))
        .collect();
    let right: Vec<_> = left.iter().map(|p| Point2::new(p.x - 7.25, p.y)).collect();
    CornerObservation::new(frame_index, left, right, 6).expect("observation")
}

fn corpus(indices: &[u64]) -> CorpusSet {
    let mut corpus = CorpusSet::new(board()).with_image_size(Some([640, 480]));
    for &i in indices {
        assert!(corpus.insert(observation(i)));
    }
    corpus
}

#[test]
fn save_then_load_preserves_indices_and_corners() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("corners.jsonl");
    let original = corpus(&[4, 17, 9]);

    CorpusJournal::save(&path, &original).expect("save");
    let loaded = CorpusJournal::load(&path).expect("load");

    assert_eq!(loaded.frame_indices(), vec![4, 17, 9]);
    assert_eq!(loaded.image_size, Some([640, 480]));
    for (a, b) in original.observations().iter().zip(loaded.observations()) {
        for (p, q) in a.left.iter().zip(&b.left).chain(a.right.iter().zip(&b.right)) {
            assert_abs_diff_eq!(p.x, q.x, epsilon = 1e-6);
            assert_abs_diff_eq!(p.y, q.y, epsilon = 1e-6);
        }
    }
}

#[test]
fn incremental_appends_are_readable_mid_run() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("nested").join("corners.jsonl");
    let mut journal = CorpusJournal::create(&path, board(), None).expect("create");
    journal.append(&observation(1)).expect("append");
    journal.append(&observation(2)).expect("append");

    // Journal still open: what is on disk already loads.
    let loaded = CorpusJournal::load(&path).expect("load");
    assert_eq!(loaded.frame_indices(), vec![1, 2]);
    assert_eq!(journal.records(), 2);
}

#[test]
fn torn_trailing_record_is_dropped() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("corners.jsonl");
    CorpusJournal::save(&path, &corpus(&[1, 2])).expect("save");

    let mut file = OpenOptions::new().append(true).open(&path).expect("open");
    file.write_all(br#"{"frame_index":3,"left":[[1.0,2"#)
        .expect("write");
    drop(file);

    let loaded = CorpusJournal::load(&path).expect("load");
    assert_eq!(loaded.frame_indices(), vec![1, 2]);
}

#[test]
fn damaged_record_in_the_middle_is_corruption() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("corners.jsonl");
    CorpusJournal::save(&path, &corpus(&[1])).expect("save");

    let mut file = OpenOptions::new().append(true).open(&path).expect("open");
    writeln!(file, "not json").expect("write");
    writeln!(file, "{}", serde_line(2)).expect("write");
    drop(file);

    match CorpusJournal::load(&path) {
        Err(CorpusIoError::Corrupt { line, .. }) => assert_eq!(line, 3),
        other => panic!("expected corruption, got {other:?}"),
    }
}

#[test]
fn missing_file_is_not_found() {
    let dir = tempfile::tempdir().expect("tempdir");
    let err = CorpusJournal::load(&dir.path().join("absent.jsonl")).expect_err("missing");
    assert!(matches!(err, CorpusIoError::NotFound(_)));
}

#[test]
fn board_mismatch_is_reported() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("corners.jsonl");
    CorpusJournal::save(&path, &corpus(&[1])).expect("save");

    let other = BoardGeometry::new(9, 6, 0.025).expect("board");
    let err = CorpusJournal::load_for(&path, &other).expect_err("mismatch");
    assert!(matches!(
        err,
        CorpusIoError::GeometryMismatch {
            stored_width: 3,
            expected_width: 9,
            ..
        }
    ));
}

#[test]
fn reopening_appends_instead_of_truncating() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("corners.jsonl");
    CorpusJournal::save(&path, &corpus(&[1, 2])).expect("save");

    let mut journal =
        CorpusJournal::open_or_create(&path, board(), Some([640, 480])).expect("reopen");
    journal.append(&observation(3)).expect("append");
    journal.append(&observation(2)).expect("append stored frame");
    assert_eq!(journal.records(), 1);
    drop(journal);

    let loaded = CorpusJournal::load(&path).expect("load");
    assert_eq!(loaded.frame_indices(), vec![1, 2, 3]);
    assert_eq!(loaded.image_size, Some([640, 480]));
}

#[test]
fn reopening_creates_a_missing_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("corners.jsonl");
    let mut journal = CorpusJournal::open_or_create(&path, board(), None).expect("create");
    journal.append(&observation(5)).expect("append");
    assert_eq!(CorpusJournal::load(&path).expect("load").frame_indices(), vec![5]);
}

#[test]
fn reopening_cuts_a_torn_record() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("corners.jsonl");
    CorpusJournal::save(&path, &corpus(&[1])).expect("save");
    let mut file = OpenOptions::new().append(true).open(&path).expect("open");
    file.write_all(br#"{"frame_index":2,"left":[[1.0"#)
        .expect("write");
    drop(file);

    let mut journal = CorpusJournal::open_or_create(&path, board(), None).expect("reopen");
    journal.append(&observation(4)).expect("append");
    drop(journal);

    assert_eq!(CorpusJournal::load(&path).expect("load").frame_indices(), vec![1, 4]);
}

#[test]
fn reopening_for_another_board_or_frame_size_is_refused() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("corners.jsonl");
    CorpusJournal::save(&path, &corpus(&[1, 2])).expect("save");
    let before = std::fs::read(&path).expect("read");

    let other = BoardGeometry::new(9, 6, 0.025).expect("board");
    assert!(matches!(
        CorpusJournal::open_or_create(&path, other, Some([640, 480])),
        Err(CorpusIoError::GeometryMismatch { .. })
    ));
    assert!(matches!(
        CorpusJournal::open_or_create(&path, board(), Some([1280, 720])),
        Err(CorpusIoError::ImageSizeMismatch {
            stored_width: 640,
            width: 1280,
            ..
        })
    ));
    assert_eq!(std::fs::read(&path).expect("read"), before);
}

fn serde_line(frame_index: u64) -> String {
    let o = observation(frame_index);
    let pts = |v: &[Point2<f64>]| {
        v.iter()
            .map(|p| format!("[{},{}]", p.x, p.y))
            .collect::<Vec<_>>()
            .join(",")
    };
    format!(
        r#"{{"frame_index":{},"left":[{}],"right":[{}]}}"#,
        o.frame_index,
        pts(&o.left),
        pts(&o.right)
    )
}
