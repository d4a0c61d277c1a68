use nalgebra::Point2;
use stereo_calib_core::{BoardGeometry, FramePair, GrayImage};
use stereo_calib_select::{
    CornerCache, CornerDetector, CorpusJournal, FrameSelector, FrameSink, FrameSource,
    MemoryReader, PipelineError, PromptGate, QualityParams, RecordingSink, SelectionState,
    SinkError, SourceError,
};

const W: usize = 32;
const H: usize = 16;
const NO_BOARD: u8 = 128;

/// Vertical stripes, 4 px wide. Phases 0 and 4 are pixel-wise inverses.
fn frame(phase: usize, board: bool) -> GrayImage {
    let mut data: Vec<u8> = (0..W * H)
        .map(|i| if (i % W + phase) / 4 % 2 == 0 { 0 } else { 255 })
        .collect();
    if !board {
        data[W * H / 2] = NO_BOARD;
    }
    GrayImage::from_raw(W, H, data).expect("frame")
}

struct MarkerDetector;

impl CornerDetector for MarkerDetector {
    fn find_board_corners(
        &self,
        image: &GrayImage,
        geometry: &BoardGeometry,
    ) -> Option<Vec<Point2<f64>>> {
        if image.data[W * H / 2] == NO_BOARD {
            return None;
        }
        Some(
            geometry
                .planar_points()
                .into_iter()
                .map(|p| Point2::new(100.0 + p.x * 10.0, 50.0 + p.y * 10.0))
                .collect(),
        )
    }
}

fn board() -> BoardGeometry {
    BoardGeometry::new(3, 2, 1.0).expect("board")
}

fn params() -> QualityParams {
    QualityParams {
        sharpness_threshold: 100.0,
        difference_threshold: 0.4,
    }
}

fn source(left: Vec<GrayImage>, right: Vec<GrayImage>) -> FrameSource {
    FrameSource::sequential(
        Box::new(MemoryReader::new(left)),
        Box::new(MemoryReader::new(right)),
    )
}

fn alternating(n: usize) -> Vec<GrayImage> {
    (0..n).map(|i| frame((i % 2) * 4, true)).collect()
}

#[test]
fn stops_exactly_at_the_frame_target() {
    let frames = alternating(8);
    let mut src = source(frames.clone(), frames);
    let selection = FrameSelector::new(board(), params(), Box::new(MarkerDetector))
        .with_frame_count_target(3)
        .run(&mut src)
        .expect("run");

    assert_eq!(selection.corpus.len(), 3);
    assert_eq!(selection.corpus.frame_indices(), vec![0, 1, 2]);
    assert_eq!(selection.stats.frames_read, 3);
    assert_eq!(selection.corpus.image_size, Some([W as u32, H as u32]));
}

#[test]
fn unbounded_target_consumes_the_whole_stream() {
    let frames = alternating(5);
    let mut src = source(frames.clone(), frames);
    let selection = FrameSelector::new(board(), params(), Box::new(MarkerDetector))
        .run(&mut src)
        .expect("run");
    assert_eq!(selection.corpus.len(), 5);
    assert_eq!(selection.stats.frames_read, 5);
}

#[test]
fn redundant_and_blurry_frames_are_skipped() {
    let left = vec![
        frame(0, true),
        frame(0, true), // same as last accepted
        GrayImage::filled(W, H, 40), // blurry, would be "different"
        frame(4, true),
        frame(4, true), // same again
        frame(0, true),
    ];
    let mut src = source(left.clone(), left);
    let selection = FrameSelector::new(board(), params(), Box::new(MarkerDetector))
        .run(&mut src)
        .expect("run");

    assert_eq!(selection.corpus.frame_indices(), vec![0, 3, 5]);
    assert_eq!(selection.stats.rejected_similar, 2);
    assert_eq!(selection.stats.rejected_blurry, 1);
    assert_eq!(selection.stats.frames_read, 6);
}

#[test]
fn partial_detections_do_not_count() {
    let left = alternating(4);
    let mut right = alternating(4);
    right[1] = frame(4, false);
    let mut src = source(left, right);
    let selection = FrameSelector::new(board(), params(), Box::new(MarkerDetector))
        .run(&mut src)
        .expect("run");

    assert_eq!(selection.corpus.frame_indices(), vec![0, 2, 3]);
    assert_eq!(selection.stats.rejected_no_corners, 1);
}

#[test]
fn manual_gate_vetoes_pairs() {
    let frames = alternating(4);
    let mut src = source(frames.clone(), frames);
    let mut prompt_out = Vec::new();
    let gate = PromptGate::new(&b"a\nn\na\na\n"[..], &mut prompt_out);
    let mut sink = RecordingSink::default();
    let selection = FrameSelector::new(board(), params(), Box::new(MarkerDetector))
        .with_gate(Box::new(gate))
        .with_sink(Box::new(&mut sink))
        .run(&mut src)
        .expect("run");

    assert_eq!(selection.corpus.frame_indices(), vec![0, 2, 3]);
    assert_eq!(selection.stats.rejected_manual, 1);
    assert_eq!(sink.stored, vec![0, 2, 3]);
}

#[test]
fn state_machine_walks_the_documented_states() {
    let frames = alternating(1);
    let mut src = source(frames.clone(), frames);
    let mut selector = FrameSelector::new(board(), params(), Box::new(MarkerDetector));
    assert_eq!(selector.state(), SelectionState::Seeking);

    let mut seen = Vec::new();
    loop {
        let state = selector.step(&mut src).expect("step");
        seen.push(state);
        if state == SelectionState::Done {
            break;
        }
    }
    assert_eq!(
        seen,
        vec![
            SelectionState::Scoring,
            SelectionState::Gating,
            SelectionState::Detecting,
            SelectionState::Accumulating,
            SelectionState::Seeking,
            SelectionState::Done,
        ]
    );
    assert_eq!(selector.corpus().len(), 1);
}

#[test]
fn desynchronized_streams_abort_the_run() {
    let mut src = FrameSource::indexed(
        Box::new(MemoryReader::new(alternating(6))),
        Box::new(MemoryReader::new(alternating(3))),
        vec![0, 5],
    );
    let err = FrameSelector::new(board(), params(), Box::new(MarkerDetector))
        .run(&mut src)
        .expect_err("desync");
    assert!(matches!(
        err,
        PipelineError::Source(SourceError::StreamDesync { index: 5, .. })
    ));
}

#[test]
fn journal_matches_the_accumulated_corpus() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("corners.jsonl");
    let frames = alternating(4);
    let mut src = source(frames.clone(), frames);

    let cache = CornerCache::new(Box::new(MarkerDetector), board()).with_journal(&path);
    let selection = FrameSelector::with_cache(params(), cache)
        .run(&mut src)
        .expect("run");

    let loaded = CorpusJournal::load(&path).expect("load");
    assert_eq!(loaded, selection.corpus);
    assert_eq!(loaded.frame_indices(), vec![0, 1, 2, 3]);
}

#[test]
fn a_second_run_extends_the_journal() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("corners.jsonl");

    let frames = alternating(3);
    let mut src = source(frames.clone(), frames);
    let cache = CornerCache::new(Box::new(MarkerDetector), board()).with_journal(&path);
    FrameSelector::with_cache(params(), cache)
        .run(&mut src)
        .expect("first run");

    let frames = alternating(5);
    let mut src = source(frames.clone(), frames);
    let cache = CornerCache::new(Box::new(MarkerDetector), board()).with_journal(&path);
    let second = FrameSelector::with_cache(params(), cache)
        .run(&mut src)
        .expect("second run");

    assert_eq!(second.corpus.len(), 5);
    let loaded = CorpusJournal::load(&path).expect("load");
    assert_eq!(loaded.frame_indices(), vec![0, 1, 2, 3, 4]);
}

/// Refuses to store the pair with the given index.
struct FailingSink {
    fail_at: u64,
    stored: Vec<u64>,
}

impl FrameSink for FailingSink {
    fn store(&mut self, pair: &FramePair) -> Result<(), SinkError> {
        if pair.index == self.fail_at {
            return Err(SinkError {
                index: pair.index,
                source: "disk full".into(),
            });
        }
        self.stored.push(pair.index);
        Ok(())
    }
}

#[test]
fn pairs_the_sink_refuses_are_not_journaled() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("corners.jsonl");
    let frames = alternating(4);
    let mut src = source(frames.clone(), frames);
    let mut sink = FailingSink {
        fail_at: 2,
        stored: Vec::new(),
    };

    let cache = CornerCache::new(Box::new(MarkerDetector), board()).with_journal(&path);
    let err = FrameSelector::with_cache(params(), cache)
        .with_sink(Box::new(&mut sink))
        .run(&mut src)
        .expect_err("sink failure");
    assert!(matches!(err, PipelineError::Sink(SinkError { index: 2, .. })));

    assert_eq!(sink.stored, vec![0, 1]);
    let loaded = CorpusJournal::load(&path).expect("load");
    assert_eq!(loaded.frame_indices(), vec![0, 1]);
}
