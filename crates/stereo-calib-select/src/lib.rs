//! Selection of stereo frame pairs for calibration.
//!
//! A [`FrameSource`] yields synchronized pairs, a [`QualityFilter`] drops
//! blurry and redundant ones, an optional [`FrameGate`] lets a human veto the
//! rest, and a [`CornerCache`] turns survivors into [`CornerObservation`]s,
//! journaling each one to disk once it joins the corpus. [`FrameSelector`]
//! strings the stages together.
//!
//! ```no_run
//! use stereo_calib_core::{BoardGeometry, GrayImage};
//! use stereo_calib_select::{
//!     CornerDetector, FrameSelector, FrameSource, MemoryReader, QualityParams,
//! };
//! # struct Detector;
//! # impl CornerDetector for Detector {
//! #     fn find_board_corners(&self, _: &GrayImage, _: &BoardGeometry)
//! #         -> Option<Vec<nalgebra::Point2<f64>>> { None }
//! # }
//! let board = BoardGeometry::new(9, 6, 0.025).unwrap();
//! let mut source = FrameSource::sequential(
//!     Box::new(MemoryReader::new(vec![])),
//!     Box::new(MemoryReader::new(vec![])),
//! );
//! let selection = FrameSelector::new(board, QualityParams::default(), Box::new(Detector))
//!     .with_frame_count_target(20)
//!     .run(&mut source)
//!     .unwrap();
//! println!("{} observations", selection.corpus.len());
//! ```
//!
//! [`CornerObservation`]: stereo_calib_core::CornerObservation

mod cache;
mod filter;
mod gate;
mod journal;
mod pipeline;
mod sink;
mod source;

pub use cache::{CornerCache, CornerDetector};
pub use filter::{QualityFilter, QualityParams, QualityScore, QualityVerdict};
pub use gate::{FrameGate, GateDecision, GateError, PassThrough, PromptGate};
pub use journal::{CorpusIoError, CorpusJournal};
pub use pipeline::{FrameSelector, PipelineError, Selection, SelectionState, SelectionStats};
pub use sink::{FrameSink, RecordingSink, SinkError};
pub use source::{FrameReader, FrameSource, MemoryReader, PairSource, ReadError, SourceError};
