//! Frame walking state machine.
//!
//! ```text
//! Seeking -> Scoring -> Gating -> Detecting -> Accumulating -> Seeking | Done
//! ```
//!
//! Every rejection returns to `Seeking`; end of stream or a reached frame
//! target ends in `Done`.

use log::{debug, info};
use stereo_calib_core::{BoardGeometry, CornerObservation, CorpusSet, FramePair};

use crate::{
    CornerCache, CornerDetector, CorpusIoError, FrameGate, FrameSink, GateDecision, GateError,
    PairSource, PassThrough, QualityFilter, QualityParams, QualityScore, QualityVerdict,
    SinkError, SourceError,
};

#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Gate(#[from] GateError),
    #[error(transparent)]
    Corpus(#[from] CorpusIoError),
    #[error(transparent)]
    Sink(#[from] SinkError),
}

/// Observable state of a [`FrameSelector`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SelectionState {
    Seeking,
    Scoring,
    Gating,
    Detecting,
    Accumulating,
    Done,
}

/// Per-run counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SelectionStats {
    pub frames_read: usize,
    pub rejected_blurry: usize,
    pub rejected_similar: usize,
    pub rejected_manual: usize,
    pub rejected_no_corners: usize,
    pub skipped_duplicates: usize,
    pub accepted: usize,
}

/// Result of a finished selection run.
#[derive(Clone, Debug)]
pub struct Selection {
    pub corpus: CorpusSet,
    pub stats: SelectionStats,
}

enum Step {
    Seeking,
    Scoring(FramePair),
    Gating(FramePair, QualityScore),
    Detecting(FramePair),
    Accumulating(FramePair, CornerObservation),
    Done,
}

impl Step {
    fn state(&self) -> SelectionState {
        match self {
            Step::Seeking => SelectionState::Seeking,
            Step::Scoring(_) => SelectionState::Scoring,
            Step::Gating(..) => SelectionState::Gating,
            Step::Detecting(_) => SelectionState::Detecting,
            Step::Accumulating(..) => SelectionState::Accumulating,
            Step::Done => SelectionState::Done,
        }
    }
}

/// Drives a [`PairSource`] through filtering, gating and detection into a
/// [`CorpusSet`].
pub struct FrameSelector<'a> {
    filter: QualityFilter,
    gate: Box<dyn FrameGate + 'a>,
    cache: CornerCache,
    sink: Option<Box<dyn FrameSink + 'a>>,
    frame_count_target: i64,
    corpus: CorpusSet,
    stats: SelectionStats,
    step: Step,
}

impl<'a> FrameSelector<'a> {
    pub fn new(
        geometry: BoardGeometry,
        params: QualityParams,
        detector: Box<dyn CornerDetector>,
    ) -> Self {
        Self::with_cache(params, CornerCache::new(detector, geometry))
    }

    pub fn with_cache(params: QualityParams, cache: CornerCache) -> Self {
        let geometry = *cache.geometry();
        Self {
            filter: QualityFilter::new(params),
            gate: Box::new(PassThrough),
            cache,
            sink: None,
            frame_count_target: -1,
            corpus: CorpusSet::new(geometry),
            stats: SelectionStats::default(),
            step: Step::Seeking,
        }
    }

    pub fn with_gate(mut self, gate: Box<dyn FrameGate + 'a>) -> Self {
        self.gate = gate;
        self
    }

    pub fn with_sink(mut self, sink: Box<dyn FrameSink + 'a>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Stop once the corpus holds `target` observations; `<= 0` means no cap.
    pub fn with_frame_count_target(mut self, target: i64) -> Self {
        self.frame_count_target = target;
        self
    }

    pub fn state(&self) -> SelectionState {
        self.step.state()
    }

    pub fn corpus(&self) -> &CorpusSet {
        &self.corpus
    }

    pub fn stats(&self) -> &SelectionStats {
        &self.stats
    }

    fn target_reached(&self) -> bool {
        self.frame_count_target > 0 && self.corpus.len() as i64 >= self.frame_count_target
    }

    /// Perform one transition and return the new state.
    pub fn step(&mut self, source: &mut dyn PairSource) -> Result<SelectionState, PipelineError> {
        let step = std::mem::replace(&mut self.step, Step::Done);
        self.step = match step {
            Step::Done => Step::Done,
            Step::Seeking if self.target_reached() => Step::Done,
            Step::Seeking => match source.next_pair()? {
                Some(pair) => {
                    self.stats.frames_read += 1;
                    Step::Scoring(pair)
                }
                None => {
                    debug!("end of stream after {} pairs", self.stats.frames_read);
                    Step::Done
                }
            },
            Step::Scoring(pair) => match self.filter.evaluate(&pair) {
                QualityVerdict::Accept(score) => Step::Gating(pair, score),
                QualityVerdict::RejectBlurry(score) => {
                    debug!(
                        "frame {}: blurry (sharpness {:.1})",
                        pair.index, score.sharpness
                    );
                    self.stats.rejected_blurry += 1;
                    Step::Seeking
                }
                QualityVerdict::RejectSimilar(score) => {
                    debug!(
                        "frame {}: too similar (difference {:.3})",
                        pair.index,
                        score.difference_from_last_accepted.unwrap_or(0.0)
                    );
                    self.stats.rejected_similar += 1;
                    Step::Seeking
                }
            },
            Step::Gating(pair, score) => match self.gate.confirm(&pair, &score)? {
                GateDecision::Accept => Step::Detecting(pair),
                GateDecision::Reject => {
                    debug!("frame {}: rejected manually", pair.index);
                    self.stats.rejected_manual += 1;
                    Step::Seeking
                }
            },
            Step::Detecting(pair) if self.corpus.contains(pair.index) => {
                debug!("frame {}: already in corpus", pair.index);
                self.stats.skipped_duplicates += 1;
                Step::Seeking
            }
            Step::Detecting(pair) => match self.cache.observe(&pair) {
                Some(observation) => Step::Accumulating(pair, observation),
                None => {
                    debug!("frame {}: board not found in both images", pair.index);
                    self.stats.rejected_no_corners += 1;
                    Step::Seeking
                }
            },
            Step::Accumulating(pair, observation) => {
                if let Some(sink) = self.sink.as_mut() {
                    sink.store(&pair)?;
                }
                let (w, h) = pair.left.dimensions();
                let size = [w as u32, h as u32];
                self.cache.record(&observation, size)?;
                if self.corpus.is_empty() {
                    self.corpus.image_size = Some(size);
                }
                self.corpus.insert(observation);
                self.stats.accepted += 1;
                info!(
                    "frame {}: accepted ({} observations)",
                    pair.index,
                    self.corpus.len()
                );
                if self.target_reached() {
                    Step::Done
                } else {
                    Step::Seeking
                }
            }
        };
        Ok(self.step.state())
    }

    /// Run to completion.
    pub fn run(mut self, source: &mut dyn PairSource) -> Result<Selection, PipelineError> {
        while self.step(source)? != SelectionState::Done {}
        let stats = self.stats;
        info!(
            "selection done: {} read, {} accepted, {} blurry, {} similar, {} manual, {} no corners",
            stats.frames_read,
            stats.accepted,
            stats.rejected_blurry,
            stats.rejected_similar,
            stats.rejected_manual,
            stats.rejected_no_corners
        );
        Ok(Selection {
            corpus: self.corpus,
            stats,
        })
    }
}
