//! Synchronized frame pairs from two streams.

use std::error::Error;

use log::{debug, warn};
use stereo_calib_core::{CameraSide, FramePair, GrayImage};

/// Error type returned by concrete stream readers.
pub type ReadError = Box<dyn Error + Send + Sync + 'static>;

/// One decoded stream (video file, image sequence, ...).
///
/// Readers must report a stable frame count and return `Ok(None)` for any
/// index at or past the end.
pub trait FrameReader {
    fn frame_count(&self) -> u64;

    /// Decode the frame at `index` as 8-bit grayscale.
    fn read_frame(&mut self, index: u64) -> Result<Option<GrayImage>, ReadError>;
}

#[derive(thiserror::Error, Debug)]
pub enum SourceError {
    #[error(
        "streams out of sync at frame {index}: left has {left_len} frames, right has {right_len}"
    )]
    StreamDesync {
        index: u64,
        left_len: u64,
        right_len: u64,
    },
    #[error("failed to read {side} frame {index}")]
    Read {
        side: CameraSide,
        index: u64,
        #[source]
        source: ReadError,
    },
}

/// Anything that hands out frame pairs to the selection pipeline.
pub trait PairSource {
    /// Next pair, or `Ok(None)` once the source is exhausted.
    fn next_pair(&mut self) -> Result<Option<FramePair>, SourceError>;
}

#[derive(Clone, Debug)]
enum Order {
    Sequential { next: u64 },
    Indexed { indices: Vec<u64>, cursor: usize },
}

/// Walks two [`FrameReader`]s in lock-step.
///
/// Sequential mode reads `0, 1, 2, ..` until the shorter stream ends.
/// Index-driven mode reads exactly the requested frame numbers, in order.
/// Both are finite and cannot be rewound.
pub struct FrameSource {
    left: Box<dyn FrameReader>,
    right: Box<dyn FrameReader>,
    order: Order,
    finished: bool,
}

impl FrameSource {
    pub fn sequential(left: Box<dyn FrameReader>, right: Box<dyn FrameReader>) -> Self {
        Self {
            left,
            right,
            order: Order::Sequential { next: 0 },
            finished: false,
        }
    }

    pub fn indexed(
        left: Box<dyn FrameReader>,
        right: Box<dyn FrameReader>,
        indices: Vec<u64>,
    ) -> Self {
        Self {
            left,
            right,
            order: Order::Indexed { indices, cursor: 0 },
            finished: false,
        }
    }

    /// Frame counts reported by the `(left, right)` streams.
    pub fn stream_lengths(&self) -> (u64, u64) {
        (self.left.frame_count(), self.right.frame_count())
    }

    fn read_pair(&mut self, index: u64) -> Result<Option<FramePair>, SourceError> {
        let left = self
            .left
            .read_frame(index)
            .map_err(|source| SourceError::Read {
                side: CameraSide::Left,
                index,
                source,
            })?;
        let right = self
            .right
            .read_frame(index)
            .map_err(|source| SourceError::Read {
                side: CameraSide::Right,
                index,
                source,
            })?;

        match (left, right) {
            (Some(left), Some(right)) => Ok(Some(FramePair { index, left, right })),
            (None, None) => Ok(None),
            // A reader that ran dry before its advertised length.
            _ => {
                let (left_len, right_len) = self.stream_lengths();
                Err(SourceError::StreamDesync {
                    index,
                    left_len,
                    right_len,
                })
            }
        }
    }

    fn next_sequential(&mut self, index: u64) -> Result<Option<FramePair>, SourceError> {
        let (left_len, right_len) = self.stream_lengths();
        if index >= left_len.min(right_len) {
            if left_len != right_len {
                warn!(
                    "streams have unequal lengths (left {left_len}, right {right_len}); \
                     stopping at frame {index}"
                );
            }
            return Ok(None);
        }
        self.read_pair(index)
    }

    fn next_indexed(&mut self, index: u64) -> Result<Option<FramePair>, SourceError> {
        let (left_len, right_len) = self.stream_lengths();
        let past_left = index >= left_len;
        let past_right = index >= right_len;
        if past_left && past_right {
            warn!(
                "requested frame {index} is past the end of both streams \
                 (left {left_len}, right {right_len}); stopping"
            );
            return Ok(None);
        }
        if past_left || past_right {
            return Err(SourceError::StreamDesync {
                index,
                left_len,
                right_len,
            });
        }
        self.read_pair(index)
    }
}

impl PairSource for FrameSource {
    fn next_pair(&mut self) -> Result<Option<FramePair>, SourceError> {
        if self.finished {
            return Ok(None);
        }

        let index = match &mut self.order {
            Order::Sequential { next } => {
                let index = *next;
                *next += 1;
                index
            }
            Order::Indexed { indices, cursor } => match indices.get(*cursor) {
                Some(&index) => {
                    *cursor += 1;
                    index
                }
                None => {
                    self.finished = true;
                    return Ok(None);
                }
            },
        };

        let result = if matches!(self.order, Order::Sequential { .. }) {
            self.next_sequential(index)
        } else {
            self.next_indexed(index)
        };
        match &result {
            Ok(Some(_)) => debug!("read frame pair {index}"),
            Ok(None) | Err(_) => self.finished = true,
        }
        result
    }
}

impl Iterator for FrameSource {
    type Item = Result<FramePair, SourceError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_pair().transpose()
    }
}

/// In-memory stream, mainly for tests and replaying decoded frames.
#[derive(Clone, Debug, Default)]
pub struct MemoryReader {
    frames: Vec<GrayImage>,
}

impl MemoryReader {
    pub fn new(frames: Vec<GrayImage>) -> Self {
        Self { frames }
    }
}

impl FrameReader for MemoryReader {
    fn frame_count(&self) -> u64 {
        self.frames.len() as u64
    }

    fn read_frame(&mut self, index: u64) -> Result<Option<GrayImage>, ReadError> {
        Ok(usize::try_from(index)
            .ok()
            .and_then(|i| self.frames.get(i))
            .cloned())
    }
}
