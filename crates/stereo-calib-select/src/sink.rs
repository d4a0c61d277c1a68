//! Where selected frame pairs are backed up to.

use stereo_calib_core::FramePair;

use crate::ReadError;

#[derive(thiserror::Error, Debug)]
#[error("failed to store frame pair {index}")]
pub struct SinkError {
    pub index: u64,
    #[source]
    pub source: ReadError,
}

/// Receives every pair that produced a corner observation.
pub trait FrameSink {
    fn store(&mut self, pair: &FramePair) -> Result<(), SinkError>;
}

impl<S: FrameSink + ?Sized> FrameSink for &mut S {
    fn store(&mut self, pair: &FramePair) -> Result<(), SinkError> {
        (**self).store(pair)
    }
}

/// Keeps the indices of stored pairs in memory; handy in tests.
#[derive(Clone, Debug, Default)]
pub struct RecordingSink {
    pub stored: Vec<u64>,
}

impl FrameSink for RecordingSink {
    fn store(&mut self, pair: &FramePair) -> Result<(), SinkError> {
        self.stored.push(pair.index);
        Ok(())
    }
}
