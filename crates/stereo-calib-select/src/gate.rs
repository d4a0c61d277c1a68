//! Optional human confirmation of filtered pairs.

use std::io::{BufRead, Write};

use stereo_calib_core::FramePair;

use crate::QualityScore;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GateDecision {
    Accept,
    Reject,
}

#[derive(thiserror::Error, Debug)]
pub enum GateError {
    #[error("manual gate i/o failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Final say on a pair that already passed the quality filter.
pub trait FrameGate {
    fn confirm(&mut self, pair: &FramePair, score: &QualityScore)
        -> Result<GateDecision, GateError>;
}

/// Accepts everything; used when manual filtering is off.
#[derive(Clone, Copy, Debug, Default)]
pub struct PassThrough;

impl FrameGate for PassThrough {
    fn confirm(&mut self, _: &FramePair, _: &QualityScore) -> Result<GateDecision, GateError> {
        Ok(GateDecision::Accept)
    }
}

/// Line-oriented prompt: `a` approves, anything else rejects.
///
/// Blocks until a line arrives. End of input rejects the pair.
pub struct PromptGate<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> PromptGate<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }
}

impl PromptGate<std::io::StdinLock<'static>, std::io::Stderr> {
    /// Prompt on stderr, read answers from stdin.
    pub fn stdio() -> Self {
        Self::new(std::io::stdin().lock(), std::io::stderr())
    }
}

impl<R: BufRead, W: Write> FrameGate for PromptGate<R, W> {
    fn confirm(
        &mut self,
        pair: &FramePair,
        score: &QualityScore,
    ) -> Result<GateDecision, GateError> {
        match score.difference_from_last_accepted {
            Some(d) => write!(
                self.output,
                "frame {}: sharpness {:.1}, difference {:.3}. approve? [a/N] ",
                pair.index, score.sharpness, d
            )?,
            None => write!(
                self.output,
                "frame {}: sharpness {:.1}. approve? [a/N] ",
                pair.index, score.sharpness
            )?,
        }
        self.output.flush()?;

        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            log::warn!("manual gate input closed; rejecting frame {}", pair.index);
            return Ok(GateDecision::Reject);
        }
        if line.trim().eq_ignore_ascii_case("a") {
            Ok(GateDecision::Accept)
        } else {
            Ok(GateDecision::Reject)
        }
    }
}
