//! PNG frame storage: numbered image sequences as streams, and the
//! `l_NNNN.png` / `r_NNNN.png` backup of selected pairs.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use stereo_calib_core::{CameraSide, FramePair, GrayImage};
use stereo_calib_select::{FrameReader, FrameSink, ReadError, SinkError};

use crate::detect::to_luma;

fn is_png(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("png"))
}

fn load_gray(path: &Path) -> Result<GrayImage, ReadError> {
    let luma = ::image::open(path)?.to_luma8();
    let (w, h) = luma.dimensions();
    GrayImage::from_raw(w as usize, h as usize, luma.into_raw())
        .ok_or_else(|| format!("{}: unexpected buffer size", path.display()).into())
}

/// Stream backed by PNG files on disk.
#[derive(Clone, Debug)]
pub struct ImageSequenceReader {
    frames: BTreeMap<u64, PathBuf>,
    count: u64,
}

impl ImageSequenceReader {
    /// Every PNG in `dir`, ordered by file name; frame `k` is the `k`-th file.
    pub fn from_dir(dir: &Path) -> io::Result<Self> {
        let mut files = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if is_png(&path) {
                files.push(path);
            }
        }
        files.sort();
        debug!("{}: {} frames", dir.display(), files.len());
        Ok(Self::numbered(
            files
                .into_iter()
                .enumerate()
                .map(|(k, p)| (k as u64, p))
                .collect(),
        ))
    }

    /// Files keyed by frame number. The stream length is the highest number
    /// plus one; gaps are read errors.
    pub fn numbered(frames: BTreeMap<u64, PathBuf>) -> Self {
        let count = frames.keys().next_back().map_or(0, |last| last + 1);
        Self { frames, count }
    }
}

impl FrameReader for ImageSequenceReader {
    fn frame_count(&self) -> u64 {
        self.count
    }

    fn read_frame(&mut self, index: u64) -> Result<Option<GrayImage>, ReadError> {
        if index >= self.count {
            return Ok(None);
        }
        let path = self
            .frames
            .get(&index)
            .ok_or_else(|| format!("no image for frame {index}"))?;
        load_gray(path).map(Some)
    }
}

/// File name of a backed-up frame.
pub fn frame_file_name(side: CameraSide, index: u64) -> String {
    let prefix = match side {
        CameraSide::Left => "l",
        CameraSide::Right => "r",
    };
    format!("{prefix}_{index:04}.png")
}

fn parse_frame_file_name(name: &str) -> Option<(CameraSide, u64)> {
    let stem = name.strip_suffix(".png")?;
    let (side, digits) = if let Some(d) = stem.strip_prefix("l_") {
        (CameraSide::Left, d)
    } else if let Some(d) = stem.strip_prefix("r_") {
        (CameraSide::Right, d)
    } else {
        return None;
    };
    if digits.len() < 4 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some((side, digits.parse().ok()?))
}

/// Left/right backup files matched by frame number.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PairedFrameFiles {
    pub left: BTreeMap<u64, PathBuf>,
    pub right: BTreeMap<u64, PathBuf>,
}

impl PairedFrameFiles {
    /// Scan `dir` for `l_NNNN.png` / `r_NNNN.png`.
    ///
    /// Files without a partner on the other side are left out with a
    /// warning; the directory itself is never modified.
    pub fn discover(dir: &Path) -> io::Result<Self> {
        let mut left = BTreeMap::new();
        let mut right = BTreeMap::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            let Some((side, index)) = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(parse_frame_file_name)
            else {
                continue;
            };
            match side {
                CameraSide::Left => left.insert(index, path),
                CameraSide::Right => right.insert(index, path),
            };
        }

        let unpaired_left = left.keys().filter(|k| !right.contains_key(k)).count();
        let unpaired_right = right.keys().filter(|k| !left.contains_key(k)).count();
        if unpaired_left + unpaired_right > 0 {
            warn!(
                "{}: ignoring {} unpaired frames ({unpaired_left} left, {unpaired_right} right)",
                dir.display(),
                unpaired_left + unpaired_right
            );
        }
        left.retain(|k, _| right.contains_key(k));
        right.retain(|k, _| left.contains_key(k));
        info!("{}: {} frame pairs", dir.display(), left.len());
        Ok(Self { left, right })
    }

    pub fn frame_numbers(&self) -> Vec<u64> {
        self.left.keys().copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.left.is_empty()
    }

    pub fn into_readers(self) -> (ImageSequenceReader, ImageSequenceReader) {
        (
            ImageSequenceReader::numbered(self.left),
            ImageSequenceReader::numbered(self.right),
        )
    }
}

/// Writes each stored pair as `l_NNNN.png` / `r_NNNN.png` into a folder.
#[derive(Clone, Debug)]
pub struct PngFrameSink {
    dir: PathBuf,
    created: bool,
}

impl PngFrameSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            created: false,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn write(&mut self, pair: &FramePair) -> Result<(), ReadError> {
        if !self.created {
            fs::create_dir_all(&self.dir)?;
            self.created = true;
        }
        for side in [CameraSide::Left, CameraSide::Right] {
            let path = self.dir.join(frame_file_name(side, pair.index));
            to_luma(pair.image(side))?.save(&path)?;
        }
        Ok(())
    }
}

impl FrameSink for PngFrameSink {
    fn store(&mut self, pair: &FramePair) -> Result<(), SinkError> {
        self.write(pair).map_err(|source| SinkError {
            index: pair.index,
            source,
        })
    }
}
