//! Append-only JSON Lines persistence of corner observations.
//!
//! Layout: one header line, then one line per observation.
//!
//! ```text
//! {"version":1,"board":{"width":9,"height":6,"square_size":1.98888},"image_size":[1280,720]}
//! {"frame_index":3,"left":[[412.5,233.1],...],"right":[[398.0,240.7],...]}
//! ```
//!
//! Every record is written with a single `write_all` and synced before the
//! next frame is processed, so an interrupted run loses at most the record
//! being written. A torn final line is dropped on load.

use std::collections::BTreeSet;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use stereo_calib_core::{BoardGeometry, CornerObservation, CorpusSet};

const JOURNAL_VERSION: u32 = 1;

#[derive(thiserror::Error, Debug)]
pub enum CorpusIoError {
    #[error("corners file not found: {0}")]
    NotFound(PathBuf),
    #[error("corners file i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("corners record could not be encoded: {0}")]
    Json(#[from] serde_json::Error),
    #[error("corners file is corrupt at line {line}: {reason}")]
    Corrupt { line: usize, reason: String },
    #[error("corners file was recorded for a {stored_width}x{stored_height} board, expected {expected_width}x{expected_height}")]
    GeometryMismatch {
        stored_width: u32,
        stored_height: u32,
        expected_width: u32,
        expected_height: u32,
    },
    #[error("corners file was recorded from {stored_width}x{stored_height} frames, current frames are {width}x{height}")]
    ImageSizeMismatch {
        stored_width: u32,
        stored_height: u32,
        width: u32,
        height: u32,
    },
}

#[derive(Debug, Serialize, Deserialize)]
struct JournalHeader {
    version: u32,
    board: BoardGeometry,
    image_size: Option<[u32; 2]>,
}

/// Open append handle on a corners file.
pub struct CorpusJournal {
    path: PathBuf,
    file: File,
    records: usize,
    /// Frame indices already on disk.
    known: BTreeSet<u64>,
}

impl CorpusJournal {
    /// Create (or truncate) `path` and write the header.
    ///
    /// Use [`Self::open_or_create`] to keep what an earlier run recorded.
    pub fn create(
        path: impl Into<PathBuf>,
        board: BoardGeometry,
        image_size: Option<[u32; 2]>,
    ) -> Result<Self, CorpusIoError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;
        let mut journal = Self {
            path,
            file,
            records: 0,
            known: BTreeSet::new(),
        };
        let header = JournalHeader {
            version: JOURNAL_VERSION,
            board,
            image_size,
        };
        journal.write_line(&serde_json::to_string(&header)?)?;
        Ok(journal)
    }

    /// Open `path` for appending, or create it when absent.
    ///
    /// An existing file keeps its observations and must have been recorded
    /// for the same board and frame size. A torn trailing record is cut off
    /// before anything is appended.
    pub fn open_or_create(
        path: impl Into<PathBuf>,
        board: BoardGeometry,
        image_size: Option<[u32; 2]>,
    ) -> Result<Self, CorpusIoError> {
        let path = path.into();
        let stored = match Self::load_for(&path, &board) {
            Ok(stored) => stored,
            Err(CorpusIoError::NotFound(_)) => return Self::create(path, board, image_size),
            Err(e) => return Err(e),
        };
        if let (Some([sw, sh]), Some([w, h])) = (stored.image_size, image_size) {
            if (sw, sh) != (w, h) {
                return Err(CorpusIoError::ImageSizeMismatch {
                    stored_width: sw,
                    stored_height: sh,
                    width: w,
                    height: h,
                });
            }
        }

        let bytes = fs::read(&path)?;
        let complete = bytes.iter().rposition(|&b| b == b'\n').map_or(0, |i| i + 1);
        let tail = &bytes[complete..];
        let mut file = OpenOptions::new().append(true).open(&path)?;
        if !tail.is_empty() {
            if serde_json::from_slice::<serde_json::Value>(tail).is_ok() {
                file.write_all(b"\n")?;
            } else {
                warn!(
                    "{}: cutting torn record after byte {complete}",
                    path.display()
                );
                file.set_len(complete as u64)?;
            }
        }

        info!(
            "appending to {} ({} observations stored)",
            path.display(),
            stored.len()
        );
        Ok(Self {
            path,
            file,
            records: 0,
            known: stored.frame_indices().into_iter().collect(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of observations appended through this handle.
    pub fn records(&self) -> usize {
        self.records
    }

    /// Append one observation; frames already on disk are skipped.
    pub fn append(&mut self, observation: &CornerObservation) -> Result<(), CorpusIoError> {
        if self.known.contains(&observation.frame_index) {
            debug!(
                "frame {} already in {}",
                observation.frame_index,
                self.path.display()
            );
            return Ok(());
        }
        self.write_line(&serde_json::to_string(observation)?)?;
        self.known.insert(observation.frame_index);
        self.records += 1;
        Ok(())
    }

    fn write_line(&mut self, json: &str) -> Result<(), CorpusIoError> {
        let mut line = String::with_capacity(json.len() + 1);
        line.push_str(json);
        line.push('\n');
        self.file.write_all(line.as_bytes())?;
        self.file.flush()?;
        self.file.sync_data()?;
        Ok(())
    }

    /// Write a complete corpus, replacing `path` atomically.
    pub fn save(path: &Path, corpus: &CorpusSet) -> Result<(), CorpusIoError> {
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        {
            let mut journal = Self::create(&tmp, corpus.geometry, corpus.image_size)?;
            for observation in corpus.observations() {
                journal.append(observation)?;
            }
        }
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Read a corners file back into a corpus.
    pub fn load(path: &Path) -> Result<CorpusSet, CorpusIoError> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CorpusIoError::NotFound(path.to_path_buf()))
            }
            Err(e) => return Err(e.into()),
        };

        let mut corpus: Option<CorpusSet> = None;
        let mut segments = text.split_inclusive('\n').enumerate().peekable();
        while let Some((idx, segment)) = segments.next() {
            let line_no = idx + 1;
            let complete = segment.ends_with('\n');
            let is_last = segments.peek().is_none();
            let line = segment.trim();
            if line.is_empty() {
                continue;
            }

            let Some(set) = corpus.as_mut() else {
                let header = parse_header(line).map_err(|reason| CorpusIoError::Corrupt {
                    line: line_no,
                    reason,
                })?;
                corpus = Some(CorpusSet::new(header.board).with_image_size(header.image_size));
                continue;
            };

            let observation = match serde_json::from_str::<CornerObservation>(line) {
                Ok(observation) => observation,
                Err(e) if is_last && !complete => {
                    warn!(
                        "{}: dropping torn record at line {line_no} ({e})",
                        path.display()
                    );
                    break;
                }
                Err(e) => {
                    return Err(CorpusIoError::Corrupt {
                        line: line_no,
                        reason: e.to_string(),
                    })
                }
            };

            let frame_index = observation.frame_index;
            if !observation.matches_geometry(&set.geometry) {
                return Err(CorpusIoError::Corrupt {
                    line: line_no,
                    reason: format!(
                        "frame {frame_index} does not have {} corners per side",
                        set.geometry.corner_count()
                    ),
                });
            }
            if !set.insert(observation) {
                warn!(
                    "{}: duplicate frame {frame_index} at line {line_no} ignored",
                    path.display()
                );
            }
        }

        let corpus = corpus.ok_or_else(|| CorpusIoError::Corrupt {
            line: 1,
            reason: "missing header".to_string(),
        })?;
        info!(
            "loaded {} observations from {}",
            corpus.len(),
            path.display()
        );
        Ok(corpus)
    }

    /// Load and check the stored board against `expected`.
    pub fn load_for(path: &Path, expected: &BoardGeometry) -> Result<CorpusSet, CorpusIoError> {
        let corpus = Self::load(path)?;
        let stored = corpus.geometry;
        if stored.width != expected.width || stored.height != expected.height {
            return Err(CorpusIoError::GeometryMismatch {
                stored_width: stored.width,
                stored_height: stored.height,
                expected_width: expected.width,
                expected_height: expected.height,
            });
        }
        if stored.square_size != expected.square_size {
            warn!(
                "corners file square size {} differs from configured {}; using the stored value",
                stored.square_size, expected.square_size
            );
        }
        Ok(corpus)
    }
}

fn parse_header(line: &str) -> Result<JournalHeader, String> {
    let header: JournalHeader = serde_json::from_str(line).map_err(|e| format!("bad header: {e}"))?;
    if header.version != JOURNAL_VERSION {
        return Err(format!("unsupported version {}", header.version));
    }
    header
        .board
        .validate()
        .map_err(|e| format!("bad header: {e}"))?;
    Ok(header)
}
