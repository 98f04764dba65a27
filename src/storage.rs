use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use memmap2::Mmap;
use rkyv::{AlignedVec, Deserialize};
use tracing::{debug, warn};

use crate::error::{Result, StoreError};
use crate::model::ImageRecord;

const LEN_PREFIX: usize = 4;

/// Largest archive a single frame may hold. A length prefix above this is
/// damage, never a torn append.
pub const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

/// Append-only log of image records.
///
/// Frame format: [Length (4b LE)][rkyv archive (N bytes)]
#[derive(Debug)]
pub struct Segment {
    pub file_path: PathBuf,
    file: File,
    current_offset: u64,
    strict: bool,
}

impl Segment {
    /// Opens (or creates) the log. Call [`Segment::replay`] before appending.
    pub fn open(path: &Path, strict: bool) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;

        let current_offset = file.metadata()?.len();

        Ok(Self {
            file_path: path.to_path_buf(),
            file,
            current_offset,
            strict,
        })
    }

    pub fn size(&self) -> u64 {
        self.current_offset
    }

    /// Reads every complete frame in order, paired with its offset.
    ///
    /// A torn trailing frame (crash mid-append) is cut off so the next append
    /// starts on a frame boundary. A complete frame that fails validation, or
    /// a length prefix no append could have written, is reported as
    /// [`StoreError::Corrupt`].
    pub fn replay(&mut self) -> Result<Vec<(u64, ImageRecord)>> {
        let len = self.file.metadata()?.len();
        if len == 0 {
            self.current_offset = 0;
            return Ok(Vec::new());
        }

        // SAFETY: the segment is owned by this process; nothing truncates it while mapped.
        let mmap = unsafe { Mmap::map(&self.file)? };

        let mut records = Vec::new();
        let mut offset = 0usize;
        let mut torn = false;

        while offset < mmap.len() {
            if mmap.len() - offset < LEN_PREFIX {
                torn = true;
                break;
            }
            let mut len_buf = [0u8; LEN_PREFIX];
            len_buf.copy_from_slice(&mmap[offset..offset + LEN_PREFIX]);
            let frame_len = u32::from_le_bytes(len_buf) as usize;
            if frame_len > MAX_FRAME_BYTES {
                return Err(StoreError::Corrupt {
                    offset: offset as u64,
                    reason: format!("frame length {} exceeds {} byte limit", frame_len, MAX_FRAME_BYTES),
                });
            }

            let body_start = offset + LEN_PREFIX;
            let body_end = body_start + frame_len;
            if body_end > mmap.len() {
                torn = true;
                break;
            }

            // rkyv needs an aligned buffer; mapped frames start at arbitrary offsets
            let mut aligned = AlignedVec::with_capacity(frame_len);
            aligned.extend_from_slice(&mmap[body_start..body_end]);

            let archived = rkyv::check_archived_root::<ImageRecord>(&aligned).map_err(|e| {
                StoreError::Corrupt { offset: offset as u64, reason: e.to_string() }
            })?;
            let record: ImageRecord = archived
                .deserialize(&mut rkyv::Infallible)
                .unwrap_or_else(|never| match never {});
            records.push((offset as u64, record));

            offset = body_end;
        }
        drop(mmap);

        if torn {
            warn!(
                path = %self.file_path.display(),
                valid_bytes = offset,
                dropped_bytes = len - offset as u64,
                "truncating torn log tail"
            );
            self.file.set_len(offset as u64)?;
            if self.strict {
                self.file.sync_data()?;
            }
        }
        self.current_offset = offset as u64;

        debug!(records = records.len(), bytes = self.current_offset, "segment replayed");
        Ok(records)
    }

    /// Appends one record; returns the frame's offset.
    ///
    /// On failure the file is cut back to its previous length so no partial
    /// frame survives.
    pub fn append(&mut self, record: &ImageRecord) -> io::Result<u64> {
        let bytes = rkyv::to_bytes::<_, 4096>(record)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;

        if bytes.len() > MAX_FRAME_BYTES {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("record archive of {} bytes exceeds frame limit", bytes.len()),
            ));
        }
        let len = bytes.len() as u32;

        let mut frame = Vec::with_capacity(LEN_PREFIX + bytes.len());
        frame.extend_from_slice(&len.to_le_bytes());
        frame.extend_from_slice(&bytes);

        let start = self.current_offset;
        if let Err(e) = self.write_at(start, &frame) {
            if let Err(rollback) = self.file.set_len(start) {
                warn!(error = %rollback, offset = start, "failed to roll back partial frame");
            }
            return Err(e);
        }

        self.current_offset += frame.len() as u64;
        Ok(start)
    }

    fn write_at(&mut self, offset: u64, frame: &[u8]) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(frame)?;
        if self.strict {
            self.file.sync_data()?;
        }
        Ok(())
    }

    /// Atomically replaces the log with an empty one.
    ///
    /// An empty sibling file is written and renamed over the live log; until
    /// the rename succeeds the old contents stay intact.
    pub fn reset(&mut self) -> io::Result<()> {
        let tmp_path = self.file_path.with_extension("clearing");
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;
        if self.strict {
            file.sync_all()?;
        }

        if let Err(e) = fs::rename(&tmp_path, &self.file_path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(e);
        }

        self.file = file;
        self.current_offset = 0;
        Ok(())
    }
}
