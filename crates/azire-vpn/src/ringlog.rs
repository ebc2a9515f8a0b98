//! Ring Log
//!
//! Fixed-capacity, file-backed log shared between the client and the
//! tunnel service. Writers append tagged lines; readers follow it with a
//! cursor and only ever see each line once.
//!
//! # File layout
//!
//! ```text
//! header (16 bytes)   magic: u32 | reserved: u32 | next_seq: u64
//! slot[0..2048]       seq+1: u64 | time_ns: i64  | text: [u8; 496]
//! ```
//!
//! Line `seq` lives in slot `seq % 2048`. A slot whose stored sequence does
//! not match the one expected has been overwritten and is skipped.
//! All integers are little-endian.

use chrono::{DateTime, Utc};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::{debug, warn};

/// Number of slots in the ring
pub const MAX_LINES: u64 = 2048;

const MAGIC: u32 = 0x0bad_babe;
const HEADER_LEN: u64 = 16;
const SLOT_LEN: u64 = 512;
const TEXT_LEN: usize = SLOT_LEN as usize - 16;

/// Ring log errors
#[derive(Debug, Error)]
pub enum RingLogError {
    #[error("Ring log I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("{0} is not a ring log")]
    BadMagic(PathBuf),
}

/// Position in the ring log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogCursor {
    /// Everything still retained
    All,
    /// Only lines written from here on
    Now,
    /// The next line to read has this sequence number
    At(u64),
}

/// Anything the log tailer can follow
pub trait LogSource: Send + Sync {
    /// Return the lines after `cursor` and the cursor to use next time
    fn follow(&self, cursor: LogCursor) -> Result<(LogCursor, Vec<String>), RingLogError>;
}

/// File-backed ring log
#[derive(Debug)]
pub struct RingLogger {
    path: PathBuf,
    tag: String,
    file: Mutex<File>,
}

impl RingLogger {
    /// Create a fresh, empty log at `path`, discarding any previous one.
    ///
    /// Lines written through this handle are prefixed with `[tag]`.
    pub fn create(path: impl AsRef<Path>, tag: &str) -> Result<Self, RingLogError> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;

        file.set_len(HEADER_LEN + MAX_LINES * SLOT_LEN)?;
        let mut header = [0u8; HEADER_LEN as usize];
        header[..4].copy_from_slice(&MAGIC.to_le_bytes());
        file.write_all(&header)?;

        debug!("Created ring log at {}", path.display());
        Ok(Self {
            path,
            tag: tag.to_string(),
            file: Mutex::new(file),
        })
    }

    /// Open an existing log, e.g. one owned by the tunnel service
    pub fn open(path: impl AsRef<Path>, tag: &str) -> Result<Self, RingLogError> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new().read(true).write(true).open(&path)?;

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if u32::from_le_bytes(magic) != MAGIC {
            return Err(RingLogError::BadMagic(path));
        }

        Ok(Self {
            path,
            tag: tag.to_string(),
            file: Mutex::new(file),
        })
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one line, overwriting the oldest once the ring is full
    pub fn write(&self, text: &str) -> Result<(), RingLogError> {
        let line = format!("[{}] {}", self.tag, text);
        let now_ns = Utc::now().timestamp_nanos_opt().unwrap_or_default();

        let mut file = self.lock();
        let seq = read_next_seq(&mut file)?;

        let mut slot = [0u8; SLOT_LEN as usize];
        slot[..8].copy_from_slice(&(seq + 1).to_le_bytes());
        slot[8..16].copy_from_slice(&now_ns.to_le_bytes());
        let text = truncate_utf8(&line, TEXT_LEN);
        slot[16..16 + text.len()].copy_from_slice(text.as_bytes());

        file.seek(SeekFrom::Start(slot_offset(seq)))?;
        file.write_all(&slot)?;
        file.seek(SeekFrom::Start(8))?;
        file.write_all(&(seq + 1).to_le_bytes())?;
        Ok(())
    }

    /// Read every retained line after `cursor`.
    ///
    /// A cursor that fell behind the ring resumes at the oldest retained
    /// line instead of failing.
    pub fn follow_from_cursor(&self, cursor: LogCursor) -> Result<(LogCursor, Vec<String>), RingLogError> {
        let mut file = self.lock();
        let next = read_next_seq(&mut file)?;
        let oldest = next.saturating_sub(MAX_LINES);

        let start = match cursor {
            LogCursor::All => oldest,
            LogCursor::Now => next,
            LogCursor::At(c) if c < oldest => {
                warn!("Log reader fell behind, skipped {} lines", oldest - c);
                oldest
            }
            LogCursor::At(c) => c.min(next),
        };

        let mut lines = Vec::with_capacity((next - start) as usize);
        let mut slot = [0u8; SLOT_LEN as usize];
        for seq in start..next {
            file.seek(SeekFrom::Start(slot_offset(seq)))?;
            file.read_exact(&mut slot)?;

            let stored = u64::from_le_bytes(slot[..8].try_into().unwrap_or_default());
            if stored != seq + 1 {
                // Overwritten by a writer in another process since we read the header
                continue;
            }
            let time_ns = i64::from_le_bytes(slot[8..16].try_into().unwrap_or_default());
            let text = &slot[16..];
            let end = text.iter().position(|&b| b == 0).unwrap_or(text.len());
            lines.push(format!(
                "{}: {}",
                format_timestamp(time_ns),
                String::from_utf8_lossy(&text[..end])
            ));
        }

        Ok((LogCursor::At(next), lines))
    }

    fn lock(&self) -> MutexGuard<'_, File> {
        self.file.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl LogSource for RingLogger {
    fn follow(&self, cursor: LogCursor) -> Result<(LogCursor, Vec<String>), RingLogError> {
        self.follow_from_cursor(cursor)
    }
}

fn read_next_seq(file: &mut File) -> io::Result<u64> {
    let mut buf = [0u8; 8];
    file.seek(SeekFrom::Start(8))?;
    file.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

fn slot_offset(seq: u64) -> u64 {
    HEADER_LEN + (seq % MAX_LINES) * SLOT_LEN
}

fn truncate_utf8(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

fn format_timestamp(time_ns: i64) -> String {
    DateTime::<Utc>::from_timestamp_nanos(time_ns)
        .format("%Y-%m-%d %H:%M:%S%.6f")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_of(line: &str) -> &str {
        line.split_once(": ").map(|(_, t)| t).unwrap_or(line)
    }

    #[test]
    fn test_follow_all_then_incremental() {
        let dir = tempfile::tempdir().unwrap();
        let log = RingLogger::create(dir.path().join("log.bin"), "GUI").unwrap();

        log.write("one").unwrap();
        log.write("two").unwrap();

        let (cursor, lines) = log.follow_from_cursor(LogCursor::All).unwrap();
        assert_eq!(lines.iter().map(|l| text_of(l)).collect::<Vec<_>>(), ["[GUI] one", "[GUI] two"]);
        assert_eq!(cursor, LogCursor::At(2));

        let (cursor, lines) = log.follow_from_cursor(cursor).unwrap();
        assert!(lines.is_empty());

        log.write("three").unwrap();
        let (_, lines) = log.follow_from_cursor(cursor).unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(text_of(&lines[0]), "[GUI] three");
    }

    #[test]
    fn test_follow_now_skips_history() {
        let dir = tempfile::tempdir().unwrap();
        let log = RingLogger::create(dir.path().join("log.bin"), "GUI").unwrap();
        log.write("old").unwrap();

        let (cursor, lines) = log.follow_from_cursor(LogCursor::Now).unwrap();
        assert!(lines.is_empty());

        log.write("new").unwrap();
        let (_, lines) = log.follow_from_cursor(cursor).unwrap();
        assert_eq!(text_of(&lines[0]), "[GUI] new");
    }

    #[test]
    fn test_gap_resumes_at_oldest() {
        let dir = tempfile::tempdir().unwrap();
        let log = RingLogger::create(dir.path().join("log.bin"), "T").unwrap();

        let (cursor, _) = log.follow_from_cursor(LogCursor::All).unwrap();
        let total = MAX_LINES + 10;
        for i in 0..total {
            log.write(&format!("line {}", i)).unwrap();
        }

        let (next, lines) = log.follow_from_cursor(cursor).unwrap();
        assert_eq!(lines.len() as u64, MAX_LINES);
        assert_eq!(text_of(&lines[0]), "[T] line 10");
        assert_eq!(text_of(lines.last().unwrap()), format!("[T] line {}", total - 1));
        assert_eq!(next, LogCursor::At(total));
    }

    #[test]
    fn test_long_line_truncated_on_char_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let log = RingLogger::create(dir.path().join("log.bin"), "GUI").unwrap();

        log.write(&"é".repeat(400)).unwrap();
        let (_, lines) = log.follow_from_cursor(LogCursor::All).unwrap();
        assert!(text_of(&lines[0]).len() <= TEXT_LEN);
        assert!(!lines[0].contains('\u{fffd}'));
    }

    #[test]
    fn test_open_existing_shares_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.bin");
        let gui = RingLogger::create(&path, "GUI").unwrap();
        let service = RingLogger::open(&path, "TUN").unwrap();

        gui.write("from gui").unwrap();
        service.write("from service").unwrap();

        let (_, lines) = gui.follow_from_cursor(LogCursor::All).unwrap();
        assert_eq!(text_of(&lines[1]), "[TUN] from service");
    }

    #[test]
    fn test_open_rejects_foreign_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("not-a-log");
        std::fs::write(&path, b"hello world, definitely not a ring").unwrap();

        assert!(matches!(RingLogger::open(&path, "X"), Err(RingLogError::BadMagic(_))));
    }
}
