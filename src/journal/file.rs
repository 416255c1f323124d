//! File-backed journal.
//!
//! Two files under one directory:
//!
//! - `progress` — a fixed 64-byte record (magic, version, fields, crc32c),
//!   replaced atomically via write-tmp, fsync, rename, fsync-dir.
//! - `accepts.log` — an append-only sequence of length-prefixed,
//!   crc32c-guarded bincode frames, one accept per frame. A slot accepted
//!   again under a higher ballot appends a superseding frame; the in-memory
//!   slot index keeps the last frame per slot.
//!
//! Recovery is deterministic: on open the log is scanned front to back and
//! truncated at the first frame that fails its length, checksum or decode
//! test. A torn multi-accept batch therefore recovers to a prefix of the
//! batch, which is exactly the crash contract the core relies on.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::paxos::ballot::{BallotNumber, Identifier, SlotIndex};
use crate::paxos::data::{Accept, Progress};

use super::{Journal, JournalBounds, JournalError};

/// Progress record magic: "TPRG".
const PROGRESS_MAGIC: [u8; 4] = [0x54, 0x50, 0x52, 0x47];

/// Progress record format version.
const PROGRESS_VERSION: u32 = 1;

/// Progress record size: one sector-atomic block.
const PROGRESS_SIZE: usize = 64;

/// Accept frame header: payload length then payload crc32c.
const FRAME_HEADER_SIZE: usize = 8;

/// Frames larger than this fail the scan; a length field this big is
/// corruption, not data.
const MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;

fn encode_progress(progress: &Progress) -> [u8; PROGRESS_SIZE] {
    let mut bytes = [0u8; PROGRESS_SIZE];
    bytes[0..4].copy_from_slice(&PROGRESS_MAGIC);
    bytes[4..8].copy_from_slice(&PROGRESS_VERSION.to_le_bytes());
    bytes[8..12].copy_from_slice(&progress.highest_promised.counter.to_le_bytes());
    bytes[12..16].copy_from_slice(&progress.highest_promised.node.to_le_bytes());
    bytes[16..20].copy_from_slice(&progress.highest_committed.from.to_le_bytes());
    bytes[20..24].copy_from_slice(&progress.highest_committed.number.counter.to_le_bytes());
    bytes[24..28].copy_from_slice(&progress.highest_committed.number.node.to_le_bytes());
    bytes[28..36].copy_from_slice(&progress.highest_committed.slot.to_le_bytes());
    // reserved [36..56]
    let checksum = crc32c::crc32c(&bytes[0..56]);
    bytes[56..60].copy_from_slice(&checksum.to_le_bytes());
    bytes
}

fn decode_progress(bytes: &[u8; PROGRESS_SIZE]) -> Option<Progress> {
    if bytes[0..4] != PROGRESS_MAGIC {
        return None;
    }
    let version = u32::from_le_bytes(bytes[4..8].try_into().ok()?);
    if version != PROGRESS_VERSION {
        return None;
    }
    let stored = u32::from_le_bytes(bytes[56..60].try_into().ok()?);
    if stored != crc32c::crc32c(&bytes[0..56]) {
        return None;
    }
    let promised = BallotNumber::new(
        i32::from_le_bytes(bytes[8..12].try_into().ok()?),
        u32::from_le_bytes(bytes[12..16].try_into().ok()?),
    );
    let committed = Identifier::new(
        u32::from_le_bytes(bytes[16..20].try_into().ok()?),
        BallotNumber::new(
            i32::from_le_bytes(bytes[20..24].try_into().ok()?),
            u32::from_le_bytes(bytes[24..28].try_into().ok()?),
        ),
        i64::from_le_bytes(bytes[28..36].try_into().ok()?),
    );
    Some(Progress::new(promised, committed))
}

/// Durable journal rooted at a directory.
#[derive(Debug)]
pub struct FileJournal {
    dir: PathBuf,
    progress_path: PathBuf,
    log: File,
    index: BTreeMap<SlotIndex, Accept>,
    progress: Progress,
}

impl FileJournal {
    /// Open or create a journal under `dir`.
    ///
    /// Scans the accept log, truncating a torn tail, and loads or
    /// initializes the progress record.
    pub fn open(dir: &Path) -> Result<Self, JournalError> {
        fs::create_dir_all(dir)?;
        let progress_path = dir.join("progress");
        let log_path = dir.join("accepts.log");

        let progress = if progress_path.exists() {
            let mut bytes = [0u8; PROGRESS_SIZE];
            File::open(&progress_path)?.read_exact(&mut bytes)?;
            decode_progress(&bytes).ok_or(JournalError::CorruptProgress)?
        } else {
            let progress = Progress::default();
            write_progress_atomic(dir, &progress_path, &progress)?;
            progress
        };

        let mut log = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&log_path)?;
        let (index, valid_len) = scan_log(&mut log)?;
        let file_len = log.metadata()?.len();
        if valid_len < file_len {
            warn!(
                truncated_at = valid_len,
                file_len, "truncating torn tail of accept log"
            );
            log.set_len(valid_len)?;
            log.sync_data()?;
        }
        log.seek(SeekFrom::End(0))?;

        Ok(FileJournal {
            dir: dir.to_path_buf(),
            progress_path,
            log,
            index,
            progress,
        })
    }
}

/// Scan the accept log, returning the slot index and the byte length of the
/// valid prefix. Stops at the first frame that fails length, checksum or
/// decode.
fn scan_log(log: &mut File) -> Result<(BTreeMap<SlotIndex, Accept>, u64), JournalError> {
    let mut bytes = Vec::new();
    log.seek(SeekFrom::Start(0))?;
    log.read_to_end(&mut bytes)?;

    let mut index = BTreeMap::new();
    let mut offset = 0usize;
    while bytes.len() - offset >= FRAME_HEADER_SIZE {
        let len = u32::from_le_bytes([
            bytes[offset],
            bytes[offset + 1],
            bytes[offset + 2],
            bytes[offset + 3],
        ]);
        let checksum = u32::from_le_bytes([
            bytes[offset + 4],
            bytes[offset + 5],
            bytes[offset + 6],
            bytes[offset + 7],
        ]);
        if len == 0 || len > MAX_FRAME_SIZE {
            break;
        }
        let start = offset + FRAME_HEADER_SIZE;
        let end = start + len as usize;
        if end > bytes.len() {
            break;
        }
        let payload = &bytes[start..end];
        if crc32c::crc32c(payload) != checksum {
            break;
        }
        let accept: Accept = match bincode::deserialize(payload) {
            Ok(accept) => accept,
            Err(_) => break,
        };
        index.insert(accept.id.slot, accept);
        offset = end;
    }
    Ok((index, offset as u64))
}

fn write_progress_atomic(
    dir: &Path,
    path: &Path,
    progress: &Progress,
) -> Result<(), JournalError> {
    let tmp_path = path.with_extension("tmp");
    {
        let mut tmp = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;
        tmp.write_all(&encode_progress(progress))?;
        tmp.sync_data()?;
    }
    fs::rename(&tmp_path, path)?;
    File::open(dir)?.sync_all()?;
    Ok(())
}

impl Journal for FileJournal {
    fn load_progress(&mut self) -> Result<Progress, JournalError> {
        Ok(self.progress)
    }

    fn save_progress(&mut self, progress: &Progress) -> Result<(), JournalError> {
        write_progress_atomic(&self.dir, &self.progress_path, progress)?;
        self.progress = *progress;
        Ok(())
    }

    fn accept(&mut self, accepts: &[Accept]) -> Result<(), JournalError> {
        if accepts.is_empty() {
            return Ok(());
        }
        let mut buffer = Vec::new();
        for accept in accepts {
            let payload = bincode::serialize(accept)?;
            buffer.extend_from_slice(&(payload.len() as u32).to_le_bytes());
            buffer.extend_from_slice(&crc32c::crc32c(&payload).to_le_bytes());
            buffer.extend_from_slice(&payload);
        }
        self.log.write_all(&buffer)?;
        self.log.sync_data()?;
        for accept in accepts {
            self.index.insert(accept.id.slot, accept.clone());
        }
        Ok(())
    }

    fn accepted(&self, slot: SlotIndex) -> Result<Option<Accept>, JournalError> {
        Ok(self.index.get(&slot).cloned())
    }

    fn bounds(&self) -> Result<JournalBounds, JournalError> {
        let min = self.index.keys().next().copied().unwrap_or(0);
        let max = self.index.keys().next_back().copied().unwrap_or(0);
        Ok(JournalBounds { min, max })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paxos::data::Value;

    fn accept(slot: SlotIndex, counter: i32) -> Accept {
        Accept::new(
            Identifier::new(1, BallotNumber::new(counter, 1), slot),
            Value::ClientCommand {
                msg_id: slot as u64,
                bytes: vec![0xAB; 8],
            },
        )
    }

    #[test]
    fn test_progress_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let saved = Progress::new(
            BallotNumber::new(5, 2),
            Identifier::new(2, BallotNumber::new(5, 2), 41),
        );
        {
            let mut journal = FileJournal::open(dir.path()).unwrap();
            assert_eq!(journal.load_progress().unwrap(), Progress::default());
            journal.save_progress(&saved).unwrap();
        }
        let mut journal = FileJournal::open(dir.path()).unwrap();
        assert_eq!(journal.load_progress().unwrap(), saved);
    }

    #[test]
    fn test_accepts_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut journal = FileJournal::open(dir.path()).unwrap();
            journal
                .accept(&[accept(7, 1), accept(8, 1), accept(9, 1)])
                .unwrap();
        }
        let journal = FileJournal::open(dir.path()).unwrap();
        assert_eq!(journal.bounds().unwrap(), JournalBounds { min: 7, max: 9 });
        assert_eq!(journal.accepted(8).unwrap().unwrap(), accept(8, 1));
        assert!(journal.accepted(10).unwrap().is_none());
    }

    #[test]
    fn test_superseding_accept_wins_after_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut journal = FileJournal::open(dir.path()).unwrap();
            journal.accept(&[accept(7, 1)]).unwrap();
            journal.accept(&[accept(7, 3)]).unwrap();
        }
        let journal = FileJournal::open(dir.path()).unwrap();
        assert_eq!(journal.accepted(7).unwrap().unwrap().id.number.counter, 3);
    }

    #[test]
    fn test_torn_tail_is_truncated() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut journal = FileJournal::open(dir.path()).unwrap();
            journal.accept(&[accept(7, 1), accept(8, 1)]).unwrap();
        }
        // Simulate a torn write: garbage after the last valid frame.
        let log_path = dir.path().join("accepts.log");
        let valid_len = fs::metadata(&log_path).unwrap().len();
        let mut file = OpenOptions::new().append(true).open(&log_path).unwrap();
        file.write_all(&[0xFF; 13]).unwrap();
        drop(file);

        let mut journal = FileJournal::open(dir.path()).unwrap();
        assert_eq!(journal.bounds().unwrap(), JournalBounds { min: 7, max: 8 });
        assert_eq!(fs::metadata(&log_path).unwrap().len(), valid_len);

        // The repaired log keeps accepting.
        journal.accept(&[accept(9, 1)]).unwrap();
        let journal = FileJournal::open(dir.path()).unwrap();
        assert_eq!(journal.accepted(9).unwrap().unwrap(), accept(9, 1));
    }

    #[test]
    fn test_corrupt_progress_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut journal = FileJournal::open(dir.path()).unwrap();
            journal.save_progress(&Progress::default()).unwrap();
        }
        let progress_path = dir.path().join("progress");
        let mut bytes = fs::read(&progress_path).unwrap();
        bytes[10] ^= 0xFF;
        fs::write(&progress_path, &bytes).unwrap();

        assert!(matches!(
            FileJournal::open(dir.path()),
            Err(JournalError::CorruptProgress)
        ));
    }
}
