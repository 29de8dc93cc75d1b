//! Checksummed record journal.
//!
//! Frame layout (little endian):
//!
//! ```text
//! | magic "CSJR" (4) | len u32 (4) | crc32 u32 (4) | record bytes (len) |
//! ```
//!
//! Records are appended one frame at a time. On open every frame is
//! validated; the first frame that is short, has a wrong magic or fails its
//! checksum marks the end of the journal and everything from there on is
//! truncated. A crash in the middle of an append therefore loses at most the
//! record that was being written.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use tracing::warn;

/// Magic bytes at the start of every journal frame.
pub const JOURNAL_MAGIC: [u8; 4] = *b"CSJR";

/// Size of the frame header in bytes.
pub const RECORD_HEADER_LEN: usize = 12;

/// An append-only journal of opaque records.
pub struct Journal {
    backend: Box<dyn StorageBackend>,
    sync_on_append: bool,
    record_count: usize,
}

impl Journal {
    /// Opens a journal over `backend`, returning it with every intact record.
    ///
    /// A torn tail is truncated away before the journal is handed back.
    pub fn open(mut backend: Box<dyn StorageBackend>) -> StorageResult<(Self, Vec<Vec<u8>>)> {
        let bytes = backend.read_all()?;
        let (records, valid_len) = scan_frames(&bytes);

        if (valid_len as usize) < bytes.len() {
            warn!(
                "discarding {} trailing bytes of damaged journal {}",
                bytes.len() - valid_len as usize,
                backend.describe()
            );
            backend.truncate(valid_len)?;
            backend.sync()?;
        }

        let journal = Self {
            backend,
            sync_on_append: true,
            record_count: records.len(),
        };
        Ok((journal, records))
    }

    /// Controls whether every append is followed by a durable sync.
    pub fn set_sync_on_append(&mut self, sync: bool) {
        self.sync_on_append = sync;
    }

    /// Appends one record and returns the offset of its frame.
    pub fn append(&mut self, record: &[u8]) -> StorageResult<u64> {
        let frame = encode_frame(record)?;
        let offset = self.backend.append(&frame)?;
        if self.sync_on_append {
            self.backend.sync()?;
        }
        self.record_count += 1;
        Ok(offset)
    }

    /// Replaces the whole journal with `records`.
    ///
    /// The swap is atomic at the backend level, which makes this safe to use
    /// for compaction.
    pub fn rewrite<'a, I>(&mut self, records: I) -> StorageResult<()>
    where
        I: IntoIterator<Item = &'a [u8]>,
    {
        let mut buffer = Vec::new();
        let mut count = 0;
        for record in records {
            buffer.extend_from_slice(&encode_frame(record)?);
            count += 1;
        }
        self.backend.replace(&buffer)?;
        self.record_count = count;
        Ok(())
    }

    /// Forces all appended records to durable storage.
    pub fn sync(&mut self) -> StorageResult<()> {
        self.backend.sync()
    }

    /// Number of records currently in the journal.
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.record_count
    }

    /// Size of the journal in bytes.
    pub fn size(&self) -> StorageResult<u64> {
        self.backend.size()
    }

    /// Description of the underlying backend.
    #[must_use]
    pub fn describe(&self) -> String {
        self.backend.describe()
    }
}

fn encode_frame(record: &[u8]) -> StorageResult<Vec<u8>> {
    let len = u32::try_from(record.len()).map_err(|_| StorageError::RecordTooLarge(record.len()))?;
    let mut frame = Vec::with_capacity(RECORD_HEADER_LEN + record.len());
    frame.extend_from_slice(&JOURNAL_MAGIC);
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(&compute_crc32(record).to_le_bytes());
    frame.extend_from_slice(record);
    Ok(frame)
}

/// Returns the intact records and the length of the valid prefix.
fn scan_frames(bytes: &[u8]) -> (Vec<Vec<u8>>, u64) {
    let mut records = Vec::new();
    let mut offset = 0usize;

    while bytes.len() - offset >= RECORD_HEADER_LEN {
        let header = &bytes[offset..offset + RECORD_HEADER_LEN];
        if header[0..4] != JOURNAL_MAGIC {
            break;
        }
        let len = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;
        let crc = u32::from_le_bytes([header[8], header[9], header[10], header[11]]);

        let start = offset + RECORD_HEADER_LEN;
        let Some(end) = start.checked_add(len).filter(|end| *end <= bytes.len()) else {
            break;
        };
        let record = &bytes[start..end];
        if compute_crc32(record) != crc {
            break;
        }

        records.push(record.to_vec());
        offset = end;
    }

    (records, offset as u64)
}

const CRC32_TABLE: [u32; 256] = {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u32;
        let mut bit = 0;
        while bit < 8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0xEDB8_8320;
            } else {
                crc >>= 1;
            }
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
};

/// Computes the IEEE CRC32 checksum of `data`.
#[must_use]
pub fn compute_crc32(data: &[u8]) -> u32 {
    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[index];
    }
    !crc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryBackend;
    use proptest::prelude::*;

    fn reopen(backend: &InMemoryBackend) -> (Journal, Vec<Vec<u8>>) {
        Journal::open(Box::new(backend.share())).unwrap()
    }

    #[test]
    fn crc32_known_value() {
        assert_eq!(compute_crc32(b"123456789"), 0xCBF4_3926);
        assert_eq!(compute_crc32(b""), 0);
    }

    #[test]
    fn records_survive_reopen() {
        let backend = InMemoryBackend::new();
        {
            let (mut journal, records) = reopen(&backend);
            assert!(records.is_empty());
            journal.append(b"first").unwrap();
            journal.append(b"").unwrap();
            journal.append(b"third").unwrap();
            assert_eq!(journal.record_count(), 3);
        }

        let (journal, records) = reopen(&backend);
        assert_eq!(records, vec![b"first".to_vec(), Vec::new(), b"third".to_vec()]);
        assert_eq!(journal.record_count(), 3);
    }

    #[test]
    fn torn_tail_is_truncated() {
        let backend = InMemoryBackend::new();
        {
            let (mut journal, _) = reopen(&backend);
            journal.append(b"kept").unwrap();
            journal.append(b"torn record").unwrap();
        }
        let full = backend.data();
        let mut writer = backend.share();
        writer.truncate(full.len() as u64 - 3).unwrap();

        let (_, records) = reopen(&backend);
        assert_eq!(records, vec![b"kept".to_vec()]);
        assert_eq!(backend.data().len(), RECORD_HEADER_LEN + 4);
    }

    #[test]
    fn checksum_mismatch_ends_the_journal() {
        let backend = InMemoryBackend::new();
        {
            let (mut journal, _) = reopen(&backend);
            journal.append(b"good").unwrap();
            journal.append(b"flipped").unwrap();
        }
        let mut bytes = backend.data();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        let damaged = InMemoryBackend::with_data(bytes);

        let (mut journal, records) = reopen(&damaged);
        assert_eq!(records, vec![b"good".to_vec()]);

        journal.append(b"after repair").unwrap();
        let (_, records) = reopen(&damaged);
        assert_eq!(records.len(), 2);
        assert_eq!(records[1], b"after repair");
    }

    #[test]
    fn rewrite_replaces_content() {
        let backend = InMemoryBackend::new();
        let (mut journal, _) = reopen(&backend);
        for i in 0..10u8 {
            journal.append(&[i; 8]).unwrap();
        }

        let snapshot: Vec<&[u8]> = vec![b"snapshot-a", b"snapshot-b"];
        journal.rewrite(snapshot).unwrap();
        assert_eq!(journal.record_count(), 2);

        let (_, records) = reopen(&backend);
        assert_eq!(records, vec![b"snapshot-a".to_vec(), b"snapshot-b".to_vec()]);
    }

    proptest! {
        #[test]
        fn any_truncation_keeps_a_prefix(
            records in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..40), 1..8),
            cut in 0usize..400,
        ) {
            let backend = InMemoryBackend::new();
            {
                let (mut journal, _) = reopen(&backend);
                for record in &records {
                    journal.append(record).unwrap();
                }
            }
            let size = backend.data().len();
            let keep = size.saturating_sub(cut % (size + 1));
            backend.share().truncate(keep as u64).unwrap();

            let (_, recovered) = reopen(&backend);
            prop_assert!(recovered.len() <= records.len());
            prop_assert_eq!(&records[..recovered.len()], &recovered[..]);
        }
    }
}
