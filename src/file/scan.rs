//! Sequential scans
//!
//! `RecordScanner` walks every record of a data file (compaction);
//! `HintReader` walks every hint of a hint file (recovery). Both skip
//! zero-length sentinels and treat a torn tail as `Format`.

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use crate::codec::{self, HintHeader, HEADER_SIZE, HINT_HEADER_SIZE};
use crate::error::{CaskError, Result};
use crate::keydir::IndexEntry;

use super::FileId;

/// One checksum-verified record found by a scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedRecord {
    pub timestamp: u32,
    pub key: Vec<u8>,
    /// `None` for tombstones
    pub value: Option<Vec<u8>>,
    /// Offset of the value bytes in the data file
    pub value_offset: u64,
}

impl ScannedRecord {
    /// Index entry this record would have if it were the newest for its key
    ///
    /// Tombstones have no entry.
    pub fn index_entry(&self, file_id: FileId) -> Option<IndexEntry> {
        self.value.as_ref().map(|value| IndexEntry {
            file_id,
            value_offset: self.value_offset,
            value_len: value.len() as u32,
            timestamp: self.timestamp,
        })
    }
}

/// Iterator over the records of one data file
pub struct RecordScanner {
    reader: BufReader<File>,
    file_id: FileId,
    /// File length at open; records never extend past it
    len: u64,
    /// Offset of the next record
    position: u64,
    done: bool,
}

impl RecordScanner {
    /// Open the data file at `path` for a front-to-back scan
    pub fn open(path: &Path, file_id: FileId) -> Result<Self> {
        let file = File::open(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => CaskError::FileNotFound(file_id),
            _ => CaskError::Io(e),
        })?;
        let len = file.metadata()?.len();
        Ok(Self {
            reader: BufReader::new(file),
            file_id,
            len,
            position: 0,
            done: false,
        })
    }

    pub fn file_id(&self) -> FileId {
        self.file_id
    }

    /// Bytes consumed so far
    pub fn position(&self) -> u64 {
        self.position
    }

    fn next_record(&mut self) -> Result<Option<ScannedRecord>> {
        loop {
            let mut header_buf = [0u8; HEADER_SIZE];
            let n = read_full(&mut self.reader, &mut header_buf)?;
            if n == 0 {
                return Ok(None);
            }
            if n < HEADER_SIZE {
                return Err(CaskError::Format(format!(
                    "Data file {}: torn record header at offset {}",
                    self.file_id, self.position
                )));
            }

            let header = codec::decode_record_header(&header_buf)?;
            let record_start = self.position;
            if record_start + header.record_len() > self.len {
                return Err(CaskError::Format(format!(
                    "Data file {}: record at offset {} runs past the end of the file",
                    self.file_id, record_start
                )));
            }
            let body_len = header.body_len() as usize;

            let mut record = Vec::with_capacity(HEADER_SIZE + body_len);
            record.extend_from_slice(&header_buf);
            record.resize(HEADER_SIZE + body_len, 0);
            if read_full(&mut self.reader, &mut record[HEADER_SIZE..])? < body_len {
                return Err(CaskError::Format(format!(
                    "Data file {}: torn record body at offset {}",
                    self.file_id, record_start
                )));
            }
            self.position += record.len() as u64;

            if header.is_sentinel() {
                continue;
            }

            let decoded = codec::decode_record(&record)?;
            return Ok(Some(ScannedRecord {
                timestamp: decoded.timestamp,
                value_offset: record_start + (HEADER_SIZE as u64) + header.key_len as u64,
                key: decoded.key,
                value: decoded.value,
            }));
        }
    }
}

impl Iterator for RecordScanner {
    type Item = Result<ScannedRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// One hint found by a scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HintRecord {
    pub header: HintHeader,
    pub key: Vec<u8>,
}

/// Iterator over the hints of one hint file
pub struct HintReader {
    reader: BufReader<File>,
    file_id: FileId,
    len: u64,
    position: u64,
    done: bool,
}

impl HintReader {
    /// Open the hint file at `path`
    pub fn open(path: &Path, file_id: FileId) -> Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        Ok(Self {
            reader: BufReader::new(file),
            file_id,
            len,
            position: 0,
            done: false,
        })
    }

    fn next_hint(&mut self) -> Result<Option<HintRecord>> {
        loop {
            let mut header_buf = [0u8; HINT_HEADER_SIZE];
            let n = read_full(&mut self.reader, &mut header_buf)?;
            if n == 0 {
                return Ok(None);
            }
            if n < HINT_HEADER_SIZE {
                return Err(CaskError::Format(format!(
                    "Hint file {}: torn hint header at offset {}",
                    self.file_id, self.position
                )));
            }

            let header = codec::decode_hint(&header_buf)?;
            let hint_len = (HINT_HEADER_SIZE as u64) + header.key_len as u64;
            if self.position + hint_len > self.len {
                return Err(CaskError::Format(format!(
                    "Hint file {}: torn key at offset {}",
                    self.file_id, self.position
                )));
            }
            let mut key = vec![0u8; header.key_len as usize];
            if read_full(&mut self.reader, &mut key)? < key.len() {
                return Err(CaskError::Format(format!(
                    "Hint file {}: torn key at offset {}",
                    self.file_id, self.position
                )));
            }
            self.position += (HINT_HEADER_SIZE + key.len()) as u64;

            if header.is_sentinel() {
                continue;
            }
            return Ok(Some(HintRecord { header, key }));
        }
    }
}

impl Iterator for HintReader {
    type Item = Result<HintRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_hint() {
            Ok(Some(hint)) => Some(Ok(hint)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Fill `buf` as far as the stream allows; returns bytes read (short only at EOF)
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncStrategy;
    use crate::file::AppendFile;
    use std::fs::OpenOptions;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_scan_records_and_tombstones() {
        let temp = TempDir::new().unwrap();
        let mut file = AppendFile::create(temp.path(), 1, SyncStrategy::OnRotate).unwrap();
        let a = file.write(b"a", b"1").unwrap();
        file.mark_deleted(b"a").unwrap();
        let b = file.write(b"b", b"22").unwrap();
        file.sync().unwrap();

        let records: Vec<ScannedRecord> = RecordScanner::open(file.data_path(), 1)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();

        assert_eq!(records.len(), 3);
        assert_eq!(records[0].index_entry(1), Some(a));
        assert_eq!(records[1].key, b"a");
        assert_eq!(records[1].value, None);
        assert_eq!(records[1].index_entry(1), None);
        assert_eq!(records[2].index_entry(1), Some(b));
    }

    #[test]
    fn test_scan_skips_sentinel() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("1.data");
        let mut raw = codec::encode_record(1, b"", b"");
        raw.extend(codec::encode_record(2, b"k", b"v"));
        std::fs::write(&path, &raw).unwrap();

        let records: Vec<ScannedRecord> = RecordScanner::open(&path, 1)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].key, b"k");
        assert_eq!(records[0].value_offset, (2 * HEADER_SIZE + 1) as u64);
    }

    #[test]
    fn test_scan_torn_tail() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("1.data");
        let raw = codec::encode_record(1, b"key", b"value");
        std::fs::write(&path, &raw[..raw.len() - 2]).unwrap();

        let mut scanner = RecordScanner::open(&path, 1).unwrap();
        assert!(matches!(scanner.next(), Some(Err(CaskError::Format(_)))));
        assert!(scanner.next().is_none());
    }

    #[test]
    fn test_hint_reader() {
        let temp = TempDir::new().unwrap();
        let mut file = AppendFile::create(temp.path(), 1, SyncStrategy::OnRotate).unwrap();
        file.write(b"a", b"1").unwrap();
        file.mark_deleted(b"a").unwrap();
        file.sync().unwrap();

        let hints: Vec<HintRecord> = HintReader::open(file.hint_path(), 1)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(hints.len(), 2);
        assert!(!hints[0].header.is_tombstone());
        assert!(hints[1].header.is_tombstone());
        assert_eq!(hints[1].key, b"a");
    }

    #[test]
    fn test_hint_reader_torn_key() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("1.hint");
        let mut hint = OpenOptions::new().create(true).write(true).open(&path).unwrap();
        let raw = codec::encode_hint(1, 1, 20, b"abcdef");
        hint.write_all(&raw[..raw.len() - 3]).unwrap();

        let mut reader = HintReader::open(&path, 1).unwrap();
        assert!(matches!(reader.next(), Some(Err(CaskError::Format(_)))));
    }
}
