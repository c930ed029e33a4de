//! Append-only blob files.
//!
//! Every shard-owned file in the working directory is a concatenation of
//! length-prefixed records: a little-endian `u32` payload length followed by
//! the payload bytes. The framing is self-delimiting and append-safe: a
//! reader that catches another shard mid-append sees a truncated tail and
//! treats it as end-of-file rather than corruption, which is what makes the
//! cross-shard synchronization protocol safe without any locking.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, ErrorKind, Read, Write};
use std::path::Path;

use bincode::config::Configuration;
use bincode::{Decode, Encode};
use thiserror::Error;

use crate::feature::FeatureVec;
use crate::ByteArray;

/// Errors from blob file I/O and record packing.
#[derive(Error, Debug)]
pub enum BlobError {
    #[error("blob I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("blob encoding error: {0}")]
    Encode(String),

    #[error("blob decoding error: {0}")]
    Decode(String),
}

impl From<bincode::error::EncodeError> for BlobError {
    fn from(err: bincode::error::EncodeError) -> Self {
        BlobError::Encode(err.to_string())
    }
}

impl From<bincode::error::DecodeError> for BlobError {
    fn from(err: bincode::error::DecodeError) -> Self {
        BlobError::Decode(err.to_string())
    }
}

fn bincode_config() -> Configuration<
    bincode::config::LittleEndian,
    bincode::config::Fixint,
    bincode::config::NoLimit,
> {
    bincode::config::standard()
        .with_little_endian()
        .with_fixed_int_encoding()
}

/// Appends length-prefixed records to a blob file, creating it on first use.
#[derive(Debug)]
pub struct BlobFileWriter {
    file: File,
}

impl BlobFileWriter {
    /// Opens `path` for appending, creating it if needed.
    pub fn open_append(path: &Path) -> Result<Self, BlobError> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { file })
    }

    /// Creates `path` fresh, truncating any previous contents. For files that
    /// are rewritten wholesale (distilled corpora), not for shard files.
    pub fn create(path: &Path) -> Result<Self, BlobError> {
        Ok(Self {
            file: File::create(path)?,
        })
    }

    /// Appends one record. The frame is assembled in memory first so the
    /// record lands in the file as a single write.
    pub fn write_blob(&mut self, payload: &[u8]) -> Result<(), BlobError> {
        let mut frame = Vec::with_capacity(4 + payload.len());
        frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        frame.extend_from_slice(payload);
        self.file.write_all(&frame)?;
        Ok(())
    }
}

/// Reads length-prefixed records back out of a blob file.
#[derive(Debug)]
pub struct BlobFileReader {
    reader: BufReader<File>,
}

impl BlobFileReader {
    /// Opens `path` for reading. Callers loading optional peer files are
    /// expected to treat a `NotFound` error as "nothing there yet".
    pub fn open(path: &Path) -> Result<Self, BlobError> {
        Ok(Self {
            reader: BufReader::new(File::open(path)?),
        })
    }

    /// Returns the next record, or `None` at end-of-file. A partial frame at
    /// the tail of the file (an append in progress elsewhere) also reads as
    /// `None`.
    pub fn read_blob(&mut self) -> Result<Option<ByteArray>, BlobError> {
        let mut length_bytes = [0u8; 4];
        match read_exact_or_eof(&mut self.reader, &mut length_bytes)? {
            ReadOutcome::Complete => {}
            ReadOutcome::Truncated => return Ok(None),
        }
        let length = u32::from_le_bytes(length_bytes) as usize;
        let mut payload = vec![0u8; length];
        match read_exact_or_eof(&mut self.reader, &mut payload)? {
            ReadOutcome::Complete => Ok(Some(payload)),
            ReadOutcome::Truncated => Ok(None),
        }
    }

    /// Drains the file into a vector of records.
    pub fn read_all(&mut self) -> Result<Vec<ByteArray>, BlobError> {
        let mut blobs = Vec::new();
        while let Some(blob) = self.read_blob()? {
            blobs.push(blob);
        }
        Ok(blobs)
    }
}

enum ReadOutcome {
    Complete,
    Truncated,
}

fn read_exact_or_eof(reader: &mut impl Read, buf: &mut [u8]) -> Result<ReadOutcome, BlobError> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => return Ok(ReadOutcome::Truncated),
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(ReadOutcome::Complete)
}

/// The payload stored in a shard's features file: the features of one input
/// plus the input's hash, used to re-associate features with corpus records
/// when a shard is loaded.
#[derive(Encode, Decode, Debug, Clone, PartialEq, Eq)]
pub struct FeaturesRecord {
    pub input_hash: [u8; 16],
    pub features: FeatureVec,
}

impl FeaturesRecord {
    /// Builds the record for `input`, hashing it for later re-association.
    pub fn for_input(input: &[u8], features: FeatureVec) -> Self {
        Self {
            input_hash: input_hash(input),
            features,
        }
    }

    pub fn pack(&self) -> Result<ByteArray, BlobError> {
        Ok(bincode::encode_to_vec(self, bincode_config())?)
    }

    pub fn unpack(payload: &[u8]) -> Result<Self, BlobError> {
        let (record, _) = bincode::decode_from_slice(payload, bincode_config())?;
        Ok(record)
    }
}

/// The 16-byte identity hash of an input.
pub fn input_hash(input: &[u8]) -> [u8; 16] {
    md5::compute(input).0
}

/// The hex rendering of an input's identity hash, used for file names.
pub fn input_hash_hex(input: &[u8]) -> String {
    format!("{:x}", md5::compute(input))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn blobs_round_trip_through_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blobs");

        let payloads: Vec<ByteArray> = vec![vec![1, 2, 3], vec![], vec![0xFF; 300]];
        {
            let mut writer = BlobFileWriter::open_append(&path).unwrap();
            for payload in &payloads {
                writer.write_blob(payload).unwrap();
            }
        }
        // A second writer appends rather than truncating.
        {
            let mut writer = BlobFileWriter::open_append(&path).unwrap();
            writer.write_blob(&[42]).unwrap();
        }

        let mut reader = BlobFileReader::open(&path).unwrap();
        let mut read_back = payloads.clone();
        read_back.push(vec![42]);
        assert_eq!(reader.read_all().unwrap(), read_back);
    }

    #[test]
    fn truncated_tails_read_as_end_of_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blobs");
        {
            let mut writer = BlobFileWriter::open_append(&path).unwrap();
            writer.write_blob(&[1, 2, 3]).unwrap();
            writer.write_blob(&[4, 5, 6, 7]).unwrap();
        }

        let full = fs::read(&path).unwrap();
        // Cut the file inside the second record's payload, and also inside
        // its length prefix; both must yield exactly the first record.
        for cut in [full.len() - 2, 7 + 2] {
            fs::write(&path, &full[..cut]).unwrap();
            let mut reader = BlobFileReader::open(&path).unwrap();
            assert_eq!(reader.read_blob().unwrap(), Some(vec![1, 2, 3]));
            assert_eq!(reader.read_blob().unwrap(), None);
        }
    }

    #[test]
    fn missing_files_surface_as_io_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("not-there");
        assert!(matches!(
            BlobFileReader::open(&missing),
            Err(BlobError::Io(e)) if e.kind() == ErrorKind::NotFound
        ));
    }

    #[test]
    fn features_records_pack_and_unpack() {
        let record = FeaturesRecord::for_input(b"some input", vec![10, 20, 1 << 40]);
        let packed = record.pack().unwrap();
        let unpacked = FeaturesRecord::unpack(&packed).unwrap();
        assert_eq!(unpacked, record);
        assert_eq!(unpacked.input_hash, input_hash(b"some input"));

        // Garbage payloads fail cleanly instead of panicking.
        assert!(FeaturesRecord::unpack(&[1, 2]).is_err());
    }
}
