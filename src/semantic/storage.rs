//! `vectors.bin`: the on-disk form of the keyword embedding store.
//!
//! ```text
//! header   47 bytes
//!   0      u8        format version
//!   1..33  [u8; 32]  sha256 of the model name
//!   33..35 u16 LE    vector dimensions
//!   35..43 u64 LE    entry count
//!   43..47 u32 LE    crc32 of bytes 0..43
//! entry    repeated `entry count` times
//!          u32 LE    keyword byte length
//!          [u8]      keyword, utf-8
//!          i64 LE    created_at, unix millis
//!          [f32 LE]  `dimensions` components
//! ```

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::semantic::store::KeywordEmbedding;

const FORMAT_VERSION: u8 = 1;
const HEADER_LEN: usize = 47;
const CHECKSUMMED_LEN: usize = 43;
const MAX_KEYWORD_BYTES: u32 = 64 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum VectorFileError {
    #[error("vectors file I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed vectors file: {0}")]
    InvalidFormat(String),

    #[error("vectors file has format v{0}, this build reads up to v{1}")]
    VersionMismatch(u8, u8),

    #[error("vectors file was written by another embedding model")]
    ModelMismatch,

    #[error("vectors file header checksum does not match")]
    ChecksumMismatch,

    #[error("vectors file holds {got}-dimensional vectors, expected {expected}")]
    DimensionMismatch { expected: usize, got: usize },
}

#[derive(Debug, PartialEq)]
struct Header {
    version: u8,
    model_id: [u8; 32],
    dimensions: u16,
    entry_count: u64,
}

impl Header {
    fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0] = self.version;
        buf[1..33].copy_from_slice(&self.model_id);
        buf[33..35].copy_from_slice(&self.dimensions.to_le_bytes());
        buf[35..43].copy_from_slice(&self.entry_count.to_le_bytes());
        let crc = crc32fast::hash(&buf[..CHECKSUMMED_LEN]);
        buf[43..].copy_from_slice(&crc.to_le_bytes());
        buf
    }

    fn decode(buf: &[u8; HEADER_LEN]) -> Result<Self, VectorFileError> {
        let version = buf[0];
        if version > FORMAT_VERSION {
            return Err(VectorFileError::VersionMismatch(version, FORMAT_VERSION));
        }

        let crc = u32::from_le_bytes(take::<4>(&buf[43..]));
        if crc != crc32fast::hash(&buf[..CHECKSUMMED_LEN]) {
            return Err(VectorFileError::ChecksumMismatch);
        }

        Ok(Header {
            version,
            model_id: take::<32>(&buf[1..]),
            dimensions: u16::from_le_bytes(take::<2>(&buf[33..])),
            entry_count: u64::from_le_bytes(take::<8>(&buf[35..])),
        })
    }

    fn check(&self, model_id: &[u8; 32], dimensions: usize) -> Result<(), VectorFileError> {
        if self.model_id != *model_id {
            return Err(VectorFileError::ModelMismatch);
        }
        if usize::from(self.dimensions) != dimensions {
            return Err(VectorFileError::DimensionMismatch {
                expected: dimensions,
                got: usize::from(self.dimensions),
            });
        }
        Ok(())
    }
}

/// First `N` bytes of `bytes`. Callers slice within a fixed-size header.
fn take<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[..N]);
    out
}

fn read_array<const N: usize>(reader: &mut impl Read) -> std::io::Result<[u8; N]> {
    let mut buf = [0u8; N];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

fn read_embedding(
    reader: &mut impl Read,
    dimensions: usize,
) -> Result<KeywordEmbedding, VectorFileError> {
    let keyword_len = u32::from_le_bytes(read_array(reader)?);
    if keyword_len == 0 || keyword_len > MAX_KEYWORD_BYTES {
        return Err(VectorFileError::InvalidFormat(format!(
            "keyword length {keyword_len} out of range"
        )));
    }

    let mut raw = vec![0u8; keyword_len as usize];
    reader.read_exact(&mut raw)?;
    let keyword = String::from_utf8(raw)
        .map_err(|e| VectorFileError::InvalidFormat(format!("keyword is not utf-8: {e}")))?;

    let millis = i64::from_le_bytes(read_array(reader)?);
    let created_at = DateTime::<Utc>::from_timestamp_millis(millis)
        .ok_or_else(|| VectorFileError::InvalidFormat(format!("bad timestamp {millis}")))?;

    let embedding = (0..dimensions)
        .map(|_| read_array(reader).map(f32::from_le_bytes))
        .collect::<std::io::Result<Vec<f32>>>()?;

    Ok(KeywordEmbedding {
        keyword,
        embedding,
        created_at,
    })
}

fn write_embedding(writer: &mut impl Write, entry: &KeywordEmbedding) -> std::io::Result<()> {
    let keyword = entry.keyword.as_bytes();
    writer.write_all(&(keyword.len() as u32).to_le_bytes())?;
    writer.write_all(keyword)?;
    writer.write_all(&entry.created_at.timestamp_millis().to_le_bytes())?;
    entry
        .embedding
        .iter()
        .try_for_each(|value| writer.write_all(&value.to_le_bytes()))
}

pub struct VectorFile {
    path: PathBuf,
}

impl VectorFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Read every entry. The file must match `model_id` and `dimensions`.
    pub fn load(
        &self,
        model_id: &[u8; 32],
        dimensions: usize,
    ) -> Result<Vec<KeywordEmbedding>, VectorFileError> {
        let mut reader = BufReader::new(File::open(&self.path)?);

        let header = Header::decode(&read_array(&mut reader)?)?;
        header.check(model_id, dimensions)?;
        log::debug!(
            "reading {} keyword vectors (format v{}) from {:?}",
            header.entry_count,
            header.version,
            self.path
        );

        let mut entries = Vec::with_capacity(header.entry_count.min(1 << 20) as usize);
        for _ in 0..header.entry_count {
            entries.push(read_embedding(&mut reader, dimensions)?);
        }
        Ok(entries)
    }

    /// Replace the file with `entries`.
    ///
    /// Written to a sibling `.tmp` file, synced, then renamed over the
    /// target, so readers see either the old or the new file. `entry_count`
    /// goes into the header and must equal the number of entries yielded.
    pub fn save<'a, I>(
        &self,
        entries: I,
        entry_count: usize,
        dimensions: usize,
        model_id: &[u8; 32],
    ) -> Result<(), VectorFileError>
    where
        I: IntoIterator<Item = &'a KeywordEmbedding>,
    {
        let header = Header {
            version: FORMAT_VERSION,
            model_id: *model_id,
            dimensions: u16::try_from(dimensions).map_err(|_| {
                VectorFileError::InvalidFormat(format!("{dimensions} dimensions exceed u16"))
            })?,
            entry_count: entry_count as u64,
        };

        let tmp = self.path.with_extension("tmp");
        let result = Self::write_all(&tmp, &header, entries)
            .and_then(|()| std::fs::rename(&tmp, &self.path).map_err(VectorFileError::from));
        if result.is_err() {
            let _ = std::fs::remove_file(&tmp);
        }
        result
    }

    fn write_all<'a, I>(path: &Path, header: &Header, entries: I) -> Result<(), VectorFileError>
    where
        I: IntoIterator<Item = &'a KeywordEmbedding>,
    {
        let dimensions = usize::from(header.dimensions);
        let mut writer = BufWriter::new(File::create(path)?);
        writer.write_all(&header.encode())?;

        let mut written = 0u64;
        for entry in entries {
            if entry.embedding.len() != dimensions {
                return Err(VectorFileError::DimensionMismatch {
                    expected: dimensions,
                    got: entry.embedding.len(),
                });
            }
            write_embedding(&mut writer, entry)?;
            written += 1;
        }
        if written != header.entry_count {
            return Err(VectorFileError::InvalidFormat(format!(
                "header says {} entries, got {written}",
                header.entry_count
            )));
        }

        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODEL: [u8; 32] = [7u8; 32];

    fn kw(keyword: &str, embedding: &[f32]) -> KeywordEmbedding {
        KeywordEmbedding {
            keyword: keyword.to_string(),
            embedding: embedding.to_vec(),
            created_at: DateTime::<Utc>::from_timestamp_millis(1_714_557_600_250).unwrap(),
        }
    }

    fn vectors_in(dir: &tempfile::TempDir) -> VectorFile {
        VectorFile::new(dir.path().join("vectors.bin"))
    }

    #[test]
    fn header_layout() {
        let header = Header {
            version: 1,
            model_id: MODEL,
            dimensions: 384,
            entry_count: 2,
        };
        let bytes = header.encode();

        assert_eq!(bytes[0], 1);
        assert_eq!(&bytes[33..35], &[0x80, 0x01]);
        assert_eq!(&bytes[35..43], &2u64.to_le_bytes());
        assert_eq!(Header::decode(&bytes).unwrap(), header);
    }

    #[test]
    fn newer_version_is_refused() {
        let bytes = Header {
            version: 2,
            model_id: MODEL,
            dimensions: 3,
            entry_count: 0,
        }
        .encode();

        assert!(matches!(
            Header::decode(&bytes),
            Err(VectorFileError::VersionMismatch(2, 1))
        ));
    }

    #[test]
    fn entries_survive_a_save() {
        let dir = tempfile::tempdir().unwrap();
        let file = vectors_in(&dir);
        let entries = [
            kw("harbour", &[0.5, 0.5, 0.0]),
            kw("café", &[0.0, 1.0, 0.0]),
            kw("NASA", &[0.0, 0.0, -2.0]),
        ];

        file.save(&entries, 3, 3, &MODEL).unwrap();
        assert_eq!(file.load(&MODEL, 3).unwrap(), entries);
        assert!(!dir.path().join("vectors.tmp").exists());
    }

    #[test]
    fn empty_store_is_just_a_header() {
        let dir = tempfile::tempdir().unwrap();
        let file = vectors_in(&dir);
        file.save(&[], 0, 384, &MODEL).unwrap();

        assert_eq!(std::fs::metadata(file.path()).unwrap().len(), HEADER_LEN as u64);
        assert!(file.load(&MODEL, 384).unwrap().is_empty());
    }

    #[test]
    fn entry_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let file = vectors_in(&dir);
        file.save(&[kw("ox", &[1.0, -2.5])], 1, 2, &MODEL).unwrap();

        let bytes = std::fs::read(file.path()).unwrap();
        let entry = &bytes[HEADER_LEN..];
        assert_eq!(&entry[..4], &2u32.to_le_bytes());
        assert_eq!(&entry[4..6], b"ox");
        assert_eq!(&entry[6..14], &1_714_557_600_250i64.to_le_bytes());
        assert_eq!(&entry[14..18], &1.0f32.to_le_bytes());
        assert_eq!(&entry[18..22], &(-2.5f32).to_le_bytes());
        assert_eq!(entry.len(), 22);
    }

    #[test]
    fn other_model_or_dimensions_are_refused() {
        let dir = tempfile::tempdir().unwrap();
        let file = vectors_in(&dir);
        file.save(&[], 0, 3, &MODEL).unwrap();

        assert!(matches!(
            file.load(&[0u8; 32], 3),
            Err(VectorFileError::ModelMismatch)
        ));
        assert!(matches!(
            file.load(&MODEL, 4),
            Err(VectorFileError::DimensionMismatch {
                expected: 4,
                got: 3
            })
        ));
    }

    #[test]
    fn failed_save_keeps_previous_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = vectors_in(&dir);
        file.save(&[kw("harbour", &[1.0, 0.0])], 1, 2, &MODEL).unwrap();

        let result = file.save(&[kw("short", &[1.0])], 1, 2, &MODEL);
        assert!(matches!(result, Err(VectorFileError::DimensionMismatch { .. })));

        let miscounted = file.save(&[kw("pier", &[0.0, 1.0])], 2, 2, &MODEL);
        assert!(matches!(miscounted, Err(VectorFileError::InvalidFormat(_))));

        assert!(!dir.path().join("vectors.tmp").exists());
        assert_eq!(file.load(&MODEL, 2).unwrap()[0].keyword, "harbour");
    }

    #[test]
    fn failed_rename_removes_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = vectors_in(&dir);
        // a non-empty directory in the way makes the rename fail
        std::fs::create_dir(file.path()).unwrap();
        std::fs::write(file.path().join("keep"), b"x").unwrap();

        let result = file.save(&[kw("harbour", &[1.0, 0.0])], 1, 2, &MODEL);

        assert!(matches!(result, Err(VectorFileError::Io(_))));
        assert!(!dir.path().join("vectors.tmp").exists());
        assert!(file.path().is_dir());
    }

    #[test]
    fn unwritable_directory_is_an_io_error() {
        let file = VectorFile::new(PathBuf::from("/nonexistent/kwsearch/vectors.bin"));
        assert!(matches!(
            file.save(&[], 0, 3, &MODEL),
            Err(VectorFileError::Io(_))
        ));
    }

    #[test]
    fn corruption_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let file = vectors_in(&dir);
        file.save(&[kw("harbour", &[1.0, 0.0, 0.0])], 1, 3, &MODEL).unwrap();
        let good = std::fs::read(file.path()).unwrap();

        let mut flipped = good.clone();
        flipped[36] ^= 0xFF;
        std::fs::write(file.path(), &flipped).unwrap();
        assert!(matches!(
            file.load(&MODEL, 3),
            Err(VectorFileError::ChecksumMismatch)
        ));

        std::fs::write(file.path(), &good[..good.len() - 3]).unwrap();
        assert!(matches!(file.load(&MODEL, 3), Err(VectorFileError::Io(_))));
    }
}
