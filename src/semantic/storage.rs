//! Binary storage for vector embeddings.
//!
//! File format: vectors.bin
//!
//! Header (47 bytes):
//! - version: u8 (2)
//! - model_id: [u8; 32] (SHA256 hash of provider and model name)
//! - dimensions: u16 (little-endian)
//! - entry_count: u64 (little-endian)
//! - checksum: u32 (CRC32 of header fields before checksum)
//!
//! Entries (repeated):
//! - id_len: u16, then id_len bytes of UTF-8 record identifier
//! - content_hash: u64 (little-endian)
//! - metadata_len: u32, then metadata_len bytes of JSON document metadata
//! - embedding: [f32; dimensions] (little-endian)

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::semantic::document::DocumentMetadata;
use crate::semantic::index::{VectorEntry, VectorIndex};
use crate::store::RecordId;

const FORMAT_VERSION: u8 = 2;

/// version(1) + model_id(32) + dimensions(2) + entry_count(8) + checksum(4)
const HEADER_SIZE: usize = 47;

/// Entries are not checksummed, so lengths read from them are bounded
/// before anything is allocated.
const MAX_METADATA_LEN: usize = 1 << 20;

#[derive(Debug, thiserror::Error)]
pub enum VectorStorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid file format: {0}")]
    InvalidFormat(String),

    #[error("Version mismatch: file version {0}, supported version {1}")]
    VersionMismatch(u8, u8),

    #[error("Model mismatch: file uses different model")]
    ModelMismatch,

    #[error("Checksum mismatch: file may be corrupted")]
    ChecksumMismatch,
}

pub struct VectorStorage {
    path: PathBuf,
}

impl VectorStorage {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Load the vector index written for `expected_model_id`.
    ///
    /// Dimensions come from the file header: remote providers do not
    /// report them until the first embedding call.
    pub fn load(&self, expected_model_id: &[u8; 32]) -> Result<VectorIndex, VectorStorageError> {
        let file = File::open(&self.path)?;
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);

        let header = read_header(&mut reader)?;
        if header.model_id != *expected_model_id {
            return Err(VectorStorageError::ModelMismatch);
        }

        let dimensions = header.dimensions as usize;

        // id_len + one id byte + content_hash + metadata_len + embedding
        let min_entry = (2 + 1 + 8 + 4 + dimensions * 4) as u64;
        let room = file_len.saturating_sub(HEADER_SIZE as u64) / min_entry;
        if header.entry_count > room {
            return Err(VectorStorageError::InvalidFormat(format!(
                "{} entries cannot fit in {file_len} bytes",
                header.entry_count
            )));
        }

        let mut index = VectorIndex::with_capacity(dimensions, header.entry_count as usize);

        for _ in 0..header.entry_count {
            let (id, content_hash, metadata, embedding) = read_entry(&mut reader, dimensions)?;
            if let Err(err) = index.insert(id.clone(), content_hash, metadata, embedding) {
                log::warn!("skipping stored vector for {id}: {err}");
            }
        }

        Ok(index)
    }

    /// Atomic write: temp file, fsync, rename.
    pub fn save(&self, index: &VectorIndex, model_id: &[u8; 32]) -> Result<(), VectorStorageError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let temp_path = self.path.with_extension("tmp");

        if let Err(err) = write_to_file(&temp_path, index, model_id) {
            let _ = std::fs::remove_file(&temp_path);
            return Err(err);
        }

        std::fs::rename(&temp_path, &self.path)?;

        Ok(())
    }
}

#[derive(Debug)]
struct Header {
    model_id: [u8; 32],
    dimensions: u16,
    entry_count: u64,
}

fn write_to_file(path: &Path, index: &VectorIndex, model_id: &[u8; 32]) -> Result<(), VectorStorageError> {
    let dimensions = u16::try_from(index.dimensions())
        .map_err(|_| VectorStorageError::InvalidFormat(format!("{} dimensions", index.dimensions())))?;

    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);

    write_header(
        &mut writer,
        &Header {
            model_id: *model_id,
            dimensions,
            entry_count: index.len() as u64,
        },
    )?;

    for (id, entry) in index.iter() {
        write_entry(&mut writer, id, entry)?;
    }

    writer.flush()?;
    let file = writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;

    Ok(())
}

fn read_header(reader: &mut impl Read) -> Result<Header, VectorStorageError> {
    let mut header_bytes = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header_bytes)?;

    let version = header_bytes[0];
    if version != FORMAT_VERSION {
        return Err(VectorStorageError::VersionMismatch(version, FORMAT_VERSION));
    }

    let stored_checksum = u32::from_le_bytes(le_array(&header_bytes[43..47]));
    if stored_checksum != crc32fast::hash(&header_bytes[0..43]) {
        return Err(VectorStorageError::ChecksumMismatch);
    }

    Ok(Header {
        model_id: le_array(&header_bytes[1..33]),
        dimensions: u16::from_le_bytes(le_array(&header_bytes[33..35])),
        entry_count: u64::from_le_bytes(le_array(&header_bytes[35..43])),
    })
}

fn write_header(writer: &mut impl Write, header: &Header) -> Result<(), VectorStorageError> {
    let mut header_bytes = [0u8; HEADER_SIZE];

    header_bytes[0] = FORMAT_VERSION;
    header_bytes[1..33].copy_from_slice(&header.model_id);
    header_bytes[33..35].copy_from_slice(&header.dimensions.to_le_bytes());
    header_bytes[35..43].copy_from_slice(&header.entry_count.to_le_bytes());

    let checksum = crc32fast::hash(&header_bytes[0..43]);
    header_bytes[43..47].copy_from_slice(&checksum.to_le_bytes());

    writer.write_all(&header_bytes)?;
    Ok(())
}

fn read_entry(
    reader: &mut impl Read,
    dimensions: usize,
) -> Result<(RecordId, u64, DocumentMetadata, Vec<f32>), VectorStorageError> {
    let id_len = u16::from_le_bytes(read_array(reader)?) as usize;
    let raw_id = String::from_utf8(read_vec(reader, id_len)?)
        .map_err(|e| VectorStorageError::InvalidFormat(format!("record id: {e}")))?;
    let id = RecordId::parse(&raw_id)
        .ok_or_else(|| VectorStorageError::InvalidFormat(format!("record id {raw_id:?}")))?;

    let content_hash = u64::from_le_bytes(read_array(reader)?);

    let metadata_len = u32::from_le_bytes(read_array(reader)?) as usize;
    if metadata_len > MAX_METADATA_LEN {
        return Err(VectorStorageError::InvalidFormat(format!(
            "metadata for {id} claims {metadata_len} bytes"
        )));
    }
    let metadata: DocumentMetadata = serde_json::from_slice(&read_vec(reader, metadata_len)?)
        .map_err(|e| VectorStorageError::InvalidFormat(format!("metadata for {id}: {e}")))?;

    let mut embedding = Vec::with_capacity(dimensions);
    for _ in 0..dimensions {
        embedding.push(f32::from_le_bytes(read_array(reader)?));
    }

    Ok((id, content_hash, metadata, embedding))
}

fn write_entry(writer: &mut impl Write, id: &RecordId, entry: &VectorEntry) -> Result<(), VectorStorageError> {
    let id_bytes = id.as_str().as_bytes();
    let id_len = u16::try_from(id_bytes.len())
        .map_err(|_| VectorStorageError::InvalidFormat(format!("record id too long: {id}")))?;
    writer.write_all(&id_len.to_le_bytes())?;
    writer.write_all(id_bytes)?;

    writer.write_all(&entry.content_hash.to_le_bytes())?;

    let metadata = serde_json::to_vec(&entry.metadata)
        .map_err(|e| VectorStorageError::InvalidFormat(format!("metadata for {id}: {e}")))?;
    if metadata.len() > MAX_METADATA_LEN {
        return Err(VectorStorageError::InvalidFormat(format!("metadata too large: {id}")));
    }
    let metadata_len = metadata.len() as u32;
    writer.write_all(&metadata_len.to_le_bytes())?;
    writer.write_all(&metadata)?;

    for &value in &entry.embedding {
        writer.write_all(&value.to_le_bytes())?;
    }

    Ok(())
}

fn le_array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(bytes);
    out
}

fn read_array<const N: usize>(reader: &mut impl Read) -> std::io::Result<[u8; N]> {
    let mut buf = [0u8; N];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

fn read_vec(reader: &mut impl Read, len: usize) -> std::io::Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}
