//! On-disk layout of one index version.
//!
//! - `vectors.bin`: `DQVI`, format version (u32), dim (u32), count (u64), then
//!   `count * dim` f32 values; all little-endian.
//! - `chunks.jsonl`: one chunk per line, in row order.
//! - `manifest.json`: shape, embedder id, chunking config and BLAKE3 digests.
//!
//! None of these files carry timestamps, so identical input gives identical bytes.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use docqa_core::config::ChunkingConfig;
use docqa_core::error::{Error, Result};
use docqa_core::types::Chunk;

use crate::index::VectorIndex;

pub const VECTORS_FILE: &str = "vectors.bin";
pub const CHUNKS_FILE: &str = "chunks.jsonl";
pub const MANIFEST_FILE: &str = "manifest.json";

const MAGIC: &[u8; 4] = b"DQVI";
pub const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 4 + 4 + 4 + 8;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub format_version: u32,
    pub embedder_id: String,
    pub dim: usize,
    pub count: usize,
    pub chunking: ChunkingConfig,
    pub vectors_blake3: String,
    pub chunks_blake3: String,
}

/// Serialized form of an index version, ready to be written.
pub struct EncodedIndex {
    pub vectors: Vec<u8>,
    pub chunks: Vec<u8>,
    pub manifest: Vec<u8>,
    /// Content-derived id; equal bytes give equal ids.
    pub version_id: String,
}

pub fn encode(index: &VectorIndex, embedder_id: &str, chunking: ChunkingConfig) -> Result<EncodedIndex> {
    let raw = index.raw_vectors();
    let mut vectors = Vec::with_capacity(HEADER_LEN + raw.len() * 4);
    vectors.extend_from_slice(MAGIC);
    vectors.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    let dim = u32::try_from(index.dim()).map_err(|_| Error::validation("dimension does not fit in u32"))?;
    vectors.extend_from_slice(&dim.to_le_bytes());
    vectors.extend_from_slice(&(index.len() as u64).to_le_bytes());
    for x in raw {
        vectors.extend_from_slice(&x.to_le_bytes());
    }

    let mut chunks = Vec::new();
    for c in index.chunks() {
        serde_json::to_writer(&mut chunks, c)?;
        chunks.push(b'\n');
    }

    let manifest = Manifest {
        format_version: FORMAT_VERSION,
        embedder_id: embedder_id.to_string(),
        dim: index.dim(),
        count: index.len(),
        chunking,
        vectors_blake3: blake3::hash(&vectors).to_hex().to_string(),
        chunks_blake3: blake3::hash(&chunks).to_hex().to_string(),
    };
    let mut manifest_bytes = serde_json::to_vec_pretty(&manifest)?;
    manifest_bytes.push(b'\n');
    let version_id = blake3::hash(&manifest_bytes).to_hex().as_str()[..16].to_string();

    Ok(EncodedIndex { vectors, chunks, manifest: manifest_bytes, version_id })
}

pub fn write(dir: &Path, encoded: &EncodedIndex) -> Result<()> {
    for (name, bytes) in [
        (VECTORS_FILE, &encoded.vectors),
        (CHUNKS_FILE, &encoded.chunks),
        (MANIFEST_FILE, &encoded.manifest),
    ] {
        let path = dir.join(name);
        fs::write(&path, bytes).map_err(|e| Error::io(&path, e))?;
    }
    Ok(())
}

/// Load and verify a version directory. Any inconsistency is reported as
/// `Error::IndexCorruption`.
pub fn read(dir: &Path) -> Result<(VectorIndex, Manifest)> {
    let manifest_bytes = read_file(dir, MANIFEST_FILE)?;
    let manifest: Manifest = serde_json::from_slice(&manifest_bytes)
        .map_err(|e| Error::corruption(format!("{MANIFEST_FILE} unreadable: {e}")))?;
    if manifest.format_version != FORMAT_VERSION {
        return Err(Error::corruption(format!("unsupported format version {}", manifest.format_version)));
    }

    let vector_bytes = read_file(dir, VECTORS_FILE)?;
    let chunk_bytes = read_file(dir, CHUNKS_FILE)?;
    if blake3::hash(&vector_bytes).to_hex().as_str() != manifest.vectors_blake3 {
        return Err(Error::corruption(format!("{VECTORS_FILE} checksum mismatch")));
    }
    if blake3::hash(&chunk_bytes).to_hex().as_str() != manifest.chunks_blake3 {
        return Err(Error::corruption(format!("{CHUNKS_FILE} checksum mismatch")));
    }

    let (dim, count, floats) = decode_vectors(&vector_bytes)?;
    if dim != manifest.dim {
        return Err(Error::corruption(format!("header dim {dim} != manifest dim {}", manifest.dim)));
    }
    if count != manifest.count {
        return Err(Error::corruption(format!("header count {count} != manifest count {}", manifest.count)));
    }

    let chunks = decode_chunks(&chunk_bytes)?;
    if chunks.len() != count {
        return Err(Error::corruption(format!("{} sidecar rows for {count} vectors", chunks.len())));
    }
    let index = VectorIndex::from_parts(dim, floats, chunks)?;
    Ok((index, manifest))
}

fn read_file(dir: &Path, name: &str) -> Result<Vec<u8>> {
    let path = dir.join(name);
    fs::read(&path).map_err(|e| Error::corruption(format!("{} missing or unreadable: {e}", path.display())))
}

fn decode_vectors(bytes: &[u8]) -> Result<(usize, usize, Vec<f32>)> {
    if bytes.len() < HEADER_LEN || &bytes[..4] != MAGIC {
        return Err(Error::corruption(format!("{VECTORS_FILE} has no valid header")));
    }
    let version = u32::from_le_bytes(le_array(&bytes[4..8])?);
    if version != FORMAT_VERSION {
        return Err(Error::corruption(format!("{VECTORS_FILE} format version {version}")));
    }
    let dim = u32::from_le_bytes(le_array(&bytes[8..12])?) as usize;
    let count = usize::try_from(u64::from_le_bytes(le_array(&bytes[12..20])?))
        .map_err(|_| Error::corruption("row count overflows usize"))?;
    let body = &bytes[HEADER_LEN..];
    let expected = count
        .checked_mul(dim)
        .and_then(|n| n.checked_mul(4))
        .ok_or_else(|| Error::corruption("vector payload size overflows"))?;
    if dim == 0 || body.len() != expected {
        return Err(Error::corruption(format!(
            "{VECTORS_FILE} payload is {} bytes, expected {expected} for {count}x{dim}",
            body.len()
        )));
    }
    let mut floats = Vec::with_capacity(count * dim);
    for raw in body.chunks_exact(4) {
        let x = f32::from_le_bytes(le_array(raw)?);
        if !x.is_finite() {
            return Err(Error::corruption(format!("{VECTORS_FILE} contains a non-finite value")));
        }
        floats.push(x);
    }
    Ok((dim, count, floats))
}

fn decode_chunks(bytes: &[u8]) -> Result<Vec<Chunk>> {
    let text = std::str::from_utf8(bytes).map_err(|e| Error::corruption(format!("{CHUNKS_FILE} not UTF-8: {e}")))?;
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            serde_json::from_str(line)
                .map_err(|e| Error::corruption(format!("{CHUNKS_FILE} line {}: {e}", n + 1)))
        })
        .collect()
}

fn le_array<const N: usize>(bytes: &[u8]) -> Result<[u8; N]> {
    bytes.try_into().map_err(|_| Error::corruption("truncated field"))
}
