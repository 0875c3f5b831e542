use std::collections::HashSet;

use docqa_core::error::{Error, Result};
use docqa_core::types::{Chunk, RetrievalResult};

/// Exact cosine k-NN over L2-normalized vectors of one fixed dimension.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorIndex {
    dim: usize,
    /// Row-major `len() x dim`.
    vectors: Vec<f32>,
    chunks: Vec<Chunk>,
    keys: HashSet<String>,
}

impl VectorIndex {
    pub fn new(dim: usize) -> Result<Self> {
        if dim == 0 {
            return Err(Error::validation("index dimension must be >= 1"));
        }
        Ok(Self { dim, vectors: Vec::new(), chunks: Vec::new(), keys: HashSet::new() })
    }

    pub fn dim(&self) -> usize { self.dim }

    pub fn len(&self) -> usize { self.chunks.len() }

    pub fn is_empty(&self) -> bool { self.chunks.is_empty() }

    pub fn chunks(&self) -> &[Chunk] { &self.chunks }

    pub fn vector(&self, row: usize) -> Option<&[f32]> {
        let start = row.checked_mul(self.dim)?;
        self.vectors.get(start..start + self.dim)
    }

    pub(crate) fn raw_vectors(&self) -> &[f32] { &self.vectors }

    /// Append a batch. Either every entry is accepted or none is.
    pub fn add(&mut self, chunks: Vec<Chunk>, vectors: Vec<Vec<f32>>) -> Result<()> {
        if chunks.len() != vectors.len() {
            return Err(Error::validation(format!(
                "batch has {} chunks but {} vectors",
                chunks.len(),
                vectors.len()
            )));
        }
        let mut batch_keys = HashSet::with_capacity(chunks.len());
        let mut normalized = Vec::with_capacity(vectors.len() * self.dim);
        for (chunk, v) in chunks.iter().zip(&vectors) {
            if v.len() != self.dim {
                return Err(Error::DimensionMismatch { expected: self.dim, actual: v.len() });
            }
            let key = chunk.key();
            if self.keys.contains(&key) || !batch_keys.insert(key.clone()) {
                return Err(Error::validation(format!("duplicate chunk {key}")));
            }
            let unit = normalize(v).ok_or_else(|| Error::validation(format!("vector for {key} is zero or not finite")))?;
            normalized.extend(unit);
        }
        self.vectors.extend(normalized);
        self.keys.extend(batch_keys);
        self.chunks.extend(chunks);
        Ok(())
    }

    /// Top-`k` rows by cosine similarity, ordered by score descending with
    /// ties broken by `chunk_id` then `doc_id`.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<RetrievalResult>> {
        if query.len() != self.dim {
            return Err(Error::DimensionMismatch { expected: self.dim, actual: query.len() });
        }
        if k == 0 || self.is_empty() {
            return Ok(vec![]);
        }
        let q = normalize(query).ok_or_else(|| Error::validation("query vector is zero or not finite"))?;
        let mut scored: Vec<RetrievalResult> = self
            .vectors
            .chunks_exact(self.dim)
            .zip(&self.chunks)
            .map(|(row, chunk)| RetrievalResult {
                chunk_id: chunk.chunk_id,
                doc_id: chunk.doc_id.clone(),
                source_path: chunk.source_path.clone(),
                page: chunk.page,
                score: dot(row, &q).clamp(-1.0, 1.0),
                text: chunk.text.clone(),
            })
            .collect();
        scored.sort_by(RetrievalResult::rank_cmp);
        scored.truncate(k);
        Ok(scored)
    }

    /// Rebuild from persisted rows. Vectors are expected to be normalized already.
    pub(crate) fn from_parts(dim: usize, vectors: Vec<f32>, chunks: Vec<Chunk>) -> Result<Self> {
        if vectors.len() != chunks.len() * dim {
            return Err(Error::corruption(format!(
                "{} floats cannot hold {} rows of dimension {dim}",
                vectors.len(),
                chunks.len()
            )));
        }
        let mut keys = HashSet::with_capacity(chunks.len());
        for c in &chunks {
            if !keys.insert(c.key()) {
                return Err(Error::corruption(format!("duplicate chunk {} in sidecar", c.key())));
            }
        }
        Ok(Self { dim, vectors, chunks, keys })
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 { a.iter().zip(b).map(|(x, y)| x * y).sum() }

fn normalize(v: &[f32]) -> Option<Vec<f32>> {
    if v.iter().any(|x| !x.is_finite()) {
        return None;
    }
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm == 0.0 || !norm.is_finite() {
        return None;
    }
    Some(v.iter().map(|x| x / norm).collect())
}
