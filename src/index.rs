//! Exact (flat) nearest-neighbor index over L2-normalized vectors.
//!
//! # Storage Format
//!
//! - Header (52 bytes): magic `SKIX`, format version (u32), dimension (u32),
//!   vector count (u64), SHA-256 digest of the chunk corpus JSON the index
//!   was built with (32 bytes)
//! - Vectors: `count × dimension` contiguous little-endian `f32`
//!
//! Vector position `i` corresponds to `corpus.chunks[i]`. The digest binds
//! an index file to exactly one corpus file.

use std::cmp::Ordering;

use sha2::{Digest, Sha256};

use crate::embedding::{blob_to_vec, normalize, vec_to_blob};

const MAGIC_BYTES: &[u8; 4] = b"SKIX";
const FORMAT_VERSION: u32 = 1;
const DIGEST_LEN: usize = 32;
pub const HEADER_SIZE: usize = 4 + 4 + 4 + 8 + DIGEST_LEN;

/// SHA-256 of the serialized corpus.
pub fn corpus_digest(corpus_json: &[u8]) -> [u8; DIGEST_LEN] {
    let mut hasher = Sha256::new();
    hasher.update(corpus_json);
    hasher.finalize().into()
}

#[derive(Debug, Clone, PartialEq)]
pub struct FlatIndex {
    dimension: usize,
    /// Row-major, `len × dimension`.
    data: Vec<f32>,
    digest: [u8; DIGEST_LEN],
}

/// A search hit: corpus position and cosine distance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub position: usize,
    pub distance: f32,
}

impl FlatIndex {
    /// Build from raw vectors, normalizing each one.
    ///
    /// Every vector must have the same, non-zero dimension.
    pub fn build(vectors: Vec<Vec<f32>>, digest: [u8; DIGEST_LEN]) -> Result<Self, String> {
        let dimension = vectors.first().map(|v| v.len()).unwrap_or(0);
        if dimension == 0 && !vectors.is_empty() {
            return Err("vectors have zero dimension".to_string());
        }

        let mut data = Vec::with_capacity(vectors.len() * dimension);
        for (i, mut v) in vectors.into_iter().enumerate() {
            if v.len() != dimension {
                return Err(format!(
                    "vector {} has dimension {}, expected {}",
                    i,
                    v.len(),
                    dimension
                ));
            }
            normalize(&mut v);
            data.extend_from_slice(&v);
        }

        Ok(Self {
            dimension,
            data,
            digest,
        })
    }

    pub fn len(&self) -> usize {
        if self.dimension == 0 {
            0
        } else {
            self.data.len() / self.dimension
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn digest(&self) -> &[u8; DIGEST_LEN] {
        &self.digest
    }

    pub fn vector(&self, position: usize) -> Option<&[f32]> {
        let start = position.checked_mul(self.dimension)?;
        self.data.get(start..start + self.dimension)
    }

    /// Exact top-`k` search by cosine distance (`1 - dot` on unit vectors).
    ///
    /// Results are ordered by ascending distance; equal distances keep
    /// corpus order, which is `file_path` then `chunk_index`.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<Neighbor> {
        if query.len() != self.dimension || k == 0 {
            return Vec::new();
        }
        let mut q = query.to_vec();
        normalize(&mut q);

        let mut hits: Vec<Neighbor> = self
            .data
            .chunks_exact(self.dimension)
            .enumerate()
            .map(|(position, row)| {
                let dot: f32 = row.iter().zip(q.iter()).map(|(a, b)| a * b).sum();
                Neighbor {
                    position,
                    distance: 1.0 - dot,
                }
            })
            .collect();

        hits.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(Ordering::Equal)
                .then(a.position.cmp(&b.position))
        });
        hits.truncate(k);
        hits
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_SIZE + self.data.len() * 4);
        bytes.extend_from_slice(MAGIC_BYTES);
        bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&(self.dimension as u32).to_le_bytes());
        bytes.extend_from_slice(&(self.len() as u64).to_le_bytes());
        bytes.extend_from_slice(&self.digest);
        bytes.extend_from_slice(&vec_to_blob(&self.data));
        bytes
    }

    /// Parse an index file. The error string describes what is wrong.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, String> {
        let header = read_header(bytes)?;

        let expected = header
            .count
            .checked_mul(header.dimension)
            .and_then(|n| n.checked_mul(4))
            .and_then(|n| n.checked_add(HEADER_SIZE))
            .ok_or_else(|| "index header sizes overflow".to_string())?;
        if bytes.len() != expected {
            return Err(format!(
                "index is {} bytes, header implies {}",
                bytes.len(),
                expected
            ));
        }

        Ok(Self {
            dimension: header.dimension,
            data: blob_to_vec(&bytes[HEADER_SIZE..]),
            digest: header.digest,
        })
    }
}

/// Parsed index header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexHeader {
    pub dimension: usize,
    pub count: usize,
    pub digest: [u8; DIGEST_LEN],
}

pub fn read_header(bytes: &[u8]) -> Result<IndexHeader, String> {
    if bytes.len() < HEADER_SIZE {
        return Err(format!("index is {} bytes, shorter than its header", bytes.len()));
    }
    if &bytes[0..4] != MAGIC_BYTES {
        return Err("bad magic bytes".to_string());
    }

    let version = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    if version != FORMAT_VERSION {
        return Err(format!(
            "unsupported index version {} (expected {})",
            version, FORMAT_VERSION
        ));
    }

    let dimension = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize;
    let mut count_bytes = [0u8; 8];
    count_bytes.copy_from_slice(&bytes[12..20]);
    let count = u64::from_le_bytes(count_bytes) as usize;
    let mut digest = [0u8; DIGEST_LEN];
    digest.copy_from_slice(&bytes[20..HEADER_SIZE]);

    Ok(IndexHeader {
        dimension,
        count,
        digest,
    })
}
