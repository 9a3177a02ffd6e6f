//! Exact nearest-neighbor vector index.
//!
//! A flat, row-major matrix of `f32` vectors searched by brute force with
//! squared Euclidean distance.
//!
//! # Sentinels
//!
//! [`VectorIndex::search`] always returns exactly `k` neighbors. When `k`
//! exceeds the number of indexed vectors, the tail is padded with
//! `Neighbor { position: -1, distance: f32::INFINITY }`. Callers filter
//! with [`Neighbor::is_match`].
//!
//! # Binary Format
//!
//! | Field | Type |
//! |-------|------|
//! | magic | `b"CMVI"` |
//! | version | `u32` LE (currently 2) |
//! | dims | `u32` LE |
//! | count | `u64` LE |
//! | tag | 32 bytes, caller-defined (zero when untagged) |
//! | data | `count × dims` `f32` LE |
//!
//! The tag lets a caller bind the index to a companion file, e.g. a digest
//! of the metadata written next to it.

use crate::embedding::{bytes_to_vec, squared_l2, vec_to_bytes};

const MAGIC: &[u8; 4] = b"CMVI";
const FORMAT_VERSION: u32 = 2;
const TAG_LEN: usize = 32;
const HEADER_LEN: usize = 4 + 4 + 4 + 8 + TAG_LEN;

/// Opaque 32-byte value stored in the index header.
pub type IndexTag = [u8; TAG_LEN];

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum IndexError {
    #[error("cannot build an index from zero vectors")]
    EmptyInput,

    #[error("dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("unsupported index format version {0}")]
    UnsupportedVersion(u32),

    #[error("corrupt index data: {0}")]
    Corrupt(String),
}

/// One search result. `position` is `-1` for padding sentinels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub position: i64,
    pub distance: f32,
}

impl Neighbor {
    pub const SENTINEL: Neighbor = Neighbor {
        position: -1,
        distance: f32::INFINITY,
    };

    /// `false` for padding entries.
    pub fn is_match(&self) -> bool {
        self.position >= 0
    }

    pub fn index(&self) -> Option<usize> {
        usize::try_from(self.position).ok()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VectorIndex {
    dims: usize,
    data: Vec<f32>,
}

impl VectorIndex {
    /// Build an index from equal-length, non-empty vectors.
    pub fn build(vectors: &[Vec<f32>]) -> Result<Self, IndexError> {
        let first = vectors.first().ok_or(IndexError::EmptyInput)?;
        let dims = first.len();
        if dims == 0 {
            return Err(IndexError::DimensionMismatch {
                expected: 1,
                found: 0,
            });
        }

        let mut data = Vec::with_capacity(vectors.len() * dims);
        for v in vectors {
            if v.len() != dims {
                return Err(IndexError::DimensionMismatch {
                    expected: dims,
                    found: v.len(),
                });
            }
            data.extend_from_slice(v);
        }
        Ok(Self { dims, data })
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn len(&self) -> usize {
        self.data.len() / self.dims
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn get(&self, position: usize) -> Option<&[f32]> {
        let start = position.checked_mul(self.dims)?;
        self.data.get(start..start + self.dims)
    }

    /// The `k` nearest vectors to `query`, closest first.
    ///
    /// Ties are broken by position. The result always has length `k`; see
    /// the module docs for sentinel padding.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>, IndexError> {
        if query.len() != self.dims {
            return Err(IndexError::DimensionMismatch {
                expected: self.dims,
                found: query.len(),
            });
        }

        let mut scored: Vec<Neighbor> = self
            .data
            .chunks_exact(self.dims)
            .enumerate()
            .map(|(i, row)| Neighbor {
                position: i as i64,
                distance: squared_l2(row, query),
            })
            .collect();

        scored.sort_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then(a.position.cmp(&b.position))
        });
        scored.truncate(k);
        scored.resize(k, Neighbor::SENTINEL);
        Ok(scored)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_bytes_tagged(&[0u8; TAG_LEN])
    }

    /// Serialize with `tag` in the header.
    pub fn to_bytes_tagged(&self, tag: &IndexTag) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.data.len() * 4);
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        out.extend_from_slice(&(self.dims as u32).to_le_bytes());
        out.extend_from_slice(&(self.len() as u64).to_le_bytes());
        out.extend_from_slice(tag);
        out.extend_from_slice(&vec_to_bytes(&self.data));
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, IndexError> {
        Self::from_bytes_tagged(bytes).map(|(index, _)| index)
    }

    /// Decode an index and the tag it was written with.
    pub fn from_bytes_tagged(bytes: &[u8]) -> Result<(Self, IndexTag), IndexError> {
        if bytes.len() < HEADER_LEN {
            return Err(IndexError::Corrupt(format!(
                "{} bytes is shorter than the header",
                bytes.len()
            )));
        }
        if &bytes[0..4] != MAGIC {
            return Err(IndexError::Corrupt("bad magic".to_string()));
        }

        let version = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        if version != FORMAT_VERSION {
            return Err(IndexError::UnsupportedVersion(version));
        }
        let dims = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize;
        let mut count_bytes = [0u8; 8];
        count_bytes.copy_from_slice(&bytes[12..20]);
        let count = u64::from_le_bytes(count_bytes) as usize;
        let mut tag = [0u8; TAG_LEN];
        tag.copy_from_slice(&bytes[20..HEADER_LEN]);

        if dims == 0 || count == 0 {
            return Err(IndexError::Corrupt(format!(
                "dims={} count={}",
                dims, count
            )));
        }
        let expected = count
            .checked_mul(dims)
            .and_then(|n| n.checked_mul(4))
            .ok_or_else(|| IndexError::Corrupt("size overflow".to_string()))?;
        let payload = &bytes[HEADER_LEN..];
        if payload.len() != expected {
            return Err(IndexError::Corrupt(format!(
                "expected {} data bytes, found {}",
                expected,
                payload.len()
            )));
        }

        Ok((
            Self {
                dims,
                data: bytes_to_vec(payload),
            },
            tag,
        ))
    }
}
