//! Composite (MD5-of-MD5-of-CRC32) checksums computed over local files.
//!
//! The remote filesystem keeps a CRC32 for every `bytes_per_crc` bytes of a
//! block, digests each block's CRCs with MD5 and digests the concatenated block
//! MD5s once more for the whole file. This module reproduces that scheme for a
//! local copy so the two can be compared without re-reading the remote bytes.
//!
//! The whole-file digest carries a legacy defect: it is taken over the block
//! digest buffer's allocated capacity rather than over the bytes written to it,
//! so trailing zero padding is hashed too. The remote side has the same defect,
//! and every backup ever verified depends on it. See [`legacy_padded_len`].

use crate::error::{EngineError, Result};
use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

/// Bytes covered by each CRC32.
pub const DEFAULT_BYTES_PER_CRC: usize = 512;

/// Block size of the production cluster (the stock default is 64 MiB).
pub const DEFAULT_BLOCK_SIZE: u64 = 128 * 1024 * 1024;

/// Initial capacity of the legacy block-digest buffer.
const LEGACY_INITIAL_CAPACITY: usize = 32;

const MD5_LEN: usize = 16;

/// An opaque composite checksum in `<algorithm>:<payload>` form.
///
/// Consumers compare only payloads; the algorithm prefix is informational.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositeChecksum {
    algorithm: String,
    payload: String,
}

impl CompositeChecksum {
    /// Parse `<algorithm>:<payload>`. Everything up to the last `:` is the algorithm.
    pub fn parse(s: &str) -> Self {
        match s.rsplit_once(':') {
            Some((algorithm, payload)) => CompositeChecksum {
                algorithm: algorithm.to_string(),
                payload: payload.to_string(),
            },
            None => CompositeChecksum {
                algorithm: String::new(),
                payload: s.to_string(),
            },
        }
    }

    pub fn new(algorithm: impl Into<String>, payload: impl Into<String>) -> Self {
        CompositeChecksum {
            algorithm: algorithm.into(),
            payload: payload.into(),
        }
    }

    /// Build from the three fields the remote filesystem serializes.
    pub fn md5_md5_crc32(bytes_per_crc: usize, crcs_per_block: u64, md5: [u8; MD5_LEN]) -> Self {
        CompositeChecksum {
            algorithm: algorithm_name(bytes_per_crc, crcs_per_block),
            payload: to_hex(&md5),
        }
    }

    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// Payload equality, ignoring the algorithm prefix.
    pub fn matches(&self, other: &CompositeChecksum) -> bool {
        self.payload == other.payload
    }
}

impl fmt::Display for CompositeChecksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.algorithm.is_empty() {
            write!(f, "{}", self.payload)
        } else {
            write!(f, "{}:{}", self.algorithm, self.payload)
        }
    }
}

/// `MD5-of-<crcs per block>MD5-of-<bytes per crc>CRC32`
pub fn algorithm_name(bytes_per_crc: usize, crcs_per_block: u64) -> String {
    format!("MD5-of-{}MD5-of-{}CRC32", crcs_per_block, bytes_per_crc)
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// How the whole-file digest treats the block-digest buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DigestPadding {
    /// Hash the buffer's full capacity, zero padding included. Matches the remote side.
    #[default]
    Legacy,
    /// Hash only the bytes written. Never matches the remote side unless no padding exists.
    Exact,
}

/// Length the legacy whole-file digest covers after `written` bytes of block digests.
///
/// The buffer starts at 32 bytes and at least doubles whenever a write would
/// overflow it, so the digested length is the smallest `32 * 2^k >= written`.
pub fn legacy_padded_len(written: usize) -> usize {
    let mut capacity = LEGACY_INITIAL_CAPACITY;
    while capacity < written {
        capacity <<= 1;
    }
    capacity
}

/// Accumulates block digests; renders either the written bytes or the padded capacity.
struct BlockDigestBuffer {
    data: Vec<u8>,
}

impl BlockDigestBuffer {
    fn new() -> Self {
        BlockDigestBuffer {
            data: Vec::with_capacity(LEGACY_INITIAL_CAPACITY),
        }
    }

    fn push(&mut self, digest: &[u8; MD5_LEN]) {
        self.data.extend_from_slice(digest);
    }

    /// Replicate the legacy digest padding.
    fn digest_input(&self, padding: DigestPadding) -> Vec<u8> {
        let mut input = self.data.clone();
        if padding == DigestPadding::Legacy {
            input.resize(legacy_padded_len(self.data.len()), 0);
        }
        input
    }
}

/// Computes composite checksums for local files.
#[derive(Debug, Clone, Copy)]
pub struct ChecksumEngine {
    bytes_per_crc: usize,
    block_size: u64,
    padding: DigestPadding,
}

impl Default for ChecksumEngine {
    fn default() -> Self {
        ChecksumEngine {
            bytes_per_crc: DEFAULT_BYTES_PER_CRC,
            block_size: DEFAULT_BLOCK_SIZE,
            padding: DigestPadding::Legacy,
        }
    }
}

impl ChecksumEngine {
    /// Create an engine for the given chunk and block sizes.
    ///
    /// The block size must be a positive multiple of the chunk size, as it is on
    /// the remote filesystem.
    pub fn new(bytes_per_crc: usize, block_size: u64) -> Result<Self> {
        if bytes_per_crc == 0 || block_size == 0 {
            return Err(EngineError::Config(
                "chunk size and block size must be positive".to_string(),
            ));
        }
        if block_size % bytes_per_crc as u64 != 0 {
            return Err(EngineError::Config(format!(
                "block size {} is not a multiple of chunk size {}",
                block_size, bytes_per_crc
            )));
        }
        Ok(ChecksumEngine {
            bytes_per_crc,
            block_size,
            padding: DigestPadding::Legacy,
        })
    }

    /// Engine for the default chunk size and the given block size.
    pub fn with_block_size(block_size: u64) -> Result<Self> {
        Self::new(DEFAULT_BYTES_PER_CRC, block_size)
    }

    /// Override the whole-file digest padding. Only `Legacy` is comparable with the remote side.
    pub fn with_padding(mut self, padding: DigestPadding) -> Self {
        self.padding = padding;
        self
    }

    pub fn crcs_per_block(&self) -> u64 {
        self.block_size / self.bytes_per_crc as u64
    }

    /// Compute the composite checksum of a local file.
    ///
    /// Any I/O failure yields an error, never a partial checksum.
    pub fn compute(&self, path: &Path) -> Result<CompositeChecksum> {
        let local_io = |source: io::Error| EngineError::LocalIo {
            path: path.to_path_buf(),
            source,
        };

        let metadata = std::fs::metadata(path).map_err(local_io)?;
        if metadata.is_dir() {
            return Err(EngineError::IsADirectory {
                path: path.to_path_buf(),
            });
        }

        let file = File::open(path).map_err(local_io)?;
        self.compute_reader(BufReader::new(file), metadata.len())
            .map_err(local_io)
    }

    /// Compute the composite checksum of the first `len` bytes of `reader`.
    pub fn compute_reader<R: Read>(
        &self,
        mut reader: R,
        len: u64,
    ) -> io::Result<CompositeChecksum> {
        let block_count = len.div_ceil(self.block_size);
        let mut block_digests = BlockDigestBuffer::new();
        let mut chunk = vec![0u8; self.bytes_per_crc];

        for _ in 0..block_count {
            let mut block = (&mut reader).take(self.block_size);
            let mut crcs = Vec::with_capacity(self.crcs_per_block() as usize * 4);
            loop {
                let n = read_chunk(&mut block, &mut chunk)?;
                if n == 0 {
                    break;
                }
                crcs.extend_from_slice(&crc32fast::hash(&chunk[..n]).to_be_bytes());
                if n < chunk.len() {
                    break;
                }
            }
            // The datanode digests exactly the CRC bytes it stored; no padding here.
            block_digests.push(&md5::compute(&crcs).0);
        }

        let file_digest = md5::compute(block_digests.digest_input(self.padding));
        Ok(CompositeChecksum::md5_md5_crc32(
            self.bytes_per_crc,
            self.crcs_per_block(),
            file_digest.0,
        ))
    }
}

/// Fill `buf` from `reader`, stopping early only at end of input.
fn read_chunk<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
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
