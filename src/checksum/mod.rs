//! Checksum algorithms and resolved checksum requirements.
//!
//! The pipeline decides where a checksum goes (legacy `Content-MD5`, a
//! flexible checksum header, or an aws-chunked trailer); this module supplies
//! the digests and the framing.

pub mod chunked;

use crate::error::ChecksumError;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::fmt;
use std::io::Read;
use std::str::FromStr;

/// Algorithm applied when only the legacy MD5 requirement is present.
pub const DEFAULT_ALGORITHM: ChecksumAlgorithm = ChecksumAlgorithm::Crc32;

/// Supported checksum algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChecksumAlgorithm {
    /// CRC-32 (ISO-HDLC).
    Crc32,
    /// CRC-32C (Castagnoli).
    Crc32c,
    /// SHA-1.
    Sha1,
    /// SHA-256.
    Sha256,
    /// MD5.
    Md5,
}

impl ChecksumAlgorithm {
    /// The algorithm identifier used in request headers.
    pub fn id(&self) -> &'static str {
        match self {
            ChecksumAlgorithm::Crc32 => "CRC32",
            ChecksumAlgorithm::Crc32c => "CRC32C",
            ChecksumAlgorithm::Sha1 => "SHA1",
            ChecksumAlgorithm::Sha256 => "SHA256",
            ChecksumAlgorithm::Md5 => "MD5",
        }
    }

    /// The header that carries this algorithm's checksum.
    pub fn header_name(&self) -> String {
        format!("x-amz-checksum-{}", self.id().to_ascii_lowercase())
    }

    /// Size of the raw digest in bytes.
    pub fn digest_len(&self) -> usize {
        match self {
            ChecksumAlgorithm::Crc32 | ChecksumAlgorithm::Crc32c => 4,
            ChecksumAlgorithm::Sha1 => 20,
            ChecksumAlgorithm::Sha256 => 32,
            ChecksumAlgorithm::Md5 => 16,
        }
    }

    /// Length of the base64-encoded digest.
    pub fn base64_len(&self) -> usize {
        self.digest_len().div_ceil(3) * 4
    }

    /// Start an incremental computation.
    pub fn hasher(&self) -> ChecksumHasher {
        let state = match self {
            ChecksumAlgorithm::Crc32 => HasherState::Crc32(crc32fast::Hasher::new()),
            ChecksumAlgorithm::Crc32c => HasherState::Crc32c(0),
            ChecksumAlgorithm::Sha1 => HasherState::Sha1(Sha1::new()),
            ChecksumAlgorithm::Sha256 => HasherState::Sha256(Sha256::new()),
            ChecksumAlgorithm::Md5 => HasherState::Md5(Md5::new()),
        };
        ChecksumHasher { state }
    }

    /// Digest a buffer and base64-encode the result.
    pub fn digest_base64(&self, data: &[u8]) -> String {
        let mut hasher = self.hasher();
        hasher.update(data);
        hasher.finalize_base64()
    }

    /// Digest everything `reader` yields and base64-encode the result.
    pub fn digest_reader_base64(&self, reader: &mut dyn Read) -> Result<String, ChecksumError> {
        let mut hasher = self.hasher();
        let mut buffer = [0u8; 8192];
        loop {
            let read = reader.read(&mut buffer)?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
        }
        Ok(hasher.finalize_base64())
    }
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for ChecksumAlgorithm {
    type Err = ChecksumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CRC32" => Ok(ChecksumAlgorithm::Crc32),
            "CRC32C" => Ok(ChecksumAlgorithm::Crc32c),
            "SHA1" => Ok(ChecksumAlgorithm::Sha1),
            "SHA256" => Ok(ChecksumAlgorithm::Sha256),
            "MD5" => Ok(ChecksumAlgorithm::Md5),
            _ => Err(ChecksumError::UnsupportedAlgorithm {
                algorithm: s.to_string(),
            }),
        }
    }
}

/// Incremental digest for one [`ChecksumAlgorithm`].
#[derive(Clone)]
pub struct ChecksumHasher {
    state: HasherState,
}

#[derive(Clone)]
enum HasherState {
    Crc32(crc32fast::Hasher),
    Crc32c(u32),
    Sha1(Sha1),
    Sha256(Sha256),
    Md5(Md5),
}

impl ChecksumHasher {
    /// Feed more bytes.
    pub fn update(&mut self, data: &[u8]) {
        match &mut self.state {
            HasherState::Crc32(h) => h.update(data),
            HasherState::Crc32c(crc) => *crc = crc32c::crc32c_append(*crc, data),
            HasherState::Sha1(h) => h.update(data),
            HasherState::Sha256(h) => h.update(data),
            HasherState::Md5(h) => h.update(data),
        }
    }

    /// Finish and return the raw digest.
    pub fn finalize(self) -> Vec<u8> {
        match self.state {
            HasherState::Crc32(h) => h.finalize().to_be_bytes().to_vec(),
            HasherState::Crc32c(crc) => crc.to_be_bytes().to_vec(),
            HasherState::Sha1(h) => h.finalize().to_vec(),
            HasherState::Sha256(h) => h.finalize().to_vec(),
            HasherState::Md5(h) => h.finalize().to_vec(),
        }
    }

    /// Finish and return the base64-encoded digest.
    pub fn finalize_base64(self) -> String {
        BASE64.encode(self.finalize())
    }
}

impl fmt::Debug for ChecksumHasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChecksumHasher").finish_non_exhaustive()
    }
}

/// Resolved description of the checksum a request must carry.
///
/// Produced by the marshalling layer and stored under
/// [`RESOLVED_CHECKSUM_SPECS`](crate::execution::attributes::RESOLVED_CHECKSUM_SPECS).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChecksumSpecs {
    /// Algorithm to compute, if any.
    pub algorithm: Option<ChecksumAlgorithm>,
    /// Header (or trailer) name the checksum is written under.
    pub header_name: Option<String>,
    /// Header announcing the algorithm to the service.
    pub request_algorithm_header: Option<String>,
    /// Whether the payload is streamed, which makes it trailer-eligible.
    pub is_request_streaming: bool,
    /// Whether the operation mandates a request checksum.
    pub is_request_checksum_required: bool,
}

impl ChecksumSpecs {
    /// Specs for the given algorithm, with its standard header name.
    pub fn for_algorithm(algorithm: ChecksumAlgorithm) -> Self {
        Self {
            algorithm: Some(algorithm),
            header_name: Some(algorithm.header_name()),
            ..Default::default()
        }
    }

    /// Set the request algorithm header.
    pub fn with_request_algorithm_header(mut self, header: impl Into<String>) -> Self {
        self.request_algorithm_header = Some(header.into());
        self
    }

    /// Mark the payload as streaming.
    pub fn with_request_streaming(mut self, streaming: bool) -> Self {
        self.is_request_streaming = streaming;
        self
    }

    /// Mark the checksum as mandatory.
    pub fn with_checksum_required(mut self, required: bool) -> Self {
        self.is_request_checksum_required = required;
        self
    }

    /// Copy of these specs with the default algorithm filled in.
    pub fn with_default_algorithm(&self) -> Self {
        Self {
            algorithm: Some(DEFAULT_ALGORITHM),
            header_name: Some(DEFAULT_ALGORITHM.header_name()),
            ..self.clone()
        }
    }
}
