// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Digest algorithm selection and the chunked hashing sink used by the PE,
//! CAB, and MSI walkers.

use {
    crate::error::AuthenticodeError,
    digest::Digest,
    std::io::{Read, Write},
};

/// A digest algorithm supported by the Authenticode signer and verifier.
///
/// The default is SHA-1, matching the reference tool's behavior when no
/// `-h` flag is given.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum DigestAlgorithm {
    Md5,
    Sha1,
    Sha256,
}

impl Default for DigestAlgorithm {
    fn default() -> Self {
        Self::Sha1
    }
}

impl DigestAlgorithm {
    /// Parse the `-h` flag's argument.
    pub fn from_cli_value(value: &str) -> Result<Self, AuthenticodeError> {
        match value {
            "md5" => Ok(Self::Md5),
            "sha1" => Ok(Self::Sha1),
            "sha2" | "sha256" => Ok(Self::Sha256),
            other => Err(AuthenticodeError::ArgError(format!(
                "unknown digest algorithm `{}`",
                other
            ))),
        }
    }

    /// Number of bytes a digest of this algorithm occupies.
    pub const fn digest_len(self) -> usize {
        match self {
            Self::Md5 => 16,
            Self::Sha1 => 20,
            Self::Sha256 => 32,
        }
    }

    /// The `digestAlgorithm` OID used in `AlgorithmIdentifier` values.
    pub fn oid(self) -> bcder::Oid<bytes::Bytes> {
        let bytes: &[u8] = match self {
            Self::Md5 => &[42, 134, 72, 134, 247, 13, 2, 5],
            Self::Sha1 => &[43, 14, 3, 2, 26],
            Self::Sha256 => &[96, 134, 72, 1, 101, 3, 4, 2, 1],
        };
        bcder::Oid(bytes::Bytes::copy_from_slice(bytes))
    }

    /// Map a digest algorithm OID back to a [DigestAlgorithm], if recognized.
    pub fn from_oid(oid: &bcder::Oid<bytes::Bytes>) -> Option<Self> {
        [Self::Md5, Self::Sha1, Self::Sha256]
            .into_iter()
            .find(|alg| alg.oid().as_ref() == oid.as_ref())
    }

    /// Create a fresh streaming hasher for this algorithm.
    pub fn digester(self) -> Hasher {
        match self {
            Self::Md5 => Hasher::Md5(md5::Md5::new()),
            Self::Sha1 => Hasher::Sha1(sha1::Sha1::new()),
            Self::Sha256 => Hasher::Sha256(sha2::Sha256::new()),
        }
    }

    /// One-shot digest of a byte slice.
    pub fn hash(self, data: &[u8]) -> Vec<u8> {
        let mut h = self.digester();
        h.update(data);
        h.finish()
    }
}

/// A streaming digest over one of the three supported algorithms.
pub enum Hasher {
    Md5(md5::Md5),
    Sha1(sha1::Sha1),
    Sha256(sha2::Sha256),
}

impl Hasher {
    pub fn update(&mut self, data: &[u8]) {
        match self {
            Self::Md5(h) => h.update(data),
            Self::Sha1(h) => h.update(data),
            Self::Sha256(h) => h.update(data),
        }
    }

    pub fn finish(self) -> Vec<u8> {
        match self {
            Self::Md5(h) => h.finalize().to_vec(),
            Self::Sha1(h) => h.finalize().to_vec(),
            Self::Sha256(h) => h.finalize().to_vec(),
        }
    }
}

/// Size of the chunked reads performed by [copy_hashed]. Replaces the
/// reference tool's static 16 MiB scratch buffer with a small fixed-size
/// window; the size is an implementation choice, not part of the digest
/// contract.
const CHUNK_SIZE: usize = 8192;

/// Read `len` bytes from `reader`, feeding them to `hasher` and, if `writer`
/// is given, copying them onward. This is the "hashing sink" the walkers use
/// to move bytes from input to digest (and, when signing, to output) in one
/// pass.
pub fn copy_hashed<R: Read, W: Write>(
    reader: &mut R,
    writer: Option<&mut W>,
    hasher: &mut Hasher,
    len: u64,
) -> Result<(), AuthenticodeError> {
    let mut writer = writer;
    let mut remaining = len;
    let mut buf = [0u8; CHUNK_SIZE];

    while remaining > 0 {
        let want = remaining.min(CHUNK_SIZE as u64) as usize;
        reader.read_exact(&mut buf[..want])?;
        hasher.update(&buf[..want]);
        if let Some(w) = writer.as_mut() {
            w.write_all(&buf[..want])?;
        }
        remaining -= want as u64;
    }

    Ok(())
}

/// Feed `count` zero bytes to `hasher` and, if `writer` is given, write them
/// too. Used for the checksum/cert-dir zeroing and 8-byte alignment padding.
pub fn pad_hashed<W: Write>(
    writer: Option<&mut W>,
    hasher: &mut Hasher,
    count: usize,
) -> Result<(), AuthenticodeError> {
    let zeros = [0u8; 8];
    let mut writer = writer;
    let mut remaining = count;

    while remaining > 0 {
        let want = remaining.min(zeros.len());
        hasher.update(&zeros[..want]);
        if let Some(w) = writer.as_mut() {
            w.write_all(&zeros[..want])?;
        }
        remaining -= want;
    }

    Ok(())
}
