// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use thiserror::Error;

/// Unified error type for Authenticode signing, timestamping, injection, and
/// verification.
#[derive(Debug, Error)]
pub enum AuthenticodeError {
    #[error("bad or unknown command line argument: {0}")]
    ArgError(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("file is too short to contain a valid header")]
    FileTooShort,

    #[error("file does not match a known PE/CAB/MSI magic")]
    UnknownFormat,

    #[error("CAB reserve-area flags are already set; unsupported input")]
    CabFlagsUnsupported,

    #[error("PE file does not start with a recognized MZ/PE magic")]
    PeUnknownMagic,

    #[error("PE file has no Certificate Table data directory slot")]
    PeMissingCertDir,

    #[error("PE signature is not located at the end of the file")]
    PeSignatureNotAtEnd,

    #[error("no signature present in file")]
    NoSignaturePresent,

    #[error("failed to load signing key material: {0}")]
    KeyLoadFailed(String),

    #[error("no certificate in the supplied chain matches the private key")]
    SignerSelectionFailed,

    #[error("timestamp transport error: {0}")]
    TimestampTransportError(String),

    #[error("timestamp response was not well-formed: {0}")]
    TimestampFormatError(String),

    #[error("timestamp authority rejected the request (status {0})")]
    TimestampRejected(u8),

    #[error("ASN.1 decode error: {0}")]
    Asn1Decode(#[from] bcder::decode::DecodeError<std::convert::Infallible>),

    #[error("ASN.1 encode error: {0}")]
    Asn1Encode(std::io::Error),

    #[error("unsupported or unrecognized digest algorithm")]
    UnknownDigestAlgorithm,

    #[error("malformed key or certificate container: {0}")]
    ContainerMalformed(String),

    #[error("internal logic error: {0}")]
    LogicError(String),
}

pub type Result<T> = std::result::Result<T, AuthenticodeError>;
