// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Microsoft Authenticode signing and verification for PE, CAB, and MSI
//! files, without a dependency on Windows or any OpenSSL/CryptoAPI binding.
//!
//! This crate implements the core of a `signtool`/`osslsigncode`-equivalent
//! tool: computing the format-specific Authenticode digest of an executable,
//! CAB archive, or MSI installer, wrapping it in a PKCS#7 `SignedData`
//! bundle addressed by an `SpcIndirectDataContent`, signing it with an RSA
//! key and X.509 certificate chain, optionally countersigning it with a
//! timestamping authority, and injecting the result back into the file.
//!
//! # Features and Capabilities
//!
//! This crate can:
//!
//! * Classify a file as PE, CAB, or MSI from its magic bytes. (See
//!   [classify::FileKind].)
//! * Compute the Authenticode digest of each format, handling the
//!   format-specific zeroing/adjustment rules the algorithm requires. (See
//!   [pe], [cab], and [msi].)
//! * Build the `SpcIndirectDataContent` envelope and PKCS#7 `SignedData`
//!   bundle, including the Microsoft-specific signed attributes
//!   (`SPC_SP_OPUS_INFO`, `SPC_STATEMENT_TYPE`) that plain RFC 5652 signing
//!   libraries don't produce. (See [indirect_data] and [signing].)
//! * Load signing key material from PKCS#12, SPC+PVK, or SPC+PEM containers.
//!   (See [keys].)
//! * Acquire either a proprietary Authenticode timestamp or an RFC 3161
//!   timestamp and attach it as an unsigned countersignature attribute. (See
//!   [timestamp].)
//! * Verify a PE file's embedded signature: re-hash, re-checksum, and check
//!   the PKCS#7 signature's cryptographic validity (no certificate-chain
//!   trust evaluation). (See [verify].)
//! * Drive a whole directory of files through a single YAML-described batch
//!   job. (See [config].)
//!
//! # Getting Started
//!
//! [engine::sign] is the high-level entry point signing all three formats;
//! [verify::verify] is the entry point for PE verification. The `signcode`
//! binary in this crate wires both, plus [engine::extract_signature] and
//! [engine::remove_signature], to a command-line interface.

pub mod asn1;
pub mod cab;
pub mod classify;
pub mod config;
pub mod digest;
pub mod engine;
mod error;
pub use error::*;
pub mod indirect_data;
pub mod keys;
pub mod msi;
pub mod pe;
pub mod signing;
pub mod timestamp;
pub mod verify;
