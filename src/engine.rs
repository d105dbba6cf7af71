// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The core signing/verification pipeline (§2 "data flow"): classify, walk
//! (hash + rewrite), build the indirect-data envelope, sign, optionally
//! timestamp, and inject. Both the CLI (`main.rs`) and the YAML batch runner
//! (`config.rs`) drive a file through this module rather than duplicating
//! the per-format plumbing.

use crate::{
    cab, classify::FileKind, digest::DigestAlgorithm, error::AuthenticodeError, keys::KeyMaterial,
    msi, pe, signing::SigningOptions, timestamp,
};

/// Which (if any) timestamp authority to contact after signing (§4.H).
#[derive(Clone, Debug, Default)]
pub enum TimestampRequest {
    #[default]
    None,
    Authenticode { url: String, proxy: Option<String> },
    Rfc3161 { url: String, proxy: Option<String> },
}

/// Everything [sign] needs beyond the input bytes themselves.
pub struct SignRequest<'a> {
    pub digest_alg: DigestAlgorithm,
    pub key_material: &'a KeyMaterial,
    pub options: SigningOptions,
    pub timestamp: TimestampRequest,
}

/// Sign `input` (a PE, CAB, or MSI image) per `request`, returning the
/// rewritten file with the Authenticode signature injected.
pub fn sign(input: &[u8], request: &SignRequest) -> Result<Vec<u8>, AuthenticodeError> {
    let kind = FileKind::detect(input)?;

    let (digest, mut output) = match kind {
        FileKind::Pe => {
            let ctx = pe::PeContext::parse(input)?;
            let walked = pe::hash_and_rewrite(input, &ctx, request.digest_alg)?;
            (walked.digest, walked.output)
        }
        FileKind::Cab => {
            let ctx = cab::CabContext::parse(input)?;
            let walked = cab::hash_and_rewrite(input, &ctx, request.digest_alg)?;
            (walked.digest, walked.output)
        }
        FileKind::Msi => {
            let walked = msi::hash_and_rewrite(input, request.digest_alg)?;
            (walked.digest, walked.output)
        }
    };

    let mut signature_der = crate::signing::sign(
        kind,
        &digest,
        request.digest_alg,
        request.key_material,
        &request.options,
    )?;

    match &request.timestamp {
        TimestampRequest::None => {}
        TimestampRequest::Authenticode { url, proxy } => {
            signature_der = timestamp::apply_authenticode_timestamp(
                &signature_der,
                url,
                proxy.as_deref(),
            )?;
        }
        TimestampRequest::Rfc3161 { url, proxy } => {
            signature_der = timestamp::apply_rfc3161_timestamp(
                &signature_der,
                url,
                request.digest_alg,
                proxy.as_deref(),
            )?;
        }
    }

    match kind {
        FileKind::Pe => {
            let ctx = pe::PeContext::parse(input)?;
            pe::inject(&mut output, &ctx, &signature_der)?;
            Ok(output)
        }
        FileKind::Cab => {
            cab::inject(&mut output, &signature_der)?;
            Ok(output)
        }
        FileKind::Msi => msi::inject(output, &signature_der),
    }
}

/// `extract-signature`: PE only (§6).
pub fn extract_signature(input: &[u8]) -> Result<Vec<u8>, AuthenticodeError> {
    let kind = FileKind::detect(input)?;
    if kind != FileKind::Pe {
        return Err(AuthenticodeError::ArgError(
            "extract-signature only supports PE files".into(),
        ));
    }
    let ctx = pe::PeContext::parse(input)?;
    pe::extract_signature(input, &ctx)
}

/// `remove-signature`: PE only (§6).
pub fn remove_signature(input: &[u8]) -> Result<Vec<u8>, AuthenticodeError> {
    let kind = FileKind::detect(input)?;
    if kind != FileKind::Pe {
        return Err(AuthenticodeError::ArgError(
            "remove-signature only supports PE files".into(),
        ));
    }
    let ctx = pe::PeContext::parse(input)?;
    pe::remove_signature(input, &ctx)
}
