// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! PE-only signature verification (§4.J): re-hash, `WIN_CERTIFICATE` walk,
//! PKCS#7 signature-math-only check (no chain-of-trust, equivalent to
//! OpenSSL's `PKCS7_NOVERIFY`), and page-hash extraction for display.

use crate::{
    asn1::{
        rfc5280::Certificate,
        rfc5652::{SignedData, SignerIdentifier, SignerInfo},
        spc::{
            asn1_simple_hdr_len, SpcAttributeTypeAndOptionalValue, SpcIndirectDataContent,
            SpcLink, OID_SPC_INDIRECT_DATA, OID_SPC_PAGE_HASH_V1, OID_SPC_PAGE_HASH_V2,
        },
    },
    digest::DigestAlgorithm,
    error::AuthenticodeError,
    pe::{self, PeContext},
};

/// Subject/issuer pair for display, shared by signer and chain-certificate
/// reporting.
#[derive(Clone, Debug)]
pub struct CertificateSummary {
    pub subject: String,
    pub issuer: String,
}

impl CertificateSummary {
    fn from_certificate(cert: &Certificate) -> Self {
        Self {
            subject: cert.tbs_certificate.subject.to_display_string(),
            issuer: cert.tbs_certificate.issuer.to_display_string(),
        }
    }
}

/// The page-hash block set embedded in a `SpcPeImageData`, if present.
#[derive(Clone, Debug)]
pub struct PageHash {
    pub digest_alg: DigestAlgorithm,
    pub blob: Vec<u8>,
}

/// The full human-readable report `verify` prints (§4.J).
#[derive(Clone, Debug)]
pub struct VerificationReport {
    pub digest_alg: DigestAlgorithm,
    pub stored_digest: Vec<u8>,
    pub calculated_digest: Vec<u8>,
    pub stored_checksum: u32,
    pub calculated_checksum: u32,
    pub signature_ok: bool,
    pub signers: Vec<CertificateSummary>,
    pub certificates: Vec<CertificateSummary>,
    pub page_hash: Option<PageHash>,
}

impl VerificationReport {
    pub fn digest_matches(&self) -> bool {
        self.stored_digest == self.calculated_digest
    }

    pub fn checksum_matches(&self) -> bool {
        self.stored_checksum == self.calculated_checksum
    }

    /// `true` iff every check this report covers passed; the CLI maps this
    /// to exit code 0 vs. 1 (§8, testable property 1; §7: a digest or
    /// checksum mismatch is verification-only, not a process error).
    pub fn all_ok(&self) -> bool {
        self.digest_matches() && self.checksum_matches() && self.signature_ok
    }
}

/// Verify the Authenticode signature embedded in a PE image `data`.
///
/// Returns [AuthenticodeError::NoSignaturePresent] if the file carries no
/// signature at all (§4.J step 1); any other error means the WIN_CERTIFICATE
/// array or the bundle within it was too malformed to evaluate. A
/// syntactically valid but cryptographically or digest-mismatched signature
/// is *not* an error here -- it comes back as a [VerificationReport] whose
/// `all_ok()` is `false`, matching the "verification mismatches are not
/// process errors" split in the error taxonomy (§7).
pub fn verify(data: &[u8]) -> Result<VerificationReport, AuthenticodeError> {
    let ctx = PeContext::parse(data)?;

    if ctx.sig_offset == 0 || ctx.sig_length == 0 {
        return Err(AuthenticodeError::NoSignaturePresent);
    }

    let entries = pe::win_certificate_entries(data, ctx.sig_offset, ctx.sig_length);

    let (signed_data, indirect) = entries
        .iter()
        .find_map(|entry| {
            let signed_data = SignedData::decode_ber(entry).ok()?;
            if signed_data.content_info.content_type.as_ref() != OID_SPC_INDIRECT_DATA.as_ref() {
                return None;
            }
            let content = signed_data.content_info.content.as_ref()?;
            let indirect = SpcIndirectDataContent::decode_der(content.as_slice()).ok()?;
            Some((signed_data, indirect))
        })
        .ok_or(AuthenticodeError::NoSignaturePresent)?;

    let digest_alg = DigestAlgorithm::from_oid(&indirect.message_digest.digest_algorithm.algorithm)
        .ok_or(AuthenticodeError::UnknownDigestAlgorithm)?;
    let stored_digest = indirect.message_digest.digest.to_bytes().to_vec();

    let calculated_digest = pe::hash_and_rewrite(data, &ctx, digest_alg)?.digest;

    let checksum_offset = ctx.checksum_offset();
    let stored_checksum = u32::from_le_bytes(
        data[checksum_offset..checksum_offset + 4]
            .try_into()
            .map_err(|_| AuthenticodeError::FileTooShort)?,
    );
    let calculated_checksum = pe::recalc_pe_checksum(data, checksum_offset);

    let signer_info = signed_data
        .signer_infos
        .first()
        .ok_or_else(|| AuthenticodeError::ContainerMalformed("no SignerInfo in bundle".into()))?;

    let certificates: Vec<Certificate> = signed_data
        .certificates
        .as_ref()
        .map(|set| set.iter().map(|c| c.certificate().clone()).collect())
        .unwrap_or_default();

    let signature_ok = verify_signer_signature(signer_info, &certificates).unwrap_or(false);

    let signers = find_signer_certificate(signer_info, &certificates)
        .into_iter()
        .map(|c| CertificateSummary::from_certificate(c))
        .collect();
    let cert_summaries = certificates
        .iter()
        .map(CertificateSummary::from_certificate)
        .collect();

    let page_hash = extract_page_hash(&indirect);

    Ok(VerificationReport {
        digest_alg,
        stored_digest,
        calculated_digest,
        stored_checksum,
        calculated_checksum,
        signature_ok,
        signers,
        certificates: cert_summaries,
        page_hash,
    })
}

fn find_signer_certificate<'a>(
    signer_info: &SignerInfo,
    certificates: &'a [Certificate],
) -> Option<&'a Certificate> {
    match &signer_info.sid {
        SignerIdentifier::IssuerAndSerialNumber(id) => certificates.iter().find(|cert| {
            cert.tbs_certificate.issuer == id.issuer
                && cert.tbs_certificate.serial_number == id.serial_number
        }),
        SignerIdentifier::SubjectKeyIdentifier(_) => None,
    }
}

/// RSA-verify `signer_info`'s signature over its signed-attributes digest
/// against the public key of whichever certificate in `certificates`
/// matches its `sid` (§4.J step 5). No chain validation is performed.
fn verify_signer_signature(
    signer_info: &SignerInfo,
    certificates: &[Certificate],
) -> Result<bool, AuthenticodeError> {
    let cert = find_signer_certificate(signer_info, certificates)
        .ok_or(AuthenticodeError::SignerSelectionFailed)?;

    let digest_alg = DigestAlgorithm::from_oid(&signer_info.digest_algorithm.algorithm)
        .ok_or(AuthenticodeError::UnknownDigestAlgorithm)?;

    let signed_bytes = signer_info
        .signed_attributes_digested_content()
        .map_err(AuthenticodeError::Asn1Encode)?
        .ok_or_else(|| {
            AuthenticodeError::ContainerMalformed("SignerInfo carries no signed attributes".into())
        })?;

    let algorithm: &dyn ring::signature::VerificationAlgorithm = match digest_alg {
        DigestAlgorithm::Md5 => return Ok(false),
        DigestAlgorithm::Sha1 => &ring::signature::RSA_PKCS1_2048_8192_SHA1_FOR_LEGACY_USE_ONLY,
        DigestAlgorithm::Sha256 => &ring::signature::RSA_PKCS1_2048_8192_SHA256,
    };

    let spki = &cert.tbs_certificate.subject_public_key_info;
    let public_key_bytes = spki
        .subject_public_key
        .octet_slice()
        .ok_or_else(|| AuthenticodeError::ContainerMalformed("non-octet-aligned SPKI".into()))?;

    let public_key = ring::signature::UnparsedPublicKey::new(algorithm, public_key_bytes);
    let signature = signer_info.signature.to_bytes();

    Ok(public_key.verify(&signed_bytes, &signature).is_ok())
}

/// Extract the page-hash OID/digest embedded in `SpcPeImageData.file`, if
/// the CHOICE is a page-hash moniker (§4.J step 6).
fn extract_page_hash(indirect: &SpcIndirectDataContent) -> Option<PageHash> {
    let pe_image_data = indirect.pe_image_data()?;
    let SpcLink::Moniker(obj) = &pe_image_data.file else {
        return None;
    };
    if !obj.is_page_hash() {
        return None;
    }

    let serialized = obj.serialized_data.to_bytes();
    let hdr1 = asn1_simple_hdr_len(&serialized);
    if hdr1 == 0 || hdr1 > serialized.len() {
        return None;
    }

    let atv = bcder::decode::Constructed::decode(
        &serialized[hdr1..],
        bcder::Mode::Ber,
        |cons| cons.take_sequence(SpcAttributeTypeAndOptionalValue::from_sequence),
    )
    .ok()?;

    let digest_alg = if atv.typ.as_ref() == OID_SPC_PAGE_HASH_V1.as_ref() {
        DigestAlgorithm::Sha1
    } else if atv.typ.as_ref() == OID_SPC_PAGE_HASH_V2.as_ref() {
        DigestAlgorithm::Sha256
    } else {
        return None;
    };

    let value = atv.value?;
    let hdr2 = asn1_simple_hdr_len(&value);
    if hdr2 == 0 || hdr2 > value.len() {
        return None;
    }
    let after_set = &value[hdr2..];
    let hdr3 = asn1_simple_hdr_len(after_set);
    if hdr3 == 0 || hdr3 > after_set.len() {
        return None;
    }

    Some(PageHash {
        digest_alg,
        blob: after_set[hdr3..].to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsigned_pe_reports_no_signature() {
        let mut data = vec![0u8; 64 + 24 + 96 + 8 * 16];
        data[0] = b'M';
        data[1] = b'Z';
        data[60..64].copy_from_slice(&64u32.to_le_bytes());
        data[64 + 24..64 + 26].copy_from_slice(&0x10bu16.to_le_bytes());
        let nrvas_offset = 64 + 116;
        data[nrvas_offset..nrvas_offset + 4].copy_from_slice(&16u32.to_le_bytes());

        let err = verify(&data).unwrap_err();
        assert!(matches!(err, AuthenticodeError::NoSignaturePresent));
    }
}
