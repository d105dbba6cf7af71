// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Assembly of the `SpcIndirectDataContent` envelope (§4.F) from a file kind
//! and digest algorithm, with a zero-filled placeholder digest the Signer
//! later overwrites in place.

use crate::{
    asn1::{
        rfc5280::AlgorithmIdentifier,
        spc::{
            DigestInfo, SpcAttributeTypeAndOptionalValue, SpcIndirectDataContent, SpcLink,
            SpcPeImageData, SpcSipinfo, OID_SPC_CAB_DATA, OID_SPC_PE_IMAGE_DATA, OID_SPC_SIPINFO,
        },
    },
    classify::FileKind,
    digest::DigestAlgorithm,
    error::AuthenticodeError,
};

/// Build the DER of an `SpcIndirectDataContent` for `file_kind`, with
/// `message_digest.digest` filled with `digest_alg.digest_len()` zero bytes.
///
/// The Signer substitutes the real digest into the last `digest_len` bytes
/// of the returned buffer before computing the signature (§4.G step 4).
pub fn build(file_kind: FileKind, digest_alg: DigestAlgorithm) -> Result<Vec<u8>, AuthenticodeError> {
    let placeholder = vec![0u8; digest_alg.digest_len()];

    let data = match file_kind {
        FileKind::Pe => {
            let pe_image_data = SpcPeImageData::placeholder();
            let value = pe_image_data
                .to_der()
                .map_err(AuthenticodeError::Asn1Encode)?;
            SpcAttributeTypeAndOptionalValue::new(OID_SPC_PE_IMAGE_DATA, value)
        }
        FileKind::Cab => {
            let link = SpcLink::obsolete_file();
            let mut value = Vec::new();
            use bcder::encode::Values;
            link.encode_ref()
                .write_encoded(bcder::Mode::Der, &mut value)
                .map_err(AuthenticodeError::Asn1Encode)?;
            SpcAttributeTypeAndOptionalValue::new(OID_SPC_CAB_DATA, value)
        }
        FileKind::Msi => {
            let sipinfo = SpcSipinfo::msi();
            let value = sipinfo.to_der().map_err(AuthenticodeError::Asn1Encode)?;
            SpcAttributeTypeAndOptionalValue::new(OID_SPC_SIPINFO, value)
        }
    };

    let message_digest = DigestInfo {
        digest_algorithm: AlgorithmIdentifier {
            algorithm: digest_alg.oid(),
            parameters: None,
        },
        digest: bcder::OctetString::new(bytes::Bytes::copy_from_slice(&placeholder)),
    };

    let content = SpcIndirectDataContent {
        data,
        message_digest,
    };

    content.to_der().map_err(AuthenticodeError::Asn1Encode)
}

/// Overwrite the trailing `digest.len()` bytes of an `SpcIndirectDataContent`
/// DER blob (as produced by [build]) with the real file digest.
///
/// This relies on `messageDigest.digest` being the last field the encoder
/// writes, which holds for the DER shapes this builder produces.
pub fn substitute_digest(der: &mut [u8], digest: &[u8]) -> Result<(), AuthenticodeError> {
    if digest.len() > der.len() {
        return Err(AuthenticodeError::LogicError(
            "digest larger than indirect-data blob".into(),
        ));
    }
    let start = der.len() - digest.len();
    der[start..].copy_from_slice(digest);
    Ok(())
}

/// Strip the outermost SEQUENCE tag+length header off a DER blob, returning
/// the concatenation of its inner fields (§4.G step 4: "the signed octets
/// are the concatenation of the inner fields").
pub fn strip_outer_sequence(der: &[u8]) -> Result<&[u8], AuthenticodeError> {
    if der.is_empty() || der[0] != 0x30 {
        return Err(AuthenticodeError::LogicError(
            "indirect-data blob does not start with a SEQUENCE tag".into(),
        ));
    }
    let hdr_len = crate::asn1::spc::asn1_simple_hdr_len(der);
    if hdr_len == 0 || hdr_len > der.len() {
        return Err(AuthenticodeError::LogicError(
            "malformed SEQUENCE header on indirect-data blob".into(),
        ));
    }
    Ok(&der[hdr_len..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pe_blob_ends_with_zero_digest() {
        let der = build(FileKind::Pe, DigestAlgorithm::Sha256).unwrap();
        let tail = &der[der.len() - 32..];
        assert_eq!(tail, &[0u8; 32]);
    }

    #[test]
    fn cab_and_msi_blobs_differ_in_content_type() {
        let cab = build(FileKind::Cab, DigestAlgorithm::Sha1).unwrap();
        let msi = build(FileKind::Msi, DigestAlgorithm::Sha1).unwrap();
        assert_ne!(cab, msi);
    }

    #[test]
    fn substitute_digest_overwrites_tail_only() {
        let mut der = build(FileKind::Pe, DigestAlgorithm::Sha1).unwrap();
        let head = der[..der.len() - 20].to_vec();
        let digest = [0xAAu8; 20];
        substitute_digest(&mut der, &digest).unwrap();
        assert_eq!(&der[der.len() - 20..], &digest);
        assert_eq!(&der[..der.len() - 20], head.as_slice());
    }

    #[test]
    fn strip_outer_sequence_removes_only_the_header() {
        let der = build(FileKind::Msi, DigestAlgorithm::Sha1).unwrap();
        let inner = strip_outer_sequence(&der).unwrap();
        assert!(inner.len() < der.len());
        assert_eq!(der.len() - inner.len(), crate::asn1::spc::asn1_simple_hdr_len(&der));
    }
}
