// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! PKCS#7 `SignedData` assembly: the Microsoft signed attributes, signer
//! selection, and RSA signing (§4.G). Deliberately does not reuse a stock
//! CMS signing builder — Microsoft's Authenticode verifier rejects a signer
//! that carries a `signingTime` signed attribute, and the signed-attribute
//! set built here simply never includes one.

use {
    crate::{
        asn1::{
            rfc5280::{AlgorithmIdentifier, Certificate},
            rfc5652::{
                Attribute, CertificateChoices, CertificateSet, CmsVersion,
                DigestAlgorithmIdentifiers, EncapsulatedContentInfo, IssuerAndSerialNumber,
                SignedAttributes, SignedData, SignerIdentifier, SignerInfo, SignerInfos,
                OID_CONTENT_TYPE, OID_MESSAGE_DIGEST,
            },
            spc::{
                SpcLink, SpcSpOpusInfo, SpcString, OID_SPC_INDIRECT_DATA,
                OID_SPC_MS_JAVA_SOMETHING, OID_SPC_SP_OPUS_INFO, OID_SPC_STATEMENT_TYPE,
            },
        },
        classify::FileKind,
        digest::DigestAlgorithm,
        error::AuthenticodeError,
        indirect_data,
        keys::KeyMaterial,
    },
    bcder::{encode::Values, Captured, ConstOid, Mode, Oid, OctetString},
    ring::{rand::SystemRandom, signature},
};

/// The Java permission level for `-jp` (§4.G step 2). Only `Low` carries
/// attribute bytes in this implementation; `Medium`/`High` are rejected
/// rather than silently accepted with an empty payload (spec §9, a
/// deliberate bug-fix over the reference tool).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum JavaPermissionLevel {
    Low,
    Medium,
    High,
}

impl JavaPermissionLevel {
    pub fn from_cli_value(value: &str) -> Result<Self, AuthenticodeError> {
        match value {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(AuthenticodeError::ArgError(format!(
                "unknown java permission level `{}`",
                other
            ))),
        }
    }
}

/// The statement type attached via `SPC_STATEMENT_TYPE` (§4.G step 2).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StatementType {
    Individual,
    Commercial,
}

/// Everything the signer needs beyond the file digest and key material.
#[derive(Clone, Debug, Default)]
pub struct SigningOptions {
    pub description: Option<String>,
    pub url: Option<String>,
    pub java_level: Option<JavaPermissionLevel>,
    pub commercial: bool,
}

fn owned_oid(c: ConstOid) -> Oid {
    Oid(bytes::Bytes::copy_from_slice(c.as_ref()))
}

/// Build the literal DER for the `SPC_STATEMENT_TYPE` signed attribute
/// value: `SEQUENCE { OID individual-or-commercial }` (§4.G step 2). The
/// reference tool emits this as a fixed byte sequence rather than building
/// it structurally; this module does the same since the encoding never
/// varies.
fn statement_type_der(statement: StatementType) -> Vec<u8> {
    let last = match statement {
        StatementType::Individual => 0x15,
        StatementType::Commercial => 0x16,
    };
    vec![
        0x30, 0x0C, 0x06, 0x0A, 0x2B, 0x06, 0x01, 0x04, 0x01, 0x82, 0x37, 0x02, 0x01, last,
    ]
}

/// The fixed DER for `SPC_MS_JAVA_SOMETHING` at `-jp low` (§4.G step 2).
const JAVA_LOW_DER: [u8; 8] = [0x30, 0x06, 0x03, 0x02, 0x00, 0x01, 0x30, 0x00];

fn build_opus_info_der(
    description: Option<&str>,
    url: Option<&str>,
) -> Result<Vec<u8>, AuthenticodeError> {
    let opus = SpcSpOpusInfo {
        program_name: description.map(SpcString::ascii),
        more_info: url.map(SpcLink::url),
    };
    opus.to_der().map_err(AuthenticodeError::Asn1Encode)
}

fn der_encode(values: impl Values) -> Result<Vec<u8>, AuthenticodeError> {
    let mut buf = Vec::new();
    values
        .write_encoded(Mode::Der, &mut buf)
        .map_err(AuthenticodeError::Asn1Encode)?;
    Ok(buf)
}

/// Assemble a freshly-signed PKCS#7 `SignedData` bundle for `file_kind` over
/// `file_digest`, using `key_material` and `options`. The returned bytes are
/// the DER of the outer `ContentInfo` (`contentType = id-signedData`),
/// ready to be written into a `WIN_CERTIFICATE`/CAB-reserve/MSI-stream slot.
pub fn sign(
    file_kind: FileKind,
    file_digest: &[u8],
    digest_alg: DigestAlgorithm,
    key_material: &KeyMaterial,
    options: &SigningOptions,
) -> Result<Vec<u8>, AuthenticodeError> {
    if file_kind == FileKind::Cab {
        if let Some(level) = options.java_level {
            if level != JavaPermissionLevel::Low {
                return Err(AuthenticodeError::ArgError(
                    "`-jp medium` and `-jp high` are not supported; only `-jp low` carries attribute bytes"
                        .into(),
                ));
            }
        }
    }

    let mut indirect_data_der = indirect_data::build(file_kind, digest_alg)?;
    indirect_data::substitute_digest(&mut indirect_data_der, file_digest)?;
    let signed_octets = indirect_data::strip_outer_sequence(&indirect_data_der)?.to_vec();

    let mut signed_attrs = vec![Attribute::single_der(
        OID_CONTENT_TYPE,
        der_encode(OID_SPC_INDIRECT_DATA.encode_ref())?,
    )];

    let statement = if options.commercial {
        StatementType::Commercial
    } else {
        StatementType::Individual
    };
    signed_attrs.push(Attribute::single_der(
        OID_SPC_STATEMENT_TYPE,
        statement_type_der(statement),
    ));

    if file_kind == FileKind::Cab && options.java_level == Some(JavaPermissionLevel::Low) {
        signed_attrs.push(Attribute::single_der(
            OID_SPC_MS_JAVA_SOMETHING,
            JAVA_LOW_DER.to_vec(),
        ));
    }

    if options.description.is_some() || options.url.is_some() {
        let opus_der = build_opus_info_der(options.description.as_deref(), options.url.as_deref())?;
        signed_attrs.push(Attribute::single_der(OID_SPC_SP_OPUS_INFO, opus_der));
    }

    let message_digest = digest_alg.hash(&signed_octets);
    signed_attrs.push(Attribute::single_der(
        OID_MESSAGE_DIGEST,
        der_encode(OctetString::new(bytes::Bytes::copy_from_slice(&message_digest)).encode_ref())?,
    ));

    let signed_attributes = SignedAttributes(signed_attrs);
    let signed_attributes_digest_input = der_encode(signed_attributes.encode_ref())?;

    let signature_bytes = rsa_sign(
        &key_material.rsa_key_pair,
        digest_alg,
        &signed_attributes_digest_input,
    )?;

    let sid = SignerIdentifier::IssuerAndSerialNumber(IssuerAndSerialNumber {
        issuer: key_material.certificate.tbs_certificate.issuer.clone(),
        serial_number: key_material.certificate.tbs_certificate.serial_number.clone(),
    });

    let signer_info = SignerInfo {
        version: CmsVersion::V1,
        sid,
        digest_algorithm: AlgorithmIdentifier {
            algorithm: digest_alg.oid(),
            parameters: None,
        },
        signed_attributes: Some(signed_attributes),
        signature_algorithm: AlgorithmIdentifier {
            algorithm: rsa_encryption_oid(),
            parameters: None,
        },
        signature: OctetString::new(bytes::Bytes::from(signature_bytes)),
        unsigned_attributes: None,
        signed_attributes_data: None,
    };

    let mut certificates = CertificateSet::default();
    // Installed in reverse order to match the reference tool's emission
    // order (§4.G step 3).
    for cert in key_material.chain.iter().rev() {
        certificates.push(CertificateChoices::Certificate(Box::new(cert.clone())));
    }
    certificates.push(CertificateChoices::Certificate(Box::new(
        key_material.certificate.clone(),
    )));

    let mut signer_infos = SignerInfos::default();
    signer_infos.push(signer_info);

    let mut digest_algorithms = DigestAlgorithmIdentifiers::default();
    digest_algorithms.push(AlgorithmIdentifier {
        algorithm: digest_alg.oid(),
        parameters: None,
    });

    let signed_data = SignedData {
        version: CmsVersion::V1,
        digest_algorithms,
        content_info: EncapsulatedContentInfo {
            content_type: owned_oid(OID_SPC_INDIRECT_DATA),
            content: Some(Captured::from_values(
                Mode::Der,
                RawDer(indirect_data_der),
            )),
        },
        certificates: Some(certificates),
        signer_infos,
    };

    // `SignedData::encode_ref` already emits the full `ContentInfo { id-signedData, [0] ... }`
    // envelope, so its DER is the final output.
    signed_data.to_der().map_err(AuthenticodeError::Asn1Encode)
}

/// A pre-encoded DER value inserted verbatim at a `Captured` position.
struct RawDer(Vec<u8>);

impl Values for RawDer {
    fn encoded_len(&self, _mode: Mode) -> usize {
        self.0.len()
    }

    fn write_encoded<W: std::io::Write>(&self, _mode: Mode, target: &mut W) -> std::io::Result<()> {
        target.write_all(&self.0)
    }
}

fn rsa_encryption_oid() -> Oid {
    Oid(bytes::Bytes::copy_from_slice(&[
        42, 134, 72, 134, 247, 13, 1, 1, 1,
    ]))
}

fn rsa_sign(
    key_pair: &signature::RsaKeyPair,
    digest_alg: DigestAlgorithm,
    data: &[u8],
) -> Result<Vec<u8>, AuthenticodeError> {
    let encoding: &dyn signature::RsaEncoding = match digest_alg {
        DigestAlgorithm::Md5 => return Err(AuthenticodeError::UnknownDigestAlgorithm),
        DigestAlgorithm::Sha1 => &signature::RSA_PKCS1_SHA1_FOR_LEGACY_USE_ONLY,
        DigestAlgorithm::Sha256 => &signature::RSA_PKCS1_SHA256,
    };

    let rng = SystemRandom::new();
    let mut signature_bytes = vec![0u8; key_pair.public_modulus_len()];
    key_pair
        .sign(encoding, &rng, data, &mut signature_bytes)
        .map_err(|_| AuthenticodeError::LogicError("RSA signing operation failed".into()))?;

    Ok(signature_bytes)
}

/// The certificate the signer actually used, for callers that want to print
/// subject/issuer information after signing.
pub fn signer_certificate(key_material: &KeyMaterial) -> &Certificate {
    &key_material.certificate
}
