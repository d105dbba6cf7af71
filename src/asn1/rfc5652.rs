// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A minimal RFC 5652 (CMS) subset: `ContentInfo`/`SignedData`/`SignerInfo` and
//! the handful of attribute/certificate-set types the Authenticode signer and
//! verifier actually touch. `EnvelopedData`/`AuthenticatedData`/`RevocationInfoChoices`
//! and friends have no Authenticode use and are dropped.

use {
    crate::asn1::{
        common::{write_der_length, RawDer},
        rfc5280::{AlgorithmIdentifier, Certificate, Name},
    },
    bcder::{
        decode::{Constructed, ContentError, Source},
        encode,
        encode::{PrimitiveContent, Values},
        Captured, ConstOid, Integer, Mode, OctetString, Oid, Tag,
    },
    std::{
        io::Write,
        ops::{Deref, DerefMut},
    },
};

/// `id-data`, 1.2.840.113549.1.7.1.
pub const OID_ID_DATA: ConstOid = Oid(&[42, 134, 72, 134, 247, 13, 1, 7, 1]);

/// `id-signedData`, 1.2.840.113549.1.7.2.
pub const OID_ID_SIGNED_DATA: ConstOid = Oid(&[42, 134, 72, 134, 247, 13, 1, 7, 2]);

/// `contentType` attribute, 1.2.840.113549.1.9.3.
pub const OID_CONTENT_TYPE: ConstOid = Oid(&[42, 134, 72, 134, 247, 13, 1, 9, 3]);

/// `messageDigest` attribute, 1.2.840.113549.1.9.4.
pub const OID_MESSAGE_DIGEST: ConstOid = Oid(&[42, 134, 72, 134, 247, 13, 1, 9, 4]);

/// `signingTime` attribute, 1.2.840.113549.1.9.5. Authenticode verifiers
/// reject its presence; this crate never constructs it (see signing.rs).
pub const OID_SIGNING_TIME: ConstOid = Oid(&[42, 134, 72, 134, 247, 13, 1, 9, 5]);

/// `countersignature` attribute, 1.2.840.113549.1.9.6.
pub const OID_COUNTER_SIGNATURE: ConstOid = Oid(&[42, 134, 72, 134, 247, 13, 1, 9, 6]);

/// ```ASN.1
/// ContentInfo ::= SEQUENCE {
///   contentType ContentType,
///   content [0] EXPLICIT ANY DEFINED BY contentType }
/// ```
#[derive(Clone, Debug)]
pub struct ContentInfo {
    pub content_type: ContentType,
    pub content: Captured,
}

impl ContentInfo {
    pub fn take_from<S: Source>(cons: &mut Constructed<S>) -> Result<Self, S::Err> {
        cons.take_sequence(Self::from_sequence)
    }

    pub fn take_opt_from<S: Source>(cons: &mut Constructed<S>) -> Result<Option<Self>, S::Err> {
        cons.take_opt_sequence(Self::from_sequence)
    }

    pub fn from_sequence<S: Source>(cons: &mut Constructed<S>) -> Result<Self, S::Err> {
        let content_type = ContentType::take_from(cons)?;
        let content = cons.take_constructed_if(Tag::CTX_0, |cons| cons.capture_all())?;

        Ok(Self {
            content_type,
            content,
        })
    }

    pub fn encode_ref(&self) -> impl Values + '_ {
        encode::sequence((
            self.content_type.encode_ref(),
            encode::sequence_as(Tag::CTX_0, &self.content),
        ))
    }
}

/// ```ASN.1
/// SignedData ::= SEQUENCE {
///   version CMSVersion,
///   digestAlgorithms DigestAlgorithmIdentifiers,
///   encapContentInfo EncapsulatedContentInfo,
///   certificates [0] IMPLICIT CertificateSet OPTIONAL,
///   crls [1] IMPLICIT RevocationInfoChoices OPTIONAL,
///   signerInfos SignerInfos }
/// ```
#[derive(Clone, Debug)]
pub struct SignedData {
    pub version: CmsVersion,
    pub digest_algorithms: DigestAlgorithmIdentifiers,
    pub content_info: EncapsulatedContentInfo,
    pub certificates: Option<CertificateSet>,
    pub signer_infos: SignerInfos,
}

impl SignedData {
    /// Decode a full `ContentInfo`-wrapped `SignedData` (as found in a PE
    /// `WIN_CERTIFICATE` entry).
    pub fn decode_ber(data: &[u8]) -> Result<Self, bcder::decode::DecodeError<std::convert::Infallible>> {
        Constructed::decode(data, bcder::Mode::Ber, |cons| {
            cons.take_sequence(|cons| {
                let oid = Oid::take_from(cons)?;
                if oid != OID_ID_SIGNED_DATA {
                    return Err(ContentError::from("not a SignedData contentType").into());
                }
                cons.take_constructed_if(Tag::CTX_0, Self::take_from)
            })
        })
    }

    pub fn take_from<S: Source>(cons: &mut Constructed<S>) -> Result<Self, S::Err> {
        cons.take_sequence(|cons| {
            let version = CmsVersion::take_from(cons)?;
            let digest_algorithms = DigestAlgorithmIdentifiers::take_from(cons)?;
            let content_info = EncapsulatedContentInfo::take_from(cons)?;
            let certificates =
                cons.take_opt_constructed_if(Tag::CTX_0, |cons| CertificateSet::take_from(cons))?;
            // crls: not produced or consumed by Authenticode; skip if present.
            let _ = cons.take_opt_constructed_if(Tag::CTX_1, |cons| cons.capture_all())?;
            let signer_infos = SignerInfos::take_from(cons)?;

            Ok(Self {
                version,
                digest_algorithms,
                content_info,
                certificates,
                signer_infos,
            })
        })
    }

    pub fn encode_ref(&self) -> impl Values + '_ {
        encode::sequence((
            OID_ID_SIGNED_DATA.encode_ref(),
            encode::sequence_as(
                Tag::CTX_0,
                encode::sequence((
                    self.version.encode(),
                    self.digest_algorithms.encode_ref(),
                    self.content_info.encode_ref(),
                    self.certificates
                        .as_ref()
                        .map(|certs| certs.encode_ref_as(Tag::CTX_0)),
                    self.signer_infos.encode_ref(),
                )),
            ),
        ))
    }

    pub fn to_der(&self) -> Result<Vec<u8>, std::io::Error> {
        let mut out = Vec::new();
        self.encode_ref().write_encoded(Mode::Der, &mut out)?;
        Ok(out)
    }
}

/// ```ASN.1
/// DigestAlgorithmIdentifiers ::= SET OF DigestAlgorithmIdentifier
/// ```
#[derive(Clone, Debug, Default)]
pub struct DigestAlgorithmIdentifiers(Vec<DigestAlgorithmIdentifier>);

impl Deref for DigestAlgorithmIdentifiers {
    type Target = Vec<DigestAlgorithmIdentifier>;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for DigestAlgorithmIdentifiers {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl DigestAlgorithmIdentifiers {
    pub fn take_from<S: Source>(cons: &mut Constructed<S>) -> Result<Self, S::Err> {
        cons.take_set(|cons| {
            let mut identifiers = Vec::new();
            while let Some(id) = AlgorithmIdentifier::take_opt_from(cons)? {
                identifiers.push(id);
            }
            Ok(Self(identifiers))
        })
    }

    pub fn encode_ref(&self) -> impl Values + '_ {
        encode::set(&self.0)
    }
}

pub type DigestAlgorithmIdentifier = AlgorithmIdentifier;
pub type SignatureAlgorithmIdentifier = AlgorithmIdentifier;

/// ```ASN.1
/// SignerInfos ::= SET OF SignerInfo
/// ```
#[derive(Clone, Debug, Default)]
pub struct SignerInfos(Vec<SignerInfo>);

impl Deref for SignerInfos {
    type Target = Vec<SignerInfo>;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for SignerInfos {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl SignerInfos {
    pub fn take_from<S: Source>(cons: &mut Constructed<S>) -> Result<Self, S::Err> {
        cons.take_set(|cons| {
            let mut infos = Vec::new();
            while let Some(info) = SignerInfo::take_opt_from(cons)? {
                infos.push(info);
            }
            Ok(Self(infos))
        })
    }

    pub fn encode_ref(&self) -> impl Values + '_ {
        encode::set(encode::slice(&self.0, |x| x.encode_ref()))
    }
}

/// ```ASN.1
/// EncapsulatedContentInfo ::= SEQUENCE {
///   eContentType ContentType,
///   eContent [0] EXPLICIT OCTET STRING OPTIONAL }
/// ```
#[derive(Clone, Debug)]
pub struct EncapsulatedContentInfo {
    pub content_type: ContentType,
    pub content: Option<Captured>,
}

impl EncapsulatedContentInfo {
    pub fn take_from<S: Source>(cons: &mut Constructed<S>) -> Result<Self, S::Err> {
        cons.take_sequence(|cons| {
            let content_type = ContentType::take_from(cons)?;
            let content = cons.take_opt_constructed_if(Tag::CTX_0, |cons| cons.capture_all())?;

            Ok(Self {
                content_type,
                content,
            })
        })
    }

    pub fn encode_ref(&self) -> impl Values + '_ {
        encode::sequence((
            self.content_type.encode_ref(),
            self.content
                .as_ref()
                .map(|content| encode::sequence_as(Tag::CTX_0, content)),
        ))
    }
}

/// ```ASN.1
/// SignerInfo ::= SEQUENCE {
///   version CMSVersion,
///   sid SignerIdentifier,
///   digestAlgorithm DigestAlgorithmIdentifier,
///   signedAttrs [0] IMPLICIT SignedAttributes OPTIONAL,
///   signatureAlgorithm SignatureAlgorithmIdentifier,
///   signature SignatureValue,
///   unsignedAttrs [1] IMPLICIT UnsignedAttributes OPTIONAL }
/// ```
#[derive(Clone, Debug)]
pub struct SignerInfo {
    pub version: CmsVersion,
    pub sid: SignerIdentifier,
    pub digest_algorithm: DigestAlgorithmIdentifier,
    pub signed_attributes: Option<SignedAttributes>,
    pub signature_algorithm: SignatureAlgorithmIdentifier,
    pub signature: SignatureValue,
    pub unsigned_attributes: Option<UnsignedAttributes>,

    /// Raw DER bytes of the signed-attributes SET (not the `[0]` wrapper),
    /// stashed on decode so re-verification digests the exact bytes that
    /// were actually signed rather than a possibly-nonidentical re-encoding.
    pub signed_attributes_data: Option<Vec<u8>>,
}

impl SignerInfo {
    pub fn take_opt_from<S: Source>(cons: &mut Constructed<S>) -> Result<Option<Self>, S::Err> {
        cons.take_opt_sequence(Self::from_sequence)
    }

    pub fn from_sequence<S: Source>(cons: &mut Constructed<S>) -> Result<Self, S::Err> {
        let version = CmsVersion::take_from(cons)?;
        let sid = SignerIdentifier::take_from(cons)?;
        let digest_algorithm = DigestAlgorithmIdentifier::take_from(cons)?;

        let signed = cons.take_opt_constructed_if(Tag::CTX_0, |cons| {
            let der = cons.capture_all()?;
            let data = der.as_slice().to_vec();
            let attrs = Constructed::decode(der.as_slice(), bcder::Mode::Der, |cons| {
                SignedAttributes::take_from_set(cons)
            })?;
            Ok((attrs, data))
        })?;
        let (signed_attributes, signed_attributes_data) = match signed {
            Some((attrs, data)) => (Some(attrs), Some(data)),
            None => (None, None),
        };

        let signature_algorithm = SignatureAlgorithmIdentifier::take_from(cons)?;
        let signature = SignatureValue::take_from(cons)?;
        let unsigned_attributes = cons
            .take_opt_constructed_if(Tag::CTX_1, |cons| UnsignedAttributes::take_from_set(cons))?;

        Ok(Self {
            version,
            sid,
            digest_algorithm,
            signed_attributes,
            signature_algorithm,
            signature,
            unsigned_attributes,
            signed_attributes_data,
        })
    }

    pub fn encode_ref(&self) -> impl Values + '_ {
        encode::sequence((
            u8::from(self.version).encode(),
            &self.sid,
            self.digest_algorithm.encode_ref(),
            self.signed_attributes
                .as_ref()
                .map(|attrs| attrs.encode_ref_as(Tag::CTX_0)),
            self.signature_algorithm.encode_ref(),
            self.signature.encode_ref(),
            self.unsigned_attributes
                .as_ref()
                .map(|attrs| attrs.encode_ref_as(Tag::CTX_1)),
        ))
    }

    pub fn to_der(&self) -> Result<Vec<u8>, std::io::Error> {
        let mut out = Vec::new();
        self.encode_ref().write_encoded(Mode::Der, &mut out)?;
        Ok(out)
    }

    /// The exact octets that are digested to produce the RSA signature: the
    /// DER encoding of the signed-attributes value using an EXPLICIT `SET OF`
    /// tag rather than the IMPLICIT `[0]` the on-wire encoding uses (RFC 5652
    /// §5.4). Returns `None` if there are no signed attributes.
    pub fn signed_attributes_digested_content(&self) -> Result<Option<Vec<u8>>, std::io::Error> {
        let Some(attrs) = &self.signed_attributes else {
            return Ok(None);
        };

        if let Some(existing) = &self.signed_attributes_data {
            let mut buf = Vec::with_capacity(existing.len() + 4);
            buf.write_all(&[0x31])?;
            write_der_length(&mut buf, existing.len())?;
            buf.write_all(existing)?;
            Ok(Some(buf))
        } else {
            let mut der = Vec::new();
            attrs.encode_ref().write_encoded(Mode::Der, &mut der)?;
            Ok(Some(der))
        }
    }
}

/// ```ASN.1
/// SignerIdentifier ::= CHOICE {
///   issuerAndSerialNumber IssuerAndSerialNumber,
///   subjectKeyIdentifier [0] SubjectKeyIdentifier }
/// ```
#[derive(Clone, Debug)]
pub enum SignerIdentifier {
    IssuerAndSerialNumber(IssuerAndSerialNumber),
    SubjectKeyIdentifier(OctetString),
}

impl SignerIdentifier {
    pub fn take_from<S: Source>(cons: &mut Constructed<S>) -> Result<Self, S::Err> {
        if let Some(id) =
            cons.take_opt_constructed_if(Tag::CTX_0, |cons| OctetString::take_from(cons))?
        {
            Ok(Self::SubjectKeyIdentifier(id))
        } else {
            Ok(Self::IssuerAndSerialNumber(IssuerAndSerialNumber::take_from(
                cons,
            )?))
        }
    }

}

impl Values for SignerIdentifier {
    fn encoded_len(&self, mode: Mode) -> usize {
        match self {
            Self::IssuerAndSerialNumber(v) => v.encode_ref().encoded_len(mode),
            Self::SubjectKeyIdentifier(v) => {
                encode::sequence_as(Tag::CTX_0, v.encode_ref()).encoded_len(mode)
            }
        }
    }

    fn write_encoded<W: Write>(&self, mode: Mode, target: &mut W) -> Result<(), std::io::Error> {
        match self {
            Self::IssuerAndSerialNumber(v) => v.encode_ref().write_encoded(mode, target),
            Self::SubjectKeyIdentifier(v) => {
                encode::sequence_as(Tag::CTX_0, v.encode_ref()).write_encoded(mode, target)
            }
        }
    }
}

/// ```ASN.1
/// SignedAttributes ::= SET SIZE (1..MAX) OF Attribute
/// ```
#[derive(Clone, Debug, Default)]
pub struct SignedAttributes(pub Vec<Attribute>);

impl Deref for SignedAttributes {
    type Target = Vec<Attribute>;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for SignedAttributes {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl SignedAttributes {
    pub fn take_from_set<S: Source>(cons: &mut Constructed<S>) -> Result<Self, S::Err> {
        let mut attrs = Vec::new();
        while let Some(attr) = Attribute::take_opt_from(cons)? {
            attrs.push(attr);
        }
        Ok(Self(attrs))
    }

    pub fn encode_ref(&self) -> impl Values + '_ {
        encode::set(encode::slice(&self.0, |x| x.encode_ref()))
    }

    pub fn encode_ref_as(&self, tag: Tag) -> impl Values + '_ {
        encode::set_as(tag, encode::slice(&self.0, |x| x.encode_ref()))
    }

    /// Find a signed attribute's sole DER-encoded value by OID.
    pub fn find(&self, oid: &ConstOid) -> Option<&AttributeValue> {
        self.0
            .iter()
            .find(|a| a.typ.as_ref() == oid.as_ref())
            .and_then(|a| a.values.first())
    }
}

/// ```ASN.1
/// UnsignedAttributes ::= SET SIZE (1..MAX) OF Attribute
/// ```
#[derive(Clone, Debug, Default)]
pub struct UnsignedAttributes(pub Vec<Attribute>);

impl Deref for UnsignedAttributes {
    type Target = Vec<Attribute>;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for UnsignedAttributes {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl UnsignedAttributes {
    pub fn take_from_set<S: Source>(cons: &mut Constructed<S>) -> Result<Self, S::Err> {
        let mut attrs = Vec::new();
        while let Some(attr) = Attribute::take_opt_from(cons)? {
            attrs.push(attr);
        }
        Ok(Self(attrs))
    }

    pub fn encode_ref_as(&self, tag: Tag) -> impl Values + '_ {
        encode::set_as(tag, encode::slice(&self.0, |x| x.encode_ref()))
    }
}

/// ```ASN.1
/// Attribute ::= SEQUENCE {
///   attrType OBJECT IDENTIFIER,
///   attrValues SET OF AttributeValue }
/// ```
#[derive(Clone, Debug)]
pub struct Attribute {
    pub typ: Oid,
    pub values: Vec<AttributeValue>,
}

impl Attribute {
    pub fn take_opt_from<S: Source>(cons: &mut Constructed<S>) -> Result<Option<Self>, S::Err> {
        cons.take_opt_sequence(|cons| {
            let typ = Oid::take_from(cons)?;
            let values = cons.take_set(|cons| {
                let mut values = Vec::new();
                while let Some(v) = AttributeValue::take_opt_from(cons)? {
                    values.push(v);
                }
                Ok(values)
            })?;
            Ok(Self { typ, values })
        })
    }

    pub fn encode_ref(&self) -> impl Values + '_ {
        encode::sequence((
            self.typ.encode_ref(),
            encode::set(encode::slice(&self.values, |v| v.encode_ref())),
        ))
    }

    /// Build a single-valued attribute from already-DER-encoded bytes, the
    /// form the Signer needs for the Microsoft attributes it emits as
    /// literal byte sequences (§4.G).
    pub fn single_der(typ: ConstOid, der_value: Vec<u8>) -> Self {
        Self {
            typ: Oid(bytes::Bytes::copy_from_slice(typ.as_ref())),
            values: vec![AttributeValue(Captured::from_values(
                Mode::Der,
                RawDer(der_value),
            ))],
        }
    }
}

#[derive(Clone, Debug)]
pub struct AttributeValue(Captured);

impl AttributeValue {
    pub fn take_opt_from<S: Source>(cons: &mut Constructed<S>) -> Result<Option<Self>, S::Err> {
        let captured = cons.capture_all()?;
        if captured.is_empty() {
            Ok(None)
        } else {
            Ok(Some(Self(captured)))
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_slice()
    }
}

impl Values for AttributeValue {
    fn encoded_len(&self, mode: Mode) -> usize {
        self.0.encoded_len(mode)
    }

    fn write_encoded<W: Write>(&self, mode: Mode, target: &mut W) -> Result<(), std::io::Error> {
        self.0.write_encoded(mode, target)
    }
}

impl Deref for AttributeValue {
    type Target = Captured;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

pub type SignatureValue = OctetString;
pub type ContentType = Oid;

/// ```ASN.1
/// CertificateChoices ::= CHOICE { certificate Certificate, ... }
/// ```
/// Only the plain `Certificate` arm is supported; Authenticode never emits
/// the other (obsolete or attribute-certificate) choices.
#[derive(Clone, Debug)]
pub enum CertificateChoices {
    Certificate(Box<Certificate>),
}

impl CertificateChoices {
    pub fn take_opt_from<S: Source>(cons: &mut Constructed<S>) -> Result<Option<Self>, S::Err> {
        if let Some(cert) = cons.take_opt_constructed(|_, cons| Certificate::from_sequence(cons))? {
            Ok(Some(Self::Certificate(Box::new(cert))))
        } else {
            Ok(None)
        }
    }

    pub fn encode_ref(&self) -> impl Values + '_ {
        match self {
            Self::Certificate(cert) => cert.encode_ref(),
        }
    }

    pub fn certificate(&self) -> &Certificate {
        match self {
            Self::Certificate(cert) => cert,
        }
    }
}

impl Values for CertificateChoices {
    fn encoded_len(&self, mode: Mode) -> usize {
        self.encode_ref().encoded_len(mode)
    }

    fn write_encoded<W: Write>(&self, mode: Mode, target: &mut W) -> Result<(), std::io::Error> {
        self.encode_ref().write_encoded(mode, target)
    }
}

/// ```ASN.1
/// CertificateSet ::= SET OF CertificateChoices
/// ```
#[derive(Clone, Debug, Default)]
pub struct CertificateSet(Vec<CertificateChoices>);

impl Deref for CertificateSet {
    type Target = Vec<CertificateChoices>;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for CertificateSet {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl CertificateSet {
    pub fn take_from<S: Source>(cons: &mut Constructed<S>) -> Result<Self, S::Err> {
        let mut certs = Vec::new();
        while let Some(cert) = CertificateChoices::take_opt_from(cons)? {
            certs.push(cert);
        }
        Ok(Self(certs))
    }

    pub fn encode_ref_as(&self, tag: Tag) -> impl Values + '_ {
        encode::set_as(tag, encode::slice(&self.0, |c| c.encode_ref()))
    }
}

/// ```ASN.1
/// IssuerAndSerialNumber ::= SEQUENCE {
///   issuer Name,
///   serialNumber CertificateSerialNumber }
/// ```
#[derive(Clone, Debug)]
pub struct IssuerAndSerialNumber {
    pub issuer: Name,
    pub serial_number: Integer,
}

impl IssuerAndSerialNumber {
    pub fn take_from<S: Source>(cons: &mut Constructed<S>) -> Result<Self, S::Err> {
        cons.take_sequence(|cons| {
            let issuer = Name::take_from(cons)?;
            let serial_number = Integer::take_from(cons)?;
            Ok(Self {
                issuer,
                serial_number,
            })
        })
    }

    pub fn encode_ref(&self) -> impl Values + '_ {
        encode::sequence((self.issuer.encode_ref(), (&self.serial_number).encode()))
    }
}

/// ```ASN.1
/// CMSVersion ::= INTEGER { v0(0), v1(1), v2(2), v3(3), v4(4), v5(5) }
/// ```
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CmsVersion {
    V1 = 1,
}

impl CmsVersion {
    pub fn take_from<S: Source>(cons: &mut Constructed<S>) -> Result<Self, S::Err> {
        match cons.take_primitive_if(Tag::INTEGER, Integer::i8_from_primitive)? {
            1 => Ok(Self::V1),
            _ => Err(ContentError::from("unsupported CMSVersion").into()),
        }
    }

    pub fn encode(self) -> impl Values {
        u8::from(self).encode()
    }
}

impl From<CmsVersion> for u8 {
    fn from(v: CmsVersion) -> u8 {
        match v {
            CmsVersion::V1 => 1,
        }
    }
}
