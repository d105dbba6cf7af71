// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Microsoft's proprietary "SPC" (Software Publisher Certificate) ASN.1
//! extensions to PKCS#7: the `SpcIndirectDataContent` envelope that carries
//! the format-specific file digest, and the handful of attribute structures
//! the signer attaches alongside it. None of these are registered in any
//! public OID database outside Microsoft's own documentation; the layouts
//! here are taken from the reference tool's byte-for-byte output rather than
//! from a formal ASN.1 module.

use {
    crate::asn1::{
        common::{RawDer, TaggedPrimitive},
        rfc5280::AlgorithmIdentifier,
    },
    bcder::{
        decode::{Constructed, ContentError, Source},
        encode,
        encode::{PrimitiveContent, Values},
        BitString, ConstOid, Integer, Mode, Oid, OctetString, Tag,
    },
    std::io::Write,
};

/// `SPC_INDIRECT_DATA_OBJID`, 1.3.6.1.4.1.311.2.1.4.
pub const OID_SPC_INDIRECT_DATA: ConstOid = Oid(&[43, 6, 1, 4, 1, 130, 55, 2, 1, 4]);

/// `SPC_STATEMENT_TYPE_OBJID`, 1.3.6.1.4.1.311.2.1.11.
pub const OID_SPC_STATEMENT_TYPE: ConstOid = Oid(&[43, 6, 1, 4, 1, 130, 55, 2, 1, 11]);

/// `SPC_SP_OPUS_INFO_OBJID`, 1.3.6.1.4.1.311.2.1.12.
pub const OID_SPC_SP_OPUS_INFO: ConstOid = Oid(&[43, 6, 1, 4, 1, 130, 55, 2, 1, 12]);

/// `SPC_PE_IMAGE_DATA_OBJID`, 1.3.6.1.4.1.311.2.1.15.
pub const OID_SPC_PE_IMAGE_DATA: ConstOid = Oid(&[43, 6, 1, 4, 1, 130, 55, 2, 1, 15]);

/// `SPC_CAB_DATA_OBJID`, 1.3.6.1.4.1.311.2.1.25.
pub const OID_SPC_CAB_DATA: ConstOid = Oid(&[43, 6, 1, 4, 1, 130, 55, 2, 1, 25]);

/// `SPC_SIPINFO_OBJID`, 1.3.6.1.4.1.311.2.1.30.
pub const OID_SPC_SIPINFO: ConstOid = Oid(&[43, 6, 1, 4, 1, 130, 55, 2, 1, 30]);

/// Individual-code-signing statement type, 1.3.6.1.4.1.311.2.1.21.
pub const OID_SPC_STATEMENT_TYPE_INDIVIDUAL: ConstOid = Oid(&[43, 6, 1, 4, 1, 130, 55, 2, 1, 21]);

/// Commercial-code-signing statement type, 1.3.6.1.4.1.311.2.1.22.
pub const OID_SPC_STATEMENT_TYPE_COMMERCIAL: ConstOid = Oid(&[43, 6, 1, 4, 1, 130, 55, 2, 1, 22]);

/// `SPC_MS_JAVA_SOMETHING` attribute, 1.3.6.1.4.1.311.15.1.
pub const OID_SPC_MS_JAVA_SOMETHING: ConstOid = Oid(&[43, 6, 1, 4, 1, 130, 55, 15, 1]);

/// Page-hash digest-type OID, version 1 (SHA-1), 1.3.6.1.4.1.311.2.3.1.
pub const OID_SPC_PAGE_HASH_V1: ConstOid = Oid(&[43, 6, 1, 4, 1, 130, 55, 2, 3, 1]);

/// Page-hash digest-type OID, version 2 (SHA-256), 1.3.6.1.4.1.311.2.3.2.
pub const OID_SPC_PAGE_HASH_V2: ConstOid = Oid(&[43, 6, 1, 4, 1, 130, 55, 2, 3, 2]);

/// Authenticode (non-RFC-3161) timestamp request type, 1.3.6.1.4.1.311.3.2.1.
pub const OID_SPC_TIME_STAMP_REQUEST: ConstOid = Oid(&[43, 6, 1, 4, 1, 130, 55, 3, 2, 1]);

/// `id-data`, used as the inner "type" of the Authenticode timestamp blob.
pub const OID_ID_DATA: ConstOid = Oid(&[42, 134, 72, 134, 247, 13, 1, 7, 1]);

/// `classId` a `SpcSerializedObject` page-hash moniker must carry for its
/// `serializedData` to be page-hash blocks rather than something else.
pub const SPC_PAGE_HASH_CLASS_ID: [u8; 16] = [
    0xA6, 0xB5, 0x86, 0xD5, 0xB4, 0xA1, 0x24, 0x66, 0xAE, 0x05, 0xA2, 0x17, 0xDA, 0x8E, 0x60, 0xD6,
];

/// The fixed 28-byte BMPString encoding of `<<<Obsolete>>>`, used verbatim by
/// the indirect-data builder for the PE/CAB `SpcLink` file placeholder.
pub const OBSOLETE_BMP_STRING: [u8; 28] = [
    0x00, 0x3C, 0x00, 0x3C, 0x00, 0x3C, 0x00, 0x4F, 0x00, 0x62, 0x00, 0x73, 0x00, 0x6F, 0x00, 0x6C,
    0x00, 0x65, 0x00, 0x74, 0x00, 0x65, 0x00, 0x3E, 0x00, 0x3E, 0x00, 0x3E,
];

/// The fixed 16-byte MSI `SpcSipinfo.string` constant.
pub const MSI_SIPINFO_STRING: [u8; 16] = [
    0xf1, 0x10, 0x0c, 0x00, 0x00, 0x00, 0x00, 0x00, 0xc0, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x46,
];

/// ```ASN.1
/// SpcString ::= CHOICE {
///     unicode [0] IMPLICIT BMPString,
///     ascii   [1] IMPLICIT IA5String }
/// ```
/// `bcder` has no `BMPString` primitive; both arms are carried as raw
/// content octets under a hand-written context tag.
#[derive(Clone, Debug)]
pub enum SpcString {
    Unicode(Vec<u8>),
    Ascii(Vec<u8>),
}

impl SpcString {
    /// The fixed `<<<Obsolete>>>` placeholder used by the indirect-data
    /// builder.
    pub fn obsolete() -> Self {
        Self::Unicode(OBSOLETE_BMP_STRING.to_vec())
    }

    /// Encode an ASCII string as the `ascii` (IA5String) arm.
    pub fn ascii(s: &str) -> Self {
        Self::Ascii(s.as_bytes().to_vec())
    }

    pub fn take_from<S: Source>(cons: &mut Constructed<S>) -> Result<Self, S::Err> {
        if let Some(bytes) = cons.take_opt_primitive_if(Tag::CTX_0, |prim| prim.take_all())? {
            Ok(Self::Unicode(bytes.to_vec()))
        } else if let Some(bytes) = cons.take_opt_primitive_if(Tag::CTX_1, |prim| prim.take_all())?
        {
            Ok(Self::Ascii(bytes.to_vec()))
        } else {
            Err(ContentError::from("unrecognized SpcString choice").into())
        }
    }

    pub fn encode_ref(&self) -> impl Values + '_ {
        match self {
            Self::Unicode(bytes) => TaggedPrimitive::new(0x80, bytes.clone()),
            Self::Ascii(bytes) => TaggedPrimitive::new(0x81, bytes.clone()),
        }
    }
}

/// ```ASN.1
/// SpcSerializedObject ::= SEQUENCE {
///     classId        OCTET STRING, -- 16-byte GUID
///     serializedData OCTET STRING }
/// ```
#[derive(Clone, Debug)]
pub struct SpcSerializedObject {
    pub class_id: OctetString,
    pub serialized_data: OctetString,
}

impl SpcSerializedObject {
    pub fn from_sequence<S: Source>(cons: &mut Constructed<S>) -> Result<Self, S::Err> {
        let class_id = OctetString::take_from(cons)?;
        let serialized_data = OctetString::take_from(cons)?;
        Ok(Self {
            class_id,
            serialized_data,
        })
    }

    fn encode_inner(&self) -> impl Values + '_ {
        (self.class_id.encode_ref(), self.serialized_data.encode_ref())
    }

    pub fn encode_ref(&self) -> impl Values + '_ {
        encode::sequence(self.encode_inner())
    }

    /// `true` if this moniker's `classId` marks its `serializedData` as a
    /// page-hash block set.
    pub fn is_page_hash(&self) -> bool {
        self.class_id.to_bytes().as_ref() == SPC_PAGE_HASH_CLASS_ID
    }
}

/// ```ASN.1
/// SpcLink ::= CHOICE {
///     url     [0] IMPLICIT IA5String,
///     moniker [1] IMPLICIT SpcSerializedObject,
///     file    [2] EXPLICIT SpcString }
/// ```
#[derive(Clone, Debug)]
pub enum SpcLink {
    Url(Vec<u8>),
    Moniker(SpcSerializedObject),
    File(SpcString),
}

impl SpcLink {
    /// The `file=<<<Obsolete>>>` placeholder the indirect-data builder
    /// writes for PE and CAB files.
    pub fn obsolete_file() -> Self {
        Self::File(SpcString::obsolete())
    }

    pub fn url(url: &str) -> Self {
        Self::Url(url.as_bytes().to_vec())
    }

    pub fn take_from<S: Source>(cons: &mut Constructed<S>) -> Result<Self, S::Err> {
        if let Some(bytes) = cons.take_opt_primitive_if(Tag::CTX_0, |prim| prim.take_all())? {
            Ok(Self::Url(bytes.to_vec()))
        } else if let Some(obj) =
            cons.take_opt_constructed_if(Tag::CTX_1, SpcSerializedObject::from_sequence)?
        {
            Ok(Self::Moniker(obj))
        } else if let Some(s) = cons.take_opt_constructed_if(Tag::CTX_2, SpcString::take_from)? {
            Ok(Self::File(s))
        } else {
            Err(ContentError::from("unrecognized SpcLink choice").into())
        }
    }

    pub fn encode_ref(&self) -> impl Values + '_ {
        LinkValues(self)
    }
}

struct LinkValues<'a>(&'a SpcLink);

impl Values for LinkValues<'_> {
    fn encoded_len(&self, mode: Mode) -> usize {
        match self.0 {
            SpcLink::Url(bytes) => TaggedPrimitive::new(0x80, bytes.clone()).encoded_len(mode),
            SpcLink::Moniker(obj) => {
                encode::sequence_as(Tag::CTX_1, obj.encode_inner()).encoded_len(mode)
            }
            SpcLink::File(s) => encode::sequence_as(Tag::CTX_2, s.encode_ref()).encoded_len(mode),
        }
    }

    fn write_encoded<W: Write>(&self, mode: Mode, target: &mut W) -> Result<(), std::io::Error> {
        match self.0 {
            SpcLink::Url(bytes) => {
                TaggedPrimitive::new(0x80, bytes.clone()).write_encoded(mode, target)
            }
            SpcLink::Moniker(obj) => {
                encode::sequence_as(Tag::CTX_1, obj.encode_inner()).write_encoded(mode, target)
            }
            SpcLink::File(s) => {
                encode::sequence_as(Tag::CTX_2, s.encode_ref()).write_encoded(mode, target)
            }
        }
    }
}

/// ```ASN.1
/// SpcSpOpusInfo ::= SEQUENCE {
///     programName [0] EXPLICIT SpcString OPTIONAL,
///     moreInfo    [1] EXPLICIT SpcLink OPTIONAL }
/// ```
#[derive(Clone, Debug, Default)]
pub struct SpcSpOpusInfo {
    pub program_name: Option<SpcString>,
    pub more_info: Option<SpcLink>,
}

impl SpcSpOpusInfo {
    pub fn encode_ref(&self) -> impl Values + '_ {
        encode::sequence((
            self.program_name
                .as_ref()
                .map(|s| encode::sequence_as(Tag::CTX_0, s.encode_ref())),
            self.more_info
                .as_ref()
                .map(|l| encode::sequence_as(Tag::CTX_1, l.encode_ref())),
        ))
    }

    pub fn to_der(&self) -> Result<Vec<u8>, std::io::Error> {
        let mut out = Vec::new();
        self.encode_ref().write_encoded(Mode::Der, &mut out)?;
        Ok(out)
    }
}

/// ```ASN.1
/// SpcAttributeTypeAndOptionalValue ::= SEQUENCE {
///     type  OBJECT IDENTIFIER,
///     value [0] ANY OPTIONAL }
/// ```
/// `value`, when present, is carried as its own already-tagged DER — the
/// concrete type (`SpcPeImageData`, `SpcLink`, `SpcSipinfo`, ...) is picked
/// by `type`.
#[derive(Clone, Debug)]
pub struct SpcAttributeTypeAndOptionalValue {
    pub typ: Oid,
    pub value: Option<Vec<u8>>,
}

impl SpcAttributeTypeAndOptionalValue {
    pub fn new(typ: ConstOid, value: Vec<u8>) -> Self {
        Self {
            typ: Oid(bytes::Bytes::copy_from_slice(typ.as_ref())),
            value: Some(value),
        }
    }

    pub fn from_sequence<S: Source>(cons: &mut Constructed<S>) -> Result<Self, S::Err> {
        let typ = Oid::take_from(cons)?;
        let captured = cons.capture_all()?;
        let value = if captured.is_empty() {
            None
        } else {
            Some(captured.as_slice().to_vec())
        };
        Ok(Self { typ, value })
    }

    pub fn encode_ref(&self) -> impl Values + '_ {
        encode::sequence((
            self.typ.encode_ref(),
            self.value.as_ref().map(|v| RawDer(v.clone())),
        ))
    }
}

/// ```ASN.1
/// DigestInfo ::= SEQUENCE {
///     digestAlgorithm AlgorithmIdentifier,
///     digest          OCTET STRING }
/// ```
#[derive(Clone, Debug)]
pub struct DigestInfo {
    pub digest_algorithm: AlgorithmIdentifier,
    pub digest: OctetString,
}

impl DigestInfo {
    pub fn from_sequence<S: Source>(cons: &mut Constructed<S>) -> Result<Self, S::Err> {
        let digest_algorithm = AlgorithmIdentifier::take_from(cons)?;
        let digest = OctetString::take_from(cons)?;
        Ok(Self {
            digest_algorithm,
            digest,
        })
    }

    pub fn encode_ref(&self) -> impl Values + '_ {
        encode::sequence((self.digest_algorithm.encode_ref(), self.digest.encode_ref()))
    }
}

/// ```ASN.1
/// SpcIndirectDataContent ::= SEQUENCE {
///     data          SpcAttributeTypeAndOptionalValue,
///     messageDigest DigestInfo }
/// ```
#[derive(Clone, Debug)]
pub struct SpcIndirectDataContent {
    pub data: SpcAttributeTypeAndOptionalValue,
    pub message_digest: DigestInfo,
}

impl SpcIndirectDataContent {
    pub fn from_sequence<S: Source>(cons: &mut Constructed<S>) -> Result<Self, S::Err> {
        let data = cons.take_sequence(SpcAttributeTypeAndOptionalValue::from_sequence)?;
        let message_digest = cons.take_sequence(DigestInfo::from_sequence)?;
        Ok(Self {
            data,
            message_digest,
        })
    }

    pub fn decode_der(data: &[u8]) -> Result<Self, bcder::decode::DecodeError<std::convert::Infallible>> {
        Constructed::decode(data, Mode::Der, |cons| cons.take_sequence(Self::from_sequence))
    }

    pub fn encode_ref(&self) -> impl Values + '_ {
        encode::sequence((self.data.encode_ref(), self.message_digest.encode_ref()))
    }

    pub fn to_der(&self) -> Result<Vec<u8>, std::io::Error> {
        let mut out = Vec::new();
        self.encode_ref().write_encoded(Mode::Der, &mut out)?;
        Ok(out)
    }

    /// Attempt to parse `data.value` as a `SpcPeImageData` (only meaningful
    /// when `data.typ == OID_SPC_PE_IMAGE_DATA`).
    pub fn pe_image_data(&self) -> Option<SpcPeImageData> {
        if self.data.typ.as_ref() != OID_SPC_PE_IMAGE_DATA.as_ref() {
            return None;
        }
        let bytes = self.data.value.as_ref()?;
        Constructed::decode(bytes.as_slice(), Mode::Ber, |cons| {
            cons.take_sequence(SpcPeImageData::from_sequence)
        })
        .ok()
    }
}

/// ```ASN.1
/// SpcPeImageData ::= SEQUENCE {
///     flags BIT STRING,
///     file  [0] EXPLICIT SpcLink }
/// ```
#[derive(Clone, Debug)]
pub struct SpcPeImageData {
    pub flags: BitString,
    pub file: SpcLink,
}

impl SpcPeImageData {
    pub fn placeholder() -> Self {
        Self {
            flags: BitString::new(0, bytes::Bytes::new()),
            file: SpcLink::obsolete_file(),
        }
    }

    pub fn from_sequence<S: Source>(cons: &mut Constructed<S>) -> Result<Self, S::Err> {
        let flags = BitString::take_from(cons)?;
        let file = cons.take_constructed_if(Tag::CTX_0, SpcLink::take_from)?;
        Ok(Self { flags, file })
    }

    pub fn encode_ref(&self) -> impl Values + '_ {
        encode::sequence((
            self.flags.encode_ref(),
            encode::sequence_as(Tag::CTX_0, self.file.encode_ref()),
        ))
    }

    pub fn to_der(&self) -> Result<Vec<u8>, std::io::Error> {
        let mut out = Vec::new();
        self.encode_ref().write_encoded(Mode::Der, &mut out)?;
        Ok(out)
    }
}

/// ```ASN.1
/// SpcSipinfo ::= SEQUENCE {
///     a INTEGER, string OCTET STRING, b INTEGER, c INTEGER, d INTEGER,
///     e INTEGER, f INTEGER }
/// ```
#[derive(Clone, Debug)]
pub struct SpcSipinfo {
    pub a: i32,
    pub string: [u8; 16],
    pub b: i32,
    pub c: i32,
    pub d: i32,
    pub e: i32,
    pub f: i32,
}

impl SpcSipinfo {
    pub fn msi() -> Self {
        Self {
            a: 1,
            string: MSI_SIPINFO_STRING,
            b: 0,
            c: 0,
            d: 0,
            e: 0,
            f: 0,
        }
    }

    pub fn encode_ref(&self) -> impl Values + '_ {
        encode::sequence((
            Integer::from(self.a).encode(),
            OctetString::new(bytes::Bytes::copy_from_slice(&self.string)).encode_ref(),
            Integer::from(self.b).encode(),
            Integer::from(self.c).encode(),
            Integer::from(self.d).encode(),
            Integer::from(self.e).encode(),
            Integer::from(self.f).encode(),
        ))
    }

    pub fn to_der(&self) -> Result<Vec<u8>, std::io::Error> {
        let mut out = Vec::new();
        self.encode_ref().write_encoded(Mode::Der, &mut out)?;
        Ok(out)
    }
}

/// The proprietary (non-RFC-3161) Authenticode timestamp request body.
///
/// ```ASN.1
/// TimeStampRequest ::= SEQUENCE {
///     type OBJECT IDENTIFIER, -- SPC_TIME_STAMP_REQUEST_OBJID
///     blob SEQUENCE {
///         type      OBJECT IDENTIFIER, -- id-data
///         signature [0] EXPLICIT OCTET STRING } }
/// ```
#[derive(Clone, Debug)]
pub struct AuthenticodeTimeStampRequest {
    pub signature: Vec<u8>,
}

impl AuthenticodeTimeStampRequest {
    pub fn new(signature: Vec<u8>) -> Self {
        Self { signature }
    }

    pub fn encode_ref(&self) -> impl Values + '_ {
        let octets = OctetString::new(bytes::Bytes::copy_from_slice(&self.signature));
        encode::sequence((
            OID_SPC_TIME_STAMP_REQUEST.encode_ref(),
            encode::sequence((
                OID_ID_DATA.encode_ref(),
                encode::sequence_as(Tag::CTX_0, octets.encode_ref()),
            )),
        ))
    }

    pub fn to_der(&self) -> Result<Vec<u8>, std::io::Error> {
        let mut out = Vec::new();
        self.encode_ref().write_encoded(Mode::Der, &mut out)?;
        Ok(out)
    }
}

/// `asn1_simple_hdr_len`: length of a DER tag+length header at the start of
/// `buf`, for the short forms the page-hash moniker's `serializedData`
/// actually uses. Returns 0 if `buf` does not look like a valid short header
/// (§4.J).
pub fn asn1_simple_hdr_len(buf: &[u8]) -> usize {
    if buf.len() <= 2 || buf[0] > 0x31 {
        return 0;
    }
    if buf[1] & 0x80 == 0 {
        2
    } else {
        2 + (buf[1] & 0x7F) as usize
    }
}
