// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! RFC 3161 Time-Stamp Protocol request/response types, trimmed to what the
//! timestamper needs: it builds a [TimeStampReq], and reads only
//! `status`/`time_stamp_token` out of the response (the embedded `TSTInfo` is
//! never parsed — the whole token is reattached to the signer verbatim).

use {
    crate::asn1::rfc5280::AlgorithmIdentifier,
    crate::asn1::rfc5652::ContentInfo,
    bcder::{
        decode::{Constructed, Source},
        encode::{self, PrimitiveContent, Values},
        ConstOid, Integer, OctetString, Oid, Tag,
    },
};

/// id-aa-timeStampToken, 1.2.840.113549.1.9.16.2.14.
pub const OID_TIME_STAMP_TOKEN: ConstOid = Oid(&[42, 134, 72, 134, 247, 13, 1, 9, 16, 2, 14]);

/// ```ASN.1
/// TimeStampReq ::= SEQUENCE {
///    version        INTEGER { v1(1) },
///    messageImprint MessageImprint,
///    reqPolicy      TSAPolicyId OPTIONAL,
///    nonce          INTEGER OPTIONAL,
///    certReq        BOOLEAN DEFAULT FALSE,
///    extensions     [0] IMPLICIT Extensions OPTIONAL }
/// ```
#[derive(Clone, Debug)]
pub struct TimeStampReq {
    pub version: Integer,
    pub message_imprint: MessageImprint,
    pub nonce: Option<Integer>,
    pub cert_req: bool,
}

impl TimeStampReq {
    pub fn encode_ref(&self) -> impl Values + '_ {
        encode::sequence((
            (&self.version).encode(),
            self.message_imprint.encode_ref(),
            self.nonce.as_ref().map(|n| n.encode()),
            self.cert_req.encode(),
        ))
    }

    pub fn to_der(&self) -> Result<Vec<u8>, std::io::Error> {
        let mut out = Vec::new();
        self.encode_ref().write_encoded(bcder::Mode::Der, &mut out)?;
        Ok(out)
    }
}

/// ```ASN.1
/// MessageImprint ::= SEQUENCE {
///      hashAlgorithm AlgorithmIdentifier,
///      hashedMessage OCTET STRING }
/// ```
#[derive(Clone, Debug)]
pub struct MessageImprint {
    pub hash_algorithm: AlgorithmIdentifier,
    pub hashed_message: OctetString,
}

impl MessageImprint {
    pub fn encode_ref(&self) -> impl Values + '_ {
        encode::sequence((
            self.hash_algorithm.encode_ref(),
            self.hashed_message.encode_ref(),
        ))
    }
}

/// ```ASN.1
/// TimeStampResp ::= SEQUENCE {
///      status         PKIStatusInfo,
///      timeStampToken TimeStampToken OPTIONAL }
/// ```
#[derive(Clone, Debug)]
pub struct TimeStampResp {
    pub status: PkiStatusInfo,
    pub time_stamp_token: Option<TimeStampToken>,
}

impl TimeStampResp {
    pub fn take_from<S: Source>(cons: &mut Constructed<S>) -> Result<Self, S::Err> {
        cons.take_sequence(|cons| {
            let status = PkiStatusInfo::take_from(cons)?;
            let time_stamp_token = ContentInfo::take_opt_from(cons)?;

            Ok(Self {
                status,
                time_stamp_token,
            })
        })
    }
}

/// ```ASN.1
/// PKIStatusInfo ::= SEQUENCE {
///     status       PKIStatus,
///     statusString PKIFreeText OPTIONAL,
///     failInfo     PKIFailureInfo OPTIONAL }
/// ```
#[derive(Clone, Debug)]
pub struct PkiStatusInfo {
    pub status: i8,
}

impl PkiStatusInfo {
    pub fn take_from<S: Source>(cons: &mut Constructed<S>) -> Result<Self, S::Err> {
        cons.take_sequence(|cons| {
            let status = cons.take_primitive_if(Tag::INTEGER, Integer::i8_from_primitive)?;
            // statusString/failInfo: not consumed by this tool, just drained.
            cons.capture_all()?;
            Ok(Self { status })
        })
    }
}

/// ```ASN.1
/// TimeStampToken ::= ContentInfo
/// ```
pub type TimeStampToken = ContentInfo;
