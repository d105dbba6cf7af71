// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Authenticode (proprietary base64-HTTP) and RFC 3161 timestamping, and
//! installation of the resulting countersignature as an unsigned attribute
//! on the signer (§4.H).

use {
    crate::{
        asn1::{
            rfc3161::{MessageImprint, TimeStampReq, OID_TIME_STAMP_TOKEN},
            rfc5280::AlgorithmIdentifier,
            rfc5652::{Attribute, SignedData, UnsignedAttributes, OID_COUNTER_SIGNATURE},
            spc::AuthenticodeTimeStampRequest,
        },
        digest::DigestAlgorithm,
        error::AuthenticodeError,
    },
    bcder::{decode::Constructed, encode::Values, Integer, Mode, OctetString},
    std::io::Read,
};

const USER_AGENT: &str = "Transport";

fn http_client(proxy: Option<&str>) -> Result<reqwest::blocking::Client, AuthenticodeError> {
    let mut builder = reqwest::blocking::Client::builder();
    if let Some(proxy) = proxy {
        let proxy = reqwest::Proxy::all(proxy)
            .map_err(|e| AuthenticodeError::TimestampTransportError(e.to_string()))?;
        builder = builder.proxy(proxy);
    }
    builder
        .build()
        .map_err(|e| AuthenticodeError::TimestampTransportError(e.to_string()))
}

/// Pull the signer's `encryptedDigest` (the RSA signature bytes) out of a
/// freshly-built `SignedData` bundle, assuming exactly one `SignerInfo`.
fn encrypted_digest(signed_data: &SignedData) -> Result<Vec<u8>, AuthenticodeError> {
    let signer_info = signed_data.signer_infos.first().ok_or_else(|| {
        AuthenticodeError::LogicError("no SignerInfo present to timestamp".into())
    })?;
    Ok(signer_info.signature.to_bytes().to_vec())
}

fn der_encode(values: impl Values) -> Result<Vec<u8>, AuthenticodeError> {
    let mut buf = Vec::new();
    values
        .write_encoded(Mode::Der, &mut buf)
        .map_err(AuthenticodeError::Asn1Encode)?;
    Ok(buf)
}

/// Acquire an Authenticode (non-RFC-3161) timestamp from `url` and attach it
/// to `signed_data_der`'s lone `SignerInfo` as an unsigned `countersignature`
/// attribute, merging in any certificates the response carries.
pub fn apply_authenticode_timestamp(
    signed_data_der: &[u8],
    url: &str,
    proxy: Option<&str>,
) -> Result<Vec<u8>, AuthenticodeError> {
    let mut signed_data = SignedData::decode_ber(signed_data_der)
        .map_err(|e| AuthenticodeError::TimestampFormatError(e.to_string()))?;

    let request = AuthenticodeTimeStampRequest::new(encrypted_digest(&signed_data)?);
    let request_der = request
        .to_der()
        .map_err(AuthenticodeError::Asn1Encode)?;
    let body = base64::encode(&request_der);

    let client = http_client(proxy)?;
    let response = client
        .post(url)
        .header(reqwest::header::USER_AGENT, USER_AGENT)
        .header(reqwest::header::CACHE_CONTROL, "no-cache")
        .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
        .body(body)
        .send()
        .map_err(|e| AuthenticodeError::TimestampTransportError(e.to_string()))?;

    if !response.status().is_success() {
        return Err(AuthenticodeError::TimestampTransportError(format!(
            "timestamp authority returned HTTP {}",
            response.status()
        )));
    }

    let mut response_body = Vec::new();
    response
        .take(16 * 1024 * 1024)
        .read_to_end(&mut response_body)
        .map_err(|e| AuthenticodeError::TimestampTransportError(e.to_string()))?;

    // The response may be NL-folded base64 or a single line; base64::decode
    // handles neither newline form, so strip them before decoding.
    let folded = response_body.contains(&b'\n');
    let cleaned: Vec<u8> = if folded {
        response_body
            .iter()
            .copied()
            .filter(|b| *b != b'\n' && *b != b'\r')
            .collect()
    } else {
        response_body
    };

    let response_der = base64::decode(&cleaned).map_err(|e| {
        AuthenticodeError::TimestampFormatError(format!("malformed base64 response: {}", e))
    })?;

    let response_signed_data = SignedData::decode_ber(&response_der)
        .map_err(|e| AuthenticodeError::TimestampFormatError(e.to_string()))?;

    let countersigner = response_signed_data
        .signer_infos
        .first()
        .ok_or_else(|| {
            AuthenticodeError::TimestampFormatError(
                "timestamp response carries no SignerInfo".into(),
            )
        })?;
    let countersignature_der = countersigner
        .to_der()
        .map_err(AuthenticodeError::Asn1Encode)?;

    if let Some(response_certs) = &response_signed_data.certificates {
        let mut certs = signed_data.certificates.take().unwrap_or_default();
        for cert in response_certs.iter().rev() {
            certs.push(cert.clone());
        }
        signed_data.certificates = Some(certs);
    }

    let signer_info = signed_data.signer_infos.first_mut().ok_or_else(|| {
        AuthenticodeError::LogicError("no SignerInfo present to timestamp".into())
    })?;
    let mut unsigned = signer_info.unsigned_attributes.take().unwrap_or_default();
    unsigned.push(Attribute::single_der(
        OID_COUNTER_SIGNATURE,
        countersignature_der,
    ));
    signer_info.unsigned_attributes = Some(unsigned);

    signed_data.to_der().map_err(AuthenticodeError::Asn1Encode)
}

/// Acquire an RFC 3161 timestamp token from `url` and attach it to
/// `signed_data_der`'s lone `SignerInfo` verbatim as an unsigned
/// `id-aa-timeStampToken` attribute.
pub fn apply_rfc3161_timestamp(
    signed_data_der: &[u8],
    url: &str,
    digest_alg: DigestAlgorithm,
    proxy: Option<&str>,
) -> Result<Vec<u8>, AuthenticodeError> {
    let mut signed_data = SignedData::decode_ber(signed_data_der)
        .map_err(|e| AuthenticodeError::TimestampFormatError(e.to_string()))?;

    let digest = digest_alg.hash(&encrypted_digest(&signed_data)?);
    let request = TimeStampReq {
        version: Integer::from(1u8),
        message_imprint: MessageImprint {
            hash_algorithm: AlgorithmIdentifier {
                algorithm: digest_alg.oid(),
                parameters: None,
            },
            hashed_message: OctetString::new(bytes::Bytes::copy_from_slice(&digest)),
        },
        nonce: None,
        cert_req: true,
    };
    let request_der = request.to_der().map_err(AuthenticodeError::Asn1Encode)?;

    let client = http_client(proxy)?;
    let response = client
        .post(url)
        .header(reqwest::header::USER_AGENT, USER_AGENT)
        .header(reqwest::header::CACHE_CONTROL, "no-cache")
        .header(reqwest::header::CONTENT_TYPE, "application/timestamp-query")
        .header(reqwest::header::ACCEPT, "application/timestamp-reply")
        .body(request_der)
        .send()
        .map_err(|e| AuthenticodeError::TimestampTransportError(e.to_string()))?;

    if !response.status().is_success() {
        return Err(AuthenticodeError::TimestampTransportError(format!(
            "timestamp authority returned HTTP {}",
            response.status()
        )));
    }

    let mut response_der = Vec::new();
    response
        .take(16 * 1024 * 1024)
        .read_to_end(&mut response_der)
        .map_err(|e| AuthenticodeError::TimestampTransportError(e.to_string()))?;

    let response = Constructed::decode(response_der.as_slice(), Mode::Ber, |cons| {
        crate::asn1::rfc3161::TimeStampResp::take_from(cons)
    })
    .map_err(|e| AuthenticodeError::TimestampFormatError(e.to_string()))?;

    if response.status.status != 0 {
        return Err(AuthenticodeError::TimestampRejected(status_byte(
            response.status.status,
        )));
    }

    let token = response.time_stamp_token.ok_or_else(|| {
        AuthenticodeError::TimestampFormatError(
            "granted RFC 3161 response carries no token".into(),
        )
    })?;
    let token_der = der_encode(token.encode_ref())?;

    let signer_info = signed_data.signer_infos.first_mut().ok_or_else(|| {
        AuthenticodeError::LogicError("no SignerInfo present to timestamp".into())
    })?;
    let mut unsigned = signer_info.unsigned_attributes.take().unwrap_or_default();
    unsigned.push(Attribute::single_der(OID_TIME_STAMP_TOKEN, token_der));
    signer_info.unsigned_attributes = Some(unsigned);

    signed_data.to_der().map_err(AuthenticodeError::Asn1Encode)
}

fn status_byte(status: i8) -> u8 {
    status.rem_euclid(i8::MAX).max(0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_byte_never_panics_on_negative_status() {
        assert_eq!(status_byte(-1), 126);
        assert_eq!(status_byte(0), 0);
        assert_eq!(status_byte(2), 2);
    }
}
