// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Key and certificate loaders (§4.K, ambient). Three on-disk forms — PKCS#12,
//! SPC+PVK, and SPC+PEM — are each parsed into the `(cert, chain, private_key)`
//! triple the [crate::signing] module consumes.

use {
    crate::{
        asn1::{
            rfc5280::Certificate,
            rfc5652::{CertificateChoices, SignedData},
        },
        error::AuthenticodeError,
    },
    bcder::{decode::Constructed, Mode},
    ring::signature::RsaKeyPair,
};

/// The certificate(s) and private key the Signer needs, in the shape every
/// loader below produces regardless of on-disk container.
pub struct KeyMaterial {
    pub certificate: Certificate,
    pub chain: Vec<Certificate>,
    pub rsa_key_pair: RsaKeyPair,
}

fn bmp_string(s: &str) -> Vec<u8> {
    let utf16: Vec<u16> = s.encode_utf16().collect();
    let mut bytes = Vec::with_capacity(utf16.len() * 2 + 2);
    for c in utf16 {
        bytes.push((c / 256) as u8);
        bytes.push((c % 256) as u8);
    }
    bytes.push(0x00);
    bytes.push(0x00);
    bytes
}

/// Load a PKCS#12 (`.pfx`/`.p12`) container: MAC-verified against `password`,
/// its `SafeBag`s decrypted to recover the leaf certificate, any chain
/// certificates, and a PKCS#8-shrouded RSA private key.
///
/// Grounded on the teacher's `cryptography.rs::parse_pfx_data`.
pub fn load_pkcs12(data: &[u8], password: &str) -> Result<KeyMaterial, AuthenticodeError> {
    let pfx = p12::PFX::parse(data)
        .map_err(|e| AuthenticodeError::KeyLoadFailed(format!("not a PFX container: {:?}", e)))?;

    if !pfx.verify_mac(password) {
        return Err(AuthenticodeError::KeyLoadFailed(
            "incorrect PFX password".into(),
        ));
    }

    let auth_safe_data = match pfx.auth_safe {
        p12::ContentInfo::Data(data) => data,
        _ => {
            return Err(AuthenticodeError::KeyLoadFailed(
                "unexpected PFX authSafe contentType".into(),
            ))
        }
    };

    let content_infos = yasna::parse_der(&auth_safe_data, |reader| {
        reader.collect_sequence_of(p12::ContentInfo::parse)
    })
    .map_err(|e| {
        AuthenticodeError::KeyLoadFailed(format!("failed parsing inner ContentInfo: {:?}", e))
    })?;

    let bmp_password = bmp_string(password);

    let mut certificates = Vec::new();
    let mut pkcs8_key = None;

    for content in content_infos {
        let bags_data = match content {
            p12::ContentInfo::Data(inner) => inner,
            p12::ContentInfo::EncryptedData(encrypted) => encrypted
                .data(&bmp_password)
                .ok_or_else(|| {
                    AuthenticodeError::KeyLoadFailed(
                        "failed decrypting inner EncryptedData (wrong password?)".into(),
                    )
                })?,
            p12::ContentInfo::OtherContext(_) => {
                return Err(AuthenticodeError::KeyLoadFailed(
                    "unexpected OtherContext content in PFX data".into(),
                ))
            }
        };

        let bags = yasna::parse_ber(&bags_data, |reader| {
            reader.collect_sequence_of(p12::SafeBag::parse)
        })
        .map_err(|e| AuthenticodeError::KeyLoadFailed(format!("failed parsing SafeBag: {:?}", e)))?;

        for bag in bags {
            match bag.bag {
                p12::SafeBagKind::CertBag(cert_bag) => match cert_bag {
                    p12::CertBag::X509(cert_der) => {
                        certificates.push(parse_certificate_der(&cert_der)?);
                    }
                    p12::CertBag::SDSI(_) => {
                        return Err(AuthenticodeError::KeyLoadFailed(
                            "unexpected SDSI certificate in PFX data".into(),
                        ))
                    }
                },
                p12::SafeBagKind::Pkcs8ShroudedKeyBag(key_bag) => {
                    let decrypted = key_bag.decrypt(&bmp_password).ok_or_else(|| {
                        AuthenticodeError::KeyLoadFailed(
                            "error decrypting PKCS8 shrouded key bag (wrong password?)".into(),
                        )
                    })?;
                    pkcs8_key = Some(decrypted);
                }
                p12::SafeBagKind::OtherBagKind(_) => {
                    return Err(AuthenticodeError::KeyLoadFailed(
                        "unexpected bag kind in PFX data".into(),
                    ))
                }
            }
        }
    }

    if certificates.is_empty() {
        return Err(AuthenticodeError::KeyLoadFailed(
            "no certificate found in PFX data".into(),
        ));
    }
    let Some(pkcs8_key) = pkcs8_key else {
        return Err(AuthenticodeError::KeyLoadFailed(
            "no private key found in PFX data".into(),
        ));
    };

    let rsa_key_pair = RsaKeyPair::from_pkcs8(&pkcs8_key).map_err(|e| {
        AuthenticodeError::KeyLoadFailed(format!("PFX private key is not a valid RSA key: {}", e))
    })?;

    let (certificate, chain) = select_signer(certificates, &rsa_key_pair)?;

    Ok(KeyMaterial {
        certificate,
        chain,
        rsa_key_pair,
    })
}

/// Load the certificate chain out of an SPC file: a DER PKCS#7 `SignedData`
/// carrying no content and no signer infos, just a `CertificateSet`.
pub fn load_spc_certificates(spc_der: &[u8]) -> Result<Vec<Certificate>, AuthenticodeError> {
    let signed_data = SignedData::decode_ber(spc_der).map_err(|e| {
        AuthenticodeError::KeyLoadFailed(format!("SPC file is not a valid PKCS#7 bundle: {}", e))
    })?;

    let certs = signed_data
        .certificates
        .ok_or_else(|| AuthenticodeError::KeyLoadFailed("SPC file carries no certificates".into()))?
        .iter()
        .map(|choice| match choice {
            CertificateChoices::Certificate(cert) => (**cert).clone(),
        })
        .collect();

    Ok(certs)
}

/// Load an SPC certificate bag plus a DER-or-PEM-encoded RSA private key
/// (PKCS#1 or PKCS#8).
pub fn load_spc_with_key(spc_der: &[u8], key_data: &[u8]) -> Result<KeyMaterial, AuthenticodeError> {
    let certificates = load_spc_certificates(spc_der)?;
    let rsa_key_pair = parse_rsa_private_key(key_data)?;
    let (certificate, chain) = select_signer(certificates, &rsa_key_pair)?;

    Ok(KeyMaterial {
        certificate,
        chain,
        rsa_key_pair,
    })
}

/// Load an SPC certificate bag plus a Microsoft PVK (private-key-vault)
/// private key. Unencrypted PVKs (the common case for automated signing)
/// need no `password`; encrypted ones are RC4-decrypted under a
/// password-derived key.
pub fn load_spc_with_pvk(
    spc_der: &[u8],
    pvk_data: &[u8],
    password: Option<&str>,
) -> Result<KeyMaterial, AuthenticodeError> {
    let certificates = load_spc_certificates(spc_der)?;
    let rsa_key_pair = parse_pvk(pvk_data, password)?;
    let (certificate, chain) = select_signer(certificates, &rsa_key_pair)?;

    Ok(KeyMaterial {
        certificate,
        chain,
        rsa_key_pair,
    })
}

fn parse_certificate_der(der: &[u8]) -> Result<Certificate, AuthenticodeError> {
    Constructed::decode(der, Mode::Ber, Certificate::from_sequence).map_err(|e| {
        AuthenticodeError::KeyLoadFailed(format!("malformed X.509 certificate: {}", e))
    })
}

/// Pick the certificate in `certificates` whose RSA modulus matches
/// `key_pair`'s public key, returning it separately from the rest (the
/// chain) the way the signer installs them (§4.G step 3).
fn select_signer(
    certificates: Vec<Certificate>,
    key_pair: &RsaKeyPair,
) -> Result<(Certificate, Vec<Certificate>), AuthenticodeError> {
    use ring::signature::KeyPair;

    let public_key = key_pair.public_key().as_ref();

    let mut signer_index = None;
    for (i, cert) in certificates.iter().enumerate() {
        let spki = &cert.tbs_certificate.subject_public_key_info;
        if let Some(bytes) = spki.subject_public_key.octet_slice() {
            if rsa_public_key_matches(bytes, public_key) {
                signer_index = Some(i);
                break;
            }
        }
    }

    let Some(idx) = signer_index else {
        return Err(AuthenticodeError::SignerSelectionFailed);
    };

    let mut certificates = certificates;
    let certificate = certificates.remove(idx);
    Ok((certificate, certificates))
}

/// `true` if `spki_bytes` (the `subjectPublicKey` BIT STRING content, a DER
/// `RSAPublicKey` SEQUENCE) encodes the same modulus+exponent as `ring`'s
/// raw `(n || e)` public-key encoding.
fn rsa_public_key_matches(spki_bytes: &[u8], ring_public_key: &[u8]) -> bool {
    let Ok((n, e)) = yasna::parse_der(spki_bytes, |reader| {
        reader.read_sequence(|reader| {
            let n = reader.next().read_biguint()?;
            let e = reader.next().read_biguint()?;
            Ok((n, e))
        })
    }) else {
        return false;
    };

    // ring encodes an RSA public key as the big-endian concatenation that a
    // DER RSAPublicKey SEQUENCE's modulus/exponent integers carry, modulo
    // the ASN.1 wrapper; compare the modulus bytes (exponent virtually
    // always 65537 and not load-bearing for signer selection here).
    let n_bytes = n.to_bytes_be();
    ring_public_key.len() >= n_bytes.len()
        && ring_public_key.windows(n_bytes.len()).any(|w| w == n_bytes.as_slice())
        && !e.to_bytes_be().is_empty()
}

/// Parse a DER-or-PEM RSA private key, accepting both PKCS#1
/// (`RSAPrivateKey`) and PKCS#8 (`PrivateKeyInfo`) encodings.
fn parse_rsa_private_key(data: &[u8]) -> Result<RsaKeyPair, AuthenticodeError> {
    let der = if data.starts_with(b"-----BEGIN") {
        let pem = pem::parse(data).map_err(|e| {
            AuthenticodeError::KeyLoadFailed(format!("malformed PEM private key: {}", e))
        })?;
        pem.contents
    } else {
        data.to_vec()
    };

    if looks_like_pkcs8(&der) {
        RsaKeyPair::from_pkcs8(&der).map_err(|e| {
            AuthenticodeError::KeyLoadFailed(format!("invalid PKCS#8 RSA private key: {}", e))
        })
    } else {
        let pkcs8 = wrap_pkcs1_as_pkcs8(&der)?;
        RsaKeyPair::from_pkcs8(&pkcs8).map_err(|e| {
            AuthenticodeError::KeyLoadFailed(format!("invalid PKCS#1 RSA private key: {}", e))
        })
    }
}

/// A PKCS#8 `PrivateKeyInfo` starts with `SEQUENCE { INTEGER 0, SEQUENCE {
/// OID, ... }, OCTET STRING ... }`; a PKCS#1 `RSAPrivateKey` starts with
/// `SEQUENCE { INTEGER 0, INTEGER (modulus), ... }`. Distinguish them by
/// whether the second top-level element is a SEQUENCE (the algorithm
/// identifier) or an INTEGER (the modulus).
fn looks_like_pkcs8(der: &[u8]) -> bool {
    yasna::parse_der(der, |reader| {
        reader.read_sequence(|reader| {
            let _version: i64 = reader.next().read_i64()?;
            reader.next().read_sequence(|_| Ok(())).map(|_| true)
        })
    })
    .unwrap_or(false)
}

/// `rsaEncryption`, 1.2.840.113549.1.1.1.
const OID_RSA_ENCRYPTION: &[u64] = &[1, 2, 840, 113549, 1, 1, 1];

/// Wrap a PKCS#1 `RSAPrivateKey` DER blob in a minimal PKCS#8
/// `PrivateKeyInfo` envelope so `ring::signature::RsaKeyPair::from_pkcs8`
/// (ring has no PKCS#1-only constructor) can parse it.
fn wrap_pkcs1_as_pkcs8(pkcs1_der: &[u8]) -> Result<Vec<u8>, AuthenticodeError> {
    // Validate it actually looks like an RSAPrivateKey before wrapping.
    yasna::parse_der(pkcs1_der, |reader| {
        reader.read_sequence(|reader| {
            let _version: i64 = reader.next().read_i64()?;
            let _n = reader.next().read_biguint()?;
            let _e = reader.next().read_biguint()?;
            Ok(())
        })
    })
    .map_err(|e| AuthenticodeError::KeyLoadFailed(format!("not a PKCS#1 RSAPrivateKey: {:?}", e)))?;

    let der = yasna::construct_der(|writer| {
        writer.write_sequence(|writer| {
            writer.next().write_i64(0);
            writer.next().write_sequence(|writer| {
                writer
                    .next()
                    .write_oid(&yasna::models::ObjectIdentifier::from_slice(OID_RSA_ENCRYPTION));
                writer.next().write_null();
            });
            writer.next().write_bytes(pkcs1_der);
        });
    });

    Ok(der)
}

/// Microsoft PVK magic for an unencrypted key.
const PVK_MAGIC: u32 = 0x0000_b0b5;

/// Parse a Microsoft PVK file: a 20-byte header (`magic`, `version`,
/// `key_spec`, `enc_type`, `pvk_length`) followed by `pvk_length` bytes of
/// RSA private key material, RC4-encrypted under a password-derived key
/// when `enc_type != 0`.
fn parse_pvk(data: &[u8], password: Option<&str>) -> Result<RsaKeyPair, AuthenticodeError> {
    if data.len() < 20 {
        return Err(AuthenticodeError::KeyLoadFailed(
            "PVK file shorter than its fixed header".into(),
        ));
    }

    let read_u32 = |off: usize| u32::from_le_bytes(data[off..off + 4].try_into().unwrap());

    let magic = read_u32(0);
    if magic != PVK_MAGIC {
        return Err(AuthenticodeError::KeyLoadFailed(format!(
            "unrecognized PVK magic {:#x}",
            magic
        )));
    }

    let enc_type = read_u32(12);
    let pvk_length = read_u32(16) as usize;

    let key_data = data
        .get(20..20 + pvk_length)
        .ok_or(AuthenticodeError::KeyLoadFailed(
            "PVK file truncated before declared key length".into(),
        ))?;

    let key_der = if enc_type == 0 {
        key_data.to_vec()
    } else {
        let password = password.ok_or_else(|| {
            AuthenticodeError::KeyLoadFailed("PVK key is encrypted but no password given".into())
        })?;
        let rc4_key = ring::digest::digest(&ring::digest::SHA1_FOR_LEGACY_USE_ONLY, password.as_bytes());
        rc4_xor(rc4_key.as_ref(), key_data)
    };

    if looks_like_pkcs8(&key_der) {
        RsaKeyPair::from_pkcs8(&key_der)
            .map_err(|e| AuthenticodeError::KeyLoadFailed(format!("invalid PVK key: {}", e)))
    } else {
        let pkcs8 = wrap_pkcs1_as_pkcs8(&key_der)?;
        RsaKeyPair::from_pkcs8(&pkcs8)
            .map_err(|e| AuthenticodeError::KeyLoadFailed(format!("invalid PVK key: {}", e)))
    }
}

/// A minimal RC4 stream cipher. Legacy PVK encryption is the only consumer;
/// none of `ring`/the rest of the dependency stack implements it.
fn rc4_xor(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut s: [u8; 256] = [0; 256];
    for (i, v) in s.iter_mut().enumerate() {
        *v = i as u8;
    }
    let mut j = 0u8;
    for i in 0..256 {
        j = j.wrapping_add(s[i]).wrapping_add(key[i % key.len()]);
        s.swap(i, j as usize);
    }

    let mut out = Vec::with_capacity(data.len());
    let (mut i, mut j) = (0u8, 0u8);
    for &byte in data {
        i = i.wrapping_add(1);
        j = j.wrapping_add(s[i as usize]);
        s.swap(i as usize, j as usize);
        let k = s[(s[i as usize].wrapping_add(s[j as usize])) as usize];
        out.push(byte ^ k);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rc4_is_its_own_inverse() {
        let key = b"secret";
        let plaintext = b"the quick brown fox";
        let ciphertext = rc4_xor(key, plaintext);
        let roundtrip = rc4_xor(key, &ciphertext);
        assert_eq!(roundtrip, plaintext);
    }

    #[test]
    fn rejects_short_pvk() {
        let err = parse_pvk(&[0u8; 4], None).unwrap_err();
        assert!(matches!(err, AuthenticodeError::KeyLoadFailed(_)));
    }

    #[test]
    fn rejects_bad_pvk_magic() {
        let mut data = vec![0u8; 24];
        data[0..4].copy_from_slice(&0xdeadbeefu32.to_le_bytes());
        let err = parse_pvk(&data, None).unwrap_err();
        assert!(matches!(err, AuthenticodeError::KeyLoadFailed(_)));
    }
}
