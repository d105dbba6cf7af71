// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! MSI (OLE compound-file) traversal: name-sorted stream hashing/copying and
//! the Authenticode name-compression decoder used to recognize the
//! `\u{5}DigitalSignature` stream. Directory I/O itself is delegated to the
//! `cfb` crate.

use {
    crate::{digest::DigestAlgorithm, error::AuthenticodeError},
    std::io::{Cursor, Read, Write},
};

/// The stream Windows Installer reserves for the Authenticode signature.
pub const DIGITAL_SIGNATURE_STREAM: &str = "\u{5}DigitalSignature";

const BASE64_ALPHABET: &[u8; 64] =
    b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz._";

fn utf8_char_len(lead: u8) -> usize {
    if lead & 0x80 == 0 {
        1
    } else if lead & 0xe0 == 0xc0 {
        2
    } else if lead & 0xf0 == 0xe0 {
        3
    } else {
        4
    }
}

/// Reverse the MSI stream-name compression that substitutes runs of
/// `[0-9A-Za-z._]` characters with private-use codepoints (§4.E).
pub fn decode_msi_name(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = String::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if i + 3 <= bytes.len() && bytes[i] == 0xe4 && bytes[i + 1] == 0xa1 && bytes[i + 2] == 0x80
        {
            // Leading tag marking a fully-compressed name; carries no
            // character of its own.
            i += 3;
            continue;
        }

        if i + 3 <= bytes.len()
            && ((bytes[i] == 0xe3 && bytes[i + 1] >= 0xa0) || (bytes[i] == 0xe4 && bytes[i + 1] < 0xa0))
        {
            let cp = ((bytes[i] as u32 & 0x0f) << 12)
                | ((bytes[i + 1] as u32 & 0x3f) << 6)
                | (bytes[i + 2] as u32 & 0x3f);
            let v = cp - 0x3800;
            out.push(BASE64_ALPHABET[((v >> 6) & 0x3f) as usize] as char);
            out.push(BASE64_ALPHABET[(v & 0x3f) as usize] as char);
            i += 3;
            continue;
        }

        if i + 3 <= bytes.len() && bytes[i] == 0xe4 && bytes[i + 1] == 0xa0 {
            let cp = ((bytes[i] as u32 & 0x0f) << 12)
                | ((bytes[i + 1] as u32 & 0x3f) << 6)
                | (bytes[i + 2] as u32 & 0x3f);
            out.push(BASE64_ALPHABET[(cp & 0x3f) as usize] as char);
            i += 3;
            continue;
        }

        let len = utf8_char_len(bytes[i]).min(bytes.len() - i);
        if let Ok(s) = std::str::from_utf8(&bytes[i..i + len]) {
            out.push_str(s);
        }
        i += len;
    }

    out
}

/// Compare two (raw, as stored) stream names the way the OLE directory
/// orders its entries: UTF-16LE byte comparison, shorter-is-lesser on a
/// common prefix (§4.E).
pub fn compare_names(a: &str, b: &str) -> std::cmp::Ordering {
    let a16: Vec<u8> = a.encode_utf16().flat_map(|u| u.to_le_bytes()).collect();
    let b16: Vec<u8> = b.encode_utf16().flat_map(|u| u.to_le_bytes()).collect();
    let n = a16.len().min(b16.len());
    match a16[..n].cmp(&b16[..n]) {
        std::cmp::Ordering::Equal => a16.len().cmp(&b16.len()),
        other => other,
    }
}

pub struct MsiWalkResult {
    pub digest: Vec<u8>,
    pub output: Vec<u8>,
}

/// Traverse `data`'s OLE directory in Authenticode order, hashing every
/// stream except `\u{5}DigitalSignature` plus the root class-id, and write
/// a rewritten copy with the same streams (§4.E).
pub fn hash_and_rewrite(
    data: &[u8],
    digest_alg: DigestAlgorithm,
) -> Result<MsiWalkResult, AuthenticodeError> {
    let mut input = cfb::CompoundFile::open(Cursor::new(data))
        .map_err(|e| AuthenticodeError::ContainerMalformed(format!("opening OLE input: {}", e)))?;

    let mut names: Vec<String> = input
        .read_root_storage()
        .filter(|entry| entry.is_stream())
        .map(|entry| entry.name().to_string())
        .filter(|name| decode_msi_name(name) != DIGITAL_SIGNATURE_STREAM)
        .collect();
    names.sort_by(|a, b| compare_names(a, b));

    let mut hasher = digest_alg.digester();
    let mut output_storage = cfb::CompoundFile::create(Cursor::new(Vec::new()))
        .map_err(|e| AuthenticodeError::ContainerMalformed(format!("creating OLE output: {}", e)))?;

    for name in &names {
        let path = format!("/{}", name);
        let mut buf = Vec::new();
        input
            .open_stream(&path)
            .map_err(|e| AuthenticodeError::ContainerMalformed(format!("opening stream {}: {}", path, e)))?
            .read_to_end(&mut buf)?;

        hasher.update(&buf);

        output_storage
            .create_stream(&path)
            .map_err(|e| AuthenticodeError::ContainerMalformed(format!("creating stream {}: {}", path, e)))?
            .write_all(&buf)?;
    }

    let class_id = input.root_entry().clsid();
    hasher.update(class_id.as_bytes());

    let output = output_storage
        .into_inner()
        .into_inner();

    Ok(MsiWalkResult {
        digest: hasher.finish(),
        output,
    })
}

/// Create a `\u{5}DigitalSignature` stream in `output` and write the
/// DER-encoded `SignedBundle` to it (§4.I).
pub fn inject(output: Vec<u8>, signature_der: &[u8]) -> Result<Vec<u8>, AuthenticodeError> {
    let mut comp = cfb::CompoundFile::open(Cursor::new(output))
        .map_err(|e| AuthenticodeError::ContainerMalformed(format!("opening OLE output: {}", e)))?;
    comp.create_stream(format!("/{}", DIGITAL_SIGNATURE_STREAM))
        .map_err(|e| AuthenticodeError::ContainerMalformed(format!("creating signature stream: {}", e)))?
        .write_all(signature_der)?;

    Ok(comp.into_inner().into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_plain_ascii_passthrough() {
        assert_eq!(decode_msi_name("Tables"), "Tables");
    }

    #[test]
    fn decodes_digital_signature_name_unchanged() {
        assert_eq!(decode_msi_name(DIGITAL_SIGNATURE_STREAM), DIGITAL_SIGNATURE_STREAM);
    }

    #[test]
    fn compare_names_orders_by_utf16_prefix() {
        assert_eq!(compare_names("a", "b"), std::cmp::Ordering::Less);
        assert_eq!(compare_names("ab", "a"), std::cmp::Ordering::Greater);
        assert_eq!(compare_names("a", "a"), std::cmp::Ordering::Equal);
    }
}
