// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Cabinet (CAB) header parsing, Authenticode digest computation with
//! reserve-area insertion, and the CAB-specific signature injector.

use crate::{digest::DigestAlgorithm, error::AuthenticodeError};

/// Parsed CAB header fields relevant to Authenticode signing.
#[derive(Clone, Copy, Debug)]
pub struct CabContext {
    pub cab_size: u32,
    pub offset_of_files: u32,
    pub num_folders: u16,
}

fn read_u32_le(data: &[u8], offset: usize) -> Result<u32, AuthenticodeError> {
    data.get(offset..offset + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or(AuthenticodeError::FileTooShort)
}

fn read_u16_le(data: &[u8], offset: usize) -> Result<u16, AuthenticodeError> {
    data.get(offset..offset + 2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .ok_or(AuthenticodeError::FileTooShort)
}

impl CabContext {
    pub fn parse(data: &[u8]) -> Result<Self, AuthenticodeError> {
        if data.len() < 36 {
            return Err(AuthenticodeError::FileTooShort);
        }

        let flags = read_u16_le(data, 0x1e)?;
        if flags != 0 {
            return Err(AuthenticodeError::CabFlagsUnsupported);
        }

        Ok(Self {
            cab_size: read_u32_le(data, 8)?,
            offset_of_files: read_u32_le(data, 16)?,
            num_folders: read_u16_le(data, 26)?,
        })
    }
}

/// Size of the reserve header this tool inserts (§4.D step 8).
const RESERVE_HEADER_LEN: usize = 20;

pub struct CabWalkResult {
    pub digest: Vec<u8>,
    pub output: Vec<u8>,
}

/// Digest `data` per the Authenticode CAB algorithm and produce the
/// rewritten output with the reserve area inserted (§4.D).
pub fn hash_and_rewrite(
    data: &[u8],
    ctx: &CabContext,
    digest_alg: DigestAlgorithm,
) -> Result<CabWalkResult, AuthenticodeError> {
    let mut hasher = digest_alg.digester();
    let mut output = Vec::with_capacity(data.len() + RESERVE_HEADER_LEN + 24);

    // 1. signature, hash + copy.
    hasher.update(&data[0..4]);
    output.extend_from_slice(&data[0..4]);

    // 2. reserved1, copy only.
    output.extend_from_slice(&data[4..8]);

    // 3. cab size, adjusted by +24, hash + copy the adjusted value.
    let adjusted_cab_size = ctx.cab_size + 24;
    let adjusted_cab_size_bytes = adjusted_cab_size.to_le_bytes();
    hasher.update(&adjusted_cab_size_bytes);
    output.extend_from_slice(&adjusted_cab_size_bytes);

    // 4. reserved2, hash + copy.
    hasher.update(&data[12..16]);
    output.extend_from_slice(&data[12..16]);

    // 5. files offset, adjusted by +24, hash + copy the adjusted value.
    let adjusted_files_offset = ctx.offset_of_files + 24;
    let adjusted_files_offset_bytes = adjusted_files_offset.to_le_bytes();
    hasher.update(&adjusted_files_offset_bytes);
    output.extend_from_slice(&adjusted_files_offset_bytes);

    // 6. 14-byte scratch (reserved3..setID) with header flags forced to
    // RESERVE_PRESENT (0x04), hash + copy the scratch.
    let mut scratch = [0u8; 14];
    scratch.copy_from_slice(&data[20..34]);
    scratch[10] = 0x04;
    hasher.update(&scratch);
    output.extend_from_slice(&scratch);

    // 7. iCabinet, copy unchanged.
    hasher.update(&data[34..36]);
    output.extend_from_slice(&data[34..36]);

    // 8. 20-byte reserve header: 8 zero bytes, adjusted cab size (not
    // hashed), a 0xdeadbeef placeholder for the asn1-blob length (patched by
    // the injector), then 4 zero bytes that *are* hashed.
    output.extend_from_slice(&[0u8; 8]);
    output.extend_from_slice(&adjusted_cab_size_bytes);
    output.extend_from_slice(&[0xde, 0xad, 0xbe, 0xef]);
    let tail = [0u8; 4];
    hasher.update(&tail);
    output.extend_from_slice(&tail);

    // 9. folder records: adjust each coffCabStart by +24, hash + copy.
    let mut i = 36usize;
    for _ in 0..ctx.num_folders {
        let coff_cab_start = read_u32_le(data, i)? + 24;
        let adjusted = coff_cab_start.to_le_bytes();
        hasher.update(&adjusted);
        output.extend_from_slice(&adjusted);

        let rest = data
            .get(i + 4..i + 8)
            .ok_or(AuthenticodeError::FileTooShort)?;
        hasher.update(rest);
        output.extend_from_slice(rest);

        i += 8;
    }

    // 10. remainder unchanged.
    let remainder = data.get(i..).ok_or(AuthenticodeError::FileTooShort)?;
    hasher.update(remainder);
    output.extend_from_slice(remainder);

    Ok(CabWalkResult {
        digest: hasher.finish(),
        output,
    })
}

/// Append the DER-encoded `SignedBundle` to `output` (8-byte aligned) and
/// patch the header's signature-size slot at offset `0x30` (§4.I).
pub fn inject(output: &mut Vec<u8>, signature_der: &[u8]) -> Result<(), AuthenticodeError> {
    let len = signature_der.len();
    let pad = (8 - (len % 8)) % 8;

    output.extend_from_slice(signature_der);
    output.extend(std::iter::repeat(0u8).take(pad));

    let total = (len + pad) as u32;
    if output.len() < 0x34 {
        return Err(AuthenticodeError::ContainerMalformed(
            "CAB output shorter than the fixed header".into(),
        ));
    }
    output[0x30..0x34].copy_from_slice(&total.to_le_bytes());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_cab() -> Vec<u8> {
        let mut data = vec![0u8; 44];
        data[0..4].copy_from_slice(b"MSCF");
        data[8..12].copy_from_slice(&(44u32).to_le_bytes());
        data[16..20].copy_from_slice(&(40u32).to_le_bytes());
        data[26..28].copy_from_slice(&1u16.to_le_bytes());
        data[36..40].copy_from_slice(&100u32.to_le_bytes());
        data
    }

    #[test]
    fn parses_header() {
        let data = minimal_cab();
        let ctx = CabContext::parse(&data).unwrap();
        assert_eq!(ctx.cab_size, 44);
        assert_eq!(ctx.offset_of_files, 40);
        assert_eq!(ctx.num_folders, 1);
    }

    #[test]
    fn rejects_unsupported_flags() {
        let mut data = minimal_cab();
        data[0x1e] = 0x01;
        assert!(matches!(
            CabContext::parse(&data),
            Err(AuthenticodeError::CabFlagsUnsupported)
        ));
    }

    #[test]
    fn rewrite_adjusts_size_fields_and_inserts_reserve() {
        let data = minimal_cab();
        let ctx = CabContext::parse(&data).unwrap();
        let result = hash_and_rewrite(&data, &ctx, DigestAlgorithm::Sha1).unwrap();
        // original header (36) + reserve header (20) + one folder record (8)
        // = 64; the input has no bytes left over after the folder record.
        assert_eq!(result.output.len(), 64);
        let new_size = u32::from_le_bytes(result.output[8..12].try_into().unwrap());
        assert_eq!(new_size, 68);
        let new_files_offset = u32::from_le_bytes(result.output[16..20].try_into().unwrap());
        assert_eq!(new_files_offset, 64);
        assert_eq!(result.output[30], 0x04);
    }
}
