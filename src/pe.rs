// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! PE/PE32+ header parsing, Authenticode digest computation, checksum
//! recomputation, and the PE-specific signature injector/extractor/remover.

use {
    crate::{
        digest::{pad_hashed, DigestAlgorithm, Hasher},
        error::AuthenticodeError,
    },
    scroll::{Pread, LE},
    std::io::{Cursor, Read, Seek, SeekFrom, Write},
};

/// Offset of the 4-byte `e_lfanew` field (the PE header offset) in the DOS
/// header.
const E_LFANEW_OFFSET: usize = 60;

/// Parsed PE header fields the walker and injector need. All offsets are
/// relative to the start of the file.
#[derive(Clone, Copy, Debug)]
pub struct PeContext {
    pub peheader_offset: u32,
    pub pe32plus: bool,
    pub nrvas: u32,
    pub sig_offset: u32,
    pub sig_length: u32,
}

impl PeContext {
    /// Offset of the checksum field, relative to the start of the file.
    pub fn checksum_offset(&self) -> usize {
        self.peheader_offset as usize + 88
    }

    /// Offset of the Certificate Table data-directory entry (`{ rva/offset,
    /// size }`, 8 bytes), relative to the start of the file.
    pub fn cert_dir_offset(&self) -> usize {
        self.peheader_offset as usize + 152 + 16 * usize::from(self.pe32plus)
    }

    pub fn parse(data: &[u8]) -> Result<Self, AuthenticodeError> {
        if data.len() < E_LFANEW_OFFSET + 4 {
            return Err(AuthenticodeError::FileTooShort);
        }

        let peheader_offset: u32 = data
            .pread_with(E_LFANEW_OFFSET, LE)
            .map_err(|_| AuthenticodeError::FileTooShort)?;

        let magic_offset = peheader_offset as usize + 24;
        if data.len() < magic_offset + 2 {
            return Err(AuthenticodeError::FileTooShort);
        }
        let magic: u16 = data
            .pread_with(magic_offset, LE)
            .map_err(|_| AuthenticodeError::FileTooShort)?;
        let pe32plus = match magic {
            0x10b => false,
            0x20b => true,
            _ => return Err(AuthenticodeError::PeUnknownMagic),
        };

        let nrvas_offset = peheader_offset as usize + 116 + 16 * usize::from(pe32plus);
        let cert_dir_offset = peheader_offset as usize + 152 + 16 * usize::from(pe32plus);
        if data.len() < cert_dir_offset + 8 {
            return Err(AuthenticodeError::FileTooShort);
        }

        let nrvas: u32 = data
            .pread_with(nrvas_offset, LE)
            .map_err(|_| AuthenticodeError::FileTooShort)?;
        if nrvas < 5 {
            return Err(AuthenticodeError::PeMissingCertDir);
        }

        let sig_offset: u32 = data
            .pread_with(cert_dir_offset, LE)
            .map_err(|_| AuthenticodeError::FileTooShort)?;
        let sig_length: u32 = data
            .pread_with(cert_dir_offset + 4, LE)
            .map_err(|_| AuthenticodeError::FileTooShort)?;

        if sig_offset > 0 && sig_offset as u64 + sig_length as u64 != data.len() as u64 {
            return Err(AuthenticodeError::PeSignatureNotAtEnd);
        }

        Ok(Self {
            peheader_offset,
            pe32plus,
            nrvas,
            sig_offset,
            sig_length,
        })
    }
}

/// The result of walking a PE file: the Authenticode digest, and a rewritten
/// copy of the file (checksum and certificate-table entry zeroed, truncated
/// to the unsigned content, 8-byte aligned) ready for the injector to append
/// a signature to.
pub struct PeWalkResult {
    pub digest: Vec<u8>,
    pub output: Vec<u8>,
}

/// Digest `data` per the Authenticode PE algorithm (§4.C) and produce the
/// rewritten (unsigned, checksum/cert-dir-zeroed, 8-byte-aligned) output the
/// injector appends a signature to.
pub fn hash_and_rewrite(
    data: &[u8],
    ctx: &PeContext,
    digest_alg: DigestAlgorithm,
) -> Result<PeWalkResult, AuthenticodeError> {
    let file_end = if ctx.sig_offset > 0 {
        ctx.sig_offset as u64
    } else {
        data.len() as u64
    };

    let mut reader = Cursor::new(data);
    let mut output = Vec::with_capacity(file_end as usize);
    let mut hasher = digest_alg.digester();

    let checksum_off = ctx.checksum_offset();
    let cert_dir_off = ctx.cert_dir_offset();

    crate::digest::copy_hashed(&mut reader, Some(&mut output), &mut hasher, checksum_off as u64)?;

    reader.seek(SeekFrom::Current(4))?;
    output.write_all(&[0u8; 4])?;

    let between_len = (cert_dir_off - (checksum_off + 4)) as u64;
    crate::digest::copy_hashed(&mut reader, Some(&mut output), &mut hasher, between_len)?;

    reader.seek(SeekFrom::Current(8))?;
    output.write_all(&[0u8; 8])?;

    let remaining = file_end - (cert_dir_off as u64 + 8);
    crate::digest::copy_hashed(&mut reader, Some(&mut output), &mut hasher, remaining)?;

    let pad = (8 - (file_end % 8)) % 8;
    if pad > 0 {
        pad_hashed(Some(&mut output), &mut hasher, pad as usize)?;
    }

    Ok(PeWalkResult {
        digest: hasher.finish(),
        output,
    })
}

/// Recompute the PE checksum over `buf`, treating the 4 bytes at
/// `checksum_offset` as zero, per §4.C.
pub fn recalc_pe_checksum(buf: &[u8], checksum_offset: usize) -> u32 {
    let mut sum: u64 = 0;
    let mut i = 0;

    while i + 1 < buf.len() {
        let word = if i == checksum_offset || i == checksum_offset + 2 {
            0
        } else {
            u16::from_le_bytes([buf[i], buf[i + 1]]) as u64
        };
        sum += word;
        sum = (sum & 0xffff_ffff) + (sum >> 32);
        i += 2;
    }

    if i < buf.len() {
        sum += buf[i] as u64;
    }

    sum = (sum & 0xffff) + (sum >> 16);
    sum = (sum & 0xffff) + (sum >> 16);
    sum += buf.len() as u64;

    sum as u32
}

/// Write the recomputed checksum into `buf` at `checksum_offset`.
pub fn write_checksum(buf: &mut [u8], checksum_offset: usize) {
    let checksum = recalc_pe_checksum(buf, checksum_offset);
    buf[checksum_offset..checksum_offset + 4].copy_from_slice(&checksum.to_le_bytes());
}

/// Append the DER-encoded `SignedBundle` to `output` (8-byte aligned) and
/// patch the certificate-table directory entry and checksum in place (§4.I).
pub fn inject(output: &mut Vec<u8>, ctx: &PeContext, signature_der: &[u8]) -> Result<(), AuthenticodeError> {
    let sig_offset = output.len() as u32;
    let header_len = 8u32;
    let entry_len = header_len + signature_der.len() as u32;
    let pad = (8 - (entry_len % 8)) % 8;

    output.write_all(&entry_len.to_le_bytes())?;
    output.write_all(&0x0200u16.to_le_bytes())?;
    output.write_all(&0x0002u16.to_le_bytes())?;
    output.write_all(signature_der)?;
    output.write_all(&vec![0u8; pad as usize])?;

    let cert_dir_off = ctx.cert_dir_offset();
    let total_len = entry_len + pad;
    output[cert_dir_off..cert_dir_off + 4].copy_from_slice(&sig_offset.to_le_bytes());
    output[cert_dir_off + 4..cert_dir_off + 8].copy_from_slice(&total_len.to_le_bytes());

    write_checksum(output, ctx.checksum_offset());

    Ok(())
}

/// `extract-signature`: copy the raw `WIN_CERTIFICATE` bytes out of `data`
/// without touching anything else.
pub fn extract_signature(data: &[u8], ctx: &PeContext) -> Result<Vec<u8>, AuthenticodeError> {
    if ctx.sig_offset == 0 || ctx.sig_length == 0 {
        return Err(AuthenticodeError::NoSignaturePresent);
    }
    let start = ctx.sig_offset as usize;
    let end = start + ctx.sig_length as usize;
    if end > data.len() {
        return Err(AuthenticodeError::FileTooShort);
    }
    Ok(data[start..end].to_vec())
}

/// `remove-signature`: regenerate the image with the checksum and
/// certificate-table entry zeroed, then recompute the checksum (§4.I).
pub fn remove_signature(data: &[u8], ctx: &PeContext) -> Result<Vec<u8>, AuthenticodeError> {
    let file_end = if ctx.sig_offset > 0 {
        ctx.sig_offset as usize
    } else {
        data.len()
    };

    let mut output = data[..file_end].to_vec();
    let checksum_off = ctx.checksum_offset();
    output[checksum_off..checksum_off + 4].fill(0);
    let cert_dir_off = ctx.cert_dir_offset();
    output[cert_dir_off..cert_dir_off + 8].fill(0);

    write_checksum(&mut output, checksum_off);

    Ok(output)
}

/// Walk the `WIN_CERTIFICATE` array at `sig_offset` and return the DER bytes
/// of each entry with `revision == 0x0200` and `type == 0x0002` (§4.J step 2).
pub fn win_certificate_entries(data: &[u8], sig_offset: u32, sig_length: u32) -> Vec<Vec<u8>> {
    let mut entries = Vec::new();
    let start = sig_offset as usize;
    let end = (sig_offset as u64 + sig_length as u64) as usize;
    if end > data.len() || start >= end {
        return entries;
    }

    let mut cursor = start;
    while cursor + 8 <= end {
        let Ok(length) = data.pread_with::<u32>(cursor, LE) else {
            break;
        };
        let length = length as usize;
        if length < 8 || cursor + length > end {
            break;
        }
        let revision = data.pread_with::<u16>(cursor + 4, LE).unwrap_or(0);
        let cert_type = data.pread_with::<u16>(cursor + 6, LE).unwrap_or(0);

        if revision == 0x0200 && cert_type == 0x0002 {
            entries.push(data[cursor + 8..cursor + length].to_vec());
        }

        let aligned = (length + 7) & !7;
        cursor += aligned.max(8);
    }

    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_pe(pe32plus: bool) -> Vec<u8> {
        let peheader_offset: u32 = 64;
        let optional_header_len = if pe32plus { 112 } else { 96 } + 8 * 16;
        let mut data = vec![0u8; peheader_offset as usize + 24 + optional_header_len];
        data[0] = b'M';
        data[1] = b'Z';
        data[E_LFANEW_OFFSET..E_LFANEW_OFFSET + 4].copy_from_slice(&peheader_offset.to_le_bytes());
        let magic: u16 = if pe32plus { 0x20b } else { 0x10b };
        data[peheader_offset as usize + 24..peheader_offset as usize + 26]
            .copy_from_slice(&magic.to_le_bytes());
        let nrvas_offset = peheader_offset as usize + 116 + 16 * usize::from(pe32plus);
        data[nrvas_offset..nrvas_offset + 4].copy_from_slice(&16u32.to_le_bytes());
        data
    }

    #[test]
    fn parses_pe32_header() {
        let data = minimal_pe(false);
        let ctx = PeContext::parse(&data).unwrap();
        assert!(!ctx.pe32plus);
        assert_eq!(ctx.sig_offset, 0);
        assert_eq!(ctx.cert_dir_offset(), ctx.peheader_offset as usize + 152);
    }

    #[test]
    fn parses_pe32plus_header() {
        let data = minimal_pe(true);
        let ctx = PeContext::parse(&data).unwrap();
        assert!(ctx.pe32plus);
        assert_eq!(ctx.cert_dir_offset(), ctx.peheader_offset as usize + 168);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut data = minimal_pe(false);
        let peheader_offset = 64usize;
        data[peheader_offset + 24] = 0xff;
        data[peheader_offset + 25] = 0xff;
        assert!(matches!(
            PeContext::parse(&data),
            Err(AuthenticodeError::PeUnknownMagic)
        ));
    }

    #[test]
    fn checksum_is_stable_for_identical_buffers() {
        let data = minimal_pe(false);
        let a = recalc_pe_checksum(&data, 88);
        let b = recalc_pe_checksum(&data, 88);
        assert_eq!(a, b);
    }

    #[test]
    fn hash_and_rewrite_zeroes_checksum_and_cert_dir() {
        let data = minimal_pe(false);
        let ctx = PeContext::parse(&data).unwrap();
        let result = hash_and_rewrite(&data, &ctx, DigestAlgorithm::Sha256).unwrap();
        let checksum_off = ctx.checksum_offset();
        assert_eq!(&result.output[checksum_off..checksum_off + 4], &[0u8; 4]);
        let cert_dir_off = ctx.cert_dir_offset();
        assert_eq!(&result.output[cert_dir_off..cert_dir_off + 8], &[0u8; 8]);
        assert_eq!(result.output.len() % 8, 0);
        assert_eq!(result.digest.len(), DigestAlgorithm::Sha256.digest_len());
    }
}
