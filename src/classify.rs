// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Magic-byte sniffing for the three container formats this tool signs.

use crate::error::AuthenticodeError;

/// The container format of an input file, determined from its magic bytes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FileKind {
    Pe,
    Cab,
    Msi,
}

const MSI_MAGIC: [u8; 8] = [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

impl FileKind {
    /// Classify `data` by its leading magic bytes.
    pub fn detect(data: &[u8]) -> Result<Self, AuthenticodeError> {
        if data.len() < 4 {
            return Err(AuthenticodeError::FileTooShort);
        }

        if &data[0..4] == b"MSCF" {
            Ok(Self::Cab)
        } else if &data[0..2] == b"MZ" {
            Ok(Self::Pe)
        } else if data.len() >= 8 && data[0..8] == MSI_MAGIC {
            Ok(Self::Msi)
        } else {
            Err(AuthenticodeError::UnknownFormat)
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pe => "PE",
            Self::Cab => "CAB",
            Self::Msi => "MSI",
        }
    }
}

impl std::fmt::Display for FileKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_pe() {
        let mut data = vec![0u8; 64];
        data[0] = b'M';
        data[1] = b'Z';
        assert_eq!(FileKind::detect(&data).unwrap(), FileKind::Pe);
    }

    #[test]
    fn detects_cab() {
        let data = b"MSCF\0\0\0\0".to_vec();
        assert_eq!(FileKind::detect(&data).unwrap(), FileKind::Cab);
    }

    #[test]
    fn detects_msi() {
        let mut data = MSI_MAGIC.to_vec();
        data.extend_from_slice(&[0u8; 8]);
        assert_eq!(FileKind::detect(&data).unwrap(), FileKind::Msi);
    }

    #[test]
    fn rejects_unknown() {
        let data = vec![0u8; 16];
        assert!(matches!(
            FileKind::detect(&data),
            Err(AuthenticodeError::UnknownFormat)
        ));
    }

    #[test]
    fn rejects_too_short() {
        let data = vec![0u8; 2];
        assert!(matches!(
            FileKind::detect(&data),
            Err(AuthenticodeError::FileTooShort)
        ));
    }
}
