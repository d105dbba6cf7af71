// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `UTCTime`/`GeneralizedTime` primitives shared by the certificate and CMS
//! data structures.

use {
    bcder::{
        decode::{Constructed, ContentError, Primitive, Source},
        encode::{PrimitiveContent, Values},
        Mode, Tag,
    },
    chrono::{Datelike, TimeZone, Timelike},
    std::{io::Write, ops::Deref, str::FromStr},
};

/// A blob of already-DER-encoded bytes, inserted verbatim. Used for the
/// Microsoft signed attributes, whose DER is specified as literal byte
/// sequences (§4.G) rather than built up structurally.
#[derive(Clone, Debug)]
pub struct RawDer(pub Vec<u8>);

impl Values for RawDer {
    fn encoded_len(&self, _mode: Mode) -> usize {
        self.0.len()
    }

    fn write_encoded<W: Write>(&self, _mode: Mode, target: &mut W) -> Result<(), std::io::Error> {
        target.write_all(&self.0)
    }
}

/// DER definite-length octets for `len`. Shared by the few spots that hand-
/// write a primitive's tag/length/value rather than going through `bcder`'s
/// `PrimitiveContent` (implicitly-tagged strings, re-tagged captured content).
pub(crate) fn write_der_length<W: Write>(w: &mut W, len: usize) -> Result<(), std::io::Error> {
    if len < 0x80 {
        w.write_all(&[len as u8])
    } else if len < 0x100 {
        w.write_all(&[0x81, len as u8])
    } else if len < 0x10000 {
        w.write_all(&[0x82, (len >> 8) as u8, len as u8])
    } else {
        w.write_all(&[0x83, (len >> 16) as u8, (len >> 8) as u8, len as u8])
    }
}

/// A primitive value tagged with a raw context-class tag byte (e.g. `0x80`
/// for `[0] IMPLICIT`), writing `content` verbatim as the value octets. Used
/// for the SPC string/link CHOICEs, whose arms are implicitly-tagged
/// primitives of types (`BMPString`) `bcder` does not itself model.
#[derive(Clone, Debug)]
pub struct TaggedPrimitive {
    pub tag_byte: u8,
    pub content: Vec<u8>,
}

impl TaggedPrimitive {
    pub fn new(tag_byte: u8, content: Vec<u8>) -> Self {
        Self { tag_byte, content }
    }
}

impl Values for TaggedPrimitive {
    fn encoded_len(&self, _mode: Mode) -> usize {
        let mut len_len = 1;
        let n = self.content.len();
        if n >= 0x80 {
            len_len += if n < 0x100 {
                1
            } else if n < 0x10000 {
                2
            } else {
                3
            };
        }
        1 + len_len + n
    }

    fn write_encoded<W: Write>(&self, _mode: Mode, target: &mut W) -> Result<(), std::io::Error> {
        target.write_all(&[self.tag_byte])?;
        write_der_length(target, self.content.len())?;
        target.write_all(&self.content)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Time {
    UtcTime(UtcTime),
    GeneralTime(GeneralizedTime),
}

impl Time {
    pub fn take_from<S: Source>(cons: &mut Constructed<S>) -> Result<Self, S::Err> {
        cons.take_primitive(|tag, prim| match tag {
            Tag::UTC_TIME => Ok(Self::UtcTime(UtcTime::from_primitive(prim)?)),
            Tag::GENERALIZED_TIME => Ok(Self::GeneralTime(GeneralizedTime::from_primitive(prim)?)),
            _ => Err(ContentError::from("unexpected time tag").into()),
        })
    }

    pub fn encode_ref(&self) -> impl Values + '_ {
        match self {
            Self::UtcTime(utc) => (Some(utc.encode()), None),
            Self::GeneralTime(gt) => (None, Some(gt.encode())),
        }
    }
}

fn malformed<S: Source>() -> bcder::decode::DecodeError<S::Err> {
    ContentError::from("malformed time value").into()
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct GeneralizedTime(chrono::DateTime<chrono::Utc>);

impl Deref for GeneralizedTime {
    type Target = chrono::DateTime<chrono::Utc>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl GeneralizedTime {
    pub fn now() -> Self {
        Self(chrono::Utc::now())
    }

    pub fn take_from<S: Source>(cons: &mut Constructed<S>) -> Result<Self, S::Err> {
        cons.take_primitive_if(Tag::GENERALIZED_TIME, |prim| Self::from_primitive(prim))
    }

    pub fn from_primitive<S: Source>(prim: &mut Primitive<S>) -> Result<Self, S::Err> {
        let data = prim.take_all()?;

        if data.len() != "YYYYMMDDHHMMSSZ".len() || data[data.len() - 1] != b'Z' {
            return Err(malformed::<S>());
        }

        let field = |r: std::ops::Range<usize>| -> Result<i32, S::Err> {
            std::str::from_utf8(&data[r])
                .ok()
                .and_then(|s| i32::from_str(s).ok())
                .ok_or_else(malformed::<S>)
        };

        let year = field(0..4)?;
        let month = field(4..6)? as u32;
        let day = field(6..8)? as u32;
        let hour = field(8..10)? as u32;
        let minute = field(10..12)? as u32;
        let second = field(12..14)? as u32;

        chrono::Utc
            .with_ymd_and_hms(year, month, day, hour, minute, second)
            .single()
            .map(Self)
            .ok_or_else(malformed::<S>)
    }
}

impl ToString for GeneralizedTime {
    fn to_string(&self) -> String {
        format!(
            "{:04}{:02}{:02}{:02}{:02}{:02}Z",
            self.0.year(),
            self.0.month(),
            self.0.day(),
            self.0.hour(),
            self.0.minute(),
            self.0.second()
        )
    }
}

impl PrimitiveContent for GeneralizedTime {
    const TAG: Tag = Tag::GENERALIZED_TIME;

    fn encoded_len(&self, _: Mode) -> usize {
        self.to_string().len()
    }

    fn write_encoded<W: Write>(&self, _: Mode, target: &mut W) -> Result<(), std::io::Error> {
        target.write_all(self.to_string().as_bytes())
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UtcTime(chrono::DateTime<chrono::Utc>);

impl UtcTime {
    pub fn now() -> Self {
        Self(chrono::Utc::now())
    }

    pub fn take_from<S: Source>(cons: &mut Constructed<S>) -> Result<Self, S::Err> {
        cons.take_primitive_if(Tag::UTC_TIME, |prim| Self::from_primitive(prim))
    }

    pub fn from_primitive<S: Source>(prim: &mut Primitive<S>) -> Result<Self, S::Err> {
        let data = prim.take_all()?;

        if data.len() != "YYMMDDHHMMSSZ".len() || data[data.len() - 1] != b'Z' {
            return Err(malformed::<S>());
        }

        let field = |r: std::ops::Range<usize>| -> Result<i32, S::Err> {
            std::str::from_utf8(&data[r])
                .ok()
                .and_then(|s| i32::from_str(s).ok())
                .ok_or_else(malformed::<S>)
        };

        let year = field(0..2)?;
        let year = if year >= 50 { year + 1900 } else { year + 2000 };
        let month = field(2..4)? as u32;
        let day = field(4..6)? as u32;
        let hour = field(6..8)? as u32;
        let minute = field(8..10)? as u32;
        let second = field(10..12)? as u32;

        chrono::Utc
            .with_ymd_and_hms(year, month, day, hour, minute, second)
            .single()
            .map(Self)
            .ok_or_else(malformed::<S>)
    }
}

impl ToString for UtcTime {
    fn to_string(&self) -> String {
        format!(
            "{:02}{:02}{:02}{:02}{:02}{:02}Z",
            self.0.year() % 100,
            self.0.month(),
            self.0.day(),
            self.0.hour(),
            self.0.minute(),
            self.0.second()
        )
    }
}

impl Deref for UtcTime {
    type Target = chrono::DateTime<chrono::Utc>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl PrimitiveContent for UtcTime {
    const TAG: Tag = Tag::UTC_TIME;

    fn encoded_len(&self, _: Mode) -> usize {
        self.to_string().len()
    }

    fn write_encoded<W: Write>(&self, _: Mode, target: &mut W) -> Result<(), std::io::Error> {
        target.write_all(self.to_string().as_bytes())
    }
}
