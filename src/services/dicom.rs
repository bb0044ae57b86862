//! Minimal DICOM Part-10 reader.
//!
//! Only the four identifiers a STOW-RS transaction needs are extracted. The
//! data set is walked in tag order and parsing stops as soon as the
//! Series Instance UID has been passed, so pixel data is never touched.

use flate2::read::DeflateDecoder;
use std::borrow::Cow;
use std::io::Read;
use thiserror::Error;

const PREAMBLE_LEN: usize = 128;
const MAGIC: &[u8] = b"DICM";
const UNDEFINED_LENGTH: u32 = 0xFFFF_FFFF;
const MAX_SEQUENCE_DEPTH: usize = 32;
/// Only this much of a deflated data set is inflated; the identifying
/// attributes sit in groups 0008 and 0020, far ahead of pixel data.
const INFLATE_PREFIX: u64 = 4 * 1024 * 1024;

pub const IMPLICIT_VR_LITTLE_ENDIAN: &str = "1.2.840.10008.1.2";
pub const EXPLICIT_VR_LITTLE_ENDIAN: &str = "1.2.840.10008.1.2.1";
pub const DEFLATED_EXPLICIT_VR_LITTLE_ENDIAN: &str = "1.2.840.10008.1.2.1.99";
pub const EXPLICIT_VR_BIG_ENDIAN: &str = "1.2.840.10008.1.2.2";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Tag(pub u16, pub u16);

impl Tag {
    pub const TRANSFER_SYNTAX_UID: Tag = Tag(0x0002, 0x0010);
    pub const SOP_CLASS_UID: Tag = Tag(0x0008, 0x0016);
    pub const SOP_INSTANCE_UID: Tag = Tag(0x0008, 0x0018);
    pub const STUDY_INSTANCE_UID: Tag = Tag(0x0020, 0x000D);
    pub const SERIES_INSTANCE_UID: Tag = Tag(0x0020, 0x000E);

    const ITEM: Tag = Tag(0xFFFE, 0xE000);
    const ITEM_DELIMITATION: Tag = Tag(0xFFFE, 0xE00D);
    const SEQUENCE_DELIMITATION: Tag = Tag(0xFFFE, 0xE0DD);
}

impl std::fmt::Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:04X},{:04X})", self.0, self.1)
    }
}

#[derive(Error, Debug)]
pub enum DicomError {
    #[error("not a DICOM Part-10 file (missing DICM prefix)")]
    NotPart10,

    #[error("data set ended inside element {0}")]
    Truncated(Tag),

    #[error("malformed data set: {0}")]
    Malformed(String),

    #[error("cannot inflate deflated data set: {0}")]
    Inflate(#[from] std::io::Error),

    #[error("missing required attribute {0}")]
    MissingTag(Tag),
}

/// Identifying attributes of one SOP instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DicomIdentifiers {
    pub sop_class_uid: String,
    pub sop_instance_uid: String,
    pub study_instance_uid: String,
    pub series_instance_uid: String,
}

impl DicomIdentifiers {
    pub fn from_bytes(data: &[u8]) -> Result<Self, DicomError> {
        let partial = read_identifiers(data)?;
        Ok(Self {
            sop_class_uid: partial.sop_class_uid.ok_or(DicomError::MissingTag(Tag::SOP_CLASS_UID))?,
            sop_instance_uid: partial
                .sop_instance_uid
                .ok_or(DicomError::MissingTag(Tag::SOP_INSTANCE_UID))?,
            study_instance_uid: partial
                .study_instance_uid
                .ok_or(DicomError::MissingTag(Tag::STUDY_INSTANCE_UID))?,
            series_instance_uid: partial
                .series_instance_uid
                .ok_or(DicomError::MissingTag(Tag::SERIES_INSTANCE_UID))?,
        })
    }

    /// Best-effort variant used for failure reports, where any UID found is
    /// better than none.
    pub fn sop_reference(data: &[u8]) -> (String, String) {
        match read_identifiers(data) {
            Ok(p) => (
                p.sop_class_uid.unwrap_or_default(),
                p.sop_instance_uid.unwrap_or_default(),
            ),
            Err(_) => (String::new(), String::new()),
        }
    }
}

#[derive(Debug, Default)]
struct PartialIdentifiers {
    sop_class_uid: Option<String>,
    sop_instance_uid: Option<String>,
    study_instance_uid: Option<String>,
    series_instance_uid: Option<String>,
}

fn read_identifiers(data: &[u8]) -> Result<PartialIdentifiers, DicomError> {
    if data.len() < PREAMBLE_LEN + MAGIC.len() || &data[PREAMBLE_LEN..PREAMBLE_LEN + 4] != MAGIC {
        return Err(DicomError::NotPart10);
    }

    // File meta information is always explicit VR little endian.
    let mut meta = Cursor::new(data, PREAMBLE_LEN + MAGIC.len(), true, true);
    let mut transfer_syntax = EXPLICIT_VR_LITTLE_ENDIAN.to_string();
    while meta.remaining() >= 4 && meta.peek_group()? == 0x0002 {
        let header = meta.read_header()?;
        if header.len == UNDEFINED_LENGTH {
            return Err(DicomError::Malformed(format!(
                "undefined length in file meta element {}",
                header.tag
            )));
        }
        let value = meta.take(header.len, header.tag)?;
        if header.tag == Tag::TRANSFER_SYNTAX_UID {
            transfer_syntax = uid_value(value).unwrap_or(transfer_syntax);
        }
    }

    let rest = &data[meta.pos..];
    let (body, explicit, little): (Cow<'_, [u8]>, bool, bool) = match transfer_syntax.as_str() {
        IMPLICIT_VR_LITTLE_ENDIAN => (Cow::Borrowed(rest), false, true),
        EXPLICIT_VR_BIG_ENDIAN => (Cow::Borrowed(rest), true, false),
        DEFLATED_EXPLICIT_VR_LITTLE_ENDIAN => {
            let mut inflated = Vec::new();
            DeflateDecoder::new(rest)
                .take(INFLATE_PREFIX)
                .read_to_end(&mut inflated)?;
            (Cow::Owned(inflated), true, true)
        }
        // every other standard syntax encodes the data set as explicit VR LE
        _ => (Cow::Borrowed(rest), true, true),
    };

    let mut found = PartialIdentifiers::default();
    let mut ds = Cursor::new(&body, 0, explicit, little);
    while ds.remaining() > 0 {
        let header = ds.read_header()?;
        if header.tag > Tag::SERIES_INSTANCE_UID {
            break;
        }
        if header.len == UNDEFINED_LENGTH {
            ds.skip_undefined(&header, 0)?;
            continue;
        }
        let value = ds.take(header.len, header.tag)?;
        let slot = match header.tag {
            Tag::SOP_CLASS_UID => &mut found.sop_class_uid,
            Tag::SOP_INSTANCE_UID => &mut found.sop_instance_uid,
            Tag::STUDY_INSTANCE_UID => &mut found.study_instance_uid,
            Tag::SERIES_INSTANCE_UID => &mut found.series_instance_uid,
            _ => continue,
        };
        *slot = uid_value(value);
    }
    Ok(found)
}

/// First value of a UI element without its padding.
fn uid_value(value: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(value);
    let first = text.split('\\').next().unwrap_or_default();
    let trimmed = first.trim_matches(|c: char| c == '\0' || c.is_whitespace());
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

#[derive(Debug)]
struct ElementHeader {
    tag: Tag,
    vr: Option<[u8; 2]>,
    len: u32,
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
    explicit: bool,
    little: bool,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8], pos: usize, explicit: bool, little: bool) -> Self {
        Self {
            data,
            pos,
            explicit,
            little,
        }
    }

    fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    fn bytes<const N: usize>(&mut self, tag: Tag) -> Result<[u8; N], DicomError> {
        let slice = self
            .data
            .get(self.pos..self.pos + N)
            .ok_or(DicomError::Truncated(tag))?;
        self.pos += N;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }

    fn u16(&mut self, tag: Tag) -> Result<u16, DicomError> {
        let b = self.bytes::<2>(tag)?;
        Ok(if self.little {
            u16::from_le_bytes(b)
        } else {
            u16::from_be_bytes(b)
        })
    }

    fn u32(&mut self, tag: Tag) -> Result<u32, DicomError> {
        let b = self.bytes::<4>(tag)?;
        Ok(if self.little {
            u32::from_le_bytes(b)
        } else {
            u32::from_be_bytes(b)
        })
    }

    fn peek_group(&self) -> Result<u16, DicomError> {
        let b = self
            .data
            .get(self.pos..self.pos + 2)
            .ok_or(DicomError::Truncated(Tag(0, 0)))?;
        Ok(if self.little {
            u16::from_le_bytes([b[0], b[1]])
        } else {
            u16::from_be_bytes([b[0], b[1]])
        })
    }

    fn take(&mut self, len: u32, tag: Tag) -> Result<&'a [u8], DicomError> {
        let end = self.pos + len as usize;
        let slice = self.data.get(self.pos..end).ok_or(DicomError::Truncated(tag))?;
        self.pos = end;
        Ok(slice)
    }

    fn read_header(&mut self) -> Result<ElementHeader, DicomError> {
        let unknown = Tag(0, 0);
        let tag = Tag(self.u16(unknown)?, self.u16(unknown)?);

        // item and delimitation tags never carry a VR
        if tag.0 == 0xFFFE || !self.explicit {
            let len = self.u32(tag)?;
            return Ok(ElementHeader { tag, vr: None, len });
        }

        let vr = self.bytes::<2>(tag)?;
        let len = if has_long_length(&vr) {
            self.bytes::<2>(tag)?;
            self.u32(tag)?
        } else {
            u32::from(self.u16(tag)?)
        };
        Ok(ElementHeader {
            tag,
            vr: Some(vr),
            len,
        })
    }

    /// Skips an undefined-length sequence (or encapsulated value) up to and
    /// including its sequence delimitation item.
    fn skip_undefined(&mut self, header: &ElementHeader, depth: usize) -> Result<(), DicomError> {
        if depth > MAX_SEQUENCE_DEPTH {
            return Err(DicomError::Malformed("sequences nested too deeply".into()));
        }

        // UN with undefined length holds implicit VR little endian items
        let saved = (self.explicit, self.little);
        if header.vr == Some(*b"UN") {
            self.explicit = false;
            self.little = true;
        }

        let result = self.skip_items(depth);
        (self.explicit, self.little) = saved;
        result
    }

    fn skip_items(&mut self, depth: usize) -> Result<(), DicomError> {
        loop {
            let item = self.read_header()?;
            match item.tag {
                Tag::SEQUENCE_DELIMITATION => return Ok(()),
                Tag::ITEM if item.len == UNDEFINED_LENGTH => self.skip_item_dataset(depth + 1)?,
                Tag::ITEM => {
                    self.take(item.len, item.tag)?;
                }
                other => {
                    return Err(DicomError::Malformed(format!(
                        "unexpected {} inside a sequence",
                        other
                    )));
                }
            }
        }
    }

    fn skip_item_dataset(&mut self, depth: usize) -> Result<(), DicomError> {
        loop {
            let element = self.read_header()?;
            if element.tag == Tag::ITEM_DELIMITATION {
                return Ok(());
            }
            if element.len == UNDEFINED_LENGTH {
                self.skip_undefined(&element, depth)?;
            } else {
                self.take(element.len, element.tag)?;
            }
        }
    }
}

fn has_long_length(vr: &[u8; 2]) -> bool {
    matches!(
        vr,
        b"OB" | b"OD" | b"OF" | b"OL" | b"OV" | b"OW" | b"SQ" | b"SV" | b"UC" | b"UN" | b"UR"
            | b"UT" | b"UV"
    )
}
