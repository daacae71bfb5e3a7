//! EXIF orientation reader.
//!
//! Accepts a whole JPEG stream, an APP1 payload starting with the
//! `Exif\0\0` signature, or a bare TIFF header. Only IFD0 is walked;
//! the orientation tag lives there by definition.

use crate::error::{KycError, Result};

const ORIENTATION_TAG: u16 = 0x0112;
const TYPE_SHORT: u16 = 3;
const EXIF_SIGNATURE: &[u8] = b"Exif\0\0";

/// Orientation applied when the metadata carries none.
pub const DEFAULT_ORIENTATION: u8 = 1;

/// Read the EXIF orientation (1-8) from JPEG metadata.
pub fn orientation(bytes: &[u8]) -> Result<u8> {
    let tiff = locate_tiff(bytes)?;
    let value = read_orientation(tiff)?;
    if (1..=8).contains(&value) {
        Ok(value as u8)
    } else {
        Err(KycError::NoExifData(format!(
            "orientation value {} outside [1, 8]",
            value
        )))
    }
}

/// Same as [`orientation`], falling back to [`DEFAULT_ORIENTATION`].
pub fn orientation_or_default(bytes: &[u8]) -> u8 {
    orientation(bytes).unwrap_or(DEFAULT_ORIENTATION)
}

fn locate_tiff(bytes: &[u8]) -> Result<&[u8]> {
    if let Some(rest) = bytes.strip_prefix(EXIF_SIGNATURE) {
        return Ok(rest);
    }
    if bytes.starts_with(b"II*\0") || bytes.starts_with(b"MM\0*") {
        return Ok(bytes);
    }
    if bytes.starts_with(&[0xFF, 0xD8]) {
        return find_app1(bytes);
    }
    Err(no_exif("not a JPEG stream nor EXIF payload"))
}

/// Walk JPEG markers up to the start of scan looking for an EXIF APP1.
fn find_app1(jpeg: &[u8]) -> Result<&[u8]> {
    let mut pos = 2;
    while pos + 4 <= jpeg.len() {
        if jpeg[pos] != 0xFF {
            return Err(no_exif("corrupt marker stream"));
        }
        let marker = jpeg[pos + 1];
        // Fill bytes
        if marker == 0xFF {
            pos += 1;
            continue;
        }
        // Standalone markers carry no length
        if marker == 0x01 || (0xD0..=0xD7).contains(&marker) {
            pos += 2;
            continue;
        }
        if marker == 0xDA || marker == 0xD9 {
            break;
        }

        let length = u16::from_be_bytes([jpeg[pos + 2], jpeg[pos + 3]]) as usize;
        if length < 2 || pos + 2 + length > jpeg.len() {
            return Err(no_exif("truncated segment"));
        }
        let payload = &jpeg[pos + 4..pos + 2 + length];
        if marker == 0xE1 {
            if let Some(tiff) = payload.strip_prefix(EXIF_SIGNATURE) {
                return Ok(tiff);
            }
        }
        pos += 2 + length;
    }
    Err(no_exif("no EXIF segment"))
}

#[derive(Clone, Copy)]
enum ByteOrder {
    Little,
    Big,
}

impl ByteOrder {
    fn u16(self, b: &[u8]) -> u16 {
        match self {
            ByteOrder::Little => u16::from_le_bytes([b[0], b[1]]),
            ByteOrder::Big => u16::from_be_bytes([b[0], b[1]]),
        }
    }

    fn u32(self, b: &[u8]) -> u32 {
        match self {
            ByteOrder::Little => u32::from_le_bytes([b[0], b[1], b[2], b[3]]),
            ByteOrder::Big => u32::from_be_bytes([b[0], b[1], b[2], b[3]]),
        }
    }
}

fn read_orientation(tiff: &[u8]) -> Result<u16> {
    if tiff.len() < 8 {
        return Err(no_exif("truncated TIFF header"));
    }
    let order = match &tiff[..2] {
        b"II" => ByteOrder::Little,
        b"MM" => ByteOrder::Big,
        _ => return Err(no_exif("unknown TIFF byte order")),
    };
    if order.u16(&tiff[2..4]) != 42 {
        return Err(no_exif("bad TIFF magic"));
    }

    let ifd = order.u32(&tiff[4..8]) as usize;
    if ifd + 2 > tiff.len() {
        return Err(no_exif("IFD0 offset out of bounds"));
    }
    let count = order.u16(&tiff[ifd..ifd + 2]) as usize;

    for i in 0..count {
        let entry = ifd + 2 + i * 12;
        if entry + 12 > tiff.len() {
            return Err(no_exif("truncated IFD0"));
        }
        let tag = order.u16(&tiff[entry..entry + 2]);
        if tag != ORIENTATION_TAG {
            continue;
        }
        if order.u16(&tiff[entry + 2..entry + 4]) != TYPE_SHORT {
            return Err(no_exif("orientation tag is not a SHORT"));
        }
        // Inline value, left-justified in the 4-byte field
        return Ok(order.u16(&tiff[entry + 8..entry + 10]));
    }
    Err(no_exif("no orientation tag"))
}

fn no_exif(reason: &str) -> KycError {
    KycError::NoExifData(reason.to_string())
}
