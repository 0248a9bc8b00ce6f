//! Physical-resolution reader for JPEG, PNG and TIFF files.
//!
//! Only the handful of fields needed for original-size scaling are read:
//!
//! - JPEG: JFIF APP0 density (units 1 = dpi, 2 = dots per cm).
//! - PNG: the `pHYs` chunk (pixels per metre, unit byte 1).
//! - Otherwise the EXIF/TIFF tags XResolution, YResolution and
//!   ResolutionUnit (2 = inch, 3 = cm), read with `kamadak-exif`. This
//!   covers JPEG APP1, PNG `eXIf`, WebP and plain TIFF files.
//!
//! Headers are streamed from a buffered reader; JPEG and PNG files are
//! never read past their header segments. The container is recognized by
//! magic bytes, not extension. Any parse failure yields `None`; a missing
//! resolution is not an error until a request actually needs it.

use super::backend::Resolution;
use exif::{In, Tag, Value};
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

const CM_PER_INCH: f64 = 2.54;
const INCH_PER_METRE: f64 = 0.0254;

const JPEG_SOI: &[u8] = &[0xFF, 0xD8];
const JFIF_ID: &[u8] = b"JFIF\0";
const PNG_SIGNATURE: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

/// Read the resolution of a file. `None` when absent or unreadable.
pub fn read_resolution(path: &Path) -> Option<Resolution> {
    let file = File::open(path).ok()?;
    read_from(&mut BufReader::new(file))
}

/// Read the resolution from any seekable image stream.
pub fn read_from<R: BufRead + Seek>(reader: &mut R) -> Option<Resolution> {
    let mut magic = [0u8; 8];
    reader.read_exact(&mut magic).ok()?;

    let header = if magic.starts_with(JPEG_SOI) {
        reader.seek(SeekFrom::Start(JPEG_SOI.len() as u64)).ok()?;
        jfif_density(reader)
    } else if magic == PNG_SIGNATURE {
        png_phys(reader)
    } else {
        None
    };
    header.or_else(|| exif_resolution(reader))
}

fn valid(res: Resolution) -> Option<Resolution> {
    (res.x.is_finite() && res.y.is_finite() && res.x > 0.0 && res.y > 0.0).then_some(res)
}

fn read_u16_be<R: Read>(reader: &mut R) -> Option<u16> {
    let mut b = [0u8; 2];
    reader.read_exact(&mut b).ok()?;
    Some(u16::from_be_bytes(b))
}

fn read_u32_be<R: Read>(reader: &mut R) -> Option<u32> {
    let mut b = [0u8; 4];
    reader.read_exact(&mut b).ok()?;
    Some(u32::from_be_bytes(b))
}

/// Walk the JPEG header segments up to the scan, looking for JFIF APP0.
fn jfif_density<R: Read + Seek>(reader: &mut R) -> Option<Resolution> {
    loop {
        let mut byte = [0u8; 1];
        reader.read_exact(&mut byte).ok()?;
        if byte[0] != 0xFF {
            return None;
        }
        // fill bytes
        let mut marker = 0xFF;
        while marker == 0xFF {
            reader.read_exact(&mut byte).ok()?;
            marker = byte[0];
        }
        // SOS: entropy-coded data follows, no more headers
        if marker == 0xDA || marker == 0xD9 {
            return None;
        }
        let body_len = (read_u16_be(reader)? as usize).checked_sub(2)?;
        if marker == 0xE0 && body_len >= JFIF_ID.len() + 7 {
            let mut body = vec![0u8; body_len];
            reader.read_exact(&mut body).ok()?;
            if let Some(res) = body.strip_prefix(JFIF_ID).and_then(parse_jfif) {
                return Some(res);
            }
        } else {
            reader.seek(SeekFrom::Current(body_len as i64)).ok()?;
        }
    }
}

/// JFIF body after the identifier: version (2), units (1), Xdensity (2), Ydensity (2).
fn parse_jfif(body: &[u8]) -> Option<Resolution> {
    let units = *body.get(2)?;
    let x = u16::from_be_bytes([*body.get(3)?, *body.get(4)?]) as f64;
    let y = u16::from_be_bytes([*body.get(5)?, *body.get(6)?]) as f64;
    match units {
        1 => valid(Resolution { x, y }),
        2 => valid(Resolution {
            x: x * CM_PER_INCH,
            y: y * CM_PER_INCH,
        }),
        // 0 = aspect ratio only
        _ => None,
    }
}

/// Walk PNG chunks up to the image data, looking for `pHYs`.
fn png_phys<R: Read + Seek>(reader: &mut R) -> Option<Resolution> {
    loop {
        let len = read_u32_be(reader)?;
        let mut kind = [0u8; 4];
        reader.read_exact(&mut kind).ok()?;
        match &kind {
            b"pHYs" if len >= 9 => {
                let x = read_u32_be(reader)? as f64;
                let y = read_u32_be(reader)? as f64;
                let mut unit = [0u8; 1];
                reader.read_exact(&mut unit).ok()?;
                // unit 0 = aspect ratio only
                if unit[0] != 1 {
                    return None;
                }
                return valid(Resolution {
                    x: x * INCH_PER_METRE,
                    y: y * INCH_PER_METRE,
                });
            }
            // pHYs must precede the image data
            b"IDAT" | b"IEND" => return None,
            // body + crc
            _ => {
                reader.seek(SeekFrom::Current(len as i64 + 4)).ok()?;
            }
        }
    }
}

/// Resolution tags of the primary image's EXIF/TIFF directory.
fn exif_resolution<R: BufRead + Seek>(reader: &mut R) -> Option<Resolution> {
    reader.rewind().ok()?;
    let exif = exif::Reader::new().read_from_container(reader).ok()?;
    let rational = |tag: Tag| match &exif.get_field(tag, In::PRIMARY)?.value {
        Value::Rational(v) => v.first().map(|r| r.to_f64()),
        _ => None,
    };
    let x = rational(Tag::XResolution)?;
    let y = rational(Tag::YResolution)?;
    // TIFF default unit is the inch
    let unit = exif
        .get_field(Tag::ResolutionUnit, In::PRIMARY)
        .and_then(|f| f.value.get_uint(0))
        .unwrap_or(2);
    match unit {
        2 => valid(Resolution { x, y }),
        3 => valid(Resolution {
            x: x * CM_PER_INCH,
            y: y * CM_PER_INCH,
        }),
        _ => None,
    }
}
