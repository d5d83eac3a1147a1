//! Content sniffing: MIME types from leading bytes, and pixel dimensions read
//! straight from JPEG2000 headers.
//!
//! File names are never trusted. A master called `page_001.tif` that is
//! really a JPEG is rejected, and an upload's `Content-Type` is whatever its
//! bytes say it is.

use crate::error::PipelineError;
use std::io::Read;
use std::path::Path;

pub const MIME_TIFF: &str = "image/tiff";
pub const MIME_JP2: &str = "image/jp2";
pub const MIME_PDF: &str = "application/pdf";
pub const MIME_JSON: &str = "application/json";
pub const MIME_OCTET_STREAM: &str = "application/octet-stream";

const JP2_SIGNATURE: &[u8] = &[0x00, 0x00, 0x00, 0x0C, b'j', b'P', b' ', b' ', 0x0D, 0x0A, 0x87, 0x0A];
const J2K_SOC_SIZ: &[u8] = &[0xFF, 0x4F, 0xFF, 0x51];
/// BigTIFF (version 43), little- and big-endian.
const BIGTIFF_LE: &[u8] = b"II+\0";
const BIGTIFF_BE: &[u8] = b"MM\0+";

/// JP2 headers sit in front of the codestream; this is plenty to reach `ihdr`.
const HEADER_READ_LIMIT: u64 = 64 * 1024;

/// MIME type of a byte prefix.
pub fn sniff_bytes(head: &[u8]) -> &'static str {
    if head.starts_with(JP2_SIGNATURE) || head.starts_with(J2K_SOC_SIZ) {
        return MIME_JP2;
    }
    if head.starts_with(b"%PDF") {
        return MIME_PDF;
    }
    if head.starts_with(BIGTIFF_LE) || head.starts_with(BIGTIFF_BE) {
        return MIME_TIFF;
    }
    match image::guess_format(head) {
        Ok(format) => format.to_mime_type(),
        Err(_) => MIME_OCTET_STREAM,
    }
}

/// MIME type of a file, from its first bytes.
pub fn sniff_file(path: &Path) -> Result<&'static str, PipelineError> {
    let head = read_head(path, 32)?;
    Ok(sniff_bytes(&head))
}

/// Pixel `(width, height)` of a JP2 file or raw J2K codestream.
pub fn jp2_dimensions(path: &Path) -> Result<(u32, u32), PipelineError> {
    let head = read_head(path, HEADER_READ_LIMIT)?;
    parse_jp2_dimensions(&head).ok_or_else(|| PipelineError::InvalidInput {
        path: path.to_path_buf(),
        detected: format!("{} without a readable image header", sniff_bytes(&head)),
    })
}

fn read_head(path: &Path, limit: u64) -> Result<Vec<u8>, PipelineError> {
    let file = std::fs::File::open(path).map_err(|e| PipelineError::io(path, e))?;
    let mut buf = Vec::new();
    file.take(limit)
        .read_to_end(&mut buf)
        .map_err(|e| PipelineError::io(path, e))?;
    Ok(buf)
}

fn parse_jp2_dimensions(data: &[u8]) -> Option<(u32, u32)> {
    if data.starts_with(J2K_SOC_SIZ) {
        return parse_siz(&data[4..]);
    }
    if !data.starts_with(JP2_SIGNATURE) {
        return None;
    }
    let jp2h = find_box(data, b"jp2h")?;
    let ihdr = find_box(jp2h, b"ihdr")?;
    if ihdr.len() < 8 {
        return None;
    }
    let height = be_u32(&ihdr[0..4]);
    let width = be_u32(&ihdr[4..8]);
    Some((width, height))
}

/// SIZ segment body (after the marker): Lsiz, Rsiz, Xsiz, Ysiz, XOsiz, YOsiz.
fn parse_siz(siz: &[u8]) -> Option<(u32, u32)> {
    if siz.len() < 20 {
        return None;
    }
    let xsiz = be_u32(&siz[4..8]);
    let ysiz = be_u32(&siz[8..12]);
    let xosiz = be_u32(&siz[12..16]);
    let yosiz = be_u32(&siz[16..20]);
    Some((xsiz.checked_sub(xosiz)?, ysiz.checked_sub(yosiz)?))
}

/// Contents of the first box of type `kind` in a sequence of ISO boxes.
fn find_box<'a>(mut data: &'a [u8], kind: &[u8; 4]) -> Option<&'a [u8]> {
    while data.len() >= 8 {
        let declared = be_u32(&data[0..4]) as u64;
        let (header, total) = match declared {
            0 => (8usize, data.len() as u64),
            1 => {
                if data.len() < 16 {
                    return None;
                }
                let mut b = [0u8; 8];
                b.copy_from_slice(&data[8..16]);
                (16usize, u64::from_be_bytes(b))
            }
            n => (8usize, n),
        };
        if total < header as u64 {
            return None;
        }
        if &data[4..8] == kind {
            let end = usize::try_from(total).unwrap_or(usize::MAX).min(data.len());
            return Some(&data[header..end]);
        }
        let next = usize::try_from(total).ok()?;
        if next > data.len() {
            return None;
        }
        data = &data[next..];
    }
    None
}

fn be_u32(b: &[u8]) -> u32 {
    u32::from_be_bytes([b[0], b[1], b[2], b[3]])
}
