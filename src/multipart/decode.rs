//! Content-Transfer-Encoding and Content-Encoding of body parts.

use super::error::MultipartError;
use super::headers::{CONTENT_ENCODING, CONTENT_TRANSFER_ENCODING, PartHeaders};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use flate2::read::{DeflateDecoder, GzDecoder};
use std::io::Read;

/// Default cap on the inflated size of one part (1 GiB).
pub const DEFAULT_DECODED_LIMIT: usize = 1 << 30;

/// Applies the transfer encoding first, then the content encoding. Inflated
/// output larger than `limit` bytes is a decode error.
pub fn decode_part(
    headers: &PartHeaders,
    data: Vec<u8>,
    limit: usize,
) -> Result<Vec<u8>, MultipartError> {
    let data = match headers.get(CONTENT_TRANSFER_ENCODING) {
        Some(encoding) => decode_transfer(encoding, data)?,
        None => data,
    };
    match headers.get(CONTENT_ENCODING) {
        Some(encoding) => decode_content(encoding, data, limit),
        None => Ok(data),
    }
}

pub fn decode_transfer(encoding: &str, data: Vec<u8>) -> Result<Vec<u8>, MultipartError> {
    match encoding.trim().to_ascii_lowercase().as_str() {
        "base64" => {
            // Line breaks and other non-alphabet bytes are ignored, as MIME requires.
            let cleaned: Vec<u8> = data
                .into_iter()
                .filter(|&b| b.is_ascii_alphanumeric() || matches!(b, b'+' | b'/' | b'='))
                .collect();
            STANDARD
                .decode(cleaned)
                .map_err(|e| MultipartError::Decode(format!("base64: {}", e)))
        }
        "quoted-printable" => Ok(decode_quoted_printable(&data)),
        "7bit" | "8bit" | "binary" => Ok(data),
        other => Err(MultipartError::Decode(format!(
            "unknown content transfer encoding: {}",
            other
        ))),
    }
}

pub fn decode_content(
    encoding: &str,
    data: Vec<u8>,
    limit: usize,
) -> Result<Vec<u8>, MultipartError> {
    match encoding.trim().to_ascii_lowercase().as_str() {
        "gzip" => inflate("gzip", GzDecoder::new(data.as_slice()), limit),
        "deflate" => inflate("deflate", DeflateDecoder::new(data.as_slice()), limit),
        "identity" => Ok(data),
        other => Err(MultipartError::Decode(format!(
            "unknown content encoding: {}",
            other
        ))),
    }
}

fn inflate<D: Read>(name: &str, decoder: D, limit: usize) -> Result<Vec<u8>, MultipartError> {
    let mut out = Vec::new();
    decoder
        .take(limit as u64 + 1)
        .read_to_end(&mut out)
        .map_err(|e| MultipartError::Decode(format!("{}: {}", name, e)))?;
    if out.len() > limit {
        return Err(MultipartError::Decode(format!(
            "{} output exceeds {} bytes",
            name, limit
        )));
    }
    Ok(out)
}

/// RFC 2045 §6.7. Malformed escapes are kept literally.
fn decode_quoted_printable(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut i = 0;
    while i < data.len() {
        let b = data[i];
        if b != b'=' {
            out.push(b);
            i += 1;
            continue;
        }

        // soft line break
        if data[i + 1..].starts_with(b"\r\n") {
            i += 3;
            continue;
        }
        if data[i + 1..].starts_with(b"\n") {
            i += 2;
            continue;
        }

        match (
            data.get(i + 1).and_then(|c| hex_value(*c)),
            data.get(i + 2).and_then(|c| hex_value(*c)),
        ) {
            (Some(hi), Some(lo)) => {
                out.push((hi << 4) | lo);
                i += 3;
            }
            _ => {
                out.push(b);
                i += 1;
            }
        }
    }
    out
}

fn hex_value(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}
