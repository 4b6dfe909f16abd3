//! Transport decoding for article bodies.
//!
//! Servers routinely omit or mislabel `Content-Encoding`, so when the header
//! does not name a known coding the leading bytes are matched against the
//! gzip, zlib and brotli signatures before the body is taken as plain text.

use std::fmt;
use std::io::{self, Read};

use flate2::read::{DeflateDecoder, GzDecoder, ZlibDecoder};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const BROTLI_MAGIC: [u8; 4] = [0xce, 0xb2, 0xcf, 0x81];
/// Second zlib header byte for the four standard compression levels.
const ZLIB_LEVELS: [u8; 4] = [0x01, 0x5e, 0x9c, 0xda];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Gzip,
    /// zlib-wrapped deflate
    Zlib,
    /// bare deflate stream, only ever chosen from the header
    Deflate,
    Brotli,
    Identity,
}

impl Encoding {
    pub fn as_str(self) -> &'static str {
        match self {
            Encoding::Gzip => "gzip",
            Encoding::Zlib => "zlib",
            Encoding::Deflate => "deflate",
            Encoding::Brotli => "br",
            Encoding::Identity => "identity",
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of decoding one body.
#[derive(Debug)]
pub struct Decoded {
    pub body: Vec<u8>,
    pub encoding: Encoding,
    /// Whether the encoding came from byte sniffing rather than the header.
    pub sniffed: bool,
    /// Whether output past the size cap was dropped.
    pub truncated: bool,
}

#[derive(Debug, thiserror::Error)]
#[error("{encoding} decoding failed: {source}")]
pub struct DecompressError {
    pub encoding: Encoding,
    #[source]
    pub source: io::Error,
}

/// Maps a `Content-Encoding` value to a coding we can undo. `None` means the
/// header is absent, `identity`, or something we do not recognise.
pub fn from_header(value: Option<&str>) -> Option<Encoding> {
    let value = value?.trim().to_ascii_lowercase();
    match value.as_str() {
        "gzip" | "x-gzip" => Some(Encoding::Gzip),
        "deflate" => Some(Encoding::Deflate),
        "br" | "brotli" => Some(Encoding::Brotli),
        _ => None,
    }
}

/// Identifies a compressed body by its leading bytes.
pub fn sniff(bytes: &[u8]) -> Option<Encoding> {
    if bytes.starts_with(&GZIP_MAGIC) {
        Some(Encoding::Gzip)
    } else if looks_like_zlib(bytes) {
        Some(Encoding::Zlib)
    } else if bytes.starts_with(&BROTLI_MAGIC) {
        Some(Encoding::Brotli)
    } else {
        None
    }
}

fn looks_like_zlib(bytes: &[u8]) -> bool {
    bytes.len() >= 2 && bytes[0] == 0x78 && ZLIB_LEVELS.contains(&bytes[1])
}

/// Decodes `raw` according to `header`, sniffing when the header is of no
/// use. At most `limit` decoded bytes are kept.
///
/// A coding announced by the header must decode or the call fails. A sniffed
/// coding that fails to decode was a false positive, and the raw bytes are
/// returned instead.
pub fn decode(raw: &[u8], header: Option<&str>, limit: usize) -> Result<Decoded, DecompressError> {
    if let Some(declared) = from_header(header) {
        // "deflate" is zlib-wrapped per RFC 9110 but some servers send it bare.
        let encoding = match declared {
            Encoding::Deflate if looks_like_zlib(raw) => Encoding::Zlib,
            other => other,
        };
        let (body, truncated) =
            read_capped(raw, encoding, limit).map_err(|source| DecompressError { encoding, source })?;
        return Ok(Decoded {
            body,
            encoding,
            sniffed: false,
            truncated,
        });
    }

    if let Some(encoding) = sniff(raw) {
        match read_capped(raw, encoding, limit) {
            Ok((body, truncated)) => {
                return Ok(Decoded {
                    body,
                    encoding,
                    sniffed: true,
                    truncated,
                })
            }
            Err(e) => {
                tracing::warn!(
                    %encoding,
                    error = %e,
                    "body matched a compression signature but did not decode, using it as-is"
                );
            }
        }
    }

    let (body, truncated) = read_capped(raw, Encoding::Identity, limit)
        .map_err(|source| DecompressError { encoding: Encoding::Identity, source })?;
    Ok(Decoded {
        body,
        encoding: Encoding::Identity,
        sniffed: false,
        truncated,
    })
}

fn read_capped(raw: &[u8], encoding: Encoding, limit: usize) -> io::Result<(Vec<u8>, bool)> {
    let reader: Box<dyn Read + '_> = match encoding {
        Encoding::Gzip => Box::new(GzDecoder::new(raw)),
        Encoding::Zlib => Box::new(ZlibDecoder::new(raw)),
        Encoding::Deflate => Box::new(DeflateDecoder::new(raw)),
        Encoding::Brotli => Box::new(brotli::Decompressor::new(raw, 4096)),
        Encoding::Identity => Box::new(raw),
    };

    // One byte over the cap tells truncation apart from an exact fit.
    let mut body = Vec::new();
    reader.take(limit as u64 + 1).read_to_end(&mut body)?;
    let truncated = body.len() > limit;
    body.truncate(limit);
    if truncated {
        body.truncate(complete_utf8_len(&body));
    }
    Ok((body, truncated))
}

/// Length of `body` without a multi-byte UTF-8 sequence cut off at its end.
/// Invalid bytes elsewhere are left for the lossy decode to deal with.
fn complete_utf8_len(body: &[u8]) -> usize {
    match std::str::from_utf8(body) {
        Err(e) if e.error_len().is_none() => e.valid_up_to(),
        _ => body.len(),
    }
}
