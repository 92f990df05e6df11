//! Upstream body decoding keyed on `Content-Encoding`.
//!
//! `deflate` is treated as raw DEFLATE (no zlib header), matching what the
//! supported providers send. Unknown encodings pass through untouched.

use std::borrow::Cow;
use std::fmt;
use std::io::{self, Read};

use flate2::read::{DeflateDecoder, MultiGzDecoder};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const BROTLI_BUFFER: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Identity,
    Gzip,
    Deflate,
    Brotli,
}

impl Encoding {
    /// Match a `Content-Encoding` header value, case-insensitively.
    pub fn from_header(value: Option<&str>) -> Self {
        let Some(value) = value else {
            return Self::Identity;
        };
        match value.trim().to_ascii_lowercase().as_str() {
            "gzip" | "x-gzip" => Self::Gzip,
            "deflate" => Self::Deflate,
            "br" => Self::Brotli,
            _ => Self::Identity,
        }
    }

    /// Wrap `inner` in the matching decoder.
    pub fn reader<'a, R: Read + 'a>(self, inner: R) -> Box<dyn Read + 'a> {
        match self {
            Self::Identity => Box::new(inner),
            Self::Gzip => Box::new(MultiGzDecoder::new(inner)),
            Self::Deflate => Box::new(DeflateDecoder::new(inner)),
            Self::Brotli => Box::new(brotli::Decompressor::new(inner, BROTLI_BUFFER)),
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Identity => "identity",
            Self::Gzip => "gzip",
            Self::Deflate => "deflate",
            Self::Brotli => "br",
        })
    }
}

#[derive(Debug, thiserror::Error)]
#[error("corrupt {encoding} body")]
pub struct DecodeError {
    pub encoding: Encoding,
    #[source]
    pub source: io::Error,
}

/// Fully decode `body` according to its `Content-Encoding` header.
///
/// Identity bodies are borrowed. A gzip body without the gzip magic is
/// rejected before any decoding starts.
pub fn decode_body<'a>(header: Option<&str>, body: &'a [u8]) -> Result<Cow<'a, [u8]>, DecodeError> {
    let encoding = Encoding::from_header(header);
    let fail = |source: io::Error| DecodeError { encoding, source };

    match encoding {
        Encoding::Identity => return Ok(Cow::Borrowed(body)),
        Encoding::Gzip if !body.starts_with(&GZIP_MAGIC) => {
            return Err(fail(io::Error::new(
                io::ErrorKind::InvalidData,
                "missing gzip header",
            )));
        }
        _ => {}
    }

    let mut decoded = Vec::with_capacity(body.len().saturating_mul(4));
    encoding
        .reader(body)
        .read_to_end(&mut decoded)
        .map_err(fail)?;
    Ok(Cow::Owned(decoded))
}
