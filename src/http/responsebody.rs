//! Response body decoding.
//!
//! Bodies are buffered in full, inflated when `decompress` is on and the
//! server announced `gzip` or `deflate`, then converted per [`Encoding`].

use crate::base::context::IoResultExt;
use crate::base::neterror::RequestError;
use bytes::Bytes;
use flate2::read::{DeflateDecoder, GzDecoder, ZlibDecoder};
use flate2::write;
use http::HeaderMap;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::io::{Read, Write};

/// How a buffered body is exposed when `json` is off.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Encoding {
    /// UTF-8 text; invalid sequences are replaced.
    #[default]
    Utf8,
    /// Raw bytes.
    Binary,
}

/// A decoded response body.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Text(String),
    Bytes(Bytes),
    Json(Value),
}

impl Default for ResponseBody {
    fn default() -> Self {
        ResponseBody::Text(String::new())
    }
}

impl ResponseBody {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ResponseBody::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            ResponseBody::Json(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            ResponseBody::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Deserialize into `T`, whatever the variant.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, RequestError> {
        match self {
            ResponseBody::Json(value) => {
                serde_json::from_value(value.clone()).map_err(RequestError::parse)
            }
            ResponseBody::Text(text) => serde_json::from_str(text).map_err(RequestError::parse),
            ResponseBody::Bytes(bytes) => {
                serde_json::from_slice(bytes).map_err(RequestError::parse)
            }
        }
    }
}

/// Inflate `body` according to its `content-encoding`.
///
/// Unknown codings pass through untouched.
pub fn decompress(body: Bytes, headers: &HeaderMap) -> Result<Bytes, RequestError> {
    if body.is_empty() {
        return Ok(body);
    }
    let coding = content_coding(headers);

    let mut out = Vec::new();
    match coding.as_deref() {
        Some("gzip") | Some("x-gzip") => {
            GzDecoder::new(&body[..])
                .read_to_end(&mut out)
                .read_context()?;
        }
        Some("deflate") => {
            // Servers send both zlib-wrapped and raw deflate.
            if ZlibDecoder::new(&body[..]).read_to_end(&mut out).is_err() {
                out.clear();
                DeflateDecoder::new(&body[..])
                    .read_to_end(&mut out)
                    .read_context()?;
            }
        }
        _ => return Ok(body),
    }
    Ok(Bytes::from(out))
}

fn content_coding(headers: &HeaderMap) -> Option<String> {
    headers
        .get(http::header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_ascii_lowercase())
}

/// Incremental inflater for streamed bodies.
pub enum StreamDecoder {
    Identity,
    Gzip(write::GzDecoder<Vec<u8>>),
    Deflate(write::ZlibDecoder<Vec<u8>>),
}

impl StreamDecoder {
    /// Pick a decoder for the response's `content-encoding`.
    pub fn for_headers(headers: &HeaderMap, decompress: bool) -> Self {
        if !decompress {
            return StreamDecoder::Identity;
        }
        match content_coding(headers).as_deref() {
            Some("gzip") | Some("x-gzip") => StreamDecoder::Gzip(write::GzDecoder::new(Vec::new())),
            Some("deflate") => StreamDecoder::Deflate(write::ZlibDecoder::new(Vec::new())),
            _ => StreamDecoder::Identity,
        }
    }

    /// Feed one chunk; returns whatever output is ready.
    pub fn push(&mut self, chunk: &Bytes) -> Result<Bytes, RequestError> {
        let out = match self {
            StreamDecoder::Identity => return Ok(chunk.clone()),
            StreamDecoder::Gzip(d) => {
                d.write_all(chunk).read_context()?;
                d.get_mut()
            }
            StreamDecoder::Deflate(d) => {
                d.write_all(chunk).read_context()?;
                d.get_mut()
            }
        };
        Ok(Bytes::from(std::mem::take(out)))
    }

    /// Flush the trailing output at end of stream.
    pub fn finish(&mut self) -> Result<Bytes, RequestError> {
        let out = match self {
            StreamDecoder::Identity => return Ok(Bytes::new()),
            StreamDecoder::Gzip(d) => {
                d.try_finish().read_context()?;
                d.get_mut()
            }
            StreamDecoder::Deflate(d) => {
                d.try_finish().read_context()?;
                d.get_mut()
            }
        };
        Ok(Bytes::from(std::mem::take(out)))
    }
}

/// Convert a (decompressed) body per the requested representation.
pub fn decode(body: &Bytes, encoding: Encoding, json: bool) -> Result<ResponseBody, RequestError> {
    if json {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(ResponseBody::Json(Value::Null));
        }
        return serde_json::from_slice(body)
            .map(ResponseBody::Json)
            .map_err(RequestError::parse);
    }
    Ok(match encoding {
        Encoding::Utf8 => ResponseBody::Text(String::from_utf8_lossy(body).into_owned()),
        Encoding::Binary => ResponseBody::Bytes(body.clone()),
    })
}
