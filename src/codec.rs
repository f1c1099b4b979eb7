//! Whole-payload gzip transforms and the header rewrites that go with them.

use crate::error::{Error, Result};
use bytes::{Bytes, BytesMut};
use compression_codecs::{EncodeV2, gzip::GzipEncoder};
use compression_core::util::{PartialBuffer, WriteBuffer};
use flate2::read::MultiGzDecoder;
use http::header::{self, HeaderMap, HeaderValue};
use std::io::{self, Read};

pub use compression_core::Level;

const OUTPUT_BUFFER_SIZE: usize = 8 * 1024; // 8KB output buffer

/// Compresses `input` into a single, self-contained gzip member.
///
/// The output is deterministic for a given input and level.
pub fn compress(input: &[u8], level: Level) -> Result<Bytes> {
    let mut encoder = GzipEncoder::new(level.into());
    let mut buffer = vec![0u8; OUTPUT_BUFFER_SIZE];
    let mut compressed = BytesMut::with_capacity(input.len() / 2 + 32);
    let mut input_buf = PartialBuffer::new(input);

    while input_buf.written_len() < input.len() {
        let mut output = WriteBuffer::new_initialized(buffer.as_mut_slice());
        encoder
            .encode(&mut input_buf, &mut output)
            .map_err(|e| Error::encode(io::Error::other(e)))?;
        let written = output.written_len();
        compressed.extend_from_slice(&buffer[..written]);
    }

    loop {
        let mut output = WriteBuffer::new_initialized(buffer.as_mut_slice());
        let done = encoder
            .finish(&mut output)
            .map_err(|e| Error::encode(io::Error::other(e)))?;
        let written = output.written_len();
        compressed.extend_from_slice(&buffer[..written]);
        if done {
            break;
        }
    }

    Ok(compressed.freeze())
}

/// Inflates a complete gzip stream.
///
/// Concatenated members are decoded in sequence as one logical stream, so the
/// output of a streamed response decodes in a single call.
pub fn decompress(input: &[u8]) -> Result<Bytes> {
    if input.is_empty() {
        return Err(Error::decode(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "empty gzip stream",
        )));
    }
    let mut decoded = Vec::with_capacity(input.len() * 2);
    MultiGzDecoder::new(input)
        .read_to_end(&mut decoded)
        .map_err(Error::decode)?;
    Ok(Bytes::from(decoded))
}

/// Marks `headers` as describing a gzip body of `len` bytes.
pub fn set_compressed_headers(headers: &mut HeaderMap, len: usize) {
    headers.insert(
        header::CONTENT_ENCODING,
        HeaderValue::from_static("gzip"),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
    add_vary_accept_encoding(headers);
}

/// Drops the headers that described the encoded body, so the consumer
/// recomputes them from the decoded one.
pub fn strip_encoding_headers(headers: &mut HeaderMap) {
    headers.remove(header::CONTENT_ENCODING);
    headers.remove(header::CONTENT_LENGTH);
}

/// Default decompression hook for requests (server) and responses (client).
///
/// Empty bodies pass through untouched. Otherwise the body is inflated and the
/// encoding headers are removed.
pub fn default_decompress(headers: &mut HeaderMap, body: Bytes) -> Result<Bytes> {
    if body.is_empty() {
        return Ok(body);
    }
    let decoded = decompress(&body)?;
    strip_encoding_headers(headers);
    Ok(decoded)
}

/// Adds Accept-Encoding to the Vary header if not already present.
pub(crate) fn add_vary_accept_encoding(headers: &mut HeaderMap) {
    for vary in headers.get_all(header::VARY) {
        if let Ok(vary_str) = vary.to_str() {
            let covered = vary_str.split(',').any(|v| {
                let v = v.trim();
                v.eq_ignore_ascii_case("*") || v.eq_ignore_ascii_case("accept-encoding")
            });
            if covered {
                return;
            }
        }
    }

    headers.append(
        header::VARY,
        HeaderValue::from_static("Accept-Encoding"),
    );
}
