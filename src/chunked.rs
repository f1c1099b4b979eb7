//! HTTP/1.1 response head serialization and chunked transfer framing.

use http::HeaderMap;
use http::response::Parts;
use std::io::{self, Write};

/// Writes the status line and header block, including the blank line that
/// ends it.
pub(crate) fn write_head<W: Write>(w: &mut W, head: &Parts) -> io::Result<()> {
    let mut buf = Vec::with_capacity(256);
    buf.extend_from_slice(b"HTTP/1.1 ");
    buf.extend_from_slice(head.status.as_str().as_bytes());
    buf.push(b' ');
    buf.extend_from_slice(head.status.canonical_reason().unwrap_or("").as_bytes());
    buf.extend_from_slice(b"\r\n");
    write_fields(&mut buf, &head.headers);
    buf.extend_from_slice(b"\r\n");
    w.write_all(&buf)
}

/// Writes one chunk. `data` must not be empty, an empty chunk would end the
/// body.
pub(crate) fn write_chunk<W: Write>(w: &mut W, data: &[u8]) -> io::Result<()> {
    debug_assert!(!data.is_empty());
    let mut buf = Vec::with_capacity(data.len() + 12);
    buf.extend_from_slice(format!("{:x}\r\n", data.len()).as_bytes());
    buf.extend_from_slice(data);
    buf.extend_from_slice(b"\r\n");
    w.write_all(&buf)
}

/// Writes the zero-length terminating chunk.
pub(crate) fn write_last_chunk<W: Write>(w: &mut W) -> io::Result<()> {
    w.write_all(b"0\r\n")
}

/// Writes the trailer section that follows the last chunk.
pub(crate) fn write_trailer<W: Write>(w: &mut W, trailers: &HeaderMap) -> io::Result<()> {
    let mut buf = Vec::new();
    write_fields(&mut buf, trailers);
    buf.extend_from_slice(b"\r\n");
    w.write_all(&buf)
}

fn write_fields(buf: &mut Vec<u8>, fields: &HeaderMap) {
    for (name, value) in fields {
        buf.extend_from_slice(name.as_str().as_bytes());
        buf.extend_from_slice(b": ");
        buf.extend_from_slice(value.as_bytes());
        buf.extend_from_slice(b"\r\n");
    }
}
