//! Streaming response writer that frames every write as a chunk.
//!
//! [`ChunkedWriter`] sits between a handler and the raw transport. The first
//! write sends the response head; every write after that becomes one chunk of
//! a `Transfer-Encoding: chunked` body. In gzip mode each chunk carries one
//! complete gzip member, so the body is a multi-member gzip stream that any
//! gzip decoder reads as a single payload.
//!
//! [`ChunkedWriter::finalize`] sends the terminating chunk and the trailers.
//! It runs at most once no matter how many times or from how many threads it
//! is called; every call observes the same result.

use crate::chunked;
use crate::codec::{self, Level};
use crate::decision;
use crate::error::{Error, Result};
use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use http::response::Parts;
use http::{Response, StatusCode};
use parking_lot::Mutex;
use std::io::{self, Write};
use std::sync::OnceLock;

/// Output side of a response whose body is written incrementally.
///
/// Handlers write through this trait without knowing whether the bytes are
/// compressed on the way out.
pub trait ResponseWriter: Send + Sync {
    /// Sets the response status. Ignored once the head has been sent.
    fn set_status(&self, status: StatusCode);

    /// Inserts a response header. Ignored once the head has been sent.
    fn insert_header(&self, name: HeaderName, value: HeaderValue);

    /// Inserts a trailer sent after the last chunk.
    fn insert_trailer(&self, name: HeaderName, value: HeaderValue);

    /// Writes part of the body and returns the number of bytes consumed.
    fn write(&self, buf: &[u8]) -> Result<usize>;

    /// Pushes buffered transport data out.
    fn flush(&self) -> Result<()>;

    /// Ends the body. Runs once; later calls return the first result.
    fn finalize(&self) -> Result<()>;
}

/// Content coding applied to each chunk.
#[derive(Debug, Clone, Copy)]
enum Coding {
    Identity,
    Gzip(Level),
}

struct State<W> {
    head: Parts,
    trailers: HeaderMap,
    transport: W,
    header_written: bool,
    closed: bool,
    failed: Option<Error>,
    members: u64,
    raw_bytes: u64,
    wire_bytes: u64,
}

/// A chunked response writer bound to one response.
///
/// See the [module documentation](self) for the wire format.
pub struct ChunkedWriter<W> {
    coding: Coding,
    state: Mutex<State<W>>,
    outcome: OnceLock<Result<()>>,
}

impl<W: Write + Send> ChunkedWriter<W> {
    /// Creates a writer that gzip-compresses every write at `level`.
    pub fn gzip(transport: W, level: Level) -> Self {
        Self::new(transport, Coding::Gzip(level))
    }

    /// Creates a writer that frames writes without compressing them.
    pub fn identity(transport: W) -> Self {
        Self::new(transport, Coding::Identity)
    }

    fn new(transport: W, coding: Coding) -> Self {
        let (head, ()) = Response::new(()).into_parts();
        Self {
            coding,
            state: Mutex::new(State {
                head,
                trailers: HeaderMap::new(),
                transport,
                header_written: false,
                closed: false,
                failed: None,
                members: 0,
                raw_bytes: 0,
                wire_bytes: 0,
            }),
            outcome: OnceLock::new(),
        }
    }

    /// Returns true if writes are gzip-compressed.
    pub fn is_gzip(&self) -> bool {
        matches!(self.coding, Coding::Gzip(_))
    }

    /// Returns true once the response head has been sent.
    pub fn header_written(&self) -> bool {
        self.state.lock().header_written
    }

    /// Bytes received from the handler so far.
    pub fn raw_bytes(&self) -> u64 {
        self.state.lock().raw_bytes
    }

    /// Chunk payload bytes sent to the transport so far, excluding framing.
    pub fn compressed_bytes(&self) -> u64 {
        self.state.lock().wire_bytes
    }

    /// Number of chunks sent so far.
    pub fn chunks(&self) -> u64 {
        self.state.lock().members
    }

    /// Consumes the writer and returns the transport.
    pub fn into_inner(self) -> W {
        self.state.into_inner().transport
    }

    fn run_write(&self, buf: &[u8]) -> Result<usize> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(Error::WriteAfterClose);
        }
        if let Some(err) = &state.failed {
            return Err(err.clone());
        }
        if buf.is_empty() {
            return Ok(0);
        }
        if decision::is_bodiless(state.head.status) {
            let status = state.head.status;
            if let Err(err) = state.activate(self.coding) {
                state.failed = Some(err.clone());
                return Err(err);
            }
            tracing::warn!(%status, len = buf.len(), "dropped body write for bodiless status");
            return Ok(buf.len());
        }

        let compressed;
        let payload: &[u8] = match self.coding {
            Coding::Identity => buf,
            Coding::Gzip(level) => {
                compressed = codec::compress(buf, level)?;
                &compressed
            }
        };

        let sent = state.activate(self.coding).and_then(|()| {
            chunked::write_chunk(&mut state.transport, payload).map_err(Error::write)
        });
        if let Err(err) = sent {
            state.failed = Some(err.clone());
            return Err(err);
        }

        state.members += 1;
        state.raw_bytes += buf.len() as u64;
        state.wire_bytes += payload.len() as u64;
        tracing::trace!(
            raw = buf.len(),
            encoded = payload.len(),
            chunk = state.members,
            "wrote chunk"
        );
        Ok(buf.len())
    }

    fn run_flush(&self) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(err) = &state.failed {
            return Err(err.clone());
        }
        let flushed = state.transport.flush().map_err(Error::write);
        if let Err(err) = &flushed {
            state.failed = Some(err.clone());
        }
        flushed
    }

    fn run_finalize(&self) -> Result<()> {
        self.outcome
            .get_or_init(|| {
                let mut state = self.state.lock();
                state.closed = true;
                if let Some(err) = &state.failed {
                    return Err(err.clone());
                }
                let finished = state.finish(self.coding);
                match &finished {
                    Ok(()) => tracing::debug!(
                        raw_bytes = state.raw_bytes,
                        compressed_bytes = state.wire_bytes,
                        chunks = state.members,
                        "finalized chunked response"
                    ),
                    Err(err) => {
                        tracing::debug!(error = %err, "failed to finalize chunked response");
                        state.failed = Some(err.clone());
                    }
                }
                finished
            })
            .clone()
    }
}

impl<W: Write> State<W> {
    /// Sends the head on the first call.
    fn activate(&mut self, coding: Coding) -> Result<()> {
        if self.header_written {
            return Ok(());
        }
        if decision::is_bodiless(self.head.status) {
            chunked::write_head(&mut self.transport, &self.head).map_err(Error::write)?;
            self.header_written = true;
            return Ok(());
        }
        let headers = &mut self.head.headers;
        headers.remove(header::CONTENT_LENGTH);
        headers.insert(
            header::TRANSFER_ENCODING,
            HeaderValue::from_static("chunked"),
        );
        if let Coding::Gzip(_) = coding {
            headers.insert(
                header::CONTENT_ENCODING,
                HeaderValue::from_static("gzip"),
            );
            codec::add_vary_accept_encoding(headers);
        }
        if let Some(declared) = trailer_names(&self.trailers) {
            headers.insert(header::TRAILER, declared);
        }
        chunked::write_head(&mut self.transport, &self.head).map_err(Error::write)?;
        self.header_written = true;
        Ok(())
    }

    fn finish(&mut self, coding: Coding) -> Result<()> {
        self.activate(coding)?;
        if decision::is_bodiless(self.head.status) {
            return self.transport.flush().map_err(Error::write);
        }
        if let Coding::Gzip(level) = coding {
            if self.members == 0 {
                // A gzip body needs at least one member to be valid.
                let empty = codec::compress(&[], level)?;
                chunked::write_chunk(&mut self.transport, &empty).map_err(Error::write)?;
                self.members += 1;
                self.wire_bytes += empty.len() as u64;
            }
        }
        chunked::write_last_chunk(&mut self.transport).map_err(Error::write)?;
        chunked::write_trailer(&mut self.transport, &self.trailers).map_err(Error::write)?;
        self.transport.flush().map_err(Error::write)
    }
}

fn trailer_names(trailers: &HeaderMap) -> Option<HeaderValue> {
    if trailers.is_empty() {
        return None;
    }
    let names: Vec<&str> = trailers.keys().map(HeaderName::as_str).collect();
    HeaderValue::from_str(&names.join(", ")).ok()
}

impl<W: Write + Send> ResponseWriter for ChunkedWriter<W> {
    fn set_status(&self, status: StatusCode) {
        let mut state = self.state.lock();
        if state.header_written {
            tracing::warn!(%status, "status set after response head was sent");
            return;
        }
        state.head.status = status;
    }

    fn insert_header(&self, name: HeaderName, value: HeaderValue) {
        let mut state = self.state.lock();
        if state.header_written {
            tracing::warn!(header = %name, "header set after response head was sent");
            return;
        }
        state.head.headers.insert(name, value);
    }

    fn insert_trailer(&self, name: HeaderName, value: HeaderValue) {
        let mut state = self.state.lock();
        if state.closed {
            tracing::warn!(trailer = %name, "trailer set after response was finalized");
            return;
        }
        state.trailers.insert(name, value);
    }

    fn write(&self, buf: &[u8]) -> Result<usize> {
        self.run_write(buf)
    }

    fn flush(&self) -> Result<()> {
        self.run_flush()
    }

    fn finalize(&self) -> Result<()> {
        self.run_finalize()
    }
}

impl<W: Write + Send> Write for &ChunkedWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.run_write(buf).map_err(io::Error::other)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.run_flush().map_err(io::Error::other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunked::tests::decode_response;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn gzip_writer() -> ChunkedWriter<Vec<u8>> {
        ChunkedWriter::gzip(Vec::new(), Level::Default)
    }

    /// Transport that records every write and can be told to fail.
    #[derive(Clone, Default)]
    struct Recorder {
        wire: Arc<Mutex<Vec<u8>>>,
        writes: Arc<AtomicUsize>,
        fail_after: Option<usize>,
    }

    impl Write for Recorder {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let n = self.writes.fetch_add(1, Ordering::SeqCst);
            if self.fail_after.is_some_and(|limit| n >= limit) {
                return Err(io::Error::from(io::ErrorKind::BrokenPipe));
            }
            self.wire.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_writes_become_gzip_members() {
        let writer = gzip_writer();
        let inputs: [&[u8]; 3] = [b"hello, ", b"streaming ", b"world"];
        for input in inputs {
            assert_eq!(writer.write(input).unwrap(), input.len());
        }
        writer.finalize().unwrap();
        assert_eq!(writer.raw_bytes(), 22);
        assert_eq!(writer.chunks(), 3);

        let response = decode_response(&writer.into_inner());
        assert_eq!(response.status, 200);
        assert_eq!(response.header("content-encoding"), Some("gzip"));
        assert_eq!(response.header("transfer-encoding"), Some("chunked"));
        assert_eq!(response.header("vary"), Some("Accept-Encoding"));
        assert_eq!(response.chunks.len(), 3);

        for (chunk, input) in response.chunks.iter().zip(inputs) {
            assert_eq!(codec::decompress(chunk).unwrap(), input);
        }
        assert_eq!(
            codec::decompress(&response.body()).unwrap(),
            &b"hello, streaming world"[..]
        );
    }

    #[test]
    fn test_compressed_counter_matches_wire() {
        let writer = gzip_writer();
        writer.write(&b"abc".repeat(100)).unwrap();
        writer.write(b"xyz").unwrap();
        let counted = writer.compressed_bytes();
        writer.finalize().unwrap();

        let response = decode_response(&writer.into_inner());
        let on_wire: usize = response.chunks.iter().map(Vec::len).sum();
        assert_eq!(counted, on_wire as u64);
    }

    #[test]
    fn test_finalize_without_writes_is_valid_gzip() {
        let writer = gzip_writer();
        assert!(!writer.header_written());
        writer.finalize().unwrap();
        assert!(writer.header_written());

        let response = decode_response(&writer.into_inner());
        assert_eq!(response.header("content-encoding"), Some("gzip"));
        assert_eq!(response.chunks.len(), 1);
        assert!(codec::decompress(&response.body()).unwrap().is_empty());
    }

    #[test]
    fn test_head_rewritten_on_activation() {
        let writer = gzip_writer();
        writer.set_status(StatusCode::CREATED);
        writer.insert_header(header::CONTENT_LENGTH, HeaderValue::from(5));
        writer.insert_header(header::VARY, HeaderValue::from_static("Origin"));
        writer.write(b"hello").unwrap();
        writer.finalize().unwrap();

        let response = decode_response(&writer.into_inner());
        assert_eq!(response.status, 201);
        assert_eq!(response.header("content-length"), None);
        let vary: Vec<_> = response
            .headers
            .iter()
            .filter(|(n, _)| n == "vary")
            .map(|(_, v)| v.as_str())
            .collect();
        assert_eq!(vary, vec!["Origin", "Accept-Encoding"]);
    }

    #[test]
    fn test_headers_after_head_are_dropped() {
        let writer = gzip_writer();
        writer.write(b"x").unwrap();
        writer.set_status(StatusCode::IM_A_TEAPOT);
        writer.insert_header(
            HeaderName::from_static("x-late"),
            HeaderValue::from_static("1"),
        );
        writer.finalize().unwrap();

        let response = decode_response(&writer.into_inner());
        assert_eq!(response.status, 200);
        assert_eq!(response.header("x-late"), None);
    }

    #[test]
    fn test_trailers() {
        let writer = gzip_writer();
        writer.insert_trailer(
            HeaderName::from_static("x-checksum"),
            HeaderValue::from_static("abc123"),
        );
        writer.write(b"data").unwrap();
        writer.insert_trailer(
            HeaderName::from_static("x-count"),
            HeaderValue::from_static("1"),
        );
        writer.finalize().unwrap();

        let response = decode_response(&writer.into_inner());
        assert_eq!(response.header("trailer"), Some("x-checksum"));
        assert_eq!(
            response.trailers,
            vec![
                ("x-checksum".to_string(), "abc123".to_string()),
                ("x-count".to_string(), "1".to_string()),
            ]
        );
    }

    #[test]
    fn test_write_after_finalize() {
        let writer = gzip_writer();
        writer.write(b"data").unwrap();
        writer.finalize().unwrap();
        assert!(matches!(writer.write(b"more"), Err(Error::WriteAfterClose)));
        // Empty writes are rejected too once closed.
        assert!(matches!(writer.write(b""), Err(Error::WriteAfterClose)));
    }

    #[test]
    fn test_empty_write_does_not_activate() {
        let writer = gzip_writer();
        assert_eq!(writer.write(b"").unwrap(), 0);
        assert!(!writer.header_written());
        assert!(writer.into_inner().is_empty());
    }

    #[test]
    fn test_finalize_runs_once() {
        let recorder = Recorder::default();
        let writer = ChunkedWriter::gzip(recorder.clone(), Level::Default);
        writer.write(b"payload").unwrap();
        writer.finalize().unwrap();
        let after_first = recorder.wire.lock().len();
        for _ in 0..3 {
            writer.finalize().unwrap();
        }
        assert_eq!(recorder.wire.lock().len(), after_first);
        assert!(recorder.wire.lock().ends_with(b"0\r\n\r\n"));
    }

    #[test]
    fn test_concurrent_finalize() {
        let recorder = Recorder::default();
        let writer = Arc::new(ChunkedWriter::gzip(recorder.clone(), Level::Default));
        writer.write(b"payload").unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let writer = Arc::clone(&writer);
                std::thread::spawn(move || writer.finalize().is_ok())
            })
            .collect();
        for handle in handles {
            assert!(handle.join().unwrap());
        }

        // Any second terminator would be left over after the trailer section.
        let wire = recorder.wire.lock().clone();
        let response = decode_response(&wire);
        assert_eq!(codec::decompress(&response.body()).unwrap(), &b"payload"[..]);
    }

    #[test]
    fn test_transport_failure_poisons_writer() {
        // Head and first chunk succeed, second chunk fails.
        let recorder = Recorder {
            fail_after: Some(2),
            ..Recorder::default()
        };
        let writer = ChunkedWriter::gzip(recorder.clone(), Level::Default);
        writer.write(b"first").unwrap();
        let err = writer.write(b"second").unwrap_err();
        assert!(matches!(err, Error::Write(_)));
        assert!(matches!(writer.write(b"third"), Err(Error::Write(_))));
        assert!(matches!(writer.flush(), Err(Error::Write(_))));

        let first = writer.finalize().unwrap_err();
        let second = writer.finalize().unwrap_err();
        assert_eq!(first.to_string(), second.to_string());
        assert!(matches!(writer.write(b"fourth"), Err(Error::WriteAfterClose)));

        // The first chunk is still a valid member on the wire.
        let wire = recorder.wire.lock().clone();
        let start = wire.windows(4).position(|w| w == b"\r\n\r\n").unwrap() + 4;
        let body = &wire[start..];
        let line_end = body.windows(2).position(|w| w == b"\r\n").unwrap();
        let size = usize::from_str_radix(std::str::from_utf8(&body[..line_end]).unwrap(), 16)
            .unwrap();
        let member = &body[line_end + 2..line_end + 2 + size];
        assert_eq!(codec::decompress(member).unwrap(), &b"first"[..]);
    }

    #[test]
    fn test_finalize_error_is_cached() {
        let recorder = Recorder {
            fail_after: Some(0),
            ..Recorder::default()
        };
        let writer = ChunkedWriter::gzip(recorder.clone(), Level::Default);
        assert!(matches!(writer.finalize(), Err(Error::Write(_))));
        let writes = recorder.writes.load(Ordering::SeqCst);
        assert!(matches!(writer.finalize(), Err(Error::Write(_))));
        assert_eq!(recorder.writes.load(Ordering::SeqCst), writes);
    }

    #[test]
    fn test_identity_writer() {
        let writer = ChunkedWriter::identity(Vec::new());
        assert!(!writer.is_gzip());
        writer.write(b"plain ").unwrap();
        writer.write(b"text").unwrap();
        writer.finalize().unwrap();

        let response = decode_response(&writer.into_inner());
        assert_eq!(response.header("content-encoding"), None);
        assert_eq!(response.header("vary"), None);
        assert_eq!(response.header("transfer-encoding"), Some("chunked"));
        assert_eq!(response.body(), b"plain text");
    }

    #[test]
    fn test_identity_without_writes_has_no_chunks() {
        let writer = ChunkedWriter::identity(Vec::new());
        writer.finalize().unwrap();
        let response = decode_response(&writer.into_inner());
        assert!(response.chunks.is_empty());
    }

    #[test]
    fn test_io_write_impl() {
        let writer = gzip_writer();
        write!(&writer, "{}-{}", "a", 1).unwrap();
        (&writer).flush().unwrap();
        writer.finalize().unwrap();
        let response = decode_response(&writer.into_inner());
        assert_eq!(codec::decompress(&response.body()).unwrap(), &b"a-1"[..]);
    }

    #[test]
    fn test_trait_object() {
        let writer = gzip_writer();
        let out: &dyn ResponseWriter = &writer;
        out.write(b"dyn").unwrap();
        out.finalize().unwrap();
        assert!(out.finalize().is_ok());
    }

    #[test]
    fn test_bodiless_status_sends_head_only() {
        for status in [StatusCode::NO_CONTENT, StatusCode::NOT_MODIFIED] {
            let writer = gzip_writer();
            writer.set_status(status);
            assert_eq!(writer.write(b"ignored").unwrap(), 7);
            writer.finalize().unwrap();
            assert_eq!(writer.chunks(), 0);

            let wire = String::from_utf8(writer.into_inner()).unwrap();
            assert_eq!(
                wire,
                format!(
                    "HTTP/1.1 {} {}\r\n\r\n",
                    status.as_str(),
                    status.canonical_reason().unwrap()
                )
            );
        }
    }

    #[test]
    fn test_bodiless_status_without_writes() {
        let writer = gzip_writer();
        writer.set_status(StatusCode::NO_CONTENT);
        writer.finalize().unwrap();
        let wire = writer.into_inner();
        assert_eq!(wire, b"HTTP/1.1 204 No Content\r\n\r\n");
    }
}
