//! Server adapter for handlers that write their response incrementally.

use crate::decision::{self, Direction};
use crate::error::Result;
use crate::options::Options;
use crate::writer::{ChunkedWriter, ResponseWriter};
use bytes::Bytes;
use http::header::{self, HeaderValue};
use http::{Method, Request};
use std::io::Write;
use std::sync::Arc;

/// Runs streaming handlers behind a gzip [`ChunkedWriter`].
///
/// For each exchange the adapter decodes a gzip request body (if a hook is
/// configured), picks a writer for the response, hands it to the handler and
/// finalizes it when the handler returns or unwinds.
#[derive(Debug, Clone)]
pub struct StreamCompression {
    options: Arc<Options>,
}

impl StreamCompression {
    /// Creates an adapter sharing `options` across every exchange.
    pub fn new(options: Options) -> Self {
        Self {
            options: Arc::new(options),
        }
    }

    /// The options in use.
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Serves one exchange, writing the response to `transport`.
    ///
    /// The handler is not invoked when the request body cannot be decoded;
    /// the peer gets a client error instead. Errors from the handler take
    /// precedence over errors from finalizing the stream.
    pub fn serve<W, F>(&self, request: Request<Bytes>, transport: W, handler: F) -> Result<()>
    where
        W: Write + Send,
        F: FnOnce(Request<Bytes>, &dyn ResponseWriter) -> Result<()>,
    {
        let request = match self.decode_request(request) {
            Ok(request) => request,
            Err(err) => {
                tracing::debug!(error = %err, "rejecting request with undecodable gzip body");
                return reject(transport, &err);
            }
        };

        let compress = request.method() != Method::HEAD
            && decision::should_compress(
                Direction::StreamingResponse,
                request.headers(),
                request.uri(),
                &self.options.policy,
            )
            && decision::accepts_gzip(request.headers());
        let writer = if compress {
            ChunkedWriter::gzip(transport, self.options.level)
        } else {
            ChunkedWriter::identity(transport)
        };

        let guard = FinalizeOnDrop(&writer);
        let handled = handler(request, &writer);
        let finalized = writer.finalize();
        drop(guard);
        handled.and(finalized)
    }

    fn decode_request(&self, request: Request<Bytes>) -> Result<Request<Bytes>> {
        let Some(decompress) = self.options.decompress.as_ref() else {
            return Ok(request);
        };
        if !decision::is_gzip_encoded(request.headers()) {
            return Ok(request);
        }
        let (mut parts, body) = request.into_parts();
        let body = decompress(&mut parts.headers, body)?;
        Ok(Request::from_parts(parts, body))
    }
}

/// Finalizes the writer if the handler unwinds.
struct FinalizeOnDrop<'a, W: Write + Send>(&'a ChunkedWriter<W>);

impl<W: Write + Send> Drop for FinalizeOnDrop<'_, W> {
    fn drop(&mut self) {
        // The connection may already be gone; nothing left to report to.
        let _ = self.0.finalize();
    }
}

fn reject<W: Write + Send>(transport: W, err: &crate::Error) -> Result<()> {
    let writer = ChunkedWriter::identity(transport);
    writer.set_status(err.status_code());
    writer.insert_header(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    writer.write(err.to_string().as_bytes())?;
    writer.finalize()
}
