use crate::body::GzipBody;
use crate::codec;
use crate::decision::{self, Direction};
use crate::error::{BoxError, Error};
use crate::options::Options;
use bytes::Bytes;
use http::header::{self, HeaderValue};
use http::{Method, Request, Response};
use http_body::Body;
use http_body_util::{BodyExt, Either, Full};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::Service;

/// A Tower service that decodes gzip request bodies and gzips responses.
///
/// Requests declaring `Content-Encoding: gzip` are buffered and run through
/// the decompression hook, when one is configured. Responses are either
/// buffered and compressed as one gzip member, or, in stream mode, compressed
/// one member per body frame.
#[derive(Debug, Clone)]
pub struct GzipService<S> {
    inner: S,
    options: Arc<Options>,
}

impl<S> GzipService<S> {
    /// Creates a new gzip service wrapping the given inner service.
    pub fn new(inner: S, options: Arc<Options>) -> Self {
        Self { inner, options }
    }

    /// Returns a reference to the inner service.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Returns a mutable reference to the inner service.
    pub fn inner_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    /// Consumes this service, returning the inner service.
    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for GzipService<S>
where
    S: Service<Request<Either<Full<Bytes>, ReqBody>>, Response = Response<ResBody>>
        + Clone
        + Send
        + 'static,
    S::Future: Send + 'static,
    S::Error: Into<BoxError>,
    ReqBody: Body<Data = Bytes> + Send + 'static,
    ReqBody::Error: Into<BoxError>,
    ResBody: Body<Data = Bytes> + Send + 'static,
    ResBody::Error: Into<BoxError>,
{
    type Response = Response<GzipBody<ResBody>>;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        // Take the service that was driven to readiness, leave a fresh clone.
        let clone = self.inner.clone();
        let inner = std::mem::replace(&mut self.inner, clone);
        Box::pin(respond(inner, Arc::clone(&self.options), req))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Plan {
    Buffered,
    Stream,
    Identity,
}

async fn respond<S, ReqBody, ResBody>(
    mut inner: S,
    options: Arc<Options>,
    req: Request<ReqBody>,
) -> Result<Response<GzipBody<ResBody>>, BoxError>
where
    S: Service<Request<Either<Full<Bytes>, ReqBody>>, Response = Response<ResBody>>,
    S::Error: Into<BoxError>,
    ReqBody: Body<Data = Bytes>,
    ReqBody::Error: Into<BoxError>,
    ResBody: Body<Data = Bytes>,
    ResBody::Error: Into<BoxError>,
{
    let head_request = req.method() == Method::HEAD;
    let plan = if options.stream {
        if decision::should_compress(
            Direction::StreamingResponse,
            req.headers(),
            req.uri(),
            &options.policy,
        ) && decision::accepts_gzip(req.headers())
        {
            Plan::Stream
        } else {
            Plan::Identity
        }
    } else if decision::should_compress(
        Direction::Response,
        req.headers(),
        req.uri(),
        &options.policy,
    ) {
        Plan::Buffered
    } else {
        Plan::Identity
    };

    let req = match options.decompress.as_ref() {
        Some(decompress) if decision::is_gzip_encoded(req.headers()) => {
            let (mut parts, body) = req.into_parts();
            let body = body.collect().await.map_err(Into::<BoxError>::into)?.to_bytes();
            match decompress(&mut parts.headers, body) {
                Ok(body) => Request::from_parts(parts, Either::Left(Full::new(body))),
                Err(err) => {
                    tracing::debug!(uri = %parts.uri, error = %err, "rejecting request with undecodable gzip body");
                    return Ok(reject(&err));
                }
            }
        }
        _ => req.map(Either::Right),
    };

    let res = inner.call(req).await.map_err(Into::<BoxError>::into)?;
    if res.headers().contains_key(header::CONTENT_ENCODING)
        || decision::has_content_range(res.headers())
        || decision::is_bodiless(res.status())
        || head_request
    {
        return Ok(res.map(GzipBody::passthrough));
    }

    match plan {
        Plan::Identity => Ok(res.map(GzipBody::passthrough)),
        Plan::Stream => {
            let (mut parts, body) = res.into_parts();
            parts
                .headers
                .insert(header::CONTENT_ENCODING, HeaderValue::from_static("gzip"));
            parts.headers.remove(header::CONTENT_LENGTH);
            parts.headers.remove(header::ACCEPT_RANGES);
            codec::add_vary_accept_encoding(&mut parts.headers);
            Ok(Response::from_parts(
                parts,
                GzipBody::gzip(body, options.level),
            ))
        }
        Plan::Buffered => {
            let (mut parts, body) = res.into_parts();
            let body = body.collect().await.map_err(Into::<BoxError>::into)?.to_bytes();
            if body.is_empty() {
                return Ok(Response::from_parts(parts, GzipBody::full(body)));
            }
            let compressed = codec::compress(&body, options.level)?;
            tracing::trace!(
                raw = body.len(),
                compressed = compressed.len(),
                "compressed response body"
            );
            codec::set_compressed_headers(&mut parts.headers, compressed.len());
            parts.headers.remove(header::ACCEPT_RANGES);
            Ok(Response::from_parts(parts, GzipBody::full(compressed)))
        }
    }
}

fn reject<B>(err: &Error) -> Response<GzipBody<B>> {
    let mut res = Response::new(GzipBody::full(Bytes::from(err.to_string())));
    *res.status_mut() = err.status_code();
    res.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    res
}
