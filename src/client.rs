//! Client side: gzip outgoing request bodies, decode gzip responses.

use crate::codec::{self, Level};
use crate::decision::{self, Direction};
use crate::error::BoxError;
use crate::options::{Options, options_builder};
use bytes::Bytes;
use http::{Request, Response, header};
use http_body::Body;
use http_body_util::{BodyExt, Either, Full};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};

/// A Tower layer for HTTP clients.
///
/// Outgoing request bodies are buffered and sent as a single gzip member.
/// When a decompression hook is installed, responses declaring
/// `Content-Encoding: gzip` are buffered and decoded before they reach the
/// caller.
#[derive(Debug, Clone, Default)]
pub struct GzipClientLayer {
    options: Options,
}

impl GzipClientLayer {
    /// Creates a layer compressing at `level`.
    pub fn new(level: Level) -> Self {
        Self {
            options: Options::new(level),
        }
    }
}

options_builder!(GzipClientLayer);

impl<S> Layer<S> for GzipClientLayer {
    type Service = GzipClientService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        GzipClientService {
            inner,
            options: Arc::new(self.options.clone()),
        }
    }
}

/// Service produced by [`GzipClientLayer`].
#[derive(Debug, Clone)]
pub struct GzipClientService<S> {
    inner: S,
    options: Arc<Options>,
}

impl<S> GzipClientService<S> {
    /// Returns a reference to the inner service.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Consumes this service, returning the inner service.
    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for GzipClientService<S>
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
    type Response = Response<Either<Full<Bytes>, ResBody>>;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let clone = self.inner.clone();
        let inner = std::mem::replace(&mut self.inner, clone);
        Box::pin(exchange(inner, Arc::clone(&self.options), req))
    }
}

async fn exchange<S, ReqBody, ResBody>(
    mut inner: S,
    options: Arc<Options>,
    req: Request<ReqBody>,
) -> Result<Response<Either<Full<Bytes>, ResBody>>, BoxError>
where
    S: Service<Request<Either<Full<Bytes>, ReqBody>>, Response = Response<ResBody>>,
    S::Error: Into<BoxError>,
    ReqBody: Body<Data = Bytes>,
    ReqBody::Error: Into<BoxError>,
    ResBody: Body<Data = Bytes>,
    ResBody::Error: Into<BoxError>,
{
    let compress = !req.headers().contains_key(header::CONTENT_ENCODING)
        && decision::should_compress(Direction::Request, req.headers(), req.uri(), &options.policy);

    let req = if compress {
        let (mut parts, body) = req.into_parts();
        let body = body.collect().await.map_err(Into::<BoxError>::into)?.to_bytes();
        if body.is_empty() {
            Request::from_parts(parts, Either::Left(Full::new(body)))
        } else {
            let compressed = codec::compress(&body, options.level)?;
            tracing::trace!(
                raw = body.len(),
                compressed = compressed.len(),
                "compressed request body"
            );
            codec::set_compressed_headers(&mut parts.headers, compressed.len());
            Request::from_parts(parts, Either::Left(Full::new(compressed)))
        }
    } else {
        req.map(Either::Right)
    };

    let res = inner.call(req).await.map_err(Into::<BoxError>::into)?;
    match options.decompress.as_ref() {
        Some(decompress) if decision::is_gzip_encoded(res.headers()) => {
            let (mut parts, body) = res.into_parts();
            let body = body.collect().await.map_err(Into::<BoxError>::into)?.to_bytes();
            let body = decompress(&mut parts.headers, body).inspect_err(|err| {
                tracing::debug!(error = %err, "failed to decode gzip response");
            })?;
            Ok(Response::from_parts(parts, Either::Left(Full::new(body))))
        }
        _ => Ok(res.map(Either::Right)),
    }
}
