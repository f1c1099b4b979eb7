use crate::codec::Level;
use crate::options::{Options, options_builder};
use crate::service::GzipService;
use std::sync::Arc;
use tower::Layer;

/// A Tower layer that gzips responses and decodes gzip requests on a server.
///
/// By default responses are buffered and compressed whole, for peers whose
/// `Accept-Encoding` includes gzip. Paths ending in `.png`, `.gif`, `.jpeg` or
/// `.jpg` are left alone.
///
/// ```ignore
/// use http_gzip::{GzipLayer, Level};
/// use tower::ServiceBuilder;
///
/// let service = ServiceBuilder::new()
///     .layer(
///         GzipLayer::new(Level::Best)
///             .excluded_paths(["/metrics"])
///             .with_default_decompress(),
///     )
///     .service(my_service);
/// ```
#[derive(Debug, Clone, Default)]
pub struct GzipLayer {
    options: Options,
}

impl GzipLayer {
    /// Creates a layer compressing at `level`.
    pub fn new(level: Level) -> Self {
        Self {
            options: Options::new(level),
        }
    }

    /// Compresses each response body frame as its own gzip member instead of
    /// buffering the whole body.
    pub fn stream(mut self, stream: bool) -> Self {
        self.options.stream = stream;
        self
    }
}

options_builder!(GzipLayer);

impl<S> Layer<S> for GzipLayer {
    type Service = GzipService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        GzipService::new(inner, Arc::new(self.options.clone()))
    }
}
