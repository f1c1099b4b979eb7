//! Gzip middleware for HTTP servers and clients.
//!
//! This crate compresses HTTP bodies with gzip and decodes gzip bodies sent by
//! the peer. It provides:
//!
//! - [`GzipLayer`], a Tower layer for servers that decodes gzip request bodies
//!   and compresses responses, either buffered whole or one gzip member per
//!   body frame.
//! - [`GzipClientLayer`], a Tower layer for clients that compresses request
//!   bodies and decodes gzip responses.
//! - [`ChunkedWriter`] and [`StreamCompression`], for handlers that write their
//!   response incrementally to an HTTP/1.1 connection. Every write is sent as
//!   a complete gzip member inside its own chunk, so the peer can decode
//!   output as soon as it arrives.
//!
//! # Example
//!
//! ```ignore
//! use http_gzip::{GzipLayer, Level};
//! use tower::ServiceBuilder;
//!
//! let service = ServiceBuilder::new()
//!     .layer(GzipLayer::new(Level::Default).with_default_decompress())
//!     .service(my_service);
//! ```
//!
//! # Compression Rules
//!
//! Nothing is compressed when:
//! - The request asks for a connection upgrade
//! - The request accepts `text/event-stream`
//! - The peer's `Accept-Encoding` does not include gzip (server side)
//! - The request path has an excluded extension, prefix or pattern
//!   (`.png`, `.gif`, `.jpeg` and `.jpg` by default)
//! - The response already has a `Content-Encoding`
//! - The body is empty
//!
//! # Response Modifications
//!
//! When compression is applied:
//! - `Content-Encoding` is set to `gzip`
//! - `Content-Length` is set to the compressed size, or removed when streaming
//! - `Vary` includes `Accept-Encoding`

#![deny(missing_docs)]

mod body;
mod chunked;
mod client;
pub mod codec;
pub mod decision;
mod error;
mod layer;
mod options;
mod policy;
mod service;
mod stream;
mod writer;

pub use body::GzipBody;
pub use client::{GzipClientLayer, GzipClientService};
pub use codec::Level;
pub use decision::Direction;
pub use error::{BoxError, Error, Result};
pub use layer::GzipLayer;
pub use options::{DecompressFn, Options};
pub use policy::{DEFAULT_EXCLUDED_EXTENSIONS, ExclusionPolicy};
pub use service::GzipService;
pub use stream::StreamCompression;
pub use writer::{ChunkedWriter, ResponseWriter};
