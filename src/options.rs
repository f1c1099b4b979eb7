use crate::codec::{self, Level};
use crate::error::Result;
use crate::policy::ExclusionPolicy;
use bytes::Bytes;
use http::HeaderMap;
use std::fmt;
use std::sync::Arc;

/// Hook that decodes a gzip body.
///
/// Receives the headers of the message being decoded and its complete body,
/// and returns the replacement body. A hook is only invoked when the message
/// declares `Content-Encoding: gzip`.
pub type DecompressFn = Arc<dyn Fn(&mut HeaderMap, Bytes) -> Result<Bytes> + Send + Sync>;

/// Settings shared by every exchange handled by one middleware instance.
///
/// Built once during setup and never mutated afterwards.
#[derive(Clone)]
pub struct Options {
    pub(crate) level: Level,
    pub(crate) policy: ExclusionPolicy,
    pub(crate) decompress: Option<DecompressFn>,
    pub(crate) stream: bool,
}

impl Options {
    /// Creates options with the given compression level and the default policy.
    pub fn new(level: Level) -> Self {
        Self {
            level,
            policy: ExclusionPolicy::default(),
            decompress: None,
            stream: false,
        }
    }

    /// The compression level.
    pub fn level(&self) -> Level {
        self.level
    }

    /// The exclusion policy.
    pub fn policy(&self) -> &ExclusionPolicy {
        &self.policy
    }

    /// The decompression hook, if one is installed.
    pub fn decompress_fn(&self) -> Option<&DecompressFn> {
        self.decompress.as_ref()
    }

    /// Whether responses are compressed as a stream of gzip members.
    pub fn is_stream(&self) -> bool {
        self.stream
    }

    pub(crate) fn set_decompress<F>(&mut self, f: F)
    where
        F: Fn(&mut HeaderMap, Bytes) -> Result<Bytes> + Send + Sync + 'static,
    {
        self.decompress = Some(Arc::new(f));
    }

    pub(crate) fn set_default_decompress(&mut self) {
        self.set_decompress(codec::default_decompress);
    }
}

impl Default for Options {
    fn default() -> Self {
        Self::new(Level::Default)
    }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("level", &self.level)
            .field("policy", &self.policy)
            .field("decompress", &self.decompress.is_some())
            .field("stream", &self.stream)
            .finish()
    }
}

/// Builder methods shared by the server and client layers.
macro_rules! options_builder {
    ($ty:ty) => {
        impl $ty {
            /// Replaces the excluded file extensions (each with its leading dot).
            pub fn excluded_extensions<I, S>(mut self, extensions: I) -> Self
            where
                I: IntoIterator<Item = S>,
                S: Into<String>,
            {
                self.options.policy = self.options.policy.with_extensions(extensions);
                self
            }

            /// Replaces the excluded path prefixes.
            pub fn excluded_paths<I, S>(mut self, prefixes: I) -> Self
            where
                I: IntoIterator<Item = S>,
                S: Into<String>,
            {
                self.options.policy = self.options.policy.with_paths(prefixes);
                self
            }

            /// Replaces the excluded path patterns.
            ///
            /// Fails if a pattern is not a valid regular expression.
            pub fn excluded_path_regexes<I, S>(mut self, patterns: I) -> $crate::Result<Self>
            where
                I: IntoIterator<Item = S>,
                S: AsRef<str>,
            {
                self.options.policy = self.options.policy.with_path_regexes(patterns)?;
                Ok(self)
            }

            /// Replaces the whole exclusion policy.
            pub fn policy(mut self, policy: $crate::ExclusionPolicy) -> Self {
                self.options.policy = policy;
                self
            }

            /// Installs a hook that decodes gzip bodies.
            pub fn decompress_fn<F>(mut self, f: F) -> Self
            where
                F: Fn(&mut http::HeaderMap, bytes::Bytes) -> $crate::Result<bytes::Bytes>
                    + Send
                    + Sync
                    + 'static,
            {
                self.options.set_decompress(f);
                self
            }

            /// Installs [`default_decompress`](crate::codec::default_decompress) as the hook.
            pub fn with_default_decompress(mut self) -> Self {
                self.options.set_default_decompress();
                self
            }

            /// Returns the configured options.
            pub fn options(&self) -> &$crate::Options {
                &self.options
            }
        }
    };
}

pub(crate) use options_builder;
