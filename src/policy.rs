use crate::error::Result;
use regex::Regex;
use std::collections::HashSet;

/// Extensions excluded from compression by default.
pub const DEFAULT_EXCLUDED_EXTENSIONS: [&str; 4] = [".png", ".gif", ".jpeg", ".jpg"];

/// Rules that exclude an exchange from compression.
///
/// A policy is built once when the middleware is configured and then only
/// read, so it can be shared across concurrent requests without locking.
/// A match on any single rule excludes the exchange.
#[derive(Debug, Clone)]
pub struct ExclusionPolicy {
    extensions: HashSet<String>,
    prefixes: Vec<String>,
    regexes: Vec<Regex>,
}

impl ExclusionPolicy {
    /// Creates a policy that excludes nothing.
    pub fn empty() -> Self {
        Self {
            extensions: HashSet::new(),
            prefixes: Vec::new(),
            regexes: Vec::new(),
        }
    }

    /// Replaces the excluded extensions. Each entry includes the leading dot.
    pub fn with_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extensions = extensions.into_iter().map(Into::into).collect();
        self
    }

    /// Replaces the excluded path prefixes.
    pub fn with_paths<I, S>(mut self, prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.prefixes = prefixes.into_iter().map(Into::into).collect();
        self
    }

    /// Replaces the excluded path patterns.
    ///
    /// Fails if any pattern is not a valid regular expression.
    pub fn with_path_regexes<I, S>(mut self, patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.regexes = patterns
            .into_iter()
            .map(|p| Regex::new(p.as_ref()))
            .collect::<Result<_, _>>()?;
        Ok(self)
    }

    /// Returns true if the extension of `path` is excluded.
    pub fn matches_extension(&self, path: &str) -> bool {
        extension(path).is_some_and(|ext| self.extensions.contains(ext))
    }

    /// Returns true if `target` starts with an excluded prefix.
    pub fn matches_prefix(&self, target: &str) -> bool {
        self.prefixes.iter().any(|p| target.starts_with(p.as_str()))
    }

    /// Returns true if any excluded pattern matches `target`.
    pub fn matches_regex(&self, target: &str) -> bool {
        self.regexes.iter().any(|r| r.is_match(target))
    }

    /// Applies every rule. `path` is the URI path, `target` the path and query.
    pub fn excludes(&self, path: &str, target: &str) -> bool {
        self.matches_extension(path) || self.matches_prefix(target) || self.matches_regex(target)
    }
}

impl Default for ExclusionPolicy {
    fn default() -> Self {
        Self::empty().with_extensions(DEFAULT_EXCLUDED_EXTENSIONS)
    }
}

/// Extension of the last path segment, including the leading dot.
fn extension(path: &str) -> Option<&str> {
    let name = path.rsplit('/').next().unwrap_or(path);
    name.rfind('.').map(|i| &name[i..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension() {
        assert_eq!(extension("/image.png"), Some(".png"));
        assert_eq!(extension("/a.b/c"), None);
        assert_eq!(extension("/archive.tar.gz"), Some(".gz"));
        assert_eq!(extension("/.hidden"), Some(".hidden"));
        assert_eq!(extension("/"), None);
        assert_eq!(extension(""), None);
    }

    #[test]
    fn test_default_excludes_images() {
        let policy = ExclusionPolicy::default();
        for path in ["/image.png", "/a/b.gif", "/c.jpeg", "/d.jpg"] {
            assert!(policy.matches_extension(path), "{path}");
        }
        assert!(!policy.matches_extension("/index.html"));
        assert!(!policy.matches_extension("/png"));
    }

    #[test]
    fn test_extension_is_case_sensitive() {
        let policy = ExclusionPolicy::default();
        assert!(!policy.matches_extension("/IMAGE.PNG"));
    }

    #[test]
    fn test_custom_extensions_replace_defaults() {
        let policy = ExclusionPolicy::default().with_extensions([".html"]);
        assert!(policy.matches_extension("/index.html"));
        assert!(!policy.matches_extension("/image.png"));
    }

    #[test]
    fn test_prefix() {
        let policy = ExclusionPolicy::empty().with_paths(["/api/", "/static"]);
        assert!(policy.matches_prefix("/api/books"));
        assert!(policy.matches_prefix("/static/app.js?v=1"));
        assert!(!policy.matches_prefix("/apis"));
        assert!(!policy.matches_prefix("/v1/api/books"));
    }

    #[test]
    fn test_regex() {
        let policy = ExclusionPolicy::empty()
            .with_path_regexes([r"^/v\d+/stream", r"download"])
            .unwrap();
        assert!(policy.matches_regex("/v2/stream/events"));
        assert!(policy.matches_regex("/files?download=1"));
        assert!(!policy.matches_regex("/vx/stream"));
    }

    #[test]
    fn test_invalid_regex() {
        let err = ExclusionPolicy::empty()
            .with_path_regexes(["("])
            .unwrap_err();
        assert!(matches!(err, crate::Error::Pattern(_)));
    }

    #[test]
    fn test_excludes_any_rule() {
        let policy = ExclusionPolicy::default()
            .with_paths(["/api/"])
            .with_path_regexes([r"\.map$"])
            .unwrap();
        assert!(policy.excludes("/logo.png", "/logo.png"));
        assert!(policy.excludes("/api/books", "/api/books"));
        assert!(policy.excludes("/app.js.map", "/app.js.map"));
        assert!(!policy.excludes("/index.html", "/index.html?q=1"));
    }

    #[test]
    fn test_extension_ignores_query() {
        let policy = ExclusionPolicy::default();
        assert!(policy.excludes("/image.png", "/image.png?v=2"));
    }

    #[test]
    fn test_empty_excludes_nothing() {
        let policy = ExclusionPolicy::empty();
        assert!(!policy.excludes("/image.png", "/image.png"));
    }
}
