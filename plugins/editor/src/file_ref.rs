//! File reference resolution
//!
//! Stored content refers to files by stable storage path
//! (`data-file-path`). Before display, each reference needs a direct URL in
//! `src`. URLs are fetched in batches from a [`UrlResolver`] and kept in a
//! [`ResolutionCache`] for the lifetime of the pipeline.

use crate::html;
use async_trait::async_trait;
use mizzen_core::{MizzenError, RemoteError, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

/// Batch lookup of direct URLs for storage paths
#[async_trait]
pub trait UrlResolver: Send + Sync {
    /// Resolve the given paths; paths missing from the result stay unresolved
    async fn resolve_urls(
        &self,
        paths: &[String],
    ) -> std::result::Result<HashMap<String, String>, RemoteError>;
}

/// Path to URL map shared by everything that renders one document
///
/// Entries are only ever added. Clones share the same storage, so two
/// resolvers built from clones of one cache never fetch the same path twice.
#[derive(Debug, Clone, Default)]
pub struct ResolutionCache {
    entries: Arc<RwLock<HashMap<String, String>>>,
}

impl ResolutionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &str) -> Option<String> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .cloned()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Paths from `paths` that have no cached URL yet
    pub fn missing(&self, paths: &[String]) -> Vec<String> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        paths
            .iter()
            .filter(|path| !entries.contains_key(path.as_str()))
            .cloned()
            .collect()
    }

    /// Merge resolved URLs into the cache
    pub fn extend(&self, urls: HashMap<String, String>) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(urls);
    }

    /// Copy of every cached entry
    pub fn snapshot(&self) -> HashMap<String, String> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Result of one resolution pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// The rewritten markup
    pub html: String,
    /// Distinct paths referenced by the input
    pub references: usize,
    /// Paths requested from the remote resolver in this pass
    pub fetched: usize,
    /// Whether the batched lookup failed and the input was returned as is
    pub degraded: bool,
    pub duration: Duration,
}

/// Rewrites file references to direct URLs
#[derive(Clone)]
pub struct FileReferenceResolver {
    remote: Arc<dyn UrlResolver>,
    cache: ResolutionCache,
}

impl FileReferenceResolver {
    /// Create a resolver with its own empty cache
    pub fn new(remote: Arc<dyn UrlResolver>) -> Self {
        Self::with_cache(remote, ResolutionCache::new())
    }

    /// Create a resolver that shares an existing cache
    pub fn with_cache(remote: Arc<dyn UrlResolver>, cache: ResolutionCache) -> Self {
        Self { remote, cache }
    }

    pub fn cache(&self) -> &ResolutionCache {
        &self.cache
    }

    /// Resolve all references in `html`
    ///
    /// Uncached paths are requested in one batch. A failed lookup leaves the
    /// input untouched.
    pub async fn resolve(&self, input: &str) -> Resolution {
        let started = Instant::now();
        let paths = html::file_paths(input);

        if paths.is_empty() {
            return Resolution {
                html: input.to_string(),
                references: 0,
                fetched: 0,
                degraded: false,
                duration: started.elapsed(),
            };
        }

        let missing = self.cache.missing(&paths);
        if !missing.is_empty() {
            tracing::debug!(
                "Resolving {} of {} file references",
                missing.len(),
                paths.len()
            );

            match self.remote.resolve_urls(&missing).await {
                Ok(urls) => self.cache.extend(urls),
                Err(e) => {
                    tracing::warn!(
                        "Failed to resolve file URLs, keeping content unresolved: {}",
                        e.detail().unwrap_or(&e.message)
                    );
                    return Resolution {
                        html: input.to_string(),
                        references: paths.len(),
                        fetched: missing.len(),
                        degraded: true,
                        duration: started.elapsed(),
                    };
                }
            }
        }

        Resolution {
            html: html::rewrite_file_sources(input, |path| self.cache.get(path)),
            references: paths.len(),
            fetched: missing.len(),
            degraded: false,
            duration: started.elapsed(),
        }
    }
}

impl std::fmt::Debug for FileReferenceResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileReferenceResolver")
            .field("cached", &self.cache.len())
            .finish()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum UrlMapFile {
    Wrapped { urls: HashMap<String, String> },
    Flat(HashMap<String, String>),
}

/// URL resolver backed by a fixed map
///
/// Unknown paths are simply absent from the result.
#[derive(Debug, Clone, Default)]
pub struct StaticUrlResolver {
    urls: HashMap<String, String>,
}

impl StaticUrlResolver {
    pub fn new(urls: HashMap<String, String>) -> Self {
        Self { urls }
    }

    /// Parse a map from JSON, either `{"urls": {...}}` or a flat object
    pub fn from_json(json: &str) -> Result<Self> {
        let urls = match serde_json::from_str(json)? {
            UrlMapFile::Wrapped { urls } => urls,
            UrlMapFile::Flat(urls) => urls,
        };
        Ok(Self::new(urls))
    }

    /// Load a map from a JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            MizzenError::resolution(format!(
                "Failed to read URL map {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_json(&content)
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }
}

#[async_trait]
impl UrlResolver for StaticUrlResolver {
    async fn resolve_urls(
        &self,
        paths: &[String],
    ) -> std::result::Result<HashMap<String, String>, RemoteError> {
        Ok(paths
            .iter()
            .filter_map(|path| self.urls.get(path).map(|url| (path.clone(), url.clone())))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records every batch it is asked for
    struct CountingResolver {
        urls: HashMap<String, String>,
        batches: Mutex<Vec<Vec<String>>>,
        fail: bool,
    }

    impl CountingResolver {
        fn new(pairs: &[(&str, &str)]) -> Self {
            Self {
                urls: pairs
                    .iter()
                    .map(|(p, u)| (p.to_string(), u.to_string()))
                    .collect(),
                batches: Mutex::new(Vec::new()),
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::new(&[])
            }
        }

        fn batches(&self) -> Vec<Vec<String>> {
            self.batches.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl UrlResolver for CountingResolver {
        async fn resolve_urls(
            &self,
            paths: &[String],
        ) -> std::result::Result<HashMap<String, String>, RemoteError> {
            self.batches.lock().unwrap().push(paths.to_vec());
            if self.fail {
                return Err(RemoteError::with_detail("Request failed", "backend offline"));
            }
            Ok(paths
                .iter()
                .filter_map(|p| self.urls.get(p).map(|u| (p.clone(), u.clone())))
                .collect())
        }
    }

    #[tokio::test]
    async fn test_resolves_missing_src() {
        let remote = Arc::new(CountingResolver::new(&[("a/b.png", "https://x/a.png")]));
        let resolver = FileReferenceResolver::new(remote.clone());

        let resolution = resolver.resolve(r#"<img data-file-path="a/b.png">"#).await;

        assert_eq!(
            resolution.html,
            r#"<img data-file-path="a/b.png" src="https://x/a.png">"#
        );
        assert_eq!(resolution.references, 1);
        assert_eq!(resolution.fetched, 1);
        assert!(!resolution.degraded);
        assert_eq!(remote.batches(), vec![vec!["a/b.png".to_string()]]);
    }

    #[tokio::test]
    async fn test_one_batch_for_uncached_paths_only() {
        let remote = Arc::new(CountingResolver::new(&[
            ("a.png", "https://x/a"),
            ("b.png", "https://x/b"),
        ]));
        let resolver = FileReferenceResolver::new(remote.clone());

        resolver.resolve(r#"<img data-file-path="a.png">"#).await;
        let resolution = resolver
            .resolve(r#"<img data-file-path="a.png"><img data-file-path="b.png"><img data-file-path="a.png">"#)
            .await;

        assert_eq!(resolution.fetched, 1);
        assert_eq!(
            remote.batches(),
            vec![vec!["a.png".to_string()], vec!["b.png".to_string()]]
        );
        assert_eq!(html::file_paths(&resolution.html).len(), 2);
        assert!(resolution.html.contains(r#"src="https://x/b""#));
    }

    #[tokio::test]
    async fn test_fully_cached_content_makes_no_calls() {
        let remote = Arc::new(CountingResolver::new(&[("a.png", "https://x/a")]));
        let resolver = FileReferenceResolver::new(remote.clone());
        let input = r#"<p>Intro</p><img data-file-path="a.png">"#;

        let first = resolver.resolve(input).await;
        let second = resolver.resolve(input).await;
        let again = resolver.resolve(&first.html).await;

        assert_eq!(first.html, second.html);
        assert_eq!(again.html, first.html);
        assert_eq!(remote.batches().len(), 1);
    }

    #[tokio::test]
    async fn test_content_without_references_skips_lookup() {
        let remote = Arc::new(CountingResolver::new(&[]));
        let resolver = FileReferenceResolver::new(remote.clone());

        let resolution = resolver.resolve("<p>plain <img src=\"x.png\"></p>").await;

        assert_eq!(resolution.html, "<p>plain <img src=\"x.png\"></p>");
        assert!(remote.batches().is_empty());
    }

    #[tokio::test]
    async fn test_failed_lookup_returns_input_unchanged() {
        let remote = Arc::new(CountingResolver::failing());
        let resolver = FileReferenceResolver::new(remote.clone());
        let input = r#"<img src="stale" data-file-path="a.png">"#;

        let resolution = resolver.resolve(input).await;

        assert_eq!(resolution.html, input);
        assert!(resolution.degraded);
        assert!(resolver.cache().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_paths_are_left_unresolved() {
        let remote = Arc::new(CountingResolver::new(&[("a.png", "https://x/a")]));
        let resolver = FileReferenceResolver::new(remote.clone());

        let resolution = resolver
            .resolve(r#"<img data-file-path="a.png"><img data-file-path="gone.png">"#)
            .await;

        assert_eq!(
            resolution.html,
            r#"<img data-file-path="a.png" src="https://x/a"><img data-file-path="gone.png">"#
        );
        assert!(resolver.cache().contains("a.png"));
        assert!(!resolver.cache().contains("gone.png"));
    }

    #[tokio::test]
    async fn test_shared_cache_across_resolvers() {
        let remote = Arc::new(CountingResolver::new(&[("a.png", "https://x/a")]));
        let cache = ResolutionCache::new();
        let first = FileReferenceResolver::with_cache(remote.clone(), cache.clone());
        let second = FileReferenceResolver::with_cache(remote.clone(), cache.clone());

        first.resolve(r#"<img data-file-path="a.png">"#).await;
        let resolution = second.resolve(r#"<p>other</p><img data-file-path="a.png">"#).await;

        assert_eq!(resolution.fetched, 0);
        assert_eq!(remote.batches().len(), 1);
        assert_eq!(cache.snapshot().get("a.png").map(String::as_str), Some("https://x/a"));
    }

    #[tokio::test]
    async fn test_static_resolver_formats() {
        let wrapped = StaticUrlResolver::from_json(r#"{"urls": {"a.png": "https://x/a"}}"#).unwrap();
        let flat = StaticUrlResolver::from_json(r#"{"b.png": "https://x/b"}"#).unwrap();
        assert_eq!(wrapped.len(), 1);
        assert_eq!(flat.len(), 1);

        let urls = wrapped
            .resolve_urls(&["a.png".to_string(), "missing.png".to_string()])
            .await
            .unwrap();
        assert_eq!(urls.len(), 1);
        assert_eq!(urls["a.png"], "https://x/a");

        assert!(StaticUrlResolver::from_json("[1, 2]").is_err());
    }

    #[test]
    fn test_static_resolver_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("urls.json");
        std::fs::write(&path, r#"{"urls": {"a.png": "https://x/a"}}"#).unwrap();

        let resolver = StaticUrlResolver::from_file(&path).unwrap();
        assert!(!resolver.is_empty());

        let missing = StaticUrlResolver::from_file(&dir.path().join("nope.json"));
        assert!(matches!(missing, Err(MizzenError::Resolution(_))));
    }
}
