//! Multi-source dependency resolution.
//!
//! Each dependency names a backend (Go module cache, git, http archive, S3,
//! GCS or a local path). The [`Manager`] detects the backend when unset,
//! computes a content-addressed cache location, and dispatches to the
//! matching resolver. Cache entries are immutable once written; "does the
//! key exist" is the only synchronization needed.

mod fetch;
mod gomod;

use std::env;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::debug;
use sha2::{Digest, Sha256};

use crate::config::{expand_env, Dependency, Source};

/// Outcome of resolving a single dependency.
#[derive(Debug, Clone, Default)]
pub struct ResolveResult {
    /// Local path of the resolved content. `None` only for optional
    /// dependencies that could not be resolved.
    pub local_path: Option<PathBuf>,
    /// Resolved version, when the backend knows one.
    pub version: String,
    /// True iff a fetch happened during this call.
    pub changed: bool,
}

impl ResolveResult {
    fn unresolved() -> Self {
        Self::default()
    }
}

/// Stage of resolution that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Download,
    Resolve,
    Validate,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Operation::Download => "download",
            Operation::Resolve => "resolve",
            Operation::Validate => "validate",
        })
    }
}

/// Detailed resolution failure, rendered as a multi-line diagnostic rather
/// than a bare cause. Never constructed for optional, unresolved
/// dependencies.
#[derive(Debug)]
pub struct ResolveError {
    pub name: String,
    pub source: Source,
    pub url: String,
    pub reference: String,
    pub subpath: String,
    pub operation: Operation,
    pub cause: Box<dyn std::error::Error + Send + Sync>,
}

impl ResolveError {
    fn new(
        dep: &Dependency,
        source: Source,
        url: impl Into<String>,
        operation: Operation,
        cause: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self {
            name: dep.name.clone(),
            source,
            url: url.into(),
            reference: dep.reference.clone(),
            subpath: dep.path.clone(),
            operation,
            cause: cause.into(),
        }
    }
}

impl fmt::Display for ResolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "failed to {} dependency: {}", self.operation, self.name)?;
        writeln!(f, "  source:  {}", self.source.display_name())?;
        writeln!(f, "  url:     {}", self.url)?;
        if !self.reference.is_empty() {
            writeln!(f, "  ref:     {}", self.reference)?;
        }
        if !self.subpath.is_empty() {
            writeln!(f, "  path:    {}", self.subpath)?;
        }
        writeln!(f, "  error:   {}", self.cause)?;
        writeln!(f, "suggestions:")?;
        for line in suggestions(self.source) {
            writeln!(f, "  - {line}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ResolveError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.cause.as_ref())
    }
}

fn suggestions(source: Source) -> &'static [&'static str] {
    match source {
        Source::Git => &[
            "check that the repository URL is correct and accessible",
            "verify the ref (tag/branch/commit) exists",
            "ensure you have proper authentication (SSH key or token)",
        ],
        Source::Http => &[
            "check that the URL is correct and the file exists",
            "verify your network connection",
            "check whether authentication is required",
        ],
        Source::S3 => &[
            "check AWS credentials (AWS_ACCESS_KEY_ID, AWS_SECRET_ACCESS_KEY)",
            "verify the bucket and path exist",
            "check bucket permissions",
        ],
        Source::Gcs => &[
            "check Google Cloud credentials (GOOGLE_APPLICATION_CREDENTIALS)",
            "verify the bucket and path exist",
            "check bucket permissions",
        ],
        Source::Gomod => &[
            "check that the module path is correct",
            "verify the version exists in the module",
            "run 'go mod tidy' to update dependencies",
        ],
        Source::Local => &[
            "check that the local path exists",
            "verify read permissions",
        ],
        Source::Auto => &[],
    }
}

/// Auto-detect the backend for a URL. Pure and total; never returns `Auto`.
pub fn detect_source(url: &str) -> Source {
    let path = Path::new(url);
    if path.is_absolute() || path.exists() {
        return Source::Local;
    }
    if url.starts_with("s3://") || url.starts_with("s3::") {
        return Source::S3;
    }
    if url.starts_with("gcs://") || url.starts_with("gs://") {
        return Source::Gcs;
    }
    if url.ends_with(".git") || url.starts_with("git::") || url.starts_with("git@") {
        return Source::Git;
    }
    if url.starts_with("http://") || url.starts_with("https://") {
        return Source::Http;
    }
    Source::Gomod
}

/// Dispatches dependency resolution and owns the cache layout.
pub struct Manager {
    cache_dir: PathBuf,
    gomod_cache: PathBuf,
}

impl Manager {
    /// Create a manager. `None` arguments select the defaults:
    /// `<user cache dir>/protoforge/deps` and `$GOPATH/pkg/mod`.
    pub fn new(cache_dir: Option<PathBuf>, gomod_cache: Option<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.unwrap_or_else(default_cache_dir),
            gomod_cache: gomod_cache.unwrap_or_else(default_gomod_cache),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Remove all cached fetches.
    pub fn clean_cache(&self) -> io::Result<()> {
        if self.cache_dir.exists() {
            fs::remove_dir_all(&self.cache_dir)
        } else {
            Ok(())
        }
    }

    /// Resolve a dependency, writing the detected source and resolved
    /// version back into it. Any failure of an optional dependency is
    /// converted into an unresolved success.
    pub fn resolve(&self, dep: &mut Dependency) -> Result<ResolveResult, ResolveError> {
        if dep.source == Source::Auto {
            dep.source = detect_source(&dep.url);
        }

        let result = match dep.source {
            Source::Local => self.resolve_local(dep),
            Source::Gomod => self.resolve_gomod(dep),
            other => self.resolve_with_getter(dep, other),
        };

        match result {
            Err(_) if dep.optional => Ok(ResolveResult::unresolved()),
            other => other,
        }
    }

    fn resolve_local(&self, dep: &Dependency) -> Result<ResolveResult, ResolveError> {
        let url = expand_env(&dep.url);
        let mut local = PathBuf::from(&url);
        if !dep.path.is_empty() {
            local = local.join(&dep.path);
        }

        let abs = if local.is_absolute() {
            local
        } else {
            env::current_dir()
                .map_err(|e| ResolveError::new(dep, Source::Local, &url, Operation::Resolve, e))?
                .join(local)
        };

        if !abs.exists() {
            return Err(ResolveError::new(
                dep,
                Source::Local,
                abs.display().to_string(),
                Operation::Resolve,
                "path does not exist",
            ));
        }

        Ok(ResolveResult {
            local_path: Some(abs),
            version: String::new(),
            changed: false,
        })
    }

    /// Resolve git/http/s3/gcs through the cache: key = truncated hash of
    /// `url@ref`, path = `cacheDir/<source>/<key>`. A cache hit skips the
    /// network entirely.
    fn resolve_with_getter(
        &self,
        dep: &Dependency,
        source: Source,
    ) -> Result<ResolveResult, ResolveError> {
        let key = cache_key(&dep.url, &dep.reference);
        let cache_path = self.cache_dir.join(source.as_str()).join(&key);

        let mut changed = false;
        if !cache_path.exists() {
            changed = true;

            if let Some(parent) = cache_path.parent() {
                fs::create_dir_all(parent).map_err(|e| {
                    ResolveError::new(dep, source, &dep.url, Operation::Resolve, e)
                })?;
            }

            let getter_url = build_getter_url(dep, source);
            debug!("fetching {} from {}", dep.name, getter_url);
            fetch::download(&getter_url, source, &cache_path).map_err(|e| {
                ResolveError::new(dep, source, getter_url.clone(), Operation::Download, e)
            })?;
        }

        let local_path = if dep.path.is_empty() {
            cache_path
        } else {
            cache_path.join(&dep.path)
        };
        if !local_path.exists() {
            return Err(ResolveError::new(
                dep,
                source,
                &dep.url,
                Operation::Validate,
                format!("subdirectory '{}' not found in downloaded content", dep.path),
            ));
        }

        Ok(ResolveResult {
            local_path: Some(local_path),
            version: dep.reference.clone(),
            changed,
        })
    }

    /// The cache location a dependency would resolve to, if already fetched.
    /// Never touches the network.
    pub fn cached_path(&self, dep: &Dependency) -> Option<PathBuf> {
        let source = if dep.source == Source::Auto {
            detect_source(&dep.url)
        } else {
            dep.source
        };

        let base = match source {
            Source::Local => PathBuf::from(expand_env(&dep.url)),
            Source::Gomod => {
                let url = expand_env(&dep.url);
                let url = match url.find('@') {
                    Some(idx) if idx > 0 => url[..idx].to_string(),
                    _ => url,
                };
                let version = dep
                    .version
                    .clone()
                    .filter(|v| !v.is_empty())
                    .or_else(|| self.scan_module_cache(&url))?;
                self.gomod_cache.join(format!("{url}@{version}"))
            }
            _ => self
                .cache_dir
                .join(source.as_str())
                .join(cache_key(&dep.url, &dep.reference)),
        };

        let path = if dep.path.is_empty() {
            base
        } else {
            base.join(&dep.path)
        };
        path.exists().then_some(path)
    }
}

/// Truncated SHA-256 of `url@ref`, 24 hex chars.
fn cache_key(url: &str, reference: &str) -> String {
    let digest = Sha256::digest(format!("{url}@{reference}").as_bytes());
    let hex = format!("{digest:x}");
    hex[..24].to_string()
}

/// Build the fetch URL for a getter-backed source: `git::` prefix plus a
/// `ref=` query parameter for git, protocol normalization for S3/GCS.
pub fn build_getter_url(dep: &Dependency, source: Source) -> String {
    let mut url = dep.url.clone();

    match source {
        Source::Git => {
            if !url.starts_with("git::") {
                if !url.starts_with("git@") && !url.contains("://") {
                    url = format!("git::https://{url}");
                } else {
                    url = format!("git::{url}");
                }
            }
            if !dep.reference.is_empty() {
                let sep = if url.contains('?') { '&' } else { '?' };
                url = format!("{url}{sep}ref={}", dep.reference);
            }
        }
        Source::S3 => {
            if !url.starts_with("s3::") && !url.starts_with("s3://") {
                url = format!("s3::{url}");
            }
        }
        Source::Gcs => {
            if let Some(rest) = url.strip_prefix("gs://") {
                url = format!("gcs://{rest}");
            } else if !url.starts_with("gcs://") && !url.starts_with("gcs::") {
                url = format!("gcs::{url}");
            }
        }
        _ => {}
    }

    url
}

fn default_cache_dir() -> PathBuf {
    directories::BaseDirs::new()
        .map(|dirs| dirs.cache_dir().join("protoforge").join("deps"))
        .unwrap_or_else(|| PathBuf::from(".protoforge-cache"))
}

fn default_gomod_cache() -> PathBuf {
    match env::var("GOPATH") {
        Ok(gopath) if !gopath.is_empty() => PathBuf::from(gopath).join("pkg").join("mod"),
        _ => directories::BaseDirs::new()
            .map(|dirs| dirs.home_dir().join("go"))
            .unwrap_or_else(|| PathBuf::from("go"))
            .join("pkg")
            .join("mod"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_manager(cache: &Path) -> Manager {
        Manager::new(Some(cache.to_path_buf()), Some(cache.join("gomod-cache")))
    }

    #[test]
    fn detect_source_literals() {
        assert_eq!(detect_source("git@github.com:a/b.git"), Source::Git);
        assert_eq!(detect_source("git::https://github.com/a/b"), Source::Git);
        assert_eq!(detect_source("https://github.com/a/b.git"), Source::Git);
        assert_eq!(detect_source("https://x/y.tar.gz"), Source::Http);
        assert_eq!(detect_source("s3://bucket/k"), Source::S3);
        assert_eq!(detect_source("s3::https://s3.amazonaws.com/b/k"), Source::S3);
        assert_eq!(detect_source("gs://bucket/k"), Source::Gcs);
        assert_eq!(detect_source("gcs://bucket/k"), Source::Gcs);
        assert_eq!(detect_source("github.com/a/b"), Source::Gomod);
    }

    #[test]
    fn detect_source_existing_path_is_local() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(detect_source(dir.path().to_str().unwrap()), Source::Local);
        // absolute but missing paths are still local
        assert_eq!(detect_source("/definitely/not/here"), Source::Local);
    }

    #[test]
    fn cache_key_is_stable_and_truncated() {
        let a = cache_key("https://github.com/a/b.git", "v1");
        let b = cache_key("https://github.com/a/b.git", "v1");
        let c = cache_key("https://github.com/a/b.git", "v2");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 24);
    }

    #[test]
    fn getter_url_git_ref_and_prefixes() {
        let dep = Dependency {
            url: "https://github.com/user/repo.git".into(),
            reference: "v1.0.0".into(),
            ..Dependency::default()
        };
        assert_eq!(
            build_getter_url(&dep, Source::Git),
            "git::https://github.com/user/repo.git?ref=v1.0.0"
        );

        let ssh = Dependency {
            url: "git@github.com:user/repo.git".into(),
            ..Dependency::default()
        };
        assert_eq!(
            build_getter_url(&ssh, Source::Git),
            "git::git@github.com:user/repo.git"
        );

        let bare = Dependency {
            url: "github.com/user/repo".into(),
            ..Dependency::default()
        };
        assert_eq!(
            build_getter_url(&bare, Source::Git),
            "git::https://github.com/user/repo"
        );
    }

    #[test]
    fn getter_url_normalizes_gcs_protocol() {
        let dep = Dependency {
            url: "gs://bucket/path".into(),
            ..Dependency::default()
        };
        assert_eq!(build_getter_url(&dep, Source::Gcs), "gcs://bucket/path");

        let s3 = Dependency {
            url: "s3://bucket/path".into(),
            ..Dependency::default()
        };
        assert_eq!(build_getter_url(&s3, Source::S3), "s3://bucket/path");
    }

    #[test]
    fn optional_unresolvable_is_empty_success() {
        let dir = tempfile::tempdir().unwrap();
        let manager = test_manager(dir.path());

        let mut dep = Dependency {
            name: "maybe".into(),
            url: "/does/not/exist".into(),
            optional: true,
            ..Dependency::default()
        };

        let result = manager.resolve(&mut dep).unwrap();
        assert!(result.local_path.is_none());
        assert!(!result.changed);
    }

    #[test]
    fn required_unresolvable_reports_detected_source() {
        let dir = tempfile::tempdir().unwrap();
        let manager = test_manager(dir.path());

        let mut dep = Dependency {
            name: "missing".into(),
            url: "/does/not/exist".into(),
            ..Dependency::default()
        };

        let err = manager.resolve(&mut dep).unwrap_err();
        assert_eq!(err.source, Source::Local);
        assert_eq!(err.operation, Operation::Resolve);
    }

    #[test]
    fn local_resolution_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let proto_dir = dir.path().join("protos");
        std::fs::create_dir_all(&proto_dir).unwrap();

        let manager = test_manager(dir.path());
        let mut dep = Dependency {
            name: "local".into(),
            url: proto_dir.to_str().unwrap().into(),
            ..Dependency::default()
        };

        let first = manager.resolve(&mut dep).unwrap();
        let second = manager.resolve(&mut dep).unwrap();
        assert_eq!(first.local_path, second.local_path);
        assert!(!first.changed && !second.changed);
        assert_eq!(dep.source, Source::Local);
    }

    #[test]
    fn warm_cache_skips_fetch_and_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let manager = test_manager(dir.path());

        let mut dep = Dependency {
            name: "googleapis".into(),
            url: "https://github.com/googleapis/googleapis.git".into(),
            path: "google/api".into(),
            ..Dependency::default()
        };

        // Pre-populate the cache entry the key computation points at.
        let key = cache_key(&dep.url, &dep.reference);
        let entry = dir.path().join("git").join(&key).join("google/api");
        std::fs::create_dir_all(&entry).unwrap();

        let first = manager.resolve(&mut dep).unwrap();
        let second = manager.resolve(&mut dep).unwrap();

        assert!(!first.changed && !second.changed);
        assert_eq!(first.local_path, second.local_path);
        let path = first.local_path.unwrap();
        assert!(path.ends_with("google/api"));
        assert_eq!(manager.cached_path(&dep), Some(path));
    }

    #[test]
    fn warm_cache_missing_subdirectory_is_validate_error() {
        let dir = tempfile::tempdir().unwrap();
        let manager = test_manager(dir.path());

        let mut dep = Dependency {
            name: "apis".into(),
            url: "https://example.com/apis.git".into(),
            path: "nope/nope".into(),
            ..Dependency::default()
        };

        let key = cache_key(&dep.url, &dep.reference);
        std::fs::create_dir_all(dir.path().join("git").join(&key)).unwrap();

        let err = manager.resolve(&mut dep).unwrap_err();
        assert_eq!(err.operation, Operation::Validate);
        assert_eq!(err.source, Source::Git);
    }

    #[test]
    fn resolve_error_renders_context_and_suggestions() {
        let dep = Dependency {
            name: "test-dep".into(),
            url: "https://example.com/repo.git".into(),
            reference: "v1.0.0".into(),
            path: "proto".into(),
            ..Dependency::default()
        };
        let err = ResolveError::new(
            &dep,
            Source::Git,
            "git::https://example.com/repo.git?ref=v1.0.0",
            Operation::Download,
            "connection refused",
        );

        let rendered = err.to_string();
        assert!(rendered.contains("test-dep"));
        assert!(rendered.contains("Git"));
        assert!(rendered.contains("download"));
        assert!(rendered.contains("v1.0.0"));
        assert!(rendered.contains("suggestions:"));
    }

    #[test]
    fn clean_cache_removes_directory() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("cache");
        std::fs::create_dir_all(cache.join("git").join("abc")).unwrap();

        let manager = Manager::new(Some(cache.clone()), None);
        manager.clean_cache().unwrap();
        assert!(!cache.exists());
        // second clean on a missing directory is fine
        manager.clean_cache().unwrap();
    }
}
