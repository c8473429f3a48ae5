//! Go module cache resolution.
//!
//! Module dependencies resolve to `$GOMODCACHE`-style directories named
//! `<module>@<version>`. The version comes from, in priority order: the
//! module graph of the current project, an explicit `version:` pin, a scan
//! of the module cache, and finally a `go get` followed by a fresh graph
//! lookup.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use log::{debug, info};

use crate::config::{expand_env, Dependency, Source};
use crate::shell;

use super::{Manager, Operation, ResolveError, ResolveResult};

impl Manager {
    pub(super) fn resolve_gomod(&self, dep: &mut Dependency) -> Result<ResolveResult, ResolveError> {
        let url = expand_env(&dep.url);

        // Inline `module@version` pins take priority over the version field.
        let (url, inline_version) = match url.find('@') {
            Some(idx) if idx > 0 => {
                (url[..idx].to_string(), Some(url[idx + 1..].to_string()))
            }
            _ => (url, None),
        };

        // A module URL that is actually a directory on disk degrades to a
        // plain local resolution (common for replace-directive setups).
        let as_path = Path::new(&url);
        if as_path.is_dir() {
            let local = Dependency {
                url: url.clone(),
                source: Source::Local,
                ..dep.clone()
            };
            return self.resolve_local(&local);
        }

        let explicit = inline_version
            .or_else(|| dep.version.clone())
            .filter(|v| !v.is_empty());

        let mut version = self
            .resolve_gomod_version(&url, explicit.as_deref())
            .map_err(|e| ResolveError::new(dep, Source::Gomod, &url, Operation::Resolve, e))?;

        // A fetch only happens when no version could be determined locally.
        let mut changed = false;
        if version.is_empty() {
            changed = true;
            // Not in the graph or the cache; fetch it and look again.
            let target = match &explicit {
                Some(v) => format!("{url}@{v}"),
                None => format!("{url}/..."),
            };
            info!("downloading go module {target}");
            let status = shell::run(&format!("go get -d {target}"))
                .map_err(|e| ResolveError::new(dep, Source::Gomod, &url, Operation::Download, e))?;
            if status != 0 {
                return Err(ResolveError::new(
                    dep,
                    Source::Gomod,
                    &url,
                    Operation::Download,
                    format!("go get exited with status {status}"),
                ));
            }

            version = match &explicit {
                Some(v) => v.clone(),
                None => load_module_versions()
                    .map_err(|e| {
                        ResolveError::new(dep, Source::Gomod, &url, Operation::Resolve, e)
                    })?
                    .get(&url)
                    .cloned()
                    .or_else(|| self.scan_module_cache(&url))
                    .unwrap_or_default(),
            };
        }

        if version.is_empty() {
            return Err(ResolveError::new(
                dep,
                Source::Gomod,
                &url,
                Operation::Resolve,
                "unable to determine module version",
            ));
        }

        let module_dir = self.gomod_cache().join(format!("{url}@{version}"));
        let local_path = if dep.path.is_empty() {
            module_dir
        } else {
            module_dir.join(&dep.path)
        };
        if !local_path.exists() {
            return Err(ResolveError::new(
                dep,
                Source::Gomod,
                local_path.display().to_string(),
                Operation::Validate,
                "module directory not found in module cache",
            ));
        }

        dep.version = Some(version.clone());
        Ok(ResolveResult {
            local_path: Some(local_path),
            version,
            changed,
        })
    }

    /// Version lookup without network: module graph, explicit pin, then a
    /// module cache scan. Empty string means "unknown, must fetch".
    fn resolve_gomod_version(
        &self,
        url: &str,
        explicit: Option<&str>,
    ) -> std::io::Result<String> {
        if let Some(version) = load_version_graph()?.get(url) {
            debug!("{url}: version {version} from module graph");
            return Ok(version.clone());
        }
        if let Some(version) = explicit {
            return Ok(version.to_string());
        }
        Ok(self.scan_module_cache(url).unwrap_or_default())
    }

    /// Scan the module cache for `<url>@<version>` entries and keep the
    /// highest version found.
    pub(super) fn scan_module_cache(&self, url: &str) -> Option<String> {
        let module_path = self.gomod_cache().join(url);
        let parent = module_path.parent()?;
        let prefix = format!("{}@", module_path.file_name()?.to_str()?);

        let mut best: Option<String> = None;
        for entry in fs::read_dir(parent).ok()? {
            let entry = entry.ok()?;
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            let Some(version) = name.strip_prefix(&prefix) else {
                continue;
            };
            match &best {
                Some(current) if compare_versions(version, current) <= 0 => {}
                _ => best = Some(version.to_string()),
            }
        }
        best
    }

    fn gomod_cache(&self) -> &Path {
        &self.gomod_cache
    }
}

/// Versions of all modules in the current project's module graph.
fn load_version_graph() -> std::io::Result<HashMap<String, String>> {
    if !Path::new("go.mod").exists() {
        return Ok(HashMap::new());
    }
    let output = match shell::run_capture("go mod graph") {
        Ok(out) => out,
        // No go toolchain or broken module; fall through to other strategies.
        Err(err) => {
            debug!("go mod graph unavailable: {err}");
            return Ok(HashMap::new());
        }
    };
    Ok(parse_version_graph(&output))
}

/// Versions from `go list -m all`, refreshed after a `go get`.
fn load_module_versions() -> std::io::Result<HashMap<String, String>> {
    let output = shell::run_capture("go list -m all")?;
    let mut versions = HashMap::new();
    for line in output.lines() {
        let mut parts = line.split_whitespace();
        if let (Some(module), Some(version)) = (parts.next(), parts.next()) {
            versions.insert(module.to_string(), version.to_string());
        }
    }
    Ok(versions)
}

fn parse_version_graph(output: &str) -> HashMap<String, String> {
    let mut versions: HashMap<String, String> = HashMap::new();
    for token in output.split_whitespace() {
        let Some((module, version)) = token.split_once('@') else {
            continue;
        };
        if !version.starts_with('v') {
            continue;
        }
        match versions.get(module) {
            Some(current) if compare_versions(version, current) <= 0 => {}
            _ => {
                versions.insert(module.to_string(), version.to_string());
            }
        }
    }
    versions
}

/// Compare two version strings: numeric ordering on dotted core segments,
/// lexicographic fallback for anything non-numeric (pre-release suffixes,
/// pseudo-versions).
pub(super) fn compare_versions(a: &str, b: &str) -> i32 {
    let core = |v: &str| -> Vec<String> {
        v.trim_start_matches('v')
            .split(['-', '+'])
            .next()
            .unwrap_or("")
            .split('.')
            .map(str::to_string)
            .collect()
    };

    let (sa, sb) = (core(a), core(b));
    for i in 0..sa.len().max(sb.len()) {
        let (xa, xb) = (sa.get(i).map(String::as_str).unwrap_or("0"),
                        sb.get(i).map(String::as_str).unwrap_or("0"));
        let ord = match (xa.parse::<u64>(), xb.parse::<u64>()) {
            (Ok(na), Ok(nb)) => na.cmp(&nb),
            _ => xa.cmp(xb),
        };
        match ord {
            std::cmp::Ordering::Less => return -1,
            std::cmp::Ordering::Greater => return 1,
            std::cmp::Ordering::Equal => {}
        }
    }
    // Same core: a release outranks its own pre-releases; two pre-releases
    // order lexicographically.
    fn pre(v: &str) -> Option<&str> {
        v.trim_start_matches('v')
            .split('+')
            .next()
            .unwrap_or("")
            .split_once('-')
            .map(|(_, suffix)| suffix)
    }
    match (pre(a), pre(b)) {
        (None, Some(_)) => 1,
        (Some(_), None) => -1,
        (Some(pa), Some(pb)) => match pa.cmp(pb) {
            std::cmp::Ordering::Less => -1,
            std::cmp::Ordering::Greater => 1,
            std::cmp::Ordering::Equal => 0,
        },
        (None, None) => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compare_versions_orders_numerically() {
        assert_eq!(compare_versions("v1.2.3", "v1.2.3"), 0);
        assert_eq!(compare_versions("v1.10.0", "v1.9.0"), 1);
        assert_eq!(compare_versions("v0.9.0", "v1.0.0"), -1);
        assert_eq!(compare_versions("v1.2", "v1.2.1"), -1);
    }

    #[test]
    fn compare_versions_handles_prerelease_suffixes() {
        assert_eq!(compare_versions("v1.0.0-alpha", "v1.0.0-beta"), -1);
        assert_eq!(compare_versions("v2.0.0", "v2.0.0-rc1"), 1);
        assert_eq!(compare_versions("v2.0.0-rc1", "v2.0.0"), -1);
        assert_eq!(compare_versions("v2.0.0-rc1", "v2.0.0-rc1"), 0);
    }

    #[test]
    fn scan_module_cache_prefers_release_over_prerelease() {
        let dir = tempfile::tempdir().unwrap();
        let modcache = dir.path().join("pkg/mod");
        for v in ["v2.0.0-rc1", "v2.0.0", "v2.0.0-beta"] {
            fs::create_dir_all(modcache.join(format!("github.com/acme/protos@{v}"))).unwrap();
        }

        let manager = Manager::new(Some(dir.path().join("cache")), Some(modcache));
        assert_eq!(
            manager.scan_module_cache("github.com/acme/protos").as_deref(),
            Some("v2.0.0")
        );
    }

    #[test]
    fn parse_version_graph_keeps_highest() {
        let graph = "\
mymod github.com/a/b@v1.2.0
github.com/a/b@v1.2.0 github.com/c/d@v0.3.0
mymod github.com/a/b@v1.4.0
";
        let versions = parse_version_graph(graph);
        assert_eq!(versions.get("github.com/a/b").map(String::as_str), Some("v1.4.0"));
        assert_eq!(versions.get("github.com/c/d").map(String::as_str), Some("v0.3.0"));
    }

    #[test]
    fn scan_module_cache_picks_highest_version() {
        let dir = tempfile::tempdir().unwrap();
        let modcache = dir.path().join("pkg/mod");
        for v in ["v1.2.0", "v1.10.0", "v1.9.3"] {
            fs::create_dir_all(modcache.join(format!("github.com/acme/protos@{v}"))).unwrap();
        }

        let manager = Manager::new(Some(dir.path().join("cache")), Some(modcache));
        assert_eq!(
            manager.scan_module_cache("github.com/acme/protos").as_deref(),
            Some("v1.10.0")
        );
        assert_eq!(manager.scan_module_cache("github.com/acme/other"), None);
    }

    #[test]
    fn warm_module_cache_resolves_without_change() {
        let dir = tempfile::tempdir().unwrap();
        let modcache = dir.path().join("pkg/mod");
        fs::create_dir_all(modcache.join("github.com/acme/protos@v1.2.0")).unwrap();

        let manager = Manager::new(Some(dir.path().join("cache")), Some(modcache.clone()));
        let mut dep = Dependency {
            name: "protos".into(),
            url: "github.com/acme/protos".into(),
            source: Source::Gomod,
            ..Dependency::default()
        };

        let first = manager.resolve(&mut dep).unwrap();
        assert!(!first.changed);
        assert_eq!(first.version, "v1.2.0");
        assert_eq!(dep.version.as_deref(), Some("v1.2.0"));

        let second = manager.resolve(&mut dep).unwrap();
        assert!(!second.changed);
        assert_eq!(first.local_path, second.local_path);
        assert_eq!(
            second.local_path,
            Some(modcache.join("github.com/acme/protos@v1.2.0"))
        );
    }

    #[test]
    fn module_url_that_is_a_directory_resolves_locally() {
        let dir = tempfile::tempdir().unwrap();
        let protos = dir.path().join("protos");
        fs::create_dir_all(&protos).unwrap();

        let manager = Manager::new(
            Some(dir.path().join("cache")),
            Some(dir.path().join("mod")),
        );
        let mut dep = Dependency {
            name: "sibling".into(),
            url: protos.to_str().unwrap().into(),
            source: Source::Gomod,
            ..Dependency::default()
        };

        let result = manager.resolve(&mut dep).unwrap();
        assert_eq!(result.local_path, Some(protos));
    }
}
