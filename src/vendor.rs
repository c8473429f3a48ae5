//! Vendor synchronization: resolve every declared dependency and copy its
//! `.proto` files into the vendor directory.
//!
//! The vendor tree is rebuilt from scratch on every sync so renamed or
//! removed dependencies cannot leave stale files behind. Only `.proto`
//! files are copied; everything else in the resolved trees is ignored.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::{info, warn};
use walkdir::WalkDir;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::resolver::Manager;

/// Outcome of resolving all dependencies in a config.
#[derive(Debug, Default)]
pub struct VendorResult {
    /// Dependency name to resolved local path, in stable name order.
    pub resolved_paths: BTreeMap<String, PathBuf>,
    /// Names of dependencies that failed to resolve.
    pub failed: Vec<String>,
    /// True iff any dependency was fetched or re-versioned this run.
    pub changed: bool,
}

/// Drives resolution and the vendor-directory copy.
pub struct VendorService {
    resolver: Manager,
}

impl VendorService {
    pub fn new(resolver: Manager) -> Self {
        Self { resolver }
    }

    pub fn resolver(&self) -> &Manager {
        &self.resolver
    }

    /// Resolve every named dependency, writing resolved versions back into
    /// the config. Failures are collected, not short-circuited, so one bad
    /// dependency does not hide the rest.
    pub fn resolve_dependencies(&self, config: &mut Config, update: bool) -> Result<VendorResult> {
        let mut result = VendorResult::default();

        if update {
            info!("clearing dependency cache");
            self.resolver.clean_cache()?;
        }

        for dep in &mut config.depends {
            if dep.name.is_empty() || dep.url.is_empty() {
                continue;
            }

            match self.resolver.resolve(dep) {
                Ok(resolved) => {
                    let Some(path) = resolved.local_path else {
                        info!("skipping optional dependency {}", dep.name);
                        continue;
                    };
                    if !resolved.version.is_empty() {
                        dep.version = Some(resolved.version);
                    }
                    result.changed |= resolved.changed;
                    result.resolved_paths.insert(dep.name.clone(), path);
                }
                Err(err) => {
                    warn!("dependency {} failed to resolve", dep.name);
                    eprintln!("{err}");
                    result.failed.push(dep.name.clone());
                }
            }
        }

        Ok(result)
    }

    /// Rebuild the vendor directory from the resolved trees. Returns the
    /// number of files copied.
    pub fn copy_to_vendor(
        &self,
        vendor: &Path,
        resolved: &BTreeMap<String, PathBuf>,
    ) -> Result<usize> {
        if vendor.exists() {
            fs::remove_dir_all(vendor)?;
        }
        fs::create_dir_all(vendor)?;

        let mut copied = 0;
        for (name, source_root) in resolved {
            copied += copy_proto_tree(name, source_root, &vendor.join(name))?;
        }
        Ok(copied)
    }
}

fn copy_proto_tree(name: &str, source_root: &Path, target_root: &Path) -> Result<usize> {
    let wrap = |path: &Path| {
        let path = path.to_path_buf();
        let name = name.to_string();
        move |source: std::io::Error| Error::Copy { path, name, source }
    };

    let mut copied = 0;
    for entry in WalkDir::new(source_root) {
        let entry = entry.map_err(|e| Error::Copy {
            path: source_root.to_path_buf(),
            name: name.to_string(),
            source: e.into(),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        // Match on the full file name, so dotfiles like `.proto` itself or
        // editor backups with other extensions never slip in.
        let Some(file_name) = entry.file_name().to_str() else {
            continue;
        };
        if !file_name.ends_with(".proto") {
            continue;
        }

        let rel = entry
            .path()
            .strip_prefix(source_root)
            .map_err(|_| Error::Copy {
                path: entry.path().to_path_buf(),
                name: name.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::Other, "path outside source root"),
            })?;
        let target = target_root.join(rel);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(wrap(&target))?;
        }
        fs::copy(entry.path(), &target).map_err(wrap(&target))?;
        copied += 1;
    }
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Dependency;

    fn service(cache: &Path) -> VendorService {
        VendorService::new(Manager::new(
            Some(cache.join("cache")),
            Some(cache.join("mod")),
        ))
    }

    #[test]
    fn copies_only_proto_files_preserving_layout() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(src.join("google/api")).unwrap();
        fs::write(src.join("google/api/http.proto"), "syntax").unwrap();
        fs::write(src.join("google/api/README.md"), "docs").unwrap();
        fs::write(src.join("top.proto"), "syntax").unwrap();

        let vendor = dir.path().join(".proto");
        let mut resolved = BTreeMap::new();
        resolved.insert("googleapis".to_string(), src);

        let copied = service(dir.path())
            .copy_to_vendor(&vendor, &resolved)
            .unwrap();

        assert_eq!(copied, 2);
        assert!(vendor.join("googleapis/google/api/http.proto").is_file());
        assert!(vendor.join("googleapis/top.proto").is_file());
        assert!(!vendor.join("googleapis/google/api/README.md").exists());
    }

    #[test]
    fn rerun_removes_stale_vendor_entries() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("a.proto"), "syntax").unwrap();

        let vendor = dir.path().join(".proto");
        let svc = service(dir.path());

        let mut resolved = BTreeMap::new();
        resolved.insert("old-name".to_string(), src.clone());
        svc.copy_to_vendor(&vendor, &resolved).unwrap();
        assert!(vendor.join("old-name/a.proto").is_file());

        let mut renamed = BTreeMap::new();
        renamed.insert("new-name".to_string(), src);
        svc.copy_to_vendor(&vendor, &renamed).unwrap();
        assert!(vendor.join("new-name/a.proto").is_file());
        assert!(!vendor.join("old-name").exists());
    }

    #[test]
    fn failures_are_collected_without_stopping_siblings() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good");
        fs::create_dir_all(&good).unwrap();

        let mut config = Config {
            depends: vec![
                Dependency {
                    name: "good".into(),
                    url: good.to_str().unwrap().into(),
                    ..Dependency::default()
                },
                Dependency {
                    name: "bad".into(),
                    url: "/missing/path".into(),
                    ..Dependency::default()
                },
                Dependency {
                    name: "maybe".into(),
                    url: "/also/missing".into(),
                    optional: true,
                    ..Dependency::default()
                },
            ],
            ..Config::default()
        };

        let result = service(dir.path())
            .resolve_dependencies(&mut config, false)
            .unwrap();

        assert_eq!(result.resolved_paths.len(), 1);
        assert!(result.resolved_paths.contains_key("good"));
        assert_eq!(result.failed, vec!["bad".to_string()]);
    }

    #[test]
    fn unnamed_dependencies_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config {
            depends: vec![Dependency {
                url: "github.com/a/b".into(),
                optional: true,
                ..Dependency::default()
            }],
            ..Config::default()
        };

        let result = service(dir.path())
            .resolve_dependencies(&mut config, false)
            .unwrap();
        assert!(result.resolved_paths.is_empty());
        assert!(result.failed.is_empty());
    }
}
