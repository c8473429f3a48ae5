//! Source tree walking and per-directory plugin config inheritance.
//!
//! Proto files are compiled one directory at a time. A directory may carry
//! a `protobuf.plugin.yaml` override; otherwise it inherits the effective
//! config of its nearest configured ancestor, falling back to the global
//! config. Excluded prefixes prune whole subtrees.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::debug;
use walkdir::WalkDir;

use crate::config::Config;
use crate::error::Result;

/// Per-directory override file name.
pub const PLUGIN_CONFIG_NAME: &str = "protobuf.plugin.yaml";

/// Walks proto source roots with exclude pruning.
pub struct ProtoWalker {
    roots: Vec<PathBuf>,
    excludes: Vec<String>,
}

impl ProtoWalker {
    pub fn new(roots: &[String], excludes: &[String]) -> Self {
        Self {
            roots: roots.iter().map(PathBuf::from).collect(),
            excludes: excludes.to_vec(),
        }
    }

    /// The `.proto` files directly inside `dir`, sorted. Not recursive;
    /// each directory compiles as its own protoc invocation.
    pub fn proto_files(dir: &Path) -> Vec<PathBuf> {
        let Ok(entries) = fs::read_dir(dir) else {
            return Vec::new();
        };
        let mut files: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.is_file()
                    && p.file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| n.ends_with(".proto"))
            })
            .collect();
        files.sort();
        files
    }

    pub fn has_proto_files(dir: &Path) -> bool {
        !Self::proto_files(dir).is_empty()
    }

    /// All directories under the roots, excluded subtrees pruned, in
    /// deterministic sorted order.
    pub fn proto_dirs(&self) -> Vec<PathBuf> {
        let mut dirs = Vec::new();
        for root in &self.roots {
            if !root.is_dir() {
                debug!("skipping missing root {}", root.display());
                continue;
            }
            let mut it = WalkDir::new(root).sort_by_file_name().into_iter();
            while let Some(entry) = it.next() {
                let Ok(entry) = entry else {
                    continue;
                };
                if !entry.file_type().is_dir() {
                    continue;
                }
                if is_excluded(entry.path(), &self.excludes) {
                    it.skip_current_dir();
                    continue;
                }
                dirs.push(entry.path().to_path_buf());
            }
        }
        dirs
    }

    /// Effective config per directory: top-down single pass where each
    /// directory either loads its own override merged onto the base, or
    /// inherits the nearest ancestor's effective config. Directories whose
    /// effective excludes match are dropped along with their subtrees.
    pub fn collect_plugin_configs(&self, base: &Config) -> Result<BTreeMap<PathBuf, Config>> {
        let mut configs: BTreeMap<PathBuf, Config> = BTreeMap::new();

        for dir in self.proto_dirs() {
            let override_path = dir.join(PLUGIN_CONFIG_NAME);
            let effective = if override_path.is_file() {
                debug!("loading override {}", override_path.display());
                let override_cfg = Config::load_override(&override_path)?;
                base.merge_override(Some(&override_cfg))
            } else if let Some(inherited) = nearest_ancestor(&configs, &dir) {
                inherited.clone()
            } else {
                base.merge_override(None)
            };

            // A freshly merged override can introduce excludes that apply
            // to the directory itself.
            if is_excluded(&dir, &effective.excludes) {
                continue;
            }
            configs.insert(dir, effective);
        }

        Ok(configs)
    }
}

fn nearest_ancestor<'a>(
    configs: &'a BTreeMap<PathBuf, Config>,
    dir: &Path,
) -> Option<&'a Config> {
    dir.ancestors().skip(1).find_map(|a| configs.get(a))
}

fn is_excluded(path: &Path, excludes: &[String]) -> bool {
    let text = path.to_string_lossy();
    excludes
        .iter()
        .filter(|e| !e.is_empty())
        .any(|e| text.starts_with(e.as_str()))
}
