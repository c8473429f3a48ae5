//! Project configuration model and loading.
//!
//! The configuration file (`protobuf.yaml` by default) declares the vendor
//! directory, proto source roots, external dependencies and the protoc
//! plugin pipeline. Per-directory overrides (`protobuf.plugin.yaml`) reuse a
//! subset of the same schema and are merged onto the global config by the
//! walker.

mod checksum;
mod opt_list;

pub use checksum::{config_checksum, read_checksum_artifact, write_checksum_artifact};
pub use opt_list::OptList;

use std::env;
use std::fs;
use std::path::Path;

use lazy_static::lazy_static;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Backend kind used to fetch a dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    /// Auto-detect from the URL shape.
    #[default]
    Auto,
    Gomod,
    Git,
    Http,
    S3,
    Gcs,
    Local,
}

impl Source {
    /// Stable lowercase name, used for cache directory layout.
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Auto => "auto",
            Source::Gomod => "gomod",
            Source::Git => "git",
            Source::Http => "http",
            Source::S3 => "s3",
            Source::Gcs => "gcs",
            Source::Local => "local",
        }
    }

    /// Human-readable name for diagnostics.
    pub fn display_name(&self) -> &'static str {
        match self {
            Source::Auto => "Auto",
            Source::Gomod => "Go Module",
            Source::Git => "Git",
            Source::Http => "HTTP",
            Source::S3 => "AWS S3",
            Source::Gcs => "Google Cloud Storage",
            Source::Local => "Local",
        }
    }
}

fn is_auto(source: &Source) -> bool {
    *source == Source::Auto
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// A proto dependency declaration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dependency {
    /// Local name, also the subdirectory under the vendor tree.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    /// Backend kind; auto-detected from the URL when absent.
    #[serde(default, skip_serializing_if = "is_auto")]
    pub source: Source,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,

    /// Subdirectory within the fetched tree.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,

    /// Pinned or resolved version; written back after resolution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Git-style ref (branch, tag, commit).
    #[serde(rename = "ref", default, skip_serializing_if = "String::is_empty")]
    pub reference: String,

    /// Skip silently when the dependency cannot be resolved.
    #[serde(default, skip_serializing_if = "is_false")]
    pub optional: bool,
}

/// Base plugin defaults inherited by every plugin unless it opts out.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BasePluginCfg {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub out: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub paths: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub module: String,
}

/// A protoc plugin configuration, mapped to `--<name>_out`/`--<name>_opt`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Plugin {
    pub name: String,

    /// Explicit plugin binary, resolved on PATH.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,

    /// Output directory.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub out: String,

    /// Run the plugin through a shell command (wrapper plugin).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub shell: String,

    /// Run the plugin through a Docker container (wrapper plugin).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub docker: String,

    /// Do not inherit base plugin defaults.
    #[serde(default, skip_serializing_if = "is_false")]
    pub skip_base: bool,

    /// Keep the plugin configured but never run it.
    #[serde(default, skip_serializing_if = "is_false")]
    pub skip_run: bool,

    /// Option prefixes dropped before the final `_opt=` join.
    #[serde(default, skip_serializing_if = "OptList::is_empty")]
    pub exclude_opts: OptList,

    #[serde(default, skip_serializing_if = "OptList::is_empty")]
    pub opt: OptList,

    /// Alias for `opt`; both lists concatenate in declaration order.
    #[serde(default, skip_serializing_if = "OptList::is_empty")]
    pub opts: OptList,
}

impl Plugin {
    /// Combined `opt` and `opts` entries, order preserved.
    pub fn all_opts(&self) -> Vec<String> {
        let mut opts = Vec::with_capacity(self.opt.len() + self.opts.len());
        opts.extend(self.opt.iter().cloned());
        opts.extend(self.opts.iter().cloned());
        opts
    }

    /// True when the plugin is bridged through this binary.
    pub fn is_wrapper(&self) -> bool {
        !self.shell.is_empty() || !self.docker.is_empty()
    }
}

/// The project configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Persisted structural hash; compared against the vendor-dir artifact.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub checksum: String,

    /// Vendor directory receiving resolved `.proto` files.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub vendor: String,

    #[serde(rename = "base", default, skip_serializing_if = "Option::is_none")]
    pub base_plugin: Option<BasePluginCfg>,

    /// Proto source roots.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub root: Vec<String>,

    /// Extra protoc include paths.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub includes: Vec<String>,

    /// Path prefixes pruned from the walk.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub excludes: Vec<String>,

    #[serde(rename = "deps", default, skip_serializing_if = "Vec::is_empty")]
    pub depends: Vec<Dependency>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub plugins: Vec<Plugin>,

    /// Set when the parsed config differs from the last persisted state.
    /// In-memory only; the vendor-dir artifact is authoritative across runs.
    #[serde(skip)]
    pub changed: bool,
}

impl Config {
    /// Load the project config: read, substitute env vars, decode, apply
    /// defaults, validate, and compute the structural checksum.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| Error::Config(format!("cannot read {}: {err}", path.display())))?;
        let mut cfg: Config = serde_yaml::from_str(&expand_env(&raw))?;
        cfg.apply_defaults();
        cfg.validate()?;

        fs::create_dir_all(&cfg.vendor)?;

        let checksum = config_checksum(&cfg);
        if cfg.checksum != checksum {
            cfg.checksum = checksum.clone();
            cfg.changed = true;
        }
        if read_checksum_artifact(Path::new(&cfg.vendor)).as_deref() != Some(checksum.as_str()) {
            cfg.changed = true;
        }

        Ok(cfg)
    }

    /// Load a per-directory override. Defaults and validation do not apply;
    /// the override is partial by design.
    pub fn load_override(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| Error::Config(format!("cannot read {}: {err}", path.display())))?;
        Ok(serde_yaml::from_str(&expand_env(&raw))?)
    }

    /// Serialize the config back to disk.
    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_yaml::to_string(self)?;
        fs::write(path, data)?;
        Ok(())
    }

    pub fn apply_defaults(&mut self) {
        if self.vendor.is_empty() {
            self.vendor = ".proto".to_string();
        }
        if self.root.is_empty() {
            self.root = vec!["proto".to_string()];
        }
        if self.includes.is_empty() {
            self.includes = vec!["proto".to_string(), ".proto".to_string()];
        }
    }

    /// Required-field checks. Optional dependencies may omit name/url.
    pub fn validate(&self) -> Result<()> {
        for dep in &self.depends {
            if !dep.optional && (dep.name.is_empty() || dep.url.is_empty()) {
                return Err(Error::Config(format!(
                    "dependency name and url are required (name={:?}, url={:?})",
                    dep.name, dep.url
                )));
            }
        }
        for plugin in &self.plugins {
            if !plugin.shell.is_empty() && !plugin.docker.is_empty() {
                return Err(Error::Config(format!(
                    "plugin {}: shell and docker are mutually exclusive",
                    plugin.name
                )));
            }
        }
        Ok(())
    }

    /// Merge a per-directory override onto this config. `base`, `plugins`,
    /// `excludes` and `root` are replaced wholesale when present in the
    /// override; `includes` concatenate.
    pub fn merge_override(&self, override_cfg: Option<&Config>) -> Config {
        let mut merged = self.clone();
        let Some(ov) = override_cfg else {
            return merged;
        };

        if ov.base_plugin.is_some() {
            merged.base_plugin = ov.base_plugin.clone();
        }
        if !ov.root.is_empty() {
            merged.root = ov.root.clone();
        }
        merged.includes.extend(ov.includes.iter().cloned());
        if !ov.excludes.is_empty() {
            merged.excludes = ov.excludes.clone();
        }
        if !ov.plugins.is_empty() {
            merged.plugins = ov.plugins.clone();
        }

        merged
    }
}

lazy_static! {
    static ref ENV_VAR: Regex =
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)").unwrap();
}

/// Substitute `$VAR` and `${VAR}` references with environment values.
/// Unset variables expand to the empty string.
pub fn expand_env(input: &str) -> String {
    ENV_VAR
        .replace_all(input, |caps: &Captures| {
            let name = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str())
                .unwrap_or("");
            env::var(name).unwrap_or_default()
        })
        .into_owned()
}
