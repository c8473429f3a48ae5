//! Protoc invocation assembly.
//!
//! One directory compiles as one `protoc` run: a deduplicated `-I` list,
//! then per-plugin `--plugin`, `--<name>_out` and `--<name>_opt` flags,
//! then `<dir>/*.proto`. Retag flags are split off into a second command
//! that only runs after the main one succeeds, since retag rewrites
//! generated output in place.

use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};

use crate::config::{Config, Plugin};
use crate::error::{Error, Result};
use crate::shell;

/// Plugin name whose flags are deferred to a follow-up protoc run.
pub const RETAG_PLUGIN_NAME: &str = "retag";

/// Builds protoc command lines from an effective config.
pub struct ProtocBuilder {
    includes: Vec<String>,
    vendor: String,
    pwd: PathBuf,
    protoc: PathBuf,
}

/// The command line(s) for one proto directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocCommand {
    pub main: String,
    pub retag: Option<String>,
    pub proto_dir: PathBuf,
}

impl ProtocBuilder {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self::with_protoc(config, find_protoc()?))
    }

    /// Construct with an explicit protoc path, bypassing PATH discovery.
    pub fn with_protoc(config: &Config, protoc: PathBuf) -> Self {
        Self {
            includes: config.includes.clone(),
            vendor: config.vendor.clone(),
            pwd: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            protoc,
        }
    }

    /// Assemble the command line(s) for one directory under `cfg`, the
    /// directory's effective config.
    pub fn build_command(&self, cfg: &Config, proto_dir: &Path) -> Result<ProtocCommand> {
        let mut includes: Vec<String> = Vec::new();
        includes.extend(self.includes.iter().cloned());
        includes.extend(cfg.includes.iter().cloned());
        includes.push(self.vendor.clone());
        includes.push(self.pwd.to_string_lossy().into_owned());
        let includes = dedup_preserving_order(includes);

        let mut base = self.protoc.to_string_lossy().into_owned();
        for include in &includes {
            base.push_str(&format!(" -I {include}"));
        }

        let mut main_args = String::new();
        let mut retag_args = String::new();
        for plugin in &cfg.plugins {
            if plugin.skip_run {
                debug!("plugin {} marked skip_run", plugin.name);
                continue;
            }
            let args = self.plugin_args(cfg, plugin, proto_dir)?;
            if plugin.name == RETAG_PLUGIN_NAME {
                retag_args.push_str(&args);
            } else {
                main_args.push_str(&args);
            }
        }

        let files = format!(" {}/*.proto", proto_dir.display());
        let main = format!("{base}{main_args}{files}");
        let retag = (!retag_args.is_empty()).then(|| format!("{base}{retag_args}{files}"));

        Ok(ProtocCommand {
            main,
            retag,
            proto_dir: proto_dir.to_path_buf(),
        })
    }

    fn plugin_args(&self, cfg: &Config, plugin: &Plugin, proto_dir: &Path) -> Result<String> {
        let mut args = String::new();
        let name = &plugin.name;

        let mut opts = plugin.all_opts();
        inject_base_opts(cfg, plugin, &mut opts);

        if plugin.is_wrapper() {
            // Wrapper plugins route protoc through this binary; the wrapper
            // token tells the bridge which plugin config to apply.
            opts.push(format!("__wrapper={name}"));
            let current = env::current_exe()?;
            args.push_str(&format!(
                " --plugin=protoc-gen-{name}={}",
                current.display()
            ));
        } else if !plugin.path.is_empty() {
            let resolved = which::which(&plugin.path).map_err(|err| {
                Error::Config(format!("plugin binary {} not found: {err}", plugin.path))
            })?;
            args.push_str(&format!(
                " --plugin=protoc-gen-{name}={}",
                resolved.display()
            ));
        }

        let out = self.resolve_output_dir(cfg, plugin, proto_dir)?;
        args.push_str(&format!(" --{name}_out={out}"));

        let opts = filter_excluded_opts(opts, &plugin.exclude_opts);
        if !opts.is_empty() {
            args.push_str(&format!(" --{name}_opt={}", opts.join(",")));
        }

        Ok(args)
    }

    /// Output directory priority: plugin `out`, then base `out`, then the
    /// current directory. The doc plugin appends the source directory so
    /// generated docs mirror the proto tree.
    fn resolve_output_dir(&self, cfg: &Config, plugin: &Plugin, proto_dir: &Path) -> Result<String> {
        let base_out = cfg
            .base_plugin
            .as_ref()
            .map(|b| b.out.as_str())
            .unwrap_or("");
        let out = if !plugin.out.is_empty() {
            plugin.out.clone()
        } else if !base_out.is_empty() {
            base_out.to_string()
        } else {
            ".".to_string()
        };

        let out = if plugin.name == "doc" {
            Path::new(&out).join(proto_dir).to_string_lossy().into_owned()
        } else {
            out
        };

        fs::create_dir_all(&out)?;
        Ok(out)
    }
}

/// Append base plugin defaults the plugin has not set itself. `skip_base`
/// opts the plugin out entirely.
fn inject_base_opts(cfg: &Config, plugin: &Plugin, opts: &mut Vec<String>) {
    if plugin.skip_base {
        return;
    }
    let Some(base) = &cfg.base_plugin else {
        return;
    };

    if !base.paths.is_empty() && !opts.iter().any(|o| o.starts_with("paths=")) {
        opts.push(format!("paths={}", base.paths));
    }
    if !base.module.is_empty() && !opts.iter().any(|o| o.starts_with("module=")) {
        opts.push(format!("module={}", base.module));
    }
}

fn filter_excluded_opts(opts: Vec<String>, excluded: &[String]) -> Vec<String> {
    opts.into_iter()
        .filter(|opt| !excluded.iter().any(|e| opt.starts_with(e.as_str())))
        .collect()
}

fn dedup_preserving_order(items: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| !item.is_empty() && seen.insert(item.clone()))
        .collect()
}

fn find_protoc() -> Result<PathBuf> {
    if let Ok(path) = env::var("PROTOC") {
        if !path.is_empty() {
            return Ok(PathBuf::from(path));
        }
    }
    which::which("protoc")
        .map_err(|err| Error::Config(format!("protoc not found on PATH: {err}")))
}

impl ProtocCommand {
    /// Run the main command, then the retag command iff the main succeeded.
    pub fn execute(&self) -> Result<()> {
        info!("compiling {}", self.proto_dir.display());
        run_checked(&self.main)?;
        if let Some(retag) = &self.retag {
            debug!("running retag pass for {}", self.proto_dir.display());
            run_checked(retag)?;
        }
        Ok(())
    }
}

fn run_checked(command: &str) -> Result<()> {
    debug!("exec: {command}");
    let status = shell::run(command)?;
    if status != 0 {
        return Err(Error::Build {
            command: command.to_string(),
            status,
        });
    }
    Ok(())
}
