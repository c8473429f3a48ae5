use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{CommandFactory, Parser, Subcommand};
use log::info;
use walkdir::WalkDir;

use protoforge::config::{
    config_checksum, read_checksum_artifact, write_checksum_artifact, Source,
};
use protoforge::protoc::ProtocBuilder;
use protoforge::resolver::{detect_source, Manager};
use protoforge::vendor::VendorService;
use protoforge::walker::ProtoWalker;
use protoforge::{bridge, Config, Error, Result};

#[derive(Parser)]
#[command(
    name = "protoforge",
    about = "Protobuf dependency vendoring and protoc build orchestration",
    version
)]
struct Cli {
    /// Configuration file.
    #[arg(short, long, global = true, default_value = "protobuf.yaml")]
    conf: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile proto files with protoc, directory by directory.
    Gen,
    /// Resolve dependencies and sync their protos into the vendor directory.
    Vendor {
        /// Re-vendor even when the config checksum is unchanged.
        #[arg(long)]
        force: bool,
        /// Clear the dependency cache and re-fetch everything.
        #[arg(long)]
        update: bool,
    },
    /// Show dependency resolution status without fetching.
    Deps,
    /// Remove the dependency cache.
    Clean {
        /// Report what would be removed without deleting.
        #[arg(long)]
        dry_run: bool,
    },
}

fn main() -> ExitCode {
    env_logger::init();

    let result = if bridge::is_plugin_mode() {
        run_plugin_mode()
    } else {
        run_cli()
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err}");
            ExitCode::from(err.exit_code() as u8)
        }
    }
}

/// Invoked by protoc as `protoc-gen-<name>`: the request arrives on stdin.
/// An empty stdin with no args means a human ran the binary bare; show help.
fn run_plugin_mode() -> Result<()> {
    let mut input = Vec::new();
    std::io::stdin().read_to_end(&mut input)?;

    if input.is_empty() {
        Cli::command()
            .print_help()
            .map_err(|err| Error::Config(err.to_string()))?;
        return Ok(());
    }

    let config = Config::load(Path::new("protobuf.yaml"))?;
    bridge::run(&config, &input)
}

fn run_cli() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Gen => cmd_gen(&cli.conf),
        Commands::Vendor { force, update } => cmd_vendor(&cli.conf, force, update),
        Commands::Deps => cmd_deps(&cli.conf),
        Commands::Clean { dry_run } => cmd_clean(dry_run),
    }
}

fn cmd_gen(conf: &Path) -> Result<()> {
    let config = Config::load(conf)?;
    let walker = ProtoWalker::new(&config.root, &config.excludes);
    let configs = walker.collect_plugin_configs(&config)?;
    let builder = ProtocBuilder::new(&config)?;

    let mut failed = Vec::new();
    for (dir, effective) in &configs {
        if !ProtoWalker::has_proto_files(dir) {
            continue;
        }
        let result = builder
            .build_command(effective, dir)
            .and_then(|cmd| cmd.execute());
        if let Err(err) = result {
            eprintln!("{err}");
            failed.push(dir.display().to_string());
        }
    }

    if !failed.is_empty() {
        return Err(Error::FailedDirs(failed));
    }
    Ok(())
}

fn cmd_vendor(conf: &Path, force: bool, update: bool) -> Result<()> {
    let mut config = Config::load(conf)?;
    let service = VendorService::new(Manager::new(None, None));

    let result = service.resolve_dependencies(&mut config, update)?;
    if !result.failed.is_empty() {
        return Err(Error::FailedDeps(result.failed));
    }
    if result.resolved_paths.is_empty() {
        println!("no dependencies configured");
        return Ok(());
    }

    let vendor = PathBuf::from(&config.vendor);
    let checksum = config_checksum(&config);
    let stale = force
        || update
        || config.changed
        || result.changed
        || read_checksum_artifact(&vendor).as_deref() != Some(checksum.as_str());
    if !stale {
        println!("vendor directory is up to date");
        return Ok(());
    }

    let copied = service.copy_to_vendor(&vendor, &result.resolved_paths)?;
    info!("copied {copied} proto files into {}", vendor.display());

    // Resolution may have pinned new versions; persist them and the matching
    // checksum so the next run can skip the copy.
    config.checksum = config_checksum(&config);
    config.save(conf)?;
    write_checksum_artifact(&vendor, &config.checksum)?;

    println!(
        "vendored {} dependencies ({copied} proto files)",
        result.resolved_paths.len()
    );
    Ok(())
}

fn cmd_deps(conf: &Path) -> Result<()> {
    let config = Config::load(conf)?;
    if config.depends.is_empty() {
        println!("no dependencies configured");
        return Ok(());
    }

    let manager = Manager::new(None, None);
    println!("{:<24} {:<20} {:<10} status", "name", "source", "version");
    for dep in &config.depends {
        let source = if dep.source == Source::Auto {
            detect_source(&dep.url)
        } else {
            dep.source
        };
        let status = match manager.cached_path(dep) {
            Some(path) => format!("cached ({})", path.display()),
            None if dep.optional => "not cached (optional)".to_string(),
            None => "not cached".to_string(),
        };
        println!(
            "{:<24} {:<20} {:<10} {status}",
            dep.name,
            source.display_name(),
            dep.version.as_deref().unwrap_or("-"),
        );
    }
    Ok(())
}

fn cmd_clean(dry_run: bool) -> Result<()> {
    let manager = Manager::new(None, None);
    let cache = manager.cache_dir();

    let (files, bytes) = cache_stats(cache);
    if files == 0 {
        println!("dependency cache is empty");
        return Ok(());
    }

    if dry_run {
        println!(
            "would remove {} ({files} files, {})",
            cache.display(),
            format_bytes(bytes)
        );
        return Ok(());
    }

    manager.clean_cache()?;
    println!(
        "removed {} ({files} files, {})",
        cache.display(),
        format_bytes(bytes)
    );
    Ok(())
}

fn cache_stats(cache: &Path) -> (u64, u64) {
    let mut files = 0;
    let mut bytes = 0;
    for entry in WalkDir::new(cache).into_iter().filter_map(|e| e.ok()) {
        if entry.file_type().is_file() {
            files += 1;
            bytes += entry.metadata().map(|m| m.len()).unwrap_or(0);
        }
    }
    (files, bytes)
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_bytes_scales_units() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KiB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MiB");
    }

    #[test]
    fn cli_parses_subcommands() {
        let cli = Cli::try_parse_from(["protoforge", "vendor", "--update"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Vendor {
                update: true,
                force: false
            }
        ));

        let cli = Cli::try_parse_from(["protoforge", "-c", "alt.yaml", "gen"]).unwrap();
        assert_eq!(cli.conf, PathBuf::from("alt.yaml"));
    }
}
