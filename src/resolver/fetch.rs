//! Network fetch backends for getter-style URLs.
//!
//! Downloads land in a `<dest>.partial` staging directory and are renamed
//! into the cache only on success, so an interrupted fetch never leaves a
//! half-populated cache entry behind. The actual transfer is delegated to
//! the standard tools: `git`, `curl` (+ `tar`/`unzip`), `aws` and `gsutil`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::debug;

use crate::config::Source;
use crate::shell;

/// Fetch `getter_url` into `dest` through the staging directory.
pub(super) fn download(getter_url: &str, source: Source, dest: &Path) -> io::Result<()> {
    let staging = staging_path(dest)?;
    if staging.exists() {
        fs::remove_dir_all(&staging)?;
    }
    fs::create_dir_all(&staging)?;

    let result = match source {
        Source::Git => fetch_git(getter_url, &staging),
        Source::Http => fetch_http(getter_url, &staging),
        Source::S3 => fetch_s3(getter_url, &staging),
        Source::Gcs => fetch_gcs(getter_url, &staging),
        other => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("source {} has no fetch backend", other.as_str()),
        )),
    };

    match result {
        Ok(()) => {
            fs::rename(&staging, dest)?;
            Ok(())
        }
        Err(err) => {
            let _ = fs::remove_dir_all(&staging);
            Err(err)
        }
    }
}

fn staging_path(dest: &Path) -> io::Result<PathBuf> {
    let name = dest
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "invalid cache path"))?;
    Ok(dest.with_file_name(format!("{name}.partial")))
}

/// Shallow clone, optionally pinned to a ref carried as a `ref=` query
/// parameter on the getter URL.
fn fetch_git(getter_url: &str, staging: &Path) -> io::Result<()> {
    let (repo, reference) = split_git_url(getter_url);
    let mut cmd = String::from("git clone --depth 1");
    if let Some(r) = &reference {
        cmd.push_str(&format!(" --branch '{r}'"));
    }
    cmd.push_str(&format!(" '{repo}' '{}'", staging.display()));
    run_fetch(&cmd)
}

/// Strip the `git::` scheme and pull the `ref=` parameter out of the query
/// string. The remaining query parts stay on the clone URL.
fn split_git_url(getter_url: &str) -> (String, Option<String>) {
    let url = getter_url.strip_prefix("git::").unwrap_or(getter_url);

    let Some((base, query)) = url.split_once('?') else {
        return (url.to_string(), None);
    };

    let mut reference = None;
    let mut kept = Vec::new();
    for part in query.split('&') {
        match part.strip_prefix("ref=") {
            Some(r) => reference = Some(r.to_string()),
            None => kept.push(part),
        }
    }

    let repo = if kept.is_empty() {
        base.to_string()
    } else {
        format!("{base}?{}", kept.join("&"))
    };
    (repo, reference)
}

/// Download with curl, then unpack recognized archive formats in place.
fn fetch_http(getter_url: &str, staging: &Path) -> io::Result<()> {
    let filename = http_filename(getter_url);
    let target = staging.join(&filename);
    run_fetch(&format!(
        "curl -fsSL -o '{}' '{getter_url}'",
        target.display()
    ))?;

    let unpack = if filename.ends_with(".tar.gz")
        || filename.ends_with(".tgz")
        || filename.ends_with(".tar")
    {
        Some(format!(
            "tar -xf '{}' -C '{}'",
            target.display(),
            staging.display()
        ))
    } else if filename.ends_with(".zip") {
        Some(format!(
            "unzip -q '{}' -d '{}'",
            target.display(),
            staging.display()
        ))
    } else {
        None
    };

    if let Some(cmd) = unpack {
        debug!("unpacking {filename}");
        run_fetch(&cmd)?;
        fs::remove_file(&target)?;
    }
    Ok(())
}

fn http_filename(getter_url: &str) -> String {
    getter_url
        .split('?')
        .next()
        .unwrap_or(getter_url)
        .rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
        .unwrap_or("download")
        .to_string()
}

fn fetch_s3(getter_url: &str, staging: &Path) -> io::Result<()> {
    let url = getter_url.strip_prefix("s3::").unwrap_or(getter_url);
    run_fetch(&format!(
        "aws s3 cp --recursive '{url}' '{}'",
        staging.display()
    ))
}

fn fetch_gcs(getter_url: &str, staging: &Path) -> io::Result<()> {
    let stripped = getter_url.strip_prefix("gcs::").unwrap_or(getter_url);
    let url = match stripped.strip_prefix("gcs://") {
        Some(rest) => format!("gs://{rest}"),
        None => stripped.to_string(),
    };
    run_fetch(&format!("gsutil -m cp -r '{url}' '{}'", staging.display()))
}

fn run_fetch(command: &str) -> io::Result<()> {
    let status = shell::run(command)?;
    if status != 0 {
        return Err(io::Error::new(
            io::ErrorKind::Other,
            format!("fetch command exited with status {status}"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staging_path_appends_partial_suffix() {
        let dest = PathBuf::from("/cache/git/abc123");
        assert_eq!(
            staging_path(&dest).unwrap(),
            PathBuf::from("/cache/git/abc123.partial")
        );
    }

    #[test]
    fn split_git_url_extracts_ref() {
        let (repo, reference) =
            split_git_url("git::https://github.com/a/b.git?ref=v1.2.0");
        assert_eq!(repo, "https://github.com/a/b.git");
        assert_eq!(reference.as_deref(), Some("v1.2.0"));
    }

    #[test]
    fn split_git_url_without_query() {
        let (repo, reference) = split_git_url("git::git@github.com:a/b.git");
        assert_eq!(repo, "git@github.com:a/b.git");
        assert_eq!(reference, None);
    }

    #[test]
    fn split_git_url_keeps_other_query_params() {
        let (repo, reference) =
            split_git_url("git::https://host/a/b.git?depth=1&ref=main");
        assert_eq!(repo, "https://host/a/b.git?depth=1");
        assert_eq!(reference.as_deref(), Some("main"));
    }

    #[test]
    fn http_filename_strips_query_and_path() {
        assert_eq!(http_filename("https://x/y/protos.tar.gz?sig=abc"), "protos.tar.gz");
        assert_eq!(http_filename("https://x/y/archive.zip"), "archive.zip");
        assert_eq!(http_filename("https://x/y/"), "download");
    }
}
