//! Structural config hashing and the vendor checksum artifact.
//!
//! The checksum is a hex SHA-256 over the canonical JSON form of the config
//! with the volatile `checksum` field removed (`changed` is never
//! serialized). The artifact is a plain-text `checksum` file written inside
//! the vendor directory after a successful vendor pass; later runs compare
//! against it to skip work when nothing changed.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use super::Config;

/// Structural hash of the config, excluding `checksum` and `changed`.
pub fn config_checksum(cfg: &Config) -> String {
    let mut value = serde_json::to_value(cfg).unwrap_or(serde_json::Value::Null);
    if let Some(obj) = value.as_object_mut() {
        obj.remove("checksum");
    }
    // serde_json maps are ordered, so the string form is canonical.
    let digest = Sha256::digest(value.to_string().as_bytes());
    format!("{digest:x}")
}

fn artifact_path(vendor: &Path) -> PathBuf {
    vendor.join("checksum")
}

/// Read the persisted checksum from the vendor directory, if present.
pub fn read_checksum_artifact(vendor: &Path) -> Option<String> {
    fs::read_to_string(artifact_path(vendor))
        .ok()
        .map(|s| s.trim().to_string())
}

/// Persist the checksum artifact inside the vendor directory.
pub fn write_checksum_artifact(vendor: &Path, checksum: &str) -> io::Result<()> {
    fs::create_dir_all(vendor)?;
    fs::write(artifact_path(vendor), checksum)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Dependency;

    fn sample_config() -> Config {
        Config {
            vendor: ".proto".into(),
            root: vec!["proto".into()],
            depends: vec![Dependency {
                name: "googleapis".into(),
                url: "github.com/googleapis/googleapis".into(),
                ..Dependency::default()
            }],
            ..Config::default()
        }
    }

    #[test]
    fn checksum_survives_serialization_round_trip() {
        let cfg = sample_config();
        let before = config_checksum(&cfg);

        let yaml = serde_yaml::to_string(&cfg).unwrap();
        let reloaded: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(config_checksum(&reloaded), before);
    }

    #[test]
    fn checksum_field_does_not_affect_hash() {
        let mut cfg = sample_config();
        let before = config_checksum(&cfg);
        cfg.checksum = "deadbeef".into();
        assert_eq!(config_checksum(&cfg), before);
    }

    #[test]
    fn changed_flag_does_not_affect_hash() {
        let mut cfg = sample_config();
        let before = config_checksum(&cfg);
        cfg.changed = true;
        assert_eq!(config_checksum(&cfg), before);
    }

    #[test]
    fn structural_changes_affect_hash() {
        let mut cfg = sample_config();
        let before = config_checksum(&cfg);
        cfg.depends[0].version = Some("v1.2.3".into());
        assert_ne!(config_checksum(&cfg), before);
    }

    #[test]
    fn artifact_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let vendor = dir.path().join(".proto");

        assert_eq!(read_checksum_artifact(&vendor), None);
        write_checksum_artifact(&vendor, "abc123").unwrap();
        assert_eq!(read_checksum_artifact(&vendor).as_deref(), Some("abc123"));
    }
}
