use serde::{Deserialize, Serialize};
use thiserror::Error;

use jrnl_storage::StorageError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid value for env var {0}")]
    InvalidEnv(&'static str),
}

/// Filesystem-level options of a mount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MountConfig {
    /// Format the volume when it holds no usable FAT filesystem.
    pub format_if_mount_failed: bool,
    /// Maximum number of files open at once on the volume.
    pub max_files: u32,
    /// Requested cluster size in bytes for formatting; `0` means one sector.
    pub allocation_unit_size: u32,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            format_if_mount_failed: false,
            max_files: 5,
            allocation_unit_size: 0,
        }
    }
}

impl MountConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`MountConfig::from_env`], reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            format_if_mount_failed: parse_var(
                &lookup,
                "JRNL_FAT_FORMAT_IF_MOUNT_FAILED",
                defaults.format_if_mount_failed,
            )?,
            max_files: parse_var(&lookup, "JRNL_FAT_MAX_FILES", defaults.max_files)?,
            allocation_unit_size: parse_var(
                &lookup,
                "JRNL_FAT_ALLOCATION_UNIT_SIZE",
                defaults.allocation_unit_size,
            )?,
        })
    }

    pub fn validate(&self) -> Result<(), StorageError> {
        if self.max_files == 0 {
            return Err(StorageError::InvalidArgument("max_files must be positive"));
        }
        Ok(())
    }
}

/// Options handed to the journal when it is installed on a volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JournalConfig {
    /// Discard any journal store already present on the volume.
    pub overwrite_existing: bool,
    /// Replay pending journal transactions right after mounting.
    pub replay_journal_after_mount: bool,
    /// Format the volume unconditionally, skipping the first mount attempt.
    pub force_fs_format: bool,
    /// Size of the journal store in sectors.
    pub store_size_sectors: u32,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            overwrite_existing: false,
            replay_journal_after_mount: true,
            force_fs_format: false,
            store_size_sectors: 32,
        }
    }
}

impl JournalConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            overwrite_existing: parse_var(
                &lookup,
                "JRNL_FAT_OVERWRITE_EXISTING",
                defaults.overwrite_existing,
            )?,
            replay_journal_after_mount: parse_var(
                &lookup,
                "JRNL_FAT_REPLAY_AFTER_MOUNT",
                defaults.replay_journal_after_mount,
            )?,
            force_fs_format: parse_var(&lookup, "JRNL_FAT_FORCE_FORMAT", defaults.force_fs_format)?,
            store_size_sectors: parse_var(
                &lookup,
                "JRNL_FAT_STORE_SIZE_SECTORS",
                defaults.store_size_sectors,
            )?,
        })
    }

    pub fn validate(&self) -> Result<(), StorageError> {
        if self.store_size_sectors == 0 {
            return Err(StorageError::InvalidArgument("journal store size must be positive"));
        }
        Ok(())
    }
}

trait EnvValue: Sized {
    fn parse_env(raw: &str) -> Option<Self>;
}

impl EnvValue for bool {
    fn parse_env(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => None,
        }
    }
}

impl EnvValue for u32 {
    fn parse_env(raw: &str) -> Option<Self> {
        raw.parse().ok()
    }
}

fn parse_var<T: EnvValue>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        None => Ok(default),
        Some(raw) => T::parse_env(raw.trim()).ok_or(ConfigError::InvalidEnv(key)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn unset_env_yields_defaults() {
        assert_eq!(MountConfig::from_lookup(env(&[])).unwrap(), MountConfig::default());
        assert_eq!(
            JournalConfig::from_lookup(env(&[])).unwrap(),
            JournalConfig::default()
        );
    }

    #[test]
    fn env_overrides_are_parsed() {
        let mount = MountConfig::from_lookup(env(&[
            ("JRNL_FAT_FORMAT_IF_MOUNT_FAILED", "true"),
            ("JRNL_FAT_MAX_FILES", " 12 "),
            ("JRNL_FAT_ALLOCATION_UNIT_SIZE", "16384"),
        ]))
        .unwrap();
        assert!(mount.format_if_mount_failed);
        assert_eq!(mount.max_files, 12);
        assert_eq!(mount.allocation_unit_size, 16384);

        let journal = JournalConfig::from_lookup(env(&[
            ("JRNL_FAT_FORCE_FORMAT", "1"),
            ("JRNL_FAT_REPLAY_AFTER_MOUNT", "off"),
        ]))
        .unwrap();
        assert!(journal.force_fs_format);
        assert!(!journal.replay_journal_after_mount);
        assert_eq!(journal.store_size_sectors, 32);
    }

    #[test]
    fn malformed_env_names_the_variable() {
        let err = MountConfig::from_lookup(env(&[("JRNL_FAT_MAX_FILES", "many")])).unwrap_err();
        assert_eq!(err, ConfigError::InvalidEnv("JRNL_FAT_MAX_FILES"));

        let err =
            JournalConfig::from_lookup(env(&[("JRNL_FAT_FORCE_FORMAT", "maybe")])).unwrap_err();
        assert_eq!(err, ConfigError::InvalidEnv("JRNL_FAT_FORCE_FORMAT"));
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let mount: MountConfig =
            serde_json::from_str(r#"{"format_if_mount_failed": true}"#).unwrap();
        assert!(mount.format_if_mount_failed);
        assert_eq!(mount.max_files, 5);

        let journal: JournalConfig = serde_json::from_str(r#"{"store_size_sectors": 64}"#).unwrap();
        assert_eq!(journal.store_size_sectors, 64);
        assert!(journal.replay_journal_after_mount);
    }

    #[test]
    fn validation_rejects_zero_sizes() {
        let mount = MountConfig {
            max_files: 0,
            ..MountConfig::default()
        };
        assert!(matches!(mount.validate(), Err(StorageError::InvalidArgument(_))));

        let journal = JournalConfig {
            store_size_sectors: 0,
            ..JournalConfig::default()
        };
        assert!(matches!(journal.validate(), Err(StorageError::InvalidArgument(_))));
    }
}
