//! Guard configuration management

use crate::monitor::EventGroup;
use crate::policy::{BlockPolicy, BlockSignature};
use crate::sysfs::{DEFAULT_SYSFS_ROOT, USB_DEVICES_DIR};
use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// System-wide configuration file
pub const SYSTEM_CONFIG_PATH: &str = "/etc/usb-iface-guard/guard.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardConfig {
    #[serde(default)]
    pub guard: GuardSettings,
    /// Interface signatures to de-authorize
    ///
    /// # Example Configuration
    /// ```toml
    /// [[block]]
    /// class = 8
    /// sub_class = 6
    /// protocol = 50
    /// description = "Mass storage, bulk-only"
    /// ```
    #[serde(default = "GuardConfig::default_block_rules")]
    pub block: Vec<BlockRule>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardSettings {
    #[serde(default = "GuardSettings::default_log_level")]
    pub log_level: String,
    /// Where sysfs is mounted (tilde-expanded)
    #[serde(default = "GuardSettings::default_sysfs_root")]
    pub sysfs_root: String,
    /// Log matches without writing to `authorized`
    #[serde(default)]
    pub dry_run: bool,
    /// Netlink group to subscribe to (udev, kernel)
    #[serde(default)]
    pub event_group: EventGroup,
}

impl Default for GuardSettings {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
            sysfs_root: Self::default_sysfs_root(),
            dry_run: false,
            event_group: EventGroup::default(),
        }
    }
}

impl GuardSettings {
    fn default_log_level() -> String {
        "info".to_string()
    }

    fn default_sysfs_root() -> String {
        DEFAULT_SYSFS_ROOT.to_string()
    }
}

/// One `[[block]]` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRule {
    pub class: i32,
    pub sub_class: i32,
    pub protocol: i32,
    /// Human-readable description
    #[serde(default)]
    pub description: Option<String>,
}

impl BlockRule {
    pub fn signature(&self) -> BlockSignature {
        BlockSignature::new(self.class, self.sub_class, self.protocol)
    }
}

impl From<BlockSignature> for BlockRule {
    fn from(sig: BlockSignature) -> Self {
        Self {
            class: sig.class,
            sub_class: sig.sub_class,
            protocol: sig.protocol,
            description: None,
        }
    }
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            guard: GuardSettings::default(),
            block: Self::default_block_rules(),
        }
    }
}

impl GuardConfig {
    fn default_block_rules() -> Vec<BlockRule> {
        vec![BlockRule {
            description: Some("Mass storage, SCSI transparent".to_string()),
            ..BlockRule::from(BlockSignature::reference())
        }]
    }

    /// Load and validate the configuration file at `path`
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Parse and validate configuration text
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: GuardConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Standard locations, in lookup order
    pub fn search_paths() -> Vec<PathBuf> {
        vec![Self::default_path(), PathBuf::from(SYSTEM_CONFIG_PATH)]
    }

    /// Load the first of `candidates` that exists
    ///
    /// `Ok(None)` when none exists. A file that exists but cannot be read,
    /// parsed or validated is an error, never a silent fallback.
    pub fn load_first(candidates: &[PathBuf]) -> Result<Option<(PathBuf, Self)>> {
        let Some(path) = candidates.iter().find(|p| p.exists()) else {
            return Ok(None);
        };
        let config = Self::load(path)?;
        Ok(Some((path.clone(), config)))
    }

    /// Load `explicit`, else the first standard location, else defaults
    ///
    /// Also returns the file the configuration came from.
    pub fn resolve(explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>)> {
        if let Some(path) = explicit {
            return Ok((Self::load(path)?, Some(path.to_path_buf())));
        }
        Ok(match Self::load_first(&Self::search_paths())? {
            Some((path, config)) => (config, Some(path)),
            None => (Self::default(), None),
        })
    }

    /// Apply command-line overrides and re-validate
    pub fn apply_overrides(
        &mut self,
        log_level: Option<String>,
        dry_run: bool,
        event_group: Option<EventGroup>,
    ) -> Result<()> {
        if let Some(level) = log_level {
            self.guard.log_level = level;
        }
        if dry_run {
            self.guard.dry_run = true;
        }
        if let Some(group) = event_group {
            self.guard.event_group = group;
        }
        self.validate()
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("usb-iface-guard").join("guard.toml")
        } else {
            PathBuf::from(".config/usb-iface-guard/guard.toml")
        }
    }

    /// The block policy described by the `[[block]]` tables
    pub fn policy(&self) -> BlockPolicy {
        BlockPolicy::new(self.block.iter().map(BlockRule::signature).collect())
    }

    /// sysfs mount point with `~` expanded
    pub fn sysfs_root(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.guard.sysfs_root).as_ref())
    }

    /// Directory holding USB device nodes
    pub fn devices_dir(&self) -> PathBuf {
        self.sysfs_root().join(USB_DEVICES_DIR)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.guard.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.guard.log_level,
                valid_levels.join(", ")
            ));
        }

        if self.guard.sysfs_root.trim().is_empty() {
            return Err(anyhow!("sysfs_root must not be empty"));
        }

        for rule in &self.block {
            Self::validate_rule(rule)?;
        }

        Ok(())
    }

    /// Every field of a signature is a USB descriptor byte
    fn validate_rule(rule: &BlockRule) -> Result<()> {
        for (name, value) in [
            ("class", rule.class),
            ("sub_class", rule.sub_class),
            ("protocol", rule.protocol),
        ] {
            if !(0..=255).contains(&value) {
                return Err(anyhow!(
                    "Invalid block signature {}: {} {} is outside 0-255",
                    rule.signature(),
                    name,
                    value
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = GuardConfig::default();
        assert_eq!(config.guard.log_level, "info");
        assert_eq!(config.guard.sysfs_root, "/sys");
        assert!(!config.guard.dry_run);
        assert_eq!(config.guard.event_group, EventGroup::Udev);
        assert_eq!(
            config.policy().signatures(),
            &[BlockSignature::new(8, 6, 50)]
        );
        assert_eq!(
            config.devices_dir(),
            PathBuf::from("/sys/bus/usb/devices")
        );
    }

    #[test]
    fn test_validate_rule_range() {
        assert!(GuardConfig::validate_rule(&BlockSignature::new(0, 0, 0).into()).is_ok());
        assert!(GuardConfig::validate_rule(&BlockSignature::new(255, 255, 255).into()).is_ok());
        assert!(GuardConfig::validate_rule(&BlockSignature::new(-1, 6, 50).into()).is_err());
        assert!(GuardConfig::validate_rule(&BlockSignature::new(8, 256, 50).into()).is_err());
    }

    #[test]
    fn test_config_serialization() {
        let config = GuardConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: GuardConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.guard.log_level, parsed.guard.log_level);
        assert_eq!(config.block, parsed.block);
    }

    #[test]
    fn test_validate_log_level() {
        let mut config = GuardConfig::default();
        assert!(config.validate().is_ok());

        config.guard.log_level = "invalid".to_string();
        assert!(config.validate().is_err());

        config.guard.log_level = "debug".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_override_log_level_is_validated() {
        let mut config = GuardConfig::default();
        assert!(config.apply_overrides(Some("foo".to_string()), false, None).is_err());

        let mut config = GuardConfig::default();
        config
            .apply_overrides(Some("debug".to_string()), true, Some(EventGroup::Kernel))
            .unwrap();
        assert_eq!(config.guard.log_level, "debug");
        assert!(config.guard.dry_run);
        assert_eq!(config.guard.event_group, EventGroup::Kernel);
    }

    #[test]
    fn test_no_override_keeps_file_values() {
        let mut config = GuardConfig::from_toml("[guard]\ndry_run = true\n").unwrap();
        config.apply_overrides(None, false, None).unwrap();
        assert!(config.guard.dry_run);
        assert_eq!(config.guard.event_group, EventGroup::Udev);
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = GuardConfig::from_toml("").unwrap();
        assert_eq!(config.block, GuardConfig::default().block);
        assert_eq!(config.guard.log_level, "info");
    }
}
