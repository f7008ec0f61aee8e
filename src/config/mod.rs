//! Run configuration (autoprovision.toml)
//!
//! Two layers: the TOML file, then CLI flags. A flag that is given always
//! wins over the file. Relative paths in the file are resolved against the
//! file's directory.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::platform::DistributionType;

/// Config file looked up in the working directory when none is given.
pub const DEFAULT_CONFIG_FILE: &str = "autoprovision.toml";

/// Error types for config operations
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// Where target build settings come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettingsSourceKind {
    /// `xcodebuild -showBuildSettings`
    #[default]
    Xcodebuild,
    /// The project file alone
    Project,
}

impl FromStr for SettingsSourceKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "xcodebuild" => Ok(SettingsSourceKind::Xcodebuild),
            "project" => Ok(SettingsSourceKind::Project),
            other => Err(ConfigError::ValidationError(format!(
                "Invalid settings_source '{}': must be 'xcodebuild' or 'project'",
                other
            ))),
        }
    }
}

/// Autoprovision configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProvisionConfig {
    /// `.xcodeproj` or `.xcworkspace` to sign
    pub project_path: Option<PathBuf>,

    /// Scheme whose archive action is signed
    pub scheme: Option<String>,

    /// Build configuration (defaults to the scheme's archive configuration)
    pub configuration: Option<String>,

    #[serde(default = "default_distribution_type")]
    pub distribution_type: DistributionType,

    /// Profiles expiring within this many days are replaced
    #[serde(default)]
    pub min_profile_days_valid: u32,

    /// Allow creating missing profiles through the portal
    #[serde(default = "default_true")]
    pub generate_profiles: bool,

    #[serde(default)]
    pub settings_source: SettingsSourceKind,

    /// JSON snapshot of the developer account
    pub portal_snapshot: Option<PathBuf>,

    /// Directory of `.mobileprovision` files added to the snapshot
    pub profiles_dir: Option<PathBuf>,

    /// File the output variables are appended to
    pub output_env: Option<PathBuf>,
}

fn default_distribution_type() -> DistributionType {
    DistributionType::Development
}

fn default_true() -> bool {
    true
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            project_path: None,
            scheme: None,
            configuration: None,
            distribution_type: default_distribution_type(),
            min_profile_days_valid: 0,
            generate_profiles: true,
            settings_source: SettingsSourceKind::default(),
            portal_snapshot: None,
            profiles_dir: None,
            output_env: None,
        }
    }
}

/// Values given on the command line.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub project_path: Option<PathBuf>,
    pub scheme: Option<String>,
    pub configuration: Option<String>,
    pub distribution_type: Option<DistributionType>,
    pub min_profile_days_valid: Option<u32>,
    pub generate_profiles: Option<bool>,
    pub settings_source: Option<SettingsSourceKind>,
    pub portal_snapshot: Option<PathBuf>,
    pub profiles_dir: Option<PathBuf>,
    pub output_env: Option<PathBuf>,
}

impl ProvisionConfig {
    /// Load and parse config from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let mut config = Self::from_str(&contents)?;
        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        Ok(config)
    }

    /// Parse config from a TOML string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Result<Self, ConfigError> {
        let config: ProvisionConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Load the explicit config file, or `autoprovision.toml` from the
    /// working directory when it exists.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                if default.exists() {
                    Self::from_file(default)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Validate the values that are set
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(ref path) = self.project_path {
            let supported = path
                .extension()
                .map(|e| e == "xcodeproj" || e == "xcworkspace")
                .unwrap_or(false);
            if !supported {
                return Err(ConfigError::ValidationError(format!(
                    "project_path '{}' must be an .xcodeproj or .xcworkspace",
                    path.display()
                )));
            }
        }

        if let Some(ref scheme) = self.scheme {
            if scheme.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "scheme cannot be empty".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Check that everything a run needs is set
    pub fn ensure_complete(&self) -> Result<(), ConfigError> {
        self.validate()?;
        if self.project_path.is_none() {
            return Err(ConfigError::ValidationError(
                "project_path is required".to_string(),
            ));
        }
        if self.scheme.is_none() {
            return Err(ConfigError::ValidationError("scheme is required".to_string()));
        }
        Ok(())
    }

    /// Apply CLI values on top of the file values
    pub fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if overrides.project_path.is_some() {
            self.project_path = overrides.project_path;
        }
        if overrides.scheme.is_some() {
            self.scheme = overrides.scheme;
        }
        if overrides.configuration.is_some() {
            self.configuration = overrides.configuration;
        }
        if let Some(distribution) = overrides.distribution_type {
            self.distribution_type = distribution;
        }
        if let Some(days) = overrides.min_profile_days_valid {
            self.min_profile_days_valid = days;
        }
        if let Some(generate) = overrides.generate_profiles {
            self.generate_profiles = generate;
        }
        if let Some(source) = overrides.settings_source {
            self.settings_source = source;
        }
        if overrides.portal_snapshot.is_some() {
            self.portal_snapshot = overrides.portal_snapshot;
        }
        if overrides.profiles_dir.is_some() {
            self.profiles_dir = overrides.profiles_dir;
        }
        if overrides.output_env.is_some() {
            self.output_env = overrides.output_env;
        }
    }

    fn resolve_paths(&mut self, base: &Path) {
        for path in [
            &mut self.project_path,
            &mut self.portal_snapshot,
            &mut self.profiles_dir,
            &mut self.output_env,
        ]
        .into_iter()
        .flatten()
        {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }
}
