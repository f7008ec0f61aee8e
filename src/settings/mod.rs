//! Build settings sources
//!
//! Resolving the full build settings of a target is expensive (it means
//! running `xcodebuild`), so the project helper only talks to a
//! [`BuildSettingsSource`] and caches what it returns.

use log::debug;
use std::process::Command;
use xcode_build_settings::{contains_reference, expand, BuildSettings, ExpandError, SettingsError};

use crate::platform::Platform;
use crate::xcode::XcodeProject;

/// Maximum expansion passes for the offline source.
const MAX_EXPANSION_PASSES: usize = 8;

/// Errors raised while fetching build settings.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("failed to run xcodebuild: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("xcodebuild -showBuildSettings failed for target {target} ({configuration}): {stderr}")]
    CommandFailed {
        target: String,
        configuration: String,
        stderr: String,
    },

    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error("target not found in project: {0}")]
    UnknownTarget(String),

    #[error("build configuration ({configuration}) not defined for target: ({target})")]
    UnknownConfiguration {
        target: String,
        configuration: String,
    },
}

/// Provides the resolved build settings of a target in a configuration.
pub trait BuildSettingsSource {
    fn target_build_settings(
        &self,
        project: &XcodeProject,
        target: &str,
        configuration: &str,
    ) -> Result<BuildSettings, SourceError>;
}

impl<T: BuildSettingsSource + ?Sized> BuildSettingsSource for Box<T> {
    fn target_build_settings(
        &self,
        project: &XcodeProject,
        target: &str,
        configuration: &str,
    ) -> Result<BuildSettings, SourceError> {
        (**self).target_build_settings(project, target, configuration)
    }
}

/// Settings reported by `xcodebuild -showBuildSettings -json`.
#[derive(Debug, Clone, Default)]
pub struct XcodebuildSettings {
    /// Optional `DEVELOPER_DIR` to select a specific Xcode
    pub developer_dir: Option<String>,
}

impl BuildSettingsSource for XcodebuildSettings {
    fn target_build_settings(
        &self,
        project: &XcodeProject,
        target: &str,
        configuration: &str,
    ) -> Result<BuildSettings, SourceError> {
        let mut cmd = Command::new("xcodebuild");
        cmd.arg("-showBuildSettings")
            .arg("-json")
            .arg("-project")
            .arg(&project.path)
            .args(["-target", target, "-configuration", configuration]);
        if let Some(ref dir) = self.developer_dir {
            cmd.env("DEVELOPER_DIR", dir);
        }

        debug!(
            "$ xcodebuild -showBuildSettings -json -project {} -target {} -configuration {}",
            project.path.display(),
            target,
            configuration
        );

        let output = cmd.output()?;
        if !output.status.success() {
            return Err(SourceError::CommandFailed {
                target: target.to_string(),
                configuration: configuration.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(BuildSettings::from_xcodebuild_json(&output.stdout, target)?)
    }
}

/// Settings derived from the project file alone, without running Xcode.
///
/// Layers project-level settings under target-level settings, adds the
/// handful of derived settings signing needs (`TARGET_NAME`, `SRCROOT`,
/// `PLATFORM_DISPLAY_NAME`, ...) and expands single-reference values.
/// `xcconfig` files and SDK defaults are not evaluated.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProjectFileSettings;

impl BuildSettingsSource for ProjectFileSettings {
    fn target_build_settings(
        &self,
        project: &XcodeProject,
        target: &str,
        configuration: &str,
    ) -> Result<BuildSettings, SourceError> {
        let target_def = project
            .target(target)
            .ok_or_else(|| SourceError::UnknownTarget(target.to_string()))?;
        let target_config = target_def.build_configuration(configuration).ok_or_else(|| {
            SourceError::UnknownConfiguration {
                target: target.to_string(),
                configuration: configuration.to_string(),
            }
        })?;

        let project_dir = project.project_dir().to_string_lossy().to_string();
        let mut settings = BuildSettings::new();
        settings.insert("TARGET_NAME", target);
        settings.insert("PRODUCT_NAME", target);
        settings.insert("PROJECT_NAME", project.name());
        settings.insert("CONFIGURATION", configuration);
        settings.insert("SRCROOT", project_dir.clone());
        settings.insert("PROJECT_DIR", project_dir);

        if let Some(project_config) = project.build_configuration(configuration) {
            settings.merge(&project_config.build_settings);
        }
        settings.merge(&target_config.build_settings);

        if !settings.contains_key("PLATFORM_DISPLAY_NAME") {
            let sdk_platform = settings
                .non_empty_string("SDKROOT")?
                .and_then(Platform::from_sdk_root);
            if let Some(platform) = sdk_platform {
                settings.insert("PLATFORM_DISPLAY_NAME", platform.display_name());
            }
        }

        Ok(expand_settings(settings))
    }
}

/// Expand string values against the settings themselves.
///
/// Each pass expands the first reference of a value, so a value such as
/// `$(TARGET_NAME)/$(TARGET_NAME).entitlements` settles over several passes.
/// References that cannot be expanded (`$(inherited)`, unknown keys) stop
/// expansion of that value and are kept as written.
fn expand_settings(mut settings: BuildSettings) -> BuildSettings {
    for _ in 0..MAX_EXPANSION_PASSES {
        let mut updates = Vec::new();
        for (key, value) in settings.iter() {
            let Some(raw) = value.as_str() else { continue };
            if !contains_reference(raw) {
                continue;
            }
            if let Some(expanded) = expand_first_reference(raw, &settings) {
                if expanded != raw {
                    updates.push((key.clone(), expanded));
                }
            }
        }

        if updates.is_empty() {
            break;
        }
        for (key, value) in updates {
            settings.insert(key, value);
        }
    }
    settings
}

/// Expand the first reference of `raw`, leaving later ones in place.
fn expand_first_reference(raw: &str, settings: &BuildSettings) -> Option<String> {
    match expand(raw, settings) {
        Ok(expanded) => Some(expanded),
        Err(ExpandError::MultipleReferences(_)) => {
            let end = first_reference_end(raw)?;
            let head = expand(&raw[..end], settings).ok()?;
            Some(format!("{}{}", head, &raw[end..]))
        }
        Err(_) => None,
    }
}

/// Byte offset just past the closer of the first `$(...)` or `${...}`.
fn first_reference_end(value: &str) -> Option<usize> {
    let start = [value.find("$("), value.find("${")]
        .into_iter()
        .flatten()
        .min()?;
    let close = if value[start + 1..].starts_with('(') { ')' } else { '}' };
    value[start..].find(close).map(|offset| start + offset + 1)
}
