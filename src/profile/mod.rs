//! Provisioning profiles
//!
//! A `.mobileprovision` (or `.provisionprofile`) file is a CMS `SignedData`
//! whose encapsulated content is a property list. The signature is not
//! verified here; only the signed content is read.

use chrono::{DateTime, Utc};
use cryptographic_message_syntax::{CmsError, SignedData};
use log::{debug, warn};
use sha2::{Digest, Sha256};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use walkdir::WalkDir;

use crate::entitlements::Entitlements;
use crate::platform::{DistributionType, Platform, PlatformError};

/// Profile name prefixes Xcode uses for the profiles it manages itself.
const XCODE_MANAGED_PREFIXES: &[&str] = &[
    "XC ",
    "iOS Team Provisioning Profile",
    "Mac Team Provisioning Profile",
    "tvOS Team Provisioning Profile",
];

/// Errors raised while reading provisioning profiles.
#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    #[error("failed to read profile {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid profile envelope: {0}")]
    Cms(#[from] CmsError),

    #[error("profile envelope has no signed content")]
    NoContent,

    #[error("invalid profile property list: {0}")]
    Plist(#[from] plist::Error),

    #[error("profile is missing {0}")]
    MissingField(&'static str),

    #[error(transparent)]
    Platform(#[from] PlatformError),
}

/// SHA-256 fingerprint (lowercase hex) of a DER certificate.
pub fn certificate_fingerprint(der: &[u8]) -> String {
    hex::encode(Sha256::digest(der))
}

/// A provisioning profile as far as signing decisions are concerned.
#[derive(Debug, Clone, PartialEq)]
pub struct ProvisioningProfile {
    pub uuid: String,
    pub name: String,
    pub platform: Platform,
    pub distribution_type: DistributionType,
    pub team_id: String,
    /// Bundle id without the team prefix; may be a wildcard such as `*`
    pub bundle_id: String,
    pub entitlements: Entitlements,
    /// SHA-256 fingerprints of the embedded developer certificates
    pub certificate_fingerprints: Vec<String>,
    /// UDIDs of provisioned devices
    pub devices: Vec<String>,
    pub expiration_date: DateTime<Utc>,
    pub xcode_managed: bool,
}

impl ProvisioningProfile {
    /// Read a profile file.
    pub fn open(path: &Path) -> Result<Self, ProfileError> {
        let data = std::fs::read(path).map_err(|source| ProfileError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_mobileprovision(&data)
    }

    /// Parse the contents of a `.mobileprovision` file.
    pub fn from_mobileprovision(data: &[u8]) -> Result<Self, ProfileError> {
        let signed_data = SignedData::parse_ber(data)?;
        let content = signed_data
            .signed_content()
            .ok_or(ProfileError::NoContent)?;
        let value = plist::Value::from_reader(Cursor::new(content))?;
        Self::from_plist(&value)
    }

    /// Build a profile from its decoded property list.
    pub fn from_plist(value: &plist::Value) -> Result<Self, ProfileError> {
        let dict = value
            .as_dictionary()
            .ok_or(ProfileError::MissingField("root dictionary"))?;

        let string = |key: &'static str| {
            dict.get(key)
                .and_then(|v| v.as_string())
                .map(str::to_string)
                .ok_or(ProfileError::MissingField(key))
        };
        let first_string = |key: &'static str| {
            dict.get(key)
                .and_then(|v| v.as_array())
                .and_then(|items| items.first())
                .and_then(|v| v.as_string())
                .map(str::to_string)
                .ok_or(ProfileError::MissingField(key))
        };

        let uuid = string("UUID")?;
        let name = string("Name")?;
        let team_id = first_string("TeamIdentifier")?;
        let platform_name = first_string("Platform")?;
        let platform = Platform::from_profile_platform(&platform_name)
            .ok_or(PlatformError::UnsupportedPlatform(platform_name))?;

        let entitlements: Entitlements = dict
            .get("Entitlements")
            .and_then(|v| v.as_dictionary())
            .cloned()
            .ok_or(ProfileError::MissingField("Entitlements"))?
            .into();

        let app_id = entitlements
            .get("application-identifier")
            .or_else(|| entitlements.get("com.apple.application-identifier"))
            .and_then(|v| v.as_string())
            .ok_or(ProfileError::MissingField("application-identifier"))?;
        let bundle_id = match app_id.split_once('.') {
            Some((_prefix, id)) => id.to_string(),
            None => app_id.to_string(),
        };

        let devices: Vec<String> = dict
            .get("ProvisionedDevices")
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|d| d.as_string().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        let certificate_fingerprints = dict
            .get("DeveloperCertificates")
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|c| c.as_data())
                    .map(certificate_fingerprint)
                    .collect()
            })
            .unwrap_or_default();

        let expiration = dict
            .get("ExpirationDate")
            .and_then(|v| v.as_date())
            .ok_or(ProfileError::MissingField("ExpirationDate"))?;
        let expiration_date: DateTime<Utc> = SystemTime::from(expiration).into();

        let get_task_allow = entitlements
            .get("get-task-allow")
            .or_else(|| entitlements.get("com.apple.security.get-task-allow"))
            .and_then(|v| v.as_boolean())
            .unwrap_or(false);
        let provisions_all_devices = dict
            .get("ProvisionsAllDevices")
            .and_then(|v| v.as_boolean())
            .unwrap_or(false);

        let distribution_type = if get_task_allow {
            DistributionType::Development
        } else if provisions_all_devices {
            DistributionType::Enterprise
        } else if !devices.is_empty() {
            DistributionType::AdHoc
        } else {
            DistributionType::AppStore
        };

        let xcode_managed = dict
            .get("IsXcodeManaged")
            .and_then(|v| v.as_boolean())
            .unwrap_or(false)
            || XCODE_MANAGED_PREFIXES.iter().any(|p| name.starts_with(p));

        Ok(Self {
            uuid,
            name,
            platform,
            distribution_type,
            team_id,
            bundle_id,
            entitlements,
            certificate_fingerprints,
            devices,
            expiration_date,
            xcode_managed,
        })
    }

    /// Whether the profile stays valid for at least `days` after `now`.
    pub fn valid_for_days(&self, now: DateTime<Utc>, days: u32) -> bool {
        self.expiration_date > now + chrono::Duration::days(i64::from(days))
    }

    pub fn contains_certificate(&self, fingerprint: &str) -> bool {
        self.certificate_fingerprints
            .iter()
            .any(|f| f.eq_ignore_ascii_case(fingerprint))
    }

    /// UDIDs from `devices` the profile does not provision.
    pub fn missing_devices<'a>(&self, devices: &'a [String]) -> Vec<&'a str> {
        devices
            .iter()
            .filter(|udid| !self.devices.iter().any(|d| d.eq_ignore_ascii_case(udid)))
            .map(String::as_str)
            .collect()
    }
}

/// Load every profile file of a directory, skipping unreadable ones.
pub fn load_profiles_dir(dir: &Path) -> Result<Vec<ProvisioningProfile>, ProfileError> {
    if !dir.is_dir() {
        return Err(ProfileError::Io {
            path: dir.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "not a directory"),
        });
    }

    let mut profiles = Vec::new();
    for entry in WalkDir::new(dir)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        let is_profile = path
            .extension()
            .map(|e| e == "mobileprovision" || e == "provisionprofile")
            .unwrap_or(false);
        if !is_profile {
            continue;
        }
        match ProvisioningProfile::open(path) {
            Ok(profile) => {
                debug!("Loaded profile {} ({}) from {}", profile.name, profile.uuid, path.display());
                profiles.push(profile);
            }
            Err(e) => warn!("Skipping profile {}: {}", path.display(), e),
        }
    }
    Ok(profiles)
}
