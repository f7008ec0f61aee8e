//! Developer portal interface
//!
//! The reconciler only needs a narrow view of the developer account:
//! certificates, registered devices and provisioning profiles, plus the
//! ability to request a new profile. [`SnapshotPortal`] serves an already
//! fetched JSON snapshot and cannot create anything.

use base64::Engine;
use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::entitlements::{Entitlements, EntitlementsError};
use crate::platform::{DistributionType, Platform};
use crate::profile::{certificate_fingerprint, load_profiles_dir, ProfileError, ProvisioningProfile};

/// Errors raised by a developer portal.
#[derive(Debug, thiserror::Error)]
pub enum PortalError {
    #[error("failed to read portal snapshot {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid portal snapshot: {0}")]
    Json(#[from] serde_json::Error),

    #[error("certificate {serial} has invalid content: {source}")]
    CertificateContent {
        serial: String,
        #[source]
        source: base64::DecodeError,
    },

    #[error("invalid profile entitlements: {0}")]
    Entitlements(#[from] EntitlementsError),

    #[error(transparent)]
    Profile(#[from] ProfileError),

    #[error("portal is read-only, cannot create profile {0}")]
    ReadOnly(String),
}

/// Kind of signing certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CertificateKind {
    Development,
    Distribution,
}

impl CertificateKind {
    /// Certificate kind needed to sign for `distribution`.
    pub fn for_distribution(distribution: DistributionType) -> Self {
        if distribution.uses_development_certificate() {
            CertificateKind::Development
        } else {
            CertificateKind::Distribution
        }
    }
}

/// A signing certificate of the account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Certificate {
    /// Identity name, e.g. `Apple Development: Jane Doe (ABCDE12345)`
    pub common_name: String,
    pub serial: String,
    pub team_id: String,
    pub kind: CertificateKind,
    pub expiration_date: DateTime<Utc>,
    /// Base64 DER content, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl Certificate {
    /// SHA-256 fingerprint of the DER content, when the content is known.
    pub fn fingerprint(&self) -> Result<Option<String>, PortalError> {
        let Some(ref content) = self.content else {
            return Ok(None);
        };
        let der = base64::engine::general_purpose::STANDARD
            .decode(content.trim())
            .map_err(|source| PortalError::CertificateContent {
                serial: self.serial.clone(),
                source,
            })?;
        Ok(Some(certificate_fingerprint(&der)))
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiration_date <= now
    }
}

/// A registered test device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub udid: String,
    #[serde(default)]
    pub name: String,
    pub platform: Platform,
}

/// Parameters of a profile to create.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileRequest {
    pub name: String,
    /// Portal profile type, e.g. `IOS_APP_DEVELOPMENT`
    pub profile_type: String,
    pub platform: Platform,
    pub distribution_type: DistributionType,
    pub team_id: String,
    pub bundle_id: String,
    pub certificate_serial: String,
    pub device_udids: Vec<String>,
    /// Entitlements the profile must grant
    pub entitlements: Entitlements,
}

/// Access to the developer account.
pub trait DeveloperPortal {
    fn list_certificates(&self) -> Result<Vec<Certificate>, PortalError>;

    /// Profiles for exactly this bundle id, platform and distribution type.
    fn list_profiles(
        &self,
        bundle_id: &str,
        platform: Platform,
        distribution: DistributionType,
    ) -> Result<Vec<ProvisioningProfile>, PortalError>;

    fn list_devices(&self, platform: Platform) -> Result<Vec<Device>, PortalError>;

    fn create_profile(&mut self, request: &ProfileRequest) -> Result<ProvisioningProfile, PortalError>;
}

// Snapshot file layout

#[derive(Debug, Default, Deserialize)]
struct SnapshotFile {
    #[serde(default)]
    certificates: Vec<Certificate>,
    #[serde(default)]
    devices: Vec<Device>,
    #[serde(default)]
    profiles: Vec<ProfileRecord>,
}

#[derive(Debug, Deserialize)]
struct ProfileRecord {
    uuid: String,
    name: String,
    platform: Platform,
    distribution_type: DistributionType,
    team_id: String,
    bundle_id: String,
    #[serde(default)]
    entitlements: serde_json::Value,
    #[serde(default)]
    certificate_fingerprints: Vec<String>,
    #[serde(default)]
    devices: Vec<String>,
    expiration_date: DateTime<Utc>,
    #[serde(default)]
    xcode_managed: bool,
}

impl ProfileRecord {
    fn into_profile(self) -> Result<ProvisioningProfile, PortalError> {
        Ok(ProvisioningProfile {
            uuid: self.uuid,
            name: self.name,
            platform: self.platform,
            distribution_type: self.distribution_type,
            team_id: self.team_id,
            bundle_id: self.bundle_id,
            entitlements: Entitlements::from_json(&self.entitlements)?,
            certificate_fingerprints: self
                .certificate_fingerprints
                .into_iter()
                .map(|f| f.to_ascii_lowercase())
                .collect(),
            devices: self.devices,
            expiration_date: self.expiration_date,
            xcode_managed: self.xcode_managed,
        })
    }
}

/// Read-only portal over an already fetched account snapshot.
#[derive(Debug, Clone, Default)]
pub struct SnapshotPortal {
    certificates: Vec<Certificate>,
    devices: Vec<Device>,
    profiles: Vec<ProvisioningProfile>,
}

impl SnapshotPortal {
    pub fn new(
        certificates: Vec<Certificate>,
        devices: Vec<Device>,
        profiles: Vec<ProvisioningProfile>,
    ) -> Self {
        Self {
            certificates,
            devices,
            profiles,
        }
    }

    /// Load a JSON snapshot file.
    pub fn from_file(path: &Path) -> Result<Self, PortalError> {
        let content = fs::read_to_string(path).map_err(|source| PortalError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_str(&content)
    }

    /// Parse a JSON snapshot.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, PortalError> {
        let file: SnapshotFile = serde_json::from_str(content)?;

        // Surface bad certificate content at load time
        for cert in &file.certificates {
            cert.fingerprint()?;
        }

        let profiles = file
            .profiles
            .into_iter()
            .map(ProfileRecord::into_profile)
            .collect::<Result<Vec<_>, _>>()?;

        debug!(
            "Portal snapshot: {} certificates, {} devices, {} profiles",
            file.certificates.len(),
            file.devices.len(),
            profiles.len()
        );

        Ok(Self::new(file.certificates, file.devices, profiles))
    }

    /// Add every profile file found in `dir`.
    pub fn load_profiles_dir(&mut self, dir: &Path) -> Result<usize, PortalError> {
        let profiles = load_profiles_dir(dir)?;
        let count = profiles.len();
        self.profiles.extend(profiles);
        Ok(count)
    }

    pub fn profiles(&self) -> &[ProvisioningProfile] {
        &self.profiles
    }
}

impl DeveloperPortal for SnapshotPortal {
    fn list_certificates(&self) -> Result<Vec<Certificate>, PortalError> {
        Ok(self.certificates.clone())
    }

    fn list_profiles(
        &self,
        bundle_id: &str,
        platform: Platform,
        distribution: DistributionType,
    ) -> Result<Vec<ProvisioningProfile>, PortalError> {
        Ok(self
            .profiles
            .iter()
            .filter(|p| {
                p.bundle_id == bundle_id
                    && p.platform == platform
                    && p.distribution_type == distribution
            })
            .cloned()
            .collect())
    }

    fn list_devices(&self, platform: Platform) -> Result<Vec<Device>, PortalError> {
        Ok(self
            .devices
            .iter()
            .filter(|d| d.platform == platform)
            .cloned()
            .collect())
    }

    fn create_profile(&mut self, request: &ProfileRequest) -> Result<ProvisioningProfile, PortalError> {
        Err(PortalError::ReadOnly(request.name.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SNAPSHOT: &str = r#"{
        "certificates": [
            {
                "common_name": "Apple Development: Bitrise Bot (ABCD)",
                "serial": "1A2B",
                "team_id": "72SA8V3WYL",
                "kind": "development",
                "expiration_date": "2030-01-01T00:00:00Z",
                "content": "Y2VydA=="
            }
        ],
        "devices": [
            {"udid": "00008030-0001", "name": "iPhone", "platform": "iOS"},
            {"udid": "TV-0001", "platform": "tvOS"}
        ],
        "profiles": [
            {
                "uuid": "UUID-1",
                "name": "App Development",
                "platform": "iOS",
                "distribution_type": "development",
                "team_id": "72SA8V3WYL",
                "bundle_id": "com.example.app",
                "entitlements": {"aps-environment": "development"},
                "certificate_fingerprints": ["ABCDEF"],
                "devices": ["00008030-0001"],
                "expiration_date": "2030-01-01T00:00:00Z"
            },
            {
                "uuid": "UUID-2",
                "name": "App Store",
                "platform": "iOS",
                "distribution_type": "app-store",
                "team_id": "72SA8V3WYL",
                "bundle_id": "com.example.app",
                "expiration_date": "2030-01-01T00:00:00Z"
            }
        ]
    }"#;

    #[test]
    fn test_snapshot_queries() {
        let portal = SnapshotPortal::from_str(SNAPSHOT).unwrap();

        let certs = portal.list_certificates().unwrap();
        assert_eq!(certs.len(), 1);
        assert_eq!(
            certs[0].fingerprint().unwrap(),
            Some(certificate_fingerprint(b"cert"))
        );

        let devices = portal.list_devices(Platform::Ios).unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].udid, "00008030-0001");

        let profiles = portal
            .list_profiles("com.example.app", Platform::Ios, DistributionType::Development)
            .unwrap();
        assert_eq!(profiles.len(), 1);
        assert_eq!(profiles[0].uuid, "UUID-1");
        assert_eq!(profiles[0].certificate_fingerprints, vec!["abcdef".to_string()]);
        assert!(profiles[0].entitlements.contains_key("aps-environment"));

        assert!(portal
            .list_profiles("com.example.other", Platform::Ios, DistributionType::Development)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_snapshot_is_read_only() {
        let mut portal = SnapshotPortal::default();
        let request = ProfileRequest {
            name: "com.example.app development".to_string(),
            profile_type: "IOS_APP_DEVELOPMENT".to_string(),
            platform: Platform::Ios,
            distribution_type: DistributionType::Development,
            team_id: "72SA8V3WYL".to_string(),
            bundle_id: "com.example.app".to_string(),
            certificate_serial: "1A2B".to_string(),
            device_udids: vec![],
            entitlements: Entitlements::new(),
        };
        assert!(matches!(
            portal.create_profile(&request),
            Err(PortalError::ReadOnly(_))
        ));
    }

    #[test]
    fn test_invalid_certificate_content() {
        let snapshot = r#"{"certificates": [{
            "common_name": "x", "serial": "S", "team_id": "T", "kind": "distribution",
            "expiration_date": "2030-01-01T00:00:00Z", "content": "***"
        }]}"#;
        assert!(matches!(
            SnapshotPortal::from_str(snapshot),
            Err(PortalError::CertificateContent { .. })
        ));
    }

    #[test]
    fn test_snapshot_from_file_and_profiles_dir() {
        use crate::profile::tests::{mobileprovision_bytes, profile_plist};

        let dir = TempDir::new().unwrap();
        let snapshot_path = dir.path().join("portal.json");
        std::fs::write(&snapshot_path, r#"{"devices": []}"#).unwrap();

        let profiles_dir = dir.path().join("profiles");
        std::fs::create_dir(&profiles_dir).unwrap();
        let value = profile_plist("Dev", "72SA8V3WYL.com.example.app", true, &[], b"cert");
        std::fs::write(
            profiles_dir.join("dev.mobileprovision"),
            mobileprovision_bytes(&value),
        )
        .unwrap();

        let mut portal = SnapshotPortal::from_file(&snapshot_path).unwrap();
        assert_eq!(portal.load_profiles_dir(&profiles_dir).unwrap(), 1);
        assert_eq!(
            portal
                .list_profiles("com.example.app", Platform::Ios, DistributionType::Development)
                .unwrap()
                .len(),
            1
        );
    }
}
