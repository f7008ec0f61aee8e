//! Output variables of a successful run
//!
//! Consumed by the build step that follows: printed as `KEY=VALUE` lines or
//! JSON, and optionally appended to an env file.

use serde::Serialize;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;

use crate::platform::DistributionType;
use crate::reconcile::{ResolvedDistribution, Resolution};

/// Signing results exposed to later steps.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct SigningOutputs {
    pub export_method: String,
    pub developer_team: String,
    pub development_codesign_identity: String,
    pub production_codesign_identity: String,
    /// UUID of the main target's development profile
    pub development_profile: String,
    /// UUID of the main target's production profile
    pub production_profile: String,
}

impl SigningOutputs {
    pub fn from_resolution(resolution: &Resolution, distribution: DistributionType) -> Self {
        let identity = |d: Option<&ResolvedDistribution>| {
            d.map(|d| d.certificate.common_name.clone()).unwrap_or_default()
        };
        let profile = |d: Option<&ResolvedDistribution>| {
            d.and_then(|d| resolution.main_profile(d))
                .map(|p| p.uuid.clone())
                .unwrap_or_default()
        };

        let development = resolution.development();
        let production = resolution.production();
        Self {
            export_method: distribution.as_str().to_string(),
            developer_team: resolution.team_id.clone(),
            development_codesign_identity: identity(development),
            production_codesign_identity: identity(production),
            development_profile: profile(development),
            production_profile: profile(production),
        }
    }

    pub fn pairs(&self) -> [(&'static str, &str); 6] {
        [
            ("EXPORT_METHOD", self.export_method.as_str()),
            ("DEVELOPER_TEAM", self.developer_team.as_str()),
            ("DEVELOPMENT_CODESIGN_IDENTITY", self.development_codesign_identity.as_str()),
            ("PRODUCTION_CODESIGN_IDENTITY", self.production_codesign_identity.as_str()),
            ("DEVELOPMENT_PROFILE", self.development_profile.as_str()),
            ("PRODUCTION_PROFILE", self.production_profile.as_str()),
        ]
    }

    /// `KEY=VALUE` lines, one per variable.
    pub fn to_env_lines(&self) -> String {
        self.pairs()
            .iter()
            .map(|(key, value)| format!("{}={}\n", key, value))
            .collect()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Append the variables to an env file, creating it if needed.
    pub fn append_to(&self, path: &Path) -> io::Result<()> {
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        file.write_all(self.to_env_lines().as_bytes())?;
        file.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entitlements::Entitlements;
    use crate::platform::Platform;
    use crate::portal::{Certificate, CertificateKind};
    use crate::profile::ProvisioningProfile;
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn distribution(kind: DistributionType, identity: &str, uuid: &str) -> ResolvedDistribution {
        let expiration = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
        let profile = ProvisioningProfile {
            uuid: uuid.to_string(),
            name: uuid.to_string(),
            platform: Platform::Ios,
            distribution_type: kind,
            team_id: "TEAM1".to_string(),
            bundle_id: "com.example.app".to_string(),
            entitlements: Entitlements::new(),
            certificate_fingerprints: vec![],
            devices: vec![],
            expiration_date: expiration,
            xcode_managed: false,
        };
        ResolvedDistribution {
            distribution_type: kind,
            certificate: Certificate {
                common_name: identity.to_string(),
                serial: "S".to_string(),
                team_id: "TEAM1".to_string(),
                kind: CertificateKind::for_distribution(kind),
                expiration_date: expiration,
                content: None,
            },
            profiles: BTreeMap::from([("com.example.app".to_string(), profile)]),
        }
    }

    fn resolution() -> Resolution {
        Resolution {
            team_id: "TEAM1".to_string(),
            main_bundle_id: "com.example.app".to_string(),
            platform: Platform::Ios,
            distributions: vec![
                distribution(DistributionType::Development, "Apple Development: Bot", "DEV-UUID"),
                distribution(DistributionType::AdHoc, "Apple Distribution: Bot", "ADHOC-UUID"),
            ],
        }
    }

    #[test]
    fn test_outputs_from_resolution() {
        let outputs = SigningOutputs::from_resolution(&resolution(), DistributionType::AdHoc);
        assert_eq!(outputs.export_method, "ad-hoc");
        assert_eq!(outputs.developer_team, "TEAM1");
        assert_eq!(outputs.development_profile, "DEV-UUID");
        assert_eq!(outputs.production_profile, "ADHOC-UUID");
        assert_eq!(outputs.production_codesign_identity, "Apple Distribution: Bot");
    }

    #[test]
    fn test_development_only_leaves_production_empty() {
        let mut resolution = resolution();
        resolution.distributions.truncate(1);
        let outputs = SigningOutputs::from_resolution(&resolution, DistributionType::Development);
        assert_eq!(outputs.production_profile, "");
        assert_eq!(outputs.production_codesign_identity, "");
        assert!(outputs
            .to_env_lines()
            .contains("DEVELOPMENT_PROFILE=DEV-UUID\n"));
    }

    #[test]
    fn test_json_keys() {
        let outputs = SigningOutputs::from_resolution(&resolution(), DistributionType::AdHoc);
        let value: serde_json::Value = serde_json::from_str(&outputs.to_json().unwrap()).unwrap();
        assert_eq!(value["EXPORT_METHOD"], "ad-hoc");
        assert_eq!(value["DEVELOPER_TEAM"], "TEAM1");
    }

    #[test]
    fn test_append_to_env_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("env");
        std::fs::write(&path, "EXISTING=1\n").unwrap();

        let outputs = SigningOutputs::from_resolution(&resolution(), DistributionType::AdHoc);
        outputs.append_to(&path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("EXISTING=1\nEXPORT_METHOD=ad-hoc\n"));
        assert_eq!(content.lines().count(), 7);
    }
}
