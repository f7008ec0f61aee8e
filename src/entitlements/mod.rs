//! Entitlements handling
//!
//! Wraps a target's entitlements dictionary, expands `CFBundleIdentifier`
//! references in iCloud container identifiers and maps entitlement keys to
//! the portal capabilities a provisioning profile must carry.

use log::warn;
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use xcode_build_settings::{contains_reference, expand, BuildSettings};

use crate::xcode::{json_to_plist, plist_to_json};

pub const ICLOUD_SERVICES_KEY: &str = "com.apple.developer.icloud-services";
pub const ICLOUD_CONTAINER_IDENTIFIERS_KEY: &str =
    "com.apple.developer.icloud-container-identifiers";
pub const APP_GROUPS_KEY: &str = "com.apple.security.application-groups";

/// Entitlement keys that correspond to a portal capability, with the
/// capability name.
const CAPABILITY_KEYS: &[(&str, &str)] = &[
    (ICLOUD_CONTAINER_IDENTIFIERS_KEY, "ICLOUD"),
    (ICLOUD_SERVICES_KEY, "ICLOUD"),
    ("com.apple.developer.ubiquity-kvstore-identifier", "ICLOUD"),
    ("aps-environment", "PUSH_NOTIFICATIONS"),
    ("com.apple.developer.aps-environment", "PUSH_NOTIFICATIONS"),
    (APP_GROUPS_KEY, "APP_GROUPS"),
    ("com.apple.developer.associated-domains", "ASSOCIATED_DOMAINS"),
    ("com.apple.developer.healthkit", "HEALTHKIT"),
    ("com.apple.developer.homekit", "HOMEKIT"),
    ("com.apple.developer.in-app-payments", "APPLE_PAY"),
    ("com.apple.developer.applesignin", "APPLE_ID_AUTH"),
    ("com.apple.developer.pass-type-identifiers", "WALLET"),
    ("com.apple.developer.siri", "SIRIKIT"),
    ("com.apple.developer.nfc.readersession.formats", "NFC_TAG_READING"),
    ("com.apple.developer.networking.networkextension", "NETWORK_EXTENSIONS"),
    ("com.apple.developer.networking.vpn.api", "PERSONAL_VPN"),
    ("com.apple.developer.networking.multipath", "MULTIPATH"),
    ("com.apple.developer.networking.HotspotConfiguration", "HOT_SPOT"),
    ("com.apple.developer.networking.wifi-info", "ACCESS_WIFI_INFORMATION"),
    ("com.apple.developer.default-data-protection", "DATA_PROTECTION"),
    ("com.apple.external-accessory.wireless-configuration", "WIRELESS_ACCESSORY_CONFIGURATION"),
    ("com.apple.developer.ClassKit-environment", "CLASSKIT"),
    ("com.apple.developer.authentication-services.autofill-credential-provider", "AUTOFILL_CREDENTIAL_PROVIDER"),
    ("inter-app-audio", "INTER_APP_AUDIO"),
];

/// Keys whose values are lists the profile must fully contain.
const LIST_CAPABILITY_KEYS: &[&str] = &[ICLOUD_CONTAINER_IDENTIFIERS_KEY, APP_GROUPS_KEY];

/// Errors raised while reading or inspecting entitlements.
#[derive(Debug, thiserror::Error)]
pub enum EntitlementsError {
    #[error("failed to read entitlements {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: plist::Error,
    },

    #[error("entitlements are not a dictionary: {0}")]
    NotADictionary(String),

    #[error("entitlement {key} is not {expected}")]
    InvalidValue { key: String, expected: &'static str },
}

/// A capability required by a target's entitlements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Capability {
    pub key: String,
    pub service: &'static str,
}

/// Entitlements of a single target.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Entitlements(plist::Dictionary);

impl Entitlements {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read an `.entitlements` property list.
    pub fn from_file(path: &Path) -> Result<Self, EntitlementsError> {
        let value = plist::Value::from_file(path).map_err(|source| EntitlementsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        value
            .into_dictionary()
            .map(Self)
            .ok_or_else(|| EntitlementsError::NotADictionary(path.display().to_string()))
    }

    /// Build entitlements from a JSON object.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, EntitlementsError> {
        match json_to_plist(value) {
            Some(plist::Value::Dictionary(dict)) => Ok(Self(dict)),
            None if value.is_null() => Ok(Self::default()),
            _ => Err(EntitlementsError::NotADictionary(value.to_string())),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        plist_to_json(&plist::Value::Dictionary(self.0.clone()))
    }

    pub fn get(&self, key: &str) -> Option<&plist::Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: plist::Value) {
        self.0.insert(key.into(), value);
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn as_dictionary(&self) -> &plist::Dictionary {
        &self.0
    }

    /// String list value of `key`; `None` when absent.
    pub fn string_list(&self, key: &str) -> Result<Option<Vec<String>>, EntitlementsError> {
        let Some(value) = self.0.get(key) else {
            return Ok(None);
        };
        let invalid = || EntitlementsError::InvalidValue {
            key: key.to_string(),
            expected: "a list of strings",
        };
        let items = value.as_array().ok_or_else(invalid)?;
        items
            .iter()
            .map(|item| item.as_string().map(str::to_string).ok_or_else(invalid))
            .collect::<Result<Vec<_>, _>>()
            .map(Some)
    }

    /// iCloud container identifiers, when iCloud Documents or CloudKit is in use.
    pub fn icloud_containers(&self) -> Result<Vec<String>, EntitlementsError> {
        let services = self.string_list(ICLOUD_SERVICES_KEY)?.unwrap_or_default();
        let uses_icloud = services
            .iter()
            .any(|s| s == "CloudDocuments" || s == "CloudKit");
        if !uses_icloud {
            return Ok(Vec::new());
        }
        Ok(self
            .string_list(ICLOUD_CONTAINER_IDENTIFIERS_KEY)?
            .unwrap_or_default())
    }

    /// Expand `CFBundleIdentifier` references in iCloud container
    /// identifiers.
    ///
    /// Containers that cannot be expanded are dropped with a warning. Every
    /// other key is returned as is.
    pub fn normalize(mut self, bundle_id: &str) -> Result<Self, EntitlementsError> {
        let containers = self.icloud_containers()?;
        if containers.is_empty() {
            return Ok(self);
        }

        let mut variables = BuildSettings::new();
        variables.insert("CFBundleIdentifier", bundle_id);

        let mut expanded = Vec::with_capacity(containers.len());
        for container in containers {
            if !container.contains('$') {
                expanded.push(plist::Value::String(container));
                continue;
            }
            match expand(&container, &variables) {
                Ok(value) => expanded.push(plist::Value::String(value)),
                Err(e) => {
                    warn!(
                        "Ignoring iCloud container ID ({}) as can not expand variable: {}",
                        container, e
                    );
                }
            }
        }

        self.0.insert(
            ICLOUD_CONTAINER_IDENTIFIERS_KEY.to_string(),
            plist::Value::Array(expanded),
        );
        Ok(self)
    }

    /// Capabilities requested by these entitlements.
    pub fn capabilities(&self) -> Vec<Capability> {
        CAPABILITY_KEYS
            .iter()
            .filter(|(key, _)| match self.0.get(key) {
                None | Some(plist::Value::Boolean(false)) => false,
                Some(_) => true,
            })
            .map(|(key, service)| Capability {
                key: key.to_string(),
                service,
            })
            .collect()
    }

    /// Capability keys of `self` that `granted` (a profile's entitlements)
    /// does not cover.
    pub fn missing_capabilities(&self, granted: &Entitlements) -> Vec<String> {
        let mut missing = Vec::new();
        for capability in self.capabilities() {
            let key = capability.key.as_str();
            if !granted.contains_key(key) {
                missing.push(key.to_string());
                continue;
            }
            if !LIST_CAPABILITY_KEYS.contains(&key) {
                continue;
            }

            let wanted = self.string_list(key).ok().flatten().unwrap_or_default();
            let have: HashSet<String> = granted
                .string_list(key)
                .ok()
                .flatten()
                .unwrap_or_default()
                .into_iter()
                .collect();
            for item in wanted {
                // Unexpanded references cannot be checked against a profile
                if contains_reference(&item) {
                    continue;
                }
                if !have.contains(&item) {
                    missing.push(format!("{}:{}", key, item));
                }
            }
        }
        missing
    }
}

impl From<plist::Dictionary> for Entitlements {
    fn from(dict: plist::Dictionary) -> Self {
        Self(dict)
    }
}
