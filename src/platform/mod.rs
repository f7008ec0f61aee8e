//! Target platform and distribution type
//!
//! Both are closed sets. Strings coming from build settings, config files,
//! CLI flags or profiles are parsed once at the boundary.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Errors when parsing a platform or distribution type.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlatformError {
    #[error("not supported platform: '{0}' (supported: iOS, macOS, tvOS)")]
    UnsupportedPlatform(String),

    #[error("unknown distribution type: '{0}' (expected development, app-store, ad-hoc or enterprise)")]
    UnknownDistributionType(String),
}

/// Apple platform of the archived product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Platform {
    #[serde(rename = "iOS")]
    Ios,
    #[serde(rename = "macOS")]
    MacOs,
    #[serde(rename = "tvOS")]
    TvOs,
}

impl Platform {
    /// The `PLATFORM_DISPLAY_NAME` build setting value.
    pub fn display_name(&self) -> &'static str {
        match self {
            Platform::Ios => "iOS",
            Platform::MacOs => "macOS",
            Platform::TvOs => "tvOS",
        }
    }

    /// Parse a `PLATFORM_DISPLAY_NAME` value.
    pub fn from_display_name(name: &str) -> Result<Self, PlatformError> {
        match name {
            "iOS" => Ok(Platform::Ios),
            "macOS" => Ok(Platform::MacOs),
            "tvOS" => Ok(Platform::TvOs),
            other => Err(PlatformError::UnsupportedPlatform(other.to_string())),
        }
    }

    /// Map an `SDKROOT` value (e.g. `iphoneos`, `macosx`) to a platform.
    pub fn from_sdk_root(sdk: &str) -> Option<Self> {
        let sdk = sdk.to_ascii_lowercase();
        if sdk.starts_with("iphoneos") || sdk.starts_with("iphonesimulator") {
            Some(Platform::Ios)
        } else if sdk.starts_with("macosx") {
            Some(Platform::MacOs)
        } else if sdk.starts_with("appletvos") || sdk.starts_with("appletvsimulator") {
            Some(Platform::TvOs)
        } else {
            None
        }
    }

    /// Platform name as written in a provisioning profile's `Platform` array.
    pub fn from_profile_platform(name: &str) -> Option<Self> {
        match name {
            "iOS" | "xrOS" | "visionOS" => Some(Platform::Ios),
            "OSX" | "macOS" => Some(Platform::MacOs),
            "tvOS" => Some(Platform::TvOs),
            _ => None,
        }
    }

    /// Prefix used in portal profile type names.
    fn profile_type_prefix(&self) -> &'static str {
        match self {
            Platform::Ios => "IOS",
            Platform::MacOs => "MAC",
            Platform::TvOs => "TVOS",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for Platform {
    type Err = PlatformError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_display_name(s)
    }
}

/// How the archive will be distributed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DistributionType {
    Development,
    AppStore,
    AdHoc,
    Enterprise,
}

impl DistributionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DistributionType::Development => "development",
            DistributionType::AppStore => "app-store",
            DistributionType::AdHoc => "ad-hoc",
            DistributionType::Enterprise => "enterprise",
        }
    }

    /// Whether profiles of this type list explicit devices.
    pub fn requires_devices(&self) -> bool {
        matches!(self, DistributionType::Development | DistributionType::AdHoc)
    }

    /// Whether signing needs a development (rather than distribution) certificate.
    pub fn uses_development_certificate(&self) -> bool {
        matches!(self, DistributionType::Development)
    }

    /// Portal profile type name, e.g. `IOS_APP_DEVELOPMENT` or `MAC_APP_STORE`.
    pub fn profile_type(&self, platform: Platform) -> String {
        let suffix = match self {
            DistributionType::Development => "APP_DEVELOPMENT",
            DistributionType::AppStore => "APP_STORE",
            DistributionType::AdHoc => "APP_ADHOC",
            DistributionType::Enterprise => "APP_INHOUSE",
        };
        format!("{}_{}", platform.profile_type_prefix(), suffix)
    }
}

impl fmt::Display for DistributionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DistributionType {
    type Err = PlatformError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "development" => Ok(DistributionType::Development),
            "app-store" => Ok(DistributionType::AppStore),
            "ad-hoc" => Ok(DistributionType::AdHoc),
            "enterprise" => Ok(DistributionType::Enterprise),
            other => Err(PlatformError::UnknownDistributionType(other.to_string())),
        }
    }
}
