//! Xcode autoprovision - code signing resolution for CI
//!
//! Reads an Xcode project or workspace, works out which targets end up in
//! the archive together with their bundle identifiers, entitlements, team
//! and platform, then reconciles them against the certificates and
//! provisioning profiles of a developer account.

pub mod config;
pub mod entitlements;
pub mod outputs;
pub mod platform;
pub mod portal;
pub mod profile;
pub mod project;
pub mod reconcile;
pub mod settings;
pub mod xcode;

pub use config::{ConfigError, ConfigOverrides, ProvisionConfig, SettingsSourceKind};
pub use entitlements::{Capability, Entitlements, EntitlementsError};
pub use outputs::SigningOutputs;
pub use platform::{DistributionType, Platform, PlatformError};
pub use portal::{Certificate, CertificateKind, DeveloperPortal, Device, PortalError, ProfileRequest, SnapshotPortal};
pub use profile::{ProfileError, ProvisioningProfile};
pub use project::{ProjectError, ProjectHelper, TeamResolution};
pub use reconcile::{
    codesign_identities_match, Plan, ProfileAction, ReconcileError, ReconcileInput,
    ReconcileOptions, Reconciler, Resolution,
};
pub use settings::{BuildSettingsSource, ProjectFileSettings, SourceError, XcodebuildSettings};
pub use xcode_build_settings::{expand, BuildSettings, ExpandError, SettingsError};
