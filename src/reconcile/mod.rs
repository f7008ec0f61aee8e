//! Identity and profile reconciliation
//!
//! Cross-references the archivable targets (bundle id → entitlements) with
//! the certificates, devices and profiles of the developer account. The
//! result is one certificate and one profile per bundle id for every
//! distribution type that has to be signed: development always, plus the
//! requested distribution type when it differs.
//!
//! Reconciliation is split in two steps. [`Reconciler::plan`] only reads
//! from the portal and decides what to reuse or create. [`Reconciler::apply`]
//! performs the creations.

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

use crate::entitlements::Entitlements;
use crate::platform::{DistributionType, Platform};
use crate::portal::{Certificate, CertificateKind, DeveloperPortal, PortalError, ProfileRequest};
use crate::profile::ProvisioningProfile;
use crate::project::TeamResolution;

/// Errors raised while reconciling signing assets.
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("no valid {kind:?} certificate found{}", team_suffix(.team))]
    NoCertificate {
        kind: CertificateKind,
        team: Option<String>,
    },

    #[error("project team ({project_team}) does not match any certificate team: {}", .certificate_teams.join(", "))]
    TeamMismatch {
        project_team: String,
        certificate_teams: Vec<String>,
    },

    #[error("project team is not determined and certificates belong to several teams: {}", .teams.join(", "))]
    AmbiguousTeam { teams: Vec<String> },

    #[error("different codesign identity in project ({project_identity}) than the selected certificates: {}", .certificates.join(", "))]
    IdentityMismatch {
        project_identity: String,
        certificates: Vec<String>,
    },

    #[error("no valid {distribution} profile for {bundle_id} and profile generation is disabled")]
    GenerationDisabled {
        bundle_id: String,
        distribution: DistributionType,
    },

    #[error(transparent)]
    Portal(#[from] PortalError),
}

fn team_suffix(team: &Option<String>) -> String {
    team.as_ref()
        .map(|t| format!(" for team {}", t))
        .unwrap_or_default()
}

/// Whether two codesign identity names refer to the same identity.
///
/// Either being a case-insensitive substring of the other is a match, and an
/// empty name matches anything.
pub fn codesign_identities_match(identity1: &str, identity2: &str) -> bool {
    if identity1.is_empty() || identity2.is_empty() {
        return true;
    }
    let a = identity1.to_lowercase();
    let b = identity2.to_lowercase();
    a.contains(&b) || b.contains(&a)
}

/// Project facts the reconciler works from.
#[derive(Debug, Clone)]
pub struct ReconcileInput {
    /// Bundle id → normalized entitlements of every archivable target
    pub targets: BTreeMap<String, Entitlements>,
    pub main_bundle_id: String,
    pub platform: Platform,
    pub team: TeamResolution,
    /// Main target's `CODE_SIGN_IDENTITY`; empty when unconstrained
    pub codesign_identity: String,
    pub distribution: DistributionType,
}

/// Tunables of a reconciliation run.
#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    /// Profiles expiring sooner than this many days are not reused
    pub min_profile_days_valid: u32,
    /// Whether missing profiles may be created
    pub generate_profiles: bool,
    pub now: DateTime<Utc>,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            min_profile_days_valid: 0,
            generate_profiles: true,
            now: Utc::now(),
        }
    }
}

/// Why an existing profile was not reused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rejection {
    pub uuid: String,
    pub name: String,
    pub reasons: Vec<String>,
}

/// Decision for one bundle id.
#[derive(Debug, Clone, PartialEq)]
pub enum ProfileAction {
    Reuse(ProvisioningProfile),
    Create {
        request: ProfileRequest,
        rejected: Vec<Rejection>,
    },
}

/// Certificate and per-bundle-id decisions for one distribution type.
#[derive(Debug, Clone, PartialEq)]
pub struct DistributionPlan {
    pub distribution_type: DistributionType,
    pub certificate: Certificate,
    pub profiles: BTreeMap<String, ProfileAction>,
}

/// Everything that has to happen to sign the archive.
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    pub team_id: String,
    pub main_bundle_id: String,
    pub platform: Platform,
    pub distributions: Vec<DistributionPlan>,
}

impl Plan {
    /// Number of profiles that would be created.
    pub fn pending_creations(&self) -> usize {
        self.distributions
            .iter()
            .flat_map(|d| d.profiles.values())
            .filter(|a| matches!(a, ProfileAction::Create { .. }))
            .count()
    }
}

/// Signing assets for one distribution type.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedDistribution {
    pub distribution_type: DistributionType,
    pub certificate: Certificate,
    /// Bundle id → profile
    pub profiles: BTreeMap<String, ProvisioningProfile>,
}

/// Result of a successful reconciliation.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub team_id: String,
    pub main_bundle_id: String,
    pub platform: Platform,
    pub distributions: Vec<ResolvedDistribution>,
}

impl Resolution {
    pub fn development(&self) -> Option<&ResolvedDistribution> {
        self.distributions
            .iter()
            .find(|d| d.distribution_type == DistributionType::Development)
    }

    /// Assets of the non-development distribution type, if one was requested.
    pub fn production(&self) -> Option<&ResolvedDistribution> {
        self.distributions
            .iter()
            .find(|d| d.distribution_type != DistributionType::Development)
    }

    /// Profile of the main target for `distribution`.
    pub fn main_profile<'a>(
        &self,
        distribution: &'a ResolvedDistribution,
    ) -> Option<&'a ProvisioningProfile> {
        distribution.profiles.get(&self.main_bundle_id)
    }
}

/// Distribution types to sign for: development first, then `requested`.
fn distribution_types(requested: DistributionType) -> Vec<DistributionType> {
    let mut types = vec![DistributionType::Development];
    if requested != DistributionType::Development {
        types.push(requested);
    }
    types
}

/// Pick the latest-expiring valid certificate of `kind`.
///
/// With a known team only that team's certificates qualify. Without one the
/// candidates must all belong to a single team.
pub fn select_certificate(
    certificates: &[Certificate],
    kind: CertificateKind,
    team: Option<&str>,
    now: DateTime<Utc>,
) -> Result<Certificate, ReconcileError> {
    let candidates: Vec<&Certificate> = certificates
        .iter()
        .filter(|c| c.kind == kind)
        .filter(|c| {
            if c.is_expired_at(now) {
                debug!("Ignoring expired certificate {} ({})", c.common_name, c.serial);
                return false;
            }
            true
        })
        .collect();

    let teams: BTreeSet<&str> = candidates.iter().map(|c| c.team_id.as_str()).collect();
    let candidates: Vec<&Certificate> = match team {
        Some(team) => {
            let matching: Vec<&Certificate> = candidates
                .iter()
                .copied()
                .filter(|c| c.team_id == team)
                .collect();
            if matching.is_empty() && !teams.is_empty() {
                return Err(ReconcileError::TeamMismatch {
                    project_team: team.to_string(),
                    certificate_teams: teams.iter().map(|t| t.to_string()).collect(),
                });
            }
            matching
        }
        None if teams.len() > 1 => {
            return Err(ReconcileError::AmbiguousTeam {
                teams: teams.iter().map(|t| t.to_string()).collect(),
            });
        }
        None => candidates,
    };

    candidates
        .into_iter()
        .max_by_key(|c| c.expiration_date)
        .cloned()
        .ok_or_else(|| ReconcileError::NoCertificate {
            kind,
            team: team.map(str::to_string),
        })
}

/// Everything a profile is checked against.
struct ProfileCriteria<'a> {
    bundle_id: &'a str,
    entitlements: &'a Entitlements,
    platform: Platform,
    distribution: DistributionType,
    team_id: &'a str,
    certificate_fingerprint: Option<&'a str>,
    devices: &'a [String],
    now: DateTime<Utc>,
    min_days_valid: u32,
}

/// Reasons `profile` cannot be used; empty when it is valid.
fn profile_rejection_reasons(profile: &ProvisioningProfile, criteria: &ProfileCriteria) -> Vec<String> {
    let mut reasons = Vec::new();

    if profile.bundle_id != criteria.bundle_id {
        reasons.push(format!("bundle id {} does not match", profile.bundle_id));
    }
    if profile.platform != criteria.platform {
        reasons.push(format!("platform {} does not match", profile.platform));
    }
    if profile.distribution_type != criteria.distribution {
        reasons.push(format!(
            "distribution type {} does not match",
            profile.distribution_type
        ));
    }
    if profile.team_id != criteria.team_id {
        reasons.push(format!("team {} does not match", profile.team_id));
    }
    if profile.xcode_managed {
        reasons.push("managed by Xcode".to_string());
    }
    if !profile.valid_for_days(criteria.now, criteria.min_days_valid) {
        reasons.push(format!(
            "expires at {} (less than {} days valid)",
            profile.expiration_date.to_rfc3339(),
            criteria.min_days_valid
        ));
    }
    if let Some(fingerprint) = criteria.certificate_fingerprint {
        if !profile.contains_certificate(fingerprint) {
            reasons.push("does not contain the selected certificate".to_string());
        }
    }
    if criteria.distribution.requires_devices() {
        let missing = profile.missing_devices(criteria.devices);
        if !missing.is_empty() {
            reasons.push(format!("missing devices: {}", missing.join(", ")));
        }
    }
    let missing = criteria.entitlements.missing_capabilities(&profile.entitlements);
    if !missing.is_empty() {
        reasons.push(format!("missing capabilities: {}", missing.join(", ")));
    }

    reasons
}

/// Plans and applies profile decisions against a portal.
pub struct Reconciler<'p, P> {
    portal: &'p mut P,
    options: ReconcileOptions,
}

impl<'p, P: DeveloperPortal> Reconciler<'p, P> {
    pub fn new(portal: &'p mut P, options: ReconcileOptions) -> Self {
        Self { portal, options }
    }

    /// Decide which certificate and profiles to use without changing anything.
    pub fn plan(&self, input: &ReconcileInput) -> Result<Plan, ReconcileError> {
        let now = self.options.now;
        let certificates = self.portal.list_certificates()?;

        if let TeamResolution::Ambiguous {
            first_team, team, ..
        } = &input.team
        {
            warn!(
                "Project targets use different teams ({}, {}); resolving the team from certificates",
                first_team, team
            );
        }

        let mut team = input.team.team_id().map(str::to_string);
        let mut selected = Vec::new();
        for distribution in distribution_types(input.distribution) {
            let kind = CertificateKind::for_distribution(distribution);
            let certificate = select_certificate(&certificates, kind, team.as_deref(), now)?;
            info!(
                "Using {:?} certificate: {} (team {})",
                kind, certificate.common_name, certificate.team_id
            );
            team = Some(certificate.team_id.clone());
            selected.push((distribution, certificate));
        }
        let team_id = team.unwrap_or_default();

        // A release configuration may name the distribution identity
        if !input.codesign_identity.is_empty()
            && !selected
                .iter()
                .any(|(_, c)| codesign_identities_match(&input.codesign_identity, &c.common_name))
        {
            return Err(ReconcileError::IdentityMismatch {
                project_identity: input.codesign_identity.clone(),
                certificates: selected.iter().map(|(_, c)| c.common_name.clone()).collect(),
            });
        }

        let devices: Vec<String> = self
            .portal
            .list_devices(input.platform)?
            .into_iter()
            .map(|d| d.udid)
            .collect();

        let mut distributions = Vec::new();
        for (distribution, certificate) in selected {
            let fingerprint = certificate.fingerprint()?;
            let mut profiles = BTreeMap::new();

            for (bundle_id, entitlements) in &input.targets {
                let criteria = ProfileCriteria {
                    bundle_id,
                    entitlements,
                    platform: input.platform,
                    distribution,
                    team_id: &team_id,
                    certificate_fingerprint: fingerprint.as_deref(),
                    devices: &devices,
                    now,
                    min_days_valid: self.options.min_profile_days_valid,
                };
                let action = self.plan_profile(&criteria, &certificate)?;
                profiles.insert(bundle_id.clone(), action);
            }

            distributions.push(DistributionPlan {
                distribution_type: distribution,
                certificate,
                profiles,
            });
        }

        Ok(Plan {
            team_id,
            main_bundle_id: input.main_bundle_id.clone(),
            platform: input.platform,
            distributions,
        })
    }

    fn plan_profile(
        &self,
        criteria: &ProfileCriteria,
        certificate: &Certificate,
    ) -> Result<ProfileAction, ReconcileError> {
        let candidates =
            self.portal
                .list_profiles(criteria.bundle_id, criteria.platform, criteria.distribution)?;

        let mut valid = Vec::new();
        let mut rejected = Vec::new();
        for profile in candidates {
            let reasons = profile_rejection_reasons(&profile, criteria);
            if reasons.is_empty() {
                valid.push(profile);
            } else {
                debug!(
                    "Profile {} ({}) rejected: {}",
                    profile.name,
                    profile.uuid,
                    reasons.join("; ")
                );
                rejected.push(Rejection {
                    uuid: profile.uuid,
                    name: profile.name,
                    reasons,
                });
            }
        }

        if let Some(profile) = valid.into_iter().max_by_key(|p| p.expiration_date) {
            info!(
                "Reusing {} profile {} ({}) for {}",
                criteria.distribution, profile.name, profile.uuid, criteria.bundle_id
            );
            return Ok(ProfileAction::Reuse(profile));
        }

        info!(
            "No valid {} profile for {}, a new one is needed",
            criteria.distribution, criteria.bundle_id
        );
        let device_udids = if criteria.distribution.requires_devices() {
            criteria.devices.to_vec()
        } else {
            Vec::new()
        };
        Ok(ProfileAction::Create {
            request: ProfileRequest {
                name: format!(
                    "autoprovision {} {} - ({})",
                    criteria.platform, criteria.distribution, criteria.bundle_id
                ),
                profile_type: criteria.distribution.profile_type(criteria.platform),
                platform: criteria.platform,
                distribution_type: criteria.distribution,
                team_id: criteria.team_id.to_string(),
                bundle_id: criteria.bundle_id.to_string(),
                certificate_serial: certificate.serial.clone(),
                device_udids,
                entitlements: criteria.entitlements.clone(),
            },
            rejected,
        })
    }

    /// Create the planned profiles and return the final assets.
    pub fn apply(&mut self, plan: Plan) -> Result<Resolution, ReconcileError> {
        let mut distributions = Vec::new();
        for distribution in plan.distributions {
            let mut profiles = BTreeMap::new();
            for (bundle_id, action) in distribution.profiles {
                let profile = match action {
                    ProfileAction::Reuse(profile) => profile,
                    ProfileAction::Create { request, .. } => {
                        if !self.options.generate_profiles {
                            return Err(ReconcileError::GenerationDisabled {
                                bundle_id,
                                distribution: distribution.distribution_type,
                            });
                        }
                        let profile = self.portal.create_profile(&request)?;
                        info!("Created profile {} ({})", profile.name, profile.uuid);
                        profile
                    }
                };
                profiles.insert(bundle_id, profile);
            }
            distributions.push(ResolvedDistribution {
                distribution_type: distribution.distribution_type,
                certificate: distribution.certificate,
                profiles,
            });
        }

        Ok(Resolution {
            team_id: plan.team_id,
            main_bundle_id: plan.main_bundle_id,
            platform: plan.platform,
            distributions,
        })
    }

    /// Plan and apply in one go.
    pub fn reconcile(&mut self, input: &ReconcileInput) -> Result<Resolution, ReconcileError> {
        let plan = self.plan(input)?;
        self.apply(plan)
    }
}
