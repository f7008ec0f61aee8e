//! Project helper
//!
//! Opens a project or workspace for a scheme, pins the main (archivable)
//! target and the effective build configuration, and answers the per-target
//! signing queries: build settings, bundle identifier, entitlements,
//! development team and platform.
//!
//! Build settings are fetched through a [`BuildSettingsSource`] at most once
//! per (target, configuration) pair for the lifetime of the helper.

use log::{debug, warn};
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use xcode_build_settings::{contains_reference, expand, BuildSettings, ExpandError, SettingsError};

use crate::entitlements::{Entitlements, EntitlementsError};
use crate::platform::{Platform, PlatformError};
use crate::settings::{BuildSettingsSource, SourceError};
use crate::xcode::{find_scheme, Scheme, Target, XcodeError, XcodeProject};

/// Errors raised by the project helper.
#[derive(Debug, thiserror::Error)]
pub enum ProjectError {
    #[error("project or workspace does not exist at: {0}")]
    PathNotFound(PathBuf),

    #[error(transparent)]
    Xcode(#[from] XcodeError),

    #[error("scheme ({scheme}) has no archive action with an archivable app entry")]
    NotArchivable { scheme: String },

    #[error("main target ({blueprint_id}) of scheme ({scheme}) not found in {project}")]
    MainTargetNotFound {
        scheme: String,
        blueprint_id: String,
        project: PathBuf,
    },

    #[error("no configuration provided nor default defined for the scheme's ({scheme}) archive action")]
    NoConfiguration { scheme: String },

    #[error("build configuration ({configuration}) not defined for target: ({target})")]
    ConfigurationNotFound {
        configuration: String,
        target: String,
    },

    #[error("failed to get build settings of target ({target}) in {configuration}: {source}")]
    BuildSettings {
        target: String,
        configuration: String,
        #[source]
        source: SourceError,
    },

    #[error("invalid build setting of target ({target}) in {configuration}: {source}")]
    Setting {
        target: String,
        configuration: String,
        #[source]
        source: SettingsError,
    },

    #[error("failed to find bundle id of target ({target}) in {configuration}")]
    BundleIdNotFound {
        target: String,
        configuration: String,
    },

    #[error("failed to read Info.plist {path}: {source}")]
    InfoPlist {
        path: PathBuf,
        #[source]
        source: plist::Error,
    },

    #[error("failed to expand {value} for target ({target}) in {configuration}: {source}")]
    Expand {
        target: String,
        configuration: String,
        value: String,
        #[source]
        source: ExpandError,
    },

    #[error("bundle id ({value}) of target ({target}) in {configuration} has unresolved variables")]
    UnresolvedBundleId {
        target: String,
        configuration: String,
        value: String,
    },

    #[error("failed to read entitlements of target ({target}): {source}")]
    Entitlements {
        target: String,
        #[source]
        source: EntitlementsError,
    },

    #[error(transparent)]
    Platform(#[from] PlatformError),
}

/// Development team of the whole project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TeamResolution {
    /// Every target that declares a team agrees on this one
    Determined(String),
    /// Two targets declare different teams
    Ambiguous {
        first_target: String,
        first_team: String,
        target: String,
        team: String,
    },
    /// No target declares a team
    Unset,
}

impl TeamResolution {
    /// The team id, if one could be determined.
    pub fn team_id(&self) -> Option<&str> {
        match self {
            TeamResolution::Determined(id) => Some(id),
            _ => None,
        }
    }

    /// Warning text for two targets that disagree on the team.
    pub fn mismatch_warning(&self) -> Option<String> {
        match self {
            TeamResolution::Ambiguous {
                first_target,
                first_team,
                target,
                team,
            } => Some(format!(
                "{} target team ID ({}) does not match {} target team ID ({}); \
                 embedded binaries must be signed with the same team as the app, \
                 the team is taken from the selected certificates instead",
                target, team, first_target, first_team
            )),
            _ => None,
        }
    }
}

/// Signing queries over one scheme's archivable targets.
pub struct ProjectHelper<S> {
    project: XcodeProject,
    scheme: Scheme,
    main_target: Target,
    archivable_targets: Vec<Target>,
    configuration: String,
    source: S,
    build_settings_cache: HashMap<(String, String), BuildSettings>,
}

impl<S: BuildSettingsSource> ProjectHelper<S> {
    /// Open the project built by `scheme_name` in a project or workspace.
    ///
    /// `configuration` overrides the scheme's archive configuration; `None`
    /// or an empty name selects the scheme default.
    pub fn new(
        path: &Path,
        scheme_name: &str,
        configuration: Option<&str>,
        source: S,
    ) -> Result<Self, ProjectError> {
        if !path.exists() {
            return Err(ProjectError::PathNotFound(path.to_path_buf()));
        }

        let (scheme, container) = find_scheme(path, scheme_name)?;
        let entry = scheme
            .app_build_action_entry()
            .ok_or_else(|| ProjectError::NotArchivable {
                scheme: scheme.name.clone(),
            })?;

        let base_dir = container.parent().unwrap_or_else(|| Path::new(""));
        let project_path = entry
            .buildable_reference
            .referenced_container_path(base_dir)?;
        debug!("Scheme {} builds {}", scheme.name, project_path.display());

        let project = XcodeProject::open(&project_path)?;
        Self::with_project(project, scheme, configuration, source)
    }

    /// Build a helper from an already opened project and its scheme.
    pub fn with_project(
        project: XcodeProject,
        scheme: Scheme,
        configuration: Option<&str>,
        source: S,
    ) -> Result<Self, ProjectError> {
        let blueprint_id = scheme
            .app_build_action_entry()
            .map(|e| e.buildable_reference.blueprint_identifier.clone())
            .ok_or_else(|| ProjectError::NotArchivable {
                scheme: scheme.name.clone(),
            })?;

        let main_target = project
            .target_by_id(&blueprint_id)
            .cloned()
            .ok_or_else(|| ProjectError::MainTargetNotFound {
                scheme: scheme.name.clone(),
                blueprint_id,
                project: project.path.clone(),
            })?;

        let configuration = resolve_configuration(configuration, &scheme, &project)?;

        let mut archivable_targets = vec![main_target.clone()];
        archivable_targets.extend(
            project
                .dependent_executable_product_targets(&main_target)
                .into_iter()
                .cloned(),
        );

        Ok(Self {
            project,
            scheme,
            main_target,
            archivable_targets,
            configuration,
            source,
            build_settings_cache: HashMap::new(),
        })
    }

    pub fn project(&self) -> &XcodeProject {
        &self.project
    }

    pub fn scheme(&self) -> &Scheme {
        &self.scheme
    }

    pub fn main_target(&self) -> &Target {
        &self.main_target
    }

    /// The main target followed by its dependent executable targets.
    pub fn archivable_targets(&self) -> &[Target] {
        &self.archivable_targets
    }

    /// Effective build configuration.
    pub fn configuration(&self) -> &str {
        &self.configuration
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Resolved build settings of `target`, fetched once per configuration.
    pub fn target_build_settings(
        &mut self,
        target: &str,
        configuration: &str,
    ) -> Result<&BuildSettings, ProjectError> {
        let key = (target.to_string(), configuration.to_string());
        match self.build_settings_cache.entry(key) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                debug!("Fetching build settings of {} ({})", target, configuration);
                let settings = self
                    .source
                    .target_build_settings(&self.project, target, configuration)
                    .map_err(|source| ProjectError::BuildSettings {
                        target: target.to_string(),
                        configuration: configuration.to_string(),
                        source,
                    })?;
                Ok(entry.insert(settings))
            }
        }
    }

    /// Bundle identifier of `target`.
    ///
    /// `PRODUCT_BUNDLE_IDENTIFIER` wins; otherwise `CFBundleIdentifier` of the
    /// target's Info.plist, expanded against the build settings.
    pub fn target_bundle_id(
        &mut self,
        target: &str,
        configuration: &str,
    ) -> Result<String, ProjectError> {
        let project_dir = self.project.project_dir();
        let settings = self.target_build_settings(target, configuration)?;
        let setting_err = |source| ProjectError::Setting {
            target: target.to_string(),
            configuration: configuration.to_string(),
            source,
        };

        let bundle_id = match settings
            .non_empty_string("PRODUCT_BUNDLE_IDENTIFIER")
            .map_err(setting_err)?
        {
            Some(id) => id.to_string(),
            None => {
                let info_plist = settings
                    .non_empty_string("INFOPLIST_FILE")
                    .map_err(setting_err)?
                    .ok_or_else(|| ProjectError::BundleIdNotFound {
                        target: target.to_string(),
                        configuration: configuration.to_string(),
                    })?;
                let path = project_dir.join(info_plist);
                let raw = info_plist_bundle_id(&path)?.ok_or_else(|| {
                    ProjectError::BundleIdNotFound {
                        target: target.to_string(),
                        configuration: configuration.to_string(),
                    }
                })?;

                if raw.contains('$') {
                    expand(&raw, settings).map_err(|source| ProjectError::Expand {
                        target: target.to_string(),
                        configuration: configuration.to_string(),
                        value: raw.clone(),
                        source,
                    })?
                } else {
                    raw
                }
            }
        };

        if contains_reference(&bundle_id) {
            return Err(ProjectError::UnresolvedBundleId {
                target: target.to_string(),
                configuration: configuration.to_string(),
                value: bundle_id,
            });
        }
        Ok(bundle_id)
    }

    /// Normalized entitlements of `target`.
    ///
    /// The path comes from the resolved `CODE_SIGN_ENTITLEMENTS`. Only when
    /// the resolved value still holds a reference is the value written in
    /// the target's build configuration expanded instead. A target without
    /// the setting has no entitlements; a declared file that cannot be read
    /// is an error.
    pub fn target_entitlements(
        &mut self,
        target: &str,
        configuration: &str,
        bundle_id: &str,
    ) -> Result<Entitlements, ProjectError> {
        let setting_err = |source| ProjectError::Setting {
            target: target.to_string(),
            configuration: configuration.to_string(),
            source,
        };

        let resolved = self
            .target_build_settings(target, configuration)?
            .non_empty_string("CODE_SIGN_ENTITLEMENTS")
            .map_err(setting_err)?
            .map(str::to_string);
        let Some(resolved) = resolved else {
            debug!("Target {} has no entitlements", target);
            return Ok(Entitlements::new());
        };

        let relative = if contains_reference(&resolved) {
            let declared = self
                .project
                .target(target)
                .and_then(|t| t.build_configuration(configuration))
                .and_then(|c| c.build_settings.non_empty_string("CODE_SIGN_ENTITLEMENTS").ok())
                .flatten()
                .map(str::to_string);
            let raw = declared.unwrap_or(resolved);
            if contains_reference(&raw) {
                let settings = self.target_build_settings(target, configuration)?;
                expand(&raw, settings).map_err(|source| ProjectError::Expand {
                    target: target.to_string(),
                    configuration: configuration.to_string(),
                    value: raw.clone(),
                    source,
                })?
            } else {
                raw
            }
        } else {
            resolved
        };

        let path = self.project.project_dir().join(relative);
        debug!("Reading entitlements of {} from {}", target, path.display());
        let entitlements_err = |source| ProjectError::Entitlements {
            target: target.to_string(),
            source,
        };
        Entitlements::from_file(&path)
            .and_then(|e| e.normalize(bundle_id))
            .map_err(entitlements_err)
    }

    /// Development team shared by every target of the project.
    ///
    /// Each target's team comes from `DEVELOPMENT_TEAM`, falling back to the
    /// `DevelopmentTeam` target attribute. Disagreeing targets make the
    /// result ambiguous.
    pub fn project_team_id(&mut self, configuration: &str) -> TeamResolution {
        let targets: Vec<(String, String)> = self
            .project
            .targets
            .iter()
            .map(|t| (t.id.clone(), t.name.clone()))
            .collect();

        let mut found: Option<(String, String)> = None;
        for (id, name) in targets {
            let from_settings = match self.target_build_settings(&name, configuration) {
                Ok(settings) => settings
                    .non_empty_string("DEVELOPMENT_TEAM")
                    .ok()
                    .flatten()
                    .map(str::to_string),
                Err(e) => {
                    debug!("{}", e);
                    None
                }
            };

            let team = match from_settings {
                Some(team) => {
                    debug!("{} target build settings team ID: {}", name, team);
                    team
                }
                None => {
                    debug!("{} target build settings team ID is empty, looking for target attribute", name);
                    match self
                        .project
                        .target_attribute(&id, "DevelopmentTeam")
                        .filter(|t| !t.is_empty())
                    {
                        Some(team) => team.to_string(),
                        None => {
                            debug!("{} target attributes team ID is empty", name);
                            continue;
                        }
                    }
                }
            };

            let Some((first_target, first_team)) = &found else {
                found = Some((name, team));
                continue;
            };
            if *first_team != team {
                let resolution = TeamResolution::Ambiguous {
                    first_target: first_target.clone(),
                    first_team: first_team.clone(),
                    target: name,
                    team,
                };
                if let Some(message) = resolution.mismatch_warning() {
                    warn!("{}", message);
                }
                return resolution;
            }
        }

        match found {
            Some((_, team)) => TeamResolution::Determined(team),
            None => TeamResolution::Unset,
        }
    }

    /// Platform of the main target.
    pub fn platform(&mut self, configuration: &str) -> Result<Platform, ProjectError> {
        let target = self.main_target.name.clone();
        let settings = self.target_build_settings(&target, configuration)?;
        let name = settings
            .string("PLATFORM_DISPLAY_NAME")
            .map_err(|source| ProjectError::Setting {
                target: target.clone(),
                configuration: configuration.to_string(),
                source,
            })?;
        Ok(Platform::from_display_name(name)?)
    }

    /// `CODE_SIGN_IDENTITY` of `target`; empty when unset.
    pub fn target_codesign_identity(
        &mut self,
        target: &str,
        configuration: &str,
    ) -> Result<String, ProjectError> {
        let settings = self.target_build_settings(target, configuration)?;
        let identity = settings
            .non_empty_string("CODE_SIGN_IDENTITY")
            .map_err(|source| ProjectError::Setting {
                target: target.to_string(),
                configuration: configuration.to_string(),
                source,
            })?;
        Ok(identity.unwrap_or_default().to_string())
    }

    /// Bundle identifier of the main target in the effective configuration.
    pub fn main_target_bundle_id(&mut self) -> Result<String, ProjectError> {
        let target = self.main_target.name.clone();
        let configuration = self.configuration.clone();
        self.target_bundle_id(&target, &configuration)
    }

    /// Bundle id to normalized entitlements for every archivable target.
    pub fn archivable_target_bundle_id_to_entitlements(
        &mut self,
    ) -> Result<BTreeMap<String, Entitlements>, ProjectError> {
        let configuration = self.configuration.clone();
        let names: Vec<String> = self
            .archivable_targets
            .iter()
            .map(|t| t.name.clone())
            .collect();

        let mut map = BTreeMap::new();
        for name in names {
            let bundle_id = self.target_bundle_id(&name, &configuration)?;
            let entitlements = self.target_entitlements(&name, &configuration, &bundle_id)?;
            debug!(
                "Target {} ({}) has {} entitlements",
                name,
                bundle_id,
                entitlements.len()
            );
            map.insert(bundle_id, entitlements);
        }
        Ok(map)
    }
}

/// Effective configuration: the user's choice when given, otherwise the
/// scheme's archive default. An override must exist in every target.
fn resolve_configuration(
    requested: Option<&str>,
    scheme: &Scheme,
    project: &XcodeProject,
) -> Result<String, ProjectError> {
    let default = scheme.archive_build_configuration.as_deref();
    let requested = requested.filter(|c| !c.is_empty());

    match (requested, default) {
        (None, Some(default)) => Ok(default.to_string()),
        (None, None) => Err(ProjectError::NoConfiguration {
            scheme: scheme.name.clone(),
        }),
        (Some(requested), Some(default)) if requested == default => Ok(requested.to_string()),
        (Some(requested), default) => {
            for target in &project.targets {
                if target.build_configuration(requested).is_none() {
                    return Err(ProjectError::ConfigurationNotFound {
                        configuration: requested.to_string(),
                        target: target.name.clone(),
                    });
                }
            }
            warn!(
                "Using user defined build configuration: {} instead of the scheme's default one: {}. Make sure you use the same configuration in further steps.",
                requested,
                default.unwrap_or("")
            );
            Ok(requested.to_string())
        }
    }
}

/// `CFBundleIdentifier` of an Info.plist, if set.
fn info_plist_bundle_id(path: &Path) -> Result<Option<String>, ProjectError> {
    let value = plist::Value::from_file(path).map_err(|source| ProjectError::InfoPlist {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(value
        .as_dictionary()
        .and_then(|d| d.get("CFBundleIdentifier"))
        .and_then(|v| v.as_string())
        .filter(|s| !s.is_empty())
        .map(str::to_string))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xcode::{BuildActionEntry, BuildConfiguration, BuildableReference, ProductType};
    use std::cell::Cell;

    /// Serves canned settings and counts fetches.
    struct CountingSource {
        calls: Cell<usize>,
        settings: HashMap<String, BuildSettings>,
    }

    impl CountingSource {
        fn new(settings: &[(&str, BuildSettings)]) -> Self {
            Self {
                calls: Cell::new(0),
                settings: settings
                    .iter()
                    .map(|(target, settings)| (target.to_string(), settings.clone()))
                    .collect(),
            }
        }
    }

    fn settings(pairs: &[(&str, &str)]) -> BuildSettings {
        pairs.iter().map(|(k, v)| (*k, *v)).collect()
    }

    impl BuildSettingsSource for CountingSource {
        fn target_build_settings(
            &self,
            _project: &XcodeProject,
            target: &str,
            _configuration: &str,
        ) -> Result<BuildSettings, SourceError> {
            self.calls.set(self.calls.get() + 1);
            self.settings
                .get(target)
                .cloned()
                .ok_or_else(|| SourceError::UnknownTarget(target.to_string()))
        }
    }

    fn configs(names: &[&str]) -> Vec<BuildConfiguration> {
        names
            .iter()
            .map(|n| BuildConfiguration {
                name: n.to_string(),
                build_settings: BuildSettings::new(),
            })
            .collect()
    }

    fn target(id: &str, name: &str, product_type: ProductType, deps: &[&str]) -> Target {
        Target {
            id: id.to_string(),
            name: name.to_string(),
            product_type,
            product_path: None,
            build_configurations: configs(&["Debug", "Release"]),
            default_configuration_name: Some("Release".to_string()),
            dependency_ids: deps.iter().map(|d| d.to_string()).collect(),
        }
    }

    fn project() -> XcodeProject {
        let mut attrs = plist::Dictionary::new();
        attrs.insert(
            "DevelopmentTeam".to_string(),
            plist::Value::String("ATTRTEAM".to_string()),
        );
        XcodeProject {
            path: PathBuf::from("/work/App.xcodeproj"),
            build_configurations: configs(&["Debug", "Release"]),
            targets: vec![
                target("APP", "App", ProductType::Application, &["EXT", "FW"]),
                target("EXT", "Ext", ProductType::AppExtension, &[]),
                target("FW", "Kit", ProductType::Framework, &[]),
            ],
            target_attributes: [("EXT".to_string(), attrs)].into_iter().collect(),
        }
    }

    fn scheme(archive_config: Option<&str>) -> Scheme {
        Scheme {
            name: "App".to_string(),
            path: PathBuf::from("/work/App.xcodeproj/xcshareddata/xcschemes/App.xcscheme"),
            build_action_entries: vec![BuildActionEntry {
                build_for_archiving: true,
                buildable_reference: BuildableReference {
                    blueprint_identifier: "APP".to_string(),
                    buildable_name: "App.app".to_string(),
                    blueprint_name: "App".to_string(),
                    referenced_container: "container:App.xcodeproj".to_string(),
                },
            }],
            has_archive_action: true,
            archive_build_configuration: archive_config.map(str::to_string),
        }
    }

    fn helper(source: CountingSource) -> ProjectHelper<CountingSource> {
        ProjectHelper::with_project(project(), scheme(Some("Release")), None, source).unwrap()
    }

    #[test]
    fn test_main_target_and_archivable_targets() {
        let helper = helper(CountingSource::new(&[]));
        assert_eq!(helper.main_target().name, "App");
        let names: Vec<&str> = helper
            .archivable_targets()
            .iter()
            .map(|t| t.name.as_str())
            .collect();
        assert_eq!(names, vec!["App", "Ext"]);
        assert_eq!(helper.configuration(), "Release");
    }

    #[test]
    fn test_configuration_resolution() {
        let source = || CountingSource::new(&[]);
        let h = ProjectHelper::with_project(project(), scheme(Some("Release")), Some(""), source())
            .unwrap();
        assert_eq!(h.configuration(), "Release");

        let h = ProjectHelper::with_project(project(), scheme(Some("Release")), Some("Debug"), source())
            .unwrap();
        assert_eq!(h.configuration(), "Debug");

        let err = ProjectHelper::with_project(project(), scheme(Some("Release")), Some("Beta"), source())
            .err()
            .unwrap();
        assert!(matches!(err, ProjectError::ConfigurationNotFound { .. }));

        let err = ProjectHelper::with_project(project(), scheme(None), None, source())
            .err()
            .unwrap();
        assert!(matches!(err, ProjectError::NoConfiguration { .. }));
    }

    #[test]
    fn test_non_archivable_scheme() {
        let mut s = scheme(Some("Release"));
        s.has_archive_action = false;
        let err = ProjectHelper::with_project(project(), s, None, CountingSource::new(&[]))
            .err()
            .unwrap();
        assert!(matches!(err, ProjectError::NotArchivable { .. }));
    }

    #[test]
    fn test_main_target_must_exist() {
        let mut s = scheme(Some("Release"));
        s.build_action_entries[0].buildable_reference.blueprint_identifier = "GONE".to_string();
        let err = ProjectHelper::with_project(project(), s, None, CountingSource::new(&[]))
            .err()
            .unwrap();
        assert!(matches!(err, ProjectError::MainTargetNotFound { .. }));
    }

    #[test]
    fn test_build_settings_fetched_once_per_pair() {
        let mut helper = helper(CountingSource::new(&[(
            "App",
            settings(&[("SDKROOT", "iphoneos")]),
        )]));

        helper.target_build_settings("App", "Release").unwrap();
        helper.target_build_settings("App", "Release").unwrap();
        assert_eq!(helper.source().calls.get(), 1);

        helper.target_build_settings("App", "Debug").unwrap();
        assert_eq!(helper.source().calls.get(), 2);
    }

    #[test]
    fn test_bundle_id_from_build_setting() {
        let mut helper = helper(CountingSource::new(&[(
            "App",
            settings(&[
                ("PRODUCT_BUNDLE_IDENTIFIER", "com.example.app"),
                ("INFOPLIST_FILE", "Missing/Info.plist"),
            ]),
        )]));
        assert_eq!(helper.main_target_bundle_id().unwrap(), "com.example.app");
    }

    #[test]
    fn test_bundle_id_not_found() {
        let mut helper = helper(CountingSource::new(&[("App", settings(&[]))]));
        assert!(matches!(
            helper.target_bundle_id("App", "Release"),
            Err(ProjectError::BundleIdNotFound { .. })
        ));
    }

    #[test]
    fn test_bundle_id_with_residual_reference() {
        let mut helper = helper(CountingSource::new(&[(
            "App",
            settings(&[("PRODUCT_BUNDLE_IDENTIFIER", "com.example.$(PRODUCT_NAME)")]),
        )]));
        assert!(matches!(
            helper.target_bundle_id("App", "Release"),
            Err(ProjectError::UnresolvedBundleId { .. })
        ));
    }

    #[test]
    fn test_team_id_agreement_with_attribute_fallback() {
        let mut helper = helper(CountingSource::new(&[
            ("App", settings(&[("DEVELOPMENT_TEAM", "ATTRTEAM")])),
            ("Ext", settings(&[])),
            ("Kit", settings(&[])),
        ]));
        let team = helper.project_team_id("Release");
        assert_eq!(team, TeamResolution::Determined("ATTRTEAM".to_string()));
        assert_eq!(team.team_id(), Some("ATTRTEAM"));
    }

    #[test]
    fn test_team_id_mismatch_is_ambiguous() {
        let mut helper = helper(CountingSource::new(&[
            ("App", settings(&[("DEVELOPMENT_TEAM", "AAAA")])),
            ("Ext", settings(&[("DEVELOPMENT_TEAM", "BBBB")])),
            ("Kit", settings(&[])),
        ]));
        let team = helper.project_team_id("Release");
        assert_eq!(
            team,
            TeamResolution::Ambiguous {
                first_target: "App".to_string(),
                first_team: "AAAA".to_string(),
                target: "Ext".to_string(),
                team: "BBBB".to_string(),
            }
        );
        assert_eq!(team.team_id(), None);

        let warning = team.mismatch_warning().unwrap();
        assert!(warning.starts_with("Ext target team ID (BBBB) does not match App target team ID (AAAA)"));
        assert!(warning.contains("embedded binaries"));
        assert_eq!(TeamResolution::Unset.mismatch_warning(), None);
    }

    #[test]
    fn test_team_id_unset() {
        let mut p = project();
        p.target_attributes.clear();
        let mut helper = ProjectHelper::with_project(
            p,
            scheme(Some("Release")),
            None,
            CountingSource::new(&[("App", settings(&[])), ("Ext", settings(&[]))]),
        )
        .unwrap();
        // Kit has no settings at all; the fetch error is tolerated
        assert_eq!(helper.project_team_id("Release"), TeamResolution::Unset);
    }

    #[test]
    fn test_platform() {
        let mut helper = helper(CountingSource::new(&[(
            "App",
            settings(&[("PLATFORM_DISPLAY_NAME", "tvOS")]),
        )]));
        assert_eq!(helper.platform("Release").unwrap(), Platform::TvOs);

        let mut helper = self::helper(CountingSource::new(&[(
            "App",
            settings(&[("PLATFORM_DISPLAY_NAME", "watchOS")]),
        )]));
        assert!(matches!(
            helper.platform("Release"),
            Err(ProjectError::Platform(_))
        ));

        let mut helper = self::helper(CountingSource::new(&[("App", settings(&[]))]));
        assert!(matches!(
            helper.platform("Release"),
            Err(ProjectError::Setting { .. })
        ));
    }

    #[test]
    fn test_entitlements_absent_is_empty() {
        let mut helper = helper(CountingSource::new(&[("App", settings(&[]))]));
        let entitlements = helper
            .target_entitlements("App", "Release", "com.example.app")
            .unwrap();
        assert!(entitlements.is_empty());
    }

    /// Helper over a project in `dir` whose App target declares `declared`
    /// as its entitlements path, with `App/App.entitlements` on disk.
    fn entitlements_helper(
        dir: &Path,
        declared: &str,
        resolved: &[(&str, &str)],
    ) -> ProjectHelper<CountingSource> {
        let mut entitlements = plist::Dictionary::new();
        entitlements.insert(
            "com.apple.security.application-groups".to_string(),
            plist::Value::Array(vec![plist::Value::String("group.com.example".to_string())]),
        );
        std::fs::create_dir_all(dir.join("App")).unwrap();
        plist::Value::Dictionary(entitlements)
            .to_file_xml(dir.join("App/App.entitlements"))
            .unwrap();

        let mut p = project();
        p.path = dir.join("App.xcodeproj");
        p.targets[0].build_configurations[1]
            .build_settings
            .insert("CODE_SIGN_ENTITLEMENTS", declared);
        ProjectHelper::with_project(
            p,
            scheme(Some("Release")),
            None,
            CountingSource::new(&[("App", settings(resolved))]),
        )
        .unwrap()
    }

    #[test]
    fn test_entitlements_path_from_resolved_settings() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut helper = entitlements_helper(
            dir.path(),
            "$(TARGET_NAME)/$(TARGET_NAME).entitlements",
            &[("CODE_SIGN_ENTITLEMENTS", "App/App.entitlements")],
        );

        let entitlements = helper
            .target_entitlements("App", "Release", "com.example.app")
            .unwrap();
        assert!(entitlements.contains_key("com.apple.security.application-groups"));
    }

    #[test]
    fn test_entitlements_path_with_reference_expands_declared_value() {
        let dir = tempfile::TempDir::new().unwrap();
        let srcroot = dir.path().to_string_lossy().to_string();
        let mut helper = entitlements_helper(
            dir.path(),
            "$(SRCROOT)/App/App.entitlements",
            &[
                ("CODE_SIGN_ENTITLEMENTS", "$(SRCROOT)/App/App.entitlements"),
                ("SRCROOT", srcroot.as_str()),
            ],
        );

        let entitlements = helper
            .target_entitlements("App", "Release", "com.example.app")
            .unwrap();
        assert_eq!(entitlements.len(), 1);
    }

    #[test]
    fn test_entitlements_path_with_unresolved_references_fails() {
        let dir = tempfile::TempDir::new().unwrap();
        let raw = "$(TARGET_NAME)/$(TARGET_NAME).entitlements";
        let mut helper = entitlements_helper(dir.path(), raw, &[("CODE_SIGN_ENTITLEMENTS", raw)]);

        assert!(matches!(
            helper.target_entitlements("App", "Release", "com.example.app"),
            Err(ProjectError::Expand {
                source: ExpandError::MultipleReferences(_),
                ..
            })
        ));
    }

    #[test]
    fn test_codesign_identity() {
        let mut helper = helper(CountingSource::new(&[
            ("App", settings(&[("CODE_SIGN_IDENTITY", "iPhone Developer")])),
            ("Ext", settings(&[])),
        ]));
        assert_eq!(
            helper.target_codesign_identity("App", "Release").unwrap(),
            "iPhone Developer"
        );
        assert_eq!(helper.target_codesign_identity("Ext", "Release").unwrap(), "");
    }
}
