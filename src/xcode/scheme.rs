//! Scheme (`.xcscheme`) reading and lookup
//!
//! Schemes live either in `xcshareddata/xcschemes` (shared) or in
//! `xcuserdata/<user>.xcuserdatad/xcschemes` (per user) of a project or a
//! workspace. Only the parts needed for signing are modeled: the build
//! action entries and the archive action's configuration.

use log::debug;
use serde::Deserialize;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use super::workspace::Workspace;
use super::XcodeError;

/// A parsed Xcode scheme.
#[derive(Debug, Clone, PartialEq)]
pub struct Scheme {
    /// Scheme name (file stem of the `.xcscheme`)
    pub name: String,

    /// Path of the `.xcscheme` file
    pub path: PathBuf,

    /// Build action entries in declaration order
    pub build_action_entries: Vec<BuildActionEntry>,

    /// Whether the scheme declares an archive action at all
    pub has_archive_action: bool,

    /// Default configuration of the archive action
    pub archive_build_configuration: Option<String>,
}

/// One `BuildActionEntry` of a scheme's build action.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildActionEntry {
    pub build_for_archiving: bool,
    pub buildable_reference: BuildableReference,
}

/// Reference from a scheme to a target in some project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildableReference {
    pub blueprint_identifier: String,
    pub buildable_name: String,
    pub blueprint_name: String,
    /// e.g. `container:MyApp.xcodeproj`
    pub referenced_container: String,
}

impl BuildableReference {
    /// Whether the reference builds an application bundle.
    pub fn is_app_reference(&self) -> bool {
        Path::new(&self.buildable_name)
            .extension()
            .map(|ext| ext == "app")
            .unwrap_or(false)
    }

    /// Resolve `ReferencedContainer` against the directory holding the
    /// scheme's container.
    pub fn referenced_container_path(&self, base_dir: &Path) -> Result<PathBuf, XcodeError> {
        let relative = self
            .referenced_container
            .strip_prefix("container:")
            .filter(|rest| !rest.is_empty())
            .ok_or_else(|| XcodeError::InvalidContainerReference(self.referenced_container.clone()))?;

        let path = Path::new(relative);
        if path.is_absolute() {
            Ok(path.to_path_buf())
        } else {
            Ok(base_dir.join(path))
        }
    }
}

// Serde mirror of the scheme XML. serde-xml-rs exposes attributes as fields.

#[derive(Debug, Deserialize)]
struct SchemeXml {
    #[serde(rename = "BuildAction")]
    build_action: Option<BuildActionXml>,
    #[serde(rename = "ArchiveAction")]
    archive_action: Option<ArchiveActionXml>,
}

#[derive(Debug, Deserialize)]
struct BuildActionXml {
    #[serde(rename = "BuildActionEntries")]
    entries: Option<BuildActionEntriesXml>,
}

#[derive(Debug, Deserialize)]
struct BuildActionEntriesXml {
    #[serde(rename = "BuildActionEntry", default)]
    entries: Vec<BuildActionEntryXml>,
}

#[derive(Debug, Deserialize)]
struct BuildActionEntryXml {
    #[serde(rename = "buildForArchiving")]
    build_for_archiving: Option<String>,
    #[serde(rename = "BuildableReference")]
    buildable_reference: Option<BuildableReferenceXml>,
}

#[derive(Debug, Deserialize)]
struct BuildableReferenceXml {
    #[serde(rename = "BlueprintIdentifier", default)]
    blueprint_identifier: String,
    #[serde(rename = "BuildableName", default)]
    buildable_name: String,
    #[serde(rename = "BlueprintName", default)]
    blueprint_name: String,
    #[serde(rename = "ReferencedContainer", default)]
    referenced_container: String,
}

#[derive(Debug, Deserialize)]
struct ArchiveActionXml {
    #[serde(rename = "buildConfiguration")]
    build_configuration: Option<String>,
}

impl Scheme {
    /// Read a scheme from an `.xcscheme` file.
    pub fn open(path: &Path) -> Result<Self, XcodeError> {
        let file = File::open(path).map_err(|e| XcodeError::io(path, e))?;
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        Self::from_reader(name, path, BufReader::new(file))
    }

    /// Parse scheme XML.
    pub fn from_reader(
        name: impl Into<String>,
        path: &Path,
        reader: impl Read,
    ) -> Result<Self, XcodeError> {
        let mut de = serde_xml_rs::Deserializer::new_from_reader(reader)
            .non_contiguous_seq_elements(true);
        let xml = SchemeXml::deserialize(&mut de).map_err(|e| XcodeError::Xml {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        let build_action_entries = xml
            .build_action
            .and_then(|a| a.entries)
            .map(|e| e.entries)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|entry| {
                let reference = entry.buildable_reference?;
                Some(BuildActionEntry {
                    build_for_archiving: entry
                        .build_for_archiving
                        .map(|v| v.eq_ignore_ascii_case("YES"))
                        .unwrap_or(false),
                    buildable_reference: BuildableReference {
                        blueprint_identifier: reference.blueprint_identifier,
                        buildable_name: reference.buildable_name,
                        blueprint_name: reference.blueprint_name,
                        referenced_container: reference.referenced_container,
                    },
                })
            })
            .collect();

        Ok(Self {
            name: name.into(),
            path: path.to_path_buf(),
            build_action_entries,
            has_archive_action: xml.archive_action.is_some(),
            archive_build_configuration: xml
                .archive_action
                .and_then(|a| a.build_configuration)
                .filter(|c| !c.is_empty()),
        })
    }

    /// The archivable entry that builds the app product.
    pub fn app_build_action_entry(&self) -> Option<&BuildActionEntry> {
        if !self.has_archive_action {
            return None;
        }
        self.build_action_entries
            .iter()
            .find(|e| e.build_for_archiving && e.buildable_reference.is_app_reference())
    }
}

/// All `.xcscheme` files of a container, shared schemes first.
fn scheme_paths(container: &Path) -> Vec<PathBuf> {
    let mut shared = Vec::new();
    let mut user = Vec::new();

    for entry in WalkDir::new(container)
        .max_depth(4)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        if path.extension().map(|e| e != "xcscheme").unwrap_or(true) {
            continue;
        }
        let in_schemes_dir = path
            .parent()
            .and_then(|p| p.file_name())
            .map(|n| n == "xcschemes")
            .unwrap_or(false);
        if !in_schemes_dir {
            continue;
        }

        if path.components().any(|c| c.as_os_str() == "xcuserdata") {
            user.push(path.to_path_buf());
        } else {
            shared.push(path.to_path_buf());
        }
    }

    shared.sort();
    user.sort();
    shared.extend(user);
    shared
}

/// Look up a scheme by name in a single container.
fn scheme_in_container(container: &Path, name: &str) -> Result<Option<Scheme>, XcodeError> {
    for path in scheme_paths(container) {
        let stem = path.file_stem().map(|s| s.to_string_lossy().to_string());
        if stem.as_deref() == Some(name) {
            debug!("Found scheme '{}' at {}", name, path.display());
            return Scheme::open(&path).map(Some);
        }
    }
    Ok(None)
}

/// Find a scheme in a project or workspace.
///
/// Returns the scheme together with the container (`.xcodeproj` or
/// `.xcworkspace`) it was found in. Workspace schemes take precedence over
/// schemes of the projects the workspace references.
pub fn find_scheme(path: &Path, name: &str) -> Result<(Scheme, PathBuf), XcodeError> {
    let not_found = || XcodeError::SchemeNotFound {
        scheme: name.to_string(),
        path: path.to_path_buf(),
    };

    match path.extension().and_then(|e| e.to_str()) {
        Some("xcodeproj") => scheme_in_container(path, name)?
            .map(|s| (s, path.to_path_buf()))
            .ok_or_else(not_found),
        Some("xcworkspace") => {
            if let Some(scheme) = scheme_in_container(path, name)? {
                return Ok((scheme, path.to_path_buf()));
            }

            let workspace = Workspace::open(path)?;
            for project in workspace.project_paths() {
                if let Some(scheme) = scheme_in_container(&project, name)? {
                    return Ok((scheme, project));
                }
            }
            Err(not_found())
        }
        _ => Err(XcodeError::UnsupportedContainer(path.to_path_buf())),
    }
}
