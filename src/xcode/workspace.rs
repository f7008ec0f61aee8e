//! Workspace (`contents.xcworkspacedata`) reading.

use serde::Deserialize;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use super::XcodeError;

/// An Xcode workspace and the file references it lists.
#[derive(Debug, Clone, PartialEq)]
pub struct Workspace {
    /// Path of the `.xcworkspace` directory
    pub path: PathBuf,

    /// Resolved paths of every file reference, groups flattened
    pub file_refs: Vec<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct WorkspaceXml {
    #[serde(rename = "FileRef", default)]
    file_refs: Vec<FileRefXml>,
    #[serde(rename = "Group", default)]
    groups: Vec<GroupXml>,
}

#[derive(Debug, Deserialize)]
struct GroupXml {
    #[serde(default)]
    location: Option<String>,
    #[serde(rename = "FileRef", default)]
    file_refs: Vec<FileRefXml>,
    #[serde(rename = "Group", default)]
    groups: Vec<GroupXml>,
}

#[derive(Debug, Deserialize)]
struct FileRefXml {
    #[serde(default)]
    location: String,
}

impl Workspace {
    /// Open a `.xcworkspace` directory.
    pub fn open(path: &Path) -> Result<Self, XcodeError> {
        let contents = path.join("contents.xcworkspacedata");
        let file = File::open(&contents).map_err(|e| XcodeError::io(&contents, e))?;
        Self::from_reader(path, BufReader::new(file))
    }

    /// Parse workspace XML for a workspace located at `path`.
    pub fn from_reader(path: &Path, reader: impl Read) -> Result<Self, XcodeError> {
        let mut de = serde_xml_rs::Deserializer::new_from_reader(reader)
            .non_contiguous_seq_elements(true);
        let xml = WorkspaceXml::deserialize(&mut de).map_err(|e| XcodeError::Xml {
            path: path.join("contents.xcworkspacedata"),
            message: e.to_string(),
        })?;

        let container_dir = path.parent().unwrap_or_else(|| Path::new("")).to_path_buf();
        let mut file_refs = Vec::new();
        collect_refs(
            &container_dir,
            &container_dir,
            &xml.file_refs,
            &xml.groups,
            &mut file_refs,
        );

        Ok(Self {
            path: path.to_path_buf(),
            file_refs,
        })
    }

    /// File references that point at `.xcodeproj` bundles.
    pub fn project_paths(&self) -> Vec<PathBuf> {
        self.file_refs
            .iter()
            .filter(|p| p.extension().map(|e| e == "xcodeproj").unwrap_or(false))
            .cloned()
            .collect()
    }
}

fn collect_refs(
    container_dir: &Path,
    group_dir: &Path,
    file_refs: &[FileRefXml],
    groups: &[GroupXml],
    out: &mut Vec<PathBuf>,
) {
    for file_ref in file_refs {
        if let Some(path) = resolve_location(container_dir, group_dir, &file_ref.location) {
            out.push(path);
        }
    }

    for group in groups {
        let dir = group
            .location
            .as_deref()
            .and_then(|loc| resolve_location(container_dir, group_dir, loc))
            .unwrap_or_else(|| group_dir.to_path_buf());
        collect_refs(container_dir, &dir, &group.file_refs, &group.groups, out);
    }
}

/// Resolve a workspace location string (`group:`, `container:`,
/// `absolute:` or `self:`).
fn resolve_location(container_dir: &Path, group_dir: &Path, location: &str) -> Option<PathBuf> {
    let (kind, rest) = location.split_once(':')?;
    match kind {
        "group" => Some(group_dir.join(rest)),
        "container" => Some(container_dir.join(rest)),
        "absolute" => Some(PathBuf::from(rest)),
        // Embedded project.xcworkspace: the container is the project itself
        "self" => Some(container_dir.to_path_buf()),
        _ => None,
    }
}
