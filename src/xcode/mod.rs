//! Xcode project model
//!
//! Read-only views of the files that make up an Xcode build graph:
//! - `*.xcscheme` schemes (shared and per-user)
//! - `contents.xcworkspacedata` workspaces
//! - `project.pbxproj` object graphs
//!
//! The textual project grammar itself is not parsed here. Project files are
//! read with the `plist` crate, and OpenStep text files are converted through
//! `plutil` first.

mod convert;
mod pbxproj;
mod scheme;
mod workspace;

pub use convert::{json_to_plist, plist_to_json};
pub use pbxproj::{BuildConfiguration, ProductType, Target, XcodeProject};
pub use scheme::{find_scheme, BuildActionEntry, BuildableReference, Scheme};
pub use workspace::Workspace;

use std::io;
use std::path::PathBuf;

/// Errors raised while reading Xcode project files.
#[derive(Debug, thiserror::Error)]
pub enum XcodeError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Plist {
        path: PathBuf,
        #[source]
        source: plist::Error,
    },

    #[error("failed to parse {path}: {message}")]
    Xml { path: PathBuf, message: String },

    #[error("plutil could not convert {path}: {reason}")]
    Plutil { path: PathBuf, reason: String },

    #[error("scheme '{scheme}' not found in {path}")]
    SchemeNotFound { scheme: String, path: PathBuf },

    #[error("not an Xcode project or workspace: {0}")]
    UnsupportedContainer(PathBuf),

    #[error("invalid container reference '{0}'")]
    InvalidContainerReference(String),

    #[error("invalid project {path}: {reason}")]
    InvalidProject { path: PathBuf, reason: String },
}

impl XcodeError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        XcodeError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn invalid_project(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        XcodeError::InvalidProject {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
