//! `project.pbxproj` object graph
//!
//! Walks the `objects` table of a project file starting at `rootObject` and
//! builds targets, build configuration lists, target dependencies and the
//! per-target attributes Xcode stores on the project object.

use log::debug;
use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::process::Command;
use xcode_build_settings::BuildSettings;

use super::convert::plist_to_json;
use super::XcodeError;

/// Product type of a target (`productType` in the project file).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProductType {
    Application,
    AppExtension,
    MessagesExtension,
    TvExtension,
    WatchApp,
    Watch2App,
    Watch2AppContainer,
    WatchExtension,
    Watch2Extension,
    Framework,
    StaticLibrary,
    DynamicLibrary,
    Bundle,
    UnitTest,
    UiTest,
    Tool,
    /// Aggregate and legacy targets have no product type
    None,
    Other(String),
}

impl ProductType {
    pub fn from_identifier(identifier: &str) -> Self {
        match identifier {
            "com.apple.product-type.application" => ProductType::Application,
            "com.apple.product-type.app-extension" => ProductType::AppExtension,
            "com.apple.product-type.app-extension.messages" => ProductType::MessagesExtension,
            "com.apple.product-type.tv-app-extension" => ProductType::TvExtension,
            "com.apple.product-type.application.watchapp" => ProductType::WatchApp,
            "com.apple.product-type.application.watchapp2" => ProductType::Watch2App,
            "com.apple.product-type.application.watchapp2-container" => {
                ProductType::Watch2AppContainer
            }
            "com.apple.product-type.watchkit-extension" => ProductType::WatchExtension,
            "com.apple.product-type.watchkit2-extension" => ProductType::Watch2Extension,
            "com.apple.product-type.framework" => ProductType::Framework,
            "com.apple.product-type.library.static" => ProductType::StaticLibrary,
            "com.apple.product-type.library.dynamic" => ProductType::DynamicLibrary,
            "com.apple.product-type.bundle" => ProductType::Bundle,
            "com.apple.product-type.bundle.unit-test" => ProductType::UnitTest,
            "com.apple.product-type.bundle.ui-testing" => ProductType::UiTest,
            "com.apple.product-type.tool" => ProductType::Tool,
            other => ProductType::Other(other.to_string()),
        }
    }

    /// Whether the product is an executable bundle embedded in (or being) an app.
    pub fn is_executable(&self) -> bool {
        matches!(
            self,
            ProductType::Application
                | ProductType::AppExtension
                | ProductType::MessagesExtension
                | ProductType::TvExtension
                | ProductType::WatchApp
                | ProductType::Watch2App
                | ProductType::Watch2AppContainer
                | ProductType::WatchExtension
                | ProductType::Watch2Extension
        )
    }
}

/// A named build configuration with its raw (unresolved) build settings.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildConfiguration {
    pub name: String,
    pub build_settings: BuildSettings,
}

/// A target of the project.
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    /// Object identifier (the scheme's `BlueprintIdentifier`)
    pub id: String,
    pub name: String,
    pub product_type: ProductType,
    /// Path of the product file reference, e.g. `App.app`
    pub product_path: Option<String>,
    pub build_configurations: Vec<BuildConfiguration>,
    pub default_configuration_name: Option<String>,
    /// Identifiers of targets this target depends on, in declaration order
    pub dependency_ids: Vec<String>,
}

impl Target {
    pub fn configuration_names(&self) -> Vec<&str> {
        self.build_configurations.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn build_configuration(&self, name: &str) -> Option<&BuildConfiguration> {
        self.build_configurations.iter().find(|c| c.name == name)
    }

    /// Whether the target produces an `.app` or `.appex` bundle.
    pub fn is_executable_product(&self) -> bool {
        if self.product_type.is_executable() {
            return true;
        }
        self.product_path
            .as_deref()
            .and_then(|p| Path::new(p).extension())
            .map(|ext| ext == "app" || ext == "appex")
            .unwrap_or(false)
    }
}

/// A parsed `.xcodeproj`.
#[derive(Debug, Clone, PartialEq)]
pub struct XcodeProject {
    /// Path of the `.xcodeproj` directory
    pub path: PathBuf,
    /// Project-level build configurations
    pub build_configurations: Vec<BuildConfiguration>,
    /// Targets in project order
    pub targets: Vec<Target>,
    /// `attributes.TargetAttributes`, keyed by target identifier
    pub target_attributes: HashMap<String, plist::Dictionary>,
}

impl XcodeProject {
    /// Open a `.xcodeproj` bundle.
    pub fn open(path: &Path) -> Result<Self, XcodeError> {
        if path.extension().map(|e| e != "xcodeproj").unwrap_or(true) {
            return Err(XcodeError::UnsupportedContainer(path.to_path_buf()));
        }
        let pbxproj = path.join("project.pbxproj");
        let root = read_project_file(&pbxproj)?;
        Self::from_plist(path, &root)
    }

    /// Build the model from an already parsed project file.
    pub fn from_plist(path: &Path, root: &plist::Value) -> Result<Self, XcodeError> {
        let graph = ObjectGraph::new(path, root)?;
        let project = graph.object(graph.root_id)?;

        let build_configurations = match str_field(project, "buildConfigurationList") {
            Some(list_id) => graph.configuration_list(list_id)?.0,
            None => Vec::new(),
        };

        let mut targets = Vec::new();
        for target_id in id_list(project, "targets") {
            targets.push(graph.target(&target_id)?);
        }

        let target_attributes = project
            .get("attributes")
            .and_then(|a| a.as_dictionary())
            .and_then(|a| a.get("TargetAttributes"))
            .and_then(|t| t.as_dictionary())
            .map(|t| {
                t.iter()
                    .filter_map(|(id, attrs)| Some((id.clone(), attrs.as_dictionary()?.clone())))
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            path: path.to_path_buf(),
            build_configurations,
            targets,
            target_attributes,
        })
    }

    /// Project name (file stem of the `.xcodeproj`).
    pub fn name(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default()
    }

    /// Directory containing the `.xcodeproj` (`SRCROOT`).
    pub fn project_dir(&self) -> PathBuf {
        self.path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default()
    }

    pub fn target(&self, name: &str) -> Option<&Target> {
        self.targets.iter().find(|t| t.name == name)
    }

    pub fn target_by_id(&self, id: &str) -> Option<&Target> {
        self.targets.iter().find(|t| t.id == id)
    }

    pub fn build_configuration(&self, name: &str) -> Option<&BuildConfiguration> {
        self.build_configurations.iter().find(|c| c.name == name)
    }

    /// String attribute from `TargetAttributes` (e.g. `DevelopmentTeam`).
    pub fn target_attribute(&self, target_id: &str, key: &str) -> Option<&str> {
        self.target_attributes
            .get(target_id)
            .and_then(|attrs| attrs.get(key))
            .and_then(|v| v.as_string())
    }

    /// Transitive executable dependencies of `target`.
    ///
    /// Recursion follows only executable products (apps, app extensions,
    /// watch apps). Each target appears once even in the presence of
    /// dependency cycles.
    pub fn dependent_executable_product_targets(&self, target: &Target) -> Vec<&Target> {
        let mut visited = HashSet::new();
        visited.insert(target.id.clone());
        let mut out = Vec::new();
        self.collect_executable_dependencies(target, &mut visited, &mut out);
        out
    }

    fn collect_executable_dependencies<'a>(
        &'a self,
        target: &Target,
        visited: &mut HashSet<String>,
        out: &mut Vec<&'a Target>,
    ) {
        for dep_id in &target.dependency_ids {
            let Some(child) = self.target_by_id(dep_id) else {
                debug!("Dependency {} of {} is not a target of this project", dep_id, target.name);
                continue;
            };
            if !child.is_executable_product() || !visited.insert(child.id.clone()) {
                continue;
            }
            out.push(child);
            self.collect_executable_dependencies(child, visited, out);
        }
    }
}

/// Read a project file, falling back to `plutil` for OpenStep text files.
fn read_project_file(path: &Path) -> Result<plist::Value, XcodeError> {
    if !path.exists() {
        return Err(XcodeError::io(
            path,
            std::io::Error::new(std::io::ErrorKind::NotFound, "project.pbxproj not found"),
        ));
    }

    match plist::Value::from_file(path) {
        Ok(value) => Ok(value),
        Err(direct) => {
            debug!(
                "{} is not an XML/binary plist ({}), converting with plutil",
                path.display(),
                direct
            );
            let output = Command::new("plutil")
                .args(["-convert", "xml1", "-o", "-"])
                .arg(path)
                .output()
                .map_err(|e| XcodeError::Plutil {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                })?;
            if !output.status.success() {
                return Err(XcodeError::Plutil {
                    path: path.to_path_buf(),
                    reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
                });
            }
            plist::Value::from_reader_xml(Cursor::new(output.stdout)).map_err(|source| {
                XcodeError::Plist {
                    path: path.to_path_buf(),
                    source,
                }
            })
        }
    }
}

fn str_field<'a>(dict: &'a plist::Dictionary, key: &str) -> Option<&'a str> {
    dict.get(key).and_then(|v| v.as_string())
}

fn id_list(dict: &plist::Dictionary, key: &str) -> Vec<String> {
    dict.get(key)
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|i| i.as_string().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

/// Lookup helper over the `objects` table.
struct ObjectGraph<'a> {
    path: &'a Path,
    objects: &'a plist::Dictionary,
    root_id: &'a str,
}

impl<'a> ObjectGraph<'a> {
    fn new(path: &'a Path, root: &'a plist::Value) -> Result<Self, XcodeError> {
        let root = root
            .as_dictionary()
            .ok_or_else(|| XcodeError::invalid_project(path, "root is not a dictionary"))?;
        let objects = root
            .get("objects")
            .and_then(|o| o.as_dictionary())
            .ok_or_else(|| XcodeError::invalid_project(path, "missing objects table"))?;
        let root_id = str_field(root, "rootObject")
            .ok_or_else(|| XcodeError::invalid_project(path, "missing rootObject"))?;
        Ok(Self {
            path,
            objects,
            root_id,
        })
    }

    fn object(&self, id: &str) -> Result<&'a plist::Dictionary, XcodeError> {
        self.objects
            .get(id)
            .and_then(|o| o.as_dictionary())
            .ok_or_else(|| XcodeError::invalid_project(self.path, format!("missing object {}", id)))
    }

    fn configuration_list(
        &self,
        list_id: &str,
    ) -> Result<(Vec<BuildConfiguration>, Option<String>), XcodeError> {
        let list = self.object(list_id)?;
        let mut configurations = Vec::new();
        for config_id in id_list(list, "buildConfigurations") {
            let config = self.object(&config_id)?;
            let name = str_field(config, "name").ok_or_else(|| {
                XcodeError::invalid_project(
                    self.path,
                    format!("build configuration {} has no name", config_id),
                )
            })?;
            let build_settings = match config.get("buildSettings").map(plist_to_json) {
                Some(serde_json::Value::Object(map)) => BuildSettings::from(map),
                _ => BuildSettings::new(),
            };
            configurations.push(BuildConfiguration {
                name: name.to_string(),
                build_settings,
            });
        }
        let default_name = str_field(list, "defaultConfigurationName").map(str::to_string);
        Ok((configurations, default_name))
    }

    fn target(&self, id: &str) -> Result<Target, XcodeError> {
        let object = self.object(id)?;
        let name = str_field(object, "name")
            .ok_or_else(|| XcodeError::invalid_project(self.path, format!("target {} has no name", id)))?;

        let product_type = str_field(object, "productType")
            .map(ProductType::from_identifier)
            .unwrap_or(ProductType::None);

        let product_path = str_field(object, "productReference")
            .and_then(|ref_id| self.objects.get(ref_id))
            .and_then(|r| r.as_dictionary())
            .and_then(|r| str_field(r, "path"))
            .map(str::to_string);

        let (build_configurations, default_configuration_name) =
            match str_field(object, "buildConfigurationList") {
                Some(list_id) => self.configuration_list(list_id)?,
                None => (Vec::new(), None),
            };

        // Cross-project dependencies carry only a proxy; they are skipped
        let dependency_ids = id_list(object, "dependencies")
            .iter()
            .filter_map(|dep_id| self.objects.get(dep_id))
            .filter_map(|dep| dep.as_dictionary())
            .filter_map(|dep| str_field(dep, "target").map(str::to_string))
            .collect();

        Ok(Target {
            id: id.to_string(),
            name: name.to_string(),
            product_type,
            product_path,
            build_configurations,
            default_configuration_name,
            dependency_ids,
        })
    }
}
