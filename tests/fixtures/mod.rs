//! Test fixtures: on-disk Xcode projects built in a temp dir
//!
//! The fixture mirrors a default iOS app template with one app extension and
//! a unit test bundle:
//! - `App.xcworkspace` referencing `App.xcodeproj`
//! - shared scheme `App` (archive configuration `Release`)
//! - targets `App` (app), `Widget` (app extension), `AppTests` (unit tests)
//! - Debug and Release configurations everywhere

#![allow(dead_code)]

use plist::{Dictionary, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const TEAM_ID: &str = "72SA8V3WYL";
pub const APP_BUNDLE_ID: &str = "io.bitrise.App";
pub const WIDGET_BUNDLE_ID: &str = "io.bitrise.App.Widget";

pub const SCHEME_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Scheme LastUpgradeVersion = "1000" version = "1.3">
   <BuildAction parallelizeBuildables = "YES" buildImplicitDependencies = "YES">
      <BuildActionEntries>
         <BuildActionEntry buildForTesting = "YES" buildForRunning = "YES" buildForProfiling = "YES" buildForArchiving = "YES" buildForAnalyzing = "YES">
            <BuildableReference
               BuildableIdentifier = "primary"
               BlueprintIdentifier = "APP"
               BuildableName = "App.app"
               BlueprintName = "App"
               ReferencedContainer = "container:App.xcodeproj">
            </BuildableReference>
         </BuildActionEntry>
         <BuildActionEntry buildForTesting = "YES" buildForRunning = "NO" buildForProfiling = "NO" buildForArchiving = "NO" buildForAnalyzing = "NO">
            <BuildableReference
               BuildableIdentifier = "primary"
               BlueprintIdentifier = "TESTS"
               BuildableName = "AppTests.xctest"
               BlueprintName = "AppTests"
               ReferencedContainer = "container:App.xcodeproj">
            </BuildableReference>
         </BuildActionEntry>
      </BuildActionEntries>
   </BuildAction>
   <LaunchAction buildConfiguration = "Debug">
   </LaunchAction>
   <ArchiveAction buildConfiguration = "Release" revealArchiveInOrganizer = "YES">
   </ArchiveAction>
</Scheme>
"#;

/// Same scheme without an archive action.
pub const BUILD_ONLY_SCHEME_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Scheme LastUpgradeVersion = "1000" version = "1.3">
   <BuildAction parallelizeBuildables = "YES" buildImplicitDependencies = "YES">
      <BuildActionEntries>
         <BuildActionEntry buildForArchiving = "YES">
            <BuildableReference
               BuildableIdentifier = "primary"
               BlueprintIdentifier = "APP"
               BuildableName = "App.app"
               BlueprintName = "App"
               ReferencedContainer = "container:App.xcodeproj">
            </BuildableReference>
         </BuildActionEntry>
      </BuildActionEntries>
   </BuildAction>
</Scheme>
"#;

const WORKSPACE_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Workspace
   version = "1.0">
   <FileRef
      location = "group:App.xcodeproj">
   </FileRef>
</Workspace>
"#;

/// A fixture project on disk.
pub struct FixtureProject {
    pub dir: TempDir,
}

impl FixtureProject {
    /// Write the full fixture.
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let fixture = Self { dir };
        fixture.write_project(None);
        fixture.write_scheme("App", SCHEME_XML);
        fixture.write_workspace();
        fixture.write_info_plist("App/Info.plist", "$(PRODUCT_BUNDLE_IDENTIFIER)");
        fixture.write_info_plist("Widget/Info.plist", "io.bitrise.App.$(PRODUCT_NAME:rfc1034identifier)");
        fixture.write_entitlements(
            "App/App.entitlements",
            &[
                ("aps-environment", Value::String("development".into())),
                (
                    "com.apple.developer.icloud-services",
                    Value::Array(vec![Value::String("CloudKit".into())]),
                ),
                (
                    "com.apple.developer.icloud-container-identifiers",
                    Value::Array(vec![Value::String("iCloud.$(CFBundleIdentifier)".into())]),
                ),
            ],
        );
        fixture
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn project_path(&self) -> PathBuf {
        self.root().join("App.xcodeproj")
    }

    pub fn workspace_path(&self) -> PathBuf {
        self.root().join("App.xcworkspace")
    }

    /// Write `project.pbxproj`; `widget_team` overrides the widget's team.
    pub fn write_project(&self, widget_team: Option<&str>) {
        self.write_project_with(widget_team, "App/App.entitlements");
    }

    /// Write `project.pbxproj` with the app's `CODE_SIGN_ENTITLEMENTS`
    /// declared as `app_entitlements`.
    pub fn write_project_with(&self, widget_team: Option<&str>, app_entitlements: &str) {
        let project_dir = self.project_path();
        fs::create_dir_all(&project_dir).unwrap();
        project_plist(widget_team, app_entitlements)
            .to_file_xml(project_dir.join("project.pbxproj"))
            .unwrap();
    }

    pub fn write_scheme(&self, name: &str, xml: &str) {
        let schemes = self.project_path().join("xcshareddata/xcschemes");
        fs::create_dir_all(&schemes).unwrap();
        fs::write(schemes.join(format!("{}.xcscheme", name)), xml).unwrap();
    }

    pub fn write_workspace(&self) {
        let workspace = self.workspace_path();
        fs::create_dir_all(&workspace).unwrap();
        fs::write(workspace.join("contents.xcworkspacedata"), WORKSPACE_XML).unwrap();
    }

    pub fn write_info_plist(&self, relative: &str, bundle_id: &str) {
        let mut dict = Dictionary::new();
        dict.insert("CFBundleIdentifier".into(), Value::String(bundle_id.into()));
        dict.insert("CFBundleName".into(), Value::String("$(PRODUCT_NAME)".into()));
        self.write_plist(relative, dict);
    }

    pub fn write_entitlements(&self, relative: &str, entries: &[(&str, Value)]) {
        let mut dict = Dictionary::new();
        for (key, value) in entries {
            dict.insert(key.to_string(), value.clone());
        }
        self.write_plist(relative, dict);
    }

    fn write_plist(&self, relative: &str, dict: Dictionary) {
        let path = self.root().join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        Value::Dictionary(dict).to_file_xml(path).unwrap();
    }
}

fn string(value: &str) -> Value {
    Value::String(value.to_string())
}

fn ids(values: &[&str]) -> Value {
    Value::Array(values.iter().map(|v| string(v)).collect())
}

fn object(pairs: Vec<(&str, Value)>) -> Value {
    let mut dict = Dictionary::new();
    for (key, value) in pairs {
        dict.insert(key.to_string(), value);
    }
    Value::Dictionary(dict)
}

fn build_configuration(name: &str, settings: &[(&str, &str)]) -> Value {
    let settings = settings
        .iter()
        .map(|(k, v)| (k.to_string(), string(v)))
        .collect::<Dictionary>();
    object(vec![
        ("isa", string("XCBuildConfiguration")),
        ("name", string(name)),
        ("buildSettings", Value::Dictionary(settings)),
    ])
}

fn configuration_list(debug: &str, release: &str) -> Value {
    object(vec![
        ("isa", string("XCConfigurationList")),
        ("buildConfigurations", ids(&[debug, release])),
        ("defaultConfigurationName", string("Release")),
    ])
}

fn native_target(name: &str, product_type: &str, list: &str, deps: &[&str], product: &str) -> Value {
    object(vec![
        ("isa", string("PBXNativeTarget")),
        ("name", string(name)),
        ("productType", string(product_type)),
        ("buildConfigurationList", string(list)),
        ("dependencies", ids(deps)),
        ("productReference", string(product)),
    ])
}

/// The `project.pbxproj` object graph.
pub fn project_plist(widget_team: Option<&str>, app_entitlements: &str) -> Value {
    let app_settings = |config: &str| {
        vec![
            ("PRODUCT_NAME", "$(TARGET_NAME)"),
            ("PRODUCT_BUNDLE_IDENTIFIER", APP_BUNDLE_ID),
            ("INFOPLIST_FILE", "App/Info.plist"),
            ("CODE_SIGN_ENTITLEMENTS", app_entitlements),
            ("CODE_SIGN_IDENTITY", "iPhone Developer"),
            ("DEVELOPMENT_TEAM", TEAM_ID),
            ("CODE_SIGN_STYLE", if config == "Debug" { "Automatic" } else { "Manual" }),
        ]
    };
    let mut widget_settings = vec![
        ("PRODUCT_NAME", "$(TARGET_NAME)"),
        ("INFOPLIST_FILE", "Widget/Info.plist"),
    ];
    if let Some(team) = widget_team {
        widget_settings.push(("DEVELOPMENT_TEAM", team));
    }

    let mut widget_attributes = Dictionary::new();
    widget_attributes.insert("DevelopmentTeam".into(), string(TEAM_ID));
    let mut target_attributes = Dictionary::new();
    target_attributes.insert("WIDGET".into(), Value::Dictionary(widget_attributes));
    let mut attributes = Dictionary::new();
    attributes.insert("TargetAttributes".into(), Value::Dictionary(target_attributes));

    let objects = object(vec![
        (
            "ROOT",
            object(vec![
                ("isa", string("PBXProject")),
                ("attributes", Value::Dictionary(attributes)),
                ("buildConfigurationList", string("PROJECT_LIST")),
                ("targets", ids(&["APP", "WIDGET", "TESTS"])),
            ]),
        ),
        ("PROJECT_LIST", configuration_list("PROJECT_DEBUG", "PROJECT_RELEASE")),
        ("PROJECT_DEBUG", build_configuration("Debug", &[("SDKROOT", "iphoneos")])),
        ("PROJECT_RELEASE", build_configuration("Release", &[("SDKROOT", "iphoneos")])),
        (
            "APP",
            native_target(
                "App",
                "com.apple.product-type.application",
                "APP_LIST",
                &["APP_DEPENDS_WIDGET"],
                "APP_PRODUCT",
            ),
        ),
        ("APP_PRODUCT", object(vec![("isa", string("PBXFileReference")), ("path", string("App.app"))])),
        (
            "APP_DEPENDS_WIDGET",
            object(vec![("isa", string("PBXTargetDependency")), ("target", string("WIDGET"))]),
        ),
        ("APP_LIST", configuration_list("APP_DEBUG", "APP_RELEASE")),
        ("APP_DEBUG", build_configuration("Debug", &app_settings("Debug"))),
        ("APP_RELEASE", build_configuration("Release", &app_settings("Release"))),
        (
            "WIDGET",
            native_target(
                "Widget",
                "com.apple.product-type.app-extension",
                "WIDGET_LIST",
                &[],
                "WIDGET_PRODUCT",
            ),
        ),
        (
            "WIDGET_PRODUCT",
            object(vec![("isa", string("PBXFileReference")), ("path", string("Widget.appex"))]),
        ),
        ("WIDGET_LIST", configuration_list("WIDGET_DEBUG", "WIDGET_RELEASE")),
        ("WIDGET_DEBUG", build_configuration("Debug", &widget_settings)),
        ("WIDGET_RELEASE", build_configuration("Release", &widget_settings)),
        (
            "TESTS",
            native_target(
                "AppTests",
                "com.apple.product-type.bundle.unit-test",
                "TESTS_LIST",
                &["TESTS_DEPENDS_APP"],
                "TESTS_PRODUCT",
            ),
        ),
        (
            "TESTS_PRODUCT",
            object(vec![("isa", string("PBXFileReference")), ("path", string("AppTests.xctest"))]),
        ),
        (
            "TESTS_DEPENDS_APP",
            object(vec![("isa", string("PBXTargetDependency")), ("target", string("APP"))]),
        ),
        ("TESTS_LIST", configuration_list("TESTS_DEBUG", "TESTS_RELEASE")),
        ("TESTS_DEBUG", build_configuration("Debug", &[("PRODUCT_BUNDLE_IDENTIFIER", "io.bitrise.AppTests")])),
        ("TESTS_RELEASE", build_configuration("Release", &[("PRODUCT_BUNDLE_IDENTIFIER", "io.bitrise.AppTests")])),
    ]);

    object(vec![
        ("archiveVersion", string("1")),
        ("objectVersion", string("50")),
        ("objects", objects),
        ("rootObject", string("ROOT")),
    ])
}
