//! Xcode build settings.
//!
//! Holds the resolved key/value build settings of a single (target,
//! configuration) pair and expands `$(NAME)` / `${NAME}` references found in
//! setting values, Info.plist entries and entitlements.

mod expand;
mod settings;

pub use expand::{contains_reference, expand, parse_reference, ExpandError, VariableReference};
pub use settings::{BuildSettings, SettingsError};
