//! Configuration loading for hook targets.
//!
//! Target type and method names differ across OS and vendor builds, so they
//! can be overridden from `<config_dir>/overlay-hook/hooks.toml`:
//!
//! ```toml
//! context_field = "mContext"
//!
//! [start]
//! type_name = "com.android.systemui.statusbar.phone.CentralSurfacesImpl"
//! method = "start"
//! arity = 0
//! ```
//!
//! Omitted tables fall back to the built-in defaults.

use fs_err as fs;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{HookError, Result};

pub const DEFAULT_CENTRAL_SURFACES_TYPE: &str =
    "com.android.systemui.statusbar.phone.CentralSurfacesImpl";
pub const DEFAULT_NOTIF_COLLECTION_TYPE: &str =
    "com.android.systemui.statusbar.notification.collection.NotifCollection";
pub const DEFAULT_CONTEXT_FIELD: &str = "mContext";

/// Where to install one interception point.
///
/// `arity: None` matches every overload with the given name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TargetMethodSpec {
    pub type_name: String,
    pub method: String,
    #[serde(default)]
    pub arity: Option<usize>,
}

impl TargetMethodSpec {
    pub fn new(type_name: &str, method: &str, arity: Option<usize>) -> Self {
        Self {
            type_name: type_name.to_string(),
            method: method.to_string(),
            arity,
        }
    }
}

impl fmt::Display for TargetMethodSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.arity {
            Some(arity) => write!(f, "{}#{}/{}", self.type_name, self.method, arity),
            None => write!(f, "{}#{}/*", self.type_name, self.method),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HookConfig {
    pub context_field: String,
    pub start: TargetMethodSpec,
    pub post_notification: TargetMethodSpec,
    pub retract_notification: TargetMethodSpec,
}

impl Default for HookConfig {
    fn default() -> Self {
        Self {
            context_field: DEFAULT_CONTEXT_FIELD.to_string(),
            start: TargetMethodSpec::new(DEFAULT_CENTRAL_SURFACES_TYPE, "start", Some(0)),
            post_notification: TargetMethodSpec::new(
                DEFAULT_NOTIF_COLLECTION_TYPE,
                "postNotification",
                None,
            ),
            retract_notification: TargetMethodSpec::new(
                DEFAULT_NOTIF_COLLECTION_TYPE,
                "retractNotification",
                None,
            ),
        }
    }
}

/// Returns the path to the hook configuration file.
pub fn get_hook_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("overlay-hook").join("hooks.toml"))
}

/// Loads the hook configuration, returning defaults if the file is missing or unreadable.
pub fn load_hook_config() -> HookConfig {
    let Some(path) = get_hook_config_path() else {
        return HookConfig::default();
    };
    match load_hook_config_from(&path) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(error = %err, "Failed to load hook config; using defaults");
            HookConfig::default()
        }
    }
}

/// Loads the hook configuration from `path`. A missing file yields defaults.
pub fn load_hook_config_from(path: &Path) -> Result<HookConfig> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Ok(HookConfig::default())
        }
        Err(source) => {
            return Err(HookError::Io {
                context: format!("reading {}", path.display()),
                source,
            })
        }
    };

    toml::from_str(&content).map_err(|err| HookError::ConfigMalformed {
        path: path.to_path_buf(),
        details: err.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let config = load_hook_config_from(&dir.path().join("hooks.toml")).unwrap();
        assert_eq!(config, HookConfig::default());
    }

    #[test]
    fn test_partial_file_overrides_only_given_tables() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("hooks.toml");
        std::fs::write(
            &path,
            r#"
context_field = "context"

[start]
type_name = "com.vendor.systemui.StatusBar"
method = "start"
arity = 0
"#,
        )
        .unwrap();

        let config = load_hook_config_from(&path).unwrap();
        assert_eq!(config.context_field, "context");
        assert_eq!(config.start.type_name, "com.vendor.systemui.StatusBar");
        assert_eq!(
            config.post_notification,
            HookConfig::default().post_notification
        );
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("hooks.toml");
        std::fs::write(&path, "context_field = [").unwrap();

        let err = load_hook_config_from(&path).unwrap_err();
        assert!(matches!(err, HookError::ConfigMalformed { .. }));
    }

    #[test]
    fn test_spec_display() {
        let config = HookConfig::default();
        assert!(config.start.to_string().ends_with("CentralSurfacesImpl#start/0"));
        assert!(config.retract_notification.to_string().ends_with("#retractNotification/*"));
    }
}
