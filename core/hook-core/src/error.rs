//! Error types for hook-core operations.
//! None of these ever reach the host process; callers log and degrade.

use std::path::PathBuf;

/// Failure bucket used for logging and reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Lookup,
    Install,
    Extraction,
    Attach,
    Subscription,
    Config,
}

/// All errors that can occur while hooking and attaching.
#[derive(Debug, thiserror::Error)]
pub enum HookError {
    // ─────────────────────────────────────────────────────────────────────
    // Lookup Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Type not found: {type_name}")]
    TypeNotFound { type_name: String },

    #[error("Method not found: {type_name}#{method}")]
    MethodNotFound { type_name: String, method: String },

    // ─────────────────────────────────────────────────────────────────────
    // Install Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Interception rejected for {target}: {details}")]
    InstallFailed { target: String, details: String },

    // ─────────────────────────────────────────────────────────────────────
    // Extraction Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Field {field} not found on {runtime_type}")]
    FieldMissing { runtime_type: String, field: String },

    #[error("Field {field} on {runtime_type} is {found}, expected a context")]
    FieldWrongType {
        runtime_type: String,
        field: String,
        found: String,
    },

    #[error("Field {field} on {runtime_type} is null")]
    FieldNull { runtime_type: String, field: String },

    // ─────────────────────────────────────────────────────────────────────
    // Attach / Subscription Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Overlay creation failed: {0}")]
    AttachFailed(String),

    #[error("Power-save subscription failed: {0}")]
    SubscriptionFailed(String),

    // ─────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Configuration file malformed: {path}: {details}")]
    ConfigMalformed { path: PathBuf, details: String },

    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl HookError {
    pub fn kind(&self) -> FailureKind {
        match self {
            HookError::TypeNotFound { .. } | HookError::MethodNotFound { .. } => {
                FailureKind::Lookup
            }
            HookError::InstallFailed { .. } => FailureKind::Install,
            HookError::FieldMissing { .. }
            | HookError::FieldWrongType { .. }
            | HookError::FieldNull { .. } => FailureKind::Extraction,
            HookError::AttachFailed(_) => FailureKind::Attach,
            HookError::SubscriptionFailed(_) => FailureKind::Subscription,
            HookError::ConfigMalformed { .. } | HookError::Io { .. } => FailureKind::Config,
        }
    }
}

/// Convenience type alias for Results using HookError.
pub type Result<T> = std::result::Result<T, HookError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_buckets() {
        let err = HookError::TypeNotFound {
            type_name: "a.B".to_string(),
        };
        assert_eq!(err.kind(), FailureKind::Lookup);

        let err = HookError::FieldNull {
            runtime_type: "a.B".to_string(),
            field: "mContext".to_string(),
        };
        assert_eq!(err.kind(), FailureKind::Extraction);
        assert_eq!(err.to_string(), "Field mContext on a.B is null");
    }
}
