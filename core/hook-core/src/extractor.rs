//! Pulls the host execution context out of an intercepted receiver.

use std::sync::Arc;

use crate::error::{HookError, Result};
use crate::host::{FieldAccess, HostContext, HostObject, HostValue};

/// Reads `field` from `receiver`, ignoring declared visibility.
///
/// Fails when the field is absent, null, or holds something other than a context.
pub fn extract_context(receiver: &dyn HostObject, field: &str) -> Result<Arc<dyn HostContext>> {
    let runtime_type = receiver.runtime_type();
    match receiver.read_field(field, FieldAccess::OverrideVisibility) {
        Some(HostValue::Context(context)) => Ok(context),
        Some(HostValue::Null) => Err(HookError::FieldNull {
            runtime_type: runtime_type.to_string(),
            field: field.to_string(),
        }),
        Some(other) => Err(HookError::FieldWrongType {
            runtime_type: runtime_type.to_string(),
            field: field.to_string(),
            found: other.type_label(),
        }),
        None => Err(HookError::FieldMissing {
            runtime_type: runtime_type.to_string(),
            field: field.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimContext, SimObject};

    #[test]
    fn test_extracts_private_context_field() {
        let context = Arc::new(SimContext::new("systemui"));
        let receiver = SimObject::new("a.Surfaces").with_private_field("mContext", HostValue::Context(context));
        let extracted = extract_context(&receiver, "mContext").unwrap();
        assert_eq!(extracted.label(), "systemui");
    }

    #[test]
    fn test_missing_field() {
        let receiver = SimObject::new("a.Surfaces");
        let err = extract_context(&receiver, "mContext").err().unwrap();
        assert!(matches!(err, HookError::FieldMissing { .. }));
    }

    #[test]
    fn test_wrong_type() {
        let receiver = SimObject::new("a.Surfaces").with_private_field("mContext", HostValue::Int(3));
        let err = extract_context(&receiver, "mContext").err().unwrap();
        match err {
            HookError::FieldWrongType { found, .. } => assert_eq!(found, "int"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_null_field() {
        let receiver = SimObject::new("a.Surfaces").with_private_field("mContext", HostValue::Null);
        let err = extract_context(&receiver, "mContext").err().unwrap();
        assert!(matches!(err, HookError::FieldNull { .. }));
    }
}
