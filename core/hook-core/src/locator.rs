//! Resolves target types and methods in the host's code registry.
//! Absence is expected across OS/vendor builds; every miss is logged and
//! only silences the installation that depended on it.

use crate::config::TargetMethodSpec;
use crate::error::{HookError, Result};
use crate::host::{CodeRegistry, MethodHandle, TypeHandle};

pub struct MethodLocator<'a> {
    registry: &'a dyn CodeRegistry,
}

impl<'a> MethodLocator<'a> {
    pub fn new(registry: &'a dyn CodeRegistry) -> Self {
        Self { registry }
    }

    pub fn locate(&self, type_name: &str) -> Result<TypeHandle> {
        self.registry.find_type(type_name).ok_or_else(|| {
            tracing::warn!(type_name, "Hook target type not found");
            HookError::TypeNotFound {
                type_name: type_name.to_string(),
            }
        })
    }

    /// Declared methods named `name`, optionally restricted to one arity.
    pub fn find_methods<'n>(
        &self,
        ty: &TypeHandle,
        name: &'n str,
        arity: Option<usize>,
    ) -> impl Iterator<Item = MethodHandle> + 'n {
        self.registry
            .declared_methods(ty)
            .into_iter()
            .filter(move |m| m.name == name && arity.map_or(true, |a| m.arity == a))
    }

    /// Locates the type and collects every matching method.
    pub fn resolve(&self, spec: &TargetMethodSpec) -> Result<Vec<MethodHandle>> {
        let ty = self.locate(&spec.type_name)?;
        let methods: Vec<_> = self.find_methods(&ty, &spec.method, spec.arity).collect();
        if methods.is_empty() {
            tracing::warn!(
                type_name = %spec.type_name,
                method = %spec.method,
                arity = ?spec.arity,
                "Hook target method not found"
            );
            return Err(HookError::MethodNotFound {
                type_name: spec.type_name.clone(),
                method: spec.method.clone(),
            });
        }
        Ok(methods)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimRegistry;

    fn registry() -> SimRegistry {
        SimRegistry::new()
            .with_method("a.Collection", "post", 1)
            .with_method("a.Collection", "post", 3)
            .with_method("a.Collection", "retract", 2)
            .with_method("a.Surfaces", "start", 0)
    }

    #[test]
    fn test_locate_missing_type() {
        let registry = registry();
        let locator = MethodLocator::new(&registry);
        let err = locator.locate("a.Missing").unwrap_err();
        assert!(matches!(err, HookError::TypeNotFound { .. }));
    }

    #[test]
    fn test_find_methods_any_arity_returns_all_overloads() {
        let registry = registry();
        let locator = MethodLocator::new(&registry);
        let ty = locator.locate("a.Collection").unwrap();
        let arities: Vec<_> = locator.find_methods(&ty, "post", None).map(|m| m.arity).collect();
        assert_eq!(arities, vec![1, 3]);
    }

    #[test]
    fn test_find_methods_filters_by_arity() {
        let registry = registry();
        let locator = MethodLocator::new(&registry);
        let ty = locator.locate("a.Collection").unwrap();
        assert_eq!(locator.find_methods(&ty, "post", Some(3)).count(), 1);
        assert_eq!(locator.find_methods(&ty, "post", Some(2)).count(), 0);
    }

    #[test]
    fn test_resolve_reports_missing_method() {
        let registry = registry();
        let locator = MethodLocator::new(&registry);
        let spec = TargetMethodSpec::new("a.Surfaces", "start", Some(1));
        let err = locator.resolve(&spec).unwrap_err();
        assert!(matches!(err, HookError::MethodNotFound { .. }));
    }
}
