//! Adapter definitions.
//!
//! An adapter definition describes a to-be-synthesized concrete type
//! extending a parent class and implementing a set of interfaces, with
//! caller-supplied callables wired into its methods. The definition is a
//! plain value: it is fully validated here, independent of any emission
//! backend, and only a validated definition ever reaches the
//! synthesizer. A failed definition therefore never produces a
//! partially-usable type.

use std::collections::BTreeSet;
use vela_core::intern::{intern, InternedString};
use vela_core::types::{MethodDef, TypeRegistry};
use vela_core::value::FunctionRef;

/// The wildcard method name.
pub const WILDCARD: &str = "*";

// =============================================================================
// Validation Problems
// =============================================================================

/// Validation failure of an adapter definition.
///
/// Carries a human-readable reason and, when the failure wraps another
/// error, its cause.
#[derive(Debug)]
pub struct AdapterDefinitionProblem {
    message: String,
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl AdapterDefinitionProblem {
    /// Create a problem with a reason.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// The reason text.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for AdapterDefinitionProblem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for AdapterDefinitionProblem {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// Result type for definition building and validation.
pub type AdapterResult<T> = Result<T, AdapterDefinitionProblem>;

// =============================================================================
// Adapter Definition
// =============================================================================

/// Builder for a runtime-synthesized adapter type.
///
/// Interfaces are kept sorted for a deterministic layout; the
/// implementation and override maps preserve insertion order. A method
/// name may appear in at most one of the two maps, and each map holds at
/// most one wildcard (`*`) entry.
#[derive(Debug, Clone)]
pub struct AdapterDefinition {
    name: InternedString,
    parent: InternedString,
    interfaces: BTreeSet<InternedString>,
    implementations: Vec<(InternedString, FunctionRef)>,
    overrides: Vec<(InternedString, FunctionRef)>,
}

impl AdapterDefinition {
    /// Start a definition for an adapter named `name` extending `parent`.
    pub fn new(name: &str, parent: &str) -> Self {
        Self {
            name: intern(name),
            parent: intern(parent),
            interfaces: BTreeSet::new(),
            implementations: Vec::new(),
            overrides: Vec::new(),
        }
    }

    /// Adapter type name.
    #[inline]
    pub fn name(&self) -> InternedString {
        self.name
    }

    /// Parent type name.
    #[inline]
    pub fn parent(&self) -> InternedString {
        self.parent
    }

    /// Implemented interface names, sorted.
    pub fn interfaces(&self) -> impl Iterator<Item = InternedString> + '_ {
        self.interfaces.iter().copied()
    }

    /// Add an implemented interface.
    pub fn implements_interface(mut self, iface: &str) -> Self {
        self.interfaces.insert(intern(iface));
        self
    }

    /// Provide the implementation for a method (or `*` for the wildcard).
    ///
    /// An implementation target receives `(receiver, args...)`; the
    /// wildcard target receives `(method_name, args)` where `args` is the
    /// full argument array, receiver included.
    pub fn implements_method(mut self, name: &str, target: FunctionRef) -> AdapterResult<Self> {
        if name == WILDCARD {
            if target.arity() != 2 {
                return Err(AdapterDefinitionProblem::new(format!(
                    "a * implementation must take (method_name, args), got arity {}",
                    target.arity()
                )));
            }
        } else if target.arity() < 1 {
            return Err(AdapterDefinitionProblem::new(format!(
                "an implementation target must take at least the receiver: {}",
                name
            )));
        }
        upsert(&mut self.implementations, intern(name), target);
        Ok(self)
    }

    /// Provide an override for a parent method (or `*` for the wildcard).
    ///
    /// An override target receives `(super_ref, receiver, args...)`; the
    /// wildcard target receives `(super_ref, method_name, args)`.
    pub fn overrides_method(mut self, name: &str, target: FunctionRef) -> AdapterResult<Self> {
        if name == WILDCARD {
            if target.arity() != 3 {
                return Err(AdapterDefinitionProblem::new(format!(
                    "a * override must take (super_ref, method_name, args), got arity {}",
                    target.arity()
                )));
            }
        } else if target.arity() < 2 {
            return Err(AdapterDefinitionProblem::new(format!(
                "an override target must take at least the super reference and the receiver: {}",
                name
            )));
        }
        upsert(&mut self.overrides, intern(name), target);
        Ok(self)
    }

    /// Implementation bound to `name`, wildcard excluded.
    pub fn implementation(&self, name: InternedString) -> Option<&FunctionRef> {
        lookup(&self.implementations, name)
    }

    /// Override bound to `name`, wildcard excluded.
    pub fn override_for(&self, name: InternedString) -> Option<&FunctionRef> {
        lookup(&self.overrides, name)
    }

    /// The wildcard implementation, if any.
    pub fn star_implementation(&self) -> Option<&FunctionRef> {
        lookup(&self.implementations, intern(WILDCARD))
    }

    /// The wildcard override, if any.
    pub fn star_override(&self) -> Option<&FunctionRef> {
        lookup(&self.overrides, intern(WILDCARD))
    }

    // =========================================================================
    // Validation
    // =========================================================================

    /// Validate the whole definition against the type registry.
    ///
    /// All checks run before any synthesis: parent existence and
    /// extensibility, interface existence, wildcard conflict,
    /// implementation/override conflicts, membership of every named
    /// method, and coverage plus arity agreement for every abstract
    /// method of the parent and interfaces.
    pub fn validate(&self, types: &TypeRegistry) -> AdapterResult<()> {
        let parent = self.check_super_types(types)?;
        self.check_star_conflict()?;
        self.check_override_conflicts()?;
        let interface_ids: Vec<_> = self
            .interfaces
            .iter()
            .filter_map(|name| types.get_by_name(*name))
            .map(|d| d.id)
            .collect();
        self.check_membership(types, parent, &interface_ids)?;
        self.check_abstract_coverage(types, parent, &interface_ids)?;
        Ok(())
    }

    fn check_super_types(
        &self,
        types: &TypeRegistry,
    ) -> AdapterResult<vela_core::types::TypeId> {
        let parent = types.get_by_name(self.parent).ok_or_else(|| {
            AdapterDefinitionProblem::new(format!("parent type not found: {}", self.parent))
        })?;
        if parent.is_interface() {
            return Err(AdapterDefinitionProblem::new(format!(
                "the parent type cannot be an interface: {}",
                self.parent
            )));
        }
        if parent.is_final() {
            return Err(AdapterDefinitionProblem::new(format!(
                "the parent type is final: {}",
                self.parent
            )));
        }
        for iface in &self.interfaces {
            if types.get_by_name(*iface).is_none() {
                return Err(AdapterDefinitionProblem::new(format!(
                    "interface not found: {}",
                    iface
                )));
            }
        }
        Ok(parent.id)
    }

    fn check_star_conflict(&self) -> AdapterResult<()> {
        if self.star_implementation().is_some() && self.star_override().is_some() {
            return Err(AdapterDefinitionProblem::new(
                "having both a * implementation and a * override is forbidden",
            ));
        }
        Ok(())
    }

    fn check_override_conflicts(&self) -> AdapterResult<()> {
        let star = intern(WILDCARD);
        for (name, _) in &self.implementations {
            if *name != star && lookup(&self.overrides, *name).is_some() {
                return Err(AdapterDefinitionProblem::new(format!(
                    "conflict: both an implementation and an override for method {}",
                    name
                )));
            }
        }
        Ok(())
    }

    fn check_membership(
        &self,
        types: &TypeRegistry,
        parent: vela_core::types::TypeId,
        interfaces: &[vela_core::types::TypeId],
    ) -> AdapterResult<()> {
        let star = intern(WILDCARD);
        let overridable = types.overridable_methods(parent, interfaces);
        let is_member = |name: InternedString| overridable.iter().any(|m| m.name == name);
        for (name, _) in &self.overrides {
            if *name != star && !is_member(*name) {
                return Err(AdapterDefinitionProblem::new(format!(
                    "there is no method named {} to override in {}",
                    name, self.parent
                )));
            }
        }
        for (name, _) in &self.implementations {
            if *name != star && !is_member(*name) {
                return Err(AdapterDefinitionProblem::new(format!(
                    "there is no method named {} to implement in {} or its interfaces",
                    name, self.parent
                )));
            }
        }
        Ok(())
    }

    fn check_abstract_coverage(
        &self,
        types: &TypeRegistry,
        parent: vela_core::types::TypeId,
        interfaces: &[vela_core::types::TypeId],
    ) -> AdapterResult<()> {
        let has_star = self.star_implementation().is_some() || self.star_override().is_some();
        for method in types.abstract_methods(parent, interfaces) {
            let implementation = self.implementation(method.name);
            let override_ = self.override_for(method.name);
            if implementation.is_none() && override_.is_none() && !has_star {
                return Err(AdapterDefinitionProblem::new(format!(
                    "no implementation or override for abstract method {}",
                    method.name
                )));
            }
            if let Some(target) = implementation {
                self.check_target_arity(&method, target, 0)?;
            }
            if let Some(target) = override_ {
                self.check_target_arity(&method, target, 1)?;
            }
        }
        Ok(())
    }

    /// An implementation takes the abstract method's parameters
    /// (receiver included); an override takes one more for the `super`
    /// reference.
    fn check_target_arity(
        &self,
        method: &MethodDef,
        target: &FunctionRef,
        extra: usize,
    ) -> AdapterResult<()> {
        if target.arity() != method.param_count + extra {
            return Err(AdapterDefinitionProblem::new(format!(
                "arity mismatch binding {} (arity {}) to method {} (arity {})",
                target.name(),
                target.arity(),
                method.name,
                method.param_count
            )));
        }
        if target.is_varargs() != method.varargs {
            return Err(AdapterDefinitionProblem::new(format!(
                "varargs mismatch binding {} to method {}",
                target.name(),
                method.name
            )));
        }
        Ok(())
    }
}

fn upsert(entries: &mut Vec<(InternedString, FunctionRef)>, name: InternedString, target: FunctionRef) {
    if let Some(entry) = entries.iter_mut().find(|(n, _)| *n == name) {
        entry.1 = target;
    } else {
        entries.push((name, target));
    }
}

fn lookup(entries: &[(InternedString, FunctionRef)], name: InternedString) -> Option<&FunctionRef> {
    entries.iter().find(|(n, _)| *n == name).map(|(_, t)| t)
}

#[cfg(test)]
mod tests {
    use super::*;
    use vela_core::types::{MethodDef, TypeDesc, TypeRegistry};
    use vela_core::value::Value;

    fn fixture_registry() -> TypeRegistry {
        let types = TypeRegistry::new();
        types.register(
            TypeDesc::reference("app.Worker")
                .with_flags(TypeDesc::FLAG_ABSTRACT)
                .with_method(MethodDef::abstract_method("run", 1))
                .with_method(MethodDef::abstract_method("shutdown", 2))
                .with_method(MethodDef::native(
                    "describe",
                    1,
                    FunctionRef::untyped("describe", 1, |_| Ok(Value::str("worker"))),
                )),
        );
        types.register(
            TypeDesc::reference("app.Sealed").with_flags(TypeDesc::FLAG_FINAL),
        );
        types.register(
            TypeDesc::reference("app.Closeable")
                .with_flags(TypeDesc::FLAG_INTERFACE)
                .with_method(MethodDef::abstract_method("close", 1)),
        );
        types
    }

    fn stub(name: &str, arity: usize) -> FunctionRef {
        FunctionRef::untyped(name, arity, |_| Ok(Value::Nil))
    }

    #[test]
    fn test_full_coverage_validates() {
        let types = fixture_registry();
        let def = AdapterDefinition::new("WorkerAdapter", "app.Worker")
            .implements_method("run", stub("run_impl", 1))
            .unwrap()
            .implements_method("shutdown", stub("shutdown_impl", 2))
            .unwrap();
        assert!(def.validate(&types).is_ok());
    }

    #[test]
    fn test_missing_abstract_method_fails() {
        let types = fixture_registry();
        let def = AdapterDefinition::new("WorkerAdapter", "app.Worker")
            .implements_method("run", stub("run_impl", 1))
            .unwrap();
        let err = def.validate(&types).unwrap_err();
        assert!(err.message().contains("shutdown"));
    }

    #[test]
    fn test_wildcard_covers_missing_methods() {
        let types = fixture_registry();
        let def = AdapterDefinition::new("WorkerAdapter", "app.Worker")
            .implements_method("run", stub("run_impl", 1))
            .unwrap()
            .implements_method(WILDCARD, stub("catch_all", 2))
            .unwrap();
        assert!(def.validate(&types).is_ok());
    }

    #[test]
    fn test_interface_methods_need_coverage() {
        let types = fixture_registry();
        let def = AdapterDefinition::new("WorkerAdapter", "app.Worker")
            .implements_interface("app.Closeable")
            .implements_method("run", stub("run_impl", 1))
            .unwrap()
            .implements_method("shutdown", stub("shutdown_impl", 2))
            .unwrap();
        let err = def.validate(&types).unwrap_err();
        assert!(err.message().contains("close"));
    }

    #[test]
    fn test_parent_must_exist_and_be_extensible() {
        let types = fixture_registry();
        let missing = AdapterDefinition::new("A", "app.Nope");
        assert!(missing.validate(&types).is_err());

        let sealed = AdapterDefinition::new("A", "app.Sealed");
        let err = sealed.validate(&types).unwrap_err();
        assert!(err.message().contains("final"));

        let iface_parent = AdapterDefinition::new("A", "app.Closeable");
        let err = iface_parent.validate(&types).unwrap_err();
        assert!(err.message().contains("interface"));
    }

    #[test]
    fn test_star_conflict_rejected() {
        let types = fixture_registry();
        let def = AdapterDefinition::new("WorkerAdapter", "app.Worker")
            .implements_method(WILDCARD, stub("catch_all", 2))
            .unwrap()
            .overrides_method(WILDCARD, stub("wrap_all", 3))
            .unwrap();
        let err = def.validate(&types).unwrap_err();
        assert!(err.message().contains("forbidden"));
    }

    #[test]
    fn test_implementation_override_conflict_rejected() {
        let types = fixture_registry();
        let def = AdapterDefinition::new("WorkerAdapter", "app.Worker")
            .implements_method("describe", stub("a", 1))
            .unwrap()
            .overrides_method("describe", stub("b", 2))
            .unwrap()
            .implements_method("run", stub("run_impl", 1))
            .unwrap()
            .implements_method("shutdown", stub("shutdown_impl", 2))
            .unwrap();
        let err = def.validate(&types).unwrap_err();
        assert!(err.message().contains("conflict"));
    }

    #[test]
    fn test_unknown_method_name_rejected() {
        let types = fixture_registry();
        let def = AdapterDefinition::new("WorkerAdapter", "app.Worker")
            .implements_method("run", stub("run_impl", 1))
            .unwrap()
            .implements_method("shutdown", stub("shutdown_impl", 2))
            .unwrap()
            .implements_method("fly", stub("fly_impl", 1))
            .unwrap();
        let err = def.validate(&types).unwrap_err();
        assert!(err.message().contains("fly"));
    }

    #[test]
    fn test_arity_mismatch_rejected() {
        let types = fixture_registry();
        let def = AdapterDefinition::new("WorkerAdapter", "app.Worker")
            .implements_method("run", stub("run_impl", 3))
            .unwrap()
            .implements_method("shutdown", stub("shutdown_impl", 2))
            .unwrap();
        let err = def.validate(&types).unwrap_err();
        assert!(err.message().contains("arity"));
    }

    #[test]
    fn test_star_shapes_enforced_at_insertion() {
        assert!(AdapterDefinition::new("A", "app.Worker")
            .implements_method(WILDCARD, stub("bad", 1))
            .is_err());
        assert!(AdapterDefinition::new("A", "app.Worker")
            .overrides_method(WILDCARD, stub("bad", 2))
            .is_err());
        assert!(AdapterDefinition::new("A", "app.Worker")
            .implements_method("run", stub("bad", 0))
            .is_err());
    }
}
