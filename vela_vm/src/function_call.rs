//! Free-function and constructor resolution.
//!
//! The candidate set is assembled from static scopes: callables declared
//! in the calling module, then in each imported module in import order,
//! then — for an explicitly qualified name — the named module directly.
//! Qualified names are normalized by merging the caller's own
//! qualification prefix with the target name, so shared prefixes need
//! not be restated. Function targets do not depend on a receiver, so the
//! installed guard is unconditional unless the winning candidate had
//! same-name rivals accepting the call's arity; those sites guard the
//! full argument type vector instead.

use std::sync::Arc;
use vela_core::error::{DispatchError, DispatchResult};
use vela_core::intern::{intern, InternedString};
use vela_core::types::{TypeRegistry, Visibility};
use vela_core::value::Value;
use vela_runtime::module::{ModuleDef, ModuleRegistry};

use crate::callsite::{CallConvention, Guard, ResolvedTarget, Resolution};
use crate::descriptor::{CallKind, InvocationDescriptor};
use crate::overload::{self, Candidate, Provenance, Selection};

/// Resolver for `CallKind::Function` and `CallKind::Constructor` sites.
pub struct FunctionResolver<'a> {
    types: &'a TypeRegistry,
    modules: &'a ModuleRegistry,
}

impl<'a> FunctionResolver<'a> {
    /// Create a resolver over the given registries.
    pub fn new(types: &'a TypeRegistry, modules: &'a ModuleRegistry) -> Self {
        Self { types, modules }
    }

    /// Resolve a function or constructor call site.
    pub fn resolve(
        &self,
        descriptor: &InvocationDescriptor,
        args: &[Value],
    ) -> DispatchResult<Resolution> {
        match descriptor.kind {
            CallKind::Constructor => self.resolve_constructor(descriptor, args),
            _ => self.resolve_function(descriptor, args),
        }
    }

    fn resolve_function(
        &self,
        descriptor: &InvocationDescriptor,
        args: &[Value],
    ) -> DispatchResult<Resolution> {
        let caller = self.modules.get(descriptor.module);
        let name_text = descriptor.name.as_str();
        let (qualifier, simple) = match name_text.rfind('.') {
            Some(at) => (
                Some(intern(&name_text[..at])),
                intern(&name_text[at + 1..]),
            ),
            None => (None, descriptor.name),
        };
        let mut saw_name = false;

        // Local module: every visibility, declaration order.
        if qualifier.is_none() {
            if let Some(caller) = &caller {
                if let Some(selection) =
                    self.select_in(caller, simple, args, true, &mut saw_name)
                {
                    return Ok(self.to_resolution(descriptor, selection, args, caller.name()));
                }
            }
        }

        // Imports, in import order; public callables only.
        if let Some(caller) = &caller {
            for &import in caller.imports() {
                let Some(imported) = self.modules.get(import) else {
                    continue;
                };
                let lookup = match qualifier {
                    None => Some(simple),
                    // `text.Utils::f` matches the import `acme.text.Utils`.
                    Some(q) if import.as_str().ends_with(q.as_str()) => Some(simple),
                    Some(_) => None,
                };
                if let Some(lookup) = lookup {
                    if let Some(selection) =
                        self.select_in(&imported, lookup, args, false, &mut saw_name)
                    {
                        return Ok(self.to_resolution(descriptor, selection, args, imported.name()));
                    }
                }
            }
        }

        // Explicitly qualified module, prefix-merged against the caller.
        if let Some(qualifier) = qualifier {
            let caller_name = caller.as_ref().map(|c| c.name().as_str());
            for module_name in qualified_candidates(caller_name, qualifier.as_str()) {
                let Some(module) = self.modules.get(module_name) else {
                    continue;
                };
                let include_local =
                    caller.as_ref().map(|c| c.name()) == Some(module.name());
                if let Some(selection) =
                    self.select_in(&module, simple, args, include_local, &mut saw_name)
                {
                    return Ok(self.to_resolution(descriptor, selection, args, module.name()));
                }
            }
        }

        tracing::debug!(
            name = name_text,
            module = descriptor.module.as_str(),
            "function resolution failed"
        );
        Err(self.failure(descriptor, args, saw_name))
    }

    fn resolve_constructor(
        &self,
        descriptor: &InvocationDescriptor,
        args: &[Value],
    ) -> DispatchResult<Resolution> {
        let caller = self.modules.get(descriptor.module);
        let caller_name = caller.as_ref().map(|c| c.name().as_str());
        let mut saw_name = false;

        for type_name in self.type_candidates(caller.as_deref(), descriptor.name, caller_name) {
            let Some(desc) = self.types.get_by_name(type_name) else {
                continue;
            };
            saw_name = true;
            let candidates: Vec<Candidate> = desc
                .constructors
                .iter()
                .filter(|c| c.visibility == Visibility::Public)
                .map(|c| Candidate::new(c.factory.clone(), Provenance::Constructor(desc.id)))
                .collect();
            if candidates.is_empty() {
                continue;
            }
            match overload::select(self.types, descriptor.name, args, &candidates) {
                Ok(selection) => {
                    return Ok(self.to_resolution(descriptor, selection, args, descriptor.module))
                }
                Err(DispatchError::NoApplicableOverload { .. }) => continue,
                Err(other) => return Err(other),
            }
        }
        Err(self.failure(descriptor, args, saw_name))
    }

    /// Candidate type names for a constructor call, in probe order.
    fn type_candidates(
        &self,
        caller: Option<&ModuleDef>,
        name: InternedString,
        caller_name: Option<&str>,
    ) -> Vec<InternedString> {
        let mut candidates = vec![name];
        for merged in qualified_candidates(caller_name, name.as_str()) {
            if !candidates.contains(&merged) {
                candidates.push(merged);
            }
        }
        if let Some(caller) = caller {
            for &import in caller.imports() {
                let joined = intern(&format!("{}.{}", import, name));
                if !candidates.contains(&joined) {
                    candidates.push(joined);
                }
                // `import acme.gfx.Circle` then `Circle(...)`.
                if import.as_str().ends_with(name.as_str()) && !candidates.contains(&import) {
                    candidates.push(import);
                }
            }
        }
        candidates
    }

    fn select_in(
        &self,
        module: &ModuleDef,
        name: InternedString,
        args: &[Value],
        include_local: bool,
        saw_name: &mut bool,
    ) -> Option<Selection> {
        let provenance = Provenance::Import(module.name());
        let candidates: Vec<Candidate> = module
            .callables_named(name)
            .filter(|c| include_local || c.visibility == Visibility::Public)
            .map(|c| {
                Candidate::new(
                    c.target.clone(),
                    if include_local {
                        Provenance::LocalDefinition
                    } else {
                        provenance.clone()
                    },
                )
            })
            .collect();
        if candidates.is_empty() {
            return None;
        }
        *saw_name = true;
        // An arity/type mismatch in this scope lets an outer scope match.
        overload::select(self.types, name, args, &candidates).ok()
    }

    fn to_resolution(
        &self,
        descriptor: &InvocationDescriptor,
        selection: Selection,
        args: &[Value],
        provider: InternedString,
    ) -> Resolution {
        let candidate = selection.candidate;
        let convention = if candidate.is_varargs() && !descriptor.varargs {
            CallConvention::CollectVarargs {
                fixed: candidate.arity().saturating_sub(1),
            }
        } else {
            CallConvention::Direct
        };
        // A function target does not depend on a receiver, so the guard
        // is unconditional unless rival overloads could bind this arity.
        let guard = if selection.overloaded {
            Guard::from_argument_types(args)
        } else {
            Guard::Always
        };
        Resolution {
            guard,
            target: Arc::new(ResolvedTarget {
                callable: candidate.target,
                convention,
                frame: Some(provider),
            }),
        }
    }

    fn failure(
        &self,
        descriptor: &InvocationDescriptor,
        args: &[Value],
        saw_name: bool,
    ) -> DispatchError {
        if saw_name {
            DispatchError::NoApplicableOverload {
                name: descriptor.name,
                arity: args.len(),
            }
        } else {
            DispatchError::UnresolvedCallable {
                name: descriptor.name,
                module: Some(descriptor.module),
            }
        }
    }
}

/// Merge a caller's qualification prefix with a qualified target name.
///
/// For a caller `acme.text.main` and a target `text.utils`, the shared
/// segment `text` anchors the merge `acme.text.utils`. Candidates are
/// returned most direct first: the target as written, merges anchored
/// deepest in the caller's path first, then the plain caller-prefixed
/// name.
fn qualified_candidates(caller: Option<&str>, target: &str) -> Vec<InternedString> {
    let mut candidates = vec![intern(target)];
    let Some(caller) = caller else {
        return candidates;
    };
    let caller_segments: Vec<&str> = caller.split('.').collect();
    let target_head = target.split('.').next().unwrap_or(target);
    for anchor in (0..caller_segments.len()).rev() {
        if caller_segments[anchor] == target_head {
            let merged: Vec<&str> = caller_segments[..anchor]
                .iter()
                .copied()
                .chain(target.split('.'))
                .collect();
            let merged = intern(&merged.join("."));
            if !candidates.contains(&merged) {
                candidates.push(merged);
            }
        }
    }
    let prefixed = intern(&format!("{}.{}", caller, target));
    if !candidates.contains(&prefixed) {
        candidates.push(prefixed);
    }
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use vela_core::value::FunctionRef;
    use vela_runtime::module::CallableDecl;

    fn constant(name: &str, arity: usize, tag: i32) -> FunctionRef {
        FunctionRef::untyped(name, arity, move |_| Ok(Value::Int(tag)))
    }

    struct Fixture {
        types: TypeRegistry,
        modules: ModuleRegistry,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                types: TypeRegistry::new(),
                modules: ModuleRegistry::new(),
            }
        }

        fn resolve(&self, descriptor: &InvocationDescriptor, args: &[Value]) -> DispatchResult<Value> {
            let resolution =
                FunctionResolver::new(&self.types, &self.modules).resolve(descriptor, args)?;
            resolution.target.invoke(args)
        }
    }

    #[test]
    fn test_local_declaration_wins_over_import() {
        let fixture = Fixture::new();
        fixture
            .modules
            .register(ModuleDef::new("acme.util").with_function(constant("greet", 0, 200)));
        fixture.modules.register(
            ModuleDef::new("acme.main")
                .with_import("acme.util")
                .with_function(constant("greet", 0, 100)),
        );
        let descriptor = InvocationDescriptor::function("greet", 0, "acme.main");
        assert_eq!(fixture.resolve(&descriptor, &[]).unwrap(), Value::Int(100));
    }

    #[test]
    fn test_imports_probed_in_order() {
        let fixture = Fixture::new();
        fixture
            .modules
            .register(ModuleDef::new("acme.a").with_function(constant("f", 0, 1)));
        fixture
            .modules
            .register(ModuleDef::new("acme.b").with_function(constant("f", 0, 2)));
        fixture.modules.register(
            ModuleDef::new("acme.main")
                .with_import("acme.a")
                .with_import("acme.b"),
        );
        let descriptor = InvocationDescriptor::function("f", 0, "acme.main");
        assert_eq!(fixture.resolve(&descriptor, &[]).unwrap(), Value::Int(1));
    }

    #[test]
    fn test_local_callables_invisible_to_importers() {
        let fixture = Fixture::new();
        fixture.modules.register(
            ModuleDef::new("acme.util")
                .with_callable(CallableDecl::local(constant("hidden", 0, 9))),
        );
        fixture
            .modules
            .register(ModuleDef::new("acme.main").with_import("acme.util"));
        let descriptor = InvocationDescriptor::function("hidden", 0, "acme.main");
        assert!(matches!(
            fixture.resolve(&descriptor, &[]),
            Err(DispatchError::UnresolvedCallable { .. })
        ));
    }

    #[test]
    fn test_qualified_call_direct() {
        let fixture = Fixture::new();
        fixture
            .modules
            .register(ModuleDef::new("acme.util").with_function(constant("greet", 0, 7)));
        fixture.modules.register(ModuleDef::new("acme.main"));
        let descriptor = InvocationDescriptor::function("acme.util.greet", 0, "acme.main");
        assert_eq!(fixture.resolve(&descriptor, &[]).unwrap(), Value::Int(7));
    }

    #[test]
    fn test_qualified_call_merges_caller_prefix() {
        let fixture = Fixture::new();
        fixture
            .modules
            .register(ModuleDef::new("acme.text.utils").with_function(constant("trim", 0, 3)));
        fixture.modules.register(ModuleDef::new("acme.text.main"));
        // `text.utils::trim` from `acme.text.main` merges to
        // `acme.text.utils::trim`.
        let descriptor = InvocationDescriptor::function("text.utils.trim", 0, "acme.text.main");
        assert_eq!(fixture.resolve(&descriptor, &[]).unwrap(), Value::Int(3));
    }

    #[test]
    fn test_arity_mismatch_in_local_falls_through_to_import() {
        let fixture = Fixture::new();
        fixture
            .modules
            .register(ModuleDef::new("acme.util").with_function(constant("f", 2, 20)));
        fixture.modules.register(
            ModuleDef::new("acme.main")
                .with_import("acme.util")
                .with_function(constant("f", 1, 10)),
        );
        let descriptor = InvocationDescriptor::function("f", 2, "acme.main");
        assert_eq!(
            fixture
                .resolve(&descriptor, &[Value::Int(1), Value::Int(2)])
                .unwrap(),
            Value::Int(20)
        );
    }

    #[test]
    fn test_fixed_arity_preferred_over_varargs() {
        let fixture = Fixture::new();
        fixture.modules.register(
            ModuleDef::new("acme.main")
                .with_function(constant("plus", 2, 100))
                .with_function(FunctionRef::untyped_varargs("plus", 3, |_| {
                    Ok(Value::Int(200))
                })),
        );
        // plus(1, 2) matches both; the 2-arity form must win.
        let descriptor = InvocationDescriptor::function("plus", 2, "acme.main");
        assert_eq!(
            fixture
                .resolve(&descriptor, &[Value::Int(1), Value::Int(2)])
                .unwrap(),
            Value::Int(100)
        );
    }

    #[test]
    fn test_varargs_arguments_collected() {
        let fixture = Fixture::new();
        fixture.modules.register(ModuleDef::new("acme.main").with_function(
            FunctionRef::untyped_varargs("tail", 2, |args| {
                Ok(args[1].clone())
            }),
        ));
        let descriptor = InvocationDescriptor::function("tail", 3, "acme.main");
        let result = fixture
            .resolve(&descriptor, &[Value::Int(1), Value::Int(2), Value::Int(3)])
            .unwrap();
        assert_eq!(result, Value::array(vec![Value::Int(2), Value::Int(3)]));
    }

    #[test]
    fn test_unresolved_vs_no_applicable() {
        let fixture = Fixture::new();
        fixture
            .modules
            .register(ModuleDef::new("acme.main").with_function(constant("f", 1, 1)));
        let missing = InvocationDescriptor::function("nope", 0, "acme.main");
        assert!(matches!(
            fixture.resolve(&missing, &[]),
            Err(DispatchError::UnresolvedCallable { .. })
        ));
        let wrong_arity = InvocationDescriptor::function("f", 3, "acme.main");
        assert!(matches!(
            fixture.resolve(&wrong_arity, &[Value::Nil, Value::Nil, Value::Nil]),
            Err(DispatchError::NoApplicableOverload { .. })
        ));
    }

    #[test]
    fn test_constructor_through_import() {
        use vela_core::types::{ConstructorDef, TypeDesc};
        let fixture = Fixture::new();
        fixture.types.register(
            TypeDesc::reference("acme.gfx.Circle").with_constructor(ConstructorDef::public(
                FunctionRef::untyped("Circle", 1, |args| {
                    Ok(Value::array(vec![Value::str("circle"), args[0].clone()]))
                }),
            )),
        );
        fixture
            .modules
            .register(ModuleDef::new("acme.main").with_import("acme.gfx.Circle"));
        let descriptor = InvocationDescriptor::constructor("Circle", 1, "acme.main");
        let result = fixture.resolve(&descriptor, &[Value::Int(4)]).unwrap();
        assert_eq!(
            result,
            Value::array(vec![Value::str("circle"), Value::Int(4)])
        );
    }

    #[test]
    fn test_qualified_candidates_overlap_merge() {
        let candidates = qualified_candidates(Some("acme.text.main"), "text.utils");
        assert!(candidates.contains(&intern("text.utils")));
        assert!(candidates.contains(&intern("acme.text.utils")));
        assert!(candidates.contains(&intern("acme.text.main.text.utils")));
    }
}
