//! Adapter synthesis.
//!
//! Turns a validated [`AdapterDefinition`] into a registered concrete
//! type: one constructor per public or protected parent constructor
//! (with the definition carried as a hidden first field of every
//! instance), and one redirect stub per virtual method of the parent
//! and interfaces. A stub's body does nothing but re-enter the
//! dispatcher through a fresh call site tagged with the method name, so
//! adapter method dispatch reuses the method resolver instead of
//! embedding resolution logic in generated code. Once defined, an
//! adapter type is permanently registered.

use std::any::Any;
use std::sync::Arc;
use vela_core::error::{DispatchError, DispatchResult};
use vela_core::intern::InternedString;
use vela_core::types::{
    ConstructorDef, MethodDef, TypeDesc, TypeId, TypeRegistry, Visibility,
};
use vela_core::value::{FunctionRef, Object, Value};
use vela_runtime::adapters::{AdapterDefinition, AdapterDefinitionProblem};

use crate::callsite::{Guard, ResolvedTarget, Resolution};
use crate::descriptor::{CallKind, InvocationDescriptor};
use crate::dispatch::Dispatcher;

// =============================================================================
// Adapter Instances
// =============================================================================

/// An instance of a synthesized adapter type.
///
/// Carries the definition (the hidden first field every constructor
/// prepends) and the state produced by the parent constructor.
#[derive(Debug)]
pub struct AdapterInstance {
    type_id: TypeId,
    definition: Arc<AdapterDefinition>,
    parent_state: Value,
}

impl AdapterInstance {
    /// The definition this instance dispatches through.
    pub fn definition(&self) -> &Arc<AdapterDefinition> {
        &self.definition
    }

    /// The value produced by the parent constructor.
    pub fn parent_state(&self) -> &Value {
        &self.parent_state
    }
}

impl Object for AdapterInstance {
    fn type_id(&self) -> TypeId {
        self.type_id
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// =============================================================================
// Synthesis
// =============================================================================

/// Validate a definition and register the synthesized type.
pub fn synthesize(
    dispatcher: &Dispatcher,
    definition: AdapterDefinition,
) -> Result<TypeId, AdapterDefinitionProblem> {
    let types = dispatcher.types();
    definition.validate(types)?;
    let parent = types.get_by_name(definition.parent()).ok_or_else(|| {
        AdapterDefinitionProblem::new(format!("parent type not found: {}", definition.parent()))
    })?;
    let interface_ids: Vec<TypeId> = definition
        .interfaces()
        .filter_map(|name| types.get_by_name(name))
        .map(|desc| desc.id)
        .collect();

    let definition = Arc::new(definition);
    let type_id = types.allocate_type_id();
    let mut desc = TypeDesc::reference(definition.name().as_str()).with_parent(parent.id);
    desc.id = type_id;
    for &iface in &interface_ids {
        desc = desc.with_interface(iface);
    }

    // One redirect stub per virtual method; dispatch goes back through
    // the method resolver via a fresh call site.
    for method in types.overridable_methods(parent.id, &interface_ids) {
        let site_id = dispatcher.allocate_synthetic_site();
        let descriptor = Arc::new(InvocationDescriptor {
            kind: CallKind::Method,
            name: method.name,
            arity: method.param_count,
            varargs: method.varargs,
            null_safe: false,
            constant: false,
            module: definition.name(),
        });
        let stub_dispatcher = dispatcher.clone();
        let stub = FunctionRef::untyped(method.name.as_str(), method.param_count, move |args| {
            stub_dispatcher.resolve_and_cache(site_id, &descriptor, args)
        });
        desc = desc.with_method(MethodDef::native(method.name.as_str(), method.param_count, stub));
    }

    // One constructor per public/protected parent constructor, with the
    // definition prepended as the hidden first field.
    for parent_ctor in &parent.constructors {
        if !matches!(
            parent_ctor.visibility,
            Visibility::Public | Visibility::Protected
        ) {
            continue;
        }
        let parent_factory = parent_ctor.factory.clone();
        let param_types: Vec<TypeId> = parent_factory.param_types().to_vec();
        let varargs = parent_factory.is_varargs();
        let ctor_definition = definition.clone();
        let factory = FunctionRef::new(
            definition.name().as_str(),
            &param_types,
            varargs,
            move |args| {
                let parent_state = parent_factory.invoke(args)?;
                Ok(Value::Object(Arc::new(AdapterInstance {
                    type_id,
                    definition: ctor_definition.clone(),
                    parent_state,
                })))
            },
        );
        desc = desc.with_constructor(ConstructorDef::public(factory));
    }

    types.define(desc);
    tracing::debug!(
        name = definition.name().as_str(),
        parent = definition.parent().as_str(),
        "synthesized adapter type"
    );
    Ok(type_id)
}

// =============================================================================
// Adapter Method Dispatch
// =============================================================================

/// Resolve a method call on an adapter instance through its definition:
/// implementation, wildcard implementation, override (with a bound
/// `super` reference), wildcard override, then the parent's own method.
pub fn resolve_adapter_method(
    types: &TypeRegistry,
    instance: &AdapterInstance,
    name: InternedString,
) -> DispatchResult<Resolution> {
    let definition = instance.definition().clone();
    let guard = Guard::ReceiverType(instance.type_id);
    let resolve = |callable: FunctionRef| {
        Ok(Resolution {
            guard: guard.clone(),
            target: ResolvedTarget::direct(callable),
        })
    };

    if let Some(implementation) = definition.implementation(name) {
        return resolve(implementation.clone());
    }
    if let Some(star) = definition.star_implementation() {
        let star = star.clone();
        return resolve(FunctionRef::untyped(name.as_str(), 2, move |args| {
            star.invoke(&[
                Value::str(name.as_str()),
                Value::Array(Arc::from(args.to_vec())),
            ])
        }));
    }

    let super_target = super_method(types, instance.type_id, name);
    if let Some(override_) = definition.override_for(name) {
        let override_ = override_.clone();
        let super_ref = super_target.unwrap_or_else(|| missing_super(name));
        return resolve(FunctionRef::untyped(
            name.as_str(),
            override_.arity(),
            move |args| {
                let mut full = Vec::with_capacity(args.len() + 1);
                full.push(Value::Function(super_ref.clone()));
                full.extend_from_slice(args);
                override_.invoke(&full)
            },
        ));
    }
    if let Some(star) = definition.star_override() {
        let star = star.clone();
        let super_ref = super_target.unwrap_or_else(|| missing_super(name));
        return resolve(FunctionRef::untyped(name.as_str(), 3, move |args| {
            star.invoke(&[
                Value::Function(super_ref.clone()),
                Value::str(name.as_str()),
                Value::Array(Arc::from(args.to_vec())),
            ])
        }));
    }
    if let Some(super_target) = super_target {
        return resolve(super_target);
    }
    Err(DispatchError::UnresolvedCallable { name, module: None })
}

/// The parent's concrete method, bound as the `super` reference.
fn super_method(types: &TypeRegistry, adapter_type: TypeId, name: InternedString) -> Option<FunctionRef> {
    let parent = types.get(adapter_type)?.parent?;
    let (_, method) = types.find_native_method(parent, name)?;
    method.native
}

/// A `super` reference for a method the parent never implemented;
/// faults if the override actually calls it.
fn missing_super(name: InternedString) -> FunctionRef {
    FunctionRef::untyped_varargs("super", 1, move |_| {
        Err(DispatchError::fault(format!(
            "no parent implementation behind super for method {}",
            name
        )))
    })
}
