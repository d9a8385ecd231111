//! Receiver-typed method resolution.
//!
//! The candidate set is assembled in precedence order: the receiver's
//! own declared methods (native methods take precedence over
//! everything), then the augmentation resolver's ranked result, then the
//! property-accessor fallback, then — for dynamic property-bag
//! receivers — the property read/write/invoke fallback. Adapter
//! instances are dispatched through their definition before anything
//! else, so synthesized redirect stubs never re-enter themselves.
//!
//! Null-safe call sites short-circuit in the dispatcher before any
//! resolution happens here; a receiver reaching this resolver is never
//! nil.

use std::sync::Arc;
use vela_core::error::{DispatchError, DispatchResult};
use vela_core::intern::{intern, InternedString};
use vela_core::types::{TypeId, TypeRegistry};
use vela_core::value::{FunctionRef, Value};
use vela_runtime::dynamic_object::{self, DynamicObject};
use vela_runtime::module::ModuleRegistry;

use crate::adapter::{self, AdapterInstance};
use crate::augmentation::AugmentationResolver;
use crate::callsite::{CallConvention, Guard, ResolvedTarget, Resolution};
use crate::descriptor::InvocationDescriptor;
use crate::overload::{self, Candidate, Provenance};

/// Resolver for `CallKind::Method` sites.
pub struct MethodResolver<'a> {
    types: &'a TypeRegistry,
    modules: &'a ModuleRegistry,
}

impl<'a> MethodResolver<'a> {
    /// Create a resolver over the given registries.
    pub fn new(types: &'a TypeRegistry, modules: &'a ModuleRegistry) -> Self {
        Self { types, modules }
    }

    /// Resolve a method call site; `args[0]` is the (non-nil) receiver.
    pub fn resolve(
        &self,
        descriptor: &InvocationDescriptor,
        args: &[Value],
        call_stack: &[InternedString],
    ) -> DispatchResult<Resolution> {
        let receiver = args.first().ok_or_else(|| {
            DispatchError::fault(format!("method {} called without a receiver", descriptor.name))
        })?;
        let receiver_type = receiver.type_id();

        // Adapter instances dispatch through their definition.
        if let Some(instance) = receiver.downcast_object::<AdapterInstance>() {
            return adapter::resolve_adapter_method(self.types, instance, descriptor.name);
        }

        // Declared methods of the receiver's type, most specific first.
        if let Some(resolution) = self.declared_method(descriptor, receiver_type, args)? {
            return Ok(resolution);
        }

        // Ranked augmentations.
        let local = self.modules.get(descriptor.module);
        let augmentation = AugmentationResolver::new(self.types, self.modules).resolve(
            receiver_type,
            descriptor.name,
            args,
            local.as_ref(),
            call_stack,
        )?;
        if let Some(selection) = augmentation {
            let convention = if selection.target.is_varargs() && !descriptor.varargs {
                CallConvention::CollectVarargs {
                    fixed: selection.target.arity().saturating_sub(1),
                }
            } else {
                CallConvention::Direct
            };
            let guard = if selection.overloaded {
                Guard::from_argument_types(args)
            } else {
                Guard::ReceiverType(receiver_type)
            };
            return Ok(Resolution {
                guard,
                target: Arc::new(ResolvedTarget {
                    callable: selection.target,
                    convention,
                    frame: Some(selection.provider),
                }),
            });
        }

        // Property accessors: x.name() -> get_name()/is_name(),
        // x.name(v) -> set_name(v) with a fluent receiver return.
        if let Some(resolution) = self.property_accessor(descriptor, receiver_type, args) {
            return Ok(resolution);
        }

        // Dynamic property-bag fallback.
        if let Some(resolution) = self.dynamic_object_target(descriptor, receiver) {
            return Ok(resolution);
        }

        tracing::debug!(
            name = descriptor.name.as_str(),
            receiver = ?receiver_type,
            "method resolution failed"
        );
        Err(DispatchError::UnresolvedCallable {
            name: descriptor.name,
            module: Some(descriptor.module),
        })
    }

    /// Native methods declared on the receiver's type or a supertype.
    fn declared_method(
        &self,
        descriptor: &InvocationDescriptor,
        receiver_type: TypeId,
        args: &[Value],
    ) -> DispatchResult<Option<Resolution>> {
        let candidates = self.native_candidates(receiver_type, descriptor.name);
        if candidates.is_empty() {
            return Ok(None);
        }
        let selection = match overload::select(self.types, descriptor.name, args, &candidates) {
            Ok(selection) => selection,
            // Give augmentations a chance on arity/type mismatch.
            Err(DispatchError::NoApplicableOverload { .. }) => return Ok(None),
            Err(other) => return Err(other),
        };
        let candidate = selection.candidate;
        let convention = if candidate.is_varargs() && !descriptor.varargs {
            CallConvention::CollectVarargs {
                fixed: candidate.arity().saturating_sub(1),
            }
        } else {
            CallConvention::Direct
        };
        // Several applicable overloads: guard the full argument type
        // vector so a different argument mix re-resolves.
        let guard = if selection.overloaded {
            Guard::from_argument_types(args)
        } else {
            Guard::ReceiverType(receiver_type)
        };
        Ok(Some(Resolution {
            guard,
            target: Arc::new(ResolvedTarget {
                callable: candidate.target,
                convention,
                frame: None,
            }),
        }))
    }

    /// Walk the receiver type and its parents collecting native methods
    /// with the given name, declaration order within each type.
    fn native_candidates(&self, receiver_type: TypeId, name: InternedString) -> Vec<Candidate> {
        let mut candidates = Vec::new();
        let mut current = Some(receiver_type);
        while let Some(type_id) = current {
            let Some(desc) = self.types.get(type_id) else {
                break;
            };
            for method in desc.methods_named(name) {
                if let Some(native) = &method.native {
                    candidates.push(Candidate::new(
                        native.clone(),
                        Provenance::DeclaredMethod(type_id),
                    ));
                }
            }
            current = desc.parent;
        }
        candidates
    }

    fn property_accessor(
        &self,
        descriptor: &InvocationDescriptor,
        receiver_type: TypeId,
        args: &[Value],
    ) -> Option<Resolution> {
        let name = descriptor.name.as_str();
        if args.len() == 1 {
            let getter = self
                .first_native(receiver_type, intern(&format!("get_{}", name)), 1)
                .or_else(|| self.first_native(receiver_type, intern(&format!("is_{}", name)), 1))?;
            return Some(Resolution {
                guard: Guard::ReceiverType(receiver_type),
                target: ResolvedTarget::direct(getter),
            });
        }
        if args.len() == 2 {
            let setter = self.first_native(receiver_type, intern(&format!("set_{}", name)), 2)?;
            // A void setter returns the receiver to keep chains fluent.
            let fluent = FunctionRef::untyped(&format!("set_{}", name), 2, move |args| {
                let result = setter.invoke(args)?;
                if result.is_nil() {
                    Ok(args[0].clone())
                } else {
                    Ok(result)
                }
            });
            return Some(Resolution {
                guard: Guard::ReceiverType(receiver_type),
                target: ResolvedTarget::direct(fluent),
            });
        }
        None
    }

    fn first_native(
        &self,
        receiver_type: TypeId,
        name: InternedString,
        arity: usize,
    ) -> Option<FunctionRef> {
        let (_, method) = self.types.find_native_method(receiver_type, name)?;
        let native = method.native?;
        (native.arity() == arity).then_some(native)
    }

    fn dynamic_object_target(
        &self,
        descriptor: &InvocationDescriptor,
        receiver: &Value,
    ) -> Option<Resolution> {
        receiver.downcast_object::<DynamicObject>()?;
        let name = descriptor.name;
        let callable = if dynamic_object::is_reserved_name(name) {
            dynamic_object::protocol_target(name)?
        } else {
            // Trampoline: the property is re-read on every call, so the
            // cached target stays valid across object mutation.
            FunctionRef::untyped(name.as_str(), descriptor.arity, move |args| {
                let object = args[0]
                    .downcast_object::<DynamicObject>()
                    .ok_or_else(|| DispatchError::fault("receiver is not a dynamic object"))?;
                object.dispatch(&args[0], name, args)
            })
        };
        Some(Resolution {
            guard: Guard::ReceiverType(TypeId::DYNAMIC_OBJECT),
            target: ResolvedTarget::direct(callable),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vela_core::types::{MethodDef, TypeDesc};
    use vela_runtime::module::{CallableDecl, ModuleDef};

    /// Minimal receiver carrying an arbitrary runtime type.
    #[derive(Debug)]
    struct Fake(TypeId);

    impl vela_core::value::Object for Fake {
        fn type_id(&self) -> TypeId {
            self.0
        }
        fn as_any(&self) -> &dyn std::any::Any {
            self
        }
    }

    struct Fixture {
        types: TypeRegistry,
        modules: ModuleRegistry,
    }

    impl Fixture {
        fn new() -> Self {
            let fixture = Self {
                types: TypeRegistry::new(),
                modules: ModuleRegistry::new(),
            };
            fixture.modules.register(ModuleDef::new("acme.main"));
            fixture
        }

        fn resolve_and_run(&self, name: &str, args: &[Value]) -> DispatchResult<Value> {
            let descriptor = InvocationDescriptor::method(name, args.len(), "acme.main");
            let resolution =
                MethodResolver::new(&self.types, &self.modules).resolve(&descriptor, args, &[])?;
            resolution.target.invoke(args)
        }
    }

    #[test]
    fn test_declared_native_method() {
        let fixture = Fixture::new();
        let point = fixture.types.register(
            TypeDesc::reference("gfx.Point").with_method(MethodDef::native(
                "norm",
                1,
                FunctionRef::untyped("norm", 1, |_| Ok(Value::Int(5))),
            )),
        );
        let receiver = Value::Object(Arc::new(Fake(point)));
        assert_eq!(
            fixture.resolve_and_run("norm", &[receiver]).unwrap(),
            Value::Int(5)
        );
    }

    #[test]
    fn test_native_precedes_augmentation() {
        let fixture = Fixture::new();
        fixture.modules.register(
            ModuleDef::new("acme.main").with_augmentation(
                "Any",
                vec![CallableDecl::public(FunctionRef::untyped(
                    "size",
                    1,
                    |_| Ok(Value::Int(-1)),
                ))],
            ),
        );
        // Builtin descriptors are immutable, so the native lives on a
        // user type.
        let boxed = fixture.types.register(
            TypeDesc::reference("acme.Wrapper").with_method(MethodDef::native(
                "size",
                1,
                FunctionRef::untyped("size", 1, |_| Ok(Value::Int(3))),
            )),
        );
        let receiver = Value::Object(Arc::new(Fake(boxed)));
        assert_eq!(
            fixture.resolve_and_run("size", &[receiver]).unwrap(),
            Value::Int(3)
        );
    }

    #[test]
    fn test_augmentation_on_builtin_receiver() {
        let fixture = Fixture::new();
        fixture.modules.register(
            ModuleDef::new("acme.main").with_augmentation(
                "String",
                vec![CallableDecl::public(FunctionRef::untyped(
                    "yop",
                    1,
                    |_| Ok(Value::str("yop!")),
                ))],
            ),
        );
        assert_eq!(
            fixture
                .resolve_and_run("yop", &[Value::str("x")])
                .unwrap(),
            Value::str("yop!")
        );
    }

    #[test]
    fn test_property_accessor_getter() {
        let fixture = Fixture::new();
        let account = fixture.types.register(
            TypeDesc::reference("bank.Account").with_method(MethodDef::native(
                "get_total",
                1,
                FunctionRef::untyped("get_total", 1, |_| Ok(Value::Int(99))),
            )),
        );
        let receiver = Value::Object(Arc::new(Fake(account)));
        assert_eq!(
            fixture.resolve_and_run("total", &[receiver]).unwrap(),
            Value::Int(99)
        );
    }

    #[test]
    fn test_property_accessor_fluent_setter() {
        let fixture = Fixture::new();
        let account = fixture.types.register(
            TypeDesc::reference("bank.Account2").with_method(MethodDef::native(
                "set_total",
                2,
                FunctionRef::untyped("set_total", 2, |_| Ok(Value::Nil)),
            )),
        );
        let receiver = Value::Object(Arc::new(Fake(account)));
        let result = fixture
            .resolve_and_run("total", &[receiver.clone(), Value::Int(5)])
            .unwrap();
        // void setter returns the receiver
        assert_eq!(result, receiver);
    }

    #[test]
    fn test_dynamic_object_method() {
        let fixture = Fixture::new();
        let receiver = DynamicObject::new_value();
        let object = receiver.downcast_object::<DynamicObject>().unwrap();
        object
            .define(
                intern("shout"),
                Value::Function(FunctionRef::untyped("shout", 1, |_| {
                    Ok(Value::str("HEY"))
                })),
            )
            .unwrap();
        assert_eq!(
            fixture.resolve_and_run("shout", &[receiver]).unwrap(),
            Value::str("HEY")
        );
    }

    #[test]
    fn test_dynamic_object_reserved_protocol() {
        let fixture = Fixture::new();
        let receiver = DynamicObject::new_value();
        fixture
            .resolve_and_run("define", &[receiver.clone(), Value::str("x"), Value::Int(1)])
            .unwrap();
        let object = receiver.downcast_object::<DynamicObject>().unwrap();
        assert_eq!(object.get(intern("x")), Value::Int(1));
    }

    #[test]
    fn test_unresolved_method() {
        let fixture = Fixture::new();
        let result = fixture.resolve_and_run("nope", &[Value::Int(1)]);
        assert!(matches!(
            result,
            Err(DispatchError::UnresolvedCallable { .. })
        ));
    }

    #[test]
    fn test_trampoline_tracks_mutation() {
        let fixture = Fixture::new();
        let receiver = DynamicObject::new_value();
        let object = receiver.downcast_object::<DynamicObject>().unwrap();
        object
            .define(
                intern("answer"),
                Value::Function(FunctionRef::untyped("answer", 1, |_| Ok(Value::Int(1)))),
            )
            .unwrap();
        let descriptor = InvocationDescriptor::method("answer", 1, "acme.main");
        let resolution = MethodResolver::new(&fixture.types, &fixture.modules)
            .resolve(&descriptor, &[receiver.clone()], &[])
            .unwrap();
        assert_eq!(
            resolution.target.invoke(&[receiver.clone()]).unwrap(),
            Value::Int(1)
        );
        // Redefine the property: the cached trampoline follows.
        object
            .define(
                intern("answer"),
                Value::Function(FunctionRef::untyped("answer", 1, |_| Ok(Value::Int(2)))),
            )
            .unwrap();
        assert_eq!(
            resolution.target.invoke(&[receiver]).unwrap(),
            Value::Int(2)
        );
    }
}
