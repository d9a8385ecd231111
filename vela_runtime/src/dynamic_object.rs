//! Dynamic property-bag objects.
//!
//! A dynamic object maps property names to values; a property holding a
//! function reference acts as a method whose first parameter is the
//! receiver. The method resolver falls back to these semantics when a
//! receiver is a dynamic object and no declared method or augmentation
//! matched. Mutation goes through a lock, which keeps the resolver's
//! cached trampoline valid: the property is re-read on every call.

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::any::Any;
use std::sync::Arc;
use vela_core::error::{DispatchError, DispatchResult};
use vela_core::intern::{intern, InternedString};
use vela_core::types::TypeId;
use vela_core::value::{FunctionRef, Object, Value};

/// Protocol names handled by the runtime itself; a same-named user
/// property never shadows them.
pub const RESERVED_NAMES: &[&str] = &[
    "get",
    "define",
    "undefine",
    "mixin",
    "copy",
    "freeze",
    "frozen",
    "properties",
    "has_method",
    "fallback",
];

/// Whether `name` is part of the dynamic-object protocol.
pub fn is_reserved_name(name: InternedString) -> bool {
    RESERVED_NAMES.iter().any(|&r| intern(r) == name)
}

#[derive(Debug, Default)]
struct Inner {
    properties: FxHashMap<InternedString, Value>,
    frozen: bool,
}

/// A mutable bag of named properties.
#[derive(Debug, Default)]
pub struct DynamicObject {
    inner: RwLock<Inner>,
}

impl DynamicObject {
    /// Create an empty dynamic object.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty dynamic object already wrapped as a value.
    pub fn new_value() -> Value {
        Value::Object(Arc::new(Self::new()))
    }

    /// Read a property; `Nil` when absent.
    pub fn get(&self, name: InternedString) -> Value {
        self.inner
            .read()
            .properties
            .get(&name)
            .cloned()
            .unwrap_or(Value::Nil)
    }

    /// Whether the property is present.
    pub fn has_property(&self, name: InternedString) -> bool {
        self.inner.read().properties.contains_key(&name)
    }

    /// Define or redefine a property.
    pub fn define(&self, name: InternedString, value: Value) -> DispatchResult<()> {
        let mut inner = self.inner.write();
        if inner.frozen {
            return Err(DispatchError::fault(format!(
                "cannot define property {} on a frozen dynamic object",
                name
            )));
        }
        inner.properties.insert(name, value);
        Ok(())
    }

    /// Remove a property.
    pub fn undefine(&self, name: InternedString) -> DispatchResult<()> {
        let mut inner = self.inner.write();
        if inner.frozen {
            return Err(DispatchError::fault(format!(
                "cannot undefine property {} on a frozen dynamic object",
                name
            )));
        }
        inner.properties.remove(&name);
        Ok(())
    }

    /// Copy every property of `other` into this object.
    pub fn mixin(&self, other: &DynamicObject) -> DispatchResult<()> {
        let copied: Vec<(InternedString, Value)> = other.properties();
        let mut inner = self.inner.write();
        if inner.frozen {
            return Err(DispatchError::fault(
                "cannot mix into a frozen dynamic object",
            ));
        }
        for (name, value) in copied {
            inner.properties.insert(name, value);
        }
        Ok(())
    }

    /// A thawed copy with the same properties.
    pub fn copy(&self) -> DynamicObject {
        let object = DynamicObject::new();
        {
            let mut inner = object.inner.write();
            inner.properties = self.inner.read().properties.clone();
        }
        object
    }

    /// Forbid further property mutation.
    pub fn freeze(&self) {
        self.inner.write().frozen = true;
    }

    /// Whether the object is frozen.
    pub fn is_frozen(&self) -> bool {
        self.inner.read().frozen
    }

    /// Property snapshot, sorted by name for deterministic iteration.
    pub fn properties(&self) -> Vec<(InternedString, Value)> {
        let inner = self.inner.read();
        let mut entries: Vec<_> = inner
            .properties
            .iter()
            .map(|(k, v)| (*k, v.clone()))
            .collect();
        entries.sort_by_key(|(k, _)| k.as_str());
        entries
    }

    /// Whether the property exists and holds a callable.
    pub fn has_method(&self, name: InternedString) -> bool {
        matches!(
            self.inner.read().properties.get(&name),
            Some(Value::Function(_))
        )
    }

    /// The user-installed fallback callable, if any. It is invoked as
    /// `(receiver, name, args...)` for names this object does not define.
    pub fn fallback(&self) -> Option<FunctionRef> {
        match self.inner.read().properties.get(&intern("fallback")) {
            Some(Value::Function(f)) => Some(f.clone()),
            _ => None,
        }
    }

    /// Dispatch a (non-reserved) method call on this object.
    ///
    /// Semantics, in order:
    /// - property holds a callable: invoke it with the receiver first;
    /// - arity 1: read the property (`Nil` when absent and no fallback);
    /// - arity 2: define the property, returning the receiver;
    /// - otherwise: the `fallback` callable, or an unresolved error.
    pub fn dispatch(
        &self,
        receiver: &Value,
        name: InternedString,
        args: &[Value],
    ) -> DispatchResult<Value> {
        let property = {
            let inner = self.inner.read();
            inner.properties.get(&name).cloned()
        };
        match property {
            Some(Value::Function(f)) => f.invoke(args),
            Some(value) if args.len() == 1 => Ok(value),
            None if args.len() == 1 && self.fallback().is_none() => Ok(Value::Nil),
            _ if args.len() == 2 => {
                self.define(name, args[1].clone())?;
                Ok(receiver.clone())
            }
            _ => match self.fallback() {
                Some(fallback) => {
                    let mut fallback_args = Vec::with_capacity(args.len() + 1);
                    fallback_args.push(receiver.clone());
                    fallback_args.push(Value::str(name.as_str()));
                    fallback_args.extend_from_slice(&args[1..]);
                    fallback.invoke(&fallback_args)
                }
                None => Err(DispatchError::UnresolvedCallable {
                    name,
                    module: None,
                }),
            },
        }
    }
}

impl Object for DynamicObject {
    fn type_id(&self) -> TypeId {
        TypeId::DYNAMIC_OBJECT
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// =============================================================================
// Protocol Methods
// =============================================================================

fn receiver_object(args: &[Value]) -> DispatchResult<&DynamicObject> {
    args.first()
        .and_then(|v| v.downcast_object::<DynamicObject>())
        .ok_or_else(|| DispatchError::fault("receiver is not a dynamic object"))
}

fn property_name(value: &Value) -> DispatchResult<InternedString> {
    match value {
        Value::Str(name) => Ok(intern(name)),
        other => Err(DispatchError::fault(format!(
            "property name must be a string, got {}",
            other
        ))),
    }
}

/// The native target for a reserved protocol name, invoked with the
/// receiver first. Returns `None` for non-protocol names.
pub fn protocol_target(name: InternedString) -> Option<FunctionRef> {
    let target = match name.as_str() {
        "get" => FunctionRef::untyped("get", 2, |args| {
            Ok(receiver_object(args)?.get(property_name(&args[1])?))
        }),
        "define" => FunctionRef::untyped("define", 3, |args| {
            receiver_object(args)?.define(property_name(&args[1])?, args[2].clone())?;
            Ok(args[0].clone())
        }),
        "undefine" => FunctionRef::untyped("undefine", 2, |args| {
            receiver_object(args)?.undefine(property_name(&args[1])?)?;
            Ok(args[0].clone())
        }),
        "mixin" => FunctionRef::untyped("mixin", 2, |args| {
            let other = args[1]
                .downcast_object::<DynamicObject>()
                .ok_or_else(|| DispatchError::fault("mixin source is not a dynamic object"))?;
            receiver_object(args)?.mixin(other)?;
            Ok(args[0].clone())
        }),
        "copy" => FunctionRef::untyped("copy", 1, |args| {
            Ok(Value::Object(Arc::new(receiver_object(args)?.copy())))
        }),
        "freeze" => FunctionRef::untyped("freeze", 1, |args| {
            receiver_object(args)?.freeze();
            Ok(args[0].clone())
        }),
        "frozen" => FunctionRef::untyped("frozen", 1, |args| {
            Ok(Value::Bool(receiver_object(args)?.is_frozen()))
        }),
        "properties" => FunctionRef::untyped("properties", 1, |args| {
            let entries: Vec<Value> = receiver_object(args)?
                .properties()
                .into_iter()
                .map(|(name, value)| Value::array(vec![Value::str(name.as_str()), value]))
                .collect();
            Ok(Value::array(entries))
        }),
        "has_method" => FunctionRef::untyped("has_method", 2, |args| {
            Ok(Value::Bool(
                receiver_object(args)?.has_method(property_name(&args[1])?),
            ))
        }),
        "fallback" => FunctionRef::untyped("fallback", 1, |args| {
            Ok(receiver_object(args)?
                .fallback()
                .map(Value::Function)
                .unwrap_or(Value::Nil))
        }),
        _ => return None,
    };
    Some(target)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object_value() -> (Value, Arc<DynamicObject>) {
        let object = Arc::new(DynamicObject::new());
        (Value::Object(object.clone()), object)
    }

    #[test]
    fn test_define_and_get() {
        let object = DynamicObject::new();
        let name = intern("answer");
        assert_eq!(object.get(name), Value::Nil);
        object.define(name, Value::Int(42)).unwrap();
        assert_eq!(object.get(name), Value::Int(42));
    }

    #[test]
    fn test_freeze_rejects_mutation() {
        let object = DynamicObject::new();
        object.define(intern("x"), Value::Int(1)).unwrap();
        object.freeze();
        assert!(object.is_frozen());
        assert!(object.define(intern("y"), Value::Int(2)).is_err());
        assert!(object.undefine(intern("x")).is_err());
        // reads still fine
        assert_eq!(object.get(intern("x")), Value::Int(1));
    }

    #[test]
    fn test_mixin_copies_properties() {
        let a = DynamicObject::new();
        let b = DynamicObject::new();
        b.define(intern("greet"), Value::str("hello")).unwrap();
        a.mixin(&b).unwrap();
        assert_eq!(a.get(intern("greet")), Value::str("hello"));
    }

    #[test]
    fn test_copy_is_thawed() {
        let object = DynamicObject::new();
        object.define(intern("x"), Value::Int(1)).unwrap();
        object.freeze();
        let copy = object.copy();
        assert!(!copy.is_frozen());
        copy.define(intern("x"), Value::Int(2)).unwrap();
        assert_eq!(copy.get(intern("x")), Value::Int(2));
        assert_eq!(object.get(intern("x")), Value::Int(1));
    }

    #[test]
    fn test_dispatch_method_property() {
        let (receiver, object) = object_value();
        let method = FunctionRef::untyped("shout", 2, |args| match (&args[0], &args[1]) {
            (Value::Object(_), Value::Str(s)) => Ok(Value::str(&format!("{}!", s))),
            _ => Err(DispatchError::fault("bad args")),
        });
        object.define(intern("shout"), Value::Function(method)).unwrap();
        let result = object
            .dispatch(&receiver, intern("shout"), &[receiver.clone(), Value::str("hey")])
            .unwrap();
        assert_eq!(result, Value::str("hey!"));
    }

    #[test]
    fn test_dispatch_reader_and_writer() {
        let (receiver, object) = object_value();
        // arity-2 call defines the property and returns the receiver
        let out = object
            .dispatch(&receiver, intern("size"), &[receiver.clone(), Value::Int(3)])
            .unwrap();
        assert_eq!(out, receiver);
        // arity-1 call reads it back
        let read = object
            .dispatch(&receiver, intern("size"), &[receiver.clone()])
            .unwrap();
        assert_eq!(read, Value::Int(3));
    }

    #[test]
    fn test_dispatch_fallback() {
        let (receiver, object) = object_value();
        let fallback = FunctionRef::untyped_varargs("fallback", 3, |args| {
            match &args[1] {
                Value::Str(name) => Ok(Value::str(&format!("missing:{}", name))),
                _ => Err(DispatchError::fault("bad fallback call")),
            }
        });
        object
            .define(intern("fallback"), Value::Function(fallback))
            .unwrap();
        let result = object
            .dispatch(
                &receiver,
                intern("nope"),
                &[receiver.clone(), Value::Int(1), Value::Int(2)],
            )
            .unwrap();
        assert_eq!(result, Value::str("missing:nope"));
    }

    #[test]
    fn test_reserved_names() {
        assert!(is_reserved_name(intern("mixin")));
        assert!(is_reserved_name(intern("fallback")));
        assert!(!is_reserved_name(intern("shout")));
    }

    #[test]
    fn test_protocol_targets() {
        let (receiver, object) = object_value();
        let define = protocol_target(intern("define")).unwrap();
        define
            .invoke(&[receiver.clone(), Value::str("x"), Value::Int(5)])
            .unwrap();
        assert_eq!(object.get(intern("x")), Value::Int(5));

        let get = protocol_target(intern("get")).unwrap();
        assert_eq!(
            get.invoke(&[receiver.clone(), Value::str("x")]).unwrap(),
            Value::Int(5)
        );

        let frozen = protocol_target(intern("frozen")).unwrap();
        assert_eq!(
            frozen.invoke(&[receiver.clone()]).unwrap(),
            Value::Bool(false)
        );

        let properties = protocol_target(intern("properties")).unwrap();
        let listed = properties.invoke(&[receiver]).unwrap();
        assert_eq!(
            listed,
            Value::array(vec![Value::array(vec![Value::str("x"), Value::Int(5)])])
        );

        assert!(protocol_target(intern("shout")).is_none());
    }
}
