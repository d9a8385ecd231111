//! Dynamic value representation.
//!
//! `Value` is the unit of data every dispatched call consumes and
//! produces. The numeric kinds are kept distinct so the overload scorer
//! can prefer narrow-to-wide promotions over jumps; `Array` is the
//! varargs collection shape; reference-typed instances (dynamic objects,
//! adapter instances) live behind the [`Object`] trait.

use crate::error::DispatchResult;
use crate::intern::{intern, InternedString};
use crate::types::TypeId;
use smallvec::SmallVec;
use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

// =============================================================================
// Object Trait
// =============================================================================

/// Reference-typed runtime instance.
///
/// Implemented by the dynamic property-bag object and by adapter
/// instances; the dispatch machinery only needs the concrete type id
/// (for guards) and downcasting (for kind-specific resolution).
pub trait Object: Send + Sync + std::fmt::Debug {
    /// Concrete runtime type of this instance.
    fn type_id(&self) -> TypeId;

    /// Downcast support.
    fn as_any(&self) -> &dyn Any;
}

// =============================================================================
// Function References
// =============================================================================

/// Target closure of a function reference.
pub type NativeFn = dyn Fn(&[Value]) -> DispatchResult<Value> + Send + Sync;

struct FunctionRefInner {
    /// Unique identity, used by closure-call guards.
    id: u64,
    /// Function name (diagnostic and property dispatch).
    name: InternedString,
    /// Declared parameter types. For variable-arity functions the last
    /// entry is the collector parameter.
    param_types: SmallVec<[TypeId; 4]>,
    /// Whether the last parameter collects trailing arguments.
    varargs: bool,
    target: Box<NativeFn>,
}

impl std::fmt::Debug for FunctionRefInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionRef")
            .field("id", &self.id)
            .field("name", &self.name.as_str())
            .field("arity", &self.param_types.len())
            .field("varargs", &self.varargs)
            .finish()
    }
}

/// A concrete invocable reference.
///
/// Cloning shares the underlying target; identity (`id`) is preserved
/// across clones, which is what closure-call guards test.
#[derive(Clone, Debug)]
pub struct FunctionRef {
    inner: Arc<FunctionRefInner>,
}

static NEXT_FUNCTION_ID: AtomicU64 = AtomicU64::new(1);

impl FunctionRef {
    /// Create a function reference with explicit parameter types.
    pub fn new<F>(name: &str, param_types: &[TypeId], varargs: bool, target: F) -> Self
    where
        F: Fn(&[Value]) -> DispatchResult<Value> + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(FunctionRefInner {
                id: NEXT_FUNCTION_ID.fetch_add(1, Ordering::Relaxed),
                name: intern(name),
                param_types: SmallVec::from_slice(param_types),
                varargs,
                target: Box::new(target),
            }),
        }
    }

    /// Create a fixed-arity reference whose parameters are all `Any`.
    pub fn untyped<F>(name: &str, arity: usize, target: F) -> Self
    where
        F: Fn(&[Value]) -> DispatchResult<Value> + Send + Sync + 'static,
    {
        let params: SmallVec<[TypeId; 4]> =
            std::iter::repeat(TypeId::ANY).take(arity).collect();
        Self::new(name, &params, false, target)
    }

    /// Create a variable-arity reference whose parameters are all `Any`;
    /// `arity` counts the collector parameter.
    pub fn untyped_varargs<F>(name: &str, arity: usize, target: F) -> Self
    where
        F: Fn(&[Value]) -> DispatchResult<Value> + Send + Sync + 'static,
    {
        let params: SmallVec<[TypeId; 4]> =
            std::iter::repeat(TypeId::ANY).take(arity).collect();
        Self::new(name, &params, true, target)
    }

    /// Unique identity of this reference.
    #[inline]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Function name.
    #[inline]
    pub fn name(&self) -> InternedString {
        self.inner.name
    }

    /// Declared parameter count (collector included).
    #[inline]
    pub fn arity(&self) -> usize {
        self.inner.param_types.len()
    }

    /// Declared parameter types.
    #[inline]
    pub fn param_types(&self) -> &[TypeId] {
        &self.inner.param_types
    }

    /// Whether the last parameter collects trailing arguments.
    #[inline]
    pub fn is_varargs(&self) -> bool {
        self.inner.varargs
    }

    /// Invoke the target with the given arguments, no adaptation.
    #[inline]
    pub fn invoke(&self, args: &[Value]) -> DispatchResult<Value> {
        (self.inner.target)(args)
    }

    /// Identity comparison, the closure-call guard predicate.
    #[inline]
    pub fn same_ref(&self, other: &FunctionRef) -> bool {
        self.inner.id == other.inner.id
    }
}

// =============================================================================
// Value
// =============================================================================

/// A dynamic runtime value.
#[derive(Clone, Debug)]
pub enum Value {
    /// The null reference.
    Nil,
    /// Primitive boolean.
    Bool(bool),
    /// Primitive 32-bit integer.
    Int(i32),
    /// Primitive 64-bit integer.
    Long(i64),
    /// Primitive 32-bit float.
    Float(f32),
    /// Primitive 64-bit float.
    Double(f64),
    /// Immutable string.
    Str(Arc<str>),
    /// Immutable array; also the varargs collection shape.
    Array(Arc<[Value]>),
    /// Function reference.
    Function(FunctionRef),
    /// Reference-typed instance.
    Object(Arc<dyn Object>),
}

impl Value {
    /// Build a string value.
    pub fn str(text: &str) -> Self {
        Value::Str(Arc::from(text))
    }

    /// Build an array value.
    pub fn array(items: impl Into<Vec<Value>>) -> Self {
        Value::Array(Arc::from(items.into()))
    }

    /// The concrete runtime type of this value.
    #[inline]
    pub fn type_id(&self) -> TypeId {
        match self {
            Value::Nil => TypeId::NIL,
            Value::Bool(_) => TypeId::BOOL,
            Value::Int(_) => TypeId::INT,
            Value::Long(_) => TypeId::LONG,
            Value::Float(_) => TypeId::FLOAT,
            Value::Double(_) => TypeId::DOUBLE,
            Value::Str(_) => TypeId::STRING,
            Value::Array(_) => TypeId::ARRAY,
            Value::Function(_) => TypeId::FUNCTION,
            Value::Object(obj) => Object::type_id(obj.as_ref()),
        }
    }

    /// Whether this value is the null reference.
    #[inline]
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Downcast a reference-typed instance.
    pub fn downcast_object<T: 'static>(&self) -> Option<&T> {
        match self {
            Value::Object(obj) => obj.as_any().downcast_ref::<T>(),
            _ => None,
        }
    }

    /// The function reference held by this value, if any.
    pub fn as_function(&self) -> Option<&FunctionRef> {
        match self {
            Value::Function(f) => Some(f),
            _ => None,
        }
    }

    /// The array slice held by this value, if any.
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Long(a), Value::Long(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Double(a), Value::Double(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => a.same_ref(b),
            (Value::Object(a), Value::Object(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Nil => f.write_str("nil"),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Int(v) => write!(f, "{}", v),
            Value::Long(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Double(v) => write!(f, "{}", v),
            Value::Str(v) => f.write_str(v),
            Value::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
            Value::Function(func) => write!(f, "<function {}>", func.name()),
            Value::Object(obj) => write!(f, "<object type {:?}>", obj.type_id()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_ids() {
        assert_eq!(Value::Nil.type_id(), TypeId::NIL);
        assert_eq!(Value::Int(1).type_id(), TypeId::INT);
        assert_eq!(Value::Long(1).type_id(), TypeId::LONG);
        assert_eq!(Value::Double(1.0).type_id(), TypeId::DOUBLE);
        assert_eq!(Value::str("x").type_id(), TypeId::STRING);
        assert_eq!(Value::array(vec![]).type_id(), TypeId::ARRAY);
    }

    #[test]
    fn test_function_ref_identity() {
        let f = FunctionRef::untyped("f", 1, |args| Ok(args[0].clone()));
        let g = FunctionRef::untyped("f", 1, |args| Ok(args[0].clone()));
        assert!(f.same_ref(&f.clone()));
        assert!(!f.same_ref(&g));
    }

    #[test]
    fn test_function_ref_invoke() {
        let double = FunctionRef::untyped("double", 1, |args| match args[0] {
            Value::Int(v) => Ok(Value::Int(v * 2)),
            _ => Err(crate::error::DispatchError::fault("expected int")),
        });
        assert_eq!(double.invoke(&[Value::Int(21)]).unwrap(), Value::Int(42));
    }

    #[test]
    fn test_display() {
        let v = Value::array(vec![Value::Int(1), Value::str("a")]);
        assert_eq!(v.to_string(), "[1, a]");
    }
}
