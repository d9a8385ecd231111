//! Compiler-emitted invocation descriptors.
//!
//! One descriptor is created per call expression and attached to the
//! executable artifact at a fixed location; it is immutable and shared
//! by every invocation of that call site.

use std::sync::Arc;
use vela_core::intern::{intern, InternedString};

/// The kind of call expression a descriptor was emitted for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    /// Free function call, resolved through module scopes.
    Function,
    /// Receiver-typed method call.
    Method,
    /// Invocation of a captured function reference.
    Closure,
    /// Type instantiation.
    Constructor,
}

/// Immutable description of one call expression.
#[derive(Debug, Clone)]
pub struct InvocationDescriptor {
    /// What kind of call this is.
    pub kind: CallKind,
    /// Callee name; for methods, the receiver is argument 0.
    pub name: InternedString,
    /// Number of arguments supplied at the call site (receiver
    /// included for methods, callee included for closures).
    pub arity: usize,
    /// The call site's last argument is an already-collected varargs
    /// array; no calling-convention adaptation is needed.
    pub varargs: bool,
    /// `receiver?: method()` — a nil receiver yields nil instead of an
    /// error, without resolving.
    pub null_safe: bool,
    /// The site folds to its first computed value.
    pub constant: bool,
    /// Lexical module of the call expression.
    pub module: InternedString,
}

impl InvocationDescriptor {
    /// Descriptor for a free function call.
    pub fn function(name: &str, arity: usize, module: &str) -> Arc<Self> {
        Arc::new(Self {
            kind: CallKind::Function,
            name: intern(name),
            arity,
            varargs: false,
            null_safe: false,
            constant: false,
            module: intern(module),
        })
    }

    /// Descriptor for a method call; `arity` includes the receiver.
    pub fn method(name: &str, arity: usize, module: &str) -> Arc<Self> {
        Arc::new(Self {
            kind: CallKind::Method,
            name: intern(name),
            arity,
            varargs: false,
            null_safe: false,
            constant: false,
            module: intern(module),
        })
    }

    /// Descriptor for a closure invocation; `arity` includes the callee.
    pub fn closure(arity: usize, module: &str) -> Arc<Self> {
        Arc::new(Self {
            kind: CallKind::Closure,
            name: intern("<closure>"),
            arity,
            varargs: false,
            null_safe: false,
            constant: false,
            module: intern(module),
        })
    }

    /// Descriptor for a constructor call.
    pub fn constructor(name: &str, arity: usize, module: &str) -> Arc<Self> {
        Arc::new(Self {
            kind: CallKind::Constructor,
            name: intern(name),
            arity,
            varargs: false,
            null_safe: false,
            constant: false,
            module: intern(module),
        })
    }

    /// Mark the call null-safe.
    pub fn null_safe(self: Arc<Self>) -> Arc<Self> {
        let mut descriptor = (*self).clone();
        descriptor.null_safe = true;
        Arc::new(descriptor)
    }

    /// Mark the site constant-foldable.
    pub fn constant(self: Arc<Self>) -> Arc<Self> {
        let mut descriptor = (*self).clone();
        descriptor.constant = true;
        Arc::new(descriptor)
    }

    /// Mark the last supplied argument as an already-collected array.
    pub fn spread(self: Arc<Self>) -> Arc<Self> {
        let mut descriptor = (*self).clone();
        descriptor.varargs = true;
        Arc::new(descriptor)
    }
}
