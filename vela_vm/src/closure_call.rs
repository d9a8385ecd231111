//! Closure invocation.
//!
//! The callee is already a concrete invocable reference captured at
//! closure-creation time, supplied as argument 0 of the call site.
//! Resolution only adapts the calling convention: trailing arguments are
//! collected into a single array when the reference is variable-arity
//! and the site supplies a flat list, and an already-collected array
//! passes through unchanged. The installed guard tests the reference's
//! identity, so a site invoking a different closure re-resolves.

use std::sync::Arc;
use vela_core::error::{DispatchError, DispatchResult};
use vela_core::value::Value;

use crate::callsite::{CallConvention, Guard, ResolvedTarget, Resolution};
use crate::descriptor::InvocationDescriptor;

/// Resolver for `CallKind::Closure` sites.
pub struct ClosureResolver;

impl ClosureResolver {
    /// Resolve a closure call site; `args[0]` is the callee.
    pub fn resolve(
        &self,
        descriptor: &InvocationDescriptor,
        args: &[Value],
    ) -> DispatchResult<Resolution> {
        let callee = args
            .first()
            .and_then(Value::as_function)
            .ok_or_else(|| {
                DispatchError::fault(format!(
                    "closure call target is not a function: {}",
                    args.first().cloned().unwrap_or(Value::Nil)
                ))
            })?;

        let convention = if callee.is_varargs() && !descriptor.varargs {
            CallConvention::DropCalleeCollect {
                fixed: callee.arity().saturating_sub(1),
            }
        } else {
            CallConvention::DropCallee
        };

        Ok(Resolution {
            guard: Guard::FunctionIdentity(callee.id()),
            target: Arc::new(ResolvedTarget {
                callable: callee.clone(),
                convention,
                frame: None,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vela_core::value::FunctionRef;

    fn resolve_and_run(callee: FunctionRef, args: &[Value]) -> DispatchResult<Value> {
        let mut full = vec![Value::Function(callee)];
        full.extend_from_slice(args);
        let descriptor = InvocationDescriptor::closure(full.len(), "acme.main");
        let resolution = ClosureResolver.resolve(&descriptor, &full)?;
        resolution.target.invoke(&full)
    }

    #[test]
    fn test_fixed_arity_closure() {
        let add = FunctionRef::untyped("add", 2, |args| match (&args[0], &args[1]) {
            (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a + b)),
            _ => Err(DispatchError::fault("expected ints")),
        });
        let result = resolve_and_run(add, &[Value::Int(40), Value::Int(2)]).unwrap();
        assert_eq!(result, Value::Int(42));
    }

    #[test]
    fn test_varargs_closure_collects_flat_arguments() {
        let count = FunctionRef::untyped_varargs("count", 1, |args| {
            match args[0].as_array() {
                Some(items) => Ok(Value::Int(items.len() as i32)),
                None => Err(DispatchError::fault("expected collected array")),
            }
        });
        let result =
            resolve_and_run(count, &[Value::Int(1), Value::Int(2), Value::Int(3)]).unwrap();
        assert_eq!(result, Value::Int(3));
    }

    #[test]
    fn test_varargs_closure_passes_collected_array_through() {
        let count = FunctionRef::untyped_varargs("count", 1, |args| {
            match args[0].as_array() {
                Some(items) => Ok(Value::Int(items.len() as i32)),
                None => Err(DispatchError::fault("expected collected array")),
            }
        });
        let packed = Value::array(vec![Value::Int(1), Value::Int(2)]);
        let result = resolve_and_run(count, &[packed]).unwrap();
        assert_eq!(result, Value::Int(2));
    }

    #[test]
    fn test_guard_is_identity() {
        let f = FunctionRef::untyped("f", 0, |_| Ok(Value::Nil));
        let descriptor = InvocationDescriptor::closure(1, "acme.main");
        let resolution = ClosureResolver
            .resolve(&descriptor, &[Value::Function(f.clone())])
            .unwrap();
        assert!(resolution.guard.matches(&[Value::Function(f)]));
        let other = FunctionRef::untyped("f", 0, |_| Ok(Value::Nil));
        assert!(!resolution.guard.matches(&[Value::Function(other)]));
    }

    #[test]
    fn test_non_function_callee_faults() {
        let descriptor = InvocationDescriptor::closure(1, "acme.main");
        let result = ClosureResolver.resolve(&descriptor, &[Value::Int(1)]);
        assert!(matches!(result, Err(DispatchError::Fault(_))));
    }
}
