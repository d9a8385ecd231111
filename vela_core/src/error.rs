//! Dispatch error taxonomy.
//!
//! Resolution failures are surfaced synchronously and are never cached:
//! a failed first resolution at a call site must not prevent a later call
//! with a resolvable receiver from succeeding at the same site. Faults
//! raised by an invoked callable pass through resolution unwrapped.

use crate::intern::InternedString;

// =============================================================================
// Runtime Fault
// =============================================================================

/// An error raised by an invoked callable itself.
///
/// The dispatch machinery never wraps or rewrites these; they propagate
/// to the caller exactly as the callable produced them.
#[derive(Debug)]
pub struct RuntimeFault {
    message: String,
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl RuntimeFault {
    /// Create a fault with a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Attach an underlying cause.
    pub fn with_source(
        message: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(source),
        }
    }

    /// The fault message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for RuntimeFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for RuntimeFault {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

// =============================================================================
// Dispatch Error
// =============================================================================

/// Errors produced while resolving or executing a dispatched call.
#[derive(Debug)]
pub enum DispatchError {
    /// Name/arity/type filtering yielded no candidate.
    NoApplicableOverload {
        /// The callee name at the failing call site.
        name: InternedString,
        /// The call arity.
        arity: usize,
    },

    /// The name was not found in any visible scope.
    UnresolvedCallable {
        /// The callee name at the failing call site.
        name: InternedString,
        /// The lexical module of the call site, when known.
        module: Option<InternedString>,
    },

    /// The invoked callable raised; passed through unchanged.
    Fault(RuntimeFault),
}

impl DispatchError {
    /// Shorthand for a fault with a plain message.
    pub fn fault(message: impl Into<String>) -> Self {
        DispatchError::Fault(RuntimeFault::new(message))
    }
}

impl std::fmt::Display for DispatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoApplicableOverload { name, arity } => {
                write!(f, "no applicable overload for {} with arity {}", name, arity)
            }
            Self::UnresolvedCallable { name, module } => match module {
                Some(module) => write!(f, "unresolved callable {} from module {}", name, module),
                None => write!(f, "unresolved callable {}", name),
            },
            Self::Fault(fault) => write!(f, "{}", fault),
        }
    }
}

impl std::error::Error for DispatchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Fault(fault) => Some(fault),
            _ => None,
        }
    }
}

/// Result type for dispatch operations.
pub type DispatchResult<T> = Result<T, DispatchError>;
