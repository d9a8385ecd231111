//! Per-module metadata consumed by the resolvers.
//!
//! The executable artifact carries, per module, an ordered import list, a
//! declared-callables table, and the augmentation tables. All of it is
//! assembled at module-load time and immutable afterwards; resolvers on
//! concurrent threads read the shared `Arc`s freely.

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use vela_core::intern::{intern, InternedString};
use vela_core::types::Visibility;
use vela_core::value::FunctionRef;

// =============================================================================
// Declared Callables
// =============================================================================

/// One entry of a module's declared-callables table.
#[derive(Debug, Clone)]
pub struct CallableDecl {
    /// Declared name.
    pub name: InternedString,
    /// Module-local callables are invisible to importers.
    pub visibility: Visibility,
    /// The invocable; arity, parameter types, and the varargs flag are
    /// carried by the reference itself.
    pub target: FunctionRef,
}

impl CallableDecl {
    /// A public callable.
    pub fn public(target: FunctionRef) -> Self {
        Self {
            name: target.name(),
            visibility: Visibility::Public,
            target,
        }
    }

    /// A module-local callable.
    pub fn local(target: FunctionRef) -> Self {
        Self {
            name: target.name(),
            visibility: Visibility::Local,
            target,
        }
    }

    /// Declared parameter count (varargs collector included).
    #[inline]
    pub fn arity(&self) -> usize {
        self.target.arity()
    }

    /// Whether the last parameter collects trailing arguments.
    #[inline]
    pub fn is_varargs(&self) -> bool {
        self.target.is_varargs()
    }

    /// Whether a call with `arity` arguments can bind to this callable.
    #[inline]
    pub fn accepts_arity(&self, arity: usize) -> bool {
        if self.is_varargs() {
            arity + 1 >= self.arity()
        } else {
            arity == self.arity()
        }
    }
}

// =============================================================================
// Augmentation Tables
// =============================================================================

/// A direct augmentation: methods attached to a target type from this
/// module (`augment some.Type { ... }`).
#[derive(Debug, Clone)]
pub struct AugmentationDecl {
    /// Fully-qualified name of the augmented type.
    pub target: InternedString,
    /// Augmentation methods, receiver-first, in declaration order.
    pub methods: Vec<CallableDecl>,
}

/// A named, reusable augmentation bundle (mixin-like).
#[derive(Debug, Clone)]
pub struct NamedAugmentationDecl {
    /// Bundle name, unqualified.
    pub name: InternedString,
    /// Bundle methods, receiver-first, in declaration order.
    pub methods: Vec<CallableDecl>,
}

/// Application of named augmentations to a target type
/// (`augment some.Type with BundleA, BundleB`).
#[derive(Debug, Clone)]
pub struct AugmentationApplicationDecl {
    /// Fully-qualified name of the augmented type.
    pub target: InternedString,
    /// Applied bundle names, possibly qualified, in declaration order.
    pub augmentations: Vec<InternedString>,
}

// =============================================================================
// Module Definition
// =============================================================================

/// Immutable metadata of one loaded module.
#[derive(Debug)]
pub struct ModuleDef {
    name: InternedString,
    imports: Vec<InternedString>,
    callables: Vec<CallableDecl>,
    augmentations: Vec<AugmentationDecl>,
    named_augmentations: Vec<NamedAugmentationDecl>,
    applications: Vec<AugmentationApplicationDecl>,
}

impl ModuleDef {
    /// Start building a module definition.
    pub fn new(name: &str) -> Self {
        Self {
            name: intern(name),
            imports: Vec::new(),
            callables: Vec::new(),
            augmentations: Vec::new(),
            named_augmentations: Vec::new(),
            applications: Vec::new(),
        }
    }

    /// Append an import; order is the resolution order.
    pub fn with_import(mut self, module: &str) -> Self {
        self.imports.push(intern(module));
        self
    }

    /// Append a declared callable; order is the declaration order the
    /// overload selector ties break on.
    pub fn with_callable(mut self, decl: CallableDecl) -> Self {
        self.callables.push(decl);
        self
    }

    /// Shorthand for a public function.
    pub fn with_function(self, target: FunctionRef) -> Self {
        self.with_callable(CallableDecl::public(target))
    }

    /// Append a direct augmentation of `target`.
    pub fn with_augmentation(mut self, target: &str, methods: Vec<CallableDecl>) -> Self {
        self.augmentations.push(AugmentationDecl {
            target: intern(target),
            methods,
        });
        self
    }

    /// Declare a named augmentation bundle.
    pub fn with_named_augmentation(mut self, name: &str, methods: Vec<CallableDecl>) -> Self {
        self.named_augmentations.push(NamedAugmentationDecl {
            name: intern(name),
            methods,
        });
        self
    }

    /// Apply named augmentation bundles to `target`.
    pub fn with_application(mut self, target: &str, augmentations: &[&str]) -> Self {
        self.applications.push(AugmentationApplicationDecl {
            target: intern(target),
            augmentations: augmentations.iter().map(|a| intern(a)).collect(),
        });
        self
    }

    /// Module name.
    #[inline]
    pub fn name(&self) -> InternedString {
        self.name
    }

    /// Ordered import list.
    #[inline]
    pub fn imports(&self) -> &[InternedString] {
        &self.imports
    }

    /// The declared-callables table, in declaration order.
    #[inline]
    pub fn callables(&self) -> &[CallableDecl] {
        &self.callables
    }

    /// Declared callables with the given name, in declaration order.
    pub fn callables_named(
        &self,
        name: InternedString,
    ) -> impl Iterator<Item = &CallableDecl> {
        self.callables.iter().filter(move |c| c.name == name)
    }

    /// Direct augmentations declared by this module.
    #[inline]
    pub fn augmentations(&self) -> &[AugmentationDecl] {
        &self.augmentations
    }

    /// Named augmentation bundle declared by this module.
    pub fn named_augmentation(&self, name: InternedString) -> Option<&NamedAugmentationDecl> {
        self.named_augmentations.iter().find(|n| n.name == name)
    }

    /// Named-augmentation applications declared by this module.
    #[inline]
    pub fn applications(&self) -> &[AugmentationApplicationDecl] {
        &self.applications
    }

    /// Read-only query used by the doc and macro-expansion tooling: does
    /// this module declare a callable of the given name accepting
    /// `arity` arguments? Never touches any call-site cache.
    pub fn has_callable(&self, name: InternedString, arity: usize) -> bool {
        self.callables_named(name).any(|c| c.accepts_arity(arity))
    }
}

// =============================================================================
// Module Registry
// =============================================================================

/// Registry of loaded modules, keyed by module name.
///
/// Modules are registered once at load time; lookups hand out shared
/// `Arc`s. Cyclic imports are rejected by the compiler front end before
/// anything reaches this table.
#[derive(Debug, Default)]
pub struct ModuleRegistry {
    modules: RwLock<FxHashMap<InternedString, Arc<ModuleDef>>>,
}

impl ModuleRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module, returning the shared definition.
    pub fn register(&self, module: ModuleDef) -> Arc<ModuleDef> {
        let module = Arc::new(module);
        self.modules.write().insert(module.name(), module.clone());
        module
    }

    /// Look up a module by name.
    pub fn get(&self, name: InternedString) -> Option<Arc<ModuleDef>> {
        self.modules.read().get(&name).cloned()
    }

    /// Read-only callable query across the registry (see
    /// [`ModuleDef::has_callable`]).
    pub fn has_callable(&self, module: InternedString, name: InternedString, arity: usize) -> bool {
        self.get(module)
            .map(|m| m.has_callable(name, arity))
            .unwrap_or(false)
    }
}
