//! Augmentation (extension-method) resolution.
//!
//! Given a receiver type and the scopes visible at a call site, collects
//! every applicable extension-method provider, ranks the applications
//! under one strict order, and delegates to the overload selector within
//! the best-ranked provider that has a name/arity match. The ranking is
//! `target specificity ≫ scope ≫ kind`, with fixed-arity preferred over
//! varargs inside a provider; the cut at the first name/arity match is a
//! correctness rule — it lets a local augmentation shadow a same-named
//! imported one even when the import's variant scores better on types.

use std::cmp::Ordering as CmpOrdering;
use std::sync::Arc;
use vela_core::error::DispatchResult;
use vela_core::intern::InternedString;
use vela_core::types::{TypeId, TypeRegistry};
use vela_core::value::Value;
use vela_runtime::module::{CallableDecl, ModuleDef, ModuleRegistry};

use crate::overload::{self, Candidate, Provenance};

// =============================================================================
// Scopes and Kinds
// =============================================================================

/// Where the defining module was found, most specific first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Scope {
    /// The lexical module of the call site.
    Local,
    /// An import of the lexical module.
    Import,
    /// A module currently executing on this thread (or one of its
    /// imports).
    CallStack,
}

/// How the augmentation was applied to the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ApplicationKind {
    /// Direct `augment Type { ... }` block.
    Simple,
    /// Named bundle applied with `augment Type with Bundle`.
    Named,
}

/// One extension-method provider bound to a target type, as seen from a
/// particular scope.
#[derive(Debug, Clone)]
pub struct AugmentationApplication {
    /// Methods the provider contributes, in declaration order.
    pub methods: Vec<CallableDecl>,
    /// Module that declared the methods.
    pub provider: InternedString,
    /// The augmented type.
    pub target: TypeId,
    /// Scope the application was found in.
    pub scope: Scope,
    /// Direct block or named bundle.
    pub kind: ApplicationKind,
}

/// Winning augmentation method.
#[derive(Debug, Clone)]
pub struct AugmentationSelection {
    /// The selected method.
    pub target: vela_core::value::FunctionRef,
    /// Module that declared it (pushed on the execution stack while it
    /// runs).
    pub provider: InternedString,
    /// The provider had several applicable same-name methods.
    pub overloaded: bool,
}

// =============================================================================
// Resolver
// =============================================================================

/// Collects and ranks augmentation applications for a receiver type.
pub struct AugmentationResolver<'a> {
    types: &'a TypeRegistry,
    modules: &'a ModuleRegistry,
}

impl<'a> AugmentationResolver<'a> {
    /// Create a resolver over the given registries.
    pub fn new(types: &'a TypeRegistry, modules: &'a ModuleRegistry) -> Self {
        Self { types, modules }
    }

    /// Resolve an augmentation method for `receiver_type`.
    ///
    /// `Ok(None)` means no ranked application had a name/arity match;
    /// an error means the cut was reached but no candidate was
    /// type-applicable (lower-priority applications are not consulted).
    pub fn resolve(
        &self,
        receiver_type: TypeId,
        name: InternedString,
        args: &[Value],
        local: Option<&Arc<ModuleDef>>,
        call_stack: &[InternedString],
    ) -> DispatchResult<Option<AugmentationSelection>> {
        let mut applications = Vec::new();
        for (module, scope) in self.defining_modules(local, call_stack) {
            self.collect_applications(&module, scope, receiver_type, &mut applications);
        }
        applications.sort_by(|a, b| self.rank(a, b));

        for application in &applications {
            let matching: Vec<Candidate> = application
                .methods
                .iter()
                .filter(|m| m.name == name && m.accepts_arity(args.len()))
                .map(|m| {
                    Candidate::new(
                        m.target.clone(),
                        Provenance::Augmentation(application.provider),
                    )
                })
                .collect();
            if matching.is_empty() {
                continue;
            }
            // First name/arity match cuts the ranking; lower-priority
            // applications are never type-scored.
            let selection = overload::select(self.types, name, args, &matching)?;
            return Ok(Some(AugmentationSelection {
                target: selection.candidate.target,
                provider: application.provider,
                overloaded: selection.overloaded,
            }));
        }
        Ok(None)
    }

    /// The visible defining modules: local, its imports, then the
    /// dynamic call stack and the imports of each stacked module.
    fn defining_modules(
        &self,
        local: Option<&Arc<ModuleDef>>,
        call_stack: &[InternedString],
    ) -> Vec<(Arc<ModuleDef>, Scope)> {
        let mut found = Vec::new();
        if let Some(local) = local {
            found.push((local.clone(), Scope::Local));
            for &import in local.imports() {
                if let Some(module) = self.modules.get(import) {
                    found.push((module, Scope::Import));
                }
            }
        }
        for &stacked in call_stack {
            if let Some(module) = self.modules.get(stacked) {
                found.push((module.clone(), Scope::CallStack));
                for &import in module.imports() {
                    if let Some(imported) = self.modules.get(import) {
                        found.push((imported, Scope::CallStack));
                    }
                }
            }
        }
        found
    }

    fn collect_applications(
        &self,
        module: &Arc<ModuleDef>,
        scope: Scope,
        receiver_type: TypeId,
        out: &mut Vec<AugmentationApplication>,
    ) {
        // Direct augmentation blocks.
        for augmentation in module.augmentations() {
            let Some(target) = self.types.get_by_name(augmentation.target) else {
                continue;
            };
            if !self.types.is_assignable(target.id, receiver_type) {
                continue;
            }
            out.push(AugmentationApplication {
                methods: augmentation.methods.clone(),
                provider: module.name(),
                target: target.id,
                scope,
                kind: ApplicationKind::Simple,
            });
        }
        // Named bundle applications.
        for application in module.applications() {
            let Some(target) = self.types.get_by_name(application.target) else {
                continue;
            };
            if !self.types.is_assignable(target.id, receiver_type) {
                continue;
            }
            for &bundle_name in &application.augmentations {
                for (provider, methods) in self.qualify_bundle(module, bundle_name) {
                    out.push(AugmentationApplication {
                        methods,
                        provider,
                        target: target.id,
                        scope,
                        kind: ApplicationKind::Named,
                    });
                }
            }
        }
    }

    /// Look up a named bundle by progressively qualifying its name
    /// against the declaring module and its imports.
    fn qualify_bundle(
        &self,
        module: &Arc<ModuleDef>,
        bundle_name: InternedString,
    ) -> Vec<(InternedString, Vec<CallableDecl>)> {
        let mut found = Vec::new();
        let text = bundle_name.as_str();
        if let Some(split_at) = text.rfind('.') {
            // Fully-qualified reference: `declaring.module.Bundle`.
            let module_name = vela_core::intern::intern(&text[..split_at]);
            let simple = vela_core::intern::intern(&text[split_at + 1..]);
            if let Some(declaring) = self.modules.get(module_name) {
                if let Some(bundle) = declaring.named_augmentation(simple) {
                    found.push((declaring.name(), bundle.methods.clone()));
                }
            }
        }
        if let Some(bundle) = module.named_augmentation(bundle_name) {
            found.push((module.name(), bundle.methods.clone()));
        }
        for &import in module.imports() {
            if let Some(imported) = self.modules.get(import) {
                if let Some(bundle) = imported.named_augmentation(bundle_name) {
                    found.push((imported.name(), bundle.methods.clone()));
                }
            }
        }
        found
    }

    /// Strict application order: target specificity dominates scope,
    /// which dominates kind. Equal keys keep collection order (the sort
    /// is stable), which encodes import and declaration order.
    fn rank(&self, a: &AugmentationApplication, b: &AugmentationApplication) -> CmpOrdering {
        if a.target != b.target {
            if self.types.is_assignable(b.target, a.target) {
                return CmpOrdering::Less;
            }
            if self.types.is_assignable(a.target, b.target) {
                return CmpOrdering::Greater;
            }
        }
        a.scope.cmp(&b.scope).then(a.kind.cmp(&b.kind))
    }
}
