//! The dispatch entry points.
//!
//! Generated code calls [`Dispatcher::resolve_and_cache`] for every
//! late-bound call expression. The fast path walks the call site's
//! published guard chain lock-free; a miss resolves through the
//! call-kind's resolver and installs the result with one atomic relink.
//! Racing misses are harmless: resolution only reads immutable module
//! and type tables, and the losing thread converges on the winner's
//! target. Resolution failures are surfaced immediately and never
//! cached, so a later call with a resolvable receiver still succeeds.

use std::sync::Arc;
use vela_core::error::{DispatchError, DispatchResult};
use vela_core::intern::InternedString;
use vela_core::types::{TypeId, TypeRegistry, Visibility};
use vela_core::value::Value;
use vela_runtime::adapters::{AdapterDefinition, AdapterDefinitionProblem};
use vela_runtime::module::ModuleRegistry;

use crate::adapter;
use crate::callsite::{
    self, CacheState, CallConvention, CallSite, CallSiteId, CallSiteTable, ResolvedTarget,
    Resolution, SiteState,
};
use crate::closure_call::ClosureResolver;
use crate::descriptor::{CallKind, InvocationDescriptor};
use crate::function_call::FunctionResolver;
use crate::method_call::MethodResolver;
use crate::overload::{self, Candidate, Provenance};
use crate::stack::{self, ExecutionFrame};

// =============================================================================
// Configuration
// =============================================================================

/// Tunables of the call-site state machine.
#[derive(Debug, Clone, Copy)]
pub struct DispatchConfig {
    /// Maximum polymorphic guard-chain length before a site degrades to
    /// megamorphic.
    pub max_polymorphic_depth: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_polymorphic_depth: 6,
        }
    }
}

// =============================================================================
// Dispatcher
// =============================================================================

struct DispatcherInner {
    types: Arc<TypeRegistry>,
    modules: Arc<ModuleRegistry>,
    sites: CallSiteTable,
    config: DispatchConfig,
}

/// The runtime's dispatch front end.
///
/// Cheap to clone; clones share the call-site table and registries.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

impl Dispatcher {
    /// Create a dispatcher with the default configuration.
    pub fn new(types: Arc<TypeRegistry>, modules: Arc<ModuleRegistry>) -> Self {
        Self::with_config(types, modules, DispatchConfig::default())
    }

    /// Create a dispatcher with an explicit configuration.
    pub fn with_config(
        types: Arc<TypeRegistry>,
        modules: Arc<ModuleRegistry>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                types,
                modules,
                sites: CallSiteTable::new(),
                config,
            }),
        }
    }

    /// The type registry.
    pub fn types(&self) -> &TypeRegistry {
        &self.inner.types
    }

    /// The module registry.
    pub fn modules(&self) -> &ModuleRegistry {
        &self.inner.modules
    }

    // =========================================================================
    // Dispatch
    // =========================================================================

    /// Resolve and invoke one call at the given call site.
    ///
    /// The descriptor is the compiler-emitted one attached to the site;
    /// the record is created lazily on first execution.
    pub fn resolve_and_cache(
        &self,
        site_id: CallSiteId,
        descriptor: &Arc<InvocationDescriptor>,
        args: &[Value],
    ) -> DispatchResult<Value> {
        let site = self.inner.sites.site(site_id, descriptor);

        // Nil receivers never reach a resolver: null-safe sites
        // short-circuit, others fault.
        if descriptor.kind == CallKind::Method {
            let receiver_is_nil = args.first().map(Value::is_nil).unwrap_or(true);
            if receiver_is_nil {
                if descriptor.null_safe {
                    return Ok(Value::Nil);
                }
                return Err(DispatchError::fault(format!(
                    "method {} called on nil",
                    descriptor.name
                )));
            }
        }

        // Fast path: walk the published guards, first match wins.
        match site.state() {
            CacheState::Constant(value) => {
                site.record_hit();
                return Ok(value.clone());
            }
            CacheState::Monomorphic(entry) if entry.guard.matches(args) => {
                site.record_hit();
                let target = entry.target.clone();
                return self.run(&target, args);
            }
            CacheState::Polymorphic(chain) => {
                if let Some(entry) = chain.iter().find(|entry| entry.guard.matches(args)) {
                    site.record_hit();
                    let target = entry.target.clone();
                    return self.run(&target, args);
                }
            }
            CacheState::Megamorphic => {
                // The site stays megamorphic: resolve fresh, skip the
                // install.
                site.record_miss();
                let resolution = self.resolve_target(descriptor, args)?;
                return self.run(&resolution.target, args);
            }
            _ => {}
        }

        // Miss path. A resolution failure is surfaced without touching
        // the site's state.
        site.record_miss();
        tracing::trace!(
            site = site_id.0,
            name = descriptor.name.as_str(),
            "call-site miss"
        );
        let resolution = self.resolve_target(descriptor, args)?;

        if descriptor.constant {
            // Constant sites fold to the first computed value.
            let value = self.run(&resolution.target, args)?;
            site.transition(|state| match state {
                CacheState::Uninitialized => {
                    (Some(CacheState::Constant(value.clone())), ())
                }
                _ => (None, ()),
            });
            return Ok(value);
        }

        let target = callsite::install(
            &site,
            &resolution,
            args,
            self.inner.config.max_polymorphic_depth,
        );
        self.run(&target, args)
    }

    /// Read-only query for the doc and macro-expansion tooling; backed
    /// by the declared-callables tables, never touching any call site.
    pub fn has_callable(
        &self,
        module: InternedString,
        name: InternedString,
        arity: usize,
    ) -> bool {
        self.inner.modules.has_callable(module, name, arity)
    }

    fn resolve_target(
        &self,
        descriptor: &InvocationDescriptor,
        args: &[Value],
    ) -> DispatchResult<Resolution> {
        match descriptor.kind {
            CallKind::Function | CallKind::Constructor => {
                FunctionResolver::new(&self.inner.types, &self.inner.modules)
                    .resolve(descriptor, args)
            }
            CallKind::Method => MethodResolver::new(&self.inner.types, &self.inner.modules)
                .resolve(descriptor, args, &stack::current_modules()),
            CallKind::Closure => ClosureResolver.resolve(descriptor, args),
        }
    }

    /// Invoke a target with its defining module on the execution stack.
    fn run(&self, target: &ResolvedTarget, args: &[Value]) -> DispatchResult<Value> {
        let _frame = target.frame.map(ExecutionFrame::enter);
        target.invoke(args)
    }

    // =========================================================================
    // Adapters
    // =========================================================================

    /// Validate and synthesize an adapter type (see [`crate::adapter`]).
    pub fn synthesize_adapter(
        &self,
        definition: AdapterDefinition,
    ) -> Result<TypeId, AdapterDefinitionProblem> {
        adapter::synthesize(self, definition)
    }

    /// Instantiate a registered type through its public constructors.
    pub fn instantiate(&self, type_id: TypeId, args: &[Value]) -> DispatchResult<Value> {
        let desc = self.inner.types.get(type_id).ok_or_else(|| {
            DispatchError::fault(format!("unknown type id {:?}", type_id))
        })?;
        let candidates: Vec<Candidate> = desc
            .constructors
            .iter()
            .filter(|c| c.visibility == Visibility::Public)
            .map(|c| Candidate::new(c.factory.clone(), Provenance::Constructor(desc.id)))
            .collect();
        let selection = overload::select(&self.inner.types, desc.name, args, &candidates)?;
        let candidate = selection.candidate;
        let convention = if candidate.is_varargs() {
            CallConvention::CollectVarargs {
                fixed: candidate.arity().saturating_sub(1),
            }
        } else {
            CallConvention::Direct
        };
        self.run(
            &ResolvedTarget {
                callable: candidate.target,
                convention,
                frame: None,
            },
            args,
        )
    }

    /// Allocate a call-site id for a runtime-synthesized method body.
    pub fn allocate_synthetic_site(&self) -> CallSiteId {
        self.inner.sites.allocate_synthetic_id()
    }

    // =========================================================================
    // Execution Stack
    // =========================================================================

    /// Push a module frame for a host-to-runtime entry point; the frame
    /// pops when the returned guard drops.
    pub fn enter_module(&self, module: InternedString) -> ExecutionFrame {
        ExecutionFrame::enter(module)
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    /// The record for a site, if it has been created.
    pub fn site(&self, site_id: CallSiteId) -> Option<Arc<CallSite>> {
        self.inner.sites.get(site_id)
    }

    /// Classification of a site's published state.
    pub fn site_state(&self, site_id: CallSiteId) -> Option<SiteState> {
        self.site(site_id).map(|site| site.classification())
    }

    /// Number of active guards at a site.
    pub fn site_guard_count(&self, site_id: CallSiteId) -> Option<usize> {
        self.site(site_id).map(|site| site.guard_count())
    }

    /// Number of materialized call-site records.
    pub fn site_count(&self) -> usize {
        self.inner.sites.len()
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("sites", &self.inner.sites.len())
            .field("config", &self.inner.config)
            .finish()
    }
}
