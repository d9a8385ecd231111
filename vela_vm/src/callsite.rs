//! Call-site records and the inline-cache state machine.
//!
//! One record exists per call location, created lazily on first
//! execution and owned by the global [`CallSiteTable`]. A record holds
//! an ordered chain of `(guard, target)` pairs behind a single atomic
//! pointer: readers walk the published chain lock-free, while relinking
//! serializes on a mutex and publishes the next state with one atomic
//! store. Replaced states stay alive for the lifetime of the site, so a
//! reader never observes a partially-built chain or a dangling guard.
//!
//! State only moves forward: `Uninitialized → Monomorphic → Polymorphic
//! → Megamorphic`. A megamorphic site re-resolves on every call and only
//! remembers its classification, skipping the fast-path attempt.

use dashmap::DashMap;
use parking_lot::Mutex;
use rustc_hash::FxBuildHasher;
use smallvec::SmallVec;
use std::borrow::Cow;
use std::sync::atomic::{AtomicPtr, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use vela_core::error::DispatchResult;
use vela_core::intern::InternedString;
use vela_core::types::TypeId;
use vela_core::value::{FunctionRef, Value};

use crate::descriptor::InvocationDescriptor;

// =============================================================================
// Guards
// =============================================================================

/// A cheap predicate gating a cached target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Guard {
    /// Unconditional; used by function sites whose target does not
    /// depend on any receiver.
    Always,
    /// The receiver's concrete runtime type equals the cached type.
    ReceiverType(TypeId),
    /// The full argument type vector matches. Position 0 is strict;
    /// later positions tolerate nil. Installed when the winning
    /// candidate had applicable same-name rivals.
    ArgumentTypes(SmallVec<[TypeId; 4]>),
    /// The callee is the identical function reference (closure sites).
    FunctionIdentity(u64),
}

impl Guard {
    /// Evaluate the guard against a concrete argument list.
    #[inline]
    pub fn matches(&self, args: &[Value]) -> bool {
        match self {
            Guard::Always => true,
            Guard::ReceiverType(expected) => args
                .first()
                .map(|receiver| receiver.type_id() == *expected)
                .unwrap_or(false),
            Guard::ArgumentTypes(expected) => {
                if args.len() != expected.len() || args.is_empty() {
                    return false;
                }
                if args[0].type_id() != expected[0] {
                    return false;
                }
                args[1..]
                    .iter()
                    .zip(&expected[1..])
                    .all(|(arg, ty)| arg.is_nil() || arg.type_id() == *ty)
            }
            Guard::FunctionIdentity(id) => {
                matches!(args.first(), Some(Value::Function(f)) if f.id() == *id)
            }
        }
    }

    /// Guard from a concrete argument list (overloaded targets).
    pub fn from_argument_types(args: &[Value]) -> Guard {
        Guard::ArgumentTypes(args.iter().map(Value::type_id).collect())
    }
}

// =============================================================================
// Resolved Targets
// =============================================================================

/// Calling-convention adaptation applied before invoking a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallConvention {
    /// Pass arguments through unchanged.
    Direct,
    /// Drop the leading callee argument (closure sites).
    DropCallee,
    /// Collect trailing arguments, starting at `fixed`, into a single
    /// array argument.
    CollectVarargs {
        /// Number of leading arguments passed positionally.
        fixed: usize,
    },
    /// Drop the callee, then collect trailing arguments.
    DropCalleeCollect {
        /// Number of leading arguments (callee excluded) passed
        /// positionally.
        fixed: usize,
    },
}

impl CallConvention {
    /// Reshape an argument list for the target.
    pub fn apply<'a>(&self, args: &'a [Value]) -> Cow<'a, [Value]> {
        match *self {
            CallConvention::Direct => Cow::Borrowed(args),
            CallConvention::DropCallee => Cow::Borrowed(&args[1..]),
            CallConvention::CollectVarargs { fixed } => Cow::Owned(collect(args, fixed)),
            CallConvention::DropCalleeCollect { fixed } => Cow::Owned(collect(&args[1..], fixed)),
        }
    }
}

/// Collect `args[fixed..]` into one trailing array argument; an
/// already-collected single array passes through unchanged.
fn collect(args: &[Value], fixed: usize) -> Vec<Value> {
    if args.len() == fixed + 1 {
        if let Value::Array(_) = args[fixed] {
            return args.to_vec();
        }
    }
    let mut adapted = Vec::with_capacity(fixed + 1);
    adapted.extend_from_slice(&args[..fixed.min(args.len())]);
    adapted.push(Value::Array(Arc::from(args[fixed.min(args.len())..].to_vec())));
    adapted
}

/// A fully-resolved, fully-validated dispatch target.
#[derive(Debug)]
pub struct ResolvedTarget {
    /// The invocable to run.
    pub callable: FunctionRef,
    /// Argument reshaping applied at every invocation.
    pub convention: CallConvention,
    /// Module pushed on the execution stack while the target runs.
    pub frame: Option<InternedString>,
}

impl ResolvedTarget {
    /// A direct target with no adaptation and no frame.
    pub fn direct(callable: FunctionRef) -> Arc<Self> {
        Arc::new(Self {
            callable,
            convention: CallConvention::Direct,
            frame: None,
        })
    }

    /// Invoke with calling-convention adaptation.
    #[inline]
    pub fn invoke(&self, args: &[Value]) -> DispatchResult<Value> {
        let adapted = self.convention.apply(args);
        self.callable.invoke(&adapted)
    }
}

/// Outcome of a resolver: the target and the guard that protects it.
#[derive(Debug)]
pub struct Resolution {
    /// Guard installed in front of the target.
    pub guard: Guard,
    /// The target itself.
    pub target: Arc<ResolvedTarget>,
}

// =============================================================================
// Cache States
// =============================================================================

/// One guard/target pair of a chain.
#[derive(Debug, Clone)]
pub struct GuardedTarget {
    /// The predicate.
    pub guard: Guard,
    /// The protected target.
    pub target: Arc<ResolvedTarget>,
}

impl GuardedTarget {
    fn new(guard: Guard, target: Arc<ResolvedTarget>) -> Self {
        Self { guard, target }
    }
}

/// Published state of a call site. Immutable once published.
#[derive(Debug)]
pub enum CacheState {
    /// No call has completed resolution yet.
    Uninitialized,
    /// The site folded to a constant value.
    Constant(Value),
    /// One guard, one target.
    Monomorphic(GuardedTarget),
    /// Bounded guard chain, tested in insertion order.
    Polymorphic(Vec<GuardedTarget>),
    /// Chain exhausted; every call re-resolves.
    Megamorphic,
}

/// Externally visible classification of a site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SiteState {
    /// Never resolved.
    Uninitialized,
    /// One receiver type observed (constant sites included).
    Monomorphic,
    /// Several receiver types observed, chain not exhausted.
    Polymorphic,
    /// Chain exhausted.
    Megamorphic,
}

// =============================================================================
// Call Site
// =============================================================================

/// Stable per-call-site integer id assigned at compile time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallSiteId(pub u32);

/// One call-site record.
pub struct CallSite {
    id: CallSiteId,
    descriptor: Arc<InvocationDescriptor>,
    /// Currently published state; points into `published`.
    current: AtomicPtr<CacheState>,
    /// Every state ever published, kept alive so lock-free readers never
    /// observe a dangling pointer. Bounded by the transition count of
    /// the state machine (chain threshold + 2).
    published: Mutex<Vec<Box<CacheState>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

// Safety: `current` always points into a `Box` owned by `published`,
// states are immutable after publication, and boxes are never dropped
// before the site itself.
unsafe impl Send for CallSite {}
unsafe impl Sync for CallSite {}

impl CallSite {
    fn new(id: CallSiteId, descriptor: Arc<InvocationDescriptor>) -> Self {
        let initial = Box::new(CacheState::Uninitialized);
        let raw = &*initial as *const CacheState as *mut CacheState;
        Self {
            id,
            descriptor,
            current: AtomicPtr::new(raw),
            published: Mutex::new(vec![initial]),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Site id.
    #[inline]
    pub fn id(&self) -> CallSiteId {
        self.id
    }

    /// The invocation descriptor shared by all calls at this site.
    #[inline]
    pub fn descriptor(&self) -> &Arc<InvocationDescriptor> {
        &self.descriptor
    }

    /// The currently published state. Lock-free.
    #[inline]
    pub fn state(&self) -> &CacheState {
        // Safety: see the Send/Sync justification above.
        unsafe { &*self.current.load(Ordering::Acquire) }
    }

    /// Run a state transition under the relink lock.
    ///
    /// The closure observes the current state and returns the next state
    /// to publish (or `None` to keep the current one — the losing side
    /// of a racing resolution) together with a result for the caller.
    /// Publication is a single atomic store; readers either see the old
    /// chain or the complete new one.
    pub fn transition<R>(&self, f: impl FnOnce(&CacheState) -> (Option<CacheState>, R)) -> R {
        let mut published = self.published.lock();
        let current = self.state();
        let (next, result) = f(current);
        if let Some(next) = next {
            let boxed = Box::new(next);
            let raw = &*boxed as *const CacheState as *mut CacheState;
            published.push(boxed);
            self.current.store(raw, Ordering::Release);
        }
        result
    }

    /// Classification of the published state.
    pub fn classification(&self) -> SiteState {
        match self.state() {
            CacheState::Uninitialized => SiteState::Uninitialized,
            CacheState::Constant(_) | CacheState::Monomorphic(_) => SiteState::Monomorphic,
            CacheState::Polymorphic(_) => SiteState::Polymorphic,
            CacheState::Megamorphic => SiteState::Megamorphic,
        }
    }

    /// Number of active guards.
    pub fn guard_count(&self) -> usize {
        match self.state() {
            CacheState::Monomorphic(_) | CacheState::Constant(_) => 1,
            CacheState::Polymorphic(chain) => chain.len(),
            _ => 0,
        }
    }

    /// Record a fast-path hit.
    #[inline]
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a miss (resolution required).
    #[inline]
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Fast-path hits so far.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Misses so far.
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Walk the published guard chain, front to back, first match wins.
    #[inline]
    pub fn lookup(&self, args: &[Value]) -> Option<Arc<ResolvedTarget>> {
        match self.state() {
            CacheState::Monomorphic(entry) if entry.guard.matches(args) => {
                Some(entry.target.clone())
            }
            CacheState::Polymorphic(chain) => chain
                .iter()
                .find(|entry| entry.guard.matches(args))
                .map(|entry| entry.target.clone()),
            _ => None,
        }
    }
}

impl std::fmt::Debug for CallSite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallSite")
            .field("id", &self.id.0)
            .field("state", &self.classification())
            .field("guards", &self.guard_count())
            .finish()
    }
}

/// Build the next state for a freshly resolved `(guard, target)` pair.
///
/// Returns the target to invoke; a racing thread that lost simply reuses
/// the winner's target for the same guard, so concurrent first calls
/// converge. `max_chain` is the polymorphic threshold.
pub fn install(
    site: &CallSite,
    resolution: &Resolution,
    args: &[Value],
    max_chain: usize,
) -> Arc<ResolvedTarget> {
    site.transition(|state| match state {
        CacheState::Uninitialized => (
            Some(CacheState::Monomorphic(GuardedTarget::new(
                resolution.guard.clone(),
                resolution.target.clone(),
            ))),
            resolution.target.clone(),
        ),
        CacheState::Monomorphic(existing) => {
            if existing.guard.matches(args) {
                // Lost a racing first call; converge on the winner.
                (None, existing.target.clone())
            } else {
                let chain = vec![
                    existing.clone(),
                    GuardedTarget::new(resolution.guard.clone(), resolution.target.clone()),
                ];
                (Some(CacheState::Polymorphic(chain)), resolution.target.clone())
            }
        }
        CacheState::Polymorphic(chain) => {
            if let Some(entry) = chain.iter().find(|entry| entry.guard.matches(args)) {
                (None, entry.target.clone())
            } else if chain.len() < max_chain {
                let mut extended = chain.clone();
                extended.push(GuardedTarget::new(
                    resolution.guard.clone(),
                    resolution.target.clone(),
                ));
                (
                    Some(CacheState::Polymorphic(extended)),
                    resolution.target.clone(),
                )
            } else {
                (Some(CacheState::Megamorphic), resolution.target.clone())
            }
        }
        // Megamorphic sites stop growing; constant sites stay folded.
        CacheState::Megamorphic | CacheState::Constant(_) => (None, resolution.target.clone()),
    })
}

// =============================================================================
// Call-Site Table
// =============================================================================

/// Global table of call-site records, keyed by compile-time id.
///
/// Records are created lazily on first execution and live until the
/// owning executable unit is unloaded. Ids above
/// [`CallSiteTable::SYNTHETIC_BASE`] are handed out at runtime for
/// synthesized adapter method bodies.
#[derive(Debug)]
pub struct CallSiteTable {
    sites: DashMap<u32, Arc<CallSite>, FxBuildHasher>,
    next_synthetic: AtomicU32,
}

impl Default for CallSiteTable {
    fn default() -> Self {
        Self::new()
    }
}

impl CallSiteTable {
    /// First id of the runtime-allocated range.
    pub const SYNTHETIC_BASE: u32 = 1 << 31;

    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            sites: DashMap::with_hasher(FxBuildHasher),
            next_synthetic: AtomicU32::new(Self::SYNTHETIC_BASE),
        }
    }

    /// Get or lazily create the record for a call site.
    pub fn site(&self, id: CallSiteId, descriptor: &Arc<InvocationDescriptor>) -> Arc<CallSite> {
        self.sites
            .entry(id.0)
            .or_insert_with(|| Arc::new(CallSite::new(id, descriptor.clone())))
            .value()
            .clone()
    }

    /// Look up an existing record without creating one.
    pub fn get(&self, id: CallSiteId) -> Option<Arc<CallSite>> {
        self.sites.get(&id.0).map(|entry| entry.value().clone())
    }

    /// Allocate a fresh id for a runtime-synthesized call site.
    pub fn allocate_synthetic_id(&self) -> CallSiteId {
        CallSiteId(self.next_synthetic.fetch_add(1, Ordering::Relaxed))
    }

    /// Number of materialized records.
    pub fn len(&self) -> usize {
        self.sites.len()
    }

    /// Whether no record has been materialized yet.
    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::InvocationDescriptor;

    fn target(tag: i32) -> Arc<ResolvedTarget> {
        ResolvedTarget::direct(FunctionRef::untyped("t", 1, move |_| Ok(Value::Int(tag))))
    }

    fn resolution(type_id: TypeId, tag: i32) -> Resolution {
        Resolution {
            guard: Guard::ReceiverType(type_id),
            target: target(tag),
        }
    }

    fn new_site() -> CallSite {
        CallSite::new(
            CallSiteId(1),
            InvocationDescriptor::method("m", 1, "acme.main"),
        )
    }

    #[test]
    fn test_guard_receiver_type() {
        let guard = Guard::ReceiverType(TypeId::INT);
        assert!(guard.matches(&[Value::Int(1)]));
        assert!(!guard.matches(&[Value::str("x")]));
        assert!(!guard.matches(&[]));
    }

    #[test]
    fn test_guard_argument_types_nil_tolerant() {
        let guard = Guard::from_argument_types(&[Value::str("a"), Value::Int(1)]);
        assert!(guard.matches(&[Value::str("b"), Value::Int(2)]));
        // nil tolerated beyond position 0
        assert!(guard.matches(&[Value::str("b"), Value::Nil]));
        // position 0 strict
        assert!(!guard.matches(&[Value::Nil, Value::Int(2)]));
        assert!(!guard.matches(&[Value::str("b"), Value::str("c")]));
    }

    #[test]
    fn test_guard_function_identity() {
        let f = FunctionRef::untyped("f", 0, |_| Ok(Value::Nil));
        let g = FunctionRef::untyped("g", 0, |_| Ok(Value::Nil));
        let guard = Guard::FunctionIdentity(f.id());
        assert!(guard.matches(&[Value::Function(f.clone())]));
        assert!(!guard.matches(&[Value::Function(g)]));
        assert!(!guard.matches(&[Value::Int(1)]));
    }

    #[test]
    fn test_convention_collect() {
        let convention = CallConvention::CollectVarargs { fixed: 1 };
        let args = vec![Value::Int(1), Value::Int(2), Value::Int(3)];
        let adapted = convention.apply(&args);
        assert_eq!(adapted.len(), 2);
        assert_eq!(adapted[0], Value::Int(1));
        assert_eq!(
            adapted[1],
            Value::array(vec![Value::Int(2), Value::Int(3)])
        );
    }

    #[test]
    fn test_convention_collected_array_passthrough() {
        let convention = CallConvention::CollectVarargs { fixed: 1 };
        let packed = Value::array(vec![Value::Int(2), Value::Int(3)]);
        let args = vec![Value::Int(1), packed.clone()];
        let adapted = convention.apply(&args);
        assert_eq!(adapted[1], packed);
    }

    #[test]
    fn test_convention_collect_empty_tail() {
        let convention = CallConvention::CollectVarargs { fixed: 1 };
        let args = vec![Value::Int(1)];
        let adapted = convention.apply(&args);
        assert_eq!(adapted.len(), 2);
        assert_eq!(adapted[1], Value::array(Vec::<Value>::new()));
    }

    #[test]
    fn test_state_machine_degradation() {
        let site = new_site();
        assert_eq!(site.classification(), SiteState::Uninitialized);

        install(&site, &resolution(TypeId::INT, 1), &[Value::Int(0)], 2);
        assert_eq!(site.classification(), SiteState::Monomorphic);
        assert_eq!(site.guard_count(), 1);

        install(&site, &resolution(TypeId::STRING, 2), &[Value::str("x")], 2);
        assert_eq!(site.classification(), SiteState::Polymorphic);
        assert_eq!(site.guard_count(), 2);

        // Third distinct type with threshold 2 exhausts the chain.
        install(&site, &resolution(TypeId::BOOL, 3), &[Value::Bool(true)], 2);
        assert_eq!(site.classification(), SiteState::Megamorphic);
        assert_eq!(site.guard_count(), 0);

        // Megamorphic is terminal.
        install(&site, &resolution(TypeId::LONG, 4), &[Value::Long(1)], 2);
        assert_eq!(site.classification(), SiteState::Megamorphic);
    }

    #[test]
    fn test_racing_install_converges() {
        let site = new_site();
        let winner = resolution(TypeId::INT, 1);
        let loser = resolution(TypeId::INT, 2);

        let first = install(&site, &winner, &[Value::Int(0)], 6);
        // Same receiver type: the second install discards its result.
        let second = install(&site, &loser, &[Value::Int(0)], 6);
        assert_eq!(site.guard_count(), 1);
        assert_eq!(
            first.invoke(&[Value::Int(0)]).unwrap(),
            second.invoke(&[Value::Int(0)]).unwrap()
        );
    }

    #[test]
    fn test_lookup_insertion_order() {
        let site = new_site();
        install(&site, &resolution(TypeId::INT, 1), &[Value::Int(0)], 6);
        install(&site, &resolution(TypeId::STRING, 2), &[Value::str("x")], 6);

        let hit = site.lookup(&[Value::Int(9)]).unwrap();
        assert_eq!(hit.invoke(&[Value::Int(9)]).unwrap(), Value::Int(1));
        let hit = site.lookup(&[Value::str("y")]).unwrap();
        assert_eq!(hit.invoke(&[Value::str("y")]).unwrap(), Value::Int(2));
        assert!(site.lookup(&[Value::Bool(true)]).is_none());
    }

    #[test]
    fn test_table_lazily_creates() {
        let table = CallSiteTable::new();
        assert!(table.is_empty());
        let descriptor = InvocationDescriptor::function("f", 0, "acme.main");
        let a = table.site(CallSiteId(7), &descriptor);
        let b = table.site(CallSiteId(7), &descriptor);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(table.len(), 1);
        assert!(table.get(CallSiteId(8)).is_none());
    }

    #[test]
    fn test_synthetic_ids_do_not_collide() {
        let table = CallSiteTable::new();
        let a = table.allocate_synthetic_id();
        let b = table.allocate_synthetic_id();
        assert_ne!(a, b);
        assert!(a.0 >= CallSiteTable::SYNTHETIC_BASE);
    }
}
