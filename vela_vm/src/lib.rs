//! Adaptive call-site resolution and caching.
//!
//! The compiler emits an opaque call site for every call expression whose
//! target cannot be determined statically. This crate resolves those
//! sites lazily on first use and caches the decision behind cheap
//! guards, degrading monomorphic → polymorphic → megamorphic under
//! receiver-type churn:
//!
//! ```text
//!              ┌───────────────┐
//!              │ Uninitialized │
//!              └───────┬───────┘
//!                      │ first call
//!              ╔═══════▼═══════╗
//!              ║  Monomorphic  ║
//!              ╚═══════╤═══════╝
//!                      │ guard miss (new receiver type)
//!              ╔═══════▼═══════╗
//!              ║  Polymorphic  ║  (bounded guard chain)
//!              ╚═══════╤═══════╝
//!                      │ chain exhausted
//!              ┌───────▼───────┐
//!              │  Megamorphic  │  (re-resolve every call)
//!              └───────────────┘
//! ```
//!
//! The read path is lock-free; the miss path may run redundantly on
//! racing threads and converges through one atomic relink per site.

pub mod adapter;
pub mod augmentation;
pub mod callsite;
pub mod closure_call;
pub mod descriptor;
pub mod dispatch;
pub mod function_call;
pub mod method_call;
pub mod overload;
pub mod stack;
pub mod typematch;

pub use callsite::{CallSite, CallSiteId, CallSiteTable, Guard, SiteState};
pub use descriptor::{CallKind, InvocationDescriptor};
pub use dispatch::{DispatchConfig, Dispatcher};
