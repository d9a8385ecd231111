//! Object model above the Vela core: immutable module metadata, the
//! dynamic property-bag object, and adapter definitions.
//!
//! Everything in this crate is built once at module-load time (or, for
//! adapter definitions, validated once before synthesis) and immutable
//! afterwards, so the dispatch machinery reads it without locks beyond
//! publish-once visibility.

pub mod adapters;
pub mod dynamic_object;
pub mod module;

pub use adapters::{AdapterDefinition, AdapterDefinitionProblem};
pub use dynamic_object::DynamicObject;
pub use module::{CallableDecl, ModuleDef, ModuleRegistry};
