//! Core value model for the Vela dynamic-dispatch runtime.
//!
//! This crate provides:
//! - Global string interning (`intern`)
//! - The dynamic `Value` representation and `FunctionRef` invocables
//! - The runtime type registry (descriptors, subtyping, numeric ranks)
//! - The dispatch error taxonomy (`DispatchError`, `RuntimeFault`)

pub mod error;
pub mod intern;
pub mod types;
pub mod value;

// Re-export commonly used items
pub use error::{DispatchError, DispatchResult, RuntimeFault};
pub use intern::{intern, InternedString};
pub use types::{TypeDesc, TypeId, TypeRegistry};
pub use value::{FunctionRef, Object, Value};
