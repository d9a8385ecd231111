//! Global string interning.
//!
//! Callee names, module names, and property keys flow through every
//! dispatch decision, so they are interned once and compared as integer
//! handles afterwards. Interned strings are never reclaimed; the set of
//! distinct names is bounded by the loaded executable artifacts.

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::OnceLock;

/// Handle to an interned string.
///
/// Cheap to copy, hash, and compare; the underlying text is resolved
/// through the global interner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InternedString(u32);

impl InternedString {
    /// Resolve the handle back to its text.
    #[inline]
    pub fn as_str(self) -> &'static str {
        resolve(self)
    }
}

impl std::fmt::Display for InternedString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

struct Interner {
    map: FxHashMap<&'static str, InternedString>,
    strings: Vec<&'static str>,
}

impl Interner {
    fn new() -> Self {
        Self {
            map: FxHashMap::default(),
            strings: Vec::new(),
        }
    }
}

static INTERNER: OnceLock<RwLock<Interner>> = OnceLock::new();

fn interner() -> &'static RwLock<Interner> {
    INTERNER.get_or_init(|| RwLock::new(Interner::new()))
}

/// Intern a string, returning its stable handle.
pub fn intern(text: &str) -> InternedString {
    {
        let guard = interner().read();
        if let Some(&handle) = guard.map.get(text) {
            return handle;
        }
    }
    let mut guard = interner().write();
    // Re-check: another thread may have interned between the locks.
    if let Some(&handle) = guard.map.get(text) {
        return handle;
    }
    let leaked: &'static str = Box::leak(text.to_owned().into_boxed_str());
    let handle = InternedString(guard.strings.len() as u32);
    guard.strings.push(leaked);
    guard.map.insert(leaked, handle);
    handle
}

/// Resolve a handle to its text.
pub fn resolve(handle: InternedString) -> &'static str {
    let guard = interner().read();
    guard.strings[handle.0 as usize]
}
