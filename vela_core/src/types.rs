//! Runtime type registry.
//!
//! Every value carries a concrete [`TypeId`]; guards compare these ids and
//! the resolvers consult the registry for subtyping, numeric widening
//! ranks, boxed counterparts, and the declared method/constructor tables
//! of reference types. Built-in descriptors are registered at startup;
//! user and synthesized types are added dynamically and never unloaded.

use crate::error::DispatchResult;
use crate::intern::{intern, InternedString};
use crate::value::{FunctionRef, Value};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

// =============================================================================
// Type Identity
// =============================================================================

/// Identifier of a runtime type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(pub u32);

impl TypeId {
    /// The nil type (sole inhabitant: `Value::Nil`).
    pub const NIL: TypeId = TypeId(1);
    /// Primitive boolean.
    pub const BOOL: TypeId = TypeId(2);
    /// Primitive 32-bit integer.
    pub const INT: TypeId = TypeId(3);
    /// Primitive 64-bit integer.
    pub const LONG: TypeId = TypeId(4);
    /// Primitive 32-bit float.
    pub const FLOAT: TypeId = TypeId(5);
    /// Primitive 64-bit float.
    pub const DOUBLE: TypeId = TypeId(6);
    /// Reference root: every value widens to `Any`.
    pub const ANY: TypeId = TypeId(7);
    /// Immutable string.
    pub const STRING: TypeId = TypeId(8);
    /// The varargs collection shape.
    pub const ARRAY: TypeId = TypeId(9);
    /// Function references.
    pub const FUNCTION: TypeId = TypeId(10);
    /// The dynamic property-bag object.
    pub const DYNAMIC_OBJECT: TypeId = TypeId(11);
    /// Boxed boolean.
    pub const BOXED_BOOL: TypeId = TypeId(12);
    /// Boxed 32-bit integer.
    pub const BOXED_INT: TypeId = TypeId(13);
    /// Boxed 64-bit integer.
    pub const BOXED_LONG: TypeId = TypeId(14);
    /// Boxed 32-bit float.
    pub const BOXED_FLOAT: TypeId = TypeId(15);
    /// Boxed 64-bit float.
    pub const BOXED_DOUBLE: TypeId = TypeId(16);
    /// First id handed out for user-defined and synthesized types.
    pub const FIRST_USER_TYPE: u32 = 32;
}

// =============================================================================
// Type Descriptors
// =============================================================================

/// Widening rank of a primitive numeric type (narrower < wider).
pub type NumericRank = u8;

/// Classification of a type descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    /// Primitive value type; numeric primitives carry a widening rank.
    Primitive {
        /// `Some(rank)` for numeric primitives, `None` for bool.
        rank: Option<NumericRank>,
    },
    /// Reference type participating in the subtyping lattice.
    Reference,
}

/// Visibility of a declared method or constructor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    /// Visible everywhere.
    Public,
    /// Visible to subtypes (constructors only, for adapter projection).
    Protected,
    /// Visible inside the declaring module only.
    Local,
}

/// A method declared on a reference type.
///
/// `param_count` includes the receiver (position 0), matching call-site
/// arity; for native methods the authoritative signature (parameter
/// types, varargs flag) is the one carried by the `FunctionRef` itself.
/// Abstract methods have no native implementation and must be covered
/// when the type is used as an adapter parent.
#[derive(Debug, Clone)]
pub struct MethodDef {
    /// Method name.
    pub name: InternedString,
    /// Parameter count including the receiver.
    pub param_count: usize,
    /// Whether the last parameter collects trailing arguments.
    pub varargs: bool,
    /// Abstract methods have no body of their own.
    pub is_abstract: bool,
    /// Native implementation, absent for abstract methods.
    pub native: Option<FunctionRef>,
}

impl MethodDef {
    /// A concrete native method; the signature is the target's.
    pub fn native(name: &str, param_count: usize, target: FunctionRef) -> Self {
        Self {
            name: intern(name),
            param_count,
            varargs: target.is_varargs(),
            is_abstract: false,
            native: Some(target),
        }
    }

    /// An abstract method to be covered by an adapter or subtype.
    pub fn abstract_method(name: &str, param_count: usize) -> Self {
        Self {
            name: intern(name),
            param_count,
            varargs: false,
            is_abstract: true,
            native: None,
        }
    }

    /// Mark the method variable-arity.
    pub fn varargs(mut self) -> Self {
        self.varargs = true;
        self
    }
}

/// A constructor declared on a reference type.
///
/// The factory receives the constructor arguments (no receiver) and
/// produces the new instance value; its declared parameter types and
/// varargs flag are the constructor's signature.
#[derive(Debug, Clone)]
pub struct ConstructorDef {
    /// Constructor visibility; adapters project public and protected ones.
    pub visibility: Visibility,
    /// Instance factory carrying the signature.
    pub factory: FunctionRef,
}

impl ConstructorDef {
    /// A public constructor.
    pub fn public(factory: FunctionRef) -> Self {
        Self {
            visibility: Visibility::Public,
            factory,
        }
    }

    /// A protected constructor, reachable from adapter projections only.
    pub fn protected(factory: FunctionRef) -> Self {
        Self {
            visibility: Visibility::Protected,
            factory,
        }
    }

    /// Instantiate through this constructor.
    pub fn instantiate(&self, args: &[Value]) -> DispatchResult<Value> {
        self.factory.invoke(args)
    }
}

/// Descriptor of a runtime type.
#[derive(Debug, Clone)]
pub struct TypeDesc {
    /// Stable identity.
    pub id: TypeId,
    /// Fully-qualified name.
    pub name: InternedString,
    /// Primitive or reference classification.
    pub kind: TypeKind,
    /// Supertype, `None` for primitives and for `Any` itself.
    pub parent: Option<TypeId>,
    /// Implemented interfaces (direct).
    pub interfaces: Vec<TypeId>,
    /// Flag bits, see `TypeDesc::FLAG_*`.
    pub flags: u8,
    /// Declared methods, in declaration order.
    pub methods: Vec<MethodDef>,
    /// Declared constructors, in declaration order.
    pub constructors: Vec<ConstructorDef>,
}

impl TypeDesc {
    /// Type is an interface (cannot be an adapter parent).
    pub const FLAG_INTERFACE: u8 = 1 << 0;
    /// Type has abstract methods and cannot be instantiated directly.
    pub const FLAG_ABSTRACT: u8 = 1 << 1;
    /// Type cannot be extended.
    pub const FLAG_FINAL: u8 = 1 << 2;

    /// Create a reference type descriptor with no members.
    pub fn reference(name: &str) -> Self {
        Self {
            id: TypeId(0),
            name: intern(name),
            kind: TypeKind::Reference,
            parent: Some(TypeId::ANY),
            interfaces: Vec::new(),
            flags: 0,
            methods: Vec::new(),
            constructors: Vec::new(),
        }
    }

    fn primitive(id: TypeId, name: &str, rank: Option<NumericRank>) -> Self {
        Self {
            id,
            name: intern(name),
            kind: TypeKind::Primitive { rank },
            parent: None,
            interfaces: Vec::new(),
            flags: TypeDesc::FLAG_FINAL,
            methods: Vec::new(),
            constructors: Vec::new(),
        }
    }

    fn builtin_reference(id: TypeId, name: &str, flags: u8) -> Self {
        Self {
            id,
            name: intern(name),
            kind: TypeKind::Reference,
            parent: if id == TypeId::ANY {
                None
            } else {
                Some(TypeId::ANY)
            },
            interfaces: Vec::new(),
            flags,
            methods: Vec::new(),
            constructors: Vec::new(),
        }
    }

    /// Set the supertype.
    pub fn with_parent(mut self, parent: TypeId) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Add an implemented interface.
    pub fn with_interface(mut self, iface: TypeId) -> Self {
        self.interfaces.push(iface);
        self
    }

    /// Set flag bits.
    pub fn with_flags(mut self, flags: u8) -> Self {
        self.flags |= flags;
        self
    }

    /// Add a declared method.
    pub fn with_method(mut self, method: MethodDef) -> Self {
        self.methods.push(method);
        self
    }

    /// Add a declared constructor.
    pub fn with_constructor(mut self, ctor: ConstructorDef) -> Self {
        self.constructors.push(ctor);
        self
    }

    /// Check a flag bit.
    #[inline]
    pub fn has_flag(&self, flag: u8) -> bool {
        self.flags & flag != 0
    }

    /// Whether this descriptor names an interface.
    #[inline]
    pub fn is_interface(&self) -> bool {
        self.has_flag(Self::FLAG_INTERFACE)
    }

    /// Whether this descriptor is final.
    #[inline]
    pub fn is_final(&self) -> bool {
        self.has_flag(Self::FLAG_FINAL)
    }

    /// Declared methods with the given name, in declaration order.
    pub fn methods_named(&self, name: InternedString) -> impl Iterator<Item = &MethodDef> {
        self.methods.iter().filter(move |m| m.name == name)
    }
}

// =============================================================================
// Type Registry
// =============================================================================

/// Global type registry.
///
/// Built-in types are registered at startup; user and synthesized types
/// are added dynamically. Descriptors are immutable once published, so
/// lookups hand out shared `Arc`s.
pub struct TypeRegistry {
    /// Map from TypeId to descriptor.
    types: RwLock<Vec<Option<Arc<TypeDesc>>>>,
    /// Map from fully-qualified name to TypeId.
    by_name: RwLock<rustc_hash::FxHashMap<InternedString, TypeId>>,
    /// Counter for new TypeIds.
    next_id: AtomicU32,
}

impl TypeRegistry {
    /// Create a registry pre-populated with the built-in types.
    pub fn new() -> Self {
        let registry = Self {
            types: RwLock::new(Vec::new()),
            by_name: RwLock::new(rustc_hash::FxHashMap::default()),
            next_id: AtomicU32::new(TypeId::FIRST_USER_TYPE),
        };
        registry.install_builtins();
        registry
    }

    fn install_builtins(&self) {
        self.publish(TypeDesc::primitive(TypeId::NIL, "nil", None));
        self.publish(TypeDesc::primitive(TypeId::BOOL, "bool", None));
        self.publish(TypeDesc::primitive(TypeId::INT, "int", Some(0)));
        self.publish(TypeDesc::primitive(TypeId::LONG, "long", Some(1)));
        self.publish(TypeDesc::primitive(TypeId::FLOAT, "float", Some(2)));
        self.publish(TypeDesc::primitive(TypeId::DOUBLE, "double", Some(3)));
        self.publish(TypeDesc::builtin_reference(TypeId::ANY, "Any", 0));
        self.publish(TypeDesc::builtin_reference(
            TypeId::STRING,
            "String",
            TypeDesc::FLAG_FINAL,
        ));
        self.publish(TypeDesc::builtin_reference(TypeId::ARRAY, "Array", 0));
        self.publish(TypeDesc::builtin_reference(
            TypeId::FUNCTION,
            "Function",
            TypeDesc::FLAG_FINAL,
        ));
        self.publish(TypeDesc::builtin_reference(
            TypeId::DYNAMIC_OBJECT,
            "DynamicObject",
            0,
        ));
        self.publish(TypeDesc::builtin_reference(
            TypeId::BOXED_BOOL,
            "Boolean",
            TypeDesc::FLAG_FINAL,
        ));
        self.publish(TypeDesc::builtin_reference(
            TypeId::BOXED_INT,
            "Integer",
            TypeDesc::FLAG_FINAL,
        ));
        self.publish(TypeDesc::builtin_reference(
            TypeId::BOXED_LONG,
            "Long",
            TypeDesc::FLAG_FINAL,
        ));
        self.publish(TypeDesc::builtin_reference(
            TypeId::BOXED_FLOAT,
            "Float",
            TypeDesc::FLAG_FINAL,
        ));
        self.publish(TypeDesc::builtin_reference(
            TypeId::BOXED_DOUBLE,
            "Double",
            TypeDesc::FLAG_FINAL,
        ));
    }

    fn publish(&self, desc: TypeDesc) {
        let id = desc.id;
        let mut types = self.types.write();
        let index = id.0 as usize;
        if types.len() <= index {
            types.resize(index + 1, None);
        }
        let desc = Arc::new(desc);
        self.by_name.write().insert(desc.name, id);
        types[index] = Some(desc);
    }

    /// Allocate a fresh TypeId for a user-defined or synthesized type.
    pub fn allocate_type_id(&self) -> TypeId {
        TypeId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Register a descriptor under a freshly-allocated id.
    ///
    /// Returns the assigned id. The descriptor is immutable afterwards.
    pub fn register(&self, mut desc: TypeDesc) -> TypeId {
        let id = self.allocate_type_id();
        desc.id = id;
        self.publish(desc);
        id
    }

    /// Publish a descriptor whose id was pre-allocated with
    /// [`TypeRegistry::allocate_type_id`]. Used when members of the
    /// descriptor (constructors, method stubs) must close over the id.
    pub fn define(&self, desc: TypeDesc) {
        self.publish(desc);
    }

    /// Look up a descriptor by id.
    #[inline]
    pub fn get(&self, id: TypeId) -> Option<Arc<TypeDesc>> {
        self.types.read().get(id.0 as usize)?.clone()
    }

    /// Look up a descriptor by fully-qualified name.
    pub fn get_by_name(&self, name: InternedString) -> Option<Arc<TypeDesc>> {
        let id = *self.by_name.read().get(&name)?;
        self.get(id)
    }

    /// Widening rank of a numeric primitive.
    pub fn numeric_rank(&self, id: TypeId) -> Option<NumericRank> {
        match self.get(id)?.kind {
            TypeKind::Primitive { rank } => rank,
            TypeKind::Reference => None,
        }
    }

    /// Boxed counterpart of a primitive type.
    pub fn boxed_counterpart(&self, id: TypeId) -> Option<TypeId> {
        match id {
            TypeId::BOOL => Some(TypeId::BOXED_BOOL),
            TypeId::INT => Some(TypeId::BOXED_INT),
            TypeId::LONG => Some(TypeId::BOXED_LONG),
            TypeId::FLOAT => Some(TypeId::BOXED_FLOAT),
            TypeId::DOUBLE => Some(TypeId::BOXED_DOUBLE),
            _ => None,
        }
    }

    /// Whether `source` is assignable to `target` under reference widening.
    ///
    /// Primitives are assignable only to themselves; widening between
    /// numeric primitives is a scoring concern, not an assignability one.
    pub fn is_assignable(&self, target: TypeId, source: TypeId) -> bool {
        if target == source {
            return true;
        }
        if target == TypeId::ANY {
            return true;
        }
        let mut current = Some(source);
        while let Some(id) = current {
            let Some(desc) = self.get(id) else {
                return false;
            };
            if desc.id == target {
                return true;
            }
            for &iface in &desc.interfaces {
                if self.is_assignable(target, iface) {
                    return true;
                }
            }
            current = desc.parent;
        }
        false
    }

    /// Walk the parent chain looking for a concrete (native) method.
    ///
    /// Used for inherited-method dispatch and adapter parent fallback.
    pub fn find_native_method(
        &self,
        type_id: TypeId,
        name: InternedString,
    ) -> Option<(TypeId, MethodDef)> {
        let mut current = Some(type_id);
        while let Some(id) = current {
            let desc = self.get(id)?;
            for method in desc.methods_named(name) {
                if method.native.is_some() {
                    return Some((id, method.clone()));
                }
            }
            current = desc.parent;
        }
        None
    }

    /// Every type a subtype of `type_id` inherits members from: the
    /// parent chain plus all transitively implemented interfaces, plus
    /// the extra interfaces given, most specific first.
    fn member_sources(&self, type_id: TypeId, interfaces: &[TypeId]) -> Vec<Arc<TypeDesc>> {
        let mut sources: Vec<Arc<TypeDesc>> = Vec::new();
        let mut pending: Vec<TypeId> = Vec::new();
        let mut current = Some(type_id);
        while let Some(id) = current {
            let Some(desc) = self.get(id) else { break };
            pending.extend(desc.interfaces.iter().copied());
            current = desc.parent;
            sources.push(desc);
        }
        pending.extend(interfaces.iter().copied());
        while let Some(id) = pending.pop() {
            if sources.iter().any(|d| d.id == id) {
                continue;
            }
            let Some(desc) = self.get(id) else { continue };
            pending.extend(desc.interfaces.iter().copied());
            sources.push(desc);
        }
        sources
    }

    /// Collect the abstract methods a subtype of `type_id` must cover,
    /// including those contributed by the given interfaces. A name with
    /// a concrete implementation anywhere in the hierarchy needs no
    /// coverage.
    pub fn abstract_methods(&self, type_id: TypeId, interfaces: &[TypeId]) -> Vec<MethodDef> {
        let sources = self.member_sources(type_id, interfaces);
        let concrete: Vec<InternedString> = sources
            .iter()
            .flat_map(|d| d.methods.iter())
            .filter(|m| !m.is_abstract)
            .map(|m| m.name)
            .collect();
        let mut collected: Vec<MethodDef> = Vec::new();
        for desc in &sources {
            for method in &desc.methods {
                if method.is_abstract
                    && !concrete.contains(&method.name)
                    && !collected.iter().any(|m| m.name == method.name)
                {
                    collected.push(method.clone());
                }
            }
        }
        collected
    }

    /// Collect every overridable method of a parent and interfaces: all
    /// declared methods, abstract or concrete, most specific first.
    pub fn overridable_methods(&self, type_id: TypeId, interfaces: &[TypeId]) -> Vec<MethodDef> {
        let mut collected: Vec<MethodDef> = Vec::new();
        for desc in self.member_sources(type_id, interfaces) {
            for method in &desc.methods {
                if !collected.iter().any(|m| m.name == method.name) {
                    collected.push(method.clone());
                }
            }
        }
        collected
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("types", &self.types.read().len())
            .finish()
    }
}
