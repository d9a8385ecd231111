//! Type-compatibility scoring.
//!
//! Given a declared parameter type and a supplied argument, the scorer
//! computes an ordered compatibility class usable as a sort key by the
//! overload selector. Within primitive widening, a finer numeric-rank
//! distance prefers narrow-to-wide promotions over jumps. Vectors of
//! scores are compared under a Pareto order; ties fall back to
//! declaration order, which keeps selection stable and reproducible.

use smallvec::SmallVec;
use vela_core::types::{TypeId, TypeKind, TypeRegistry};
use vela_core::value::Value;

/// Compatibility of one argument against one declared parameter type.
///
/// The derived order ranks better matches lower: exact first, then
/// primitive widening by increasing rank distance, then boxing, then
/// reference widening, with incompatible last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TypeCompat {
    /// Argument type equals the declared type.
    Exact,
    /// Numeric promotion; the payload is the rank distance, so `int →
    /// long` beats `int → double`.
    PrimitiveWidening(u8),
    /// Primitive supplied where its boxed counterpart (or `Any`) is
    /// declared.
    Boxing,
    /// Subtype supplied where a supertype is declared; also `nil`
    /// against any reference type.
    ReferenceWidening,
    /// No conversion applies.
    Incompatible,
}

/// Score vector for a full argument list.
pub type ScoreVec = SmallVec<[TypeCompat; 4]>;

/// Score one argument against one declared parameter type.
pub fn compat(types: &TypeRegistry, declared: TypeId, value: &Value) -> TypeCompat {
    let actual = value.type_id();
    if declared == actual {
        return TypeCompat::Exact;
    }
    if value.is_nil() {
        return match types.get(declared).map(|d| d.kind) {
            Some(TypeKind::Reference) => TypeCompat::ReferenceWidening,
            _ => TypeCompat::Incompatible,
        };
    }
    if let (Some(declared_rank), Some(actual_rank)) =
        (types.numeric_rank(declared), types.numeric_rank(actual))
    {
        if declared_rank > actual_rank {
            return TypeCompat::PrimitiveWidening(declared_rank - actual_rank);
        }
        return TypeCompat::Incompatible;
    }
    if types.boxed_counterpart(actual) == Some(declared) {
        return TypeCompat::Boxing;
    }
    let actual_is_primitive = matches!(
        types.get(actual).map(|d| d.kind),
        Some(TypeKind::Primitive { .. })
    );
    if declared == TypeId::ANY && actual_is_primitive {
        return TypeCompat::Boxing;
    }
    let declared_is_reference = matches!(
        types.get(declared).map(|d| d.kind),
        Some(TypeKind::Reference)
    );
    if declared_is_reference && !actual_is_primitive && types.is_assignable(declared, actual) {
        return TypeCompat::ReferenceWidening;
    }
    TypeCompat::Incompatible
}

/// Score a full argument list against a declared parameter vector.
///
/// The caller supplies the effective parameter vector: for a
/// variable-arity candidate the trailing positions are `Any`.
pub fn score_vector(types: &TypeRegistry, declared: &[TypeId], args: &[Value]) -> ScoreVec {
    declared
        .iter()
        .zip(args.iter())
        .map(|(&d, a)| compat(types, d, a))
        .collect()
}

/// Whether every position is compatible.
pub fn is_applicable(scores: &[TypeCompat]) -> bool {
    scores.iter().all(|s| *s != TypeCompat::Incompatible)
}

/// Pareto order over score vectors: `a` dominates `b` iff `a` is not
/// worse in any position and strictly better in at least one.
pub fn dominates(a: &[TypeCompat], b: &[TypeCompat]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut strictly_better = false;
    for (sa, sb) in a.iter().zip(b.iter()) {
        if sa > sb {
            return false;
        }
        if sa < sb {
            strictly_better = true;
        }
    }
    strictly_better
}
