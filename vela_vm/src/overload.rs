//! Overload selection.
//!
//! Given a candidate set of callables sharing a name, picks the best
//! match for a concrete argument list. Fixed-arity candidates are always
//! preferred over variable-arity ones regardless of type score; within a
//! group the scorer's Pareto order applies and ties break on declaration
//! order. Selection never raises an ambiguity error — determinism over
//! rejection.

use smallvec::SmallVec;
use vela_core::error::{DispatchError, DispatchResult};
use vela_core::intern::InternedString;
use vela_core::types::{TypeId, TypeRegistry};
use vela_core::value::{FunctionRef, Value};

use crate::typematch::{dominates, is_applicable, score_vector, ScoreVec};

// =============================================================================
// Candidates
// =============================================================================

/// Where a candidate was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Provenance {
    /// Declared in the calling module.
    LocalDefinition,
    /// Declared in an imported module.
    Import(InternedString),
    /// Contributed by an extension-method provider.
    Augmentation(InternedString),
    /// Declared method of the receiver's type.
    DeclaredMethod(TypeId),
    /// Dynamic-property fallback of a property-bag receiver.
    DynamicProperty,
    /// Constructor of a reference type.
    Constructor(TypeId),
}

/// A callable found by a resolver.
///
/// Ephemeral: constructed per resolution attempt; only the final chosen
/// target is ever cached.
#[derive(Debug, Clone)]
pub struct Candidate {
    /// The invocable reference.
    pub target: FunctionRef,
    /// Where it came from.
    pub provenance: Provenance,
}

impl Candidate {
    /// Build a candidate.
    pub fn new(target: FunctionRef, provenance: Provenance) -> Self {
        Self { target, provenance }
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
}

// =============================================================================
// Selection
// =============================================================================

/// Outcome of overload selection.
#[derive(Debug, Clone)]
pub struct Selection {
    /// The winning candidate.
    pub candidate: Candidate,
    /// More than one same-name candidate accepted this call's arity, so
    /// a different argument type mix could select a different target;
    /// the installed guard must then test the full argument type vector.
    pub overloaded: bool,
}

/// Select the best candidate for the given argument list.
///
/// Candidates must be supplied in declaration order; the order is the
/// deterministic tie-break.
pub fn select(
    types: &TypeRegistry,
    name: InternedString,
    args: &[Value],
    candidates: &[Candidate],
) -> DispatchResult<Selection> {
    let fixed = applicable_in_group(types, args, candidates, false);
    let varargs = applicable_in_group(types, args, candidates, true);
    let overloaded = candidates
        .iter()
        .filter(|c| accepts_arity(c, args.len()))
        .count()
        > 1;

    // Fixed-arity candidates win over varargs ones regardless of score.
    let group = if !fixed.is_empty() { fixed } else { varargs };
    if group.is_empty() {
        return Err(DispatchError::NoApplicableOverload {
            name,
            arity: args.len(),
        });
    }

    let best = pareto_first(&group);
    Ok(Selection {
        candidate: candidates[best].clone(),
        overloaded,
    })
}

/// Whether a call with `arity` arguments can bind to the candidate.
fn accepts_arity(candidate: &Candidate, arity: usize) -> bool {
    if candidate.is_varargs() {
        arity + 1 >= candidate.arity()
    } else {
        arity == candidate.arity()
    }
}

/// Applicable candidates of one arity group, with their score vectors,
/// in declaration order.
fn applicable_in_group(
    types: &TypeRegistry,
    args: &[Value],
    candidates: &[Candidate],
    varargs: bool,
) -> Vec<(usize, ScoreVec)> {
    let mut applicable = Vec::new();
    for (index, candidate) in candidates.iter().enumerate() {
        if candidate.is_varargs() != varargs {
            continue;
        }
        let params = candidate.target.param_types();
        let effective: SmallVec<[TypeId; 8]> = if varargs {
            if params.is_empty() {
                continue;
            }
            // The call must supply at least the non-collector prefix.
            let collector_at = params.len() - 1;
            if args.len() < collector_at {
                continue;
            }
            params[..collector_at]
                .iter()
                .copied()
                .chain(std::iter::repeat(TypeId::ANY))
                .take(args.len())
                .collect()
        } else {
            if params.len() != args.len() {
                continue;
            }
            SmallVec::from_slice(params)
        };
        let scores = score_vector(types, &effective, args);
        if is_applicable(&scores) {
            applicable.push((index, scores));
        }
    }
    applicable
}

/// Index of the first Pareto-maximal entry, in declaration order.
fn pareto_first(group: &[(usize, ScoreVec)]) -> usize {
    for (index, scores) in group {
        let dominated = group
            .iter()
            .any(|(other, other_scores)| other != index && dominates(other_scores, scores));
        if !dominated {
            return *index;
        }
    }
    // Every entry dominated by another cannot happen (dominance is a
    // strict partial order); fall back to declaration order.
    group[0].0
}
