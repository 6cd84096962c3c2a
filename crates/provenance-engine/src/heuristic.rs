//! Structural matching of objects across branches
//!
//! When two branches each delete an object and add a near-copy of it, the
//! diff would report an unrelated delete and add. These comparators pair
//! such objects up again. Matching is greedy and first-found: every
//! comparator walks candidates in order and takes the first acceptable one,
//! which keeps results deterministic but not globally optimal.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::ids::ObjectId;
use crate::types::{Connection, Function, Module, Parameter, Port};

/// Tri-state outcome of a structural comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchScore {
    /// Structurally identical
    Exact,
    /// Same identity (name, type, position) with different contents
    Partial,
    /// Unrelated
    Mismatch,
}

impl MatchScore {
    /// Numeric form: `1` exact, `0` partial, `-1` mismatch
    pub fn as_i8(self) -> i8 {
        match self {
            MatchScore::Exact => 1,
            MatchScore::Partial => 0,
            MatchScore::Mismatch => -1,
        }
    }

    pub fn is_match(self) -> bool {
        self != MatchScore::Mismatch
    }

    /// The weaker of two scores
    pub fn min(self, other: MatchScore) -> MatchScore {
        if self.as_i8() <= other.as_i8() {
            self
        } else {
            other
        }
    }
}

pub fn heuristic_parameter_match(p1: &Parameter, p2: &Parameter) -> MatchScore {
    if p1.type_name != p2.type_name || p1.pos != p2.pos {
        MatchScore::Mismatch
    } else if p1.val == p2.val {
        MatchScore::Exact
    } else {
        MatchScore::Partial
    }
}

/// Compare two functions: same name, then parameters paired exactly with
/// multiplicity
pub fn heuristic_function_match(f1: &Function, f2: &Function) -> MatchScore {
    if f1.name != f2.name {
        return MatchScore::Mismatch;
    }
    let paired = greedy_exact_pairs(&f1.parameters, &f2.parameters, heuristic_parameter_match);
    if paired == f1.parameters.len() && paired == f2.parameters.len() {
        MatchScore::Exact
    } else {
        MatchScore::Partial
    }
}

/// Compare two modules: same name, then functions paired exactly with
/// multiplicity
pub fn heuristic_module_match(m1: &Module, m2: &Module) -> MatchScore {
    if m1.name != m2.name {
        return MatchScore::Mismatch;
    }
    if m1.functions.len() != m2.functions.len() {
        return MatchScore::Partial;
    }
    let paired = greedy_exact_pairs(&m1.functions, &m2.functions, heuristic_function_match);
    if paired == m1.functions.len() {
        MatchScore::Exact
    } else {
        MatchScore::Partial
    }
}

/// Compare two connection ends
///
/// `module_pairs` maps v1 module ids to the v2 modules they were paired with,
/// so a port on a re-matched module still counts as the same endpoint.
pub fn heuristic_port_match(p1: &Port, p2: &Port, module_pairs: &HashMap<ObjectId, ObjectId>) -> MatchScore {
    if p1.role != p2.role || p1.name != p2.name {
        return MatchScore::Mismatch;
    }
    let same_module = p1.module_id == p2.module_id
        || module_pairs.get(&p1.module_id) == Some(&p2.module_id);
    if same_module {
        MatchScore::Exact
    } else if p1.module_name == p2.module_name && p1.spec == p2.spec {
        MatchScore::Partial
    } else {
        MatchScore::Mismatch
    }
}

/// Compare two connections end by end; the weaker end decides
pub fn heuristic_connection_match(
    c1: &Connection,
    c2: &Connection,
    module_pairs: &HashMap<ObjectId, ObjectId>,
) -> MatchScore {
    if c1.ports.len() != c2.ports.len() {
        return MatchScore::Mismatch;
    }
    c1.ports
        .iter()
        .map(|p1| {
            c2.port(p1.role)
                .map(|p2| heuristic_port_match(p1, p2, module_pairs))
                .unwrap_or(MatchScore::Mismatch)
        })
        .fold(MatchScore::Exact, MatchScore::min)
}

/// Pick the first exact candidate, else the first partial one
pub fn best_candidate<'a, T, I>(candidates: I, score: impl Fn(&T) -> MatchScore) -> Option<(&'a T, MatchScore)>
where
    I: IntoIterator<Item = &'a T>,
    T: 'a,
{
    let mut partial = None;
    for candidate in candidates {
        match score(candidate) {
            MatchScore::Exact => return Some((candidate, MatchScore::Exact)),
            MatchScore::Partial if partial.is_none() => partial = Some(candidate),
            _ => {}
        }
    }
    partial.map(|c| (c, MatchScore::Partial))
}

fn greedy_exact_pairs<T>(left: &[T], right: &[T], score: impl Fn(&T, &T) -> MatchScore) -> usize {
    let mut used = vec![false; right.len()];
    let mut paired = 0;
    for item in left {
        let found = right
            .iter()
            .enumerate()
            .find(|(i, other)| !used[*i] && score(item, other) == MatchScore::Exact);
        if let Some((i, _)) = found {
            used[i] = true;
            paired += 1;
        }
    }
    paired
}
