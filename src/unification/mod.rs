//! Generalizing unification.
//!
//! Given an *old* fact set (which may contain variables, range variables and
//! anonymous placeholders) and a *new*, fully concrete fact set, the
//! [`Unifier`] computes the most specific generalization of the old set that
//! still holds in the new set, together with the bindings of its variables
//! to new-state terms. Variables bind the way a fact-base query binds them:
//! distinct variables may stand for the same object.
//!
//! Optional aligned term lists (typically the action arguments of a rule and
//! of an observed action) seed the substitution so that both sides agree on
//! what the action is applied to.

mod fact;
mod search;

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::facts::binding_key;
use crate::predicate::{Predicate, Substitution};
use crate::rule::Rule;
use crate::term::Term;

use fact::{next_range_index, Bindings, RANGE_PREFIX};
use search::{search, SearchLimits};

/// Default cost of dropping an old fact that has no unifiable partner.
pub const DEFAULT_DROP_PENALTY: u64 = 1000;

/// Default bound on expanded choice points.
pub const DEFAULT_MAX_BRANCHES: usize = 100_000;

/// Outcome class of a unification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnificationVerdict {
    /// The old set already covers the new set exactly.
    Unchanged,
    /// The old set was generalized and is still non-empty.
    Generalized,
    /// No fact of the old set survived.
    Failed,
}

impl fmt::Display for UnificationVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unchanged => write!(f, "unchanged"),
            Self::Generalized => write!(f, "generalized"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Result of a unification.
#[derive(Debug, Clone, PartialEq)]
pub struct UnificationOutcome {
    /// Outcome class.
    pub verdict: UnificationVerdict,
    /// Generalized old fact set.
    pub facts: BTreeSet<Predicate>,
    /// Mapping from new-state terms to the old-side variables standing for
    /// them, including generated range variables. A term bound by several
    /// variables maps to the first in variable order.
    pub substitution: Substitution,
    /// Old-side variable bindings. Range variables are keyed by name.
    pub bindings: Substitution,
    /// Old aligned terms after generalization.
    pub old_terms: Vec<Term>,
    /// New aligned terms rewritten through the substitution.
    pub new_terms: Vec<Term>,
    /// Total generalization cost of the chosen assignment.
    pub cost: u64,
}

impl UnificationOutcome {
    /// True unless the verdict is `Failed`.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        !matches!(self.verdict, UnificationVerdict::Failed)
    }
}

/// The generalizing unification engine.
///
/// # Examples
///
/// ```
/// use cerrla::{parse_predicates, Term, Unifier, UnificationVerdict};
///
/// let old = parse_predicates("(on ?X ?Y)").unwrap();
/// let new = parse_predicates("(on a b)").unwrap();
/// let outcome = Unifier::new().unify(&old, &new);
/// assert_eq!(outcome.verdict, UnificationVerdict::Unchanged);
/// assert_eq!(outcome.substitution[&Term::constant("a")], Term::variable("X"));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unifier {
    limits: SearchLimits,
}

impl Default for Unifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Unifier {
    /// Creates a unifier with the default drop penalty and branch budget.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            limits: SearchLimits {
                drop_penalty: DEFAULT_DROP_PENALTY,
                max_branches: DEFAULT_MAX_BRANCHES,
            },
        }
    }

    /// Sets the cost of dropping an unmatched old fact.
    #[must_use]
    pub const fn with_drop_penalty(mut self, penalty: u64) -> Self {
        self.limits.drop_penalty = penalty;
        self
    }

    /// Sets the bound on expanded choice points.
    #[must_use]
    pub const fn with_max_branches(mut self, max_branches: usize) -> Self {
        self.limits.max_branches = max_branches;
        self
    }

    /// Unifies without term alignment.
    #[must_use]
    pub fn unify(&self, old: &BTreeSet<Predicate>, new: &BTreeSet<Predicate>) -> UnificationOutcome {
        self.unify_seeded(old, new, &[], &[])
    }

    /// Unifies with paired term-alignment lists.
    ///
    /// Each `(old_terms[i], new_terms[i])` pair is bound before any fact is
    /// considered. A pair that cannot be bound (a constant against a
    /// different constant, or a variable already bound to another term)
    /// turns the old term into the anonymous placeholder; a numeric pair
    /// against a range widens it.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::AlignmentMismatch` if the lists differ in length.
    pub fn unify_aligned(
        &self,
        old: &BTreeSet<Predicate>,
        new: &BTreeSet<Predicate>,
        old_terms: &[Term],
        new_terms: &[Term],
    ) -> Result<UnificationOutcome, ValidationError> {
        if old_terms.len() != new_terms.len() {
            return Err(ValidationError::AlignmentMismatch {
                old: old_terms.len(),
                new: new_terms.len(),
            });
        }
        Ok(self.unify_seeded(old, new, old_terms, new_terms))
    }

    /// Folds an observed state and action into `rule`.
    ///
    /// The rule's conditions are unified with `state`, aligned on the action
    /// arguments. Returns the verdict and, unless unification failed, the
    /// generalized rule (provenance is preserved).
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::AlignmentMismatch` if the action arities differ.
    pub fn generalize_rule(
        &self,
        rule: &Rule,
        state: &BTreeSet<Predicate>,
        action: &Predicate,
    ) -> Result<(UnificationVerdict, Option<Rule>), ValidationError> {
        let outcome = self.unify_aligned(rule.conditions(), state, rule.action_terms(), action.args())?;
        if !outcome.is_success() {
            return Ok((outcome.verdict, None));
        }
        let head = rule.action().with_args(outcome.old_terms);
        let generalized = Rule::new(outcome.facts, head);
        let generalized = match rule.parent() {
            Some(parent) => generalized.with_parent(parent),
            None => generalized,
        };
        Ok((outcome.verdict, Some(generalized)))
    }

    fn unify_seeded(
        &self,
        old: &BTreeSet<Predicate>,
        new: &BTreeSet<Predicate>,
        old_terms: &[Term],
        new_terms: &[Term],
    ) -> UnificationOutcome {
        let next_range = next_range_index(
            old.iter()
                .flat_map(|p| p.args().iter())
                .chain(old_terms.iter()),
        );
        let mut bindings = Bindings::new(next_range);
        let action_terms: BTreeSet<Term> = old_terms.iter().filter(|t| t.is_variable()).cloned().collect();

        let mut seed_cost = 0u64;
        let mut aligned_old = Vec::with_capacity(old_terms.len());
        for (o, n) in old_terms.iter().zip(new_terms) {
            let aligned = bindings.unify_term(o, n).unwrap_or_else(|| {
                seed_cost += 2;
                Term::Anonymous
            });
            aligned_old.push(aligned);
        }

        let old_facts: Vec<&Predicate> = old.iter().collect();
        let new_facts: Vec<&Predicate> = new.iter().collect();
        let assignment = search(&old_facts, &new_facts, bindings, &action_terms, self.limits);

        let verdict = if old.is_empty() {
            UnificationVerdict::Unchanged
        } else if assignment.facts.is_empty() {
            UnificationVerdict::Failed
        } else if assignment.facts == *old && aligned_old == old_terms {
            UnificationVerdict::Unchanged
        } else {
            UnificationVerdict::Generalized
        };

        let theta = assignment.bindings.theta;
        let mut substitution = Substitution::new();
        for (variable, term) in &theta {
            substitution.entry(term.clone()).or_insert_with(|| variable.clone());
        }

        let new_terms_out = new_terms
            .iter()
            .zip(&aligned_old)
            .map(|(n, o)| {
                let aligned_binding = binding_key(o).and_then(|key| theta.get(&key));
                if aligned_binding == Some(n) {
                    o.clone()
                } else {
                    substitution.get(n).cloned().unwrap_or_else(|| o.clone())
                }
            })
            .collect();

        let cost = assignment.cost.saturating_add(seed_cost);
        tracing::debug!(
            %verdict,
            cost,
            explored = assignment.explored,
            old = old.len(),
            new = new.len(),
            kept = assignment.facts.len(),
            "unification finished"
        );

        UnificationOutcome {
            verdict,
            facts: assignment.facts,
            substitution,
            bindings: theta,
            old_terms: aligned_old,
            new_terms: new_terms_out,
            cost,
        }
    }
}

/// True if `name` is a variable name generated for a merged numeric range.
#[must_use]
pub fn is_generated_range_variable(name: &str) -> bool {
    name.strip_prefix(RANGE_PREFIX)
        .is_some_and(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()))
}
