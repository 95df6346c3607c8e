//! Pairwise fact unification.
//!
//! Unifies one (possibly variableized) old fact with one concrete new fact
//! under the bindings accumulated so far, producing the generalized old
//! fact, its generalization cost and the extended bindings.

use std::collections::BTreeSet;

use crate::facts::binding_key;
use crate::predicate::{Predicate, Substitution};
use crate::term::Term;

/// Prefix of generated range-variable names.
pub(crate) const RANGE_PREFIX: char = '#';

/// Substitution state of one search branch.
///
/// `theta` maps old-side variables (a range is keyed by its variable) to
/// the new-state terms they stand for. Distinct variables may share a term,
/// the same way a fact-base query binds them.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Bindings {
    pub(crate) theta: Substitution,
    pub(crate) next_range: usize,
}

impl Bindings {
    pub(crate) fn new(next_range: usize) -> Self {
        Self {
            theta: Substitution::new(),
            next_range,
        }
    }

    /// Binds the variable of `old` to `new` unless it already stands for
    /// a different term. Always false for terms without a variable.
    pub(crate) fn bind(&mut self, old: &Term, new: &Term) -> bool {
        let Some(key) = binding_key(old) else {
            return false;
        };
        match self.theta.get(&key) {
            Some(existing) => existing == new,
            None => {
                self.theta.insert(key, new.clone());
                true
            }
        }
    }

    /// Generalizes the old term `old` so that it matches `new`.
    ///
    /// Returns `None` if the position has to become anonymous.
    pub(crate) fn unify_term(&mut self, old: &Term, new: &Term) -> Option<Term> {
        match (old, new.as_number()) {
            (Term::Anonymous, _) => Some(Term::Anonymous),
            (Term::Range { .. }, Some(value)) => {
                if self.bind(old, new) {
                    old.widen(value)
                } else {
                    None
                }
            }
            (Term::Number { value: existing }, Some(value)) if existing.total_cmp(&value).is_ne() => {
                let range = self.fresh_range(*existing, value);
                self.bind(&range, new);
                Some(range)
            }
            (Term::Variable { .. }, _) => self.bind(old, new).then(|| old.clone()),
            _ => (old == new).then(|| old.clone()),
        }
    }

    fn fresh_range(&mut self, a: f64, b: f64) -> Term {
        let name = format!("{RANGE_PREFIX}{}", self.next_range);
        self.next_range += 1;
        Term::range(name, a, b)
    }
}

/// First unused generated range index among the given terms.
pub(crate) fn next_range_index<'a>(terms: impl IntoIterator<Item = &'a Term>) -> usize {
    terms
        .into_iter()
        .filter_map(Term::variable_name)
        .filter_map(|name| name.strip_prefix(RANGE_PREFIX)?.parse::<usize>().ok())
        .map(|i| i + 1)
        .max()
        .unwrap_or(0)
}

/// Result of unifying one fact pair.
#[derive(Debug, Clone)]
pub(crate) struct FactMatch {
    pub(crate) fact: Predicate,
    pub(crate) cost: u64,
    pub(crate) bindings: Bindings,
}

/// Unifies `old` with the concrete `new` fact.
///
/// Returns `None` unless both facts share name, arity and negation.
/// Position by position: anonymous stays anonymous; numbers merge into a
/// range variable (an existing range is widened); a variable is kept if it
/// is unbound or already stands for the new term; an equal ground term is
/// kept. Anything else becomes the anonymous placeholder at cost 1, plus 1
/// if the lost term is one of `action_terms`.
pub(crate) fn unify_fact(
    old: &Predicate,
    new: &Predicate,
    bindings: &Bindings,
    action_terms: &BTreeSet<Term>,
) -> Option<FactMatch> {
    if !old.same_shape(new) {
        return None;
    }

    let mut bindings = bindings.clone();
    let mut cost = 0;
    let mut args = Vec::with_capacity(old.arity());

    for (o, n) in old.args().iter().zip(new.args()) {
        if let Some(term) = bindings.unify_term(o, n) {
            args.push(term);
        } else {
            cost += if action_terms.contains(o) { 2 } else { 1 };
            args.push(Term::Anonymous);
        }
    }

    Some(FactMatch {
        fact: old.with_args(args),
        cost,
        bindings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> Predicate {
        s.parse().unwrap()
    }

    fn unify(old: &str, new: &str) -> Option<FactMatch> {
        unify_fact(&p(old), &p(new), &Bindings::new(0), &BTreeSet::new())
    }

    #[test]
    fn shape_must_match() {
        assert!(unify("(on ?X ?Y)", "(on a)").is_none());
        assert!(unify("(on ?X ?Y)", "(above a b)").is_none());
        assert!(unify("(not (on ?X ?Y))", "(on a b)").is_none());
    }

    #[test]
    fn variables_bind_to_constants() {
        let m = unify("(on ?X ?Y)", "(on a b)").unwrap();
        assert_eq!(m.fact, p("(on ?X ?Y)"));
        assert_eq!(m.cost, 0);
        assert_eq!(m.bindings.theta.get(&Term::variable("X")), Some(&Term::constant("a")));
    }

    #[test]
    fn distinct_variables_may_share_an_object() {
        let m = unify("(near ?X ?Y)", "(near a a)").unwrap();
        assert_eq!(m.fact, p("(near ?X ?Y)"));
        assert_eq!(m.cost, 0);
    }

    #[test]
    fn repeated_variable_must_agree() {
        let m = unify("(on ?X ?X)", "(on a b)").unwrap();
        assert_eq!(m.fact, p("(on ?X ?)"));
        assert_eq!(m.cost, 1);
    }

    #[test]
    fn constant_survives_when_a_variable_takes_it() {
        let mut bindings = Bindings::new(0);
        assert!(bindings.bind(&Term::variable("X"), &Term::constant("a")));
        let m = unify_fact(&p("(block a)"), &p("(block a)"), &bindings, &BTreeSet::new()).unwrap();
        assert_eq!(m.fact, p("(block a)"));
        assert_eq!(m.cost, 0);
    }

    #[test]
    fn differing_constants_become_anonymous() {
        let m = unify("(on a b)", "(on a c)").unwrap();
        assert_eq!(m.fact, p("(on a ?)"));
        assert_eq!(m.cost, 1);
    }

    #[test]
    fn action_terms_cost_more() {
        let action_terms = BTreeSet::from([Term::variable("X")]);
        let mut bindings = Bindings::new(0);
        assert!(bindings.bind(&Term::variable("X"), &Term::constant("a")));
        let m = unify_fact(&p("(clear ?X)"), &p("(clear b)"), &bindings, &action_terms).unwrap();
        assert_eq!(m.fact, p("(clear ?)"));
        assert_eq!(m.cost, 2);
    }

    #[test]
    fn numbers_merge_into_ranges() {
        let m = unify("(height a 3)", "(height a 7)").unwrap();
        assert_eq!(m.fact.args()[1], Term::range("#0", 3.0, 7.0));
        assert_eq!(m.cost, 0);
        assert_eq!(m.bindings.next_range, 1);
        assert_eq!(m.bindings.theta.get(&Term::variable("#0")), Some(&Term::number(7.0)));

        let widened = unify_fact(&m.fact, &p("(height a 10)"), &Bindings::new(1), &BTreeSet::new()).unwrap();
        assert_eq!(widened.fact.args()[1], Term::range("#0", 3.0, 10.0));

        let narrower = unify_fact(&widened.fact, &p("(height a 5)"), &Bindings::new(1), &BTreeSet::new()).unwrap();
        assert_eq!(narrower.fact, widened.fact);
    }

    #[test]
    fn range_variable_binds_once_per_branch() {
        let old = p("(size ?#0&:(between ?#0 1 9) ?#0&:(between ?#0 1 9))");
        let m = unify_fact(&old, &p("(size 3 4)"), &Bindings::new(1), &BTreeSet::new()).unwrap();
        assert_eq!(m.fact.args()[0], Term::range("#0", 1.0, 9.0));
        assert_eq!(m.fact.args()[1], Term::Anonymous);
        assert_eq!(m.cost, 1);
    }

    #[test]
    fn equal_numbers_stay_ground() {
        let m = unify("(height a 3)", "(height a 3)").unwrap();
        assert_eq!(m.fact, p("(height a 3)"));
    }

    #[test]
    fn range_index_scan() {
        let terms = [Term::range("#4", 1.0, 2.0), Term::variable("X"), Term::variable("#x")];
        assert_eq!(next_range_index(terms.iter()), 5);
        assert_eq!(next_range_index(std::iter::empty()), 0);
    }
}
