//! In-memory fact base.
//!
//! Thread-safe reference implementation of [`FactBase`], indexed by
//! predicate name.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::RwLock;

use crate::error::FactBaseError;
use crate::facts::FactBase;
use crate::predicate::{Predicate, Substitution};
use crate::term::Term;

fn lock_err(context: &'static str) -> FactBaseError {
    FactBaseError::Backend(format!("poisoned lock: {context}"))
}

/// Fact base held in memory.
#[derive(Debug, Default)]
pub struct InMemoryFactBase {
    by_name: RwLock<BTreeMap<String, BTreeSet<Predicate>>>,
}

impl InMemoryFactBase {
    /// Creates an empty fact base.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a fact base holding `facts`.
    ///
    /// # Errors
    ///
    /// Returns an error if any fact is negated or not ground.
    pub fn from_facts(facts: impl IntoIterator<Item = Predicate>) -> Result<Self, FactBaseError> {
        let base = Self::new();
        for fact in facts {
            base.assert_fact(fact)?;
        }
        Ok(base)
    }

    /// Number of stored facts.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn len(&self) -> Result<usize, FactBaseError> {
        let state = self.by_name.read().map_err(|_| lock_err("facts.len"))?;
        Ok(state.values().map(BTreeSet::len).sum())
    }

    /// True if no fact is stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn is_empty(&self) -> Result<bool, FactBaseError> {
        Ok(self.len()? == 0)
    }

    /// Removes every fact.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn clear(&self) -> Result<(), FactBaseError> {
        self.by_name.write().map_err(|_| lock_err("facts.clear"))?.clear();
        Ok(())
    }
}

/// Key under which a pattern variable is bound.
pub(crate) fn binding_key(term: &Term) -> Option<Term> {
    match term {
        Term::Variable { .. } => Some(term.clone()),
        Term::Range { variable, .. } => Some(Term::variable(variable.as_str())),
        _ => None,
    }
}

/// Extends `sub` so that `pattern` (ignoring negation) matches `fact`.
pub(crate) fn match_fact(pattern: &Predicate, fact: &Predicate, sub: &Substitution) -> Option<Substitution> {
    if pattern.name() != fact.name() || pattern.arity() != fact.arity() {
        return None;
    }
    let mut sub = sub.clone();
    for (p, f) in pattern.args().iter().zip(fact.args()) {
        if p.is_range() && !f.as_number().is_some_and(|v| p.covers(v)) {
            return None;
        }
        match binding_key(p) {
            Some(key) => match sub.get(&key) {
                Some(bound) if bound == f => {}
                Some(_) => return None,
                None => {
                    sub.insert(key, f.clone());
                }
            },
            None if p.is_anonymous() || p == f => {}
            None => return None,
        }
    }
    Some(sub)
}

impl FactBase for InMemoryFactBase {
    fn query(&self, pattern: &[Predicate]) -> Result<Vec<Substitution>, FactBaseError> {
        let state = self.by_name.read().map_err(|_| lock_err("facts.query"))?;
        let empty = BTreeSet::new();

        // Negated patterns are tested once their variables had a chance to bind.
        let ordered: Vec<&Predicate> = pattern
            .iter()
            .filter(|p| !p.is_negated())
            .chain(pattern.iter().filter(|p| p.is_negated()))
            .collect();

        let mut results = Vec::new();
        let mut seen = BTreeSet::new();
        let mut stack = vec![(0usize, Substitution::new())];
        while let Some((depth, sub)) = stack.pop() {
            let Some(current) = ordered.get(depth) else {
                if seen.insert(sub.clone()) {
                    results.push(sub);
                }
                continue;
            };
            let candidates = state.get(current.name()).unwrap_or(&empty);
            if current.is_negated() {
                if !candidates.iter().any(|f| match_fact(current, f, &sub).is_some()) {
                    stack.push((depth + 1, sub));
                }
                continue;
            }
            // Reverse so results come out in fact order.
            for fact in candidates.iter().rev() {
                if let Some(extended) = match_fact(current, fact, &sub) {
                    stack.push((depth + 1, extended));
                }
            }
        }
        Ok(results)
    }

    fn assert_fact(&self, fact: Predicate) -> Result<bool, FactBaseError> {
        if fact.is_negated() {
            return Err(FactBaseError::NegatedFact {
                fact: fact.to_string(),
            });
        }
        if !fact.is_ground() {
            return Err(FactBaseError::NonGroundFact {
                fact: fact.to_string(),
            });
        }
        let mut state = self.by_name.write().map_err(|_| lock_err("facts.assert"))?;
        Ok(state.entry(fact.name().to_string()).or_default().insert(fact))
    }

    fn retract_fact(&self, fact: &Predicate) -> Result<bool, FactBaseError> {
        let mut state = self.by_name.write().map_err(|_| lock_err("facts.retract"))?;
        let Some(facts) = state.get_mut(fact.name()) else {
            return Ok(false);
        };
        let removed = facts.remove(fact);
        if facts.is_empty() {
            state.remove(fact.name());
        }
        Ok(removed)
    }

    fn facts(&self) -> Result<BTreeSet<Predicate>, FactBaseError> {
        let state = self.by_name.read().map_err(|_| lock_err("facts.snapshot"))?;
        Ok(state.values().flatten().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predicate::parse_predicates;

    fn base(s: &str) -> InMemoryFactBase {
        InMemoryFactBase::from_facts(parse_predicates(s).unwrap()).unwrap()
    }

    fn pattern(s: &str) -> Vec<Predicate> {
        parse_predicates(s).unwrap().into_iter().collect()
    }

    fn bound(sub: &Substitution, var: &str) -> String {
        sub[&Term::variable(var)].to_string()
    }

    #[test]
    fn conjunctive_query_binds_variables() {
        let facts = base("(on a b) (on b c) (clear a) (clear d)");
        let results = facts.query(&pattern("(clear ?X) (on ?X ?Y)")).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(bound(&results[0], "X"), "a");
        assert_eq!(bound(&results[0], "Y"), "b");
    }

    #[test]
    fn negation_as_failure() {
        let facts = base("(on a b) (clear a) (clear d)");
        let results = facts.query(&pattern("(clear ?X) (not (on ?X ?))")).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(bound(&results[0], "X"), "d");
    }

    #[test]
    fn ranges_bind_covered_numbers() {
        let facts = base("(height a 2) (height b 5) (height c 9)");
        let results = facts
            .query(&pattern("(height ?X ?H&:(between ?H 3 9))"))
            .unwrap();
        let found: Vec<String> = results.iter().map(|s| bound(s, "X")).collect();
        assert_eq!(found, vec!["b", "c"]);
        assert_eq!(bound(&results[0], "H"), "5");
    }

    #[test]
    fn anonymous_is_not_bound() {
        let facts = base("(on a b) (on c b)");
        let results = facts.query(&pattern("(on ? b)")).unwrap();
        assert_eq!(results, vec![Substitution::new()]);
        assert!(facts.holds(&pattern("(on ? b)")).unwrap());
        assert!(!facts.holds(&pattern("(on b ?)")).unwrap());
    }

    #[test]
    fn rejects_invalid_facts() {
        let facts = InMemoryFactBase::new();
        let err = facts.assert_fact("(on ?X b)".parse().unwrap()).unwrap_err();
        assert!(matches!(err, FactBaseError::NonGroundFact { .. }));
        let err = facts.assert_fact("(not (on a b))".parse().unwrap()).unwrap_err();
        assert!(matches!(err, FactBaseError::NegatedFact { .. }));
    }

    #[test]
    fn assert_and_retract() {
        let facts = InMemoryFactBase::new();
        let fact: Predicate = "(clear a)".parse().unwrap();
        assert!(facts.assert_fact(fact.clone()).unwrap());
        assert!(!facts.assert_fact(fact.clone()).unwrap());
        assert_eq!(facts.len().unwrap(), 1);
        assert!(facts.retract_fact(&fact).unwrap());
        assert!(!facts.retract_fact(&fact).unwrap());
        assert!(facts.is_empty().unwrap());
    }

    #[test]
    fn snapshot_lists_all_facts() {
        let facts = base("(on a b) (clear a)");
        assert_eq!(facts.facts().unwrap(), parse_predicates("(on a b) (clear a)").unwrap());
    }
}
