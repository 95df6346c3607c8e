//! Minimum-cost assignment search.
//!
//! A locally greedy pairing of old facts to new facts can block a cheaper
//! global match, so every unifiable candidate of each old fact is explored.
//! The search is a depth-first walk over an explicit choice-point stack.
//! Each branch owns its bindings, so sibling branches never alias, and a
//! branch is pruned as soon as its cost reaches the best complete cost.

use std::collections::BTreeSet;

use crate::predicate::Predicate;
use crate::term::Term;

use super::fact::{unify_fact, Bindings};

/// One choice point: the first `depth` old facts have been decided.
#[derive(Debug, Clone)]
struct Branch {
    depth: usize,
    bindings: Bindings,
    kept: Vec<Predicate>,
    cost: u64,
}

/// Outcome of the search.
#[derive(Debug, Clone)]
pub(crate) struct Assignment {
    pub(crate) facts: BTreeSet<Predicate>,
    pub(crate) bindings: Bindings,
    pub(crate) cost: u64,
    pub(crate) explored: usize,
}

/// Search limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SearchLimits {
    pub(crate) drop_penalty: u64,
    pub(crate) max_branches: usize,
}

/// Finds the cheapest generalization of `old` that holds in `new`.
///
/// Old facts are decided in the given order. For each, candidates are the
/// unifiable new facts in their given order, stably sorted by local cost
/// with duplicate results removed. An old fact without candidates is
/// dropped at `drop_penalty`. Among equal-cost complete assignments the
/// first one reached wins. Once `max_branches` choice points have been
/// expanded the search stops at the best assignment found so far.
pub(crate) fn search(
    old: &[&Predicate],
    new: &[&Predicate],
    seed: Bindings,
    action_terms: &BTreeSet<Term>,
    limits: SearchLimits,
) -> Assignment {
    let mut stack = vec![Branch {
        depth: 0,
        bindings: seed,
        kept: Vec::with_capacity(old.len()),
        cost: 0,
    }];
    let mut best: Option<Branch> = None;
    let mut explored = 0usize;

    while let Some(branch) = stack.pop() {
        if best.as_ref().is_some_and(|b| branch.cost >= b.cost) {
            continue;
        }
        let Some(current) = old.get(branch.depth) else {
            best = Some(branch);
            continue;
        };
        if explored >= limits.max_branches && best.is_some() {
            break;
        }
        explored += 1;

        let mut candidates: Vec<(Predicate, u64, Bindings)> = Vec::new();
        for fact in new {
            let Some(m) = unify_fact(current, fact, &branch.bindings, action_terms) else {
                continue;
            };
            let duplicate = candidates
                .iter()
                .any(|(f, _, b)| *f == m.fact && b.theta == m.bindings.theta);
            if !duplicate {
                candidates.push((m.fact, m.cost, m.bindings));
            }
        }
        candidates.sort_by_key(|(_, cost, _)| *cost);

        if candidates.is_empty() {
            stack.push(Branch {
                depth: branch.depth + 1,
                cost: branch.cost.saturating_add(limits.drop_penalty),
                ..branch
            });
            continue;
        }

        // Reverse so the cheapest candidate is popped first.
        for (fact, cost, bindings) in candidates.into_iter().rev() {
            let mut kept = branch.kept.clone();
            kept.push(fact);
            stack.push(Branch {
                depth: branch.depth + 1,
                bindings,
                kept,
                cost: branch.cost.saturating_add(cost),
            });
        }
    }

    // The first path down the stack always completes before the branch
    // budget can stop the loop, so `best` is set whenever `old` is non-empty.
    let branch = best.unwrap_or(Branch {
        depth: old.len(),
        bindings: Bindings::new(0),
        kept: Vec::new(),
        cost: 0,
    });
    Assignment {
        facts: branch.kept.into_iter().collect(),
        bindings: branch.bindings,
        cost: branch.cost,
        explored,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIMITS: SearchLimits = SearchLimits {
        drop_penalty: 1000,
        max_branches: 10_000,
    };

    fn facts(s: &str) -> Vec<Predicate> {
        crate::predicate::parse_predicates(s).unwrap().into_iter().collect()
    }

    fn run(old: &str, new: &str) -> Assignment {
        let old = facts(old);
        let new = facts(new);
        let old: Vec<&Predicate> = old.iter().collect();
        let new: Vec<&Predicate> = new.iter().collect();
        search(&old, &new, Bindings::new(0), &BTreeSet::new(), LIMITS)
    }

    #[test]
    fn backtracks_past_greedy_choice() {
        // Greedy would bind (clear ?X) to (clear a), which then breaks (on ?X b).
        let result = run("(clear ?X) (on ?X b)", "(clear a) (clear c) (on c b)");
        assert_eq!(result.cost, 0);
        assert_eq!(result.facts, facts("(clear ?X) (on ?X b)").into_iter().collect());
        assert_eq!(
            result.bindings.theta.get(&Term::variable("X")),
            Some(&Term::constant("c"))
        );
    }

    #[test]
    fn unmatched_fact_is_dropped_with_penalty() {
        let result = run("(clear ?X) (above ?X ?Y)", "(clear a)");
        assert_eq!(result.cost, 1000);
        assert_eq!(result.facts.len(), 1);
    }

    #[test]
    fn drop_penalty_saturates() {
        let old = facts("(clear ?X) (above ?X ?Y) (near ?X)");
        let new = facts("(on a b)");
        let old: Vec<&Predicate> = old.iter().collect();
        let new: Vec<&Predicate> = new.iter().collect();
        let limits = SearchLimits {
            drop_penalty: u64::MAX,
            max_branches: 10_000,
        };
        let result = search(&old, &new, Bindings::new(0), &BTreeSet::new(), limits);
        assert!(result.facts.is_empty());
        assert_eq!(result.cost, u64::MAX);
    }

    #[test]
    fn prefers_general_match_over_drop() {
        let result = run("(on a b)", "(on c d)");
        assert_eq!(result.cost, 2);
        assert_eq!(result.facts, facts("(on ? ?)").into_iter().collect());
    }

    #[test]
    fn empty_old_set() {
        let result = run("", "(on a b)");
        assert!(result.facts.is_empty());
        assert_eq!(result.cost, 0);
    }

    #[test]
    fn branch_budget_still_returns_an_assignment() {
        let old = facts("(clear ?X) (clear ?Y) (clear ?Z)");
        let new = facts("(clear a) (clear b) (clear c) (clear d)");
        let old: Vec<&Predicate> = old.iter().collect();
        let new: Vec<&Predicate> = new.iter().collect();
        let limits = SearchLimits {
            drop_penalty: 1000,
            max_branches: 1,
        };
        let result = search(&old, &new, Bindings::new(0), &BTreeSet::new(), limits);
        assert_eq!(result.facts.len(), 3);
    }
}
