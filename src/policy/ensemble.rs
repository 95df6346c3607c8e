//! Ensemble voting.
//!
//! Several independently sampled policies evaluate one immutable state
//! snapshot. Their proposals are combined by plurality vote per decision
//! slot (the n-th proposal of every policy votes for the n-th decision).
//! Ties are kept; choosing among tied actions is left to the caller.

use std::collections::{BTreeMap, BTreeSet};
use std::thread;

use crate::error::FactBaseError;
use crate::facts::FactBase;
use crate::policy::{Policy, ProposedActions};
use crate::predicate::Predicate;

/// Result of the vote for one decision slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteOutcome {
    /// Actions with the most votes, in canonical order.
    pub winners: Vec<Predicate>,
    /// Votes each winner received.
    pub votes: usize,
    /// Votes per action.
    pub tally: BTreeMap<Predicate, usize>,
}

impl VoteOutcome {
    /// True if more than one action shares the plurality.
    #[must_use]
    pub fn is_tie(&self) -> bool {
        self.winners.len() > 1
    }
}

/// A set of policies voting on the same state.
#[derive(Debug, Clone, Default)]
pub struct PolicyEnsemble {
    policies: Vec<Policy>,
}

impl PolicyEnsemble {
    /// Creates an ensemble.
    #[must_use]
    pub fn new(policies: impl IntoIterator<Item = Policy>) -> Self {
        Self {
            policies: policies.into_iter().collect(),
        }
    }

    /// Member policies.
    #[must_use]
    pub fn policies(&self) -> &[Policy] {
        &self.policies
    }

    /// Adds a member.
    pub fn push(&mut self, policy: Policy) {
        self.policies.push(policy);
    }

    /// Number of members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.policies.len()
    }

    /// True if the ensemble has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    /// Evaluates every member in turn and votes.
    ///
    /// A member whose evaluation fails abstains.
    ///
    /// # Errors
    ///
    /// Returns the first error if every member failed.
    pub fn vote<F: FactBase + ?Sized>(
        &mut self,
        facts: &F,
        legal: Option<&BTreeSet<Predicate>>,
        quota: usize,
    ) -> Result<Vec<VoteOutcome>, FactBaseError> {
        let results: Vec<_> = self
            .policies
            .iter_mut()
            .map(|policy| policy.evaluate(facts, legal, quota))
            .collect();
        tally(results, quota)
    }

    /// Like [`PolicyEnsemble::vote`], evaluating members on scoped threads.
    ///
    /// Members share nothing mutable, so the outcome equals the sequential vote.
    ///
    /// # Errors
    ///
    /// Returns the first error if every member failed.
    pub fn vote_parallel<F: FactBase + ?Sized>(
        &mut self,
        facts: &F,
        legal: Option<&BTreeSet<Predicate>>,
        quota: usize,
    ) -> Result<Vec<VoteOutcome>, FactBaseError> {
        let results: Vec<Result<ProposedActions, FactBaseError>> = thread::scope(|scope| {
            let handles: Vec<_> = self
                .policies
                .iter_mut()
                .enumerate()
                .map(|(i, policy)| {
                    thread::Builder::new()
                        .name(format!("cerrla-vote-{i}"))
                        .spawn_scoped(scope, move || policy.evaluate(facts, legal, quota))
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| match handle {
                    Ok(handle) => handle.join().unwrap_or_else(|_| {
                        Err(FactBaseError::Backend("policy evaluation panicked".to_string()))
                    }),
                    Err(err) => Err(FactBaseError::Backend(format!("failed to spawn voter: {err}"))),
                })
                .collect()
        });
        tally(results, quota)
    }
}

fn tally(
    results: Vec<Result<ProposedActions, FactBaseError>>,
    quota: usize,
) -> Result<Vec<VoteOutcome>, FactBaseError> {
    let mut first_error = None;
    let mut proposals = Vec::with_capacity(results.len());
    for result in results {
        match result {
            Ok(proposed) => proposals.push(proposed),
            Err(err) => {
                tracing::warn!(error = %err, "ensemble member abstains");
                first_error.get_or_insert(err);
            }
        }
    }
    if proposals.is_empty() {
        if let Some(err) = first_error {
            return Err(err);
        }
    }

    let decisions = proposals.iter().map(ProposedActions::len).max().unwrap_or(0).min(quota);
    let mut outcomes = Vec::with_capacity(decisions);
    for index in 0..decisions {
        let mut tally: BTreeMap<Predicate, usize> = BTreeMap::new();
        for proposed in &proposals {
            if let Some(action) = proposed.get(index) {
                *tally.entry(action.clone()).or_insert(0) += 1;
            }
        }
        let votes = tally.values().copied().max().unwrap_or(0);
        let winners = tally
            .iter()
            .filter(|(_, &n)| n == votes)
            .map(|(action, _)| action.clone())
            .collect();
        outcomes.push(VoteOutcome { winners, votes, tally });
    }
    tracing::debug!(members = proposals.len(), decisions, "ensemble vote finished");
    Ok(outcomes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facts::InMemoryFactBase;
    use crate::predicate::parse_predicates;
    use crate::rule::Rule;

    fn member(rules: &[&str]) -> Policy {
        let mut policy = Policy::new();
        for r in rules {
            policy.push(r.parse::<Rule>().unwrap(), None);
        }
        policy.set_frozen(true);
        policy
    }

    fn state() -> InMemoryFactBase {
        InMemoryFactBase::from_facts(parse_predicates("(clear a) (clear b) (on a c) (on b d)").unwrap())
            .unwrap()
    }

    fn ensemble() -> PolicyEnsemble {
        PolicyEnsemble::new([
            member(&["(clear ?A) (on ?A c) => (pickup ?A)"]),
            member(&["(clear ?A) (on ?A c) => (pickup ?A)"]),
            member(&["(clear ?A) (on ?A d) => (pickup ?A)"]),
        ])
    }

    #[test]
    fn plurality_wins() {
        let outcomes = ensemble().vote(&state(), None, 1).unwrap();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].winners, vec!["(pickup a)".parse::<Predicate>().unwrap()]);
        assert_eq!(outcomes[0].votes, 2);
        assert!(!outcomes[0].is_tie());
    }

    #[test]
    fn ties_are_preserved() {
        let mut ensemble = PolicyEnsemble::new([
            member(&["(clear ?A) (on ?A c) => (pickup ?A)"]),
            member(&["(clear ?A) (on ?A d) => (pickup ?A)"]),
        ]);
        let outcomes = ensemble.vote(&state(), None, 1).unwrap();
        assert!(outcomes[0].is_tie());
        assert_eq!(outcomes[0].winners.len(), 2);
    }

    #[test]
    fn parallel_vote_matches_sequential() {
        let facts = state();
        let sequential = ensemble().vote(&facts, None, 2).unwrap();
        let parallel = ensemble().vote_parallel(&facts, None, 2).unwrap();
        assert_eq!(sequential, parallel);
    }

    #[test]
    fn empty_ensemble_votes_nothing() {
        let outcomes = PolicyEnsemble::default().vote(&state(), None, 3).unwrap();
        assert!(outcomes.is_empty());
    }
}
