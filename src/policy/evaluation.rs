//! Policy evaluation against a fact base.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::FactBaseError;
use crate::facts::{match_fact, FactBase};
use crate::predicate::{Predicate, Substitution};
use crate::policy::Policy;

/// One candidate action and the rule that proposed it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposedAction {
    /// Ground action.
    pub action: Predicate,
    /// Index of the proposing rule in the policy.
    pub rule_index: usize,
}

/// Actions proposed for one decision step, in proposal order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposedActions {
    actions: Vec<ProposedAction>,
}

impl ProposedActions {
    /// Proposals in order.
    #[must_use]
    pub fn actions(&self) -> &[ProposedAction] {
        &self.actions
    }

    /// The proposed actions alone.
    pub fn iter(&self) -> impl Iterator<Item = &Predicate> {
        self.actions.iter().map(|p| &p.action)
    }

    /// The `index`-th proposed action.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Predicate> {
        self.actions.get(index).map(|p| &p.action)
    }

    /// Number of proposals.
    #[must_use]
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// True if nothing was proposed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    fn contains(&self, action: &Predicate) -> bool {
        self.actions.iter().any(|p| p.action == *action)
    }
}

/// Grounds `action` under `binding`, expanding leftover variables against
/// the legal actions. Without a legal set only fully bound actions survive.
fn instantiate(
    action: &Predicate,
    binding: &Substitution,
    legal: Option<&BTreeSet<Predicate>>,
) -> Vec<Predicate> {
    let Some(partial) = action.replace_arguments(binding, true) else {
        return Vec::new();
    };
    match legal {
        Some(legal) if partial.is_ground() => {
            if legal.contains(&partial) {
                vec![partial]
            } else {
                Vec::new()
            }
        }
        Some(legal) => legal
            .iter()
            .filter(|l| !l.is_negated() && match_fact(&partial, l, &Substitution::new()).is_some())
            .cloned()
            .collect(),
        None if partial.is_ground() => vec![partial],
        None => Vec::new(),
    }
}

impl Policy {
    /// Proposes actions for the current state.
    ///
    /// Rules are tried in policy order. Every satisfying binding of a rule's
    /// conditions yields an action instance; instances outside `legal` (when
    /// given) are discarded, duplicates are kept once, and evaluation stops
    /// as soon as `quota` actions have been collected. In learning mode the
    /// rules that proposed an action are marked triggered.
    ///
    /// # Errors
    ///
    /// Returns the fact base's error. Nothing is marked triggered then.
    pub fn evaluate<F: FactBase + ?Sized>(
        &mut self,
        facts: &F,
        legal: Option<&BTreeSet<Predicate>>,
        quota: usize,
    ) -> Result<ProposedActions, FactBaseError> {
        let proposed = self.propose(facts, legal, quota).map_err(|err| {
            tracing::warn!(policy = %self.id(), error = %err, "fact base query failed during evaluation");
            err
        })?;
        if !self.frozen {
            self.triggered.extend(proposed.actions.iter().map(|p| p.rule_index));
        }
        Ok(proposed)
    }

    fn propose<F: FactBase + ?Sized>(
        &self,
        facts: &F,
        legal: Option<&BTreeSet<Predicate>>,
        quota: usize,
    ) -> Result<ProposedActions, FactBaseError> {
        let mut proposed = ProposedActions::default();
        if quota == 0 {
            return Ok(proposed);
        }
        for (rule_index, entry) in self.rules.iter().enumerate() {
            let conditions: Vec<Predicate> = entry.rule.conditions().iter().cloned().collect();
            let bindings = facts.query(&conditions)?;
            tracing::trace!(rule = %entry.rule, bindings = bindings.len(), "evaluated rule");
            for binding in &bindings {
                for action in instantiate(entry.rule.action(), binding, legal) {
                    if proposed.contains(&action) {
                        continue;
                    }
                    proposed.actions.push(ProposedAction { action, rule_index });
                    if proposed.len() >= quota {
                        return Ok(proposed);
                    }
                }
            }
        }
        Ok(proposed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facts::InMemoryFactBase;
    use crate::predicate::parse_predicates;
    use crate::rule::Rule;

    struct Failing;

    impl FactBase for Failing {
        fn query(&self, _: &[Predicate]) -> Result<Vec<Substitution>, FactBaseError> {
            Err(FactBaseError::QueryFailed {
                message: "offline".to_string(),
            })
        }
        fn assert_fact(&self, _: Predicate) -> Result<bool, FactBaseError> {
            Ok(false)
        }
        fn retract_fact(&self, _: &Predicate) -> Result<bool, FactBaseError> {
            Ok(false)
        }
        fn facts(&self) -> Result<BTreeSet<Predicate>, FactBaseError> {
            Ok(BTreeSet::new())
        }
    }

    fn policy(rules: &[&str]) -> Policy {
        let mut policy = Policy::new();
        for r in rules {
            policy.push(r.parse::<Rule>().unwrap(), None);
        }
        policy
    }

    fn state() -> InMemoryFactBase {
        InMemoryFactBase::from_facts(
            parse_predicates("(on a b) (on b floor) (on c floor) (clear a) (clear c)").unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn accumulates_until_quota() {
        let mut p = policy(&[
            "(clear ?A) (on ?A floor) => (pickup ?A)",
            "(clear ?A) => (pickup ?A)",
        ]);
        let proposed = p.evaluate(&state(), None, 2).unwrap();
        let actions: Vec<String> = proposed.iter().map(ToString::to_string).collect();
        assert_eq!(actions, vec!["(pickup c)", "(pickup a)"]);
        assert_eq!(proposed.actions()[1].rule_index, 1);
        assert!(p.is_triggered(0));
        assert!(p.is_triggered(1));
    }

    #[test]
    fn filters_against_legal_actions() {
        let mut p = policy(&["(clear ?A) => (pickup ?A)"]);
        let legal = parse_predicates("(pickup c)").unwrap();
        let proposed = p.evaluate(&state(), Some(&legal), 5).unwrap();
        assert_eq!(proposed.len(), 1);
        assert_eq!(proposed.get(0).unwrap().to_string(), "(pickup c)");
    }

    #[test]
    fn unbound_action_arguments_expand_against_legal_actions() {
        let mut p = policy(&["(clear ?A) => (move ?A ?B)"]);
        let legal = parse_predicates("(move a c) (move c a) (move c floor)").unwrap();
        let proposed = p.evaluate(&state(), Some(&legal), 10).unwrap();
        assert_eq!(proposed.len(), 3);

        let proposed = p.evaluate(&state(), None, 10).unwrap();
        assert!(proposed.is_empty());
    }

    #[test]
    fn frozen_policies_do_not_mark_triggers() {
        let mut p = policy(&["(clear ?A) => (pickup ?A)"]);
        p.set_frozen(true);
        assert_eq!(p.evaluate(&state(), None, 1).unwrap().len(), 1);
        assert_eq!(p.triggered_rules().count(), 0);
    }

    #[test]
    fn rules_after_quota_are_not_triggered() {
        let mut p = policy(&["(clear ?A) => (pickup ?A)", "(on ?A ?B) => (move ?A ?B)"]);
        p.evaluate(&state(), None, 1).unwrap();
        assert!(p.is_triggered(0));
        assert!(!p.is_triggered(1));
    }

    #[test]
    fn fact_base_failure_leaves_policy_untouched() {
        let mut p = policy(&["(clear ?A) => (pickup ?A)"]);
        assert!(p.evaluate(&Failing, None, 1).is_err());
        assert_eq!(p.triggered_rules().count(), 0);
    }

    #[test]
    fn zero_quota_proposes_nothing() {
        let mut p = policy(&["(clear ?A) => (pickup ?A)"]);
        assert!(p.evaluate(&state(), None, 0).unwrap().is_empty());
    }
}
