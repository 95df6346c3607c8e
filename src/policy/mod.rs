//! Policies.
//!
//! A policy is an ordered list of rules, assembled by sampling every live
//! slot in slot-rank order. Policies are built fresh for each evaluation and
//! only ever grow by appending.

mod ensemble;
mod evaluation;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::CrossEntropyConfig;
use crate::rule::{Rule, RuleId};
use crate::slot::{ActionSignature, Slot};

pub use ensemble::{PolicyEnsemble, VoteOutcome};
pub use evaluation::{ProposedAction, ProposedActions};

/// Identifier of a sampled policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PolicyId(uuid::Uuid);

impl PolicyId {
    /// Creates a new random policy ID.
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for PolicyId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PolicyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A policy rule and the slot it was sampled from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRule {
    /// The rule.
    pub rule: Rule,
    /// Originating slot, if sampled from one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slot: Option<ActionSignature>,
}

/// How slots are sampled into a policy.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SamplingOptions {
    /// Take each slot's most likely rules instead of random draws.
    pub use_most_likely: bool,
    /// `(threshold, boost)` for sampling from influenced distributions.
    pub influence: Option<(f64, f64)>,
}

impl SamplingOptions {
    /// Exploratory sampling with the configured influence parameters.
    #[must_use]
    pub const fn exploring(config: &CrossEntropyConfig) -> Self {
        Self {
            use_most_likely: false,
            influence: Some((config.influence_threshold, config.influence_boost)),
        }
    }

    /// Greedy sampling, one most likely rule per slot use.
    #[must_use]
    pub const fn greedy() -> Self {
        Self {
            use_most_likely: true,
            influence: None,
        }
    }
}

/// An ordered rule list with evaluation bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    id: PolicyId,
    rules: Vec<PolicyRule>,
    frozen: bool,
    #[serde(default)]
    triggered: BTreeSet<usize>,
}

impl Default for Policy {
    fn default() -> Self {
        Self::new()
    }
}

impl Policy {
    /// Creates an empty, learning-mode policy.
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: PolicyId::new(),
            rules: Vec::new(),
            frozen: false,
            triggered: BTreeSet::new(),
        }
    }

    /// Samples a policy from `slots`.
    ///
    /// Slots are visited in slot-rank order. Each contributes
    /// [`Slot::num_slot_uses`] distinct rules, drawn without replacement.
    /// A fixed slot contributes its designated rule once.
    pub fn sample<'a, R: Rng + ?Sized>(
        slots: impl IntoIterator<Item = &'a Slot>,
        rng: &mut R,
        options: SamplingOptions,
    ) -> Self {
        let mut ranked: Vec<&Slot> = slots.into_iter().collect();
        ranked.sort_by(|a, b| a.rank_cmp(b));

        let mut policy = Self::new();
        for slot in ranked {
            if let Some(rule) = slot.fixed_rule() {
                policy.push(rule.clone(), Some(slot.signature().clone()));
                continue;
            }
            let uses = slot.num_slot_uses(rng);
            if uses == 0 {
                continue;
            }
            let mut pool = match options.influence {
                Some((threshold, boost)) => slot.get_influenced_distribution(threshold, boost),
                None => slot.distribution().clone(),
            };
            for _ in 0..uses {
                let drawn = if options.use_most_likely {
                    let best = pool.most_likely().cloned();
                    if let Some(rule) = &best {
                        pool.remove(rule);
                        pool.normalize();
                    }
                    best
                } else {
                    pool.sample_with_removal(rng)
                };
                let Some(rule) = drawn else { break };
                policy.push(rule, Some(slot.signature().clone()));
            }
        }
        tracing::debug!(policy = %policy.id, rules = policy.len(), "sampled policy");
        policy
    }

    /// Policy identifier.
    #[must_use]
    pub const fn id(&self) -> PolicyId {
        self.id
    }

    /// Appends a rule.
    pub fn push(&mut self, rule: Rule, slot: Option<ActionSignature>) {
        self.rules.push(PolicyRule { rule, slot });
    }

    /// Rules in evaluation order.
    #[must_use]
    pub fn rules(&self) -> &[PolicyRule] {
        &self.rules
    }

    /// Number of rules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// True if the policy has no rules.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// True if evaluation no longer records triggered rules.
    #[must_use]
    pub const fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Switches between learning (`false`) and frozen (`true`) mode.
    pub fn set_frozen(&mut self, frozen: bool) {
        self.frozen = frozen;
    }

    /// True if the rule at `index` has fired during a learning-mode evaluation.
    #[must_use]
    pub fn is_triggered(&self, index: usize) -> bool {
        self.triggered.contains(&index)
    }

    /// Rules that have fired during learning-mode evaluations.
    pub fn triggered_rules(&self) -> impl Iterator<Item = &PolicyRule> {
        self.triggered.iter().filter_map(|&i| self.rules.get(i))
    }

    /// Forgets which rules have fired.
    pub fn clear_triggered(&mut self) {
        self.triggered.clear();
    }

    /// Rule ids per slot, in policy order.
    #[must_use]
    pub fn rules_by_slot(&self) -> BTreeMap<ActionSignature, Vec<RuleId>> {
        let mut by_slot: BTreeMap<ActionSignature, Vec<RuleId>> = BTreeMap::new();
        for entry in &self.rules {
            if let Some(slot) = &entry.slot {
                by_slot.entry(slot.clone()).or_default().push(entry.rule.id());
            }
        }
        by_slot
    }

    /// Relative position (0 first, 1 last) of each slot's first rule.
    #[must_use]
    pub fn slot_positions(&self) -> BTreeMap<ActionSignature, f64> {
        let mut positions = BTreeMap::new();
        #[allow(clippy::cast_precision_loss)]
        let span = self.rules.len().saturating_sub(1).max(1) as f64;
        for (index, entry) in self.rules.iter().enumerate() {
            if let Some(slot) = &entry.slot {
                #[allow(clippy::cast_precision_loss)]
                let position = index as f64 / span;
                positions.entry(slot.clone()).or_insert(position);
            }
        }
        positions
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, entry) in self.rules.iter().enumerate() {
            let mark = if self.triggered.contains(&index) { "*" } else { "" };
            writeln!(f, "{}{mark}", entry.rule)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn rule(s: &str) -> Rule {
        s.parse().unwrap()
    }

    fn slot(rules: &[&str], selection: f64) -> Slot {
        let first = rule(rules[0]);
        let mut slot = Slot::new(ActionSignature::of(first.action()), 8);
        for r in rules {
            slot.add_new_rule(rule(r)).unwrap();
        }
        slot.set_selection(selection, 0.0);
        slot
    }

    #[test]
    fn samples_in_slot_rank_order() {
        let low = slot(&["(clear ?A) => (pickup ?A)"], 1.0);
        let mut high = slot(&["(on ?A ?B) => (move ?A ?B)"], 1.0);
        high.update_values(0.0, 1.0, 0.0, 1.0);
        let mut low = low;
        low.update_values(1.0, 1.0, 0.0, 1.0);

        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let policy = Policy::sample([&low, &high], &mut rng, SamplingOptions::default());
        let actions: Vec<&str> = policy.rules().iter().map(|r| r.rule.action().name()).collect();
        assert_eq!(actions, vec!["move", "pickup"]);
    }

    #[test]
    fn unused_slots_contribute_nothing() {
        let never = slot(&["(clear ?A) => (pickup ?A)"], 0.0);
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let policy = Policy::sample([&never], &mut rng, SamplingOptions::default());
        assert!(policy.is_empty());
    }

    #[test]
    fn fixed_slot_contributes_its_rule() {
        let fixed = Slot::fixed(rule("(clear ?A) => (pickup ?A)"));
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let policy = Policy::sample([&fixed], &mut rng, SamplingOptions::greedy());
        assert_eq!(policy.len(), 1);
        assert_eq!(policy.rules()[0].rule, rule("(clear ?A) => (pickup ?A)"));
    }

    #[test]
    fn greedy_sampling_is_deterministic() {
        let mut s = slot(
            &["(clear ?A) => (pickup ?A)", "(clear ?A) (on ?A ?) => (pickup ?A)"],
            1.0,
        );
        let mut counts = std::collections::HashMap::new();
        counts.insert(rule("(clear ?A) (on ?A ?) => (pickup ?A)"), 1.0);
        s.update_rules(&counts, 1.0, 0.5);

        let mut rng = ChaCha8Rng::seed_from_u64(4);
        let a = Policy::sample([&s], &mut rng, SamplingOptions::greedy());
        let b = Policy::sample([&s], &mut rng, SamplingOptions::greedy());
        assert_eq!(a.rules(), b.rules());
        assert_eq!(a.rules()[0].rule, rule("(clear ?A) (on ?A ?) => (pickup ?A)"));
    }

    #[test]
    fn slot_bookkeeping() {
        let mut policy = Policy::new();
        let pickup = ActionSignature::new("pickup", 1);
        let stack = ActionSignature::new("stack", 2);
        policy.push(rule("(clear ?A) => (pickup ?A)"), Some(pickup.clone()));
        policy.push(rule("(clear ?A) (clear ?B) => (stack ?A ?B)"), Some(stack.clone()));
        policy.push(rule("(on ?A ?) => (pickup ?A)"), Some(pickup.clone()));

        let positions = policy.slot_positions();
        assert!((positions[&pickup] - 0.0).abs() < f64::EPSILON);
        assert!((positions[&stack] - 0.5).abs() < f64::EPSILON);
        assert_eq!(policy.rules_by_slot()[&pickup].len(), 2);
    }

    #[test]
    fn policy_ids_are_unique() {
        assert_ne!(Policy::new().id(), Policy::new().id());
    }
}
