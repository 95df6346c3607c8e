//! The rule base: every slot of a learning run.
//!
//! Slots are created by *covering*: the first time an action signature is
//! observed, the observed state is turned into a maximally specific seed
//! rule for it. Later observations of the same signature generalize the seed
//! through unification. Seeds are refined by *specialization*, which adds one
//! condition at a time from a pool of candidate conditions. Background
//! knowledge prunes redundant and contradictory candidates throughout.

use std::collections::BTreeSet;
use std::fmt;

use indexmap::IndexMap;
use rand::Rng;

use crate::background::{ConditionSimplifier, Simplification};
use crate::config::CrossEntropyConfig;
use crate::error::{CerrlaResult, ParseError, SlotError};
use crate::policy::{Policy, SamplingOptions};
use crate::predicate::{Predicate, Substitution};
use crate::rule::{action_variable, Rule};
use crate::slot::{ActionSignature, Slot};
use crate::term::Term;
use crate::unification::{UnificationVerdict, Unifier};

/// Result of covering one observed action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Coverage {
    /// A new slot was created with this seed.
    Created(Rule),
    /// The existing seed already covers the observation.
    Unchanged,
    /// The seed was generalized into this rule.
    Generalized(Rule),
    /// The observation shares nothing with the seed; the slot is unchanged.
    Failed,
}

/// Slots changed by [`RuleBase::retire_converged`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Retirement {
    /// Slots frozen to their most likely rule.
    pub fixed: Vec<ActionSignature>,
    /// Slots removed because they are no longer selected.
    pub removed: Vec<ActionSignature>,
}

/// Ordered collection of slots plus the knowledge used to grow them.
#[derive(Debug, Clone)]
pub struct RuleBase {
    slots: IndexMap<ActionSignature, Slot>,
    simplifier: ConditionSimplifier,
    specializations: BTreeSet<Predicate>,
    unifier: Unifier,
    max_slot_sd: f64,
}

impl Default for RuleBase {
    fn default() -> Self {
        Self::new(&CrossEntropyConfig::default())
    }
}

impl RuleBase {
    /// Creates an empty rule base.
    #[must_use]
    pub fn new(config: &CrossEntropyConfig) -> Self {
        Self {
            slots: IndexMap::new(),
            simplifier: ConditionSimplifier::default(),
            specializations: BTreeSet::new(),
            unifier: config.unifier(),
            max_slot_sd: config.max_slot_sd,
        }
    }

    /// Sets the background knowledge.
    #[must_use]
    pub fn with_background(mut self, simplifier: ConditionSimplifier) -> Self {
        self.simplifier = simplifier;
        self
    }

    /// Sets the candidate specialization conditions.
    ///
    /// Conditions are written over action variables (`?A`, `?B`, ...), e.g.
    /// `(clear ?A)` or `(not (above ?A ?B))`.
    #[must_use]
    pub fn with_specializations(mut self, conditions: impl IntoIterator<Item = Predicate>) -> Self {
        self.specializations = conditions.into_iter().collect();
        self
    }

    /// Background knowledge in use.
    #[must_use]
    pub const fn simplifier(&self) -> &ConditionSimplifier {
        &self.simplifier
    }

    /// Candidate specialization conditions.
    #[must_use]
    pub const fn specializations(&self) -> &BTreeSet<Predicate> {
        &self.specializations
    }

    /// Number of slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// True if there are no slots.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Slot for `signature`.
    #[must_use]
    pub fn slot(&self, signature: &ActionSignature) -> Option<&Slot> {
        self.slots.get(signature)
    }

    /// Mutable slot for `signature`.
    pub fn slot_mut(&mut self, signature: &ActionSignature) -> Option<&mut Slot> {
        self.slots.get_mut(signature)
    }

    /// Slots in creation order.
    pub fn slots(&self) -> impl Iterator<Item = &Slot> {
        self.slots.values()
    }

    /// Mutable slots in creation order.
    pub fn slots_mut(&mut self) -> impl Iterator<Item = &mut Slot> {
        self.slots.values_mut()
    }

    /// Slots in policy-assembly order.
    #[must_use]
    pub fn ranked_slots(&self) -> Vec<&Slot> {
        let mut ranked: Vec<&Slot> = self.slots.values().collect();
        ranked.sort_by(|a, b| a.rank_cmp(b));
        ranked
    }

    /// Inserts or replaces a slot, returning the replaced one.
    pub fn insert_slot(&mut self, slot: Slot) -> Option<Slot> {
        self.slots.insert(slot.signature().clone(), slot)
    }

    /// Folds an observed state and action into the rule base.
    ///
    /// # Errors
    ///
    /// Returns an error if the seed of a fixed slot would have to change or
    /// a new seed does not fit its slot.
    pub fn cover(&mut self, state: &BTreeSet<Predicate>, action: &Predicate) -> CerrlaResult<Coverage> {
        let signature = ActionSignature::of(action);

        if !self.slots.contains_key(&signature) {
            let seed = self.seed_rule(state, action);
            let mut slot = Slot::new(signature.clone(), self.capacity_for(&signature)).with_max_sd(self.max_slot_sd);
            slot.add_new_rule(seed.clone())?;
            tracing::debug!(slot = %signature, seed = %seed, "created slot");
            self.slots.insert(signature, slot);
            return Ok(Coverage::Created(seed));
        }

        let Some(slot) = self.slots.get_mut(&signature) else {
            return Err(SlotError::UnknownSlot { signature }.into());
        };
        if slot.is_fixed() {
            return Ok(Coverage::Unchanged);
        }
        let Some(seed) = slot.seed().cloned() else {
            return Err(SlotError::UnknownSlot { signature }.into());
        };

        let (verdict, generalized) = self.unifier.generalize_rule(&seed, state, action)?;
        let generalized = match (verdict, generalized) {
            (UnificationVerdict::Generalized, Some(rule)) => rule,
            (UnificationVerdict::Failed, _) => return Ok(Coverage::Failed),
            _ => return Ok(Coverage::Unchanged),
        };
        let generalized = match self.simplifier.simplify(generalized.conditions()) {
            Simplification::Simplified(conditions) => generalized.with_conditions(conditions),
            Simplification::Contradiction => generalized,
        };
        if generalized == seed {
            return Ok(Coverage::Unchanged);
        }
        slot.replace_seed(generalized.clone())?;
        Ok(Coverage::Generalized(generalized))
    }

    /// Maximally specific rule for one observation: every state fact that
    /// mentions an action argument, with action arguments replaced by
    /// action variables.
    fn seed_rule(&self, state: &BTreeSet<Predicate>, action: &Predicate) -> Rule {
        let mut mapping = Substitution::new();
        for (index, arg) in action.args().iter().enumerate() {
            if arg.is_ground() && !mapping.contains_key(arg) {
                mapping.insert(arg.clone(), Term::variable(action_variable(index)));
            }
        }
        let head = action.replace_arguments(&mapping, true).unwrap_or_else(|| action.clone());
        let conditions: BTreeSet<Predicate> = state
            .iter()
            .filter(|fact| fact.args().iter().any(|a| mapping.contains_key(a)))
            .filter_map(|fact| fact.replace_arguments(&mapping, true))
            .collect();
        match self.simplifier.simplify(&conditions) {
            Simplification::Simplified(simplified) => Rule::new(simplified, head),
            Simplification::Contradiction => {
                tracing::warn!(action = %action, "observed state contradicts background knowledge");
                Rule::new(conditions, head)
            }
        }
    }

    /// Seed plus every one-step specialization the pool allows.
    fn capacity_for(&self, signature: &ActionSignature) -> usize {
        let action_vars: BTreeSet<String> = (0..signature.arity()).map(action_variable).collect();
        1 + self
            .specializations
            .iter()
            .filter(|c| c.variables().is_subset(&action_vars))
            .count()
    }

    /// Adds every one-condition specialization of `rule` to its slot.
    ///
    /// Candidates whose variables the rule does not bind, that contradict
    /// background knowledge, or that background knowledge makes redundant
    /// are skipped. Each added rule records `rule` as its parent.
    ///
    /// # Errors
    ///
    /// Returns `SlotError::UnknownSlot`, `SlotError::Fixed`, or
    /// `SlotError::CapacityExceeded` if the new rules would not fit. On
    /// error the slot is unchanged.
    pub fn specialize(&mut self, signature: &ActionSignature, rule: &Rule) -> Result<Vec<Rule>, SlotError> {
        let slot = self.slots.get_mut(signature).ok_or_else(|| SlotError::UnknownSlot {
            signature: signature.clone(),
        })?;
        if slot.is_fixed() {
            return Err(SlotError::Fixed {
                signature: signature.clone(),
            });
        }

        let mut bound: BTreeSet<String> = rule.conditions().iter().flat_map(Predicate::variables).collect();
        bound.extend(rule.action().variables());

        let mut fresh: Vec<Rule> = Vec::new();
        for condition in &self.specializations {
            if !condition.variables().is_subset(&bound) {
                continue;
            }
            let Some(candidate) = rule.specialize(condition.clone()) else {
                continue;
            };
            let Simplification::Simplified(conditions) = self.simplifier.simplify(candidate.conditions()) else {
                continue;
            };
            if conditions == *rule.conditions() {
                continue;
            }
            let candidate = candidate.with_conditions(conditions);
            if !slot.distribution().contains(&candidate) && !fresh.contains(&candidate) {
                fresh.push(candidate);
            }
        }

        if slot.len() + fresh.len() > slot.capacity() {
            return Err(SlotError::CapacityExceeded {
                signature: signature.clone(),
                capacity: slot.capacity(),
            });
        }
        for candidate in &fresh {
            slot.add_new_rule(candidate.clone())?;
        }
        tracing::debug!(slot = %signature, parent = %rule, added = fresh.len(), "specialized rule");
        Ok(fresh)
    }

    /// Freezes or removes slots whose search has settled.
    ///
    /// A slot selected with probability at most `threshold` (and SD at most
    /// `threshold`) is removed. A slot selected with probability at least
    /// `1 - threshold` (SD at most `threshold`) whose rule distribution has
    /// converged is replaced by a fixed slot holding its most likely rule.
    pub fn retire_converged(&mut self, threshold: f64) -> Retirement {
        let mut retirement = Retirement::default();
        let mut replacements = Vec::new();
        for (signature, slot) in &self.slots {
            if slot.is_fixed() || slot.selection_sd() > threshold {
                continue;
            }
            if slot.selection_probability() <= threshold {
                retirement.removed.push(signature.clone());
            } else if slot.selection_probability() >= 1.0 - threshold && slot.is_converged(threshold) {
                if let Some(best) = slot.distribution().most_likely() {
                    replacements.push(Slot::fixed(best.clone()));
                    retirement.fixed.push(signature.clone());
                }
            }
        }
        for signature in &retirement.removed {
            self.slots.shift_remove(signature);
        }
        for fixed in replacements {
            self.insert_slot(fixed);
        }
        if !retirement.fixed.is_empty() || !retirement.removed.is_empty() {
            tracing::debug!(
                fixed = retirement.fixed.len(),
                removed = retirement.removed.len(),
                "retired converged slots"
            );
        }
        retirement
    }

    /// Merges a slot into the rule base.
    ///
    /// An unknown signature is inserted as is. Otherwise the incoming rules
    /// missing from the existing slot are added. Returns the number of rules added.
    ///
    /// # Errors
    ///
    /// Returns `SlotError::Fixed` for a fixed target slot or
    /// `SlotError::CapacityExceeded` if the rules would not fit. On error the
    /// existing slot is unchanged.
    pub fn merge(&mut self, incoming: Slot) -> Result<usize, SlotError> {
        let signature = incoming.signature().clone();
        let Some(existing) = self.slots.get_mut(&signature) else {
            let added = incoming.len();
            self.slots.insert(signature, incoming);
            return Ok(added);
        };
        let missing: Vec<Rule> = incoming
            .distribution()
            .ordered_items()
            .into_iter()
            .map(|(rule, _)| rule)
            .filter(|rule| !existing.distribution().contains(rule))
            .cloned()
            .collect();
        if missing.is_empty() {
            return Ok(0);
        }
        if existing.is_fixed() {
            return Err(SlotError::Fixed { signature });
        }
        if existing.len() + missing.len() > existing.capacity() {
            return Err(SlotError::CapacityExceeded {
                signature,
                capacity: existing.capacity(),
            });
        }
        for rule in &missing {
            existing.add_new_rule(rule.clone())?;
        }
        Ok(missing.len())
    }

    /// Samples a policy from the current slots.
    pub fn sample_policy<R: Rng + ?Sized>(&self, rng: &mut R, options: SamplingOptions) -> Policy {
        Policy::sample(self.slots.values(), rng, options)
    }

    /// Records one use of every slot rule in `policy`.
    pub fn record_uses(&mut self, policy: &Policy) {
        for entry in policy.rules() {
            if let Some(slot) = entry.slot.as_ref().and_then(|s| self.slots.get_mut(s)) {
                slot.record_use(&entry.rule);
            }
        }
    }

    /// Replaces the slots with those parsed from `text`, one slot per line.
    ///
    /// Each slot gets the capacity implied by the specialization pool, so
    /// the pool must be configured before loading.
    ///
    /// # Errors
    ///
    /// Returns the first parse error, or a malformed-slot error for a slot
    /// holding more rules than its capacity; the rule base is unchanged then.
    pub fn load_slots(&mut self, text: &str) -> Result<usize, ParseError> {
        let slots = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| {
                let slot = line.parse::<Slot>()?;
                let capacity = self.capacity_for(slot.signature());
                slot.with_capacity(capacity)
                    .map_err(|e| ParseError::malformed("slot", e.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        self.slots.clear();
        let count = slots.len();
        for slot in slots {
            let slot = slot.with_max_sd(self.max_slot_sd);
            self.slots.insert(slot.signature().clone(), slot);
        }
        tracing::debug!(slots = count, "loaded rule base");
        Ok(count)
    }
}

impl fmt::Display for RuleBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for slot in self.slots.values() {
            writeln!(f, "{slot}")?;
        }
        Ok(())
    }
}
