//! Slots: per-action rule distributions.
//!
//! A slot owns every rule variant that shares one action signature, the
//! distribution over those variants, and the slot's own meta-parameters:
//! how many times it is expected to contribute to a policy (selection
//! probability, with its SD) and where it tends to sit in the policy
//! (ordering, with its SD). Both pairs are updated by exponential moving
//! average between episodes.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::distribution::ProbabilityDistribution;
use crate::error::{ParseError, SlotError};
use crate::predicate::Predicate;
use crate::rule::{Rule, RuleId};

/// Prefix marking a fixed slot in the text format.
pub const FIXED_PREFIX: &str = "FIXED:";

/// Capacity used when no specialization bound is known.
pub const UNBOUNDED: usize = usize::MAX;

/// Default cap on the selection-probability and ordering SDs.
pub const DEFAULT_MAX_SD: f64 = 0.5;

const INITIAL_SELECTION_PROBABILITY: f64 = 0.5;
const INITIAL_ORDERING: f64 = 0.5;

/// Name and arity of an action predicate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActionSignature {
    name: String,
    arity: usize,
}

impl ActionSignature {
    /// Creates a signature.
    #[must_use]
    pub fn new(name: impl Into<String>, arity: usize) -> Self {
        Self {
            name: name.into(),
            arity,
        }
    }

    /// Signature of an action predicate.
    #[must_use]
    pub fn of(action: &Predicate) -> Self {
        Self::new(action.name(), action.arity())
    }

    /// Action name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Action arity.
    #[must_use]
    pub const fn arity(&self) -> usize {
        self.arity
    }

    /// True if `action` has this signature.
    #[must_use]
    pub fn matches(&self, action: &Predicate) -> bool {
        action.name() == self.name && action.arity() == self.arity
    }
}

impl fmt::Display for ActionSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.arity)
    }
}

/// The rule variants and selection meta-parameters for one action signature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Slot {
    signature: ActionSignature,
    rules: ProbabilityDistribution<Rule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    seed: Option<Rule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    fixed: Option<Rule>,
    capacity: usize,
    selection_probability: f64,
    selection_sd: f64,
    ordering: f64,
    ordering_sd: f64,
    max_sd: f64,
    #[serde(skip)]
    uses: HashMap<RuleId, u32>,
}

impl Slot {
    /// Creates an empty slot holding at most `capacity` rules.
    #[must_use]
    pub fn new(signature: ActionSignature, capacity: usize) -> Self {
        Self {
            signature,
            rules: ProbabilityDistribution::new(),
            seed: None,
            fixed: None,
            capacity,
            selection_probability: INITIAL_SELECTION_PROBABILITY,
            selection_sd: DEFAULT_MAX_SD,
            ordering: INITIAL_ORDERING,
            ordering_sd: DEFAULT_MAX_SD,
            max_sd: DEFAULT_MAX_SD,
            uses: HashMap::new(),
        }
    }

    /// Creates a slot permanently fixed to `rule`.
    ///
    /// A fixed slot contributes exactly one use of `rule` to every policy.
    #[must_use]
    pub fn fixed(rule: Rule) -> Self {
        let mut slot = Self::new(ActionSignature::of(rule.action()), 1);
        slot.rules.add_with_weight(rule.clone(), 1.0);
        slot.seed = Some(rule.clone());
        slot.fixed = Some(rule);
        slot.selection_probability = 1.0;
        slot.selection_sd = 0.0;
        slot.ordering_sd = 0.0;
        slot
    }

    /// Sets the cap applied to both SDs.
    #[must_use]
    pub fn with_max_sd(mut self, max_sd: f64) -> Self {
        self.max_sd = max_sd.max(0.0);
        self.selection_sd = self.selection_sd.min(self.max_sd);
        self.ordering_sd = self.ordering_sd.min(self.max_sd);
        self
    }

    /// Sets the number of rules the slot may hold. Fixed slots keep theirs.
    ///
    /// # Errors
    ///
    /// Returns `SlotError::CapacityExceeded` if the slot already holds more
    /// than `capacity` rules.
    pub fn with_capacity(mut self, capacity: usize) -> Result<Self, SlotError> {
        if self.is_fixed() {
            return Ok(self);
        }
        if self.rules.len() > capacity {
            return Err(SlotError::CapacityExceeded {
                signature: self.signature,
                capacity,
            });
        }
        self.capacity = capacity;
        Ok(self)
    }

    /// Action signature this slot serves.
    #[must_use]
    pub const fn signature(&self) -> &ActionSignature {
        &self.signature
    }

    /// Rule distribution.
    #[must_use]
    pub const fn distribution(&self) -> &ProbabilityDistribution<Rule> {
        &self.rules
    }

    /// Seed rule: the first rule added, or its latest replacement.
    #[must_use]
    pub const fn seed(&self) -> Option<&Rule> {
        self.seed.as_ref()
    }

    /// The designated rule of a fixed slot.
    #[must_use]
    pub const fn fixed_rule(&self) -> Option<&Rule> {
        self.fixed.as_ref()
    }

    /// True if the slot is fixed.
    #[must_use]
    pub const fn is_fixed(&self) -> bool {
        self.fixed.is_some()
    }

    /// Maximum number of rules.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of rules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// True if the slot has no rules.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Mean selection probability.
    #[must_use]
    pub const fn selection_probability(&self) -> f64 {
        self.selection_probability
    }

    /// SD of the selection probability.
    #[must_use]
    pub const fn selection_sd(&self) -> f64 {
        self.selection_sd
    }

    /// Mean relative position in a policy (0 = first).
    #[must_use]
    pub const fn ordering(&self) -> f64 {
        self.ordering
    }

    /// SD of the ordering.
    #[must_use]
    pub const fn ordering_sd(&self) -> f64 {
        self.ordering_sd
    }

    /// Overrides the selection-probability mean and SD (SD is capped).
    pub fn set_selection(&mut self, mean: f64, sd: f64) {
        self.selection_probability = mean.max(0.0);
        self.selection_sd = sd.clamp(0.0, self.max_sd);
    }

    /// Adds a rule at the average existing probability and renormalizes.
    ///
    /// Returns `Ok(false)` if the rule is already present. Fixed slots,
    /// rules for another action signature and additions beyond capacity
    /// are rejected.
    pub fn add_new_rule(&mut self, rule: Rule) -> Result<bool, SlotError> {
        if self.fixed.is_some() {
            return Err(SlotError::Fixed {
                signature: self.signature.clone(),
            });
        }
        if !self.signature.matches(rule.action()) {
            return Err(SlotError::SignatureMismatch {
                signature: self.signature.clone(),
                action: rule.action().to_string(),
            });
        }
        if self.rules.contains(&rule) {
            return Ok(false);
        }
        if self.rules.len() >= self.capacity {
            return Err(SlotError::CapacityExceeded {
                signature: self.signature.clone(),
                capacity: self.capacity,
            });
        }

        #[allow(clippy::cast_precision_loss)]
        let weight = if self.rules.is_empty() {
            1.0
        } else {
            1.0 / self.rules.len() as f64
        };
        if self.seed.is_none() {
            self.seed = Some(rule.clone());
        }
        tracing::debug!(slot = %self.signature, rule = %rule, weight, "adding rule to slot");
        self.rules.add_with_weight(rule, weight);
        self.rules.normalize();
        Ok(true)
    }

    /// Replaces the seed rule, which inherits the old seed's weight.
    ///
    /// Without a seed this is [`Slot::add_new_rule`].
    pub fn replace_seed(&mut self, rule: Rule) -> Result<(), SlotError> {
        let Some(old) = self.seed.clone() else {
            return self.add_new_rule(rule).map(|_| ());
        };
        if self.fixed.is_some() {
            return Err(SlotError::Fixed {
                signature: self.signature.clone(),
            });
        }
        if !self.signature.matches(rule.action()) {
            return Err(SlotError::SignatureMismatch {
                signature: self.signature.clone(),
                action: rule.action().to_string(),
            });
        }
        if old == rule {
            return Ok(());
        }
        let remaining = self.rules.len() - usize::from(self.rules.contains(&old));
        if !self.rules.contains(&rule) && remaining >= self.capacity {
            return Err(SlotError::CapacityExceeded {
                signature: self.signature.clone(),
                capacity: self.capacity,
            });
        }
        let inherited = self.rules.weight(&old);
        if self.rules.remove(&old) {
            self.uses.remove(&old.id());
        }
        if !self.rules.contains(&rule) {
            #[allow(clippy::cast_precision_loss)]
            let average = if self.rules.is_empty() { 1.0 } else { 1.0 / self.rules.len() as f64 };
            self.rules.add_with_weight(rule.clone(), inherited.unwrap_or(average));
        }
        tracing::debug!(slot = %self.signature, seed = %rule, "replacing slot seed");
        self.seed = Some(rule);
        self.rules.normalize();
        Ok(())
    }

    /// Removes a rule and renormalizes. Fixed slots never lose their rule.
    pub fn remove_rule(&mut self, rule: &Rule) -> bool {
        if self.fixed.is_some() || !self.rules.remove(rule) {
            return false;
        }
        self.uses.remove(&rule.id());
        self.rules.normalize();
        true
    }

    /// Samples one rule; a fixed slot always yields its designated rule.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R, use_most_likely: bool) -> Option<&Rule> {
        if let Some(rule) = &self.fixed {
            return Some(rule);
        }
        self.rules.sample(rng, use_most_likely)
    }

    /// Number of rules this slot contributes to one policy.
    ///
    /// Draws a Gaussian around the selection probability (SD capped), then
    /// counts successive Bernoulli successes, lowering the probability by 1
    /// after each, so a slot may contribute zero, one or several rules.
    pub fn num_slot_uses<R: Rng + ?Sized>(&self, rng: &mut R) -> usize {
        if self.fixed.is_some() {
            return 1;
        }
        let sd = self.selection_sd.min(self.max_sd);
        let mut p = self.selection_probability + sd * standard_normal(rng);
        let mut uses = 0;
        while p > 0.0 && rng.gen::<f64>() < p {
            uses += 1;
            p -= 1.0;
        }
        uses
    }

    /// Moves the meta-parameters toward observed values by `step_size`.
    ///
    /// `ordering` is the observed relative position, `mean`/`sd` the
    /// observed selection statistics. SDs are capped.
    pub fn update_values(&mut self, ordering: f64, mean: f64, sd: f64, step_size: f64) {
        if self.fixed.is_some() || ![ordering, mean, sd, step_size].iter().all(|v| v.is_finite()) {
            return;
        }
        let step = step_size.clamp(0.0, 1.0);
        let ema = |observed: f64, old: f64| step * observed + (1.0 - step) * old;

        self.selection_probability = ema(mean, self.selection_probability).max(0.0);
        self.selection_sd = ema(sd.abs(), self.selection_sd).min(self.max_sd);
        self.ordering_sd = ema((ordering - self.ordering).abs(), self.ordering_sd).min(self.max_sd);
        self.ordering = ema(ordering, self.ordering);
    }

    /// Applies a count-based cross-entropy update to the rule distribution.
    pub fn update_rules(
        &mut self,
        counts: &HashMap<Rule, f64>,
        num_samples: f64,
        step_size: f64,
    ) -> bool {
        if self.fixed.is_some() {
            return false;
        }
        self.rules.update_distribution(counts, num_samples, step_size)
    }

    /// A boosted copy of the rule distribution favouring under-used rules.
    ///
    /// Every rule used fewer than `threshold * len` times has its weight
    /// multiplied by `1 + boost * (threshold * len + 1 - uses)`. The stored
    /// distribution is not modified.
    #[must_use]
    pub fn get_influenced_distribution(&self, threshold: f64, boost: f64) -> ProbabilityDistribution<Rule> {
        let mut influenced = self.rules.clone();
        if self.fixed.is_some() {
            return influenced;
        }
        #[allow(clippy::cast_precision_loss)]
        let limit = threshold * self.rules.len() as f64;
        for (rule, weight) in self.rules.iter() {
            let uses = f64::from(self.uses_of(rule));
            if uses < limit {
                influenced.set_weight(rule, weight * (1.0 + boost * (limit + 1.0 - uses)));
            }
        }
        influenced.normalize();
        influenced
    }

    /// Records one use of `rule` (e.g. when it was sampled into a policy).
    pub fn record_use(&mut self, rule: &Rule) {
        if self.rules.contains(rule) {
            *self.uses.entry(rule.id()).or_insert(0) += 1;
        }
    }

    /// Recorded uses of `rule`.
    #[must_use]
    pub fn uses_of(&self, rule: &Rule) -> u32 {
        self.uses.get(&rule.id()).copied().unwrap_or(0)
    }

    /// Clears all recorded uses.
    pub fn reset_uses(&mut self) {
        self.uses.clear();
    }

    /// Normalized spread of the rule distribution: 0 when one rule dominates,
    /// 1 when all rules are equally likely.
    #[must_use]
    pub fn convergence_value(&self) -> f64 {
        let n = self.rules.len();
        if n <= 1 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let span = (n - 1) as f64;
        ((self.rules.kl_size() - 1.0) / span).clamp(0.0, 1.0)
    }

    /// True if the slot is fixed or its convergence value is within `threshold`.
    #[must_use]
    pub fn is_converged(&self, threshold: f64) -> bool {
        self.fixed.is_some() || self.convergence_value() <= threshold
    }

    /// Policy-assembly order: selection probability descending, then
    /// ordering ascending, then ordering SD ascending, then signature.
    #[must_use]
    pub fn rank_cmp(&self, other: &Self) -> Ordering {
        other
            .selection_probability
            .total_cmp(&self.selection_probability)
            .then_with(|| self.ordering.total_cmp(&other.ordering))
            .then_with(|| self.ordering_sd.total_cmp(&other.ordering_sd))
            .then_with(|| self.signature.cmp(&other.signature))
    }
}

/// Box-Muller draw from N(0, 1).
fn standard_normal<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    let u1 = 1.0 - rng.gen::<f64>();
    let u2 = rng.gen::<f64>();
    (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos()
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.fixed.is_some() {
            write!(f, "{FIXED_PREFIX}")?;
        }
        write!(f, "{}{}", self.signature.name(), self.rules)
    }
}

impl FromStr for Slot {
    type Err = ParseError;

    /// Parses `actionName{(rule:prob)(rule:prob)...}`, optionally prefixed
    /// with `FIXED:`. The arity is taken from the rules (0 when empty).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (fixed, s) = match s.strip_prefix(FIXED_PREFIX) {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        let open = s
            .find('{')
            .ok_or_else(|| ParseError::malformed("slot", "missing '{'"))?;
        let name = s[..open].trim();
        if name.is_empty() {
            return Err(ParseError::malformed("slot", "missing action name"));
        }
        let body = s[open + 1..]
            .strip_suffix('}')
            .ok_or(ParseError::UnexpectedEnd { context: "slot" })?;

        let mut entries = Vec::new();
        for group in balanced_groups(body)? {
            let sep = group
                .rfind(':')
                .ok_or_else(|| ParseError::malformed("slot", "missing ':' in rule entry"))?;
            let rule: Rule = group[..sep].parse()?;
            let prob_text = group[sep + 1..].trim();
            let prob = prob_text
                .parse::<f64>()
                .ok()
                .filter(|p| p.is_finite() && *p >= 0.0)
                .ok_or_else(|| ParseError::InvalidProbability {
                    value: prob_text.to_string(),
                })?;
            if rule.action().name() != name {
                return Err(ParseError::malformed(
                    "slot",
                    format!("rule action '{}' does not match slot '{name}'", rule.action().name()),
                ));
            }
            entries.push((rule, prob));
        }

        let arity = entries.first().map_or(0, |(r, _)| r.action().arity());
        if fixed {
            return match entries.into_iter().next() {
                Some((rule, _)) => Ok(Self::fixed(rule)),
                None => Err(ParseError::malformed("slot", "fixed slot without a rule")),
            };
        }

        let mut slot = Self::new(ActionSignature::new(name, arity), UNBOUNDED);
        slot.seed = entries.first().map(|(r, _)| r.clone());
        for (rule, prob) in entries {
            if rule.action().arity() != arity {
                return Err(ParseError::malformed("slot", "rules disagree on action arity"));
            }
            slot.rules.add_with_weight(rule, prob);
        }
        Ok(slot)
    }
}

/// Splits `(a)(b (c))` into `["a", "b (c)"]`.
fn balanced_groups(body: &str) -> Result<Vec<&str>, ParseError> {
    let mut groups = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (i, c) in body.char_indices() {
        match c {
            '(' => {
                if depth == 0 {
                    start = i + 1;
                }
                depth += 1;
            }
            ')' => {
                depth = depth.checked_sub(1).ok_or_else(|| ParseError::UnexpectedToken {
                    token: ")".to_string(),
                    offset: i,
                })?;
                if depth == 0 {
                    groups.push(&body[start..i]);
                }
            }
            c if depth == 0 && !c.is_whitespace() => {
                return Err(ParseError::UnexpectedToken {
                    token: c.to_string(),
                    offset: i,
                });
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(ParseError::UnexpectedEnd { context: "slot rule entry" });
    }
    Ok(groups)
}
