//! Cross-entropy updates.
//!
//! After a batch of sampled policies has been evaluated, the best-scoring
//! fraction (the elites) determines where every slot moves: rule
//! distributions shift toward the rules that fired in elite policies, and
//! slot selection/ordering statistics shift toward the elites' usage.
//! Every new value is computed before any slot is written.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::config::CrossEntropyConfig;
use crate::policy::{Policy, PolicyId};
use crate::rule::Rule;
use crate::rule_base::RuleBase;
use crate::slot::ActionSignature;

/// What one evaluated policy contributes to the update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleRecord {
    /// Policy the record was taken from.
    pub policy: PolicyId,
    /// Episode value; larger is better.
    pub value: f64,
    /// Rules that fired, with their slot.
    pub fired: Vec<(ActionSignature, Rule)>,
    /// Relative position of each slot in the policy.
    pub positions: BTreeMap<ActionSignature, f64>,
}

impl SampleRecord {
    /// Extracts the statistics of an evaluated policy.
    #[must_use]
    pub fn from_policy(policy: &Policy, value: f64) -> Self {
        let fired = policy
            .triggered_rules()
            .filter_map(|entry| Some((entry.slot.clone()?, entry.rule.clone())))
            .collect();
        Self {
            policy: policy.id(),
            value,
            fired,
            positions: policy.slot_positions(),
        }
    }

    fn uses_of(&self, signature: &ActionSignature) -> usize {
        self.fired.iter().filter(|(s, _)| s == signature).count()
    }
}

/// Aggregated elite statistics for one slot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SlotStatistics {
    /// Mean number of fired rules per elite.
    pub mean_uses: f64,
    /// SD of fired rules per elite.
    pub sd_uses: f64,
    /// Mean relative position over the elites that contain the slot.
    pub ordering: Option<f64>,
}

/// What [`EliteSet::apply`] changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateSummary {
    /// Slots whose rule distribution changed.
    pub distributions: usize,
    /// Slots whose selection and ordering values were updated.
    pub slots: usize,
}

/// The elite samples of one iteration and their aggregated statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct EliteSet {
    elites: Vec<SampleRecord>,
    rule_counts: HashMap<ActionSignature, HashMap<Rule, f64>>,
    slot_statistics: BTreeMap<ActionSignature, SlotStatistics>,
}

impl EliteSet {
    /// Picks the top `ceil(selection_ratio * n)` samples (at least
    /// `min_elites`, at most `n`) and aggregates them.
    ///
    /// Samples with a non-finite value are discarded first. Equal values keep
    /// their input order.
    #[must_use]
    pub fn select(samples: &[SampleRecord], config: &CrossEntropyConfig) -> Self {
        let mut ranked: Vec<&SampleRecord> = samples.iter().filter(|s| s.value.is_finite()).collect();
        if ranked.len() < samples.len() {
            tracing::warn!(
                discarded = samples.len() - ranked.len(),
                "discarding samples with non-finite values"
            );
        }
        ranked.sort_by(|a, b| b.value.total_cmp(&a.value));

        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let wanted = (config.selection_ratio * ranked.len() as f64).ceil() as usize;
        let count = wanted.max(config.min_elites).min(ranked.len());
        let elites: Vec<SampleRecord> = ranked.into_iter().take(count).cloned().collect();

        let mut rule_counts: HashMap<ActionSignature, HashMap<Rule, f64>> = HashMap::new();
        let mut signatures: Vec<&ActionSignature> = Vec::new();
        for elite in &elites {
            for (signature, rule) in &elite.fired {
                *rule_counts
                    .entry(signature.clone())
                    .or_default()
                    .entry(rule.clone())
                    .or_insert(0.0) += 1.0;
            }
            signatures.extend(elite.positions.keys());
            signatures.extend(elite.fired.iter().map(|(s, _)| s));
        }
        signatures.sort();
        signatures.dedup();

        let slot_statistics = signatures
            .into_iter()
            .map(|signature| (signature.clone(), statistics(&elites, signature)))
            .collect();

        Self {
            elites,
            rule_counts,
            slot_statistics,
        }
    }

    /// Elite samples, best first.
    #[must_use]
    pub fn elites(&self) -> &[SampleRecord] {
        &self.elites
    }

    /// Number of elites.
    #[must_use]
    pub fn len(&self) -> usize {
        self.elites.len()
    }

    /// True if no sample qualified.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.elites.is_empty()
    }

    /// Statistics for one slot, if any elite involved it.
    #[must_use]
    pub fn slot_statistics(&self, signature: &ActionSignature) -> Option<&SlotStatistics> {
        self.slot_statistics.get(signature)
    }

    /// How many elites fired `rule` in `signature`'s slot.
    #[must_use]
    pub fn rule_count(&self, signature: &ActionSignature, rule: &Rule) -> f64 {
        self.rule_counts
            .get(signature)
            .and_then(|counts| counts.get(rule))
            .copied()
            .unwrap_or(0.0)
    }

    /// Moves every slot of `rule_base` toward the elites by `step_size`.
    ///
    /// Rule distributions of slots that fired in some elite are updated from
    /// the fire counts; selection and ordering values of every non-fixed slot
    /// move toward the elite statistics (a slot no elite used moves toward
    /// zero selection). All updates are computed on copies first and only
    /// then written back. An empty elite set changes nothing.
    pub fn apply(&self, rule_base: &mut RuleBase, step_size: f64) -> UpdateSummary {
        let mut summary = UpdateSummary::default();
        if self.elites.is_empty() {
            return summary;
        }
        #[allow(clippy::cast_precision_loss)]
        let num_elites = self.elites.len() as f64;

        let mut updated = Vec::new();
        for slot in rule_base.slots() {
            if slot.is_fixed() {
                continue;
            }
            let mut next = slot.clone();
            if let Some(counts) = self.rule_counts.get(slot.signature()) {
                if next.update_rules(counts, num_elites, step_size) {
                    summary.distributions += 1;
                }
            }
            let stats = self.slot_statistics.get(slot.signature()).cloned().unwrap_or_default();
            let ordering = stats.ordering.unwrap_or_else(|| slot.ordering());
            next.update_values(ordering, stats.mean_uses, stats.sd_uses, step_size);
            summary.slots += 1;
            updated.push(next);
        }

        for next in updated {
            rule_base.insert_slot(next);
        }
        tracing::debug!(
            elites = self.elites.len(),
            distributions = summary.distributions,
            slots = summary.slots,
            "applied cross-entropy update"
        );
        summary
    }
}

fn statistics(elites: &[SampleRecord], signature: &ActionSignature) -> SlotStatistics {
    #[allow(clippy::cast_precision_loss)]
    let n = elites.len() as f64;
    if elites.is_empty() {
        return SlotStatistics::default();
    }
    #[allow(clippy::cast_precision_loss)]
    let uses: Vec<f64> = elites.iter().map(|e| e.uses_of(signature) as f64).collect();
    let mean_uses = uses.iter().sum::<f64>() / n;
    let variance = uses.iter().map(|u| (u - mean_uses).powi(2)).sum::<f64>() / n;

    let positions: Vec<f64> = elites.iter().filter_map(|e| e.positions.get(signature).copied()).collect();
    #[allow(clippy::cast_precision_loss)]
    let ordering = (!positions.is_empty()).then(|| positions.iter().sum::<f64>() / positions.len() as f64);

    SlotStatistics {
        mean_uses,
        sd_uses: variance.sqrt(),
        ordering,
    }
}
