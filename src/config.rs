//! Cross-entropy search parameters.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::unification::Unifier;

/// Parameters of the cross-entropy rule search.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrossEntropyConfig {
    /// Moving-average step size applied to distributions and slot values.
    pub step_size: f64,
    /// Fraction of samples kept as elites.
    pub selection_ratio: f64,
    /// Minimum number of elites, whatever the ratio.
    pub min_elites: usize,
    /// Usage threshold (fraction of slot size) below which rules are boosted.
    pub influence_threshold: f64,
    /// Boost factor for under-used rules.
    pub influence_boost: f64,
    /// Cap on a slot's selection-probability SD.
    pub max_slot_sd: f64,
    /// Slot convergence below which a slot counts as converged.
    pub convergence_threshold: f64,
    /// Unification cost of dropping an unmatched fact.
    pub drop_penalty: u64,
    /// Bound on unification search nodes.
    pub max_unification_branches: usize,
}

impl Default for CrossEntropyConfig {
    fn default() -> Self {
        Self {
            step_size: 0.6,
            selection_ratio: 0.05,
            min_elites: 1,
            influence_threshold: 0.5,
            influence_boost: 1.0,
            max_slot_sd: 0.5,
            convergence_threshold: 0.1,
            drop_penalty: 1000,
            max_unification_branches: 100_000,
        }
    }
}

fn check_unit(field: &'static str, value: f64, allow_zero: bool) -> Result<(), ValidationError> {
    let ok = value.is_finite() && value <= 1.0 && (value > 0.0 || (allow_zero && value == 0.0));
    if ok {
        Ok(())
    } else {
        Err(ValidationError::OutOfRange {
            field,
            value,
            range: if allow_zero { "[0, 1]" } else { "(0, 1]" },
        })
    }
}

impl CrossEntropyConfig {
    /// Validate parameters.
    ///
    /// This must be called before constructing a `LearningContext`.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::OutOfRange` for the first invalid field.
    pub fn validate(&self) -> Result<(), ValidationError> {
        check_unit("step_size", self.step_size, false)?;
        check_unit("selection_ratio", self.selection_ratio, false)?;
        check_unit("influence_threshold", self.influence_threshold, true)?;
        check_unit("convergence_threshold", self.convergence_threshold, true)?;
        if self.min_elites == 0 {
            return Err(ValidationError::OutOfRange {
                field: "min_elites",
                value: 0.0,
                range: ">= 1",
            });
        }
        if !(self.influence_boost.is_finite() && self.influence_boost >= 0.0) {
            return Err(ValidationError::OutOfRange {
                field: "influence_boost",
                value: self.influence_boost,
                range: ">= 0",
            });
        }
        if !(self.max_slot_sd.is_finite() && self.max_slot_sd >= 0.0) {
            return Err(ValidationError::OutOfRange {
                field: "max_slot_sd",
                value: self.max_slot_sd,
                range: ">= 0",
            });
        }
        if self.drop_penalty == 0 {
            return Err(ValidationError::OutOfRange {
                field: "drop_penalty",
                value: 0.0,
                range: ">= 1",
            });
        }
        if self.max_unification_branches == 0 {
            return Err(ValidationError::OutOfRange {
                field: "max_unification_branches",
                value: 0.0,
                range: ">= 1",
            });
        }
        Ok(())
    }

    /// Unifier configured with this search's limits.
    #[must_use]
    pub const fn unifier(&self) -> Unifier {
        Unifier::new()
            .with_drop_penalty(self.drop_penalty)
            .with_max_branches(self.max_unification_branches)
    }
}
