//! Fact-base collaborator.
//!
//! Policies evaluate their rules against a state through the [`FactBase`]
//! trait. Environments bring their own implementation; [`InMemoryFactBase`]
//! is a reference backend for embedding and tests.

mod memory;

use std::collections::BTreeSet;

use crate::error::FactBaseError;
use crate::predicate::{Predicate, Substitution};

pub use memory::InMemoryFactBase;
pub(crate) use memory::{binding_key, match_fact};

/// A queryable store of ground facts.
///
/// Implementations must be safe to share: ensemble evaluation queries one
/// snapshot from several threads at once.
pub trait FactBase: Send + Sync {
    /// Returns every binding of the pattern's variables that satisfies all
    /// of `pattern` at once.
    ///
    /// Positive patterns must match a stored fact. Negated patterns succeed
    /// when no stored fact matches them (negation as failure). Range
    /// arguments bind only numbers inside the range. The anonymous
    /// placeholder matches any term and is never bound.
    fn query(&self, pattern: &[Predicate]) -> Result<Vec<Substitution>, FactBaseError>;

    /// Stores a ground, positive fact. Returns `false` if it was already present.
    fn assert_fact(&self, fact: Predicate) -> Result<bool, FactBaseError>;

    /// Removes a fact. Returns `false` if it was not present.
    fn retract_fact(&self, fact: &Predicate) -> Result<bool, FactBaseError>;

    /// Snapshot of every stored fact.
    fn facts(&self) -> Result<BTreeSet<Predicate>, FactBaseError>;

    /// True if the conjunction has at least one satisfying binding.
    fn holds(&self, pattern: &[Predicate]) -> Result<bool, FactBaseError> {
        Ok(!self.query(pattern)?.is_empty())
    }
}
