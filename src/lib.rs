//! # cerrla - Cross-Entropy Relational Reinforcement Learning
//!
//! cerrla learns decision policies expressed as ordered sets of relational
//! rules. Candidate rules for each action live in a [`Slot`], which keeps a
//! [`ProbabilityDistribution`] over rule variants; policies are sampled from
//! the slots, evaluated against a [`FactBase`], and the distributions are
//! nudged toward the best performers by a cross-entropy update.
//!
//! ## Core Concepts
//!
//! - **Predicate**: a named tuple of terms with a negation flag
//! - **Rule**: a condition set and one action
//! - **Slot**: the rule variants and selection statistics of one action signature
//! - **Unifier**: generalizes a rule's conditions so they also cover a new state
//! - **Policy**: an ordered rule list evaluated against a state
//!
//! ## Usage
//!
//! ```rust
//! use cerrla::{parse_predicates, Predicate, RuleBase, Coverage, CrossEntropyConfig};
//!
//! let mut rule_base = RuleBase::new(&CrossEntropyConfig::default());
//! let action: Predicate = "(move a b)".parse()?;
//!
//! let first = parse_predicates("(clear a) (clear b) (on a c)")?;
//! assert!(matches!(rule_base.cover(&first, &action)?, Coverage::Created(_)));
//!
//! let second = parse_predicates("(clear a) (clear b) (on a d)")?;
//! let Coverage::Generalized(rule) = rule_base.cover(&second, &action)? else {
//!     panic!("expected a generalized seed");
//! };
//! assert_eq!(rule.to_string(), "(clear ?A) (clear ?B) (on ?A ?) => (move ?A ?B)");
//! # Ok::<(), cerrla::CerrlaError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Value types and grammars
pub mod background;
pub mod error;
pub mod goal;
pub mod predicate;
pub mod rule;
mod syntax;
pub mod term;

// Learning machinery
pub mod config;
pub mod context;
pub mod distribution;
pub mod facts;
pub mod policy;
pub mod rule_base;
pub mod slot;
pub mod unification;
pub mod update;

pub use background::{BackgroundKnowledge, ConditionSimplifier, Simplification};
pub use config::CrossEntropyConfig;
pub use context::LearningContext;
pub use distribution::ProbabilityDistribution;
pub use error::{CerrlaError, CerrlaResult, FactBaseError, ParseError, SlotError, ValidationError};
pub use facts::{FactBase, InMemoryFactBase};
pub use goal::GoalCondition;
pub use policy::{
    Policy, PolicyEnsemble, PolicyId, PolicyRule, ProposedAction, ProposedActions, SamplingOptions,
    VoteOutcome,
};
pub use predicate::{parse_predicates, Predicate, Substitution};
pub use rule::{Rule, RuleId};
pub use rule_base::{Coverage, Retirement, RuleBase};
pub use slot::{ActionSignature, Slot};
pub use term::Term;
pub use unification::{UnificationOutcome, UnificationVerdict, Unifier};
pub use update::{EliteSet, SampleRecord, SlotStatistics, UpdateSummary};
