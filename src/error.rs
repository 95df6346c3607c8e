//! Error types for cerrla.
//!
//! All errors are strongly typed using thiserror. Normal algorithmic
//! outcomes (a failed unification, an empty distribution, an incomplete
//! substitution) are values, not errors; the enums below cover malformed
//! input, invalid configuration, capacity violations and failures reported
//! by the external fact base.

use thiserror::Error;

use crate::slot::ActionSignature;

/// Errors raised while parsing rule, predicate, background-knowledge or
/// slot text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("Unexpected end of input while parsing {context}")]
    UnexpectedEnd {
        context: &'static str,
    },

    #[error("Unexpected token '{token}' at offset {offset}")]
    UnexpectedToken {
        token: String,
        offset: usize,
    },

    #[error("Malformed {kind}: {reason}")]
    Malformed {
        kind: &'static str,
        reason: String,
    },

    #[error("Invalid probability '{value}'")]
    InvalidProbability {
        value: String,
    },
}

impl ParseError {
    /// Creates a `Malformed` error.
    #[must_use]
    pub fn malformed(kind: &'static str, reason: impl Into<String>) -> Self {
        Self::Malformed {
            kind,
            reason: reason.into(),
        }
    }
}

/// Validation errors for configuration and arguments.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Parameter '{field}' = {value} is out of range {range}")]
    OutOfRange {
        field: &'static str,
        value: f64,
        range: &'static str,
    },

    #[error("Term alignment mismatch: {old} old terms vs {new} new terms")]
    AlignmentMismatch {
        old: usize,
        new: usize,
    },
}

/// Errors raised by slot mutation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SlotError {
    #[error("Slot {signature} is at capacity ({capacity} rules)")]
    CapacityExceeded {
        signature: ActionSignature,
        capacity: usize,
    },

    #[error("Rule action does not match slot {signature}: {action}")]
    SignatureMismatch {
        signature: ActionSignature,
        action: String,
    },

    #[error("Slot {signature} is fixed and cannot be modified")]
    Fixed {
        signature: ActionSignature,
    },

    #[error("No slot for action {signature}")]
    UnknownSlot {
        signature: ActionSignature,
    },
}

/// Failures reported by the fact-base collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FactBaseError {
    #[error("Query failed: {message}")]
    QueryFailed {
        message: String,
    },

    #[error("Fact is not ground: {fact}")]
    NonGroundFact {
        fact: String,
    },

    #[error("Negated facts cannot be stored: {fact}")]
    NegatedFact {
        fact: String,
    },

    #[error("Fact base backend error: {0}")]
    Backend(String),
}

/// Top-level error type.
#[derive(Debug, Error)]
pub enum CerrlaError {
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Slot error: {0}")]
    Slot(#[from] SlotError),

    #[error("Fact base error: {0}")]
    FactBase(#[from] FactBaseError),
}

impl CerrlaError {
    /// Returns true if this is a parse error.
    #[must_use]
    pub const fn is_parse(&self) -> bool {
        matches!(self, Self::Parse(_))
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is a slot error.
    #[must_use]
    pub const fn is_slot(&self) -> bool {
        matches!(self, Self::Slot(_))
    }

    /// Returns true if this error came from the fact base.
    #[must_use]
    pub const fn is_fact_base(&self) -> bool {
        matches!(self, Self::FactBase(_))
    }
}

/// Result type alias for cerrla operations.
pub type CerrlaResult<T> = Result<T, CerrlaError>;
