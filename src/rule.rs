//! Relational rules.
//!
//! A rule is a set of precondition predicates and one action predicate:
//!
//! ```text
//! (clear ?A) (clear ?B) (not (on ?A ?B)) => (move ?A ?B)
//! ```
//!
//! Rules are values. Identity, equality and ordering consider only the
//! conditions and the action; provenance is carried alongside.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ParseError;
use crate::predicate::Predicate;
use crate::syntax;
use crate::term::Term;

/// Separator between conditions and the action.
pub const IMPLIES: &str = "=>";

/// Stable structural identifier of a rule: the blake3 hash of its canonical text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleId([u8; 32]);

impl RuleId {
    /// Hashes the canonical text of a rule.
    #[must_use]
    pub fn of(rule: &Rule) -> Self {
        Self(*blake3::hash(rule.to_string().as_bytes()).as_bytes())
    }

    /// Raw hash bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0[..8] {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

/// Canonical name of the variable bound to the `index`-th action argument.
#[must_use]
pub fn action_variable(index: usize) -> String {
    const LETTERS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
    match LETTERS.get(index) {
        Some(c) => char::from(*c).to_string(),
        None => format!("A{index}"),
    }
}

/// A condition set paired with one action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    conditions: BTreeSet<Predicate>,
    action: Predicate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    parent: Option<RuleId>,
}

impl Rule {
    /// Creates a rule without provenance.
    #[must_use]
    pub fn new(conditions: impl IntoIterator<Item = Predicate>, action: Predicate) -> Self {
        Self {
            conditions: conditions.into_iter().collect(),
            action,
            parent: None,
        }
    }

    /// Returns a copy recording `parent` as the rule this one specializes.
    #[must_use]
    pub fn with_parent(mut self, parent: RuleId) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Structural identifier.
    #[must_use]
    pub fn id(&self) -> RuleId {
        RuleId::of(self)
    }

    /// Precondition set.
    #[must_use]
    pub const fn conditions(&self) -> &BTreeSet<Predicate> {
        &self.conditions
    }

    /// Action (head) predicate.
    #[must_use]
    pub const fn action(&self) -> &Predicate {
        &self.action
    }

    /// Rule this one was specialized from, if any.
    #[must_use]
    pub const fn parent(&self) -> Option<RuleId> {
        self.parent
    }

    /// Arguments of the action predicate.
    #[must_use]
    pub fn action_terms(&self) -> &[Term] {
        self.action.args()
    }

    /// Returns a copy with `condition` added, recording this rule as parent.
    ///
    /// Returns `None` if the condition is already present.
    #[must_use]
    pub fn specialize(&self, condition: Predicate) -> Option<Self> {
        if self.conditions.contains(&condition) {
            return None;
        }
        let mut conditions = self.conditions.clone();
        conditions.insert(condition);
        Some(Self {
            conditions,
            action: self.action.clone(),
            parent: Some(self.id()),
        })
    }

    /// Returns a copy with a replaced condition set and the same provenance.
    #[must_use]
    pub fn with_conditions(&self, conditions: BTreeSet<Predicate>) -> Self {
        Self {
            conditions,
            action: self.action.clone(),
            parent: self.parent,
        }
    }

    /// True if this rule has the same action and a strict superset of `other`'s conditions.
    #[must_use]
    pub fn is_specialization_of(&self, other: &Self) -> bool {
        self.action == other.action
            && self.conditions.len() > other.conditions.len()
            && other.conditions.is_subset(&self.conditions)
    }
}

impl PartialEq for Rule {
    fn eq(&self, other: &Self) -> bool {
        self.action == other.action && self.conditions == other.conditions
    }
}

impl Eq for Rule {}

impl Hash for Rule {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.action.hash(state);
        self.conditions.hash(state);
    }
}

impl PartialOrd for Rule {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Rule {
    fn cmp(&self, other: &Self) -> Ordering {
        self.action
            .cmp(&other.action)
            .then_with(|| self.conditions.cmp(&other.conditions))
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for condition in &self.conditions {
            write!(f, "{condition} ")?;
        }
        write!(f, "{IMPLIES} {}", self.action)
    }
}

impl FromStr for Rule {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let exprs = syntax::read_all(s)?;
        let split = exprs
            .iter()
            .position(|e| e.as_atom() == Some(IMPLIES))
            .ok_or_else(|| ParseError::malformed("rule", format!("missing '{IMPLIES}'")))?;

        let conditions = exprs[..split]
            .iter()
            .map(syntax::predicate)
            .collect::<Result<BTreeSet<_>, _>>()?;

        match &exprs[split + 1..] {
            [action] => {
                let action = syntax::predicate(action)?;
                if action.is_negated() {
                    return Err(ParseError::malformed("rule", "action cannot be negated"));
                }
                Ok(Self::new(conditions, action))
            }
            [] => Err(ParseError::UnexpectedEnd { context: "rule action" }),
            [_, extra, ..] => Err(ParseError::UnexpectedToken {
                token: extra.as_atom().unwrap_or("(").to_string(),
                offset: extra.offset(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MOVE: &str = "(clear ?A) (clear ?B) (not (on ?A ?B)) => (move ?A ?B)";

    #[test]
    fn parse_and_print_round_trip() {
        let rule: Rule = MOVE.parse().unwrap();
        assert_eq!(rule.conditions().len(), 3);
        assert_eq!(rule.action().name(), "move");
        let printed = rule.to_string();
        let reparsed: Rule = printed.parse().unwrap();
        assert_eq!(rule, reparsed);
        assert_eq!(printed, reparsed.to_string());
    }

    #[test]
    fn parse_rule_without_conditions() {
        let rule: Rule = "=> (noop)".parse().unwrap();
        assert!(rule.conditions().is_empty());
        assert_eq!(rule.to_string(), "=> (noop)");
    }

    #[test]
    fn parse_rejects_malformed() {
        assert!("(clear ?A) (move ?A)".parse::<Rule>().is_err());
        assert!("(clear ?A) =>".parse::<Rule>().is_err());
        assert!("(clear ?A) => (not (move ?A))".parse::<Rule>().is_err());
        assert!("(clear ?A => (move ?A)".parse::<Rule>().is_err());
    }

    #[test]
    fn id_is_structural() {
        let a: Rule = MOVE.parse().unwrap();
        let b: Rule = "(not (on ?A ?B)) (clear ?B) (clear ?A) => (move ?A ?B)"
            .parse()
            .unwrap();
        assert_eq!(a.id(), b.id());
        let c: Rule = "(clear ?A) => (move ?A ?B)".parse().unwrap();
        assert_ne!(a.id(), c.id());
    }

    #[test]
    fn specialization_records_parent() {
        let base: Rule = "(clear ?A) => (move ?A ?B)".parse().unwrap();
        let child = base.specialize("(clear ?B)".parse().unwrap()).unwrap();
        assert_eq!(child.parent(), Some(base.id()));
        assert!(child.is_specialization_of(&base));
        assert!(!base.is_specialization_of(&child));
        assert!(base.specialize("(clear ?A)".parse().unwrap()).is_none());
    }

    #[test]
    fn provenance_does_not_affect_equality() {
        let base: Rule = "(clear ?A) => (move ?A ?B)".parse().unwrap();
        let tagged = base.clone().with_parent(RuleId::of(&base));
        assert_eq!(base, tagged);
    }

    #[test]
    fn action_variables() {
        assert_eq!(action_variable(0), "A");
        assert_eq!(action_variable(25), "Z");
        assert_eq!(action_variable(26), "A26");
    }
}
