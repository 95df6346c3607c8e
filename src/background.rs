//! Background knowledge and condition simplification.
//!
//! Background knowledge is a set of domain implications written in the rule
//! grammar, with the postcondition wrapped in `assert`:
//!
//! ```text
//! (on ?X ?Y) => (assert (not (clear ?Y)))
//! (block ?X) (clear ?X) <=> (assert (free ?X))
//! ```
//!
//! `=>` is a one-directional implication; `<=>` marks an equivalence whose
//! precondition set may be rewritten into the postcondition.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ParseError;
use crate::predicate::{Predicate, Substitution};
use crate::rule::IMPLIES;
use crate::syntax::{self, SExpr};
use crate::term::Term;

/// Separator of an equivalence.
pub const EQUIVALENT: &str = "<=>";

/// Keyword wrapping the postcondition.
pub const ASSERT: &str = "assert";

/// Bound on rewrite passes; cyclic equivalences stop here.
const MAX_PASSES: usize = 64;

/// A domain implication `preconditions => postcondition`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BackgroundKnowledge {
    preconditions: BTreeSet<Predicate>,
    postcondition: Predicate,
    #[serde(default)]
    equivalence: bool,
}

impl BackgroundKnowledge {
    /// Creates a one-directional implication.
    ///
    /// # Errors
    ///
    /// Returns `ParseError::Malformed` if the precondition set is empty or
    /// the postcondition uses a variable the preconditions do not bind.
    pub fn implication(
        preconditions: impl IntoIterator<Item = Predicate>,
        postcondition: Predicate,
    ) -> Result<Self, ParseError> {
        Self::build(preconditions.into_iter().collect(), postcondition, false)
    }

    /// Creates an equivalence.
    ///
    /// # Errors
    ///
    /// Same conditions as [`BackgroundKnowledge::implication`].
    pub fn equivalence(
        preconditions: impl IntoIterator<Item = Predicate>,
        postcondition: Predicate,
    ) -> Result<Self, ParseError> {
        Self::build(preconditions.into_iter().collect(), postcondition, true)
    }

    fn build(
        preconditions: BTreeSet<Predicate>,
        postcondition: Predicate,
        equivalence: bool,
    ) -> Result<Self, ParseError> {
        if preconditions.is_empty() {
            return Err(ParseError::malformed("background knowledge", "no preconditions"));
        }
        let bound: BTreeSet<String> = preconditions.iter().flat_map(Predicate::variables).collect();
        if let Some(free) = postcondition.variables().into_iter().find(|v| !bound.contains(v)) {
            return Err(ParseError::malformed(
                "background knowledge",
                format!("postcondition variable ?{free} is not bound by a precondition"),
            ));
        }
        Ok(Self {
            preconditions,
            postcondition,
            equivalence,
        })
    }

    /// Precondition set.
    #[must_use]
    pub const fn preconditions(&self) -> &BTreeSet<Predicate> {
        &self.preconditions
    }

    /// Asserted postcondition.
    #[must_use]
    pub const fn postcondition(&self) -> &Predicate {
        &self.postcondition
    }

    /// True for `<=>` knowledge.
    #[must_use]
    pub const fn is_equivalence(&self) -> bool {
        self.equivalence
    }

    /// Every way the preconditions match inside `conditions`.
    ///
    /// Each result pairs the substitution (from knowledge variables to
    /// condition terms) with the conditions that were matched.
    fn matches(&self, conditions: &BTreeSet<Predicate>) -> Vec<(Substitution, Vec<Predicate>)> {
        let patterns: Vec<&Predicate> = self.preconditions.iter().collect();
        let mut found = Vec::new();
        let mut stack = vec![(0usize, Substitution::new(), Vec::new())];
        while let Some((depth, sub, matched)) = stack.pop() {
            let Some(pattern) = patterns.get(depth) else {
                found.push((sub, matched));
                continue;
            };
            for condition in conditions {
                if let Some(extended) = match_pattern(pattern, condition, &sub) {
                    let mut matched = matched.clone();
                    matched.push(condition.clone());
                    stack.push((depth + 1, extended, matched));
                }
            }
        }
        found
    }
}

/// Matches a knowledge pattern against one condition.
///
/// Knowledge variables bind consistently to any named condition term,
/// the anonymous placeholder matches anything and everything else must be
/// identical.
fn match_pattern(pattern: &Predicate, condition: &Predicate, sub: &Substitution) -> Option<Substitution> {
    if !pattern.same_shape(condition) {
        return None;
    }
    let mut sub = sub.clone();
    for (p, c) in pattern.args().iter().zip(condition.args()) {
        match p {
            Term::Anonymous => {}
            Term::Variable { .. } => match sub.get(p) {
                Some(bound) if bound == c => {}
                Some(_) => return None,
                None if c.is_anonymous() => return None,
                None => {
                    sub.insert(p.clone(), c.clone());
                }
            },
            _ if p == c => {}
            _ => return None,
        }
    }
    Some(sub)
}

impl fmt::Display for BackgroundKnowledge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for pre in &self.preconditions {
            write!(f, "{pre} ")?;
        }
        let arrow = if self.equivalence { EQUIVALENT } else { IMPLIES };
        write!(f, "{arrow} ({ASSERT} {})", self.postcondition)
    }
}

impl FromStr for BackgroundKnowledge {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let exprs = syntax::read_all(s)?;
        let split = exprs
            .iter()
            .position(|e| matches!(e.as_atom(), Some(IMPLIES | EQUIVALENT)))
            .ok_or(ParseError::UnexpectedEnd {
                context: "background knowledge separator",
            })?;
        let equivalence = exprs[split].as_atom() == Some(EQUIVALENT);

        let preconditions = exprs[..split]
            .iter()
            .map(syntax::predicate)
            .collect::<Result<BTreeSet<_>, _>>()?;

        let postcondition = match &exprs[split + 1..] {
            [assert] => assertion(assert)?,
            [] => {
                return Err(ParseError::UnexpectedEnd {
                    context: "background knowledge postcondition",
                })
            }
            [_, extra, ..] => {
                return Err(ParseError::UnexpectedToken {
                    token: extra.as_atom().unwrap_or("(").to_string(),
                    offset: extra.offset(),
                })
            }
        };
        Self::build(preconditions, postcondition, equivalence)
    }
}

/// Interprets `(assert (pred ...))`.
fn assertion(expr: &SExpr) -> Result<Predicate, ParseError> {
    match expr.as_list() {
        Some([head, inner]) if head.as_atom() == Some(ASSERT) => syntax::predicate(inner),
        _ => Err(ParseError::malformed(
            "background knowledge",
            format!("postcondition must be ({ASSERT} (pred ...))"),
        )),
    }
}

/// Result of simplifying a condition set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Simplification {
    /// The simplified, consistent condition set.
    Simplified(BTreeSet<Predicate>),
    /// The conditions can never hold together.
    Contradiction,
}

impl Simplification {
    /// True for `Contradiction`.
    #[must_use]
    pub const fn is_contradiction(&self) -> bool {
        matches!(self, Self::Contradiction)
    }

    /// The simplified conditions, unless contradictory.
    #[must_use]
    pub fn into_conditions(self) -> Option<BTreeSet<Predicate>> {
        match self {
            Self::Simplified(conditions) => Some(conditions),
            Self::Contradiction => None,
        }
    }
}

enum Step {
    Changed(BTreeSet<Predicate>),
    Contradiction,
    Fixed,
}

/// Prunes redundant and illegal conditions using background knowledge.
///
/// # Examples
///
/// ```
/// use cerrla::{parse_predicates, BackgroundKnowledge, ConditionSimplifier};
///
/// let bk: BackgroundKnowledge = "(on ?X ?Y) => (assert (not (clear ?Y)))".parse().unwrap();
/// let simplifier = ConditionSimplifier::new([bk]);
///
/// let redundant = parse_predicates("(on ?A ?B) (not (clear ?B))").unwrap();
/// let simplified = simplifier.simplify(&redundant).into_conditions().unwrap();
/// assert_eq!(simplified, parse_predicates("(on ?A ?B)").unwrap());
///
/// let illegal = parse_predicates("(on ?A ?B) (clear ?B)").unwrap();
/// assert!(simplifier.simplify(&illegal).is_contradiction());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionSimplifier {
    knowledge: Vec<BackgroundKnowledge>,
}

impl ConditionSimplifier {
    /// Creates a simplifier over the given knowledge, applied in order.
    #[must_use]
    pub fn new(knowledge: impl IntoIterator<Item = BackgroundKnowledge>) -> Self {
        Self {
            knowledge: knowledge.into_iter().collect(),
        }
    }

    /// Knowledge in application order.
    #[must_use]
    pub fn knowledge(&self) -> &[BackgroundKnowledge] {
        &self.knowledge
    }

    /// Appends one piece of knowledge.
    pub fn push(&mut self, knowledge: BackgroundKnowledge) {
        self.knowledge.push(knowledge);
    }

    /// Simplifies `conditions` to a fixed point.
    ///
    /// A condition and its negation together, or a condition whose negation
    /// is implied by the others, is a contradiction. A condition implied by
    /// the others is removed. A matched equivalence replaces its
    /// preconditions with its postcondition.
    #[must_use]
    pub fn simplify(&self, conditions: &BTreeSet<Predicate>) -> Simplification {
        let mut current = conditions.clone();
        for _ in 0..MAX_PASSES {
            if current.iter().any(|c| !c.is_negated() && current.contains(&c.negate())) {
                return Simplification::Contradiction;
            }
            match self.step(&current) {
                Step::Changed(next) => current = next,
                Step::Contradiction => return Simplification::Contradiction,
                Step::Fixed => return Simplification::Simplified(current),
            }
        }
        tracing::warn!(
            conditions = current.len(),
            "condition simplification did not reach a fixed point"
        );
        Simplification::Simplified(current)
    }

    fn step(&self, conditions: &BTreeSet<Predicate>) -> Step {
        for bk in &self.knowledge {
            for (sub, matched) in bk.matches(conditions) {
                let Some(post) = bk.postcondition.replace_arguments(&sub, false) else {
                    continue;
                };
                if matched.contains(&post) {
                    continue;
                }
                if conditions.contains(&post.negate()) {
                    tracing::debug!(knowledge = %bk, "conditions contradict background knowledge");
                    return Step::Contradiction;
                }
                if conditions.contains(&post) {
                    let mut next = conditions.clone();
                    next.remove(&post);
                    return Step::Changed(next);
                }
                if bk.equivalence {
                    let mut next = conditions.clone();
                    for m in &matched {
                        next.remove(m);
                    }
                    next.insert(post);
                    return Step::Changed(next);
                }
            }
        }
        Step::Fixed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predicate::parse_predicates;

    fn bk(s: &str) -> BackgroundKnowledge {
        s.parse().unwrap()
    }

    fn set(s: &str) -> BTreeSet<Predicate> {
        parse_predicates(s).unwrap()
    }

    #[test]
    fn display_round_trip() {
        for text in [
            "(on ?X ?Y) => (assert (not (clear ?Y)))",
            "(block ?X) (clear ?X) <=> (assert (free ?X))",
        ] {
            assert_eq!(bk(text).to_string(), text);
        }
    }

    #[test]
    fn rejects_malformed_text() {
        assert!("(on ?X ?Y)".parse::<BackgroundKnowledge>().is_err());
        assert!("=> (assert (clear a))".parse::<BackgroundKnowledge>().is_err());
        assert!("(on ?X ?Y) => (clear ?Y)".parse::<BackgroundKnowledge>().is_err());
        assert!("(on ?X ?Y) => (assert (clear ?Z))".parse::<BackgroundKnowledge>().is_err());
    }

    #[test]
    fn removes_implied_condition() {
        let simplifier = ConditionSimplifier::new([bk("(on ?X ?Y) => (assert (above ?X ?Y))")]);
        let result = simplifier.simplify(&set("(on ?A ?B) (above ?A ?B) (clear ?A)"));
        assert_eq!(result, Simplification::Simplified(set("(on ?A ?B) (clear ?A)")));
    }

    #[test]
    fn detects_implied_contradiction() {
        let simplifier = ConditionSimplifier::new([bk("(on ?X ?Y) => (assert (not (clear ?Y)))")]);
        assert!(simplifier.simplify(&set("(on ?A ?B) (clear ?B)")).is_contradiction());
        assert!(!simplifier.simplify(&set("(on ?A ?B) (clear ?A)")).is_contradiction());
    }

    #[test]
    fn detects_complementary_literals() {
        let simplifier = ConditionSimplifier::default();
        assert!(simplifier.simplify(&set("(clear ?A) (not (clear ?A))")).is_contradiction());
    }

    #[test]
    fn equivalence_rewrites_preconditions() {
        let simplifier = ConditionSimplifier::new([bk("(block ?X) (clear ?X) <=> (assert (free ?X))")]);
        let result = simplifier.simplify(&set("(block ?A) (clear ?A) (on ?A ?B)"));
        assert_eq!(result, Simplification::Simplified(set("(free ?A) (on ?A ?B)")));
    }

    #[test]
    fn anonymous_pattern_matches_any_term() {
        let simplifier = ConditionSimplifier::new([bk("(on ? ?Y) => (assert (not (clear ?Y)))")]);
        assert!(simplifier.simplify(&set("(on ?A b) (clear b)")).is_contradiction());
    }

    #[test]
    fn variables_never_bind_anonymous_terms() {
        let simplifier = ConditionSimplifier::new([bk("(on ?X ?Y) => (assert (not (clear ?Y)))")]);
        let conditions = set("(on ?A ?) (clear ?B)");
        assert_eq!(simplifier.simplify(&conditions), Simplification::Simplified(conditions));
    }

    #[test]
    fn cyclic_equivalences_terminate() {
        let simplifier = ConditionSimplifier::new([
            bk("(a ?X) <=> (assert (b ?X))"),
            bk("(b ?X) <=> (assert (a ?X))"),
        ]);
        let result = simplifier.simplify(&set("(a ?A)"));
        assert!(!result.is_contradiction());
    }
}
