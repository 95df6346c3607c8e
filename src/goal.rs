//! Goal conditions.
//!
//! A goal condition names the sub-goal a rule or policy fragment works
//! towards. Each kind has its own compact textual form:
//!
//! | Kind | Text | Meaning |
//! |---|---|---|
//! | specific | `on$A$B` | `(on ?G_A ?G_B)` over the episode's goal arguments |
//! | general | `clearEXST` / `clear!EXST` | some / no `clear` fact holds |
//! | accumulative | `scoreACCUM` | as many `score` facts as possible |
//!
//! Parsing tries the grammars in that order and never fails: text that fits
//! none of them becomes [`GoalCondition::Undefined`].

use std::collections::BTreeSet;
use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::predicate::Predicate;
use crate::term::Term;

/// Suffix of existence goals.
pub const EXISTS_SUFFIX: &str = "EXST";

/// Suffix of accumulative goals.
pub const ACCUMULATIVE_SUFFIX: &str = "ACCUM";

/// Prefix of variables standing for goal arguments.
pub const GOAL_VARIABLE_PREFIX: &str = "G_";

struct Grammars {
    specific: Regex,
    general: Regex,
    accumulative: Regex,
}

static GRAMMARS: OnceLock<Option<Grammars>> = OnceLock::new();

fn grammars() -> Option<&'static Grammars> {
    GRAMMARS
        .get_or_init(|| {
            let compiled = (|| {
                Ok::<_, regex::Error>(Grammars {
                    specific: Regex::new(r"^([A-Za-z][\w-]*?)((?:\$[A-Z][A-Za-z0-9]*)+)$")?,
                    general: Regex::new(&format!(r"^([A-Za-z][\w-]*?)(!?){EXISTS_SUFFIX}$"))?,
                    accumulative: Regex::new(&format!(r"^([A-Za-z][\w-]*?){ACCUMULATIVE_SUFFIX}$"))?,
                })
            })();
            if let Err(err) = &compiled {
                tracing::warn!(error = %err, "goal grammars failed to compile");
            }
            compiled.ok()
        })
        .as_ref()
}

/// A parsed goal condition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GoalCondition {
    /// A specific fact over named goal arguments.
    Specific {
        /// Predicate name.
        predicate: String,
        /// Goal-argument slot names, in argument order.
        slots: Vec<String>,
    },
    /// Existence (or absence) of any fact with the given name.
    General {
        /// Predicate name.
        predicate: String,
        /// `false` for the `!EXST` form.
        exists: bool,
    },
    /// Maximize the number of facts with the given name.
    Accumulative {
        /// Predicate name.
        predicate: String,
    },
    /// Text that fits no grammar.
    Undefined {
        /// The unparsed text.
        text: String,
    },
}

impl GoalCondition {
    /// Parses goal text, falling back to `Undefined`.
    ///
    /// # Examples
    ///
    /// ```
    /// use cerrla::GoalCondition;
    ///
    /// let goal = GoalCondition::parse("on$A$B");
    /// assert_eq!(goal.num_args(), 2);
    /// assert_eq!(goal.to_string(), "on$A$B");
    /// assert!(matches!(GoalCondition::parse("clear!EXST"), GoalCondition::General { exists: false, .. }));
    /// assert!(GoalCondition::parse("$$$").is_undefined());
    /// ```
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let text = text.trim();
        Self::parse_specific(text)
            .or_else(|| Self::parse_general(text))
            .or_else(|| Self::parse_accumulative(text))
            .unwrap_or_else(|| Self::Undefined {
                text: text.to_string(),
            })
    }

    fn parse_specific(text: &str) -> Option<Self> {
        let caps = grammars()?.specific.captures(text)?;
        let slots = caps[2]
            .split('$')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        Some(Self::Specific {
            predicate: caps[1].to_string(),
            slots,
        })
    }

    fn parse_general(text: &str) -> Option<Self> {
        let caps = grammars()?.general.captures(text)?;
        Some(Self::General {
            predicate: caps[1].to_string(),
            exists: caps[2].is_empty(),
        })
    }

    fn parse_accumulative(text: &str) -> Option<Self> {
        let caps = grammars()?.accumulative.captures(text)?;
        Some(Self::Accumulative {
            predicate: caps[1].to_string(),
        })
    }

    /// Number of goal arguments the condition refers to.
    #[must_use]
    pub fn num_args(&self) -> usize {
        match self {
            Self::Specific { slots, .. } => slots.iter().collect::<BTreeSet<_>>().len(),
            Self::General { .. } | Self::Accumulative { .. } | Self::Undefined { .. } => 0,
        }
    }

    /// Predicate name, if defined.
    #[must_use]
    pub fn predicate_name(&self) -> Option<&str> {
        match self {
            Self::Specific { predicate, .. }
            | Self::General { predicate, .. }
            | Self::Accumulative { predicate } => Some(predicate),
            Self::Undefined { .. } => None,
        }
    }

    /// True for `Undefined`.
    #[must_use]
    pub const fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined { .. })
    }

    /// The goal fact of a specific condition, over `?G_<slot>` variables.
    #[must_use]
    pub fn to_predicate(&self) -> Option<Predicate> {
        match self {
            Self::Specific { predicate, slots } => Some(Predicate::new(
                predicate.as_str(),
                slots.iter().map(|s| Term::variable(goal_variable(s))).collect(),
            )),
            _ => None,
        }
    }

    /// Evaluates the condition in a concrete state.
    ///
    /// `goal_args` grounds the specific form's slots in order of first
    /// appearance. Accumulative goals hold while at least one fact is present.
    #[must_use]
    pub fn holds(&self, state: &BTreeSet<Predicate>, goal_args: &[Term]) -> bool {
        match self {
            Self::Specific { predicate, slots } => {
                let mut order: Vec<&String> = Vec::with_capacity(slots.len());
                for slot in slots {
                    if !order.contains(&slot) {
                        order.push(slot);
                    }
                }
                let args: Option<Vec<Term>> = slots
                    .iter()
                    .map(|s| {
                        let index = order.iter().position(|o| *o == s)?;
                        goal_args.get(index).cloned()
                    })
                    .collect();
                args.is_some_and(|args| state.contains(&Predicate::new(predicate.as_str(), args)))
            }
            Self::General { predicate, exists } => {
                let found = state.iter().any(|f| !f.is_negated() && f.name() == predicate);
                found == *exists
            }
            Self::Accumulative { predicate } => {
                state.iter().any(|f| !f.is_negated() && f.name() == predicate)
            }
            Self::Undefined { .. } => false,
        }
    }

    /// Number of facts counted by an accumulative goal.
    #[must_use]
    pub fn accumulated(&self, state: &BTreeSet<Predicate>) -> usize {
        match self {
            Self::Accumulative { predicate } => state
                .iter()
                .filter(|f| !f.is_negated() && f.name() == predicate)
                .count(),
            _ => 0,
        }
    }
}

/// Variable name standing for goal argument `slot`.
#[must_use]
pub fn goal_variable(slot: &str) -> String {
    format!("{GOAL_VARIABLE_PREFIX}{slot}")
}

impl fmt::Display for GoalCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Specific { predicate, slots } => {
                write!(f, "{predicate}")?;
                for slot in slots {
                    write!(f, "${slot}")?;
                }
                Ok(())
            }
            Self::General { predicate, exists } => {
                let not = if *exists { "" } else { "!" };
                write!(f, "{predicate}{not}{EXISTS_SUFFIX}")
            }
            Self::Accumulative { predicate } => write!(f, "{predicate}{ACCUMULATIVE_SUFFIX}"),
            Self::Undefined { text } => write!(f, "{text}"),
        }
    }
}

impl From<&str> for GoalCondition {
    fn from(text: &str) -> Self {
        Self::parse(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predicate::parse_predicates;

    #[test]
    fn parses_each_grammar() {
        assert_eq!(
            GoalCondition::parse("on$A$B"),
            GoalCondition::Specific {
                predicate: "on".into(),
                slots: vec!["A".into(), "B".into()],
            }
        );
        assert_eq!(
            GoalCondition::parse("clearEXST"),
            GoalCondition::General {
                predicate: "clear".into(),
                exists: true,
            }
        );
        assert_eq!(
            GoalCondition::parse("clear!EXST"),
            GoalCondition::General {
                predicate: "clear".into(),
                exists: false,
            }
        );
        assert_eq!(
            GoalCondition::parse("dotACCUM"),
            GoalCondition::Accumulative {
                predicate: "dot".into()
            }
        );
        assert!(GoalCondition::parse("on a b").is_undefined());
        assert!(GoalCondition::parse("").is_undefined());
    }

    #[test]
    fn display_round_trip() {
        for text in ["on$A$B", "highest$A", "clearEXST", "clear!EXST", "dotACCUM", "???"] {
            let goal = GoalCondition::parse(text);
            assert_eq!(goal.to_string(), text);
            assert_eq!(GoalCondition::parse(&goal.to_string()), goal);
        }
    }

    #[test]
    fn argument_counts() {
        assert_eq!(GoalCondition::parse("on$A$B").num_args(), 2);
        assert_eq!(GoalCondition::parse("same$A$A").num_args(), 1);
        assert_eq!(GoalCondition::parse("clearEXST").num_args(), 0);
        assert_eq!(GoalCondition::parse("nonsense here").num_args(), 0);
    }

    #[test]
    fn specific_goal_predicate() {
        let p = GoalCondition::parse("on$A$B").to_predicate().unwrap();
        assert_eq!(p.to_string(), "(on ?G_A ?G_B)");
        assert!(GoalCondition::parse("clearEXST").to_predicate().is_none());
    }

    #[test]
    fn goals_hold_in_state() {
        let state = parse_predicates("(on a b) (clear a) (dot x) (dot y)").unwrap();
        let args = [Term::constant("a"), Term::constant("b")];
        assert!(GoalCondition::parse("on$A$B").holds(&state, &args));
        assert!(!GoalCondition::parse("on$B$A").holds(&state, &args[..1]));
        assert!(GoalCondition::parse("clearEXST").holds(&state, &[]));
        assert!(!GoalCondition::parse("clear!EXST").holds(&state, &[]));
        assert!(GoalCondition::parse("highest!EXST").holds(&state, &[]));
        assert_eq!(GoalCondition::parse("dotACCUM").accumulated(&state), 2);
    }

    #[test]
    fn serde_round_trip() {
        let goal = GoalCondition::parse("clear!EXST");
        let json = serde_json::to_string(&goal).unwrap();
        assert!(json.contains("\"kind\":\"general\""));
        assert_eq!(serde_json::from_str::<GoalCondition>(&json).unwrap(), goal);
    }
}
