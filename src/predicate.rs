//! Predicates (facts and conditions).
//!
//! A predicate is an immutable value: a name, an ordered argument list and a
//! negation flag. The derived ordering (name, then arguments, then negation)
//! is the canonical order used when predicates are placed in sets and maps.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ParseError;
use crate::syntax::{self, NOT};
use crate::term::Term;

/// Mapping applied by [`Predicate::replace_arguments`].
pub type Substitution = BTreeMap<Term, Term>;

/// A named tuple of terms with a negation flag.
///
/// # Examples
///
/// ```
/// use cerrla::{Predicate, Term};
///
/// let p: Predicate = "(on ?X b)".parse().unwrap();
/// assert_eq!(p.name(), "on");
/// assert_eq!(p.args()[0], Term::variable("X"));
/// assert_eq!(p.to_string(), "(on ?X b)");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Predicate {
    name: String,
    args: Vec<Term>,
    #[serde(default)]
    negated: bool,
}

impl Predicate {
    /// Creates a positive predicate.
    #[must_use]
    pub fn new(name: impl Into<String>, args: Vec<Term>) -> Self {
        Self {
            name: name.into(),
            args,
            negated: false,
        }
    }

    /// Creates a predicate with an explicit negation flag.
    #[must_use]
    pub fn with_negation(name: impl Into<String>, args: Vec<Term>, negated: bool) -> Self {
        Self {
            name: name.into(),
            args,
            negated,
        }
    }

    /// Creates a ground predicate from atom tokens (`"a"`, `"3"`, ...).
    #[must_use]
    pub fn ground(name: impl Into<String>, args: &[&str]) -> Self {
        Self::new(name, args.iter().map(|a| Term::parse_atom(a)).collect())
    }

    /// Predicate name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ordered arguments.
    #[must_use]
    pub fn args(&self) -> &[Term] {
        &self.args
    }

    /// Number of arguments.
    #[must_use]
    pub fn arity(&self) -> usize {
        self.args.len()
    }

    /// True if this predicate is negated.
    #[must_use]
    pub const fn is_negated(&self) -> bool {
        self.negated
    }

    /// Returns a copy with the negation flag flipped.
    #[must_use]
    pub fn negate(&self) -> Self {
        Self {
            name: self.name.clone(),
            args: self.args.clone(),
            negated: !self.negated,
        }
    }

    /// Returns a copy with the given arguments.
    #[must_use]
    pub fn with_args(&self, args: Vec<Term>) -> Self {
        Self {
            name: self.name.clone(),
            args,
            negated: self.negated,
        }
    }

    /// True if every argument is a constant or a number.
    #[must_use]
    pub fn is_ground(&self) -> bool {
        self.args.iter().all(Term::is_ground)
    }

    /// Names of the variables (plain and range) occurring in this predicate.
    #[must_use]
    pub fn variables(&self) -> BTreeSet<String> {
        self.args
            .iter()
            .filter_map(Term::variable_name)
            .map(str::to_string)
            .collect()
    }

    /// True if `other` has the same name, arity and negation.
    #[must_use]
    pub fn same_shape(&self, other: &Self) -> bool {
        self.name == other.name && self.args.len() == other.args.len() && self.negated == other.negated
    }

    /// Returns a copy with arguments substituted per `mapping`.
    ///
    /// An argument is replaced if it is a key of `mapping`; a range argument
    /// is also looked up by its plain variable, so renaming `?X` renames
    /// `?X&:(between ?X ..)` and grounding `?X` to a number replaces the range.
    /// Anonymous placeholders are never substituted.
    ///
    /// If `lenient` is false, every variable must be covered by `mapping`,
    /// otherwise `None` is returned.
    #[must_use]
    pub fn replace_arguments(&self, mapping: &Substitution, lenient: bool) -> Option<Self> {
        let mut args = Vec::with_capacity(self.args.len());
        for arg in &self.args {
            if let Some(replacement) = mapping.get(arg) {
                args.push(replacement.clone());
                continue;
            }
            match arg {
                Term::Range { variable, min, max } => {
                    match mapping.get(&Term::variable(variable.as_str())) {
                        Some(Term::Variable { name }) => {
                            args.push(Term::range(name.as_str(), *min, *max));
                        }
                        Some(other) => args.push(other.clone()),
                        None if lenient => args.push(arg.clone()),
                        None => return None,
                    }
                }
                Term::Variable { .. } if !lenient => return None,
                _ => args.push(arg.clone()),
            }
        }
        Some(self.with_args(args))
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negated {
            write!(f, "({NOT} ")?;
        }
        write!(f, "({}", self.name)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        write!(f, ")")?;
        if self.negated {
            write!(f, ")")?;
        }
        Ok(())
    }
}

impl FromStr for Predicate {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let exprs = syntax::read_all(s)?;
        match exprs.as_slice() {
            [single] => syntax::predicate(single),
            [] => Err(ParseError::UnexpectedEnd {
                context: "predicate",
            }),
            [_, extra, ..] => Err(ParseError::UnexpectedToken {
                token: extra.as_atom().unwrap_or("(").to_string(),
                offset: extra.offset(),
            }),
        }
    }
}

/// Parses a whitespace-separated sequence of predicates, e.g. a state dump.
pub fn parse_predicates(s: &str) -> Result<BTreeSet<Predicate>, ParseError> {
    syntax::read_all(s)?.iter().map(syntax::predicate).collect()
}
