//! Predicate arguments.
//!
//! A term is a constant, a number, a named variable, a range-wrapped
//! variable, or the anonymous placeholder. Numbers and range bounds are
//! `f64`, so equality, hashing and ordering are implemented by hand on the
//! bit pattern / `total_cmp` to keep terms usable as set and map keys.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// Rendered form of the anonymous placeholder.
pub const ANONYMOUS: &str = "?";

/// Name of the built-in test used to render range conditions.
pub const BETWEEN: &str = "between";

/// A single predicate argument.
///
/// # Examples
///
/// ```
/// use cerrla::Term;
///
/// let t = Term::parse_atom("?X");
/// assert!(t.is_variable());
/// assert_eq!(Term::parse_atom("3.5"), Term::number(3.5));
/// assert_eq!(Term::parse_atom("?"), Term::Anonymous);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Term {
    /// A ground symbolic constant.
    Constant {
        /// Constant name.
        name: String,
    },
    /// A ground numeric constant.
    Number {
        /// Numeric value (never NaN, never negative zero).
        value: f64,
    },
    /// A named variable, stored without the leading `?`.
    Variable {
        /// Variable name.
        name: String,
    },
    /// A variable constrained to the closed interval `[min, max]`.
    Range {
        /// Variable name, without the leading `?`.
        variable: String,
        /// Inclusive lower bound.
        min: f64,
        /// Inclusive upper bound.
        max: f64,
    },
    /// The anonymous placeholder `?`, matching anything.
    Anonymous,
}

impl Term {
    /// Creates a constant.
    #[must_use]
    pub fn constant(name: impl Into<String>) -> Self {
        Self::Constant { name: name.into() }
    }

    /// Creates a number. Negative zero is folded into zero.
    #[must_use]
    pub fn number(value: f64) -> Self {
        Self::Number { value: value + 0.0 }
    }

    /// Creates a variable. A leading `?` is stripped.
    #[must_use]
    pub fn variable(name: impl Into<String>) -> Self {
        Self::Variable {
            name: strip_marker(name.into()),
        }
    }

    /// Creates a range-wrapped variable; bounds are swapped if given out of order.
    #[must_use]
    pub fn range(variable: impl Into<String>, a: f64, b: f64) -> Self {
        let variable = strip_marker(variable.into());
        let (min, max) = if a <= b { (a, b) } else { (b, a) };
        Self::Range {
            variable,
            min: min + 0.0,
            max: max + 0.0,
        }
    }

    /// Parses a single atom token (no range syntax).
    ///
    /// `?` is the anonymous placeholder, `?Name` a variable, anything that
    /// parses as a finite float a number, everything else a constant.
    #[must_use]
    pub fn parse_atom(token: &str) -> Self {
        if token == ANONYMOUS {
            return Self::Anonymous;
        }
        if let Some(name) = token.strip_prefix('?') {
            return Self::Variable {
                name: name.to_string(),
            };
        }
        match token.parse::<f64>() {
            Ok(v) if v.is_finite() => Self::number(v),
            _ => Self::constant(token),
        }
    }

    /// True for named variables and range variables.
    #[must_use]
    pub const fn is_variable(&self) -> bool {
        matches!(self, Self::Variable { .. } | Self::Range { .. })
    }

    /// True for constants and numbers.
    #[must_use]
    pub const fn is_ground(&self) -> bool {
        matches!(self, Self::Constant { .. } | Self::Number { .. })
    }

    /// True for the anonymous placeholder.
    #[must_use]
    pub const fn is_anonymous(&self) -> bool {
        matches!(self, Self::Anonymous)
    }

    /// True for range-wrapped variables.
    #[must_use]
    pub const fn is_range(&self) -> bool {
        matches!(self, Self::Range { .. })
    }

    /// Numeric value of a number term.
    #[must_use]
    pub const fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number { value } => Some(*value),
            _ => None,
        }
    }

    /// Name of the variable bound by this term, if any.
    #[must_use]
    pub fn variable_name(&self) -> Option<&str> {
        match self {
            Self::Variable { name } => Some(name),
            Self::Range { variable, .. } => Some(variable),
            _ => None,
        }
    }

    /// Bounds of a range term.
    #[must_use]
    pub const fn bounds(&self) -> Option<(f64, f64)> {
        match self {
            Self::Range { min, max, .. } => Some((*min, *max)),
            _ => None,
        }
    }

    /// Returns this range widened to include `value`.
    ///
    /// Widening only ever grows the interval. Returns `None` for non-range terms.
    #[must_use]
    pub fn widen(&self, value: f64) -> Option<Self> {
        match self {
            Self::Range { variable, min, max } => Some(Self::Range {
                variable: variable.clone(),
                min: min.min(value) + 0.0,
                max: max.max(value) + 0.0,
            }),
            _ => None,
        }
    }

    /// True if `value` lies inside this range.
    #[must_use]
    pub fn covers(&self, value: f64) -> bool {
        match self {
            Self::Range { min, max, .. } => *min <= value && value <= *max,
            _ => false,
        }
    }

    const fn rank(&self) -> u8 {
        match self {
            Self::Constant { .. } => 0,
            Self::Number { .. } => 1,
            Self::Variable { .. } => 2,
            Self::Range { .. } => 3,
            Self::Anonymous => 4,
        }
    }
}

fn strip_marker(mut name: String) -> String {
    if name.starts_with('?') {
        name.remove(0);
    }
    name
}

impl PartialEq for Term {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Term {}

impl PartialOrd for Term {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Term {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Constant { name: a }, Self::Constant { name: b })
            | (Self::Variable { name: a }, Self::Variable { name: b }) => a.cmp(b),
            (Self::Number { value: a }, Self::Number { value: b }) => a.total_cmp(b),
            (
                Self::Range {
                    variable: va,
                    min: la,
                    max: ua,
                },
                Self::Range {
                    variable: vb,
                    min: lb,
                    max: ub,
                },
            ) => va
                .cmp(vb)
                .then_with(|| la.total_cmp(lb))
                .then_with(|| ua.total_cmp(ub)),
            (Self::Anonymous, Self::Anonymous) => Ordering::Equal,
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl Hash for Term {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            Self::Constant { name } | Self::Variable { name } => name.hash(state),
            Self::Number { value } => value.to_bits().hash(state),
            Self::Range { variable, min, max } => {
                variable.hash(state);
                min.to_bits().hash(state);
                max.to_bits().hash(state);
            }
            Self::Anonymous => {}
        }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Constant { name } => write!(f, "{name}"),
            Self::Number { value } => write!(f, "{value}"),
            Self::Variable { name } => write!(f, "?{name}"),
            Self::Range { variable, min, max } => {
                write!(f, "?{variable}&:({BETWEEN} ?{variable} {min} {max})")
            }
            Self::Anonymous => write!(f, "{ANONYMOUS}"),
        }
    }
}
