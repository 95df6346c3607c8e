//! S-expression reader shared by the rule and background-knowledge grammars.
//!
//! The reader only knows about parentheses and whitespace-separated atoms.
//! Everything else (`not`, `=>`, `assert`, range markers) is interpreted by
//! the grammar that consumes the expressions.

use crate::error::ParseError;
use crate::predicate::Predicate;
use crate::term::{Term, BETWEEN};

/// Suffix that marks an atom as the variable half of a range condition.
const RANGE_MARKER: &str = "&:";

/// Keyword for negated conditions.
pub const NOT: &str = "not";

/// A parsed expression with the byte offset it started at.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SExpr {
    Atom { text: String, offset: usize },
    List { items: Vec<SExpr>, offset: usize },
}

impl SExpr {
    pub(crate) const fn offset(&self) -> usize {
        match self {
            Self::Atom { offset, .. } | Self::List { offset, .. } => *offset,
        }
    }

    pub(crate) fn as_atom(&self) -> Option<&str> {
        match self {
            Self::Atom { text, .. } => Some(text),
            Self::List { .. } => None,
        }
    }

    pub(crate) fn as_list(&self) -> Option<&[SExpr]> {
        match self {
            Self::List { items, .. } => Some(items),
            Self::Atom { .. } => None,
        }
    }

    fn unexpected(&self) -> ParseError {
        let token = match self {
            Self::Atom { text, .. } => text.clone(),
            Self::List { .. } => "(".to_string(),
        };
        ParseError::UnexpectedToken {
            token,
            offset: self.offset(),
        }
    }
}

/// Reads every top-level expression in `input`.
pub(crate) fn read_all(input: &str) -> Result<Vec<SExpr>, ParseError> {
    // Each frame holds the items collected so far and the offset of its '('.
    let mut stack: Vec<(Vec<SExpr>, usize)> = vec![(Vec::new(), 0)];
    let mut atom_start: Option<usize> = None;

    let flush = |stack: &mut Vec<(Vec<SExpr>, usize)>, start: &mut Option<usize>, end: usize| {
        if let Some(s) = start.take() {
            if let Some((items, _)) = stack.last_mut() {
                items.push(SExpr::Atom {
                    text: input[s..end].to_string(),
                    offset: s,
                });
            }
        }
    };

    for (i, c) in input.char_indices() {
        match c {
            '(' => {
                flush(&mut stack, &mut atom_start, i);
                stack.push((Vec::new(), i));
            }
            ')' => {
                flush(&mut stack, &mut atom_start, i);
                if stack.len() < 2 {
                    return Err(ParseError::UnexpectedToken {
                        token: ")".to_string(),
                        offset: i,
                    });
                }
                if let Some((items, offset)) = stack.pop() {
                    if let Some((parent, _)) = stack.last_mut() {
                        parent.push(SExpr::List { items, offset });
                    }
                }
            }
            c if c.is_whitespace() => flush(&mut stack, &mut atom_start, i),
            _ => {
                if atom_start.is_none() {
                    atom_start = Some(i);
                }
            }
        }
    }
    flush(&mut stack, &mut atom_start, input.len());

    if stack.len() != 1 {
        return Err(ParseError::UnexpectedEnd {
            context: "expression",
        });
    }
    Ok(stack.pop().map(|(items, _)| items).unwrap_or_default())
}

/// Interprets `(name args...)` or `(not (name args...))` as a predicate.
pub(crate) fn predicate(expr: &SExpr) -> Result<Predicate, ParseError> {
    let items = expr.as_list().ok_or_else(|| expr.unexpected())?;
    let Some(head) = items.first() else {
        return Err(ParseError::malformed("predicate", "empty list"));
    };
    let name = head.as_atom().ok_or_else(|| head.unexpected())?;

    if name == NOT {
        return match items {
            [_, inner] => Ok(predicate(inner)?.negate()),
            _ => Err(ParseError::malformed(
                "predicate",
                "'not' takes exactly one predicate",
            )),
        };
    }

    let mut args = Vec::with_capacity(items.len() - 1);
    let mut rest = items[1..].iter();
    while let Some(item) = rest.next() {
        let text = item.as_atom().ok_or_else(|| item.unexpected())?;
        if let Some(var) = text.strip_suffix(RANGE_MARKER) {
            let test = rest.next().ok_or(ParseError::UnexpectedEnd {
                context: "range condition",
            })?;
            args.push(range(var, test)?);
        } else {
            args.push(Term::parse_atom(text));
        }
    }
    Ok(Predicate::new(name, args))
}

/// Interprets the `(between ?V min max)` half of `?V&:(between ?V min max)`.
fn range(var: &str, test: &SExpr) -> Result<Term, ParseError> {
    let parts = test.as_list().ok_or_else(|| test.unexpected())?;
    let atoms: Vec<&str> = parts.iter().filter_map(SExpr::as_atom).collect();
    match atoms.as_slice() {
        [BETWEEN, v, min, max] if atoms.len() == parts.len() && *v == var => {
            let bound = |s: &str| {
                s.parse::<f64>()
                    .ok()
                    .filter(|b| b.is_finite())
                    .ok_or_else(|| ParseError::malformed("range", format!("bad bound '{s}'")))
            };
            Ok(Term::range(var, bound(*min)?, bound(*max)?))
        }
        _ => Err(ParseError::malformed(
            "range",
            format!("expected ({BETWEEN} {var} min max)"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_nested_lists() {
        let exprs = read_all("(on a b) (not (clear ?X)) =>").unwrap();
        assert_eq!(exprs.len(), 3);
        assert_eq!(exprs[2].as_atom(), Some("=>"));
        assert_eq!(exprs[1].as_list().unwrap().len(), 2);
    }

    #[test]
    fn rejects_unbalanced() {
        assert!(read_all("(on a b").is_err());
        assert!(read_all("on a b)").is_err());
    }

    #[test]
    fn parses_range_argument() {
        let exprs = read_all("(height ?X ?H&:(between ?H 1 4.5))").unwrap();
        let p = predicate(&exprs[0]).unwrap();
        assert_eq!(p.args()[1], Term::range("H", 1.0, 4.5));
    }

    #[test]
    fn range_must_reference_its_variable() {
        let exprs = read_all("(height ?X ?H&:(between ?Z 1 4))").unwrap();
        assert!(predicate(&exprs[0]).is_err());
    }

    #[test]
    fn parses_negation() {
        let exprs = read_all("(not (clear ?X))").unwrap();
        let p = predicate(&exprs[0]).unwrap();
        assert!(p.is_negated());
        assert_eq!(p.name(), "clear");
    }
}
