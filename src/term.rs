use std::fmt;

/// A single position of a tuple or pattern.
///
/// Constants compare by value, variables by name. Two variables with
/// different names are never considered bound to each other during
/// matching (see [`crate::engine::match_atom`]).
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Term {
    /// A logic variable (e.g. `X`, `Who`), a named placeholder.
    Variable(String),
    /// An immutable atomic value (e.g. `alice`, `"some text"`).
    Constant(String),
}

impl Term {
    /// Returns true for [`Term::Variable`].
    #[must_use]
    pub fn is_variable(&self) -> bool {
        matches!(self, Term::Variable(_))
    }

    /// Returns true for [`Term::Constant`].
    #[must_use]
    pub fn is_constant(&self) -> bool {
        matches!(self, Term::Constant(_))
    }
}

/// Whether a constant value lexes as a bare word, so it can be rendered
/// without quotes and still read back as the same constant.
fn is_bare_word(value: &str) -> bool {
    let mut chars = value.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() || c.is_ascii_digit() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn write_quoted(f: &mut fmt::Formatter<'_>, value: &str) -> fmt::Result {
    f.write_str("\"")?;
    for c in value.chars() {
        match c {
            '\\' => f.write_str("\\\\")?,
            '"' => f.write_str("\\\"")?,
            '\n' => f.write_str("\\n")?,
            _ => write!(f, "{c}")?,
        }
    }
    f.write_str("\"")
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Variable(name) => f.write_str(name),
            Term::Constant(value) => {
                if is_bare_word(value) {
                    f.write_str(value)
                } else {
                    write_quoted(f, value)
                }
            }
        }
    }
}

/// A predicate applied to terms (e.g. `edge(X, b)`).
///
/// This is the engine's tuple: the `predicate` field is the leading
/// constant naming the relation, `terms` are the remaining positions.
/// Atoms are the unit of storage and query; stored facts are ground.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Atom {
    /// The relation/predicate name.
    pub predicate: String,
    /// The argument terms.
    pub terms: Vec<Term>,
}

/// Predicate name of the built-in equality check.
pub const EQ_PREDICATE: &str = "=";

impl Atom {
    /// Create an atom from a predicate name and argument terms.
    #[must_use]
    pub fn new(predicate: impl Into<String>, terms: Vec<Term>) -> Self {
        Self {
            predicate: predicate.into(),
            terms,
        }
    }

    /// Create a built-in equality atom `=(left, right)`.
    ///
    /// Equality is the only built-in predicate: it succeeds once when both
    /// sides substitute to the same term under the current bindings.
    #[must_use]
    pub fn equality(left: Term, right: Term) -> Self {
        Self::new(EQ_PREDICATE, vec![left, right])
    }

    /// Returns true when no position holds a variable.
    #[must_use]
    pub fn is_ground(&self) -> bool {
        self.terms.iter().all(Term::is_constant)
    }
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.predicate)?;
        if self.terms.is_empty() {
            return Ok(());
        }
        f.write_str("(")?;
        for (i, term) in self.terms.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{term}")?;
        }
        f.write_str(")")
    }
}

/// One clause of a rule body: a pattern to join, or a pattern to exclude.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Literal {
    /// A positive clause, joined against facts and derivations.
    Positive(Atom),
    /// A negated clause (`~atom`), evaluated as negation-as-failure.
    Negative(Atom),
}

impl Literal {
    /// The wrapped atom, regardless of sign.
    #[must_use]
    pub fn atom(&self) -> &Atom {
        match self {
            Literal::Positive(atom) | Literal::Negative(atom) => atom,
        }
    }

    /// Returns true for [`Literal::Negative`].
    #[must_use]
    pub fn is_negative(&self) -> bool {
        matches!(self, Literal::Negative(_))
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Positive(atom) => write!(f, "{atom}"),
            Literal::Negative(atom) => write!(f, "~{atom}"),
        }
    }
}

/// A rule: a head pattern derived from an ordered body of clauses.
///
/// Head variables are expected to be bound by joining the positive body
/// clauses; negated clauses only filter, never bind. This is enforced at
/// evaluation time (an unbound head variable aborts the query), not at
/// parse time.
#[derive(Debug, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Rule {
    /// The rule head pattern.
    pub head: Atom,
    /// The body clauses, joined left to right.
    pub body: Vec<Literal>,
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.head)?;
        if self.body.is_empty() {
            return f.write_str(".");
        }
        f.write_str(" :- ")?;
        for (i, literal) in self.body.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{literal}")?;
        }
        f.write_str(".")
    }
}
