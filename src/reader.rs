//! Reader for Datalog source text.
//!
//! The surface syntax is the classic one: facts are `pred(a, b).`, rules are
//! `head(X, Y) :- body(X, Z), ~excluded(X, Y).` with `~` negating a clause.
//! Bare lowercase words are constants, leading-uppercase (or `_`) words are
//! variables, quoted strings are constants holding the raw text. `%` starts
//! a comment running to end of line; comments and whitespace are dropped.

use nom::branch::alt;
use nom::bytes::complete::{escaped_transform, is_not, tag, take_while};
use nom::character::complete::{char, multispace1, satisfy};
use nom::combinator::{all_consuming, map, opt, recognize, value};
use nom::multi::{many0, separated_list1};
use nom::sequence::{delimited, pair, preceded, terminated, tuple};
use nom::IResult;
use thiserror::Error;

use crate::engine::Dataset;
use crate::term::{Atom, Literal, Rule, Term};

/// A malformed-source error, surfaced before any evaluation begins.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReadError {
    /// The text did not parse; `near` holds the first unparsable input.
    #[error("malformed source near `{near}`")]
    Syntax {
        /// Start of the input that failed to parse.
        near: String,
    },
    /// A fact (a bare tuple without a body) contained a variable.
    #[error("fact `{0}` contains a variable; stored facts must be ground")]
    NonGroundFact(String),
}

/// A parsed top-level element: a ground tuple or a rule.
#[derive(Debug, Clone)]
enum Element {
    Fact(Atom),
    Rule(Rule),
}

fn word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn comment(input: &str) -> IResult<&str, ()> {
    value((), pair(char('%'), opt(is_not("\n"))))(input)
}

/// Whitespace and comments; both return nothing and are dropped.
fn ws(input: &str) -> IResult<&str, ()> {
    value((), many0(alt((value((), multispace1), comment))))(input)
}

fn bare_word(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        satisfy(|c| c.is_ascii_lowercase() || c.is_ascii_digit()),
        take_while(word_char),
    ))(input)
}

fn variable(input: &str) -> IResult<&str, Term> {
    map(
        recognize(pair(
            satisfy(|c| c.is_ascii_uppercase() || c == '_'),
            take_while(word_char),
        )),
        |name: &str| Term::Variable(name.to_string()),
    )(input)
}

fn string_constant(input: &str) -> IResult<&str, Term> {
    let escapes = alt((
        value('\\', char('\\')),
        value('"', char('"')),
        value('\n', char('n')),
    ));
    map(
        delimited(
            char('"'),
            opt(escaped_transform(is_not("\\\""), '\\', escapes)),
            char('"'),
        ),
        |text: Option<String>| Term::Constant(text.unwrap_or_default()),
    )(input)
}

fn term(input: &str) -> IResult<&str, Term> {
    alt((
        variable,
        map(bare_word, |word| Term::Constant(word.to_string())),
        string_constant,
    ))(input)
}

fn atom(input: &str) -> IResult<&str, Atom> {
    let args = delimited(
        pair(char('('), ws),
        separated_list1(tuple((ws, char(','), ws)), term),
        pair(ws, char(')')),
    );
    map(pair(bare_word, opt(args)), |(name, terms)| {
        Atom::new(name, terms.unwrap_or_default())
    })(input)
}

fn literal(input: &str) -> IResult<&str, Literal> {
    map(
        pair(opt(terminated(char('~'), ws)), atom),
        |(negation, atom)| match negation {
            Some(_) => Literal::Negative(atom),
            None => Literal::Positive(atom),
        },
    )(input)
}

fn element(input: &str) -> IResult<&str, Element> {
    let body = preceded(
        pair(tag(":-"), ws),
        separated_list1(tuple((ws, char(','), ws)), literal),
    );
    map(
        tuple((atom, ws, opt(body), ws, char('.'))),
        |(head, (), body, (), _)| match body {
            Some(body) => Element::Rule(Rule { head, body }),
            None => Element::Fact(head),
        },
    )(input)
}

fn syntax_error(input: &str) -> ReadError {
    let near: String = input.chars().take(24).collect();
    ReadError::Syntax {
        near: if near.is_empty() {
            "<end of input>".to_string()
        } else {
            near
        },
    }
}

fn run<'a, T>(
    mut parser: impl FnMut(&'a str) -> IResult<&'a str, T>,
    input: &'a str,
) -> Result<T, ReadError> {
    match parser(input) {
        Ok((_, parsed)) => Ok(parsed),
        Err(nom::Err::Error(e) | nom::Err::Failure(e)) => Err(syntax_error(e.input)),
        Err(nom::Err::Incomplete(_)) => Err(syntax_error("")),
    }
}

/// Parse Datalog source text into a [`Dataset`].
///
/// Facts must be ground; a fact containing a variable is rejected here so
/// the dataset invariant holds from construction onward.
///
/// # Errors
///
/// Returns [`ReadError`] on malformed text or a non-ground fact.
pub fn read(text: &str) -> Result<Dataset, ReadError> {
    let elements = run(
        all_consuming(terminated(many0(preceded(ws, element)), ws)),
        text,
    )?;
    let mut dataset = Dataset::default();
    for element in elements {
        match element {
            Element::Fact(atom) => {
                if !atom.is_ground() {
                    return Err(ReadError::NonGroundFact(atom.to_string()));
                }
                dataset.tuples.insert(atom);
            }
            Element::Rule(rule) => dataset.rules.push(rule),
        }
    }
    log::debug!(
        "read {} facts and {} rules",
        dataset.tuples.len(),
        dataset.rules.len()
    );
    Ok(dataset)
}

/// Parse a single query pattern, e.g. `ancestor(alice, Who)`.
///
/// Unlike facts in [`read`], a query atom may contain variables and takes
/// no trailing period.
///
/// # Errors
///
/// Returns [`ReadError`] on malformed text.
pub fn read_query(text: &str) -> Result<Atom, ReadError> {
    run(all_consuming(delimited(ws, atom, ws)), text)
}
