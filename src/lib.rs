//! # Lazylog
//!
//! A lazy top-down Datalog query engine with negation-as-failure.
//!
//! ## Features
//!
//! - Reader for the classic Datalog surface syntax (`~` negates a clause)
//! - Demand-driven evaluation: solutions are produced one pull at a time
//! - Recursive rules with a per-proof-path recursion guard
//!
//! ## Example
//!
//! ```rust
//! use lazylog::{read, read_query};
//!
//! let db = read(
//!     "parent(a, b). parent(b, c).
//!      ancestor(X, Y) :- parent(X, Y).
//!      ancestor(X, Y) :- parent(X, Z), ancestor(Z, Y).",
//! )
//! .unwrap();
//!
//! let query = read_query("ancestor(a, Who)").unwrap();
//! for solution in db.evaluate(&query) {
//!     let (tuple, bindings) = solution.unwrap();
//!     println!("{tuple} with {bindings:?}");
//! }
//! ```

/// Query evaluation: datasets, unification, joins, negation.
pub mod engine;
/// Reader for Datalog source text.
pub mod reader;
/// Terms, atoms, literals, and rules.
pub mod term;

pub use engine::{
    ground, match_atom, substitute, Bindings, Dataset, EvalError, Solution, Solutions,
};
pub use reader::{read, read_query, ReadError};
pub use term::{Atom, Literal, Rule, Term};
