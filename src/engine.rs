//! Lazy top-down query evaluation over a [`Dataset`].
//!
//! Evaluation is demand-driven: [`Dataset::evaluate`] returns a pull-based
//! iterator and no work happens until the caller asks for the next solution.
//! This matters for negation-as-failure, where a single counterexample is
//! enough to drop a branch, and for callers that only need an existence
//! check ([`Dataset::ask`]).
//!
//! A query owns two pieces of mutable state, both created fresh per
//! top-level call: a cache of tuples derived so far (memoization, shared
//! down the call tree) and a recursion guard of rule identities on the
//! current proof path (copied on extension, so sibling branches never see
//! each other's guard).

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use indexmap::{IndexMap, IndexSet};
use smallvec::SmallVec;
use thiserror::Error;

use crate::term::{Atom, Literal, Rule, Term, EQ_PREDICATE};

/// A mapping from variable name to constant value, built incrementally
/// during unification and joins. Insertion-ordered so that evaluation over
/// a fixed dataset is reproducible.
pub type Bindings = IndexMap<String, String>;

/// A matched ground tuple together with the bindings that produced it.
pub type Solution = (Atom, Bindings);

/// A fatal evaluation error; per-tuple match failures are not errors, they
/// just yield nothing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvalError {
    /// Strict substitution hit a variable with no binding, typically a rule
    /// head variable that no positive body clause bound.
    #[error("variable `{0}` is unbound during strict substitution")]
    UnboundVariable(String),
}

/// A set of ground fact tuples plus an ordered collection of rules.
///
/// Datasets are built by [`crate::reader::read`] or by [`Dataset::merge`]
/// and treated as immutable during evaluation: the evaluator never writes
/// back, it only accumulates derivations in a per-query cache.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Dataset {
    /// Ground facts, deduplicated, in insertion order.
    pub tuples: IndexSet<Atom>,
    /// Rules, in declaration order.
    pub rules: Vec<Rule>,
}

impl Dataset {
    /// Create an empty dataset.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Union of tuples (deduplicated, this dataset's order first) and
    /// concatenation of rules.
    #[must_use]
    pub fn merge(&self, other: &Dataset) -> Dataset {
        let mut tuples = self.tuples.clone();
        tuples.extend(other.tuples.iter().cloned());
        let mut rules = self.rules.clone();
        rules.extend(other.rules.iter().cloned());
        Dataset { tuples, rules }
    }

    /// Lazily produce every solution of `query` against this dataset.
    ///
    /// Solutions come in a fixed order: stored tuples in insertion order,
    /// then tuples derived by rules in rule-declaration order. Each call
    /// starts an independent evaluation with a fresh cache; re-iterating
    /// means calling again.
    #[must_use]
    pub fn evaluate(&self, query: &Atom) -> Solutions<'_> {
        self.evaluate_with(query, Bindings::new())
    }

    /// Like [`Dataset::evaluate`], seeded with partial bindings.
    #[must_use]
    pub fn evaluate_with(&self, query: &Atom, bindings: Bindings) -> Solutions<'_> {
        log::trace!("evaluate {query} with {bindings:?}");
        Solutions {
            eval: Eval::new(QueryCtx::new(self), query.clone(), bindings),
        }
    }

    /// Whether `query` has at least one solution.
    ///
    /// Stops at the first solution found.
    ///
    /// # Errors
    ///
    /// Returns [`EvalError`] when evaluation aborts before a solution.
    pub fn ask(&self, query: &Atom) -> Result<bool, EvalError> {
        match self.evaluate(query).next() {
            Some(Ok(_)) => Ok(true),
            Some(Err(e)) => Err(e),
            None => Ok(false),
        }
    }
}

impl fmt::Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for tuple in &self.tuples {
            writeln!(f, "{tuple}.")?;
        }
        for rule in &self.rules {
            writeln!(f, "{rule}")?;
        }
        Ok(())
    }
}

fn resolve(term: &Term, bindings: &Bindings) -> Term {
    match term {
        Term::Variable(name) => bindings
            .get(name)
            .map_or_else(|| term.clone(), |value| Term::Constant(value.clone())),
        Term::Constant(_) => term.clone(),
    }
}

/// Unify `pattern` against `tuple` position by position, extending a copy
/// of `bindings`.
///
/// Mismatched predicate or arity is a silent no-match. A pattern variable
/// binds the tuple constant at its position, or must agree with its
/// existing binding (the first violated constraint fails the whole match).
/// A pattern constant must equal the tuple element exactly, so a constant
/// pattern position never matches a variable tuple element.
///
/// When both positions hold variables the pair is skipped: co-occurring
/// variables are deliberately not unified with each other, and rule-head
/// matching relies on this asymmetry.
#[must_use]
pub fn match_atom(tuple: &Atom, pattern: &Atom, bindings: &Bindings) -> Option<Bindings> {
    if tuple.predicate != pattern.predicate || tuple.terms.len() != pattern.terms.len() {
        return None;
    }
    let mut out = bindings.clone();
    for (tuple_term, pattern_term) in tuple.terms.iter().zip(&pattern.terms) {
        match (tuple_term, pattern_term) {
            (Term::Variable(_), Term::Variable(_)) => {}
            (Term::Constant(value), Term::Variable(name)) => match out.get(name) {
                None => {
                    out.insert(name.clone(), value.clone());
                }
                Some(bound) if bound == value => {}
                Some(_) => return None,
            },
            (tuple_term, Term::Constant(_)) => {
                if tuple_term != pattern_term {
                    return None;
                }
            }
        }
    }
    Some(out)
}

/// Replace every variable in `atom` with its bound constant.
///
/// Used where bindings are supposed to be complete, e.g. turning a rule
/// head into a derived ground fact.
///
/// # Errors
///
/// Returns [`EvalError::UnboundVariable`] for any variable the bindings do
/// not cover.
pub fn ground(atom: &Atom, bindings: &Bindings) -> Result<Atom, EvalError> {
    let mut terms = Vec::with_capacity(atom.terms.len());
    for term in &atom.terms {
        match term {
            Term::Constant(_) => terms.push(term.clone()),
            Term::Variable(name) => match bindings.get(name) {
                Some(value) => terms.push(Term::Constant(value.clone())),
                None => return Err(EvalError::UnboundVariable(name.clone())),
            },
        }
    }
    Ok(Atom::new(atom.predicate.clone(), terms))
}

/// Replace bound variables in `atom`, leaving unbound ones in place.
///
/// Used to probe negated clauses against partial bindings, where full
/// groundness is not guaranteed.
#[must_use]
pub fn substitute(atom: &Atom, bindings: &Bindings) -> Atom {
    let terms = atom
        .terms
        .iter()
        .map(|term| resolve(term, bindings))
        .collect();
    Atom::new(atom.predicate.clone(), terms)
}

/// Shared per-query state threaded through one evaluation tree.
///
/// The cache is shared (one per top-level query); the guard is copied on
/// extension so each proof branch carries its own path.
#[derive(Debug, Clone)]
struct QueryCtx<'a> {
    db: &'a Dataset,
    cache: Rc<RefCell<IndexSet<Atom>>>,
    guard: Rc<IndexSet<usize>>,
}

impl<'a> QueryCtx<'a> {
    fn new(db: &'a Dataset) -> Self {
        Self {
            db,
            cache: Rc::new(RefCell::new(IndexSet::new())),
            guard: Rc::new(IndexSet::new()),
        }
    }

    fn with_rule(&self, rule_index: usize) -> Self {
        let mut guard = (*self.guard).clone();
        guard.insert(rule_index);
        Self {
            db: self.db,
            cache: Rc::clone(&self.cache),
            guard: Rc::new(guard),
        }
    }
}

/// The lazy solution sequence returned by [`Dataset::evaluate`].
#[derive(Debug)]
pub struct Solutions<'a> {
    eval: Eval<'a>,
}

impl Iterator for Solutions<'_> {
    type Item = Result<Solution, EvalError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.eval.next()
    }
}

/// One evaluation of a query pattern: a state machine stepping through the
/// built-in check, the stored tuples, the derivation cache, and finally the
/// rules.
#[derive(Debug)]
struct Eval<'a> {
    ctx: QueryCtx<'a>,
    expr: Atom,
    bindings: Bindings,
    state: EvalState<'a>,
}

#[derive(Debug)]
enum EvalState<'a> {
    Start,
    Facts {
        index: usize,
    },
    Cache {
        index: usize,
    },
    Rules {
        next_rule: usize,
        active: Option<Box<ActiveRule<'a>>>,
    },
    Done,
}

#[derive(Debug)]
struct ActiveRule<'a> {
    head: Atom,
    body: BindingsStream<'a>,
}

impl<'a> Eval<'a> {
    fn new(ctx: QueryCtx<'a>, expr: Atom, bindings: Bindings) -> Self {
        Self {
            ctx,
            expr,
            bindings,
            state: EvalState::Start,
        }
    }

    fn is_equality(&self) -> bool {
        self.expr.predicate == EQ_PREDICATE && self.expr.terms.len() == 2
    }
}

impl Iterator for Eval<'_> {
    type Item = Result<Solution, EvalError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match &mut self.state {
                EvalState::Start => {
                    if self.is_equality() {
                        self.state = EvalState::Done;
                        let left = resolve(&self.expr.terms[0], &self.bindings);
                        let right = resolve(&self.expr.terms[1], &self.bindings);
                        if left == right {
                            return Some(Ok((self.expr.clone(), self.bindings.clone())));
                        }
                        return None;
                    }
                    if self.expr.is_ground() && self.ctx.db.tuples.contains(&self.expr) {
                        // The only possible match is the tuple itself.
                        self.state = EvalState::Done;
                        return Some(Ok((self.expr.clone(), self.bindings.clone())));
                    }
                    self.state = EvalState::Facts { index: 0 };
                }
                EvalState::Facts { index } => {
                    while let Some(tuple) = self.ctx.db.tuples.get_index(*index) {
                        *index += 1;
                        if let Some(bound) = match_atom(tuple, &self.expr, &self.bindings) {
                            return Some(Ok((tuple.clone(), bound)));
                        }
                    }
                    self.state = EvalState::Cache { index: 0 };
                }
                EvalState::Cache { index } => {
                    // The cache can grow between pulls (sibling branches
                    // memoize through the same cache), so index against the
                    // live length instead of snapshotting.
                    loop {
                        let tuple = {
                            let cache = self.ctx.cache.borrow();
                            match cache.get_index(*index) {
                                Some(tuple) => tuple.clone(),
                                None => break,
                            }
                        };
                        *index += 1;
                        if let Some(bound) = match_atom(&tuple, &self.expr, &self.bindings) {
                            return Some(Ok((tuple, bound)));
                        }
                    }
                    self.state = EvalState::Rules {
                        next_rule: 0,
                        active: None,
                    };
                }
                EvalState::Rules { next_rule, active } => {
                    if let Some(rule_eval) = active.as_deref_mut() {
                        match rule_eval.body.next() {
                            Some(Ok(body_bindings)) => {
                                let derived = match ground(&rule_eval.head, &body_bindings) {
                                    Ok(atom) => atom,
                                    Err(e) => {
                                        self.state = EvalState::Done;
                                        return Some(Err(e));
                                    }
                                };
                                // Re-match against the original query so the
                                // yielded bindings speak the query's
                                // variables, not the rule's.
                                if let Some(query_bindings) =
                                    match_atom(&derived, &self.expr, &self.bindings)
                                {
                                    let fresh =
                                        self.ctx.cache.borrow_mut().insert(derived.clone());
                                    if fresh {
                                        log::trace!("memoized {derived}");
                                        return Some(Ok((derived, query_bindings)));
                                    }
                                }
                            }
                            Some(Err(e)) => {
                                self.state = EvalState::Done;
                                return Some(Err(e));
                            }
                            None => *active = None,
                        }
                        continue;
                    }
                    let db = self.ctx.db;
                    let mut entered = None;
                    while *next_rule < db.rules.len() {
                        let rule_index = *next_rule;
                        *next_rule += 1;
                        let rule = &db.rules[rule_index];
                        if rule.head.predicate != self.expr.predicate {
                            continue;
                        }
                        if self.ctx.guard.contains(&rule_index) {
                            log::trace!("rule {rule_index} already on the proof path");
                            continue;
                        }
                        // Match the query against the rule head: query
                        // constants constrain head variables, query
                        // variables pair with head variables and skip.
                        let Some(base) = match_atom(&self.expr, &rule.head, &Bindings::new())
                        else {
                            continue;
                        };
                        entered = Some((rule_index, rule, base));
                        break;
                    }
                    match entered {
                        Some((rule_index, rule, base)) => {
                            log::trace!("entering rule {rule_index}: {rule}");
                            let ctx = self.ctx.with_rule(rule_index);
                            *active = Some(Box::new(ActiveRule {
                                head: rule.head.clone(),
                                body: BindingsStream::for_body(ctx, &rule.body, base),
                            }));
                        }
                        None => self.state = EvalState::Done,
                    }
                }
                EvalState::Done => return None,
            }
        }
    }
}

/// A lazy stream of binding maps satisfying a rule body, built as a
/// left-to-right pipeline: the first positive clause seeds the stream, each
/// further positive clause joins into it, and every negated clause filters
/// at the end as an antijoin.
#[derive(Debug)]
enum BindingsStream<'a> {
    /// Yields the seed bindings once; an empty body is trivially true.
    Seed(Option<Bindings>),
    Init {
        solutions: Box<Eval<'a>>,
    },
    Join {
        input: Box<BindingsStream<'a>>,
        clause: Atom,
        ctx: QueryCtx<'a>,
        active: Option<ActiveJoin<'a>>,
    },
    Antijoin {
        input: Box<BindingsStream<'a>>,
        clause: Atom,
        ctx: QueryCtx<'a>,
    },
}

#[derive(Debug)]
struct ActiveJoin<'a> {
    base: Bindings,
    solutions: Box<Eval<'a>>,
}

impl<'a> BindingsStream<'a> {
    fn for_body(ctx: QueryCtx<'a>, body: &[Literal], seed: Bindings) -> Self {
        let mut positives: SmallVec<[&Atom; 4]> = SmallVec::new();
        let mut negatives: SmallVec<[&Atom; 4]> = SmallVec::new();
        for literal in body {
            match literal {
                Literal::Positive(atom) => positives.push(atom),
                Literal::Negative(atom) => negatives.push(atom),
            }
        }
        let mut stream = match positives.split_first() {
            Some((init, rest)) => {
                let mut stream = BindingsStream::Init {
                    solutions: Box::new(Eval::new(ctx.clone(), (*init).clone(), seed)),
                };
                for clause in rest {
                    stream = BindingsStream::Join {
                        input: Box::new(stream),
                        clause: (*clause).clone(),
                        ctx: ctx.clone(),
                        active: None,
                    };
                }
                stream
            }
            None => BindingsStream::Seed(Some(seed)),
        };
        // Antijoins run only after every positive join has had the chance
        // to bind the negated clause's variables.
        for clause in &negatives {
            stream = BindingsStream::Antijoin {
                input: Box::new(stream),
                clause: (*clause).clone(),
                ctx: ctx.clone(),
            };
        }
        stream
    }
}

impl Iterator for BindingsStream<'_> {
    type Item = Result<Bindings, EvalError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            BindingsStream::Seed(seed) => seed.take().map(Ok),
            BindingsStream::Init { solutions } => match solutions.next()? {
                Ok((_tuple, bindings)) => Some(Ok(bindings)),
                Err(e) => Some(Err(e)),
            },
            BindingsStream::Join {
                input,
                clause,
                ctx,
                active,
            } => loop {
                if let Some(join) = active {
                    match join.solutions.next() {
                        Some(Ok((_tuple, found))) => {
                            // Inner bindings win on key collision.
                            let mut merged = join.base.clone();
                            merged.extend(found);
                            return Some(Ok(merged));
                        }
                        Some(Err(e)) => return Some(Err(e)),
                        None => *active = None,
                    }
                    continue;
                }
                match input.next()? {
                    Ok(base) => {
                        let solutions =
                            Box::new(Eval::new(ctx.clone(), clause.clone(), base.clone()));
                        *active = Some(ActiveJoin { base, solutions });
                    }
                    Err(e) => return Some(Err(e)),
                }
            },
            BindingsStream::Antijoin { input, clause, ctx } => loop {
                match input.next()? {
                    Ok(base) => {
                        let probe = substitute(clause, &base);
                        let mut check = Eval::new(ctx.clone(), probe, Bindings::new());
                        match check.next() {
                            // No counterexample: the branch survives.
                            None => return Some(Ok(base)),
                            Some(Ok(_)) => {}
                            Some(Err(e)) => return Some(Err(e)),
                        }
                    }
                    Err(e) => return Some(Err(e)),
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::{read, read_query};

    fn init_logs() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn query(text: &str) -> Atom {
        read_query(text).unwrap()
    }

    /// Collect all solutions, rendering each tuple, panicking on errors.
    fn solutions(db: &Dataset, text: &str) -> Vec<(String, Bindings)> {
        db.evaluate(&query(text))
            .map(|result| result.map(|(tuple, bindings)| (tuple.to_string(), bindings)))
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
    }

    fn bindings(pairs: &[(&str, &str)]) -> Bindings {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_fact_scan_in_insertion_order() {
        let db = read("likes(alice, pizza). likes(bob, burger). likes(alice, pasta).").unwrap();
        let found = solutions(&db, "likes(alice, What)");
        assert_eq!(
            found,
            vec![
                (
                    "likes(alice, pizza)".to_string(),
                    bindings(&[("What", "pizza")])
                ),
                (
                    "likes(alice, pasta)".to_string(),
                    bindings(&[("What", "pasta")])
                ),
            ]
        );
    }

    #[test]
    fn test_missing_predicate_yields_nothing() {
        let db = read("likes(alice, pizza).").unwrap();
        assert!(solutions(&db, "hates(X, Y)").is_empty());
    }

    #[test]
    fn test_arity_mismatch_is_a_silent_no_match() {
        let db = read("p(a, b).").unwrap();
        assert!(solutions(&db, "p(X)").is_empty());
    }

    #[test]
    fn test_ground_query_yields_itself_once() {
        let db = read("edge(a, b). edge(b, c).").unwrap();
        let found = solutions(&db, "edge(a, b)");
        assert_eq!(found, vec![("edge(a, b)".to_string(), Bindings::new())]);
    }

    #[test]
    fn test_ground_shortcut_matches_general_scan() {
        // The fast path must agree with what a plain scan over the stored
        // tuples produces for the same ground pattern.
        let db = read("edge(a, b). edge(b, c).").unwrap();
        let expr = query("edge(b, c)");
        let scanned: Vec<Solution> = db
            .tuples
            .iter()
            .filter_map(|t| match_atom(t, &expr, &Bindings::new()).map(|b| (t.clone(), b)))
            .collect();
        let fast: Vec<Solution> = db.evaluate(&expr).collect::<Result<Vec<_>, _>>().unwrap();
        assert_eq!(fast, scanned);
        assert_eq!(fast.len(), 1);
    }

    #[test]
    fn test_ground_query_absent_from_facts_falls_through_to_rules() {
        let db = read("edge(a, b). path(X, Y) :- edge(X, Y).").unwrap();
        let found = solutions(&db, "path(a, b)");
        assert_eq!(found, vec![("path(a, b)".to_string(), Bindings::new())]);
    }

    #[test]
    fn test_equality_builtin() {
        let db = Dataset::new();
        let same = Atom::equality(
            Term::Constant("x".to_string()),
            Term::Constant("x".to_string()),
        );
        let results: Vec<Solution> = db.evaluate(&same).collect::<Result<_, _>>().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, same);

        let different = Atom::equality(
            Term::Constant("x".to_string()),
            Term::Constant("y".to_string()),
        );
        assert_eq!(db.evaluate(&different).count(), 0);
    }

    #[test]
    fn test_equality_builtin_under_bindings() {
        // picked(X) :- p(X), =(X, a).  Equality filters the joined stream.
        let mut db = read("p(a). p(b).").unwrap();
        db.rules.push(Rule {
            head: query("picked(X)"),
            body: vec![
                Literal::Positive(query("p(X)")),
                Literal::Positive(Atom::equality(
                    Term::Variable("X".to_string()),
                    Term::Constant("a".to_string()),
                )),
            ],
        });
        let found = solutions(&db, "picked(Who)");
        assert_eq!(
            found,
            vec![("picked(a)".to_string(), bindings(&[("Who", "a")]))]
        );
    }

    #[test]
    fn test_rule_join_binds_across_clauses() {
        init_logs();
        let db = read(
            "edge(a, b). edge(b, c). edge(c, d).
             two_hop(X, Z) :- edge(X, Y), edge(Y, Z).",
        )
        .unwrap();
        let found = solutions(&db, "two_hop(a, Where)");
        assert_eq!(
            found,
            vec![("two_hop(a, c)".to_string(), bindings(&[("Where", "c")]))]
        );
    }

    #[test]
    fn test_recursion_guard_terminates_right_recursion() {
        init_logs();
        let db = read(
            "parent(a, b). parent(b, c).
             ancestor(X, Y) :- parent(X, Y).
             ancestor(X, Y) :- parent(X, Z), ancestor(Z, Y).",
        )
        .unwrap();
        let found = solutions(&db, "ancestor(a, V)");
        assert_eq!(
            found,
            vec![
                ("ancestor(a, b)".to_string(), bindings(&[("V", "b")])),
                ("ancestor(a, c)".to_string(), bindings(&[("V", "c")])),
            ]
        );
    }

    #[test]
    fn test_antijoin_filters_bound_branches() {
        let db = read(
            "a(1). a(2). b(2).
             only_a(X) :- a(X), ~b(X).",
        )
        .unwrap();
        let found = solutions(&db, "only_a(X)");
        assert_eq!(
            found,
            vec![("only_a(1)".to_string(), bindings(&[("X", "1")]))]
        );
    }

    #[test]
    fn test_negated_clauses_always_run_after_positive_joins() {
        // Written negation-first; the antijoin still sees X bound.
        let db = read(
            "a(1). a(2). b(2).
             only_a(X) :- ~b(X), a(X).",
        )
        .unwrap();
        let found = solutions(&db, "only_a(X)");
        assert_eq!(
            found,
            vec![("only_a(1)".to_string(), bindings(&[("X", "1")]))]
        );
    }

    #[test]
    fn test_unbound_head_variable_aborts_the_query() {
        let db = read("p(a). r(X, Y) :- p(X).").unwrap();
        let mut results = db.evaluate(&query("r(A, B)"));
        assert_eq!(
            results.next(),
            Some(Err(EvalError::UnboundVariable("Y".to_string())))
        );
        assert_eq!(results.next(), None);
    }

    #[test]
    fn test_empty_body_rule_is_trivially_true() {
        let mut db = Dataset::new();
        db.rules.push(Rule {
            head: query("always(a)"),
            body: vec![],
        });
        let found = solutions(&db, "always(a)");
        assert_eq!(found, vec![("always(a)".to_string(), Bindings::new())]);
        assert!(solutions(&db, "always(b)").is_empty());
    }

    #[test]
    fn test_repeated_variable_must_agree() {
        let db = read("same(a, b). same(c, c).").unwrap();
        let found = solutions(&db, "same(X, X)");
        assert_eq!(
            found,
            vec![("same(c, c)".to_string(), bindings(&[("X", "c")]))]
        );
    }

    #[test]
    fn test_evaluate_with_seed_bindings() {
        let db = read("likes(alice, pizza). likes(bob, burger).").unwrap();
        let found: Vec<Solution> = db
            .evaluate_with(&query("likes(P, F)"), bindings(&[("P", "alice")]))
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].1, bindings(&[("P", "alice"), ("F", "pizza")]));
    }

    #[test]
    fn test_match_atom_never_mutates_the_callers_bindings() {
        let seed = bindings(&[("X", "a")]);
        let tuple = query("p(a, b)");
        let pattern = query("p(X, Y)");
        let matched = match_atom(&tuple, &pattern, &seed).unwrap();
        assert_eq!(matched, bindings(&[("X", "a"), ("Y", "b")]));
        assert_eq!(seed, bindings(&[("X", "a")]));
    }

    #[test]
    fn test_variable_pairs_are_skipped_not_unified() {
        let empty = Bindings::new();
        // Both positions are variables: no binding is produced.
        let matched = match_atom(&query("p(X)"), &query("p(Y)"), &empty).unwrap();
        assert!(matched.is_empty());
        // A constant pattern position never matches a variable element.
        assert!(match_atom(&query("p(X)"), &query("p(a)"), &empty).is_none());
    }

    #[test]
    fn test_match_atom_fails_fast_on_bound_conflict() {
        let seed = bindings(&[("X", "z")]);
        assert!(match_atom(&query("p(a, b)"), &query("p(X, Y)"), &seed).is_none());
    }

    #[test]
    fn test_ground_and_substitute() {
        let pattern = query("p(X, b, Y)");
        let full = bindings(&[("X", "a"), ("Y", "c")]);
        assert_eq!(ground(&pattern, &full).unwrap(), query("p(a, b, c)"));

        let partial = bindings(&[("X", "a")]);
        assert_eq!(
            ground(&pattern, &partial),
            Err(EvalError::UnboundVariable("Y".to_string()))
        );
        assert_eq!(substitute(&pattern, &partial), query("p(a, b, Y)"));
    }

    #[test]
    fn test_merge_deduplicates_tuples_and_concatenates_rules() {
        let left = read("p(a). p(b). r1(X) :- p(X).").unwrap();
        let right = read("p(b). p(c). r2(X) :- p(X).").unwrap();
        let merged = left.merge(&right);
        let facts: Vec<String> = merged.tuples.iter().map(ToString::to_string).collect();
        assert_eq!(facts, vec!["p(a)", "p(b)", "p(c)"]);
        assert_eq!(merged.rules.len(), 2);
        assert_eq!(merged.rules[0], left.rules[0]);
        assert_eq!(merged.rules[1], right.rules[0]);
    }

    #[test]
    fn test_determinism_across_fresh_evaluations() {
        let db = read(
            "parent(a, b). parent(b, c). parent(b, d). blocked(d).
             ancestor(X, Y) :- parent(X, Y), ~blocked(Y).
             ancestor(X, Y) :- parent(X, Z), ancestor(Z, Y).",
        )
        .unwrap();
        let first = solutions(&db, "ancestor(a, V)");
        let second = solutions(&db, "ancestor(a, V)");
        assert_eq!(first, second);
        assert!(!first.is_empty());
    }

    #[test]
    fn test_derived_tuples_are_memoized_once() {
        // Two rules derive the same tuple; the cache admits it once.
        let db = read(
            "edge(a, b).
             path(X, Y) :- edge(X, Y).
             path(X, Y) :- edge(X, Y).",
        )
        .unwrap();
        let found = solutions(&db, "path(a, W)");
        assert_eq!(
            found,
            vec![("path(a, b)".to_string(), bindings(&[("W", "b")]))]
        );
    }

    #[test]
    fn test_stored_fact_rederived_by_rule_is_reported_again() {
        // The derivation cache is separate from the stored tuples: a rule
        // re-deriving a stored fact yields it a second time.
        let db = read(
            "path(a, b). edge(a, b).
             path(X, Y) :- edge(X, Y).",
        )
        .unwrap();
        let found = solutions(&db, "path(a, W)");
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].0, "path(a, b)");
        assert_eq!(found[1].0, "path(a, b)");
    }

    #[test]
    fn test_ask_stops_at_the_first_solution() {
        let db = read(
            "parent(a, b). parent(b, c).
             ancestor(X, Y) :- parent(X, Y).
             ancestor(X, Y) :- parent(X, Z), ancestor(Z, Y).",
        )
        .unwrap();
        assert!(db.ask(&query("ancestor(a, c)")).unwrap());
        assert!(!db.ask(&query("ancestor(c, a)")).unwrap());
    }

    #[test]
    fn test_solutions_restart_independently() {
        let db = read("p(a). p(b).").unwrap();
        let expr = query("p(X)");
        let mut first = db.evaluate(&expr);
        let _ = first.next();
        // A half-consumed iterator does not affect a fresh one.
        let fresh: Vec<Solution> = db.evaluate(&expr).collect::<Result<_, _>>().unwrap();
        assert_eq!(fresh.len(), 2);
    }

    #[test]
    fn test_dataset_display_reparses() {
        let db = read(
            "edge(a, b). note(n1, \"two words\").
             path(X, Y) :- edge(X, Y), ~note(X, Y).",
        )
        .unwrap();
        let reparsed = read(&db.to_string()).unwrap();
        assert_eq!(db, reparsed);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_dataset_serde_round_trip() {
        let db = read(
            "edge(a, b).
             path(X, Y) :- edge(X, Y), ~blocked(X).",
        )
        .unwrap();
        let json = serde_json::to_string(&db).unwrap();
        let back: Dataset = serde_json::from_str(&json).unwrap();
        assert_eq!(db, back);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn values_and_mask() -> impl Strategy<Value = (Vec<String>, Vec<bool>)> {
            (1usize..6).prop_flat_map(|len| {
                (
                    prop::collection::vec("[a-z][a-z0-9]{0,6}", len..=len),
                    prop::collection::vec(any::<bool>(), len..=len),
                )
            })
        }

        proptest! {
            /// When `match_atom` succeeds and every pattern variable got
            /// bound, substituting the bindings back into the pattern
            /// reproduces the tuple.
            #[test]
            fn match_bindings_ground_the_pattern_to_the_tuple(
                (values, mask) in values_and_mask()
            ) {
                let tuple = Atom::new(
                    "t",
                    values.iter().cloned().map(Term::Constant).collect(),
                );
                let pattern = Atom::new(
                    "t",
                    values
                        .iter()
                        .zip(&mask)
                        .enumerate()
                        .map(|(i, (value, is_var))| {
                            if *is_var {
                                Term::Variable(format!("V{i}"))
                            } else {
                                Term::Constant(value.clone())
                            }
                        })
                        .collect(),
                );
                let bound = match_atom(&tuple, &pattern, &Bindings::new()).unwrap();
                prop_assert_eq!(ground(&pattern, &bound).unwrap(), tuple);
            }
        }
    }
}
