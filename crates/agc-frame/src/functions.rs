//! Function registry for the expression language.
//!
//! Every function callable from an expression is looked up by name at
//! compile time, so a typo fails when the column is booked rather than in
//! the middle of the event loop. The registry ships with math and vector
//! builtins; domain crates register their own helpers on top.

use std::collections::HashMap;

use rand::SeedableRng;
use rand_chacha::ChaCha12Rng;

use agc_core::{Error, Result};

use crate::value::Value;

/// Signature of a registered function.
pub type FunctionImpl = fn(&[Value], &mut EvalContext) -> Result<Value>;

/// Accepted argument count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    /// Exactly `n` arguments.
    Exact(usize),
    /// At least `n` arguments.
    AtLeast(usize),
}

impl Arity {
    fn accepts(self, n: usize) -> bool {
        match self {
            Arity::Exact(k) => n == k,
            Arity::AtLeast(k) => n >= k,
        }
    }
}

/// A named function callable from expressions.
#[derive(Clone, Copy)]
pub struct Function {
    /// Name used in expressions.
    pub name: &'static str,
    /// Accepted argument count.
    pub arity: Arity,
    /// Implementation.
    pub eval: FunctionImpl,
}

impl std::fmt::Debug for Function {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Function").field("name", &self.name).field("arity", &self.arity).finish()
    }
}

/// Per-task evaluation state handed to every function call.
///
/// Holds the random generator used by smearing helpers. Each task seeds its
/// own context, so results do not depend on how files are spread over
/// threads or workers. The generator is ChaCha12 from `rand_chacha`,
/// whose output stream is stable across releases, so workers built
/// separately draw the same numbers for the same seed.
pub struct EvalContext {
    rng: ChaCha12Rng,
}

impl EvalContext {
    /// Context with a deterministic generator.
    pub fn seeded(seed: u64) -> Self {
        Self { rng: ChaCha12Rng::seed_from_u64(seed) }
    }

    /// Random generator for this task.
    pub fn rng(&mut self) -> &mut ChaCha12Rng {
        &mut self.rng
    }
}

/// Name → function lookup table.
#[derive(Debug, Clone)]
pub struct FunctionRegistry {
    functions: HashMap<&'static str, Function>,
}

impl FunctionRegistry {
    /// Registry with no functions at all.
    pub fn empty() -> Self {
        Self { functions: HashMap::new() }
    }

    /// Registry with the math and vector builtins.
    pub fn with_builtins() -> Self {
        let mut reg = Self::empty();
        reg.register("abs", Arity::Exact(1), |a, _| a[0].map(f64::abs));
        reg.register("sqrt", Arity::Exact(1), |a, _| a[0].map(f64::sqrt));
        reg.register("log", Arity::Exact(1), |a, _| a[0].map(f64::ln));
        reg.register("exp", Arity::Exact(1), |a, _| a[0].map(f64::exp));
        reg.register("pow", Arity::Exact(2), |a, _| a[0].zip_with(&a[1], f64::powf));
        reg.register("min", Arity::Exact(2), |a, _| a[0].zip_with(&a[1], f64::min));
        reg.register("max", Arity::Exact(2), |a, _| a[0].zip_with(&a[1], f64::max));
        reg.register("sum", Arity::Exact(1), builtin_sum);
        reg.register("len", Arity::Exact(1), builtin_len);
        reg.register("take", Arity::Exact(2), builtin_take);
        reg.register("any", Arity::Exact(1), builtin_any);
        reg
    }

    /// Register (or replace) a function.
    pub fn register(&mut self, name: &'static str, arity: Arity, eval: FunctionImpl) {
        self.functions.insert(name, Function { name, arity, eval });
    }

    /// Resolve a function for a call with `n_args` arguments.
    pub fn resolve(&self, name: &str, n_args: usize) -> Result<Function> {
        let f = self
            .functions
            .get(name)
            .ok_or_else(|| Error::Expression(format!("unknown function: '{name}'")))?;
        if !f.arity.accepts(n_args) {
            return Err(Error::Expression(format!(
                "function '{name}' expects {:?} arguments, got {n_args}",
                f.arity
            )));
        }
        Ok(*f)
    }

    /// Whether `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

fn builtin_sum(args: &[Value], _: &mut EvalContext) -> Result<Value> {
    Ok(Value::Scalar(args[0].as_vector("sum")?.iter().sum()))
}

fn builtin_len(args: &[Value], _: &mut EvalContext) -> Result<Value> {
    Ok(Value::Scalar(args[0].as_vector("len")?.len() as f64))
}

fn builtin_take(args: &[Value], _: &mut EvalContext) -> Result<Value> {
    let v = args[0].as_vector("take")?;
    let n = args[1].as_scalar("take")?;
    if n < 0.0 {
        return Err(Error::Execution(format!("take: negative count {n}")));
    }
    let n = (n as usize).min(v.len());
    Ok(Value::Vector(v[..n].to_vec()))
}

fn builtin_any(args: &[Value], _: &mut EvalContext) -> Result<Value> {
    let hit = args[0].as_vector("any")?.iter().any(|&x| x > 0.0);
    Ok(Value::from_bool(hit))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_checks_arity() {
        let reg = FunctionRegistry::with_builtins();
        assert!(reg.resolve("sqrt", 1).is_ok());
        let err = reg.resolve("sqrt", 2).unwrap_err();
        assert!(err.to_string().contains("expects"));
        assert!(reg.resolve("nope", 0).is_err());
    }

    #[test]
    fn custom_function() {
        let mut reg = FunctionRegistry::empty();
        reg.register("twice", Arity::Exact(1), |a, _| a[0].map(|x| 2.0 * x));
        let f = reg.resolve("twice", 1).unwrap();
        let mut ctx = EvalContext::seeded(1);
        let out = (f.eval)(&[Value::Vector(vec![1.0, 2.0])], &mut ctx).unwrap();
        assert_eq!(out, Value::Vector(vec![2.0, 4.0]));
    }

    #[test]
    fn vector_builtins() {
        let reg = FunctionRegistry::with_builtins();
        let mut ctx = EvalContext::seeded(0);
        let v = Value::Vector(vec![3.0, 0.0, 1.0]);

        let sum = reg.resolve("sum", 1).unwrap();
        assert_eq!((sum.eval)(&[v.clone()], &mut ctx).unwrap(), Value::Scalar(4.0));

        let len = reg.resolve("len", 1).unwrap();
        assert_eq!((len.eval)(&[v.clone()], &mut ctx).unwrap(), Value::Scalar(3.0));

        let take = reg.resolve("take", 2).unwrap();
        assert_eq!(
            (take.eval)(&[v.clone(), Value::Scalar(5.0)], &mut ctx).unwrap(),
            Value::Vector(vec![3.0, 0.0, 1.0])
        );

        let any = reg.resolve("any", 1).unwrap();
        assert_eq!((any.eval)(&[Value::Vector(vec![0.0, 0.0])], &mut ctx).unwrap(), Value::Scalar(0.0));
    }
}
