#![forbid(unsafe_code)]
#![deny(unreachable_patterns)]

//! Numeric formula parsing and evaluation.
//!
//! Formula text such as `2 * sin(x) + max(a, b, 3)` is tokenized, built into an [`Operation`]
//! tree with an operator-precedence parser, optionally constant-folded, and evaluated against
//! caller-supplied variable bindings. Everything evaluates to `f64`; comparisons and logical
//! operators yield `0.0` / `1.0`.
//!
//! [`CalculationEngine`] is the usual entry point. It owns the function and constant
//! registries and a bounded cache of built formulas:
//!
//! ```
//! use formula_calc::{CalculationEngine, EngineOptions, Variables};
//!
//! let engine = CalculationEngine::new(EngineOptions::default()).unwrap();
//! let vars = Variables::from([("x".to_string(), 2.0)]);
//! assert_eq!(engine.calculate("3 * x ^ 2", &vars).unwrap(), 12.0);
//! ```
//!
//! ## Backends
//!
//! Two interchangeable [`Executor`]s produce identical results:
//! - [`Interpreter`] walks the tree with an explicit work stack.
//! - [`BytecodeExecutor`] lowers the tree once to a packed [`bytecode::Program`] and runs it on a
//!   small stack VM. Calls to non-overwritable functions are bound at compile time; overwritable
//!   ones are looked up per call so they can be replaced after a formula is built.
//!
//! ## Locales
//!
//! The decimal and argument separators come from [`LocaleConfig`], e.g. `max(1,5; 2)` under
//! [`LocaleConfig::de_de`].

pub mod bytecode;
pub mod cache;
pub mod engine;
pub mod error;
pub mod eval;
pub mod optimizer;
pub mod parser;
pub mod registry;

mod ast;

pub use ast::*;
pub use bytecode::BytecodeExecutor;
pub use cache::FormulaCache;
pub use engine::{CalculationEngine, EngineOptions, ExecutionMode, Formula};
pub use error::{CalcError, EvalError, RegistryError};
pub use eval::{Executor, Interpreter, Variables};
pub use optimizer::Optimizer;
pub use parser::{lex, parse_formula, Operator, Token, TokenKind};
pub use registry::{
    Callable, ConstantInfo, ConstantRegistry, FunctionInfo, FunctionRegistry, RandomSource,
    ReadOnlyRegistry,
};
