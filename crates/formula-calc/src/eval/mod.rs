//! Evaluation backends and the operator semantics they share.

mod interpreter;

pub use interpreter::Interpreter;

use crate::error::EvalError;
use crate::registry::{ConstantInfo, FunctionInfo, ReadOnlyRegistry};
use crate::{BinaryOp, Operation, UnaryOp};
use std::collections::HashMap;
use std::sync::Arc;

/// Absolute tolerance used by `==` and `!=`.
pub const COMPARISON_EPSILON: f64 = 1e-9;

/// Variable bindings passed to an evaluation.
pub type Variables = HashMap<String, f64>;

/// A reusable evaluator produced by [`Executor::compile`].
pub type CompiledFormula = Arc<dyn Fn(&Variables) -> Result<f64, EvalError> + Send + Sync>;

/// An evaluation strategy over operation trees.
pub trait Executor: Send + Sync {
    /// Evaluate `operation` once.
    fn execute(
        &self,
        operation: &Operation,
        functions: &ReadOnlyRegistry<FunctionInfo>,
        constants: &ReadOnlyRegistry<ConstantInfo>,
        variables: &Variables,
    ) -> Result<f64, EvalError>;

    /// Capture `operation` and the registries into a reusable evaluator.
    fn compile(
        &self,
        operation: Operation,
        functions: ReadOnlyRegistry<FunctionInfo>,
        constants: ReadOnlyRegistry<ConstantInfo>,
    ) -> CompiledFormula;
}

#[inline]
fn bool_to_f64(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

#[inline]
pub fn apply_unary(op: UnaryOp, value: f64) -> f64 {
    match op {
        UnaryOp::Negate => -value,
    }
}

/// Booleans are `0.0`/`1.0`; any nonzero operand counts as true.
#[inline]
pub fn apply_binary(op: BinaryOp, left: f64, right: f64) -> f64 {
    match op {
        BinaryOp::Add => left + right,
        BinaryOp::Subtract => left - right,
        BinaryOp::Multiply => left * right,
        BinaryOp::Divide => left / right,
        BinaryOp::Modulo => left % right,
        BinaryOp::Power => left.powf(right),
        BinaryOp::And => bool_to_f64(left != 0.0 && right != 0.0),
        BinaryOp::Or => bool_to_f64(left != 0.0 || right != 0.0),
        BinaryOp::LessThan => bool_to_f64(left < right),
        BinaryOp::LessOrEqual => bool_to_f64(left <= right),
        BinaryOp::GreaterThan => bool_to_f64(left > right),
        BinaryOp::GreaterOrEqual => bool_to_f64(left >= right),
        BinaryOp::Equal => bool_to_f64((left - right).abs() < COMPARISON_EPSILON),
        BinaryOp::NotEqual => bool_to_f64(!((left - right).abs() < COMPARISON_EPSILON)),
    }
}

/// Resolve a variable, falling back to the constant table for names that were registered as
/// constants after the tree was built.
pub(crate) fn lookup_variable(
    name: &str,
    variables: &Variables,
    constants: &ReadOnlyRegistry<ConstantInfo>,
) -> Result<f64, EvalError> {
    if let Some(value) = variables.get(name) {
        return Ok(*value);
    }
    constants
        .get(name)
        .map(|c| c.value())
        .ok_or_else(|| EvalError::VariableNotDefined {
            name: name.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_uses_tolerance() {
        assert_eq!(apply_binary(BinaryOp::Equal, 0.1 + 0.2, 0.3), 1.0);
        assert_eq!(apply_binary(BinaryOp::NotEqual, 0.1 + 0.2, 0.3), 0.0);
        assert_eq!(apply_binary(BinaryOp::NotEqual, 1.0, 1.1), 1.0);
    }

    #[test]
    fn logical_operators_treat_nonzero_as_true() {
        assert_eq!(apply_binary(BinaryOp::And, 2.0, -1.0), 1.0);
        assert_eq!(apply_binary(BinaryOp::And, 2.0, 0.0), 0.0);
        assert_eq!(apply_binary(BinaryOp::Or, 0.0, 0.5), 1.0);
        assert_eq!(apply_binary(BinaryOp::Or, 0.0, 0.0), 0.0);
    }

    #[test]
    fn arithmetic() {
        assert_eq!(apply_binary(BinaryOp::Modulo, 7.0, 3.0), 1.0);
        assert_eq!(apply_binary(BinaryOp::Power, 3.0, 2.0), 9.0);
        assert_eq!(apply_binary(BinaryOp::Divide, 1.0, 0.0), f64::INFINITY);
        assert_eq!(apply_unary(UnaryOp::Negate, 4.0), -4.0);
    }
}
