//! Constant folding over operation trees.
//!
//! The pass is a functional rewrite: every node is consumed and a replacement is returned. It
//! runs bottom-up over an explicit work stack, so a node is rebuilt only after its children have
//! been folded.

use crate::error::EvalError;
use crate::eval::{Executor, Interpreter, Variables};
use crate::registry::{ConstantInfo, FunctionInfo, ReadOnlyRegistry};
use crate::{BinaryOp, Operation, OperationKind, UnaryOp};
use log::trace;
use std::sync::Arc;

/// Folds subtrees that neither read variables nor call non-idempotent functions.
///
/// Calls to overwritable functions are never folded, since the function may be replaced after
/// the tree is built; their arguments still are. Folding runs each node through `executor`, the
/// tree-walking [`Interpreter`] by default.
#[derive(Debug, Default, Clone)]
pub struct Optimizer<E = Interpreter> {
    executor: E,
}

enum Step {
    Visit(Operation),
    Unary(UnaryOp),
    Binary(BinaryOp),
    Call {
        name: Arc<str>,
        argc: usize,
        is_idempotent: bool,
    },
}

impl Optimizer<Interpreter> {
    pub fn new() -> Self {
        Self {
            executor: Interpreter,
        }
    }
}

impl<E: Executor> Optimizer<E> {
    pub fn with_executor(executor: E) -> Self {
        Self { executor }
    }

    pub fn optimize(
        &self,
        operation: Operation,
        functions: &ReadOnlyRegistry<FunctionInfo>,
        constants: &ReadOnlyRegistry<ConstantInfo>,
    ) -> Result<Operation, EvalError> {
        let mut work = vec![Step::Visit(operation)];
        let mut done: Vec<Operation> = Vec::new();

        while let Some(step) = work.pop() {
            let rebuilt = match step {
                Step::Visit(node) => {
                    match node.into_kind() {
                        OperationKind::Unary { op, argument } => {
                            work.push(Step::Unary(op));
                            work.push(Step::Visit(*argument));
                        }
                        OperationKind::Binary { op, left, right } => {
                            work.push(Step::Binary(op));
                            work.push(Step::Visit(*right));
                            work.push(Step::Visit(*left));
                        }
                        OperationKind::FunctionCall {
                            name,
                            arguments,
                            is_idempotent,
                        } => {
                            work.push(Step::Call {
                                name,
                                argc: arguments.len(),
                                is_idempotent,
                            });
                            work.extend(arguments.into_iter().rev().map(Step::Visit));
                        }
                        leaf => done.push(Operation::from_kind(leaf)),
                    }
                    continue;
                }
                Step::Unary(op) => Operation::unary(op, pop(&mut done)),
                Step::Binary(op) => {
                    let right = pop(&mut done);
                    let left = pop(&mut done);
                    Operation::binary(op, left, right)
                }
                Step::Call {
                    name,
                    argc,
                    is_idempotent,
                } => {
                    let arguments = done.split_off(done.len().saturating_sub(argc));
                    Operation::function_call(name, arguments, is_idempotent)
                }
            };
            done.push(self.fold(rebuilt, functions, constants)?);
        }

        Ok(pop(&mut done))
    }

    /// Fold a freshly rebuilt node whose children are already folded.
    fn fold(
        &self,
        node: Operation,
        functions: &ReadOnlyRegistry<FunctionInfo>,
        constants: &ReadOnlyRegistry<ConstantInfo>,
    ) -> Result<Operation, EvalError> {
        if is_foldable(&node, functions) {
            let value = self
                .executor
                .execute(&node, functions, constants, &Variables::new())?;
            trace!("folded `{node}` to {value:?}");
            return Ok(Operation::float(value));
        }

        // x * 0 drops x even when it is unbound or not idempotent.
        if let OperationKind::Binary {
            op: BinaryOp::Multiply,
            left,
            right,
        } = node.kind()
        {
            if is_zero(left) || is_zero(right) {
                trace!("multiplication by zero folded to 0.0");
                return Ok(Operation::float(0.0));
            }
        }
        Ok(node)
    }
}

fn pop(done: &mut Vec<Operation>) -> Operation {
    done.pop().unwrap_or_else(|| Operation::float(f64::NAN))
}

/// A node folds when all of its operands are literals and, for calls, the function is
/// idempotent and cannot be replaced.
fn is_foldable(node: &Operation, functions: &ReadOnlyRegistry<FunctionInfo>) -> bool {
    match node.kind() {
        OperationKind::Unary { argument, .. } => argument.is_literal(),
        OperationKind::Binary { left, right, .. } => left.is_literal() && right.is_literal(),
        OperationKind::FunctionCall {
            name,
            arguments,
            is_idempotent,
        } => {
            *is_idempotent
                && arguments.iter().all(Operation::is_literal)
                && functions
                    .get(name)
                    .is_some_and(|info| !info.is_overwritable())
        }
        OperationKind::IntegerConstant(_)
        | OperationKind::FloatingPointConstant(_)
        | OperationKind::Variable(_) => false,
    }
}

fn is_zero(operation: &Operation) -> bool {
    operation.literal_value() == Some(0.0)
}
