use super::{apply_binary, apply_unary, lookup_variable, CompiledFormula, Executor, Variables};
use crate::error::EvalError;
use crate::registry::{ConstantInfo, FunctionInfo, ReadOnlyRegistry};
use crate::{BinaryOp, Operation, OperationKind, UnaryOp};
use smallvec::SmallVec;
use std::sync::Arc;

/// Tree-walking evaluator.
///
/// Walks the tree with an explicit work stack, so formula depth is bounded by heap rather than
/// by the native call stack. Functions are resolved through the registry on every call.
#[derive(Debug, Default, Clone, Copy)]
pub struct Interpreter;

enum Work<'a> {
    Visit(&'a Operation),
    Unary(UnaryOp),
    Binary(BinaryOp),
    Call { name: &'a str, argc: usize },
}

impl Interpreter {
    pub fn new() -> Self {
        Self
    }

    pub fn evaluate(
        &self,
        operation: &Operation,
        functions: &ReadOnlyRegistry<FunctionInfo>,
        constants: &ReadOnlyRegistry<ConstantInfo>,
        variables: &Variables,
    ) -> Result<f64, EvalError> {
        let mut work: Vec<Work<'_>> = vec![Work::Visit(operation)];
        let mut values: SmallVec<[f64; 16]> = SmallVec::new();

        while let Some(item) = work.pop() {
            match item {
                Work::Visit(node) => match node.kind() {
                    OperationKind::IntegerConstant(v) => values.push(*v as f64),
                    OperationKind::FloatingPointConstant(v) => values.push(*v),
                    OperationKind::Variable(name) => {
                        values.push(lookup_variable(name, variables, constants)?);
                    }
                    OperationKind::Unary { op, argument } => {
                        work.push(Work::Unary(*op));
                        work.push(Work::Visit(argument));
                    }
                    OperationKind::Binary { op, left, right } => {
                        // Left operand is evaluated first.
                        work.push(Work::Binary(*op));
                        work.push(Work::Visit(right));
                        work.push(Work::Visit(left));
                    }
                    OperationKind::FunctionCall {
                        name, arguments, ..
                    } => {
                        work.push(Work::Call {
                            name: &**name,
                            argc: arguments.len(),
                        });
                        work.extend(arguments.iter().rev().map(Work::Visit));
                    }
                },
                Work::Unary(op) => {
                    let v = values.pop().unwrap_or(f64::NAN);
                    values.push(apply_unary(op, v));
                }
                Work::Binary(op) => {
                    let right = values.pop().unwrap_or(f64::NAN);
                    let left = values.pop().unwrap_or(f64::NAN);
                    values.push(apply_binary(op, left, right));
                }
                Work::Call { name, argc } => {
                    let info = functions
                        .get(name)
                        .ok_or_else(|| EvalError::UnknownFunction {
                            name: name.to_string(),
                        })?;
                    let start = values.len().saturating_sub(argc);
                    let result = info.callable().call(&values[start..]);
                    values.truncate(start);
                    values.push(result);
                }
            }
        }

        Ok(values.pop().unwrap_or(f64::NAN))
    }
}

impl Executor for Interpreter {
    fn execute(
        &self,
        operation: &Operation,
        functions: &ReadOnlyRegistry<FunctionInfo>,
        constants: &ReadOnlyRegistry<ConstantInfo>,
        variables: &Variables,
    ) -> Result<f64, EvalError> {
        self.evaluate(operation, functions, constants, variables)
    }

    fn compile(
        &self,
        operation: Operation,
        functions: ReadOnlyRegistry<FunctionInfo>,
        constants: ReadOnlyRegistry<ConstantInfo>,
    ) -> CompiledFormula {
        let interpreter = *self;
        Arc::new(move |variables: &Variables| {
            interpreter.evaluate(&operation, &functions, &constants, variables)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Callable, ConstantRegistry, FunctionRegistry};

    fn registries() -> (FunctionRegistry, ConstantRegistry) {
        let functions = FunctionRegistry::new(true);
        functions
            .register(FunctionInfo::new(
                "sub",
                Callable::binary(|a, b| a - b),
                true,
                true,
            ))
            .unwrap();
        (functions, ConstantRegistry::new(true))
    }

    #[test]
    fn evaluates_arguments_in_declared_order() {
        let (functions, constants) = registries();
        let tree = Operation::function_call(
            "sub",
            vec![Operation::integer(10), Operation::variable("x")],
            true,
        );
        let vars = Variables::from([("x".to_string(), 4.0)]);
        let value = Interpreter
            .evaluate(&tree, &functions.read_only(), &constants.read_only(), &vars)
            .unwrap();
        assert_eq!(value, 6.0);
    }

    #[test]
    fn missing_variable_fails() {
        let (functions, constants) = registries();
        let tree = Operation::binary(
            BinaryOp::Add,
            Operation::integer(1),
            Operation::variable("y"),
        );
        let err = Interpreter
            .evaluate(
                &tree,
                &functions.read_only(),
                &constants.read_only(),
                &Variables::new(),
            )
            .unwrap_err();
        assert_eq!(
            err,
            EvalError::VariableNotDefined {
                name: "y".to_string()
            }
        );
    }

    #[test]
    fn deep_trees_do_not_overflow_the_stack() {
        let (functions, constants) = registries();
        let mut tree = Operation::integer(0);
        for _ in 0..100_000 {
            tree = Operation::binary(BinaryOp::Add, tree, Operation::integer(1));
        }
        let value = Interpreter
            .evaluate(
                &tree,
                &functions.read_only(),
                &constants.read_only(),
                &Variables::new(),
            )
            .unwrap();
        assert_eq!(value, 100_000.0);
    }
}
