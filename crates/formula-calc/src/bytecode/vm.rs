use super::compiler::Compiler;
use super::program::{FunctionSlot, OpCode, Program};
use crate::error::EvalError;
use crate::eval::{apply_binary, apply_unary, lookup_variable, CompiledFormula, Executor, Variables};
use crate::registry::{ConstantInfo, FunctionInfo, ReadOnlyRegistry};
use crate::{BinaryOp, Operation, UnaryOp};
use smallvec::SmallVec;
use std::sync::Arc;

pub struct Vm {
    stack: Vec<f64>,
    slots: SmallVec<[f64; 8]>,
}

impl Vm {
    pub fn new() -> Self {
        Self {
            stack: Vec::new(),
            slots: SmallVec::new(),
        }
    }

    pub fn with_capacity(stack: usize) -> Self {
        Self {
            stack: Vec::with_capacity(stack),
            slots: SmallVec::new(),
        }
    }

    /// Run `program`. Every variable slot is resolved before the first instruction executes.
    pub fn eval(
        &mut self,
        program: &Program,
        functions: &ReadOnlyRegistry<FunctionInfo>,
        constants: &ReadOnlyRegistry<ConstantInfo>,
        variables: &Variables,
    ) -> Result<f64, EvalError> {
        self.slots.clear();
        for name in program.variables() {
            self.slots.push(lookup_variable(name, variables, constants)?);
        }

        self.stack.clear();
        for inst in program.instrs() {
            match inst.op() {
                OpCode::PushConst => self.stack.push(program.consts[inst.a() as usize]),
                OpCode::LoadVar => self.stack.push(self.slots[inst.a() as usize]),
                OpCode::Neg => {
                    let v = self.stack.pop().unwrap_or(f64::NAN);
                    self.stack.push(apply_unary(UnaryOp::Negate, v));
                }
                OpCode::Add => self.binary(BinaryOp::Add),
                OpCode::Sub => self.binary(BinaryOp::Subtract),
                OpCode::Mul => self.binary(BinaryOp::Multiply),
                OpCode::Div => self.binary(BinaryOp::Divide),
                OpCode::Mod => self.binary(BinaryOp::Modulo),
                OpCode::Pow => self.binary(BinaryOp::Power),
                OpCode::And => self.binary(BinaryOp::And),
                OpCode::Or => self.binary(BinaryOp::Or),
                OpCode::Lt => self.binary(BinaryOp::LessThan),
                OpCode::Le => self.binary(BinaryOp::LessOrEqual),
                OpCode::Gt => self.binary(BinaryOp::GreaterThan),
                OpCode::Ge => self.binary(BinaryOp::GreaterOrEqual),
                OpCode::Eq => self.binary(BinaryOp::Equal),
                OpCode::Ne => self.binary(BinaryOp::NotEqual),
                OpCode::CallFunc => {
                    let argc = inst.b() as usize;
                    let start = self.stack.len().saturating_sub(argc);
                    let result = match &program.funcs[inst.a() as usize] {
                        FunctionSlot::Bound(info) => info.callable().call(&self.stack[start..]),
                        FunctionSlot::ByName(name) => {
                            let info =
                                functions
                                    .get(name)
                                    .ok_or_else(|| EvalError::UnknownFunction {
                                        name: name.to_string(),
                                    })?;
                            info.callable().call(&self.stack[start..])
                        }
                    };
                    self.stack.truncate(start);
                    self.stack.push(result);
                }
            }
        }

        Ok(self.stack.pop().unwrap_or(f64::NAN))
    }

    #[inline]
    fn binary(&mut self, op: BinaryOp) {
        let right = self.stack.pop().unwrap_or(f64::NAN);
        let left = self.stack.pop().unwrap_or(f64::NAN);
        self.stack.push(apply_binary(op, left, right));
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

/// Compiles trees to [`Program`]s and runs them on a [`Vm`].
#[derive(Debug, Default, Clone, Copy)]
pub struct BytecodeExecutor;

impl BytecodeExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl Executor for BytecodeExecutor {
    fn execute(
        &self,
        operation: &Operation,
        functions: &ReadOnlyRegistry<FunctionInfo>,
        constants: &ReadOnlyRegistry<ConstantInfo>,
        variables: &Variables,
    ) -> Result<f64, EvalError> {
        let program = Compiler::compile(operation, functions);
        Vm::with_capacity(program.max_stack()).eval(&program, functions, constants, variables)
    }

    fn compile(
        &self,
        operation: Operation,
        functions: ReadOnlyRegistry<FunctionInfo>,
        constants: ReadOnlyRegistry<ConstantInfo>,
    ) -> CompiledFormula {
        let program = Arc::new(Compiler::compile(&operation, &functions));
        Arc::new(move |variables: &Variables| {
            Vm::with_capacity(program.max_stack()).eval(&program, &functions, &constants, variables)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Callable, ConstantRegistry, FunctionRegistry};
    use pretty_assertions::assert_eq;

    #[test]
    fn evaluates_with_variables_and_constants() {
        let functions = FunctionRegistry::new(true);
        let constants = ConstantRegistry::new(true);
        constants
            .register(ConstantInfo::new("k", 10.0, true))
            .unwrap();
        // x * k - 4 / x
        let tree = Operation::binary(
            BinaryOp::Subtract,
            Operation::binary(
                BinaryOp::Multiply,
                Operation::variable("x"),
                Operation::variable("k"),
            ),
            Operation::binary(BinaryOp::Divide, Operation::integer(4), Operation::variable("x")),
        );
        let vars = Variables::from([("x".to_string(), 2.0)]);
        let value = BytecodeExecutor
            .execute(&tree, &functions.read_only(), &constants.read_only(), &vars)
            .unwrap();
        assert_eq!(value, 18.0);
    }

    #[test]
    fn overwritable_functions_are_resolved_per_call() {
        let functions = FunctionRegistry::new(true);
        functions
            .register(FunctionInfo::new("f", Callable::unary(|x| x + 1.0), true, true))
            .unwrap();
        let tree = Operation::function_call("f", vec![Operation::integer(1)], true);
        let compiled = BytecodeExecutor.compile(
            tree,
            functions.read_only(),
            ConstantRegistry::new(true).read_only(),
        );
        assert_eq!(compiled(&Variables::new()), Ok(2.0));

        functions
            .register(FunctionInfo::new("f", Callable::unary(|x| x * 10.0), true, true))
            .unwrap();
        assert_eq!(compiled(&Variables::new()), Ok(10.0));
    }

    #[test]
    fn missing_variable_fails_before_running() {
        let tree = Operation::variable("nope");
        let err = BytecodeExecutor
            .execute(
                &tree,
                &FunctionRegistry::new(true).read_only(),
                &ConstantRegistry::new(true).read_only(),
                &Variables::new(),
            )
            .unwrap_err();
        assert_eq!(
            err,
            EvalError::VariableNotDefined {
                name: "nope".to_string()
            }
        );
    }
}
