use super::program::{FunctionSlot, Instruction, OpCode, Program};
use crate::registry::{FunctionInfo, ReadOnlyRegistry};
use crate::{BinaryOp, Operation, OperationKind, UnaryOp};
use ahash::AHashMap;
use std::sync::Arc;

#[derive(Default)]
pub struct Compiler;

impl Compiler {
    /// Lower `operation` to a stack program.
    ///
    /// Calls to non-overwritable functions are bound here; everything else is looked up by
    /// name when the program runs.
    pub fn compile(operation: &Operation, functions: &ReadOnlyRegistry<FunctionInfo>) -> Program {
        let mut program = Program::new();
        let mut ctx = CompileCtx {
            program: &mut program,
            functions,
            var_slots: AHashMap::new(),
            depth: 0,
        };
        ctx.compile_tree(operation);
        program
    }
}

struct CompileCtx<'a> {
    program: &'a mut Program,
    functions: &'a ReadOnlyRegistry<FunctionInfo>,
    var_slots: AHashMap<Arc<str>, u32>,
    depth: usize,
}

enum Step<'t> {
    Visit(&'t Operation),
    Emit { op: OpCode, pops: usize },
    Call { name: &'t Arc<str>, argc: usize },
}

impl CompileCtx<'_> {
    fn emit(&mut self, op: OpCode, a: u32, b: u32, pops: usize) {
        self.program.instrs.push(Instruction::new(op, a, b));
        self.depth = self.depth - pops + 1;
        self.program.max_stack = self.program.max_stack.max(self.depth);
    }

    /// Emits postfix code for `root`, walking it with an explicit stack.
    fn compile_tree(&mut self, root: &Operation) {
        let mut steps = vec![Step::Visit(root)];
        while let Some(step) = steps.pop() {
            match step {
                Step::Visit(operation) => match operation.kind() {
                    OperationKind::IntegerConstant(v) => self.push_const(*v as f64),
                    OperationKind::FloatingPointConstant(v) => self.push_const(*v),
                    OperationKind::Variable(name) => self.load_var(name),
                    OperationKind::Unary { op, argument } => {
                        let op = match op {
                            UnaryOp::Negate => OpCode::Neg,
                        };
                        steps.push(Step::Emit { op, pops: 1 });
                        steps.push(Step::Visit(argument));
                    }
                    OperationKind::Binary { op, left, right } => {
                        steps.push(Step::Emit {
                            op: binary_opcode(*op),
                            pops: 2,
                        });
                        steps.push(Step::Visit(right));
                        steps.push(Step::Visit(left));
                    }
                    OperationKind::FunctionCall {
                        name, arguments, ..
                    } => {
                        steps.push(Step::Call {
                            name,
                            argc: arguments.len(),
                        });
                        steps.extend(arguments.iter().rev().map(Step::Visit));
                    }
                },
                Step::Emit { op, pops } => self.emit(op, 0, 0, pops),
                Step::Call { name, argc } => self.call(name, argc),
            }
        }
    }

    fn load_var(&mut self, name: &Arc<str>) {
        let next = self.program.vars.len() as u32;
        let idx = *self.var_slots.entry(name.clone()).or_insert_with(|| next);
        if idx == next {
            self.program.vars.push(name.clone());
        }
        self.emit(OpCode::LoadVar, idx, 0, 0);
    }

    fn call(&mut self, name: &Arc<str>, argc: usize) {
        let slot = match self.functions.get(name) {
            Some(info) if !info.is_overwritable() => FunctionSlot::Bound(info),
            _ => FunctionSlot::ByName(name.clone()),
        };
        let idx = self.program.funcs.len() as u32;
        self.program.funcs.push(slot);
        self.emit(OpCode::CallFunc, idx, argc as u32, argc);
    }

    fn push_const(&mut self, value: f64) {
        let idx = self.program.consts.len() as u32;
        self.program.consts.push(value);
        self.emit(OpCode::PushConst, idx, 0, 0);
    }
}

fn binary_opcode(op: BinaryOp) -> OpCode {
    match op {
        BinaryOp::Add => OpCode::Add,
        BinaryOp::Subtract => OpCode::Sub,
        BinaryOp::Multiply => OpCode::Mul,
        BinaryOp::Divide => OpCode::Div,
        BinaryOp::Modulo => OpCode::Mod,
        BinaryOp::Power => OpCode::Pow,
        BinaryOp::And => OpCode::And,
        BinaryOp::Or => OpCode::Or,
        BinaryOp::LessThan => OpCode::Lt,
        BinaryOp::LessOrEqual => OpCode::Le,
        BinaryOp::GreaterThan => OpCode::Gt,
        BinaryOp::GreaterOrEqual => OpCode::Ge,
        BinaryOp::Equal => OpCode::Eq,
        BinaryOp::NotEqual => OpCode::Ne,
    }
}
