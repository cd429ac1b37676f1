//! Compiled evaluation backend: operation trees lowered to a flat stack program.

mod compiler;
mod program;
mod vm;

pub use compiler::Compiler;
pub use program::{FunctionSlot, Instruction, OpCode, Program};
pub use vm::{BytecodeExecutor, Vm};
