use crate::registry::FunctionInfo;
use std::sync::Arc;

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpCode {
    PushConst = 0,
    LoadVar = 1,
    Neg = 2,
    Add = 3,
    Sub = 4,
    Mul = 5,
    Div = 6,
    Mod = 7,
    Pow = 8,
    And = 9,
    Or = 10,
    Lt = 11,
    Le = 12,
    Gt = 13,
    Ge = 14,
    Eq = 15,
    Ne = 16,
    CallFunc = 17,
}

/// Packed instruction:
/// - bits 56..63: opcode
/// - bits 28..55: operand a
/// - bits 0..27: operand b
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Instruction(u64);

impl Instruction {
    #[inline]
    pub fn new(op: OpCode, a: u32, b: u32) -> Self {
        debug_assert!(a < (1 << 28));
        debug_assert!(b < (1 << 28));
        Instruction(((op as u64) << 56) | ((a as u64) << 28) | (b as u64))
    }

    #[inline]
    pub fn op(self) -> OpCode {
        match ((self.0 >> 56) & 0xFF) as u8 {
            0 => OpCode::PushConst,
            1 => OpCode::LoadVar,
            2 => OpCode::Neg,
            3 => OpCode::Add,
            4 => OpCode::Sub,
            5 => OpCode::Mul,
            6 => OpCode::Div,
            7 => OpCode::Mod,
            8 => OpCode::Pow,
            9 => OpCode::And,
            10 => OpCode::Or,
            11 => OpCode::Lt,
            12 => OpCode::Le,
            13 => OpCode::Gt,
            14 => OpCode::Ge,
            15 => OpCode::Eq,
            16 => OpCode::Ne,
            17 => OpCode::CallFunc,
            _ => unreachable!("invalid opcode"),
        }
    }

    #[inline]
    pub fn a(self) -> u32 {
        ((self.0 >> 28) & 0x0FFF_FFFF) as u32
    }

    #[inline]
    pub fn b(self) -> u32 {
        (self.0 & 0x0FFF_FFFF) as u32
    }
}

/// Call target of a `CallFunc` instruction.
#[derive(Clone, Debug)]
pub enum FunctionSlot {
    /// Non-overwritable function, bound at compile time.
    Bound(Arc<FunctionInfo>),
    /// Looked up through the registry on every call.
    ByName(Arc<str>),
}

#[derive(Clone, Debug)]
pub struct Program {
    pub(crate) instrs: Vec<Instruction>,
    pub(crate) consts: Vec<f64>,
    /// Variable names, indexed by `LoadVar` operand; first-use order.
    pub(crate) vars: Vec<Arc<str>>,
    pub(crate) funcs: Vec<FunctionSlot>,
    pub(crate) max_stack: usize,
}

impl Program {
    pub fn new() -> Self {
        Self {
            instrs: Vec::new(),
            consts: Vec::new(),
            vars: Vec::new(),
            funcs: Vec::new(),
            max_stack: 0,
        }
    }

    #[inline]
    pub fn instrs(&self) -> &[Instruction] {
        &self.instrs
    }

    #[inline]
    pub fn variables(&self) -> &[Arc<str>] {
        &self.vars
    }

    /// Deepest value stack the program needs.
    #[inline]
    pub fn max_stack(&self) -> usize {
        self.max_stack
    }
}

impl Default for Program {
    fn default() -> Self {
        Self::new()
    }
}
