use crate::ast::ParseError;
use thiserror::Error;

/// Rejected function/constant registration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("the name \"{name}\" is already registered and cannot be overwritten")]
    NotOverwritable { name: String },
    #[error(
        "the number of parameters of \"{name}\" cannot change when overwriting it (existing: {existing}, requested: {requested})"
    )]
    ArityMismatch {
        name: String,
        existing: usize,
        requested: usize,
    },
    #[error("\"{name}\" cannot switch between a fixed-arity and a variadic function")]
    VariadicMismatch { name: String },
    #[error("\"{name}\" is not a valid function or constant name")]
    InvalidName { name: String },
}

/// Failure while evaluating an already-built tree.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvalError {
    #[error("the variable \"{name}\" used is not defined")]
    VariableNotDefined { name: String },
    #[error("the function \"{name}\" is not defined")]
    UnknownFunction { name: String },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CalcError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Eval(#[from] EvalError),
    #[error("the name \"{name}\" is a reserved constant name that cannot be overwritten")]
    ReservedConstantName { name: String },
    #[error("the name \"{name}\" is a function name; variables cannot have this name")]
    FunctionNameAsVariable { name: String },
    #[error("the formula text is empty")]
    EmptyFormula,
    #[error("invalid engine options: {0}")]
    InvalidOptions(String),
}

impl CalcError {
    /// The parse error, if this is one.
    pub fn as_parse(&self) -> Option<&ParseError> {
        match self {
            CalcError::Parse(err) => Some(err),
            _ => None,
        }
    }
}
