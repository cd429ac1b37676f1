//! Operator-precedence tree builder.
//!
//! Classic two-stack (operators / operands) reduction with a third stack tracking the
//! argument count of every open function call.

use super::{lex, Operator, Token, TokenKind};
use crate::registry::{ConstantInfo, FunctionInfo, ReadOnlyRegistry};
use crate::{BinaryOp, Operation, ParseError, ParseOptions, Span, UnaryOp};
use std::sync::Arc;

/// Parse `formula` into an operation tree.
///
/// Identifiers resolve, in order, to a registered function (which must be followed by an
/// argument list), a registered constant (inlined as a floating-point literal), or a variable
/// (lower-cased unless `opts.case_sensitive`).
pub fn parse_formula(
    formula: &str,
    opts: &ParseOptions,
    functions: &ReadOnlyRegistry<FunctionInfo>,
    constants: &ReadOnlyRegistry<ConstantInfo>,
) -> Result<Operation, ParseError> {
    let tokens = lex(formula, &opts.locale)?;
    if tokens.is_empty() {
        return Err(ParseError::new(
            "The formula is empty",
            Span::new(0, formula.chars().count()),
        ));
    }
    TreeBuilder::new(opts, functions, constants).build(&tokens)
}

enum StackItem {
    Operator { op: Operator, span: Span },
    Function { info: Arc<FunctionInfo>, span: Span },
    LeftBracket { span: Span },
}

struct Operand {
    operation: Operation,
    span: Span,
}

struct PendingCall {
    arguments: usize,
    /// Operand stack height when the call was opened.
    operand_base: usize,
}

struct TreeBuilder<'a> {
    opts: &'a ParseOptions,
    functions: &'a ReadOnlyRegistry<FunctionInfo>,
    constants: &'a ReadOnlyRegistry<ConstantInfo>,
    operators: Vec<StackItem>,
    operands: Vec<Operand>,
    calls: Vec<PendingCall>,
}

impl<'a> TreeBuilder<'a> {
    fn new(
        opts: &'a ParseOptions,
        functions: &'a ReadOnlyRegistry<FunctionInfo>,
        constants: &'a ReadOnlyRegistry<ConstantInfo>,
    ) -> Self {
        Self {
            opts,
            functions,
            constants,
            operators: Vec::new(),
            operands: Vec::new(),
            calls: Vec::new(),
        }
    }

    fn build(mut self, tokens: &[Token]) -> Result<Operation, ParseError> {
        for (i, token) in tokens.iter().enumerate() {
            let span = token.span;
            match &token.kind {
                TokenKind::Integer(v) => self.push_operand(Operation::integer(*v), span),
                TokenKind::FloatingPoint(v) => self.push_operand(Operation::float(*v), span),
                TokenKind::Text(name) => {
                    let next_is_bracket =
                        matches!(tokens.get(i + 1).map(|t| &t.kind), Some(TokenKind::LeftBracket));
                    self.push_identifier(name, span, next_is_bracket)?;
                }
                TokenKind::LeftBracket => self.operators.push(StackItem::LeftBracket { span }),
                TokenKind::RightBracket => {
                    let closes_empty_list =
                        i > 0 && matches!(tokens[i - 1].kind, TokenKind::LeftBracket);
                    if closes_empty_list {
                        self.mark_empty_argument_list(span)?;
                    }
                    self.pop_operations(true, Some(token))?;
                }
                TokenKind::ArgumentSeparator => {
                    self.pop_operations(false, Some(token))?;
                    self.next_argument(span)?;
                }
                TokenKind::Operator(op) => self.push_operator(*op, span)?,
            }
        }

        self.pop_operations(false, None)?;
        self.finish()
    }

    fn push_operand(&mut self, operation: Operation, span: Span) {
        self.operands.push(Operand { operation, span });
    }

    fn push_identifier(
        &mut self,
        name: &str,
        span: Span,
        next_is_bracket: bool,
    ) -> Result<(), ParseError> {
        if let Some(info) = self.functions.get(name) {
            if !next_is_bracket {
                return Err(ParseError::new(
                    format!(
                        "The function \"{name}\" at position {} must be followed by an argument list",
                        span.start
                    ),
                    span,
                ));
            }
            self.operators.push(StackItem::Function { info, span });
            self.calls.push(PendingCall {
                arguments: 1,
                operand_base: self.operands.len(),
            });
        } else if let Some(constant) = self.constants.get(name) {
            self.push_operand(Operation::float(constant.value()), span);
        } else if self.opts.case_sensitive {
            self.push_operand(Operation::variable(name), span);
        } else {
            self.push_operand(Operation::variable(name.to_lowercase()), span);
        }
        Ok(())
    }

    fn push_operator(&mut self, op: Operator, span: Span) -> Result<(), ParseError> {
        while let Some(top) = self.operators.last() {
            match top {
                StackItem::Operator { op: top_op, .. } => {
                    let pops = (op.is_left_associative() && op.precedence() <= top_op.precedence())
                        || op.precedence() < top_op.precedence();
                    if !pops {
                        break;
                    }
                }
                StackItem::Function { .. } => {}
                StackItem::LeftBracket { .. } => break,
            }
            if let Some(item) = self.operators.pop() {
                self.reduce(item)?;
            }
        }
        self.operators.push(StackItem::Operator { op, span });
        Ok(())
    }

    /// `f()` has zero arguments rather than the initial count of one.
    fn mark_empty_argument_list(&mut self, span: Span) -> Result<(), ParseError> {
        let len = self.operators.len();
        let is_call = len >= 2
            && matches!(self.operators[len - 1], StackItem::LeftBracket { .. })
            && matches!(self.operators[len - 2], StackItem::Function { .. });
        match self.calls.last_mut() {
            Some(call) if is_call => {
                call.arguments = 0;
                Ok(())
            }
            _ => Err(ParseError::new(
                format!("Empty brackets at position {}", span.start),
                span,
            )),
        }
    }

    fn next_argument(&mut self, span: Span) -> Result<(), ParseError> {
        let len = self.operators.len();
        let in_call = len >= 2
            && matches!(self.operators[len - 1], StackItem::LeftBracket { .. })
            && matches!(self.operators[len - 2], StackItem::Function { .. });
        match self.calls.last_mut() {
            Some(call) if in_call => {
                call.arguments += 1;
                Ok(())
            }
            _ => Err(ParseError::new(
                format!(
                    "Unexpected argument separator at position {}; separators are only valid inside a function call",
                    span.start
                ),
                span,
            )),
        }
    }

    /// Reduce operators down to the nearest left bracket.
    ///
    /// With `until_left_bracket` the bracket itself is consumed and must exist. Otherwise a
    /// remaining bracket is an error unless the current token is an argument separator (which
    /// only closes the current argument, not the call).
    fn pop_operations(
        &mut self,
        until_left_bracket: bool,
        current: Option<&Token>,
    ) -> Result<(), ParseError> {
        let missing_left_bracket = |token: Option<&Token>| {
            let span = token.map(|t| t.span).unwrap_or_default();
            ParseError::new(
                format!(
                    "No matching left bracket found for the right bracket at position {}",
                    span.start
                ),
                span,
            )
        };

        if until_left_bracket && self.operators.is_empty() {
            return Err(missing_left_bracket(current));
        }

        while let Some(top) = self.operators.last() {
            if matches!(top, StackItem::LeftBracket { .. }) {
                break;
            }
            if let Some(item) = self.operators.pop() {
                self.reduce(item)?;
            }
        }

        if until_left_bracket {
            match self.operators.pop() {
                Some(StackItem::LeftBracket { .. }) => Ok(()),
                _ => Err(missing_left_bracket(current)),
            }
        } else {
            match self.operators.last() {
                Some(StackItem::LeftBracket { span })
                    if !matches!(
                        current.map(|t| &t.kind),
                        Some(TokenKind::ArgumentSeparator)
                    ) =>
                {
                    Err(ParseError::new(
                        format!(
                            "No matching right bracket found for the left bracket at position {}",
                            span.start
                        ),
                        *span,
                    ))
                }
                _ => Ok(()),
            }
        }
    }

    fn reduce(&mut self, item: StackItem) -> Result<(), ParseError> {
        match item {
            StackItem::Operator {
                op: Operator::UnaryMinus,
                span,
            } => {
                let argument = self.pop_operand(Operator::UnaryMinus.symbol(), span)?;
                let span = span.cover(argument.span);
                self.push_operand(Operation::unary(UnaryOp::Negate, argument.operation), span);
            }
            StackItem::Operator { op, span } => {
                let right = self.pop_operand(op.symbol(), span)?;
                let left = self.pop_operand(op.symbol(), span)?;
                let span = left.span.cover(right.span);
                self.push_operand(
                    Operation::binary(binary_op(op), left.operation, right.operation),
                    span,
                );
            }
            StackItem::Function { info, span } => self.reduce_call(&info, span)?,
            // Brackets are consumed by `pop_operations`, never reduced.
            StackItem::LeftBracket { .. } => {}
        }
        Ok(())
    }

    fn reduce_call(&mut self, info: &FunctionInfo, span: Span) -> Result<(), ParseError> {
        let name = info.name();
        let call = self.calls.pop().ok_or_else(|| {
            ParseError::new(
                format!("The function \"{name}\" at position {} has no argument list", span.start),
                span,
            )
        })?;

        let expected = match info.arity() {
            Some(arity) => {
                if call.arguments != arity {
                    return Err(ParseError::new(
                        format!(
                            "The function \"{name}\" at position {} expects {arity} argument(s) but {} were supplied",
                            span.start, call.arguments
                        ),
                        span,
                    ));
                }
                arity
            }
            None => call.arguments,
        };

        let supplied = self.operands.len().saturating_sub(call.operand_base);
        if supplied != expected {
            return Err(ParseError::new(
                format!(
                    "The function \"{name}\" at position {} is missing an argument",
                    span.start
                ),
                span,
            ));
        }

        let args = self.operands.split_off(call.operand_base);
        let span = args.iter().fold(span, |acc, a| acc.cover(a.span));
        let arguments = args.into_iter().map(|a| a.operation).collect();
        self.push_operand(
            Operation::function_call(name, arguments, info.is_idempotent()),
            span,
        );
        Ok(())
    }

    fn pop_operand(&mut self, symbol: char, span: Span) -> Result<Operand, ParseError> {
        self.operands.pop().ok_or_else(|| {
            ParseError::new(
                format!(
                    "The operator \"{symbol}\" at position {} is missing an operand",
                    span.start
                ),
                span,
            )
        })
    }

    fn finish(mut self) -> Result<Operation, ParseError> {
        if self.operands.len() > 1 {
            let leftover = &self.operands[1];
            let span = leftover.span;
            let message = match leftover.operation.kind() {
                crate::OperationKind::IntegerConstant(v) => {
                    format!("Unexpected integer constant \"{v}\" found at position {}", span.start)
                }
                crate::OperationKind::FloatingPointConstant(v) => format!(
                    "Unexpected floating point constant \"{v}\" found at position {}",
                    span.start
                ),
                _ => format!(
                    "The syntax of the provided formula is not valid; unexpected operand at position {}",
                    span.start
                ),
            };
            return Err(ParseError::new(message, span));
        }

        self.operands
            .pop()
            .map(|operand| operand.operation)
            .ok_or_else(|| ParseError::new("The formula has no operands", Span::default()))
    }
}

fn binary_op(op: Operator) -> BinaryOp {
    match op {
        Operator::Add => BinaryOp::Add,
        Operator::Subtract => BinaryOp::Subtract,
        Operator::Multiply => BinaryOp::Multiply,
        Operator::Divide => BinaryOp::Divide,
        Operator::Modulo => BinaryOp::Modulo,
        Operator::Power => BinaryOp::Power,
        Operator::And => BinaryOp::And,
        Operator::Or => BinaryOp::Or,
        Operator::LessThan => BinaryOp::LessThan,
        Operator::LessOrEqual => BinaryOp::LessOrEqual,
        Operator::GreaterThan => BinaryOp::GreaterThan,
        Operator::GreaterOrEqual => BinaryOp::GreaterOrEqual,
        Operator::Equal => BinaryOp::Equal,
        Operator::NotEqual => BinaryOp::NotEqual,
        Operator::UnaryMinus => unreachable!("unary minus is reduced separately"),
    }
}
