use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Character range `[start, end)` within the formula text.
///
/// Offsets count Unicode scalar values (`char`), not bytes, so they line up with what a user
/// sees in an editor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    #[must_use]
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    #[must_use]
    pub fn point(pos: usize) -> Self {
        Self {
            start: pos,
            end: pos + 1,
        }
    }

    /// Smallest span covering both `self` and `other`.
    #[must_use]
    pub fn cover(self, other: Span) -> Self {
        Self {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseError {
    pub message: String,
    pub span: Span,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (at {}..{})",
            self.message, self.span.start, self.span.end
        )
    }
}

impl std::error::Error for ParseError {}

impl ParseError {
    #[must_use]
    pub fn new(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
        }
    }

    /// Position of the first offending character.
    #[must_use]
    pub fn position(&self) -> usize {
        self.span.start
    }
}

/// Culture-specific punctuation used when reading formula text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocaleConfig {
    pub decimal_separator: char,
    pub argument_separator: char,
}

impl LocaleConfig {
    #[must_use]
    pub const fn en_us() -> Self {
        Self {
            decimal_separator: '.',
            argument_separator: ',',
        }
    }

    /// `de-DE` style: `1,5` is one and a half, arguments are separated by `;`.
    #[must_use]
    pub const fn de_de() -> Self {
        Self {
            decimal_separator: ',',
            argument_separator: ';',
        }
    }
}

impl Default for LocaleConfig {
    fn default() -> Self {
        Self::en_us()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ParseOptions {
    pub locale: LocaleConfig,
    /// When `false`, variable names are lower-cased while building the tree.
    pub case_sensitive: bool,
}

/// Static result type of a tree node.
///
/// All runtime values are `f64`; this only records whether an operation would stay
/// integer-valued given integer inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Integer,
    FloatingPoint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Negate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Power,
    And,
    Or,
    LessThan,
    LessOrEqual,
    GreaterThan,
    GreaterOrEqual,
    Equal,
    NotEqual,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Subtract => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::Modulo => "%",
            BinaryOp::Power => "^",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
            BinaryOp::LessThan => "<",
            BinaryOp::LessOrEqual => "<=",
            BinaryOp::GreaterThan => ">",
            BinaryOp::GreaterOrEqual => ">=",
            BinaryOp::Equal => "==",
            BinaryOp::NotEqual => "!=",
        }
    }

    fn result_type(self, left: DataType, right: DataType) -> DataType {
        match self {
            BinaryOp::Add | BinaryOp::Subtract | BinaryOp::Multiply | BinaryOp::Modulo => {
                if left == DataType::Integer && right == DataType::Integer {
                    DataType::Integer
                } else {
                    DataType::FloatingPoint
                }
            }
            BinaryOp::Divide | BinaryOp::Power => DataType::FloatingPoint,
            // Booleans are represented as 0/1.
            _ => DataType::Integer,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum OperationKind {
    IntegerConstant(i64),
    FloatingPointConstant(f64),
    Variable(Arc<str>),
    Unary {
        op: UnaryOp,
        argument: Box<Operation>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Operation>,
        right: Box<Operation>,
    },
    FunctionCall {
        name: Arc<str>,
        arguments: Vec<Operation>,
        /// Idempotence of the called function itself, independent of its arguments.
        is_idempotent: bool,
    },
}

/// A node of the operation tree.
///
/// The derived flags are computed by the constructors from the children, so a rewritten tree
/// (built by constructing fresh parents) can never carry stale flags.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    kind: OperationKind,
    data_type: DataType,
    depends_on_variables: bool,
    is_idempotent: bool,
}

impl Operation {
    pub fn integer(value: i64) -> Self {
        Self {
            kind: OperationKind::IntegerConstant(value),
            data_type: DataType::Integer,
            depends_on_variables: false,
            is_idempotent: true,
        }
    }

    pub fn float(value: f64) -> Self {
        Self {
            kind: OperationKind::FloatingPointConstant(value),
            data_type: DataType::FloatingPoint,
            depends_on_variables: false,
            is_idempotent: true,
        }
    }

    pub fn variable(name: impl Into<Arc<str>>) -> Self {
        Self {
            kind: OperationKind::Variable(name.into()),
            data_type: DataType::FloatingPoint,
            depends_on_variables: true,
            is_idempotent: true,
        }
    }

    pub fn unary(op: UnaryOp, argument: Operation) -> Self {
        Self {
            data_type: argument.data_type,
            depends_on_variables: argument.depends_on_variables,
            is_idempotent: argument.is_idempotent,
            kind: OperationKind::Unary {
                op,
                argument: Box::new(argument),
            },
        }
    }

    pub fn binary(op: BinaryOp, left: Operation, right: Operation) -> Self {
        Self {
            data_type: op.result_type(left.data_type, right.data_type),
            depends_on_variables: left.depends_on_variables || right.depends_on_variables,
            is_idempotent: left.is_idempotent && right.is_idempotent,
            kind: OperationKind::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
        }
    }

    pub fn function_call(
        name: impl Into<Arc<str>>,
        arguments: Vec<Operation>,
        is_idempotent: bool,
    ) -> Self {
        let depends_on_variables = arguments.iter().any(|a| a.depends_on_variables);
        let args_idempotent = arguments.iter().all(|a| a.is_idempotent);
        Self {
            kind: OperationKind::FunctionCall {
                name: name.into(),
                arguments,
                is_idempotent,
            },
            data_type: DataType::FloatingPoint,
            depends_on_variables,
            is_idempotent: is_idempotent && args_idempotent,
        }
    }

    /// Rebuild a node from its parts, recomputing the derived flags.
    pub fn from_kind(kind: OperationKind) -> Self {
        match kind {
            OperationKind::IntegerConstant(v) => Self::integer(v),
            OperationKind::FloatingPointConstant(v) => Self::float(v),
            OperationKind::Variable(name) => Self::variable(name),
            OperationKind::Unary { op, argument } => Self::unary(op, *argument),
            OperationKind::Binary { op, left, right } => Self::binary(op, *left, *right),
            OperationKind::FunctionCall {
                name,
                arguments,
                is_idempotent,
            } => Self::function_call(name, arguments, is_idempotent),
        }
    }

    #[inline]
    pub fn kind(&self) -> &OperationKind {
        &self.kind
    }

    #[inline]
    pub fn into_kind(mut self) -> OperationKind {
        std::mem::replace(&mut self.kind, OperationKind::IntegerConstant(0))
    }

    fn has_children(&self) -> bool {
        matches!(
            self.kind,
            OperationKind::Unary { .. }
                | OperationKind::Binary { .. }
                | OperationKind::FunctionCall { .. }
        )
    }

    #[inline]
    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    /// `true` if any node in this subtree is a [`OperationKind::Variable`].
    #[inline]
    pub fn depends_on_variables(&self) -> bool {
        self.depends_on_variables
    }

    /// `true` if re-evaluating this subtree always yields the same value.
    #[inline]
    pub fn is_idempotent(&self) -> bool {
        self.is_idempotent
    }

    pub fn is_literal(&self) -> bool {
        matches!(
            self.kind,
            OperationKind::IntegerConstant(_) | OperationKind::FloatingPointConstant(_)
        )
    }

    pub fn literal_value(&self) -> Option<f64> {
        match self.kind {
            OperationKind::IntegerConstant(v) => Some(v as f64),
            OperationKind::FloatingPointConstant(v) => Some(v),
            _ => None,
        }
    }

    /// Names of all variables referenced by this tree, in first-use (left-to-right) order.
    pub fn variables(&self) -> Vec<Arc<str>> {
        let mut out: Vec<Arc<str>> = Vec::new();
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            match &node.kind {
                OperationKind::Variable(name) => {
                    if !out.iter().any(|n| n == name) {
                        out.push(name.clone());
                    }
                }
                OperationKind::Unary { argument, .. } => stack.push(argument),
                OperationKind::Binary { left, right, .. } => {
                    stack.push(right);
                    stack.push(left);
                }
                OperationKind::FunctionCall { arguments, .. } => {
                    stack.extend(arguments.iter().rev());
                }
                OperationKind::IntegerConstant(_) | OperationKind::FloatingPointConstant(_) => {}
            }
        }
        out
    }
}

/// Moves every child that has children of its own onto `out`, leaving a leaf in its place.
fn detach_children(kind: &mut OperationKind, out: &mut Vec<Operation>) {
    let mut detach = |child: &mut Operation| {
        if child.has_children() {
            out.push(std::mem::replace(child, Operation::integer(0)));
        }
    };
    match kind {
        OperationKind::Unary { argument, .. } => detach(&mut **argument),
        OperationKind::Binary { left, right, .. } => {
            detach(&mut **left);
            detach(&mut **right);
        }
        OperationKind::FunctionCall { arguments, .. } => arguments.iter_mut().for_each(&mut detach),
        OperationKind::IntegerConstant(_)
        | OperationKind::FloatingPointConstant(_)
        | OperationKind::Variable(_) => {}
    }
}

// Deep trees are torn down iteratively; the derived drop glue would recurse once per level.
impl Drop for Operation {
    fn drop(&mut self) {
        if !self.has_children() {
            return;
        }
        let mut pending = Vec::new();
        detach_children(&mut self.kind, &mut pending);
        while let Some(mut node) = pending.pop() {
            detach_children(&mut node.kind, &mut pending);
        }
    }
}

enum Piece<'a> {
    Node(&'a Operation),
    Text(&'static str),
}

fn write_float(f: &mut fmt::Formatter<'_>, value: f64) -> fmt::Result {
    // Non-finite values have no literal syntax; render an expression that evaluates to them.
    if value.is_nan() {
        f.write_str("(0.0 / 0.0)")
    } else if value == f64::INFINITY {
        f.write_str("(1.0 / 0.0)")
    } else if value == f64::NEG_INFINITY {
        f.write_str("-(1.0 / 0.0)")
    } else {
        write!(f, "{value:?}")
    }
}

impl fmt::Display for Operation {
    /// Renders the tree back to fully parenthesized formula text.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut pieces = vec![Piece::Node(self)];
        while let Some(piece) = pieces.pop() {
            let node = match piece {
                Piece::Text(text) => {
                    f.write_str(text)?;
                    continue;
                }
                Piece::Node(node) => node,
            };
            match &node.kind {
                OperationKind::IntegerConstant(v) => write!(f, "{v}")?,
                OperationKind::FloatingPointConstant(v) => write_float(f, *v)?,
                OperationKind::Variable(name) => f.write_str(name)?,
                OperationKind::Unary {
                    op: UnaryOp::Negate,
                    argument,
                } => {
                    f.write_str("-(")?;
                    pieces.push(Piece::Text(")"));
                    pieces.push(Piece::Node(argument));
                }
                OperationKind::Binary { op, left, right } => {
                    f.write_str("(")?;
                    pieces.push(Piece::Text(")"));
                    pieces.push(Piece::Node(right));
                    pieces.push(Piece::Text(" "));
                    pieces.push(Piece::Text(op.symbol()));
                    pieces.push(Piece::Text(" "));
                    pieces.push(Piece::Node(left));
                }
                OperationKind::FunctionCall {
                    name, arguments, ..
                } => {
                    write!(f, "{name}(")?;
                    pieces.push(Piece::Text(")"));
                    for (i, arg) in arguments.iter().enumerate().rev() {
                        pieces.push(Piece::Node(arg));
                        if i > 0 {
                            pieces.push(Piece::Text(", "));
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_combine_from_children() {
        let tree = Operation::binary(
            BinaryOp::Add,
            Operation::integer(1),
            Operation::function_call("random", vec![], false),
        );
        assert!(!tree.depends_on_variables());
        assert!(!tree.is_idempotent());

        let tree = Operation::unary(UnaryOp::Negate, Operation::variable("x"));
        assert!(tree.depends_on_variables());
        assert!(tree.is_idempotent());
    }

    #[test]
    fn integer_type_propagates_through_additive_ops() {
        let sum = Operation::binary(BinaryOp::Add, Operation::integer(1), Operation::integer(2));
        assert_eq!(sum.data_type(), DataType::Integer);

        let quotient =
            Operation::binary(BinaryOp::Divide, Operation::integer(1), Operation::integer(2));
        assert_eq!(quotient.data_type(), DataType::FloatingPoint);

        let mixed = Operation::binary(
            BinaryOp::Multiply,
            Operation::integer(1),
            Operation::float(2.5),
        );
        assert_eq!(mixed.data_type(), DataType::FloatingPoint);
    }

    #[test]
    fn variables_are_listed_in_first_use_order() {
        let tree = Operation::function_call(
            "max",
            vec![
                Operation::variable("b"),
                Operation::binary(
                    BinaryOp::Add,
                    Operation::variable("a"),
                    Operation::variable("b"),
                ),
            ],
            true,
        );
        let vars = tree.variables();
        let names: Vec<&str> = vars.iter().map(|n| &**n).collect();
        assert_eq!(names, vec!["b", "a"]);
    }

    #[test]
    fn display_renders_parenthesized_text() {
        let tree = Operation::binary(
            BinaryOp::Multiply,
            Operation::integer(2),
            Operation::unary(UnaryOp::Negate, Operation::variable("x")),
        );
        assert_eq!(tree.to_string(), "(2 * -(x))");
    }

    #[test]
    fn non_finite_literals_render_as_expressions() {
        assert_eq!(Operation::float(f64::INFINITY).to_string(), "(1.0 / 0.0)");
        assert_eq!(Operation::float(f64::NEG_INFINITY).to_string(), "-(1.0 / 0.0)");
        assert_eq!(Operation::float(f64::NAN).to_string(), "(0.0 / 0.0)");
        assert_eq!(Operation::float(-0.5).to_string(), "-0.5");
    }

    #[test]
    fn deep_trees_render_and_drop_without_recursing() {
        let mut tree = Operation::variable("x");
        for _ in 0..100_000 {
            tree = Operation::binary(BinaryOp::Add, tree, Operation::integer(1));
        }
        let text = tree.to_string();
        assert!(text.starts_with("(((("));
        assert!(text.ends_with(" + 1)"));
        drop(tree);
    }
}
