//! Formula tokenizer and tree builder.

mod builder;

pub use builder::parse_formula;

use crate::{LocaleConfig, ParseError, Span};

/// Operator tokens, including the synthetic unary minus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Power,
    UnaryMinus,
    And,
    Or,
    LessThan,
    LessOrEqual,
    GreaterThan,
    GreaterOrEqual,
    Equal,
    NotEqual,
}

impl Operator {
    /// Single-character form used in diagnostics. Two-character operators fold into their
    /// mathematical symbol (`<=` is `≤`), and unary minus is `_`.
    pub fn symbol(self) -> char {
        match self {
            Operator::Add => '+',
            Operator::Subtract => '-',
            Operator::Multiply => '*',
            Operator::Divide => '/',
            Operator::Modulo => '%',
            Operator::Power => '^',
            Operator::UnaryMinus => '_',
            Operator::And => '&',
            Operator::Or => '|',
            Operator::LessThan => '<',
            Operator::LessOrEqual => '≤',
            Operator::GreaterThan => '>',
            Operator::GreaterOrEqual => '≥',
            Operator::Equal => '=',
            Operator::NotEqual => '≠',
        }
    }

    /// Higher binds tighter.
    pub(crate) fn precedence(self) -> u8 {
        match self {
            Operator::And | Operator::Or => 1,
            Operator::LessThan
            | Operator::LessOrEqual
            | Operator::GreaterThan
            | Operator::GreaterOrEqual
            | Operator::Equal
            | Operator::NotEqual => 2,
            Operator::Add | Operator::Subtract => 3,
            Operator::Multiply | Operator::Divide | Operator::Modulo => 4,
            Operator::Power => 5,
            Operator::UnaryMinus => 6,
        }
    }

    pub(crate) fn is_left_associative(self) -> bool {
        matches!(
            self,
            Operator::Add | Operator::Subtract | Operator::Multiply | Operator::Divide
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Integer(i64),
    FloatingPoint(f64),
    Text(String),
    Operator(Operator),
    LeftBracket,
    RightBracket,
    ArgumentSeparator,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

impl Token {
    #[inline]
    pub fn start(&self) -> usize {
        self.span.start
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.span.end - self.span.start
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Split formula text into tokens.
///
/// Unary minus is resolved here: a `-` that appears where an operand is expected (start of
/// input, after an operator, an opening bracket or an argument separator) becomes
/// [`Operator::UnaryMinus`].
pub fn lex(formula: &str, locale: &LocaleConfig) -> Result<Vec<Token>, ParseError> {
    Lexer::new(formula, *locale).lex()
}

struct Lexer {
    chars: Vec<char>,
    idx: usize,
    locale: LocaleConfig,
    tokens: Vec<Token>,
    /// `true` while the next character may start a new operand.
    is_formula_sub_part: bool,
}

impl Lexer {
    fn new(src: &str, locale: LocaleConfig) -> Self {
        Self {
            chars: src.chars().collect(),
            idx: 0,
            locale,
            tokens: Vec::new(),
            is_formula_sub_part: true,
        }
    }

    fn lex(mut self) -> Result<Vec<Token>, ParseError> {
        while let Some(ch) = self.peek_char() {
            let start = self.idx;

            if ch.is_whitespace() {
                self.bump();
                continue;
            }
            if ch.is_ascii_digit() || ch == self.locale.decimal_separator {
                self.lex_number()?;
                continue;
            }
            if ch.is_ascii_alphabetic() {
                self.lex_identifier();
                continue;
            }
            if ch == self.locale.argument_separator {
                self.bump();
                self.push(TokenKind::ArgumentSeparator, start);
                self.is_formula_sub_part = true;
                continue;
            }

            match ch {
                '(' => {
                    self.bump();
                    self.push(TokenKind::LeftBracket, start);
                    self.is_formula_sub_part = true;
                }
                ')' => {
                    self.bump();
                    self.push(TokenKind::RightBracket, start);
                    self.is_formula_sub_part = false;
                }
                '-' => {
                    self.bump();
                    let op = if self.is_formula_sub_part {
                        Operator::UnaryMinus
                    } else {
                        Operator::Subtract
                    };
                    self.push_operator(op, start);
                }
                '+' | '*' | '/' | '%' | '^' | '≤' | '≥' | '≠' => {
                    self.bump();
                    let op = match ch {
                        '+' => Operator::Add,
                        '*' => Operator::Multiply,
                        '/' => Operator::Divide,
                        '%' => Operator::Modulo,
                        '^' => Operator::Power,
                        '≤' => Operator::LessOrEqual,
                        '≥' => Operator::GreaterOrEqual,
                        _ => Operator::NotEqual,
                    };
                    self.push_operator(op, start);
                }
                '<' | '>' => {
                    self.bump();
                    let or_equal = self.peek_char() == Some('=');
                    if or_equal {
                        self.bump();
                    }
                    let op = match (ch, or_equal) {
                        ('<', false) => Operator::LessThan,
                        ('<', true) => Operator::LessOrEqual,
                        (_, false) => Operator::GreaterThan,
                        (_, true) => Operator::GreaterOrEqual,
                    };
                    self.push_operator(op, start);
                }
                '!' | '=' | '&' | '|' => {
                    let (second, op) = match ch {
                        '!' => ('=', Operator::NotEqual),
                        '=' => ('=', Operator::Equal),
                        '&' => ('&', Operator::And),
                        _ => ('|', Operator::Or),
                    };
                    self.bump();
                    if self.peek_char() != Some(second) {
                        return Err(ParseError::new(
                            format!(
                                "Invalid token \"{ch}\" detected at position {start}; expected \"{ch}{second}\""
                            ),
                            Span::point(start),
                        ));
                    }
                    self.bump();
                    self.push_operator(op, start);
                }
                _ => {
                    return Err(ParseError::new(
                        format!("Invalid token \"{ch}\" detected at position {start}"),
                        Span::point(start),
                    ));
                }
            }
        }

        Ok(self.tokens)
    }

    fn lex_number(&mut self) -> Result<(), ParseError> {
        let start = self.idx;
        let mut text = String::new();
        let mut has_decimal = false;
        let mut is_scientific = false;

        while let Some(c) = self.peek_char() {
            if c.is_ascii_digit() {
                text.push(c);
                self.bump();
            } else if c == self.locale.decimal_separator {
                if has_decimal || is_scientific {
                    return Err(ParseError::new(
                        format!("Invalid token \"{c}\" detected at position {}", self.idx),
                        Span::point(self.idx),
                    ));
                }
                has_decimal = true;
                text.push('.');
                self.bump();
            } else if c == 'e' || c == 'E' {
                if is_scientific {
                    return Err(ParseError::new(
                        format!(
                            "Invalid token \"{c}\" detected at position {}; a number may only have one exponent",
                            self.idx
                        ),
                        Span::point(self.idx),
                    ));
                }
                let sign = self.peek_nth(1).filter(|s| matches!(s, '+' | '-'));
                let first_exp_digit = if sign.is_some() {
                    self.peek_nth(2)
                } else {
                    self.peek_nth(1)
                };
                if !first_exp_digit.is_some_and(|d| d.is_ascii_digit()) {
                    // Not an exponent; the `e` starts the next token.
                    break;
                }
                is_scientific = true;
                text.push('e');
                self.bump();
                if let Some(sign) = sign {
                    text.push(sign);
                    self.bump();
                }
            } else {
                break;
            }
        }

        let span = Span::new(start, self.idx);
        let kind = if !has_decimal && !is_scientific {
            match text.parse::<i64>() {
                Ok(v) => TokenKind::Integer(v),
                // Too large for an integer literal.
                Err(_) => TokenKind::FloatingPoint(parse_float(&text, span)?),
            }
        } else {
            TokenKind::FloatingPoint(parse_float(&text, span)?)
        };
        self.tokens.push(Token { kind, span });
        self.is_formula_sub_part = false;
        Ok(())
    }

    fn lex_identifier(&mut self) {
        let start = self.idx;
        let mut name = String::new();
        while let Some(c) = self.peek_char() {
            if c.is_ascii_alphanumeric() || c == '_' {
                name.push(c);
                self.bump();
            } else {
                break;
            }
        }
        self.push(TokenKind::Text(name), start);
        self.is_formula_sub_part = false;
    }

    fn push_operator(&mut self, op: Operator, start: usize) {
        self.push(TokenKind::Operator(op), start);
        self.is_formula_sub_part = true;
    }

    fn push(&mut self, kind: TokenKind, start: usize) {
        self.tokens.push(Token {
            kind,
            span: Span::new(start, self.idx),
        });
    }

    #[inline]
    fn peek_char(&self) -> Option<char> {
        self.chars.get(self.idx).copied()
    }

    #[inline]
    fn peek_nth(&self, n: usize) -> Option<char> {
        self.chars.get(self.idx + n).copied()
    }

    #[inline]
    fn bump(&mut self) {
        self.idx += 1;
    }
}

fn parse_float(text: &str, span: Span) -> Result<f64, ParseError> {
    text.parse::<f64>().map_err(|_| {
        ParseError::new(
            format!(
                "Invalid numeric literal \"{text}\" at position {}",
                span.start
            ),
            span,
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn kinds(formula: &str) -> Vec<TokenKind> {
        lex(formula, &LocaleConfig::en_us())
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn lexes_literals_and_operators() {
        assert_eq!(
            kinds("2+3.5*var_1"),
            vec![
                TokenKind::Integer(2),
                TokenKind::Operator(Operator::Add),
                TokenKind::FloatingPoint(3.5),
                TokenKind::Operator(Operator::Multiply),
                TokenKind::Text("var_1".to_string()),
            ]
        );
    }

    #[test]
    fn minus_after_operand_is_subtraction() {
        assert_eq!(
            kinds("5-2"),
            vec![
                TokenKind::Integer(5),
                TokenKind::Operator(Operator::Subtract),
                TokenKind::Integer(2),
            ]
        );
        assert_eq!(
            kinds("(a)-b"),
            vec![
                TokenKind::LeftBracket,
                TokenKind::Text("a".to_string()),
                TokenKind::RightBracket,
                TokenKind::Operator(Operator::Subtract),
                TokenKind::Text("b".to_string()),
            ]
        );
    }

    #[test]
    fn minus_in_operand_position_is_unary() {
        assert_eq!(
            kinds("5*-2"),
            vec![
                TokenKind::Integer(5),
                TokenKind::Operator(Operator::Multiply),
                TokenKind::Operator(Operator::UnaryMinus),
                TokenKind::Integer(2),
            ]
        );
        assert_eq!(
            kinds("-x"),
            vec![
                TokenKind::Operator(Operator::UnaryMinus),
                TokenKind::Text("x".to_string()),
            ]
        );
        assert_eq!(
            kinds("max(1,-2)")[4],
            TokenKind::Operator(Operator::UnaryMinus)
        );
    }

    #[test]
    fn two_character_operators() {
        assert_eq!(
            kinds("a<=b>=c!=d==e&&f||g<h>i"),
            vec![
                TokenKind::Text("a".to_string()),
                TokenKind::Operator(Operator::LessOrEqual),
                TokenKind::Text("b".to_string()),
                TokenKind::Operator(Operator::GreaterOrEqual),
                TokenKind::Text("c".to_string()),
                TokenKind::Operator(Operator::NotEqual),
                TokenKind::Text("d".to_string()),
                TokenKind::Operator(Operator::Equal),
                TokenKind::Text("e".to_string()),
                TokenKind::Operator(Operator::And),
                TokenKind::Text("f".to_string()),
                TokenKind::Operator(Operator::Or),
                TokenKind::Text("g".to_string()),
                TokenKind::Operator(Operator::LessThan),
                TokenKind::Text("h".to_string()),
                TokenKind::Operator(Operator::GreaterThan),
                TokenKind::Text("i".to_string()),
            ]
        );
    }

    #[test]
    fn unicode_comparison_symbols() {
        assert_eq!(
            kinds("1≤2"),
            vec![
                TokenKind::Integer(1),
                TokenKind::Operator(Operator::LessOrEqual),
                TokenKind::Integer(2),
            ]
        );
    }

    #[test]
    fn incomplete_two_character_operator_fails() {
        let err = lex("a ! b", &LocaleConfig::en_us()).unwrap_err();
        assert_eq!(err.span.start, 2);
        assert!(err.message.contains('!'), "unexpected error: {err}");

        assert!(lex("a = b", &LocaleConfig::en_us()).is_err());
        assert!(lex("a & b", &LocaleConfig::en_us()).is_err());
    }

    #[test]
    fn scientific_notation() {
        assert_eq!(kinds("1e3"), vec![TokenKind::FloatingPoint(1000.0)]);
        assert_eq!(kinds("2.5E-2"), vec![TokenKind::FloatingPoint(0.025)]);
        assert_eq!(kinds("4e+1"), vec![TokenKind::FloatingPoint(40.0)]);
    }

    #[test]
    fn second_exponent_marker_fails() {
        let err = lex("1e5e3", &LocaleConfig::en_us()).unwrap_err();
        assert_eq!(err.span.start, 3);
        assert!(err.message.contains("\"e\""), "unexpected error: {err}");
    }

    #[test]
    fn invalid_character_reports_position() {
        let err = lex("2 + $", &LocaleConfig::en_us()).unwrap_err();
        assert_eq!(err.span, Span::new(4, 5));
        assert!(err.message.contains("position 4"), "unexpected error: {err}");
    }

    #[test]
    fn token_positions_and_lengths() {
        let tokens = lex("ab <= 12.5", &LocaleConfig::en_us()).unwrap();
        let positions: Vec<(usize, usize)> =
            tokens.iter().map(|t| (t.start(), t.len())).collect();
        assert_eq!(positions, vec![(0, 2), (3, 2), (6, 4)]);
    }

    #[test]
    fn locale_separators() {
        let tokens: Vec<TokenKind> = lex("max(1,5;2)", &LocaleConfig::de_de())
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect();
        assert_eq!(
            tokens,
            vec![
                TokenKind::Text("max".to_string()),
                TokenKind::LeftBracket,
                TokenKind::FloatingPoint(1.5),
                TokenKind::ArgumentSeparator,
                TokenKind::Integer(2),
                TokenKind::RightBracket,
            ]
        );
    }

    #[test]
    fn huge_integer_literal_becomes_floating_point() {
        assert_eq!(
            kinds("99999999999999999999"),
            vec![TokenKind::FloatingPoint(1e20)]
        );
    }
}
