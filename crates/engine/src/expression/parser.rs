//! Pratt parser producing the [`Expr`] tree.

use serde_json::Value as JsonValue;

use super::ExpressionError;
use super::lexer::{Token, tokenize};

/// Parsed expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal { value: JsonValue },
    Name { name: String },
    List { items: Vec<Expr> },
    Map { entries: Vec<(Expr, Expr)> },
    Unary { op: UnaryOp, operand: Box<Expr> },
    Binary { op: BinaryOp, left: Box<Expr>, right: Box<Expr> },
    Call { function: String, args: Vec<Expr> },
    Index { target: Box<Expr>, index: Box<Expr> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Negate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
}

const NOT_BINDING_POWER: u8 = 3;
const PREFIX_BINDING_POWER: u8 = 7;
const POSTFIX_BINDING_POWER: u8 = 8;

impl Expr {
    /// Variable names read by the expression, in first-use order.
    ///
    /// Function names are not variables and are skipped.
    pub fn free_variables(&self) -> Vec<String> {
        let mut names = Vec::new();
        self.collect_names(&mut names);
        names
    }

    fn collect_names(&self, names: &mut Vec<String>) {
        match self {
            Expr::Literal { .. } => {}
            Expr::Name { name } => {
                if !names.contains(name) {
                    names.push(name.clone());
                }
            }
            Expr::List { items } => items.iter().for_each(|item| item.collect_names(names)),
            Expr::Map { entries } => {
                for (key, value) in entries {
                    key.collect_names(names);
                    value.collect_names(names);
                }
            }
            Expr::Unary { operand, .. } => operand.collect_names(names),
            Expr::Binary { left, right, .. } => {
                left.collect_names(names);
                right.collect_names(names);
            }
            Expr::Call { args, .. } => args.iter().for_each(|arg| arg.collect_names(names)),
            Expr::Index { target, index } => {
                target.collect_names(names);
                index.collect_names(names);
            }
        }
    }
}

/// Parse a complete expression from source text.
pub fn parse(source: &str) -> Result<Expr, ExpressionError> {
    let tokens = tokenize(source)?;
    parse_tokens(&tokens, source)
}

/// Parse a complete expression from pre-tokenized input.
pub fn parse_tokens(tokens: &[Token], source: &str) -> Result<Expr, ExpressionError> {
    let mut parser = Parser {
        tokens,
        position: 0,
        source,
    };
    if tokens.is_empty() {
        return Err(parser.error("expression is empty"));
    }
    let expression = parser.expression(0)?;
    if let Some(token) = parser.peek() {
        return Err(parser.error(format!("unexpected trailing token {token:?}")));
    }
    Ok(expression)
}

struct Parser<'t> {
    tokens: &'t [Token],
    position: usize,
    source: &'t str,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.position + offset)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.position).cloned();
        if token.is_some() {
            self.position += 1;
        }
        token
    }

    fn expect(&mut self, expected: Token) -> Result<(), ExpressionError> {
        match self.advance() {
            Some(token) if token == expected => Ok(()),
            Some(token) => Err(self.error(format!("expected {expected:?}, found {token:?}"))),
            None => Err(self.error(format!("expected {expected:?}, found end of expression"))),
        }
    }

    fn error(&self, message: impl Into<String>) -> ExpressionError {
        ExpressionError::Syntax {
            expression: self.source.to_string(),
            message: message.into(),
        }
    }

    fn expression(&mut self, min_binding_power: u8) -> Result<Expr, ExpressionError> {
        let mut left = self.prefix()?;

        loop {
            if matches!(self.peek(), Some(Token::LBracket)) {
                if POSTFIX_BINDING_POWER < min_binding_power {
                    break;
                }
                self.advance();
                let index = self.expression(0)?;
                self.expect(Token::RBracket)?;
                left = Expr::Index {
                    target: Box::new(left),
                    index: Box::new(index),
                };
                continue;
            }

            let Some((op, binding_power, width)) = self.infix_operator() else {
                break;
            };
            if binding_power < min_binding_power {
                break;
            }
            self.position += width;
            let right = self.expression(binding_power + 1)?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }

        Ok(left)
    }

    fn infix_operator(&self) -> Option<(BinaryOp, u8, usize)> {
        let operator = match self.peek()? {
            Token::Name(name) if name == "or" => (BinaryOp::Or, 1, 1),
            Token::Name(name) if name == "and" => (BinaryOp::And, 2, 1),
            Token::Name(name) if name == "in" => (BinaryOp::In, 4, 1),
            Token::Name(name) if name == "not" && matches!(self.peek_at(1), Some(Token::Name(next)) if next == "in") => {
                (BinaryOp::NotIn, 4, 2)
            }
            Token::EqEq => (BinaryOp::Eq, 4, 1),
            Token::NotEq => (BinaryOp::NotEq, 4, 1),
            Token::Lt => (BinaryOp::Lt, 4, 1),
            Token::Le => (BinaryOp::Le, 4, 1),
            Token::Gt => (BinaryOp::Gt, 4, 1),
            Token::Ge => (BinaryOp::Ge, 4, 1),
            Token::Plus => (BinaryOp::Add, 5, 1),
            Token::Minus => (BinaryOp::Subtract, 5, 1),
            Token::Star => (BinaryOp::Multiply, 6, 1),
            Token::Slash => (BinaryOp::Divide, 6, 1),
            Token::Percent => (BinaryOp::Modulo, 6, 1),
            _ => return None,
        };
        Some(operator)
    }

    fn prefix(&mut self) -> Result<Expr, ExpressionError> {
        let Some(token) = self.advance() else {
            return Err(self.error("unexpected end of expression"));
        };

        match token {
            Token::Int(value) => Ok(Expr::Literal { value: JsonValue::from(value) }),
            Token::Float(value) => Ok(Expr::Literal { value: JsonValue::from(value) }),
            Token::Str(value) => Ok(Expr::Literal {
                value: JsonValue::String(value),
            }),
            Token::Minus => Ok(Expr::Unary {
                op: UnaryOp::Negate,
                operand: Box::new(self.expression(PREFIX_BINDING_POWER)?),
            }),
            Token::Plus => self.expression(PREFIX_BINDING_POWER),
            Token::LParen => {
                let inner = self.expression(0)?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Token::LBracket => Ok(Expr::List {
                items: self.sequence(Token::RBracket)?,
            }),
            Token::LBrace => self.map_literal(),
            Token::Name(name) => self.name(name),
            other => Err(self.error(format!("unexpected token {other:?}"))),
        }
    }

    fn name(&mut self, name: String) -> Result<Expr, ExpressionError> {
        match name.as_str() {
            "True" | "true" => return Ok(Expr::Literal { value: JsonValue::Bool(true) }),
            "False" | "false" => return Ok(Expr::Literal { value: JsonValue::Bool(false) }),
            "None" | "null" => return Ok(Expr::Literal { value: JsonValue::Null }),
            "not" => {
                return Ok(Expr::Unary {
                    op: UnaryOp::Not,
                    operand: Box::new(self.expression(NOT_BINDING_POWER)?),
                });
            }
            "and" | "or" | "in" => return Err(self.error(format!("unexpected keyword '{name}'"))),
            _ => {}
        }

        if matches!(self.peek(), Some(Token::LParen)) {
            self.advance();
            let args = self.sequence(Token::RParen)?;
            return Ok(Expr::Call { function: name, args });
        }
        Ok(Expr::Name { name })
    }

    fn sequence(&mut self, closing: Token) -> Result<Vec<Expr>, ExpressionError> {
        let mut items = Vec::new();
        if self.peek() == Some(&closing) {
            self.advance();
            return Ok(items);
        }
        loop {
            items.push(self.expression(0)?);
            match self.advance() {
                Some(Token::Comma) if self.peek() == Some(&closing) => {
                    self.advance();
                    return Ok(items);
                }
                Some(Token::Comma) => continue,
                Some(token) if token == closing => return Ok(items),
                Some(token) => return Err(self.error(format!("expected ',' or {closing:?}, found {token:?}"))),
                None => return Err(self.error(format!("expected {closing:?}, found end of expression"))),
            }
        }
    }

    fn map_literal(&mut self) -> Result<Expr, ExpressionError> {
        let mut entries = Vec::new();
        if matches!(self.peek(), Some(Token::RBrace)) {
            self.advance();
            return Ok(Expr::Map { entries });
        }
        loop {
            let key = self.expression(0)?;
            self.expect(Token::Colon)?;
            let value = self.expression(0)?;
            entries.push((key, value));
            match self.advance() {
                Some(Token::Comma) => continue,
                Some(Token::RBrace) => return Ok(Expr::Map { entries }),
                Some(token) => return Err(self.error(format!("expected ',' or '}}', found {token:?}"))),
                None => return Err(self.error("unterminated map literal")),
            }
        }
    }
}
