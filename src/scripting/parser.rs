//! Expression parser
//!
//! Precedence, lowest first: `||`, `&&`, equality, comparison, additive,
//! multiplicative, unary.

use super::lexer::{tokenize, Spanned, Token};
use super::value::Value;
use crate::error::ScriptError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    NotEq,
    StrictEq,
    StrictNotEq,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LogicalOp {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Call { name: String, args: Vec<Expr> },
    Unary { op: UnaryOp, expr: Box<Expr> },
    Binary { op: BinaryOp, left: Box<Expr>, right: Box<Expr> },
    Logical { op: LogicalOp, left: Box<Expr>, right: Box<Expr> },
}

/// `;`-separated statements
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Program {
    pub statements: Vec<Expr>,
}

pub fn parse(source: &str) -> Result<Program, ScriptError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser { tokens, pos: 0 };
    parser.program()
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].token
    }

    fn offset(&self) -> usize {
        self.tokens[self.pos.min(self.tokens.len() - 1)].offset
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, expected: Token) -> Result<(), ScriptError> {
        if *self.peek() == expected {
            self.advance();
            Ok(())
        } else {
            Err(self.error(format!("expected {:?}, found {:?}", expected, self.peek())))
        }
    }

    fn error(&self, message: String) -> ScriptError {
        ScriptError::SyntaxError {
            offset: self.offset(),
            message,
        }
    }

    fn program(&mut self) -> Result<Program, ScriptError> {
        let mut statements = Vec::new();
        loop {
            while *self.peek() == Token::Semicolon {
                self.advance();
            }
            if *self.peek() == Token::Eof {
                break;
            }
            statements.push(self.expression()?);
            match self.peek() {
                Token::Semicolon | Token::Eof => {}
                other => return Err(self.error(format!("unexpected {:?}", other))),
            }
        }
        Ok(Program { statements })
    }

    fn expression(&mut self) -> Result<Expr, ScriptError> {
        self.logical_or()
    }

    fn logical_or(&mut self) -> Result<Expr, ScriptError> {
        let mut left = self.logical_and()?;
        while *self.peek() == Token::OrOr {
            self.advance();
            let right = self.logical_and()?;
            left = Expr::Logical {
                op: LogicalOp::Or,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn logical_and(&mut self) -> Result<Expr, ScriptError> {
        let mut left = self.equality()?;
        while *self.peek() == Token::AndAnd {
            self.advance();
            let right = self.equality()?;
            left = Expr::Logical {
                op: LogicalOp::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn binary_level(
        &mut self,
        next: fn(&mut Self) -> Result<Expr, ScriptError>,
        ops: &[(Token, BinaryOp)],
    ) -> Result<Expr, ScriptError> {
        let mut left = next(self)?;
        loop {
            let Some(op) = ops
                .iter()
                .find(|(token, _)| token == self.peek())
                .map(|(_, op)| *op)
            else {
                return Ok(left);
            };
            self.advance();
            let right = next(self)?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
    }

    fn equality(&mut self) -> Result<Expr, ScriptError> {
        self.binary_level(
            Self::comparison,
            &[
                (Token::EqEq, BinaryOp::Eq),
                (Token::NotEq, BinaryOp::NotEq),
                (Token::EqEqEq, BinaryOp::StrictEq),
                (Token::NotEqEq, BinaryOp::StrictNotEq),
            ],
        )
    }

    fn comparison(&mut self) -> Result<Expr, ScriptError> {
        self.binary_level(
            Self::additive,
            &[
                (Token::Lt, BinaryOp::Lt),
                (Token::Le, BinaryOp::Le),
                (Token::Gt, BinaryOp::Gt),
                (Token::Ge, BinaryOp::Ge),
            ],
        )
    }

    fn additive(&mut self) -> Result<Expr, ScriptError> {
        self.binary_level(
            Self::multiplicative,
            &[(Token::Plus, BinaryOp::Add), (Token::Minus, BinaryOp::Sub)],
        )
    }

    fn multiplicative(&mut self) -> Result<Expr, ScriptError> {
        self.binary_level(
            Self::unary,
            &[
                (Token::Star, BinaryOp::Mul),
                (Token::Slash, BinaryOp::Div),
                (Token::Percent, BinaryOp::Rem),
            ],
        )
    }

    fn unary(&mut self) -> Result<Expr, ScriptError> {
        let op = match self.peek() {
            Token::Bang => UnaryOp::Not,
            Token::Minus => UnaryOp::Neg,
            _ => return self.primary(),
        };
        self.advance();
        let expr = self.unary()?;
        Ok(Expr::Unary {
            op,
            expr: Box::new(expr),
        })
    }

    fn primary(&mut self) -> Result<Expr, ScriptError> {
        match self.advance() {
            Token::Number(n) => Ok(Expr::Literal(Value::Number(n))),
            Token::Str(s) => Ok(Expr::Literal(Value::Str(s))),
            Token::LParen => {
                let expr = self.expression()?;
                self.expect(Token::RParen)?;
                Ok(expr)
            }
            Token::Ident(name) => match name.as_str() {
                "true" => Ok(Expr::Literal(Value::Bool(true))),
                "false" => Ok(Expr::Literal(Value::Bool(false))),
                "null" => Ok(Expr::Literal(Value::Null)),
                "undefined" => Ok(Expr::Literal(Value::Undefined)),
                _ if *self.peek() == Token::LParen => {
                    self.advance();
                    let args = self.arguments()?;
                    Ok(Expr::Call { name, args })
                }
                _ => Err(self.error(format!("unknown identifier '{}'", name))),
            },
            other => Err(self.error(format!("unexpected {:?}", other))),
        }
    }

    fn arguments(&mut self) -> Result<Vec<Expr>, ScriptError> {
        let mut args = Vec::new();
        if *self.peek() == Token::RParen {
            self.advance();
            return Ok(args);
        }
        loop {
            args.push(self.expression()?);
            match self.advance() {
                Token::Comma => continue,
                Token::RParen => return Ok(args),
                other => return Err(self.error(format!("expected ',' or ')', found {:?}", other))),
            }
        }
    }
}
