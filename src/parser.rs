// ABOUTME: Recursive-descent parser with checkpointed backtracking and a
// Pratt expression core; produces the opcoded AST the validator rewrites

use crate::ast::{BinOp, Catcher, Expr, ExprKind, FnDef, Param, UnOp};
use crate::error::{CompileError, ErrorKind};
use crate::lexer;
use crate::token::{Pos, Token, TokenKind};
use crate::types::{unite, FnKind, MapField, Type};
use tracing::trace;

/// Precedence levels, low to high. An infix operator is consumed while its
/// level is strictly greater than the minimum in force; right-associative
/// operators recurse with their own level minus one.
mod prec {
    pub const NONE: u8 = 0;
    pub const LOW_OR: u8 = 1;
    pub const LOW_AND: u8 = 2;
    pub const LOW_NOT: u8 = 3;
    pub const COMMA: u8 = 4;
    pub const ASSIGNMENT: u8 = 5;
    pub const CONDITIONAL: u8 = 6;
    pub const LOGICAL_OR: u8 = 7;
    pub const LOGICAL_AND: u8 = 8;
    pub const EQUALITY: u8 = 9;
    pub const RELATIONAL: u8 = 10;
    pub const STRING: u8 = 11;
    pub const RANGE: u8 = 12;
    pub const SUM: u8 = 13;
    pub const PRODUCT: u8 = 14;
    pub const EXPONENT: u8 = 15;
    pub const PREFIX: u8 = 16;
    pub const POSTFIX: u8 = 17;
    pub const CALL: u8 = 18;
    pub const ACCESS: u8 = 19;
}

fn infix_precedence(kind: TokenKind) -> u8 {
    match kind {
        TokenKind::OrWord => prec::LOW_OR,
        TokenKind::AndWord => prec::LOW_AND,
        TokenKind::Assign
        | TokenKind::PlusEq
        | TokenKind::MinusEq
        | TokenKind::StarEq
        | TokenKind::SlashEq
        | TokenKind::CaretEq
        | TokenKind::CaretCaretEq => prec::ASSIGNMENT,
        TokenKind::Question => prec::CONDITIONAL,
        TokenKind::PipePipe | TokenKind::CaretCaret => prec::LOGICAL_OR,
        TokenKind::AmpAmp => prec::LOGICAL_AND,
        TokenKind::EqEq | TokenKind::BangEq => prec::EQUALITY,
        TokenKind::Less | TokenKind::LessEq | TokenKind::Greater | TokenKind::GreaterEq => {
            prec::RELATIONAL
        }
        TokenKind::Dot | TokenKind::Tilde => prec::STRING,
        TokenKind::DotDot => prec::RANGE,
        TokenKind::Plus | TokenKind::Minus => prec::SUM,
        TokenKind::Star | TokenKind::Slash | TokenKind::Percent => prec::PRODUCT,
        TokenKind::StarStar | TokenKind::Caret => prec::EXPONENT,
        TokenKind::PlusPlus | TokenKind::MinusMinus => prec::POSTFIX,
        TokenKind::LParen => prec::CALL,
        TokenKind::LBracket => prec::ACCESS,
        _ => prec::NONE,
    }
}

type ParseResult<T> = Result<T, CompileError>;

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    max_errors: usize,
}

/// Parses a whole program. Returns whatever AST was built plus the errors
/// recorded along the way; the caller decides whether the errors are fatal.
pub fn parse(source: &str, max_errors: usize) -> (Vec<Expr>, Vec<CompileError>) {
    Parser::new(lexer::lex(source), max_errors).parse_program()
}

/// Parses a lone type literal, e.g. `[Integer]` or `Integer | String`.
pub fn parse_type(source: &str) -> ParseResult<Type> {
    let mut parser = Parser::new(lexer::lex(source), 1);
    let ty = parser.parse_type_literal()?;
    parser.expect(TokenKind::Eof, "end of type")?;
    Ok(ty)
}

impl Parser {
    pub fn new(tokens: Vec<Token>, max_errors: usize) -> Self {
        Parser {
            tokens,
            pos: 0,
            max_errors,
        }
    }

    // ── token cursor ──

    fn peek(&self) -> &Token {
        self.tokens
            .get(self.pos)
            .unwrap_or_else(|| &self.tokens[self.tokens.len() - 1])
    }

    fn peek_kind(&self) -> TokenKind {
        self.peek().kind
    }

    fn peek_ahead(&self, n: usize) -> TokenKind {
        self.tokens
            .get(self.pos + n)
            .map(|t| t.kind)
            .unwrap_or(TokenKind::Eof)
    }

    fn here(&self) -> Pos {
        self.peek().pos
    }

    fn advance(&mut self) -> Token {
        let tok = self.peek().clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn at(&self, kind: TokenKind) -> bool {
        self.peek_kind() == kind
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.at(kind) {
            self.advance();
            return true;
        }
        false
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> ParseResult<Token> {
        if self.at(kind) {
            return Ok(self.advance());
        }
        Err(self.syntax_error(format!(
            "expected {what} but found `{}`",
            describe(self.peek())
        )))
    }

    /// Checkpoint for backtracking alternatives.
    fn mark(&self) -> usize {
        self.pos
    }

    fn rewind(&mut self, mark: usize) {
        self.pos = mark;
    }

    fn syntax_error(&self, message: impl Into<String>) -> CompileError {
        CompileError::new(ErrorKind::Syntax, message, self.here())
    }

    fn skip_terms(&mut self) {
        while self.at(TokenKind::Term) {
            self.advance();
        }
    }

    // ── program & statements ──

    pub fn parse_program(&mut self) -> (Vec<Expr>, Vec<CompileError>) {
        let mut program = Vec::new();
        let mut errors = Vec::new();
        loop {
            self.skip_terms();
            if self.at(TokenKind::Eof) {
                break;
            }
            match self.parse_expression(prec::NONE) {
                Ok(expr) => program.push(expr),
                Err(err) => {
                    trace!(%err, "recovering to next terminator");
                    errors.push(err);
                    if errors.len() >= self.max_errors {
                        break;
                    }
                    // Discard the rest of the statement and resume.
                    while !self.at(TokenKind::Term) && !self.at(TokenKind::Eof) {
                        self.advance();
                    }
                }
            }
        }
        (program, errors)
    }

    // ── Pratt expression core ──

    fn parse_expression(&mut self, min: u8) -> ParseResult<Expr> {
        let mut lhs = self.parse_prefix()?;
        loop {
            let p = infix_precedence(self.peek_kind());
            if p == prec::NONE || p <= min {
                break;
            }
            lhs = self.parse_infix(lhs, p)?;
        }
        Ok(lhs)
    }

    fn parse_infix(&mut self, lhs: Expr, level: u8) -> ParseResult<Expr> {
        let tok = self.advance();
        let pos = tok.pos;
        let kind = tok.kind;

        match kind {
            // Left-associative binary operators.
            TokenKind::Plus
            | TokenKind::Minus
            | TokenKind::Star
            | TokenKind::Slash
            | TokenKind::Percent
            | TokenKind::Tilde
            | TokenKind::EqEq
            | TokenKind::BangEq
            | TokenKind::Less
            | TokenKind::LessEq
            | TokenKind::Greater
            | TokenKind::GreaterEq
            | TokenKind::AmpAmp
            | TokenKind::AndWord
            | TokenKind::PipePipe
            | TokenKind::OrWord
            | TokenKind::CaretCaret => {
                let op = match kind {
                    TokenKind::Plus => BinOp::Add,
                    TokenKind::Minus => BinOp::Sub,
                    TokenKind::Star => BinOp::Mul,
                    TokenKind::Slash => BinOp::Div,
                    TokenKind::Percent => BinOp::Rem,
                    TokenKind::Tilde => BinOp::Idx,
                    TokenKind::EqEq => BinOp::Eq,
                    TokenKind::BangEq => BinOp::Ne,
                    TokenKind::Less => BinOp::Lt,
                    TokenKind::LessEq => BinOp::Le,
                    TokenKind::Greater => BinOp::Gt,
                    TokenKind::GreaterEq => BinOp::Ge,
                    TokenKind::AmpAmp | TokenKind::AndWord => BinOp::And,
                    TokenKind::PipePipe | TokenKind::OrWord => BinOp::Or,
                    _ => BinOp::Xor,
                };
                let rhs = self.parse_expression(level)?;
                Ok(Expr::new(
                    ExprKind::Binary {
                        op,
                        lhs: Box::new(lhs),
                        rhs: Box::new(rhs),
                    },
                    pos,
                ))
            }

            // Exponentiation is right-associative.
            TokenKind::StarStar | TokenKind::Caret => {
                let rhs = self.parse_expression(level - 1)?;
                Ok(Expr::new(
                    ExprKind::Binary {
                        op: BinOp::Pow,
                        lhs: Box::new(lhs),
                        rhs: Box::new(rhs),
                    },
                    pos,
                ))
            }

            TokenKind::Dot => {
                let rhs = self.parse_expression(level)?;
                Ok(Expr::new(
                    ExprKind::Dot {
                        lhs: Box::new(lhs),
                        rhs: Box::new(rhs),
                    },
                    pos,
                ))
            }

            TokenKind::DotDot => {
                let to = self.parse_expression(level)?;
                Ok(Expr::new(
                    ExprKind::Range {
                        from: Box::new(lhs),
                        to: Box::new(to),
                    },
                    pos,
                ))
            }

            // The assignment family is right-associative.
            TokenKind::Assign => {
                let value = self.parse_expression(level - 1)?;
                Ok(Expr::new(
                    ExprKind::Assign {
                        target: Box::new(lhs),
                        value: Box::new(value),
                    },
                    pos,
                ))
            }
            TokenKind::PlusEq
            | TokenKind::MinusEq
            | TokenKind::StarEq
            | TokenKind::SlashEq
            | TokenKind::CaretEq
            | TokenKind::CaretCaretEq => {
                let op = match kind {
                    TokenKind::PlusEq => BinOp::Add,
                    TokenKind::MinusEq => BinOp::Sub,
                    TokenKind::StarEq => BinOp::Mul,
                    TokenKind::SlashEq => BinOp::Div,
                    TokenKind::CaretEq => BinOp::Pow,
                    _ => BinOp::Xor,
                };
                let value = self.parse_expression(level - 1)?;
                Ok(Expr::new(
                    ExprKind::CompoundAssign {
                        op,
                        target: Box::new(lhs),
                        value: Box::new(value),
                    },
                    pos,
                ))
            }

            TokenKind::Question => {
                let then = self.parse_expression(prec::NONE)?;
                self.expect(TokenKind::Colon, "`:` of conditional")?;
                let otherwise = self.parse_expression(level - 1)?;
                Ok(Expr::new(
                    ExprKind::Conditional {
                        cond: Box::new(lhs),
                        then: Box::new(then),
                        otherwise: Box::new(otherwise),
                    },
                    pos,
                ))
            }

            TokenKind::PlusPlus | TokenKind::MinusMinus => Ok(Expr::new(
                ExprKind::Incr {
                    decr: kind == TokenKind::MinusMinus,
                    prefix: false,
                    target: Box::new(lhs),
                },
                pos,
            )),

            TokenKind::LParen => {
                let args = self.parse_call_args()?;
                Ok(Expr::new(
                    ExprKind::Call {
                        target: Box::new(lhs),
                        args,
                    },
                    pos,
                ))
            }

            TokenKind::LBracket => {
                self.skip_terms();
                let index = self.parse_expression(prec::NONE)?;
                self.skip_terms();
                self.expect(TokenKind::RBracket, "`]`")?;
                Ok(Expr::new(
                    ExprKind::Index {
                        target: Box::new(lhs),
                        index: Box::new(index),
                    },
                    pos,
                ))
            }

            _ => Err(self.syntax_error(format!("`{}` cannot be used here", tok.text))),
        }
    }

    fn parse_prefix(&mut self) -> ParseResult<Expr> {
        let pos = self.here();
        match self.peek_kind() {
            TokenKind::Integer => {
                let tok = self.advance();
                let n: i64 = tok
                    .text
                    .parse()
                    .map_err(|_| self.syntax_error(format!("integer `{}` out of range", tok.text)))?;
                Ok(Expr::new(ExprKind::Integer(n), pos))
            }
            TokenKind::Hex => {
                let tok = self.advance();
                let digits = tok.text.trim_start_matches("0x").trim_start_matches("0X");
                let n = i64::from_str_radix(digits, 16)
                    .map_err(|_| self.syntax_error(format!("hex literal `{}` out of range", tok.text)))?;
                Ok(Expr::new(ExprKind::Integer(n), pos))
            }
            TokenKind::Real => {
                let tok = self.advance();
                let n: f64 = tok
                    .text
                    .parse()
                    .map_err(|_| self.syntax_error(format!("bad number `{}`", tok.text)))?;
                Ok(Expr::new(ExprKind::Real(n), pos))
            }
            TokenKind::Str => {
                let tok = self.advance();
                Ok(Expr::new(ExprKind::Str(tok.text), pos))
            }
            TokenKind::InterpStr => {
                let tok = self.advance();
                Ok(Expr::new(ExprKind::Interp(tok.text), pos))
            }
            TokenKind::True => {
                self.advance();
                Ok(Expr::new(ExprKind::Boolean(true), pos))
            }
            TokenKind::False => {
                self.advance();
                Ok(Expr::new(ExprKind::Boolean(false), pos))
            }
            TokenKind::Null => {
                self.advance();
                Ok(Expr::new(ExprKind::Null, pos))
            }

            // A type name in value position names a conversion builtin.
            TokenKind::Ident | TokenKind::TypeName => {
                let tok = self.advance();
                Ok(Expr::new(ExprKind::Ident(tok.text), pos))
            }

            TokenKind::Minus => {
                self.advance();
                let operand = self.parse_expression(prec::PREFIX - 1)?;
                Ok(Expr::new(
                    ExprKind::Unary {
                        op: UnOp::Neg,
                        operand: Box::new(operand),
                    },
                    pos,
                ))
            }
            TokenKind::Plus => {
                self.advance();
                let operand = self.parse_expression(prec::PREFIX - 1)?;
                Ok(Expr::new(
                    ExprKind::Unary {
                        op: UnOp::Pos,
                        operand: Box::new(operand),
                    },
                    pos,
                ))
            }
            TokenKind::Bang => {
                self.advance();
                let operand = self.parse_expression(prec::PREFIX - 1)?;
                Ok(Expr::new(
                    ExprKind::Unary {
                        op: UnOp::Not,
                        operand: Box::new(operand),
                    },
                    pos,
                ))
            }
            TokenKind::NotWord => {
                self.advance();
                let operand = self.parse_expression(prec::LOW_NOT)?;
                Ok(Expr::new(
                    ExprKind::Unary {
                        op: UnOp::Not,
                        operand: Box::new(operand),
                    },
                    pos,
                ))
            }
            TokenKind::PlusPlus | TokenKind::MinusMinus => {
                let tok = self.advance();
                let target = self.parse_expression(prec::PREFIX - 1)?;
                Ok(Expr::new(
                    ExprKind::Incr {
                        decr: tok.kind == TokenKind::MinusMinus,
                        prefix: true,
                        target: Box::new(target),
                    },
                    pos,
                ))
            }

            TokenKind::LParen => {
                self.advance();
                self.skip_terms();
                let inner = self.parse_expression(prec::NONE)?;
                self.skip_terms();
                self.expect(TokenKind::RParen, "`)`")?;
                Ok(inner)
            }

            TokenKind::LBracket => self.parse_array_literal(),
            TokenKind::LBrace => self.parse_brace(),

            TokenKind::Var => self.parse_var(),
            TokenKind::Fn => self.parse_fn(),
            TokenKind::If => self.parse_if(),
            TokenKind::While => self.parse_while(),
            TokenKind::Try => self.parse_try(),
            // `type(expr)` is the builtin call; `type Name: T` a declaration.
            TokenKind::Type if self.peek_ahead(1) == TokenKind::LParen => {
                let tok = self.advance();
                Ok(Expr::new(ExprKind::Ident(tok.text), pos))
            }
            TokenKind::Type => self.parse_type_decl(),

            TokenKind::Throw => {
                self.advance();
                let value = self.parse_expression(prec::NONE)?;
                Ok(Expr::new(ExprKind::Throw(Box::new(value)), pos))
            }
            TokenKind::Return => {
                self.advance();
                let value = if self.statement_ended() {
                    None
                } else {
                    Some(Box::new(self.parse_expression(prec::NONE)?))
                };
                Ok(Expr::new(ExprKind::Return(value), pos))
            }
            TokenKind::Next => {
                self.advance();
                Ok(Expr::new(ExprKind::Next, pos))
            }
            TokenKind::Last => {
                self.advance();
                Ok(Expr::new(ExprKind::Last, pos))
            }

            TokenKind::Exists => {
                self.advance();
                let target = self.parse_expression(prec::PREFIX - 1)?;
                Ok(Expr::new(ExprKind::Exists(Box::new(target)), pos))
            }
            TokenKind::Delete => {
                self.advance();
                let target = self.parse_expression(prec::PREFIX - 1)?;
                Ok(Expr::new(ExprKind::Delete(Box::new(target)), pos))
            }
            TokenKind::Keys => {
                self.advance();
                let target = self.parse_expression(prec::PREFIX - 1)?;
                Ok(Expr::new(ExprKind::Keys(Box::new(target)), pos))
            }
            TokenKind::Values => {
                self.advance();
                let target = self.parse_expression(prec::PREFIX - 1)?;
                Ok(Expr::new(ExprKind::Values(Box::new(target)), pos))
            }

            TokenKind::Else => Err(CompileError::new(
                ErrorKind::InvalidContext,
                "`else` without a matching `if`",
                pos,
            )),
            TokenKind::Catch => Err(CompileError::new(
                ErrorKind::InvalidContext,
                "`catch` without a matching `try`",
                pos,
            )),
            TokenKind::Then => Err(CompileError::new(
                ErrorKind::InvalidContext,
                "`then` without a matching `if`",
                pos,
            )),

            TokenKind::Other => {
                let tok = self.advance();
                Err(CompileError::new(
                    ErrorKind::Syntax,
                    format!("unrecognised character `{}`", tok.text),
                    pos,
                ))
            }
            TokenKind::Term => Err(self.syntax_error("unexpected end of statement")),
            TokenKind::Eof => Err(self.syntax_error("unexpected end of input")),
            _ => {
                let tok = self.advance();
                Err(self.syntax_error(format!("`{}` cannot start an expression", tok.text)))
            }
        }
    }

    fn statement_ended(&self) -> bool {
        matches!(
            self.peek_kind(),
            TokenKind::Term | TokenKind::Eof | TokenKind::RBrace | TokenKind::RParen
        )
    }

    // ── compound forms ──

    fn parse_call_args(&mut self) -> ParseResult<Vec<Expr>> {
        let mut args = Vec::new();
        self.skip_terms();
        if self.eat(TokenKind::RParen) {
            return Ok(args);
        }
        loop {
            self.skip_terms();
            args.push(self.parse_expression(prec::COMMA)?);
            self.skip_terms();
            if self.eat(TokenKind::Comma) {
                continue;
            }
            self.expect(TokenKind::RParen, "`)` after arguments")?;
            return Ok(args);
        }
    }

    fn parse_array_literal(&mut self) -> ParseResult<Expr> {
        let pos = self.here();
        self.expect(TokenKind::LBracket, "`[`")?;
        let mut elems = Vec::new();
        loop {
            self.skip_terms();
            if self.eat(TokenKind::RBracket) {
                break;
            }
            elems.push(self.parse_expression(prec::COMMA)?);
            self.skip_terms();
            self.eat(TokenKind::Comma);
        }
        Ok(Expr::new(ExprKind::ArrayLit(elems), pos))
    }

    /// `{` is ambiguous: a map constructor or an expression group. Map is
    /// tried first; on failure the cursor rewinds and a group is parsed.
    fn parse_brace(&mut self) -> ParseResult<Expr> {
        let pos = self.here();
        self.expect(TokenKind::LBrace, "`{`")?;
        let mark = self.mark();
        match self.try_map_literal(pos) {
            Ok(map) => Ok(map),
            Err(_) => {
                self.rewind(mark);
                self.parse_group(pos)
            }
        }
    }

    fn try_map_literal(&mut self, pos: Pos) -> ParseResult<Expr> {
        let mut entries: Vec<(String, Expr)> = Vec::new();
        loop {
            self.skip_terms();
            if self.eat(TokenKind::RBrace) {
                return Ok(Expr::new(ExprKind::MapLit(entries), pos));
            }
            let key = match self.peek_kind() {
                TokenKind::Str | TokenKind::Ident | TokenKind::TypeName => self.advance().text,
                _ => return Err(self.syntax_error("expected map key")),
            };
            self.expect(TokenKind::Colon, "`:` after map key")?;
            self.skip_terms();
            let value = self.parse_expression(prec::COMMA)?;
            entries.push((key, value));
            self.skip_terms();
            self.eat(TokenKind::Comma);
        }
    }

    fn parse_group(&mut self, pos: Pos) -> ParseResult<Expr> {
        let mut exprs = Vec::new();
        loop {
            self.skip_terms();
            if self.eat(TokenKind::RBrace) {
                break;
            }
            if self.at(TokenKind::Eof) {
                return Err(self.syntax_error("expected `}` before end of input"));
            }
            exprs.push(self.parse_expression(prec::NONE)?);
        }
        Ok(Expr::new(ExprKind::Group(exprs), pos))
    }

    fn parse_var(&mut self) -> ParseResult<Expr> {
        let pos = self.here();
        self.expect(TokenKind::Var, "`var`")?;
        let name = self.expect(TokenKind::Ident, "variable name")?.text;
        let ty = if self.eat(TokenKind::Colon) {
            self.parse_type_literal()?
        } else {
            Type::Any
        };
        let init = if self.eat(TokenKind::Assign) {
            Some(Box::new(self.parse_expression(prec::ASSIGNMENT - 1)?))
        } else {
            None
        };
        Ok(Expr::new(ExprKind::Var { name, ty, init }, pos))
    }

    fn parse_fn(&mut self) -> ParseResult<Expr> {
        let pos = self.here();
        self.expect(TokenKind::Fn, "`fn`")?;

        // An identifier is the function's name only when a parameter list
        // or a braced body follows; otherwise it starts an expression body
        // (`fn x = x + 5` is anonymous).
        let name = if self.at(TokenKind::Ident)
            && matches!(self.peek_ahead(1), TokenKind::LParen | TokenKind::LBrace)
        {
            Some(self.advance().text)
        } else {
            None
        };

        let mut params = Vec::new();
        if self.eat(TokenKind::LParen) {
            loop {
                self.skip_terms();
                if self.eat(TokenKind::RParen) {
                    break;
                }
                let pname = self.expect(TokenKind::Ident, "parameter name")?.text;
                let pty = if self.eat(TokenKind::Colon) {
                    self.parse_type_literal()?
                } else {
                    Type::Any
                };
                let default = if self.eat(TokenKind::Assign) {
                    Some(self.parse_expression(prec::COMMA)?)
                } else {
                    None
                };
                params.push(Param {
                    name: pname,
                    ty: pty,
                    default,
                });
                self.skip_terms();
                self.eat(TokenKind::Comma);
            }
        }

        let ret = if self.eat(TokenKind::Arrow) {
            self.parse_type_literal()?
        } else {
            Type::Any
        };

        let body_expr = self.parse_expression(prec::NONE)?;
        let body = match body_expr.kind {
            // A braced body already introduces the call scope; unwrap it so
            // the statements run directly in that scope.
            ExprKind::Group(exprs) => exprs,
            _ => vec![body_expr],
        };

        Ok(Expr::new(
            ExprKind::FnDef(FnDef {
                name,
                params,
                ret,
                body,
            }),
            pos,
        ))
    }

    fn parse_if(&mut self) -> ParseResult<Expr> {
        let pos = self.here();
        self.expect(TokenKind::If, "`if`")?;
        let cond = self.parse_expression(prec::NONE)?;
        self.eat(TokenKind::Then);
        self.skip_terms();
        let then = self.parse_expression(prec::NONE)?;

        // `else` may sit on the following line.
        let mark = self.mark();
        self.skip_terms();
        let otherwise = if self.eat(TokenKind::Else) {
            self.skip_terms();
            Some(Box::new(self.parse_expression(prec::NONE)?))
        } else {
            self.rewind(mark);
            None
        };

        Ok(Expr::new(
            ExprKind::If {
                cond: Box::new(cond),
                then: Box::new(then),
                otherwise,
            },
            pos,
        ))
    }

    fn parse_while(&mut self) -> ParseResult<Expr> {
        let pos = self.here();
        self.expect(TokenKind::While, "`while`")?;
        let cond = self.parse_expression(prec::NONE)?;
        self.skip_terms();
        let body = self.parse_expression(prec::NONE)?;
        Ok(Expr::new(
            ExprKind::While {
                cond: Box::new(cond),
                body: Box::new(body),
            },
            pos,
        ))
    }

    fn parse_try(&mut self) -> ParseResult<Expr> {
        let pos = self.here();
        self.expect(TokenKind::Try, "`try`")?;
        self.skip_terms();
        let body = self.parse_expression(prec::NONE)?;

        let mut catchers = Vec::new();
        loop {
            let mark = self.mark();
            self.skip_terms();
            if !self.eat(TokenKind::Catch) {
                self.rewind(mark);
                break;
            }
            // `catch ("message") body` is conditional; `catch body` default.
            let cond = if self.at(TokenKind::LParen) {
                self.advance();
                let c = self.parse_expression(prec::NONE)?;
                self.expect(TokenKind::RParen, "`)` after catch condition")?;
                Some(c)
            } else {
                None
            };
            self.skip_terms();
            let body = self.parse_expression(prec::NONE)?;
            catchers.push(Catcher { cond, body });
        }

        Ok(Expr::new(
            ExprKind::Try {
                body: Box::new(body),
                catchers,
            },
            pos,
        ))
    }

    fn parse_type_decl(&mut self) -> ParseResult<Expr> {
        let pos = self.here();
        self.expect(TokenKind::Type, "`type`")?;
        let name = self.expect(TokenKind::TypeName, "type name")?.text;
        self.expect(TokenKind::Colon, "`:` after type name")?;
        let ty = self.parse_type_literal()?;
        let default = if self.eat(TokenKind::Assign) {
            Some(Box::new(self.parse_expression(prec::ASSIGNMENT - 1)?))
        } else {
            None
        };
        Ok(Expr::new(ExprKind::TypeDecl { name, ty, default }, pos))
    }

    // ── type literals ──

    pub fn parse_type_literal(&mut self) -> ParseResult<Type> {
        let mut members = vec![self.parse_single_type()?];
        while self.eat(TokenKind::Pipe) {
            members.push(self.parse_single_type()?);
        }
        if members.len() == 1 {
            return Ok(members.remove(0));
        }
        Ok(unite(&members))
    }

    fn parse_single_type(&mut self) -> ParseResult<Type> {
        match self.peek_kind() {
            TokenKind::TypeName => {
                let tok = self.advance();
                match tok.text.as_str() {
                    "Any" => Ok(Type::Any),
                    "Null" => Ok(Type::Null),
                    "Boolean" => Ok(Type::Boolean),
                    "Number" => Ok(Type::Number),
                    "Integer" => Ok(Type::Integer),
                    "Real" => Ok(Type::Real),
                    "String" => Ok(Type::String),
                    "Array" => Ok(Type::Array),
                    "Map" => Ok(Type::Map),
                    "Function" => self.parse_fn_type(FnKind::Function),
                    "Builtin" => self.parse_fn_type(FnKind::Builtin),
                    _ => Ok(Type::Named(tok.text)),
                }
            }
            TokenKind::Null => {
                self.advance();
                Ok(Type::Null)
            }
            TokenKind::LBracket => {
                self.advance();
                let elem = self.parse_type_literal()?;
                self.expect(TokenKind::RBracket, "`]` of array type")?;
                Ok(Type::ArrayOf(Box::new(elem)))
            }
            TokenKind::LBrace => {
                self.advance();
                let mut fields = Vec::new();
                loop {
                    self.skip_terms();
                    if self.eat(TokenKind::RBrace) {
                        break;
                    }
                    let key = match self.peek_kind() {
                        TokenKind::Str | TokenKind::Ident | TokenKind::TypeName => {
                            self.advance().text
                        }
                        _ => return Err(self.syntax_error("expected map type key")),
                    };
                    self.expect(TokenKind::Colon, "`:` in map type")?;
                    let ty = self.parse_type_literal()?;
                    fields.push(MapField { key, ty });
                    self.skip_terms();
                    self.eat(TokenKind::Comma);
                }
                Ok(Type::MapOf(fields))
            }
            _ => Err(self.syntax_error(format!(
                "expected a type but found `{}`",
                describe(self.peek())
            ))),
        }
    }

    fn parse_fn_type(&mut self, kind: FnKind) -> ParseResult<Type> {
        // Bare `Function` / `Builtin` without a parameter list is the
        // unparameterised simple type.
        if !self.eat(TokenKind::LParen) {
            return Ok(match kind {
                FnKind::Function => Type::Function,
                FnKind::Builtin => Type::Builtin,
            });
        }
        let mut params = Vec::new();
        loop {
            self.skip_terms();
            if self.eat(TokenKind::RParen) {
                break;
            }
            params.push(self.parse_type_literal()?);
            self.skip_terms();
            self.eat(TokenKind::Comma);
        }
        self.expect(TokenKind::Arrow, "`->` of function type")?;
        let ret = self.parse_type_literal()?;
        Ok(Type::Func {
            kind,
            params,
            ret: Box::new(ret),
        })
    }
}

fn describe(token: &Token) -> String {
    match token.kind {
        TokenKind::Eof => "end of input".to_string(),
        TokenKind::Term => "end of statement".to_string(),
        _ => token.text.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_one(source: &str) -> Expr {
        let (mut program, errors) = parse(source, 3);
        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
        assert_eq!(program.len(), 1, "expected one statement: {program:?}");
        program.remove(0)
    }

    #[test]
    fn test_precedence_shapes() {
        let expr = parse_one("1 + 2 * 3");
        match expr.kind {
            ExprKind::Binary { op: BinOp::Add, rhs, .. } => {
                assert!(matches!(rhs.kind, ExprKind::Binary { op: BinOp::Mul, .. }));
            }
            other => panic!("bad shape: {other:?}"),
        }
    }

    #[test]
    fn test_exponent_right_associative() {
        let expr = parse_one("2 ** 3 ** 2");
        match expr.kind {
            ExprKind::Binary { op: BinOp::Pow, rhs, .. } => {
                assert!(matches!(rhs.kind, ExprKind::Binary { op: BinOp::Pow, .. }));
            }
            other => panic!("bad shape: {other:?}"),
        }
    }

    #[test]
    fn test_assignment_right_associative() {
        let expr = parse_one("a = b = 1");
        match expr.kind {
            ExprKind::Assign { value, .. } => {
                assert!(matches!(value.kind, ExprKind::Assign { .. }));
            }
            other => panic!("bad shape: {other:?}"),
        }
    }

    #[test]
    fn test_nested_conditional() {
        let expr = parse_one("a ? 1 : b ? 2 : 3");
        match expr.kind {
            ExprKind::Conditional { otherwise, .. } => {
                assert!(matches!(otherwise.kind, ExprKind::Conditional { .. }));
            }
            other => panic!("bad shape: {other:?}"),
        }
    }

    #[test]
    fn test_brace_is_map_then_group() {
        let map = parse_one(r#"{"x": 1, y: 2}"#);
        match map.kind {
            ExprKind::MapLit(entries) => {
                assert_eq!(entries[0].0, "x");
                assert_eq!(entries[1].0, "y");
            }
            other => panic!("expected map: {other:?}"),
        }

        let group = parse_one("{ var i = 0; i + 1 }");
        match group.kind {
            ExprKind::Group(exprs) => assert_eq!(exprs.len(), 2),
            other => panic!("expected group: {other:?}"),
        }
    }

    #[test]
    fn test_fn_forms() {
        let named = parse_one("fn fib(n) n + 1");
        match named.kind {
            ExprKind::FnDef(def) => {
                assert_eq!(def.name.as_deref(), Some("fib"));
                assert_eq!(def.params.len(), 1);
                assert_eq!(def.params[0].ty, Type::Any);
                assert_eq!(def.body.len(), 1);
            }
            other => panic!("expected fn: {other:?}"),
        }

        let anon = parse_one("fn ++i");
        match anon.kind {
            ExprKind::FnDef(def) => {
                assert!(def.name.is_none());
                assert!(def.params.is_empty());
            }
            other => panic!("expected fn: {other:?}"),
        }

        let typed = parse_one("fn add(a: Number, b: Number = 1) -> Number a + b");
        match typed.kind {
            ExprKind::FnDef(def) => {
                assert_eq!(def.ret, Type::Number);
                assert_eq!(def.params[1].ty, Type::Number);
                assert!(def.params[1].default.is_some());
            }
            other => panic!("expected fn: {other:?}"),
        }
    }

    #[test]
    fn test_dot_and_call_chain() {
        let expr = parse_one("x.f(1).g(2)");
        // Outer dot: lhs is x.f(1), rhs is g(2).
        match expr.kind {
            ExprKind::Dot { lhs, rhs } => {
                assert!(matches!(lhs.kind, ExprKind::Dot { .. }));
                assert!(matches!(rhs.kind, ExprKind::Call { .. }));
            }
            other => panic!("bad shape: {other:?}"),
        }
    }

    #[test]
    fn test_range_in_index() {
        let expr = parse_one(r#""hello"[1..3]"#);
        match expr.kind {
            ExprKind::Index { index, .. } => {
                assert!(matches!(index.kind, ExprKind::Range { .. }));
            }
            other => panic!("bad shape: {other:?}"),
        }
    }

    #[test]
    fn test_statements_without_terminators() {
        let (program, errors) = parse(r#"print("a") print("b")  42"#, 3);
        assert!(errors.is_empty());
        assert_eq!(program.len(), 3);
    }

    #[test]
    fn test_try_catch_forms() {
        let expr = parse_one(r#"try throw "oops" catch ("oops") 1 catch 2"#);
        match expr.kind {
            ExprKind::Try { catchers, .. } => {
                assert_eq!(catchers.len(), 2);
                assert!(catchers[0].cond.is_some());
                assert!(catchers[1].cond.is_none());
            }
            other => panic!("bad shape: {other:?}"),
        }
    }

    #[test]
    fn test_type_literal_round_trip() {
        for printed in [
            "Integer",
            "[Integer]",
            "[[Real]]",
            "{x: Integer, y: Real}",
            "Function(Any) -> Any",
            "Builtin(Any, String) -> Null",
            "Integer | String",
            "Null | String | [Integer]",
        ] {
            let ty = parse_type(printed).expect(printed);
            assert_eq!(ty.to_string(), printed, "round trip failed for {printed}");
        }
    }

    #[test]
    fn test_error_recovery_continues() {
        let (program, errors) = parse("var = 3\nvar x = 1", 3);
        assert_eq!(errors.len(), 1);
        assert_eq!(program.len(), 1);
    }

    #[test]
    fn test_error_limit_stops() {
        let (_, errors) = parse("@\n@\n@\n@\n@", 3);
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn test_else_without_if() {
        let (_, errors) = parse("else 1", 3);
        assert_eq!(errors[0].kind, ErrorKind::InvalidContext);
    }

    #[test]
    fn test_named_arguments_parse_as_assignments() {
        let expr = parse_one(r#"print("x", end = "")"#);
        match expr.kind {
            ExprKind::Call { args, .. } => {
                assert_eq!(args.len(), 2);
                assert!(matches!(args[1].kind, ExprKind::Assign { .. }));
            }
            other => panic!("bad shape: {other:?}"),
        }
    }
}
