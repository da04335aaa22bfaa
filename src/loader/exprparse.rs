//! A minimal expression parser used only by the embedded backend.
//!
//! The C generator treats expression text as opaque and copies it
//! byte-for-byte (modulo identifier rewriting); the embedded backend has no
//! C compiler underneath it, so it must actually evaluate the expression
//! itself. This accepts the arithmetic/comparison/logical/bitwise subset of
//! the expression grammar the code generator already allows through
//! `scan_forbidden` — the two are deliberately kept in sync. Couples the
//! embedded backend to this grammar; a fuller implementation would share a
//! single sub-parser between both backends.

use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    IntLit(i64),
    FloatLit(f64),
    BoolLit(bool),
    Ident(String),
    Unary(UnOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Not,
    BitNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError(pub String);

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Int(i64),
    Float(f64),
    Ident(String),
    Op(&'static str),
    LParen,
    RParen,
}

fn lex(text: &str) -> Result<Vec<Tok>, ParseError> {
    let rewritten = crate::rewrite::rewrite_logical_keywords(text);
    let bytes: Vec<char> = rewritten.chars().collect();
    let mut i = 0;
    let mut toks = Vec::new();

    while i < bytes.len() {
        let c = bytes[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c == '(' {
            toks.push(Tok::LParen);
            i += 1;
            continue;
        }
        if c == ')' {
            toks.push(Tok::RParen);
            i += 1;
            continue;
        }
        if c.is_ascii_digit() {
            let start = i;
            let mut is_float = false;
            while i < bytes.len() && (bytes[i].is_ascii_digit() || bytes[i] == '.') {
                if bytes[i] == '.' {
                    is_float = true;
                }
                i += 1;
            }
            let lit: String = bytes[start..i].iter().collect();
            if is_float {
                toks.push(Tok::Float(lit.parse().map_err(|_| {
                    ParseError(format!("invalid float literal `{}`", lit))
                })?));
            } else {
                toks.push(Tok::Int(lit.parse().map_err(|_| {
                    ParseError(format!("invalid integer literal `{}`", lit))
                })?));
            }
            continue;
        }
        if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < bytes.len() && (bytes[i].is_alphanumeric() || bytes[i] == '_') {
                i += 1;
            }
            toks.push(Tok::Ident(bytes[start..i].iter().collect()));
            continue;
        }
        macro_rules! two_char {
            ($op:expr) => {{
                toks.push(Tok::Op($op));
                i += 2;
            }};
        }
        match (c, bytes.get(i + 1).copied()) {
            ('=', Some('=')) => two_char!("=="),
            ('!', Some('=')) => two_char!("!="),
            ('<', Some('=')) => two_char!("<="),
            ('>', Some('=')) => two_char!(">="),
            ('<', Some('<')) => two_char!("<<"),
            ('>', Some('>')) => two_char!(">>"),
            ('&', Some('&')) => two_char!("&&"),
            ('|', Some('|')) => two_char!("||"),
            _ => {
                let op: &'static str = match c {
                    '+' => "+",
                    '-' => "-",
                    '*' => "*",
                    '/' => "/",
                    '<' => "<",
                    '>' => ">",
                    '!' => "!",
                    '&' => "&",
                    '|' => "|",
                    '^' => "^",
                    '~' => "~",
                    other => return Err(ParseError(format!("unsupported character `{}`", other))),
                };
                toks.push(Tok::Op(op));
                i += 1;
            }
        }
    }
    Ok(toks)
}

struct Parser {
    toks: Vec<Tok>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Tok> {
        self.toks.get(self.pos)
    }

    fn bump(&mut self) -> Option<Tok> {
        let t = self.toks.get(self.pos).cloned();
        self.pos += 1;
        t
    }

    fn eat_op(&mut self, op: &str) -> bool {
        if matches!(self.peek(), Some(Tok::Op(o)) if *o == op) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn parse_or(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_and()?;
        while self.eat_op("||") {
            let rhs = self.parse_and()?;
            lhs = Expr::Binary(BinOp::Or, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_not()?;
        while self.eat_op("&&") {
            let rhs = self.parse_not()?;
            lhs = Expr::Binary(BinOp::And, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_not(&mut self) -> Result<Expr, ParseError> {
        if self.eat_op("!") {
            let inner = self.parse_not()?;
            return Ok(Expr::Unary(UnOp::Not, Box::new(inner)));
        }
        self.parse_cmp()
    }

    fn parse_cmp(&mut self) -> Result<Expr, ParseError> {
        let lhs = self.parse_bitor()?;
        let op = match self.peek() {
            Some(Tok::Op("==")) => Some(BinOp::Eq),
            Some(Tok::Op("!=")) => Some(BinOp::Ne),
            Some(Tok::Op("<")) => Some(BinOp::Lt),
            Some(Tok::Op("<=")) => Some(BinOp::Le),
            Some(Tok::Op(">")) => Some(BinOp::Gt),
            Some(Tok::Op(">=")) => Some(BinOp::Ge),
            _ => None,
        };
        if let Some(op) = op {
            self.pos += 1;
            let rhs = self.parse_bitor()?;
            return Ok(Expr::Binary(op, Box::new(lhs), Box::new(rhs)));
        }
        Ok(lhs)
    }

    fn parse_bitor(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_bitxor()?;
        while self.eat_op("|") {
            let rhs = self.parse_bitxor()?;
            lhs = Expr::Binary(BinOp::BitOr, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_bitxor(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_bitand()?;
        while self.eat_op("^") {
            let rhs = self.parse_bitand()?;
            lhs = Expr::Binary(BinOp::BitXor, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_bitand(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_shift()?;
        while self.eat_op("&") {
            let rhs = self.parse_shift()?;
            lhs = Expr::Binary(BinOp::BitAnd, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_shift(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_add()?;
        loop {
            if self.eat_op("<<") {
                let rhs = self.parse_add()?;
                lhs = Expr::Binary(BinOp::Shl, Box::new(lhs), Box::new(rhs));
            } else if self.eat_op(">>") {
                let rhs = self.parse_add()?;
                lhs = Expr::Binary(BinOp::Shr, Box::new(lhs), Box::new(rhs));
            } else {
                break;
            }
        }
        Ok(lhs)
    }

    fn parse_add(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_mul()?;
        loop {
            if self.eat_op("+") {
                let rhs = self.parse_mul()?;
                lhs = Expr::Binary(BinOp::Add, Box::new(lhs), Box::new(rhs));
            } else if self.eat_op("-") {
                let rhs = self.parse_mul()?;
                lhs = Expr::Binary(BinOp::Sub, Box::new(lhs), Box::new(rhs));
            } else {
                break;
            }
        }
        Ok(lhs)
    }

    fn parse_mul(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_unary()?;
        loop {
            if self.eat_op("*") {
                let rhs = self.parse_unary()?;
                lhs = Expr::Binary(BinOp::Mul, Box::new(lhs), Box::new(rhs));
            } else if self.eat_op("/") {
                let rhs = self.parse_unary()?;
                lhs = Expr::Binary(BinOp::Div, Box::new(lhs), Box::new(rhs));
            } else {
                break;
            }
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        if self.eat_op("-") {
            return Ok(Expr::Unary(UnOp::Neg, Box::new(self.parse_unary()?)));
        }
        if self.eat_op("~") {
            return Ok(Expr::Unary(UnOp::BitNot, Box::new(self.parse_unary()?)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        match self.bump() {
            Some(Tok::Int(v)) => Ok(Expr::IntLit(v)),
            Some(Tok::Float(v)) => Ok(Expr::FloatLit(v)),
            Some(Tok::Ident(name)) => match name.as_str() {
                "True" => Ok(Expr::BoolLit(true)),
                "False" => Ok(Expr::BoolLit(false)),
                _ => Ok(Expr::Ident(name)),
            },
            Some(Tok::LParen) => {
                let inner = self.parse_or()?;
                if !matches!(self.bump(), Some(Tok::RParen)) {
                    return Err(ParseError("expected `)`".to_string()));
                }
                Ok(inner)
            }
            other => Err(ParseError(format!("unexpected token near {:?}", other))),
        }
    }
}

/// Parse a full expression, requiring every token to be consumed.
pub fn parse(text: &str) -> Result<Expr, ParseError> {
    let toks = lex(text)?;
    let mut p = Parser { toks, pos: 0 };
    let expr = p.parse_or()?;
    if p.pos != p.toks.len() {
        return Err(ParseError(format!(
            "unexpected trailing tokens in `{}`",
            text
        )));
    }
    Ok(expr)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_arithmetic_precedence() {
        let e = parse("1 + 2 * 3").unwrap();
        assert_eq!(
            e,
            Expr::Binary(
                BinOp::Add,
                Box::new(Expr::IntLit(1)),
                Box::new(Expr::Binary(
                    BinOp::Mul,
                    Box::new(Expr::IntLit(2)),
                    Box::new(Expr::IntLit(3))
                ))
            )
        );
    }

    #[test]
    fn parses_comparison_and_logical() {
        let e = parse("x < 10 and y >= 0").unwrap();
        assert!(matches!(e, Expr::Binary(BinOp::And, _, _)));
    }

    #[test]
    fn parses_parens() {
        let e = parse("(1 + 2) * 3").unwrap();
        assert_eq!(
            e,
            Expr::Binary(
                BinOp::Mul,
                Box::new(Expr::Binary(
                    BinOp::Add,
                    Box::new(Expr::IntLit(1)),
                    Box::new(Expr::IntLit(2))
                )),
                Box::new(Expr::IntLit(3))
            )
        );
    }

    #[test]
    fn parses_bool_literals_and_not() {
        let e = parse("not True").unwrap();
        assert_eq!(e, Expr::Unary(UnOp::Not, Box::new(Expr::BoolLit(true))));
    }

    #[test]
    fn rejects_trailing_garbage() {
        assert!(parse("1 + 2)").is_err());
    }
}
