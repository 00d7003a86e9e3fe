// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! A small reader for the CEL subset the emitter produces.
//!
//! Type inference works on emitted text rather than on the JavaScript AST, so
//! anything handed to it (including fragments written by hand) goes through
//! this parser first.

use crate::error::{ConversionError, Result};

use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CelTokenKind {
    Ident,
    Int,
    Uint,
    Double,
    String,
    Symbol,
    Eof,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CelToken {
    pub kind: CelTokenKind,
    pub text: String,
    pub offset: usize,
}

const CEL_SYMBOLS: [&str; 26] = [
    ".?", "[?", "==", "!=", "<=", ">=", "&&", "||", "<", ">", "+", "-", "*", "/", "%", "!", "?",
    ":", ".", ",", "(", ")", "[", "]", "{", "}",
];

pub fn tokenize(text: &str) -> Result<Vec<CelToken>> {
    let err = |offset: usize, msg: &str| ConversionError::Parse {
        message: format!("{msg} at offset {offset}"),
        expression: text.to_string(),
        location: None,
    };

    let bytes = text.as_bytes();
    let mut tokens = vec![];
    let mut i = 0;
    while i < bytes.len() {
        let ch = bytes[i];
        if ch.is_ascii_whitespace() {
            i += 1;
            continue;
        }
        let start = i;

        if ch.is_ascii_alphabetic() || ch == b'_' {
            while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                i += 1;
            }
            tokens.push(CelToken {
                kind: CelTokenKind::Ident,
                text: text[start..i].to_string(),
                offset: start,
            });
            continue;
        }

        if ch.is_ascii_digit() {
            let mut kind = CelTokenKind::Int;
            if ch == b'0' && matches!(bytes.get(i + 1), Some(b'x' | b'X')) {
                i += 2;
                while i < bytes.len() && bytes[i].is_ascii_hexdigit() {
                    i += 1;
                }
            } else {
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
                if i + 1 < bytes.len() && bytes[i] == b'.' && bytes[i + 1].is_ascii_digit() {
                    kind = CelTokenKind::Double;
                    i += 1;
                    while i < bytes.len() && bytes[i].is_ascii_digit() {
                        i += 1;
                    }
                }
                if i < bytes.len() && matches!(bytes[i], b'e' | b'E') {
                    kind = CelTokenKind::Double;
                    i += 1;
                    if i < bytes.len() && matches!(bytes[i], b'+' | b'-') {
                        i += 1;
                    }
                    while i < bytes.len() && bytes[i].is_ascii_digit() {
                        i += 1;
                    }
                }
            }
            if kind == CelTokenKind::Int && i < bytes.len() && matches!(bytes[i], b'u' | b'U') {
                kind = CelTokenKind::Uint;
                i += 1;
            }
            tokens.push(CelToken {
                kind,
                text: text[start..i].to_string(),
                offset: start,
            });
            continue;
        }

        if ch == b'"' || ch == b'\'' {
            i += 1;
            let mut value = String::new();
            loop {
                let Some(c) = text[i..].chars().next() else {
                    return Err(err(start, "unterminated string"));
                };
                i += c.len_utf8();
                match c {
                    _ if c as u32 == ch as u32 => break,
                    '\\' => {
                        let Some(e) = text[i..].chars().next() else {
                            return Err(err(start, "unterminated string"));
                        };
                        i += e.len_utf8();
                        match e {
                            'n' => value.push('\n'),
                            'r' => value.push('\r'),
                            't' => value.push('\t'),
                            'u' => {
                                let hex = text
                                    .get(i..i + 4)
                                    .ok_or_else(|| err(i, "invalid unicode escape"))?;
                                let code = u32::from_str_radix(hex, 16)
                                    .map_err(|_| err(i, "invalid unicode escape"))?;
                                value.push(
                                    char::from_u32(code)
                                        .ok_or_else(|| err(i, "invalid unicode escape"))?,
                                );
                                i += 4;
                            }
                            other => value.push(other),
                        }
                    }
                    c => value.push(c),
                }
            }
            tokens.push(CelToken {
                kind: CelTokenKind::String,
                text: value,
                offset: start,
            });
            continue;
        }

        let rest = &text[i..];
        let sym = CEL_SYMBOLS
            .iter()
            .find(|s| rest.starts_with(*s))
            .ok_or_else(|| err(start, "unexpected character"))?;
        tokens.push(CelToken {
            kind: CelTokenKind::Symbol,
            text: sym.to_string(),
            offset: start,
        });
        i += sym.len();
    }

    tokens.push(CelToken {
        kind: CelTokenKind::Eof,
        text: String::new(),
        offset: text.len(),
    });
    Ok(tokens)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CelUnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CelExpr {
    Null,
    Bool(bool),
    Int(i64),
    Uint(u64),
    Double(f64),
    String(String),
    Ident(String),
    Select {
        operand: Box<CelExpr>,
        field: String,
        optional: bool,
    },
    Index {
        operand: Box<CelExpr>,
        index: Box<CelExpr>,
        optional: bool,
    },
    Call {
        target: Option<Box<CelExpr>>,
        function: String,
        args: Vec<CelExpr>,
    },
    List(Vec<CelExpr>),
    Map(Vec<(CelExpr, CelExpr)>),
    Unary {
        op: CelUnaryOp,
        operand: Box<CelExpr>,
    },
    Binary {
        op: String,
        lhs: Box<CelExpr>,
        rhs: Box<CelExpr>,
    },
    Conditional {
        condition: Box<CelExpr>,
        then: Box<CelExpr>,
        otherwise: Box<CelExpr>,
    },
}

impl CelExpr {
    /// Dotted path of a pure select chain such as `web.status.ready`.
    pub fn select_path(&self) -> Option<String> {
        match self {
            Self::Ident(name) => Some(name.clone()),
            Self::Select { operand, field, .. } => {
                operand.select_path().map(|p| format!("{p}.{field}"))
            }
            Self::Index { operand, index, .. } => {
                let base = operand.select_path()?;
                match index.as_ref() {
                    Self::Int(i) => Some(format!("{base}[{i}]")),
                    Self::Uint(i) => Some(format!("{base}[{i}]")),
                    Self::String(k) => Some(format!("{base}[\"{k}\"]")),
                    _ => None,
                }
            }
            _ => None,
        }
    }

    pub fn root_ident(&self) -> Option<&str> {
        match self {
            Self::Ident(name) => Some(name),
            Self::Select { operand, .. } | Self::Index { operand, .. } => operand.root_ident(),
            _ => None,
        }
    }

    pub fn uses_optional_access(&self) -> bool {
        match self {
            Self::Select {
                operand, optional, ..
            } => *optional || operand.uses_optional_access(),
            Self::Index {
                operand,
                index,
                optional,
            } => *optional || operand.uses_optional_access() || index.uses_optional_access(),
            Self::Call { target, args, .. } => {
                target.as_ref().is_some_and(|t| t.uses_optional_access())
                    || args.iter().any(|a| a.uses_optional_access())
            }
            Self::List(items) => items.iter().any(|i| i.uses_optional_access()),
            Self::Map(entries) => entries
                .iter()
                .any(|(k, v)| k.uses_optional_access() || v.uses_optional_access()),
            Self::Unary { operand, .. } => operand.uses_optional_access(),
            Self::Binary { lhs, rhs, .. } => lhs.uses_optional_access() || rhs.uses_optional_access(),
            Self::Conditional {
                condition,
                then,
                otherwise,
            } => {
                condition.uses_optional_access()
                    || then.uses_optional_access()
                    || otherwise.uses_optional_access()
            }
            _ => false,
        }
    }
}

impl fmt::Display for CelUnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Not => "!",
            Self::Neg => "-",
        })
    }
}

const MAX_NESTING: usize = 128;

pub struct CelParser<'a> {
    text: &'a str,
    tokens: Vec<CelToken>,
    pos: usize,
    depth: usize,
}

/// Parse a complete CEL expression.
pub fn parse(text: &str) -> Result<CelExpr> {
    let mut parser = CelParser::new(text)?;
    let expr = parser.parse_expr()?;
    parser.expect_eof()?;
    Ok(expr)
}

impl<'a> CelParser<'a> {
    pub fn new(text: &'a str) -> Result<Self> {
        Ok(Self {
            text,
            tokens: tokenize(text)?,
            pos: 0,
            depth: 0,
        })
    }

    fn peek(&self) -> &CelToken {
        // tokenize always ends with Eof
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn is_symbol(&self, s: &str) -> bool {
        let t = self.peek();
        t.kind == CelTokenKind::Symbol && t.text == s
    }

    fn is_ident(&self, s: &str) -> bool {
        let t = self.peek();
        t.kind == CelTokenKind::Ident && t.text == s
    }

    fn advance(&mut self) -> CelToken {
        let t = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        t
    }

    fn error(&self, msg: &str) -> ConversionError {
        let t = self.peek();
        let found = if t.kind == CelTokenKind::Eof {
            "end of expression".to_string()
        } else {
            format!("`{}`", t.text)
        };
        ConversionError::Parse {
            message: format!("{msg}, found {found} at offset {}", t.offset),
            expression: self.text.to_string(),
            location: None,
        }
    }

    fn expect(&mut self, s: &str) -> Result<()> {
        if !self.is_symbol(s) {
            return Err(self.error(&format!("expecting `{s}`")));
        }
        self.advance();
        Ok(())
    }

    fn expect_eof(&self) -> Result<()> {
        match self.peek().kind {
            CelTokenKind::Eof => Ok(()),
            _ => Err(self.error("unexpected trailing input")),
        }
    }

    fn enter(&mut self) -> Result<()> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(self.error("expression nesting too deep"));
        }
        Ok(())
    }

    pub fn parse_expr(&mut self) -> Result<CelExpr> {
        self.enter()?;
        let condition = self.parse_or()?;
        let expr = if self.is_symbol("?") {
            self.advance();
            let then = self.parse_or()?;
            self.expect(":")?;
            let otherwise = self.parse_expr()?;
            CelExpr::Conditional {
                condition: Box::new(condition),
                then: Box::new(then),
                otherwise: Box::new(otherwise),
            }
        } else {
            condition
        };
        self.depth -= 1;
        Ok(expr)
    }

    fn parse_binary_level(
        &mut self,
        ops: &[&str],
        next: fn(&mut Self) -> Result<CelExpr>,
    ) -> Result<CelExpr> {
        let mut lhs = next(self)?;
        let depth = self.depth;
        loop {
            let op = match ops.iter().find(|op| {
                if **op == "in" {
                    self.is_ident("in")
                } else {
                    self.is_symbol(op)
                }
            }) {
                Some(op) => op.to_string(),
                None => break,
            };
            self.advance();
            self.enter()?;
            let rhs = next(self)?;
            lhs = CelExpr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        self.depth = depth;
        Ok(lhs)
    }

    fn parse_or(&mut self) -> Result<CelExpr> {
        self.parse_binary_level(&["||"], Self::parse_and)
    }

    fn parse_and(&mut self) -> Result<CelExpr> {
        self.parse_binary_level(&["&&"], Self::parse_relation)
    }

    fn parse_relation(&mut self) -> Result<CelExpr> {
        self.parse_binary_level(
            &["==", "!=", "<=", ">=", "<", ">", "in"],
            Self::parse_additive,
        )
    }

    fn parse_additive(&mut self) -> Result<CelExpr> {
        self.parse_binary_level(&["+", "-"], Self::parse_multiplicative)
    }

    fn parse_multiplicative(&mut self) -> Result<CelExpr> {
        self.parse_binary_level(&["*", "/", "%"], Self::parse_unary)
    }

    fn parse_unary(&mut self) -> Result<CelExpr> {
        let op = if self.is_symbol("!") {
            CelUnaryOp::Not
        } else if self.is_symbol("-") {
            CelUnaryOp::Neg
        } else {
            return self.parse_member();
        };
        self.advance();
        self.enter()?;
        let operand = self.parse_unary()?;
        self.depth -= 1;
        Ok(CelExpr::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    fn parse_member(&mut self) -> Result<CelExpr> {
        let mut expr = self.parse_primary()?;
        let depth = self.depth;
        loop {
            if self.is_symbol(".") || self.is_symbol(".?") {
                let optional = self.advance().text == ".?";
                let t = self.advance();
                if t.kind != CelTokenKind::Ident {
                    self.pos -= 1;
                    return Err(self.error("expecting field name"));
                }
                if self.is_symbol("(") && !optional {
                    self.advance();
                    let args = self.parse_list_items(")")?;
                    expr = CelExpr::Call {
                        target: Some(Box::new(expr)),
                        function: t.text,
                        args,
                    };
                } else {
                    expr = CelExpr::Select {
                        operand: Box::new(expr),
                        field: t.text,
                        optional,
                    };
                }
            } else if self.is_symbol("[") || self.is_symbol("[?") {
                let optional = self.advance().text == "[?";
                let index = self.parse_expr()?;
                self.expect("]")?;
                expr = CelExpr::Index {
                    operand: Box::new(expr),
                    index: Box::new(index),
                    optional,
                };
            } else {
                break;
            }
            self.enter()?;
        }
        self.depth = depth;
        Ok(expr)
    }

    fn parse_list_items(&mut self, close: &str) -> Result<Vec<CelExpr>> {
        let mut items = vec![];
        while !self.is_symbol(close) {
            items.push(self.parse_expr()?);
            if !self.is_symbol(",") {
                break;
            }
            self.advance();
        }
        self.expect(close)?;
        Ok(items)
    }

    fn parse_primary(&mut self) -> Result<CelExpr> {
        let t = self.peek().clone();
        match t.kind {
            CelTokenKind::Int => {
                self.advance();
                let v = match t.text.strip_prefix("0x").or(t.text.strip_prefix("0X")) {
                    Some(hex) => i64::from_str_radix(hex, 16),
                    None => t.text.parse::<i64>(),
                };
                v.map(CelExpr::Int)
                    .map_err(|_| self.error("integer literal out of range"))
            }
            CelTokenKind::Uint => {
                self.advance();
                t.text[..t.text.len() - 1]
                    .parse::<u64>()
                    .map(CelExpr::Uint)
                    .map_err(|_| self.error("unsigned literal out of range"))
            }
            CelTokenKind::Double => {
                self.advance();
                t.text
                    .parse::<f64>()
                    .map(CelExpr::Double)
                    .map_err(|_| self.error("invalid double literal"))
            }
            CelTokenKind::String => {
                self.advance();
                Ok(CelExpr::String(t.text))
            }
            CelTokenKind::Ident => {
                self.advance();
                match t.text.as_str() {
                    "true" => Ok(CelExpr::Bool(true)),
                    "false" => Ok(CelExpr::Bool(false)),
                    "null" => Ok(CelExpr::Null),
                    _ if self.is_symbol("(") => {
                        self.advance();
                        let args = self.parse_list_items(")")?;
                        Ok(CelExpr::Call {
                            target: None,
                            function: t.text,
                            args,
                        })
                    }
                    _ => Ok(CelExpr::Ident(t.text)),
                }
            }
            CelTokenKind::Symbol if t.text == "(" => {
                self.advance();
                let e = self.parse_expr()?;
                self.expect(")")?;
                Ok(e)
            }
            CelTokenKind::Symbol if t.text == "[" => {
                self.advance();
                Ok(CelExpr::List(self.parse_list_items("]")?))
            }
            CelTokenKind::Symbol if t.text == "{" => {
                self.advance();
                let mut entries = vec![];
                while !self.is_symbol("}") {
                    let k = self.parse_expr()?;
                    self.expect(":")?;
                    let v = self.parse_expr()?;
                    entries.push((k, v));
                    if !self.is_symbol(",") {
                        break;
                    }
                    self.advance();
                }
                self.expect("}")?;
                Ok(CelExpr::Map(entries))
            }
            _ => Err(self.error("expecting expression")),
        }
    }
}
