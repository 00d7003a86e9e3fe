// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::ast::*;
use crate::error::Result;
use crate::lexer::*;

use tracing::trace;

/// Nesting beyond this is rejected rather than risking the stack.
pub const MAX_NESTING_DEPTH: usize = 32;

// Reserved words that introduce constructs outside the convertible subset.
const UNSUPPORTED_KEYWORDS: [(&str, &str); 34] = [
    ("new", "`new` expressions are not supported"),
    ("this", "`this` is not supported"),
    ("super", "`super` is not supported"),
    ("function", "function expressions are not supported"),
    ("class", "class expressions are not supported"),
    ("for", "loops are not supported"),
    ("while", "loops are not supported"),
    ("do", "loops are not supported"),
    ("if", "statements are not supported"),
    ("else", "statements are not supported"),
    ("let", "declarations are not supported"),
    ("const", "declarations are not supported"),
    ("var", "declarations are not supported"),
    ("return", "statements are not supported"),
    ("switch", "statements are not supported"),
    ("case", "statements are not supported"),
    ("break", "statements are not supported"),
    ("continue", "statements are not supported"),
    ("throw", "statements are not supported"),
    ("try", "statements are not supported"),
    ("catch", "statements are not supported"),
    ("finally", "statements are not supported"),
    ("typeof", "`typeof` is not supported"),
    ("void", "`void` is not supported"),
    ("delete", "`delete` is not supported"),
    ("await", "`await` is not supported"),
    ("yield", "`yield` is not supported"),
    ("async", "async functions are not supported"),
    ("import", "imports are not supported"),
    ("export", "exports are not supported"),
    ("in", "the `in` operator is not supported"),
    ("instanceof", "`instanceof` is not supported"),
    ("debugger", "statements are not supported"),
    ("with", "statements are not supported"),
];

const ASSIGNMENT_OPS: [&str; 16] = [
    "=", "+=", "-=", "*=", "/=", "%=", "**=", "<<=", ">>=", ">>>=", "&=", "|=", "^=", "&&=",
    "||=", "??=",
];

#[derive(Clone)]
pub struct Parser<'source> {
    source: Source,
    lexer: Lexer<'source>,
    tok: Token,
    end: u32,
    depth: usize,
}

/// Parse a standalone expression.
pub fn parse_expression(text: &str) -> Result<Ref<Expr>> {
    let source = Source::from_expression(text)?;
    let mut parser = Parser::new(&source)?;
    parser.parse()
}

/// Span including the delimiters of string and template tokens.
fn outer_span(tok: &Token) -> Span {
    let mut span = tok.1.clone();
    let (before, after) = match tok.0 {
        TokenKind::String => (1, 1),
        TokenKind::Template(TemplatePart::Full | TemplatePart::Tail) => (1, 1),
        TokenKind::Template(TemplatePart::Head | TemplatePart::Middle) => (1, 2),
        _ => (0, 0),
    };
    span.start = span.start.saturating_sub(before);
    span.col = span.col.saturating_sub(before);
    span.end += after;
    span
}

fn unsupported_keyword(name: &str) -> Option<&'static str> {
    UNSUPPORTED_KEYWORDS
        .iter()
        .find(|(kw, _)| *kw == name)
        .map(|(_, what)| *what)
}

impl<'source> Parser<'source> {
    pub fn new(source: &'source Source) -> Result<Self> {
        let mut lexer = Lexer::new(source);
        let tok = lexer.next_token()?;
        Ok(Self {
            source: source.clone(),
            lexer,
            tok,
            end: 0,
            depth: 0,
        })
    }

    pub fn token_text(&self) -> &str {
        match self.tok.0 {
            TokenKind::Symbol | TokenKind::Number | TokenKind::Ident | TokenKind::Eof => {
                self.tok.1.text()
            }
            TokenKind::String | TokenKind::Template(_) => "",
        }
    }

    fn is_symbol(&self, text: &str) -> bool {
        self.tok.0 == TokenKind::Symbol && self.tok.1.text() == text
    }

    pub fn next_token(&mut self) -> Result<()> {
        self.end = outer_span(&self.tok).end;
        self.tok = self.lexer.next_token()?;
        Ok(())
    }

    fn expect(&mut self, text: &str, context: &str) -> Result<()> {
        if self.is_symbol(text) {
            self.next_token()
        } else {
            let msg = format!("expecting `{text}` {context}");
            Err(self.source.error(self.tok.1.line, self.tok.1.col, &msg))
        }
    }

    fn error_here(&self, msg: &str) -> crate::error::ConversionError {
        self.source.error(self.tok.1.line, self.tok.1.col, msg)
    }

    fn span_from(&self, start: &Span) -> Span {
        let mut span = start.clone();
        span.end = self.end;
        span
    }

    fn enter(&mut self) -> Result<()> {
        self.depth += 1;
        if self.depth > MAX_NESTING_DEPTH {
            return Err(self.error_here("expression nesting too deep"));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    /// Parse the whole source as a single expression.
    pub fn parse(&mut self) -> Result<Ref<Expr>> {
        if self.tok.0 == TokenKind::Eof {
            return Err(self.error_here("empty expression"));
        }
        let expr = self.parse_expr()?;

        if self.is_symbol(";") {
            self.next_token()?;
            if self.tok.0 != TokenKind::Eof {
                return Err(self
                    .tok
                    .1
                    .unsupported("multiple statements are not supported"));
            }
        }
        match self.tok.0 {
            TokenKind::Eof => (),
            _ if self.is_symbol(",") => {
                return Err(self.tok.1.unsupported("comma sequences are not supported"));
            }
            _ => return Err(self.error_here("unexpected token after expression")),
        }

        trace!(shape = ?expr.shape(), "parsed expression");
        Ok(Ref::new(expr))
    }

    pub fn parse_expr(&mut self) -> Result<Expr> {
        self.enter()?;
        let expr = if self.is_arrow_start()? {
            self.parse_arrow()?
        } else {
            let start = self.tok.1.clone();
            let expr = self.parse_conditional(&start)?;
            if self.tok.0 == TokenKind::Symbol && ASSIGNMENT_OPS.contains(&self.token_text()) {
                return Err(self
                    .tok
                    .1
                    .unsupported("assignment is not supported"));
            }
            expr
        };
        self.leave();
        Ok(expr)
    }

    fn is_arrow_start(&mut self) -> Result<bool> {
        match self.tok.0 {
            TokenKind::Ident => {
                let mut p = self.clone();
                p.next_token()?;
                Ok(p.is_symbol("=>"))
            }
            TokenKind::Symbol if self.is_symbol("(") => {
                let mut p = self.clone();
                Ok(p.parse_arrow_params().is_ok() && p.is_symbol("=>"))
            }
            _ => Ok(false),
        }
    }

    fn parse_arrow_params(&mut self) -> Result<Vec<Span>> {
        if self.tok.0 == TokenKind::Ident {
            let span = self.tok.1.clone();
            self.next_token()?;
            return Ok(vec![span]);
        }
        self.expect("(", "while parsing arrow parameters")?;
        let mut params = vec![];
        while self.tok.0 == TokenKind::Ident {
            params.push(self.tok.1.clone());
            self.next_token()?;
            if !self.is_symbol(",") {
                break;
            }
            self.next_token()?;
        }
        self.expect(")", "while parsing arrow parameters")?;
        Ok(params)
    }

    fn parse_arrow(&mut self) -> Result<Expr> {
        let start = self.tok.1.clone();
        let params = self.parse_arrow_params()?;
        for p in &params {
            if unsupported_keyword(p.text()).is_some() {
                return Err(p.error("invalid parameter name"));
            }
        }
        self.expect("=>", "while parsing arrow function")?;
        if self.is_symbol("{") {
            return Err(self
                .tok
                .1
                .unsupported("arrow functions with block bodies are not supported"));
        }
        let body = self.parse_expr()?;
        Ok(Expr::Arrow {
            span: self.span_from(&start),
            params,
            body: Ref::new(body),
        })
    }

    fn parse_conditional(&mut self, start: &Span) -> Result<Expr> {
        let test = self.parse_logical_or()?;
        if !self.is_symbol("?") {
            return Ok(test);
        }
        self.next_token()?;
        let consequent = self.parse_expr()?;
        self.expect(":", "while parsing conditional expression")?;
        let alternate = self.parse_expr()?;
        Ok(Expr::Conditional {
            span: self.span_from(start),
            test: Ref::new(test),
            consequent: Ref::new(consequent),
            alternate: Ref::new(alternate),
        })
    }

    fn parse_logical_or(&mut self) -> Result<Expr> {
        let start = self.tok.1.clone();
        let mut expr = self.parse_logical_and()?;
        let depth = self.depth;
        loop {
            let op = match self.token_text() {
                "||" => LogicalOp::Or,
                "??" => LogicalOp::Nullish,
                _ => break,
            };
            self.next_token()?;
            self.enter()?;
            let rhs = self.parse_logical_and()?;
            expr = Expr::Logical {
                span: self.span_from(&start),
                op,
                lhs: Ref::new(expr),
                rhs: Ref::new(rhs),
            };
        }
        self.depth = depth;
        Ok(expr)
    }

    fn parse_logical_and(&mut self) -> Result<Expr> {
        let start = self.tok.1.clone();
        let mut expr = self.parse_equality()?;
        let depth = self.depth;
        loop {
            match self.token_text() {
                "&&" => (),
                "|" | "^" | "&" => {
                    return Err(self
                        .tok
                        .1
                        .unsupported("bitwise operators are not supported"))
                }
                _ => break,
            }
            self.next_token()?;
            self.enter()?;
            let rhs = self.parse_equality()?;
            expr = Expr::Logical {
                span: self.span_from(&start),
                op: LogicalOp::And,
                lhs: Ref::new(expr),
                rhs: Ref::new(rhs),
            };
        }
        self.depth = depth;
        Ok(expr)
    }

    fn parse_equality(&mut self) -> Result<Expr> {
        let start = self.tok.1.clone();
        let mut expr = self.parse_relational()?;
        let depth = self.depth;
        loop {
            let op = match self.token_text() {
                "==" => BinaryOp::Eq,
                "===" => BinaryOp::StrictEq,
                "!=" => BinaryOp::Ne,
                "!==" => BinaryOp::StrictNe,
                _ => break,
            };
            self.next_token()?;
            self.enter()?;
            let rhs = self.parse_relational()?;
            expr = Expr::Binary {
                span: self.span_from(&start),
                op,
                lhs: Ref::new(expr),
                rhs: Ref::new(rhs),
            };
        }
        self.depth = depth;
        Ok(expr)
    }

    fn parse_relational(&mut self) -> Result<Expr> {
        let start = self.tok.1.clone();
        let mut expr = self.parse_additive()?;
        let depth = self.depth;
        loop {
            let op = match (self.tok.0, self.token_text()) {
                (TokenKind::Symbol, "<") => BinaryOp::Lt,
                (TokenKind::Symbol, "<=") => BinaryOp::Le,
                (TokenKind::Symbol, ">") => BinaryOp::Gt,
                (TokenKind::Symbol, ">=") => BinaryOp::Ge,
                (TokenKind::Ident, "in" | "instanceof") => {
                    let msg = unsupported_keyword(self.token_text()).unwrap_or("unsupported operator");
                    return Err(self.tok.1.unsupported(msg));
                }
                _ => break,
            };
            self.next_token()?;
            self.enter()?;
            let rhs = self.parse_additive()?;
            expr = Expr::Binary {
                span: self.span_from(&start),
                op,
                lhs: Ref::new(expr),
                rhs: Ref::new(rhs),
            };
        }
        self.depth = depth;
        Ok(expr)
    }

    fn parse_additive(&mut self) -> Result<Expr> {
        let start = self.tok.1.clone();
        let mut expr = self.parse_multiplicative()?;
        let depth = self.depth;
        loop {
            let op = match self.token_text() {
                "+" => BinaryOp::Add,
                "-" => BinaryOp::Sub,
                "<<" | ">>" | ">>>" => {
                    return Err(self
                        .tok
                        .1
                        .unsupported("shift operators are not supported"))
                }
                _ => break,
            };
            self.next_token()?;
            self.enter()?;
            let rhs = self.parse_multiplicative()?;
            expr = Expr::Binary {
                span: self.span_from(&start),
                op,
                lhs: Ref::new(expr),
                rhs: Ref::new(rhs),
            };
        }
        self.depth = depth;
        Ok(expr)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr> {
        let start = self.tok.1.clone();
        let mut expr = self.parse_unary()?;
        let depth = self.depth;
        loop {
            let op = match self.token_text() {
                "*" => BinaryOp::Mul,
                "/" => BinaryOp::Div,
                "%" => BinaryOp::Mod,
                "**" => {
                    return Err(self
                        .tok
                        .1
                        .unsupported("exponentiation is not supported"))
                }
                _ => break,
            };
            self.next_token()?;
            self.enter()?;
            let rhs = self.parse_unary()?;
            expr = Expr::Binary {
                span: self.span_from(&start),
                op,
                lhs: Ref::new(expr),
                rhs: Ref::new(rhs),
            };
        }
        self.depth = depth;
        Ok(expr)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        let start = self.tok.1.clone();
        let op = match (self.tok.0, self.token_text()) {
            (TokenKind::Symbol, "!") => UnaryOp::Not,
            (TokenKind::Symbol, "-") => UnaryOp::Neg,
            (TokenKind::Symbol, "+") => {
                return Err(start.unsupported("unary plus is not supported"));
            }
            (TokenKind::Symbol, "~") => {
                return Err(start.unsupported("bitwise operators are not supported"));
            }
            (TokenKind::Symbol, "++" | "--") => {
                return Err(start.unsupported("increment and decrement are not supported"));
            }
            (TokenKind::Ident, "typeof" | "void" | "delete" | "await") => {
                let msg = unsupported_keyword(self.token_text()).unwrap_or("unsupported operator");
                return Err(start.unsupported(msg));
            }
            _ => return self.parse_postfix(),
        };
        self.next_token()?;
        self.enter()?;
        let expr = self.parse_unary()?;
        self.leave();
        Ok(Expr::Unary {
            span: self.span_from(&start),
            op,
            expr: Ref::new(expr),
        })
    }

    fn parse_postfix(&mut self) -> Result<Expr> {
        let expr = self.parse_call_member()?;
        if self.is_symbol("++") || self.is_symbol("--") {
            let span = self.span_from(expr.span());
            return Err(span.unsupported("increment and decrement are not supported"));
        }
        Ok(expr)
    }

    fn parse_property_name(&mut self) -> Result<Span> {
        match self.tok.0 {
            TokenKind::Ident => {
                let span = self.tok.1.clone();
                self.next_token()?;
                Ok(span)
            }
            _ => Err(self.error_here("expecting property name")),
        }
    }

    fn parse_args(&mut self) -> Result<Vec<Ref<Expr>>> {
        self.expect("(", "while parsing call arguments")?;
        let mut args = vec![];
        while !self.is_symbol(")") {
            if self.is_symbol("...") {
                return Err(self.tok.1.unsupported("spread arguments are not supported"));
            }
            args.push(Ref::new(self.parse_expr()?));
            if !self.is_symbol(",") {
                break;
            }
            self.next_token()?;
        }
        self.expect(")", "while parsing call arguments")?;
        Ok(args)
    }

    fn parse_call_member(&mut self) -> Result<Expr> {
        let start = self.tok.1.clone();
        let mut expr = self.parse_primary()?;
        let depth = self.depth;

        loop {
            match self.tok.0 {
                TokenKind::Template(TemplatePart::Full | TemplatePart::Head) => {
                    return Err(self
                        .tok
                        .1
                        .unsupported("tagged templates are not supported"));
                }
                TokenKind::Symbol => (),
                _ => break,
            }
            match self.token_text() {
                "." => {
                    self.next_token()?;
                    let property = self.parse_property_name()?;
                    expr = Expr::Member {
                        span: self.span_from(&start),
                        object: Ref::new(expr),
                        property,
                        optional: false,
                    };
                }
                "?." => {
                    self.next_token()?;
                    if self.is_symbol("(") {
                        return Err(self
                            .tok
                            .1
                            .unsupported("optional calls are not supported"));
                    }
                    if self.is_symbol("[") {
                        self.next_token()?;
                        let index = self.parse_expr()?;
                        self.expect("]", "while parsing optional index")?;
                        expr = Expr::Index {
                            span: self.span_from(&start),
                            object: Ref::new(expr),
                            index: Ref::new(index),
                            optional: true,
                        };
                    } else {
                        let property = self.parse_property_name()?;
                        expr = Expr::Member {
                            span: self.span_from(&start),
                            object: Ref::new(expr),
                            property,
                            optional: true,
                        };
                    }
                }
                "[" => {
                    self.next_token()?;
                    let index = self.parse_expr()?;
                    self.expect("]", "while parsing index expression")?;
                    expr = Expr::Index {
                        span: self.span_from(&start),
                        object: Ref::new(expr),
                        index: Ref::new(index),
                        optional: false,
                    };
                }
                "(" => {
                    let args = self.parse_args()?;
                    expr = Expr::Call {
                        span: self.span_from(&start),
                        callee: Ref::new(expr),
                        args,
                    };
                }
                _ => break,
            }
            self.enter()?;
        }
        self.depth = depth;
        Ok(expr)
    }

    fn read_number(span: Span) -> Result<Expr> {
        let text = span.text().replace('_', "");
        let radix = match text.get(0..2) {
            Some("0x" | "0X") => 16,
            Some("0o" | "0O") => 8,
            Some("0b" | "0B") => 2,
            _ => 10,
        };
        let value = if radix == 10 {
            text.parse::<f64>()
                .map_err(|_| span.error("invalid number"))?
        } else {
            u64::from_str_radix(&text[2..], radix)
                .map_err(|_| span.error("number out of range"))? as f64
        };
        Ok(Expr::Number { span, value })
    }

    fn parse_template(&mut self) -> Result<Expr> {
        let start = outer_span(&self.tok);
        let mut quasis = vec![];
        let mut exprs = vec![];

        let TokenKind::Template(part) = self.tok.0 else {
            return Err(self.error_here("expecting template literal"));
        };
        quasis.push(unescape(self.tok.1.text(), &self.tok.1)?);
        self.next_token()?;
        if part == TemplatePart::Full {
            return Ok(Expr::Template {
                span: self.span_from(&start),
                quasis,
                exprs,
            });
        }

        loop {
            exprs.push(Ref::new(self.parse_expr()?));
            match self.tok.0 {
                TokenKind::Template(TemplatePart::Middle) => {
                    quasis.push(unescape(self.tok.1.text(), &self.tok.1)?);
                    self.next_token()?;
                }
                TokenKind::Template(TemplatePart::Tail) => {
                    quasis.push(unescape(self.tok.1.text(), &self.tok.1)?);
                    self.next_token()?;
                    break;
                }
                _ => return Err(self.error_here("expecting `}` in template literal")),
            }
        }

        Ok(Expr::Template {
            span: self.span_from(&start),
            quasis,
            exprs,
        })
    }

    fn parse_array(&mut self) -> Result<Expr> {
        let start = self.tok.1.clone();
        self.expect("[", "while parsing array")?;
        let mut items = vec![];
        while !self.is_symbol("]") {
            if self.is_symbol("...") {
                return Err(self.tok.1.unsupported("spread elements are not supported"));
            }
            if self.is_symbol(",") {
                return Err(self.tok.1.unsupported("array holes are not supported"));
            }
            items.push(Ref::new(self.parse_expr()?));
            if !self.is_symbol(",") {
                break;
            }
            self.next_token()?;
        }
        self.expect("]", "while parsing array")?;
        Ok(Expr::Array {
            span: self.span_from(&start),
            items,
        })
    }

    fn parse_object(&mut self) -> Result<Expr> {
        let start = self.tok.1.clone();
        self.expect("{", "while parsing object")?;
        let mut fields = vec![];
        while !self.is_symbol("}") {
            let key_span = self.tok.1.clone();
            let is_ident = self.tok.0 == TokenKind::Ident;
            let key = match self.tok.0 {
                TokenKind::Ident => key_span.text().to_string(),
                TokenKind::String => unescape(key_span.text(), &key_span)?,
                TokenKind::Number => match Self::read_number(key_span.clone())? {
                    Expr::Number { value, .. } => format_js_number(value),
                    _ => return Err(key_span.error("invalid property key")),
                },
                _ if self.is_symbol("[") => {
                    return Err(key_span.unsupported("computed property keys are not supported"));
                }
                _ if self.is_symbol("...") => {
                    return Err(key_span.unsupported("object spread is not supported"));
                }
                _ => return Err(self.error_here("expecting property key")),
            };
            self.next_token()?;

            let value = if self.is_symbol(":") {
                self.next_token()?;
                self.parse_expr()?
            } else if self.is_symbol("(") {
                return Err(key_span.unsupported("object methods are not supported"));
            } else if is_ident {
                // Shorthand `{ name }`.
                Expr::Ident {
                    span: key_span.clone(),
                    name: key.clone(),
                }
            } else {
                return Err(self.error_here("expecting `:` after property key"));
            };
            fields.push((key_span, key, Ref::new(value)));

            if !self.is_symbol(",") {
                break;
            }
            self.next_token()?;
        }
        self.expect("}", "while parsing object")?;
        Ok(Expr::Object {
            span: self.span_from(&start),
            fields,
        })
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        let span = self.tok.1.clone();
        match self.tok.0 {
            TokenKind::Number => {
                self.next_token()?;
                Self::read_number(span)
            }
            TokenKind::String => {
                let value = unescape(span.text(), &span)?;
                let span = outer_span(&self.tok);
                self.next_token()?;
                Ok(Expr::String { span, value })
            }
            TokenKind::Template(TemplatePart::Full | TemplatePart::Head) => self.parse_template(),
            TokenKind::Template(_) => Err(self.error_here("unexpected template continuation")),
            TokenKind::Ident => {
                let name = span.text().to_string();
                if let Some(msg) = unsupported_keyword(&name) {
                    return Err(span.unsupported(msg));
                }
                self.next_token()?;
                Ok(match name.as_str() {
                    "true" => Expr::Bool { span, value: true },
                    "false" => Expr::Bool { span, value: false },
                    "null" => Expr::Null { span },
                    "undefined" => Expr::Undefined { span },
                    _ => Expr::Ident { span, name },
                })
            }
            TokenKind::Symbol => match span.text() {
                "(" => {
                    self.next_token()?;
                    let expr = self.parse_expr()?;
                    if self.is_symbol(",") {
                        return Err(self.tok.1.unsupported("comma sequences are not supported"));
                    }
                    self.expect(")", "while parsing parenthesized expression")?;
                    Ok(expr)
                }
                "[" => self.parse_array(),
                "{" => self.parse_object(),
                "/" | "/=" => Err(span.unsupported("regular expressions are not supported")),
                _ => Err(self.error_here("expecting expression")),
            },
            TokenKind::Eof => Err(self.error_here("unexpected end of expression")),
        }
    }
}

/// JavaScript's canonical rendering of a number used as a property key.
pub fn format_js_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e21 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}
