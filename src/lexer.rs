// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::error::{ConversionError, Result, SourceLocation};

use core::cmp;
use core::fmt::{self, Debug, Formatter};
use core::iter::Peekable;
use core::str::CharIndices;
use std::rc::Rc;

#[derive(Clone)]
struct SourceInternal {
    pub file: String,
    pub contents: String,
    pub lines: Vec<(u32, u32)>,
}

/// Expression text being converted, shared by every span pointing into it.
#[derive(Clone)]
pub struct Source {
    src: Rc<SourceInternal>,
}

impl cmp::PartialEq for Source {
    fn eq(&self, other: &Source) -> bool {
        Rc::ptr_eq(&self.src, &other.src)
    }
}

impl cmp::Eq for Source {}

impl Debug for Source {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        self.src.file.fmt(f)
    }
}

impl Source {
    pub fn from_contents(file: String, contents: String) -> Result<Source> {
        let max_size = u32::MAX as usize - 2; // Account for rows, cols possibly starting at 1, EOF etc.
        if contents.len() > max_size {
            return Err(ConversionError::Parse {
                message: format!("{file} exceeds maximum allowed expression size {max_size}"),
                expression: String::new(),
                location: None,
            });
        }
        let mut lines = vec![];
        let mut prev_ch = ' ';
        let mut prev_pos = 0u32;
        let mut start = 0u32;
        for (i, ch) in contents.char_indices() {
            if ch == '\n' {
                let end = match prev_ch {
                    '\r' => prev_pos,
                    _ => i as u32,
                };
                lines.push((start, end));
                start = i as u32 + 1;
            }
            prev_ch = ch;
            prev_pos = i as u32;
        }

        if (start as usize) < contents.len() {
            lines.push((start, contents.len() as u32));
        } else if contents.is_empty() {
            lines.push((0, 0));
        } else {
            let s = (contents.len() - 1) as u32;
            lines.push((s, s));
        }
        Ok(Self {
            src: Rc::new(SourceInternal {
                file,
                contents,
                lines,
            }),
        })
    }

    /// Source for an inline expression, named `<expr>` in diagnostics.
    pub fn from_expression(contents: &str) -> Result<Source> {
        Self::from_contents("<expr>".to_string(), contents.to_string())
    }

    pub fn file(&self) -> &String {
        &self.src.file
    }

    pub fn contents(&self) -> &String {
        &self.src.contents
    }

    pub fn line(&self, idx: u32) -> &str {
        let idx = idx as usize;
        if idx < self.src.lines.len() {
            let (start, end) = self.src.lines[idx];
            &self.src.contents[start as usize..end as usize]
        } else {
            ""
        }
    }

    pub fn message(&self, line: u32, col: u32, kind: &str, msg: &str) -> String {
        if line as usize > self.src.lines.len() {
            return format!("{}: invalid line {} specified", self.src.file, line);
        }

        let line_str = format!("{line}");
        let line_num_width = line_str.len() + 1;
        let col_spaces = (col as usize).saturating_sub(1);

        format!(
            "\n--> {}:{}:{}\n{:<line_num_width$}|\n\
		{:<line_num_width$}| {}\n\
		{:<line_num_width$}| {:<col_spaces$}^\n\
		{}: {}",
            self.src.file,
            line,
            col,
            "",
            line,
            self.line(line - 1),
            "",
            "",
            kind,
            msg
        )
    }

    pub fn error(&self, line: u32, col: u32, msg: &str) -> ConversionError {
        ConversionError::Parse {
            message: self.message(line, col, "error", msg),
            expression: self.contents().clone(),
            location: Some(SourceLocation {
                line,
                column: col,
                length: 1,
            }),
        }
    }
}

#[derive(Clone)]
pub struct Span {
    pub source: Source,
    pub line: u32,
    pub col: u32,
    pub start: u32,
    pub end: u32,
}

impl Span {
    pub fn text(&self) -> &str {
        &self.source.contents()[self.start as usize..self.end as usize]
    }

    pub fn location(&self) -> SourceLocation {
        SourceLocation {
            line: self.line,
            column: self.col,
            length: self.end.saturating_sub(self.start),
        }
    }

    pub fn message(&self, kind: &str, msg: &str) -> String {
        self.source.message(self.line, self.col, kind, msg)
    }

    pub fn error(&self, msg: &str) -> ConversionError {
        ConversionError::Parse {
            message: self.message("error", msg),
            expression: self.source.contents().clone(),
            location: Some(self.location()),
        }
    }

    /// Valid JavaScript the converter refuses to translate.
    pub fn unsupported(&self, msg: &str) -> ConversionError {
        ConversionError::UnsupportedSyntax {
            message: format!("{msg} in `{}`", self.text()),
            expression: self.source.contents().clone(),
            location: Some(self.location()),
        }
    }

    pub fn unresolvable(&self, reference: &str, msg: &str) -> ConversionError {
        ConversionError::UnresolvableReference {
            reference: reference.to_string(),
            message: msg.to_string(),
            expression: self.source.contents().clone(),
            location: Some(self.location()),
        }
    }
}

impl Debug for Span {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        let t = self.text().escape_debug().to_string();
        let max = 32;
        let (txt, trailer) = if t.len() > max {
            (&t[0..max], "...")
        } else {
            (t.as_str(), "")
        };

        f.write_fmt(format_args!(
            "{}:{}:{}:{}, \"{}{}\"",
            self.line, self.col, self.start, self.end, txt, trailer
        ))
    }
}

/// Position of a template chunk relative to its `${...}` holes.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum TemplatePart {
    // `...` with no substitutions
    Full,
    // `...${
    Head,
    // }...${
    Middle,
    // }...`
    Tail,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum TokenKind {
    Symbol,
    String,
    Template(TemplatePart),
    Number,
    Ident,
    Eof,
}

/// For strings and template chunks the span covers the raw text between the
/// delimiters.
#[derive(Debug, Clone)]
pub struct Token(pub TokenKind, pub Span);

// Longest first so that greedy matching picks `===` over `==`.
const SYMBOLS: [&str; 52] = [
    ">>>=", "...", "===", "!==", "**=", "<<=", ">>=", ">>>", "&&=", "||=", "??=", "=>", "==",
    "!=", "<=", ">=", "&&", "||", "??", "?.", "++", "--", "+=", "-=", "*=", "/=", "%=", "&=",
    "|=", "^=", "**", "<<", ">>", "{", "}", "(", ")", "[", "]", ";", ",", "<", ">", "+", "-",
    "*", "/", "%", "&", "|", "^", "!",
];

const SINGLE_SYMBOLS: [char; 5] = ['~', '?', ':', '=', '.'];

#[derive(Clone)]
pub struct Lexer<'source> {
    source: Source,
    iter: Peekable<CharIndices<'source>>,
    line: u32,
    col: u32,
    // Open `{` count, and the counts at which each pending `${` was opened.
    braces: u32,
    templates: Vec<u32>,
}

impl<'source> Lexer<'source> {
    pub fn new(source: &'source Source) -> Self {
        Self {
            source: source.clone(),
            iter: source.contents().char_indices().peekable(),
            line: 1,
            col: 1,
            braces: 0,
            templates: vec![],
        }
    }

    fn peek(&mut self) -> (usize, char) {
        match self.iter.peek() {
            Some((index, chr)) => (*index, *chr),
            _ => (self.source.contents().len(), '\x00'),
        }
    }

    fn peekahead(&mut self, n: usize) -> (usize, char) {
        match self.iter.clone().nth(n) {
            Some((index, chr)) => (index, chr),
            _ => (self.source.contents().len(), '\x00'),
        }
    }

    fn bump(&mut self) {
        if let Some((_, ch)) = self.iter.next() {
            if ch == '\n' {
                self.line += 1;
                self.col = 1;
            } else {
                self.col += 1;
            }
        }
    }

    fn span(&self, line: u32, col: u32, start: usize, end: usize) -> Span {
        Span {
            source: self.source.clone(),
            line,
            col,
            start: start as u32,
            end: end as u32,
        }
    }

    fn read_ident(&mut self) -> Token {
        let (start, _) = self.peek();
        let (line, col) = (self.line, self.col);
        loop {
            let ch = self.peek().1;
            if ch.is_alphanumeric() || ch == '_' || ch == '$' {
                self.bump();
            } else {
                break;
            }
        }
        let end = self.peek().0;
        Token(TokenKind::Ident, self.span(line, col, start, end))
    }

    fn read_digits(&mut self, radix: u32) {
        loop {
            let ch = self.peek().1;
            if ch.is_digit(radix) || (ch == '_' && self.peekahead(1).1.is_digit(radix)) {
                self.bump();
            } else {
                break;
            }
        }
    }

    fn read_number(&mut self) -> Result<Token> {
        let (start, chr) = self.peek();
        let (line, col) = (self.line, self.col);

        let radix = match (chr, self.peekahead(1).1) {
            ('0', 'x' | 'X') => 16,
            ('0', 'o' | 'O') => 8,
            ('0', 'b' | 'B') => 2,
            _ => 10,
        };

        if radix != 10 {
            self.bump();
            self.bump();
            let digits_start = self.peek().0;
            self.read_digits(radix);
            if self.peek().0 == digits_start {
                return Err(self.source.error(line, col, "missing digits after radix prefix"));
            }
        } else {
            // Integer part, possibly empty for `.5`.
            self.read_digits(10);
            if self.peek().1 == '.' {
                self.bump();
                self.read_digits(10);
            }
            let ch = self.peek().1;
            if ch == 'e' || ch == 'E' {
                self.bump();
                if matches!(self.peek().1, '+' | '-') {
                    self.bump();
                }
                let digits_start = self.peek().0;
                self.read_digits(10);
                if self.peek().0 == digits_start {
                    return Err(self.source.error(self.line, self.col, "invalid exponent"));
                }
            }
        }

        // A number cannot run into an identifier. BigInt suffixes are not supported.
        let ch = self.peek().1;
        if ch == '_' || ch.is_alphanumeric() {
            return Err(self.source.error(self.line, self.col, "invalid number"));
        }

        let end = self.peek().0;
        Ok(Token(TokenKind::Number, self.span(line, col, start, end)))
    }

    fn read_string(&mut self, quote: char) -> Result<Token> {
        let (line, col) = (self.line, self.col);
        self.bump();
        let (start, _) = self.peek();
        loop {
            let (_, ch) = self.peek();
            match ch {
                c if c == quote => break,
                '\x00' if self.peek().0 >= self.source.contents().len() => {
                    return Err(self.source.error(line, col, &format!("unmatched {quote}")));
                }
                '\n' => {
                    return Err(self
                        .source
                        .error(line, col, "unterminated string literal"));
                }
                '\\' => {
                    self.bump();
                    self.bump();
                }
                _ => self.bump(),
            }
        }
        let end = self.peek().0;
        self.bump();

        // Validate escapes now so errors point at the literal.
        let span = self.span(line, col + 1, start, end);
        unescape(span.text(), &span)?;
        Ok(Token(TokenKind::String, span))
    }

    /// Read a template chunk. The opening delimiter (backtick or the `}`
    /// closing a substitution) has already been consumed.
    fn read_template_chunk(&mut self, opened_by_backtick: bool) -> Result<Token> {
        let (line, col) = (self.line, self.col);
        let (start, _) = self.peek();
        loop {
            let (pos, ch) = self.peek();
            match ch {
                '`' => {
                    self.bump();
                    let kind = if opened_by_backtick {
                        TemplatePart::Full
                    } else {
                        TemplatePart::Tail
                    };
                    let span = self.span(line, col, start, pos);
                    unescape(span.text(), &span)?;
                    return Ok(Token(TokenKind::Template(kind), span));
                }
                '$' if self.peekahead(1).1 == '{' => {
                    self.bump();
                    self.bump();
                    self.templates.push(self.braces);
                    let kind = if opened_by_backtick {
                        TemplatePart::Head
                    } else {
                        TemplatePart::Middle
                    };
                    let span = self.span(line, col, start, pos);
                    unescape(span.text(), &span)?;
                    return Ok(Token(TokenKind::Template(kind), span));
                }
                '\\' => {
                    self.bump();
                    self.bump();
                }
                '\x00' if pos >= self.source.contents().len() => {
                    return Err(self
                        .source
                        .error(line, col, "unterminated template literal"));
                }
                _ => self.bump(),
            }
        }
    }

    fn skip_ws(&mut self) -> Result<()> {
        loop {
            match self.peek().1 {
                ' ' | '\t' | '\r' | '\n' | '\u{feff}' | '\u{a0}' => self.bump(),
                '/' if self.peekahead(1).1 == '/' => loop {
                    match self.peek() {
                        (_, '\n') => break,
                        (pos, '\x00') if pos >= self.source.contents().len() => break,
                        _ => self.bump(),
                    }
                },
                '/' if self.peekahead(1).1 == '*' => {
                    let (line, col) = (self.line, self.col);
                    self.bump();
                    self.bump();
                    loop {
                        match self.peek() {
                            (_, '*') if self.peekahead(1).1 == '/' => {
                                self.bump();
                                self.bump();
                                break;
                            }
                            (pos, '\x00') if pos >= self.source.contents().len() => {
                                return Err(self.source.error(line, col, "unterminated comment"));
                            }
                            _ => self.bump(),
                        }
                    }
                }
                _ => break,
            }
        }
        Ok(())
    }

    fn read_symbol(&mut self) -> Result<Token> {
        let (start, chr) = self.peek();
        let (line, col) = (self.line, self.col);
        let rest = &self.source.contents()[start..];

        // `?.` followed by a digit is a conditional followed by a number.
        let is_optional_chain = rest.starts_with("?.")
            && !rest[2..].starts_with(|c: char| c.is_ascii_digit());

        let len = SYMBOLS
            .iter()
            .find(|s| rest.starts_with(*s) && (**s != "?." || is_optional_chain))
            .map(|s| s.len())
            .or_else(|| SINGLE_SYMBOLS.contains(&chr).then_some(1))
            .ok_or_else(|| self.source.error(line, col, "invalid character"))?;

        let count = rest[..len].chars().count();
        for _ in 0..count {
            self.bump();
        }
        Ok(Token(TokenKind::Symbol, self.span(line, col, start, start + len)))
    }

    pub fn next_token(&mut self) -> Result<Token> {
        self.skip_ws()?;

        let (start, chr) = self.peek();
        let (line, col) = (self.line, self.col);

        match chr {
            '\x00' if start >= self.source.contents().len() => {
                if !self.templates.is_empty() {
                    return Err(self.source.error(line, col, "unterminated template literal"));
                }
                Ok(Token(TokenKind::Eof, self.span(line, col, start, start)))
            }
            '"' | '\'' => self.read_string(chr),
            '`' => {
                self.bump();
                self.read_template_chunk(true)
            }
            '{' => {
                self.braces += 1;
                self.read_symbol()
            }
            '}' if self.templates.last() == Some(&self.braces) => {
                self.templates.pop();
                self.bump();
                self.read_template_chunk(false)
            }
            '}' => {
                self.braces = self.braces.saturating_sub(1);
                self.read_symbol()
            }
            '.' if self.peekahead(1).1.is_ascii_digit() => self.read_number(),
            _ if chr.is_ascii_digit() => self.read_number(),
            _ if chr.is_alphabetic() || chr == '_' || chr == '$' => Ok(self.read_ident()),
            _ => self.read_symbol(),
        }
    }
}

/// Decode the escape sequences of a string or template chunk.
pub fn unescape(raw: &str, span: &Span) -> Result<String> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('b') => out.push('\u{8}'),
            Some('f') => out.push('\u{c}'),
            Some('v') => out.push('\u{b}'),
            Some('0') if !chars.peek().is_some_and(|c| c.is_ascii_digit()) => out.push('\0'),
            Some('x') => {
                let hex: String = chars.by_ref().take(2).collect();
                let code = u32::from_str_radix(&hex, 16)
                    .map_err(|_| span.error("invalid hex escape sequence"))?;
                out.push(char::from_u32(code).ok_or_else(|| span.error("invalid escape"))?);
            }
            Some('u') => {
                let hex: String = if chars.peek() == Some(&'{') {
                    chars.next();
                    let h: String = chars.by_ref().take_while(|c| *c != '}').collect();
                    h
                } else {
                    chars.by_ref().take(4).collect()
                };
                let code = u32::from_str_radix(&hex, 16)
                    .map_err(|_| span.error("invalid unicode escape sequence"))?;
                out.push(
                    char::from_u32(code)
                        .ok_or_else(|| span.error("invalid unicode escape sequence"))?,
                );
            }
            // Line continuation.
            Some('\n') => (),
            Some('\r') => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
            }
            Some(c) if c.is_ascii_digit() => {
                return Err(span.error("octal escape sequences are not allowed"));
            }
            Some(c) => out.push(c),
            None => return Err(span.error("invalid escape sequence")),
        }
    }
    Ok(out)
}
