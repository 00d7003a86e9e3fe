// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::lexer::*;

use anyhow::Result;

fn tokens(text: &str) -> Result<Vec<(TokenKind, String)>> {
    let source = Source::from_expression(text)?;
    let mut lexer = Lexer::new(&source);
    let mut out = vec![];
    loop {
        let tok = lexer.next_token()?;
        let done = tok.0 == TokenKind::Eof;
        out.push((tok.0, tok.1.text().to_string()));
        if done {
            return Ok(out);
        }
    }
}

#[test]
fn greedy_symbols() -> Result<()> {
    let toks = tokens("a === b ?? c?.d")?;
    let texts: Vec<&str> = toks.iter().map(|(_, t)| t.as_str()).collect();
    assert_eq!(texts, ["a", "===", "b", "??", "c", "?.", "d", ""]);
    assert_eq!(toks[1].0, TokenKind::Symbol);
    Ok(())
}

#[test]
fn template_chunks() -> Result<()> {
    let toks = tokens("`a${x}b${ {k: 1}.k }c`")?;
    let kinds: Vec<TokenKind> = toks.iter().map(|(k, _)| *k).collect();
    assert_eq!(
        kinds,
        [
            TokenKind::Template(TemplatePart::Head),
            TokenKind::Ident,
            TokenKind::Template(TemplatePart::Middle),
            TokenKind::Symbol,
            TokenKind::Ident,
            TokenKind::Symbol,
            TokenKind::Number,
            TokenKind::Symbol,
            TokenKind::Symbol,
            TokenKind::Ident,
            TokenKind::Template(TemplatePart::Tail),
            TokenKind::Eof,
        ]
    );
    assert_eq!(toks[0].1, "a");
    assert_eq!(toks[10].1, "c");
    Ok(())
}

#[test]
fn unterminated_template() -> Result<()> {
    assert!(tokens("`a${x").is_err());
    Ok(())
}

#[test]
fn lines_and_columns() -> Result<()> {
    let source = Source::from_expression("a &&\r\n  b")?;
    assert_eq!(source.line(0), "a &&");
    assert_eq!(source.line(1), "  b");

    let mut lexer = Lexer::new(&source);
    lexer.next_token()?;
    lexer.next_token()?;
    let b = lexer.next_token()?;
    assert_eq!((b.1.line, b.1.col), (2, 3));

    let message = b.1.message("error", "boom");
    assert!(message.contains("<expr>:2:3"));
    assert!(message.ends_with("error: boom"));
    Ok(())
}

#[test]
fn escapes() -> Result<()> {
    let source = Source::from_expression("x")?;
    let mut lexer = Lexer::new(&source);
    let span = lexer.next_token()?.1;

    assert_eq!(unescape(r"a\tbA\u{1F600}\x41", &span)?, "a\tbA\u{1F600}A");
    assert!(unescape(r"\07", &span).is_err());
    Ok(())
}
