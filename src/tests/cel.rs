// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::cel::*;

use anyhow::Result;

#[test]
fn tokens() -> Result<()> {
    let toks = tokenize(r#"a.?b[?0] != "x" && 2u < 3.5"#)?;
    let kinds: Vec<CelTokenKind> = toks.iter().map(|t| t.kind).collect();
    assert_eq!(
        kinds,
        [
            CelTokenKind::Ident,
            CelTokenKind::Symbol,
            CelTokenKind::Ident,
            CelTokenKind::Symbol,
            CelTokenKind::Int,
            CelTokenKind::Symbol,
            CelTokenKind::Symbol,
            CelTokenKind::String,
            CelTokenKind::Symbol,
            CelTokenKind::Uint,
            CelTokenKind::Symbol,
            CelTokenKind::Double,
            CelTokenKind::Eof,
        ]
    );
    Ok(())
}

#[test]
fn precedence() -> Result<()> {
    let e = parse("a || b && !c")?;
    let CelExpr::Binary { op, rhs, .. } = e else {
        panic!("expected binary");
    };
    assert_eq!(op, "||");
    assert!(matches!(*rhs, CelExpr::Binary { ref op, .. } if op == "&&"));
    Ok(())
}

#[test]
fn access_paths() -> Result<()> {
    let e = parse(r#"web.?status.ingress[0].labels["app"]"#)?;
    assert_eq!(
        e.select_path().as_deref(),
        Some(r#"web.status.ingress[0].labels["app"]"#)
    );
    assert_eq!(e.root_ident(), Some("web"));
    assert!(e.uses_optional_access());

    let e = parse("xs[i].name")?;
    assert_eq!(e.select_path(), None);
    assert!(!e.uses_optional_access());
    Ok(())
}

#[test]
fn calls_and_literals() -> Result<()> {
    let e = parse(r#"xs.exists(x, x in {"a": [1, null]})"#)?;
    let CelExpr::Call {
        target,
        function,
        args,
    } = e
    else {
        panic!("expected call");
    };
    assert_eq!(function, "exists");
    assert_eq!(target.as_deref(), Some(&CelExpr::Ident("xs".to_string())));
    assert_eq!(args.len(), 2);
    Ok(())
}

#[test]
fn malformed() {
    for text in ["a.", "(a", "a ? b", "{1: }", "\"open"] {
        assert!(parse(text).is_err(), "{text}");
    }
}
