// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::env;

use anyhow::{bail, Result};
use kro_cel::unstable::*;
use serde::Deserialize;
use test_generator::test_resources;

#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
struct Case {
    note: String,
    expression: String,
    shape: Option<String>,
    error: Option<String>,
    unsupported: Option<bool>,
    location: Option<(u32, u32)>,
}

#[derive(Deserialize, Debug)]
struct YamlTest {
    cases: Vec<Case>,
}

fn check_case(case: &Case) -> Result<()> {
    match (parse_expression(&case.expression), &case.error) {
        (Ok(expr), None) => {
            if let Some(shape) = &case.shape {
                assert_eq!(&format!("{:?}", expr.shape()), shape);
            }
        }
        (Ok(expr), Some(_)) => bail!("expected failure, parsed {:?}", expr.shape()),
        (Err(e), Some(expected)) => {
            let message = e.to_string();
            if !message.contains(expected.as_str()) {
                bail!("error `{message}` does not contain `{expected}`");
            }
            if let Some(unsupported) = case.unsupported {
                assert_eq!(e.is_unsupported(), unsupported);
            }
            if let Some((line, column)) = case.location {
                let loc = e.source_location().expect("error location");
                assert_eq!((loc.line, loc.column), (line, column));
            }
        }
        (Err(e), None) => bail!("parse failed: {e}"),
    }
    Ok(())
}

fn yaml_test_impl(file: &str) -> Result<()> {
    println!("\nrunning {file}");
    let yaml = std::fs::read_to_string(file)?;
    let test: YamlTest = serde_yaml::from_str(&yaml)?;

    for case in &test.cases {
        print!("case {} ", case.note);
        check_case(case)?;
        println!("passed");
    }
    println!("{} cases passed.", test.cases.len());
    Ok(())
}

fn yaml_test(file: &str) -> Result<()> {
    match yaml_test_impl(file) {
        Ok(_) => Ok(()),
        Err(e) => {
            // If Err is returned, it doesn't always get printed by cargo test.
            // Therefore, panic with the error.
            panic!("{}", e);
        }
    }
}

#[test]
#[ignore = "intended for running a single case file"]
fn one_yaml() -> Result<()> {
    let mut file = String::default();
    for a in env::args() {
        if a.ends_with(".yaml") {
            file = a;
            break;
        }
    }

    if file.is_empty() {
        bail!("missing yaml test file");
    }

    yaml_test(file.as_str())
}

#[test_resources("tests/parser/cases/*.yaml")]
fn run(path: &str) {
    yaml_test(path).unwrap()
}

#[test]
fn template_parts() -> Result<()> {
    let expr = parse_expression("`a${x}b${y.z}c`")?;
    let Expr::Template { quasis, exprs, .. } = expr.as_ref() else {
        bail!("expected template, got {:?}", expr.shape());
    };
    assert_eq!(quasis, &["a", "b", "c"]);
    assert_eq!(exprs.len(), 2);
    assert_eq!(exprs[1].span().text(), "y.z");
    Ok(())
}

#[test]
fn optional_links() -> Result<()> {
    let expr = parse_expression("a?.b.c")?;
    assert!(expr.has_optional_link());
    let expr = parse_expression("a.b.c")?;
    assert!(!expr.has_optional_link());
    Ok(())
}

#[test]
fn arrow_parameters() -> Result<()> {
    let expr = parse_expression("(a, b) => a + b")?;
    let Expr::Arrow { params, body, .. } = expr.as_ref() else {
        bail!("expected arrow, got {:?}", expr.shape());
    };
    let names: Vec<&str> = params.iter().map(|p| p.text()).collect();
    assert_eq!(names, ["a", "b"]);
    assert_eq!(body.shape(), ExprShape::Binary);
    Ok(())
}

#[test]
fn object_keys() -> Result<()> {
    let expr = parse_expression(r#"({ name, "app.kubernetes.io/name": x, 1: y })"#)?;
    let Expr::Object { fields, .. } = expr.as_ref() else {
        bail!("expected object, got {:?}", expr.shape());
    };
    let keys: Vec<&str> = fields.iter().map(|(_, k, _)| k.as_str()).collect();
    assert_eq!(keys, ["name", "app.kubernetes.io/name", "1"]);
    assert_eq!(fields[0].2.shape(), ExprShape::Identifier);
    Ok(())
}

#[test]
fn numbers() -> Result<()> {
    for (text, expected) in [("42", 42.0), ("0x1f", 31.0), ("1_000", 1000.0), ("2.5e3", 2500.0)] {
        let expr = parse_expression(text)?;
        let Expr::Number { value, .. } = expr.as_ref() else {
            bail!("expected number for {text}");
        };
        assert_eq!(*value, expected, "{text}");
    }
    Ok(())
}

#[test]
fn string_escapes() -> Result<()> {
    let expr = parse_expression(r#""a\"b\nA""#)?;
    let Expr::String { value, .. } = expr.as_ref() else {
        bail!("expected string");
    };
    assert_eq!(value, "a\"b\nA");
    Ok(())
}

fn nested_parens(depth: usize) -> String {
    format!("{}schema.spec.x{}", "(".repeat(depth), ")".repeat(depth))
}

#[test]
fn moderate_nesting() -> Result<()> {
    parse_expression(&nested_parens(10))?;
    parse_expression(&vec!["schema.spec.x"; 20].join(" + "))?;
    parse_expression(&format!("{}schema.spec.ok", "!".repeat(20)))?;
    Ok(())
}

#[test]
fn deep_nesting_is_rejected() {
    let inputs = [
        nested_parens(48),
        "(".repeat(5000),
        vec!["schema.spec.x"; 5000].join(" + "),
        vec!["schema.spec.x"; 5000].join(" && "),
        format!("{}schema.spec.ok", "!".repeat(5000)),
        format!("schema{}", ".spec".repeat(5000)),
        format!("schema.spec.x{}", "[0]".repeat(5000)),
    ];
    for input in &inputs {
        match parse_expression(input) {
            Ok(_) => panic!("parsed {} bytes of deep nesting", input.len()),
            Err(e) => assert!(
                e.to_string().contains("nesting too deep"),
                "unexpected error: {e}"
            ),
        }
    }
}

#[test]
fn deep_nesting_fails_analysis() {
    let ctx = kro_cel::AnalysisContext::new();
    for input in [nested_parens(5000), vec!["schema.spec.x"; 5000].join(" || ")] {
        let result = kro_cel::analyze(&input, &ctx);
        assert!(!result.valid);
        assert!(result.cel_fragment.is_none());
    }
}

#[test]
fn deep_cel_nesting_is_rejected() {
    let inputs = [
        format!("{}x{}", "(".repeat(5000), ")".repeat(5000)),
        vec!["has(a.b)"; 5000].join(" && "),
        format!("a{}", ".b".repeat(5000)),
        format!("{}true", "!".repeat(5000)),
    ];
    for input in &inputs {
        assert!(parse_cel(input).is_err(), "parsed {} bytes", input.len());
    }
    assert!(parse_cel(&vec!["has(a.b)"; 40].join(" && ")).is_ok());
}
