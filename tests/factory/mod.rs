// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::BTreeMap;
use std::env;

use anyhow::{bail, Result};
use kro_cel::*;
use serde::Deserialize;
use test_generator::test_resources;

#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
struct Case {
    note: String,
    value: Option<Value>,
    expression: Option<String>,
    #[serde(default)]
    resources: BTreeMap<String, String>,
    options: Option<ConversionOptions>,
    expected: Value,
    #[serde(default)]
    converted: usize,
    #[serde(default)]
    preserved: usize,
}

#[derive(Deserialize, Debug)]
struct YamlTest {
    cases: Vec<Case>,
}

fn check_case(case: &Case) -> Result<()> {
    let mut ctx = AnalysisContext::new();
    if let Some(options) = &case.options {
        ctx = ctx.with_options(options.clone());
    }
    for (id, kind) in &case.resources {
        ctx = ctx.with_resource(id, kind);
    }

    let result = match (&case.value, &case.expression) {
        (Some(value), None) => dispatch(value, &ctx),
        (None, Some(expression)) => dispatch_expression(expression, &ctx),
        _ => bail!("a case needs exactly one of `value` and `expression`"),
    };
    if !result.is_ok() {
        bail!("conversion failed: {:?}", result.errors);
    }
    if result.value != case.expected {
        bail!(
            "\nexpected: {}\nactual:   {}",
            case.expected.to_json_str()?,
            result.value.to_json_str()?
        );
    }
    assert_eq!(result.references_converted, case.converted, "converted");
    assert_eq!(result.references_preserved, case.preserved, "preserved");
    assert_eq!(result.was_converted, case.converted > 0);
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

#[test_resources("tests/factory/cases/*.yaml")]
fn run(path: &str) {
    yaml_test(path).unwrap()
}

#[test]
fn strategies() -> Result<()> {
    let ctx = AnalysisContext::new().with_resource("web", "Deployment");
    let internal = Reference::resource("web", "status.readyReplicas")?;
    let external = Reference::resource("database", "status.endpoint")?;
    let schema = Reference::schema("spec.name")?;

    assert_eq!(KroStrategy.kind(), FactoryKind::Kro);
    assert!(KroStrategy.should_convert(&external, &ctx));

    assert_eq!(DirectStrategy.kind(), FactoryKind::Direct);
    assert!(DirectStrategy.should_convert(&internal, &ctx));
    assert!(DirectStrategy.should_convert(&schema, &ctx));
    assert!(!DirectStrategy.should_convert(&external, &ctx));

    let strict = ctx.with_options(ConversionOptions {
        direct_convert_internal: false,
        ..Default::default()
    });
    assert!(!DirectStrategy.should_convert(&internal, &strict));
    Ok(())
}

#[test]
fn dependencies_count_as_internal() -> Result<()> {
    let ctx = AnalysisContext::new()
        .with_dependencies(vec![Reference::resource("cache", "status.host")?]);
    assert!(DirectStrategy.should_convert(&Reference::resource("cache", "status.port")?, &ctx));
    Ok(())
}

#[test]
fn unchanged_containers_are_shared() -> Result<()> {
    let inner = Value::from_json_str(r#"{"a": 1}"#)?;
    let root = Value::new_object();
    root.set("static", inner.clone())?;
    root.set("ref", Value::from(Reference::schema("spec.name")?))?;

    let result = dispatch(&root, &AnalysisContext::new());
    let Some(Value::Object(out)) = result.value.get("static") else {
        bail!("static field missing");
    };
    let Value::Object(original) = &inner else {
        bail!("not an object");
    };
    assert!(std::rc::Rc::ptr_eq(&out, original));
    Ok(())
}

#[test]
fn cyclic_values_terminate() -> Result<()> {
    let root = Value::new_object();
    root.set("ref", Value::from(Reference::schema("spec.name")?))?;
    root.set("self", root.clone())?;

    let result = dispatch(&root, &AnalysisContext::new());
    assert!(result.is_ok());
    assert_eq!(result.references_converted, 1);
    assert!(result.value.get("ref").is_some_and(|v| v.as_cel().is_some()));
    Ok(())
}

#[test]
fn parse_failures_are_reported() {
    let result = dispatch_expression("a +", &AnalysisContext::new());
    assert!(!result.is_ok());
    assert!(!result.was_converted);
    assert_eq!(result.value, Value::from("a +"));
}

#[test]
fn converter_uses_configured_factory() -> Result<()> {
    let mut converter = Converter::new();
    converter.add_resource("web", "Deployment");
    converter.set_factory(FactoryKind::Direct);

    let value = Value::from_json_str(
        r#"[{"__reference": {"resourceId": "web", "fieldPath": "metadata.name"}},
            {"__reference": {"resourceId": "database", "fieldPath": "status.endpoint"}}]"#,
    )?;
    let result = converter.convert_value(&value);
    assert_eq!(result.references_converted, 1);
    assert_eq!(result.references_preserved, 1);
    assert!(result.value.at(0).is_some_and(|v| v.as_cel().is_some()));
    assert!(result.value.at(1).is_some_and(|v| v.is_reference()));
    Ok(())
}
