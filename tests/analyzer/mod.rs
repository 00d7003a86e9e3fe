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
    expression: String,
    #[serde(default)]
    resources: BTreeMap<String, String>,
    #[serde(default)]
    bindings: BTreeMap<String, Value>,
    options: Option<ConversionOptions>,
    kind: Option<ExpressionKind>,
    cel: Option<String>,
    #[serde(default)]
    contains: Vec<String>,
    #[serde(default)]
    excludes: Vec<String>,
    dependencies: Option<Vec<String>>,
    error: Option<String>,
    warnings: Option<usize>,
    deferred: Option<String>,
    well_typed: Option<bool>,
}

#[derive(Deserialize, Debug)]
struct YamlTest {
    cases: Vec<Case>,
}

fn context_for(case: &Case) -> AnalysisContext {
    let mut ctx = AnalysisContext::new();
    if let Some(options) = &case.options {
        ctx = ctx.with_options(options.clone());
    }
    if let Some(kind) = case.kind {
        ctx = ctx.with_expression_kind(kind);
    }
    for (id, kind) in &case.resources {
        ctx = ctx.with_resource(id, kind);
    }
    for (name, value) in &case.bindings {
        ctx = ctx.with_binding(name, value.clone());
    }
    ctx
}

fn check_case(case: &Case) -> Result<()> {
    let result = analyze(&case.expression, &context_for(case));

    if let Some(expected) = &case.error {
        if result.valid {
            bail!("expected failure, got `{:?}`", result.expression());
        }
        assert!(result.cel_fragment.is_none());
        assert!(result.dependencies.is_empty());
        let message = result.errors[0].to_string();
        if !message.contains(expected.as_str()) {
            bail!("error `{message}` does not contain `{expected}`");
        }
        return Ok(());
    }

    if !result.valid {
        bail!("conversion failed: {:?}", result.errors);
    }

    if let Some(expected) = &case.deferred {
        assert!(result.cel_fragment.is_none());
        match &result.deferred_reference {
            Some(r) => assert_eq!(&r.to_string(), expected),
            None => bail!("expected deferred reference `{expected}`"),
        }
    } else {
        let cel = result.expression().unwrap_or_default();
        if let Some(expected) = &case.cel {
            assert_eq!(cel, expected.as_str());
        }
        for c in &case.contains {
            assert!(cel.contains(c.as_str()), "`{cel}` does not contain `{c}`");
        }
        for c in &case.excludes {
            assert!(!cel.contains(c.as_str()), "`{cel}` contains `{c}`");
        }
        if let Some(expected) = case.well_typed {
            let typed = infer_type(&CelFragment::new(cel), &context_for(case));
            assert_eq!(typed.success, expected, "type errors: {:?}", typed.errors);
        }
    }

    if let Some(expected) = &case.dependencies {
        let actual: Vec<String> = result.dependencies.iter().map(|d| d.to_string()).collect();
        assert_eq!(&actual, expected);
        assert_eq!(result.requires_conversion, !expected.is_empty());
    }
    if let Some(n) = case.warnings {
        assert_eq!(result.warnings.len(), n, "warnings: {:?}", result.warnings);
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

#[test_resources("tests/analyzer/cases/*.yaml")]
fn run(path: &str) {
    yaml_test(path).unwrap()
}

#[test]
fn idempotent_on_cel_fragments() {
    let ctx = AnalysisContext::new();
    let fragment = CelFragment::new("deployment.status.readyReplicas > 0");
    let result = Analyzer::new(&ctx).analyze_value(&Value::Cel(fragment.clone()));
    assert!(result.valid);
    assert!(!result.requires_conversion);
    assert!(result.dependencies.is_empty());
    assert_eq!(result.cel_fragment, Some(fragment));
}

#[test]
fn static_expressions_need_no_conversion() {
    let result = analyze("1 + 2", &AnalysisContext::new());
    assert!(result.valid);
    assert!(!result.requires_conversion);
    assert_eq!(result.expression(), Some("1 + 2"));
}

#[test]
fn source_map_covers_subexpressions() {
    let ctx = AnalysisContext::new().with_resource("deployment", "Deployment");
    let result = analyze("deployment.status.readyReplicas > 0", &ctx);
    assert!(result.valid);

    let entry = result
        .source_map
        .lookup("deployment.status.readyReplicas")
        .expect("entry for the reference");
    assert_eq!(entry.original_expression, "deployment.status.readyReplicas");
    assert_eq!(entry.context, MappingContext::Reference);
    assert_eq!(entry.source_location.column, 1);

    let top = result.source_map.lookup("deployment.status.readyReplicas > 0");
    assert_eq!(top.map(|e| e.context), Some(MappingContext::Binary));
}

#[test]
fn source_map_can_be_disabled() {
    let options = ConversionOptions {
        include_source_map: false,
        ..Default::default()
    };
    let ctx = AnalysisContext::new().with_options(options);
    let result = analyze("schema.spec.name", &ctx);
    assert!(result.valid);
    assert!(result.source_map.is_empty());
}

#[test]
fn value_trees_convert_to_cel_literals() -> Result<()> {
    let value = Value::from_json_str(
        r#"{"name": {"__reference": {"resourceId": "web", "fieldPath": "metadata.name"}}, "port": 80}"#,
    )?;
    let ctx = AnalysisContext::new().with_resource("web", "Deployment");
    let result = Analyzer::new(&ctx).analyze_value(&value);
    assert!(result.valid);
    assert_eq!(
        result.expression(),
        Some(r#"{"name": web.metadata.name, "port": 80}"#)
    );
    assert_eq!(result.dependencies.len(), 1);
    Ok(())
}

#[test]
fn status_builder_fields() -> Result<()> {
    let ctx = AnalysisContext::new().with_resource("deployment", "Deployment");
    let fields = Analyzer::new(&ctx).analyze_status_builder(
        "(spec, res) => ({ ready: res.deployment.status.readyReplicas > 0, endpoint: { host: `${spec.spec.name}.svc` }, replicas: 3 })",
    )?;

    let keys: Vec<&str> = fields.keys().map(|k| k.as_str()).collect();
    assert_eq!(keys, ["ready", "endpoint.host", "replicas"]);
    assert_eq!(
        fields["ready"].expression(),
        Some("deployment.status.readyReplicas > 0")
    );
    assert_eq!(
        fields["endpoint.host"].expression(),
        Some(r#"schema.spec.name + ".svc""#)
    );
    assert!(!fields["replicas"].requires_conversion);
    Ok(())
}

#[test]
fn status_builder_rejects_non_objects() {
    let ctx = AnalysisContext::new();
    let err = Analyzer::new(&ctx).analyze_status_builder("(schema) => schema.spec.name");
    assert!(matches!(err, Err(ConversionError::UnsupportedSyntax { .. })));
}

#[test]
fn errors_carry_location() {
    let result = analyze("schema.spec.count++", &AnalysisContext::new());
    assert!(!result.valid);
    let error = &result.errors[0];
    assert!(error.is_unsupported());
    assert_eq!(error.original_expression(), Some("schema.spec.count++"));
    assert_eq!(error.source_location().map(|l| l.line), Some(1));
}
