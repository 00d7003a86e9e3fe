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
    cel: String,
    #[serde(default)]
    resources: BTreeMap<String, String>,
    #[serde(rename = "type")]
    result_type: Option<String>,
    #[serde(default = "success_default")]
    success: bool,
    errors: Option<usize>,
    nullable: Option<bool>,
    has_guards: Option<bool>,
    optional_chaining: Option<bool>,
    references: Option<Vec<String>>,
    confidence: Option<f64>,
}

fn success_default() -> bool {
    true
}

#[derive(Deserialize, Debug)]
struct YamlTest {
    cases: Vec<Case>,
}

fn check_case(case: &Case) -> Result<()> {
    let mut ctx = AnalysisContext::new();
    for (id, kind) in &case.resources {
        ctx = ctx.with_resource(id, kind);
    }
    let result = infer_type(&CelFragment::new(case.cel.as_str()), &ctx);

    if result.success != case.success {
        bail!("success is {}; errors: {:?}", result.success, result.errors);
    }
    if let Some(expected) = &case.result_type {
        assert_eq!(&result.result_type.to_string(), expected);
    }
    if let Some(n) = case.errors {
        assert_eq!(result.errors.len(), n, "errors: {:?}", result.errors);
    }
    if let Some(nullable) = case.nullable {
        assert_eq!(result.metadata.nullable, nullable, "nullable");
    }
    if let Some(has_guards) = case.has_guards {
        assert_eq!(result.metadata.has_guards, has_guards, "has guards");
    }
    if let Some(optional) = case.optional_chaining {
        assert_eq!(result.metadata.uses_optional_chaining, optional, "optional chaining");
    }
    if let Some(references) = &case.references {
        assert_eq!(&result.metadata.references, references);
    }
    if let Some(confidence) = case.confidence {
        assert!(
            (result.confidence - confidence).abs() < 1e-9,
            "confidence {}",
            result.confidence
        );
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

#[test_resources("tests/typing/cases/*.yaml")]
fn run(path: &str) {
    yaml_test(path).unwrap()
}

#[test]
fn declared_type_refines_dyn() {
    let ctx = AnalysisContext::new();
    let result = infer_type(&CelFragment::typed("schema.spec.port", CelType::Number), &ctx);
    assert_eq!(result.result_type, CelType::Number);
    assert!(result.warnings.is_empty());
}

#[test]
fn declared_type_mismatch_warns() {
    let ctx = AnalysisContext::new().with_resource("web", "Deployment");
    let result = infer_type(
        &CelFragment::typed("web.metadata.name", CelType::Number),
        &ctx,
    );
    assert!(result.success);
    assert_eq!(result.warnings.len(), 1);
    assert_eq!(result.result_type, CelType::String);
}

#[test]
fn unknown_fields_of_known_kinds_warn() {
    let ctx = AnalysisContext::new().with_resource("cm", "ConfigMap");
    let result = infer_type(&CelFragment::new("cm.spec.replicas"), &ctx);
    assert!(result.success);
    assert_eq!(result.result_type, CelType::Dyn);
    assert_eq!(result.warnings.len(), 1);
}

#[test]
fn custom_resource_shapes() {
    let mut converter = Converter::new();
    converter.add_resource_shape(
        ResourceShape::new("Database")
            .field("status", CelType::map(CelType::Dyn), true)
            .field("status.endpoint", CelType::String, true)
            .field("status.port", CelType::Number, true),
    );
    converter.add_resource("db", "Database");

    let info = converter.infer_type("db.status.endpoint + \":\" + string(db.status.port)");
    assert!(info.success);
    assert_eq!(info.result_type, CelType::String);
    assert!(converter.context().catalog().kinds().any(|k| k == "Deployment"));
}

#[test]
fn types_serialize_tagged() -> Result<()> {
    let t = CelType::list(CelType::map(CelType::String));
    let json = serde_json::to_string(&t)?;
    assert_eq!(
        json,
        r#"{"type":"list","item":{"type":"map","value":{"type":"string"}}}"#
    );
    let back: CelType = serde_json::from_str(&json)?;
    assert_eq!(back, t);
    Ok(())
}

#[test]
fn unions() {
    let u = CelType::union(CelType::String, CelType::Null);
    assert!(u.is_nullable());
    assert_eq!(u.non_null(), CelType::String);
    assert_eq!(CelType::union(CelType::Number, CelType::Number), CelType::Number);
    assert!(CelType::Dyn.accepts(&CelType::Bool));
    assert!(!CelType::Bool.accepts(&CelType::String));
    assert!(CelType::list(CelType::Dyn).accepts(&CelType::list(CelType::Number)));
}
