// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::error::ConversionError;
use crate::factory::{settle, ConversionResult};
use crate::value::Value;

use anyhow::Result;

fn partial_pass() -> ConversionResult {
    let mut partial = ConversionResult::unchanged(Value::Null);
    partial.was_converted = true;
    partial.references_converted = 2;
    partial.expressions_generated = 2;
    partial.references_preserved = 1;
    partial
        .warnings
        .push(ConversionError::internal("field type unknown", "web.status.x"));
    partial
}

#[test]
fn failed_pass_reports_nothing_converted() -> Result<()> {
    let input = Value::from_json_str(
        r#"{"a": {"__reference": {"resourceId": "web", "fieldPath": "status.x"}}}"#,
    )?;
    let error = ConversionError::internal("cyclic value cannot be converted", "");

    let result = settle(&input, Err(error.clone()), partial_pass());
    assert_eq!(result.value, input);
    assert!(!result.was_converted);
    assert_eq!(result.references_converted, 0);
    assert_eq!(result.expressions_generated, 0);
    assert_eq!(result.references_preserved, 0);
    assert!(result.warnings.is_empty());
    assert_eq!(result.errors, [error]);
    Ok(())
}

#[test]
fn successful_pass_keeps_counts() -> Result<()> {
    let input = Value::from_json_str(r#"{"a": 1}"#)?;
    let output = Value::from_json_str(r#"{"a": 2}"#)?;

    let result = settle(&input, Ok(output.clone()), partial_pass());
    assert_eq!(result.value, output);
    assert!(result.was_converted);
    assert_eq!(result.references_converted, 2);
    assert_eq!(result.expressions_generated, 2);
    assert_eq!(result.warnings.len(), 1);
    assert!(result.is_ok());
    Ok(())
}
