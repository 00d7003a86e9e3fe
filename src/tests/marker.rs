// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::marker::*;
use crate::typing::CelType;
use crate::value::Value;

use anyhow::Result;

#[test]
fn paths_split_and_join() -> Result<()> {
    let segments = split_path(r#"spec.ports[0]["app.kubernetes.io/name"].name"#)?;
    assert_eq!(
        segments,
        [
            PathSegment::Field("spec".to_string()),
            PathSegment::Field("ports".to_string()),
            PathSegment::Index(0),
            PathSegment::Key("app.kubernetes.io/name".to_string()),
            PathSegment::Field("name".to_string()),
        ]
    );
    assert_eq!(
        join_path(&segments),
        r#"spec.ports[0]["app.kubernetes.io/name"].name"#
    );

    for bad in ["spec..name", "spec.", "spec[", "spec[x]", ".spec"] {
        assert!(split_path(bad).is_err(), "{bad}");
    }
    Ok(())
}

#[test]
fn quoting() {
    assert_eq!(quote_cel_string("a\"b\\c\n"), r#""a\"b\\c\n""#);
    assert_eq!(quote_cel_string("\u{1}"), r#""\u0001""#);
    assert!(is_identifier("_ready2"));
    assert!(!is_identifier("2ready"));
    assert!(!is_identifier("app-name"));
}

#[test]
fn references() -> Result<()> {
    let r = Reference::resource("web", "metadata.labels[\"app\"]")?;
    assert_eq!(r.to_string(), r#"web.metadata.labels["app"]"#);
    assert_eq!(r.top_level_field(), "metadata");
    assert!(!r.has_array_index());

    let s = Reference::schema("spec.ports[1]")?;
    assert!(s.is_schema());
    assert_eq!(s.resource_id(), SCHEMA_RESOURCE_ID);
    assert_eq!(s.to_string(), "schema.spec.ports[1]");
    assert!(s.has_array_index());

    let joined = s.join(&[PathSegment::Field("port".to_string())])?;
    assert_eq!(joined.field_path(), "spec.ports[1].port");

    assert!(Reference::resource("", "status").is_err());
    assert!(Reference::resource("web", "").is_err());
    assert!(Reference::resource(SCHEMA_RESOURCE_ID, "spec").is_err());
    assert!(Reference::resource("web", "status.__cel").is_err());
    Ok(())
}

#[test]
fn branded_values() -> Result<()> {
    let json = r#"{"a":{"__reference":{"resourceId":"__schema__","fieldPath":"spec.name"}},"b":{"__cel":{"expression":"1 + 1","type":{"type":"number"}}}}"#;
    let value = Value::from_json_str(json)?;

    let a = value.get("a").and_then(|v| v.as_reference().cloned());
    assert_eq!(a.map(|r| r.kind()), Some(RefKind::Schema));

    let b = value.get("b").and_then(|v| v.as_cel().cloned());
    assert_eq!(b, Some(CelFragment::typed("1 + 1", CelType::Number)));

    // Schema references re-serialize with their kind.
    let out = serde_json::to_string(&value)?;
    assert!(out.contains(r#""__reference":{"kind":"schema""#));
    assert_eq!(Value::from_json_str(&out)?, value);
    assert_eq!(Value::from_json_str(&value.to_json_str()?)?, value);
    Ok(())
}

#[test]
fn brand_must_be_alone() {
    let json = r#"{"__reference":{"resourceId":"web","fieldPath":"status"},"x":1}"#;
    assert!(Value::from_json_str(json).is_err());
    let json = r#"{"x":1,"__cel":{"expression":"true"}}"#;
    assert!(Value::from_json_str(json).is_err());
    let json = r#"{"x":1,"y":{"z":2,"__reference":{"resourceId":"web","fieldPath":"status"}}}"#;
    assert!(Value::from_json_str(json).is_err());
    // Nested markers are fine on their own.
    let json = r#"{"x":1,"y":{"__cel":{"expression":"true"}}}"#;
    let value = Value::from_json_str(json).expect("nested marker");
    assert!(value.get("y").and_then(|v| v.as_cel().cloned()).is_some());
}
