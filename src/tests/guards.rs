// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::context::NullSafety;
use crate::emitter::{format_cel_number, null_safe_reference, reference_guards};
use crate::marker::Reference;

use anyhow::Result;

#[test]
fn has_guards() -> Result<()> {
    let r = Reference::resource("web", "status.loadBalancer.ingress[0].ip")?;
    assert_eq!(
        reference_guards(&r, NullSafety::HasGuards),
        [
            "has(web.status)",
            "has(web.status.loadBalancer)",
            "has(web.status.loadBalancer.ingress)",
            "size(web.status.loadBalancer.ingress) > 0",
            "has(web.status.loadBalancer.ingress[0].ip)",
        ]
    );
    Ok(())
}

#[test]
fn key_guards() -> Result<()> {
    let r = Reference::resource("web", r#"metadata.labels["app"]"#)?;
    assert_eq!(
        null_safe_reference(&r, NullSafety::HasGuards),
        r#"has(web.metadata) && has(web.metadata.labels) && "app" in web.metadata.labels && web.metadata.labels["app"]"#
    );
    Ok(())
}

#[test]
fn schema_roots_are_not_guarded() -> Result<()> {
    let r = Reference::schema("spec.name")?;
    assert_eq!(
        null_safe_reference(&r, NullSafety::HasGuards),
        "has(schema.spec.name) && schema.spec.name"
    );
    assert_eq!(null_safe_reference(&r, NullSafety::KroOptional), "schema.spec.?name");
    assert_eq!(null_safe_reference(&r, NullSafety::NullCheck), "schema.spec.name");
    Ok(())
}

#[test]
fn null_checks() -> Result<()> {
    let r = Reference::resource("db", "status.endpoint.host")?;
    assert_eq!(
        null_safe_reference(&r, NullSafety::NullCheck),
        "db.status != null && db.status.endpoint != null && db.status.endpoint.host"
    );
    assert_eq!(
        null_safe_reference(&r, NullSafety::KroOptional),
        "db.?status.?endpoint.?host"
    );
    Ok(())
}

#[test]
fn numbers() {
    assert_eq!(format_cel_number(3.0), "3");
    assert_eq!(format_cel_number(-0.5), "-0.5");
    assert_eq!(format_cel_number(1e21), "1e21");
}
