// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use anyhow::Result;
use kro_cel::*;

fn manifest() -> Result<Value> {
    Value::from_json_str(
        r#"{
            "metadata": {"name": {"__reference": {"resourceId": "__schema__", "fieldPath": "spec.name"}}},
            "spec": {
                "replicas": 3,
                "env": [
                    {"name": "A", "value": "static"},
                    {"name": "DB", "value": {"__reference": {"resourceId": "database", "fieldPath": "status.endpoint"}}}
                ],
                "ready": {"__cel": {"expression": "deployment.status.readyReplicas > 0"}}
            }
        }"#,
    )
}

#[test]
fn finds_markers_with_paths() -> Result<()> {
    let result = ReferenceDetector::default().detect(&manifest()?);
    assert!(result.has_references);

    let paths: Vec<&str> = result.references.iter().map(|r| r.path.as_str()).collect();
    assert_eq!(paths, ["metadata.name", "spec.env[1].value"]);

    let first = &result.references[0];
    assert!(first.reference.is_schema());
    assert_eq!(first.source, Some(ReferenceSource::Schema));
    assert_eq!(first.resource_id, None);
    assert_eq!(first.nesting_depth, 2);
    assert!(first.is_nested);

    let second = &result.references[1];
    assert_eq!(second.resource_id.as_deref(), Some("database"));
    assert_eq!(second.nesting_depth, 4);
    Ok(())
}

#[test]
fn statistics() -> Result<()> {
    let result = ReferenceDetector::default().detect(&manifest()?);
    let stats = &result.stats;
    assert_eq!(stats.total_references, 2);
    assert_eq!(stats.schema_references, 1);
    assert_eq!(stats.resource_references, 1);
    assert_eq!(stats.cel_fragments, 1);
    assert_eq!(stats.max_nesting_depth, 4);
    assert_eq!(stats.resource_ids.iter().collect::<Vec<_>>(), ["database"]);
    assert!(result.metrics.is_none());
    Ok(())
}

#[test]
fn top_level_marker() -> Result<()> {
    let value = Value::from(Reference::resource("web", "status.ready")?);
    let result = ReferenceDetector::default().detect(&value);
    assert_eq!(result.references.len(), 1);
    assert_eq!(result.references[0].path, "");
    assert!(!result.references[0].is_nested);
    Ok(())
}

#[test]
fn scalars_have_no_references() {
    for value in [Value::Null, Value::from(1), Value::from("x"), Value::from(true)] {
        let result = ReferenceDetector::default().detect(&value);
        assert!(!result.has_references);
        assert!(!contains_references(&value, 10));
    }
}

#[test]
fn source_tracking_can_be_disabled() -> Result<()> {
    let detector = ReferenceDetector::new(DetectionOptions {
        track_source: false,
        ..DetectionOptions::default()
    });
    let result = detector.detect(&manifest()?);
    assert!(result.references.iter().all(|r| r.source.is_none()));
    assert!(result.references.iter().all(|r| r.resource_id.is_none()));
    Ok(())
}

#[test]
fn depth_limit_truncates() -> Result<()> {
    let value = Value::from_json_str(
        r#"{"a": {"b": {"c": {"__reference": {"resourceId": "x", "fieldPath": "status.y"}}}}}"#,
    )?;
    let shallow = ReferenceDetector::new(DetectionOptions {
        max_depth: 2,
        track_metrics: true,
        ..DetectionOptions::default()
    });
    let result = shallow.detect(&value);
    assert!(!result.has_references);
    assert_eq!(result.metrics.map(|m| m.truncated_branches), Some(1));

    assert!(ReferenceDetector::with_max_depth(3).detect(&value).has_references);
    assert!(!contains_references(&value, 2));
    assert!(contains_references(&value, 3));
    Ok(())
}

#[test]
fn cycles_terminate() -> Result<()> {
    let root = Value::new_object();
    let child = Value::new_object();
    child.set("ref", Value::from(Reference::schema("spec.name")?))?;
    child.set("parent", root.clone())?;
    root.set("child", child)?;

    let detector = ReferenceDetector::new(DetectionOptions {
        track_metrics: true,
        ..DetectionOptions::default()
    });
    let result = detector.detect(&root);
    assert_eq!(result.references.len(), 1);
    assert_eq!(result.references[0].path, "child.ref");
    assert_eq!(result.metrics.map(|m| m.cycles_skipped), Some(1));

    assert!(contains_references(&root, 10));
    assert_eq!(extract_references(&root, 10).len(), 1);
    Ok(())
}

#[test]
fn shared_containers_are_visited_each_time() -> Result<()> {
    let shared = Value::new_array();
    shared.push(Value::from(Reference::resource("db", "status.host")?))?;
    let root = Value::new_object();
    root.set("a", shared.clone())?;
    root.set("b", shared)?;

    let result = ReferenceDetector::default().detect(&root);
    let paths: Vec<&str> = result.references.iter().map(|r| r.path.as_str()).collect();
    assert_eq!(paths, ["a[0]", "b[0]"]);
    Ok(())
}

#[test]
fn extraction_preserves_walk_order() -> Result<()> {
    let refs = extract_references(&manifest()?, 10);
    let rendered: Vec<String> = refs.iter().map(|r| r.to_string()).collect();
    assert_eq!(rendered, ["schema.spec.name", "database.status.endpoint"]);
    Ok(())
}
