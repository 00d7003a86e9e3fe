// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::time::Duration;

use anyhow::Result;
use kro_cel::unstable::{assess, hydration_phases, progressive_expression};
use kro_cel::*;

fn resource(id: &str, path: &str) -> Reference {
    Reference::resource(id, path).expect("valid reference")
}

fn schema(path: &str) -> Reference {
    Reference::schema(path).expect("valid reference")
}

#[test]
fn policy() {
    let flagged = |r: &Reference, conservative: bool| assess(r, conservative).potentially_undefined;

    assert!(flagged(&resource("web", "status.readyReplicas"), false));
    assert!(flagged(&resource("web", "status.conditions[0].type"), true));
    assert!(!flagged(&resource("web", "metadata.name"), true));
    assert!(!flagged(&resource("web", "metadata"), true));
    assert!(flagged(&resource("web", "metadata.labels"), false));
    assert!(!flagged(&resource("web", "kind"), true));
    assert!(!flagged(&resource("web", "spec.selector"), true));
    assert!(flagged(&resource("web", "spec.replicas"), false));
    assert!(flagged(&resource("web", "spec.ports[0].port"), false));
    assert!(flagged(&resource("web", "data.key"), true));
    assert!(!flagged(&resource("web", "data.key"), false));

    assert!(!flagged(&schema("spec.name"), true));
    assert!(flagged(&schema("spec.replicas"), true));
    assert!(!flagged(&schema("spec.replicas"), false));
    assert!(flagged(&schema("spec.ports[0]"), false));
}

#[test]
fn status_is_certain() {
    let a = assess(&resource("web", "status.phase"), true);
    assert_eq!(a.confidence, 1.0);
    assert!(a.reason.contains("status"));
}

#[test]
fn analysis_of_expression() -> Result<()> {
    let ctx = AnalysisContext::new().with_resource("web", "Deployment");
    let results = analyze_optionality("web.status.readyReplicas > 0 && web.metadata.name != \"\"", &ctx)?;
    assert_eq!(results.len(), 2);

    assert!(results[0].requires_null_safety);
    assert_eq!(
        results[0].suggested_cel_pattern.as_deref(),
        Some("has(web.status) && has(web.status.readyReplicas) && web.status.readyReplicas")
    );
    assert!(!results[1].requires_null_safety);
    assert_eq!(results[1].suggested_cel_pattern, None);
    Ok(())
}

#[test]
fn suggested_patterns_follow_options() {
    let r = resource("web", "status.loadBalancer.ingress[0].ip");

    let ctx = AnalysisContext::new();
    assert_eq!(
        generate_null_safe_expression(&r, &ctx),
        "has(web.status) && has(web.status.loadBalancer) && has(web.status.loadBalancer.ingress) \
         && size(web.status.loadBalancer.ingress) > 0 && has(web.status.loadBalancer.ingress[0].ip) \
         && web.status.loadBalancer.ingress[0].ip"
    );

    let ctx = AnalysisContext::new().with_options(ConversionOptions {
        generate_has_checks: false,
        use_kro_conditionals: true,
        ..Default::default()
    });
    assert_eq!(
        generate_null_safe_expression(&r, &ctx),
        "web.?status.?loadBalancer.?ingress[?0].?ip"
    );

    let ctx = AnalysisContext::new().with_options(ConversionOptions {
        generate_has_checks: false,
        ..Default::default()
    });
    assert_eq!(
        generate_null_safe_expression(&r, &ctx),
        "web.status != null && web.status.loadBalancer != null \
         && web.status.loadBalancer.ingress != null && web.status.loadBalancer.ingress[0] != null \
         && web.status.loadBalancer.ingress[0].ip"
    );
}

#[test]
fn schema_guards_skip_spec() {
    let ctx = AnalysisContext::new();
    assert_eq!(
        generate_null_safe_expression(&schema("spec.ingress.host"), &ctx),
        "has(schema.spec.ingress) && has(schema.spec.ingress.host) && schema.spec.ingress.host"
    );
}

#[test]
fn optional_chaining_guards_flagged_references() -> Result<()> {
    let ctx = AnalysisContext::new().with_resource("web", "Deployment");
    let emission = handle_optional_chaining("web.status.readyReplicas > web.metadata.generation", &ctx)?;
    assert_eq!(
        emission.expression,
        "has(web.status) && has(web.status.readyReplicas) \
         && web.status.readyReplicas > web.metadata.generation"
    );
    Ok(())
}

#[test]
fn value_analysis() -> Result<()> {
    let value = Value::from_json_str(
        r#"{"a": {"__reference": {"resourceId": "db", "fieldPath": "status.endpoint"}},
            "b": {"__reference": {"resourceId": "__schema__", "fieldPath": "spec.name"}}}"#,
    )?;
    let results = kro_cel::analyze_optionality_value(&value, &AnalysisContext::new());
    let flags: Vec<bool> = results.iter().map(|r| r.potentially_undefined).collect();
    assert_eq!(flags, [true, false]);
    Ok(())
}

#[test]
fn stages() {
    assert_eq!(HydrationStage::of(&schema("spec.name")), HydrationStage::Immediate);
    assert_eq!(HydrationStage::of(&resource("web", "metadata.name")), HydrationStage::Immediate);
    assert_eq!(HydrationStage::of(&resource("web", "status.readyReplicas")), HydrationStage::Early);
    assert_eq!(HydrationStage::of(&resource("svc", "status.loadBalancer")), HydrationStage::Late);
    assert_eq!(HydrationStage::Late.expected_latency(), Duration::from_secs(30));
}

#[test]
fn phases_are_ordered_and_deduplicated() {
    let refs = [
        resource("svc", "status.loadBalancer.ingress[0].ip"),
        resource("web", "status.readyReplicas"),
        schema("spec.name"),
        resource("web", "status.readyReplicas"),
    ];
    let phases = hydration_phases(&refs);
    let stages: Vec<HydrationStage> = phases.iter().map(|p| p.stage).collect();
    assert_eq!(
        stages,
        [HydrationStage::Immediate, HydrationStage::Early, HydrationStage::Late]
    );
    assert_eq!(phases[1].references.len(), 1);
}

#[test]
fn progressive_expressions() {
    let refs = [schema("spec.name"), resource("web", "status.ready")];
    assert_eq!(
        progressive_expression("web.status.ready", &refs, "false", true),
        "has(web.status) && has(web.status.ready) ? web.status.ready : false"
    );
    assert_eq!(
        progressive_expression("schema.spec.name", &refs[..1], "\"\"", true),
        "schema.spec.name"
    );
}

#[test]
fn hydration_plan() -> Result<()> {
    let mut converter = Converter::new();
    converter.add_resource("web", "Deployment");
    converter.add_resource("svc", "Service");
    let result = converter.convert("`${schema.spec.name}: ${web.status.readyReplicas} ${svc.status.loadBalancer.ingress[0].ip}`");
    assert!(result.valid);

    let plan = converter
        .plan_hydration(&result, "\"pending\"")
        .expect("converted expression");
    assert_eq!(plan.phases.len(), 3);
    assert_eq!(plan.staged.len(), 3);

    let cel = result.expression().unwrap_or_default();
    assert_eq!(plan.staged[0].expression, cel);
    assert!(plan.staged[1]
        .expression
        .starts_with("has(web.status) && has(web.status.readyReplicas) ? "));
    assert!(plan.staged[2].expression.contains("size(svc.status.loadBalancer.ingress) > 0"));
    assert!(plan.staged[2].expression.ends_with(": \"pending\""));

    let json = serde_json::to_value(&plan.phases[2])?;
    assert_eq!(json["expectedLatencyMs"], 30000);
    assert_eq!(json["stage"], "late");
    Ok(())
}
