// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::hint::black_box;

use kro_cel::*;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

fn context() -> AnalysisContext {
    AnalysisContext::new()
        .with_resource("deployment", "Deployment")
        .with_resource("service", "Service")
}

fn convert_expressions(c: &mut Criterion) {
    let ctx = context();
    let cases = [
        ("reference", "deployment.status.readyReplicas"),
        (
            "comparison",
            "deployment.status.readyReplicas >= deployment.spec.replicas && service.status.ready",
        ),
        (
            "template",
            "`http://${service.metadata.name}.${schema.spec.namespace}:${schema.spec.port}`",
        ),
        (
            "optional chaining",
            "service.status?.loadBalancer?.ingress?.[0]?.ip ?? 'pending'",
        ),
        (
            "array methods",
            "deployment.spec.template.spec.containers.filter(c => c.image.includes('nginx')).length > 0",
        ),
    ];

    let mut group = c.benchmark_group("convert");
    for (name, expression) in cases {
        group.bench_with_input(BenchmarkId::from_parameter(name), expression, |b, e| {
            b.iter(|| {
                let result = analyze(black_box(e), &ctx);
                assert!(result.valid);
            })
        });
    }
    group.finish();
}

fn detect_references(c: &mut Criterion) {
    let build = |n: usize| {
        let root = Value::new_object();
        for i in 0..n {
            let item = Value::new_object();
            let r = Reference::resource(format!("res{i}"), "status.ready").unwrap();
            item.set("ready", Value::from(r)).unwrap();
            item.set("index", Value::from(i as u64)).unwrap();
            root.set(format!("item{i}"), item).unwrap();
        }
        root
    };

    let mut group = c.benchmark_group("detect references");
    for n in [10usize, 100, 1000] {
        let value = build(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &value, |b, v| {
            b.iter(|| {
                let refs = extract_references(black_box(v), 10);
                assert_eq!(refs.len(), n);
            })
        });
    }
    group.finish();
}

fn infer_types(c: &mut Criterion) {
    let ctx = context();
    let fragment = CelFragment::new(
        "has(deployment.status) && deployment.status.conditions.exists(c, c.type == \"Available\" && c.status == \"True\")",
    );
    c.bench_function("infer type", |b| {
        b.iter(|| {
            let info = infer_type(black_box(&fragment), &ctx);
            assert!(info.success);
        })
    });
}

criterion_group!(benches, convert_expressions, detect_references, infer_types);
criterion_main!(benches);
