// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Known field shapes of common Kubernetes resource kinds.
//!
//! Paths are keyed in normalized form: list items are written `[]`, so
//! `spec.template.spec.containers[].image` covers every container. Map
//! entries below a known map field are looked up through the map's value type.

use crate::marker::{split_path, PathSegment};
use crate::typing::CelType;

use std::collections::BTreeMap;
use std::sync::Arc;

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldInfo {
    #[serde(rename = "type")]
    pub ty: CelType,
    pub optional: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceShape {
    pub kind: String,
    pub fields: BTreeMap<String, FieldInfo>,
}

impl ResourceShape {
    pub fn new(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            fields: BTreeMap::new(),
        }
    }

    pub fn field(mut self, path: &str, ty: CelType, optional: bool) -> Self {
        self.fields
            .insert(path.to_string(), FieldInfo { ty, optional });
        self
    }

    /// Resolve a concrete field path such as `status.conditions[0].type`.
    pub fn lookup(&self, path: &str) -> Option<FieldInfo> {
        let segments = split_path(path).ok()?;
        let mut key = String::new();
        let mut current: Option<FieldInfo> = None;

        for seg in &segments {
            match seg {
                PathSegment::Field(f) | PathSegment::Key(f) => {
                    if !key.is_empty() {
                        key.push('.');
                    }
                    key.push_str(f);
                }
                PathSegment::Index(_) => key.push_str("[]"),
            }

            if let Some(info) = self.fields.get(&key) {
                current = Some(info.clone());
                continue;
            }

            // Fall back to the container type of the previous step.
            let prev = current.take()?;
            let ty = match (prev.ty.non_null(), seg) {
                (CelType::Map { value }, PathSegment::Field(_) | PathSegment::Key(_)) => *value,
                (CelType::List { item }, PathSegment::Index(_)) => *item,
                (CelType::Dyn, _) => CelType::Dyn,
                _ => return None,
            };
            // Entries of maps and lists are never guaranteed to exist.
            current = Some(FieldInfo { ty, optional: true });
        }

        current
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceCatalog {
    kinds: BTreeMap<String, ResourceShape>,
}

impl ResourceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// The shared catalog of built-in kinds. Built once.
    pub fn builtin() -> Arc<ResourceCatalog> {
        BUILTIN.clone()
    }

    pub fn insert(&mut self, shape: ResourceShape) {
        self.kinds.insert(shape.kind.clone(), shape);
    }

    pub fn shape(&self, kind: &str) -> Option<&ResourceShape> {
        self.kinds.get(kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.kinds.keys().map(|k| k.as_str())
    }

    pub fn lookup(&self, kind: &str, path: &str) -> Option<FieldInfo> {
        self.shape(kind)?.lookup(path)
    }
}

fn n() -> CelType {
    CelType::Number
}

fn s() -> CelType {
    CelType::String
}

fn b() -> CelType {
    CelType::Bool
}

fn d() -> CelType {
    CelType::Dyn
}

fn list(t: CelType) -> CelType {
    CelType::list(t)
}

fn map(t: CelType) -> CelType {
    CelType::map(t)
}

fn conditions() -> CelType {
    list(map(s()))
}

fn with_metadata(kind: &str) -> ResourceShape {
    ResourceShape::new(kind)
        .field("apiVersion", s(), false)
        .field("kind", s(), false)
        .field("metadata", map(d()), false)
        .field("metadata.name", s(), false)
        .field("metadata.namespace", s(), true)
        .field("metadata.uid", s(), false)
        .field("metadata.generation", n(), false)
        .field("metadata.resourceVersion", s(), true)
        .field("metadata.creationTimestamp", s(), false)
        .field("metadata.deletionTimestamp", s(), true)
        .field("metadata.labels", map(s()), true)
        .field("metadata.annotations", map(s()), true)
        .field("metadata.ownerReferences", list(map(d())), true)
        .field("metadata.finalizers", list(s()), true)
}

fn with_pod_template(shape: ResourceShape, prefix: &str) -> ResourceShape {
    let p = |f: &str| format!("{prefix}.{f}");
    shape
        .field(&p("template"), map(d()), false)
        .field(&p("template.metadata.labels"), map(s()), true)
        .field(&p("template.metadata.annotations"), map(s()), true)
        .field(&p("template.spec.containers"), list(map(d())), false)
        .field(&p("template.spec.containers[].name"), s(), false)
        .field(&p("template.spec.containers[].image"), s(), false)
        .field(&p("template.spec.containers[].ports"), list(map(d())), true)
        .field(&p("template.spec.containers[].env"), list(map(d())), true)
        .field(&p("template.spec.containers[].resources"), map(d()), true)
        .field(&p("template.spec.serviceAccountName"), s(), true)
        .field(&p("template.spec.nodeSelector"), map(s()), true)
        .field(&p("template.spec.tolerations"), list(map(d())), true)
        .field(&p("template.spec.affinity"), map(d()), true)
        .field(&p("template.spec.volumes"), list(map(d())), true)
}

fn workload_status(shape: ResourceShape) -> ResourceShape {
    shape
        .field("status", map(d()), true)
        .field("status.observedGeneration", n(), true)
        .field("status.replicas", n(), true)
        .field("status.readyReplicas", n(), true)
        .field("status.availableReplicas", n(), true)
        .field("status.updatedReplicas", n(), true)
        .field("status.conditions", conditions(), true)
}

lazy_static! {
    static ref BUILTIN: Arc<ResourceCatalog> = {
        let mut c = ResourceCatalog::new();

        let deployment = with_metadata("Deployment")
            .field("spec", map(d()), false)
            .field("spec.replicas", n(), true)
            .field("spec.selector", map(d()), false)
            .field("spec.selector.matchLabels", map(s()), true)
            .field("spec.strategy", map(d()), true)
            .field("spec.minReadySeconds", n(), true)
            .field("status.unavailableReplicas", n(), true);
        let deployment = workload_status(with_pod_template(deployment, "spec"));
        c.insert(deployment);

        let stateful_set = with_metadata("StatefulSet")
            .field("spec", map(d()), false)
            .field("spec.replicas", n(), true)
            .field("spec.serviceName", s(), false)
            .field("spec.selector", map(d()), false)
            .field("spec.volumeClaimTemplates", list(map(d())), true)
            .field("status.currentReplicas", n(), true)
            .field("status.currentRevision", s(), true)
            .field("status.updateRevision", s(), true);
        c.insert(workload_status(with_pod_template(stateful_set, "spec")));

        let daemon_set = with_metadata("DaemonSet")
            .field("spec", map(d()), false)
            .field("spec.selector", map(d()), false)
            .field("status", map(d()), true)
            .field("status.currentNumberScheduled", n(), true)
            .field("status.desiredNumberScheduled", n(), true)
            .field("status.numberReady", n(), true)
            .field("status.numberAvailable", n(), true)
            .field("status.numberMisscheduled", n(), true)
            .field("status.observedGeneration", n(), true)
            .field("status.conditions", conditions(), true);
        c.insert(with_pod_template(daemon_set, "spec"));

        c.insert(
            with_metadata("Service")
                .field("spec", map(d()), false)
                .field("spec.type", s(), true)
                .field("spec.selector", map(s()), true)
                .field("spec.ports", list(map(d())), true)
                .field("spec.ports[].port", n(), false)
                .field("spec.ports[].targetPort", d(), true)
                .field("spec.ports[].name", s(), true)
                .field("spec.ports[].protocol", s(), true)
                .field("spec.clusterIP", s(), true)
                .field("spec.externalName", s(), true)
                .field("status", map(d()), true)
                .field("status.loadBalancer", map(d()), true)
                .field("status.loadBalancer.ingress", list(map(s())), true)
                .field("status.loadBalancer.ingress[].ip", s(), true)
                .field("status.loadBalancer.ingress[].hostname", s(), true)
                .field("status.conditions", conditions(), true),
        );

        c.insert(
            with_metadata("Pod")
                .field("spec", map(d()), false)
                .field("spec.containers", list(map(d())), false)
                .field("spec.containers[].name", s(), false)
                .field("spec.containers[].image", s(), false)
                .field("spec.nodeName", s(), true)
                .field("spec.restartPolicy", s(), true)
                .field("spec.nodeSelector", map(s()), true)
                .field("status", map(d()), true)
                .field("status.phase", s(), true)
                .field("status.podIP", s(), true)
                .field("status.hostIP", s(), true)
                .field("status.startTime", s(), true)
                .field("status.conditions", conditions(), true)
                .field("status.containerStatuses", list(map(d())), true)
                .field("status.containerStatuses[].ready", b(), true)
                .field("status.containerStatuses[].restartCount", n(), true),
        );

        let job = with_metadata("Job")
            .field("spec", map(d()), false)
            .field("spec.completions", n(), true)
            .field("spec.parallelism", n(), true)
            .field("spec.backoffLimit", n(), true)
            .field("status", map(d()), true)
            .field("status.active", n(), true)
            .field("status.succeeded", n(), true)
            .field("status.failed", n(), true)
            .field("status.startTime", s(), true)
            .field("status.completionTime", s(), true)
            .field("status.conditions", conditions(), true);
        c.insert(with_pod_template(job, "spec"));

        c.insert(
            with_metadata("CronJob")
                .field("spec", map(d()), false)
                .field("spec.schedule", s(), false)
                .field("spec.suspend", b(), true)
                .field("spec.jobTemplate", map(d()), false)
                .field("status", map(d()), true)
                .field("status.active", list(map(d())), true)
                .field("status.lastScheduleTime", s(), true)
                .field("status.lastSuccessfulTime", s(), true),
        );

        c.insert(
            with_metadata("ConfigMap")
                .field("data", map(s()), true)
                .field("binaryData", map(s()), true),
        );

        c.insert(
            with_metadata("Secret")
                .field("type", s(), true)
                .field("data", map(s()), true)
                .field("stringData", map(s()), true),
        );

        c.insert(
            with_metadata("Ingress")
                .field("spec", map(d()), false)
                .field("spec.ingressClassName", s(), true)
                .field("spec.rules", list(map(d())), true)
                .field("spec.rules[].host", s(), true)
                .field("spec.tls", list(map(d())), true)
                .field("status", map(d()), true)
                .field("status.loadBalancer", map(d()), true)
                .field("status.loadBalancer.ingress", list(map(s())), true)
                .field("status.loadBalancer.ingress[].ip", s(), true)
                .field("status.loadBalancer.ingress[].hostname", s(), true),
        );

        c.insert(
            with_metadata("PersistentVolumeClaim")
                .field("spec", map(d()), false)
                .field("spec.accessModes", list(s()), false)
                .field("spec.storageClassName", s(), true)
                .field("spec.resources", map(d()), true)
                .field("status", map(d()), true)
                .field("status.phase", s(), true)
                .field("status.capacity", map(s()), true)
                .field("status.accessModes", list(s()), true),
        );

        c.insert(
            with_metadata("HorizontalPodAutoscaler")
                .field("spec", map(d()), false)
                .field("spec.minReplicas", n(), true)
                .field("spec.maxReplicas", n(), false)
                .field("spec.scaleTargetRef", map(s()), false)
                .field("status", map(d()), true)
                .field("status.currentReplicas", n(), true)
                .field("status.desiredReplicas", n(), true)
                .field("status.lastScaleTime", s(), true)
                .field("status.conditions", conditions(), true),
        );

        c.insert(
            with_metadata("Namespace")
                .field("spec", map(d()), true)
                .field("status", map(d()), true)
                .field("status.phase", s(), true),
        );

        Arc::new(c)
    };
}
