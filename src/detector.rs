// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Discovery of reference markers inside proxy value graphs.
//!
//! The walk is depth first. Scalars are terminal, arrays append `[i]` to the
//! path, objects append `.key`, and a marker is recorded with the path that
//! led to it. Containers already on the current path are skipped, so cyclic
//! graphs terminate. Anything deeper than `max_depth` is not inspected.

use crate::marker::{RefKind, Reference};
use crate::value::Value;

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::trace;

pub const DEFAULT_MAX_DEPTH: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DetectionOptions {
    pub max_depth: usize,
    pub track_source: bool,
    pub track_metrics: bool,
}

impl Default for DetectionOptions {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            track_source: true,
            track_metrics: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReferenceSource {
    Schema,
    Resource,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectedReference {
    pub reference: Reference,
    /// Location inside the walked value, e.g. `spec.env[1].value`.
    pub path: String,
    pub is_nested: bool,
    pub nesting_depth: usize,
    pub source: Option<ReferenceSource>,
    /// Resource the marker points into; `None` for schema markers.
    pub resource_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionStats {
    pub total_references: usize,
    pub schema_references: usize,
    pub resource_references: usize,
    pub cel_fragments: usize,
    pub max_nesting_depth: usize,
    pub resource_ids: BTreeSet<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionMetrics {
    pub nodes_visited: usize,
    pub cycles_skipped: usize,
    pub truncated_branches: usize,
    pub duration: Duration,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionResult {
    pub has_references: bool,
    pub references: Vec<DetectedReference>,
    pub stats: DetectionStats,
    pub metrics: Option<DetectionMetrics>,
}

#[derive(Debug, Clone, Default)]
pub struct ReferenceDetector {
    options: DetectionOptions,
}

struct Walk {
    references: Vec<DetectedReference>,
    stats: DetectionStats,
    metrics: DetectionMetrics,
    stack: Vec<*const ()>,
}

impl ReferenceDetector {
    pub fn new(options: DetectionOptions) -> Self {
        Self { options }
    }

    pub fn with_max_depth(max_depth: usize) -> Self {
        Self::new(DetectionOptions {
            max_depth,
            ..DetectionOptions::default()
        })
    }

    pub fn options(&self) -> &DetectionOptions {
        &self.options
    }

    pub fn detect(&self, value: &Value) -> DetectionResult {
        let start = Instant::now();
        let mut walk = Walk {
            references: vec![],
            stats: DetectionStats::default(),
            metrics: DetectionMetrics::default(),
            stack: vec![],
        };
        self.walk(value, String::new(), 0, &mut walk);

        let metrics = if self.options.track_metrics {
            walk.metrics.duration = start.elapsed();
            Some(walk.metrics)
        } else {
            None
        };
        trace!(
            references = walk.references.len(),
            resources = walk.stats.resource_ids.len(),
            "reference detection finished"
        );

        DetectionResult {
            has_references: !walk.references.is_empty(),
            references: walk.references,
            stats: walk.stats,
            metrics,
        }
    }

    fn walk(&self, value: &Value, path: String, depth: usize, w: &mut Walk) {
        if depth > self.options.max_depth {
            w.metrics.truncated_branches += 1;
            return;
        }
        w.metrics.nodes_visited += 1;

        match value {
            Value::Reference(r) => self.record(r, path, depth, w),
            Value::Cel(_) => w.stats.cel_fragments += 1,
            Value::Array(items) => {
                let Some(id) = enter(value, w) else {
                    return;
                };
                for (idx, item) in items.borrow().iter().enumerate() {
                    self.walk(item, format!("{path}[{idx}]"), depth + 1, w);
                }
                leave(id, w);
            }
            Value::Object(fields) => {
                let Some(id) = enter(value, w) else {
                    return;
                };
                for (key, item) in fields.borrow().iter() {
                    let child = if path.is_empty() {
                        key.clone()
                    } else {
                        format!("{path}.{key}")
                    };
                    self.walk(item, child, depth + 1, w);
                }
                leave(id, w);
            }
            Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => (),
        }
    }

    fn record(&self, r: &Reference, path: String, depth: usize, w: &mut Walk) {
        let (source, resource_id) = match r.kind() {
            RefKind::Schema => {
                w.stats.schema_references += 1;
                (ReferenceSource::Schema, None)
            }
            RefKind::Resource => {
                w.stats.resource_references += 1;
                w.stats.resource_ids.insert(r.resource_id().to_string());
                (ReferenceSource::Resource, Some(r.resource_id().to_string()))
            }
        };
        w.stats.total_references += 1;
        w.stats.max_nesting_depth = w.stats.max_nesting_depth.max(depth);

        let track = self.options.track_source;
        w.references.push(DetectedReference {
            reference: r.clone(),
            path,
            is_nested: depth > 0,
            nesting_depth: depth,
            source: track.then_some(source),
            resource_id: if track { resource_id } else { None },
        });
    }
}

fn enter(value: &Value, w: &mut Walk) -> Option<*const ()> {
    let id = value.container_id()?;
    if w.stack.contains(&id) {
        w.metrics.cycles_skipped += 1;
        return None;
    }
    w.stack.push(id);
    Some(id)
}

fn leave(id: *const (), w: &mut Walk) {
    if w.stack.last() == Some(&id) {
        w.stack.pop();
    }
}

/// Boolean-only detection that stops at the first marker.
pub fn contains_references(value: &Value, max_depth: usize) -> bool {
    fn scan(value: &Value, depth: usize, max_depth: usize, stack: &mut Vec<*const ()>) -> bool {
        if depth > max_depth {
            return false;
        }
        let id = match value {
            Value::Reference(_) => return true,
            Value::Array(_) | Value::Object(_) => match value.container_id() {
                Some(id) if !stack.contains(&id) => id,
                _ => return false,
            },
            _ => return false,
        };

        stack.push(id);
        let found = match value {
            Value::Array(items) => items
                .borrow()
                .iter()
                .any(|v| scan(v, depth + 1, max_depth, stack)),
            Value::Object(fields) => fields
                .borrow()
                .values()
                .any(|v| scan(v, depth + 1, max_depth, stack)),
            _ => false,
        };
        stack.pop();
        found
    }

    scan(value, 0, max_depth, &mut vec![])
}

/// Flat list of markers, in walk order, without path bookkeeping.
pub fn extract_references(value: &Value, max_depth: usize) -> Vec<Reference> {
    fn collect(
        value: &Value,
        depth: usize,
        max_depth: usize,
        stack: &mut Vec<*const ()>,
        out: &mut Vec<Reference>,
    ) {
        if depth > max_depth {
            return;
        }
        match value {
            Value::Reference(r) => out.push(r.clone()),
            Value::Array(items) => {
                let Some(id) = value.container_id().filter(|id| !stack.contains(id)) else {
                    return;
                };
                stack.push(id);
                for v in items.borrow().iter() {
                    collect(v, depth + 1, max_depth, stack, out);
                }
                stack.pop();
            }
            Value::Object(fields) => {
                let Some(id) = value.container_id().filter(|id| !stack.contains(id)) else {
                    return;
                };
                stack.push(id);
                for v in fields.borrow().values() {
                    collect(v, depth + 1, max_depth, stack, out);
                }
                stack.pop();
            }
            _ => (),
        }
    }

    let mut out = vec![];
    collect(value, 0, max_depth, &mut vec![], &mut out);
    out
}
