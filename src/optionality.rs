// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Decides which references may be absent when an expression is evaluated,
//! and how emitted CEL protects against that.
//!
//! Controllers populate `status` asynchronously, so a field that is always
//! present once a resource settles can still be missing on the first few
//! reconciliations. The policy here is purely path based.

use crate::context::{AnalysisContext, NullSafety};
use crate::detector::extract_references;
use crate::emitter::{emit_expression, null_safe_reference, reference_guards, Emission};
use crate::error::Result;
use crate::marker::{PathSegment, RefKind, Reference};
use crate::value::Value;

use std::time::Duration;

use serde::{Serialize, Serializer};
use tracing::debug;

/// Fields that are commonly left out of a manifest.
pub const KNOWN_OPTIONAL_FIELDS: [&str; 8] = [
    "labels",
    "annotations",
    "namespace",
    "replicas",
    "resources",
    "nodeSelector",
    "tolerations",
    "affinity",
];

/// Metadata the API server sets on every object.
const ALWAYS_PRESENT_METADATA: [&str; 4] = ["name", "uid", "creationTimestamp", "generation"];

/// Status fields usually reported within the first reconciliations.
const EARLY_STATUS_FIELDS: [&str; 7] = [
    "ready",
    "readyReplicas",
    "availableReplicas",
    "phase",
    "conditions",
    "replicas",
    "observedGeneration",
];

#[derive(Debug, Clone, PartialEq)]
pub struct Assessment {
    pub potentially_undefined: bool,
    pub confidence: f64,
    pub reason: &'static str,
}

fn assessment(potentially_undefined: bool, confidence: f64, reason: &'static str) -> Assessment {
    Assessment {
        potentially_undefined,
        confidence,
        reason,
    }
}

fn mentions_optional_field(r: &Reference) -> bool {
    r.segments().iter().any(|s| match s {
        PathSegment::Field(f) | PathSegment::Key(f) => KNOWN_OPTIONAL_FIELDS.contains(&f.as_str()),
        PathSegment::Index(_) => false,
    })
}

/// Classify a single reference.
pub fn assess(r: &Reference, conservative: bool) -> Assessment {
    let indexed = r.has_array_index();
    if r.kind() == RefKind::Schema {
        return if indexed {
            assessment(true, 0.8, "array element may not exist")
        } else if conservative && mentions_optional_field(r) {
            assessment(true, 0.7, "field is commonly omitted from the schema")
        } else {
            assessment(false, 0.9, "schema fields are provided at instantiation")
        };
    }

    let segments = r.segments();
    match r.top_level_field() {
        "status" => assessment(
            true,
            1.0,
            "status is populated asynchronously by the controller",
        ),
        "spec" if indexed => assessment(true, 0.8, "array element may not exist"),
        "spec" if mentions_optional_field(r) => {
            assessment(true, 0.8, "spec field is commonly omitted")
        }
        "spec" => assessment(false, 0.8, "spec field is required"),
        "metadata" => match segments.get(1) {
            Some(PathSegment::Field(f)) if ALWAYS_PRESENT_METADATA.contains(&f.as_str()) => {
                assessment(false, 0.95, "metadata field is always set by the API server")
            }
            None => assessment(false, 0.95, "metadata is always present"),
            _ => assessment(true, 0.7, "metadata field is optional"),
        },
        "kind" | "apiVersion" => assessment(false, 1.0, "type information is always present"),
        _ if conservative => assessment(true, 0.5, "field of unknown optionality"),
        _ => assessment(false, 0.5, "field of unknown optionality"),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionalityAnalysisResult {
    pub reference: Reference,
    pub potentially_undefined: bool,
    pub requires_null_safety: bool,
    pub confidence: f64,
    pub reason: String,
    pub suggested_cel_pattern: Option<String>,
}

/// Analyze each reference against the policy and suggest a guarded form.
pub fn analyze_references(references: &[Reference], ctx: &AnalysisContext) -> Vec<OptionalityAnalysisResult> {
    let options = ctx.options();
    references
        .iter()
        .map(|r| {
            let a = assess(r, options.conservative);
            let suggested_cel_pattern = a
                .potentially_undefined
                .then(|| null_safe_reference(r, options.null_safety()));
            OptionalityAnalysisResult {
                reference: r.clone(),
                potentially_undefined: a.potentially_undefined,
                requires_null_safety: a.potentially_undefined,
                confidence: a.confidence,
                reason: a.reason.to_string(),
                suggested_cel_pattern,
            }
        })
        .collect()
}

/// Analyze the references embedded in a value tree.
pub fn analyze_value(value: &Value, ctx: &AnalysisContext) -> Vec<OptionalityAnalysisResult> {
    let references = extract_references(value, ctx.options().max_depth);
    analyze_references(&references, ctx)
}

/// Analyze the references read by a JavaScript expression.
pub fn analyze(expression: &str, ctx: &AnalysisContext) -> Result<Vec<OptionalityAnalysisResult>> {
    let emission = emit_expression(expression, ctx)?;
    let results = analyze_references(&emission.dependencies, ctx);
    debug!(
        expression,
        references = results.len(),
        flagged = results.iter().filter(|r| r.requires_null_safety).count(),
        "optionality analysis finished"
    );
    Ok(results)
}

/// Guarded CEL for one reference using the pattern the context selects.
pub fn generate_null_safe_expression(r: &Reference, ctx: &AnalysisContext) -> String {
    null_safe_reference(r, ctx.options().null_safety())
}

/// Convert an expression written with `?.`, guarding every flagged reference
/// as well as the explicitly optional links.
pub fn handle_optional_chaining(expression: &str, ctx: &AnalysisContext) -> Result<Emission> {
    let mut ctx = ctx.clone();
    ctx.options_mut().auto_null_safety = true;
    emit_expression(expression, &ctx)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum HydrationStage {
    Immediate,
    Early,
    Late,
}

impl HydrationStage {
    /// Heuristic time until fields of this stage are usually populated.
    pub fn expected_latency(&self) -> Duration {
        match self {
            Self::Immediate => Duration::ZERO,
            Self::Early => Duration::from_secs(5),
            Self::Late => Duration::from_secs(30),
        }
    }

    pub fn of(r: &Reference) -> HydrationStage {
        if r.is_schema() || r.top_level_field() != "status" {
            return Self::Immediate;
        }
        match r.segments().get(1) {
            Some(PathSegment::Field(f)) if EARLY_STATUS_FIELDS.contains(&f.as_str()) => Self::Early,
            _ => Self::Late,
        }
    }
}

fn serialize_millis<S: Serializer>(d: &Duration, s: S) -> core::result::Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HydrationPhase {
    pub stage: HydrationStage,
    pub references: Vec<Reference>,
    #[serde(rename = "expectedLatencyMs", serialize_with = "serialize_millis")]
    pub expected_latency: Duration,
}

/// An expression usable once every reference up to `stage` is hydrated.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StagedExpression {
    pub stage: HydrationStage,
    pub expression: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionPlan {
    pub phases: Vec<HydrationPhase>,
    pub staged: Vec<StagedExpression>,
}

/// Group references by hydration stage, in stage order. Empty stages are omitted.
pub fn hydration_phases(references: &[Reference]) -> Vec<HydrationPhase> {
    [HydrationStage::Immediate, HydrationStage::Early, HydrationStage::Late]
        .into_iter()
        .filter_map(|stage| {
            let mut refs: Vec<Reference> = vec![];
            for r in references.iter().filter(|r| HydrationStage::of(r) == stage) {
                if !refs.contains(r) {
                    refs.push(r.clone());
                }
            }
            (!refs.is_empty()).then(|| HydrationPhase {
                stage,
                references: refs,
                expected_latency: stage.expected_latency(),
            })
        })
        .collect()
}

/// `guards ? cel : fallback`, with `has()` guards for every flagged reference.
pub fn progressive_expression(
    cel: &str,
    references: &[Reference],
    fallback: &str,
    conservative: bool,
) -> String {
    let mut guards: Vec<String> = vec![];
    for r in references {
        if !assess(r, conservative).potentially_undefined {
            continue;
        }
        for g in reference_guards(r, NullSafety::HasGuards) {
            if !guards.contains(&g) {
                guards.push(g);
            }
        }
    }
    if guards.is_empty() {
        return cel.to_string();
    }
    format!("{} ? {cel} : {fallback}", guards.join(" && "))
}

/// Best-effort staging of an already converted expression.
///
/// Each stage's expression evaluates `cel` once the references of that stage
/// and all earlier ones are present and `fallback` before. The final stage
/// protects every flagged reference.
pub fn plan_hydration(
    cel: &str,
    references: &[Reference],
    fallback: &str,
    ctx: &AnalysisContext,
) -> TransitionPlan {
    let phases = hydration_phases(references);
    let mut seen: Vec<Reference> = vec![];
    let mut staged = vec![];
    for phase in &phases {
        seen.extend(phase.references.iter().cloned());
        staged.push(StagedExpression {
            stage: phase.stage,
            expression: progressive_expression(cel, &seen, fallback, ctx.options().conservative),
        });
    }
    debug!(
        phases = phases.len(),
        references = references.len(),
        "hydration plan computed"
    );
    TransitionPlan { phases, staged }
}
