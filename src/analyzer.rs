// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::ast::{Expr, Ref};
use crate::context::{AnalysisContext, ExpressionKind, FactoryKind};
use crate::emitter::{Emission, Emitter, RootAlias};
use crate::error::{ConversionError, Result};
use crate::factory::{fragment_of, strategy_for};
use crate::marker::{CelFragment, Reference};
use crate::parser::parse_expression;
use crate::source_map::SourceMap;
use crate::typing::{infer_type, CelType, TypeInferenceResult};
use crate::value::Value;

use indexmap::IndexMap;
use serde::Serialize;
use tracing::debug;

/// Outcome of analyzing one expression.
///
/// An invalid result never carries a fragment, and a result that needs no
/// conversion has no dependencies.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub valid: bool,
    pub cel_fragment: Option<CelFragment>,
    /// Direct factory only: a lone external reference left for the runtime.
    pub deferred_reference: Option<Reference>,
    pub dependencies: Vec<Reference>,
    pub source_map: SourceMap,
    pub errors: Vec<ConversionError>,
    pub warnings: Vec<ConversionError>,
    pub requires_conversion: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub type_info: Option<TypeInferenceResult>,
}

impl AnalysisResult {
    pub fn failed(error: ConversionError) -> Self {
        Self {
            valid: false,
            cel_fragment: None,
            deferred_reference: None,
            dependencies: vec![],
            source_map: SourceMap::new(),
            errors: vec![error],
            warnings: vec![],
            requires_conversion: false,
            type_info: None,
        }
    }

    /// The converted CEL text, if any.
    pub fn expression(&self) -> Option<&str> {
        self.cel_fragment.as_ref().map(|c| c.expression.as_str())
    }
}

fn kind_name(kind: ExpressionKind) -> &'static str {
    match kind {
        ExpressionKind::Status => "status",
        ExpressionKind::ResourceField => "resourceField",
        ExpressionKind::ReadyWhen => "readyWhen",
        ExpressionKind::IncludeWhen => "includeWhen",
    }
}

pub struct Analyzer<'ctx> {
    ctx: &'ctx AnalysisContext,
}

/// Analyze a JavaScript expression.
pub fn analyze(expression: &str, ctx: &AnalysisContext) -> AnalysisResult {
    Analyzer::new(ctx).analyze_expression(expression)
}

impl<'ctx> Analyzer<'ctx> {
    pub fn new(ctx: &'ctx AnalysisContext) -> Self {
        Self { ctx }
    }

    pub fn analyze_expression(&self, expression: &str) -> AnalysisResult {
        let expr = match parse_expression(expression) {
            Ok(e) => e,
            Err(e) => return self.reject(expression, e),
        };
        debug!(expression, shape = ?expr.shape(), "analyzing expression");
        match Emitter::new(self.ctx).emit(&expr) {
            Ok(emission) => self.finish(emission),
            Err(e) => self.reject(expression, e),
        }
    }

    /// Analyze a proxy value. CEL fragments are returned as they are.
    pub fn analyze_value(&self, value: &Value) -> AnalysisResult {
        if let Value::Cel(fragment) = value {
            return AnalysisResult {
                valid: true,
                cel_fragment: Some(fragment.clone()),
                deferred_reference: None,
                dependencies: vec![],
                source_map: SourceMap::new(),
                errors: vec![],
                warnings: vec![],
                requires_conversion: false,
                type_info: None,
            };
        }
        match Emitter::new(self.ctx).emit_value(value) {
            Ok(emission) => self.finish(emission),
            Err(e) => AnalysisResult::failed(e),
        }
    }

    /// Analyze every leaf of a status builder, keyed by dotted field path.
    ///
    /// Accepts an object literal or an arrow function returning one. The
    /// arrow's parameters stand for the schema and the resources.
    pub fn analyze_status_builder(&self, source: &str) -> Result<IndexMap<String, AnalysisResult>> {
        let expr = parse_expression(source)?;
        let mut aliases = vec![];
        let body = match expr.as_ref() {
            Expr::Arrow { params, body, span } => {
                if params.len() > 2 {
                    return Err(span.unsupported("status builders take at most two parameters"));
                }
                for (p, alias) in params.iter().zip([RootAlias::Schema, RootAlias::Resources]) {
                    aliases.push((p.text().to_string(), alias));
                }
                body.clone()
            }
            _ => expr.clone(),
        };
        if !matches!(body.as_ref(), Expr::Object { .. }) {
            return Err(body.span().unsupported("status builders must return an object literal"));
        }

        let mut out = IndexMap::new();
        self.collect_fields(&body, "", &aliases, &mut out);
        debug!(fields = out.len(), "status builder analyzed");
        Ok(out)
    }

    fn collect_fields(
        &self,
        expr: &Ref<Expr>,
        prefix: &str,
        aliases: &[(String, RootAlias)],
        out: &mut IndexMap<String, AnalysisResult>,
    ) {
        let Expr::Object { fields, .. } = expr.as_ref() else {
            return;
        };
        for (_, key, value) in fields {
            let path = if prefix.is_empty() {
                key.clone()
            } else {
                format!("{prefix}.{key}")
            };
            if matches!(value.as_ref(), Expr::Object { .. }) {
                self.collect_fields(value, &path, aliases, out);
                continue;
            }

            let mut emitter = Emitter::new(self.ctx);
            for (name, alias) in aliases {
                emitter = emitter.with_alias(name, *alias);
            }
            let result = match emitter.emit(value) {
                Ok(emission) => self.finish(emission),
                Err(e) => self.reject(value.span().text(), e),
            };
            out.insert(path, result);
        }
    }

    fn reject(&self, expression: &str, error: ConversionError) -> AnalysisResult {
        debug!(expression, error = %error, "conversion failed");
        AnalysisResult::failed(error.with_expression(expression))
    }

    fn finish(&self, emission: Emission) -> AnalysisResult {
        let requires_conversion = !emission.dependencies.is_empty();
        let mut warnings = emission.warnings.clone();

        if self.ctx.factory() == FactoryKind::Direct {
            if let Some(r) = &emission.reference {
                if !strategy_for(FactoryKind::Direct).should_convert(r, self.ctx) {
                    return AnalysisResult {
                        valid: true,
                        cel_fragment: None,
                        deferred_reference: Some(r.clone()),
                        dependencies: emission.dependencies,
                        source_map: emission.source_map,
                        errors: vec![],
                        warnings,
                        requires_conversion,
                        type_info: None,
                    };
                }
            }
        }

        let fragment = fragment_of(&emission);
        let kind = self.ctx.expression_kind();
        let type_info = (kind.requires_bool() || self.ctx.options().validate_types).then(|| {
            let info = infer_type(&fragment, self.ctx);
            warnings.extend(info.errors.iter().cloned());
            if kind.requires_bool() && !CelType::Bool.accepts(&info.result_type.non_null()) {
                warnings.push(ConversionError::IncompatibleOperands {
                    operator: kind_name(kind).to_string(),
                    left: CelType::Bool.to_string(),
                    right: info.result_type.to_string(),
                    expression: fragment.expression.clone(),
                });
            }
            info
        });

        AnalysisResult {
            valid: true,
            cel_fragment: Some(fragment),
            deferred_reference: None,
            dependencies: if requires_conversion {
                emission.dependencies
            } else {
                vec![]
            },
            source_map: emission.source_map,
            errors: vec![],
            warnings,
            requires_conversion,
            type_info,
        }
    }
}
