// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::analyzer::{AnalysisResult, Analyzer};
use crate::catalog::{ResourceCatalog, ResourceShape};
use crate::context::{AnalysisContext, ConversionOptions, ExpressionKind, FactoryKind};
use crate::factory::{dispatch, ConversionResult};
use crate::marker::{CelFragment, Reference};
use crate::optionality::{self, OptionalityAnalysisResult, TransitionPlan};
use crate::typing::{infer_type, TypeInferenceResult};
use crate::value::Value;

use std::sync::Arc;

use anyhow::Result;
use indexmap::IndexMap;

/// The expression converter.
#[derive(Debug, Clone)]
pub struct Converter {
    ctx: AnalysisContext,
}

/// Create a default converter.
impl Default for Converter {
    fn default() -> Self {
        Self::new()
    }
}

impl Converter {
    pub fn new() -> Self {
        Self {
            ctx: AnalysisContext::new(),
        }
    }

    /// Declare a resource of the composition with its catalog kind.
    pub fn add_resource(&mut self, id: &str, kind: &str) {
        self.ctx = self.ctx.clone().with_resource(id, kind);
    }

    /// Bind an identifier to a proxy value.
    pub fn add_binding(&mut self, name: &str, value: Value) {
        self.ctx = self.ctx.clone().with_binding(name, value);
    }

    /// Add a resource kind to the catalog, replacing one of the same name.
    pub fn add_resource_shape(&mut self, shape: ResourceShape) {
        let mut catalog = ResourceCatalog::clone(self.ctx.catalog());
        catalog.insert(shape);
        self.ctx = self.ctx.clone().with_catalog(Arc::new(catalog));
    }

    pub fn set_options(&mut self, options: ConversionOptions) {
        self.ctx = self.ctx.clone().with_options(options);
    }

    pub fn set_options_from_json(&mut self, json: &str) -> Result<()> {
        self.set_options(ConversionOptions::from_json_str(json)?);
        Ok(())
    }

    pub fn set_factory(&mut self, factory: FactoryKind) {
        self.ctx.options_mut().factory = factory;
    }

    pub fn set_expression_kind(&mut self, kind: ExpressionKind) {
        self.ctx = self.ctx.clone().with_expression_kind(kind);
    }

    pub fn context(&self) -> &AnalysisContext {
        &self.ctx
    }

    /// Convert a JavaScript expression to CEL.
    pub fn convert(&self, expression: &str) -> AnalysisResult {
        Analyzer::new(&self.ctx).analyze_expression(expression)
    }

    /// Convert the markers inside a value tree for the configured factory.
    pub fn convert_value(&self, value: &Value) -> ConversionResult {
        dispatch(value, &self.ctx)
    }

    pub fn convert_status_builder(
        &self,
        source: &str,
    ) -> crate::error::Result<IndexMap<String, AnalysisResult>> {
        Analyzer::new(&self.ctx).analyze_status_builder(source)
    }

    pub fn infer_type(&self, cel: &str) -> TypeInferenceResult {
        infer_type(&CelFragment::new(cel), &self.ctx)
    }

    pub fn analyze_optionality(
        &self,
        expression: &str,
    ) -> crate::error::Result<Vec<OptionalityAnalysisResult>> {
        optionality::analyze(expression, &self.ctx)
    }

    /// Stage a converted expression by when its references become available.
    pub fn plan_hydration(&self, result: &AnalysisResult, fallback: &str) -> Option<TransitionPlan> {
        let cel = result.expression()?;
        Some(optionality::plan_hydration(
            cel,
            &result.dependencies,
            fallback,
            &self.ctx,
        ))
    }

    pub fn null_safe(&self, reference: &Reference) -> String {
        optionality::generate_null_safe_expression(reference, &self.ctx)
    }
}
