// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Factory-aware conversion of proxy values.
//!
//! The kro back-end has no runtime to resolve references later, so every
//! marker becomes CEL text. The direct back-end resolves markers itself and
//! only needs text for references into the composition being built.

use crate::context::{AnalysisContext, FactoryKind};
use crate::detector::contains_references;
use crate::emitter::{Emission, Emitter};
use crate::error::{ConversionError, Result};
use crate::marker::{CelFragment, Reference};
use crate::value::{Object, Value};

use tracing::debug;

/// Decides what happens to each reference marker.
pub trait ConversionStrategy {
    fn kind(&self) -> FactoryKind;

    /// Whether `reference` is rewritten to CEL text or left for the runtime.
    fn should_convert(&self, reference: &Reference, ctx: &AnalysisContext) -> bool;
}

/// Keeps markers for deferred resolution wherever possible.
pub struct DirectStrategy;

/// Converts every marker.
pub struct KroStrategy;

impl ConversionStrategy for DirectStrategy {
    fn kind(&self) -> FactoryKind {
        FactoryKind::Direct
    }

    fn should_convert(&self, reference: &Reference, ctx: &AnalysisContext) -> bool {
        ctx.options().direct_convert_internal && ctx.is_internal(reference)
    }
}

impl ConversionStrategy for KroStrategy {
    fn kind(&self) -> FactoryKind {
        FactoryKind::Kro
    }

    fn should_convert(&self, _reference: &Reference, _ctx: &AnalysisContext) -> bool {
        true
    }
}

pub fn strategy_for(kind: FactoryKind) -> &'static dyn ConversionStrategy {
    match kind {
        FactoryKind::Direct => &DirectStrategy,
        FactoryKind::Kro => &KroStrategy,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConversionResult {
    pub value: Value,
    /// True when at least one marker was rewritten.
    pub was_converted: bool,
    pub expressions_generated: usize,
    pub references_converted: usize,
    pub references_preserved: usize,
    pub errors: Vec<ConversionError>,
    pub warnings: Vec<ConversionError>,
}

impl ConversionResult {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub(crate) fn unchanged(value: Value) -> Self {
        Self {
            value,
            was_converted: false,
            expressions_generated: 0,
            references_converted: 0,
            references_preserved: 0,
            errors: vec![],
            warnings: vec![],
        }
    }
}

pub(crate) fn fragment_of(emission: &Emission) -> CelFragment {
    if emission.value_type.is_dyn() {
        CelFragment::new(emission.expression.clone())
    } else {
        CelFragment::typed(emission.expression.clone(), emission.value_type.clone())
    }
}

struct Dispatch<'a> {
    ctx: &'a AnalysisContext,
    strategy: &'static dyn ConversionStrategy,
    result: ConversionResult,
    stack: Vec<*const ()>,
}

/// Convert the reference-bearing leaves of a value tree.
///
/// Static leaves are returned untouched and containers without markers are
/// shared, not copied. Containers already on the current path and anything
/// deeper than `max_depth` are left as they are.
pub fn dispatch(value: &Value, ctx: &AnalysisContext) -> ConversionResult {
    let strategy = strategy_for(ctx.factory());
    let mut d = Dispatch {
        ctx,
        strategy,
        result: ConversionResult::unchanged(Value::Null),
        stack: vec![],
    };
    let converted = d.convert(value, 0);
    let result = settle(value, converted, d.result);
    debug!(
        factory = ?strategy.kind(),
        converted = result.references_converted,
        preserved = result.references_preserved,
        errors = result.errors.len(),
        "factory dispatch finished"
    );
    result
}

/// Combine the outcome of a conversion pass with the counts it gathered.
///
/// A failed pass returns the input untouched, so the counts and warnings of
/// the markers it had already rewritten are dropped.
pub(crate) fn settle(
    input: &Value,
    converted: Result<Value>,
    partial: ConversionResult,
) -> ConversionResult {
    match converted {
        Ok(value) => ConversionResult { value, ..partial },
        Err(e) => {
            let mut result = ConversionResult::unchanged(input.clone());
            result.errors = partial.errors;
            result.errors.push(e);
            result
        }
    }
}

impl Dispatch<'_> {
    fn convert(&mut self, value: &Value, depth: usize) -> Result<Value> {
        let max_depth = self.ctx.options().max_depth;
        if depth > max_depth {
            return Ok(value.clone());
        }

        match value {
            Value::Reference(r) => self.convert_reference(value, r),
            Value::Array(items) => {
                if !contains_references(value, max_depth - depth) {
                    return Ok(value.clone());
                }
                let Some(id) = self.enter(value) else {
                    return Ok(value.clone());
                };
                let mut out = Vec::with_capacity(items.borrow().len());
                for item in items.borrow().iter() {
                    out.push(self.convert(item, depth + 1)?);
                }
                self.leave(id);
                Ok(Value::from(out))
            }
            Value::Object(fields) => {
                if !contains_references(value, max_depth - depth) {
                    return Ok(value.clone());
                }
                let Some(id) = self.enter(value) else {
                    return Ok(value.clone());
                };
                let mut out = Object::with_capacity(fields.borrow().len());
                for (k, v) in fields.borrow().iter() {
                    out.insert(k.clone(), self.convert(v, depth + 1)?);
                }
                self.leave(id);
                Ok(Value::from(out))
            }
            _ => Ok(value.clone()),
        }
    }

    fn enter(&mut self, value: &Value) -> Option<*const ()> {
        let id = value.container_id()?;
        if self.stack.contains(&id) {
            return None;
        }
        self.stack.push(id);
        Some(id)
    }

    fn leave(&mut self, id: *const ()) {
        if self.stack.last() == Some(&id) {
            self.stack.pop();
        }
    }

    fn convert_reference(&mut self, value: &Value, r: &Reference) -> Result<Value> {
        if !self.strategy.should_convert(r, self.ctx) {
            self.result.references_preserved += 1;
            return Ok(value.clone());
        }
        let emission = Emitter::new(self.ctx).emit_reference(r)?;
        self.result.warnings.extend(emission.warnings.iter().cloned());
        self.result.references_converted += 1;
        self.result.expressions_generated += 1;
        self.result.was_converted = true;
        Ok(Value::Cel(fragment_of(&emission)))
    }
}

/// Convert a JavaScript expression for the configured factory.
///
/// A direct-mode expression consisting of a single external reference is
/// returned as that marker.
pub fn dispatch_expression(expression: &str, ctx: &AnalysisContext) -> ConversionResult {
    let strategy = strategy_for(ctx.factory());
    let emission = match crate::emitter::emit_expression(expression, ctx) {
        Ok(e) => e,
        Err(e) => {
            let mut result = ConversionResult::unchanged(Value::from(expression));
            result.errors.push(e);
            return result;
        }
    };

    let mut result = ConversionResult::unchanged(Value::Null);
    result.warnings = emission.warnings.clone();
    if let Some(r) = &emission.reference {
        if !strategy.should_convert(r, ctx) {
            result.value = Value::Reference(r.clone());
            result.references_preserved = 1;
            return result;
        }
    }

    result.references_converted = emission.dependencies.len();
    result.expressions_generated = 1;
    result.was_converted = true;
    result.value = Value::Cel(fragment_of(&emission));
    result
}
