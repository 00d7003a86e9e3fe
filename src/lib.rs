// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

// Use README.md as crate documentation.
#![doc = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/README.md"))]

mod analyzer;
mod ast;
mod catalog;
mod cel;
mod context;
mod detector;
mod emitter;
mod engine;
mod error;
mod factory;
mod lexer;
mod marker;
mod optionality;
mod parser;
mod source_map;
mod typing;
mod value;

pub use analyzer::{analyze, AnalysisResult, Analyzer};
pub use catalog::{FieldInfo, ResourceCatalog, ResourceShape};
pub use context::{AnalysisContext, ConversionOptions, ExpressionKind, FactoryKind, NullSafety};
pub use detector::{
    contains_references, extract_references, DetectedReference, DetectionMetrics,
    DetectionOptions, DetectionResult, DetectionStats, ReferenceDetector, ReferenceSource,
};
pub use emitter::{emit_expression, Emission, Emitter, RootAlias};
pub use engine::Converter;
pub use error::{ConversionError, Result, SourceLocation};
pub use factory::{
    dispatch, dispatch_expression, ConversionResult, ConversionStrategy, DirectStrategy,
    KroStrategy,
};
pub use marker::{CelFragment, PathSegment, RefKind, Reference};
pub use optionality::{
    analyze as analyze_optionality, analyze_references as analyze_reference_optionality,
    analyze_value as analyze_optionality_value, generate_null_safe_expression,
    handle_optional_chaining, plan_hydration, HydrationPhase, HydrationStage,
    OptionalityAnalysisResult, StagedExpression, TransitionPlan,
};
pub use source_map::{MappingContext, SourceMap, SourceMapEntry};
pub use typing::{infer_type, CelType, TypeInferenceResult, TypeMetadata};
pub use value::{Object, Value};

/// Items in `unstable` are likely to change.
pub mod unstable {
    pub use crate::ast::*;
    pub use crate::cel::{parse as parse_cel, tokenize as tokenize_cel, CelExpr, CelUnaryOp};
    pub use crate::lexer::*;
    pub use crate::marker::{is_identifier, join_path, quote_cel_string, split_path};
    pub use crate::optionality::{assess, hydration_phases, progressive_expression, Assessment};
    pub use crate::parser::*;
}

#[cfg(test)]
mod tests;
