// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Position of a construct in the JavaScript source an expression came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    pub line: u32,
    pub column: u32,
    pub length: u32,
}

/// Every failure or diagnostic produced while converting an expression.
///
/// Whether a variant is fatal depends on where it is reported: the analyzer
/// places `UnresolvableReference` among warnings, and the type inference
/// engine only ever reports `IncompatibleOperands`/`UnknownFunction`.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ConversionError {
    /// Malformed source text.
    #[error("{message}")]
    Parse {
        message: String,
        expression: String,
        location: Option<SourceLocation>,
    },

    /// Valid JavaScript outside the convertible subset.
    #[error("unsupported syntax: {message}")]
    UnsupportedSyntax {
        message: String,
        expression: String,
        location: Option<SourceLocation>,
    },

    /// A resource or schema path that could not be matched against known shapes.
    #[error("unresolvable reference `{reference}`: {message}")]
    UnresolvableReference {
        reference: String,
        message: String,
        expression: String,
        location: Option<SourceLocation>,
    },

    #[error("incompatible operands for `{operator}`: {left} and {right}")]
    IncompatibleOperands {
        operator: String,
        left: String,
        right: String,
        expression: String,
    },

    #[error("unknown function `{name}`")]
    UnknownFunction { name: String, expression: String },

    /// A reference marker violating its invariants.
    #[error("invalid reference: {0}")]
    InvalidReference(String),

    /// Unexpected failure inside the converter.
    #[error("internal error: {message}")]
    Internal { message: String, expression: String },
}

impl ConversionError {
    pub fn message(&self) -> String {
        self.to_string()
    }

    pub fn original_expression(&self) -> Option<&str> {
        match self {
            Self::Parse { expression, .. }
            | Self::UnsupportedSyntax { expression, .. }
            | Self::UnresolvableReference { expression, .. }
            | Self::IncompatibleOperands { expression, .. }
            | Self::UnknownFunction { expression, .. }
            | Self::Internal { expression, .. } => Some(expression.as_str()),
            Self::InvalidReference(_) => None,
        }
    }

    pub fn source_location(&self) -> Option<&SourceLocation> {
        match self {
            Self::Parse { location, .. }
            | Self::UnsupportedSyntax { location, .. }
            | Self::UnresolvableReference { location, .. } => location.as_ref(),
            _ => None,
        }
    }

    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::UnsupportedSyntax { .. })
    }

    pub fn internal(message: impl Into<String>, expression: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            expression: expression.into(),
        }
    }

    /// Attach the full source text to errors raised deep inside a sub-expression.
    pub(crate) fn with_expression(mut self, text: &str) -> Self {
        match &mut self {
            Self::Parse { expression, .. }
            | Self::UnsupportedSyntax { expression, .. }
            | Self::UnresolvableReference { expression, .. }
            | Self::IncompatibleOperands { expression, .. }
            | Self::UnknownFunction { expression, .. }
            | Self::Internal { expression, .. }
                if expression.is_empty() =>
            {
                *expression = text.to_string();
            }
            _ => (),
        }
        self
    }
}

pub type Result<T, E = ConversionError> = core::result::Result<T, E>;
