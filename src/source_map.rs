// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::ast::ExprShape;
use crate::error::SourceLocation;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use uuid::Uuid;

/// What kind of construct produced a mapped CEL snippet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum MappingContext {
    Expression,
    Binary,
    Conditional,
    Template,
    Reference,
    Call,
    Literal,
}

impl From<ExprShape> for MappingContext {
    fn from(shape: ExprShape) -> Self {
        match shape {
            ExprShape::Binary | ExprShape::Unary => Self::Binary,
            ExprShape::Conditional => Self::Conditional,
            ExprShape::Template => Self::Template,
            ExprShape::ReferenceChain | ExprShape::Identifier => Self::Reference,
            ExprShape::Call | ExprShape::Arrow => Self::Call,
            ExprShape::Literal => Self::Literal,
            ExprShape::Array | ExprShape::Object => Self::Expression,
        }
    }
}

fn serialize_timestamp<S: Serializer>(t: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&t.to_rfc3339())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceMapEntry {
    pub id: String,
    pub original_expression: String,
    pub cel_expression: String,
    pub source_location: SourceLocation,
    pub context: MappingContext,
    #[serde(serialize_with = "serialize_timestamp")]
    pub timestamp: DateTime<Utc>,
}

/// Ordered record of which JavaScript produced which CEL.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct SourceMap {
    entries: Vec<SourceMapEntry>,
}

impl SourceMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(
        &mut self,
        original: &str,
        cel: &str,
        location: SourceLocation,
        context: MappingContext,
    ) -> &SourceMapEntry {
        self.entries.push(SourceMapEntry {
            id: Uuid::new_v4().to_string(),
            original_expression: original.to_string(),
            cel_expression: cel.to_string(),
            source_location: location,
            context,
            timestamp: Utc::now(),
        });
        &self.entries[self.entries.len() - 1]
    }

    pub fn extend(&mut self, other: SourceMap) {
        self.entries.extend(other.entries);
    }

    pub fn entries(&self) -> &[SourceMapEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<SourceMapEntry> {
        self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SourceMapEntry> {
        self.entries.iter()
    }

    /// Find the JavaScript origin of a CEL snippet, for example one named in
    /// a controller error. Exact matches win; otherwise the smallest entry
    /// whose CEL contains the snippet.
    pub fn lookup(&self, cel: &str) -> Option<&SourceMapEntry> {
        let cel = cel.trim();
        if cel.is_empty() {
            return None;
        }
        self.entries
            .iter()
            .find(|e| e.cel_expression == cel)
            .or_else(|| {
                self.entries
                    .iter()
                    .filter(|e| e.cel_expression.contains(cel))
                    .min_by_key(|e| e.cel_expression.len())
            })
    }

    pub fn get(&self, id: &str) -> Option<&SourceMapEntry> {
        self.entries.iter().find(|e| e.id == id)
    }
}
