// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::error::{ConversionError, Result};
use crate::typing::CelType;

use core::fmt;
use serde::{Deserialize, Serialize};

/// Resource id historically used to mark schema references. Kept so that
/// markers produced by older proxy layers still classify correctly.
pub const SCHEMA_RESOURCE_ID: &str = "__schema__";

/// Brand key identifying a serialized reference marker.
pub const REFERENCE_BRAND: &str = "__reference";

/// Brand key identifying a serialized CEL fragment.
pub const CEL_BRAND: &str = "__cel";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RefKind {
    Schema,
    Resource,
}

/// A value standing in for "read `field_path` from `resource_id` at evaluation time".
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "RawReference")]
pub struct Reference {
    kind: RefKind,
    resource_id: String,
    field_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    value_type: Option<CelType>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawReference {
    #[serde(default)]
    kind: Option<RefKind>,
    resource_id: String,
    field_path: String,
    #[serde(default)]
    value_type: Option<CelType>,
}

impl TryFrom<RawReference> for Reference {
    type Error = ConversionError;

    fn try_from(raw: RawReference) -> Result<Self> {
        let kind = match raw.kind {
            Some(kind) => kind,
            None if raw.resource_id == SCHEMA_RESOURCE_ID => RefKind::Schema,
            None => RefKind::Resource,
        };
        let mut r = Reference::new(kind, raw.resource_id, raw.field_path)?;
        r.value_type = raw.value_type;
        Ok(r)
    }
}

impl Reference {
    pub fn new(
        kind: RefKind,
        resource_id: impl Into<String>,
        field_path: impl Into<String>,
    ) -> Result<Self> {
        let resource_id = match kind {
            RefKind::Schema => SCHEMA_RESOURCE_ID.to_string(),
            RefKind::Resource => resource_id.into(),
        };
        let field_path = field_path.into();

        if kind == RefKind::Resource && (resource_id.is_empty() || resource_id == SCHEMA_RESOURCE_ID)
        {
            return Err(ConversionError::InvalidReference(format!(
                "invalid resource id `{resource_id}`"
            )));
        }
        if field_path.is_empty() {
            return Err(ConversionError::InvalidReference(format!(
                "empty field path for `{resource_id}`"
            )));
        }
        if field_path.contains(REFERENCE_BRAND) || field_path.contains(CEL_BRAND) {
            return Err(ConversionError::InvalidReference(format!(
                "field path `{field_path}` contains a marker brand"
            )));
        }
        let segments = split_path(&field_path)?;
        if segments.is_empty() {
            return Err(ConversionError::InvalidReference(format!(
                "field path `{field_path}` has no segments"
            )));
        }

        Ok(Self {
            kind,
            resource_id,
            field_path,
            value_type: None,
        })
    }

    pub fn resource(resource_id: impl Into<String>, field_path: impl Into<String>) -> Result<Self> {
        Self::new(RefKind::Resource, resource_id, field_path)
    }

    pub fn schema(field_path: impl Into<String>) -> Result<Self> {
        Self::new(RefKind::Schema, SCHEMA_RESOURCE_ID, field_path)
    }

    pub fn with_type(mut self, value_type: CelType) -> Self {
        self.value_type = Some(value_type);
        self
    }

    pub fn kind(&self) -> RefKind {
        self.kind
    }

    pub fn is_schema(&self) -> bool {
        self.kind == RefKind::Schema
    }

    pub fn resource_id(&self) -> &str {
        &self.resource_id
    }

    pub fn field_path(&self) -> &str {
        &self.field_path
    }

    pub fn value_type(&self) -> Option<&CelType> {
        self.value_type.as_ref()
    }

    /// Identifier the reference is rooted at in emitted CEL.
    pub fn cel_root(&self) -> &str {
        match self.kind {
            RefKind::Schema => "schema",
            RefKind::Resource => &self.resource_id,
        }
    }

    pub fn segments(&self) -> Vec<PathSegment> {
        // Validated on construction.
        split_path(&self.field_path).unwrap_or_default()
    }

    /// First field of the path, e.g. `status` or `spec`.
    pub fn top_level_field(&self) -> &str {
        let end = self
            .field_path
            .find(['.', '['])
            .unwrap_or(self.field_path.len());
        &self.field_path[..end]
    }

    /// Bare CEL access text, e.g. `deployment.status.readyReplicas`.
    pub fn cel_path(&self) -> String {
        let mut s = String::from(self.cel_root());
        for seg in self.segments() {
            seg.render_into(&mut s, false);
        }
        s
    }

    /// Extend the reference with further segments.
    pub fn join(&self, segments: &[PathSegment]) -> Result<Self> {
        let mut path = self.field_path.clone();
        for seg in segments {
            seg.render_path_into(&mut path);
        }
        let mut r = Self::new(self.kind, self.resource_id.clone(), path)?;
        r.value_type = None;
        Ok(r)
    }

    pub fn has_array_index(&self) -> bool {
        self.segments()
            .iter()
            .any(|s| matches!(s, PathSegment::Index(_)))
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.cel_path())
    }
}

/// A value already known to be valid CEL text. Never re-parsed as JavaScript.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CelFragment {
    pub expression: String,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub value_type: Option<CelType>,
}

impl CelFragment {
    pub fn new(expression: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
            value_type: None,
        }
    }

    pub fn typed(expression: impl Into<String>, value_type: CelType) -> Self {
        Self {
            expression: expression.into(),
            value_type: Some(value_type),
        }
    }
}

impl fmt::Display for CelFragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expression)
    }
}

/// One step of a field path.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PathSegment {
    Field(String),
    Index(u64),
    Key(String),
}

impl PathSegment {
    /// Append the CEL rendering of this segment. `optional` selects the
    /// `.?field` / `[?idx]` forms.
    pub fn render_into(&self, out: &mut String, optional: bool) {
        let q = if optional { "?" } else { "" };
        match self {
            Self::Field(f) => {
                out.push('.');
                out.push_str(q);
                out.push_str(f);
            }
            Self::Index(i) => {
                out.push('[');
                out.push_str(q);
                out.push_str(&i.to_string());
                out.push(']');
            }
            Self::Key(k) => {
                out.push('[');
                out.push_str(q);
                out.push_str(&quote_cel_string(k));
                out.push(']');
            }
        }
    }

    fn render_path_into(&self, path: &mut String) {
        match self {
            Self::Field(f) => {
                if !path.is_empty() {
                    path.push('.');
                }
                path.push_str(f);
            }
            Self::Index(_) | Self::Key(_) => self.render_into(path, false),
        }
    }
}

/// Render segments back into field-path form, e.g. `spec.ports[0].name`.
pub fn join_path(segments: &[PathSegment]) -> String {
    let mut path = String::new();
    for seg in segments {
        seg.render_path_into(&mut path);
    }
    path
}

pub fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => (),
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Split a dotted field path with optional `[0]` / `["key"]` segments.
pub fn split_path(path: &str) -> Result<Vec<PathSegment>> {
    let invalid = |msg: &str| ConversionError::InvalidReference(format!("{msg} in `{path}`"));
    let bytes = path.as_bytes();
    let mut segments = vec![];
    let mut i = 0;
    let mut expect_field = true;

    while i < bytes.len() {
        match bytes[i] {
            b'.' => {
                if expect_field {
                    return Err(invalid("empty segment"));
                }
                expect_field = true;
                i += 1;
            }
            b'[' => {
                let close = path[i..]
                    .find(']')
                    .map(|p| p + i)
                    .ok_or_else(|| invalid("unterminated `[`"))?;
                let inner = &path[i + 1..close];
                if let Ok(idx) = inner.parse::<u64>() {
                    segments.push(PathSegment::Index(idx));
                } else if inner.len() >= 2
                    && (inner.starts_with('"') && inner.ends_with('"')
                        || inner.starts_with('\'') && inner.ends_with('\''))
                {
                    segments.push(PathSegment::Key(inner[1..inner.len() - 1].to_string()));
                } else {
                    return Err(invalid("invalid index"));
                }
                expect_field = false;
                i = close + 1;
            }
            _ => {
                let end = path[i..]
                    .find(['.', '['])
                    .map(|p| p + i)
                    .unwrap_or(path.len());
                segments.push(PathSegment::Field(path[i..end].to_string()));
                expect_field = false;
                i = end;
            }
        }
    }

    if expect_field && !segments.is_empty() {
        return Err(invalid("trailing `.`"));
    }
    Ok(segments)
}

/// Quote a string as a CEL double-quoted literal.
pub fn quote_cel_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for ch in s.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}
