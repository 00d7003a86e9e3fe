// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::catalog::ResourceCatalog;
use crate::detector::DEFAULT_MAX_DEPTH;
use crate::marker::{RefKind, Reference};
use crate::value::Value;

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Deployment back-end an expression is converted for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FactoryKind {
    /// References may stay unconverted and be resolved by the calling engine.
    Direct,
    /// Everything becomes CEL text for the controller.
    #[default]
    Kro,
}

/// Where the converted expression ends up in a composition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExpressionKind {
    #[default]
    Status,
    ResourceField,
    ReadyWhen,
    IncludeWhen,
}

impl ExpressionKind {
    /// Kinds whose expressions must evaluate to a boolean.
    pub fn requires_bool(&self) -> bool {
        matches!(self, Self::ReadyWhen | Self::IncludeWhen)
    }
}

/// How a possibly absent field is protected in emitted CEL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NullSafety {
    /// `has(a.b) && a.b.c`
    HasGuards,
    /// `a.?b.?c`
    KroOptional,
    /// `a.b != null && a.b.c`
    NullCheck,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct ConversionOptions {
    pub factory: FactoryKind,
    pub max_depth: usize,
    pub generate_has_checks: bool,
    pub use_kro_conditionals: bool,
    /// Treat fields of unknown optionality as possibly absent.
    pub conservative: bool,
    /// Guard every flagged reference, not only those written with `?.`.
    pub auto_null_safety: bool,
    pub include_source_map: bool,
    pub validate_types: bool,
    /// In direct mode, still convert references to resources of the composition.
    pub direct_convert_internal: bool,
}

impl Default for ConversionOptions {
    fn default() -> Self {
        Self {
            factory: FactoryKind::default(),
            max_depth: DEFAULT_MAX_DEPTH,
            generate_has_checks: true,
            use_kro_conditionals: false,
            conservative: true,
            auto_null_safety: false,
            include_source_map: true,
            validate_types: false,
            direct_convert_internal: true,
        }
    }
}

impl ConversionOptions {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    #[cfg(feature = "yaml")]
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// The guard pattern used when a field needs protection.
    pub fn null_safety(&self) -> NullSafety {
        if self.generate_has_checks {
            NullSafety::HasGuards
        } else if self.use_kro_conditionals {
            NullSafety::KroOptional
        } else {
            NullSafety::NullCheck
        }
    }
}

/// Read-only inputs of one analysis call.
#[derive(Debug, Clone)]
pub struct AnalysisContext {
    expression_kind: ExpressionKind,
    available_references: BTreeMap<String, String>,
    bindings: BTreeMap<String, Value>,
    dependencies: Vec<Reference>,
    options: ConversionOptions,
    catalog: Arc<ResourceCatalog>,
}

impl Default for AnalysisContext {
    fn default() -> Self {
        Self::new()
    }
}

impl AnalysisContext {
    pub fn new() -> Self {
        Self {
            expression_kind: ExpressionKind::default(),
            available_references: BTreeMap::new(),
            bindings: BTreeMap::new(),
            dependencies: vec![],
            options: ConversionOptions::default(),
            catalog: ResourceCatalog::builtin(),
        }
    }

    pub fn with_expression_kind(mut self, kind: ExpressionKind) -> Self {
        self.expression_kind = kind;
        self
    }

    pub fn with_factory(mut self, factory: FactoryKind) -> Self {
        self.options.factory = factory;
        self
    }

    /// Declare a resource of the composition. `kind` selects its catalog shape.
    pub fn with_resource(mut self, id: &str, kind: &str) -> Self {
        self.available_references
            .insert(id.to_string(), kind.to_string());
        self
    }

    pub fn with_binding(mut self, name: &str, value: Value) -> Self {
        self.bindings.insert(name.to_string(), value);
        self
    }

    pub fn with_dependencies(mut self, dependencies: Vec<Reference>) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn with_options(mut self, options: ConversionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_catalog(mut self, catalog: Arc<ResourceCatalog>) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn expression_kind(&self) -> ExpressionKind {
        self.expression_kind
    }

    pub fn factory(&self) -> FactoryKind {
        self.options.factory
    }

    pub fn available_references(&self) -> &BTreeMap<String, String> {
        &self.available_references
    }

    pub fn bindings(&self) -> &BTreeMap<String, Value> {
        &self.bindings
    }

    /// References the enclosing composition already depends on.
    pub fn dependencies(&self) -> &[Reference] {
        &self.dependencies
    }

    pub fn options(&self) -> &ConversionOptions {
        &self.options
    }

    pub fn options_mut(&mut self) -> &mut ConversionOptions {
        &mut self.options
    }

    pub fn catalog(&self) -> &Arc<ResourceCatalog> {
        &self.catalog
    }

    pub fn is_known_resource(&self, id: &str) -> bool {
        self.available_references.contains_key(id)
            || self.dependencies.iter().any(|d| d.resource_id() == id)
    }

    /// Schema references always belong to the composition.
    pub fn is_internal(&self, reference: &Reference) -> bool {
        match reference.kind() {
            RefKind::Schema => true,
            RefKind::Resource => self.is_known_resource(reference.resource_id()),
        }
    }

    /// Catalog kind declared for a resource id.
    pub fn resource_kind(&self, id: &str) -> Option<&str> {
        self.available_references.get(id).map(|k| k.as_str())
    }
}
