// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::catalog::ResourceCatalog;
use crate::cel::{self, CelExpr, CelUnaryOp};
use crate::context::AnalysisContext;
use crate::error::ConversionError;
use crate::marker::{split_path, CelFragment, PathSegment};

use core::fmt;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(tag = "type")]
#[serde(rename_all = "camelCase")]
pub enum CelType {
    Null,
    Bool,
    Number,
    String,

    // Homogenous lists
    List { item: Box<CelType> },

    // Maps with string keys
    Map { value: Box<CelType> },

    // Statically unknown
    Dyn,

    // Conditional branches that disagree. Always flattened and sorted.
    Union { variants: Vec<CelType> },
}

impl CelType {
    pub fn list(item: CelType) -> Self {
        Self::List {
            item: Box::new(item),
        }
    }

    pub fn map(value: CelType) -> Self {
        Self::Map {
            value: Box::new(value),
        }
    }

    /// `T | null`
    pub fn nullable(self) -> Self {
        Self::union(self, Self::Null)
    }

    pub fn union(a: CelType, b: CelType) -> Self {
        if a == b {
            return a;
        }
        let mut variants = BTreeSet::new();
        for t in [a, b] {
            match t {
                Self::Union { variants: vs } => variants.extend(vs),
                t => {
                    variants.insert(t);
                }
            }
        }
        if variants.contains(&Self::Dyn) {
            return Self::Dyn;
        }
        let mut variants: Vec<_> = variants.into_iter().collect();
        if variants.len() == 1 {
            return variants.remove(0);
        }
        Self::Union { variants }
    }

    pub fn is_nullable(&self) -> bool {
        match self {
            Self::Null | Self::Dyn => true,
            Self::Union { variants } => variants.contains(&Self::Null),
            _ => false,
        }
    }

    /// The type with `null` removed from a union.
    pub fn non_null(&self) -> CelType {
        match self {
            Self::Union { variants } => {
                let mut rest: Vec<_> = variants
                    .iter()
                    .filter(|v| **v != Self::Null)
                    .cloned()
                    .collect();
                match rest.len() {
                    0 => Self::Null,
                    1 => rest.remove(0),
                    _ => Self::Union { variants: rest },
                }
            }
            t => t.clone(),
        }
    }

    /// Whether a value of type `other` can stand where `self` is expected.
    pub fn accepts(&self, other: &CelType) -> bool {
        match (self, other) {
            (Self::Dyn, _) | (_, Self::Dyn) => true,
            (Self::Union { variants }, _) => variants.iter().any(|v| v.accepts(other)),
            (_, Self::Union { variants }) => variants.iter().all(|v| self.accepts(v)),
            (Self::List { item: a }, Self::List { item: b }) => a.accepts(b),
            (Self::Map { value: a }, Self::Map { value: b }) => a.accepts(b),
            (a, b) => a == b,
        }
    }

    pub fn is_dyn(&self) -> bool {
        matches!(self, Self::Dyn)
    }

    pub fn is_string(&self) -> bool {
        matches!(self.non_null(), Self::String)
    }
}

impl fmt::Display for CelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool => f.write_str("bool"),
            Self::Number => f.write_str("number"),
            Self::String => f.write_str("string"),
            Self::List { item } => write!(f, "list<{item}>"),
            Self::Map { value } => write!(f, "map<string, {value}>"),
            Self::Dyn => f.write_str("dyn"),
            Self::Union { variants } => {
                for (i, v) in variants.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" | ")?;
                    }
                    write!(f, "{v}")?;
                }
                Ok(())
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct OperatorSignature {
    pub left: CelType,
    pub right: CelType,
    pub returns: CelType,
}

#[derive(Debug, Clone)]
pub struct FunctionSignature {
    /// `None` for global functions.
    pub receiver: Option<CelType>,
    pub params: Vec<CelType>,
    pub variadic: bool,
    pub returns: CelType,
}

fn op(left: CelType, right: CelType, returns: CelType) -> OperatorSignature {
    OperatorSignature {
        left,
        right,
        returns,
    }
}

fn global(params: Vec<CelType>, returns: CelType) -> FunctionSignature {
    FunctionSignature {
        receiver: None,
        params,
        variadic: false,
        returns,
    }
}

fn method(receiver: CelType, params: Vec<CelType>, returns: CelType) -> FunctionSignature {
    FunctionSignature {
        receiver: Some(receiver),
        params,
        variadic: false,
        returns,
    }
}

lazy_static! {
    static ref OPERATORS: HashMap<&'static str, Vec<OperatorSignature>> = {
        use CelType::*;
        let mut m = HashMap::new();
        let ordering = vec![op(Number, Number, Bool), op(String, String, Bool)];
        for o in ["<", "<=", ">", ">="] {
            m.insert(o, ordering.clone());
        }
        m.insert("==", vec![op(Dyn, Dyn, Bool)]);
        m.insert("!=", vec![op(Dyn, Dyn, Bool)]);
        m.insert("&&", vec![op(Bool, Bool, Bool)]);
        m.insert("||", vec![op(Bool, Bool, Bool)]);
        m.insert(
            "+",
            vec![
                op(Number, Number, Number),
                op(String, String, String),
                op(CelType::list(Dyn), CelType::list(Dyn), CelType::list(Dyn)),
            ],
        );
        for o in ["-", "*", "/", "%"] {
            m.insert(o, vec![op(Number, Number, Number)]);
        }
        m.insert(
            "in",
            vec![
                op(Dyn, CelType::list(Dyn), Bool),
                op(String, CelType::map(Dyn), Bool),
            ],
        );
        m
    };

    static ref FUNCTIONS: HashMap<&'static str, Vec<FunctionSignature>> = {
        use CelType::*;
        let mut m: HashMap<&'static str, Vec<FunctionSignature>> = HashMap::new();
        m.insert("has", vec![global(vec![Dyn], Bool)]);
        m.insert(
            "size",
            vec![
                global(vec![Dyn], Number),
                method(String, vec![], Number),
                method(CelType::list(Dyn), vec![], Number),
                method(CelType::map(Dyn), vec![], Number),
            ],
        );
        m.insert("string", vec![global(vec![Dyn], String)]);
        m.insert("int", vec![global(vec![Dyn], Number)]);
        m.insert("uint", vec![global(vec![Dyn], Number)]);
        m.insert("double", vec![global(vec![Dyn], Number)]);
        m.insert("bool", vec![global(vec![Dyn], Bool)]);
        m.insert("dyn", vec![global(vec![Dyn], Dyn)]);
        m.insert("type", vec![global(vec![Dyn], Dyn)]);
        for f in ["contains", "startsWith", "endsWith", "matches"] {
            m.insert(f, vec![method(String, vec![String], Bool)]);
        }
        for f in ["lowerAscii", "upperAscii", "trim"] {
            m.insert(f, vec![method(String, vec![], String)]);
        }
        m.insert(
            "split",
            vec![method(String, vec![String], CelType::list(String))],
        );
        m.insert(
            "join",
            vec![
                method(CelType::list(String), vec![], String),
                method(CelType::list(String), vec![String], String),
            ],
        );
        m.insert(
            "replace",
            vec![
                method(String, vec![String, String], String),
                method(String, vec![String, String, Number], String),
            ],
        );
        m.insert(
            "substring",
            vec![
                method(String, vec![Number], String),
                method(String, vec![Number, Number], String),
            ],
        );
        m.insert("indexOf", vec![method(String, vec![String], Number)]);
        for f in ["math.least", "math.greatest"] {
            m.insert(
                f,
                vec![FunctionSignature {
                    receiver: None,
                    params: vec![Number],
                    variadic: true,
                    returns: Number,
                }],
            );
        }
        for f in ["math.floor", "math.ceil", "math.round", "math.abs"] {
            m.insert(f, vec![global(vec![Number], Number)]);
        }
        m
    };
}

pub fn operator_signatures(op: &str) -> Option<&'static [OperatorSignature]> {
    OPERATORS.get(op).map(|v| v.as_slice())
}

pub fn function_signatures(name: &str) -> Option<&'static [FunctionSignature]> {
    FUNCTIONS.get(name).map(|v| v.as_slice())
}

/// Comprehension macros. Their first argument binds a variable.
const MACROS: [&str; 5] = ["exists", "all", "exists_one", "filter", "map"];

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeMetadata {
    /// The result may be `null` at evaluation time.
    pub nullable: bool,
    pub uses_optional_chaining: bool,
    pub has_guards: bool,
    /// Reference chains the expression reads, in first-seen order.
    pub references: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeInferenceResult {
    pub result_type: CelType,
    pub success: bool,
    pub errors: Vec<ConversionError>,
    pub warnings: Vec<ConversionError>,
    /// Share of leaves whose type was known, in `0..=1`.
    pub confidence: f64,
    pub metadata: TypeMetadata,
}

pub struct TypeInferer<'a> {
    catalog: Arc<ResourceCatalog>,
    resources: &'a BTreeMap<String, String>,
    expression: String,
    locals: Vec<(String, CelType)>,
    errors: Vec<ConversionError>,
    warnings: Vec<ConversionError>,
    known_leaves: usize,
    total_leaves: usize,
    optional_reads: bool,
    metadata: TypeMetadata,
}

/// Infer the result type of a CEL fragment.
pub fn infer_type(fragment: &CelFragment, ctx: &AnalysisContext) -> TypeInferenceResult {
    TypeInferer::new(ctx, &fragment.expression).infer(fragment)
}

impl<'a> TypeInferer<'a> {
    pub fn new(ctx: &'a AnalysisContext, expression: &str) -> Self {
        Self {
            catalog: ctx.catalog().clone(),
            resources: ctx.available_references(),
            expression: expression.to_string(),
            locals: vec![],
            errors: vec![],
            warnings: vec![],
            known_leaves: 0,
            total_leaves: 0,
            optional_reads: false,
            metadata: TypeMetadata::default(),
        }
    }

    pub fn infer(mut self, fragment: &CelFragment) -> TypeInferenceResult {
        let expr = match cel::parse(&fragment.expression) {
            Ok(e) => e,
            Err(e) => {
                return TypeInferenceResult {
                    result_type: CelType::Dyn,
                    success: false,
                    errors: vec![e],
                    warnings: vec![],
                    confidence: 0.0,
                    metadata: TypeMetadata::default(),
                }
            }
        };

        self.metadata.uses_optional_chaining = expr.uses_optional_access();
        let mut result_type = self.check(&expr);
        if let Some(declared) = &fragment.value_type {
            if !declared.accepts(&result_type) {
                self.warnings.push(ConversionError::IncompatibleOperands {
                    operator: "declared type".to_string(),
                    left: declared.to_string(),
                    right: result_type.to_string(),
                    expression: self.expression.clone(),
                });
            } else if result_type.is_dyn() {
                result_type = declared.clone();
            }
        }
        // Unguarded reads of optional fields can surface as null.
        self.metadata.nullable = (result_type.is_nullable() && !result_type.is_dyn())
            || (self.optional_reads
                && !self.metadata.has_guards
                && !self.metadata.uses_optional_chaining);

        let confidence = if self.total_leaves == 0 {
            1.0
        } else {
            self.known_leaves as f64 / self.total_leaves as f64
        };
        debug!(
            expression = %self.expression,
            result = %result_type,
            errors = self.errors.len(),
            confidence,
            "type inference finished"
        );

        TypeInferenceResult {
            result_type,
            success: self.errors.is_empty(),
            errors: self.errors,
            warnings: self.warnings,
            confidence,
            metadata: self.metadata,
        }
    }

    fn leaf(&mut self, t: CelType) -> CelType {
        self.total_leaves += 1;
        if !t.is_dyn() {
            self.known_leaves += 1;
        }
        t
    }

    fn check(&mut self, expr: &CelExpr) -> CelType {
        match expr {
            CelExpr::Null => self.leaf(CelType::Null),
            CelExpr::Bool(_) => self.leaf(CelType::Bool),
            CelExpr::Int(_) | CelExpr::Uint(_) | CelExpr::Double(_) => self.leaf(CelType::Number),
            CelExpr::String(_) => self.leaf(CelType::String),
            CelExpr::Ident(_) | CelExpr::Select { .. } | CelExpr::Index { .. } => {
                self.check_access(expr)
            }
            CelExpr::List(items) => {
                let mut item = None;
                for i in items {
                    let t = self.check(i);
                    item = Some(match item {
                        None => t,
                        Some(prev) => CelType::union(prev, t),
                    });
                }
                CelType::list(item.unwrap_or(CelType::Dyn))
            }
            CelExpr::Map(entries) => {
                let mut value = None;
                for (k, v) in entries {
                    let kt = self.check(k);
                    if !CelType::String.accepts(&kt) {
                        self.incompatible("map key", &CelType::String, &kt);
                    }
                    let t = self.check(v);
                    value = Some(match value {
                        None => t,
                        Some(prev) => CelType::union(prev, t),
                    });
                }
                CelType::map(value.unwrap_or(CelType::Dyn))
            }
            CelExpr::Unary { op, operand } => {
                let t = self.check(operand);
                let expected = match op {
                    CelUnaryOp::Not => CelType::Bool,
                    CelUnaryOp::Neg => CelType::Number,
                };
                if !expected.accepts(&t.non_null()) {
                    self.incompatible(&op.to_string(), &expected, &t);
                }
                expected
            }
            CelExpr::Binary { op, lhs, rhs } => self.check_binary(op, lhs, rhs),
            CelExpr::Conditional {
                condition,
                then,
                otherwise,
            } => {
                let c = self.check(condition);
                if !CelType::Bool.accepts(&c) {
                    self.incompatible("?:", &CelType::Bool, &c);
                }
                let a = self.check(then);
                let b = self.check(otherwise);
                CelType::union(a, b)
            }
            CelExpr::Call {
                target,
                function,
                args,
            } => self.check_call(target.as_deref(), function, args),
        }
    }

    fn incompatible(&mut self, op: &str, left: &CelType, right: &CelType) {
        self.errors.push(ConversionError::IncompatibleOperands {
            operator: op.to_string(),
            left: left.to_string(),
            right: right.to_string(),
            expression: self.expression.clone(),
        });
    }

    fn check_binary(&mut self, op: &str, lhs: &CelExpr, rhs: &CelExpr) -> CelType {
        let l = self.check(lhs);
        let r = self.check(rhs);
        let Some(sigs) = operator_signatures(op) else {
            self.errors.push(ConversionError::UnknownFunction {
                name: op.to_string(),
                expression: self.expression.clone(),
            });
            return CelType::Dyn;
        };

        // Guarded accesses make their operands non-null at evaluation time.
        let (ln, rn) = (l.non_null(), r.non_null());
        let matching: Vec<_> = sigs
            .iter()
            .filter(|s| s.left.accepts(&ln) && s.right.accepts(&rn))
            .collect();
        match matching.as_slice() {
            [] => {
                self.incompatible(op, &l, &r);
                sigs[0].returns.clone()
            }
            [sig] => sig.returns.clone(),
            many => {
                // Several overloads fit dynamic operands; the concrete side decides.
                let concrete = if ln.is_dyn() { &rn } else { &ln };
                many.iter()
                    .find(|s| s.left == *concrete || s.right == *concrete)
                    .or(many.first())
                    .map(|s| {
                        if ln.is_dyn() && rn.is_dyn() && op == "+" {
                            CelType::Dyn
                        } else {
                            s.returns.clone()
                        }
                    })
                    .unwrap_or(CelType::Dyn)
            }
        }
    }

    fn check_access(&mut self, expr: &CelExpr) -> CelType {
        let Some(path) = expr.select_path() else {
            // Dynamic index or access off a call result.
            return match expr {
                CelExpr::Select { operand, field, .. } => {
                    let base = self.check(operand);
                    self.step_type(&base, Some(field))
                }
                CelExpr::Index { operand, index, .. } => {
                    let base = self.check(operand);
                    self.check(index);
                    self.step_type(&base, None)
                }
                _ => self.check(expr),
            };
        };

        let root = expr.root_ident().unwrap_or_default().to_string();
        if let Some((_, t)) = self.locals.iter().rev().find(|(n, _)| *n == root) {
            let t = t.clone();
            let rest: Vec<_> = split_path(&path)
                .map(|s| s.into_iter().skip(1).collect())
                .unwrap_or_default();
            let mut cur = t;
            for seg in rest {
                cur = match seg {
                    PathSegment::Field(f) => self.step_type(&cur, Some(&f)),
                    _ => self.step_type(&cur, None),
                };
            }
            return self.leaf(cur);
        }

        if !self.metadata.references.contains(&path) {
            self.metadata.references.push(path.clone());
        }
        let field_path = path.strip_prefix(root.as_str()).unwrap_or_default();
        let field_path = field_path.strip_prefix('.').unwrap_or(field_path);

        if root == "schema" {
            return self.leaf(CelType::Dyn);
        }

        let Some(kind) = self.resources.get(&root).cloned() else {
            self.errors.push(ConversionError::UnresolvableReference {
                reference: path.clone(),
                message: format!("`{root}` is not a known resource"),
                expression: self.expression.clone(),
                location: None,
            });
            return self.leaf(CelType::Dyn);
        };

        if field_path.is_empty() {
            return self.leaf(CelType::map(CelType::Dyn));
        }
        match self.catalog.lookup(&kind, field_path) {
            Some(info) => {
                trace!(path = %path, ty = %info.ty, "resolved field type");
                if info.optional {
                    self.optional_reads = true;
                }
                self.leaf(info.ty)
            }
            None => {
                if self.catalog.shape(&kind).is_some() {
                    self.warnings.push(ConversionError::UnresolvableReference {
                        reference: path.clone(),
                        message: format!("`{field_path}` is not a known field of {kind}"),
                        expression: self.expression.clone(),
                        location: None,
                    });
                }
                self.leaf(CelType::Dyn)
            }
        }
    }

    fn step_type(&self, base: &CelType, field: Option<&str>) -> CelType {
        match (base.non_null(), field) {
            (CelType::Map { value }, _) => *value,
            (CelType::List { item }, None) => *item,
            (CelType::String, None) => CelType::String,
            _ => CelType::Dyn,
        }
    }

    fn check_call(&mut self, target: Option<&CelExpr>, function: &str, args: &[CelExpr]) -> CelType {
        // `math.least(...)` parses as a method call on the `math` namespace.
        let (target, name) = match target {
            Some(CelExpr::Ident(ns)) if ns == "math" && !self.is_local(ns) => {
                (None, format!("math.{function}"))
            }
            t => (t, function.to_string()),
        };

        if let Some(receiver) = target {
            if MACROS.contains(&name.as_str()) {
                return self.check_macro(receiver, &name, args);
            }
            if name == "orValue" {
                let r = self.check(receiver);
                let d = args.first().map(|a| self.check(a)).unwrap_or(CelType::Dyn);
                return CelType::union(r.non_null(), d);
            }
        }

        if name == "has" {
            self.metadata.has_guards = true;
            for a in args {
                // `has()` tolerates absent fields; do not count them as optional reads.
                let optional_reads = self.optional_reads;
                self.check(a);
                self.optional_reads = optional_reads;
            }
            return CelType::Bool;
        }

        let receiver_type = target.map(|t| self.check(t));
        let arg_types: Vec<_> = args.iter().map(|a| self.check(a)).collect();

        let Some(sigs) = function_signatures(&name) else {
            self.errors.push(ConversionError::UnknownFunction {
                name,
                expression: self.expression.clone(),
            });
            return CelType::Dyn;
        };

        let found = sigs.iter().find(|s| {
            let receiver_ok = match (&s.receiver, &receiver_type) {
                (None, None) => true,
                (Some(e), Some(r)) => e.accepts(&r.non_null()),
                _ => false,
            };
            let arity_ok = if s.variadic {
                !arg_types.is_empty()
            } else {
                s.params.len() == arg_types.len()
            };
            let params_ok = arg_types.iter().enumerate().all(|(i, a)| {
                let p = s.params.get(i).or(s.params.last());
                p.is_some_and(|p| p.accepts(&a.non_null()))
            });
            receiver_ok && arity_ok && params_ok
        });

        match found {
            Some(sig) => sig.returns.clone(),
            None => {
                let left = receiver_type
                    .map(|r| r.to_string())
                    .unwrap_or_else(|| "()".to_string());
                let right = arg_types
                    .iter()
                    .map(|t| t.to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                self.errors.push(ConversionError::IncompatibleOperands {
                    operator: name,
                    left,
                    right,
                    expression: self.expression.clone(),
                });
                sigs[0].returns.clone()
            }
        }
    }

    fn check_macro(&mut self, receiver: &CelExpr, name: &str, args: &[CelExpr]) -> CelType {
        let range = self.check(receiver);
        let (var, body) = match args {
            [CelExpr::Ident(var), body] => (var.clone(), body),
            _ => {
                self.errors.push(ConversionError::IncompatibleOperands {
                    operator: name.to_string(),
                    left: range.to_string(),
                    right: format!("{} arguments", args.len()),
                    expression: self.expression.clone(),
                });
                return CelType::Dyn;
            }
        };
        let item = match range.non_null() {
            CelType::List { item } => *item,
            CelType::Map { .. } => CelType::String,
            CelType::Dyn => CelType::Dyn,
            other => {
                self.incompatible(name, &CelType::list(CelType::Dyn), &other);
                CelType::Dyn
            }
        };

        self.locals.push((var, item.clone()));
        let body_type = self.check(body);
        self.locals.pop();

        match name {
            "map" => CelType::list(body_type),
            "filter" => {
                if !CelType::Bool.accepts(&body_type) {
                    self.incompatible(name, &CelType::Bool, &body_type);
                }
                CelType::list(item)
            }
            _ => {
                if !CelType::Bool.accepts(&body_type) {
                    self.incompatible(name, &CelType::Bool, &body_type);
                }
                CelType::Bool
            }
        }
    }

    fn is_local(&self, name: &str) -> bool {
        self.locals.iter().any(|(n, _)| n == name)
    }
}
