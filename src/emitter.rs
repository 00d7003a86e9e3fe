// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Conversion of parsed JavaScript expressions into CEL text.
//!
//! Every node is emitted as a [`Fragment`] that records the CEL precedence of
//! its text, so parents insert parentheses only where CEL would otherwise
//! regroup operands. Null-safety guards for `has()`/`!= null` modes travel
//! beside the text and are attached at the nearest boolean boundary: a
//! comparison, a logical operand, a conditional test or the top level.

use crate::ast::*;
use crate::context::{AnalysisContext, NullSafety};
use crate::error::{ConversionError, Result};
use crate::lexer::Span;
use crate::marker::{
    is_identifier, join_path, quote_cel_string, CelFragment, PathSegment, RefKind, Reference,
};
use crate::optionality;
use crate::parser::parse_expression;
use crate::source_map::{MappingContext, SourceMap};
use crate::typing::CelType;
use crate::value::Value;

use std::collections::BTreeMap;

use tracing::{trace, warn};

/// CEL operator precedence, loosest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
    Conditional,
    Or,
    And,
    Relation,
    Additive,
    Multiplicative,
    Unary,
    Primary,
}

impl Precedence {
    fn tighter(self) -> Precedence {
        match self {
            Self::Conditional => Self::Or,
            Self::Or => Self::And,
            Self::And => Self::Relation,
            Self::Relation => Self::Additive,
            Self::Additive => Self::Multiplicative,
            Self::Multiplicative => Self::Unary,
            Self::Unary | Self::Primary => Self::Primary,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
    pub text: String,
    pub prec: Precedence,
    pub ty: CelType,
    /// Conditions that must hold before `text` may be evaluated.
    pub guards: Vec<String>,
    /// `text` is a bare access path.
    pub access: bool,
}

impl Fragment {
    fn new(text: impl Into<String>, prec: Precedence, ty: CelType) -> Self {
        Self {
            text: text.into(),
            prec,
            ty,
            guards: vec![],
            access: false,
        }
    }

    fn access_path(text: impl Into<String>, ty: CelType) -> Self {
        Self {
            access: true,
            ..Self::new(text, Precedence::Primary, ty)
        }
    }

    /// Text of this fragment, parenthesized if it binds looser than `min`.
    pub fn at(&self, min: Precedence) -> String {
        if self.prec < min {
            format!("({})", self.text)
        } else {
            self.text.clone()
        }
    }

    fn with_guards(mut self, guards: Vec<String>) -> Self {
        merge_guards(&mut self.guards, guards);
        self
    }

    /// Fold pending guards into the text.
    ///
    /// Access paths and boolean fragments become a conjunction. Any other
    /// fragment becomes a conditional falling back to `""` for strings and
    /// `null` otherwise, so that the result keeps its type.
    pub fn materialize(self) -> Fragment {
        if self.guards.is_empty() {
            return self;
        }
        let guards = self.guards.join(" && ");
        if self.access || self.ty.non_null() == CelType::Bool {
            let text = format!("{guards} && {}", self.at(Precedence::And));
            return Fragment::new(text, Precedence::And, self.ty);
        }

        let (otherwise, ty) = if self.ty.is_string() {
            ("\"\"", CelType::String)
        } else {
            ("null", self.ty.clone().nullable())
        };
        let text = format!("{guards} ? {} : {otherwise}", self.at(Precedence::Or));
        Fragment::new(text, Precedence::Conditional, ty)
    }

    /// An existing CEL fragment spliced in verbatim.
    pub fn from_cel(cel: &CelFragment) -> Self {
        let text = cel.expression.trim();
        let simple = !text.is_empty()
            && text
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.');
        let prec = if simple {
            Precedence::Primary
        } else {
            Precedence::Conditional
        };
        Fragment::new(
            text,
            prec,
            cel.value_type.clone().unwrap_or(CelType::Dyn),
        )
    }
}

fn merge_guards(into: &mut Vec<String>, from: Vec<String>) {
    for g in from {
        if !into.contains(&g) {
            into.push(g);
        }
    }
}

/// Output of converting one expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Emission {
    pub expression: String,
    pub value_type: CelType,
    /// Every reference occurrence, in source order.
    pub dependencies: Vec<Reference>,
    pub source_map: SourceMap,
    pub warnings: Vec<ConversionError>,
    /// Set when the whole expression is a single plain reference chain.
    pub reference: Option<Reference>,
}

/// Binding of an arrow parameter to a well-known root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootAlias {
    Schema,
    Resources,
}

#[derive(Debug, Clone, PartialEq)]
enum ChainRoot {
    Resource(String),
    Schema,
    Local(String),
    Expr(Fragment),
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Static(PathSegment),
    Dynamic(Fragment),
}

#[derive(Debug, Clone, PartialEq)]
struct Link {
    segment: Segment,
    optional: bool,
}

#[derive(Debug, Clone, PartialEq)]
struct Chain {
    root: ChainRoot,
    links: Vec<Link>,
    declared: Option<CelType>,
}

impl Chain {
    fn from_reference(r: &Reference) -> Self {
        let root = match r.kind() {
            RefKind::Schema => ChainRoot::Schema,
            RefKind::Resource => ChainRoot::Resource(r.resource_id().to_string()),
        };
        Self {
            root,
            links: r
                .segments()
                .into_iter()
                .map(|s| Link {
                    segment: Segment::Static(s),
                    optional: false,
                })
                .collect(),
            declared: r.value_type().cloned(),
        }
    }

    fn push(&mut self, segment: Segment, optional: bool) {
        self.links.push(Link { segment, optional });
        self.declared = None;
    }

    fn is_reference(&self) -> bool {
        matches!(self.root, ChainRoot::Resource(_) | ChainRoot::Schema)
    }

    fn static_segments(&self) -> Vec<PathSegment> {
        self.links
            .iter()
            .map_while(|l| match &l.segment {
                Segment::Static(s) => Some(s.clone()),
                Segment::Dynamic(_) => None,
            })
            .collect()
    }

    fn is_fully_static(&self) -> bool {
        self.links
            .iter()
            .all(|l| matches!(l.segment, Segment::Static(_)))
    }

    /// The reference this chain reads, up to its first dynamic segment.
    fn reference(&self) -> Option<Reference> {
        let path = join_path(&self.static_segments());
        if path.is_empty() {
            return None;
        }
        match &self.root {
            ChainRoot::Resource(id) => Reference::resource(id.clone(), path).ok(),
            ChainRoot::Schema => Reference::schema(path).ok(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
enum Resolved {
    Chain(Chain),
    Static(Value),
    Global(String),
    Fragment(Fragment),
}

const GLOBALS: [&str; 11] = [
    "Math", "String", "Number", "Boolean", "parseInt", "parseFloat", "JSON", "Object", "Array",
    "Date", "console",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PartKind {
    Root,
    Field,
    Index(u64),
    Key(String),
    Dynamic,
}

/// One printable step of an access path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Part {
    pub text: String,
    pub kind: PartKind,
    pub optional: bool,
}

impl Part {
    fn root(text: &str) -> Self {
        Self {
            text: text.to_string(),
            kind: PartKind::Root,
            optional: false,
        }
    }

    fn from_segment(seg: &PathSegment, optional: bool) -> Self {
        let mut text = String::new();
        seg.render_into(&mut text, false);
        let kind = match seg {
            PathSegment::Field(_) => PartKind::Field,
            PathSegment::Index(i) => PartKind::Index(*i),
            PathSegment::Key(k) => PartKind::Key(k.clone()),
        };
        Self {
            text,
            kind,
            optional,
        }
    }

    fn optional_text(&self) -> String {
        match self.kind {
            PartKind::Root => self.text.clone(),
            PartKind::Field => format!(".?{}", &self.text[1..]),
            _ => format!("[?{}", &self.text[1..]),
        }
    }
}

fn concat(parts: &[Part]) -> String {
    parts.iter().map(|p| p.text.as_str()).collect()
}

/// Render an access path with the requested null-safety pattern.
///
/// Parts before `skip` are never guarded. `force` guards every later part,
/// otherwise only those marked optional (and, for guard patterns, every part
/// once any is optional).
pub(crate) fn render_access(
    parts: &[Part],
    skip: usize,
    strategy: Option<NullSafety>,
    force: bool,
) -> (String, Vec<String>) {
    let full = concat(parts);
    let Some(strategy) = strategy else {
        return (full, vec![]);
    };

    let mut guards = vec![];
    match strategy {
        NullSafety::HasGuards => {
            for i in skip.max(1)..parts.len() {
                let base = concat(&parts[..i]);
                match &parts[i].kind {
                    PartKind::Field => guards.push(format!("has({}{})", base, parts[i].text)),
                    PartKind::Index(n) => guards.push(format!("size({base}) > {n}")),
                    PartKind::Key(k) => guards.push(format!("{} in {base}", quote_cel_string(k))),
                    PartKind::Root | PartKind::Dynamic => (),
                }
            }
            (full, guards)
        }
        NullSafety::NullCheck => {
            for i in skip.max(1)..parts.len().saturating_sub(1) {
                guards.push(format!("{} != null", concat(&parts[..=i])));
            }
            (full, guards)
        }
        NullSafety::KroOptional => {
            let text = parts
                .iter()
                .enumerate()
                .map(|(i, p)| {
                    if i >= skip && (force || p.optional) {
                        p.optional_text()
                    } else {
                        p.text.clone()
                    }
                })
                .collect();
            (text, vec![])
        }
    }
}

/// Leading parts that are never guarded: the resource id, or `schema.spec`.
fn root_width(kind: RefKind) -> usize {
    match kind {
        RefKind::Resource => 1,
        RefKind::Schema => 2,
    }
}

fn reference_parts(r: &Reference) -> Vec<Part> {
    let mut parts = vec![Part::root(r.cel_root())];
    parts.extend(r.segments().iter().map(|s| Part::from_segment(s, false)));
    parts
}

/// Guards protecting every optional step of a reference.
pub fn reference_guards(r: &Reference, strategy: NullSafety) -> Vec<String> {
    render_access(&reference_parts(r), root_width(r.kind()), Some(strategy), true).1
}

/// Null-safe CEL reading a reference, guards included.
pub fn null_safe_reference(r: &Reference, strategy: NullSafety) -> String {
    let parts = reference_parts(r);
    let (text, guards) = render_access(&parts, root_width(r.kind()), Some(strategy), true);
    let mut f = Fragment::access_path(text, CelType::Dyn);
    f.guards = guards;
    f.materialize().text
}

// 2^53
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_992.0;

/// CEL text of a JavaScript number.
pub fn format_cel_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < MAX_SAFE_INTEGER {
        format!("{}", value as i64)
    } else if value.fract() == 0.0 {
        format!("{value:e}")
    } else {
        format!("{value}")
    }
}

pub struct Emitter<'a> {
    ctx: &'a AnalysisContext,
    locals: Vec<String>,
    aliases: BTreeMap<String, RootAlias>,
    dependencies: Vec<Reference>,
    warnings: Vec<ConversionError>,
    source_map: SourceMap,
    depth: usize,
}

/// Parse and convert an expression.
pub fn emit_expression(text: &str, ctx: &AnalysisContext) -> Result<Emission> {
    let expr = parse_expression(text)?;
    Emitter::new(ctx).emit(&expr)
}

impl<'a> Emitter<'a> {
    pub fn new(ctx: &'a AnalysisContext) -> Self {
        Self {
            ctx,
            locals: vec![],
            aliases: BTreeMap::new(),
            dependencies: vec![],
            warnings: vec![],
            source_map: SourceMap::new(),
            depth: 0,
        }
    }

    /// Make `name` stand for the schema or the resources root.
    pub fn with_alias(mut self, name: &str, alias: RootAlias) -> Self {
        self.aliases.insert(name.to_string(), alias);
        self
    }

    pub fn emit(mut self, expr: &Expr) -> Result<Emission> {
        let source = expr.span().source.contents().clone();
        let reference = match expr {
            Expr::Member { .. } | Expr::Index { .. } | Expr::Ident { .. } => {
                match self.resolve(expr).map_err(|e| e.with_expression(&source))? {
                    Resolved::Chain(c) if c.is_reference() && c.is_fully_static() => {
                        c.reference()
                    }
                    _ => None,
                }
            }
            _ => None,
        };
        // Resolution above only classified the chain; start over cleanly.
        self.dependencies.clear();
        self.warnings.clear();
        self.source_map = SourceMap::new();

        let fragment = self
            .emit_node(expr)
            .map_err(|e| e.with_expression(&source))?
            .materialize();

        trace!(
            cel = %fragment.text,
            dependencies = self.dependencies.len(),
            "emitted expression"
        );
        Ok(Emission {
            expression: fragment.text,
            value_type: fragment.ty,
            dependencies: self.dependencies,
            source_map: self.source_map,
            warnings: self.warnings,
            reference,
        })
    }

    /// Convert a lone reference marker.
    pub fn emit_reference(mut self, r: &Reference) -> Result<Emission> {
        let chain = Chain::from_reference(r);
        let fragment = self.render_chain(&chain)?.materialize();
        Ok(Emission {
            expression: fragment.text,
            value_type: fragment.ty,
            dependencies: self.dependencies,
            source_map: self.source_map,
            warnings: self.warnings,
            reference: Some(r.clone()),
        })
    }

    /// Convert a proxy value: markers, fragments and static data.
    pub fn emit_value(mut self, value: &Value) -> Result<Emission> {
        let fragment = self.render_value(value, 0, &mut vec![])?.materialize();
        Ok(Emission {
            expression: fragment.text,
            value_type: fragment.ty,
            dependencies: self.dependencies,
            source_map: self.source_map,
            warnings: self.warnings,
            reference: value.as_reference().cloned(),
        })
    }

    fn unresolvable(&mut self, span: &Span, reference: &str, msg: &str) {
        warn!(reference, "{msg}");
        self.warnings.push(span.unresolvable(reference, msg));
    }

    fn map_source(&mut self, expr: &Expr, f: &Fragment) {
        if !self.ctx.options().include_source_map {
            return;
        }
        let span = expr.span();
        self.source_map.add(
            span.text(),
            &f.text,
            span.location(),
            MappingContext::from(expr.shape()),
        );
    }

    pub fn emit_node(&mut self, expr: &Expr) -> Result<Fragment> {
        self.depth += 1;
        if self.depth > 2 * crate::parser::MAX_NESTING_DEPTH {
            return Err(expr.span().error("expression nesting too deep"));
        }
        let f = self.emit_node_inner(expr)?;
        self.depth -= 1;

        if !matches!(expr.shape(), crate::ast::ExprShape::Literal) {
            self.map_source(expr, &f);
        }
        Ok(f)
    }

    fn emit_node_inner(&mut self, expr: &Expr) -> Result<Fragment> {
        use Precedence::*;
        match expr {
            Expr::Null { .. } | Expr::Undefined { .. } => Ok(Fragment::new("null", Primary, CelType::Null)),
            Expr::Bool { value, .. } => Ok(Fragment::new(value.to_string(), Primary, CelType::Bool)),
            Expr::Number { value, .. } => {
                Ok(Fragment::new(format_cel_number(*value), Primary, CelType::Number))
            }
            Expr::String { value, .. } => {
                Ok(Fragment::new(quote_cel_string(value), Primary, CelType::String))
            }
            Expr::Ident { .. } | Expr::Member { .. } | Expr::Index { .. } => {
                let r = self.resolve(expr)?;
                self.realize(r, expr.span())
            }
            Expr::Template { quasis, exprs, .. } => self.emit_template(quasis, exprs),
            Expr::Array { items, .. } => {
                let mut texts = vec![];
                let mut item_ty: Option<CelType> = None;
                for item in items {
                    let f = self.emit_node(item)?.materialize();
                    item_ty = Some(match item_ty {
                        None => f.ty.clone(),
                        Some(t) => CelType::union(t, f.ty.clone()),
                    });
                    texts.push(f.text);
                }
                Ok(Fragment::new(
                    format!("[{}]", texts.join(", ")),
                    Primary,
                    CelType::list(item_ty.unwrap_or(CelType::Dyn)),
                ))
            }
            Expr::Object { fields, .. } => {
                let mut entries = vec![];
                for (_, key, value) in fields {
                    let f = self.emit_node(value)?.materialize();
                    entries.push(format!("{}: {}", quote_cel_string(key), f.text));
                }
                Ok(Fragment::new(
                    format!("{{{}}}", entries.join(", ")),
                    Primary,
                    CelType::map(CelType::Dyn),
                ))
            }
            Expr::Unary { op, expr: operand, .. } => {
                let f = self.emit_node(operand)?;
                match op {
                    UnaryOp::Not => {
                        let f = f.materialize();
                        Ok(Fragment::new(format!("!{}", f.at(Unary)), Unary, CelType::Bool))
                    }
                    UnaryOp::Neg => {
                        let guards = f.guards.clone();
                        Ok(
                            Fragment::new(format!("-{}", f.at(Unary)), Unary, CelType::Number)
                                .with_guards(guards),
                        )
                    }
                }
            }
            Expr::Binary { op, lhs, rhs, .. } => self.emit_binary(*op, lhs, rhs),
            Expr::Logical { op, lhs, rhs, .. } => match op {
                LogicalOp::Nullish => self.emit_nullish(lhs, rhs),
                LogicalOp::And | LogicalOp::Or => {
                    let prec = if *op == LogicalOp::And { And } else { Or };
                    let l = self.emit_node(lhs)?.materialize();
                    let r = self.emit_node(rhs)?.materialize();
                    let ty = if l.ty == CelType::Bool && r.ty == CelType::Bool {
                        CelType::Bool
                    } else {
                        CelType::Dyn
                    };
                    Ok(Fragment::new(
                        format!("{} {} {}", l.at(prec), op.js_text(), r.at(prec.tighter())),
                        prec,
                        ty,
                    ))
                }
            },
            Expr::Conditional {
                test,
                consequent,
                alternate,
                ..
            } => {
                let t = self.emit_node(test)?.materialize();
                let c = self.emit_node(consequent)?.materialize();
                let a = self.emit_node(alternate)?.materialize();
                Ok(Fragment::new(
                    format!("{} ? {} : {}", t.at(Or), c.at(Or), a.at(Conditional)),
                    Conditional,
                    CelType::union(c.ty, a.ty),
                ))
            }
            Expr::Call { callee, args, span } => self.emit_call(span, callee, args),
            Expr::Arrow { span, .. } => Err(span.unsupported(
                "arrow functions are only supported as array method predicates",
            )),
        }
    }

    fn emit_binary(&mut self, op: BinaryOp, lhs: &Expr, rhs: &Expr) -> Result<Fragment> {
        let mut l = self.emit_node(lhs)?;
        let mut r = self.emit_node(rhs)?;
        let prec = match op {
            BinaryOp::Add | BinaryOp::Sub => Precedence::Additive,
            BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => Precedence::Multiplicative,
            _ => Precedence::Relation,
        };

        let mut ty = match op {
            _ if op.is_relational() => CelType::Bool,
            BinaryOp::Add if l.ty.is_string() || r.ty.is_string() => CelType::String,
            BinaryOp::Add if l.ty.is_dyn() || r.ty.is_dyn() => CelType::Dyn,
            _ => CelType::Number,
        };

        // `"a" + 1` concatenates in JavaScript; CEL needs an explicit conversion.
        if op == BinaryOp::Add && ty == CelType::String {
            for f in [&mut l, &mut r] {
                if !f.ty.is_string() && !f.ty.is_dyn() {
                    f.text = format!("string({})", f.text);
                    f.prec = Precedence::Primary;
                    f.ty = CelType::String;
                    f.access = false;
                }
            }
            ty = CelType::String;
        }

        let text = format!(
            "{} {} {}",
            l.at(prec),
            op.cel_text(),
            r.at(prec.tighter())
        );
        let mut guards = l.guards;
        merge_guards(&mut guards, r.guards);
        Ok(Fragment::new(text, prec, ty).with_guards(guards))
    }

    fn emit_nullish(&mut self, lhs: &Expr, rhs: &Expr) -> Result<Fragment> {
        let resolved = if matches!(lhs, Expr::Member { .. } | Expr::Index { .. } | Expr::Ident { .. }) {
            self.resolve(lhs)?
        } else {
            Resolved::Fragment(self.emit_node(lhs)?)
        };
        match resolved {
            Resolved::Chain(chain) if chain.is_fully_static() && !chain.links.is_empty() => {
                self.emit_chain_default(&chain, rhs)
            }
            r => {
                let value = self.realize(r, lhs.span())?.materialize();
                let fallback = self.emit_node(rhs)?.materialize();
                Ok(self.nullish_fallback(value, fallback))
            }
        }
    }

    fn emit_chain_default(&mut self, chain: &Chain, rhs: &Expr) -> Result<Fragment> {
        let (parts, skip) = self.chain_parts(chain)?;
        self.record_dependency(chain);
        let fallback = self.emit_node(rhs)?.materialize();
        let ty = CelType::union(self.chain_type(chain), fallback.ty.clone());
        let plain = concat(&parts);
        let otherwise = fallback.at(Precedence::Conditional);

        let text = match self.ctx.options().null_safety() {
            NullSafety::HasGuards if parts[parts.len() - 1].kind == PartKind::Field => {
                format!("has({plain}) ? {plain} : {otherwise}")
            }
            NullSafety::KroOptional => {
                let (opt, _) = render_access(&parts, skip, Some(NullSafety::KroOptional), true);
                if opt != plain {
                    return Ok(Fragment::new(
                        format!("{opt}.orValue({})", fallback.text),
                        Precedence::Primary,
                        ty,
                    ));
                }
                format!("{plain} != null ? {plain} : {otherwise}")
            }
            _ => format!("{plain} != null ? {plain} : {otherwise}"),
        };
        Ok(Fragment::new(text, Precedence::Conditional, ty))
    }

    fn nullish_fallback(&self, value: Fragment, fallback: Fragment) -> Fragment {
        let v = value.at(Precedence::Additive);
        Fragment::new(
            format!("{v} != null ? {v} : {}", fallback.at(Precedence::Conditional)),
            Precedence::Conditional,
            CelType::union(value.ty, fallback.ty),
        )
    }

    fn emit_template(&mut self, quasis: &[String], exprs: &[Ref<Expr>]) -> Result<Fragment> {
        let has_literal = quasis.iter().any(|q| !q.is_empty());
        let mut pieces: Vec<String> = vec![];
        let mut guards = vec![];

        for (i, quasi) in quasis.iter().enumerate() {
            if !quasi.is_empty() {
                pieces.push(quote_cel_string(quasi));
            }
            let Some(expr) = exprs.get(i) else {
                continue;
            };
            let f = self.emit_node(expr)?;
            merge_guards(&mut guards, f.guards.clone());
            let text = if f.ty.is_string() {
                // String concatenation is associative, so `+` chains splice as is.
                f.at(Precedence::Additive)
            } else if !f.ty.is_dyn() || !has_literal {
                format!("string({})", f.text)
            } else {
                f.at(Precedence::Multiplicative)
            };
            pieces.push(text);
        }

        let f = match pieces.len() {
            0 => Fragment::new("\"\"", Precedence::Primary, CelType::String),
            1 => {
                let prec = if pieces[0].starts_with('"') || pieces[0].starts_with("string(") {
                    Precedence::Primary
                } else {
                    Precedence::Additive
                };
                Fragment::new(pieces.remove(0), prec, CelType::String)
            }
            _ => Fragment::new(pieces.join(" + "), Precedence::Additive, CelType::String),
        };
        Ok(f.with_guards(guards))
    }

    fn resolve(&mut self, expr: &Expr) -> Result<Resolved> {
        match expr {
            Expr::Ident { span, name } => self.resolve_ident(span, name),
            Expr::Member {
                object,
                property,
                optional,
                span,
            } => {
                let base = self.resolve(object)?;
                self.resolve_member(base, property, *optional, span)
            }
            Expr::Index {
                object,
                index,
                optional,
                span,
            } => {
                let base = self.resolve(object)?;
                self.resolve_index(base, index, *optional, span)
            }
            _ => Ok(Resolved::Fragment(self.emit_node(expr)?)),
        }
    }

    fn resolve_ident(&mut self, span: &Span, name: &str) -> Result<Resolved> {
        if self.locals.iter().any(|l| l == name) {
            return Ok(Resolved::Chain(Chain {
                root: ChainRoot::Local(name.to_string()),
                links: vec![],
                declared: None,
            }));
        }
        match self.aliases.get(name) {
            Some(RootAlias::Schema) => return Ok(self.schema_root()),
            Some(RootAlias::Resources) => return Ok(Resolved::Global("resources".to_string())),
            None => (),
        }
        if let Some(v) = self.ctx.bindings().get(name) {
            return Ok(self.classify_value(v.clone()));
        }
        if name == "schema" {
            return Ok(self.schema_root());
        }
        if name == "resources" {
            return Ok(Resolved::Global(name.to_string()));
        }
        if self.ctx.is_known_resource(name) {
            return Ok(self.resource_root(name));
        }
        if GLOBALS.contains(&name) {
            return Ok(Resolved::Global(name.to_string()));
        }

        self.unresolvable(
            span,
            name,
            &format!("`{name}` is not a known resource; converting it as a resource reference"),
        );
        Ok(self.resource_root(name))
    }

    fn schema_root(&self) -> Resolved {
        Resolved::Chain(Chain {
            root: ChainRoot::Schema,
            links: vec![],
            declared: None,
        })
    }

    fn resource_root(&self, id: &str) -> Resolved {
        Resolved::Chain(Chain {
            root: ChainRoot::Resource(id.to_string()),
            links: vec![],
            declared: None,
        })
    }

    fn classify_value(&self, v: Value) -> Resolved {
        match v {
            Value::Reference(r) => Resolved::Chain(Chain::from_reference(&r)),
            Value::Cel(c) => Resolved::Fragment(Fragment::from_cel(&c)),
            v => Resolved::Static(v),
        }
    }

    fn resolve_member(
        &mut self,
        base: Resolved,
        property: &Span,
        optional: bool,
        span: &Span,
    ) -> Result<Resolved> {
        let name = property.text();
        match base {
            Resolved::Global(g) if g == "resources" => {
                if !self.ctx.is_known_resource(name) {
                    self.unresolvable(
                        span,
                        name,
                        &format!("`{name}` is not a known resource of the composition"),
                    );
                }
                Ok(self.resource_root(name))
            }
            Resolved::Global(g) if g == "Math" => Ok(Resolved::Global(format!("Math.{name}"))),
            Resolved::Global(g) => {
                Err(span.unsupported(&format!("`{g}.{name}` is not supported")))
            }
            Resolved::Static(v) => {
                if name == "length" {
                    match &v {
                        Value::String(s) => {
                            return Ok(Resolved::Static(Value::from(s.chars().count() as u64)))
                        }
                        Value::Array(a) => {
                            return Ok(Resolved::Static(Value::from(a.borrow().len() as u64)))
                        }
                        _ => (),
                    }
                }
                match v.step(&PathSegment::Field(name.to_string())) {
                    Some(child) => Ok(self.classify_value(child)),
                    None => {
                        self.unresolvable(span, span.text(), "property is not present on bound value");
                        Ok(Resolved::Static(Value::Null))
                    }
                }
            }
            Resolved::Chain(chain) if name == "length" => {
                let f = self.render_chain(&chain)?;
                Ok(Resolved::Fragment(self.size_of(f)))
            }
            Resolved::Chain(mut chain) => {
                chain.push(Segment::Static(PathSegment::Field(name.to_string())), optional);
                Ok(Resolved::Chain(chain))
            }
            Resolved::Fragment(f) if name == "length" => Ok(Resolved::Fragment(self.size_of(f))),
            Resolved::Fragment(f) => {
                let mut chain = Chain {
                    root: ChainRoot::Expr(f),
                    links: vec![],
                    declared: None,
                };
                chain.push(Segment::Static(PathSegment::Field(name.to_string())), optional);
                Ok(Resolved::Chain(chain))
            }
        }
    }

    fn size_of(&self, f: Fragment) -> Fragment {
        let guards = f.guards.clone();
        Fragment::new(format!("size({})", f.text), Precedence::Primary, CelType::Number)
            .with_guards(guards)
    }

    fn resolve_index(
        &mut self,
        base: Resolved,
        index: &Expr,
        optional: bool,
        span: &Span,
    ) -> Result<Resolved> {
        let segment = match index {
            Expr::Number { value, .. }
                if *value >= 0.0 && value.fract() == 0.0 && *value < MAX_SAFE_INTEGER =>
            {
                Segment::Static(PathSegment::Index(*value as u64))
            }
            Expr::Number { span, .. } => {
                return Err(span.unsupported("array indexes must be non-negative integers"));
            }
            Expr::Unary {
                op: UnaryOp::Neg,
                span,
                expr,
            } if matches!(expr.as_ref(), Expr::Number { .. }) => {
                return Err(span.unsupported("array indexes must be non-negative integers"));
            }
            Expr::String { value, .. } if is_identifier(value) => {
                Segment::Static(PathSegment::Field(value.clone()))
            }
            Expr::String { value, .. } => Segment::Static(PathSegment::Key(value.clone())),
            _ => Segment::Dynamic(self.emit_node(index)?),
        };

        match base {
            Resolved::Global(g) if g == "resources" => match &segment {
                Segment::Static(PathSegment::Field(id) | PathSegment::Key(id)) => {
                    if !self.ctx.is_known_resource(id) {
                        self.unresolvable(
                            span,
                            id,
                            &format!("`{id}` is not a known resource of the composition"),
                        );
                    }
                    Ok(self.resource_root(id))
                }
                _ => Err(span.unsupported("dynamic resource lookup is not supported")),
            },
            Resolved::Global(g) => Err(span.unsupported(&format!("indexing `{g}` is not supported"))),
            Resolved::Static(v) => match &segment {
                Segment::Static(s) => match v.step(s) {
                    Some(child) => Ok(self.classify_value(child)),
                    None => {
                        self.unresolvable(span, span.text(), "index is not present on bound value");
                        Ok(Resolved::Static(Value::Null))
                    }
                },
                Segment::Dynamic(_) => {
                    let f = self.render_value(&v, 0, &mut vec![])?;
                    let mut chain = Chain {
                        root: ChainRoot::Expr(f),
                        links: vec![],
                        declared: None,
                    };
                    chain.push(segment, optional);
                    Ok(Resolved::Chain(chain))
                }
            },
            Resolved::Chain(mut chain) => {
                chain.push(segment, optional);
                Ok(Resolved::Chain(chain))
            }
            Resolved::Fragment(f) => {
                let mut chain = Chain {
                    root: ChainRoot::Expr(f),
                    links: vec![],
                    declared: None,
                };
                chain.push(segment, optional);
                Ok(Resolved::Chain(chain))
            }
        }
    }

    fn realize(&mut self, r: Resolved, span: &Span) -> Result<Fragment> {
        match r {
            Resolved::Chain(c) => self.render_chain(&c),
            Resolved::Static(v) => self.render_value(&v, 0, &mut vec![]),
            Resolved::Fragment(f) => Ok(f),
            Resolved::Global(g) => {
                Err(span.unsupported(&format!("`{g}` cannot be used as a value")))
            }
        }
    }

    fn chain_parts(&self, chain: &Chain) -> Result<(Vec<Part>, usize)> {
        let (root, skip) = match &chain.root {
            ChainRoot::Resource(id) => (Part::root(id), root_width(RefKind::Resource)),
            ChainRoot::Schema => (Part::root("schema"), root_width(RefKind::Schema)),
            ChainRoot::Local(name) => (Part::root(name), 1),
            ChainRoot::Expr(f) => (Part::root(&f.at(Precedence::Primary)), 1),
        };
        let mut parts = vec![root];
        for link in &chain.links {
            parts.push(match &link.segment {
                Segment::Static(s) => Part::from_segment(s, link.optional),
                Segment::Dynamic(f) => Part {
                    text: format!("[{}]", f.text),
                    kind: PartKind::Dynamic,
                    optional: link.optional,
                },
            });
        }
        Ok((parts, skip))
    }

    fn chain_type(&self, chain: &Chain) -> CelType {
        if let Some(t) = &chain.declared {
            return t.clone();
        }
        let ChainRoot::Resource(id) = &chain.root else {
            return CelType::Dyn;
        };
        if !chain.is_fully_static() {
            return CelType::Dyn;
        }
        let path = join_path(&chain.static_segments());
        self.ctx
            .resource_kind(id)
            .and_then(|kind| self.ctx.catalog().lookup(kind, &path))
            .map(|info| info.ty)
            .unwrap_or(CelType::Dyn)
    }

    fn record_dependency(&mut self, chain: &Chain) {
        if let Some(r) = chain.reference() {
            self.dependencies.push(r);
        }
    }

    fn render_chain(&mut self, chain: &Chain) -> Result<Fragment> {
        let (parts, skip) = self.chain_parts(chain)?;
        self.record_dependency(chain);
        let ty = self.chain_type(chain);

        let explicit = chain.links.iter().any(|l| l.optional);
        let flagged = self.ctx.options().auto_null_safety
            && chain
                .reference()
                .is_some_and(|r| optionality::assess(&r, self.ctx.options().conservative).potentially_undefined);

        let strategy = (explicit || flagged).then(|| self.ctx.options().null_safety());
        let (text, guards) = render_access(&parts, skip, strategy, flagged);

        let mut all_guards = match &chain.root {
            ChainRoot::Expr(f) => f.guards.clone(),
            _ => vec![],
        };
        for link in &chain.links {
            if let Segment::Dynamic(f) = &link.segment {
                merge_guards(&mut all_guards, f.guards.clone());
            }
        }
        merge_guards(&mut all_guards, guards);

        Ok(Fragment::access_path(text, ty).with_guards(all_guards))
    }

    fn render_value(
        &mut self,
        value: &Value,
        depth: usize,
        stack: &mut Vec<*const ()>,
    ) -> Result<Fragment> {
        use Precedence::Primary;
        if depth > self.ctx.options().max_depth {
            return Err(ConversionError::internal(
                "value nesting exceeds the maximum depth",
                "",
            ));
        }
        if let Some(id) = value.container_id() {
            if stack.contains(&id) {
                return Err(ConversionError::internal("cyclic value cannot be converted", ""));
            }
            stack.push(id);
        }

        let f = match value {
            Value::Null => Fragment::new("null", Primary, CelType::Null),
            Value::Bool(b) => Fragment::new(b.to_string(), Primary, CelType::Bool),
            Value::Number(n) => {
                let text = match (n.as_i64(), n.as_u64(), n.as_f64()) {
                    (Some(i), _, _) => i.to_string(),
                    (_, Some(u), _) => format!("{u}u"),
                    (_, _, Some(f)) => format_cel_number(f),
                    _ => "0".to_string(),
                };
                Fragment::new(text, Primary, CelType::Number)
            }
            Value::String(s) => Fragment::new(quote_cel_string(s), Primary, CelType::String),
            Value::Reference(r) => self.render_chain(&Chain::from_reference(r))?,
            Value::Cel(c) => Fragment::from_cel(c),
            Value::Array(items) => {
                let mut texts = vec![];
                let mut guards = vec![];
                for item in items.borrow().iter() {
                    let f = self.render_value(item, depth + 1, stack)?;
                    merge_guards(&mut guards, f.guards.clone());
                    texts.push(f.text);
                }
                Fragment::new(
                    format!("[{}]", texts.join(", ")),
                    Primary,
                    CelType::list(CelType::Dyn),
                )
                .with_guards(guards)
            }
            Value::Object(fields) => {
                let mut entries = vec![];
                let mut guards = vec![];
                for (k, v) in fields.borrow().iter() {
                    let f = self.render_value(v, depth + 1, stack)?;
                    merge_guards(&mut guards, f.guards.clone());
                    entries.push(format!("{}: {}", quote_cel_string(k), f.text));
                }
                Fragment::new(
                    format!("{{{}}}", entries.join(", ")),
                    Primary,
                    CelType::map(CelType::Dyn),
                )
                .with_guards(guards)
            }
        };

        if value.container_id().is_some() {
            stack.pop();
        }
        Ok(f)
    }

    fn emit_call(&mut self, span: &Span, callee: &Expr, args: &[Ref<Expr>]) -> Result<Fragment> {
        match callee {
            Expr::Ident { name, .. } if !self.locals.iter().any(|l| l == name) => {
                self.emit_global_call(span, name, args)
            }
            Expr::Member {
                object, property, ..
            } => {
                let method = property.text();
                match self.resolve(object)? {
                    Resolved::Global(g) if g == "Math" => self.emit_math(span, method, args),
                    Resolved::Global(g) => Err(span.unsupported(&format!(
                        "call to `{g}.{method}` is not supported"
                    ))),
                    r => {
                        let receiver = self.realize(r, object.span())?;
                        self.emit_method(span, receiver, method, args)
                    }
                }
            }
            _ => Err(span.unsupported(&format!("call to `{}` is not supported", callee.span().text()))),
        }
    }

    fn emit_args(&mut self, args: &[Ref<Expr>]) -> Result<(Vec<String>, Vec<CelType>)> {
        let mut texts = vec![];
        let mut types = vec![];
        for a in args {
            let f = self.emit_node(a)?.materialize();
            texts.push(f.text);
            types.push(f.ty);
        }
        Ok((texts, types))
    }

    fn expect_args(span: &Span, name: &str, args: &[Ref<Expr>], min: usize, max: usize) -> Result<()> {
        if args.len() < min || args.len() > max {
            let expected = if min == max {
                format!("{min}")
            } else {
                format!("{min} to {max}")
            };
            return Err(span.unsupported(&format!(
                "`{name}` expects {expected} argument(s), got {}",
                args.len()
            )));
        }
        Ok(())
    }

    fn emit_global_call(&mut self, span: &Span, name: &str, args: &[Ref<Expr>]) -> Result<Fragment> {
        let (function, ty) = match name {
            "String" => ("string", CelType::String),
            "Number" | "parseFloat" => ("double", CelType::Number),
            "parseInt" => ("int", CelType::Number),
            _ => {
                return Err(span.unsupported(&format!("call to `{name}` is not supported")));
            }
        };
        // parseInt's radix argument is accepted only in its decimal form.
        let max = if name == "parseInt" { 2 } else { 1 };
        Self::expect_args(span, name, args, 1, max)?;
        if let Some(radix) = args.get(1) {
            if !matches!(radix.as_ref(), Expr::Number { value, .. } if *value == 10.0) {
                return Err(span.unsupported("parseInt is only supported with radix 10"));
            }
        }
        let f = self.emit_node(&args[0])?;
        let guards = f.guards.clone();
        Ok(Fragment::new(format!("{function}({})", f.text), Precedence::Primary, ty).with_guards(guards))
    }

    fn emit_math(&mut self, span: &Span, method: &str, args: &[Ref<Expr>]) -> Result<Fragment> {
        let function = match method {
            "min" => "math.least",
            "max" => "math.greatest",
            "floor" => "math.floor",
            "ceil" => "math.ceil",
            "round" => "math.round",
            "abs" => "math.abs",
            _ => {
                return Err(span.unsupported(&format!("call to `Math.{method}` is not supported")));
            }
        };
        if matches!(method, "min" | "max") {
            Self::expect_args(span, &format!("Math.{method}"), args, 1, usize::MAX)?;
        } else {
            Self::expect_args(span, &format!("Math.{method}"), args, 1, 1)?;
        }
        let mut texts = vec![];
        let mut guards = vec![];
        for a in args {
            let f = self.emit_node(a)?;
            merge_guards(&mut guards, f.guards.clone());
            texts.push(f.text);
        }
        Ok(Fragment::new(
            format!("{function}({})", texts.join(", ")),
            Precedence::Primary,
            CelType::Number,
        )
        .with_guards(guards))
    }

    fn emit_method(
        &mut self,
        span: &Span,
        receiver: Fragment,
        method: &str,
        args: &[Ref<Expr>],
    ) -> Result<Fragment> {
        use Precedence::*;
        let r = receiver.at(Primary);
        let mut guards = receiver.guards.clone();
        let rty = receiver.ty.non_null();

        let f = match method {
            "some" | "every" | "filter" | "map" | "find" => {
                Self::expect_args(span, method, args, 1, 1)?;
                let (var, body) = self.emit_predicate(span, method, &args[0])?;
                let item = match &rty {
                    CelType::List { item } => (**item).clone(),
                    _ => CelType::Dyn,
                };
                match method {
                    "some" => Fragment::new(format!("{r}.exists({var}, {body})"), Primary, CelType::Bool),
                    "every" => Fragment::new(format!("{r}.all({var}, {body})"), Primary, CelType::Bool),
                    "filter" => Fragment::new(
                        format!("{r}.filter({var}, {body})"),
                        Primary,
                        CelType::list(item),
                    ),
                    "map" => Fragment::new(
                        format!("{r}.map({var}, {body})"),
                        Primary,
                        CelType::list(CelType::Dyn),
                    ),
                    _ => Fragment::new(format!("{r}.filter({var}, {body})[0]"), Primary, item),
                }
            }
            "includes" => {
                Self::expect_args(span, method, args, 1, 1)?;
                let arg = self.emit_node(&args[0])?;
                merge_guards(&mut guards, arg.guards.clone());
                let as_list = match &rty {
                    CelType::List { .. } => true,
                    CelType::String => false,
                    _ => {
                        let string_arg = matches!(args[0].as_ref(), Expr::String { .. } | Expr::Template { .. });
                        self.warnings.push(span.unresolvable(
                            span.text(),
                            "receiver type of `includes` is unknown; choosing by argument",
                        ));
                        !string_arg
                    }
                };
                if as_list {
                    Fragment::new(
                        format!("{} in {}", arg.at(Additive), receiver.at(Additive)),
                        Relation,
                        CelType::Bool,
                    )
                } else {
                    Fragment::new(format!("{r}.contains({})", arg.text), Primary, CelType::Bool)
                }
            }
            "startsWith" | "endsWith" => {
                Self::expect_args(span, method, args, 1, 1)?;
                let (a, _) = self.emit_args(args)?;
                Fragment::new(format!("{r}.{method}({})", a[0]), Primary, CelType::Bool)
            }
            "toLowerCase" | "toUpperCase" | "trim" => {
                Self::expect_args(span, method, args, 0, 0)?;
                let cel = match method {
                    "toLowerCase" => "lowerAscii",
                    "toUpperCase" => "upperAscii",
                    _ => "trim",
                };
                Fragment::new(format!("{r}.{cel}()"), Primary, CelType::String)
            }
            "split" => {
                Self::expect_args(span, method, args, 1, 1)?;
                let (a, _) = self.emit_args(args)?;
                Fragment::new(
                    format!("{r}.split({})", a[0]),
                    Primary,
                    CelType::list(CelType::String),
                )
            }
            "join" => {
                Self::expect_args(span, method, args, 0, 1)?;
                let (a, _) = self.emit_args(args)?;
                let sep = a.first().cloned().unwrap_or_else(|| "\",\"".to_string());
                Fragment::new(format!("{r}.join({sep})"), Primary, CelType::String)
            }
            "replace" => {
                Self::expect_args(span, method, args, 2, 2)?;
                let (a, _) = self.emit_args(args)?;
                // JavaScript replaces the first occurrence only.
                Fragment::new(
                    format!("{r}.replace({}, {}, 1)", a[0], a[1]),
                    Primary,
                    CelType::String,
                )
            }
            "substring" => {
                Self::expect_args(span, method, args, 1, 2)?;
                let (a, _) = self.emit_args(args)?;
                Fragment::new(
                    format!("{r}.substring({})", a.join(", ")),
                    Primary,
                    CelType::String,
                )
            }
            "toString" => {
                Self::expect_args(span, method, args, 0, 0)?;
                Fragment::new(format!("string({})", receiver.text), Primary, CelType::String)
            }
            _ => {
                return Err(span.unsupported(&format!("method `{method}` is not supported")));
            }
        };
        Ok(f.with_guards(guards))
    }

    fn emit_predicate(&mut self, span: &Span, method: &str, arg: &Expr) -> Result<(String, String)> {
        let Expr::Arrow { params, body, .. } = arg else {
            return Err(span.unsupported(&format!(
                "`{method}` requires an arrow function argument"
            )));
        };
        let [param] = params.as_slice() else {
            return Err(span.unsupported(&format!(
                "`{method}` predicates must take exactly one parameter"
            )));
        };
        let name = param.text().to_string();
        self.locals.push(name.clone());
        let body = self.emit_node(body);
        self.locals.pop();
        Ok((name, body?.materialize().text))
    }
}
