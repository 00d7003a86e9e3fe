// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::lexer::*;

use core::{cmp, fmt, ops::Deref};
use std::rc::Rc;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum BinaryOp {
    // `==` and `===` are both equality once converted.
    Eq,
    StrictEq,
    Ne,
    StrictNe,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl BinaryOp {
    pub fn js_text(&self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::StrictEq => "===",
            Self::Ne => "!=",
            Self::StrictNe => "!==",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Mod => "%",
        }
    }

    pub fn cel_text(&self) -> &'static str {
        match self {
            Self::Eq | Self::StrictEq => "==",
            Self::Ne | Self::StrictNe => "!=",
            op => op.js_text(),
        }
    }

    pub fn is_relational(&self) -> bool {
        !matches!(
            self,
            Self::Add | Self::Sub | Self::Mul | Self::Div | Self::Mod
        )
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum LogicalOp {
    And,
    Or,
    Nullish,
}

impl LogicalOp {
    pub fn js_text(&self) -> &'static str {
        match self {
            Self::And => "&&",
            Self::Or => "||",
            Self::Nullish => "??",
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum UnaryOp {
    Not,
    Neg,
}

pub struct NodeRef<T> {
    r: Rc<T>,
}

impl<T> Clone for NodeRef<T> {
    fn clone(&self) -> Self {
        Self { r: self.r.clone() }
    }
}

impl<T: fmt::Debug> fmt::Debug for NodeRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.r.as_ref().fmt(f)
    }
}

impl<T> cmp::PartialEq for NodeRef<T> {
    fn eq(&self, other: &Self) -> bool {
        Rc::as_ptr(&self.r).eq(&Rc::as_ptr(&other.r))
    }
}

impl<T> cmp::Eq for NodeRef<T> {}

impl<T> cmp::Ord for NodeRef<T> {
    fn cmp(&self, other: &Self) -> cmp::Ordering {
        Rc::as_ptr(&self.r).cmp(&Rc::as_ptr(&other.r))
    }
}

impl<T> cmp::PartialOrd for NodeRef<T> {
    fn partial_cmp(&self, other: &Self) -> Option<cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Deref for NodeRef<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.r
    }
}

impl<T> AsRef<T> for NodeRef<T> {
    fn as_ref(&self) -> &T {
        self.deref()
    }
}

impl<T> NodeRef<T> {
    pub fn new(t: T) -> Self {
        Self { r: Rc::new(t) }
    }
}

pub type Ref<T> = NodeRef<T>;

#[derive(Debug)]
pub enum Expr {
    Null {
        span: Span,
    },

    Undefined {
        span: Span,
    },

    Bool {
        span: Span,
        value: bool,
    },

    Number {
        span: Span,
        value: f64,
    },

    String {
        span: Span,
        value: String,
    },

    Ident {
        span: Span,
        name: String,
    },

    // `quasis` always has one more element than `exprs`.
    Template {
        span: Span,
        quasis: Vec<String>,
        exprs: Vec<Ref<Expr>>,
    },

    Array {
        span: Span,
        items: Vec<Ref<Expr>>,
    },

    Object {
        span: Span,
        fields: Vec<(Span, String, Ref<Expr>)>,
    },

    Member {
        span: Span,
        object: Ref<Expr>,
        property: Span,
        optional: bool,
    },

    Index {
        span: Span,
        object: Ref<Expr>,
        index: Ref<Expr>,
        optional: bool,
    },

    Call {
        span: Span,
        callee: Ref<Expr>,
        args: Vec<Ref<Expr>>,
    },

    Unary {
        span: Span,
        op: UnaryOp,
        expr: Ref<Expr>,
    },

    Binary {
        span: Span,
        op: BinaryOp,
        lhs: Ref<Expr>,
        rhs: Ref<Expr>,
    },

    Logical {
        span: Span,
        op: LogicalOp,
        lhs: Ref<Expr>,
        rhs: Ref<Expr>,
    },

    Conditional {
        span: Span,
        test: Ref<Expr>,
        consequent: Ref<Expr>,
        alternate: Ref<Expr>,
    },

    // Only valid as the predicate argument of an array method.
    Arrow {
        span: Span,
        params: Vec<Span>,
        body: Ref<Expr>,
    },
}

/// Structural category of an expression node.
#[derive(Debug, PartialEq, Eq, Clone, Copy, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ExprShape {
    Binary,
    Conditional,
    Template,
    ReferenceChain,
    Call,
    Literal,
    Identifier,
    Unary,
    Array,
    Object,
    Arrow,
}

impl Expr {
    pub const fn span(&self) -> &Span {
        match *self {
            Self::Null { ref span, .. }
            | Self::Undefined { ref span, .. }
            | Self::Bool { ref span, .. }
            | Self::Number { ref span, .. }
            | Self::String { ref span, .. }
            | Self::Ident { ref span, .. }
            | Self::Template { ref span, .. }
            | Self::Array { ref span, .. }
            | Self::Object { ref span, .. }
            | Self::Member { ref span, .. }
            | Self::Index { ref span, .. }
            | Self::Call { ref span, .. }
            | Self::Unary { ref span, .. }
            | Self::Binary { ref span, .. }
            | Self::Logical { ref span, .. }
            | Self::Conditional { ref span, .. }
            | Self::Arrow { ref span, .. } => span,
        }
    }

    pub const fn shape(&self) -> ExprShape {
        match self {
            Self::Binary { .. } | Self::Logical { .. } => ExprShape::Binary,
            Self::Conditional { .. } => ExprShape::Conditional,
            Self::Template { .. } => ExprShape::Template,
            Self::Member { .. } | Self::Index { .. } => ExprShape::ReferenceChain,
            Self::Call { .. } => ExprShape::Call,
            Self::Null { .. }
            | Self::Undefined { .. }
            | Self::Bool { .. }
            | Self::Number { .. }
            | Self::String { .. } => ExprShape::Literal,
            Self::Ident { .. } => ExprShape::Identifier,
            Self::Unary { .. } => ExprShape::Unary,
            Self::Array { .. } => ExprShape::Array,
            Self::Object { .. } => ExprShape::Object,
            Self::Arrow { .. } => ExprShape::Arrow,
        }
    }

    /// Whether `?.` appears anywhere along this member chain.
    pub fn has_optional_link(&self) -> bool {
        match self {
            Self::Member {
                object, optional, ..
            }
            | Self::Index {
                object, optional, ..
            } => *optional || object.has_optional_link(),
            Self::Call { callee, .. } => callee.has_optional_link(),
            _ => false,
        }
    }
}

pub type ExprRef = Ref<Expr>;
