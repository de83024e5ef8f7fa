// ast.rs — Normalized declaration graph consumed by the axis compiler
//
// Declarations arrive topologically ordered: every `DeclRef` names a
// declaration that appears earlier. Node kinds form a closed enum, so every
// pass matches them exhaustively.
//
// Preconditions: produced by the parser or built directly by an upstream tool.
// Postconditions: after `DeclarationGraph::new`, every node has a unique
//   `NodeId` (post-order) and declaration names are unique.
// Failure modes: duplicate declaration names.
// Side effects: none.

use std::collections::HashMap;
use std::fmt;

use chumsky::span::SimpleSpan;
use serde::Serialize;

use crate::axes::Axes;
use crate::diag::{codes, Diagnostic};
use crate::id::{IdAllocator, NodeId};
use crate::types::DType;

/// Byte-offset span (alias for chumsky's `SimpleSpan`).
pub type Span = SimpleSpan;

// ── Literals ──

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Literal {
    Integer(i64),
    Float(f64),
    String(String),
    Boolean(bool),
}

impl Literal {
    pub fn dtype(&self) -> DType {
        match self {
            Literal::Integer(_) => DType::Integer,
            Literal::Float(_) => DType::Float,
            Literal::String(_) => DType::String,
            Literal::Boolean(_) => DType::Boolean,
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Integer(n) => write!(f, "{}", n),
            // Debug keeps the trailing `.0` on whole floats.
            Literal::Float(x) => write!(f, "{:?}", x),
            Literal::String(s) => write!(f, "{:?}", s),
            Literal::Boolean(b) => write!(f, "{}", b),
        }
    }
}

// ── Field paths ──

/// Canonical field path: root field followed by nested keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct FieldPath(Vec<String>);

impl FieldPath {
    pub fn new(tokens: Vec<String>) -> Self {
        FieldPath(tokens)
    }

    pub fn from_tokens<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        FieldPath(tokens.into_iter().map(Into::into).collect())
    }

    pub fn tokens(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn root(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }

    /// The first `k` tokens (clamped to the path's length).
    pub fn prefix(&self, k: usize) -> FieldPath {
        FieldPath(self.0[..k.min(self.0.len())].to_vec())
    }

    pub fn starts_with(&self, other: &FieldPath) -> bool {
        self.0.starts_with(&other.0)
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("."))
    }
}

// ── Expressions ──

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub id: NodeId,
    pub kind: ExprKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Constant(Literal),
    Input(FieldPath),
    DeclRef(String),
    Call {
        func: String,
        args: Vec<Expr>,
    },
    Tuple(Vec<Expr>),
    Select {
        cond: Box<Expr>,
        on_true: Box<Expr>,
        on_false: Box<Expr>,
    },
    /// `over` is the optional axis hint; `None` reduces the innermost axis.
    Reduce {
        op: String,
        over: Option<Axes>,
        arg: Box<Expr>,
    },
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Expr {
            id: NodeId::UNASSIGNED,
            kind,
            span,
        }
    }

    fn synthetic(kind: ExprKind) -> Self {
        Expr::new(kind, Span::from(0..0))
    }

    pub fn constant(lit: Literal) -> Self {
        Expr::synthetic(ExprKind::Constant(lit))
    }

    pub fn input(path: &[&str]) -> Self {
        Expr::synthetic(ExprKind::Input(FieldPath::from_tokens(
            path.iter().copied(),
        )))
    }

    pub fn decl_ref(name: &str) -> Self {
        Expr::synthetic(ExprKind::DeclRef(name.to_string()))
    }

    pub fn call(func: &str, args: Vec<Expr>) -> Self {
        Expr::synthetic(ExprKind::Call {
            func: func.to_string(),
            args,
        })
    }

    pub fn tuple(elems: Vec<Expr>) -> Self {
        Expr::synthetic(ExprKind::Tuple(elems))
    }

    pub fn select(cond: Expr, on_true: Expr, on_false: Expr) -> Self {
        Expr::synthetic(ExprKind::Select {
            cond: Box::new(cond),
            on_true: Box::new(on_true),
            on_false: Box::new(on_false),
        })
    }

    pub fn reduce(op: &str, over: Option<Axes>, arg: Expr) -> Self {
        Expr::synthetic(ExprKind::Reduce {
            op: op.to_string(),
            over,
            arg: Box::new(arg),
        })
    }

    /// Direct children, in evaluation order.
    pub fn children(&self) -> Vec<&Expr> {
        match &self.kind {
            ExprKind::Constant(_) | ExprKind::Input(_) | ExprKind::DeclRef(_) => Vec::new(),
            ExprKind::Call { args, .. } => args.iter().collect(),
            ExprKind::Tuple(elems) => elems.iter().collect(),
            ExprKind::Select {
                cond,
                on_true,
                on_false,
            } => vec![cond, on_true, on_false],
            ExprKind::Reduce { arg, .. } => vec![arg],
        }
    }

    fn children_mut(&mut self) -> Vec<&mut Expr> {
        match &mut self.kind {
            ExprKind::Constant(_) | ExprKind::Input(_) | ExprKind::DeclRef(_) => Vec::new(),
            ExprKind::Call { args, .. } => args.iter_mut().collect(),
            ExprKind::Tuple(elems) => elems.iter_mut().collect(),
            ExprKind::Select {
                cond,
                on_true,
                on_false,
            } => vec![cond, on_true, on_false],
            ExprKind::Reduce { arg, .. } => vec![arg],
        }
    }
}

// ── Declarations ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeclKind {
    Value,
    /// Named boolean predicate.
    Trait,
}

impl fmt::Display for DeclKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeclKind::Value => f.write_str("value"),
            DeclKind::Trait => f.write_str("trait"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Declaration {
    pub name: String,
    pub kind: DeclKind,
    pub body: Expr,
    pub span: Span,
}

impl Declaration {
    pub fn value(name: &str, body: Expr) -> Self {
        Declaration {
            name: name.to_string(),
            kind: DeclKind::Value,
            body,
            span: Span::from(0..0),
        }
    }

    pub fn trait_decl(name: &str, body: Expr) -> Self {
        Declaration {
            kind: DeclKind::Trait,
            ..Declaration::value(name, body)
        }
    }
}

/// One input table entry as written in a module file.
#[derive(Debug, Clone, PartialEq)]
pub struct InputDecl {
    pub path: FieldPath,
    pub axes: Axes,
    pub dtype: DType,
    pub span: Span,
}

/// Parser output: the input table entries and the declarations of one module.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceModule {
    pub inputs: Vec<InputDecl>,
    pub declarations: Vec<Declaration>,
    pub span: Span,
}

// ── Declaration graph ──

/// Topologically ordered declarations with numbered nodes.
#[derive(Debug, Clone)]
pub struct DeclarationGraph {
    declarations: Vec<Declaration>,
    index: HashMap<String, usize>,
}

impl DeclarationGraph {
    /// Number every node in post-order and index declarations by name.
    pub fn new(mut declarations: Vec<Declaration>) -> Result<Self, Diagnostic> {
        let mut ids = IdAllocator::new();
        let mut index = HashMap::new();
        for (i, decl) in declarations.iter_mut().enumerate() {
            if index.contains_key(&decl.name) {
                return Err(Diagnostic::error(
                    codes::E0109,
                    decl.span,
                    format!("declaration `{}` is defined twice", decl.name),
                ));
            }
            index.insert(decl.name.clone(), i);
            number_nodes(&mut decl.body, &mut ids);
        }
        Ok(DeclarationGraph {
            declarations,
            index,
        })
    }

    pub fn declarations(&self) -> &[Declaration] {
        &self.declarations
    }

    pub fn get(&self, name: &str) -> Option<&Declaration> {
        self.index.get(name).map(|&i| &self.declarations[i])
    }

    pub fn len(&self) -> usize {
        self.declarations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.declarations.is_empty()
    }
}

fn number_nodes(expr: &mut Expr, ids: &mut IdAllocator) {
    for child in expr.children_mut() {
        number_nodes(child, ids);
    }
    expr.id = ids.alloc_node();
}
