// analyze.rs — Dimensional analysis for axis-aware declarations
//
// One post-order walk per declaration computes `(dtype, axes)` for every node
// from the function-kind rules: elementwise calls and constructors broadcast by
// LUB-by-prefix, reductions drop their reduced axes, and declaration references
// copy the callee's already-computed result.
//
// Preconditions: declarations are topologically ordered and numbered
//   (`DeclarationGraph::new`); `inputs` and `registry` are complete.
// Postconditions: every node of every declaration has a `NodeInfo`, and every
//   declaration name has a `DeclInfo`.
// Failure modes: first violation aborts with a `Diagnostic` (E0101–E0107,
//   E0304 for a non-suffix over-hint).
// Side effects: none.

use std::collections::HashMap;

use crate::ast::{DeclarationGraph, Expr, ExprKind, Span};
use crate::axes::{lub_by_prefix, Axes, Axis};
use crate::diag::{codes, Diagnostic};
use crate::id::NodeId;
use crate::registry::{FnKind, FunctionSpec, InputTable, Registry};
use crate::types::DType;

// ── Public types ────────────────────────────────────────────────────────────

/// Axes collapsed by one reduction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReduceInfo {
    /// Reduced suffix of the argument axes (empty for a scalar argument).
    pub over: Axes,
    /// Innermost reduced axis, `None` when the argument was scalar.
    pub last_axis: Option<Axis>,
}

/// Analysis result for one expression node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    pub axes: Axes,
    pub dtype: DType,
    /// Per argument: true if the argument must be broadcast to `axes`.
    pub needs_expand: Vec<bool>,
    pub reduce: Option<ReduceInfo>,
}

/// Analysis result for one declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclInfo {
    pub axes: Axes,
    pub dtype: DType,
}

/// Per-node and per-declaration analysis results for one module.
#[derive(Debug, Default)]
pub struct Analysis {
    nodes: HashMap<NodeId, NodeInfo>,
    decls: HashMap<String, DeclInfo>,
}

impl Analysis {
    pub fn node(&self, id: NodeId) -> Option<&NodeInfo> {
        self.nodes.get(&id)
    }

    pub fn decl(&self, name: &str) -> Option<&DeclInfo> {
        self.decls.get(name)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

// ── Entry point ─────────────────────────────────────────────────────────────

/// Analyze every declaration in order. Callees are always analyzed first.
pub fn analyze(
    graph: &DeclarationGraph,
    inputs: &InputTable,
    registry: &Registry,
) -> Result<Analysis, Diagnostic> {
    let mut ctx = AnalyzeCtx {
        inputs,
        registry,
        analysis: Analysis::default(),
    };
    for decl in graph.declarations() {
        let info = ctx.visit(&decl.body).map_err(|d| d.in_decl(&decl.name))?;
        ctx.analysis.decls.insert(
            decl.name.clone(),
            DeclInfo {
                axes: info.axes,
                dtype: info.dtype,
            },
        );
    }
    Ok(ctx.analysis)
}

// ── Walk ────────────────────────────────────────────────────────────────────

struct AnalyzeCtx<'a> {
    inputs: &'a InputTable,
    registry: &'a Registry,
    analysis: Analysis,
}

impl<'a> AnalyzeCtx<'a> {
    fn visit(&mut self, expr: &Expr) -> Result<NodeInfo, Diagnostic> {
        let mut args = Vec::new();
        for child in expr.children() {
            args.push(self.visit(child)?);
        }
        let info = self.rule(expr, &args)?;
        self.analysis.nodes.insert(expr.id, info.clone());
        Ok(info)
    }

    fn rule(&self, expr: &Expr, args: &[NodeInfo]) -> Result<NodeInfo, Diagnostic> {
        match &expr.kind {
            ExprKind::Constant(lit) => Ok(leaf(Axes::scalar(), lit.dtype())),
            ExprKind::Input(path) => match self.inputs.get(path) {
                Some(spec) => Ok(leaf(spec.axes.clone(), spec.dtype.clone())),
                None => Err(Diagnostic::error(
                    codes::E0102,
                    expr.span,
                    format!("input `{}` is not in the input table", path),
                )),
            },
            ExprKind::DeclRef(name) => match self.analysis.decls.get(name) {
                Some(d) => Ok(leaf(d.axes.clone(), d.dtype.clone())),
                None => Err(Diagnostic::error(
                    codes::E0103,
                    expr.span,
                    format!("reference to `{}` before it is analyzed", name),
                )
                .with_hint("declarations must be listed after everything they reference")),
            },
            ExprKind::Call { func, .. } => {
                let spec = self.function(func, expr.span)?;
                match spec.kind {
                    FnKind::Reduce => reduce_call(spec, None, args, expr.span),
                    FnKind::Elementwise | FnKind::Constructor => {
                        let axes = lub(args, expr.span)?;
                        let dtype = apply_rule(spec, args, expr.span)?;
                        Ok(broadcast(axes, dtype, args))
                    }
                }
            }
            ExprKind::Tuple(_) => {
                let axes = lub(args, expr.span)?;
                let dtype = DType::Tuple(args.iter().map(|a| a.dtype.clone()).collect());
                Ok(broadcast(axes, dtype, args))
            }
            ExprKind::Select { .. } => {
                let axes = lub(args, expr.span)?;
                let (cond, on_true, on_false) = (&args[0], &args[1], &args[2]);
                if cond.dtype != DType::Boolean {
                    return Err(Diagnostic::error(
                        codes::E0105,
                        expr.span,
                        format!("select condition must be boolean, found {}", cond.dtype),
                    ));
                }
                let dtype = DType::promote(&on_true.dtype, &on_false.dtype).ok_or_else(|| {
                    Diagnostic::error(
                        codes::E0105,
                        expr.span,
                        format!(
                            "select branches have incompatible types {} and {}",
                            on_true.dtype, on_false.dtype
                        ),
                    )
                })?;
                Ok(broadcast(axes, dtype, args))
            }
            ExprKind::Reduce { op, over, .. } => {
                let spec = self.function(op, expr.span)?;
                if spec.kind != FnKind::Reduce {
                    return Err(Diagnostic::error(
                        codes::E0107,
                        expr.span,
                        format!("`{}` is a {} function, not a reducer", op, spec.kind),
                    ));
                }
                reduce_call(spec, over.as_ref(), args, expr.span)
            }
        }
    }

    fn function(&self, id: &str, span: Span) -> Result<&'a FunctionSpec, Diagnostic> {
        self.registry.get(id).ok_or_else(|| {
            Diagnostic::error(
                codes::E0104,
                span,
                format!("unknown function `{}`", id),
            )
        })
    }
}

// ── Rules ───────────────────────────────────────────────────────────────────

fn leaf(axes: Axes, dtype: DType) -> NodeInfo {
    NodeInfo {
        axes,
        dtype,
        needs_expand: Vec::new(),
        reduce: None,
    }
}

fn broadcast(axes: Axes, dtype: DType, args: &[NodeInfo]) -> NodeInfo {
    let needs_expand = args.iter().map(|a| a.axes != axes).collect();
    NodeInfo {
        axes,
        dtype,
        needs_expand,
        reduce: None,
    }
}

fn lub(args: &[NodeInfo], span: Span) -> Result<Axes, Diagnostic> {
    lub_by_prefix(args.iter().map(|a| &a.axes)).map_err(|conflict| {
        Diagnostic::error(codes::E0101, span, conflict.to_string())
            .with_hint("broadcasting only extends a shorter axis vector that is a prefix of the longer one")
    })
}

fn apply_rule(spec: &FunctionSpec, args: &[NodeInfo], span: Span) -> Result<DType, Diagnostic> {
    let types: Vec<DType> = args.iter().map(|a| a.dtype.clone()).collect();
    let named = spec
        .name_args(&types)
        .map_err(|msg| Diagnostic::error(codes::E0106, span, msg))?;
    spec.dtype_rule
        .apply(&named)
        .map_err(|msg| Diagnostic::error(codes::E0105, span, format!("`{}`: {}", spec.id, msg)))
}

/// Reduction rule: an explicit non-empty hint is removed as a suffix of the
/// argument axes; otherwise the innermost axis is dropped.
fn reduce_call(
    spec: &FunctionSpec,
    hint: Option<&Axes>,
    args: &[NodeInfo],
    span: Span,
) -> Result<NodeInfo, Diagnostic> {
    if args.len() != 1 {
        return Err(Diagnostic::error(
            codes::E0106,
            span,
            format!("reducer `{}` takes 1 argument, got {}", spec.id, args.len()),
        ));
    }
    let arg = &args[0];
    let (axes, info) = match hint.filter(|h| !h.is_empty()) {
        Some(over) => {
            let result = arg.axes.strip_suffix(over).ok_or_else(|| {
                Diagnostic::error(
                    codes::E0304,
                    span,
                    format!(
                        "cannot reduce over {}: not a suffix of argument axes {}",
                        over, arg.axes
                    ),
                )
            })?;
            let info = ReduceInfo {
                over: over.clone(),
                last_axis: over.last().cloned(),
            };
            (result, info)
        }
        None => {
            let (result, last) = arg.axes.split_last();
            let over = last.iter().cloned().collect::<Vec<_>>();
            let info = ReduceInfo {
                over: Axes::new(over),
                last_axis: last,
            };
            (result, info)
        }
    };
    let dtype = apply_rule(spec, args, span)?;
    Ok(NodeInfo {
        axes,
        dtype,
        needs_expand: vec![false],
        reduce: Some(info),
    })
}
