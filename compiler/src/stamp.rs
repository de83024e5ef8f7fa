// stamp.rs — Immutable stamps and execution plans
//
// Rebuilds every declaration as a new stamped tree. Each node carries its
// `{axes, dtype}` stamp, an execution plan, a module-wide value id and its
// slot in the module-wide evaluation order; each declaration carries its
// topological index among declarations. Reducer calls are canonicalized
// into `Reduce` nodes, and `select` masks are checked against their branches.
//
// Preconditions: `analysis` was produced from this `graph` by `analyze`.
// Postconditions: the stamped module mirrors the graph one node per node;
//   value ids and node topo indices are assigned in post-order across the
//   whole module, so every node sorts after its operands.
// Failure modes: E0101 (select mask not a prefix of its branches), E0108
//   (trait not boolean).
// Side effects: none.

use std::fmt;

use crate::analyze::{Analysis, NodeInfo};
use crate::ast::{DeclKind, DeclarationGraph, Expr, ExprKind, FieldPath, Literal, Span};
use crate::axes::{lub_by_prefix, Axes, Axis};
use crate::diag::{codes, Diagnostic};
use crate::id::{IdAllocator, NodeId, ValueId};
use crate::registry::{FnKind, Registry};
use crate::types::DType;

// ── Stamp ───────────────────────────────────────────────────────────────────

/// Immutable `{axes, dtype}` annotation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stamp {
    axes: Axes,
    dtype: DType,
}

impl Stamp {
    pub fn new(axes: Axes, dtype: DType) -> Self {
        Stamp { axes, dtype }
    }

    pub fn axes(&self) -> &Axes {
        &self.axes
    }

    pub fn dtype(&self) -> &DType {
        &self.dtype
    }
}

impl fmt::Display for Stamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.axes, self.dtype)
    }
}

/// How a node combines its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecPlan {
    Elementwise {
        target_axes: Axes,
        needs_expand: Vec<bool>,
    },
    Reduce {
        last_axis: Option<Axis>,
    },
    Constructor {
        arity: usize,
        target_axes: Axes,
        needs_expand: Vec<bool>,
    },
}

// ── Stamped tree ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct StampedExpr {
    pub node: NodeId,
    pub value_id: ValueId,
    /// Position in the module-wide evaluation order.
    pub topo_index: usize,
    pub stamp: Stamp,
    /// `None` for leaves (constants, inputs, declaration references).
    pub plan: Option<ExecPlan>,
    pub kind: StampedKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StampedKind {
    Constant(Literal),
    Input(FieldPath),
    DeclRef(String),
    Call {
        func: String,
        args: Vec<StampedExpr>,
    },
    Tuple(Vec<StampedExpr>),
    Select {
        cond: Box<StampedExpr>,
        on_true: Box<StampedExpr>,
        on_false: Box<StampedExpr>,
    },
    /// `over` is the resolved reduced suffix of the argument axes.
    Reduce {
        op: String,
        over: Axes,
        arg: Box<StampedExpr>,
    },
}

impl StampedExpr {
    pub fn axes(&self) -> &Axes {
        self.stamp.axes()
    }

    pub fn dtype(&self) -> &DType {
        self.stamp.dtype()
    }

    /// Direct children, in evaluation order.
    pub fn children(&self) -> Vec<&StampedExpr> {
        match &self.kind {
            StampedKind::Constant(_) | StampedKind::Input(_) | StampedKind::DeclRef(_) => {
                Vec::new()
            }
            StampedKind::Call { args, .. } | StampedKind::Tuple(args) => args.iter().collect(),
            StampedKind::Select {
                cond,
                on_true,
                on_false,
            } => vec![cond, on_true, on_false],
            StampedKind::Reduce { arg, .. } => vec![arg],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StampedDeclaration {
    pub name: String,
    pub kind: DeclKind,
    pub body: StampedExpr,
    pub stamp: Stamp,
    pub topo_index: usize,
    pub span: Span,
}

#[derive(Debug, Clone, Default)]
pub struct StampedModule {
    decls: Vec<StampedDeclaration>,
}

impl StampedModule {
    pub fn declarations(&self) -> &[StampedDeclaration] {
        &self.decls
    }

    pub fn get(&self, name: &str) -> Option<&StampedDeclaration> {
        self.decls.iter().find(|d| d.name == name)
    }

    pub fn len(&self) -> usize {
        self.decls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decls.is_empty()
    }
}

// ── Stamper ─────────────────────────────────────────────────────────────────

/// Stamp every declaration of `graph`, in order.
pub fn stamp(
    graph: &DeclarationGraph,
    analysis: &Analysis,
    registry: &Registry,
) -> Result<StampedModule, Diagnostic> {
    let mut stamper = Stamper {
        analysis,
        registry,
        ids: IdAllocator::new(),
    };
    let mut decls = Vec::with_capacity(graph.len());
    for (topo_index, decl) in graph.declarations().iter().enumerate() {
        let body = stamper
            .visit(&decl.body)
            .map_err(|d| d.in_decl(&decl.name))?;
        if decl.kind == DeclKind::Trait && *body.dtype() != DType::Boolean {
            return Err(Diagnostic::error(
                codes::E0108,
                decl.span,
                format!(
                    "trait `{}` must be boolean, found {}",
                    decl.name,
                    body.dtype()
                ),
            )
            .in_decl(&decl.name));
        }
        decls.push(StampedDeclaration {
            name: decl.name.clone(),
            kind: decl.kind,
            stamp: body.stamp.clone(),
            body,
            topo_index,
            span: decl.span,
        });
    }
    Ok(StampedModule { decls })
}

struct Stamper<'a> {
    analysis: &'a Analysis,
    registry: &'a Registry,
    ids: IdAllocator,
}

impl<'a> Stamper<'a> {
    fn info(&self, expr: &Expr) -> Result<&'a NodeInfo, Diagnostic> {
        self.analysis.node(expr.id).ok_or_else(|| {
            Diagnostic::new(
                expr.span,
                format!("node {} has no analysis result", expr.id),
            )
        })
    }

    fn visit(&mut self, expr: &Expr) -> Result<StampedExpr, Diagnostic> {
        let info = self.info(expr)?;
        let mut stamp = Stamp::new(info.axes.clone(), info.dtype.clone());
        let (kind, plan) = match &expr.kind {
            ExprKind::Constant(lit) => (StampedKind::Constant(lit.clone()), None),
            ExprKind::Input(path) => (StampedKind::Input(path.clone()), None),
            ExprKind::DeclRef(name) => (StampedKind::DeclRef(name.clone()), None),
            ExprKind::Call { func, args } => {
                let args = self.visit_all(args)?;
                let kind = self.registry.get(func).map(|s| s.kind);
                match (kind, info.reduce.as_ref()) {
                    (Some(FnKind::Reduce), Some(reduce)) => {
                        let plan = ExecPlan::Reduce {
                            last_axis: reduce.last_axis.clone(),
                        };
                        let kind = StampedKind::Reduce {
                            op: func.clone(),
                            over: reduce.over.clone(),
                            arg: Box::new(single(args, expr)?),
                        };
                        (kind, Some(plan))
                    }
                    (Some(FnKind::Constructor), _) => {
                        let plan = ExecPlan::Constructor {
                            arity: args.len(),
                            target_axes: info.axes.clone(),
                            needs_expand: info.needs_expand.clone(),
                        };
                        let kind = StampedKind::Call {
                            func: func.clone(),
                            args,
                        };
                        (kind, Some(plan))
                    }
                    _ => {
                        let plan = ExecPlan::Elementwise {
                            target_axes: info.axes.clone(),
                            needs_expand: info.needs_expand.clone(),
                        };
                        let kind = StampedKind::Call {
                            func: func.clone(),
                            args,
                        };
                        (kind, Some(plan))
                    }
                }
            }
            ExprKind::Tuple(elems) => {
                let elems = self.visit_all(elems)?;
                let plan = ExecPlan::Constructor {
                    arity: elems.len(),
                    target_axes: info.axes.clone(),
                    needs_expand: info.needs_expand.clone(),
                };
                (StampedKind::Tuple(elems), Some(plan))
            }
            ExprKind::Select {
                cond,
                on_true,
                on_false,
            } => {
                let cond = self.visit(cond)?;
                let on_true = self.visit(on_true)?;
                let on_false = self.visit(on_false)?;
                let axes = select_axes(&cond, &on_true, &on_false, expr.span)?;
                let needs_expand = [&cond, &on_true, &on_false]
                    .iter()
                    .map(|e| *e.axes() != axes)
                    .collect();
                stamp = Stamp::new(axes.clone(), info.dtype.clone());
                let plan = ExecPlan::Elementwise {
                    target_axes: axes,
                    needs_expand,
                };
                let kind = StampedKind::Select {
                    cond: Box::new(cond),
                    on_true: Box::new(on_true),
                    on_false: Box::new(on_false),
                };
                (kind, Some(plan))
            }
            ExprKind::Reduce { op, arg, .. } => {
                let arg = self.visit(arg)?;
                let (over, last_axis) = match &info.reduce {
                    Some(r) => (r.over.clone(), r.last_axis.clone()),
                    None => (Axes::scalar(), None),
                };
                let kind = StampedKind::Reduce {
                    op: op.clone(),
                    over,
                    arg: Box::new(arg),
                };
                (kind, Some(ExecPlan::Reduce { last_axis }))
            }
        };
        Ok(StampedExpr {
            node: expr.id,
            value_id: self.ids.alloc_value(),
            topo_index: self.ids.alloc_topo(),
            stamp,
            plan,
            kind,
            span: expr.span,
        })
    }

    fn visit_all(&mut self, exprs: &[Expr]) -> Result<Vec<StampedExpr>, Diagnostic> {
        exprs.iter().map(|e| self.visit(e)).collect()
    }
}

fn single(mut args: Vec<StampedExpr>, expr: &Expr) -> Result<StampedExpr, Diagnostic> {
    if args.len() != 1 {
        return Err(Diagnostic::error(
            codes::E0106,
            expr.span,
            format!("reducer takes 1 argument, got {}", args.len()),
        ));
    }
    Ok(args.remove(0))
}

/// Scalar branches take the mask's axes; otherwise the mask must be a prefix
/// of the branch LUB.
fn select_axes(
    cond: &StampedExpr,
    on_true: &StampedExpr,
    on_false: &StampedExpr,
    span: Span,
) -> Result<Axes, Diagnostic> {
    let branches = lub_by_prefix([on_true.axes(), on_false.axes()])
        .map_err(|c| Diagnostic::error(codes::E0101, span, c.to_string()))?;
    if branches.is_empty() {
        return Ok(cond.axes().clone());
    }
    if !cond.axes().is_prefix_of(&branches) {
        return Err(Diagnostic::error(
            codes::E0101,
            span,
            format!(
                "select mask axes {} are not a prefix of branch axes {}",
                cond.axes(),
                branches
            ),
        ));
    }
    Ok(branches)
}

// ── Display (`--emit stamps`) ───────────────────────────────────────────────

impl fmt::Display for StampedModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, decl) in self.decls.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            writeln!(
                f,
                "{} {} : {}  # topo {}",
                decl.kind, decl.name, decl.stamp, decl.topo_index
            )?;
            write_node(f, &decl.body, 1)?;
        }
        Ok(())
    }
}

fn write_node(f: &mut fmt::Formatter<'_>, e: &StampedExpr, depth: usize) -> fmt::Result {
    let pad = "  ".repeat(depth);
    let label = match &e.kind {
        StampedKind::Constant(lit) => format!("constant {}", lit),
        StampedKind::Input(path) => format!("input {}", path),
        StampedKind::DeclRef(name) => format!("ref {}", name),
        StampedKind::Call { func, .. } => format!("call {}", func),
        StampedKind::Tuple(_) => "tuple".to_string(),
        StampedKind::Select { .. } => "select".to_string(),
        StampedKind::Reduce { op, over, .. } => format!("reduce {} over {}", op, over),
    };
    write!(f, "{}{} {} : {}", pad, e.value_id, label, e.stamp)?;
    match &e.plan {
        Some(ExecPlan::Elementwise { needs_expand, .. })
        | Some(ExecPlan::Constructor { needs_expand, .. })
            if needs_expand.iter().any(|x| *x) =>
        {
            write!(f, "  expand={:?}", needs_expand)?;
        }
        _ => {}
    }
    writeln!(f)?;
    match &e.kind {
        StampedKind::Constant(_) | StampedKind::Input(_) | StampedKind::DeclRef(_) => Ok(()),
        StampedKind::Call { args, .. } | StampedKind::Tuple(args) => {
            for a in args {
                write_node(f, a, depth + 1)?;
            }
            Ok(())
        }
        StampedKind::Select {
            cond,
            on_true,
            on_false,
        } => {
            write_node(f, cond, depth + 1)?;
            write_node(f, on_true, depth + 1)?;
            write_node(f, on_false, depth + 1)
        }
        StampedKind::Reduce { arg, .. } => write_node(f, arg, depth + 1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyze::analyze;
    use crate::ast::Declaration;
    use crate::registry::{InputSpec, InputTable};

    fn table() -> InputTable {
        let mut t = InputTable::new();
        for (path, axes, dtype) in [
            (vec!["items", "price"], vec!["items"], DType::Float),
            (vec!["items", "qty"], vec!["items"], DType::Integer),
            (vec!["items", "tags", "hot"], vec!["items", "tags"], DType::Boolean),
            (vec!["flag"], vec![], DType::Boolean),
        ] {
            t.insert(
                FieldPath::from_tokens(path),
                InputSpec {
                    axes: Axes::from_names(axes),
                    dtype,
                    span: Span::from(0..0),
                },
            );
        }
        t
    }

    fn stamp_decls(decls: Vec<Declaration>) -> Result<StampedModule, Diagnostic> {
        let graph = DeclarationGraph::new(decls)?;
        let registry = Registry::with_builtins();
        let analysis = analyze(&graph, &table(), &registry)?;
        stamp(&graph, &analysis, &registry)
    }

    fn subtotal() -> Declaration {
        Declaration::value(
            "subtotal",
            Expr::call(
                "multiply",
                vec![Expr::input(&["items", "price"]), Expr::input(&["items", "qty"])],
            ),
        )
    }

    #[test]
    fn value_ids_are_post_order_across_module() {
        let m = stamp_decls(vec![
            subtotal(),
            Declaration::value("total", Expr::call("sum", vec![Expr::decl_ref("subtotal")])),
        ])
        .unwrap();
        let sub = m.get("subtotal").unwrap();
        assert_eq!(sub.body.value_id, ValueId(2));
        let total = m.get("total").unwrap();
        assert_eq!(total.body.value_id, ValueId(4));
        assert_eq!(total.topo_index, 1);
    }

    #[test]
    fn node_topo_indices_follow_operands_across_module() {
        let m = stamp_decls(vec![
            subtotal(),
            Declaration::value("total", Expr::call("sum", vec![Expr::decl_ref("subtotal")])),
        ])
        .unwrap();
        let sub = &m.get("subtotal").unwrap().body;
        let operands: Vec<usize> = sub.children().iter().map(|c| c.topo_index).collect();
        assert_eq!(operands, vec![0, 1]);
        assert_eq!(sub.topo_index, 2);

        let total = &m.get("total").unwrap().body;
        let reference = total.children()[0];
        assert_eq!(reference.topo_index, 3);
        assert_eq!(total.topo_index, 4);
        assert!(reference.topo_index > sub.topo_index);
    }

    #[test]
    fn scenario_a_stamp() {
        let m = stamp_decls(vec![subtotal()]).unwrap();
        let d = m.get("subtotal").unwrap();
        assert_eq!(*d.stamp.axes(), Axes::from_names(["items"]));
        assert_eq!(*d.stamp.dtype(), DType::Float);
        assert_eq!(
            d.body.plan,
            Some(ExecPlan::Elementwise {
                target_axes: Axes::from_names(["items"]),
                needs_expand: vec![false, false],
            })
        );
    }

    #[test]
    fn reducer_call_becomes_reduce_node() {
        let m = stamp_decls(vec![
            subtotal(),
            Declaration::value("total", Expr::call("sum", vec![Expr::decl_ref("subtotal")])),
        ])
        .unwrap();
        let total = m.get("total").unwrap();
        match &total.body.kind {
            StampedKind::Reduce { op, over, arg } => {
                assert_eq!(op, "sum");
                assert_eq!(*over, Axes::from_names(["items"]));
                assert_eq!(*arg.axes(), Axes::from_names(["items"]));
            }
            other => panic!("expected reduce, got {:?}", other),
        }
        assert_eq!(
            total.body.plan,
            Some(ExecPlan::Reduce {
                last_axis: Some(Axis::new("items"))
            })
        );
    }

    #[test]
    fn scalar_select_takes_mask_axes() {
        let m = stamp_decls(vec![Declaration::value(
            "hot_flag",
            Expr::select(
                Expr::input(&["items", "tags", "hot"]),
                Expr::constant(Literal::Integer(1)),
                Expr::constant(Literal::Integer(0)),
            ),
        )])
        .unwrap();
        let d = m.get("hot_flag").unwrap();
        assert_eq!(*d.stamp.axes(), Axes::from_names(["items", "tags"]));
        assert_eq!(*d.stamp.dtype(), DType::Integer);
    }

    #[test]
    fn mask_deeper_than_branches_rejected() {
        let err = stamp_decls(vec![Declaration::value(
            "bad",
            Expr::select(
                Expr::input(&["items", "tags", "hot"]),
                Expr::input(&["items", "price"]),
                Expr::constant(Literal::Float(0.0)),
            ),
        )])
        .unwrap_err();
        assert_eq!(err.code, Some(codes::E0101));
        assert!(err.message.contains("not a prefix of branch axes"));
    }

    #[test]
    fn scalar_mask_broadcasts_into_branches() {
        let m = stamp_decls(vec![Declaration::value(
            "p",
            Expr::select(
                Expr::input(&["flag"]),
                Expr::input(&["items", "price"]),
                Expr::constant(Literal::Float(0.0)),
            ),
        )])
        .unwrap();
        let d = m.get("p").unwrap();
        assert_eq!(*d.stamp.axes(), Axes::from_names(["items"]));
        match &d.body.plan {
            Some(ExecPlan::Elementwise { needs_expand, .. }) => {
                assert_eq!(needs_expand, &vec![true, false, true]);
            }
            other => panic!("expected elementwise plan, got {:?}", other),
        }
    }

    #[test]
    fn trait_must_be_boolean() {
        let err = stamp_decls(vec![Declaration::trait_decl(
            "pricey",
            Expr::input(&["items", "price"]),
        )])
        .unwrap_err();
        assert_eq!(err.code, Some(codes::E0108));

        let ok = stamp_decls(vec![Declaration::trait_decl(
            "pricey",
            Expr::call(
                "gt",
                vec![Expr::input(&["items", "price"]), Expr::constant(Literal::Float(5.0))],
            ),
        )]);
        assert!(ok.is_ok());
    }

    #[test]
    fn constructor_plan_records_arity() {
        let m = stamp_decls(vec![Declaration::value(
            "arr",
            Expr::call(
                "array",
                vec![Expr::input(&["items", "price"]), Expr::input(&["items", "qty"])],
            ),
        )])
        .unwrap();
        match &m.get("arr").unwrap().body.plan {
            Some(ExecPlan::Constructor { arity, .. }) => assert_eq!(*arity, 2),
            other => panic!("expected constructor plan, got {:?}", other),
        }
    }

    #[test]
    fn display_lists_nodes() {
        let m = stamp_decls(vec![subtotal()]).unwrap();
        let text = m.to_string();
        assert_eq!(
            text,
            "value subtotal : [items] float  # topo 0\n\
             \x20 v2 call multiply : [items] float\n\
             \x20   v0 input items.price : [items] float\n\
             \x20   v1 input items.qty : [items] integer\n"
        );
    }
}
