// lower.rs — Stamped declarations → LIR instruction streams
//
// Lowers each stamped declaration to a flat loop/register sequence while
// keeping an explicit loop context Γ (stack of open frames). Before a node is
// evaluated, Γ is aligned to the axes the node needs: frames are closed only
// where Γ diverges from those axes, and missing loops are opened over the
// collection chosen by `choose_carrier_for_axes`. A reduction opens its own
// frames for the reduced axes, nested inside whatever is live.
//
// Preconditions: `module` is fully stamped; `carriers` was built from it.
// Postconditions: every declaration ends with one `yield` followed only by
//   the `loop_end`s of the frames still open; registers, loop ids and
//   accumulators are numbered from 0 per declaration.
// Failure modes: E0301/E0302 (no carrier), E0303/E0304 (bad reduction),
//   E0105 (reducer without an identity at the result dtype).
// Side effects: none.

use crate::ast::{FieldPath, Literal, Span};
use crate::axes::{Axes, Axis};
use crate::carrier::CarrierMap;
use crate::diag::{codes, Diagnostic};
use crate::id::{LoopId, Reg, RegAllocator};
use crate::lir::{Instr, LirDecl, LirModule, Op};
use crate::registry::Registry;
use crate::stamp::{StampedDeclaration, StampedExpr, StampedKind, StampedModule};
use crate::types::DType;

// ── Entry points ────────────────────────────────────────────────────────────

/// Lower every declaration of the module, in order.
pub fn lower_module(
    module: &StampedModule,
    carriers: &CarrierMap,
    registry: &Registry,
) -> Result<LirModule, Diagnostic> {
    let mut decls = Vec::with_capacity(module.len());
    for decl in module.declarations() {
        decls.push(lower_declaration(decl, carriers, registry)?);
    }
    Ok(LirModule { decls })
}

/// Lower one declaration with a fresh register namespace and an empty Γ.
pub fn lower_declaration(
    decl: &StampedDeclaration,
    carriers: &CarrierMap,
    registry: &Registry,
) -> Result<LirDecl, Diagnostic> {
    let mut lowerer = Lowerer {
        carriers,
        registry,
        regs: RegAllocator::new(),
        instrs: Vec::new(),
        gamma: Vec::new(),
        floor: 0,
    };
    lowerer
        .lower_root(&decl.body)
        .map_err(|d| d.in_decl(&decl.name))?;
    Ok(LirDecl {
        name: decl.name.clone(),
        kind: decl.kind,
        axes: decl.stamp.axes().clone(),
        dtype: decl.stamp.dtype().clone(),
        instrs: lowerer.instrs,
    })
}

// ── Carrier choice ──────────────────────────────────────────────────────────

/// Path whose collection a loop over `axes` walks.
///
/// The first input reference in `anchor`'s subtree (input, select operands,
/// reduce argument, call/tuple arguments) whose axes extend `axes` supplies
/// its path prefix; otherwise the module carrier map is consulted.
pub fn choose_carrier_for_axes(
    axes: &Axes,
    anchor: &StampedExpr,
    carriers: &CarrierMap,
) -> Result<FieldPath, Diagnostic> {
    let mut too_short: Option<FieldPath> = None;
    if let Some(path) = local_anchor(axes, anchor, &mut too_short) {
        return Ok(path);
    }
    if let Some(path) = carriers.get(axes) {
        return Ok(path.clone());
    }
    match too_short {
        Some(path) => Err(Diagnostic::error(
            codes::E0301,
            anchor.span,
            format!(
                "input `{}` varies over {} but its path is too short to carry it",
                path, axes
            ),
        )),
        None => Err(Diagnostic::error(
            codes::E0302,
            anchor.span,
            format!("no input path carries axes {}", axes),
        )
        .with_hint("reference an input that varies over these axes")),
    }
}

fn local_anchor(
    axes: &Axes,
    expr: &StampedExpr,
    too_short: &mut Option<FieldPath>,
) -> Option<FieldPath> {
    match &expr.kind {
        StampedKind::Input(path) => {
            if !axes.is_prefix_of(expr.axes()) {
                return None;
            }
            if path.len() >= axes.len() {
                return Some(path.prefix(axes.len()));
            }
            too_short.get_or_insert_with(|| path.clone());
            None
        }
        StampedKind::Constant(_) | StampedKind::DeclRef(_) => None,
        StampedKind::Select {
            cond,
            on_true,
            on_false,
        } => local_anchor(axes, cond, too_short)
            .or_else(|| local_anchor(axes, on_true, too_short))
            .or_else(|| local_anchor(axes, on_false, too_short)),
        StampedKind::Reduce { arg, .. } => local_anchor(axes, arg, too_short),
        StampedKind::Call { args, .. } | StampedKind::Tuple(args) => args
            .iter()
            .find_map(|a| local_anchor(axes, a, too_short)),
    }
}

// ── Lowerer ─────────────────────────────────────────────────────────────────

/// One open loop.
#[derive(Debug, Clone)]
struct Frame {
    /// Axis vector this frame completes (outer frames hold its prefixes).
    logical: Axes,
    carrier: FieldPath,
    element: Reg,
    id: LoopId,
}

struct Lowerer<'a> {
    carriers: &'a CarrierMap,
    registry: &'a Registry,
    regs: RegAllocator,
    instrs: Vec<Instr>,
    gamma: Vec<Frame>,
    /// Frames below this depth belong to an enclosing reduction.
    floor: usize,
}

impl<'a> Lowerer<'a> {
    fn lower_root(&mut self, body: &StampedExpr) -> Result<(), Diagnostic> {
        self.align(body.axes(), body)?;
        let value = self.lower(body)?;
        self.emit(None, Op::Yield { value }, body.span);
        self.close_to(0, body.span);
        Ok(())
    }

    // ── Γ management ──

    fn logical(&self) -> Axes {
        self.gamma
            .last()
            .map(|f| f.logical.clone())
            .unwrap_or_default()
    }

    /// Make the live context cover `target`. A target that is a prefix of
    /// the live context is evaluated in place.
    fn align(&mut self, target: &Axes, anchor: &StampedExpr) -> Result<(), Diagnostic> {
        let current = self.logical();
        if target.is_prefix_of(&current) {
            return Ok(());
        }
        let keep = current.common_prefix_len(target);
        while self.gamma.len() > self.floor && self.logical().len() > keep {
            self.close_one(anchor.span);
        }
        let have = self.logical().len();
        for k in have + 1..=target.len() {
            self.open(target.prefix(k), anchor)?;
        }
        Ok(())
    }

    fn open(&mut self, logical: Axes, anchor: &StampedExpr) -> Result<(), Diagnostic> {
        let axis: Axis = match logical.last() {
            Some(a) => a.clone(),
            None => return Ok(()),
        };
        let carrier = choose_carrier_for_axes(&logical, anchor, self.carriers)?;
        let collection = self.collection_register(&carrier, anchor.span);
        let element = self.regs.alloc_reg();
        let index = self.regs.alloc_reg();
        let id = self.regs.alloc_loop();
        self.emit(
            None,
            Op::LoopStart {
                axis,
                collection,
                as_element: element,
                as_index: index,
                id,
            },
            anchor.span,
        );
        self.gamma.push(Frame {
            logical,
            carrier,
            element,
            id,
        });
        Ok(())
    }

    fn close_one(&mut self, span: Span) {
        if let Some(frame) = self.gamma.pop() {
            self.emit(None, Op::LoopEnd { id: frame.id }, span);
        }
    }

    fn close_to(&mut self, depth: usize, span: Span) {
        while self.gamma.len() > depth {
            self.close_one(span);
        }
    }

    // ── Register resolution ──

    /// Collection for a loop over `carrier`: walk down from the innermost
    /// frame whose carrier strictly contains the path's head.
    fn collection_register(&mut self, carrier: &FieldPath, span: Span) -> Reg {
        let base = self
            .gamma
            .iter()
            .rev()
            .find(|f| f.carrier.len() < carrier.len() && carrier.starts_with(&f.carrier))
            .map(|f| (f.element, f.carrier.len()));
        let tokens = carrier.tokens();
        let (mut reg, consumed) = match base {
            Some(found) => found,
            None => (self.load_root(&tokens[0], span), 1),
        };
        for field in &tokens[consumed..] {
            reg = self.load_field(reg, field, None, span);
        }
        reg
    }

    /// Value of an input reference, reusing the innermost frame that already
    /// walks part of its path.
    fn input_register(&mut self, path: &FieldPath, dtype: &DType, span: Span) -> Reg {
        let base = self
            .gamma
            .iter()
            .rev()
            .find(|f| path.starts_with(&f.carrier))
            .map(|f| (f.element, f.carrier.len()));
        let tokens = path.tokens();
        let (mut reg, consumed) = match base {
            Some(found) => found,
            None => (self.load_root(&tokens[0], span), 1),
        };
        let last = tokens.len().saturating_sub(1);
        for (i, field) in tokens.iter().enumerate().skip(consumed) {
            let typed = if i == last { Some(dtype.clone()) } else { None };
            reg = self.load_field(reg, field, typed, span);
        }
        reg
    }

    fn load_root(&mut self, field: &str, span: Span) -> Reg {
        let r = self.regs.alloc_reg();
        self.emit(
            Some(r),
            Op::LoadInput {
                field: field.to_string(),
            },
            span,
        );
        r
    }

    fn load_field(&mut self, base: Reg, field: &str, dtype: Option<DType>, span: Span) -> Reg {
        let r = self.regs.alloc_reg();
        self.emit(
            Some(r),
            Op::LoadField {
                base,
                field: field.to_string(),
                dtype,
            },
            span,
        );
        r
    }

    fn emit(&mut self, result: Option<Reg>, op: Op, span: Span) {
        self.instrs.push(Instr::new(result, op, span));
    }

    fn emit_value(&mut self, op: Op, span: Span) -> Reg {
        let r = self.regs.alloc_reg();
        self.emit(Some(r), op, span);
        r
    }

    // ── Node lowering ──

    fn lower(&mut self, expr: &StampedExpr) -> Result<Reg, Diagnostic> {
        let dtype = expr.dtype().clone();
        match &expr.kind {
            StampedKind::Constant(lit) => Ok(self.emit_value(
                Op::Constant {
                    value: lit.clone(),
                    dtype,
                },
                expr.span,
            )),
            StampedKind::Input(path) => {
                if path.is_empty() {
                    return Err(Diagnostic::error(
                        codes::E0302,
                        expr.span,
                        "input reference with an empty path",
                    ));
                }
                Ok(self.input_register(path, &dtype, expr.span))
            }
            StampedKind::DeclRef(name) => Ok(self.emit_value(
                Op::LoadDeclaration {
                    name: name.clone(),
                    axes: expr.axes().clone(),
                    dtype,
                },
                expr.span,
            )),
            StampedKind::Tuple(elems) => {
                let elems = self.lower_all(elems)?;
                Ok(self.emit_value(Op::MakeTuple { elems, dtype }, expr.span))
            }
            StampedKind::Call { func, args } => {
                let args = self.lower_all(args)?;
                Ok(self.emit_value(
                    Op::KernelCall {
                        func: func.clone(),
                        args,
                        dtype,
                    },
                    expr.span,
                ))
            }
            StampedKind::Select {
                cond,
                on_true,
                on_false,
            } => {
                self.align(expr.axes(), expr)?;
                let cond = self.lower(cond)?;
                let on_true = self.lower(on_true)?;
                let on_false = self.lower(on_false)?;
                Ok(self.emit_value(
                    Op::Select {
                        cond,
                        on_true,
                        on_false,
                        dtype,
                    },
                    expr.span,
                ))
            }
            StampedKind::Reduce { op, over, arg } => self.lower_reduce(expr, op, over, arg),
        }
    }

    fn lower_all(&mut self, exprs: &[StampedExpr]) -> Result<Vec<Reg>, Diagnostic> {
        exprs.iter().map(|e| self.lower(e)).collect()
    }

    fn lower_reduce(
        &mut self,
        expr: &StampedExpr,
        op: &str,
        over: &Axes,
        arg: &StampedExpr,
    ) -> Result<Reg, Diagnostic> {
        let result_axes = expr.axes();
        if arg.axes().is_empty() {
            return Err(Diagnostic::error(
                codes::E0303,
                expr.span,
                format!("`{}` reduces a scalar argument", op),
            )
            .with_hint("the reduced argument must vary over at least one axis"));
        }
        let expected = result_axes.concat(over);
        if *arg.axes() != expected {
            return Err(Diagnostic::error(
                codes::E0304,
                expr.span,
                format!(
                    "reduction argument axes {} differ from result axes {} ++ over {}",
                    arg.axes(),
                    result_axes,
                    over
                ),
            ));
        }
        let dtype = expr.dtype().clone();
        let identity = self.identity(op, &dtype, expr.span)?;

        self.align(result_axes, expr)?;
        let acc = self.regs.alloc_acc();
        self.emit(
            None,
            Op::DeclareAccumulator {
                acc,
                op: op.to_string(),
                identity,
                dtype: dtype.clone(),
            },
            expr.span,
        );

        let depth = self.gamma.len();
        let saved_floor = self.floor;
        for i in 0..over.len() {
            let loop_axes = result_axes.concat(&over.prefix(i + 1));
            self.open(loop_axes.clone(), arg).map_err(|d| {
                d.with_cause(
                    format!("opening loop {} of `{}` over {}", loop_axes, op, over),
                    Some(expr.span),
                )
            })?;
        }
        self.floor = self.gamma.len();
        let value = self.lower(arg)?;
        self.emit(
            None,
            Op::Accumulate {
                acc,
                op: op.to_string(),
                value,
            },
            expr.span,
        );
        self.floor = saved_floor;
        self.close_to(depth, expr.span);

        Ok(self.emit_value(Op::LoadAccumulator { acc, dtype }, expr.span))
    }

    fn identity(&self, op: &str, dtype: &DType, span: Span) -> Result<Literal, Diagnostic> {
        let spec = self.registry.get(op).ok_or_else(|| {
            Diagnostic::error(codes::E0104, span, format!("unknown function `{}`", op))
        })?;
        spec.identity
            .and_then(|id| id.literal(dtype))
            .ok_or_else(|| {
                Diagnostic::error(
                    codes::E0105,
                    span,
                    format!("reducer `{}` has no identity value at {}", op, dtype),
                )
            })
    }
}
