// inline.rs — Splice callee loop bodies into matching call sites
//
// A `load_declaration` whose callee yields under exactly the caller's open
// loop axes is replaced by the callee's loop body. The callee's own loops over
// those axes are stripped, its element/index registers are remapped to the
// caller's frames, and every other register, loop id and accumulator is
// renamed into fresh ids past the caller's namespace. Anything else is left
// untouched.
//
// Preconditions: every declaration passed `verify_decl`; callees precede
//   callers.
// Postconditions: a new module; input declarations are not modified.
// Failure modes: none (non-matching sites are kept as `load_declaration`).
// Side effects: none.

use std::collections::{HashMap, HashSet};

use crate::axes::{Axes, Axis};
use crate::id::{AccId, LoopId, Reg, RegAllocator};
use crate::lir::{Instr, LirDecl, LirModule, Op};

// ── Γ-info ──────────────────────────────────────────────────────────────────

/// One loop frame open at a declaration's yield.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GammaFrame {
    pub axis: Axis,
    pub element: Reg,
    pub index: Reg,
    pub id: LoopId,
}

/// Loop context live at a declaration's yield, outermost first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GammaInfo {
    pub axes: Axes,
    pub frames: Vec<GammaFrame>,
}

/// Replay `loop_start`/`loop_end` up to the yield.
pub fn gamma_info(decl: &LirDecl) -> GammaInfo {
    let mut frames: Vec<GammaFrame> = Vec::new();
    for instr in &decl.instrs {
        match &instr.op {
            Op::LoopStart {
                axis,
                as_element,
                as_index,
                id,
                ..
            } => frames.push(GammaFrame {
                axis: axis.clone(),
                element: *as_element,
                index: *as_index,
                id: *id,
            }),
            Op::LoopEnd { .. } => {
                frames.pop();
            }
            Op::Yield { .. } => break,
            _ => {}
        }
    }
    GammaInfo {
        axes: Axes::new(frames.iter().map(|f| f.axis.clone()).collect()),
        frames,
    }
}

// ── Fresh ids ───────────────────────────────────────────────────────────────

/// Fresh id source for one caller, starting past its highest ids.
struct Freshener {
    ids: RegAllocator,
}

impl Freshener {
    fn for_decl(decl: &LirDecl) -> Self {
        let mut reg = 0;
        let mut loop_id = 0;
        let mut acc = 0;
        for instr in &decl.instrs {
            for r in instr.defs() {
                reg = reg.max(r.0 + 1);
            }
            if let Op::LoopStart { id, .. } = &instr.op {
                loop_id = loop_id.max(id.0 + 1);
            }
            if let Some(a) = instr.op.accumulator() {
                acc = acc.max(a.0 + 1);
            }
        }
        Freshener {
            ids: RegAllocator::starting_at(reg, loop_id, acc),
        }
    }
}

/// Callee → caller id mapping for one splice.
struct Renamer<'f> {
    fresh: &'f mut Freshener,
    regs: HashMap<Reg, Reg>,
    loops: HashMap<LoopId, LoopId>,
    accs: HashMap<AccId, AccId>,
}

impl<'f> Renamer<'f> {
    fn reg(&mut self, r: Reg) -> Reg {
        let fresh = &mut self.fresh.ids;
        *self.regs.entry(r).or_insert_with(|| fresh.alloc_reg())
    }

    fn loop_id(&mut self, id: LoopId) -> LoopId {
        let fresh = &mut self.fresh.ids;
        *self.loops.entry(id).or_insert_with(|| fresh.alloc_loop())
    }

    fn acc(&mut self, a: AccId) -> AccId {
        let fresh = &mut self.fresh.ids;
        *self.accs.entry(a).or_insert_with(|| fresh.alloc_acc())
    }

    fn rename(&mut self, instr: &Instr) -> Instr {
        let mut op = instr.op.clone();
        op.map_inputs(|r| self.reg(r));
        match &mut op {
            Op::LoopStart {
                as_element,
                as_index,
                id,
                ..
            } => {
                *as_element = self.reg(*as_element);
                *as_index = self.reg(*as_index);
                *id = self.loop_id(*id);
            }
            Op::LoopEnd { id } => *id = self.loop_id(*id),
            Op::DeclareAccumulator { acc, .. }
            | Op::Accumulate { acc, .. }
            | Op::LoadAccumulator { acc, .. } => *acc = self.acc(*acc),
            _ => {}
        }
        let result = instr.result.map(|r| self.reg(r));
        Instr::new(result, op, instr.location)
    }
}

// ── Inliner ─────────────────────────────────────────────────────────────────

/// Inline every eligible call site. Declarations are processed in order, so
/// callees are spliced in their already-inlined form.
pub fn inline_module(module: &LirModule) -> LirModule {
    let mut done: Vec<LirDecl> = Vec::with_capacity(module.decls.len());
    let mut infos: HashMap<String, GammaInfo> = HashMap::new();
    for decl in &module.decls {
        let inlined = inline_decl(decl, &done, &infos);
        infos.insert(inlined.name.clone(), gamma_info(&inlined));
        done.push(inlined);
    }
    LirModule { decls: done }
}

/// Caller loop open at the current walk position.
struct OpenFrame {
    axis: Axis,
    element: Reg,
    index: Reg,
}

fn inline_decl(caller: &LirDecl, done: &[LirDecl], infos: &HashMap<String, GammaInfo>) -> LirDecl {
    let mut fresh = Freshener::for_decl(caller);
    let mut subst: HashMap<Reg, Reg> = HashMap::new();
    let mut open: Vec<OpenFrame> = Vec::new();
    let mut out: Vec<Instr> = Vec::with_capacity(caller.instrs.len());

    for instr in &caller.instrs {
        let mut instr = instr.clone();
        instr
            .op
            .map_inputs(|r| subst.get(&r).copied().unwrap_or(r));
        match &instr.op {
            Op::LoopStart {
                axis,
                as_element,
                as_index,
                ..
            } => open.push(OpenFrame {
                axis: axis.clone(),
                element: *as_element,
                index: *as_index,
            }),
            Op::LoopEnd { .. } => {
                open.pop();
            }
            Op::LoadDeclaration { name, .. } => {
                let callee = done.iter().find(|d| d.name == *name);
                let info = infos.get(name);
                if let (Some(callee), Some(info), Some(result)) = (callee, info, instr.result) {
                    if axes_match(info, &open) {
                        let (body, yielded) = splice(callee, info, &open, &mut fresh);
                        out.extend(body);
                        subst.insert(result, yielded);
                        continue;
                    }
                }
            }
            _ => {}
        }
        out.push(instr);
    }

    LirDecl {
        instrs: out,
        ..caller.clone()
    }
}

fn axes_match(info: &GammaInfo, open: &[OpenFrame]) -> bool {
    info.frames.len() == open.len()
        && info
            .frames
            .iter()
            .zip(open)
            .all(|(f, o)| f.axis == o.axis)
}

/// Callee body with its Γ loops stripped and ids renamed; returns the spliced
/// instructions and the register holding the callee's yielded value.
fn splice(
    callee: &LirDecl,
    info: &GammaInfo,
    open: &[OpenFrame],
    fresh: &mut Freshener,
) -> (Vec<Instr>, Reg) {
    let gamma_ids: HashSet<LoopId> = info.frames.iter().map(|f| f.id).collect();
    let mut renamer = Renamer {
        fresh,
        regs: HashMap::new(),
        loops: HashMap::new(),
        accs: HashMap::new(),
    };
    for (frame, site) in info.frames.iter().zip(open) {
        renamer.regs.insert(frame.element, site.element);
        renamer.regs.insert(frame.index, site.index);
    }

    let start = info
        .frames
        .first()
        .and_then(|first| {
            callee.instrs.iter().position(
                |i| matches!(&i.op, Op::LoopStart { id, .. } if *id == first.id),
            )
        })
        .unwrap_or(0);

    let mut body = Vec::new();
    let mut yielded = None;
    for instr in &callee.instrs[start..] {
        match &instr.op {
            Op::LoopStart { id, .. } | Op::LoopEnd { id } if gamma_ids.contains(id) => {}
            Op::Yield { value } => yielded = Some(renamer.reg(*value)),
            _ => body.push(renamer.rename(instr)),
        }
    }
    // A verified callee always yields; fall back to a fresh name otherwise.
    let yielded = match yielded {
        Some(r) => r,
        None => renamer.fresh.ids.alloc_reg(),
    };
    (drop_dead_loads(body, yielded), yielded)
}

/// Remove loads whose results are never read. Only `load_input` and
/// `load_field` are candidates; everything else is kept.
fn drop_dead_loads(body: Vec<Instr>, yielded: Reg) -> Vec<Instr> {
    let mut live: HashSet<Reg> = HashSet::from([yielded]);
    let mut kept: Vec<Instr> = Vec::with_capacity(body.len());
    for instr in body.into_iter().rev() {
        let is_load = matches!(instr.op, Op::LoadInput { .. } | Op::LoadField { .. });
        if is_load && !instr.result.is_some_and(|r| live.contains(&r)) {
            continue;
        }
        live.extend(instr.op.inputs());
        kept.push(instr);
    }
    kept.reverse();
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{DeclKind, Literal, Span};
    use crate::types::DType;
    use crate::verify::verify_decl;

    fn sp() -> Span {
        Span::from(0..0)
    }

    fn i(result: Option<u32>, op: Op) -> Instr {
        Instr::new(result.map(Reg), op, sp())
    }

    fn items_loop(id: u32, coll: u32, el: u32) -> Instr {
        i(
            None,
            Op::LoopStart {
                axis: Axis::new("items"),
                collection: Reg(coll),
                as_element: Reg(el),
                as_index: Reg(el + 1),
                id: LoopId(id),
            },
        )
    }

    fn subtotal() -> LirDecl {
        LirDecl {
            name: "subtotal".into(),
            kind: DeclKind::Value,
            axes: Axes::from_names(["items"]),
            dtype: DType::Float,
            instrs: vec![
                i(Some(0), Op::LoadInput { field: "items".into() }),
                items_loop(0, 0, 1),
                i(
                    Some(3),
                    Op::LoadField {
                        base: Reg(1),
                        field: "price".into(),
                        dtype: Some(DType::Float),
                    },
                ),
                i(
                    Some(4),
                    Op::LoadField {
                        base: Reg(1),
                        field: "qty".into(),
                        dtype: Some(DType::Integer),
                    },
                ),
                i(
                    Some(5),
                    Op::KernelCall {
                        func: "multiply".into(),
                        args: vec![Reg(3), Reg(4)],
                        dtype: DType::Float,
                    },
                ),
                i(None, Op::Yield { value: Reg(5) }),
                i(None, Op::LoopEnd { id: LoopId(0) }),
            ],
        }
    }

    fn total() -> LirDecl {
        LirDecl {
            name: "total".into(),
            kind: DeclKind::Value,
            axes: Axes::scalar(),
            dtype: DType::Float,
            instrs: vec![
                i(
                    None,
                    Op::DeclareAccumulator {
                        acc: AccId(0),
                        op: "sum".into(),
                        identity: Literal::Float(0.0),
                        dtype: DType::Float,
                    },
                ),
                i(Some(0), Op::LoadInput { field: "items".into() }),
                items_loop(0, 0, 1),
                i(
                    Some(3),
                    Op::LoadDeclaration {
                        name: "subtotal".into(),
                        axes: Axes::from_names(["items"]),
                        dtype: DType::Float,
                    },
                ),
                i(
                    None,
                    Op::Accumulate {
                        acc: AccId(0),
                        op: "sum".into(),
                        value: Reg(3),
                    },
                ),
                i(None, Op::LoopEnd { id: LoopId(0) }),
                i(
                    Some(4),
                    Op::LoadAccumulator {
                        acc: AccId(0),
                        dtype: DType::Float,
                    },
                ),
                i(None, Op::Yield { value: Reg(4) }),
            ],
        }
    }

    #[test]
    fn gamma_info_replays_frames_to_yield() {
        let info = gamma_info(&subtotal());
        assert_eq!(info.axes, Axes::from_names(["items"]));
        assert_eq!(
            info.frames,
            vec![GammaFrame {
                axis: Axis::new("items"),
                element: Reg(1),
                index: Reg(2),
                id: LoopId(0),
            }]
        );
        assert!(gamma_info(&total()).frames.is_empty());
    }

    #[test]
    fn matching_site_is_spliced() {
        let module = LirModule {
            decls: vec![subtotal(), total()],
        };
        let inlined = inline_module(&module);
        let listing: Vec<String> = inlined
            .get("total")
            .unwrap()
            .instrs
            .iter()
            .map(|x| x.to_string())
            .collect();
        assert_eq!(
            listing,
            vec![
                "declare_accumulator acc0 sum = 0.0 : float",
                "%0 = load_input items",
                "loop_start L0 over %0 axis=items el=%1 idx=%2",
                "%5 = load_field %1.price : float",
                "%6 = load_field %1.qty : integer",
                "%7 = kernel_call multiply(%5, %6) : float",
                "accumulate acc0 sum %7",
                "loop_end L0",
                "%4 = load_accumulator acc0 : float",
                "yield %4",
            ]
        );
        verify_decl(inlined.get("total").unwrap()).unwrap();
        // Input module is not modified.
        assert_eq!(module.get("total").unwrap(), &total());
        assert_eq!(inlined.get("subtotal").unwrap(), &subtotal());
    }

    #[test]
    fn mismatched_axes_left_alone() {
        // At top level the caller has no open loops, but subtotal needs [items].
        let caller = LirDecl {
            name: "again".into(),
            kind: DeclKind::Value,
            axes: Axes::from_names(["items"]),
            dtype: DType::Float,
            instrs: vec![
                i(
                    Some(0),
                    Op::LoadDeclaration {
                        name: "subtotal".into(),
                        axes: Axes::from_names(["items"]),
                        dtype: DType::Float,
                    },
                ),
                i(None, Op::Yield { value: Reg(0) }),
            ],
        };
        let module = LirModule {
            decls: vec![subtotal(), caller.clone()],
        };
        let inlined = inline_module(&module);
        assert_eq!(inlined.get("again").unwrap(), &caller);
    }

    #[test]
    fn scalar_callee_spliced_with_fresh_accumulators() {
        let caller = LirDecl {
            name: "doubled".into(),
            kind: DeclKind::Value,
            axes: Axes::scalar(),
            dtype: DType::Float,
            instrs: vec![
                i(
                    Some(0),
                    Op::LoadDeclaration {
                        name: "total".into(),
                        axes: Axes::scalar(),
                        dtype: DType::Float,
                    },
                ),
                i(
                    Some(1),
                    Op::KernelCall {
                        func: "add".into(),
                        args: vec![Reg(0), Reg(0)],
                        dtype: DType::Float,
                    },
                ),
                i(None, Op::Yield { value: Reg(1) }),
            ],
        };
        let module = LirModule {
            decls: vec![subtotal(), total(), caller],
        };
        let inlined = inline_module(&module);
        let doubled = inlined.get("doubled").unwrap();
        verify_decl(doubled).unwrap();
        let text: Vec<String> = doubled.instrs.iter().map(|x| x.to_string()).collect();
        // total's accumulator and loop are renamed into doubled's namespace.
        assert_eq!(text[0], "declare_accumulator acc0 sum = 0.0 : float");
        assert!(text.iter().any(|l| l.starts_with("loop_start L0 over")));
        assert!(!text.iter().any(|l| l.contains("load_declaration")));
        let last_two = &text[text.len() - 2..];
        assert!(last_two[0].starts_with("%1 = kernel_call add("));
        assert_eq!(last_two[1], "yield %1");
    }

    #[test]
    fn dead_loads_dropped() {
        let body = vec![
            i(Some(10), Op::LoadInput { field: "unused".into() }),
            i(Some(11), Op::LoadInput { field: "rate".into() }),
        ];
        let kept = drop_dead_loads(body, Reg(11));
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].result, Some(Reg(11)));
    }
}
