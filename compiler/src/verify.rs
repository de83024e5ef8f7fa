// verify.rs — Static checks over lowered LIR
//
// A pure pass over one declaration's instruction list. Checks that every
// register and accumulator is defined before it is read, that loop_start and
// loop_end nest properly, and that there is exactly one yield with only
// loop_ends after it.
//
// Preconditions: none; any instruction list is accepted.
// Postconditions: `Ok(())` means the list is structurally executable.
// Failure modes: first violation as a `Diagnostic` (E0401–E0405).
// Side effects: none.

use std::collections::HashSet;

use crate::diag::{codes, Diagnostic};
use crate::id::{AccId, LoopId, Reg};
use crate::lir::{Instr, LirDecl, LirModule, Op, Opcode};

/// Check every declaration of the module.
pub fn verify_module(module: &LirModule) -> Result<(), Diagnostic> {
    for decl in &module.decls {
        verify_decl(decl)?;
    }
    Ok(())
}

/// Check one declaration; the first violation wins.
pub fn verify_decl(decl: &LirDecl) -> Result<(), Diagnostic> {
    check(&decl.instrs).map_err(|d| d.in_decl(&decl.name))
}

fn check(instrs: &[Instr]) -> Result<(), Diagnostic> {
    let mut regs: HashSet<Reg> = HashSet::new();
    let mut accs: HashSet<AccId> = HashSet::new();
    let mut loops: Vec<LoopId> = Vec::new();
    let mut yielded = false;

    for (pos, instr) in instrs.iter().enumerate() {
        if instr.opcode() == Opcode::Yield && yielded {
            return Err(Diagnostic::error(
                codes::E0403,
                instr.location,
                format!("second yield at instruction {}", pos),
            ));
        }
        if yielded && instr.opcode() != Opcode::LoopEnd {
            return Err(Diagnostic::error(
                codes::E0405,
                instr.location,
                format!("`{}` after yield at instruction {}", instr.opcode(), pos),
            ));
        }

        for r in instr.op.inputs() {
            if !regs.contains(&r) {
                return Err(Diagnostic::error(
                    codes::E0401,
                    instr.location,
                    format!("{} read before definition by `{}`", r, instr.opcode()),
                ));
            }
        }

        match &instr.op {
            Op::DeclareAccumulator { acc, .. } => {
                accs.insert(*acc);
            }
            Op::Accumulate { acc, .. } | Op::LoadAccumulator { acc, .. } => {
                if !accs.contains(acc) {
                    return Err(Diagnostic::error(
                        codes::E0401,
                        instr.location,
                        format!("{} used before declare_accumulator", acc),
                    ));
                }
            }
            Op::LoopStart { id, .. } => loops.push(*id),
            Op::LoopEnd { id } => match loops.pop() {
                Some(open) if open == *id => {}
                Some(open) => {
                    return Err(Diagnostic::error(
                        codes::E0402,
                        instr.location,
                        format!("loop_end {} while {} is the innermost open loop", id, open),
                    ));
                }
                None => {
                    return Err(Diagnostic::error(
                        codes::E0402,
                        instr.location,
                        format!("loop_end {} with no open loop", id),
                    ));
                }
            },
            Op::Yield { .. } => yielded = true,
            _ => {}
        }

        regs.extend(instr.defs());
    }

    if let Some(open) = loops.last() {
        let span = instrs.last().map(|i| i.location).unwrap_or_else(|| (0..0).into());
        return Err(Diagnostic::error(
            codes::E0402,
            span,
            format!("{} loop(s) still open at end, innermost {}", loops.len(), open),
        ));
    }
    if !yielded {
        let span = instrs.last().map(|i| i.location).unwrap_or_else(|| (0..0).into());
        return Err(Diagnostic::error(codes::E0404, span, "declaration never yields"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{DeclKind, Literal, Span};
    use crate::axes::{Axes, Axis};
    use crate::types::DType;

    fn sp() -> Span {
        Span::from(0..0)
    }

    fn decl(instrs: Vec<Instr>) -> LirDecl {
        LirDecl {
            name: "d".into(),
            kind: DeclKind::Value,
            axes: Axes::scalar(),
            dtype: DType::Integer,
            instrs,
        }
    }

    fn constant(r: u32) -> Instr {
        Instr::new(
            Some(Reg(r)),
            Op::Constant {
                value: Literal::Integer(1),
                dtype: DType::Integer,
            },
            sp(),
        )
    }

    fn input(r: u32) -> Instr {
        Instr::new(Some(Reg(r)), Op::LoadInput { field: "items".into() }, sp())
    }

    fn loop_start(id: u32, coll: u32, el: u32) -> Instr {
        Instr::new(
            None,
            Op::LoopStart {
                axis: Axis::new("items"),
                collection: Reg(coll),
                as_element: Reg(el),
                as_index: Reg(el + 1),
                id: LoopId(id),
            },
            sp(),
        )
    }

    fn loop_end(id: u32) -> Instr {
        Instr::new(None, Op::LoopEnd { id: LoopId(id) }, sp())
    }

    fn yield_(r: u32) -> Instr {
        Instr::new(None, Op::Yield { value: Reg(r) }, sp())
    }

    fn code(instrs: Vec<Instr>) -> Option<&'static str> {
        verify_decl(&decl(instrs)).err().and_then(|d| d.code).map(|c| c.0)
    }

    #[test]
    fn well_formed_loop_passes() {
        let ok = vec![input(0), loop_start(0, 0, 1), yield_(1), loop_end(0)];
        assert_eq!(code(ok), None);
    }

    #[test]
    fn element_register_not_visible_before_loop() {
        let bad = vec![input(0), yield_(1), loop_start(0, 0, 1), loop_end(0)];
        assert_eq!(code(bad), Some("E0401"));
    }

    #[test]
    fn accumulator_must_be_declared() {
        let bad = vec![
            constant(0),
            Instr::new(
                None,
                Op::Accumulate {
                    acc: AccId(0),
                    op: "sum".into(),
                    value: Reg(0),
                },
                sp(),
            ),
            yield_(0),
        ];
        assert_eq!(code(bad), Some("E0401"));
    }

    #[test]
    fn unbalanced_loops() {
        assert_eq!(code(vec![constant(0), loop_end(0), yield_(0)]), Some("E0402"));
        assert_eq!(
            code(vec![input(0), loop_start(0, 0, 1), yield_(1)]),
            Some("E0402")
        );
        let crossed = vec![
            input(0),
            loop_start(0, 0, 1),
            loop_start(1, 0, 3),
            yield_(3),
            loop_end(0),
            loop_end(1),
        ];
        assert_eq!(code(crossed), Some("E0402"));
    }

    #[test]
    fn yield_count() {
        assert_eq!(code(vec![constant(0)]), Some("E0404"));
        assert_eq!(code(vec![]), Some("E0404"));
        assert_eq!(
            code(vec![constant(0), yield_(0), yield_(0)]),
            Some("E0403")
        );
    }

    #[test]
    fn only_loop_end_after_yield() {
        assert_eq!(code(vec![constant(0), yield_(0), constant(1)]), Some("E0405"));
    }

    #[test]
    fn errors_name_the_declaration() {
        let err = verify_decl(&decl(vec![constant(0)])).unwrap_err();
        assert_eq!(err.decl.as_deref(), Some("d"));
    }
}
