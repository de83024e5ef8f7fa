//! LIR – loop/register instruction stream produced by the lowerer.
//!
//! Each declaration owns a flat instruction list. Loops are explicit
//! `loop_start`/`loop_end` pairs, reductions go through named accumulators,
//! and the declaration's value leaves through exactly one `yield`. A
//! downstream interpreter can run it without any further shape reasoning.
//!
//! Every opcode has its own fixed attribute set (`Op` variants), so a
//! `loop_start` always carries `{axis, as_element, as_index, id}`.

use std::fmt;

use serde::{Serialize, Serializer};

use crate::ast::{DeclKind, Literal, Span};
use crate::axes::{Axes, Axis};
use crate::id::{AccId, LoopId, Reg};
use crate::types::DType;

// ── Opcodes ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Constant,
    LoadInput,
    LoadField,
    LoadDeclaration,
    MakeTuple,
    Select,
    KernelCall,
    DeclareAccumulator,
    Accumulate,
    LoadAccumulator,
    LoopStart,
    LoopEnd,
    Yield,
}

impl Opcode {
    pub fn as_str(self) -> &'static str {
        match self {
            Opcode::Constant => "constant",
            Opcode::LoadInput => "load_input",
            Opcode::LoadField => "load_field",
            Opcode::LoadDeclaration => "load_declaration",
            Opcode::MakeTuple => "make_tuple",
            Opcode::Select => "select",
            Opcode::KernelCall => "kernel_call",
            Opcode::DeclareAccumulator => "declare_accumulator",
            Opcode::Accumulate => "accumulate",
            Opcode::LoadAccumulator => "load_accumulator",
            Opcode::LoopStart => "loop_start",
            Opcode::LoopEnd => "loop_end",
            Opcode::Yield => "yield",
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Instructions ───────────────────────────────────────────────────────────

/// Opcode plus its attributes. Register operands are the instruction's inputs.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "opcode", rename_all = "snake_case")]
pub enum Op {
    Constant {
        value: Literal,
        dtype: DType,
    },
    /// Root field of the input record.
    LoadInput {
        field: String,
    },
    /// `dtype` is `None` for intermediate collections.
    LoadField {
        base: Reg,
        field: String,
        dtype: Option<DType>,
    },
    LoadDeclaration {
        name: String,
        axes: Axes,
        dtype: DType,
    },
    MakeTuple {
        elems: Vec<Reg>,
        dtype: DType,
    },
    Select {
        cond: Reg,
        on_true: Reg,
        on_false: Reg,
        dtype: DType,
    },
    KernelCall {
        func: String,
        args: Vec<Reg>,
        dtype: DType,
    },
    DeclareAccumulator {
        acc: AccId,
        op: String,
        identity: Literal,
        dtype: DType,
    },
    Accumulate {
        acc: AccId,
        op: String,
        value: Reg,
    },
    LoadAccumulator {
        acc: AccId,
        dtype: DType,
    },
    LoopStart {
        axis: Axis,
        collection: Reg,
        as_element: Reg,
        as_index: Reg,
        id: LoopId,
    },
    LoopEnd {
        id: LoopId,
    },
    Yield {
        value: Reg,
    },
}

impl Op {
    pub fn opcode(&self) -> Opcode {
        match self {
            Op::Constant { .. } => Opcode::Constant,
            Op::LoadInput { .. } => Opcode::LoadInput,
            Op::LoadField { .. } => Opcode::LoadField,
            Op::LoadDeclaration { .. } => Opcode::LoadDeclaration,
            Op::MakeTuple { .. } => Opcode::MakeTuple,
            Op::Select { .. } => Opcode::Select,
            Op::KernelCall { .. } => Opcode::KernelCall,
            Op::DeclareAccumulator { .. } => Opcode::DeclareAccumulator,
            Op::Accumulate { .. } => Opcode::Accumulate,
            Op::LoadAccumulator { .. } => Opcode::LoadAccumulator,
            Op::LoopStart { .. } => Opcode::LoopStart,
            Op::LoopEnd { .. } => Opcode::LoopEnd,
            Op::Yield { .. } => Opcode::Yield,
        }
    }

    /// Registers read by this instruction, in operand order.
    pub fn inputs(&self) -> Vec<Reg> {
        match self {
            Op::Constant { .. }
            | Op::LoadInput { .. }
            | Op::LoadDeclaration { .. }
            | Op::DeclareAccumulator { .. }
            | Op::LoadAccumulator { .. }
            | Op::LoopEnd { .. } => Vec::new(),
            Op::LoadField { base, .. } => vec![*base],
            Op::MakeTuple { elems, .. } => elems.clone(),
            Op::Select {
                cond,
                on_true,
                on_false,
                ..
            } => vec![*cond, *on_true, *on_false],
            Op::KernelCall { args, .. } => args.clone(),
            Op::Accumulate { value, .. } => vec![*value],
            Op::LoopStart { collection, .. } => vec![*collection],
            Op::Yield { value } => vec![*value],
        }
    }

    /// Rewrite every register this instruction reads.
    pub fn map_inputs(&mut self, mut f: impl FnMut(Reg) -> Reg) {
        match self {
            Op::Constant { .. }
            | Op::LoadInput { .. }
            | Op::LoadDeclaration { .. }
            | Op::DeclareAccumulator { .. }
            | Op::LoadAccumulator { .. }
            | Op::LoopEnd { .. } => {}
            Op::LoadField { base, .. } => *base = f(*base),
            Op::MakeTuple { elems, .. } => elems.iter_mut().for_each(|r| *r = f(*r)),
            Op::Select {
                cond,
                on_true,
                on_false,
                ..
            } => {
                *cond = f(*cond);
                *on_true = f(*on_true);
                *on_false = f(*on_false);
            }
            Op::KernelCall { args, .. } => args.iter_mut().for_each(|r| *r = f(*r)),
            Op::Accumulate { value, .. } => *value = f(*value),
            Op::LoopStart { collection, .. } => *collection = f(*collection),
            Op::Yield { value } => *value = f(*value),
        }
    }

    /// Accumulator named by this instruction, if any.
    pub fn accumulator(&self) -> Option<AccId> {
        match self {
            Op::DeclareAccumulator { acc, .. }
            | Op::Accumulate { acc, .. }
            | Op::LoadAccumulator { acc, .. } => Some(*acc),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Instr {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Reg>,
    #[serde(flatten)]
    pub op: Op,
    #[serde(serialize_with = "serialize_span")]
    pub location: Span,
}

fn serialize_span<S: Serializer>(span: &Span, s: S) -> Result<S::Ok, S::Error> {
    (span.start, span.end).serialize(s)
}

impl Instr {
    pub fn new(result: Option<Reg>, op: Op, location: Span) -> Self {
        Instr {
            result,
            op,
            location,
        }
    }

    pub fn opcode(&self) -> Opcode {
        self.op.opcode()
    }

    /// Registers this instruction defines: its result, or a loop's
    /// element and index registers.
    pub fn defs(&self) -> Vec<Reg> {
        let mut out: Vec<Reg> = self.result.into_iter().collect();
        if let Op::LoopStart {
            as_element,
            as_index,
            ..
        } = &self.op
        {
            out.push(*as_element);
            out.push(*as_index);
        }
        out
    }
}

// ── Declarations and modules ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LirDecl {
    pub name: String,
    pub kind: DeclKind,
    pub axes: Axes,
    pub dtype: DType,
    pub instrs: Vec<Instr>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LirModule {
    pub decls: Vec<LirDecl>,
}

impl LirModule {
    pub fn get(&self, name: &str) -> Option<&LirDecl> {
        self.decls.iter().find(|d| d.name == name)
    }

    pub fn instr_count(&self) -> usize {
        self.decls.iter().map(|d| d.instrs.len()).sum()
    }
}

// ── Display ────────────────────────────────────────────────────────────────

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(r) = self.result {
            write!(f, "{} = ", r)?;
        }
        match &self.op {
            Op::Constant { value, dtype } => write!(f, "constant {} : {}", value, dtype),
            Op::LoadInput { field } => write!(f, "load_input {}", field),
            Op::LoadField { base, field, dtype } => {
                write!(f, "load_field {}.{}", base, field)?;
                if let Some(t) = dtype {
                    write!(f, " : {}", t)?;
                }
                Ok(())
            }
            Op::LoadDeclaration { name, axes, dtype } => {
                write!(f, "load_declaration {} : {} {}", name, axes, dtype)
            }
            Op::MakeTuple { elems, dtype } => {
                write!(f, "make_tuple(")?;
                write_regs(f, elems)?;
                write!(f, ") : {}", dtype)
            }
            Op::Select {
                cond,
                on_true,
                on_false,
                dtype,
            } => write!(
                f,
                "select({}, {}, {}) : {}",
                cond, on_true, on_false, dtype
            ),
            Op::KernelCall { func, args, dtype } => {
                write!(f, "kernel_call {}(", func)?;
                write_regs(f, args)?;
                write!(f, ") : {}", dtype)
            }
            Op::DeclareAccumulator {
                acc,
                op,
                identity,
                dtype,
            } => write!(
                f,
                "declare_accumulator {} {} = {} : {}",
                acc, op, identity, dtype
            ),
            Op::Accumulate { acc, op, value } => write!(f, "accumulate {} {} {}", acc, op, value),
            Op::LoadAccumulator { acc, dtype } => write!(f, "load_accumulator {} : {}", acc, dtype),
            Op::LoopStart {
                axis,
                collection,
                as_element,
                as_index,
                id,
            } => write!(
                f,
                "loop_start {} over {} axis={} el={} idx={}",
                id, collection, axis, as_element, as_index
            ),
            Op::LoopEnd { id } => write!(f, "loop_end {}", id),
            Op::Yield { value } => write!(f, "yield {}", value),
        }
    }
}

fn write_regs(f: &mut fmt::Formatter<'_>, regs: &[Reg]) -> fmt::Result {
    for (i, r) in regs.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{}", r)?;
    }
    Ok(())
}

impl fmt::Display for LirDecl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} {} : {} {}", self.kind, self.name, self.axes, self.dtype)?;
        let mut depth = 1usize;
        for instr in &self.instrs {
            if instr.opcode() == Opcode::LoopEnd {
                depth = depth.saturating_sub(1).max(1);
            }
            writeln!(f, "{}{}", "  ".repeat(depth), instr)?;
            if instr.opcode() == Opcode::LoopStart {
                depth += 1;
            }
        }
        Ok(())
    }
}

impl fmt::Display for LirModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, decl) in self.decls.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", decl)?;
        }
        Ok(())
    }
}
