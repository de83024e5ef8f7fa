// pass.rs — Pass descriptor module: metadata, dependency resolution, artifact IDs
//
// Declares the compiler's 6 semantic passes (parse is outside the runner),
// their dependency edges, and the artifacts they produce. Used by the pipeline
// runner to compute minimal pass subsets for each --emit target.

use std::collections::HashSet;

// ── Pass and Artifact identifiers ──────────────────────────────────────────

/// Identifies each compiler pass. Parsing runs before the pass runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassId {
    Analyze,
    Stamp,
    Carriers,
    Lower,
    Verify,
    Inline,
}

/// Machine-readable artifact identifiers. Each maps to a concrete type
/// in the compilation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactId {
    Analysis, // Analysis
    Stamped,  // StampedModule
    Carriers, // CarrierMap
    Lir,      // LirModule
    Inlined,  // LirModule (after inlining)
}

// ── Pass descriptor ────────────────────────────────────────────────────────

/// Static metadata about a compiler pass.
pub struct PassDescriptor {
    /// Human-readable name for diagnostics/verbose output.
    pub name: &'static str,
    /// Pass dependencies (other passes whose outputs this pass consumes).
    pub inputs: &'static [PassId],
    /// Artifacts this pass produces.
    pub outputs: &'static [ArtifactId],
    /// Pre/post conditions (documentation only).
    pub invariants: &'static str,
}

/// Return the static descriptor for a given pass.
pub fn descriptor(id: PassId) -> PassDescriptor {
    match id {
        PassId::Analyze => PassDescriptor {
            name: "analyze",
            inputs: &[],
            outputs: &[ArtifactId::Analysis],
            invariants: "every node has axes and dtype; callee decls analyzed first",
        },
        PassId::Stamp => PassDescriptor {
            name: "stamp",
            inputs: &[PassId::Analyze],
            outputs: &[ArtifactId::Stamped],
            invariants: "every node stamped, reducer calls canonicalized to reduce",
        },
        PassId::Carriers => PassDescriptor {
            name: "carriers",
            inputs: &[PassId::Stamp],
            outputs: &[ArtifactId::Carriers],
            invariants: "one carrier per observed axis vector",
        },
        PassId::Lower => PassDescriptor {
            name: "lower",
            inputs: &[PassId::Stamp, PassId::Carriers],
            outputs: &[ArtifactId::Lir],
            invariants: "one instruction list per declaration, single yield",
        },
        PassId::Verify => PassDescriptor {
            name: "verify",
            inputs: &[PassId::Lower],
            outputs: &[],
            invariants: "def-before-use, balanced loops, one trailing yield",
        },
        PassId::Inline => PassDescriptor {
            name: "inline",
            inputs: &[PassId::Verify],
            outputs: &[ArtifactId::Inlined],
            invariants: "matching call sites spliced; result re-verified",
        },
    }
}

// ── Dependency resolution ──────────────────────────────────────────────────

/// All 6 pass IDs in declaration order (used for iteration).
pub const ALL_PASSES: [PassId; 6] = [
    PassId::Analyze,
    PassId::Stamp,
    PassId::Carriers,
    PassId::Lower,
    PassId::Verify,
    PassId::Inline,
];

/// Compute the minimal ordered set of passes needed to produce `terminal`.
/// Returns passes in topological (execution) order.
pub fn required_passes(terminal: PassId) -> Vec<PassId> {
    let mut visited = HashSet::new();
    let mut order = Vec::new();
    visit(terminal, &mut visited, &mut order);
    order
}

fn visit(id: PassId, visited: &mut HashSet<PassId>, order: &mut Vec<PassId>) {
    if !visited.insert(id) {
        return;
    }
    for &dep in descriptor(id).inputs {
        visit(dep, visited, order);
    }
    order.push(id);
}

// ── Tests ──────────────────────────────────────────────────────────────────
