// pipeline.rs — Compilation state and pass orchestration
//
// Holds the front-end inputs (input table, declaration graph, registry) and
// every pass artifact, and runs the minimal set of passes for a given
// terminal PassId.
//
// Preconditions: inputs, graph and registry are set (see `from_source`).
// Postconditions: all artifacts for required passes are populated, or has_error is set.
// Failure modes: the first pass returning a `Diagnostic`; compilation of the
//   module stops there.
// Side effects: calls on_pass_complete callback after each pass; writes
//   timing lines to stderr when `verbose`.

use std::time::{Duration, Instant};

use crate::analyze::Analysis;
use crate::ast::DeclarationGraph;
use crate::carrier::CarrierMap;
use crate::diag::Diagnostic;
use crate::lir::LirModule;
use crate::pass::{descriptor, required_passes, PassId};
use crate::registry::{InputTable, Registry};
use crate::stamp::StampedModule;

// ── Options ────────────────────────────────────────────────────────────────

/// Library-level compile configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompileOptions {
    /// Run the inliner (and re-verify) after lowering.
    pub inline: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self { inline: true }
    }
}

// ── Artifact storage ───────────────────────────────────────────────────────

/// Pass outputs, filled in execution order.
#[derive(Debug, Default)]
pub struct Artifacts {
    pub analysis: Option<Analysis>,
    pub stamped: Option<StampedModule>,
    pub carriers: Option<CarrierMap>,
    pub lir: Option<LirModule>,
    pub inlined: Option<LirModule>,
}

/// Provenance metadata for hermetic builds and cache-key use.
///
/// `source_hash`: SHA-256 of the raw `.axm` source text.
/// `registry_fingerprint`: SHA-256 of canonical compact JSON from `Registry::canonical_json()`.
/// `compiler_version`: crate version from `Cargo.toml`.
#[derive(Debug, Clone)]
pub struct Provenance {
    pub source_hash: [u8; 32],
    pub registry_fingerprint: [u8; 32],
    pub compiler_version: &'static str,
}

impl Provenance {
    /// Hex string of the source hash (64 characters).
    pub fn source_hash_hex(&self) -> String {
        bytes_to_hex(&self.source_hash)
    }

    /// Hex string of the registry fingerprint (64 characters).
    pub fn registry_fingerprint_hex(&self) -> String {
        bytes_to_hex(&self.registry_fingerprint)
    }

    /// Serialize provenance as a JSON string for `--emit build-info`.
    pub fn to_json(&self) -> String {
        let value = serde_json::json!({
            "source_hash": self.source_hash_hex(),
            "registry_fingerprint": self.registry_fingerprint_hex(),
            "compiler_version": self.compiler_version,
        });
        let mut out = serde_json::to_string_pretty(&value).unwrap_or_default();
        out.push('\n');
        out
    }
}

fn bytes_to_hex(bytes: &[u8; 32]) -> String {
    let mut s = String::with_capacity(64);
    for b in bytes {
        use std::fmt::Write;
        let _ = write!(s, "{:02x}", b);
    }
    s
}

fn sha256(bytes: &[u8]) -> [u8; 32] {
    use sha2::{Digest, Sha256};

    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&hasher.finalize());
    hash
}

/// Compute provenance from source text and registry.
///
/// The registry fingerprint is taken over `Registry::canonical_json()`
/// (compact JSON, sorted by function id).
pub fn compute_provenance(source: &str, registry: &Registry) -> Provenance {
    Provenance {
        source_hash: sha256(source.as_bytes()),
        registry_fingerprint: sha256(registry.canonical_json().as_bytes()),
        compiler_version: env!("CARGO_PKG_VERSION"),
    }
}

/// Holds all compilation artifacts and accumulated diagnostics.
pub struct CompilationState {
    pub registry: Registry,
    pub inputs: InputTable,
    pub graph: DeclarationGraph,
    pub artifacts: Artifacts,
    pub diagnostics: Vec<Diagnostic>,
    pub has_error: bool,
    pub provenance: Option<Provenance>,
}

impl CompilationState {
    pub fn new(inputs: InputTable, graph: DeclarationGraph, registry: Registry) -> Self {
        Self {
            registry,
            inputs,
            graph,
            artifacts: Artifacts::default(),
            diagnostics: Vec::new(),
            has_error: false,
            provenance: None,
        }
    }

    /// Parse `.axm` text and build the input table and declaration graph.
    ///
    /// Lex and parse errors are all reported; table and graph construction
    /// stop at the first error.
    pub fn from_source(source: &str, registry: Registry) -> Result<Self, Vec<Diagnostic>> {
        let parsed = crate::parser::parse(source);
        if !parsed.errors.is_empty() {
            return Err(parsed
                .errors
                .iter()
                .map(|e| Diagnostic::new(*e.span(), e.to_string()))
                .collect());
        }
        let module = parsed.module.ok_or_else(|| {
            let end = source.len();
            vec![Diagnostic::new(
                (end..end).into(),
                "parse failed with no output",
            )]
        })?;
        let inputs = InputTable::from_decls(&module.inputs).map_err(|d| vec![d])?;
        let graph = DeclarationGraph::new(module.declarations).map_err(|d| vec![d])?;
        let mut state = Self::new(inputs, graph, registry);
        state.provenance = Some(compute_provenance(source, &state.registry));
        Ok(state)
    }

    /// The LIR handed to downstream consumers: inlined when the inliner ran.
    pub fn final_lir(&self) -> Option<&LirModule> {
        self.artifacts
            .inlined
            .as_ref()
            .or(self.artifacts.lir.as_ref())
    }
}

// ── Error type ─────────────────────────────────────────────────────────────

/// Pipeline execution failed due to an error-level diagnostic in a pass.
/// The diagnostic is available in `CompilationState.diagnostics`.
#[derive(Debug)]
pub struct PipelineError {
    /// The pass that produced the error.
    pub failing_pass: PassId,
}

// ── Helper: per-pass bookkeeping ───────────────────────────────────────────

/// Per-pass post-processing: callback, accumulate, verbose, error check.
fn finish_pass<T>(
    state: &mut CompilationState,
    pass_id: PassId,
    result: Result<T, Diagnostic>,
    elapsed: Duration,
    verbose: bool,
    on_pass_complete: &mut impl FnMut(PassId, &[Diagnostic]),
) -> Result<T, PipelineError> {
    let diags: Vec<Diagnostic> = result.as_ref().err().cloned().into_iter().collect();
    on_pass_complete(pass_id, &diags);
    state.diagnostics.extend(diags);
    if verbose {
        eprintln!(
            "axc: {} complete, {:.1}ms",
            descriptor(pass_id).name,
            elapsed.as_secs_f64() * 1000.0
        );
    }
    result.map_err(|_| {
        state.has_error = true;
        PipelineError {
            failing_pass: pass_id,
        }
    })
}

// ── Pipeline runner ────────────────────────────────────────────────────────

/// Run the minimal set of passes to produce `terminal`.
///
/// Per-pass sequence: execute → on_pass_complete(callback) → verbose → error check.
/// With `options.inline == false` the inline pass is skipped even when it is
/// the terminal.
///
/// Preconditions: `state.inputs`, `state.graph` and `state.registry` are set.
/// Postconditions: artifacts for all passes in `required_passes(terminal)` are populated,
///   or `state.has_error` is true.
/// Failure modes: the first pass returning a diagnostic.
/// Side effects: calls `on_pass_complete` after each pass for immediate diagnostic display.
pub fn run_pipeline(
    state: &mut CompilationState,
    terminal: PassId,
    options: &CompileOptions,
    verbose: bool,
    mut on_pass_complete: impl FnMut(PassId, &[Diagnostic]),
) -> Result<(), PipelineError> {
    for pass_id in required_passes(terminal) {
        let t = Instant::now();
        match pass_id {
            PassId::Analyze => {
                let result = crate::analyze::analyze(&state.graph, &state.inputs, &state.registry);
                let analysis =
                    finish_pass(state, pass_id, result, t.elapsed(), verbose, &mut on_pass_complete)?;
                state.artifacts.analysis = Some(analysis);
            }
            PassId::Stamp => {
                let result = match &state.artifacts.analysis {
                    Some(analysis) => crate::stamp::stamp(&state.graph, analysis, &state.registry),
                    None => Err(missing(pass_id, "analysis")),
                };
                let stamped =
                    finish_pass(state, pass_id, result, t.elapsed(), verbose, &mut on_pass_complete)?;
                state.artifacts.stamped = Some(stamped);
            }
            PassId::Carriers => {
                let result = match &state.artifacts.stamped {
                    Some(stamped) => crate::carrier::build_carrier_map(stamped),
                    None => Err(missing(pass_id, "stamped module")),
                };
                let carriers =
                    finish_pass(state, pass_id, result, t.elapsed(), verbose, &mut on_pass_complete)?;
                state.artifacts.carriers = Some(carriers);
            }
            PassId::Lower => {
                let result = match (&state.artifacts.stamped, &state.artifacts.carriers) {
                    (Some(stamped), Some(carriers)) => {
                        crate::lower::lower_module(stamped, carriers, &state.registry)
                    }
                    _ => Err(missing(pass_id, "stamped module and carrier map")),
                };
                let lir =
                    finish_pass(state, pass_id, result, t.elapsed(), verbose, &mut on_pass_complete)?;
                state.artifacts.lir = Some(lir);
            }
            PassId::Verify => {
                let result = match &state.artifacts.lir {
                    Some(lir) => crate::verify::verify_module(lir),
                    None => Err(missing(pass_id, "LIR")),
                };
                finish_pass(state, pass_id, result, t.elapsed(), verbose, &mut on_pass_complete)?;
            }
            PassId::Inline => {
                if !options.inline {
                    continue;
                }
                let result = match &state.artifacts.lir {
                    Some(lir) => {
                        let inlined = crate::inline::inline_module(lir);
                        crate::verify::verify_module(&inlined).map(|()| inlined)
                    }
                    None => Err(missing(pass_id, "LIR")),
                };
                let inlined =
                    finish_pass(state, pass_id, result, t.elapsed(), verbose, &mut on_pass_complete)?;
                state.artifacts.inlined = Some(inlined);
            }
        }
    }
    Ok(())
}

fn missing(pass_id: PassId, what: &str) -> Diagnostic {
    Diagnostic::new(
        (0..0).into(),
        format!("{} pass ran without its {}", descriptor(pass_id).name, what),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diag::codes;

    const ORDERS: &str = "\
input items.price : [items] float
input items.qty : [items] integer
value subtotal = multiply(input.items.price, input.items.qty)
value total = reduce(sum, subtotal)
";

    fn compile(source: &str, terminal: PassId, options: CompileOptions) -> CompilationState {
        let mut state = CompilationState::from_source(source, Registry::with_builtins())
            .unwrap_or_else(|d| panic!("front end failed: {:?}", d));
        let _ = run_pipeline(&mut state, terminal, &options, false, |_, _| {});
        state
    }

    #[test]
    fn full_pipeline_populates_artifacts() {
        let state = compile(ORDERS, PassId::Inline, CompileOptions::default());
        assert!(!state.has_error, "{:?}", state.diagnostics);
        assert!(state.artifacts.analysis.is_some());
        assert!(state.artifacts.stamped.is_some());
        assert!(state.artifacts.carriers.is_some());
        assert!(state.artifacts.lir.is_some());
        assert!(state.artifacts.inlined.is_some());
        let total = state.final_lir().unwrap().get("total").unwrap();
        assert!(!total.to_string().contains("load_declaration"));
    }

    #[test]
    fn no_inline_keeps_load_declaration() {
        let state = compile(ORDERS, PassId::Inline, CompileOptions { inline: false });
        assert!(!state.has_error);
        assert!(state.artifacts.inlined.is_none());
        let total = state.final_lir().unwrap().get("total").unwrap();
        assert!(total.to_string().contains("load_declaration subtotal"));
    }

    #[test]
    fn terminal_stops_early() {
        let state = compile(ORDERS, PassId::Carriers, CompileOptions::default());
        assert!(state.artifacts.carriers.is_some());
        assert!(state.artifacts.lir.is_none());
    }

    #[test]
    fn callback_sees_each_pass_once() {
        let mut state = CompilationState::from_source(ORDERS, Registry::with_builtins()).unwrap();
        let mut seen = Vec::new();
        run_pipeline(
            &mut state,
            PassId::Inline,
            &CompileOptions::default(),
            false,
            |p, _| seen.push(p),
        )
        .unwrap();
        assert_eq!(seen, crate::pass::ALL_PASSES.to_vec());
    }

    #[test]
    fn failing_pass_reported() {
        let src = "\
input a.x : [a] float
input b.y : [b] float
value bad = add(input.a.x, input.b.y)
";
        let mut state = CompilationState::from_source(src, Registry::with_builtins()).unwrap();
        let err = run_pipeline(&mut state, PassId::Inline, &CompileOptions::default(), false, |_, _| {})
            .unwrap_err();
        assert_eq!(err.failing_pass, PassId::Analyze);
        assert!(state.has_error);
        assert_eq!(state.diagnostics[0].code, Some(codes::E0101));
    }

    #[test]
    fn parse_errors_become_diagnostics() {
        let errs = CompilationState::from_source("value = 1", Registry::with_builtins())
            .err()
            .unwrap();
        assert!(!errs.is_empty());
        assert!(errs.iter().all(|d| d.code.is_none()));
    }

    #[test]
    fn provenance_is_deterministic() {
        let registry = Registry::with_builtins();
        let a = compute_provenance("value x = 1", &registry);
        let b = compute_provenance("value x = 1", &registry);
        let c = compute_provenance("value x = 2", &registry);
        assert_eq!(a.source_hash, b.source_hash);
        assert_ne!(a.source_hash, c.source_hash);
        assert_eq!(a.source_hash_hex().len(), 64);
        assert!(a.to_json().contains("\"registry_fingerprint\""));
    }
}
