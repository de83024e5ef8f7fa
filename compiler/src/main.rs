use clap::Parser;
use std::path::PathBuf;

use axc::pass::PassId;
use axc::pipeline::{run_pipeline, CompilationState, CompileOptions};

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum EmitStage {
    Stamps,
    Carriers,
    Lir,
    LirJson,
    BuildInfo,
}

#[derive(Parser, Debug)]
#[command(
    name = "axc",
    version,
    about = "Axis compiler: dimensional analysis and loop lowering for .axm declaration modules"
)]
struct Cli {
    /// Input .axm source file
    source: PathBuf,

    /// Output file path (stdout when omitted)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Function manifest JSON, layered over the builtins (repeatable)
    #[arg(long = "functions")]
    functions: Vec<PathBuf>,

    /// Output stage
    #[arg(long, value_enum, default_value_t = EmitStage::Lir)]
    emit: EmitStage,

    /// Skip the LIR inliner
    #[arg(long)]
    no_inline: bool,

    /// Print compiler phases and timing
    #[arg(long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();

    if cli.verbose {
        eprintln!("axc: source = {}", cli.source.display());
        eprintln!("axc: emit   = {:?}", cli.emit);
    }

    // ── Load function registry ──
    let mut registry = axc::registry::Registry::with_builtins();
    for path in &cli.functions {
        match registry.load_manifest(path) {
            Ok(n) => {
                if cli.verbose {
                    eprintln!("axc: loaded {} functions from {}", n, path.display());
                }
            }
            Err(e) => {
                eprintln!("axc: error: {}", e);
                std::process::exit(2);
            }
        }
    }

    if cli.verbose {
        eprintln!("axc: {} functions registered", registry.len());
    }

    // ── Read and parse source ──
    let source = match std::fs::read_to_string(&cli.source) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("axc: error: {}: {}", cli.source.display(), e);
            std::process::exit(2);
        }
    };

    let mut state = match CompilationState::from_source(&source, registry) {
        Ok(state) => state,
        Err(diags) => {
            for diag in &diags {
                eprintln!("axc: {}", diag);
            }
            std::process::exit(1);
        }
    };

    if cli.verbose {
        eprintln!(
            "axc: parsed {} inputs, {} declarations",
            state.inputs.len(),
            state.graph.len()
        );
    }

    // ── Run passes ──
    let terminal = match cli.emit {
        EmitStage::Stamps => Some(PassId::Stamp),
        EmitStage::Carriers => Some(PassId::Carriers),
        EmitStage::Lir | EmitStage::LirJson => Some(PassId::Inline),
        EmitStage::BuildInfo => None,
    };
    let options = CompileOptions {
        inline: !cli.no_inline,
    };
    if let Some(terminal) = terminal {
        let result = run_pipeline(&mut state, terminal, &options, cli.verbose, |_, diags| {
            for diag in diags {
                eprintln!("axc: {}", diag);
            }
        });
        if result.is_err() {
            std::process::exit(1);
        }
    }

    // ── Emit ──
    let text = match cli.emit {
        EmitStage::Stamps => state.artifacts.stamped.as_ref().map(|s| s.to_string()),
        EmitStage::Carriers => state.artifacts.carriers.as_ref().map(|c| c.to_string()),
        EmitStage::Lir => state.final_lir().map(|lir| lir.to_string()),
        EmitStage::LirJson => state.final_lir().map(|lir| {
            let mut json = serde_json::to_string_pretty(lir).unwrap_or_default();
            json.push('\n');
            json
        }),
        EmitStage::BuildInfo => state.provenance.as_ref().map(|p| p.to_json()),
    };
    let Some(text) = text else {
        eprintln!("axc: nothing to emit for {:?}", cli.emit);
        std::process::exit(1);
    };

    match &cli.output {
        Some(path) => {
            if let Err(e) = std::fs::write(path, text) {
                eprintln!("axc: error: {}: {}", path.display(), e);
                std::process::exit(2);
            }
            if cli.verbose {
                eprintln!("axc: wrote {}", path.display());
            }
        }
        None => print!("{}", text),
    }
}
