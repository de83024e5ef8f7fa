use axc::*;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

// Benchmark scenarios. All are valid against the builtin function table.

const ORDERS_MODULE: &str = r#"
input items.price : [items] float
input items.qty : [items] integer

value subtotal = multiply(input.items.price, input.items.qty)
value total = reduce(sum, subtotal)
"#;

const NESTED_MODULE: &str = r#"
input orders.lines.qty : [orders, lines] integer
input orders.lines.price : [orders, lines] float
input orders.discount : [orders] float

value line_total = multiply(input.orders.lines.price, input.orders.lines.qty)
value order_total = sum(line_total)
value net = subtract(order_total, input.orders.discount)
value grand = reduce(sum, net)
trait discounted = gt(input.orders.discount, 0.0)
"#;

const BROADCAST_MODULE: &str = r#"
input items.price : [items] float
input rate : [] float

value scaled = multiply(input.items.price, input.rate)
value share = divide(scaled, sum(scaled))
value top = select(gt(share, 0.5), share, 0.0)
"#;

fn scenarios() -> [(&'static str, &'static str); 3] {
    [
        ("orders", ORDERS_MODULE),
        ("nested", NESTED_MODULE),
        ("broadcast", BROADCAST_MODULE),
    ]
}

/// Chain of `n` declarations, each one reading the previous.
fn generate_chain_module(n_decls: usize) -> String {
    let mut src = String::from("input items.price : [items] float\n");
    src.push_str("value d0 = multiply(input.items.price, 2.0)\n");
    for i in 1..n_decls {
        src.push_str(&format!("value d{} = add(d{}, input.items.price)\n", i, i - 1));
    }
    src.push_str(&format!("value total = reduce(sum, d{})\n", n_decls - 1));
    src
}

fn compile_full(source: &str, inline: bool) -> lir::LirModule {
    let mut state = pipeline::CompilationState::from_source(source, registry::Registry::with_builtins())
        .unwrap_or_else(|_| panic!("benchmark scenario must parse"));
    let options = pipeline::CompileOptions { inline };
    if pipeline::run_pipeline(&mut state, pass::PassId::Inline, &options, false, |_, _| {}).is_err() {
        panic!("benchmark scenario must compile");
    }
    state.final_lir().cloned().unwrap_or_default()
}

fn bench_parse_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_latency");
    for (name, source) in scenarios() {
        group.bench_with_input(BenchmarkId::from_parameter(name), source, |b, source| {
            b.iter(|| {
                let result = parser::parse(black_box(source));
                black_box(&result.module);
            });
        });
    }
    group.finish();
}

fn bench_full_compile_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("full_compile_latency");
    for (name, source) in scenarios() {
        for inline in [false, true] {
            let id = format!("{}/inline={}", name, inline);
            group.bench_with_input(BenchmarkId::from_parameter(id), source, |b, source| {
                b.iter(|| black_box(compile_full(black_box(source), inline)));
            });
        }
    }
    group.finish();
}

fn bench_inline_only(c: &mut Criterion) {
    let mut group = c.benchmark_group("inline");
    for (name, source) in scenarios() {
        let lowered = compile_full(source, false);
        group.bench_with_input(BenchmarkId::from_parameter(name), &lowered, |b, lowered| {
            b.iter(|| black_box(inline::inline_module(black_box(lowered))));
        });
    }
    group.finish();
}

fn bench_chain_scaling(c: &mut Criterion) {
    let mut group = c.benchmark_group("chain_scaling");
    for n in [8usize, 32, 128] {
        let source = generate_chain_module(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &source, |b, source| {
            b.iter(|| black_box(compile_full(black_box(source), true)));
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_parse_latency,
    bench_full_compile_latency,
    bench_inline_only,
    bench_chain_scaling
);
criterion_main!(benches);
